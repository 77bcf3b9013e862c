//! Serde field helpers shared by records, headers, credentials and config.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Deserializer, Serializer};

/// Serialize a `Vec<u8>` field as a base64 string.
pub(crate) fn base64_encode<S>(data: &[u8], serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&BASE64.encode(data))
}

pub(crate) fn base64_decode<'de, D>(deserializer: D) -> std::result::Result<Vec<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    BASE64.decode(&s).map_err(serde::de::Error::custom)
}

/// A `Duration` as whole milliseconds.
pub(crate) mod millis {
    use super::*;

    pub(crate) fn serialize<S>(d: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let ms = u64::try_from(d.as_millis()).map_err(serde::ser::Error::custom)?;
        serializer.serialize_u64(ms)
    }

    pub(crate) fn deserialize<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        #[serde(serialize_with = "base64_encode", deserialize_with = "base64_decode")]
        bytes: Vec<u8>,
        #[serde(with = "millis")]
        wait: Duration,
    }

    #[test]
    fn fields_use_compact_encodings() {
        let sample = Sample {
            bytes: vec![0xde, 0xad],
            wait: Duration::from_millis(1_500),
        };
        let json = serde_json::to_string(&sample).unwrap();
        assert_eq!(json, r#"{"bytes":"3q0=","wait":1500}"#);
        assert_eq!(serde_json::from_str::<Sample>(&json).unwrap(), sample);
    }

    #[test]
    fn bad_base64_is_rejected() {
        assert!(serde_json::from_str::<Sample>(r#"{"bytes":"@@","wait":1}"#).is_err());
    }
}
