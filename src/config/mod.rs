//! Configuration loaded from `lockbox.toml`.

pub mod settings;

pub use settings::Settings;
