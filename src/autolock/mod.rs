//! Inactivity and signal driven auto-lock.
//!
//! An `AutoLockPolicy` owns the user's `AutoLockConfig` and the time of the
//! last vault activity.  Once started with a lock callback it runs one
//! background task:
//!
//! - `FixedInterval`: a periodic idle check that calls the callback once
//!   the vault has been idle for the configured interval, then stops.
//! - `OnExternalLockSignal`: waits on the policy's `LockSignal` and calls
//!   the callback when it is triggered, then stops.
//! - `Never`: no task at all.
//!
//! The task is tied to a `CancellationToken` whose drop guard lives in the
//! policy, so `stop()`, a restart or dropping the policy ends it.  Every
//! `start()` and `stop()` also bumps a generation counter; the callback
//! receives a `LockTicket` for the run that fired it, so a lock request
//! that is still in flight when the policy is restarted can be told apart
//! from a current one.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

use crate::errors::{LockboxError, Result};
use crate::storage::file::write_atomic;

/// Default idle budget: 30 minutes.
const DEFAULT_IDLE: Duration = Duration::from_secs(30 * 60);

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// When the vault should lock itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum AutoLockConfig {
    /// Only explicit `lock()` calls lock the vault.
    Never,
    /// Lock after this long without activity.
    FixedInterval {
        #[serde(rename = "interval_ms", with = "crate::serde_util::millis")]
        interval: Duration,
    },
    /// Lock when the environment reports a lock event (screen lock, sleep).
    OnExternalLockSignal,
}

impl Default for AutoLockConfig {
    fn default() -> Self {
        Self::FixedInterval {
            interval: DEFAULT_IDLE,
        }
    }
}

impl AutoLockConfig {
    pub fn fixed(interval: Duration) -> Self {
        Self::FixedInterval { interval }
    }

    /// Idle budget for `FixedInterval`, `None` for the other modes.
    pub fn interval(&self) -> Option<Duration> {
        match self {
            Self::FixedInterval { interval } => Some(*interval),
            _ => None,
        }
    }

    /// Reject a `FixedInterval` below one millisecond.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::FixedInterval { interval } if interval.as_millis() == 0 => Err(
                LockboxError::ConfigError("auto-lock interval must be at least 1 ms".into()),
            ),
            _ => Ok(()),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct PersistedConfig {
    auto_lock: AutoLockConfig,
}

// ---------------------------------------------------------------------------
// Lock signal
// ---------------------------------------------------------------------------

/// Handle through which the environment asks for an immediate lock.
///
/// Clones share one channel; `trigger` is a no-op while nothing listens.
#[derive(Debug, Clone)]
pub struct LockSignal {
    tx: broadcast::Sender<()>,
}

impl Default for LockSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl LockSignal {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(8);
        Self { tx }
    }

    /// Deliver a "lock now" notification to every subscriber.
    pub fn trigger(&self) {
        let receivers = self.tx.send(()).unwrap_or(0);
        debug!(receivers, "external lock signal triggered");
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }
}

// ---------------------------------------------------------------------------
// Callback
// ---------------------------------------------------------------------------

/// Identifies the policy run that asked for a lock.
#[derive(Debug, Clone)]
pub struct LockTicket {
    generation: u64,
    policy: Weak<PolicyInner>,
}

impl LockTicket {
    /// False once the policy has been stopped, restarted or dropped since
    /// this ticket was issued.
    pub fn is_current(&self) -> bool {
        self.policy
            .upgrade()
            .is_some_and(|p| p.generation.load(Ordering::SeqCst) == self.generation)
    }
}

/// Invoked when the policy decides the vault must lock.
pub type LockCallback = Arc<dyn Fn(LockTicket) -> BoxFuture<'static, ()> + Send + Sync>;

/// Wrap an async closure as a `LockCallback`.
pub fn callback<F, Fut>(f: F) -> LockCallback
where
    F: Fn(LockTicket) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |ticket| f(ticket).boxed())
}

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

struct Running {
    generation: u64,
    on_lock: LockCallback,
    _guard: DropGuard,
}

struct PolicyInner {
    config: Mutex<AutoLockConfig>,
    check_every: Duration,
    last_activity: Arc<Mutex<Instant>>,
    signal: LockSignal,
    generation: AtomicU64,
    running: Mutex<Option<Running>>,
    persist_path: Mutex<Option<PathBuf>>,
}

/// Auto-lock timer shared between a vault and its owner.
///
/// Cheap to clone; clones control the same policy.
#[derive(Clone)]
pub struct AutoLockPolicy {
    inner: Arc<PolicyInner>,
}

impl std::fmt::Debug for AutoLockPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutoLockPolicy")
            .field("config", &self.config())
            .field("check_every", &self.inner.check_every)
            .field("running", &self.is_running())
            .finish()
    }
}

fn guard<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

impl AutoLockPolicy {
    /// Create a policy that checks for idleness every `check_every`.
    pub fn new(config: AutoLockConfig, check_every: Duration) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(PolicyInner {
                config: Mutex::new(config),
                check_every: check_every.max(Duration::from_millis(1)),
                last_activity: Arc::new(Mutex::new(Instant::now())),
                signal: LockSignal::new(),
                generation: AtomicU64::new(0),
                running: Mutex::new(None),
                persist_path: Mutex::new(None),
            }),
        })
    }

    /// Build a policy from loaded settings.
    pub fn from_settings(settings: &crate::config::Settings) -> Result<Self> {
        Self::new(settings.auto_lock, settings.auto_lock_check_interval())
    }

    /// Load the persisted config at `path` (defaults if absent) and keep
    /// persisting future changes there.
    pub fn restore(path: &Path, check_every: Duration) -> Result<Self> {
        let config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            let persisted: PersistedConfig = toml::from_str(&contents).map_err(|e| {
                LockboxError::ConfigError(format!("Failed to parse {}: {e}", path.display()))
            })?;
            persisted.auto_lock
        } else {
            AutoLockConfig::default()
        };

        let policy = Self::new(config, check_every)?;
        *guard(&policy.inner.persist_path) = Some(path.to_path_buf());
        Ok(policy)
    }

    /// Write the current config to `path` and keep it updated on changes.
    pub fn persist_to(&self, path: &Path) -> Result<()> {
        write_config(path, self.config())?;
        *guard(&self.inner.persist_path) = Some(path.to_path_buf());
        Ok(())
    }

    pub fn config(&self) -> AutoLockConfig {
        *guard(&self.inner.config)
    }

    /// Replace the config, persisting it first when a path is set.
    ///
    /// A running policy is restarted under the new config with its idle
    /// clock reset.  A stopped (or already fired) policy stays stopped.
    pub fn set_config(&self, config: AutoLockConfig) -> Result<()> {
        config.validate()?;
        if let Some(path) = guard(&self.inner.persist_path).clone() {
            write_config(&path, config)?;
        }
        *guard(&self.inner.config) = config;
        info!(?config, "auto-lock config changed");

        let restart = guard(&self.inner.running)
            .as_ref()
            .map(|r| Arc::clone(&r.on_lock));
        if let Some(on_lock) = restart {
            self.start(on_lock);
        } else {
            self.record_activity();
        }
        Ok(())
    }

    /// Begin watching for idleness or the lock signal.
    ///
    /// Resets the idle clock and replaces any task already running.
    pub fn start(&self, on_lock: LockCallback) {
        self.record_activity();

        let config = self.config();
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let token = CancellationToken::new();

        // Replacing the previous entry drops its guard and cancels its task.
        *guard(&self.inner.running) = Some(Running {
            generation,
            on_lock: Arc::clone(&on_lock),
            _guard: token.clone().drop_guard(),
        });

        let policy = Arc::downgrade(&self.inner);
        let spawned = match config {
            AutoLockConfig::Never => true,
            AutoLockConfig::FixedInterval { interval } => spawn(idle_loop(
                interval,
                self.inner.check_every,
                Arc::clone(&self.inner.last_activity),
                token,
                policy,
                generation,
                on_lock,
            )),
            AutoLockConfig::OnExternalLockSignal => spawn(signal_loop(
                self.inner.signal.subscribe(),
                token,
                policy,
                generation,
                on_lock,
            )),
        };
        if !spawned {
            warn!("no tokio runtime available, auto-lock disabled");
        }
        debug!(?config, generation, "auto-lock started");
    }

    /// Cancel any running task and invalidate outstanding tickets.  Safe to
    /// call when not started.
    pub fn stop(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        if guard(&self.inner.running).take().is_some() {
            debug!("auto-lock stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        guard(&self.inner.running).is_some()
    }

    /// Note vault activity, pushing the idle deadline back.
    pub fn record_activity(&self) {
        *guard(&self.inner.last_activity) = Instant::now();
    }

    /// The signal that locks the vault under `OnExternalLockSignal`.
    pub fn lock_signal(&self) -> LockSignal {
        self.inner.signal.clone()
    }

    /// Remaining idle budget while running under `FixedInterval`.
    pub fn time_until_lock(&self) -> Option<Duration> {
        if !self.is_running() {
            return None;
        }
        let limit = self.config().interval()?;
        let idle = Instant::now().saturating_duration_since(*guard(&self.inner.last_activity));
        Some(limit.saturating_sub(idle))
    }

    #[cfg(test)]
    pub(crate) fn current_ticket(&self) -> LockTicket {
        LockTicket {
            generation: self.inner.generation.load(Ordering::SeqCst),
            policy: Arc::downgrade(&self.inner),
        }
    }
}

fn write_config(path: &Path, config: AutoLockConfig) -> Result<()> {
    let text = toml::to_string(&PersistedConfig { auto_lock: config })
        .map_err(|e| LockboxError::ConfigError(format!("auto-lock config serialization: {e}")))?;
    write_atomic(path, text.as_bytes())?;
    Ok(())
}

fn spawn<F>(fut: F) -> bool
where
    F: Future<Output = ()> + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(fut);
            true
        }
        Err(_) => false,
    }
}

/// End the run `generation` if it is still the current one.
///
/// Clearing the entry cancels the run's token, so a fired policy reports
/// itself stopped until the next `start()`.
fn claim(policy: &Weak<PolicyInner>, generation: u64) -> Option<LockTicket> {
    let inner = policy.upgrade()?;
    let mut running = guard(&inner.running);
    if running.as_ref().map(|r| r.generation) != Some(generation) {
        return None;
    }
    running.take();
    Some(LockTicket {
        generation,
        policy: policy.clone(),
    })
}

async fn idle_loop(
    limit: Duration,
    check_every: Duration,
    last_activity: Arc<Mutex<Instant>>,
    cancel: CancellationToken,
    policy: Weak<PolicyInner>,
    generation: u64,
    on_lock: LockCallback,
) {
    let mut ticker = tokio::time::interval(check_every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {
                let idle = Instant::now().saturating_duration_since(*guard(&last_activity));
                if idle >= limit {
                    if let Some(ticket) = claim(&policy, generation) {
                        info!(idle_ms = idle.as_millis() as u64, "idle limit reached, locking vault");
                        on_lock(ticket).await;
                    }
                    return;
                }
            }
        }
    }
}

async fn signal_loop(
    mut rx: broadcast::Receiver<()>,
    cancel: CancellationToken,
    policy: Weak<PolicyInner>,
    generation: u64,
    on_lock: LockCallback,
) {
    tokio::select! {
        _ = cancel.cancelled() => {}
        msg = rx.recv() => match msg {
            Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => {
                if let Some(ticket) = claim(&policy, generation) {
                    info!("external lock signal received, locking vault");
                    on_lock(ticket).await;
                }
            }
            Err(broadcast::error::RecvError::Closed) => {}
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn config_round_trips_through_toml() {
        let text = toml::to_string(&PersistedConfig {
            auto_lock: AutoLockConfig::fixed(Duration::from_millis(1_500)),
        })
        .unwrap();
        assert!(text.contains("fixed_interval"));
        assert!(text.contains("interval_ms = 1500"));

        let back: PersistedConfig = toml::from_str(&text).unwrap();
        assert_eq!(back.auto_lock.interval(), Some(Duration::from_millis(1_500)));
    }

    #[test]
    fn interval_only_for_fixed_mode() {
        assert_eq!(
            AutoLockConfig::fixed(Duration::from_secs(5)).interval(),
            Some(Duration::from_secs(5))
        );
        assert_eq!(AutoLockConfig::Never.interval(), None);
        assert_eq!(AutoLockConfig::OnExternalLockSignal.interval(), None);
    }

    #[test]
    fn zero_interval_is_rejected() {
        let zero = AutoLockConfig::fixed(Duration::ZERO);
        assert!(matches!(zero.validate(), Err(LockboxError::ConfigError(_))));
        assert!(AutoLockPolicy::new(zero, Duration::from_secs(1)).is_err());

        let policy = AutoLockPolicy::new(AutoLockConfig::Never, Duration::from_secs(1)).unwrap();
        assert!(policy.set_config(zero).is_err());
        assert_eq!(policy.config(), AutoLockConfig::Never);
    }

    #[test]
    fn restore_defaults_when_file_missing() {
        let dir = TempDir::new().unwrap();
        let policy =
            AutoLockPolicy::restore(&dir.path().join("autolock.toml"), Duration::from_secs(1))
                .unwrap();
        assert_eq!(policy.config(), AutoLockConfig::default());
    }

    #[test]
    fn restore_rejects_zero_interval() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("autolock.toml");
        std::fs::write(&path, "[auto_lock]\nmode = \"fixed_interval\"\ninterval_ms = 0\n").unwrap();

        assert!(matches!(
            AutoLockPolicy::restore(&path, Duration::from_secs(1)),
            Err(LockboxError::ConfigError(_))
        ));
    }

    #[test]
    fn start_without_runtime_does_not_panic() {
        let policy =
            AutoLockPolicy::new(AutoLockConfig::default(), Duration::from_secs(1)).unwrap();
        policy.start(callback(|_| async {}));
        assert!(policy.is_running());
        policy.stop();
        assert!(!policy.is_running());
    }

    #[test]
    fn tickets_expire_on_restart_and_stop() {
        let policy = AutoLockPolicy::new(AutoLockConfig::Never, Duration::from_secs(1)).unwrap();
        policy.start(callback(|_| async {}));
        let first = policy.current_ticket();
        assert!(first.is_current());

        policy.start(callback(|_| async {}));
        assert!(!first.is_current());

        let second = policy.current_ticket();
        policy.stop();
        assert!(!second.is_current());

        let third = policy.current_ticket();
        drop(policy);
        assert!(!third.is_current());
    }
}
