//! Integration tests for the auto-lock policy, on its own and attached to
//! a vault.  Timer tests run on a paused tokio clock.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use lockbox::autolock::{callback, LockCallback};
use lockbox::storage::MemoryStorage;
use lockbox::{AutoLockConfig, AutoLockPolicy, SetOptions, Vault, VaultState};
use tempfile::TempDir;
use tokio::time::sleep;

use common::fast_options;

fn counter() -> (Arc<AtomicUsize>, LockCallback) {
    let hits = Arc::new(AtomicUsize::new(0));
    let h = hits.clone();
    let cb = callback(move |_ticket| {
        let h = h.clone();
        async move {
            h.fetch_add(1, Ordering::SeqCst);
        }
    });
    (hits, cb)
}

fn one_second_policy() -> AutoLockPolicy {
    AutoLockPolicy::new(
        AutoLockConfig::fixed(Duration::from_secs(1)),
        Duration::from_millis(100),
    )
    .unwrap()
}

// ---------------------------------------------------------------------------
// Policy alone
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn fixed_interval_fires_exactly_once() {
    let policy = one_second_policy();
    let (hits, cb) = counter();
    policy.start(cb);

    sleep(Duration::from_millis(500)).await;
    assert_eq!(hits.load(Ordering::SeqCst), 0, "too early to lock");

    sleep(Duration::from_millis(1_000)).await;
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    sleep(Duration::from_secs(10)).await;
    assert_eq!(hits.load(Ordering::SeqCst), 1, "callback must not repeat");
}

#[tokio::test(start_paused = true)]
async fn fired_policy_stays_stopped_until_restarted() {
    let policy = one_second_policy();
    let (hits, cb) = counter();
    policy.start(cb);

    sleep(Duration::from_millis(1_500)).await;
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert!(!policy.is_running());
    assert_eq!(policy.time_until_lock(), None);

    // A config change does not re-arm a policy that already fired.
    policy
        .set_config(AutoLockConfig::fixed(Duration::from_millis(200)))
        .unwrap();
    sleep(Duration::from_secs(5)).await;
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert!(!policy.is_running());
}

#[tokio::test(start_paused = true)]
async fn sub_second_interval_is_honoured() {
    let policy = AutoLockPolicy::new(
        AutoLockConfig::fixed(Duration::from_millis(500)),
        Duration::from_millis(10),
    )
    .unwrap();
    let (hits, cb) = counter();
    policy.start(cb);

    sleep(Duration::from_millis(1)).await;
    assert_eq!(hits.load(Ordering::SeqCst), 0, "must not lock immediately");

    sleep(Duration::from_millis(300)).await;
    assert_eq!(hits.load(Ordering::SeqCst), 0);

    sleep(Duration::from_millis(300)).await;
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[test]
fn fixed_keeps_millisecond_precision() {
    assert_eq!(
        AutoLockConfig::fixed(Duration::from_millis(1_500)).interval(),
        Some(Duration::from_millis(1_500))
    );
    assert!(
        AutoLockPolicy::new(AutoLockConfig::fixed(Duration::ZERO), Duration::from_secs(1))
            .is_err()
    );
}

#[tokio::test(start_paused = true)]
async fn activity_defers_the_deadline() {
    let policy = one_second_policy();
    let (hits, cb) = counter();
    policy.start(cb);

    sleep(Duration::from_millis(700)).await;
    policy.record_activity();

    sleep(Duration::from_millis(700)).await;
    assert_eq!(
        hits.load(Ordering::SeqCst),
        0,
        "activity should have pushed the deadline back"
    );

    sleep(Duration::from_millis(500)).await;
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn never_mode_runs_no_timer() {
    let policy = AutoLockPolicy::new(AutoLockConfig::Never, Duration::from_millis(100)).unwrap();
    let (hits, cb) = counter();
    policy.start(cb);

    sleep(Duration::from_secs(3_600)).await;
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    assert_eq!(policy.time_until_lock(), None);
}

#[tokio::test(start_paused = true)]
async fn stop_cancels_pending_lock() {
    let policy = one_second_policy();
    let (hits, cb) = counter();
    policy.start(cb);
    policy.stop();
    assert!(!policy.is_running());

    sleep(Duration::from_secs(5)).await;
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn dropping_the_policy_cancels_its_task() {
    let policy = one_second_policy();
    let (hits, cb) = counter();
    policy.start(cb);
    drop(policy);

    sleep(Duration::from_secs(5)).await;
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn external_signal_locks_only_in_signal_mode() {
    let policy = AutoLockPolicy::new(
        AutoLockConfig::OnExternalLockSignal,
        Duration::from_millis(100),
    )
    .unwrap();
    let (hits, cb) = counter();
    policy.start(cb);

    // Inert as a timer.
    sleep(Duration::from_secs(3_600)).await;
    assert_eq!(hits.load(Ordering::SeqCst), 0);

    policy.lock_signal().trigger();
    sleep(Duration::from_millis(10)).await;
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    let timed = AutoLockPolicy::new(
        AutoLockConfig::fixed(Duration::from_secs(3_600)),
        Duration::from_millis(100),
    )
    .unwrap();
    let (timed_hits, cb) = counter();
    timed.start(cb);
    timed.lock_signal().trigger();
    sleep(Duration::from_millis(10)).await;
    assert_eq!(timed_hits.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn changing_config_restarts_with_fresh_activity() {
    let policy = AutoLockPolicy::new(AutoLockConfig::Never, Duration::from_millis(100)).unwrap();
    let (hits, cb) = counter();
    policy.start(cb);

    sleep(Duration::from_secs(10)).await;
    policy
        .set_config(AutoLockConfig::fixed(Duration::from_secs(1)))
        .unwrap();

    // The 10 idle seconds before the change do not count.
    sleep(Duration::from_millis(500)).await;
    assert_eq!(hits.load(Ordering::SeqCst), 0);

    sleep(Duration::from_millis(700)).await;
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn time_until_lock_counts_down() {
    let policy = AutoLockPolicy::new(
        AutoLockConfig::fixed(Duration::from_secs(10)),
        Duration::from_secs(1),
    )
    .unwrap();
    assert_eq!(policy.time_until_lock(), None, "not started yet");

    let (_hits, cb) = counter();
    policy.start(cb);
    sleep(Duration::from_secs(4)).await;

    let left = policy.time_until_lock().unwrap();
    assert!(
        left <= Duration::from_secs(6) && left >= Duration::from_millis(5_900),
        "unexpected remaining time {left:?}"
    );
}

#[test]
fn config_is_persisted_and_restored() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("autolock.toml");

    let policy = AutoLockPolicy::new(AutoLockConfig::default(), Duration::from_secs(1)).unwrap();
    policy.persist_to(&path).unwrap();
    policy
        .set_config(AutoLockConfig::OnExternalLockSignal)
        .unwrap();

    let restored = AutoLockPolicy::restore(&path, Duration::from_secs(1)).unwrap();
    assert_eq!(restored.config(), AutoLockConfig::OnExternalLockSignal);

    // The restored policy keeps writing to the same file.
    restored
        .set_config(AutoLockConfig::fixed(Duration::from_millis(42_500)))
        .unwrap();
    let again = AutoLockPolicy::restore(&path, Duration::from_secs(1)).unwrap();
    assert_eq!(again.config(), AutoLockConfig::fixed(Duration::from_millis(42_500)));
}

#[test]
fn restore_rejects_malformed_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("autolock.toml");
    std::fs::write(&path, "[auto_lock]\nmode = \"sometimes\"\n").unwrap();

    assert!(AutoLockPolicy::restore(&path, Duration::from_secs(1)).is_err());
}

// ---------------------------------------------------------------------------
// Attached to a vault
// ---------------------------------------------------------------------------

fn vault_with(policy: &AutoLockPolicy) -> Vault {
    Vault::open(
        Arc::new(MemoryStorage::new()),
        fast_options().with_auto_lock(policy.clone()),
    )
}

#[tokio::test(start_paused = true)]
async fn idle_vault_locks_itself() {
    let policy = one_second_policy();
    let vault = vault_with(&policy);
    vault.initialize("pw").await.unwrap();
    assert!(policy.is_running());

    sleep(Duration::from_millis(1_500)).await;
    assert_eq!(vault.state(), VaultState::Locked);
    assert!(!policy.is_running(), "locking stops the policy");

    vault.unlock("pw").await.unwrap();
    assert!(policy.is_running(), "unlocking restarts the policy");
}

#[tokio::test(start_paused = true)]
async fn vault_activity_keeps_it_unlocked() {
    let policy = one_second_policy();
    let vault = vault_with(&policy);
    vault.initialize("pw").await.unwrap();
    vault.set("k", "v", SetOptions::default()).await.unwrap();

    sleep(Duration::from_millis(700)).await;
    assert!(vault.contains("k").await.unwrap());

    sleep(Duration::from_millis(700)).await;
    assert_eq!(vault.state(), VaultState::Unlocked);

    sleep(Duration::from_millis(600)).await;
    assert_eq!(vault.state(), VaultState::Locked);
}

#[tokio::test(start_paused = true)]
async fn external_signal_locks_vault() {
    let policy = AutoLockPolicy::new(
        AutoLockConfig::OnExternalLockSignal,
        Duration::from_millis(100),
    )
    .unwrap();
    let vault = vault_with(&policy);
    vault.initialize("pw").await.unwrap();

    let mut rx = vault.watch_state();
    policy.lock_signal().trigger();

    tokio::time::timeout(Duration::from_secs(1), async {
        while *rx.borrow_and_update() != VaultState::Locked {
            rx.changed().await.unwrap();
        }
    })
    .await
    .expect("vault should lock on the external signal");
}

#[tokio::test]
async fn dropping_the_vault_stops_its_policy() {
    let policy = one_second_policy();
    let vault = vault_with(&policy);
    vault.initialize("pw").await.unwrap();
    let cb = vault.lock_callback();
    assert!(policy.is_running());

    drop(vault);
    assert!(!policy.is_running());

    // A callback outliving its vault is harmless.
    let signal_policy = AutoLockPolicy::new(
        AutoLockConfig::OnExternalLockSignal,
        Duration::from_secs(1),
    )
    .unwrap();
    signal_policy.start(cb);
    signal_policy.lock_signal().trigger();
    sleep(Duration::from_millis(10)).await;
    assert!(!signal_policy.is_running());
}

#[tokio::test(start_paused = true)]
async fn unlock_near_the_deadline_keeps_the_vault_unlocked() {
    let policy = AutoLockPolicy::new(
        AutoLockConfig::fixed(Duration::from_secs(1)),
        Duration::from_millis(10),
    )
    .unwrap();
    let vault = vault_with(&policy);
    vault.initialize("pw").await.unwrap();

    // The old run may fire while this unlock holds the vault during key
    // derivation; its lock request must not land on the new session.
    sleep(Duration::from_millis(900)).await;
    vault.unlock("pw").await.unwrap();

    sleep(Duration::from_millis(50)).await;
    assert_eq!(vault.state(), VaultState::Unlocked);
    assert!(policy.is_running());

    sleep(Duration::from_millis(1_200)).await;
    assert_eq!(vault.state(), VaultState::Locked);
}
