//! Nonce ledger for replay protection.
//!
//! Every verified signed request consumes its nonce. The ledger remembers
//! consumed nonces for a TTL longer than the accepted timestamp window, so a
//! captured request cannot be resubmitted while its timestamp is still valid.
//!
//! State is process-local. Instances behind a load balancer do not share
//! ledgers, so a captured request can be replayed once against each other
//! instance within the window.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::ReplayConfig;

/// Source of the current time in epoch milliseconds.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Milliseconds since the Unix epoch.
    fn now_millis(&self) -> i64;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    /// Clock fixed at `now_millis`.
    pub fn new(now_millis: i64) -> Self {
        Self {
            now: AtomicI64::new(now_millis),
        }
    }

    /// Set the current time.
    pub fn set(&self, now_millis: i64) {
        self.now.store(now_millis, Ordering::SeqCst);
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(by.as_millis() as i64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Consumed nonces with the timestamp they were first seen with.
#[derive(Debug)]
pub struct ReplayLedger {
    entries: Mutex<HashMap<String, i64>>,
    ttl: Duration,
}

impl ReplayLedger {
    /// Empty ledger whose entries live for `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Ledger using the configured nonce TTL.
    pub fn from_config(config: &ReplayConfig) -> Self {
        Self::new(config.nonce_ttl)
    }

    /// Entry lifetime.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Record a nonce. An existing entry keeps its first-seen timestamp.
    pub fn insert(&self, nonce: impl Into<String>, timestamp_ms: i64) {
        self.entries
            .lock()
            .entry(nonce.into())
            .or_insert(timestamp_ms);
    }

    /// Whether the nonce has been consumed.
    pub fn contains(&self, nonce: &str) -> bool {
        self.entries.lock().contains_key(nonce)
    }

    /// Record a nonce unless already present. Returns false on a replay.
    ///
    /// Lookup and insert happen under one lock, so of two concurrent
    /// requests carrying the same nonce exactly one succeeds.
    pub fn try_insert(&self, nonce: &str, timestamp_ms: i64) -> bool {
        let mut entries = self.entries.lock();
        if entries.contains_key(nonce) {
            return false;
        }
        entries.insert(nonce.to_string(), timestamp_ms);
        true
    }

    /// Evict entries older than the TTL. Returns the number evicted.
    pub fn sweep(&self, now_ms: i64) -> usize {
        let ttl_ms = self.ttl.as_millis() as i64;
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, seen| now_ms - *seen <= ttl_ms);
        before - entries.len()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the ledger is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Start a background task sweeping the ledger every `interval`.
    ///
    /// Must be called from within a Tokio runtime. The task stops when the
    /// returned handle is dropped.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        clock: Arc<dyn Clock>,
        interval: Duration,
    ) -> SweeperHandle {
        let ledger = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let evicted = ledger.sweep(clock.now_millis());
                if evicted > 0 {
                    tracing::debug!(
                        evicted,
                        remaining = ledger.len(),
                        "Swept expired nonces"
                    );
                }
            }
        });
        SweeperHandle { handle }
    }
}

/// Handle to a running sweeper task. Aborts the task on drop.
#[derive(Debug)]
pub struct SweeperHandle {
    handle: JoinHandle<()>,
}

impl SweeperHandle {
    /// Whether the task has stopped.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_contains() {
        let ledger = ReplayLedger::new(Duration::from_secs(600));
        assert!(ledger.is_empty());
        assert!(!ledger.contains("n1"));

        ledger.insert("n1", 1_000);
        assert!(ledger.contains("n1"));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_try_insert_rejects_second_use() {
        let ledger = ReplayLedger::new(Duration::from_secs(600));
        assert!(ledger.try_insert("n1", 0));
        assert!(!ledger.try_insert("n1", 5));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_sweep_evicts_only_expired() {
        let ledger = ReplayLedger::new(Duration::from_secs(600));
        ledger.insert("old", 0);
        ledger.insert("fresh", 500_000);

        assert_eq!(ledger.sweep(600_000), 0);
        assert_eq!(ledger.sweep(600_001), 1);
        assert!(!ledger.contains("old"));
        assert!(ledger.contains("fresh"));
    }

    #[test]
    fn test_concurrent_try_insert_single_winner() {
        let ledger = Arc::new(ReplayLedger::new(Duration::from_secs(600)));
        let winners: usize = (0..8)
            .map(|_| {
                let ledger = Arc::clone(&ledger);
                std::thread::spawn(move || ledger.try_insert("shared", 42))
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|h| h.join().unwrap() as usize)
            .sum();
        assert_eq!(winners, 1);
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(1_000);
        clock.advance(Duration::from_secs(2));
        assert_eq!(clock.now_millis(), 3_000);
        clock.set(0);
        assert_eq!(clock.now_millis(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_task_evicts_on_tick() {
        let ledger = Arc::new(ReplayLedger::new(Duration::from_secs(600)));
        let clock = Arc::new(ManualClock::new(0));
        ledger.insert("n1", 0);

        let _sweeper = ledger.spawn_sweeper(clock.clone(), Duration::from_secs(60));
        tokio::task::yield_now().await;
        assert!(ledger.contains("n1"));

        clock.set(700_000);
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(ledger.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_stops_on_drop() {
        let ledger = Arc::new(ReplayLedger::new(Duration::from_secs(600)));
        let clock = Arc::new(ManualClock::new(0));

        let sweeper = ledger.spawn_sweeper(clock.clone(), Duration::from_secs(60));
        drop(sweeper);

        ledger.insert("n1", 0);
        clock.set(700_000);
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(ledger.contains("n1"));
    }
}
