//! The in-process reference storage driver (§4.1.1).
//!
//! Atomicity is achieved with a single mutex guarding all three maps;
//! every public operation takes the lock exactly once and does its work
//! against the guard directly (rather than the spec's literal
//! "reentrant lock held around each operation" plus nested per-entry locks
//! during sweeps) — one non-reentrant critical section per call is simpler
//! in Rust and gives the same atomicity guarantee. A background sweeper
//! evicts expired counters and event deques on a short cadence so that
//! idle keys don't grow the maps without bound between reads.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

use crate::errors::Result;
use crate::storage::{MovingWindowStorage, SlidingWindowCounterStorage, SlidingWindowSample, Storage};

const SWEEP_INTERVAL: Duration = Duration::from_millis(10);
/// Upper bound on entries swept per tick so the sweeper never starves
/// foreground operations on a large keyspace (§5, "bounding work per tick").
const MAX_SWEEP_PER_TICK: usize = 4096;

#[derive(Debug, Clone, Copy)]
struct CounterEntry {
    value: u64,
    expires_at: SystemTime,
}

#[derive(Debug, Default)]
struct Inner {
    counters: HashMap<String, CounterEntry>,
    events: HashMap<String, VecDeque<SystemTime>>,
}

#[derive(Debug)]
pub struct MemoryStorage {
    inner: Arc<Mutex<Inner>>,
    stop: Arc<AtomicBool>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        let inner = Arc::new(Mutex::new(Inner::default()));
        let stop = Arc::new(AtomicBool::new(false));
        spawn_sweeper(Arc::downgrade(&inner), stop.clone());
        MemoryStorage { inner, stop }
    }

    fn window_id(now: SystemTime, expiry: Duration) -> u64 {
        let expiry_secs = expiry.as_secs().max(1);
        let now_secs = now
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_secs();
        now_secs / expiry_secs
    }

    fn sliding_keys(key: &str, expiry: Duration, now: SystemTime) -> (String, String) {
        let window_id = Self::window_id(now, expiry);
        (
            format!("{key}/{window_id}"),
            format!("{key}/{}", window_id.saturating_sub(1)),
        )
    }

    fn incr_locked(
        inner: &mut Inner,
        key: &str,
        expiry: Duration,
        amount: u64,
        elastic: bool,
        now: SystemTime,
    ) -> u64 {
        match inner.counters.get_mut(key) {
            Some(entry) if entry.expires_at > now => {
                entry.value = entry.value.saturating_add(amount);
                if elastic {
                    entry.expires_at = now + expiry;
                }
                entry.value
            }
            _ => {
                inner.counters.insert(
                    key.to_string(),
                    CounterEntry {
                        value: amount,
                        expires_at: now + expiry,
                    },
                );
                amount
            }
        }
    }

    fn sliding_sample_locked(
        inner: &Inner,
        key: &str,
        expiry: Duration,
        now: SystemTime,
    ) -> SlidingWindowSample {
        let (cur_key, prev_key) = Self::sliding_keys(key, expiry, now);
        let ttl_of = |k: &str| -> (u64, Duration) {
            match inner.counters.get(k) {
                Some(e) if e.expires_at > now => {
                    (e.value, e.expires_at.duration_since(now).unwrap_or(Duration::ZERO))
                }
                _ => (0, Duration::ZERO),
            }
        };
        let (current_count, current_ttl) = ttl_of(&cur_key);
        let (previous_count, previous_ttl) = ttl_of(&prev_key);
        SlidingWindowSample {
            previous_count,
            previous_ttl,
            current_count,
            current_ttl,
        }
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MemoryStorage {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

fn spawn_sweeper(inner: Weak<Mutex<Inner>>, stop: Arc<AtomicBool>) {
    thread::Builder::new()
        .name("limits-memory-sweeper".into())
        .spawn(move || loop {
            thread::sleep(SWEEP_INTERVAL);
            if stop.load(Ordering::Relaxed) {
                return;
            }
            let Some(inner) = inner.upgrade() else {
                return;
            };
            let now = SystemTime::now();
            let mut guard = inner.lock();
            let mut swept = 0usize;
            guard.counters.retain(|_, entry| {
                swept += 1;
                entry.expires_at > now || swept > MAX_SWEEP_PER_TICK
            });
            // Events carry no per-entry TTL; they are pruned lazily against
            // each strategy's own expiry in `acquire_entry`/
            // `get_moving_window`. The sweeper only drops deques that have
            // already gone empty, to bound idle memory.
            guard.events.retain(|_, deque| !deque.is_empty());
        })
        .expect("failed to spawn memory storage sweeper thread");
}

impl Storage for MemoryStorage {
    fn incr(&self, key: &str, expiry: Duration, amount: u64, elastic: bool) -> Result<u64> {
        let now = SystemTime::now();
        let mut inner = self.inner.lock();
        Ok(Self::incr_locked(&mut inner, key, expiry, amount, elastic, now))
    }

    fn get(&self, key: &str) -> Result<u64> {
        let now = SystemTime::now();
        let inner = self.inner.lock();
        Ok(inner
            .counters
            .get(key)
            .filter(|e| e.expires_at > now)
            .map(|e| e.value)
            .unwrap_or(0))
    }

    fn get_expiry(&self, key: &str) -> Result<SystemTime> {
        let now = SystemTime::now();
        let inner = self.inner.lock();
        Ok(inner
            .counters
            .get(key)
            .filter(|e| e.expires_at > now)
            .map(|e| e.expires_at)
            .unwrap_or(now))
    }

    fn clear(&self, key: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.counters.remove(key);
        inner.events.remove(key);
        Ok(())
    }

    fn reset(&self) -> Result<Option<u64>> {
        let mut inner = self.inner.lock();
        let count = inner.counters.len() + inner.events.len();
        inner.counters.clear();
        inner.events.clear();
        Ok(Some(count as u64))
    }

    fn check(&self) -> bool {
        true
    }

    fn as_moving_window(&self) -> Option<&dyn MovingWindowStorage> {
        Some(self)
    }

    fn as_sliding_window_counter(&self) -> Option<&dyn SlidingWindowCounterStorage> {
        Some(self)
    }
}

impl MovingWindowStorage for MemoryStorage {
    fn acquire_entry(&self, key: &str, limit: u64, expiry: Duration, amount: u64) -> Result<bool> {
        if amount == 0 || amount > limit {
            return Ok(false);
        }
        let now = SystemTime::now();
        let cutoff = now - expiry;
        let mut inner = self.inner.lock();
        let deque = inner.events.entry(key.to_string()).or_default();
        while matches!(deque.back(), Some(&oldest) if oldest < cutoff) {
            deque.pop_back();
        }
        if deque.len() as u64 > limit - amount {
            return Ok(false);
        }
        for _ in 0..amount {
            deque.push_front(now);
        }
        while deque.len() as u64 > limit {
            deque.pop_back();
        }
        Ok(true)
    }

    fn get_moving_window(&self, key: &str, _limit: u64, expiry: Duration) -> Result<(SystemTime, u64)> {
        let now = SystemTime::now();
        let cutoff = now - expiry;
        let mut inner = self.inner.lock();
        let deque = inner.events.entry(key.to_string()).or_default();
        while matches!(deque.back(), Some(&oldest) if oldest < cutoff) {
            deque.pop_back();
        }
        match deque.back() {
            Some(&oldest) => Ok((oldest, deque.len() as u64)),
            None => Ok((now, 0)),
        }
    }
}

impl SlidingWindowCounterStorage for MemoryStorage {
    fn acquire_sliding_window_entry(
        &self,
        key: &str,
        limit: u64,
        expiry: Duration,
        amount: u64,
    ) -> Result<bool> {
        if amount == 0 || amount > limit {
            return Ok(false);
        }
        let now = SystemTime::now();
        let mut inner = self.inner.lock();
        let sample = Self::sliding_sample_locked(&inner, key, expiry, now);
        let weighted = super::weighted_count(sample, expiry);
        if weighted + amount > limit {
            return Ok(false);
        }
        let (cur_key, _) = Self::sliding_keys(key, expiry, now);
        // Retained for `2 * expiry` so the counter is still readable as
        // "previous" for a full window after it stops being "current".
        Self::incr_locked(&mut inner, &cur_key, expiry * 2, amount, false, now);
        Ok(true)
    }

    fn get_sliding_window(&self, key: &str, expiry: Duration) -> Result<SlidingWindowSample> {
        let now = SystemTime::now();
        let inner = self.inner.lock();
        Ok(Self::sliding_sample_locked(&inner, key, expiry, now))
    }

    fn clear_sliding_window(&self, key: &str, expiry: Duration) -> Result<()> {
        let now = SystemTime::now();
        let (cur_key, prev_key) = Self::sliding_keys(key, expiry, now);
        let mut inner = self.inner.lock();
        inner.counters.remove(&cur_key);
        inner.counters.remove(&prev_key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use more_asserts::{assert_ge, assert_le};

    #[test]
    fn incr_creates_and_accumulates() {
        let storage = MemoryStorage::new();
        assert_eq!(storage.incr("k", Duration::from_secs(2), 1, false).unwrap(), 1);
        assert_eq!(storage.incr("k", Duration::from_secs(2), 1, false).unwrap(), 2);
        assert_eq!(storage.get("k").unwrap(), 2);
    }

    #[test]
    fn incr_resets_after_expiry() {
        let storage = MemoryStorage::new();
        storage.incr("k", Duration::from_millis(20), 5, false).unwrap();
        thread::sleep(Duration::from_millis(40));
        assert_eq!(storage.get("k").unwrap(), 0);
        assert_eq!(storage.incr("k", Duration::from_millis(20), 1, false).unwrap(), 1);
    }

    #[test]
    fn elastic_expiry_extends_ttl() {
        let storage = MemoryStorage::new();
        storage.incr("k", Duration::from_millis(50), 1, true).unwrap();
        thread::sleep(Duration::from_millis(30));
        storage.incr("k", Duration::from_millis(50), 1, true).unwrap();
        thread::sleep(Duration::from_millis(30));
        // 60ms elapsed total but the second hit refreshed the ttl at +30ms,
        // so the key should still be alive.
        assert_eq!(storage.get("k").unwrap(), 2);
    }

    #[test]
    fn clear_is_idempotent() {
        let storage = MemoryStorage::new();
        storage.incr("k", Duration::from_secs(1), 1, false).unwrap();
        storage.clear("k").unwrap();
        storage.clear("k").unwrap();
        assert_eq!(storage.get("k").unwrap(), 0);
    }

    #[test]
    fn moving_window_respects_limit() {
        let storage = MemoryStorage::new();
        let expiry = Duration::from_secs(2);
        for _ in 0..10 {
            assert!(storage.acquire_entry("k", 10, expiry, 1).unwrap());
        }
        assert!(!storage.acquire_entry("k", 10, expiry, 1).unwrap());
    }

    #[test]
    fn moving_window_cost_greater_than_one() {
        let storage = MemoryStorage::new();
        let expiry = Duration::from_secs(60);
        assert!(storage.acquire_entry("k", 10, expiry, 5).unwrap());
        assert!(!storage.acquire_entry("k", 10, expiry, 6).unwrap());
        assert!(storage.acquire_entry("k", 10, expiry, 5).unwrap());
        assert!(!storage.acquire_entry("k", 10, expiry, 1).unwrap());
    }

    #[test]
    fn moving_window_ages_out_entries() {
        let storage = MemoryStorage::new();
        let expiry = Duration::from_millis(100);
        for _ in 0..5 {
            assert!(storage.acquire_entry("k", 5, expiry, 1).unwrap());
        }
        assert!(!storage.acquire_entry("k", 5, expiry, 1).unwrap());
        thread::sleep(Duration::from_millis(120));
        let (_, count) = storage.get_moving_window("k", 5, expiry).unwrap();
        assert_eq!(count, 0);
        assert!(storage.acquire_entry("k", 5, expiry, 1).unwrap());
    }

    #[test]
    fn sliding_window_never_exceeds_limit() {
        let storage = MemoryStorage::new();
        let expiry = Duration::from_millis(200);
        let mut accepted = 0;
        for _ in 0..20 {
            if storage.acquire_sliding_window_entry("k", 5, expiry, 1).unwrap() {
                accepted += 1;
            }
        }
        assert_le!(accepted, 5);
        assert_ge!(accepted, 1);
    }

    #[test]
    fn reset_removes_all_keys() {
        let storage = MemoryStorage::new();
        storage.incr("a", Duration::from_secs(5), 1, false).unwrap();
        storage.incr("b", Duration::from_secs(5), 1, false).unwrap();
        let removed = storage.reset().unwrap();
        assert_eq!(removed, Some(2));
        assert_eq!(storage.get("a").unwrap(), 0);
        assert_eq!(storage.get("b").unwrap(), 0);
    }

    #[test]
    fn check_always_true_for_memory() {
        assert!(MemoryStorage::new().check());
    }
}
