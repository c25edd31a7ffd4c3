use std::sync::Arc;
use std::time::Duration;

use crate::errors::{LimitsError, Result};
use crate::limit::RateLimitItem;
use crate::storage::{MovingWindowStorage, Storage};

use super::{RateLimitingStrategy, WindowStats};

/// The exact log-based moving window (§4.4.3). Strictly bounds the accepted
/// count in any interval of length `expiry`, at the cost of storing one
/// timestamp per accepted hit.
#[derive(Debug)]
pub struct MovingWindow {
    storage: Arc<dyn Storage>,
}

impl MovingWindow {
    /// Refuses immediately if `storage` does not advertise the
    /// [`MovingWindowStorage`] capability (§8, "capability gating").
    pub fn new(storage: Arc<dyn Storage>) -> Result<Self> {
        if storage.as_moving_window().is_none() {
            return Err(LimitsError::configuration(
                "storage does not implement the moving-window capability",
            ));
        }
        Ok(MovingWindow { storage })
    }

    fn backend(&self) -> &dyn MovingWindowStorage {
        self.storage
            .as_moving_window()
            .expect("capability checked in MovingWindow::new")
    }
}

impl RateLimitingStrategy for MovingWindow {
    fn hit(&self, limit: &RateLimitItem, identifiers: &[&str], cost: u64) -> Result<bool> {
        if cost > limit.amount() {
            return Ok(false);
        }
        let key = limit.key_for(identifiers.iter().copied());
        let expiry = Duration::from_secs(limit.expiry_seconds());
        self.backend().acquire_entry(&key, limit.amount(), expiry, cost)
    }

    fn test(&self, limit: &RateLimitItem, identifiers: &[&str], cost: u64) -> Result<bool> {
        if cost > limit.amount() {
            return Ok(false);
        }
        let key = limit.key_for(identifiers.iter().copied());
        let expiry = Duration::from_secs(limit.expiry_seconds());
        let (_, count) = self.backend().get_moving_window(&key, limit.amount(), expiry)?;
        Ok(count + cost <= limit.amount())
    }

    fn get_window_stats(&self, limit: &RateLimitItem, identifiers: &[&str]) -> Result<WindowStats> {
        let key = limit.key_for(identifiers.iter().copied());
        let expiry = Duration::from_secs(limit.expiry_seconds());
        let (oldest, count) = self.backend().get_moving_window(&key, limit.amount(), expiry)?;
        Ok(WindowStats {
            reset_time: oldest + expiry,
            remaining: limit.amount().saturating_sub(count),
        })
    }

    fn clear(&self, limit: &RateLimitItem, identifiers: &[&str]) -> Result<()> {
        let key = limit.key_for(identifiers.iter().copied());
        self.storage.clear(&key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limit::Granularity;
    use crate::storage::memory::MemoryStorage;
    use std::thread;

    fn storage() -> Arc<dyn Storage> {
        Arc::new(MemoryStorage::new())
    }

    #[test]
    fn moving_window_saturation() {
        // Scenario 3: 10 per 2s, bursts of 5, 10th accepted, 11th refused.
        let limit = RateLimitItem::new(10, 2, Granularity::Second);
        let rl = MovingWindow::new(storage()).unwrap();
        for _ in 0..5 {
            assert!(rl.hit(&limit, &["user"], 1).unwrap());
        }
        for _ in 0..5 {
            assert!(rl.hit(&limit, &["user"], 1).unwrap());
        }
        assert!(!rl.hit(&limit, &["user"], 1).unwrap());
    }

    #[test]
    fn moving_window_ages_out() {
        let limit = RateLimitItem::new(5, 1, Granularity::Second);
        let rl = MovingWindow::new(storage()).unwrap();
        for _ in 0..5 {
            assert!(rl.hit(&limit, &["user"], 1).unwrap());
        }
        assert!(!rl.hit(&limit, &["user"], 1).unwrap());
        thread::sleep(Duration::from_millis(1100));
        assert!(rl.hit(&limit, &["user"], 1).unwrap());
    }

    #[test]
    fn moving_window_cost_above_one() {
        // Scenario 5: 10 per 60s, cost=5 then cost=6 refused, cost=5 ok,
        // 11th refused.
        let limit = RateLimitItem::new(10, 60, Granularity::Second);
        let rl = MovingWindow::new(storage()).unwrap();
        assert!(rl.hit(&limit, &["user"], 5).unwrap());
        assert!(!rl.hit(&limit, &["user"], 6).unwrap());
        assert!(rl.hit(&limit, &["user"], 5).unwrap());
        assert!(!rl.hit(&limit, &["user"], 1).unwrap());
    }

    #[test]
    fn refusal_does_not_mutate_state() {
        let limit = RateLimitItem::new(3, 10, Granularity::Second);
        let rl = MovingWindow::new(storage()).unwrap();
        for _ in 0..3 {
            assert!(rl.hit(&limit, &["user"], 1).unwrap());
        }
        assert!(!rl.hit(&limit, &["user"], 1).unwrap());
        let stats = rl.get_window_stats(&limit, &["user"]).unwrap();
        assert_eq!(stats.remaining, 0);
    }

    #[test]
    fn rejects_storage_without_capability() {
        #[derive(Debug)]
        struct CounterOnly;
        impl Storage for CounterOnly {
            fn incr(&self, _: &str, _: Duration, _: u64, _: bool) -> Result<u64> {
                Ok(1)
            }
            fn get(&self, _: &str) -> Result<u64> {
                Ok(0)
            }
            fn get_expiry(&self, _: &str) -> Result<std::time::SystemTime> {
                Ok(std::time::SystemTime::now())
            }
            fn clear(&self, _: &str) -> Result<()> {
                Ok(())
            }
            fn reset(&self) -> Result<Option<u64>> {
                Ok(None)
            }
            fn check(&self) -> bool {
                true
            }
        }

        let err = MovingWindow::new(Arc::new(CounterOnly)).unwrap_err();
        assert!(matches!(err, LimitsError::Configuration(_)));
    }
}
