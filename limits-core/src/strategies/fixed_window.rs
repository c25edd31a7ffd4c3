use std::sync::Arc;
use std::time::Duration;

use crate::errors::Result;
use crate::limit::RateLimitItem;
use crate::storage::Storage;

use super::{RateLimitingStrategy, WindowStats};

/// The classical fixed-window counter (§4.4.1/§4.4.2).
///
/// A refused hit still consumes capacity in this window — that is
/// intentional and matches the classical algorithm, not a bug: the counter
/// is incremented unconditionally and the post-increment value is what's
/// compared against the limit.
#[derive(Debug)]
pub struct FixedWindow {
    storage: Arc<dyn Storage>,
    elastic: bool,
}

impl FixedWindow {
    /// Plain fixed window: the window boundary is fixed at `expiry` after
    /// the first hit in it and does not move.
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        FixedWindow {
            storage,
            elastic: false,
        }
    }

    /// Elastic-expiry variant (§4.4.2): every accepted hit extends the
    /// window by `expiry` from now.
    pub fn elastic(storage: Arc<dyn Storage>) -> Self {
        FixedWindow {
            storage,
            elastic: true,
        }
    }
}

impl RateLimitingStrategy for FixedWindow {
    fn hit(&self, limit: &RateLimitItem, identifiers: &[&str], cost: u64) -> Result<bool> {
        let key = limit.key_for(identifiers.iter().copied());
        let expiry = Duration::from_secs(limit.expiry_seconds());
        let post = self.storage.incr(&key, expiry, cost, self.elastic)?;
        Ok(post <= limit.amount())
    }

    fn test(&self, limit: &RateLimitItem, identifiers: &[&str], cost: u64) -> Result<bool> {
        let key = limit.key_for(identifiers.iter().copied());
        let current = self.storage.get(&key)?;
        Ok(current + cost <= limit.amount())
    }

    fn get_window_stats(&self, limit: &RateLimitItem, identifiers: &[&str]) -> Result<WindowStats> {
        let key = limit.key_for(identifiers.iter().copied());
        let current = self.storage.get(&key)?;
        let remaining = limit.amount().saturating_sub(current);
        let reset_time = self.storage.get_expiry(&key)?;
        Ok(WindowStats {
            reset_time,
            remaining,
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
    fn fixed_window_saturation() {
        // Scenario 1: 10 per 2s, 10 accepted, 11th refused, then resets.
        let limit = RateLimitItem::new(10, 2, Granularity::Second);
        let rl = FixedWindow::new(storage());
        for _ in 0..10 {
            assert!(rl.hit(&limit, &["user"], 1).unwrap());
        }
        assert!(!rl.hit(&limit, &["user"], 1).unwrap());
        thread::sleep(Duration::from_millis(2100));
        assert!(rl.hit(&limit, &["user"], 1).unwrap());
        let stats = rl.get_window_stats(&limit, &["user"]).unwrap();
        assert_eq!(stats.remaining, 9);
    }

    #[test]
    fn elastic_expiry_extends_window_on_refusal() {
        let limit = RateLimitItem::new(10, 2, Granularity::Second);
        let rl = FixedWindow::elastic(storage());
        for _ in 0..10 {
            assert!(rl.hit(&limit, &["user"], 1).unwrap());
        }
        // Each refusal still extends the window (incr is still called).
        assert!(!rl.hit(&limit, &["user"], 1).unwrap());
        thread::sleep(Duration::from_millis(1500));
        assert!(!rl.hit(&limit, &["user"], 1).unwrap());
    }

    #[test]
    fn test_is_non_mutating() {
        let limit = RateLimitItem::new(1, 10, Granularity::Second);
        let rl = FixedWindow::new(storage());
        assert!(rl.test(&limit, &["user"], 1).unwrap());
        assert!(rl.test(&limit, &["user"], 1).unwrap());
        assert!(rl.hit(&limit, &["user"], 1).unwrap());
        assert!(!rl.test(&limit, &["user"], 1).unwrap());
    }

    #[test]
    fn clear_is_idempotent_and_resets_capacity() {
        let limit = RateLimitItem::new(1, 10, Granularity::Second);
        let rl = FixedWindow::new(storage());
        assert!(rl.hit(&limit, &["user"], 1).unwrap());
        assert!(!rl.hit(&limit, &["user"], 1).unwrap());
        rl.clear(&limit, &["user"]).unwrap();
        rl.clear(&limit, &["user"]).unwrap();
        assert!(rl.hit(&limit, &["user"], 1).unwrap());
    }

    #[test]
    fn key_isolation_across_identifiers() {
        let limit = RateLimitItem::new(1, 10, Granularity::Second);
        let rl = FixedWindow::new(storage());
        assert!(rl.hit(&limit, &["alice"], 1).unwrap());
        assert!(rl.hit(&limit, &["bob"], 1).unwrap());
        assert!(!rl.hit(&limit, &["alice"], 1).unwrap());
    }
}
