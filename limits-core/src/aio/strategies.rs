//! Async mirror of the strategy layer (§4.4), built over the async storage
//! traits. Same algorithms, same refusal semantics — see
//! `crate::strategies` for the narrative; this module only repeats what
//! differs in signature (`async fn`, `Arc<dyn AsyncStorage>`).

use std::sync::Arc;
use std::time::Duration;

use crate::errors::{LimitsError, Result};
use crate::limit::RateLimitItem;
use crate::storage::{weighted_count, weighted_count_ceil};
use crate::strategies::WindowStats;

use super::storage::{AsyncMovingWindowStorage, AsyncSlidingWindowCounterStorage, AsyncStorage};

#[derive(Debug)]
pub struct FixedWindow {
    storage: Arc<dyn AsyncStorage>,
    elastic: bool,
}

impl FixedWindow {
    pub fn new(storage: Arc<dyn AsyncStorage>) -> Self {
        FixedWindow {
            storage,
            elastic: false,
        }
    }

    pub fn elastic(storage: Arc<dyn AsyncStorage>) -> Self {
        FixedWindow {
            storage,
            elastic: true,
        }
    }

    pub async fn hit(&self, limit: &RateLimitItem, identifiers: &[&str], cost: u64) -> Result<bool> {
        let key = limit.key_for(identifiers.iter().copied());
        let expiry = Duration::from_secs(limit.expiry_seconds());
        let post = self.storage.incr(&key, expiry, cost, self.elastic).await?;
        Ok(post <= limit.amount())
    }

    pub async fn test(&self, limit: &RateLimitItem, identifiers: &[&str], cost: u64) -> Result<bool> {
        let key = limit.key_for(identifiers.iter().copied());
        let current = self.storage.get(&key).await?;
        Ok(current + cost <= limit.amount())
    }

    pub async fn get_window_stats(&self, limit: &RateLimitItem, identifiers: &[&str]) -> Result<WindowStats> {
        let key = limit.key_for(identifiers.iter().copied());
        let current = self.storage.get(&key).await?;
        let reset_time = self.storage.get_expiry(&key).await?;
        Ok(WindowStats {
            reset_time,
            remaining: limit.amount().saturating_sub(current),
        })
    }

    pub async fn clear(&self, limit: &RateLimitItem, identifiers: &[&str]) -> Result<()> {
        let key = limit.key_for(identifiers.iter().copied());
        self.storage.clear(&key).await
    }
}

#[derive(Debug)]
pub struct MovingWindow {
    storage: Arc<dyn AsyncStorage>,
}

impl MovingWindow {
    pub fn new(storage: Arc<dyn AsyncStorage>) -> Result<Self> {
        if storage.as_moving_window().is_none() {
            return Err(LimitsError::configuration(
                "storage does not implement the moving-window capability",
            ));
        }
        Ok(MovingWindow { storage })
    }

    fn backend(&self) -> &dyn AsyncMovingWindowStorage {
        self.storage
            .as_moving_window()
            .expect("capability checked in MovingWindow::new")
    }

    pub async fn hit(&self, limit: &RateLimitItem, identifiers: &[&str], cost: u64) -> Result<bool> {
        if cost > limit.amount() {
            return Ok(false);
        }
        let key = limit.key_for(identifiers.iter().copied());
        let expiry = Duration::from_secs(limit.expiry_seconds());
        self.backend().acquire_entry(&key, limit.amount(), expiry, cost).await
    }

    pub async fn test(&self, limit: &RateLimitItem, identifiers: &[&str], cost: u64) -> Result<bool> {
        if cost > limit.amount() {
            return Ok(false);
        }
        let key = limit.key_for(identifiers.iter().copied());
        let expiry = Duration::from_secs(limit.expiry_seconds());
        let (_, count) = self.backend().get_moving_window(&key, limit.amount(), expiry).await?;
        Ok(count + cost <= limit.amount())
    }

    pub async fn get_window_stats(&self, limit: &RateLimitItem, identifiers: &[&str]) -> Result<WindowStats> {
        let key = limit.key_for(identifiers.iter().copied());
        let expiry = Duration::from_secs(limit.expiry_seconds());
        let (oldest, count) = self.backend().get_moving_window(&key, limit.amount(), expiry).await?;
        Ok(WindowStats {
            reset_time: oldest + expiry,
            remaining: limit.amount().saturating_sub(count),
        })
    }

    pub async fn clear(&self, limit: &RateLimitItem, identifiers: &[&str]) -> Result<()> {
        let key = limit.key_for(identifiers.iter().copied());
        self.storage.clear(&key).await
    }
}

#[derive(Debug)]
pub struct SlidingWindowCounter {
    storage: Arc<dyn AsyncStorage>,
}

impl SlidingWindowCounter {
    pub fn new(storage: Arc<dyn AsyncStorage>) -> Result<Self> {
        if storage.as_sliding_window_counter().is_none() {
            return Err(LimitsError::configuration(
                "storage does not implement the sliding-window-counter capability",
            ));
        }
        Ok(SlidingWindowCounter { storage })
    }

    fn backend(&self) -> &dyn AsyncSlidingWindowCounterStorage {
        self.storage
            .as_sliding_window_counter()
            .expect("capability checked in SlidingWindowCounter::new")
    }

    pub async fn hit(&self, limit: &RateLimitItem, identifiers: &[&str], cost: u64) -> Result<bool> {
        if cost > limit.amount() {
            return Ok(false);
        }
        let key = limit.key_for(identifiers.iter().copied());
        let expiry = Duration::from_secs(limit.expiry_seconds());
        self.backend()
            .acquire_sliding_window_entry(&key, limit.amount(), expiry, cost)
            .await
    }

    pub async fn test(&self, limit: &RateLimitItem, identifiers: &[&str], cost: u64) -> Result<bool> {
        if cost > limit.amount() {
            return Ok(false);
        }
        let key = limit.key_for(identifiers.iter().copied());
        let expiry = Duration::from_secs(limit.expiry_seconds());
        let sample = self.backend().get_sliding_window(&key, expiry).await?;
        Ok(weighted_count(sample, expiry) + cost <= limit.amount())
    }

    pub async fn get_window_stats(&self, limit: &RateLimitItem, identifiers: &[&str]) -> Result<WindowStats> {
        let key = limit.key_for(identifiers.iter().copied());
        let expiry = Duration::from_secs(limit.expiry_seconds());
        let sample = self.backend().get_sliding_window(&key, expiry).await?;
        let weighted = weighted_count_ceil(sample, expiry);
        let reset_time = if sample.previous_count > 0 {
            std::time::SystemTime::now() + sample.previous_ttl
        } else {
            std::time::SystemTime::now() + sample.current_ttl
        };
        Ok(WindowStats {
            reset_time,
            remaining: limit.amount().saturating_sub(weighted),
        })
    }

    pub async fn clear(&self, limit: &RateLimitItem, identifiers: &[&str]) -> Result<()> {
        let key = limit.key_for(identifiers.iter().copied());
        let expiry = Duration::from_secs(limit.expiry_seconds());
        self.backend().clear_sliding_window(&key, expiry).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aio::memory::AsyncMemoryStorage;
    use crate::limit::Granularity;

    fn storage() -> Arc<dyn AsyncStorage> {
        Arc::new(AsyncMemoryStorage::new())
    }

    #[tokio::test]
    async fn fixed_window_saturates() {
        let limit = RateLimitItem::new(3, 10, Granularity::Second);
        let rl = FixedWindow::new(storage());
        assert!(rl.hit(&limit, &["user"], 1).await.unwrap());
        assert!(rl.hit(&limit, &["user"], 1).await.unwrap());
        assert!(rl.hit(&limit, &["user"], 1).await.unwrap());
        assert!(!rl.hit(&limit, &["user"], 1).await.unwrap());
    }

    #[tokio::test]
    async fn moving_window_saturates() {
        let limit = RateLimitItem::new(3, 10, Granularity::Second);
        let rl = MovingWindow::new(storage()).unwrap();
        assert!(rl.hit(&limit, &["user"], 1).await.unwrap());
        assert!(rl.hit(&limit, &["user"], 1).await.unwrap());
        assert!(rl.hit(&limit, &["user"], 1).await.unwrap());
        assert!(!rl.hit(&limit, &["user"], 1).await.unwrap());
    }

    #[tokio::test]
    async fn sliding_window_never_over_admits_in_one_window() {
        let limit = RateLimitItem::new(3, 10, Granularity::Second);
        let rl = SlidingWindowCounter::new(storage()).unwrap();
        let mut accepted = 0;
        for _ in 0..10 {
            if rl.hit(&limit, &["user"], 1).await.unwrap() {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 3);
    }

    #[tokio::test]
    async fn capability_gating_rejects_counter_only_storage() {
        use async_trait::async_trait;

        #[derive(Debug)]
        struct CounterOnly;

        #[async_trait]
        impl AsyncStorage for CounterOnly {
            async fn incr(&self, _: &str, _: Duration, _: u64, _: bool) -> Result<u64> {
                Ok(1)
            }
            async fn get(&self, _: &str) -> Result<u64> {
                Ok(0)
            }
            async fn get_expiry(&self, _: &str) -> Result<std::time::SystemTime> {
                Ok(std::time::SystemTime::now())
            }
            async fn clear(&self, _: &str) -> Result<()> {
                Ok(())
            }
            async fn reset(&self) -> Result<Option<u64>> {
                Ok(None)
            }
            async fn check(&self) -> bool {
                true
            }
        }

        let err = MovingWindow::new(Arc::new(CounterOnly)).unwrap_err();
        assert!(matches!(err, LimitsError::Configuration(_)));
    }
}
