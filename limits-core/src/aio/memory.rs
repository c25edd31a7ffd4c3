//! Async mirror of the memory driver. The underlying state machine has no
//! suspension points, so this is a direct `async fn` wrapper over
//! [`crate::storage::memory::MemoryStorage`] rather than a reimplementation.

use std::time::{Duration, SystemTime};

use async_trait::async_trait;

use crate::errors::Result;
use crate::storage::memory::MemoryStorage;
use crate::storage::{MovingWindowStorage, SlidingWindowCounterStorage, SlidingWindowSample, Storage};

use super::storage::{AsyncMovingWindowStorage, AsyncSlidingWindowCounterStorage, AsyncStorage};

#[derive(Debug)]
pub struct AsyncMemoryStorage {
    inner: MemoryStorage,
}

impl AsyncMemoryStorage {
    pub fn new() -> Self {
        AsyncMemoryStorage {
            inner: MemoryStorage::new(),
        }
    }
}

impl Default for AsyncMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AsyncStorage for AsyncMemoryStorage {
    async fn incr(&self, key: &str, expiry: Duration, amount: u64, elastic: bool) -> Result<u64> {
        Storage::incr(&self.inner, key, expiry, amount, elastic)
    }

    async fn get(&self, key: &str) -> Result<u64> {
        Storage::get(&self.inner, key)
    }

    async fn get_expiry(&self, key: &str) -> Result<SystemTime> {
        Storage::get_expiry(&self.inner, key)
    }

    async fn clear(&self, key: &str) -> Result<()> {
        Storage::clear(&self.inner, key)
    }

    async fn reset(&self) -> Result<Option<u64>> {
        Storage::reset(&self.inner)
    }

    async fn check(&self) -> bool {
        Storage::check(&self.inner)
    }

    fn as_moving_window(&self) -> Option<&dyn AsyncMovingWindowStorage> {
        Some(self)
    }

    fn as_sliding_window_counter(&self) -> Option<&dyn AsyncSlidingWindowCounterStorage> {
        Some(self)
    }
}

#[async_trait]
impl AsyncMovingWindowStorage for AsyncMemoryStorage {
    async fn acquire_entry(&self, key: &str, limit: u64, expiry: Duration, amount: u64) -> Result<bool> {
        MovingWindowStorage::acquire_entry(&self.inner, key, limit, expiry, amount)
    }

    async fn get_moving_window(
        &self,
        key: &str,
        limit: u64,
        expiry: Duration,
    ) -> Result<(SystemTime, u64)> {
        MovingWindowStorage::get_moving_window(&self.inner, key, limit, expiry)
    }
}

#[async_trait]
impl AsyncSlidingWindowCounterStorage for AsyncMemoryStorage {
    async fn acquire_sliding_window_entry(
        &self,
        key: &str,
        limit: u64,
        expiry: Duration,
        amount: u64,
    ) -> Result<bool> {
        SlidingWindowCounterStorage::acquire_sliding_window_entry(&self.inner, key, limit, expiry, amount)
    }

    async fn get_sliding_window(&self, key: &str, expiry: Duration) -> Result<SlidingWindowSample> {
        SlidingWindowCounterStorage::get_sliding_window(&self.inner, key, expiry)
    }

    async fn clear_sliding_window(&self, key: &str, expiry: Duration) -> Result<()> {
        SlidingWindowCounterStorage::clear_sliding_window(&self.inner, key, expiry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn incr_and_get_roundtrip() {
        let storage = AsyncMemoryStorage::new();
        assert_eq!(storage.incr("k", Duration::from_secs(1), 3, false).await.unwrap(), 3);
        assert_eq!(storage.get("k").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn moving_window_capability_is_advertised() {
        let storage = AsyncMemoryStorage::new();
        assert!(storage.as_moving_window().is_some());
        assert!(storage.as_sliding_window_counter().is_some());
    }
}
