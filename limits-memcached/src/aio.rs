//! Async mirror of [`crate::storage::MemcachedStorage`].
//!
//! The `memcache` crate is blocking I/O with no async variant (§8 Open
//! Questions, "Memcached/MongoDB/etcd async mirror" resolution in
//! `SPEC_FULL.md`): each operation runs the same synchronous call on
//! `tokio::task::spawn_blocking` rather than reimplementing the memcached
//! text protocol over an async socket.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use limits_core::aio::storage::{AsyncSlidingWindowCounterStorage, AsyncStorage};
use limits_core::errors::{LimitsError, Result};
use limits_core::storage::{SlidingWindowCounterStorage, SlidingWindowSample, Storage};

use crate::storage::MemcachedStorage;

#[derive(Debug)]
pub struct AsyncMemcachedStorage {
    inner: Arc<MemcachedStorage>,
}

impl AsyncMemcachedStorage {
    pub fn new(uri: &str) -> Result<Self> {
        Ok(AsyncMemcachedStorage {
            inner: Arc::new(MemcachedStorage::new(uri)?),
        })
    }

    async fn spawn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&MemcachedStorage) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || f(&inner))
            .await
            .map_err(LimitsError::storage)?
    }
}

#[async_trait]
impl AsyncStorage for AsyncMemcachedStorage {
    async fn incr(&self, key: &str, expiry: Duration, amount: u64, elastic: bool) -> Result<u64> {
        let key = key.to_string();
        self.spawn(move |s| Storage::incr(s, &key, expiry, amount, elastic)).await
    }

    async fn get(&self, key: &str) -> Result<u64> {
        let key = key.to_string();
        self.spawn(move |s| Storage::get(s, &key)).await
    }

    async fn get_expiry(&self, key: &str) -> Result<SystemTime> {
        let key = key.to_string();
        self.spawn(move |s| Storage::get_expiry(s, &key)).await
    }

    async fn clear(&self, key: &str) -> Result<()> {
        let key = key.to_string();
        self.spawn(move |s| Storage::clear(s, &key)).await
    }

    async fn reset(&self) -> Result<Option<u64>> {
        self.spawn(Storage::reset).await
    }

    async fn check(&self) -> bool {
        self.spawn(|s| Ok(Storage::check(s))).await.unwrap_or(false)
    }

    fn as_sliding_window_counter(&self) -> Option<&dyn AsyncSlidingWindowCounterStorage> {
        Some(self)
    }
}

#[async_trait]
impl AsyncSlidingWindowCounterStorage for AsyncMemcachedStorage {
    async fn acquire_sliding_window_entry(
        &self,
        key: &str,
        limit: u64,
        expiry: Duration,
        amount: u64,
    ) -> Result<bool> {
        let key = key.to_string();
        self.spawn(move |s| s.acquire_sliding_window_entry(&key, limit, expiry, amount))
            .await
    }

    async fn get_sliding_window(&self, key: &str, expiry: Duration) -> Result<SlidingWindowSample> {
        let key = key.to_string();
        self.spawn(move |s| s.get_sliding_window(&key, expiry)).await
    }

    async fn clear_sliding_window(&self, key: &str, expiry: Duration) -> Result<()> {
        let key = key.to_string();
        self.spawn(move |s| s.clear_sliding_window(&key, expiry)).await
    }
}
