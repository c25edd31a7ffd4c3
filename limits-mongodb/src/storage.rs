//! Synchronous facade over [`crate::aio::AsyncMongoStorage`].
//!
//! The `mongodb` crate has no blocking client variant in this workspace's
//! dependency selection (§8 Open Questions: one client per backend), so the
//! sync `Storage` impl owns a dedicated single-threaded Tokio runtime and
//! blocks on it for every call — the standard pattern for embedding an
//! async-only client behind a synchronous trait.

use std::time::{Duration, SystemTime};

use limits_core::errors::Result;
use limits_core::storage::{
    MovingWindowStorage, SlidingWindowCounterStorage, SlidingWindowSample, Storage,
};
use tokio::runtime::{Builder, Runtime};

use crate::aio::AsyncMongoStorage;

#[derive(Debug)]
pub struct MongoStorage {
    inner: AsyncMongoStorage,
    runtime: Runtime,
}

impl MongoStorage {
    pub fn new(uri: &str) -> Result<Self> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(limits_core::errors::LimitsError::storage)?;
        let inner = runtime.block_on(AsyncMongoStorage::new(uri))?;
        Ok(MongoStorage { inner, runtime })
    }
}

impl Storage for MongoStorage {
    fn incr(&self, key: &str, expiry: Duration, amount: u64, elastic: bool) -> Result<u64> {
        self.runtime.block_on(limits_core::aio::storage::AsyncStorage::incr(
            &self.inner,
            key,
            expiry,
            amount,
            elastic,
        ))
    }

    fn get(&self, key: &str) -> Result<u64> {
        self.runtime
            .block_on(limits_core::aio::storage::AsyncStorage::get(&self.inner, key))
    }

    fn get_expiry(&self, key: &str) -> Result<SystemTime> {
        self.runtime
            .block_on(limits_core::aio::storage::AsyncStorage::get_expiry(&self.inner, key))
    }

    fn clear(&self, key: &str) -> Result<()> {
        self.runtime
            .block_on(limits_core::aio::storage::AsyncStorage::clear(&self.inner, key))
    }

    fn reset(&self) -> Result<Option<u64>> {
        self.runtime
            .block_on(limits_core::aio::storage::AsyncStorage::reset(&self.inner))
    }

    fn check(&self) -> bool {
        self.runtime
            .block_on(limits_core::aio::storage::AsyncStorage::check(&self.inner))
    }

    fn as_moving_window(&self) -> Option<&dyn MovingWindowStorage> {
        Some(self)
    }

    fn as_sliding_window_counter(&self) -> Option<&dyn SlidingWindowCounterStorage> {
        Some(self)
    }
}

impl MovingWindowStorage for MongoStorage {
    fn acquire_entry(&self, key: &str, limit: u64, expiry: Duration, amount: u64) -> Result<bool> {
        self.runtime.block_on(
            limits_core::aio::storage::AsyncMovingWindowStorage::acquire_entry(
                &self.inner,
                key,
                limit,
                expiry,
                amount,
            ),
        )
    }

    fn get_moving_window(&self, key: &str, limit: u64, expiry: Duration) -> Result<(SystemTime, u64)> {
        self.runtime.block_on(
            limits_core::aio::storage::AsyncMovingWindowStorage::get_moving_window(
                &self.inner,
                key,
                limit,
                expiry,
            ),
        )
    }
}

impl SlidingWindowCounterStorage for MongoStorage {
    fn acquire_sliding_window_entry(
        &self,
        key: &str,
        limit: u64,
        expiry: Duration,
        amount: u64,
    ) -> Result<bool> {
        self.runtime.block_on(
            limits_core::aio::storage::AsyncSlidingWindowCounterStorage::acquire_sliding_window_entry(
                &self.inner,
                key,
                limit,
                expiry,
                amount,
            ),
        )
    }

    fn get_sliding_window(&self, key: &str, expiry: Duration) -> Result<SlidingWindowSample> {
        self.runtime.block_on(
            limits_core::aio::storage::AsyncSlidingWindowCounterStorage::get_sliding_window(
                &self.inner,
                key,
                expiry,
            ),
        )
    }

    fn clear_sliding_window(&self, key: &str, expiry: Duration) -> Result<()> {
        self.runtime.block_on(
            limits_core::aio::storage::AsyncSlidingWindowCounterStorage::clear_sliding_window(
                &self.inner,
                key,
                expiry,
            ),
        )
    }
}
