//! Synchronous facade over [`crate::aio::AsyncEtcdStorage`].
//!
//! Same pattern as the mongodb driver's facade: `etcd-client` is async-only,
//! so this owns a dedicated single-threaded Tokio runtime and blocks on it
//! for every call.

use std::time::{Duration, SystemTime};

use limits_core::errors::Result;
use limits_core::storage::{SlidingWindowCounterStorage, SlidingWindowSample, Storage};
use tokio::runtime::{Builder, Runtime};

use crate::aio::AsyncEtcdStorage;

#[derive(Debug)]
pub struct EtcdStorage {
    inner: AsyncEtcdStorage,
    runtime: Runtime,
}

impl EtcdStorage {
    pub fn new(uri: &str) -> Result<Self> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(limits_core::errors::LimitsError::storage)?;
        let inner = runtime.block_on(AsyncEtcdStorage::new(uri))?;
        Ok(EtcdStorage { inner, runtime })
    }
}

impl Storage for EtcdStorage {
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

    fn as_sliding_window_counter(&self) -> Option<&dyn SlidingWindowCounterStorage> {
        Some(self)
    }
}

impl SlidingWindowCounterStorage for EtcdStorage {
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
