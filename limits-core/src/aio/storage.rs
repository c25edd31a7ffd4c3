//! The async mirror of the storage capability contract (§2 item 5,
//! "a single implementation budget covers both").
//!
//! Identical operations and semantics to [`crate::storage`]; the only
//! difference is that each method is a suspendable task, and the
//! suspension points are the network round-trips a remote driver performs
//! (§5). The in-process memory driver has no suspension points at all —
//! its async mirror is a thin `async fn` wrapper around the same
//! synchronous state.

use std::time::{Duration, SystemTime};

use async_trait::async_trait;

use crate::errors::Result;
use crate::storage::SlidingWindowSample;

#[async_trait]
pub trait AsyncStorage: std::fmt::Debug + Send + Sync {
    async fn incr(&self, key: &str, expiry: Duration, amount: u64, elastic: bool) -> Result<u64>;
    async fn get(&self, key: &str) -> Result<u64>;
    async fn get_expiry(&self, key: &str) -> Result<SystemTime>;
    async fn clear(&self, key: &str) -> Result<()>;
    async fn reset(&self) -> Result<Option<u64>>;
    async fn check(&self) -> bool;

    fn as_moving_window(&self) -> Option<&dyn AsyncMovingWindowStorage> {
        None
    }

    fn as_sliding_window_counter(&self) -> Option<&dyn AsyncSlidingWindowCounterStorage> {
        None
    }
}

#[async_trait]
pub trait AsyncMovingWindowStorage: AsyncStorage {
    async fn acquire_entry(&self, key: &str, limit: u64, expiry: Duration, amount: u64) -> Result<bool>;
    async fn get_moving_window(
        &self,
        key: &str,
        limit: u64,
        expiry: Duration,
    ) -> Result<(SystemTime, u64)>;
}

#[async_trait]
pub trait AsyncSlidingWindowCounterStorage: AsyncStorage {
    async fn acquire_sliding_window_entry(
        &self,
        key: &str,
        limit: u64,
        expiry: Duration,
        amount: u64,
    ) -> Result<bool>;
    async fn get_sliding_window(&self, key: &str, expiry: Duration) -> Result<SlidingWindowSample>;
    async fn clear_sliding_window(&self, key: &str, expiry: Duration) -> Result<()>;
}
