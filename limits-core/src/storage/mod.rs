//! The storage capability contract (§4.1): every backend exposes the base
//! [`Storage`] (Counter) capability; [`MovingWindowStorage`] and
//! [`SlidingWindowCounterStorage`] are optional, advertised capabilities.
//!
//! Capability gating is resolved at the `dyn Storage` boundary: a strategy
//! that needs a wider capability asks for it via `as_moving_window()` /
//! `as_sliding_window_counter()` at construction time and returns a
//! [`LimitsError::Configuration`] immediately if the concrete storage
//! doesn't advertise it — the Rust-native equivalent of the `isinstance`
//! check `limits/strategies.py` performs in the original.

pub mod memory;

use std::fmt::Debug;
use std::time::{Duration, SystemTime};

use crate::errors::Result;

/// `(previous_count, previous_ttl, current_count, current_ttl)` as specified
/// in §4.1 for `get_sliding_window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlidingWindowSample {
    pub previous_count: u64,
    pub previous_ttl: Duration,
    pub current_count: u64,
    pub current_ttl: Duration,
}

/// The base capability every storage backend implements (§4.1, "Counter").
pub trait Storage: Debug + Send + Sync {
    /// Atomically increment `key` by `amount`, creating it with `ttl =
    /// expiry` if absent. If `elastic` is true, or this call created the
    /// key, the ttl is (re)set to `expiry`. Returns the post-increment
    /// value.
    fn incr(&self, key: &str, expiry: Duration, amount: u64, elastic: bool) -> Result<u64>;

    /// Current value, or 0 if absent/expired. Never fails due to absence.
    fn get(&self, key: &str) -> Result<u64>;

    /// Absolute expiry time, or `now` if the key is absent.
    fn get_expiry(&self, key: &str) -> Result<SystemTime>;

    /// Remove all state for `key`. Idempotent.
    fn clear(&self, key: &str) -> Result<()>;

    /// Best-effort removal of all keys under this library's namespace.
    /// `None` means the backend cannot support bulk removal.
    fn reset(&self) -> Result<Option<u64>>;

    /// Whether the backend is currently reachable. Never raises.
    fn check(&self) -> bool;

    /// Present when this storage also implements [`MovingWindowStorage`].
    fn as_moving_window(&self) -> Option<&dyn MovingWindowStorage> {
        None
    }

    /// Present when this storage also implements
    /// [`SlidingWindowCounterStorage`].
    fn as_sliding_window_counter(&self) -> Option<&dyn SlidingWindowCounterStorage> {
        None
    }
}

/// The exact log-based moving window capability (§4.1 "MovingWindow").
pub trait MovingWindowStorage: Storage {
    /// Atomically: if fewer than `limit - amount + 1` entries exist in
    /// `[now - expiry, now]`, append `amount` copies of `now`, truncate to
    /// `limit`, set ttl, and return `true`. Otherwise return `false` with no
    /// state change.
    fn acquire_entry(&self, key: &str, limit: u64, expiry: Duration, amount: u64) -> Result<bool>;

    /// `(oldest_active_timestamp, count_active)` over `[now - expiry, now]`.
    /// `(now, 0)` when empty.
    fn get_moving_window(&self, key: &str, limit: u64, expiry: Duration) -> Result<(SystemTime, u64)>;
}

/// The approximate two-counter capability (§4.1 "SlidingWindowCounter").
pub trait SlidingWindowCounterStorage: Storage {
    /// Atomically (or with documented compensation): refuse if
    /// `weighted_count + amount > limit`; else accept and increment the
    /// current counter by `amount`.
    fn acquire_sliding_window_entry(
        &self,
        key: &str,
        limit: u64,
        expiry: Duration,
        amount: u64,
    ) -> Result<bool>;

    fn get_sliding_window(&self, key: &str, expiry: Duration) -> Result<SlidingWindowSample>;

    /// Remove both the current and previous bucket for `key`. The base
    /// [`Storage::clear`] only knows the caller's logical key, not the
    /// derived bucket keys each driver uses internally, so this capability
    /// carries its own clear.
    fn clear_sliding_window(&self, key: &str, expiry: Duration) -> Result<()>;
}

/// Weighted count formula shared by the strategy layer and every
/// `SlidingWindowCounterStorage` implementation (§3.4):
/// `floor(previous_count * previous_remaining_ttl / expiry) + current_count`.
pub fn weighted_count(sample: SlidingWindowSample, expiry: Duration) -> u64 {
    if expiry.is_zero() {
        return sample.current_count;
    }
    let weighted_previous = (sample.previous_count as u128 * sample.previous_ttl.as_nanos())
        / expiry.as_nanos().max(1);
    weighted_previous as u64 + sample.current_count
}

/// Like [`weighted_count`], but rounds the fractional previous-window
/// contribution up instead of down (§4.4.4: reported remaining capacity is
/// `amount - ceil(weighted)`, never `amount - floor(weighted)`, so a caller
/// is never told capacity remains that the next `hit` would actually
/// refuse).
pub fn weighted_count_ceil(sample: SlidingWindowSample, expiry: Duration) -> u64 {
    if expiry.is_zero() {
        return sample.current_count;
    }
    let numerator = sample.previous_count as u128 * sample.previous_ttl.as_nanos();
    let denominator = expiry.as_nanos().max(1);
    let weighted_previous = numerator.div_ceil(denominator);
    weighted_previous as u64 + sample.current_count
}
