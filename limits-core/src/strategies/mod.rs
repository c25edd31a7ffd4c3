//! The strategy layer (§4.4): three algorithms composed on top of a
//! storage, plus the elastic-expiry variant of fixed window. Every strategy
//! exposes the uniform surface `hit`/`test`/`get_window_stats`/`clear`.
//!
//! A strategy holds `Arc<dyn Storage>` rather than owning the storage —
//! the Rust realization of spec.md §9's "strategies must not keep the
//! storage alive past the caller's intent": the caller holds its own
//! `Arc` and decides when the backend connection is torn down.

mod fixed_window;
mod moving_window;
mod sliding_window;

pub use fixed_window::FixedWindow;
pub use moving_window::MovingWindow;
pub use sliding_window::SlidingWindowCounter;

use std::fmt::Debug;
use std::time::SystemTime;

use crate::errors::Result;
use crate::limit::RateLimitItem;

/// `(reset_time, remaining)` as returned by `get_window_stats` (§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowStats {
    pub reset_time: SystemTime,
    pub remaining: u64,
}

/// The uniform strategy surface (§4.4).
pub trait RateLimitingStrategy: Debug + Send + Sync {
    /// Attempt to consume `cost` units of capacity. Returns `true` if
    /// accepted.
    fn hit(&self, limit: &RateLimitItem, identifiers: &[&str], cost: u64) -> Result<bool>;

    /// Non-mutating variant of `hit`: would the next hit be accepted?
    fn test(&self, limit: &RateLimitItem, identifiers: &[&str], cost: u64) -> Result<bool>;

    /// Current window's reset time and remaining capacity.
    fn get_window_stats(&self, limit: &RateLimitItem, identifiers: &[&str]) -> Result<WindowStats>;

    /// Remove all state for this key.
    fn clear(&self, limit: &RateLimitItem, identifiers: &[&str]) -> Result<()>;
}
