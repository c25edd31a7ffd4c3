//! # limits-core
//!
//! The strategy/storage core of a rate-limiting library: an immutable
//! [`Limit`] descriptor, a small storage capability contract that every
//! backend (in-process memory here; Redis/Memcached/MongoDB/etcd in their
//! own crates) implements identically, and the three rate-limiting
//! algorithms built on top of it.
//!
//! ## Layout
//!
//! * [`limit`] — the quota descriptor and key composition.
//! * [`parser`] — the frozen rate-limit expression grammar.
//! * [`storage`] — the `Counter`/`MovingWindow`/`SlidingWindowCounter`
//!   capability traits, plus the in-process reference driver.
//! * [`strategies`] — `FixedWindow`, `MovingWindow`, `SlidingWindowCounter`.
//! * [`registry`] — URI parsing and the `memory://` scheme.
//! * [`aio`] — the cooperative-async mirror of all of the above.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use limits_core::limit::{Granularity, RateLimitItem};
//! use limits_core::storage::memory::MemoryStorage;
//! use limits_core::strategies::{FixedWindow, RateLimitingStrategy};
//!
//! let storage = Arc::new(MemoryStorage::new());
//! let strategy = FixedWindow::new(storage);
//! let limit = RateLimitItem::new(10, 1, Granularity::Minute);
//!
//! if strategy.hit(&limit, &["user-42"], 1).unwrap() {
//!     // request allowed
//! }
//! ```

pub mod aio;
pub mod errors;
pub mod limit;
pub mod parser;
pub mod registry;
pub mod storage;
pub mod strategies;

pub use errors::{LimitsError, Result};
pub use limit::{Granularity, RateLimitItem};
