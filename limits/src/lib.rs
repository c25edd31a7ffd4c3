//! Rate-limiting strategies and pluggable storage backends.
//!
//! This crate re-exports [`limits_core`] — the strategies, the rate-limit
//! expression parser, and the in-process memory driver — and adds the
//! [`registry`] factory, which widens [`limits_core::registry`]'s
//! `memory`-only scheme match with whichever storage driver crates this
//! build enabled via Cargo features (`redis`, `memcached`, `mongodb`,
//! `etcd`, or `full` for all of them).
//!
//! ```
//! use limits::registry::storage_from_uri;
//!
//! let storage = storage_from_uri("memory://").unwrap();
//! assert!(storage.check());
//! ```

pub mod registry;

pub use limits_core::aio;
pub use limits_core::errors;
pub use limits_core::limit;
pub use limits_core::parser;
pub use limits_core::storage;
pub use limits_core::strategies;

#[cfg(feature = "redis")]
pub use limits_redis as redis;

#[cfg(feature = "memcached")]
pub use limits_memcached as memcached;

#[cfg(feature = "mongodb")]
pub use limits_mongodb as mongodb;

#[cfg(feature = "etcd")]
pub use limits_etcd as etcd;
