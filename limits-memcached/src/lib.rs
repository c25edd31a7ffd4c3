//! Memcached storage driver for the rate-limiting strategy core (§4.1.3).
//!
//! Implements `Storage` and `SlidingWindowCounterStorage` against a
//! `memcached://` or `memcached+unix://` target. Does not implement
//! `MovingWindowStorage` — see [`storage::MemcachedStorage`] for why.

pub mod aio;
pub mod storage;

pub use storage::MemcachedStorage;
