use std::fmt;

/// The four error kinds produced anywhere in the strategy/storage stack.
///
/// Storage drivers wrap their own transport error in [`LimitsError::Storage`]
/// rather than inventing a parallel error type per backend.
#[derive(Debug, thiserror::Error)]
pub enum LimitsError {
    /// Invalid URI, unknown scheme, a missing required option, or an
    /// incompatible capability (e.g. a moving-window strategy over a
    /// counter-only storage reached through a `dyn Storage`).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The rate-limit expression grammar rejected its input.
    #[error("invalid rate limit string: {0}")]
    ParseError(String),

    /// Backend I/O or protocol failure during a strategy call.
    #[error("storage error: {0}")]
    Storage(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// etcd-specific: optimistic-concurrency retries exhausted.
    #[error("concurrent update to {key:?} failed after {attempts} attempts")]
    ConcurrentUpdate { key: String, attempts: u32 },
}

impl LimitsError {
    /// Helper for drivers: wrap an arbitrary transport error as `Storage`.
    pub fn storage<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        LimitsError::Storage(Box::new(err))
    }

    pub fn configuration(msg: impl fmt::Display) -> Self {
        LimitsError::Configuration(msg.to_string())
    }
}

pub type Result<T> = std::result::Result<T, LimitsError>;
