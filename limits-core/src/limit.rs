//! The limit descriptor: an immutable value describing one quota.

use std::cmp::Ordering;
use std::fmt;

/// The granularity of a rate-limit window, named after the classical
/// `limits.py` `RateLimitItemPer*` hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Granularity {
    Second,
    Minute,
    Hour,
    Day,
    Month,
    Year,
}

impl Granularity {
    /// Window length in seconds for one unit of this granularity.
    pub const fn seconds(self) -> u64 {
        match self {
            Granularity::Second => 1,
            Granularity::Minute => 60,
            Granularity::Hour => 3_600,
            Granularity::Day => 86_400,
            Granularity::Month => 2_592_000,
            Granularity::Year => 31_104_000,
        }
    }

    /// The textual name used in the key format and the parser grammar, e.g.
    /// `"hour"`.
    pub const fn name(self) -> &'static str {
        match self {
            Granularity::Second => "second",
            Granularity::Minute => "minute",
            Granularity::Hour => "hour",
            Granularity::Day => "day",
            Granularity::Month => "month",
            Granularity::Year => "year",
        }
    }

    /// Case-insensitive, trailing-`s`-tolerant parse, as used by the
    /// expression grammar (§4.3 / §6).
    pub fn from_str_loose(s: &str) -> Option<Self> {
        let trimmed = s.trim().to_ascii_lowercase();
        let singular = trimmed.strip_suffix('s').unwrap_or(&trimmed);
        match singular {
            "second" | "sec" => Some(Granularity::Second),
            "minute" | "min" => Some(Granularity::Minute),
            "hour" => Some(Granularity::Hour),
            "day" => Some(Granularity::Day),
            "month" => Some(Granularity::Month),
            "year" => Some(Granularity::Year),
            _ => None,
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An identifier contributed to a limit's storage key. Callers pass strings
/// or byte slices (decoded as UTF-8, per §3.1) — both implement
/// [`Into<KeyPart>`].
#[derive(Debug, Clone)]
pub struct KeyPart(String);

impl KeyPart {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for KeyPart {
    fn from(s: &str) -> Self {
        KeyPart(s.to_string())
    }
}

impl From<String> for KeyPart {
    fn from(s: String) -> Self {
        KeyPart(s)
    }
}

impl From<&[u8]> for KeyPart {
    fn from(bytes: &[u8]) -> Self {
        KeyPart(String::from_utf8_lossy(bytes).into_owned())
    }
}

/// Default namespace prefixed to every composed key (§3.1).
pub const DEFAULT_NAMESPACE: &str = "LIMITER";

/// An immutable description of one quota: "`amount` hits per
/// `multiples * granularity`".
///
/// Equality and ordering follow §3.1: two limits are equal iff their
/// `(amount, granularity)` pair matches (multiples is deliberately excluded,
/// matching `limits.py`'s `RateLimitItem.__eq__`); ordering compares
/// granularity seconds ascending so shorter windows sort smaller.
#[derive(Debug, Clone)]
pub struct RateLimitItem {
    amount: u64,
    multiples: u64,
    granularity: Granularity,
    namespace: String,
}

impl RateLimitItem {
    /// # Panics
    /// Panics if `amount` or `multiples` is zero — both must be `>= 1` per
    /// §3.1. Construction is the only place this is enforced; the type is
    /// immutable afterwards.
    pub fn new(amount: u64, multiples: u64, granularity: Granularity) -> Self {
        Self::with_namespace(amount, multiples, granularity, DEFAULT_NAMESPACE)
    }

    pub fn with_namespace(
        amount: u64,
        multiples: u64,
        granularity: Granularity,
        namespace: impl Into<String>,
    ) -> Self {
        assert!(amount >= 1, "amount must be >= 1");
        assert!(multiples >= 1, "multiples must be >= 1");
        RateLimitItem {
            amount,
            multiples,
            granularity,
            namespace: namespace.into(),
        }
    }

    pub fn amount(&self) -> u64 {
        self.amount
    }

    pub fn multiples(&self) -> u64 {
        self.multiples
    }

    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// `granularity_seconds * multiples`, in seconds.
    pub fn expiry_seconds(&self) -> u64 {
        self.granularity.seconds() * self.multiples
    }

    /// Compose the storage key from this limit and the caller-supplied
    /// identifier tuple: `"{namespace}/{id1}/.../{idN}/{amount}/{multiples}/{granularity_name}"`.
    pub fn key_for<I, K>(&self, identifiers: I) -> String
    where
        I: IntoIterator<Item = K>,
        K: Into<KeyPart>,
    {
        let mut parts = vec![self.namespace.clone()];
        parts.extend(identifiers.into_iter().map(|id| id.into().0));
        parts.push(self.amount.to_string());
        parts.push(self.multiples.to_string());
        parts.push(self.granularity.name().to_string());
        parts.join("/")
    }
}

impl fmt::Display for RateLimitItem {
    /// Reparseable by [`crate::parser::parse`] (round-trip property, §8):
    /// `"{amount} per {multiples} {granularity}"`, e.g. `"1 per 3 hour"`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} per {} {}",
            self.amount,
            self.multiples,
            self.granularity.name()
        )
    }
}

impl PartialEq for RateLimitItem {
    fn eq(&self, other: &Self) -> bool {
        self.amount == other.amount && self.granularity == other.granularity
    }
}

impl Eq for RateLimitItem {}

impl PartialOrd for RateLimitItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RateLimitItem {
    fn cmp(&self, other: &Self) -> Ordering {
        self.granularity.seconds().cmp(&other.granularity.seconds())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_composition_matches_spec_format() {
        let limit = RateLimitItem::new(10, 2, Granularity::Minute);
        assert_eq!(
            limit.key_for(["alice", "resource"]),
            "LIMITER/alice/resource/10/2/minute"
        );
    }

    #[test]
    fn equality_ignores_multiples() {
        let a = RateLimitItem::new(10, 1, Granularity::Minute);
        let b = RateLimitItem::new(10, 5, Granularity::Minute);
        assert_eq!(a, b);
    }

    #[test]
    fn ordering_is_by_granularity_seconds() {
        let second = RateLimitItem::new(1, 1, Granularity::Second);
        let hour = RateLimitItem::new(1, 1, Granularity::Hour);
        assert!(second < hour);
    }

    #[test]
    fn expiry_is_granularity_times_multiples() {
        let limit = RateLimitItem::new(1, 3, Granularity::Hour);
        assert_eq!(limit.expiry_seconds(), 10_800);
    }

    #[test]
    #[should_panic]
    fn zero_amount_panics() {
        RateLimitItem::new(0, 1, Granularity::Minute);
    }
}
