//! The rate-limit expression grammar, preserved bit-exactly for
//! cross-runtime compatibility with the Python original
//! (`limits/util.py::parse`/`parse_many`) this crate is ported from.
//!
//! `spec.md` calls the parser "a frozen external function" and out of this
//! library's design scope; this module exists only because §4.3/§6/§8 pin
//! its grammar and round-trip behavior down to the letter, so it is
//! reproduced rather than redesigned.
//!
//! Grammar: `AMOUNT ("/" | "per") [MULTIPLES] GRANULARITY["s"]`, with
//! multiple expressions separated by `,`, `;`, or `|`. Case-insensitive,
//! whitespace-permissive.

use crate::errors::LimitsError;
use crate::limit::{Granularity, RateLimitItem};

/// Parse a single rate-limit expression, e.g. `"10 per minute"`,
/// `"1/3 hour"`, `"100/60seconds"`.
pub fn parse(expression: &str) -> Result<RateLimitItem, LimitsError> {
    let trimmed = expression.trim();
    if trimmed.is_empty() {
        return Err(LimitsError::ParseError("empty rate limit string".into()));
    }

    // Normalize the two separator spellings ("/" and "per") to a single
    // split point, then tokenize the remainder on whitespace.
    let (amount_part, rest) = split_amount(trimmed)?;
    let amount: u64 = amount_part
        .trim()
        .parse()
        .map_err(|_| LimitsError::ParseError(format!("invalid amount in {trimmed:?}")))?;

    let rest = rest.trim();
    let mut tokens = rest.split_whitespace();
    let first = tokens
        .next()
        .ok_or_else(|| LimitsError::ParseError(format!("missing granularity in {trimmed:?}")))?;

    // The granularity token and an optional leading multiples count may be
    // spelled as two words ("3 hour") or fused ("3hour"/"3/hour" already
    // split above), so split digits off the front of `first` if present.
    let (multiples_str, granularity_token) = split_leading_digits(first);

    let (multiples, granularity_token): (u64, &str) = if !multiples_str.is_empty()
        && !granularity_token.is_empty()
    {
        // Fused form, e.g. "60seconds".
        let m = multiples_str
            .parse()
            .map_err(|_| LimitsError::ParseError(format!("invalid multiples in {trimmed:?}")))?;
        (m, granularity_token)
    } else if !multiples_str.is_empty() {
        // `first` was all digits ("3 hour" form): the granularity is the
        // next whitespace-separated token, not an empty fused remainder.
        let next = tokens
            .next()
            .ok_or_else(|| LimitsError::ParseError(format!("missing granularity in {trimmed:?}")))?;
        let m: u64 = multiples_str
            .parse()
            .map_err(|_| LimitsError::ParseError(format!("invalid multiples in {trimmed:?}")))?;
        (m, next)
    } else {
        (1, first)
    };

    if tokens.next().is_some() {
        return Err(LimitsError::ParseError(format!(
            "trailing content in {trimmed:?}"
        )));
    }

    let granularity = Granularity::from_str_loose(granularity_token).ok_or_else(|| {
        LimitsError::ParseError(format!("unknown granularity {granularity_token:?}"))
    })?;

    Ok(RateLimitItem::new(amount, multiples.max(1), granularity))
}

/// Parse a `,`/`;`/`|`-separated list of rate-limit expressions.
pub fn parse_many(expression: &str) -> Result<Vec<RateLimitItem>, LimitsError> {
    expression
        .split([',', ';', '|'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(parse)
        .collect()
}

fn split_amount(s: &str) -> Result<(&str, &str), LimitsError> {
    if let Some(idx) = s.find('/') {
        return Ok((&s[..idx], &s[idx + 1..]));
    }
    let lower = s.to_ascii_lowercase();
    if let Some(idx) = lower.find(" per ") {
        return Ok((&s[..idx], &s[idx + 5..]));
    }
    Err(LimitsError::ParseError(format!(
        "expected '/' or 'per' separator in {s:?}"
    )))
}

fn split_leading_digits(token: &str) -> (&str, &str) {
    let split_at = token
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit())
        .map(|(i, _)| i)
        .unwrap_or(token.len());
    token.split_at(split_at)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_per_form() {
        let item = parse("1 per 3 hour").unwrap();
        assert_eq!(item.amount(), 1);
        assert_eq!(item.multiples(), 3);
        assert_eq!(item.granularity(), Granularity::Hour);
        assert_eq!(item.expiry_seconds(), 10_800);
    }

    #[test]
    fn parses_slash_form_with_fused_multiples() {
        let item = parse("100/60seconds").unwrap();
        assert_eq!(item.amount(), 100);
        assert_eq!(item.multiples(), 60);
        assert_eq!(item.granularity(), Granularity::Second);
    }

    #[test]
    fn parses_without_explicit_multiples() {
        let item = parse("10 per minute").unwrap();
        assert_eq!(item.multiples(), 1);
    }

    #[test]
    fn is_case_insensitive_and_whitespace_permissive() {
        let item = parse("  10  PER   Minute  ").unwrap();
        assert_eq!(item.granularity(), Granularity::Minute);
    }

    #[test]
    fn round_trips_through_display() {
        for g in [
            Granularity::Second,
            Granularity::Minute,
            Granularity::Hour,
            Granularity::Day,
            Granularity::Month,
            Granularity::Year,
        ] {
            let item = RateLimitItem::new(5, 3, g);
            let reparsed = parse(&item.to_string()).unwrap();
            assert_eq!(item, reparsed);
            assert_eq!(item.multiples(), reparsed.multiples());
        }
    }

    #[test]
    fn rejects_empty_input() {
        assert!(parse("").is_err());
    }

    #[test]
    fn rejects_missing_granularity() {
        assert!(parse("10 per").is_err());
    }

    #[test]
    fn rejects_unknown_granularity() {
        assert!(parse("10 per fortnight").is_err());
    }

    #[test]
    fn parses_many_with_mixed_separators() {
        let items = parse_many("1 per second, 10 per minute; 100 per hour|1000 per day").unwrap();
        assert_eq!(items.len(), 4);
    }
}
