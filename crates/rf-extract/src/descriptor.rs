//! Range descriptor parsing.
//!
//! A descriptor is one entry of the `xs` / `xe` option lists. The accepted
//! forms are:
//!
//! | Form | Bound |
//! |------|-------|
//! | `T[H:]M:S[.frac]` | clock time from session start |
//! | `10`, `10.5`, `21/2` | seconds from session start |
//! | `D<time>` | duration relative to the previous bound |
//! | `F<n>` | one-based frame index |
//! | `S<n>[k\|m\|g]` | target chunk size in bytes |
//! | `SAP`, `RAP` | split at every sync point |
//! | `2024-05-01T10:00:00Z` | absolute UTC instant |
//!
//! ```
//! use rf_extract::descriptor::{parse, RangeBound};
//! use rf_core::Rational;
//!
//! assert_eq!(parse("T00:01:30").unwrap(), RangeBound::Time(Rational::from_secs(90)));
//! assert_eq!(parse("F25").unwrap(), RangeBound::Frame(25));
//! assert_eq!(parse("S2m").unwrap(), RangeBound::Size(2_000_000));
//! ```

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use rf_core::Rational;
use std::fmt;

/// A parsed range bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RangeBound {
    /// Media time in seconds.
    Time(Rational),
    /// Duration in seconds, relative to the previous bound.
    Duration(Rational),
    /// One-based frame index.
    Frame(u64),
    /// Target chunk size in bytes.
    Size(u64),
    /// Every sync point.
    Sap,
    /// Absolute UTC instant.
    Utc(DateTime<Utc>),
}

impl fmt::Display for RangeBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Time(t) => write!(f, "{t}"),
            Self::Duration(d) => write!(f, "D{d}"),
            Self::Frame(n) => write!(f, "F{n}"),
            Self::Size(n) => write!(f, "S{n}"),
            Self::Sap => write!(f, "SAP"),
            Self::Utc(at) => write!(f, "{}", at.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
        }
    }
}

/// Why a descriptor could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("empty range descriptor")]
    Empty,

    #[error("invalid time value '{0}'")]
    Time(String),

    #[error("invalid clock value '{0}'")]
    Clock(String),

    #[error("invalid frame index '{0}'")]
    Frame(String),

    #[error("invalid size '{0}'")]
    Size(String),

    #[error("invalid UTC date '{0}'")]
    Date(String),
}

/// Parse a single range descriptor.
pub fn parse(descriptor: &str) -> Result<RangeBound, ParseError> {
    let text = descriptor.trim();
    if text.is_empty() {
        return Err(ParseError::Empty);
    }

    if text.eq_ignore_ascii_case("sap") || text.eq_ignore_ascii_case("rap") {
        return Ok(RangeBound::Sap);
    }

    if looks_like_date(text) {
        return parse_date(text).map(RangeBound::Utc);
    }

    let mut chars = text.chars();
    let head = chars.next().unwrap_or_default();
    let rest = chars.as_str();

    match head.to_ascii_uppercase() {
        'T' => parse_clock(rest).map(RangeBound::Time),
        'D' => parse_time_value(rest).map(RangeBound::Duration),
        'F' => parse_frame(rest).map(RangeBound::Frame),
        'S' => parse_size(rest).map(RangeBound::Size),
        _ => parse_seconds(text).map(RangeBound::Time),
    }
}

// -------------------------------------------------------------------------
// Time values
// -------------------------------------------------------------------------

/// A time given either in clock form (`T...`) or as seconds.
fn parse_time_value(text: &str) -> Result<Rational, ParseError> {
    match text.strip_prefix(['T', 't']) {
        Some(clock) => parse_clock(clock),
        None => parse_seconds(text),
    }
}

/// Seconds as an integer, a decimal or a `num/den` fraction.
fn parse_seconds(text: &str) -> Result<Rational, ParseError> {
    let invalid = || ParseError::Time(text.to_string());

    if let Some((num, den)) = text.split_once('/') {
        let num: u64 = num.parse().map_err(|_| invalid())?;
        let den: u64 = den.parse().map_err(|_| invalid())?;
        if den == 0 || num > i64::MAX as u64 {
            return Err(invalid());
        }
        return Ok(Rational::new(num as i64, den));
    }

    parse_decimal(text).ok_or_else(invalid)
}

/// Unsigned decimal number with at most nine fractional digits.
fn parse_decimal(text: &str) -> Option<Rational> {
    let (int_part, frac_part) = match text.split_once('.') {
        Some((i, f)) => (i, f),
        None => (text, ""),
    };
    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }
    let all_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    if !all_digits(int_part) || !all_digits(frac_part) || frac_part.len() > 9 {
        return None;
    }

    let int: i64 = if int_part.is_empty() {
        0
    } else {
        int_part.parse().ok()?
    };
    let scale = 10i64.pow(frac_part.len() as u32);
    let frac: i64 = if frac_part.is_empty() {
        0
    } else {
        frac_part.parse().ok()?
    };
    let num = int.checked_mul(scale)?.checked_add(frac)?;
    Some(Rational::new(num, scale as u64))
}

/// `[H:]M:S[.frac]`, the part after the leading `T`.
fn parse_clock(text: &str) -> Result<Rational, ParseError> {
    let invalid = || ParseError::Clock(text.to_string());
    let parts: Vec<&str> = text.split(':').collect();

    let (hours, minutes, seconds) = match parts.as_slice() {
        [m, s] => ("0", *m, *s),
        [h, m, s] => (*h, *m, *s),
        _ => return Err(invalid()),
    };

    let whole = |s: &str| -> Option<i64> {
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        s.parse().ok()
    };

    let hours = whole(hours).ok_or_else(invalid)?;
    let minutes = whole(minutes).ok_or_else(invalid)?;
    let seconds = parse_decimal(seconds).ok_or_else(invalid)?;

    let base = hours
        .checked_mul(3600)
        .and_then(|h| minutes.checked_mul(60).and_then(|m| h.checked_add(m)))
        .ok_or_else(invalid)?;
    Ok(Rational::from_secs(base) + seconds)
}

// -------------------------------------------------------------------------
// Frames and sizes
// -------------------------------------------------------------------------

fn parse_frame(text: &str) -> Result<u64, ParseError> {
    match text.parse::<u64>() {
        Ok(n) if n >= 1 => Ok(n),
        _ => Err(ParseError::Frame(text.to_string())),
    }
}

fn parse_size(text: &str) -> Result<u64, ParseError> {
    let invalid = || ParseError::Size(text.to_string());

    let (number, multiplier) = match text.chars().last().map(|c| c.to_ascii_lowercase()) {
        Some('k') => (&text[..text.len() - 1], 1_000u64),
        Some('m') => (&text[..text.len() - 1], 1_000_000u64),
        Some('g') => (&text[..text.len() - 1], 1_000_000_000u64),
        _ => (text, 1u64),
    };

    let value = parse_decimal(number).ok_or_else(invalid)?;
    let bytes = value.to_ticks(multiplier as u32);
    if bytes <= 0 {
        return Err(invalid());
    }
    Ok(bytes as u64)
}

// -------------------------------------------------------------------------
// UTC dates
// -------------------------------------------------------------------------

/// `YYYY-MM-DD...` is never a valid time, frame or size descriptor.
fn looks_like_date(text: &str) -> bool {
    let bytes = text.as_bytes();
    bytes.len() >= 10
        && bytes[..4].iter().all(|b| b.is_ascii_digit())
        && bytes[4] == b'-'
        && bytes[7] == b'-'
}

fn parse_date(text: &str) -> Result<DateTime<Utc>, ParseError> {
    if let Ok(at) = DateTime::parse_from_rfc3339(text) {
        return Ok(at.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f") {
        return Ok(naive.and_utc());
    }
    if let Some(midnight) = NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
    {
        return Ok(midnight.and_utc());
    }
    Err(ParseError::Date(text.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn plain_seconds() {
        assert_eq!(parse("10").unwrap(), RangeBound::Time(Rational::from_secs(10)));
        assert_eq!(parse("0.5").unwrap(), RangeBound::Time(Rational::new(1, 2)));
        assert_eq!(parse(".25").unwrap(), RangeBound::Time(Rational::new(1, 4)));
        assert_eq!(parse("21/2").unwrap(), RangeBound::Time(Rational::new(21, 2)));
    }

    #[test]
    fn clock_forms() {
        assert_eq!(parse("T00:00:10").unwrap(), RangeBound::Time(Rational::from_secs(10)));
        assert_eq!(parse("T01:30").unwrap(), RangeBound::Time(Rational::from_secs(90)));
        assert_eq!(
            parse("T01:00:00.250").unwrap(),
            RangeBound::Time(Rational::new(14401, 4))
        );
    }

    #[test]
    fn duration_forms() {
        assert_eq!(parse("D10").unwrap(), RangeBound::Duration(Rational::from_secs(10)));
        assert_eq!(parse("DT00:01:00").unwrap(), RangeBound::Duration(Rational::from_secs(60)));
        assert_eq!(parse("d1/2").unwrap(), RangeBound::Duration(Rational::new(1, 2)));
    }

    #[test]
    fn frame_index_is_one_based() {
        assert_eq!(parse("F1").unwrap(), RangeBound::Frame(1));
        assert!(matches!(parse("F0"), Err(ParseError::Frame(_))));
        assert!(matches!(parse("Fx"), Err(ParseError::Frame(_))));
    }

    #[test]
    fn sizes_with_units() {
        assert_eq!(parse("S500").unwrap(), RangeBound::Size(500));
        assert_eq!(parse("S4k").unwrap(), RangeBound::Size(4000));
        assert_eq!(parse("S1.5M").unwrap(), RangeBound::Size(1_500_000));
        assert_eq!(parse("S1g").unwrap(), RangeBound::Size(1_000_000_000));
        assert!(matches!(parse("S0"), Err(ParseError::Size(_))));
    }

    #[test]
    fn sap_keywords() {
        assert_eq!(parse("SAP").unwrap(), RangeBound::Sap);
        assert_eq!(parse("rap").unwrap(), RangeBound::Sap);
    }

    #[test]
    fn utc_dates() {
        let expected = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        assert_eq!(parse("2024-05-01T10:00:00Z").unwrap(), RangeBound::Utc(expected));
        assert_eq!(parse("2024-05-01T12:00:00+02:00").unwrap(), RangeBound::Utc(expected));
        assert_eq!(parse("2024-05-01T10:00:00").unwrap(), RangeBound::Utc(expected));
        assert!(matches!(parse("2024-13-01T10:00:00Z"), Err(ParseError::Date(_))));
    }

    #[test]
    fn malformed_inputs() {
        assert_eq!(parse("  "), Err(ParseError::Empty));
        assert!(matches!(parse("abc"), Err(ParseError::Time(_))));
        assert!(matches!(parse("-5"), Err(ParseError::Time(_))));
        assert!(matches!(parse("1/0"), Err(ParseError::Time(_))));
        assert!(matches!(parse("T1:2:3:4"), Err(ParseError::Clock(_))));
        assert!(matches!(parse("T:30"), Err(ParseError::Clock(_))));
    }

    #[test]
    fn parse_is_idempotent_through_display() {
        for input in ["T00:00:10.5", "D3", "F12", "S2k", "SAP", "7/3", "2024-05-01T10:00:00.5Z"] {
            let first = parse(input).unwrap();
            let again = parse(&first.to_string()).unwrap();
            assert_eq!(first, again, "{input}");
            assert_eq!(parse(input).unwrap(), first);
        }
    }
}
