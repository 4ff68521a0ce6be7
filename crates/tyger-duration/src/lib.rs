//! Duration parsing and serde codecs for Tyger.
//!
//! Tyger durations use the `d.hh:mm:ss[.fff]` syntax (the same shape .NET's
//! `TimeSpan.Parse` accepts): an optional `d.` day prefix, then
//! `hh:mm:ss`, then an optional `.fff` fractional-seconds suffix.
//!
//! ```
//! use std::time::Duration;
//! use tyger_duration::parse_duration;
//!
//! assert_eq!(parse_duration("0.00:05:00").unwrap(), Duration::from_secs(5 * 60));
//! assert_eq!(
//!     parse_duration("2.12:30:30").unwrap(),
//!     Duration::from_secs(2 * 86400 + 12 * 3600 + 30 * 60 + 30)
//! );
//! ```

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DurationParseError {
    #[error("invalid duration syntax: {0:?}")]
    InvalidSyntax(String),
    #[error("duration component out of range in {0:?}: {1}")]
    OutOfRange(String, String),
}

/// Parse the `d.hh:mm:ss[.fff]` syntax. The day component (and its trailing
/// `.`) is optional; the fractional-seconds component (and its leading `.`)
/// is optional.
pub fn parse_duration(input: &str) -> Result<Duration, DurationParseError> {
    let original = input;
    let mut rest = input;

    // Split off an optional leading "d." day component. We scan for the
    // *first* '.' that precedes a "hh:mm:ss" pattern containing ':'; since
    // the fractional-seconds '.' comes after the last ':', splitting on the
    // first '.' that occurs before any ':' unambiguously finds the day
    // separator.
    let days: i64 = if let Some(colon_pos) = rest.find(':') {
        if let Some(dot_pos) = rest[..colon_pos].find('.') {
            let day_str = &rest[..dot_pos];
            let days = day_str
                .parse::<i64>()
                .map_err(|_| DurationParseError::InvalidSyntax(original.to_string()))?;
            rest = &rest[dot_pos + 1..];
            days
        } else {
            0
        }
    } else {
        return Err(DurationParseError::InvalidSyntax(original.to_string()));
    };

    // rest is now "hh:mm:ss[.fff]"
    let (hms, fractional_nanos) = match rest.find('.') {
        Some(dot_pos) => {
            let frac_str = &rest[dot_pos + 1..];
            if frac_str.is_empty() || !frac_str.bytes().all(|b| b.is_ascii_digit()) {
                return Err(DurationParseError::InvalidSyntax(original.to_string()));
            }
            let mut digits = frac_str.to_string();
            digits.truncate(9);
            while digits.len() < 9 {
                digits.push('0');
            }
            let nanos: u32 = digits
                .parse()
                .map_err(|_| DurationParseError::InvalidSyntax(original.to_string()))?;
            (&rest[..dot_pos], nanos)
        }
        None => (rest, 0),
    };

    let parts: Vec<&str> = hms.split(':').collect();
    if parts.len() != 3 {
        return Err(DurationParseError::InvalidSyntax(original.to_string()));
    }
    let hours: u64 = parts[0]
        .parse()
        .map_err(|_| DurationParseError::InvalidSyntax(original.to_string()))?;
    let minutes: u64 = parts[1]
        .parse()
        .map_err(|_| DurationParseError::InvalidSyntax(original.to_string()))?;
    let seconds: u64 = parts[2]
        .parse()
        .map_err(|_| DurationParseError::InvalidSyntax(original.to_string()))?;

    if minutes >= 60 {
        return Err(DurationParseError::OutOfRange(
            original.to_string(),
            "minutes must be < 60".to_string(),
        ));
    }
    if seconds >= 60 {
        return Err(DurationParseError::OutOfRange(
            original.to_string(),
            "seconds must be < 60".to_string(),
        ));
    }
    if days < 0 {
        return Err(DurationParseError::OutOfRange(
            original.to_string(),
            "days must be >= 0".to_string(),
        ));
    }

    let total_secs = (days as u64) * 86_400 + hours * 3_600 + minutes * 60 + seconds;
    Ok(Duration::new(total_secs, fractional_nanos))
}

/// Format a [`Duration`] back into `d.hh:mm:ss[.fff]` syntax. The day
/// component is always emitted (as `0` when there are no whole days), to
/// round-trip unambiguously.
pub fn format_duration(d: Duration) -> String {
    let total_secs = d.as_secs();
    let days = total_secs / 86_400;
    let hours = (total_secs % 86_400) / 3_600;
    let minutes = (total_secs % 3_600) / 60;
    let seconds = total_secs % 60;
    let nanos = d.subsec_nanos();

    if nanos == 0 {
        format!("{days}.{hours:02}:{minutes:02}:{seconds:02}")
    } else {
        let millis = nanos / 1_000_000;
        format!("{days}.{hours:02}:{minutes:02}:{seconds:02}.{millis:03}")
    }
}

/// A newtype wrapper so duration fields serialize to/from the `d.hh:mm:ss`
/// wire form by default, while still exposing the underlying [`Duration`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct TygerDuration(pub Duration);

impl From<Duration> for TygerDuration {
    fn from(d: Duration) -> Self {
        Self(d)
    }
}

impl From<TygerDuration> for Duration {
    fn from(d: TygerDuration) -> Self {
        d.0
    }
}

impl fmt::Display for TygerDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", format_duration(self.0))
    }
}

impl Serialize for TygerDuration {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format_duration(self.0))
    }
}

impl<'de> Deserialize<'de> for TygerDuration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s)
            .map(TygerDuration)
            .map_err(serde::de::Error::custom)
    }
}

/// Serde helpers for embedding a `Duration` field that should accept either
/// the `d.hh:mm:ss[.fff]` string form or a raw `u64` of milliseconds, and
/// always serialize back out as milliseconds. Mirrors the dual
/// string-or-millis form used throughout the rest of the persisted state.
pub mod millis {
    use super::*;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Helper {
            Text(String),
            Millis(u64),
        }

        match Helper::deserialize(deserializer)? {
            Helper::Text(s) => parse_duration(&s).map_err(serde::de::Error::custom),
            Helper::Millis(ms) => Ok(Duration::from_millis(ms)),
        }
    }

    /// The same string-or-millis form for an optional field (absent means
    /// `None`, not zero).
    pub mod option {
        use super::*;

        pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match duration {
                Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
        where
            D: Deserializer<'de>,
        {
            #[derive(Deserialize)]
            #[serde(untagged)]
            enum Helper {
                Text(String),
                Millis(u64),
            }

            match Option::<Helper>::deserialize(deserializer)? {
                Some(Helper::Text(s)) => parse_duration(&s).map(Some).map_err(serde::de::Error::custom),
                Some(Helper::Millis(ms)) => Ok(Some(Duration::from_millis(ms))),
                None => Ok(None),
            }
        }
    }
}
