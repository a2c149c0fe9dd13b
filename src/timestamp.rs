use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset, Local, Utc};
use serde::Deserialize;

/// A Slack message timestamp (`"1712345678.000200"`), ordered numerically.
///
/// Slack uses these strings as message ids. Comparing them as strings breaks
/// as soon as two ids have different lengths, so the integer seconds and the
/// fractional digits are kept apart and compared as numbers.
#[derive(Debug, Clone)]
pub struct SlackTs {
    raw: String,
    instant: DateTime<Utc>,
    seconds: i64,
    /// Fractional digits with trailing zeros removed. Digit strings without
    /// trailing zeros order lexicographically the same way they order
    /// numerically, whatever their length.
    fraction: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed timestamp {raw:?}")]
pub struct MalformedTimestamp {
    pub raw: String,
}

impl SlackTs {
    pub fn parse(raw: &str) -> Result<Self, MalformedTimestamp> {
        let malformed = || MalformedTimestamp {
            raw: raw.to_string(),
        };

        let (whole, fraction) = match raw.split_once('.') {
            Some((whole, fraction)) => (whole, Some(fraction)),
            None => (raw, None),
        };

        if !is_digits(whole) {
            return Err(malformed());
        }
        if let Some(fraction) = fraction {
            if !is_digits(fraction) {
                return Err(malformed());
            }
        }

        let seconds: i64 = whole.parse().map_err(|_| malformed())?;
        // Out-of-range seconds are rejected here so clock rendering never fails.
        let instant = DateTime::from_timestamp(seconds, 0).ok_or_else(malformed)?;

        Ok(Self {
            raw: raw.to_string(),
            instant,
            seconds,
            fraction: fraction
                .unwrap_or_default()
                .trim_end_matches('0')
                .to_string(),
        })
    }

    /// The lower bound used before anything has been observed.
    pub fn epoch() -> Self {
        Self {
            raw: "0".to_string(),
            instant: DateTime::<Utc>::default(),
            seconds: 0,
            fraction: String::new(),
        }
    }

    /// The original string, as the Slack API expects it back.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    #[cfg(test)]
    pub fn seconds(&self) -> i64 {
        self.seconds
    }

    /// Render as `HH:MM:SS` in the given zone.
    pub fn to_clock_time(&self, zone: &ClockZone) -> String {
        const CLOCK: &str = "%H:%M:%S";
        match zone {
            ClockZone::Local => self.instant.with_timezone(&Local).format(CLOCK).to_string(),
            ClockZone::Utc => self.instant.format(CLOCK).to_string(),
            ClockZone::Fixed(offset) => self.instant.with_timezone(offset).format(CLOCK).to_string(),
        }
    }
}

fn is_digits(value: &str) -> bool {
    !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit())
}

impl Ord for SlackTs {
    fn cmp(&self, other: &Self) -> Ordering {
        self.seconds
            .cmp(&other.seconds)
            .then_with(|| self.fraction.cmp(&other.fraction))
    }
}

impl PartialOrd for SlackTs {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for SlackTs {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SlackTs {}

impl fmt::Display for SlackTs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Zone used when rendering the sender's clock time.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum ClockZone {
    #[default]
    Local,
    Utc,
    Fixed(FixedOffset),
}

impl FromStr for ClockZone {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s.trim();
        match value.to_ascii_lowercase().as_str() {
            "local" => Ok(ClockZone::Local),
            "utc" | "z" => Ok(ClockZone::Utc),
            _ => value
                .parse::<FixedOffset>()
                .map(ClockZone::Fixed)
                .map_err(|e| format!("invalid timezone {value:?} ({e}); expected local, utc or +HH:MM")),
        }
    }
}

impl TryFrom<String> for ClockZone {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}
