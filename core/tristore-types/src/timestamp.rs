//! Millisecond timestamps used for record modification times and watermarks.
//!
//! Remote stores report modification times as RFC 3339 strings with varying
//! precision. Everything is normalized to milliseconds since the Unix epoch
//! so that comparisons across stores are exact integer comparisons.

use crate::{Error, Result};
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// A point in time with millisecond precision.
///
/// `Timestamp::BEGINNING` (the Unix epoch) is the "never synced" sentinel:
/// a watermark at the beginning selects every record a store holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// The "beginning of time" sentinel.
    pub const BEGINNING: Self = Self(0);

    /// Creates a timestamp at the current wall-clock time.
    #[must_use]
    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self(millis)
    }

    /// Creates a timestamp from milliseconds since the Unix epoch.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Returns milliseconds since the Unix epoch.
    #[must_use]
    pub const fn as_millis(&self) -> u64 {
        self.0
    }

    /// Returns true for the "never synced" sentinel.
    #[must_use]
    pub const fn is_beginning(&self) -> bool {
        self.0 == 0
    }

    /// Parses an RFC 3339 string (e.g. `2024-03-21T10:15:00.000Z`).
    pub fn parse_rfc3339(s: &str) -> Result<Self> {
        let dt = DateTime::parse_from_rfc3339(s.trim())
            .map_err(|e| Error::InvalidTimestamp(format!("{s}: {e}")))?;
        let millis = dt.timestamp_millis();
        if millis < 0 {
            return Err(Error::InvalidTimestamp(format!("{s}: before Unix epoch")));
        }
        Ok(Self(millis as u64))
    }

    /// Formats as RFC 3339 in UTC with millisecond precision.
    #[must_use]
    pub fn to_rfc3339(&self) -> String {
        self.to_datetime()
            .to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    /// Converts to a `chrono` UTC datetime.
    #[must_use]
    pub fn to_datetime(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.0 as i64)
            .single()
            .unwrap_or(DateTime::UNIX_EPOCH)
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Self::BEGINNING
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Self(dt.timestamp_millis().max(0) as u64)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_rfc3339())
    }
}
