//! Sortable time keys.
//!
//! Keys are UTC timestamps rendered as `YYYY-MM-DDTHH:MM:SS.nnnnnnnnnZ`. Every
//! field is fixed width, so byte-wise comparison of two keys gives the same
//! answer as comparing the timestamps, and the first [`DAY_PREFIX_LEN`] bytes
//! name the calendar day.

use chrono::{DateTime, Datelike, NaiveDateTime, Utc};
use std::fmt;

const KEY_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.9fZ";

/// Length in bytes of every encoded key.
pub const KEY_LEN: usize = 30;

/// Length of the `YYYY-MM-DD` prefix shared by all keys of one day.
pub const DAY_PREFIX_LEN: usize = 10;

/// The greatest key any representable timestamp encodes to.
pub const MAX_KEY: &str = "9999-12-31T23:59:59.999999999Z";

/// A key that is not a canonically encoded timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedKey {
    pub key: String,
}

impl fmt::Display for MalformedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malformed time key {:?}", self.key)
    }
}

impl std::error::Error for MalformedKey {}

/// A timestamp outside the years a key can hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnrepresentableTime {
    pub time: DateTime<Utc>,
}

impl fmt::Display for UnrepresentableTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timestamp {} cannot be stored as a time key", self.time)
    }
}

impl std::error::Error for UnrepresentableTime {}

/// Whether `time` can be encoded without breaking key ordering.
///
/// Only four digit years keep the fixed-width layout.
pub fn is_representable(time: &DateTime<Utc>) -> bool {
    (0..=9999).contains(&time.year())
}

/// Encode a timestamp as a sortable key.
pub fn encode(time: &DateTime<Utc>) -> String {
    time.format(KEY_FORMAT).to_string()
}

/// Decode a key produced by [`encode`].
pub fn decode(key: &str) -> Result<DateTime<Utc>, MalformedKey> {
    let malformed = || MalformedKey {
        key: key.to_string(),
    };
    if key.len() != KEY_LEN || !key.is_ascii() {
        return Err(malformed());
    }
    let naive = NaiveDateTime::parse_from_str(key, KEY_FORMAT).map_err(|_| malformed())?;
    let time = naive.and_utc();
    // reject anything chrono accepts but we would never have written
    if encode(&time) != key {
        return Err(malformed());
    }
    Ok(time)
}

/// Smallest key at or after `time`, for the inclusive lower end of a scan.
///
/// Times before year 0 start from the empty key. `None` means no key can be
/// that late.
pub fn lower_bound(time: &DateTime<Utc>) -> Option<String> {
    match time.year() {
        year if year < 0 => Some(String::new()),
        year if year > 9999 => None,
        _ => Some(encode(time)),
    }
}

/// Greatest key at or before `time`, for the inclusive upper end of a scan.
///
/// Times after year 9999 end at [`MAX_KEY`]. `None` means no key can be that
/// early.
pub fn upper_bound(time: &DateTime<Utc>) -> Option<String> {
    match time.year() {
        year if year < 0 => None,
        year if year > 9999 => Some(MAX_KEY.to_string()),
        _ => Some(encode(time)),
    }
}

/// The calendar-day prefix of `time`'s key, independent of time of day.
pub fn day_prefix(time: &DateTime<Utc>) -> String {
    let mut key = encode(time);
    key.truncate(DAY_PREFIX_LEN);
    key
}
