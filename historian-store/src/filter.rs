//! Predicates over stored records.
//!
//! A [`Filter`] looks at one `(partition, key, value)` record and decides
//! whether a scan keeps it. Scans take a slice of filters and keep a record
//! only when every filter accepts it.

use crate::codec;
use chrono::{DateTime, Utc};
use regex::Regex;

/// One stored record as seen by a scan.
#[derive(Debug, Clone, Copy)]
pub struct Record<'a> {
    /// Partition (directory) name.
    pub partition: &'a str,
    /// Encoded time key.
    pub key: &'a str,
    /// Raw command bytes.
    pub value: &'a [u8],
}

pub trait Filter {
    fn matches(&self, record: &Record<'_>) -> bool;
}

impl<F> Filter for F
where
    F: Fn(&Record<'_>) -> bool,
{
    fn matches(&self, record: &Record<'_>) -> bool {
        self(record)
    }
}

/// Logical AND of `filters`, stopping at the first rejection.
///
/// An empty slice accepts everything.
pub fn matches_all(filters: &[&dyn Filter], record: &Record<'_>) -> bool {
    filters.iter().all(|filter| filter.matches(record))
}

/// Build a filter from a closure.
pub fn from_fn<F>(f: F) -> F
where
    F: Fn(&Record<'_>) -> bool,
{
    f
}

/// Command text matches a regular expression.
///
/// A pattern that does not compile never matches.
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    regex: Option<Regex>,
}

impl Pattern {
    pub fn new(pattern: &str) -> Self {
        let regex = match Regex::new(pattern) {
            Ok(regex) => Some(regex),
            Err(err) => {
                tracing::warn!("invalid search pattern {pattern:?}: {err}");
                None
            }
        };
        Pattern {
            source: pattern.to_string(),
            regex,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn is_valid(&self) -> bool {
        self.regex.is_some()
    }
}

impl Filter for Pattern {
    fn matches(&self, record: &Record<'_>) -> bool {
        match &self.regex {
            Some(regex) => regex.is_match(&String::from_utf8_lossy(record.value)),
            None => false,
        }
    }
}

/// Command text contains a literal substring.
#[derive(Debug, Clone)]
pub struct Contains(pub String);

impl Contains {
    pub fn new(needle: impl Into<String>) -> Self {
        Contains(needle.into())
    }
}

impl Filter for Contains {
    fn matches(&self, record: &Record<'_>) -> bool {
        let needle = self.0.as_bytes();
        needle.is_empty() || record.value.windows(needle.len()).any(|w| w == needle)
    }
}

/// Record lives in the named partition.
#[derive(Debug, Clone)]
pub struct InDirectory(pub String);

impl InDirectory {
    pub fn new(directory: impl Into<String>) -> Self {
        InDirectory(directory.into())
    }
}

impl Filter for InDirectory {
    fn matches(&self, record: &Record<'_>) -> bool {
        record.partition == self.0
    }
}

/// Record was written at or after a point in time.
///
/// A time past the last representable key accepts nothing.
#[derive(Debug, Clone)]
pub struct Since(Option<String>);

impl Since {
    pub fn new(time: &DateTime<Utc>) -> Self {
        Since(codec::lower_bound(time))
    }
}

impl Filter for Since {
    fn matches(&self, record: &Record<'_>) -> bool {
        self.0.as_deref().is_some_and(|bound| record.key >= bound)
    }
}

/// Record was written at or before a point in time.
///
/// A time before the first representable key accepts nothing.
#[derive(Debug, Clone)]
pub struct Until(Option<String>);

impl Until {
    pub fn new(time: &DateTime<Utc>) -> Self {
        Until(codec::upper_bound(time))
    }
}

impl Filter for Until {
    fn matches(&self, record: &Record<'_>) -> bool {
        self.0.as_deref().is_some_and(|bound| record.key <= bound)
    }
}
