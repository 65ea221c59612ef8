//! Queries over the history store.
//!
//! Each method runs inside a single read transaction. Queries against a
//! directory that has no partition yet return nothing instead of failing.

use crate::codec;
use crate::db::{Partition, Store};
use crate::entry::History;
use crate::error::Result;
use crate::filter::{self, Filter, Pattern};
use chrono::{DateTime, Utc};
use std::ops::ControlFlow;
use tracing::debug;

impl Store {
    /// Call `handler` for every entry of `directory` with `min <= time <= max`,
    /// in ascending time order.
    ///
    /// Bounds outside the years a key can hold are clamped to the key space.
    pub fn range(
        &self,
        directory: &str,
        min: DateTime<Utc>,
        max: DateTime<Utc>,
        mut handler: impl FnMut(DateTime<Utc>, &[u8]),
    ) -> Result<()> {
        let bounds = codec::lower_bound(&min).zip(codec::upper_bound(&max));
        self.read(|tx| {
            let Some((from, to)) = &bounds else {
                return Ok(());
            };
            let Some(partition) = Partition::lookup(tx, directory)? else {
                debug!("range: no partition {directory}");
                return Ok(());
            };
            partition.scan_from(from, |entry| {
                if entry.key > to.as_str() {
                    return Ok(ControlFlow::Break(()));
                }
                handler(partition.decode(entry.key)?, entry.command);
                Ok(ControlFlow::Continue(()))
            })
        })
    }

    /// Call `handler` for every entry of `directory` recorded on the UTC day
    /// of `day`, in ascending time order.
    pub fn for_day(
        &self,
        directory: &str,
        day: DateTime<Utc>,
        mut handler: impl FnMut(&History),
    ) -> Result<()> {
        let prefix = codec::day_prefix(&day);
        self.read(|tx| match Partition::lookup(tx, directory)? {
            Some(partition) => scan_day(&partition, &prefix, &mut handler),
            None => Ok(()),
        })
    }

    /// Entries of `directory` for the day containing `as_of`.
    pub fn today(
        &self,
        directory: &str,
        as_of: DateTime<Utc>,
        handler: impl FnMut(&History),
    ) -> Result<()> {
        self.for_day(directory, as_of, handler)
    }

    /// [`Store::for_day`] across every partition. Entries arrive grouped by
    /// partition, not merged by time.
    pub fn all_partitions_for_day(
        &self,
        day: DateTime<Utc>,
        mut handler: impl FnMut(&History),
    ) -> Result<()> {
        let prefix = codec::day_prefix(&day);
        self.for_each_partition(|partition| scan_day(partition, &prefix, &mut handler))
    }

    /// Every entry accepted by all of `filters`.
    ///
    /// Results are grouped by partition and ascending within each one; there
    /// is no ordering across partitions. A key that does not decode aborts the
    /// whole scan.
    pub fn all(&self, filters: &[&dyn Filter]) -> Result<Vec<History>> {
        let mut histories = Vec::new();
        self.for_each_partition(|partition| {
            partition.scan_from("", |entry| {
                let time = partition.decode(entry.key)?;
                if filter::matches_all(filters, &entry.record()) {
                    histories.push(History::from_row(
                        entry.partition,
                        time,
                        entry.command,
                        entry.annotation,
                    ));
                }
                Ok(ControlFlow::Continue(()))
            })
        })?;
        debug!("all: {} entries matched", histories.len());
        Ok(histories)
    }

    /// Up to `n` most recent entries of `directory` accepted by all of
    /// `filters`, newest first.
    ///
    /// Only accepted entries count towards `n`.
    pub fn last(
        &self,
        directory: &str,
        n: usize,
        filters: &[&dyn Filter],
    ) -> Result<Vec<History>> {
        let mut histories = Vec::with_capacity(n.min(1024));
        if n == 0 {
            return Ok(histories);
        }
        self.read(|tx| {
            let Some(partition) = Partition::lookup(tx, directory)? else {
                debug!("last: no partition {directory}");
                return Ok(());
            };
            partition.scan_rev(|entry| {
                let time = partition.decode(entry.key)?;
                if filter::matches_all(filters, &entry.record()) {
                    histories.push(History::from_row(
                        entry.partition,
                        time,
                        entry.command,
                        entry.annotation,
                    ));
                    if histories.len() == n {
                        return Ok(ControlFlow::Break(()));
                    }
                }
                Ok(ControlFlow::Continue(()))
            })
        })?;
        Ok(histories)
    }

    /// Entries whose command matches every regular expression in `patterns`.
    ///
    /// An invalid pattern matches nothing, so it empties the result rather
    /// than failing the search.
    pub fn grep<S: AsRef<str>>(&self, patterns: &[S]) -> Result<Vec<History>> {
        let patterns: Vec<Pattern> = patterns.iter().map(|p| Pattern::new(p.as_ref())).collect();
        let filters: Vec<&dyn Filter> = patterns.iter().map(|p| p as &dyn Filter).collect();
        self.all(&filters)
    }

    /// Entries whose command contains every one of `needles` literally.
    pub fn search<S: AsRef<str>>(&self, needles: &[S]) -> Result<Vec<History>> {
        let needles: Vec<filter::Contains> = needles
            .iter()
            .map(|n| filter::Contains::new(n.as_ref()))
            .collect();
        let filters: Vec<&dyn Filter> = needles.iter().map(|n| n as &dyn Filter).collect();
        self.all(&filters)
    }

    /// Every stored entry.
    pub fn dump(&self) -> Result<Vec<History>> {
        self.all(&[])
    }
}

/// Walk the entries of one partition whose key starts with `prefix`.
///
/// Keys are sorted, so the first key past the prefix ends the scan.
fn scan_day(
    partition: &Partition<'_>,
    prefix: &str,
    handler: &mut impl FnMut(&History),
) -> Result<()> {
    partition.scan_from(prefix, |entry| {
        if !entry.key.starts_with(prefix) {
            return Ok(ControlFlow::Break(()));
        }
        handler(&entry.to_history()?);
        Ok(ControlFlow::Continue(()))
    })
}
