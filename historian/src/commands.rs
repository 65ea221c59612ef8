use crate::line;
use anyhow::{Context as _, Result};
use chrono::{DateTime, Utc};
use historian_store::{Filter, History, Pattern, Store};
use std::io::Write;
use tracing::debug;

/// Record the output of `history 1` for `directory`.
pub fn insert(
    store: &Store,
    input: &str,
    directory: &str,
    annotation: Option<&str>,
    now: DateTime<Utc>,
) -> Result<History> {
    let parsed = line::parse(input)?;
    let mut history = History::new(parsed.command, directory, now).with_id(parsed.id);
    if let Some(note) = annotation {
        history = history.with_annotation(note);
    }
    store
        .add(&history)
        .with_context(|| format!("failed to record {:?}", history.data))?;
    debug!("recorded #{} in {directory}", parsed.id);
    Ok(history)
}

pub fn last(
    store: &Store,
    directory: &str,
    count: usize,
    patterns: &[String],
    out: &mut impl Write,
) -> Result<()> {
    let patterns: Vec<Pattern> = patterns.iter().map(|p| Pattern::new(p)).collect();
    let filters: Vec<&dyn Filter> = patterns.iter().map(|p| p as &dyn Filter).collect();
    for history in store.last(directory, count, &filters)? {
        writeln!(out, "{history}")?;
    }
    Ok(())
}

pub fn search(store: &Store, patterns: &[String], out: &mut impl Write) -> Result<()> {
    for history in store.grep(patterns)? {
        writeln!(out, "{history}")?;
    }
    Ok(())
}

/// Entries of the UTC day containing `now` across every directory, oldest first.
pub fn today(store: &Store, now: DateTime<Utc>, out: &mut impl Write) -> Result<()> {
    let mut histories = Vec::new();
    store.all_partitions_for_day(now, |history| histories.push(history.clone()))?;
    histories.sort_by(|a, b| a.time.cmp(&b.time));
    for history in histories {
        writeln!(
            out,
            "[{}] {} {}",
            history.time.to_rfc3339(),
            history.directory,
            history.data
        )?;
    }
    Ok(())
}

pub fn range(
    store: &Store,
    directory: &str,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    out: &mut impl Write,
) -> Result<()> {
    let mut lines = Vec::new();
    store.range(directory, from, to, |time, data| {
        lines.push(format!(
            "[{}] {}",
            time.to_rfc3339(),
            String::from_utf8_lossy(data)
        ))
    })?;
    for line in lines {
        writeln!(out, "{line}")?;
    }
    Ok(())
}

pub fn dump(store: &Store, out: &mut impl Write) -> Result<()> {
    for history in store.dump()? {
        writeln!(out, "{history}")?;
    }
    Ok(())
}

pub fn partitions(store: &Store, out: &mut impl Write) -> Result<()> {
    for partition in store.partitions()? {
        writeln!(
            out,
            "{}\t{}\t{}",
            partition.entries,
            partition.created_at.to_rfc3339(),
            partition.name
        )?;
    }
    Ok(())
}

pub fn parse_time(input: &str) -> Result<DateTime<Utc>> {
    let time = DateTime::parse_from_rfc3339(input)
        .with_context(|| format!("expected an RFC 3339 timestamp, got {input:?}"))?;
    Ok(time.with_timezone(&Utc))
}
