//! Tests for the history store.

use super::*;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::time::Duration as StdDuration;
use tempfile::TempDir;

fn init() {
    let _ = tracing_subscriber::fmt::try_init();
}

fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
}

fn temp_store() -> anyhow::Result<(TempDir, Store)> {
    init();
    let dir = tempfile::tempdir()?;
    let store = Store::open(dir.path().join("history.db"))?;
    Ok((dir, store))
}

fn commands(histories: &[History]) -> Vec<&str> {
    histories.iter().map(|h| h.data.as_str()).collect()
}

#[test]
fn test_add_and_get() -> anyhow::Result<()> {
    let (_dir, store) = temp_store()?;
    let time = at(2020, 1, 1, 10, 0, 0);
    store.add(&History::new("make test", "/src", time).with_annotation("before release"))?;
    store.add(&History::new("make", "/src", time + Duration::seconds(1)))?;

    let found = store.get("/src", &codec::encode(&time))?;
    assert_eq!(found.data, "make test");
    assert_eq!(found.time, time);
    assert_eq!(found.directory, "/src");
    assert_eq!(found.annotation.as_deref(), Some("before release"));

    let plain = store.get("/src", &codec::encode(&(time + Duration::seconds(1))))?;
    assert_eq!(plain.data, "make");
    assert_eq!(plain.annotation, None);
    Ok(())
}

#[test]
fn test_get_missing() -> anyhow::Result<()> {
    let (_dir, store) = temp_store()?;
    let time = at(2020, 1, 1, 10, 0, 0);
    store.add(&History::new("ls", "/src", time))?;

    let missing_key = store.get("/src", &codec::encode(&(time + Duration::seconds(1))));
    assert!(matches!(missing_key, Err(ref err) if err.is_not_found()));

    let missing_partition = store.get("/nowhere", &codec::encode(&time));
    assert!(matches!(
        missing_partition,
        Err(StoreError::NotFound { ref partition, .. }) if partition == "/nowhere"
    ));
    Ok(())
}

#[test]
fn test_same_key_keeps_later_write() -> anyhow::Result<()> {
    let (_dir, store) = temp_store()?;
    let time = at(2020, 1, 1, 10, 0, 0);
    store.add(&History::new("first", "/tmp", time).with_annotation("old note"))?;
    store.add(&History::new("second", "/tmp", time))?;

    let mut seen = Vec::new();
    store.range("/tmp", time, time, |_, data| seen.push(data.to_vec()))?;
    assert_eq!(seen, vec![b"second".to_vec()]);

    let found = store.get("/tmp", &codec::encode(&time))?;
    assert_eq!(found.data, "second");
    assert_eq!(found.annotation, None);
    Ok(())
}

#[test]
fn test_sub_second_entries_do_not_collide() -> anyhow::Result<()> {
    let (_dir, store) = temp_store()?;
    let time = at(2020, 1, 1, 10, 0, 0);
    store.add(&History::new("git add .", "/tmp", time))?;
    store.add(&History::new("git commit", "/tmp", time + Duration::milliseconds(3)))?;

    let last = store.last("/tmp", 10, &[])?;
    assert_eq!(commands(&last), vec!["git commit", "git add ."]);
    Ok(())
}

#[test]
fn test_range_bounds_inclusive() -> anyhow::Result<()> {
    let (_dir, store) = temp_store()?;
    let base = at(2021, 5, 1, 12, 0, 0);
    for i in 0..5 {
        store.add(&History::new(format!("cmd{i}"), "/w", base + Duration::minutes(i)))?;
    }

    let mut seen = Vec::new();
    store.range(
        "/w",
        base + Duration::minutes(1),
        base + Duration::minutes(3),
        |time, data| seen.push((time, String::from_utf8_lossy(data).into_owned())),
    )?;
    assert_eq!(
        seen,
        vec![
            (base + Duration::minutes(1), "cmd1".to_string()),
            (base + Duration::minutes(2), "cmd2".to_string()),
            (base + Duration::minutes(3), "cmd3".to_string()),
        ]
    );

    let mut count = 0;
    store.range("/w", base + Duration::hours(1), base + Duration::hours(2), |_, _| {
        count += 1
    })?;
    assert_eq!(count, 0);
    Ok(())
}

#[test]
fn test_queries_on_missing_partition_are_empty() -> anyhow::Result<()> {
    let (_dir, store) = temp_store()?;
    let time = at(2020, 1, 1, 0, 0, 0);

    let mut count = 0;
    store.range("/missing", time, time + Duration::days(1), |_, _| count += 1)?;
    store.for_day("/missing", time, |_| count += 1)?;
    assert_eq!(count, 0);
    assert!(store.last("/missing", 5, &[])?.is_empty());
    assert!(store.all(&[])?.is_empty());
    assert!(!store.partition_exists("/missing")?);
    Ok(())
}

#[test]
fn test_for_day_stops_at_prefix() -> anyhow::Result<()> {
    let (_dir, store) = temp_store()?;
    store.add(&History::new("yesterday", "/d", at(2020, 1, 1, 23, 59, 59)))?;
    store.add(&History::new("early", "/d", at(2020, 1, 2, 0, 0, 0)))?;
    store.add(&History::new("late", "/d", at(2020, 1, 2, 23, 59, 59)))?;
    store.add(&History::new("tomorrow", "/d", at(2020, 1, 3, 0, 0, 0)))?;

    let mut seen = Vec::new();
    store.today("/d", at(2020, 1, 2, 13, 30, 0), |h| seen.push(h.data.clone()))?;
    assert_eq!(seen, vec!["early", "late"]);
    Ok(())
}

#[test]
fn test_all_partitions_for_day() -> anyhow::Result<()> {
    let (_dir, store) = temp_store()?;
    store.add(&History::new("ls", "/a", at(2020, 3, 1, 8, 0, 0)).with_annotation("morning"))?;
    store.add(&History::new("pwd", "/b", at(2020, 3, 1, 9, 0, 0)))?;
    store.add(&History::new("cd", "/b", at(2020, 3, 2, 9, 0, 0)))?;

    let mut seen = Vec::new();
    store.all_partitions_for_day(at(2020, 3, 1, 0, 0, 0), |h| {
        seen.push((h.directory.clone(), h.data.clone(), h.annotation.clone()))
    })?;
    seen.sort();
    assert_eq!(
        seen,
        vec![
            ("/a".to_string(), "ls".to_string(), Some("morning".to_string())),
            ("/b".to_string(), "pwd".to_string(), None),
        ]
    );
    Ok(())
}

#[test]
fn test_last_counts_only_accepted_entries() -> anyhow::Result<()> {
    let (_dir, store) = temp_store()?;
    let base = at(2022, 7, 1, 0, 0, 0);
    let cmds = ["echo one", "ls", "echo two", "ls -la", "pwd", "cd .."];
    for (i, cmd) in cmds.iter().enumerate() {
        store.add(&History::new(*cmd, "/x", base + Duration::minutes(i as i64)))?;
    }

    let echo = Pattern::new("^echo");
    let last = store.last("/x", 2, &[&echo])?;
    assert_eq!(commands(&last), vec!["echo two", "echo one"]);

    let last = store.last("/x", 10, &[&echo])?;
    assert_eq!(last.len(), 2);

    let last = store.last("/x", 3, &[])?;
    assert_eq!(commands(&last), vec!["cd ..", "pwd", "ls -la"]);
    assert!(last.iter().all(|h| h.directory == "/x"));

    assert!(store.last("/x", 0, &[])?.is_empty());
    Ok(())
}

#[test]
fn test_last_attaches_annotations() -> anyhow::Result<()> {
    let (_dir, store) = temp_store()?;
    let base = at(2022, 7, 1, 0, 0, 0);
    store.add(&History::new("cargo build", "/p", base).with_annotation("slow"))?;
    store.add(&History::new("cargo test", "/p", base + Duration::seconds(5)))?;

    let last = store.last("/p", 2, &[])?;
    assert_eq!(last[0].annotation, None);
    assert_eq!(last[1].annotation.as_deref(), Some("slow"));
    Ok(())
}

#[test]
fn test_all_with_filters() -> anyhow::Result<()> {
    let (_dir, store) = temp_store()?;
    let base = at(2020, 1, 1, 0, 0, 0);
    store.add(&History::new("echo a", "/a", base))?;
    store.add(&History::new("echo b", "/b", base + Duration::hours(1)))?;
    store.add(&History::new("ls", "/b", base + Duration::hours(2)))?;

    assert_eq!(store.all(&[])?.len(), 3);

    let in_b = InDirectory::new("/b");
    let echo = Contains::new("echo");
    assert_eq!(commands(&store.all(&[&in_b, &echo])?), vec!["echo b"]);

    let after_first = Since::new(&(base + Duration::minutes(1)));
    let before_last = Until::new(&(base + Duration::hours(1)));
    assert_eq!(
        commands(&store.all(&[&after_first, &before_last])?),
        vec!["echo b"]
    );

    let nothing = filter::from_fn(|_| false);
    assert!(store.all(&[&nothing])?.is_empty());
    Ok(())
}

#[test]
fn test_grep_requires_every_pattern() -> anyhow::Result<()> {
    let (_dir, store) = temp_store()?;
    let base = at(2020, 1, 1, 0, 0, 0);
    store.add(&History::new("git commit -m fix", "/r", base))?;
    store.add(&History::new("git push", "/r", base + Duration::seconds(1)))?;
    store.add(&History::new("commit.sh", "/s", base + Duration::seconds(2)))?;

    assert_eq!(store.grep(&["git"])?.len(), 2);
    assert_eq!(commands(&store.grep(&["git", "commit"])?), vec!["git commit -m fix"]);
    assert!(store.grep(&["git", "(broken"])?.is_empty());
    assert_eq!(store.grep::<&str>(&[])?.len(), 3);
    assert_eq!(commands(&store.search(&["commit."])?), vec!["commit.sh"]);
    Ok(())
}

#[test]
fn test_partitions_listing() -> anyhow::Result<()> {
    let (_dir, store) = temp_store()?;
    let base = at(2020, 1, 1, 0, 0, 0);
    store.add(&History::new("ls", "/b", base).with_annotation("note"))?;
    store.add(&History::new("ls", "/a", base))?;
    store.add(&History::new("pwd", "/a", base + Duration::seconds(1)))?;

    let partitions = store.partitions()?;
    let names: Vec<_> = partitions.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["/a", "/b"]);
    assert_eq!(partitions[0].entries, 2);
    assert_eq!(partitions[1].entries, 1);

    let mut visited = Vec::new();
    store.for_each_partition(|partition| {
        visited.push(partition.name().to_string());
        Ok(())
    })?;
    assert_eq!(visited, vec!["/a", "/b"]);
    Ok(())
}

#[test]
fn test_malformed_key_aborts_scan() -> anyhow::Result<()> {
    init();
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("history.db");
    let store = Store::open(&path)?;
    store.add(&History::new("ls", "/tmp", at(2020, 1, 1, 0, 0, 0)))?;
    store.close()?;

    {
        let conn = rusqlite::Connection::open(&path)?;
        conn.execute(
            "INSERT INTO entries (partition, key, command) VALUES ('/tmp', 'not-a-time', 'rm')",
            [],
        )?;
    }

    let store = Store::open(&path)?;
    let err = store.all(&[]).unwrap_err();
    assert!(matches!(
        err,
        StoreError::MalformedKey { ref partition, ref source } if partition == "/tmp" && source.key == "not-a-time"
    ));
    assert!(matches!(
        store.last("/tmp", 5, &[]),
        Err(StoreError::MalformedKey { .. })
    ));
    Ok(())
}

#[test]
fn test_unrepresentable_time_rejected() -> anyhow::Result<()> {
    let (_dir, store) = temp_store()?;
    let far = at(12000, 1, 1, 0, 0, 0);
    let err = store.add(&History::new("ls", "/tmp", far)).unwrap_err();
    assert!(matches!(err, StoreError::Write { ref directory, .. } if directory == "/tmp"));
    assert!(err.to_string().contains("cannot be stored as a time key"));
    assert!(!store.partition_exists("/tmp")?);
    Ok(())
}

#[test]
fn test_closed_store_fails_fast() -> anyhow::Result<()> {
    let (_dir, store) = temp_store()?;
    let time = at(2020, 1, 1, 0, 0, 0);
    store.add(&History::new("ls", "/tmp", time))?;
    assert!(store.is_open());

    store.close()?;
    assert!(!store.is_open());
    store.close()?;

    assert!(matches!(
        store.add(&History::new("ls", "/tmp", time)),
        Err(StoreError::Closed)
    ));
    assert!(matches!(store.all(&[]), Err(StoreError::Closed)));
    assert!(matches!(store.last("/tmp", 1, &[]), Err(StoreError::Closed)));
    assert!(matches!(
        store.range("/tmp", time, time, |_, _| {}),
        Err(StoreError::Closed)
    ));
    Ok(())
}

#[test]
fn test_reopen_keeps_history() -> anyhow::Result<()> {
    init();
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("history.db");
    let time = at(2020, 1, 1, 0, 0, 0);

    Store::session(&path, &StoreOptions::default(), |store| {
        store.add(&History::new("ls", "/tmp", time).with_annotation("kept"))
    })?;

    let found = Store::session(&path, &StoreOptions::default(), |store| {
        store.get("/tmp", &codec::encode(&time))
    })?;
    assert_eq!(found.data, "ls");
    assert_eq!(found.annotation.as_deref(), Some("kept"));
    Ok(())
}

#[test]
fn test_session_closes_on_error() -> anyhow::Result<()> {
    init();
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("history.db");

    let mut leaked = None;
    let result: Result<()> = Store::session(&path, &StoreOptions::default(), |store| {
        leaked = Some(store.clone());
        Err(StoreError::Closed)
    });
    assert!(result.is_err());
    assert!(!leaked.unwrap().is_open());

    // the lock is gone, so opening again works
    let store = Store::open(&path)?;
    assert!(store.is_open());
    Ok(())
}

#[test]
fn test_second_open_is_refused_while_locked() -> anyhow::Result<()> {
    init();
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("history.db");
    let options = StoreOptions::default().busy_timeout(StdDuration::from_millis(10));

    let store = Store::open_with(&path, &options)?;
    let second = Store::open_with(&path, &options);
    assert!(matches!(second, Err(StoreError::Open { .. })));

    store.close()?;
    let third = Store::open_with(&path, &options)?;
    assert!(third.is_open());
    Ok(())
}

#[test]
fn test_concurrent_readers() -> anyhow::Result<()> {
    let (_dir, store) = temp_store()?;
    let base = at(2020, 1, 1, 0, 0, 0);
    for i in 0..20 {
        store.add(&History::new(format!("cmd {i}"), "/tmp", base + Duration::seconds(i)))?;
    }

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let store = store.clone();
            std::thread::spawn(move || store.last("/tmp", 5, &[]).map(|h| h.len()))
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap()?, 5);
    }
    Ok(())
}

#[test]
fn test_range_bounds_beyond_key_years() -> anyhow::Result<()> {
    let (_dir, store) = temp_store()?;
    store.add(&History::new("ls", "/tmp", at(2020, 1, 1, 0, 0, 0)))?;
    let (min, max) = (DateTime::<Utc>::MIN_UTC, DateTime::<Utc>::MAX_UTC);

    let count = |from: DateTime<Utc>, to: DateTime<Utc>| -> anyhow::Result<usize> {
        let mut n = 0;
        store.range("/tmp", from, to, |_, _| n += 1)?;
        Ok(n)
    };
    assert_eq!(count(at(2000, 1, 1, 0, 0, 0), max)?, 1);
    assert_eq!(count(min, at(2030, 1, 1, 0, 0, 0))?, 1);
    assert_eq!(count(min, max)?, 1);
    assert_eq!(count(max, max)?, 0);
    assert_eq!(count(min, min)?, 0);

    assert_eq!(store.all(&[&Until::new(&max)])?.len(), 1);
    assert_eq!(store.all(&[&Since::new(&min)])?.len(), 1);
    assert!(store.all(&[&Since::new(&max)])?.is_empty());
    assert!(store.all(&[&Until::new(&min)])?.is_empty());
    Ok(())
}

#[test]
fn test_handlers_can_call_back_into_store() -> anyhow::Result<()> {
    let (_dir, store) = temp_store()?;
    let time = at(2020, 1, 1, 0, 0, 0);
    store.add(&History::new("ls", "/tmp", time))?;
    store.add(&History::new("pwd", "/src", time))?;

    let (tx, rx) = std::sync::mpsc::channel();
    let worker = store.clone();
    std::thread::spawn(move || {
        let result = (|| -> Result<(bool, usize, usize)> {
            let mut exists = false;
            let mut recent = 0;
            worker.range("/tmp", time, time, |_, _| {
                exists = worker.partition_exists("/tmp").unwrap_or(false);
                recent = worker.last("/tmp", 5, &[]).map(|h| h.len()).unwrap_or(0);
            })?;
            let mut found = 0;
            worker.for_each_partition(|partition| {
                worker.get(partition.name(), &codec::encode(&time))?;
                found += 1;
                Ok(())
            })?;
            Ok((exists, recent, found))
        })();
        let _ = tx.send(result);
    });

    let (exists, recent, found) = rx.recv_timeout(StdDuration::from_secs(5))??;
    assert!(exists);
    assert_eq!(recent, 1);
    assert_eq!(found, 2);
    Ok(())
}

#[test]
fn test_scan_sees_snapshot_while_handler_writes() -> anyhow::Result<()> {
    let (_dir, store) = temp_store()?;
    let day = at(2020, 1, 1, 0, 0, 0);
    store.add(&History::new("first", "/tmp", day))?;

    let mut seen = Vec::new();
    let mut step = 0;
    store.for_day("/tmp", day, |history| {
        seen.push(history.data.clone());
        step += 1;
        let next = History::new(format!("added {step}"), "/tmp", day + Duration::hours(step));
        store.add(&next).unwrap();
    })?;
    assert_eq!(seen, ["first"]);

    let mut after = Vec::new();
    store.for_day("/tmp", day, |history| after.push(history.data.clone()))?;
    assert_eq!(after, ["first", "added 1"]);
    Ok(())
}

#[test]
fn test_reads_finish_while_write_is_open() -> anyhow::Result<()> {
    let (dir, store) = temp_store()?;
    let time = at(2020, 1, 1, 0, 0, 0);
    store.add(&History::new("ls", "/tmp", time))?;

    let writer = rusqlite::Connection::open(dir.path().join("history.db"))?;
    writer.execute_batch("BEGIN IMMEDIATE")?;
    writer.execute(
        "INSERT INTO entries (partition, key, command) VALUES ('/tmp', ?1, 'pending')",
        [codec::encode(&(time + Duration::seconds(1)))],
    )?;

    let started = std::time::Instant::now();
    assert_eq!(commands(&store.last("/tmp", 5, &[])?), ["ls"]);
    assert_eq!(store.partitions()?[0].entries, 1);
    assert!(started.elapsed() < StdDuration::from_millis(500));

    writer.execute_batch("COMMIT")?;
    assert_eq!(commands(&store.last("/tmp", 5, &[])?), ["pending", "ls"]);
    Ok(())
}

#[test]
fn test_shared_open_without_exclusive() -> anyhow::Result<()> {
    init();
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("history.db");
    let options = StoreOptions::default().exclusive(false);

    let first = Store::open_with(&path, &options)?;
    let second = Store::open_with(&path, &options)?;
    first.add(&History::new("ls", "/tmp", at(2020, 1, 1, 0, 0, 0)))?;
    assert_eq!(second.dump()?.len(), 1);
    Ok(())
}
