//! The history store.
//!
//! One SQLite file holds every partition. A partition is registered in the
//! `partitions` table the first time something is added for its directory,
//! and its entries are rows of `entries` keyed by `(partition, key)`. The
//! table is clustered on that key, so walking one partition in key order is a
//! plain index scan in either direction.

use crate::codec;
use crate::entry::History;
use crate::error::{Result, StoreError};
use crate::options::StoreOptions;
use chrono::{DateTime, Utc};
use file_lock::{FileLock, FileOptions};
use parking_lot::Mutex;
use rusqlite::{
    Connection, OpenFlags, OptionalExtension, Transaction, TransactionBehavior, params,
};
use std::collections::HashSet;
use std::ffi::OsString;
use std::fmt;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS partitions (
        name TEXT PRIMARY KEY,
        created_at TEXT NOT NULL
    ) WITHOUT ROWID;

    CREATE TABLE IF NOT EXISTS entries (
        partition TEXT NOT NULL REFERENCES partitions(name),
        key TEXT NOT NULL,
        command BLOB NOT NULL,
        annotation BLOB,
        PRIMARY KEY (partition, key)
    ) WITHOUT ROWID;
";

/// Idle read connections kept per store.
const READER_POOL: usize = 4;

const LOCK_RETRY: Duration = Duration::from_millis(10);

/// Database files held open by an exclusive store in this process.
static OPEN_STORES: LazyLock<Mutex<HashSet<PathBuf>>> = LazyLock::new(Default::default);

/// Handle on an open history database.
///
/// Writes go through one connection, one transaction at a time. Reads check a
/// connection out of a small pool and see a WAL snapshot, so they neither wait
/// for writers nor for each other, and a scan handler may call back into the
/// store.
///
/// Clones share the same connections. The file is released by
/// [`Store::close`] or when the last clone is dropped, whichever comes first.
#[derive(Clone)]
pub struct Store {
    path: PathBuf,
    shared: Arc<Shared>,
}

struct Shared {
    writer: Mutex<Option<Connection>>,
    /// `None` once the store is closed.
    readers: Mutex<Option<Vec<Connection>>>,
    claim: Mutex<Option<Claim>>,
    busy_timeout: Duration,
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.path)
            .field("open", &self.is_open())
            .finish()
    }
}

/// Summary of one partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionInfo {
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub entries: u64,
}

impl Store {
    /// Open or create the database at `path` with default options.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path, &StoreOptions::default())
    }

    pub fn open_with(path: impl AsRef<Path>, options: &StoreOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let claim = match options.exclusive {
            true => Some(Claim::acquire(&path, options.busy_timeout)?),
            false => None,
        };

        let writer = Connection::open(&path).map_err(|err| StoreError::open(&path, err))?;
        init_db(&writer, options).map_err(|err| StoreError::open(&path, err))?;
        debug!("opened history store {}", path.display());

        Ok(Store {
            path,
            shared: Arc::new(Shared {
                writer: Mutex::new(Some(writer)),
                readers: Mutex::new(Some(Vec::new())),
                claim: Mutex::new(claim),
                busy_timeout: options.busy_timeout,
            }),
        })
    }

    /// Open the store, hand it to `f` and close it again whatever `f` returns.
    pub fn session<T, E>(
        path: impl AsRef<Path>,
        options: &StoreOptions,
        f: impl FnOnce(&Store) -> std::result::Result<T, E>,
    ) -> std::result::Result<T, E>
    where
        E: From<StoreError>,
    {
        let store = Store::open_with(path, options)?;
        let result = f(&store);
        let closed = store.close();
        let value = result?;
        closed?;
        Ok(value)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.shared.readers.lock().is_some()
    }

    /// Release the database file. Every later operation fails with
    /// [`StoreError::Closed`]; closing twice is a no-op.
    ///
    /// A read still running on another thread finishes on its own connection.
    pub fn close(&self) -> Result<()> {
        let Some(readers) = self.shared.readers.lock().take() else {
            return Ok(());
        };
        drop(readers);
        let closed = match self.shared.writer.lock().take() {
            Some(conn) => conn.close().map_err(|(_, err)| StoreError::open(&self.path, err)),
            None => Ok(()),
        };
        self.shared.claim.lock().take();
        closed?;
        debug!("closed history store {}", self.path.display());
        Ok(())
    }

    /// Run `f` inside one read transaction on a pooled connection.
    pub(crate) fn read<T>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.checkout()?;
        // dropping the transaction rolls it back, which is all a reader needs
        let result = conn
            .transaction_with_behavior(TransactionBehavior::Deferred)
            .map_err(StoreError::query("*"))
            .and_then(|tx| f(&tx));
        self.checkin(conn);
        result
    }

    fn checkout(&self) -> Result<Connection> {
        let pooled = match self.shared.readers.lock().as_mut() {
            Some(pool) => pool.pop(),
            None => return Err(StoreError::Closed),
        };
        match pooled {
            Some(conn) => Ok(conn),
            None => self.open_reader(),
        }
    }

    fn checkin(&self, conn: Connection) {
        if let Some(pool) = self.shared.readers.lock().as_mut()
            && pool.len() < READER_POOL
        {
            pool.push(conn);
        }
    }

    fn open_reader(&self) -> Result<Connection> {
        let flags = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn =
            Connection::open_with_flags(&self.path, flags).map_err(StoreError::query("*"))?;
        conn.busy_timeout(self.shared.busy_timeout).map_err(StoreError::query("*"))?;
        debug!("opened read connection on {}", self.path.display());
        Ok(conn)
    }

    /// Run `f` inside one write transaction, committing only if it succeeds.
    fn write<T>(
        &self,
        directory: &str,
        f: impl FnOnce(&Transaction<'_>) -> Result<T>,
    ) -> Result<T> {
        let mut guard = self.shared.writer.lock();
        let conn = guard.as_mut().ok_or(StoreError::Closed)?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(StoreError::write(directory))?;
        let value = f(&tx)?;
        tx.commit().map_err(StoreError::write(directory))?;
        Ok(value)
    }

    /// Record one command.
    ///
    /// The directory's partition is created if needed. An entry already stored
    /// under the same time key is replaced, annotation included.
    pub fn add(&self, history: &History) -> Result<()> {
        let directory = history.directory.as_str();
        if !codec::is_representable(&history.time) {
            return Err(StoreError::Write {
                directory: directory.to_string(),
                source: Box::new(codec::UnrepresentableTime { time: history.time }),
            });
        }
        let key = codec::encode(&history.time);
        let annotation = history
            .annotation
            .as_deref()
            .filter(|note| !note.is_empty())
            .map(str::as_bytes);

        self.write(directory, |tx| {
            let created = tx
                .execute(
                    "INSERT OR IGNORE INTO partitions (name, created_at) VALUES (?1, ?2)",
                    params![directory, codec::encode(&Utc::now())],
                )
                .map_err(StoreError::write(directory))?;
            if created > 0 {
                debug!("created partition {directory}");
            }

            let replaced = tx
                .query_row(
                    "SELECT 1 FROM entries WHERE partition = ?1 AND key = ?2",
                    params![directory, key],
                    |_| Ok(()),
                )
                .optional()
                .map_err(StoreError::write(directory))?
                .is_some();
            if replaced {
                warn!("overwriting history entry {key} in {directory}");
            }

            tx.execute(
                "INSERT OR REPLACE INTO entries (partition, key, command, annotation)
                 VALUES (?1, ?2, ?3, ?4)",
                params![directory, key, history.data.as_bytes(), annotation],
            )
            .map_err(StoreError::write(directory))?;
            Ok(())
        })
    }

    /// Fetch the entry stored under `key` in `directory`.
    ///
    /// A missing partition or key is [`StoreError::NotFound`]; a missing
    /// annotation is just `None`.
    pub fn get(&self, directory: &str, key: &str) -> Result<History> {
        self.read(|tx| {
            let not_found = || StoreError::NotFound {
                partition: directory.to_string(),
                key: key.to_string(),
            };
            let partition = Partition::lookup(tx, directory)?.ok_or_else(not_found)?;
            partition.get(key)?.ok_or_else(not_found)
        })
    }

    /// Call `handler` once per partition, in name order, inside a single read
    /// transaction. An error from `handler` stops the walk and is returned.
    pub fn for_each_partition(
        &self,
        mut handler: impl FnMut(&Partition<'_>) -> Result<()>,
    ) -> Result<()> {
        self.read(|tx| {
            for name in partition_names(tx)? {
                handler(&Partition { tx, name })?;
            }
            Ok(())
        })
    }

    pub fn partition_exists(&self, name: &str) -> Result<bool> {
        self.read(|tx| Ok(Partition::lookup(tx, name)?.is_some()))
    }

    /// Every partition with its creation time and entry count.
    pub fn partitions(&self) -> Result<Vec<PartitionInfo>> {
        self.read(|tx| {
            let mut stmt = tx
                .prepare(
                    "SELECT p.name, p.created_at, COUNT(e.key)
                     FROM partitions p LEFT JOIN entries e ON e.partition = p.name
                     GROUP BY p.name ORDER BY p.name",
                )
                .map_err(StoreError::query("*"))?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                })
                .map_err(StoreError::query("*"))?;

            let mut partitions = Vec::new();
            for row in rows {
                let (name, created_at, entries) = row.map_err(StoreError::query("*"))?;
                let created_at =
                    codec::decode(&created_at).map_err(|source| StoreError::MalformedKey {
                        partition: name.clone(),
                        source,
                    })?;
                partitions.push(PartitionInfo {
                    name,
                    created_at,
                    entries: entries as u64,
                });
            }
            Ok(partitions)
        })
    }
}

fn init_db(conn: &Connection, options: &StoreOptions) -> rusqlite::Result<()> {
    conn.busy_timeout(options.busy_timeout)?;
    conn.execute_batch(
        "
    PRAGMA journal_mode = WAL;
    PRAGMA synchronous = NORMAL;
    PRAGMA foreign_keys = ON;
",
    )?;
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

/// Exclusive use of one database file.
///
/// The path is registered in [`OPEN_STORES`] for stores in this process and
/// `<database>.lock` is locked for everyone else. Dropping the claim releases
/// both.
struct Claim {
    key: PathBuf,
    lock: Option<FileLock>,
}

impl Claim {
    fn acquire(path: &Path, timeout: Duration) -> Result<Self> {
        let key = std::path::absolute(path).map_err(|err| StoreError::open(path, err))?;
        if !OPEN_STORES.lock().insert(key.clone()) {
            return Err(StoreError::open(path, "already open in this process"));
        }
        let mut claim = Claim { key, lock: None };

        let lock_path = lock_path(path);
        let deadline = Instant::now() + timeout;
        loop {
            let options = FileOptions::new().write(true).create(true);
            match FileLock::lock(&lock_path, false, options) {
                Ok(lock) => {
                    claim.lock = Some(lock);
                    return Ok(claim);
                }
                Err(_) if Instant::now() < deadline => std::thread::sleep(LOCK_RETRY),
                Err(err) => {
                    debug!("{} is held elsewhere: {err}", lock_path.display());
                    return Err(StoreError::open(path, err));
                }
            }
        }
    }
}

impl Drop for Claim {
    fn drop(&mut self) {
        // unlock before another store in this process can claim the path
        self.lock.take();
        OPEN_STORES.lock().remove(&self.key);
    }
}

fn lock_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".lock");
    PathBuf::from(name)
}

fn partition_names(tx: &Transaction<'_>) -> Result<Vec<String>> {
    let mut stmt = tx
        .prepare_cached("SELECT name FROM partitions ORDER BY name")
        .map_err(StoreError::query("*"))?;
    let names = stmt
        .query_map([], |row| row.get(0))
        .map_err(StoreError::query("*"))?
        .collect::<rusqlite::Result<Vec<String>>>()
        .map_err(StoreError::query("*"))?;
    Ok(names)
}

/// One partition, valid for the transaction it was looked up in.
///
/// The scan methods are the cursor: they walk keys in order and stop as soon
/// as the visitor returns [`ControlFlow::Break`].
pub struct Partition<'tx> {
    tx: &'tx Transaction<'tx>,
    name: String,
}

impl<'tx> Partition<'tx> {
    /// `None` when nothing was ever added for `name`.
    pub(crate) fn lookup(tx: &'tx Transaction<'tx>, name: &str) -> Result<Option<Self>> {
        let found = tx
            .query_row(
                "SELECT 1 FROM partitions WHERE name = ?1",
                params![name],
                |_| Ok(()),
            )
            .optional()
            .map_err(StoreError::query(name))?;
        Ok(found.map(|_| Partition {
            tx,
            name: name.to_string(),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Decode a key of this partition.
    pub fn decode(&self, key: &str) -> Result<DateTime<Utc>> {
        codec::decode(key).map_err(|source| StoreError::MalformedKey {
            partition: self.name.clone(),
            source,
        })
    }

    pub fn get(&self, key: &str) -> Result<Option<History>> {
        let row = self
            .tx
            .query_row(
                "SELECT command, annotation FROM entries WHERE partition = ?1 AND key = ?2",
                params![self.name, key],
                |row| Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, Option<Vec<u8>>>(1)?)),
            )
            .optional()
            .map_err(StoreError::query(&self.name))?;
        match row {
            Some((command, annotation)) => {
                let time = self.decode(key)?;
                Ok(Some(History::from_row(
                    &self.name,
                    time,
                    &command,
                    annotation.as_deref(),
                )))
            }
            None => Ok(None),
        }
    }

    /// Visit entries with key >= `start` in ascending key order.
    pub fn scan_from(
        &self,
        start: &str,
        visitor: impl FnMut(Entry<'_>) -> Result<ControlFlow<()>>,
    ) -> Result<()> {
        self.scan(
            "SELECT key, command, annotation FROM entries
             WHERE partition = ?1 AND key >= ?2 ORDER BY key ASC",
            params![self.name, start],
            visitor,
        )
    }

    /// Visit every entry in descending key order, newest first.
    pub fn scan_rev(
        &self,
        visitor: impl FnMut(Entry<'_>) -> Result<ControlFlow<()>>,
    ) -> Result<()> {
        self.scan(
            "SELECT key, command, annotation FROM entries
             WHERE partition = ?1 ORDER BY key DESC",
            params![self.name],
            visitor,
        )
    }

    fn scan(
        &self,
        sql: &str,
        params: &[&dyn rusqlite::ToSql],
        mut visitor: impl FnMut(Entry<'_>) -> Result<ControlFlow<()>>,
    ) -> Result<()> {
        let to_query = || StoreError::query(&self.name);
        let mut stmt = self.tx.prepare_cached(sql).map_err(to_query())?;
        let mut rows = stmt.query(params).map_err(to_query())?;
        while let Some(row) = rows.next().map_err(to_query())? {
            let key = row.get_ref(0).and_then(|v| Ok(v.as_str()?)).map_err(to_query())?;
            let command = row.get_ref(1).and_then(|v| Ok(v.as_bytes()?)).map_err(to_query())?;
            let annotation = row
                .get_ref(2)
                .and_then(|v| Ok(v.as_bytes_or_null()?))
                .map_err(to_query())?;
            let entry = Entry {
                partition: &self.name,
                key,
                command,
                annotation,
            };
            if visitor(entry)?.is_break() {
                break;
            }
        }
        Ok(())
    }
}

/// A raw entry borrowed from a partition scan.
#[derive(Debug, Clone, Copy)]
pub struct Entry<'a> {
    pub partition: &'a str,
    pub key: &'a str,
    pub command: &'a [u8],
    pub annotation: Option<&'a [u8]>,
}

impl<'a> Entry<'a> {
    pub fn record(&self) -> crate::filter::Record<'a> {
        crate::filter::Record {
            partition: self.partition,
            key: self.key,
            value: self.command,
        }
    }

    /// Decode the key and copy the entry out.
    pub fn to_history(&self) -> Result<History> {
        let time = codec::decode(self.key).map_err(|source| StoreError::MalformedKey {
            partition: self.partition.to_string(),
            source,
        })?;
        Ok(History::from_row(
            self.partition,
            time,
            self.command,
            self.annotation,
        ))
    }
}
