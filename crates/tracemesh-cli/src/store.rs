//! SQLite-backed store for default option tables, tests, and trace logs.
//!
//! Three tables:
//!
//! - `defaults` — one options default table (an opaque blob) per platform
//!   name.
//! - `tests` — one row per option combination to be traced, with a status
//!   lifecycle: pending → in-progress → success | failed.
//! - `trace_log` — the recorded entries of a successful test, six fields
//!   per access, returned in insertion order.
//!
//! 64-bit trace values are stored as SQLite integers through
//! two's-complement casts, so the full `u64` range round-trips.
use std::fmt;
use std::path::Path;

use rusqlite::Connection;
use tracemesh_core::{AccessKind, TraceEntry};

/// Lifecycle state of a test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestStatus {
    /// Created but not yet run.
    Pending,
    /// Currently being traced.
    InProgress,
    /// Traced successfully; trace rows exist.
    Success,
    /// Tracing failed; the test is skipped by `build`.
    Failed,
}

impl TestStatus {
    /// Stable integer code stored in the database.
    pub fn code(self) -> i64 {
        match self {
            TestStatus::Pending => 0,
            TestStatus::InProgress => 1,
            TestStatus::Success => 2,
            TestStatus::Failed => 3,
        }
    }
}

/// Errors from the persistence layer.
#[derive(Debug)]
pub enum StoreError {
    /// An underlying SQLite failure.
    Sqlite(rusqlite::Error),
    /// No default config is stored under the given platform name.
    UnknownPlatform(String),
    /// No test exists with the given id.
    UnknownTest(i64),
    /// A stored row does not decode into a trace entry.
    CorruptRow {
        /// What failed to decode.
        detail: String,
    },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Sqlite(e) => write!(f, "{e}"),
            StoreError::UnknownPlatform(name) => {
                write!(f, "no default config stored for platform {name:?}")
            }
            StoreError::UnknownTest(id) => write!(f, "no test with id {id}"),
            StoreError::CorruptRow { detail } => write!(f, "corrupt trace row: {detail}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Sqlite(e)
    }
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS defaults (
    platform_name TEXT PRIMARY KEY,
    size          INTEGER NOT NULL,
    config_blob   BLOB NOT NULL
);
CREATE TABLE IF NOT EXISTS tests (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    status      INTEGER NOT NULL DEFAULT 0,
    ts_added    TEXT NOT NULL DEFAULT (datetime('now')),
    ts_started  TEXT,
    ts_finished TEXT,
    config      BLOB NOT NULL,
    platform    TEXT NOT NULL REFERENCES defaults(platform_name)
);
CREATE TABLE IF NOT EXISTS trace_log (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    kind        INTEGER NOT NULL,
    input       INTEGER NOT NULL,
    address     INTEGER NOT NULL,
    value       INTEGER NOT NULL,
    ip          INTEGER NOT NULL,
    access_size INTEGER NOT NULL,
    test_id     INTEGER NOT NULL REFERENCES tests(id)
);
";

/// Connection wrapper exposing the operations the CLI needs.
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Opens (and if necessary creates) the database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Sqlite`] when the file cannot be opened or the
    /// schema cannot be created.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Store { conn })
    }

    /// Stores (or replaces) a default config blob under a platform name.
    pub fn set_default_config(&self, name: &str, blob: &[u8]) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO defaults (platform_name, size, config_blob) VALUES (?1, ?2, ?3)",
            rusqlite::params![name, blob.len() as i64, blob],
        )?;
        Ok(())
    }

    /// Fetches the default config blob for a platform name.
    pub fn default_config(&self, name: &str) -> Result<Vec<u8>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT config_blob FROM defaults WHERE platform_name = ?1")?;
        let mut rows = stmt.query([name])?;
        match rows.next()? {
            Some(row) => Ok(row.get(0)?),
            None => Err(StoreError::UnknownPlatform(name.to_owned())),
        }
    }

    /// Inserts a pending test with its patched config blob.
    pub fn insert_test(&self, platform: &str, config: &[u8]) -> Result<i64, StoreError> {
        self.conn.execute(
            "INSERT INTO tests (status, config, platform) VALUES (0, ?1, ?2)",
            rusqlite::params![config, platform],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// The oldest pending test, if any.
    pub fn next_pending_test(&self) -> Result<Option<i64>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM tests WHERE status = 0 ORDER BY ts_added ASC, id ASC LIMIT 1")?;
        let mut rows = stmt.query([])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    /// Advances a test's status, stamping the transition time.
    pub fn set_test_status(&self, id: i64, status: TestStatus) -> Result<(), StoreError> {
        let changed = match status {
            TestStatus::InProgress => self.conn.execute(
                "UPDATE tests SET status = ?1, ts_started = datetime('now') WHERE id = ?2",
                rusqlite::params![status.code(), id],
            )?,
            TestStatus::Success | TestStatus::Failed => self.conn.execute(
                "UPDATE tests SET status = ?1, ts_finished = datetime('now') WHERE id = ?2",
                rusqlite::params![status.code(), id],
            )?,
            TestStatus::Pending => self.conn.execute(
                "UPDATE tests SET status = ?1 WHERE id = ?2",
                rusqlite::params![status.code(), id],
            )?,
        };
        if changed == 0 {
            return Err(StoreError::UnknownTest(id));
        }
        Ok(())
    }

    /// The patched config blob of a test.
    pub fn test_config(&self, id: i64) -> Result<Vec<u8>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT config FROM tests WHERE id = ?1")?;
        let mut rows = stmt.query([id])?;
        match rows.next()? {
            Some(row) => Ok(row.get(0)?),
            None => Err(StoreError::UnknownTest(id)),
        }
    }

    /// Ids of all successfully traced tests, oldest first.
    pub fn successful_test_ids(&self) -> Result<Vec<i64>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM tests WHERE status = 2 ORDER BY id ASC")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        let mut ids = Vec::new();
        for id in rows {
            ids.push(id?);
        }
        Ok(ids)
    }

    /// Appends a test's trace entries, preserving their order.
    pub fn write_trace(&mut self, test_id: i64, entries: &[TraceEntry]) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO trace_log (kind, input, address, value, ip, access_size, test_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for e in entries {
                stmt.execute(rusqlite::params![
                    i64::from(e.kind.code()),
                    e.is_read,
                    e.address as i64,
                    e.value as i64,
                    e.ip as i64,
                    i64::from(e.access_size),
                    test_id,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Loads a test's trace entries in insertion order.
    pub fn trace_entries(&self, test_id: i64) -> Result<Vec<TraceEntry>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT kind, input, address, value, ip, access_size
             FROM trace_log WHERE test_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map([test_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, bool>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, i64>(5)?,
            ))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (kind, is_read, address, value, ip, access_size) = row?;
            let kind = u8::try_from(kind)
                .ok()
                .and_then(AccessKind::from_code)
                .ok_or_else(|| StoreError::CorruptRow {
                    detail: format!("unknown access kind code {kind}"),
                })?;
            entries.push(TraceEntry {
                ip: ip as u64,
                kind,
                is_read,
                address: address as u64,
                value: value as u64,
                access_size: access_size as u32,
            });
        }
        Ok(entries)
    }
}
