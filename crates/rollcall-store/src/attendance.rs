//! Attendance persistence.
//!
//! The `UNIQUE (identity, attendance_date)` constraint is what guarantees one
//! record per person per day; `is_marked` is only an early exit.

use chrono::{DateTime, NaiveDate, Utc};
use rollcall_core::Identity;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;

const DATE_FORMAT: &str = "%Y-%m-%d";
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("could not create database directory {path}: {source}")]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("database connection lock poisoned")]
    LockPoisoned,
    #[error("corrupt attendance row {id}: {reason}")]
    Corrupt { id: i64, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    Present,
    Absent,
    Leave,
}

impl AttendanceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Present => "present",
            Self::Absent => "absent",
            Self::Leave => "leave",
        }
    }
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttendanceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "present" => Ok(Self::Present),
            "absent" => Ok(Self::Absent),
            "leave" => Ok(Self::Leave),
            other => Err(format!("unknown status {other:?}")),
        }
    }
}

/// A persisted attendance row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub id: i64,
    pub identity: Identity,
    pub date: NaiveDate,
    pub status: AttendanceStatus,
    pub remarks: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// A row to insert.
#[derive(Debug, Clone, Copy)]
pub struct NewAttendance<'a> {
    pub identity: &'a Identity,
    pub date: NaiveDate,
    pub status: AttendanceStatus,
    pub remarks: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    Inserted(AttendanceRecord),
    /// A row for the same (identity, date) already exists; nothing was written.
    Duplicate,
}

/// Durable attendance storage with a per-(identity, date) uniqueness guarantee.
pub trait AttendanceStore: Send + Sync {
    fn is_marked(&self, identity: &Identity, date: NaiveDate) -> Result<bool, StoreError>;

    /// Insert unless a row for `(identity, date)` exists. Must be race-free.
    fn insert(&self, record: NewAttendance<'_>) -> Result<InsertOutcome, StoreError>;

    /// Rows with `from <= date <= to` (bounds optional), newest first.
    fn records(
        &self,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<AttendanceRecord>, StoreError>;
}

/// SQLite-backed [`AttendanceStore`].
pub struct SqliteAttendanceStore {
    conn: Mutex<Connection>,
}

impl SqliteAttendanceStore {
    /// Open (creating if needed) the database at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::CreateDir {
                path: parent.display().to_string(),
                source,
            })?;
        }
        let conn = Connection::open(path)?;
        // journal_mode reports the resulting mode as a row.
        let mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        conn.execute_batch("PRAGMA synchronous=NORMAL;")?;
        tracing::debug!(path = %path.display(), journal_mode = %mode, "opened attendance database");
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS attendance (
                attendance_id INTEGER PRIMARY KEY AUTOINCREMENT,
                identity TEXT NOT NULL,
                attendance_date TEXT NOT NULL,
                status TEXT NOT NULL CHECK (status IN ('present', 'absent', 'leave')),
                remarks TEXT,
                recorded_at TEXT NOT NULL,
                UNIQUE (identity, attendance_date)
            );
            CREATE INDEX IF NOT EXISTS idx_attendance_date ON attendance(attendance_date);
            ",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    fn row_to_record(row: &Row) -> rusqlite::Result<RawRecord> {
        Ok(RawRecord {
            id: row.get(0)?,
            identity: row.get(1)?,
            date: row.get(2)?,
            status: row.get(3)?,
            remarks: row.get(4)?,
            recorded_at: row.get(5)?,
        })
    }
}

/// Row as stored, before validation.
struct RawRecord {
    id: i64,
    identity: String,
    date: String,
    status: String,
    remarks: Option<String>,
    recorded_at: String,
}

impl RawRecord {
    fn into_record(self) -> Result<AttendanceRecord, StoreError> {
        let id = self.id;
        let corrupt = |reason: String| StoreError::Corrupt { id, reason };
        Ok(AttendanceRecord {
            id,
            identity: Identity::new(self.identity).map_err(|e| corrupt(e.to_string()))?,
            date: NaiveDate::parse_from_str(&self.date, DATE_FORMAT)
                .map_err(|e| corrupt(format!("date: {e}")))?,
            status: self.status.parse().map_err(corrupt)?,
            remarks: self.remarks,
            recorded_at: DateTime::parse_from_rfc3339(&self.recorded_at)
                .map_err(|e| corrupt(format!("recorded_at: {e}")))?
                .with_timezone(&Utc),
        })
    }
}

const SELECT_COLUMNS: &str =
    "SELECT attendance_id, identity, attendance_date, status, remarks, recorded_at FROM attendance";

impl AttendanceStore for SqliteAttendanceStore {
    fn is_marked(&self, identity: &Identity, date: NaiveDate) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let found: Option<i64> = conn
            .query_row(
                "SELECT attendance_id FROM attendance WHERE identity = ?1 AND attendance_date = ?2",
                params![identity.as_str(), date.format(DATE_FORMAT).to_string()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn insert(&self, record: NewAttendance<'_>) -> Result<InsertOutcome, StoreError> {
        let conn = self.conn()?;
        let recorded_at = Utc::now();
        let changed = conn.execute(
            "INSERT INTO attendance (identity, attendance_date, status, remarks, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(identity, attendance_date) DO NOTHING",
            params![
                record.identity.as_str(),
                record.date.format(DATE_FORMAT).to_string(),
                record.status.as_str(),
                record.remarks,
                recorded_at.to_rfc3339(),
            ],
        )?;
        if changed == 0 {
            return Ok(InsertOutcome::Duplicate);
        }

        Ok(InsertOutcome::Inserted(AttendanceRecord {
            id: conn.last_insert_rowid(),
            identity: record.identity.clone(),
            date: record.date,
            status: record.status,
            remarks: record.remarks.map(str::to_owned),
            recorded_at,
        }))
    }

    fn records(
        &self,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<AttendanceRecord>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "{SELECT_COLUMNS}
             WHERE (?1 IS NULL OR attendance_date >= ?1)
               AND (?2 IS NULL OR attendance_date <= ?2)
             ORDER BY attendance_date DESC, recorded_at DESC, attendance_id DESC"
        ))?;
        let from = from.map(|d| d.format(DATE_FORMAT).to_string());
        let to = to.map(|d| d.format(DATE_FORMAT).to_string());
        let raw = stmt
            .query_map(params![from, to], Self::row_to_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        raw.into_iter().map(RawRecord::into_record).collect()
    }
}
