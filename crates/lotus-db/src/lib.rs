//! # Lotus DB
//!
//! SQLite persistence for the studio CRM and its instructor roster. One
//! `CrmDb` owns a single connection behind a mutex; every public method
//! locks, runs its statements and releases before returning, so callers never
//! hold the lock across an `.await`.
//!
//! Timestamps are stored as RFC 3339 UTC strings with second precision, which
//! keeps lexical and chronological order identical for range queries.

mod analytics;
mod classes;
mod customers;
mod history;
mod instructors;
mod leads;
mod payroll;
mod qr_codes;
mod schema;
mod seed;
mod sequences;
mod templates;

pub use classes::ClassFilter;
pub use history::HistoryFilter;
pub use payroll::PayrollFilter;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use lotus_core::error::{LotusError, Result};
use rusqlite::Connection;
use rusqlite::types::Type;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

/// CRM database handle.
pub struct CrmDb {
    conn: Mutex<Connection>,
}

impl CrmDb {
    /// Open or create the database, run migrations and seed defaults.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && path != Path::new(":memory:") {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)
            .map_err(|e| LotusError::Database(format!("open {}: {e}", path.display())))?;

        // WAL only makes sense for file databases.
        if path != Path::new(":memory:") {
            conn.execute_batch("PRAGMA journal_mode=WAL;").ok();
        }
        Self::init(conn)
    }

    /// In-memory database, used by tests and dry runs.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys=ON;").map_err(db_err)?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        {
            let conn = db.conn()?;
            schema::migrate(&conn)?;
            seed::seed_defaults(&conn, Utc::now())?;
        }
        Ok(db)
    }

    pub(crate) fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| LotusError::Database(format!("Lock: {e}")))
    }
}

pub(crate) fn db_err(e: rusqlite::Error) -> LotusError {
    LotusError::Database(e.to_string())
}

pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Canonical timestamp encoding.
pub fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn conversion_err<E>(idx: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

pub(crate) fn col_ts(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let s: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| conversion_err(idx, e))
}

pub(crate) fn col_ts_opt(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let s: Option<String> = row.get(idx)?;
    s.map(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|d| d.with_timezone(&Utc))
            .map_err(|e| conversion_err(idx, e))
    })
    .transpose()
}

pub(crate) fn col_date_opt(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<NaiveDate>> {
    let s: Option<String> = row.get(idx)?;
    s.map(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").map_err(|e| conversion_err(idx, e)))
        .transpose()
}

pub(crate) fn col_enum<T>(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = LotusError>,
{
    let s: String = row.get(idx)?;
    s.parse().map_err(|e| conversion_err(idx, e))
}

pub(crate) fn col_enum_opt<T>(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Option<T>>
where
    T: FromStr<Err = LotusError>,
{
    let s: Option<String> = row.get(idx)?;
    s.map(|s| s.parse().map_err(|e| conversion_err(idx, e)))
        .transpose()
}

/// `%term%` for a LIKE with `\` as the escape character.
/// The term keeps its case; SQLite's LIKE folds ASCII letters only.
pub(crate) fn like_pattern(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len() + 2);
    escaped.push('%');
    for c in term.trim().chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

pub(crate) fn percentage(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}
