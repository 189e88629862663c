//! Stored QR codes with scan counting.

use chrono::{DateTime, Utc};
use lotus_core::error::{LotusError, Result};
use lotus_core::types::QrCodeRecord;
use rusqlite::{Connection, OptionalExtension, params};

use crate::{CrmDb, col_ts, db_err, new_id, ts};

/// Longest redirect target a code may store.
const MAX_QR_URL_LEN: usize = 2048;

const QR_COLUMNS: &str = "id, name, url, description, scan_count, is_active, created_at, updated_at";

fn qr_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<QrCodeRecord> {
    Ok(QrCodeRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        url: row.get(2)?,
        description: row.get(3)?,
        scan_count: row.get(4)?,
        is_active: row.get(5)?,
        created_at: col_ts(row, 6)?,
        updated_at: col_ts(row, 7)?,
    })
}

/// Trimmed redirect target, or why it cannot be used as a `Location`.
fn check_target_url(url: &str) -> Result<&str> {
    let url = url.trim();
    if url.is_empty() {
        return Err(LotusError::Validation("qr code url is required".into()));
    }
    if url.len() > MAX_QR_URL_LEN {
        return Err(LotusError::Validation(format!(
            "qr code url is longer than {MAX_QR_URL_LEN} bytes"
        )));
    }
    if url.chars().any(char::is_control) {
        return Err(LotusError::Validation(
            "qr code url contains control characters".into(),
        ));
    }
    Ok(url)
}

fn get_qr_on(conn: &Connection, id: &str) -> Result<QrCodeRecord> {
    conn.query_row(
        &format!("SELECT {QR_COLUMNS} FROM qr_codes WHERE id = ?1"),
        [id],
        qr_from_row,
    )
    .optional()
    .map_err(db_err)?
    .ok_or_else(|| LotusError::NotFound(format!("qr code {id}")))
}

impl CrmDb {
    pub fn create_qr_code(
        &self,
        name: &str,
        url: &str,
        description: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<QrCodeRecord> {
        if name.trim().is_empty() {
            return Err(LotusError::Validation("qr code name is required".into()));
        }
        let url = check_target_url(url)?;
        let conn = self.conn()?;
        let id = new_id();
        conn.execute(
            "INSERT INTO qr_codes (id, name, url, description, scan_count, is_active, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 0, 1, ?5, ?5)",
            params![id, name.trim(), url, description, ts(now)],
        )
        .map_err(db_err)?;
        get_qr_on(&conn, &id)
    }

    pub fn list_qr_codes(&self) -> Result<Vec<QrCodeRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {QR_COLUMNS} FROM qr_codes ORDER BY created_at DESC, rowid DESC"
            ))
            .map_err(db_err)?;
        let rows = stmt.query_map([], qr_from_row).map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    pub fn get_qr_code(&self, id: &str) -> Result<QrCodeRecord> {
        let conn = self.conn()?;
        get_qr_on(&conn, id)
    }

    pub fn set_qr_active(&self, id: &str, active: bool, now: DateTime<Utc>) -> Result<QrCodeRecord> {
        let conn = self.conn()?;
        let changed = conn
            .execute(
                "UPDATE qr_codes SET is_active = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, active, ts(now)],
            )
            .map_err(db_err)?;
        if changed == 0 {
            return Err(LotusError::NotFound(format!("qr code {id}")));
        }
        get_qr_on(&conn, id)
    }

    pub fn delete_qr_code(&self, id: &str) -> Result<()> {
        let conn = self.conn()?;
        let changed = conn
            .execute("DELETE FROM qr_codes WHERE id = ?1", [id])
            .map_err(db_err)?;
        if changed == 0 {
            return Err(LotusError::NotFound(format!("qr code {id}")));
        }
        Ok(())
    }

    /// Count a scan and return the target URL. Inactive codes are treated
    /// as missing.
    pub fn record_scan(&self, id: &str, now: DateTime<Utc>) -> Result<String> {
        let conn = self.conn()?;
        conn.query_row(
            "UPDATE qr_codes SET scan_count = scan_count + 1, updated_at = ?2
             WHERE id = ?1 AND is_active = 1
             RETURNING url",
            params![id, ts(now)],
            |r| r.get(0),
        )
        .optional()
        .map_err(db_err)?
        .ok_or_else(|| LotusError::NotFound(format!("qr code {id}")))
    }
}
