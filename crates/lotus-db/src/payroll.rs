//! Contractor pay: per-class payment calculation and payroll records.

use chrono::{DateTime, Utc};
use lotus_core::error::{LotusError, Result};
use lotus_core::staff::{ClassStatus, PaymentBreakdown, PayrollRecord, PayrollStatus};
use rusqlite::{Connection, OptionalExtension, params};
use serde::Deserialize;

use crate::classes::get_class_on;
use crate::instructors::get_instructor_on;
use crate::{CrmDb, col_enum, col_ts, col_ts_opt, db_err, new_id, ts};

const PAYROLL_COLUMNS: &str = "id, instructor_id, class_id, base_payment, student_payment, \
     total_payment, is_substitute, substitute_multiplier, status, created_at, paid_at";

fn payroll_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PayrollRecord> {
    Ok(PayrollRecord {
        id: row.get(0)?,
        instructor_id: row.get(1)?,
        class_id: row.get(2)?,
        base_payment: row.get(3)?,
        student_payment: row.get(4)?,
        total_payment: row.get(5)?,
        is_substitute: row.get(6)?,
        substitute_multiplier: row.get(7)?,
        status: col_enum(row, 8)?,
        created_at: col_ts(row, 9)?,
        paid_at: col_ts_opt(row, 10)?,
    })
}

fn get_payroll_on(conn: &Connection, id: &str) -> Result<PayrollRecord> {
    conn.query_row(
        &format!("SELECT {PAYROLL_COLUMNS} FROM payroll_records WHERE id = ?1"),
        [id],
        payroll_from_row,
    )
    .optional()
    .map_err(db_err)?
    .ok_or_else(|| LotusError::NotFound(format!("payroll record {id}")))
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PayrollFilter {
    #[serde(default)]
    pub instructor_id: Option<String>,
    #[serde(default)]
    pub status: Option<PayrollStatus>,
}

impl CrmDb {
    /// What an instructor would earn for a class of `student_count`, at
    /// their current rates.
    pub fn calculate_instructor_payment(
        &self,
        instructor_id: &str,
        student_count: i64,
        is_substitute: bool,
    ) -> Result<PaymentBreakdown> {
        if student_count < 0 {
            return Err(LotusError::Validation("student_count cannot be negative".into()));
        }
        let conn = self.conn()?;
        let instructor = get_instructor_on(&conn, instructor_id)?;
        Ok(PaymentBreakdown::calculate(&instructor, student_count, is_substitute))
    }

    /// Pay a completed class: the substitute if one covered it, otherwise the
    /// regular instructor. Each class is paid at most once.
    pub fn generate_payroll(&self, class_id: &str, now: DateTime<Utc>) -> Result<PayrollRecord> {
        let conn = self.conn()?;
        let class = get_class_on(&conn, class_id)?;
        if class.status != ClassStatus::Completed {
            return Err(LotusError::Validation(format!(
                "class {} is {}; only completed classes are paid",
                class.name, class.status
            )));
        }
        let existing: Option<String> = conn
            .query_row(
                "SELECT id FROM payroll_records WHERE class_id = ?1",
                [class_id],
                |r| r.get(0),
            )
            .optional()
            .map_err(db_err)?;
        if existing.is_some() {
            return Err(LotusError::Validation(format!(
                "payroll for class {} was already generated",
                class.name
            )));
        }
        let instructor_id = class
            .paid_instructor()
            .ok_or_else(|| LotusError::Validation(format!("class {} has no instructor", class.name)))?;
        let instructor = get_instructor_on(&conn, instructor_id)?;
        let pay = PaymentBreakdown::calculate(&instructor, class.student_count, class.is_substitute_class);

        let id = new_id();
        conn.execute(
            "INSERT INTO payroll_records (id, instructor_id, class_id, base_payment, student_payment,
                                          total_payment, is_substitute, substitute_multiplier,
                                          status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'pending', ?9)",
            params![
                id,
                instructor.id,
                class_id,
                pay.base_payment,
                pay.student_payment,
                pay.total_payment,
                class.is_substitute_class,
                pay.substitute_multiplier,
                ts(now),
            ],
        )
        .map_err(db_err)?;
        tracing::info!(
            "💵 Payroll for {}: ${:.2} to {}",
            class.name,
            pay.total_payment,
            instructor.full_name()
        );
        get_payroll_on(&conn, &id)
    }

    /// Payroll records, newest first.
    pub fn list_payroll(&self, filter: &PayrollFilter) -> Result<Vec<PayrollRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {PAYROLL_COLUMNS} FROM payroll_records
                 WHERE (?1 IS NULL OR instructor_id = ?1)
                   AND (?2 IS NULL OR status = ?2)
                 ORDER BY created_at DESC, rowid DESC"
            ))
            .map_err(db_err)?;
        let rows = stmt
            .query_map(
                params![filter.instructor_id, filter.status.map(|s| s.as_str())],
                payroll_from_row,
            )
            .map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    pub fn mark_payroll_paid(&self, id: &str, now: DateTime<Utc>) -> Result<PayrollRecord> {
        let conn = self.conn()?;
        let record = get_payroll_on(&conn, id)?;
        if record.status == PayrollStatus::Paid {
            return Err(LotusError::Validation(format!("payroll record {id} is already paid")));
        }
        conn.execute(
            "UPDATE payroll_records SET status = 'paid', paid_at = ?2 WHERE id = ?1",
            params![id, ts(now)],
        )
        .map_err(db_err)?;
        get_payroll_on(&conn, id)
    }
}
