//! Class timetable and substitute cover.
//!
//! A class moves `scheduled → needs-substitute → scheduled` while cover is
//! arranged, and ends either `completed` (with a head count) or `cancelled`.

use chrono::{DateTime, Utc};
use lotus_core::error::{LotusError, Result};
use lotus_core::staff::{
    ClassStatus, NewClass, StudioClass, SubstituteRequest, SubstituteStatus, notice_hours,
    substitute_priority,
};
use rusqlite::{Connection, OptionalExtension, params};
use serde::Deserialize;

use crate::instructors::active_instructor_on;
use crate::{CrmDb, col_enum, col_ts, db_err, new_id, ts};

const CLASS_COLUMNS: &str = "id, name, instructor_id, substitute_instructor_id, starts_at, ends_at, \
     room, student_count, status, is_substitute_class, substitute_notice_hours, created_at, updated_at";

const REQUEST_COLUMNS: &str = "id, class_id, original_instructor_id, request_reason, notice_hours, \
     priority_level, status, filled_by_instructor_id, created_at, updated_at";

fn class_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<StudioClass> {
    Ok(StudioClass {
        id: row.get(0)?,
        name: row.get(1)?,
        instructor_id: row.get(2)?,
        substitute_instructor_id: row.get(3)?,
        starts_at: col_ts(row, 4)?,
        ends_at: col_ts(row, 5)?,
        room: row.get(6)?,
        student_count: row.get(7)?,
        status: col_enum(row, 8)?,
        is_substitute_class: row.get(9)?,
        substitute_notice_hours: row.get(10)?,
        created_at: col_ts(row, 11)?,
        updated_at: col_ts(row, 12)?,
    })
}

fn request_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SubstituteRequest> {
    Ok(SubstituteRequest {
        id: row.get(0)?,
        class_id: row.get(1)?,
        original_instructor_id: row.get(2)?,
        request_reason: row.get(3)?,
        notice_hours: row.get(4)?,
        priority_level: row.get(5)?,
        status: col_enum(row, 6)?,
        filled_by_instructor_id: row.get(7)?,
        created_at: col_ts(row, 8)?,
        updated_at: col_ts(row, 9)?,
    })
}

pub(crate) fn get_class_on(conn: &Connection, id: &str) -> Result<StudioClass> {
    conn.query_row(
        &format!("SELECT {CLASS_COLUMNS} FROM classes WHERE id = ?1"),
        [id],
        class_from_row,
    )
    .optional()
    .map_err(db_err)?
    .ok_or_else(|| LotusError::NotFound(format!("class {id}")))
}

fn get_request_on(conn: &Connection, id: &str) -> Result<SubstituteRequest> {
    conn.query_row(
        &format!("SELECT {REQUEST_COLUMNS} FROM substitute_requests WHERE id = ?1"),
        [id],
        request_from_row,
    )
    .optional()
    .map_err(db_err)?
    .ok_or_else(|| LotusError::NotFound(format!("substitute request {id}")))
}

/// Requests still waiting for cover.
fn open_request(status: SubstituteStatus) -> bool {
    matches!(status, SubstituteStatus::Pending | SubstituteStatus::Escalated)
}

fn set_class_status(conn: &Connection, id: &str, status: ClassStatus, now: &str) -> Result<()> {
    conn.execute(
        "UPDATE classes SET status = ?2, updated_at = ?3 WHERE id = ?1",
        params![id, status.as_str(), now],
    )
    .map_err(db_err)?;
    Ok(())
}

/// Filter for [`CrmDb::list_classes`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClassFilter {
    #[serde(default)]
    pub status: Option<ClassStatus>,
    #[serde(default)]
    pub instructor_id: Option<String>,
    /// Only classes starting at or after this instant.
    #[serde(default)]
    pub from: Option<DateTime<Utc>>,
}

impl CrmDb {
    pub fn create_class(&self, input: &NewClass, now: DateTime<Utc>) -> Result<StudioClass> {
        input.validate()?;
        let conn = self.conn()?;
        if let Some(instructor_id) = &input.instructor_id {
            active_instructor_on(&conn, instructor_id)?;
        }
        let id = new_id();
        conn.execute(
            "INSERT INTO classes (id, name, instructor_id, starts_at, ends_at, room, student_count,
                                  status, is_substitute_class, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, 'scheduled', 0, ?7, ?7)",
            params![
                id,
                input.name.trim(),
                input.instructor_id,
                ts(input.starts_at),
                ts(input.ends_at),
                input.room,
                ts(now),
            ],
        )
        .map_err(db_err)?;
        get_class_on(&conn, &id)
    }

    pub fn get_class(&self, id: &str) -> Result<StudioClass> {
        let conn = self.conn()?;
        get_class_on(&conn, id)
    }

    /// Classes in start order. `instructor_id` matches the regular instructor or
    /// the substitute.
    pub fn list_classes(&self, filter: &ClassFilter) -> Result<Vec<StudioClass>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {CLASS_COLUMNS} FROM classes
                 WHERE (?1 IS NULL OR status = ?1)
                   AND (?2 IS NULL OR instructor_id = ?2 OR substitute_instructor_id = ?2)
                   AND (?3 IS NULL OR starts_at >= ?3)
                 ORDER BY starts_at, rowid"
            ))
            .map_err(db_err)?;
        let rows = stmt
            .query_map(
                params![
                    filter.status.map(|s| s.as_str()),
                    filter.instructor_id,
                    filter.from.map(ts),
                ],
                class_from_row,
            )
            .map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    /// Record the head count. Only a class with an instructor and no open cover
    /// request can be completed.
    pub fn complete_class(&self, id: &str, student_count: i64, now: DateTime<Utc>) -> Result<StudioClass> {
        if student_count < 0 {
            return Err(LotusError::Validation("student_count cannot be negative".into()));
        }
        let conn = self.conn()?;
        let class = get_class_on(&conn, id)?;
        if class.status != ClassStatus::Scheduled {
            return Err(LotusError::Validation(format!(
                "class {} is {} and cannot be completed",
                class.name, class.status
            )));
        }
        if class.paid_instructor().is_none() {
            return Err(LotusError::Validation(format!("class {} has no instructor", class.name)));
        }
        conn.execute(
            "UPDATE classes SET status = 'completed', student_count = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, student_count, ts(now)],
        )
        .map_err(db_err)?;
        get_class_on(&conn, id)
    }

    /// Cancel a class and any cover request still open for it.
    pub fn cancel_class(&self, id: &str, now: DateTime<Utc>) -> Result<StudioClass> {
        let mut conn = self.conn()?;
        let class = get_class_on(&conn, id)?;
        if matches!(class.status, ClassStatus::Completed | ClassStatus::Cancelled) {
            return Err(LotusError::Validation(format!(
                "class {} is already {}",
                class.name, class.status
            )));
        }
        let stamp = ts(now);
        let tx = conn.transaction().map_err(db_err)?;
        set_class_status(&tx, id, ClassStatus::Cancelled, &stamp)?;
        tx.execute(
            "UPDATE substitute_requests SET status = 'cancelled', updated_at = ?2
             WHERE class_id = ?1 AND status IN ('pending', 'escalated')",
            params![id, stamp],
        )
        .map_err(db_err)?;
        tx.commit().map_err(db_err)?;
        get_class_on(&conn, id)
    }

    /// Ask for cover. Priority comes from the whole hours left before the
    /// class starts; the class is flagged `needs-substitute` until filled.
    pub fn request_substitute(
        &self,
        class_id: &str,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<SubstituteRequest> {
        let mut conn = self.conn()?;
        let class = get_class_on(&conn, class_id)?;
        if class.status != ClassStatus::Scheduled {
            return Err(LotusError::Validation(format!(
                "class {} is {}; cover can only be requested for scheduled classes",
                class.name, class.status
            )));
        }
        let original = class
            .paid_instructor()
            .ok_or_else(|| LotusError::Validation(format!("class {} has no instructor", class.name)))?
            .to_string();

        let notice = notice_hours(class.starts_at, now);
        let priority = substitute_priority(notice);
        let id = new_id();
        let stamp = ts(now);
        let tx = conn.transaction().map_err(db_err)?;
        tx.execute(
            "INSERT INTO substitute_requests (id, class_id, original_instructor_id, request_reason,
                                              notice_hours, priority_level, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending', ?7, ?7)",
            params![
                id,
                class_id,
                original,
                reason.map(str::trim).filter(|r| !r.is_empty()),
                notice,
                priority,
                stamp,
            ],
        )
        .map_err(db_err)?;
        tx.execute(
            "UPDATE classes SET status = 'needs-substitute', substitute_notice_hours = ?2, updated_at = ?3
             WHERE id = ?1",
            params![class_id, notice, stamp],
        )
        .map_err(db_err)?;
        tx.commit().map_err(db_err)?;

        if priority == 3 {
            tracing::warn!("🚨 Emergency cover needed for {} ({notice}h notice)", class.name);
        } else {
            tracing::info!("🙋 Cover requested for {} ({notice}h notice)", class.name);
        }
        get_request_on(&conn, &id)
    }

    /// Open requests first by priority, then everything else newest first.
    pub fn list_substitute_requests(&self, status: Option<SubstituteStatus>) -> Result<Vec<SubstituteRequest>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {REQUEST_COLUMNS} FROM substitute_requests
                 WHERE ?1 IS NULL OR status = ?1
                 ORDER BY status NOT IN ('pending', 'escalated'), priority_level DESC,
                          created_at DESC, rowid DESC"
            ))
            .map_err(db_err)?;
        let rows = stmt
            .query_map([status.map(|s| s.as_str())], request_from_row)
            .map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    pub fn get_substitute_request(&self, id: &str) -> Result<SubstituteRequest> {
        let conn = self.conn()?;
        get_request_on(&conn, id)
    }

    /// Assign a covering instructor. The class goes back to `scheduled` and
    /// is paid to the substitute at their substitute rate.
    pub fn fill_substitute(
        &self,
        request_id: &str,
        instructor_id: &str,
        now: DateTime<Utc>,
    ) -> Result<SubstituteRequest> {
        let mut conn = self.conn()?;
        let request = get_request_on(&conn, request_id)?;
        if !open_request(request.status) {
            return Err(LotusError::Validation(format!(
                "substitute request is already {}",
                request.status
            )));
        }
        if request.original_instructor_id == instructor_id {
            return Err(LotusError::Validation(
                "the substitute must be a different instructor".into(),
            ));
        }
        let substitute = active_instructor_on(&conn, instructor_id)?;

        let stamp = ts(now);
        let tx = conn.transaction().map_err(db_err)?;
        tx.execute(
            "UPDATE substitute_requests SET status = 'filled', filled_by_instructor_id = ?2, updated_at = ?3
             WHERE id = ?1",
            params![request_id, instructor_id, stamp],
        )
        .map_err(db_err)?;
        tx.execute(
            "UPDATE classes
             SET substitute_instructor_id = ?2, is_substitute_class = 1, status = 'scheduled', updated_at = ?3
             WHERE id = ?1",
            params![request.class_id, instructor_id, stamp],
        )
        .map_err(db_err)?;
        tx.commit().map_err(db_err)?;

        tracing::info!("✅ {} is covering class {}", substitute.full_name(), request.class_id);
        get_request_on(&conn, request_id)
    }

    /// Mark a pending request as escalated (still open, needs attention).
    pub fn escalate_substitute(&self, request_id: &str, now: DateTime<Utc>) -> Result<SubstituteRequest> {
        let conn = self.conn()?;
        let request = get_request_on(&conn, request_id)?;
        if request.status != SubstituteStatus::Pending {
            return Err(LotusError::Validation(format!(
                "only pending requests can be escalated; this one is {}",
                request.status
            )));
        }
        conn.execute(
            "UPDATE substitute_requests SET status = 'escalated', updated_at = ?2 WHERE id = ?1",
            params![request_id, ts(now)],
        )
        .map_err(db_err)?;
        get_request_on(&conn, request_id)
    }

    /// Withdraw an open request; the original instructor teaches after all.
    pub fn cancel_substitute(&self, request_id: &str, now: DateTime<Utc>) -> Result<SubstituteRequest> {
        let mut conn = self.conn()?;
        let request = get_request_on(&conn, request_id)?;
        if !open_request(request.status) {
            return Err(LotusError::Validation(format!(
                "substitute request is already {}",
                request.status
            )));
        }
        let stamp = ts(now);
        let tx = conn.transaction().map_err(db_err)?;
        tx.execute(
            "UPDATE substitute_requests SET status = 'cancelled', updated_at = ?2 WHERE id = ?1",
            params![request_id, stamp],
        )
        .map_err(db_err)?;
        tx.execute(
            "UPDATE classes SET status = 'scheduled', updated_at = ?2
             WHERE id = ?1 AND status = 'needs-substitute'",
            params![request.class_id, stamp],
        )
        .map_err(db_err)?;
        tx.commit().map_err(db_err)?;
        get_request_on(&conn, request_id)
    }
}
