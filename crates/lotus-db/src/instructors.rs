//! Contract instructors and their pay rates.

use chrono::{DateTime, Utc};
use lotus_core::error::{LotusError, Result};
use lotus_core::staff::{Instructor, NewInstructor};
use rusqlite::{Connection, OptionalExtension, params};

use crate::{CrmDb, col_enum, col_ts, db_err, like_pattern, new_id, ts};

const INSTRUCTOR_COLUMNS: &str = "id, first_name, last_name, email, phone, certification_level, \
     base_rate, per_student_rate, substitute_rate_multiplier, is_active, bio, specialties, \
     created_at, updated_at";

fn instructor_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Instructor> {
    let specialties: String = row.get(11)?;
    Ok(Instructor {
        id: row.get(0)?,
        first_name: row.get(1)?,
        last_name: row.get(2)?,
        email: row.get(3)?,
        phone: row.get(4)?,
        certification_level: col_enum(row, 5)?,
        base_rate: row.get(6)?,
        per_student_rate: row.get(7)?,
        substitute_rate_multiplier: row.get(8)?,
        is_active: row.get(9)?,
        bio: row.get(10)?,
        specialties: serde_json::from_str(&specialties).unwrap_or_default(),
        created_at: col_ts(row, 12)?,
        updated_at: col_ts(row, 13)?,
    })
}

pub(crate) fn get_instructor_on(conn: &Connection, id: &str) -> Result<Instructor> {
    conn.query_row(
        &format!("SELECT {INSTRUCTOR_COLUMNS} FROM instructors WHERE id = ?1"),
        [id],
        instructor_from_row,
    )
    .optional()
    .map_err(db_err)?
    .ok_or_else(|| LotusError::NotFound(format!("instructor {id}")))
}

/// Instructor that exists and can take classes.
pub(crate) fn active_instructor_on(conn: &Connection, id: &str) -> Result<Instructor> {
    let instructor = get_instructor_on(conn, id)?;
    if !instructor.is_active {
        return Err(LotusError::Validation(format!(
            "instructor {} is inactive",
            instructor.full_name()
        )));
    }
    Ok(instructor)
}

fn ensure_email_free(conn: &Connection, email: &str, except_id: Option<&str>) -> Result<()> {
    let taken: Option<String> = conn
        .query_row(
            "SELECT id FROM instructors WHERE lower(email) = lower(?1) AND id IS NOT ?2",
            params![email, except_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(db_err)?;
    match taken {
        Some(_) => Err(LotusError::Validation(format!(
            "an instructor with email {email} already exists"
        ))),
        None => Ok(()),
    }
}

fn clean_specialties(specialties: &[String]) -> Result<String> {
    let cleaned: Vec<&str> = specialties
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect();
    Ok(serde_json::to_string(&cleaned)?)
}

impl CrmDb {
    pub fn create_instructor(&self, input: &NewInstructor, now: DateTime<Utc>) -> Result<Instructor> {
        input.validate()?;
        let conn = self.conn()?;
        let email = input.email.trim();
        ensure_email_free(&conn, email, None)?;
        let id = new_id();
        conn.execute(
            "INSERT INTO instructors (id, first_name, last_name, email, phone, certification_level,
                                      base_rate, per_student_rate, substitute_rate_multiplier,
                                      is_active, bio, specialties, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 1, ?10, ?11, ?12, ?12)",
            params![
                id,
                input.first_name.trim(),
                input.last_name.trim(),
                email,
                input.phone.as_deref().map(str::trim).filter(|p| !p.is_empty()),
                input.certification_level.as_str(),
                input.base_rate,
                input.per_student_rate,
                input.substitute_rate_multiplier,
                input.bio,
                clean_specialties(&input.specialties)?,
                ts(now),
            ],
        )
        .map_err(db_err)?;
        tracing::info!("🧘 New instructor {} {}", input.first_name.trim(), input.last_name.trim());
        get_instructor_on(&conn, &id)
    }

    /// Replace every editable field, rates included. Past payroll records
    /// keep the amounts they were generated with.
    pub fn update_instructor(
        &self,
        id: &str,
        input: &NewInstructor,
        now: DateTime<Utc>,
    ) -> Result<Instructor> {
        input.validate()?;
        let conn = self.conn()?;
        let email = input.email.trim();
        ensure_email_free(&conn, email, Some(id))?;
        let changed = conn
            .execute(
                "UPDATE instructors
                 SET first_name = ?2, last_name = ?3, email = ?4, phone = ?5,
                     certification_level = ?6, base_rate = ?7, per_student_rate = ?8,
                     substitute_rate_multiplier = ?9, bio = ?10, specialties = ?11,
                     updated_at = ?12
                 WHERE id = ?1",
                params![
                    id,
                    input.first_name.trim(),
                    input.last_name.trim(),
                    email,
                    input.phone.as_deref().map(str::trim).filter(|p| !p.is_empty()),
                    input.certification_level.as_str(),
                    input.base_rate,
                    input.per_student_rate,
                    input.substitute_rate_multiplier,
                    input.bio,
                    clean_specialties(&input.specialties)?,
                    ts(now),
                ],
            )
            .map_err(db_err)?;
        if changed == 0 {
            return Err(LotusError::NotFound(format!("instructor {id}")));
        }
        get_instructor_on(&conn, id)
    }

    pub fn get_instructor(&self, id: &str) -> Result<Instructor> {
        let conn = self.conn()?;
        get_instructor_on(&conn, id)
    }

    /// Instructors by first then last name, optionally filtered by a name or
    /// email substring (ASCII case folded).
    pub fn list_instructors(&self, term: Option<&str>, active_only: bool) -> Result<Vec<Instructor>> {
        let conn = self.conn()?;
        let pattern = term
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(like_pattern);
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {INSTRUCTOR_COLUMNS} FROM instructors
                 WHERE (?1 IS NULL
                        OR first_name LIKE ?1 ESCAPE '\\'
                        OR last_name LIKE ?1 ESCAPE '\\'
                        OR email LIKE ?1 ESCAPE '\\')
                   AND (?2 = 0 OR is_active = 1)
                 ORDER BY first_name, last_name"
            ))
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![pattern, active_only], instructor_from_row)
            .map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    /// Inactive instructors keep their history but cannot be booked.
    pub fn set_instructor_active(&self, id: &str, active: bool, now: DateTime<Utc>) -> Result<Instructor> {
        let conn = self.conn()?;
        let changed = conn
            .execute(
                "UPDATE instructors SET is_active = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, active, ts(now)],
            )
            .map_err(db_err)?;
        if changed == 0 {
            return Err(LotusError::NotFound(format!("instructor {id}")));
        }
        get_instructor_on(&conn, id)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    pub fn add_instructor(db: &CrmDb, first: &str, now: DateTime<Utc>) -> Instructor {
        db.create_instructor(
            &NewInstructor {
                first_name: first.into(),
                last_name: "Rao".into(),
                email: format!("{}@studio.example", first.to_lowercase()),
                phone: None,
                certification_level: Default::default(),
                base_rate: 50.0,
                per_student_rate: 5.0,
                substitute_rate_multiplier: 1.5,
                bio: None,
                specialties: vec!["hatha".into(), " ".into()],
            },
            now,
        )
        .unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::testing::add_instructor;
    use super::*;
    use crate::test_support::{at, temp_db};
    use lotus_core::staff::CertificationLevel;

    #[test]
    fn test_create_and_search() {
        let db = temp_db();
        let now = at("2026-05-01T09:00:00Z");
        let asha = add_instructor(&db, "Asha", now);
        add_instructor(&db, "Ben", now);

        assert_eq!(asha.specialties, vec!["hatha"]);
        assert_eq!(asha.certification_level, CertificationLevel::Ryt200);
        assert!(asha.is_active);

        let all = db.list_instructors(None, false).unwrap();
        assert_eq!(all.iter().map(|i| i.first_name.as_str()).collect::<Vec<_>>(), ["Asha", "Ben"]);
        assert_eq!(db.list_instructors(Some("ASH"), false).unwrap().len(), 1);
        assert_eq!(db.list_instructors(Some("studio.example"), false).unwrap().len(), 2);
    }

    #[test]
    fn test_duplicate_email_rejected() {
        let db = temp_db();
        let now = at("2026-05-01T09:00:00Z");
        let asha = add_instructor(&db, "Asha", now);
        let mut dup: NewInstructor = serde_json::from_value(serde_json::json!({
            "first_name": "Other",
            "last_name": "Person",
            "email": "ASHA@studio.example",
        }))
        .unwrap();
        assert!(matches!(db.create_instructor(&dup, now), Err(LotusError::Validation(_))));

        // Keeping your own email on update is fine.
        dup.email = asha.email.clone();
        dup.base_rate = 65.0;
        let updated = db.update_instructor(&asha.id, &dup, now).unwrap();
        assert_eq!(updated.base_rate, 65.0);
        assert_eq!(updated.first_name, "Other");
    }

    #[test]
    fn test_deactivate() {
        let db = temp_db();
        let now = at("2026-05-01T09:00:00Z");
        let asha = add_instructor(&db, "Asha", now);
        db.set_instructor_active(&asha.id, false, now).unwrap();
        assert!(db.list_instructors(None, true).unwrap().is_empty());
        assert_eq!(db.list_instructors(None, false).unwrap().len(), 1);

        let conn = db.conn().unwrap();
        assert!(matches!(
            active_instructor_on(&conn, &asha.id),
            Err(LotusError::Validation(_))
        ));
        assert!(matches!(
            active_instructor_on(&conn, "missing"),
            Err(LotusError::NotFound(_))
        ));
    }
}
