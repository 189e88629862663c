//! Message templates.

use chrono::{DateTime, Utc};
use lotus_core::error::{LotusError, Result};
use lotus_core::types::{NewTemplate, Segment, Template, TemplateKind};
use rusqlite::{Connection, OptionalExtension, params};

use crate::{CrmDb, col_enum, col_enum_opt, col_ts, db_err, new_id, ts};

const TEMPLATE_COLUMNS: &str =
    "id, name, subject, content, kind, segment, delay_hours, is_active, created_at, updated_at";

fn template_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Template> {
    Ok(Template {
        id: row.get(0)?,
        name: row.get(1)?,
        subject: row.get(2)?,
        content: row.get(3)?,
        kind: col_enum(row, 4)?,
        segment: col_enum_opt(row, 5)?,
        delay_hours: row.get(6)?,
        is_active: row.get(7)?,
        created_at: col_ts(row, 8)?,
        updated_at: col_ts(row, 9)?,
    })
}

pub(crate) fn get_template_on(conn: &Connection, id: &str) -> Result<Template> {
    conn.query_row(
        &format!("SELECT {TEMPLATE_COLUMNS} FROM templates WHERE id = ?1"),
        [id],
        template_from_row,
    )
    .optional()
    .map_err(db_err)?
    .ok_or_else(|| LotusError::NotFound(format!("template {id}")))
}

impl CrmDb {
    /// Templates ordered by kind then name.
    pub fn list_templates(&self, active_only: bool) -> Result<Vec<Template>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {TEMPLATE_COLUMNS} FROM templates
                 WHERE ?1 = 0 OR is_active = 1
                 ORDER BY kind, name"
            ))
            .map_err(db_err)?;
        let rows = stmt
            .query_map([active_only], template_from_row)
            .map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    pub fn get_template(&self, id: &str) -> Result<Template> {
        let conn = self.conn()?;
        get_template_on(&conn, id)
    }

    pub fn create_template(&self, input: &NewTemplate, now: DateTime<Utc>) -> Result<Template> {
        input.validate()?;
        let conn = self.conn()?;
        let id = new_id();
        conn.execute(
            "INSERT INTO templates (id, name, subject, content, kind, segment, delay_hours, is_active, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
            params![
                id,
                input.name.trim(),
                input.subject,
                input.content,
                input.kind.as_str(),
                input.segment.map(|s| s.as_str()),
                input.delay_hours,
                input.is_active,
                ts(now),
            ],
        )
        .map_err(db_err)?;
        get_template_on(&conn, &id)
    }

    /// Replace every editable field of an existing template.
    pub fn update_template(&self, id: &str, input: &NewTemplate, now: DateTime<Utc>) -> Result<Template> {
        input.validate()?;
        let conn = self.conn()?;
        let changed = conn
            .execute(
                "UPDATE templates
                 SET name = ?2, subject = ?3, content = ?4, kind = ?5, segment = ?6,
                     delay_hours = ?7, is_active = ?8, updated_at = ?9
                 WHERE id = ?1",
                params![
                    id,
                    input.name.trim(),
                    input.subject,
                    input.content,
                    input.kind.as_str(),
                    input.segment.map(|s| s.as_str()),
                    input.delay_hours,
                    input.is_active,
                    ts(now),
                ],
            )
            .map_err(db_err)?;
        if changed == 0 {
            return Err(LotusError::NotFound(format!("template {id}")));
        }
        get_template_on(&conn, id)
    }

    /// Deleting a template also removes the sequence steps that use it.
    pub fn delete_template(&self, id: &str) -> Result<()> {
        let conn = self.conn()?;
        let changed = conn
            .execute("DELETE FROM templates WHERE id = ?1", [id])
            .map_err(db_err)?;
        if changed == 0 {
            return Err(LotusError::NotFound(format!("template {id}")));
        }
        Ok(())
    }

    /// Best active template of `kind` for a segment: a segment-specific one
    /// wins over a generic (NULL segment) one, older first on ties.
    pub fn best_template(&self, kind: TemplateKind, segment: Segment) -> Result<Option<Template>> {
        let conn = self.conn()?;
        conn.query_row(
            &format!(
                "SELECT {TEMPLATE_COLUMNS} FROM templates
                 WHERE is_active = 1 AND kind = ?1 AND (segment = ?2 OR segment IS NULL)
                 ORDER BY (segment IS NULL), created_at, rowid
                 LIMIT 1"
            ),
            params![kind.as_str(), segment.as_str()],
            template_from_row,
        )
        .optional()
        .map_err(db_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::temp_db;

    fn draft(name: &str, kind: TemplateKind, segment: Option<Segment>) -> NewTemplate {
        NewTemplate {
            name: name.into(),
            subject: "Hello".into(),
            content: "Hi {{name}}".into(),
            kind,
            segment,
            delay_hours: 2,
            is_active: true,
        }
    }

    #[test]
    fn test_create_update_delete() {
        let db = temp_db();
        let now = Utc::now();
        let t = db
            .create_template(&draft("Custom", TemplateKind::FollowUp, None), now)
            .unwrap();
        assert_eq!(t.delay_hours, 2);
        assert!(t.is_active);

        let mut edit = draft("Custom v2", TemplateKind::FollowUp, Some(Segment::Seniors));
        edit.is_active = false;
        let t2 = db.update_template(&t.id, &edit, now).unwrap();
        assert_eq!(t2.name, "Custom v2");
        assert_eq!(t2.segment, Some(Segment::Seniors));
        assert!(!db.list_templates(true).unwrap().iter().any(|x| x.id == t.id));

        db.delete_template(&t.id).unwrap();
        assert!(matches!(db.get_template(&t.id), Err(LotusError::NotFound(_))));
        assert!(matches!(db.delete_template(&t.id), Err(LotusError::NotFound(_))));
    }

    #[test]
    fn test_update_missing_is_not_found() {
        let db = temp_db();
        let err = db
            .update_template("nope", &draft("X", TemplateKind::Welcome, None), Utc::now())
            .unwrap_err();
        assert!(matches!(err, LotusError::NotFound(_)));
    }

    #[test]
    fn test_best_template_prefers_segment() {
        let db = temp_db();
        let prenatal = db
            .best_template(TemplateKind::Welcome, Segment::Prenatal)
            .unwrap()
            .unwrap();
        assert_eq!(prenatal.id, "welcome-prenatal");

        let general = db
            .best_template(TemplateKind::Welcome, Segment::General)
            .unwrap()
            .unwrap();
        assert_eq!(general.id, "welcome-general");

        // Seniors have no welcome variant and the seeded ones are segment-bound.
        assert!(db.best_template(TemplateKind::Welcome, Segment::Seniors).unwrap().is_none());

        let generic = db
            .create_template(&draft("Any", TemplateKind::Welcome, None), Utc::now())
            .unwrap();
        let seniors = db
            .best_template(TemplateKind::Welcome, Segment::Seniors)
            .unwrap()
            .unwrap();
        assert_eq!(seniors.id, generic.id);
    }

    #[test]
    fn test_invalid_template_rejected() {
        let db = temp_db();
        let mut bad = draft("X", TemplateKind::Welcome, None);
        bad.delay_hours = -1;
        assert!(matches!(
            db.create_template(&bad, Utc::now()),
            Err(LotusError::Validation(_))
        ));
    }
}
