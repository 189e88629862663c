//! Lead records: capture, dashboard search, status changes and lifecycle queries.

use chrono::{DateTime, Duration, Utc};
use lotus_core::error::{LotusError, Result};
use lotus_core::types::{Lead, LeadStats, LeadStatus, NewLead};
use rusqlite::{Connection, OptionalExtension, params};

use crate::{CrmDb, col_enum, col_enum_opt, col_ts, col_ts_opt, db_err, like_pattern, new_id, ts};

pub(crate) const LEAD_COLUMNS: &str = "id, name, email, phone, referral_source, segment, status, notes, \
     submitted_at, last_contacted_at, created_at, updated_at";

pub(crate) fn lead_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Lead> {
    Ok(Lead {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        phone: row.get(3)?,
        referral_source: row.get(4)?,
        segment: col_enum_opt(row, 5)?,
        status: col_enum(row, 6)?,
        notes: row.get(7)?,
        submitted_at: col_ts(row, 8)?,
        last_contacted_at: col_ts_opt(row, 9)?,
        created_at: col_ts(row, 10)?,
        updated_at: col_ts(row, 11)?,
    })
}

pub(crate) fn get_lead_on(conn: &Connection, id: &str) -> Result<Lead> {
    conn.query_row(
        &format!("SELECT {LEAD_COLUMNS} FROM leads WHERE id = ?1"),
        [id],
        lead_from_row,
    )
    .optional()
    .map_err(db_err)?
    .ok_or_else(|| LotusError::NotFound(format!("lead {id}")))
}

impl CrmDb {
    /// Insert a new lead with status `new`, submitted at `now`.
    pub fn insert_lead(&self, lead: &NewLead, now: DateTime<Utc>) -> Result<Lead> {
        let conn = self.conn()?;
        let id = new_id();
        let stamp = ts(now);
        conn.execute(
            "INSERT INTO leads (id, name, email, phone, referral_source, segment, status, notes,
                                submitted_at, last_contacted_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'new', ?7, ?8, NULL, ?8, ?8)",
            params![
                id,
                lead.name.trim(),
                lead.email.trim(),
                lead.phone.trim(),
                lead.referral_source.trim(),
                lead.segment.unwrap_or_default().as_str(),
                lead.notes,
                stamp,
            ],
        )
        .map_err(db_err)?;
        get_lead_on(&conn, &id)
    }

    pub fn get_lead(&self, id: &str) -> Result<Lead> {
        let conn = self.conn()?;
        get_lead_on(&conn, id)
    }

    /// All leads, newest submission first.
    pub fn list_leads(&self) -> Result<Vec<Lead>> {
        self.search_leads(None, None)
    }

    /// Substring search over name, email and referral source, ignoring
    /// ASCII case, optionally restricted to one status.
    pub fn search_leads(&self, term: Option<&str>, status: Option<LeadStatus>) -> Result<Vec<Lead>> {
        let conn = self.conn()?;
        let pattern = term
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(like_pattern);
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {LEAD_COLUMNS} FROM leads
                 WHERE (?1 IS NULL
                        OR name LIKE ?1 ESCAPE '\\'
                        OR email LIKE ?1 ESCAPE '\\'
                        OR referral_source LIKE ?1 ESCAPE '\\')
                   AND (?2 IS NULL OR status = ?2)
                 ORDER BY submitted_at DESC, rowid DESC"
            ))
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![pattern, status.map(|s| s.as_str())], lead_from_row)
            .map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    /// Change status; moving to `contacted` also stamps `last_contacted_at`.
    pub fn update_lead_status(&self, id: &str, status: LeadStatus, now: DateTime<Utc>) -> Result<Lead> {
        let conn = self.conn()?;
        let stamp = ts(now);
        let changed = (if status == LeadStatus::Contacted {
            conn.execute(
                "UPDATE leads SET status = ?2, last_contacted_at = ?3, updated_at = ?3 WHERE id = ?1",
                params![id, status.as_str(), stamp],
            )
        } else {
            conn.execute(
                "UPDATE leads SET status = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, status.as_str(), stamp],
            )
        })
        .map_err(db_err)?;
        if changed == 0 {
            return Err(LotusError::NotFound(format!("lead {id}")));
        }
        get_lead_on(&conn, id)
    }

    pub fn update_lead_notes(&self, id: &str, notes: &str, now: DateTime<Utc>) -> Result<Lead> {
        let conn = self.conn()?;
        let notes = Some(notes.trim()).filter(|n| !n.is_empty());
        let changed = conn
            .execute(
                "UPDATE leads SET notes = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, notes, ts(now)],
            )
            .map_err(db_err)?;
        if changed == 0 {
            return Err(LotusError::NotFound(format!("lead {id}")));
        }
        get_lead_on(&conn, id)
    }

    /// Delete a lead; its message history cascades.
    pub fn delete_lead(&self, id: &str) -> Result<()> {
        let conn = self.conn()?;
        let changed = conn
            .execute("DELETE FROM leads WHERE id = ?1", [id])
            .map_err(db_err)?;
        if changed == 0 {
            return Err(LotusError::NotFound(format!("lead {id}")));
        }
        Ok(())
    }

    /// Converted leads last contacted at or before `contacted_before` that
    /// have no message created at or after `quiet_since`.
    pub fn inactive_converted_leads(
        &self,
        contacted_before: DateTime<Utc>,
        quiet_since: DateTime<Utc>,
    ) -> Result<Vec<Lead>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {LEAD_COLUMNS} FROM leads l
                 WHERE l.status = 'converted'
                   AND l.last_contacted_at IS NOT NULL
                   AND l.last_contacted_at <= ?1
                   AND NOT EXISTS (
                       SELECT 1 FROM communication_history h
                       WHERE h.lead_id = l.id AND h.created_at >= ?2
                   )
                 ORDER BY l.last_contacted_at ASC"
            ))
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![ts(contacted_before), ts(quiet_since)], lead_from_row)
            .map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    /// Mark `new` leads submitted at or before `submitted_before` as `lost`.
    /// Returns the number of leads aged out.
    pub fn expire_new_leads(&self, submitted_before: DateTime<Utc>, now: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE leads SET status = 'lost', updated_at = ?2
             WHERE status = 'new' AND submitted_at <= ?1",
            params![ts(submitted_before), ts(now)],
        )
        .map_err(db_err)
    }

    /// Dashboard counters: total, submitted today (UTC), last 7 days, per status.
    pub fn lead_stats(&self, now: DateTime<Utc>) -> Result<LeadStats> {
        let conn = self.conn()?;
        let start_of_day = now
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|d| d.and_utc())
            .unwrap_or(now);
        let week_ago = now - Duration::days(7);

        let count = |sql: &str, arg: Option<String>| -> Result<usize> {
            let n: i64 = (match arg {
                Some(a) => conn.query_row(sql, [a], |r| r.get(0)),
                None => conn.query_row(sql, [], |r| r.get(0)),
            })
            .map_err(db_err)?;
            Ok(n as usize)
        };

        let total = count("SELECT COUNT(*) FROM leads", None)?;
        let today = count(
            "SELECT COUNT(*) FROM leads WHERE submitted_at >= ?1",
            Some(ts(start_of_day)),
        )?;
        let this_week = count(
            "SELECT COUNT(*) FROM leads WHERE submitted_at >= ?1",
            Some(ts(week_ago)),
        )?;

        let mut by_status = Vec::with_capacity(LeadStatus::ALL.len());
        for status in LeadStatus::ALL {
            let n = count(
                "SELECT COUNT(*) FROM leads WHERE status = ?1",
                Some(status.as_str().to_string()),
            )?;
            by_status.push((*status, n));
        }

        Ok(LeadStats {
            total,
            today,
            this_week,
            by_status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{add_lead, at, temp_db};
    use lotus_core::types::Segment;

    #[test]
    fn test_insert_defaults() {
        let db = temp_db();
        let lead = add_lead(&db, "Maya", None, at("2026-01-10T09:00:00Z"));
        assert_eq!(lead.status, LeadStatus::New);
        assert_eq!(lead.segment, Some(Segment::General));
        assert!(lead.last_contacted_at.is_none());
        assert_eq!(db.get_lead(&lead.id).unwrap().email, "maya@example.com");
    }

    #[test]
    fn test_search_is_case_insensitive_and_newest_first() {
        let db = temp_db();
        add_lead(&db, "Maya", None, at("2026-01-10T09:00:00Z"));
        add_lead(&db, "Mayra", None, at("2026-01-11T09:00:00Z"));
        add_lead(&db, "Tom", None, at("2026-01-12T09:00:00Z"));

        let found = db.search_leads(Some("MAY"), None).unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].name, "Mayra");

        let by_source = db.search_leads(Some("insta"), None).unwrap();
        assert_eq!(by_source.len(), 3);

        assert_eq!(db.search_leads(Some("  "), None).unwrap().len(), 3);
        assert!(db.search_leads(Some("zzz"), None).unwrap().is_empty());
    }

    #[test]
    fn test_search_matches_accented_names() {
        let db = temp_db();
        add_lead(&db, "Élodie", None, at("2026-01-10T09:00:00Z"));
        add_lead(&db, "Øystein", None, at("2026-01-11T09:00:00Z"));

        for term in ["Élodie", "ÉLODIE", "élodie@", "lodie"] {
            let found = db.search_leads(Some(term), None).unwrap();
            assert_eq!(found.len(), 1, "{term}");
            assert_eq!(found[0].name, "Élodie");
        }
        assert_eq!(db.search_leads(Some("Øyst"), None).unwrap().len(), 1);
        assert_eq!(db.search_leads(Some("ØYSTEIN"), None).unwrap().len(), 1);
    }

    #[test]
    fn test_status_filter() {
        let db = temp_db();
        let now = at("2026-01-10T09:00:00Z");
        let a = add_lead(&db, "Ana", None, now);
        add_lead(&db, "Ben", None, now);
        db.update_lead_status(&a.id, LeadStatus::Converted, now).unwrap();
        let converted = db.search_leads(None, Some(LeadStatus::Converted)).unwrap();
        assert_eq!(converted.len(), 1);
        assert_eq!(converted[0].name, "Ana");
    }

    #[test]
    fn test_contacted_stamps_last_contacted() {
        let db = temp_db();
        let lead = add_lead(&db, "Maya", None, at("2026-01-10T09:00:00Z"));
        let later = at("2026-01-12T15:30:00Z");

        let updated = db.update_lead_status(&lead.id, LeadStatus::InProgress, later).unwrap();
        assert!(updated.last_contacted_at.is_none());

        let updated = db.update_lead_status(&lead.id, LeadStatus::Contacted, later).unwrap();
        assert_eq!(updated.last_contacted_at, Some(later));
    }

    #[test]
    fn test_missing_lead_is_not_found() {
        let db = temp_db();
        let now = Utc::now();
        assert!(matches!(
            db.update_lead_status("nope", LeadStatus::Lost, now),
            Err(LotusError::NotFound(_))
        ));
        assert!(matches!(db.delete_lead("nope"), Err(LotusError::NotFound(_))));
        assert!(matches!(db.get_lead("nope"), Err(LotusError::NotFound(_))));
    }

    #[test]
    fn test_notes_blank_clears() {
        let db = temp_db();
        let now = at("2026-01-10T09:00:00Z");
        let lead = add_lead(&db, "Maya", None, now);
        let with = db.update_lead_notes(&lead.id, "Prefers mornings", now).unwrap();
        assert_eq!(with.notes.as_deref(), Some("Prefers mornings"));
        let cleared = db.update_lead_notes(&lead.id, "   ", now).unwrap();
        assert!(cleared.notes.is_none());
    }

    #[test]
    fn test_expire_new_leads() {
        let db = temp_db();
        let old = add_lead(&db, "Old", None, at("2026-01-01T00:00:00Z"));
        let fresh = add_lead(&db, "Fresh", None, at("2026-01-25T00:00:00Z"));
        let contacted = add_lead(&db, "Called", None, at("2026-01-01T00:00:00Z"));
        let now = at("2026-02-01T00:00:00Z");
        db.update_lead_status(&contacted.id, LeadStatus::Contacted, now).unwrap();

        let aged = db.expire_new_leads(now - Duration::days(30), now).unwrap();
        assert_eq!(aged, 1);
        assert_eq!(db.get_lead(&old.id).unwrap().status, LeadStatus::Lost);
        assert_eq!(db.get_lead(&fresh.id).unwrap().status, LeadStatus::New);
        assert_eq!(db.get_lead(&contacted.id).unwrap().status, LeadStatus::Contacted);
    }

    #[test]
    fn test_lead_stats() {
        let db = temp_db();
        let now = at("2026-03-10T12:00:00Z");
        add_lead(&db, "Today", None, at("2026-03-10T01:00:00Z"));
        add_lead(&db, "Week", None, at("2026-03-05T12:00:00Z"));
        add_lead(&db, "Old", None, at("2026-01-01T12:00:00Z"));

        let stats = db.lead_stats(now).unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.today, 1);
        assert_eq!(stats.this_week, 2);
        let new_count = stats
            .by_status
            .iter()
            .find(|(s, _)| *s == LeadStatus::New)
            .map(|(_, n)| *n);
        assert_eq!(new_count, Some(3));
    }
}
