//! Automation sequences and the trigger procedure that expands them into
//! queued history rows.

use chrono::{DateTime, Duration, Utc};
use lotus_core::error::{LotusError, Result};
use lotus_core::types::{
    NewSequence, Segment, Sequence, SequenceStep, TriggerType, check_delay_hours,
};
use rusqlite::{Connection, OptionalExtension, params};

use crate::leads::get_lead_on;
use crate::{CrmDb, col_enum, col_enum_opt, col_ts, db_err, new_id, ts};

const SEQUENCE_COLUMNS: &str =
    "id, name, description, trigger_type, segment, channel, is_active, created_at, updated_at";

fn sequence_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Sequence> {
    Ok(Sequence {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        trigger_type: col_enum(row, 3)?,
        segment: col_enum_opt(row, 4)?,
        channel: col_enum(row, 5)?,
        is_active: row.get(6)?,
        steps: Vec::new(),
        created_at: col_ts(row, 7)?,
        updated_at: col_ts(row, 8)?,
    })
}

fn steps_on(conn: &Connection, sequence_id: &str) -> Result<Vec<SequenceStep>> {
    let mut stmt = conn
        .prepare(
            "SELECT id, sequence_id, template_id, step_order, delay_hours
             FROM sequence_steps WHERE sequence_id = ?1 ORDER BY step_order",
        )
        .map_err(db_err)?;
    let rows = stmt
        .query_map([sequence_id], |r| {
            Ok(SequenceStep {
                id: r.get(0)?,
                sequence_id: r.get(1)?,
                template_id: r.get(2)?,
                step_order: r.get(3)?,
                delay_hours: r.get(4)?,
            })
        })
        .map_err(db_err)?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
}

fn get_sequence_on(conn: &Connection, id: &str) -> Result<Sequence> {
    let mut seq = conn
        .query_row(
            &format!("SELECT {SEQUENCE_COLUMNS} FROM sequences WHERE id = ?1"),
            [id],
            sequence_from_row,
        )
        .optional()
        .map_err(db_err)?
        .ok_or_else(|| LotusError::NotFound(format!("sequence {id}")))?;
    seq.steps = steps_on(conn, &seq.id)?;
    Ok(seq)
}

fn find_sequence_on(
    conn: &Connection,
    trigger: TriggerType,
    segment: Segment,
) -> Result<Option<Sequence>> {
    let seq = conn
        .query_row(
            &format!(
                "SELECT {SEQUENCE_COLUMNS} FROM sequences
                 WHERE is_active = 1 AND trigger_type = ?1 AND (segment = ?2 OR segment IS NULL)
                 ORDER BY (segment IS NULL), created_at, rowid
                 LIMIT 1"
            ),
            params![trigger.as_str(), segment.as_str()],
            sequence_from_row,
        )
        .optional()
        .map_err(db_err)?;
    match seq {
        Some(mut seq) => {
            seq.steps = steps_on(conn, &seq.id)?;
            Ok(Some(seq))
        }
        None => Ok(None),
    }
}

impl CrmDb {
    pub fn list_sequences(&self) -> Result<Vec<Sequence>> {
        let conn = self.conn()?;
        let mut sequences = {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {SEQUENCE_COLUMNS} FROM sequences ORDER BY trigger_type, name"
                ))
                .map_err(db_err)?;
            let rows = stmt.query_map([], sequence_from_row).map_err(db_err)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)?
        };
        for seq in &mut sequences {
            seq.steps = steps_on(&conn, &seq.id)?;
        }
        Ok(sequences)
    }

    pub fn get_sequence(&self, id: &str) -> Result<Sequence> {
        let conn = self.conn()?;
        get_sequence_on(&conn, id)
    }

    /// Create a sequence with its steps numbered in the given order.
    pub fn create_sequence(&self, input: &NewSequence, now: DateTime<Utc>) -> Result<Sequence> {
        if input.name.trim().is_empty() {
            return Err(LotusError::Validation("sequence name is required".into()));
        }
        if input.steps.is_empty() {
            return Err(LotusError::Validation("a sequence needs at least one step".into()));
        }
        for step in &input.steps {
            check_delay_hours(step.delay_hours)?;
        }

        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(db_err)?;
        for step in &input.steps {
            let exists: bool = tx
                .query_row(
                    "SELECT EXISTS(SELECT 1 FROM templates WHERE id = ?1)",
                    [&step.template_id],
                    |r| r.get(0),
                )
                .map_err(db_err)?;
            if !exists {
                return Err(LotusError::Validation(format!(
                    "unknown template '{}'",
                    step.template_id
                )));
            }
        }

        let id = new_id();
        let stamp = ts(now);
        tx.execute(
            "INSERT INTO sequences (id, name, description, trigger_type, segment, channel, is_active, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7, ?7)",
            params![
                id,
                input.name.trim(),
                input.description,
                input.trigger_type.as_str(),
                input.segment.map(|s| s.as_str()),
                input.channel.as_str(),
                stamp,
            ],
        )
        .map_err(db_err)?;
        for (i, step) in input.steps.iter().enumerate() {
            tx.execute(
                "INSERT INTO sequence_steps (id, sequence_id, template_id, step_order, delay_hours, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![new_id(), id, step.template_id, i as i64 + 1, step.delay_hours, stamp],
            )
            .map_err(db_err)?;
        }
        tx.commit().map_err(db_err)?;

        tracing::info!("🔁 Sequence created: {} ({})", input.name.trim(), input.trigger_type);
        get_sequence_on(&conn, &id)
    }

    pub fn set_sequence_active(&self, id: &str, active: bool, now: DateTime<Utc>) -> Result<Sequence> {
        let conn = self.conn()?;
        let changed = conn
            .execute(
                "UPDATE sequences SET is_active = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, active, ts(now)],
            )
            .map_err(db_err)?;
        if changed == 0 {
            return Err(LotusError::NotFound(format!("sequence {id}")));
        }
        get_sequence_on(&conn, id)
    }

    /// Steps go with it; history rows keep their content with a NULL sequence.
    pub fn delete_sequence(&self, id: &str) -> Result<()> {
        let conn = self.conn()?;
        let changed = conn
            .execute("DELETE FROM sequences WHERE id = ?1", [id])
            .map_err(db_err)?;
        if changed == 0 {
            return Err(LotusError::NotFound(format!("sequence {id}")));
        }
        Ok(())
    }

    /// The sequence a trigger would start for a segment, if any.
    pub fn find_sequence(&self, trigger: TriggerType, segment: Segment) -> Result<Option<Sequence>> {
        let conn = self.conn()?;
        find_sequence_on(&conn, trigger, segment)
    }

    /// Queue every active step of the matching sequence for a lead.
    ///
    /// Each step is scheduled at `now + delay_hours`; offsets are measured
    /// from the trigger, not from the previous step. Returns the new history
    /// ids in step order. Nothing is written unless every row is.
    pub fn trigger_sequence(
        &self,
        lead_id: &str,
        trigger: TriggerType,
        segment: Segment,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        let mut conn = self.conn()?;
        let lead = get_lead_on(&conn, lead_id)?;
        let seq = find_sequence_on(&conn, trigger, segment)?.ok_or_else(|| {
            LotusError::NotFound(format!("no active {trigger} sequence for segment {segment}"))
        })?;

        let tx = conn.transaction().map_err(db_err)?;
        let created = ts(now);
        let mut ids = Vec::with_capacity(seq.steps.len());
        {
            let mut tpl = tx
                .prepare("SELECT subject, content, is_active FROM templates WHERE id = ?1")
                .map_err(db_err)?;
            let mut insert = tx
                .prepare(
                    "INSERT INTO communication_history
                        (id, lead_id, channel, template_id, sequence_id, subject, content,
                         status, error_message, scheduled_at, sent_at, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'pending', NULL, ?8, NULL, ?9)",
                )
                .map_err(db_err)?;

            for step in &seq.steps {
                let row: Option<(String, String, bool)> = tpl
                    .query_row([&step.template_id], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))
                    .optional()
                    .map_err(db_err)?;
                let Some((subject, content, true)) = row else {
                    tracing::debug!("skipping step {} (template inactive)", step.step_order);
                    continue;
                };
                let id = new_id();
                let scheduled = Duration::try_hours(step.delay_hours)
                    .and_then(|d| now.checked_add_signed(d))
                    .map(ts)
                    .ok_or_else(|| {
                        LotusError::Validation(format!(
                            "step {} delay of {}h is out of range",
                            step.step_order, step.delay_hours
                        ))
                    })?;
                insert
                    .execute(params![
                        id,
                        lead.id,
                        seq.channel.as_str(),
                        step.template_id,
                        seq.id,
                        subject,
                        content,
                        scheduled,
                        created,
                    ])
                    .map_err(db_err)?;
                ids.push(id);
            }
        }
        tx.commit().map_err(db_err)?;

        tracing::info!(
            "📬 {} queued {} message(s) for lead {}",
            seq.name,
            ids.len(),
            lead.id
        );
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HistoryFilter;
    use crate::test_support::{add_lead, at, temp_db};
    use lotus_core::types::{Channel, MessageStatus, NewSequenceStep, NewTemplate};

    #[test]
    fn test_seeded_sequences_listed_with_steps() {
        let db = temp_db();
        let all = db.list_sequences().unwrap();
        assert_eq!(all.len(), 5);
        let intro = db.get_sequence("seq-intro-package").unwrap();
        let orders: Vec<i64> = intro.steps.iter().map(|s| s.step_order).collect();
        assert_eq!(orders, vec![1, 2, 3, 4, 5]);
        assert_eq!(intro.channel, Channel::WhatsApp);
    }

    #[test]
    fn test_segment_specific_sequence_wins() {
        let db = temp_db();
        let prenatal = db
            .find_sequence(TriggerType::NewLead, Segment::Prenatal)
            .unwrap()
            .unwrap();
        assert_eq!(prenatal.id, "seq-new-lead-prenatal");
        let seniors = db
            .find_sequence(TriggerType::NewLead, Segment::Seniors)
            .unwrap()
            .unwrap();
        assert_eq!(seniors.id, "seq-new-lead");
    }

    #[test]
    fn test_trigger_schedules_offsets_from_now() {
        let db = temp_db();
        let now = at("2026-05-01T09:00:00Z");
        let lead = add_lead(&db, "Maya", None, now);

        let ids = db
            .trigger_sequence(&lead.id, TriggerType::IntroPurchase, Segment::General, now)
            .unwrap();
        assert_eq!(ids.len(), 5);

        let rows: Vec<_> = ids.iter().map(|id| db.get_communication(id).unwrap()).collect();
        let offsets: Vec<i64> = rows
            .iter()
            .map(|c| (c.scheduled_at - now).num_hours())
            .collect();
        assert_eq!(offsets, vec![0, 72, 168, 336, 720]);
        assert!(rows.iter().all(|c| c.status == MessageStatus::Pending));
        assert!(rows.iter().all(|c| c.sequence_id.as_deref() == Some("seq-intro-package")));
        assert_eq!(rows[1].subject.as_deref(), Some("How was your first class?"));
    }

    #[test]
    fn test_trigger_skips_inactive_templates() {
        let db = temp_db();
        let now = at("2026-05-01T09:00:00Z");
        let lead = add_lead(&db, "Ravi", None, now);
        let t = db.get_template("intro-day-7").unwrap();
        db.update_template(
            &t.id,
            &NewTemplate {
                name: t.name,
                subject: t.subject,
                content: t.content,
                kind: t.kind,
                segment: t.segment,
                delay_hours: t.delay_hours,
                is_active: false,
            },
            now,
        )
        .unwrap();

        let ids = db
            .trigger_sequence(&lead.id, TriggerType::IntroPurchase, Segment::General, now)
            .unwrap();
        assert_eq!(ids.len(), 4);
    }

    #[test]
    fn test_trigger_missing_lead_or_sequence() {
        let db = temp_db();
        let now = Utc::now();
        assert!(matches!(
            db.trigger_sequence("ghost", TriggerType::NewLead, Segment::General, now),
            Err(LotusError::NotFound(_))
        ));

        let lead = add_lead(&db, "Lena", None, now);
        db.set_sequence_active("seq-first-class", false, now).unwrap();
        assert!(matches!(
            db.trigger_sequence(&lead.id, TriggerType::FirstClass, Segment::General, now),
            Err(LotusError::NotFound(_))
        ));
        let none = db
            .list_communications(&HistoryFilter {
                lead_id: Some(lead.id.clone()),
                ..Default::default()
            })
            .unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_create_and_delete_sequence() {
        let db = temp_db();
        let now = Utc::now();
        let seq = db
            .create_sequence(
                &NewSequence {
                    name: "Seniors Welcome".into(),
                    description: Some("gentle start".into()),
                    trigger_type: TriggerType::NewLead,
                    segment: Some(Segment::Seniors),
                    channel: Channel::Email,
                    steps: vec![
                        NewSequenceStep { template_id: "welcome-general".into(), delay_hours: 0 },
                        NewSequenceStep { template_id: "post-class".into(), delay_hours: 24 },
                    ],
                },
                now,
            )
            .unwrap();
        assert_eq!(seq.steps.len(), 2);
        assert_eq!(seq.steps[1].step_order, 2);

        let lead = add_lead(&db, "Olga", Some(Segment::Seniors), now);
        let queued = db
            .trigger_sequence(&lead.id, TriggerType::NewLead, Segment::Seniors, now)
            .unwrap();
        assert_eq!(db.get_communication(&queued[0]).unwrap().sequence_id, Some(seq.id.clone()));

        db.delete_sequence(&seq.id).unwrap();
        assert!(matches!(db.get_sequence(&seq.id), Err(LotusError::NotFound(_))));
    }

    #[test]
    fn test_create_sequence_rejects_unknown_template() {
        let db = temp_db();
        let err = db
            .create_sequence(
                &NewSequence {
                    name: "Broken".into(),
                    description: None,
                    trigger_type: TriggerType::FirstClass,
                    segment: None,
                    channel: Channel::WhatsApp,
                    steps: vec![NewSequenceStep { template_id: "missing".into(), delay_hours: 1 }],
                },
                Utc::now(),
            )
            .unwrap_err();
        assert!(matches!(err, LotusError::Validation(_)));
        assert_eq!(db.list_sequences().unwrap().len(), 5);
    }

    #[test]
    fn test_out_of_range_delays_are_rejected_without_poisoning() {
        let db = temp_db();
        let now = Utc::now();
        let err = db
            .create_sequence(
                &NewSequence {
                    name: "Far future".into(),
                    description: None,
                    trigger_type: TriggerType::FirstClass,
                    segment: None,
                    channel: Channel::WhatsApp,
                    steps: vec![NewSequenceStep {
                        template_id: "post-class".into(),
                        delay_hours: 10_000_000_000,
                    }],
                },
                now,
            )
            .unwrap_err();
        assert!(matches!(err, LotusError::Validation(_)));

        // A step row written before the bound existed must not panic the trigger.
        db.conn()
            .unwrap()
            .execute(
                "UPDATE sequence_steps SET delay_hours = 10000000000 WHERE sequence_id = 'seq-first-class'",
                [],
            )
            .unwrap();
        let lead = add_lead(&db, "Iris", None, now);
        assert!(matches!(
            db.trigger_sequence(&lead.id, TriggerType::FirstClass, Segment::General, now),
            Err(LotusError::Validation(_))
        ));
        let queued = db
            .list_communications(&HistoryFilter {
                lead_id: Some(lead.id.clone()),
                ..Default::default()
            })
            .unwrap();
        assert!(queued.is_empty());
        assert_eq!(db.list_sequences().unwrap().len(), 5);
    }
}
