//! Communication history: the outbound queue and its delivery log.

use chrono::{DateTime, Utc};
use lotus_core::error::{LotusError, Result};
use lotus_core::types::{Channel, Communication, MessageStatus, NewCommunication, ReadyMessage};
use rusqlite::{Connection, OptionalExtension, params};
use serde::Deserialize;

use crate::{CrmDb, col_enum, col_ts, col_ts_opt, db_err, new_id, ts};

const HISTORY_COLUMNS: &str = "id, lead_id, channel, template_id, sequence_id, subject, content, \
     status, error_message, scheduled_at, sent_at, created_at";

/// Filter for the communications view. Every field is optional.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryFilter {
    #[serde(default)]
    pub status: Option<MessageStatus>,
    #[serde(default)]
    pub channel: Option<Channel>,
    #[serde(default)]
    pub lead_id: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    100
}

impl Default for HistoryFilter {
    fn default() -> Self {
        Self {
            status: None,
            channel: None,
            lead_id: None,
            limit: default_limit(),
        }
    }
}

fn communication_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Communication> {
    Ok(Communication {
        id: row.get(0)?,
        lead_id: row.get(1)?,
        channel: col_enum(row, 2)?,
        template_id: row.get(3)?,
        sequence_id: row.get(4)?,
        subject: row.get(5)?,
        content: row.get(6)?,
        status: col_enum(row, 7)?,
        error_message: row.get(8)?,
        scheduled_at: col_ts(row, 9)?,
        sent_at: col_ts_opt(row, 10)?,
        created_at: col_ts(row, 11)?,
    })
}

fn get_communication_on(conn: &Connection, id: &str) -> Result<Communication> {
    conn.query_row(
        &format!("SELECT {HISTORY_COLUMNS} FROM communication_history WHERE id = ?1"),
        [id],
        communication_from_row,
    )
    .optional()
    .map_err(db_err)?
    .ok_or_else(|| LotusError::NotFound(format!("communication {id}")))
}

impl CrmDb {
    /// Queue one pending message outside any sequence.
    pub fn enqueue(&self, msg: &NewCommunication, now: DateTime<Utc>) -> Result<String> {
        let conn = self.conn()?;
        let id = new_id();
        conn.execute(
            "INSERT INTO communication_history
                (id, lead_id, channel, template_id, sequence_id, subject, content,
                 status, error_message, scheduled_at, sent_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'pending', NULL, ?8, NULL, ?9)",
            params![
                id,
                msg.lead_id,
                msg.channel.as_str(),
                msg.template_id,
                msg.sequence_id,
                msg.subject,
                msg.content,
                ts(msg.scheduled_at),
                ts(now),
            ],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(ref f, _)
                if f.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                LotusError::NotFound(format!("lead {}", msg.lead_id))
            }
            other => db_err(other),
        })?;
        Ok(id)
    }

    /// Pending messages due at `now`, oldest first, joined with their lead.
    pub fn ready_messages(
        &self,
        now: DateTime<Utc>,
        channel: Option<Channel>,
        limit: usize,
    ) -> Result<Vec<ReadyMessage>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT h.id, h.lead_id, h.channel, h.template_id, h.sequence_id, h.subject,
                        h.content, h.scheduled_at, l.name, l.email, l.phone
                 FROM communication_history h
                 JOIN leads l ON l.id = h.lead_id
                 WHERE h.status = 'pending'
                   AND h.scheduled_at <= ?1
                   AND (?2 IS NULL OR h.channel = ?2)
                 ORDER BY h.scheduled_at ASC, h.created_at ASC, h.rowid ASC
                 LIMIT ?3",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(
                params![ts(now), channel.map(|c| c.as_str()), limit as i64],
                |r| {
                    Ok(ReadyMessage {
                        id: r.get(0)?,
                        lead_id: r.get(1)?,
                        channel: col_enum(r, 2)?,
                        template_id: r.get(3)?,
                        sequence_id: r.get(4)?,
                        subject: r.get(5)?,
                        content: r.get(6)?,
                        scheduled_at: col_ts(r, 7)?,
                        lead_name: r.get(8)?,
                        lead_email: r.get(9)?,
                        lead_phone: r.get(10)?,
                    })
                },
            )
            .map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    /// Mark a row sent and stamp its lead's `last_contacted_at`.
    pub fn mark_sent(&self, id: &str, now: DateTime<Utc>) -> Result<()> {
        let mut conn = self.conn()?;
        let stamp = ts(now);
        let tx = conn.transaction().map_err(db_err)?;
        let lead_id: Option<String> = tx
            .query_row(
                "SELECT lead_id FROM communication_history WHERE id = ?1",
                [id],
                |r| r.get(0),
            )
            .optional()
            .map_err(db_err)?;
        let Some(lead_id) = lead_id else {
            return Err(LotusError::NotFound(format!("communication {id}")));
        };
        tx.execute(
            "UPDATE communication_history SET status = 'sent', sent_at = ?2, error_message = NULL
             WHERE id = ?1",
            params![id, stamp],
        )
        .map_err(db_err)?;
        tx.execute(
            "UPDATE leads SET last_contacted_at = ?2, updated_at = ?2 WHERE id = ?1",
            params![lead_id, stamp],
        )
        .map_err(db_err)?;
        tx.commit().map_err(db_err)
    }

    pub fn mark_failed(&self, id: &str, error: &str) -> Result<()> {
        let conn = self.conn()?;
        let changed = conn
            .execute(
                "UPDATE communication_history SET status = 'failed', error_message = ?2 WHERE id = ?1",
                params![id, error],
            )
            .map_err(db_err)?;
        if changed == 0 {
            return Err(LotusError::NotFound(format!("communication {id}")));
        }
        Ok(())
    }

    pub fn get_communication(&self, id: &str) -> Result<Communication> {
        let conn = self.conn()?;
        get_communication_on(&conn, id)
    }

    /// Newest first, capped at `filter.limit`.
    pub fn list_communications(&self, filter: &HistoryFilter) -> Result<Vec<Communication>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {HISTORY_COLUMNS} FROM communication_history
                 WHERE (?1 IS NULL OR status = ?1)
                   AND (?2 IS NULL OR channel = ?2)
                   AND (?3 IS NULL OR lead_id = ?3)
                 ORDER BY created_at DESC, scheduled_at DESC, rowid DESC
                 LIMIT ?4"
            ))
            .map_err(db_err)?;
        let rows = stmt
            .query_map(
                params![
                    filter.status.map(|s| s.as_str()),
                    filter.channel.map(|c| c.as_str()),
                    filter.lead_id,
                    filter.limit as i64,
                ],
                communication_from_row,
            )
            .map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }
}
