//! Dashboard analytics.

use lotus_core::error::Result;
use lotus_core::types::{Analytics, ShareCount};
use rusqlite::Connection;

use crate::{CrmDb, db_err, percentage};

fn shares(conn: &Connection, sql: &str, total: usize) -> Result<Vec<ShareCount>> {
    let mut stmt = conn.prepare(sql).map_err(db_err)?;
    let rows = stmt
        .query_map([], |r| {
            let key: String = r.get(0)?;
            let count = r.get::<_, i64>(1)? as usize;
            Ok(ShareCount {
                key,
                count,
                percentage: percentage(count, total),
            })
        })
        .map_err(db_err)?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
}

impl CrmDb {
    /// Lead funnel and delivery numbers across the whole database.
    pub fn analytics(&self) -> Result<Analytics> {
        let conn = self.conn()?;

        let (total_leads, new_leads, converted_leads) = conn
            .query_row(
                "SELECT COUNT(*),
                        COALESCE(SUM(status = 'new'), 0),
                        COALESCE(SUM(status = 'converted'), 0)
                 FROM leads",
                [],
                |r| {
                    Ok((
                        r.get::<_, i64>(0)? as usize,
                        r.get::<_, i64>(1)? as usize,
                        r.get::<_, i64>(2)? as usize,
                    ))
                },
            )
            .map_err(db_err)?;

        let (total_messages, messages_sent, messages_failed, messages_pending) = conn
            .query_row(
                "SELECT COUNT(*),
                        COALESCE(SUM(status = 'sent'), 0),
                        COALESCE(SUM(status = 'failed'), 0),
                        COALESCE(SUM(status = 'pending'), 0)
                 FROM communication_history",
                [],
                |r| {
                    Ok((
                        r.get::<_, i64>(0)? as usize,
                        r.get::<_, i64>(1)? as usize,
                        r.get::<_, i64>(2)? as usize,
                        r.get::<_, i64>(3)? as usize,
                    ))
                },
            )
            .map_err(db_err)?;

        let lead_sources = shares(
            &conn,
            "SELECT referral_source, COUNT(*) AS n FROM leads
             GROUP BY referral_source ORDER BY n DESC, referral_source ASC",
            total_leads,
        )?;
        let segment_breakdown = shares(
            &conn,
            "SELECT COALESCE(segment, 'general') AS seg, COUNT(*) AS n FROM leads
             GROUP BY seg ORDER BY n DESC, seg ASC",
            total_leads,
        )?;

        Ok(Analytics {
            total_leads,
            new_leads,
            converted_leads,
            conversion_rate: percentage(converted_leads, total_leads),
            total_messages,
            messages_sent,
            messages_failed,
            messages_pending,
            delivery_rate: percentage(messages_sent, total_messages),
            lead_sources,
            segment_breakdown,
        })
    }
}
