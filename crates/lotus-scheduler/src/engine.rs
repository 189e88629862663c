//! Scheduler engine: one automation pass (queue, re-engagement, lead aging)
//! and the tokio loop that repeats it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use lotus_channels::SenderSet;
use lotus_core::config::SchedulerConfig;
use lotus_db::CrmDb;
use serde::{Deserialize, Serialize};

use crate::lifecycle;
use crate::queue::{QueueProcessor, QueueReport};

/// Summary of one `run_once` pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerReport {
    /// False when any step errored; the other steps still ran.
    pub success: bool,
    pub queue_processed: usize,
    pub queue_failed: usize,
    pub reengagement_triggered: usize,
    pub leads_aged: usize,
    pub timestamp: DateTime<Utc>,
}

pub struct SchedulerEngine {
    db: Arc<CrmDb>,
    queue: QueueProcessor,
    config: SchedulerConfig,
}

impl SchedulerEngine {
    pub fn new(db: Arc<CrmDb>, senders: SenderSet, config: SchedulerConfig) -> Self {
        let queue = QueueProcessor::new(db.clone(), senders, config.batch_size);
        Self { db, queue, config }
    }

    pub fn queue(&self) -> &QueueProcessor {
        &self.queue
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Drain one batch of due messages (all channels together), re-engage
    /// inactive customers, then age out stale leads.
    pub async fn run_once(&self, now: DateTime<Utc>) -> SchedulerReport {
        let mut success = true;

        let queue = match self.queue.process(None, now).await {
            Ok(report) => report,
            Err(e) => {
                success = false;
                tracing::error!("❌ Queue processing error: {e}");
                QueueReport::default()
            }
        };

        let reengagement_triggered = match lifecycle::reengage_inactive(&self.db, &self.config, now) {
            Ok(n) => n,
            Err(e) => {
                success = false;
                tracing::error!("❌ Error finding inactive leads: {e}");
                0
            }
        };

        let leads_aged = match lifecycle::expire_stale_leads(&self.db, &self.config, now) {
            Ok(n) => n,
            Err(e) => {
                success = false;
                tracing::error!("❌ Error updating lead statuses: {e}");
                0
            }
        };

        let report = SchedulerReport {
            success,
            queue_processed: queue.processed,
            queue_failed: queue.failed,
            reengagement_triggered,
            leads_aged,
            timestamp: now,
        };
        tracing::info!(
            "Scheduler run complete: sent={} failed={} reengaged={} aged={}",
            report.queue_processed,
            report.queue_failed,
            report.reengagement_triggered,
            report.leads_aged
        );
        report
    }
}

/// Run the engine forever on a fixed interval. The first pass happens
/// immediately.
pub async fn spawn_scheduler(engine: Arc<SchedulerEngine>, check_interval_secs: u64) {
    tracing::info!("⏰ Scheduler started (check every {}s)", check_interval_secs);

    let mut interval =
        tokio::time::interval(std::time::Duration::from_secs(check_interval_secs.max(1)));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        let report = engine.run_once(Utc::now()).await;
        if !report.success {
            tracing::warn!("⚠️ Scheduler pass finished with errors");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::testing::MockSender;
    use chrono::Duration;
    use lotus_core::types::{
        Channel, LeadStatus, MessageStatus, NewCommunication, NewLead, Segment, TriggerType,
    };

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn new_lead(name: &str) -> NewLead {
        NewLead {
            name: name.into(),
            email: format!("{}@example.com", name.to_lowercase()),
            phone: "+15550001111".into(),
            referral_source: "Instagram".into(),
            segment: None,
            notes: None,
        }
    }

    #[tokio::test]
    async fn test_run_once_covers_every_step() {
        let db = Arc::new(CrmDb::open_in_memory().unwrap());
        let now = at("2026-10-01T06:00:00Z");

        // Due welcome message.
        let fresh = db.insert_lead(&new_lead("Fresh"), now).unwrap();
        db.trigger_sequence(&fresh.id, TriggerType::NewLead, Segment::General, now)
            .unwrap();
        // Stale lead.
        let stale = db.insert_lead(&new_lead("Stale"), now - Duration::days(45)).unwrap();
        // Converted customer gone quiet.
        let quiet = db.insert_lead(&new_lead("Quiet"), now - Duration::days(200)).unwrap();
        db.update_lead_status(&quiet.id, LeadStatus::Contacted, now - Duration::days(100))
            .unwrap();
        db.update_lead_status(&quiet.id, LeadStatus::Converted, now - Duration::days(100))
            .unwrap();

        let whatsapp = Arc::new(MockSender::ok(Channel::WhatsApp));
        let engine = SchedulerEngine::new(
            db.clone(),
            SenderSet::new().with(whatsapp.clone()),
            SchedulerConfig::default(),
        );

        let report = engine.run_once(now).await;
        assert!(report.success);
        assert_eq!(report.queue_processed, 1);
        assert_eq!(report.queue_failed, 0);
        assert_eq!(report.reengagement_triggered, 1);
        assert_eq!(report.leads_aged, 1);
        assert_eq!(report.timestamp, now);

        assert_eq!(db.get_lead(&stale.id).unwrap().status, LeadStatus::Lost);
        assert_eq!(db.get_lead(&fresh.id).unwrap().status, LeadStatus::New);

        // The re-engagement message is due immediately and goes out next pass.
        let next = engine.run_once(now + Duration::minutes(5)).await;
        assert_eq!(next.queue_processed, 1);
        assert_eq!(next.reengagement_triggered, 0);
        let history = db
            .list_communications(&lotus_db::HistoryFilter {
                lead_id: Some(quiet.id.clone()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(history[0].status, MessageStatus::Sent);
        assert_eq!(whatsapp.sent_count(), 2);
    }

    #[tokio::test]
    async fn test_empty_run() {
        let db = Arc::new(CrmDb::open_in_memory().unwrap());
        let engine = SchedulerEngine::new(db, SenderSet::new(), SchedulerConfig::default());
        let report = engine.run_once(Utc::now()).await;
        assert!(report.success);
        assert_eq!(report.queue_processed + report.queue_failed, 0);
        assert_eq!(report.leads_aged, 0);
    }

    #[tokio::test]
    async fn test_run_once_sends_one_batch_across_channels() {
        let db = Arc::new(CrmDb::open_in_memory().unwrap());
        let now = at("2026-10-01T06:00:00Z");
        let lead = db.insert_lead(&new_lead("Busy"), now).unwrap();
        for channel in [Channel::WhatsApp, Channel::Email] {
            for i in 0..10 {
                db.enqueue(
                    &NewCommunication {
                        lead_id: lead.id.clone(),
                        channel,
                        template_id: None,
                        sequence_id: None,
                        subject: Some("Hello".into()),
                        content: format!("{channel} {i}"),
                        scheduled_at: now - Duration::minutes(30 - i),
                    },
                    now,
                )
                .unwrap();
            }
        }

        let whatsapp = Arc::new(MockSender::ok(Channel::WhatsApp));
        let email = Arc::new(MockSender::ok(Channel::Email));
        let engine = SchedulerEngine::new(
            db.clone(),
            SenderSet::new().with(whatsapp.clone()).with(email.clone()),
            SchedulerConfig::default(),
        );
        assert_eq!(engine.config().batch_size, 10);

        let first = engine.run_once(now).await;
        assert_eq!(first.queue_processed + first.queue_failed, 10);

        let second = engine.run_once(now).await;
        assert_eq!(second.queue_processed, 10);
        assert_eq!(whatsapp.sent_count() + email.sent_count(), 20);

        let third = engine.run_once(now).await;
        assert_eq!(third.queue_processed, 0);
    }
}
