//! Queue processor: deliver pending messages whose send time has arrived.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use lotus_channels::SenderSet;
use lotus_core::error::{LotusError, Result};
use lotus_core::types::{Channel, OutboundMessage, ReadyMessage};
use lotus_db::CrmDb;
use serde::{Deserialize, Serialize};

/// Outcome of one processing pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueReport {
    /// Messages delivered.
    pub processed: usize,
    pub failed: usize,
}

pub struct QueueProcessor {
    db: Arc<CrmDb>,
    senders: SenderSet,
    batch_size: usize,
}

/// What goes into `error_message` for a failed row.
fn failure_reason(e: &LotusError) -> String {
    match e {
        LotusError::Channel(msg) => msg.clone(),
        other => other.to_string(),
    }
}

fn recipient(msg: &ReadyMessage) -> std::result::Result<String, String> {
    let (to, what) = match msg.channel {
        Channel::WhatsApp => (msg.lead_phone.trim(), "phone number"),
        Channel::Email => (msg.lead_email.trim(), "email address"),
    };
    if to.is_empty() {
        Err(format!("lead has no {what}"))
    } else {
        Ok(to.to_string())
    }
}

impl QueueProcessor {
    pub fn new(db: Arc<CrmDb>, senders: SenderSet, batch_size: usize) -> Self {
        Self {
            db,
            senders,
            batch_size: batch_size.max(1),
        }
    }

    /// Send up to one batch of due messages, oldest first. Each row gets
    /// exactly one attempt; failures are terminal.
    pub async fn process(&self, channel: Option<Channel>, now: DateTime<Utc>) -> Result<QueueReport> {
        let ready = self.db.ready_messages(now, channel, self.batch_size)?;
        let mut report = QueueReport::default();
        if ready.is_empty() {
            return Ok(report);
        }
        tracing::info!("📨 Processing {} queued message(s)", ready.len());

        for msg in &ready {
            match self.deliver(msg).await {
                Ok(provider_id) => {
                    report.processed += 1;
                    tracing::debug!("sent {} via {} ({})", msg.id, msg.channel, provider_id);
                    if let Err(e) = self.db.mark_sent(&msg.id, now) {
                        tracing::error!("❌ Sent {} but could not record it: {e}", msg.id);
                    }
                }
                Err(reason) => {
                    report.failed += 1;
                    tracing::warn!("⚠️ Message {} to lead {} failed: {}", msg.id, msg.lead_id, reason);
                    if let Err(e) = self.db.mark_failed(&msg.id, &reason) {
                        tracing::error!("❌ Could not mark {} failed: {e}", msg.id);
                    }
                }
            }
        }

        tracing::info!(
            "Queue pass complete. Processed: {}, Failed: {}",
            report.processed,
            report.failed
        );
        Ok(report)
    }

    async fn deliver(&self, msg: &ReadyMessage) -> std::result::Result<String, String> {
        let sender = self
            .senders
            .get(msg.channel)
            .ok_or_else(|| format!("no sender configured for {}", msg.channel))?;
        let to = recipient(msg)?;
        let outbound = OutboundMessage {
            lead_id: msg.lead_id.clone(),
            to,
            name: msg.lead_name.clone(),
            subject: msg.subject.clone(),
            content: msg.content.clone(),
        };
        sender
            .send(&outbound)
            .await
            .map(|receipt| receipt.provider_id)
            .map_err(|e| failure_reason(&e))
    }
}


#[cfg(test)]
mod tests {
    use super::testing::MockSender;
    use super::*;
    use chrono::Duration;
    use lotus_core::types::{MessageStatus, NewCommunication, NewLead, Segment, TriggerType};

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn lead(db: &CrmDb, name: &str, phone: &str, now: DateTime<Utc>) -> String {
        db.insert_lead(
            &NewLead {
                name: name.into(),
                email: format!("{}@example.com", name.to_lowercase()),
                phone: phone.into(),
                referral_source: "Google".into(),
                segment: None,
                notes: None,
            },
            now,
        )
        .unwrap()
        .id
    }

    #[tokio::test]
    async fn test_due_messages_sent_and_lead_touched() {
        let db = Arc::new(CrmDb::open_in_memory().unwrap());
        let now = at("2026-04-01T10:00:00Z");
        let id = lead(&db, "Maya", "+15550001111", now);
        let queued = db
            .trigger_sequence(&id, TriggerType::IntroPurchase, Segment::General, now)
            .unwrap();

        let whatsapp = Arc::new(MockSender::ok(Channel::WhatsApp));
        let processor = QueueProcessor::new(db.clone(), SenderSet::new().with(whatsapp.clone()), 10);

        let report = processor.process(None, now).await.unwrap();
        assert_eq!(report, QueueReport { processed: 1, failed: 0 });
        assert_eq!(whatsapp.sent_count(), 1);
        {
            let sent = whatsapp.sent.lock().unwrap();
            assert_eq!(sent[0].to, "+15550001111");
            assert_eq!(sent[0].name, "Maya");
        }

        let first = db.get_communication(&queued[0]).unwrap();
        assert_eq!(first.status, MessageStatus::Sent);
        assert_eq!(db.get_lead(&id).unwrap().last_contacted_at, Some(now));
        // Later steps are still in the future.
        assert_eq!(db.get_communication(&queued[1]).unwrap().status, MessageStatus::Pending);

        let again = processor.process(None, now).await.unwrap();
        assert_eq!(again, QueueReport::default());
    }

    #[tokio::test]
    async fn test_failures_are_recorded_and_not_retried() {
        let db = Arc::new(CrmDb::open_in_memory().unwrap());
        let now = at("2026-04-01T10:00:00Z");
        let id = lead(&db, "Ravi", "+15550002222", now);
        let msg_id = db
            .enqueue(
                &NewCommunication {
                    lead_id: id,
                    channel: Channel::WhatsApp,
                    template_id: None,
                    sequence_id: None,
                    subject: None,
                    content: "Hi {{name}}".into(),
                    scheduled_at: now - Duration::minutes(1),
                },
                now,
            )
            .unwrap();

        let sender = Arc::new(MockSender::failing(Channel::WhatsApp, "Twilio credentials not configured"));
        let processor = QueueProcessor::new(db.clone(), SenderSet::new().with(sender.clone()), 10);

        let report = processor.process(Some(Channel::WhatsApp), now).await.unwrap();
        assert_eq!(report, QueueReport { processed: 0, failed: 1 });
        let row = db.get_communication(&msg_id).unwrap();
        assert_eq!(row.status, MessageStatus::Failed);
        assert_eq!(row.error_message.as_deref(), Some("Twilio credentials not configured"));

        processor.process(None, now + Duration::hours(1)).await.unwrap();
        assert_eq!(sender.sent_count(), 1);
    }

    #[tokio::test]
    async fn test_missing_sender_or_recipient_fails_row() {
        let db = Arc::new(CrmDb::open_in_memory().unwrap());
        let now = at("2026-04-01T10:00:00Z");
        let id = lead(&db, "Lena", "   ", now);
        let base = NewCommunication {
            lead_id: id,
            channel: Channel::WhatsApp,
            template_id: None,
            sequence_id: None,
            subject: Some("Hello".into()),
            content: "Hi".into(),
            scheduled_at: now,
        };
        let no_phone = db.enqueue(&base, now).unwrap();
        let no_sender = db
            .enqueue(&NewCommunication { channel: Channel::Email, ..base.clone() }, now)
            .unwrap();

        let processor = QueueProcessor::new(
            db.clone(),
            SenderSet::new().with(Arc::new(MockSender::ok(Channel::WhatsApp))),
            10,
        );
        let report = processor.process(None, now).await.unwrap();
        assert_eq!(report.failed, 2);

        assert_eq!(
            db.get_communication(&no_phone).unwrap().error_message.as_deref(),
            Some("lead has no phone number")
        );
        assert_eq!(
            db.get_communication(&no_sender).unwrap().error_message.as_deref(),
            Some("no sender configured for email")
        );
    }

    #[tokio::test]
    async fn test_batch_size_caps_a_pass() {
        let db = Arc::new(CrmDb::open_in_memory().unwrap());
        let now = at("2026-04-01T10:00:00Z");
        let id = lead(&db, "Bo", "+15550003333", now);
        for i in 0..5 {
            db.enqueue(
                &NewCommunication {
                    lead_id: id.clone(),
                    channel: Channel::WhatsApp,
                    template_id: None,
                    sequence_id: None,
                    subject: None,
                    content: format!("message {i}"),
                    scheduled_at: now - Duration::minutes(10 - i),
                },
                now,
            )
            .unwrap();
        }
        let sender = Arc::new(MockSender::ok(Channel::WhatsApp));
        let processor = QueueProcessor::new(db.clone(), SenderSet::new().with(sender.clone()), 2);

        assert_eq!(processor.process(None, now).await.unwrap().processed, 2);
        let sent = sender.sent.lock().unwrap();
        assert_eq!(sent[0].content, "message 0");
        assert_eq!(sent[1].content, "message 1");
    }
}
