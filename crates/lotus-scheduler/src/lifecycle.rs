//! Lead lifecycle automation: re-engaging quiet customers and aging out
//! leads that never progressed.

use chrono::{DateTime, Duration, Utc};
use lotus_core::config::SchedulerConfig;
use lotus_core::error::Result;
use lotus_core::types::TriggerType;
use lotus_db::CrmDb;

/// Start the `inactive-90-days` sequence for converted leads not contacted
/// in `inactive_days` and with no message in the cooldown window. Returns how
/// many leads actually got a sequence.
pub fn reengage_inactive(db: &CrmDb, config: &SchedulerConfig, now: DateTime<Utc>) -> Result<usize> {
    let contacted_before = now - Duration::days(config.inactive_days);
    let quiet_since = now - Duration::days(config.reengagement_cooldown_days);
    let candidates = db.inactive_converted_leads(contacted_before, quiet_since)?;
    if candidates.is_empty() {
        return Ok(0);
    }
    tracing::info!("Found {} inactive lead(s) for re-engagement", candidates.len());

    let mut triggered = 0;
    for lead in &candidates {
        let segment = lead.segment.unwrap_or_default();
        match db.trigger_sequence(&lead.id, TriggerType::Inactive90Days, segment, now) {
            Ok(_) => {
                triggered += 1;
                tracing::info!("💌 Re-engagement started for {}", lead.name);
            }
            Err(e) => tracing::warn!("⚠️ Re-engagement failed for lead {}: {e}", lead.id),
        }
    }
    Ok(triggered)
}

/// Move `new` leads older than `lead_expiry_days` to `lost`.
pub fn expire_stale_leads(db: &CrmDb, config: &SchedulerConfig, now: DateTime<Utc>) -> Result<usize> {
    let aged = db.expire_new_leads(now - Duration::days(config.lead_expiry_days), now)?;
    if aged > 0 {
        tracing::info!("🍂 {} stale lead(s) marked lost", aged);
    }
    Ok(aged)
}
