//! Public lead-capture form.

use chrono::{DateTime, Utc};
use lotus_core::error::{LotusError, Result};
use lotus_core::template;
use lotus_core::types::{
    Channel, Lead, NewCommunication, NewLead, Segment, TemplateKind, TriggerType,
};
use lotus_db::CrmDb;
use serde::{Deserialize, Serialize};

/// Raw form submission. Field names accept both snake_case and the
/// camelCase used by browser forms.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LeadForm {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default, alias = "referralSource", alias = "source")]
    pub referral_source: String,
    #[serde(default)]
    pub segment: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// How the welcome message got queued, if at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum WelcomePath {
    Sequence,
    FallbackTemplate,
    None,
}

#[derive(Debug, Clone, Serialize)]
pub struct CaptureOutcome {
    pub lead: Lead,
    pub welcome: WelcomePath,
    pub queued: Vec<String>,
}

/// `local@domain.tld` with no whitespace.
pub fn looks_like_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }
    match domain.rsplit_once('.') {
        Some((host, tld)) => !host.is_empty() && !tld.is_empty(),
        None => false,
    }
}

/// Check required fields and normalise the submission.
pub fn validate(form: &LeadForm) -> Result<NewLead> {
    let required = [
        ("name", &form.name),
        ("email", &form.email),
        ("phone", &form.phone),
        ("referral source", &form.referral_source),
    ];
    let missing: Vec<&str> = required
        .iter()
        .filter(|(_, v)| v.trim().is_empty())
        .map(|(k, _)| *k)
        .collect();
    if !missing.is_empty() {
        return Err(LotusError::Validation(format!(
            "missing required field(s): {}",
            missing.join(", ")
        )));
    }

    let email = form.email.trim();
    if !looks_like_email(email) {
        return Err(LotusError::Validation(format!("invalid email address '{email}'")));
    }

    let segment = match form.segment.as_deref().map(str::trim) {
        None | Some("") => Segment::General,
        Some(s) => s.parse()?,
    };

    Ok(NewLead {
        name: form.name.trim().to_string(),
        email: email.to_string(),
        phone: form.phone.trim().to_string(),
        referral_source: form.referral_source.trim().to_string(),
        segment: Some(segment),
        notes: form
            .notes
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(String::from),
    })
}

/// Store a lead and queue its welcome.
///
/// The `new-lead` sequence for the lead's segment is preferred. Without one,
/// the best welcome template is queued as an immediate WhatsApp message with
/// the name already filled in. Queueing problems are logged; the lead is
/// kept either way.
pub fn capture_lead(db: &CrmDb, form: &LeadForm, now: DateTime<Utc>) -> Result<CaptureOutcome> {
    let new_lead = validate(form)?;
    let lead = db.insert_lead(&new_lead, now)?;
    let segment = lead.segment.unwrap_or_default();
    tracing::info!("🧘 New lead: {} via {} ({})", lead.name, lead.referral_source, segment);

    let (welcome, queued) = match db.trigger_sequence(&lead.id, TriggerType::NewLead, segment, now) {
        Ok(ids) => (WelcomePath::Sequence, ids),
        Err(LotusError::NotFound(_)) => match queue_fallback_welcome(db, &lead, segment, now) {
            Ok(Some(id)) => (WelcomePath::FallbackTemplate, vec![id]),
            Ok(None) => {
                tracing::warn!("⚠️ No welcome template for segment {segment}");
                (WelcomePath::None, Vec::new())
            }
            Err(e) => {
                tracing::warn!("⚠️ Failed to queue welcome for {}: {e}", lead.id);
                (WelcomePath::None, Vec::new())
            }
        },
        Err(e) => {
            tracing::warn!("⚠️ Failed to trigger welcome sequence for {}: {e}", lead.id);
            (WelcomePath::None, Vec::new())
        }
    };

    Ok(CaptureOutcome {
        lead,
        welcome,
        queued,
    })
}

fn queue_fallback_welcome(
    db: &CrmDb,
    lead: &Lead,
    segment: Segment,
    now: DateTime<Utc>,
) -> Result<Option<String>> {
    let Some(tpl) = db.best_template(TemplateKind::Welcome, segment)? else {
        return Ok(None);
    };
    let content = template::render(&tpl.content, &[("name", lead.name.as_str())]);
    let id = db.enqueue(
        &NewCommunication {
            lead_id: lead.id.clone(),
            channel: Channel::WhatsApp,
            template_id: Some(tpl.id),
            sequence_id: None,
            subject: Some(tpl.subject),
            content,
            scheduled_at: now,
        },
        now,
    )?;
    Ok(Some(id))
}
