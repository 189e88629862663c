//! Domain types shared by the store, the channels and the gateway.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::LotusError;

/// Declares a string-backed enum with `as_str`, `Display` and `FromStr`.
/// The first string is canonical; extra strings are accepted aliases.
macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $($variant:ident => $text:literal $(| $alias:literal)*),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(
                #[serde(rename = $text $(, alias = $alias)*)]
                $variant,
            )+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = LotusError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim() {
                    $($text $(| $alias)* => Ok($name::$variant),)+
                    other => Err(LotusError::Validation(format!(
                        "unknown {} '{}'",
                        stringify!($name),
                        other
                    ))),
                }
            }
        }
    };
}

pub(crate) use string_enum;

string_enum! {
    /// Pipeline position of a lead.
    pub enum LeadStatus {
        New => "new",
        Contacted => "contacted",
        InProgress => "in-progress",
        Converted => "converted",
        Lost => "lost",
    }
}

string_enum! {
    /// Customer classification used to pick template variants.
    pub enum Segment {
        Prenatal => "prenatal",
        Seniors => "seniors",
        YoungProfessionals => "young-professionals",
        General => "general",
    }
}

string_enum! {
    /// Lifecycle event that starts a sequence.
    pub enum TriggerType {
        NewLead => "new-lead",
        IntroPurchase => "intro-purchase" | "intro-package-purchased",
        FirstClass => "first-class" | "first-class-attended",
        Inactive90Days => "inactive-90-days",
    }
}

string_enum! {
    pub enum TemplateKind {
        Welcome => "welcome",
        FollowUp => "follow-up",
        ReEngagement => "re-engagement",
        PostClass => "post-class",
        IntroPackage => "intro-package",
    }
}

string_enum! {
    /// Outbound delivery channel.
    pub enum Channel {
        WhatsApp => "whatsapp",
        Email => "email",
    }
}

string_enum! {
    pub enum MessageStatus {
        Pending => "pending",
        Sent => "sent",
        Failed => "failed",
    }
}

impl Default for Segment {
    fn default() -> Self {
        Segment::General
    }
}

/// A prospective customer captured via the intake form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lead {
    pub id: String,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub referral_source: String,
    pub segment: Option<Segment>,
    pub status: LeadStatus,
    pub notes: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub last_contacted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Validated input for a new lead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewLead {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub referral_source: String,
    #[serde(default)]
    pub segment: Option<Segment>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Imported studio client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    #[serde(default)]
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub address_line_1: Option<String>,
    pub marketing_consent: bool,
    pub marketing_text_opt_in: bool,
    pub transactional_text_opt_in: bool,
    pub agree_to_liability_waiver: bool,
    pub milestone_count: Option<i64>,
    pub first_seen: Option<NaiveDate>,
    pub last_seen: Option<NaiveDate>,
    pub tags: Vec<String>,
    pub company_name: Option<String>,
    pub customer_since: Option<NaiveDate>,
    pub customer_type: String,
    pub customer_status: String,
    pub country: String,
    pub preferred_contact_method: String,
    pub total_spent: f64,
    pub credit_limit: f64,
}

/// A message template with `{{variable}}` placeholders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub id: String,
    pub name: String,
    pub subject: String,
    pub content: String,
    pub kind: TemplateKind,
    pub segment: Option<Segment>,
    pub delay_hours: i64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_delay_hours() -> i64 {
    2
}

/// Longest delay a template or sequence step may carry (five years).
pub const MAX_DELAY_HOURS: i64 = 24 * 365 * 5;

/// Reject delays outside `0..=MAX_DELAY_HOURS`.
pub fn check_delay_hours(hours: i64) -> crate::Result<()> {
    if !(0..=MAX_DELAY_HOURS).contains(&hours) {
        return Err(LotusError::Validation(format!(
            "delay_hours must be between 0 and {MAX_DELAY_HOURS}, got {hours}"
        )));
    }
    Ok(())
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTemplate {
    pub name: String,
    pub subject: String,
    pub content: String,
    pub kind: TemplateKind,
    #[serde(default)]
    pub segment: Option<Segment>,
    #[serde(default = "default_delay_hours")]
    pub delay_hours: i64,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

impl NewTemplate {
    pub fn validate(&self) -> crate::Result<()> {
        if self.name.trim().is_empty()
            || self.subject.trim().is_empty()
            || self.content.trim().is_empty()
        {
            return Err(LotusError::Validation(
                "template name, subject and content are required".into(),
            ));
        }
        check_delay_hours(self.delay_hours)?;
        let unknown: Vec<String> = crate::template::placeholders(&self.subject)
            .into_iter()
            .chain(crate::template::placeholders(&self.content))
            .filter(|p| !crate::template::VARIABLES.contains(&p.as_str()))
            .collect();
        if !unknown.is_empty() {
            return Err(LotusError::Validation(format!(
                "unknown template variable(s): {}",
                unknown.join(", ")
            )));
        }
        Ok(())
    }
}

/// Ordered list of templates with per-step delays, started by a trigger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sequence {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub trigger_type: TriggerType,
    pub segment: Option<Segment>,
    pub channel: Channel,
    pub is_active: bool,
    pub steps: Vec<SequenceStep>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceStep {
    pub id: String,
    pub sequence_id: String,
    pub template_id: String,
    pub step_order: i64,
    pub delay_hours: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSequence {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub trigger_type: TriggerType,
    #[serde(default)]
    pub segment: Option<Segment>,
    #[serde(default = "default_channel")]
    pub channel: Channel,
    pub steps: Vec<NewSequenceStep>,
}

fn default_channel() -> Channel {
    Channel::WhatsApp
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSequenceStep {
    pub template_id: String,
    #[serde(default)]
    pub delay_hours: i64,
}

/// One queued, sent or failed outbound message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Communication {
    pub id: String,
    pub lead_id: String,
    pub channel: Channel,
    pub template_id: Option<String>,
    pub sequence_id: Option<String>,
    pub subject: Option<String>,
    pub content: String,
    pub status: MessageStatus,
    pub error_message: Option<String>,
    pub scheduled_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Input for a single queued message.
#[derive(Debug, Clone)]
pub struct NewCommunication {
    pub lead_id: String,
    pub channel: Channel,
    pub template_id: Option<String>,
    pub sequence_id: Option<String>,
    pub subject: Option<String>,
    pub content: String,
    pub scheduled_at: DateTime<Utc>,
}

/// A pending message whose send time has arrived, joined with its lead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadyMessage {
    pub id: String,
    pub lead_id: String,
    pub channel: Channel,
    pub template_id: Option<String>,
    pub sequence_id: Option<String>,
    pub subject: Option<String>,
    pub content: String,
    pub scheduled_at: DateTime<Utc>,
    pub lead_name: String,
    pub lead_email: String,
    pub lead_phone: String,
}

/// Payload handed to a `MessageSender`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub lead_id: String,
    /// Phone number (WhatsApp) or email address.
    pub to: String,
    pub name: String,
    pub subject: Option<String>,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendReceipt {
    /// Provider-assigned message id.
    pub provider_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QrCodeRecord {
    pub id: String,
    pub name: String,
    pub url: String,
    pub description: Option<String>,
    pub scan_count: i64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LeadStats {
    pub total: usize,
    pub today: usize,
    pub this_week: usize,
    pub by_status: Vec<(LeadStatus, usize)>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CustomerStats {
    pub total: usize,
    pub business: usize,
    pub individual: usize,
    pub marketing_consent: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareCount {
    pub key: String,
    pub count: usize,
    pub percentage: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Analytics {
    pub total_leads: usize,
    pub new_leads: usize,
    pub converted_leads: usize,
    pub conversion_rate: f64,
    pub total_messages: usize,
    pub messages_sent: usize,
    pub messages_failed: usize,
    pub messages_pending: usize,
    pub delivery_rate: f64,
    pub lead_sources: Vec<ShareCount>,
    pub segment_breakdown: Vec<ShareCount>,
}
