//! Instructors, scheduled classes, substitute cover and contractor pay.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::LotusError;
use crate::types::string_enum;

string_enum! {
    /// Training hours behind an instructor's certification.
    pub enum CertificationLevel {
        Ryt200 => "200hr",
        Ryt500 => "500hr",
        Advanced => "advanced",
    }
}

impl Default for CertificationLevel {
    fn default() -> Self {
        CertificationLevel::Ryt200
    }
}

string_enum! {
    pub enum ClassStatus {
        Scheduled => "scheduled",
        Completed => "completed",
        Cancelled => "cancelled",
        NeedsSubstitute => "needs-substitute" | "needs_substitute",
    }
}

string_enum! {
    pub enum SubstituteStatus {
        Pending => "pending",
        Filled => "filled",
        Escalated => "escalated",
        Cancelled => "cancelled",
    }
}

string_enum! {
    pub enum PayrollStatus {
        Pending => "pending",
        Paid => "paid",
    }
}

/// Contract instructor with their pay rates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instructor {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub certification_level: CertificationLevel,
    /// Flat fee per class taught.
    pub base_rate: f64,
    pub per_student_rate: f64,
    /// Applied to the whole class fee when covering for someone else.
    pub substitute_rate_multiplier: f64,
    pub is_active: bool,
    pub bio: Option<String>,
    pub specialties: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Instructor {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

fn default_base_rate() -> f64 {
    50.0
}

fn default_per_student_rate() -> f64 {
    5.0
}

fn default_substitute_multiplier() -> f64 {
    1.25
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewInstructor {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub certification_level: CertificationLevel,
    #[serde(default = "default_base_rate")]
    pub base_rate: f64,
    #[serde(default = "default_per_student_rate")]
    pub per_student_rate: f64,
    #[serde(default = "default_substitute_multiplier")]
    pub substitute_rate_multiplier: f64,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub specialties: Vec<String>,
}

impl NewInstructor {
    pub fn validate(&self) -> crate::Result<()> {
        if self.first_name.trim().is_empty() || self.last_name.trim().is_empty() {
            return Err(LotusError::Validation("instructor first and last name are required".into()));
        }
        if !self.email.contains('@') {
            return Err(LotusError::Validation(format!(
                "'{}' is not a valid email address",
                self.email.trim()
            )));
        }
        for (field, rate) in [("base_rate", self.base_rate), ("per_student_rate", self.per_student_rate)] {
            if !rate.is_finite() || rate < 0.0 {
                return Err(LotusError::Validation(format!("{field} must be zero or more")));
            }
        }
        if !self.substitute_rate_multiplier.is_finite() || self.substitute_rate_multiplier < 1.0 {
            return Err(LotusError::Validation(
                "substitute_rate_multiplier must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// A scheduled class on the studio timetable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudioClass {
    pub id: String,
    pub name: String,
    pub instructor_id: Option<String>,
    pub substitute_instructor_id: Option<String>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub room: Option<String>,
    pub student_count: i64,
    pub status: ClassStatus,
    pub is_substitute_class: bool,
    /// Hours of warning the studio had when cover was requested.
    pub substitute_notice_hours: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StudioClass {
    /// Who gets paid for the class: the substitute when one covered it.
    pub fn paid_instructor(&self) -> Option<&str> {
        self.substitute_instructor_id
            .as_deref()
            .or(self.instructor_id.as_deref())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewClass {
    pub name: String,
    #[serde(default)]
    pub instructor_id: Option<String>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    #[serde(default)]
    pub room: Option<String>,
}

impl NewClass {
    pub fn validate(&self) -> crate::Result<()> {
        if self.name.trim().is_empty() {
            return Err(LotusError::Validation("class name is required".into()));
        }
        if self.ends_at <= self.starts_at {
            return Err(LotusError::Validation("class must end after it starts".into()));
        }
        Ok(())
    }
}

/// Request for someone to cover a class.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubstituteRequest {
    pub id: String,
    pub class_id: String,
    pub original_instructor_id: String,
    pub request_reason: Option<String>,
    pub notice_hours: i64,
    /// 3 = emergency, 2 = urgent, 1 = normal.
    pub priority_level: i64,
    pub status: SubstituteStatus,
    pub filled_by_instructor_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Whole hours until the class starts, never negative.
pub fn notice_hours(starts_at: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (starts_at - now).num_hours().max(0)
}

/// Less than a day of notice is an emergency, less than two is urgent.
pub fn substitute_priority(notice_hours: i64) -> i64 {
    match notice_hours {
        h if h < 24 => 3,
        h if h < 48 => 2,
        _ => 1,
    }
}

/// Pay for one class, in dollars rounded to the cent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PaymentBreakdown {
    pub base_payment: f64,
    pub student_payment: f64,
    /// Set only for substitute cover.
    pub substitute_multiplier: Option<f64>,
    pub total_payment: f64,
}

fn cents(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

impl PaymentBreakdown {
    /// `base_rate + per_student_rate * students`, scaled by the instructor's
    /// substitute multiplier when covering.
    pub fn calculate(instructor: &Instructor, student_count: i64, is_substitute: bool) -> Self {
        let base_payment = cents(instructor.base_rate);
        let student_payment = cents(instructor.per_student_rate * student_count.max(0) as f64);
        let substitute_multiplier = is_substitute.then_some(instructor.substitute_rate_multiplier);
        let total_payment =
            cents((base_payment + student_payment) * substitute_multiplier.unwrap_or(1.0));
        Self {
            base_payment,
            student_payment,
            substitute_multiplier,
            total_payment,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayrollRecord {
    pub id: String,
    pub instructor_id: String,
    pub class_id: String,
    pub base_payment: f64,
    pub student_payment: f64,
    pub total_payment: f64,
    pub is_substitute: bool,
    pub substitute_multiplier: Option<f64>,
    pub status: PayrollStatus,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
}
