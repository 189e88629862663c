//! # Lotus Intake
//!
//! Ways people and records enter the CRM: the public lead form, the client
//! CSV export from the studio software, and QR codes that point at the form.

pub mod csv_import;
pub mod form;
pub mod qr;

pub use csv_import::{ImportReport, import_customers};
pub use form::{CaptureOutcome, LeadForm, WelcomePath, capture_lead};
pub use qr::{generate_qr_data_url, generate_qr_svg};
