//! Client CSV import from the studio-software export.

use std::io::Read;

use chrono::{DateTime, NaiveDate, Utc};
use lotus_core::error::{LotusError, Result};
use lotus_core::types::Customer;
use lotus_db::CrmDb;
use serde::{Deserialize, Serialize};

/// Rows per upsert transaction.
pub const BATCH_SIZE: usize = 50;

/// One export row. Every column is optional so a partial export still
/// parses; rows are validated after transformation.
#[derive(Debug, Default, Deserialize)]
struct ExportRow {
    #[serde(rename = "Client Name", default)]
    client_name: String,
    #[serde(rename = "First Name", default)]
    first_name: String,
    #[serde(rename = "Last Name", default)]
    last_name: String,
    #[serde(rename = "Client Email", default)]
    email: String,
    #[serde(rename = "Phone Number", default)]
    phone: String,
    #[serde(rename = "Birthday", default)]
    birthday: String,
    #[serde(rename = "Address", default)]
    address: String,
    #[serde(rename = "Marketing Email Opt-in", default)]
    marketing_email: String,
    #[serde(rename = "Marketing Text Opt In", default)]
    marketing_text: String,
    #[serde(rename = "Agree to Liability Waiver", default)]
    liability_waiver: String,
    #[serde(rename = "Pre-Arketa Milestone Count", default)]
    milestone_count: String,
    #[serde(rename = "Transactional Text Opt In", default)]
    transactional_text: String,
    #[serde(rename = "First Seen", default)]
    first_seen: String,
    #[serde(rename = "Last Seen", default)]
    last_seen: String,
    #[serde(rename = "Tags", default)]
    tags: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportReport {
    /// Data rows read from the file.
    pub total: usize,
    pub imported: usize,
    pub errors: usize,
}

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%Y/%m/%d", "%b %d, %Y", "%B %d, %Y"];

/// Parse the date shapes the export produces. Unparseable → `None`.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    DATE_FORMATS
        .iter()
        .find_map(|f| NaiveDate::parse_from_str(s, f).ok())
        .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|d| d.date_naive()))
}

/// `true`, `yes` and `1` (any case) are true; everything else is false.
pub fn parse_bool(s: &str) -> bool {
    matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "yes" | "1")
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}

fn to_customer(row: ExportRow, today: NaiveDate) -> Customer {
    let first_seen = parse_date(&row.first_seen);
    Customer {
        id: String::new(),
        first_name: row.first_name.trim().to_string(),
        last_name: row.last_name.trim().to_string(),
        email: row.email.trim().to_string(),
        phone: non_empty(&row.phone),
        date_of_birth: parse_date(&row.birthday),
        address_line_1: non_empty(&row.address),
        marketing_consent: parse_bool(&row.marketing_email),
        marketing_text_opt_in: parse_bool(&row.marketing_text),
        transactional_text_opt_in: parse_bool(&row.transactional_text),
        agree_to_liability_waiver: parse_bool(&row.liability_waiver),
        milestone_count: row.milestone_count.trim().parse().ok(),
        first_seen,
        last_seen: parse_date(&row.last_seen),
        tags: row
            .tags
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(String::from)
            .collect(),
        company_name: non_empty(&row.client_name),
        customer_since: Some(first_seen.unwrap_or(today)),
        customer_type: "individual".into(),
        customer_status: "active".into(),
        country: "US".into(),
        preferred_contact_method: "email".into(),
        total_spent: 0.0,
        credit_limit: 0.0,
    }
}

/// Parse an export into customers. Returns the valid customers, the number
/// of data rows read and the number rejected (unreadable or no email).
pub fn parse_customers<R: Read>(reader: R, today: NaiveDate) -> Result<(Vec<Customer>, usize, usize)> {
    let mut csv = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut customers = Vec::new();
    let mut total = 0;
    let mut rejected = 0;
    for (line, record) in csv.deserialize::<ExportRow>().enumerate() {
        total += 1;
        match record {
            Ok(row) => {
                let customer = to_customer(row, today);
                if customer.email.is_empty() {
                    tracing::debug!("row {} skipped: no email", line + 2);
                    rejected += 1;
                } else {
                    customers.push(customer);
                }
            }
            Err(e) => {
                tracing::debug!("row {} unreadable: {e}", line + 2);
                rejected += 1;
            }
        }
    }
    Ok((customers, total, rejected))
}

/// Import an export into the customer table, upserting on email in
/// batches of [`BATCH_SIZE`]. A failed batch counts all its rows as errors.
pub fn import_customers<R: Read>(db: &CrmDb, reader: R, now: DateTime<Utc>) -> Result<ImportReport> {
    let (customers, total, rejected) = parse_customers(reader, now.date_naive())?;
    if customers.is_empty() {
        return Err(LotusError::Import("No valid records found".into()));
    }

    let mut report = ImportReport {
        total,
        imported: 0,
        errors: rejected,
    };
    for batch in customers.chunks(BATCH_SIZE) {
        match db.upsert_customers(batch, now) {
            Ok(n) => report.imported += n,
            Err(e) => {
                tracing::warn!("⚠️ Batch insert error: {e}");
                report.errors += batch.len();
            }
        }
    }

    tracing::info!(
        "📥 Imported {} customer(s) ({} error(s), {} row(s) read)",
        report.imported,
        report.errors,
        report.total
    );
    Ok(report)
}
