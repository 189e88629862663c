//! Imported studio clients.

use chrono::{DateTime, NaiveDate, Utc};
use lotus_core::error::{LotusError, Result};
use lotus_core::types::{Customer, CustomerStats};
use rusqlite::{OptionalExtension, params};

use crate::{CrmDb, col_date_opt, db_err, like_pattern, new_id, ts};

const CUSTOMER_COLUMNS: &str = "id, first_name, last_name, email, phone, date_of_birth, address_line_1, \
     marketing_consent, marketing_text_opt_in, transactional_text_opt_in, agree_to_liability_waiver, \
     milestone_count, first_seen, last_seen, tags, company_name, customer_since, customer_type, \
     customer_status, country, preferred_contact_method, total_spent, credit_limit";

fn customer_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Customer> {
    let tags_json: String = row.get(14)?;
    Ok(Customer {
        id: row.get(0)?,
        first_name: row.get(1)?,
        last_name: row.get(2)?,
        email: row.get(3)?,
        phone: row.get(4)?,
        date_of_birth: col_date_opt(row, 5)?,
        address_line_1: row.get(6)?,
        marketing_consent: row.get(7)?,
        marketing_text_opt_in: row.get(8)?,
        transactional_text_opt_in: row.get(9)?,
        agree_to_liability_waiver: row.get(10)?,
        milestone_count: row.get(11)?,
        first_seen: col_date_opt(row, 12)?,
        last_seen: col_date_opt(row, 13)?,
        tags: serde_json::from_str(&tags_json).unwrap_or_default(),
        company_name: row.get(15)?,
        customer_since: col_date_opt(row, 16)?,
        customer_type: row.get(17)?,
        customer_status: row.get(18)?,
        country: row.get(19)?,
        preferred_contact_method: row.get(20)?,
        total_spent: row.get(21)?,
        credit_limit: row.get(22)?,
    })
}

fn date_str(d: Option<NaiveDate>) -> Option<String> {
    d.map(|d| d.format("%Y-%m-%d").to_string())
}

impl CrmDb {
    /// Insert or update a batch of customers keyed by email, in one
    /// transaction. Either the whole batch lands or none of it does.
    pub fn upsert_customers(&self, batch: &[Customer], now: DateTime<Utc>) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(db_err)?;
        let stamp = ts(now);
        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO customers (id, first_name, last_name, email, phone, date_of_birth,
                        address_line_1, marketing_consent, marketing_text_opt_in,
                        transactional_text_opt_in, agree_to_liability_waiver, milestone_count,
                        first_seen, last_seen, tags, company_name, customer_since, customer_type,
                        customer_status, country, preferred_contact_method, total_spent,
                        credit_limit, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                             ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?24)
                     ON CONFLICT(email) DO UPDATE SET
                        first_name = excluded.first_name,
                        last_name = excluded.last_name,
                        phone = excluded.phone,
                        date_of_birth = excluded.date_of_birth,
                        address_line_1 = excluded.address_line_1,
                        marketing_consent = excluded.marketing_consent,
                        marketing_text_opt_in = excluded.marketing_text_opt_in,
                        transactional_text_opt_in = excluded.transactional_text_opt_in,
                        agree_to_liability_waiver = excluded.agree_to_liability_waiver,
                        milestone_count = excluded.milestone_count,
                        first_seen = excluded.first_seen,
                        last_seen = excluded.last_seen,
                        tags = excluded.tags,
                        company_name = excluded.company_name,
                        customer_since = excluded.customer_since,
                        customer_type = excluded.customer_type,
                        customer_status = excluded.customer_status,
                        country = excluded.country,
                        preferred_contact_method = excluded.preferred_contact_method,
                        total_spent = excluded.total_spent,
                        credit_limit = excluded.credit_limit,
                        updated_at = excluded.updated_at",
                )
                .map_err(db_err)?;

            for c in batch {
                if c.email.trim().is_empty() {
                    return Err(LotusError::Validation("customer email is required".into()));
                }
                let id = if c.id.is_empty() { new_id() } else { c.id.clone() };
                let tags = serde_json::to_string(&c.tags)?;
                stmt.execute(params![
                    id,
                    c.first_name,
                    c.last_name,
                    c.email.trim(),
                    c.phone,
                    date_str(c.date_of_birth),
                    c.address_line_1,
                    c.marketing_consent,
                    c.marketing_text_opt_in,
                    c.transactional_text_opt_in,
                    c.agree_to_liability_waiver,
                    c.milestone_count,
                    date_str(c.first_seen),
                    date_str(c.last_seen),
                    tags,
                    c.company_name,
                    date_str(c.customer_since),
                    c.customer_type,
                    c.customer_status,
                    c.country,
                    c.preferred_contact_method,
                    c.total_spent,
                    c.credit_limit,
                    stamp,
                ])
                .map_err(db_err)?;
            }
        }
        tx.commit().map_err(db_err)?;
        Ok(batch.len())
    }

    pub fn get_customer_by_email(&self, email: &str) -> Result<Option<Customer>> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {CUSTOMER_COLUMNS} FROM customers WHERE email = ?1"),
            [email.trim()],
            customer_from_row,
        )
        .optional()
        .map_err(db_err)
    }

    /// Search by first/last name, email or company (ignoring ASCII case) and
    /// phone (substring). `None` or a blank term lists everyone.
    pub fn search_customers(&self, term: Option<&str>) -> Result<Vec<Customer>> {
        let conn = self.conn()?;
        let term = term.map(str::trim).filter(|t| !t.is_empty());
        let pattern = term.map(like_pattern);
        let phone_pattern = term.map(|t| format!("%{t}%"));
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {CUSTOMER_COLUMNS} FROM customers
                 WHERE ?1 IS NULL
                    OR first_name LIKE ?1 ESCAPE '\\'
                    OR last_name LIKE ?1 ESCAPE '\\'
                    OR email LIKE ?1 ESCAPE '\\'
                    OR coalesce(company_name, '') LIKE ?1 ESCAPE '\\'
                    OR coalesce(phone, '') LIKE ?2
                 ORDER BY created_at DESC, rowid DESC"
            ))
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![pattern, phone_pattern], customer_from_row)
            .map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    pub fn customer_stats(&self) -> Result<CustomerStats> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(customer_type = 'business'), 0),
                    COALESCE(SUM(customer_type = 'individual'), 0),
                    COALESCE(SUM(marketing_consent != 0), 0)
             FROM customers",
            [],
            |r| {
                Ok(CustomerStats {
                    total: r.get::<_, i64>(0)? as usize,
                    business: r.get::<_, i64>(1)? as usize,
                    individual: r.get::<_, i64>(2)? as usize,
                    marketing_consent: r.get::<_, i64>(3)? as usize,
                })
            },
        )
        .map_err(db_err)
    }
}
