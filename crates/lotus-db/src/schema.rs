//! Schema migrations.

use lotus_core::error::{LotusError, Result};
use rusqlite::Connection;

const SCHEMA_VERSION: i64 = 2;

/// Create all tables. Safe to run on every open.
pub(crate) fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS leads (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT NOT NULL,
            phone TEXT NOT NULL,
            referral_source TEXT NOT NULL,
            segment TEXT,
            status TEXT NOT NULL DEFAULT 'new',
            notes TEXT,
            submitted_at TEXT NOT NULL,
            last_contacted_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_leads_status ON leads(status, submitted_at);

        CREATE TABLE IF NOT EXISTS customers (
            id TEXT PRIMARY KEY,
            first_name TEXT NOT NULL DEFAULT '',
            last_name TEXT NOT NULL DEFAULT '',
            email TEXT NOT NULL UNIQUE,
            phone TEXT,
            date_of_birth TEXT,
            address_line_1 TEXT,
            marketing_consent INTEGER NOT NULL DEFAULT 0,
            marketing_text_opt_in INTEGER NOT NULL DEFAULT 0,
            transactional_text_opt_in INTEGER NOT NULL DEFAULT 0,
            agree_to_liability_waiver INTEGER NOT NULL DEFAULT 0,
            milestone_count INTEGER,
            first_seen TEXT,
            last_seen TEXT,
            tags TEXT NOT NULL DEFAULT '[]',
            company_name TEXT,
            customer_since TEXT,
            customer_type TEXT NOT NULL DEFAULT 'individual',
            customer_status TEXT NOT NULL DEFAULT 'active',
            country TEXT NOT NULL DEFAULT 'US',
            preferred_contact_method TEXT NOT NULL DEFAULT 'email',
            total_spent REAL NOT NULL DEFAULT 0,
            credit_limit REAL NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS templates (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            subject TEXT NOT NULL,
            content TEXT NOT NULL,
            kind TEXT NOT NULL,
            segment TEXT,
            delay_hours INTEGER NOT NULL DEFAULT 2,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS sequences (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT,
            trigger_type TEXT NOT NULL,
            segment TEXT,
            channel TEXT NOT NULL DEFAULT 'whatsapp',
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS sequence_steps (
            id TEXT PRIMARY KEY,
            sequence_id TEXT NOT NULL REFERENCES sequences(id) ON DELETE CASCADE,
            template_id TEXT NOT NULL REFERENCES templates(id) ON DELETE CASCADE,
            step_order INTEGER NOT NULL,
            delay_hours INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_steps_sequence ON sequence_steps(sequence_id, step_order);

        -- Append-only message log; only status, error_message and sent_at change.
        CREATE TABLE IF NOT EXISTS communication_history (
            id TEXT PRIMARY KEY,
            lead_id TEXT NOT NULL REFERENCES leads(id) ON DELETE CASCADE,
            channel TEXT NOT NULL,
            template_id TEXT REFERENCES templates(id) ON DELETE SET NULL,
            sequence_id TEXT REFERENCES sequences(id) ON DELETE SET NULL,
            subject TEXT,
            content TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            error_message TEXT,
            scheduled_at TEXT NOT NULL,
            sent_at TEXT,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_history_ready ON communication_history(status, scheduled_at);
        CREATE INDEX IF NOT EXISTS idx_history_lead ON communication_history(lead_id, created_at);

        CREATE TABLE IF NOT EXISTS qr_codes (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            url TEXT NOT NULL,
            description TEXT,
            scan_count INTEGER NOT NULL DEFAULT 0,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS instructors (
            id TEXT PRIMARY KEY,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            email TEXT NOT NULL UNIQUE,
            phone TEXT,
            certification_level TEXT NOT NULL DEFAULT '200hr',
            base_rate REAL NOT NULL DEFAULT 50,
            per_student_rate REAL NOT NULL DEFAULT 5,
            substitute_rate_multiplier REAL NOT NULL DEFAULT 1.25,
            is_active INTEGER NOT NULL DEFAULT 1,
            bio TEXT,
            specialties TEXT NOT NULL DEFAULT '[]',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS classes (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            instructor_id TEXT REFERENCES instructors(id) ON DELETE SET NULL,
            substitute_instructor_id TEXT REFERENCES instructors(id) ON DELETE SET NULL,
            starts_at TEXT NOT NULL,
            ends_at TEXT NOT NULL,
            room TEXT,
            student_count INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'scheduled',
            is_substitute_class INTEGER NOT NULL DEFAULT 0,
            substitute_notice_hours INTEGER,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_classes_start ON classes(starts_at);

        CREATE TABLE IF NOT EXISTS substitute_requests (
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL REFERENCES classes(id) ON DELETE CASCADE,
            original_instructor_id TEXT NOT NULL REFERENCES instructors(id),
            request_reason TEXT,
            notice_hours INTEGER NOT NULL,
            priority_level INTEGER NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            filled_by_instructor_id TEXT REFERENCES instructors(id),
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        -- One payroll record per class.
        CREATE TABLE IF NOT EXISTS payroll_records (
            id TEXT PRIMARY KEY,
            instructor_id TEXT NOT NULL REFERENCES instructors(id),
            class_id TEXT NOT NULL UNIQUE REFERENCES classes(id),
            base_payment REAL NOT NULL,
            student_payment REAL NOT NULL,
            total_payment REAL NOT NULL,
            is_substitute INTEGER NOT NULL DEFAULT 0,
            substitute_multiplier REAL,
            status TEXT NOT NULL DEFAULT 'pending',
            created_at TEXT NOT NULL,
            paid_at TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_payroll_instructor ON payroll_records(instructor_id, created_at);
        ",
    )
    .map_err(|e| LotusError::Database(format!("Migration error: {e}")))?;

    let version: i64 = conn
        .query_row("PRAGMA user_version", [], |r| r.get(0))
        .unwrap_or(0);
    if version < SCHEMA_VERSION {
        conn.execute_batch(&format!("PRAGMA user_version = {SCHEMA_VERSION};"))
            .map_err(|e| LotusError::Database(format!("Migration version: {e}")))?;
        tracing::debug!("schema migrated to v{SCHEMA_VERSION}");
    }
    Ok(())
}
