//! Default templates and sequences for a fresh database.

use chrono::{DateTime, Utc};
use lotus_core::error::Result;
use rusqlite::{Connection, params};

use crate::{db_err, ts};

// (id, name, kind, segment, delay_hours, subject, content)
const TEMPLATES: &[(&str, &str, &str, Option<&str>, i64, &str, &str)] = &[
    (
        "welcome-general",
        "Welcome - General",
        "welcome",
        Some("general"),
        0,
        "Welcome to the studio! Your journey begins here",
        "Hi {{name}},\n\nThank you for your interest in our studio! We'd love to help you \
         get started. Browse the class schedule, book your first class online, and arrive \
         15 minutes early for a studio tour.\n\nNamaste,\nThe Studio Team",
    ),
    (
        "welcome-prenatal",
        "Welcome - Prenatal",
        "welcome",
        Some("prenatal"),
        0,
        "Welcome - supporting you through your pregnancy",
        "Hi {{name}},\n\nCongratulations! Our prenatal classes help you build strength safely \
         and connect with other expecting mothers. Please bring a note from your healthcare \
         provider to your first class.\n\nWith love,\nThe Studio Team",
    ),
    (
        "intro-day-0",
        "Intro Package - Welcome",
        "intro-package",
        None,
        0,
        "Your intro package is ready",
        "Hi {{name}}, thanks for purchasing the intro package! Book your first class any time.",
    ),
    (
        "intro-day-3",
        "Intro Package - Check-in",
        "intro-package",
        None,
        72,
        "How was your first class?",
        "Hi {{name}}, how are you settling in? Reply here if you have any questions.",
    ),
    (
        "intro-day-7",
        "Intro Package - Week One",
        "intro-package",
        None,
        168,
        "One week in",
        "Hi {{name}}, one week in! Try a different class style this week.",
    ),
    (
        "intro-day-14",
        "Intro Package - Halfway",
        "intro-package",
        None,
        336,
        "Halfway through your intro package",
        "Hi {{name}}, you're halfway through your intro package. Keep the momentum going!",
    ),
    (
        "intro-day-30",
        "Intro Package - Membership",
        "intro-package",
        None,
        720,
        "Ready for a membership?",
        "Hi {{name}}, your intro month is wrapping up. Ask us about membership options.",
    ),
    (
        "post-class",
        "First Class Follow-up",
        "post-class",
        None,
        4,
        "Thanks for coming to class",
        "Hi {{name}}, thank you for joining your first class today! How did it feel?",
    ),
    (
        "re-engagement",
        "We Miss You",
        "re-engagement",
        None,
        0,
        "We miss you on the mat",
        "Hi {{name}}, it's been a while! Come back for a class this week, we'd love to see you.",
    ),
];

// (id, name, trigger, segment, steps: (template_id, delay_hours))
type SeedSequence = (&'static str, &'static str, &'static str, Option<&'static str>, &'static [(&'static str, i64)]);

const SEQUENCES: &[SeedSequence] = &[
    ("seq-new-lead", "New Lead Welcome", "new-lead", None, &[("welcome-general", 0)]),
    (
        "seq-new-lead-prenatal",
        "New Lead Welcome - Prenatal",
        "new-lead",
        Some("prenatal"),
        &[("welcome-prenatal", 0)],
    ),
    (
        "seq-intro-package",
        "Intro Package Journey",
        "intro-purchase",
        None,
        &[
            ("intro-day-0", 0),
            ("intro-day-3", 72),
            ("intro-day-7", 168),
            ("intro-day-14", 336),
            ("intro-day-30", 720),
        ],
    ),
    ("seq-first-class", "First Class Follow-up", "first-class", None, &[("post-class", 4)]),
    (
        "seq-reengagement",
        "90-Day Re-engagement",
        "inactive-90-days",
        None,
        &[("re-engagement", 0)],
    ),
];

/// Insert defaults when the template table is empty.
pub(crate) fn seed_defaults(conn: &Connection, now: DateTime<Utc>) -> Result<()> {
    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM templates", [], |r| r.get(0))
        .map_err(db_err)?;
    if count > 0 {
        return Ok(());
    }

    let now = ts(now);
    for (id, name, kind, segment, delay, subject, content) in TEMPLATES {
        conn.execute(
            "INSERT INTO templates (id, name, subject, content, kind, segment, delay_hours, is_active, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1, ?8, ?8)",
            params![id, name, subject, content, kind, segment, delay, now],
        )
        .map_err(db_err)?;
    }

    for (id, name, trigger, segment, steps) in SEQUENCES {
        conn.execute(
            "INSERT INTO sequences (id, name, description, trigger_type, segment, channel, is_active, created_at, updated_at)
             VALUES (?1, ?2, NULL, ?3, ?4, 'whatsapp', 1, ?5, ?5)",
            params![id, name, trigger, segment, now],
        )
        .map_err(db_err)?;
        for (order, (template_id, delay)) in steps.iter().enumerate() {
            conn.execute(
                "INSERT INTO sequence_steps (id, sequence_id, template_id, step_order, delay_hours, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![format!("{id}-{order}"), id, template_id, order as i64 + 1, delay, now],
            )
            .map_err(db_err)?;
        }
    }

    tracing::info!(
        "🌱 Seeded {} templates and {} sequences",
        TEMPLATES.len(),
        SEQUENCES.len()
    );
    Ok(())
}
