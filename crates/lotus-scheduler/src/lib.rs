//! # Lotus Scheduler
//!
//! Background automation for the studio CRM.
//!
//! ```text
//! Scheduler (tokio interval)
//!   ├── QueueProcessor: due messages → WhatsApp / email senders
//!   ├── Re-engagement: quiet converted customers → inactive-90-days sequence
//!   └── Lead aging: `new` leads past expiry → `lost`
//! ```

pub mod engine;
pub mod lifecycle;
pub mod queue;

pub use engine::{SchedulerEngine, SchedulerReport, spawn_scheduler};
pub use queue::{QueueProcessor, QueueReport};
