//! # Lotus Core
//!
//! Shared vocabulary for every Lotus crate: domain types (leads, customers,
//! templates, sequences, queued messages), instructor staffing and pay,
//! configuration, the error type and the `MessageSender` seam implemented by
//! the outbound channels.

pub mod config;
pub mod error;
pub mod staff;
pub mod template;
pub mod traits;
pub mod types;

pub use config::LotusConfig;
pub use error::{LotusError, Result};
pub use traits::MessageSender;
