//! # Lotus Gateway
//!
//! JSON HTTP API over the CRM: the public lead form and QR redirects, plus
//! the admin routes (CRM and instructor staffing) behind an optional API key.

pub mod routes;
pub mod server;
pub mod staff;

pub use server::{AppState, build_router, start};
