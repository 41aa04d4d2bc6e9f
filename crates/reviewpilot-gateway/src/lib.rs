//! # ReviewPilot Gateway
//!
//! REST API over the review platform: login, Google connection management,
//! the review inbox with its reply workflow, and dashboards.

pub mod error;
pub mod routes;
pub mod server;

pub use server::{AppState, build_router, start};
