//! # ReviewPilot Core
//!
//! Shared vocabulary for every ReviewPilot crate: domain types, the error
//! taxonomy, configuration and the trait seams behind which the LLM providers
//! and the review platform (Google Business Profile) live.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::ReviewPilotConfig;
pub use error::{ReviewPilotError, Result};
