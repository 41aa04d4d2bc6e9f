//! # ReviewPilot Google
//!
//! Google Business Profile integration behind the
//! [`ReviewPlatform`](reviewpilot_core::traits::ReviewPlatform) trait.

pub mod client;
mod wire;

pub use client::GoogleBusinessClient;
