//! Trait seams: LLM providers and the review platform.

pub mod platform;
pub mod provider;

pub use platform::ReviewPlatform;
pub use provider::Provider;
