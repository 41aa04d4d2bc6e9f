//! # ReviewPilot Providers
//!
//! LLM providers that draft review replies: OpenAI, DeepSeek, Groq and Gemini
//! over their OpenAI-compatible endpoints, plus an offline mock.

pub mod mock;
pub mod openai_compat;
pub mod reply;

use reviewpilot_core::config::LlmConfig;
use reviewpilot_core::error::{ReviewPilotError, Result};
use reviewpilot_core::traits::Provider;

/// Create a provider from configuration.
pub fn create_provider(config: &LlmConfig) -> Result<Box<dyn Provider>> {
    match config.provider.as_str() {
        "mock" => Ok(Box::new(mock::MockProvider::new())),
        name => match openai_compat::Vendor::from_name(name) {
            Some(vendor) => Ok(Box::new(openai_compat::OpenAiCompatProvider::new(vendor, config)?)),
            None => Err(ReviewPilotError::ProviderNotFound(name.into())),
        },
    }
}

/// List all available provider names.
pub fn available_providers() -> Vec<&'static str> {
    vec!["openai", "deepseek", "groq", "gemini", "mock"]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_known_providers() {
        let mut cfg = LlmConfig { api_key: "sk-test".into(), ..LlmConfig::default() };
        for name in available_providers() {
            cfg.provider = name.into();
            let provider = create_provider(&cfg).unwrap();
            assert_eq!(provider.name(), name);
        }
    }

    #[test]
    fn test_google_alias_maps_to_gemini() {
        let cfg = LlmConfig { provider: "google".into(), api_key: "k".into(), ..LlmConfig::default() };
        assert_eq!(create_provider(&cfg).unwrap().name(), "gemini");
    }

    #[test]
    fn test_unknown_provider() {
        let cfg = LlmConfig { provider: "brain".into(), ..LlmConfig::default() };
        assert!(matches!(create_provider(&cfg), Err(ReviewPilotError::ProviderNotFound(_))));
    }
}
