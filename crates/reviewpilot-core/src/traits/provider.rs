//! LLM provider trait.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Message, ModelInfo, ProviderResponse};

/// Sampling parameters for a single chat call.
#[derive(Debug, Clone)]
pub struct GenerateParams {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for GenerateParams {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".into(),
            temperature: 0.7,
            max_tokens: 300,
        }
    }
}

#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    async fn chat(&self, messages: &[Message], params: &GenerateParams) -> Result<ProviderResponse>;

    async fn list_models(&self) -> Result<Vec<ModelInfo>>;

    async fn health_check(&self) -> Result<bool>;
}
