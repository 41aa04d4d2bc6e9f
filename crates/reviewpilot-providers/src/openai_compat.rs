//! OpenAI-compatible chat completions, shared by every hosted vendor we use.

use async_trait::async_trait;
use reviewpilot_core::config::LlmConfig;
use reviewpilot_core::error::{ReviewPilotError, Result};
use reviewpilot_core::traits::provider::{GenerateParams, Provider};
use reviewpilot_core::types::{Message, ModelInfo, ProviderResponse, Usage};

/// Hosted vendors reachable through the OpenAI wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vendor {
    OpenAi,
    DeepSeek,
    Groq,
    Gemini,
}

impl Vendor {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "openai" | "openrouter" => Some(Vendor::OpenAi),
            "deepseek" => Some(Vendor::DeepSeek),
            "groq" => Some(Vendor::Groq),
            "gemini" | "google" => Some(Vendor::Gemini),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Vendor::OpenAi => "openai",
            Vendor::DeepSeek => "deepseek",
            Vendor::Groq => "groq",
            Vendor::Gemini => "gemini",
        }
    }

    fn endpoint(&self) -> &'static str {
        match self {
            Vendor::OpenAi => "https://api.openai.com/v1/chat/completions",
            Vendor::DeepSeek => "https://api.deepseek.com/chat/completions",
            Vendor::Groq => "https://api.groq.com/openai/v1/chat/completions",
            Vendor::Gemini => "https://generativelanguage.googleapis.com/v1beta/openai/chat/completions",
        }
    }

    /// Env vars consulted, in order, when the config carries no key.
    fn env_keys(&self) -> &'static [&'static str] {
        match self {
            Vendor::OpenAi => &["OPENAI_API_KEY"],
            Vendor::DeepSeek => &["DEEPSEEK_API_KEY"],
            Vendor::Groq => &["GROQ_API_KEY"],
            Vendor::Gemini => &["GEMINI_API_KEY", "GOOGLE_API_KEY"],
        }
    }

    fn models(&self) -> Vec<ModelInfo> {
        let model = |id: &str, name: &str, ctx: u32, out: u32| ModelInfo {
            id: id.into(),
            name: name.into(),
            provider: self.name().into(),
            context_length: ctx,
            max_output_tokens: Some(out),
        };
        match self {
            Vendor::OpenAi => vec![
                model("gpt-4o-mini", "GPT-4o mini", 128_000, 16_384),
                model("gpt-4o", "GPT-4o", 128_000, 16_384),
            ],
            Vendor::DeepSeek => vec![model("deepseek-chat", "DeepSeek Chat", 128_000, 8192)],
            Vendor::Groq => vec![
                model("llama-3.3-70b-versatile", "Llama 3.3 70B", 128_000, 32_768),
                model("llama-3.1-8b-instant", "Llama 3.1 8B", 128_000, 8192),
            ],
            Vendor::Gemini => vec![model("gemini-2.5-flash", "Gemini 2.5 Flash", 1_048_576, 65_536)],
        }
    }
}

pub struct OpenAiCompatProvider {
    vendor: Vendor,
    endpoint: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    pub fn new(vendor: Vendor, config: &LlmConfig) -> Result<Self> {
        let api_key = if config.api_key.is_empty() {
            vendor
                .env_keys()
                .iter()
                .find_map(|k| std::env::var(k).ok())
                .unwrap_or_default()
        } else {
            config.api_key.clone()
        };
        let endpoint = config
            .base_url
            .clone()
            .unwrap_or_else(|| vendor.endpoint().to_string());
        Ok(Self { vendor, endpoint, api_key, client: reqwest::Client::new() })
    }
}

fn parse_completion(vendor: &str, json: &serde_json::Value) -> Result<ProviderResponse> {
    let choice = &json["choices"][0];
    if choice.is_null() {
        return Err(ReviewPilotError::Provider(format!("{vendor}: response has no choices")));
    }
    let usage = json
        .get("usage")
        .and_then(|u| serde_json::from_value::<Usage>(u.clone()).ok());
    Ok(ProviderResponse {
        content: choice["message"]["content"].as_str().map(String::from),
        finish_reason: choice["finish_reason"].as_str().map(String::from),
        usage,
    })
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        self.vendor.name()
    }

    async fn chat(&self, messages: &[Message], params: &GenerateParams) -> Result<ProviderResponse> {
        let vendor = self.vendor.name();
        if self.api_key.is_empty() {
            return Err(ReviewPilotError::ApiKeyMissing(vendor.into()));
        }

        let body = serde_json::json!({
            "model": params.model,
            "messages": messages,
            "temperature": params.temperature,
            "max_tokens": params.max_tokens,
        });

        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ReviewPilotError::Provider(format!("{vendor} request failed: {e}")))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| ReviewPilotError::Provider(format!("{vendor} read error: {e}")))?;
        if !status.is_success() {
            return Err(ReviewPilotError::Provider(format!("{vendor} API {status}: {text}")));
        }

        let json: serde_json::Value = serde_json::from_str(&text)
            .map_err(|e| ReviewPilotError::Provider(format!("{vendor} invalid JSON: {e}")))?;
        let response = parse_completion(vendor, &json)?;
        tracing::debug!(
            provider = vendor,
            tokens = response.usage.as_ref().map(|u| u.total_tokens),
            "chat completion received"
        );
        Ok(response)
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        Ok(self.vendor.models())
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(!self.api_key.is_empty())
    }
}
