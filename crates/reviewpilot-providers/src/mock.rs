//! Offline provider with canned replies chosen by star rating.

use async_trait::async_trait;
use reviewpilot_core::error::Result;
use reviewpilot_core::traits::provider::{GenerateParams, Provider};
use reviewpilot_core::types::{Message, ModelInfo, ProviderResponse, Usage};

use crate::reply::RATING_PREFIX;

#[derive(Debug, Default)]
pub struct MockProvider;

impl MockProvider {
    pub fn new() -> Self {
        Self
    }

    fn reply_for(stars: u8, reviewer: &str) -> String {
        match stars {
            5 => format!("Thank you so much, {reviewer}! We're thrilled you had a great experience and can't wait to see you again."),
            4 => format!("Thanks for the lovely review, {reviewer}! We're glad you enjoyed your visit and hope to make the next one five stars."),
            3 => format!("Thank you for your feedback, {reviewer}. We'd love to hear what we could do better next time."),
            _ => format!("We're sorry to hear about your experience, {reviewer}. Please reach out to us directly so we can make this right."),
        }
    }
}

/// Pull reviewer first name and rating back out of the prompt built by
/// [`crate::reply::build_reply_messages`].
fn read_prompt(messages: &[Message]) -> (u8, String) {
    let user = messages.iter().rev().find(|m| m.role == "user");
    let mut stars = 5;
    let mut reviewer = "there".to_string();
    if let Some(m) = user {
        for line in m.content.lines() {
            if let Some(rest) = line.strip_prefix("Reviewer: ") {
                if let Some(first) = rest.split_whitespace().next() {
                    reviewer = first.to_string();
                }
            } else if let Some(rest) = line.strip_prefix(RATING_PREFIX) {
                stars = rest.split('/').next().and_then(|s| s.trim().parse().ok()).unwrap_or(5);
            }
        }
    }
    (stars, reviewer)
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn chat(&self, messages: &[Message], _params: &GenerateParams) -> Result<ProviderResponse> {
        let (stars, reviewer) = read_prompt(messages);
        let content = Self::reply_for(stars, &reviewer);
        let completion_tokens = content.split_whitespace().count() as u32;
        Ok(ProviderResponse {
            content: Some(content),
            finish_reason: Some("stop".into()),
            usage: Some(Usage { prompt_tokens: 0, completion_tokens, total_tokens: completion_tokens }),
        })
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        Ok(vec![ModelInfo {
            id: "mock-reply".into(),
            name: "Canned replies".into(),
            provider: "mock".into(),
            context_length: 4096,
            max_output_tokens: Some(256),
        }])
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}
