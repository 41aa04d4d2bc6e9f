//! Domain and wire types shared between the platform, the gateway and the
//! integration crates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ReviewPilotError;

// ── Roles & packages ────────────────────────────────────

/// Who a bearer token was issued to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Client,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Client => "client",
        }
    }
}

impl FromStr for Role {
    type Err = ReviewPilotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "client" => Ok(Role::Client),
            other => Err(ReviewPilotError::validation(format!("unknown role: {other}"))),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Subscription tier of a tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Package {
    #[default]
    Basic,
    Pro,
    Enterprise,
}

impl Package {
    pub fn as_str(&self) -> &'static str {
        match self {
            Package::Basic => "basic",
            Package::Pro => "pro",
            Package::Enterprise => "enterprise",
        }
    }

    /// Maximum number of Google locations; `None` means unlimited.
    pub fn max_locations(&self) -> Option<u32> {
        match self {
            Package::Basic => Some(3),
            Package::Pro => Some(10),
            Package::Enterprise => None,
        }
    }

    /// AI-drafted replies allowed per calendar month; `None` means unlimited.
    pub fn monthly_ai_replies(&self) -> Option<u32> {
        match self {
            Package::Basic => Some(100),
            Package::Pro => Some(500),
            Package::Enterprise => None,
        }
    }
}

impl FromStr for Package {
    type Err = ReviewPilotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "basic" => Ok(Package::Basic),
            "pro" => Ok(Package::Pro),
            "enterprise" => Ok(Package::Enterprise),
            other => Err(ReviewPilotError::validation(format!("unknown package: {other}"))),
        }
    }
}

impl fmt::Display for Package {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Reply lifecycle ────────────────────────────────────

/// Where a review's reply currently stands.
///
/// `NoReply → Drafted → Edited → Posted`; `Drafted` may go straight to `Posted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyState {
    #[serde(rename = "none")]
    NoReply,
    Drafted,
    Edited,
    Posted,
}

impl ReplyState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReplyState::NoReply => "none",
            ReplyState::Drafted => "drafted",
            ReplyState::Edited => "edited",
            ReplyState::Posted => "posted",
        }
    }

    /// States from which a draft can be edited or approved.
    pub fn is_pending(&self) -> bool {
        matches!(self, ReplyState::Drafted | ReplyState::Edited)
    }
}

impl FromStr for ReplyState {
    type Err = ReviewPilotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(ReplyState::NoReply),
            "drafted" => Ok(ReplyState::Drafted),
            "edited" => Ok(ReplyState::Edited),
            "posted" => Ok(ReplyState::Posted),
            other => Err(ReviewPilotError::validation(format!("unknown reply state: {other}"))),
        }
    }
}

impl fmt::Display for ReplyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who wrote the current reply text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplySource {
    Ai,
    Manual,
    Platform,
}

impl ReplySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReplySource::Ai => "ai",
            ReplySource::Manual => "manual",
            ReplySource::Platform => "platform",
        }
    }
}

impl FromStr for ReplySource {
    type Err = ReviewPilotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ai" => Ok(ReplySource::Ai),
            "manual" => Ok(ReplySource::Manual),
            "platform" => Ok(ReplySource::Platform),
            other => Err(ReviewPilotError::validation(format!("unknown reply source: {other}"))),
        }
    }
}

/// A 1..=5 star rating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct StarRating(u8);

impl StarRating {
    pub fn new(stars: u8) -> Result<Self, ReviewPilotError> {
        if (1..=5).contains(&stars) {
            Ok(Self(stars))
        } else {
            Err(ReviewPilotError::validation(format!("rating must be 1-5, got {stars}")))
        }
    }

    /// Parse Google's `starRating` enum (`ONE` .. `FIVE`).
    pub fn from_google(value: &str) -> Result<Self, ReviewPilotError> {
        let stars = match value {
            "ONE" => 1,
            "TWO" => 2,
            "THREE" => 3,
            "FOUR" => 4,
            "FIVE" => 5,
            other => {
                return Err(ReviewPilotError::google(format!("unknown star rating: {other}")));
            }
        };
        Ok(Self(stars))
    }

    pub fn stars(&self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for StarRating {
    type Error = ReviewPilotError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<StarRating> for u8 {
    fn from(r: StarRating) -> u8 {
        r.0
    }
}

// ── LLM wire types ────────────────────────────────────

/// One chat message in OpenAI-compatible format.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".into(), content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".into(), content: content.into() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    pub content: Option<String>,
    pub finish_reason: Option<String>,
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub name: String,
    pub provider: String,
    pub context_length: u32,
    pub max_output_tokens: Option<u32>,
}

// ── Review platform wire types ────────────────────────────────────

/// Result of an OAuth code exchange or refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    /// Google only returns a refresh token on the first consent.
    pub refresh_token: Option<String>,
    pub expires_in: i64,
    pub scope: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlatformAccount {
    /// `accounts/{id}`
    pub name: String,
    pub account_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlatformLocation {
    /// `accounts/{a}/locations/{l}`, the form the reviews endpoint expects.
    pub name: String,
    pub title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlatformReply {
    pub comment: String,
    pub update_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlatformReview {
    pub review_id: String,
    pub reviewer_name: String,
    pub rating: StarRating,
    pub comment: String,
    pub create_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
    pub reply: Option<PlatformReply>,
}

/// One page of a location's review listing.
#[derive(Debug, Clone, Default)]
pub struct ReviewPage {
    pub reviews: Vec<PlatformReview>,
    pub next_page_token: Option<String>,
    pub average_rating: Option<f64>,
    pub total_review_count: Option<u64>,
    /// Reviews on this page that could not be converted and were left out.
    pub rejected: usize,
}
