//! JSON shapes of the Google endpoints we call, and their conversion into
//! platform types.

use chrono::{DateTime, Utc};
use reviewpilot_core::error::{ReviewPilotError, Result};
use reviewpilot_core::types::{
    PlatformAccount, PlatformLocation, PlatformReply, PlatformReview, ReviewPage, StarRating,
    TokenGrant,
};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default = "default_expires_in")]
    pub expires_in: i64,
    #[serde(default)]
    pub scope: Option<String>,
}

fn default_expires_in() -> i64 {
    3600
}

impl From<TokenResponse> for TokenGrant {
    fn from(t: TokenResponse) -> Self {
        TokenGrant {
            access_token: t.access_token,
            refresh_token: t.refresh_token,
            expires_in: t.expires_in,
            scope: t.scope,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AccountsResponse {
    #[serde(default)]
    pub accounts: Vec<AccountJson>,
    pub next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AccountJson {
    pub name: String,
    #[serde(default)]
    pub account_name: Option<String>,
}

impl From<AccountJson> for PlatformAccount {
    fn from(a: AccountJson) -> Self {
        let account_name = a.account_name.unwrap_or_else(|| a.name.clone());
        PlatformAccount { name: a.name, account_name }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LocationsResponse {
    #[serde(default)]
    pub locations: Vec<LocationJson>,
    pub next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LocationJson {
    /// `locations/{id}` in the business information API.
    pub name: String,
    #[serde(default)]
    pub title: Option<String>,
}

impl LocationJson {
    /// The reviews API wants `accounts/{a}/locations/{l}`.
    pub fn into_platform(self, account: &str) -> PlatformLocation {
        let name = if self.name.starts_with("accounts/") {
            self.name
        } else {
            format!("{account}/{}", self.name)
        };
        let title = self.title.unwrap_or_else(|| name.clone());
        PlatformLocation { name, title }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ReviewsResponse {
    #[serde(default)]
    pub reviews: Vec<ReviewJson>,
    pub average_rating: Option<f64>,
    pub total_review_count: Option<u64>,
    pub next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ReviewJson {
    pub review_id: String,
    #[serde(default)]
    pub reviewer: ReviewerJson,
    pub star_rating: String,
    #[serde(default)]
    pub comment: Option<String>,
    pub create_time: DateTime<Utc>,
    pub update_time: Option<DateTime<Utc>>,
    pub review_reply: Option<ReplyJson>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ReviewerJson {
    pub display_name: Option<String>,
    #[serde(default)]
    pub is_anonymous: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ReplyJson {
    pub comment: String,
    pub update_time: Option<DateTime<Utc>>,
}

impl TryFrom<ReviewJson> for PlatformReview {
    type Error = ReviewPilotError;

    fn try_from(r: ReviewJson) -> Result<Self> {
        let rating = StarRating::from_google(&r.star_rating)?;
        let reviewer_name = match (r.reviewer.is_anonymous, r.reviewer.display_name) {
            (false, Some(name)) if !name.trim().is_empty() => name,
            _ => "Anonymous".to_string(),
        };
        Ok(PlatformReview {
            review_id: r.review_id,
            reviewer_name,
            rating,
            comment: r.comment.unwrap_or_default(),
            create_time: r.create_time,
            update_time: r.update_time.unwrap_or(r.create_time),
            reply: r.review_reply.map(|rr| PlatformReply {
                comment: rr.comment,
                update_time: rr.update_time,
            }),
        })
    }
}

/// A review Google sends in a shape we cannot store is skipped, not allowed
/// to fail the page.
impl From<ReviewsResponse> for ReviewPage {
    fn from(r: ReviewsResponse) -> Self {
        let total = r.reviews.len();
        let reviews: Vec<PlatformReview> = r
            .reviews
            .into_iter()
            .filter_map(|json| {
                let review_id = json.review_id.clone();
                PlatformReview::try_from(json)
                    .inspect_err(|e| tracing::warn!(review_id = %review_id, "skipping review: {e}"))
                    .ok()
            })
            .collect();
        ReviewPage {
            rejected: total - reviews.len(),
            reviews,
            next_page_token: r.next_page_token.filter(|t| !t.is_empty()),
            average_rating: r.average_rating,
            total_review_count: r.total_review_count,
        }
    }
}
