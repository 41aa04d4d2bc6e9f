//! Review platform trait: the Google Business Profile surface ReviewPilot uses.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{PlatformAccount, PlatformLocation, ReviewPage, TokenGrant};

#[async_trait]
pub trait ReviewPlatform: Send + Sync {
    /// Consent URL the tenant owner is sent to.
    fn authorization_url(&self, state: &str) -> String;

    async fn exchange_code(&self, code: &str) -> Result<TokenGrant>;

    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant>;

    async fn revoke(&self, token: &str) -> Result<()>;

    async fn list_accounts(&self, access_token: &str) -> Result<Vec<PlatformAccount>>;

    async fn list_locations(&self, access_token: &str, account: &str) -> Result<Vec<PlatformLocation>>;

    /// Fetch one page of reviews for `location` (`accounts/{a}/locations/{l}`).
    async fn list_reviews(
        &self,
        access_token: &str,
        location: &str,
        page_token: Option<&str>,
    ) -> Result<ReviewPage>;

    /// Create or replace the owner reply on a review.
    async fn put_reply(
        &self,
        access_token: &str,
        location: &str,
        review_id: &str,
        comment: &str,
    ) -> Result<()>;
}
