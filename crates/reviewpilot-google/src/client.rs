//! Google Business Profile client.
//!
//! Talks to four Google surfaces: the OAuth 2 endpoints, Account Management v1
//! (accounts), Business Information v1 (locations) and the v4 reviews API
//! (listing reviews and putting owner replies). Every base URL comes from
//! [`GoogleConfig`] so the whole client can be pointed at a local mock.

use async_trait::async_trait;
use reviewpilot_core::config::GoogleConfig;
use reviewpilot_core::error::{ReviewPilotError, Result};
use reviewpilot_core::traits::ReviewPlatform;
use reviewpilot_core::types::{PlatformAccount, PlatformLocation, ReviewPage, TokenGrant};
use serde::de::DeserializeOwned;

use crate::wire::{AccountsResponse, LocationsResponse, ReviewsResponse, TokenResponse};

/// Upper bound on accounts/locations pages; Google caps page sizes at 100.
const MAX_LISTING_PAGES: usize = 20;

pub struct GoogleBusinessClient {
    config: GoogleConfig,
    page_size: u32,
    client: reqwest::Client,
}

impl GoogleBusinessClient {
    pub fn new(config: GoogleConfig, page_size: u32) -> Self {
        Self {
            config,
            page_size: page_size.clamp(1, 50),
            client: reqwest::Client::new(),
        }
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> Result<TokenGrant> {
        let response = self
            .client
            .post(&self.config.token_url)
            .form(form)
            .send()
            .await
            .map_err(|e| ReviewPilotError::google(format!("token request failed: {e}")))?;
        let token: TokenResponse = read_json(response, "token").await?;
        Ok(token.into())
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        access_token: &str,
        query: &[(&str, &str)],
        what: &str,
    ) -> Result<T> {
        let response = self
            .client
            .get(url)
            .bearer_auth(access_token)
            .query(query)
            .send()
            .await
            .map_err(|e| ReviewPilotError::google(format!("{what} request failed: {e}")))?;
        read_json(response, what).await
    }
}

async fn read_json<T: DeserializeOwned>(response: reqwest::Response, what: &str) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ReviewPilotError::google(format!("{what} error {status}: {body}")));
    }
    response
        .json()
        .await
        .map_err(|e| ReviewPilotError::google(format!("parse {what} response: {e}")))
}

#[async_trait]
impl ReviewPlatform for GoogleBusinessClient {
    fn authorization_url(&self, state: &str) -> String {
        let params = [
            ("client_id", self.config.client_id.as_str()),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("response_type", "code"),
            ("scope", self.config.scope.as_str()),
            ("access_type", "offline"),
            ("prompt", "consent"),
            ("include_granted_scopes", "true"),
            ("state", state),
        ];
        let query = params
            .iter()
            .map(|(k, v)| format!("{k}={}", urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        format!("{}?{query}", self.config.auth_url)
    }

    async fn exchange_code(&self, code: &str) -> Result<TokenGrant> {
        self.token_request(&[
            ("code", code),
            ("client_id", &self.config.client_id),
            ("client_secret", &self.config.client_secret),
            ("redirect_uri", &self.config.redirect_uri),
            ("grant_type", "authorization_code"),
        ])
        .await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant> {
        self.token_request(&[
            ("refresh_token", refresh_token),
            ("client_id", &self.config.client_id),
            ("client_secret", &self.config.client_secret),
            ("grant_type", "refresh_token"),
        ])
        .await
    }

    async fn revoke(&self, token: &str) -> Result<()> {
        let response = self
            .client
            .post(&self.config.revoke_url)
            .form(&[("token", token)])
            .send()
            .await
            .map_err(|e| ReviewPilotError::google(format!("revoke request failed: {e}")))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ReviewPilotError::google(format!("revoke error {status}: {body}")));
        }
        Ok(())
    }

    async fn list_accounts(&self, access_token: &str) -> Result<Vec<PlatformAccount>> {
        let url = format!("{}/accounts", self.config.account_api_base);
        let mut accounts = Vec::new();
        let mut page_token: Option<String> = None;
        for _ in 0..MAX_LISTING_PAGES {
            let mut query = vec![("pageSize", "20")];
            if let Some(ref t) = page_token {
                query.push(("pageToken", t.as_str()));
            }
            let page: AccountsResponse = self.get_json(&url, access_token, &query, "accounts").await?;
            accounts.extend(page.accounts.into_iter().map(PlatformAccount::from));
            page_token = page.next_page_token.filter(|t| !t.is_empty());
            if page_token.is_none() {
                break;
            }
        }
        Ok(accounts)
    }

    async fn list_locations(&self, access_token: &str, account: &str) -> Result<Vec<PlatformLocation>> {
        let url = format!("{}/{account}/locations", self.config.business_info_api_base);
        let mut locations = Vec::new();
        let mut page_token: Option<String> = None;
        for _ in 0..MAX_LISTING_PAGES {
            let mut query = vec![("readMask", "name,title"), ("pageSize", "100")];
            if let Some(ref t) = page_token {
                query.push(("pageToken", t.as_str()));
            }
            let page: LocationsResponse = self.get_json(&url, access_token, &query, "locations").await?;
            locations.extend(page.locations.into_iter().map(|l| l.into_platform(account)));
            page_token = page.next_page_token.filter(|t| !t.is_empty());
            if page_token.is_none() {
                break;
            }
        }
        Ok(locations)
    }

    async fn list_reviews(
        &self,
        access_token: &str,
        location: &str,
        page_token: Option<&str>,
    ) -> Result<ReviewPage> {
        let url = format!("{}/{location}/reviews", self.config.reviews_api_base);
        let page_size = self.page_size.to_string();
        let mut query = vec![("pageSize", page_size.as_str()), ("orderBy", "updateTime desc")];
        if let Some(t) = page_token {
            query.push(("pageToken", t));
        }
        let response: ReviewsResponse = self.get_json(&url, access_token, &query, "reviews").await?;
        Ok(ReviewPage::from(response))
    }

    async fn put_reply(
        &self,
        access_token: &str,
        location: &str,
        review_id: &str,
        comment: &str,
    ) -> Result<()> {
        let url = format!(
            "{}/{location}/reviews/{}/reply",
            self.config.reviews_api_base,
            urlencoding::encode(review_id)
        );
        let response = self
            .client
            .put(&url)
            .bearer_auth(access_token)
            .json(&serde_json::json!({ "comment": comment }))
            .send()
            .await
            .map_err(|e| ReviewPilotError::google(format!("reply request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ReviewPilotError::google(format!("reply error {status}: {body}")));
        }
        tracing::info!(location, review_id, "reply posted to Google");
        Ok(())
    }
}
