//! Google OAuth connector: per-tenant authorization-code flow, credential
//! storage and access-token refresh.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{TimeDelta, Utc};
use hmac::{Hmac, Mac};
use reviewpilot_core::error::{ReviewPilotError, Result};
use reviewpilot_core::traits::ReviewPlatform;
use serde::Serialize;
use sha2::Sha256;
use std::collections::HashSet;
use std::sync::Arc;

use crate::db::{Location, OAuthCredential, now_ts, parse_ts, ts};
use crate::{SharedDb, lock_db};

type HmacSha256 = Hmac<Sha256>;

/// Access tokens closer than this to expiry are refreshed before use.
pub const REFRESH_MARGIN_SECS: i64 = 60;

/// How far in the future a state's `issued_at` may be.
pub const STATE_CLOCK_SKEW_SECS: i64 = 60;

/// Longest `expires_in` accepted from a token response.
const MAX_TOKEN_LIFETIME_SECS: i64 = 30 * 24 * 3600;

#[derive(Debug, Clone, Serialize)]
pub struct ConnectUrl {
    pub auth_url: String,
    pub state: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectResult {
    pub tenant_id: String,
    pub account_id: Option<String>,
    pub locations: Vec<Location>,
    /// Locations left out because the package limit was reached.
    pub skipped_locations: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct OAuthStatus {
    pub connected: bool,
    pub account_id: Option<String>,
    pub expires_at: Option<String>,
    pub scope: Option<String>,
    pub connected_at: Option<String>,
    pub locations: Vec<Location>,
}

pub struct OAuthConnector {
    db: SharedDb,
    platform: Arc<dyn ReviewPlatform>,
    state_secret: String,
    state_ttl_secs: i64,
}

/// Expiry timestamp for a token granted now with `expires_in` seconds.
fn expiry_after(expires_in: i64) -> Result<String> {
    if !(0..=MAX_TOKEN_LIFETIME_SECS).contains(&expires_in) {
        return Err(ReviewPilotError::google(format!("bad expires_in: {expires_in}")));
    }
    TimeDelta::try_seconds(expires_in)
        .and_then(|d| Utc::now().checked_add_signed(d))
        .map(ts)
        .ok_or_else(|| ReviewPilotError::google(format!("bad expires_in: {expires_in}")))
}

impl OAuthConnector {
    pub fn new(db: SharedDb, platform: Arc<dyn ReviewPlatform>, state_secret: impl Into<String>, state_ttl_secs: i64) -> Self {
        Self { db, platform, state_secret: state_secret.into(), state_ttl_secs }
    }

    fn mac(&self) -> Result<HmacSha256> {
        HmacSha256::new_from_slice(self.state_secret.as_bytes())
            .map_err(|e| ReviewPilotError::Config(format!("state signing key: {e}")))
    }

    /// `base64url(tenant_id:issued_at).hex(hmac)`
    pub fn sign_state(&self, tenant_id: &str, issued_at: i64) -> Result<String> {
        let payload = URL_SAFE_NO_PAD.encode(format!("{tenant_id}:{issued_at}"));
        let mut mac = self.mac()?;
        mac.update(payload.as_bytes());
        Ok(format!("{payload}.{}", hex::encode(mac.finalize().into_bytes())))
    }

    /// Check signature and age of a `state` value; returns the tenant id.
    pub fn verify_state(&self, state: &str) -> Result<String> {
        let invalid = |why: &str| ReviewPilotError::InvalidState(why.into());
        let (payload, sig) = state.split_once('.').ok_or_else(|| invalid("malformed"))?;
        let sig = hex::decode(sig).map_err(|_| invalid("malformed signature"))?;
        let mut mac = self.mac()?;
        mac.update(payload.as_bytes());
        mac.verify_slice(&sig).map_err(|_| invalid("signature mismatch"))?;

        let decoded = URL_SAFE_NO_PAD.decode(payload).map_err(|_| invalid("malformed payload"))?;
        let decoded = String::from_utf8(decoded).map_err(|_| invalid("malformed payload"))?;
        let (tenant_id, issued_at) = decoded.rsplit_once(':').ok_or_else(|| invalid("malformed payload"))?;
        let issued_at: i64 = issued_at.parse().map_err(|_| invalid("malformed timestamp"))?;
        let age = Utc::now().timestamp() - issued_at;
        if age > self.state_ttl_secs || age < -STATE_CLOCK_SKEW_SECS {
            return Err(invalid("expired"));
        }
        Ok(tenant_id.to_string())
    }

    /// Build the consent URL for a tenant.
    pub fn connect(&self, tenant_id: &str) -> Result<ConnectUrl> {
        let tenant = lock_db(&self.db)?.get_tenant(tenant_id)?;
        let state = self.sign_state(&tenant.id, Utc::now().timestamp())?;
        let auth_url = self.platform.authorization_url(&state);
        tracing::info!(tenant = %tenant.slug, "OAuth consent URL issued");
        Ok(ConnectUrl { auth_url, state })
    }

    /// Finish the flow: exchange the code, store the credential and register
    /// the account's locations.
    pub async fn complete(&self, code: &str, state: &str) -> Result<ConnectResult> {
        let tenant_id = self.verify_state(state)?;
        if code.trim().is_empty() {
            return Err(ReviewPilotError::validation("authorization code is required"));
        }
        let (tenant, previous) = {
            let db = lock_db(&self.db)?;
            (db.get_tenant(&tenant_id)?, db.get_credential(&tenant_id)?)
        };

        let grant = self.platform.exchange_code(code).await?;
        let expires_at = expiry_after(grant.expires_in)?;
        let refresh_token = grant
            .refresh_token
            .clone()
            .or_else(|| previous.map(|p| p.refresh_token))
            .ok_or_else(|| ReviewPilotError::google("no refresh token"))?;

        let accounts = self.platform.list_accounts(&grant.access_token).await?;
        let account = accounts.into_iter().next();
        let discovered = match &account {
            Some(a) => self.platform.list_locations(&grant.access_token, &a.name).await?,
            None => {
                tracing::warn!(tenant = %tenant.slug, "Google login has no business accounts");
                Vec::new()
            }
        };

        let db = lock_db(&self.db)?;
        db.save_credential(&OAuthCredential {
            tenant_id: tenant.id.clone(),
            access_token: grant.access_token.clone(),
            refresh_token,
            expires_at,
            scope: grant.scope.clone(),
            account_id: account.as_ref().map(|a| a.name.clone()),
            connected_at: now_ts(),
        })?;

        let mut known: HashSet<String> =
            db.list_locations(&tenant.id)?.into_iter().map(|l| l.google_location_id).collect();
        let limit = tenant.package.max_locations().map(|n| n as usize);
        let mut skipped_locations = 0;
        for loc in &discovered {
            let is_new = !known.contains(&loc.name);
            if is_new && limit.is_some_and(|max| known.len() >= max) {
                skipped_locations += 1;
                continue;
            }
            db.upsert_location(&tenant.id, &loc.name, &loc.title)?;
            known.insert(loc.name.clone());
        }
        if skipped_locations > 0 {
            tracing::warn!(
                tenant = %tenant.slug,
                package = %tenant.package,
                skipped = skipped_locations,
                "location limit reached"
            );
        }
        let locations = db.list_locations(&tenant.id)?;
        db.log_event(
            "oauth_connected",
            "tenant",
            &tenant.id,
            Some(&format!("locations={}", locations.len())),
        )?;
        tracing::info!(tenant = %tenant.slug, locations = locations.len(), "Google account connected");

        Ok(ConnectResult {
            tenant_id: tenant.id,
            account_id: account.map(|a| a.name),
            locations,
            skipped_locations,
        })
    }

    pub fn status(&self, tenant_id: &str) -> Result<OAuthStatus> {
        let db = lock_db(&self.db)?;
        db.get_tenant(tenant_id)?;
        let cred = db.get_credential(tenant_id)?;
        let locations = db.list_locations(tenant_id)?;
        Ok(match cred {
            Some(c) => OAuthStatus {
                connected: true,
                account_id: c.account_id,
                expires_at: Some(c.expires_at),
                scope: c.scope,
                connected_at: Some(c.connected_at),
                locations,
            },
            None => OAuthStatus {
                connected: false,
                account_id: None,
                expires_at: None,
                scope: None,
                connected_at: None,
                locations,
            },
        })
    }

    /// Revoke at Google (best effort) and forget the credential. Returns
    /// whether a credential existed.
    pub async fn disconnect(&self, tenant_id: &str) -> Result<bool> {
        let cred = {
            let db = lock_db(&self.db)?;
            db.get_tenant(tenant_id)?;
            db.get_credential(tenant_id)?
        };
        let Some(cred) = cred else {
            return Ok(false);
        };
        if let Err(e) = self.platform.revoke(&cred.refresh_token).await {
            tracing::warn!(tenant_id = %tenant_id, "token revoke failed, removing credential anyway: {e}");
        }
        let db = lock_db(&self.db)?;
        let removed = db.delete_credential(tenant_id)?;
        db.log_event("oauth_disconnected", "tenant", tenant_id, None)?;
        tracing::info!(tenant_id = %tenant_id, "Google account disconnected");
        Ok(removed)
    }

    /// A usable access token, refreshed first when close to expiry.
    pub async fn access_token(&self, tenant_id: &str) -> Result<String> {
        let cred = {
            let db = lock_db(&self.db)?;
            match db.get_credential(tenant_id)? {
                Some(c) => c,
                None => {
                    let slug = db.get_tenant(tenant_id)?.slug;
                    return Err(ReviewPilotError::OAuthNotConnected(slug));
                }
            }
        };

        let now = Utc::now();
        if parse_ts(&cred.expires_at)? > now + TimeDelta::seconds(REFRESH_MARGIN_SECS) {
            return Ok(cred.access_token);
        }

        tracing::debug!(tenant_id = %tenant_id, "refreshing Google access token");
        let grant = self.platform.refresh(&cred.refresh_token).await?;
        let expires_at = expiry_after(grant.expires_in)?;
        lock_db(&self.db)?.update_access_token(tenant_id, &grant.access_token, &expires_at)?;
        Ok(grant.access_token)
    }
}
