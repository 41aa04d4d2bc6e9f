//! # ReviewPilot Platform
//!
//! Multi-tenant review management: tenant onboarding, authentication,
//! Google OAuth connections, review sync, the reply workflow and the
//! dashboards built over stored reviews.

pub mod auth;
pub mod dashboard;
pub mod db;
pub mod oauth;
pub mod quota;
pub mod sheet;
pub mod sync;
pub mod tenant;
pub mod workflow;

use std::sync::{Arc, Mutex, MutexGuard};

use reviewpilot_core::error::{ReviewPilotError, Result};

pub use db::PlatformDb;
pub use oauth::OAuthConnector;
pub use sync::ReviewSync;
pub use workflow::ReplyWorkflow;

/// The platform database shared between request handlers and background tasks.
pub type SharedDb = Arc<Mutex<PlatformDb>>;

pub fn shared(db: PlatformDb) -> SharedDb {
    Arc::new(Mutex::new(db))
}

/// Lock the shared database. Never hold the guard across an `.await`.
pub fn lock_db(db: &SharedDb) -> Result<MutexGuard<'_, PlatformDb>> {
    db.lock()
        .map_err(|e| ReviewPilotError::database(format!("database lock poisoned: {e}")))
}

/// Which tenants a caller may see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    All,
    Tenant(String),
}

impl Scope {
    pub fn allows(&self, tenant_id: &str) -> bool {
        match self {
            Scope::All => true,
            Scope::Tenant(own) => own == tenant_id,
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-process stand-in for the Google Business Profile API.

    use async_trait::async_trait;
    use reviewpilot_core::error::{ReviewPilotError, Result};
    use reviewpilot_core::traits::ReviewPlatform;
    use reviewpilot_core::types::{PlatformAccount, PlatformLocation, PlatformReview, ReviewPage, TokenGrant};
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct FakeState {
        pub locations: Vec<PlatformLocation>,
        /// Pages of reviews keyed by location name.
        pub pages: HashMap<String, Vec<Vec<PlatformReview>>>,
        pub posted: Vec<(String, String, String)>,
        pub fetches: Vec<(String, Option<String>)>,
        pub refreshes: u32,
        pub revoked: Vec<String>,
        pub grant_refresh_token: bool,
        pub fail_put: bool,
        pub fail_revoke: bool,
        pub expires_in: i64,
        /// Reported as `rejected` on every page.
        pub rejected_per_page: usize,
    }

    pub struct FakePlatform {
        pub state: Mutex<FakeState>,
    }

    impl FakePlatform {
        pub fn new() -> Self {
            let state = FakeState {
                locations: vec![PlatformLocation {
                    name: "accounts/1/locations/10".into(),
                    title: "Main Street".into(),
                }],
                grant_refresh_token: true,
                expires_in: 3600,
                ..Default::default()
            };
            Self { state: Mutex::new(state) }
        }

        pub fn set_reviews(&self, location: &str, pages: Vec<Vec<PlatformReview>>) {
            self.state.lock().unwrap().pages.insert(location.into(), pages);
        }
    }

    #[async_trait]
    impl ReviewPlatform for FakePlatform {
        fn authorization_url(&self, state: &str) -> String {
            format!("https://accounts.example/auth?state={state}")
        }

        async fn exchange_code(&self, code: &str) -> Result<TokenGrant> {
            if code == "bad" {
                return Err(ReviewPilotError::google("invalid_grant"));
            }
            let st = self.state.lock().unwrap();
            Ok(TokenGrant {
                access_token: format!("access-{code}"),
                refresh_token: st.grant_refresh_token.then(|| format!("refresh-{code}")),
                expires_in: st.expires_in,
                scope: Some("https://www.googleapis.com/auth/business.manage".into()),
            })
        }

        async fn refresh(&self, _refresh_token: &str) -> Result<TokenGrant> {
            let mut st = self.state.lock().unwrap();
            st.refreshes += 1;
            Ok(TokenGrant {
                access_token: format!("refreshed-{}", st.refreshes),
                refresh_token: None,
                expires_in: st.expires_in,
                scope: None,
            })
        }

        async fn revoke(&self, token: &str) -> Result<()> {
            let mut st = self.state.lock().unwrap();
            if st.fail_revoke {
                return Err(ReviewPilotError::google("revoke failed"));
            }
            st.revoked.push(token.into());
            Ok(())
        }

        async fn list_accounts(&self, _access_token: &str) -> Result<Vec<PlatformAccount>> {
            Ok(vec![PlatformAccount { name: "accounts/1".into(), account_name: "Owner".into() }])
        }

        async fn list_locations(&self, _access_token: &str, _account: &str) -> Result<Vec<PlatformLocation>> {
            Ok(self.state.lock().unwrap().locations.clone())
        }

        async fn list_reviews(
            &self,
            _access_token: &str,
            location: &str,
            page_token: Option<&str>,
        ) -> Result<ReviewPage> {
            let mut st = self.state.lock().unwrap();
            st.fetches.push((location.into(), page_token.map(String::from)));
            let pages = st.pages.get(location).cloned().unwrap_or_default();
            let idx: usize = page_token.map(|t| t.parse().unwrap()).unwrap_or(0);
            let reviews = pages.get(idx).cloned().unwrap_or_default();
            let next_page_token = (idx + 1 < pages.len()).then(|| (idx + 1).to_string());
            Ok(ReviewPage { reviews, next_page_token, rejected: st.rejected_per_page, ..Default::default() })
        }

        async fn put_reply(&self, access_token: &str, _location: &str, review_id: &str, comment: &str) -> Result<()> {
            let mut st = self.state.lock().unwrap();
            if st.fail_put {
                return Err(ReviewPilotError::google("HTTP 503: backend unavailable"));
            }
            st.posted.push((access_token.into(), review_id.into(), comment.into()));
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_allows() {
        assert!(Scope::All.allows("t1"));
        assert!(Scope::Tenant("t1".into()).allows("t1"));
        assert!(!Scope::Tenant("t1".into()).allows("t2"));
    }

    #[test]
    fn test_lock_db() {
        let db = shared(PlatformDb::open_in_memory().unwrap());
        assert!(lock_db(&db).unwrap().list_tenants().unwrap().is_empty());
    }
}
