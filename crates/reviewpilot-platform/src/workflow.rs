//! Reply workflow: draft with the LLM, edit, then approve and post to Google.
//!
//! `none → drafted → edited → posted`, with `drafted → posted` allowed.
//! Every state write is a compare-and-set on the expected prior state, so
//! two requests racing on the same review cannot both win.

use chrono::Utc;
use reviewpilot_core::error::{ReviewPilotError, Result};
use reviewpilot_core::traits::provider::GenerateParams;
use reviewpilot_core::traits::{Provider, ReviewPlatform};
use reviewpilot_core::types::{ReplyState, StarRating};
use reviewpilot_providers::reply::{ReplyContext, build_reply_messages, clean_reply};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::db::{PlatformDb, Review, Tenant};
use crate::oauth::OAuthConnector;
use crate::quota::{AiAllowance, month_start};
use crate::{Scope, SharedDb, lock_db};

pub const MAX_REPLY_CHARS: usize = 4096;

pub struct ReplyWorkflow {
    db: SharedDb,
    platform: Arc<dyn ReviewPlatform>,
    oauth: Arc<OAuthConnector>,
    provider: Arc<dyn Provider>,
    params: GenerateParams,
    approvals: Mutex<HashSet<String>>,
}

/// Holds a review id in the in-flight approval set until dropped.
struct ApprovalGuard<'a> {
    set: &'a Mutex<HashSet<String>>,
    review_id: String,
}

impl<'a> ApprovalGuard<'a> {
    fn acquire(set: &'a Mutex<HashSet<String>>, review_id: &str) -> Result<Self> {
        let mut in_flight = set
            .lock()
            .map_err(|e| ReviewPilotError::database(format!("approval set poisoned: {e}")))?;
        if !in_flight.insert(review_id.to_string()) {
            return Err(ReviewPilotError::validation("reply approval already in progress"));
        }
        Ok(Self { set, review_id: review_id.to_string() })
    }
}

impl Drop for ApprovalGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut in_flight) = self.set.lock() {
            in_flight.remove(&self.review_id);
        }
    }
}

/// Load a review the caller may see. Other tenants' reviews look missing.
fn scoped_review(db: &PlatformDb, scope: &Scope, review_id: &str) -> Result<Review> {
    let review = db.get_review(review_id)?;
    if !scope.allows(&review.tenant_id) {
        return Err(ReviewPilotError::not_found("review"));
    }
    Ok(review)
}

/// The error for a review found in a state the operation cannot start from.
fn state_error(state: ReplyState) -> ReviewPilotError {
    match state {
        ReplyState::NoReply => ReviewPilotError::ReplyMissing,
        ReplyState::Posted => ReviewPilotError::ReplyAlreadyPosted,
        ReplyState::Drafted | ReplyState::Edited => ReviewPilotError::ReplyAlreadyExists,
    }
}

fn ensure_allowance(db: &PlatformDb, tenant: &Tenant) -> Result<()> {
    let used = db.ai_usage_since(&tenant.id, month_start(Utc::now()))?;
    let allowance = AiAllowance::new(tenant.package, used);
    if allowance.exhausted() {
        return Err(ReviewPilotError::QuotaExceeded(format!(
            "{} package allows {} AI replies per month",
            tenant.package,
            allowance.limit.unwrap_or_default()
        )));
    }
    Ok(())
}

impl ReplyWorkflow {
    pub fn new(
        db: SharedDb,
        platform: Arc<dyn ReviewPlatform>,
        oauth: Arc<OAuthConnector>,
        provider: Arc<dyn Provider>,
        params: GenerateParams,
    ) -> Self {
        Self { db, platform, oauth, provider, params, approvals: Mutex::new(HashSet::new()) }
    }

    pub fn get(&self, scope: &Scope, review_id: &str) -> Result<Review> {
        let db = lock_db(&self.db)?;
        scoped_review(&db, scope, review_id)
    }

    /// Draft a reply with the LLM. Only allowed when the review has none.
    pub async fn generate(&self, scope: &Scope, review_id: &str) -> Result<Review> {
        let (review, tenant) = {
            let db = lock_db(&self.db)?;
            let review = scoped_review(&db, scope, review_id)?;
            if review.reply_state != ReplyState::NoReply {
                return Err(ReviewPilotError::ReplyAlreadyExists);
            }
            let tenant = db.get_tenant(&review.tenant_id)?;
            if !tenant.ai_replies_enabled {
                return Err(ReviewPilotError::validation(format!(
                    "AI replies are disabled for client '{}'",
                    tenant.slug
                )));
            }
            ensure_allowance(&db, &tenant)?;
            (review, tenant)
        };

        let rating = StarRating::new(review.rating)?;
        let messages = build_reply_messages(&ReplyContext {
            business_name: &tenant.business_name,
            reviewer_name: &review.reviewer_name,
            rating,
            review_text: &review.comment,
            tone: &tenant.reply_tone,
            signature: tenant.reply_signature.as_deref(),
        });
        let response = self.provider.chat(&messages, &self.params).await?;
        let text = clean_reply(response.content.as_deref().unwrap_or_default());
        if text.is_empty() {
            return Err(ReviewPilotError::Provider(format!("{} returned an empty reply", self.provider.name())));
        }
        let tokens = response.usage.map(|u| u.total_tokens).unwrap_or(0);

        let db = lock_db(&self.db)?;
        // Other drafts may have used up the allowance while the LLM was busy.
        ensure_allowance(&db, &tenant)?;
        if !db.save_draft(review_id, &text)? {
            return Err(ReviewPilotError::ReplyAlreadyExists);
        }
        db.record_ai_usage(&tenant.id, review_id, self.provider.name(), tokens)?;
        db.log_event("reply_generated", "tenant", &tenant.id, Some(&format!("review={review_id}")))?;
        tracing::info!(tenant = %tenant.slug, review_id = %review_id, provider = self.provider.name(), "reply drafted");
        db.get_review(review_id)
    }

    /// Replace the draft text. Rejected once posted.
    pub fn edit(&self, scope: &Scope, review_id: &str, text: &str, actor_id: &str) -> Result<Review> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ReviewPilotError::validation("reply_text must not be empty"));
        }
        if text.chars().count() > MAX_REPLY_CHARS {
            return Err(ReviewPilotError::validation(format!(
                "reply_text must be at most {MAX_REPLY_CHARS} characters"
            )));
        }

        let db = lock_db(&self.db)?;
        let review = scoped_review(&db, scope, review_id)?;
        if !review.reply_state.is_pending() {
            return Err(state_error(review.reply_state));
        }
        if !db.edit_reply(review_id, text)? {
            return Err(state_error(db.get_review(review_id)?.reply_state));
        }
        db.log_event("reply_edited", "user", actor_id, Some(&format!("review={review_id}")))?;
        tracing::info!(review_id = %review_id, "reply edited");
        db.get_review(review_id)
    }

    /// Post the current draft to Google and mark it posted.
    pub async fn approve(&self, scope: &Scope, review_id: &str, approved_by: &str) -> Result<Review> {
        let review = self.get(scope, review_id)?;
        if !review.reply_state.is_pending() {
            return Err(state_error(review.reply_state));
        }
        let _guard = ApprovalGuard::acquire(&self.approvals, review_id)?;

        // Re-read under the guard: an approval that finished in between has
        // already moved the state.
        let review = self.get(scope, review_id)?;
        if !review.reply_state.is_pending() {
            return Err(state_error(review.reply_state));
        }
        let text = review.reply_text.clone().ok_or(ReviewPilotError::ReplyMissing)?;

        let access_token = self.oauth.access_token(&review.tenant_id).await?;
        self.platform
            .put_reply(&access_token, &review.google_location_id, &review.google_review_id, &text)
            .await?;

        let db = lock_db(&self.db)?;
        if !db.mark_posted(review_id, &text, approved_by)? {
            let current = db.get_review(review_id)?;
            if current.reply_state == ReplyState::Posted {
                return Err(ReviewPilotError::ReplyAlreadyPosted);
            }
            tracing::warn!(review_id = %review_id, "reply text changed while posting");
            return Err(ReviewPilotError::Conflict("reply was edited while it was being posted".into()));
        }
        db.log_event("reply_posted", "user", approved_by, Some(&format!("review={review_id}")))?;
        tracing::info!(client = %review.client_slug, review_id = %review_id, "reply posted to Google");
        db.get_review(review_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::fetched;
    use crate::db::NewTenant;
    use crate::shared;
    use crate::testing::FakePlatform;
    use reviewpilot_core::types::{Message, ModelInfo, Package, ProviderResponse, ReplySource};
    use reviewpilot_providers::mock::MockProvider;

    struct Fixture {
        db: SharedDb,
        platform: Arc<FakePlatform>,
        workflow: Arc<ReplyWorkflow>,
        tenant_id: String,
        review_id: String,
    }

    async fn fixture(connect: bool) -> Fixture {
        let db = shared(PlatformDb::open_in_memory().unwrap());
        let (tenant, location) = {
            let d = lock_db(&db).unwrap();
            let t = d
                .create_tenant(&NewTenant { slug: "acme", business_name: "Acme Bakery", package: Package::Basic })
                .unwrap();
            let l = d.upsert_location(&t.id, "accounts/1/locations/10", "Main Street").unwrap();
            (t, l)
        };
        let platform = Arc::new(FakePlatform::new());
        let oauth = Arc::new(OAuthConnector::new(db.clone(), platform.clone(), "secret", 600));
        if connect {
            let state = oauth.sign_state(&tenant.id, Utc::now().timestamp()).unwrap();
            oauth.complete("code", &state).await.unwrap();
        }
        let review_id = {
            let d = lock_db(&db).unwrap();
            d.upsert_platform_review(&tenant.id, &location.id, &fetched("g1", 5, "Best croissants", "2024-03-01T09:00:00Z"))
                .unwrap();
            d.find_review(&location.id, "g1").unwrap().unwrap().id
        };
        let workflow = Arc::new(ReplyWorkflow::new(
            db.clone(),
            platform.clone(),
            oauth,
            Arc::new(MockProvider::new()),
            GenerateParams::default(),
        ));
        Fixture { db, platform, workflow, tenant_id: tenant.id, review_id }
    }

    #[tokio::test]
    async fn test_full_lifecycle() {
        let f = fixture(true).await;
        let drafted = f.workflow.generate(&Scope::All, &f.review_id).await.unwrap();
        assert_eq!(drafted.reply_state, ReplyState::Drafted);
        assert_eq!(drafted.reply_source, Some(ReplySource::Ai));
        assert!(drafted.reply_text.as_deref().unwrap().starts_with("Thank you so much, Jordan!"));

        let edited = f.workflow.edit(&Scope::All, &f.review_id, "  Thanks Jordan, see you soon!  ", "u1").unwrap();
        assert_eq!(edited.reply_state, ReplyState::Edited);
        assert_eq!(edited.reply_text.as_deref(), Some("Thanks Jordan, see you soon!"));

        let posted = f.workflow.approve(&Scope::All, &f.review_id, "owner@acme.com").await.unwrap();
        assert_eq!(posted.reply_state, ReplyState::Posted);
        assert_eq!(posted.approved_by.as_deref(), Some("owner@acme.com"));
        assert!(posted.reply_posted_at.is_some());

        let st = f.platform.state.lock().unwrap();
        assert_eq!(st.posted, vec![("access-code".into(), "g1".into(), "Thanks Jordan, see you soon!".into())]);
    }

    #[tokio::test]
    async fn test_generate_twice_rejected() {
        let f = fixture(true).await;
        f.workflow.generate(&Scope::All, &f.review_id).await.unwrap();
        assert!(matches!(
            f.workflow.generate(&Scope::All, &f.review_id).await,
            Err(ReviewPilotError::ReplyAlreadyExists)
        ));
    }

    #[tokio::test]
    async fn test_posted_reply_is_frozen() {
        let f = fixture(true).await;
        f.workflow.generate(&Scope::All, &f.review_id).await.unwrap();
        f.workflow.approve(&Scope::All, &f.review_id, "a").await.unwrap();
        assert!(matches!(
            f.workflow.edit(&Scope::All, &f.review_id, "new text", "u1"),
            Err(ReviewPilotError::ReplyAlreadyPosted)
        ));
        assert!(matches!(
            f.workflow.approve(&Scope::All, &f.review_id, "a").await,
            Err(ReviewPilotError::ReplyAlreadyPosted)
        ));
        assert!(matches!(
            f.workflow.generate(&Scope::All, &f.review_id).await,
            Err(ReviewPilotError::ReplyAlreadyExists)
        ));
    }

    #[tokio::test]
    async fn test_edit_and_approve_need_a_draft() {
        let f = fixture(true).await;
        assert!(matches!(
            f.workflow.edit(&Scope::All, &f.review_id, "hello", "u1"),
            Err(ReviewPilotError::ReplyMissing)
        ));
        assert!(matches!(
            f.workflow.approve(&Scope::All, &f.review_id, "a").await,
            Err(ReviewPilotError::ReplyMissing)
        ));
    }

    #[tokio::test]
    async fn test_edit_validation() {
        let f = fixture(true).await;
        f.workflow.generate(&Scope::All, &f.review_id).await.unwrap();
        assert!(matches!(
            f.workflow.edit(&Scope::All, &f.review_id, "   ", "u1"),
            Err(ReviewPilotError::Validation(_))
        ));
        let long = "x".repeat(MAX_REPLY_CHARS + 1);
        assert!(matches!(
            f.workflow.edit(&Scope::All, &f.review_id, &long, "u1"),
            Err(ReviewPilotError::Validation(_))
        ));
        let review = f.workflow.get(&Scope::All, &f.review_id).unwrap();
        assert_eq!(review.reply_state, ReplyState::Drafted);
    }

    #[tokio::test]
    async fn test_approve_requires_oauth() {
        let f = fixture(false).await;
        f.workflow.generate(&Scope::All, &f.review_id).await.unwrap();
        assert!(matches!(
            f.workflow.approve(&Scope::All, &f.review_id, "a").await,
            Err(ReviewPilotError::OAuthNotConnected(_))
        ));
        assert_eq!(f.workflow.get(&Scope::All, &f.review_id).unwrap().reply_state, ReplyState::Drafted);
    }

    #[tokio::test]
    async fn test_google_failure_leaves_draft() {
        let f = fixture(true).await;
        f.workflow.generate(&Scope::All, &f.review_id).await.unwrap();
        f.platform.state.lock().unwrap().fail_put = true;
        assert!(matches!(
            f.workflow.approve(&Scope::All, &f.review_id, "a").await,
            Err(ReviewPilotError::Google(_))
        ));
        assert_eq!(f.workflow.get(&Scope::All, &f.review_id).unwrap().reply_state, ReplyState::Drafted);

        f.platform.state.lock().unwrap().fail_put = false;
        let posted = f.workflow.approve(&Scope::All, &f.review_id, "a").await.unwrap();
        assert_eq!(posted.reply_state, ReplyState::Posted);
    }

    #[tokio::test]
    async fn test_other_tenant_sees_not_found() {
        let f = fixture(true).await;
        let stranger = Scope::Tenant("someone-else".into());
        assert!(matches!(f.workflow.get(&stranger, &f.review_id), Err(ReviewPilotError::NotFound(_))));
        assert!(matches!(
            f.workflow.generate(&stranger, &f.review_id).await,
            Err(ReviewPilotError::NotFound(_))
        ));
        assert!(f.workflow.get(&Scope::Tenant(f.tenant_id.clone()), &f.review_id).is_ok());
    }

    #[tokio::test]
    async fn test_quota_and_disabled_ai() {
        let f = fixture(true).await;
        {
            let db = lock_db(&f.db).unwrap();
            for i in 0..100 {
                db.record_ai_usage(&f.tenant_id, &format!("r{i}"), "mock", 10).unwrap();
            }
        }
        assert!(matches!(
            f.workflow.generate(&Scope::All, &f.review_id).await,
            Err(ReviewPilotError::QuotaExceeded(_))
        ));

        lock_db(&f.db).unwrap().update_tenant_settings(&f.tenant_id, false, "friendly", None).unwrap();
        assert!(matches!(
            f.workflow.generate(&Scope::All, &f.review_id).await,
            Err(ReviewPilotError::Validation(_))
        ));
    }

    /// Uses up the tenant's allowance while the reply is being drafted.
    struct GreedyProvider {
        db: SharedDb,
        tenant_id: String,
    }

    #[async_trait::async_trait]
    impl Provider for GreedyProvider {
        fn name(&self) -> &str {
            "greedy"
        }

        async fn chat(&self, messages: &[Message], params: &GenerateParams) -> Result<ProviderResponse> {
            {
                let db = lock_db(&self.db)?;
                for i in 0..100 {
                    db.record_ai_usage(&self.tenant_id, &format!("other{i}"), "mock", 10)?;
                }
            }
            MockProvider::new().chat(messages, params).await
        }

        async fn list_models(&self) -> Result<Vec<ModelInfo>> {
            Ok(vec![])
        }

        async fn health_check(&self) -> Result<bool> {
            Ok(true)
        }
    }

    #[tokio::test]
    async fn test_allowance_rechecked_before_saving_draft() {
        let f = fixture(true).await;
        let oauth = Arc::new(OAuthConnector::new(f.db.clone(), f.platform.clone(), "secret", 600));
        let provider = Arc::new(GreedyProvider { db: f.db.clone(), tenant_id: f.tenant_id.clone() });
        let workflow = ReplyWorkflow::new(f.db.clone(), f.platform.clone(), oauth, provider, GenerateParams::default());
        assert!(matches!(
            workflow.generate(&Scope::All, &f.review_id).await,
            Err(ReviewPilotError::QuotaExceeded(_))
        ));
        let review = workflow.get(&Scope::All, &f.review_id).unwrap();
        assert_eq!(review.reply_state, ReplyState::NoReply);
        assert!(review.reply_text.is_none());
        let used = lock_db(&f.db).unwrap().ai_usage_since(&f.tenant_id, month_start(Utc::now())).unwrap();
        assert_eq!(used, 100);
    }

    #[tokio::test]
    async fn test_concurrent_approval_is_rejected() {
        let f = fixture(true).await;
        f.workflow.generate(&Scope::All, &f.review_id).await.unwrap();
        let held = ApprovalGuard::acquire(&f.workflow.approvals, &f.review_id).unwrap();
        let err = f.workflow.approve(&Scope::All, &f.review_id, "a").await.unwrap_err();
        assert_eq!(err.to_string(), "reply approval already in progress");
        drop(held);
        assert!(f.workflow.approve(&Scope::All, &f.review_id, "a").await.is_ok());
    }
}
