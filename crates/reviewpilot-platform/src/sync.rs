//! Review sync: pull review listings from Google for every location of a
//! tenant and upsert them into storage.

use futures::{StreamExt, stream};
use reviewpilot_core::error::Result;
use reviewpilot_core::traits::ReviewPlatform;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::db::UpsertOutcome;
use crate::oauth::OAuthConnector;
use crate::{SharedDb, lock_db};

/// Tenants synced at once by [`ReviewSync::sync_all`].
const SYNC_CONCURRENCY: usize = 4;

/// Counts from one sync run.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct SyncReport {
    pub locations: usize,
    pub fetched: usize,
    pub new: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Reviews Google returned in a shape that could not be stored.
    pub rejected: usize,
}

impl SyncReport {
    fn absorb(&mut self, other: &SyncReport) {
        self.locations += other.locations;
        self.fetched += other.fetched;
        self.new += other.new;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
        self.rejected += other.rejected;
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TenantSyncFailure {
    pub tenant_id: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncAllReport {
    pub tenants: usize,
    pub totals: SyncReport,
    pub failures: Vec<TenantSyncFailure>,
}

pub struct ReviewSync {
    db: SharedDb,
    platform: Arc<dyn ReviewPlatform>,
    oauth: Arc<OAuthConnector>,
    max_pages: u32,
}

impl ReviewSync {
    pub fn new(db: SharedDb, platform: Arc<dyn ReviewPlatform>, oauth: Arc<OAuthConnector>, max_pages: u32) -> Self {
        Self { db, platform, oauth, max_pages: max_pages.max(1) }
    }

    /// Fetch and upsert every review of every location of one tenant.
    pub async fn sync_tenant(&self, tenant_id: &str) -> Result<SyncReport> {
        let access_token = self.oauth.access_token(tenant_id).await?;
        let (slug, locations) = {
            let db = lock_db(&self.db)?;
            (db.get_tenant(tenant_id)?.slug, db.list_locations(tenant_id)?)
        };

        let mut report = SyncReport { locations: locations.len(), ..Default::default() };
        for location in &locations {
            let mut page_token: Option<String> = None;
            let mut pages = 0;
            loop {
                let page = self
                    .platform
                    .list_reviews(&access_token, &location.google_location_id, page_token.as_deref())
                    .await?;
                pages += 1;
                report.fetched += page.reviews.len();
                if page.rejected > 0 {
                    tracing::warn!(
                        tenant = %slug,
                        location = %location.google_location_id,
                        rejected = page.rejected,
                        "skipped reviews with an unusable shape"
                    );
                    report.rejected += page.rejected;
                }

                {
                    let db = lock_db(&self.db)?;
                    for review in &page.reviews {
                        match db.upsert_platform_review(tenant_id, &location.id, review)? {
                            UpsertOutcome::Inserted => report.new += 1,
                            UpsertOutcome::Updated => report.updated += 1,
                            UpsertOutcome::Unchanged => report.unchanged += 1,
                        }
                    }
                }

                page_token = page.next_page_token;
                if page_token.is_none() {
                    break;
                }
                if pages >= self.max_pages {
                    tracing::warn!(
                        tenant = %slug,
                        location = %location.google_location_id,
                        "stopping after {pages} pages"
                    );
                    break;
                }
            }
            lock_db(&self.db)?.mark_location_synced(&location.id)?;
        }

        lock_db(&self.db)?.log_event(
            "reviews_synced",
            "tenant",
            tenant_id,
            Some(&format!("new={} updated={}", report.new, report.updated)),
        )?;
        tracing::info!(
            tenant = %slug,
            locations = report.locations,
            fetched = report.fetched,
            new = report.new,
            updated = report.updated,
            rejected = report.rejected,
            "review sync complete"
        );
        Ok(report)
    }

    /// Sync every connected tenant; one tenant failing does not stop the rest.
    pub async fn sync_all(&self) -> Result<SyncAllReport> {
        let tenant_ids = lock_db(&self.db)?.connected_tenant_ids()?;
        let mut all = SyncAllReport { tenants: tenant_ids.len(), ..Default::default() };
        let mut runs = stream::iter(tenant_ids)
            .map(|tenant_id| async move {
                let result = self.sync_tenant(&tenant_id).await;
                (tenant_id, result)
            })
            .buffer_unordered(SYNC_CONCURRENCY);
        while let Some((tenant_id, result)) = runs.next().await {
            match result {
                Ok(report) => all.totals.absorb(&report),
                Err(e) => {
                    tracing::error!(tenant_id = %tenant_id, "review sync failed: {e}");
                    all.failures.push(TenantSyncFailure { tenant_id, error: e.to_string() });
                }
            }
        }
        all.failures.sort_by(|a, b| a.tenant_id.cmp(&b.tenant_id));
        Ok(all)
    }

    /// Run [`sync_all`](Self::sync_all) every `interval`.
    pub fn spawn_periodic(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match self.sync_all().await {
                    Ok(r) => tracing::info!(
                        tenants = r.tenants,
                        new = r.totals.new,
                        updated = r.totals.updated,
                        failures = r.failures.len(),
                        "periodic sync finished"
                    ),
                    Err(e) => tracing::error!("periodic sync aborted: {e}"),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::fetched;
    use crate::db::{NewTenant, PlatformDb, ReviewFilter};
    use crate::shared;
    use crate::testing::FakePlatform;
    use chrono::Utc;
    use reviewpilot_core::error::ReviewPilotError;
    use reviewpilot_core::types::{Package, PlatformReply, ReplyState};

    const LOC: &str = "accounts/1/locations/10";

    async fn connected() -> (SharedDb, Arc<FakePlatform>, ReviewSync, String) {
        let db = shared(PlatformDb::open_in_memory().unwrap());
        let tenant = lock_db(&db)
            .unwrap()
            .create_tenant(&NewTenant { slug: "acme", business_name: "Acme", package: Package::Pro })
            .unwrap();
        let platform = Arc::new(FakePlatform::new());
        let oauth = Arc::new(OAuthConnector::new(db.clone(), platform.clone(), "secret", 600));
        let state = oauth.sign_state(&tenant.id, Utc::now().timestamp()).unwrap();
        oauth.complete("code", &state).await.unwrap();
        let sync = ReviewSync::new(db.clone(), platform.clone(), oauth, 100);
        (db, platform, sync, tenant.id)
    }

    #[tokio::test]
    async fn test_sync_follows_pages_and_is_idempotent() {
        let (db, platform, sync, tenant_id) = connected().await;
        platform.set_reviews(
            LOC,
            vec![
                vec![fetched("a", 5, "Great", "2024-03-01T09:00:00Z"), fetched("b", 4, "Good", "2024-03-01T09:00:00Z")],
                vec![fetched("c", 1, "Bad", "2024-03-01T09:00:00Z")],
            ],
        );

        let first = sync.sync_tenant(&tenant_id).await.unwrap();
        assert_eq!(first, SyncReport { locations: 1, fetched: 3, new: 3, updated: 0, unchanged: 0, rejected: 0 });
        {
            let st = platform.state.lock().unwrap();
            assert_eq!(st.fetches, vec![(LOC.to_string(), None), (LOC.to_string(), Some("1".to_string()))]);
        }

        let second = sync.sync_tenant(&tenant_id).await.unwrap();
        assert_eq!(second.new, 0);
        assert_eq!(second.updated, 0);
        assert_eq!(second.unchanged, 3);

        let listing = lock_db(&db).unwrap().list_reviews(&ReviewFilter::default()).unwrap();
        assert_eq!(listing.total, 3);
        assert!(lock_db(&db).unwrap().list_locations(&tenant_id).unwrap()[0].last_synced_at.is_some());
    }

    #[tokio::test]
    async fn test_sync_counts_updates_and_platform_replies() {
        let (db, platform, sync, tenant_id) = connected().await;
        platform.set_reviews(LOC, vec![vec![fetched("a", 3, "Okay", "2024-03-01T09:00:00Z")]]);
        sync.sync_tenant(&tenant_id).await.unwrap();

        let mut replied = fetched("a", 3, "Okay", "2024-03-01T09:00:00Z");
        replied.reply = Some(PlatformReply { comment: "Thanks!".into(), update_time: None });
        platform.set_reviews(LOC, vec![vec![replied, fetched("b", 5, "", "2024-03-02T09:00:00Z")]]);
        let report = sync.sync_tenant(&tenant_id).await.unwrap();
        assert_eq!(report.new, 1);
        assert_eq!(report.updated, 1);

        let posted = lock_db(&db)
            .unwrap()
            .list_reviews(&ReviewFilter { state: Some(ReplyState::Posted), ..Default::default() })
            .unwrap();
        assert_eq!(posted.total, 1);
    }

    #[tokio::test]
    async fn test_rejected_reviews_do_not_stop_the_sync() {
        let (db, platform, sync, tenant_id) = connected().await;
        platform.set_reviews(
            LOC,
            vec![
                vec![fetched("a", 5, "", "2024-03-01T09:00:00Z"), fetched("c", 4, "", "2024-03-01T09:00:00Z")],
                vec![fetched("d", 2, "", "2024-03-01T09:00:00Z")],
            ],
        );
        platform.state.lock().unwrap().rejected_per_page = 1;

        let report = sync.sync_tenant(&tenant_id).await.unwrap();
        assert_eq!(report.new, 3);
        assert_eq!(report.rejected, 2);
        assert_eq!(lock_db(&db).unwrap().list_reviews(&ReviewFilter::default()).unwrap().total, 3);
    }

    #[tokio::test]
    async fn test_sync_stops_at_page_cap() {
        let (db, platform, _, tenant_id) = connected().await;
        let pages = (0..5).map(|i| vec![fetched(&format!("r{i}"), 4, "", "2024-03-01T09:00:00Z")]).collect();
        platform.set_reviews(LOC, pages);
        let oauth = Arc::new(OAuthConnector::new(db.clone(), platform.clone(), "secret", 600));
        let capped = ReviewSync::new(db, platform, oauth, 2);
        let report = capped.sync_tenant(&tenant_id).await.unwrap();
        assert_eq!(report.fetched, 2);
    }

    #[tokio::test]
    async fn test_sync_requires_connection() {
        let db = shared(PlatformDb::open_in_memory().unwrap());
        let tenant = lock_db(&db)
            .unwrap()
            .create_tenant(&NewTenant { slug: "offline", business_name: "Offline", package: Package::Basic })
            .unwrap();
        let platform = Arc::new(FakePlatform::new());
        let oauth = Arc::new(OAuthConnector::new(db.clone(), platform.clone(), "secret", 600));
        let sync = ReviewSync::new(db, platform, oauth, 100);
        assert!(matches!(
            sync.sync_tenant(&tenant.id).await,
            Err(ReviewPilotError::OAuthNotConnected(_))
        ));
        let all = sync.sync_all().await.unwrap();
        assert_eq!(all.tenants, 0);
    }

    #[tokio::test]
    async fn test_sync_all_aggregates() {
        let (_, platform, sync, _) = connected().await;
        platform.set_reviews(LOC, vec![vec![fetched("a", 5, "", "2024-03-01T09:00:00Z")]]);
        let all = sync.sync_all().await.unwrap();
        assert_eq!(all.tenants, 1);
        assert_eq!(all.totals.new, 1);
        assert!(all.failures.is_empty());
    }
}
