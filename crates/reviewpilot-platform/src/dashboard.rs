//! Dashboards over stored review data.

use chrono::Utc;
use reviewpilot_core::error::Result;
use reviewpilot_core::types::Package;
use serde::Serialize;
use std::collections::HashSet;

use crate::db::{AuditEntry, Location, PlatformDb, Review, ReviewFilter, ReviewStats, Tenant};
use crate::quota::{AiAllowance, month_start};

const RECENT_REVIEWS: u32 = 5;
const RECENT_EVENTS: usize = 20;

#[derive(Debug, Clone, Serialize)]
pub struct ClientSummary {
    pub id: String,
    pub slug: String,
    pub business_name: String,
    pub package: Package,
    pub connected: bool,
    pub locations: usize,
    pub total_reviews: u64,
    pub average_rating: Option<f64>,
    pub pending_replies: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AdminDashboard {
    pub total_clients: usize,
    pub connected_clients: usize,
    pub reviews: ReviewStats,
    pub clients: Vec<ClientSummary>,
    pub recent_activity: Vec<AuditEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClientDashboard {
    pub client: Tenant,
    pub connected: bool,
    pub locations: Vec<Location>,
    pub reviews: ReviewStats,
    pub ai_replies: AiAllowance,
    pub recent_reviews: Vec<Review>,
}

/// Cross-tenant overview for administrators.
pub fn admin_dashboard(db: &PlatformDb) -> Result<AdminDashboard> {
    let tenants = db.list_tenants()?;
    let connected: HashSet<String> = db.connected_tenant_ids()?.into_iter().collect();

    let mut clients = Vec::with_capacity(tenants.len());
    for t in &tenants {
        let stats = db.review_stats(Some(&t.id))?;
        clients.push(ClientSummary {
            id: t.id.clone(),
            slug: t.slug.clone(),
            business_name: t.business_name.clone(),
            package: t.package,
            connected: connected.contains(&t.id),
            locations: db.list_locations(&t.id)?.len(),
            total_reviews: stats.total,
            average_rating: stats.average_rating,
            pending_replies: stats.pending(),
        });
    }

    Ok(AdminDashboard {
        total_clients: tenants.len(),
        connected_clients: clients.iter().filter(|c| c.connected).count(),
        reviews: db.review_stats(None)?,
        clients,
        recent_activity: db.recent_events(RECENT_EVENTS)?,
    })
}

/// One tenant's own figures.
pub fn client_dashboard(db: &PlatformDb, tenant_id: &str) -> Result<ClientDashboard> {
    let client = db.get_tenant(tenant_id)?;
    let used = db.ai_usage_since(tenant_id, month_start(Utc::now()))?;
    let recent = db.list_reviews(&ReviewFilter {
        tenant_id: Some(tenant_id.to_string()),
        limit: Some(RECENT_REVIEWS),
        ..Default::default()
    })?;
    Ok(ClientDashboard {
        connected: db.get_credential(tenant_id)?.is_some(),
        locations: db.list_locations(tenant_id)?,
        reviews: db.review_stats(Some(tenant_id))?,
        ai_replies: AiAllowance::new(client.package, used),
        recent_reviews: recent.reviews,
        client,
    })
}
