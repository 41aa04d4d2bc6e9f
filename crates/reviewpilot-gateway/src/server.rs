//! HTTP server implementation using Axum.

use axum::Router;
use axum::routing::{get, post, put};
use reviewpilot_core::config::ReviewPilotConfig;
use reviewpilot_core::traits::provider::GenerateParams;
use reviewpilot_core::traits::{Provider, ReviewPlatform};
use reviewpilot_platform::{OAuthConnector, ReplyWorkflow, ReviewSync, SharedDb};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::routes;

/// Shared state for the gateway server.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ReviewPilotConfig>,
    pub db: SharedDb,
    pub oauth: Arc<OAuthConnector>,
    pub sync: Arc<ReviewSync>,
    pub workflow: Arc<ReplyWorkflow>,
    pub start_time: std::time::Instant,
}

impl AppState {
    /// Wire the platform services around one database, one review platform
    /// and one LLM provider.
    pub fn new(
        config: ReviewPilotConfig,
        db: SharedDb,
        platform: Arc<dyn ReviewPlatform>,
        provider: Arc<dyn Provider>,
    ) -> Self {
        let oauth = Arc::new(OAuthConnector::new(
            db.clone(),
            platform.clone(),
            config.auth.jwt_secret.clone(),
            config.google.state_ttl_secs,
        ));
        let sync = Arc::new(ReviewSync::new(db.clone(), platform.clone(), oauth.clone(), config.sync.max_pages));
        let params = GenerateParams {
            model: config.llm.model.clone(),
            temperature: config.llm.temperature,
            max_tokens: config.llm.max_tokens,
        };
        let workflow = Arc::new(ReplyWorkflow::new(db.clone(), platform, oauth.clone(), provider, params));
        Self {
            config: Arc::new(config),
            db,
            oauth,
            sync,
            workflow,
            start_time: std::time::Instant::now(),
        }
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(routes::health_check))
        .route("/api/auth/login", post(routes::login))
        .route("/api/auth/me", get(routes::me))
        .route("/api/google-oauth/connect", get(routes::oauth_connect))
        .route("/api/google-oauth/status", get(routes::oauth_status))
        .route(
            "/api/google-oauth/callback",
            get(routes::oauth_callback_redirect).post(routes::oauth_callback),
        )
        .route("/api/google-oauth/disconnect", post(routes::oauth_disconnect))
        .route("/api/reviews", get(routes::list_reviews))
        .route("/api/reviews/fetch", post(routes::fetch_reviews))
        .route("/api/reviews/{id}", get(routes::get_review))
        .route("/api/reviews/{id}/generate-reply", post(routes::generate_reply))
        .route("/api/reviews/{id}/reply", put(routes::edit_reply))
        .route("/api/reviews/{id}/approve-reply", post(routes::approve_reply))
        .route("/api/admin/dashboard", get(routes::admin_dashboard))
        .route("/api/admin/reviews", get(routes::admin_reviews))
        .route("/api/admin/clients", get(routes::list_clients).post(routes::create_client))
        .route("/api/admin/clients/{slug}/settings", put(routes::update_settings))
        .route("/api/client/dashboard", get(routes::client_dashboard))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

/// Start the HTTP server.
pub async fn start(state: AppState) -> anyhow::Result<()> {
    let addr = format!("{}:{}", state.config.gateway.host, state.config.gateway.port);
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Gateway server listening on http://{}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}
