//! API route handlers for the gateway.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::Json;
use axum::response::Redirect;
use reviewpilot_core::error::ReviewPilotError;
use reviewpilot_core::types::{ReplyState, Role};
use reviewpilot_platform::auth::{self, Claims};
use reviewpilot_platform::db::ReviewFilter;
use reviewpilot_platform::tenant::{ClientSettings, NewClient, onboard_client, update_client_settings};
use reviewpilot_platform::{Scope, dashboard, lock_db};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;

use super::error::{ApiError, api_forbidden, api_not_found, api_unauthorized, api_validation_error};
use super::server::AppState;

type ApiResult = Result<Json<Value>, ApiError>;

// ── Auth helpers ────────────────────────────────────

/// Decode the bearer token on a request.
fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<Claims, ApiError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| api_unauthorized("missing bearer token"))?;
    let token = value
        .strip_prefix("Bearer ")
        .ok_or_else(|| api_unauthorized("missing bearer token"))?;
    auth::validate_token(token.trim(), &state.config.auth.jwt_secret)
        .map_err(|_| api_unauthorized("invalid or expired token"))
}

fn require_admin(claims: &Claims) -> Result<(), ApiError> {
    match claims.role {
        Role::Admin => Ok(()),
        Role::Client => Err(api_forbidden("admin role required")),
    }
}

fn scope_of(claims: &Claims) -> Result<Scope, ApiError> {
    match (claims.role, &claims.tenant_id) {
        (Role::Admin, _) => Ok(Scope::All),
        (Role::Client, Some(tenant_id)) => Ok(Scope::Tenant(tenant_id.clone())),
        (Role::Client, None) => Err(api_forbidden("client account has no business attached")),
    }
}

/// The tenant a request acts on: a client's own, or the `client` slug an
/// admin names.
fn target_tenant(state: &AppState, claims: &Claims, client: Option<&str>) -> Result<String, ApiError> {
    match claims.role {
        Role::Client => claims
            .tenant_id
            .clone()
            .ok_or_else(|| api_forbidden("client account has no business attached")),
        Role::Admin => {
            let slug = client
                .filter(|s| !s.is_empty())
                .ok_or_else(|| api_validation_error("admin requests must name a client"))?;
            tenant_id_for_slug(state, slug)
        }
    }
}

fn tenant_id_for_slug(state: &AppState, slug: &str) -> Result<String, ApiError> {
    lock_db(&state.db)?
        .get_tenant_by_slug(slug)?
        .map(|t| t.id)
        .ok_or_else(|| api_not_found("client not found"))
}

// ── Health & auth ────────────────────────────────────

/// Health check endpoint.
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "reviewpilot-gateway",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.start_time.elapsed().as_secs(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    body: Result<Json<LoginRequest>, JsonRejection>,
) -> ApiResult {
    let Json(req) = body?;
    let result = auth::login(
        &*lock_db(&state.db)?,
        &req.email,
        &req.password,
        &state.config.auth.jwt_secret,
        state.config.auth.token_ttl_hours,
    )?;
    Ok(Json(json!({ "ok": true, "token": result.token, "user": result.user })))
}

pub async fn me(State(state): State<Arc<AppState>>, headers: HeaderMap) -> ApiResult {
    let claims = authenticate(&state, &headers)?;
    let db = lock_db(&state.db)?;
    let user = db.get_user(&claims.sub)?;
    let client = match &user.tenant_id {
        Some(id) => Some(db.get_tenant(id)?),
        None => None,
    };
    Ok(Json(json!({ "ok": true, "user": user, "client": client })))
}

// ── Google OAuth ────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct ClientQuery {
    pub client: Option<String>,
}

pub async fn oauth_connect(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    query: Result<Query<ClientQuery>, QueryRejection>,
) -> ApiResult {
    let claims = authenticate(&state, &headers)?;
    let Query(q) = query?;
    let tenant_id = target_tenant(&state, &claims, q.client.as_deref())?;
    let url = state.oauth.connect(&tenant_id)?;
    Ok(Json(json!({ "ok": true, "auth_url": url.auth_url, "state": url.state })))
}

pub async fn oauth_status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    query: Result<Query<ClientQuery>, QueryRejection>,
) -> ApiResult {
    let claims = authenticate(&state, &headers)?;
    let Query(q) = query?;
    let tenant_id = target_tenant(&state, &claims, q.client.as_deref())?;
    let status = state.oauth.status(&tenant_id)?;
    Ok(Json(json!({ "ok": true, "status": status })))
}

#[derive(Debug, Default, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

/// Browser redirect target after the consent screen. The signed `state`
/// authenticates the request; the user is sent back to the frontend.
pub async fn oauth_callback_redirect(
    State(state): State<Arc<AppState>>,
    query: Result<Query<CallbackQuery>, QueryRejection>,
) -> Redirect {
    let q = query.map(|Query(q)| q).unwrap_or_default();
    let frontend = state.config.gateway.frontend_url.trim_end_matches('/');
    let outcome = match (q.error, q.code, q.state) {
        (Some(err), _, _) => Err(err),
        (None, Some(code), Some(signed)) => {
            state.oauth.complete(&code, &signed).await.map_err(|e| match e {
                ReviewPilotError::InvalidState(_) => "invalid_state".to_string(),
                other => {
                    tracing::warn!("OAuth callback failed: {other}");
                    "connect_failed".to_string()
                }
            })
        }
        _ => Err("missing_code".to_string()),
    };
    let target = match outcome {
        Ok(_) => format!("{frontend}/settings?google=connected"),
        Err(reason) => format!("{frontend}/settings?google=error&reason={}", urlencoding::encode(&reason)),
    };
    Redirect::to(&target)
}

#[derive(Debug, Deserialize)]
pub struct CallbackRequest {
    pub code: String,
    pub state: String,
}

pub async fn oauth_callback(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Result<Json<CallbackRequest>, JsonRejection>,
) -> ApiResult {
    let claims = authenticate(&state, &headers)?;
    let Json(req) = body?;
    let tenant_id = state.oauth.verify_state(&req.state)?;
    if !scope_of(&claims)?.allows(&tenant_id) {
        return Err(api_forbidden("state was issued for another client"));
    }
    let result = state.oauth.complete(&req.code, &req.state).await?;
    Ok(Json(json!({
        "ok": true,
        "connected": true,
        "account_id": result.account_id,
        "locations": result.locations,
        "skipped_locations": result.skipped_locations,
    })))
}

pub async fn oauth_disconnect(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    query: Result<Query<ClientQuery>, QueryRejection>,
) -> ApiResult {
    let claims = authenticate(&state, &headers)?;
    let Query(q) = query?;
    let tenant_id = target_tenant(&state, &claims, q.client.as_deref())?;
    let was_connected = state.oauth.disconnect(&tenant_id).await?;
    Ok(Json(json!({ "ok": true, "was_connected": was_connected })))
}

// ── Reviews ────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct ReviewQuery {
    pub client: Option<String>,
    pub state: Option<String>,
    pub rating: Option<u8>,
    pub location: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

fn review_filter(state: &AppState, claims: &Claims, q: ReviewQuery) -> Result<ReviewFilter, ApiError> {
    let tenant_id = match scope_of(claims)? {
        Scope::Tenant(id) => Some(id),
        Scope::All => match q.client.as_deref().filter(|s| !s.is_empty()) {
            Some(slug) => Some(tenant_id_for_slug(state, slug)?),
            None => None,
        },
    };
    let reply_state = q.state.as_deref().map(str::parse::<ReplyState>).transpose()?;
    if q.rating.is_some_and(|r| !(1..=5).contains(&r)) {
        return Err(api_validation_error("rating must be 1-5"));
    }
    Ok(ReviewFilter {
        tenant_id,
        state: reply_state,
        rating: q.rating,
        location_id: q.location,
        page: q.page,
        limit: q.limit,
    })
}

fn listing_response(state: &AppState, filter: &ReviewFilter) -> ApiResult {
    let listing = lock_db(&state.db)?.list_reviews(filter)?;
    Ok(Json(json!({
        "ok": true,
        "reviews": listing.reviews,
        "total": listing.total,
        "page": listing.page,
        "limit": listing.limit,
    })))
}

pub async fn list_reviews(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    query: Result<Query<ReviewQuery>, QueryRejection>,
) -> ApiResult {
    let claims = authenticate(&state, &headers)?;
    let Query(q) = query?;
    let filter = review_filter(&state, &claims, q)?;
    listing_response(&state, &filter)
}

pub async fn get_review(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult {
    let claims = authenticate(&state, &headers)?;
    let review = state.workflow.get(&scope_of(&claims)?, &id)?;
    Ok(Json(json!({ "ok": true, "review": review })))
}

pub async fn generate_reply(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult {
    let claims = authenticate(&state, &headers)?;
    let review = state.workflow.generate(&scope_of(&claims)?, &id).await?;
    Ok(Json(json!({ "ok": true, "review": review })))
}

#[derive(Debug, Deserialize)]
pub struct EditReplyRequest {
    pub reply_text: String,
}

pub async fn edit_reply(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Result<Json<EditReplyRequest>, JsonRejection>,
) -> ApiResult {
    let claims = authenticate(&state, &headers)?;
    let Json(req) = body?;
    let review = state.workflow.edit(&scope_of(&claims)?, &id, &req.reply_text, &claims.sub)?;
    Ok(Json(json!({ "ok": true, "review": review })))
}

pub async fn approve_reply(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult {
    let claims = authenticate(&state, &headers)?;
    let review = state.workflow.approve(&scope_of(&claims)?, &id, &claims.email).await?;
    Ok(Json(json!({ "ok": true, "review": review })))
}

#[derive(Debug, Default, Deserialize)]
pub struct FetchRequest {
    pub client: Option<String>,
}

/// Sync now. A client syncs its own business; an admin names one client or,
/// with no body, syncs every connected client.
pub async fn fetch_reviews(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Option<Json<FetchRequest>>,
) -> ApiResult {
    let claims = authenticate(&state, &headers)?;
    let req = body.map(|Json(b)| b).unwrap_or_default();
    if claims.role == Role::Admin && req.client.as_deref().is_none_or(str::is_empty) {
        let all = state.sync.sync_all().await?;
        return Ok(Json(json!({ "ok": true, "tenants": all.tenants, "totals": all.totals, "failures": all.failures })));
    }
    let tenant_id = target_tenant(&state, &claims, req.client.as_deref())?;
    let report = state.sync.sync_tenant(&tenant_id).await?;
    Ok(Json(json!({
        "ok": true,
        "locations": report.locations,
        "fetched": report.fetched,
        "new": report.new,
        "updated": report.updated,
        "unchanged": report.unchanged,
        "rejected": report.rejected,
    })))
}

// ── Dashboards & administration ────────────────────────────────────

pub async fn admin_dashboard(State(state): State<Arc<AppState>>, headers: HeaderMap) -> ApiResult {
    let claims = authenticate(&state, &headers)?;
    require_admin(&claims)?;
    let dashboard = dashboard::admin_dashboard(&*lock_db(&state.db)?)?;
    Ok(Json(json!({ "ok": true, "dashboard": dashboard })))
}

pub async fn admin_reviews(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    query: Result<Query<ReviewQuery>, QueryRejection>,
) -> ApiResult {
    let claims = authenticate(&state, &headers)?;
    require_admin(&claims)?;
    let Query(q) = query?;
    let filter = review_filter(&state, &claims, q)?;
    listing_response(&state, &filter)
}

pub async fn list_clients(State(state): State<Arc<AppState>>, headers: HeaderMap) -> ApiResult {
    let claims = authenticate(&state, &headers)?;
    require_admin(&claims)?;
    let clients = lock_db(&state.db)?.list_tenants()?;
    Ok(Json(json!({ "ok": true, "clients": clients })))
}

pub async fn create_client(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Result<Json<NewClient>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let claims = authenticate(&state, &headers)?;
    require_admin(&claims)?;
    let Json(req) = body?;
    let created = onboard_client(&*lock_db(&state.db)?, req, state.config.auth.bcrypt_cost, &claims.sub)?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "ok": true, "client": created.tenant, "owner_user_id": created.owner_user_id })),
    ))
}

pub async fn update_settings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(slug): Path<String>,
    body: Result<Json<ClientSettings>, JsonRejection>,
) -> ApiResult {
    let claims = authenticate(&state, &headers)?;
    require_admin(&claims)?;
    let Json(settings) = body?;
    let tenant_id = tenant_id_for_slug(&state, &slug)?;
    let client = update_client_settings(&*lock_db(&state.db)?, &tenant_id, settings, &claims.sub)?;
    Ok(Json(json!({ "ok": true, "client": client })))
}

pub async fn client_dashboard(State(state): State<Arc<AppState>>, headers: HeaderMap) -> ApiResult {
    let claims = authenticate(&state, &headers)?;
    if claims.role != Role::Client {
        return Err(api_forbidden("client role required"));
    }
    let tenant_id = target_tenant(&state, &claims, None)?;
    let dashboard = dashboard::client_dashboard(&*lock_db(&state.db)?, &tenant_id)?;
    Ok(Json(json!({ "ok": true, "dashboard": dashboard })))
}
