//! JWT authentication for admins and tenant owners.

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use reviewpilot_core::error::{ReviewPilotError, Result};
use reviewpilot_core::types::Role;
use serde::{Deserialize, Serialize};

use crate::db::{PlatformDb, User};

/// JWT claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // user ID
    pub email: String,
    pub role: Role,
    pub tenant_id: Option<String>,
    pub exp: usize,
    pub iat: usize,
}

/// Generate a JWT token valid for `ttl_hours`.
pub fn create_token(user: &User, secret: &str, ttl_hours: i64) -> Result<String> {
    let now = chrono::Utc::now();
    let expiration = now
        .checked_add_signed(chrono::Duration::hours(ttl_hours))
        .ok_or_else(|| ReviewPilotError::validation("token lifetime out of range"))?;

    let claims = Claims {
        sub: user.id.clone(),
        email: user.email.clone(),
        role: user.role,
        tenant_id: user.tenant_id.clone(),
        exp: expiration.timestamp() as usize,
        iat: now.timestamp() as usize,
    };

    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes()))
        .map_err(|e| ReviewPilotError::Unauthorized(format!("token creation failed: {e}")))
}

/// Validate and decode a JWT token.
pub fn validate_token(token: &str, secret: &str) -> Result<Claims> {
    let validation = Validation::new(Algorithm::HS256);
    decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)
        .map(|data| data.claims)
        .map_err(|e| ReviewPilotError::Unauthorized(format!("invalid token: {e}")))
}

/// Hash a password using bcrypt.
pub fn hash_password(password: &str, cost: u32) -> Result<String> {
    bcrypt::hash(password, cost).map_err(|e| ReviewPilotError::validation(format!("hash error: {e}")))
}

/// Verify a password against a bcrypt hash.
pub fn verify_password(password: &str, hash: &str) -> bool {
    bcrypt::verify(password, hash).unwrap_or(false)
}

/// Successful login.
#[derive(Debug, Clone, Serialize)]
pub struct LoginResult {
    pub token: String,
    pub user: User,
}

/// Check credentials and issue a token. Unknown email and wrong password are
/// indistinguishable to the caller.
pub fn login(db: &PlatformDb, email: &str, password: &str, secret: &str, ttl_hours: i64) -> Result<LoginResult> {
    let invalid = || ReviewPilotError::Unauthorized("invalid email or password".into());

    let Some(auth) = db.get_user_auth_by_email(email.trim())? else {
        tracing::warn!(email = %email, "login failed: unknown email");
        return Err(invalid());
    };
    if !verify_password(password, &auth.password_hash) {
        db.log_event("login_failed", "user", &auth.id, None)?;
        tracing::warn!(user_id = %auth.id, "login failed: bad password");
        return Err(invalid());
    }

    db.touch_last_login(&auth.id)?;
    db.log_event("login_success", "user", &auth.id, None)?;
    let user = db.get_user(&auth.id)?;
    let token = create_token(&user, secret, ttl_hours)?;
    tracing::info!(user_id = %user.id, role = %user.role, "user logged in");
    Ok(LoginResult { token, user })
}
