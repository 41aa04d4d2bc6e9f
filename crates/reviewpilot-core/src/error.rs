//! Error taxonomy shared across the workspace.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ReviewPilotError>;

#[derive(Debug, Error)]
pub enum ReviewPilotError {
    #[error("database error: {0}")]
    Database(String),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("API key missing for provider '{0}'")]
    ApiKeyMissing(String),

    #[error("provider not found: {0}")]
    ProviderNotFound(String),

    #[error("Google API error: {0}")]
    Google(String),

    #[error("Google account is not connected for client '{0}'")]
    OAuthNotConnected(String),

    #[error("invalid OAuth state: {0}")]
    InvalidState(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("reply already exists for this review")]
    ReplyAlreadyExists,

    #[error("reply has already been posted")]
    ReplyAlreadyPosted,

    #[error("review has no reply to work with")]
    ReplyMissing,

    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("{0}")]
    Validation(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ReviewPilotError {
    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }

    pub fn google(msg: impl Into<String>) -> Self {
        Self::Google(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Business-rule violations: the caller asked for something the current
    /// state does not allow. Everything else is either auth or infrastructure.
    pub fn is_business_rule(&self) -> bool {
        matches!(
            self,
            Self::ReplyAlreadyExists
                | Self::ReplyAlreadyPosted
                | Self::ReplyMissing
                | Self::OAuthNotConnected(_)
                | Self::QuotaExceeded(_)
                | Self::Validation(_)
                | Self::InvalidState(_)
        )
    }
}
