//! Configuration: `config.toml` with serde defaults and env overrides for secrets.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{ReviewPilotError, Result};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ReviewPilotConfig {
    pub gateway: GatewayConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub google: GoogleConfig,
    pub llm: LlmConfig,
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    /// Where the browser lands after the Google consent screen.
    pub frontend_url: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 5000,
            frontend_url: "http://localhost:3000".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite file; `~` is expanded. `:memory:` keeps everything in RAM.
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: "~/.reviewpilot/reviewpilot.db".into() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub token_ttl_hours: i64,
    pub bcrypt_cost: u32,
    /// Admin created at startup when no user with this email exists.
    pub bootstrap_admin_email: Option<String>,
    pub bootstrap_admin_password: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            token_ttl_hours: 24,
            bcrypt_cost: 12,
            bootstrap_admin_email: None,
            bootstrap_admin_password: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GoogleConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub scope: String,
    pub auth_url: String,
    pub token_url: String,
    pub revoke_url: String,
    pub account_api_base: String,
    pub business_info_api_base: String,
    pub reviews_api_base: String,
    /// Lifetime of a signed OAuth `state` parameter.
    pub state_ttl_secs: i64,
}

impl Default for GoogleConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            redirect_uri: "http://localhost:5000/api/google-oauth/callback".into(),
            scope: "https://www.googleapis.com/auth/business.manage".into(),
            auth_url: "https://accounts.google.com/o/oauth2/v2/auth".into(),
            token_url: "https://oauth2.googleapis.com/token".into(),
            revoke_url: "https://oauth2.googleapis.com/revoke".into(),
            account_api_base: "https://mybusinessaccountmanagement.googleapis.com/v1".into(),
            business_info_api_base: "https://mybusinessbusinessinformation.googleapis.com/v1".into(),
            reviews_api_base: "https://mybusiness.googleapis.com/v4".into(),
            state_ttl_secs: 600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// openai, deepseek, groq, gemini, mock
    pub provider: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub api_key: String,
    /// Overrides the provider's endpoint (OpenAI-compatible proxies).
    pub base_url: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".into(),
            model: "gpt-4o-mini".into(),
            temperature: 0.7,
            max_tokens: 300,
            api_key: String::new(),
            base_url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Background sync period; 0 disables the task.
    pub interval_secs: u64,
    pub page_size: u32,
    /// Safety cap on pages fetched per location in one run.
    pub max_pages: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self { interval_secs: 0, page_size: 50, max_pages: 100 }
    }
}

impl ReviewPilotConfig {
    /// `~/.reviewpilot/config.toml`
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".reviewpilot")
            .join("config.toml")
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| ReviewPilotError::Config(format!("parse error: {e}")))
    }

    /// Load from `REVIEWPILOT_CONFIG`, else the default path, else defaults;
    /// then apply env overrides.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var("REVIEWPILOT_CONFIG").ok().map(PathBuf::from))
            .unwrap_or_else(Self::default_path);

        let mut config = if path.exists() {
            tracing::info!("Loading config from {}", path.display());
            Self::load_from(&path)?
        } else {
            tracing::warn!("Config file {} not found, using defaults", path.display());
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Secrets may be injected from the environment instead of the file.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("REVIEWPILOT_JWT_SECRET") {
            self.auth.jwt_secret = v;
        }
        if let Ok(v) = std::env::var("GOOGLE_CLIENT_ID") {
            self.google.client_id = v;
        }
        if let Ok(v) = std::env::var("GOOGLE_CLIENT_SECRET") {
            self.google.client_secret = v;
        }
        if let Ok(v) = std::env::var("GOOGLE_REDIRECT_URI") {
            self.google.redirect_uri = v;
        }
        if let Ok(v) = std::env::var("REVIEWPILOT_DB") {
            self.database.path = v;
        }
    }

    /// Expanded database path.
    pub fn database_path(&self) -> PathBuf {
        if self.database.path == ":memory:" {
            return PathBuf::from(":memory:");
        }
        PathBuf::from(shellexpand::tilde(&self.database.path).into_owned())
    }

    /// Reject configurations the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.auth.jwt_secret.len() < 16 {
            return Err(ReviewPilotError::Config(
                "auth.jwt_secret must be at least 16 characters (or set REVIEWPILOT_JWT_SECRET)".into(),
            ));
        }
        if self.auth.token_ttl_hours <= 0 {
            return Err(ReviewPilotError::Config("auth.token_ttl_hours must be positive".into()));
        }
        if !(4..=31).contains(&self.auth.bcrypt_cost) {
            return Err(ReviewPilotError::Config("auth.bcrypt_cost must be within 4..=31".into()));
        }
        if self.sync.page_size == 0 || self.sync.max_pages == 0 {
            return Err(ReviewPilotError::Config("sync.page_size and sync.max_pages must be non-zero".into()));
        }
        Ok(())
    }
}
