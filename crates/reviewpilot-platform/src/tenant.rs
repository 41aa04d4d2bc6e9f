//! Tenant onboarding: validation of client details and creation of the
//! tenant together with its owner login.

use reviewpilot_core::error::{ReviewPilotError, Result};
use reviewpilot_core::types::Package;
use serde::{Deserialize, Serialize};

use crate::auth::hash_password;
use crate::db::{NewTenant, PlatformDb, Tenant};

/// Request to onboard a new client business.
#[derive(Debug, Clone, Deserialize)]
pub struct NewClient {
    pub slug: String,
    pub business_name: String,
    #[serde(default)]
    pub package: Package,
    pub owner_email: String,
    pub owner_password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatedClient {
    pub tenant: Tenant,
    pub owner_user_id: String,
}

pub const MIN_PASSWORD_LEN: usize = 8;
pub const MAX_TONE_LEN: usize = 40;
pub const MAX_SIGNATURE_LEN: usize = 200;

/// Partial update of a client's reply settings. Absent fields are kept; an
/// empty `reply_signature` removes the signature.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientSettings {
    pub ai_replies_enabled: Option<bool>,
    pub reply_tone: Option<String>,
    pub reply_signature: Option<String>,
}

/// Slugs are 2..=64 chars of `[a-z0-9-]` and do not start or end with `-`.
pub fn validate_slug(slug: &str) -> Result<()> {
    let ok_chars = slug.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if !(2..=64).contains(&slug.len()) || !ok_chars || slug.starts_with('-') || slug.ends_with('-') {
        return Err(ReviewPilotError::validation(format!(
            "invalid slug '{slug}': use 2-64 lowercase letters, digits or '-'"
        )));
    }
    Ok(())
}

pub fn validate_email(email: &str) -> Result<()> {
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() && !email.contains(char::is_whitespace) => {
            Ok(())
        }
        _ => Err(ReviewPilotError::validation(format!("invalid email '{email}'"))),
    }
}

impl NewClient {
    /// Normalize whitespace and check every field.
    pub fn validated(mut self) -> Result<Self> {
        self.slug = self.slug.trim().to_string();
        self.business_name = self.business_name.trim().to_string();
        self.owner_email = self.owner_email.trim().to_lowercase();
        validate_slug(&self.slug)?;
        if self.business_name.is_empty() {
            return Err(ReviewPilotError::validation("business_name is required"));
        }
        validate_email(&self.owner_email)?;
        if self.owner_password.len() < MIN_PASSWORD_LEN {
            return Err(ReviewPilotError::validation(format!(
                "owner_password must be at least {MIN_PASSWORD_LEN} characters"
            )));
        }
        Ok(self)
    }
}

/// Create the tenant and its owner user in one transaction.
pub fn onboard_client(db: &PlatformDb, client: NewClient, bcrypt_cost: u32, actor_id: &str) -> Result<CreatedClient> {
    let client = client.validated()?;
    let hash = hash_password(&client.owner_password, bcrypt_cost)?;
    let new = NewTenant { slug: &client.slug, business_name: &client.business_name, package: client.package };
    let (tenant, owner_user_id) = db.create_tenant_with_owner(&new, &client.owner_email, &hash)?;
    db.log_event("client_created", "user", actor_id, Some(&format!("slug={}", tenant.slug)))?;
    tracing::info!(slug = %tenant.slug, package = %tenant.package, "client onboarded");
    Ok(CreatedClient { tenant, owner_user_id })
}

/// Apply `settings` to a tenant and return the updated record.
pub fn update_client_settings(
    db: &PlatformDb,
    tenant_id: &str,
    settings: ClientSettings,
    actor_id: &str,
) -> Result<Tenant> {
    let current = db.get_tenant(tenant_id)?;
    let tone = match settings.reply_tone {
        Some(t) => {
            let t = t.trim().to_string();
            if t.is_empty() || t.chars().count() > MAX_TONE_LEN {
                return Err(ReviewPilotError::validation(format!(
                    "reply_tone must be 1-{MAX_TONE_LEN} characters"
                )));
            }
            t
        }
        None => current.reply_tone,
    };
    let signature = match settings.reply_signature {
        Some(sig) => {
            let sig = sig.trim().to_string();
            if sig.chars().count() > MAX_SIGNATURE_LEN {
                return Err(ReviewPilotError::validation(format!(
                    "reply_signature must be at most {MAX_SIGNATURE_LEN} characters"
                )));
            }
            (!sig.is_empty()).then_some(sig)
        }
        None => current.reply_signature,
    };
    let enabled = settings.ai_replies_enabled.unwrap_or(current.ai_replies_enabled);

    let tenant = db.update_tenant_settings(tenant_id, enabled, &tone, signature.as_deref())?;
    db.log_event(
        "client_settings_updated",
        "user",
        actor_id,
        Some(&format!("slug={} ai_replies_enabled={enabled}", tenant.slug)),
    )?;
    tracing::info!(slug = %tenant.slug, ai_replies_enabled = enabled, "client settings updated");
    Ok(tenant)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reviewpilot_core::types::Role;

    fn client(slug: &str) -> NewClient {
        NewClient {
            slug: slug.into(),
            business_name: " Blue Door Cafe ".into(),
            package: Package::Pro,
            owner_email: "Owner@BlueDoor.com".into(),
            owner_password: "correct-horse".into(),
        }
    }

    #[test]
    fn test_validate_slug() {
        assert!(validate_slug("blue-door").is_ok());
        assert!(validate_slug("a1").is_ok());
        assert!(validate_slug("a").is_err());
        assert!(validate_slug("Blue").is_err());
        assert!(validate_slug("-lead").is_err());
        assert!(validate_slug("has space").is_err());
    }

    #[test]
    fn test_validate_email() {
        assert!(validate_email("a@b.co").is_ok());
        assert!(validate_email("nobody").is_err());
        assert!(validate_email("@b.co").is_err());
        assert!(validate_email("a b@c.d").is_err());
    }

    #[test]
    fn test_onboard_client() {
        let db = PlatformDb::open_in_memory().unwrap();
        let created = onboard_client(&db, client("blue-door"), 4, "admin-1").unwrap();
        assert_eq!(created.tenant.business_name, "Blue Door Cafe");
        assert_eq!(created.tenant.package, Package::Pro);

        let owner = db.get_user(&created.owner_user_id).unwrap();
        assert_eq!(owner.email, "owner@bluedoor.com");
        assert_eq!(owner.role, Role::Client);
        assert_eq!(owner.tenant_id.as_deref(), Some(created.tenant.id.as_str()));
        assert_eq!(db.recent_events(1).unwrap()[0].event_type, "client_created");
    }

    #[test]
    fn test_update_settings_is_partial() {
        let db = PlatformDb::open_in_memory().unwrap();
        let id = onboard_client(&db, client("blue-door"), 4, "admin-1").unwrap().tenant.id;

        let signed = ClientSettings { reply_signature: Some(" - The Blue Door team ".into()), ..Default::default() };
        let t = update_client_settings(&db, &id, signed, "admin-1").unwrap();
        assert_eq!(t.reply_signature.as_deref(), Some("- The Blue Door team"));
        assert!(t.ai_replies_enabled);

        let off = ClientSettings { ai_replies_enabled: Some(false), reply_tone: Some("formal".into()), ..Default::default() };
        let t = update_client_settings(&db, &id, off, "admin-1").unwrap();
        assert!(!t.ai_replies_enabled);
        assert_eq!(t.reply_tone, "formal");
        assert_eq!(t.reply_signature.as_deref(), Some("- The Blue Door team"));

        let cleared = ClientSettings { reply_signature: Some(String::new()), ..Default::default() };
        assert_eq!(update_client_settings(&db, &id, cleared, "admin-1").unwrap().reply_signature, None);
        assert_eq!(db.recent_events(1).unwrap()[0].event_type, "client_settings_updated");
    }

    #[test]
    fn test_update_settings_validation() {
        let db = PlatformDb::open_in_memory().unwrap();
        let id = onboard_client(&db, client("blue-door"), 4, "admin-1").unwrap().tenant.id;
        let blank = ClientSettings { reply_tone: Some("  ".into()), ..Default::default() };
        assert!(matches!(update_client_settings(&db, &id, blank, "a"), Err(ReviewPilotError::Validation(_))));
        let long = ClientSettings { reply_signature: Some("x".repeat(MAX_SIGNATURE_LEN + 1)), ..Default::default() };
        assert!(matches!(update_client_settings(&db, &id, long, "a"), Err(ReviewPilotError::Validation(_))));
        assert!(matches!(
            update_client_settings(&db, "missing", ClientSettings::default(), "a"),
            Err(ReviewPilotError::NotFound(_))
        ));
    }

    #[test]
    fn test_onboard_rejects_duplicates_and_bad_input() {
        let db = PlatformDb::open_in_memory().unwrap();
        onboard_client(&db, client("blue-door"), 4, "admin-1").unwrap();
        assert!(matches!(
            onboard_client(&db, client("blue-door"), 4, "admin-1"),
            Err(ReviewPilotError::Conflict(_))
        ));
        let mut weak = client("weak-pass");
        weak.owner_password = "short".into();
        assert!(matches!(onboard_client(&db, weak, 4, "admin-1"), Err(ReviewPilotError::Validation(_))));
    }
}
