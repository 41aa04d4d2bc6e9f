//! Platform database: SQLite schema for tenants, users, locations, reviews
//! and OAuth credentials.

use chrono::{DateTime, SecondsFormat, Utc};
use reviewpilot_core::error::{ReviewPilotError, Result};
use reviewpilot_core::types::{Package, PlatformReview, ReplySource, ReplyState, Role};
use rusqlite::types::Value;
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row, params, params_from_iter};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

/// Platform database manager.
pub struct PlatformDb {
    conn: Connection,
}

/// Tenant (client business) record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub id: String,
    pub slug: String,
    pub business_name: String,
    pub package: Package,
    pub ai_replies_enabled: bool,
    pub reply_tone: String,
    pub reply_signature: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct NewTenant<'a> {
    pub slug: &'a str,
    pub business_name: &'a str,
    pub package: Package,
}

/// User record (never carries the password hash).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub role: Role,
    pub tenant_id: Option<String>,
    pub last_login: Option<String>,
    pub created_at: String,
}

/// Credentials row used only for login.
#[derive(Debug, Clone)]
pub struct UserAuth {
    pub id: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub tenant_id: Option<String>,
}

/// A Google Business Profile location owned by a tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Location {
    pub id: String,
    pub tenant_id: String,
    pub google_location_id: String,
    pub title: String,
    pub last_synced_at: Option<String>,
}

/// Review with its reply lifecycle columns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Review {
    pub id: String,
    pub tenant_id: String,
    pub client_slug: String,
    pub location_id: String,
    pub google_location_id: String,
    pub location_title: String,
    pub google_review_id: String,
    pub reviewer_name: String,
    pub rating: u8,
    pub comment: String,
    pub review_created_at: String,
    pub review_updated_at: String,
    pub reply_text: Option<String>,
    pub reply_state: ReplyState,
    pub reply_source: Option<ReplySource>,
    pub reply_updated_at: Option<String>,
    pub reply_posted_at: Option<String>,
    pub approved_by: Option<String>,
}

/// Stored Google OAuth credential for a tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthCredential {
    pub tenant_id: String,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: String,
    pub scope: Option<String>,
    pub account_id: Option<String>,
    pub connected_at: String,
}

/// Audit log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: i64,
    pub event_type: String,
    pub actor_type: String,
    pub actor_id: String,
    pub details: Option<String>,
    pub created_at: String,
}

/// Review listing filter. `page` is 1-based.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReviewFilter {
    pub tenant_id: Option<String>,
    pub state: Option<ReplyState>,
    pub rating: Option<u8>,
    pub location_id: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

pub const DEFAULT_PAGE_LIMIT: u32 = 20;
pub const MAX_PAGE_LIMIT: u32 = 100;

#[derive(Debug, Clone, Serialize)]
pub struct ReviewListing {
    pub reviews: Vec<Review>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
}

/// Aggregate figures over a set of reviews.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ReviewStats {
    pub total: u64,
    pub average_rating: Option<f64>,
    /// Index 0 holds one-star reviews.
    pub distribution: [u64; 5],
    pub no_reply: u64,
    pub drafted: u64,
    pub edited: u64,
    pub posted: u64,
}

impl ReviewStats {
    /// Reviews still waiting on an owner reply.
    pub fn pending(&self) -> u64 {
        self.no_reply + self.drafted + self.edited
    }
}

/// Outcome of comparing a fetched review against storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    Unchanged,
}

/// Timestamps are stored as second-precision RFC 3339 UTC strings so they
/// sort lexicographically.
pub fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn now_ts() -> String {
    ts(Utc::now())
}

pub fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| ReviewPilotError::database(format!("bad timestamp '{s}': {e}")))
}

fn db_err(ctx: &'static str) -> impl Fn(rusqlite::Error) -> ReviewPilotError {
    move |e| match e {
        rusqlite::Error::SqliteFailure(ref f, _) if f.code == ErrorCode::ConstraintViolation => {
            ReviewPilotError::Conflict(format!("{ctx}: {e}"))
        }
        e => ReviewPilotError::database(format!("{ctx}: {e}")),
    }
}

fn parse_col<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = ReviewPilotError>,
{
    let raw: String = row.get(idx)?;
    raw.parse::<T>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e)))
}

fn parse_opt_col<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<T>>
where
    T: FromStr<Err = ReviewPilotError>,
{
    let raw: Option<String> = row.get(idx)?;
    raw.map(|r| {
        r.parse::<T>()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e)))
    })
    .transpose()
}

const TENANT_COLS: &str =
    "id,slug,business_name,package,ai_replies_enabled,reply_tone,reply_signature,created_at";

fn tenant_from_row(row: &Row<'_>) -> rusqlite::Result<Tenant> {
    Ok(Tenant {
        id: row.get(0)?,
        slug: row.get(1)?,
        business_name: row.get(2)?,
        package: parse_col(row, 3)?,
        ai_replies_enabled: row.get::<_, i32>(4)? != 0,
        reply_tone: row.get(5)?,
        reply_signature: row.get(6)?,
        created_at: row.get(7)?,
    })
}

const USER_COLS: &str = "id,email,role,tenant_id,last_login,created_at";

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        role: parse_col(row, 2)?,
        tenant_id: row.get(3)?,
        last_login: row.get(4)?,
        created_at: row.get(5)?,
    })
}

const LOCATION_COLS: &str = "id,tenant_id,google_location_id,title,last_synced_at";

fn location_from_row(row: &Row<'_>) -> rusqlite::Result<Location> {
    Ok(Location {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        google_location_id: row.get(2)?,
        title: row.get(3)?,
        last_synced_at: row.get(4)?,
    })
}

const REVIEW_SELECT: &str = "SELECT r.id, r.tenant_id, t.slug, r.location_id, l.google_location_id, l.title,
        r.google_review_id, r.reviewer_name, r.rating, r.comment, r.review_created_at, r.review_updated_at,
        r.reply_text, r.reply_state, r.reply_source, r.reply_updated_at, r.reply_posted_at, r.approved_by
     FROM reviews r
     JOIN tenants t ON t.id = r.tenant_id
     JOIN locations l ON l.id = r.location_id";

fn review_from_row(row: &Row<'_>) -> rusqlite::Result<Review> {
    Ok(Review {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        client_slug: row.get(2)?,
        location_id: row.get(3)?,
        google_location_id: row.get(4)?,
        location_title: row.get(5)?,
        google_review_id: row.get(6)?,
        reviewer_name: row.get(7)?,
        rating: row.get(8)?,
        comment: row.get(9)?,
        review_created_at: row.get(10)?,
        review_updated_at: row.get(11)?,
        reply_text: row.get(12)?,
        reply_state: parse_col(row, 13)?,
        reply_source: parse_opt_col(row, 14)?,
        reply_updated_at: row.get(15)?,
        reply_posted_at: row.get(16)?,
        approved_by: row.get(17)?,
    })
}

const CREDENTIAL_COLS: &str =
    "tenant_id,access_token,refresh_token,expires_at,scope,account_id,connected_at";

fn credential_from_row(row: &Row<'_>) -> rusqlite::Result<OAuthCredential> {
    Ok(OAuthCredential {
        tenant_id: row.get(0)?,
        access_token: row.get(1)?,
        refresh_token: row.get(2)?,
        expires_at: row.get(3)?,
        scope: row.get(4)?,
        account_id: row.get(5)?,
        connected_at: row.get(6)?,
    })
}

impl PlatformDb {
    /// Open or create the platform database.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if path != Path::new(":memory:") {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path).map_err(db_err("DB open error"))?;
        let db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err("DB open error"))?;
        let db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    /// Run schema migrations.
    fn migrate(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS tenants (
                id TEXT PRIMARY KEY,
                slug TEXT UNIQUE NOT NULL,
                business_name TEXT NOT NULL,
                package TEXT NOT NULL DEFAULT 'basic',
                ai_replies_enabled INTEGER NOT NULL DEFAULT 1,
                reply_tone TEXT NOT NULL DEFAULT 'friendly',
                reply_signature TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                email TEXT UNIQUE NOT NULL,
                password_hash TEXT NOT NULL,
                role TEXT NOT NULL DEFAULT 'client',
                tenant_id TEXT REFERENCES tenants(id) ON DELETE CASCADE,
                last_login TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS locations (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
                google_location_id TEXT NOT NULL,
                title TEXT NOT NULL,
                last_synced_at TEXT,
                created_at TEXT NOT NULL,
                UNIQUE(tenant_id, google_location_id)
            );

            CREATE TABLE IF NOT EXISTS reviews (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
                location_id TEXT NOT NULL REFERENCES locations(id) ON DELETE CASCADE,
                google_review_id TEXT NOT NULL,
                reviewer_name TEXT NOT NULL,
                rating INTEGER NOT NULL CHECK (rating BETWEEN 1 AND 5),
                comment TEXT NOT NULL DEFAULT '',
                review_created_at TEXT NOT NULL,
                review_updated_at TEXT NOT NULL,
                reply_text TEXT,
                reply_state TEXT NOT NULL DEFAULT 'none',
                reply_source TEXT,
                reply_updated_at TEXT,
                reply_posted_at TEXT,
                approved_by TEXT,
                synced_at TEXT NOT NULL,
                UNIQUE(location_id, google_review_id)
            );
            CREATE INDEX IF NOT EXISTS idx_reviews_tenant_created
                ON reviews(tenant_id, review_created_at DESC);

            CREATE TABLE IF NOT EXISTS oauth_credentials (
                tenant_id TEXT PRIMARY KEY REFERENCES tenants(id) ON DELETE CASCADE,
                access_token TEXT NOT NULL,
                refresh_token TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                scope TEXT,
                account_id TEXT,
                connected_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS ai_usage (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                tenant_id TEXT NOT NULL,
                review_id TEXT NOT NULL,
                provider TEXT NOT NULL,
                tokens INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                event_type TEXT NOT NULL,
                actor_type TEXT NOT NULL,
                actor_id TEXT NOT NULL,
                details TEXT,
                created_at TEXT NOT NULL
            );
        ",
            )
            .map_err(db_err("Migration error"))?;
        Ok(())
    }

    // ── Tenants ────────────────────────────────────

    pub fn create_tenant(&self, new: &NewTenant<'_>) -> Result<Tenant> {
        let id = uuid::Uuid::new_v4().to_string();
        self.conn
            .execute(
                "INSERT INTO tenants (id, slug, business_name, package, created_at) VALUES (?1,?2,?3,?4,?5)",
                params![id, new.slug, new.business_name, new.package.as_str(), now_ts()],
            )
            .map_err(db_err("Insert tenant"))?;
        self.get_tenant(&id)
    }

    /// Create a tenant together with its owner login, atomically.
    pub fn create_tenant_with_owner(
        &self,
        new: &NewTenant<'_>,
        owner_email: &str,
        password_hash: &str,
    ) -> Result<(Tenant, String)> {
        let tx = self.conn.unchecked_transaction().map_err(db_err("Begin"))?;
        let tenant = self.create_tenant(new)?;
        let user_id = self.create_user(owner_email, password_hash, Role::Client, Some(&tenant.id))?;
        tx.commit().map_err(db_err("Commit"))?;
        Ok((tenant, user_id))
    }

    pub fn get_tenant(&self, id: &str) -> Result<Tenant> {
        self.conn
            .query_row(
                &format!("SELECT {TENANT_COLS} FROM tenants WHERE id=?1"),
                params![id],
                tenant_from_row,
            )
            .optional()
            .map_err(db_err("Get tenant"))?
            .ok_or_else(|| ReviewPilotError::not_found("client"))
    }

    pub fn get_tenant_by_slug(&self, slug: &str) -> Result<Option<Tenant>> {
        self.conn
            .query_row(
                &format!("SELECT {TENANT_COLS} FROM tenants WHERE slug=?1"),
                params![slug],
                tenant_from_row,
            )
            .optional()
            .map_err(db_err("Get tenant by slug"))
    }

    pub fn list_tenants(&self) -> Result<Vec<Tenant>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {TENANT_COLS} FROM tenants ORDER BY slug"))
            .map_err(db_err("Prepare"))?;
        let tenants = stmt
            .query_map([], tenant_from_row)
            .map_err(db_err("Query"))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err("Read tenant"))?;
        Ok(tenants)
    }

    pub fn update_tenant_settings(
        &self,
        id: &str,
        ai_replies_enabled: bool,
        reply_tone: &str,
        reply_signature: Option<&str>,
    ) -> Result<Tenant> {
        let changed = self
            .conn
            .execute(
                "UPDATE tenants SET ai_replies_enabled=?1, reply_tone=?2, reply_signature=?3 WHERE id=?4",
                params![ai_replies_enabled as i32, reply_tone, reply_signature, id],
            )
            .map_err(db_err("Update tenant settings"))?;
        if changed == 0 {
            return Err(ReviewPilotError::not_found("client"));
        }
        self.get_tenant(id)
    }

    // ── Users ────────────────────────────────────

    pub fn create_user(
        &self,
        email: &str,
        password_hash: &str,
        role: Role,
        tenant_id: Option<&str>,
    ) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        self.conn
            .execute(
                "INSERT INTO users (id, email, password_hash, role, tenant_id, created_at) VALUES (?1,?2,?3,?4,?5,?6)",
                params![id, email.to_lowercase(), password_hash, role.as_str(), tenant_id, now_ts()],
            )
            .map_err(db_err("Create user"))?;
        Ok(id)
    }

    /// Authenticate user by email; returns the hash for verification.
    pub fn get_user_auth_by_email(&self, email: &str) -> Result<Option<UserAuth>> {
        self.conn
            .query_row(
                "SELECT id, email, password_hash, role, tenant_id FROM users WHERE email=?1",
                params![email.to_lowercase()],
                |row| {
                    Ok(UserAuth {
                        id: row.get(0)?,
                        email: row.get(1)?,
                        password_hash: row.get(2)?,
                        role: parse_col(row, 3)?,
                        tenant_id: row.get(4)?,
                    })
                },
            )
            .optional()
            .map_err(db_err("Get user"))
    }

    pub fn get_user(&self, id: &str) -> Result<User> {
        self.conn
            .query_row(&format!("SELECT {USER_COLS} FROM users WHERE id=?1"), params![id], user_from_row)
            .optional()
            .map_err(db_err("Get user"))?
            .ok_or_else(|| ReviewPilotError::not_found("user"))
    }

    pub fn touch_last_login(&self, user_id: &str) -> Result<()> {
        self.conn
            .execute("UPDATE users SET last_login=?1 WHERE id=?2", params![now_ts(), user_id])
            .map_err(db_err("Touch last login"))?;
        Ok(())
    }

    // ── Locations ────────────────────────────────────

    pub fn upsert_location(&self, tenant_id: &str, google_location_id: &str, title: &str) -> Result<Location> {
        self.conn
            .execute(
                "INSERT INTO locations (id, tenant_id, google_location_id, title, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(tenant_id, google_location_id) DO UPDATE SET title = excluded.title",
                params![uuid::Uuid::new_v4().to_string(), tenant_id, google_location_id, title, now_ts()],
            )
            .map_err(db_err("Upsert location"))?;
        self.conn
            .query_row(
                &format!("SELECT {LOCATION_COLS} FROM locations WHERE tenant_id=?1 AND google_location_id=?2"),
                params![tenant_id, google_location_id],
                location_from_row,
            )
            .map_err(db_err("Get location"))
    }

    pub fn list_locations(&self, tenant_id: &str) -> Result<Vec<Location>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {LOCATION_COLS} FROM locations WHERE tenant_id=?1 ORDER BY title"
            ))
            .map_err(db_err("Prepare"))?;
        let locations = stmt
            .query_map(params![tenant_id], location_from_row)
            .map_err(db_err("Query"))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err("Read location"))?;
        Ok(locations)
    }

    pub fn mark_location_synced(&self, location_id: &str) -> Result<()> {
        self.conn
            .execute(
                "UPDATE locations SET last_synced_at=?1 WHERE id=?2",
                params![now_ts(), location_id],
            )
            .map_err(db_err("Mark location synced"))?;
        Ok(())
    }

    // ── Reviews ────────────────────────────────────

    pub fn get_review(&self, id: &str) -> Result<Review> {
        self.conn
            .query_row(&format!("{REVIEW_SELECT} WHERE r.id=?1"), params![id], review_from_row)
            .optional()
            .map_err(db_err("Get review"))?
            .ok_or_else(|| ReviewPilotError::not_found("review"))
    }

    pub fn find_review(&self, location_id: &str, google_review_id: &str) -> Result<Option<Review>> {
        self.conn
            .query_row(
                &format!("{REVIEW_SELECT} WHERE r.location_id=?1 AND r.google_review_id=?2"),
                params![location_id, google_review_id],
                review_from_row,
            )
            .optional()
            .map_err(db_err("Find review"))
    }

    pub fn list_reviews(&self, filter: &ReviewFilter) -> Result<ReviewListing> {
        let mut clauses: Vec<&str> = Vec::new();
        let mut args: Vec<Value> = Vec::new();
        if let Some(ref t) = filter.tenant_id {
            clauses.push("r.tenant_id = ?");
            args.push(Value::Text(t.clone()));
        }
        if let Some(state) = filter.state {
            clauses.push("r.reply_state = ?");
            args.push(Value::Text(state.as_str().into()));
        }
        if let Some(rating) = filter.rating {
            clauses.push("r.rating = ?");
            args.push(Value::Integer(rating as i64));
        }
        if let Some(ref l) = filter.location_id {
            clauses.push("r.location_id = ?");
            args.push(Value::Text(l.clone()));
        }
        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };

        let total: u64 = self
            .conn
            .query_row(
                &format!("SELECT COUNT(*) FROM reviews r{where_sql}"),
                params_from_iter(args.iter()),
                |r| r.get(0),
            )
            .map_err(db_err("Count reviews"))?;

        let page = filter.page.unwrap_or(1).max(1);
        let limit = filter.limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT);
        let offset = (page as i64 - 1) * limit as i64;
        args.push(Value::Integer(limit as i64));
        args.push(Value::Integer(offset));

        let mut stmt = self
            .conn
            .prepare(&format!(
                "{REVIEW_SELECT}{where_sql} ORDER BY r.review_created_at DESC, r.id LIMIT ? OFFSET ?"
            ))
            .map_err(db_err("Prepare"))?;
        let reviews = stmt
            .query_map(params_from_iter(args.iter()), review_from_row)
            .map_err(db_err("Query"))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err("Read review"))?;

        Ok(ReviewListing { reviews, total, page, limit })
    }

    /// Insert a review fetched from the platform, or refresh the stored copy.
    ///
    /// A local draft survives a refresh unless the platform now shows an owner
    /// reply, in which case the platform reply wins.
    pub fn upsert_platform_review(
        &self,
        tenant_id: &str,
        location_id: &str,
        fetched: &PlatformReview,
    ) -> Result<UpsertOutcome> {
        let updated_at = ts(fetched.update_time);
        let platform_reply = fetched.reply.as_ref().map(|r| r.comment.as_str());

        let Some(existing) = self.find_review(location_id, &fetched.review_id)? else {
            let (state, source) = match platform_reply {
                Some(_) => (ReplyState::Posted, Some(ReplySource::Platform)),
                None => (ReplyState::NoReply, None),
            };
            let reply_at = fetched.reply.as_ref().map(|r| ts(r.update_time.unwrap_or(fetched.update_time)));
            self.conn
                .execute(
                    "INSERT INTO reviews (id, tenant_id, location_id, google_review_id, reviewer_name, rating, comment,
                        review_created_at, review_updated_at, reply_text, reply_state, reply_source,
                        reply_updated_at, reply_posted_at, synced_at)
                     VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?13,?14)",
                    params![
                        uuid::Uuid::new_v4().to_string(),
                        tenant_id,
                        location_id,
                        fetched.review_id,
                        fetched.reviewer_name,
                        fetched.rating.stars(),
                        fetched.comment,
                        ts(fetched.create_time),
                        updated_at,
                        platform_reply,
                        state.as_str(),
                        source.map(|s| s.as_str()),
                        reply_at,
                        now_ts(),
                    ],
                )
                .map_err(db_err("Insert review"))?;
            return Ok(UpsertOutcome::Inserted);
        };

        let content_changed = existing.review_updated_at != updated_at
            || existing.comment != fetched.comment
            || existing.rating != fetched.rating.stars()
            || existing.reviewer_name != fetched.reviewer_name;
        let reply_changed = match platform_reply {
            Some(text) => existing.reply_state != ReplyState::Posted || existing.reply_text.as_deref() != Some(text),
            None => false,
        };

        if !content_changed && !reply_changed {
            return Ok(UpsertOutcome::Unchanged);
        }

        self.conn
            .execute(
                "UPDATE reviews SET reviewer_name=?1, rating=?2, comment=?3, review_updated_at=?4, synced_at=?5
                 WHERE id=?6",
                params![
                    fetched.reviewer_name,
                    fetched.rating.stars(),
                    fetched.comment,
                    updated_at,
                    now_ts(),
                    existing.id
                ],
            )
            .map_err(db_err("Update review"))?;

        if let (true, Some(reply)) = (reply_changed, fetched.reply.as_ref()) {
            let reply_at = ts(reply.update_time.unwrap_or(fetched.update_time));
            self.conn
                .execute(
                    "UPDATE reviews SET reply_text=?1, reply_state='posted', reply_source='platform',
                        reply_updated_at=?2, reply_posted_at=?2 WHERE id=?3",
                    params![reply.comment, reply_at, existing.id],
                )
                .map_err(db_err("Apply platform reply"))?;
        }
        Ok(UpsertOutcome::Updated)
    }

    /// NoReply → Drafted. Returns false when the review was not in NoReply.
    pub fn save_draft(&self, review_id: &str, text: &str) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                "UPDATE reviews SET reply_text=?1, reply_state='drafted', reply_source='ai', reply_updated_at=?2
                 WHERE id=?3 AND reply_state='none'",
                params![text, now_ts(), review_id],
            )
            .map_err(db_err("Save draft"))?;
        Ok(changed == 1)
    }

    /// Drafted|Edited → Edited. Returns false when no draft was pending.
    pub fn edit_reply(&self, review_id: &str, text: &str) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                "UPDATE reviews SET reply_text=?1, reply_state='edited', reply_source='manual', reply_updated_at=?2
                 WHERE id=?3 AND reply_state IN ('drafted','edited')",
                params![text, now_ts(), review_id],
            )
            .map_err(db_err("Edit reply"))?;
        Ok(changed == 1)
    }

    /// Drafted|Edited → Posted, only if the text is still the one that was
    /// sent to the platform.
    pub fn mark_posted(&self, review_id: &str, posted_text: &str, approved_by: &str) -> Result<bool> {
        let now = now_ts();
        let changed = self
            .conn
            .execute(
                "UPDATE reviews SET reply_state='posted', reply_posted_at=?1, reply_updated_at=?1, approved_by=?2
                 WHERE id=?3 AND reply_state IN ('drafted','edited') AND reply_text=?4",
                params![now, approved_by, review_id, posted_text],
            )
            .map_err(db_err("Mark posted"))?;
        Ok(changed == 1)
    }

    // ── Aggregates ────────────────────────────────────

    pub fn review_stats(&self, tenant_id: Option<&str>) -> Result<ReviewStats> {
        let (where_sql, args): (&str, Vec<Value>) = match tenant_id {
            Some(t) => (" WHERE tenant_id = ?", vec![Value::Text(t.to_string())]),
            None => ("", vec![]),
        };
        let mut stats = ReviewStats::default();
        let mut rating_sum: u64 = 0;

        let mut stmt = self
            .conn
            .prepare(&format!("SELECT rating, COUNT(*) FROM reviews{where_sql} GROUP BY rating"))
            .map_err(db_err("Prepare"))?;
        let rows = stmt
            .query_map(params_from_iter(args.iter()), |r| Ok((r.get::<_, u8>(0)?, r.get::<_, u64>(1)?)))
            .map_err(db_err("Query"))?;
        for row in rows {
            let (rating, count) = row.map_err(db_err("Read rating"))?;
            if (1..=5).contains(&rating) {
                stats.distribution[(rating - 1) as usize] = count;
                stats.total += count;
                rating_sum += rating as u64 * count;
            }
        }
        if stats.total > 0 {
            let avg = rating_sum as f64 / stats.total as f64;
            stats.average_rating = Some((avg * 100.0).round() / 100.0);
        }

        let mut stmt = self
            .conn
            .prepare(&format!("SELECT reply_state, COUNT(*) FROM reviews{where_sql} GROUP BY reply_state"))
            .map_err(db_err("Prepare"))?;
        let rows = stmt
            .query_map(params_from_iter(args.iter()), |r| Ok((parse_col::<ReplyState>(r, 0)?, r.get::<_, u64>(1)?)))
            .map_err(db_err("Query"))?;
        for row in rows {
            match row.map_err(db_err("Read state"))? {
                (ReplyState::NoReply, n) => stats.no_reply = n,
                (ReplyState::Drafted, n) => stats.drafted = n,
                (ReplyState::Edited, n) => stats.edited = n,
                (ReplyState::Posted, n) => stats.posted = n,
            }
        }
        Ok(stats)
    }

    // ── OAuth credentials ────────────────────────────────────

    pub fn save_credential(&self, cred: &OAuthCredential) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO oauth_credentials (tenant_id, access_token, refresh_token, expires_at, scope, account_id, connected_at, updated_at)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8)
                 ON CONFLICT(tenant_id) DO UPDATE SET
                   access_token=excluded.access_token, refresh_token=excluded.refresh_token,
                   expires_at=excluded.expires_at, scope=excluded.scope, account_id=excluded.account_id,
                   connected_at=excluded.connected_at, updated_at=excluded.updated_at",
                params![
                    cred.tenant_id,
                    cred.access_token,
                    cred.refresh_token,
                    cred.expires_at,
                    cred.scope,
                    cred.account_id,
                    cred.connected_at,
                    now_ts()
                ],
            )
            .map_err(db_err("Save credential"))?;
        Ok(())
    }

    pub fn get_credential(&self, tenant_id: &str) -> Result<Option<OAuthCredential>> {
        self.conn
            .query_row(
                &format!("SELECT {CREDENTIAL_COLS} FROM oauth_credentials WHERE tenant_id=?1"),
                params![tenant_id],
                credential_from_row,
            )
            .optional()
            .map_err(db_err("Get credential"))
    }

    pub fn update_access_token(&self, tenant_id: &str, access_token: &str, expires_at: &str) -> Result<()> {
        self.conn
            .execute(
                "UPDATE oauth_credentials SET access_token=?1, expires_at=?2, updated_at=?3 WHERE tenant_id=?4",
                params![access_token, expires_at, now_ts(), tenant_id],
            )
            .map_err(db_err("Update access token"))?;
        Ok(())
    }

    /// Returns true when a credential was removed.
    pub fn delete_credential(&self, tenant_id: &str) -> Result<bool> {
        let n = self
            .conn
            .execute("DELETE FROM oauth_credentials WHERE tenant_id=?1", params![tenant_id])
            .map_err(db_err("Delete credential"))?;
        Ok(n > 0)
    }

    pub fn connected_tenant_ids(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT tenant_id FROM oauth_credentials ORDER BY tenant_id")
            .map_err(db_err("Prepare"))?;
        let ids = stmt
            .query_map([], |r| r.get::<_, String>(0))
            .map_err(db_err("Query"))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err("Read tenant id"))?;
        Ok(ids)
    }

    // ── AI usage ────────────────────────────────────

    pub fn record_ai_usage(&self, tenant_id: &str, review_id: &str, provider: &str, tokens: u32) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO ai_usage (tenant_id, review_id, provider, tokens, created_at) VALUES (?1,?2,?3,?4,?5)",
                params![tenant_id, review_id, provider, tokens, now_ts()],
            )
            .map_err(db_err("Record AI usage"))?;
        Ok(())
    }

    /// AI drafts generated for a tenant since `since` (inclusive).
    pub fn ai_usage_since(&self, tenant_id: &str, since: DateTime<Utc>) -> Result<u32> {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM ai_usage WHERE tenant_id=?1 AND created_at >= ?2",
                params![tenant_id, ts(since)],
                |r| r.get(0),
            )
            .map_err(db_err("Count AI usage"))
    }

    // ── Audit Log ────────────────────────────────────

    pub fn log_event(&self, event_type: &str, actor_type: &str, actor_id: &str, details: Option<&str>) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO audit_log (event_type, actor_type, actor_id, details, created_at) VALUES (?1,?2,?3,?4,?5)",
                params![event_type, actor_type, actor_id, details, now_ts()],
            )
            .map_err(db_err("Log event"))?;
        Ok(())
    }

    pub fn recent_events(&self, limit: usize) -> Result<Vec<AuditEntry>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id,event_type,actor_type,actor_id,details,created_at FROM audit_log ORDER BY id DESC LIMIT ?1",
            )
            .map_err(db_err("Prepare"))?;
        let entries = stmt
            .query_map(params![limit as i64], |row| {
                Ok(AuditEntry {
                    id: row.get(0)?,
                    event_type: row.get(1)?,
                    actor_type: row.get(2)?,
                    actor_id: row.get(3)?,
                    details: row.get(4)?,
                    created_at: row.get(5)?,
                })
            })
            .map_err(db_err("Query"))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err("Read audit entry"))?;
        Ok(entries)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use reviewpilot_core::types::{PlatformReply, StarRating};

    pub(crate) fn temp_db() -> PlatformDb {
        PlatformDb::open_in_memory().unwrap()
    }

    pub(crate) fn fetched(id: &str, stars: u8, comment: &str, updated: &str) -> PlatformReview {
        PlatformReview {
            review_id: id.into(),
            reviewer_name: "Jordan Park".into(),
            rating: StarRating::new(stars).unwrap(),
            comment: comment.into(),
            create_time: parse_ts("2024-03-01T09:00:00Z").unwrap(),
            update_time: parse_ts(updated).unwrap(),
            reply: None,
        }
    }

    fn seed() -> (PlatformDb, Tenant, Location) {
        let db = temp_db();
        let t = db
            .create_tenant(&NewTenant { slug: "acme", business_name: "Acme Bakery", package: Package::Pro })
            .unwrap();
        let loc = db.upsert_location(&t.id, "accounts/1/locations/1", "Acme Main").unwrap();
        (db, t, loc)
    }

    #[test]
    fn test_create_and_list_tenants() {
        let db = temp_db();
        let t = db
            .create_tenant(&NewTenant { slug: "cafe", business_name: "Cafe", package: Package::Basic })
            .unwrap();
        assert_eq!(t.slug, "cafe");
        assert!(t.ai_replies_enabled);
        assert_eq!(t.reply_tone, "friendly");
        assert_eq!(db.list_tenants().unwrap().len(), 1);
        assert!(db.get_tenant_by_slug("cafe").unwrap().is_some());
        assert!(db.get_tenant_by_slug("nope").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_slug_is_conflict() {
        let db = temp_db();
        let new = NewTenant { slug: "dup", business_name: "Dup", package: Package::Basic };
        db.create_tenant(&new).unwrap();
        assert!(matches!(db.create_tenant(&new), Err(ReviewPilotError::Conflict(_))));
    }

    #[test]
    fn test_tenant_with_owner_rolls_back_on_duplicate_email() {
        let db = temp_db();
        db.create_user("owner@x.com", "h", Role::Admin, None).unwrap();
        let new = NewTenant { slug: "x", business_name: "X", package: Package::Basic };
        assert!(db.create_tenant_with_owner(&new, "owner@x.com", "h").is_err());
        assert!(db.get_tenant_by_slug("x").unwrap().is_none());
    }

    #[test]
    fn test_user_crud() {
        let db = temp_db();
        let id = db.create_user("Admin@ReviewPilot.io", "$2b$04$fake", Role::Admin, None).unwrap();
        let auth = db.get_user_auth_by_email("admin@reviewpilot.io").unwrap().unwrap();
        assert_eq!(auth.id, id);
        assert_eq!(auth.role, Role::Admin);
        db.touch_last_login(&id).unwrap();
        assert!(db.get_user(&id).unwrap().last_login.is_some());
    }

    #[test]
    fn test_upsert_location_updates_title() {
        let (db, t, loc) = seed();
        let again = db.upsert_location(&t.id, "accounts/1/locations/1", "Acme Downtown").unwrap();
        assert_eq!(again.id, loc.id);
        assert_eq!(again.title, "Acme Downtown");
        assert_eq!(db.list_locations(&t.id).unwrap().len(), 1);
    }

    #[test]
    fn test_review_upsert_outcomes() {
        let (db, t, loc) = seed();
        let r = fetched("g1", 4, "Nice bread", "2024-03-01T09:00:00Z");
        assert_eq!(db.upsert_platform_review(&t.id, &loc.id, &r).unwrap(), UpsertOutcome::Inserted);
        assert_eq!(db.upsert_platform_review(&t.id, &loc.id, &r).unwrap(), UpsertOutcome::Unchanged);

        let edited = fetched("g1", 2, "Bread was stale", "2024-03-05T09:00:00Z");
        assert_eq!(db.upsert_platform_review(&t.id, &loc.id, &edited).unwrap(), UpsertOutcome::Updated);
        let stored = db.find_review(&loc.id, "g1").unwrap().unwrap();
        assert_eq!(stored.rating, 2);
        assert_eq!(stored.reply_state, ReplyState::NoReply);
        assert_eq!(stored.client_slug, "acme");
    }

    #[test]
    fn test_platform_reply_overrides_local_draft() {
        let (db, t, loc) = seed();
        let mut r = fetched("g2", 5, "Love it", "2024-03-01T09:00:00Z");
        db.upsert_platform_review(&t.id, &loc.id, &r).unwrap();
        let id = db.find_review(&loc.id, "g2").unwrap().unwrap().id;
        assert!(db.save_draft(&id, "Thanks!").unwrap());

        r.reply = Some(PlatformReply { comment: "Thank you from the owner".into(), update_time: None });
        assert_eq!(db.upsert_platform_review(&t.id, &loc.id, &r).unwrap(), UpsertOutcome::Updated);
        let stored = db.get_review(&id).unwrap();
        assert_eq!(stored.reply_state, ReplyState::Posted);
        assert_eq!(stored.reply_source, Some(ReplySource::Platform));
        assert_eq!(stored.reply_text.as_deref(), Some("Thank you from the owner"));
    }

    #[test]
    fn test_reply_transitions_are_guarded() {
        let (db, t, loc) = seed();
        db.upsert_platform_review(&t.id, &loc.id, &fetched("g3", 3, "", "2024-03-01T09:00:00Z")).unwrap();
        let id = db.find_review(&loc.id, "g3").unwrap().unwrap().id;

        assert!(!db.edit_reply(&id, "x").unwrap());
        assert!(db.save_draft(&id, "draft").unwrap());
        assert!(!db.save_draft(&id, "again").unwrap());
        assert!(db.edit_reply(&id, "edited").unwrap());
        assert!(!db.mark_posted(&id, "stale text", "a@b.c").unwrap());
        assert!(db.mark_posted(&id, "edited", "a@b.c").unwrap());
        assert!(!db.edit_reply(&id, "late").unwrap());

        let r = db.get_review(&id).unwrap();
        assert_eq!(r.reply_state, ReplyState::Posted);
        assert_eq!(r.approved_by.as_deref(), Some("a@b.c"));
    }

    #[test]
    fn test_list_reviews_filters_and_pages() {
        let (db, t, loc) = seed();
        for (i, stars) in [5u8, 4, 5, 1].iter().enumerate() {
            let mut r = fetched(&format!("g{i}"), *stars, "", "2024-03-01T09:00:00Z");
            r.create_time = parse_ts(&format!("2024-03-0{}T09:00:00Z", i + 1)).unwrap();
            db.upsert_platform_review(&t.id, &loc.id, &r).unwrap();
        }

        let all = db.list_reviews(&ReviewFilter::default()).unwrap();
        assert_eq!(all.total, 4);
        assert_eq!(all.reviews[0].google_review_id, "g3");

        let fives = db.list_reviews(&ReviewFilter { rating: Some(5), ..Default::default() }).unwrap();
        assert_eq!(fives.total, 2);

        let page2 = db
            .list_reviews(&ReviewFilter { page: Some(2), limit: Some(3), ..Default::default() })
            .unwrap();
        assert_eq!(page2.reviews.len(), 1);
        assert_eq!(page2.total, 4);

        let none = db
            .list_reviews(&ReviewFilter { state: Some(ReplyState::Posted), ..Default::default() })
            .unwrap();
        assert_eq!(none.total, 0);
    }

    #[test]
    fn test_review_stats() {
        let (db, t, loc) = seed();
        assert_eq!(db.review_stats(Some(&t.id)).unwrap().average_rating, None);
        for (i, stars) in [5u8, 4, 4].iter().enumerate() {
            db.upsert_platform_review(&t.id, &loc.id, &fetched(&format!("s{i}"), *stars, "", "2024-03-01T09:00:00Z"))
                .unwrap();
        }
        let id = db.find_review(&loc.id, "s0").unwrap().unwrap().id;
        db.save_draft(&id, "thanks").unwrap();

        let stats = db.review_stats(Some(&t.id)).unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.average_rating, Some(4.33));
        assert_eq!(stats.distribution, [0, 0, 0, 2, 1]);
        assert_eq!(stats.drafted, 1);
        assert_eq!(stats.no_reply, 2);
        assert_eq!(stats.pending(), 3);
    }

    #[test]
    fn test_credentials() {
        let (db, t, _) = seed();
        assert!(db.get_credential(&t.id).unwrap().is_none());
        let cred = OAuthCredential {
            tenant_id: t.id.clone(),
            access_token: "at".into(),
            refresh_token: "rt".into(),
            expires_at: "2030-01-01T00:00:00Z".into(),
            scope: None,
            account_id: Some("accounts/1".into()),
            connected_at: now_ts(),
        };
        db.save_credential(&cred).unwrap();
        db.update_access_token(&t.id, "at2", "2031-01-01T00:00:00Z").unwrap();
        let stored = db.get_credential(&t.id).unwrap().unwrap();
        assert_eq!(stored.access_token, "at2");
        assert_eq!(stored.refresh_token, "rt");
        assert_eq!(db.connected_tenant_ids().unwrap(), vec![t.id.clone()]);
        assert!(db.delete_credential(&t.id).unwrap());
        assert!(!db.delete_credential(&t.id).unwrap());
    }

    #[test]
    fn test_ai_usage_window() {
        let (db, t, _) = seed();
        db.record_ai_usage(&t.id, "r1", "mock", 20).unwrap();
        db.record_ai_usage(&t.id, "r2", "mock", 20).unwrap();
        let month_ago = Utc::now() - chrono::Duration::days(31);
        assert_eq!(db.ai_usage_since(&t.id, month_ago).unwrap(), 2);
        let tomorrow = Utc::now() + chrono::Duration::days(1);
        assert_eq!(db.ai_usage_since(&t.id, tomorrow).unwrap(), 0);
    }

    #[test]
    fn test_audit_log() {
        let db = temp_db();
        db.log_event("client_created", "user", "admin-1", Some("slug=test")).unwrap();
        db.log_event("login_success", "user", "user-1", None).unwrap();
        let events = db.recent_events(10).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, "login_success");
    }
}
