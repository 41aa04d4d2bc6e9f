//! ReviewPilot command-line entry point.
//!
//! Usage:
//!   reviewpilot serve [--config PATH] [--port N]
//!   reviewpilot quota --locations 5 --reviews-per-location 40 --sync-interval-mins 30
//!   reviewpilot import-sheet clients.csv --dry-run
//!   reviewpilot demo-reply --rating 2 --text "Cold food"
//!   reviewpilot create-admin --email ops@example.com --password ...

use anyhow::Context;
use clap::{Parser, Subcommand};
use reviewpilot_core::config::ReviewPilotConfig;
use reviewpilot_core::traits::Provider;
use reviewpilot_core::traits::provider::GenerateParams;
use reviewpilot_core::types::{Role, StarRating};
use reviewpilot_gateway::AppState;
use reviewpilot_google::GoogleBusinessClient;
use reviewpilot_platform::auth::hash_password;
use reviewpilot_platform::db::PlatformDb;
use reviewpilot_platform::quota::{self, QuotaInput};
use reviewpilot_platform::sheet;
use reviewpilot_providers::reply::{ReplyContext, build_reply_messages, clean_reply};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "reviewpilot", version, about = "Google review inbox with AI-drafted replies")]
struct Cli {
    /// Config file (defaults to $REVIEWPILOT_CONFIG or ~/.reviewpilot/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API and the background review sync
    Serve {
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Estimate Google API usage against the default quota
    Quota {
        #[arg(long)]
        locations: u32,
        /// Average new reviews per location per month
        #[arg(long)]
        reviews_per_location: f64,
        #[arg(long, default_value_t = 30)]
        sync_interval_mins: u32,
        /// Share of reviews that get a reply posted
        #[arg(long, default_value_t = 1.0)]
        reply_ratio: f64,
    },
    /// Create clients from a CSV file or a Google Sheets link
    ImportSheet {
        source: String,
        /// Validate only, create nothing
        #[arg(long)]
        dry_run: bool,
    },
    /// Draft a reply for a sample review
    DemoReply {
        #[arg(long, default_value_t = 5)]
        rating: u8,
        #[arg(long, default_value = "Great coffee and friendly staff.")]
        text: String,
        #[arg(long, default_value = "Alex Morgan")]
        reviewer: String,
        #[arg(long, default_value = "Demo Cafe")]
        business: String,
        /// Use the configured LLM provider instead of the offline mock
        #[arg(long)]
        live: bool,
    },
    /// Create an admin user
    CreateAdmin {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Commands::Serve { port } => {
            let mut config = ReviewPilotConfig::load(cli.config.as_deref())?;
            if let Some(port) = port {
                config.gateway.port = port;
            }
            serve(config).await
        }
        Commands::Quota { locations, reviews_per_location, sync_interval_mins, reply_ratio } => {
            let estimate = quota::estimate(&QuotaInput {
                locations,
                reviews_per_location,
                sync_interval_mins,
                reply_ratio,
            })?;
            println!("{}", serde_json::to_string_pretty(&estimate)?);
            if !estimate.fits {
                tracing::warn!("estimated usage exceeds the default Google quota");
            }
            Ok(())
        }
        Commands::ImportSheet { source, dry_run } => {
            let config = ReviewPilotConfig::load(cli.config.as_deref())?;
            let db = open_db(&config)?;
            let csv_text = sheet::read_source(&source)
                .await
                .with_context(|| format!("failed to read {source}"))?;
            let report = sheet::import_clients(&db, &csv_text, dry_run, config.auth.bcrypt_cost, "cli")?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Commands::DemoReply { rating, text, reviewer, business, live } => {
            let (provider, params): (Box<dyn Provider>, GenerateParams) = if live {
                let config = ReviewPilotConfig::load(cli.config.as_deref())?;
                let params = GenerateParams {
                    model: config.llm.model.clone(),
                    temperature: config.llm.temperature,
                    max_tokens: config.llm.max_tokens,
                };
                (reviewpilot_providers::create_provider(&config.llm)?, params)
            } else {
                (Box::new(reviewpilot_providers::mock::MockProvider::new()) as Box<dyn Provider>, GenerateParams::default())
            };
            let ctx = ReplyContext {
                business_name: &business,
                reviewer_name: &reviewer,
                rating: StarRating::new(rating)?,
                review_text: &text,
                tone: "friendly",
                signature: None,
            };
            let response = provider.chat(&build_reply_messages(&ctx), &params).await?;
            println!("{}", clean_reply(response.content.as_deref().unwrap_or_default()));
            Ok(())
        }
        Commands::CreateAdmin { email, password } => {
            let config = ReviewPilotConfig::load(cli.config.as_deref())?;
            let db = open_db(&config)?;
            let id = create_admin(&db, &email, &password, config.auth.bcrypt_cost)?;
            println!("created admin {email} ({id})");
            Ok(())
        }
    }
}

fn open_db(config: &ReviewPilotConfig) -> anyhow::Result<PlatformDb> {
    let path = config.database_path();
    PlatformDb::open(&path).with_context(|| format!("failed to open database at {}", path.display()))
}

fn create_admin(db: &PlatformDb, email: &str, password: &str, cost: u32) -> anyhow::Result<String> {
    reviewpilot_platform::tenant::validate_email(email)?;
    if password.len() < reviewpilot_platform::tenant::MIN_PASSWORD_LEN {
        anyhow::bail!("password must be at least {} characters", reviewpilot_platform::tenant::MIN_PASSWORD_LEN);
    }
    let hash = hash_password(password, cost)?;
    let id = db.create_user(email, &hash, Role::Admin, None)?;
    db.log_event("admin_created", "system", &id, Some(email))?;
    Ok(id)
}

async fn serve(config: ReviewPilotConfig) -> anyhow::Result<()> {
    config.validate()?;
    let db = open_db(&config)?;
    tracing::info!("Database ready at {}", config.database_path().display());

    if let (Some(email), Some(password)) =
        (&config.auth.bootstrap_admin_email, &config.auth.bootstrap_admin_password)
    {
        if db.get_user_auth_by_email(email)?.is_none() {
            create_admin(&db, email, password, config.auth.bcrypt_cost)?;
            tracing::info!("Bootstrap admin {email} created");
        }
    }

    let google = Arc::new(GoogleBusinessClient::new(config.google.clone(), config.sync.page_size));
    let provider: Arc<dyn Provider> = Arc::from(reviewpilot_providers::create_provider(&config.llm)?);
    tracing::info!(provider = %config.llm.provider, model = %config.llm.model, "LLM provider ready");

    let interval = config.sync.interval_secs;
    let state = AppState::new(config, reviewpilot_platform::shared(db), google, provider);
    if interval > 0 {
        state.sync.clone().spawn_periodic(Duration::from_secs(interval));
        tracing::info!("Periodic review sync every {interval}s");
    }
    reviewpilot_gateway::start(state).await
}
