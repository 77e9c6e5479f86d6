use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use feedloom_core::{apply, Filter, FilterOut, CRON_LABELS};
use feedloom_storage::{PgStore, Storage};
use feedloom_sync::{load_subscription_registry, run_sync_once, FeedloomConfig, Lane, Services};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "feedloom")]
#[command(about = "Subscription polling and ingestion")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Schedule every enabled subscription and poll until interrupted.
    Run,
    /// Ingest every enabled subscription once and print a JSON summary.
    Sync,
    /// Apply database migrations.
    Migrate,
    /// Upsert subscriptions from a YAML registry into Postgres.
    Import {
        #[arg(long)]
        path: Option<PathBuf>,
    },
    /// Print an owner's entries after applying a read filter.
    Query {
        #[arg(long)]
        owner: Uuid,
        #[arg(long)]
        subscription: Option<Uuid>,
        /// JSON file holding inclusion rules, `enclosureLength`, `time` and `limit`.
        #[arg(long)]
        filter: Option<PathBuf>,
        /// JSON file holding exclusion rules.
        #[arg(long)]
        filter_out: Option<PathBuf>,
        /// Entries loaded from storage before filtering.
        #[arg(long, default_value_t = 500)]
        scan: usize,
    },
    /// List the supported schedule labels.
    Labels,
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_JSON").is_ok_and(|v| matches!(v.as_str(), "1" | "true"));
    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer().with_target(true)).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();
    let cli = Cli::parse();
    let config = FeedloomConfig::from_env();

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(&config).await?,
        Commands::Sync => {
            let services = Services::from_config(&config).await?;
            let summary = run_sync_once(services.storage.as_ref(), services.worker.as_ref()).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Migrate => {
            let store = connect_pg(&config).await?;
            store.migrate().await.context("applying migrations")?;
            println!("migrations applied");
        }
        Commands::Import { path } => {
            let path = path.unwrap_or_else(|| config.subscriptions_path.clone());
            let registry = load_subscription_registry(&path).await?;
            let store = connect_pg(&config).await?;
            for subscription in &registry.subscriptions {
                store
                    .upsert_subscription(subscription)
                    .await
                    .with_context(|| format!("upserting subscription {}", subscription.id))?;
            }
            println!("imported {} subscriptions", registry.subscriptions.len());
        }
        Commands::Query {
            owner,
            subscription,
            filter,
            filter_out,
            scan,
        } => {
            let filter: Filter = read_json_or_default(filter.as_deref()).await?;
            let filter_out: FilterOut = read_json_or_default(filter_out.as_deref()).await?;
            let services = Services::from_config(&config).await?;
            let entries = services.storage.list_entries(owner, subscription, scan).await?;
            for entry in apply(entries, &filter, &filter_out) {
                println!("{}", serde_json::to_string(&entry)?);
            }
        }
        Commands::Labels => {
            for (label, expression) in CRON_LABELS {
                println!("{label:<18} {expression}");
            }
        }
    }

    Ok(())
}

async fn run(config: &FeedloomConfig) -> Result<()> {
    let services = Services::from_config(config).await?;
    let registry = services.schedule_registry(config).await?;
    let seeded = registry.seed().await?;
    registry.start().await?;
    info!(
        scheduled = seeded.scheduled,
        skipped = seeded.skipped,
        persistence_mode = services.persistence_mode,
        fetch_lane_limit = services.queues.limit(Lane::Fetch),
        "scheduler running; press ctrl-c to stop"
    );

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("shutting down");
    registry.shutdown().await?;
    Ok(())
}

async fn connect_pg(config: &FeedloomConfig) -> Result<PgStore> {
    let Some(url) = config.database_url.as_deref() else {
        bail!("DATABASE_URL must be set for this command");
    };
    PgStore::connect(url).await.context("connecting to postgres")
}

async fn read_json_or_default<T>(path: Option<&Path>) -> Result<T>
where
    T: serde::de::DeserializeOwned + Default,
{
    let Some(path) = path else {
        return Ok(T::default());
    };
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}
