//! Polling orchestration: task lanes, the ingestion worker and the per-subscription schedule registry.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use feedloom_adapters::HttpFeedSource;
use feedloom_storage::{HttpClientConfig, HttpFetcher, MemoryStore, PgStore, Storage};
use serde::Serialize;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

pub mod config;
pub mod ingest;
pub mod queues;
pub mod registry;
pub mod schedule;

pub use config::{FailurePolicy, FeedloomConfig, RuntimeEnv};
pub use ingest::{IngestError, IngestHook, IngestOutcome, IngestionWorker, NoopIngestHook, SubscriptionRunner};
pub use queues::{Lane, LaneLimits, TaskQueues};
pub use registry::{load_subscription_registry, SubscriptionRegistry};
pub use schedule::{JobInfo, ScheduleConfig, ScheduleError, ScheduleRegistry, SeedSummary};

pub const CRATE_NAME: &str = "feedloom-sync";

/// Wired collaborators shared by the CLI commands.
pub struct Services {
    pub storage: Arc<dyn Storage>,
    pub queues: Arc<TaskQueues>,
    pub worker: Arc<IngestionWorker>,
    pub persistence_mode: &'static str,
}

impl Services {
    /// Postgres when `DATABASE_URL` is set, otherwise an in-memory store seeded from the YAML registry.
    pub async fn from_config(config: &FeedloomConfig) -> Result<Self> {
        let (storage, persistence_mode): (Arc<dyn Storage>, _) = match &config.database_url {
            Some(url) => {
                let store = PgStore::connect(url).await.context("connecting to postgres")?;
                (Arc::new(store) as Arc<dyn Storage>, "postgres")
            }
            None => {
                let registry = load_subscription_registry(&config.subscriptions_path).await?;
                let store = MemoryStore::with_subscriptions(registry.subscriptions);
                (Arc::new(store) as Arc<dyn Storage>, "memory")
            }
        };

        let http = HttpFetcher::new(HttpClientConfig {
            timeout: Duration::from_secs(config.http_timeout_secs),
            user_agent: Some(config.user_agent.clone()),
            ..Default::default()
        })
        .context("building http client")?;
        let queues = Arc::new(TaskQueues::new(config.lanes));
        let worker = Arc::new(IngestionWorker::new(
            Arc::new(HttpFeedSource::new(http)),
            Arc::clone(&storage),
            Arc::clone(&queues),
        ));

        info!(persistence_mode, "services initialized");
        Ok(Self {
            storage,
            queues,
            worker,
            persistence_mode,
        })
    }

    pub async fn schedule_registry(&self, config: &FeedloomConfig) -> Result<Arc<ScheduleRegistry>> {
        let runner: Arc<dyn SubscriptionRunner> = self.worker.clone();
        ScheduleRegistry::new(
            runner,
            Arc::clone(&self.storage),
            ScheduleConfig {
                max_jitter: config.max_jitter,
                failure_policy: config.failure_policy,
            },
        )
        .await
        .context("creating schedule registry")
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncRunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub enabled_subscriptions: usize,
    pub fetched_items: usize,
    pub created_entries: usize,
    pub failed_subscriptions: Vec<Uuid>,
}

/// Ingest every enabled subscription once, outside the scheduler. Failures are
/// reported in the summary and do not disable anything.
pub async fn run_sync_once(storage: &dyn Storage, runner: &dyn SubscriptionRunner) -> Result<SyncRunSummary> {
    let started_at = Utc::now();
    let run_id = Uuid::new_v4();
    let subscriptions = storage
        .list_enabled_subscriptions()
        .await
        .context("listing enabled subscriptions")?;

    let mut fetched_items = 0usize;
    let mut created_entries = 0usize;
    let mut failed_subscriptions = Vec::new();
    for subscription in &subscriptions {
        let span = info_span!("sync_once", subscription_id = %subscription.id);
        match runner.run(subscription).instrument(span).await {
            Ok(outcome) => {
                fetched_items += outcome.fetched;
                created_entries += outcome.created.len();
            }
            Err(err) => {
                error!(subscription_id = %subscription.id, error = %err, "ingestion failed");
                failed_subscriptions.push(subscription.id);
            }
        }
    }

    Ok(SyncRunSummary {
        run_id,
        started_at,
        finished_at: Utc::now(),
        enabled_subscriptions: subscriptions.len(),
        fetched_items,
        created_entries,
        failed_subscriptions,
    })
}

pub async fn run_sync_once_from_env() -> Result<SyncRunSummary> {
    let config = FeedloomConfig::from_env();
    let services = Services::from_config(&config).await?;
    run_sync_once(services.storage.as_ref(), services.worker.as_ref()).await
}
