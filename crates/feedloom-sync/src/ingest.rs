//! One ingestion pass for one subscription: fetch, normalize, dedup, persist.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use feedloom_adapters::{normalize_document, FeedSource};
use feedloom_core::{Entry, EntryDraft, Subscription};
use feedloom_storage::{FetchError, PersistenceError, Storage};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::queues::{Lane, TaskQueues};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("persistence failed: {0}")]
    Persistence(#[from] PersistenceError),
}

#[derive(Debug, Clone, Default)]
pub struct IngestOutcome {
    /// Items present in the fetched document.
    pub fetched: usize,
    /// Entries newly persisted by this pass.
    pub created: Vec<Entry>,
}

/// Post-ingest extension point. Runs on the hook lane after entries are stored;
/// its errors are logged and never fail the ingestion.
#[async_trait]
pub trait IngestHook: Send + Sync {
    async fn on_created(&self, subscription: &Subscription, entries: &[Entry]) -> anyhow::Result<()>;
}

#[derive(Default)]
pub struct NoopIngestHook;

#[async_trait]
impl IngestHook for NoopIngestHook {
    async fn on_created(&self, _subscription: &Subscription, _entries: &[Entry]) -> anyhow::Result<()> {
        Ok(())
    }
}

/// What the schedule registry invokes on every tick.
#[async_trait]
pub trait SubscriptionRunner: Send + Sync {
    async fn run(&self, subscription: &Subscription) -> Result<IngestOutcome, IngestError>;
}

pub struct IngestionWorker {
    source: Arc<dyn FeedSource>,
    storage: Arc<dyn Storage>,
    queues: Arc<TaskQueues>,
    hook: Arc<dyn IngestHook>,
}

impl IngestionWorker {
    pub fn new(source: Arc<dyn FeedSource>, storage: Arc<dyn Storage>, queues: Arc<TaskQueues>) -> Self {
        Self {
            source,
            storage,
            queues,
            hook: Arc::new(NoopIngestHook),
        }
    }

    pub fn with_hook(mut self, hook: Arc<dyn IngestHook>) -> Self {
        self.hook = hook;
        self
    }

    pub async fn ingest(&self, subscription: &Subscription) -> Result<IngestOutcome, IngestError> {
        let document = self
            .queues
            .submit(
                Lane::Fetch,
                self.source.fetch(&subscription.url, subscription.proxy.as_deref()),
            )
            .await?;

        let now = Utc::now();
        let drafts = normalize_document(document, now);
        let fetched = drafts.len();
        let drafts = dedup_batch(drafts);

        let guids = drafts.iter().map(|d| d.guid.clone()).collect::<Vec<_>>();
        let known = self
            .storage
            .find_entries_by_owner_and_guids(subscription.owner_id, &guids)
            .await?
            .into_iter()
            .map(|entry| entry.guid)
            .collect::<HashSet<_>>();

        let fresh = drafts
            .into_iter()
            .filter(|draft| !known.contains(&draft.guid))
            .map(|draft| Entry::from_draft(draft, subscription, now))
            .collect::<Vec<_>>();

        let created = if fresh.is_empty() {
            Vec::new()
        } else {
            self.storage.save_entries(fresh).await?
        };

        info!(
            subscription_id = %subscription.id,
            fetched,
            created = created.len(),
            "ingestion pass complete"
        );

        if !created.is_empty() {
            self.dispatch_hook(subscription, &created);
        }

        Ok(IngestOutcome { fetched, created })
    }

    fn dispatch_hook(&self, subscription: &Subscription, created: &[Entry]) {
        let hook = Arc::clone(&self.hook);
        let subscription = subscription.clone();
        let created = created.to_vec();
        self.queues.spawn(Lane::Hook, async move {
            if let Err(err) = hook.on_created(&subscription, &created).await {
                warn!(subscription_id = %subscription.id, error = %err, "ingest hook failed");
            }
        });
    }
}

#[async_trait]
impl SubscriptionRunner for IngestionWorker {
    async fn run(&self, subscription: &Subscription) -> Result<IngestOutcome, IngestError> {
        self.ingest(subscription).await
    }
}

/// Keep the first occurrence of each guid within one fetched batch.
fn dedup_batch(drafts: Vec<EntryDraft>) -> Vec<EntryDraft> {
    let mut seen = HashSet::new();
    let before = drafts.len();
    let kept = drafts
        .into_iter()
        .filter(|draft| seen.insert(draft.guid.clone()))
        .collect::<Vec<_>>();
    if kept.len() < before {
        debug!(dropped = before - kept.len(), "duplicate guids within fetched batch");
    }
    kept
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    use feedloom_adapters::{RawFeedDocument, RawItem};
    use feedloom_storage::MemoryStore;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    use super::*;

    /// Serves canned documents keyed by URL; unknown URLs fail with a 404.
    #[derive(Default)]
    struct ScriptedSource {
        documents: Mutex<HashMap<String, RawFeedDocument>>,
    }

    impl ScriptedSource {
        fn serve(&self, url: &str, guids: &[&str]) {
            let document = RawFeedDocument {
                title: Some("scripted".into()),
                link: None,
                author: Some("Feed Author".into()),
                items: guids
                    .iter()
                    .map(|guid| RawItem {
                        guid: Some(format!("https://items.example/{guid}")),
                        title: Some(format!("item {guid}")),
                        ..Default::default()
                    })
                    .collect(),
            };
            self.documents.lock().unwrap().insert(url.to_string(), document);
        }
    }

    #[async_trait]
    impl FeedSource for ScriptedSource {
        async fn fetch(&self, url: &str, _proxy: Option<&str>) -> Result<RawFeedDocument, FetchError> {
            self.documents
                .lock()
                .unwrap()
                .get(url)
                .cloned()
                .ok_or_else(|| FetchError::HttpStatus {
                    status: 404,
                    url: url.to_string(),
                })
        }
    }

    struct RecordingHook(mpsc::UnboundedSender<usize>);

    #[async_trait]
    impl IngestHook for RecordingHook {
        async fn on_created(&self, _subscription: &Subscription, entries: &[Entry]) -> anyhow::Result<()> {
            let _ = self.0.send(entries.len());
            anyhow::bail!("hook errors are only logged")
        }
    }

    fn subscription(owner_id: Uuid, url: &str) -> Subscription {
        Subscription {
            id: Uuid::new_v4(),
            owner_id,
            url: url.to_string(),
            cron: "every hour".into(),
            enabled: true,
            title: None,
            proxy: None,
            max_retry: 0,
        }
    }

    fn worker(source: Arc<ScriptedSource>, store: Arc<MemoryStore>) -> IngestionWorker {
        IngestionWorker::new(source, store, Arc::new(TaskQueues::default()))
    }

    #[tokio::test]
    async fn second_pass_over_same_document_creates_nothing() {
        let source = Arc::new(ScriptedSource::default());
        source.serve("https://a.example/feed", &["g1", "g2", "g3"]);
        let store = Arc::new(MemoryStore::new());
        let worker = worker(Arc::clone(&source), Arc::clone(&store));
        let sub = subscription(Uuid::new_v4(), "https://a.example/feed");

        let first = worker.ingest(&sub).await.unwrap();
        assert_eq!(first.fetched, 3);
        assert_eq!(first.created.len(), 3);
        assert!(first.created.iter().all(|e| e.subscription_id == sub.id));
        assert!(first.created.iter().all(|e| e.author.as_deref() == Some("Feed Author")));

        let second = worker.ingest(&sub).await.unwrap();
        assert_eq!(second.fetched, 3);
        assert!(second.created.is_empty());
        assert_eq!(store.entries().await.len(), 3);
    }

    #[tokio::test]
    async fn guid_seen_by_another_subscription_of_same_owner_is_skipped() {
        let source = Arc::new(ScriptedSource::default());
        source.serve("https://a.example/feed", &["shared", "only-a"]);
        source.serve("https://b.example/feed", &["shared", "only-b"]);
        let store = Arc::new(MemoryStore::new());
        let worker = worker(source, Arc::clone(&store));
        let owner = Uuid::new_v4();

        worker.ingest(&subscription(owner, "https://a.example/feed")).await.unwrap();
        let b = worker.ingest(&subscription(owner, "https://b.example/feed")).await.unwrap();
        let created = b.created.iter().map(|e| e.guid.as_str()).collect::<Vec<_>>();
        assert_eq!(created, vec!["https://items.example/only-b"]);

        // A different owner gets its own copy.
        let other = worker
            .ingest(&subscription(Uuid::new_v4(), "https://b.example/feed"))
            .await
            .unwrap();
        assert_eq!(other.created.len(), 2);
    }

    #[tokio::test]
    async fn duplicate_guids_within_one_document_are_stored_once() {
        let source = Arc::new(ScriptedSource::default());
        source.serve("https://a.example/feed", &["dup", "dup", "solo"]);
        let store = Arc::new(MemoryStore::new());
        let worker = worker(source, Arc::clone(&store));

        let outcome = worker
            .ingest(&subscription(Uuid::new_v4(), "https://a.example/feed"))
            .await
            .unwrap();
        assert_eq!(outcome.fetched, 3);
        assert_eq!(outcome.created.len(), 2);
    }

    #[tokio::test]
    async fn fetch_failure_propagates_and_persists_nothing() {
        let source = Arc::new(ScriptedSource::default());
        let store = Arc::new(MemoryStore::new());
        let worker = worker(source, Arc::clone(&store));

        let err = worker
            .ingest(&subscription(Uuid::new_v4(), "https://missing.example/feed"))
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Fetch(FetchError::HttpStatus { status: 404, .. })));
        assert!(store.entries().await.is_empty());
    }

    #[tokio::test]
    async fn hook_sees_created_entries_and_its_error_is_swallowed() {
        let source = Arc::new(ScriptedSource::default());
        source.serve("https://a.example/feed", &["g1", "g2"]);
        let store = Arc::new(MemoryStore::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let worker = worker(source, store).with_hook(Arc::new(RecordingHook(tx)));

        let outcome = worker
            .ingest(&subscription(Uuid::new_v4(), "https://a.example/feed"))
            .await
            .unwrap();
        assert_eq!(outcome.created.len(), 2);

        let seen = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("hook ran")
            .expect("hook reported");
        assert_eq!(seen, 2);
    }
}
