//! Persistence contract + HTTP fetch utilities for feedloom.

use async_trait::async_trait;
use feedloom_core::{Entry, Subscription};
use thiserror::Error;
use uuid::Uuid;

pub mod http;
pub mod memory;
pub mod pg;

pub use http::{FetchError, FetchedResponse, HttpClientConfig, HttpFetcher, RetryPolicy};
pub use memory::MemoryStore;
pub use pg::PgStore;

pub const CRATE_NAME: &str = "feedloom-storage";

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("subscription {0} not found")]
    NotFound(Uuid),
    #[error("{0}")]
    Message(String),
}

/// Storage collaborator consumed by the ingestion worker and the schedule registry.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Entries of `owner_id` whose guid is in `guids`, regardless of subscription.
    async fn find_entries_by_owner_and_guids(
        &self,
        owner_id: Uuid,
        guids: &[String],
    ) -> Result<Vec<Entry>, PersistenceError>;

    /// Persist entries and return the ones actually stored. An entry whose
    /// `(owner_id, guid)` already exists is skipped.
    async fn save_entries(&self, entries: Vec<Entry>) -> Result<Vec<Entry>, PersistenceError>;

    async fn set_subscription_enabled(&self, id: Uuid, enabled: bool) -> Result<(), PersistenceError>;

    async fn list_enabled_subscriptions(&self) -> Result<Vec<Subscription>, PersistenceError>;

    async fn get_subscription(&self, id: Uuid) -> Result<Option<Subscription>, PersistenceError>;

    /// Entries of an owner, newest publish time first (undated entries last).
    async fn list_entries(
        &self,
        owner_id: Uuid,
        subscription_id: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<Entry>, PersistenceError>;
}
