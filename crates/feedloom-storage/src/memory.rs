//! In-process store used when no database is configured, and by tests.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use feedloom_core::{Entry, Subscription};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{PersistenceError, Storage};

#[derive(Debug, Default)]
struct MemoryState {
    subscriptions: HashMap<Uuid, Subscription>,
    entries: Vec<Entry>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_subscriptions(subscriptions: impl IntoIterator<Item = Subscription>) -> Self {
        let subscriptions = subscriptions.into_iter().map(|s| (s.id, s)).collect();
        Self {
            state: RwLock::new(MemoryState {
                subscriptions,
                entries: Vec::new(),
            }),
        }
    }

    pub async fn upsert_subscription(&self, subscription: Subscription) {
        self.state
            .write()
            .await
            .subscriptions
            .insert(subscription.id, subscription);
    }

    pub async fn entries(&self) -> Vec<Entry> {
        self.state.read().await.entries.clone()
    }
}

#[async_trait]
impl Storage for MemoryStore {
    async fn find_entries_by_owner_and_guids(
        &self,
        owner_id: Uuid,
        guids: &[String],
    ) -> Result<Vec<Entry>, PersistenceError> {
        let wanted: HashSet<&str> = guids.iter().map(String::as_str).collect();
        let state = self.state.read().await;
        Ok(state
            .entries
            .iter()
            .filter(|e| e.owner_id == owner_id && wanted.contains(e.guid.as_str()))
            .cloned()
            .collect())
    }

    async fn save_entries(&self, entries: Vec<Entry>) -> Result<Vec<Entry>, PersistenceError> {
        let mut state = self.state.write().await;
        let mut taken: HashSet<(Uuid, String)> = state
            .entries
            .iter()
            .map(|e| (e.owner_id, e.guid.clone()))
            .collect();
        let mut saved = Vec::new();
        for entry in entries {
            if taken.insert((entry.owner_id, entry.guid.clone())) {
                state.entries.push(entry.clone());
                saved.push(entry);
            }
        }
        Ok(saved)
    }

    async fn set_subscription_enabled(&self, id: Uuid, enabled: bool) -> Result<(), PersistenceError> {
        let mut state = self.state.write().await;
        let subscription = state
            .subscriptions
            .get_mut(&id)
            .ok_or(PersistenceError::NotFound(id))?;
        subscription.enabled = enabled;
        Ok(())
    }

    async fn list_enabled_subscriptions(&self) -> Result<Vec<Subscription>, PersistenceError> {
        let state = self.state.read().await;
        let mut enabled = state
            .subscriptions
            .values()
            .filter(|s| s.enabled)
            .cloned()
            .collect::<Vec<_>>();
        enabled.sort_by_key(|s| s.id);
        Ok(enabled)
    }

    async fn get_subscription(&self, id: Uuid) -> Result<Option<Subscription>, PersistenceError> {
        Ok(self.state.read().await.subscriptions.get(&id).cloned())
    }

    async fn list_entries(
        &self,
        owner_id: Uuid,
        subscription_id: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<Entry>, PersistenceError> {
        let state = self.state.read().await;
        let mut entries = state
            .entries
            .iter()
            .filter(|e| e.owner_id == owner_id)
            .filter(|e| subscription_id.map_or(true, |id| e.subscription_id == id))
            .cloned()
            .collect::<Vec<_>>();
        // `None` sorts before `Some`, so reversing puts undated entries last.
        entries.sort_by(|a, b| {
            b.published_at
                .cmp(&a.published_at)
                .then(b.created_at.cmp(&a.created_at))
        });
        entries.truncate(limit);
        Ok(entries)
    }
}
