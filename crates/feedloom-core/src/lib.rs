//! Core domain model for feedloom: subscriptions, entries, cron labels and the read-side filter engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod cron;
pub mod filter;

pub use cron::{cron_labels, resolve_cron_label, CRON_LABELS};
pub use filter::{apply, apply_at, parse_byte_size, FieldRules, Filter, FilterOut, FilterPatternError};

pub const CRATE_NAME: &str = "feedloom-core";

/// A polled external source. Owned by the storage layer; the core only reads it
/// and flips `enabled`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub url: String,
    /// Human-readable schedule label, resolved through [`resolve_cron_label`].
    pub cron: String,
    pub enabled: bool,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub proxy: Option<String>,
    #[serde(default)]
    pub max_retry: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enclosure {
    pub url: String,
    pub mime_type: Option<String>,
    pub length: Option<u64>,
}

/// Normalized source item, ready to be stamped with ownership and persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct EntryDraft {
    pub guid: String,
    pub link: Option<String>,
    pub title: Option<String>,
    pub body: Option<String>,
    pub snippet: Option<String>,
    pub summary: Option<String>,
    pub author: Option<String>,
    pub categories: Vec<String>,
    pub enclosure: Option<Enclosure>,
    pub published_at: Option<DateTime<Utc>>,
}

/// Persisted entry. `guid` is unique per owner, across all of the owner's subscriptions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub subscription_id: Uuid,
    pub guid: String,
    pub link: Option<String>,
    pub title: Option<String>,
    pub body: Option<String>,
    pub snippet: Option<String>,
    pub summary: Option<String>,
    pub author: Option<String>,
    pub categories: Vec<String>,
    pub enclosure: Option<Enclosure>,
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Entry {
    pub fn from_draft(draft: EntryDraft, subscription: &Subscription, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id: subscription.owner_id,
            subscription_id: subscription.id,
            guid: draft.guid,
            link: draft.link,
            title: draft.title,
            body: draft.body,
            snippet: draft.snippet,
            summary: draft.summary,
            author: draft.author,
            categories: draft.categories,
            enclosure: draft.enclosure,
            published_at: draft.published_at,
            created_at,
        }
    }
}
