//! PostgreSQL-backed store.

use async_trait::async_trait;
use feedloom_core::{Enclosure, Entry, Subscription};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use uuid::Uuid;

use crate::{PersistenceError, Storage};

const ENTRY_COLUMNS: &str = "id, owner_id, subscription_id, guid, link, title, body, snippet, summary, author, \
     categories, enclosure_url, enclosure_type, enclosure_length, published_at, created_at";

const SUBSCRIPTION_COLUMNS: &str = "id, owner_id, url, cron, enabled, title, proxy, max_retry";

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, PersistenceError> {
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    pub async fn migrate(&self) -> Result<(), PersistenceError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|err| PersistenceError::Message(format!("running migrations: {err}")))
    }

    pub async fn upsert_subscription(&self, subscription: &Subscription) -> Result<(), PersistenceError> {
        sqlx::query(
            r#"
            INSERT INTO subscriptions (id, owner_id, url, cron, enabled, title, proxy, max_retry)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO UPDATE
               SET url = EXCLUDED.url,
                   cron = EXCLUDED.cron,
                   enabled = EXCLUDED.enabled,
                   title = EXCLUDED.title,
                   proxy = EXCLUDED.proxy,
                   max_retry = EXCLUDED.max_retry
            "#,
        )
        .bind(subscription.id)
        .bind(subscription.owner_id)
        .bind(&subscription.url)
        .bind(&subscription.cron)
        .bind(subscription.enabled)
        .bind(&subscription.title)
        .bind(&subscription.proxy)
        .bind(i32::try_from(subscription.max_retry).unwrap_or(i32::MAX))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn subscription_from_row(row: &PgRow) -> Result<Subscription, sqlx::Error> {
    let max_retry: i32 = row.try_get("max_retry")?;
    Ok(Subscription {
        id: row.try_get("id")?,
        owner_id: row.try_get("owner_id")?,
        url: row.try_get("url")?,
        cron: row.try_get("cron")?,
        enabled: row.try_get("enabled")?,
        title: row.try_get("title")?,
        proxy: row.try_get("proxy")?,
        max_retry: u32::try_from(max_retry).unwrap_or(0),
    })
}

fn entry_from_row(row: &PgRow) -> Result<Entry, sqlx::Error> {
    let enclosure_url: Option<String> = row.try_get("enclosure_url")?;
    let enclosure_length: Option<i64> = row.try_get("enclosure_length")?;
    let enclosure = match enclosure_url {
        Some(url) => Some(Enclosure {
            url,
            mime_type: row.try_get("enclosure_type")?,
            length: enclosure_length.and_then(|l| u64::try_from(l).ok()),
        }),
        None => None,
    };
    Ok(Entry {
        id: row.try_get("id")?,
        owner_id: row.try_get("owner_id")?,
        subscription_id: row.try_get("subscription_id")?,
        guid: row.try_get("guid")?,
        link: row.try_get("link")?,
        title: row.try_get("title")?,
        body: row.try_get("body")?,
        snippet: row.try_get("snippet")?,
        summary: row.try_get("summary")?,
        author: row.try_get("author")?,
        categories: row.try_get("categories")?,
        enclosure,
        published_at: row.try_get("published_at")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl Storage for PgStore {
    async fn find_entries_by_owner_and_guids(
        &self,
        owner_id: Uuid,
        guids: &[String],
    ) -> Result<Vec<Entry>, PersistenceError> {
        if guids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS} FROM entries WHERE owner_id = $1 AND guid = ANY($2)"
        ))
        .bind(owner_id)
        .bind(guids.to_vec())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(entry_from_row).collect::<Result<_, _>>()?)
    }

    async fn save_entries(&self, entries: Vec<Entry>) -> Result<Vec<Entry>, PersistenceError> {
        let mut tx = self.pool.begin().await?;
        let mut saved = Vec::with_capacity(entries.len());
        for entry in entries {
            let (enclosure_url, enclosure_type, enclosure_length) = match &entry.enclosure {
                Some(e) => (
                    Some(e.url.clone()),
                    e.mime_type.clone(),
                    e.length.map(|l| i64::try_from(l).unwrap_or(i64::MAX)),
                ),
                None => (None, None, None),
            };
            let inserted = sqlx::query(
                r#"
                INSERT INTO entries (
                    id, owner_id, subscription_id, guid, link, title, body, snippet, summary, author,
                    categories, enclosure_url, enclosure_type, enclosure_length, published_at, created_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
                ON CONFLICT (owner_id, guid) DO NOTHING
                RETURNING id
                "#,
            )
            .bind(entry.id)
            .bind(entry.owner_id)
            .bind(entry.subscription_id)
            .bind(&entry.guid)
            .bind(&entry.link)
            .bind(&entry.title)
            .bind(&entry.body)
            .bind(&entry.snippet)
            .bind(&entry.summary)
            .bind(&entry.author)
            .bind(&entry.categories)
            .bind(enclosure_url)
            .bind(enclosure_type)
            .bind(enclosure_length)
            .bind(entry.published_at)
            .bind(entry.created_at)
            .fetch_optional(&mut *tx)
            .await?;
            if inserted.is_some() {
                saved.push(entry);
            }
        }
        tx.commit().await?;
        Ok(saved)
    }

    async fn set_subscription_enabled(&self, id: Uuid, enabled: bool) -> Result<(), PersistenceError> {
        let result = sqlx::query("UPDATE subscriptions SET enabled = $2 WHERE id = $1")
            .bind(id)
            .bind(enabled)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(PersistenceError::NotFound(id));
        }
        Ok(())
    }

    async fn list_enabled_subscriptions(&self) -> Result<Vec<Subscription>, PersistenceError> {
        let rows = sqlx::query(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE enabled ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(subscription_from_row).collect::<Result<_, _>>()?)
    }

    async fn get_subscription(&self, id: Uuid) -> Result<Option<Subscription>, PersistenceError> {
        let row = sqlx::query(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(subscription_from_row).transpose()?)
    }

    async fn list_entries(
        &self,
        owner_id: Uuid,
        subscription_id: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<Entry>, PersistenceError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {ENTRY_COLUMNS}
              FROM entries
             WHERE owner_id = $1
               AND ($2::uuid IS NULL OR subscription_id = $2)
             ORDER BY published_at DESC NULLS LAST, created_at DESC
             LIMIT $3
            "#
        ))
        .bind(owner_id)
        .bind(subscription_id)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(entry_from_row).collect::<Result<_, _>>()?)
    }
}
