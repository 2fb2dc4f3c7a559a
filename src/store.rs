//! Tracking store: per-title polling state and per-user subscriptions (SQLite).

use crate::error::StoreError;
use crate::{GuildId, TitleId, UserId};
use chrono::{DateTime, Utc};
use sqlx::{Row as _, SqlitePool};

/// Polling state for one tracked title.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedState {
    /// Highest episode number already notified; 0 means never.
    pub last_notified_episode: u32,
    /// Last-known scheduled airing instant of the next unseen episode.
    pub next_airing_at: Option<DateTime<Utc>>,
}

/// A (guild, user) pair tracking a title.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscriber {
    pub guild_id: GuildId,
    pub user_id: UserId,
}

/// One entry of a user's tracking list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub title_id: TitleId,
    pub title: String,
}

/// Persistence surface the poller and dispatcher run against.
#[async_trait::async_trait]
pub trait TrackingStore: Send + Sync {
    /// Titles whose next known airing is unknown (NULL) or within `window`
    /// from now. Never returns duplicates; the title id is a primary key.
    async fn due_title_ids(&self, window: chrono::Duration) -> Result<Vec<TitleId>, StoreError>;

    /// Polling state for one title, or `None` if it was never tracked.
    async fn state(&self, title_id: TitleId) -> Result<Option<TrackedState>, StoreError>;

    /// Upsert polling state. `last_notified_episode` never decreases:
    /// the write keeps the maximum of the stored and the given value.
    async fn upsert_state(
        &self,
        title_id: TitleId,
        last_notified_episode: u32,
        next_airing_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError>;

    /// Everyone tracking a title, across all guilds.
    async fn subscribers(&self, title_id: TitleId) -> Result<Vec<Subscriber>, StoreError>;

    /// Create a subscription, idempotent per (guild, user, title), and
    /// make sure the title has a polling-state row so the scheduler picks
    /// it up on the next cycle.
    async fn add_subscription(
        &self,
        guild_id: &GuildId,
        user_id: &UserId,
        title_id: TitleId,
        title: &str,
    ) -> Result<(), StoreError>;

    /// Remove one user's subscription in one guild.
    async fn remove_subscription(
        &self,
        guild_id: &GuildId,
        user_id: &UserId,
        title_id: TitleId,
    ) -> Result<(), StoreError>;

    /// A user's tracked titles within one guild, newest first.
    async fn subscriptions_for(
        &self,
        guild_id: &GuildId,
        user_id: &UserId,
    ) -> Result<Vec<Subscription>, StoreError>;
}

/// SQLite-backed tracking store.
#[derive(Debug, Clone)]
pub struct SqliteTrackingStore {
    pool: SqlitePool,
}

impl SqliteTrackingStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Initialize the tracking tables.
    pub async fn initialize(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tracked_titles (
                title_id INTEGER PRIMARY KEY,
                last_notified_episode INTEGER NOT NULL DEFAULT 0,
                next_airing_at TEXT,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS subscriptions (
                guild_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                title_id INTEGER NOT NULL,
                title TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (guild_id, user_id, title_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl TrackingStore for SqliteTrackingStore {
    async fn due_title_ids(&self, window: chrono::Duration) -> Result<Vec<TitleId>, StoreError> {
        let cutoff = Utc::now() + window;
        let rows = sqlx::query(
            "SELECT title_id FROM tracked_titles WHERE next_airing_at IS NULL OR next_airing_at <= ?",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        let mut ids = Vec::with_capacity(rows.len());
        for row in rows {
            ids.push(row.try_get("title_id")?);
        }
        Ok(ids)
    }

    async fn state(&self, title_id: TitleId) -> Result<Option<TrackedState>, StoreError> {
        let row = sqlx::query(
            "SELECT last_notified_episode, next_airing_at FROM tracked_titles WHERE title_id = ?",
        )
        .bind(title_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let last_notified_episode: i64 = row.try_get("last_notified_episode")?;
        Ok(Some(TrackedState {
            last_notified_episode: last_notified_episode as u32,
            next_airing_at: row.try_get("next_airing_at")?,
        }))
    }

    async fn upsert_state(
        &self,
        title_id: TitleId,
        last_notified_episode: u32,
        next_airing_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO tracked_titles (title_id, last_notified_episode, next_airing_at, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(title_id) DO UPDATE SET
                last_notified_episode = MAX(last_notified_episode, excluded.last_notified_episode),
                next_airing_at = excluded.next_airing_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(title_id)
        .bind(last_notified_episode as i64)
        .bind(next_airing_at)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn subscribers(&self, title_id: TitleId) -> Result<Vec<Subscriber>, StoreError> {
        let rows = sqlx::query("SELECT guild_id, user_id FROM subscriptions WHERE title_id = ?")
            .bind(title_id)
            .fetch_all(&self.pool)
            .await?;

        let mut subscribers = Vec::with_capacity(rows.len());
        for row in rows {
            subscribers.push(Subscriber {
                guild_id: row.try_get("guild_id")?,
                user_id: row.try_get("user_id")?,
            });
        }
        Ok(subscribers)
    }

    async fn add_subscription(
        &self,
        guild_id: &GuildId,
        user_id: &UserId,
        title_id: TitleId,
        title: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO subscriptions (guild_id, user_id, title_id, title, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(guild_id, user_id, title_id) DO UPDATE SET title = excluded.title
            "#,
        )
        .bind(guild_id)
        .bind(user_id)
        .bind(title_id)
        .bind(title)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        // Seed the polling state so the next cycle sees this title. An
        // existing row keeps its episode counter.
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO tracked_titles (title_id, last_notified_episode, next_airing_at, updated_at)
            VALUES (?, 0, NULL, ?)
            "#,
        )
        .bind(title_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn remove_subscription(
        &self,
        guild_id: &GuildId,
        user_id: &UserId,
        title_id: TitleId,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "DELETE FROM subscriptions WHERE guild_id = ? AND user_id = ? AND title_id = ?",
        )
        .bind(guild_id)
        .bind(user_id)
        .bind(title_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn subscriptions_for(
        &self,
        guild_id: &GuildId,
        user_id: &UserId,
    ) -> Result<Vec<Subscription>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT title_id, title FROM subscriptions
            WHERE guild_id = ? AND user_id = ?
            ORDER BY created_at DESC
            "#,
        )
        .bind(guild_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let mut subscriptions = Vec::with_capacity(rows.len());
        for row in rows {
            subscriptions.push(Subscription {
                title_id: row.try_get("title_id")?,
                title: row.try_get("title")?,
            });
        }
        Ok(subscriptions)
    }
}
