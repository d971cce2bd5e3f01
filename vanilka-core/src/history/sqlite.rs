//! SQLite implementation of [`HistoryStore`].
//!
//! Uses [`sqlx`] with the `sqlite` feature. The schema lives in the crate's
//! `migrations/` directory and is embedded at compile time through
//! `sqlx::migrate!`; pending migrations are applied by
//! [`SqliteHistoryStore::open`].
//!
//! Queries use the runtime-checked `sqlx::query` form so no `DATABASE_URL`
//! is needed while compiling.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use super::store::HistoryStore;
use super::types::{
    from_millis, normalize_display_name, DayBoundary, HistoryEntry, HistoryStats, Role, UserInfo,
};
use crate::{Error, Result};

/// Path that selects a private in-memory database
pub const IN_MEMORY_PATH: &str = ":memory:";

/// Settings for [`SqliteHistoryStore::open`]
#[derive(Debug, Clone)]
pub struct HistoryStoreOptions {
    /// Database file, or [`IN_MEMORY_PATH`]
    pub db_path: PathBuf,
    /// Per-user window size, must be at least 1
    pub max_messages: usize,
    /// Calendar used for the daily-active counter
    pub day_boundary: DayBoundary,
    /// How long a writer waits for the database lock
    pub busy_timeout: Duration,
    /// Upper bound on pooled connections
    pub max_connections: u32,
}

impl HistoryStoreOptions {
    pub fn new(db_path: impl Into<PathBuf>, max_messages: usize) -> Self {
        Self {
            db_path: db_path.into(),
            max_messages,
            day_boundary: DayBoundary::Utc,
            busy_timeout: Duration::from_secs(5),
            max_connections: 4,
        }
    }

    pub fn with_day_boundary(mut self, day_boundary: DayBoundary) -> Self {
        self.day_boundary = day_boundary;
        self
    }

    fn is_in_memory(&self) -> bool {
        self.db_path.as_os_str() == IN_MEMORY_PATH
    }
}

/// SQLite-backed history store sharing one connection pool
#[derive(Clone, Debug)]
pub struct SqliteHistoryStore {
    pool: SqlitePool,
    max_messages: usize,
    day_boundary: DayBoundary,
}

impl SqliteHistoryStore {
    /// Open (or create) the database and run pending migrations.
    pub async fn open(options: HistoryStoreOptions) -> Result<Self> {
        if options.max_messages == 0 {
            return Err(Error::Config(
                "history.max_messages must be at least 1".to_string(),
            ));
        }

        let (connect, max_connections) = if options.is_in_memory() {
            // Every connection to :memory: is a separate database
            (SqliteConnectOptions::from_str("sqlite::memory:")?, 1)
        } else {
            if let Some(parent) = options.db_path.parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent).await?;
                }
            }
            let connect = SqliteConnectOptions::new()
                .filename(&options.db_path)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal);
            (connect, options.max_connections.max(1))
        };

        let connect = connect
            .busy_timeout(options.busy_timeout)
            .foreign_keys(true);

        let mut pool_options = SqlitePoolOptions::new().max_connections(max_connections);
        if options.is_in_memory() {
            pool_options = pool_options.idle_timeout(None).max_lifetime(None);
        }
        let pool = pool_options.connect_with(connect).await?;

        // Path is resolved relative to CARGO_MANIFEST_DIR at compile time.
        sqlx::migrate!("./migrations").run(&pool).await?;

        info!(
            "History store opened at {} (window: {} messages, day boundary: {})",
            options.db_path.display(),
            options.max_messages,
            options.day_boundary
        );

        Ok(Self {
            pool,
            max_messages: options.max_messages,
            day_boundary: options.day_boundary,
        })
    }

    /// Whether [`HistoryStore::close`] has been called
    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }
}

fn to_count(value: i64) -> u64 {
    value.max(0) as u64
}

#[async_trait]
impl HistoryStore for SqliteHistoryStore {
    async fn upsert_user(&self, user_id: i64, display_name: Option<&str>) -> Result<()> {
        let now = Utc::now().timestamp_millis();
        sqlx::query(
            "INSERT INTO users (user_id, display_name, first_seen, last_seen) \
             VALUES (?1, ?2, ?3, ?3) \
             ON CONFLICT(user_id) DO UPDATE SET \
                 display_name = COALESCE(excluded.display_name, users.display_name), \
                 last_seen = excluded.last_seen",
        )
        .bind(user_id)
        .bind(normalize_display_name(display_name))
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn append_message(&self, user_id: i64, role: Role, content: &str) -> Result<()> {
        let now = Utc::now().timestamp_millis();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT OR IGNORE INTO users (user_id, display_name, first_seen, last_seen) \
             VALUES (?1, NULL, ?2, ?2)",
        )
        .bind(user_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO messages (user_id, role, content, created_at) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(user_id)
        .bind(role.as_str())
        .bind(content)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let trimmed = sqlx::query(
            "DELETE FROM messages WHERE user_id = ?1 AND id NOT IN ( \
                 SELECT id FROM messages WHERE user_id = ?1 ORDER BY id DESC LIMIT ?2 \
             )",
        )
        .bind(user_id)
        .bind(self.max_messages as i64)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;

        if trimmed > 0 {
            debug!("Trimmed {} old message(s) for user {}", trimmed, user_id);
        }
        Ok(())
    }

    async fn get_history(&self, user_id: i64) -> Result<Vec<HistoryEntry>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT role, content FROM messages WHERE user_id = ?1 ORDER BY id ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(role, content)| Ok(HistoryEntry::new(role.parse()?, content)))
            .collect()
    }

    async fn clear_history(&self, user_id: i64) -> Result<u64> {
        let removed = sqlx::query("DELETE FROM messages WHERE user_id = ?1")
            .bind(user_id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(removed)
    }

    async fn get_message_count(&self, user_id: i64) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE user_id = ?1")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(to_count(count))
    }

    async fn get_user(&self, user_id: i64) -> Result<Option<UserInfo>> {
        let row: Option<(Option<String>, i64, i64)> = sqlx::query_as(
            "SELECT display_name, first_seen, last_seen FROM users WHERE user_id = ?1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|(display_name, first_seen, last_seen)| -> Result<UserInfo> {
            Ok(UserInfo {
                user_id,
                display_name,
                first_seen: from_millis(first_seen)?,
                last_seen: from_millis(last_seen)?,
            })
        })
        .transpose()
    }

    async fn list_user_ids(&self) -> Result<Vec<i64>> {
        let ids: Vec<i64> = sqlx::query_scalar("SELECT user_id FROM users ORDER BY user_id ASC")
            .fetch_all(&self.pool)
            .await?;
        Ok(ids)
    }

    async fn get_stats_at(&self, now: DateTime<Utc>) -> Result<HistoryStats> {
        let (start, end) = self.day_boundary.day_range(now);
        let (total_users, total_messages, user_messages, active_today): (i64, i64, i64, i64) =
            sqlx::query_as(
                "SELECT \
                     (SELECT COUNT(*) FROM users), \
                     (SELECT COUNT(*) FROM messages), \
                     (SELECT COUNT(*) FROM messages WHERE role = 'user'), \
                     (SELECT COUNT(DISTINCT user_id) FROM messages \
                         WHERE created_at >= ?1 AND created_at < ?2)",
            )
            .bind(start.timestamp_millis())
            .bind(end.timestamp_millis())
            .fetch_one(&self.pool)
            .await?;

        Ok(HistoryStats {
            total_users: to_count(total_users),
            total_messages: to_count(total_messages),
            user_messages: to_count(user_messages),
            active_today: to_count(active_today),
        })
    }

    async fn close(&self) {
        if !self.pool.is_closed() {
            self.pool.close().await;
            info!("History store closed");
        }
    }

    fn max_messages(&self) -> usize {
        self.max_messages
    }
}
