//! The history store abstraction

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::types::{HistoryEntry, HistoryStats, Role, UserInfo};
use crate::Result;

/// Bounded per-user conversation history
///
/// Every implementation keeps at most [`HistoryStore::max_messages`] messages
/// per user; appending beyond the window evicts the oldest entries in the
/// same step, so readers never observe an over-full history.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Register a user or refresh their display name and last-seen time.
    ///
    /// A missing or blank name never overwrites a previously stored one.
    async fn upsert_user(&self, user_id: i64, display_name: Option<&str>) -> Result<()>;

    /// Append one message and trim the user's history to the window.
    ///
    /// Unknown users are registered on the fly.
    async fn append_message(&self, user_id: i64, role: Role, content: &str) -> Result<()>;

    /// The retained window, oldest first
    async fn get_history(&self, user_id: i64) -> Result<Vec<HistoryEntry>>;

    /// Drop all stored messages for the user; the user stays registered.
    ///
    /// Returns the number of messages removed.
    async fn clear_history(&self, user_id: i64) -> Result<u64>;

    /// Number of messages currently stored for the user
    async fn get_message_count(&self, user_id: i64) -> Result<u64>;

    /// Registration record of the user, `None` when unknown
    async fn get_user(&self, user_id: i64) -> Result<Option<UserInfo>>;

    /// All registered user ids, ascending
    async fn list_user_ids(&self) -> Result<Vec<i64>>;

    /// Aggregate counters with "today" evaluated against `now`
    async fn get_stats_at(&self, now: DateTime<Utc>) -> Result<HistoryStats>;

    /// Aggregate counters as of the current instant
    async fn get_stats(&self) -> Result<HistoryStats> {
        self.get_stats_at(Utc::now()).await
    }

    /// Release the underlying resources. Calling it twice is a no-op.
    async fn close(&self);

    /// Size of the per-user window
    fn max_messages(&self) -> usize;
}
