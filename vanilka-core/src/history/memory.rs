//! In-process history store
//!
//! Keeps everything in memory behind a per-user lock. Used by tests and by
//! deployments that do not need history to survive a restart.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::store::HistoryStore;
use super::types::{
    from_millis, normalize_display_name, DayBoundary, HistoryEntry, HistoryStats, Role, UserInfo,
};
use crate::{Error, Result};

#[derive(Debug, Clone)]
struct StoredMessage {
    role: Role,
    content: String,
    created_at: i64,
}

#[derive(Debug, Default)]
struct UserSlot {
    display_name: Option<String>,
    first_seen: i64,
    last_seen: i64,
    messages: VecDeque<StoredMessage>,
}

/// Volatile [`HistoryStore`] implementation
#[derive(Debug)]
pub struct MemoryHistoryStore {
    users: RwLock<HashMap<i64, Arc<Mutex<UserSlot>>>>,
    max_messages: usize,
    day_boundary: DayBoundary,
    closed: AtomicBool,
}

impl MemoryHistoryStore {
    pub fn new(max_messages: usize) -> Result<Self> {
        Self::with_day_boundary(max_messages, DayBoundary::Utc)
    }

    pub fn with_day_boundary(max_messages: usize, day_boundary: DayBoundary) -> Result<Self> {
        if max_messages == 0 {
            return Err(Error::Config(
                "history.max_messages must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            users: RwLock::new(HashMap::new()),
            max_messages,
            day_boundary,
            closed: AtomicBool::new(false),
        })
    }

    /// Record a message with an explicit creation time
    pub fn append_message_at(
        &self,
        user_id: i64,
        role: Role,
        content: &str,
        created_at: DateTime<Utc>,
    ) -> Result<()> {
        self.ensure_open()?;
        let slot = self.slot_or_insert(user_id, created_at.timestamp_millis());
        let mut slot = slot.lock();
        slot.messages.push_back(StoredMessage {
            role,
            content: content.to_string(),
            created_at: created_at.timestamp_millis(),
        });
        while slot.messages.len() > self.max_messages {
            slot.messages.pop_front();
        }
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Storage(sqlx::Error::PoolClosed));
        }
        Ok(())
    }

    fn slot(&self, user_id: i64) -> Option<Arc<Mutex<UserSlot>>> {
        self.users.read().get(&user_id).cloned()
    }

    fn slot_or_insert(&self, user_id: i64, now: i64) -> Arc<Mutex<UserSlot>> {
        if let Some(slot) = self.slot(user_id) {
            return slot;
        }
        self.users
            .write()
            .entry(user_id)
            .or_insert_with(|| {
                Arc::new(Mutex::new(UserSlot {
                    first_seen: now,
                    last_seen: now,
                    ..UserSlot::default()
                }))
            })
            .clone()
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn upsert_user(&self, user_id: i64, display_name: Option<&str>) -> Result<()> {
        self.ensure_open()?;
        let now = Utc::now().timestamp_millis();
        let slot = self.slot_or_insert(user_id, now);
        let mut slot = slot.lock();
        if let Some(name) = normalize_display_name(display_name) {
            slot.display_name = Some(name.to_string());
        }
        slot.last_seen = now;
        Ok(())
    }

    async fn append_message(&self, user_id: i64, role: Role, content: &str) -> Result<()> {
        self.append_message_at(user_id, role, content, Utc::now())
    }

    async fn get_history(&self, user_id: i64) -> Result<Vec<HistoryEntry>> {
        self.ensure_open()?;
        Ok(self
            .slot(user_id)
            .map(|slot| {
                slot.lock()
                    .messages
                    .iter()
                    .map(|m| HistoryEntry::new(m.role, m.content.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn clear_history(&self, user_id: i64) -> Result<u64> {
        self.ensure_open()?;
        Ok(self
            .slot(user_id)
            .map(|slot| {
                let mut slot = slot.lock();
                let removed = slot.messages.len() as u64;
                slot.messages.clear();
                removed
            })
            .unwrap_or(0))
    }

    async fn get_message_count(&self, user_id: i64) -> Result<u64> {
        self.ensure_open()?;
        Ok(self
            .slot(user_id)
            .map(|slot| slot.lock().messages.len() as u64)
            .unwrap_or(0))
    }

    async fn get_user(&self, user_id: i64) -> Result<Option<UserInfo>> {
        self.ensure_open()?;
        let Some(slot) = self.slot(user_id) else {
            return Ok(None);
        };
        let slot = slot.lock();
        Ok(Some(UserInfo {
            user_id,
            display_name: slot.display_name.clone(),
            first_seen: from_millis(slot.first_seen)?,
            last_seen: from_millis(slot.last_seen)?,
        }))
    }

    async fn list_user_ids(&self) -> Result<Vec<i64>> {
        self.ensure_open()?;
        let mut ids: Vec<i64> = self.users.read().keys().copied().collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn get_stats_at(&self, now: DateTime<Utc>) -> Result<HistoryStats> {
        self.ensure_open()?;
        let (start, end) = self.day_boundary.day_range(now);
        let (start, end) = (start.timestamp_millis(), end.timestamp_millis());

        let slots: Vec<Arc<Mutex<UserSlot>>> = self.users.read().values().cloned().collect();
        let mut stats = HistoryStats {
            total_users: slots.len() as u64,
            ..HistoryStats::default()
        };
        for slot in slots {
            let slot = slot.lock();
            stats.total_messages += slot.messages.len() as u64;
            stats.user_messages += slot
                .messages
                .iter()
                .filter(|m| m.role == Role::User)
                .count() as u64;
            if slot
                .messages
                .iter()
                .any(|m| m.created_at >= start && m.created_at < end)
            {
                stats.active_today += 1;
            }
        }
        Ok(stats)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    fn max_messages(&self) -> usize {
        self.max_messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[tokio::test]
    async fn test_window_is_bounded() {
        let store = MemoryHistoryStore::new(2).unwrap();
        for i in 0..5 {
            store
                .append_message(1, Role::User, &format!("m{}", i))
                .await
                .unwrap();
        }
        let history = store.get_history(1).await.unwrap();
        assert_eq!(
            history,
            vec![
                HistoryEntry::new(Role::User, "m3"),
                HistoryEntry::new(Role::User, "m4"),
            ]
        );
    }

    #[tokio::test]
    async fn test_append_registers_with_message_time() {
        let store = MemoryHistoryStore::new(10).unwrap();
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap();
        store.append_message_at(1, Role::User, "a", at).unwrap();
        store
            .append_message_at(1, Role::Assistant, "b", at + Duration::minutes(1))
            .unwrap();

        let user = store.get_user(1).await.unwrap().unwrap();
        assert_eq!(user.first_seen, at);
        assert_eq!(user.last_seen, at);
        assert_eq!(user.display_name, None);
        assert!(store.get_user(2).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_active_today_uses_day_range() {
        let store = MemoryHistoryStore::new(10).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        store
            .append_message_at(1, Role::User, "today", now)
            .unwrap();
        store
            .append_message_at(2, Role::User, "yesterday", now - Duration::days(1))
            .unwrap();

        let stats = store.get_stats_at(now).await.unwrap();
        assert_eq!(stats.total_users, 2);
        assert_eq!(stats.active_today, 1);
    }

    #[tokio::test]
    async fn test_upsert_name_handling() {
        let store = MemoryHistoryStore::new(3).unwrap();
        store.upsert_user(9, Some("boris")).await.unwrap();
        store.upsert_user(9, None).await.unwrap();
        let name = |info: Option<UserInfo>| info.and_then(|u| u.display_name);
        assert_eq!(name(store.get_user(9).await.unwrap()).as_deref(), Some("boris"));
        store.upsert_user(9, Some("Boris K")).await.unwrap();
        assert_eq!(name(store.get_user(9).await.unwrap()).as_deref(), Some("Boris K"));
    }

    #[tokio::test]
    async fn test_closed_store_rejects_operations() {
        let store = MemoryHistoryStore::new(3).unwrap();
        store.close().await;
        store.close().await;
        assert!(store.append_message(1, Role::User, "x").await.is_err());
        assert!(store.get_stats().await.unwrap_err().is_storage());
    }
}
