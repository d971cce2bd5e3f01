use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use tempfile::TempDir;
use vanilka_core::history::{
    HistoryEntry, HistoryStats, HistoryStore, HistoryStoreOptions, MemoryHistoryStore, Role,
    SqliteHistoryStore,
};

async fn sqlite_store(dir: &TempDir, max_messages: usize) -> SqliteHistoryStore {
    SqliteHistoryStore::open(HistoryStoreOptions::new(
        dir.path().join("vanilka.db"),
        max_messages,
    ))
    .await
    .unwrap()
}

async fn check_window_bound(store: &dyn HistoryStore) {
    let max = store.max_messages() as u64;
    for i in 0..(max * 3) {
        let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
        store
            .append_message(11, role, &format!("turn {}", i))
            .await
            .unwrap();
        assert!(store.get_message_count(11).await.unwrap() <= max);
    }
    let history = store.get_history(11).await.unwrap();
    assert_eq!(history.len() as u64, max);
    assert_eq!(history.last().unwrap().content, format!("turn {}", max * 3 - 1));
}

async fn check_trim_scenario(store: &dyn HistoryStore) {
    store.append_message(42, Role::User, "a").await.unwrap();
    store.append_message(42, Role::Assistant, "b").await.unwrap();
    store.append_message(42, Role::User, "c").await.unwrap();
    store.append_message(42, Role::Assistant, "d").await.unwrap();

    assert_eq!(
        store.get_history(42).await.unwrap(),
        vec![
            HistoryEntry::new(Role::Assistant, "b"),
            HistoryEntry::new(Role::User, "c"),
            HistoryEntry::new(Role::Assistant, "d"),
        ]
    );
    assert_eq!(store.get_message_count(42).await.unwrap(), 3);
}

async fn check_clear_keeps_user(store: &dyn HistoryStore) {
    store.upsert_user(5, Some("vera")).await.unwrap();
    store.append_message(5, Role::User, "hello").await.unwrap();
    store.append_message(5, Role::Assistant, "hi").await.unwrap();

    assert_eq!(store.clear_history(5).await.unwrap(), 2);
    assert!(store.get_history(5).await.unwrap().is_empty());
    assert_eq!(store.get_message_count(5).await.unwrap(), 0);
    assert!(store.list_user_ids().await.unwrap().contains(&5));

    // Clearing an empty or unknown history is not an error
    assert_eq!(store.clear_history(5).await.unwrap(), 0);
    assert_eq!(store.clear_history(999).await.unwrap(), 0);
}

async fn check_unknown_user_reads(store: &dyn HistoryStore) {
    assert!(store.get_history(404).await.unwrap().is_empty());
    assert_eq!(store.get_message_count(404).await.unwrap(), 0);
}

async fn check_append_registers_user(store: &dyn HistoryStore) {
    store.append_message(77, Role::User, "first").await.unwrap();
    assert!(store.list_user_ids().await.unwrap().contains(&77));
}

async fn check_user_rename(store: &dyn HistoryStore) {
    store.upsert_user(21, Some("anna")).await.unwrap();
    store.upsert_user(21, Some("Anna K")).await.unwrap();
    let user = store.get_user(21).await.unwrap().unwrap();
    assert_eq!(user.display_name.as_deref(), Some("Anna K"));

    // Blank or missing names leave the stored one alone
    store.upsert_user(21, Some("   ")).await.unwrap();
    store.upsert_user(21, None).await.unwrap();
    let user = store.get_user(21).await.unwrap().unwrap();
    assert_eq!(user.display_name.as_deref(), Some("Anna K"));

    // Surrounding whitespace is not part of the name
    store.upsert_user(22, Some("  boris ")).await.unwrap();
    let user = store.get_user(22).await.unwrap().unwrap();
    assert_eq!(user.display_name.as_deref(), Some("boris"));
    assert!(store.get_user(404).await.unwrap().is_none());
}

async fn check_seen_timestamps(store: &dyn HistoryStore) {
    store.upsert_user(31, Some("vera")).await.unwrap();
    let first = store.get_user(31).await.unwrap().unwrap();
    assert_eq!(first.first_seen, first.last_seen);

    let mut previous = first.last_seen;
    for _ in 0..2 {
        tokio::time::sleep(Duration::from_millis(5)).await;
        store.upsert_user(31, None).await.unwrap();
        let user = store.get_user(31).await.unwrap().unwrap();
        assert_eq!(user.first_seen, first.first_seen);
        assert!(user.last_seen > previous);
        previous = user.last_seen;
    }

    // Appending does not re-register the user
    store.append_message(31, Role::User, "hi").await.unwrap();
    let user = store.get_user(31).await.unwrap().unwrap();
    assert_eq!(user.first_seen, first.first_seen);
}

async fn check_stats_scenario(store: &dyn HistoryStore) {
    let started = Utc::now();
    store.upsert_user(1, Some("one")).await.unwrap();
    store.upsert_user(2, Some("two")).await.unwrap();
    store.append_message(1, Role::User, "q1").await.unwrap();
    store.append_message(1, Role::Assistant, "a1").await.unwrap();
    store.append_message(1, Role::User, "q2").await.unwrap();
    store.append_message(1, Role::Assistant, "a2").await.unwrap();
    store.append_message(1, Role::User, "q3").await.unwrap();
    let now = Utc::now();

    let stats = store.get_stats_at(now).await.unwrap();
    // Appends straddling midnight UTC may fall on the previous day
    let active_today = if started.date_naive() == now.date_naive() {
        1
    } else {
        stats.active_today
    };
    assert_eq!(
        stats,
        HistoryStats {
            total_users: 2,
            total_messages: 5,
            user_messages: 3,
            active_today,
        }
    );

    // Far in the future nobody was active that day
    let later = Utc.with_ymd_and_hms(2999, 1, 1, 12, 0, 0).unwrap();
    assert_eq!(store.get_stats_at(later).await.unwrap().active_today, 0);
}

#[tokio::test]
async fn sqlite_window_bound() {
    let dir = TempDir::new().unwrap();
    let store = sqlite_store(&dir, 4).await;
    check_window_bound(&store).await;
    store.close().await;
}

#[tokio::test]
async fn memory_window_bound() {
    check_window_bound(&MemoryHistoryStore::new(4).unwrap()).await;
}

#[tokio::test]
async fn sqlite_trim_scenario() {
    let dir = TempDir::new().unwrap();
    let store = sqlite_store(&dir, 3).await;
    check_trim_scenario(&store).await;
    store.close().await;
}

#[tokio::test]
async fn memory_trim_scenario() {
    check_trim_scenario(&MemoryHistoryStore::new(3).unwrap()).await;
}

#[tokio::test]
async fn sqlite_clear_and_unknown_users() {
    let dir = TempDir::new().unwrap();
    let store = sqlite_store(&dir, 20).await;
    check_clear_keeps_user(&store).await;
    check_unknown_user_reads(&store).await;
    check_append_registers_user(&store).await;
    store.close().await;
}

#[tokio::test]
async fn memory_clear_and_unknown_users() {
    let store = MemoryHistoryStore::new(20).unwrap();
    check_clear_keeps_user(&store).await;
    check_unknown_user_reads(&store).await;
    check_append_registers_user(&store).await;
}

#[tokio::test]
async fn sqlite_user_records() {
    let dir = TempDir::new().unwrap();
    let store = sqlite_store(&dir, 10).await;
    check_user_rename(&store).await;
    check_seen_timestamps(&store).await;
    store.close().await;
}

#[tokio::test]
async fn memory_user_records() {
    let store = MemoryHistoryStore::new(10).unwrap();
    check_user_rename(&store).await;
    check_seen_timestamps(&store).await;
}

#[tokio::test]
async fn sqlite_stats_scenario() {
    let dir = TempDir::new().unwrap();
    let store = sqlite_store(&dir, 20).await;
    check_stats_scenario(&store).await;
    store.close().await;
}

#[tokio::test]
async fn memory_stats_scenario() {
    check_stats_scenario(&MemoryHistoryStore::new(20).unwrap()).await;
}

#[tokio::test]
async fn sqlite_survives_restart() {
    let dir = TempDir::new().unwrap();

    let store = sqlite_store(&dir, 10).await;
    store.upsert_user(3, Some("lena")).await.unwrap();
    store.append_message(3, Role::User, "remember me").await.unwrap();
    store
        .append_message(3, Role::Assistant, "of course")
        .await
        .unwrap();
    let before = store.get_history(3).await.unwrap();
    let user_before = store.get_user(3).await.unwrap();
    let stats_before = store.get_stats().await.unwrap();
    store.close().await;

    let reopened = sqlite_store(&dir, 10).await;
    assert_eq!(reopened.get_history(3).await.unwrap(), before);
    assert_eq!(reopened.get_user(3).await.unwrap(), user_before);
    assert_eq!(reopened.list_user_ids().await.unwrap(), vec![3]);
    assert_eq!(
        reopened.get_stats().await.unwrap().total_messages,
        stats_before.total_messages
    );
    reopened.close().await;
}

#[tokio::test]
async fn sqlite_smaller_window_after_restart_trims_on_next_append() {
    let dir = TempDir::new().unwrap();

    let store = sqlite_store(&dir, 10).await;
    for i in 0..6 {
        store
            .append_message(8, Role::User, &format!("{}", i))
            .await
            .unwrap();
    }
    store.close().await;

    let reopened = sqlite_store(&dir, 2).await;
    reopened.append_message(8, Role::User, "6").await.unwrap();
    let contents: Vec<String> = reopened
        .get_history(8)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.content)
        .collect();
    assert_eq!(contents, vec!["5".to_string(), "6".to_string()]);
    reopened.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn sqlite_concurrent_appends_stay_bounded() {
    let dir = TempDir::new().unwrap();
    let store: Arc<dyn HistoryStore> = Arc::new(sqlite_store(&dir, 5).await);

    let mut tasks = Vec::new();
    for user in 0..4i64 {
        for n in 0..10 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                store
                    .append_message(user, Role::User, &format!("{}-{}", user, n))
                    .await
            }));
        }
    }
    for result in futures::future::join_all(tasks).await {
        result.unwrap().unwrap();
    }

    for user in 0..4i64 {
        assert_eq!(store.get_message_count(user).await.unwrap(), 5);
    }
    let stats = store.get_stats().await.unwrap();
    assert_eq!(stats.total_users, 4);
    assert_eq!(stats.total_messages, 20);
    store.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn memory_concurrent_appends_keep_order() {
    let store = Arc::new(MemoryHistoryStore::new(50).unwrap());

    let mut tasks = Vec::new();
    for user in 0..3i64 {
        let store = store.clone();
        tasks.push(tokio::spawn(async move {
            for n in 0..20 {
                store
                    .append_message(user, Role::User, &n.to_string())
                    .await
                    .unwrap();
            }
        }));
    }
    futures::future::join_all(tasks).await;

    for user in 0..3i64 {
        let contents: Vec<String> = store
            .get_history(user)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.content)
            .collect();
        let expected: Vec<String> = (0..20).map(|n| n.to_string()).collect();
        assert_eq!(contents, expected);
    }
}

#[tokio::test]
async fn sqlite_operations_fail_after_close() {
    let dir = TempDir::new().unwrap();
    let store = sqlite_store(&dir, 5).await;
    store.close().await;
    let err = store
        .append_message(1, Role::User, "late")
        .await
        .unwrap_err();
    assert!(err.is_storage());
}
