//! End-to-end tests of the shared context store facade.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;

use agent_hub_context::{InMemoryBackend, InMemoryCache, SharedContextStore, SqliteBackend};
use agent_hub_core::config::AgentDirectory;
use agent_hub_core::{
    AccessLevel, ChangeOperation, ConflictStrategy, ContextFilter, ContextScope, DataType,
};

fn store() -> Arc<SharedContextStore> {
    Arc::new(SharedContextStore::new(
        Arc::new(InMemoryBackend::new()),
        Arc::new(InMemoryCache::new()),
        AgentDirectory::default(),
    ))
}

async fn set_simple(
    store: &SharedContextStore,
    key: &str,
    value: serde_json::Value,
    scope: ContextScope,
    access_level: AccessLevel,
    owner: &str,
) -> bool {
    store
        .set(
            key,
            value,
            scope,
            DataType::State,
            access_level,
            owner,
            None,
            ConflictStrategy::LastWriterWins,
        )
        .await
        .unwrap()
}

#[tokio::test]
async fn test_private_entry_visible_to_owner_only() {
    // Scenario A.
    let store = store();
    assert!(
        set_simple(
            &store,
            "risk_limit",
            json!(100),
            ContextScope::User,
            AccessLevel::Private,
            "owner1"
        )
        .await
    );

    let own = store
        .get("risk_limit", ContextScope::User, "owner1")
        .await
        .unwrap();
    assert_eq!(own, Some(json!(100)));

    let other = store
        .get("risk_limit", ContextScope::User, "other")
        .await
        .unwrap();
    assert_eq!(other, None);

    // Denial also holds for the full-entry read.
    assert!(store
        .get_entry("risk_limit", ContextScope::User, "other")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_agent_priority_lower_rank_wins() {
    // Scenario B: product_architect is rank 5, intent_router rank 2.
    let store = store();

    let b_first = store
        .set(
            "config",
            json!("from_b"),
            ContextScope::Global,
            DataType::State,
            AccessLevel::Protected,
            "product_architect",
            None,
            ConflictStrategy::AgentPriority,
        )
        .await
        .unwrap();
    assert!(b_first, "first write always succeeds");

    let a_second = store
        .set(
            "config",
            json!("from_a"),
            ContextScope::Global,
            DataType::State,
            AccessLevel::Protected,
            "intent_router",
            None,
            ConflictStrategy::AgentPriority,
        )
        .await
        .unwrap();
    assert!(a_second, "lower rank overwrites");

    let value = store
        .get("config", ContextScope::Global, "intent_router")
        .await
        .unwrap();
    assert_eq!(value, Some(json!("from_a")));
}

#[tokio::test]
async fn test_higher_rank_writer_rejected() {
    let store = store();
    assert!(
        set_simple(
            &store,
            "config",
            json!("router"),
            ContextScope::Global,
            AccessLevel::Public,
            "intent_router"
        )
        .await
    );

    let rejected = store
        .set(
            "config",
            json!("researcher"),
            ContextScope::Global,
            DataType::State,
            AccessLevel::Public,
            "research_agent",
            None,
            ConflictStrategy::AgentPriority,
        )
        .await
        .unwrap();
    assert!(!rejected);

    let value = store
        .get("config", ContextScope::Global, "research_agent")
        .await
        .unwrap();
    assert_eq!(value, Some(json!("router")));
}

#[tokio::test]
async fn test_ttl_expiry_without_sweep() {
    // Scenario C. The sweep is never started: reads must enforce expiry
    // on their own.
    let store = store();
    store
        .set(
            "flag",
            json!("present"),
            ContextScope::Session,
            DataType::State,
            AccessLevel::Public,
            "agent",
            Some(Duration::from_millis(150)),
            ConflictStrategy::LastWriterWins,
        )
        .await
        .unwrap();

    let before = store.get("flag", ContextScope::Session, "agent").await.unwrap();
    assert_eq!(before, Some(json!("present")));

    tokio::time::sleep(Duration::from_millis(200)).await;

    let after = store.get("flag", ContextScope::Session, "agent").await.unwrap();
    assert_eq!(after, None);
    assert!(store
        .get_entry("flag", ContextScope::Session, "agent")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_query_returns_owned_non_expired_entries() {
    // Scenario D.
    let store = store();
    set_simple(&store, "pref_a", json!(1), ContextScope::User, AccessLevel::Private, "x").await;
    set_simple(&store, "pref_b", json!(2), ContextScope::User, AccessLevel::Private, "x").await;
    set_simple(&store, "pref_c", json!(3), ContextScope::User, AccessLevel::Private, "y").await;
    set_simple(&store, "other", json!(4), ContextScope::Global, AccessLevel::Public, "x").await;

    store
        .set(
            "stale",
            json!(5),
            ContextScope::User,
            DataType::State,
            AccessLevel::Private,
            "x",
            Some(Duration::from_millis(10)),
            ConflictStrategy::LastWriterWins,
        )
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let filter = ContextFilter {
        scope: Some(ContextScope::User),
        owner_agent: Some("x".into()),
        ..Default::default()
    };
    let results = store.query(&filter, "x").await.unwrap();
    let mut keys: Vec<_> = results.iter().map(|e| e.key.as_str()).collect();
    keys.sort();
    assert_eq!(keys, vec!["pref_a", "pref_b"]);
}

#[tokio::test]
async fn test_query_results_access_checked_per_entry() {
    let store = store();
    set_simple(&store, "mine", json!(1), ContextScope::User, AccessLevel::Private, "x").await;
    set_simple(&store, "theirs", json!(2), ContextScope::User, AccessLevel::Private, "y").await;
    set_simple(&store, "shared", json!(3), ContextScope::User, AccessLevel::Public, "y").await;

    let filter = ContextFilter {
        scope: Some(ContextScope::User),
        ..Default::default()
    };
    let results = store.query(&filter, "x").await.unwrap();
    let mut keys: Vec<_> = results.iter().map(|e| e.key.as_str()).collect();
    keys.sort();
    assert_eq!(keys, vec!["mine", "shared"]);
}

#[tokio::test]
async fn test_delete_idempotent() {
    let store = store();
    assert!(!store.delete("ghost", ContextScope::Global, "a").await.unwrap());
    assert!(!store.delete("ghost", ContextScope::Global, "a").await.unwrap());

    set_simple(&store, "real", json!(1), ContextScope::Global, AccessLevel::Public, "a").await;
    assert!(store.delete("real", ContextScope::Global, "a").await.unwrap());
    assert!(!store.delete("real", ContextScope::Global, "a").await.unwrap());
}

#[tokio::test]
async fn test_delete_requires_write_permission() {
    let store = store();
    set_simple(&store, "secret", json!(1), ContextScope::User, AccessLevel::Private, "owner1").await;

    assert!(!store.delete("secret", ContextScope::User, "other").await.unwrap());
    assert_eq!(
        store.get("secret", ContextScope::User, "owner1").await.unwrap(),
        Some(json!(1))
    );
    assert!(store.delete("secret", ContextScope::User, "owner1").await.unwrap());
}

#[tokio::test]
async fn test_round_trip_and_version_counting() {
    let store = store();
    for i in 1..=5u64 {
        assert!(
            set_simple(
                &store,
                "counter",
                json!(i),
                ContextScope::Workflow,
                AccessLevel::Public,
                "planner"
            )
            .await
        );
        let entry = store
            .get_entry("counter", ContextScope::Workflow, "planner")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.version, i);
        assert_eq!(entry.value, json!(i));
        assert_eq!(entry.scope, ContextScope::Workflow);
        assert_eq!(entry.data_type, DataType::State);
        assert_eq!(entry.access_level, AccessLevel::Public);
    }
}

#[tokio::test]
async fn test_access_log_only_grows() {
    let store = store();
    set_simple(&store, "tracked", json!(1), ContextScope::User, AccessLevel::Public, "a").await;

    let mut last_len = 0;
    for _ in 0..3 {
        let entry = store
            .get_entry("tracked", ContextScope::User, "b")
            .await
            .unwrap()
            .unwrap();
        assert!(entry.access_log.len() > last_len);
        last_len = entry.access_log.len();
    }

    set_simple(&store, "tracked", json!(2), ContextScope::User, AccessLevel::Public, "a").await;
    let entry = store
        .get_entry("tracked", ContextScope::User, "a")
        .await
        .unwrap()
        .unwrap();
    assert!(entry.access_log.len() > last_len);
}

#[tokio::test]
async fn test_version_based_optimistic_concurrency() {
    let store = store();
    set_simple(&store, "doc", json!("v1"), ContextScope::Global, AccessLevel::Public, "a").await;

    // Correct expectation succeeds.
    let ok = store
        .set(
            "doc",
            json!("v2"),
            ContextScope::Global,
            DataType::State,
            AccessLevel::Public,
            "b",
            None,
            ConflictStrategy::VersionBased { expected: 1 },
        )
        .await
        .unwrap();
    assert!(ok);

    // Replaying the same expectation is now stale.
    let stale = store
        .set(
            "doc",
            json!("v2-again"),
            ContextScope::Global,
            DataType::State,
            AccessLevel::Public,
            "b",
            None,
            ConflictStrategy::VersionBased { expected: 1 },
        )
        .await
        .unwrap();
    assert!(!stale);

    let entry = store
        .get_entry("doc", ContextScope::Global, "a")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.value, json!("v2"));
    assert_eq!(entry.version, 2);
}

#[tokio::test]
async fn test_restricted_security_data() {
    let store = store();
    let written = store
        .set(
            "threat_report",
            json!({"level": "high"}),
            ContextScope::Global,
            DataType::Security,
            AccessLevel::Restricted,
            "security_validator",
            None,
            ConflictStrategy::LastWriterWins,
        )
        .await
        .unwrap();
    assert!(written);

    assert_eq!(
        store
            .get("threat_report", ContextScope::Global, "security_validator")
            .await
            .unwrap(),
        Some(json!({"level": "high"}))
    );
    // Nobody else, regardless of rank.
    assert_eq!(
        store
            .get("threat_report", ContextScope::Global, "intent_router")
            .await
            .unwrap(),
        None
    );
}

#[tokio::test]
async fn test_merge_strategy_end_to_end() {
    let store = store();
    set_simple(
        &store,
        "prefs",
        json!({"theme": "dark", "lang": "en"}),
        ContextScope::User,
        AccessLevel::Public,
        "a",
    )
    .await;

    store
        .set(
            "prefs",
            json!({"lang": "de", "tz": "UTC"}),
            ContextScope::User,
            DataType::State,
            AccessLevel::Public,
            "b",
            None,
            ConflictStrategy::Merge,
        )
        .await
        .unwrap();

    assert_eq!(
        store.get("prefs", ContextScope::User, "a").await.unwrap(),
        Some(json!({"theme": "dark", "lang": "de", "tz": "UTC"}))
    );
}

#[tokio::test]
async fn test_same_key_writes_are_linearized() {
    let store = store();
    let mut handles = Vec::new();
    for i in 0..20 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            set_simple(
                &store,
                "hot",
                json!(i),
                ContextScope::Global,
                AccessLevel::Public,
                "agent",
            )
            .await
        }));
    }
    for handle in handles {
        assert!(handle.await.unwrap());
    }

    // Every accepted write bumped the version exactly once.
    let entry = store
        .get_entry("hot", ContextScope::Global, "agent")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.version, 20);
}

#[tokio::test]
async fn test_subscriptions_receive_lifecycle_events() {
    let store = store();
    let events: Arc<Mutex<Vec<(ChangeOperation, String, u64)>>> = Arc::new(Mutex::new(Vec::new()));

    let sink = events.clone();
    store.subscribe(
        "task_*",
        ContextScope::Workflow,
        "observer",
        Arc::new(move |event| {
            sink.lock()
                .unwrap()
                .push((event.operation, event.key.clone(), event.version));
        }),
    );

    set_simple(&store, "task_1", json!("a"), ContextScope::Workflow, AccessLevel::Public, "p").await;
    set_simple(&store, "task_1", json!("b"), ContextScope::Workflow, AccessLevel::Public, "p").await;
    // Different scope: not delivered.
    set_simple(&store, "task_1", json!("c"), ContextScope::Global, AccessLevel::Public, "p").await;
    store.delete("task_1", ContextScope::Workflow, "p").await.unwrap();

    let seen = events.lock().unwrap();
    assert_eq!(
        *seen,
        vec![
            (ChangeOperation::Created, "task_1".to_string(), 1),
            (ChangeOperation::Updated, "task_1".to_string(), 2),
            (ChangeOperation::Deleted, "task_1".to_string(), 2),
        ]
    );
}

#[tokio::test]
async fn test_unsubscribe_stops_delivery() {
    let store = store();
    let hits = Arc::new(AtomicUsize::new(0));

    let counter = hits.clone();
    let handle = store.subscribe(
        "*",
        ContextScope::Global,
        "observer",
        Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }),
    );

    set_simple(&store, "k", json!(1), ContextScope::Global, AccessLevel::Public, "a").await;
    assert!(store.unsubscribe(handle));
    set_simple(&store, "k", json!(2), ContextScope::Global, AccessLevel::Public, "a").await;

    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_transaction_commit_applies_in_order() {
    let store = store();
    let mut tx = store.begin_transaction();
    tx.stage_set(
        "step_1",
        json!("a"),
        ContextScope::Workflow,
        DataType::State,
        AccessLevel::Public,
        "planner",
        None,
        ConflictStrategy::LastWriterWins,
    );
    tx.stage_set(
        "step_2",
        json!("b"),
        ContextScope::Workflow,
        DataType::State,
        AccessLevel::Public,
        "planner",
        None,
        ConflictStrategy::LastWriterWins,
    );
    tx.stage_delete("step_1", ContextScope::Workflow, "planner");

    let report = tx.commit().await;
    assert!(report.committed);
    assert_eq!(report.applied, 3);
    assert_eq!(report.failed_at, None);

    assert_eq!(store.get("step_1", ContextScope::Workflow, "planner").await.unwrap(), None);
    assert_eq!(
        store.get("step_2", ContextScope::Workflow, "planner").await.unwrap(),
        Some(json!("b"))
    );

    // A second commit is a no-op.
    let again = tx.commit().await;
    assert!(!again.committed);
    assert_eq!(again.applied, 0);
}

#[tokio::test]
async fn test_transaction_stops_at_denied_operation_without_undo() {
    let store = store();
    set_simple(&store, "locked", json!(1), ContextScope::User, AccessLevel::Private, "owner1").await;

    let mut tx = store.begin_transaction();
    tx.stage_set(
        "applied",
        json!("yes"),
        ContextScope::User,
        DataType::State,
        AccessLevel::Public,
        "intruder",
        None,
        ConflictStrategy::LastWriterWins,
    );
    // Denied: private entry owned by someone else.
    tx.stage_delete("locked", ContextScope::User, "intruder");
    tx.stage_set(
        "never",
        json!("no"),
        ContextScope::User,
        DataType::State,
        AccessLevel::Public,
        "intruder",
        None,
        ConflictStrategy::LastWriterWins,
    );

    let report = tx.commit().await;
    assert!(!report.committed);
    assert_eq!(report.applied, 1);
    assert_eq!(report.failed_at, Some(1));
    assert_eq!(report.error, None);

    // The first operation stays applied; the third never ran.
    assert_eq!(
        store.get("applied", ContextScope::User, "intruder").await.unwrap(),
        Some(json!("yes"))
    );
    assert_eq!(store.get("never", ContextScope::User, "intruder").await.unwrap(), None);
}

#[tokio::test]
async fn test_transaction_rollback_discards() {
    let store = store();
    let mut tx = store.begin_transaction();
    tx.stage_set(
        "ghost",
        json!(1),
        ContextScope::Global,
        DataType::State,
        AccessLevel::Public,
        "a",
        None,
        ConflictStrategy::LastWriterWins,
    );

    assert!(tx.rollback());
    assert!(!tx.rollback());

    let report = tx.commit().await;
    assert!(!report.committed);
    assert_eq!(store.get("ghost", ContextScope::Global, "a").await.unwrap(), None);
}

#[tokio::test]
async fn test_sqlite_backed_store_end_to_end() {
    let file = tempfile::NamedTempFile::new().unwrap();
    let store = Arc::new(SharedContextStore::new(
        Arc::new(SqliteBackend::new(file.path()).unwrap()),
        Arc::new(InMemoryCache::new()),
        AgentDirectory::default(),
    ));

    set_simple(&store, "persisted", json!({"v": 1}), ContextScope::User, AccessLevel::Private, "x").await;
    set_simple(&store, "persisted", json!({"v": 2}), ContextScope::User, AccessLevel::Private, "x").await;

    let entry = store
        .get_entry("persisted", ContextScope::User, "x")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.version, 2);
    assert_eq!(entry.value, json!({"v": 2}));
    assert_eq!(store.get("persisted", ContextScope::User, "y").await.unwrap(), None);

    let filter = ContextFilter {
        scope: Some(ContextScope::User),
        owner_agent: Some("x".into()),
        ..Default::default()
    };
    assert_eq!(store.query(&filter, "x").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_initialize_and_shutdown_bound_the_sweep() {
    let store = store();
    store.initialize();
    // Idempotent.
    store.initialize();

    set_simple(&store, "k", json!(1), ContextScope::Global, AccessLevel::Public, "a").await;
    assert_eq!(
        store.get("k", ContextScope::Global, "a").await.unwrap(),
        Some(json!(1))
    );

    store.shutdown().await;
    // The store still serves requests after shutdown; only the sweep stops.
    assert_eq!(
        store.get("k", ContextScope::Global, "a").await.unwrap(),
        Some(json!(1))
    );
}
