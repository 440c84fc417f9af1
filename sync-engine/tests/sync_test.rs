//! End-to-end sync tests against a mock HTTP transport: real providers,
//! real engine, real stores, fake services.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use lifelog::credentials::Credentials;
use lifelog::{GroupStore, TimelineStore};
use std::sync::Arc;
use std::time::Duration;
use sync_engine::providers::monzo::MonzoProvider;
use sync_engine::providers::oura::OuraProvider;
use sync_engine::providers::outline::OutlineProvider;
use sync_engine::{Provider, ProviderRegistry, RunStatus, SyncEngine};

struct Harness {
    engine: SyncEngine,
    groups: Arc<GroupStore>,
    store: Arc<TimelineStore>,
    _data_dir: tempfile::TempDir,
}

fn start_engine(providers: Vec<Arc<dyn Provider>>) -> Harness {
    let data_dir = tempfile::tempdir().unwrap();
    let key = BASE64.encode([0u8; 32]);
    let groups =
        Arc::new(GroupStore::new(data_dir.path().join("groups.db"), &key).unwrap());
    let store = Arc::new(TimelineStore::new(data_dir.path().join("timeline.db")).unwrap());
    let registry = Arc::new(ProviderRegistry::new(providers));

    let (engine, work_queue) = SyncEngine::new(registry, Arc::clone(&groups), Arc::clone(&store));
    engine.start(work_queue);

    Harness {
        engine,
        groups,
        store,
        _data_dir: data_dir,
    }
}

fn onboard(harness: &Harness, service: &str, instance_type: &str) -> i64 {
    let group_id = harness.groups.create("user1", service).unwrap();
    harness
        .groups
        .complete_onboarding(
            group_id,
            &format!("{}-account", service),
            &Credentials {
                access_token: "test-token".to_string(),
                refresh_token: None,
                expires_at: None,
            },
        )
        .unwrap();
    harness
        .store
        .create_integration(group_id, instance_type, &serde_json::json!({}))
        .unwrap()
}

async fn wait_until<F: Fn(&RunStatus) -> bool>(engine: &SyncEngine, integration_id: i64, pred: F) {
    for _ in 0..200 {
        if let Some(status) = engine.run_status(integration_id) {
            if pred(&status) {
                return;
            }
            assert_eq!(
                status.runs_failed, 0,
                "run failed: {:?}",
                status.last_error
            );
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("engine did not reach expected state");
}

const DAILY_ACTIVITY_BODY: &str = r#"{
    "data": [{
        "day": "2025-01-27",
        "score": 82,
        "contributors": {"stay_active": 80},
        "steps": 10432
    }],
    "next_token": null
}"#;

#[tokio::test]
async fn test_oura_daily_activity_end_to_end() {
    let mut server = mockito::Server::new_async().await;
    let _activity = server
        .mock("GET", "/v2/usercollection/daily_activity")
        .match_query(mockito::Matcher::Any)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(DAILY_ACTIVITY_BODY)
        .create_async()
        .await;

    let harness = start_engine(vec![Arc::new(OuraProvider::with_base_url(server.url()))]);
    let integration_id = onboard(&harness, "oura", "daily_activity");

    harness.engine.trigger(integration_id, None).await.unwrap();
    wait_until(&harness.engine, integration_id, |s| s.runs_completed == 1).await;

    // One event with the documented source id and encoding
    let source_id = format!("oura_activity_{}_2025-01-27", integration_id);
    let event_id = harness
        .store
        .find_event(integration_id, &source_id)
        .unwrap()
        .expect("activity event missing");
    let event = harness.store.get_event(event_id).unwrap().unwrap();
    assert_eq!(event.action, "had_activity_score");
    assert_eq!(event.service, "oura");
    assert_eq!(event.value, Some(82));
    assert_eq!(event.value_multiplier, Some(1));
    assert_eq!(event.value_unit.as_deref(), Some("percent"));
    assert!(event.target_id.is_some());

    // Child blocks: one contributor, one steps measurement
    let blocks = harness.store.list_blocks(event_id).unwrap();
    let stay_active = blocks.iter().find(|b| b.title == "Stay Active").unwrap();
    assert_eq!(stay_active.value, Some(80));
    let steps = blocks.iter().find(|b| b.title == "Steps").unwrap();
    assert_eq!(steps.value, Some(10432));

    assert_eq!(harness.store.count_events(integration_id).unwrap(), 1);

    // Re-running the sync over the same provider data is a no-op
    harness.engine.trigger(integration_id, None).await.unwrap();
    wait_until(&harness.engine, integration_id, |s| s.runs_completed == 2).await;
    assert_eq!(harness.store.count_events(integration_id).unwrap(), 1);
    assert_eq!(
        harness.engine.run_status(integration_id).unwrap().events_written,
        1
    );
}

#[tokio::test]
async fn test_outline_task_reconciliation_across_runs() {
    let mut server = mockito::Server::new_async().await;
    let _documents = server
        .mock("POST", "/api/documents.list")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{
                "data": [{
                    "id": "doc-1",
                    "title": "Launch checklist",
                    "text": "- [ ] Write tests\n- [ ] Ship it",
                    "updatedAt": "2025-01-27T10:00:00.000Z"
                }],
                "pagination": {"nextPath": null}
            }"#,
        )
        .create_async()
        .await;

    let harness = start_engine(vec![Arc::new(OutlineProvider::new())]);
    let group_id = harness.groups.create("user1", "outline").unwrap();
    harness
        .groups
        .complete_onboarding(
            group_id,
            "outline-user",
            &Credentials {
                access_token: "api-key".to_string(),
                refresh_token: None,
                expires_at: None,
            },
        )
        .unwrap();
    // Self-hosted base_url points the adapter at the mock server
    let integration_id = harness
        .store
        .create_integration(
            group_id,
            "documents",
            &serde_json::json!({"provider": {"base_url": server.url()}}),
        )
        .unwrap();

    harness.engine.trigger(integration_id, None).await.unwrap();
    wait_until(&harness.engine, integration_id, |s| s.runs_completed == 1).await;

    let source_id = format!("outline_document_{}_doc-1", integration_id);
    let event_id = harness
        .store
        .find_event(integration_id, &source_id)
        .unwrap()
        .expect("document event missing");

    let blocks = harness.store.list_blocks(event_id).unwrap();
    assert_eq!(blocks.len(), 2);
    let write_tests_id = blocks.iter().find(|b| b.title == "Write tests").unwrap().id;

    // The document loses a task before the second run
    server.reset_async().await;
    let _documents = server
        .mock("POST", "/api/documents.list")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{
                "data": [{
                    "id": "doc-1",
                    "title": "Launch checklist",
                    "text": "- [ ] Write tests",
                    "updatedAt": "2025-01-28T09:00:00.000Z"
                }],
                "pagination": {"nextPath": null}
            }"#,
        )
        .create_async()
        .await;

    harness.engine.trigger(integration_id, None).await.unwrap();
    wait_until(&harness.engine, integration_id, |s| s.runs_completed == 2).await;

    // Still one event; blocks reconciled, not duplicated
    assert_eq!(harness.store.count_events(integration_id).unwrap(), 1);
    let blocks = harness.store.list_blocks(event_id).unwrap();
    assert_eq!(blocks.len(), 2);

    let kept = blocks.iter().find(|b| b.title == "Write tests").unwrap();
    assert!(!kept.deleted);
    assert_eq!(kept.id, write_tests_id, "unchanged task must keep its row");

    let removed = blocks.iter().find(|b| b.title == "Ship it").unwrap();
    assert!(removed.deleted);
    assert_eq!(removed.metadata["removed"], true);
    assert!(removed.metadata["removed_at"].is_string());
}

#[tokio::test]
async fn test_monzo_instances_share_the_account_object() {
    let mut server = mockito::Server::new_async().await;
    let _accounts = server
        .mock("GET", "/accounts")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"accounts": [{"id": "acc_1", "description": "Current account"}]}"#)
        .create_async()
        .await;
    let _balance = server
        .mock("GET", "/balance")
        .match_query(mockito::Matcher::Any)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"balance": 123456, "currency": "GBP", "spend_today": 0}"#)
        .create_async()
        .await;
    let _transactions = server
        .mock("GET", "/transactions")
        .match_query(mockito::Matcher::Any)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"transactions": [{
                "id": "tx_1",
                "created": "2025-01-27T12:31:00.000Z",
                "description": "PRET A MANGER",
                "amount": -465,
                "currency": "GBP",
                "merchant": {"name": "Pret A Manger"}
            }]}"#,
        )
        .create_async()
        .await;

    let harness = start_engine(vec![Arc::new(MonzoProvider::with_base_url(server.url()))]);
    let group_id = harness.groups.create("user1", "monzo").unwrap();
    harness
        .groups
        .complete_onboarding(
            group_id,
            "user_0000",
            &Credentials {
                access_token: "test-token".to_string(),
                refresh_token: None,
                expires_at: None,
            },
        )
        .unwrap();
    let balance_id = harness
        .store
        .create_integration(group_id, "balance", &serde_json::json!({}))
        .unwrap();
    let transactions_id = harness
        .store
        .create_integration(group_id, "transactions", &serde_json::json!({}))
        .unwrap();

    // Both instances run concurrently against the same account entity
    harness.engine.trigger(balance_id, None).await.unwrap();
    harness.engine.trigger(transactions_id, None).await.unwrap();
    wait_until(&harness.engine, balance_id, |s| s.runs_completed == 1).await;
    wait_until(&harness.engine, transactions_id, |s| s.runs_completed == 1).await;

    let balance_events = harness.store.list_events(balance_id).unwrap();
    assert_eq!(balance_events.len(), 1);
    assert_eq!(balance_events[0].action, "had_balance");
    assert_eq!(balance_events[0].value, Some(1234560));
    assert_eq!(balance_events[0].value_multiplier, Some(1000));

    let tx_events = harness.store.list_events(transactions_id).unwrap();
    assert_eq!(tx_events.len(), 1);
    assert_eq!(tx_events[0].action, "spent_money");

    // Upsert by natural key: both events reference the same actor row
    assert_eq!(balance_events[0].actor_id, tx_events[0].actor_id);
}
