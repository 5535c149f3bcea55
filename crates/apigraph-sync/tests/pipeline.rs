//! Full sync runs against a mock API and the in-memory graph.

use std::sync::Arc;

use apigraph_client::{ApiClient, ClientResult, QueryParams, RecordSource};
use apigraph_core::{ApiConfig, Credentials, Record, SyncConfig, SyncStage};
use apigraph_graph::{GraphStore, MemoryStore};
use async_trait::async_trait;
use apigraph_sync::SyncOrchestrator;
use chrono::NaiveDate;
use serde_json::{json, Value};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 3, 31).unwrap()
}

fn api_config(server: &MockServer) -> ApiConfig {
    ApiConfig {
        base_url: server.uri(),
        credentials: Credentials::ClientCredentials {
            client_id: "client".into(),
            client_secret: "secret".into(),
        },
        backoff_unit_ms: 1,
        ..ApiConfig::default()
    }
}

fn sync_config() -> SyncConfig {
    SyncConfig {
        batch_size: 10,
        period_start_year: 2025,
        period_end_year: 2025,
        ..SyncConfig::default()
    }
}

async fn mount_items(server: &MockServer, endpoint: &str, items: Value) {
    Mock::given(method("GET"))
        .and(path(endpoint))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "items": items })))
        .mount(server)
        .await;
}

async fn mount_token(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "token-1",
            "expires_in": 3600
        })))
        .mount(server)
        .await;
}

fn customers_with_owner() -> Value {
    json!([
        {"guid": "c-1", "name": "Acme", "owner": {"guid": "u-9"}},
        {"guid": "c-2", "name": "Globex", "owner": {"guid": "u-1"}, "businessUnit": {"guid": "bu-1"}}
    ])
}

/// Mount every endpoint except `/customers`.
async fn mount_api(server: &MockServer) {
    mount_token(server).await;
    mount_items(
        server,
        "/businessunits",
        json!([{"guid": "bu-1", "name": "Consulting", "isActive": true}]),
    )
    .await;
    mount_items(
        server,
        "/users",
        json!([
            {"guid": "u-1", "firstName": "Jane", "lastName": "Doe", "businessUnit": {"guid": "bu-1"}},
            {"guid": "u-2", "firstName": "John", "lastName": "Roe", "supervisor": {"guid": "u-1"}}
        ]),
    )
    .await;
    mount_items(
        server,
        "/projects",
        json!([{"guid": "p-1", "name": "Migration", "customer": {"guid": "c-1"}, "projectManager": {"guid": "u-1"}}]),
    )
    .await;

    Mock::given(method("GET"))
        .and(path("/workhours"))
        .and(query_param("startDate", "2024-03-31"))
        .and(query_param("endDate", "2025-03-31"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": [
            {"guid": "w-1", "eventDate": "2025-01-15", "quantity": 5, "isBillable": true, "unitCost": 40,
             "user": {"guid": "u-1"}, "project": {"guid": "p-1"}},
            {"eventDate": "2025-01-16", "quantity": 2}
        ]})))
        .mount(server)
        .await;

    mount_items(
        server,
        "/invoices",
        json!([{"guid": "i-1", "invoiceDate": "2025-01-31", "totalAmount": 750.0,
                "customer": {"guid": "c-1"}, "project": {"guid": "p-1"}}]),
    )
    .await;
}

async fn run(server: &MockServer, store: &Arc<MemoryStore>, config: SyncConfig) -> apigraph_sync::SyncOutcome {
    let client = ApiClient::new(api_config(server)).unwrap();
    SyncOrchestrator::new(client, store.clone(), config)
        .unwrap()
        .with_today(today())
        .run()
        .await
}

fn num(props: &serde_json::Map<String, Value>, name: &str) -> f64 {
    props[name].as_f64().unwrap_or_else(|| panic!("{name} is not a number"))
}

#[tokio::test]
async fn test_full_sync_builds_graph_and_metrics() {
    let server = MockServer::start().await;
    mount_api(&server).await;
    mount_items(&server, "/customers", customers_with_owner()).await;
    let store = Arc::new(MemoryStore::new());

    let outcome = run(&server, &store, sync_config()).await;

    assert!(outcome.success, "sync failed: {:?}", outcome.error);
    assert_eq!(outcome.stats.stages_completed, SyncStage::ALL.to_vec());
    assert!(outcome.stats.schema_statements > 0);
    assert!(store.is_closed());
    assert_eq!(store.close_calls(), 1);

    let stats = &outcome.stats;
    assert_eq!(stats.entity("BusinessUnit").synced, 1);
    assert_eq!(stats.entity("User").synced, 2);
    assert_eq!(stats.entity("Customer").synced, 2);
    assert_eq!(stats.entity("Project").synced, 1);
    assert_eq!(stats.entity("WorkHour").synced, 1);
    assert_eq!(stats.entity("WorkHour").failed, 1);
    assert_eq!(stats.entity("Invoice").synced, 1);

    // c-1 points at an owner that was never synced.
    let owner = stats.relationship("customer_owner");
    assert_eq!(owner.linked, 1);
    assert_eq!(owner.dangling, 1);
    assert!(store.node("User", "u-9").await.is_none());
    assert!(store.has_edge("OWNED_BY", ("Customer", "c-2"), ("User", "u-1")).await);
    assert!(store.has_edge("HAS_PROJECT", ("Customer", "c-1"), ("Project", "p-1")).await);
    assert!(store.has_edge("REPORTS_TO", ("User", "u-2"), ("User", "u-1")).await);
    assert!(store.has_edge("LOGGED_BY", ("WorkHour", "w-1"), ("User", "u-1")).await);
    assert!(store.has_edge("FOR_PROJECT", ("Invoice", "i-1"), ("Project", "p-1")).await);
    assert!(store.has_edge("RECORDED_IN", ("WorkHour", "w-1"), ("Month", "2025-01")).await);

    let month = store.node("Month", "2025-01").await.unwrap();
    assert_eq!(num(&month, "totalHours"), 5.0);
    assert_eq!(num(&month, "billableHours"), 5.0);
    assert_eq!(num(&month, "nonBillableHours"), 0.0);
    assert_eq!(num(&month, "totalCost"), 200.0);
    assert_eq!(num(&month, "totalRevenue"), 750.0);
    assert_eq!(num(&month, "margin"), 550.0);

    let project = store.node("Project", "p-1").await.unwrap();
    assert_eq!(num(&project, "hoursWorked"), 5.0);
    assert_eq!(num(&project, "totalRevenue"), 750.0);

    let customer = store.node("Customer", "c-1").await.unwrap();
    assert_eq!(customer["projectCount"], json!(1));
    assert_eq!(num(&customer, "totalHours"), 5.0);

    let user = store.node("User", "u-1").await.unwrap();
    assert_eq!(num(&user, "totalHours"), 5.0);
}

#[tokio::test]
async fn test_rerun_is_idempotent_and_clears_removed_references() {
    let server = MockServer::start().await;
    mount_api(&server).await;
    mount_items(&server, "/customers", customers_with_owner()).await;
    let store = Arc::new(MemoryStore::new());

    assert!(run(&server, &store, sync_config()).await.success);
    assert_eq!(store.node("Customer", "c-1").await.unwrap()["ownerGuid"], json!("u-9"));

    server.reset().await;
    mount_api(&server).await;
    mount_items(&server, "/customers", json!([{"guid": "c-1", "name": "Acme"}])).await;
    store.reopen();

    let outcome = run(&server, &store, sync_config()).await;
    assert!(outcome.success, "sync failed: {:?}", outcome.error);

    let customer = store.node("Customer", "c-1").await.unwrap();
    assert!(customer.get("ownerGuid").map_or(true, Value::is_null));
    // Snapshots never delete: c-2 stays, nothing is duplicated.
    assert_eq!(store.node_count("Customer").await, 2);
    assert_eq!(store.node_count("WorkHour").await, 1);
    assert_eq!(store.edge_count("HAS_PROJECT").await, 1);
    assert_eq!(store.edge_count("LOGGED_BY").await, 1);
    assert_eq!(store.node_count("Month").await, 12);
}

#[tokio::test]
async fn test_dry_run_only_authenticates() {
    let server = MockServer::start().await;
    mount_api(&server).await;
    mount_items(&server, "/customers", customers_with_owner()).await;
    let store = Arc::new(MemoryStore::new());

    let config = SyncConfig {
        dry_run: true,
        ..sync_config()
    };
    let outcome = run(&server, &store, config).await;

    assert!(outcome.success);
    assert_eq!(outcome.stats.stages_completed, vec![SyncStage::Auth, SyncStage::Summary]);
    assert_eq!(store.node_count("Customer").await, 0);
    assert!(store.schema_statements().await.is_empty());
    assert!(store.is_closed());

    let requests = server.received_requests().await.unwrap();
    assert!(requests.iter().all(|r| r.method.as_str() == "POST"));
}

#[tokio::test]
async fn test_auth_failure_is_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    let store = Arc::new(MemoryStore::new());

    let outcome = run(&server, &store, sync_config()).await;

    assert!(!outcome.success);
    assert_eq!(outcome.failed_stage, Some(SyncStage::Auth));
    assert_eq!(outcome.stats.stages_completed, vec![SyncStage::Summary]);
    assert!(store.schema_statements().await.is_empty());
    assert!(store.is_closed());
}

#[tokio::test]
async fn test_fetch_failure_stops_run_and_keeps_earlier_stages() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    mount_items(&server, "/businessunits", json!([{"guid": "bu-1", "name": "Consulting"}])).await;
    mount_items(&server, "/users", json!([{"guid": "u-1", "firstName": "Jane"}])).await;
    Mock::given(method("GET"))
        .and(path("/customers"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    let store = Arc::new(MemoryStore::new());

    let outcome = run(&server, &store, sync_config()).await;

    assert!(!outcome.success);
    assert_eq!(outcome.failed_stage, Some(SyncStage::CoreEntities));
    let error = outcome.error.unwrap();
    assert!(error.contains("Customer"), "{error}");
    assert!(error.contains("Max retries (3)"), "{error}");

    assert!(outcome.stats.completed(SyncStage::Reference));
    assert!(!outcome.stats.completed(SyncStage::CoreEntities));
    assert!(outcome.stats.completed(SyncStage::Summary));
    assert_eq!(store.node_count("BusinessUnit").await, 1);
    assert_eq!(store.node_count("User").await, 1);
    assert_eq!(store.edge_count("IN_BUSINESS_UNIT").await, 0);
    assert!(store.is_closed());
}

#[tokio::test]
async fn test_failed_records_are_counted_and_skipped() {
    let server = MockServer::start().await;
    mount_api(&server).await;
    mount_items(&server, "/customers", customers_with_owner()).await;
    let store = Arc::new(MemoryStore::new());
    store.fail_node("Customer", "c-1").await;

    let config = SyncConfig {
        enable_metrics: false,
        enable_analytics: false,
        create_indexes: false,
        ..sync_config()
    };
    let outcome = run(&server, &store, config).await;

    assert!(outcome.success, "sync failed: {:?}", outcome.error);
    assert_eq!(outcome.stats.entity("Customer").synced, 1);
    assert_eq!(outcome.stats.entity("Customer").failed, 1);
    assert!(store.node("Customer", "c-2").await.is_some());
    assert!(!outcome.stats.completed(SyncStage::Index));
    assert!(!outcome.stats.completed(SyncStage::Metrics));
    assert!(!outcome.stats.completed(SyncStage::Analytics));

    // Without METRICS the project carries no derived properties.
    let project = store.node("Project", "p-1").await.unwrap();
    assert!(!project.contains_key("hoursWorked"));
    assert_eq!(store.node_count("Month").await, 0);
}

/// Closes the store once `endpoint` has been fetched, as if the database went away.
struct DropStoreAfter {
    client: ApiClient,
    store: Arc<MemoryStore>,
    endpoint: &'static str,
}

#[async_trait]
impl RecordSource for DropStoreAfter {
    async fn authenticate(&mut self) -> bool {
        self.client.authenticate().await
    }

    async fn fetch_all(&mut self, endpoint: &str, params: &QueryParams) -> ClientResult<Vec<Record>> {
        let records = self.client.fetch_all(endpoint, params).await?;
        if endpoint == self.endpoint {
            self.store.close().await.unwrap();
        }
        Ok(records)
    }
}

fn lean_config() -> SyncConfig {
    SyncConfig {
        enable_metrics: false,
        enable_analytics: false,
        create_indexes: false,
        ..sync_config()
    }
}

#[tokio::test]
async fn test_losing_the_store_mid_stage_is_fatal() {
    let server = MockServer::start().await;
    mount_api(&server).await;
    mount_items(&server, "/customers", customers_with_owner()).await;
    let store = Arc::new(MemoryStore::new());

    let source = DropStoreAfter {
        client: ApiClient::new(api_config(&server)).unwrap(),
        store: store.clone(),
        endpoint: "/users",
    };
    let outcome = SyncOrchestrator::new(source, store.clone(), lean_config())
        .unwrap()
        .with_today(today())
        .run()
        .await;

    assert!(!outcome.success);
    assert_eq!(outcome.failed_stage, Some(SyncStage::CoreEntities));
    let error = outcome.error.unwrap();
    assert!(error.contains("closed"), "{error}");

    let stats = &outcome.stats;
    assert_eq!(stats.entity("User").synced, 0);
    assert_eq!(stats.entity("User").failed, 0);
    assert_eq!(stats.entity("Customer").failed, 0);
    assert_eq!(stats.relationships_failed(), 0);
    assert!(!stats.completed(SyncStage::Relationships));
    assert!(stats.completed(SyncStage::Summary));

    let requests = server.received_requests().await.unwrap();
    assert!(requests.iter().all(|r| r.url.path() != "/customers"));
}

#[tokio::test]
async fn test_failed_relationship_does_not_stop_linking() {
    let server = MockServer::start().await;
    mount_api(&server).await;
    mount_items(&server, "/customers", customers_with_owner()).await;
    let store = Arc::new(MemoryStore::new());
    store.fail_relationship("REPORTS_TO").await;

    let outcome = run(&server, &store, lean_config()).await;

    assert!(outcome.success, "sync failed: {:?}", outcome.error);
    let stats = &outcome.stats;
    assert_eq!(stats.relationship("user_supervisor").failed, 1);
    assert_eq!(stats.relationship("user_supervisor").linked, 0);
    assert_eq!(stats.relationships_failed(), 1);
    assert!(stats.completed(SyncStage::Relationships));

    assert_eq!(store.edge_count("REPORTS_TO").await, 0);
    assert_eq!(stats.relationship("customer_owner").linked, 1);
    assert!(store.has_edge("HAS_PROJECT", ("Customer", "c-1"), ("Project", "p-1")).await);
    assert!(store.has_edge("FOR_PROJECT", ("Invoice", "i-1"), ("Project", "p-1")).await);
}
