//! Router-level handler tests in the tower oneshot style, driven against a
//! mock database and the in-process Redis responder from `common` — no live
//! services required.

mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, FixedOffset};
use rust_decimal::Decimal;
use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

use stablewatch_backend::entities::{contracts, metrics, rpc_endpoints, stablecoins, sync_state};
use stablewatch_backend::handlers;

use crate::common::test_state;

const DAY_START: i64 = 1_700_006_400; // 2023-11-15 00:00 UTC

fn ts(secs: i64) -> DateTime<FixedOffset> {
    DateTime::from_timestamp(secs, 0).unwrap().fixed_offset()
}

fn endpoint_model(id: i32) -> rpc_endpoints::Model {
    rpc_endpoints::Model {
        id,
        url: format!("https://rpc-{}.example.org", id),
        max_requests_per_second: 10.0,
        max_blocks_per_query: 2_000,
        active: true,
        created_at: Some(ts(DAY_START)),
    }
}

fn contract_model(id: Uuid, stablecoin_id: i32) -> contracts::Model {
    contracts::Model {
        id,
        stablecoin_id,
        network_id: 1,
        address: format!("0x{:040x}", stablecoin_id),
        decimals: 6,
        rpc_endpoint_id: 1,
        creation_block: Some(100),
        creation_time: None,
        active: true,
        created_at: Some(ts(DAY_START)),
        updated_at: Some(ts(DAY_START)),
    }
}

fn sync_state_model(contract_id: Uuid) -> sync_state::Model {
    sync_state::Model {
        id: 1,
        contract_id,
        last_synced_block: 110,
        last_synced_at: Some(ts(DAY_START)),
        status: "synced".to_string(),
        error_message: None,
        updated_at: ts(DAY_START),
    }
}

fn metrics_model(contract_id: Uuid, minted: i64, tx_count: i64, supply: i64) -> metrics::Model {
    metrics::Model {
        id: minted,
        contract_id,
        period_start: ts(DAY_START),
        resolution: 86_400,
        total_supply: Some(Decimal::from(supply)),
        minted: Decimal::from(minted),
        burned: Decimal::ZERO,
        tx_count,
        unique_senders: 1,
        unique_receivers: 1,
        total_transferred: Decimal::from(500),
        total_fees_native: Decimal::from(21_000),
        total_fees_usd: Decimal::ZERO,
        start_block: Some(100),
        end_block: Some(110),
        created_at: Some(ts(DAY_START)),
        updated_at: Some(ts(DAY_START)),
    }
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_list_endpoints() {
    let db = MockDatabase::new(DatabaseBackend::Postgres)
        .append_query_results([vec![endpoint_model(1), endpoint_model(2)]])
        .into_connection();
    let app = Router::new()
        .route("/api/endpoints", get(handlers::endpoints::list_endpoints))
        .with_state(test_state(db).await);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/endpoints")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    let endpoints = json.as_array().unwrap();
    assert_eq!(endpoints.len(), 2);
    assert_eq!(endpoints[0]["url"], "https://rpc-1.example.org");
    assert_eq!(endpoints[0]["maxBlocksPerQuery"], 2_000);
}

#[tokio::test]
async fn test_create_endpoint_rejects_nonpositive_rate() {
    let db = MockDatabase::new(DatabaseBackend::Postgres).into_connection();
    let app = Router::new()
        .route("/api/endpoints", post(handlers::endpoints::create_endpoint))
        .with_state(test_state(db).await);

    let request = json_request(
        "POST",
        "/api/endpoints",
        serde_json::json!({
            "url": "https://rpc.example.org",
            "maxRequestsPerSecond": 0.0,
            "maxBlocksPerQuery": 1000,
        }),
    );
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert!(json["error"]
        .as_str()
        .unwrap()
        .contains("max_requests_per_second"));
}

#[tokio::test]
async fn test_create_endpoint_success() {
    let db = MockDatabase::new(DatabaseBackend::Postgres)
        .append_query_results([vec![endpoint_model(5)]])
        .append_exec_results([MockExecResult {
            last_insert_id: 5,
            rows_affected: 1,
        }])
        .into_connection();
    let app = Router::new()
        .route("/api/endpoints", post(handlers::endpoints::create_endpoint))
        .with_state(test_state(db).await);

    let request = json_request(
        "POST",
        "/api/endpoints",
        serde_json::json!({
            "url": "https://rpc-5.example.org",
            "maxRequestsPerSecond": 10.0,
            "maxBlocksPerQuery": 2000,
        }),
    );
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    let json = body_json(response).await;
    assert_eq!(json["id"], 5);
    assert_eq!(json["url"], "https://rpc-5.example.org");
}

#[tokio::test]
async fn test_list_contracts() {
    let contract_id = Uuid::new_v4();
    let db = MockDatabase::new(DatabaseBackend::Postgres)
        .append_query_results([vec![contract_model(contract_id, 7)]])
        .into_connection();
    let app = Router::new()
        .route("/api/contracts", get(handlers::contracts::list_contracts))
        .with_state(test_state(db).await);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/contracts")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json[0]["id"], contract_id.to_string());
    assert_eq!(json[0]["stablecoinId"], 7);
    assert_eq!(json[0]["creationBlock"], 100);
}

#[tokio::test]
async fn test_create_contract_unknown_stablecoin() {
    let db = MockDatabase::new(DatabaseBackend::Postgres)
        .append_query_results([Vec::<stablecoins::Model>::new()])
        .into_connection();
    let app = Router::new()
        .route("/api/contracts", post(handlers::contracts::create_contract))
        .with_state(test_state(db).await);

    let request = json_request(
        "POST",
        "/api/contracts",
        serde_json::json!({
            "stablecoinId": 42,
            "networkId": 1,
            "address": "0xdac17f958d2ee523a2206206994597c13d831ec7",
            "rpcEndpointId": 1,
        }),
    );
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert!(json["error"].as_str().unwrap().contains("Stablecoin 42"));
}

#[tokio::test]
async fn test_create_contract_success_enqueues_discovery() {
    let contract_id = Uuid::new_v4();
    let stablecoin = stablecoins::Model {
        id: 7,
        company_id: 1,
        name: "Tether USD".to_string(),
        ticker: "USDT".to_string(),
        created_at: Some(ts(DAY_START)),
    };
    let network = stablewatch_backend::entities::networks::Model {
        id: 1,
        name: "ethereum".to_string(),
        chain_type: "evm".to_string(),
        created_at: Some(ts(DAY_START)),
    };
    let spare_exec = MockExecResult {
        last_insert_id: 1,
        rows_affected: 1,
    };
    let db = MockDatabase::new(DatabaseBackend::Postgres)
        .append_query_results([vec![stablecoin]])
        .append_query_results([vec![network]])
        .append_query_results([vec![endpoint_model(1)]])
        .append_query_results([vec![contract_model(contract_id, 7)]])
        .append_query_results([Vec::<sync_state::Model>::new()])
        .append_query_results([vec![sync_state_model(contract_id)]])
        .append_exec_results([spare_exec.clone(), spare_exec.clone(), spare_exec])
        .into_connection();
    let app = Router::new()
        .route("/api/contracts", post(handlers::contracts::create_contract))
        .with_state(test_state(db).await);

    let request = json_request(
        "POST",
        "/api/contracts",
        serde_json::json!({
            "stablecoinId": 7,
            "networkId": 1,
            "address": "0xdac17f958d2ee523a2206206994597c13d831ec7",
            "rpcEndpointId": 1,
        }),
    );
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    let json = body_json(response).await;
    assert_eq!(json["id"], contract_id.to_string());
    assert_eq!(json["rpcEndpointId"], 1);
}

#[tokio::test]
async fn test_trigger_sync_unknown_contract() {
    let db = MockDatabase::new(DatabaseBackend::Postgres)
        .append_query_results([Vec::<contracts::Model>::new()])
        .into_connection();
    let app = Router::new()
        .route("/api/contracts/{id}/sync", post(handlers::sync::trigger_sync))
        .with_state(test_state(db).await);

    let contract_id = Uuid::new_v4();
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/api/contracts/{}/sync", contract_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_trigger_sync_enqueues_job() {
    let contract_id = Uuid::new_v4();
    let db = MockDatabase::new(DatabaseBackend::Postgres)
        .append_query_results([vec![contract_model(contract_id, 7)]])
        .into_connection();
    let app = Router::new()
        .route("/api/contracts/{id}/sync", post(handlers::sync::trigger_sync))
        .with_state(test_state(db).await);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/api/contracts/{}/sync", contract_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let json = body_json(response).await;
    assert_eq!(json["enqueued"], true);
    assert_eq!(json["jobId"], format!("sync-{}", contract_id));
}

#[tokio::test]
async fn test_reset_contract_reports_deleted_rows() {
    let contract_id = Uuid::new_v4();
    let spare_exec = MockExecResult {
        last_insert_id: 0,
        rows_affected: 1,
    };
    let db = MockDatabase::new(DatabaseBackend::Postgres)
        .append_query_results([vec![contract_model(contract_id, 7)]])
        .append_query_results([vec![sync_state_model(contract_id)]])
        .append_query_results([vec![sync_state_model(contract_id)]])
        .append_exec_results([
            MockExecResult {
                last_insert_id: 0,
                rows_affected: 3,
            },
            MockExecResult {
                last_insert_id: 0,
                rows_affected: 2,
            },
            spare_exec.clone(),
            spare_exec,
        ])
        .into_connection();
    let app = Router::new()
        .route(
            "/api/contracts/{id}/reset",
            post(handlers::sync::reset_contract),
        )
        .with_state(test_state(db).await);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/api/contracts/{}/reset", contract_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["metricsDeleted"], 3);
    assert_eq!(json["blocksDeleted"], 2);
    assert_eq!(json["jobId"], format!("discover-{}", contract_id));
}

#[tokio::test]
async fn test_get_sync_status() {
    let contract_id = Uuid::new_v4();
    let db = MockDatabase::new(DatabaseBackend::Postgres)
        .append_query_results([vec![contract_model(contract_id, 7)]])
        .append_query_results([vec![sync_state_model(contract_id)]])
        .into_connection();
    let app = Router::new()
        .route(
            "/api/contracts/{id}/sync-status",
            get(handlers::sync::get_sync_status),
        )
        .with_state(test_state(db).await);

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/api/contracts/{}/sync-status", contract_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "synced");
    assert_eq!(json["lastSyncedBlock"], 110);
    assert!(json["errorMessage"].is_null());
}

/// Two deployments of one ticker merge per period: counters and supplies
/// sum, block spans take MIN/MAX.
#[tokio::test]
async fn test_get_metrics_merges_deployments() {
    let c1 = Uuid::new_v4();
    let c2 = Uuid::new_v4();
    let stablecoin = stablecoins::Model {
        id: 7,
        company_id: 1,
        name: "Tether USD".to_string(),
        ticker: "USDT".to_string(),
        created_at: Some(ts(DAY_START)),
    };
    let db = MockDatabase::new(DatabaseBackend::Postgres)
        .append_query_results([vec![stablecoin]])
        .append_query_results([vec![contract_model(c1, 7), contract_model(c2, 7)]])
        .append_query_results([vec![
            metrics_model(c1, 100, 1, 1_000),
            metrics_model(c2, 200, 2, 2_000),
        ]])
        .into_connection();
    let app = Router::new()
        .route("/api/metrics/{ticker}", get(handlers::metrics::get_metrics))
        .with_state(test_state(db).await);

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!(
                    "/api/metrics/USDT?from={}&to={}&resolution=86400",
                    DAY_START - 86_400,
                    DAY_START + 86_400
                ))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["ticker"], "USDT");
    assert_eq!(json["resolution"], 86_400);
    let data = json["data"].as_array().unwrap();
    assert_eq!(data.len(), 1);
    assert_eq!(data[0]["minted"], "300");
    assert_eq!(data[0]["txCount"], 3);
    assert_eq!(data[0]["totalSupply"], "3000");
    assert_eq!(data[0]["startBlock"], 100);
    assert_eq!(data[0]["endBlock"], 110);
}

#[tokio::test]
async fn test_get_metrics_rejects_bad_resolution() {
    let db = MockDatabase::new(DatabaseBackend::Postgres).into_connection();
    let app = Router::new()
        .route("/api/metrics/{ticker}", get(handlers::metrics::get_metrics))
        .with_state(test_state(db).await);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/metrics/USDT?from=0&to=86400&resolution=3600")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert!(json["error"].as_str().unwrap().contains("Invalid resolution"));
}
