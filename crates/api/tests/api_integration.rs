//! Integration tests for the HTTP adapter over the in-memory stores.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use messaging::InMemoryBus;
use metrics_exporter_prometheus::PrometheusHandle;
use store::{InMemoryInventoryStore, InMemoryOrderStore};
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            metrics_exporter_prometheus::PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

fn setup() -> axum::Router {
    let state = api::create_state(
        InMemoryInventoryStore::new(),
        InMemoryOrderStore::new(),
        &api::Config::default(),
    );
    api::create_app(state, get_metrics_handle())
}

async fn send(
    app: &axum::Router,
    method: &str,
    uri: &str,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_string(&json).unwrap())
        }
        None => Body::empty(),
    };
    let response = app
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

#[tokio::test]
async fn health_check() {
    let app = setup();
    let (status, json) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn restock_then_read_stock() {
    let app = setup();

    let (status, json) = send(
        &app,
        "POST",
        "/stock/SKU-001/restock",
        Some(serde_json::json!({ "quantity": 10 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["available"], 10);

    let (status, json) = send(&app, "GET", "/stock/SKU-001", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["product_id"], "SKU-001");
    assert_eq!(json["available"], 10);
    assert_eq!(json["reserved"], 0);
    assert_eq!(json["total"], 10);
}

#[tokio::test]
async fn unknown_product_is_not_found() {
    let app = setup();
    let (status, _) = send(&app, "GET", "/stock/GHOST", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn reservation_lifecycle_over_http() {
    let app = setup();
    send(
        &app,
        "POST",
        "/stock/SKU-001/restock",
        Some(serde_json::json!({ "quantity": 10 })),
    )
    .await;

    let order_id = uuid::Uuid::new_v4();
    let (status, created) = send(
        &app,
        "POST",
        "/reservations",
        Some(serde_json::json!({
            "order_id": order_id.to_string(),
            "items": [{ "product_id": "SKU-001", "quantity": 4 }],
            "ttl_minutes": 10
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["status"], "Pending");
    assert_eq!(created["order_id"], order_id.to_string());
    let reservation_id = created["reservation_id"].as_str().unwrap().to_string();

    let (status, json) = send(&app, "GET", "/stock/SKU-001", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["available"], 6);
    assert_eq!(json["reserved"], 4);

    let (status, json) = send(&app, "GET", &format!("/reservations/{reservation_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "Pending");
    assert_eq!(json["items"][0]["quantity"], 4);

    let (status, _) = send(
        &app,
        "POST",
        &format!("/reservations/{reservation_id}/confirm"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    // A confirmed allocation cannot be rolled back through cancel.
    let (status, json) = send(
        &app,
        "POST",
        &format!("/reservations/{reservation_id}/cancel"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(json["error"].as_str().is_some());
}

#[tokio::test]
async fn cancel_is_idempotent_over_http() {
    let app = setup();
    send(
        &app,
        "POST",
        "/stock/SKU-001/restock",
        Some(serde_json::json!({ "quantity": 10 })),
    )
    .await;

    let (_, created) = send(
        &app,
        "POST",
        "/reservations",
        Some(serde_json::json!({
            "order_id": uuid::Uuid::new_v4().to_string(),
            "items": [{ "product_id": "SKU-001", "quantity": 4 }]
        })),
    )
    .await;
    let reservation_id = created["reservation_id"].as_str().unwrap().to_string();

    for _ in 0..2 {
        let (status, _) = send(
            &app,
            "POST",
            &format!("/reservations/{reservation_id}/cancel"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    let (_, json) = send(&app, "GET", "/stock/SKU-001", None).await;
    assert_eq!(json["available"], 10);
    assert_eq!(json["reserved"], 0);
}

#[tokio::test]
async fn insufficient_stock_is_conflict_with_detail() {
    let app = setup();
    send(
        &app,
        "POST",
        "/stock/SKU-001/restock",
        Some(serde_json::json!({ "quantity": 6 })),
    )
    .await;

    let (status, json) = send(
        &app,
        "POST",
        "/reservations",
        Some(serde_json::json!({
            "order_id": uuid::Uuid::new_v4().to_string(),
            "items": [{ "product_id": "SKU-001", "quantity": 8 }]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["unavailable_items"][0]["requested"], 8);
    assert_eq!(json["unavailable_items"][0]["available"], 6);

    // The rejection left the ledger untouched.
    let (_, stock) = send(&app, "GET", "/stock/SKU-001", None).await;
    assert_eq!(stock["available"], 6);
    assert_eq!(stock["reserved"], 0);
}

#[tokio::test]
async fn bad_ids_and_unknown_reservations() {
    let app = setup();

    let (status, _) = send(&app, "GET", "/reservations/not-a-uuid", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        "GET",
        &format!("/reservations/{}", uuid::Uuid::new_v4()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn out_of_range_ttl_is_bad_request() {
    let app = setup();
    send(
        &app,
        "POST",
        "/stock/SKU-001/restock",
        Some(serde_json::json!({ "quantity": 10 })),
    )
    .await;

    let (status, _) = send(
        &app,
        "POST",
        "/reservations",
        Some(serde_json::json!({
            "order_id": uuid::Uuid::new_v4().to_string(),
            "items": [{ "product_id": "SKU-001", "quantity": 1 }],
            "ttl_minutes": 61
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn create_and_read_order() {
    let app = setup();

    let (status, created) = send(
        &app,
        "POST",
        "/orders",
        Some(serde_json::json!({
            "lines": [{ "product_id": "SKU-001", "quantity": 2, "unit_price_cents": 1000 }]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["status"], "Pending");
    assert_eq!(created["total_cents"], 2000);
    let order_id = created["order_id"].as_str().unwrap().to_string();

    let (status, json) = send(&app, "GET", &format!("/orders/{order_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["order_id"], order_id);
    assert_eq!(json["lines"].as_array().unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn order_settles_through_the_saga() {
    let inventory_store = InMemoryInventoryStore::new();
    let order_store = InMemoryOrderStore::new();
    let config = api::Config {
        outbox_interval: Duration::from_millis(20),
        reaper_interval: Duration::from_millis(50),
        ..api::Config::default()
    };
    let state = api::create_state(inventory_store.clone(), order_store.clone(), &config);
    let (shutdown_tx, handles) = api::spawn_background_tasks(
        &state,
        inventory_store,
        order_store,
        InMemoryBus::new(),
        &config,
    );
    let app = api::create_app(Arc::clone(&state), get_metrics_handle());

    send(
        &app,
        "POST",
        "/stock/SKU-001/restock",
        Some(serde_json::json!({ "quantity": 10 })),
    )
    .await;

    let (status, created) = send(
        &app,
        "POST",
        "/orders",
        Some(serde_json::json!({
            "lines": [{ "product_id": "SKU-001", "quantity": 4, "unit_price_cents": 1000 }]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let order_id = created["order_id"].as_str().unwrap().to_string();

    // The saga settles asynchronously: outbox poll, inventory consumer,
    // outbox poll, order consumer.
    let mut settled = None;
    for _ in 0..100 {
        let (_, json) = send(&app, "GET", &format!("/orders/{order_id}"), None).await;
        if json["status"] != "Pending" {
            settled = Some(json);
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    let settled = settled.expect("order never settled");
    assert_eq!(settled["status"], "Confirmed");

    let (_, stock) = send(&app, "GET", "/stock/SKU-001", None).await;
    assert_eq!(stock["available"], 6);
    assert_eq!(stock["reserved"], 4);

    let _ = shutdown_tx.send(true);
    for handle in handles {
        let _ = handle.await;
    }
}
