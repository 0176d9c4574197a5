//! Integration tests for the API server.

use std::sync::{Arc, OnceLock};

use api::{AppState, SharedPublisher};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use common::OrganizationId;
use lifecycle::{InMemoryEventPublisher, InMemoryInventoryService};
use metrics_exporter_prometheus::PrometheusHandle;
use order_store::InMemoryOrderStore;
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            builder
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

struct TestApp {
    app: axum::Router,
    inventory: InMemoryInventoryService,
    publisher: InMemoryEventPublisher,
}

fn setup() -> TestApp {
    let store = InMemoryOrderStore::new();
    let inventory = InMemoryInventoryService::new();
    let publisher = InMemoryEventPublisher::new();
    let shared: SharedPublisher = Arc::new(publisher.clone());

    let state = Arc::new(AppState::new(store, inventory.clone(), shared, "memory"));
    TestApp {
        app: api::create_app(state, get_metrics_handle()),
        inventory,
        publisher,
    }
}

fn json_request(method: &str, uri: &str, org: Option<&str>, body: serde_json::Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(org) = org {
        builder = builder.header("x-organization-id", org);
    }
    builder
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

fn get_request(uri: &str, org: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("x-organization-id", org)
        .body(Body::empty())
        .unwrap()
}

fn order_body(items: serde_json::Value) -> serde_json::Value {
    serde_json::json!({
        "total_amount_cents": 4500,
        "currency": "EUR",
        "customer_email": "buyer@example.com",
        "line_items": items,
    })
}

async fn body_json(response: Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

async fn create_order(app: &axum::Router, org: &str, external_id: &str) -> String {
    let response = app
        .clone()
        .oneshot(json_request(
            "PUT",
            &format!("/channels/shopify/orders/{external_id}"),
            Some(org),
            order_body(serde_json::json!([
                {"sku": "A", "name": "Mug", "quantity": 2, "unit_price_cents": 1500},
                {"sku": "B", "name": "Tee", "quantity": 1, "unit_price_cents": 1500},
            ])),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    body_json(response).await["order"]["id"]
        .as_str()
        .unwrap()
        .to_string()
}

#[tokio::test]
async fn test_health_check() {
    let test = setup();

    let response = test
        .app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["store"], "memory");
}

#[tokio::test]
async fn test_upsert_creates_then_returns_ok() {
    let test = setup();
    let order_id = create_order(&test.app, "org-A", "1001").await;

    let response = test
        .app
        .clone()
        .oneshot(json_request(
            "PUT",
            "/channels/shopify/orders/1001",
            Some("org-A"),
            order_body(serde_json::json!([
                {"sku": "A", "name": "Mug", "quantity": 2, "unit_price_cents": 1500},
                {"sku": "B", "name": "Tee", "quantity": 1, "unit_price_cents": 1500},
            ])),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["order"]["id"], order_id.as_str());
    assert_eq!(json["created"], false);
    assert_eq!(json["updated"], false);
    assert_eq!(json["inventory_reserved"], true);
    assert_eq!(test.inventory.reserve_calls(), 1);
}

#[tokio::test]
async fn test_upsert_accepts_lowercase_status() {
    let test = setup();
    let mut body = order_body(serde_json::json!([
        {"sku": "A", "name": "Mug", "quantity": 1, "unit_price_cents": 1500, "variant_id": "blue"},
    ]));
    body["status"] = serde_json::json!("confirmed");

    let response = test
        .app
        .oneshot(json_request(
            "PUT",
            "/channels/woo/orders/77",
            Some("org-A"),
            body,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    let json = body_json(response).await;
    assert_eq!(json["order"]["status"], "CONFIRMED");
    assert_eq!(json["order"]["line_items"][0]["variant_id"], "blue");
}

#[tokio::test]
async fn test_upsert_rejects_unknown_status() {
    let test = setup();
    let mut body = order_body(serde_json::json!([
        {"sku": "A", "name": "Mug", "quantity": 1, "unit_price_cents": 1500},
    ]));
    body["status"] = serde_json::json!("LOST");

    let response = test
        .app
        .oneshot(json_request("PUT", "/channels/woo/orders/77", Some("org-A"), body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert!(json["error"].as_str().unwrap().contains("LOST"));
}

#[tokio::test]
async fn test_upsert_validation_error() {
    let test = setup();

    let response = test
        .app
        .oneshot(json_request(
            "PUT",
            "/channels/shopify/orders/1001",
            Some("org-A"),
            order_body(serde_json::json!([
                {"sku": "A", "name": "Mug", "quantity": 0, "unit_price_cents": 1500},
            ])),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(test.inventory.reserve_calls(), 0);
}

#[tokio::test]
async fn test_insufficient_stock_is_conflict() {
    let test = setup();
    test.inventory
        .set_stock(&OrganizationId::new("org-A"), "A", 1);

    let response = test
        .app
        .oneshot(json_request(
            "PUT",
            "/channels/shopify/orders/1001",
            Some("org-A"),
            order_body(serde_json::json!([
                {"sku": "A", "name": "Mug", "quantity": 3, "unit_price_cents": 1500},
            ])),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_missing_organization_header() {
    let test = setup();

    let response = test
        .app
        .oneshot(json_request(
            "PUT",
            "/channels/shopify/orders/1001",
            None,
            order_body(serde_json::json!([])),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_get_order_is_tenant_scoped() {
    let test = setup();
    let order_id = create_order(&test.app, "org-A", "1001").await;

    let response = test
        .app
        .clone()
        .oneshot(get_request(&format!("/orders/{order_id}"), "org-A"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["external_id"], "1001");
    assert_eq!(json["status"], "PENDING");
    assert_eq!(json["total_amount_cents"], 4500);
    assert_eq!(json["line_items"].as_array().unwrap().len(), 2);

    let response = test
        .app
        .oneshot(get_request(&format!("/orders/{order_id}"), "org-B"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_get_order_with_malformed_id() {
    let test = setup();

    let response = test
        .app
        .oneshot(get_request("/orders/not-a-uuid", "org-A"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_status_update_flow() {
    let test = setup();
    let order_id = create_order(&test.app, "org-A", "1001").await;

    let response = test
        .app
        .clone()
        .oneshot(json_request(
            "PATCH",
            &format!("/orders/{order_id}/status"),
            Some("org-A"),
            serde_json::json!({"status": "CONFIRMED"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["previous_status"], "PENDING");
    assert_eq!(json["order"]["status"], "CONFIRMED");

    let response = test
        .app
        .oneshot(json_request(
            "PATCH",
            &format!("/orders/{order_id}/status"),
            Some("org-A"),
            serde_json::json!({"status": "DELIVERED"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let json = body_json(response).await;
    assert!(json["error"].as_str().unwrap().contains("skip"));
    assert_eq!(test.publisher.event_count(), 1);
}

#[tokio::test]
async fn test_cancel_flow() {
    let test = setup();
    let order_id = create_order(&test.app, "org-A", "1001").await;
    let uri = format!("/orders/{order_id}/cancel");

    let response = test
        .app
        .clone()
        .oneshot(json_request(
            "POST",
            &uri,
            Some("org-A"),
            serde_json::json!({"reason": "fraud suspected", "source": "system"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["cancelled"], true);
    assert_eq!(json["already_cancelled"], false);
    assert_eq!(json["inventory_released"], true);
    assert_eq!(json["previous_status"], "PENDING");

    let response = test
        .app
        .clone()
        .oneshot(json_request(
            "POST",
            &uri,
            Some("org-A"),
            serde_json::json!({"reason": "duplicate request"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["already_cancelled"], true);
    assert_eq!(json["inventory_released"], false);
    assert_eq!(json["reason"], "fraud suspected");

    assert_eq!(test.inventory.release_calls(), 1);
    assert_eq!(test.publisher.event_count(), 1);
}

#[tokio::test]
async fn test_cancel_other_tenant_order_is_not_found() {
    let test = setup();
    let order_id = create_order(&test.app, "org-A", "1001").await;

    let response = test
        .app
        .oneshot(json_request(
            "POST",
            &format!("/orders/{order_id}/cancel"),
            Some("org-B"),
            serde_json::json!({"reason": "not mine"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(test.inventory.release_calls(), 0);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let test = setup();
    create_order(&test.app, "org-A", "1001").await;

    let response = test
        .app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("order_upserts_total"));
}
