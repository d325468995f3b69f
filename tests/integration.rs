use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use order_lifecycle::api::rest::router;
use order_lifecycle::config::TrackingConfig;
use order_lifecycle::state::AppState;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

const NEAR_RESTAURANT: (f64, f64) = (28.9900, 77.7100);

fn setup() -> Router {
    router(Arc::new(AppState::new(TrackingConfig::default(), 1024)))
}

#[derive(Clone, Copy)]
enum As {
    Nobody,
    Admin,
    Customer,
    Courier(Uuid),
}

fn request(method: &str, uri: &str, actor: As, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    builder = match actor {
        As::Nobody => builder,
        As::Admin => builder
            .header("x-actor-role", "admin")
            .header("x-actor-id", Uuid::from_u128(1).to_string()),
        As::Customer => builder.header("x-actor-role", "customer"),
        As::Courier(id) => builder
            .header("x-actor-role", "courier")
            .header("x-actor-id", id.to_string()),
    };

    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_string(&body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn call(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    (status, body_json(response).await)
}

async fn place_order(app: &Router, payment_method: &str) -> Value {
    let (status, order) = call(
        app,
        request(
            "POST",
            "/orders",
            As::Customer,
            Some(json!({
                "payment_method": payment_method,
                "delivery": { "lat": NEAR_RESTAURANT.0, "lng": NEAR_RESTAURANT.1 }
            })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{order}");
    order
}

async fn on_duty_courier(app: &Router, name: &str) -> Uuid {
    let (status, courier) = call(
        app,
        request("POST", "/couriers", As::Admin, Some(json!({ "name": name }))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let id: Uuid = courier["id"].as_str().unwrap().parse().unwrap();

    let (status, courier) = call(
        app,
        request(
            "PATCH",
            &format!("/couriers/{id}/duty"),
            As::Courier(id),
            Some(json!({ "on_duty": true })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(courier["is_on_duty"], true);
    id
}

/// Places a COD order and walks it to READY.
async fn ready_order(app: &Router) -> String {
    let order = place_order(app, "COD").await;
    let id = order["id"].as_str().unwrap().to_string();

    let (status, _) = call(app, request("POST", &format!("/orders/{id}/accept"), As::Admin, None)).await;
    assert_eq!(status, StatusCode::OK);
    for expected in ["PREPARING", "READY"] {
        let (status, body) =
            call(app, request("POST", &format!("/orders/{id}/advance"), As::Admin, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], expected);
    }
    id
}

#[tokio::test]
async fn health_returns_ok() {
    let app = setup();
    let (status, body) = call(&app, request("GET", "/health", As::Nobody, None)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["couriers"], 0);
    assert_eq!(body["orders"], 0);
    assert_eq!(body["tracked_orders"], 0);
}

#[tokio::test]
async fn metrics_returns_prometheus_format() {
    let app = setup();
    let response = app
        .oneshot(request("GET", "/metrics", As::Nobody, None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(content_type.contains("text/plain"));

    let body = body_string(response).await;
    assert!(body.contains("tracked_orders"));
    assert!(body.contains("stale_feeds"));
}

#[tokio::test]
async fn missing_actor_header_returns_400() {
    let app = setup();
    let (status, body) = call(
        &app,
        request("POST", "/couriers", As::Nobody, Some(json!({ "name": "Ravi" }))),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "bad_request");
}

#[tokio::test]
async fn only_admins_register_couriers() {
    let app = setup();
    let (status, body) = call(
        &app,
        request("POST", "/couriers", As::Customer, Some(json!({ "name": "Ravi" }))),
    )
    .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "unauthorized");
}

#[tokio::test]
async fn register_courier_empty_name_returns_400() {
    let app = setup();
    let (status, _) = call(
        &app,
        request("POST", "/couriers", As::Admin, Some(json!({ "name": "  " }))),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn placing_orders_depends_on_payment_method() {
    let app = setup();

    let cod = place_order(&app, "COD").await;
    assert_eq!(cod["status"], "PLACED");
    assert_eq!(cod["payment_status"], "PENDING");
    assert!(cod["order_number"].as_str().unwrap().starts_with("ORD"));
    assert!(cod["courier_id"].is_null());
    assert!(cod["accepted_at"].is_null());

    let online = place_order(&app, "ONLINE").await;
    assert_eq!(online["status"], "PENDING_PAYMENT");
    assert_ne!(cod["order_number"], online["order_number"]);
}

#[tokio::test]
async fn order_outside_delivery_radius_returns_400() {
    let app = setup();
    let (status, body) = call(
        &app,
        request(
            "POST",
            "/orders",
            As::Customer,
            Some(json!({
                "payment_method": "COD",
                "delivery": { "lat": 28.6139, "lng": 77.2090 }
            })),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "bad_request");
}

#[tokio::test]
async fn get_nonexistent_order_returns_404() {
    let app = setup();
    let fake_id = "00000000-0000-0000-0000-000000000000";
    let (status, body) = call(&app, request("GET", &format!("/orders/{fake_id}"), As::Nobody, None)).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not_found");
}

#[tokio::test]
async fn cancel_placed_order_with_reason() {
    let app = setup();
    let order = place_order(&app, "COD").await;
    let id = order["id"].as_str().unwrap();

    let (status, body) = call(
        &app,
        request("POST", &format!("/orders/{id}/cancel"), As::Admin, Some(json!({ "reason": " " }))),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "bad_request");

    let (status, body) = call(
        &app,
        request(
            "POST",
            &format!("/orders/{id}/cancel"),
            As::Admin,
            Some(json!({ "reason": "out of stock" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "CANCELLED");
    assert_eq!(body["cancel_reason"], "out of stock");
    assert!(body["created_at"].is_string());
    for field in ["accepted_at", "ready_at", "out_for_delivery_at", "delivered_at"] {
        assert!(body[field].is_null(), "{field} should be unset");
    }
}

#[tokio::test]
async fn edges_outside_the_table_are_rejected() {
    let app = setup();
    let order = place_order(&app, "COD").await;
    let id = order["id"].as_str().unwrap();

    let (status, body) = call(
        &app,
        request(
            "POST",
            &format!("/orders/{id}/transition"),
            As::Admin,
            Some(json!({ "status": "DELIVERED" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "invalid_transition");

    let (status, body) = call(&app, request("POST", &format!("/orders/{id}/accept"), As::Customer, None)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "unauthorized");

    let (status, _) = call(&app, request("POST", &format!("/orders/{id}/accept"), As::Admin, None)).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = call(&app, request("POST", &format!("/orders/{id}/accept"), As::Admin, None)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "already_in_state");

    // Cancellation is only possible before acceptance.
    let (status, body) = call(
        &app,
        request("POST", &format!("/orders/{id}/reject"), As::Admin, Some(json!({ "reason": "late" }))),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "invalid_transition");
}

#[tokio::test]
async fn failed_online_payment_does_not_move_the_order() {
    let app = setup();
    let order = place_order(&app, "ONLINE").await;
    let id = order["id"].as_str().unwrap();

    let (status, body) = call(
        &app,
        request("POST", &format!("/orders/{id}/payment"), As::Admin, Some(json!({ "status": "FAILED" }))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "PENDING_PAYMENT");
    assert_eq!(body["payment_status"], "FAILED");

    let (status, body) = call(&app, request("POST", &format!("/orders/{id}/accept"), As::Admin, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ACCEPTED");
}

#[tokio::test]
async fn courier_cannot_take_a_second_order_until_delivered() {
    let app = setup();
    let courier = on_duty_courier(&app, "Ravi").await;
    let first = ready_order(&app).await;
    let second = ready_order(&app).await;

    let (status, available) = call(&app, request("GET", "/orders/available", As::Courier(courier), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(available.as_array().unwrap().len(), 2);

    let (status, assignment) = call(&app, request("POST", &format!("/orders/{first}/claim"), As::Courier(courier), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(assignment["origin"], "SelfAccepted");

    let (status, body) = call(
        &app,
        request(
            "POST",
            &format!("/orders/{second}/assign"),
            As::Admin,
            Some(json!({ "courier_id": courier })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "courier_unavailable");

    for step in ["start", "deliver"] {
        let (status, _) = call(&app, request("POST", &format!("/orders/{first}/{step}"), As::Courier(courier), None)).await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, assignment) = call(
        &app,
        request(
            "POST",
            &format!("/orders/{second}/assign"),
            As::Admin,
            Some(json!({ "courier_id": courier })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(assignment["origin"], "Dispatched");
}

#[tokio::test]
async fn full_delivery_flow_with_live_location() {
    let app = setup();
    let courier = on_duty_courier(&app, "Ravi").await;
    let order_id = ready_order(&app).await;

    let (status, order) = call(&app, request("POST", &format!("/orders/{order_id}/accept"), As::Courier(courier), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(order["status"], "READY");
    assert_eq!(order["courier_id"], courier.to_string());

    let (status, order) = call(&app, request("POST", &format!("/orders/{order_id}/start"), As::Courier(courier), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(order["status"], "OUT_FOR_DELIVERY");
    assert!(order["out_for_delivery_at"].is_string());

    let (_, couriers) = call(&app, request("GET", "/couriers", As::Nobody, None)).await;
    assert_eq!(couriers[0]["active_order_id"], order_id.as_str());
    assert_eq!(couriers[0]["is_available"], false);

    let (status, ack) = call(
        &app,
        request(
            "POST",
            &format!("/couriers/{courier}/location"),
            As::Courier(courier),
            Some(json!({
                "order_id": order_id,
                "latitude": 28.9845,
                "longitude": 77.7064,
                "speed_kmh": 20.0
            })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["accepted"], true);

    let (status, live) = call(&app, request("GET", &format!("/orders/{order_id}/location"), As::Customer, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(live["tracking"], true);
    assert_eq!(live["freshness"], "LIVE");
    assert_eq!(live["sample"]["latitude"], 28.9845);
    let distance = live["distance_km"].as_f64().unwrap();
    assert!(distance > 0.6 && distance < 0.9);
    assert!(live["eta_minutes"].as_f64().unwrap() > 0.0);
    assert!(live["viewport"]["lat_span"].as_f64().unwrap() >= 0.01);

    let (status, fleet) = call(&app, request("GET", "/fleet/viewport", As::Admin, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fleet["couriers"].as_array().unwrap().len(), 1);

    let (status, order) = call(&app, request("POST", &format!("/orders/{order_id}/deliver"), As::Courier(courier), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(order["status"], "DELIVERED");
    assert_eq!(order["payment_status"], "PAID");

    let (status, body) = call(&app, request("GET", &format!("/orders/{order_id}/location"), As::Customer, None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "tracking_ended");

    let (_, couriers) = call(&app, request("GET", "/couriers", As::Nobody, None)).await;
    assert!(couriers[0]["active_order_id"].is_null());
    assert_eq!(couriers[0]["is_available"], true);
    assert_eq!(couriers[0]["completed_deliveries"], 1);
}

#[tokio::test]
async fn couriers_only_report_their_own_location() {
    let app = setup();
    let ravi = on_duty_courier(&app, "Ravi").await;
    let asha = on_duty_courier(&app, "Asha").await;

    let (status, body) = call(
        &app,
        request(
            "POST",
            &format!("/couriers/{ravi}/location"),
            As::Courier(asha),
            Some(json!({ "latitude": 28.98, "longitude": 77.70 })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "unauthorized");

    let (status, ack) = call(
        &app,
        request(
            "POST",
            &format!("/couriers/{ravi}/location"),
            As::Courier(ravi),
            Some(json!({ "latitude": 28.98, "longitude": 77.70 })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["outcome"], "accepted");
    assert!(ack["order_id"].is_null());
}
