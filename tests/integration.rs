use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use backhaul_dispatch::api::rest::router;
use backhaul_dispatch::config::Config;
use backhaul_dispatch::dispatch::board::LoadBoard;
use backhaul_dispatch::dispatch::DispatchBackend;
use backhaul_dispatch::engine::scoring::{CostModel, ScoringStrategy, VehiclePosition};
use backhaul_dispatch::error::DispatchError;
use backhaul_dispatch::models::load::{Load, LoadStatus};
use backhaul_dispatch::state::AppState;
use futures::future::{self, BoxFuture, FutureExt};
use serde_json::{json, Value};
use tokio::time::{sleep, Duration};
use tower::ServiceExt;
use uuid::Uuid;

const PUNE: (f64, f64) = (18.5204, 73.8567);
const MUMBAI: (f64, f64) = (19.0760, 72.8777);
const NOIDA: (f64, f64) = (28.5355, 77.3910);
const DELHI: (f64, f64) = (28.6139, 77.2090);

fn config(wait_ms: u64) -> Config {
    Config {
        auto_match_wait_ms: wait_ms,
        ..Config::default()
    }
}

fn setup() -> axum::Router {
    router(Arc::new(AppState::with_load_board(&config(20))))
}

fn setup_with_wait(wait_ms: u64) -> axum::Router {
    router(Arc::new(AppState::with_load_board(&config(wait_ms))))
}

fn setup_with_sweeper(interval_ms: u64) -> axum::Router {
    let config = Config {
        auto_scheduler_interval_ms: interval_ms,
        ..config(20)
    };
    router(Arc::new(AppState::with_load_board(&config)))
}

/// Load board whose matching pass is always down.
struct BrokenMatcher(LoadBoard);

impl DispatchBackend for BrokenMatcher {
    fn trigger_matching_pass(&self, _trip_id: Uuid) -> BoxFuture<'_, Result<(), DispatchError>> {
        future::ready(Err(DispatchError::Unavailable("matcher offline".to_string()))).boxed()
    }

    fn assigned_load(&self, trip_id: Uuid) -> BoxFuture<'_, Result<Option<Load>, DispatchError>> {
        self.0.assigned_load(trip_id)
    }

    fn available_loads(&self) -> BoxFuture<'_, Result<Vec<Load>, DispatchError>> {
        self.0.available_loads()
    }

    fn accept_load(
        &self,
        load_id: Uuid,
        trip_id: Uuid,
    ) -> BoxFuture<'_, Result<Load, DispatchError>> {
        self.0.accept_load(load_id, trip_id)
    }

    fn publish_load(&self, load: Load) -> BoxFuture<'_, Result<Load, DispatchError>> {
        self.0.publish_load(load)
    }

    fn load(&self, load_id: Uuid) -> BoxFuture<'_, Result<Option<Load>, DispatchError>> {
        self.0.load(load_id)
    }

    fn set_load_status(
        &self,
        load_id: Uuid,
        status: LoadStatus,
    ) -> BoxFuture<'_, Result<Load, DispatchError>> {
        self.0.set_load_status(load_id, status)
    }

    fn register_trip(
        &self,
        trip_id: Uuid,
        position: VehiclePosition,
    ) -> BoxFuture<'_, Result<(), DispatchError>> {
        self.0.register_trip(trip_id, position)
    }

    fn release_trip(&self, trip_id: Uuid) -> BoxFuture<'_, Result<(), DispatchError>> {
        self.0.release_trip(trip_id)
    }
}

fn setup_broken_matcher() -> axum::Router {
    let board = LoadBoard::new(ScoringStrategy::Balanced.weights(), CostModel::default(), 5);
    let state = AppState::new(&config(20), Arc::new(BrokenMatcher(board)));
    router(Arc::new(state))
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn empty_request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
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

fn place(point: (f64, f64), address: &str) -> Value {
    json!({ "lat": point.0, "lng": point.1, "address": address })
}

async fn create_vehicle(app: &axum::Router) -> String {
    let res = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/vehicles",
            json!({
                "name": "MH-12 Tata 1109",
                "location": { "lat": PUNE.0, "lng": PUNE.1 }
            }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    body_json(res).await["id"].as_str().unwrap().to_string()
}

async fn publish_load(app: &axum::Router, pickup: (f64, f64), price: f64) -> String {
    let res = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/loads",
            json!({
                "vendor_id": Uuid::new_v4(),
                "pickup": place(pickup, "pickup yard"),
                "destination": place(DELHI, "Delhi"),
                "weight_kg": 4500.0,
                "price_offered": price
            }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    body_json(res).await["id"].as_str().unwrap().to_string()
}

/// Creates a Pune to Delhi trip and returns (trip_id, driver_id).
async fn create_trip(app: &axum::Router, vehicle_id: Option<&str>) -> (String, String) {
    let driver_id = Uuid::new_v4().to_string();
    let res = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/trips",
            json!({
                "driver_id": driver_id,
                "vehicle_id": vehicle_id,
                "origin": place(PUNE, "Pune"),
                "destination": place(DELHI, "Delhi")
            }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let trip = body_json(res).await;
    assert_eq!(trip["status"], "planning");
    (trip["id"].as_str().unwrap().to_string(), driver_id)
}

async fn deadhead(app: &axum::Router, trip_id: &str) -> Value {
    let res = app
        .clone()
        .oneshot(empty_request("PATCH", &format!("/trips/{trip_id}/deadhead")))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    body_json(res).await
}

async fn get_json(app: &axum::Router, uri: &str) -> Value {
    let res = app.clone().oneshot(get_request(uri)).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    body_json(res).await
}

async fn verify(
    app: &axum::Router,
    token_id: &str,
    scanner_id: &str,
    role: &str,
    at: (f64, f64),
) -> axum::response::Response {
    app.clone()
        .oneshot(json_request(
            "POST",
            "/verification/verify",
            json!({
                "token_id": token_id,
                "scanner_id": scanner_id,
                "role": role,
                "location": { "lat": at.0, "lng": at.1 }
            }),
        ))
        .await
        .unwrap()
}

async fn issue_token(app: &axum::Router, trip_id: &str, body: Value) -> axum::response::Response {
    app.clone()
        .oneshot(json_request(
            "POST",
            &format!("/trips/{trip_id}/tokens"),
            body,
        ))
        .await
        .unwrap()
}

/// A trip that has been auto-assigned the Mumbai load.
async fn assigned_trip(app: &axum::Router) -> (String, String, String) {
    let mumbai = publish_load(app, MUMBAI, 12_000.0).await;
    let (trip_id, driver_id) = create_trip(app, None).await;
    deadhead(app, &trip_id).await;
    sleep(Duration::from_millis(200)).await;

    let trip = get_json(app, &format!("/trips/{trip_id}")).await;
    assert_eq!(trip["status"], "assigned");
    (trip_id, driver_id, mumbai)
}

#[tokio::test]
async fn health_returns_ok() {
    let app = setup();
    let response = app.oneshot(get_request("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["trips"], 0);
    assert_eq!(body["vehicles"], 0);
    assert_eq!(body["assignments"], 0);
}

#[tokio::test]
async fn metrics_returns_prometheus_format() {
    let app = setup();
    create_trip(&app, None).await;
    let response = app.oneshot(get_request("/metrics")).await.unwrap();

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
    assert!(body.contains("active_trips 1"));
}

#[tokio::test]
async fn create_vehicle_starts_available() {
    let app = setup();
    let id = create_vehicle(&app).await;

    let vehicles = get_json(&app, "/vehicles").await;
    let list = vehicles.as_array().unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["id"], id);
    assert_eq!(list[0]["status"], "available");
}

#[tokio::test]
async fn create_vehicle_empty_name_returns_400() {
    let app = setup();
    let response = app
        .oneshot(json_request(
            "POST",
            "/vehicles",
            json!({ "name": "  ", "location": { "lat": PUNE.0, "lng": PUNE.1 } }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn create_vehicle_out_of_range_location_returns_400() {
    let app = setup();
    let response = app
        .oneshot(json_request(
            "POST",
            "/vehicles",
            json!({ "name": "Eicher", "location": { "lat": 95.0, "lng": 73.8 } }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn update_vehicle_status() {
    let app = setup();
    let id = create_vehicle(&app).await;

    let res = app
        .oneshot(json_request(
            "PATCH",
            &format!("/vehicles/{id}/status"),
            json!({ "status": "inactive" }),
        ))
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    let body = body_json(res).await;
    assert_eq!(body["status"], "inactive");
}

#[tokio::test]
async fn get_nonexistent_load_returns_404() {
    let app = setup();
    let fake_id = "00000000-0000-0000-0000-000000000000";
    let response = app
        .oneshot(get_request(&format!("/loads/{fake_id}")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn create_load_with_negative_price_returns_400() {
    let app = setup();
    let response = app
        .oneshot(json_request(
            "POST",
            "/loads",
            json!({
                "vendor_id": Uuid::new_v4(),
                "pickup": place(MUMBAI, "Mumbai"),
                "destination": place(DELHI, "Delhi"),
                "weight_kg": 1000.0,
                "price_offered": -5.0
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn rejected_load_leaves_the_board() {
    let app = setup();
    let id = publish_load(&app, MUMBAI, 12_000.0).await;

    let res = app
        .clone()
        .oneshot(empty_request("PATCH", &format!("/loads/{id}/reject")))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body_json(res).await["status"], "rejected");

    let available = get_json(&app, "/loads/available").await;
    assert!(available.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn loads_for_pune_trip_rank_mumbai_first() {
    let app = setup();
    let noida = publish_load(&app, NOIDA, 4_000.0).await;
    let mumbai = publish_load(&app, MUMBAI, 12_000.0).await;
    let (trip_id, _) = create_trip(&app, None).await;

    let ranking = get_json(&app, &format!("/trips/{trip_id}/loads")).await;
    let entries = ranking["entries"].as_array().unwrap();

    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["candidate"]["id"], mumbai);
    assert_eq!(entries[0]["recommended"], true);
    assert_eq!(entries[1]["candidate"]["id"], noida);
    assert_eq!(entries[1]["recommended"], false);

    let to_mumbai = entries[0]["profitability"]["distance_to_pickup_km"]
        .as_f64()
        .unwrap();
    assert!((to_mumbai - 120.0).abs() < 2.0);
}

#[tokio::test]
async fn load_with_unknown_pickup_is_excluded_from_ranking() {
    let app = setup();
    publish_load(&app, MUMBAI, 12_000.0).await;
    let res = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/loads",
            json!({
                "vendor_id": Uuid::new_v4(),
                "pickup": { "address": "somewhere near Nashik" },
                "destination": place(DELHI, "Delhi"),
                "weight_kg": 800.0,
                "price_offered": 9_000.0
            }),
        ))
        .await
        .unwrap();
    let unknown = body_json(res).await["id"].as_str().unwrap().to_string();
    let (trip_id, _) = create_trip(&app, None).await;

    let ranking = get_json(&app, &format!("/trips/{trip_id}/loads")).await;

    assert_eq!(ranking["entries"].as_array().unwrap().len(), 1);
    assert_eq!(ranking["excluded"][0]["id"], unknown);
}

#[tokio::test]
async fn vehicles_for_load_skip_unavailable_ones() {
    let app = setup();
    let available = create_vehicle(&app).await;
    let inactive = create_vehicle(&app).await;
    app.clone()
        .oneshot(json_request(
            "PATCH",
            &format!("/vehicles/{inactive}/status"),
            json!({ "status": "inactive" }),
        ))
        .await
        .unwrap();
    let load_id = publish_load(&app, MUMBAI, 12_000.0).await;

    let ranking = get_json(
        &app,
        &format!("/loads/{load_id}/vehicles?strategy=pickup_proximity"),
    )
    .await;
    let entries = ranking["entries"].as_array().unwrap();

    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["candidate"]["id"], available);
}

#[tokio::test]
async fn deadheading_trip_is_auto_assigned_after_wait() {
    let app = setup();
    let vehicle_id = create_vehicle(&app).await;
    publish_load(&app, NOIDA, 4_000.0).await;
    let mumbai = publish_load(&app, MUMBAI, 12_000.0).await;
    let (trip_id, _) = create_trip(&app, Some(&vehicle_id)).await;

    let trip = deadhead(&app, &trip_id).await;
    assert_eq!(trip["status"], "deadheading");
    assert_eq!(trip["scheduling"]["phase"], "polling");

    sleep(Duration::from_millis(200)).await;

    let trip = get_json(&app, &format!("/trips/{trip_id}")).await;
    assert_eq!(trip["status"], "assigned");
    assert_eq!(trip["bound_load"], mumbai);
    assert_eq!(trip["scheduling"]["phase"], "assigned");
    assert_eq!(
        trip["scheduling"]["history"],
        json!(["awaiting_candidates", "polling", "assigned"])
    );

    let assignment = get_json(&app, &format!("/trips/{trip_id}/assignment")).await;
    assert_eq!(assignment["mode"], "auto");
    assert_eq!(assignment["load_id"], mumbai);
    assert!(assignment["profitability"]["net_profit"].as_f64().unwrap() > 0.0);

    let load = get_json(&app, &format!("/loads/{mumbai}")).await;
    assert_eq!(load["status"], "assigned");
    assert_eq!(load["assigned_trip"], trip_id);

    let vehicles = get_json(&app, "/vehicles").await;
    assert_eq!(vehicles[0]["status"], "allocated");
}

#[tokio::test]
async fn trip_without_coordinates_cannot_deadhead() {
    let app = setup();
    let res = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/trips",
            json!({
                "driver_id": Uuid::new_v4(),
                "origin": place(PUNE, "Pune"),
                "destination": { "address": "Delhi" }
            }),
        ))
        .await
        .unwrap();
    let trip_id = body_json(res).await["id"].as_str().unwrap().to_string();

    let res = app
        .oneshot(empty_request("PATCH", &format!("/trips/{trip_id}/deadhead")))
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn unprofitable_board_falls_back_to_manual_selection() {
    let app = setup();
    let cheap = publish_load(&app, MUMBAI, 10.0).await;
    let (trip_id, _) = create_trip(&app, None).await;
    deadhead(&app, &trip_id).await;

    sleep(Duration::from_millis(200)).await;

    let trip = get_json(&app, &format!("/trips/{trip_id}")).await;
    assert_eq!(trip["status"], "deadheading");
    assert_eq!(trip["scheduling"]["phase"], "manual_selection_required");
    let recommendations = &trip["scheduling"]["recommendations"]["entries"];
    assert_eq!(recommendations[0]["candidate"]["id"], cheap);
    assert_eq!(recommendations[0]["recommended"], true);
}

#[tokio::test]
async fn failed_matching_pass_skips_polling() {
    let app = setup_broken_matcher();
    let mumbai = publish_load(&app, MUMBAI, 12_000.0).await;
    let (trip_id, _) = create_trip(&app, None).await;

    let trip = deadhead(&app, &trip_id).await;

    assert_eq!(trip["scheduling"]["phase"], "manual_selection_required");
    assert_eq!(
        trip["scheduling"]["history"],
        json!(["awaiting_candidates", "manual_selection_required"])
    );
    assert_eq!(
        trip["scheduling"]["recommendations"]["entries"][0]["candidate"]["id"],
        mumbai
    );
}

#[tokio::test]
async fn manual_accept_binds_the_chosen_load() {
    let app = setup_broken_matcher();
    let noida = publish_load(&app, NOIDA, 4_000.0).await;
    publish_load(&app, MUMBAI, 12_000.0).await;
    let (trip_id, _) = create_trip(&app, None).await;
    deadhead(&app, &trip_id).await;

    let res = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/trips/{trip_id}/accept"),
            json!({ "load_id": noida }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let assignment = body_json(res).await;
    assert_eq!(assignment["mode"], "manual");
    assert_eq!(assignment["load_id"], noida);

    let trip = get_json(&app, &format!("/trips/{trip_id}")).await;
    assert_eq!(trip["status"], "assigned");
    assert_eq!(trip["bound_load"], noida);

    let available = get_json(&app, "/loads/available").await;
    assert_eq!(available.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn second_manual_accept_is_rejected() {
    let app = setup_broken_matcher();
    let noida = publish_load(&app, NOIDA, 4_000.0).await;
    let mumbai = publish_load(&app, MUMBAI, 12_000.0).await;
    let (trip_id, _) = create_trip(&app, None).await;
    deadhead(&app, &trip_id).await;

    for (load_id, expected) in [(noida, StatusCode::OK), (mumbai, StatusCode::CONFLICT)] {
        let res = app
            .clone()
            .oneshot(json_request(
                "POST",
                &format!("/trips/{trip_id}/accept"),
                json!({ "load_id": load_id }),
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), expected);
    }
}

#[tokio::test]
async fn manual_accept_during_pass_is_rejected() {
    let app = setup_with_wait(500);
    let mumbai = publish_load(&app, MUMBAI, 12_000.0).await;
    let (trip_id, _) = create_trip(&app, None).await;
    deadhead(&app, &trip_id).await;

    let res = app
        .oneshot(json_request(
            "POST",
            &format!("/trips/{trip_id}/accept"),
            json!({ "load_id": mumbai }),
        ))
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn repeated_schedule_trigger_is_a_no_op() {
    let app = setup_with_wait(500);
    publish_load(&app, MUMBAI, 12_000.0).await;
    let (trip_id, _) = create_trip(&app, None).await;
    deadhead(&app, &trip_id).await;

    let res = app
        .clone()
        .oneshot(empty_request("POST", &format!("/trips/{trip_id}/schedule")))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body_json(res).await["phase"], "polling");

    let trip = get_json(&app, &format!("/trips/{trip_id}")).await;
    assert_eq!(
        trip["scheduling"]["history"],
        json!(["awaiting_candidates", "polling"])
    );
}

#[tokio::test]
async fn abandoning_cancels_the_pending_check() {
    let app = setup_with_wait(100);
    let vehicle_id = create_vehicle(&app).await;
    publish_load(&app, MUMBAI, 12_000.0).await;
    let (trip_id, _) = create_trip(&app, Some(&vehicle_id)).await;
    deadhead(&app, &trip_id).await;

    let res = app
        .clone()
        .oneshot(empty_request("POST", &format!("/trips/{trip_id}/abandon")))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body_json(res).await["status"], "abandoned");

    sleep(Duration::from_millis(300)).await;

    let trip = get_json(&app, &format!("/trips/{trip_id}")).await;
    assert_eq!(trip["status"], "abandoned");
    assert_eq!(trip["scheduling"]["phase"], "idle");
    assert!(trip["assignment"].is_null());

    let available = get_json(&app, "/loads/available").await;
    assert_eq!(available.as_array().unwrap().len(), 1);

    let vehicles = get_json(&app, "/vehicles").await;
    assert_eq!(vehicles[0]["status"], "available");
}

#[tokio::test]
async fn assigned_trip_cannot_be_abandoned() {
    let app = setup();
    let (trip_id, _, _) = assigned_trip(&app).await;

    let res = app
        .oneshot(empty_request("POST", &format!("/trips/{trip_id}/abandon")))
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn pickup_and_delivery_verification_complete_the_trip() {
    let app = setup();
    let (trip_id, driver_id, load_id) = assigned_trip(&app).await;
    let receiver_id = Uuid::new_v4().to_string();

    let res = issue_token(&app, &trip_id, json!({ "phase": "pickup" })).await;
    assert_eq!(res.status(), StatusCode::OK);
    let pickup = body_json(res).await;
    assert_eq!(pickup["bound_location"]["lat"], MUMBAI.0);
    let pickup_id = pickup["id"].as_str().unwrap().to_string();

    // About 30 m north of the bound point.
    let res = verify(&app, &pickup_id, &driver_id, "driver", (MUMBAI.0 + 0.0003, MUMBAI.1)).await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body_json(res).await["trip_status"], "picked_up");

    let load = get_json(&app, &format!("/loads/{load_id}")).await;
    assert_eq!(load["status"], "picked_up");

    let res = issue_token(
        &app,
        &trip_id,
        json!({ "phase": "delivery", "receiver_id": receiver_id }),
    )
    .await;
    assert_eq!(res.status(), StatusCode::OK);
    let delivery_id = body_json(res).await["id"].as_str().unwrap().to_string();

    let res = verify(&app, &delivery_id, &receiver_id, "receiver", DELHI).await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body_json(res).await["trip_status"], "delivered");

    let trip = get_json(&app, &format!("/trips/{trip_id}")).await;
    assert_eq!(trip["status"], "delivered");
    assert!(!trip["archived_at"].is_null());

    let load = get_json(&app, &format!("/loads/{load_id}")).await;
    assert_eq!(load["status"], "delivered");

    let status = get_json(&app, &format!("/trips/{trip_id}/verification")).await;
    assert_eq!(status["pickup_verified"], true);
    assert_eq!(status["delivery_verified"], true);
    assert_eq!(status["attempts"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn used_token_cannot_be_scanned_again() {
    let app = setup();
    let (trip_id, driver_id, _) = assigned_trip(&app).await;
    let res = issue_token(&app, &trip_id, json!({ "phase": "pickup" })).await;
    let token_id = body_json(res).await["id"].as_str().unwrap().to_string();

    let first = verify(&app, &token_id, &driver_id, "driver", MUMBAI).await;
    assert_eq!(first.status(), StatusCode::OK);

    let second = verify(&app, &token_id, &driver_id, "driver", MUMBAI).await;
    assert_eq!(second.status(), StatusCode::CONFLICT);
    let body = body_json(second).await;
    assert!(body["error"].as_str().unwrap().contains("already used"));
}

#[tokio::test]
async fn delivery_token_before_pickup_is_refused() {
    let app = setup();
    let (trip_id, _, _) = assigned_trip(&app).await;

    let res = issue_token(&app, &trip_id, json!({ "phase": "delivery" })).await;

    assert_eq!(res.status(), StatusCode::CONFLICT);
    let body = body_json(res).await;
    assert!(body["error"].as_str().unwrap().contains("before pickup"));

    let trip = get_json(&app, &format!("/trips/{trip_id}")).await;
    assert_eq!(trip["status"], "assigned");
}

#[tokio::test]
async fn pickup_token_requires_an_assigned_trip() {
    let app = setup();
    let (trip_id, _) = create_trip(&app, None).await;

    let res = issue_token(&app, &trip_id, json!({ "phase": "pickup" })).await;

    assert_eq!(res.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn distant_scan_is_refused_without_consuming_the_token() {
    let app = setup();
    let (trip_id, driver_id, _) = assigned_trip(&app).await;
    let res = issue_token(&app, &trip_id, json!({ "phase": "pickup" })).await;
    let token_id = body_json(res).await["id"].as_str().unwrap().to_string();

    let far = verify(&app, &token_id, &driver_id, "driver", PUNE).await;
    assert_eq!(far.status(), StatusCode::FORBIDDEN);

    let near = verify(&app, &token_id, &driver_id, "driver", MUMBAI).await;
    assert_eq!(near.status(), StatusCode::OK);

    let status = get_json(&app, &format!("/trips/{trip_id}/verification")).await;
    let attempts = status["attempts"].as_array().unwrap();
    assert_eq!(attempts.len(), 2);
    assert_eq!(attempts[0]["success"], false);
    assert_eq!(attempts[1]["success"], true);
}

#[tokio::test]
async fn pickup_scan_by_receiver_is_refused() {
    let app = setup();
    let (trip_id, _, _) = assigned_trip(&app).await;
    let res = issue_token(&app, &trip_id, json!({ "phase": "pickup" })).await;
    let token_id = body_json(res).await["id"].as_str().unwrap().to_string();

    let res = verify(&app, &token_id, &Uuid::new_v4().to_string(), "receiver", MUMBAI).await;

    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    let trip = get_json(&app, &format!("/trips/{trip_id}")).await;
    assert_eq!(trip["status"], "assigned");
}

#[tokio::test]
async fn pickup_scan_by_another_driver_is_refused() {
    let app = setup();
    let (trip_id, _, _) = assigned_trip(&app).await;
    let res = issue_token(&app, &trip_id, json!({ "phase": "pickup" })).await;
    let token_id = body_json(res).await["id"].as_str().unwrap().to_string();

    let res = verify(&app, &token_id, &Uuid::new_v4().to_string(), "driver", MUMBAI).await;

    assert_eq!(res.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn unknown_token_returns_404() {
    let app = setup();
    let res = verify(
        &app,
        &Uuid::new_v4().to_string(),
        &Uuid::new_v4().to_string(),
        "driver",
        MUMBAI,
    )
    .await;

    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn assigned_load_cannot_be_rejected() {
    let app = setup();
    let (trip_id, _, load_id) = assigned_trip(&app).await;

    let res = app
        .clone()
        .oneshot(empty_request("PATCH", &format!("/loads/{load_id}/reject")))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);

    let load = get_json(&app, &format!("/loads/{load_id}")).await;
    assert_eq!(load["status"], "assigned");
    assert_eq!(load["assigned_trip"], trip_id);

    let res = issue_token(&app, &trip_id, json!({ "phase": "pickup" })).await;
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn vehicle_held_by_live_trip_keeps_its_status() {
    let app = setup();
    let vehicle_id = create_vehicle(&app).await;
    let (trip_id, _) = create_trip(&app, Some(&vehicle_id)).await;

    let res = app
        .clone()
        .oneshot(json_request(
            "PATCH",
            &format!("/vehicles/{vehicle_id}/status"),
            json!({ "status": "available" }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);

    let res = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/trips",
            json!({
                "driver_id": Uuid::new_v4(),
                "vehicle_id": vehicle_id,
                "origin": place(PUNE, "Pune"),
                "destination": place(DELHI, "Delhi")
            }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);

    let res = app
        .clone()
        .oneshot(empty_request("POST", &format!("/trips/{trip_id}/abandon")))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = app
        .clone()
        .oneshot(json_request(
            "PATCH",
            &format!("/vehicles/{vehicle_id}/status"),
            json!({ "status": "inactive" }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    create_trip(&app, Some(&vehicle_id)).await;
}

#[tokio::test]
async fn forced_sweep_rematches_a_manual_trip() {
    let app = setup();
    publish_load(&app, MUMBAI, 10.0).await;
    let (trip_id, _) = create_trip(&app, None).await;
    deadhead(&app, &trip_id).await;
    sleep(Duration::from_millis(200)).await;

    let trip = get_json(&app, &format!("/trips/{trip_id}")).await;
    assert_eq!(trip["scheduling"]["phase"], "manual_selection_required");

    let mumbai = publish_load(&app, MUMBAI, 12_000.0).await;
    let res = app
        .clone()
        .oneshot(empty_request("POST", "/scheduler/run"))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = body_json(res).await;
    assert_eq!(body["passes"], 1);
    assert_eq!(body["status"]["total_runs"], 1);
    assert_eq!(body["status"]["running"], false);

    sleep(Duration::from_millis(200)).await;

    let trip = get_json(&app, &format!("/trips/{trip_id}")).await;
    assert_eq!(trip["status"], "assigned");
    assert_eq!(trip["bound_load"], mumbai);
    assert_eq!(
        trip["scheduling"]["history"],
        json!([
            "awaiting_candidates",
            "polling",
            "manual_selection_required",
            "awaiting_candidates",
            "polling",
            "assigned"
        ])
    );

    // Assigned trips are left alone.
    let res = app
        .clone()
        .oneshot(empty_request("POST", "/scheduler/run"))
        .await
        .unwrap();
    assert_eq!(body_json(res).await["passes"], 0);
}

#[tokio::test]
async fn running_sweeper_assigns_once_a_profitable_load_appears() {
    let app = setup_with_sweeper(50);
    publish_load(&app, MUMBAI, 10.0).await;
    let (trip_id, _) = create_trip(&app, None).await;
    deadhead(&app, &trip_id).await;
    sleep(Duration::from_millis(200)).await;

    let res = app
        .clone()
        .oneshot(empty_request("POST", "/scheduler/start"))
        .await
        .unwrap();
    let body = body_json(res).await;
    assert_eq!(body["changed"], true);
    assert_eq!(body["status"]["running"], true);
    assert_eq!(body["status"]["interval_ms"], 50);

    let mumbai = publish_load(&app, MUMBAI, 12_000.0).await;
    sleep(Duration::from_millis(400)).await;

    let trip = get_json(&app, &format!("/trips/{trip_id}")).await;
    assert_eq!(trip["status"], "assigned");
    assert_eq!(trip["bound_load"], mumbai);

    let status = get_json(&app, "/scheduler/status").await;
    assert_eq!(status["running"], true);
    assert!(status["total_runs"].as_u64().unwrap() >= 2);

    let res = app
        .clone()
        .oneshot(empty_request("POST", "/scheduler/stop"))
        .await
        .unwrap();
    assert_eq!(body_json(res).await["changed"], true);

    let status = get_json(&app, "/scheduler/status").await;
    assert_eq!(status["running"], false);
}
