//! HTTP-level tests over an in-memory catalog and booking store.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use chrono::Duration;
use serde_json::{json, Value};
use tower::ServiceExt;

use bus_ticketing::catalog::InMemoryCatalog;
use bus_ticketing::clock::ManualClock;
use bus_ticketing::config::Config;
use bus_ticketing::models::{PaymentNotification, PaymentStatus, SeatClass, SeatMapEntry};
use bus_ticketing::services::payment::CallbackSigner;
use bus_ticketing::stores::InMemoryBookingStore;
use bus_ticketing::{build_router, AppState};

const SECRET: &str = "callback-secret";

struct TestApp {
    router: Router,
    clock: Arc<ManualClock>,
    catalog: Arc<InMemoryCatalog>,
    bookings: Arc<InMemoryBookingStore>,
    state: Arc<AppState>,
}

fn test_config() -> Config {
    let vars: HashMap<&str, &str> = HashMap::from([
        ("DATABASE_URL", "postgres://unused"),
        ("REDIS_URL", "redis://unused"),
        ("PAYMENT_CALLBACK_SECRET", SECRET),
    ]);
    Config::from_lookup(|name| vars.get(name).map(|v| v.to_string())).expect("test config")
}

fn test_app() -> TestApp {
    let catalog = Arc::new(InMemoryCatalog::new());
    catalog.insert_trip(
        1,
        (1..=6)
            .map(|seat_id| SeatMapEntry {
                seat_id,
                seat_number: format!("{}{}", (seat_id + 1) / 2, if seat_id % 2 == 1 { "A" } else { "B" }),
                row_number: ((seat_id + 1) / 2) as i32,
                seat_class: if seat_id <= 2 { SeatClass::Vip } else { SeatClass::Normal },
                position: if seat_id % 2 == 1 { "window" } else { "aisle" }.to_string(),
                base_price: if seat_id <= 2 { 3000.0 } else { 1500.0 },
            })
            .collect(),
    );

    let clock = Arc::new(ManualClock::at_epoch());
    let bookings = Arc::new(InMemoryBookingStore::new(clock.clone()));
    app_over(catalog, bookings, clock)
}

fn app_over(
    catalog: Arc<InMemoryCatalog>,
    bookings: Arc<InMemoryBookingStore>,
    clock: Arc<ManualClock>,
) -> TestApp {
    let state = AppState::new(test_config(), catalog.clone(), bookings.clone(), clock.clone());
    TestApp {
        router: build_router(state.clone()),
        clock,
        catalog,
        bookings,
        state,
    }
}

/// Новый процесс над теми же каталогом и хранилищем броней: состояние мест в
/// памяти потеряно.
fn restarted(app: &TestApp) -> TestApp {
    app_over(app.catalog.clone(), app.bookings.clone(), app.clock.clone())
}

async fn request_json(
    app: &Router,
    method: Method,
    path: &str,
    session: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(path);
    if let Some(session) = session {
        builder = builder.header("X-Session-Id", session);
    }
    let body = match body {
        Some(v) => {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&v).unwrap())
        }
        None => Body::empty(),
    };

    let response = app.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(json!(null));
    (status, json)
}

async fn lock(app: &Router, session: &str, seat_id: i64) -> (StatusCode, Value) {
    request_json(
        app,
        Method::POST,
        "/api/seats/lock",
        Some(session),
        Some(json!({ "trip_id": 1, "seat_id": seat_id })),
    )
    .await
}

async fn seat_status(app: &Router, session: Option<&str>, seat_id: i64) -> Value {
    let (status, body) = request_json(app, Method::GET, "/api/trips/1/seats", session, None).await;
    assert_eq!(status, StatusCode::OK, "seat map failed: {body:?}");
    body["seats"]
        .as_array()
        .unwrap()
        .iter()
        .find(|s| s["seat_id"] == seat_id)
        .cloned()
        .unwrap()
}

fn booking_request(seat_ids: &[i64]) -> Value {
    json!({
        "trip_id": 1,
        "seat_ids": seat_ids,
        "full_name": "Achieng Odhiambo",
        "id_number": "29876543",
        "email": "Achieng@Example.com",
        "phone": "+254700123456",
    })
}

fn signed_callback(booking: &Value, session: &str, status: PaymentStatus) -> Value {
    let mut notification = PaymentNotification {
        holder_id: session.to_string(),
        trip_id: 1,
        seat_ids: serde_json::from_value(booking["seat_ids"].clone()).unwrap(),
        booking_id: booking["id"].as_i64().unwrap(),
        status,
        transaction_id: Some("QK8TEST01".to_string()),
        token: None,
    };
    notification.token = CallbackSigner::new(Some(SECRET.to_string())).sign(&notification);
    serde_json::to_value(notification).unwrap()
}

#[tokio::test]
async fn health_endpoints_respond() {
    let app = test_app();
    let (status, _) = request_json(&app.router, Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn second_session_is_refused_until_hold_expires() {
    let app = test_app();

    let (status, body) = lock(&app.router, "alice", 3).await;
    assert_eq!(status, StatusCode::OK, "{body:?}");
    assert_eq!(body["lock"]["holder_id"], "alice");

    let (status, body) = lock(&app.router, "bob", 3).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "SEAT_UNAVAILABLE");
    assert_eq!(body["success"], false);

    let seat = seat_status(&app.router, Some("bob"), 3).await;
    assert_eq!(seat["status"], "LOCKED");
    assert_eq!(seat["held_by_you"], false);
    assert!(seat.get("lock_expires_at").is_none());

    app.clock.advance(Duration::seconds(121));
    let (status, _) = lock(&app.router, "bob", 3).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn session_header_is_required_for_locking() {
    let app = test_app();
    let (status, body) = request_json(
        &app.router,
        Method::POST,
        "/api/seats/lock",
        None,
        Some(json!({ "trip_id": 1, "seat_id": 3 })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "MISSING_SESSION");
}

#[tokio::test]
async fn unknown_seat_and_trip_are_not_found() {
    let app = test_app();

    let (status, body) = lock(&app.router, "alice", 99).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "SEAT_NOT_FOUND");

    let (status, body) = request_json(&app.router, Method::GET, "/api/trips/42/seats", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "TRIP_NOT_FOUND");
}

#[tokio::test]
async fn unlock_twice_then_not_holder() {
    let app = test_app();
    lock(&app.router, "alice", 4).await;

    let unlock = || {
        request_json(
            &app.router,
            Method::POST,
            "/api/seats/unlock",
            Some("alice"),
            Some(json!({ "trip_id": 1, "seat_id": 4 })),
        )
    };
    assert_eq!(unlock().await.0, StatusCode::OK);
    let (status, body) = unlock().await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "NOT_LOCK_HOLDER");
}

#[tokio::test]
async fn booking_paid_through_callback_sells_seats() {
    let app = test_app();
    lock(&app.router, "alice", 1).await;
    lock(&app.router, "alice", 3).await;

    let (status, body) = request_json(
        &app.router,
        Method::POST,
        "/api/bookings",
        Some("alice"),
        Some(booking_request(&[1, 3])),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body:?}");
    let booking = body["booking"].clone();
    assert_eq!(booking["status"], "pending");
    assert_eq!(booking["total_amount"], 4500.0);
    assert_eq!(booking["customer"]["email"], "achieng@example.com");
    assert!(booking.get("holder_id").is_none());

    let callback = signed_callback(&booking, "alice", PaymentStatus::Success);
    let (status, body) =
        request_json(&app.router, Method::POST, "/api/webhook/payment", None, Some(callback.clone())).await;
    assert_eq!(status, StatusCode::OK, "{body:?}");
    assert_eq!(body["outcome"], "booked");

    // Повторная доставка
    let (status, body) =
        request_json(&app.router, Method::POST, "/api/webhook/payment", None, Some(callback)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "ignored");
    assert_eq!(body["status"], "paid");

    assert_eq!(seat_status(&app.router, None, 1).await["status"], "BOOKED");
    let (status, body) = lock(&app.router, "bob", 3).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "SEAT_ALREADY_BOOKED");

    let path = format!("/api/bookings/{}", booking["id"]);
    let (status, body) = request_json(&app.router, Method::GET, &path, Some("alice"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "paid");
    let (status, _) = request_json(&app.router, Method::GET, &path, Some("bob"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn failed_payment_returns_seats_to_pool() {
    let app = test_app();
    lock(&app.router, "alice", 5).await;
    let (_, body) = request_json(
        &app.router,
        Method::POST,
        "/api/bookings",
        Some("alice"),
        Some(booking_request(&[5])),
    )
    .await;
    let booking = body["booking"].clone();

    let callback = signed_callback(&booking, "alice", PaymentStatus::Failure);
    let (status, body) =
        request_json(&app.router, Method::POST, "/api/webhook/payment", None, Some(callback)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "released");
    assert_eq!(body["seats"], json!([5]));

    let (status, _) = lock(&app.router, "bob", 5).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn callback_with_bad_token_is_forbidden() {
    let app = test_app();
    lock(&app.router, "alice", 6).await;
    let (_, body) = request_json(
        &app.router,
        Method::POST,
        "/api/bookings",
        Some("alice"),
        Some(booking_request(&[6])),
    )
    .await;

    let mut callback = signed_callback(&body["booking"], "alice", PaymentStatus::Success);
    callback["token"] = json!("0000");
    let (status, body) =
        request_json(&app.router, Method::POST, "/api/webhook/payment", None, Some(callback)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "INVALID_TOKEN");
}

#[tokio::test]
async fn booking_requires_held_seats_and_valid_customer() {
    let app = test_app();
    lock(&app.router, "alice", 2).await;

    let (status, body) = request_json(
        &app.router,
        Method::POST,
        "/api/bookings",
        Some("alice"),
        Some(booking_request(&[2, 4])),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "PARTIAL_LOCK_LOSS");

    let mut request = booking_request(&[2]);
    request["email"] = json!("nope");
    let (status, body) =
        request_json(&app.router, Method::POST, "/api/bookings", Some("alice"), Some(request)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn sweep_releases_unpaid_booking_after_payment_window() {
    let app = test_app();
    lock(&app.router, "alice", 4).await;
    let (_, body) = request_json(
        &app.router,
        Method::POST,
        "/api/bookings",
        Some("alice"),
        Some(booking_request(&[4])),
    )
    .await;
    let booking_id = body["booking"]["id"].as_i64().unwrap();

    app.clock.advance(Duration::seconds(601));
    let stats = app.state.sweeper().run_full_sweep().await;
    assert_eq!(stats.expired_bookings, 1);

    let path = format!("/api/bookings/{booking_id}");
    let (_, body) = request_json(&app.router, Method::GET, &path, Some("alice"), None).await;
    assert_eq!(body["status"], "expired");
    assert_eq!(seat_status(&app.router, None, 4).await["is_available"], true);
}

async fn pending_booking(app: &Router, session: &str, seat_ids: &[i64]) -> Value {
    for seat_id in seat_ids {
        let (status, body) = lock(app, session, *seat_id).await;
        assert_eq!(status, StatusCode::OK, "{body:?}");
    }
    let (status, body) = request_json(
        app,
        Method::POST,
        "/api/bookings",
        Some(session),
        Some(booking_request(seat_ids)),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body:?}");
    body["booking"].clone()
}

#[tokio::test]
async fn success_callback_after_restart_books_restored_holds() {
    let app = test_app();
    let booking = pending_booking(&app.router, "alice", &[1]).await;

    let app = restarted(&app);
    assert!(!app.state.seat_locks.has_trip(1));

    let callback = signed_callback(&booking, "alice", PaymentStatus::Success);
    let (status, body) =
        request_json(&app.router, Method::POST, "/api/webhook/payment", None, Some(callback)).await;
    assert_eq!(status, StatusCode::OK, "{body:?}");
    assert_eq!(body["outcome"], "booked");
    assert_eq!(seat_status(&app.router, None, 1).await["status"], "BOOKED");
}

#[tokio::test]
async fn failure_callback_after_restart_releases_restored_holds() {
    let app = test_app();
    let booking = pending_booking(&app.router, "alice", &[3, 4]).await;

    let app = restarted(&app);
    let callback = signed_callback(&booking, "alice", PaymentStatus::Failure);
    let (status, body) =
        request_json(&app.router, Method::POST, "/api/webhook/payment", None, Some(callback)).await;
    assert_eq!(status, StatusCode::OK, "{body:?}");
    assert_eq!(body["outcome"], "released");
    assert_eq!(body["seats"], json!([3, 4]));

    let (status, _) = lock(&app.router, "bob", 3).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn cancelling_paid_booking_after_restart_frees_seats() {
    let app = test_app();
    let booking = pending_booking(&app.router, "alice", &[2]).await;
    let callback = signed_callback(&booking, "alice", PaymentStatus::Success);
    let (_, body) =
        request_json(&app.router, Method::POST, "/api/webhook/payment", None, Some(callback)).await;
    assert_eq!(body["outcome"], "booked");

    let app = restarted(&app);
    let path = format!("/api/bookings/{}/cancel", booking["id"]);
    let (status, body) = request_json(&app.router, Method::POST, &path, Some("alice"), None).await;
    assert_eq!(status, StatusCode::OK, "{body:?}");
    assert_eq!(body["status"], "cancelled");

    let (status, _) = lock(&app.router, "bob", 2).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn unloading_scheduled_trip_keeps_live_holds() {
    let app = test_app();
    let (status, _) = lock(&app.router, "alice", 2).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) =
        request_json(&app.router, Method::DELETE, "/api/trips/1/seat-map", None, None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "TRIP_STILL_SCHEDULED");

    let (status, body) = lock(&app.router, "bob", 2).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "SEAT_UNAVAILABLE");

    // Рейс снят с расписания: теперь можно
    app.catalog.remove_trip(1);
    let (status, body) =
        request_json(&app.router, Method::DELETE, "/api/trips/1/seat-map", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["removed"], true);
}

#[tokio::test]
async fn unloading_after_restart_keeps_restored_holds() {
    let app = test_app();
    pending_booking(&app.router, "alice", &[5]).await;

    let app = restarted(&app);
    let (status, _) =
        request_json(&app.router, Method::DELETE, "/api/trips/1/seat-map", None, None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = lock(&app.router, "bob", 5).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "SEAT_UNAVAILABLE");
    assert_eq!(seat_status(&app.router, Some("alice"), 5).await["held_by_you"], true);
}
