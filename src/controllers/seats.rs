use axum::{
    extract::{Path, State},
    http::HeaderMap,
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use validator::Validate;

use crate::{
    error::ApiResult,
    middleware::HolderId,
    models::TripId,
    services::{seat_locks::LockToken, seat_map::SeatAvailability},
    AppState,
};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/trips/{trip_id}/seats", get(get_trip_seats))
        .route("/trips/{trip_id}/seat-map", delete(unload_trip))
        .route("/seats/lock", post(lock_seat))
        .route("/seats/unlock", post(unlock_seat))
}

/* ---------- SEAT MAP ---------- */

#[derive(Debug, Serialize)]
struct SeatMapResponse {
    trip_id: TripId,
    lock_ttl_seconds: i64,
    seats: Vec<SeatAvailability>,
}

// GET /api/trips/{trip_id}/seats
async fn get_trip_seats(
    State(state): State<Arc<AppState>>,
    Path(trip_id): Path<TripId>,
    headers: HeaderMap,
) -> ApiResult<Json<SeatMapResponse>> {
    let viewer = HolderId::from_headers(&headers);
    let seats = state
        .seat_map
        .seat_map(trip_id, viewer.as_ref().map(HolderId::as_str))
        .await?;

    Ok(Json(SeatMapResponse {
        trip_id,
        lock_ttl_seconds: state.config.seat_lock.ttl_seconds,
        seats,
    }))
}

// DELETE /api/trips/{trip_id}/seat-map
// Только для рейсов, уже снятых с расписания; иначе 409.
async fn unload_trip(
    State(state): State<Arc<AppState>>,
    Path(trip_id): Path<TripId>,
) -> ApiResult<Json<serde_json::Value>> {
    let removed = state.seat_map.unload(trip_id).await?;
    Ok(Json(serde_json::json!({ "success": true, "removed": removed })))
}

/* ---------- LOCK / UNLOCK ---------- */

#[derive(Debug, Deserialize, Validate)]
pub struct SeatRequest {
    #[validate(range(min = 1, message = "trip_id must be positive"))]
    pub trip_id: i64,
    #[validate(range(min = 1, message = "seat_id must be positive"))]
    pub seat_id: i64,
}

#[derive(Debug, Serialize)]
struct LockResponse {
    success: bool,
    message: &'static str,
    lock: LockToken,
}

// POST /api/seats/lock
async fn lock_seat(
    State(state): State<Arc<AppState>>,
    holder: HolderId,
    Json(req): Json<SeatRequest>,
) -> ApiResult<Json<LockResponse>> {
    req.validate()?;
    state.seat_map.ensure_materialized(req.trip_id).await?;

    let lock = state.seat_locks.lock(
        req.trip_id,
        req.seat_id,
        holder.as_str(),
        state.config.seat_lock_ttl(),
    )?;

    Ok(Json(LockResponse {
        success: true,
        message: "Seat locked, complete your booking before the hold expires",
        lock,
    }))
}

// POST /api/seats/unlock
async fn unlock_seat(
    State(state): State<Arc<AppState>>,
    holder: HolderId,
    Json(req): Json<SeatRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    req.validate()?;
    state.seat_map.ensure_materialized(req.trip_id).await?;
    state
        .seat_locks
        .unlock(req.trip_id, req.seat_id, holder.as_str())?;

    Ok(Json(serde_json::json!({
        "success": true,
        "message": "Seat released",
    })))
}
