use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use validator::{Validate, ValidationError};

use crate::{
    error::{ApiError, ApiResult},
    middleware::HolderId,
    models::{Booking, BookingId, CustomerDetails},
    AppState,
};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/bookings", post(create_booking))
        .route("/bookings/{booking_id}", get(get_booking))
        .route("/bookings/{booking_id}/cancel", post(cancel_booking))
}

fn validate_phone(phone: &str) -> Result<(), ValidationError> {
    let digits = phone.strip_prefix('+').unwrap_or(phone);
    if (9..=15).contains(&digits.len()) && digits.chars().all(|c| c.is_ascii_digit()) {
        Ok(())
    } else {
        Err(ValidationError::new("phone").with_message("phone must be 9-15 digits".into()))
    }
}

// POST /api/bookings
#[derive(Debug, Deserialize, Validate)]
pub struct CreateBookingRequest {
    #[validate(range(min = 1))]
    pub trip_id: i64,
    #[validate(length(min = 1, max = 10, message = "select between 1 and 10 seats"))]
    pub seat_ids: Vec<i64>,
    #[validate(length(min = 2, max = 200))]
    pub full_name: String,
    #[validate(length(min = 4, max = 20))]
    pub id_number: String,
    #[validate(email)]
    pub email: String,
    #[validate(custom(function = "validate_phone"))]
    pub phone: String,
}

#[derive(Debug, Serialize)]
struct CreateBookingResponse {
    success: bool,
    booking: Booking,
    payment_window_seconds: i64,
}

async fn create_booking(
    State(state): State<Arc<AppState>>,
    holder: HolderId,
    Json(req): Json<CreateBookingRequest>,
) -> ApiResult<impl IntoResponse> {
    req.validate()?;
    state.seat_map.ensure_materialized(req.trip_id).await?;

    let booking = state
        .finalizer
        .create_pending_booking(
            holder.as_str(),
            req.trip_id,
            &req.seat_ids,
            CustomerDetails {
                full_name: req.full_name.trim().to_string(),
                id_number: req.id_number.trim().to_string(),
                email: req.email.trim().to_lowercase(),
                phone: req.phone,
            },
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateBookingResponse {
            success: true,
            booking,
            payment_window_seconds: state.finalizer.payment_hold().num_seconds(),
        }),
    ))
}

// GET /api/bookings/{booking_id}
async fn get_booking(
    State(state): State<Arc<AppState>>,
    holder: HolderId,
    Path(booking_id): Path<BookingId>,
) -> ApiResult<Json<Booking>> {
    let booking = state.finalizer.find_booking(booking_id).await?;
    // Чужие брони не показываем
    if booking.holder_id != holder.as_str() {
        return Err(ApiError::not_found(
            "BOOKING_NOT_FOUND",
            format!("booking {} not found", booking_id),
        ));
    }
    Ok(Json(booking))
}

// POST /api/bookings/{booking_id}/cancel
async fn cancel_booking(
    State(state): State<Arc<AppState>>,
    holder: HolderId,
    Path(booking_id): Path<BookingId>,
) -> ApiResult<Json<Booking>> {
    let booking = state.finalizer.find_booking(booking_id).await?;
    if booking.holder_id != holder.as_str() {
        return Err(ApiError::forbidden(
            "NOT_BOOKING_OWNER",
            "booking belongs to another session",
        ));
    }
    state.seat_map.ensure_materialized(booking.trip_id).await?;
    Ok(Json(state.finalizer.cancel_booking(booking_id).await?))
}
