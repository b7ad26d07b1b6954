use axum::{extract::State, routing::post, Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::warn;

use crate::{
    error::{ApiError, ApiResult},
    models::PaymentNotification,
    services::finalizer::FinalizeOutcome,
    AppState,
};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/webhook/payment", post(payment_webhook))
}

/// POST /api/webhook/payment
///
/// Callback шлюза после подтверждения (или отказа) платежа на телефоне покупателя.
/// Повторная доставка безопасна: бронь обрабатывается только пока она `pending`.
pub async fn payment_webhook(
    State(state): State<Arc<AppState>>,
    Json(notification): Json<PaymentNotification>,
) -> ApiResult<Json<Value>> {
    if !state.signer.verify(&notification) {
        warn!(
            "Rejected payment callback for booking {}: bad token",
            notification.booking_id
        );
        return Err(ApiError::forbidden("INVALID_TOKEN", "callback token mismatch"));
    }

    // После рестарта места рейса могут быть ещё не загружены
    let booking = state.finalizer.find_booking(notification.booking_id).await?;
    state.seat_map.ensure_materialized(booking.trip_id).await?;

    let body = match state.finalizer.handle_payment(&notification).await? {
        FinalizeOutcome::Booked { booking_id } => json!({
            "received": true,
            "outcome": "booked",
            "booking_id": booking_id,
        }),
        FinalizeOutcome::Released { seats } => json!({
            "received": true,
            "outcome": "released",
            "seats": seats,
        }),
        FinalizeOutcome::Rejected { error } => json!({
            "received": true,
            "outcome": "rejected",
            "code": error.code(),
            "message": error.to_string(),
            "refund_required": true,
        }),
        FinalizeOutcome::Ignored { status } => json!({
            "received": true,
            "outcome": "ignored",
            "status": status,
        }),
    };

    Ok(Json(body))
}
