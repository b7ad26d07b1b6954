use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::error;

use crate::catalog::CatalogError;
use crate::services::finalizer::BookingError;
use crate::services::seat_locks::LockError;
use crate::services::seat_map::SeatMapError;
use crate::stores::StoreError;

/// Ошибка HTTP-слоя: статус плюс тело `{success, code, message}`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

#[derive(Serialize)]
struct ApiErrorBody<'a> {
    success: bool,
    code: &'a str,
    message: &'a str,
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "MISSING_SESSION", message)
    }

    pub fn forbidden(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, code, message)
    }

    pub fn not_found(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, code, message)
    }

    /// Подробности уходят в лог, клиенту: общее сообщение.
    pub fn internal(context: &str, err: &dyn std::error::Error) -> Self {
        error!("{}: {}", context, err);
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_ERROR",
            "Internal server error, please try again",
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorBody {
            success: false,
            code: self.code,
            message: &self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<LockError> for ApiError {
    fn from(err: LockError) -> Self {
        let status = match &err {
            LockError::SeatNotFound { .. } => StatusCode::NOT_FOUND,
            LockError::NotLockHolder { .. } => StatusCode::FORBIDDEN,
            LockError::EmptySeatSet | LockError::InvalidTtl => StatusCode::BAD_REQUEST,
            LockError::SeatUnavailable { .. }
            | LockError::SeatAlreadyBooked { .. }
            | LockError::LockExpired { .. }
            | LockError::PartialLockLoss { .. }
            | LockError::BookingMismatch { .. } => StatusCode::CONFLICT,
        };
        Self::new(status, err.code(), err.to_string())
    }
}

impl From<CatalogError> for ApiError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::TripNotFound(_) => Self::not_found("TRIP_NOT_FOUND", err.to_string()),
            CatalogError::Database(ref e) => Self::internal("Catalog lookup failed", e),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        Self::internal("Booking store failed", &err)
    }
}

impl From<SeatMapError> for ApiError {
    fn from(err: SeatMapError) -> Self {
        match err {
            SeatMapError::Catalog(e) => e.into(),
            SeatMapError::Store(e) => e.into(),
            SeatMapError::TripStillScheduled(_) => {
                Self::new(StatusCode::CONFLICT, "TRIP_STILL_SCHEDULED", err.to_string())
            }
        }
    }
}

impl From<BookingError> for ApiError {
    fn from(err: BookingError) -> Self {
        match err {
            BookingError::Lock(e) => e.into(),
            BookingError::Catalog(e) => e.into(),
            BookingError::Store(e) => e.into(),
            BookingError::BookingNotFound(_) => Self::not_found("BOOKING_NOT_FOUND", err.to_string()),
            BookingError::SeatNotPriced(_) => Self::not_found("SEAT_NOT_FOUND", err.to_string()),
            BookingError::BookingMismatch(_) => {
                Self::new(StatusCode::CONFLICT, "BOOKING_MISMATCH", err.to_string())
            }
            BookingError::InvalidStatus { .. } => {
                Self::new(StatusCode::CONFLICT, "INVALID_BOOKING_STATUS", err.to_string())
            }
        }
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(err: validator::ValidationErrors) -> Self {
        Self::bad_request(err.to_string())
    }
}
