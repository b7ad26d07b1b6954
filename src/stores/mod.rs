//! Хранилище бронирований.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{Booking, BookingId, BookingStatus, NewBooking, PaymentStatus, SeatId, TripId};

pub use memory::InMemoryBookingStore;
pub use postgres::PgBookingStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("booking database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt booking record: {0}")]
    Corrupt(String),
}

/// Место, занятое действующей бронью (pending или paid).
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveSeat {
    pub seat_id: SeatId,
    pub booking_id: BookingId,
    pub holder_id: String,
    pub status: BookingStatus,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait BookingStore: Send + Sync {
    async fn create_pending(&self, booking: NewBooking) -> Result<Booking, StoreError>;

    async fn find(&self, booking_id: BookingId) -> Result<Option<Booking>, StoreError>;

    /// Сравнить-и-заменить статус. `false`, если бронь уже не в статусе `from`.
    async fn transition(
        &self,
        booking_id: BookingId,
        from: BookingStatus,
        to: BookingStatus,
    ) -> Result<bool, StoreError>;

    /// Места рейса под действующими бронями, для восстановления состояния мест.
    async fn active_seats(&self, trip_id: TripId) -> Result<Vec<ActiveSeat>, StoreError>;

    async fn pending_created_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Booking>, StoreError>;

    async fn record_payment(
        &self,
        booking_id: BookingId,
        transaction_id: Option<&str>,
        status: PaymentStatus,
    ) -> Result<(), StoreError>;
}
