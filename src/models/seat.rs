use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::{BookingId, SeatId, TripId};

/// Состояние места на конкретном рейсе.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SeatStatus {
    Free,
    Locked {
        holder_id: String,
        lock_id: Uuid,
        expires_at: DateTime<Utc>,
    },
    Booked {
        booking_id: BookingId,
    },
}

impl SeatStatus {
    pub fn label(&self) -> &'static str {
        match self {
            SeatStatus::Free => "FREE",
            SeatStatus::Locked { .. } => "LOCKED",
            SeatStatus::Booked { .. } => "BOOKED",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeatState {
    pub trip_id: TripId,
    pub seat_id: SeatId,
    #[serde(flatten)]
    pub status: SeatStatus,
}

impl SeatState {
    pub fn free(trip_id: TripId, seat_id: SeatId) -> Self {
        Self {
            trip_id,
            seat_id,
            status: SeatStatus::Free,
        }
    }

    pub fn locked_by(&self) -> Option<&str> {
        match &self.status {
            SeatStatus::Locked { holder_id, .. } => Some(holder_id),
            _ => None,
        }
    }

    pub fn lock_expires_at(&self) -> Option<DateTime<Utc>> {
        match &self.status {
            SeatStatus::Locked { expires_at, .. } => Some(*expires_at),
            _ => None,
        }
    }

    pub fn booking_id(&self) -> Option<BookingId> {
        match &self.status {
            SeatStatus::Booked { booking_id } => Some(*booking_id),
            _ => None,
        }
    }

    /// Единый предикат истечения: и ленивая проверка, и фоновая очистка
    /// используют только его.
    pub fn is_lock_expired_at(&self, now: DateTime<Utc>) -> bool {
        matches!(&self.status, SeatStatus::Locked { expires_at, .. } if now >= *expires_at)
    }

    pub fn is_held_by(&self, holder: &str, now: DateTime<Utc>) -> bool {
        matches!(
            &self.status,
            SeatStatus::Locked { holder_id, expires_at, .. } if holder_id == holder && now < *expires_at
        )
    }
}
