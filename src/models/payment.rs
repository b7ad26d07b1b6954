use serde::{Deserialize, Serialize};

use super::{BookingId, SeatId, TripId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Success,
    Failure,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Success => "success",
            PaymentStatus::Failure => "failure",
        }
    }
}

/// Уведомление от обработчика callback'а платёжного шлюза.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentNotification {
    pub holder_id: String,
    pub trip_id: TripId,
    pub seat_ids: Vec<SeatId>,
    pub booking_id: BookingId,
    pub status: PaymentStatus,
    #[serde(default)]
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
}
