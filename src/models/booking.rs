use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use uuid::Uuid;

use super::{BookingId, SeatId, TripId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Paid,
    Failed,
    Expired,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Paid => "paid",
            BookingStatus::Failed => "failed",
            BookingStatus::Expired => "expired",
            BookingStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BookingStatus::Pending),
            "paid" => Ok(BookingStatus::Paid),
            "failed" => Ok(BookingStatus::Failed),
            "expired" => Ok(BookingStatus::Expired),
            "cancelled" => Ok(BookingStatus::Cancelled),
            other => Err(format!("unknown booking status '{}'", other)),
        }
    }
}

/// Данные покупателя (без регистрации).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerDetails {
    pub full_name: String,
    pub id_number: String,
    pub email: String,
    pub phone: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeatLine {
    pub seat_id: SeatId,
    pub fare: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewBooking {
    pub reference: String,
    pub trip_id: TripId,
    pub holder_id: String,
    pub seats: Vec<SeatLine>,
    pub total_amount: f64,
    pub customer: CustomerDetails,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Booking {
    pub id: BookingId,
    pub reference: String,
    pub trip_id: TripId,
    #[serde(skip_serializing)]
    pub holder_id: String,
    pub seat_ids: Vec<SeatId>,
    pub total_amount: f64,
    pub status: BookingStatus,
    pub customer: CustomerDetails,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Номер брони вида `BK1A2B3C4D`.
pub fn generate_booking_reference() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("BK{}", hex[..8].to_uppercase())
}
