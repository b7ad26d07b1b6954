use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use super::SeatId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeatClass {
    Vip,
    Business,
    Normal,
}

impl SeatClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeatClass::Vip => "vip",
            SeatClass::Business => "business",
            SeatClass::Normal => "normal",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            SeatClass::Vip => "VIP",
            SeatClass::Business => "Business",
            SeatClass::Normal => "Normal/Economy",
        }
    }
}

impl fmt::Display for SeatClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SeatClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "vip" => Ok(SeatClass::Vip),
            "business" => Ok(SeatClass::Business),
            "normal" => Ok(SeatClass::Normal),
            other => Err(format!("unknown seat class '{}'", other)),
        }
    }
}

/// Строка схемы мест рейса, как её отдаёт каталог.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeatMapEntry {
    pub seat_id: SeatId,
    pub seat_number: String,
    pub row_number: i32,
    pub seat_class: SeatClass,
    /// window | aisle | middle
    pub position: String,
    pub base_price: f64,
}
