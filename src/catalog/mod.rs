//! Каталог рейсов: откуда берётся схема мест рейса и цены.

pub mod postgres;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

use crate::models::{SeatMapEntry, TripId};

pub use postgres::PgSeatCatalog;

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("trip {0} not found or not active")]
    TripNotFound(TripId),

    #[error("catalog database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[async_trait]
pub trait SeatCatalog: Send + Sync {
    /// Схема мест рейса, отсортированная по ряду и номеру места.
    async fn get_seat_map(&self, trip_id: TripId) -> Result<Vec<SeatMapEntry>, CatalogError>;

    /// Сбросить закешированную схему (если реализация кеширует).
    async fn invalidate(&self, _trip_id: TripId) {}
}

/// Каталог в памяти, для тестов и локального запуска без БД.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    trips: RwLock<HashMap<TripId, Vec<SeatMapEntry>>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_trip(&self, trip_id: TripId, mut seats: Vec<SeatMapEntry>) {
        seats.sort_by(|a, b| {
            (a.row_number, &a.seat_number).cmp(&(b.row_number, &b.seat_number))
        });
        self.trips
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(trip_id, seats);
    }

    pub fn remove_trip(&self, trip_id: TripId) {
        self.trips
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(&trip_id);
    }
}

#[async_trait]
impl SeatCatalog for InMemoryCatalog {
    async fn get_seat_map(&self, trip_id: TripId) -> Result<Vec<SeatMapEntry>, CatalogError> {
        self.trips
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(&trip_id)
            .cloned()
            .ok_or(CatalogError::TripNotFound(trip_id))
    }
}
