use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::catalog::{CatalogError, SeatCatalog};
use crate::models::{BookingStatus, SeatId, SeatMapEntry, SeatState, SeatStatus, TripId};
use crate::services::seat_locks::SeatLockManager;
use crate::stores::{BookingStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum SeatMapError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("trip {0} is still scheduled, its seat states are kept")]
    TripStillScheduled(TripId),
}

/// Место для отображения: данные каталога плюс живой статус.
#[derive(Debug, Clone, Serialize)]
pub struct SeatAvailability {
    #[serde(flatten)]
    pub seat: SeatMapEntry,
    pub seat_class_display: &'static str,
    pub status: &'static str,
    pub is_available: bool,
    pub is_locked: bool,
    pub held_by_you: bool,
    /// Только для собственных удержаний смотрящего.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock_expires_at: Option<DateTime<Utc>>,
}

pub struct SeatMapService {
    catalog: Arc<dyn SeatCatalog>,
    bookings: Arc<dyn BookingStore>,
    seat_locks: Arc<SeatLockManager>,
    payment_hold: Duration,
}

impl SeatMapService {
    pub fn new(
        catalog: Arc<dyn SeatCatalog>,
        bookings: Arc<dyn BookingStore>,
        seat_locks: Arc<SeatLockManager>,
        payment_hold: Duration,
    ) -> Self {
        Self {
            catalog,
            bookings,
            seat_locks,
            payment_hold,
        }
    }

    /// Загружает места рейса в менеджер блокировок при первом обращении.
    /// Оплаченные брони становятся BOOKED, ожидающие оплаты снова удерживаются
    /// своим покупателем до конца окна оплаты.
    pub async fn ensure_loaded(&self, trip_id: TripId) -> Result<Vec<SeatMapEntry>, SeatMapError> {
        let seats = self.catalog.get_seat_map(trip_id).await?;
        if self.seat_locks.has_trip(trip_id) {
            return Ok(seats);
        }

        let now = self.seat_locks.now();
        let mut restored: HashMap<SeatId, SeatStatus> = HashMap::new();
        for active in self.bookings.active_seats(trip_id).await? {
            let status = match active.status {
                BookingStatus::Paid => SeatStatus::Booked {
                    booking_id: active.booking_id,
                },
                BookingStatus::Pending if active.created_at + self.payment_hold > now => {
                    SeatStatus::Locked {
                        holder_id: active.holder_id,
                        lock_id: Uuid::new_v4(),
                        expires_at: active.created_at + self.payment_hold,
                    }
                }
                _ => continue,
            };
            restored.insert(active.seat_id, status);
        }

        let restored_count = restored.len();
        let states: Vec<SeatState> = seats
            .iter()
            .map(|seat| SeatState {
                trip_id,
                seat_id: seat.seat_id,
                status: restored.remove(&seat.seat_id).unwrap_or(SeatStatus::Free),
            })
            .collect();

        self.seat_locks.materialize_states(trip_id, states);
        if restored_count > 0 {
            info!("Restored {} held or booked seats for trip {}", restored_count, trip_id);
        }
        Ok(seats)
    }

    /// Как `ensure_loaded`, но без похода в каталог, если рейс уже загружен.
    pub async fn ensure_materialized(&self, trip_id: TripId) -> Result<(), SeatMapError> {
        if !self.seat_locks.has_trip(trip_id) {
            self.ensure_loaded(trip_id).await?;
        }
        Ok(())
    }

    pub async fn seat_map(
        &self,
        trip_id: TripId,
        viewer: Option<&str>,
    ) -> Result<Vec<SeatAvailability>, SeatMapError> {
        let seats = self.ensure_loaded(trip_id).await?;
        let now = self.seat_locks.now();
        let states: HashMap<SeatId, SeatState> = self
            .seat_locks
            .snapshot(trip_id)
            .unwrap_or_default()
            .into_iter()
            .map(|state| (state.seat_id, state))
            .collect();

        Ok(seats
            .into_iter()
            .map(|seat| {
                let state = states.get(&seat.seat_id);
                let status = state.map_or(SeatStatus::Free.label(), |s| s.status.label());
                let held_by_you = match (state, viewer) {
                    (Some(state), Some(viewer)) => state.is_held_by(viewer, now),
                    _ => false,
                };

                SeatAvailability {
                    seat_class_display: seat.seat_class.display_name(),
                    status,
                    is_available: matches!(state.map(|s| &s.status), None | Some(SeatStatus::Free)),
                    is_locked: matches!(state.map(|s| &s.status), Some(SeatStatus::Locked { .. })),
                    held_by_you,
                    lock_expires_at: state
                        .filter(|_| held_by_you)
                        .and_then(|s| s.lock_expires_at()),
                    seat,
                }
            })
            .collect())
    }

    /// Рейс отменён или удалён из расписания. Состояния мест сбрасываются
    /// только если каталог рейса больше не знает.
    pub async fn unload(&self, trip_id: TripId) -> Result<bool, SeatMapError> {
        self.catalog.invalidate(trip_id).await;
        match self.catalog.get_seat_map(trip_id).await {
            Ok(_) => {
                warn!("Refusing to unload trip {}: it is still in the catalog", trip_id);
                Err(SeatMapError::TripStillScheduled(trip_id))
            }
            Err(CatalogError::TripNotFound(_)) => Ok(self.seat_locks.remove_trip(trip_id)),
            Err(e) => Err(e.into()),
        }
    }
}
