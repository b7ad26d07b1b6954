use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::services::finalizer::BookingFinalizer;
use crate::services::seat_locks::SeatLockManager;
use crate::stores::BookingStore;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepStats {
    pub expired_locks: usize,
    pub expired_bookings: usize,
    pub failed_bookings: usize,
}

impl SweepStats {
    pub fn total_items_cleaned(&self) -> usize {
        self.expired_locks + self.expired_bookings
    }
}

/// Фоновая очистка: просроченные удержания и неоплаченные брони.
pub struct ExpirySweeper {
    seat_locks: Arc<SeatLockManager>,
    bookings: Arc<dyn BookingStore>,
    finalizer: Arc<BookingFinalizer>,
}

impl ExpirySweeper {
    pub fn new(
        seat_locks: Arc<SeatLockManager>,
        bookings: Arc<dyn BookingStore>,
        finalizer: Arc<BookingFinalizer>,
    ) -> Self {
        Self {
            seat_locks,
            bookings,
            finalizer,
        }
    }

    /// Один проход очистки: сначала удержания, потом брони.
    pub async fn run_full_sweep(&self) -> SweepStats {
        let now = self.seat_locks.now();
        let mut stats = SweepStats {
            expired_locks: self.seat_locks.expire_sweep(now),
            ..SweepStats::default()
        };

        self.expire_stale_bookings(&mut stats).await;

        if stats.total_items_cleaned() > 0 {
            info!("🧹 Sweep finished: {:?}", stats);
        } else {
            debug!("Sweep finished, nothing to clean");
        }
        stats
    }

    /// Брони `pending`, у которых истекло окно оплаты.
    async fn expire_stale_bookings(&self, stats: &mut SweepStats) {
        let cutoff = self.seat_locks.now() - self.finalizer.payment_hold();
        let stale = match self.bookings.pending_created_before(cutoff).await {
            Ok(stale) => stale,
            Err(e) => {
                // Повторим на следующем проходе
                error!("Failed to load stale pending bookings: {}", e);
                return;
            }
        };

        for booking in stale {
            match self.finalizer.expire_booking(&booking).await {
                Ok(true) => stats.expired_bookings += 1,
                Ok(false) => {}
                Err(e) => {
                    error!("Failed to expire booking {}: {}", booking.id, e);
                    stats.failed_bookings += 1;
                }
            }
        }
    }

    pub fn spawn(self: Arc<Self>, period: std::time::Duration) -> JoinHandle<()> {
        info!("Starting expiry sweeper every {:?}", period);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.run_full_sweep().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::InMemoryCatalog;
    use crate::clock::ManualClock;
    use crate::models::{BookingStatus, CustomerDetails, SeatClass, SeatMapEntry};
    use crate::stores::InMemoryBookingStore;
    use chrono::Duration;

    #[tokio::test]
    async fn sweep_expires_lapsed_holds_and_unpaid_bookings() {
        let clock = Arc::new(ManualClock::at_epoch());
        let catalog = Arc::new(InMemoryCatalog::new());
        catalog.insert_trip(
            1,
            (1..=3)
                .map(|seat_id| SeatMapEntry {
                    seat_id,
                    seat_number: format!("{}A", seat_id),
                    row_number: seat_id as i32,
                    seat_class: SeatClass::Normal,
                    position: "window".to_string(),
                    base_price: 1200.0,
                })
                .collect(),
        );
        let seat_locks = Arc::new(SeatLockManager::new(clock.clone(), Duration::seconds(120), 16));
        seat_locks.materialize(1, [1, 2, 3]);
        let store = Arc::new(InMemoryBookingStore::new(clock.clone()));
        let finalizer = Arc::new(BookingFinalizer::new(
            seat_locks.clone(),
            store.clone(),
            catalog,
            Duration::seconds(600),
        ));
        let sweeper = ExpirySweeper::new(seat_locks.clone(), store.clone(), finalizer.clone());

        seat_locks.lock(1, 1, "h1", Duration::seconds(120)).unwrap();
        seat_locks.lock(1, 2, "h2", Duration::seconds(120)).unwrap();
        let booking = finalizer
            .create_pending_booking(
                "h2",
                1,
                &[2],
                CustomerDetails {
                    full_name: "Kamau".to_string(),
                    id_number: "22".to_string(),
                    email: "k@example.com".to_string(),
                    phone: "254722000000".to_string(),
                },
            )
            .await
            .unwrap();

        clock.advance(Duration::seconds(130));
        assert_eq!(
            sweeper.run_full_sweep().await,
            SweepStats {
                expired_locks: 1,
                ..SweepStats::default()
            }
        );

        clock.advance(Duration::seconds(600));
        let stats = sweeper.run_full_sweep().await;
        assert_eq!(stats.expired_bookings, 1);
        assert_eq!(
            finalizer.find_booking(booking.id).await.unwrap().status,
            BookingStatus::Expired
        );
        assert!(seat_locks.lock(1, 2, "h3", Duration::seconds(120)).is_ok());
    }
}
