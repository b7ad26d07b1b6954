//! finalizer.rs
//!
//! Оформление брони поверх удержаний мест.
//!
//! 1.  `create_pending_booking`: покупатель заполнил данные, продлеваем его
//!     удержания на окно оплаты и сохраняем бронь в статусе `pending`.
//! 2.  `handle_payment`: пришёл callback шлюза. Успех: удержания превращаются в
//!     BOOKED одним атомарным `confirm`. Неудача: удержания освобождаются.
//! 3.  `cancel_booking`: отмена оплаченной или ещё не оплаченной брони.
//!
//! Менеджер мест остаётся единственным, кто решает, можно ли продать место.
//! Статус брони в БД меняется только через сравнить-и-заменить.

use chrono::Duration;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::catalog::{CatalogError, SeatCatalog};
use crate::models::{
    booking::generate_booking_reference, Booking, BookingId, BookingStatus, CustomerDetails,
    NewBooking, PaymentNotification, PaymentStatus, SeatId, SeatLine, TripId,
};
use crate::services::seat_locks::{LockError, SeatLockManager};
use crate::stores::{BookingStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("booking {0} not found")]
    BookingNotFound(BookingId),

    #[error("payment notification does not match booking {0}")]
    BookingMismatch(BookingId),

    #[error("booking {booking_id} is {status} and cannot be {action}")]
    InvalidStatus {
        booking_id: BookingId,
        status: BookingStatus,
        action: &'static str,
    },

    #[error("seat {0} is not sold on this trip")]
    SeatNotPriced(SeatId),
}

/// Итог обработки уведомления об оплате.
#[derive(Debug, Clone, PartialEq)]
pub enum FinalizeOutcome {
    /// Места проданы, бронь оплачена.
    Booked { booking_id: BookingId },
    /// Оплата не прошла, удержания покупателя освобождены.
    Released { seats: Vec<SeatId> },
    /// Деньги списаны, но места продать нельзя: нужен возврат.
    Rejected { error: LockError },
    /// Бронь уже не ждёт оплаты (повторная доставка callback'а).
    Ignored { status: BookingStatus },
}

fn normalized(seat_ids: &[SeatId]) -> Vec<SeatId> {
    let mut ids = seat_ids.to_vec();
    ids.sort_unstable();
    ids.dedup();
    ids
}

pub struct BookingFinalizer {
    seat_locks: Arc<SeatLockManager>,
    bookings: Arc<dyn BookingStore>,
    catalog: Arc<dyn SeatCatalog>,
    payment_hold: Duration,
}

impl BookingFinalizer {
    pub fn new(
        seat_locks: Arc<SeatLockManager>,
        bookings: Arc<dyn BookingStore>,
        catalog: Arc<dyn SeatCatalog>,
        payment_hold: Duration,
    ) -> Self {
        Self {
            seat_locks,
            bookings,
            catalog,
            payment_hold,
        }
    }

    pub fn payment_hold(&self) -> Duration {
        self.payment_hold
    }

    pub async fn find_booking(&self, booking_id: BookingId) -> Result<Booking, BookingError> {
        self.bookings
            .find(booking_id)
            .await?
            .ok_or(BookingError::BookingNotFound(booking_id))
    }

    /// Создаёт бронь `pending` из мест, которые покупатель сейчас удерживает.
    pub async fn create_pending_booking(
        &self,
        holder_id: &str,
        trip_id: TripId,
        seat_ids: &[SeatId],
        customer: CustomerDetails,
    ) -> Result<Booking, BookingError> {
        let seat_ids = normalized(seat_ids);
        if seat_ids.is_empty() {
            return Err(LockError::EmptySeatSet.into());
        }

        // Цены из каталога по классу места
        let fares: HashMap<SeatId, f64> = self
            .catalog
            .get_seat_map(trip_id)
            .await?
            .into_iter()
            .map(|seat| (seat.seat_id, seat.base_price))
            .collect();
        let seats = seat_ids
            .iter()
            .map(|seat_id| {
                fares
                    .get(seat_id)
                    .map(|fare| SeatLine {
                        seat_id: *seat_id,
                        fare: *fare,
                    })
                    .ok_or(BookingError::SeatNotPriced(*seat_id))
            })
            .collect::<Result<Vec<_>, _>>()?;

        // Все удержания должны быть живы; продлеваем их на окно оплаты
        let held_until = self
            .seat_locks
            .extend(trip_id, &seat_ids, holder_id, self.payment_hold)?;

        let total_amount = seats.iter().map(|line| line.fare).sum();
        let booking = self
            .bookings
            .create_pending(NewBooking {
                reference: generate_booking_reference(),
                trip_id,
                holder_id: holder_id.to_string(),
                seats,
                total_amount,
                customer,
            })
            .await
            .inspect_err(|e| {
                error!("Failed to store pending booking for trip {}: {}", trip_id, e);
            })?;

        info!(
            "🎫 Booking {} ({}) pending payment of {:.2}, seats {:?} held until {}",
            booking.id, booking.reference, booking.total_amount, booking.seat_ids, held_until
        );
        Ok(booking)
    }

    /// Обрабатывает уведомление шлюза. Повторная доставка безопасна.
    pub async fn handle_payment(
        &self,
        notification: &PaymentNotification,
    ) -> Result<FinalizeOutcome, BookingError> {
        info!(
            "Processing payment callback: booking_id={}, status={}",
            notification.booking_id,
            notification.status.as_str()
        );

        let booking = self.find_booking(notification.booking_id).await?;
        let seat_ids = normalized(&notification.seat_ids);
        if booking.trip_id != notification.trip_id
            || booking.holder_id != notification.holder_id
            || booking.seat_ids != seat_ids
        {
            warn!(
                "Payment callback for booking {} does not match the stored booking",
                booking.id
            );
            return Err(BookingError::BookingMismatch(booking.id));
        }

        self.bookings
            .record_payment(
                booking.id,
                notification.transaction_id.as_deref(),
                notification.status,
            )
            .await?;

        if booking.status != BookingStatus::Pending {
            info!(
                "Booking {} is already {}, callback ignored",
                booking.id, booking.status
            );
            return Ok(FinalizeOutcome::Ignored {
                status: booking.status,
            });
        }

        match notification.status {
            PaymentStatus::Success => self.process_successful_payment(&booking).await,
            PaymentStatus::Failure => self.process_failed_payment(&booking).await,
        }
    }

    async fn process_successful_payment(
        &self,
        booking: &Booking,
    ) -> Result<FinalizeOutcome, BookingError> {
        match self.seat_locks.confirm(
            booking.trip_id,
            &booking.seat_ids,
            &booking.holder_id,
            booking.id,
        ) {
            Ok(()) => {
                if self
                    .bookings
                    .transition(booking.id, BookingStatus::Pending, BookingStatus::Paid)
                    .await?
                {
                    info!("✅ Booking {} paid, seats {:?} booked", booking.id, booking.seat_ids);
                    return Ok(FinalizeOutcome::Booked {
                        booking_id: booking.id,
                    });
                }

                // Бронь успела истечь или отмениться, пока мы подтверждали места
                let current = self.find_booking(booking.id).await?.status;
                if let Err(e) = self
                    .seat_locks
                    .cancel(booking.trip_id, &booking.seat_ids, booking.id)
                {
                    error!("Failed to release seats of booking {}: {}", booking.id, e);
                }
                warn!(
                    "Booking {} became {} during confirmation; seats released, refund required",
                    booking.id, current
                );
                Ok(FinalizeOutcome::Ignored { status: current })
            }
            Err(lock_error) => {
                warn!(
                    "💸 Booking {} paid but seats could not be confirmed ({}); refund required",
                    booking.id, lock_error
                );
                self.seat_locks.release_holder(
                    booking.trip_id,
                    &booking.seat_ids,
                    &booking.holder_id,
                );
                self.bookings
                    .transition(booking.id, BookingStatus::Pending, BookingStatus::Failed)
                    .await?;
                Ok(FinalizeOutcome::Rejected { error: lock_error })
            }
        }
    }

    async fn process_failed_payment(
        &self,
        booking: &Booking,
    ) -> Result<FinalizeOutcome, BookingError> {
        let released: Vec<SeatId> = booking
            .seat_ids
            .iter()
            .copied()
            .filter(|seat_id| {
                self.seat_locks
                    .unlock(booking.trip_id, *seat_id, &booking.holder_id)
                    .is_ok()
            })
            .collect();

        self.bookings
            .transition(booking.id, BookingStatus::Pending, BookingStatus::Failed)
            .await?;

        info!(
            "❌ Payment for booking {} failed, {} seats released",
            booking.id,
            released.len()
        );
        Ok(FinalizeOutcome::Released { seats: released })
    }

    /// Отмена брони. Оплаченные места возвращаются в продажу, у неоплаченной
    /// брони снимаются удержания.
    pub async fn cancel_booking(&self, booking_id: BookingId) -> Result<Booking, BookingError> {
        let booking = self.find_booking(booking_id).await?;

        match booking.status {
            BookingStatus::Paid => {
                self.seat_locks
                    .cancel(booking.trip_id, &booking.seat_ids, booking.id)?;
                if !self
                    .bookings
                    .transition(booking.id, BookingStatus::Paid, BookingStatus::Cancelled)
                    .await?
                {
                    error!(
                        "Seats of booking {} were freed but its status changed concurrently",
                        booking.id
                    );
                }
            }
            BookingStatus::Pending => {
                if !self
                    .bookings
                    .transition(booking.id, BookingStatus::Pending, BookingStatus::Cancelled)
                    .await?
                {
                    let current = self.find_booking(booking_id).await?;
                    return Err(BookingError::InvalidStatus {
                        booking_id,
                        status: current.status,
                        action: "cancelled",
                    });
                }
                self.seat_locks
                    .release_holder(booking.trip_id, &booking.seat_ids, &booking.holder_id);
            }
            status => {
                return Err(BookingError::InvalidStatus {
                    booking_id,
                    status,
                    action: "cancelled",
                })
            }
        }

        info!("Booking {} cancelled", booking_id);
        self.find_booking(booking_id).await
    }

    /// Перевод просроченной брони `pending` в `expired`. `false`, если её статус
    /// уже изменился.
    pub async fn expire_booking(&self, booking: &Booking) -> Result<bool, BookingError> {
        if !self
            .bookings
            .transition(booking.id, BookingStatus::Pending, BookingStatus::Expired)
            .await?
        {
            return Ok(false);
        }
        let released =
            self.seat_locks
                .release_holder(booking.trip_id, &booking.seat_ids, &booking.holder_id);
        info!(
            "⏰ Booking {} expired without payment, {} seats released",
            booking.id, released
        );
        Ok(true)
    }
}
