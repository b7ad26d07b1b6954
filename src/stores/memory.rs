use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{ActiveSeat, BookingStore, StoreError};
use crate::clock::Clock;
use crate::models::{Booking, BookingId, BookingStatus, NewBooking, PaymentStatus, TripId};

#[derive(Debug, Clone, PartialEq)]
pub struct PaymentRecord {
    pub booking_id: BookingId,
    pub transaction_id: Option<String>,
    pub status: PaymentStatus,
}

#[derive(Default)]
struct Inner {
    next_id: BookingId,
    bookings: HashMap<BookingId, Booking>,
    payments: Vec<PaymentRecord>,
}

/// Хранилище в памяти для тестов. Время создания берётся из тех же часов,
/// что и у менеджера мест.
pub struct InMemoryBookingStore {
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner>,
}

impl InMemoryBookingStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            inner: Mutex::new(Inner::default()),
        }
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn payments(&self) -> Vec<PaymentRecord> {
        self.inner().payments.clone()
    }
}

#[async_trait]
impl BookingStore for InMemoryBookingStore {
    async fn create_pending(&self, booking: NewBooking) -> Result<Booking, StoreError> {
        let now = self.clock.now();
        let mut inner = self.inner();
        inner.next_id += 1;

        let mut seat_ids: Vec<_> = booking.seats.iter().map(|line| line.seat_id).collect();
        seat_ids.sort_unstable();

        let stored = Booking {
            id: inner.next_id,
            reference: booking.reference,
            trip_id: booking.trip_id,
            holder_id: booking.holder_id,
            seat_ids,
            total_amount: booking.total_amount,
            status: BookingStatus::Pending,
            customer: booking.customer,
            created_at: now,
            updated_at: now,
        };
        inner.bookings.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn find(&self, booking_id: BookingId) -> Result<Option<Booking>, StoreError> {
        Ok(self.inner().bookings.get(&booking_id).cloned())
    }

    async fn transition(
        &self,
        booking_id: BookingId,
        from: BookingStatus,
        to: BookingStatus,
    ) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let mut inner = self.inner();
        match inner.bookings.get_mut(&booking_id) {
            Some(booking) if booking.status == from => {
                booking.status = to;
                booking.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn active_seats(&self, trip_id: TripId) -> Result<Vec<ActiveSeat>, StoreError> {
        let inner = self.inner();
        let mut seats: Vec<_> = inner
            .bookings
            .values()
            .filter(|b| {
                b.trip_id == trip_id
                    && matches!(b.status, BookingStatus::Pending | BookingStatus::Paid)
            })
            .flat_map(|b| {
                b.seat_ids.iter().map(move |seat_id| ActiveSeat {
                    seat_id: *seat_id,
                    booking_id: b.id,
                    holder_id: b.holder_id.clone(),
                    status: b.status,
                    created_at: b.created_at,
                })
            })
            .collect();
        seats.sort_by_key(|s| s.seat_id);
        Ok(seats)
    }

    async fn pending_created_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Booking>, StoreError> {
        let mut stale: Vec<_> = self
            .inner()
            .bookings
            .values()
            .filter(|b| b.status == BookingStatus::Pending && b.created_at < cutoff)
            .cloned()
            .collect();
        stale.sort_by_key(|b| b.id);
        Ok(stale)
    }

    async fn record_payment(
        &self,
        booking_id: BookingId,
        transaction_id: Option<&str>,
        status: PaymentStatus,
    ) -> Result<(), StoreError> {
        self.inner().payments.push(PaymentRecord {
            booking_id,
            transaction_id: transaction_id.map(str::to_owned),
            status,
        });
        Ok(())
    }
}
