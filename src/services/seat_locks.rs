//! seat_locks.rs
//!
//! Менеджер блокировок мест: единственный источник истины о том, свободно ли
//! место на рейсе, удерживается ли оно покупателем на время оплаты или уже продано.
//!
//! Устройство:
//! 1.  **Хранилище**: `DashMap<trip_id, Arc<TripSeats>>`. Набор мест рейса фиксируется
//!     при материализации, каждое место лежит под своим `Mutex`. Шард `DashMap`
//!     держится только на время клонирования `Arc`, поэтому разные места не
//!     конкурируют друг с другом.
//! 2.  **Групповые операции** (`confirm`, `extend`, `cancel`) берут мьютексы мест
//!     строго по возрастанию seat_id и сначала проверяют все места, потом меняют,
//!     либо все, либо ни одного.
//! 3.  **Истечение**: ленивая проверка внутри каждой операции плюс фоновая очистка
//!     (`expire_sweep`). Обе используют `SeatState::is_lock_expired_at`.

use chrono::{DateTime, Duration, Utc};
use dashmap::{mapref::entry::Entry, DashMap};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tracing::{debug, info};
use uuid::Uuid;

use crate::clock::Clock;
use crate::models::{BookingId, SeatId, SeatState, SeatStatus, TripId};

/// Ошибки операций над местами. Все они штатные: клиенту показываем сообщение
/// и предлагаем выбрать место заново.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LockError {
    #[error("seat {seat_id} does not exist on trip {trip_id}")]
    SeatNotFound { trip_id: TripId, seat_id: SeatId },

    #[error("seat {seat_id} is currently being selected by another customer")]
    SeatUnavailable { seat_id: SeatId },

    #[error("seat {seat_id} is already booked")]
    SeatAlreadyBooked { seat_id: SeatId },

    #[error("seat {seat_id} is not locked by this session")]
    NotLockHolder { seat_id: SeatId },

    #[error("hold on seat {seat_id} has expired, please reselect")]
    LockExpired { seat_id: SeatId },

    #[error("holds lost on seats {lost:?}, please reselect")]
    PartialLockLoss { lost: Vec<SeatId> },

    #[error("seat {seat_id} is not booked under booking {booking_id}")]
    BookingMismatch {
        seat_id: SeatId,
        booking_id: BookingId,
    },

    #[error("no seats given")]
    EmptySeatSet,

    #[error("lock ttl must be positive")]
    InvalidTtl,
}

impl LockError {
    pub fn code(&self) -> &'static str {
        match self {
            LockError::SeatNotFound { .. } => "SEAT_NOT_FOUND",
            LockError::SeatUnavailable { .. } => "SEAT_UNAVAILABLE",
            LockError::SeatAlreadyBooked { .. } => "SEAT_ALREADY_BOOKED",
            LockError::NotLockHolder { .. } => "NOT_LOCK_HOLDER",
            LockError::LockExpired { .. } => "LOCK_EXPIRED",
            LockError::PartialLockLoss { .. } => "PARTIAL_LOCK_LOSS",
            LockError::BookingMismatch { .. } => "BOOKING_MISMATCH",
            LockError::EmptySeatSet => "EMPTY_SEAT_SET",
            LockError::InvalidTtl => "INVALID_TTL",
        }
    }
}

/// Выданная блокировка. `lock_id` идентифицирует именно этот экземпляр удержания.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockToken {
    pub trip_id: TripId,
    pub seat_id: SeatId,
    pub holder_id: String,
    pub lock_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

/// Уведомления об изменении мест (в том числе об истечении удержания).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SeatEvent {
    Locked {
        trip_id: TripId,
        seat_id: SeatId,
        holder_id: String,
        expires_at: DateTime<Utc>,
    },
    Released {
        trip_id: TripId,
        seat_id: SeatId,
        holder_id: String,
    },
    Expired {
        trip_id: TripId,
        seat_id: SeatId,
        holder_id: String,
    },
    Booked {
        trip_id: TripId,
        seat_id: SeatId,
        booking_id: BookingId,
    },
    Freed {
        trip_id: TripId,
        seat_id: SeatId,
        booking_id: BookingId,
    },
}

impl SeatEvent {
    pub fn trip_id(&self) -> TripId {
        match self {
            SeatEvent::Locked { trip_id, .. }
            | SeatEvent::Released { trip_id, .. }
            | SeatEvent::Expired { trip_id, .. }
            | SeatEvent::Booked { trip_id, .. }
            | SeatEvent::Freed { trip_id, .. } => *trip_id,
        }
    }
}

type SeatCell = Arc<Mutex<SeatState>>;

struct TripSeats {
    seats: BTreeMap<SeatId, SeatCell>,
}

impl TripSeats {
    fn cell(&self, trip_id: TripId, seat_id: SeatId) -> Result<&Mutex<SeatState>, LockError> {
        self.seats
            .get(&seat_id)
            .map(Arc::as_ref)
            .ok_or(LockError::SeatNotFound { trip_id, seat_id })
    }

    /// Берёт мьютексы набора мест по возрастанию seat_id (без дублей).
    fn lock_group(
        &self,
        trip_id: TripId,
        seat_ids: &[SeatId],
    ) -> Result<Vec<MutexGuard<'_, SeatState>>, LockError> {
        let mut ids = seat_ids.to_vec();
        ids.sort_unstable();
        ids.dedup();

        let cells = ids
            .iter()
            .map(|seat_id| self.cell(trip_id, *seat_id))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(cells.into_iter().map(guard).collect())
    }
}

fn guard(cell: &Mutex<SeatState>) -> MutexGuard<'_, SeatState> {
    cell.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Ленивое истечение: если удержание просрочено, место становится FREE.
fn expire_if_due(seat: &mut SeatState, now: DateTime<Utc>) -> Option<SeatEvent> {
    if !seat.is_lock_expired_at(now) {
        return None;
    }
    match std::mem::replace(&mut seat.status, SeatStatus::Free) {
        SeatStatus::Locked { holder_id, .. } => Some(SeatEvent::Expired {
            trip_id: seat.trip_id,
            seat_id: seat.seat_id,
            holder_id,
        }),
        other => {
            seat.status = other;
            None
        }
    }
}

enum Hold {
    Held,
    Expired,
    BookedHere,
    Lost,
}

fn classify(
    seat: &SeatState,
    holder: &str,
    booking: Option<BookingId>,
    now: DateTime<Utc>,
) -> Hold {
    match &seat.status {
        SeatStatus::Locked {
            holder_id,
            expires_at,
            ..
        } if holder_id == holder => {
            if now < *expires_at {
                Hold::Held
            } else {
                Hold::Expired
            }
        }
        SeatStatus::Booked { booking_id } if Some(*booking_id) == booking => Hold::BookedHere,
        _ => Hold::Lost,
    }
}

/// Проверка группы перед изменением. `Ok(true)`: все места уже забронированы
/// этой бронью и делать нечего.
fn check_group(
    seats: &[MutexGuard<'_, SeatState>],
    holder: &str,
    booking: Option<BookingId>,
    now: DateTime<Utc>,
) -> Result<bool, LockError> {
    let mut owned = 0usize;
    let mut booked_here = 0usize;
    let mut expired = None;
    let mut lost = Vec::new();

    for seat in seats {
        match classify(seat, holder, booking, now) {
            Hold::Held => owned += 1,
            Hold::BookedHere => booked_here += 1,
            Hold::Expired => {
                expired.get_or_insert(seat.seat_id);
            }
            Hold::Lost => lost.push(seat.seat_id),
        }
    }

    if let Some(seat_id) = expired {
        return Err(LockError::LockExpired { seat_id });
    }
    if let Some(&first) = lost.first() {
        if owned + booked_here == 0 {
            return Err(LockError::NotLockHolder { seat_id: first });
        }
        return Err(LockError::PartialLockLoss { lost });
    }
    Ok(owned == 0)
}

pub struct SeatLockManager {
    trips: DashMap<TripId, Arc<TripSeats>>,
    clock: Arc<dyn Clock>,
    default_ttl: Duration,
    events: broadcast::Sender<SeatEvent>,
}

impl SeatLockManager {
    pub fn new(clock: Arc<dyn Clock>, default_ttl: Duration, event_capacity: usize) -> Self {
        let (events, _) = broadcast::channel(event_capacity.max(1));
        Self {
            trips: DashMap::new(),
            clock,
            default_ttl,
            events,
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Подписка на события мест (хук уведомления об истечении удержания).
    pub fn subscribe(&self) -> broadcast::Receiver<SeatEvent> {
        self.events.subscribe()
    }

    fn publish(&self, events: Vec<SeatEvent>) {
        for event in events {
            // Нет подписчиков: не ошибка.
            let _ = self.events.send(event);
        }
    }

    fn trip(&self, trip_id: TripId) -> Option<Arc<TripSeats>> {
        self.trips.get(&trip_id).map(|entry| Arc::clone(entry.value()))
    }

    // === Жизненный цикл рейса ===

    pub fn has_trip(&self, trip_id: TripId) -> bool {
        self.trips.contains_key(&trip_id)
    }

    /// Создаёт места рейса в состоянии FREE. Уже существующие места не трогает.
    /// Возвращает количество добавленных мест.
    pub fn materialize(&self, trip_id: TripId, seat_ids: impl IntoIterator<Item = SeatId>) -> usize {
        self.materialize_states(
            trip_id,
            seat_ids
                .into_iter()
                .map(|seat_id| SeatState::free(trip_id, seat_id)),
        )
    }

    /// То же, но с заданным начальным состоянием (восстановление броней из БД).
    /// Состояния с чужим trip_id пропускаются.
    pub fn materialize_states(&self, trip_id: TripId, states: impl IntoIterator<Item = SeatState>) -> usize {
        let states = states.into_iter().filter(|state| state.trip_id == trip_id);

        match self.trips.entry(trip_id) {
            Entry::Vacant(vacant) => {
                let mut seats: BTreeMap<SeatId, SeatCell> = BTreeMap::new();
                for state in states {
                    seats
                        .entry(state.seat_id)
                        .or_insert_with(|| Arc::new(Mutex::new(state)));
                }
                let added = seats.len();
                vacant.insert(Arc::new(TripSeats { seats }));
                info!("Materialized {} seats for trip {}", added, trip_id);
                added
            }
            Entry::Occupied(mut occupied) => {
                let mut seats = occupied.get().seats.clone();
                let before = seats.len();
                for state in states {
                    seats
                        .entry(state.seat_id)
                        .or_insert_with(|| Arc::new(Mutex::new(state)));
                }
                let added = seats.len() - before;
                if added > 0 {
                    // Старые ячейки разделяются через Arc, их состояние сохраняется.
                    occupied.insert(Arc::new(TripSeats { seats }));
                    info!("Added {} seats to trip {}", added, trip_id);
                }
                added
            }
        }
    }

    /// Рейс удалён: забываем состояние всех его мест.
    pub fn remove_trip(&self, trip_id: TripId) -> bool {
        let removed = self.trips.remove(&trip_id).is_some();
        if removed {
            info!("Removed seat states for trip {}", trip_id);
        }
        removed
    }

    // === Операции над одним местом ===

    pub fn lock(
        &self,
        trip_id: TripId,
        seat_id: SeatId,
        holder_id: &str,
        ttl: Duration,
    ) -> Result<LockToken, LockError> {
        if ttl <= Duration::zero() {
            return Err(LockError::InvalidTtl);
        }
        let trip = self
            .trip(trip_id)
            .ok_or(LockError::SeatNotFound { trip_id, seat_id })?;
        let cell = trip.cell(trip_id, seat_id)?;
        let now = self.clock.now();
        let mut events = Vec::with_capacity(2);

        let result = {
            let mut guard = guard(cell);
            let seat = &mut *guard;
            events.extend(expire_if_due(seat, now));

            match &seat.status {
                SeatStatus::Booked { .. } => Err(LockError::SeatAlreadyBooked { seat_id }),
                SeatStatus::Locked { holder_id: current, .. } if current != holder_id => {
                    Err(LockError::SeatUnavailable { seat_id })
                }
                // FREE или повторный выбор тем же покупателем: продлеваем.
                _ => {
                    let token = LockToken {
                        trip_id,
                        seat_id,
                        holder_id: holder_id.to_string(),
                        lock_id: Uuid::new_v4(),
                        expires_at: now + ttl,
                    };
                    seat.status = SeatStatus::Locked {
                        holder_id: token.holder_id.clone(),
                        lock_id: token.lock_id,
                        expires_at: token.expires_at,
                    };
                    events.push(SeatEvent::Locked {
                        trip_id,
                        seat_id,
                        holder_id: token.holder_id.clone(),
                        expires_at: token.expires_at,
                    });
                    Ok(token)
                }
            }
        };

        match &result {
            Ok(token) => debug!("Seat {}/{} locked until {}", trip_id, seat_id, token.expires_at),
            Err(e) => debug!("Lock on seat {}/{} refused: {}", trip_id, seat_id, e),
        }
        self.publish(events);
        result
    }

    pub fn unlock(&self, trip_id: TripId, seat_id: SeatId, holder_id: &str) -> Result<(), LockError> {
        let trip = self
            .trip(trip_id)
            .ok_or(LockError::SeatNotFound { trip_id, seat_id })?;
        let cell = trip.cell(trip_id, seat_id)?;
        let now = self.clock.now();
        let mut events = Vec::with_capacity(1);

        let result = {
            let mut guard = guard(cell);
            let seat = &mut *guard;
            events.extend(expire_if_due(seat, now));

            if seat.is_held_by(holder_id, now) {
                seat.status = SeatStatus::Free;
                events.push(SeatEvent::Released {
                    trip_id,
                    seat_id,
                    holder_id: holder_id.to_string(),
                });
                Ok(())
            } else {
                Err(LockError::NotLockHolder { seat_id })
            }
        };

        self.publish(events);
        result
    }

    /// Текущее состояние одного места (с ленивым истечением).
    pub fn seat_state(&self, trip_id: TripId, seat_id: SeatId) -> Result<SeatState, LockError> {
        let trip = self
            .trip(trip_id)
            .ok_or(LockError::SeatNotFound { trip_id, seat_id })?;
        let cell = trip.cell(trip_id, seat_id)?;
        let now = self.clock.now();

        let (state, expired) = {
            let mut guard = guard(cell);
            let expired = expire_if_due(&mut guard, now);
            (guard.clone(), expired)
        };
        self.publish(expired.into_iter().collect());
        Ok(state)
    }

    // === Групповые операции ===

    /// Переводит все места набора в BOOKED атомарно. Либо все, либо ни одного.
    pub fn confirm(
        &self,
        trip_id: TripId,
        seat_ids: &[SeatId],
        holder_id: &str,
        booking_id: BookingId,
    ) -> Result<(), LockError> {
        let first = *seat_ids.first().ok_or(LockError::EmptySeatSet)?;
        let trip = self
            .trip(trip_id)
            .ok_or(LockError::SeatNotFound { trip_id, seat_id: first })?;
        let now = self.clock.now();
        let mut events = Vec::with_capacity(seat_ids.len());

        let result = {
            let mut seats = trip.lock_group(trip_id, seat_ids)?;
            match check_group(&seats, holder_id, Some(booking_id), now) {
                Ok(true) => {
                    debug!("Booking {} already holds seats {:?}", booking_id, seat_ids);
                    Ok(())
                }
                Ok(false) => {
                    for seat in seats.iter_mut() {
                        if seat.is_held_by(holder_id, now) {
                            seat.status = SeatStatus::Booked { booking_id };
                            events.push(SeatEvent::Booked {
                                trip_id,
                                seat_id: seat.seat_id,
                                booking_id,
                            });
                        }
                    }
                    Ok(())
                }
                Err(e) => {
                    // Просроченные удержания всё равно освобождаем.
                    for seat in seats.iter_mut() {
                        events.extend(expire_if_due(seat, now));
                    }
                    Err(e)
                }
            }
        };

        match &result {
            Ok(()) => info!(
                "Confirmed booking {} on trip {}: seats {:?}",
                booking_id, trip_id, seat_ids
            ),
            Err(e) => info!(
                "Confirm of booking {} on trip {} refused: {}",
                booking_id, trip_id, e
            ),
        }
        self.publish(events);
        result
    }

    /// Продлевает все удержания покупателя на наборе мест до `now + ttl`.
    pub fn extend(
        &self,
        trip_id: TripId,
        seat_ids: &[SeatId],
        holder_id: &str,
        ttl: Duration,
    ) -> Result<DateTime<Utc>, LockError> {
        if ttl <= Duration::zero() {
            return Err(LockError::InvalidTtl);
        }
        let first = *seat_ids.first().ok_or(LockError::EmptySeatSet)?;
        let trip = self
            .trip(trip_id)
            .ok_or(LockError::SeatNotFound { trip_id, seat_id: first })?;
        let now = self.clock.now();
        let new_expiry = now + ttl;
        let mut events = Vec::with_capacity(seat_ids.len());

        let result = {
            let mut seats = trip.lock_group(trip_id, seat_ids)?;
            match check_group(&seats, holder_id, None, now) {
                Ok(_) => {
                    for seat in seats.iter_mut() {
                        let seat_id = seat.seat_id;
                        if let SeatStatus::Locked { expires_at, .. } = &mut seat.status {
                            *expires_at = new_expiry;
                            events.push(SeatEvent::Locked {
                                trip_id,
                                seat_id,
                                holder_id: holder_id.to_string(),
                                expires_at: new_expiry,
                            });
                        }
                    }
                    Ok(new_expiry)
                }
                Err(e) => {
                    for seat in seats.iter_mut() {
                        events.extend(expire_if_due(seat, now));
                    }
                    Err(e)
                }
            }
        };

        self.publish(events);
        result
    }

    /// Отмена проданной брони: все места должны принадлежать `booking_id`.
    pub fn cancel(
        &self,
        trip_id: TripId,
        seat_ids: &[SeatId],
        booking_id: BookingId,
    ) -> Result<(), LockError> {
        let first = *seat_ids.first().ok_or(LockError::EmptySeatSet)?;
        let trip = self
            .trip(trip_id)
            .ok_or(LockError::SeatNotFound { trip_id, seat_id: first })?;
        let mut events = Vec::with_capacity(seat_ids.len());

        let result = {
            let mut seats = trip.lock_group(trip_id, seat_ids)?;
            match seats.iter().find(|seat| seat.booking_id() != Some(booking_id)) {
                Some(seat) => Err(LockError::BookingMismatch {
                    seat_id: seat.seat_id,
                    booking_id,
                }),
                None => {
                    for seat in seats.iter_mut() {
                        seat.status = SeatStatus::Free;
                        events.push(SeatEvent::Freed {
                            trip_id,
                            seat_id: seat.seat_id,
                            booking_id,
                        });
                    }
                    Ok(())
                }
            }
        };

        if result.is_ok() {
            info!("Cancelled booking {} on trip {}: {} seats freed", booking_id, trip_id, events.len());
        }
        self.publish(events);
        result
    }

    /// Освобождает удержания покупателя там, где они ещё есть. Возвращает число
    /// освобождённых мест.
    pub fn release_holder(&self, trip_id: TripId, seat_ids: &[SeatId], holder_id: &str) -> usize {
        seat_ids
            .iter()
            .filter(|seat_id| self.unlock(trip_id, **seat_id, holder_id).is_ok())
            .count()
    }

    // === Чтение ===

    /// Согласованный снимок всех мест рейса: мьютексы берутся по возрастанию
    /// seat_id и держатся на время чтения.
    pub fn snapshot(&self, trip_id: TripId) -> Option<Vec<SeatState>> {
        let trip = self.trip(trip_id)?;
        let now = self.clock.now();
        let mut events = Vec::new();

        let states = {
            let mut seats: Vec<_> = trip.seats.values().map(|cell| guard(cell)).collect();
            for seat in seats.iter_mut() {
                events.extend(expire_if_due(seat, now));
            }
            seats.iter().map(|seat| (**seat).clone()).collect()
        };

        self.publish(events);
        Some(states)
    }

    /// Места рейса, которые сейчас удерживает покупатель.
    pub fn held_by(&self, trip_id: TripId, holder_id: &str) -> Vec<SeatId> {
        let Some(trip) = self.trip(trip_id) else {
            return Vec::new();
        };
        let now = self.clock.now();
        trip.seats
            .iter()
            .filter(|(_, cell)| guard(cell).is_held_by(holder_id, now))
            .map(|(seat_id, _)| *seat_id)
            .collect()
    }

    // === Очистка ===

    /// Переводит в FREE все удержания с `lock_expires_at <= now`.
    pub fn expire_sweep(&self, now: DateTime<Utc>) -> usize {
        let trips: Vec<Arc<TripSeats>> = self
            .trips
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let mut events = Vec::new();
        for trip in &trips {
            for cell in trip.seats.values() {
                let mut seat = guard(cell);
                events.extend(expire_if_due(&mut seat, now));
            }
        }

        let expired = events.len();
        if expired > 0 {
            info!("Swept {} expired seat hold(s)", expired);
        }
        self.publish(events);
        expired
    }

    /// `expire_sweep` по текущему времени часов менеджера.
    pub fn sweep_expired(&self) -> usize {
        self.expire_sweep(self.clock.now())
    }
}
