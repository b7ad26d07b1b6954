//! Property: whatever the interleaving of customer and payment operations,
//! a seat is never held by two customers and a sold seat stays sold.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Duration;
use proptest::prelude::*;

use bus_ticketing::clock::{Clock, ManualClock};
use bus_ticketing::models::{SeatStatus, TripId};
use bus_ticketing::services::seat_locks::SeatLockManager;

const TRIP: TripId = 1;
const SEATS: i64 = 4;
const HOLDERS: [&str; 3] = ["h0", "h1", "h2"];

#[derive(Debug, Clone)]
enum Op {
    Lock { holder: usize, seat: i64, ttl: i64 },
    Unlock { holder: usize, seat: i64 },
    Confirm { holder: usize, seats: Vec<i64> },
    Advance(i64),
    Sweep,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0..3usize, 1..=SEATS, 1..200i64).prop_map(|(holder, seat, ttl)| Op::Lock { holder, seat, ttl }),
        2 => (0..3usize, 1..=SEATS).prop_map(|(holder, seat)| Op::Unlock { holder, seat }),
        2 => (0..3usize, prop::collection::vec(1..=SEATS, 1..4)).prop_map(|(holder, seats)| Op::Confirm { holder, seats }),
        2 => (1..150i64).prop_map(Op::Advance),
        1 => Just(Op::Sweep),
    ]
}

proptest! {
    #[test]
    fn seats_are_never_sold_twice(ops in prop::collection::vec(op(), 1..60)) {
        let clock = Arc::new(ManualClock::at_epoch());
        let manager = SeatLockManager::new(clock.clone(), Duration::seconds(120), 16);
        manager.materialize(TRIP, 1..=SEATS);

        let mut sold: HashMap<i64, i64> = HashMap::new();
        let mut next_booking = 1i64;

        for op in ops {
            match op {
                Op::Lock { holder, seat, ttl } => {
                    let before = manager.seat_state(TRIP, seat).unwrap();
                    let result = manager.lock(TRIP, seat, HOLDERS[holder], Duration::seconds(ttl));
                    if result.is_ok() {
                        // Успех только если место было свободно или уже наше
                        let was_ours = before.is_held_by(HOLDERS[holder], clock.now());
                        prop_assert!(matches!(before.status, SeatStatus::Free) || was_ours);
                    }
                }
                Op::Unlock { holder, seat } => {
                    let _ = manager.unlock(TRIP, seat, HOLDERS[holder]);
                }
                Op::Confirm { holder, seats } => {
                    let booking_id = next_booking;
                    next_booking += 1;
                    if manager.confirm(TRIP, &seats, HOLDERS[holder], booking_id).is_ok() {
                        let mut unique = seats.clone();
                        unique.sort_unstable();
                        unique.dedup();
                        for seat in &unique {
                            prop_assert!(!sold.contains_key(seat), "seat {} sold twice", seat);
                            sold.insert(*seat, booking_id);
                        }
                    }
                }
                Op::Advance(secs) => clock.advance(Duration::seconds(secs)),
                Op::Sweep => {
                    manager.expire_sweep(clock.now());
                }
            }

            let now = clock.now();
            for seat in 1..=SEATS {
                let state = manager.seat_state(TRIP, seat).unwrap();
                match sold.get(&seat) {
                    Some(booking_id) => prop_assert_eq!(state.booking_id(), Some(*booking_id)),
                    None => prop_assert_eq!(state.booking_id(), None),
                }
                let holders = HOLDERS.iter().filter(|h| state.is_held_by(h, now)).count();
                prop_assert!(holders <= 1);
                prop_assert!(!state.is_lock_expired_at(now), "expired lock visible on read");
            }
        }
    }
}
