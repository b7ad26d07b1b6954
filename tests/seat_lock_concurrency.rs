//! Concurrency contract of the seat lock manager under real threads.

use std::sync::{Arc, Barrier};
use std::thread;

use chrono::Duration;

use bus_ticketing::clock::{ManualClock, SystemClock};
use bus_ticketing::services::seat_locks::{LockError, SeatLockManager};

#[test]
fn simultaneous_lock_has_exactly_one_winner() {
    for _round in 0..50 {
        let manager = Arc::new(SeatLockManager::new(
            Arc::new(SystemClock),
            Duration::seconds(120),
            16,
        ));
        manager.materialize(1, [5]);

        let contenders = 8;
        let barrier = Arc::new(Barrier::new(contenders));
        let handles: Vec<_> = (0..contenders)
            .map(|i| {
                let manager = manager.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    manager.lock(1, 5, &format!("holder-{i}"), Duration::seconds(120))
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
        assert_eq!(winners.len(), 1);
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| *e == LockError::SeatUnavailable { seat_id: 5 }));

        let state = manager.seat_state(1, 5).unwrap();
        assert_eq!(state.locked_by(), Some(winners[0].holder_id.as_str()));
    }
}

#[test]
fn overlapping_group_confirms_do_not_deadlock() {
    let clock = Arc::new(ManualClock::at_epoch());
    let manager = Arc::new(SeatLockManager::new(clock, Duration::seconds(120), 16));
    let seats: Vec<i64> = (1..=40).collect();
    manager.materialize(1, seats.iter().copied());

    // Каждый поток держит свою половину мест и подтверждает её в обратном порядке
    let threads = 4;
    let barrier = Arc::new(Barrier::new(threads));
    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let manager = manager.clone();
            let barrier = barrier.clone();
            let mine: Vec<i64> = seats.iter().copied().filter(|s| (*s as usize) % threads == t).collect();
            thread::spawn(move || {
                let holder = format!("holder-{t}");
                for seat in &mine {
                    manager.lock(1, *seat, &holder, Duration::seconds(120)).unwrap();
                }
                barrier.wait();
                // Пытаемся захватить всё, включая чужие места
                let everything: Vec<i64> = (1..=40).rev().collect();
                let group = manager.confirm(1, &everything, &holder, t as i64 + 100);
                assert!(matches!(group, Err(LockError::PartialLockLoss { .. })));

                let mut reversed = mine.clone();
                reversed.reverse();
                manager.confirm(1, &reversed, &holder, t as i64 + 100).unwrap();
                mine
            })
        })
        .collect();

    for (t, handle) in handles.into_iter().enumerate() {
        for seat in handle.join().unwrap() {
            assert_eq!(
                manager.seat_state(1, seat).unwrap().booking_id(),
                Some(t as i64 + 100)
            );
        }
    }
}

#[test]
fn different_seats_lock_in_parallel() {
    let manager = Arc::new(SeatLockManager::new(
        Arc::new(SystemClock),
        Duration::seconds(120),
        16,
    ));
    manager.materialize(1, 1..=64);

    let handles: Vec<_> = (1..=64)
        .map(|seat| {
            let manager = manager.clone();
            thread::spawn(move || manager.lock(1, seat, &format!("h{seat}"), Duration::seconds(120)))
        })
        .collect();

    assert!(handles.into_iter().all(|h| h.join().unwrap().is_ok()));
    assert_eq!(manager.held_by(1, "h7"), vec![7]);
}
