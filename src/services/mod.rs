pub mod finalizer;
pub mod payment;
pub mod seat_locks;
pub mod seat_map;
pub mod sweeper;
