pub mod booking;
pub mod payment;
pub mod seat;
pub mod trip;

pub type TripId = i64;
pub type SeatId = i64;
pub type BookingId = i64;

pub use booking::{Booking, BookingStatus, CustomerDetails, NewBooking, SeatLine};
pub use payment::{PaymentNotification, PaymentStatus};
pub use seat::{SeatState, SeatStatus};
pub use trip::{SeatClass, SeatMapEntry};
