pub mod bookings;
pub mod events;
pub mod payment;
pub mod seats;

use axum::Router;
use std::sync::Arc;

pub fn routes() -> Router<Arc<crate::AppState>> {
    Router::new()
        .merge(seats::routes())
        .merge(bookings::routes())
        .merge(events::routes())
        .merge(payment::routes())
}
