pub mod cache;
pub mod catalog;
pub mod clock;
pub mod config;
pub mod controllers;
pub mod database;
pub mod error;
pub mod middleware;
pub mod models;
pub mod redis_client;
pub mod services;
pub mod stores;

use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::{
    catalog::SeatCatalog,
    clock::Clock,
    config::Config,
    services::{
        finalizer::BookingFinalizer, payment::CallbackSigner, seat_locks::SeatLockManager,
        seat_map::SeatMapService, sweeper::ExpirySweeper,
    },
    stores::BookingStore,
};

// Shared state для всего приложения
pub struct AppState {
    pub config: Config,
    pub seat_locks: Arc<SeatLockManager>,
    pub seat_map: SeatMapService,
    pub finalizer: Arc<BookingFinalizer>,
    pub bookings: Arc<dyn BookingStore>,
    pub signer: CallbackSigner,
}

impl AppState {
    /// Собирает сервисы поверх каталога и хранилища броней. Хранилища
    /// передаются снаружи: в проде Postgres + Redis, в тестах память.
    pub fn new(
        config: Config,
        catalog: Arc<dyn SeatCatalog>,
        bookings: Arc<dyn BookingStore>,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        let seat_locks = Arc::new(SeatLockManager::new(
            clock,
            config.seat_lock_ttl(),
            config.seat_lock.events_capacity,
        ));
        let seat_map = SeatMapService::new(
            catalog.clone(),
            bookings.clone(),
            seat_locks.clone(),
            config.payment_hold(),
        );
        let finalizer = Arc::new(BookingFinalizer::new(
            seat_locks.clone(),
            bookings.clone(),
            catalog,
            config.payment_hold(),
        ));
        let signer = CallbackSigner::new(config.payment.callback_secret.clone());

        Arc::new(Self {
            config,
            seat_locks,
            seat_map,
            finalizer,
            bookings,
            signer,
        })
    }

    pub fn sweeper(&self) -> ExpirySweeper {
        ExpirySweeper::new(
            self.seat_locks.clone(),
            self.bookings.clone(),
            self.finalizer.clone(),
        )
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(|| async { "Bus Ticketing API v1.0" }))
        .route("/health", get(|| async { "OK" }))
        // Mount the routes from the controllers module
        .nest("/api", controllers::routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
