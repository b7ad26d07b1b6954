use async_trait::async_trait;
use redis::AsyncCommands;
use tracing::{info, warn};

use crate::catalog::{CatalogError, PgSeatCatalog, SeatCatalog};
use crate::models::{SeatMapEntry, TripId};
use crate::redis_client::RedisClient;

/// Кеш схем мест рейсов в Redis поверх каталога в Postgres.
/// Redis недоступен: идём в БД, ответ всё равно будет.
#[derive(Clone)]
pub struct CacheService {
    redis: RedisClient,
    catalog: PgSeatCatalog,
    ttl_seconds: u64,
}

impl CacheService {
    pub fn new(redis: RedisClient, catalog: PgSeatCatalog, ttl_seconds: u64) -> Self {
        Self {
            redis,
            catalog,
            ttl_seconds,
        }
    }

    fn seat_map_key(trip_id: TripId) -> String {
        format!("seatmap:{}", trip_id)
    }

    // === Работа с кешем ===

    async fn get_seat_map_from_cache(&self, trip_id: TripId) -> Result<Vec<SeatMapEntry>, redis::RedisError> {
        let mut conn = self.redis.conn.clone();
        let data: String = conn.get(Self::seat_map_key(trip_id)).await?;
        let seats: Vec<SeatMapEntry> = serde_json::from_str(&data).map_err(|_| {
            redis::RedisError::from((redis::ErrorKind::TypeError, "Parse error"))
        })?;
        Ok(seats)
    }

    async fn save_seat_map_to_cache(&self, trip_id: TripId, seats: &[SeatMapEntry]) -> Result<(), redis::RedisError> {
        let data = serde_json::to_string(seats).map_err(|_| {
            redis::RedisError::from((redis::ErrorKind::TypeError, "Serialize error"))
        })?;
        let mut conn = self.redis.conn.clone();
        conn.set_ex(Self::seat_map_key(trip_id), data, self.ttl_seconds).await
    }
}

#[async_trait]
impl SeatCatalog for CacheService {
    async fn get_seat_map(&self, trip_id: TripId) -> Result<Vec<SeatMapEntry>, CatalogError> {
        // Сначала пробуем кеш
        if let Ok(seats) = self.get_seat_map_from_cache(trip_id).await {
            return Ok(seats);
        }

        // Промах или Redis упал - идем в БД
        let seats = self.catalog.get_seat_map(trip_id).await?;
        if let Err(e) = self.save_seat_map_to_cache(trip_id, &seats).await {
            warn!("Failed to cache seat map for trip {}: {}", trip_id, e);
        }
        Ok(seats)
    }

    async fn invalidate(&self, trip_id: TripId) {
        let mut conn = self.redis.conn.clone();
        let _: Result<(), _> = conn.del(Self::seat_map_key(trip_id)).await;
        info!("Invalidated seat map cache for trip {}", trip_id);
    }
}
