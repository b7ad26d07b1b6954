use async_trait::async_trait;
use sqlx::{postgres::PgRow, PgPool, Row};
use tracing::debug;

use super::{CatalogError, SeatCatalog};
use crate::models::{SeatClass, SeatMapEntry, TripId};

#[derive(Clone)]
pub struct PgSeatCatalog {
    pool: PgPool,
}

impl PgSeatCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_row(row: PgRow) -> Result<SeatMapEntry, CatalogError> {
        let class: String = row.try_get("seat_class")?;
        let seat_class = class.parse::<SeatClass>().map_err(|e| {
            CatalogError::Database(sqlx::Error::Decode(e.into()))
        })?;

        Ok(SeatMapEntry {
            seat_id: row.try_get("seat_id")?,
            seat_number: row.try_get("seat_number")?,
            row_number: row.try_get("row_number")?,
            seat_class,
            position: row.try_get("position")?,
            base_price: row.try_get("base_price")?,
        })
    }
}

#[async_trait]
impl SeatCatalog for PgSeatCatalog {
    async fn get_seat_map(&self, trip_id: TripId) -> Result<Vec<SeatMapEntry>, CatalogError> {
        // Цена места берётся из базовой цены рейса для класса места
        let rows = sqlx::query(
            r#"
            SELECT s.id AS seat_id, s.seat_number, s.row_number, s.seat_class, s.position,
                   (CASE s.seat_class
                        WHEN 'vip' THEN t.vip_fare
                        WHEN 'business' THEN t.business_fare
                        ELSE t.normal_fare
                    END)::FLOAT8 AS base_price
            FROM trips t
            JOIN seats s ON s.bus_id = t.bus_id
            WHERE t.id = $1 AND t.is_active = true
            ORDER BY s.row_number, s.seat_number
            "#,
        )
        .bind(trip_id)
        .fetch_all(&self.pool)
        .await?;

        if rows.is_empty() {
            let exists: bool = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM trips WHERE id = $1 AND is_active = true)",
            )
            .bind(trip_id)
            .fetch_one(&self.pool)
            .await?;

            if !exists {
                return Err(CatalogError::TripNotFound(trip_id));
            }
        }

        debug!("Loaded {} seats for trip {} from database", rows.len(), trip_id);
        rows.into_iter().map(Self::map_row).collect()
    }
}
