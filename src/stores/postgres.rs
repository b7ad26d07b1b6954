use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, PgPool, Row};
use tracing::info;

use super::{ActiveSeat, BookingStore, StoreError};
use crate::models::{
    Booking, BookingId, BookingStatus, CustomerDetails, NewBooking, PaymentStatus, TripId,
};

const BOOKING_COLUMNS: &str = r#"
    SELECT b.id, b.reference, b.trip_id, b.holder_id, b.total_amount::FLOAT8 AS total_amount,
           b.status, b.full_name, b.id_number, b.email, b.phone, b.created_at, b.updated_at,
           COALESCE(
               ARRAY_AGG(bs.seat_id ORDER BY bs.seat_id) FILTER (WHERE bs.seat_id IS NOT NULL),
               '{}'
           ) AS seat_ids
    FROM bookings b
    LEFT JOIN booking_seats bs ON bs.booking_id = b.id
"#;

#[derive(Clone)]
pub struct PgBookingStore {
    pool: PgPool,
}

impl PgBookingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_row(row: PgRow) -> Result<Booking, StoreError> {
        let status: String = row.try_get("status")?;
        let status = status.parse::<BookingStatus>().map_err(StoreError::Corrupt)?;

        Ok(Booking {
            id: row.try_get("id")?,
            reference: row.try_get("reference")?,
            trip_id: row.try_get("trip_id")?,
            holder_id: row.try_get("holder_id")?,
            seat_ids: row.try_get("seat_ids")?,
            total_amount: row.try_get("total_amount")?,
            status,
            customer: CustomerDetails {
                full_name: row.try_get("full_name")?,
                id_number: row.try_get("id_number")?,
                email: row.try_get("email")?,
                phone: row.try_get("phone")?,
            },
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl BookingStore for PgBookingStore {
    async fn create_pending(&self, booking: NewBooking) -> Result<Booking, StoreError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            INSERT INTO bookings
                (reference, trip_id, holder_id, total_amount, status, full_name, id_number, email, phone)
            VALUES ($1, $2, $3, CAST($4 AS NUMERIC), 'pending', $5, $6, $7, $8)
            RETURNING id, created_at, updated_at
            "#,
        )
        .bind(&booking.reference)
        .bind(booking.trip_id)
        .bind(&booking.holder_id)
        .bind(booking.total_amount)
        .bind(&booking.customer.full_name)
        .bind(&booking.customer.id_number)
        .bind(&booking.customer.email)
        .bind(&booking.customer.phone)
        .fetch_one(&mut *tx)
        .await?;

        let booking_id: BookingId = row.try_get("id")?;

        for line in &booking.seats {
            sqlx::query(
                "INSERT INTO booking_seats (booking_id, seat_id, fare) VALUES ($1, $2, CAST($3 AS NUMERIC))",
            )
            .bind(booking_id)
            .bind(line.seat_id)
            .bind(line.fare)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        info!("Booking {} ({}) created as pending", booking_id, booking.reference);

        let mut seat_ids: Vec<_> = booking.seats.iter().map(|line| line.seat_id).collect();
        seat_ids.sort_unstable();

        Ok(Booking {
            id: booking_id,
            reference: booking.reference,
            trip_id: booking.trip_id,
            holder_id: booking.holder_id,
            seat_ids,
            total_amount: booking.total_amount,
            status: BookingStatus::Pending,
            customer: booking.customer,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    async fn find(&self, booking_id: BookingId) -> Result<Option<Booking>, StoreError> {
        let query = format!("{} WHERE b.id = $1 GROUP BY b.id", BOOKING_COLUMNS);
        let row = sqlx::query(&query)
            .bind(booking_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::map_row).transpose()
    }

    async fn transition(
        &self,
        booking_id: BookingId,
        from: BookingStatus,
        to: BookingStatus,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE bookings SET status = $3, updated_at = NOW() WHERE id = $1 AND status = $2",
        )
        .bind(booking_id)
        .bind(from.as_str())
        .bind(to.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn active_seats(&self, trip_id: TripId) -> Result<Vec<ActiveSeat>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT bs.seat_id, b.id AS booking_id, b.holder_id, b.status, b.created_at
            FROM booking_seats bs
            JOIN bookings b ON b.id = bs.booking_id
            WHERE b.trip_id = $1 AND b.status IN ('pending', 'paid')
            ORDER BY bs.seat_id
            "#,
        )
        .bind(trip_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| -> Result<ActiveSeat, StoreError> {
                let status: String = row.try_get("status")?;
                Ok(ActiveSeat {
                    seat_id: row.try_get("seat_id")?,
                    booking_id: row.try_get("booking_id")?,
                    holder_id: row.try_get("holder_id")?,
                    status: status.parse().map_err(StoreError::Corrupt)?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }

    async fn pending_created_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Booking>, StoreError> {
        let query = format!(
            "{} WHERE b.status = 'pending' AND b.created_at < $1 GROUP BY b.id ORDER BY b.id",
            BOOKING_COLUMNS
        );
        let rows = sqlx::query(&query)
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Self::map_row).collect()
    }

    async fn record_payment(
        &self,
        booking_id: BookingId,
        transaction_id: Option<&str>,
        status: PaymentStatus,
    ) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO payments (booking_id, transaction_id, status) VALUES ($1, $2, $3)")
            .bind(booking_id)
            .bind(transaction_id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
