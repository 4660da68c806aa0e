//! Row types and their conversions into domain types.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use cinema_booking_core::expiry::ExpiryJob;
use cinema_booking_core::{
    BookingError, BookingSnapshot, Money, Movie, Order, OrderItem, Result, Schedule, Seat, Studio,
};
use sqlx::types::Json;
use uuid::Uuid;

use crate::error::corrupt;

/// Read a non-negative `INTEGER` column as `u32`.
pub(crate) fn to_u32(column: &str, value: i32) -> Result<u32> {
    u32::try_from(value).map_err(|e| corrupt(column, e))
}

/// Convert a count or number to an `INTEGER` bind parameter.
pub(crate) fn to_i32(what: &str, value: u32) -> Result<i32> {
    i32::try_from(value).map_err(|_| BookingError::InvalidRequest(format!("{what} out of range")))
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct MovieRow {
    pub id: Uuid,
    pub title: String,
    pub duration_minutes: i32,
}

impl TryFrom<MovieRow> for Movie {
    type Error = BookingError;

    fn try_from(row: MovieRow) -> Result<Self> {
        Ok(Self {
            id: row.id.into(),
            title: row.title,
            duration_minutes: to_u32("duration_minutes", row.duration_minutes)?,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct StudioRow {
    pub id: Uuid,
    pub name: String,
    pub seat_capacity: i32,
}

impl TryFrom<StudioRow> for Studio {
    type Error = BookingError;

    fn try_from(row: StudioRow) -> Result<Self> {
        Ok(Self {
            id: row.id.into(),
            name: row.name,
            seat_capacity: to_u32("seat_capacity", row.seat_capacity)?,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct SeatRow {
    pub id: Uuid,
    pub studio_id: Uuid,
    pub row_label: String,
    pub seat_number: i32,
}

impl TryFrom<SeatRow> for Seat {
    type Error = BookingError;

    fn try_from(row: SeatRow) -> Result<Self> {
        Ok(Self {
            id: row.id.into(),
            studio_id: row.studio_id.into(),
            row_label: row.row_label,
            seat_number: to_u32("seat_number", row.seat_number)?,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ScheduleRow {
    pub id: Uuid,
    pub movie_id: Uuid,
    pub studio_id: Uuid,
    pub show_date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub price_cents: i64,
    pub booked_seats: i32,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl TryFrom<ScheduleRow> for Schedule {
    type Error = BookingError;

    fn try_from(row: ScheduleRow) -> Result<Self> {
        Ok(Self {
            id: row.id.into(),
            movie_id: row.movie_id.into(),
            studio_id: row.studio_id.into(),
            date: row.show_date,
            start_time: row.start_time,
            end_time: row.end_time,
            price: Money::from_cents(row.price_cents),
            booked_seats: to_u32("booked_seats", row.booked_seats)?,
            deleted_at: row.deleted_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct OrderRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub order_number: String,
    pub payment_method: String,
    pub total_item_price_cents: i64,
    pub status: String,
    pub expires_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrderRow {
    pub(crate) fn into_order(self, items: Vec<OrderItem>) -> Result<Order> {
        Ok(Order {
            id: self.id.into(),
            user_id: self.user_id.into(),
            order_number: self.order_number,
            payment_method: self
                .payment_method
                .parse()
                .map_err(|e: String| corrupt("payment_method", e))?,
            total_item_price: Money::from_cents(self.total_item_price_cents),
            status: self.status.parse().map_err(|e: String| corrupt("status", e))?,
            expires_at: self.expires_at,
            paid_at: self.paid_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
            items,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct OrderItemRow {
    pub id: Uuid,
    pub order_id: Uuid,
    pub schedule_id: Uuid,
    pub seat_id: Uuid,
    pub status: String,
    pub price_cents: i64,
    pub sub_total_price_cents: i64,
    pub snapshot: Json<BookingSnapshot>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl TryFrom<OrderItemRow> for OrderItem {
    type Error = BookingError;

    fn try_from(row: OrderItemRow) -> Result<Self> {
        Ok(Self {
            id: row.id.into(),
            order_id: row.order_id.into(),
            schedule_id: row.schedule_id.into(),
            seat_id: row.seat_id.into(),
            status: row.status.parse().map_err(|e: String| corrupt("item status", e))?,
            price: Money::from_cents(row.price_cents),
            sub_total_price: Money::from_cents(row.sub_total_price_cents),
            snapshot: row.snapshot.0,
            created_at: row.created_at,
            updated_at: row.updated_at,
            deleted_at: row.deleted_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct JobRow {
    pub order_id: Uuid,
    pub run_at: DateTime<Utc>,
    pub attempts: i32,
    pub status: String,
    pub last_error: Option<String>,
}

impl TryFrom<JobRow> for ExpiryJob {
    type Error = BookingError;

    fn try_from(row: JobRow) -> Result<Self> {
        Ok(Self {
            order_id: row.order_id.into(),
            run_at: row.run_at,
            attempts: to_u32("attempts", row.attempts)?,
            status: row.status.parse().map_err(|e: String| corrupt("job status", e))?,
            last_error: row.last_error,
        })
    }
}
