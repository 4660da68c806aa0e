//! `PostgreSQL` schedule registry and reservation ledger.
//!
//! # Concurrency
//!
//! A reservation takes a transaction-scoped advisory lock per `(schedule, seat)`
//! in ascending seat order, checks for active entries, bumps the schedule counter
//! with a capacity guard, then inserts the order and its entries. Two requests
//! that share a seat serialize on that seat's lock; requests for disjoint seats
//! only meet at the counter row. The partial unique index
//! `order_items_active_seat_key` backs the locks up: if it ever fires, the
//! request is reported as [`BookingError::SeatUnavailable`].
//!
//! Transitions lock the order row (`FOR UPDATE`), so of two concurrent exits from
//! PENDING exactly one applies and the other observes the winner.

use chrono::{DateTime, NaiveDate, Utc};
use cinema_booking_core::ledger::{ReservationLedger, TransitionCheck};
use cinema_booking_core::registry::{ScheduleRegistry, validate_schedule, validate_seat_layout};
use cinema_booking_core::{
    BookingError, BookingFuture, BookingSnapshot, CounterDrift, ItemStatus, Movie, Order,
    OrderDraft, OrderId, OrderItem, OrderItemId, OrderStatus, Result, Schedule, ScheduleId, Seat,
    SeatAvailability, SeatId, SeatMap, Studio, StudioId, TransitionOutcome,
};
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

use crate::error::{ACTIVE_SEAT_INDEX, ORDER_NUMBER_KEY, corrupt, storage_error, violates};
use crate::rows::{
    MovieRow, OrderItemRow, OrderRow, ScheduleRow, SeatRow, StudioRow, to_i32, to_u32,
};

const SCHEDULE_COLUMNS: &str = "id, movie_id, studio_id, show_date, start_time, end_time, \
                                price_cents, booked_seats, deleted_at";

const ORDER_COLUMNS: &str = "id, user_id, order_number, payment_method, total_item_price_cents, \
                             status, expires_at, paid_at, created_at, updated_at";

const ITEM_COLUMNS: &str = "id, order_id, schedule_id, seat_id, status, price_cents, \
                            sub_total_price_cents, snapshot, created_at, updated_at, deleted_at";

#[derive(Debug, sqlx::FromRow)]
struct SeatAvailabilityRow {
    #[sqlx(flatten)]
    seat: SeatRow,
    available: bool,
}

fn uuids(ids: &[SeatId]) -> Vec<Uuid> {
    ids.iter().map(|id| *id.as_uuid()).collect()
}

/// Registry and ledger backed by a `PgPool`.
///
/// # Example
///
/// ```no_run
/// use cinema_booking_postgres::PostgresBookingStore;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = PostgresBookingStore::connect("postgres://localhost/cinema").await?;
/// store.migrate().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct PostgresBookingStore {
    pool: PgPool,
}

impl PostgresBookingStore {
    /// Wrap an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect with default pool settings.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::TransientStore`] or [`BookingError::Storage`] if
    /// the connection fails.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| storage_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply pending schema migrations.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::Storage`] if a migration fails.
    pub async fn migrate(&self) -> Result<()> {
        crate::migrate(&self.pool).await
    }

    #[tracing::instrument(
        skip(self, draft),
        fields(order_id = %draft.order_id, schedule_id = %draft.schedule_id, seats = draft.seat_ids.len()),
        err
    )]
    async fn reserve(&self, draft: OrderDraft) -> Result<Order> {
        if draft.seat_ids.is_empty() {
            return Err(BookingError::InvalidRequest(
                "at least one seat is required".to_string(),
            ));
        }
        let mut sorted = draft.seat_ids.clone();
        sorted.sort();
        sorted.dedup();
        if sorted.len() != draft.seat_ids.len() {
            return Err(BookingError::InvalidRequest(
                "duplicate seats in request".to_string(),
            ));
        }
        let seat_count = u32::try_from(sorted.len())
            .map_err(|_| BookingError::InvalidRequest("too many seats".to_string()))?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| storage_error("begin reservation", e))?;

        let schedule: Schedule = sqlx::query_as::<_, ScheduleRow>(&format!(
            "SELECT {SCHEDULE_COLUMNS} FROM schedules WHERE id = $1 AND deleted_at IS NULL"
        ))
        .bind(draft.schedule_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| storage_error("load schedule", e))?
        .ok_or(BookingError::ScheduleNotFound(draft.schedule_id))?
        .try_into()?;

        let seats: HashMap<SeatId, Seat> = sqlx::query_as::<_, SeatRow>(
            "SELECT id, studio_id, row_label, seat_number FROM seats WHERE id = ANY($1)",
        )
        .bind(uuids(&sorted))
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| storage_error("load seats", e))?
        .into_iter()
        .map(|row| Seat::try_from(row).map(|seat| (seat.id, seat)))
        .collect::<Result<_>>()?;

        let foreign: Vec<SeatId> = sorted
            .iter()
            .filter(|id| {
                seats
                    .get(*id)
                    .is_none_or(|seat| seat.studio_id != schedule.studio_id)
            })
            .copied()
            .collect();
        if !foreign.is_empty() {
            return Err(BookingError::StudioMismatch { seat_ids: foreign });
        }

        for seat_id in &sorted {
            sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
                .bind(format!("{}:{seat_id}", schedule.id))
                .execute(&mut *tx)
                .await
                .map_err(|e| storage_error("lock seat", e))?;
        }

        let mut taken: Vec<SeatId> = sqlx::query_scalar::<_, Uuid>(
            r"
            SELECT seat_id
            FROM order_items
            WHERE schedule_id = $1
              AND seat_id = ANY($2)
              AND status IN ('PENDING', 'CONFIRMED')
              AND deleted_at IS NULL
            ",
        )
        .bind(schedule.id.as_uuid())
        .bind(uuids(&sorted))
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| storage_error("check seat availability", e))?
        .into_iter()
        .map(SeatId::from)
        .collect();
        if !taken.is_empty() {
            taken.sort();
            return Err(BookingError::SeatUnavailable {
                conflicting_seat_ids: taken,
            });
        }

        let counted = sqlx::query(
            r"
            UPDATE schedules AS s
            SET booked_seats = s.booked_seats + $2
            FROM studios AS st
            WHERE s.id = $1
              AND st.id = s.studio_id
              AND s.deleted_at IS NULL
              AND s.booked_seats + $2 <= st.seat_capacity
            ",
        )
        .bind(schedule.id.as_uuid())
        .bind(to_i32("seat count", seat_count)?)
        .execute(&mut *tx)
        .await
        .map_err(|e| storage_error("increment booked seats", e))?;
        if counted.rows_affected() == 0 {
            let capacity: i32 = sqlx::query_scalar("SELECT seat_capacity FROM studios WHERE id = $1")
                .bind(schedule.studio_id.as_uuid())
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| storage_error("load studio capacity", e))?;
            return Err(BookingError::CapacityExceeded {
                schedule_id: schedule.id,
                capacity: to_u32("seat_capacity", capacity)?,
            });
        }

        let (movie_title, studio_name): (String, String) = sqlx::query_as(
            "SELECT m.title, st.name FROM movies AS m, studios AS st WHERE m.id = $1 AND st.id = $2",
        )
        .bind(schedule.movie_id.as_uuid())
        .bind(schedule.studio_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| storage_error("load snapshot details", e))?
        .ok_or(BookingError::MovieNotFound(schedule.movie_id))?;

        let total = schedule
            .price
            .checked_mul(i64::from(seat_count))
            .ok_or_else(|| BookingError::InvalidRequest("order total overflows".to_string()))?;

        sqlx::query(
            r"
            INSERT INTO orders (
                id, user_id, order_number, payment_method, total_item_price_cents,
                status, expires_at, paid_at, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, 'PENDING', $6, NULL, $7, $7)
            ",
        )
        .bind(draft.order_id.as_uuid())
        .bind(draft.user_id.as_uuid())
        .bind(&draft.order_number)
        .bind(draft.payment_method.as_str())
        .bind(total.cents())
        .bind(draft.expires_at)
        .bind(draft.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if violates(&e, ORDER_NUMBER_KEY) {
                BookingError::TransientStore(format!(
                    "order number {} already exists",
                    draft.order_number
                ))
            } else {
                storage_error("insert order", e)
            }
        })?;

        let mut items = Vec::with_capacity(draft.seat_ids.len());
        for seat_id in &draft.seat_ids {
            let seat = seats.get(seat_id).ok_or_else(|| BookingError::StudioMismatch {
                seat_ids: vec![*seat_id],
            })?;
            let item = OrderItem {
                id: OrderItemId::new(),
                order_id: draft.order_id,
                schedule_id: schedule.id,
                seat_id: *seat_id,
                status: ItemStatus::Pending,
                price: schedule.price,
                sub_total_price: schedule.price,
                snapshot: BookingSnapshot {
                    movie_title: movie_title.clone(),
                    studio_name: studio_name.clone(),
                    date: schedule.date,
                    start_time: schedule.start_time,
                    end_time: schedule.end_time,
                    row_label: seat.row_label.clone(),
                    seat_number: seat.seat_number,
                    price: schedule.price,
                },
                created_at: draft.created_at,
                updated_at: draft.created_at,
                deleted_at: None,
            };

            sqlx::query(
                r"
                INSERT INTO order_items (
                    id, order_id, schedule_id, seat_id, status, price_cents,
                    sub_total_price_cents, snapshot, created_at, updated_at
                ) VALUES ($1, $2, $3, $4, 'PENDING', $5, $6, $7, $8, $8)
                ",
            )
            .bind(item.id.as_uuid())
            .bind(item.order_id.as_uuid())
            .bind(item.schedule_id.as_uuid())
            .bind(item.seat_id.as_uuid())
            .bind(item.price.cents())
            .bind(item.sub_total_price.cents())
            .bind(Json(&item.snapshot))
            .bind(item.created_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                if violates(&e, ACTIVE_SEAT_INDEX) {
                    metrics::counter!("booking_seat_index_conflicts_total").increment(1);
                    tracing::warn!(seat_id = %seat_id, "Active seat index rejected entry");
                    BookingError::SeatUnavailable {
                        conflicting_seat_ids: vec![*seat_id],
                    }
                } else {
                    storage_error("insert order item", e)
                }
            })?;

            items.push(item);
        }

        tx.commit()
            .await
            .map_err(|e| storage_error("commit reservation", e))?;

        Ok(Order {
            id: draft.order_id,
            user_id: draft.user_id,
            order_number: draft.order_number,
            payment_method: draft.payment_method,
            total_item_price: total,
            status: OrderStatus::Pending,
            expires_at: draft.expires_at,
            paid_at: None,
            created_at: draft.created_at,
            updated_at: draft.created_at,
            items,
        })
    }

    #[tracing::instrument(skip(self), err)]
    async fn transition(
        &self,
        order_id: OrderId,
        to: OrderStatus,
        at: DateTime<Utc>,
    ) -> Result<TransitionOutcome> {
        if to == OrderStatus::Pending {
            return Err(BookingError::InvalidRequest(
                "orders cannot return to PENDING".to_string(),
            ));
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| storage_error("begin transition", e))?;

        let current: OrderStatus = sqlx::query_scalar::<_, String>(
            "SELECT status FROM orders WHERE id = $1 FOR UPDATE",
        )
        .bind(order_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| storage_error("lock order", e))?
        .ok_or(BookingError::OrderNotFound(order_id))?
        .parse()
        .map_err(|e: String| corrupt("status", e))?;

        match TransitionCheck::evaluate(current, to) {
            TransitionCheck::Apply => {}
            check => {
                let order = fetch_order(&mut tx, order_id)
                    .await?
                    .ok_or(BookingError::OrderNotFound(order_id))?;
                tx.commit()
                    .await
                    .map_err(|e| storage_error("commit transition", e))?;
                return Ok(if check == TransitionCheck::AlreadyInState {
                    TransitionOutcome::AlreadyInState(order)
                } else {
                    TransitionOutcome::Superseded(order)
                });
            }
        }

        let changed: Vec<Uuid> = sqlx::query_scalar(
            r"
            UPDATE order_items
            SET status = $2, updated_at = $3
            WHERE order_id = $1 AND status = 'PENDING'
            RETURNING schedule_id
            ",
        )
        .bind(order_id.as_uuid())
        .bind(to.item_status().as_str())
        .bind(at)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| storage_error("update order items", e))?;

        let mut released = 0u32;
        if to.releases_seats() {
            let mut per_schedule: BTreeMap<Uuid, u32> = BTreeMap::new();
            for schedule_id in changed {
                *per_schedule.entry(schedule_id).or_default() += 1;
            }
            for (schedule_id, count) in per_schedule {
                sqlx::query(
                    "UPDATE schedules SET booked_seats = GREATEST(booked_seats - $2, 0) WHERE id = $1",
                )
                .bind(schedule_id)
                .bind(to_i32("released seats", count)?)
                .execute(&mut *tx)
                .await
                .map_err(|e| storage_error("decrement booked seats", e))?;
                released += count;
            }
        }

        sqlx::query(
            r"
            UPDATE orders
            SET status = $2,
                updated_at = $3,
                paid_at = CASE WHEN $2 = 'PAID' THEN $3 ELSE paid_at END
            WHERE id = $1
            ",
        )
        .bind(order_id.as_uuid())
        .bind(to.as_str())
        .bind(at)
        .execute(&mut *tx)
        .await
        .map_err(|e| storage_error("update order", e))?;

        let order = fetch_order(&mut tx, order_id)
            .await?
            .ok_or(BookingError::OrderNotFound(order_id))?;
        tx.commit()
            .await
            .map_err(|e| storage_error("commit transition", e))?;

        Ok(TransitionOutcome::Applied { order, released })
    }

    #[tracing::instrument(skip(self), err)]
    async fn reconcile(&self, schedule_id: Option<ScheduleId>) -> Result<Vec<CounterDrift>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| storage_error("begin reconciliation", e))?;

        // Lock first, count in a later statement so the count sees every commit
        // that finished before the locks were granted.
        let locked: Vec<Uuid> = sqlx::query_scalar(
            "SELECT id FROM schedules WHERE ($1::uuid IS NULL OR id = $1) ORDER BY id FOR UPDATE",
        )
        .bind(schedule_id.map(|id| *id.as_uuid()))
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| storage_error("lock schedules", e))?;
        if let Some(id) = schedule_id {
            if locked.is_empty() {
                return Err(BookingError::ScheduleNotFound(id));
            }
        }

        let rows: Vec<(Uuid, i32, i64)> = sqlx::query_as(
            r"
            SELECT s.id, s.booked_seats, COUNT(i.id)
            FROM schedules AS s
            LEFT JOIN order_items AS i
              ON i.schedule_id = s.id
             AND i.status IN ('PENDING', 'CONFIRMED')
             AND i.deleted_at IS NULL
            WHERE s.id = ANY($1)
            GROUP BY s.id, s.booked_seats
            HAVING s.booked_seats <> COUNT(i.id)
            ORDER BY s.id
            ",
        )
        .bind(&locked)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| storage_error("count active entries", e))?;

        let mut drifts = Vec::with_capacity(rows.len());
        for (id, cached, actual) in rows {
            let actual = u32::try_from(actual).map_err(|e| corrupt("active entry count", e))?;
            sqlx::query("UPDATE schedules SET booked_seats = $2 WHERE id = $1")
                .bind(id)
                .bind(to_i32("booked seats", actual)?)
                .execute(&mut *tx)
                .await
                .map_err(|e| storage_error("correct booked seats", e))?;
            drifts.push(CounterDrift {
                schedule_id: id.into(),
                cached: to_u32("booked_seats", cached)?,
                actual,
            });
        }

        tx.commit()
            .await
            .map_err(|e| storage_error("commit reconciliation", e))?;
        Ok(drifts)
    }

    async fn live_schedule(&self, schedule_id: ScheduleId) -> Result<Option<Schedule>> {
        sqlx::query_as::<_, ScheduleRow>(&format!(
            "SELECT {SCHEDULE_COLUMNS} FROM schedules WHERE id = $1 AND deleted_at IS NULL"
        ))
        .bind(schedule_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| storage_error("load schedule", e))?
        .map(Schedule::try_from)
        .transpose()
    }

    async fn create_studio_with_seats(
        &self,
        name: String,
        layout: Vec<(String, u32)>,
    ) -> Result<Studio> {
        validate_seat_layout(&layout)?;
        let studio = Studio {
            id: StudioId::new(),
            name,
            seat_capacity: u32::try_from(layout.len())
                .map_err(|_| BookingError::InvalidRequest("too many seats".to_string()))?,
        };

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| storage_error("begin create studio", e))?;

        let studio: Studio = sqlx::query_as::<_, StudioRow>(
            r"
            INSERT INTO studios (id, name, seat_capacity)
            VALUES ($1, $2, $3)
            RETURNING id, name, seat_capacity
            ",
        )
        .bind(studio.id.as_uuid())
        .bind(&studio.name)
        .bind(to_i32("seat capacity", studio.seat_capacity)?)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| storage_error("insert studio", e))?
        .try_into()?;

        for (row_label, seat_number) in layout {
            let seat = Seat::new(studio.id, row_label, seat_number);
            sqlx::query(
                "INSERT INTO seats (id, studio_id, row_label, seat_number) VALUES ($1, $2, $3, $4)",
            )
            .bind(seat.id.as_uuid())
            .bind(seat.studio_id.as_uuid())
            .bind(&seat.row_label)
            .bind(to_i32("seat number", seat.seat_number)?)
            .execute(&mut *tx)
            .await
            .map_err(|e| storage_error("insert seat", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| storage_error("commit create studio", e))?;
        tracing::info!(studio_id = %studio.id, seats = studio.seat_capacity, "Studio created");
        Ok(studio)
    }

    async fn insert_schedule(&self, new: cinema_booking_core::NewSchedule) -> Result<Schedule> {
        validate_schedule(&new)?;

        let movie_exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM movies WHERE id = $1)")
                .bind(new.movie_id.as_uuid())
                .fetch_one(&self.pool)
                .await
                .map_err(|e| storage_error("check movie", e))?;
        if !movie_exists {
            return Err(BookingError::MovieNotFound(new.movie_id));
        }
        let studio_exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM studios WHERE id = $1)")
                .bind(new.studio_id.as_uuid())
                .fetch_one(&self.pool)
                .await
                .map_err(|e| storage_error("check studio", e))?;
        if !studio_exists {
            return Err(BookingError::StudioNotFound(new.studio_id));
        }

        sqlx::query_as::<_, ScheduleRow>(&format!(
            r"
            INSERT INTO schedules (
                id, movie_id, studio_id, show_date, start_time, end_time, price_cents, booked_seats
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, 0)
            RETURNING {SCHEDULE_COLUMNS}
            "
        ))
        .bind(Uuid::new_v4())
        .bind(new.movie_id.as_uuid())
        .bind(new.studio_id.as_uuid())
        .bind(new.date)
        .bind(new.start_time)
        .bind(new.end_time)
        .bind(new.price.cents())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| storage_error("insert schedule", e))?
        .try_into()
    }

    #[tracing::instrument(skip(self), err)]
    async fn soft_delete_schedule(
        &self,
        schedule_id: ScheduleId,
        at: DateTime<Utc>,
    ) -> Result<Schedule> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| storage_error("begin delete schedule", e))?;

        let live: Option<Uuid> = sqlx::query_scalar(
            "SELECT id FROM schedules WHERE id = $1 AND deleted_at IS NULL FOR UPDATE",
        )
        .bind(schedule_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| storage_error("lock schedule", e))?;
        if live.is_none() {
            return Err(BookingError::ScheduleNotFound(schedule_id));
        }

        let active: bool = sqlx::query_scalar(
            r"
            SELECT EXISTS (
                SELECT 1 FROM order_items
                WHERE schedule_id = $1
                  AND status IN ('PENDING', 'CONFIRMED')
                  AND deleted_at IS NULL
            )
            ",
        )
        .bind(schedule_id.as_uuid())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| storage_error("check active entries", e))?;
        if active {
            return Err(BookingError::ScheduleHasActiveReservations(schedule_id));
        }

        let schedule: Schedule = sqlx::query_as::<_, ScheduleRow>(&format!(
            "UPDATE schedules SET deleted_at = $2 WHERE id = $1 RETURNING {SCHEDULE_COLUMNS}"
        ))
        .bind(schedule_id.as_uuid())
        .bind(at)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| storage_error("delete schedule", e))?
        .try_into()?;

        tx.commit()
            .await
            .map_err(|e| storage_error("commit delete schedule", e))?;
        Ok(schedule)
    }

    async fn seats_of(&self, studio_id: StudioId) -> Result<Vec<Seat>> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM studios WHERE id = $1)")
            .bind(studio_id.as_uuid())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| storage_error("check studio", e))?;
        if !exists {
            return Err(BookingError::StudioNotFound(studio_id));
        }

        sqlx::query_as::<_, SeatRow>(
            r"
            SELECT id, studio_id, row_label, seat_number
            FROM seats
            WHERE studio_id = $1
            ORDER BY row_label, seat_number
            ",
        )
        .bind(studio_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| storage_error("load studio seats", e))?
        .into_iter()
        .map(Seat::try_from)
        .collect()
    }

    async fn availability(&self, schedule_id: ScheduleId) -> Result<SeatMap> {
        let schedule = self
            .live_schedule(schedule_id)
            .await?
            .ok_or(BookingError::ScheduleNotFound(schedule_id))?;

        let seats = sqlx::query_as::<_, SeatAvailabilityRow>(
            r"
            SELECT s.id, s.studio_id, s.row_label, s.seat_number,
                   NOT EXISTS (
                       SELECT 1 FROM order_items AS i
                       WHERE i.schedule_id = $1
                         AND i.seat_id = s.id
                         AND i.status IN ('PENDING', 'CONFIRMED')
                         AND i.deleted_at IS NULL
                   ) AS available
            FROM seats AS s
            WHERE s.studio_id = $2
            ORDER BY s.row_label, s.seat_number
            ",
        )
        .bind(schedule_id.as_uuid())
        .bind(schedule.studio_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| storage_error("load seat map", e))?
        .into_iter()
        .map(|row| {
            Ok(SeatAvailability {
                seat: row.seat.try_into()?,
                available: row.available,
            })
        })
        .collect::<Result<_>>()?;

        Ok(SeatMap { schedule_id, seats })
    }
}

/// Load an order and its entries on `conn`.
pub(crate) async fn fetch_order(conn: &mut PgConnection, order_id: OrderId) -> Result<Option<Order>> {
    let Some(row) = sqlx::query_as::<_, OrderRow>(&format!(
        "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"
    ))
    .bind(order_id.as_uuid())
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| storage_error("load order", e))?
    else {
        return Ok(None);
    };

    let items = sqlx::query_as::<_, OrderItemRow>(&format!(
        "SELECT {ITEM_COLUMNS} FROM order_items WHERE order_id = $1 ORDER BY created_at, id"
    ))
    .bind(order_id.as_uuid())
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| storage_error("load order items", e))?
    .into_iter()
    .map(OrderItem::try_from)
    .collect::<Result<Vec<_>>>()?;

    row.into_order(items).map(Some)
}

impl ReservationLedger for PostgresBookingStore {
    fn reserve_seats(&self, draft: OrderDraft) -> BookingFuture<'_, Order> {
        Box::pin(self.reserve(draft))
    }

    fn transition_order(
        &self,
        order_id: OrderId,
        to: OrderStatus,
        at: DateTime<Utc>,
    ) -> BookingFuture<'_, TransitionOutcome> {
        Box::pin(self.transition(order_id, to, at))
    }

    fn load_order(&self, order_id: OrderId) -> BookingFuture<'_, Option<Order>> {
        Box::pin(async move {
            let mut conn = self
                .pool
                .acquire()
                .await
                .map_err(|e| storage_error("acquire connection", e))?;
            fetch_order(&mut conn, order_id).await
        })
    }

    fn entries_for_schedule(&self, schedule_id: ScheduleId) -> BookingFuture<'_, Vec<OrderItem>> {
        Box::pin(async move {
            sqlx::query_as::<_, OrderItemRow>(&format!(
                "SELECT {ITEM_COLUMNS} FROM order_items WHERE schedule_id = $1 ORDER BY created_at, id"
            ))
            .bind(schedule_id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| storage_error("load schedule entries", e))?
            .into_iter()
            .map(OrderItem::try_from)
            .collect()
        })
    }

    fn overdue_orders(&self, now: DateTime<Utc>, limit: usize) -> BookingFuture<'_, Vec<OrderId>> {
        Box::pin(async move {
            let limit = i64::try_from(limit).unwrap_or(i64::MAX);
            let ids: Vec<Uuid> = sqlx::query_scalar(
                r"
                SELECT id FROM orders
                WHERE status = 'PENDING' AND expires_at <= $1
                ORDER BY expires_at, id
                LIMIT $2
                ",
            )
            .bind(now)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| storage_error("find overdue orders", e))?;
            Ok(ids.into_iter().map(OrderId::from).collect())
        })
    }

    fn reconcile_booked_seats(
        &self,
        schedule_id: Option<ScheduleId>,
    ) -> BookingFuture<'_, Vec<CounterDrift>> {
        Box::pin(self.reconcile(schedule_id))
    }
}

impl ScheduleRegistry for PostgresBookingStore {
    fn create_movie(&self, movie: Movie) -> BookingFuture<'_, Movie> {
        Box::pin(async move {
            if movie.duration_minutes == 0 {
                return Err(BookingError::InvalidRequest(
                    "movie duration must be positive".to_string(),
                ));
            }
            let row: MovieRow = sqlx::query_as(
                r"
                INSERT INTO movies (id, title, duration_minutes)
                VALUES ($1, $2, $3)
                RETURNING id, title, duration_minutes
                ",
            )
            .bind(movie.id.as_uuid())
            .bind(&movie.title)
            .bind(to_i32("duration", movie.duration_minutes)?)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| storage_error("insert movie", e))?;
            row.try_into()
        })
    }

    fn create_studio(&self, name: String, seats: Vec<(String, u32)>) -> BookingFuture<'_, Studio> {
        Box::pin(self.create_studio_with_seats(name, seats))
    }

    fn create_schedule(
        &self,
        schedule: cinema_booking_core::NewSchedule,
    ) -> BookingFuture<'_, Schedule> {
        Box::pin(self.insert_schedule(schedule))
    }

    fn get_schedule(&self, schedule_id: ScheduleId) -> BookingFuture<'_, Option<Schedule>> {
        Box::pin(self.live_schedule(schedule_id))
    }

    fn list_schedules(&self, date: NaiveDate) -> BookingFuture<'_, Vec<Schedule>> {
        Box::pin(async move {
            sqlx::query_as::<_, ScheduleRow>(&format!(
                r"
                SELECT {SCHEDULE_COLUMNS}
                FROM schedules
                WHERE show_date = $1 AND deleted_at IS NULL
                ORDER BY start_time, id
                "
            ))
            .bind(date)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| storage_error("list schedules", e))?
            .into_iter()
            .map(Schedule::try_from)
            .collect()
        })
    }

    fn delete_schedule(
        &self,
        schedule_id: ScheduleId,
        at: DateTime<Utc>,
    ) -> BookingFuture<'_, Schedule> {
        Box::pin(self.soft_delete_schedule(schedule_id, at))
    }

    fn studio_seats(&self, studio_id: StudioId) -> BookingFuture<'_, Vec<Seat>> {
        Box::pin(self.seats_of(studio_id))
    }

    fn seat_map(&self, schedule_id: ScheduleId) -> BookingFuture<'_, SeatMap> {
        Box::pin(self.availability(schedule_id))
    }
}
