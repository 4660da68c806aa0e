//! In-memory registry and reservation ledger.
//!
//! Every operation takes one mutex for its whole body, which makes each call a
//! serializable transaction. That is enough to exercise the booking invariants
//! (no double booking, single exit from PENDING, counter consistency) from
//! concurrent tasks without a database.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Panics only on poisoned locks

use chrono::{DateTime, NaiveDate, Utc};
use cinema_booking_core::ledger::{ReservationLedger, TransitionCheck};
use cinema_booking_core::registry::{ScheduleRegistry, validate_schedule, validate_seat_layout};
use cinema_booking_core::{
    BookingError, BookingFuture, BookingSnapshot, CounterDrift, ItemStatus, Movie, MovieId,
    NewSchedule, Order, OrderDraft, OrderId, OrderItem, OrderItemId, OrderStatus, Result,
    Schedule, ScheduleId, Seat, SeatAvailability, SeatId, SeatMap, Studio, StudioId,
    TransitionOutcome,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct State {
    movies: HashMap<MovieId, Movie>,
    studios: HashMap<StudioId, Studio>,
    seats: HashMap<SeatId, Seat>,
    schedules: HashMap<ScheduleId, Schedule>,
    orders: HashMap<OrderId, Order>,
    order_numbers: HashSet<String>,
}

impl State {
    fn live_schedule(&self, schedule_id: ScheduleId) -> Result<&Schedule> {
        self.schedules
            .get(&schedule_id)
            .filter(|s| !s.is_deleted())
            .ok_or(BookingError::ScheduleNotFound(schedule_id))
    }

    fn active_items(&self, schedule_id: ScheduleId) -> impl Iterator<Item = &OrderItem> {
        self.orders
            .values()
            .flat_map(|order| order.items.iter())
            .filter(move |item| {
                item.schedule_id == schedule_id
                    && item.status.is_active()
                    && item.deleted_at.is_none()
            })
    }

    fn held_seats(&self, schedule_id: ScheduleId) -> HashSet<SeatId> {
        self.active_items(schedule_id).map(|item| item.seat_id).collect()
    }

    fn studio_seats(&self, studio_id: StudioId) -> Vec<Seat> {
        let mut seats: Vec<Seat> = self
            .seats
            .values()
            .filter(|seat| seat.studio_id == studio_id)
            .cloned()
            .collect();
        seats.sort_by(|a, b| {
            a.row_label
                .cmp(&b.row_label)
                .then(a.seat_number.cmp(&b.seat_number))
        });
        seats
    }
}

/// In-memory [`ScheduleRegistry`] and [`ReservationLedger`].
///
/// Clones share state. Ledger operations can be made to fail with
/// [`BookingError::TransientStore`] through [`InMemoryBookingStore::fail_next`].
#[derive(Debug, Clone, Default)]
pub struct InMemoryBookingStore {
    state: Arc<Mutex<State>>,
    faults: Arc<AtomicUsize>,
}

impl InMemoryBookingStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` ledger operations fail with a transient error.
    pub fn fail_next(&self, n: usize) {
        self.faults.store(n, Ordering::SeqCst);
    }

    /// Overwrite a schedule's cached counter, simulating drift.
    pub fn set_booked_seats(&self, schedule_id: ScheduleId, booked_seats: u32) {
        if let Some(schedule) = self.lock().schedules.get_mut(&schedule_id) {
            schedule.booked_seats = booked_seats;
        }
    }

    /// Cached counter of a schedule, including soft-deleted ones.
    #[must_use]
    pub fn booked_seats(&self, schedule_id: ScheduleId) -> Option<u32> {
        self.lock().schedules.get(&schedule_id).map(|s| s.booked_seats)
    }

    /// Number of PENDING or CONFIRMED entries for a schedule.
    #[must_use]
    pub fn active_entry_count(&self, schedule_id: ScheduleId) -> usize {
        self.lock().active_items(schedule_id).count()
    }

    /// Every order in the store.
    #[must_use]
    pub fn orders(&self) -> Vec<Order> {
        self.lock().orders.values().cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    fn inject_fault(&self) -> Result<()> {
        let remaining = self
            .faults
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if remaining.is_ok() {
            return Err(BookingError::TransientStore(
                "injected fault: connection reset".to_string(),
            ));
        }
        Ok(())
    }

    fn reserve(&self, draft: OrderDraft) -> Result<Order> {
        self.inject_fault()?;
        let mut state = self.lock();

        if draft.seat_ids.is_empty() {
            return Err(BookingError::InvalidRequest(
                "at least one seat is required".to_string(),
            ));
        }
        let unique: HashSet<SeatId> = draft.seat_ids.iter().copied().collect();
        if unique.len() != draft.seat_ids.len() {
            return Err(BookingError::InvalidRequest(
                "duplicate seats in request".to_string(),
            ));
        }

        let schedule = state.live_schedule(draft.schedule_id)?.clone();

        let mut foreign: Vec<SeatId> = draft
            .seat_ids
            .iter()
            .filter(|id| {
                state
                    .seats
                    .get(*id)
                    .is_none_or(|seat| seat.studio_id != schedule.studio_id)
            })
            .copied()
            .collect();
        if !foreign.is_empty() {
            foreign.sort();
            return Err(BookingError::StudioMismatch { seat_ids: foreign });
        }

        let held = state.held_seats(draft.schedule_id);
        let mut conflicts: Vec<SeatId> = draft
            .seat_ids
            .iter()
            .filter(|id| held.contains(*id))
            .copied()
            .collect();
        if !conflicts.is_empty() {
            conflicts.sort();
            return Err(BookingError::SeatUnavailable {
                conflicting_seat_ids: conflicts,
            });
        }

        let studio = state
            .studios
            .get(&schedule.studio_id)
            .cloned()
            .ok_or(BookingError::StudioNotFound(schedule.studio_id))?;
        let seat_count = u32::try_from(draft.seat_ids.len())
            .map_err(|_| BookingError::InvalidRequest("too many seats".to_string()))?;
        if schedule.booked_seats + seat_count > studio.seat_capacity {
            return Err(BookingError::CapacityExceeded {
                schedule_id: schedule.id,
                capacity: studio.seat_capacity,
            });
        }

        if state.order_numbers.contains(&draft.order_number) {
            return Err(BookingError::TransientStore(format!(
                "order number {} already exists",
                draft.order_number
            )));
        }

        let movie = state
            .movies
            .get(&schedule.movie_id)
            .cloned()
            .ok_or(BookingError::MovieNotFound(schedule.movie_id))?;

        let items: Vec<OrderItem> = draft
            .seat_ids
            .iter()
            .map(|seat_id| {
                let seat = &state.seats[seat_id];
                OrderItem {
                    id: OrderItemId::new(),
                    order_id: draft.order_id,
                    schedule_id: schedule.id,
                    seat_id: *seat_id,
                    status: ItemStatus::Pending,
                    price: schedule.price,
                    sub_total_price: schedule.price,
                    snapshot: BookingSnapshot {
                        movie_title: movie.title.clone(),
                        studio_name: studio.name.clone(),
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
                }
            })
            .collect();

        let total = schedule
            .price
            .checked_mul(i64::from(seat_count))
            .ok_or_else(|| BookingError::InvalidRequest("order total overflows".to_string()))?;

        let order = Order {
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
        };

        state.order_numbers.insert(order.order_number.clone());
        state.orders.insert(order.id, order.clone());
        if let Some(schedule) = state.schedules.get_mut(&schedule.id) {
            schedule.booked_seats += seat_count;
        }

        Ok(order)
    }

    fn transition(
        &self,
        order_id: OrderId,
        to: OrderStatus,
        at: DateTime<Utc>,
    ) -> Result<TransitionOutcome> {
        self.inject_fault()?;
        if to == OrderStatus::Pending {
            return Err(BookingError::InvalidRequest(
                "orders cannot return to PENDING".to_string(),
            ));
        }

        let mut state = self.lock();
        let State {
            orders, schedules, ..
        } = &mut *state;
        let order = orders
            .get_mut(&order_id)
            .ok_or(BookingError::OrderNotFound(order_id))?;

        match TransitionCheck::evaluate(order.status, to) {
            TransitionCheck::AlreadyInState => {
                return Ok(TransitionOutcome::AlreadyInState(order.clone()));
            }
            TransitionCheck::Superseded => return Ok(TransitionOutcome::Superseded(order.clone())),
            TransitionCheck::Apply => {}
        }

        let item_status = to.item_status();
        let mut released: BTreeMap<ScheduleId, u32> = BTreeMap::new();
        for item in order
            .items
            .iter_mut()
            .filter(|item| item.status == ItemStatus::Pending)
        {
            item.status = item_status;
            item.updated_at = at;
            if to.releases_seats() {
                *released.entry(item.schedule_id).or_default() += 1;
            }
        }

        order.status = to;
        order.updated_at = at;
        if to == OrderStatus::Paid {
            order.paid_at = Some(at);
        }

        for (schedule_id, count) in &released {
            if let Some(schedule) = schedules.get_mut(schedule_id) {
                schedule.booked_seats = schedule.booked_seats.saturating_sub(*count);
            }
        }

        Ok(TransitionOutcome::Applied {
            order: order.clone(),
            released: released.values().sum(),
        })
    }

    fn reconcile(&self, schedule_id: Option<ScheduleId>) -> Result<Vec<CounterDrift>> {
        self.inject_fault()?;
        let mut state = self.lock();

        let targets: Vec<ScheduleId> = match schedule_id {
            Some(id) if state.schedules.contains_key(&id) => vec![id],
            Some(id) => return Err(BookingError::ScheduleNotFound(id)),
            None => state.schedules.keys().copied().collect(),
        };

        let mut drifts = Vec::new();
        for id in targets {
            let actual = u32::try_from(state.active_items(id).count()).unwrap_or(u32::MAX);
            if let Some(schedule) = state.schedules.get_mut(&id) {
                if schedule.booked_seats != actual {
                    drifts.push(CounterDrift {
                        schedule_id: id,
                        cached: schedule.booked_seats,
                        actual,
                    });
                    schedule.booked_seats = actual;
                }
            }
        }
        drifts.sort_by_key(|d| d.schedule_id);
        Ok(drifts)
    }
}

impl ReservationLedger for InMemoryBookingStore {
    fn reserve_seats(&self, draft: OrderDraft) -> BookingFuture<'_, Order> {
        Box::pin(async move { self.reserve(draft) })
    }

    fn transition_order(
        &self,
        order_id: OrderId,
        to: OrderStatus,
        at: DateTime<Utc>,
    ) -> BookingFuture<'_, TransitionOutcome> {
        Box::pin(async move { self.transition(order_id, to, at) })
    }

    fn load_order(&self, order_id: OrderId) -> BookingFuture<'_, Option<Order>> {
        Box::pin(async move {
            self.inject_fault()?;
            Ok(self.lock().orders.get(&order_id).cloned())
        })
    }

    fn entries_for_schedule(&self, schedule_id: ScheduleId) -> BookingFuture<'_, Vec<OrderItem>> {
        Box::pin(async move {
            self.inject_fault()?;
            let state = self.lock();
            let mut items: Vec<OrderItem> = state
                .orders
                .values()
                .flat_map(|order| order.items.iter())
                .filter(|item| item.schedule_id == schedule_id)
                .cloned()
                .collect();
            items.sort_by_key(|item| item.created_at);
            Ok(items)
        })
    }

    fn overdue_orders(&self, now: DateTime<Utc>, limit: usize) -> BookingFuture<'_, Vec<OrderId>> {
        Box::pin(async move {
            self.inject_fault()?;
            let state = self.lock();
            let mut overdue: Vec<(DateTime<Utc>, OrderId)> = state
                .orders
                .values()
                .filter(|order| order.status == OrderStatus::Pending && order.expires_at <= now)
                .map(|order| (order.expires_at, order.id))
                .collect();
            overdue.sort();
            Ok(overdue.into_iter().take(limit).map(|(_, id)| id).collect())
        })
    }

    fn reconcile_booked_seats(
        &self,
        schedule_id: Option<ScheduleId>,
    ) -> BookingFuture<'_, Vec<CounterDrift>> {
        Box::pin(async move { self.reconcile(schedule_id) })
    }
}

impl ScheduleRegistry for InMemoryBookingStore {
    fn create_movie(&self, movie: Movie) -> BookingFuture<'_, Movie> {
        Box::pin(async move {
            self.lock().movies.insert(movie.id, movie.clone());
            Ok(movie)
        })
    }

    fn create_studio(&self, name: String, seats: Vec<(String, u32)>) -> BookingFuture<'_, Studio> {
        Box::pin(async move {
            validate_seat_layout(&seats)?;
            let studio = Studio {
                id: StudioId::new(),
                name,
                seat_capacity: u32::try_from(seats.len())
                    .map_err(|_| BookingError::InvalidRequest("too many seats".to_string()))?,
            };

            let mut state = self.lock();
            for (row, number) in seats {
                let seat = Seat::new(studio.id, row, number);
                state.seats.insert(seat.id, seat);
            }
            state.studios.insert(studio.id, studio.clone());
            Ok(studio)
        })
    }

    fn create_schedule(&self, schedule: NewSchedule) -> BookingFuture<'_, Schedule> {
        Box::pin(async move {
            validate_schedule(&schedule)?;
            let mut state = self.lock();
            if !state.movies.contains_key(&schedule.movie_id) {
                return Err(BookingError::MovieNotFound(schedule.movie_id));
            }
            if !state.studios.contains_key(&schedule.studio_id) {
                return Err(BookingError::StudioNotFound(schedule.studio_id));
            }

            let created = Schedule {
                id: ScheduleId::new(),
                movie_id: schedule.movie_id,
                studio_id: schedule.studio_id,
                date: schedule.date,
                start_time: schedule.start_time,
                end_time: schedule.end_time,
                price: schedule.price,
                booked_seats: 0,
                deleted_at: None,
            };
            state.schedules.insert(created.id, created.clone());
            Ok(created)
        })
    }

    fn get_schedule(&self, schedule_id: ScheduleId) -> BookingFuture<'_, Option<Schedule>> {
        Box::pin(async move {
            Ok(self
                .lock()
                .schedules
                .get(&schedule_id)
                .filter(|s| !s.is_deleted())
                .cloned())
        })
    }

    fn list_schedules(&self, date: NaiveDate) -> BookingFuture<'_, Vec<Schedule>> {
        Box::pin(async move {
            let mut schedules: Vec<Schedule> = self
                .lock()
                .schedules
                .values()
                .filter(|s| !s.is_deleted() && s.date == date)
                .cloned()
                .collect();
            schedules.sort_by_key(|s| s.start_time);
            Ok(schedules)
        })
    }

    fn delete_schedule(
        &self,
        schedule_id: ScheduleId,
        at: DateTime<Utc>,
    ) -> BookingFuture<'_, Schedule> {
        Box::pin(async move {
            let mut state = self.lock();
            state.live_schedule(schedule_id)?;
            if state.active_items(schedule_id).next().is_some() {
                return Err(BookingError::ScheduleHasActiveReservations(schedule_id));
            }
            let schedule = state
                .schedules
                .get_mut(&schedule_id)
                .ok_or(BookingError::ScheduleNotFound(schedule_id))?;
            schedule.deleted_at = Some(at);
            Ok(schedule.clone())
        })
    }

    fn studio_seats(&self, studio_id: StudioId) -> BookingFuture<'_, Vec<Seat>> {
        Box::pin(async move {
            let state = self.lock();
            if !state.studios.contains_key(&studio_id) {
                return Err(BookingError::StudioNotFound(studio_id));
            }
            Ok(state.studio_seats(studio_id))
        })
    }

    fn seat_map(&self, schedule_id: ScheduleId) -> BookingFuture<'_, SeatMap> {
        Box::pin(async move {
            let state = self.lock();
            let schedule = state.live_schedule(schedule_id)?;
            let held = state.held_seats(schedule_id);
            let seats = state
                .studio_seats(schedule.studio_id)
                .into_iter()
                .map(|seat| SeatAvailability {
                    available: !held.contains(&seat.id),
                    seat,
                })
                .collect();
            Ok(SeatMap { schedule_id, seats })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;
    use cinema_booking_core::{Money, PaymentMethod, UserId};

    async fn seeded() -> (InMemoryBookingStore, Schedule, Vec<Seat>) {
        let store = InMemoryBookingStore::new();
        let movie = store.create_movie(Movie::new("Dune", 155)).await.unwrap();
        let studio = store
            .create_studio(
                "Studio 1".to_string(),
                (1..=4).map(|n| ("A".to_string(), n)).collect(),
            )
            .await
            .unwrap();
        let schedule = store
            .create_schedule(NewSchedule {
                movie_id: movie.id,
                studio_id: studio.id,
                date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
                start_time: NaiveTime::from_hms_opt(19, 0, 0).unwrap(),
                end_time: NaiveTime::from_hms_opt(21, 35, 0).unwrap(),
                price: Money::from_cents(5_000),
            })
            .await
            .unwrap();
        let seats = store.studio_seats(studio.id).await.unwrap();
        (store, schedule, seats)
    }

    fn draft(schedule: &Schedule, seats: &[SeatId], number: &str) -> OrderDraft {
        let now = Utc::now();
        OrderDraft {
            order_id: OrderId::new(),
            user_id: UserId::new(),
            order_number: number.to_string(),
            payment_method: PaymentMethod::CreditCard,
            schedule_id: schedule.id,
            seat_ids: seats.to_vec(),
            expires_at: now + chrono::Duration::minutes(15),
            created_at: now,
        }
    }

    #[tokio::test]
    async fn reserve_writes_entries_and_counter() {
        let (store, schedule, seats) = seeded().await;
        let order = store
            .reserve_seats(draft(&schedule, &[seats[0].id, seats[1].id], "ORD-1"))
            .await
            .unwrap();

        assert_eq!(order.items.len(), 2);
        assert_eq!(order.total_item_price, Money::from_cents(10_000));
        assert_eq!(order.items[0].snapshot.movie_title, "Dune");
        assert_eq!(store.booked_seats(schedule.id), Some(2));
    }

    #[tokio::test]
    async fn conflicting_reservation_reports_every_conflict() {
        let (store, schedule, seats) = seeded().await;
        store
            .reserve_seats(draft(&schedule, &[seats[0].id, seats[1].id], "ORD-1"))
            .await
            .unwrap();

        let err = store
            .reserve_seats(draft(&schedule, &[seats[1].id, seats[2].id, seats[0].id], "ORD-2"))
            .await
            .unwrap_err();

        let mut expected = vec![seats[0].id, seats[1].id];
        expected.sort();
        assert_eq!(
            err,
            BookingError::SeatUnavailable {
                conflicting_seat_ids: expected
            }
        );
        // Nothing from the failed attempt was written
        assert_eq!(store.booked_seats(schedule.id), Some(2));
        assert_eq!(store.orders().len(), 1);
    }

    #[tokio::test]
    async fn transition_is_compare_and_swap() {
        let (store, schedule, seats) = seeded().await;
        let order = store
            .reserve_seats(draft(&schedule, &[seats[0].id], "ORD-1"))
            .await
            .unwrap();
        let at = Utc::now();

        let first = store
            .transition_order(order.id, OrderStatus::Expired, at)
            .await
            .unwrap();
        assert!(matches!(first, TransitionOutcome::Applied { released: 1, .. }));

        let again = store
            .transition_order(order.id, OrderStatus::Expired, at)
            .await
            .unwrap();
        assert!(matches!(again, TransitionOutcome::AlreadyInState(_)));

        let late_payment = store
            .transition_order(order.id, OrderStatus::Paid, at)
            .await
            .unwrap();
        assert!(matches!(late_payment, TransitionOutcome::Superseded(ref o) if o.status == OrderStatus::Expired));
        assert_eq!(store.booked_seats(schedule.id), Some(0));
    }

    #[tokio::test]
    async fn list_schedules_filters_by_date_and_skips_deleted() {
        let (store, evening, _) = seeded().await;
        let day = evening.date;
        let at = |h: u32| NaiveTime::from_hms_opt(h, 0, 0).unwrap();
        let show = |date: NaiveDate, start: u32| NewSchedule {
            movie_id: evening.movie_id,
            studio_id: evening.studio_id,
            date,
            start_time: at(start),
            end_time: at(start + 2),
            price: Money::from_cents(4_000),
        };

        let matinee = store.create_schedule(show(day, 13)).await.unwrap();
        let late = store.create_schedule(show(day, 21)).await.unwrap();
        store
            .create_schedule(show(day.succ_opt().unwrap(), 19))
            .await
            .unwrap();
        store.delete_schedule(late.id, Utc::now()).await.unwrap();

        let listed: Vec<ScheduleId> = store
            .list_schedules(day)
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(listed, vec![matinee.id, evening.id]);
    }

    #[tokio::test]
    async fn soft_deleted_schedules_cannot_be_booked() {
        let (store, schedule, seats) = seeded().await;
        store.delete_schedule(schedule.id, Utc::now()).await.unwrap();

        let err = store
            .reserve_seats(draft(&schedule, &[seats[0].id], "ORD-1"))
            .await
            .unwrap_err();
        assert_eq!(err, BookingError::ScheduleNotFound(schedule.id));
    }

    #[tokio::test]
    async fn injected_faults_are_transient() {
        let (store, schedule, seats) = seeded().await;
        store.fail_next(1);
        let err = store
            .reserve_seats(draft(&schedule, &[seats[0].id], "ORD-1"))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(
            store
                .reserve_seats(draft(&schedule, &[seats[0].id], "ORD-1"))
                .await
                .is_ok()
        );
    }
}
