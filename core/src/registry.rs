//! Schedule registry and seat inventory.
//!
//! Catalog records (movies, studios, seats, schedules) and the derived,
//! advisory seat availability view. Availability read here may be stale by the
//! time a reservation is attempted; only
//! [`ReservationLedger::reserve_seats`](crate::ledger::ReservationLedger::reserve_seats)
//! decides.

use crate::BookingFuture;
use crate::error::BookingError;
use crate::types::{Movie, NewSchedule, Schedule, ScheduleId, Seat, SeatMap, Studio, StudioId};
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashSet;

/// Catalog and inventory store.
pub trait ScheduleRegistry: Send + Sync {
    /// Store a movie.
    ///
    /// # Errors
    ///
    /// Returns a store error if the write fails.
    fn create_movie(&self, movie: Movie) -> BookingFuture<'_, Movie>;

    /// Store a studio together with its seats; capacity is set to the seat count.
    ///
    /// # Errors
    ///
    /// - `InvalidRequest`: no seats, duplicate `(row_label, seat_number)`, or a seat
    ///   pointing at another studio
    fn create_studio(&self, name: String, seats: Vec<(String, u32)>) -> BookingFuture<'_, Studio>;

    /// Store a schedule with `booked_seats = 0`.
    ///
    /// # Errors
    ///
    /// - `MovieNotFound` / `StudioNotFound`
    /// - `InvalidRequest`: `end_time` not after `start_time`, or negative price
    fn create_schedule(&self, schedule: NewSchedule) -> BookingFuture<'_, Schedule>;

    /// Load a live (not soft-deleted) schedule.
    ///
    /// # Errors
    ///
    /// Returns a store error if the read fails.
    fn get_schedule(&self, schedule_id: ScheduleId) -> BookingFuture<'_, Option<Schedule>>;

    /// Live schedules on a date, ordered by start time.
    ///
    /// # Errors
    ///
    /// Returns a store error if the read fails.
    fn list_schedules(&self, date: NaiveDate) -> BookingFuture<'_, Vec<Schedule>>;

    /// Soft-delete a schedule.
    ///
    /// # Errors
    ///
    /// - `ScheduleNotFound`
    /// - `ScheduleHasActiveReservations`: PENDING or CONFIRMED entries exist
    fn delete_schedule(
        &self,
        schedule_id: ScheduleId,
        at: DateTime<Utc>,
    ) -> BookingFuture<'_, Schedule>;

    /// Seats of a studio ordered by row then number.
    ///
    /// # Errors
    ///
    /// `StudioNotFound` if the studio does not exist.
    fn studio_seats(&self, studio_id: StudioId) -> BookingFuture<'_, Vec<Seat>>;

    /// Availability of every seat in the schedule's studio.
    ///
    /// # Errors
    ///
    /// `ScheduleNotFound` if the schedule is missing or soft-deleted.
    fn seat_map(&self, schedule_id: ScheduleId) -> BookingFuture<'_, SeatMap>;

    /// Studio seats without an active entry for the schedule.
    ///
    /// # Errors
    ///
    /// `ScheduleNotFound` if the schedule is missing or soft-deleted.
    fn available_seats(&self, schedule_id: ScheduleId) -> BookingFuture<'_, Vec<Seat>> {
        Box::pin(async move {
            let map = self.seat_map(schedule_id).await?;
            Ok(map
                .seats
                .into_iter()
                .filter(|s| s.available)
                .map(|s| s.seat)
                .collect())
        })
    }
}

/// Check a studio's seat layout before it is stored.
///
/// # Errors
///
/// `InvalidRequest` when the layout is empty or repeats a `(row_label, seat_number)`.
pub fn validate_seat_layout(seats: &[(String, u32)]) -> Result<(), BookingError> {
    if seats.is_empty() {
        return Err(BookingError::InvalidRequest(
            "a studio needs at least one seat".to_string(),
        ));
    }
    let mut seen = HashSet::with_capacity(seats.len());
    for (row, number) in seats {
        if row.trim().is_empty() {
            return Err(BookingError::InvalidRequest(
                "seat row label must not be empty".to_string(),
            ));
        }
        if !seen.insert((row.as_str(), *number)) {
            return Err(BookingError::InvalidRequest(format!(
                "duplicate seat {row}{number}"
            )));
        }
    }
    Ok(())
}

/// Check a schedule's time window and price.
///
/// # Errors
///
/// `InvalidRequest` when the window is empty or the price is negative.
pub fn validate_schedule(schedule: &NewSchedule) -> Result<(), BookingError> {
    if schedule.end_time <= schedule.start_time {
        return Err(BookingError::InvalidRequest(format!(
            "end time {} must be after start time {}",
            schedule.end_time, schedule.start_time
        )));
    }
    if schedule.price.cents() < 0 {
        return Err(BookingError::InvalidRequest(
            "price must not be negative".to_string(),
        ));
    }
    Ok(())
}
