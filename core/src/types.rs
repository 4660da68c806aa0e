//! Domain types for the cinema booking engine.
//!
//! Identifiers, money, the catalog records (movies, studios, seats, schedules) and
//! the two state machines that make up the reservation ledger: [`OrderStatus`] for
//! the order aggregate and [`ItemStatus`] for the per-seat ledger entries.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            #[doc = concat!("Creates a new random `", stringify!($name), "`")]
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            #[doc = concat!("Create a `", stringify!($name), "` from a `Uuid`")]
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Get the inner UUID
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }
    };
}

define_id!(
    /// Unique identifier for a movie
    MovieId
);
define_id!(
    /// Unique identifier for a studio (auditorium)
    StudioId
);
define_id!(
    /// Unique identifier for a physical seat
    SeatId
);
define_id!(
    /// Unique identifier for a schedule (one showtime)
    ScheduleId
);
define_id!(
    /// Unique identifier for an order
    OrderId
);
define_id!(
    /// Unique identifier for an order item (reservation ledger entry)
    OrderItemId
);
define_id!(
    /// Unique identifier for a customer
    UserId
);

// ============================================================================
// Money
// ============================================================================

/// Amount of money in the smallest currency unit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    /// Zero amount
    pub const ZERO: Self = Self(0);

    /// Creates a `Money` value from minor units (cents)
    #[must_use]
    pub const fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    /// Returns the amount in minor units
    #[must_use]
    pub const fn cents(&self) -> i64 {
        self.0
    }

    /// Multiplies by a quantity with overflow checking
    #[must_use]
    pub const fn checked_mul(self, quantity: i64) -> Option<Self> {
        match self.0.checked_mul(quantity) {
            Some(result) => Some(Self(result)),
            None => None,
        }
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, (self.0 % 100).abs())
    }
}

// ============================================================================
// Catalog
// ============================================================================

/// A movie that can be scheduled.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Movie {
    /// Movie ID
    pub id: MovieId,
    /// Display title
    pub title: String,
    /// Running time in minutes
    pub duration_minutes: u32,
}

impl Movie {
    /// Creates a new movie with a fresh ID
    #[must_use]
    pub fn new(title: impl Into<String>, duration_minutes: u32) -> Self {
        Self {
            id: MovieId::new(),
            title: title.into(),
            duration_minutes,
        }
    }
}

/// An auditorium with a fixed set of seats.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Studio {
    /// Studio ID
    pub id: StudioId,
    /// Display name
    pub name: String,
    /// Number of physical seats; equals the number of seats created with the studio
    pub seat_capacity: u32,
}

/// A physical seat. Immutable; availability is derived per schedule, never stored here.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Seat {
    /// Seat ID
    pub id: SeatId,
    /// Owning studio
    pub studio_id: StudioId,
    /// Row label (e.g. "A")
    pub row_label: String,
    /// Seat number within the row
    pub seat_number: u32,
}

impl Seat {
    /// Creates a new seat with a fresh ID
    #[must_use]
    pub fn new(studio_id: StudioId, row_label: impl Into<String>, seat_number: u32) -> Self {
        Self {
            id: SeatId::new(),
            studio_id,
            row_label: row_label.into(),
            seat_number,
        }
    }

    /// Display label such as `A12`
    #[must_use]
    pub fn label(&self) -> String {
        format!("{}{}", self.row_label, self.seat_number)
    }
}

/// One showtime: movie × studio × date × time window.
///
/// `booked_seats` is a cached count of PENDING and CONFIRMED ledger entries.
/// It is only ever changed inside the same transaction as the ledger rows it counts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    /// Schedule ID
    pub id: ScheduleId,
    /// Movie being shown
    pub movie_id: MovieId,
    /// Studio it is shown in
    pub studio_id: StudioId,
    /// Show date
    pub date: NaiveDate,
    /// Start of the showing
    pub start_time: NaiveTime,
    /// End of the showing
    pub end_time: NaiveTime,
    /// Price per seat
    pub price: Money,
    /// Cached count of held or sold seats
    pub booked_seats: u32,
    /// Soft-delete marker
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Schedule {
    /// Whether the schedule has been soft-deleted
    #[must_use]
    pub const fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Input for creating a schedule.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSchedule {
    /// Movie being shown
    pub movie_id: MovieId,
    /// Studio it is shown in
    pub studio_id: StudioId,
    /// Show date
    pub date: NaiveDate,
    /// Start of the showing
    pub start_time: NaiveTime,
    /// End of the showing
    pub end_time: NaiveTime,
    /// Price per seat
    pub price: Money,
}

// ============================================================================
// Status machines
// ============================================================================

/// Status of an order.
///
/// PENDING is the only non-terminal state. No transition leaves a terminal state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Seats held, awaiting payment
    Pending,
    /// Payment confirmed
    Paid,
    /// Hold deadline passed without payment
    Expired,
    /// Payment reported failure
    Failed,
    /// Cancelled by the customer
    Cancelled,
}

impl OrderStatus {
    /// Database/wire representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Paid => "PAID",
            Self::Expired => "EXPIRED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Whether no further transition can leave this state
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Check if this status can transition to `target`.
    ///
    /// Staying in the same state is allowed (idempotent no-op).
    #[must_use]
    pub fn can_transition_to(&self, target: Self) -> bool {
        *self == target || (*self == Self::Pending && target.is_terminal())
    }

    /// Status the owned ledger entries move to when the order enters this status
    #[must_use]
    pub const fn item_status(&self) -> ItemStatus {
        match self {
            Self::Pending => ItemStatus::Pending,
            Self::Paid => ItemStatus::Confirmed,
            Self::Expired => ItemStatus::Expired,
            Self::Failed | Self::Cancelled => ItemStatus::Cancelled,
        }
    }

    /// Whether entering this status gives the seats back
    #[must_use]
    pub const fn releases_seats(&self) -> bool {
        matches!(self, Self::Expired | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "PAID" => Ok(Self::Paid),
            "EXPIRED" => Ok(Self::Expired),
            "FAILED" => Ok(Self::Failed),
            "CANCELLED" => Ok(Self::Cancelled),
            other => Err(format!("Invalid order status: {other}")),
        }
    }
}

/// Status of a reservation ledger entry (order item).
///
/// PENDING and CONFIRMED hold the seat. CONFIRMED, CANCELLED and EXPIRED are terminal
/// and mutually exclusive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemStatus {
    /// Seat held
    Pending,
    /// Seat sold
    Confirmed,
    /// Seat released by cancellation or failed payment
    Cancelled,
    /// Seat released by hold expiry
    Expired,
}

impl ItemStatus {
    /// Statuses that occupy the seat for the schedule
    pub const ACTIVE: [Self; 2] = [Self::Pending, Self::Confirmed];

    /// Database/wire representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Confirmed => "CONFIRMED",
            Self::Cancelled => "CANCELLED",
            Self::Expired => "EXPIRED",
        }
    }

    /// Whether this entry occupies its seat
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Confirmed)
    }

    /// Whether no further transition can leave this state
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Check if this status can transition to `target`
    #[must_use]
    pub fn can_transition_to(&self, target: Self) -> bool {
        *self == target || (*self == Self::Pending && target.is_terminal())
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "CONFIRMED" => Ok(Self::Confirmed),
            "CANCELLED" => Ok(Self::Cancelled),
            "EXPIRED" => Ok(Self::Expired),
            other => Err(format!("Invalid order item status: {other}")),
        }
    }
}

/// How the customer intends to pay. Recorded only; the gateway is external.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Credit card
    CreditCard,
    /// Debit card
    DebitCard,
    /// E-wallet
    EWallet,
    /// Bank transfer
    BankTransfer,
    /// Virtual account
    VirtualAccount,
}

impl PaymentMethod {
    /// Database/wire representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::CreditCard => "credit_card",
            Self::DebitCard => "debit_card",
            Self::EWallet => "e_wallet",
            Self::BankTransfer => "bank_transfer",
            Self::VirtualAccount => "virtual_account",
        }
    }
}

impl FromStr for PaymentMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "credit_card" => Ok(Self::CreditCard),
            "debit_card" => Ok(Self::DebitCard),
            "e_wallet" => Ok(Self::EWallet),
            "bank_transfer" => Ok(Self::BankTransfer),
            "virtual_account" => Ok(Self::VirtualAccount),
            other => Err(format!("Invalid payment method: {other}")),
        }
    }
}

// ============================================================================
// Reservation ledger
// ============================================================================

/// Schedule, seat and movie details frozen at booking time.
///
/// Kept on the ledger entry so order history renders correctly after the schedule
/// is edited or soft-deleted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingSnapshot {
    /// Movie title at booking time
    pub movie_title: String,
    /// Studio name at booking time
    pub studio_name: String,
    /// Show date
    pub date: NaiveDate,
    /// Start of the showing
    pub start_time: NaiveTime,
    /// End of the showing
    pub end_time: NaiveTime,
    /// Seat row
    pub row_label: String,
    /// Seat number
    pub seat_number: u32,
    /// Seat price at booking time
    pub price: Money,
}

/// One seat's booking record for one schedule within one order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    /// Entry ID
    pub id: OrderItemId,
    /// Owning order
    pub order_id: OrderId,
    /// Schedule the seat is booked for
    pub schedule_id: ScheduleId,
    /// Booked seat
    pub seat_id: SeatId,
    /// Current status
    pub status: ItemStatus,
    /// Unit price
    pub price: Money,
    /// Price for this entry (one seat)
    pub sub_total_price: Money,
    /// Frozen details for display
    pub snapshot: BookingSnapshot,
    /// When the entry was created
    pub created_at: DateTime<Utc>,
    /// Last status change
    pub updated_at: DateTime<Utc>,
    /// Soft-delete marker
    pub deleted_at: Option<DateTime<Utc>>,
}

/// A checkout attempt: one customer, one schedule, 1..N seats.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Order ID
    pub id: OrderId,
    /// Customer
    pub user_id: UserId,
    /// Human-readable unique number
    pub order_number: String,
    /// Declared payment method
    pub payment_method: PaymentMethod,
    /// Sum of entry subtotals
    pub total_item_price: Money,
    /// Current status
    pub status: OrderStatus,
    /// Hold deadline, fixed at creation
    pub expires_at: DateTime<Utc>,
    /// Payment time (PAID orders only)
    pub paid_at: Option<DateTime<Utc>>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last status change
    pub updated_at: DateTime<Utc>,
    /// Owned ledger entries
    pub items: Vec<OrderItem>,
}

impl Order {
    /// Seats held by this order
    #[must_use]
    pub fn seat_ids(&self) -> Vec<SeatId> {
        self.items.iter().map(|item| item.seat_id).collect()
    }

    /// Whether the hold deadline has passed at `now`
    #[must_use]
    pub fn is_past_deadline(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Everything the ledger needs to place an order in one transaction.
///
/// Prices and snapshots are not part of the draft; the ledger reads them from the
/// schedule inside the reservation transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderDraft {
    /// Pre-generated order ID
    pub order_id: OrderId,
    /// Customer
    pub user_id: UserId,
    /// Pre-generated order number
    pub order_number: String,
    /// Declared payment method
    pub payment_method: PaymentMethod,
    /// Schedule to book
    pub schedule_id: ScheduleId,
    /// Seats to hold (non-empty, no duplicates)
    pub seat_ids: Vec<SeatId>,
    /// Hold deadline
    pub expires_at: DateTime<Utc>,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

/// Result of a compare-and-swap order transition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The order was PENDING and is now in the requested status
    Applied {
        /// Order after the transition
        order: Order,
        /// Number of seats given back to their schedules
        released: u32,
    },
    /// The order was already in the requested status; nothing changed
    AlreadyInState(Order),
    /// A different terminal status won; nothing changed
    Superseded(Order),
}

impl TransitionOutcome {
    /// The order as observed after the attempt
    #[must_use]
    pub const fn order(&self) -> &Order {
        match self {
            Self::Applied { order, .. } | Self::AlreadyInState(order) | Self::Superseded(order) => {
                order
            }
        }
    }

    /// Whether this call performed the transition
    #[must_use]
    pub const fn was_applied(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }
}

/// Divergence between a schedule's cached counter and the ledger.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterDrift {
    /// Affected schedule
    pub schedule_id: ScheduleId,
    /// Counter value before correction
    pub cached: u32,
    /// Ledger-derived value written back
    pub actual: u32,
}

// ============================================================================
// Read models
// ============================================================================

/// A seat and whether it can currently be booked for a schedule.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatAvailability {
    /// The seat
    pub seat: Seat,
    /// True when no PENDING/CONFIRMED entry exists for it
    pub available: bool,
}

/// Availability of every seat in a schedule's studio. Advisory only.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatMap {
    /// Schedule the map was computed for
    pub schedule_id: ScheduleId,
    /// Seats ordered by row then number
    pub seats: Vec<SeatAvailability>,
}

impl SeatMap {
    /// Seats that can be booked
    #[must_use]
    pub fn available(&self) -> Vec<&Seat> {
        self.seats
            .iter()
            .filter(|s| s.available)
            .map(|s| &s.seat)
            .collect()
    }

    /// Seats held or sold
    #[must_use]
    pub fn unavailable(&self) -> Vec<&Seat> {
        self.seats
            .iter()
            .filter(|s| !s.available)
            .map(|s| &s.seat)
            .collect()
    }
}
