use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Fixed-point money. Never `f64`.
pub type Money = Decimal;

/// Half-open night range `[check_in, check_out)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Stay {
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
}

impl Stay {
    pub fn new(check_in: NaiveDate, check_out: NaiveDate) -> Self {
        Self { check_in, check_out }
    }

    /// Number of nights. Zero or negative when the range is empty or inverted.
    pub fn nights(&self) -> i64 {
        (self.check_out - self.check_in).num_days()
    }

    pub fn overlaps(&self, other: &Stay) -> bool {
        self.check_in < other.check_out && self.check_out > other.check_in
    }

    pub fn contains_night(&self, night: NaiveDate) -> bool {
        self.check_in <= night && night < self.check_out
    }

    /// Every night of the stay, in order.
    pub fn each_night(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.check_in
            .iter_days()
            .take_while(move |d| *d < self.check_out)
    }
}

// ── Catalog records (owned by the listing subsystem) ─────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Property {
    pub id: Ulid,
    pub owner_id: Ulid,
    pub nightly_base_price: Money,
    pub cleaning_fee: Money,
    pub min_nights: u32,
    pub max_nights: u32,
    pub max_guests: u32,
    /// Percentage applied from 7 nights.
    #[serde(default)]
    pub long_stay_discount_7: Option<Decimal>,
    /// Percentage applied from 30 nights. Wins over the 7-night tier.
    #[serde(default)]
    pub long_stay_discount_30: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecialOffer {
    pub id: Ulid,
    pub property_id: Ulid,
    pub start_date: NaiveDate,
    /// Exclusive: the offer covers nights `[start_date, end_date)`.
    pub end_date: NaiveDate,
    pub nightly_override_price: Money,
    pub active: bool,
}

impl SpecialOffer {
    pub fn covers(&self, night: NaiveDate) -> bool {
        self.active && self.start_date <= night && night < self.end_date
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdditionalService {
    pub id: Ulid,
    pub name: String,
    pub unit_price_per_day: Money,
    pub active: bool,
}

// ── Booking inputs ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestCount {
    pub adults: u32,
    #[serde(default)]
    pub children: u32,
}

impl GuestCount {
    pub fn new(adults: u32, children: u32) -> Self {
        Self { adults, children }
    }

    pub fn total(&self) -> u32 {
        self.adults.saturating_add(self.children)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectedService {
    pub service_id: Ulid,
    /// Informational only: services are billed per stay-night.
    #[serde(default = "default_quantity")]
    pub quantity: u32,
}

fn default_quantity() -> u32 {
    1
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Refunded,
}

/// Result handed over by the payment collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentOutcome {
    pub payment_method: String,
    pub payment_status: PaymentStatus,
    pub transaction_id: String,
}

/// Cash is settled at the property rather than by the payment provider.
pub fn is_cash_method(method: &str) -> bool {
    method.trim().eq_ignore_ascii_case("cash")
}

impl PaymentOutcome {
    pub fn is_cash(&self) -> bool {
        is_cash_method(&self.payment_method)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRequest {
    pub property_id: Ulid,
    pub guest_id: Ulid,
    pub stay: Stay,
    pub guests: GuestCount,
    pub services: Vec<SelectedService>,
    pub payment: Option<PaymentOutcome>,
    /// Owner test booking: skips the reservation-overlap check when enabled.
    pub owner_test: bool,
}

// ── Reservations ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
}

impl ReservationStatus {
    /// Pending and confirmed reservations hold their nights.
    pub fn holds_nights(&self) -> bool {
        matches!(self, ReservationStatus::Pending | ReservationStatus::Confirmed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Pending => "pending",
            ReservationStatus::Confirmed => "confirmed",
            ReservationStatus::Cancelled => "cancelled",
            ReservationStatus::Completed => "completed",
        }
    }
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One billed add-on service on a quote or reservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceLine {
    pub service_id: Ulid,
    pub name: String,
    pub quantity: u32,
    pub unit_price_per_day: Money,
    pub total: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub property_id: Ulid,
    pub guest_id: Ulid,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub guests: GuestCount,
    pub services: Vec<ServiceLine>,
    pub base_price: Money,
    pub discount: Money,
    pub subtotal: Money,
    pub cleaning_fee: Money,
    pub services_total: Money,
    pub service_fee: Money,
    pub total_amount: Money,
    pub status: ReservationStatus,
    pub payment_method: Option<String>,
    pub payment_status: PaymentStatus,
    pub transaction_id: Option<String>,
    pub owner_test: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Reservation {
    pub fn stay(&self) -> Stay {
        Stay::new(self.check_in, self.check_out)
    }

    /// The service selection as it was submitted, for requoting.
    pub fn selected_services(&self) -> Vec<SelectedService> {
        self.services
            .iter()
            .map(|line| SelectedService {
                service_id: line.service_id,
                quantity: line.quantity,
            })
            .collect()
    }
}

/// Per-property calendar: manual blocks plus every reservation ever made.
#[derive(Debug, Clone)]
pub struct CalendarState {
    pub property_id: Ulid,
    pub blocked: BTreeSet<NaiveDate>,
    /// Sorted by `check_in`. Cancelled and completed reservations stay for the audit trail.
    pub reservations: Vec<Reservation>,
}

impl CalendarState {
    pub fn new(property_id: Ulid) -> Self {
        Self {
            property_id,
            blocked: BTreeSet::new(),
            reservations: Vec::new(),
        }
    }

    /// Insert reservation maintaining sort order by check_in.
    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .binary_search_by_key(&reservation.check_in, |r| r.check_in)
            .unwrap_or_else(|e| e);
        self.reservations.insert(pos, reservation);
    }

    pub fn reservation(&self, id: &Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == *id)
    }

    pub fn reservation_mut(&mut self, id: &Ulid) -> Option<&mut Reservation> {
        self.reservations.iter_mut().find(|r| r.id == *id)
    }

    /// Reservations that hold nights inside `stay`.
    /// Uses binary search to skip reservations checking in at or after `stay.check_out`.
    pub fn overlapping_active(&self, stay: &Stay) -> impl Iterator<Item = &Reservation> {
        let right_bound = self
            .reservations
            .partition_point(|r| r.check_in < stay.check_out);
        let stay = *stay;
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.status.holds_nights() && r.stay().overlaps(&stay))
    }

    /// First manually blocked night inside `stay`.
    pub fn first_blocked(&self, stay: &Stay) -> Option<NaiveDate> {
        if stay.check_in >= stay.check_out {
            return None;
        }
        self.blocked
            .range(stay.check_in..stay.check_out)
            .next()
            .copied()
    }
}

/// The event types. This is the WAL record format and the notification payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Event {
    DateBlocked {
        property_id: Ulid,
        date: NaiveDate,
    },
    DateUnblocked {
        property_id: Ulid,
        date: NaiveDate,
    },
    ReservationCreated {
        reservation: Box<Reservation>,
    },
    ReservationStatusChanged {
        id: Ulid,
        property_id: Ulid,
        status: ReservationStatus,
        payment_status: PaymentStatus,
        payment_method: Option<String>,
        transaction_id: Option<String>,
        at: DateTime<Utc>,
    },
}

impl Event {
    pub fn property_id(&self) -> Ulid {
        match self {
            Event::DateBlocked { property_id, .. }
            | Event::DateUnblocked { property_id, .. }
            | Event::ReservationStatusChanged { property_id, .. } => *property_id,
            Event::ReservationCreated { reservation } => reservation.property_id,
        }
    }
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnavailableReason {
    Duration,
    Blocked,
    Conflict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityResult {
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<UnavailableReason>,
}

impl AvailabilityResult {
    pub fn available() -> Self {
        Self {
            available: true,
            reason: None,
        }
    }

    pub fn unavailable(reason: UnavailableReason) -> Self {
        Self {
            available: false,
            reason: Some(reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NightlyRate {
    pub night: NaiveDate,
    pub price: Money,
    pub special_offer_id: Option<Ulid>,
}

/// Itemized, not-yet-persisted price breakdown. Amounts are unrounded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub nights: u32,
    pub nightly_rates: Vec<NightlyRate>,
    pub base_price: Money,
    pub discount: Money,
    pub subtotal: Money,
    pub cleaning_fee: Money,
    pub services: Vec<ServiceLine>,
    pub services_total: Money,
    pub service_fee: Money,
    pub total: Money,
    pub has_special_offer: bool,
    pub effective_nightly_rate: Money,
}

/// Round to cents, midpoint away from zero.
pub fn to_cents(amount: Money) -> Money {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

impl Quote {
    /// Copy rounded to cents for display. Never feed this back into a computation.
    pub fn rounded(&self) -> Quote {
        let mut q = self.clone();
        for rate in &mut q.nightly_rates {
            rate.price = to_cents(rate.price);
        }
        for line in &mut q.services {
            line.unit_price_per_day = to_cents(line.unit_price_per_day);
            line.total = to_cents(line.total);
        }
        q.base_price = to_cents(q.base_price);
        q.discount = to_cents(q.discount);
        q.subtotal = to_cents(q.subtotal);
        q.cleaning_fee = to_cents(q.cleaning_fee);
        q.services_total = to_cents(q.services_total);
        q.service_fee = to_cents(q.service_fee);
        q.total = to_cents(q.total);
        q.effective_nightly_rate = to_cents(q.effective_nightly_rate);
        q
    }
}
