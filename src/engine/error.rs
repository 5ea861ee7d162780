use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::{PaymentStatus, ReservationStatus};

/// Coarse error classes callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input, rejected before any I/O. Fix the input and retry.
    Validation,
    /// The nights are taken. Pick other dates.
    Availability,
    /// State change not allowed from the current status.
    Transition,
    NotFound,
    /// Storage trouble. Retry the whole operation from the top.
    Persistence,
}

#[derive(Debug)]
pub enum EngineError {
    InvalidDuration {
        nights: i64,
        min: u32,
        max: u32,
    },
    InvalidGuests {
        requested: u32,
        max: u32,
    },
    UnknownService(Ulid),
    DuplicateService(Ulid),
    InvalidCatalogRecord(&'static str),
    LimitExceeded(&'static str),
    /// An amount does not fit in `Decimal`.
    PriceOverflow,
    Blocked(NaiveDate),
    Conflict(Ulid),
    InvalidTransition {
        id: Ulid,
        from: ReservationStatus,
        to: ReservationStatus,
    },
    InvalidPaymentTransition {
        id: Ulid,
        from: PaymentStatus,
        to: PaymentStatus,
    },
    PropertyNotFound(Ulid),
    ReservationNotFound(Ulid),
    Timeout(&'static str),
    CatalogUnavailable(String),
    WalError(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::InvalidDuration { .. }
            | EngineError::InvalidGuests { .. }
            | EngineError::UnknownService(_)
            | EngineError::DuplicateService(_)
            | EngineError::InvalidCatalogRecord(_)
            | EngineError::LimitExceeded(_)
            | EngineError::PriceOverflow => ErrorKind::Validation,
            EngineError::Blocked(_) | EngineError::Conflict(_) => ErrorKind::Availability,
            EngineError::InvalidTransition { .. }
            | EngineError::InvalidPaymentTransition { .. } => ErrorKind::Transition,
            EngineError::PropertyNotFound(_) | EngineError::ReservationNotFound(_) => {
                ErrorKind::NotFound
            }
            EngineError::Timeout(_)
            | EngineError::CatalogUnavailable(_)
            | EngineError::WalError(_) => ErrorKind::Persistence,
        }
    }

    /// Transient storage failures. Retrying re-runs the availability check.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Persistence
    }

    /// Short label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            EngineError::InvalidDuration { .. } => "invalid_duration",
            EngineError::InvalidGuests { .. } => "invalid_guests",
            EngineError::UnknownService(_) => "unknown_service",
            EngineError::DuplicateService(_) => "duplicate_service",
            EngineError::InvalidCatalogRecord(_) => "invalid_catalog_record",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::PriceOverflow => "price_overflow",
            EngineError::Blocked(_) => "blocked",
            EngineError::Conflict(_) => "conflict",
            EngineError::InvalidTransition { .. }
            | EngineError::InvalidPaymentTransition { .. } => "invalid_transition",
            EngineError::PropertyNotFound(_) => "property_not_found",
            EngineError::ReservationNotFound(_) => "reservation_not_found",
            EngineError::Timeout(_) => "timeout",
            EngineError::CatalogUnavailable(_) => "catalog_unavailable",
            EngineError::WalError(_) => "wal_error",
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InvalidDuration { nights, min, max } => {
                write!(f, "invalid duration: {nights} nights, allowed {min}..={max}")
            }
            EngineError::InvalidGuests { requested, max } => {
                write!(f, "invalid guest count: {requested} requested, at most {max}")
            }
            EngineError::UnknownService(id) => write!(f, "unknown or inactive service: {id}"),
            EngineError::DuplicateService(id) => write!(f, "service selected twice: {id}"),
            EngineError::InvalidCatalogRecord(msg) => write!(f, "invalid catalog record: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::PriceOverflow => write!(f, "price overflow"),
            EngineError::Blocked(date) => write!(f, "date blocked by owner: {date}"),
            EngineError::Conflict(id) => write!(f, "conflict with reservation: {id}"),
            EngineError::InvalidTransition { id, from, to } => {
                write!(f, "invalid transition for reservation {id}: {from} -> {to}")
            }
            EngineError::InvalidPaymentTransition { id, from, to } => {
                write!(f, "invalid payment transition for reservation {id}: {from:?} -> {to:?}")
            }
            EngineError::PropertyNotFound(id) => write!(f, "property not found: {id}"),
            EngineError::ReservationNotFound(id) => write!(f, "reservation not found: {id}"),
            EngineError::Timeout(op) => write!(f, "timed out: {op}"),
            EngineError::CatalogUnavailable(e) => write!(f, "catalog unavailable: {e}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
