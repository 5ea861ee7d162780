use chrono::{NaiveDate, Utc};

use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub(crate) fn today() -> NaiveDate {
    Utc::now().date_naive()
}

/// Shape check that needs no property: at least one night, at most the global cap.
/// Runs before any store or catalog access.
pub(crate) fn validate_stay(stay: &Stay) -> Result<(), EngineError> {
    let nights = stay.nights();
    if nights < 1 || nights > MAX_STAY_NIGHTS {
        return Err(EngineError::InvalidDuration {
            nights,
            min: 1,
            max: MAX_STAY_NIGHTS as u32,
        });
    }
    Ok(())
}

/// Nights of the stay, if within the property's `[min_nights, max_nights]`.
pub(crate) fn validate_duration(property: &Property, stay: &Stay) -> Result<u32, EngineError> {
    validate_stay(stay)?;
    let nights = stay.nights();
    if nights < i64::from(property.min_nights) || nights > i64::from(property.max_nights) {
        return Err(EngineError::InvalidDuration {
            nights,
            min: property.min_nights,
            max: property.max_nights,
        });
    }
    Ok(nights as u32)
}

pub(crate) fn validate_guests(property: &Property, guests: GuestCount) -> Result<(), EngineError> {
    if guests.adults == 0 || guests.total() > property.max_guests {
        return Err(EngineError::InvalidGuests {
            requested: guests.total(),
            max: property.max_guests,
        });
    }
    Ok(())
}

pub(crate) fn check_not_blocked(calendar: &CalendarState, stay: &Stay) -> Result<(), EngineError> {
    match calendar.first_blocked(stay) {
        Some(date) => Err(EngineError::Blocked(date)),
        None => Ok(()),
    }
}

pub(crate) fn check_no_conflict(calendar: &CalendarState, stay: &Stay) -> Result<(), EngineError> {
    match calendar.overlapping_active(stay).next() {
        Some(existing) => Err(EngineError::Conflict(existing.id)),
        None => Ok(()),
    }
}

/// Full availability decision: duration, then manual blocks, then live reservations.
/// `skip_overlap` drops only the reservation check (owner test bookings).
pub(crate) fn resolve(
    property: &Property,
    calendar: &CalendarState,
    stay: &Stay,
    skip_overlap: bool,
) -> Result<(), EngineError> {
    validate_duration(property, stay)?;
    check_not_blocked(calendar, stay)?;
    if !skip_overlap {
        check_no_conflict(calendar, stay)?;
    }
    Ok(())
}

/// Map a resolver outcome onto the wire-facing result. Non-availability errors pass through.
pub(crate) fn to_availability(
    result: Result<(), EngineError>,
) -> Result<AvailabilityResult, EngineError> {
    match result {
        Ok(()) => Ok(AvailabilityResult::available()),
        Err(EngineError::InvalidDuration { .. }) => {
            Ok(AvailabilityResult::unavailable(UnavailableReason::Duration))
        }
        Err(EngineError::Blocked(_)) => {
            Ok(AvailabilityResult::unavailable(UnavailableReason::Blocked))
        }
        Err(EngineError::Conflict(_)) => {
            Ok(AvailabilityResult::unavailable(UnavailableReason::Conflict))
        }
        Err(e) => Err(e),
    }
}

/// Nights in `window` that cannot be booked: manual blocks plus live reservations.
pub(crate) fn unavailable_nights(calendar: &CalendarState, window: &Stay) -> Vec<NaiveDate> {
    let mut nights: Vec<NaiveDate> = calendar
        .blocked
        .range(window.check_in..window.check_out)
        .copied()
        .collect();
    for r in calendar.overlapping_active(window) {
        nights.extend(r.stay().each_night().filter(|n| window.contains_night(*n)));
    }
    nights.sort_unstable();
    nights.dedup();
    nights
}
