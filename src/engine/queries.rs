use std::collections::HashSet;

use chrono::NaiveDate;
use ulid::Ulid;

use crate::catalog::validate_service;
use crate::limits::*;
use crate::model::*;
use crate::observability::{AVAILABILITY_CHECKS_TOTAL, QUOTES_TOTAL};

use super::conflict::{self, to_availability, validate_stay};
use super::pricing;
use super::{Engine, EngineError};

impl Engine {
    /// Look up the selected services, rejecting unknown, inactive, and repeated ids.
    pub(super) async fn resolve_services(
        &self,
        selected: &[SelectedService],
    ) -> Result<Vec<(AdditionalService, u32)>, EngineError> {
        if selected.len() > MAX_SERVICES_PER_BOOKING {
            return Err(EngineError::LimitExceeded("too many services"));
        }
        let mut seen = HashSet::with_capacity(selected.len());
        let mut resolved = Vec::with_capacity(selected.len());
        for s in selected {
            if !seen.insert(s.service_id) {
                return Err(EngineError::DuplicateService(s.service_id));
            }
            let service = self
                .bounded("catalog service", self.catalog.service(s.service_id))
                .await?
                .filter(|svc| svc.active)
                .ok_or(EngineError::UnknownService(s.service_id))?;
            validate_service(&service)?;
            resolved.push((service, s.quantity));
        }
        Ok(resolved)
    }

    /// Advisory availability check for UI feedback. May be stale by the time the
    /// guest books; `create_booking` re-checks under the write lock.
    pub async fn check_availability(
        &self,
        property_id: Ulid,
        stay: Stay,
    ) -> Result<AvailabilityResult, EngineError> {
        let result = self.check_availability_inner(property_id, stay).await;
        let outcome = match &result {
            Ok(r) if r.available => "available",
            Ok(_) => "unavailable",
            Err(e) => e.label(),
        };
        metrics::counter!(AVAILABILITY_CHECKS_TOTAL, "outcome" => outcome).increment(1);
        result
    }

    async fn check_availability_inner(
        &self,
        property_id: Ulid,
        stay: Stay,
    ) -> Result<AvailabilityResult, EngineError> {
        if validate_stay(&stay).is_err() {
            return Ok(AvailabilityResult::unavailable(UnavailableReason::Duration));
        }
        let property = self.fetch_property(property_id).await?;
        match self.get_calendar(&property_id) {
            Some(cal) => {
                let guard = cal.read().await;
                to_availability(conflict::resolve(&property, &guard, &stay, false))
            }
            None => to_availability(conflict::resolve(
                &property,
                &CalendarState::new(property_id),
                &stay,
                false,
            )),
        }
    }

    /// Price a candidate stay. Does not look at the calendar.
    pub async fn quote(
        &self,
        property_id: Ulid,
        stay: Stay,
        guests: GuestCount,
        services: &[SelectedService],
    ) -> Result<Quote, EngineError> {
        let result = self.quote_inner(property_id, stay, guests, services).await;
        let outcome = match &result {
            Ok(_) => "ok",
            Err(e) => e.label(),
        };
        metrics::counter!(QUOTES_TOTAL, "outcome" => outcome).increment(1);
        result
    }

    async fn quote_inner(
        &self,
        property_id: Ulid,
        stay: Stay,
        guests: GuestCount,
        services: &[SelectedService],
    ) -> Result<Quote, EngineError> {
        validate_stay(&stay)?;
        let property = self.fetch_property(property_id).await?;
        let offers = self.fetch_offers(property_id).await?;
        let resolved = self.resolve_services(services).await?;
        pricing::quote(&property, &offers, &stay, guests, &resolved)
    }

    pub async fn get_reservation(&self, reservation_id: Ulid) -> Result<Reservation, EngineError> {
        let property_id = self
            .get_property_for_reservation(&reservation_id)
            .ok_or(EngineError::ReservationNotFound(reservation_id))?;
        let cal = self
            .get_calendar(&property_id)
            .ok_or(EngineError::ReservationNotFound(reservation_id))?;
        let guard = cal.read().await;
        guard
            .reservation(&reservation_id)
            .cloned()
            .ok_or(EngineError::ReservationNotFound(reservation_id))
    }

    /// Every reservation on the property, ordered by check-in, including cancelled ones.
    pub async fn list_reservations(&self, property_id: Ulid) -> Vec<Reservation> {
        match self.get_calendar(&property_id) {
            Some(cal) => cal.read().await.reservations.clone(),
            None => Vec::new(),
        }
    }

    pub async fn blocked_dates(&self, property_id: Ulid) -> Vec<NaiveDate> {
        match self.get_calendar(&property_id) {
            Some(cal) => cal.read().await.blocked.iter().copied().collect(),
            None => Vec::new(),
        }
    }

    /// Nights in `[from, to)` that cannot be booked, for calendar widgets.
    pub async fn unavailable_nights(
        &self,
        property_id: Ulid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<NaiveDate>, EngineError> {
        let window = Stay::new(from, to);
        let days = window.nights();
        if days < 1 {
            return Ok(Vec::new());
        }
        if days > MAX_CALENDAR_WINDOW_DAYS {
            return Err(EngineError::LimitExceeded("calendar window too wide"));
        }
        Ok(match self.get_calendar(&property_id) {
            Some(cal) => conflict::unavailable_nights(&*cal.read().await, &window),
            None => Vec::new(),
        })
    }

    /// Recompute the quote for a stored reservation from the current catalog.
    pub async fn requote_reservation(&self, reservation_id: Ulid) -> Result<Quote, EngineError> {
        let r = self.get_reservation(reservation_id).await?;
        self.quote_inner(r.property_id, r.stay(), r.guests, &r.selected_services())
            .await
    }

    /// True when the stored total still matches a fresh quote, to the cent.
    pub async fn verify_total(&self, reservation_id: Ulid) -> Result<bool, EngineError> {
        let stored = self.get_reservation(reservation_id).await?;
        let fresh = self.requote_reservation(reservation_id).await?;
        Ok(to_cents(fresh.total) == to_cents(stored.total_amount))
    }
}
