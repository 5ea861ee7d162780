use std::time::Instant;

use chrono::{NaiveDate, Utc};
use tracing::{info, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability::{BOOKINGS_TOTAL, BOOKING_DURATION_SECONDS, TRANSITIONS_TOTAL};

use super::conflict::{resolve, validate_stay};
use super::lifecycle::{self, StatusChange};
use super::{Engine, EngineError, WalCommand};

fn validate_payment(outcome: &PaymentOutcome) -> Result<(), EngineError> {
    if outcome.payment_method.len() > MAX_PAYMENT_METHOD_LEN {
        return Err(EngineError::LimitExceeded("payment method too long"));
    }
    if outcome.transaction_id.len() > MAX_TRANSACTION_ID_LEN {
        return Err(EngineError::LimitExceeded("transaction id too long"));
    }
    Ok(())
}

impl Engine {
    /// Book a stay. Re-checks availability and persists under the property's write
    /// lock, so concurrent requests for overlapping nights serialize and only one wins.
    pub async fn create_booking(
        &self,
        request: BookingRequest,
    ) -> Result<Reservation, EngineError> {
        let started = Instant::now();
        let result = self.create_booking_inner(request).await;
        let outcome = match &result {
            Ok(_) => "ok",
            Err(e) => e.label(),
        };
        metrics::counter!(BOOKINGS_TOTAL, "outcome" => outcome).increment(1);
        metrics::histogram!(BOOKING_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
        result
    }

    async fn create_booking_inner(&self, req: BookingRequest) -> Result<Reservation, EngineError> {
        // Input checks that need no I/O come first.
        validate_stay(&req.stay)?;
        if let Some(outcome) = &req.payment {
            validate_payment(outcome)?;
        }

        // Price server-side; a client-supplied total is never trusted.
        let property = self.fetch_property(req.property_id).await?;
        let offers = self.fetch_offers(property.id).await?;
        let services = self.resolve_services(&req.services).await?;
        let quote = super::pricing::quote(&property, &offers, &req.stay, req.guests, &services)?;
        let skip_overlap = req.owner_test
            && self.settings.owner_test_bookings
            && req.guest_id == property.owner_id;

        let cal = self.calendar_or_create(property.id);
        let mut guard = cal.write().await;
        if guard.reservations.len() >= MAX_RESERVATIONS_PER_PROPERTY {
            return Err(EngineError::LimitExceeded("too many reservations on property"));
        }
        if let Err(e) = resolve(&property, &guard, &req.stay, skip_overlap) {
            warn!(
                property = %property.id,
                check_in = %req.stay.check_in,
                check_out = %req.stay.check_out,
                "booking rejected: {e}"
            );
            return Err(e);
        }

        let now = Utc::now();
        let reservation = Reservation {
            id: Ulid::new(),
            property_id: property.id,
            guest_id: req.guest_id,
            check_in: req.stay.check_in,
            check_out: req.stay.check_out,
            guests: req.guests,
            services: quote.services,
            base_price: quote.base_price,
            discount: quote.discount,
            subtotal: quote.subtotal,
            cleaning_fee: quote.cleaning_fee,
            services_total: quote.services_total,
            service_fee: quote.service_fee,
            total_amount: quote.total,
            status: ReservationStatus::Pending,
            payment_method: None,
            payment_status: PaymentStatus::Pending,
            transaction_id: None,
            owner_test: skip_overlap,
            created_at: now,
            updated_at: now,
        };
        let id = reservation.id;

        let change = match &req.payment {
            Some(outcome) => lifecycle::reconcile_payment(&reservation, outcome)?,
            None => None,
        };
        let mut events = vec![Event::ReservationCreated {
            reservation: Box::new(reservation),
        }];
        if let Some(change) = change {
            events.push(change.into_event(id, property.id, now));
        }

        // Created + reconciled records share one group-commit write: both land or neither.
        self.persist_and_apply(&mut guard, events).await?;

        let stored = guard
            .reservation(&id)
            .cloned()
            .ok_or(EngineError::ReservationNotFound(id))?;
        info!(
            reservation = %id,
            property = %stored.property_id,
            nights = quote.nights,
            total = %stored.total_amount,
            status = %stored.status,
            "reservation created"
        );
        Ok(stored)
    }

    /// Reconcile a payment outcome. Re-delivering an applied outcome returns the
    /// reservation unchanged.
    pub async fn apply_payment(
        &self,
        reservation_id: Ulid,
        outcome: PaymentOutcome,
    ) -> Result<Reservation, EngineError> {
        validate_payment(&outcome)?;
        let (property_id, mut guard) = self.resolve_reservation_write(&reservation_id).await?;
        let current = guard
            .reservation(&reservation_id)
            .ok_or(EngineError::ReservationNotFound(reservation_id))?;

        let Some(change) = lifecycle::reconcile_payment(current, &outcome)? else {
            tracing::debug!(reservation = %reservation_id, "payment outcome already applied");
            return Ok(current.clone());
        };
        let from = current.status;
        self.commit_change(&mut guard, reservation_id, property_id, change, from)
            .await
    }

    /// Host/admin confirmation, used for cash payments.
    pub async fn confirm_reservation(
        &self,
        reservation_id: Ulid,
    ) -> Result<Reservation, EngineError> {
        self.transition(reservation_id, ReservationStatus::Confirmed).await
    }

    /// Cancel; the nights become bookable again.
    pub async fn cancel_reservation(
        &self,
        reservation_id: Ulid,
    ) -> Result<Reservation, EngineError> {
        self.transition(reservation_id, ReservationStatus::Cancelled).await
    }

    pub async fn complete_reservation(
        &self,
        reservation_id: Ulid,
    ) -> Result<Reservation, EngineError> {
        self.transition(reservation_id, ReservationStatus::Completed).await
    }

    async fn transition(
        &self,
        reservation_id: Ulid,
        to: ReservationStatus,
    ) -> Result<Reservation, EngineError> {
        let (property_id, mut guard) = self.resolve_reservation_write(&reservation_id).await?;
        let current = guard
            .reservation(&reservation_id)
            .ok_or(EngineError::ReservationNotFound(reservation_id))?;
        let from = current.status;
        let change = lifecycle::transition(current, to)?;
        self.commit_change(&mut guard, reservation_id, property_id, change, from)
            .await
    }

    async fn commit_change(
        &self,
        cal: &mut CalendarState,
        reservation_id: Ulid,
        property_id: Ulid,
        change: StatusChange,
        from: ReservationStatus,
    ) -> Result<Reservation, EngineError> {
        let to = change.status;
        let event = change.into_event(reservation_id, property_id, Utc::now());
        self.persist_and_apply(cal, vec![event]).await?;
        metrics::counter!(TRANSITIONS_TOTAL, "from" => from.as_str(), "to" => to.as_str())
            .increment(1);
        let updated = cal
            .reservation(&reservation_id)
            .cloned()
            .ok_or(EngineError::ReservationNotFound(reservation_id))?;
        info!(
            reservation = %reservation_id,
            %from,
            to = %updated.status,
            payment = ?updated.payment_status,
            "reservation updated"
        );
        Ok(updated)
    }

    /// Owner blocks nights by hand. Returns how many dates were newly blocked.
    pub async fn block_dates(
        &self,
        property_id: Ulid,
        dates: &[NaiveDate],
    ) -> Result<usize, EngineError> {
        let property = self.fetch_property(property_id).await?;
        let cal = self.calendar_or_create(property.id);
        let mut guard = cal.write().await;

        let mut fresh: Vec<NaiveDate> = dates
            .iter()
            .copied()
            .filter(|d| !guard.blocked.contains(d))
            .collect();
        fresh.sort_unstable();
        fresh.dedup();
        if guard.blocked.len() + fresh.len() > MAX_BLOCKED_DATES_PER_PROPERTY {
            return Err(EngineError::LimitExceeded("too many blocked dates on property"));
        }
        if fresh.is_empty() {
            return Ok(0);
        }

        let count = fresh.len();
        let events = fresh
            .into_iter()
            .map(|date| Event::DateBlocked { property_id, date })
            .collect();
        self.persist_and_apply(&mut guard, events).await?;
        Ok(count)
    }

    /// Returns how many dates were actually blocked before.
    pub async fn unblock_dates(
        &self,
        property_id: Ulid,
        dates: &[NaiveDate],
    ) -> Result<usize, EngineError> {
        let Some(cal) = self.get_calendar(&property_id) else {
            return Ok(0);
        };
        let mut guard = cal.write().await;

        let mut known: Vec<NaiveDate> = dates
            .iter()
            .copied()
            .filter(|d| guard.blocked.contains(d))
            .collect();
        known.sort_unstable();
        known.dedup();
        if known.is_empty() {
            return Ok(0);
        }

        let count = known.len();
        let events = known
            .into_iter()
            .map(|date| Event::DateUnblocked { property_id, date })
            .collect();
        self.persist_and_apply(&mut guard, events).await?;
        Ok(count)
    }

    /// Confirmed reservations whose checkout is on or before `today`.
    pub fn collect_completable(&self, today: NaiveDate) -> Vec<Ulid> {
        let mut due = Vec::new();
        for entry in self.state.iter() {
            let cal = entry.value().clone();
            if let Ok(guard) = cal.try_read() {
                due.extend(
                    guard
                        .reservations
                        .iter()
                        .filter(|r| {
                            r.status == ReservationStatus::Confirmed && r.check_out <= today
                        })
                        .map(|r| r.id),
                );
            }
        }
        due
    }

    /// Compact the WAL by rewriting it with only the events needed to recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        // Read guards are held until the swap so no append can slip in between
        // the snapshot and the rewrite.
        let calendars: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut guards = Vec::with_capacity(calendars.len());
        for cal in calendars {
            guards.push(cal.read_owned().await);
        }

        let records: Vec<Vec<Event>> = guards
            .iter()
            .map(|guard| {
                let blocks = guard.blocked.iter().map(|date| Event::DateBlocked {
                    property_id: guard.property_id,
                    date: *date,
                });
                let stays = guard.reservations.iter().map(|r| Event::ReservationCreated {
                    reservation: Box::new(r.clone()),
                });
                blocks.chain(stays).collect()
            })
            .collect();

        let (tx, rx) = tokio::sync::oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { records, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        let result = rx
            .await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()));
        drop(guards);
        result
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = tokio::sync::oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
