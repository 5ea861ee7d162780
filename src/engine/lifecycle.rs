use chrono::{DateTime, Utc};
use ulid::Ulid;

use crate::model::*;

use super::EngineError;

/// Allowed status edges. Nothing leaves `cancelled` or `completed`.
pub fn can_transition(from: ReservationStatus, to: ReservationStatus) -> bool {
    use ReservationStatus::*;
    matches!(
        (from, to),
        (Pending, Confirmed)
            | (Pending, Cancelled)
            | (Confirmed, Completed)
            | (Confirmed, Cancelled)
    )
}

/// The mutable part of a reservation after a lifecycle step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub status: ReservationStatus,
    pub payment_status: PaymentStatus,
    pub payment_method: Option<String>,
    pub transaction_id: Option<String>,
}

impl StatusChange {
    fn keep(r: &Reservation) -> Self {
        Self {
            status: r.status,
            payment_status: r.payment_status,
            payment_method: r.payment_method.clone(),
            transaction_id: r.transaction_id.clone(),
        }
    }

    fn with_payment(r: &Reservation, outcome: &PaymentOutcome) -> Self {
        Self {
            payment_method: Some(outcome.payment_method.clone()),
            transaction_id: Some(outcome.transaction_id.clone()),
            ..Self::keep(r)
        }
    }

    pub fn into_event(self, id: Ulid, property_id: Ulid, at: DateTime<Utc>) -> Event {
        Event::ReservationStatusChanged {
            id,
            property_id,
            status: self.status,
            payment_status: self.payment_status,
            payment_method: self.payment_method,
            transaction_id: self.transaction_id,
            at,
        }
    }
}

/// Step driven by an external command: host confirmation, cancellation or completion.
///
/// A host confirming a cash booking has collected the money, so the payment is
/// settled in the same record.
pub fn transition(r: &Reservation, to: ReservationStatus) -> Result<StatusChange, EngineError> {
    if !can_transition(r.status, to) {
        return Err(EngineError::InvalidTransition {
            id: r.id,
            from: r.status,
            to,
        });
    }
    let cash_collected = to == ReservationStatus::Confirmed
        && r.payment_status == PaymentStatus::Pending
        && r.payment_method.as_deref().is_some_and(is_cash_method);
    let payment_status = if cash_collected {
        PaymentStatus::Paid
    } else {
        r.payment_status
    };
    Ok(StatusChange {
        status: to,
        payment_status,
        ..StatusChange::keep(r)
    })
}

/// Work out what a payment outcome does to a reservation.
///
/// `Ok(None)` means the outcome is already reflected, so re-delivery is a no-op.
/// Card (non-cash) payments confirm a pending reservation in the same record that
/// stores the payment. Cash payments only record the method: the host confirms later.
pub fn reconcile_payment(
    r: &Reservation,
    outcome: &PaymentOutcome,
) -> Result<Option<StatusChange>, EngineError> {
    use ReservationStatus::*;

    let change = match outcome.payment_status {
        PaymentStatus::Paid => {
            if r.payment_status == PaymentStatus::Paid {
                return Ok(None);
            }
            match r.status {
                Pending if outcome.is_cash() => StatusChange::with_payment(r, outcome),
                Pending => StatusChange {
                    status: Confirmed,
                    payment_status: PaymentStatus::Paid,
                    ..StatusChange::with_payment(r, outcome)
                },
                Confirmed => StatusChange {
                    payment_status: PaymentStatus::Paid,
                    ..StatusChange::with_payment(r, outcome)
                },
                Cancelled | Completed => {
                    return Err(EngineError::InvalidTransition {
                        id: r.id,
                        from: r.status,
                        to: Confirmed,
                    });
                }
            }
        }
        PaymentStatus::Pending => {
            // Stale or informational: only fills in the method while nothing is settled.
            if r.payment_status != PaymentStatus::Pending || !r.status.holds_nights() {
                return Ok(None);
            }
            StatusChange::with_payment(r, outcome)
        }
        PaymentStatus::Refunded => match (r.status, r.payment_status) {
            (_, PaymentStatus::Refunded) => return Ok(None),
            (Cancelled, PaymentStatus::Paid) => StatusChange {
                payment_status: PaymentStatus::Refunded,
                ..StatusChange::keep(r)
            },
            (_, from) => {
                return Err(EngineError::InvalidPaymentTransition {
                    id: r.id,
                    from,
                    to: PaymentStatus::Refunded,
                });
            }
        },
    };

    if change == StatusChange::keep(r) {
        return Ok(None);
    }
    Ok(Some(change))
}

/// Fold a status change into the stored record.
pub(crate) fn apply_change(
    r: &mut Reservation,
    status: ReservationStatus,
    payment_status: PaymentStatus,
    payment_method: &Option<String>,
    transaction_id: &Option<String>,
    at: DateTime<Utc>,
) {
    r.status = status;
    r.payment_status = payment_status;
    r.payment_method = payment_method.clone();
    r.transaction_id = transaction_id.clone();
    r.updated_at = at;
}
