use rust_decimal::Decimal;

use crate::model::*;

use super::conflict::{validate_duration, validate_guests};
use super::EngineError;

/// Platform fee, 12%, charged on subtotal + cleaning + services.
pub const PLATFORM_FEE_RATE: Decimal = Decimal::from_parts(12, 0, 0, false, 2);

/// Active offers ordered by precedence: earliest `start_date` first, offer id breaks ties.
fn offers_by_precedence(offers: &[SpecialOffer], property_id: ulid::Ulid) -> Vec<&SpecialOffer> {
    let mut active: Vec<&SpecialOffer> = offers
        .iter()
        .filter(|o| o.active && o.property_id == property_id)
        .collect();
    active.sort_by(|a, b| a.start_date.cmp(&b.start_date).then(a.id.cmp(&b.id)));
    active
}

fn add(a: Decimal, b: Decimal) -> Result<Decimal, EngineError> {
    a.checked_add(b).ok_or(EngineError::PriceOverflow)
}

fn mul(a: Decimal, b: Decimal) -> Result<Decimal, EngineError> {
    a.checked_mul(b).ok_or(EngineError::PriceOverflow)
}

fn div(a: Decimal, b: Decimal) -> Result<Decimal, EngineError> {
    a.checked_div(b).ok_or(EngineError::PriceOverflow)
}

/// Percentage of the long-stay tier that applies, if any. The 30-night tier wins.
fn long_stay_discount_pct(property: &Property, nights: u32) -> Option<Decimal> {
    if nights >= 30
        && let Some(pct) = property.long_stay_discount_30
    {
        return Some(pct);
    }
    if nights >= 7 {
        return property.long_stay_discount_7;
    }
    None
}

/// Compute the itemized price of a stay. Pure; no rounding happens here. Amounts too
/// large for `Decimal` fail with [`EngineError::PriceOverflow`].
///
/// `services` pairs each catalog entry with the quantity the guest asked for. The
/// caller has already rejected unknown, inactive, and duplicate services.
pub fn quote(
    property: &Property,
    offers: &[SpecialOffer],
    stay: &Stay,
    guests: GuestCount,
    services: &[(AdditionalService, u32)],
) -> Result<Quote, EngineError> {
    let nights = validate_duration(property, stay)?;
    validate_guests(property, guests)?;

    let ranked = offers_by_precedence(offers, property.id);
    let mut nightly_rates = Vec::with_capacity(nights as usize);
    let mut base_price = Decimal::ZERO;
    let mut has_special_offer = false;

    for night in stay.each_night() {
        let rate = match ranked.iter().find(|o| o.covers(night)) {
            Some(offer) => {
                has_special_offer = true;
                NightlyRate {
                    night,
                    price: offer.nightly_override_price,
                    special_offer_id: Some(offer.id),
                }
            }
            None => NightlyRate {
                night,
                price: property.nightly_base_price,
                special_offer_id: None,
            },
        };
        base_price = add(base_price, rate.price)?;
        nightly_rates.push(rate);
    }

    let nights_dec = Decimal::from(nights);
    let discount = match long_stay_discount_pct(property, nights) {
        Some(pct) => div(mul(base_price, pct)?, Decimal::ONE_HUNDRED)?,
        None => Decimal::ZERO,
    };
    let subtotal = base_price
        .checked_sub(discount)
        .ok_or(EngineError::PriceOverflow)?;

    let mut service_lines = Vec::with_capacity(services.len());
    let mut services_total = Decimal::ZERO;
    for (service, quantity) in services {
        let line_total = mul(service.unit_price_per_day, nights_dec)?;
        services_total = add(services_total, line_total)?;
        service_lines.push(ServiceLine {
            service_id: service.id,
            name: service.name.clone(),
            quantity: *quantity,
            unit_price_per_day: service.unit_price_per_day,
            total: line_total,
        });
    }

    let cleaning_fee = property.cleaning_fee;
    let fee_base = add(add(subtotal, cleaning_fee)?, services_total)?;
    let service_fee = mul(fee_base, PLATFORM_FEE_RATE)?;
    let total = add(fee_base, service_fee)?;
    let effective_nightly_rate = div(base_price, nights_dec)?;

    Ok(Quote {
        nights,
        nightly_rates,
        base_price,
        discount,
        subtotal,
        cleaning_fee,
        services: service_lines,
        services_total,
        service_fee,
        total,
        has_special_offer,
        effective_nightly_rate,
    })
}
