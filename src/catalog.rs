use std::io;
use std::path::Path;

use async_trait::async_trait;
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::engine::EngineError;
use crate::model::{AdditionalService, Property, SpecialOffer};

/// Read-only view of the listing and admin subsystems.
///
/// The engine never writes through this trait. Implementations backed by a remote
/// store should map transport failures to [`EngineError::CatalogUnavailable`]; the
/// engine bounds every call with its I/O timeout.
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn property(&self, id: Ulid) -> Result<Option<Property>, EngineError>;

    /// All offers for the property, active or not.
    async fn special_offers(&self, property_id: Ulid) -> Result<Vec<SpecialOffer>, EngineError>;

    async fn service(&self, id: Ulid) -> Result<Option<AdditionalService>, EngineError>;
}

pub fn validate_property(p: &Property) -> Result<(), EngineError> {
    if p.nightly_base_price <= Decimal::ZERO {
        return Err(EngineError::InvalidCatalogRecord("nightly_base_price must be positive"));
    }
    if p.cleaning_fee < Decimal::ZERO {
        return Err(EngineError::InvalidCatalogRecord("cleaning_fee must not be negative"));
    }
    if p.min_nights < 1 || p.min_nights > p.max_nights {
        return Err(EngineError::InvalidCatalogRecord("need 1 <= min_nights <= max_nights"));
    }
    if p.max_guests < 1 {
        return Err(EngineError::InvalidCatalogRecord("max_guests must be at least 1"));
    }
    for pct in [p.long_stay_discount_7, p.long_stay_discount_30].into_iter().flatten() {
        if pct < Decimal::ZERO || pct > Decimal::ONE_HUNDRED {
            return Err(EngineError::InvalidCatalogRecord("discount must be within 0..=100"));
        }
    }
    Ok(())
}

pub fn validate_offer(o: &SpecialOffer) -> Result<(), EngineError> {
    if o.nightly_override_price <= Decimal::ZERO {
        return Err(EngineError::InvalidCatalogRecord("nightly_override_price must be positive"));
    }
    if o.start_date >= o.end_date {
        return Err(EngineError::InvalidCatalogRecord("offer start_date must precede end_date"));
    }
    Ok(())
}

pub fn validate_service(s: &AdditionalService) -> Result<(), EngineError> {
    if s.unit_price_per_day < Decimal::ZERO {
        return Err(EngineError::InvalidCatalogRecord("unit_price_per_day must not be negative"));
    }
    Ok(())
}

/// On-disk JSON shape accepted by [`InMemoryCatalog::load_json`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    #[serde(default)]
    pub properties: Vec<Property>,
    #[serde(default)]
    pub special_offers: Vec<SpecialOffer>,
    #[serde(default)]
    pub services: Vec<AdditionalService>,
}

pub struct InMemoryCatalog {
    properties: DashMap<Ulid, Property>,
    /// property id → offers
    offers: DashMap<Ulid, Vec<SpecialOffer>>,
    services: DashMap<Ulid, AdditionalService>,
}

impl Default for InMemoryCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self {
            properties: DashMap::new(),
            offers: DashMap::new(),
            services: DashMap::new(),
        }
    }

    pub fn from_snapshot(snapshot: CatalogSnapshot) -> Result<Self, EngineError> {
        let catalog = Self::new();
        for p in snapshot.properties {
            catalog.upsert_property(p)?;
        }
        for o in snapshot.special_offers {
            catalog.upsert_offer(o)?;
        }
        for s in snapshot.services {
            catalog.upsert_service(s)?;
        }
        Ok(catalog)
    }

    pub fn load_json(path: &Path) -> io::Result<Self> {
        let raw = std::fs::read(path)?;
        let snapshot: CatalogSnapshot = serde_json::from_slice(&raw)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        Self::from_snapshot(snapshot)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))
    }

    pub fn upsert_property(&self, property: Property) -> Result<(), EngineError> {
        validate_property(&property)?;
        self.properties.insert(property.id, property);
        Ok(())
    }

    /// Insert or replace an offer (matched by id).
    pub fn upsert_offer(&self, offer: SpecialOffer) -> Result<(), EngineError> {
        validate_offer(&offer)?;
        let mut offers = self.offers.entry(offer.property_id).or_default();
        offers.retain(|o| o.id != offer.id);
        offers.push(offer);
        Ok(())
    }

    pub fn remove_offer(&self, property_id: &Ulid, offer_id: &Ulid) {
        if let Some(mut offers) = self.offers.get_mut(property_id) {
            offers.retain(|o| o.id != *offer_id);
        }
    }

    pub fn upsert_service(&self, service: AdditionalService) -> Result<(), EngineError> {
        validate_service(&service)?;
        self.services.insert(service.id, service);
        Ok(())
    }

    pub fn property_count(&self) -> usize {
        self.properties.len()
    }

    pub fn property_ids(&self) -> Vec<Ulid> {
        self.properties.iter().map(|e| *e.key()).collect()
    }
}

#[async_trait]
impl Catalog for InMemoryCatalog {
    async fn property(&self, id: Ulid) -> Result<Option<Property>, EngineError> {
        Ok(self.properties.get(&id).map(|e| e.value().clone()))
    }

    async fn special_offers(&self, property_id: Ulid) -> Result<Vec<SpecialOffer>, EngineError> {
        Ok(self
            .offers
            .get(&property_id)
            .map(|e| e.value().clone())
            .unwrap_or_default())
    }

    async fn service(&self, id: Ulid) -> Result<Option<AdditionalService>, EngineError> {
        Ok(self.services.get(&id).map(|e| e.value().clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn property() -> Property {
        Property {
            id: Ulid::new(),
            owner_id: Ulid::new(),
            nightly_base_price: dec!(100),
            cleaning_fee: dec!(50),
            min_nights: 1,
            max_nights: 30,
            max_guests: 4,
            long_stay_discount_7: None,
            long_stay_discount_30: None,
        }
    }

    #[test]
    fn rejects_inverted_night_bounds() {
        let p = Property {
            min_nights: 5,
            max_nights: 2,
            ..property()
        };
        assert!(matches!(
            validate_property(&p),
            Err(EngineError::InvalidCatalogRecord(_))
        ));
    }

    #[test]
    fn rejects_free_nights_and_bad_discounts() {
        let p = Property {
            nightly_base_price: Decimal::ZERO,
            ..property()
        };
        assert!(validate_property(&p).is_err());

        let p = Property {
            long_stay_discount_30: Some(dec!(120)),
            ..property()
        };
        assert!(validate_property(&p).is_err());
    }

    #[tokio::test]
    async fn upsert_offer_replaces_by_id() {
        let catalog = InMemoryCatalog::new();
        let p = property();
        let pid = p.id;
        catalog.upsert_property(p).unwrap();

        let start = NaiveDate::from_ymd_opt(2026, 12, 20).unwrap();
        let offer = SpecialOffer {
            id: Ulid::new(),
            property_id: pid,
            start_date: start,
            end_date: start + chrono::Days::new(5),
            nightly_override_price: dec!(180),
            active: true,
        };
        catalog.upsert_offer(offer.clone()).unwrap();
        catalog
            .upsert_offer(SpecialOffer {
                nightly_override_price: dec!(200),
                ..offer.clone()
            })
            .unwrap();

        let offers = catalog.special_offers(pid).await.unwrap();
        assert_eq!(offers.len(), 1);
        assert_eq!(offers[0].nightly_override_price, dec!(200));

        catalog.remove_offer(&pid, &offer.id);
        assert!(catalog.special_offers(pid).await.unwrap().is_empty());
    }

    #[test]
    fn snapshot_from_json() {
        let pid = Ulid::new();
        let json = format!(
            r#"{{
                "properties": [{{
                    "id": "{pid}",
                    "owner_id": "{owner}",
                    "nightly_base_price": "120.50",
                    "cleaning_fee": "40",
                    "min_nights": 2,
                    "max_nights": 28,
                    "max_guests": 6,
                    "long_stay_discount_7": "10"
                }}],
                "services": [{{
                    "id": "{sid}",
                    "name": "Airport pickup",
                    "unit_price_per_day": "15",
                    "active": true
                }}]
            }}"#,
            owner = Ulid::new(),
            sid = Ulid::new(),
        );
        let snapshot: CatalogSnapshot = serde_json::from_str(&json).unwrap();
        let catalog = InMemoryCatalog::from_snapshot(snapshot).unwrap();
        assert_eq!(catalog.property_count(), 1);
        assert_eq!(catalog.property_ids(), vec![pid]);
    }
}
