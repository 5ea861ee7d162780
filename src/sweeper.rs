use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::Engine;

/// Background task that marks confirmed stays as completed once checkout has passed.
pub async fn run_completion_sweeper(engine: Arc<Engine>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let today = chrono::Utc::now().date_naive();
        sweep_completed(&engine, today).await;
        engine.notify.prune();
    }
}

/// One sweep. Returns how many reservations were completed.
pub async fn sweep_completed(engine: &Engine, today: chrono::NaiveDate) -> usize {
    let mut completed = 0;
    for id in engine.collect_completable(today) {
        match engine.complete_reservation(id).await {
            Ok(_) => {
                completed += 1;
                info!("completed reservation {id}");
            }
            // May have been cancelled or completed in the meantime
            Err(e) => debug!("sweeper skip {id}: {e}"),
        }
    }
    completed
}

/// Background task that compacts the WAL once enough appends have accumulated.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => {
                metrics::counter!(crate::observability::WAL_COMPACTIONS_TOTAL).increment(1);
                info!("compacted WAL after {appends} appends");
            }
            Err(e) => warn!("WAL compaction failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::InMemoryCatalog;
    use crate::engine::EngineSettings;
    use crate::model::*;
    use crate::notify::NotifyHub;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;
    use std::path::PathBuf;
    use ulid::Ulid;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("stayline_test_sweeper");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn sweeper_completes_past_confirmed_stays() {
        let catalog = Arc::new(InMemoryCatalog::new());
        let pid = Ulid::new();
        catalog
            .upsert_property(Property {
                id: pid,
                owner_id: Ulid::new(),
                nightly_base_price: dec!(80),
                cleaning_fee: dec!(20),
                min_nights: 1,
                max_nights: 14,
                max_guests: 2,
                long_stay_discount_7: None,
                long_stay_discount_30: None,
            })
            .unwrap();
        let engine = Engine::new(
            test_wal_path("sweep.wal"),
            catalog,
            Arc::new(NotifyHub::new()),
            EngineSettings::default(),
        )
        .unwrap();

        let d = |day| NaiveDate::from_ymd_opt(2026, 3, day).unwrap();
        let card = PaymentOutcome {
            payment_method: "card".into(),
            payment_status: PaymentStatus::Paid,
            transaction_id: "tx-sweep".into(),
        };
        let request = |stay, payment| BookingRequest {
            property_id: pid,
            guest_id: Ulid::new(),
            stay,
            guests: GuestCount::new(1, 0),
            services: Vec::new(),
            payment,
            owner_test: false,
        };

        let past = engine
            .create_booking(request(Stay::new(d(1), d(3)), Some(card.clone())))
            .await
            .unwrap();
        let unpaid = engine
            .create_booking(request(Stay::new(d(4), d(6)), None))
            .await
            .unwrap();
        let future = engine
            .create_booking(request(Stay::new(d(20), d(22)), Some(card)))
            .await
            .unwrap();

        assert_eq!(sweep_completed(&engine, d(10)).await, 1);

        let get = |id| engine.get_reservation(id);
        assert_eq!(get(past.id).await.unwrap().status, ReservationStatus::Completed);
        assert_eq!(get(unpaid.id).await.unwrap().status, ReservationStatus::Pending);
        assert_eq!(get(future.id).await.unwrap().status, ReservationStatus::Confirmed);

        // Nothing left to do on a second pass
        assert_eq!(sweep_completed(&engine, d(10)).await, 0);
    }
}
