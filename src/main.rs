use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tracing::info;

use stayline::catalog::InMemoryCatalog;
use stayline::config::Config;
use stayline::engine::Engine;
use stayline::model::Event;
use stayline::notify::NotifyHub;
use stayline::sweeper;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    stayline::observability::init(config.metrics_port)?;

    std::fs::create_dir_all(&config.data_dir)?;

    let catalog = match &config.catalog_path {
        Some(path) => InMemoryCatalog::load_json(path)?,
        None => InMemoryCatalog::new(),
    };
    let property_count = catalog.property_count();

    let notify = Arc::new(NotifyHub::new());
    let engine = Arc::new(Engine::new(
        config.wal_path(),
        Arc::new(catalog),
        notify.clone(),
        config.engine_settings(),
    )?);

    info!("stayline engine started");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  properties: {property_count}");
    info!("  calendars: {}", engine.state.len());
    info!("  io_timeout: {:?}", config.io_timeout);
    let owner_tests = if config.owner_test_bookings { "enabled" } else { "disabled" };
    info!("  owner test bookings: {owner_tests}");
    let metrics = config
        .metrics_port
        .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"));
    info!("  metrics: {metrics}");

    tokio::spawn(sweeper::run_completion_sweeper(engine.clone(), config.sweep_interval));
    tokio::spawn(sweeper::run_compactor(engine.clone(), config.compact_threshold));

    // Relay change events to the log for downstream log shippers.
    let mut events = notify.subscribe_all();
    let relay = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(Event::ReservationCreated { reservation }) => {
                    info!(
                        reservation = %reservation.id,
                        property = %reservation.property_id,
                        "reservation_created"
                    );
                }
                Ok(Event::ReservationStatusChanged { id, status, .. }) => {
                    info!(reservation = %id, %status, "reservation_status_changed");
                }
                Ok(Event::DateBlocked { property_id, date }) => {
                    info!(property = %property_id, %date, "date_blocked");
                }
                Ok(Event::DateUnblocked { property_id, date }) => {
                    info!(property = %property_id, %date, "date_unblocked");
                }
                Err(RecvError::Lagged(n)) => {
                    tracing::warn!("event relay lagged, skipped {n} events");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    // Graceful shutdown on SIGTERM/ctrl-c
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }

    info!("shutdown signal received, compacting WAL");
    if let Err(e) = engine.compact_wal().await {
        tracing::warn!("final compaction failed: {e}");
    }
    relay.abort();

    info!("stayline stopped");
    Ok(())
}
