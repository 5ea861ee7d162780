use std::net::SocketAddr;

// ── Request metrics ─────────────────────────────────────────────

/// Counter: booking attempts. Labels: outcome (`ok` or an error label).
pub const BOOKINGS_TOTAL: &str = "stayline_bookings_total";

/// Histogram: end-to-end booking latency in seconds, including catalog reads.
pub const BOOKING_DURATION_SECONDS: &str = "stayline_booking_duration_seconds";

/// Counter: quotes computed. Labels: outcome.
pub const QUOTES_TOTAL: &str = "stayline_quotes_total";

/// Counter: advisory availability checks. Labels: outcome.
pub const AVAILABILITY_CHECKS_TOTAL: &str = "stayline_availability_checks_total";

/// Counter: reservation lifecycle steps. Labels: from, to.
pub const TRANSITIONS_TOTAL: &str = "stayline_transitions_total";

// ── Storage metrics ─────────────────────────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "stayline_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (requests per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "stayline_wal_flush_batch_size";

/// Counter: WAL compactions performed.
pub const WAL_COMPACTIONS_TOTAL: &str = "stayline_wal_compactions_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
