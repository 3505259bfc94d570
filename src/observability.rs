use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "roadstay_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "roadstay_query_duration_seconds";

// ── Booking outcomes ────────────────────────────────────────────

/// Counter: reservation attempts refused for overlapping dates.
pub const CONFLICTS_TOTAL: &str = "roadstay_conflicts_total";

/// Counter: notification dispatches. Labels: kind, status.
pub const NOTIFICATIONS_TOTAL: &str = "roadstay_notifications_total";

/// Counter: pending reservations rejected by the expiry task.
pub const PENDING_EXPIRED_TOTAL: &str = "roadstay_pending_expired_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "roadstay_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "roadstay_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "roadstay_connections_rejected_total";

/// Counter: startup/auth failures.
pub const AUTH_FAILURES_TOTAL: &str = "roadstay_auth_failures_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "roadstay_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "roadstay_wal_flush_batch_size";

/// Counter: WAL appends retried after a storage failure.
pub const WAL_RETRIES_TOTAL: &str = "roadstay_wal_retries_total";

/// Counter: WAL compactions. Labels: status.
pub const COMPACTIONS_TOTAL: &str = "roadstay_compactions_total";

/// Install the Prometheus exporter on `port`. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertReservation { .. } => "insert_reservation",
        Command::Approve { .. } => "approve",
        Command::Reject { .. } => "reject",
        Command::Cancel { .. } => "cancel",
        Command::UpsertUnit { .. } => "upsert_unit",
        Command::InsertUnitExtra { .. } => "insert_unit_extra",
        Command::SelectReservation { .. } => "select_reservation",
        Command::SelectUnitReservations { .. } => "select_unit_reservations",
        Command::SelectAvailability { .. } => "select_availability",
        Command::SelectBlockedDates { .. } => "select_blocked_dates",
        Command::SelectQuote { .. } => "select_quote",
        Command::SelectUnits { .. } => "select_units",
    }
}
