use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "crewcal_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "crewcal_query_duration_seconds";

// ── Domain events ───────────────────────────────────────────────

/// Counter: bookings created. Labels: status.
pub const BOOKINGS_CREATED_TOTAL: &str = "crewcal_bookings_created_total";

/// Counter: held bookings moved to booked.
pub const BOOKINGS_CONFIRMED_TOTAL: &str = "crewcal_bookings_confirmed_total";

/// Counter: new bookings that overlap an existing one of the same owner.
pub const BOOKING_OVERLAPS_TOTAL: &str = "crewcal_booking_overlaps_total";

/// Counter: notifications published. Labels: kind.
pub const NOTIFICATIONS_TOTAL: &str = "crewcal_notifications_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "crewcal_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "crewcal_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "crewcal_connections_rejected_total";

/// Gauge: number of open workspaces (loaded engines).
pub const WORKSPACES_ACTIVE: &str = "crewcal_workspaces_active";

/// Gauge: open viewer sessions.
pub const SESSIONS_ACTIVE: &str = "crewcal_sessions_active";

/// Gauge: owner calendars held in memory.
pub const CALENDARS_LOADED: &str = "crewcal_calendars_loaded";

/// Counter: repository load/save failures. Labels: op.
pub const REPOSITORY_FAILURES_TOTAL: &str = "crewcal_repository_failures_total";

/// Counter: log compactions completed.
pub const COMPACTIONS_TOTAL: &str = "crewcal_compactions_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "crewcal_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (records per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "crewcal_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertBookings { .. } => "insert_bookings",
        Command::UpdateBookingStatus { .. } => "update_booking_status",
        Command::SelectBookings { .. } => "select_bookings",
        Command::SelectCalendar { .. } => "select_calendar",
        Command::SelectMonth { .. } => "select_month",
        Command::SelectNotifications { .. } => "select_notifications",
        Command::MarkNotificationsRead { .. } => "mark_notifications_read",
        Command::DeleteNotification { .. } => "delete_notification",
    }
}
