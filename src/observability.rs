use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "timetabled_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "timetabled_query_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "timetabled_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "timetabled_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "timetabled_connections_rejected_total";

/// Gauge: number of active tenants (loaded engines).
pub const TENANTS_ACTIVE: &str = "timetabled_tenants_active";

/// Counter: startup/auth failures.
pub const AUTH_FAILURES_TOTAL: &str = "timetabled_auth_failures_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "timetabled_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "timetabled_wal_flush_batch_size";

// ── Ledger metrics ──────────────────────────────────────────────

/// Counter: bookings committed, including makeups and batch members.
pub const BOOKINGS_COMMITTED_TOTAL: &str = "timetabled_bookings_committed_total";

/// Counter: proposals rejected for a conflict. Labels: kind.
pub const CONFLICTS_REJECTED_TOTAL: &str = "timetabled_conflicts_rejected_total";

/// Counter: bookings cancelled.
pub const CANCELLATIONS_TOTAL: &str = "timetabled_cancellations_total";

/// Counter: adjustments recorded. Labels: kind.
pub const ADJUSTMENTS_TOTAL: &str = "timetabled_adjustments_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
/// A failed install is logged and the server keeps running without metrics.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics"),
        Err(e) => tracing::error!("failed to install Prometheus metrics exporter: {e}"),
    }
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertResource { .. } => "insert_resource",
        Command::UpdateResource { .. } => "update_resource",
        Command::DeleteResource { .. } => "delete_resource",
        Command::InsertBookings { bookings } if bookings.len() > 1 => "batch_insert_bookings",
        Command::InsertBookings { .. } => "insert_booking",
        Command::InsertMakeup { .. } => "insert_makeup",
        Command::CancelBooking { .. } => "cancel_booking",
        Command::RescheduleBooking { .. } => "reschedule_booking",
        Command::ReassignBooking { .. } => "reassign_booking",
        Command::SelectBooking { .. } => "select_booking",
        Command::SelectTimetable { .. } => "select_timetable",
        Command::SelectMakeups { .. } => "select_makeups",
        Command::SelectHistory { .. } => "select_history",
        Command::SelectAdjustmentsBy { .. } => "select_adjustments_by",
        Command::SelectConflicts { .. } => "select_conflicts",
        Command::SelectAvailability { .. } => "select_availability",
        Command::SelectResources { .. } => "select_resources",
        Command::Listen { .. } => "listen",
        Command::Unlisten { .. } => "unlisten",
        Command::UnlistenAll => "unlisten_all",
    }
}
