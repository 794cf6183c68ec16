use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "venued_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "venued_query_duration_seconds";

/// Counter: slot conflicts reported to callers.
pub const SLOT_CONFLICTS_TOTAL: &str = "venued_slot_conflicts_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "venued_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "venued_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "venued_connections_rejected_total";

/// Counter: startup/auth failures.
pub const AUTH_FAILURES_TOTAL: &str = "venued_auth_failures_total";

/// Counter: mutations denied by the role gate.
pub const PERMISSION_DENIED_TOTAL: &str = "venued_permission_denied_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "venued_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "venued_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertClient { .. } => "insert_client",
        Command::InsertPackage { .. } => "insert_package",
        Command::InsertService { .. } => "insert_service",
        Command::InsertReservation { .. } => "insert_reservation",
        Command::UpdateReservation { .. } => "update_reservation",
        Command::DeleteReservation { .. } => "delete_reservation",
        Command::InsertServiceLine { .. } => "insert_service_line",
        Command::InsertPayment { .. } => "insert_payment",
        Command::SelectReservations { .. } => "select_reservations",
        Command::SelectReservation { .. } => "select_reservation",
        Command::SelectClients => "select_clients",
        Command::Listen { .. } => "listen",
    }
}
