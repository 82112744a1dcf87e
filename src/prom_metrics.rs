//! # Prometheus Metrics — Exposition for Container Orchestration
//!
//! Exposes hashvault operational metrics in the Prometheus text exposition
//! format for scraping by Prometheus, Grafana Agent, or any
//! OpenMetrics-compatible collector.
//!
//! ## Metrics Exposed
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `hashvault_http_request_duration_seconds` | Histogram | `method`, `path` | API request latency |
//! | `hashvault_ledger_operations_total` | Counter | `tx_type` | Completed ledger operations by type |
//! | `hashvault_users` | Gauge | — | Registered profiles |
//! | `hashvault_active_task_runs` | Gauge | — | Task runs in `processing` |
//! | `hashvault_claimable_task_runs` | Gauge | — | Processing runs past `ends_at` |
//! | `hashvault_active_rentals` | Gauge | — | Rentals not yet expired |
//! | `hashvault_pending_deposits` | Gauge | — | Deposits awaiting settlement |
//! | `hashvault_pending_withdrawals` | Gauge | — | Withdrawals awaiting settlement |
//! | `hashvault_ledger_drift_users` | Gauge | — | Users whose cached balance disagrees with the ledger |
//! | `hashvault_cpu_usage_percent` | Gauge | — | Service CPU usage |
//! | `hashvault_memory_usage_percent` | Gauge | — | Service memory usage |
//! | `hashvault_db_pool_active` / `_idle` / `_max` | Gauge | — | Connection pool state |
//!
//! ## Integration
//!
//! Gauges are refreshed from the server's 30-second background loop; the
//! request histogram is fed by middleware; operation counters are bumped by
//! the handlers that settle money. The `/metrics` endpoint renders the
//! current registry state on each scrape.

use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;
use std::sync::atomic::AtomicU64;

/// Label set for the request-duration histogram. Paths are normalized
/// before use so IDs never explode the label space.
#[derive(Clone, Debug, Hash, PartialEq, Eq, prometheus_client::encoding::EncodeLabelSet)]
pub struct HttpLabel {
    pub method: String,
    pub path: String,
}

/// Label set for per-transaction-type counters.
#[derive(Clone, Debug, Hash, PartialEq, Eq, prometheus_client::encoding::EncodeLabelSet)]
pub struct TxTypeLabel {
    pub tx_type: String,
}

/// Thread-safe metrics registry for the hashvault service.
///
/// All fields use atomic types and are safe to update from any thread or
/// async task. The `Family` types create per-label-set instances on first
/// use.
pub struct Metrics {
    pub registry: Registry,
    pub http_request_duration: Family<HttpLabel, Histogram>,
    pub ledger_operations: Family<TxTypeLabel, Counter>,
    pub users: Gauge,
    pub active_task_runs: Gauge,
    pub claimable_task_runs: Gauge,
    pub active_rentals: Gauge,
    pub pending_deposits: Gauge,
    pub pending_withdrawals: Gauge,
    pub ledger_drift_users: Gauge,
    pub cpu_usage_percent: Gauge<f64, AtomicU64>,
    pub memory_usage_percent: Gauge<f64, AtomicU64>,
    pub db_pool_active: Gauge,
    pub db_pool_idle: Gauge,
    pub db_pool_max: Gauge,
}

impl Metrics {
    /// Create a new metrics registry with all hashvault metrics registered.
    pub fn new() -> Self {
        let mut registry = Registry::default();

        // 1ms to ~8s.
        let http_request_duration = Family::<HttpLabel, Histogram>::new_with_constructor(|| {
            Histogram::new(exponential_buckets(0.001, 2.0, 14))
        });
        registry.register(
            "hashvault_http_request_duration_seconds",
            "API request latency by method and normalized path",
            http_request_duration.clone(),
        );

        let ledger_operations = Family::<TxTypeLabel, Counter>::default();
        registry.register(
            "hashvault_ledger_operations",
            "Completed ledger operations by transaction type",
            ledger_operations.clone(),
        );

        let users = Gauge::default();
        registry.register("hashvault_users", "Registered profiles", users.clone());

        let active_task_runs = Gauge::default();
        registry.register(
            "hashvault_active_task_runs",
            "Task runs currently processing",
            active_task_runs.clone(),
        );

        let claimable_task_runs = Gauge::default();
        registry.register(
            "hashvault_claimable_task_runs",
            "Processing task runs past their end date",
            claimable_task_runs.clone(),
        );

        let active_rentals = Gauge::default();
        registry.register(
            "hashvault_active_rentals",
            "Device rentals not yet expired",
            active_rentals.clone(),
        );

        let pending_deposits = Gauge::default();
        registry.register(
            "hashvault_pending_deposits",
            "Deposit requests awaiting admin settlement",
            pending_deposits.clone(),
        );

        let pending_withdrawals = Gauge::default();
        registry.register(
            "hashvault_pending_withdrawals",
            "Withdrawal requests awaiting admin settlement",
            pending_withdrawals.clone(),
        );

        let ledger_drift_users = Gauge::default();
        registry.register(
            "hashvault_ledger_drift_users",
            "Users whose cached balances disagree with the transaction ledger",
            ledger_drift_users.clone(),
        );

        let cpu_usage_percent = Gauge::<f64, AtomicU64>::default();
        registry.register(
            "hashvault_cpu_usage_percent",
            "Service CPU usage percentage",
            cpu_usage_percent.clone(),
        );

        let memory_usage_percent = Gauge::<f64, AtomicU64>::default();
        registry.register(
            "hashvault_memory_usage_percent",
            "Service memory usage percentage",
            memory_usage_percent.clone(),
        );

        let db_pool_active = Gauge::default();
        registry.register(
            "hashvault_db_pool_active",
            "Database connections currently checked out",
            db_pool_active.clone(),
        );

        let db_pool_idle = Gauge::default();
        registry.register(
            "hashvault_db_pool_idle",
            "Idle database connections",
            db_pool_idle.clone(),
        );

        let db_pool_max = Gauge::default();
        registry.register(
            "hashvault_db_pool_max",
            "Configured database pool size",
            db_pool_max.clone(),
        );

        Self {
            registry,
            http_request_duration,
            ledger_operations,
            users,
            active_task_runs,
            claimable_task_runs,
            active_rentals,
            pending_deposits,
            pending_withdrawals,
            ledger_drift_users,
            cpu_usage_percent,
            memory_usage_percent,
            db_pool_active,
            db_pool_idle,
            db_pool_max,
        }
    }

    /// Render all metrics in Prometheus text exposition format.
    pub fn encode(&self) -> String {
        let mut buf = String::new();
        encode(&mut buf, &self.registry).expect("encoding metrics should not fail");
        buf
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_encode_returns_valid_text() {
        let m = Metrics::new();
        m.users.set(5);
        m.cpu_usage_percent.set(42.5);
        m.ledger_operations
            .get_or_create(&TxTypeLabel {
                tx_type: "purchase".to_string(),
            })
            .inc();

        let output = m.encode();
        assert!(output.contains("hashvault_users"));
        assert!(output.contains("hashvault_cpu_usage_percent"));
        assert!(output.contains("hashvault_ledger_operations"));
        assert!(output.contains("purchase"));
    }

    #[test]
    fn metrics_default_values_are_zero() {
        let m = Metrics::new();
        let output = m.encode();
        assert!(output.contains("hashvault_users"));
        assert!(output.contains("hashvault_pending_deposits"));
    }

    #[test]
    fn metrics_per_type_counters_independent() {
        let m = Metrics::new();
        m.ledger_operations
            .get_or_create(&TxTypeLabel {
                tx_type: "purchase".to_string(),
            })
            .inc_by(3);
        m.ledger_operations
            .get_or_create(&TxTypeLabel {
                tx_type: "task_earning".to_string(),
            })
            .inc_by(7);

        let output = m.encode();
        assert!(output.contains("purchase"));
        assert!(output.contains("task_earning"));
    }

    #[test]
    fn request_histogram_observes_by_route() {
        let m = Metrics::new();
        m.http_request_duration
            .get_or_create(&HttpLabel {
                method: "POST".to_string(),
                path: "/api/v1/my/tasks/:id/claim".to_string(),
            })
            .observe(0.012);

        let output = m.encode();
        assert!(output.contains("hashvault_http_request_duration_seconds"));
        assert!(output.contains(":id/claim"));
    }
}
