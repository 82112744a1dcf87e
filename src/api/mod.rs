//! # API — HTTP Surface of the Rewards Ledger
//!
//! Runs an Axum HTTP server exposing the ledger operations as a versioned
//! REST API, plus a 30-second background loop that sweeps expired rentals,
//! refreshes Prometheus gauges, and audits cached balances hourly.
//!
//! ## Route map
//!
//! | Prefix | Auth | Contents |
//! |--------|------|----------|
//! | `/api/v1/devices`, `/tasks`, `/levels`, `/announcements` | public | catalogs |
//! | `/api/v1/auth/*` | bearer JWT | register, profile, PIN, saved address |
//! | `/api/v1/rentals`, `/my/tasks`, `/wallet/*`, `/wheel`, `/referrals/*` | bearer JWT | user operations |
//! | `/api/v1/admin/*` | admin role | settlement, catalogs, settings, audit |
//! | `/healthz`, `/readyz`, `/metrics` | public | probes and exposition |
//!
//! Handlers return explicit `(StatusCode, Json)` pairs; ledger errors map
//! to statuses in [`error_response`]. Every mutating route is backed by an
//! atomic ledger operation, so a timed-out request either committed or
//! didn't — clients refetch instead of assuming an abort.

pub(crate) mod middleware_auth;
mod routes_admin;
mod routes_auth;
mod routes_devices;
mod routes_health;
mod routes_referrals;
mod routes_tasks;
mod routes_wallet;

use crate::config::Config;
use crate::ledger::{LedgerError, TxType};
use crate::{db, mailer, prom_metrics};
use anyhow::Result;
use axum::extract::Request;
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use std::sync::Arc;
use std::time::Duration;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn, Instrument};
use uuid::Uuid;

pub struct AppState {
    pub db: db::Database,
    pub mailer: mailer::Mailer,
    pub prom_metrics: prom_metrics::Metrics,
    pub jwt_secret: Option<String>,
}

impl AppState {
    pub fn new(db: db::Database, config: &Config) -> Arc<Self> {
        Arc::new(AppState {
            db,
            mailer: mailer::Mailer::from_config(config),
            prom_metrics: prom_metrics::Metrics::new(),
            jwt_secret: config.jwt_secret.clone(),
        })
    }
}

/// Map a ledger error onto the HTTP taxonomy: 400 malformed input, 404
/// unknown entity, 409 "nothing to do" conflicts, 422 failed preconditions
/// (the message carries the numeric shortfall), 403 PIN failures, 500 for
/// storage errors.
pub(super) fn error_response(err: LedgerError) -> Response {
    let status = match &err {
        LedgerError::Validation { .. } => StatusCode::BAD_REQUEST,
        LedgerError::NotFound(_) => StatusCode::NOT_FOUND,
        LedgerError::AlreadyExists(_)
        | LedgerError::AlreadyClaimed
        | LedgerError::AlreadyProcessed
        | LedgerError::RenewalNotDue { .. } => StatusCode::CONFLICT,
        LedgerError::InsufficientBalance { .. }
        | LedgerError::InsufficientTcoin { .. }
        | LedgerError::BelowMinimum { .. }
        | LedgerError::WithdrawalBelowMinimum { .. }
        | LedgerError::InsufficientPower { .. }
        | LedgerError::LevelNotMet { .. }
        | LedgerError::NoSpinsRemaining
        | LedgerError::NotClaimableYet { .. }
        | LedgerError::Overflow => StatusCode::UNPROCESSABLE_ENTITY,
        LedgerError::PinNotSet | LedgerError::PinInvalid => StatusCode::FORBIDDEN,
        LedgerError::Database(e) => {
            tracing::error!(error = %e, "database error");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": "internal error"})),
            )
                .into_response();
        }
    };
    (status, Json(serde_json::json!({"error": err.to_string()}))).into_response()
}

/// Gate for value-moving routes: the payload must carry the user's
/// six-digit transaction PIN.
pub(super) async fn require_pin(
    state: &AppState,
    user_id: Uuid,
    pin: Option<&str>,
) -> std::result::Result<(), Response> {
    let Some(pin) = pin else {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "transaction PIN required"})),
        )
            .into_response());
    };
    state.db.verify_pin(user_id, pin).await.map_err(error_response)
}

pub(super) fn count_op(state: &AppState, tx_type: TxType) {
    state
        .prom_metrics
        .ledger_operations
        .get_or_create(&prom_metrics::TxTypeLabel {
            tx_type: tx_type.as_str().to_string(),
        })
        .inc();
}

/// Middleware that records HTTP request duration into the Prometheus histogram,
/// generates (or propagates) a request ID for correlation, and wraps the
/// request in a tracing span using `.instrument()` for proper async propagation.
async fn metrics_middleware(
    axum::extract::State(state): axum::extract::State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    let request_id = req
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let method = req.method().to_string();
    let raw_path = req.uri().path().to_string();
    let norm_path = normalize_path(&raw_path);
    let start = std::time::Instant::now();

    let span = tracing::info_span!(
        "request",
        request_id = %request_id,
        method = %method,
        path = %raw_path,
    );
    let mut response = next.run(req).instrument(span).await;

    let duration = start.elapsed().as_secs_f64();
    state
        .prom_metrics
        .http_request_duration
        .get_or_create(&prom_metrics::HttpLabel {
            method,
            path: norm_path,
        })
        .observe(duration);

    if let Ok(value) = request_id.parse() {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

/// Normalize URL path to collapse high-cardinality segments (UUIDs, numeric IDs)
/// into placeholders, preventing histogram label explosion.
fn normalize_path(path: &str) -> String {
    path.split('/')
        .map(|seg| {
            if seg.is_empty() {
                seg.to_string()
            } else if seg.chars().all(|c| c.is_ascii_digit()) {
                ":id".to_string()
            } else if seg.len() == 36 && seg.chars().filter(|c| *c == '-').count() == 4 {
                ":uuid".to_string()
            } else {
                seg.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Public catalogs
        .route("/api/v1/devices", get(routes_devices::handler_catalog))
        .route("/api/v1/tasks", get(routes_tasks::handler_catalog))
        .route("/api/v1/tasks/durations", get(routes_tasks::handler_durations))
        .route("/api/v1/levels", get(routes_referrals::handler_levels))
        .route(
            "/api/v1/announcements",
            get(routes_admin::handler_announcements),
        )
        // Account surface
        .route("/api/v1/auth/register", post(routes_auth::handler_register))
        .route("/api/v1/auth/me", get(routes_auth::handler_me))
        .route("/api/v1/auth/pin", post(routes_auth::handler_set_pin))
        .route(
            "/api/v1/auth/wallet-address",
            put(routes_auth::handler_set_wallet_address),
        )
        // Rentals
        .route(
            "/api/v1/devices/{id}/purchase",
            post(routes_devices::handler_purchase),
        )
        .route("/api/v1/rentals", get(routes_devices::handler_rentals))
        .route(
            "/api/v1/rentals/{id}/renew",
            post(routes_devices::handler_renew),
        )
        // Task runs
        .route("/api/v1/my/tasks", get(routes_tasks::handler_my_runs))
        .route("/api/v1/tasks/{id}/start", post(routes_tasks::handler_start))
        .route(
            "/api/v1/my/tasks/{id}/claim",
            post(routes_tasks::handler_claim),
        )
        // Wallet
        .route(
            "/api/v1/wallet/transactions",
            get(routes_wallet::handler_transactions),
        )
        .route(
            "/api/v1/wallet/deposit-address",
            get(routes_wallet::handler_deposit_address),
        )
        .route(
            "/api/v1/wallet/deposits",
            post(routes_wallet::handler_request_deposit),
        )
        .route(
            "/api/v1/wallet/withdrawals",
            post(routes_wallet::handler_request_withdrawal),
        )
        .route("/api/v1/wallet/convert", post(routes_wallet::handler_convert))
        .route("/api/v1/wheel", get(routes_wallet::handler_wheel_status))
        .route("/api/v1/wheel/spin", post(routes_wallet::handler_wheel_spin))
        // Referrals
        .route("/api/v1/referrals/team", get(routes_referrals::handler_team))
        // Admin: settlement and ledger
        .route(
            "/api/v1/admin/transactions",
            get(routes_wallet::handler_admin_transactions),
        )
        .route(
            "/api/v1/admin/transactions/{id}/approve",
            post(routes_wallet::handler_approve),
        )
        .route(
            "/api/v1/admin/transactions/{id}/reject",
            post(routes_wallet::handler_reject),
        )
        .route("/api/v1/admin/credits", post(routes_wallet::handler_credit))
        // Admin: catalogs
        .route(
            "/api/v1/admin/devices",
            get(routes_devices::handler_admin_list).post(routes_devices::handler_create),
        )
        .route(
            "/api/v1/admin/devices/{id}",
            put(routes_devices::handler_update),
        )
        .route(
            "/api/v1/admin/devices/{id}/gift",
            post(routes_devices::handler_gift),
        )
        .route(
            "/api/v1/admin/tasks",
            get(routes_tasks::handler_admin_list).post(routes_tasks::handler_create),
        )
        .route("/api/v1/admin/tasks/{id}", put(routes_tasks::handler_update))
        .route(
            "/api/v1/admin/durations",
            get(routes_tasks::handler_admin_durations).post(routes_tasks::handler_create_duration),
        )
        .route(
            "/api/v1/admin/durations/{id}",
            put(routes_tasks::handler_update_duration),
        )
        .route(
            "/api/v1/admin/levels/{level}",
            put(routes_referrals::handler_update_level),
        )
        .route(
            "/api/v1/admin/salaries/run",
            post(routes_referrals::handler_run_salaries),
        )
        // Admin: panel
        .route("/api/v1/admin/users", get(routes_admin::handler_users))
        .route("/api/v1/admin/overview", get(routes_admin::handler_overview))
        .route("/api/v1/admin/audit", get(routes_admin::handler_audit))
        .route("/api/v1/admin/settings", get(routes_admin::handler_settings))
        .route(
            "/api/v1/admin/settings/{key}",
            put(routes_admin::handler_set_setting),
        )
        .route(
            "/api/v1/admin/announcements",
            get(routes_admin::handler_admin_announcements)
                .post(routes_admin::handler_create_announcement),
        )
        .route(
            "/api/v1/admin/announcements/{id}",
            put(routes_admin::handler_update_announcement)
                .delete(routes_admin::handler_delete_announcement),
        )
        // Probes
        .route("/healthz", get(routes_health::handler_healthz))
        .route("/readyz", get(routes_health::handler_readyz))
        .route("/metrics", get(routes_health::handler_metrics))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(CatchPanicLayer::new())
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            metrics_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(1024 * 1024))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(30),
        ))
        .with_state(state)
}

pub async fn run(config: Config) -> Result<()> {
    let database = db::Database::connect(&config.database_url).await?;
    database.migrate().await?;
    let state = AppState::new(database, &config);
    let app = build_router(Arc::clone(&state));

    // Background task: sweep expired rentals, refresh gauges, hourly audit
    let sweep_state = Arc::clone(&state);
    tokio::spawn(async move {
        let mut sys = sysinfo::System::new();
        let mut interval = tokio::time::interval(Duration::from_secs(30));
        let mut last_audit = std::time::Instant::now() - Duration::from_secs(3600);
        loop {
            interval.tick().await;

            match sweep_state.db.sweep_expired_rentals().await {
                Ok(n) if n > 0 => info!(count = n, "expired rentals retired"),
                Err(e) => warn!(error = %e, "rental expiry sweep failed"),
                _ => {}
            }

            match sweep_state.db.overview_counts().await {
                Ok(c) => {
                    sweep_state.prom_metrics.users.set(c.users);
                    sweep_state.prom_metrics.active_task_runs.set(c.active_runs);
                    sweep_state
                        .prom_metrics
                        .claimable_task_runs
                        .set(c.claimable_runs);
                    sweep_state.prom_metrics.active_rentals.set(c.active_rentals);
                    sweep_state
                        .prom_metrics
                        .pending_deposits
                        .set(c.pending_deposits);
                    sweep_state
                        .prom_metrics
                        .pending_withdrawals
                        .set(c.pending_withdrawals);
                }
                Err(e) => warn!(error = %e, "failed to refresh overview gauges"),
            }

            sys.refresh_cpu_all();
            sys.refresh_memory();
            sweep_state
                .prom_metrics
                .cpu_usage_percent
                .set(sys.global_cpu_usage() as f64);
            let mem_pct = if sys.total_memory() > 0 {
                sys.used_memory() as f64 / sys.total_memory() as f64 * 100.0
            } else {
                0.0
            };
            sweep_state.prom_metrics.memory_usage_percent.set(mem_pct);

            let pool_size = sweep_state.db.pool().size();
            let pool_idle = sweep_state.db.pool().num_idle();
            sweep_state
                .prom_metrics
                .db_pool_active
                .set((pool_size as i64) - (pool_idle as i64));
            sweep_state.prom_metrics.db_pool_idle.set(pool_idle as i64);
            sweep_state.prom_metrics.db_pool_max.set(5); // matches PgPoolOptions::max_connections(5)

            if last_audit.elapsed() >= Duration::from_secs(3600) {
                last_audit = std::time::Instant::now();
                match sweep_state.db.audit_balances().await {
                    Ok(rows) => {
                        for r in &rows {
                            warn!(
                                user = %r.user_id,
                                drift_micros = r.drift_micros,
                                drift_tcoin = r.drift_tcoin,
                                "cached balance disagrees with ledger"
                            );
                        }
                        sweep_state
                            .prom_metrics
                            .ledger_drift_users
                            .set(rows.len() as i64);
                    }
                    Err(e) => warn!(error = %e, "ledger audit failed"),
                }
            }
        }
    });

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.port));
    info!(port = config.port, "hashvault api running");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("api shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! { _ = ctrl_c => info!("received SIGINT, shutting down"), _ = sigterm.recv() => info!("received SIGTERM, shutting down") }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("received SIGINT, shutting down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_path_preserves_api_routes() {
        assert_eq!(normalize_path("/api/v1/devices"), "/api/v1/devices");
        assert_eq!(normalize_path("/api/v1/wheel/spin"), "/api/v1/wheel/spin");
        assert_eq!(normalize_path("/metrics"), "/metrics");
    }

    #[test]
    fn normalize_path_collapses_numeric_ids() {
        assert_eq!(
            normalize_path("/api/v1/my/tasks/42/claim"),
            "/api/v1/my/tasks/:id/claim"
        );
        assert_eq!(
            normalize_path("/api/v1/devices/7/purchase"),
            "/api/v1/devices/:id/purchase"
        );
    }

    #[test]
    fn normalize_path_collapses_uuids() {
        assert_eq!(
            normalize_path("/api/v1/admin/users/550e8400-e29b-41d4-a716-446655440000"),
            "/api/v1/admin/users/:uuid"
        );
    }

    #[test]
    fn normalize_path_handles_empty_and_root() {
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(normalize_path(""), "");
    }
}
