//! Task catalog and runs: browse, start, claim, plus admin CRUD for tasks
//! and duration plans.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

use super::middleware_auth::{RequireAdmin, RequireAuth};
use super::{count_op, error_response, AppState};
use crate::ledger::{self, RunStatus, TxType};

/// `GET /api/v1/tasks` — active tasks.
pub async fn handler_catalog(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.db.list_tasks(false).await {
        Ok(tasks) => Json(tasks).into_response(),
        Err(e) => error_response(e),
    }
}

/// `GET /api/v1/tasks/durations` — active duration plans, shortest first.
pub async fn handler_durations(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.db.list_durations(false).await {
        Ok(durations) => Json(durations).into_response(),
        Err(e) => error_response(e),
    }
}

/// `GET /api/v1/my/tasks` — the caller's runs, each annotated with a
/// `claimable` flag derived from status and elapsed time.
pub async fn handler_my_runs(
    State(state): State<Arc<AppState>>,
    RequireAuth(auth): RequireAuth,
) -> impl IntoResponse {
    match state.db.list_user_tasks(auth.user_id).await {
        Ok(runs) => {
            let now = Utc::now();
            let annotated: Vec<serde_json::Value> = runs
                .into_iter()
                .map(|run| {
                    let claimable = RunStatus::parse(&run.status)
                        .map(|s| ledger::is_claimable(s, run.ends_at, now))
                        .unwrap_or(false);
                    let mut v = serde_json::json!(run);
                    v["claimable"] = serde_json::json!(claimable);
                    v
                })
                .collect();
            Json(annotated).into_response()
        }
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct StartPayload {
    pub duration_id: i64,
}

/// `POST /api/v1/tasks/{id}/start` — commit idle power to a task run.
/// The duration's bonus percent is frozen into the run at start.
pub async fn handler_start(
    State(state): State<Arc<AppState>>,
    RequireAuth(auth): RequireAuth,
    Path(task_id): Path<i64>,
    Json(payload): Json<StartPayload>,
) -> impl IntoResponse {
    match state
        .db
        .start_task(auth.user_id, task_id, payload.duration_id)
        .await
    {
        Ok(run) => {
            info!(
                user = %auth.user_id,
                task = task_id,
                run = run.id,
                days = run.duration_days,
                "task run started"
            );
            (StatusCode::CREATED, Json(run)).into_response()
        }
        Err(e) => error_response(e),
    }
}

/// `POST /api/v1/my/tasks/{id}/claim` — settle a finished run exactly once.
/// Earnings are computed at claim time and credited with the referral cascade.
pub async fn handler_claim(
    State(state): State<Arc<AppState>>,
    RequireAuth(auth): RequireAuth,
    Path(run_id): Path<i64>,
) -> impl IntoResponse {
    match state.db.claim_task(auth.user_id, run_id).await {
        Ok(outcome) => {
            count_op(&state, TxType::TaskEarning);
            info!(
                user = %auth.user_id,
                run = run_id,
                earnings_micros = outcome.earnings_micros,
                "task earnings claimed"
            );
            Json(outcome).into_response()
        }
        Err(e) => error_response(e),
    }
}

// ── Admin ───────────────────────────────────────────────────────

/// `GET /api/v1/admin/tasks` — all tasks including retired ones.
pub async fn handler_admin_list(
    State(state): State<Arc<AppState>>,
    RequireAdmin(_admin): RequireAdmin,
) -> impl IntoResponse {
    match state.db.list_tasks(true).await {
        Ok(tasks) => Json(tasks).into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct TaskPayload {
    pub name: String,
    #[serde(default = "default_region")]
    pub region: String,
    pub min_power_ghs: i64,
    pub base_daily_reward_micros: i64,
    pub min_referral_level: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_region() -> String {
    "global".to_string()
}

fn default_true() -> bool {
    true
}

/// `POST /api/v1/admin/tasks`
pub async fn handler_create(
    State(state): State<Arc<AppState>>,
    RequireAdmin(admin): RequireAdmin,
    Json(payload): Json<TaskPayload>,
) -> impl IntoResponse {
    match state
        .db
        .create_task(
            &payload.name,
            &payload.region,
            payload.min_power_ghs,
            payload.base_daily_reward_micros,
            payload.min_referral_level.as_deref(),
            payload.is_active,
        )
        .await
    {
        Ok(task) => {
            info!(admin = %admin.user_id, task = task.id, name = %task.name, "task created");
            (StatusCode::CREATED, Json(task)).into_response()
        }
        Err(e) => error_response(e),
    }
}

/// `PUT /api/v1/admin/tasks/{id}` — full replace. Running tasks keep the
/// terms frozen at start; edits only affect future runs.
pub async fn handler_update(
    State(state): State<Arc<AppState>>,
    RequireAdmin(admin): RequireAdmin,
    Path(task_id): Path<i64>,
    Json(payload): Json<TaskPayload>,
) -> impl IntoResponse {
    match state
        .db
        .update_task(
            task_id,
            &payload.name,
            &payload.region,
            payload.min_power_ghs,
            payload.base_daily_reward_micros,
            payload.min_referral_level.as_deref(),
            payload.is_active,
        )
        .await
    {
        Ok(task) => {
            info!(admin = %admin.user_id, task = task.id, "task updated");
            Json(task).into_response()
        }
        Err(e) => error_response(e),
    }
}

/// `GET /api/v1/admin/durations`
pub async fn handler_admin_durations(
    State(state): State<Arc<AppState>>,
    RequireAdmin(_admin): RequireAdmin,
) -> impl IntoResponse {
    match state.db.list_durations(true).await {
        Ok(durations) => Json(durations).into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct DurationPayload {
    pub days: i32,
    pub bonus_percent: i32,
    #[serde(default)]
    pub is_promo: bool,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

/// `POST /api/v1/admin/durations`
pub async fn handler_create_duration(
    State(state): State<Arc<AppState>>,
    RequireAdmin(admin): RequireAdmin,
    Json(payload): Json<DurationPayload>,
) -> impl IntoResponse {
    match state
        .db
        .create_duration(
            payload.days,
            payload.bonus_percent,
            payload.is_promo,
            payload.is_active,
        )
        .await
    {
        Ok(duration) => {
            info!(admin = %admin.user_id, duration = duration.id, days = duration.days, "duration plan created");
            (StatusCode::CREATED, Json(duration)).into_response()
        }
        Err(e) => error_response(e),
    }
}

/// `PUT /api/v1/admin/durations/{id}`
pub async fn handler_update_duration(
    State(state): State<Arc<AppState>>,
    RequireAdmin(admin): RequireAdmin,
    Path(duration_id): Path<i64>,
    Json(payload): Json<DurationPayload>,
) -> impl IntoResponse {
    match state
        .db
        .update_duration(
            duration_id,
            payload.days,
            payload.bonus_percent,
            payload.is_promo,
            payload.is_active,
        )
        .await
    {
        Ok(duration) => {
            info!(admin = %admin.user_id, duration = duration.id, "duration plan updated");
            Json(duration).into_response()
        }
        Err(e) => error_response(e),
    }
}
