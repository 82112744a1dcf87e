//! Referral program surface: team overview, level ladder, and the admin
//! salary run.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{Datelike, NaiveDate, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

use super::middleware_auth::{RequireAdmin, RequireAuth};
use super::{error_response, AppState};
use crate::ledger::ReferralLevel;

/// `GET /api/v1/referrals/team` — invite code, direct referrals, team power,
/// and lifetime referral earnings for the caller.
pub async fn handler_team(
    State(state): State<Arc<AppState>>,
    RequireAuth(auth): RequireAuth,
) -> impl IntoResponse {
    match state.db.team_overview(auth.user_id).await {
        Ok(overview) => Json(overview).into_response(),
        Err(e) => error_response(e),
    }
}

/// `GET /api/v1/levels` — the level ladder with thresholds and salaries.
/// Public so the app can render the progression screen pre-login.
pub async fn handler_levels(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.db.list_levels().await {
        Ok(levels) => Json(levels).into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct LevelPayload {
    pub min_direct_referrals: i64,
    pub min_team_power_ghs: i64,
    pub monthly_salary_micros: i64,
}

/// `PUT /api/v1/admin/levels/{level}` — retune ladder thresholds. Existing
/// promotions are never revoked; new thresholds apply to future recomputes.
pub async fn handler_update_level(
    State(state): State<Arc<AppState>>,
    RequireAdmin(admin): RequireAdmin,
    Path(level): Path<String>,
    Json(payload): Json<LevelPayload>,
) -> impl IntoResponse {
    let Some(level) = ReferralLevel::parse(&level) else {
        return (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "unknown referral level"})),
        )
            .into_response();
    };
    match state
        .db
        .update_level(
            level,
            payload.min_direct_referrals,
            payload.min_team_power_ghs,
            payload.monthly_salary_micros,
        )
        .await
    {
        Ok(row) => {
            info!(admin = %admin.user_id, level = %row.level, "referral level updated");
            Json(row).into_response()
        }
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct SalaryRunPayload {
    /// Target month as `YYYY-MM`; defaults to the current month.
    pub month: Option<String>,
}

/// `POST /api/v1/admin/salaries/run` — pay monthly referral salaries to every
/// eligible user. Safe to re-run: each user is paid at most once per month.
pub async fn handler_run_salaries(
    State(state): State<Arc<AppState>>,
    RequireAdmin(admin): RequireAdmin,
    payload: Option<Json<SalaryRunPayload>>,
) -> impl IntoResponse {
    let month = match payload.and_then(|Json(p)| p.month) {
        Some(raw) => match NaiveDate::parse_from_str(&format!("{raw}-01"), "%Y-%m-%d") {
            Ok(d) => d,
            Err(_) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(serde_json::json!({"error": "month must be formatted YYYY-MM"})),
                )
                    .into_response()
            }
        },
        None => {
            let today = Utc::now().date_naive();
            today.with_day(1).unwrap_or(today)
        }
    };
    match state.db.pay_monthly_salaries(month).await {
        Ok(report) => {
            info!(
                admin = %admin.user_id,
                month = %report.month,
                paid = report.paid,
                skipped = report.skipped,
                total_micros = report.total_micros,
                "salary run finished"
            );
            Json(report).into_response()
        }
        Err(e) => error_response(e),
    }
}
