//! Admin panel surface: user directory, operational overview, ledger audit,
//! runtime settings, and announcements.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

use super::middleware_auth::RequireAdmin;
use super::{error_response, AppState};

#[derive(Debug, Deserialize, Default)]
pub struct PageQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// `GET /api/v1/admin/users` — newest profiles first, with the total count
/// for pagination.
pub async fn handler_users(
    State(state): State<Arc<AppState>>,
    RequireAdmin(_admin): RequireAdmin,
    Query(page): Query<PageQuery>,
) -> impl IntoResponse {
    let limit = page.limit.unwrap_or(50);
    let offset = page.offset.unwrap_or(0);
    let users = match state.db.list_users(limit, offset).await {
        Ok(u) => u,
        Err(e) => return error_response(e),
    };
    match state.db.count_users().await {
        Ok(total) => Json(serde_json::json!({"users": users, "total": total})).into_response(),
        Err(e) => error_response(e),
    }
}

/// `GET /api/v1/admin/overview` — the counters behind the admin dashboard
/// (also exported as Prometheus gauges by the background loop).
pub async fn handler_overview(
    State(state): State<Arc<AppState>>,
    RequireAdmin(_admin): RequireAdmin,
) -> impl IntoResponse {
    match state.db.overview_counts().await {
        Ok(counts) => Json(counts).into_response(),
        Err(e) => error_response(e),
    }
}

/// `GET /api/v1/admin/audit` — recompute every user's balances from the
/// ledger and report rows whose cached projections drifted. Empty is healthy.
pub async fn handler_audit(
    State(state): State<Arc<AppState>>,
    RequireAdmin(_admin): RequireAdmin,
) -> impl IntoResponse {
    match state.db.audit_balances().await {
        Ok(rows) => Json(serde_json::json!({"drifted": rows.len(), "rows": rows})).into_response(),
        Err(e) => error_response(e),
    }
}

/// `GET /api/v1/admin/settings`
pub async fn handler_settings(
    State(state): State<Arc<AppState>>,
    RequireAdmin(_admin): RequireAdmin,
) -> impl IntoResponse {
    match state.db.list_settings().await {
        Ok(rows) => Json(rows).into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct SettingPayload {
    pub value: String,
}

/// `PUT /api/v1/admin/settings/{key}` — upsert one known setting. Unknown
/// keys and malformed values are rejected before touching the table.
pub async fn handler_set_setting(
    State(state): State<Arc<AppState>>,
    RequireAdmin(admin): RequireAdmin,
    Path(key): Path<String>,
    Json(payload): Json<SettingPayload>,
) -> impl IntoResponse {
    match state.db.set_setting(&key, &payload.value).await {
        Ok(row) => {
            info!(admin = %admin.user_id, key = %row.key, value = %row.value, "setting updated");
            Json(row).into_response()
        }
        Err(e) => error_response(e),
    }
}

// ── Announcements ───────────────────────────────────────────────

/// `GET /api/v1/announcements` — active announcements for the app banner.
pub async fn handler_announcements(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.db.list_announcements(false).await {
        Ok(rows) => Json(rows).into_response(),
        Err(e) => error_response(e),
    }
}

/// `GET /api/v1/admin/announcements` — all announcements including hidden ones.
pub async fn handler_admin_announcements(
    State(state): State<Arc<AppState>>,
    RequireAdmin(_admin): RequireAdmin,
) -> impl IntoResponse {
    match state.db.list_announcements(true).await {
        Ok(rows) => Json(rows).into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct AnnouncementPayload {
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

/// `POST /api/v1/admin/announcements`
pub async fn handler_create_announcement(
    State(state): State<Arc<AppState>>,
    RequireAdmin(admin): RequireAdmin,
    Json(payload): Json<AnnouncementPayload>,
) -> impl IntoResponse {
    match state
        .db
        .create_announcement(&payload.title, &payload.body)
        .await
    {
        Ok(row) => {
            info!(admin = %admin.user_id, announcement = row.id, "announcement created");
            (StatusCode::CREATED, Json(row)).into_response()
        }
        Err(e) => error_response(e),
    }
}

/// `PUT /api/v1/admin/announcements/{id}`
pub async fn handler_update_announcement(
    State(state): State<Arc<AppState>>,
    RequireAdmin(admin): RequireAdmin,
    Path(id): Path<i64>,
    Json(payload): Json<AnnouncementPayload>,
) -> impl IntoResponse {
    match state
        .db
        .update_announcement(id, &payload.title, &payload.body, payload.is_active)
        .await
    {
        Ok(row) => {
            info!(admin = %admin.user_id, announcement = row.id, "announcement updated");
            Json(row).into_response()
        }
        Err(e) => error_response(e),
    }
}

/// `DELETE /api/v1/admin/announcements/{id}`
pub async fn handler_delete_announcement(
    State(state): State<Arc<AppState>>,
    RequireAdmin(admin): RequireAdmin,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    match state.db.delete_announcement(id).await {
        Ok(()) => {
            info!(admin = %admin.user_id, announcement = id, "announcement deleted");
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => error_response(e),
    }
}
