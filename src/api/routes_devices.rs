//! Device catalog and rentals: browse, purchase, renew, plus admin CRUD and gifting.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use super::middleware_auth::{RequireAdmin, RequireAuth};
use super::{count_op, error_response, require_pin, AppState};
use crate::ledger::TxType;

/// `GET /api/v1/devices` — active catalog, cheapest first.
pub async fn handler_catalog(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.db.list_devices(false).await {
        Ok(devices) => Json(devices).into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct PinPayload {
    pub pin: Option<String>,
}

/// `POST /api/v1/devices/{id}/purchase` — buy a rental out of the wallet
/// balance. Debit, power credit, and referral cascade commit atomically.
pub async fn handler_purchase(
    State(state): State<Arc<AppState>>,
    RequireAuth(auth): RequireAuth,
    Path(device_id): Path<i64>,
    Json(payload): Json<PinPayload>,
) -> impl IntoResponse {
    if let Err(resp) = require_pin(&state, auth.user_id, payload.pin.as_deref()).await {
        return resp;
    }
    match state.db.purchase_device(auth.user_id, device_id).await {
        Ok(outcome) => {
            count_op(&state, TxType::Purchase);
            info!(
                user = %auth.user_id,
                device = device_id,
                rental = outcome.rental_id,
                power_ghs = outcome.power_ghs,
                "device purchased"
            );
            (StatusCode::CREATED, Json(outcome)).into_response()
        }
        Err(e) => error_response(e),
    }
}

/// `GET /api/v1/rentals` — the caller's rentals, newest first.
pub async fn handler_rentals(
    State(state): State<Arc<AppState>>,
    RequireAuth(auth): RequireAuth,
) -> impl IntoResponse {
    match state.db.list_user_devices(auth.user_id).await {
        Ok(rentals) => Json(rentals).into_response(),
        Err(e) => error_response(e),
    }
}

/// `POST /api/v1/rentals/{id}/renew` — extend a rental inside its renewal
/// window, re-activating it (and its power) if it had lapsed.
pub async fn handler_renew(
    State(state): State<Arc<AppState>>,
    RequireAuth(auth): RequireAuth,
    Path(rental_id): Path<i64>,
    Json(payload): Json<PinPayload>,
) -> impl IntoResponse {
    if let Err(resp) = require_pin(&state, auth.user_id, payload.pin.as_deref()).await {
        return resp;
    }
    match state.db.renew_rental(auth.user_id, rental_id).await {
        Ok(outcome) => {
            count_op(&state, TxType::RentalRenewal);
            info!(user = %auth.user_id, rental = rental_id, "rental renewed");
            Json(outcome).into_response()
        }
        Err(e) => error_response(e),
    }
}

// ── Admin ───────────────────────────────────────────────────────

/// `GET /api/v1/admin/devices` — full catalog including retired entries.
pub async fn handler_admin_list(
    State(state): State<Arc<AppState>>,
    RequireAdmin(_admin): RequireAdmin,
) -> impl IntoResponse {
    match state.db.list_devices(true).await {
        Ok(devices) => Json(devices).into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct DevicePayload {
    pub name: String,
    pub power_ghs: i64,
    pub price_micros: i64,
    pub rental_period_days: i32,
    #[serde(default)]
    pub is_promo: bool,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

/// `POST /api/v1/admin/devices`
pub async fn handler_create(
    State(state): State<Arc<AppState>>,
    RequireAdmin(admin): RequireAdmin,
    Json(payload): Json<DevicePayload>,
) -> impl IntoResponse {
    match state
        .db
        .create_device(
            &payload.name,
            payload.power_ghs,
            payload.price_micros,
            payload.rental_period_days,
            payload.is_promo,
            payload.is_active,
        )
        .await
    {
        Ok(device) => {
            info!(admin = %admin.user_id, device = device.id, name = %device.name, "device created");
            (StatusCode::CREATED, Json(device)).into_response()
        }
        Err(e) => error_response(e),
    }
}

/// `PUT /api/v1/admin/devices/{id}` — full replace.
pub async fn handler_update(
    State(state): State<Arc<AppState>>,
    RequireAdmin(admin): RequireAdmin,
    Path(device_id): Path<i64>,
    Json(payload): Json<DevicePayload>,
) -> impl IntoResponse {
    match state
        .db
        .update_device(
            device_id,
            &payload.name,
            payload.power_ghs,
            payload.price_micros,
            payload.rental_period_days,
            payload.is_promo,
            payload.is_active,
        )
        .await
    {
        Ok(device) => {
            info!(admin = %admin.user_id, device = device.id, "device updated");
            Json(device).into_response()
        }
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct GiftPayload {
    pub user_id: Uuid,
}

/// `POST /api/v1/admin/devices/{id}/gift` — grant a rental without charge.
/// No ledger row is written and no referral cascade fires.
pub async fn handler_gift(
    State(state): State<Arc<AppState>>,
    RequireAdmin(admin): RequireAdmin,
    Path(device_id): Path<i64>,
    Json(payload): Json<GiftPayload>,
) -> impl IntoResponse {
    match state.db.gift_device(payload.user_id, device_id).await {
        Ok(outcome) => {
            info!(
                admin = %admin.user_id,
                user = %payload.user_id,
                device = device_id,
                rental = outcome.rental_id,
                "device gifted"
            );
            (StatusCode::CREATED, Json(outcome)).into_response()
        }
        Err(e) => error_response(e),
    }
}
