//! Account surface: registration, profile, transaction PIN, saved payout address.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

use super::middleware_auth::RequireAuth;
use super::{error_response, require_pin, AppState};

#[derive(Debug, Deserialize)]
pub struct RegisterPayload {
    pub email: String,
    /// Referral code of the inviter, if the user arrived through an invite link.
    pub referral_code: Option<String>,
}

/// `POST /api/v1/auth/register` — create the ledger profile for an
/// authenticated identity. Idempotence is a conflict: a second call 409s.
pub async fn handler_register(
    State(state): State<Arc<AppState>>,
    RequireAuth(auth): RequireAuth,
    Json(payload): Json<RegisterPayload>,
) -> impl IntoResponse {
    match state
        .db
        .register_user(auth.user_id, &payload.email, payload.referral_code.as_deref())
        .await
    {
        Ok(profile) => {
            info!(user = %auth.user_id, invited = profile.invited_by.is_some(), "user registered");
            (StatusCode::CREATED, Json(profile)).into_response()
        }
        Err(e) => error_response(e),
    }
}

/// `GET /api/v1/auth/me` — the caller's profile with cached balances.
pub async fn handler_me(
    State(state): State<Arc<AppState>>,
    RequireAuth(auth): RequireAuth,
) -> impl IntoResponse {
    match state.db.get_profile(auth.user_id).await {
        Ok(Some(profile)) => Json(profile).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "profile not found, register first"})),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct SetPinPayload {
    pub pin: String,
    /// Required when a PIN is already set.
    pub current_pin: Option<String>,
}

/// `POST /api/v1/auth/pin` — set or rotate the six-digit transaction PIN.
pub async fn handler_set_pin(
    State(state): State<Arc<AppState>>,
    RequireAuth(auth): RequireAuth,
    Json(payload): Json<SetPinPayload>,
) -> impl IntoResponse {
    match state
        .db
        .set_pin(auth.user_id, &payload.pin, payload.current_pin.as_deref())
        .await
    {
        Ok(()) => {
            info!(user = %auth.user_id, "transaction PIN updated");
            Json(serde_json::json!({"ok": true})).into_response()
        }
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct WalletAddressPayload {
    pub wallet_address: String,
    pub pin: Option<String>,
}

/// `PUT /api/v1/auth/wallet-address` — save the default withdrawal address.
/// PIN-gated since it redirects future payouts.
pub async fn handler_set_wallet_address(
    State(state): State<Arc<AppState>>,
    RequireAuth(auth): RequireAuth,
    Json(payload): Json<WalletAddressPayload>,
) -> impl IntoResponse {
    if let Err(resp) = require_pin(&state, auth.user_id, payload.pin.as_deref()).await {
        return resp;
    }
    match state
        .db
        .set_saved_wallet_address(auth.user_id, &payload.wallet_address)
        .await
    {
        Ok(()) => {
            info!(user = %auth.user_id, "saved wallet address updated");
            Json(serde_json::json!({"ok": true})).into_response()
        }
        Err(e) => error_response(e),
    }
}
