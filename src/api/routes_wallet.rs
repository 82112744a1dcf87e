//! Wallet surface: transaction history, deposit/withdrawal requests, T-Coin
//! conversion, the fortune wheel, and admin settlement.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use super::middleware_auth::{RequireAdmin, RequireAuth};
use super::{count_op, error_response, require_pin, AppState};
use crate::db::{SettleOutcome, TxFilter};
use crate::ledger::{money, TxType};

/// `GET /api/v1/wallet/transactions` — the caller's ledger rows, newest
/// first, filterable by `tx_type` and `status`.
pub async fn handler_transactions(
    State(state): State<Arc<AppState>>,
    RequireAuth(auth): RequireAuth,
    Query(filter): Query<TxFilter>,
) -> impl IntoResponse {
    match state.db.list_transactions(auth.user_id, &filter).await {
        Ok(rows) => Json(rows).into_response(),
        Err(e) => error_response(e),
    }
}

/// `GET /api/v1/wallet/deposit-address` — the operator's receiving address.
pub async fn handler_deposit_address(
    State(state): State<Arc<AppState>>,
    RequireAuth(_auth): RequireAuth,
) -> impl IntoResponse {
    match state.db.get_setting("deposit_wallet_address").await {
        Ok(Some(address)) if !address.is_empty() => {
            Json(serde_json::json!({"address": address})).into_response()
        }
        Ok(_) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "deposit address not configured"})),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct DepositPayload {
    pub amount_micros: i64,
    /// On-chain transaction hash or memo, shown to the reviewing admin.
    pub reference: Option<String>,
}

/// `POST /api/v1/wallet/deposits` — declare an incoming transfer. The row
/// stays pending until an admin approves it; no balance moves here.
pub async fn handler_request_deposit(
    State(state): State<Arc<AppState>>,
    RequireAuth(auth): RequireAuth,
    Json(payload): Json<DepositPayload>,
) -> impl IntoResponse {
    match state
        .db
        .request_deposit(auth.user_id, payload.amount_micros, payload.reference.as_deref())
        .await
    {
        Ok(tx) => {
            info!(user = %auth.user_id, tx = tx.id, amount_micros = tx.amount_micros, "deposit requested");
            (StatusCode::CREATED, Json(tx)).into_response()
        }
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct WithdrawalPayload {
    pub amount_micros: i64,
    /// Destination; falls back to the profile's saved address.
    pub wallet_address: Option<String>,
    pub pin: Option<String>,
}

/// `POST /api/v1/wallet/withdrawals` — request a payout. The balance is
/// only debited when an admin approves, so a rejected request costs nothing.
pub async fn handler_request_withdrawal(
    State(state): State<Arc<AppState>>,
    RequireAuth(auth): RequireAuth,
    Json(payload): Json<WithdrawalPayload>,
) -> impl IntoResponse {
    if let Err(resp) = require_pin(&state, auth.user_id, payload.pin.as_deref()).await {
        return resp;
    }
    let address = match payload.wallet_address {
        Some(a) => a,
        None => match state.db.get_profile(auth.user_id).await {
            Ok(Some(profile)) => match profile.saved_wallet_address {
                Some(a) => a,
                None => {
                    return (
                        StatusCode::BAD_REQUEST,
                        Json(serde_json::json!({"error": "no wallet address given and none saved"})),
                    )
                        .into_response()
                }
            },
            Ok(None) => {
                return (
                    StatusCode::NOT_FOUND,
                    Json(serde_json::json!({"error": "profile not found, register first"})),
                )
                    .into_response()
            }
            Err(e) => return error_response(e),
        },
    };
    match state
        .db
        .request_withdrawal(auth.user_id, payload.amount_micros, &address)
        .await
    {
        Ok(tx) => {
            info!(user = %auth.user_id, tx = tx.id, amount_micros = tx.amount_micros, "withdrawal requested");
            (StatusCode::CREATED, Json(tx)).into_response()
        }
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct ConvertPayload {
    pub tcoin_amount: i64,
}

/// `POST /api/v1/wallet/convert` — exchange T-Coin for wallet USDC at the
/// configured rate.
pub async fn handler_convert(
    State(state): State<Arc<AppState>>,
    RequireAuth(auth): RequireAuth,
    Json(payload): Json<ConvertPayload>,
) -> impl IntoResponse {
    match state.db.convert_tcoin(auth.user_id, payload.tcoin_amount).await {
        Ok(outcome) => {
            count_op(&state, TxType::TcoinConversion);
            info!(
                user = %auth.user_id,
                tcoin = outcome.tcoin_spent,
                credited_micros = outcome.usdc_credited_micros,
                "T-Coin converted"
            );
            Json(outcome).into_response()
        }
        Err(e) => error_response(e),
    }
}

/// `GET /api/v1/wheel` — today's spin allowance and the prize table.
pub async fn handler_wheel_status(
    State(state): State<Arc<AppState>>,
    RequireAuth(auth): RequireAuth,
) -> impl IntoResponse {
    match state.db.wheel_status(auth.user_id).await {
        Ok(status) => Json(status).into_response(),
        Err(e) => error_response(e),
    }
}

/// `POST /api/v1/wheel/spin` — burn one daily spin for a weighted T-Coin prize.
pub async fn handler_wheel_spin(
    State(state): State<Arc<AppState>>,
    RequireAuth(auth): RequireAuth,
) -> impl IntoResponse {
    match state.db.spin_wheel(auth.user_id).await {
        Ok(outcome) => {
            info!(user = %auth.user_id, prize_tcoin = outcome.prize_tcoin, "wheel spun");
            Json(outcome).into_response()
        }
        Err(e) => error_response(e),
    }
}

// ── Admin settlement ────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct AdminTxQuery {
    pub user_id: Option<Uuid>,
    pub tx_type: Option<String>,
    pub status: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// `GET /api/v1/admin/transactions` — ledger rows across all users.
pub async fn handler_admin_transactions(
    State(state): State<Arc<AppState>>,
    RequireAdmin(_admin): RequireAdmin,
    Query(query): Query<AdminTxQuery>,
) -> impl IntoResponse {
    let filter = TxFilter {
        tx_type: query.tx_type,
        status: query.status,
        limit: query.limit,
        offset: query.offset,
    };
    match state.db.list_all_transactions(query.user_id, &filter).await {
        Ok(rows) => Json(rows).into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct ApprovePayload {
    /// Verified on-chain amount for deposits, when it differs from the claim.
    pub exact_amount_micros: Option<i64>,
}

/// `POST /api/v1/admin/transactions/{id}/approve` — settle a pending row.
/// Deposits credit on approval; withdrawals debit, and a balance shortfall
/// leaves the row pending. Replaying an approval is a no-op.
pub async fn handler_approve(
    State(state): State<Arc<AppState>>,
    RequireAdmin(admin): RequireAdmin,
    Path(tx_id): Path<i64>,
    payload: Option<Json<ApprovePayload>>,
) -> impl IntoResponse {
    let exact = payload.and_then(|Json(p)| p.exact_amount_micros);
    match state.db.approve_transaction(tx_id, exact).await {
        Ok(outcome) => {
            if let SettleOutcome::Applied {
                user_id,
                ref tx_type,
                amount_micros,
                ..
            } = outcome
            {
                if let Some(t) = TxType::parse(tx_type) {
                    count_op(&state, t);
                }
                info!(admin = %admin.user_id, tx = tx_id, tx_type = %tx_type, "transaction approved");
                notify_settlement(
                    &state,
                    user_id,
                    format!("{} approved", settlement_noun(tx_type)),
                    format!(
                        "Your {} of {} has been approved.",
                        settlement_noun(tx_type).to_lowercase(),
                        money::format_usdc(amount_micros),
                    ),
                );
            }
            Json(outcome).into_response()
        }
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct RejectPayload {
    pub reason: Option<String>,
}

/// `POST /api/v1/admin/transactions/{id}/reject` — decline a pending row.
/// Nothing was ever debited, so there is nothing to refund.
pub async fn handler_reject(
    State(state): State<Arc<AppState>>,
    RequireAdmin(admin): RequireAdmin,
    Path(tx_id): Path<i64>,
    payload: Option<Json<RejectPayload>>,
) -> impl IntoResponse {
    let reason = payload.and_then(|Json(p)| p.reason);
    match state.db.reject_transaction(tx_id, reason.as_deref()).await {
        Ok(outcome) => {
            if let SettleOutcome::Applied {
                user_id,
                ref tx_type,
                amount_micros,
                ..
            } = outcome
            {
                info!(admin = %admin.user_id, tx = tx_id, tx_type = %tx_type, "transaction rejected");
                let noun = settlement_noun(tx_type);
                notify_settlement(
                    &state,
                    user_id,
                    format!("{noun} rejected"),
                    match &reason {
                        Some(r) => format!(
                            "Your {} of {} was rejected: {r}",
                            noun.to_lowercase(),
                            money::format_usdc(amount_micros),
                        ),
                        None => format!(
                            "Your {} of {} was rejected.",
                            noun.to_lowercase(),
                            money::format_usdc(amount_micros),
                        ),
                    },
                );
            }
            Json(outcome).into_response()
        }
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct CreditPayload {
    pub user_id: Uuid,
    pub amount_micros: i64,
    pub notes: Option<String>,
}

/// `POST /api/v1/admin/credits` — manual balance adjustment, recorded in the
/// ledger like any other movement.
pub async fn handler_credit(
    State(state): State<Arc<AppState>>,
    RequireAdmin(admin): RequireAdmin,
    Json(payload): Json<CreditPayload>,
) -> impl IntoResponse {
    match state
        .db
        .admin_credit(payload.user_id, payload.amount_micros, payload.notes.as_deref())
        .await
    {
        Ok(outcome) => {
            count_op(&state, TxType::AdminCredit);
            info!(
                admin = %admin.user_id,
                user = %payload.user_id,
                tx = outcome.tx_id,
                amount_micros = payload.amount_micros,
                "manual credit applied"
            );
            (StatusCode::CREATED, Json(outcome)).into_response()
        }
        Err(e) => error_response(e),
    }
}

fn settlement_noun(tx_type: &str) -> &'static str {
    match tx_type {
        "deposit" => "Deposit",
        "withdrawal" => "Withdrawal",
        _ => "Transaction",
    }
}

/// Fire-and-forget settlement mail; the ledger outcome never depends on it.
fn notify_settlement(state: &Arc<AppState>, user_id: Uuid, subject: String, body: String) {
    let db = state.db.clone();
    let mailer = state.mailer.clone();
    tokio::spawn(async move {
        match db.get_profile(user_id).await {
            Ok(Some(profile)) => mailer.send(&profile.email, &subject, &body).await,
            Ok(None) => {}
            Err(e) => tracing::debug!(error = %e, "settlement mail skipped"),
        }
    });
}
