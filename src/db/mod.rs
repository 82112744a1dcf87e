//! # Database — PostgreSQL Storage Layer
//!
//! Async storage operations for the rewards ledger via `sqlx::PgPool`
//! connecting to Supabase PostgreSQL.
//!
//! ## Schema
//!
//! - `profiles`: account row with cached wallet/T-Coin/hashrate projections
//! - `devices`, `tasks`, `task_durations`: admin-managed catalogs
//! - `user_devices`: rentals with expiry timestamps
//! - `user_tasks`: task runs (processing → completed, claimable is derived)
//! - `transactions`: append-only money movements, the source of truth
//! - `wheel_spins`: fortune-wheel draws, the T-Coin source of truth
//! - `referral_levels`, `app_settings`, `announcements`: configuration
//!
//! ## Module Structure
//!
//! Operations are split into submodules by domain:
//!
//! - [`users`] — registration, profiles, transaction PINs
//! - [`devices`] — catalog CRUD, purchase, gifting, renewal, expiry sweep
//! - [`tasks`] — catalog CRUD, starting runs, the claim operation
//! - [`wallet`] — deposits, withdrawals, admin settlement, balance audit
//! - [`tcoin`] — T-Coin conversion and the fortune wheel
//! - [`referrals`] — depth-2 bonus cascades, levels, monthly salaries
//! - [`settings`] — typed access to `app_settings`
//! - [`announcements`] — operator announcements
//!
//! ## Consistency Rules
//!
//! Every multi-step mutation runs inside a single SQL transaction, and
//! operations that read a balance before deciding take the profile row
//! `FOR UPDATE` first. Single-statement credits and debits rely on
//! conditional `UPDATE ... WHERE` guards instead, so a cached balance can
//! never go negative even under concurrent load.

mod announcements;
mod devices;
mod referrals;
mod settings;
mod tasks;
mod tcoin;
mod users;
mod wallet;

pub use referrals::CascadeTrigger;

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use uuid::Uuid;

// ── Profile types ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ProfileRow {
    pub user_id: Uuid,
    pub email: String,
    pub role: String,
    pub referral_code: String,
    pub invited_by: Option<Uuid>,
    pub referral_level: String,
    pub wallet_balance_micros: i64,
    pub tcoin_balance: i64,
    pub total_power_ghs: i64,
    pub total_earnings_micros: i64,
    pub saved_wallet_address: Option<String>,
    pub has_pin: bool,
    pub created_at: DateTime<Utc>,
}

/// Profile snapshot taken under `FOR UPDATE` at the start of a multi-step
/// mutation. Holding the row lock serializes every balance-affecting
/// operation for one user.
#[derive(sqlx::FromRow)]
pub(crate) struct ProfileLock {
    pub invited_by: Option<Uuid>,
    pub referral_level: String,
    pub tcoin_balance: i64,
    pub total_power_ghs: i64,
}

// ── Catalog types ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct DeviceRow {
    pub id: i64,
    pub name: String,
    pub power_ghs: i64,
    pub price_micros: i64,
    pub rental_period_days: i32,
    pub is_promo: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct TaskRow {
    pub id: i64,
    pub name: String,
    pub region: String,
    pub min_power_ghs: i64,
    pub base_daily_reward_micros: i64,
    pub min_referral_level: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct TaskDurationRow {
    pub id: i64,
    pub days: i32,
    pub bonus_percent: i32,
    pub is_promo: bool,
    pub is_active: bool,
}

// ── Rental and task-run types ───────────────────────────────────

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct UserDeviceRow {
    pub id: i64,
    pub user_id: Uuid,
    pub device_id: i64,
    pub device_name: String,
    pub power_ghs: i64,
    pub status: String,
    pub is_rental_active: bool,
    pub gifted: bool,
    pub purchased_at: DateTime<Utc>,
    pub rental_expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct UserTaskRow {
    pub id: i64,
    pub user_id: Uuid,
    pub task_id: i64,
    pub task_name: String,
    pub duration_days: i32,
    pub bonus_percent: i32,
    pub status: String,
    pub earnings_micros: Option<i64>,
    pub started_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
}

// ── Ledger types ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct TransactionRow {
    pub id: i64,
    pub user_id: Uuid,
    pub tx_type: String,
    pub status: String,
    pub amount_micros: i64,
    pub exact_amount_micros: Option<i64>,
    pub tcoin_amount: Option<i64>,
    pub wallet_address: Option<String>,
    pub notes: Option<String>,
    pub salary_month: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct TxFilter {
    pub tx_type: Option<String>,
    pub status: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl TxFilter {
    pub(crate) fn clamped_limit(&self) -> i64 {
        self.limit.unwrap_or(50).clamp(1, 200)
    }

    pub(crate) fn clamped_offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }
}

/// Result of an admin settlement (approve/reject). A replay of the same
/// decision reports `AlreadyFinal` instead of failing, so retried webhooks
/// and double-clicked buttons stay harmless.
#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum SettleOutcome {
    Applied {
        tx_id: i64,
        user_id: Uuid,
        tx_type: String,
        amount_micros: i64,
        new_balance_micros: Option<i64>,
    },
    AlreadyFinal {
        tx_id: i64,
        status: String,
    },
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct AuditRow {
    pub user_id: Uuid,
    pub email: String,
    pub cached_micros: i64,
    pub ledger_micros: i64,
    pub drift_micros: i64,
    pub cached_tcoin: i64,
    pub ledger_tcoin: i64,
    pub drift_tcoin: i64,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct OverviewCounts {
    pub users: i64,
    pub active_runs: i64,
    pub claimable_runs: i64,
    pub active_rentals: i64,
    pub pending_deposits: i64,
    pub pending_withdrawals: i64,
}

// ── Operation outcomes ──────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct PurchaseOutcome {
    pub rental_id: i64,
    pub tx_id: i64,
    pub power_ghs: i64,
    pub new_balance_micros: i64,
    pub rental_expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct GiftOutcome {
    pub rental_id: i64,
    pub power_ghs: i64,
    pub rental_expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct RenewOutcome {
    pub rental_id: i64,
    pub tx_id: i64,
    pub new_balance_micros: i64,
    pub rental_expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ClaimOutcome {
    pub earnings_micros: i64,
    pub tx_id: i64,
    pub new_balance_micros: i64,
}

#[derive(Debug, Serialize)]
pub struct CreditOutcome {
    pub tx_id: i64,
    pub new_balance_micros: i64,
}

#[derive(Debug, Serialize)]
pub struct ConvertOutcome {
    pub tcoin_spent: i64,
    pub usdc_credited_micros: i64,
    pub new_tcoin_balance: i64,
    pub new_balance_micros: i64,
}

#[derive(Debug, Serialize)]
pub struct SpinOutcome {
    pub prize_tcoin: i64,
    pub spins_remaining: i64,
    pub new_tcoin_balance: i64,
}

#[derive(Debug, Serialize)]
pub struct WheelStatus {
    pub spins_today: i64,
    pub spins_allowed: i64,
    pub spins_remaining: i64,
    pub prizes: Vec<crate::ledger::wheel::WheelPrize>,
}

// ── Referral types ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct LevelRow {
    pub level: String,
    pub rank: i32,
    pub min_direct_referrals: i64,
    pub min_team_power_ghs: i64,
    pub monthly_salary_micros: i64,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct TeamMemberRow {
    pub user_id: Uuid,
    pub email: String,
    pub referral_level: String,
    pub total_power_ghs: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct TeamOverview {
    pub referral_code: String,
    pub referral_level: String,
    pub direct_count: i64,
    pub team_power_ghs: i64,
    pub referral_earnings_micros: i64,
    pub members: Vec<TeamMemberRow>,
}

#[derive(Debug, Serialize)]
pub struct CascadePayout {
    pub inviter: Uuid,
    pub depth: u8,
    pub bonus_micros: i64,
    pub tx_id: i64,
}

#[derive(Debug, Serialize)]
pub struct SalaryRunReport {
    pub month: NaiveDate,
    pub paid: i64,
    pub skipped: i64,
    pub total_micros: i64,
}

// ── Misc types ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct SettingRow {
    pub key: String,
    pub value: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AnnouncementRow {
    pub id: i64,
    pub title: String,
    pub body: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

// ── Database handle ─────────────────────────────────────────────

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connect to PostgreSQL using the provided database URL.
    ///
    /// Manually parses the URL to preserve the full username — sqlx's built-in
    /// parser strips the ".project-ref" suffix that Supabase pooler requires.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let url = url::Url::parse(database_url)?;
        let username = urlencoding::decode(url.username())?.into_owned();
        let password = url
            .password()
            .map(|p| urlencoding::decode(p).map(|s| s.into_owned()))
            .transpose()?;
        let mut opts = PgConnectOptions::new()
            .host(url.host_str().unwrap_or("localhost"))
            .port(url.port().unwrap_or(5432))
            .database(url.path().trim_start_matches('/'))
            .username(&username)
            .statement_cache_capacity(0);
        if let Some(ref pw) = password {
            opts = opts.password(pw);
        }
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect_with(opts)
            .await?;
        Ok(Database { pool })
    }

    /// Get a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply any unapplied migrations from the embedded `migrations/` set.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Health check: execute `SELECT 1` to verify database connectivity.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tx_filter_clamps_pagination() {
        let wide = TxFilter {
            limit: Some(10_000),
            offset: Some(-5),
            ..Default::default()
        };
        assert_eq!(wide.clamped_limit(), 200);
        assert_eq!(wide.clamped_offset(), 0);

        let default = TxFilter::default();
        assert_eq!(default.clamped_limit(), 50);
        assert_eq!(default.clamped_offset(), 0);
    }
}
