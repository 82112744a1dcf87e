//! T-Coin: the fortune wheel that mints it and the conversion that turns
//! it into wallet USDC.
//!
//! Spin allowance resets at UTC midnight; the count of today's spins is
//! derived from `wheel_spins` rows, never cached.

use super::users::lock_profile;
use super::wallet::{post_completed, Posting};
use super::{ConvertOutcome, Database, SpinOutcome, WheelStatus};
use crate::ledger::{money, wheel, LedgerError, Result, TxType};
use rand::rngs::OsRng;
use tracing::info;
use uuid::Uuid;

impl Database {
    /// Convert T-Coin to wallet USDC at the configured rate. The whole
    /// requested amount converts or nothing does.
    pub async fn convert_tcoin(&self, user_id: Uuid, tcoin_amount: i64) -> Result<ConvertOutcome> {
        if tcoin_amount <= 0 {
            return Err(LedgerError::validation("tcoin_amount", "must be positive"));
        }
        let mut tx = self.pool.begin().await?;
        let profile = lock_profile(&mut tx, user_id).await?;
        let minimum = super::settings::setting_i64(&mut *tx, "tcoin_min_conversion", 100).await?;
        let rate = super::settings::setting_i64(&mut *tx, "tcoin_per_usdc", 100).await?;
        if tcoin_amount < minimum {
            return Err(LedgerError::BelowMinimum {
                amount: tcoin_amount,
                minimum,
            });
        }
        if profile.tcoin_balance < tcoin_amount {
            return Err(LedgerError::InsufficientTcoin {
                required: tcoin_amount,
                available: profile.tcoin_balance,
            });
        }
        let usdc_micros = money::tcoin_to_micros(tcoin_amount, rate)?;

        let new_tcoin_balance: i64 = sqlx::query_scalar(
            "UPDATE profiles SET tcoin_balance = tcoin_balance - $2, updated_at = NOW() \
             WHERE user_id = $1 AND tcoin_balance >= $2 RETURNING tcoin_balance",
        )
        .bind(user_id)
        .bind(tcoin_amount)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(LedgerError::InsufficientTcoin {
            required: tcoin_amount,
            available: profile.tcoin_balance,
        })?;

        let notes = format!("converted {tcoin_amount} T-Coin");
        let (_, new_balance_micros) = post_completed(
            &mut tx,
            Posting::new(user_id, TxType::TcoinConversion, usdc_micros)
                .tcoin(tcoin_amount)
                .notes(&notes),
        )
        .await?;
        tx.commit().await?;
        info!(user = %user_id, tcoin = tcoin_amount, usdc_micros, "tcoin converted");
        Ok(ConvertOutcome {
            tcoin_spent: tcoin_amount,
            usdc_credited_micros: usdc_micros,
            new_tcoin_balance,
            new_balance_micros,
        })
    }

    /// Spend one of today's spins on a weighted prize draw. The profile
    /// lock serializes concurrent spins so the daily allowance cannot be
    /// overdrawn by racing requests.
    pub async fn spin_wheel(&self, user_id: Uuid) -> Result<SpinOutcome> {
        let mut tx = self.pool.begin().await?;
        lock_profile(&mut tx, user_id).await?;
        let allowed = super::settings::setting_i64(&mut *tx, "wheel_daily_spins", 3).await?;
        let spins_today: i64 = sqlx::query_scalar(
            "SELECT COUNT(*)::BIGINT FROM wheel_spins \
             WHERE user_id = $1 AND spun_at >= date_trunc('day', NOW())",
        )
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;
        if spins_today >= allowed {
            return Err(LedgerError::NoSpinsRemaining);
        }
        let raw = super::settings::setting_text(&mut *tx, "wheel_prizes")
            .await?
            .unwrap_or_default();
        let table = wheel::parse_prize_table(&raw)?;
        let prize_tcoin = wheel::draw_prize(&table, &mut OsRng)
            .ok_or(LedgerError::validation("wheel_prizes", "prize table is empty"))?;

        sqlx::query("INSERT INTO wheel_spins (user_id, prize_tcoin) VALUES ($1, $2)")
            .bind(user_id)
            .bind(prize_tcoin)
            .execute(&mut *tx)
            .await?;
        let new_tcoin_balance: i64 = sqlx::query_scalar(
            "UPDATE profiles SET tcoin_balance = tcoin_balance + $2, updated_at = NOW() \
             WHERE user_id = $1 RETURNING tcoin_balance",
        )
        .bind(user_id)
        .bind(prize_tcoin)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        info!(user = %user_id, prize_tcoin, "wheel spun");
        Ok(SpinOutcome {
            prize_tcoin,
            spins_remaining: allowed - spins_today - 1,
            new_tcoin_balance,
        })
    }

    /// Today's allowance and the current prize table, for display.
    pub async fn wheel_status(&self, user_id: Uuid) -> Result<WheelStatus> {
        let allowed =
            super::settings::setting_i64(&self.pool, "wheel_daily_spins", 3).await?;
        let spins_today: i64 = sqlx::query_scalar(
            "SELECT COUNT(*)::BIGINT FROM wheel_spins \
             WHERE user_id = $1 AND spun_at >= date_trunc('day', NOW())",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        let raw = super::settings::setting_text(&self.pool, "wheel_prizes")
            .await?
            .unwrap_or_default();
        let prizes = wheel::parse_prize_table(&raw).unwrap_or_default();
        Ok(WheelStatus {
            spins_today,
            spins_allowed: allowed,
            spins_remaining: (allowed - spins_today).max(0),
            prizes,
        })
    }
}
