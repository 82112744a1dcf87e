//! Referral accrual: depth-2 bonus cascades, the level ladder, team
//! overviews, and the monthly salary run.
//!
//! Cascades run inside the transaction of the purchase or claim that
//! triggered them, so either the whole unit lands or none of it does.
//! Invite chains are acyclic (an invite code must belong to an existing
//! account), which keeps the upward lock order deadlock-free.

use super::settings;
use super::wallet::{post_completed, Posting};
use super::{
    CascadePayout, Database, LevelRow, SalaryRunReport, TeamMemberRow, TeamOverview,
};
use crate::ledger::{levels, money, LedgerError, ReferralLevel, Result};
use chrono::{Datelike, NaiveDate};
use sqlx::{Postgres, Transaction};
use tracing::info;
use uuid::Uuid;

/// What set the cascade off. Purchases and task earnings pay inviters at
/// different rates, from different settings keys.
#[derive(Debug, Clone, Copy)]
pub enum CascadeTrigger {
    Purchase,
    TaskEarning,
}

impl CascadeTrigger {
    fn settings_keys(self) -> (&'static str, &'static str) {
        match self {
            Self::Purchase => ("referral_purchase_l1_bps", "referral_purchase_l2_bps"),
            Self::TaskEarning => ("referral_task_l1_bps", "referral_task_l2_bps"),
        }
    }

    fn tx_type(self) -> crate::ledger::TxType {
        match self {
            Self::Purchase => crate::ledger::TxType::ReferralPurchase,
            Self::TaskEarning => crate::ledger::TxType::ReferralTask,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Purchase => "purchase",
            Self::TaskEarning => "task earnings",
        }
    }
}

/// Pay the depth-1 and depth-2 inviters their cut of a trigger amount.
/// A break in the invite chain simply stops the walk; bonuses that round
/// to zero are skipped rather than recorded as empty rows.
pub(crate) async fn cascade_referral(
    tx: &mut Transaction<'_, Postgres>,
    source_user: Uuid,
    trigger_amount_micros: i64,
    trigger: CascadeTrigger,
) -> Result<Vec<CascadePayout>> {
    let (l1_key, l2_key) = trigger.settings_keys();
    let mut payouts = Vec::new();
    let mut current = source_user;
    for (depth, key) in [(1u8, l1_key), (2u8, l2_key)] {
        let inviter: Option<Uuid> =
            sqlx::query_scalar("SELECT invited_by FROM profiles WHERE user_id = $1")
                .bind(current)
                .fetch_optional(&mut **tx)
                .await?
                .flatten();
        let Some(inviter) = inviter else { break };
        let rate_bps = settings::setting_i64(&mut **tx, key, 0).await?;
        let bonus = money::bps_share_micros(trigger_amount_micros, rate_bps)?;
        if bonus > 0 {
            let notes = format!("depth-{depth} {} bonus", trigger.label());
            let (tx_id, _) = post_completed(
                tx,
                Posting::new(inviter, trigger.tx_type(), bonus).notes(&notes),
            )
            .await?;
            payouts.push(CascadePayout {
                inviter,
                depth,
                bonus_micros: bonus,
                tx_id,
            });
        }
        current = inviter;
    }
    Ok(payouts)
}

pub(crate) async fn load_ladder<'e, E>(executor: E) -> Result<Vec<levels::LevelThreshold>>
where
    E: sqlx::PgExecutor<'e>,
{
    let rows = sqlx::query_as::<_, LevelRow>(
        "SELECT level, rank, min_direct_referrals, min_team_power_ghs, monthly_salary_micros \
         FROM referral_levels ORDER BY rank",
    )
    .fetch_all(executor)
    .await?;
    Ok(rows
        .into_iter()
        .filter_map(|r| {
            ReferralLevel::parse(&r.level).map(|level| levels::LevelThreshold {
                level,
                min_direct_referrals: r.min_direct_referrals,
                min_team_power_ghs: r.min_team_power_ghs,
                monthly_salary_micros: r.monthly_salary_micros,
            })
        })
        .collect())
}

/// Re-derive a user's level from their direct team and promote if a higher
/// tier is now earned. Levels never demote: thresholds may tighten or a
/// team may shrink, but a reached tier is kept.
pub(crate) async fn recompute_level(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
) -> Result<Option<(ReferralLevel, ReferralLevel)>> {
    let current: Option<String> =
        sqlx::query_scalar("SELECT referral_level FROM profiles WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&mut **tx)
            .await?;
    let Some(current) = current else {
        return Ok(None);
    };
    let current = ReferralLevel::parse(&current).unwrap_or(ReferralLevel::Starter);
    let (direct, team_power): (i64, i64) = sqlx::query_as(
        "SELECT COUNT(*), COALESCE(SUM(total_power_ghs), 0)::BIGINT \
         FROM profiles WHERE invited_by = $1",
    )
    .bind(user_id)
    .fetch_one(&mut **tx)
    .await?;
    let ladder = load_ladder(&mut **tx).await?;
    let earned = levels::level_for(direct, team_power, &ladder);
    if earned > current {
        sqlx::query("UPDATE profiles SET referral_level = $2, updated_at = NOW() WHERE user_id = $1")
            .bind(user_id)
            .bind(earned.as_str())
            .execute(&mut **tx)
            .await?;
        info!(user = %user_id, from = %current, to = %earned, "referral level promoted");
        return Ok(Some((current, earned)));
    }
    Ok(None)
}

impl Database {
    /// Everything a user sees on their referral page: code, level, direct
    /// team, and lifetime referral income.
    pub async fn team_overview(&self, user_id: Uuid) -> Result<TeamOverview> {
        let profile = self
            .get_profile(user_id)
            .await?
            .ok_or(LedgerError::NotFound("profile"))?;
        let members = sqlx::query_as::<_, TeamMemberRow>(
            "SELECT user_id, email, referral_level, total_power_ghs, created_at \
             FROM profiles WHERE invited_by = $1 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        let referral_earnings_micros: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(amount_micros), 0)::BIGINT FROM transactions \
             WHERE user_id = $1 AND status = 'completed' \
               AND tx_type IN ('referral_purchase', 'referral_task', 'referral_salary')",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(TeamOverview {
            referral_code: profile.referral_code,
            referral_level: profile.referral_level,
            direct_count: members.len() as i64,
            team_power_ghs: members.iter().map(|m| m.total_power_ghs).sum(),
            referral_earnings_micros,
            members,
        })
    }

    pub async fn list_levels(&self) -> Result<Vec<LevelRow>> {
        Ok(sqlx::query_as::<_, LevelRow>(
            "SELECT level, rank, min_direct_referrals, min_team_power_ghs, monthly_salary_micros \
             FROM referral_levels ORDER BY rank",
        )
        .fetch_all(&self.pool)
        .await?)
    }

    /// Adjust the thresholds or salary of one tier. The tier set itself is
    /// fixed; only its numbers move.
    pub async fn update_level(
        &self,
        level: ReferralLevel,
        min_direct_referrals: i64,
        min_team_power_ghs: i64,
        monthly_salary_micros: i64,
    ) -> Result<LevelRow> {
        if min_direct_referrals < 0 || min_team_power_ghs < 0 || monthly_salary_micros < 0 {
            return Err(LedgerError::validation("thresholds", "must not be negative"));
        }
        let row = sqlx::query_as::<_, LevelRow>(
            "UPDATE referral_levels \
             SET min_direct_referrals = $2, min_team_power_ghs = $3, monthly_salary_micros = $4 \
             WHERE level = $1 \
             RETURNING level, rank, min_direct_referrals, min_team_power_ghs, monthly_salary_micros",
        )
        .bind(level.as_str())
        .bind(min_direct_referrals)
        .bind(min_team_power_ghs)
        .bind(monthly_salary_micros)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(LedgerError::NotFound("referral level"))?;
        info!(level = %level, "level thresholds updated");
        Ok(row)
    }

    /// Pay the monthly salary of every user whose current level carries
    /// one. A partial unique index on `(user_id, salary_month)` makes the
    /// run idempotent: re-running a month credits nobody twice.
    pub async fn pay_monthly_salaries(&self, month: NaiveDate) -> Result<SalaryRunReport> {
        let month = month.with_day(1).unwrap_or(month);
        let eligible: Vec<(Uuid, i64, String)> = sqlx::query_as(
            "SELECT p.user_id, rl.monthly_salary_micros, p.referral_level \
             FROM profiles p JOIN referral_levels rl ON rl.level = p.referral_level \
             WHERE rl.monthly_salary_micros > 0 ORDER BY p.created_at",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut paid = 0i64;
        let mut skipped = 0i64;
        let mut total_micros = 0i64;
        for (user_id, salary, level) in eligible {
            let mut tx = self.pool.begin().await?;
            let inserted: Option<i64> = sqlx::query_scalar(
                "INSERT INTO transactions \
                     (user_id, tx_type, status, amount_micros, notes, salary_month, processed_at) \
                 VALUES ($1, 'referral_salary', 'completed', $2, $3, $4, NOW()) \
                 ON CONFLICT (user_id, salary_month) WHERE tx_type = 'referral_salary' DO NOTHING \
                 RETURNING id",
            )
            .bind(user_id)
            .bind(salary)
            .bind(format!("{level} monthly salary"))
            .bind(month)
            .fetch_optional(&mut *tx)
            .await?;
            match inserted {
                Some(_) => {
                    sqlx::query(
                        "UPDATE profiles \
                         SET wallet_balance_micros = wallet_balance_micros + $2, \
                             total_earnings_micros = total_earnings_micros + $2, \
                             updated_at = NOW() \
                         WHERE user_id = $1",
                    )
                    .bind(user_id)
                    .bind(salary)
                    .execute(&mut *tx)
                    .await?;
                    tx.commit().await?;
                    paid += 1;
                    total_micros += salary;
                }
                None => {
                    tx.rollback().await?;
                    skipped += 1;
                }
            }
        }
        info!(%month, paid, skipped, total_micros, "salary run finished");
        Ok(SalaryRunReport {
            month,
            paid,
            skipped,
            total_micros,
        })
    }
}
