//! Task catalog and run lifecycle.
//!
//! A run is `processing` until its end date and becomes claimable the
//! moment `ends_at` passes — claimability is derived from the clock, never
//! stored. Claiming flips the run to `completed` exactly once via a
//! conditional update and pays the earnings in the same transaction.

use super::referrals::{cascade_referral, CascadeTrigger};
use super::users::lock_profile;
use super::wallet::{post_completed, Posting};
use super::{ClaimOutcome, Database, TaskDurationRow, TaskRow, UserTaskRow};
use crate::ledger::{levels, money, LedgerError, ReferralLevel, Result, TxType};
use chrono::{DateTime, Utc};
use sqlx::Row;
use tracing::info;
use uuid::Uuid;

const TASK_COLS: &str = "id, name, region, min_power_ghs, base_daily_reward_micros, \
     min_referral_level, is_active, created_at";

const DURATION_COLS: &str = "id, days, bonus_percent, is_promo, is_active";

const USER_TASK_COLS: &str = "ut.id, ut.user_id, ut.task_id, t.name AS task_name, \
     ut.duration_days, ut.bonus_percent, ut.status, ut.earnings_micros, ut.started_at, \
     ut.ends_at, ut.claimed_at";

fn validate_task(
    name: &str,
    min_power_ghs: i64,
    base_daily_reward_micros: i64,
    min_referral_level: Option<&str>,
) -> Result<()> {
    if name.trim().is_empty() {
        return Err(LedgerError::validation("name", "must not be empty"));
    }
    if min_power_ghs < 0 {
        return Err(LedgerError::validation("min_power_ghs", "must not be negative"));
    }
    if base_daily_reward_micros < 0 {
        return Err(LedgerError::validation(
            "base_daily_reward_micros",
            "must not be negative",
        ));
    }
    if let Some(gate) = min_referral_level {
        if ReferralLevel::parse(gate).is_none() {
            return Err(LedgerError::validation(
                "min_referral_level",
                "not a referral level",
            ));
        }
    }
    Ok(())
}

impl Database {
    pub async fn list_tasks(&self, include_inactive: bool) -> Result<Vec<TaskRow>> {
        let sql = if include_inactive {
            format!("SELECT {TASK_COLS} FROM tasks ORDER BY id")
        } else {
            format!("SELECT {TASK_COLS} FROM tasks WHERE is_active ORDER BY id")
        };
        Ok(sqlx::query_as::<_, TaskRow>(&sql)
            .fetch_all(&self.pool)
            .await?)
    }

    pub async fn create_task(
        &self,
        name: &str,
        region: &str,
        min_power_ghs: i64,
        base_daily_reward_micros: i64,
        min_referral_level: Option<&str>,
        is_active: bool,
    ) -> Result<TaskRow> {
        validate_task(name, min_power_ghs, base_daily_reward_micros, min_referral_level)?;
        let row = sqlx::query_as::<_, TaskRow>(&format!(
            "INSERT INTO tasks (name, region, min_power_ghs, base_daily_reward_micros, \
                                min_referral_level, is_active) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING {TASK_COLS}"
        ))
        .bind(name.trim())
        .bind(region)
        .bind(min_power_ghs)
        .bind(base_daily_reward_micros)
        .bind(min_referral_level)
        .bind(is_active)
        .fetch_one(&self.pool)
        .await?;
        info!(task = row.id, name = %row.name, "task created");
        Ok(row)
    }

    /// Full replace of a catalog entry. Runs already started keep the
    /// duration and bonus they were started with; only the base daily
    /// reward is read again at claim time.
    pub async fn update_task(
        &self,
        id: i64,
        name: &str,
        region: &str,
        min_power_ghs: i64,
        base_daily_reward_micros: i64,
        min_referral_level: Option<&str>,
        is_active: bool,
    ) -> Result<TaskRow> {
        validate_task(name, min_power_ghs, base_daily_reward_micros, min_referral_level)?;
        sqlx::query_as::<_, TaskRow>(&format!(
            "UPDATE tasks \
             SET name = $2, region = $3, min_power_ghs = $4, base_daily_reward_micros = $5, \
                 min_referral_level = $6, is_active = $7 \
             WHERE id = $1 RETURNING {TASK_COLS}"
        ))
        .bind(id)
        .bind(name.trim())
        .bind(region)
        .bind(min_power_ghs)
        .bind(base_daily_reward_micros)
        .bind(min_referral_level)
        .bind(is_active)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(LedgerError::NotFound("task"))
    }

    pub async fn list_durations(&self, include_inactive: bool) -> Result<Vec<TaskDurationRow>> {
        let sql = if include_inactive {
            format!("SELECT {DURATION_COLS} FROM task_durations ORDER BY days")
        } else {
            format!("SELECT {DURATION_COLS} FROM task_durations WHERE is_active ORDER BY days")
        };
        Ok(sqlx::query_as::<_, TaskDurationRow>(&sql)
            .fetch_all(&self.pool)
            .await?)
    }

    pub async fn create_duration(
        &self,
        days: i32,
        bonus_percent: i32,
        is_promo: bool,
        is_active: bool,
    ) -> Result<TaskDurationRow> {
        if days <= 0 {
            return Err(LedgerError::validation("days", "must be positive"));
        }
        if bonus_percent < 0 {
            return Err(LedgerError::validation("bonus_percent", "must not be negative"));
        }
        Ok(sqlx::query_as::<_, TaskDurationRow>(&format!(
            "INSERT INTO task_durations (days, bonus_percent, is_promo, is_active) \
             VALUES ($1, $2, $3, $4) RETURNING {DURATION_COLS}"
        ))
        .bind(days)
        .bind(bonus_percent)
        .bind(is_promo)
        .bind(is_active)
        .fetch_one(&self.pool)
        .await?)
    }

    pub async fn update_duration(
        &self,
        id: i64,
        days: i32,
        bonus_percent: i32,
        is_promo: bool,
        is_active: bool,
    ) -> Result<TaskDurationRow> {
        if days <= 0 {
            return Err(LedgerError::validation("days", "must be positive"));
        }
        if bonus_percent < 0 {
            return Err(LedgerError::validation("bonus_percent", "must not be negative"));
        }
        sqlx::query_as::<_, TaskDurationRow>(&format!(
            "UPDATE task_durations \
             SET days = $2, bonus_percent = $3, is_promo = $4, is_active = $5 \
             WHERE id = $1 RETURNING {DURATION_COLS}"
        ))
        .bind(id)
        .bind(days)
        .bind(bonus_percent)
        .bind(is_promo)
        .bind(is_active)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(LedgerError::NotFound("task duration"))
    }

    /// Start a run of `task_id` over one of the offered durations. The
    /// duration's days and bonus are copied onto the run so later catalog
    /// edits cannot change a run already underway.
    pub async fn start_task(
        &self,
        user_id: Uuid,
        task_id: i64,
        duration_id: i64,
    ) -> Result<UserTaskRow> {
        let mut tx = self.pool.begin().await?;
        let task = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {TASK_COLS} FROM tasks WHERE id = $1 AND is_active"
        ))
        .bind(task_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(LedgerError::NotFound("task"))?;
        let duration = sqlx::query_as::<_, TaskDurationRow>(&format!(
            "SELECT {DURATION_COLS} FROM task_durations WHERE id = $1 AND is_active"
        ))
        .bind(duration_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(LedgerError::NotFound("task duration"))?;

        // Locking the profile serializes concurrent starts, so two runs
        // cannot both pass the free-power check on the same GH/s.
        let profile = lock_profile(&mut tx, user_id).await?;
        let actual = ReferralLevel::parse(&profile.referral_level).unwrap_or(ReferralLevel::Starter);
        let gate = task.min_referral_level.as_deref().and_then(ReferralLevel::parse);
        if !levels::meets_gate(actual, gate) {
            return Err(LedgerError::LevelNotMet {
                required: gate.unwrap_or(ReferralLevel::Starter),
                actual,
            });
        }
        let committed: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(t.min_power_ghs), 0)::BIGINT \
             FROM user_tasks ut JOIN tasks t ON t.id = ut.task_id \
             WHERE ut.user_id = $1 AND ut.status = 'processing'",
        )
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;
        let available = profile.total_power_ghs - committed;
        if available < task.min_power_ghs {
            return Err(LedgerError::InsufficientPower {
                required_ghs: task.min_power_ghs,
                available_ghs: available.max(0),
            });
        }

        let run = sqlx::query_as::<_, UserTaskRow>(
            "INSERT INTO user_tasks (user_id, task_id, duration_days, bonus_percent, ends_at) \
             VALUES ($1, $2, $3, $4, NOW() + make_interval(days => $3)) \
             RETURNING id, user_id, task_id, $5::TEXT AS task_name, duration_days, \
                       bonus_percent, status, earnings_micros, started_at, ends_at, claimed_at",
        )
        .bind(user_id)
        .bind(task_id)
        .bind(duration.days)
        .bind(duration.bonus_percent)
        .bind(&task.name)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        info!(
            user = %user_id,
            task = task_id,
            run = run.id,
            days = duration.days,
            "task run started"
        );
        Ok(run)
    }

    /// Claim a finished run. The conditional update is the only gate:
    /// whichever concurrent claim flips `processing` to `completed` wins,
    /// every other attempt diagnoses why it lost.
    pub async fn claim_task(&self, user_id: Uuid, user_task_id: i64) -> Result<ClaimOutcome> {
        let mut tx = self.pool.begin().await?;
        let claimed = sqlx::query(
            "UPDATE user_tasks SET status = 'completed', claimed_at = NOW() \
             WHERE id = $1 AND user_id = $2 AND status = 'processing' AND ends_at <= NOW() \
             RETURNING task_id, duration_days, bonus_percent",
        )
        .bind(user_task_id)
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(claimed) = claimed else {
            let state: Option<(String, DateTime<Utc>)> = sqlx::query_as(
                "SELECT status, ends_at FROM user_tasks WHERE id = $1 AND user_id = $2",
            )
            .bind(user_task_id)
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await?;
            return match state {
                None => Err(LedgerError::NotFound("task run")),
                Some((status, _)) if status == "completed" => Err(LedgerError::AlreadyClaimed),
                Some((_, ends_at)) => Err(LedgerError::NotClaimableYet { ends_at }),
            };
        };
        let task_id: i64 = claimed.try_get("task_id")?;
        let duration_days: i32 = claimed.try_get("duration_days")?;
        let bonus_percent: i32 = claimed.try_get("bonus_percent")?;

        // The base rate is read at claim time even if the task has since
        // been deactivated; a started run always pays out.
        let (base_daily, task_name): (i64, String) = sqlx::query_as(
            "SELECT base_daily_reward_micros, name FROM tasks WHERE id = $1",
        )
        .bind(task_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(LedgerError::NotFound("task"))?;
        let earnings_micros = money::task_earnings_micros(base_daily, duration_days, bonus_percent)?;

        let notes = format!("task earnings: {task_name}");
        let (tx_id, new_balance_micros) = post_completed(
            &mut tx,
            Posting::new(user_id, TxType::TaskEarning, earnings_micros).notes(&notes),
        )
        .await?;
        sqlx::query("UPDATE user_tasks SET earnings_micros = $2 WHERE id = $1")
            .bind(user_task_id)
            .bind(earnings_micros)
            .execute(&mut *tx)
            .await?;
        cascade_referral(&mut tx, user_id, earnings_micros, CascadeTrigger::TaskEarning).await?;
        tx.commit().await?;
        info!(
            user = %user_id,
            run = user_task_id,
            earnings_micros,
            "task earnings claimed"
        );
        Ok(ClaimOutcome {
            earnings_micros,
            tx_id,
            new_balance_micros,
        })
    }

    pub async fn list_user_tasks(&self, user_id: Uuid) -> Result<Vec<UserTaskRow>> {
        Ok(sqlx::query_as::<_, UserTaskRow>(&format!(
            "SELECT {USER_TASK_COLS} FROM user_tasks ut \
             JOIN tasks t ON t.id = ut.task_id \
             WHERE ut.user_id = $1 ORDER BY ut.started_at DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?)
    }
}
