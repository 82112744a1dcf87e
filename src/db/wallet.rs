//! The append-only ledger: one posting primitive used by every completed
//! money movement, user-facing deposit/withdrawal requests, admin
//! settlement, and the cached-balance audit.

use super::settings;
use super::{
    AuditRow, CreditOutcome, Database, OverviewCounts, SettleOutcome, TransactionRow, TxFilter,
};
use crate::ledger::{LedgerError, Result, TxStatus, TxType};
use chrono::NaiveDate;
use sqlx::{Postgres, Transaction};
use tracing::info;
use uuid::Uuid;

/// Column list shared by every query that returns a [`TransactionRow`].
const TX_COLS: &str = "id, user_id, tx_type, status, amount_micros, exact_amount_micros, \
     tcoin_amount, wallet_address, notes, salary_month, created_at, processed_at";

/// One completed posting: a ledger row plus the cached-balance update,
/// applied atomically inside the caller's transaction.
pub(crate) struct Posting<'a> {
    pub user_id: Uuid,
    pub tx_type: TxType,
    pub amount_micros: i64,
    pub exact_amount_micros: Option<i64>,
    pub tcoin_amount: Option<i64>,
    pub wallet_address: Option<&'a str>,
    pub notes: Option<&'a str>,
    pub salary_month: Option<NaiveDate>,
}

impl<'a> Posting<'a> {
    pub(crate) fn new(user_id: Uuid, tx_type: TxType, amount_micros: i64) -> Self {
        Self {
            user_id,
            tx_type,
            amount_micros,
            exact_amount_micros: None,
            tcoin_amount: None,
            wallet_address: None,
            notes: None,
            salary_month: None,
        }
    }

    pub(crate) fn notes(mut self, notes: &'a str) -> Self {
        self.notes = Some(notes);
        self
    }

    pub(crate) fn tcoin(mut self, tcoin_amount: i64) -> Self {
        self.tcoin_amount = Some(tcoin_amount);
        self
    }
}

/// Apply one completed posting and return `(tx_id, new_balance_micros)`.
///
/// The balance update carries a `wallet + effect >= 0` guard, so the
/// cached wallet can never go negative; a failed debit reports how much
/// was actually available instead.
pub(crate) async fn post_completed(
    tx: &mut Transaction<'_, Postgres>,
    posting: Posting<'_>,
) -> Result<(i64, i64)> {
    if posting.amount_micros < 0 {
        return Err(LedgerError::validation("amount_micros", "must not be negative"));
    }
    let effect = posting
        .tx_type
        .balance_effect_micros(posting.amount_micros, posting.exact_amount_micros);
    let earn_delta = if posting.tx_type.counts_toward_earnings() {
        effect
    } else {
        0
    };
    let new_balance: Option<i64> = sqlx::query_scalar(
        "UPDATE profiles \
         SET wallet_balance_micros = wallet_balance_micros + $2, \
             total_earnings_micros = total_earnings_micros + $3, \
             updated_at = NOW() \
         WHERE user_id = $1 AND wallet_balance_micros + $2 >= 0 \
         RETURNING wallet_balance_micros",
    )
    .bind(posting.user_id)
    .bind(effect)
    .bind(earn_delta)
    .fetch_optional(&mut **tx)
    .await?;
    let Some(new_balance) = new_balance else {
        let available: Option<i64> =
            sqlx::query_scalar("SELECT wallet_balance_micros FROM profiles WHERE user_id = $1")
                .bind(posting.user_id)
                .fetch_optional(&mut **tx)
                .await?;
        return Err(match available {
            None => LedgerError::NotFound("profile"),
            Some(available_micros) => LedgerError::InsufficientBalance {
                required_micros: -effect,
                available_micros,
            },
        });
    };
    let tx_id: i64 = sqlx::query_scalar(
        "INSERT INTO transactions \
             (user_id, tx_type, status, amount_micros, exact_amount_micros, tcoin_amount, \
              wallet_address, notes, salary_month, processed_at) \
         VALUES ($1, $2, 'completed', $3, $4, $5, $6, $7, $8, NOW()) \
         RETURNING id",
    )
    .bind(posting.user_id)
    .bind(posting.tx_type.as_str())
    .bind(posting.amount_micros)
    .bind(posting.exact_amount_micros)
    .bind(posting.tcoin_amount)
    .bind(posting.wallet_address)
    .bind(posting.notes)
    .bind(posting.salary_month)
    .fetch_one(&mut **tx)
    .await?;
    Ok((tx_id, new_balance))
}

impl Database {
    /// Record a user's claim that an on-chain deposit is on its way. The
    /// wallet is only credited when an admin approves with the amount that
    /// actually arrived.
    pub async fn request_deposit(
        &self,
        user_id: Uuid,
        amount_micros: i64,
        reference: Option<&str>,
    ) -> Result<TransactionRow> {
        if amount_micros <= 0 {
            return Err(LedgerError::validation("amount_micros", "must be positive"));
        }
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM profiles WHERE user_id = $1)")
                .bind(user_id)
                .fetch_one(&self.pool)
                .await?;
        if !exists {
            return Err(LedgerError::NotFound("profile"));
        }
        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            "INSERT INTO transactions (user_id, tx_type, status, amount_micros, notes) \
             VALUES ($1, 'deposit', 'pending', $2, $3) RETURNING {TX_COLS}"
        ))
        .bind(user_id)
        .bind(amount_micros)
        .bind(reference)
        .fetch_one(&self.pool)
        .await?;
        info!(user = %user_id, tx = row.id, amount = amount_micros, "deposit requested");
        Ok(row)
    }

    /// Queue a withdrawal for admin settlement. The balance is checked here
    /// for early feedback but only debited at approval time, under the same
    /// guard, so nothing is held hostage by an abandoned request.
    pub async fn request_withdrawal(
        &self,
        user_id: Uuid,
        amount_micros: i64,
        wallet_address: &str,
    ) -> Result<TransactionRow> {
        let address = wallet_address.trim();
        if address.is_empty() || address.len() > 128 {
            return Err(LedgerError::validation(
                "wallet_address",
                "must be 1-128 characters",
            ));
        }
        if amount_micros <= 0 {
            return Err(LedgerError::validation("amount_micros", "must be positive"));
        }
        let minimum = settings::setting_i64(&self.pool, "withdrawal_min_micros", 0).await?;
        if amount_micros < minimum {
            return Err(LedgerError::WithdrawalBelowMinimum {
                amount_micros,
                minimum_micros: minimum,
            });
        }
        let available: Option<i64> =
            sqlx::query_scalar("SELECT wallet_balance_micros FROM profiles WHERE user_id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
        let available = available.ok_or(LedgerError::NotFound("profile"))?;
        if available < amount_micros {
            return Err(LedgerError::InsufficientBalance {
                required_micros: amount_micros,
                available_micros: available,
            });
        }
        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            "INSERT INTO transactions (user_id, tx_type, status, amount_micros, wallet_address) \
             VALUES ($1, 'withdrawal', 'pending', $2, $3) RETURNING {TX_COLS}"
        ))
        .bind(user_id)
        .bind(amount_micros)
        .bind(address)
        .fetch_one(&self.pool)
        .await?;
        info!(user = %user_id, tx = row.id, amount = amount_micros, "withdrawal requested");
        Ok(row)
    }

    /// Settle a pending deposit or withdrawal as completed. Deposits credit
    /// the amount the admin confirmed on-chain (`exact_amount_micros`,
    /// defaulting to the declared amount); withdrawals debit under the
    /// non-negative guard and leave the row pending if funds ran out since
    /// the request.
    ///
    /// Re-approving an already-completed row is a no-op; approving a
    /// rejected row is a conflict.
    pub async fn approve_transaction(
        &self,
        tx_id: i64,
        exact_amount_micros: Option<i64>,
    ) -> Result<SettleOutcome> {
        if exact_amount_micros.is_some_and(|v| v <= 0) {
            return Err(LedgerError::validation(
                "exact_amount_micros",
                "must be positive",
            ));
        }
        let mut tx = self.pool.begin().await?;
        let row: Option<(Uuid, String, i64, Option<i64>)> = sqlx::query_as(
            "UPDATE transactions \
             SET status = 'completed', \
                 exact_amount_micros = COALESCE($2, exact_amount_micros), \
                 processed_at = NOW() \
             WHERE id = $1 AND status = 'pending' AND tx_type IN ('deposit', 'withdrawal') \
             RETURNING user_id, tx_type, amount_micros, exact_amount_micros",
        )
        .bind(tx_id)
        .bind(exact_amount_micros)
        .fetch_optional(&mut *tx)
        .await?;
        let Some((user_id, tx_type, amount_micros, exact)) = row else {
            let current: Option<String> =
                sqlx::query_scalar("SELECT status FROM transactions WHERE id = $1")
                    .bind(tx_id)
                    .fetch_optional(&mut *tx)
                    .await?;
            return match current {
                None => Err(LedgerError::NotFound("transaction")),
                Some(status) if status == "completed" => {
                    Ok(SettleOutcome::AlreadyFinal { tx_id, status })
                }
                Some(_) => Err(LedgerError::AlreadyProcessed),
            };
        };

        let new_balance = match tx_type.as_str() {
            "deposit" => {
                let credited = exact.unwrap_or(amount_micros);
                let balance: Option<i64> = sqlx::query_scalar(
                    "UPDATE profiles \
                     SET wallet_balance_micros = wallet_balance_micros + $2, updated_at = NOW() \
                     WHERE user_id = $1 RETURNING wallet_balance_micros",
                )
                .bind(user_id)
                .bind(credited)
                .fetch_optional(&mut *tx)
                .await?;
                balance.ok_or(LedgerError::NotFound("profile"))?
            }
            _ => {
                // Withdrawal. A failed guard rolls the whole settlement
                // back, so the request stays pending for a later retry.
                let balance: Option<i64> = sqlx::query_scalar(
                    "UPDATE profiles \
                     SET wallet_balance_micros = wallet_balance_micros - $2, updated_at = NOW() \
                     WHERE user_id = $1 AND wallet_balance_micros >= $2 \
                     RETURNING wallet_balance_micros",
                )
                .bind(user_id)
                .bind(amount_micros)
                .fetch_optional(&mut *tx)
                .await?;
                match balance {
                    Some(b) => b,
                    None => {
                        let available: i64 = sqlx::query_scalar(
                            "SELECT wallet_balance_micros FROM profiles WHERE user_id = $1",
                        )
                        .bind(user_id)
                        .fetch_optional(&mut *tx)
                        .await?
                        .ok_or(LedgerError::NotFound("profile"))?;
                        return Err(LedgerError::InsufficientBalance {
                            required_micros: amount_micros,
                            available_micros: available,
                        });
                    }
                }
            }
        };
        tx.commit().await?;
        let settled = if tx_type == "deposit" {
            exact.unwrap_or(amount_micros)
        } else {
            amount_micros
        };
        info!(tx = tx_id, user = %user_id, %tx_type, amount = settled, "transaction approved");
        Ok(SettleOutcome::Applied {
            tx_id,
            user_id,
            tx_type,
            amount_micros: settled,
            new_balance_micros: Some(new_balance),
        })
    }

    /// Reject a pending request. No balance is touched; the optional note
    /// tells the user why. Re-rejecting is a no-op, rejecting a completed
    /// row is a conflict.
    pub async fn reject_transaction(
        &self,
        tx_id: i64,
        reason: Option<&str>,
    ) -> Result<SettleOutcome> {
        let row: Option<(Uuid, String, i64)> = sqlx::query_as(
            "UPDATE transactions \
             SET status = 'rejected', notes = COALESCE($2, notes), processed_at = NOW() \
             WHERE id = $1 AND status = 'pending' \
             RETURNING user_id, tx_type, amount_micros",
        )
        .bind(tx_id)
        .bind(reason)
        .fetch_optional(&self.pool)
        .await?;
        let Some((user_id, tx_type, amount_micros)) = row else {
            let current: Option<String> =
                sqlx::query_scalar("SELECT status FROM transactions WHERE id = $1")
                    .bind(tx_id)
                    .fetch_optional(&self.pool)
                    .await?;
            return match current {
                None => Err(LedgerError::NotFound("transaction")),
                Some(status) if status == "rejected" => {
                    Ok(SettleOutcome::AlreadyFinal { tx_id, status })
                }
                Some(_) => Err(LedgerError::AlreadyProcessed),
            };
        };
        info!(tx = tx_id, user = %user_id, %tx_type, "transaction rejected");
        Ok(SettleOutcome::Applied {
            tx_id,
            user_id,
            tx_type,
            amount_micros,
            new_balance_micros: None,
        })
    }

    /// Manual balance correction, always positive and always logged.
    pub async fn admin_credit(
        &self,
        user_id: Uuid,
        amount_micros: i64,
        notes: Option<&str>,
    ) -> Result<CreditOutcome> {
        if amount_micros <= 0 {
            return Err(LedgerError::validation("amount_micros", "must be positive"));
        }
        let mut tx = self.pool.begin().await?;
        let (tx_id, new_balance) = post_completed(
            &mut tx,
            Posting::new(user_id, TxType::AdminCredit, amount_micros)
                .notes(notes.unwrap_or("manual adjustment")),
        )
        .await?;
        tx.commit().await?;
        info!(user = %user_id, tx = tx_id, amount = amount_micros, "admin credit applied");
        Ok(CreditOutcome {
            tx_id,
            new_balance_micros: new_balance,
        })
    }

    /// A user's own transaction history, newest first.
    pub async fn list_transactions(
        &self,
        user_id: Uuid,
        filter: &TxFilter,
    ) -> Result<Vec<TransactionRow>> {
        self.list_transactions_inner(Some(user_id), filter, false).await
    }

    /// Admin view over all users, with the same filters. Pending rows come
    /// first so the settlement queue sits on page one.
    pub async fn list_all_transactions(
        &self,
        user_id: Option<Uuid>,
        filter: &TxFilter,
    ) -> Result<Vec<TransactionRow>> {
        self.list_transactions_inner(user_id, filter, true).await
    }

    async fn list_transactions_inner(
        &self,
        user_id: Option<Uuid>,
        filter: &TxFilter,
        pending_first: bool,
    ) -> Result<Vec<TransactionRow>> {
        let tx_type = match filter.tx_type.as_deref() {
            Some(raw) => Some(
                TxType::parse(raw)
                    .ok_or_else(|| LedgerError::validation("tx_type", "unknown type"))?,
            ),
            None => None,
        };
        let status = match filter.status.as_deref() {
            Some(raw) => Some(
                TxStatus::parse(raw)
                    .ok_or_else(|| LedgerError::validation("status", "unknown status"))?,
            ),
            None => None,
        };

        let mut conditions = Vec::new();
        let mut param_idx = 1u32;
        if user_id.is_some() {
            conditions.push(format!("user_id = ${param_idx}"));
            param_idx += 1;
        }
        if tx_type.is_some() {
            conditions.push(format!("tx_type = ${param_idx}"));
            param_idx += 1;
        }
        if status.is_some() {
            conditions.push(format!("status = ${param_idx}"));
            param_idx += 1;
        }
        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conditions.join(" AND "))
        };
        let order = if pending_first {
            "(status = 'pending') DESC, created_at DESC, id DESC"
        } else {
            "created_at DESC, id DESC"
        };
        let sql = format!(
            "SELECT {TX_COLS} FROM transactions{where_clause} \
             ORDER BY {order} LIMIT ${param_idx} OFFSET ${}",
            param_idx + 1,
        );

        let mut query = sqlx::query_as::<_, TransactionRow>(&sql);
        if let Some(user_id) = user_id {
            query = query.bind(user_id);
        }
        if let Some(tx_type) = tx_type {
            query = query.bind(tx_type.as_str());
        }
        if let Some(status) = status {
            query = query.bind(status.as_str());
        }
        Ok(query
            .bind(filter.clamped_limit())
            .bind(filter.clamped_offset())
            .fetch_all(&self.pool)
            .await?)
    }

    pub async fn get_transaction(&self, tx_id: i64) -> Result<Option<TransactionRow>> {
        Ok(sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {TX_COLS} FROM transactions WHERE id = $1"
        ))
        .bind(tx_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    /// Recompute every user's balances from the ledger and return the rows
    /// whose cached projections disagree. An empty result is the healthy
    /// state.
    ///
    /// USDC truth: completed transactions, with deposits counted at their
    /// settled amount. T-Coin truth: wheel prizes won minus coins spent on
    /// conversions.
    pub async fn audit_balances(&self) -> Result<Vec<AuditRow>> {
        Ok(sqlx::query_as::<_, AuditRow>(
            "SELECT p.user_id, p.email, \
                    p.wallet_balance_micros AS cached_micros, \
                    COALESCE(l.ledger_micros, 0) AS ledger_micros, \
                    p.wallet_balance_micros - COALESCE(l.ledger_micros, 0) AS drift_micros, \
                    p.tcoin_balance AS cached_tcoin, \
                    COALESCE(w.won_tcoin, 0) - COALESCE(l.spent_tcoin, 0) AS ledger_tcoin, \
                    p.tcoin_balance - (COALESCE(w.won_tcoin, 0) - COALESCE(l.spent_tcoin, 0)) AS drift_tcoin \
             FROM profiles p \
             LEFT JOIN ( \
                 SELECT user_id, \
                        SUM(CASE tx_type \
                            WHEN 'withdrawal' THEN -amount_micros \
                            WHEN 'purchase' THEN -amount_micros \
                            WHEN 'rental_renewal' THEN -amount_micros \
                            WHEN 'deposit' THEN COALESCE(exact_amount_micros, amount_micros) \
                            ELSE amount_micros END)::BIGINT AS ledger_micros, \
                        SUM(CASE WHEN tx_type = 'tcoin_conversion' \
                            THEN COALESCE(tcoin_amount, 0) ELSE 0 END)::BIGINT AS spent_tcoin \
                 FROM transactions WHERE status = 'completed' GROUP BY user_id \
             ) l ON l.user_id = p.user_id \
             LEFT JOIN ( \
                 SELECT user_id, SUM(prize_tcoin)::BIGINT AS won_tcoin \
                 FROM wheel_spins GROUP BY user_id \
             ) w ON w.user_id = p.user_id \
             WHERE p.wallet_balance_micros - COALESCE(l.ledger_micros, 0) <> 0 \
                OR p.tcoin_balance - (COALESCE(w.won_tcoin, 0) - COALESCE(l.spent_tcoin, 0)) <> 0 \
             ORDER BY p.created_at",
        )
        .fetch_all(&self.pool)
        .await?)
    }

    /// Counts for the operational gauges and the admin overview.
    pub async fn overview_counts(&self) -> Result<OverviewCounts> {
        Ok(sqlx::query_as::<_, OverviewCounts>(
            "SELECT \
                (SELECT COUNT(*) FROM profiles)::BIGINT AS users, \
                (SELECT COUNT(*) FROM user_tasks WHERE status = 'processing')::BIGINT AS active_runs, \
                (SELECT COUNT(*) FROM user_tasks WHERE status = 'processing' AND ends_at <= NOW())::BIGINT AS claimable_runs, \
                (SELECT COUNT(*) FROM user_devices WHERE is_rental_active)::BIGINT AS active_rentals, \
                (SELECT COUNT(*) FROM transactions WHERE status = 'pending' AND tx_type = 'deposit')::BIGINT AS pending_deposits, \
                (SELECT COUNT(*) FROM transactions WHERE status = 'pending' AND tx_type = 'withdrawal')::BIGINT AS pending_withdrawals",
        )
        .fetch_one(&self.pool)
        .await?)
    }
}
