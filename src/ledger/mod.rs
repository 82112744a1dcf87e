//! # Ledger Domain — Units, Guard Errors, and State Codecs
//!
//! Pure domain layer shared by the database operations and the HTTP API.
//! Everything here is deterministic and side-effect free: transaction
//! typing, balance effects, claimability, and the error taxonomy every
//! guarded operation reports through.
//!
//! ## Unit Conventions
//!
//! | Quantity | Unit | Example |
//! |----------|------|---------|
//! | Money | micro-USDC (`i64`) | 22.75 USDC = `22_750_000` |
//! | Hashrate | GH/s (`i64`) | 1 TH/s = `1_000` GH/s |
//! | Referral rates | basis points (`i64`) | 5% = `500` |
//! | Duration bonus | whole percent (`i32`) | 30% = `30` |
//!
//! Fractional results always round toward zero (integer division), so the
//! ledger never credits more than the exact product.

pub mod levels;
pub mod money;
pub mod wheel;

pub use levels::{LevelThreshold, ReferralLevel};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, LedgerError>;

/// Everything a guarded ledger operation can report. The API layer maps
/// each variant onto an HTTP status; the variants themselves are
/// transport-agnostic so the CLI subcommands reuse them unchanged.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0} already exists")]
    AlreadyExists(&'static str),
    #[error("insufficient balance: need {required_micros} micro-USDC, have {available_micros}")]
    InsufficientBalance {
        required_micros: i64,
        available_micros: i64,
    },
    #[error("insufficient T-Coin: need {required}, have {available}")]
    InsufficientTcoin { required: i64, available: i64 },
    #[error("conversion below minimum: {amount} T-Coin, minimum is {minimum}")]
    BelowMinimum { amount: i64, minimum: i64 },
    #[error("withdrawal below minimum: {amount_micros} micro-USDC, minimum is {minimum_micros}")]
    WithdrawalBelowMinimum {
        amount_micros: i64,
        minimum_micros: i64,
    },
    #[error("insufficient computing power: need {required_ghs} GH/s, have {available_ghs} GH/s free")]
    InsufficientPower {
        required_ghs: i64,
        available_ghs: i64,
    },
    #[error("requires {required} level or above (currently {actual})")]
    LevelNotMet {
        required: ReferralLevel,
        actual: ReferralLevel,
    },
    #[error("no wheel spins remaining today")]
    NoSpinsRemaining,
    #[error("task not claimable until {ends_at}")]
    NotClaimableYet { ends_at: DateTime<Utc> },
    #[error("task already claimed")]
    AlreadyClaimed,
    #[error("transaction already processed")]
    AlreadyProcessed,
    #[error("rental not renewable until {renewable_from}")]
    RenewalNotDue { renewable_from: DateTime<Utc> },
    #[error("transaction PIN not set")]
    PinNotSet,
    #[error("transaction PIN does not match")]
    PinInvalid,
    #[error("amount overflows ledger arithmetic")]
    Overflow,
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl LedgerError {
    pub fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field,
            reason: reason.into(),
        }
    }
}

// ── Transaction Typing ──────────────────────────────────────────

/// Every movement of wallet money carries one of these types. The set is
/// mirrored by a CHECK constraint on `transactions.tx_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TxType {
    Deposit,
    Withdrawal,
    Purchase,
    RentalRenewal,
    TaskEarning,
    ReferralPurchase,
    ReferralTask,
    ReferralSalary,
    TcoinConversion,
    AdminCredit,
}

impl TxType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Deposit => "deposit",
            Self::Withdrawal => "withdrawal",
            Self::Purchase => "purchase",
            Self::RentalRenewal => "rental_renewal",
            Self::TaskEarning => "task_earning",
            Self::ReferralPurchase => "referral_purchase",
            Self::ReferralTask => "referral_task",
            Self::ReferralSalary => "referral_salary",
            Self::TcoinConversion => "tcoin_conversion",
            Self::AdminCredit => "admin_credit",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "deposit" => Some(Self::Deposit),
            "withdrawal" => Some(Self::Withdrawal),
            "purchase" => Some(Self::Purchase),
            "rental_renewal" => Some(Self::RentalRenewal),
            "task_earning" => Some(Self::TaskEarning),
            "referral_purchase" => Some(Self::ReferralPurchase),
            "referral_task" => Some(Self::ReferralTask),
            "referral_salary" => Some(Self::ReferralSalary),
            "tcoin_conversion" => Some(Self::TcoinConversion),
            "admin_credit" => Some(Self::AdminCredit),
            _ => None,
        }
    }

    /// Types that take money out of the wallet. Everything else credits it.
    pub fn is_debit(self) -> bool {
        matches!(self, Self::Withdrawal | Self::Purchase | Self::RentalRenewal)
    }

    /// Types counted into the lifetime `total_earnings` figure. Deposits,
    /// admin corrections, and T-Coin swaps move money but earn nothing.
    pub fn counts_toward_earnings(self) -> bool {
        matches!(
            self,
            Self::TaskEarning | Self::ReferralPurchase | Self::ReferralTask | Self::ReferralSalary
        )
    }

    /// Signed effect of a *completed* row on the wallet balance. Deposits
    /// settle at the amount the admin confirmed on-chain, not the amount
    /// the user declared.
    pub fn balance_effect_micros(self, amount_micros: i64, exact_amount_micros: Option<i64>) -> i64 {
        let amount = match self {
            Self::Deposit => exact_amount_micros.unwrap_or(amount_micros),
            _ => amount_micros,
        };
        if self.is_debit() {
            -amount
        } else {
            amount
        }
    }
}

/// Lifecycle of a ledger row. Only `completed` rows affect balances;
/// `pending` rows await admin settlement and `rejected` rows never touch
/// the wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TxStatus {
    Pending,
    Completed,
    Rejected,
}

impl TxStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "completed" => Some(Self::Completed),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

// ── Task Runs ───────────────────────────────────────────────────

/// Stored state of a task run. "Claimable" is never stored: it is derived
/// from `processing` plus an elapsed `ends_at`, so no sweeper has to flip
/// rows at the exact moment a run matures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Processing,
    Completed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }
}

/// A run pays out once its full duration has elapsed and it has not been
/// claimed before.
pub fn is_claimable(status: RunStatus, ends_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    status == RunStatus::Processing && now >= ends_at
}

/// Transaction PINs are exactly six ASCII digits.
pub fn validate_pin(pin: &str) -> Result<()> {
    if pin.len() == 6 && pin.bytes().all(|b| b.is_ascii_digit()) {
        Ok(())
    } else {
        Err(LedgerError::validation("pin", "must be exactly 6 digits"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn tx_type_round_trips_through_text() {
        for ty in [
            TxType::Deposit,
            TxType::Withdrawal,
            TxType::Purchase,
            TxType::RentalRenewal,
            TxType::TaskEarning,
            TxType::ReferralPurchase,
            TxType::ReferralTask,
            TxType::ReferralSalary,
            TxType::TcoinConversion,
            TxType::AdminCredit,
        ] {
            assert_eq!(TxType::parse(ty.as_str()), Some(ty));
        }
        assert_eq!(TxType::parse("gift_card"), None);
    }

    #[test]
    fn deposit_settles_at_exact_amount() {
        assert_eq!(
            TxType::Deposit.balance_effect_micros(100_000_000, Some(99_500_000)),
            99_500_000
        );
        // Declared amount is the fallback when no exact figure was recorded.
        assert_eq!(TxType::Deposit.balance_effect_micros(100_000_000, None), 100_000_000);
    }

    #[test]
    fn debit_types_have_negative_effect() {
        assert_eq!(TxType::Withdrawal.balance_effect_micros(5_000_000, None), -5_000_000);
        assert_eq!(TxType::Purchase.balance_effect_micros(5_000_000, None), -5_000_000);
        assert_eq!(TxType::RentalRenewal.balance_effect_micros(5_000_000, None), -5_000_000);
        assert_eq!(TxType::TaskEarning.balance_effect_micros(5_000_000, None), 5_000_000);
        assert_eq!(TxType::AdminCredit.balance_effect_micros(5_000_000, None), 5_000_000);
    }

    #[test]
    fn earnings_exclude_deposits_and_swaps() {
        assert!(TxType::TaskEarning.counts_toward_earnings());
        assert!(TxType::ReferralSalary.counts_toward_earnings());
        assert!(!TxType::Deposit.counts_toward_earnings());
        assert!(!TxType::TcoinConversion.counts_toward_earnings());
        assert!(!TxType::AdminCredit.counts_toward_earnings());
    }

    #[test]
    fn claimable_exactly_at_ends_at() {
        let ends = Utc::now();
        assert!(!is_claimable(RunStatus::Processing, ends, ends - Duration::seconds(1)));
        assert!(is_claimable(RunStatus::Processing, ends, ends));
        assert!(is_claimable(RunStatus::Processing, ends, ends + Duration::seconds(1)));
        assert!(!is_claimable(RunStatus::Completed, ends, ends + Duration::days(1)));
    }

    #[test]
    fn pin_must_be_six_digits() {
        assert!(validate_pin("123456").is_ok());
        assert!(validate_pin("000000").is_ok());
        assert!(validate_pin("12345").is_err());
        assert!(validate_pin("1234567").is_err());
        assert!(validate_pin("12345a").is_err());
        assert!(validate_pin("12 456").is_err());
    }
}
