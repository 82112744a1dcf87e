//! Integer money arithmetic. Every product is checked; division comes
//! last so rounding is always toward zero and happens exactly once.

use super::{LedgerError, Result};

/// 1 USDC in base units.
pub const MICROS_PER_USDC: i64 = 1_000_000;

/// Basis-point denominator: 10_000 bps = 100%.
pub const BPS_DENOMINATOR: i64 = 10_000;

/// 1 TH/s in GH/s.
pub const GHS_PER_THS: i64 = 1_000;

/// Total payout of a finished task run:
/// `base_daily_reward × duration_days × (100 + bonus_percent) / 100`.
///
/// With exact inputs this is exact: a 2.50 USDC/day task run for 7 days at
/// +30% pays 22.75 USDC on the nose.
pub fn task_earnings_micros(
    base_daily_reward_micros: i64,
    duration_days: i32,
    bonus_percent: i32,
) -> Result<i64> {
    base_daily_reward_micros
        .checked_mul(i64::from(duration_days))
        .and_then(|v| v.checked_mul(100 + i64::from(bonus_percent)))
        .map(|v| v / 100)
        .ok_or(LedgerError::Overflow)
}

/// Basis-point share of an amount, rounded toward zero.
pub fn bps_share_micros(amount_micros: i64, rate_bps: i64) -> Result<i64> {
    amount_micros
        .checked_mul(rate_bps)
        .map(|v| v / BPS_DENOMINATOR)
        .ok_or(LedgerError::Overflow)
}

/// USDC credited for a T-Coin conversion at `tcoin_per_usdc` coins to the
/// dollar.
pub fn tcoin_to_micros(tcoin_amount: i64, tcoin_per_usdc: i64) -> Result<i64> {
    if tcoin_per_usdc <= 0 {
        return Err(LedgerError::validation("tcoin_per_usdc", "rate must be positive"));
    }
    tcoin_amount
        .checked_mul(MICROS_PER_USDC)
        .map(|v| v / tcoin_per_usdc)
        .ok_or(LedgerError::Overflow)
}

/// Human-readable USDC string for logs, notes, and mail: `22_750_000`
/// renders as "22.75", whole dollars render without a fraction.
pub fn format_usdc(micros: i64) -> String {
    let sign = if micros < 0 { "-" } else { "" };
    let abs = micros.unsigned_abs();
    let whole = abs / MICROS_PER_USDC as u64;
    let frac = abs % MICROS_PER_USDC as u64;
    if frac == 0 {
        return format!("{sign}{whole}");
    }
    let frac = format!("{frac:06}");
    format!("{sign}{whole}.{}", frac.trim_end_matches('0'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn earnings_formula_is_exact() {
        // 2.50 USDC/day × 7 days × 1.30 = 22.75 USDC
        assert_eq!(task_earnings_micros(2_500_000, 7, 30).unwrap(), 22_750_000);
        // No bonus: straight product.
        assert_eq!(task_earnings_micros(1_000_000, 30, 0).unwrap(), 30_000_000);
        // Promo 180-day at +75%.
        assert_eq!(task_earnings_micros(500_000, 180, 75).unwrap(), 157_500_000);
    }

    #[test]
    fn earnings_overflow_is_an_error() {
        assert!(matches!(
            task_earnings_micros(i64::MAX / 2, 1000, 50),
            Err(LedgerError::Overflow)
        ));
    }

    #[test]
    fn bps_share_rounds_toward_zero() {
        // 5% of 100 USDC
        assert_eq!(bps_share_micros(100_000_000, 500).unwrap(), 5_000_000);
        // 3% of 22.75 USDC = 0.6825 USDC exactly
        assert_eq!(bps_share_micros(22_750_000, 300).unwrap(), 682_500);
        // 1% of 1 micro truncates to zero
        assert_eq!(bps_share_micros(1, 100).unwrap(), 0);
    }

    #[test]
    fn tcoin_conversion_at_default_rate() {
        // 150 T-Coin at 100/USDC = 1.50 USDC
        assert_eq!(tcoin_to_micros(150, 100).unwrap(), 1_500_000);
        // Indivisible remainders truncate.
        assert_eq!(tcoin_to_micros(101, 3).unwrap(), 33_666_666);
        assert!(tcoin_to_micros(10, 0).is_err());
    }

    #[test]
    fn usdc_formatting() {
        assert_eq!(format_usdc(22_750_000), "22.75");
        assert_eq!(format_usdc(5_000_000), "5");
        assert_eq!(format_usdc(682_500), "0.6825");
        assert_eq!(format_usdc(0), "0");
        assert_eq!(format_usdc(-1_250_000), "-1.25");
        assert_eq!(format_usdc(1), "0.000001");
    }
}
