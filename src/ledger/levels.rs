//! The six-tier referral ladder. Tier names and their order are fixed in
//! code; the thresholds and salaries attached to each tier live in the
//! `referral_levels` table and are admin-tunable.

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferralLevel {
    Starter,
    Bronze,
    Silver,
    Gold,
    Platinum,
    Diamond,
}

impl ReferralLevel {
    pub const ALL: [ReferralLevel; 6] = [
        Self::Starter,
        Self::Bronze,
        Self::Silver,
        Self::Gold,
        Self::Platinum,
        Self::Diamond,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Starter => "starter",
            Self::Bronze => "bronze",
            Self::Silver => "silver",
            Self::Gold => "gold",
            Self::Platinum => "platinum",
            Self::Diamond => "diamond",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "starter" => Some(Self::Starter),
            "bronze" => Some(Self::Bronze),
            "silver" => Some(Self::Silver),
            "gold" => Some(Self::Gold),
            "platinum" => Some(Self::Platinum),
            "diamond" => Some(Self::Diamond),
            _ => None,
        }
    }

    /// Position on the ladder, 0 (starter) through 5 (diamond). Matches the
    /// `rank` column in `referral_levels`.
    pub fn rank(self) -> i32 {
        self as i32
    }
}

impl fmt::Display for ReferralLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One rung of the ladder as configured in the database.
#[derive(Debug, Clone, Serialize)]
pub struct LevelThreshold {
    pub level: ReferralLevel,
    pub min_direct_referrals: i64,
    pub min_team_power_ghs: i64,
    pub monthly_salary_micros: i64,
}

/// Highest tier whose thresholds are both satisfied. Both requirements are
/// conjunctive; an unmatched ladder always falls back to starter.
pub fn level_for(
    direct_referrals: i64,
    team_power_ghs: i64,
    ladder: &[LevelThreshold],
) -> ReferralLevel {
    ladder
        .iter()
        .filter(|t| direct_referrals >= t.min_direct_referrals && team_power_ghs >= t.min_team_power_ghs)
        .map(|t| t.level)
        .max()
        .unwrap_or(ReferralLevel::Starter)
}

/// Level gates on task catalogs: `None` means open to everyone.
pub fn meets_gate(user: ReferralLevel, gate: Option<ReferralLevel>) -> bool {
    gate.is_none_or(|required| user >= required)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ladder() -> Vec<LevelThreshold> {
        let specs: [(ReferralLevel, i64, i64, i64); 6] = [
            (ReferralLevel::Starter, 0, 0, 0),
            (ReferralLevel::Bronze, 3, 10_000, 10_000_000),
            (ReferralLevel::Silver, 10, 50_000, 50_000_000),
            (ReferralLevel::Gold, 25, 200_000, 200_000_000),
            (ReferralLevel::Platinum, 50, 500_000, 500_000_000),
            (ReferralLevel::Diamond, 100, 1_500_000, 1_500_000_000),
        ];
        specs
            .into_iter()
            .map(|(level, refs, power, salary)| LevelThreshold {
                level,
                min_direct_referrals: refs,
                min_team_power_ghs: power,
                monthly_salary_micros: salary,
            })
            .collect()
    }

    #[test]
    fn level_names_round_trip() {
        for level in ReferralLevel::ALL {
            assert_eq!(ReferralLevel::parse(level.as_str()), Some(level));
        }
        assert_eq!(ReferralLevel::parse("mythril"), None);
    }

    #[test]
    fn ranks_follow_ladder_order() {
        assert_eq!(ReferralLevel::Starter.rank(), 0);
        assert_eq!(ReferralLevel::Diamond.rank(), 5);
        assert!(ReferralLevel::Gold > ReferralLevel::Silver);
    }

    #[test]
    fn both_thresholds_must_hold() {
        let ladder = ladder();
        // Plenty of referrals, not enough team power: stays bronze.
        assert_eq!(level_for(30, 12_000, &ladder), ReferralLevel::Bronze);
        // Plenty of power, not enough referrals: stays starter.
        assert_eq!(level_for(2, 600_000, &ladder), ReferralLevel::Starter);
        // Both satisfied: silver.
        assert_eq!(level_for(10, 50_000, &ladder), ReferralLevel::Silver);
    }

    #[test]
    fn exact_boundary_promotes() {
        let ladder = ladder();
        assert_eq!(level_for(3, 10_000, &ladder), ReferralLevel::Bronze);
        assert_eq!(level_for(3, 9_999, &ladder), ReferralLevel::Starter);
    }

    #[test]
    fn gate_none_is_open() {
        assert!(meets_gate(ReferralLevel::Starter, None));
        assert!(meets_gate(ReferralLevel::Gold, Some(ReferralLevel::Gold)));
        assert!(meets_gate(ReferralLevel::Diamond, Some(ReferralLevel::Gold)));
        assert!(!meets_gate(ReferralLevel::Silver, Some(ReferralLevel::Gold)));
    }
}
