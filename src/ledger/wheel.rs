//! Fortune-wheel prize tables. The wheel face is configured as a single
//! setting string — `"5:40,10:30,20:15,50:10,100:5"` reads as prize:weight
//! pairs — and the draw happens server-side so a client can never submit
//! its own prize.

use super::{LedgerError, Result};
use rand::Rng;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WheelPrize {
    pub tcoin: i64,
    pub weight: u32,
}

/// Parse a prize-table setting. Entries without an explicit `:weight` get
/// weight 1; blank entries are skipped so trailing commas are harmless.
pub fn parse_prize_table(raw: &str) -> Result<Vec<WheelPrize>> {
    let mut table = Vec::new();
    for entry in raw.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let (tcoin, weight) = entry.split_once(':').unwrap_or((entry, "1"));
        let tcoin: i64 = tcoin
            .trim()
            .parse()
            .map_err(|_| LedgerError::validation("wheel_prizes", format!("bad prize in {entry:?}")))?;
        let weight: u32 = weight
            .trim()
            .parse()
            .map_err(|_| LedgerError::validation("wheel_prizes", format!("bad weight in {entry:?}")))?;
        if tcoin <= 0 {
            return Err(LedgerError::validation("wheel_prizes", "prizes must be positive"));
        }
        if weight == 0 {
            return Err(LedgerError::validation("wheel_prizes", "weights must be positive"));
        }
        table.push(WheelPrize { tcoin, weight });
    }
    if table.is_empty() {
        return Err(LedgerError::validation("wheel_prizes", "prize table is empty"));
    }
    Ok(table)
}

/// Weighted draw over the table. Returns `None` only for an empty table,
/// which `parse_prize_table` already rejects.
pub fn draw_prize<R: Rng>(table: &[WheelPrize], rng: &mut R) -> Option<i64> {
    let total: u64 = table.iter().map(|p| u64::from(p.weight)).sum();
    if total == 0 {
        return None;
    }
    let mut pick = rng.gen_range(0..total);
    for prize in table {
        let weight = u64::from(prize.weight);
        if pick < weight {
            return Some(prize.tcoin);
        }
        pick -= weight;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::mock::StepRng;
    use rand::SeedableRng;

    #[test]
    fn parses_default_table() {
        let table = parse_prize_table("5:40,10:30,20:15,50:10,100:5").unwrap();
        assert_eq!(table.len(), 5);
        assert_eq!(table[0], WheelPrize { tcoin: 5, weight: 40 });
        assert_eq!(table[4], WheelPrize { tcoin: 100, weight: 5 });
    }

    #[test]
    fn bare_entries_get_unit_weight() {
        let table = parse_prize_table("5, 10, 25,").unwrap();
        assert_eq!(table.len(), 3);
        assert!(table.iter().all(|p| p.weight == 1));
    }

    #[test]
    fn rejects_garbage_tables() {
        assert!(parse_prize_table("").is_err());
        assert!(parse_prize_table("five:40").is_err());
        assert!(parse_prize_table("5:lots").is_err());
        assert!(parse_prize_table("0:10").is_err());
        assert!(parse_prize_table("-5:10").is_err());
        assert!(parse_prize_table("5:0").is_err());
    }

    #[test]
    fn draw_always_lands_on_the_table() {
        let table = parse_prize_table("5:40,10:30,20:15,50:10,100:5").unwrap();
        let legal: Vec<i64> = table.iter().map(|p| p.tcoin).collect();
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        for _ in 0..1000 {
            let prize = draw_prize(&table, &mut rng).unwrap();
            assert!(legal.contains(&prize));
        }
    }

    #[test]
    fn draw_respects_weight_boundaries() {
        let table = parse_prize_table("5:2,100:1").unwrap();
        // StepRng yields 0 forever: picks the first band.
        let mut rng = StepRng::new(0, 0);
        assert_eq!(draw_prize(&table, &mut rng), Some(5));
    }

    #[test]
    fn heavy_weights_dominate() {
        let table = parse_prize_table("5:999,100:1").unwrap();
        let mut rng = rand::rngs::StdRng::seed_from_u64(42);
        let small = (0..500)
            .filter(|_| draw_prize(&table, &mut rng) == Some(5))
            .count();
        assert!(small > 450);
    }
}
