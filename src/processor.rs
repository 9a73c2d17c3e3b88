use crate::models::{
    ConstituentQuote, InstrumentQuote, LevelPremium, MoneynessLevel, NormalizedLotTable,
};
use std::collections::BTreeMap;
use tracing::debug;

// -----------------------------------------------
// NET PREMIUM
// -----------------------------------------------

/// Index straddle premium for one lot minus the weighted basket straddle premium.
///
/// Returns `None` when the level can't be priced this cycle: no index straddle,
/// an empty lot table, or no basket member quoted at the level. Members that
/// are missing while others are quoted contribute zero.
pub fn compute_net_premium(
    level: MoneynessLevel,
    index_lot_size: u32,
    index: &InstrumentQuote,
    constituents: &BTreeMap<String, ConstituentQuote>,
    lots: &NormalizedLotTable,
) -> Option<LevelPremium> {
    let index_straddle = index.straddle(level)?;
    if lots.is_empty() {
        return None;
    }

    let mut quoted = 0usize;
    let mut constituent_premium = 0.0;
    for (symbol, allocation) in lots.iter() {
        let Some(straddle) = constituents
            .get(symbol)
            .and_then(|c| c.quote.straddle(level))
        else {
            continue;
        };
        quoted += 1;
        constituent_premium += allocation.total_quantity as f64 * straddle;
    }

    if quoted == 0 {
        return None;
    }

    let index_premium = index_lot_size as f64 * index_straddle;
    Some(LevelPremium {
        index_straddle,
        index_premium,
        constituent_premium,
        net_premium: index_premium - constituent_premium,
    })
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregationResult {
    /// Every level; frozen ones carry the previous value.
    pub net_premium: BTreeMap<MoneynessLevel, f64>,
    /// Only the levels priced this cycle.
    pub computed: BTreeMap<MoneynessLevel, LevelPremium>,
    pub frozen: Vec<MoneynessLevel>,
}

/// Runs every level independently, keeping `previous` for levels that can't be priced.
pub fn compute_all_levels(
    index_lot_size: u32,
    index: &InstrumentQuote,
    constituents: &BTreeMap<String, ConstituentQuote>,
    lots: &NormalizedLotTable,
    previous: &BTreeMap<MoneynessLevel, f64>,
) -> AggregationResult {
    let mut result = AggregationResult::default();

    for level in MoneynessLevel::ALL {
        match compute_net_premium(level, index_lot_size, index, constituents, lots) {
            Some(premium) => {
                result.net_premium.insert(level, premium.net_premium);
                result.computed.insert(level, premium);
            }
            None => {
                debug!(%level, "level not priced this cycle, keeping previous value");
                result.freeze(level, previous);
            }
        }
    }

    result
}

/// Every level keeps `previous`. Used when the index quote wasn't refreshed this cycle.
pub fn freeze_all_levels(previous: &BTreeMap<MoneynessLevel, f64>) -> AggregationResult {
    let mut result = AggregationResult::default();
    for level in MoneynessLevel::ALL {
        result.freeze(level, previous);
    }
    result
}

impl AggregationResult {
    fn freeze(&mut self, level: MoneynessLevel, previous: &BTreeMap<MoneynessLevel, f64>) {
        self.net_premium
            .insert(level, previous.get(&level).copied().unwrap_or(0.0));
        self.frozen.push(level);
    }
}

// -----------------------------------------------
// STRIKE LADDER
// -----------------------------------------------

/// Closest listed strike to `spot`, ties go to the lower strike.
pub fn find_atm_strike(strikes: &[f64], spot: f64) -> Option<f64> {
    let mut closest: Option<(f64, f64)> = None;

    for &strike in strikes {
        let distance = (strike - spot).abs();
        closest = match closest {
            Some((best, best_distance))
                if distance > best_distance || (distance == best_distance && strike >= best) =>
            {
                Some((best, best_distance))
            }
            _ => Some((strike, distance)),
        };
    }

    closest.map(|(strike, _)| strike)
}

/// Smallest gap between adjacent listed strikes. Holes in the ladder only widen gaps.
pub fn strike_interval(strikes: &[f64]) -> Option<f64> {
    let mut sorted: Vec<f64> = strikes.iter().copied().filter(|s| s.is_finite()).collect();
    sorted.sort_by(|a, b| a.total_cmp(b));
    sorted.dedup();

    sorted
        .windows(2)
        .map(|w| w[1] - w[0])
        .filter(|gap| *gap > 0.0)
        .min_by(|a, b| a.total_cmp(b))
}

pub fn level_strike(atm_strike: f64, interval: f64, level: MoneynessLevel) -> f64 {
    atm_strike + interval * level.offset() as f64
}
