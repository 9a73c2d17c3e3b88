use crate::config::ConstituentSpec;
use crate::models::{LotAllocation, NormalizedLotTable};

// Ratios are snapped to this many decimals before rounding so that float
// noise (0.6 / 0.4 = 1.4999999999999998) doesn't flip a half.
const RATIO_PRECISION: f64 = 1e9;

/// Lot counts proportional to index weight, the lightest member getting one lot.
///
/// `lot_count = max(1, round(weight / min_weight))`, halves round away from zero.
/// An empty basket yields an empty table; callers validate the basket first.
pub fn allocate(constituents: &[ConstituentSpec]) -> NormalizedLotTable {
    let Some(min_weight) = constituents.iter().map(|c| c.weight).reduce(f64::min) else {
        return NormalizedLotTable::default();
    };
    if !min_weight.is_finite() || min_weight <= 0.0 {
        return NormalizedLotTable::default();
    }

    constituents
        .iter()
        .map(|c| {
            let ratio = ((c.weight / min_weight) * RATIO_PRECISION).round() / RATIO_PRECISION;
            let lot_count = (ratio.round() as u32).max(1);
            (
                c.symbol.clone(),
                LotAllocation {
                    lot_count,
                    lot_size: c.lot_size,
                    total_quantity: lot_count as u64 * c.lot_size as u64,
                    weight: c.weight,
                },
            )
        })
        .collect()
}
