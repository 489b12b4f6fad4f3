use serde::{Deserialize, Serialize};

use super::fair_value::FairValueRow;
use crate::error::{EngineError, EngineResult};

/// `price * (1 + spread + commission + extra)` for a positive price.
///
/// Costs scale with the magnitude, so a negative hedge value (a fair value
/// built from a negative beta) is also loaded upward. Loads the price upward
/// whether the leg is bought or sold. Selling at a loaded price overstates
/// proceeds; kept as a modelling approximation.
pub fn apply_costs(price: f64, spread: f64, commission: f64, extra: f64) -> f64 {
    price + price.abs() * (spread + commission + extra)
}

/// Fractional frictions for one leg. `extra` covers levies such as stamp duty.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LegCosts {
    pub spread: f64,
    pub commission: f64,
    #[serde(default)]
    pub extra: f64,
}

impl LegCosts {
    pub fn new(spread: f64, commission: f64, extra: f64) -> Self {
        Self {
            spread,
            commission,
            extra,
        }
    }

    pub fn total_fraction(&self) -> f64 {
        self.spread + self.commission + self.extra
    }

    pub fn apply(&self, price: f64) -> f64 {
        apply_costs(price, self.spread, self.commission, self.extra)
    }

    pub fn validate(&self, leg: &str) -> EngineResult<()> {
        for (name, v) in [
            ("spread", self.spread),
            ("commission", self.commission),
            ("extra", self.extra),
        ] {
            if !(v.is_finite() && v >= 0.0) {
                return Err(EngineError::InvalidParameter(format!(
                    "{} {} cost fraction must be non-negative, got {}",
                    leg, name, v
                )));
            }
        }
        Ok(())
    }
}

/// Leg A is loaded with `leg_a` costs; the fair value stands in for the
/// leg-B side and is loaded with `leg_b` costs.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CostParams {
    pub leg_a: LegCosts,
    pub leg_b: LegCosts,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CostAdjustedRow {
    #[serde(flatten)]
    pub fair: FairValueRow,
    pub adj_leg_a: f64,
    pub adj_fair: f64,
}

impl CostAdjustedRow {
    /// `adj_leg_a - adj_fair`: positive when leg A is rich after costs.
    pub fn net_spread(&self) -> f64 {
        self.adj_leg_a - self.adj_fair
    }
}

pub fn adjust(rows: &[FairValueRow], costs: &CostParams) -> EngineResult<Vec<CostAdjustedRow>> {
    costs.leg_a.validate("leg A")?;
    costs.leg_b.validate("leg B")?;
    Ok(rows
        .iter()
        .map(|row| CostAdjustedRow {
            fair: *row,
            adj_leg_a: costs.leg_a.apply(row.leg_a),
            adj_fair: costs.leg_b.apply(row.fair),
        })
        .collect())
}
