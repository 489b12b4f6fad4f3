use serde::Serialize;

use super::align::{AlignedSeries, FX, LEG_A, LEG_B};
use super::stats;
use crate::error::{EngineError, EngineResult};

pub const DEFAULT_CONVERSION_RATIO: f64 = 1.0;
pub const DEFAULT_SIGNIFICANCE: f64 = 0.05;

/// Leg-A equivalent of a leg-B price: `(other * fx) / ratio`.
pub fn implied_price(other_leg_price: f64, fx_rate: f64, conversion_ratio: f64) -> f64 {
    (other_leg_price * fx_rate) / conversion_ratio
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ParityParams {
    pub conversion_ratio: f64,
}

impl Default for ParityParams {
    fn default() -> Self {
        Self {
            conversion_ratio: DEFAULT_CONVERSION_RATIO,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CointegrationParams {
    pub significance: f64,
}

impl Default for CointegrationParams {
    fn default() -> Self {
        Self {
            significance: DEFAULT_SIGNIFICANCE,
        }
    }
}

/// The two interchangeable fair-value strategies.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FairValueModel {
    Parity(ParityParams),
    Cointegration(CointegrationParams),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelParameter {
    ConversionRatio { ratio: f64 },
    HedgeRatio { beta: f64, alpha: f64 },
}

impl ModelParameter {
    /// The scalar used to map leg B into leg-A terms.
    pub fn value(&self) -> f64 {
        match self {
            ModelParameter::ConversionRatio { ratio } => *ratio,
            ModelParameter::HedgeRatio { beta, .. } => *beta,
        }
    }
}

/// Implied leg-A value for one timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FairValueRow {
    pub timestamp: i64,
    pub leg_a: f64,
    pub leg_b: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fx: Option<f64>,
    /// Parity: implied price. Cointegration: `beta * leg_b`.
    pub fair: f64,
    pub parameter: f64,
    /// Cointegration only: `leg_a - alpha - beta * leg_b`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub residual: Option<f64>,
}

impl FairValueRow {
    /// `leg_a - fair`; for the cointegration model this is the spread.
    pub fn gross_spread(&self) -> f64 {
        self.leg_a - self.fair
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CointegrationReport {
    pub statistic: f64,
    pub p_value: f64,
    pub lags: usize,
    pub crit_1pct: f64,
    pub crit_5pct: f64,
    pub crit_10pct: f64,
    pub half_life_bars: f64,
    pub significance: f64,
}

impl CointegrationReport {
    pub fn tradeable(&self) -> bool {
        self.p_value < self.significance
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FairValue {
    pub rows: Vec<FairValueRow>,
    pub parameter: ModelParameter,
    pub cointegration: Option<CointegrationReport>,
}

impl FairValueModel {
    pub fn name(&self) -> &'static str {
        match self {
            FairValueModel::Parity(_) => "parity",
            FairValueModel::Cointegration(_) => "cointegration",
        }
    }

    /// Columns the model reads from the aligned series.
    pub fn required_columns(&self) -> &'static [&'static str] {
        match self {
            FairValueModel::Parity(_) => &[LEG_A, LEG_B, FX],
            FairValueModel::Cointegration(_) => &[LEG_A, LEG_B],
        }
    }

    pub fn compute(&self, series: &AlignedSeries) -> EngineResult<FairValue> {
        match self {
            FairValueModel::Parity(params) => parity(series, params),
            FairValueModel::Cointegration(params) => cointegration(series, params),
        }
    }
}

fn parity(series: &AlignedSeries, params: &ParityParams) -> EngineResult<FairValue> {
    let ratio = params.conversion_ratio;
    if !(ratio.is_finite() && ratio > 0.0) {
        return Err(EngineError::InvalidParameter(format!(
            "conversion ratio must be positive, got {}",
            ratio
        )));
    }
    let leg_a = series.require(LEG_A)?;
    let leg_b = series.require(LEG_B)?;
    let fx = series.require(FX)?;

    let rows = series
        .timestamps()
        .iter()
        .enumerate()
        .map(|(i, &timestamp)| FairValueRow {
            timestamp,
            leg_a: leg_a[i],
            leg_b: leg_b[i],
            fx: Some(fx[i]),
            fair: implied_price(leg_b[i], fx[i], ratio),
            parameter: ratio,
            residual: None,
        })
        .collect();
    Ok(FairValue {
        rows,
        parameter: ModelParameter::ConversionRatio { ratio },
        cointegration: None,
    })
}

/// Hedge ratio is fit once over the whole sample; later bars influence
/// earlier fair values.
fn cointegration(series: &AlignedSeries, params: &CointegrationParams) -> EngineResult<FairValue> {
    let leg_a = series.require(LEG_A)?;
    let leg_b = series.require(LEG_B)?;
    let fit = stats::ols(leg_a, leg_b).ok_or_else(|| {
        EngineError::InvalidParameter(format!(
            "cannot fit hedge ratio over {} rows: leg B has no variance",
            series.len()
        ))
    })?;

    let resid: Vec<f64> = leg_a
        .iter()
        .zip(leg_b)
        .map(|(a, b)| a - fit.alpha - fit.beta * b)
        .collect();
    let spread: Vec<f64> = leg_a
        .iter()
        .zip(leg_b)
        .map(|(a, b)| a - fit.beta * b)
        .collect();

    let (statistic, lags, nobs) = match stats::adf_no_constant(&resid) {
        Some(adf) => (adf.statistic, adf.lags, adf.nobs),
        None => {
            log::warn!(
                "[COINT] only {} rows, too few for a unit-root test",
                resid.len()
            );
            (f64::NAN, 0, resid.len().saturating_sub(1))
        }
    };
    if statistic == f64::NEG_INFINITY {
        log::warn!("[COINT] legs are exactly collinear, residuals have no variance");
    }
    let p_value = stats::engle_granger_p_value(statistic, nobs);
    let (crit_1pct, crit_5pct, crit_10pct) = stats::engle_granger_crits(nobs);
    let report = CointegrationReport {
        statistic,
        p_value,
        lags,
        crit_1pct,
        crit_5pct,
        crit_10pct,
        half_life_bars: stats::half_life(&spread),
        significance: params.significance,
    };
    log::info!(
        "[COINT] beta={:.6} alpha={:.6} adf={:.4} lags={} p={:.4} half_life={:.2}",
        fit.beta,
        fit.alpha,
        report.statistic,
        report.lags,
        report.p_value,
        report.half_life_bars
    );

    let rows = series
        .timestamps()
        .iter()
        .enumerate()
        .map(|(i, &timestamp)| FairValueRow {
            timestamp,
            leg_a: leg_a[i],
            leg_b: leg_b[i],
            fx: None,
            fair: fit.beta * leg_b[i],
            parameter: fit.beta,
            residual: Some(resid[i]),
        })
        .collect();
    Ok(FairValue {
        rows,
        parameter: ModelParameter::HedgeRatio {
            beta: fit.beta,
            alpha: fit.alpha,
        },
        cointegration: Some(report),
    })
}
