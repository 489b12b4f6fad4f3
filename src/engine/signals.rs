use serde::{Deserialize, Serialize};

use super::costs::CostAdjustedRow;
use super::stats;
use crate::error::{EngineError, EngineResult};

pub const DEFAULT_MIN_PROFIT_THRESHOLD: f64 = 0.0;
pub const DEFAULT_ROLLING_WINDOW: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    #[default]
    None,
    /// Buy leg A, sell leg B.
    LongAShortB,
    /// Sell leg A, buy leg B.
    ShortALongB,
}

impl Signal {
    pub fn is_active(&self) -> bool {
        !matches!(self, Signal::None)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Signal::None => "none",
            Signal::LongAShortB => "long_a_short_b",
            Signal::ShortALongB => "short_a_long_b",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum SignalRule {
    /// Fire on the cost-adjusted divergence beyond a fixed threshold.
    NetSpread { min_profit_threshold: f64 },
    /// Fire when the spread leaves its trailing mean +/- one std band.
    RollingBand { window: usize },
}

impl SignalRule {
    fn validate(&self) -> EngineResult<()> {
        match *self {
            SignalRule::NetSpread {
                min_profit_threshold,
            } if !(min_profit_threshold.is_finite() && min_profit_threshold >= 0.0) => {
                Err(EngineError::InvalidParameter(format!(
                    "min profit threshold must be non-negative, got {}",
                    min_profit_threshold
                )))
            }
            SignalRule::RollingBand { window } if window < 2 => Err(
                EngineError::InvalidParameter(format!("rolling window must be >= 2, got {}", window)),
            ),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SignaledRow {
    #[serde(flatten)]
    pub adjusted: CostAdjustedRow,
    pub gross_spread: f64,
    pub net_spread: f64,
    pub rolling_mean: Option<f64>,
    pub rolling_std: Option<f64>,
    pub signal: Signal,
}

impl SignaledRow {
    pub fn timestamp(&self) -> i64 {
        self.adjusted.fair.timestamp
    }
}

/// Strict inequalities on both sides, so at most one direction fires.
pub fn net_spread_signal(net_spread: f64, min_profit_threshold: f64) -> Signal {
    if net_spread > min_profit_threshold {
        Signal::ShortALongB
    } else if net_spread < -min_profit_threshold {
        Signal::LongAShortB
    } else {
        Signal::None
    }
}

/// A flat band (std ~ 0) never fires.
pub fn band_signal(spread: f64, mean: f64, std: f64) -> Signal {
    if stats::is_flat(std) {
        Signal::None
    } else if spread < mean - std {
        Signal::LongAShortB
    } else if spread > mean + std {
        Signal::ShortALongB
    } else {
        Signal::None
    }
}

/// Each row's signal depends only on that row and earlier rows.
pub fn generate(rows: &[CostAdjustedRow], rule: &SignalRule) -> EngineResult<Vec<SignaledRow>> {
    rule.validate()?;
    let out: Vec<SignaledRow> = match *rule {
        SignalRule::NetSpread {
            min_profit_threshold,
        } => rows
            .iter()
            .map(|row| {
                let net_spread = row.net_spread();
                SignaledRow {
                    adjusted: *row,
                    gross_spread: row.fair.gross_spread(),
                    net_spread,
                    rolling_mean: None,
                    rolling_std: None,
                    signal: net_spread_signal(net_spread, min_profit_threshold),
                }
            })
            .collect(),
        SignalRule::RollingBand { window } => {
            let spread: Vec<f64> = rows.iter().map(|r| r.fair.gross_spread()).collect();
            if rows.len() < window {
                log::warn!(
                    "[SIGNAL] {} rows is shorter than the {}-bar window, no bar can signal",
                    rows.len(),
                    window
                );
            }
            let bands = stats::rolling_mean_std(&spread, window);
            rows.iter()
                .zip(spread.iter())
                .zip(bands)
                .map(|((row, &s), band)| SignaledRow {
                    adjusted: *row,
                    gross_spread: s,
                    net_spread: row.net_spread(),
                    rolling_mean: band.map(|(m, _)| m),
                    rolling_std: band.map(|(_, sd)| sd),
                    signal: band
                        .map(|(m, sd)| band_signal(s, m, sd))
                        .unwrap_or(Signal::None),
                })
                .collect()
        }
    };
    let active = out.iter().filter(|r| r.signal.is_active()).count();
    log::debug!("[SIGNAL] {} of {} rows carry a signal", active, out.len());
    Ok(out)
}

/// Rows with every signal cleared, used when the pair fails gating.
pub fn halted(rows: &[CostAdjustedRow]) -> Vec<SignaledRow> {
    rows.iter()
        .map(|row| SignaledRow {
            adjusted: *row,
            gross_spread: row.fair.gross_spread(),
            net_spread: row.net_spread(),
            rolling_mean: None,
            rolling_std: None,
            signal: Signal::None,
        })
        .collect()
}

/// Number of leading rows that cannot carry a band signal.
pub fn warmup_rows(rule: &SignalRule, len: usize) -> usize {
    match *rule {
        SignalRule::NetSpread { .. } => 0,
        SignalRule::RollingBand { window } => window.saturating_sub(1).min(len),
    }
}
