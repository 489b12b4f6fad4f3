//! Alignment → fair value → cost adjustment → signals → backtest.
//!
//! Every stage consumes the previous stage's output by reference and returns
//! a fresh value; nothing upstream is mutated.

pub mod align;
pub mod backtest;
pub mod costs;
pub mod fair_value;
pub mod signals;
pub mod stats;

use serde::Serialize;

pub use align::{align, AlignedSeries, Bar, FX, LEG_A, LEG_B};
pub use backtest::{BacktestParams, BacktestResult, BacktestSummary, EquityPoint, Trade};
pub use costs::{apply_costs, CostAdjustedRow, CostParams, LegCosts};
pub use fair_value::{
    implied_price, CointegrationParams, CointegrationReport, FairValueModel, FairValueRow,
    ModelParameter, ParityParams,
};
pub use signals::{Signal, SignalRule, SignaledRow};

use crate::error::EngineResult;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineParams {
    pub model: FairValueModel,
    pub costs: CostParams,
    /// Parity model only.
    pub min_profit_threshold: f64,
    /// Cointegration model only.
    pub rolling_window: usize,
    pub backtest: BacktestParams,
}

impl Default for EngineParams {
    fn default() -> Self {
        Self {
            model: FairValueModel::Parity(ParityParams::default()),
            costs: CostParams::default(),
            min_profit_threshold: signals::DEFAULT_MIN_PROFIT_THRESHOLD,
            rolling_window: signals::DEFAULT_ROLLING_WINDOW,
            backtest: BacktestParams::default(),
        }
    }
}

impl EngineParams {
    pub fn signal_rule(&self) -> SignalRule {
        match self.model {
            FairValueModel::Parity(_) => SignalRule::NetSpread {
                min_profit_threshold: self.min_profit_threshold,
            },
            FairValueModel::Cointegration(_) => SignalRule::RollingBand {
                window: self.rolling_window,
            },
        }
    }
}

/// Advisory outcome of the cointegration gate. Not an error: a pair that
/// fails it still produces a report, just without signals.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PairStatus {
    Tradeable,
    NotCointegrated { p_value: f64, significance: f64 },
}

impl PairStatus {
    pub fn is_tradeable(&self) -> bool {
        matches!(self, PairStatus::Tradeable)
    }
}

/// Leg closes as delivered by a bar source, before alignment.
#[derive(Debug, Clone, Default)]
pub struct LegBars {
    pub leg_a: Vec<Bar>,
    pub leg_b: Vec<Bar>,
    pub fx: Option<Vec<Bar>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub model: &'static str,
    pub parameter: ModelParameter,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cointegration: Option<CointegrationReport>,
    pub status: PairStatus,
    pub warmup_rows: usize,
    pub rows: Vec<SignaledRow>,
    pub backtest: BacktestResult,
}

pub struct ArbEngine {
    params: EngineParams,
}

impl ArbEngine {
    pub fn new(params: EngineParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &EngineParams {
        &self.params
    }

    /// Aligns the legs the model needs, then runs the pipeline.
    pub fn run_bars(&self, legs: &LegBars) -> EngineResult<RunReport> {
        let mut inputs: Vec<(&str, &[Bar])> =
            vec![(LEG_A, legs.leg_a.as_slice()), (LEG_B, legs.leg_b.as_slice())];
        if self.params.model.required_columns().contains(&FX) {
            let fx = legs.fx.as_deref().unwrap_or(&[]);
            inputs.push((FX, fx));
        }
        let series = align(&inputs)?;
        log::info!(
            "[ENGINE] aligned {} rows ({} model)",
            series.len(),
            self.params.model.name()
        );
        self.run(&series)
    }

    pub fn run(&self, series: &AlignedSeries) -> EngineResult<RunReport> {
        let fair = self.params.model.compute(series)?;
        let adjusted = costs::adjust(&fair.rows, &self.params.costs)?;

        let status = match fair.cointegration {
            Some(report) if !report.tradeable() => PairStatus::NotCointegrated {
                p_value: report.p_value,
                significance: report.significance,
            },
            _ => PairStatus::Tradeable,
        };

        let rule = self.params.signal_rule();
        let (rows, warmup_rows) = if status.is_tradeable() {
            let rows = signals::generate(&adjusted, &rule)?;
            (rows, signals::warmup_rows(&rule, adjusted.len()))
        } else {
            log::warn!(
                "[ENGINE] pair is not cointegrated ({:?}), signal generation halted",
                status
            );
            (signals::halted(&adjusted), 0)
        };

        let backtest = backtest::run(&rows, &self.params.backtest)?;
        Ok(RunReport {
            model: self.params.model.name(),
            parameter: fair.parameter,
            cointegration: fair.cointegration,
            status,
            warmup_rows,
            rows,
            backtest,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Normal};

    const DAY_MS: i64 = 86_400_000;

    fn bars(values: &[f64]) -> Vec<Bar> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| Bar::new(i as i64 * DAY_MS, *v))
            .collect()
    }

    fn parity_engine() -> ArbEngine {
        ArbEngine::new(EngineParams::default())
    }

    #[test]
    fn three_bar_parity_scenario() {
        let legs = LegBars {
            leg_a: bars(&[100.0, 101.0, 99.0]),
            leg_b: bars(&[50.0, 50.0, 50.0]),
            fx: Some(bars(&[1.0, 1.0, 1.0])),
        };
        let report = parity_engine().run_bars(&legs).unwrap();
        assert_eq!(report.rows.len(), 3);
        assert_eq!(report.rows[0].net_spread, 50.0);
        assert_eq!(report.rows[0].signal, Signal::ShortALongB);

        let first = report.backtest.trades[0];
        assert_eq!(first.entry_index, 0);
        assert_eq!((first.entry_ts, first.exit_ts), (0, DAY_MS));
        assert_eq!(first.units, 10_000.0 / 50.0);
        assert_eq!(first.pnl, 200.0 * ((100.0 - 101.0) + (50.0 - 50.0)));

        // row 1 is still rich; row 2 has no next bar
        assert_eq!(report.backtest.trades.len(), 2);
        assert_eq!(report.backtest.trades[1].pnl, 200.0 * (101.0 - 99.0));
        assert!(report.status.is_tradeable());

        let curve: Vec<f64> = report
            .backtest
            .equity
            .iter()
            .map(|p| p.cumulative_pnl)
            .collect();
        assert_eq!(curve, vec![0.0, -200.0, 200.0]);
    }

    #[test]
    fn parity_requires_fx_leg() {
        let legs = LegBars {
            leg_a: bars(&[1.0, 2.0]),
            leg_b: bars(&[1.0, 2.0]),
            fx: None,
        };
        let err = parity_engine().run_bars(&legs).unwrap_err();
        assert!(matches!(err, EngineError::DataUnavailable { .. }));
    }

    #[test]
    fn parity_at_exact_parity_has_no_trades() {
        let legs = LegBars {
            leg_a: bars(&[20.0, 21.0, 22.0, 23.0]),
            leg_b: bars(&[10.0, 10.5, 11.0, 11.5]),
            fx: Some(bars(&[2.0, 2.0, 2.0, 2.0])),
        };
        let report = parity_engine().run_bars(&legs).unwrap();
        assert!(report.rows.iter().all(|r| r.signal == Signal::None));
        assert_eq!(report.backtest.summary, BacktestSummary::default());
    }

    fn cointegrated_legs(n: usize, seed: u64) -> LegBars {
        let mut rng = StdRng::seed_from_u64(seed);
        let step = Normal::new(0.0, 1.0).unwrap();
        let noise = Normal::new(0.0, 0.8).unwrap();
        let mut level = 60.0;
        let mut a = Vec::with_capacity(n);
        let mut b = Vec::with_capacity(n);
        for _ in 0..n {
            level += step.sample(&mut rng);
            b.push(level);
            a.push(0.8 * level + 10.0 + noise.sample(&mut rng));
        }
        LegBars {
            leg_a: bars(&a),
            leg_b: bars(&b),
            fx: None,
        }
    }

    fn cointegration_engine(significance: f64) -> ArbEngine {
        ArbEngine::new(EngineParams {
            model: FairValueModel::Cointegration(CointegrationParams { significance }),
            ..EngineParams::default()
        })
    }

    #[test]
    fn cointegrated_pair_trades_after_warmup() {
        let report = cointegration_engine(0.05)
            .run_bars(&cointegrated_legs(180, 3))
            .unwrap();
        assert!(report.status.is_tradeable());
        assert_eq!(report.warmup_rows, 29);
        assert!(report.rows[..29].iter().all(|r| r.rolling_mean.is_none()));
        assert!(report.rows[..29].iter().all(|r| r.signal == Signal::None));
        assert!(report.backtest.summary.trades > 0);
        assert!(report
            .backtest
            .trades
            .iter()
            .all(|t| t.entry_index >= 29 && t.entry_index < 179));
        match report.parameter {
            ModelParameter::HedgeRatio { beta, .. } => assert!((beta - 0.8).abs() < 0.1),
            other => panic!("unexpected parameter {other:?}"),
        }
    }

    #[test]
    fn negatively_hedged_pair_trades_every_signal() {
        let mut rng = StdRng::seed_from_u64(11);
        let step = Normal::new(0.0, 1.0).unwrap();
        let noise = Normal::new(0.0, 0.8).unwrap();
        let mut level = 100.0;
        let mut a = Vec::new();
        let mut b = Vec::new();
        for _ in 0..200 {
            level += step.sample(&mut rng);
            b.push(level);
            a.push(400.0 - 1.5 * level + noise.sample(&mut rng));
        }
        let legs = LegBars {
            leg_a: bars(&a),
            leg_b: bars(&b),
            fx: None,
        };
        let report = cointegration_engine(0.05).run_bars(&legs).unwrap();
        match report.parameter {
            ModelParameter::HedgeRatio { beta, .. } => assert!(beta < -1.0),
            other => panic!("unexpected parameter {other:?}"),
        }
        assert!(report.status.is_tradeable());
        assert!(report.rows.iter().all(|r| r.adjusted.adj_fair >= r.adjusted.fair.fair));

        let active = report.rows[..report.rows.len() - 1]
            .iter()
            .filter(|r| r.signal.is_active())
            .count();
        assert!(active > 0);
        assert_eq!(report.backtest.trades.len(), active);
        assert!(report
            .backtest
            .trades
            .iter()
            .any(|t| t.direction == Signal::ShortALongB));
    }

    #[test]
    fn failed_gate_halts_signals() {
        let report = cointegration_engine(1e-300)
            .run_bars(&cointegrated_legs(120, 5))
            .unwrap();
        assert!(!report.status.is_tradeable());
        assert!(report.rows.iter().all(|r| r.signal == Signal::None));
        assert_eq!(report.backtest.summary.trades, 0);
        assert_eq!(report.backtest.summary.total_pnl, 0.0);
    }

    #[test]
    fn reruns_are_deterministic() {
        let engine = cointegration_engine(0.05);
        let legs = cointegrated_legs(150, 9);
        let first = engine.run_bars(&legs).unwrap();
        let second = engine.run_bars(&legs).unwrap();
        assert_eq!(first.backtest, second.backtest);
    }
}
