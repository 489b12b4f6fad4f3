use serde::{Deserialize, Serialize};

use super::signals::{Signal, SignaledRow};
use crate::error::{EngineError, EngineResult};

pub const DEFAULT_TRADE_SIZE_USD: f64 = 10_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BacktestParams {
    /// Notional assigned to every signal; no compounding.
    pub trade_size_usd: f64,
}

impl Default for BacktestParams {
    fn default() -> Self {
        Self {
            trade_size_usd: DEFAULT_TRADE_SIZE_USD,
        }
    }
}

/// A one-bar pair trade: entered at the cost-loaded prices of bar `i`,
/// marked out at the raw prices of bar `i + 1`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Trade {
    pub entry_index: usize,
    pub entry_ts: i64,
    pub exit_ts: i64,
    pub direction: Signal,
    pub notional: f64,
    pub units: f64,
    pub entry_leg_a: f64,
    pub entry_fair: f64,
    pub exit_leg_a: f64,
    pub exit_fair: f64,
    pub pnl_leg_a: f64,
    pub pnl_leg_b: f64,
    pub pnl: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct BacktestSummary {
    pub trades: usize,
    pub total_pnl: f64,
    pub avg_pnl: f64,
    pub max_win: f64,
    pub max_loss: f64,
    pub win_rate: f64,
}

impl BacktestSummary {
    /// All statistics are zero when there are no trades.
    pub fn from_trades(trades: &[Trade]) -> Self {
        if trades.is_empty() {
            return Self::default();
        }
        let count = trades.len();
        let total_pnl: f64 = trades.iter().map(|t| t.pnl).sum();
        let max_win = trades
            .iter()
            .map(|t| t.pnl)
            .fold(f64::NEG_INFINITY, f64::max);
        let max_loss = trades.iter().map(|t| t.pnl).fold(f64::INFINITY, f64::min);
        let wins = trades.iter().filter(|t| t.pnl > 0.0).count();
        Self {
            trades: count,
            total_pnl,
            avg_pnl: total_pnl / count as f64,
            max_win,
            max_loss,
            win_rate: wins as f64 / count as f64,
        }
    }
}

/// Mark of the strategy at one bar. A trade's P&L lands on its exit bar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EquityPoint {
    pub timestamp: i64,
    pub pnl: f64,
    pub cumulative_pnl: f64,
    /// Compounded `pnl / notional` per bar.
    pub cumulative_return: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BacktestResult {
    pub trades: Vec<Trade>,
    pub summary: BacktestSummary,
    /// One point per input row.
    pub equity: Vec<EquityPoint>,
}

pub fn equity_curve(rows: &[SignaledRow], trades: &[Trade], notional: f64) -> Vec<EquityPoint> {
    let mut per_bar = vec![0.0; rows.len()];
    for trade in trades {
        if let Some(slot) = per_bar.get_mut(trade.entry_index + 1) {
            *slot += trade.pnl;
        }
    }
    let mut cumulative_pnl = 0.0;
    let mut growth = 1.0;
    rows.iter()
        .zip(per_bar)
        .map(|(row, pnl)| {
            cumulative_pnl += pnl;
            growth *= 1.0 + pnl / notional;
            EquityPoint {
                timestamp: row.timestamp(),
                pnl,
                cumulative_pnl,
                cumulative_return: growth - 1.0,
            }
        })
        .collect()
}

/// P&L of one signal held from `entry` to `exit`. The bought side sets the
/// unit count from its absolute price, so a fair value carried by a negative
/// hedge ratio still sizes a trade.
pub fn price_trade(
    direction: Signal,
    entry: &SignaledRow,
    exit: &SignaledRow,
    notional: f64,
) -> Option<(f64, f64, f64)> {
    let adj_a = entry.adjusted.adj_leg_a;
    let adj_fair = entry.adjusted.adj_fair;
    let next_a = exit.adjusted.fair.leg_a;
    let next_fair = exit.adjusted.fair.fair;
    let (units, pnl_a, pnl_b) = match direction {
        Signal::None => return None,
        Signal::ShortALongB => {
            let units = notional / adj_fair.abs();
            (units, adj_a - next_a, next_fair - adj_fair)
        }
        Signal::LongAShortB => {
            let units = notional / adj_a.abs();
            (units, next_a - adj_a, adj_fair - next_fair)
        }
    };
    if !(units.is_finite() && units > 0.0) {
        return None;
    }
    Some((units, units * pnl_a, units * pnl_b))
}

/// Walks every bar but the last; each active signal yields exactly one trade.
pub fn run(rows: &[SignaledRow], params: &BacktestParams) -> EngineResult<BacktestResult> {
    let notional = params.trade_size_usd;
    if !(notional.is_finite() && notional > 0.0) {
        return Err(EngineError::InvalidParameter(format!(
            "trade size must be positive, got {}",
            notional
        )));
    }

    let mut trades = Vec::new();
    for (i, pair) in rows.windows(2).enumerate() {
        let (row, next) = (&pair[0], &pair[1]);
        let direction = row.signal;
        if !direction.is_active() {
            continue;
        }
        let Some((units, pnl_leg_a, pnl_leg_b)) = price_trade(direction, row, next, notional)
        else {
            log::warn!(
                "[BACKTEST] skipping {} at {}: entry price is not positive",
                direction.label(),
                row.timestamp()
            );
            continue;
        };
        trades.push(Trade {
            entry_index: i,
            entry_ts: row.timestamp(),
            exit_ts: next.timestamp(),
            direction,
            notional,
            units,
            entry_leg_a: row.adjusted.adj_leg_a,
            entry_fair: row.adjusted.adj_fair,
            exit_leg_a: next.adjusted.fair.leg_a,
            exit_fair: next.adjusted.fair.fair,
            pnl_leg_a,
            pnl_leg_b,
            pnl: pnl_leg_a + pnl_leg_b,
        });
    }

    let summary = BacktestSummary::from_trades(&trades);
    let equity = equity_curve(rows, &trades, notional);
    log::info!(
        "[BACKTEST] trades={} total_pnl={:.2} win_rate={:.3}",
        summary.trades,
        summary.total_pnl,
        summary.win_rate
    );
    Ok(BacktestResult {
        trades,
        summary,
        equity,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::costs::CostAdjustedRow;
    use crate::engine::fair_value::FairValueRow;

    fn row(ts: i64, leg_a: f64, fair: f64, cost: f64, signal: Signal) -> SignaledRow {
        row_with_costs(ts, leg_a, fair, (cost, cost), signal)
    }

    fn row_with_costs(
        ts: i64,
        leg_a: f64,
        fair: f64,
        (cost_a, cost_b): (f64, f64),
        signal: Signal,
    ) -> SignaledRow {
        let adjusted = CostAdjustedRow {
            fair: FairValueRow {
                timestamp: ts,
                leg_a,
                leg_b: fair,
                fx: Some(1.0),
                fair,
                parameter: 1.0,
                residual: None,
            },
            adj_leg_a: leg_a * (1.0 + cost_a),
            adj_fair: fair * (1.0 + cost_b),
        };
        SignaledRow {
            adjusted,
            gross_spread: leg_a - fair,
            net_spread: adjusted.net_spread(),
            rolling_mean: None,
            rolling_std: None,
            signal,
        }
    }

    #[test]
    fn no_signals_means_zero_summary() {
        let rows = vec![
            row(1, 10.0, 10.0, 0.0, Signal::None),
            row(2, 11.0, 10.0, 0.0, Signal::None),
            row(3, 12.0, 10.0, 0.0, Signal::None),
        ];
        let result = run(&rows, &BacktestParams::default()).unwrap();
        assert!(result.trades.is_empty());
        assert_eq!(result.summary, BacktestSummary::default());
        assert_eq!(result.summary.total_pnl, 0.0);
        assert_eq!(result.summary.win_rate, 0.0);
    }

    #[test]
    fn last_bar_never_trades() {
        let rows = vec![
            row(1, 10.0, 10.0, 0.0, Signal::None),
            row(2, 11.0, 10.0, 0.0, Signal::ShortALongB),
        ];
        let result = run(&rows, &BacktestParams::default()).unwrap();
        assert!(result.trades.is_empty());
        assert!(run(&[], &BacktestParams::default())
            .unwrap()
            .trades
            .is_empty());
    }

    #[test]
    fn short_a_trade_matches_formula() {
        let rows = vec![
            row(1, 100.0, 50.0, 0.0, Signal::ShortALongB),
            row(2, 101.0, 50.0, 0.0, Signal::None),
        ];
        let result = run(&rows, &BacktestParams::default()).unwrap();
        assert_eq!(result.trades.len(), 1);
        let t = result.trades[0];
        assert_eq!(t.units, 200.0);
        assert_eq!(t.pnl, 200.0 * ((100.0 - 101.0) + (50.0 - 50.0)));
        assert_eq!((t.entry_ts, t.exit_ts), (1, 2));
    }

    #[test]
    fn long_a_trade_is_mirror_image() {
        let rows = vec![
            row(1, 40.0, 50.0, 0.0, Signal::LongAShortB),
            row(2, 45.0, 48.0, 0.0, Signal::None),
        ];
        let result = run(&rows, &BacktestParams { trade_size_usd: 1_000.0 }).unwrap();
        let t = result.trades[0];
        assert_eq!(t.units, 25.0);
        assert_eq!(t.pnl_leg_a, 25.0 * 5.0);
        assert_eq!(t.pnl_leg_b, 25.0 * 2.0);
        assert_eq!(t.pnl, 175.0);
    }

    #[test]
    fn bought_leg_costs_reduce_pnl() {
        let params = BacktestParams::default();
        let free = vec![
            row(1, 40.0, 50.0, 0.0, Signal::LongAShortB),
            row(2, 45.0, 48.0, 0.0, Signal::None),
        ];
        let loaded = vec![
            row_with_costs(1, 40.0, 50.0, (0.0025, 0.0), Signal::LongAShortB),
            row(2, 45.0, 48.0, 0.0, Signal::None),
        ];
        let free = run(&free, &params).unwrap().summary.total_pnl;
        let loaded = run(&loaded, &params).unwrap().summary.total_pnl;
        assert!(loaded < free);
    }

    #[test]
    fn sold_leg_costs_inflate_pnl() {
        // costs load the sold leg upward too, which flatters the short side
        let params = BacktestParams::default();
        let free = vec![
            row(1, 40.0, 50.0, 0.0, Signal::LongAShortB),
            row(2, 45.0, 48.0, 0.0, Signal::None),
        ];
        let loaded = vec![
            row_with_costs(1, 40.0, 50.0, (0.0, 0.0075), Signal::LongAShortB),
            row(2, 45.0, 48.0, 0.0, Signal::None),
        ];
        let free = run(&free, &params).unwrap().summary.total_pnl;
        let loaded = run(&loaded, &params).unwrap().summary.total_pnl;
        assert!(loaded > free);
    }

    #[test]
    fn summary_statistics() {
        let rows = vec![
            row(1, 100.0, 50.0, 0.0, Signal::ShortALongB),
            row(2, 101.0, 50.0, 0.0, Signal::ShortALongB),
            row(3, 99.0, 50.0, 0.0, Signal::LongAShortB),
            row(4, 99.0, 50.0, 0.0, Signal::None),
        ];
        let result = run(&rows, &BacktestParams::default()).unwrap();
        let s = result.summary;
        assert_eq!(s.trades, 3);
        assert_eq!(s.total_pnl, -200.0 + 400.0 + 0.0);
        assert!((s.avg_pnl - 200.0 / 3.0).abs() < 1e-9);
        assert_eq!(s.max_win, 400.0);
        assert_eq!(s.max_loss, -200.0);
        assert!((s.win_rate - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn repeated_runs_are_identical() {
        let rows: Vec<SignaledRow> = (0..20)
            .map(|i| {
                let signal = match i % 3 {
                    0 => Signal::ShortALongB,
                    1 => Signal::LongAShortB,
                    _ => Signal::None,
                };
                row(i, 100.0 + (i as f64).sin(), 99.0 + (i as f64).cos(), 0.001, signal)
            })
            .collect();
        let params = BacktestParams::default();
        let first = run(&rows, &params).unwrap();
        let second = run(&rows, &params).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn negative_hedge_value_still_trades() {
        let rows = vec![
            row(1, 250.0, -150.0, 0.0, Signal::ShortALongB),
            row(2, 248.0, -151.0, 0.0, Signal::LongAShortB),
            row(3, 251.0, -149.0, 0.0, Signal::None),
        ];
        let result = run(&rows, &BacktestParams::default()).unwrap();
        assert_eq!(result.trades.len(), 2);

        let short = result.trades[0];
        assert!((short.units - 10_000.0 / 150.0).abs() < 1e-9);
        assert!((short.pnl_leg_a - short.units * 2.0).abs() < 1e-9);
        assert!((short.pnl_leg_b - short.units * -1.0).abs() < 1e-9);

        let long = result.trades[1];
        assert!((long.units - 10_000.0 / 248.0).abs() < 1e-9);
    }

    #[test]
    fn equity_curve_books_pnl_on_exit_bar() {
        let rows = vec![
            row(1, 100.0, 50.0, 0.0, Signal::ShortALongB),
            row(2, 101.0, 50.0, 0.0, Signal::ShortALongB),
            row(3, 99.0, 50.0, 0.0, Signal::None),
        ];
        let result = run(&rows, &BacktestParams::default()).unwrap();
        let pnl: Vec<f64> = result.equity.iter().map(|p| p.pnl).collect();
        let cumulative: Vec<f64> = result.equity.iter().map(|p| p.cumulative_pnl).collect();
        assert_eq!(pnl, vec![0.0, -200.0, 400.0]);
        assert_eq!(cumulative, vec![0.0, -200.0, 200.0]);
        assert_eq!(result.equity[2].timestamp, 3);
        assert_eq!(result.equity[0].cumulative_return, 0.0);
        assert!((result.equity[2].cumulative_return - (0.98 * 1.04 - 1.0)).abs() < 1e-12);
        assert_eq!(
            result.equity.last().map(|p| p.cumulative_pnl),
            Some(result.summary.total_pnl)
        );
    }

    #[test]
    fn rejects_non_positive_notional() {
        let rows = vec![row(1, 1.0, 1.0, 0.0, Signal::None)];
        assert!(run(&rows, &BacktestParams { trade_size_usd: 0.0 }).is_err());
    }
}
