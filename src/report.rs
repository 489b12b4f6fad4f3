use chrono::{DateTime, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;
use std::fs;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::engine::{BacktestSummary, RunReport, SignaledRow};

fn round(value: f64, dp: u32) -> Decimal {
    Decimal::from_f64(value)
        .unwrap_or_default()
        .round_dp_with_strategy(dp, RoundingStrategy::MidpointNearestEven)
}

/// Flat, ordered key/value view of a summary: money to 2 dp, win rate to 3 dp.
pub fn summary_map(summary: &BacktestSummary) -> Vec<(&'static str, Decimal)> {
    vec![
        ("trades", Decimal::from(summary.trades as u64)),
        ("total_pnl_usd", round(summary.total_pnl, 2)),
        ("avg_pnl", round(summary.avg_pnl, 2)),
        ("max_win", round(summary.max_win, 2)),
        ("max_loss", round(summary.max_loss, 2)),
        ("win_rate", round(summary.win_rate, 3)),
    ]
}

pub fn format_ts(ts_ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ts_ms)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| ts_ms.to_string())
}

pub fn render_summary(report: &RunReport) -> String {
    let mut out = String::new();
    out.push_str(&format!("model: {}\n", report.model));
    out.push_str(&format!(
        "parameter: {:.6}\n",
        report.parameter.value()
    ));
    if let Some(coint) = &report.cointegration {
        out.push_str(&format!(
            "cointegration: adf={:.4} lags={} p_value={:.4} (significance {}) half_life={:.2} bars\n",
            coint.statistic, coint.lags, coint.p_value, coint.significance, coint.half_life_bars
        ));
        if coint.tradeable() {
            out.push_str("Cointegrated, proceeding with pairs trading strategy.\n");
        } else {
            out.push_str("Not cointegrated, skip this pair.\n");
        }
    }
    out.push('\n');
    for (key, value) in summary_map(&report.backtest.summary) {
        out.push_str(&format!("{}: {}\n", key, value));
    }
    if let Some(last) = report.backtest.equity.last() {
        out.push_str(&format!(
            "cumulative_return: {}\n",
            round(last.cumulative_return, 4)
        ));
    }
    out
}

fn opt(value: Option<f64>) -> String {
    value
        .map(|v| format!("{:.4}", v))
        .unwrap_or_else(|| "-".to_string())
}

/// Last `n` rows as a fixed-width table.
pub fn render_tail(rows: &[SignaledRow], n: usize) -> String {
    let start = rows.len().saturating_sub(n);
    let mut out = format!(
        "{:<19} {:>12} {:>12} {:>10} {:>12} {:>12} {:>10} {:>10} {:<15}\n",
        "timestamp", "leg_a", "leg_b", "fx", "fair", "net_spread", "mean", "std", "signal"
    );
    for row in &rows[start..] {
        let fair = &row.adjusted.fair;
        out.push_str(&format!(
            "{:<19} {:>12.4} {:>12.4} {:>10} {:>12.4} {:>12.4} {:>10} {:>10} {:<15}\n",
            format_ts(fair.timestamp),
            fair.leg_a,
            fair.leg_b,
            opt(fair.fx),
            fair.fair,
            row.net_spread,
            opt(row.rolling_mean),
            opt(row.rolling_std),
            row.signal.label()
        ));
    }
    out
}

#[derive(Serialize)]
struct DumpRow<'a> {
    time: String,
    #[serde(flatten)]
    row: &'a SignaledRow,
    bar_pnl: f64,
    cumulative_pnl: f64,
    cumulative_return: f64,
}

#[derive(Serialize)]
struct DumpSummary<'a> {
    summary: serde_json::Map<String, serde_json::Value>,
    model: &'a str,
    #[serde(flatten)]
    status: &'a crate::engine::PairStatus,
}

/// Writes every augmented row as one JSON line, followed by a summary line.
pub fn write_jsonl(path: &Path, report: &RunReport) -> std::io::Result<PathBuf> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    for (i, row) in report.rows.iter().enumerate() {
        let mark = report.backtest.equity.get(i);
        let line = serde_json::to_string(&DumpRow {
            time: format_ts(row.timestamp()),
            row,
            bar_pnl: mark.map(|p| p.pnl).unwrap_or(0.0),
            cumulative_pnl: mark.map(|p| p.cumulative_pnl).unwrap_or(0.0),
            cumulative_return: mark.map(|p| p.cumulative_return).unwrap_or(0.0),
        })
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        writeln!(writer, "{line}")?;
    }
    let summary = summary_map(&report.backtest.summary)
        .into_iter()
        .map(|(k, v)| (k.to_string(), serde_json::Value::String(v.to_string())))
        .collect();
    let line = serde_json::to_string(&DumpSummary {
        summary,
        model: report.model,
        status: &report.status,
    })
    .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
    writeln!(writer, "{line}")?;
    writer.flush()?;
    Ok(path.to_path_buf())
}
