use async_trait::async_trait;
use chrono::{Duration, NaiveDate, NaiveTime};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::engine::Bar;
use crate::error::{EngineError, EngineResult};

/// Inclusive calendar range in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn lookback(end: NaiveDate, days: u32) -> Self {
        Self {
            start: end - Duration::days(days as i64),
            end,
        }
    }

    fn bounds_ms(&self) -> (i64, i64) {
        let start = self.start.and_time(NaiveTime::MIN).and_utc();
        let end = (self.end + Duration::days(1)).and_time(NaiveTime::MIN).and_utc();
        (start.timestamp_millis(), end.timestamp_millis())
    }

    pub fn contains_ms(&self, ts: i64) -> bool {
        let (lo, hi) = self.bounds_ms();
        ts >= lo && ts < hi
    }
}

/// Supplies daily closes for one symbol, ascending by timestamp.
#[async_trait]
pub trait BarSource: Send + Sync {
    async fn fetch(&self, symbol: &str, range: &DateRange) -> EngineResult<Vec<Bar>>;
}

// One bar of a provider aggregates response
#[derive(Debug, Clone, Deserialize)]
struct AggregateBar {
    t: i64,
    c: f64,
    #[serde(default)]
    v: Option<f64>,
}

/// Replays bars saved to disk, either as JSONL (`{"timestamp","close","volume"}`
/// per line) or as a raw provider aggregates response (`{"results":[{"t","c","v"}]}`).
#[derive(Debug, Default, Clone)]
pub struct FileBarSource {
    files: HashMap<String, PathBuf>,
}

impl FileBarSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, symbol: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.files.insert(symbol.into(), path.into());
        self
    }

    pub fn path_for(&self, symbol: &str) -> Option<&Path> {
        self.files.get(symbol).map(PathBuf::as_path)
    }
}

pub fn parse_jsonl(symbol: &str, text: &str) -> EngineResult<Vec<Bar>> {
    let mut bars = Vec::new();
    for (lineno, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let bar: Bar = serde_json::from_str(line).map_err(|e| {
            EngineError::unavailable(
                symbol,
                format!("failed to parse line {} '{}': {}", lineno + 1, line, e),
            )
        })?;
        bars.push(bar);
    }
    Ok(bars)
}

/// A response without a non-empty `results` array is unavailable; the raw
/// payload is kept in the error.
pub fn parse_aggregates(symbol: &str, text: &str) -> EngineResult<Vec<Bar>> {
    let payload: serde_json::Value = serde_json::from_str(text).map_err(|e| {
        EngineError::unavailable(symbol, format!("invalid provider response: {}", e))
    })?;
    let results = match payload.get("results") {
        Some(serde_json::Value::Array(items)) if !items.is_empty() => items.clone(),
        _ => return Err(EngineError::unavailable(symbol, payload.to_string())),
    };
    let bars: Vec<AggregateBar> = serde_json::from_value(serde_json::Value::Array(results))
        .map_err(|e| EngineError::unavailable(symbol, format!("malformed result bar: {}", e)))?;
    Ok(bars
        .into_iter()
        .map(|b| Bar {
            timestamp: b.t,
            close: b.c,
            volume: b.v,
        })
        .collect())
}

#[async_trait]
impl BarSource for FileBarSource {
    async fn fetch(&self, symbol: &str, range: &DateRange) -> EngineResult<Vec<Bar>> {
        let path = self
            .path_for(symbol)
            .ok_or_else(|| EngineError::unavailable(symbol, "no file configured"))?;
        let text = tokio::fs::read_to_string(path).await.map_err(|e| {
            EngineError::unavailable(symbol, format!("failed to read {}: {}", path.display(), e))
        })?;
        let is_jsonl = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("jsonl"))
            .unwrap_or(false);
        let mut bars = if is_jsonl {
            parse_jsonl(symbol, &text)?
        } else {
            parse_aggregates(symbol, &text)?
        };
        let total = bars.len();
        bars.retain(|b| range.contains_ms(b.timestamp));
        bars.sort_by_key(|b| b.timestamp);
        if bars.is_empty() {
            return Err(EngineError::unavailable(
                symbol,
                format!(
                    "no bars between {} and {} ({} in file)",
                    range.start, range.end, total
                ),
            ));
        }
        log::debug!(
            "[SOURCE] {} loaded {} of {} bars from {}",
            symbol,
            bars.len(),
            total,
            path.display()
        );
        Ok(bars)
    }
}
