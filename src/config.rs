use anyhow::{anyhow, bail, Context, Result};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use std::env;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::engine::backtest::DEFAULT_TRADE_SIZE_USD;
use crate::engine::fair_value::{DEFAULT_CONVERSION_RATIO, DEFAULT_SIGNIFICANCE};
use crate::engine::signals::{DEFAULT_MIN_PROFIT_THRESHOLD, DEFAULT_ROLLING_WINDOW};
use crate::engine::{
    BacktestParams, CointegrationParams, CostParams, EngineParams, FairValueModel, LegCosts,
    ParityParams,
};
use crate::ports::bar_source::{DateRange, FileBarSource};

const DEFAULT_MODEL: &str = "parity";
const DEFAULT_LEG_A_SYMBOL: &str = "TM";
const DEFAULT_LEG_B_SYMBOL: &str = "TOYOF";
const DEFAULT_FX_SYMBOL: &str = "C:GBPUSD";
const DEFAULT_DATA_DIR: &str = "data";
const DEFAULT_SPREAD_A: f64 = 0.002;
const DEFAULT_SPREAD_B: f64 = 0.002;
const DEFAULT_COMMISSION_A: f64 = 0.0005;
const DEFAULT_COMMISSION_B: f64 = 0.0005;
const DEFAULT_EXTRA_A: f64 = 0.0;
// UK stamp duty on the ordinary leg
const DEFAULT_EXTRA_B: f64 = 0.005;
const DEFAULT_LOOKBACK_DAYS: u32 = 180;
const DEFAULT_TAIL_ROWS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    Parity,
    Cointegration,
}

impl FromStr for ModelKind {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "parity" => Ok(ModelKind::Parity),
            "cointegration" | "coint" => Ok(ModelKind::Cointegration),
            other => Err(anyhow!("unknown model '{}'", other)),
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(rename_all = "snake_case")]
struct LegYaml {
    symbol: Option<String>,
    file: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(rename_all = "snake_case")]
struct CostYaml {
    spread: Option<f64>,
    commission: Option<f64>,
    extra: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
struct PairArbYaml {
    model: Option<String>,
    data_dir: Option<String>,
    leg_a: Option<LegYaml>,
    leg_b: Option<LegYaml>,
    fx: Option<LegYaml>,
    conversion_ratio: Option<f64>,
    costs_a: Option<CostYaml>,
    costs_b: Option<CostYaml>,
    min_profit_threshold: Option<f64>,
    rolling_window: Option<usize>,
    significance: Option<f64>,
    trade_size_usd: Option<f64>,
    lookback_days: Option<u32>,
    end_date: Option<String>,
    report_file: Option<String>,
    tail_rows: Option<usize>,
}

/// Where one leg's bars come from.
#[derive(Debug, Clone, PartialEq)]
pub struct LegSource {
    pub symbol: String,
    pub file: PathBuf,
}

#[derive(Debug, Clone)]
pub struct PairArbConfig {
    pub model: ModelKind,
    /// Base directory for bar files without an explicit path.
    pub data_dir: String,
    pub leg_a: LegSource,
    pub leg_b: LegSource,
    /// Required by the parity model.
    pub fx: Option<LegSource>,
    pub conversion_ratio: f64,
    pub costs_a: LegCosts,
    pub costs_b: LegCosts,
    pub min_profit_threshold: f64,
    pub rolling_window: usize,
    pub significance: f64,
    pub trade_size_usd: f64,
    pub lookback_days: u32,
    pub end_date: Option<NaiveDate>,
    pub report_file: Option<String>,
    pub tail_rows: usize,
}

impl PairArbConfig {
    pub fn from_env_or_yaml() -> Result<Self> {
        let config_path = env::var("PAIRARB_CONFIG_PATH")
            .ok()
            .filter(|value| !value.trim().is_empty());
        if let Some(path) = config_path {
            return Self::from_yaml_path(path);
        }
        Self::from_env()
    }

    pub fn from_yaml_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let file = File::open(path_ref)
            .with_context(|| format!("failed to open pairarb config {}", path_ref.display()))?;
        let yaml: PairArbYaml = serde_yaml::from_reader(file)
            .with_context(|| format!("failed to parse pairarb config {}", path_ref.display()))?;
        let mut cfg = Self::from_yaml(yaml)?;
        cfg.apply_env_overrides()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::from_yaml(PairArbYaml::default())?;
        cfg.apply_env_overrides()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// YAML only, no environment overrides.
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let yaml: PairArbYaml =
            serde_yaml::from_str(text).context("failed to parse pairarb config")?;
        let cfg = Self::from_yaml(yaml)?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_yaml(yaml: PairArbYaml) -> Result<Self> {
        let model = yaml.model.as_deref().unwrap_or(DEFAULT_MODEL).parse()?;
        let data_dir = yaml
            .data_dir
            .unwrap_or_else(|| DEFAULT_DATA_DIR.to_string());
        let leg = |leg: Option<LegYaml>, default_symbol: &str| -> LegSource {
            let leg = leg.unwrap_or_default();
            let symbol = leg.symbol.unwrap_or_else(|| default_symbol.to_string());
            let file = leg
                .file
                .map(PathBuf::from)
                .unwrap_or_else(|| default_bar_file(&data_dir, &symbol));
            LegSource { symbol, file }
        };
        let leg_a = leg(yaml.leg_a, DEFAULT_LEG_A_SYMBOL);
        let leg_b = leg(yaml.leg_b, DEFAULT_LEG_B_SYMBOL);
        let fx = match model {
            ModelKind::Parity => Some(leg(yaml.fx, DEFAULT_FX_SYMBOL)),
            ModelKind::Cointegration => yaml.fx.map(|fx| leg(Some(fx), DEFAULT_FX_SYMBOL)),
        };
        let costs = |c: Option<CostYaml>, spread: f64, commission: f64, extra: f64| {
            let c = c.unwrap_or_default();
            LegCosts::new(
                c.spread.unwrap_or(spread),
                c.commission.unwrap_or(commission),
                c.extra.unwrap_or(extra),
            )
        };
        let end_date = yaml
            .end_date
            .as_deref()
            .map(parse_date)
            .transpose()?;

        Ok(PairArbConfig {
            model,
            data_dir,
            leg_a,
            leg_b,
            fx,
            conversion_ratio: yaml.conversion_ratio.unwrap_or(DEFAULT_CONVERSION_RATIO),
            costs_a: costs(
                yaml.costs_a,
                DEFAULT_SPREAD_A,
                DEFAULT_COMMISSION_A,
                DEFAULT_EXTRA_A,
            ),
            costs_b: costs(
                yaml.costs_b,
                DEFAULT_SPREAD_B,
                DEFAULT_COMMISSION_B,
                DEFAULT_EXTRA_B,
            ),
            min_profit_threshold: yaml
                .min_profit_threshold
                .unwrap_or(DEFAULT_MIN_PROFIT_THRESHOLD),
            rolling_window: yaml.rolling_window.unwrap_or(DEFAULT_ROLLING_WINDOW),
            significance: yaml.significance.unwrap_or(DEFAULT_SIGNIFICANCE),
            trade_size_usd: yaml.trade_size_usd.unwrap_or(DEFAULT_TRADE_SIZE_USD),
            lookback_days: yaml.lookback_days.unwrap_or(DEFAULT_LOOKBACK_DAYS),
            end_date,
            report_file: yaml.report_file.filter(|v| !v.trim().is_empty()),
            tail_rows: yaml.tail_rows.unwrap_or(DEFAULT_TAIL_ROWS),
        })
    }

    /// Switching to parity adds the default FX leg under `data_dir` when none is set.
    pub fn set_model(&mut self, model: ModelKind) {
        self.model = model;
        if model == ModelKind::Parity && self.fx.is_none() {
            self.fx = Some(LegSource {
                symbol: DEFAULT_FX_SYMBOL.to_string(),
                file: default_bar_file(&self.data_dir, DEFAULT_FX_SYMBOL),
            });
        }
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(value) = env_string("PAIRARB_MODEL") {
            self.set_model(value.parse()?);
        }
        override_leg(&mut self.leg_a, "LEG_A");
        override_leg(&mut self.leg_b, "LEG_B");
        if let Some(fx) = self.fx.as_mut() {
            override_leg(fx, "FX");
        }
        override_costs(&mut self.costs_a, "LEG_A");
        override_costs(&mut self.costs_b, "LEG_B");

        if let Some(value) = env_parse("CONVERSION_RATIO") {
            self.conversion_ratio = value;
        }
        if let Some(value) = env_parse("MIN_PROFIT_THRESHOLD") {
            self.min_profit_threshold = value;
        }
        if let Some(value) = env_parse("ROLLING_WINDOW") {
            self.rolling_window = value;
        }
        if let Some(value) = env_parse("SIGNIFICANCE") {
            self.significance = value;
        }
        if let Some(value) = env_parse("TRADE_SIZE_USD") {
            self.trade_size_usd = value;
        }
        if let Some(value) = env_parse("LOOKBACK_DAYS") {
            self.lookback_days = value;
        }
        if let Some(value) = env_string("END_DATE") {
            self.end_date = Some(parse_date(&value)?);
        }
        if let Some(value) = env_string("REPORT_FILE") {
            self.report_file = Some(value);
        }
        if let Some(value) = env_parse("TAIL_ROWS") {
            self.tail_rows = value;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.conversion_ratio.is_finite() && self.conversion_ratio > 0.0) {
            bail!(
                "conversion_ratio must be positive, got {}",
                self.conversion_ratio
            );
        }
        self.costs_a.validate("leg A")?;
        self.costs_b.validate("leg B")?;
        if !(self.min_profit_threshold.is_finite() && self.min_profit_threshold >= 0.0) {
            bail!(
                "min_profit_threshold must be non-negative, got {}",
                self.min_profit_threshold
            );
        }
        if self.rolling_window < 2 {
            bail!("rolling_window must be at least 2, got {}", self.rolling_window);
        }
        if !(self.significance > 0.0 && self.significance < 1.0) {
            bail!("significance must be in (0, 1), got {}", self.significance);
        }
        if !(self.trade_size_usd.is_finite() && self.trade_size_usd > 0.0) {
            bail!("trade_size_usd must be positive, got {}", self.trade_size_usd);
        }
        if self.model == ModelKind::Parity && self.fx.is_none() {
            bail!("the parity model needs an fx leg");
        }
        Ok(())
    }

    pub fn engine_params(&self) -> EngineParams {
        let model = match self.model {
            ModelKind::Parity => FairValueModel::Parity(ParityParams {
                conversion_ratio: self.conversion_ratio,
            }),
            ModelKind::Cointegration => FairValueModel::Cointegration(CointegrationParams {
                significance: self.significance,
            }),
        };
        EngineParams {
            model,
            costs: CostParams {
                leg_a: self.costs_a,
                leg_b: self.costs_b,
            },
            min_profit_threshold: self.min_profit_threshold,
            rolling_window: self.rolling_window,
            backtest: BacktestParams {
                trade_size_usd: self.trade_size_usd,
            },
        }
    }

    pub fn date_range(&self) -> DateRange {
        let end = self.end_date.unwrap_or_else(|| Utc::now().date_naive());
        DateRange::lookback(end, self.lookback_days)
    }

    pub fn bar_source(&self) -> FileBarSource {
        let mut source = FileBarSource::new()
            .with_file(&self.leg_a.symbol, &self.leg_a.file)
            .with_file(&self.leg_b.symbol, &self.leg_b.file);
        if let (ModelKind::Parity, Some(fx)) = (self.model, &self.fx) {
            source = source.with_file(&fx.symbol, &fx.file);
        }
        source
    }
}

fn env_string(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    let value = env_string(key)?;
    match value.trim().parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            log::warn!("ignoring unparsable {}={}", key, value);
            None
        }
    }
}

fn override_leg(leg: &mut LegSource, prefix: &str) {
    if let Some(value) = env_string(&format!("{}_SYMBOL", prefix)) {
        leg.symbol = value;
    }
    if let Some(value) = env_string(&format!("{}_FILE", prefix)) {
        leg.file = PathBuf::from(value);
    }
}

fn override_costs(costs: &mut LegCosts, prefix: &str) {
    if let Some(value) = env_parse(&format!("{}_SPREAD", prefix)) {
        costs.spread = value;
    }
    if let Some(value) = env_parse(&format!("{}_COMMISSION", prefix)) {
        costs.commission = value;
    }
    if let Some(value) = env_parse(&format!("{}_EXTRA", prefix)) {
        costs.extra = value;
    }
}

fn parse_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .with_context(|| format!("invalid date '{}', expected YYYY-MM-DD", raw))
}

fn default_bar_file(data_dir: &str, symbol: &str) -> PathBuf {
    PathBuf::from(data_dir).join(format!("{}.json", sanitize_symbol_for_filename(symbol)))
}

fn sanitize_symbol_for_filename(symbol: &str) -> String {
    let mut out = String::with_capacity(symbol.len());
    for ch in symbol.chars() {
        if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
            out.push(ch);
        } else {
            out.push('_');
        }
    }
    out
}
