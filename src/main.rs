use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset, Utc};
use env_logger::Builder;
use log::LevelFilter;
use pairarb::config::{ModelKind, PairArbConfig};
use pairarb::engine::{ArbEngine, LegBars};
use pairarb::ports::bar_source::BarSource;
use pairarb::report;
use std::env;
use std::io::Write;
use std::path::Path;
use std::str::FromStr;

#[tokio::main]
async fn main() -> Result<()> {
    let offset_seconds = env::var("TIMEZONE_OFFSET")
        .unwrap_or_else(|_| "0".to_string())
        .parse::<i32>()
        .context("invalid TIMEZONE_OFFSET")?;
    let offset = FixedOffset::east_opt(offset_seconds).context("TIMEZONE_OFFSET out of range")?;
    Builder::from_default_env()
        .format(move |buf, record| {
            let utc_now: DateTime<Utc> = Utc::now();
            let local_now = utc_now.with_timezone(&offset);
            writeln!(
                buf,
                "{} [{}] - {}",
                local_now.format("%Y-%m-%dT%H:%M:%S%z"),
                record.level(),
                record.args()
            )
        })
        .filter(
            None,
            LevelFilter::from_str(&env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()))
                .unwrap_or(LevelFilter::Info),
        )
        .init();

    log::info!(
        "pairarb git: {}",
        option_env!("PAIRARB_GIT_HASH").unwrap_or("unknown")
    );
    let cfg = PairArbConfig::from_env_or_yaml()?;
    let range = cfg.date_range();
    log::info!(
        "{} vs {} from {} to {}",
        cfg.leg_a.symbol,
        cfg.leg_b.symbol,
        range.start,
        range.end
    );

    let source = cfg.bar_source();
    let fx_source = async {
        match (cfg.model, &cfg.fx) {
            (ModelKind::Parity, Some(fx)) => source.fetch(&fx.symbol, &range).await.map(Some),
            _ => Ok(None),
        }
    };
    let (leg_a, leg_b, fx) = tokio::try_join!(
        source.fetch(&cfg.leg_a.symbol, &range),
        source.fetch(&cfg.leg_b.symbol, &range),
        fx_source
    )?;

    let engine = ArbEngine::new(cfg.engine_params());
    let run = engine.run_bars(&LegBars { leg_a, leg_b, fx })?;

    print!("{}", report::render_summary(&run));
    println!();
    print!("{}", report::render_tail(&run.rows, cfg.tail_rows));

    if let Some(path) = &cfg.report_file {
        let written = report::write_jsonl(Path::new(path), &run)
            .with_context(|| format!("failed to write report {}", path))?;
        log::info!("report written to {}", written.display());
    }
    Ok(())
}
