//! Demo backtest over a seeded synthetic universe.
//!
//! Usage: `run-backtest [years] [top_n]`. Generates deterministic
//! random-walk bar histories for a small universe, runs the full scoring +
//! risk + rebalancing pipeline, and prints the result summary.

use anyhow::Result;
use chrono::{Datelike, NaiveDate, Weekday};
use indicatif::{ProgressBar, ProgressStyle};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{self, EnvFilter};

use agentfolio::backtest::engine::BacktestEngine;
use agentfolio::backtest::risk::RiskLimits;
use agentfolio::backtest::types::{BacktestConfig, RebalanceFrequency};
use agentfolio::data::bundle::{Bar, FundamentalsInfo, Symbol};
use agentfolio::data::historical::HistoricalProvider;
use agentfolio::engine::cache::AnalysisCache;
use agentfolio::engine::executor::{ExecutorConfig, ParallelExecutor};
use agentfolio::engine::scorer::StockScorer;

const UNIVERSE: [(&str, &str, f64); 8] = [
    ("ALPHA", "Technology", 0.0008),
    ("BRAVO", "Technology", 0.0005),
    ("CHARL", "Healthcare", 0.0004),
    ("DELTA", "Healthcare", 0.0002),
    ("ECHO", "Financial Services", 0.0003),
    ("FOXTR", "Financial Services", 0.0001),
    ("GOLF", "Energy", -0.0001),
    ("HOTEL", "Utilities", 0.0000),
];

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let years: i32 = args.get(1).and_then(|a| a.parse().ok()).unwrap_or(3);
    let top_n: usize = args.get(2).and_then(|a| a.parse().ok()).unwrap_or(4);

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run(years, top_n))
}

async fn run(years: i32, top_n: usize) -> Result<()> {
    let start = NaiveDate::from_ymd_opt(2024 - years, 1, 2).expect("valid date");
    let end = NaiveDate::from_ymd_opt(2023, 12, 29).expect("valid date");
    // One extra year of bars ahead of the start so momentum has history.
    let data_start = NaiveDate::from_ymd_opt(2024 - years - 1, 1, 2).expect("valid date");

    let benchmark = Symbol::parse("SPY")?;
    let mut provider = HistoricalProvider::new(benchmark.clone());
    let mut sector_map = BTreeMap::new();
    let mut universe = Vec::new();

    for (i, (ticker, sector, drift)) in UNIVERSE.iter().enumerate() {
        let symbol = Symbol::parse(ticker)?;
        let mut rng = StdRng::seed_from_u64(42 + i as u64);
        provider.insert_bars(symbol.clone(), synthetic_walk(data_start, end, *drift, &mut rng));
        provider.insert_info(symbol.clone(), synthetic_info(i));
        sector_map.insert(symbol.clone(), (*sector).to_string());
        universe.push(symbol);
    }
    let mut rng = StdRng::seed_from_u64(7);
    provider.insert_bars(
        benchmark.clone(),
        synthetic_walk(data_start, end, 0.0003, &mut rng),
    );

    let provider = Arc::new(provider);
    let executor = Arc::new(ParallelExecutor::new(
        agentfolio::agents::default_agents(),
        ExecutorConfig::default(),
    ));
    let cache = Arc::new(AnalysisCache::new(256, Duration::from_secs(60)));
    let scorer = Arc::new(StockScorer::new(
        provider.clone() as Arc<dyn agentfolio::data::MarketDataProvider>,
        executor,
        cache,
    ));
    let engine = BacktestEngine::new(Arc::clone(&provider), scorer);

    let config = BacktestConfig {
        start,
        end,
        initial_capital: 100_000.0,
        rebalance: RebalanceFrequency::Monthly,
        top_n,
        universe,
        transaction_cost: 0.001,
        min_score: 0.0,
        sector_map,
        risk: RiskLimits::default(),
    };

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::with_template("{spinner} {msg}")?);
    spinner.set_message(format!(
        "Backtesting {} symbols, {} to {}",
        config.universe.len(),
        config.start,
        config.end
    ));
    spinner.enable_steady_tick(Duration::from_millis(120));

    let result = engine.run(&config).await?;
    spinner.finish_and_clear();

    println!("Backtest {} -> {}", result.start, result.end);
    println!(
        "  final value   {:>12.2}  (total return {:+.2}%)",
        result.final_value,
        result.total_return * 100.0
    );
    println!(
        "  CAGR {:+.2}%  sharpe {:.2}  sortino {:.2}  max DD {:.2}%",
        result.metrics.cagr * 100.0,
        result.metrics.sharpe,
        result.metrics.sortino,
        result.metrics.max_drawdown * 100.0
    );
    println!(
        "  vs benchmark {:+.2}%  alpha {:+.3}  beta {:.2}",
        result.metrics.benchmark_return * 100.0,
        result.metrics.alpha,
        result.metrics.beta
    );
    println!(
        "  {} rebalances, {} trades, {} risk events",
        result.rebalance_events.len(),
        result.trades.len(),
        result.risk_events.len()
    );
    Ok(())
}

/// Weekday-only geometric random walk.
fn synthetic_walk(start: NaiveDate, end: NaiveDate, drift: f64, rng: &mut StdRng) -> Vec<Bar> {
    let mut bars = Vec::new();
    let mut close = 100.0_f64;
    let mut date = start;
    while date <= end {
        if !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
            let shock: f64 = rng.random_range(-0.015..0.015);
            close = (close * (1.0 + drift + shock)).max(1.0);
            let spread = close * 0.01;
            bars.push(Bar {
                date,
                open: close - spread * 0.3,
                high: close + spread,
                low: close - spread,
                close,
                volume: rng.random_range(500_000.0..5_000_000.0),
            });
        }
        date = date + chrono::Duration::days(1);
    }
    bars
}

fn synthetic_info(seed: usize) -> FundamentalsInfo {
    let f = seed as f64;
    FundamentalsInfo {
        market_cap: Some(20e9 + f * 80e9),
        profit_margins: Some(0.08 + f * 0.02),
        operating_margins: Some(0.12 + f * 0.02),
        gross_margins: Some(0.35 + f * 0.03),
        return_on_equity: Some(0.10 + f * 0.03),
        return_on_assets: Some(0.05 + f * 0.01),
        revenue_growth: Some(0.05 + f * 0.02),
        current_ratio: Some(1.2 + f * 0.2),
        debt_to_equity: Some(1.5 - f * 0.15),
        free_cashflow: Some(1e9 + f * 2e9),
        trailing_pe: Some(28.0 - f * 2.0),
        current_price: Some(100.0),
        target_mean_price: Some(104.0 + f * 2.0),
        strong_buy: Some(2 + seed as u32),
        buy: Some(4),
        hold: Some(6_u32.saturating_sub(seed as u32)),
        sell: Some(1),
        strong_sell: Some(0),
        sector: None,
        exchange: Some("NYQ".to_string()),
        ..FundamentalsInfo::default()
    }
}
