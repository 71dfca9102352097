#![allow(dead_code)]

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use agentfolio::agents::{Agent, AgentError, AgentName, AgentResult};
use agentfolio::data::bundle::{Bar, DataBundle, FundamentalsInfo, Symbol};
use agentfolio::data::{indicators, MarketDataProvider, ProviderError};

pub fn sym(s: &str) -> Symbol {
    Symbol::parse(s).unwrap()
}

pub fn day(n: i64) -> NaiveDate {
    NaiveDate::from_ymd_opt(2023, 1, 2).unwrap() + chrono::Duration::days(n)
}

/// Steady geometric uptrend with mild volume growth.
pub fn uptrend_bars(n: usize) -> Vec<Bar> {
    (0..n)
        .map(|i| {
            let close = 100.0 * (1.0 + 0.002_f64).powi(i as i32);
            Bar {
                date: day(i as i64),
                open: close * 0.998,
                high: close * 1.005,
                low: close * 0.993,
                close,
                volume: 1_000_000.0 + i as f64 * 5_000.0,
            }
        })
        .collect()
}

/// The fundamentals snapshot used by the happy-path scenarios: ROE 20%,
/// margins 15%, price 150 vs target 180, bullish analyst coverage.
pub fn strong_info() -> FundamentalsInfo {
    FundamentalsInfo {
        market_cap: Some(400e9),
        profit_margins: Some(0.15),
        operating_margins: Some(0.22),
        gross_margins: Some(0.44),
        return_on_equity: Some(0.20),
        return_on_assets: Some(0.11),
        revenue_growth: Some(0.14),
        earnings_growth: Some(0.16),
        current_ratio: Some(1.9),
        debt_to_equity: Some(0.7),
        free_cashflow: Some(20e9),
        trailing_pe: Some(24.0),
        price_to_book: Some(4.0),
        peg_ratio: Some(1.4),
        current_price: Some(150.0),
        target_mean_price: Some(180.0),
        strong_buy: Some(10),
        buy: Some(8),
        hold: Some(4),
        sell: Some(1),
        strong_sell: Some(0),
        sector: Some("Technology".to_string()),
        exchange: Some("NMS".to_string()),
        ..FundamentalsInfo::default()
    }
}

/// Full bundle with 300 bars, computed indicators, and a strong snapshot.
pub fn rich_bundle() -> DataBundle {
    let bars = uptrend_bars(300);
    let indicators = indicators::compute(&bars);
    DataBundle {
        benchmark_history: flat_bars(300),
        indicators,
        history: bars,
        info: Some(strong_info()),
        ..DataBundle::default()
    }
}

pub fn flat_bars(n: usize) -> Vec<Bar> {
    (0..n)
        .map(|i| {
            let close = 400.0 + f64::from(i as u32 % 3);
            Bar {
                date: day(i as i64),
                open: close,
                high: close + 1.0,
                low: close - 1.0,
                close,
                volume: 2_000_000.0,
            }
        })
        .collect()
}

/// Scripted in-memory provider with call counters.
#[derive(Default)]
pub struct StubProvider {
    bundles: HashMap<Symbol, DataBundle>,
    benchmark_bars: Vec<Bar>,
    pub comprehensive_calls: AtomicUsize,
    pub history_calls: AtomicUsize,
}

impl StubProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bundle(mut self, symbol: &str, bundle: DataBundle) -> Self {
        self.bundles.insert(sym(symbol), bundle);
        self
    }

    pub fn with_benchmark_bars(mut self, bars: Vec<Bar>) -> Self {
        self.benchmark_bars = bars;
        self
    }
}

#[async_trait]
impl MarketDataProvider for StubProvider {
    async fn comprehensive(
        &self,
        symbol: &Symbol,
        _as_of: Option<NaiveDate>,
    ) -> Result<DataBundle, ProviderError> {
        self.comprehensive_calls.fetch_add(1, Ordering::SeqCst);
        self.bundles
            .get(symbol)
            .cloned()
            .ok_or_else(|| ProviderError::UnknownSymbol(symbol.clone()))
    }

    async fn history(
        &self,
        _symbol: &Symbol,
        _start: NaiveDate,
        _end: NaiveDate,
    ) -> Result<Vec<Bar>, ProviderError> {
        // Scripted: the full benchmark series regardless of the window, so
        // callers that query "the last N months" always see the fixture.
        self.history_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.benchmark_bars.clone())
    }

    fn variant(&self) -> &'static str {
        "stub"
    }
}

/// What a scripted agent does when called.
#[derive(Clone)]
pub enum Behavior {
    /// Return a fixed (score, confidence).
    Score(f64, f64),
    /// Always raise an internal (non-retryable) error.
    Internal(String),
    /// Always raise a connection (retryable) error.
    Connect,
    /// Raise connection errors for the first `n` calls, then score.
    ConnectThenScore(usize, f64),
    /// Block past any reasonable deadline, then score.
    Sleep(Duration, f64),
    /// Panic inside the agent body.
    Panic,
    /// Return this exact result without construction-time clamping.
    Raw(AgentResult),
}

pub struct ScriptedAgent {
    name: AgentName,
    behavior: Behavior,
    pub calls: Arc<AtomicUsize>,
}

impl ScriptedAgent {
    pub fn new(name: AgentName, behavior: Behavior) -> Self {
        Self {
            name,
            behavior,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl Agent for ScriptedAgent {
    fn name(&self) -> AgentName {
        self.name
    }

    fn analyze(&self, _: &Symbol, _: &DataBundle) -> Result<AgentResult, AgentError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        match &self.behavior {
            Behavior::Score(score, confidence) => Ok(AgentResult::new(
                *score,
                *confidence,
                BTreeMap::new(),
                "scripted",
            )),
            Behavior::Internal(reason) => Err(AgentError::Internal(reason.clone())),
            Behavior::Connect => Err(AgentError::Connection("connection refused".to_string())),
            Behavior::ConnectThenScore(n, score) => {
                if call <= *n {
                    Err(AgentError::Connection("connection reset".to_string()))
                } else {
                    Ok(AgentResult::new(*score, 0.9, BTreeMap::new(), "recovered"))
                }
            }
            Behavior::Sleep(duration, score) => {
                std::thread::sleep(*duration);
                Ok(AgentResult::new(*score, 0.9, BTreeMap::new(), "slow"))
            }
            Behavior::Panic => panic!("scripted agent panic"),
            Behavior::Raw(result) => Ok(result.clone()),
        }
    }
}

/// Five scripted agents: `overrides` replaces the default fixed-score
/// behavior for specific slots. Returns the agents plus per-agent call
/// counters.
pub fn scripted_agents(
    default_score: f64,
    overrides: &[(AgentName, Behavior)],
) -> (Vec<Arc<dyn Agent>>, BTreeMap<AgentName, Arc<AtomicUsize>>) {
    let mut agents: Vec<Arc<dyn Agent>> = Vec::new();
    let mut counters = BTreeMap::new();
    for name in AgentName::ALL {
        let behavior = overrides
            .iter()
            .find(|(n, _)| *n == name)
            .map_or(Behavior::Score(default_score, 0.9), |(_, b)| b.clone());
        let agent = ScriptedAgent::new(name, behavior);
        counters.insert(name, Arc::clone(&agent.calls));
        agents.push(Arc::new(agent));
    }
    (agents, counters)
}
