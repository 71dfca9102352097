//! Backtest configuration and record types.

use chrono::NaiveDate;
use garde::Validate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::data::bundle::Symbol;

use super::risk::{QualityTier, RiskEvent, RiskLimits};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RebalanceFrequency {
    #[default]
    Monthly,
    Quarterly,
}

impl RebalanceFrequency {
    pub fn interval_months(self) -> u32 {
        match self {
            RebalanceFrequency::Monthly => 1,
            RebalanceFrequency::Quarterly => 3,
        }
    }
}

fn default_capital() -> f64 {
    100_000.0
}

fn default_top_n() -> usize {
    10
}

/// 10 bps per side.
fn default_transaction_cost() -> f64 {
    0.001
}

fn validate_end_after_start(start: &NaiveDate) -> impl FnOnce(&NaiveDate, &()) -> garde::Result + '_ {
    move |end: &NaiveDate, (): &()| {
        if end <= start {
            return Err(garde::Error::new(format!(
                "end ({end}) must be after start ({start})"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct BacktestConfig {
    #[garde(skip)]
    pub start: NaiveDate,
    #[garde(custom(validate_end_after_start(&self.start)))]
    pub end: NaiveDate,
    #[serde(default = "default_capital")]
    #[garde(range(min = 1.0))]
    pub initial_capital: f64,
    #[serde(default)]
    #[garde(skip)]
    pub rebalance: RebalanceFrequency,
    #[serde(default = "default_top_n")]
    #[garde(range(min = 1, max = 50))]
    pub top_n: usize,
    #[garde(length(min = 1))]
    pub universe: Vec<Symbol>,
    #[serde(default = "default_transaction_cost")]
    #[garde(range(min = 0.0, max = 0.05))]
    pub transaction_cost: f64,
    /// Minimum composite score a candidate needs to be bought.
    #[serde(default)]
    #[garde(range(min = 0.0, max = 100.0))]
    pub min_score: f64,
    /// Symbol → sector, used for diversification and the sector cap.
    #[serde(default)]
    #[garde(skip)]
    pub sector_map: BTreeMap<Symbol, String>,
    #[serde(default)]
    #[garde(skip)]
    pub risk: RiskLimits,
}

/// One open holding. `peak_price` is mutated upward only; it is the basis
/// for trailing stops.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: Symbol,
    pub shares: f64,
    pub entry_price: f64,
    pub entry_date: NaiveDate,
    pub entry_score: f64,
    pub quality_tier: QualityTier,
    pub peak_price: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeReason {
    Rebalance,
    StopLoss,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub date: NaiveDate,
    pub symbol: Symbol,
    pub side: TradeSide,
    pub shares: f64,
    pub price: f64,
    /// Transaction cost charged on this fill.
    pub cost: f64,
    /// Signed effect on cash (proceeds minus costs for sells, negative
    /// outlay for buys).
    pub cash_delta: f64,
    pub reason: TradeReason,
    /// Realized P&L versus entry, recorded on closing fills.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub realized_pnl: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EquityPoint {
    pub date: NaiveDate,
    pub equity: f64,
    pub cash: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebalanceEvent {
    pub date: NaiveDate,
    pub portfolio_value: f64,
    pub selected: Vec<Symbol>,
    pub avg_score: f64,
    pub transaction_costs: f64,
    pub num_positions: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub total_return: f64,
    pub cagr: f64,
    pub volatility: f64,
    pub sharpe: f64,
    pub sortino: f64,
    pub calmar: f64,
    pub max_drawdown: f64,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub benchmark_return: f64,
    pub alpha: f64,
    pub beta: f64,
}

/// Engine provenance attached to every result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineMeta {
    pub engine_version: String,
    pub provider: String,
    pub note: String,
}

impl EngineMeta {
    pub fn new(provider: &str) -> Self {
        Self {
            engine_version: env!("CARGO_PKG_VERSION").to_string(),
            provider: provider.to_string(),
            note: "Fundamentals and sentiment inputs are as-of-now snapshots; \
                   historical results carry an estimated 5-10% upward bias."
                .to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BacktestResult {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub initial_capital: f64,
    pub final_value: f64,
    pub total_return: f64,
    pub metrics: PerformanceMetrics,
    pub equity_curve: Vec<EquityPoint>,
    pub rebalance_events: Vec<RebalanceEvent>,
    pub trades: Vec<Trade>,
    pub risk_events: Vec<RiskEvent>,
    pub meta: EngineMeta,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> BacktestConfig {
        BacktestConfig {
            start: NaiveDate::from_ymd_opt(2022, 1, 1).unwrap(),
            end: NaiveDate::from_ymd_opt(2023, 1, 1).unwrap(),
            initial_capital: 100_000.0,
            rebalance: RebalanceFrequency::Monthly,
            top_n: 10,
            universe: vec![Symbol::parse("AAPL").unwrap()],
            transaction_cost: 0.001,
            min_score: 0.0,
            sector_map: BTreeMap::new(),
            risk: RiskLimits::default(),
        }
    }

    #[test]
    fn valid_config_passes() {
        base_config().validate().unwrap();
    }

    #[test]
    fn end_before_start_rejected() {
        let mut config = base_config();
        config.end = config.start;
        assert!(config.validate().is_err());
    }

    #[test]
    fn empty_universe_rejected() {
        let mut config = base_config();
        config.universe.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_top_n_rejected() {
        let mut config = base_config();
        config.top_n = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn excessive_cost_rejected() {
        let mut config = base_config();
        config.transaction_cost = 0.2;
        assert!(config.validate().is_err());
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let json = r#"{
            "start": "2022-01-01",
            "end": "2023-01-01",
            "universe": ["AAPL", "MSFT"]
        }"#;
        let config: BacktestConfig = serde_json::from_str(json).unwrap();
        assert!((config.initial_capital - 100_000.0).abs() < f64::EPSILON);
        assert_eq!(config.top_n, 10);
        assert_eq!(config.rebalance, RebalanceFrequency::Monthly);
        config.validate().unwrap();
    }

    #[test]
    fn quarterly_interval() {
        assert_eq!(RebalanceFrequency::Quarterly.interval_months(), 3);
    }
}
