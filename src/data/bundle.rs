//! Typed per-symbol data package consumed by the scoring agents.
//!
//! Every numeric field is either a finite real or absent; `NaN`/`Inf` are
//! filtered at construction so they can never cross a component boundary.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Well-known indicator names recognized across the provider and agents.
pub mod names {
    pub const RSI: &str = "rsi";
    pub const MACD_HIST: &str = "macd_hist";
    pub const ATR: &str = "atr";
    pub const NATR: &str = "natr";
    pub const SMA_50: &str = "sma_50";
    pub const SMA_200: &str = "sma_200";
    pub const OBV: &str = "obv";
    pub const AD: &str = "ad";
    pub const MFI: &str = "mfi";
    pub const CMF: &str = "cmf";
    pub const VWAP: &str = "vwap";
    pub const VOLUME_ZSCORE: &str = "volume_zscore";
}

/// Opaque ticker symbol: 1-10 characters of `[A-Z0-9.-]`, uppercased on ingress.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Symbol(String);

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid symbol {0:?}: expected 1-10 chars of [A-Z0-9.-]")]
pub struct SymbolError(String);

impl Symbol {
    pub fn parse(raw: &str) -> Result<Self, SymbolError> {
        let normalized = raw.trim().to_ascii_uppercase();
        let valid_len = (1..=10).contains(&normalized.len());
        let valid_chars = normalized
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '.' || c == '-');
        if valid_len && valid_chars {
            Ok(Self(normalized))
        } else {
            Err(SymbolError(raw.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Symbol {
    type Error = SymbolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Symbol::parse(&value)
    }
}

impl From<Symbol> for String {
    fn from(value: Symbol) -> Self {
        value.0
    }
}

/// One daily OHLCV bar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// An indicator is either a latest-value scalar or a series aligned with the
/// bar history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IndicatorValue {
    Scalar(f64),
    Series(Vec<f64>),
}

/// Named indicator bundle. Insertions drop non-finite values, so "missing"
/// is always expressed as absence rather than `NaN`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSet(BTreeMap<String, IndicatorValue>);

impl IndicatorSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_scalar(&mut self, name: &str, value: f64) {
        if value.is_finite() {
            self.0.insert(name.to_string(), IndicatorValue::Scalar(value));
        }
    }

    pub fn insert_series(&mut self, name: &str, values: Vec<f64>) {
        if !values.is_empty() && values.iter().all(|v| v.is_finite()) {
            self.0.insert(name.to_string(), IndicatorValue::Series(values));
        }
    }

    pub fn scalar(&self, name: &str) -> Option<f64> {
        match self.0.get(name) {
            Some(IndicatorValue::Scalar(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn series(&self, name: &str) -> Option<&[f64]> {
        match self.0.get(name) {
            Some(IndicatorValue::Series(v)) => Some(v.as_slice()),
            _ => None,
        }
    }

    /// Latest observation: the scalar itself, or the last element of a series.
    pub fn latest(&self, name: &str) -> Option<f64> {
        match self.0.get(name) {
            Some(IndicatorValue::Scalar(v)) => Some(*v),
            Some(IndicatorValue::Series(v)) => v.last().copied(),
            None => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// Fundamentals snapshot. Every field is nullable: vendors routinely omit
/// metrics, and agents score around the gaps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FundamentalsInfo {
    pub market_cap: Option<f64>,
    pub profit_margins: Option<f64>,
    pub operating_margins: Option<f64>,
    pub gross_margins: Option<f64>,
    pub return_on_equity: Option<f64>,
    pub return_on_assets: Option<f64>,
    pub revenue_growth: Option<f64>,
    pub earnings_growth: Option<f64>,
    pub current_ratio: Option<f64>,
    pub debt_to_equity: Option<f64>,
    pub free_cashflow: Option<f64>,
    pub trailing_pe: Option<f64>,
    pub price_to_book: Option<f64>,
    pub peg_ratio: Option<f64>,
    pub current_price: Option<f64>,
    pub target_mean_price: Option<f64>,
    pub strong_buy: Option<u32>,
    pub buy: Option<u32>,
    pub hold: Option<u32>,
    pub sell: Option<u32>,
    pub strong_sell: Option<u32>,
    pub exchange: Option<String>,
    pub sector: Option<String>,
    /// Optional news-sentiment scalar on [0, 100] produced by an upstream
    /// LLM collaborator. Absent when no LLM provider is configured.
    pub news_sentiment: Option<f64>,
}

/// Tabular financial statement: rows are line items, columns are reporting
/// periods ordered most recent first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatementTable {
    pub periods: Vec<NaiveDate>,
    items: BTreeMap<String, Vec<Option<f64>>>,
}

impl StatementTable {
    pub fn new(periods: Vec<NaiveDate>) -> Self {
        Self {
            periods,
            items: BTreeMap::new(),
        }
    }

    /// Insert a line item. Values are truncated/padded to the period count
    /// and non-finite entries become explicit gaps.
    pub fn insert_row(&mut self, item: &str, values: Vec<Option<f64>>) {
        let mut cleaned: Vec<Option<f64>> = values
            .into_iter()
            .map(|v| v.filter(|x| x.is_finite()))
            .collect();
        cleaned.resize(self.periods.len(), None);
        self.items.insert(item.to_string(), cleaned);
    }

    pub fn row(&self, item: &str) -> Option<&[Option<f64>]> {
        self.items.get(item).map(Vec::as_slice)
    }

    /// Most recent value for a line item, if reported.
    pub fn latest(&self, item: &str) -> Option<f64> {
        self.row(item).and_then(|r| r.first().copied().flatten())
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Everything an agent may read for one `(symbol, as_of)` pair.
///
/// Point-in-time contract: nothing in the bundle may postdate `as_of`.
/// The provider enforces this; agents simply trust it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataBundle {
    pub history: Vec<Bar>,
    pub indicators: IndicatorSet,
    pub info: Option<FundamentalsInfo>,
    pub financials: StatementTable,
    pub quarterly_financials: StatementTable,
    pub balance_sheet: StatementTable,
    pub cashflow: StatementTable,
    /// Benchmark (market) series for relative-strength scoring; may be
    /// empty when the benchmark is unavailable.
    pub benchmark_history: Vec<Bar>,
}

impl DataBundle {
    pub fn closes(&self) -> Vec<f64> {
        self.history.iter().map(|b| b.close).collect()
    }

    pub fn benchmark_closes(&self) -> Vec<f64> {
        self.benchmark_history.iter().map(|b| b.close).collect()
    }

    pub fn last_close(&self) -> Option<f64> {
        self.history.last().map(|b| b.close)
    }
}
