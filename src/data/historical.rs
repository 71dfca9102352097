//! Point-in-time provider over preloaded daily bars.
//!
//! This is the provider variant that drives backtests: all data is loaded up
//! front and every query is sliced at the requested as-of date, so nothing
//! after that date can leak into a bundle. Fundamentals snapshots are
//! as-of-now (vendors do not version them), which is the documented source
//! of backtest bias recorded in the engine metadata.

use async_trait::async_trait;
use chrono::NaiveDate;
use rustc_hash::FxHashMap;

use super::bundle::{Bar, DataBundle, FundamentalsInfo, StatementTable, Symbol};
use super::{indicators, MarketDataProvider, ProviderError};

#[derive(Debug, Clone, Default)]
struct SymbolData {
    bars: Vec<Bar>,
    info: Option<FundamentalsInfo>,
    financials: StatementTable,
    quarterly_financials: StatementTable,
    balance_sheet: StatementTable,
    cashflow: StatementTable,
}

pub struct HistoricalProvider {
    symbols: FxHashMap<Symbol, SymbolData>,
    benchmark: Symbol,
}

impl HistoricalProvider {
    pub fn new(benchmark: Symbol) -> Self {
        Self {
            symbols: FxHashMap::default(),
            benchmark,
        }
    }

    /// Load bars for a symbol. Bars are sorted by date and deduplicated so
    /// later slicing can binary-search.
    pub fn insert_bars(&mut self, symbol: Symbol, mut bars: Vec<Bar>) {
        bars.sort_by_key(|b| b.date);
        bars.dedup_by_key(|b| b.date);
        self.symbols.entry(symbol).or_default().bars = bars;
    }

    pub fn insert_info(&mut self, symbol: Symbol, info: FundamentalsInfo) {
        self.symbols.entry(symbol).or_default().info = Some(info);
    }

    pub fn insert_statements(
        &mut self,
        symbol: Symbol,
        financials: StatementTable,
        quarterly_financials: StatementTable,
        balance_sheet: StatementTable,
        cashflow: StatementTable,
    ) {
        let entry = self.symbols.entry(symbol).or_default();
        entry.financials = financials;
        entry.quarterly_financials = quarterly_financials;
        entry.balance_sheet = balance_sheet;
        entry.cashflow = cashflow;
    }

    /// Load a directory of `<SYMBOL>.json` bar files (each a JSON array of
    /// bars), plus optional `<SYMBOL>.info.json` fundamentals snapshots.
    pub fn load_json_dir(
        benchmark: Symbol,
        dir: &std::path::Path,
    ) -> anyhow::Result<Self> {
        use anyhow::Context;

        let mut provider = Self::new(benchmark);
        for entry in std::fs::read_dir(dir)
            .with_context(|| format!("Failed to read data dir: {}", dir.display()))?
        {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if let Some(stem) = name.strip_suffix(".info.json") {
                let Ok(symbol) = Symbol::parse(stem) else {
                    continue;
                };
                let raw = std::fs::read_to_string(&path)?;
                let info: FundamentalsInfo = serde_json::from_str(&raw)
                    .with_context(|| format!("Bad info file: {}", path.display()))?;
                provider.insert_info(symbol, info);
            } else if let Some(stem) = name.strip_suffix(".json") {
                let Ok(symbol) = Symbol::parse(stem) else {
                    continue;
                };
                let raw = std::fs::read_to_string(&path)?;
                let bars: Vec<Bar> = serde_json::from_str(&raw)
                    .with_context(|| format!("Bad bar file: {}", path.display()))?;
                provider.insert_bars(symbol, bars);
            }
        }
        Ok(provider)
    }

    pub fn benchmark(&self) -> &Symbol {
        &self.benchmark
    }

    pub fn symbols(&self) -> Vec<Symbol> {
        self.symbols.keys().cloned().collect()
    }

    pub fn has_symbol(&self, symbol: &Symbol) -> bool {
        self.symbols.contains_key(symbol)
    }

    /// Last close on or before `date`, if any.
    pub fn price_on(&self, symbol: &Symbol, date: NaiveDate) -> Option<f64> {
        let data = self.symbols.get(symbol)?;
        let idx = data.bars.partition_point(|b| b.date <= date);
        if idx == 0 {
            None
        } else {
            Some(data.bars[idx - 1].close)
        }
    }

    /// Benchmark trading days within `[start, end]`: the backtest calendar.
    pub fn trading_days(&self, start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
        self.symbols
            .get(&self.benchmark)
            .map(|data| {
                data.bars
                    .iter()
                    .map(|b| b.date)
                    .filter(|d| *d >= start && *d <= end)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn bars_through(&self, symbol: &Symbol, as_of: Option<NaiveDate>) -> Option<Vec<Bar>> {
        let data = self.symbols.get(symbol)?;
        let bars = match as_of {
            Some(date) => {
                let idx = data.bars.partition_point(|b| b.date <= date);
                data.bars[..idx].to_vec()
            }
            None => data.bars.clone(),
        };
        Some(bars)
    }
}

#[async_trait]
impl MarketDataProvider for HistoricalProvider {
    async fn comprehensive(
        &self,
        symbol: &Symbol,
        as_of: Option<NaiveDate>,
    ) -> Result<DataBundle, ProviderError> {
        let data = self
            .symbols
            .get(symbol)
            .ok_or_else(|| ProviderError::UnknownSymbol(symbol.clone()))?;
        let history = self
            .bars_through(symbol, as_of)
            .unwrap_or_default();
        let benchmark_history = if symbol == &self.benchmark {
            history.clone()
        } else {
            self.bars_through(&self.benchmark, as_of).unwrap_or_default()
        };
        let indicators = indicators::compute(&history);

        Ok(DataBundle {
            history,
            indicators,
            info: data.info.clone(),
            financials: data.financials.clone(),
            quarterly_financials: data.quarterly_financials.clone(),
            balance_sheet: data.balance_sheet.clone(),
            cashflow: data.cashflow.clone(),
            benchmark_history,
        })
    }

    async fn history(
        &self,
        symbol: &Symbol,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Bar>, ProviderError> {
        let data = self
            .symbols
            .get(symbol)
            .ok_or_else(|| ProviderError::UnknownSymbol(symbol.clone()))?;
        Ok(data
            .bars
            .iter()
            .filter(|b| b.date >= start && b.date <= end)
            .copied()
            .collect())
    }

    fn variant(&self) -> &'static str {
        "historical"
    }
}
