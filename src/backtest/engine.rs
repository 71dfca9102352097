//! Historical backtest engine.
//!
//! Drives the scorer over a rebalance calendar with point-in-time data and
//! lets the risk manager veto sizing and force exits. The portfolio is
//! single-threaded: this event loop is its only mutator.

use anyhow::{bail, Context, Result};
use chrono::{Datelike, NaiveDate};
use garde::Validate;
use ordered_float::OrderedFloat;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::data::bundle::Symbol;
use crate::data::historical::HistoricalProvider;
use crate::data::MarketDataProvider;
use crate::engine::scorer::{ScoreResult, StockScorer};

use super::metrics::calculate_metrics;
use super::risk::{QualityTier, RiskManager};
use super::types::{
    BacktestConfig, BacktestResult, EngineMeta, EquityPoint, Position, RebalanceEvent, Trade,
    TradeReason, TradeSide,
};

/// Trailing window (trading days) for realized portfolio volatility.
const REALIZED_VOL_WINDOW: usize = 21;

/// Rebalance trades smaller than this fraction of portfolio value are
/// skipped to avoid cost churn.
const MIN_TRADE_FRACTION: f64 = 0.005;

pub struct BacktestEngine {
    provider: Arc<HistoricalProvider>,
    scorer: Arc<StockScorer>,
}

struct PortfolioState {
    cash: f64,
    positions: Vec<Position>,
    trades: Vec<Trade>,
    equity_curve: Vec<EquityPoint>,
    rebalance_events: Vec<RebalanceEvent>,
    daily_returns: Vec<f64>,
}

impl PortfolioState {
    fn new(initial_capital: f64) -> Self {
        Self {
            cash: initial_capital,
            positions: Vec::new(),
            trades: Vec::new(),
            equity_curve: Vec::new(),
            rebalance_events: Vec::new(),
            daily_returns: Vec::new(),
        }
    }

    fn position_index(&self, symbol: &Symbol) -> Option<usize> {
        self.positions.iter().position(|p| &p.symbol == symbol)
    }

    fn value(&self, provider: &HistoricalProvider, date: NaiveDate) -> f64 {
        let holdings: f64 = self
            .positions
            .iter()
            .map(|p| {
                provider
                    .price_on(&p.symbol, date)
                    .map_or(p.shares * p.entry_price, |price| p.shares * price)
            })
            .sum();
        self.cash + holdings
    }

    /// Annualized std-dev of the trailing daily returns.
    fn realized_volatility(&self) -> f64 {
        let n = self.daily_returns.len();
        if n < REALIZED_VOL_WINDOW {
            return 0.0;
        }
        let window = &self.daily_returns[n - REALIZED_VOL_WINDOW..];
        let mean = window.iter().sum::<f64>() / window.len() as f64;
        let variance = window.iter().map(|r| (r - mean).powi(2)).sum::<f64>()
            / (window.len() - 1) as f64;
        variance.sqrt() * (252.0_f64).sqrt()
    }
}

impl BacktestEngine {
    pub fn new(provider: Arc<HistoricalProvider>, scorer: Arc<StockScorer>) -> Self {
        Self { provider, scorer }
    }

    pub async fn run(&self, config: &BacktestConfig) -> Result<BacktestResult> {
        config.validate().context("invalid backtest config")?;

        let calendar = self.provider.trading_days(config.start, config.end);
        if calendar.is_empty() {
            bail!(
                "no benchmark trading days between {} and {}",
                config.start,
                config.end
            );
        }
        let rebalance_days = rebalance_days(&calendar, config.rebalance.interval_months());

        tracing::info!(
            start = %config.start,
            end = %config.end,
            days = calendar.len(),
            rebalances = rebalance_days.len(),
            universe = config.universe.len(),
            "Starting backtest"
        );

        let mut state = PortfolioState::new(config.initial_capital);
        let mut risk = RiskManager::new(config.risk);
        let mut prev_value = config.initial_capital;

        for date in &calendar {
            let date = *date;

            // Exits first: ratchet peaks and honor trailing stops at today's
            // close before any rebalancing decision.
            let stop_outs = risk.check_stops(date, &mut state.positions, |symbol| {
                self.provider.price_on(symbol, date)
            });
            for stop in stop_outs {
                if let Some(idx) = state.position_index(&stop.symbol) {
                    let position = state.positions.remove(idx);
                    sell_position(&mut state, &position, stop.price, date, config, TradeReason::StopLoss);
                }
            }

            if rebalance_days.contains(&date) {
                self.rebalance(date, config, &mut state, &mut risk).await;
            }

            let value = state.value(&self.provider, date);
            if prev_value > 0.0 {
                state.daily_returns.push((value - prev_value) / prev_value);
            }
            prev_value = value;

            risk.assess_drawdown(date, value);
            state.equity_curve.push(EquityPoint {
                date,
                equity: value,
                cash: state.cash,
            });
        }

        let final_value = state
            .equity_curve
            .last()
            .map_or(config.initial_capital, |p| p.equity);
        let total_return = (final_value - config.initial_capital) / config.initial_capital;

        let benchmark: Vec<(NaiveDate, f64)> = self
            .provider
            .history(self.provider.benchmark(), config.start, config.end)
            .await
            .map(|bars| bars.iter().map(|b| (b.date, b.close)).collect())
            .unwrap_or_default();
        let metrics = calculate_metrics(
            &state.equity_curve,
            &state.trades,
            &benchmark,
            config.initial_capital,
        );

        tracing::info!(
            final_value,
            total_return_pct = total_return * 100.0,
            trades = state.trades.len(),
            "Backtest complete"
        );

        Ok(BacktestResult {
            start: config.start,
            end: config.end,
            initial_capital: config.initial_capital,
            final_value,
            total_return,
            metrics,
            equity_curve: state.equity_curve,
            rebalance_events: state.rebalance_events,
            trades: state.trades,
            risk_events: risk.into_events(),
            meta: EngineMeta::new(self.provider.variant()),
        })
    }

    async fn rebalance(
        &self,
        date: NaiveDate,
        config: &BacktestConfig,
        state: &mut PortfolioState,
        risk: &mut RiskManager,
    ) {
        let portfolio_value = state.value(&self.provider, date);
        if portfolio_value <= 0.0 {
            return;
        }

        let cancel = CancellationToken::new();
        let outcomes = self
            .scorer
            .score_batch(&config.universe, Some(date), &cancel)
            .await;
        let mut scored: Vec<ScoreResult> = outcomes
            .into_iter()
            .filter_map(|o| o.result.ok())
            .filter(|r| r.composite >= config.min_score)
            .filter(|r| self.provider.price_on(&r.symbol, date).is_some())
            .collect();
        scored.sort_by_key(|r| std::cmp::Reverse(OrderedFloat(r.composite)));

        if scored.is_empty() {
            tracing::warn!(%date, "No scorable candidates, keeping current portfolio");
            return;
        }

        let selected = diversified_top_n(
            &scored,
            config.top_n,
            &config.sector_map,
            risk.limits().max_sector_concentration,
        );

        // Target weights: equal weight over the selection, shrunk by the
        // defensive cash buffer and the volatility scale.
        let drawdown = risk.assess_drawdown(date, portfolio_value);
        let vol_scale = risk.volatility_scale(date, state.realized_volatility());
        let invested_fraction = (1.0 - drawdown.cash_allocation) * vol_scale;
        let per_symbol = invested_fraction / selected.len() as f64;

        let mut weights: BTreeMap<Symbol, f64> = selected
            .iter()
            .map(|r| (r.symbol.clone(), per_symbol))
            .collect();
        risk.apply_position_caps(date, &mut weights);
        risk.apply_sector_caps(date, &mut weights, &config.sector_map);

        // Sells: anything held that is no longer targeted.
        let mut costs = 0.0;
        let held: Vec<Symbol> = state.positions.iter().map(|p| p.symbol.clone()).collect();
        for symbol in held {
            if !weights.contains_key(&symbol) {
                if let (Some(idx), Some(price)) = (
                    state.position_index(&symbol),
                    self.provider.price_on(&symbol, date),
                ) {
                    let position = state.positions.remove(idx);
                    costs +=
                        sell_position(state, &position, price, date, config, TradeReason::Rebalance);
                }
            }
        }

        // Buys and resizes toward targets. Sells above freed the cash first.
        for result in &selected {
            let Some(weight) = weights.get(&result.symbol).copied() else {
                continue;
            };
            let Some(price) = self.provider.price_on(&result.symbol, date) else {
                continue;
            };
            if price <= 0.0 {
                continue;
            }
            let target_value = portfolio_value * weight;

            match state.position_index(&result.symbol) {
                Some(idx) => {
                    let current_value = state.positions[idx].shares * price;
                    let delta = target_value - current_value;
                    if delta.abs() < portfolio_value * MIN_TRADE_FRACTION {
                        continue;
                    }
                    if delta > 0.0 {
                        costs += buy_into(state, idx, delta, price, date, config);
                    } else {
                        costs += trim_position(state, idx, -delta, price, date, config);
                    }
                }
                None => {
                    let quality_score = result
                        .agents
                        .get(crate::agents::AgentName::Quality)
                        .score;
                    costs += open_position(
                        state,
                        result,
                        quality_score,
                        target_value,
                        price,
                        date,
                        config,
                    );
                }
            }
        }

        let avg_score = selected.iter().map(|r| r.composite).sum::<f64>() / selected.len() as f64;
        state.rebalance_events.push(RebalanceEvent {
            date,
            portfolio_value,
            selected: selected.iter().map(|r| r.symbol.clone()).collect(),
            avg_score,
            transaction_costs: costs,
            num_positions: state.positions.len(),
        });

        tracing::info!(
            %date,
            positions = state.positions.len(),
            value = portfolio_value,
            avg_score,
            "Rebalanced"
        );
    }
}

/// First trading day of every `interval_months`-th calendar month.
fn rebalance_days(calendar: &[NaiveDate], interval_months: u32) -> Vec<NaiveDate> {
    let mut days = Vec::new();
    let mut last_month: Option<(i32, u32)> = None;
    let Some(first) = calendar.first() else {
        return days;
    };
    let origin = month_ordinal(*first);

    for date in calendar {
        let key = (date.year(), date.month());
        if last_month != Some(key) {
            last_month = Some(key);
            if (month_ordinal(*date) - origin) % i64::from(interval_months) == 0 {
                days.push(*date);
            }
        }
    }
    days
}

fn month_ordinal(date: NaiveDate) -> i64 {
    i64::from(date.year()) * 12 + i64::from(date.month0())
}

/// Greedy top-N with a per-sector count cap derived from the concentration
/// limit, so the selection cannot be dominated by one sector.
fn diversified_top_n<'a>(
    ranked: &'a [ScoreResult],
    top_n: usize,
    sector_map: &BTreeMap<Symbol, String>,
    max_sector_concentration: f64,
) -> Vec<&'a ScoreResult> {
    let max_per_sector = ((top_n as f64 * max_sector_concentration).floor() as usize).max(1);
    let mut per_sector: BTreeMap<&str, usize> = BTreeMap::new();
    let mut selected = Vec::new();

    for result in ranked {
        if selected.len() == top_n {
            break;
        }
        let sector = sector_map
            .get(&result.symbol)
            .map_or("Unknown", String::as_str);
        let count = per_sector.entry(sector).or_insert(0);
        if *count < max_per_sector {
            *count += 1;
            selected.push(result);
        }
    }

    // Backfill if sector caps left slots empty and candidates remain.
    if selected.len() < top_n {
        for result in ranked {
            if selected.len() == top_n {
                break;
            }
            if !selected.iter().any(|r| r.symbol == result.symbol) {
                selected.push(result);
            }
        }
    }

    selected
}

/// Sell an entire position. Returns the transaction cost charged.
fn sell_position(
    state: &mut PortfolioState,
    position: &Position,
    price: f64,
    date: NaiveDate,
    config: &BacktestConfig,
    reason: TradeReason,
) -> f64 {
    let notional = position.shares * price;
    let cost = notional * config.transaction_cost;
    let proceeds = notional - cost;
    state.cash += proceeds;
    let realized = (price - position.entry_price) * position.shares - cost;
    state.trades.push(Trade {
        date,
        symbol: position.symbol.clone(),
        side: TradeSide::Sell,
        shares: position.shares,
        price,
        cost,
        cash_delta: proceeds,
        reason,
        realized_pnl: Some(realized),
    });
    cost
}

/// Reduce a position by `value_to_sell` worth of shares.
fn trim_position(
    state: &mut PortfolioState,
    idx: usize,
    value_to_sell: f64,
    price: f64,
    date: NaiveDate,
    config: &BacktestConfig,
) -> f64 {
    let (symbol, entry_price, shares, emptied) = {
        let position = &mut state.positions[idx];
        let shares = (value_to_sell / price).min(position.shares);
        if shares <= 0.0 {
            return 0.0;
        }
        position.shares -= shares;
        (
            position.symbol.clone(),
            position.entry_price,
            shares,
            position.shares * price < 1e-6,
        )
    };

    let notional = shares * price;
    let cost = notional * config.transaction_cost;
    let proceeds = notional - cost;
    state.cash += proceeds;
    state.trades.push(Trade {
        date,
        symbol,
        side: TradeSide::Sell,
        shares,
        price,
        cost,
        cash_delta: proceeds,
        reason: TradeReason::Rebalance,
        realized_pnl: Some((price - entry_price) * shares - cost),
    });
    if emptied {
        state.positions.remove(idx);
    }
    cost
}

/// Add `value_to_buy` worth of shares to an existing position, bounded by
/// available cash.
fn buy_into(
    state: &mut PortfolioState,
    idx: usize,
    value_to_buy: f64,
    price: f64,
    date: NaiveDate,
    config: &BacktestConfig,
) -> f64 {
    let gross = spendable(state.cash, value_to_buy, config.transaction_cost);
    if gross <= 0.0 {
        return 0.0;
    }
    let shares = gross / price;
    let cost = gross * config.transaction_cost;
    state.cash -= gross + cost;
    let symbol = {
        let position = &mut state.positions[idx];
        position.shares += shares;
        position.symbol.clone()
    };
    state.trades.push(Trade {
        date,
        symbol,
        side: TradeSide::Buy,
        shares,
        price,
        cost,
        cash_delta: -(gross + cost),
        reason: TradeReason::Rebalance,
        realized_pnl: None,
    });
    cost
}

/// Open a new position at today's close, recording the entry score and
/// quality tier that drive the trailing-stop policy.
fn open_position(
    state: &mut PortfolioState,
    result: &ScoreResult,
    quality_score: f64,
    target_value: f64,
    price: f64,
    date: NaiveDate,
    config: &BacktestConfig,
) -> f64 {
    let gross = spendable(state.cash, target_value, config.transaction_cost);
    if gross <= 0.0 {
        return 0.0;
    }
    let shares = gross / price;
    let cost = gross * config.transaction_cost;
    state.cash -= gross + cost;
    state.positions.push(Position {
        symbol: result.symbol.clone(),
        shares,
        entry_price: price,
        entry_date: date,
        entry_score: result.composite,
        quality_tier: QualityTier::from_score(quality_score),
        peak_price: price,
    });
    state.trades.push(Trade {
        date,
        symbol: result.symbol.clone(),
        side: TradeSide::Buy,
        shares,
        price,
        cost,
        cash_delta: -(gross + cost),
        reason: TradeReason::Rebalance,
        realized_pnl: None,
    });
    cost
}

/// Largest gross notional affordable with `cash` after costs; cash can
/// never go negative.
fn spendable(cash: f64, desired: f64, cost_rate: f64) -> f64 {
    let affordable = cash / (1.0 + cost_rate);
    desired.min(affordable).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn rebalance_days_pick_first_trading_day_per_month() {
        let calendar = vec![
            d(2023, 1, 3),
            d(2023, 1, 4),
            d(2023, 2, 1),
            d(2023, 2, 2),
            d(2023, 3, 1),
        ];
        let days = rebalance_days(&calendar, 1);
        assert_eq!(days, vec![d(2023, 1, 3), d(2023, 2, 1), d(2023, 3, 1)]);
    }

    #[test]
    fn quarterly_rebalance_skips_intermediate_months() {
        let calendar = vec![
            d(2023, 1, 3),
            d(2023, 2, 1),
            d(2023, 3, 1),
            d(2023, 4, 3),
            d(2023, 5, 1),
            d(2023, 7, 3),
        ];
        let days = rebalance_days(&calendar, 3);
        assert_eq!(days, vec![d(2023, 1, 3), d(2023, 4, 3), d(2023, 7, 3)]);
    }

    #[test]
    fn spendable_never_exceeds_cash() {
        let gross = spendable(1000.0, 5000.0, 0.001);
        assert!(gross + gross * 0.001 <= 1000.0 + 1e-9);
        assert_eq!(spendable(0.0, 100.0, 0.001), 0.0);
    }
}
