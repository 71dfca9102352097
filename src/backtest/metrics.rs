//! Performance metrics over an equity curve, trade log, and benchmark series.

use chrono::NaiveDate;
use rustc_hash::FxHashMap;

use super::types::{EquityPoint, PerformanceMetrics, Trade, TradeSide};

/// Cap for profit factor when there are no losing trades, keeping the value
/// finite and JSON-representable.
const MAX_PROFIT_FACTOR: f64 = 999.99;

/// Annualized metrics below this calendar span are misleadingly inflated
/// and reported as zero.
const MIN_CALENDAR_DAYS_FOR_ANNUALIZED: f64 = 30.0;

const RISK_FREE_RATE: f64 = 0.02;

pub fn calculate_metrics(
    equity_curve: &[EquityPoint],
    trades: &[Trade],
    benchmark: &[(NaiveDate, f64)],
    initial_capital: f64,
) -> PerformanceMetrics {
    let zero = PerformanceMetrics {
        total_return: 0.0,
        cagr: 0.0,
        volatility: 0.0,
        sharpe: 0.0,
        sortino: 0.0,
        calmar: 0.0,
        max_drawdown: 0.0,
        win_rate: 0.0,
        profit_factor: 0.0,
        benchmark_return: 0.0,
        alpha: 0.0,
        beta: 0.0,
    };
    if initial_capital <= 0.0 || equity_curve.len() < 2 {
        return zero;
    }

    let returns = daily_returns(equity_curve, initial_capital);
    if returns.is_empty() {
        return zero;
    }

    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let std = std_dev(&returns);
    let downside = downside_deviation(&returns);
    let annualization = (252.0_f64).sqrt();

    let final_equity = equity_curve.last().map_or(initial_capital, |p| p.equity);
    let total_return = (final_equity - initial_capital) / initial_capital;

    let first = equity_curve.first().map_or_else(|| chrono::NaiveDate::MIN, |p| p.date);
    let last = equity_curve.last().map_or_else(|| chrono::NaiveDate::MIN, |p| p.date);
    let calendar_days = (last - first).num_days().max(0) as f64;

    let (cagr, max_drawdown, calmar) = {
        let max_dd = max_drawdown(equity_curve);
        if calendar_days >= MIN_CALENDAR_DAYS_FOR_ANNUALIZED && final_equity > 0.0 {
            let years = calendar_days / 365.0;
            let cagr = (final_equity / initial_capital).powf(1.0 / years) - 1.0;
            let calmar = if max_dd > 0.0 { cagr / max_dd } else { 0.0 };
            (cagr, max_dd, calmar)
        } else {
            (0.0, max_dd, 0.0)
        }
    };

    let sharpe = if std > 0.0 { mean / std * annualization } else { 0.0 };
    let sortino = if downside > 0.0 {
        mean / downside * annualization
    } else {
        0.0
    };
    let volatility = std * annualization;

    let (win_rate, profit_factor) = trade_stats(trades);

    let (benchmark_return, alpha, beta) =
        benchmark_comparison(equity_curve, &returns, benchmark, cagr, calendar_days);

    PerformanceMetrics {
        total_return,
        cagr,
        volatility,
        sharpe,
        sortino,
        calmar,
        max_drawdown,
        win_rate,
        profit_factor,
        benchmark_return,
        alpha,
        beta,
    }
}

fn daily_returns(equity_curve: &[EquityPoint], initial_capital: f64) -> Vec<f64> {
    let mut returns = Vec::with_capacity(equity_curve.len());
    let mut prev = initial_capital;
    for point in equity_curve {
        if prev > 0.0 {
            returns.push((point.equity - prev) / prev);
        }
        prev = point.equity;
    }
    returns
}

fn std_dev(data: &[f64]) -> f64 {
    if data.len() < 2 {
        return 0.0;
    }
    let mean = data.iter().sum::<f64>() / data.len() as f64;
    let variance = data.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (data.len() - 1) as f64;
    variance.sqrt()
}

fn downside_deviation(returns: &[f64]) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let negative: Vec<f64> = returns.iter().filter(|r| **r < 0.0).copied().collect();
    if negative.is_empty() {
        return 0.0;
    }
    let variance = negative.iter().map(|r| r.powi(2)).sum::<f64>() / returns.len() as f64;
    variance.sqrt()
}

fn max_drawdown(equity_curve: &[EquityPoint]) -> f64 {
    let mut peak = equity_curve[0].equity;
    let mut max_dd = 0.0;
    for point in equity_curve {
        if point.equity > peak {
            peak = point.equity;
        }
        if peak > 0.0 {
            let dd = (peak - point.equity) / peak;
            if dd > max_dd {
                max_dd = dd;
            }
        }
    }
    max_dd
}

/// Win rate and profit factor over realized (closing) fills.
fn trade_stats(trades: &[Trade]) -> (f64, f64) {
    let closers: Vec<f64> = trades
        .iter()
        .filter(|t| t.side == TradeSide::Sell)
        .filter_map(|t| t.realized_pnl)
        .collect();
    if closers.is_empty() {
        return (0.0, 0.0);
    }

    let winners: Vec<f64> = closers.iter().filter(|p| **p > 0.0).copied().collect();
    let losers: Vec<f64> = closers.iter().filter(|p| **p < 0.0).copied().collect();
    let win_rate = winners.len() as f64 / closers.len() as f64;

    let gains: f64 = winners.iter().sum();
    let losses: f64 = losers.iter().sum::<f64>().abs();
    let profit_factor = if losses > 0.0 {
        gains / losses
    } else if gains > 0.0 {
        MAX_PROFIT_FACTOR
    } else {
        0.0
    };

    (win_rate, profit_factor)
}

/// Benchmark total return plus CAPM-style alpha/beta over aligned daily
/// returns.
fn benchmark_comparison(
    equity_curve: &[EquityPoint],
    portfolio_returns: &[f64],
    benchmark: &[(NaiveDate, f64)],
    portfolio_cagr: f64,
    calendar_days: f64,
) -> (f64, f64, f64) {
    if benchmark.len() < 2 {
        return (0.0, 0.0, 1.0);
    }

    let closes: FxHashMap<NaiveDate, f64> = benchmark.iter().copied().collect();

    // Align benchmark returns to the portfolio's equity-curve dates.
    let mut bench_returns = Vec::new();
    let mut prev: Option<f64> = None;
    for point in equity_curve {
        if let Some(close) = closes.get(&point.date) {
            if let Some(p) = prev {
                if p > 0.0 {
                    bench_returns.push((close - p) / p);
                }
            }
            prev = Some(*close);
        }
    }

    let bench_total = {
        let first = benchmark.first().map(|(_, c)| *c).unwrap_or(0.0);
        let last = benchmark.last().map(|(_, c)| *c).unwrap_or(0.0);
        if first > 0.0 { (last - first) / first } else { 0.0 }
    };

    let aligned = portfolio_returns.len().min(bench_returns.len());
    if aligned < 2 {
        return (bench_total, 0.0, 1.0);
    }
    let port = &portfolio_returns[portfolio_returns.len() - aligned..];
    let bench = &bench_returns[bench_returns.len() - aligned..];

    let port_mean = port.iter().sum::<f64>() / aligned as f64;
    let bench_mean = bench.iter().sum::<f64>() / aligned as f64;
    let covariance = port
        .iter()
        .zip(bench)
        .map(|(p, b)| (p - port_mean) * (b - bench_mean))
        .sum::<f64>()
        / aligned as f64;
    let bench_variance =
        bench.iter().map(|b| (b - bench_mean).powi(2)).sum::<f64>() / aligned as f64;
    let beta = if bench_variance > 0.0 {
        covariance / bench_variance
    } else {
        1.0
    };

    let alpha = if calendar_days >= MIN_CALENDAR_DAYS_FOR_ANNUALIZED {
        let years = calendar_days / 365.0;
        let bench_annual = bench_total / years;
        portfolio_cagr - (RISK_FREE_RATE + beta * (bench_annual - RISK_FREE_RATE))
    } else {
        0.0
    };

    (bench_total, alpha, beta)
}
