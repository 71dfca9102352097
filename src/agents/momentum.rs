//! Momentum agent: multi-horizon returns, moving-average posture, relative
//! strength versus the market benchmark, and trend consistency.

use std::collections::BTreeMap;

use super::{Agent, AgentError, AgentName, AgentResult};
use crate::data::bundle::{DataBundle, Symbol};

/// Trading-day horizon lengths.
const QUARTER: usize = 63;
const HALF_YEAR: usize = 126;
const FULL_YEAR: usize = 252;

pub struct MomentumAgent;

impl MomentumAgent {
    pub fn new() -> Self {
        Self
    }

    fn pct_return(closes: &[f64], lookback: usize) -> Option<f64> {
        if closes.len() < lookback + 1 {
            return None;
        }
        let start = closes[closes.len() - 1 - lookback];
        if start <= 0.0 {
            return None;
        }
        Some((closes[closes.len() - 1] - start) / start * 100.0)
    }

    fn score_returns(closes: &[f64]) -> f64 {
        let mut score: f64 = 0.0;

        if let Some(ret) = Self::pct_return(closes, QUARTER) {
            score += match ret {
                v if v > 15.0 => 25.0,
                v if v > 10.0 => 20.0,
                v if v > 5.0 => 15.0,
                v if v > 0.0 => 10.0,
                _ => 0.0,
            };
        }
        if let Some(ret) = Self::pct_return(closes, HALF_YEAR) {
            score += match ret {
                v if v > 20.0 => 35.0,
                v if v > 15.0 => 25.0,
                v if v > 10.0 => 20.0,
                v if v > 0.0 => 10.0,
                _ => 0.0,
            };
        }
        if let Some(ret) = Self::pct_return(closes, FULL_YEAR) {
            score += match ret {
                v if v > 30.0 => 40.0,
                v if v > 20.0 => 30.0,
                v if v > 10.0 => 20.0,
                v if v > 0.0 => 10.0,
                _ => 0.0,
            };
        }

        score.min(100.0)
    }

    fn score_moving_averages(closes: &[f64]) -> f64 {
        let Some(&price) = closes.last().filter(|p| **p > 0.0) else {
            return 0.0;
        };
        let mut score: f64 = 0.0;

        let ma50 = crate::data::indicators::sma(closes, 50);
        let ma200 = crate::data::indicators::sma(closes, 200);

        if let Some(ma) = ma50.filter(|m| *m > 0.0) {
            let diff = (price / ma - 1.0) * 100.0;
            score += match diff {
                v if v > 10.0 => 40.0,
                v if v > 5.0 => 30.0,
                v if v > 0.0 => 20.0,
                v if v > -5.0 => 10.0,
                _ => 0.0,
            };
        }
        if let Some(ma) = ma200.filter(|m| *m > 0.0) {
            let diff = (price / ma - 1.0) * 100.0;
            score += match diff {
                v if v > 15.0 => 40.0,
                v if v > 10.0 => 30.0,
                v if v > 5.0 => 20.0,
                v if v > 0.0 => 10.0,
                _ => 0.0,
            };
        }
        // Golden cross
        if let (Some(fast), Some(slow)) = (ma50, ma200) {
            if fast > slow {
                score += 20.0;
            }
        }

        score.min(100.0)
    }

    fn score_relative_strength(closes: &[f64], benchmark: &[f64]) -> f64 {
        let aligned = closes.len().min(benchmark.len());
        if aligned < HALF_YEAR + 1 {
            return 50.0;
        }
        let stock = &closes[closes.len() - aligned..];
        let market = &benchmark[benchmark.len() - aligned..];
        let (Some(stock_ret), Some(market_ret)) = (
            Self::pct_return(stock, HALF_YEAR),
            Self::pct_return(market, HALF_YEAR),
        ) else {
            return 50.0;
        };

        match stock_ret - market_ret {
            v if v > 20.0 => 100.0,
            v if v > 10.0 => 80.0,
            v if v > 5.0 => 60.0,
            v if v > 0.0 => 50.0,
            v if v > -5.0 => 40.0,
            v if v > -10.0 => 30.0,
            _ => 20.0,
        }
    }

    /// Absolute-momentum proxy used when no benchmark series is available.
    fn fallback_relative_strength(closes: &[f64]) -> f64 {
        let Some(ret) = Self::pct_return(closes, HALF_YEAR) else {
            return 50.0;
        };
        match ret {
            v if v > 25.0 => 75.0,
            v if v > 15.0 => 65.0,
            v if v > 5.0 => 55.0,
            v if v > -5.0 => 45.0,
            v if v > -15.0 => 35.0,
            _ => 25.0,
        }
    }

    fn score_trend_consistency(closes: &[f64]) -> f64 {
        let mut score: f64 = 0.0;

        // Share of positive trailing 20-day returns over the last 20 bars.
        if closes.len() >= 60 {
            let n = closes.len();
            let positive = (n - 20..n)
                .filter(|&i| closes[i] > closes[i - 20])
                .count();
            let ratio = positive as f64 / 20.0;
            score += match ratio {
                v if v > 0.8 => 50.0,
                v if v > 0.6 => 40.0,
                v if v > 0.5 => 30.0,
                _ => 0.0,
            };
        }
        // Steady trends (low daily-return volatility) earn a bonus.
        if closes.len() >= 30 {
            let window = &closes[closes.len() - 30..];
            let returns: Vec<f64> = window
                .windows(2)
                .filter(|p| p[0] > 0.0)
                .map(|p| (p[1] - p[0]) / p[0])
                .collect();
            if returns.len() > 1 {
                let mean = returns.iter().sum::<f64>() / returns.len() as f64;
                let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>()
                    / (returns.len() - 1) as f64;
                score += match variance.sqrt() {
                    v if v < 0.02 => 50.0,
                    v if v < 0.03 => 30.0,
                    v if v < 0.04 => 20.0,
                    _ => 0.0,
                };
            }
        }

        score.min(100.0)
    }

    /// Confidence rises with history depth; with a full year it reflects
    /// whether the three horizons agree in direction.
    fn confidence(closes: &[f64]) -> f64 {
        if closes.len() < FULL_YEAR + 1 {
            return match closes.len() {
                n if n < QUARTER => 0.3,
                n if n < HALF_YEAR => 0.5,
                _ => 0.7,
            };
        }
        let r3 = Self::pct_return(closes, QUARTER).unwrap_or(0.0);
        let r6 = Self::pct_return(closes, HALF_YEAR).unwrap_or(0.0);
        let r12 = Self::pct_return(closes, FULL_YEAR).unwrap_or(0.0);
        let all_up = r3 > 0.0 && r6 > 0.0 && r12 > 0.0;
        let all_down = r3 < 0.0 && r6 < 0.0 && r12 < 0.0;
        if all_up || all_down {
            0.95
        } else {
            0.75
        }
    }

    fn build_reasoning(returns: f64, ma: f64, rs: f64, consistency: f64) -> String {
        let mut reasons: Vec<&str> = Vec::new();

        if returns > 70.0 {
            reasons.push("strong returns across all timeframes");
        } else if returns > 50.0 {
            reasons.push("positive momentum");
        } else if returns < 30.0 {
            reasons.push("weak returns");
        }
        if ma > 70.0 {
            reasons.push("strong uptrend vs MAs");
        } else if ma > 50.0 {
            reasons.push("above moving averages");
        } else if ma < 30.0 {
            reasons.push("below moving averages");
        }
        if rs > 70.0 {
            reasons.push("outperforming market");
        } else if rs < 40.0 {
            reasons.push("underperforming market");
        }
        if consistency > 70.0 {
            reasons.push("consistent trend");
        } else if consistency < 30.0 {
            reasons.push("choppy price action");
        }

        if reasons.is_empty() {
            "Mixed momentum signals".to_string()
        } else {
            let joined = reasons.join("; ");
            let mut chars = joined.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => joined,
            }
        }
    }
}

impl Default for MomentumAgent {
    fn default() -> Self {
        Self::new()
    }
}

impl Agent for MomentumAgent {
    fn name(&self) -> AgentName {
        AgentName::Momentum
    }

    fn analyze(&self, _symbol: &Symbol, bundle: &DataBundle) -> Result<AgentResult, AgentError> {
        let closes = bundle.closes();
        if closes.len() < FULL_YEAR {
            return Ok(AgentResult::degraded("insufficient price history"));
        }

        let returns = Self::score_returns(&closes);
        let ma = Self::score_moving_averages(&closes);
        let benchmark = bundle.benchmark_closes();
        let rs = if benchmark.is_empty() {
            Self::fallback_relative_strength(&closes)
        } else {
            Self::score_relative_strength(&closes, &benchmark)
        };
        let consistency = Self::score_trend_consistency(&closes);

        let composite = 0.40 * returns + 0.30 * ma + 0.20 * rs + 0.10 * consistency;
        let confidence = Self::confidence(&closes);

        let mut metrics = BTreeMap::new();
        metrics.insert("returns".to_string(), returns);
        metrics.insert("moving_averages".to_string(), ma);
        metrics.insert("relative_strength".to_string(), rs);
        metrics.insert("trend_consistency".to_string(), consistency);
        if let Some(r) = Self::pct_return(&closes, QUARTER) {
            metrics.insert("return_3m".to_string(), r);
        }
        if let Some(r) = Self::pct_return(&closes, HALF_YEAR) {
            metrics.insert("return_6m".to_string(), r);
        }
        if let Some(r) = Self::pct_return(&closes, FULL_YEAR) {
            metrics.insert("return_12m".to_string(), r);
        }
        if let (Some(&price), Some(ma50)) =
            (closes.last(), crate::data::indicators::sma(&closes, 50))
        {
            metrics.insert("price_vs_ma50".to_string(), (price / ma50 - 1.0) * 100.0);
        }
        if let (Some(&price), Some(ma200)) =
            (closes.last(), crate::data::indicators::sma(&closes, 200))
        {
            metrics.insert("price_vs_ma200".to_string(), (price / ma200 - 1.0) * 100.0);
        }

        Ok(AgentResult::new(
            composite,
            confidence,
            metrics,
            Self::build_reasoning(returns, ma, rs, consistency),
        ))
    }
}
