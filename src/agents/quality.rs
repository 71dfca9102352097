//! Quality agent: market position, stability, competitive moat, and
//! business-quality metrics.

use std::collections::BTreeMap;

use super::{Agent, AgentError, AgentName, AgentResult};
use crate::data::bundle::{DataBundle, FundamentalsInfo, StatementTable, Symbol};

const REVENUE_ITEM: &str = "Total Revenue";

/// Sectors treated as structurally strong for the market-position bonus.
const STRONG_SECTORS: [&str; 3] = ["Technology", "Healthcare", "Financial Services"];

/// Primary US listing exchanges.
const QUALITY_EXCHANGES: [&str; 2] = ["NMS", "NYQ"];

pub struct QualityAgent;

impl QualityAgent {
    pub fn new() -> Self {
        Self
    }

    fn score_market_position(info: &FundamentalsInfo) -> f64 {
        let mut score: f64 = 0.0;

        score += match info.market_cap.unwrap_or(0.0) {
            v if v > 500e9 => 50.0,
            v if v > 200e9 => 40.0,
            v if v > 100e9 => 30.0,
            v if v > 50e9 => 20.0,
            _ => 10.0,
        };
        if let Some(sector) = info.sector.as_deref() {
            if STRONG_SECTORS.contains(&sector) {
                score += 25.0;
            }
        }
        if let Some(exchange) = info.exchange.as_deref() {
            if QUALITY_EXCHANGES.contains(&exchange) {
                score += 25.0;
            }
        }

        score.min(100.0)
    }

    fn score_stability(info: &FundamentalsInfo, financials: &StatementTable) -> f64 {
        let mut score: f64 = 0.0;

        if let Some(row) = financials.row(REVENUE_ITEM) {
            let revenues: Vec<f64> = row.iter().filter_map(|v| *v).collect();
            if revenues.len() >= 3 && revenues.iter().all(|r| *r != 0.0) {
                // Periods are most-recent-first; change = (newer - older) / older.
                let changes: Vec<f64> = revenues
                    .windows(2)
                    .map(|pair| (pair[0] - pair[1]) / pair[1])
                    .collect();
                let mean = changes.iter().sum::<f64>() / changes.len() as f64;
                let variance = changes.iter().map(|c| (c - mean).powi(2)).sum::<f64>()
                    / changes.len() as f64;
                score += match variance.sqrt() {
                    v if v < 0.1 => 40.0,
                    v if v < 0.2 => 30.0,
                    v if v < 0.3 => 20.0,
                    _ => 0.0,
                };
                if changes.iter().all(|c| *c > 0.0) {
                    score += 20.0;
                }
            }
        }
        score += match info.profit_margins.unwrap_or(0.0) {
            v if v > 0.15 => 40.0,
            v if v > 0.10 => 30.0,
            v if v > 0.05 => 20.0,
            _ => 0.0,
        };

        score.min(100.0)
    }

    fn score_competitive_moat(info: &FundamentalsInfo) -> f64 {
        let mut score: f64 = 0.0;

        score += match info.gross_margins.unwrap_or(0.0) {
            v if v > 0.50 => 40.0,
            v if v > 0.40 => 30.0,
            v if v > 0.30 => 20.0,
            _ => 0.0,
        };
        score += match info.operating_margins.unwrap_or(0.0) {
            v if v > 0.25 => 30.0,
            v if v > 0.20 => 20.0,
            v if v > 0.15 => 10.0,
            _ => 0.0,
        };
        score += match info.return_on_assets.unwrap_or(0.0) {
            v if v > 0.15 => 30.0,
            v if v > 0.10 => 20.0,
            v if v > 0.05 => 10.0,
            _ => 0.0,
        };

        score.min(100.0)
    }

    fn score_business_quality(info: &FundamentalsInfo) -> f64 {
        let mut score: f64 = 0.0;

        score += match info.return_on_equity.unwrap_or(0.0) {
            v if v > 0.25 => 40.0,
            v if v > 0.18 => 30.0,
            v if v > 0.12 => 20.0,
            v if v > 0.06 => 10.0,
            _ => 0.0,
        };
        // Cash conversion: positive free cash flow, scaled by FCF yield as a
        // proxy for buyback capacity.
        if let Some(fcf) = info.free_cashflow.filter(|f| *f > 0.0) {
            score += 30.0;
            if let Some(cap) = info.market_cap.filter(|c| *c > 0.0) {
                score += match fcf / cap {
                    v if v > 0.06 => 30.0,
                    v if v > 0.04 => 20.0,
                    v if v > 0.02 => 10.0,
                    _ => 0.0,
                };
            }
        }

        score.min(100.0)
    }

    fn confidence(info: &FundamentalsInfo, financials: &StatementTable) -> f64 {
        let metrics = [
            info.market_cap,
            info.profit_margins,
            info.gross_margins,
            info.operating_margins,
            info.return_on_equity,
            info.return_on_assets,
            info.free_cashflow,
        ];
        let mut available = metrics.iter().filter(|m| m.is_some()).count();
        let mut total = metrics.len();

        total += 1;
        if !financials.is_empty() {
            available += 1;
        }

        available as f64 / total as f64
    }

    fn build_reasoning(position: f64, stability: f64, moat: f64, business: f64) -> String {
        let mut reasons: Vec<&str> = Vec::new();

        if position > 70.0 {
            reasons.push("dominant market position");
        } else if position < 30.0 {
            reasons.push("small-cap profile");
        }
        if stability > 70.0 {
            reasons.push("stable revenues and margins");
        } else if stability < 30.0 {
            reasons.push("volatile operating history");
        }
        if moat > 70.0 {
            reasons.push("wide-moat margin structure");
        } else if moat < 30.0 {
            reasons.push("thin margins");
        }
        if business > 70.0 {
            reasons.push("strong returns on capital");
        } else if business < 30.0 {
            reasons.push("weak cash generation");
        }

        if reasons.is_empty() {
            "Average business quality".to_string()
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

impl Default for QualityAgent {
    fn default() -> Self {
        Self::new()
    }
}

impl Agent for QualityAgent {
    fn name(&self) -> AgentName {
        AgentName::Quality
    }

    fn analyze(&self, _symbol: &Symbol, bundle: &DataBundle) -> Result<AgentResult, AgentError> {
        let Some(info) = bundle.info.as_ref() else {
            return Ok(AgentResult::degraded("no fundamentals snapshot"));
        };

        let position = Self::score_market_position(info);
        let stability = Self::score_stability(info, &bundle.financials);
        let moat = Self::score_competitive_moat(info);
        let business = Self::score_business_quality(info);

        let composite = 0.30 * position + 0.30 * stability + 0.20 * moat + 0.20 * business;
        let confidence = Self::confidence(info, &bundle.financials);

        let mut metrics = BTreeMap::new();
        metrics.insert("market_position".to_string(), position);
        metrics.insert("stability".to_string(), stability);
        metrics.insert("competitive_moat".to_string(), moat);
        metrics.insert("business_quality".to_string(), business);
        if let Some(cap) = info.market_cap {
            metrics.insert("market_cap".to_string(), cap);
        }
        if let Some(margin) = info.profit_margins {
            metrics.insert("profit_margin".to_string(), margin * 100.0);
        }

        Ok(AgentResult::new(
            composite,
            confidence,
            metrics,
            Self::build_reasoning(position, stability, moat, business),
        ))
    }
}
