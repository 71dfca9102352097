//! Fundamentals agent: profitability, growth, financial health, valuation.

use std::collections::BTreeMap;

use super::{Agent, AgentError, AgentName, AgentResult};
use crate::data::bundle::{DataBundle, FundamentalsInfo, StatementTable, Symbol};

const EQUITY_ITEM: &str = "Total Stockholder Equity";

/// Scores the financial picture from the fundamentals snapshot and statement
/// tables. Four equally weighted sub-scores; price history is unused.
pub struct FundamentalsAgent;

impl FundamentalsAgent {
    pub fn new() -> Self {
        Self
    }

    fn score_profitability(info: &FundamentalsInfo) -> f64 {
        let mut score: f64 = 0.0;

        if let Some(roe) = info.return_on_equity.map(|v| v * 100.0) {
            score += match roe {
                v if v > 20.0 => 40.0,
                v if v > 15.0 => 30.0,
                v if v > 10.0 => 20.0,
                v if v > 5.0 => 10.0,
                _ => 0.0,
            };
        }
        if let Some(margin) = info.profit_margins.map(|v| v * 100.0) {
            score += match margin {
                v if v > 20.0 => 30.0,
                v if v > 15.0 => 20.0,
                v if v > 10.0 => 15.0,
                v if v > 5.0 => 10.0,
                _ => 0.0,
            };
        }
        if let Some(margin) = info.operating_margins.map(|v| v * 100.0) {
            score += match margin {
                v if v > 25.0 => 30.0,
                v if v > 20.0 => 20.0,
                v if v > 15.0 => 15.0,
                v if v > 10.0 => 10.0,
                _ => 0.0,
            };
        }

        score.min(100.0)
    }

    fn score_growth(info: &FundamentalsInfo, financials: &StatementTable) -> f64 {
        let mut score: f64 = 0.0;

        if let Some(growth) = info.revenue_growth.map(|v| v * 100.0) {
            score += match growth {
                v if v > 20.0 => 40.0,
                v if v > 15.0 => 30.0,
                v if v > 10.0 => 20.0,
                v if v > 5.0 => 10.0,
                _ => 0.0,
            };
        }
        if let Some(growth) = info.earnings_growth.map(|v| v * 100.0) {
            score += match growth {
                v if v > 20.0 => 40.0,
                v if v > 15.0 => 30.0,
                v if v > 10.0 => 20.0,
                v if v > 5.0 => 10.0,
                _ => 0.0,
            };
        }
        // Book-value growth from the annual statements, most recent vs prior.
        if let Some(row) = financials.row(EQUITY_ITEM) {
            if let (Some(Some(latest)), Some(Some(prior))) = (row.first(), row.get(1)) {
                if *prior != 0.0 {
                    let growth = (latest - prior) / prior * 100.0;
                    score += match growth {
                        v if v > 15.0 => 20.0,
                        v if v > 10.0 => 15.0,
                        v if v > 5.0 => 10.0,
                        _ => 0.0,
                    };
                }
            }
        }

        score.min(100.0)
    }

    fn score_financial_health(info: &FundamentalsInfo) -> f64 {
        let mut score: f64 = 0.0;

        if let Some(ratio) = info.current_ratio {
            score += match ratio {
                v if v > 2.0 => 35.0,
                v if v > 1.5 => 25.0,
                v if v > 1.0 => 15.0,
                _ => 0.0,
            };
        }
        if let Some(de) = info.debt_to_equity {
            score += match de {
                v if v < 0.5 => 35.0,
                v if v < 1.0 => 25.0,
                v if v < 2.0 => 15.0,
                v if v < 3.0 => 5.0,
                _ => 0.0,
            };
        }
        if let Some(fcf) = info.free_cashflow {
            if fcf > 0.0 {
                score += 30.0;
                if let Some(cap) = info.market_cap.filter(|c| *c > 0.0) {
                    if fcf / cap * 100.0 > 5.0 {
                        score += 10.0;
                    }
                }
            }
        }

        score.min(100.0)
    }

    fn score_valuation(info: &FundamentalsInfo) -> f64 {
        let mut score: f64 = 0.0;

        if let Some(pe) = info.trailing_pe.filter(|v| *v > 0.0) {
            score += match pe {
                v if v < 15.0 => 40.0,
                v if v < 20.0 => 30.0,
                v if v < 25.0 => 20.0,
                v if v < 30.0 => 10.0,
                _ => 0.0,
            };
        }
        if let Some(pb) = info.price_to_book.filter(|v| *v > 0.0) {
            score += match pb {
                v if v < 2.0 => 30.0,
                v if v < 3.0 => 20.0,
                v if v < 5.0 => 10.0,
                _ => 0.0,
            };
        }
        if let Some(peg) = info.peg_ratio.filter(|v| *v > 0.0) {
            score += match peg {
                v if v < 1.0 => 30.0,
                v if v < 1.5 => 20.0,
                v if v < 2.0 => 10.0,
                _ => 0.0,
            };
        }

        score.min(100.0)
    }

    /// Coverage over the 11 snapshot metrics plus the two statement tables.
    fn confidence(info: &FundamentalsInfo, bundle: &DataBundle) -> f64 {
        let metrics = [
            info.return_on_equity,
            info.profit_margins,
            info.operating_margins,
            info.revenue_growth,
            info.earnings_growth,
            info.current_ratio,
            info.debt_to_equity,
            info.free_cashflow,
            info.trailing_pe,
            info.price_to_book,
            info.peg_ratio,
        ];
        let mut available = metrics.iter().filter(|m| m.is_some()).count();
        let mut total = metrics.len();

        total += 2;
        if !bundle.financials.is_empty() {
            available += 1;
        }
        if !bundle.balance_sheet.is_empty() {
            available += 1;
        }

        available as f64 / total as f64
    }

    fn build_reasoning(prof: f64, growth: f64, health: f64, val: f64) -> String {
        let mut reasons: Vec<&str> = Vec::new();

        if prof > 70.0 {
            reasons.push("excellent profitability");
        } else if prof > 50.0 {
            reasons.push("good profitability");
        } else if prof < 30.0 {
            reasons.push("weak profitability");
        }
        if growth > 70.0 {
            reasons.push("strong growth");
        } else if growth > 50.0 {
            reasons.push("moderate growth");
        } else if growth < 30.0 {
            reasons.push("low growth");
        }
        if health > 70.0 {
            reasons.push("solid financial health");
        } else if health > 50.0 {
            reasons.push("adequate financial health");
        } else if health < 30.0 {
            reasons.push("weak balance sheet");
        }
        if val > 70.0 {
            reasons.push("attractive valuation");
        } else if val > 50.0 {
            reasons.push("fair valuation");
        } else if val < 30.0 {
            reasons.push("expensive valuation");
        }

        if reasons.is_empty() {
            "Mixed fundamental signals".to_string()
        } else {
            capitalize(&reasons.join("; "))
        }
    }
}

impl Default for FundamentalsAgent {
    fn default() -> Self {
        Self::new()
    }
}

impl Agent for FundamentalsAgent {
    fn name(&self) -> AgentName {
        AgentName::Fundamentals
    }

    fn analyze(&self, _symbol: &Symbol, bundle: &DataBundle) -> Result<AgentResult, AgentError> {
        let Some(info) = bundle.info.as_ref() else {
            return Ok(AgentResult::degraded("no fundamentals snapshot"));
        };

        let profitability = Self::score_profitability(info);
        let growth = Self::score_growth(info, &bundle.financials);
        let health = Self::score_financial_health(info);
        let valuation = Self::score_valuation(info);

        let composite = (profitability + growth + health + valuation) / 4.0;
        let confidence = Self::confidence(info, bundle);

        let mut metrics = BTreeMap::new();
        metrics.insert("profitability".to_string(), profitability);
        metrics.insert("growth".to_string(), growth);
        metrics.insert("financial_health".to_string(), health);
        metrics.insert("valuation".to_string(), valuation);
        if let Some(roe) = info.return_on_equity {
            metrics.insert("roe".to_string(), roe * 100.0);
        }
        if let Some(margin) = info.profit_margins {
            metrics.insert("net_margin".to_string(), margin * 100.0);
        }
        if let Some(growth) = info.revenue_growth {
            metrics.insert("revenue_growth".to_string(), growth * 100.0);
        }
        if let Some(de) = info.debt_to_equity {
            metrics.insert("debt_to_equity".to_string(), de);
        }
        if let Some(pe) = info.trailing_pe {
            metrics.insert("pe_ratio".to_string(), pe);
        }

        Ok(AgentResult::new(
            composite,
            confidence,
            metrics,
            Self::build_reasoning(profitability, growth, health, valuation),
        ))
    }
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}
