//! Sentiment agent: analyst recommendation mix and target-price upside,
//! optionally blended with an upstream news-sentiment scalar.

use std::collections::BTreeMap;

use super::{Agent, AgentError, AgentName, AgentResult};
use crate::data::bundle::{DataBundle, FundamentalsInfo, Symbol};

pub struct SentimentAgent;

impl SentimentAgent {
    pub fn new() -> Self {
        Self
    }

    fn analyst_counts(info: &FundamentalsInfo) -> (u32, f64) {
        let strong_buy = info.strong_buy.unwrap_or(0);
        let buy = info.buy.unwrap_or(0);
        let hold = info.hold.unwrap_or(0);
        let sell = info.sell.unwrap_or(0);
        let strong_sell = info.strong_sell.unwrap_or(0);
        let total = strong_buy + buy + hold + sell + strong_sell;
        if total == 0 {
            return (0, 50.0);
        }
        let weighted = f64::from(strong_buy) * 100.0
            + f64::from(buy) * 75.0
            + f64::from(hold) * 50.0
            + f64::from(sell) * 25.0;
        (total, weighted / f64::from(total))
    }

    fn score_target_upside(info: &FundamentalsInfo) -> Option<f64> {
        let price = info.current_price.filter(|p| *p > 0.0)?;
        let target = info.target_mean_price.filter(|t| *t > 0.0)?;
        let upside = (target / price - 1.0) * 100.0;
        Some(match upside {
            v if v > 25.0 => 90.0,
            v if v > 15.0 => 75.0,
            v if v > 5.0 => 60.0,
            v if v > 0.0 => 50.0,
            v if v > -10.0 => 35.0,
            _ => 20.0,
        })
    }

    fn confidence(total_ratings: u32, has_target: bool, has_news: bool) -> f64 {
        let mut confidence: f64 = match total_ratings {
            n if n >= 10 => 0.7,
            n if n >= 5 => 0.55,
            n if n >= 1 => 0.4,
            _ => 0.15,
        };
        if has_target {
            confidence += 0.2;
        }
        if has_news {
            confidence += 0.1;
        }
        confidence.min(1.0)
    }

    fn build_reasoning(analyst: f64, total: u32, upside: Option<f64>, news: Option<f64>) -> String {
        let mut reasons: Vec<String> = Vec::new();

        if total == 0 {
            reasons.push("no analyst coverage".to_string());
        } else if analyst > 70.0 {
            reasons.push(format!("bullish analyst consensus ({total} ratings)"));
        } else if analyst < 40.0 {
            reasons.push(format!("bearish analyst consensus ({total} ratings)"));
        } else {
            reasons.push(format!("mixed analyst views ({total} ratings)"));
        }
        match upside {
            Some(v) if v >= 75.0 => reasons.push("substantial target-price upside".to_string()),
            Some(v) if v <= 35.0 => reasons.push("price above analyst targets".to_string()),
            _ => {}
        }
        match news {
            Some(v) if v > 65.0 => reasons.push("positive news flow".to_string()),
            Some(v) if v < 35.0 => reasons.push("negative news flow".to_string()),
            _ => {}
        }

        let joined = reasons.join("; ");
        let mut chars = joined.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
            None => joined,
        }
    }
}

impl Default for SentimentAgent {
    fn default() -> Self {
        Self::new()
    }
}

impl Agent for SentimentAgent {
    fn name(&self) -> AgentName {
        AgentName::Sentiment
    }

    fn analyze(&self, _symbol: &Symbol, bundle: &DataBundle) -> Result<AgentResult, AgentError> {
        let Some(info) = bundle.info.as_ref() else {
            return Ok(AgentResult::degraded("no fundamentals snapshot"));
        };

        let (total_ratings, analyst) = Self::analyst_counts(info);
        let target = Self::score_target_upside(info);
        let news = info
            .news_sentiment
            .filter(|v| v.is_finite())
            .map(|v| v.clamp(0.0, 100.0));

        // Two-factor blend without a news scalar, three-factor with one.
        let composite = match (target, news) {
            (Some(t), Some(n)) => 0.60 * analyst + 0.15 * t + 0.25 * n,
            (Some(t), None) => 0.80 * analyst + 0.20 * t,
            (None, Some(n)) => 0.75 * analyst + 0.25 * n,
            (None, None) => analyst,
        };

        let confidence = Self::confidence(total_ratings, target.is_some(), news.is_some());

        let mut metrics = BTreeMap::new();
        metrics.insert("analyst_rating".to_string(), analyst);
        metrics.insert("total_ratings".to_string(), f64::from(total_ratings));
        if let Some(t) = target {
            metrics.insert("target_price_upside".to_string(), t);
        }
        if let Some(n) = news {
            metrics.insert("news_sentiment".to_string(), n);
        }
        if let Some(price) = info.current_price {
            metrics.insert("current_price".to_string(), price);
        }
        if let Some(target_price) = info.target_mean_price {
            metrics.insert("target_price".to_string(), target_price);
        }

        Ok(AgentResult::new(
            composite,
            confidence,
            metrics,
            Self::build_reasoning(analyst, total_ratings, target, news),
        ))
    }
}
