//! Institutional flow agent: volume-flow trends, money-flow strength,
//! unusual activity, and VWAP positioning.

use std::collections::BTreeMap;

use super::{Agent, AgentError, AgentName, AgentResult};
use crate::data::bundle::{names, DataBundle, Symbol};

/// Minimum bar history for meaningful flow analysis.
const MIN_BARS: usize = 60;

/// Lookback for the OBV / A-D slope estimate.
const FLOW_WINDOW: usize = 60;

pub struct InstitutionalFlowAgent;

impl InstitutionalFlowAgent {
    pub fn new() -> Self {
        Self
    }

    /// Normalized slope: change over the trailing window divided by the mean
    /// absolute level, so accumulation series of any magnitude compare.
    fn trend(series: &[f64], window: usize) -> Option<f64> {
        if series.len() < 2 {
            return None;
        }
        let window = window.min(series.len());
        let slice = &series[series.len() - window..];
        let mean_abs = slice.iter().map(|v| v.abs()).sum::<f64>() / window as f64;
        if mean_abs == 0.0 {
            return None;
        }
        Some((slice[slice.len() - 1] - slice[0]) / mean_abs)
    }

    fn band_flow_trend(trend: f64) -> f64 {
        match trend {
            v if v > 0.10 => 50.0,
            v if v > 0.05 => 35.0,
            v if v > 0.0 => 20.0,
            v if v > -0.05 => 10.0,
            _ => 0.0,
        }
    }

    fn score_volume_flow(obv: Option<&[f64]>, ad: Option<&[f64]>) -> f64 {
        let mut score: f64 = 0.0;
        if let Some(trend) = obv.and_then(|s| Self::trend(s, FLOW_WINDOW)) {
            score += Self::band_flow_trend(trend);
        }
        if let Some(trend) = ad.and_then(|s| Self::trend(s, FLOW_WINDOW)) {
            score += Self::band_flow_trend(trend);
        }
        score.min(100.0)
    }

    fn score_money_flow(mfi: Option<f64>, cmf: Option<f64>) -> f64 {
        let mut score: f64 = 0.0;

        if let Some(mfi) = mfi {
            score += match mfi {
                v if (40.0..=60.0).contains(&v) => 30.0,
                v if (30.0..40.0).contains(&v) => 40.0,
                v if (20.0..30.0).contains(&v) => 50.0,
                v if v > 60.0 && v <= 70.0 => 35.0,
                v if v > 70.0 && v <= 80.0 => 20.0,
                _ => 10.0,
            };
        }
        if let Some(cmf) = cmf {
            score += match cmf {
                v if v > 0.15 => 50.0,
                v if v > 0.05 => 40.0,
                v if v > 0.0 => 30.0,
                v if v > -0.05 => 20.0,
                v if v > -0.15 => 10.0,
                _ => 0.0,
            };
        }

        score.min(100.0)
    }

    fn score_unusual_activity(zscore: Option<f64>, volumes: &[f64]) -> f64 {
        let mut score: f64 = 0.0;

        if let Some(z) = zscore {
            score += match z {
                v if v > 3.0 => 70.0,
                v if v > 2.0 => 60.0,
                v if v > 1.5 => 50.0,
                v if v > 1.0 => 40.0,
                v if v > 0.5 => 30.0,
                _ => 20.0,
            };
        }
        if volumes.len() >= 20 {
            if let Some(trend) = Self::trend(volumes, 20) {
                score += match trend {
                    v if v > 0.20 => 30.0,
                    v if v > 0.10 => 20.0,
                    v if v > 0.0 => 10.0,
                    _ => 0.0,
                };
            }
        }

        score.min(100.0)
    }

    fn score_vwap(price: Option<f64>, vwap: Option<f64>) -> f64 {
        let (Some(price), Some(vwap)) = (price, vwap) else {
            return 50.0;
        };
        if vwap <= 0.0 {
            return 50.0;
        }
        let gap = (price / vwap - 1.0) * 100.0;
        match gap {
            v if v > 3.0 => 100.0,
            v if v > 1.0 => 80.0,
            v if v > 0.0 => 65.0,
            v if v > -1.0 => 50.0,
            v if v > -3.0 => 35.0,
            _ => 20.0,
        }
    }

    fn confidence(bundle: &DataBundle) -> f64 {
        let inputs = [
            bundle.indicators.series(names::OBV).is_some(),
            bundle.indicators.series(names::AD).is_some(),
            bundle.indicators.scalar(names::MFI).is_some(),
            bundle.indicators.scalar(names::CMF).is_some(),
            bundle.indicators.scalar(names::VWAP).is_some(),
            bundle.indicators.scalar(names::VOLUME_ZSCORE).is_some(),
        ];
        let available = inputs.iter().filter(|b| **b).count();
        let coverage = available as f64 / inputs.len() as f64;
        // Longer histories firm up the slope estimates.
        let depth = if bundle.history.len() >= 2 * FLOW_WINDOW {
            1.0
        } else {
            0.8
        };
        coverage * depth
    }

    fn build_reasoning(flow: f64, money: f64, unusual: f64, vwap: f64) -> String {
        let mut reasons: Vec<&str> = Vec::new();

        if flow > 70.0 {
            reasons.push("sustained institutional accumulation");
        } else if flow < 25.0 {
            reasons.push("distribution in volume flows");
        }
        if money > 70.0 {
            reasons.push("strong buying pressure");
        } else if money < 30.0 {
            reasons.push("selling pressure");
        }
        if unusual > 70.0 {
            reasons.push("unusual volume activity");
        }
        if vwap >= 80.0 {
            reasons.push("trading well above VWAP");
        } else if vwap <= 20.0 {
            reasons.push("trading well below VWAP");
        }

        if reasons.is_empty() {
            "Neutral institutional flow".to_string()
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

impl Default for InstitutionalFlowAgent {
    fn default() -> Self {
        Self::new()
    }
}

impl Agent for InstitutionalFlowAgent {
    fn name(&self) -> AgentName {
        AgentName::InstitutionalFlow
    }

    fn analyze(&self, _symbol: &Symbol, bundle: &DataBundle) -> Result<AgentResult, AgentError> {
        if bundle.history.len() < MIN_BARS {
            return Ok(AgentResult::degraded(
                "insufficient history for institutional flow analysis",
            ));
        }

        let volumes: Vec<f64> = bundle.history.iter().map(|b| b.volume).collect();
        let flow = Self::score_volume_flow(
            bundle.indicators.series(names::OBV),
            bundle.indicators.series(names::AD),
        );
        let money = Self::score_money_flow(
            bundle.indicators.scalar(names::MFI),
            bundle.indicators.scalar(names::CMF),
        );
        let unusual = Self::score_unusual_activity(
            bundle.indicators.scalar(names::VOLUME_ZSCORE),
            &volumes,
        );
        let vwap = Self::score_vwap(bundle.last_close(), bundle.indicators.scalar(names::VWAP));

        let composite = 0.40 * flow + 0.30 * money + 0.20 * unusual + 0.10 * vwap;
        let confidence = Self::confidence(bundle);

        let mut metrics = BTreeMap::new();
        metrics.insert("volume_flow".to_string(), flow);
        metrics.insert("money_flow".to_string(), money);
        metrics.insert("unusual_activity".to_string(), unusual);
        metrics.insert("vwap_position".to_string(), vwap);
        if let Some(mfi) = bundle.indicators.scalar(names::MFI) {
            metrics.insert("mfi".to_string(), mfi);
        }
        if let Some(cmf) = bundle.indicators.scalar(names::CMF) {
            metrics.insert("cmf".to_string(), cmf);
        }
        if let Some(z) = bundle.indicators.scalar(names::VOLUME_ZSCORE) {
            metrics.insert("volume_zscore".to_string(), z);
        }

        Ok(AgentResult::new(
            composite,
            confidence,
            metrics,
            Self::build_reasoning(flow, money, unusual, vwap),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::bundle::Bar;
    use crate::data::indicators;
    use chrono::NaiveDate;

    fn accumulation_bars(n: usize) -> Vec<Bar> {
        (0..n)
            .map(|i| {
                let close = 100.0 + i as f64 * 0.5;
                Bar {
                    date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
                        + chrono::Duration::days(i as i64),
                    open: close - 0.5,
                    high: close + 0.5,
                    low: close - 1.0,
                    close,
                    volume: 1_000_000.0 + i as f64 * 10_000.0,
                }
            })
            .collect()
    }

    fn bundle_from(bars: Vec<Bar>) -> DataBundle {
        let indicators = indicators::compute(&bars);
        DataBundle {
            history: bars,
            indicators,
            ..DataBundle::default()
        }
    }

    #[test]
    fn short_history_degrades() {
        let agent = InstitutionalFlowAgent::new();
        let symbol = Symbol::parse("AAPL").unwrap();
        let result = agent
            .analyze(&symbol, &bundle_from(accumulation_bars(30)))
            .unwrap();
        assert_eq!(result.score, 50.0);
        assert!(result.reasoning.starts_with("Limited analysis"));
    }

    #[test]
    fn accumulation_pattern_scores_above_neutral() {
        let agent = InstitutionalFlowAgent::new();
        let symbol = Symbol::parse("AAPL").unwrap();
        let result = agent
            .analyze(&symbol, &bundle_from(accumulation_bars(150)))
            .unwrap();
        assert!(result.score > 55.0, "score was {}", result.score);
        assert!(result.confidence > 0.8);
    }

    #[test]
    fn trend_normalizes_by_level() {
        let rising: Vec<f64> = (0..80).map(|i| 1000.0 + f64::from(i) * 10.0).collect();
        let t = InstitutionalFlowAgent::trend(&rising, 60).unwrap();
        assert!(t > 0.3, "trend was {t}");
        let flat = vec![500.0; 80];
        assert_eq!(InstitutionalFlowAgent::trend(&flat, 60), Some(0.0));
    }

    #[test]
    fn mfi_oversold_band_beats_overbought() {
        let oversold = InstitutionalFlowAgent::score_money_flow(Some(25.0), None);
        let overbought = InstitutionalFlowAgent::score_money_flow(Some(85.0), None);
        assert!(oversold > overbought);
    }

    #[test]
    fn vwap_gap_bands() {
        assert_eq!(
            InstitutionalFlowAgent::score_vwap(Some(104.0), Some(100.0)),
            100.0
        );
        assert_eq!(
            InstitutionalFlowAgent::score_vwap(Some(96.0), Some(100.0)),
            20.0
        );
        assert_eq!(InstitutionalFlowAgent::score_vwap(None, Some(100.0)), 50.0);
    }

    #[test]
    fn subscores_exposed_in_metrics() {
        let agent = InstitutionalFlowAgent::new();
        let symbol = Symbol::parse("AAPL").unwrap();
        let result = agent
            .analyze(&symbol, &bundle_from(accumulation_bars(150)))
            .unwrap();
        for key in ["volume_flow", "money_flow", "unusual_activity", "vwap_position"] {
            assert!(result.metrics.contains_key(key), "missing {key}");
        }
    }
}
