//! Market-regime detection and adaptive-weight lookup.
//!
//! Trend and volatility are classified from ~3 months of benchmark bars
//! using closed-form statistics; the composite label keys the 9-row weight
//! table in [`crate::engine::weights`]. The last successful classification
//! is memoized behind an async mutex held across refresh, so concurrent
//! callers cannot stampede the provider.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::data::bundle::{Bar, Symbol};
use crate::data::MarketDataProvider;
use crate::engine::weights::{regime_weights, Weights};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Trend {
    Bull,
    Bear,
    Sideways,
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trend::Bull => write!(f, "BULL"),
            Trend::Bear => write!(f, "BEAR"),
            Trend::Sideways => write!(f, "SIDEWAYS"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Volatility {
    LowVol,
    NormalVol,
    HighVol,
}

impl fmt::Display for Volatility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Volatility::LowVol => write!(f, "LOW_VOL"),
            Volatility::NormalVol => write!(f, "NORMAL_VOL"),
            Volatility::HighVol => write!(f, "HIGH_VOL"),
        }
    }
}

/// One of exactly nine regime labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegimeLabel {
    pub trend: Trend,
    pub volatility: Volatility,
}

impl RegimeLabel {
    pub const DEFAULT: RegimeLabel = RegimeLabel {
        trend: Trend::Sideways,
        volatility: Volatility::NormalVol,
    };

    pub fn composite(&self) -> String {
        format!("{}_{}", self.trend, self.volatility)
    }

    pub fn explanation(&self) -> &'static str {
        match (self.trend, self.volatility) {
            (Trend::Bull, Volatility::HighVol) => {
                "Bull market with high volatility - strong uptrend but choppy; momentum matters more"
            }
            (Trend::Bull, Volatility::NormalVol) => {
                "Bull market with normal volatility - steady uptrend; balanced approach"
            }
            (Trend::Bull, Volatility::LowVol) => {
                "Bull market with low volatility - calm uptrend; fundamentals lead"
            }
            (Trend::Bear, Volatility::HighVol) => {
                "Bear market with high volatility - panic selling; quality and safety first"
            }
            (Trend::Bear, Volatility::NormalVol) => {
                "Bear market with normal volatility - downtrend; focus on quality and fundamentals"
            }
            (Trend::Bear, Volatility::LowVol) => {
                "Bear market with low volatility - slow decline; fundamentals critical"
            }
            (Trend::Sideways, Volatility::HighVol) => {
                "Sideways market with high volatility - range-bound but choppy; balance quality and momentum"
            }
            (Trend::Sideways, Volatility::NormalVol) => {
                "Sideways market with normal volatility - neutral trend; standard balanced approach"
            }
            (Trend::Sideways, Volatility::LowVol) => {
                "Sideways market with low volatility - calm consolidation; fundamentals matter most"
            }
        }
    }
}

impl fmt::Display for RegimeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.trend, self.volatility)
    }
}

/// Classifier cutoffs. These vary with the benchmark, so they are
/// configuration rather than constants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegimeCutoffs {
    /// Benchmark symbol the classification is computed against.
    pub benchmark: String,
    /// Bars fetched for classification (~3 months of trading days).
    pub lookback_days: usize,
    /// Smoothing window applied to closes before the trend test.
    pub smoothing_window: usize,
    /// Smoothed-close pct change above which the trend is BULL.
    pub bull_threshold: f64,
    /// Smoothed-close pct change below which the trend is BEAR.
    pub bear_threshold: f64,
    /// Annualized realized vol below which volatility is LOW_VOL.
    pub low_vol: f64,
    /// Annualized realized vol above which volatility is HIGH_VOL.
    pub high_vol: f64,
    /// Memoization TTL in seconds.
    pub cache_ttl_secs: u64,
}

impl Default for RegimeCutoffs {
    fn default() -> Self {
        Self {
            benchmark: "SPY".to_string(),
            lookback_days: 92,
            smoothing_window: 21,
            bull_threshold: 0.03,
            bear_threshold: -0.03,
            low_vol: 0.12,
            high_vol: 0.25,
            cache_ttl_secs: 6 * 3600,
        }
    }
}

/// Result of one regime query.
#[derive(Debug, Clone, Serialize)]
pub struct RegimeSnapshot {
    pub label: RegimeLabel,
    pub trend: Trend,
    pub volatility: Volatility,
    pub weights: Weights,
    pub explanation: String,
    pub as_of: DateTime<Utc>,
    pub cache_hit: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RegimeSnapshot {
    fn fresh(label: RegimeLabel) -> Self {
        Self {
            label,
            trend: label.trend,
            volatility: label.volatility,
            weights: regime_weights(label),
            explanation: label.explanation().to_string(),
            as_of: Utc::now(),
            cache_hit: false,
            error: None,
        }
    }

    fn fallback(error: String) -> Self {
        let mut snapshot = Self::fresh(RegimeLabel::DEFAULT);
        snapshot.error = Some(error);
        snapshot
    }
}

struct Memo {
    snapshot: RegimeSnapshot,
    refreshed_at: Instant,
}

pub struct RegimeService {
    provider: Arc<dyn MarketDataProvider>,
    cutoffs: RegimeCutoffs,
    benchmark: Symbol,
    ttl: Duration,
    // Held across refresh: concurrent callers wait for the single in-flight
    // fetch instead of issuing their own.
    memo: tokio::sync::Mutex<Option<Memo>>,
}

impl RegimeService {
    pub fn new(provider: Arc<dyn MarketDataProvider>, cutoffs: RegimeCutoffs) -> Self {
        let benchmark = Symbol::parse(&cutoffs.benchmark)
            .unwrap_or_else(|_| Symbol::parse("SPY").expect("static fallback symbol"));
        let ttl = Duration::from_secs(cutoffs.cache_ttl_secs);
        Self {
            provider,
            cutoffs,
            benchmark,
            ttl,
            memo: tokio::sync::Mutex::new(None),
        }
    }

    /// Current regime. `force` bypasses the memoized value. Never errors:
    /// on fetch failure the default label is returned with `error` set
    /// (and not memoized).
    pub async fn current(&self, force: bool) -> RegimeSnapshot {
        let mut memo = self.memo.lock().await;

        if !force {
            if let Some(cached) = memo.as_ref() {
                if cached.refreshed_at.elapsed() < self.ttl {
                    let mut snapshot = cached.snapshot.clone();
                    snapshot.cache_hit = true;
                    return snapshot;
                }
            }
        }

        match self.classify().await {
            Ok(label) => {
                tracing::info!(regime = %label, "Market regime classified");
                let snapshot = RegimeSnapshot::fresh(label);
                *memo = Some(Memo {
                    snapshot: snapshot.clone(),
                    refreshed_at: Instant::now(),
                });
                snapshot
            }
            Err(reason) => {
                tracing::warn!(%reason, "Regime detection failed, using default weights");
                RegimeSnapshot::fallback(reason)
            }
        }
    }

    /// Adaptive weights for the current regime (fallback weights on error).
    pub async fn adaptive_weights(&self, force: bool) -> Weights {
        self.current(force).await.weights
    }

    async fn classify(&self) -> Result<RegimeLabel, String> {
        let end = Utc::now().date_naive();
        let start = end - chrono::Duration::days(self.cutoffs.lookback_days as i64 * 3 / 2);
        let bars = self
            .provider
            .history(&self.benchmark, start, end)
            .await
            .map_err(|e| e.to_string())?;
        let bars: Vec<Bar> = bars
            .into_iter()
            .rev()
            .take(self.cutoffs.lookback_days)
            .rev()
            .collect();
        if bars.len() < 30 {
            return Err(format!(
                "insufficient benchmark data: {} bars",
                bars.len()
            ));
        }
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        Ok(RegimeLabel {
            trend: self.classify_trend(&closes),
            volatility: self.classify_volatility(&closes),
        })
    }

    /// Trend = pct change of the smoothed close series over the window.
    fn classify_trend(&self, closes: &[f64]) -> Trend {
        let window = self.cutoffs.smoothing_window.max(1);
        let smoothed: Vec<f64> = closes
            .windows(window)
            .map(|w| w.iter().sum::<f64>() / window as f64)
            .collect();
        let (Some(first), Some(last)) = (smoothed.first(), smoothed.last()) else {
            return Trend::Sideways;
        };
        if *first <= 0.0 {
            return Trend::Sideways;
        }
        let change = (last - first) / first;
        if change > self.cutoffs.bull_threshold {
            Trend::Bull
        } else if change < self.cutoffs.bear_threshold {
            Trend::Bear
        } else {
            Trend::Sideways
        }
    }

    /// Volatility = annualized std-dev of close-to-close returns.
    fn classify_volatility(&self, closes: &[f64]) -> Volatility {
        let returns: Vec<f64> = closes
            .windows(2)
            .filter(|p| p[0] > 0.0)
            .map(|p| (p[1] - p[0]) / p[0])
            .collect();
        if returns.len() < 2 {
            return Volatility::NormalVol;
        }
        let mean = returns.iter().sum::<f64>() / returns.len() as f64;
        let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>()
            / (returns.len() - 1) as f64;
        let annualized = variance.sqrt() * (252.0_f64).sqrt();
        if annualized < self.cutoffs.low_vol {
            Volatility::LowVol
        } else if annualized > self.cutoffs.high_vol {
            Volatility::HighVol
        } else {
            Volatility::NormalVol
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::bundle::DataBundle;
    use crate::data::ProviderError;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedProvider {
        bars: Vec<Bar>,
        fail: bool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl MarketDataProvider for ScriptedProvider {
        async fn comprehensive(
            &self,
            _symbol: &Symbol,
            _as_of: Option<NaiveDate>,
        ) -> Result<DataBundle, ProviderError> {
            Err(ProviderError::Unavailable("not used".into()))
        }

        async fn history(
            &self,
            _symbol: &Symbol,
            _start: NaiveDate,
            _end: NaiveDate,
        ) -> Result<Vec<Bar>, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(ProviderError::Unavailable("benchmark feed down".into()))
            } else {
                Ok(self.bars.clone())
            }
        }
    }

    fn bars_with_daily_return(n: usize, daily: f64) -> Vec<Bar> {
        let mut close = 400.0;
        (0..n)
            .map(|i| {
                close *= 1.0 + daily;
                Bar {
                    date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
                        + chrono::Duration::days(i as i64),
                    open: close,
                    high: close,
                    low: close,
                    close,
                    volume: 1e6,
                }
            })
            .collect()
    }

    fn service(bars: Vec<Bar>, fail: bool) -> RegimeService {
        let provider = Arc::new(ScriptedProvider {
            bars,
            fail,
            calls: AtomicUsize::new(0),
        });
        RegimeService::new(provider, RegimeCutoffs::default())
    }

    #[tokio::test]
    async fn steady_rally_is_bull_low_vol() {
        let svc = service(bars_with_daily_return(90, 0.002), false);
        let snapshot = svc.current(false).await;
        assert_eq!(snapshot.label.trend, Trend::Bull);
        assert_eq!(snapshot.label.volatility, Volatility::LowVol);
        assert!(!snapshot.cache_hit);
        assert!(snapshot.error.is_none());
    }

    #[tokio::test]
    async fn steady_decline_is_bear() {
        let svc = service(bars_with_daily_return(90, -0.002), false);
        let snapshot = svc.current(false).await;
        assert_eq!(snapshot.label.trend, Trend::Bear);
    }

    #[tokio::test]
    async fn flat_market_is_sideways() {
        let svc = service(bars_with_daily_return(90, 0.0), false);
        let snapshot = svc.current(false).await;
        assert_eq!(snapshot.label.trend, Trend::Sideways);
        assert_eq!(snapshot.label.composite(), "SIDEWAYS_LOW_VOL");
    }

    #[tokio::test]
    async fn fetch_failure_falls_back_with_error() {
        let svc = service(Vec::new(), true);
        let snapshot = svc.current(false).await;
        assert_eq!(snapshot.label, RegimeLabel::DEFAULT);
        assert!(snapshot.error.is_some());
        // Fallbacks are not memoized.
        let again = svc.current(false).await;
        assert!(!again.cache_hit);
    }

    #[tokio::test]
    async fn second_call_is_cache_hit() {
        let provider = Arc::new(ScriptedProvider {
            bars: bars_with_daily_return(90, 0.002),
            fail: false,
            calls: AtomicUsize::new(0),
        });
        let svc = RegimeService::new(Arc::clone(&provider) as Arc<dyn MarketDataProvider>,
            RegimeCutoffs::default());
        let first = svc.current(false).await;
        let second = svc.current(false).await;
        assert!(!first.cache_hit);
        assert!(second.cache_hit);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert_eq!(first.label, second.label);
    }

    #[tokio::test]
    async fn force_refresh_bypasses_memo() {
        let provider = Arc::new(ScriptedProvider {
            bars: bars_with_daily_return(90, 0.002),
            fail: false,
            calls: AtomicUsize::new(0),
        });
        let svc = RegimeService::new(Arc::clone(&provider) as Arc<dyn MarketDataProvider>,
            RegimeCutoffs::default());
        let _ = svc.current(false).await;
        let forced = svc.current(true).await;
        assert!(!forced.cache_hit);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
        // A plain read after a forced refresh sees the refreshed value.
        let after = svc.current(false).await;
        assert!(after.cache_hit);
    }

    #[test]
    fn composite_string_shape() {
        let label = RegimeLabel {
            trend: Trend::Bear,
            volatility: Volatility::HighVol,
        };
        assert_eq!(label.composite(), "BEAR_HIGH_VOL");
    }
}
