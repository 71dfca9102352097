//! Stock scorer: orchestrates provider → weights → executor → composite.

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::agents::AgentName;
use crate::data::bundle::Symbol;
use crate::data::{MarketDataProvider, ProviderError};
use crate::engine::cache::AnalysisCache;
use crate::engine::executor::{AgentBundle, ParallelExecutor};
use crate::engine::regime::{RegimeLabel, RegimeService};
use crate::engine::weights::Weights;

/// Confidence-discounted category bands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Category {
    #[serde(rename = "Strong Buy")]
    StrongBuy,
    Buy,
    Hold,
    Underweight,
    Sell,
}

impl Category {
    /// A high score with no confidence behind it is not a buy: the raw
    /// composite is discounted by `0.5 + 0.5 × confidence` before banding.
    pub fn from_score(composite: f64, confidence: f64) -> Self {
        let adjusted = composite * (0.5 + 0.5 * confidence);
        match adjusted {
            v if v >= 75.0 => Category::StrongBuy,
            v if v >= 65.0 => Category::Buy,
            v if v >= 50.0 => Category::Hold,
            v if v >= 35.0 => Category::Underweight,
            _ => Category::Sell,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Category::StrongBuy => write!(f, "Strong Buy"),
            Category::Buy => write!(f, "Buy"),
            Category::Hold => write!(f, "Hold"),
            Category::Underweight => write!(f, "Underweight"),
            Category::Sell => write!(f, "Sell"),
        }
    }
}

/// Stricter six-way label used by narrative consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Recommendation {
    StrongBuy,
    Buy,
    WeakBuy,
    Hold,
    WeakSell,
    Sell,
}

impl Recommendation {
    /// Momentum veto: a clearly broken trend under an otherwise-positive
    /// composite forces SELL rather than riding the blend into a downtrend.
    pub fn derive(composite: f64, momentum_score: f64) -> Self {
        if momentum_score < 35.0 && composite >= 50.0 {
            return Recommendation::Sell;
        }
        match composite {
            v if v >= 75.0 => Recommendation::StrongBuy,
            v if v >= 65.0 => Recommendation::Buy,
            v if v >= 55.0 => Recommendation::WeakBuy,
            v if v >= 45.0 => Recommendation::Hold,
            v if v >= 35.0 => Recommendation::WeakSell,
            _ => Recommendation::Sell,
        }
    }
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Recommendation::StrongBuy => write!(f, "STRONG BUY"),
            Recommendation::Buy => write!(f, "BUY"),
            Recommendation::WeakBuy => write!(f, "WEAK BUY"),
            Recommendation::Hold => write!(f, "HOLD"),
            Recommendation::WeakSell => write!(f, "WEAK SELL"),
            Recommendation::Sell => write!(f, "SELL"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScoreResult {
    pub symbol: Symbol,
    pub composite: f64,
    pub confidence: f64,
    pub agents: AgentBundle,
    pub weights: Weights,
    pub category: Category,
    pub recommendation: Recommendation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub regime: Option<RegimeLabel>,
}

#[derive(Debug, thiserror::Error)]
pub enum ScoreError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("scoring cancelled")]
    Cancelled,
}

/// Per-symbol outcome of a batch call.
#[derive(Debug)]
pub struct BatchOutcome {
    pub symbol: Symbol,
    pub result: Result<ScoreResult, ScoreError>,
}

pub struct StockScorer {
    provider: Arc<dyn MarketDataProvider>,
    executor: Arc<ParallelExecutor>,
    regime: Option<Arc<RegimeService>>,
    cache: Arc<AnalysisCache<ScoreResult>>,
    static_weights: Weights,
    /// In-flight symbol bound for batch fan-out, protecting the provider.
    batch_concurrency: usize,
}

impl StockScorer {
    pub fn new(
        provider: Arc<dyn MarketDataProvider>,
        executor: Arc<ParallelExecutor>,
        cache: Arc<AnalysisCache<ScoreResult>>,
    ) -> Self {
        Self {
            provider,
            executor,
            regime: None,
            cache,
            static_weights: Weights::default(),
            batch_concurrency: 10,
        }
    }

    /// Enable adaptive weighting through a regime service.
    pub fn with_regime(mut self, regime: Arc<RegimeService>) -> Self {
        self.regime = Some(regime);
        self
    }

    pub fn with_static_weights(mut self, weights: Weights) -> Self {
        self.static_weights = weights;
        self
    }

    pub fn with_batch_concurrency(mut self, bound: usize) -> Self {
        self.batch_concurrency = bound.max(1);
        self
    }

    pub fn cache(&self) -> &AnalysisCache<ScoreResult> {
        &self.cache
    }

    pub fn executor(&self) -> &ParallelExecutor {
        &self.executor
    }

    async fn resolve_weights(&self) -> (Weights, Option<RegimeLabel>) {
        match &self.regime {
            Some(service) => {
                let snapshot = service.current(false).await;
                (snapshot.weights, Some(snapshot.label))
            }
            None => (self.static_weights, None),
        }
    }

    /// Score one symbol. Live calls (`as_of = None`) are cached per symbol;
    /// point-in-time calls always recompute.
    pub async fn score(
        &self,
        symbol: &Symbol,
        as_of: Option<chrono::NaiveDate>,
    ) -> Result<ScoreResult, ScoreError> {
        if as_of.is_none() {
            if let Some(cached) = self.cache.get(symbol) {
                tracing::debug!(%symbol, "Analysis cache hit");
                return Ok(cached);
            }
        }

        let bundle = self.provider.comprehensive(symbol, as_of).await?;
        let (weights, regime) = self.resolve_weights().await;
        let agents = self.executor.execute_all(symbol, Arc::new(bundle)).await;

        let composite: f64 = AgentName::ALL
            .iter()
            .map(|a| weights.get(*a) * agents.get(*a).score)
            .sum();
        let confidence: f64 = AgentName::ALL
            .iter()
            .map(|a| weights.get(*a) * agents.get(*a).confidence)
            .sum();
        let momentum_score = agents.get(AgentName::Momentum).score;

        let result = ScoreResult {
            symbol: symbol.clone(),
            composite,
            confidence,
            category: Category::from_score(composite, confidence),
            recommendation: Recommendation::derive(composite, momentum_score),
            agents,
            weights,
            regime,
        };

        if as_of.is_none() {
            self.cache.insert(symbol.clone(), result.clone());
        }
        Ok(result)
    }

    /// Score a list of symbols concurrently, bounded by the batch fan-out
    /// limit. Symbols are deduplicated so the provider sees each at most
    /// once per batch. Successful outcomes are sorted by composite score
    /// descending; failures keep their relative order at the tail.
    pub async fn score_batch(
        &self,
        symbols: &[Symbol],
        as_of: Option<chrono::NaiveDate>,
        cancel: &CancellationToken,
    ) -> Vec<BatchOutcome> {
        let mut deduped: Vec<Symbol> = Vec::new();
        for symbol in symbols {
            if !deduped.contains(symbol) {
                deduped.push(symbol.clone());
            }
        }

        let semaphore = Arc::new(tokio::sync::Semaphore::new(self.batch_concurrency));
        let tasks = deduped.into_iter().map(|symbol| {
            let semaphore = Arc::clone(&semaphore);
            async move {
                let result = tokio::select! {
                    () = cancel.cancelled() => Err(ScoreError::Cancelled),
                    outcome = async {
                        // Holds a permit for the whole provider+executor span.
                        let _permit = semaphore.acquire().await.expect("semaphore closed");
                        self.score(&symbol, as_of).await
                    } => outcome,
                };
                BatchOutcome { symbol, result }
            }
        });

        let mut outcomes = futures::future::join_all(tasks).await;
        outcomes.sort_by_key(|o| match &o.result {
            Ok(result) => (0, std::cmp::Reverse(OrderedFloat(result.composite))),
            Err(_) => (1, std::cmp::Reverse(OrderedFloat(f64::NEG_INFINITY))),
        });
        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_confidence_discount() {
        // A 70-score with zero confidence discounts to 35, which is not a Buy.
        assert_eq!(Category::from_score(70.0, 0.0), Category::Underweight);
        assert_eq!(Category::from_score(70.0, 1.0), Category::Buy);
        assert_eq!(Category::from_score(90.0, 0.9), Category::StrongBuy);
        assert_eq!(Category::from_score(20.0, 1.0), Category::Sell);
    }

    #[test]
    fn category_band_edges() {
        assert_eq!(Category::from_score(75.0, 1.0), Category::StrongBuy);
        assert_eq!(Category::from_score(65.0, 1.0), Category::Buy);
        assert_eq!(Category::from_score(50.0, 1.0), Category::Hold);
        assert_eq!(Category::from_score(35.0, 1.0), Category::Underweight);
        assert_eq!(Category::from_score(34.9, 1.0), Category::Sell);
    }

    #[test]
    fn recommendation_bands() {
        assert_eq!(Recommendation::derive(80.0, 80.0), Recommendation::StrongBuy);
        assert_eq!(Recommendation::derive(68.0, 60.0), Recommendation::Buy);
        assert_eq!(Recommendation::derive(58.0, 60.0), Recommendation::WeakBuy);
        assert_eq!(Recommendation::derive(47.0, 60.0), Recommendation::Hold);
        assert_eq!(Recommendation::derive(40.0, 60.0), Recommendation::WeakSell);
        assert_eq!(Recommendation::derive(30.0, 60.0), Recommendation::Sell);
    }

    #[test]
    fn momentum_veto_forces_sell() {
        // Composite says buy, momentum says the trend is broken.
        assert_eq!(Recommendation::derive(68.0, 20.0), Recommendation::Sell);
        // Below the composite floor the veto is moot (already weak).
        assert_eq!(Recommendation::derive(40.0, 20.0), Recommendation::WeakSell);
        // Healthy momentum leaves the bands alone.
        assert_eq!(Recommendation::derive(68.0, 50.0), Recommendation::Buy);
    }

    #[test]
    fn category_display_strings() {
        assert_eq!(Category::StrongBuy.to_string(), "Strong Buy");
        assert_eq!(Recommendation::WeakSell.to_string(), "WEAK SELL");
    }
}
