//! Scorer pipeline: regime-driven weights, determinism, cache idempotence,
//! and batch semantics.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use agentfolio::agents::AgentName;
use agentfolio::data::bundle::Bar;
use agentfolio::data::MarketDataProvider;
use agentfolio::engine::cache::AnalysisCache;
use agentfolio::engine::executor::{ExecutorConfig, ParallelExecutor};
use agentfolio::engine::regime::{RegimeCutoffs, RegimeService, Trend, Volatility};
use agentfolio::engine::scorer::{Category, ScoreError, StockScorer};
use agentfolio::engine::weights::{regime_weights, WEIGHT_SUM_TOLERANCE};

use common::{day, rich_bundle, scripted_agents, sym, Behavior, StubProvider};

fn fast_config() -> ExecutorConfig {
    ExecutorConfig {
        timeout_secs: 0.5,
        max_attempts: 3,
        backoff_base_secs: 0.01,
        backoff_cap_secs: 0.03,
    }
}

fn scorer_over(provider: Arc<StubProvider>, default_score: f64) -> StockScorer {
    let (agents, _) = scripted_agents(default_score, &[]);
    StockScorer::new(
        provider,
        Arc::new(ParallelExecutor::new(agents, fast_config())),
        Arc::new(AnalysisCache::new(64, Duration::from_secs(600))),
    )
}

/// Benchmark bars that classify as BEAR (smoothed decline) and HIGH_VOL
/// (annualized realized vol well above 25%).
fn bear_high_vol_bars() -> Vec<Bar> {
    let mut close = 400.0_f64;
    (0..90)
        .map(|i| {
            let ret = if i % 2 == 0 { -0.025 } else { 0.015 };
            close *= 1.0 + ret;
            Bar {
                date: day(i),
                open: close,
                high: close * 1.01,
                low: close * 0.99,
                close,
                volume: 2e6,
            }
        })
        .collect()
}

#[tokio::test]
async fn s5_regime_driven_weights_match_published_row() {
    let provider = Arc::new(
        StubProvider::new()
            .with_bundle("AAPL", rich_bundle())
            .with_benchmark_bars(bear_high_vol_bars()),
    );
    let regime = Arc::new(RegimeService::new(
        Arc::clone(&provider) as Arc<dyn MarketDataProvider>,
        RegimeCutoffs::default(),
    ));

    // Sanity: the scripted benchmark really is BEAR_HIGH_VOL.
    let snapshot = regime.current(false).await;
    assert_eq!(snapshot.label.trend, Trend::Bear);
    assert_eq!(snapshot.label.volatility, Volatility::HighVol);

    let scorer = scorer_over(Arc::clone(&provider), 70.0).with_regime(regime);
    let result = scorer.score(&sym("AAPL"), None).await.unwrap();

    let expected = regime_weights(snapshot.label);
    for agent in AgentName::ALL {
        assert!(
            (result.weights.get(agent) - expected.get(agent)).abs() < WEIGHT_SUM_TOLERANCE,
            "{agent} weight mismatch"
        );
    }
    assert_eq!(result.regime.unwrap().trend, Trend::Bear);
    assert_eq!(
        serde_json::to_value(result.regime.unwrap().trend).unwrap(),
        serde_json::json!("BEAR")
    );

    // Recomputing the composite from the per-agent scores reproduces the
    // scorer's output exactly.
    let recomputed: f64 = AgentName::ALL
        .iter()
        .map(|a| result.weights.get(*a) * result.agents.get(*a).score)
        .sum();
    assert!((result.composite - recomputed).abs() < 1e-9);
}

#[tokio::test]
async fn s1_real_agents_on_strong_data_recommend_buying() {
    let provider = Arc::new(StubProvider::new().with_bundle("AAPL", rich_bundle()));
    let scorer = StockScorer::new(
        provider,
        Arc::new(ParallelExecutor::new(
            agentfolio::agents::default_agents(),
            ExecutorConfig::default(),
        )),
        Arc::new(AnalysisCache::new(64, Duration::from_secs(600))),
    );

    let result = scorer.score(&sym("AAPL"), None).await.unwrap();

    assert!(result.agents.meta.failed_agents.is_empty());
    assert!(result.composite >= 55.0, "composite was {}", result.composite);
    assert!(
        matches!(result.category, Category::Buy | Category::StrongBuy),
        "category was {}",
        result.category
    );
}

#[tokio::test]
async fn composite_stays_in_agent_score_hull() {
    let (agents, _) = scripted_agents(
        64.0,
        &[
            (AgentName::Fundamentals, Behavior::Score(12.0, 0.8)),
            (AgentName::Momentum, Behavior::Score(97.0, 0.6)),
            (AgentName::Sentiment, Behavior::Score(33.0, 0.4)),
        ],
    );
    let provider = Arc::new(StubProvider::new().with_bundle("AAPL", rich_bundle()));
    let scorer = StockScorer::new(
        provider,
        Arc::new(ParallelExecutor::new(agents, fast_config())),
        Arc::new(AnalysisCache::new(64, Duration::from_secs(600))),
    );

    let result = scorer.score(&sym("AAPL"), None).await.unwrap();
    let scores: Vec<f64> = AgentName::ALL
        .iter()
        .map(|a| result.agents.get(*a).score)
        .collect();
    let min = scores.iter().copied().fold(f64::INFINITY, f64::min);
    let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    assert!(result.composite >= min && result.composite <= max);
}

#[tokio::test]
async fn static_scoring_is_deterministic() {
    let make = || {
        let provider = Arc::new(StubProvider::new().with_bundle("AAPL", rich_bundle()));
        scorer_over(provider, 71.0)
    };
    let a = make().score(&sym("AAPL"), None).await.unwrap();
    let b = make().score(&sym("AAPL"), None).await.unwrap();

    assert_eq!(a.composite, b.composite);
    assert_eq!(a.confidence, b.confidence);
    assert_eq!(a.category, b.category);
    for agent in AgentName::ALL {
        assert_eq!(a.agents.get(agent).score, b.agents.get(agent).score);
        assert_eq!(a.agents.get(agent).metrics, b.agents.get(agent).metrics);
    }
}

#[tokio::test]
async fn repeat_scoring_within_ttl_is_a_byte_identical_cache_hit() {
    let provider = Arc::new(StubProvider::new().with_bundle("AAPL", rich_bundle()));
    let scorer = scorer_over(Arc::clone(&provider), 66.0);

    let first = scorer.score(&sym("AAPL"), None).await.unwrap();
    let second = scorer.score(&sym("AAPL"), None).await.unwrap();

    assert_eq!(provider.comprehensive_calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );
}

#[tokio::test]
async fn point_in_time_scoring_bypasses_cache() {
    let provider = Arc::new(StubProvider::new().with_bundle("AAPL", rich_bundle()));
    let scorer = scorer_over(Arc::clone(&provider), 66.0);

    let as_of = Some(day(250));
    scorer.score(&sym("AAPL"), as_of).await.unwrap();
    scorer.score(&sym("AAPL"), as_of).await.unwrap();
    assert_eq!(provider.comprehensive_calls.load(Ordering::SeqCst), 2);
    assert_eq!(scorer.cache().len(), 0);
}

#[tokio::test]
async fn unknown_symbol_propagates_provider_error() {
    let provider = Arc::new(StubProvider::new());
    let scorer = scorer_over(provider, 66.0);
    let err = scorer.score(&sym("ZZZZ"), None).await.unwrap_err();
    assert!(matches!(
        err,
        ScoreError::Provider(agentfolio::data::ProviderError::UnknownSymbol(_))
    ));
}

#[tokio::test]
async fn batch_dedupes_symbols_and_ranks_successes() {
    let provider = Arc::new(
        StubProvider::new()
            .with_bundle("AAA", rich_bundle())
            .with_bundle("BBB", rich_bundle()),
    );
    let (agents, _) = scripted_agents(70.0, &[]);
    let scorer = StockScorer::new(
        Arc::clone(&provider) as Arc<dyn MarketDataProvider>,
        Arc::new(ParallelExecutor::new(agents, fast_config())),
        Arc::new(AnalysisCache::new(64, Duration::from_secs(600))),
    );

    let cancel = CancellationToken::new();
    let symbols = vec![sym("AAA"), sym("BBB"), sym("AAA"), sym("ZZZZ")];
    let outcomes = scorer.score_batch(&symbols, None, &cancel).await;

    // Deduped: AAA fetched once, three distinct symbols total.
    assert_eq!(outcomes.len(), 3);
    assert_eq!(provider.comprehensive_calls.load(Ordering::SeqCst), 3);

    // Successes lead, failure trails.
    assert!(outcomes[0].result.is_ok());
    assert!(outcomes[1].result.is_ok());
    assert!(outcomes[2].result.is_err());
    assert_eq!(outcomes[2].symbol, sym("ZZZZ"));
}

#[tokio::test]
async fn cancelled_batch_reports_cancellation() {
    let provider = Arc::new(StubProvider::new().with_bundle("AAA", rich_bundle()));
    let scorer = scorer_over(provider, 66.0);

    let cancel = CancellationToken::new();
    cancel.cancel();
    let outcomes = scorer.score_batch(&[sym("AAA")], None, &cancel).await;
    assert!(matches!(
        outcomes[0].result,
        Err(ScoreError::Cancelled)
    ));
}

#[tokio::test]
async fn high_score_low_confidence_is_not_a_buy() {
    // Every slot scores 70 with zero confidence behind it.
    let raw = agentfolio::agents::AgentResult::new(
        70.0,
        0.0,
        std::collections::BTreeMap::new(),
        "uncertain",
    );
    let overrides = AgentName::ALL.map(|n| (n, Behavior::Raw(raw.clone())));
    let (agents, _) = scripted_agents(70.0, &overrides);
    let provider = Arc::new(StubProvider::new().with_bundle("AAPL", rich_bundle()));
    let scorer = StockScorer::new(
        provider,
        Arc::new(ParallelExecutor::new(agents, fast_config())),
        Arc::new(AnalysisCache::new(64, Duration::from_secs(600))),
    );

    let result = scorer.score(&sym("AAPL"), None).await.unwrap();
    assert!((result.composite - 70.0).abs() < 1e-9);
    assert_eq!(result.confidence, 0.0);
    // 70 x (0.5 + 0) = 35: Underweight, not Buy.
    assert_eq!(result.category, Category::Underweight);
}
