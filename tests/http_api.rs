//! HTTP surface: status mapping, request-id propagation, partial batch
//! success, health thresholds, and backtest persistence.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower::ServiceExt;

use agentfolio::agents::default_agents;
use agentfolio::backtest::risk::RiskLimits;
use agentfolio::config::{AllowedOrigins, Environment, Settings};
use agentfolio::data::bundle::FundamentalsInfo;
use agentfolio::data::historical::HistoricalProvider;
use agentfolio::data::storage::BacktestStore;
use agentfolio::data::MarketDataProvider;
use agentfolio::engine::cache::AnalysisCache;
use agentfolio::engine::executor::{ExecutorConfig, ParallelExecutor};
use agentfolio::engine::regime::{RegimeCutoffs, RegimeService};
use agentfolio::engine::scorer::StockScorer;
use agentfolio::server::{self, AppState, RateLimiter};

use common::{flat_bars, rich_bundle, sym, uptrend_bars, StubProvider};

fn test_settings() -> Settings {
    Settings {
        port: 0,
        environment: Environment::Development,
        cache_max_size: 64,
        cache_ttl: Duration::from_secs(600),
        enable_adaptive_weights: false,
        allowed_origins: AllowedOrigins::Any,
        llm_provider: None,
        rate_limit_per_minute: 1000,
        regime: RegimeCutoffs::default(),
        risk: RiskLimits::default(),
        executor: ExecutorConfig::default(),
    }
}

fn build_app(rate_limit: u32) -> (Router, tempfile::TempDir) {
    let provider = Arc::new(
        StubProvider::new()
            .with_bundle("AAPL", rich_bundle())
            .with_bundle("MSFT", rich_bundle())
            .with_benchmark_bars(flat_bars(90)),
    );
    let provider_dyn: Arc<dyn MarketDataProvider> = provider;

    let agents = default_agents();
    let executor = Arc::new(ParallelExecutor::new(
        agents.clone(),
        ExecutorConfig::default(),
    ));
    let cache = Arc::new(AnalysisCache::new(64, Duration::from_secs(600)));
    let scorer = Arc::new(StockScorer::new(
        Arc::clone(&provider_dyn),
        executor,
        cache,
    ));
    let regime = Arc::new(RegimeService::new(
        Arc::clone(&provider_dyn),
        RegimeCutoffs::default(),
    ));

    // A small historical provider so /backtest/run has data to walk.
    let mut historical = HistoricalProvider::new(sym("SPY"));
    for ticker in ["AAPL", "MSFT", "SPY"] {
        historical.insert_bars(sym(ticker), uptrend_bars(120));
        historical.insert_info(sym(ticker), FundamentalsInfo::default());
    }

    let dir = tempfile::tempdir().unwrap();
    let store = BacktestStore::new(dir.path().to_path_buf(), 10).unwrap();

    let state = AppState {
        scorer,
        regime,
        provider: provider_dyn,
        agents,
        historical: Some(Arc::new(historical)),
        store: Arc::new(store),
        limiter: Arc::new(RateLimiter::new(rate_limit)),
        started_at: Instant::now(),
    };

    let mut settings = test_settings();
    settings.rate_limit_per_minute = rate_limit;
    (server::router(state, &settings), dir)
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn analyze_returns_score_result_with_request_id() {
    let (app, _dir) = build_app(1000);
    let response = app
        .oneshot(post_json("/analyze", json!({"symbol": "AAPL"})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));

    let body = body_json(response).await;
    assert_eq!(body["symbol"], "AAPL");
    assert!(body["composite"].as_f64().unwrap() > 0.0);
    assert!(body["category"].is_string());
    assert_eq!(body["agents"]["meta"]["failed_agents"], json!([]));
}

#[tokio::test]
async fn inbound_request_id_is_propagated() {
    let (app, _dir) = build_app(1000);
    let mut request = post_json("/analyze", json!({"symbol": "AAPL"}));
    request
        .headers_mut()
        .insert("x-request-id", "trace-123".parse().unwrap());

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(
        response.headers().get("x-request-id").unwrap(),
        "trace-123"
    );
}

#[tokio::test]
async fn unknown_symbol_is_404() {
    let (app, _dir) = build_app(1000);
    let response = app
        .oneshot(
            Request::builder()
                .uri("/analyze/ZZZZ")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert!(body["error"].as_str().unwrap().contains("unknown symbol"));
}

#[tokio::test]
async fn malformed_symbol_is_400() {
    let (app, _dir) = build_app(1000);
    let response = app
        .oneshot(post_json("/analyze", json!({"symbol": "not a ticker"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn batch_reports_partial_success() {
    let (app, _dir) = build_app(1000);
    let response = app
        .oneshot(post_json(
            "/analyze/batch",
            json!({"symbols": ["AAPL", "MSFT", "ZZZZ"]}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["results"].as_array().unwrap().len(), 2);
    assert_eq!(body["errors"].as_array().unwrap().len(), 1);
    assert_eq!(body["errors"][0]["symbol"], "ZZZZ");
    assert!(body["warning"].is_string());
}

#[tokio::test]
async fn batch_rejects_oversized_requests() {
    let (app, _dir) = build_app(1000);
    let symbols: Vec<String> = (0..51).map(|i| format!("S{i}")).collect();
    let response = app
        .oneshot(post_json("/analyze/batch", json!({"symbols": symbols})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn regime_endpoint_reports_label_and_weights() {
    let (app, _dir) = build_app(1000);
    let response = app
        .oneshot(
            Request::builder()
                .uri("/market/regime")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let regime = body["regime"].as_str().unwrap();
    assert!(regime.contains('_'), "composite label was {regime}");
    let weights = body["weights"].as_object().unwrap();
    let sum: f64 = weights.values().map(|v| v.as_f64().unwrap()).sum();
    assert!((sum - 1.0).abs() < 1e-4);
    assert!(body["cache_hit"].is_boolean());
}

#[tokio::test]
async fn health_reports_all_agents_healthy() {
    let (app, _dir) = build_app(1000);
    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["agents"].as_object().unwrap().len(), 5);
}

#[tokio::test]
async fn rate_limit_returns_429_with_retry_after() {
    let (app, _dir) = build_app(1);
    let first = app
        .clone()
        .oneshot(post_json("/analyze", json!({"symbol": "AAPL"})))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = app
        .oneshot(post_json("/analyze", json!({"symbol": "AAPL"})))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(second.headers().contains_key("retry-after"));
}

#[tokio::test]
async fn metrics_expose_cache_state() {
    let (app, _dir) = build_app(1000);
    let _ = app
        .clone()
        .oneshot(post_json("/analyze", json!({"symbol": "AAPL"})))
        .await
        .unwrap();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["cache"]["size"], 1);
    assert_eq!(body["cache"]["max_size"], 64);
}

#[tokio::test]
async fn backtest_run_persists_and_lists_history() {
    let (app, _dir) = build_app(1000);
    let config = json!({
        "start": "2023-01-10",
        "end": "2023-04-20",
        "universe": ["AAPL", "MSFT"],
        "top_n": 2
    });

    let response = app
        .clone()
        .oneshot(post_json("/backtest/run", config))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let run_id = body["run_id"].as_str().unwrap().to_string();
    assert!(body["result"]["equity_curve"].as_array().unwrap().len() > 10);

    let history = app
        .oneshot(
            Request::builder()
                .uri("/backtest/history?limit=5")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let body = body_json(history).await;
    let runs = body["runs"].as_array().unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0]["run_id"], run_id);
}

#[tokio::test]
async fn backtest_rejects_invalid_config() {
    let (app, _dir) = build_app(1000);
    let config = json!({
        "start": "2023-04-20",
        "end": "2023-01-10",
        "universe": ["AAPL"]
    });
    let response = app
        .oneshot(post_json("/backtest/run", config))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
