//! HTTP/JSON API surface.
//!
//! Thin handlers over the scoring core: every response carries an
//! `X-Request-ID` header (inbound header propagated when present), batch
//! endpoints report partial success instead of failing the request, and
//! error bodies expose a short human-readable reason only.

use axum::extract::{Path, Query, Request, State};
use axum::http::{header::HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use dashmap::DashMap;
use garde::Validate;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use crate::agents::Agent;
use crate::backtest::engine::BacktestEngine;
use crate::backtest::types::BacktestConfig;
use crate::config::{AllowedOrigins, Settings};
use crate::data::bundle::{Bar, FundamentalsInfo, Symbol};
use crate::data::historical::HistoricalProvider;
use crate::data::storage::BacktestStore;
use crate::data::{MarketDataProvider, ProviderError};
use crate::engine::regime::RegimeService;
use crate::engine::scorer::{ScoreError, ScoreResult, StockScorer};

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Fewer than this many successful agents turns a single-symbol analysis
/// into a 503.
const MIN_AGENTS_FOR_RESPONSE: usize = 3;

#[derive(Clone)]
pub struct AppState {
    pub scorer: Arc<StockScorer>,
    pub regime: Arc<RegimeService>,
    pub provider: Arc<dyn MarketDataProvider>,
    pub agents: Vec<Arc<dyn Agent>>,
    pub historical: Option<Arc<HistoricalProvider>>,
    pub store: Arc<BacktestStore>,
    pub limiter: Arc<RateLimiter>,
    pub started_at: Instant,
}

/// Fixed-window per-client request counter.
pub struct RateLimiter {
    buckets: DashMap<String, (i64, u32)>,
    limit_per_minute: u32,
}

impl RateLimiter {
    pub fn new(limit_per_minute: u32) -> Self {
        Self {
            buckets: DashMap::new(),
            limit_per_minute: limit_per_minute.max(1),
        }
    }

    pub fn allow(&self, key: &str) -> bool {
        let minute = chrono::Utc::now().timestamp() / 60;
        let mut entry = self.buckets.entry(key.to_string()).or_insert((minute, 0));
        let (window, count) = *entry;
        if window == minute {
            if count >= self.limit_per_minute {
                return false;
            }
            *entry = (window, count + 1);
        } else {
            *entry = (minute, 1);
        }
        true
    }
}

#[derive(Debug)]
pub enum ApiError {
    Invalid(String),
    NotFound(String),
    RateLimited,
    Degraded(String),
    Internal(String),
}

impl From<ScoreError> for ApiError {
    fn from(err: ScoreError) -> Self {
        match err {
            ScoreError::Provider(ProviderError::UnknownSymbol(symbol)) => {
                ApiError::NotFound(format!("unknown symbol: {symbol}"))
            }
            ScoreError::Provider(ProviderError::Unavailable(reason)) => {
                ApiError::Degraded(format!("data provider unavailable: {reason}"))
            }
            ScoreError::Cancelled => ApiError::Internal("scoring cancelled".to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Invalid(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m),
            ApiError::RateLimited => (
                StatusCode::TOO_MANY_REQUESTS,
                "rate limit exceeded".to_string(),
            ),
            ApiError::Degraded(m) => (StatusCode::SERVICE_UNAVAILABLE, m),
            ApiError::Internal(m) => {
                tracing::error!(error = %m, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal error".to_string(),
                )
            }
        };
        let mut response = (status, Json(json!({ "error": message }))).into_response();
        if status == StatusCode::TOO_MANY_REQUESTS {
            response
                .headers_mut()
                .insert("retry-after", HeaderValue::from_static("60"));
        }
        response
    }
}

pub fn router(state: AppState, settings: &Settings) -> Router {
    let cors = match &settings.allowed_origins {
        AllowedOrigins::Any => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
        AllowedOrigins::List(origins) => {
            let parsed: Vec<HeaderValue> = origins
                .iter()
                .filter_map(|o| HeaderValue::from_str(o).ok())
                .collect();
            CorsLayer::new()
                .allow_origin(parsed)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    };

    Router::new()
        .route("/analyze", post(analyze))
        .route("/analyze/batch", post(analyze_batch))
        .route("/analyze/{symbol}", get(analyze_get))
        .route("/market/regime", get(market_regime))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/backtest/run", post(backtest_run))
        .route("/backtest/history", get(backtest_history))
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit))
        .layer(middleware::from_fn(request_id))
        .layer(cors)
        .with_state(state)
}

/// Propagate or mint the request id and attach it to the response.
async fn request_id(request: Request, next: Next) -> Response {
    let id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map_or_else(|| uuid::Uuid::new_v4().to_string(), ToString::to_string);

    tracing::info!(request_id = %id, method = %request.method(), path = %request.uri().path(), "Request");
    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

async fn rate_limit(State(state): State<AppState>, request: Request, next: Next) -> Response {
    // Health stays reachable for probes under load.
    if request.uri().path() == "/health" {
        return next.run(request).await;
    }
    let key = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .map_or_else(|| "global".to_string(), |v| v.split(',').next().unwrap_or("global").trim().to_string());
    if !state.limiter.allow(&key) {
        return ApiError::RateLimited.into_response();
    }
    next.run(request).await
}

#[derive(Debug, Deserialize, Validate)]
pub struct AnalyzeParams {
    /// US stock ticker symbol (e.g. "AAPL", "BRK.B")
    #[garde(length(min = 1, max = 10), pattern(r"^[A-Za-z0-9._-]+$"))]
    pub symbol: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct BatchParams {
    /// 1 to 50 ticker symbols
    #[garde(length(min = 1, max = 50), inner(length(min = 1, max = 10), pattern(r"^[A-Za-z0-9._-]+$")))]
    pub symbols: Vec<String>,
}

#[derive(Debug, Serialize)]
struct MarketSnapshot {
    #[serde(skip_serializing_if = "Option::is_none")]
    price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    change_pct: Option<f64>,
}

#[derive(Debug, Serialize)]
struct AnalyzeResponse {
    #[serde(flatten)]
    result: ScoreResult,
    snapshot: MarketSnapshot,
}

async fn analyze(
    State(state): State<AppState>,
    Json(params): Json<AnalyzeParams>,
) -> Result<Json<AnalyzeResponse>, ApiError> {
    params
        .validate()
        .map_err(|e| ApiError::Invalid(e.to_string()))?;
    let symbol =
        Symbol::parse(&params.symbol).map_err(|e| ApiError::Invalid(e.to_string()))?;
    analyze_symbol(&state, &symbol).await.map(Json)
}

async fn analyze_get(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
) -> Result<Json<AnalyzeResponse>, ApiError> {
    let symbol = Symbol::parse(&symbol).map_err(|e| ApiError::Invalid(e.to_string()))?;
    analyze_symbol(&state, &symbol).await.map(Json)
}

async fn analyze_symbol(state: &AppState, symbol: &Symbol) -> Result<AnalyzeResponse, ApiError> {
    let result = state.scorer.score(symbol, None).await?;

    if result.agents.meta.success_count < MIN_AGENTS_FOR_RESPONSE {
        return Err(ApiError::Degraded(format!(
            "analysis degraded: only {}/{} agents succeeded",
            result.agents.meta.success_count, result.agents.meta.total_agents
        )));
    }

    let snapshot = market_snapshot(state, symbol).await;
    Ok(AnalyzeResponse { result, snapshot })
}

async fn market_snapshot(state: &AppState, symbol: &Symbol) -> MarketSnapshot {
    let end = chrono::Utc::now().date_naive();
    let start = end - chrono::Duration::days(14);
    let bars: Vec<Bar> = state
        .provider
        .history(symbol, start, end)
        .await
        .unwrap_or_default();
    let price = bars.last().map(|b| b.close);
    let change_pct = match bars.len() {
        n if n >= 2 => {
            let prev = bars[n - 2].close;
            if prev > 0.0 {
                Some((bars[n - 1].close - prev) / prev * 100.0)
            } else {
                None
            }
        }
        _ => None,
    };
    MarketSnapshot { price, change_pct }
}

#[derive(Debug, Serialize)]
struct BatchError {
    symbol: String,
    error: String,
}

#[derive(Debug, Serialize)]
struct BatchResponse {
    results: Vec<ScoreResult>,
    errors: Vec<BatchError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warning: Option<String>,
}

async fn analyze_batch(
    State(state): State<AppState>,
    Json(params): Json<BatchParams>,
) -> Result<Json<BatchResponse>, ApiError> {
    params
        .validate()
        .map_err(|e| ApiError::Invalid(e.to_string()))?;

    let mut symbols = Vec::new();
    let mut errors = Vec::new();
    for raw in &params.symbols {
        match Symbol::parse(raw) {
            Ok(symbol) => symbols.push(symbol),
            Err(e) => errors.push(BatchError {
                symbol: raw.clone(),
                error: e.to_string(),
            }),
        }
    }

    let cancel = CancellationToken::new();
    let outcomes = state.scorer.score_batch(&symbols, None, &cancel).await;

    let mut results = Vec::new();
    let mut failed_agents_total = 0usize;
    for outcome in outcomes {
        match outcome.result {
            Ok(result) => {
                failed_agents_total += result.agents.failed_count();
                results.push(result);
            }
            Err(e) => errors.push(BatchError {
                symbol: outcome.symbol.to_string(),
                error: e.to_string(),
            }),
        }
    }

    let warning = if failed_agents_total > 0 {
        Some(format!(
            "{failed_agents_total} agent slot(s) degraded across the batch"
        ))
    } else if errors.is_empty() {
        None
    } else {
        Some(format!("{} symbol(s) failed", errors.len()))
    };

    Ok(Json(BatchResponse {
        results,
        errors,
        warning,
    }))
}

#[derive(Debug, Deserialize)]
struct RegimeQuery {
    #[serde(default)]
    force: bool,
}

async fn market_regime(
    State(state): State<AppState>,
    Query(query): Query<RegimeQuery>,
) -> Json<serde_json::Value> {
    let snapshot = state.regime.current(query.force).await;
    Json(json!({
        "regime": snapshot.label.composite(),
        "trend": snapshot.trend,
        "volatility": snapshot.volatility,
        "weights": snapshot.weights,
        "explanation": snapshot.explanation,
        "as_of": snapshot.as_of,
        "cache_hit": snapshot.cache_hit,
        "error": snapshot.error,
    }))
}

/// Smoke-run every agent on a small synthetic bundle. The check is
/// self-contained so a vendor outage cannot take `/health` down with it.
async fn health(State(state): State<AppState>) -> Response {
    let bundle = Arc::new(smoke_bundle());
    let symbol = Symbol::parse("AAPL").expect("static symbol");

    let mut statuses = serde_json::Map::new();
    let mut healthy = 0usize;
    for agent in &state.agents {
        let ok = matches!(agent.analyze(&symbol, &bundle), Ok(r) if !r.failed);
        if ok {
            healthy += 1;
        }
        statuses.insert(
            agent.name().to_string(),
            json!(if ok { "healthy" } else { "unhealthy" }),
        );
    }

    let (status, overall) = match healthy {
        n if n >= 4 => (StatusCode::OK, "healthy"),
        3 => (StatusCode::OK, "degraded"),
        _ => (StatusCode::SERVICE_UNAVAILABLE, "unhealthy"),
    };

    (
        status,
        Json(json!({ "status": overall, "agents": statuses })),
    )
        .into_response()
}

async fn metrics(State(state): State<AppState>) -> Json<serde_json::Value> {
    let cache = state.scorer.cache().stats();
    let utilization = if cache.capacity > 0 {
        cache.len as f64 / cache.capacity as f64 * 100.0
    } else {
        0.0
    };
    let lookups = cache.hits + cache.misses;
    let hit_rate = if lookups > 0 {
        cache.hits as f64 / lookups as f64 * 100.0
    } else {
        0.0
    };
    Json(json!({
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "cache": {
            "size": cache.len,
            "max_size": cache.capacity,
            "ttl_seconds": cache.ttl_seconds,
            "utilization_pct": utilization,
            "hit_rate_pct": hit_rate,
        },
    }))
}

#[derive(Debug, Serialize)]
struct BacktestRunResponse {
    run_id: String,
    result: serde_json::Value,
}

async fn backtest_run(
    State(state): State<AppState>,
    Json(config): Json<BacktestConfig>,
) -> Result<Json<BacktestRunResponse>, ApiError> {
    config
        .validate()
        .map_err(|e| ApiError::Invalid(e.to_string()))?;
    let Some(historical) = state.historical.clone() else {
        return Err(ApiError::Degraded(
            "no historical data provider configured".to_string(),
        ));
    };

    let engine = BacktestEngine::new(historical, Arc::clone(&state.scorer));
    let result = engine
        .run(&config)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    let config_json =
        serde_json::to_value(&config).map_err(|e| ApiError::Internal(e.to_string()))?;
    let result_json =
        serde_json::to_value(&result).map_err(|e| ApiError::Internal(e.to_string()))?;
    let entry = state
        .store
        .save(
            config_json,
            result_json.clone(),
            result.total_return,
            &config.start.to_string(),
            &config.end.to_string(),
        )
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok(Json(BacktestRunResponse {
        run_id: entry.run_id,
        result: result_json,
    }))
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    #[serde(default = "default_history_limit")]
    limit: usize,
}

fn default_history_limit() -> usize {
    10
}

async fn backtest_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let entries = state
        .store
        .index(query.limit.min(100))
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(json!({ "runs": entries })))
}

/// Deterministic bundle for the health smoke call: a year and a half of a
/// gentle uptrend plus a minimal fundamentals snapshot.
fn smoke_bundle() -> crate::data::bundle::DataBundle {
    let start = chrono::NaiveDate::from_ymd_opt(2023, 1, 2).expect("static date");
    let bars: Vec<Bar> = (0..380)
        .map(|i| {
            let drift = 100.0 + f64::from(i) * 0.1;
            let wiggle = f64::from(i % 7) * 0.3;
            let close = drift + wiggle;
            Bar {
                date: start + chrono::Duration::days(i64::from(i)),
                open: close - 0.2,
                high: close + 0.6,
                low: close - 0.7,
                close,
                volume: 1_000_000.0 + f64::from(i % 11) * 25_000.0,
            }
        })
        .collect();
    let indicators = crate::data::indicators::compute(&bars);
    let info = FundamentalsInfo {
        market_cap: Some(250e9),
        profit_margins: Some(0.18),
        operating_margins: Some(0.24),
        gross_margins: Some(0.45),
        return_on_equity: Some(0.22),
        return_on_assets: Some(0.12),
        revenue_growth: Some(0.12),
        current_ratio: Some(1.8),
        debt_to_equity: Some(0.8),
        free_cashflow: Some(12e9),
        trailing_pe: Some(22.0),
        current_price: bars.last().map(|b| b.close),
        target_mean_price: bars.last().map(|b| b.close * 1.12),
        strong_buy: Some(8),
        buy: Some(10),
        hold: Some(5),
        sell: Some(1),
        strong_sell: Some(0),
        sector: Some("Technology".to_string()),
        exchange: Some("NMS".to_string()),
        ..FundamentalsInfo::default()
    };
    crate::data::bundle::DataBundle {
        benchmark_history: bars.clone(),
        indicators,
        history: bars,
        info: Some(info),
        ..crate::data::bundle::DataBundle::default()
    }
}
