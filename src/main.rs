use anyhow::Result;
use std::sync::Arc;
use std::time::Instant;
use tracing_subscriber::{self, EnvFilter};

use agentfolio::agents::default_agents;
use agentfolio::config::Settings;
use agentfolio::data::bundle::Symbol;
use agentfolio::data::historical::HistoricalProvider;
use agentfolio::data::storage::BacktestStore;
use agentfolio::data::MarketDataProvider;
use agentfolio::engine::cache::AnalysisCache;
use agentfolio::engine::executor::ParallelExecutor;
use agentfolio::engine::regime::RegimeService;
use agentfolio::engine::scorer::StockScorer;
use agentfolio::server::{self, AppState, RateLimiter};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let settings = Settings::from_env()?;

    // The bundled provider serves preloaded point-in-time bars; a vendor
    // integration would slot in behind the same trait.
    let benchmark = Symbol::parse(&settings.regime.benchmark)
        .unwrap_or_else(|_| Symbol::parse("SPY").expect("static symbol"));
    let historical = match std::env::var("DATA_DIR") {
        Ok(dir) => {
            let provider =
                HistoricalProvider::load_json_dir(benchmark, std::path::Path::new(&dir))?;
            tracing::info!(dir = %dir, symbols = provider.symbols().len(), "Loaded bar data");
            Arc::new(provider)
        }
        Err(_) => {
            tracing::warn!("DATA_DIR not set; starting with an empty data provider");
            Arc::new(HistoricalProvider::new(benchmark))
        }
    };
    let provider: Arc<dyn MarketDataProvider> = historical.clone();

    let agents = default_agents();
    let executor = Arc::new(ParallelExecutor::new(
        agents.clone(),
        settings.executor.clone(),
    ));
    let cache = Arc::new(AnalysisCache::new(
        settings.cache_max_size,
        settings.cache_ttl,
    ));
    let regime = Arc::new(RegimeService::new(
        Arc::clone(&provider),
        settings.regime.clone(),
    ));

    let mut scorer = StockScorer::new(Arc::clone(&provider), executor, cache);
    if settings.enable_adaptive_weights {
        tracing::info!("Adaptive agent weights enabled");
        scorer = scorer.with_regime(Arc::clone(&regime));
    }
    let scorer = Arc::new(scorer);

    let state = AppState {
        scorer,
        regime,
        provider,
        agents,
        historical: Some(historical),
        store: Arc::new(BacktestStore::from_env()?),
        limiter: Arc::new(RateLimiter::new(settings.rate_limit_per_minute)),
        started_at: Instant::now(),
    };

    let app = server::router(state, &settings);
    let addr = format!("0.0.0.0:{}", settings.port);
    tracing::info!("Starting agentfolio HTTP server on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    Ok(())
}
