//! Runtime settings: environment variables plus an optional TOML file for
//! the tunables (regime cutoffs, risk limits, executor timing).

use anyhow::{Context, Result};
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;

use crate::backtest::risk::RiskLimits;
use crate::engine::executor::ExecutorConfig;
use crate::engine::regime::RegimeCutoffs;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowedOrigins {
    /// `*`: any origin, credentials disabled.
    Any,
    List(Vec<String>),
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub port: u16,
    pub environment: Environment,
    pub cache_max_size: usize,
    pub cache_ttl: Duration,
    pub enable_adaptive_weights: bool,
    pub allowed_origins: AllowedOrigins,
    pub llm_provider: Option<String>,
    pub rate_limit_per_minute: u32,
    pub regime: RegimeCutoffs,
    pub risk: RiskLimits,
    pub executor: ExecutorConfig,
}

/// Optional TOML overrides, path given by `AGENTFOLIO_CONFIG`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    regime: Option<RegimeCutoffs>,
    risk: Option<RiskLimits>,
    executor: Option<ExecutorConfig>,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        let file = match std::env::var("AGENTFOLIO_CONFIG") {
            Ok(path) => {
                let raw = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read config file: {path}"))?;
                toml::from_str::<FileConfig>(&raw)
                    .with_context(|| format!("Failed to parse config file: {path}"))?
            }
            Err(_) => FileConfig::default(),
        };

        let environment = match env_or("ENVIRONMENT", "development".to_string()).to_lowercase().as_str() {
            "production" | "prod" => Environment::Production,
            _ => Environment::Development,
        };

        let allowed_origins = parse_origins(&env_or(
            "ALLOWED_ORIGINS",
            "http://localhost:5173,http://localhost:3000".to_string(),
        ));
        if allowed_origins == AllowedOrigins::Any && environment == Environment::Production {
            tracing::error!(
                "CORS wildcard (*) enabled in production; set ALLOWED_ORIGINS to an explicit list"
            );
        }

        Ok(Self {
            port: env_or("PORT", 8000),
            environment,
            cache_max_size: env_or("CACHE_MAX_SIZE", 2000),
            cache_ttl: Duration::from_secs(env_or("CACHE_TTL_SECONDS", 1200)),
            enable_adaptive_weights: env_flag("ENABLE_ADAPTIVE_WEIGHTS"),
            allowed_origins,
            llm_provider: std::env::var("LLM_PROVIDER").ok().filter(|v| !v.is_empty()),
            rate_limit_per_minute: env_or("RATE_LIMIT_PER_MINUTE", 120),
            regime: file.regime.unwrap_or_default(),
            risk: file.risk.unwrap_or_default(),
            executor: file.executor.unwrap_or_default(),
        })
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(key, raw = %raw, "Unparseable env value, using default");
                default
            }
        },
        Err(_) => default,
    }
}

fn env_flag(key: &str) -> bool {
    std::env::var(key)
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(false)
}

fn parse_origins(raw: &str) -> AllowedOrigins {
    let trimmed = raw.trim();
    if trimmed == "*" {
        return AllowedOrigins::Any;
    }
    AllowedOrigins::List(
        trimmed
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToString::to_string)
            .collect(),
    )
}
