//! The five scoring agents and their uniform contract.
//!
//! Agents are pure with respect to their inputs: no I/O, no shared mutable
//! state, safe to run on any thread. A real agent never errors; thin data
//! produces a degraded result instead. The `Err` channel of [`Agent::analyze`]
//! exists so the executor can classify injected faults (timeouts, connection
//! errors from exotic providers, panics) uniformly.

pub mod flow;
pub mod fundamentals;
pub mod momentum;
pub mod quality;
pub mod sentiment;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::data::bundle::{DataBundle, Symbol};

/// Reasoning strings on failed results are cut at this many characters.
const REASONING_LIMIT: usize = 100;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum AgentName {
    Fundamentals,
    Momentum,
    Quality,
    Sentiment,
    InstitutionalFlow,
}

impl AgentName {
    pub const ALL: [AgentName; 5] = [
        AgentName::Fundamentals,
        AgentName::Momentum,
        AgentName::Quality,
        AgentName::Sentiment,
        AgentName::InstitutionalFlow,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AgentName::Fundamentals => "fundamentals",
            AgentName::Momentum => "momentum",
            AgentName::Quality => "quality",
            AgentName::Sentiment => "sentiment",
            AgentName::InstitutionalFlow => "institutional_flow",
        }
    }
}

impl fmt::Display for AgentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Agent failure classification. Only `Connection` and `Timeout` are
/// transient (retried by the executor); everything else fails the slot
/// immediately.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AgentError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("agent timeout")]
    Timeout,
    #[error("invalid result: {0}")]
    InvalidResult(String),
    #[error("{0}")]
    Internal(String),
}

impl AgentError {
    pub fn is_transient(&self) -> bool {
        matches!(self, AgentError::Connection(_) | AgentError::Timeout)
    }
}

/// Uniform agent output. Score is clamped to [0, 100], confidence to [0, 1];
/// non-finite metric values are dropped at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResult {
    pub score: f64,
    pub confidence: f64,
    pub metrics: BTreeMap<String, f64>,
    pub reasoning: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub failed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AgentResult {
    pub fn new(
        score: f64,
        confidence: f64,
        metrics: BTreeMap<String, f64>,
        reasoning: impl Into<String>,
    ) -> Self {
        let score = if score.is_finite() { score.clamp(0.0, 100.0) } else { 50.0 };
        let confidence = if confidence.is_finite() {
            confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            score,
            confidence,
            metrics: metrics.into_iter().filter(|(_, v)| v.is_finite()).collect(),
            reasoning: reasoning.into(),
            failed: false,
            error: None,
        }
    }

    /// Thin-data result: neutral score with low (but non-zero) confidence.
    pub fn degraded(cause: &str) -> Self {
        Self {
            score: 50.0,
            confidence: 0.2,
            metrics: BTreeMap::new(),
            reasoning: format!("Limited analysis: {cause}"),
            failed: false,
            error: None,
        }
    }

    /// Hard-failure fallback: neutral score, zero confidence, flagged.
    pub fn failed(error: &str) -> Self {
        Self {
            score: 50.0,
            confidence: 0.0,
            metrics: BTreeMap::new(),
            reasoning: format!("Agent failed: {}", truncate(error, REASONING_LIMIT)),
            failed: true,
            error: Some(error.to_string()),
        }
    }
}

pub(crate) fn truncate(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}

/// The uniform agent contract. Implementations are interchangeable from the
/// executor's perspective.
pub trait Agent: Send + Sync {
    fn name(&self) -> AgentName;
    fn analyze(&self, symbol: &Symbol, bundle: &DataBundle) -> Result<AgentResult, AgentError>;
}

/// The standard five-agent set in canonical order.
pub fn default_agents() -> Vec<Arc<dyn Agent>> {
    vec![
        Arc::new(fundamentals::FundamentalsAgent::new()),
        Arc::new(momentum::MomentumAgent::new()),
        Arc::new(quality::QualityAgent::new()),
        Arc::new(sentiment::SentimentAgent::new()),
        Arc::new(flow::InstitutionalFlowAgent::new()),
    ]
}
