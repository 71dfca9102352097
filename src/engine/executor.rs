//! Parallel agent executor: fan-out/fan-in with deadlines, retry, and
//! graceful degradation.
//!
//! The executor never fails a request. Every agent fault (validation
//! short-circuit, timeout, connection error, panic, malformed result) is
//! absorbed into a failed [`AgentResult`] slot, and the returned bundle
//! always carries all five agent keys.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::agents::{Agent, AgentError, AgentName, AgentResult};
use crate::data::bundle::{DataBundle, Symbol};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Per-attempt deadline for one agent call.
    pub timeout_secs: f64,
    /// Total attempts per agent (1 initial + retries).
    pub max_attempts: u32,
    /// First backoff delay; doubles per retry.
    pub backoff_base_secs: f64,
    /// Backoff ceiling.
    pub backoff_cap_secs: f64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30.0,
            max_attempts: 3,
            backoff_base_secs: 2.0,
            backoff_cap_secs: 10.0,
        }
    }
}

impl ExecutorConfig {
    fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_secs.max(0.001))
    }

    /// Exponential backoff before retry `attempt` (1-based), capped, with a
    /// little jitter so synchronized retries spread out.
    fn backoff(&self, attempt: u32) -> Duration {
        let base = self.backoff_base_secs * f64::from(2_u32.saturating_pow(attempt - 1));
        let capped = base.min(self.backoff_cap_secs);
        let jitter_max = (capped * 0.1).max(0.001);
        let jitter = rand::rng().random_range(0.0..jitter_max);
        Duration::from_secs_f64(capped + jitter)
    }
}

/// Execution metadata attached to every bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionMeta {
    pub elapsed_ms: u64,
    pub failed_agents: Vec<AgentName>,
    pub success_count: usize,
    pub total_agents: usize,
    pub timestamp: DateTime<Utc>,
}

/// All five agent results plus execution metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentBundle {
    pub results: BTreeMap<AgentName, AgentResult>,
    pub meta: ExecutionMeta,
}

impl AgentBundle {
    pub fn get(&self, agent: AgentName) -> &AgentResult {
        &self.results[&agent]
    }

    pub fn failed_count(&self) -> usize {
        self.meta.failed_agents.len()
    }
}

pub struct ParallelExecutor {
    agents: Vec<Arc<dyn Agent>>,
    config: ExecutorConfig,
}

impl ParallelExecutor {
    pub fn new(agents: Vec<Arc<dyn Agent>>, config: ExecutorConfig) -> Self {
        Self { agents, config }
    }

    pub fn agents(&self) -> &[Arc<dyn Agent>] {
        &self.agents
    }

    /// Bundle pre-check. Violations short-circuit the whole request.
    fn validate_bundle(bundle: &DataBundle) -> Result<(), String> {
        let mut problems = Vec::new();
        if bundle.history.is_empty() {
            problems.push("historical_data is empty");
        }
        if bundle.indicators.is_empty() {
            problems.push("technical_data is missing");
        }
        if bundle.info.is_none() {
            problems.push("info is missing");
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems.join("; "))
        }
    }

    /// Run all configured agents concurrently against one bundle.
    pub async fn execute_all(&self, symbol: &Symbol, bundle: Arc<DataBundle>) -> AgentBundle {
        let started = Instant::now();

        if let Err(reason) = Self::validate_bundle(&bundle) {
            tracing::error!(%symbol, %reason, "Data validation failed");
            let message = format!("Data validation failed for {symbol}: {reason}");
            let results: BTreeMap<AgentName, AgentResult> = self
                .agents
                .iter()
                .map(|a| (a.name(), AgentResult::failed(&message)))
                .collect();
            let failed_agents: Vec<AgentName> = results.keys().copied().collect();
            return AgentBundle {
                meta: ExecutionMeta {
                    elapsed_ms: started.elapsed().as_millis() as u64,
                    success_count: 0,
                    total_agents: results.len(),
                    failed_agents,
                    timestamp: Utc::now(),
                },
                results,
            };
        }

        let tasks = self.agents.iter().map(|agent| {
            let agent = Arc::clone(agent);
            let symbol = symbol.clone();
            let bundle = Arc::clone(&bundle);
            let config = self.config.clone();
            async move {
                let name = agent.name();
                let result = run_agent_with_retry(agent, &symbol, bundle, &config).await;
                (name, result)
            }
        });

        let outcomes = futures::future::join_all(tasks).await;

        let mut results = BTreeMap::new();
        let mut failed_agents = Vec::new();
        for (name, result) in outcomes {
            if result.failed {
                failed_agents.push(name);
            }
            results.insert(name, result);
        }
        let success_count = results.len() - failed_agents.len();
        let elapsed = started.elapsed();

        tracing::info!(
            %symbol,
            elapsed_ms = elapsed.as_millis() as u64,
            success_count,
            failed = ?failed_agents,
            "Parallel execution completed"
        );

        AgentBundle {
            meta: ExecutionMeta {
                elapsed_ms: elapsed.as_millis() as u64,
                success_count,
                total_agents: results.len(),
                failed_agents,
                timestamp: Utc::now(),
            },
            results,
        }
    }
}

/// One agent task: deadline per attempt, retry on transient faults only.
async fn run_agent_with_retry(
    agent: Arc<dyn Agent>,
    symbol: &Symbol,
    bundle: Arc<DataBundle>,
    config: &ExecutorConfig,
) -> AgentResult {
    let name = agent.name();
    let max_attempts = config.max_attempts.max(1);

    for attempt in 1..=max_attempts {
        let call_agent = Arc::clone(&agent);
        let call_symbol = symbol.clone();
        let call_bundle = Arc::clone(&bundle);
        let handle =
            tokio::task::spawn_blocking(move || call_agent.analyze(&call_symbol, &call_bundle));

        let error = match tokio::time::timeout(config.timeout(), handle).await {
            Ok(Ok(Ok(result))) => match validate_result(&result) {
                Ok(()) => {
                    tracing::debug!(agent = %name, score = result.score, confidence = result.confidence, "Agent completed");
                    return sanitize(result);
                }
                Err(reason) => {
                    tracing::error!(agent = %name, %reason, "Agent returned malformed result");
                    return AgentResult::failed(&reason);
                }
            },
            Ok(Ok(Err(err))) => err,
            // The blocking task panicked or was torn down.
            Ok(Err(join_err)) => {
                let reason = format!("{name} panicked: {join_err}");
                tracing::error!(agent = %name, %reason, "Agent task aborted");
                return AgentResult::failed(&reason);
            }
            // Deadline elapsed; the handle is dropped and the slot degrades.
            Err(_) => AgentError::Timeout,
        };

        if error.is_transient() && attempt < max_attempts {
            let delay = config.backoff(attempt);
            tracing::warn!(
                agent = %name,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Transient agent failure, backing off"
            );
            tokio::time::sleep(delay).await;
            continue;
        }

        let reason = format!("{name} failed: {error}");
        tracing::error!(agent = %name, attempt, %reason, "Agent failed permanently");
        return AgentResult::failed(&reason);
    }

    // Unreachable: the loop always returns by the last attempt.
    AgentResult::failed(&format!("{name} failed: retries exhausted"))
}

/// Post-validation of an agent's return value: score and confidence must be
/// finite reals.
fn validate_result(result: &AgentResult) -> Result<(), String> {
    if !result.score.is_finite() {
        return Err(format!("non-finite score: {}", result.score));
    }
    if !result.confidence.is_finite() {
        return Err(format!("non-finite confidence: {}", result.confidence));
    }
    Ok(())
}

/// Clamp ranges and drop non-finite metrics on the way out.
fn sanitize(mut result: AgentResult) -> AgentResult {
    result.score = result.score.clamp(0.0, 100.0);
    result.confidence = result.confidence.clamp(0.0, 1.0);
    result.metrics.retain(|_, v| v.is_finite());
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ScoreAgent {
        name: AgentName,
        score: f64,
    }

    impl Agent for ScoreAgent {
        fn name(&self) -> AgentName {
            self.name
        }

        fn analyze(&self, _: &Symbol, _: &DataBundle) -> Result<AgentResult, AgentError> {
            Ok(AgentResult::new(self.score, 0.9, BTreeMap::new(), "ok"))
        }
    }

    struct RawAgent {
        name: AgentName,
        result: AgentResult,
    }

    impl Agent for RawAgent {
        fn name(&self) -> AgentName {
            self.name
        }

        fn analyze(&self, _: &Symbol, _: &DataBundle) -> Result<AgentResult, AgentError> {
            Ok(self.result.clone())
        }
    }

    fn fast_config() -> ExecutorConfig {
        ExecutorConfig {
            timeout_secs: 0.2,
            max_attempts: 3,
            backoff_base_secs: 0.01,
            backoff_cap_secs: 0.02,
        }
    }

    fn valid_bundle() -> Arc<DataBundle> {
        let mut bundle = DataBundle::default();
        bundle.history = vec![crate::data::bundle::Bar {
            date: chrono::NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            open: 100.0,
            high: 101.0,
            low: 99.0,
            close: 100.5,
            volume: 1e6,
        }];
        bundle.indicators.insert_scalar("rsi", 50.0);
        bundle.info = Some(crate::data::bundle::FundamentalsInfo::default());
        Arc::new(bundle)
    }

    fn five_agents(make: impl Fn(AgentName) -> Arc<dyn Agent>) -> Vec<Arc<dyn Agent>> {
        AgentName::ALL.iter().map(|n| make(*n)).collect()
    }

    #[tokio::test]
    async fn all_slots_present_on_success() {
        let executor = ParallelExecutor::new(
            five_agents(|name| Arc::new(ScoreAgent { name, score: 70.0 }) as Arc<dyn Agent>),
            fast_config(),
        );
        let symbol = Symbol::parse("AAPL").unwrap();
        let bundle = executor.execute_all(&symbol, valid_bundle()).await;
        assert_eq!(bundle.results.len(), 5);
        assert_eq!(bundle.meta.success_count, 5);
        assert!(bundle.meta.failed_agents.is_empty());
    }

    #[tokio::test]
    async fn validation_failure_short_circuits_all_slots() {
        let executor = ParallelExecutor::new(
            five_agents(|name| Arc::new(ScoreAgent { name, score: 70.0 }) as Arc<dyn Agent>),
            fast_config(),
        );
        let symbol = Symbol::parse("AAPL").unwrap();
        let bundle = executor
            .execute_all(&symbol, Arc::new(DataBundle::default()))
            .await;
        assert_eq!(bundle.results.len(), 5);
        assert_eq!(bundle.meta.success_count, 0);
        for result in bundle.results.values() {
            assert!(result.failed);
            assert!(result.error.as_deref().unwrap().contains("historical_data is empty"));
        }
    }

    #[tokio::test]
    async fn non_finite_result_fails_slot_without_retry() {
        let bad = AgentResult {
            score: f64::NAN,
            confidence: 0.5,
            metrics: BTreeMap::new(),
            reasoning: String::new(),
            failed: false,
            error: None,
        };
        let executor = ParallelExecutor::new(
            vec![Arc::new(RawAgent {
                name: AgentName::Sentiment,
                result: bad,
            }) as Arc<dyn Agent>],
            fast_config(),
        );
        let symbol = Symbol::parse("AAPL").unwrap();
        let bundle = executor.execute_all(&symbol, valid_bundle()).await;
        let slot = bundle.get(AgentName::Sentiment);
        assert!(slot.failed);
        assert!(slot.reasoning.contains("non-finite score"));
    }

    #[tokio::test]
    async fn out_of_range_result_is_clamped() {
        let raw = AgentResult {
            score: 250.0,
            confidence: 3.0,
            metrics: BTreeMap::new(),
            reasoning: "hot".into(),
            failed: false,
            error: None,
        };
        let executor = ParallelExecutor::new(
            vec![Arc::new(RawAgent {
                name: AgentName::Momentum,
                result: raw,
            }) as Arc<dyn Agent>],
            fast_config(),
        );
        let symbol = Symbol::parse("AAPL").unwrap();
        let bundle = executor.execute_all(&symbol, valid_bundle()).await;
        let slot = bundle.get(AgentName::Momentum);
        assert_eq!(slot.score, 100.0);
        assert_eq!(slot.confidence, 1.0);
        assert!(!slot.failed);
    }

    #[test]
    fn backoff_schedule_doubles_and_caps() {
        let config = ExecutorConfig::default();
        // Jitter adds at most 10%, so check lower bounds and the cap.
        assert!(config.backoff(1) >= Duration::from_secs_f64(2.0));
        assert!(config.backoff(2) >= Duration::from_secs_f64(4.0));
        assert!(config.backoff(3) >= Duration::from_secs_f64(8.0));
        assert!(config.backoff(4) <= Duration::from_secs_f64(11.1));
    }
}
