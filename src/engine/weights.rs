//! Agent weight vectors: the static default and the regime-adaptive table.

use serde::{Deserialize, Serialize};

use crate::agents::AgentName;
use crate::engine::regime::{RegimeLabel, Trend, Volatility};

/// Tolerance on the sum-to-one invariant.
pub const WEIGHT_SUM_TOLERANCE: f64 = 1e-4;

/// The static default vector, calibrated on historical performance.
pub const STATIC_WEIGHTS: Weights = Weights {
    fundamentals: 0.36,
    momentum: 0.27,
    quality: 0.18,
    sentiment: 0.09,
    institutional_flow: 0.10,
};

/// Per-agent weights. Non-negative, summing to 1 within tolerance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Weights {
    pub fundamentals: f64,
    pub momentum: f64,
    pub quality: f64,
    pub sentiment: f64,
    pub institutional_flow: f64,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum WeightsError {
    #[error("weight for {0} out of range [0, 1]: {1}")]
    OutOfRange(AgentName, f64),
    #[error("weights must sum to 1.0, got {0}")]
    BadSum(f64),
}

impl Weights {
    pub fn get(&self, agent: AgentName) -> f64 {
        match agent {
            AgentName::Fundamentals => self.fundamentals,
            AgentName::Momentum => self.momentum,
            AgentName::Quality => self.quality,
            AgentName::Sentiment => self.sentiment,
            AgentName::InstitutionalFlow => self.institutional_flow,
        }
    }

    pub fn sum(&self) -> f64 {
        AgentName::ALL.iter().map(|a| self.get(*a)).sum()
    }

    pub fn validate(&self) -> Result<(), WeightsError> {
        for agent in AgentName::ALL {
            let w = self.get(agent);
            if !w.is_finite() || !(0.0..=1.0).contains(&w) {
                return Err(WeightsError::OutOfRange(agent, w));
            }
        }
        let sum = self.sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(WeightsError::BadSum(sum));
        }
        Ok(())
    }
}

impl Default for Weights {
    fn default() -> Self {
        STATIC_WEIGHTS
    }
}

/// The 9-entry adaptive table. Bull markets lean momentum as volatility
/// rises; bear markets lean fundamentals/quality and de-emphasize
/// sentiment; the sideways/normal row is the static default.
pub fn regime_weights(label: RegimeLabel) -> Weights {
    use Trend::{Bear, Bull, Sideways};
    use Volatility::{HighVol, LowVol, NormalVol};

    let (fundamentals, momentum, quality, sentiment, institutional_flow) =
        match (label.trend, label.volatility) {
            (Bull, LowVol) => (0.40, 0.22, 0.20, 0.08, 0.10),
            (Bull, NormalVol) => (0.36, 0.27, 0.18, 0.09, 0.10),
            (Bull, HighVol) => (0.28, 0.34, 0.18, 0.08, 0.12),
            (Sideways, LowVol) => (0.42, 0.18, 0.22, 0.08, 0.10),
            (Sideways, NormalVol) => (0.36, 0.27, 0.18, 0.09, 0.10),
            (Sideways, HighVol) => (0.32, 0.22, 0.26, 0.08, 0.12),
            (Bear, LowVol) => (0.44, 0.16, 0.26, 0.06, 0.08),
            (Bear, NormalVol) => (0.40, 0.18, 0.28, 0.06, 0.08),
            (Bear, HighVol) => (0.30, 0.14, 0.36, 0.04, 0.16),
        };

    Weights {
        fundamentals,
        momentum,
        quality,
        sentiment,
        institutional_flow,
    }
}
