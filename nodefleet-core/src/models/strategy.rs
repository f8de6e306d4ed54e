use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Load balancing algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BalancingAlgorithm {
    RoundRobin,
    LeastConnections,
    Weighted,
    #[default]
    Adaptive,
}

impl BalancingAlgorithm {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::RoundRobin => "round_robin",
            Self::LeastConnections => "least_connections",
            Self::Weighted => "weighted",
            Self::Adaptive => "adaptive",
        }
    }
}

impl FromStr for BalancingAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "round_robin" => Ok(Self::RoundRobin),
            "least_connections" => Ok(Self::LeastConnections),
            "weighted" => Ok(Self::Weighted),
            "adaptive" => Ok(Self::Adaptive),
            other => Err(Error::InvalidConfiguration(format!(
                "unknown load balancing algorithm '{other}'"
            ))),
        }
    }
}

/// Named load balancing strategy with free-form numeric parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadBalancingStrategy {
    pub name: String,
    pub algorithm: BalancingAlgorithm,
    #[serde(default)]
    pub parameters: HashMap<String, f64>,
}

impl Default for LoadBalancingStrategy {
    fn default() -> Self {
        Self::new(BalancingAlgorithm::Adaptive)
    }
}

impl LoadBalancingStrategy {
    /// Parameter: minimum |current - optimal| load fraction gap that triggers a suggestion
    pub const REBALANCE_THRESHOLD: &'static str = "rebalance_threshold";
    pub const DEFAULT_REBALANCE_THRESHOLD: f64 = 0.1;

    #[must_use]
    pub fn new(algorithm: BalancingAlgorithm) -> Self {
        Self {
            name: algorithm.as_str().to_string(),
            algorithm,
            parameters: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_parameter(mut self, key: impl Into<String>, value: f64) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    #[must_use]
    pub fn rebalance_threshold(&self) -> f64 {
        self.parameters
            .get(Self::REBALANCE_THRESHOLD)
            .copied()
            .unwrap_or(Self::DEFAULT_REBALANCE_THRESHOLD)
    }

    /// Reject malformed parameters before the strategy is applied
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidConfiguration(
                "load balancing strategy name must not be empty".to_string(),
            ));
        }

        for (key, value) in &self.parameters {
            if !value.is_finite() {
                return Err(Error::InvalidConfiguration(format!(
                    "parameter '{key}' of strategy '{}' must be finite",
                    self.name
                )));
            }
        }

        if self.algorithm == BalancingAlgorithm::Adaptive {
            if let Some(key) = self
                .parameters
                .keys()
                .find(|k| k.as_str() != Self::REBALANCE_THRESHOLD)
            {
                return Err(Error::InvalidConfiguration(format!(
                    "unknown parameter '{key}' for adaptive strategy"
                )));
            }
            let threshold = self.rebalance_threshold();
            if threshold <= 0.0 || threshold > 1.0 {
                return Err(Error::InvalidConfiguration(format!(
                    "rebalance_threshold must be in (0, 1], got {threshold}"
                )));
            }
        }

        Ok(())
    }
}

/// How an offline node's workload is handed to the rest of the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailoverMode {
    /// Single best replacement when it can absorb everything, else spread
    #[default]
    BestFit,
    /// Always spread proportionally across every online node
    Spread,
}

impl FailoverMode {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::BestFit => "best_fit",
            Self::Spread => "spread",
        }
    }
}

impl FromStr for FailoverMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "best_fit" => Ok(Self::BestFit),
            "spread" => Ok(Self::Spread),
            other => Err(Error::InvalidConfiguration(format!(
                "unknown failover mode '{other}'"
            ))),
        }
    }
}

/// Failover policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailoverStrategy {
    #[serde(rename = "type")]
    pub mode: FailoverMode,
    /// Per-node priority, higher wins ties between equally scored replacements
    #[serde(default)]
    pub priorities: HashMap<String, u32>,
    /// Degraded nodes below this score shed load
    pub health_threshold: u8,
    pub failover_time_seconds: u64,
}

impl Default for FailoverStrategy {
    fn default() -> Self {
        Self {
            mode: FailoverMode::BestFit,
            priorities: HashMap::new(),
            health_threshold: 70,
            failover_time_seconds: 30,
        }
    }
}

impl FailoverStrategy {
    #[must_use]
    pub fn priority(&self, node_id: &str) -> u32 {
        self.priorities.get(node_id).copied().unwrap_or(0)
    }

    pub fn validate(&self) -> Result<()> {
        if self.health_threshold > 100 {
            return Err(Error::InvalidConfiguration(format!(
                "failover health threshold must be within 0-100, got {}",
                self.health_threshold
            )));
        }
        if self.failover_time_seconds == 0 {
            return Err(Error::InvalidConfiguration(
                "failover_time_seconds must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
