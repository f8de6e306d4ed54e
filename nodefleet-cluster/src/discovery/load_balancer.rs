//! Load balancing across cluster nodes
//!
//! Computes each online node's ideal share of its task slots and emits
//! advisory rebalance suggestions. Never moves tasks itself.

use chrono::{DateTime, Utc};
use serde::Serialize;

use nodefleet_core::{BalancingAlgorithm, LoadBalancingStrategy, Node};

use super::node_registry::NodeMap;
use crate::error::Result;
use crate::events::ClusterEvent;

/// Scoring policy behind a load balancing algorithm
pub trait BalancingPolicy: Send + Sync {
    fn algorithm(&self) -> BalancingAlgorithm;

    /// Ideal fraction of `max_tasks` the node should carry, `None` when the
    /// policy has no opinion about this node.
    fn optimal_load_fraction(&self, node: &Node) -> Option<f64>;
}

/// Heuristic policy driven by efficiency, health and hardware capability
#[derive(Debug, Clone, Copy, Default)]
pub struct AdaptivePolicy;

impl AdaptivePolicy {
    const BASELINE: f64 = 0.7;
    const MIN_FRACTION: f64 = 0.1;
    const MAX_FRACTION: f64 = 0.95;

    #[must_use]
    pub fn target_fraction(node: &Node) -> f64 {
        let mut fraction = Self::BASELINE;

        let efficiency = node.performance.efficiency_pct;
        if efficiency > 90.0 {
            fraction += 0.2;
        } else if efficiency < 70.0 {
            fraction -= 0.2;
        }

        if node.health_score > 90 {
            fraction += 0.1;
        } else if node.health_score < 70 {
            fraction -= 0.3;
        }

        fraction += (node.capabilities.capability_score() - 0.5) * 0.2;

        fraction.clamp(Self::MIN_FRACTION, Self::MAX_FRACTION)
    }
}

impl BalancingPolicy for AdaptivePolicy {
    fn algorithm(&self) -> BalancingAlgorithm {
        BalancingAlgorithm::Adaptive
    }

    fn optimal_load_fraction(&self, node: &Node) -> Option<f64> {
        Some(Self::target_fraction(node))
    }
}

/// Placeholder for algorithms without a target-load model yet
/// (round robin, least connections, weighted). Produces no suggestions.
#[derive(Debug, Clone, Copy)]
pub struct PassivePolicy {
    algorithm: BalancingAlgorithm,
}

impl PassivePolicy {
    #[must_use]
    pub const fn new(algorithm: BalancingAlgorithm) -> Self {
        Self { algorithm }
    }
}

impl BalancingPolicy for PassivePolicy {
    fn algorithm(&self) -> BalancingAlgorithm {
        self.algorithm
    }

    fn optimal_load_fraction(&self, _node: &Node) -> Option<f64> {
        None
    }
}

/// Advisory: move a node's load towards its optimal fraction
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RebalanceSuggestion {
    pub node_id: String,
    pub current_load: f64,
    pub optimal_load: f64,
    /// `round((optimal - current) * max_tasks)`
    pub delta_tasks: i64,
}

impl RebalanceSuggestion {
    #[must_use]
    pub fn into_event(self, timestamp: DateTime<Utc>) -> ClusterEvent {
        ClusterEvent::RebalanceSuggested {
            node_id: self.node_id,
            current_load: self.current_load,
            optimal_load: self.optimal_load,
            delta_tasks: self.delta_tasks,
            timestamp,
        }
    }
}

/// Load balancer over the active strategy
pub struct LoadBalancer {
    strategy: LoadBalancingStrategy,
    policy: Box<dyn BalancingPolicy>,
}

impl LoadBalancer {
    /// Build the balancer for a strategy, rejecting malformed parameters
    pub fn new(strategy: LoadBalancingStrategy) -> Result<Self> {
        let policy: Box<dyn BalancingPolicy> = match strategy.algorithm {
            BalancingAlgorithm::Adaptive => Box::new(AdaptivePolicy),
            other => Box::new(PassivePolicy::new(other)),
        };
        Self::with_policy(strategy, policy)
    }

    /// Build with a custom scoring policy, e.g. a learned model
    pub fn with_policy(strategy: LoadBalancingStrategy, policy: Box<dyn BalancingPolicy>) -> Result<Self> {
        strategy.validate()?;
        if policy.algorithm() != strategy.algorithm {
            tracing::debug!(
                strategy = %strategy.name,
                policy = policy.algorithm().as_str(),
                "Using custom balancing policy"
            );
        }
        Ok(Self { strategy, policy })
    }

    #[must_use]
    pub const fn strategy(&self) -> &LoadBalancingStrategy {
        &self.strategy
    }

    #[must_use]
    pub fn optimal_load_fraction(&self, node: &Node) -> Option<f64> {
        self.policy.optimal_load_fraction(node)
    }

    /// Suggestions for every online node whose load strays from its optimum
    #[must_use]
    pub fn suggest_rebalance(&self, nodes: &NodeMap) -> Vec<RebalanceSuggestion> {
        let threshold = self.strategy.rebalance_threshold();

        nodes
            .values()
            .filter(|n| n.status.is_online())
            .filter_map(|node| {
                let current = node.workload.load_fraction()?;
                let optimal = self.policy.optimal_load_fraction(node)?;
                let delta = optimal - current;
                if delta.abs() <= threshold {
                    return None;
                }

                let delta_tasks = (delta * f64::from(node.workload.max_tasks)).round() as i64;
                tracing::debug!(
                    node_id = %node.id,
                    current_load = current,
                    optimal_load = optimal,
                    delta_tasks,
                    "Rebalance suggested"
                );
                Some(RebalanceSuggestion {
                    node_id: node.id.clone(),
                    current_load: current,
                    optimal_load: optimal,
                    delta_tasks,
                })
            })
            .collect()
    }
}
