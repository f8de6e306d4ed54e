//! Health monitoring for cluster nodes
//!
//! Each monitoring tick derives every node's health score and status from
//! two inputs: how long ago the node was last seen, and its latest telemetry.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

use nodefleet_core::config::ClusterConfig;
use nodefleet_core::{Node, NodeStatus};

use super::node_registry::NodeMap;
use crate::error::Result;
use crate::events::ClusterEvent;
use crate::telemetry::{sample_all, TelemetrySample, TelemetrySource};

/// Telemetry gathered for one tick, keyed by node id
pub type TelemetryBatch = HashMap<String, Result<Option<TelemetrySample>>>;

/// Liveness thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthMonitorConfig {
    pub offline_timeout_secs: i64,
    pub degraded_timeout_secs: i64,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            offline_timeout_secs: 300,
            degraded_timeout_secs: 120,
        }
    }
}

impl From<&ClusterConfig> for HealthMonitorConfig {
    fn from(config: &ClusterConfig) -> Self {
        Self {
            offline_timeout_secs: i64::try_from(config.offline_timeout_seconds).unwrap_or(i64::MAX),
            degraded_timeout_secs: i64::try_from(config.degraded_timeout_seconds).unwrap_or(i64::MAX),
        }
    }
}

/// A node's status changed during a tick
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusTransition {
    pub node_id: String,
    pub from: NodeStatus,
    pub to: NodeStatus,
    pub health_score: u8,
}

/// Cluster-wide health summary
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct HealthSnapshot {
    pub total_nodes: usize,
    pub online: usize,
    pub degraded: usize,
    pub offline: usize,
    pub maintenance: usize,
    pub average_health: f64,
}

impl HealthSnapshot {
    #[must_use]
    pub fn from_nodes(nodes: &NodeMap) -> Self {
        let mut snapshot = Self {
            total_nodes: nodes.len(),
            ..Self::default()
        };
        let mut health_sum = 0u64;

        for node in nodes.values() {
            match node.status {
                NodeStatus::Online => snapshot.online += 1,
                NodeStatus::Degraded => snapshot.degraded += 1,
                NodeStatus::Offline => snapshot.offline += 1,
                NodeStatus::Maintenance => snapshot.maintenance += 1,
            }
            health_sum += u64::from(node.health_score);
        }

        if !nodes.is_empty() {
            snapshot.average_health = health_sum as f64 / nodes.len() as f64;
        }
        snapshot
    }

    #[must_use]
    pub const fn into_event(self, timestamp: DateTime<Utc>) -> ClusterEvent {
        ClusterEvent::HealthSnapshot {
            total_nodes: self.total_nodes,
            online: self.online,
            degraded: self.degraded,
            offline: self.offline,
            maintenance: self.maintenance,
            average_health: self.average_health,
            timestamp,
        }
    }
}

/// Composite 0-100 fitness score from resource usage, efficiency and uptime.
///
/// Pure: depends only on the node's current workload and performance fields.
#[must_use]
pub fn compute_health_score(node: &Node) -> u8 {
    let workload = &node.workload;
    let performance = &node.performance;
    let mut score: i32 = 100;

    if workload.cpu_usage_pct > 90.0 {
        score -= 20;
    } else if workload.cpu_usage_pct > 80.0 {
        score -= 10;
    }

    if workload.mem_usage_pct > 90.0 {
        score -= 20;
    } else if workload.mem_usage_pct > 80.0 {
        score -= 10;
    }

    // Primary resource sitting idle
    if workload.accelerator_usage_pct < 50.0 {
        score -= 15;
    }

    if performance.efficiency_pct < 70.0 {
        score -= 15;
    } else if performance.efficiency_pct < 80.0 {
        score -= 5;
    }

    if performance.uptime_pct < 95.0 {
        score -= 10;
    }

    clamp_score(score)
}

fn clamp_score(score: i32) -> u8 {
    u8::try_from(score.clamp(0, 100)).unwrap_or(0)
}

/// Apply the maintenance flag on top of a computed status. Offline wins.
pub(crate) fn resolve_maintenance(node: &mut Node) {
    if node.maintenance && node.status != NodeStatus::Offline {
        node.status = NodeStatus::Maintenance;
    }
}

/// Health monitor for cluster nodes
pub struct HealthMonitor {
    config: HealthMonitorConfig,
    telemetry: Arc<dyn TelemetrySource>,
}

impl HealthMonitor {
    #[must_use]
    pub fn new(telemetry: Arc<dyn TelemetrySource>, config: HealthMonitorConfig) -> Self {
        Self { config, telemetry }
    }

    #[must_use]
    pub const fn config(&self) -> HealthMonitorConfig {
        self.config
    }

    /// Fetch telemetry for the given nodes concurrently
    pub async fn collect(&self, node_ids: &[String]) -> TelemetryBatch {
        sample_all(self.telemetry.as_ref(), node_ids).await
    }

    /// Re-evaluate a single node. Returns the transition if its status changed.
    ///
    /// A timestamped sample counts as contact before the timeouts are
    /// checked, so a quiet node that reports again recovers. A telemetry
    /// failure on a live node leaves it untouched for this tick.
    pub fn evaluate_node(
        &self,
        node: &mut Node,
        telemetry: Option<Result<Option<TelemetrySample>>>,
        now: DateTime<Utc>,
    ) -> Option<StatusTransition> {
        let previous = node.status;
        if let Some(Ok(Some(sample))) = &telemetry {
            sample.record_contact(node);
        }
        let silent_secs = node.seconds_since_seen(now);

        if silent_secs > self.config.offline_timeout_secs {
            node.status = NodeStatus::Offline;
            node.health_score = 0;
        } else if silent_secs > self.config.degraded_timeout_secs {
            node.status = NodeStatus::Degraded;
            node.health_score = clamp_score((i32::from(node.health_score) - 20).max(30));
        } else {
            match telemetry {
                Some(Err(e)) => {
                    tracing::warn!(
                        node_id = %node.id,
                        error = %e,
                        "Telemetry unavailable, keeping previous health"
                    );
                    return None;
                }
                Some(Ok(Some(sample))) => sample.apply_to(node),
                Some(Ok(None)) | None => {}
            }

            node.health_score = compute_health_score(node);
            node.status = if node.health_score > 80 {
                NodeStatus::Online
            } else {
                NodeStatus::Degraded
            };
        }

        if node.status != NodeStatus::Offline
            && (node.workload.cpu_usage_pct > 95.0 || node.workload.mem_usage_pct > 95.0)
        {
            node.status = NodeStatus::Degraded;
            node.health_score = node.health_score.min(60);
        }

        resolve_maintenance(node);

        if node.status == previous {
            return None;
        }

        match node.status {
            NodeStatus::Offline => tracing::warn!(
                node_id = %node.id,
                silent_secs,
                "Node marked offline: no contact within timeout"
            ),
            NodeStatus::Degraded => tracing::warn!(
                node_id = %node.id,
                health_score = node.health_score,
                "Node is degraded"
            ),
            NodeStatus::Online => tracing::info!(
                node_id = %node.id,
                health_score = node.health_score,
                "Node is online"
            ),
            NodeStatus::Maintenance => tracing::info!(node_id = %node.id, "Node in maintenance"),
        }

        Some(StatusTransition {
            node_id: node.id.clone(),
            from: previous,
            to: node.status,
            health_score: node.health_score,
        })
    }

    /// Re-evaluate every node; one node's failure never stops the others
    pub fn evaluate_all(
        &self,
        nodes: &mut NodeMap,
        mut telemetry: TelemetryBatch,
        now: DateTime<Utc>,
    ) -> Vec<StatusTransition> {
        nodes
            .values_mut()
            .filter_map(|node| {
                let sample = telemetry.remove(&node.id);
                self.evaluate_node(node, sample, now)
            })
            .collect()
    }
}
