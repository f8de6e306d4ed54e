//! Control-plane events and the publisher seam
//!
//! Every state change the control plane makes is announced as a
//! `ClusterEvent`. Collaborators (dashboards, auto-scalers, audit logs)
//! receive them through an `EventPublisher`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::failover::TaskAssignment;

/// Events emitted by the control plane
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClusterEvent {
    /// Cluster-wide health summary, once per monitoring tick
    HealthSnapshot {
        total_nodes: usize,
        online: usize,
        degraded: usize,
        offline: usize,
        maintenance: usize,
        average_health: f64,
        timestamp: DateTime<Utc>,
    },

    NodeAdded {
        node_id: String,
        hostname: String,
        timestamp: DateTime<Utc>,
    },

    NodeRemoved {
        node_id: String,
        timestamp: DateTime<Utc>,
    },

    /// Advisory only; nothing is moved
    RebalanceSuggested {
        node_id: String,
        current_load: f64,
        optimal_load: f64,
        /// Positive: the node can take more tasks. Negative: it should shed.
        delta_tasks: i64,
        timestamp: DateTime<Utc>,
    },

    FailoverCompleted {
        failed_node_id: String,
        tasks: u32,
        assignments: Vec<TaskAssignment>,
        timestamp: DateTime<Utc>,
    },

    GracefulDegradation {
        node_id: String,
        previous_load: u32,
        new_load: u32,
        redistributed: u32,
        timestamp: DateTime<Utc>,
    },

    /// Redistribution could not place every task
    InsufficientCapacity {
        source_node_id: String,
        requested: u32,
        placed: u32,
        timestamp: DateTime<Utc>,
    },

    /// Fewer than two nodes are online
    ClusterEmergency {
        online_nodes: usize,
        total_nodes: usize,
        timestamp: DateTime<Utc>,
    },

    MaintenanceChanged {
        node_id: String,
        enabled: bool,
        timestamp: DateTime<Utc>,
    },
}

impl ClusterEvent {
    /// Stable event name
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::HealthSnapshot { .. } => "health_snapshot",
            Self::NodeAdded { .. } => "node_added",
            Self::NodeRemoved { .. } => "node_removed",
            Self::RebalanceSuggested { .. } => "rebalance_suggested",
            Self::FailoverCompleted { .. } => "failover_completed",
            Self::GracefulDegradation { .. } => "graceful_degradation",
            Self::InsufficientCapacity { .. } => "insufficient_capacity",
            Self::ClusterEmergency { .. } => "cluster_emergency",
            Self::MaintenanceChanged { .. } => "maintenance_changed",
        }
    }

    /// Node the event concerns, if it concerns exactly one
    #[must_use]
    pub fn node_id(&self) -> Option<&str> {
        match self {
            Self::NodeAdded { node_id, .. }
            | Self::NodeRemoved { node_id, .. }
            | Self::RebalanceSuggested { node_id, .. }
            | Self::GracefulDegradation { node_id, .. }
            | Self::MaintenanceChanged { node_id, .. } => Some(node_id),
            Self::FailoverCompleted { failed_node_id, .. } => Some(failed_node_id),
            Self::InsufficientCapacity { source_node_id, .. } => Some(source_node_id),
            Self::HealthSnapshot { .. } | Self::ClusterEmergency { .. } => None,
        }
    }

    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::HealthSnapshot { timestamp, .. }
            | Self::NodeAdded { timestamp, .. }
            | Self::NodeRemoved { timestamp, .. }
            | Self::RebalanceSuggested { timestamp, .. }
            | Self::FailoverCompleted { timestamp, .. }
            | Self::GracefulDegradation { timestamp, .. }
            | Self::InsufficientCapacity { timestamp, .. }
            | Self::ClusterEmergency { timestamp, .. }
            | Self::MaintenanceChanged { timestamp, .. } => *timestamp,
        }
    }

    /// JSON payload, tagged with the event name under `type`
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Sink for control-plane events.
///
/// Publishing must not block: it is called while the registry lock is held.
#[cfg_attr(test, mockall::automock)]
pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: ClusterEvent);
}

/// Fans events out to any number of subscribers over a broadcast channel
pub struct BroadcastPublisher {
    tx: broadcast::Sender<ClusterEvent>,
}

impl BroadcastPublisher {
    pub const DEFAULT_CAPACITY: usize = 256;

    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ClusterEvent> {
        self.tx.subscribe()
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for BroadcastPublisher {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

impl EventPublisher for BroadcastPublisher {
    fn publish(&self, event: ClusterEvent) {
        let event_type = event.event_type();
        match self.tx.send(event) {
            Ok(receivers) => {
                tracing::trace!(event_type, receivers, "Cluster event published");
            }
            Err(_) => {
                tracing::trace!(event_type, "Cluster event dropped: no subscribers");
            }
        }
    }
}
