pub mod discovery;
pub mod error;
pub mod events;
pub mod failover;
pub mod manager;
pub mod status;
pub mod telemetry;

pub use discovery::{
    compute_health_score, CompositeDiscovery, DiscoverySource, DnsDiscovery, HealthMonitor, HealthSnapshot,
    LoadBalancer, NodeFilter, NodeMap, NodeRegistry, RebalanceSuggestion, StaticDiscovery, StatusTransition,
};
pub use error::{Error, Result};
pub use events::{BroadcastPublisher, ClusterEvent, EventPublisher};
pub use failover::{distribute_proportionally, Distribution, FailoverCoordinator, FailoverOutcome, TaskAssignment};
pub use manager::{ClusterManager, DiscoveryReport, TickReport};
pub use status::{ClusterStatus, ClusterStatusAggregator};
pub use telemetry::{TelemetrySample, TelemetrySource};
