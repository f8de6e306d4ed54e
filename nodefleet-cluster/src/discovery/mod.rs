//! Node discovery, registry and health monitoring

pub mod health_monitor;
pub mod load_balancer;
pub mod node_registry;
pub mod source;

pub use health_monitor::{
    compute_health_score, HealthMonitor, HealthMonitorConfig, HealthSnapshot, StatusTransition, TelemetryBatch,
};
pub use load_balancer::{AdaptivePolicy, BalancingPolicy, LoadBalancer, PassivePolicy, RebalanceSuggestion};
pub use node_registry::{DiscoveryOutcome, NodeFilter, NodeMap, NodeRegistry};
pub use source::{CompositeDiscovery, DiscoverySource, DnsDiscovery, StaticDiscovery};
