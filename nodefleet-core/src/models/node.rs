use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Operational status of a worker node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    #[default]
    Online,
    Degraded,
    Offline,
    Maintenance,
}

impl NodeStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Degraded => "degraded",
            Self::Offline => "offline",
            Self::Maintenance => "maintenance",
        }
    }

    #[must_use]
    pub const fn is_online(&self) -> bool {
        matches!(self, Self::Online)
    }

    #[must_use]
    pub const fn is_offline(&self) -> bool {
        matches!(self, Self::Offline)
    }
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static hardware profile of a node
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeCapabilities {
    pub cpu_cores: u32,
    pub memory_gb: u32,
    pub accelerator_count: u32,
    pub network_bandwidth_mbps: u32,
}

impl NodeCapabilities {
    /// Reference hardware the capability score is normalised against
    const REFERENCE_CPU_CORES: f64 = 32.0;
    const REFERENCE_MEMORY_GB: f64 = 128.0;
    const REFERENCE_ACCELERATORS: f64 = 8.0;

    /// Mean of cores, memory and accelerators relative to the reference node.
    ///
    /// Not clamped: hardware larger than the reference scores above 1.0.
    #[must_use]
    pub fn capability_score(&self) -> f64 {
        let cpu = f64::from(self.cpu_cores) / Self::REFERENCE_CPU_CORES;
        let memory = f64::from(self.memory_gb) / Self::REFERENCE_MEMORY_GB;
        let accelerators = f64::from(self.accelerator_count) / Self::REFERENCE_ACCELERATORS;
        (cpu + memory + accelerators) / 3.0
    }
}

/// Mutable task-assignment and resource usage state
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeWorkload {
    pub current_tasks: u32,
    pub max_tasks: u32,
    pub cpu_usage_pct: f64,
    pub mem_usage_pct: f64,
    pub accelerator_usage_pct: f64,
}

impl NodeWorkload {
    /// Free task slots. `current_tasks` may transiently exceed `max_tasks`
    /// during redistribution, which reads as zero capacity.
    #[must_use]
    pub const fn available_capacity(&self) -> u32 {
        self.max_tasks.saturating_sub(self.current_tasks)
    }

    /// Fraction of task slots in use, `None` for a node without slots
    #[must_use]
    pub fn load_fraction(&self) -> Option<f64> {
        if self.max_tasks == 0 {
            return None;
        }
        Some(f64::from(self.current_tasks) / f64::from(self.max_tasks))
    }
}

/// Mutable performance counters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NodePerformance {
    pub throughput: f64,
    pub efficiency_pct: f64,
    pub uptime_pct: f64,
    pub last_seen: DateTime<Utc>,
}

/// Physical placement of a node
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeLocation {
    pub region: String,
    pub datacenter: String,
    pub rack: String,
}

/// Discovery-time description of a node, the input to `add_node`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub hostname: String,
    pub address: String,
    pub port: u16,
    #[serde(default)]
    pub capabilities: NodeCapabilities,
    pub max_tasks: u32,
    #[serde(default)]
    pub location: Option<NodeLocation>,
}

impl NodeSpec {
    #[must_use]
    pub fn new(hostname: impl Into<String>, address: impl Into<String>, port: u16, max_tasks: u32) -> Self {
        Self {
            hostname: hostname.into(),
            address: address.into(),
            port,
            capabilities: NodeCapabilities::default(),
            max_tasks,
            location: None,
        }
    }

    #[must_use]
    pub const fn with_capabilities(mut self, capabilities: NodeCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    #[must_use]
    pub fn with_location(mut self, location: NodeLocation) -> Self {
        self.location = Some(location);
        self
    }
}

/// A worker node as tracked by the registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub hostname: String,
    pub address: String,
    pub port: u16,
    pub status: NodeStatus,
    pub health_score: u8,
    /// Operator-requested maintenance; the monitor reports such nodes as `maintenance`
    #[serde(default)]
    pub maintenance: bool,
    pub capabilities: NodeCapabilities,
    pub workload: NodeWorkload,
    pub performance: NodePerformance,
    pub location: Option<NodeLocation>,
    pub discovered_at: DateTime<Utc>,
}

impl Node {
    /// Build a freshly discovered node: online, fully healthy, idle.
    #[must_use]
    pub fn from_spec(spec: NodeSpec, discovered_at: DateTime<Utc>) -> Self {
        let id = generate_node_id(&spec.hostname, discovered_at);
        Self::with_id(id, spec, discovered_at)
    }

    /// Build a node with a caller-chosen id
    #[must_use]
    pub fn with_id(id: String, spec: NodeSpec, discovered_at: DateTime<Utc>) -> Self {
        Self {
            id,
            hostname: spec.hostname,
            address: spec.address,
            port: spec.port,
            status: NodeStatus::Online,
            health_score: 100,
            maintenance: false,
            capabilities: spec.capabilities,
            workload: NodeWorkload {
                max_tasks: spec.max_tasks,
                ..NodeWorkload::default()
            },
            performance: NodePerformance {
                throughput: 0.0,
                efficiency_pct: 100.0,
                uptime_pct: 100.0,
                last_seen: discovered_at,
            },
            location: spec.location,
            discovered_at,
        }
    }

    /// Record contact with the node at `at`. Older timestamps are ignored.
    pub fn mark_seen(&mut self, at: DateTime<Utc>) {
        if at > self.performance.last_seen {
            self.performance.last_seen = at;
        }
    }

    /// Whole seconds since the node was last heard from
    #[must_use]
    pub fn seconds_since_seen(&self, now: DateTime<Utc>) -> i64 {
        now.signed_duration_since(self.performance.last_seen).num_seconds()
    }

    /// `host:port` endpoint of the node
    #[must_use]
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    #[must_use]
    pub fn same_region(&self, other: &Self) -> bool {
        match (&self.location, &other.location) {
            (Some(a), Some(b)) => !a.region.is_empty() && a.region == b.region,
            _ => false,
        }
    }

    #[must_use]
    pub fn same_datacenter(&self, other: &Self) -> bool {
        match (&self.location, &other.location) {
            (Some(a), Some(b)) => !a.datacenter.is_empty() && a.datacenter == b.datacenter,
            _ => false,
        }
    }
}

/// Generate a node id from the hostname and discovery time.
///
/// A random suffix keeps ids distinct when the same host is discovered
/// twice within one millisecond.
#[must_use]
pub fn generate_node_id(hostname: &str, discovered_at: DateTime<Utc>) -> String {
    let host: String = hostname
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c.to_ascii_lowercase() } else { '-' })
        .collect();
    let host = if host.is_empty() { "node".to_string() } else { host };

    format!(
        "{host}-{:x}-{}",
        discovered_at.timestamp_millis(),
        nanoid::nanoid!(6)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn spec() -> NodeSpec {
        NodeSpec::new("Rig-01.local", "10.0.0.5", 4028, 20).with_capabilities(NodeCapabilities {
            cpu_cores: 32,
            memory_gb: 128,
            accelerator_count: 8,
            network_bandwidth_mbps: 1000,
        })
    }

    #[test]
    fn test_status_defaults_to_online() {
        assert_eq!(NodeStatus::default(), NodeStatus::Online);
        assert_eq!(serde_json::to_string(&NodeStatus::default()).unwrap(), "\"online\"");
    }

    #[test]
    fn test_new_node_defaults() {
        let now = Utc::now();
        let node = Node::from_spec(spec(), now);

        assert_eq!(node.status, NodeStatus::Online);
        assert_eq!(node.health_score, 100);
        assert_eq!(node.workload.max_tasks, 20);
        assert_eq!(node.workload.current_tasks, 0);
        assert_eq!(node.performance.last_seen, now);
        assert!(!node.maintenance);
        assert_eq!(node.endpoint(), "10.0.0.5:4028");
    }

    #[test]
    fn test_generate_node_id() {
        let now = Utc::now();
        let a = generate_node_id("Rig-01.local", now);
        let b = generate_node_id("Rig-01.local", now);

        assert!(a.starts_with("rig-01-local-"));
        assert_ne!(a, b);
        assert!(generate_node_id("", now).starts_with("node-"));
    }

    #[test]
    fn test_capability_score() {
        let reference = spec().capabilities;
        assert!((reference.capability_score() - 1.0).abs() < f64::EPSILON);

        let half = NodeCapabilities {
            cpu_cores: 16,
            memory_gb: 64,
            accelerator_count: 4,
            network_bandwidth_mbps: 0,
        };
        assert!((half.capability_score() - 0.5).abs() < f64::EPSILON);
        assert!(NodeCapabilities::default().capability_score().abs() < f64::EPSILON);
    }

    #[test]
    fn test_available_capacity_saturates() {
        let workload = NodeWorkload {
            current_tasks: 25,
            max_tasks: 20,
            ..NodeWorkload::default()
        };
        assert_eq!(workload.available_capacity(), 0);

        let empty = NodeWorkload::default();
        assert_eq!(empty.load_fraction(), None);
    }

    #[test]
    fn test_seconds_since_seen() {
        let now = Utc::now();
        let mut node = Node::from_spec(spec(), now);
        node.performance.last_seen = now - Duration::seconds(360);
        assert_eq!(node.seconds_since_seen(now), 360);

        node.mark_seen(now - Duration::seconds(400));
        assert_eq!(node.seconds_since_seen(now), 360);
        node.mark_seen(now);
        assert_eq!(node.seconds_since_seen(now), 0);
    }

    #[test]
    fn test_location_matching() {
        let now = Utc::now();
        let mut a = Node::from_spec(spec(), now);
        let mut b = Node::from_spec(spec(), now);
        assert!(!a.same_region(&b));

        a.location = Some(NodeLocation {
            region: "eu-west".to_string(),
            datacenter: "dc1".to_string(),
            rack: "r1".to_string(),
        });
        b.location = Some(NodeLocation {
            region: "eu-west".to_string(),
            datacenter: "dc2".to_string(),
            rack: "r1".to_string(),
        });
        assert!(a.same_region(&b));
        assert!(!a.same_datacenter(&b));
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&NodeStatus::Maintenance).unwrap();
        assert_eq!(json, "\"maintenance\"");
        assert_eq!(NodeStatus::Degraded.to_string(), "degraded");
    }
}
