//! Read-only cluster status projection

use serde::Serialize;

use nodefleet_core::{FailoverStrategy, LoadBalancingStrategy, NodeStatus};

use crate::discovery::NodeMap;

/// Summed hardware across all nodes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CapabilityTotals {
    pub cpu_cores: u64,
    pub memory_gb: u64,
    pub accelerator_count: u64,
    pub network_bandwidth_mbps: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct WorkloadSummary {
    pub current_tasks: u64,
    pub max_tasks: u64,
    /// current / max as a percentage, 0 when there are no slots
    pub utilization_pct: f64,
    pub average_cpu_usage_pct: f64,
    pub average_mem_usage_pct: f64,
    pub average_accelerator_usage_pct: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PerformanceSummary {
    pub total_throughput: f64,
    pub average_efficiency_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActiveStrategies {
    pub load_balancing: String,
    pub failover: String,
}

/// Cluster-wide summary for external consumers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterStatus {
    pub total_nodes: usize,
    pub online: usize,
    pub degraded: usize,
    pub offline: usize,
    pub maintenance: usize,
    pub average_health: f64,
    pub capabilities: CapabilityTotals,
    pub workload: WorkloadSummary,
    pub performance: PerformanceSummary,
    pub strategies: ActiveStrategies,
}

/// Builds `ClusterStatus` from a node set. Never mutates anything.
pub struct ClusterStatusAggregator;

impl ClusterStatusAggregator {
    #[must_use]
    pub fn aggregate(
        nodes: &NodeMap,
        load_balancing: &LoadBalancingStrategy,
        failover: &FailoverStrategy,
    ) -> ClusterStatus {
        let mut status = ClusterStatus {
            total_nodes: nodes.len(),
            online: 0,
            degraded: 0,
            offline: 0,
            maintenance: 0,
            average_health: 0.0,
            capabilities: CapabilityTotals::default(),
            workload: WorkloadSummary::default(),
            performance: PerformanceSummary::default(),
            strategies: ActiveStrategies {
                load_balancing: load_balancing.name.clone(),
                failover: failover.mode.as_str().to_string(),
            },
        };

        let mut health_sum = 0u64;
        let mut cpu_sum = 0.0;
        let mut mem_sum = 0.0;
        let mut accelerator_sum = 0.0;
        let mut efficiency_sum = 0.0;

        for node in nodes.values() {
            match node.status {
                NodeStatus::Online => status.online += 1,
                NodeStatus::Degraded => status.degraded += 1,
                NodeStatus::Offline => status.offline += 1,
                NodeStatus::Maintenance => status.maintenance += 1,
            }
            health_sum += u64::from(node.health_score);

            let caps = &node.capabilities;
            status.capabilities.cpu_cores += u64::from(caps.cpu_cores);
            status.capabilities.memory_gb += u64::from(caps.memory_gb);
            status.capabilities.accelerator_count += u64::from(caps.accelerator_count);
            status.capabilities.network_bandwidth_mbps += u64::from(caps.network_bandwidth_mbps);

            status.workload.current_tasks += u64::from(node.workload.current_tasks);
            status.workload.max_tasks += u64::from(node.workload.max_tasks);
            cpu_sum += node.workload.cpu_usage_pct;
            mem_sum += node.workload.mem_usage_pct;
            accelerator_sum += node.workload.accelerator_usage_pct;

            status.performance.total_throughput += node.performance.throughput;
            efficiency_sum += node.performance.efficiency_pct;
        }

        if !nodes.is_empty() {
            let count = nodes.len() as f64;
            status.average_health = health_sum as f64 / count;
            status.workload.average_cpu_usage_pct = cpu_sum / count;
            status.workload.average_mem_usage_pct = mem_sum / count;
            status.workload.average_accelerator_usage_pct = accelerator_sum / count;
            status.performance.average_efficiency_pct = efficiency_sum / count;
        }
        if status.workload.max_tasks > 0 {
            status.workload.utilization_pct =
                status.workload.current_tasks as f64 / status.workload.max_tasks as f64 * 100.0;
        }

        status
    }
}
