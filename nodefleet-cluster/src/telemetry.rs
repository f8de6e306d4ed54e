//! Telemetry source seam
//!
//! How metrics physically arrive from a node is a collaborator's concern;
//! the control plane only asks for the latest sample per node.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use nodefleet_core::Node;

use crate::error::Result;

/// Latest workload/performance readings for one node
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    pub cpu_usage_pct: f64,
    pub mem_usage_pct: f64,
    pub accelerator_usage_pct: f64,
    pub throughput: f64,
    pub efficiency_pct: f64,
    pub uptime_pct: f64,
    /// When the node produced the sample. This is the liveness signal.
    pub sampled_at: Option<DateTime<Utc>>,
}

impl TelemetrySample {
    /// Advance the node's `last_seen` to `sampled_at`, if newer
    pub fn record_contact(&self, node: &mut Node) {
        if let Some(at) = self.sampled_at {
            node.mark_seen(at);
        }
    }

    /// Copy the readings onto a node
    pub fn apply_to(&self, node: &mut Node) {
        node.workload.cpu_usage_pct = self.cpu_usage_pct;
        node.workload.mem_usage_pct = self.mem_usage_pct;
        node.workload.accelerator_usage_pct = self.accelerator_usage_pct;
        node.performance.throughput = self.throughput;
        node.performance.efficiency_pct = self.efficiency_pct;
        node.performance.uptime_pct = self.uptime_pct;
    }
}

/// Provider of per-node telemetry.
///
/// `Ok(None)` means the node has nothing new to report; its previous
/// readings are kept.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TelemetrySource: Send + Sync {
    async fn sample(&self, node_id: &str) -> Result<Option<TelemetrySample>>;
}

/// Sample every node concurrently
pub async fn sample_all(
    source: &dyn TelemetrySource,
    node_ids: &[String],
) -> HashMap<String, Result<Option<TelemetrySample>>> {
    let results = futures::future::join_all(node_ids.iter().map(|id| source.sample(id))).await;
    node_ids.iter().cloned().zip(results).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use chrono::Duration;
    use nodefleet_core::NodeSpec;

    fn sample(sampled_at: Option<DateTime<Utc>>) -> TelemetrySample {
        TelemetrySample {
            cpu_usage_pct: 55.0,
            mem_usage_pct: 60.0,
            accelerator_usage_pct: 80.0,
            throughput: 120.5,
            efficiency_pct: 92.0,
            uptime_pct: 99.5,
            sampled_at,
        }
    }

    #[test]
    fn test_apply_to_copies_readings_only() {
        let discovered = Utc::now() - Duration::seconds(60);
        let mut node = Node::from_spec(NodeSpec::new("rig", "10.0.0.1", 4028, 10), discovered);

        sample(Some(Utc::now())).apply_to(&mut node);

        assert!((node.workload.cpu_usage_pct - 55.0).abs() < f64::EPSILON);
        assert!((node.performance.throughput - 120.5).abs() < f64::EPSILON);
        assert_eq!(node.performance.last_seen, discovered);
    }

    #[test]
    fn test_record_contact_moves_last_seen_forward() {
        let discovered = Utc::now() - Duration::seconds(60);
        let mut node = Node::from_spec(NodeSpec::new("rig", "10.0.0.1", 4028, 10), discovered);

        let now = Utc::now();
        sample(Some(now)).record_contact(&mut node);
        assert_eq!(node.performance.last_seen, now);

        // Older samples never move last_seen backwards
        sample(Some(discovered)).record_contact(&mut node);
        assert_eq!(node.performance.last_seen, now);

        // No timestamp, no contact
        sample(None).record_contact(&mut node);
        assert_eq!(node.performance.last_seen, now);
    }

    #[tokio::test]
    async fn test_sample_all_isolates_failures() {
        let mut source = MockTelemetrySource::new();
        source.expect_sample().returning(|id| {
            if id == "broken" {
                Err(Error::Telemetry("collector timed out".to_string()))
            } else {
                Ok(Some(sample(None)))
            }
        });

        let ids = vec!["a".to_string(), "broken".to_string(), "b".to_string()];
        let results = sample_all(&source, &ids).await;

        assert_eq!(results.len(), 3);
        assert!(results["a"].as_ref().unwrap().is_some());
        assert!(results["b"].as_ref().unwrap().is_some());
        assert!(results["broken"].is_err());
    }
}
