//! Failover coordination
//!
//! Reacts to status transitions produced by the health monitor:
//! - offline nodes have their workload moved to the rest of the cluster
//! - degraded nodes under the health threshold shed part of their load
//! - fewer than two online nodes raises a cluster emergency
//!
//! Tasks a relocation could not place stay on their node and are retried on
//! every later tick once capacity frees up.
//!
//! All methods work on a `NodeMap` borrowed under the registry's write lock,
//! so a relocation is applied as one step.

use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Instant;

use nodefleet_core::{FailoverMode, FailoverStrategy, Node, NodeStatus};

use super::distribution::{distribute_proportionally, Distribution};
use crate::discovery::{NodeMap, StatusTransition};
use crate::error::Result;
use crate::events::{ClusterEvent, EventPublisher};

/// Fraction of its tasks a degraded node keeps
const DEGRADED_RETAIN_NUMERATOR: u32 = 7;
const DEGRADED_RETAIN_DENOMINATOR: u32 = 10;

/// What the coordinator did in response to one transition
#[derive(Debug, Clone, PartialEq)]
pub enum FailoverOutcome {
    Failover {
        node_id: String,
        distribution: Distribution,
    },
    Degradation {
        node_id: String,
        previous_load: u32,
        new_load: u32,
        distribution: Distribution,
    },
    /// Leftover tasks of an offline or maintenance node placed on a later tick
    Retry {
        node_id: String,
        distribution: Distribution,
    },
}

/// Replacement ranking for one candidate
#[derive(Debug, Clone, Copy)]
struct Ranked<'a> {
    node: &'a Node,
    score: f64,
    priority: u32,
}

impl Ranked<'_> {
    /// Greater is better; lower id wins full ties
    fn compare(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then(self.priority.cmp(&other.priority))
            .then_with(|| other.node.id.cmp(&self.node.id))
    }
}

/// Score of `candidate` as a home for `failed`'s workload
#[must_use]
pub fn replacement_score(candidate: &Node, failed: &Node) -> f64 {
    let mut score = f64::from(candidate.workload.available_capacity()) * 10.0
        + f64::from(candidate.health_score)
        + candidate.performance.efficiency_pct;

    if candidate.same_region(failed) {
        score += 20.0;
    }
    if candidate.same_datacenter(failed) {
        score += 10.0;
    }
    if candidate.capabilities.accelerator_count >= failed.capabilities.accelerator_count {
        score += 15.0;
    }
    score
}

/// Failover coordinator
pub struct FailoverCoordinator {
    strategy: FailoverStrategy,
    publisher: Arc<dyn EventPublisher>,
}

impl FailoverCoordinator {
    pub fn new(strategy: FailoverStrategy, publisher: Arc<dyn EventPublisher>) -> Result<Self> {
        strategy.validate()?;
        Ok(Self { strategy, publisher })
    }

    #[must_use]
    pub const fn strategy(&self) -> &FailoverStrategy {
        &self.strategy
    }

    /// React to the transitions of one monitoring tick, in order
    pub fn handle_transitions(
        &self,
        nodes: &mut NodeMap,
        transitions: &[StatusTransition],
        now: DateTime<Utc>,
    ) -> Vec<FailoverOutcome> {
        let mut outcomes = Vec::new();

        for transition in transitions {
            match transition.to {
                NodeStatus::Offline => {
                    if let Some(distribution) = self.perform_failover(nodes, &transition.node_id, now) {
                        outcomes.push(FailoverOutcome::Failover {
                            node_id: transition.node_id.clone(),
                            distribution,
                        });
                    }
                }
                NodeStatus::Degraded if transition.health_score < self.strategy.health_threshold => {
                    if let Some(outcome) = self.perform_graceful_degradation(nodes, &transition.node_id, now) {
                        outcomes.push(outcome);
                    }
                }
                _ => {}
            }
        }

        outcomes
    }

    /// Move every task off an offline node.
    ///
    /// Returns `None` when the node is unknown or carries no tasks.
    pub fn perform_failover(&self, nodes: &mut NodeMap, node_id: &str, now: DateTime<Utc>) -> Option<Distribution> {
        let started = Instant::now();
        let distribution = self.relocate_all(nodes, node_id, now)?;

        tracing::info!(
            node_id = %node_id,
            tasks = distribution.requested,
            placed = distribution.placed(),
            targets = distribution.assignments.len(),
            "Failover completed"
        );

        let elapsed = started.elapsed();
        if elapsed.as_secs() >= self.strategy.failover_time_seconds {
            tracing::warn!(
                node_id = %node_id,
                elapsed_ms = elapsed.as_millis(),
                budget_secs = self.strategy.failover_time_seconds,
                "Failover exceeded its time budget"
            );
        }

        self.publisher.publish(ClusterEvent::FailoverCompleted {
            failed_node_id: node_id.to_string(),
            tasks: distribution.requested,
            assignments: distribution.assignments.clone(),
            timestamp: now,
        });

        Some(distribution)
    }

    /// Move a node's workload away ahead of removal or maintenance.
    ///
    /// Same placement as failover, but only a shortfall is announced.
    pub fn drain_node(&self, nodes: &mut NodeMap, node_id: &str, now: DateTime<Utc>) -> Option<Distribution> {
        let distribution = self.relocate_all(nodes, node_id, now)?;
        tracing::info!(
            node_id = %node_id,
            tasks = distribution.requested,
            placed = distribution.placed(),
            "Node drained"
        );
        Some(distribution)
    }

    /// Place tasks still stuck on offline or maintenance nodes.
    ///
    /// Skipped while no online node has free capacity, so a standing
    /// shortfall is reported once rather than on every tick.
    pub fn relocate_stranded(&self, nodes: &mut NodeMap, now: DateTime<Utc>) -> Vec<FailoverOutcome> {
        let stranded: Vec<String> = nodes
            .values()
            .filter(|n| {
                n.workload.current_tasks > 0 && matches!(n.status, NodeStatus::Offline | NodeStatus::Maintenance)
            })
            .map(|n| n.id.clone())
            .collect();

        let mut outcomes = Vec::new();
        for node_id in stranded {
            let free: u64 = Self::candidates(nodes, &node_id)
                .iter()
                .map(|(_, capacity)| u64::from(*capacity))
                .sum();
            if free == 0 {
                tracing::debug!(node_id = %node_id, "Stranded tasks waiting for capacity");
                continue;
            }

            if let Some(distribution) = self.relocate_all(nodes, &node_id, now) {
                tracing::info!(
                    node_id = %node_id,
                    tasks = distribution.requested,
                    placed = distribution.placed(),
                    "Relocated stranded tasks"
                );
                outcomes.push(FailoverOutcome::Retry { node_id, distribution });
            }
        }
        outcomes
    }

    /// Shed 30% of a struggling node's tasks onto the rest of the cluster.
    ///
    /// Tasks that find no home are dropped and reported. Returns `None` when
    /// the node is unknown or idle.
    pub fn perform_graceful_degradation(
        &self,
        nodes: &mut NodeMap,
        node_id: &str,
        now: DateTime<Utc>,
    ) -> Option<FailoverOutcome> {
        let previous_load = nodes.get(node_id)?.workload.current_tasks;
        if previous_load == 0 {
            tracing::debug!(node_id = %node_id, "No tasks to shed");
            return None;
        }
        let retained = u64::from(previous_load) * u64::from(DEGRADED_RETAIN_NUMERATOR)
            / u64::from(DEGRADED_RETAIN_DENOMINATOR);
        let new_load = u32::try_from(retained).unwrap_or(previous_load);
        let shed = previous_load - new_load;

        let candidates = Self::candidates(nodes, node_id);
        let distribution = distribute_proportionally(&candidates, shed);
        distribution.apply(nodes);
        if let Some(node) = nodes.get_mut(node_id) {
            node.workload.current_tasks = new_load;
        }

        tracing::warn!(
            node_id = %node_id,
            previous_load,
            new_load,
            redistributed = distribution.placed(),
            "Graceful degradation: shed load from unhealthy node"
        );

        self.report_shortfall(node_id, &distribution, now);
        self.publisher.publish(ClusterEvent::GracefulDegradation {
            node_id: node_id.to_string(),
            previous_load,
            new_load,
            redistributed: distribution.placed(),
            timestamp: now,
        });

        Some(FailoverOutcome::Degradation {
            node_id: node_id.to_string(),
            previous_load,
            new_load,
            distribution,
        })
    }

    /// Publish an emergency when fewer than two nodes are online
    pub fn check_emergency(&self, nodes: &NodeMap, now: DateTime<Utc>) -> bool {
        let online_nodes = nodes.values().filter(|n| n.status.is_online()).count();
        if online_nodes >= 2 {
            return false;
        }

        tracing::error!(
            online_nodes,
            total_nodes = nodes.len(),
            "Cluster emergency: not enough online nodes"
        );
        self.publisher.publish(ClusterEvent::ClusterEmergency {
            online_nodes,
            total_nodes: nodes.len(),
            timestamp: now,
        });
        true
    }

    /// Best single replacement for `failed`, if any online node has room
    #[must_use]
    pub fn best_replacement<'a>(&self, nodes: &'a NodeMap, failed: &Node) -> Option<&'a Node> {
        nodes
            .values()
            .filter(|n| n.id != failed.id && n.status.is_online())
            .map(|node| Ranked {
                node,
                score: replacement_score(node, failed),
                priority: self.strategy.priority(&node.id),
            })
            .max_by(Ranked::compare)
            .map(|ranked| ranked.node)
    }

    /// Plan where `tasks` from `source_id` should go, without mutating
    #[must_use]
    pub fn plan(&self, nodes: &NodeMap, source_id: &str, tasks: u32) -> Distribution {
        if tasks == 0 {
            return Distribution::empty(0);
        }

        if self.strategy.mode == FailoverMode::BestFit {
            if let Some(best) = nodes
                .get(source_id)
                .and_then(|failed| self.best_replacement(nodes, failed))
            {
                if best.workload.available_capacity() >= tasks {
                    return Distribution::single(best.id.clone(), tasks);
                }
            }
        }

        distribute_proportionally(&Self::candidates(nodes, source_id), tasks)
    }

    /// Relocate every task of `source_id` and subtract what was placed
    fn relocate_all(&self, nodes: &mut NodeMap, source_id: &str, now: DateTime<Utc>) -> Option<Distribution> {
        let tasks = nodes.get(source_id)?.workload.current_tasks;
        if tasks == 0 {
            tracing::debug!(node_id = %source_id, "No tasks to relocate");
            return None;
        }

        let distribution = self.plan(nodes, source_id, tasks);
        distribution.apply(nodes);
        if let Some(source) = nodes.get_mut(source_id) {
            source.workload.current_tasks = tasks - distribution.placed();
        }

        self.report_shortfall(source_id, &distribution, now);
        Some(distribution)
    }

    fn report_shortfall(&self, source_id: &str, distribution: &Distribution, now: DateTime<Utc>) {
        if distribution.is_complete() {
            return;
        }
        tracing::warn!(
            node_id = %source_id,
            requested = distribution.requested,
            placed = distribution.placed(),
            "Insufficient capacity to relocate all tasks"
        );
        self.publisher.publish(ClusterEvent::InsufficientCapacity {
            source_node_id: source_id.to_string(),
            requested: distribution.requested,
            placed: distribution.placed(),
            timestamp: now,
        });
    }

    /// Online nodes other than the source, with their free capacity
    fn candidates(nodes: &NodeMap, source_id: &str) -> Vec<(String, u32)> {
        nodes
            .values()
            .filter(|n| n.id != source_id && n.status.is_online())
            .map(|n| (n.id.clone(), n.workload.available_capacity()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MockEventPublisher;
    use nodefleet_core::{NodeCapabilities, NodeLocation, NodeSpec};

    fn node(id: &str, current: u32, max: u32, status: NodeStatus) -> Node {
        let mut node = Node::with_id(id.to_string(), NodeSpec::new(id, "10.0.0.1", 4028, max), Utc::now());
        node.workload.current_tasks = current;
        node.status = status;
        node.performance.efficiency_pct = 90.0;
        node.health_score = 90;
        node
    }

    fn map(list: Vec<Node>) -> NodeMap {
        list.into_iter().map(|n| (n.id.clone(), n)).collect()
    }

    fn coordinator_with(strategy: FailoverStrategy, publisher: MockEventPublisher) -> FailoverCoordinator {
        FailoverCoordinator::new(strategy, Arc::new(publisher)).unwrap()
    }

    fn quiet() -> MockEventPublisher {
        let mut publisher = MockEventPublisher::new();
        publisher.expect_publish().return_const(());
        publisher
    }

    fn tasks(nodes: &NodeMap, id: &str) -> u32 {
        nodes[id].workload.current_tasks
    }

    fn offline(id: &str) -> StatusTransition {
        StatusTransition {
            node_id: id.to_string(),
            from: NodeStatus::Degraded,
            to: NodeStatus::Offline,
            health_score: 0,
        }
    }

    #[test]
    fn test_invalid_strategy_rejected() {
        let strategy = FailoverStrategy {
            failover_time_seconds: 0,
            ..FailoverStrategy::default()
        };
        assert!(FailoverCoordinator::new(strategy, Arc::new(quiet())).is_err());
    }

    #[test]
    fn test_replacement_score_bonuses() {
        let mut failed = node("f", 6, 10, NodeStatus::Offline);
        failed.capabilities = NodeCapabilities {
            accelerator_count: 4,
            ..NodeCapabilities::default()
        };
        failed.location = Some(NodeLocation {
            region: "eu".to_string(),
            datacenter: "eu-1".to_string(),
            rack: "r1".to_string(),
        });

        let mut candidate = node("c", 2, 10, NodeStatus::Online);
        // 8*10 + 90 + 90
        assert!((replacement_score(&candidate, &failed) - 260.0).abs() < f64::EPSILON);

        candidate.capabilities.accelerator_count = 4;
        candidate.location = failed.location.clone();
        assert!((replacement_score(&candidate, &failed) - 305.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_single_replacement_takes_everything() {
        let mut nodes = map(vec![
            node("a", 2, 20, NodeStatus::Online),
            node("b", 8, 10, NodeStatus::Online),
            node("f", 6, 10, NodeStatus::Offline),
        ]);

        let mut publisher = MockEventPublisher::new();
        publisher
            .expect_publish()
            .withf(|e| matches!(e, ClusterEvent::FailoverCompleted { tasks: 6, assignments, .. } if assignments.len() == 1))
            .times(1)
            .return_const(());
        let coordinator = coordinator_with(FailoverStrategy::default(), publisher);

        let outcomes = coordinator.handle_transitions(&mut nodes, &[offline("f")], Utc::now());

        assert_eq!(outcomes.len(), 1);
        assert_eq!(tasks(&nodes, "f"), 0);
        assert_eq!(tasks(&nodes, "a"), 8);
        assert_eq!(tasks(&nodes, "b"), 8);
    }

    #[test]
    fn test_best_fit_falls_back_to_spread() {
        let mut nodes = map(vec![
            node("a", 16, 20, NodeStatus::Online),
            node("b", 7, 10, NodeStatus::Online),
            node("f", 6, 10, NodeStatus::Offline),
        ]);
        let coordinator = coordinator_with(FailoverStrategy::default(), quiet());

        let plan = coordinator.perform_failover(&mut nodes, "f", Utc::now()).unwrap();

        // a has the best score but only 4 free slots
        assert_eq!(plan.placed(), 6);
        assert_eq!(tasks(&nodes, "a"), 19);
        assert_eq!(tasks(&nodes, "b"), 10);
        assert_eq!(tasks(&nodes, "f"), 0);
    }

    #[test]
    fn test_spread_mode_matches_proportional_split() {
        let mut nodes = map(vec![
            node("a", 12, 20, NodeStatus::Online),
            node("b", 8, 15, NodeStatus::Online),
            node("c", 6, 10, NodeStatus::Offline),
        ]);
        let strategy = FailoverStrategy {
            mode: FailoverMode::Spread,
            ..FailoverStrategy::default()
        };
        let coordinator = coordinator_with(strategy, quiet());

        coordinator.perform_failover(&mut nodes, "c", Utc::now());

        assert_eq!(tasks(&nodes, "a"), 15);
        assert_eq!(tasks(&nodes, "b"), 11);
        assert_eq!(tasks(&nodes, "c"), 0);
    }

    #[test]
    fn test_under_capacity_failover_reports_shortfall() {
        let mut nodes = map(vec![
            node("a", 9, 10, NodeStatus::Online),
            node("b", 8, 10, NodeStatus::Online),
            node("f", 10, 10, NodeStatus::Offline),
        ]);

        let mut publisher = MockEventPublisher::new();
        publisher
            .expect_publish()
            .withf(|e| matches!(e, ClusterEvent::InsufficientCapacity { requested: 10, placed: 3, .. }))
            .times(1)
            .return_const(());
        publisher
            .expect_publish()
            .withf(|e| e.event_type() == "failover_completed")
            .times(1)
            .return_const(());
        let coordinator = coordinator_with(FailoverStrategy::default(), publisher);

        let plan = coordinator.perform_failover(&mut nodes, "f", Utc::now()).unwrap();

        assert_eq!(plan.placed(), 3);
        assert_eq!(tasks(&nodes, "a"), 10);
        assert_eq!(tasks(&nodes, "b"), 10);
        assert_eq!(tasks(&nodes, "f"), 7);
    }

    #[test]
    fn test_non_online_nodes_are_never_targets() {
        let mut nodes = map(vec![
            node("deg", 0, 50, NodeStatus::Degraded),
            node("mnt", 0, 50, NodeStatus::Maintenance),
            node("on", 0, 4, NodeStatus::Online),
            node("f", 6, 10, NodeStatus::Offline),
        ]);
        let coordinator = coordinator_with(FailoverStrategy::default(), quiet());

        coordinator.perform_failover(&mut nodes, "f", Utc::now());

        assert_eq!(tasks(&nodes, "deg"), 0);
        assert_eq!(tasks(&nodes, "mnt"), 0);
        assert_eq!(tasks(&nodes, "on"), 4);
        assert_eq!(tasks(&nodes, "f"), 2);
    }

    #[test]
    fn test_priority_breaks_score_ties() {
        let nodes = map(vec![
            node("a", 0, 10, NodeStatus::Online),
            node("b", 0, 10, NodeStatus::Online),
            node("f", 3, 10, NodeStatus::Offline),
        ]);

        let plain = coordinator_with(FailoverStrategy::default(), quiet());
        assert_eq!(plain.best_replacement(&nodes, &nodes["f"]).unwrap().id, "a");

        let mut strategy = FailoverStrategy::default();
        strategy.priorities.insert("b".to_string(), 5);
        let prioritized = coordinator_with(strategy, quiet());
        assert_eq!(prioritized.best_replacement(&nodes, &nodes["f"]).unwrap().id, "b");
    }

    #[test]
    fn test_failover_without_tasks_is_noop() {
        let mut nodes = map(vec![node("a", 0, 10, NodeStatus::Online), node("f", 0, 10, NodeStatus::Offline)]);
        let mut publisher = MockEventPublisher::new();
        publisher.expect_publish().never();
        let coordinator = coordinator_with(FailoverStrategy::default(), publisher);

        assert!(coordinator.perform_failover(&mut nodes, "f", Utc::now()).is_none());
        assert!(coordinator.perform_failover(&mut nodes, "ghost", Utc::now()).is_none());
    }

    #[test]
    fn test_graceful_degradation_sheds_thirty_percent() {
        let mut nodes = map(vec![
            node("a", 0, 20, NodeStatus::Online),
            node("b", 0, 20, NodeStatus::Online),
            node("d", 15, 20, NodeStatus::Degraded),
        ]);

        let mut publisher = MockEventPublisher::new();
        publisher
            .expect_publish()
            .withf(|e| {
                matches!(
                    e,
                    ClusterEvent::GracefulDegradation { previous_load: 15, new_load: 10, redistributed: 5, .. }
                )
            })
            .times(1)
            .return_const(());
        let coordinator = coordinator_with(FailoverStrategy::default(), publisher);

        let transition = StatusTransition {
            node_id: "d".to_string(),
            from: NodeStatus::Online,
            to: NodeStatus::Degraded,
            health_score: 55,
        };
        let outcomes = coordinator.handle_transitions(&mut nodes, &[transition], Utc::now());

        assert_eq!(outcomes.len(), 1);
        assert_eq!(tasks(&nodes, "d"), 10);
        assert_eq!(tasks(&nodes, "a") + tasks(&nodes, "b"), 5);
    }

    #[test]
    fn test_idle_degraded_node_sheds_nothing() {
        let mut nodes = map(vec![node("a", 0, 20, NodeStatus::Online), node("d", 0, 20, NodeStatus::Degraded)]);
        let mut publisher = MockEventPublisher::new();
        publisher.expect_publish().never();
        let coordinator = coordinator_with(FailoverStrategy::default(), publisher);

        assert!(coordinator.perform_graceful_degradation(&mut nodes, "d", Utc::now()).is_none());

        let transition = StatusTransition {
            node_id: "d".to_string(),
            from: NodeStatus::Maintenance,
            to: NodeStatus::Degraded,
            health_score: 40,
        };
        assert!(coordinator.handle_transitions(&mut nodes, &[transition], Utc::now()).is_empty());
    }

    #[test]
    fn test_stranded_tasks_placed_once_capacity_frees() {
        let mut nodes = map(vec![
            node("a", 9, 10, NodeStatus::Online),
            node("b", 9, 10, NodeStatus::Online),
            node("f", 10, 10, NodeStatus::Offline),
        ]);
        let coordinator = coordinator_with(FailoverStrategy::default(), quiet());

        coordinator.perform_failover(&mut nodes, "f", Utc::now());
        assert_eq!(tasks(&nodes, "f"), 8);

        // Still full: nothing to do
        assert!(coordinator.relocate_stranded(&mut nodes, Utc::now()).is_empty());
        assert_eq!(tasks(&nodes, "f"), 8);

        if let Some(a) = nodes.get_mut("a") {
            a.workload.current_tasks = 0;
        }
        let outcomes = coordinator.relocate_stranded(&mut nodes, Utc::now());

        assert_eq!(outcomes.len(), 1);
        assert!(matches!(&outcomes[0], FailoverOutcome::Retry { node_id, .. } if node_id == "f"));
        assert_eq!(tasks(&nodes, "f"), 0);
        assert_eq!(tasks(&nodes, "a"), 8);
        assert_eq!(tasks(&nodes, "b"), 10);
    }

    #[test]
    fn test_stranded_retry_ignores_live_nodes() {
        let mut nodes = map(vec![
            node("a", 0, 10, NodeStatus::Online),
            node("d", 5, 10, NodeStatus::Degraded),
            node("b", 5, 10, NodeStatus::Online),
        ]);
        let mut publisher = MockEventPublisher::new();
        publisher.expect_publish().never();
        let coordinator = coordinator_with(FailoverStrategy::default(), publisher);

        assert!(coordinator.relocate_stranded(&mut nodes, Utc::now()).is_empty());
        assert_eq!(tasks(&nodes, "d"), 5);
    }

    #[test]
    fn test_degradation_above_threshold_is_ignored() {
        let mut nodes = map(vec![node("a", 0, 20, NodeStatus::Online), node("d", 15, 20, NodeStatus::Degraded)]);
        let mut publisher = MockEventPublisher::new();
        publisher.expect_publish().never();
        let coordinator = coordinator_with(FailoverStrategy::default(), publisher);

        let transition = StatusTransition {
            node_id: "d".to_string(),
            from: NodeStatus::Online,
            to: NodeStatus::Degraded,
            health_score: 75,
        };
        assert!(coordinator.handle_transitions(&mut nodes, &[transition], Utc::now()).is_empty());
        assert_eq!(tasks(&nodes, "d"), 15);
    }

    #[test]
    fn test_emergency_when_fewer_than_two_online() {
        let mut publisher = MockEventPublisher::new();
        publisher
            .expect_publish()
            .withf(|e| matches!(e, ClusterEvent::ClusterEmergency { online_nodes: 1, total_nodes: 2, .. }))
            .times(1)
            .return_const(());
        let coordinator = coordinator_with(FailoverStrategy::default(), publisher);

        let healthy = map(vec![node("a", 0, 10, NodeStatus::Online), node("b", 0, 10, NodeStatus::Online)]);
        assert!(!coordinator.check_emergency(&healthy, Utc::now()));

        let failing = map(vec![node("a", 0, 10, NodeStatus::Online), node("b", 0, 10, NodeStatus::Offline)]);
        assert!(coordinator.check_emergency(&failing, Utc::now()));
    }
}
