//! Node registry: the authoritative set of worker nodes
//!
//! Every mutation of node state goes through this registry's lock. Multi-node
//! operations (redistribution, a whole monitoring pass) run inside a single
//! `write` closure so no partial transfer is observable from outside.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::BTreeMap;

use nodefleet_core::{Node, NodeSpec, NodeStatus};

use crate::failover::FailoverCoordinator;

/// Nodes keyed by id. Ordered, so iteration order is stable across calls.
pub type NodeMap = BTreeMap<String, Node>;

/// Optional criteria for `list_nodes`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeFilter {
    pub status: Option<NodeStatus>,
    pub region: Option<String>,
}

impl NodeFilter {
    #[must_use]
    pub const fn with_status(status: NodeStatus) -> Self {
        Self {
            status: Some(status),
            region: None,
        }
    }

    #[must_use]
    pub fn in_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    #[must_use]
    pub fn matches(&self, node: &Node) -> bool {
        if self.status.is_some_and(|status| status != node.status) {
            return false;
        }
        match &self.region {
            Some(region) => node
                .location
                .as_ref()
                .is_some_and(|location| &location.region == region),
            None => true,
        }
    }
}

/// Result of offering a discovered node to the registry
#[derive(Debug, Clone, PartialEq)]
pub enum DiscoveryOutcome {
    /// Unknown endpoint, a new node was created
    Added(Node),
    /// Endpoint already registered. Being listed by a discovery source says
    /// nothing about liveness, so the node is left untouched.
    Known(String),
}

/// In-memory node registry guarded by a single lock
#[derive(Debug, Default)]
pub struct NodeRegistry {
    nodes: RwLock<NodeMap>,
}

impl NodeRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and register a node for a discovery event
    pub fn add_node(&self, spec: NodeSpec, now: DateTime<Utc>) -> Node {
        let node = Node::from_spec(spec, now);
        self.insert_node(node.clone());
        tracing::info!(
            node_id = %node.id,
            hostname = %node.hostname,
            endpoint = %node.endpoint(),
            max_tasks = node.workload.max_tasks,
            "Node added to registry"
        );
        node
    }

    /// Register a fully built node, replacing any node with the same id
    pub fn insert_node(&self, node: Node) {
        self.nodes.write().insert(node.id.clone(), node);
    }

    /// Add the node unless one with the same hostname and endpoint is
    /// already registered.
    pub fn upsert_discovered(&self, spec: NodeSpec, now: DateTime<Utc>) -> DiscoveryOutcome {
        let mut nodes = self.nodes.write();

        let known = nodes
            .values()
            .find(|n| n.hostname == spec.hostname && n.address == spec.address && n.port == spec.port);
        if let Some(node) = known {
            return DiscoveryOutcome::Known(node.id.clone());
        }

        let node = Node::from_spec(spec, now);
        nodes.insert(node.id.clone(), node.clone());
        tracing::info!(
            node_id = %node.id,
            hostname = %node.hostname,
            endpoint = %node.endpoint(),
            "Discovered new node"
        );
        DiscoveryOutcome::Added(node)
    }

    /// Gracefully remove a node.
    ///
    /// Outstanding tasks are first handed to the rest of the cluster with the
    /// failover routine. Removal proceeds even when they cannot all be
    /// placed; the shortfall is reported by the coordinator as an event.
    /// Returns false if the id is unknown.
    pub fn remove_node(&self, node_id: &str, coordinator: &FailoverCoordinator, now: DateTime<Utc>) -> bool {
        let mut nodes = self.nodes.write();

        let Some(outstanding) = nodes.get(node_id).map(|n| n.workload.current_tasks) else {
            tracing::debug!(node_id = %node_id, "Remove requested for unknown node");
            return false;
        };

        if outstanding > 0 {
            if let Some(plan) = coordinator.drain_node(&mut nodes, node_id, now) {
                tracing::info!(
                    node_id = %node_id,
                    outstanding,
                    placed = plan.placed(),
                    "Drained node before removal"
                );
            }
        }

        nodes.remove(node_id);
        tracing::info!(node_id = %node_id, "Node removed from registry");
        true
    }

    #[must_use]
    pub fn get_node(&self, node_id: &str) -> Option<Node> {
        self.nodes.read().get(node_id).cloned()
    }

    /// Snapshot of all nodes, optionally filtered, in id order
    #[must_use]
    pub fn list_nodes(&self, filter: Option<&NodeFilter>) -> Vec<Node> {
        self.nodes
            .read()
            .values()
            .filter(|n| filter.is_none_or(|f| f.matches(n)))
            .cloned()
            .collect()
    }

    /// Record that the node was heard from at `at`. Returns false if unknown.
    pub fn record_heartbeat(&self, node_id: &str, at: DateTime<Utc>) -> bool {
        let mut nodes = self.nodes.write();
        match nodes.get_mut(node_id) {
            Some(node) => {
                node.mark_seen(at);
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }

    /// Run `f` with shared access to the node set
    pub fn read<R>(&self, f: impl FnOnce(&NodeMap) -> R) -> R {
        f(&self.nodes.read())
    }

    /// Run `f` with exclusive access to the node set
    pub fn write<R>(&self, f: impl FnOnce(&mut NodeMap) -> R) -> R {
        f(&mut self.nodes.write())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MockEventPublisher;
    use chrono::Duration;
    use nodefleet_core::{FailoverStrategy, NodeLocation};
    use std::sync::Arc;

    fn spec(host: &str, max_tasks: u32) -> NodeSpec {
        NodeSpec::new(host, format!("10.0.0.{}", host.len()), 4028, max_tasks)
    }

    fn quiet_coordinator() -> FailoverCoordinator {
        let mut publisher = MockEventPublisher::new();
        publisher.expect_publish().return_const(());
        FailoverCoordinator::new(FailoverStrategy::default(), Arc::new(publisher)).unwrap()
    }

    #[test]
    fn test_add_and_get_node() {
        let registry = NodeRegistry::new();
        let now = Utc::now();
        let node = registry.add_node(spec("rig-a", 20), now);

        assert_eq!(registry.len(), 1);
        let fetched = registry.get_node(&node.id).unwrap();
        assert_eq!(fetched.hostname, "rig-a");
        assert_eq!(fetched.status, NodeStatus::Online);
        assert!(registry.get_node("missing").is_none());
    }

    #[test]
    fn test_ids_are_unique_for_same_host() {
        let registry = NodeRegistry::new();
        let now = Utc::now();
        let a = registry.add_node(spec("rig-a", 20), now);
        let b = registry.add_node(spec("rig-a", 20), now);
        assert_ne!(a.id, b.id);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_list_nodes_with_filter() {
        let registry = NodeRegistry::new();
        let now = Utc::now();
        let a = registry.add_node(
            spec("rig-a", 20).with_location(NodeLocation {
                region: "eu-west".to_string(),
                ..NodeLocation::default()
            }),
            now,
        );
        let b = registry.add_node(spec("rig-b", 20), now);
        registry.write(|nodes| {
            if let Some(node) = nodes.get_mut(&b.id) {
                node.status = NodeStatus::Offline;
            }
        });

        assert_eq!(registry.list_nodes(None).len(), 2);

        let offline = registry.list_nodes(Some(&NodeFilter::with_status(NodeStatus::Offline)));
        assert_eq!(offline.len(), 1);
        assert_eq!(offline[0].id, b.id);

        let eu = registry.list_nodes(Some(&NodeFilter::default().in_region("eu-west")));
        assert_eq!(eu.len(), 1);
        assert_eq!(eu[0].id, a.id);
    }

    #[test]
    fn test_rediscovery_does_not_count_as_contact() {
        let registry = NodeRegistry::new();
        let first = Utc::now() - Duration::seconds(200);

        let DiscoveryOutcome::Added(node) = registry.upsert_discovered(spec("rig-a", 20), first) else {
            panic!("expected a new node");
        };

        let later = Utc::now();
        assert_eq!(
            registry.upsert_discovered(spec("rig-a", 20), later),
            DiscoveryOutcome::Known(node.id.clone())
        );
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get_node(&node.id).unwrap().performance.last_seen, first);
    }

    #[test]
    fn test_record_heartbeat() {
        let registry = NodeRegistry::new();
        let now = Utc::now();
        let node = registry.add_node(spec("rig-a", 20), now);

        let later = now + Duration::seconds(30);
        assert!(registry.record_heartbeat(&node.id, later));
        assert_eq!(registry.get_node(&node.id).unwrap().performance.last_seen, later);

        // Stale heartbeats do not move last_seen backwards
        assert!(registry.record_heartbeat(&node.id, now));
        assert_eq!(registry.get_node(&node.id).unwrap().performance.last_seen, later);

        assert!(!registry.record_heartbeat("missing", later));
    }

    #[test]
    fn test_remove_unknown_node() {
        let registry = NodeRegistry::new();
        assert!(!registry.remove_node("missing", &quiet_coordinator(), Utc::now()));
    }

    #[test]
    fn test_remove_node_drains_workload_first() {
        let registry = NodeRegistry::new();
        let now = Utc::now();
        let leaving = registry.add_node(spec("rig-a", 20), now);
        let staying = registry.add_node(spec("rig-bb", 20), now);
        registry.write(|nodes| {
            if let Some(node) = nodes.get_mut(&leaving.id) {
                node.workload.current_tasks = 7;
            }
        });

        assert!(registry.remove_node(&leaving.id, &quiet_coordinator(), now));
        assert!(registry.get_node(&leaving.id).is_none());
        assert_eq!(registry.get_node(&staying.id).unwrap().workload.current_tasks, 7);
    }

    #[test]
    fn test_remove_node_proceeds_without_capacity() {
        let registry = NodeRegistry::new();
        let now = Utc::now();
        let leaving = registry.add_node(spec("rig-a", 20), now);
        registry.write(|nodes| {
            if let Some(node) = nodes.get_mut(&leaving.id) {
                node.workload.current_tasks = 5;
            }
        });

        let mut publisher = MockEventPublisher::new();
        publisher
            .expect_publish()
            .withf(|event| event.event_type() == "insufficient_capacity")
            .times(1)
            .return_const(());
        let coordinator =
            FailoverCoordinator::new(FailoverStrategy::default(), Arc::new(publisher)).unwrap();

        assert!(registry.remove_node(&leaving.id, &coordinator, now));
        assert!(registry.is_empty());
    }
}
