//! Cluster control plane
//!
//! Owns the registry and the three per-tick components, and drives two
//! independent timers:
//! - discovery, which feeds new nodes into the registry
//! - monitoring, which runs health -> load balancing -> failover in order
//!
//! Lock order is always strategy locks first, then the registry lock.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, interval_at, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use nodefleet_core::config::ClusterConfig;
use nodefleet_core::{FailoverStrategy, LoadBalancingStrategy, Node, NodeSpec};

use crate::discovery::health_monitor::resolve_maintenance;
use crate::discovery::{
    DiscoveryOutcome, DiscoverySource, HealthMonitor, HealthMonitorConfig, HealthSnapshot, LoadBalancer,
    NodeFilter, NodeRegistry, RebalanceSuggestion, StatusTransition, TelemetryBatch,
};
use crate::error::{Error, Result};
use crate::events::{ClusterEvent, EventPublisher};
use crate::failover::{FailoverCoordinator, FailoverOutcome};
use crate::status::{ClusterStatus, ClusterStatusAggregator};
use crate::telemetry::TelemetrySource;

/// Everything one monitoring tick did
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub transitions: Vec<StatusTransition>,
    pub suggestions: Vec<RebalanceSuggestion>,
    pub outcomes: Vec<FailoverOutcome>,
    pub emergency: bool,
    pub snapshot: HealthSnapshot,
}

/// Result of one discovery pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryReport {
    pub added: Vec<String>,
    /// Already registered endpoints the source listed again
    pub known: Vec<String>,
}

/// Node fleet control plane
pub struct ClusterManager {
    config: ClusterConfig,
    registry: Arc<NodeRegistry>,
    monitor: HealthMonitor,
    load_balancer: RwLock<LoadBalancer>,
    failover: RwLock<FailoverCoordinator>,
    publisher: Arc<dyn EventPublisher>,
    discovery: Arc<dyn DiscoverySource>,
    /// Serialises ticks so two passes never interleave
    tick_lock: tokio::sync::Mutex<()>,
    cancel_token: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ClusterManager {
    /// Build the control plane. Strategies derived from `config` are
    /// validated here.
    pub fn new(
        config: ClusterConfig,
        telemetry: Arc<dyn TelemetrySource>,
        discovery: Arc<dyn DiscoverySource>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Result<Self> {
        if config.degraded_timeout_seconds >= config.offline_timeout_seconds {
            return Err(Error::Configuration(format!(
                "degraded timeout ({}s) must be shorter than offline timeout ({}s)",
                config.degraded_timeout_seconds, config.offline_timeout_seconds
            )));
        }

        let load_balancer = LoadBalancer::new(config.load_balancing_strategy())?;
        let failover = FailoverCoordinator::new(config.failover_strategy(), Arc::clone(&publisher))?;
        let monitor = HealthMonitor::new(telemetry, HealthMonitorConfig::from(&config));

        Ok(Self {
            config,
            registry: Arc::new(NodeRegistry::new()),
            monitor,
            load_balancer: RwLock::new(load_balancer),
            failover: RwLock::new(failover),
            publisher,
            discovery,
            tick_lock: tokio::sync::Mutex::new(()),
            cancel_token: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        })
    }

    #[must_use]
    pub fn registry(&self) -> Arc<NodeRegistry> {
        Arc::clone(&self.registry)
    }

    /// Run one discovery pass, then start the discovery and monitoring loops.
    ///
    /// Calling it again while the loops run does nothing.
    pub async fn start(self: &Arc<Self>) {
        if !self.tasks.lock().is_empty() {
            tracing::warn!("Cluster manager already started");
            return;
        }

        if let Err(e) = self.run_discovery().await {
            tracing::warn!(error = %e, "Initial discovery failed");
        }

        let discovery_period = Self::period(self.config.discovery_interval_seconds);
        let discovery_timer = interval_at(Instant::now() + discovery_period, discovery_period);
        let monitoring_timer = interval(Self::period(self.config.monitoring_interval_seconds));

        let handles = vec![
            self.spawn_discovery_loop(discovery_timer),
            self.spawn_monitoring_loop(monitoring_timer),
        ];
        self.tasks.lock().extend(handles);

        tracing::info!(
            monitoring_interval_secs = self.config.monitoring_interval_seconds,
            discovery_interval_secs = self.config.discovery_interval_seconds,
            "Cluster manager started"
        );
    }

    fn period(secs: u64) -> Duration {
        Duration::from_secs(secs.max(1))
    }

    fn spawn_monitoring_loop(self: &Arc<Self>, mut timer: Interval) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        let cancel_token = self.cancel_token.clone();
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = cancel_token.cancelled() => {
                        tracing::info!("Monitoring loop shutting down");
                        return;
                    }
                    _ = timer.tick() => {
                        manager.run_tick().await;
                    }
                }
            }
        })
    }

    fn spawn_discovery_loop(self: &Arc<Self>, mut timer: Interval) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        let cancel_token = self.cancel_token.clone();
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = cancel_token.cancelled() => {
                        tracing::info!("Discovery loop shutting down");
                        return;
                    }
                    _ = timer.tick() => {
                        if let Err(e) = manager.run_discovery().await {
                            tracing::warn!(error = %e, "Discovery pass failed, retrying next interval");
                        }
                    }
                }
            }
        })
    }

    /// Stop both loops and wait for them. An in-flight tick completes first.
    pub async fn shutdown(&self) {
        self.cancel_token.cancel();
        let handles: Vec<_> = std::mem::take(&mut *self.tasks.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Background task ended abnormally");
            }
        }
        tracing::info!("Cluster manager stopped");
    }

    pub async fn run_tick(&self) -> TickReport {
        self.run_tick_at(Utc::now()).await
    }

    /// One monitoring pass evaluated at `now`
    pub async fn run_tick_at(&self, now: DateTime<Utc>) -> TickReport {
        let _tick = self.tick_lock.lock().await;

        // Every node is asked; a fresh sample is how a quiet node comes back
        let to_sample: Vec<String> = self.registry.read(|nodes| nodes.keys().cloned().collect());
        let telemetry = self.monitor.collect(&to_sample).await;
        let report = self.apply_tick(telemetry, now);

        for suggestion in &report.suggestions {
            self.publisher.publish(suggestion.clone().into_event(now));
        }
        self.publisher.publish(report.snapshot.into_event(now));

        tracing::debug!(
            sampled = to_sample.len(),
            transitions = report.transitions.len(),
            suggestions = report.suggestions.len(),
            failovers = report.outcomes.len(),
            online = report.snapshot.online,
            total = report.snapshot.total_nodes,
            "Monitoring tick complete"
        );
        report
    }

    /// The locked part of a tick. Kept synchronous so no guard is held
    /// across an await.
    fn apply_tick(&self, telemetry: TelemetryBatch, now: DateTime<Utc>) -> TickReport {
        let load_balancer = self.load_balancer.read();
        let failover = self.failover.read();

        self.registry.write(|nodes| {
            let transitions = self.monitor.evaluate_all(nodes, telemetry, now);
            let suggestions = load_balancer.suggest_rebalance(nodes);
            let mut outcomes = failover.handle_transitions(nodes, &transitions, now);
            outcomes.extend(failover.relocate_stranded(nodes, now));
            let emergency = failover.check_emergency(nodes, now);

            TickReport {
                transitions,
                suggestions,
                outcomes,
                emergency,
                snapshot: HealthSnapshot::from_nodes(nodes),
            }
        })
    }

    pub async fn run_discovery(&self) -> Result<DiscoveryReport> {
        self.run_discovery_at(Utc::now()).await
    }

    /// Ask the discovery source for nodes and register the unknown ones
    pub async fn run_discovery_at(&self, now: DateTime<Utc>) -> Result<DiscoveryReport> {
        let specs = self.discovery.discover().await?;
        let mut report = DiscoveryReport::default();

        for spec in specs {
            match self.registry.upsert_discovered(spec, now) {
                DiscoveryOutcome::Added(node) => {
                    self.publish_added(&node, now);
                    report.added.push(node.id);
                }
                DiscoveryOutcome::Known(id) => report.known.push(id),
            }
        }

        if !report.added.is_empty() {
            tracing::info!(added = report.added.len(), total = self.registry.len(), "Discovery pass added nodes");
        }
        Ok(report)
    }

    /// Register a node directly, bypassing the discovery source
    pub fn add_node(&self, spec: NodeSpec) -> Node {
        let now = Utc::now();
        let node = self.registry.add_node(spec, now);
        self.publish_added(&node, now);
        node
    }

    fn publish_added(&self, node: &Node, now: DateTime<Utc>) {
        self.publisher.publish(ClusterEvent::NodeAdded {
            node_id: node.id.clone(),
            hostname: node.hostname.clone(),
            timestamp: now,
        });
    }

    /// Drain and remove a node. Returns false if the id is unknown.
    pub fn remove_node(&self, node_id: &str) -> bool {
        let now = Utc::now();
        let removed = {
            let failover = self.failover.read();
            self.registry.remove_node(node_id, &failover, now)
        };

        if removed {
            self.publisher.publish(ClusterEvent::NodeRemoved {
                node_id: node_id.to_string(),
                timestamp: now,
            });
        }
        removed
    }

    #[must_use]
    pub fn get_node(&self, node_id: &str) -> Option<Node> {
        self.registry.get_node(node_id)
    }

    #[must_use]
    pub fn list_nodes(&self, filter: Option<&NodeFilter>) -> Vec<Node> {
        self.registry.list_nodes(filter)
    }

    #[must_use]
    pub fn get_cluster_status(&self) -> ClusterStatus {
        let load_balancer = self.load_balancer.read();
        let failover = self.failover.read();
        self.registry
            .read(|nodes| ClusterStatusAggregator::aggregate(nodes, load_balancer.strategy(), failover.strategy()))
    }

    /// Put a node into or take it out of maintenance.
    ///
    /// Entering maintenance drains the node's tasks. Leaving it lets the
    /// next tick evaluate the node normally.
    pub fn set_maintenance(&self, node_id: &str, enabled: bool) -> Result<()> {
        let now = Utc::now();
        let failover = self.failover.read();

        let found = self.registry.write(|nodes| {
            let Some(node) = nodes.get_mut(node_id) else {
                return false;
            };
            node.maintenance = enabled;
            if enabled {
                resolve_maintenance(node);
                failover.drain_node(nodes, node_id, now);
            }
            true
        });
        drop(failover);

        if !found {
            return Err(Error::NodeNotFound(node_id.to_string()));
        }

        tracing::info!(node_id = %node_id, enabled, "Maintenance mode changed");
        self.publisher.publish(ClusterEvent::MaintenanceChanged {
            node_id: node_id.to_string(),
            enabled,
            timestamp: now,
        });
        Ok(())
    }

    /// Swap the load balancing strategy. Invalid strategies are rejected
    /// and the current one stays active.
    pub fn set_load_balancing_strategy(&self, strategy: LoadBalancingStrategy) -> Result<()> {
        let load_balancer = LoadBalancer::new(strategy)?;
        tracing::info!(
            strategy = %load_balancer.strategy().name,
            algorithm = load_balancer.strategy().algorithm.as_str(),
            "Load balancing strategy updated"
        );
        *self.load_balancer.write() = load_balancer;
        Ok(())
    }

    pub fn set_failover_strategy(&self, strategy: FailoverStrategy) -> Result<()> {
        let coordinator = FailoverCoordinator::new(strategy, Arc::clone(&self.publisher))?;
        tracing::info!(
            mode = coordinator.strategy().mode.as_str(),
            health_threshold = coordinator.strategy().health_threshold,
            "Failover strategy updated"
        );
        *self.failover.write() = coordinator;
        Ok(())
    }
}
