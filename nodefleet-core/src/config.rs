use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::logging;
use crate::models::{
    BalancingAlgorithm, FailoverMode, FailoverStrategy, LoadBalancingStrategy, NodeSpec,
};

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub cluster: ClusterConfig,
    pub logging: LoggingConfig,
    pub discovery: DiscoveryConfig,
}

/// Control-plane timing and policy settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub monitoring_interval_seconds: u64,
    pub discovery_interval_seconds: u64,
    /// Silence longer than this marks a node offline
    pub offline_timeout_seconds: u64,
    /// Silence longer than this marks a node degraded
    pub degraded_timeout_seconds: u64,
    pub failover_health_threshold: u8,
    pub failover_time_seconds: u64,
    pub failover_mode: FailoverMode,
    pub load_balancing_algorithm: BalancingAlgorithm,
    pub rebalance_threshold: f64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            monitoring_interval_seconds: 30,
            discovery_interval_seconds: 60,
            offline_timeout_seconds: 300,
            degraded_timeout_seconds: 120,
            failover_health_threshold: 70,
            failover_time_seconds: 30,
            failover_mode: FailoverMode::BestFit,
            load_balancing_algorithm: BalancingAlgorithm::Adaptive,
            rebalance_threshold: LoadBalancingStrategy::DEFAULT_REBALANCE_THRESHOLD,
        }
    }
}

impl ClusterConfig {
    /// Load balancing strategy described by this configuration
    #[must_use]
    pub fn load_balancing_strategy(&self) -> LoadBalancingStrategy {
        let strategy = LoadBalancingStrategy::new(self.load_balancing_algorithm);
        if self.load_balancing_algorithm == BalancingAlgorithm::Adaptive {
            strategy.with_parameter(LoadBalancingStrategy::REBALANCE_THRESHOLD, self.rebalance_threshold)
        } else {
            strategy
        }
    }

    /// Failover strategy described by this configuration
    #[must_use]
    pub fn failover_strategy(&self) -> FailoverStrategy {
        FailoverStrategy {
            mode: self.failover_mode,
            health_threshold: self.failover_health_threshold,
            failover_time_seconds: self.failover_time_seconds,
            ..FailoverStrategy::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

/// Where new nodes come from
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Nodes known up front
    pub seeds: Vec<NodeSpec>,
    /// Resolve a DNS name to find nodes, e.g. a headless service
    pub dns: Option<DnsDiscoveryConfig>,
}

/// DNS-based discovery: every resolved address is one node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsDiscoveryConfig {
    pub name: String,
    pub port: u16,
    pub max_tasks: u32,
}

impl Config {
    /// Load configuration from multiple sources
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided and present)
    /// 3. Defaults
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // NODEFLEET_CLUSTER__OFFLINE_TIMEOUT_SECONDS=600, etc.
        builder = builder.add_source(
            Environment::with_prefix("NODEFLEET")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }

    /// Load from environment variables only
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Load from file path
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }

    /// Check the configuration for values the control plane cannot run with.
    ///
    /// Returns every problem found rather than stopping at the first.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        let cluster = &self.cluster;

        if cluster.monitoring_interval_seconds == 0 {
            errors.push("cluster.monitoring_interval_seconds must be greater than zero".to_string());
        }
        if cluster.discovery_interval_seconds == 0 {
            errors.push("cluster.discovery_interval_seconds must be greater than zero".to_string());
        }
        if cluster.degraded_timeout_seconds >= cluster.offline_timeout_seconds {
            errors.push(format!(
                "cluster.degraded_timeout_seconds ({}) must be less than offline_timeout_seconds ({})",
                cluster.degraded_timeout_seconds, cluster.offline_timeout_seconds
            ));
        }
        if let Err(e) = cluster.load_balancing_strategy().validate() {
            errors.push(format!("cluster: {e}"));
        }
        if let Err(e) = cluster.failover_strategy().validate() {
            errors.push(format!("cluster: {e}"));
        }

        if let Err(e) = logging::parse_log_level(&self.logging.level) {
            errors.push(format!("logging.level: {e}"));
        }
        if !matches!(self.logging.format.as_str(), "json" | "pretty") {
            errors.push(format!(
                "logging.format must be 'json' or 'pretty', got '{}'",
                self.logging.format
            ));
        }

        if let Some(dns) = &self.discovery.dns {
            if dns.name.trim().is_empty() {
                errors.push("discovery.dns.name must not be empty".to_string());
            }
        }

        for seed in &self.discovery.seeds {
            if seed.hostname.trim().is_empty() {
                errors.push(format!("discovery seed at {}:{} has no hostname", seed.address, seed.port));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
