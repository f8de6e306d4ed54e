//! Node discovery sources
//!
//! A discovery pass asks a source for every node it currently knows about.
//! The registry decides whether each one is new or already registered.

use async_trait::async_trait;
use std::collections::HashSet;

use nodefleet_core::config::{DiscoveryConfig, DnsDiscoveryConfig};
use nodefleet_core::NodeSpec;

use crate::error::{Error, Result};

/// Where discovery passes find nodes
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DiscoverySource: Send + Sync {
    async fn discover(&self) -> Result<Vec<NodeSpec>>;
}

/// Fixed list of nodes, typically from configuration
#[derive(Debug, Clone, Default)]
pub struct StaticDiscovery {
    seeds: Vec<NodeSpec>,
}

impl StaticDiscovery {
    #[must_use]
    pub const fn new(seeds: Vec<NodeSpec>) -> Self {
        Self { seeds }
    }
}

#[async_trait]
impl DiscoverySource for StaticDiscovery {
    async fn discover(&self) -> Result<Vec<NodeSpec>> {
        Ok(self.seeds.clone())
    }
}

/// Resolves a DNS name and treats every distinct address as a node.
///
/// Suits headless services where each backing host gets its own A record.
#[derive(Debug, Clone)]
pub struct DnsDiscovery {
    name: String,
    port: u16,
    max_tasks: u32,
}

impl DnsDiscovery {
    #[must_use]
    pub fn new(config: &DnsDiscoveryConfig) -> Self {
        Self {
            name: config.name.clone(),
            port: config.port,
            max_tasks: config.max_tasks,
        }
    }
}

#[async_trait]
impl DiscoverySource for DnsDiscovery {
    async fn discover(&self) -> Result<Vec<NodeSpec>> {
        let lookup = format!("{}:{}", self.name, self.port);
        let addrs = tokio::net::lookup_host(&lookup)
            .await
            .map_err(|e| Error::Discovery(format!("DNS lookup failed for '{}': {e}", self.name)))?;

        let mut seen = HashSet::new();
        let specs: Vec<NodeSpec> = addrs
            .map(|addr| addr.ip().to_string())
            .filter(|ip| seen.insert(ip.clone()))
            .map(|ip| NodeSpec::new(ip.clone(), ip, self.port, self.max_tasks))
            .collect();

        tracing::debug!(dns_name = %self.name, nodes = specs.len(), "DNS discovery resolved");
        Ok(specs)
    }
}

/// Every source enabled in configuration, queried in turn
pub struct CompositeDiscovery {
    sources: Vec<Box<dyn DiscoverySource>>,
}

impl CompositeDiscovery {
    #[must_use]
    pub fn new(sources: Vec<Box<dyn DiscoverySource>>) -> Self {
        Self { sources }
    }

    #[must_use]
    pub fn from_config(config: &DiscoveryConfig) -> Self {
        let mut sources: Vec<Box<dyn DiscoverySource>> =
            vec![Box::new(StaticDiscovery::new(config.seeds.clone()))];
        if let Some(dns) = &config.dns {
            sources.push(Box::new(DnsDiscovery::new(dns)));
        }
        Self::new(sources)
    }
}

#[async_trait]
impl DiscoverySource for CompositeDiscovery {
    /// Fails only if every source fails
    async fn discover(&self) -> Result<Vec<NodeSpec>> {
        let mut specs = Vec::new();
        let mut last_error = None;
        let mut succeeded = 0usize;

        for source in &self.sources {
            match source.discover().await {
                Ok(found) => {
                    succeeded += 1;
                    specs.extend(found);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Discovery source failed, continuing with others");
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if succeeded == 0 => Err(e),
            _ => Ok(specs),
        }
    }
}
