pub mod node;
pub mod strategy;

pub use node::{
    generate_node_id, Node, NodeCapabilities, NodeLocation, NodePerformance, NodeSpec, NodeStatus,
    NodeWorkload,
};
pub use strategy::{BalancingAlgorithm, FailoverMode, FailoverStrategy, LoadBalancingStrategy};
