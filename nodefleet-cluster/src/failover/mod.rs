//! Workload relocation when nodes fail or degrade

mod coordinator;
mod distribution;

pub use coordinator::{replacement_score, FailoverCoordinator, FailoverOutcome};
pub use distribution::{distribute_proportionally, Distribution, TaskAssignment};
