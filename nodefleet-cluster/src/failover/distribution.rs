//! Proportional task distribution
//!
//! Splits a batch of tasks across candidate nodes in proportion to each
//! node's free capacity. Shares are floored in stable order; the few tasks
//! lost to flooring go one at a time to the nodes with the largest
//! fractional share. A node is never given more than its free capacity.

use serde::{Deserialize, Serialize};

use crate::discovery::NodeMap;

/// Tasks handed to one node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskAssignment {
    pub node_id: String,
    pub tasks: u32,
}

impl TaskAssignment {
    #[must_use]
    pub fn new(node_id: impl Into<String>, tasks: u32) -> Self {
        Self {
            node_id: node_id.into(),
            tasks,
        }
    }
}

/// Where a batch of tasks went
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Distribution {
    pub requested: u32,
    pub assignments: Vec<TaskAssignment>,
}

impl Distribution {
    #[must_use]
    pub const fn empty(requested: u32) -> Self {
        Self {
            requested,
            assignments: Vec::new(),
        }
    }

    /// Everything to a single node
    #[must_use]
    pub fn single(node_id: impl Into<String>, tasks: u32) -> Self {
        Self {
            requested: tasks,
            assignments: vec![TaskAssignment::new(node_id, tasks)],
        }
    }

    #[must_use]
    pub fn placed(&self) -> u32 {
        self.assignments.iter().map(|a| a.tasks).sum()
    }

    #[must_use]
    pub fn shortfall(&self) -> u32 {
        self.requested.saturating_sub(self.placed())
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.shortfall() == 0
    }

    /// Add every assignment to its target node's task count
    pub fn apply(&self, nodes: &mut NodeMap) {
        for assignment in &self.assignments {
            match nodes.get_mut(&assignment.node_id) {
                Some(node) => {
                    node.workload.current_tasks = node.workload.current_tasks.saturating_add(assignment.tasks);
                }
                None => tracing::warn!(
                    node_id = %assignment.node_id,
                    tasks = assignment.tasks,
                    "Assignment target vanished before apply"
                ),
            }
        }
    }
}

/// Spread `tasks` over `(node_id, available_capacity)` candidates.
///
/// When total capacity is short, every candidate is filled and the
/// remainder is left unplaced.
#[must_use]
pub fn distribute_proportionally(candidates: &[(String, u32)], tasks: u32) -> Distribution {
    let candidates: Vec<&(String, u32)> = candidates.iter().filter(|(_, available)| *available > 0).collect();
    let total_available: u64 = candidates.iter().map(|(_, available)| u64::from(*available)).sum();

    if tasks == 0 || total_available == 0 {
        return Distribution::empty(tasks);
    }

    if total_available <= u64::from(tasks) {
        return Distribution {
            requested: tasks,
            assignments: candidates
                .iter()
                .map(|(id, available)| TaskAssignment::new(id.clone(), *available))
                .collect(),
        };
    }

    let requested = u64::from(tasks);
    let mut shares: Vec<u64> = vec![0; candidates.len()];
    let mut remaining = requested;

    for (share, (_, available)) in shares.iter_mut().zip(&candidates) {
        if remaining == 0 {
            break;
        }
        let proportional = requested * u64::from(*available) / total_available;
        *share = proportional.min(u64::from(*available)).min(remaining);
        remaining -= *share;
    }

    if remaining > 0 {
        // Largest fractional part first, ties keep candidate order
        let mut order: Vec<usize> = (0..candidates.len()).collect();
        order.sort_by_key(|&i| {
            let fraction = requested * u64::from(candidates[i].1) % total_available;
            (std::cmp::Reverse(fraction), i)
        });

        while remaining > 0 {
            let mut progressed = false;
            for &i in &order {
                if remaining == 0 {
                    break;
                }
                if shares[i] < u64::from(candidates[i].1) {
                    shares[i] += 1;
                    remaining -= 1;
                    progressed = true;
                }
            }
            if !progressed {
                break;
            }
        }
    }

    Distribution {
        requested: tasks,
        assignments: candidates
            .iter()
            .zip(shares)
            .filter(|(_, share)| *share > 0)
            .map(|((id, _), share)| TaskAssignment::new(id.clone(), u32::try_from(share).unwrap_or(u32::MAX)))
            .collect(),
    }
}
