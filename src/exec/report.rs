//! Aggregate result of one build run.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::types::StepStatus;

/// Terminal outcome of one graph node.
#[derive(Clone, Debug)]
pub struct NodeReport {
    pub id: String,
    pub status: StepStatus,
    /// Wall-clock execution time; `None` for nodes that never ran.
    pub duration: Option<Duration>,
    /// The failure message, for `Failed` nodes.
    pub error: Option<String>,
}

/// Per-node terminal statuses for one run, in declaration order.
#[derive(Clone, Debug)]
pub struct BuildReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub nodes: Vec<NodeReport>,
}

impl BuildReport {
    /// The build succeeded only if every node succeeded.
    #[must_use]
    pub fn success(&self) -> bool {
        self.nodes
            .iter()
            .all(|n| n.status == StepStatus::Succeeded)
    }

    /// (succeeded, failed, skipped) counts.
    #[must_use]
    pub fn counts(&self) -> (usize, usize, usize) {
        let mut counts = (0, 0, 0);
        for node in &self.nodes {
            match node.status {
                StepStatus::Succeeded => counts.0 += 1,
                StepStatus::Failed => counts.1 += 1,
                StepStatus::Skipped => counts.2 += 1,
                _ => {}
            }
        }
        counts
    }

    #[must_use]
    pub fn node(&self, id: &str) -> Option<&NodeReport> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

impl fmt::Display for BuildReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for node in &self.nodes {
            match (&node.duration, &node.error) {
                (Some(d), Some(e)) => {
                    writeln!(f, "{:<10} {}  ({d:.1?})  {e}", node.status.to_string(), node.id)?;
                }
                (Some(d), None) => {
                    writeln!(f, "{:<10} {}  ({d:.1?})", node.status.to_string(), node.id)?;
                }
                _ => writeln!(f, "{:<10} {}", node.status.to_string(), node.id)?,
            }
        }
        let (succeeded, failed, skipped) = self.counts();
        let elapsed = self.finished_at - self.started_at;
        write!(
            f,
            "{} nodes: {succeeded} succeeded, {failed} failed, {skipped} skipped in {}ms",
            self.nodes.len(),
            elapsed.num_milliseconds()
        )
    }
}
