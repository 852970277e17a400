//! Core identity and status types for the build graph.
//!
//! - [`TaskRef`]: a parsed step declaration target (`@plugin::step` or a bare
//!   step name).
//! - [`StepStatus`]: the per-node execution state machine. Transitions are
//!   monotonic; a node never reverts to an earlier status.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A parsed `task` reference from a step declaration.
///
/// `@cc::compile` targets the `compile` step of the `cc` plugin; a bare name
/// like `package` is matched against every declared plugin in order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaskRef {
    /// Explicit plugin name, when the reference is qualified.
    pub plugin: Option<String>,
    /// Step name within the plugin.
    pub step: String,
}

impl TaskRef {
    /// Parse a declaration target. Returns `None` for references that cannot
    /// name a step (empty, or qualified with a missing part).
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        if let Some(qualified) = raw.strip_prefix('@') {
            let (plugin, step) = qualified.split_once("::")?;
            if plugin.is_empty() || step.is_empty() {
                return None;
            }
            Some(Self {
                plugin: Some(plugin.to_string()),
                step: step.to_string(),
            })
        } else if raw.is_empty() {
            None
        } else {
            Some(Self {
                plugin: None,
                step: raw.to_string(),
            })
        }
    }

    /// The default node identity for this reference: `plugin::step` for a
    /// qualified target, the bare step name otherwise.
    #[must_use]
    pub fn default_id(&self) -> String {
        match &self.plugin {
            Some(plugin) => format!("{plugin}::{}", self.step),
            None => self.step.clone(),
        }
    }
}

impl fmt::Display for TaskRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.plugin {
            Some(plugin) => write!(f, "@{plugin}::{}", self.step),
            None => write!(f, "{}", self.step),
        }
    }
}

/// Execution state of one graph node.
///
/// `Pending → Ready → Running → {Succeeded | Failed}`; a node with a failed
/// or skipped ancestor goes straight to `Skipped` without running.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepStatus {
    /// Waiting on at least one dependency.
    Pending,
    /// All dependencies succeeded; eligible for dispatch.
    Ready,
    /// Currently executing.
    Running,
    /// Ran to completion.
    Succeeded,
    /// Ran and returned an error, or timed out.
    Failed,
    /// Never ran because an ancestor failed or was skipped.
    Skipped,
}

impl StepStatus {
    /// Terminal statuses are never overwritten.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
    }

    /// Whether `next` is a legal monotonic transition from `self`.
    #[must_use]
    pub fn can_advance_to(self, next: Self) -> bool {
        use StepStatus::*;
        matches!(
            (self, next),
            (Pending, Ready)
                | (Pending, Skipped)
                | (Ready, Running)
                | (Ready, Skipped)
                | (Running, Succeeded)
                | (Running, Failed)
        )
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        write!(f, "{label}")
    }
}
