//! The step dependency graph.
//!
//! [`StepGraph`] owns every [`StepNode`] for one run, keyed by identity, and
//! stores the dependency relation in both directions so the scheduler can
//! walk dependents cheaply. Node statuses are mutated only through
//! [`StepNode::advance`], which keeps transitions monotonic.
//!
//! Cycle validation runs once after construction; a cycle aborts the whole
//! build and is reported as the ordered node sequence, unlike single-step
//! resolution misses which only omit the offending step.

pub mod builder;

pub use builder::GraphBuilder;

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::plugins::PluginError;
use crate::steps::Step;
use crate::types::StepStatus;

/// Errors that abort graph construction.
#[derive(Debug, Error, Diagnostic)]
pub enum GraphError {
    /// Two declarations resolved to the same node identity.
    #[error("duplicate step identity '{id}'")]
    #[diagnostic(
        code(forgeweave::graph::duplicate_step),
        help("Give one of the declarations a distinct \"name\".")
    )]
    DuplicateStep { id: String },

    /// An explicit dependency names a node that is not in the graph.
    #[error("step '{step}' depends on unknown step '{dependency}'")]
    #[diagnostic(
        code(forgeweave::graph::unknown_dependency),
        help("Check the \"after\" list; the target may have been omitted by an earlier warning.")
    )]
    UnknownDependency { step: String, dependency: String },

    /// The dependency relation contains a cycle.
    #[error("cyclic step dependency: {}", .cycle.join(" -> "))]
    #[diagnostic(code(forgeweave::graph::cycle))]
    Cycle { cycle: Vec<String> },

    /// A step's configuration could not be resolved.
    #[error("could not materialize step '{id}'")]
    #[diagnostic(code(forgeweave::graph::materialize))]
    Materialize {
        id: String,
        #[source]
        #[diagnostic_source]
        source: PluginError,
    },
}

/// One graph node: a materialized step plus its mutable run state.
pub struct StepNode {
    id: String,
    decl_index: usize,
    step: Arc<dyn Step>,
    status: StepStatus,
    timeout: Option<Duration>,
}

impl StepNode {
    pub(crate) fn new(
        id: String,
        decl_index: usize,
        step: Arc<dyn Step>,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            id,
            decl_index,
            step,
            status: StepStatus::Pending,
            timeout,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn decl_index(&self) -> usize {
        self.decl_index
    }

    #[must_use]
    pub fn status(&self) -> StepStatus {
        self.status
    }

    #[must_use]
    pub fn step(&self) -> &Arc<dyn Step> {
        &self.step
    }

    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Advance the node's status. Terminal statuses are never overwritten,
    /// and transitions must be monotonic.
    pub(crate) fn advance(&mut self, next: StepStatus) {
        if self.status == next || self.status.is_terminal() {
            return;
        }
        debug_assert!(
            self.status.can_advance_to(next),
            "illegal status transition {} -> {} on '{}'",
            self.status,
            next,
            self.id
        );
        tracing::trace!(step = %self.id, from = %self.status, to = %next, "status");
        self.status = next;
    }
}

/// The dependency graph for one run.
#[derive(Default)]
pub struct StepGraph {
    nodes: FxHashMap<String, StepNode>,
    order: Vec<String>,
    deps: FxHashMap<String, Vec<String>>,
    dependents: FxHashMap<String, Vec<String>>,
}

impl StepGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Node identities in declaration order.
    pub fn ids_in_order(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    #[must_use]
    pub fn node(&self, id: &str) -> Option<&StepNode> {
        self.nodes.get(id)
    }

    pub(crate) fn node_mut(&mut self, id: &str) -> Option<&mut StepNode> {
        self.nodes.get_mut(id)
    }

    /// Identities this node runs after.
    #[must_use]
    pub fn dependencies_of(&self, id: &str) -> &[String] {
        self.deps.get(id).map_or(&[], Vec::as_slice)
    }

    /// Identities that run after this node.
    #[must_use]
    pub fn dependents_of(&self, id: &str) -> &[String] {
        self.dependents.get(id).map_or(&[], Vec::as_slice)
    }

    pub(crate) fn add_node(&mut self, node: StepNode) -> Result<(), GraphError> {
        if self.nodes.contains_key(node.id()) {
            return Err(GraphError::DuplicateStep {
                id: node.id().to_string(),
            });
        }
        self.order.push(node.id().to_string());
        self.nodes.insert(node.id().to_string(), node);
        Ok(())
    }

    /// Record that `step` must run after `dependency`.
    pub(crate) fn add_edge(&mut self, step: &str, dependency: &str) -> Result<(), GraphError> {
        if !self.nodes.contains_key(dependency) {
            return Err(GraphError::UnknownDependency {
                step: step.to_string(),
                dependency: dependency.to_string(),
            });
        }
        let deps = self.deps.entry(step.to_string()).or_default();
        if deps.iter().any(|d| d == dependency) {
            return Ok(());
        }
        deps.push(dependency.to_string());
        self.dependents
            .entry(dependency.to_string())
            .or_default()
            .push(step.to_string());
        tracing::debug!(step, dependency, "dependency edge");
        Ok(())
    }

    /// Depth-first cycle check over the whole graph. On failure the error
    /// carries the ordered node sequence forming the cycle.
    pub fn validate_acyclic(&self) -> Result<(), GraphError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Active,
            Done,
        }

        let mut marks: FxHashMap<&str, Mark> = FxHashMap::default();
        for start in &self.order {
            if marks.contains_key(start.as_str()) {
                continue;
            }
            let mut stack: Vec<(&str, usize)> = vec![(start.as_str(), 0)];
            let mut path: Vec<&str> = Vec::new();
            while let Some(&(id, cursor)) = stack.last() {
                if cursor == 0 {
                    marks.insert(id, Mark::Active);
                    path.push(id);
                }
                let deps = self.dependencies_of(id);
                if cursor < deps.len() {
                    if let Some(top) = stack.last_mut() {
                        top.1 += 1;
                    }
                    let dep = deps[cursor].as_str();
                    match marks.get(dep) {
                        None => stack.push((dep, 0)),
                        Some(Mark::Active) => {
                            let from = path.iter().position(|p| *p == dep).unwrap_or(0);
                            let mut cycle: Vec<String> =
                                path[from..].iter().map(|s| (*s).to_string()).collect();
                            cycle.push(dep.to_string());
                            return Err(GraphError::Cycle { cycle });
                        }
                        Some(Mark::Done) => {}
                    }
                } else {
                    marks.insert(id, Mark::Done);
                    path.pop();
                    stack.pop();
                }
            }
        }
        Ok(())
    }

    /// Human-readable dependency dump, one node per line in declaration
    /// order. This is what `--graph` prints.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        for id in &self.order {
            let deps = self.dependencies_of(id);
            if deps.is_empty() {
                let _ = writeln!(out, "{id}");
            } else {
                let _ = writeln!(out, "{id} <- [{}]", deps.join(", "));
            }
        }
        out
    }

    /// Terminal statuses per node, in declaration order.
    #[must_use]
    pub fn statuses(&self) -> Vec<(String, StepStatus)> {
        self.order
            .iter()
            .filter_map(|id| self.nodes.get(id).map(|n| (id.clone(), n.status())))
            .collect()
    }
}
