//! Builds the step graph from a project's declarations.
//!
//! Each declaration is processed in order: the task reference is parsed, the
//! owning plugin resolved, and the step materialized with its own child
//! scope. A declaration whose provider cannot be found, or whose provider
//! does not know the step, is omitted with a warning; the build goes on
//! without it. Configuration-resolution failures and structural problems
//! (duplicate identities, unknown dependency targets, cycles) abort the
//! whole build.
//!
//! Dependency edges come from three places, in precedence order:
//!
//! 1. the declaration's `after` list,
//! 2. identities the materialized step itself declares,
//! 3. when neither exists: an inferred edge to the nearest preceding step
//!    whose produced resource classes intersect this step's consumed ones.

use std::sync::Arc;
use std::time::Duration;

use crate::graph::{GraphError, StepGraph, StepNode};
use crate::plugins::Plugin;
use crate::project::Project;
use crate::steps::Step;
use crate::types::TaskRef;

pub struct GraphBuilder<'p> {
    project: &'p Project,
}

impl<'p> GraphBuilder<'p> {
    #[must_use]
    pub fn new(project: &'p Project) -> Self {
        Self { project }
    }

    pub fn build(&self) -> Result<StepGraph, GraphError> {
        let mut graph = StepGraph::new();
        // (id, explicit dependency ids); empty list means "infer".
        let mut edges: Vec<(String, Vec<String>)> = Vec::new();

        for (index, decl) in self.project.steps().iter().enumerate() {
            let Some(task) = TaskRef::parse(&decl.task) else {
                tracing::warn!(task = %decl.task, "unparseable task reference; step omitted");
                continue;
            };
            let id = decl.name.clone().unwrap_or_else(|| task.default_id());

            let Some(step) = self.materialize(&task, decl, &id)? else {
                continue;
            };

            let mut explicit: Vec<String> = decl.after.clone();
            explicit.extend(step.dependencies().iter().cloned());
            let timeout = decl
                .timeout_secs
                .map(Duration::from_secs)
                .or_else(|| step.timeout());

            edges.push((id.clone(), explicit));
            graph.add_node(StepNode::new(id, index, Arc::from(step), timeout))?;
        }

        for (id, explicit) in &edges {
            for dependency in explicit {
                graph.add_edge(id, dependency)?;
            }
        }

        self.infer_edges(&mut graph, &edges)?;

        graph.validate_acyclic()?;
        tracing::info!(nodes = graph.len(), "step graph built");
        Ok(graph)
    }

    /// Resolve the provider and materialize the step, with the step's own
    /// sub-scope. `Ok(None)` means the step was omitted with a warning.
    fn materialize(
        &self,
        task: &TaskRef,
        decl: &crate::project::StepDecl,
        id: &str,
    ) -> Result<Option<Box<dyn Step>>, GraphError> {
        let mut scope = self.project.scope().child();
        for (key, value) in &decl.vars {
            scope
                .add(key.as_str(), value.clone())
                .map_err(|e| GraphError::Materialize {
                    id: id.to_string(),
                    source: e.into(),
                })?;
        }
        let scope = scope.freeze();
        let payload = decl.payload_value();

        let materialize_err = |e| GraphError::Materialize {
            id: id.to_string(),
            source: e,
        };

        let step = match &task.plugin {
            Some(plugin_name) => match self.project.plugin(plugin_name) {
                Some(plugin) => plugin
                    .step(&task.step, &payload, &scope)
                    .map_err(materialize_err)?,
                None => {
                    tracing::warn!(
                        step = id,
                        plugin = %plugin_name,
                        "plugin is not loaded; step omitted"
                    );
                    return Ok(None);
                }
            },
            // Bare names probe every declared plugin in order.
            None => {
                let mut found = None;
                for plugin in self.project.plugins() {
                    if let Some(step) = plugin
                        .step(&task.step, &payload, &scope)
                        .map_err(materialize_err)?
                    {
                        tracing::debug!(step = id, plugin = %plugin.name(), "bare task matched");
                        found = Some(step);
                        break;
                    }
                }
                found
            }
        };

        if step.is_none() {
            tracing::warn!(step = id, task = %decl.task, "no provider produces this step; omitted");
        }
        Ok(step)
    }

    /// Order-based inference for nodes with no explicit dependencies: link
    /// each consumed resource class to its nearest preceding producer.
    fn infer_edges(
        &self,
        graph: &mut StepGraph,
        edges: &[(String, Vec<String>)],
    ) -> Result<(), GraphError> {
        for (position, (id, explicit)) in edges.iter().enumerate() {
            if !explicit.is_empty() {
                continue;
            }
            let consumes = match graph.node(id) {
                Some(node) => node.step().consumes().to_vec(),
                None => continue,
            };
            for class in &consumes {
                let producer = edges[..position].iter().rev().find_map(|(earlier, _)| {
                    let node = graph.node(earlier)?;
                    node.step()
                        .produces()
                        .iter()
                        .any(|p| p == class)
                        .then(|| earlier.clone())
                });
                if let Some(producer) = producer {
                    tracing::debug!(step = %id, dependency = %producer, class = %class, "inferred edge");
                    graph.add_edge(id, &producer)?;
                }
            }
        }
        Ok(())
    }
}
