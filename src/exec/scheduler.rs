//! Kahn's-style topological scheduler with bounded concurrency.
//!
//! The scheduler keeps a ready set of nodes whose dependencies have all
//! succeeded and dispatches them into a [`JoinSet`] up to the concurrency
//! bound. As each task completes, its dependents' readiness is recomputed. A
//! failed node (error or timeout) immediately marks every transitive
//! dependent `Skipped` without running it; already-running tasks are never
//! interrupted, and independent branches continue normally.
//!
//! The ready set is ordered by declaration index, so a bound of 1 yields a
//! fully deterministic, declaration-ordered topological execution; that is
//! the reproducible mode the test suite leans on. With a larger bound,
//! ordering among mutually-independent nodes is unspecified.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::Instant;

use chrono::Utc;
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use thiserror::Error;
use tokio::task::{JoinError, JoinSet};
use uuid::Uuid;

use crate::exec::report::{BuildReport, NodeReport};
use crate::graph::StepGraph;
use crate::steps::{StepContext, StepError, StepOutput};
use crate::types::StepStatus;

/// Worker-pool bound for one run.
///
/// `Unbounded` dispatches every ready node immediately (parallelism is then
/// limited only by dependency availability); `Bounded(1)` is the
/// deterministic sequential mode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Concurrency {
    #[default]
    Unbounded,
    Bounded(usize),
}

impl Concurrency {
    fn limit(self) -> usize {
        match self {
            Self::Unbounded => usize::MAX,
            Self::Bounded(n) => n.max(1),
        }
    }
}

/// Errors internal to scheduling itself. Step failures are not errors here;
/// they are terminal node statuses in the report.
#[derive(Debug, Error, Diagnostic)]
pub enum SchedulerError {
    /// A worker task panicked or was cancelled.
    #[error("step task join error: {0}")]
    #[diagnostic(code(forgeweave::scheduler::join))]
    Join(#[from] JoinError),
}

pub struct Scheduler {
    concurrency: Concurrency,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl Scheduler {
    #[must_use]
    pub fn new(concurrency: Concurrency) -> Self {
        Self { concurrency }
    }

    #[must_use]
    pub fn unbounded() -> Self {
        Self::new(Concurrency::Unbounded)
    }

    /// Deterministic declaration-order execution.
    #[must_use]
    pub fn sequential() -> Self {
        Self::new(Concurrency::Bounded(1))
    }

    /// Run every node of `graph` to a terminal status.
    ///
    /// Only infrastructure failures (a panicked worker) surface as `Err`;
    /// step failures are folded into the returned [`BuildReport`].
    pub async fn run(&self, mut graph: StepGraph) -> Result<BuildReport, SchedulerError> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let limit = self.concurrency.limit();
        tracing::info!(
            run = %run_id,
            nodes = graph.len(),
            concurrency = ?self.concurrency,
            "build run started"
        );

        // Unmet-dependency counters; only successful completion decrements.
        let mut remaining: FxHashMap<String, usize> = FxHashMap::default();
        let mut ready: BinaryHeap<Reverse<(usize, String)>> = BinaryHeap::new();
        for id in graph.ids_in_order().map(str::to_string).collect::<Vec<_>>() {
            let unmet = graph.dependencies_of(&id).len();
            if unmet == 0 {
                if let Some(node) = graph.node_mut(&id) {
                    node.advance(StepStatus::Ready);
                    ready.push(Reverse((node.decl_index(), id)));
                }
            } else {
                remaining.insert(id, unmet);
            }
        }

        let mut durations: FxHashMap<String, std::time::Duration> = FxHashMap::default();
        let mut errors: FxHashMap<String, String> = FxHashMap::default();
        let mut tasks: JoinSet<(String, Result<StepOutput, StepError>, std::time::Duration)> =
            JoinSet::new();

        loop {
            while tasks.len() < limit {
                let Some(Reverse((_, id))) = ready.pop() else {
                    break;
                };
                let Some(node) = graph.node_mut(&id) else {
                    continue;
                };
                if node.status() != StepStatus::Ready {
                    continue;
                }
                node.advance(StepStatus::Running);
                let step = node.step().clone();
                let deadline = node.timeout();
                let ctx = StepContext {
                    step_id: id.clone(),
                    run_id,
                };
                tracing::debug!(step = %id, "dispatching");
                tasks.spawn(async move {
                    let started = Instant::now();
                    let result = match deadline {
                        Some(after) => match tokio::time::timeout(after, step.run(ctx)).await {
                            Ok(inner) => inner,
                            Err(_) => Err(StepError::Timeout { after }),
                        },
                        None => step.run(ctx).await,
                    };
                    (id, result, started.elapsed())
                });
            }

            let Some(joined) = tasks.join_next().await else {
                break;
            };
            let (id, result, elapsed) = joined?;
            durations.insert(id.clone(), elapsed);

            match result {
                Ok(output) => {
                    if let Some(node) = graph.node_mut(&id) {
                        node.advance(StepStatus::Succeeded);
                    }
                    tracing::info!(
                        step = %id,
                        elapsed_ms = elapsed.as_millis() as u64,
                        artifacts = output.artifacts.len(),
                        "step succeeded"
                    );
                    for dependent in graph.dependents_of(&id).to_vec() {
                        let now_ready = match remaining.get_mut(&dependent) {
                            Some(unmet) => {
                                *unmet = unmet.saturating_sub(1);
                                *unmet == 0
                            }
                            None => false,
                        };
                        if now_ready
                            && let Some(node) = graph.node_mut(&dependent)
                            && node.status() == StepStatus::Pending
                        {
                            node.advance(StepStatus::Ready);
                            ready.push(Reverse((node.decl_index(), dependent)));
                        }
                    }
                }
                Err(error) => {
                    tracing::warn!(step = %id, error = %error, "step failed");
                    errors.insert(id.clone(), error.to_string());
                    if let Some(node) = graph.node_mut(&id) {
                        node.advance(StepStatus::Failed);
                    }
                    cascade_skip(&mut graph, &id);
                }
            }
        }

        let finished_at = Utc::now();
        let nodes = graph
            .statuses()
            .into_iter()
            .map(|(id, status)| NodeReport {
                duration: durations.get(&id).copied(),
                error: errors.remove(&id),
                id,
                status,
            })
            .collect::<Vec<_>>();

        let report = BuildReport {
            run_id,
            started_at,
            finished_at,
            nodes,
        };
        let (succeeded, failed, skipped) = report.counts();
        tracing::info!(
            run = %run_id,
            succeeded,
            failed,
            skipped,
            success = report.success(),
            "build run finished"
        );
        Ok(report)
    }
}

/// Mark every transitive dependent of `from` as `Skipped`. Terminal nodes
/// are left untouched, which also bounds the walk.
fn cascade_skip(graph: &mut StepGraph, from: &str) {
    let mut stack: Vec<String> = graph.dependents_of(from).to_vec();
    while let Some(id) = stack.pop() {
        let Some(node) = graph.node_mut(&id) else {
            continue;
        };
        if node.status().is_terminal() {
            continue;
        }
        node.advance(StepStatus::Skipped);
        tracing::info!(step = %id, cause = %from, "step skipped");
        stack.extend(graph.dependents_of(&id).iter().cloned());
    }
}
