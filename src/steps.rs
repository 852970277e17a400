//! Executable build steps.
//!
//! This module provides the core abstraction for materialized build steps:
//! the [`Step`] trait, the execution context handed to each step, the output
//! a step reports back, and the step-scoped error type.
//!
//! A `Step` is produced by a [`Plugin`](crate::plugins::Plugin) from a raw
//! declaration and a variable scope; by the time it exists, its configuration
//! is fully resolved. The core never interprets what a step does: it only
//! invokes it and folds the result into the build report.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use miette::Diagnostic;
use thiserror::Error;
use uuid::Uuid;

use crate::project::sources::SourceError;

/// A materialized, executable unit of the build.
///
/// Implementations must be stateless with respect to the run: everything a
/// step needs is captured at materialization time, so the scheduler can run
/// independent steps concurrently without coordination.
#[async_trait]
pub trait Step: Send + Sync {
    /// Step identities this step must run after, as declared by its provider
    /// (in addition to any `after` edges in the project file).
    fn dependencies(&self) -> &[String] {
        &[]
    }

    /// Resource classes this step consumes (e.g. source-set names). Used for
    /// declaration-order dependency inference when no explicit edge exists.
    fn consumes(&self) -> &[String] {
        &[]
    }

    /// Resource classes this step produces.
    fn produces(&self) -> &[String] {
        &[]
    }

    /// Provider-suggested execution deadline. A declaration-level
    /// `timeout_secs` takes precedence.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    /// Execute the step.
    async fn run(&self, ctx: StepContext) -> Result<StepOutput, StepError>;
}

/// Execution context passed to a step by the scheduler.
#[derive(Clone, Debug)]
pub struct StepContext {
    /// Identity of the node being executed.
    pub step_id: String,
    /// Identity of the enclosing build run.
    pub run_id: Uuid,
}

impl StepContext {
    /// Emit a step-scoped progress event into the trace stream.
    pub fn emit(&self, scope: &str, message: impl AsRef<str>) {
        tracing::info!(
            target: "forgeweave::step",
            step = %self.step_id,
            run = %self.run_id,
            scope,
            "{}",
            message.as_ref()
        );
    }
}

/// What a step reports back on success.
///
/// All fields are optional; a step that only has side effects can return
/// `StepOutput::default()`.
#[derive(Clone, Debug, Default)]
pub struct StepOutput {
    /// Paths of artifacts the step produced.
    pub artifacts: Vec<PathBuf>,
    /// Provider-specific result detail (script steps return their snapshot
    /// here).
    pub detail: Option<serde_json::Value>,
}

impl StepOutput {
    #[must_use]
    pub fn with_artifacts(mut self, artifacts: Vec<PathBuf>) -> Self {
        self.artifacts = artifacts;
        self
    }

    #[must_use]
    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = Some(detail);
        self
    }
}

/// Errors scoped to one step execution.
///
/// A `StepError` marks its node `Failed` and cascades `Skipped` to the node's
/// dependents; it never aborts independent branches.
#[derive(Debug, Error, Diagnostic)]
pub enum StepError {
    /// Filesystem or process I/O failed.
    #[error(transparent)]
    #[diagnostic(code(forgeweave::step::io))]
    Io(#[from] std::io::Error),

    /// An invoked tool exited unsuccessfully.
    #[error("command '{program}' exited with {code}")]
    #[diagnostic(
        code(forgeweave::step::command),
        help("Re-run with RUST_LOG=forgeweave=debug to see the full command line.")
    )]
    Command { program: String, code: i32 },

    /// The step's provider reported a failure.
    #[error("provider error ({provider}): {message}")]
    #[diagnostic(code(forgeweave::step::provider))]
    Provider { provider: String, message: String },

    /// Source-set expansion failed.
    #[error(transparent)]
    #[diagnostic(code(forgeweave::step::sources))]
    Sources(#[from] SourceError),

    /// The step exceeded its execution deadline.
    #[error("step timed out after {after:?}")]
    #[diagnostic(
        code(forgeweave::step::timeout),
        help("Raise or remove the step's timeout_secs in the project file.")
    )]
    Timeout { after: Duration },
}
