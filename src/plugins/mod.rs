//! Step providers (plugins) and their registry.
//!
//! A plugin is a named capability that materializes executable
//! [`Step`](crate::steps::Step)s from raw declarations. Two very different
//! execution models satisfy the same [`Plugin`] contract:
//!
//! - **native** providers, compiled in and registered with the
//!   [`PluginRegistry`] through an explicit factory table, and
//! - **script** providers, Lua modules discovered under the project's plugin
//!   directory and wrapped as [`ScriptPlugin`].
//!
//! The graph builder and the scheduler only ever see `Arc<dyn Plugin>` and
//! `Box<dyn Step>`; which technology executes a step is invisible past this
//! seam.

pub mod cc;
pub mod exec;
pub mod registry;
pub mod script;

pub use registry::{PluginRegistry, RegistryError, ResolveContext};
pub use script::ScriptPlugin;

use std::sync::Arc;

use miette::Diagnostic;
use thiserror::Error;

use crate::steps::Step;
use crate::vars::{VarError, VarScope};

/// The capability contract every step provider satisfies.
pub trait Plugin: Send + Sync {
    /// The provider's name, as used in `@name::step` references.
    fn name(&self) -> &str;

    /// Materialize the named step from its raw payload and variable scope.
    ///
    /// Returns `Ok(None)` when this plugin does not provide `step`, a
    /// recoverable miss the caller logs and skips. `Err` means the step
    /// exists but its configuration could not be resolved, which aborts the
    /// build.
    fn step(
        &self,
        step: &str,
        payload: &serde_json::Value,
        scope: &Arc<VarScope>,
    ) -> Result<Option<Box<dyn Step>>, PluginError>;
}

/// Errors from step materialization.
#[derive(Debug, Error, Diagnostic)]
pub enum PluginError {
    /// A `${key}` in the step's configuration failed to resolve.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Var(#[from] VarError),

    /// The payload does not satisfy the step's schema.
    #[error("invalid config for step {plugin}::{step}: {reason}")]
    #[diagnostic(code(forgeweave::plugins::invalid_config))]
    InvalidConfig {
        plugin: String,
        step: String,
        reason: String,
    },
}
