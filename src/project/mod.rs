//! Validated project model.
//!
//! [`Project`] assembles a parsed [`ProjectConfig`] into the structures the
//! graph builder consumes: the frozen root variable scope (with the reserved
//! `root` key, declared variables, plugin-reference extras, and the optional
//! configuration overlay), the ordered list of resolved plugins, the
//! declaration-ordered steps, and the parsed source sets.
//!
//! Plugin references that resolve to nothing are skipped with a warning;
//! their steps are simply absent. Everything else that fails here is fatal:
//! nothing has executed yet, so aborting is cheap and loses no work.

pub mod config;
pub mod sources;

pub use config::{ConfigOverlay, PluginRef, ProjectConfig, StepDecl};
pub use sources::{ResolvedSourceSet, SourceError, SourceSet};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::plugins::{Plugin, PluginRegistry, ResolveContext, RegistryError};
use crate::script::{HostInfo, ScriptError, ScriptHost};
use crate::vars::{VarError, VarScope};

/// Errors from project loading and assembly.
#[derive(Debug, Error, Diagnostic)]
pub enum ProjectError {
    /// The project file could not be read.
    #[error("could not read project file {}", .path.display())]
    #[diagnostic(code(forgeweave::project::io))]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The project file is not valid JSON for the schema.
    #[error("could not parse project file {}: {source}", .path.display())]
    #[diagnostic(code(forgeweave::project::parse))]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Variable seeding failed (reserved or duplicate key).
    #[error(transparent)]
    #[diagnostic(transparent)]
    Var(#[from] VarError),

    /// Plugin resolution failed fatally (broken script module, factory
    /// error).
    #[error(transparent)]
    #[diagnostic(transparent)]
    Registry(#[from] RegistryError),

    /// The script host could not be started.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Script(#[from] ScriptError),

    /// `--conf` named a configuration the project does not declare.
    #[error("unknown configuration '{name}'")]
    #[diagnostic(
        code(forgeweave::project::unknown_configuration),
        help("Declare it under \"configurations\" in the project file.")
    )]
    UnknownConfiguration { name: String },
}

/// A loaded, validated project, ready for graph construction.
pub struct Project {
    name: String,
    root: PathBuf,
    scope: Arc<VarScope>,
    plugins: Vec<Arc<dyn Plugin>>,
    steps: Vec<StepDecl>,
    sources: Arc<FxHashMap<String, SourceSet>>,
}

impl Project {
    /// Load a project from a file on disk. The file's directory becomes the
    /// project root; a script host is spawned for the run.
    pub async fn from_file(
        path: &Path,
        registry: &mut PluginRegistry,
        conf: Option<&str>,
    ) -> Result<Self, ProjectError> {
        let text = std::fs::read_to_string(path).map_err(|source| ProjectError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = ProjectConfig::from_json(&text).map_err(|source| ProjectError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        let root = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let host = ScriptHost::spawn(HostInfo {
            project_name: config.name.clone(),
            root: root.clone(),
        })?;
        Self::from_config(config, root, registry, &host, conf).await
    }

    /// Assemble a project from an already-parsed config.
    pub async fn from_config(
        config: ProjectConfig,
        root: PathBuf,
        registry: &mut PluginRegistry,
        host: &Arc<ScriptHost>,
        conf: Option<&str>,
    ) -> Result<Self, ProjectError> {
        tracing::info!(project = %config.name, root = %root.display(), "loading project");

        let mut base = VarScope::root();
        base.add("root", root.display().to_string())?;
        for (key, value) in &config.variables {
            base.add(key.as_str(), value.clone())?;
        }
        for plugin_ref in &config.plugins {
            for (key, value) in &plugin_ref.extra {
                base.add(
                    format!("{}::{}", plugin_ref.plugin, key).as_str(),
                    var_value(value),
                )?;
            }
        }
        let base = base.freeze();

        let scope = match conf {
            Some(name) => {
                let overlay = config.configurations.get(name).ok_or_else(|| {
                    ProjectError::UnknownConfiguration {
                        name: name.to_string(),
                    }
                })?;
                let mut child = base.child();
                for (key, value) in &overlay.variables {
                    child.add(key.as_str(), value.clone())?;
                }
                tracing::debug!(configuration = name, "applied configuration overlay");
                child.freeze()
            }
            None => base,
        };

        let sources: FxHashMap<String, SourceSet> = config
            .files
            .iter()
            .map(|(name, patterns)| {
                (
                    name.clone(),
                    SourceSet {
                        name: name.clone(),
                        patterns: patterns.clone(),
                    },
                )
            })
            .collect();
        let sources = Arc::new(sources);

        let ctx = ResolveContext {
            project_name: config.name.clone(),
            root: root.clone(),
            scope: Arc::clone(&scope),
            sources: Arc::clone(&sources),
            script_host: Arc::clone(host),
        };

        let mut plugins: Vec<Arc<dyn Plugin>> = Vec::with_capacity(config.plugins.len());
        for plugin_ref in &config.plugins {
            match registry.resolve(&plugin_ref.plugin, &ctx).await? {
                Some(plugin) => plugins.push(plugin),
                None => tracing::warn!(
                    plugin = %plugin_ref.plugin,
                    "could not resolve plugin; its steps will be unavailable"
                ),
            }
        }

        Ok(Self {
            name: config.name,
            root,
            scope,
            plugins,
            steps: config.steps,
            sources,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The project's effective variable scope (overlay applied).
    #[must_use]
    pub fn scope(&self) -> &Arc<VarScope> {
        &self.scope
    }

    /// Resolved plugins, in declaration order.
    #[must_use]
    pub fn plugins(&self) -> &[Arc<dyn Plugin>] {
        &self.plugins
    }

    #[must_use]
    pub fn plugin(&self, name: &str) -> Option<&Arc<dyn Plugin>> {
        self.plugins.iter().find(|p| p.name() == name)
    }

    /// Step declarations, in declaration order.
    #[must_use]
    pub fn steps(&self) -> &[StepDecl] {
        &self.steps
    }

    /// Find a step declaration by its qualified task reference, or by its
    /// assigned `name` when the declaration overrides identity.
    #[must_use]
    pub fn step_decl(&self, task: &str) -> Option<&StepDecl> {
        self.steps
            .iter()
            .find(|s| s.name.as_deref() == Some(task) || s.task == task)
    }

    #[must_use]
    pub fn source_set(&self, name: &str) -> Option<&SourceSet> {
        self.sources.get(name)
    }
}

fn var_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
