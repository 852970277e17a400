//! Plugin discovery, instantiation, and per-run caching.
//!
//! Native providers live in an explicit name → factory table built at
//! startup, so the set of available plugins is enumerable and testable with
//! no hidden global state. Script providers are located by exact filename match
//! (`<name>.lua`) anywhere under the project's plugin directory and loaded
//! through the [`ScriptHost`]. Native registrations take precedence over
//! script files with the same name.

use std::path::PathBuf;
use std::sync::Arc;

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use thiserror::Error;
use walkdir::WalkDir;

use crate::plugins::{Plugin, PluginError, ScriptPlugin, cc, exec};
use crate::project::sources::SourceSet;
use crate::script::{ScriptError, ScriptHost};
use crate::vars::{VarError, VarScope};

/// Default plugin directory, expanded through the project scope.
pub const DEFAULT_PLUGIN_DIR: &str = "${root}/.forge/plugins";

/// Everything a plugin factory or script lookup may need at resolution time.
#[derive(Clone)]
pub struct ResolveContext {
    pub project_name: String,
    pub root: PathBuf,
    pub scope: Arc<VarScope>,
    pub sources: Arc<FxHashMap<String, SourceSet>>,
    pub script_host: Arc<ScriptHost>,
}

impl ResolveContext {
    /// The directory searched for script plugins: `${plugin_dir}` when the
    /// project declares one, [`DEFAULT_PLUGIN_DIR`] otherwise.
    pub fn plugin_dir(&self) -> Result<PathBuf, VarError> {
        let template = if self.scope.contains("plugin_dir") {
            "${plugin_dir}"
        } else {
            DEFAULT_PLUGIN_DIR
        };
        Ok(PathBuf::from(self.scope.expand(template)?))
    }
}

/// Builds a native plugin instance for one project run.
pub type PluginFactory =
    Box<dyn Fn(&ResolveContext) -> Result<Arc<dyn Plugin>, PluginError> + Send + Sync>;

/// Errors from plugin registration and resolution.
#[derive(Debug, Error, Diagnostic)]
pub enum RegistryError {
    /// A native factory is already registered under this name.
    #[error("plugin '{name}' is already registered")]
    #[diagnostic(code(forgeweave::registry::duplicate_registration))]
    DuplicateRegistration { name: String },

    /// The plugin search path failed to resolve.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Var(#[from] VarError),

    /// A native factory failed to build its plugin.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Plugin(#[from] PluginError),

    /// A script module was found but could not be loaded.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Script(#[from] ScriptError),
}

/// The per-run provider registry.
///
/// Resolution results are cached by name, so every plugin is instantiated at
/// most once per run; after project construction the cache is read-only.
#[derive(Default)]
pub struct PluginRegistry {
    native: FxHashMap<String, PluginFactory>,
    cache: FxHashMap<String, Arc<dyn Plugin>>,
}

impl PluginRegistry {
    /// An empty registry with no native providers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry pre-populated with the built-in providers (`cc`, `exec`).
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry
            .native
            .insert("cc".to_string(), Box::new(cc::factory));
        registry
            .native
            .insert("exec".to_string(), Box::new(exec::factory));
        registry
    }

    /// Register a native provider factory under `name`.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        factory: PluginFactory,
    ) -> Result<(), RegistryError> {
        let name = name.into();
        if self.native.contains_key(&name) {
            return Err(RegistryError::DuplicateRegistration { name });
        }
        self.native.insert(name, factory);
        Ok(())
    }

    /// Names of all registered native providers, sorted.
    #[must_use]
    pub fn native_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.native.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Resolve a plugin by name: cache, then the native table, then a
    /// `<name>.lua` script module under the plugin directory.
    ///
    /// Returns `Ok(None)` when nothing provides the name; the caller logs a
    /// warning and continues without that plugin's steps.
    pub async fn resolve(
        &mut self,
        name: &str,
        ctx: &ResolveContext,
    ) -> Result<Option<Arc<dyn Plugin>>, RegistryError> {
        if let Some(cached) = self.cache.get(name) {
            return Ok(Some(Arc::clone(cached)));
        }

        if let Some(factory) = self.native.get(name) {
            let plugin = factory(ctx)?;
            tracing::debug!(plugin = name, "resolved native plugin");
            self.cache.insert(name.to_string(), Arc::clone(&plugin));
            return Ok(Some(plugin));
        }

        if let Some(file) = self.find_script(name, ctx)? {
            let info = ctx.script_host.load_module(name, &file).await?;
            if info.name != name {
                tracing::warn!(
                    plugin = name,
                    declared = %info.name,
                    file = %file.display(),
                    "script module declares a different name; using the resolution name"
                );
            }
            tracing::debug!(plugin = name, file = %file.display(), "resolved script plugin");
            let plugin: Arc<dyn Plugin> =
                Arc::new(ScriptPlugin::new(name, info, Arc::clone(&ctx.script_host)));
            self.cache.insert(name.to_string(), Arc::clone(&plugin));
            return Ok(Some(plugin));
        }

        Ok(None)
    }

    fn find_script(
        &self,
        name: &str,
        ctx: &ResolveContext,
    ) -> Result<Option<PathBuf>, RegistryError> {
        let dir = ctx.plugin_dir()?;
        if !dir.is_dir() {
            return Ok(None);
        }
        let wanted = format!("{name}.lua");
        for entry in WalkDir::new(&dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(Result::ok)
        {
            if entry.file_type().is_file() && entry.file_name().to_string_lossy() == wanted.as_str() {
                return Ok(Some(entry.into_path()));
            }
        }
        Ok(None)
    }
}
