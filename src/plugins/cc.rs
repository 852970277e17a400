//! Built-in C compiler wrapper.
//!
//! Provides two steps:
//!
//! - `cc::compile` compiles every file of the referenced source sets into
//!   object files. Payload: `{"sources": "core" | ["core", ...], "output":
//!   dir, "compiler": "cc", "flags": [...]}`.
//! - `cc::link` links object files into a binary. Payload: `{"inputs":
//!   [globs], "output": path, "compiler": "cc", "flags": [...]}`.
//!
//! `compile` consumes the named source sets and produces the `objects`
//! resource class; `link` consumes `objects` and produces `artifacts`, which
//! is what lets the graph builder infer the compile → link edge when no
//! explicit dependency is declared.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use tokio::process::Command;

use crate::plugins::registry::ResolveContext;
use crate::plugins::{Plugin, PluginError};
use crate::project::sources::{ResolvedSourceSet, SourceSet};
use crate::steps::{Step, StepContext, StepError, StepOutput};
use crate::vars::VarScope;

const OBJECTS: &str = "objects";
const ARTIFACTS: &str = "artifacts";

pub fn factory(ctx: &ResolveContext) -> Result<Arc<dyn Plugin>, PluginError> {
    Ok(Arc::new(CcPlugin {
        root: ctx.root.clone(),
        sources: Arc::clone(&ctx.sources),
    }))
}

pub struct CcPlugin {
    root: PathBuf,
    sources: Arc<FxHashMap<String, SourceSet>>,
}

impl CcPlugin {
    fn invalid(&self, step: &str, reason: impl Into<String>) -> PluginError {
        PluginError::InvalidConfig {
            plugin: "cc".into(),
            step: step.into(),
            reason: reason.into(),
        }
    }
}

impl Plugin for CcPlugin {
    fn name(&self) -> &str {
        "cc"
    }

    fn step(
        &self,
        step: &str,
        payload: &serde_json::Value,
        scope: &Arc<VarScope>,
    ) -> Result<Option<Box<dyn Step>>, PluginError> {
        match step {
            "compile" => {
                let set_names = string_list(payload, "sources")
                    .ok_or_else(|| self.invalid(step, "'sources' must name source sets"))?;
                let mut sets = Vec::with_capacity(set_names.len());
                for name in &set_names {
                    let set = self
                        .sources
                        .get(name)
                        .ok_or_else(|| self.invalid(step, format!("unknown source set '{name}'")))?;
                    sets.push(set.resolve(scope)?);
                }
                let output = match string_field(payload, "output") {
                    Some(dir) => PathBuf::from(scope.expand(&dir)?),
                    None => self.root.join("build/obj"),
                };
                Ok(Some(Box::new(CompileStep {
                    root: self.root.clone(),
                    sets,
                    consumes: set_names,
                    output,
                    compiler: compiler_of(payload, scope)?,
                    flags: flags_of(payload, scope)?,
                    produces: vec![OBJECTS.to_string()],
                })))
            }
            "link" => {
                let inputs = string_list(payload, "inputs")
                    .ok_or_else(|| self.invalid(step, "'inputs' must list object globs"))?
                    .iter()
                    .map(|p| scope.expand(p))
                    .collect::<Result<Vec<_>, _>>()?;
                let output = string_field(payload, "output")
                    .ok_or_else(|| self.invalid(step, "'output' is required"))?;
                Ok(Some(Box::new(LinkStep {
                    root: self.root.clone(),
                    inputs: ResolvedSourceSet {
                        name: OBJECTS.into(),
                        patterns: inputs,
                    },
                    output: PathBuf::from(scope.expand(&output)?),
                    compiler: compiler_of(payload, scope)?,
                    flags: flags_of(payload, scope)?,
                    consumes: vec![OBJECTS.to_string()],
                    produces: vec![ARTIFACTS.to_string()],
                })))
            }
            _ => Ok(None),
        }
    }
}

fn string_field(payload: &serde_json::Value, key: &str) -> Option<String> {
    payload.get(key)?.as_str().map(str::to_string)
}

/// Accepts `"name"` or `["a", "b"]`.
fn string_list(payload: &serde_json::Value, key: &str) -> Option<Vec<String>> {
    match payload.get(key)? {
        serde_json::Value::String(s) => Some(vec![s.clone()]),
        serde_json::Value::Array(items) => items
            .iter()
            .map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => None,
    }
}

fn compiler_of(payload: &serde_json::Value, scope: &VarScope) -> Result<String, PluginError> {
    match string_field(payload, "compiler") {
        Some(c) => Ok(scope.expand(&c)?),
        None => Ok("cc".to_string()),
    }
}

fn flags_of(payload: &serde_json::Value, scope: &VarScope) -> Result<Vec<String>, PluginError> {
    string_list(payload, "flags")
        .unwrap_or_default()
        .iter()
        .map(|f| scope.expand(f).map_err(PluginError::from))
        .collect()
}

struct CompileStep {
    root: PathBuf,
    sets: Vec<ResolvedSourceSet>,
    consumes: Vec<String>,
    produces: Vec<String>,
    output: PathBuf,
    compiler: String,
    flags: Vec<String>,
}

#[async_trait]
impl Step for CompileStep {
    fn consumes(&self) -> &[String] {
        &self.consumes
    }

    fn produces(&self) -> &[String] {
        &self.produces
    }

    async fn run(&self, ctx: StepContext) -> Result<StepOutput, StepError> {
        tokio::fs::create_dir_all(&self.output).await?;
        let mut objects = Vec::new();
        for set in &self.sets {
            for file in set.files(&self.root)? {
                let stem = file
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "out".to_string());
                let object = self.output.join(format!("{stem}.o"));
                ctx.emit("cc", format!("compiling {}", file.display()));
                let status = Command::new(&self.compiler)
                    .args(&self.flags)
                    .arg("-c")
                    .arg(&file)
                    .arg("-o")
                    .arg(&object)
                    .status()
                    .await?;
                if !status.success() {
                    return Err(StepError::Command {
                        program: self.compiler.clone(),
                        code: status.code().unwrap_or(-1),
                    });
                }
                objects.push(object);
            }
        }
        Ok(StepOutput::default().with_artifacts(objects))
    }
}

struct LinkStep {
    root: PathBuf,
    inputs: ResolvedSourceSet,
    consumes: Vec<String>,
    produces: Vec<String>,
    output: PathBuf,
    compiler: String,
    flags: Vec<String>,
}

#[async_trait]
impl Step for LinkStep {
    fn consumes(&self) -> &[String] {
        &self.consumes
    }

    fn produces(&self) -> &[String] {
        &self.produces
    }

    async fn run(&self, ctx: StepContext) -> Result<StepOutput, StepError> {
        let objects = self.inputs.files(&self.root)?;
        if let Some(parent) = self.output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        ctx.emit(
            "cc",
            format!("linking {} objects into {}", objects.len(), self.output.display()),
        );
        let status = Command::new(&self.compiler)
            .args(&objects)
            .arg("-o")
            .arg(&self.output)
            .args(&self.flags)
            .status()
            .await?;
        if !status.success() {
            return Err(StepError::Command {
                program: self.compiler.clone(),
                code: status.code().unwrap_or(-1),
            });
        }
        Ok(StepOutput::default().with_artifacts(vec![self.output.clone()]))
    }
}
