//! Built-in process runner.
//!
//! `exec::run` invokes one external command. Payload: `{"command": program,
//! "args": [...], "cwd": dir, "consumes": [...], "produces": [...]}`, all
//! strings template-expanded. The optional `consumes`/`produces` lists feed
//! the graph builder's dependency inference, which makes this the
//! general-purpose glue step for pipelines no dedicated plugin covers.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;

use crate::plugins::registry::ResolveContext;
use crate::plugins::{Plugin, PluginError};
use crate::steps::{Step, StepContext, StepError, StepOutput};
use crate::vars::VarScope;

pub fn factory(ctx: &ResolveContext) -> Result<Arc<dyn Plugin>, PluginError> {
    Ok(Arc::new(ExecPlugin {
        root: ctx.root.clone(),
    }))
}

pub struct ExecPlugin {
    root: PathBuf,
}

impl Plugin for ExecPlugin {
    fn name(&self) -> &str {
        "exec"
    }

    fn step(
        &self,
        step: &str,
        payload: &serde_json::Value,
        scope: &Arc<VarScope>,
    ) -> Result<Option<Box<dyn Step>>, PluginError> {
        if step != "run" {
            return Ok(None);
        }
        let command = payload
            .get("command")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| PluginError::InvalidConfig {
                plugin: "exec".into(),
                step: step.into(),
                reason: "'command' is required".into(),
            })?;
        let command = scope.expand(command)?;
        let args = expand_list(payload, "args", scope)?;
        let cwd = match payload.get("cwd").and_then(serde_json::Value::as_str) {
            Some(dir) => PathBuf::from(scope.expand(dir)?),
            None => self.root.clone(),
        };
        Ok(Some(Box::new(ExecStep {
            command,
            args,
            cwd,
            consumes: expand_list(payload, "consumes", scope)?,
            produces: expand_list(payload, "produces", scope)?,
        })))
    }
}

fn expand_list(
    payload: &serde_json::Value,
    key: &str,
    scope: &VarScope,
) -> Result<Vec<String>, PluginError> {
    let Some(serde_json::Value::Array(items)) = payload.get(key) else {
        return Ok(Vec::new());
    };
    items
        .iter()
        .filter_map(serde_json::Value::as_str)
        .map(|s| scope.expand(s).map_err(PluginError::from))
        .collect()
}

struct ExecStep {
    command: String,
    args: Vec<String>,
    cwd: PathBuf,
    consumes: Vec<String>,
    produces: Vec<String>,
}

#[async_trait]
impl Step for ExecStep {
    fn consumes(&self) -> &[String] {
        &self.consumes
    }

    fn produces(&self) -> &[String] {
        &self.produces
    }

    async fn run(&self, ctx: StepContext) -> Result<StepOutput, StepError> {
        ctx.emit("exec", format!("{} {}", self.command, self.args.join(" ")));
        let status = Command::new(&self.command)
            .args(&self.args)
            .current_dir(&self.cwd)
            .status()
            .await?;
        if !status.success() {
            return Err(StepError::Command {
                program: self.command.clone(),
                code: status.code().unwrap_or(-1),
            });
        }
        Ok(StepOutput::default())
    }
}
