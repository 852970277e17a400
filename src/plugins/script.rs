//! Script-backed step provider.
//!
//! Wraps a loaded Lua module's descriptor snapshot behind the [`Plugin`]
//! contract. Materialization only consults the snapshot; execution is a job
//! on the serialized script lane.

use std::sync::Arc;

use async_trait::async_trait;

use crate::plugins::{Plugin, PluginError};
use crate::script::{ScriptHost, ScriptModuleInfo};
use crate::steps::{Step, StepContext, StepError, StepOutput};
use crate::vars::{VarScope, expand_json};

pub struct ScriptPlugin {
    name: String,
    info: ScriptModuleInfo,
    host: Arc<ScriptHost>,
}

impl ScriptPlugin {
    pub(crate) fn new(name: &str, info: ScriptModuleInfo, host: Arc<ScriptHost>) -> Self {
        Self {
            name: name.to_string(),
            info,
            host,
        }
    }
}

impl Plugin for ScriptPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn step(
        &self,
        step: &str,
        payload: &serde_json::Value,
        scope: &Arc<VarScope>,
    ) -> Result<Option<Box<dyn Step>>, PluginError> {
        let Some(descriptor) = self.info.step(step) else {
            return Ok(None);
        };
        // Resolve the payload now; the script receives a finished snapshot.
        let payload = expand_json(scope, payload)?;
        Ok(Some(Box::new(ScriptStep {
            plugin: self.name.clone(),
            step: step.to_string(),
            payload,
            deps: descriptor.deps.clone(),
            consumes: descriptor.consumes.clone(),
            produces: descriptor.produces.clone(),
            host: Arc::clone(&self.host),
        })))
    }
}

struct ScriptStep {
    plugin: String,
    step: String,
    payload: serde_json::Value,
    deps: Vec<String>,
    consumes: Vec<String>,
    produces: Vec<String>,
    host: Arc<ScriptHost>,
}

#[async_trait]
impl Step for ScriptStep {
    fn dependencies(&self) -> &[String] {
        &self.deps
    }

    fn consumes(&self) -> &[String] {
        &self.consumes
    }

    fn produces(&self) -> &[String] {
        &self.produces
    }

    async fn run(&self, ctx: StepContext) -> Result<StepOutput, StepError> {
        ctx.emit("script", format!("running {}::{}", self.plugin, self.step));
        let detail = self
            .host
            .run_step(&self.plugin, &self.step, self.payload.clone())
            .await
            .map_err(|e| StepError::Provider {
                provider: format!("script:{}", self.plugin),
                message: e.to_string(),
            })?;
        Ok(match detail {
            serde_json::Value::Null => StepOutput::default(),
            other => StepOutput::default().with_detail(other),
        })
    }
}
