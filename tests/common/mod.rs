//! Shared fixtures for the integration suite.
#![allow(dead_code)]

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use tempfile::TempDir;

use forgeweave::plugins::{Plugin, PluginError, PluginRegistry, ResolveContext};
use forgeweave::project::{Project, ProjectConfig, SourceSet};
use forgeweave::script::{HostInfo, ScriptHost};
use forgeweave::steps::{Step, StepContext, StepError, StepOutput};
use forgeweave::vars::VarScope;

/// Shared execution log: every [`RecordingStep`] pushes its label when run.
pub type RunLog = Arc<Mutex<Vec<String>>>;

pub fn run_log() -> RunLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn log_entries(log: &RunLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

/// A provider that materializes any requested step and records executions.
///
/// Step behavior is driven by the declaration payload:
/// - `"step_deps": [ids]`: provider-declared dependencies
/// - `"consumes"/"produces": [classes]`: resource classes for inference
/// - `"delay_ms": n`: sleep before completing
/// - `"fail": true`: return an error after logging
/// - `"timeout_ms": n`: provider-suggested deadline
///
/// Step names starting with `undefined` are reported as not provided.
pub struct RecordingPlugin {
    name: String,
    log: RunLog,
}

impl RecordingPlugin {
    pub fn new(name: impl Into<String>, log: RunLog) -> Self {
        Self {
            name: name.into(),
            log,
        }
    }
}

impl Plugin for RecordingPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn step(
        &self,
        step: &str,
        payload: &serde_json::Value,
        scope: &Arc<VarScope>,
    ) -> Result<Option<Box<dyn Step>>, PluginError> {
        if step.starts_with("undefined") {
            return Ok(None);
        }
        let echo = match payload.get("echo").and_then(serde_json::Value::as_str) {
            Some(template) => Some(scope.expand(template)?),
            None => None,
        };
        Ok(Some(Box::new(RecordingStep {
            label: format!("{}::{step}", self.name),
            log: self.log.clone(),
            fail: payload.get("fail").and_then(serde_json::Value::as_bool) == Some(true),
            delay: payload
                .get("delay_ms")
                .and_then(serde_json::Value::as_u64)
                .map(Duration::from_millis),
            timeout: payload
                .get("timeout_ms")
                .and_then(serde_json::Value::as_u64)
                .map(Duration::from_millis),
            deps: string_list(payload, "step_deps"),
            consumes: string_list(payload, "consumes"),
            produces: string_list(payload, "produces"),
            echo,
        })))
    }
}

fn string_list(payload: &serde_json::Value, key: &str) -> Vec<String> {
    payload
        .get(key)
        .and_then(serde_json::Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

pub struct RecordingStep {
    label: String,
    log: RunLog,
    fail: bool,
    delay: Option<Duration>,
    timeout: Option<Duration>,
    deps: Vec<String>,
    consumes: Vec<String>,
    produces: Vec<String>,
    echo: Option<String>,
}

#[async_trait]
impl Step for RecordingStep {
    fn dependencies(&self) -> &[String] {
        &self.deps
    }

    fn consumes(&self) -> &[String] {
        &self.consumes
    }

    fn produces(&self) -> &[String] {
        &self.produces
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    async fn run(&self, _ctx: StepContext) -> Result<StepOutput, StepError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.log.lock().unwrap().push(self.label.clone());
        if self.fail {
            return Err(StepError::Provider {
                provider: "recording".into(),
                message: "forced failure".into(),
            });
        }
        let output = StepOutput::default();
        Ok(match &self.echo {
            Some(echo) => output.with_detail(serde_json::json!({ "echo": echo })),
            None => output,
        })
    }
}

/// Register a [`RecordingPlugin`] factory under `name`.
pub fn register_recording(registry: &mut PluginRegistry, name: &str, log: &RunLog) {
    let plugin_name = name.to_string();
    let log = log.clone();
    registry
        .register(
            name,
            Box::new(move |_ctx| {
                Ok(Arc::new(RecordingPlugin::new(plugin_name.clone(), log.clone()))
                    as Arc<dyn Plugin>)
            }),
        )
        .unwrap();
}

pub fn spawn_host(root: &Path) -> Arc<ScriptHost> {
    ScriptHost::spawn(HostInfo {
        project_name: "test".into(),
        root: root.to_path_buf(),
    })
    .unwrap()
}

/// A resolve context over an empty project rooted in `root`.
pub fn resolve_ctx(root: &Path) -> ResolveContext {
    let mut scope = VarScope::root();
    scope.add("root", root.display().to_string()).unwrap();
    ResolveContext {
        project_name: "test".into(),
        root: root.to_path_buf(),
        scope: scope.freeze(),
        sources: Arc::new(FxHashMap::<String, SourceSet>::default()),
        script_host: spawn_host(root),
    }
}

/// Load a project from inline JSON with a fresh temp dir as the root.
pub async fn project_from_json(
    json: &str,
    registry: &mut PluginRegistry,
    conf: Option<&str>,
) -> (Project, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let config = ProjectConfig::from_json(json).unwrap();
    let host = spawn_host(dir.path());
    let project = Project::from_config(
        config,
        dir.path().to_path_buf(),
        registry,
        &host,
        conf,
    )
    .await
    .unwrap();
    (project, dir)
}
