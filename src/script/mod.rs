//! Embedded Lua host for script-backed step providers.
//!
//! Script plugins are ordinary Lua modules that evaluate to a descriptor
//! table:
//!
//! ```lua
//! return {
//!   name = "mk",
//!   steps = {
//!     compile = {
//!       consumes = { "sources" },
//!       produces = { "objects" },
//!       run = function(payload)
//!         log("compiling " .. payload.out)
//!         return { ok = true }
//!       end,
//!     },
//!   },
//! }
//! ```
//!
//! The host snapshots the descriptor (name, step table, dependency/resource
//! declarations) into plain [`ScriptModuleInfo`] values at load time and pins
//! each `run` function in the Lua registry. Step payloads cross the boundary
//! as one-way `serde_json::Value` snapshots in both directions; no live
//! object identity is ever shared with a script.
//!
//! The Lua state lives on a dedicated OS thread (the *lane*). Jobs arrive
//! over a flume channel and answer over a oneshot, which serializes every
//! script execution even while native steps run in parallel elsewhere; the
//! scripting runtime is not assumed thread-safe.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use miette::Diagnostic;
use mlua::{Function, Lua, LuaSerdeExt, RegistryKey, Table, Value as LuaValue, Variadic};
use rustc_hash::FxHashMap;
use thiserror::Error;
use tokio::sync::oneshot;

/// Read-only project facts exposed to scripts as the `forge` global.
#[derive(Clone, Debug)]
pub struct HostInfo {
    pub project_name: String,
    pub root: PathBuf,
}

/// Snapshot of one step entry in a script module's descriptor table.
#[derive(Clone, Debug)]
pub struct ScriptStepInfo {
    pub name: String,
    pub deps: Vec<String>,
    pub consumes: Vec<String>,
    pub produces: Vec<String>,
}

/// Snapshot of a loaded script module: its declared name and step table.
///
/// This is everything the core ever reads from a script outside of step
/// execution.
#[derive(Clone, Debug)]
pub struct ScriptModuleInfo {
    pub name: String,
    pub steps: Vec<ScriptStepInfo>,
}

impl ScriptModuleInfo {
    #[must_use]
    pub fn step(&self, name: &str) -> Option<&ScriptStepInfo> {
        self.steps.iter().find(|s| s.name == name)
    }
}

/// Errors from script loading and execution.
#[derive(Debug, Error, Diagnostic)]
pub enum ScriptError {
    /// The lane thread could not be started or has shut down.
    #[error("script lane unavailable: {message}")]
    #[diagnostic(code(forgeweave::script::lane))]
    Lane { message: String },

    /// A module file could not be read or evaluated.
    #[error("failed to load script module {}: {message}", .file.display())]
    #[diagnostic(code(forgeweave::script::load))]
    Load { file: PathBuf, message: String },

    /// The module evaluated, but its descriptor does not satisfy the
    /// provider contract.
    #[error("invalid script module {}: {reason}", .file.display())]
    #[diagnostic(
        code(forgeweave::script::descriptor),
        help("A script plugin must return a table with a string 'name' and a 'steps' table whose entries expose a 'run' function.")
    )]
    BadDescriptor { file: PathBuf, reason: String },

    /// A step was requested that the loaded module never declared.
    #[error("script plugin '{plugin}' has no step '{step}'")]
    #[diagnostic(code(forgeweave::script::unknown_step))]
    UnknownStep { plugin: String, step: String },

    /// The step's `run` function raised an error.
    #[error("script step {plugin}::{step} failed: {message}")]
    #[diagnostic(code(forgeweave::script::eval))]
    Eval {
        plugin: String,
        step: String,
        message: String,
    },
}

impl ScriptError {
    fn lane_closed() -> Self {
        Self::Lane {
            message: "lane thread has exited".into(),
        }
    }
}

enum LaneJob {
    Load {
        name: String,
        file: PathBuf,
        reply: oneshot::Sender<Result<ScriptModuleInfo, ScriptError>>,
    },
    Run {
        plugin: String,
        step: String,
        payload: serde_json::Value,
        reply: oneshot::Sender<Result<serde_json::Value, ScriptError>>,
    },
}

/// Handle to the script lane. Cheap to clone behind an [`Arc`]; dropping the
/// last handle shuts the lane down.
pub struct ScriptHost {
    jobs: flume::Sender<LaneJob>,
}

impl ScriptHost {
    /// Start the lane thread and register the host globals (`log`, `exec`,
    /// `forge`).
    pub fn spawn(info: HostInfo) -> Result<Arc<Self>, ScriptError> {
        let (jobs, queue) = flume::unbounded();
        let (ready_tx, ready_rx) = flume::bounded(1);
        thread::Builder::new()
            .name("forgeweave-script-lane".into())
            .spawn(move || lane_main(&info, &queue, &ready_tx))
            .map_err(|e| ScriptError::Lane {
                message: e.to_string(),
            })?;
        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Arc::new(Self { jobs })),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(ScriptError::lane_closed()),
        }
    }

    /// Evaluate a module file and snapshot its descriptor.
    ///
    /// `name` is the resolution name the registry asked for; execution jobs
    /// are keyed by it, not by whatever the module declares.
    pub async fn load_module(
        &self,
        name: &str,
        file: &Path,
    ) -> Result<ScriptModuleInfo, ScriptError> {
        let (reply, response) = oneshot::channel();
        self.jobs
            .send_async(LaneJob::Load {
                name: name.to_string(),
                file: file.to_path_buf(),
                reply,
            })
            .await
            .map_err(|_| ScriptError::lane_closed())?;
        response.await.map_err(|_| ScriptError::lane_closed())?
    }

    /// Invoke a pinned `run` function with a payload snapshot and marshal its
    /// return value back as a new snapshot.
    pub async fn run_step(
        &self,
        plugin: &str,
        step: &str,
        payload: serde_json::Value,
    ) -> Result<serde_json::Value, ScriptError> {
        let (reply, response) = oneshot::channel();
        self.jobs
            .send_async(LaneJob::Run {
                plugin: plugin.to_string(),
                step: step.to_string(),
                payload,
                reply,
            })
            .await
            .map_err(|_| ScriptError::lane_closed())?;
        response.await.map_err(|_| ScriptError::lane_closed())?
    }
}

// ============================================================================
// Lane thread
// ============================================================================

fn lane_main(
    info: &HostInfo,
    queue: &flume::Receiver<LaneJob>,
    ready: &flume::Sender<Result<(), ScriptError>>,
) {
    let lua = Lua::new();
    let setup = register_globals(&lua, info).map_err(|e| ScriptError::Lane {
        message: e.to_string(),
    });
    let ok = setup.is_ok();
    let _ = ready.send(setup);
    if !ok {
        return;
    }

    let mut handlers: FxHashMap<(String, String), RegistryKey> = FxHashMap::default();
    while let Ok(job) = queue.recv() {
        match job {
            LaneJob::Load { name, file, reply } => {
                let _ = reply.send(load_on_lane(&lua, &mut handlers, &name, &file));
            }
            LaneJob::Run {
                plugin,
                step,
                payload,
                reply,
            } => {
                let _ = reply.send(run_on_lane(&lua, &handlers, &plugin, &step, &payload));
            }
        }
    }
    tracing::debug!("script lane shut down");
}

fn register_globals(lua: &Lua, info: &HostInfo) -> mlua::Result<()> {
    let globals = lua.globals();

    let log = lua.create_function(|_, message: String| {
        tracing::info!(target: "forgeweave::script", "{message}");
        Ok(())
    })?;
    globals.set("log", log)?;

    // Blocking on the lane thread is the serialization point for script
    // work; the async runtime is never blocked by this.
    let exec = lua.create_function(|lua, (program, args): (String, Variadic<String>)| {
        tracing::debug!(target: "forgeweave::script", program = %program, ?args, "exec");
        let output = std::process::Command::new(&program)
            .args(args.iter())
            .output()
            .map_err(mlua::Error::external)?;
        let result = lua.create_table()?;
        result.set("status", output.status.code().unwrap_or(-1))?;
        result.set("stdout", String::from_utf8_lossy(&output.stdout).into_owned())?;
        result.set("stderr", String::from_utf8_lossy(&output.stderr).into_owned())?;
        Ok(result)
    })?;
    globals.set("exec", exec)?;

    let forge = lua.create_table()?;
    forge.set("project", info.project_name.as_str())?;
    forge.set("root", info.root.display().to_string())?;
    forge.set("version", env!("CARGO_PKG_VERSION"))?;
    globals.set("forge", forge)?;

    tracing::debug!(project = %info.project_name, "script lane ready");
    Ok(())
}

fn load_on_lane(
    lua: &Lua,
    handlers: &mut FxHashMap<(String, String), RegistryKey>,
    name: &str,
    file: &Path,
) -> Result<ScriptModuleInfo, ScriptError> {
    let source = std::fs::read_to_string(file).map_err(|e| ScriptError::Load {
        file: file.to_path_buf(),
        message: e.to_string(),
    })?;
    let module: Table = lua
        .load(&source)
        .set_name(file.to_string_lossy())
        .eval()
        .map_err(|e| ScriptError::Load {
            file: file.to_path_buf(),
            message: e.to_string(),
        })?;

    let bad = |reason: String| ScriptError::BadDescriptor {
        file: file.to_path_buf(),
        reason,
    };

    let declared: String = module
        .get("name")
        .map_err(|_| bad("module must expose a string 'name'".into()))?;
    let steps_table: Table = module
        .get("steps")
        .map_err(|_| bad("module must expose a 'steps' table".into()))?;

    let mut steps = Vec::new();
    for pair in steps_table.pairs::<String, Table>() {
        let (step_name, descriptor) =
            pair.map_err(|e| bad(format!("invalid steps entry: {e}")))?;
        let run: Function = descriptor
            .get("run")
            .map_err(|_| bad(format!("step '{step_name}' must expose a 'run' function")))?;
        let key = lua
            .create_registry_value(run)
            .map_err(|e| bad(format!("could not pin step '{step_name}': {e}")))?;
        handlers.insert((name.to_string(), step_name.clone()), key);
        steps.push(ScriptStepInfo {
            deps: string_list(&descriptor, "deps", &bad)?,
            consumes: string_list(&descriptor, "consumes", &bad)?,
            produces: string_list(&descriptor, "produces", &bad)?,
            name: step_name,
        });
    }
    // Lua table iteration order is unspecified; keep the snapshot stable.
    steps.sort_by(|a, b| a.name.cmp(&b.name));

    tracing::debug!(
        plugin = name,
        declared = %declared,
        steps = steps.len(),
        "loaded script module"
    );
    Ok(ScriptModuleInfo {
        name: declared,
        steps,
    })
}

fn string_list(
    descriptor: &Table,
    key: &str,
    bad: &impl Fn(String) -> ScriptError,
) -> Result<Vec<String>, ScriptError> {
    descriptor
        .get::<Option<Vec<String>>>(key)
        .map(Option::unwrap_or_default)
        .map_err(|e| bad(format!("'{key}' must be a list of strings: {e}")))
}

fn run_on_lane(
    lua: &Lua,
    handlers: &FxHashMap<(String, String), RegistryKey>,
    plugin: &str,
    step: &str,
    payload: &serde_json::Value,
) -> Result<serde_json::Value, ScriptError> {
    let key = handlers
        .get(&(plugin.to_string(), step.to_string()))
        .ok_or_else(|| ScriptError::UnknownStep {
            plugin: plugin.to_string(),
            step: step.to_string(),
        })?;
    let eval_err = |message: String| ScriptError::Eval {
        plugin: plugin.to_string(),
        step: step.to_string(),
        message,
    };

    let run: Function = lua
        .registry_value(key)
        .map_err(|e| eval_err(e.to_string()))?;
    let arg = lua.to_value(payload).map_err(|e| eval_err(e.to_string()))?;
    let ret: LuaValue = run.call(arg).map_err(|e| eval_err(e.to_string()))?;
    match ret {
        LuaValue::Nil => Ok(serde_json::Value::Null),
        other => lua.from_value(other).map_err(|e| eval_err(e.to_string())),
    }
}
