//! End-to-end: project file → plugins (native + script) → graph → scheduler.

mod common;

use common::{log_entries, register_recording, run_log, spawn_host};
use forgeweave::exec::{Concurrency, Scheduler};
use forgeweave::graph::GraphBuilder;
use forgeweave::plugins::PluginRegistry;
use forgeweave::project::{Project, ProjectConfig};
use forgeweave::types::StepStatus;

#[tokio::test]
async fn mixed_native_and_script_pipeline_builds_and_runs() {
    let log = run_log();
    let mut registry = PluginRegistry::new();
    register_recording(&mut registry, "t", &log);

    let dir = tempfile::tempdir().unwrap();
    let plugin_dir = dir.path().join(".forge/plugins");
    std::fs::create_dir_all(&plugin_dir).unwrap();
    std::fs::write(
        plugin_dir.join("mk.lua"),
        r#"
        return {
          name = "mk",
          steps = {
            stamp = {
              produces = { "stamps" },
              run = function(payload)
                return { stamped = payload.label }
              end,
            },
          },
        }
        "#,
    )
    .unwrap();

    let config = ProjectConfig::from_json(
        r#"{
            "name": "mixed",
            "variables": { "label": "v1" },
            "plugins": [ { "plugin": "t" }, { "plugin": "mk" } ],
            "steps": [
                { "task": "@t::prepare", "produces": ["sources"] },
                { "task": "@mk::stamp", "label": "${label}", "after": ["t::prepare"] },
                { "task": "@t::package", "after": ["mk::stamp"] }
            ]
        }"#,
    )
    .unwrap();
    let host = spawn_host(dir.path());
    let project = Project::from_config(
        config,
        dir.path().to_path_buf(),
        &mut registry,
        &host,
        None,
    )
    .await
    .unwrap();
    assert_eq!(project.plugins().len(), 2);

    let graph = GraphBuilder::new(&project).build().unwrap();
    assert_eq!(graph.len(), 3);
    assert_eq!(
        graph.dependencies_of("mk::stamp"),
        ["t::prepare".to_string()]
    );

    let report = Scheduler::unbounded().run(graph).await.unwrap();
    assert!(report.success());
    for node in &report.nodes {
        assert_eq!(node.status, StepStatus::Succeeded);
    }

    // Native steps ran around the serialized script lane.
    let ran = log_entries(&log);
    assert_eq!(ran, ["t::prepare", "t::package"]);
}

#[tokio::test]
async fn script_steps_run_while_native_steps_hold_the_worker_pool() {
    let log = run_log();
    let mut registry = PluginRegistry::new();
    register_recording(&mut registry, "t", &log);

    let dir = tempfile::tempdir().unwrap();
    let plugin_dir = dir.path().join(".forge/plugins");
    std::fs::create_dir_all(&plugin_dir).unwrap();
    std::fs::write(
        plugin_dir.join("mk.lua"),
        r#"
        return {
          name = "mk",
          steps = {
            stamp = { run = function(payload) return { ok = true } end },
          },
        }
        "#,
    )
    .unwrap();

    // Two long-running native steps fill a bound of 2; the independent
    // script step still completes on its own lane.
    let config = ProjectConfig::from_json(
        r#"{
            "name": "saturated",
            "plugins": [ { "plugin": "t" }, { "plugin": "mk" } ],
            "steps": [
                { "task": "@t::slow-a", "delay_ms": 100 },
                { "task": "@t::slow-b", "delay_ms": 100 },
                { "task": "@mk::stamp" }
            ]
        }"#,
    )
    .unwrap();
    let host = spawn_host(dir.path());
    let project = Project::from_config(
        config,
        dir.path().to_path_buf(),
        &mut registry,
        &host,
        None,
    )
    .await
    .unwrap();

    let graph = GraphBuilder::new(&project).build().unwrap();
    let report = Scheduler::new(Concurrency::Bounded(2)).run(graph).await.unwrap();

    assert!(report.success());
    assert_eq!(
        report.node("mk::stamp").unwrap().status,
        StepStatus::Succeeded
    );
}
