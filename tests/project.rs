mod common;

use common::{project_from_json, register_recording, run_log, spawn_host};
use forgeweave::plugins::PluginRegistry;
use forgeweave::project::{Project, ProjectConfig, ProjectError};
use forgeweave::vars::VarError;

#[tokio::test]
async fn root_variable_is_seeded_from_the_project_directory() {
    let mut registry = PluginRegistry::new();
    let (project, dir) = project_from_json(r#"{ "name": "demo" }"#, &mut registry, None).await;

    assert_eq!(project.name(), "demo");
    assert_eq!(
        project.scope().get("root").unwrap(),
        dir.path().display().to_string()
    );
}

#[tokio::test]
async fn plugin_reference_extras_become_qualified_variables() {
    let log = run_log();
    let mut registry = PluginRegistry::new();
    register_recording(&mut registry, "cc", &log);

    let (project, _dir) = project_from_json(
        r#"{
            "name": "demo",
            "plugins": [ { "plugin": "cc", "compiler": "clang", "opt": 2 } ]
        }"#,
        &mut registry,
        None,
    )
    .await;

    assert_eq!(project.scope().expand("${cc::compiler}").unwrap(), "clang");
    assert_eq!(project.scope().expand("${cc::opt}").unwrap(), "2");
}

#[tokio::test]
async fn unresolved_plugin_is_skipped_with_the_build_continuing() {
    let log = run_log();
    let mut registry = PluginRegistry::new();
    register_recording(&mut registry, "t", &log);

    let (project, _dir) = project_from_json(
        r#"{
            "name": "demo",
            "plugins": [ { "plugin": "ghost" }, { "plugin": "t" } ]
        }"#,
        &mut registry,
        None,
    )
    .await;

    assert_eq!(project.plugins().len(), 1);
    assert!(project.plugin("t").is_some());
    assert!(project.plugin("ghost").is_none());
}

#[tokio::test]
async fn step_declarations_are_found_by_task_or_assigned_name() {
    let log = run_log();
    let mut registry = PluginRegistry::new();
    register_recording(&mut registry, "t", &log);

    let (project, _dir) = project_from_json(
        r#"{
            "name": "demo",
            "plugins": [ { "plugin": "t" } ],
            "steps": [
                { "task": "@t::compile" },
                { "task": "@t::compile", "name": "compile-tests" }
            ]
        }"#,
        &mut registry,
        None,
    )
    .await;

    assert!(project.step_decl("@t::compile").is_some());
    assert_eq!(
        project.step_decl("compile-tests").unwrap().name.as_deref(),
        Some("compile-tests")
    );
    assert!(project.step_decl("@t::link").is_none());
}

#[tokio::test]
async fn redeclaring_the_reserved_root_variable_is_fatal() {
    let mut registry = PluginRegistry::new();
    let dir = tempfile::tempdir().unwrap();
    let config = ProjectConfig::from_json(
        r#"{ "name": "demo", "variables": { "root": "/elsewhere" } }"#,
    )
    .unwrap();
    let host = spawn_host(dir.path());

    let err = Project::from_config(config, dir.path().to_path_buf(), &mut registry, &host, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ProjectError::Var(VarError::DuplicateKey { ref key }) if key.as_str() == "root"
    ));
}

#[tokio::test]
async fn configuration_overlay_shadows_without_mutating_the_base() {
    let mut registry = PluginRegistry::new();
    let json = r#"{
        "name": "demo",
        "variables": { "cflags": "-O0" },
        "configurations": { "release": { "variables": { "cflags": "-O3" } } }
    }"#;

    let (debug, _d1) = project_from_json(json, &mut registry, None).await;
    assert_eq!(debug.scope().expand("${cflags}").unwrap(), "-O0");

    let (release, _d2) = project_from_json(json, &mut registry, Some("release")).await;
    assert_eq!(release.scope().expand("${cflags}").unwrap(), "-O3");
    // Project-wide variables still resolve through the overlay.
    assert!(release.scope().contains("root"));
}

#[tokio::test]
async fn unknown_configuration_name_is_fatal() {
    let mut registry = PluginRegistry::new();
    let dir = tempfile::tempdir().unwrap();
    let config = ProjectConfig::from_json(r#"{ "name": "demo" }"#).unwrap();
    let host = spawn_host(dir.path());

    let err = Project::from_config(
        config,
        dir.path().to_path_buf(),
        &mut registry,
        &host,
        Some("release"),
    )
    .await
    .unwrap_err();
    assert!(matches!(
        err,
        ProjectError::UnknownConfiguration { ref name } if name == "release"
    ));
}

#[tokio::test]
async fn from_file_uses_the_file_directory_as_root() {
    let mut registry = PluginRegistry::new();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("project.json");
    std::fs::write(&path, r#"{ "name": "ondisk", "files": { "core": ["src/*.c"] } }"#).unwrap();

    let project = Project::from_file(&path, &mut registry, None).await.unwrap();
    assert_eq!(project.name(), "ondisk");
    assert_eq!(project.root(), dir.path());
    assert!(project.source_set("core").is_some());
}

#[tokio::test]
async fn malformed_project_file_is_a_parse_error() {
    let mut registry = PluginRegistry::new();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("project.json");
    std::fs::write(&path, "{ not json").unwrap();

    let err = Project::from_file(&path, &mut registry, None).await.unwrap_err();
    assert!(matches!(err, ProjectError::Parse { .. }));
}
