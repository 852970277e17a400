//! Serde model of the `project.json` schema.
//!
//! ```json
//! {
//!   "name": "erythro",
//!   "variables": { "cflags": "-O2" },
//!   "plugins": [ { "plugin": "cc", "compiler": "clang" } ],
//!   "steps": [
//!     { "task": "@cc::compile", "sources": "core" },
//!     { "task": "@cc::link", "inputs": ["build/obj/*.o"], "output": "${root}/build/erythro" }
//!   ],
//!   "files": { "core": ["${root}/src/**/*.c"] },
//!   "configurations": { "release": { "variables": { "cflags": "-O3" } } }
//! }
//! ```
//!
//! Step declarations are a tagged variant: the `task` discriminator plus an
//! opaque flattened payload only the resolved plugin interprets.

use std::collections::BTreeMap;

use serde::Deserialize;

/// Top-level parsed project file.
#[derive(Clone, Debug, Deserialize)]
pub struct ProjectConfig {
    pub name: String,
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
    #[serde(default)]
    pub plugins: Vec<PluginRef>,
    #[serde(default)]
    pub steps: Vec<StepDecl>,
    #[serde(default)]
    pub files: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub configurations: BTreeMap<String, ConfigOverlay>,
}

impl ProjectConfig {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// A plugin reference with provider-specific extras.
///
/// Extras are seeded into the root scope as `<plugin>::<key>` qualified
/// variables, so `{"plugin": "cc", "compiler": "clang"}` makes
/// `${cc::compiler}` resolvable everywhere.
#[derive(Clone, Debug, Deserialize)]
pub struct PluginRef {
    pub plugin: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// One step declaration.
#[derive(Clone, Debug, Deserialize)]
pub struct StepDecl {
    /// `@plugin::step` or a bare step name.
    pub task: String,
    /// Node identity override; defaults to the qualified task name.
    #[serde(default)]
    pub name: Option<String>,
    /// Explicit dependency identities. Suppresses order inference.
    #[serde(default)]
    pub after: Vec<String>,
    /// Step-local variable overrides, seeded into the step's sub-scope.
    #[serde(default)]
    pub vars: BTreeMap<String, String>,
    /// Optional execution deadline; expiry marks the node failed.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Everything else: the provider-interpreted payload.
    #[serde(flatten)]
    pub payload: serde_json::Map<String, serde_json::Value>,
}

impl StepDecl {
    #[must_use]
    pub fn payload_value(&self) -> serde_json::Value {
        serde_json::Value::Object(self.payload.clone())
    }
}

/// A named configuration: variables layered over the project's as a
/// shadowing child scope.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ConfigOverlay {
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_schema() {
        let config = ProjectConfig::from_json(
            r#"{
                "name": "demo",
                "variables": { "cflags": "-O2" },
                "plugins": [ { "plugin": "cc", "compiler": "clang" } ],
                "steps": [
                    { "task": "@cc::compile", "sources": "core", "timeout_secs": 30 },
                    { "task": "@cc::link", "name": "binary", "after": ["cc::compile"] }
                ],
                "files": { "core": ["src/**/*.c"] },
                "configurations": { "release": { "variables": { "cflags": "-O3" } } }
            }"#,
        )
        .unwrap();

        assert_eq!(config.name, "demo");
        assert_eq!(config.plugins[0].plugin, "cc");
        assert_eq!(
            config.plugins[0].extra.get("compiler").unwrap(),
            &serde_json::json!("clang")
        );
        assert_eq!(config.steps.len(), 2);
        assert_eq!(config.steps[0].timeout_secs, Some(30));
        assert_eq!(config.steps[0].payload_value()["sources"], "core");
        assert_eq!(config.steps[1].name.as_deref(), Some("binary"));
        assert_eq!(config.steps[1].after, vec!["cc::compile"]);
        assert!(config.configurations.contains_key("release"));
    }

    #[test]
    fn payload_excludes_reserved_fields() {
        let config = ProjectConfig::from_json(
            r#"{ "name": "p", "steps": [ { "task": "t", "after": ["x"], "custom": 1 } ] }"#,
        )
        .unwrap();
        let payload = config.steps[0].payload_value();
        assert_eq!(payload["custom"], 1);
        assert!(payload.get("task").is_none());
        assert!(payload.get("after").is_none());
    }

    #[test]
    fn missing_sections_default_to_empty() {
        let config = ProjectConfig::from_json(r#"{ "name": "bare" }"#).unwrap();
        assert!(config.variables.is_empty());
        assert!(config.plugins.is_empty());
        assert!(config.steps.is_empty());
        assert!(config.files.is_empty());
    }
}
