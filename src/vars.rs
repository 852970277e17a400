//! Hierarchical variable scopes with `${key}` template expansion.
//!
//! Every project run owns a root [`VarScope`] seeded from the project config.
//! Plugins and steps get child scopes so they can add locally-scoped
//! variables (shadowing is legal) without affecting siblings. Scopes are
//! plain values while being seeded and are frozen by wrapping them in an
//! [`Arc`] before any child or worker sees them, so concurrent reads need no
//! locking.
//!
//! Template tokens use the syntax `${key}` where `key` matches
//! `[a-z0-9_\-:]+` and `::` separates namespaces (e.g. `${cc::flags}`).
//! Expansion is recursive: a value that itself contains tokens is expanded
//! before being spliced in, and a key that reappears in its own expansion
//! chain is reported as a cycle instead of looping forever.

use std::fmt;
use std::sync::{Arc, OnceLock};

use miette::Diagnostic;
use regex::Regex;
use rustc_hash::FxHashMap;
use thiserror::Error;

// ============================================================================
// Keys
// ============================================================================

/// A normalized variable key.
///
/// Keys are case-sensitive and namespace-qualified with `::`. Normalization
/// strips template delimiter markup, so `VarKey::new("${root}")` and
/// `VarKey::new("root")` compare equal.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarKey(String);

impl VarKey {
    pub fn new(raw: &str) -> Self {
        Self(raw.replace("${", "").replace('}', ""))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VarKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for VarKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Errors raised by scope construction and template expansion.
#[derive(Debug, Error, Diagnostic)]
pub enum VarError {
    /// The key already exists in this scope (shadowing a parent is legal,
    /// re-declaring within one scope is not).
    #[error("variable '{key}' is already declared in this scope")]
    #[diagnostic(
        code(forgeweave::vars::duplicate_key),
        help("Rename the variable, or declare the override in a child scope.")
    )]
    DuplicateKey { key: VarKey },

    /// No scope in the chain holds the key.
    #[error("unknown variable '{key}'")]
    #[diagnostic(
        code(forgeweave::vars::unknown_variable),
        help("Declare it under \"variables\" in the project file or in a step's \"vars\".")
    )]
    UnknownVariable { key: VarKey },

    /// A key reappeared in its own expansion chain.
    #[error("cyclic variable reference: {cycle}")]
    #[diagnostic(code(forgeweave::vars::cyclic_reference))]
    CyclicReference { cycle: String },
}

// ============================================================================
// Scope
// ============================================================================

fn token_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\{([a-z0-9_\-:]+)\}").unwrap())
}

/// One link in a scope chain: an insertion-ordered key/value table plus an
/// optional shared, read-only parent.
#[derive(Debug, Default)]
pub struct VarScope {
    parent: Option<Arc<VarScope>>,
    entries: FxHashMap<VarKey, String>,
    order: Vec<VarKey>,
}

impl VarScope {
    /// Create an empty root scope.
    #[must_use]
    pub fn root() -> Self {
        Self::default()
    }

    /// Create a scope whose lookups fall back to `self`.
    ///
    /// The child starts empty; freeze it with [`VarScope::freeze`] once
    /// seeding is done.
    #[must_use]
    pub fn child(self: &Arc<Self>) -> VarScope {
        VarScope {
            parent: Some(Arc::clone(self)),
            entries: FxHashMap::default(),
            order: Vec::new(),
        }
    }

    /// Freeze the scope for sharing. After this point it is read-only.
    #[must_use]
    pub fn freeze(self) -> Arc<VarScope> {
        Arc::new(self)
    }

    /// Declare a variable in this scope.
    ///
    /// Fails with [`VarError::DuplicateKey`] if the key is already present
    /// here; parents are not consulted, so shadowing is legal.
    pub fn add(&mut self, key: impl Into<VarKey>, value: impl Into<String>) -> Result<(), VarError> {
        let key = key.into();
        if self.entries.contains_key(&key) {
            return Err(VarError::DuplicateKey { key });
        }
        let value = value.into();
        tracing::debug!(key = %key, value = %value, "declared variable");
        self.order.push(key.clone());
        self.entries.insert(key, value);
        Ok(())
    }

    /// Look up a key in this scope, then up the parent chain.
    pub fn get(&self, key: impl Into<VarKey>) -> Result<&str, VarError> {
        let key = key.into();
        self.get_key(&key)
            .ok_or(VarError::UnknownVariable { key })
    }

    fn get_key(&self, key: &VarKey) -> Option<&str> {
        match self.entries.get(key) {
            Some(v) => Some(v.as_str()),
            None => self.parent.as_deref().and_then(|p| p.get_key(key)),
        }
    }

    /// Whether the key resolves anywhere in the chain.
    #[must_use]
    pub fn contains(&self, key: impl Into<VarKey>) -> bool {
        self.get_key(&key.into()).is_some()
    }

    /// Keys declared in this scope, in insertion order (parents excluded).
    pub fn local_keys(&self) -> impl Iterator<Item = &VarKey> {
        self.order.iter()
    }

    /// Expand every `${key}` token in `text`, recursively.
    ///
    /// The result contains no tokens, so expansion is idempotent on its own
    /// output. A key that reappears in its own expansion chain fails with
    /// [`VarError::CyclicReference`] naming the ordered cycle.
    pub fn expand(&self, text: &str) -> Result<String, VarError> {
        self.expand_inner(text, &mut Vec::new())
    }

    fn expand_inner(&self, text: &str, chain: &mut Vec<VarKey>) -> Result<String, VarError> {
        let re = token_regex();
        let mut out = String::with_capacity(text.len());
        let mut last = 0;
        for caps in re.captures_iter(text) {
            // Capture group 0 always exists when the regex matches.
            let m = caps.get(0).unwrap();
            let key = VarKey::new(&caps[1]);

            if let Some(first) = chain.iter().position(|k| *k == key) {
                let mut names: Vec<&str> = chain[first..].iter().map(VarKey::as_str).collect();
                names.push(key.as_str());
                return Err(VarError::CyclicReference {
                    cycle: names.join(" -> "),
                });
            }

            let value = self
                .get_key(&key)
                .ok_or_else(|| VarError::UnknownVariable { key: key.clone() })?
                .to_owned();

            chain.push(key);
            let expanded = self.expand_inner(&value, chain)?;
            chain.pop();

            out.push_str(&text[last..m.start()]);
            out.push_str(&expanded);
            last = m.end();
        }
        out.push_str(&text[last..]);
        Ok(out)
    }
}

/// Expand every string inside a JSON value through `scope`, depth-first.
///
/// Step payloads are opaque structured values; this is the one pass the core
/// applies before handing a payload to its plugin.
pub fn expand_json(
    scope: &VarScope,
    value: &serde_json::Value,
) -> Result<serde_json::Value, VarError> {
    use serde_json::Value;
    Ok(match value {
        Value::String(s) => Value::String(scope.expand(s)?),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| expand_json(scope, v))
                .collect::<Result<_, _>>()?,
        ),
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), expand_json(scope, v)?);
            }
            Value::Object(out)
        }
        other => other.clone(),
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn scope_with(pairs: &[(&str, &str)]) -> VarScope {
        let mut scope = VarScope::root();
        for (k, v) in pairs {
            scope.add(*k, *v).unwrap();
        }
        scope
    }

    #[test]
    fn add_then_get_round_trips() {
        let scope = scope_with(&[("greeting", "hello")]);
        assert_eq!(scope.get("greeting").unwrap(), "hello");
    }

    #[test]
    fn duplicate_in_same_scope_fails() {
        let mut scope = scope_with(&[("k", "1")]);
        let err = scope.add("k", "2").unwrap_err();
        assert!(matches!(err, VarError::DuplicateKey { ref key } if key.as_str() == "k"));
    }

    #[test]
    fn local_keys_preserve_insertion_order() {
        let scope = scope_with(&[("b", "1"), ("a", "2"), ("c", "3")]);
        let keys: Vec<&str> = scope.local_keys().map(VarKey::as_str).collect();
        assert_eq!(keys, ["b", "a", "c"]);
    }

    #[test]
    fn keys_are_normalized() {
        let scope = scope_with(&[("${root}", "/tmp/project")]);
        assert_eq!(scope.get("root").unwrap(), "/tmp/project");
    }

    #[test]
    fn child_falls_back_to_parent() {
        let parent = scope_with(&[("shared", "from-parent")]).freeze();
        let child = parent.child();
        assert_eq!(child.get("shared").unwrap(), "from-parent");
    }

    #[test]
    fn child_shadows_parent() {
        let parent = scope_with(&[("k", "base")]).freeze();
        let mut child = parent.child();
        child.add("k", "override").unwrap();
        assert_eq!(child.get("k").unwrap(), "override");
        assert_eq!(parent.get("k").unwrap(), "base");
    }

    #[test]
    fn unknown_variable_errors() {
        let parent = scope_with(&[]).freeze();
        let child = parent.child();
        let err = child.get("missing").unwrap_err();
        assert!(matches!(err, VarError::UnknownVariable { ref key } if key.as_str() == "missing"));
    }

    #[test]
    fn expand_substitutes_tokens() {
        let scope = scope_with(&[("name", "forge"), ("dir", "/opt")]);
        assert_eq!(
            scope.expand("${dir}/bin/${name}").unwrap(),
            "/opt/bin/forge"
        );
    }

    #[test]
    fn expand_is_recursive() {
        let scope = scope_with(&[("a", "${b}"), ("b", "2")]);
        assert_eq!(scope.expand("${a}").unwrap(), "2");
    }

    #[test]
    fn expand_qualified_keys() {
        let scope = scope_with(&[("cc::flags", "-O2")]);
        assert_eq!(scope.expand("cc ${cc::flags}").unwrap(), "cc -O2");
    }

    #[test]
    fn self_reference_is_a_cycle_not_a_hang() {
        let scope = scope_with(&[("a", "${a}")]);
        let err = scope.expand("${a}").unwrap_err();
        assert!(matches!(err, VarError::CyclicReference { ref cycle } if cycle == "a -> a"));
    }

    #[test]
    fn two_step_cycle_reports_ordered_chain() {
        let scope = scope_with(&[("a", "x${b}"), ("b", "${a}y")]);
        let err = scope.expand("${a}").unwrap_err();
        assert!(matches!(err, VarError::CyclicReference { ref cycle } if cycle == "a -> b -> a"));
    }

    #[test]
    fn expand_is_idempotent_on_resolved_output() {
        let scope = scope_with(&[("a", "${b}"), ("b", "done")]);
        let once = scope.expand("${a} and ${b}").unwrap();
        let twice = scope.expand(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn expand_json_walks_nested_values() {
        let scope = scope_with(&[("root", "/srv")]);
        let payload = serde_json::json!({
            "src": ["${root}/a.c", "${root}/b.c"],
            "nested": { "out": "${root}/build" },
            "count": 2,
        });
        let expanded = expand_json(&scope, &payload).unwrap();
        assert_eq!(expanded["src"][0], "/srv/a.c");
        assert_eq!(expanded["nested"]["out"], "/srv/build");
        assert_eq!(expanded["count"], 2);
    }

    proptest! {
        #[test]
        fn token_free_text_expands_to_itself(text in "[A-Za-z0-9 /._-]*") {
            let scope = scope_with(&[]);
            prop_assert_eq!(scope.expand(&text).unwrap(), text);
        }
    }
}
