//! # Forgeweave: Graph-driven Build Orchestration
//!
//! Forgeweave turns a declarative project description (variables, source
//! sets, plugin references, build tasks) into a dependency graph of
//! executable steps and runs it concurrently with partial-failure semantics.
//!
//! ## Core Concepts
//!
//! - **Variable scopes**: hierarchical `${key}` template resolution with
//!   shadowing and cycle detection
//! - **Plugins**: one capability contract over native and Lua-scripted step
//!   providers
//! - **Steps**: materialized, async units of work opaque to the core
//! - **Graph**: declaration-derived DAG with explicit and inferred edges
//! - **Scheduler**: bounded-concurrency topological execution with
//!   failure-cascade skipping
//!
//! ## Quick Start
//!
//! ```
//! use forgeweave::vars::VarScope;
//!
//! let mut scope = VarScope::root();
//! scope.add("root", "/srv/demo").unwrap();
//! scope.add("out", "${root}/build").unwrap();
//!
//! let scope = scope.freeze();
//! assert_eq!(scope.expand("-o ${out}/app").unwrap(), "-o /srv/demo/build/app");
//!
//! // Steps and plugins get their own child scopes; parents stay immutable.
//! let mut step_scope = scope.child();
//! step_scope.add("out", "/tmp/override").unwrap();
//! assert_eq!(step_scope.expand("${out}").unwrap(), "/tmp/override");
//! assert_eq!(scope.expand("${out}").unwrap(), "/srv/demo/build");
//! ```
//!
//! ## Module Guide
//!
//! - [`vars`] - Variable scopes and template expansion
//! - [`types`] - Task references and the node status machine
//! - [`steps`] - The executable step contract
//! - [`plugins`] - Step providers: registry, native built-ins, script wrapper
//! - [`script`] - The embedded Lua host and its serialized lane
//! - [`project`] - Config schema and the validated project model
//! - [`graph`] - Step graph construction and validation
//! - [`exec`] - Topological scheduling and build reports

pub mod exec;
pub mod graph;
pub mod plugins;
pub mod project;
pub mod script;
pub mod steps;
pub mod types;
pub mod vars;
