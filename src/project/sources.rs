//! Named source sets with glob-pattern file expansion.
//!
//! The `files` table of the project config maps a set name to a list of glob
//! patterns. Patterns are template strings (`${root}/src/**/*.c`); a leading
//! `-` marks an exclusion. Expansion against the filesystem is deferred until
//! a step actually runs.

use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};
use miette::Diagnostic;
use thiserror::Error;
use walkdir::WalkDir;

use crate::vars::{VarError, VarScope};

/// Errors from source-set resolution and expansion.
#[derive(Debug, Error, Diagnostic)]
pub enum SourceError {
    /// A `${key}` in a pattern failed to resolve.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Var(#[from] VarError),

    /// A pattern is not a valid glob.
    #[error("invalid glob pattern '{pattern}' in source set '{set}'")]
    #[diagnostic(code(forgeweave::sources::pattern))]
    Pattern {
        set: String,
        pattern: String,
        #[source]
        source: globset::Error,
    },
}

/// A declared source set: a name and its raw patterns.
#[derive(Clone, Debug)]
pub struct SourceSet {
    pub name: String,
    pub patterns: Vec<String>,
}

impl SourceSet {
    /// Expand every pattern through `scope`, producing a set ready for
    /// filesystem matching.
    pub fn resolve(&self, scope: &VarScope) -> Result<ResolvedSourceSet, VarError> {
        let patterns = self
            .patterns
            .iter()
            .map(|p| scope.expand(p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ResolvedSourceSet {
            name: self.name.clone(),
            patterns,
        })
    }
}

/// A source set whose patterns are fully template-expanded.
#[derive(Clone, Debug)]
pub struct ResolvedSourceSet {
    pub name: String,
    pub patterns: Vec<String>,
}

impl ResolvedSourceSet {
    /// Walk `root` and return every file matched by the include patterns and
    /// not matched by the `-`-prefixed exclusions, sorted for determinism.
    ///
    /// Patterns are matched against both the absolute path and the
    /// root-relative path, so `${root}/src/*.c` and `src/*.c` behave alike.
    pub fn files(&self, root: &Path) -> Result<Vec<PathBuf>, SourceError> {
        let (include, exclude) = self.build_matchers()?;

        let mut files = Vec::new();
        for entry in WalkDir::new(root).into_iter().filter_map(Result::ok) {
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let relative = path.strip_prefix(root).unwrap_or(path);
            let included = include.is_match(path) || include.is_match(relative);
            let excluded = exclude.is_match(path) || exclude.is_match(relative);
            if included && !excluded {
                files.push(path.to_path_buf());
            }
        }
        files.sort();
        tracing::debug!(set = %self.name, matched = files.len(), "expanded source set");
        Ok(files)
    }

    fn build_matchers(&self) -> Result<(GlobSet, GlobSet), SourceError> {
        let mut include = GlobSetBuilder::new();
        let mut exclude = GlobSetBuilder::new();
        for pattern in &self.patterns {
            let (builder, raw) = match pattern.strip_prefix('-') {
                Some(stripped) => (&mut exclude, stripped),
                None => (&mut include, pattern.as_str()),
            };
            let glob = Glob::new(raw).map_err(|source| SourceError::Pattern {
                set: self.name.clone(),
                pattern: pattern.clone(),
                source,
            })?;
            builder.add(glob);
        }
        let include = include.build().map_err(|source| SourceError::Pattern {
            set: self.name.clone(),
            pattern: self.patterns.join(", "),
            source,
        })?;
        let exclude = exclude.build().map_err(|source| SourceError::Pattern {
            set: self.name.clone(),
            pattern: self.patterns.join(", "),
            source,
        })?;
        Ok((include, exclude))
    }
}
