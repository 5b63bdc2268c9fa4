// src/watch/patterns.rs

use std::fmt;

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::types::ChangeSet;
use crate::watch::path_utils::to_forward_slashes;

/// Compiled include/exclude glob sets.
///
/// - `include` absent: every path passes the include stage.
/// - `exclude` absent: nothing is excluded.
/// - A path matches when it passes include AND does not match exclude.
///
/// Paths are normalised to forward slashes before matching.
#[derive(Clone, Default)]
pub struct PathFilter {
    include: Option<GlobSet>,
    exclude: Option<GlobSet>,
}

impl fmt::Debug for PathFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PathFilter")
            .field("include", &self.include.as_ref().map(GlobSet::len))
            .field("exclude", &self.exclude.as_ref().map(GlobSet::len))
            .finish()
    }
}

impl PathFilter {
    /// Build a filter; `None` lists keep their "absent" meaning.
    pub fn new(include: Option<&[String]>, exclude: Option<&[String]>) -> Result<Self> {
        let include = include
            .map(|pats| build_globset(pats).context("building include globset"))
            .transpose()?;
        let exclude = exclude
            .map(|pats| build_globset(pats).context("building exclude globset"))
            .transpose()?;
        Ok(Self { include, exclude })
    }

    /// A filter that lets every path through.
    pub fn allow_all() -> Self {
        Self::default()
    }

    pub fn is_pass_through(&self) -> bool {
        self.include.is_none() && self.exclude.is_none()
    }

    pub fn matches(&self, path: &str) -> bool {
        let path = to_forward_slashes(path);
        if let Some(include) = &self.include {
            if !include.is_match(&path) {
                return false;
            }
        }
        if let Some(exclude) = &self.exclude {
            if exclude.is_match(&path) {
                return false;
            }
        }
        true
    }

    /// Filter each bucket of `changes` independently.
    pub fn apply(&self, changes: &ChangeSet) -> ChangeSet {
        if self.is_pass_through() {
            return changes.clone();
        }
        changes.filter(|path| self.matches(path))
    }
}

/// Build a GlobSet from simple string patterns.
fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pat in patterns {
        let glob = Glob::new(&to_forward_slashes(pat))
            .with_context(|| format!("invalid glob pattern: {pat}"))?;
        builder.add(glob);
    }
    Ok(builder.build()?)
}
