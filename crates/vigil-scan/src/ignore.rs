//! Ignore-pattern evaluation.
//!
//! Filtering combines four independently-toggled sources:
//! explicit paths, hidden files, a built-in set of patterns that are noise
//! in practically every tree (editor swap files, VCS metadata, build
//! output), and user-supplied glob patterns.

use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};

use crate::Result;

/// Configuration for path filtering.
///
/// Plain data, serializable, and cheap to clone; compile it into an
/// [`IgnoreMatcher`] before use so glob errors surface once, up front.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IgnoreOptions {
    /// Absolute paths to exclude outright, including everything below them.
    pub ignore_paths: Vec<PathBuf>,

    /// Exclude entries whose file name starts with a dot.
    pub ignore_hidden_files: bool,

    /// Exclude the built-in set of commonly-uninteresting names
    /// (swap/backup files, `.git`, `node_modules`, OS cruft).
    pub ignore_common_patterns: bool,

    /// Additional glob patterns to exclude, matched against the full path.
    pub ignore_custom_patterns: Vec<String>,
}

impl IgnoreOptions {
    /// Create options with everything disabled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an explicit path to exclude.
    pub fn with_ignored_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.ignore_paths.push(path.into());
        self
    }

    /// Toggle hidden-file filtering.
    pub fn with_hidden_files_ignored(mut self, ignored: bool) -> Self {
        self.ignore_hidden_files = ignored;
        self
    }

    /// Toggle the built-in common-pattern set.
    pub fn with_common_patterns_ignored(mut self, ignored: bool) -> Self {
        self.ignore_common_patterns = ignored;
        self
    }

    /// Add a custom glob pattern.
    pub fn with_custom_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.ignore_custom_patterns.push(pattern.into());
        self
    }
}

/// Compiled form of [`IgnoreOptions`].
#[derive(Debug)]
pub struct IgnoreMatcher {
    options: IgnoreOptions,
    custom: Option<GlobSet>,
}

impl IgnoreMatcher {
    /// Compile the custom patterns in `options`.
    ///
    /// Fails if any custom glob is malformed; the built-in checks cannot
    /// fail.
    pub fn new(options: &IgnoreOptions) -> Result<Self> {
        let custom = if options.ignore_custom_patterns.is_empty() {
            None
        } else {
            let mut builder = GlobSetBuilder::new();
            for pattern in &options.ignore_custom_patterns {
                builder.add(Glob::new(pattern)?);
            }
            Some(builder.build()?)
        };

        Ok(Self {
            options: options.clone(),
            custom,
        })
    }

    /// Check whether `path` is excluded by any configured source.
    pub fn is_ignored(&self, path: &Path) -> bool {
        if self
            .options
            .ignore_paths
            .iter()
            .any(|ignored| path.starts_with(ignored))
        {
            return true;
        }

        let name = path.file_name().and_then(|n| n.to_str());

        if self.options.ignore_hidden_files {
            if let Some(name) = name {
                if name.starts_with('.') {
                    return true;
                }
            }
        }

        if self.options.ignore_common_patterns {
            if let Some(name) = name {
                if is_common_noise(name) {
                    return true;
                }
            }
        }

        if let Some(custom) = &self.custom {
            if custom.is_match(path) {
                return true;
            }
        }

        false
    }

    /// The options this matcher was compiled from.
    pub fn options(&self) -> &IgnoreOptions {
        &self.options
    }
}

/// Built-in name-based noise check.
///
/// Covers editor swap/backup files, VCS and dependency directories, and OS
/// metadata files.
fn is_common_noise(name: &str) -> bool {
    name.ends_with('~')
        || name.starts_with('~')
        || name.ends_with(".swp")
        || name.ends_with(".swo")
        || name.ends_with(".swx")
        || name.ends_with(".tmp")
        || name.ends_with(".bak")
        || name.contains('#')
        || name == ".git"
        || name == ".svn"
        || name == ".hg"
        || name == "node_modules"
        || name == "__pycache__"
        || name == ".DS_Store"
        || name == "Thumbs.db"
}
