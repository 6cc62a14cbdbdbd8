//! Path filtering and directory scanning for the vigil watcher.
//!
//! This crate is the watcher's view of the filesystem namespace: it decides
//! which paths are interesting (`ignore`) and enumerates the immediate
//! children of a directory (`scan`). It deliberately knows nothing about
//! watching itself — `vigil-watch` consumes these pieces through their
//! public types.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

mod ignore;
mod scan;

pub use ignore::{IgnoreMatcher, IgnoreOptions};
pub use scan::{list_dir, DirEntry};

/// Errors raised while building an [`IgnoreMatcher`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A custom ignore pattern failed to compile.
    #[error("invalid ignore pattern: {0}")]
    Pattern(#[from] globset::Error),
}

/// Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
