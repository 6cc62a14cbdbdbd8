//! Non-recursive directory enumeration.

use std::io;
use std::path::{Path, PathBuf};

use tracing::trace;

use crate::ignore::IgnoreMatcher;

/// One surviving entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Absolute path of the entry.
    pub full_path: PathBuf,
    /// Name relative to the listed directory.
    pub name: String,
}

/// List the immediate children of `path`, dropping ignored entries.
///
/// Entries whose names are not valid UTF-8 are skipped; the watcher keys
/// its child map by name and has no use for paths it cannot name. The
/// result is sorted by name so repeated listings of an unchanged directory
/// compare equal.
pub async fn list_dir(path: &Path, matcher: &IgnoreMatcher) -> io::Result<Vec<DirEntry>> {
    let mut reader = tokio::fs::read_dir(path).await?;
    let mut entries = Vec::new();

    while let Some(entry) = reader.next_entry().await? {
        let full_path = entry.path();
        let name = match entry.file_name().into_string() {
            Ok(name) => name,
            Err(raw) => {
                trace!(path = %full_path.display(), ?raw, "skipping non-utf8 entry");
                continue;
            }
        };

        if matcher.is_ignored(&full_path) {
            trace!(path = %full_path.display(), "entry ignored");
            continue;
        }

        entries.push(DirEntry { full_path, name });
    }

    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ignore::IgnoreOptions;

    async fn touch(path: &Path) {
        tokio::fs::write(path, b"x").await.unwrap();
    }

    #[tokio::test]
    async fn lists_files_and_directories_sorted() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("b.txt")).await;
        touch(&dir.path().join("a.txt")).await;
        tokio::fs::create_dir(dir.path().join("sub")).await.unwrap();

        let matcher = IgnoreMatcher::new(&IgnoreOptions::new()).unwrap();
        let entries = list_dir(dir.path(), &matcher).await.unwrap();

        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["a.txt", "b.txt", "sub"]);
        assert_eq!(entries[0].full_path, dir.path().join("a.txt"));
    }

    #[tokio::test]
    async fn filters_through_matcher() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("keep.rs")).await;
        touch(&dir.path().join("drop.swp")).await;
        touch(&dir.path().join(".hidden")).await;

        let options = IgnoreOptions::new()
            .with_hidden_files_ignored(true)
            .with_common_patterns_ignored(true);
        let matcher = IgnoreMatcher::new(&options).unwrap();
        let entries = list_dir(dir.path(), &matcher).await.unwrap();

        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["keep.rs"]);
    }

    #[tokio::test]
    async fn missing_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let gone = dir.path().join("nope");
        let matcher = IgnoreMatcher::new(&IgnoreOptions::new()).unwrap();
        assert!(list_dir(&gone, &matcher).await.is_err());
    }
}
