//! Analysis roots and workspace folders.

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Directories the server should analyze, and directories within them to skip.
///
/// Always recomputed wholesale; order is significant for equality.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AnalysisRootSet {
    pub included: Vec<PathBuf>,
    pub excluded: Vec<PathBuf>,
}

impl AnalysisRootSet {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.included.is_empty()
    }
}

/// An open workspace folder with its user-declared analysis exclusions.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WorkspaceFolder {
    pub path: PathBuf,
    /// Relative entries are resolved against `path`.
    #[serde(default)]
    pub analysis_excluded_folders: Vec<String>,
}

impl WorkspaceFolder {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            analysis_excluded_folders: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_exclusions<I, S>(mut self, folders: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.analysis_excluded_folders = folders.into_iter().map(Into::into).collect();
        self
    }
}

/// Lexically resolve `.` and `..` components without touching the filesystem.
#[must_use]
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = Vec::new();
    for c in path.components() {
        match c {
            // `..` never climbs above the root or a prefix.
            Component::ParentDir => match out.last().copied() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => out.push(c),
            },
            Component::CurDir => {}
            other => out.push(other),
        }
    }
    out.iter().collect()
}

/// Whether `candidate` lies strictly inside `root`.
///
/// A path is not within itself.
#[must_use]
pub fn is_within_path(candidate: &Path, root: &Path) -> bool {
    let candidate = normalize_path(candidate);
    let root = normalize_path(root);
    candidate != root && candidate.starts_with(&root)
}
