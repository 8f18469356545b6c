//! Analysis root manager: turns workspace folders into the root set pushed to the server.
//!
//! Every trigger recomputes the full set; nothing is diffed against the
//! previous push. The server reconciles.

use std::path::{Path, PathBuf};

use tether_types::{AnalysisRootSet, WorkspaceFolder, is_within_path, normalize_path};

use crate::error::AnalyzerError;
use crate::server::Analyzer;

/// Environment variables naming directories that are expensive to analyze.
pub const NOISY_DIRECTORY_VARS: [&str; 3] = ["PUB_CACHE", "APPDATA", "LOCALAPPDATA"];

pub struct AnalysisRootManager {
    exclude_noisy: bool,
    noisy_dirs: Vec<PathBuf>,
    current: AnalysisRootSet,
}

impl AnalysisRootManager {
    /// Build a manager that reads high-churn directories from the process environment.
    #[must_use]
    pub fn from_env(exclude_noisy: bool) -> Self {
        let dirs = NOISY_DIRECTORY_VARS
            .iter()
            .map(|var| std::env::var_os(var).map(PathBuf::from));
        Self::with_noisy_dirs(exclude_noisy, dirs)
    }

    /// Build a manager with an explicit list of candidate high-churn directories.
    ///
    /// Unset and relative entries are ignored.
    #[must_use]
    pub fn with_noisy_dirs(
        exclude_noisy: bool,
        dirs: impl IntoIterator<Item = Option<PathBuf>>,
    ) -> Self {
        let noisy_dirs = dirs
            .into_iter()
            .flatten()
            .filter(|dir| dir.is_absolute())
            .collect();
        Self {
            exclude_noisy,
            noisy_dirs,
            current: AnalysisRootSet::default(),
        }
    }

    /// Recompute the root set from the currently open workspace folders.
    pub fn recompute(&mut self, folders: &[WorkspaceFolder]) -> AnalysisRootSet {
        let included: Vec<PathBuf> = folders.iter().map(|f| f.path.clone()).collect();
        let mut excluded = Vec::new();

        // Users who open their home directory otherwise end up analyzing
        // package caches and app data. Opening one of these directly still works.
        if self.exclude_noisy {
            for dir in &self.noisy_dirs {
                if let Some(root) = included.iter().find(|root| is_within_path(dir, root)) {
                    tracing::info!(
                        folder = %dir.display(),
                        root = %root.display(),
                        "Excluding folder from analysis roots: it is inside an analysis root and may cause performance issues"
                    );
                    excluded.push(dir.clone());
                }
            }
        }

        for folder in folders {
            for entry in &folder.analysis_excluded_folders {
                excluded.push(resolve_exclusion(&folder.path, entry));
            }
        }

        self.current = AnalysisRootSet { included, excluded };
        self.current.clone()
    }

    /// The set produced by the last `recompute`.
    #[must_use]
    pub fn current(&self) -> &AnalysisRootSet {
        &self.current
    }

    /// Send the last computed set to the server.
    pub async fn push(&self, analyzer: &Analyzer) -> Result<(), AnalyzerError> {
        tracing::debug!(
            included = self.current.included.len(),
            excluded = self.current.excluded.len(),
            "Pushing analysis roots"
        );
        analyzer.set_analysis_roots(&self.current).await
    }
}

fn resolve_exclusion(workspace: &Path, entry: &str) -> PathBuf {
    let entry = Path::new(entry);
    if entry.is_absolute() {
        normalize_path(entry)
    } else {
        normalize_path(&workspace.join(entry))
    }
}
