use std::path::PathBuf;

use tether_analyzer::AnalyzerError;
use tether_types::ExtensionState;

#[derive(Debug, thiserror::Error)]
pub enum ExtensionError {
    #[error("extension is {state}, expected it to be inactive")]
    AlreadyActive { state: ExtensionState },

    #[error("extension is not active")]
    NotActive,

    #[error("no SDK configured: set sdk_path or analyzer_path")]
    SdkNotConfigured,

    #[error("could not find an analysis server at {}", path.display())]
    ServerNotFound { path: PathBuf },

    #[error(transparent)]
    Analyzer(#[from] AnalyzerError),
}
