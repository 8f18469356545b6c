//! Error type for the analyzer client.

use std::path::PathBuf;
use std::time::Duration;

use tether_types::ServerProcessState;

/// Failure of a single analyzer operation.
///
/// Request-scoped variants (`Server`, `Cancelled`, `Timeout`) only ever reach
/// the caller that issued the request.
#[derive(Debug, thiserror::Error)]
pub enum AnalyzerError {
    #[error("channel to the analysis server is closed")]
    ChannelClosed,

    #[error("analysis server has not been started")]
    NotRunning,

    #[error("request cancelled: {reason}")]
    Cancelled { reason: String },

    #[error("{method} failed: [{code}] {message}")]
    Server {
        method: String,
        code: String,
        message: String,
    },

    #[error("failed to spawn analysis server {}: {source}", executable.display())]
    Spawn {
        executable: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("analysis server is {state}, expected it to be not-started")]
    AlreadyStarted { state: ServerProcessState },

    #[error("analysis server did not connect: {reason}")]
    ConnectFailed { reason: String },

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("failed to serialize request: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl AnalyzerError {
    /// Whether this error means the connection as a whole is gone, as opposed
    /// to one request failing.
    #[must_use]
    pub fn is_connection_loss(&self) -> bool {
        matches!(
            self,
            Self::ChannelClosed | Self::NotRunning | Self::ConnectFailed { .. }
        )
    }
}
