//! Lifecycle states for the server process and the orchestrator.

use std::fmt;

/// Lifecycle of one analysis-server process.
///
/// Exactly one value holds at a time. `Terminated` is final for a given
/// supervisor instance; a restart constructs a new supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ServerProcessState {
    #[default]
    NotStarted,
    Starting,
    Connected,
    Terminating,
    Terminated,
}

impl ServerProcessState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "not-started",
            Self::Starting => "starting",
            Self::Connected => "connected",
            Self::Terminating => "terminating",
            Self::Terminated => "terminated",
        }
    }

    /// Whether the process may still accept writes.
    #[must_use]
    pub const fn is_live(self) -> bool {
        matches!(self, Self::Starting | Self::Connected)
    }
}

impl fmt::Display for ServerProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of the extension orchestrator across reload cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ExtensionState {
    #[default]
    Inactive,
    Activating,
    Active,
    Deactivating,
}

impl ExtensionState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Inactive => "inactive",
            Self::Activating => "activating",
            Self::Active => "active",
            Self::Deactivating => "deactivating",
        }
    }
}

impl fmt::Display for ExtensionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
