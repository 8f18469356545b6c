//! Core domain types for Tether.
//!
//! This crate contains pure domain types with no IO, no async, and minimal dependencies.
//! Everything here can be used from any layer: the analyzer client, the config loader,
//! the orchestrator and the host binary.

// Pedantic lint configuration - these are intentional design choices
#![allow(clippy::missing_errors_doc)] // Result-returning functions are self-explanatory

mod capabilities;
mod dispose;
mod roots;
mod settings;
mod state;

pub use capabilities::{Capability, ServerCapabilities, ServerVersion};
pub use dispose::{Disposable, Registration};
pub use roots::{AnalysisRootSet, WorkspaceFolder, is_within_path, normalize_path};
pub use settings::{RestartFingerprint, Settings};
pub use state::{ExtensionState, ServerProcessState};
