//! Extension orchestrator: owns the analyzer for the lifetime of one
//! activation and wires editor features to its capabilities.

mod error;
mod features;
mod host;
mod launcher;
mod orchestrator;

pub use error::ExtensionError;
pub use features::{Feature, enabled_features};
pub use host::{
    DocumentSelector, EditorHost, PRIMARY_LANGUAGE, PROJECT_LOADED_CONTEXT, RegistrationContext,
};
pub use launcher::{LaunchFut, ProcessLauncher, ServerLauncher};
pub use orchestrator::{Extension, SettingsOutcome};
