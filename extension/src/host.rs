//! The boundary to the editor: feature registration and user-visible messages.

use std::sync::Arc;

use tether_analyzer::Analyzer;
use tether_types::{Registration, ServerCapabilities, Settings};

use crate::features::{Feature, Scope};

/// Context key that is `true` while a project is loaded and analyzed.
pub const PROJECT_LOADED_CONTEXT: &str = "tether:projectLoaded";

/// Language id of the primary analyzed language.
pub const PRIMARY_LANGUAGE: &str = "dart";

const TEMPLATE_LANGUAGE: &str = "html";

/// Which documents a registration applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentSelector {
    Language(String),
    /// Glob matched against file paths, e.g. `**/*.ng`.
    Pattern(String),
}

/// Everything a feature provider needs to talk to the server.
#[derive(Clone)]
pub struct RegistrationContext {
    pub analyzer: Analyzer,
    pub capabilities: Arc<ServerCapabilities>,
    pub selectors: Vec<DocumentSelector>,
}

impl std::fmt::Debug for RegistrationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistrationContext")
            .field("server_version", &self.capabilities.version())
            .field("selectors", &self.selectors)
            .finish_non_exhaustive()
    }
}

/// Implemented by the editor. Every method is called from the orchestrator;
/// `show_error` may also be called from the analyzer's reader task.
pub trait EditorHost: Send + Sync + 'static {
    /// Wire `feature` into the editor. The returned registration is disposed on
    /// deactivate and before every reload.
    fn register(&self, feature: Feature, context: &RegistrationContext) -> anyhow::Result<Registration>;

    fn show_error(&self, message: &str);

    fn show_warning(&self, message: &str);

    /// Toggle a context key used for command visibility.
    fn set_context(&self, key: &str, value: bool);
}

/// Selectors for a feature, given the current settings.
pub(crate) fn selectors_for(scope: Scope, settings: &Settings) -> Vec<DocumentSelector> {
    let mut selectors = vec![DocumentSelector::Language(PRIMARY_LANGUAGE.to_string())];
    if scope == Scope::Analyzed && settings.analyze_angular_templates {
        selectors.push(DocumentSelector::Language(TEMPLATE_LANGUAGE.to_string()));
        selectors.extend(
            settings
                .additional_analyzer_file_extensions
                .iter()
                .map(|ext| DocumentSelector::Pattern(format!("**/*.{}", ext.trim_start_matches('.')))),
        );
    }
    selectors
}
