//! Declarative feature table: which editor features get wired after a connect.
//!
//! Ungated features are always registered. Gated ones need both the server
//! capability and the user setting.

use tether_types::{Capability, ServerCapabilities, Settings};

/// Editor-facing features the orchestrator can register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Feature {
    Hover,
    Completion,
    Formatting,
    Definition,
    References,
    DocumentHighlight,
    Rename,
    CodeActions,
    Implementation,
    FileChangeTracking,
    OpenFileTracking,
    ClosingLabels,
    Folding,
    SignatureHelp,
    AvailableSuggestions,
}

impl Feature {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Hover => "hover",
            Self::Completion => "completion",
            Self::Formatting => "formatting",
            Self::Definition => "definition",
            Self::References => "references",
            Self::DocumentHighlight => "document-highlight",
            Self::Rename => "rename",
            Self::CodeActions => "code-actions",
            Self::Implementation => "implementation",
            Self::FileChangeTracking => "file-change-tracking",
            Self::OpenFileTracking => "open-file-tracking",
            Self::ClosingLabels => "closing-labels",
            Self::Folding => "folding",
            Self::SignatureHelp => "signature-help",
            Self::AvailableSuggestions => "available-suggestions",
        }
    }
}

impl std::fmt::Display for Feature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which documents a feature applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Scope {
    /// Every analyzed file type, including template files when enabled.
    Analyzed,
    /// Primary-language files only.
    PrimaryOnly,
}

pub(crate) struct Gate {
    pub capability: Capability,
    pub setting: fn(&Settings) -> bool,
}

pub(crate) struct FeatureSpec {
    pub feature: Feature,
    pub scope: Scope,
    pub gate: Option<Gate>,
}

impl FeatureSpec {
    pub fn enabled(&self, capabilities: &ServerCapabilities, settings: &Settings) -> bool {
        match &self.gate {
            None => true,
            Some(gate) => capabilities.supports(gate.capability) && (gate.setting)(settings),
        }
    }
}

const fn always(feature: Feature, scope: Scope) -> FeatureSpec {
    FeatureSpec {
        feature,
        scope,
        gate: None,
    }
}

const fn gated(feature: Feature, capability: Capability, setting: fn(&Settings) -> bool) -> FeatureSpec {
    FeatureSpec {
        feature,
        scope: Scope::Analyzed,
        gate: Some(Gate {
            capability,
            setting,
        }),
    }
}

fn closing_labels(settings: &Settings) -> bool {
    settings.closing_labels
}

fn folding(settings: &Settings) -> bool {
    settings.analysis_server_folding
}

fn signature_help(settings: &Settings) -> bool {
    settings.trigger_signature_help_automatically
}

fn auto_import_completions(settings: &Settings) -> bool {
    settings.auto_import_completions
}

/// Registration order is table order.
pub(crate) const FEATURE_TABLE: &[FeatureSpec] = &[
    always(Feature::Hover, Scope::Analyzed),
    always(Feature::Completion, Scope::Analyzed),
    always(Feature::Formatting, Scope::Analyzed),
    always(Feature::Definition, Scope::Analyzed),
    always(Feature::References, Scope::Analyzed),
    always(Feature::DocumentHighlight, Scope::Analyzed),
    always(Feature::Rename, Scope::Analyzed),
    always(Feature::CodeActions, Scope::PrimaryOnly),
    always(Feature::Implementation, Scope::PrimaryOnly),
    always(Feature::FileChangeTracking, Scope::Analyzed),
    always(Feature::OpenFileTracking, Scope::Analyzed),
    gated(Feature::ClosingLabels, Capability::ClosingLabels, closing_labels),
    gated(Feature::Folding, Capability::CustomFolding, folding),
    gated(Feature::SignatureHelp, Capability::GetSignature, signature_help),
    gated(
        Feature::AvailableSuggestions,
        Capability::AvailableSuggestions,
        auto_import_completions,
    ),
];

/// Features that would be registered for this capability set and settings, in order.
#[must_use]
pub fn enabled_features(capabilities: &ServerCapabilities, settings: &Settings) -> Vec<Feature> {
    FEATURE_TABLE
        .iter()
        .filter(|entry| entry.enabled(capabilities, settings))
        .map(|entry| entry.feature)
        .collect()
}
