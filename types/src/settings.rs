//! User settings consumed by the orchestrator and the root manager.
//!
//! `Settings` is the deserialized form of the top-level TOML keys plus the
//! `[[workspace]]` array. The config crate owns reading it from disk; this
//! module only defines shape, defaults and the restart fingerprint.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::roots::WorkspaceFolder;

// Default value function for serde (bool::default() is false, so only true needs a fn)
const fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Root of the language SDK; the server runtime and entry point are found under it.
    pub sdk_path: Option<PathBuf>,
    /// Server entry-point override.
    pub analyzer_path: Option<PathBuf>,
    /// Runtime executable override.
    pub vm_path: Option<PathBuf>,
    pub analyzer_additional_args: Vec<String>,
    pub analyzer_diagnostics_port: Option<u16>,
    pub analyzer_vm_service_port: Option<u16>,
    pub analyzer_instrumentation_log_file: Option<PathBuf>,
    pub extension_log_file: Option<PathBuf>,

    #[serde(default = "default_true")]
    pub closing_labels: bool,
    #[serde(default = "default_true")]
    pub analysis_server_folding: bool,
    #[serde(default = "default_true")]
    pub auto_import_completions: bool,
    #[serde(default = "default_true")]
    pub trigger_signature_help_automatically: bool,
    pub analyze_angular_templates: bool,
    pub additional_analyzer_file_extensions: Vec<String>,
    /// Soft setting: a change only triggers a reanalysis.
    #[serde(default = "default_true")]
    pub show_todos: bool,

    /// Upper bound on waiting for the handshake. No bound when absent.
    pub connect_timeout_secs: Option<u64>,
    /// Exclude high-churn directories nested under a workspace root.
    /// Defaults to on for Windows only.
    pub exclude_noisy_ancestors: Option<bool>,

    #[serde(rename = "workspace")]
    pub workspace_folders: Vec<WorkspaceFolder>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            sdk_path: None,
            analyzer_path: None,
            vm_path: None,
            analyzer_additional_args: Vec::new(),
            analyzer_diagnostics_port: None,
            analyzer_vm_service_port: None,
            analyzer_instrumentation_log_file: None,
            extension_log_file: None,
            closing_labels: true,
            analysis_server_folding: true,
            auto_import_completions: true,
            trigger_signature_help_automatically: true,
            analyze_angular_templates: false,
            additional_analyzer_file_extensions: Vec::new(),
            show_todos: true,
            connect_timeout_secs: None,
            exclude_noisy_ancestors: None,
            workspace_folders: Vec::new(),
        }
    }
}

impl Settings {
    #[must_use]
    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_secs.map(Duration::from_secs)
    }

    #[must_use]
    pub fn exclude_noisy_ancestors(&self) -> bool {
        self.exclude_noisy_ancestors.unwrap_or(cfg!(windows))
    }

    /// Settings that require a full reload when they change.
    #[must_use]
    pub fn restart_fingerprint(&self) -> RestartFingerprint {
        RestartFingerprint {
            sdk_path: self.sdk_path.clone(),
            analyzer_path: self.analyzer_path.clone(),
            vm_path: self.vm_path.clone(),
            analyzer_additional_args: self.analyzer_additional_args.clone(),
            analyzer_diagnostics_port: self.analyzer_diagnostics_port,
            analyzer_vm_service_port: self.analyzer_vm_service_port,
            analyzer_instrumentation_log_file: self.analyzer_instrumentation_log_file.clone(),
            extension_log_file: self.extension_log_file.clone(),
            closing_labels: self.closing_labels,
            analysis_server_folding: self.analysis_server_folding,
            auto_import_completions: self.auto_import_completions,
            trigger_signature_help_automatically: self.trigger_signature_help_automatically,
            analyze_angular_templates: self.analyze_angular_templates,
            additional_analyzer_file_extensions: self.additional_analyzer_file_extensions.clone(),
        }
    }
}

/// Structured snapshot of every setting that affects server startup or
/// root-level feature wiring. Compared field by field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestartFingerprint {
    sdk_path: Option<PathBuf>,
    analyzer_path: Option<PathBuf>,
    vm_path: Option<PathBuf>,
    analyzer_additional_args: Vec<String>,
    analyzer_diagnostics_port: Option<u16>,
    analyzer_vm_service_port: Option<u16>,
    analyzer_instrumentation_log_file: Option<PathBuf>,
    extension_log_file: Option<PathBuf>,
    closing_labels: bool,
    analysis_server_folding: bool,
    auto_import_completions: bool,
    trigger_signature_help_automatically: bool,
    analyze_angular_templates: bool,
    additional_analyzer_file_extensions: Vec<String>,
}
