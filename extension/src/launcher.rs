//! Starting a server process for a given set of settings.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use tether_analyzer::{Analyzer, Framing, ServerCommand};
use tether_types::Settings;

use crate::error::ExtensionError;

pub type LaunchFut<'a> = Pin<Box<dyn Future<Output = Result<(), ExtensionError>> + Send + 'a>>;

/// Starts the server behind a freshly created, not-yet-started `Analyzer`.
///
/// The orchestrator registers its listeners before calling `launch`, so an
/// early exit is never missed.
pub trait ServerLauncher: Send + Sync {
    fn launch<'a>(&'a self, analyzer: &'a Analyzer, settings: &'a Settings) -> LaunchFut<'a>;
}

#[cfg(windows)]
const RUNTIME_EXECUTABLE: &str = "dart.exe";
#[cfg(not(windows))]
const RUNTIME_EXECUTABLE: &str = "dart";

const SNAPSHOT_PATH: [&str; 3] = ["bin", "snapshots", "analysis_server.dart.snapshot"];

const CLIENT_ID: &str = "tether";

/// Launches the SDK's analysis server snapshot as a child process.
#[derive(Debug, Clone, Default)]
pub struct ProcessLauncher {
    framing: Framing,
}

impl ProcessLauncher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_framing(framing: Framing) -> Self {
        Self { framing }
    }

    /// Resolve runtime, entry point and arguments from settings.
    pub fn command(&self, settings: &Settings) -> Result<ServerCommand, ExtensionError> {
        let runtime = match (&settings.vm_path, &settings.sdk_path) {
            (Some(vm), _) => vm.clone(),
            (None, Some(sdk)) => sdk.join("bin").join(RUNTIME_EXECUTABLE),
            // Falls back to a PATH lookup.
            (None, None) => PathBuf::from(RUNTIME_EXECUTABLE),
        };

        let entry_point = match (&settings.analyzer_path, &settings.sdk_path) {
            (Some(path), _) => path.clone(),
            (None, Some(sdk)) => SNAPSHOT_PATH.iter().fold(sdk.clone(), |p, c| p.join(c)),
            (None, None) => return Err(ExtensionError::SdkNotConfigured),
        };
        if !entry_point.exists() {
            return Err(ExtensionError::ServerNotFound { path: entry_point });
        }

        Ok(ServerCommand::new(runtime)
            .args(server_args(settings, &entry_point))
            .framing(self.framing))
    }
}

fn server_args(settings: &Settings, entry_point: &Path) -> Vec<String> {
    let mut args = Vec::new();
    if let Some(port) = settings.analyzer_vm_service_port {
        args.push(format!("--enable-vm-service={port}"));
    }
    args.push(entry_point.display().to_string());
    args.push(format!("--client-id={CLIENT_ID}"));
    args.push(format!("--client-version={}", env!("CARGO_PKG_VERSION")));
    if let Some(port) = settings.analyzer_diagnostics_port {
        args.push(format!("--port={port}"));
    }
    if let Some(log) = &settings.analyzer_instrumentation_log_file {
        args.push(format!("--instrumentation-log-file={}", log.display()));
    }
    args.extend(settings.analyzer_additional_args.iter().cloned());
    args
}

impl ServerLauncher for ProcessLauncher {
    fn launch<'a>(&'a self, analyzer: &'a Analyzer, settings: &'a Settings) -> LaunchFut<'a> {
        Box::pin(async move {
            let command = self.command(settings)?;
            analyzer.start(&command).await?;
            Ok(())
        })
    }
}
