//! Tether CLI - headless host for the analysis-server orchestrator.
//!
//! Activates the extension against the configured SDK, then reads commands
//! from stdin until `quit`, EOF or Ctrl-C. SIGHUP re-reads the config file.
//!
//! ```text
//! main() -> Extension::activate() -> loop { stdin | SIGHUP | Ctrl-C } -> deactivate(false)
//! ```

mod commands;
mod host;

use anyhow::Result;
use std::{
    fs::{self, OpenOptions},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use commands::{Command, HELP};
use host::LoggingHost;
use tether_config::ConfigError;
use tether_extension::{
    EditorHost, Extension, PROJECT_LOADED_CONTEXT, ProcessLauncher, ServerLauncher,
};
use tether_types::Settings;

fn init_tracing(log_file_override: Option<&Path>) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (log_file, init_warnings) = open_tether_log_file(log_file_override);

    if let Some((log_path, file)) = log_file {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .with(env_filter)
            .init();

        tracing::info!(path = %log_path.display(), "Logging initialized");
        for warning in init_warnings {
            tracing::warn!("{warning}");
        }
        return;
    }

    // Stdout belongs to the command loop; without a log file, stay quiet.
    tracing_subscriber::registry().with(env_filter).init();
}

fn open_tether_log_file(
    log_file_override: Option<&Path>,
) -> (Option<(PathBuf, std::fs::File)>, Vec<String>) {
    let candidates = tether_log_file_candidates(log_file_override);
    let mut warnings = Vec::new();

    for candidate in candidates {
        if let Some(parent) = candidate.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            warnings.push(format!(
                "Failed to create log dir {}: {e}",
                parent.display()
            ));
            continue;
        }

        match OpenOptions::new()
            .create(true)
            .append(true)
            .open(&candidate)
        {
            Ok(file) => return (Some((candidate, file)), warnings),
            Err(e) => {
                warnings.push(format!(
                    "Failed to open log file {}: {e}",
                    candidate.display()
                ));
            }
        }
    }

    (None, warnings)
}

fn tether_log_file_candidates(log_file_override: Option<&Path>) -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    // Configured: extension_log_file
    if let Some(path) = log_file_override {
        candidates.push(path.to_path_buf());
    }

    // Primary: ~/.tether/logs/tether.log
    if let Some(dir) = tether_config::tether_dir() {
        candidates.push(dir.join("logs").join("tether.log"));
    }

    // Fallback: ./.tether/logs/tether.log
    candidates.push(PathBuf::from(".tether").join("logs").join("tether.log"));

    candidates
}

fn load_settings() -> Result<Settings, ConfigError> {
    Ok(tether_config::load()?.unwrap_or_default())
}

#[cfg(unix)]
struct Hangup(tokio::signal::unix::Signal);

#[cfg(unix)]
impl Hangup {
    fn new() -> Result<Self> {
        use tokio::signal::unix::{SignalKind, signal};
        Ok(Self(signal(SignalKind::hangup())?))
    }

    async fn recv(&mut self) {
        if self.0.recv().await.is_none() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
struct Hangup;

#[cfg(not(unix))]
impl Hangup {
    #[allow(clippy::unnecessary_wraps)]
    fn new() -> Result<Self> {
        Ok(Self)
    }

    async fn recv(&mut self) {
        std::future::pending::<()>().await;
    }
}

/// Run one command. Returns `false` when the loop should stop.
async fn execute<L, H>(extension: &mut Extension<L, H>, host: &LoggingHost, command: Command) -> bool
where
    L: ServerLauncher,
    H: EditorHost,
{
    match command {
        Command::Reload => {
            if let Err(e) = extension.reload().await {
                eprintln!("reload failed: {e}");
            }
        }
        Command::Reanalyze => {
            if let Err(e) = extension.reanalyze().await {
                eprintln!("reanalyze failed: {e}");
            }
        }
        Command::Cancel => {
            let cancelled = extension.cancel_all_requests().await;
            println!("cancelled {cancelled} pending request(s)");
        }
        Command::Status => print_status(extension, host),
        Command::Config => match load_settings() {
            Ok(settings) => match extension.settings_changed(settings).await {
                Ok(outcome) => println!("settings applied: {outcome:?}"),
                Err(e) => eprintln!("applying settings failed: {e}"),
            },
            Err(e) => eprintln!("{e}; keeping previous settings"),
        },
        Command::Open(language) => extension.document_opened(&language),
        Command::Help => println!("{HELP}"),
        Command::Quit => return false,
    }
    true
}

fn print_status<L, H>(extension: &Extension<L, H>, host: &LoggingHost)
where
    L: ServerLauncher,
    H: EditorHost,
{
    println!("extension: {} (generation {})", extension.state(), extension.generation());
    if let Some(analyzer) = extension.analyzer() {
        println!(
            "server: {} version={:?} pending={}",
            analyzer.state(),
            extension.current_capabilities().version(),
            analyzer.pending_requests()
        );
    }
    if let Some(roots) = extension.analysis_roots() {
        println!("roots: included={:?} excluded={:?}", roots.included, roots.excluded);
    }
    let features: Vec<&str> = host.active_features().iter().map(|f| f.as_str()).collect();
    println!("features: {}", features.join(", "));
    println!(
        "project loaded: {}",
        host.context(PROJECT_LOADED_CONTEXT).unwrap_or(false)
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let loaded = load_settings();
    let log_file_override = loaded
        .as_ref()
        .ok()
        .and_then(|settings| settings.extension_log_file.clone());
    init_tracing(log_file_override.as_deref());

    let settings = loaded.unwrap_or_else(|e| {
        tracing::warn!("{e}; using defaults");
        eprintln!("{e}; using defaults");
        Settings::default()
    });

    let host = Arc::new(LoggingHost::default());
    let mut extension = Extension::new(ProcessLauncher::new(), Arc::clone(&host));
    if let Err(e) = extension.activate(settings).await {
        eprintln!("activation failed: {e}");
        eprintln!("fix the configuration, then run `config` and `reload`");
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut hangup = Hangup::new()?;

    loop {
        let command = tokio::select! {
            line = lines.next_line() => match commands::from_input(line) {
                Some(command) => command,
                None => continue,
            },
            () = hangup.recv() => {
                tracing::info!("SIGHUP received, reloading config");
                Command::Config
            }
            _ = tokio::signal::ctrl_c() => Command::Quit,
        };

        if !execute(&mut extension, &host, command).await {
            break;
        }
    }

    extension.deactivate(false).await;
    Ok(())
}
