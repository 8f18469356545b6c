//! Loading `Settings` from `~/.tether/config.toml`.
//!
//! ```toml
//! sdk_path = "${HOME}/sdk/dart"
//! closing_labels = true
//! connect_timeout_secs = 30
//!
//! [[workspace]]
//! path = "/home/me/src/app"
//! analysis_excluded_folders = ["build", "third_party"]
//! ```

use std::path::{Path, PathBuf};
use std::{env, fs};

use tether_types::Settings;

/// Environment variable that overrides the config file location.
pub const CONFIG_PATH_ENV: &str = "TETHER_CONFIG";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl ConfigError {
    pub fn path(&self) -> &PathBuf {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => path,
        }
    }
}

/// Replace every `${VAR}` with the variable's value; unset variables become empty.
pub fn expand_env_vars(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            break;
        };
        out.push_str(&rest[..start]);
        let var = &after[..end];
        if !var.is_empty() {
            out.push_str(&env::var(var).unwrap_or_default());
        }
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    out
}

fn expand_path(path: &mut PathBuf) {
    if let Some(text) = path.to_str()
        && text.contains("${")
    {
        *path = PathBuf::from(expand_env_vars(text));
    }
}

fn expand_settings(settings: &mut Settings) {
    for path in [
        &mut settings.sdk_path,
        &mut settings.analyzer_path,
        &mut settings.vm_path,
        &mut settings.analyzer_instrumentation_log_file,
        &mut settings.extension_log_file,
    ]
    .into_iter()
    .flatten()
    {
        expand_path(path);
    }
    for folder in &mut settings.workspace_folders {
        expand_path(&mut folder.path);
        for excluded in &mut folder.analysis_excluded_folders {
            *excluded = expand_env_vars(excluded);
        }
    }
}

/// Parse config file content. `path` is only used for error reporting.
pub fn parse(content: &str, path: &Path) -> Result<Settings, ConfigError> {
    let mut settings: Settings = toml::from_str(content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    expand_settings(&mut settings);
    Ok(settings)
}

pub fn load_from(path: &Path) -> Result<Settings, ConfigError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) => {
            tracing::warn!("Failed to read config at {:?}: {}", path, err);
            return Err(ConfigError::Read {
                path: path.to_path_buf(),
                source: err,
            });
        }
    };

    parse(&content, path).inspect_err(|err| {
        tracing::warn!("{err}");
    })
}

/// Load settings from the default location. `Ok(None)` when there is no file.
pub fn load() -> Result<Option<Settings>, ConfigError> {
    let Some(path) = config_path() else {
        return Ok(None);
    };
    if !path.exists() {
        return Ok(None);
    }
    load_from(&path).map(Some)
}

/// `$TETHER_CONFIG` if set, else `~/.tether/config.toml`.
#[must_use]
pub fn config_path() -> Option<PathBuf> {
    if let Some(path) = env::var_os(CONFIG_PATH_ENV).filter(|p| !p.is_empty()) {
        return Some(PathBuf::from(path));
    }
    tether_dir().map(|dir| dir.join("config.toml"))
}

/// Per-user state directory (`~/.tether`).
#[must_use]
pub fn tether_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".tether"))
}
