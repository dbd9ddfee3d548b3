//! Configuration for callscript.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (CALLSCRIPT_HOME, CALLSCRIPT_ASSISTANT_ID)
//! 2. Config file (.callscript/config.yaml)
//! 3. Defaults (~/.callscript)
//!
//! Config file discovery:
//! - Searches current directory and parents for .callscript/config.yaml
//! - Paths in config file are relative to the .callscript/ directory

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::ConnectErrorPolicy;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub assistant_id: Option<String>,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub session: Option<SessionConfig>,
    #[serde(default)]
    pub diagnostics: Option<DiagnosticsConfig>,
    #[serde(default)]
    pub replay: Option<ReplayConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// State directory (relative to .callscript/)
    pub home: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    pub end_grace_ms: Option<u64>,
    pub connect_error: Option<ConnectErrorPolicy>,
    pub drop_empty_final_turns: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiagnosticsConfig {
    pub enabled: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReplayConfig {
    pub pace_ms: Option<u64>,
    pub hangup_on_eof: Option<bool>,
}

/// Call session behavior
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSettings {
    /// How long Ended is shown before returning to Idle
    pub end_grace_ms: u64,
    /// Where a failed connection attempt lands
    pub connect_error: ConnectErrorPolicy,
    /// Hide empty finalized turns from display
    pub drop_empty_final_turns: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            end_grace_ms: 2000,
            connect_error: ConnectErrorPolicy::Idle,
            drop_empty_final_turns: true,
        }
    }
}

/// Replay transport behavior
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplaySettings {
    /// Delay between replayed events
    pub pace_ms: u64,
    /// Emit call-end when the capture runs out
    pub hangup_on_eof: bool,
}

impl Default for ReplaySettings {
    fn default() -> Self {
        Self {
            pace_ms: 0,
            hangup_on_eof: true,
        }
    }
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedConfig {
    /// Absolute path to callscript home (diagnostics)
    pub home: PathBuf,
    /// Assistant to call when none is given on the command line
    pub assistant_id: Option<String>,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    pub session: SessionSettings,
    pub diagnostics_enabled: bool,
    pub replay: ReplaySettings,
}

/// Values taken from the environment
#[derive(Debug, Clone, Default)]
struct EnvOverrides {
    home: Option<String>,
    assistant_id: Option<String>,
}

impl EnvOverrides {
    fn from_env() -> Self {
        Self {
            home: std::env::var("CALLSCRIPT_HOME").ok(),
            assistant_id: std::env::var("CALLSCRIPT_ASSISTANT_ID").ok(),
        }
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".callscript").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the config file's parent
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Merge defaults, an optional config file and environment overrides
fn build_config(
    default_home: PathBuf,
    file: Option<(&Path, ConfigFile)>,
    env: EnvOverrides,
) -> ResolvedConfig {
    let mut resolved = ResolvedConfig {
        home: default_home,
        assistant_id: None,
        config_file: None,
        session: SessionSettings::default(),
        diagnostics_enabled: true,
        replay: ReplaySettings::default(),
    };

    if let Some((config_path, config)) = file {
        resolved.config_file = Some(config_path.to_path_buf());

        if let Some(ref home_path) = config.paths.home {
            // home is relative to .callscript/ directory
            let dir = config_path.parent().unwrap_or(Path::new("."));
            resolved.home = resolve_path(dir, home_path);
        }

        resolved.assistant_id = config.assistant_id;

        if let Some(session) = config.session {
            let defaults = SessionSettings::default();
            resolved.session = SessionSettings {
                end_grace_ms: session.end_grace_ms.unwrap_or(defaults.end_grace_ms),
                connect_error: session.connect_error.unwrap_or(defaults.connect_error),
                drop_empty_final_turns: session
                    .drop_empty_final_turns
                    .unwrap_or(defaults.drop_empty_final_turns),
            };
        }

        if let Some(enabled) = config.diagnostics.and_then(|d| d.enabled) {
            resolved.diagnostics_enabled = enabled;
        }

        if let Some(replay) = config.replay {
            let defaults = ReplaySettings::default();
            resolved.replay = ReplaySettings {
                pace_ms: replay.pace_ms.unwrap_or(defaults.pace_ms),
                hangup_on_eof: replay.hangup_on_eof.unwrap_or(defaults.hangup_on_eof),
            };
        }
    }

    if let Some(home) = env.home {
        resolved.home = PathBuf::from(home);
    }
    if let Some(assistant_id) = env.assistant_id {
        resolved.assistant_id = Some(assistant_id);
    }

    resolved
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".callscript");

    let config_path = find_config_file();
    let file = match config_path {
        Some(ref path) => Some((path.as_path(), load_config_file(path)?)),
        None => None,
    };

    Ok(build_config(default_home, file, EnvOverrides::from_env()))
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| e.to_string()));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Get the callscript home directory.
pub fn callscript_home() -> Result<PathBuf> {
    Ok(config()?.home.clone())
}

/// Get the diagnostics log path ($CALLSCRIPT_HOME/diagnostics.jsonl)
pub fn diagnostics_path() -> Result<PathBuf> {
    Ok(callscript_home()?.join("diagnostics.jsonl"))
}
