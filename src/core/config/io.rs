use crate::core::config::data::{LlmConfig, ServerConfig};
use directories::ProjectDirs;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

const SERVERS_FILE: &str = "mcp.json";
const LLM_FILE: &str = "azure.json";

/// Errors that can occur when loading configuration from disk.
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Failed to parse the configuration file as valid JSON.
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    /// No configuration directory could be determined for this platform.
    NoConfigDir,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "Failed to read config at {}: {}", path.display(), source)
            }
            ConfigError::Parse { path, source } => {
                write!(
                    f,
                    "Failed to parse config at {}: {}",
                    path.display(),
                    source
                )
            }
            ConfigError::NoConfigDir => {
                write!(f, "Unable to determine a configuration directory")
            }
        }
    }
}

impl StdError for ConfigError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
            ConfigError::NoConfigDir => None,
        }
    }
}

pub fn default_config_dir() -> Result<PathBuf, ConfigError> {
    ProjectDirs::from("org", "permacommons", "palaver")
        .map(|dirs| dirs.config_dir().to_path_buf())
        .ok_or(ConfigError::NoConfigDir)
}

/// Raw per-server entry as it appears on disk. The wrapped-mapping and bare
/// mapping shapes carry the transport under `type`; the list shape uses
/// `transport`. Both are accepted everywhere.
#[derive(Debug, Deserialize, Default)]
struct RawServerEntry {
    name: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    transport: Option<String>,
    command: Option<String>,
    #[serde(default)]
    args: Vec<String>,
    env: Option<HashMap<String, String>>,
    url: Option<String>,
    headers: Option<HashMap<String, String>>,
}

impl RawServerEntry {
    fn into_config(self, fallback_name: Option<String>) -> Option<ServerConfig> {
        let name = self
            .name
            .or(fallback_name)
            .unwrap_or_else(|| "Unnamed MCP Server".to_string());
        Some(ServerConfig {
            name,
            transport: self.transport.or(self.kind),
            command: self.command,
            args: self.args,
            env: self.env,
            url: self.url,
            headers: self.headers,
        })
    }
}

/// Loads server descriptors, accepting three shapes:
/// `{"servers": {name: cfg}}`, `{"servers": [cfg, ...]}`, and a bare
/// top-level `{name: cfg}` mapping. A missing file yields an empty list.
pub fn load_server_configs(path: &Path) -> Result<Vec<ServerConfig>, ConfigError> {
    if !path.is_file() {
        return Ok(Vec::new());
    }
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let value: Value = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(normalize_server_configs(value))
}

fn normalize_server_configs(value: Value) -> Vec<ServerConfig> {
    match value {
        Value::Object(mut map) => match map.remove("servers") {
            Some(Value::Array(entries)) => entries_from_list(entries),
            Some(Value::Object(named)) => entries_from_named(named),
            Some(_) | None if !map.is_empty() => entries_from_named(map),
            _ => Vec::new(),
        },
        Value::Array(entries) => entries_from_list(entries),
        _ => Vec::new(),
    }
}

fn entries_from_list(entries: Vec<Value>) -> Vec<ServerConfig> {
    entries
        .into_iter()
        .filter_map(|entry| {
            serde_json::from_value::<RawServerEntry>(entry)
                .ok()
                .and_then(|raw| raw.into_config(None))
        })
        .collect()
}

fn entries_from_named(named: serde_json::Map<String, Value>) -> Vec<ServerConfig> {
    named
        .into_iter()
        .filter_map(|(name, entry)| {
            serde_json::from_value::<RawServerEntry>(entry)
                .ok()
                .and_then(|raw| raw.into_config(Some(name)))
        })
        .collect()
}

pub fn load_llm_config(path: &Path) -> Result<LlmConfig, ConfigError> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

pub fn servers_path(config_dir: &Path) -> PathBuf {
    config_dir.join(SERVERS_FILE)
}

pub fn llm_path(config_dir: &Path) -> PathBuf {
    config_dir.join(LLM_FILE)
}
