use serde::Deserialize;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Key holding the base URL of the Agent Zero MCP endpoint.
pub const MCP_URL_KEY: &str = "AGENT_ZERO_MCP_URL";

/// Used when neither the environment nor any .env file names an endpoint.
pub const DEFAULT_MCP_URL: &str = "http://localhost:5000/mcp/t-0/http/";

pub const LOCAL_ENV_PATH: &str = ".env";
pub const SYSTEM_ENV_PATH: &str = "/etc/agent_zero/.env";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not locate home directory")]
    NoHomeDir,
    #[error("could not read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid env file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        #[source]
        source: dotenvy::Error,
    },
}

/// Client preferences read from `~/.agent-zero/config.toml`.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// The shell (e.g. sh, bash, zsh) that runs `backtick` directives
    pub default_shell: Option<String>,
    /// Seconds before a backtick command is killed. 0 disables the limit.
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
    /// Number of history entries loaded for recall
    #[serde(default = "default_history_size")]
    pub history_size: usize,
}

const fn default_command_timeout_secs() -> u64 {
    30
}

const fn default_history_size() -> usize {
    1000
}

impl Default for Config {
    fn default() -> Self {
        Config {
            default_shell: None,
            command_timeout_secs: default_command_timeout_secs(),
            history_size: default_history_size(),
        }
    }
}

impl Config {
    pub fn shell(&self) -> String {
        self.default_shell.clone().unwrap_or_else(|| {
            if cfg!(target_os = "windows") {
                "powershell".to_string()
            } else {
                "sh".to_string()
            }
        })
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        if self.command_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.command_timeout_secs))
        }
    }
}

const DEFAULT_CONFIG: &str = r#"
# The shell used to run `backtick` commands embedded in messages
# (default: sh, powershell on Windows).
#default_shell = "bash"

# Seconds before a `backtick` command is killed. 0 waits forever (default: 30).
#command_timeout_secs = 30

# Number of past inputs available for recall with up/down and ctrl+r
# (default: 1000).
#history_size = 1000

# The Agent Zero endpoint is not configured here. Set AGENT_ZERO_MCP_URL in
# the environment, in ./.env, or in /etc/agent_zero/.env.
"#;

pub fn get_config_folder_path() -> Result<PathBuf, ConfigError> {
    let mut path = dirs::home_dir().ok_or(ConfigError::NoHomeDir)?;
    path.push(".agent-zero");
    Ok(path)
}

pub fn create_config_dir_if_missing() -> Result<(), ConfigError> {
    let path = get_config_folder_path()?;
    if !path.exists() {
        fs::create_dir_all(&path).map_err(|source| ConfigError::Io { path, source })?;
    }
    Ok(())
}

pub fn get_default_config_path() -> Result<PathBuf, ConfigError> {
    Ok(get_config_folder_path()?.join("config.toml"))
}

/// Reads the preferences file. The default file is created (fully commented
/// out) if it's missing; an explicit override must exist.
pub fn get_config(config_path_override: Option<&Path>) -> Result<Config, ConfigError> {
    let config_path = match config_path_override {
        Some(path) => path.to_path_buf(),
        None => {
            let path = get_default_config_path()?;
            if !path.exists() {
                if let Err(e) = fs::write(&path, DEFAULT_CONFIG) {
                    warn!("could not write default config to {}: {}", path.display(), e);
                    return Ok(Config::default());
                }
            }
            path
        }
    };
    let contents = fs::read_to_string(&config_path).map_err(|source| ConfigError::Io {
        path: config_path.clone(),
        source,
    })?;
    parse_config(&contents).map_err(|source| ConfigError::Toml {
        path: config_path,
        source,
    })
}

pub fn parse_config(contents: &str) -> Result<Config, toml::de::Error> {
    toml::from_str(contents)
}

// ---

pub fn get_debug_log_path() -> Result<PathBuf, ConfigError> {
    Ok(get_config_folder_path()?.join("debug.log"))
}

pub fn open_debug_log() -> Result<fs::File, ConfigError> {
    let path = get_debug_log_path()?;
    fs::OpenOptions::new()
        .append(true)
        .create(true)
        .open(&path)
        .map_err(|source| ConfigError::Io { path, source })
}

pub fn get_history_path() -> Result<PathBuf, ConfigError> {
    Ok(get_config_folder_path()?.join("history"))
}

pub fn get_session_path() -> Result<PathBuf, ConfigError> {
    Ok(get_config_folder_path()?.join("last_chat_id"))
}

// --- Endpoint resolution

/// Where the effective endpoint URL came from.
#[derive(Debug, Clone, PartialEq)]
pub enum UrlSource {
    Flag,
    Environment,
    EnvFile(PathBuf),
    Default,
}

impl fmt::Display for UrlSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UrlSource::Flag => write!(f, "--url"),
            UrlSource::Environment => write!(f, "${}", MCP_URL_KEY),
            UrlSource::EnvFile(path) => write!(f, "{}", path.display()),
            UrlSource::Default => write!(f, "built-in default"),
        }
    }
}

/// Resolves the endpoint: `--url`, then the process environment, then
/// `./.env`, then `/etc/agent_zero/.env`, then [`DEFAULT_MCP_URL`].
pub fn resolve_mcp_url(url_flag: Option<&str>) -> (String, UrlSource) {
    let env_files = [PathBuf::from(LOCAL_ENV_PATH), PathBuf::from(SYSTEM_ENV_PATH)];
    resolve_mcp_url_from(url_flag, std::env::var(MCP_URL_KEY).ok(), &env_files)
}

pub fn resolve_mcp_url_from(
    url_flag: Option<&str>,
    env_value: Option<String>,
    env_files: &[PathBuf],
) -> (String, UrlSource) {
    if let Some(url) = url_flag.filter(|url| !url.trim().is_empty()) {
        return (url.trim().to_string(), UrlSource::Flag);
    }
    if let Some(url) = env_value.filter(|url| !url.trim().is_empty()) {
        return (url.trim().to_string(), UrlSource::Environment);
    }
    for env_file in env_files {
        match read_env_file_value(env_file, MCP_URL_KEY) {
            Ok(Some(url)) => return (url, UrlSource::EnvFile(env_file.clone())),
            Ok(None) => continue,
            Err(e) => {
                warn!("skipping {}", e);
                continue;
            }
        }
    }
    (DEFAULT_MCP_URL.to_string(), UrlSource::Default)
}

/// Looks up `key` in a dotenv-formatted file without touching the process
/// environment. A missing file is `Ok(None)`.
pub fn read_env_file_value(path: &Path, key: &str) -> Result<Option<String>, ConfigError> {
    if !path.is_file() {
        return Ok(None);
    }
    debug!("reading {}", path.display());
    let iter = dotenvy::from_path_iter(path).map_err(|source| ConfigError::EnvFile {
        path: path.to_path_buf(),
        source,
    })?;
    let mut found = None;
    for item in iter {
        let (k, v) = item.map_err(|source| ConfigError::EnvFile {
            path: path.to_path_buf(),
            source,
        })?;
        // Later assignments win, as when the file is sourced.
        if k == key && !v.trim().is_empty() {
            found = Some(v.trim().to_string());
        }
    }
    Ok(found)
}
