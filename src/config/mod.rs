//! Application settings: JSON config files, environment variables and the
//! client configuration derived from them.

mod client;
mod env;

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use log::debug;
use serde::{Deserialize, Serialize};

pub use client::{
    ClientConfig, DEFAULT_CACHE_TTL_SECS, DEFAULT_MAX_CONCURRENT_REQUESTS, DEFAULT_TIMEOUT_SECS,
    MAX_RETRIES_LIMIT, MIN_API_KEY_LEN, mask_secret,
};
#[cfg(test)]
pub use env::MockEnvSource;
pub use env::{EnvSource, SystemEnv};

use crate::http::{DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_DELAY_MS, DEFAULT_MAX_RETRIES};

/// Where `init-config` writes the example configuration by default.
pub const EXAMPLE_CONFIG_PATH: &str = "config/config.example.json";

/// Version reported by the CLI and the MCP server.
pub const VERSION: &str = env!("N8N_MCP_VERSION");

/// Config file locations tried in order when no path is given.
pub fn default_config_paths() -> Vec<PathBuf> {
    let mut paths = vec![
        PathBuf::from("config/config.json"),
        PathBuf::from("config.json"),
    ];
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".n8n-mcp").join("config.json"));
    }
    paths.push(PathBuf::from("/etc/n8n-mcp/config.json"));
    paths
}

/// n8n connection section.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct N8nSettings {
    pub base_url: String,
    pub api_key: String,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl fmt::Debug for N8nSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("N8nSettings")
            .field("base_url", &self.base_url)
            .field("api_key", &mask_secret(&self.api_key))
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

/// MCP server identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct McpSettings {
    pub server_name: String,
    pub version: String,
    pub description: String,
}

impl Default for McpSettings {
    fn default() -> Self {
        Self {
            server_name: "n8n-workflow-manager".to_string(),
            version: VERSION.to_string(),
            description: "MCP server for managing n8n workflows".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// `error`, `warn`, `info`, `debug` or `trace`.
    pub level: String,
    /// Log to this file instead of stderr.
    pub file: Option<PathBuf>,
    /// Size at which the log file is rotated on startup.
    pub max_bytes: u64,
    pub backup_count: u32,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            max_bytes: 10 * 1024 * 1024,
            backup_count: 5,
        }
    }
}

impl LoggingSettings {
    /// Log file path made absolute against the current directory.
    pub fn log_file_path(&self) -> Option<PathBuf> {
        let file = self.file.as_ref()?;
        if file.is_absolute() {
            return Some(file.clone());
        }
        std::env::current_dir()
            .map(|cwd| cwd.join(file))
            .ok()
            .or_else(|| Some(file.clone()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceSettings {
    /// Cache TTL in seconds; 0 disables caching.
    pub cache_ttl: u64,
    pub max_concurrent_requests: usize,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
}

impl Default for PerformanceSettings {
    fn default() -> Self {
        Self {
            cache_ttl: DEFAULT_CACHE_TTL_SECS,
            max_concurrent_requests: DEFAULT_MAX_CONCURRENT_REQUESTS,
            retry_base_delay_ms: DEFAULT_BASE_DELAY_MS,
            retry_max_delay_ms: DEFAULT_MAX_DELAY_MS,
        }
    }
}

/// Top-level configuration. Unknown sections and keys are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub n8n: N8nSettings,
    #[serde(default)]
    pub mcp: McpSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
    #[serde(default)]
    pub performance: PerformanceSettings,
}

impl Settings {
    /// Loads settings from `config_path`, or from the first existing file in
    /// [`default_config_paths`].
    pub fn load_from_file(config_path: Option<&Path>) -> Result<Self> {
        let path = match config_path {
            Some(path) => {
                if !path.exists() {
                    bail!("Config file not found: {}", path.display());
                }
                path.to_path_buf()
            }
            None => {
                let candidates = default_config_paths();
                candidates
                    .iter()
                    .find(|candidate| candidate.exists())
                    .cloned()
                    .ok_or_else(|| {
                        anyhow!(
                            "Config file not found in any of these locations: {}",
                            candidates
                                .iter()
                                .map(|p| p.display().to_string())
                                .collect::<Vec<_>>()
                                .join(", ")
                        )
                    })?
            }
        };

        debug!("Loading settings from {}", path.display());

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Builds settings from environment variables. `N8N_BASE_URL` and
    /// `N8N_API_KEY` are required.
    pub fn load_from_env<E: EnvSource + ?Sized>(env: &E) -> Result<Self> {
        let base_url = optional_var(env, "N8N_BASE_URL")
            .ok_or_else(|| anyhow!("N8N_BASE_URL environment variable is required"))?;
        let api_key = optional_var(env, "N8N_API_KEY")
            .ok_or_else(|| anyhow!("N8N_API_KEY environment variable is required"))?;

        let n8n = N8nSettings {
            base_url,
            api_key,
            timeout: parse_var(env, "N8N_TIMEOUT", DEFAULT_TIMEOUT_SECS)?,
            max_retries: parse_var(env, "N8N_MAX_RETRIES", DEFAULT_MAX_RETRIES)?,
        };

        let mut mcp = McpSettings::default();
        if let Some(server_name) = optional_var(env, "MCP_SERVER_NAME") {
            mcp.server_name = server_name;
        }

        let defaults = LoggingSettings::default();
        let logging = LoggingSettings {
            level: optional_var(env, "LOG_LEVEL").unwrap_or(defaults.level),
            file: optional_var(env, "LOG_FILE").map(PathBuf::from),
            max_bytes: parse_var(env, "LOG_MAX_BYTES", defaults.max_bytes)?,
            backup_count: parse_var(env, "LOG_BACKUP_COUNT", defaults.backup_count)?,
        };

        let defaults = PerformanceSettings::default();
        let performance = PerformanceSettings {
            cache_ttl: parse_var(env, "N8N_CACHE_TTL", defaults.cache_ttl)?,
            max_concurrent_requests: parse_var(
                env,
                "N8N_MAX_CONCURRENT_REQUESTS",
                defaults.max_concurrent_requests,
            )?,
            ..defaults
        };

        Ok(Self {
            n8n,
            mcp,
            logging,
            performance,
        })
    }

    /// Writes the settings as pretty JSON, creating parent directories.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))
    }

    /// Template written by `init-config`.
    pub fn example() -> Self {
        Self {
            n8n: N8nSettings {
                base_url: "https://your-instance.app.n8n.cloud".to_string(),
                api_key: "YOUR_N8N_API_KEY_HERE".to_string(),
                timeout: DEFAULT_TIMEOUT_SECS,
                max_retries: DEFAULT_MAX_RETRIES,
            },
            mcp: McpSettings::default(),
            logging: LoggingSettings {
                file: Some(PathBuf::from("logs/n8n_mcp_server.log")),
                ..LoggingSettings::default()
            },
            performance: PerformanceSettings::default(),
        }
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            base_url: self.n8n.base_url.clone(),
            api_key: self.n8n.api_key.clone(),
            timeout: Duration::from_secs(self.n8n.timeout),
            max_retries: self.n8n.max_retries,
            cache_ttl: Duration::from_secs(self.performance.cache_ttl),
            retry_base_delay: Duration::from_millis(self.performance.retry_base_delay_ms),
            retry_max_delay: Duration::from_millis(self.performance.retry_max_delay_ms),
            max_concurrent_requests: self.performance.max_concurrent_requests,
        }
    }

    /// Checks the n8n connection settings without touching the network.
    pub fn validate(&self) -> Result<()> {
        self.client_config()
            .validate()
            .context("Invalid n8n configuration")
    }
}

/// Trimmed, non-empty value of `key`.
fn optional_var<E: EnvSource + ?Sized>(env: &E, key: &str) -> Option<String> {
    env.var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_var<E, T>(env: &E, key: &str, default: T) -> Result<T>
where
    E: EnvSource + ?Sized,
    T: FromStr,
    T::Err: fmt::Display,
{
    match optional_var(env, key) {
        Some(raw) => raw
            .parse()
            .map_err(|e| anyhow!("Invalid value for {}: '{}' ({})", key, raw, e)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::env::VarError;
    use tempfile::tempdir;

    fn mock_env(vars: &[(&str, &str)]) -> MockEnvSource {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let mut env = MockEnvSource::new();
        env.expect_var()
            .returning(move |key| vars.get(key).cloned().ok_or(VarError::NotPresent));
        env
    }

    #[test]
    fn test_load_from_env_required_only() {
        let env = mock_env(&[
            ("N8N_BASE_URL", " https://example.app.n8n.cloud "),
            ("N8N_API_KEY", "n8n_api_0123456789"),
        ]);

        let settings = Settings::load_from_env(&env).unwrap();

        assert_eq!(settings.n8n.base_url, "https://example.app.n8n.cloud");
        assert_eq!(settings.n8n.api_key, "n8n_api_0123456789");
        assert_eq!(settings.n8n.timeout, DEFAULT_TIMEOUT_SECS);
        assert_eq!(settings.n8n.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(settings.mcp, McpSettings::default());
        assert_eq!(settings.logging, LoggingSettings::default());
        assert_eq!(settings.performance, PerformanceSettings::default());
    }

    #[test]
    fn test_load_from_env_all_values() {
        let env = mock_env(&[
            ("N8N_BASE_URL", "http://localhost:5678"),
            ("N8N_API_KEY", "n8n_api_0123456789"),
            ("N8N_TIMEOUT", "10"),
            ("N8N_MAX_RETRIES", "5"),
            ("MCP_SERVER_NAME", "custom"),
            ("LOG_LEVEL", "debug"),
            ("LOG_FILE", "/tmp/n8n.log"),
            ("LOG_MAX_BYTES", "2048"),
            ("LOG_BACKUP_COUNT", "2"),
            ("N8N_CACHE_TTL", "0"),
            ("N8N_MAX_CONCURRENT_REQUESTS", "4"),
        ]);

        let settings = Settings::load_from_env(&env).unwrap();

        assert_eq!(settings.n8n.timeout, 10);
        assert_eq!(settings.n8n.max_retries, 5);
        assert_eq!(settings.mcp.server_name, "custom");
        assert_eq!(settings.logging.level, "debug");
        assert_eq!(settings.logging.file, Some(PathBuf::from("/tmp/n8n.log")));
        assert_eq!(settings.logging.max_bytes, 2048);
        assert_eq!(settings.logging.backup_count, 2);
        assert_eq!(settings.performance.cache_ttl, 0);
        assert_eq!(settings.performance.max_concurrent_requests, 4);
    }

    #[test]
    fn test_load_from_env_missing_base_url() {
        let env = mock_env(&[("N8N_API_KEY", "n8n_api_0123456789")]);
        let err = Settings::load_from_env(&env).unwrap_err();
        assert!(err.to_string().contains("N8N_BASE_URL"));
    }

    #[test]
    fn test_load_from_env_blank_api_key() {
        let env = mock_env(&[
            ("N8N_BASE_URL", "https://example.app.n8n.cloud"),
            ("N8N_API_KEY", "   "),
        ]);
        let err = Settings::load_from_env(&env).unwrap_err();
        assert!(err.to_string().contains("N8N_API_KEY"));
    }

    #[test]
    fn test_load_from_env_malformed_number() {
        let env = mock_env(&[
            ("N8N_BASE_URL", "https://example.app.n8n.cloud"),
            ("N8N_API_KEY", "n8n_api_0123456789"),
            ("N8N_TIMEOUT", "thirty"),
        ]);
        let err = Settings::load_from_env(&env).unwrap_err();
        assert!(err.to_string().contains("N8N_TIMEOUT"));
    }

    #[test]
    fn test_load_from_file_with_defaults_and_unknown_sections() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{
                "n8n": {"base_url": "https://example.app.n8n.cloud", "api_key": "n8n_api_0123456789"},
                "security": {"enable_authentication": true},
                "performance": {"cache_ttl": 60}
            }"#,
        )
        .unwrap();

        let settings = Settings::load_from_file(Some(&path)).unwrap();

        assert_eq!(settings.n8n.timeout, DEFAULT_TIMEOUT_SECS);
        assert_eq!(settings.performance.cache_ttl, 60);
        assert_eq!(
            settings.performance.max_concurrent_requests,
            DEFAULT_MAX_CONCURRENT_REQUESTS
        );
        assert_eq!(settings.logging, LoggingSettings::default());
    }

    #[test]
    fn test_load_from_file_missing_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing.json");
        let err = Settings::load_from_file(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("Config file not found"));
    }

    #[test]
    fn test_load_from_file_invalid_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();
        let err = Settings::load_from_file(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("Failed to parse"));
    }

    #[test]
    fn test_save_and_reload_example() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.example.json");

        Settings::example().save_to_file(&path).unwrap();
        let loaded = Settings::load_from_file(Some(&path)).unwrap();

        assert_eq!(loaded, Settings::example());
    }

    #[test]
    fn test_client_config_conversion() {
        let mut settings = Settings::example();
        settings.n8n.timeout = 12;
        settings.performance.cache_ttl = 42;

        let config = settings.client_config();
        assert_eq!(config.timeout, Duration::from_secs(12));
        assert_eq!(config.cache_ttl, Duration::from_secs(42));
        assert_eq!(config.retry_base_delay, Duration::from_millis(DEFAULT_BASE_DELAY_MS));
    }

    #[test]
    fn test_validate_rejects_bad_url() {
        let mut settings = Settings::example();
        settings.n8n.base_url = "your-instance".to_string();
        assert!(settings.validate().is_err());

        settings.n8n.base_url = "https://your-instance.app.n8n.cloud".to_string();
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_log_file_path_is_absolute() {
        let logging = LoggingSettings {
            file: Some(PathBuf::from("logs/server.log")),
            ..LoggingSettings::default()
        };
        let path = logging.log_file_path().unwrap();
        assert!(path.is_absolute());
        assert!(path.ends_with("logs/server.log"));

        assert_eq!(LoggingSettings::default().log_file_path(), None);
    }

    #[test]
    fn test_debug_masks_api_key() {
        let rendered = format!("{:?}", Settings::example());
        assert!(!rendered.contains("YOUR_N8N_API_KEY_HERE"));
    }
}
