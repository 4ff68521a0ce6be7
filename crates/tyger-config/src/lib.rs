//! Layered configuration for the `tyger` server and CLI.
//!
//! A `Config` struct with `#[serde(default)]` sections, a directory-walking
//! `find_config`, and a `merge` that lets a more specific layer override a
//! more general one. Split here into [`ServerConfig`] (listen address, API-version
//! advertisement, sweep intervals, data-plane tuning) and [`ClientConfig`]
//! (server URL, API version pin, local cache file), since the server and
//! CLI binaries don't share a process and shouldn't share a config type.

use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const SERVER_CONFIG_FILE: &str = ".tyger-server.toml";
pub const CLIENT_CONFIG_FILE: &str = ".tyger.toml";
pub const CACHE_FILE_ENV_VAR: &str = "TYGER_CACHE_FILE";
const ENV_PREFIX: &str = "TYGER_";

pub fn config_path(dir: &Path, file_name: &str) -> PathBuf {
    dir.join(file_name)
}

/// Walk up from `start_dir` looking for `file_name`, so a config file at a
/// workspace root is found from any subdirectory beneath it.
pub fn find_config(start_dir: &Path, file_name: &str) -> Option<PathBuf> {
    let mut current = start_dir;
    loop {
        let candidate = current.join(file_name);
        if candidate.exists() {
            return Some(candidate);
        }
        match current.parent() {
            Some(parent) => current = parent,
            None => return None,
        }
    }
}

// ---------------------------------------------------------------------
// Server configuration
// ---------------------------------------------------------------------

/// The full set of server-side tunables (§6.1's endpoint surface, §4.7's
/// sweep, and C1–C3's data-plane defaults), loaded from `.tyger-server.toml`
/// with every field defaulted so a bare invocation still starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_address: String,
    pub supported_api_versions: Vec<String>,
    pub state_dir: PathBuf,
    pub sweep: SweepConfig,
    pub dataplane: DataplaneConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0:8080".to_string(),
            supported_api_versions: vec!["1.0".to_string()],
            state_dir: PathBuf::from(".tyger-state"),
            sweep: SweepConfig::default(),
            dataplane: DataplaneConfig::default(),
        }
    }
}

/// Controls the background sweepers (C8): how often they tick, and how
/// long a soft-deleted buffer survives before it is purged.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    pub interval_secs: u64,
    pub buffer_evict_after_secs: u64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            buffer_evict_after_secs: 7 * 24 * 60 * 60,
        }
    }
}

/// Data-plane defaults (C1–C3), seeded from `tyger-dataplane`'s own
/// constants so the config file's defaults never drift from the block
/// writer/reader's compiled-in ones.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataplaneConfig {
    pub dop: usize,
    pub block_size: usize,
    pub access_url_safety_margin_secs: i64,
}

impl Default for DataplaneConfig {
    fn default() -> Self {
        Self {
            dop: tyger_dataplane::DEFAULT_DOP,
            block_size: tyger_dataplane::DEFAULT_BLOCK_SIZE,
            access_url_safety_margin_secs: 30,
        }
    }
}

impl ServerConfig {
    pub fn load(dir: &Path) -> Result<Self> {
        let path = config_path(dir, SERVER_CONFIG_FILE);
        load_toml_or_default(&path)
    }

    pub fn save(&self, dir: &Path) -> Result<()> {
        save_toml(&config_path(dir, SERVER_CONFIG_FILE), self)
    }
}

// ---------------------------------------------------------------------
// Client configuration
// ---------------------------------------------------------------------

/// CLI-side configuration, built by layering defaults, a `.tyger.toml`
/// file (optional, discovered by walking up from the current directory),
/// `TYGER_*` environment variables, then explicit CLI-flag overrides —
/// each later layer wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub server_url: Option<String>,
    pub api_version: Option<String>,
    pub cache_file: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: None,
            api_version: None,
            cache_file: None,
        }
    }
}

impl ClientConfig {
    /// `other`'s `Some` fields win; `self`'s are kept where `other` is
    /// `None`. Used to fold each layer (file, env, CLI flags) in turn
    /// over the running configuration.
    pub fn merge(&self, other: &ClientConfig) -> ClientConfig {
        ClientConfig {
            server_url: other.server_url.clone().or_else(|| self.server_url.clone()),
            api_version: other.api_version.clone().or_else(|| self.api_version.clone()),
            cache_file: other.cache_file.clone().or_else(|| self.cache_file.clone()),
        }
    }

    /// Read `TYGER_SERVER_URL` / `TYGER_API_VERSION` / `TYGER_CACHE_FILE`
    /// into a config fragment ready to merge over the file layer.
    pub fn from_env() -> ClientConfig {
        ClientConfig {
            server_url: env_var("SERVER_URL"),
            api_version: env_var("API_VERSION"),
            cache_file: env::var(CACHE_FILE_ENV_VAR).ok().map(PathBuf::from),
        }
    }

    /// Resolve the cache file location: an explicit override, else
    /// `TYGER_CACHE_FILE`, else `~/.tyger/cache.json`.
    pub fn resolved_cache_file(&self) -> PathBuf {
        self.cache_file.clone().unwrap_or_else(default_cache_file)
    }

    /// The full defaults → file → env → CLI-flags layering. `start_dir`
    /// is where the file search begins (normally the current directory);
    /// `cli_overrides` is whatever the CLI's argument parser produced.
    pub fn resolve(start_dir: &Path, cli_overrides: ClientConfig) -> Result<ClientConfig> {
        let mut config = ClientConfig::default();

        if let Some(path) = find_config(start_dir, CLIENT_CONFIG_FILE) {
            let from_file: ClientConfig = load_toml_or_default(&path)?;
            config = config.merge(&from_file);
        }

        config = config.merge(&ClientConfig::from_env());
        config = config.merge(&cli_overrides);
        Ok(config)
    }
}

fn env_var(suffix: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}{suffix}")).ok()
}

fn default_cache_file() -> PathBuf {
    let home = env::var("HOME").or_else(|_| env::var("USERPROFILE")).unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".tyger").join("cache.json")
}

// ---------------------------------------------------------------------
// Shared TOML load/save helpers
// ---------------------------------------------------------------------

fn load_toml_or_default<T>(path: &Path) -> Result<T>
where
    T: Default + for<'de> Deserialize<'de>,
{
    if !path.exists() {
        return Ok(T::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    toml::from_str(&content)
        .with_context(|| format!("failed to parse config file: {}", path.display()))
}

fn save_toml<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let content = toml::to_string_pretty(value).context("failed to serialize config to TOML")?;
    std::fs::write(path, content)
        .with_context(|| format!("failed to write config file: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn server_config_default_has_sane_listen_address() {
        let config = ServerConfig::default();
        assert_eq!(config.listen_address, "0.0.0.0:8080");
        assert_eq!(config.supported_api_versions, vec!["1.0".to_string()]);
    }

    #[test]
    fn server_config_load_missing_file_is_default() {
        let td = tempdir().unwrap();
        let config = ServerConfig::load(td.path()).unwrap();
        assert_eq!(config.sweep.interval_secs, 30);
    }

    #[test]
    fn server_config_save_then_load_round_trips() {
        let td = tempdir().unwrap();
        let mut config = ServerConfig::default();
        config.listen_address = "127.0.0.1:9090".to_string();
        config.save(td.path()).unwrap();

        let loaded = ServerConfig::load(td.path()).unwrap();
        assert_eq!(loaded.listen_address, "127.0.0.1:9090");
    }

    #[test]
    fn client_config_merge_prefers_other_when_set() {
        let base = ClientConfig {
            server_url: Some("https://a".to_string()),
            api_version: None,
            cache_file: None,
        };
        let override_layer = ClientConfig {
            server_url: Some("https://b".to_string()),
            api_version: Some("1.0".to_string()),
            cache_file: None,
        };
        let merged = base.merge(&override_layer);
        assert_eq!(merged.server_url.as_deref(), Some("https://b"));
        assert_eq!(merged.api_version.as_deref(), Some("1.0"));
    }

    #[test]
    fn client_config_merge_keeps_base_when_other_is_none() {
        let base = ClientConfig {
            server_url: Some("https://a".to_string()),
            api_version: None,
            cache_file: None,
        };
        let merged = base.merge(&ClientConfig::default());
        assert_eq!(merged.server_url.as_deref(), Some("https://a"));
    }

    #[test]
    fn resolve_picks_up_config_file_from_nested_dir() {
        let td = tempdir().unwrap();
        std::fs::write(
            td.path().join(CLIENT_CONFIG_FILE),
            "server_url = \"https://file.example\"\n",
        )
        .unwrap();
        let nested = td.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();

        let resolved = ClientConfig::resolve(&nested, ClientConfig::default()).unwrap();
        assert_eq!(resolved.server_url.as_deref(), Some("https://file.example"));
    }

    #[test]
    fn resolve_cli_override_wins_over_file() {
        let td = tempdir().unwrap();
        std::fs::write(
            td.path().join(CLIENT_CONFIG_FILE),
            "server_url = \"https://file.example\"\n",
        )
        .unwrap();

        let cli = ClientConfig {
            server_url: Some("https://cli.example".to_string()),
            api_version: None,
            cache_file: None,
        };
        let resolved = ClientConfig::resolve(td.path(), cli).unwrap();
        assert_eq!(resolved.server_url.as_deref(), Some("https://cli.example"));
    }

    #[test]
    fn resolved_cache_file_falls_back_to_home_dir() {
        let config = ClientConfig::default();
        let path = config.resolved_cache_file();
        assert!(path.ends_with(".tyger/cache.json"));
    }
}
