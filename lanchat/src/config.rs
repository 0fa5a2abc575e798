//! Load config from file, environment and command line.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use lanchat_core::protocol::is_valid_name;
use lanchat_core::{DEFAULT_DISCOVERY_TIMEOUT_MS, DEFAULT_MAX_PEERS, MAX_NAME_LEN};
use serde::Deserialize;

/// Chat configuration. File: ~/.config/lanchat/config.toml or /etc/lanchat/config.toml.
/// Env overrides: LANCHAT_PORT, LANCHAT_TARGET, LANCHAT_BIND_ADDRESS, LANCHAT_NAME,
/// LANCHAT_DISCOVERY_TIMEOUT_MS.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Chat and discovery UDP port (default 11001).
    #[serde(default = "default_port")]
    pub port: u16,
    /// Broadcast or multicast address solicitations go to (default 239.255.11.1).
    #[serde(default = "default_target")]
    pub target: Ipv4Addr,
    /// This host's interface address; control messages from it are ignored. When unset,
    /// the address the kernel routes `target` through is used.
    #[serde(default)]
    pub bind_address: Option<Ipv4Addr>,
    /// Display name, at most 10 characters.
    #[serde(default)]
    pub name: String,
    /// Discovery collection window in milliseconds (default 5000).
    #[serde(default = "default_discovery_timeout_ms")]
    pub discovery_timeout_ms: u64,
    /// Run one discovery round before reading input (default true).
    #[serde(default = "default_discover_on_start")]
    pub discover_on_start: bool,
    /// Repeat discovery every this many seconds. Off when unset.
    #[serde(default)]
    pub rediscover_interval_secs: Option<u64>,
    /// Peer set capacity (default 255).
    #[serde(default = "default_max_peers")]
    pub max_peers: usize,
    /// Peers admitted at start without discovery.
    #[serde(default)]
    pub peers: Vec<SocketAddr>,
}

fn default_port() -> u16 {
    11001
}
fn default_target() -> Ipv4Addr {
    Ipv4Addr::new(239, 255, 11, 1)
}
fn default_discovery_timeout_ms() -> u64 {
    DEFAULT_DISCOVERY_TIMEOUT_MS
}
fn default_discover_on_start() -> bool {
    true
}
fn default_max_peers() -> usize {
    DEFAULT_MAX_PEERS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            target: default_target(),
            bind_address: None,
            name: String::new(),
            discovery_timeout_ms: default_discovery_timeout_ms(),
            discover_on_start: default_discover_on_start(),
            rediscover_interval_secs: None,
            max_peers: default_max_peers(),
            peers: Vec::new(),
        }
    }
}

impl Config {
    /// Where solicitations are sent.
    pub fn target_addr(&self) -> SocketAddr {
        SocketAddr::from((self.target, self.port))
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }

    pub fn rediscover_interval(&self) -> Option<Duration> {
        self.rediscover_interval_secs.map(Duration::from_secs)
    }

    /// Apply LANCHAT_* overrides from `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(s) = lookup("LANCHAT_PORT") {
            self.port = parse_env("LANCHAT_PORT", &s)?;
        }
        if let Some(s) = lookup("LANCHAT_TARGET") {
            self.target = parse_env("LANCHAT_TARGET", &s)?;
        }
        if let Some(s) = lookup("LANCHAT_BIND_ADDRESS") {
            self.bind_address = Some(parse_env("LANCHAT_BIND_ADDRESS", &s)?);
        }
        if let Some(s) = lookup("LANCHAT_NAME") {
            self.name = s;
        }
        if let Some(s) = lookup("LANCHAT_DISCOVERY_TIMEOUT_MS") {
            self.discovery_timeout_ms = parse_env("LANCHAT_DISCOVERY_TIMEOUT_MS", &s)?;
        }
        Ok(())
    }

    /// Reject settings the chat loop cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::Invalid("a display name is required".into()));
        }
        if !is_valid_name(&self.name) {
            return Err(ConfigError::Invalid(format!(
                "the name must be at most {} characters",
                MAX_NAME_LEN
            )));
        }
        if self.port == 0 {
            return Err(ConfigError::Invalid("port must be non-zero".into()));
        }
        if self.max_peers == 0 {
            return Err(ConfigError::Invalid("max_peers must be non-zero".into()));
        }
        if self.discovery_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "discovery_timeout_ms must be non-zero".into(),
            ));
        }
        if self.rediscover_interval_secs == Some(0) {
            return Err(ConfigError::Invalid(
                "rediscover_interval_secs must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(var: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Env {
        var,
        value: value.to_string(),
    })
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid value {value:?} for {var}")]
    Env { var: &'static str, value: String },
    #[error("{0}")]
    Invalid(String),
}

/// Load config: default, then config file (explicit path, else the first default path that exists),
/// then env vars.
pub fn load(explicit: Option<&Path>) -> Result<Config, ConfigError> {
    let mut c = match explicit {
        Some(p) => load_file(p)?,
        None => match config_paths().into_iter().find(|p| p.exists()) {
            Some(p) => load_file(&p)?,
            None => Config::default(),
        },
    };
    c.apply_env(|k| std::env::var(k).ok())?;
    Ok(c)
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/lanchat/config.toml"));
    }
    out.push(PathBuf::from("/etc/lanchat/config.toml"));
    out
}

fn load_file(path: &Path) -> Result<Config, ConfigError> {
    let s = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse(&s).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

pub fn parse(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str(s)
}
