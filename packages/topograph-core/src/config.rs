use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_CONCURRENCY: usize = 200;
pub const DEFAULT_PROBE_PORTS: [u16; 2] = [22, 443];
pub const DEFAULT_CONCURRENT_CONNECTIONS: usize = 10;
pub const DEFAULT_MAX_DEPTH: u32 = 3;
pub const DEFAULT_TCP_PROBE_TIMEOUT_MS: u64 = 2000;
pub const DEFAULT_JOB_TTL_SECS: u64 = 3600;
pub const DEFAULT_MAX_HOSTS_PER_TARGET: usize = 65536;
pub const DEFAULT_RETRY_COUNT: u32 = 2;

const ENV_TIMEOUT: &str = "TOPOGRAPH_TIMEOUT";
const ENV_CONCURRENCY: &str = "TOPOGRAPH_CONCURRENCY";
const ENV_PROBE_PORTS: &str = "TOPOGRAPH_PROBE_PORTS";
const ENV_JOB_TTL: &str = "TOPOGRAPH_JOB_TTL";
const ENV_RETRY_COUNT: &str = "TOPOGRAPH_RETRY_COUNT";

/// Configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFile {
    pub discovery: Option<DiscoverySection>,
}

/// `[discovery]` table; every key is optional
#[derive(Debug, Deserialize, Default)]
pub struct DiscoverySection {
    pub timeout: Option<u64>,
    pub concurrency: Option<usize>,
    pub probe_ports: Option<Vec<u16>>,
    pub concurrent_connections: Option<usize>,
    pub max_depth: Option<u32>,
    pub tcp_probe_timeout_ms: Option<u64>,
    pub job_ttl: Option<u64>,
    pub hostname_fallback: Option<bool>,
    pub max_hosts_per_target: Option<usize>,
    pub retry_count: Option<u32>,
}

/// Where a configuration value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigSource {
    /// Using default hardcoded values
    Default,
    /// Loaded from environment variable
    Environment,
    /// Loaded from config file
    ConfigFile,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::Default => write!(f, "default"),
            ConfigSource::Environment => write!(f, "environment variable"),
            ConfigSource::ConfigFile => write!(f, "config file"),
        }
    }
}

/// Engine-wide defaults. Every request field overrides the matching value.
#[derive(Debug, Clone, Serialize)]
pub struct EngineConfig {
    pub timeout_secs: u64,
    pub concurrency: usize,
    pub probe_ports: Vec<u16>,
    pub concurrent_connections: usize,
    pub max_depth: u32,
    pub tcp_probe_timeout_ms: u64,
    pub job_ttl_secs: u64,
    /// Match topology ends by normalized hostname when no IP is known
    pub hostname_fallback: bool,
    pub max_hosts_per_target: usize,
    /// Extra connect attempts after an unreachable or timed-out login
    pub retry_count: u32,
    pub sources: BTreeMap<&'static str, ConfigSource>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            concurrency: DEFAULT_CONCURRENCY,
            probe_ports: DEFAULT_PROBE_PORTS.to_vec(),
            concurrent_connections: DEFAULT_CONCURRENT_CONNECTIONS,
            max_depth: DEFAULT_MAX_DEPTH,
            tcp_probe_timeout_ms: DEFAULT_TCP_PROBE_TIMEOUT_MS,
            job_ttl_secs: DEFAULT_JOB_TTL_SECS,
            hostname_fallback: false,
            max_hosts_per_target: DEFAULT_MAX_HOSTS_PER_TARGET,
            retry_count: DEFAULT_RETRY_COUNT,
            sources: BTreeMap::new(),
        }
    }
}

impl EngineConfig {
    pub fn tcp_probe_timeout(&self) -> Duration {
        Duration::from_millis(self.tcp_probe_timeout_ms)
    }

    pub fn job_ttl(&self) -> Duration {
        Duration::from_secs(self.job_ttl_secs)
    }

    /// Source of a named value, `Default` when never overridden
    pub fn source_of(&self, key: &str) -> ConfigSource {
        self.sources.get(key).copied().unwrap_or(ConfigSource::Default)
    }

    /// Apply the `[discovery]` table of a config file
    pub fn apply_file(&mut self, section: DiscoverySection) {
        let src = ConfigSource::ConfigFile;
        if let Some(v) = section.timeout.filter(|v| *v > 0) {
            self.timeout_secs = v;
            self.sources.insert("timeout_secs", src);
        }
        if let Some(v) = section.concurrency.filter(|v| *v > 0) {
            self.concurrency = v;
            self.sources.insert("concurrency", src);
        }
        if let Some(v) = section.probe_ports.filter(|v| !v.is_empty()) {
            self.probe_ports = v;
            self.sources.insert("probe_ports", src);
        }
        if let Some(v) = section.concurrent_connections.filter(|v| *v > 0) {
            self.concurrent_connections = v;
            self.sources.insert("concurrent_connections", src);
        }
        if let Some(v) = section.max_depth {
            self.max_depth = v;
            self.sources.insert("max_depth", src);
        }
        if let Some(v) = section.tcp_probe_timeout_ms.filter(|v| *v > 0) {
            self.tcp_probe_timeout_ms = v;
            self.sources.insert("tcp_probe_timeout_ms", src);
        }
        if let Some(v) = section.job_ttl {
            self.job_ttl_secs = v;
            self.sources.insert("job_ttl_secs", src);
        }
        if let Some(v) = section.hostname_fallback {
            self.hostname_fallback = v;
            self.sources.insert("hostname_fallback", src);
        }
        if let Some(v) = section.max_hosts_per_target.filter(|v| *v > 0) {
            self.max_hosts_per_target = v;
            self.sources.insert("max_hosts_per_target", src);
        }
        if let Some(v) = section.retry_count {
            self.retry_count = v;
            self.sources.insert("retry_count", src);
        }
    }

    /// Apply environment overrides through `lookup` (normally `std::env::var`).
    /// Unparseable values are logged and ignored.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let src = ConfigSource::Environment;

        if let Some(v) = env_number::<u64>(&lookup, ENV_TIMEOUT).filter(|v| *v > 0) {
            self.timeout_secs = v;
            self.sources.insert("timeout_secs", src);
        }
        if let Some(v) = env_number::<usize>(&lookup, ENV_CONCURRENCY).filter(|v| *v > 0) {
            self.concurrency = v;
            self.sources.insert("concurrency", src);
        }
        if let Some(raw) = lookup(ENV_PROBE_PORTS) {
            match parse_port_list(&raw) {
                Some(ports) => {
                    self.probe_ports = ports;
                    self.sources.insert("probe_ports", src);
                }
                None => tracing::warn!("Ignoring invalid {}: {:?}", ENV_PROBE_PORTS, raw),
            }
        }
        if let Some(v) = env_number::<u64>(&lookup, ENV_JOB_TTL) {
            self.job_ttl_secs = v;
            self.sources.insert("job_ttl_secs", src);
        }
        if let Some(v) = env_number::<u32>(&lookup, ENV_RETRY_COUNT) {
            self.retry_count = v;
            self.sources.insert("retry_count", src);
        }
    }
}

fn env_number<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("Ignoring invalid {}: {:?}", key, raw);
            None
        }
    }
}

/// Parse a comma separated port list such as `22,443,830`
pub fn parse_port_list(raw: &str) -> Option<Vec<u16>> {
    let mut ports = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        match part.parse::<u16>() {
            Ok(0) | Err(_) => return None,
            Ok(port) if !ports.contains(&port) => ports.push(port),
            Ok(_) => {}
        }
    }
    if ports.is_empty() { None } else { Some(ports) }
}

/// Get the path to the configuration file
fn get_config_file_path() -> Option<PathBuf> {
    dirs::config_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
        .map(|p| p.join("topograph").join("config.toml"))
}

/// Parse config file content
pub fn parse_config(content: &str) -> Result<ConfigFile> {
    toml::from_str(content).context("invalid topograph config")
}

fn read_config_file(path: &Path) -> Result<ConfigFile> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {:?}", path))?;
    parse_config(&content).with_context(|| format!("Failed to parse config file {:?}", path))
}

/// Load configuration from the config file, if one exists
fn load_config_file() -> Option<ConfigFile> {
    let path = get_config_file_path()?;

    if !path.exists() {
        return None;
    }

    match read_config_file(&path) {
        Ok(config) => {
            tracing::debug!("Loaded config from {:?}", path);
            Some(config)
        }
        Err(e) => {
            tracing::warn!("{:#}", e);
            None
        }
    }
}

/// Load engine configuration with priority:
/// 1. Environment variables (TOPOGRAPH_*)
/// 2. Config file (~/.config/topograph/config.toml)
/// 3. Default values
pub fn load_engine_config() -> EngineConfig {
    let mut config = EngineConfig::default();

    if let Some(section) = load_config_file().and_then(|f| f.discovery) {
        config.apply_file(section);
    }

    config.apply_env(|key| std::env::var(key).ok());

    for (key, source) in &config.sources {
        tracing::debug!("Config {} from {}", key, source);
    }

    config
}

/// Get the path to the config file for documentation purposes
pub fn get_config_file_path_string() -> String {
    get_config_file_path()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "~/.config/topograph/config.toml".to_string())
}

/// Generate example config file content
pub fn generate_example_config() -> String {
    r#"# Topograph Configuration
# Place this file at: ~/.config/topograph/config.toml
# Environment variables (TOPOGRAPH_TIMEOUT, TOPOGRAPH_CONCURRENCY,
# TOPOGRAPH_PROBE_PORTS, TOPOGRAPH_JOB_TTL, TOPOGRAPH_RETRY_COUNT)
# take precedence.

[discovery]
# Whole-job deadline in seconds
# timeout = 60

# Parallel reachability probes
# concurrency = 200

# TCP ports probed on every address
# probe_ports = [22, 443]

# Parallel device sessions while crawling
# concurrent_connections = 10

# max_depth = 3
# tcp_probe_timeout_ms = 2000

# Extra login attempts when a device is unreachable or times out
# retry_count = 2

# Seconds a finished job stays queryable
# job_ttl = 3600

# Match topology link ends by hostname when no management IP is known.
# Can merge distinct devices that share a hostname.
# hostname_fallback = false
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.timeout_secs, 60);
        assert_eq!(config.concurrency, 200);
        assert_eq!(config.probe_ports, vec![22, 443]);
        assert_eq!(config.concurrent_connections, 10);
        assert_eq!(config.max_depth, 3);
        assert!(!config.hostname_fallback);
        assert_eq!(config.retry_count, 2);
        assert_eq!(config.source_of("timeout_secs"), ConfigSource::Default);
    }

    #[test]
    fn test_env_overrides_file() {
        let file =
            parse_config("[discovery]\ntimeout = 30\nconcurrency = 50\nretry_count = 4\n")
                .unwrap();
        let mut config = EngineConfig::default();
        config.apply_file(file.discovery.unwrap());

        let env: HashMap<&str, &str> =
            HashMap::from([("TOPOGRAPH_TIMEOUT", "90"), ("TOPOGRAPH_PROBE_PORTS", "22, 830")]);
        config.apply_env(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.timeout_secs, 90);
        assert_eq!(config.source_of("timeout_secs"), ConfigSource::Environment);
        assert_eq!(config.concurrency, 50);
        assert_eq!(config.source_of("concurrency"), ConfigSource::ConfigFile);
        assert_eq!(config.probe_ports, vec![22, 830]);
        assert_eq!(config.retry_count, 4);
        assert_eq!(config.source_of("retry_count"), ConfigSource::ConfigFile);
    }

    #[test]
    fn test_invalid_env_values_are_ignored() {
        let mut config = EngineConfig::default();
        config.apply_env(|k| match k {
            "TOPOGRAPH_CONCURRENCY" => Some("lots".to_string()),
            "TOPOGRAPH_PROBE_PORTS" => Some("22,0".to_string()),
            _ => None,
        });
        assert_eq!(config.concurrency, 200);
        assert_eq!(config.probe_ports, vec![22, 443]);
    }

    #[test]
    fn test_example_config_parses() {
        let parsed = parse_config(&generate_example_config()).unwrap();
        let section = parsed.discovery.unwrap();
        assert!(section.timeout.is_none());
    }

    #[test]
    fn test_bad_config_is_error() {
        assert!(parse_config("[discovery]\ntimeout = \"soon\"\n").is_err());
    }
}
