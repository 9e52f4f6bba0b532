//! Discovery requests: modes, methods, and validation into job parameters.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use crate::adapter::ConnectOptions;
use crate::config::EngineConfig;
use crate::error::{DiscoveryError, Result};
use crate::exclude::ExcludeFilter;
use crate::model::{Credential, NeighborProtocol, SeedAddress, SeedDevice};
use crate::scanner::targets;

const MAX_JOB_ID_LEN: usize = 128;

/// Pipeline shape selected by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiscoveryMode {
    Subnet,
    SeedDevice,
    #[default]
    FullPipeline,
}

impl DiscoveryMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscoveryMode::Subnet => "subnet",
            DiscoveryMode::SeedDevice => "seed-device",
            DiscoveryMode::FullPipeline => "full-pipeline",
        }
    }

    /// Methods this mode runs, with `auto`'s resolution first
    pub fn accepted_methods(&self) -> &'static [DiscoveryMethod] {
        match self {
            DiscoveryMode::Subnet => {
                &[DiscoveryMethod::IpReachability, DiscoveryMethod::SubnetScan]
            }
            DiscoveryMode::SeedDevice => &[
                DiscoveryMethod::IpReachability,
                DiscoveryMethod::SeedDeviceIntrospection,
            ],
            DiscoveryMode::FullPipeline => &[DiscoveryMethod::NeighborDiscovery],
        }
    }

    pub fn resolve_method(&self, method: DiscoveryMethod) -> Result<DiscoveryMethod> {
        let accepted = self.accepted_methods();
        if method == DiscoveryMethod::Auto {
            return Ok(accepted[0]);
        }
        if accepted.contains(&method) {
            Ok(method)
        } else {
            Err(DiscoveryError::validation(format!(
                "method '{}' is not valid for mode '{}'",
                method.as_str(),
                self.as_str()
            )))
        }
    }
}

impl std::fmt::Display for DiscoveryMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DiscoveryMode {
    type Err = DiscoveryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "subnet" => Ok(DiscoveryMode::Subnet),
            "seed-device" => Ok(DiscoveryMode::SeedDevice),
            "full-pipeline" => Ok(DiscoveryMode::FullPipeline),
            other => Err(DiscoveryError::validation(format!("unknown mode '{}'", other))),
        }
    }
}

/// Discovery technique within a mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryMethod {
    #[default]
    Auto,
    NeighborDiscovery,
    SubnetScan,
    IpReachability,
    SeedDeviceIntrospection,
}

impl DiscoveryMethod {
    pub fn all() -> &'static [DiscoveryMethod] {
        &[
            DiscoveryMethod::Auto,
            DiscoveryMethod::NeighborDiscovery,
            DiscoveryMethod::SubnetScan,
            DiscoveryMethod::IpReachability,
            DiscoveryMethod::SeedDeviceIntrospection,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DiscoveryMethod::Auto => "auto",
            DiscoveryMethod::NeighborDiscovery => "neighbor_discovery",
            DiscoveryMethod::SubnetScan => "subnet_scan",
            DiscoveryMethod::IpReachability => "ip_reachability",
            DiscoveryMethod::SeedDeviceIntrospection => "seed_device_introspection",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            DiscoveryMethod::Auto => "Pick the default method for the requested mode",
            DiscoveryMethod::NeighborDiscovery => {
                "Crawl outward from seed devices over CDP/LLDP neighbor tables and build a topology"
            }
            DiscoveryMethod::SubnetScan => {
                "Sweep the given networks, then log into every live host for inventory"
            }
            DiscoveryMethod::IpReachability => "ICMP and TCP port liveness sweep",
            DiscoveryMethod::SeedDeviceIntrospection => {
                "Full inventory of the seed devices plus a sweep of their connected subnets"
            }
        }
    }

    /// Modes that accept this method
    pub fn modes(&self) -> Vec<DiscoveryMode> {
        [
            DiscoveryMode::Subnet,
            DiscoveryMode::SeedDevice,
            DiscoveryMode::FullPipeline,
        ]
        .into_iter()
        .filter(|mode| *self == DiscoveryMethod::Auto || mode.accepted_methods().contains(self))
        .collect()
    }
}

impl std::fmt::Display for DiscoveryMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DiscoveryMethod {
    type Err = DiscoveryError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase().replace('-', "_");
        DiscoveryMethod::all()
            .iter()
            .find(|m| m.as_str() == wanted)
            .copied()
            .ok_or_else(|| DiscoveryError::validation(format!("unknown method '{}'", s)))
    }
}

/// Caller-facing request; unset fields take the engine defaults
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DiscoveryRequest {
    pub seed_devices: Vec<String>,
    pub credentials: Vec<Credential>,
    pub mode: DiscoveryMode,
    pub method: DiscoveryMethod,
    pub max_depth: Option<u32>,
    pub timeout: Option<u64>,
    pub concurrent_connections: Option<usize>,
    pub probe_ports: Option<Vec<u16>>,
    pub concurrency: Option<usize>,
    pub job_id: Option<String>,
    pub discovery_protocols: Option<Vec<String>>,
    pub exclude_patterns: Vec<String>,
    pub retry_count: Option<u32>,
}

/// Validated, fully resolved job inputs
#[derive(Debug, Clone, Serialize)]
pub struct JobParams {
    pub seeds: Vec<SeedDevice>,
    #[serde(skip)]
    pub credentials: Vec<Credential>,
    pub credential_count: usize,
    pub mode: DiscoveryMode,
    pub method: DiscoveryMethod,
    pub max_depth: u32,
    pub timeout_secs: u64,
    pub concurrent_connections: usize,
    pub probe_ports: Vec<u16>,
    pub concurrency: usize,
    pub protocols: Vec<NeighborProtocol>,
    pub exclude_patterns: Vec<String>,
    #[serde(skip)]
    pub exclude: ExcludeFilter,
    pub hostname_fallback: bool,
    pub max_hosts_per_target: usize,
    pub retry_count: u32,
}

impl JobParams {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn connect_options(&self) -> ConnectOptions {
        ConnectOptions::new(self.timeout()).with_retries(self.retry_count)
    }

    /// Whether the pipeline logs into devices
    pub fn needs_credentials(&self) -> bool {
        match self.mode {
            DiscoveryMode::Subnet => self.method == DiscoveryMethod::SubnetScan,
            DiscoveryMode::SeedDevice | DiscoveryMode::FullPipeline => true,
        }
    }

    pub fn host_seeds(&self) -> impl Iterator<Item = &SeedDevice> {
        self.seeds.iter().filter(|s| s.host_ip().is_some())
    }

    pub fn network_seeds(&self) -> impl Iterator<Item = &SeedAddress> {
        self.seeds
            .iter()
            .map(|s| &s.address)
            .filter(|a| matches!(a, SeedAddress::Network(_)))
    }
}

fn require_positive(name: &str, value: usize) -> Result<usize> {
    if value == 0 {
        Err(DiscoveryError::validation(format!("{} must be at least 1", name)))
    } else {
        Ok(value)
    }
}

pub fn validate_job_id(id: &str) -> Result<()> {
    if id.is_empty() || id.len() > MAX_JOB_ID_LEN {
        return Err(DiscoveryError::validation(format!(
            "job_id must be 1-{} characters",
            MAX_JOB_ID_LEN
        )));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(DiscoveryError::validation(format!(
            "job_id '{}' may only contain letters, digits, '-', '_' and '.'",
            id
        )));
    }
    Ok(())
}

impl DiscoveryRequest {
    /// Validate against `config` and resolve defaults.
    ///
    /// Returns the caller-supplied job id, if any, alongside the parameters.
    pub fn resolve(self, config: &EngineConfig) -> Result<(Option<String>, JobParams)> {
        if let Some(id) = &self.job_id {
            validate_job_id(id)?;
        }
        let method = self.mode.resolve_method(self.method)?;

        if self.seed_devices.is_empty() {
            return Err(DiscoveryError::validation(format!(
                "mode '{}' requires seed_devices",
                self.mode
            )));
        }
        let seeds = self
            .seed_devices
            .iter()
            .map(|raw| {
                SeedDevice::parse(raw).map_err(|e| {
                    DiscoveryError::validation(format!("invalid seed '{}': {}", raw, e))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let max_hosts_per_target = config.max_hosts_per_target;
        for seed in &seeds {
            if let SeedAddress::Network(network) = &seed.address {
                let hosts = targets::host_count(network);
                if hosts > max_hosts_per_target as u128 {
                    return Err(DiscoveryError::validation(format!(
                        "{} has {} hosts, more than the limit of {}",
                        network, hosts, max_hosts_per_target
                    )));
                }
            }
        }

        let protocols = match &self.discovery_protocols {
            Some(names) => names
                .iter()
                .map(|n| {
                    NeighborProtocol::parse(n).ok_or_else(|| {
                        DiscoveryError::validation(format!("unknown discovery protocol '{}'", n))
                    })
                })
                .collect::<Result<Vec<_>>>()?,
            None => vec![NeighborProtocol::Cdp, NeighborProtocol::Lldp],
        };

        let probe_ports = self.probe_ports.unwrap_or_else(|| config.probe_ports.clone());
        if probe_ports.contains(&0) {
            return Err(DiscoveryError::validation("probe port 0 is not valid"));
        }

        let timeout_secs = self.timeout.unwrap_or(config.timeout_secs);
        if timeout_secs == 0 {
            return Err(DiscoveryError::validation("timeout must be at least 1 second"));
        }

        let params = JobParams {
            credential_count: self.credentials.len(),
            credentials: self.credentials,
            mode: self.mode,
            method,
            max_depth: self.max_depth.unwrap_or(config.max_depth),
            timeout_secs,
            concurrent_connections: require_positive(
                "concurrent_connections",
                self.concurrent_connections
                    .unwrap_or(config.concurrent_connections),
            )?,
            probe_ports,
            concurrency: require_positive(
                "concurrency",
                self.concurrency.unwrap_or(config.concurrency),
            )?,
            protocols,
            exclude: ExcludeFilter::new(&self.exclude_patterns)?,
            exclude_patterns: self.exclude_patterns,
            hostname_fallback: config.hostname_fallback,
            max_hosts_per_target,
            retry_count: self.retry_count.unwrap_or(config.retry_count),
            seeds,
        };

        if params.needs_credentials() {
            if params.credentials.is_empty() {
                return Err(DiscoveryError::validation(format!(
                    "mode '{}' with method '{}' requires credentials",
                    params.mode, params.method
                )));
            }
            if params.mode != DiscoveryMode::Subnet && params.host_seeds().next().is_none() {
                return Err(DiscoveryError::validation(format!(
                    "mode '{}' requires at least one seed device address (not only networks)",
                    params.mode
                )));
            }
        }
        if params.mode == DiscoveryMode::FullPipeline && params.protocols.is_empty() {
            return Err(DiscoveryError::validation(
                "full-pipeline requires at least one discovery protocol",
            ));
        }

        Ok((self.job_id, params))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(mode: DiscoveryMode, method: DiscoveryMethod) -> DiscoveryRequest {
        DiscoveryRequest {
            seed_devices: vec!["10.0.0.1".to_string()],
            credentials: vec![Credential::new("ops", "pw")],
            mode,
            method,
            ..Default::default()
        }
    }

    #[test]
    fn test_auto_resolution() {
        let config = EngineConfig::default();
        for (mode, expected) in [
            (DiscoveryMode::Subnet, DiscoveryMethod::IpReachability),
            (DiscoveryMode::SeedDevice, DiscoveryMethod::IpReachability),
            (DiscoveryMode::FullPipeline, DiscoveryMethod::NeighborDiscovery),
        ] {
            let (_, params) = request(mode, DiscoveryMethod::Auto).resolve(&config).unwrap();
            assert_eq!(params.method, expected, "mode {}", mode);
        }
    }

    #[test]
    fn test_incompatible_method_rejected() {
        let err = request(DiscoveryMode::FullPipeline, DiscoveryMethod::SubnetScan)
            .resolve(&EngineConfig::default())
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::Validation(_)));

        let err = request(DiscoveryMode::Subnet, DiscoveryMethod::SeedDeviceIntrospection)
            .resolve(&EngineConfig::default())
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::Validation(_)));
    }

    #[test]
    fn test_defaults_come_from_config() {
        let mut config = EngineConfig::default();
        config.concurrency = 50;
        config.probe_ports = vec![22];
        let (id, params) = request(DiscoveryMode::Subnet, DiscoveryMethod::Auto)
            .resolve(&config)
            .unwrap();
        assert!(id.is_none());
        assert_eq!(params.concurrency, 50);
        assert_eq!(params.probe_ports, vec![22]);
        assert_eq!(params.max_depth, 3);
        assert_eq!(params.timeout(), Duration::from_secs(60));
        assert_eq!(params.concurrent_connections, 10);
        assert_eq!(params.retry_count, 2);
        assert_eq!(params.protocols, vec![NeighborProtocol::Cdp, NeighborProtocol::Lldp]);
    }

    #[test]
    fn test_credentials_required_when_logging_in() {
        let config = EngineConfig::default();
        let mut req = request(DiscoveryMode::FullPipeline, DiscoveryMethod::Auto);
        req.credentials.clear();
        assert!(req.resolve(&config).is_err());

        // A plain reachability sweep needs none
        let mut req = request(DiscoveryMode::Subnet, DiscoveryMethod::Auto);
        req.credentials.clear();
        assert!(req.resolve(&config).is_ok());

        let mut req = request(DiscoveryMode::Subnet, DiscoveryMethod::SubnetScan);
        req.credentials.clear();
        assert!(req.resolve(&config).is_err());
    }

    #[test]
    fn test_seed_validation() {
        let config = EngineConfig::default();
        let mut req = request(DiscoveryMode::Subnet, DiscoveryMethod::Auto);
        req.seed_devices = vec!["not-an-address".to_string()];
        assert!(req.resolve(&config).is_err());

        let mut req = request(DiscoveryMode::Subnet, DiscoveryMethod::Auto);
        req.seed_devices.clear();
        assert!(req.resolve(&config).is_err());

        let mut req = request(DiscoveryMode::FullPipeline, DiscoveryMethod::Auto);
        req.seed_devices = vec!["10.0.0.0/24".to_string()];
        assert!(req.resolve(&config).is_err());

        let mut req = request(DiscoveryMode::Subnet, DiscoveryMethod::Auto);
        req.seed_devices = vec!["10.0.0.0/8".to_string()];
        assert!(req.resolve(&config).is_err());
    }

    #[test]
    fn test_job_id_and_options_validation() {
        let config = EngineConfig::default();
        let mut req = request(DiscoveryMode::Subnet, DiscoveryMethod::Auto);
        req.job_id = Some("nightly scan".to_string());
        assert!(req.resolve(&config).is_err());

        let mut req = request(DiscoveryMode::Subnet, DiscoveryMethod::Auto);
        req.job_id = Some("nightly-2024.01".to_string());
        let (id, _) = req.resolve(&config).unwrap();
        assert_eq!(id.as_deref(), Some("nightly-2024.01"));

        let mut req = request(DiscoveryMode::FullPipeline, DiscoveryMethod::Auto);
        req.discovery_protocols = Some(vec!["ospf".to_string()]);
        assert!(req.resolve(&config).is_err());

        let mut req = request(DiscoveryMode::Subnet, DiscoveryMethod::Auto);
        req.concurrency = Some(0);
        assert!(req.resolve(&config).is_err());

        let mut req = request(DiscoveryMode::Subnet, DiscoveryMethod::Auto);
        req.exclude_patterns = vec!["[".to_string()];
        assert!(req.resolve(&config).is_err());
    }

    #[test]
    fn test_request_deserializes_with_defaults() {
        let req: DiscoveryRequest = serde_json::from_str(
            r#"{"seed_devices": ["10.0.0.1:2222"], "credentials": [{"username": "ops", "password": "pw"}], "mode": "seed-device"}"#,
        )
        .unwrap();
        assert_eq!(req.mode, DiscoveryMode::SeedDevice);
        assert_eq!(req.method, DiscoveryMethod::Auto);
        assert_eq!(req.credentials[0].password, "pw");
    }

    #[test]
    fn test_method_listing() {
        assert_eq!(DiscoveryMethod::all().len(), 5);
        assert_eq!(DiscoveryMethod::SubnetScan.modes(), vec![DiscoveryMode::Subnet]);
        assert_eq!(
            "seed_device_introspection".parse::<DiscoveryMethod>().unwrap(),
            DiscoveryMethod::SeedDeviceIntrospection
        );
        assert_eq!(
            "full_pipeline".parse::<DiscoveryMode>().unwrap(),
            DiscoveryMode::FullPipeline
        );
    }
}
