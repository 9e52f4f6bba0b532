//! Shared data model: seeds, credentials, device inventory, adjacency and
//! reachability records.

use chrono::{DateTime, Utc};
use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;

use crate::error::DeviceError;

/// Default management port for seeds and crawled neighbors
pub const DEFAULT_MANAGEMENT_PORT: u16 = 22;

/// A username/password pair tried against devices in caller order.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Credential {
    pub username: String,
    #[serde(skip_serializing, default)]
    pub password: String,
    /// Secret for entering privileged (enable) mode
    #[serde(skip_serializing, default)]
    pub enable_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

impl Credential {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            enable_secret: None,
            port: None,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_enable_secret(mut self, secret: impl Into<String>) -> Self {
        self.enable_secret = Some(secret.into());
        self
    }

    /// Port to use for this credential, falling back to the seed's port
    pub fn effective_port(&self, seed_port: u16) -> u16 {
        self.port.unwrap_or(seed_port)
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("enable_secret", &self.enable_secret.as_ref().map(|_| "<redacted>"))
            .field("port", &self.port)
            .finish()
    }
}

/// The credential that opened a session, without its secret
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRef {
    pub username: String,
    pub port: u16,
}

/// Operator-supplied starting point: a single host or a CIDR block.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SeedAddress {
    Host(IpAddr),
    Network(IpNetwork),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SeedDevice {
    pub address: SeedAddress,
    pub port: Option<u16>,
}

impl SeedDevice {
    pub fn host(ip: IpAddr) -> Self {
        Self {
            address: SeedAddress::Host(ip),
            port: None,
        }
    }

    /// Parse `host`, `host:port`, `[v6]:port`, bare IPv6 or `a.b.c.d/len`.
    pub fn parse(input: &str) -> Result<Self, String> {
        let input = input.trim();
        if input.is_empty() {
            return Err("empty seed device".to_string());
        }

        if input.contains('/') {
            let network: IpNetwork = input
                .parse()
                .map_err(|e| format!("invalid CIDR '{}': {}", input, e))?;
            return Ok(Self {
                address: SeedAddress::Network(network),
                port: None,
            });
        }

        if let Some(rest) = input.strip_prefix('[') {
            let (host, tail) = rest
                .split_once(']')
                .ok_or_else(|| format!("unterminated IPv6 literal '{}'", input))?;
            let ip: IpAddr = host
                .parse()
                .map_err(|_| format!("invalid IPv6 address '{}'", host))?;
            let port = match tail.strip_prefix(':') {
                Some(p) => Some(parse_port(p)?),
                None if tail.is_empty() => None,
                None => return Err(format!("unexpected trailing text in '{}'", input)),
            };
            return Ok(Self {
                address: SeedAddress::Host(ip),
                port,
            });
        }

        if let Ok(ip) = input.parse::<IpAddr>() {
            return Ok(Self::host(ip));
        }

        let (host, port) = input
            .rsplit_once(':')
            .ok_or_else(|| format!("invalid seed device '{}'", input))?;
        let ip: IpAddr = host
            .parse()
            .map_err(|_| format!("invalid IP address '{}'", host))?;
        Ok(Self {
            address: SeedAddress::Host(ip),
            port: Some(parse_port(port)?),
        })
    }

    /// Host address if this seed names a single device
    pub fn host_ip(&self) -> Option<IpAddr> {
        match self.address {
            SeedAddress::Host(ip) => Some(ip),
            SeedAddress::Network(_) => None,
        }
    }

    pub fn management_port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_MANAGEMENT_PORT)
    }
}

fn parse_port(text: &str) -> Result<u16, String> {
    match text.parse::<u16>() {
        Ok(0) | Err(_) => Err(format!("invalid port '{}'", text)),
        Ok(port) => Ok(port),
    }
}

impl std::fmt::Display for SeedDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.address, self.port) {
            (SeedAddress::Network(net), _) => write!(f, "{}", net),
            (SeedAddress::Host(IpAddr::V6(ip)), Some(port)) => write!(f, "[{}]:{}", ip, port),
            (SeedAddress::Host(ip), Some(port)) => write!(f, "{}:{}", ip, port),
            (SeedAddress::Host(ip), None) => write!(f, "{}", ip),
        }
    }
}

/// Outcome of logging into a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Success,
    Failed,
    Unreachable,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionStatus::Success => write!(f, "success"),
            ConnectionStatus::Failed => write!(f, "failed"),
            ConnectionStatus::Unreachable => write!(f, "unreachable"),
        }
    }
}

/// Non-owning pointer at the far end of a link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectedTo {
    pub device: String,
    pub interface: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InterfaceRecord {
    pub name: String,
    pub description: Option<String>,
    pub status: Option<String>,
    pub mac_address: Option<String>,
    pub ip_address: Option<IpAddr>,
    pub prefix_len: Option<u8>,
    pub connected_to: Option<ConnectedTo>,
}

impl InterfaceRecord {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Inventory record for one device, keyed by management IP.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub ip_address: IpAddr,
    pub hostname: Option<String>,
    /// Vendor family tag detected by the adapter (e.g. `cisco_ios`)
    pub device_type: Option<String>,
    pub platform: Option<String>,
    pub vendor: Option<String>,
    pub model: Option<String>,
    pub os_version: Option<String>,
    pub serial_number: Option<String>,
    pub uptime: Option<String>,
    pub credentials_used: Option<CredentialRef>,
    pub interfaces: Vec<InterfaceRecord>,
    pub status: ConnectionStatus,
    pub error: Option<DeviceError>,
    /// Crawl depth at which the device was visited, when crawled
    pub depth: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<String>,
    pub all_ip_addresses: Vec<IpAddr>,
    pub last_seen: DateTime<Utc>,
}

impl DeviceRecord {
    pub fn new(ip_address: IpAddr, status: ConnectionStatus) -> Self {
        Self {
            ip_address,
            hostname: None,
            device_type: None,
            platform: None,
            vendor: None,
            model: None,
            os_version: None,
            serial_number: None,
            uptime: None,
            credentials_used: None,
            interfaces: Vec::new(),
            status,
            error: None,
            depth: None,
            config: None,
            all_ip_addresses: vec![ip_address],
            last_seen: Utc::now(),
        }
    }

    pub fn failed(ip_address: IpAddr, error: DeviceError) -> Self {
        let status = match error.kind {
            crate::error::DeviceErrorKind::Unreachable => ConnectionStatus::Unreachable,
            _ => ConnectionStatus::Failed,
        };
        let mut record = Self::new(ip_address, status);
        record.error = Some(error);
        record
    }

    /// Display name: hostname when known, else the management IP
    pub fn display_name(&self) -> String {
        self.hostname
            .clone()
            .unwrap_or_else(|| self.ip_address.to_string())
    }

    /// Merge another observation of the same device, keeping the most
    /// complete record. A successful login always wins over a failure.
    pub fn merge_from(&mut self, other: DeviceRecord) {
        if other.status == ConnectionStatus::Success && self.status != ConnectionStatus::Success {
            let mut other = other;
            let fresh = DeviceRecord::new(other.ip_address, other.status);
            let previous = std::mem::replace(self, fresh);
            for ip in previous.all_ip_addresses {
                if !other.all_ip_addresses.contains(&ip) {
                    other.all_ip_addresses.push(ip);
                }
            }
            other.depth = match (other.depth, previous.depth) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };
            *self = other;
            return;
        }

        fill(&mut self.hostname, other.hostname);
        fill(&mut self.device_type, other.device_type);
        fill(&mut self.platform, other.platform);
        fill(&mut self.vendor, other.vendor);
        fill(&mut self.model, other.model);
        fill(&mut self.os_version, other.os_version);
        fill(&mut self.serial_number, other.serial_number);
        fill(&mut self.uptime, other.uptime);
        fill(&mut self.credentials_used, other.credentials_used);
        fill(&mut self.config, other.config);
        if self.interfaces.is_empty() {
            self.interfaces = other.interfaces;
        }
        for ip in other.all_ip_addresses {
            if !self.all_ip_addresses.contains(&ip) {
                self.all_ip_addresses.push(ip);
            }
        }
        self.depth = match (self.depth, other.depth) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        if self.last_seen < other.last_seen {
            self.last_seen = other.last_seen;
        }
    }
}

fn fill<T>(slot: &mut Option<T>, value: Option<T>) {
    if slot.is_none() {
        *slot = value;
    }
}

/// Neighbor discovery protocol that produced an adjacency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NeighborProtocol {
    Cdp,
    Lldp,
}

impl NeighborProtocol {
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "cdp" => Some(NeighborProtocol::Cdp),
            "lldp" => Some(NeighborProtocol::Lldp),
            _ => None,
        }
    }
}

/// One row of a device's neighbor table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Neighbor {
    pub hostname: Option<String>,
    pub ip_address: Option<IpAddr>,
    pub local_interface: Option<String>,
    pub remote_interface: Option<String>,
    pub platform: Option<String>,
    pub protocol: NeighborProtocol,
}

/// One device's report of a directly attached neighbor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjacencyEdge {
    pub local_ip: IpAddr,
    pub local_name: String,
    pub local_interface: Option<String>,
    pub neighbor_ip: Option<IpAddr>,
    pub neighbor_name: Option<String>,
    pub neighbor_interface: Option<String>,
    pub protocol: NeighborProtocol,
}

/// ICMP and TCP liveness of one address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReachabilityResult {
    pub ip: IpAddr,
    pub icmp_reachable: bool,
    pub open_ports: Vec<u16>,
}

impl ReachabilityResult {
    pub fn unreachable(ip: IpAddr) -> Self {
        Self {
            ip,
            icmp_reachable: false,
            open_ports: Vec::new(),
        }
    }

    /// Alive by ICMP or by any open port
    pub fn is_live(&self) -> bool {
        self.icmp_reachable || !self.open_ports.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReachabilitySummary {
    pub total_scanned: usize,
    pub icmp_reachable: usize,
    pub live_hosts: usize,
    /// Open count per probed port; every requested port has an entry
    pub ports_open: BTreeMap<u16, usize>,
}

impl ReachabilitySummary {
    pub fn from_results(results: &[ReachabilityResult], probe_ports: &[u16]) -> Self {
        let mut ports_open: BTreeMap<u16, usize> = probe_ports.iter().map(|p| (*p, 0)).collect();
        let mut icmp_reachable = 0;
        let mut live_hosts = 0;

        for result in results {
            if result.icmp_reachable {
                icmp_reachable += 1;
            }
            if result.is_live() {
                live_hosts += 1;
            }
            for port in &result.open_ports {
                *ports_open.entry(*port).or_insert(0) += 1;
            }
        }

        Self {
            total_scanned: results.len(),
            icmp_reachable,
            live_hosts,
            ports_open,
        }
    }
}

/// Complete output of one reachability scan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReachabilityReport {
    pub results: Vec<ReachabilityResult>,
    pub summary: ReachabilitySummary,
    pub duration_secs: f64,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DeviceErrorKind;

    #[test]
    fn test_parse_seed_forms() {
        let seed = SeedDevice::parse("10.0.0.1").unwrap();
        assert_eq!(seed.host_ip(), Some("10.0.0.1".parse().unwrap()));
        assert_eq!(seed.management_port(), 22);

        let seed = SeedDevice::parse("10.0.0.1:2222").unwrap();
        assert_eq!(seed.port, Some(2222));

        let seed = SeedDevice::parse("[2001:db8::1]:830").unwrap();
        assert_eq!(seed.host_ip(), Some("2001:db8::1".parse().unwrap()));
        assert_eq!(seed.port, Some(830));

        let seed = SeedDevice::parse("2001:db8::1").unwrap();
        assert_eq!(seed.port, None);

        let seed = SeedDevice::parse("192.168.1.0/24").unwrap();
        assert!(seed.host_ip().is_none());
        assert_eq!(seed.to_string(), "192.168.1.0/24");
    }

    #[test]
    fn test_parse_seed_rejects_garbage() {
        assert!(SeedDevice::parse("").is_err());
        assert!(SeedDevice::parse("router-1").is_err());
        assert!(SeedDevice::parse("10.0.0.1:0").is_err());
        assert!(SeedDevice::parse("10.0.0.1:99999").is_err());
        assert!(SeedDevice::parse("10.0.0.0/40").is_err());
    }

    #[test]
    fn test_credential_debug_redacts_password() {
        let cred = Credential::new("admin", "hunter2").with_enable_secret("s3cret-en");
        let rendered = format!("{:?}", cred);
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("s3cret-en"));
        let json = serde_json::to_string(&cred).unwrap();
        assert!(!json.contains("hunter2"));
        assert!(!json.contains("s3cret-en"));
    }

    #[test]
    fn test_credential_reads_enable_secret() {
        let cred: Credential = serde_json::from_str(
            r#"{"username": "admin", "password": "pw", "enable_secret": "en"}"#,
        )
        .unwrap();
        assert_eq!(cred.enable_secret.as_deref(), Some("en"));

        let plain: Credential =
            serde_json::from_str(r#"{"username": "admin", "password": "pw"}"#).unwrap();
        assert!(plain.enable_secret.is_none());
    }

    #[test]
    fn test_merge_prefers_successful_record() {
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        let mut failed = DeviceRecord::failed(
            ip,
            DeviceError::new("10.0.0.1", DeviceErrorKind::AuthExhausted, "denied"),
        );
        failed.depth = Some(1);

        let mut ok = DeviceRecord::new(ip, ConnectionStatus::Success);
        ok.hostname = Some("core-1".to_string());
        ok.depth = Some(2);

        failed.merge_from(ok);
        assert_eq!(failed.status, ConnectionStatus::Success);
        assert_eq!(failed.hostname.as_deref(), Some("core-1"));
        assert_eq!(failed.depth, Some(1));
    }

    #[test]
    fn test_summary_counts_every_requested_port() {
        let results = vec![
            ReachabilityResult {
                ip: "10.0.0.1".parse().unwrap(),
                icmp_reachable: true,
                open_ports: vec![22],
            },
            ReachabilityResult::unreachable("10.0.0.2".parse().unwrap()),
        ];
        let summary = ReachabilitySummary::from_results(&results, &[22, 443]);
        assert_eq!(summary.total_scanned, 2);
        assert_eq!(summary.icmp_reachable, 1);
        assert_eq!(summary.live_hosts, 1);
        assert_eq!(summary.ports_open.get(&22), Some(&1));
        assert_eq!(summary.ports_open.get(&443), Some(&0));
    }
}
