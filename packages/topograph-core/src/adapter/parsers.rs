//! Text parsers for vendor CLI output.
//!
//! Every parser is tolerant: unknown lines are skipped and a missing field
//! stays `None`. Callers decide whether an empty result is a parse failure.

use regex::Regex;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::LazyLock;

use super::vendor::VendorFamily;
use crate::model::{InterfaceRecord, Neighbor, NeighborProtocol};

type Pattern = LazyLock<Option<Regex>>;

macro_rules! pattern {
    ($name:ident, $re:expr) => {
        static $name: Pattern = LazyLock::new(|| Regex::new($re).ok());
    };
}

fn capture(pattern: &Pattern, text: &str) -> Option<String> {
    pattern
        .as_ref()?
        .captures(text)?
        .get(1)
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Split `text` into sections that each start at a match of `header`
fn sections<'a>(header: &Pattern, text: &'a str) -> Vec<&'a str> {
    let Some(re) = header.as_ref() else {
        return Vec::new();
    };
    let starts: Vec<usize> = re.find_iter(text).map(|m| m.start()).collect();
    starts
        .iter()
        .enumerate()
        .map(|(i, start)| {
            let end = starts.get(i + 1).copied().unwrap_or(text.len());
            &text[*start..end]
        })
        .collect()
}

pattern!(IPV4, r"\b(\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3})\b");

fn first_ipv4(text: &str) -> Option<Ipv4Addr> {
    IPV4.as_ref()?
        .captures_iter(text)
        .filter_map(|c| c.get(1)?.as_str().parse().ok())
        .next()
}

/// Identity facts read from `show version` and friends
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VersionFacts {
    pub hostname: Option<String>,
    pub os_version: Option<String>,
    pub model: Option<String>,
    pub serial_number: Option<String>,
    pub uptime: Option<String>,
}

impl VersionFacts {
    pub fn is_empty(&self) -> bool {
        self.hostname.is_none()
            && self.os_version.is_none()
            && self.model.is_none()
            && self.serial_number.is_none()
    }
}

pattern!(IOS_VERSION, r"(?i)Cisco IOS.*?Version\s+([^,\s]+)");
pattern!(IOS_MODEL, r"(?im)^cisco\s+([\w\-/]+)\s.*processor");
pattern!(IOS_SERIAL, r"(?i)Processor board ID\s+(\w+)");
pattern!(IOS_UPTIME_LINE, r"(?m)^(\S+)\s+uptime is\s+(.+)$");
pattern!(NXOS_VERSION, r"(?i)(?:NXOS|system):\s+version\s+(\S+)");
pattern!(NXOS_MODEL, r"(?im)^\s*cisco\s+Nexus\s*(.+?)\s+[Cc]hassis");
pattern!(NXOS_HOSTNAME, r"(?i)Device name:\s*(\S+)");
pattern!(NXOS_UPTIME, r"(?i)Kernel uptime is\s+(.+)");
pattern!(EOS_VERSION, r"(?i)(?:Software image version|EOS version):\s*(\S+)");
pattern!(EOS_MODEL, r"(?m)^Arista\s+(\S+)");
pattern!(EOS_SERIAL, r"(?i)Serial number:\s*(\S+)");
pattern!(EOS_UPTIME, r"(?i)Uptime:\s*(.+)");
pattern!(JUNOS_VERSION, r"(?i)(?:Junos:\s*|JUNOS [^\[\n]*\[)([\w.\-]+)");
pattern!(JUNOS_MODEL, r"(?i)Model:\s*(\S+)");
pattern!(JUNOS_HOSTNAME, r"(?i)Hostname:\s*(\S+)");
pattern!(GENERIC_VERSION, r"(?i)\bversion:?\s+(\S+)");
pattern!(CONFIG_HOSTNAME, r"(?m)^\s*(?:hostname|host-name|set system host-name)\s+(\S+?);?\s*$");
pattern!(SHOW_HOSTNAME, r"(?im)^\s*Hostname:\s*(\S+)");

/// Identify the vendor family from `show version` output
pub fn detect_family(version_output: &str) -> VendorFamily {
    let lower = version_output.to_lowercase();
    if lower.contains("nx-os") || lower.contains("nexus") {
        VendorFamily::CiscoNxos
    } else if lower.contains("arista") {
        VendorFamily::AristaEos
    } else if lower.contains("junos") {
        VendorFamily::JuniperJunos
    } else if lower.contains("cisco ios") || lower.contains("internetwork operating system") {
        VendorFamily::CiscoIos
    } else {
        VendorFamily::Generic
    }
}

pub fn parse_version(family: VendorFamily, text: &str) -> VersionFacts {
    match family {
        VendorFamily::CiscoIos => {
            let (hostname, uptime) = IOS_UPTIME_LINE
                .as_ref()
                .and_then(|re| re.captures(text))
                .map(|c| {
                    (
                        c.get(1).map(|m| m.as_str().to_string()),
                        c.get(2).map(|m| m.as_str().trim().to_string()),
                    )
                })
                .unwrap_or((None, None));
            VersionFacts {
                hostname,
                os_version: capture(&IOS_VERSION, text),
                model: capture(&IOS_MODEL, text),
                serial_number: capture(&IOS_SERIAL, text),
                uptime,
            }
        }
        VendorFamily::CiscoNxos => VersionFacts {
            hostname: capture(&NXOS_HOSTNAME, text),
            os_version: capture(&NXOS_VERSION, text),
            model: capture(&NXOS_MODEL, text).map(|m| format!("Nexus {}", m)),
            serial_number: capture(&IOS_SERIAL, text),
            uptime: capture(&NXOS_UPTIME, text),
        },
        VendorFamily::AristaEos => VersionFacts {
            hostname: None,
            os_version: capture(&EOS_VERSION, text),
            model: capture(&EOS_MODEL, text),
            serial_number: capture(&EOS_SERIAL, text),
            uptime: capture(&EOS_UPTIME, text),
        },
        VendorFamily::JuniperJunos => VersionFacts {
            hostname: capture(&JUNOS_HOSTNAME, text),
            os_version: capture(&JUNOS_VERSION, text),
            model: capture(&JUNOS_MODEL, text),
            serial_number: None,
            uptime: None,
        },
        VendorFamily::Generic => VersionFacts {
            os_version: capture(&GENERIC_VERSION, text),
            ..Default::default()
        },
    }
}

/// Hostname from `show hostname` style output, or a bare single word
pub fn parse_hostname(text: &str) -> Option<String> {
    if let Some(name) = capture(&SHOW_HOSTNAME, text) {
        return Some(name);
    }
    let trimmed = text.trim();
    if !trimmed.is_empty() && !trimmed.contains(char::is_whitespace) {
        return Some(trimmed.to_string());
    }
    None
}

/// Hostname from a configuration dump
pub fn parse_config_hostname(config: &str) -> Option<String> {
    capture(&CONFIG_HOSTNAME, config).map(|h| h.trim_matches('"').to_string())
}

/// Whether the device rejected a command instead of answering it
pub fn is_command_error(output: &str) -> bool {
    let head = output.trim_start();
    head.starts_with("% Invalid")
        || head.starts_with("% Unknown")
        || head.starts_with("% Incomplete")
        || head.starts_with("syntax error")
        || head.starts_with("unknown command")
}

pattern!(CISCO_IF_HEADER, r"(?m)^([A-Za-z][\w\-/.:]*\d)\s+is\s+(administratively down|up|down)");
pattern!(CISCO_IF_PROTOCOL, r"(?i)line protocol is\s+(\w+)");
pattern!(CISCO_IF_DESCRIPTION, r"(?m)^\s*Description:\s*(.+)$");
pattern!(CISCO_IF_MAC, r"(?i)address is\s+([0-9a-f]{4}\.[0-9a-f]{4}\.[0-9a-f]{4}|[0-9a-f]{2}(?::[0-9a-f]{2}){5})");
pattern!(CISCO_IF_IP, r"(?i)Internet address is\s+(\d+\.\d+\.\d+\.\d+)/(\d+)");
pattern!(JUNOS_IF_HEADER, r"(?m)^Physical interface:\s*([^,\s]+)");
pattern!(JUNOS_IF_STATUS, r"(?i)Physical link is\s+(\w+)");
pattern!(JUNOS_IF_MAC, r"(?i)Current address:\s*([0-9a-f:]{17})");
pattern!(JUNOS_IF_IP, r"(?i)Destination:\s*[\d.]+/(\d+),\s*Local:\s*(\d+\.\d+\.\d+\.\d+)");

/// Parse `show interfaces` output into interface records
pub fn parse_interfaces(family: VendorFamily, text: &str) -> Vec<InterfaceRecord> {
    match family {
        VendorFamily::JuniperJunos => parse_junos_interfaces(text),
        VendorFamily::Generic => Vec::new(),
        _ => parse_cisco_style_interfaces(text),
    }
}

fn parse_cisco_style_interfaces(text: &str) -> Vec<InterfaceRecord> {
    let mut interfaces = Vec::new();
    for section in sections(&CISCO_IF_HEADER, text) {
        let Some(header) = CISCO_IF_HEADER.as_ref().and_then(|re| re.captures(section)) else {
            continue;
        };
        let mut record = InterfaceRecord::named(&header[1]);
        let admin = header[2].to_string();
        record.status = capture(&CISCO_IF_PROTOCOL, section).or(Some(admin));
        record.description = capture(&CISCO_IF_DESCRIPTION, section);
        record.mac_address =
            capture(&CISCO_IF_MAC, section).and_then(|m| super::oui::normalize_mac(&m));
        if let Some(c) = CISCO_IF_IP.as_ref().and_then(|re| re.captures(section)) {
            record.ip_address = c[1].parse().ok();
            record.prefix_len = c[2].parse().ok();
        }
        interfaces.push(record);
    }
    interfaces
}

fn parse_junos_interfaces(text: &str) -> Vec<InterfaceRecord> {
    let mut interfaces = Vec::new();
    for section in sections(&JUNOS_IF_HEADER, text) {
        let Some(name) = capture(&JUNOS_IF_HEADER, section) else {
            continue;
        };
        let mut record = InterfaceRecord::named(name);
        record.status = capture(&JUNOS_IF_STATUS, section).map(|s| s.to_lowercase());
        record.description = capture(&CISCO_IF_DESCRIPTION, section);
        record.mac_address =
            capture(&JUNOS_IF_MAC, section).and_then(|m| super::oui::normalize_mac(&m));
        if let Some(c) = JUNOS_IF_IP.as_ref().and_then(|re| re.captures(section)) {
            record.prefix_len = c[1].parse().ok();
            record.ip_address = c[2].parse().ok();
        }
        interfaces.push(record);
    }
    interfaces
}

/// One address row from an interface brief listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceAddress {
    pub interface: String,
    pub ip: Ipv4Addr,
    /// Absent when the listing shows only the address (IOS, NX-OS)
    pub prefix_len: Option<u8>,
    pub loopback: bool,
}

pattern!(BRIEF_ADDRESS, r"^(\d+\.\d+\.\d+\.\d+)(?:/(\d+))?$");

pub fn is_loopback_name(name: &str) -> bool {
    let lower = name.to_lowercase();
    lower.starts_with("loopback")
        || lower.starts_with("lo0")
        || (lower.starts_with("lo") && lower[2..].starts_with(|c: char| c.is_ascii_digit()))
}

/// Parse `show ip interface brief` / `show interfaces terse` rows
pub fn parse_interface_brief(text: &str) -> Vec<InterfaceAddress> {
    let Some(addr_re) = BRIEF_ADDRESS.as_ref() else {
        return Vec::new();
    };
    let mut rows = Vec::new();

    for line in text.lines() {
        let mut tokens = line.split_whitespace();
        let Some(name) = tokens.next() else {
            continue;
        };
        if name.eq_ignore_ascii_case("interface") {
            continue;
        }
        for token in tokens {
            let Some(c) = addr_re.captures(token) else {
                continue;
            };
            let Ok(ip) = c[1].parse::<Ipv4Addr>() else {
                break;
            };
            let prefix_len = c
                .get(2)
                .and_then(|m| m.as_str().parse::<u8>().ok())
                .filter(|p| *p <= 32);
            rows.push(InterfaceAddress {
                interface: name.to_string(),
                ip,
                prefix_len,
                loopback: is_loopback_name(name),
            });
            break;
        }
    }

    rows
}

pattern!(ROUTE_SUBNETTED, r"^\s*(\d+\.\d+\.\d+\.\d+)/(\d+)\s+is\s+subnetted");
pattern!(ROUTE_CONNECTED, r"^\s*[CL]\*?\s+(\d+\.\d+\.\d+\.\d+)(?:/(\d+))?\s+is\s+(?:directly\s+)?connected");
pattern!(ROUTE_NXOS, r"^(\d+\.\d+\.\d+\.\d+)/(\d+),\s+ubest");
pattern!(ROUTE_JUNOS, r"^(\d+\.\d+\.\d+\.\d+)/(\d+)\s+\*?\[(?:Direct|Local)/");
pattern!(ROUTE_BARE, r"(\d+\.\d+\.\d+\.\d+)/(\d+)\s+is\s+directly\s+connected");

/// Default prefix for classful route lines with no header
const LEGACY_ROUTE_PREFIX: u8 = 24;

fn classful_prefix(ip: Ipv4Addr) -> u8 {
    match ip.octets()[0] {
        0..=127 => 8,
        128..=191 => 16,
        _ => 24,
    }
}

fn same_major_network(a: Ipv4Addr, b: Ipv4Addr) -> bool {
    let shift = 32 - u32::from(classful_prefix(a));
    u32::from(a) >> shift == u32::from(b) >> shift
}

/// Parse connected/direct routes into `(address, prefix_len)` pairs.
///
/// Legacy IOS lines without a prefix (`C 10.1.1.0 is directly connected`)
/// take the mask of the preceding `x/len is subnetted` header when they fall
/// in the same major network, else /24.
pub fn parse_connected_routes(text: &str) -> Vec<(Ipv4Addr, u8)> {
    let mut routes = Vec::new();
    let mut header: Option<(Ipv4Addr, u8)> = None;

    for line in text.lines() {
        if let Some(c) = ROUTE_SUBNETTED.as_ref().and_then(|re| re.captures(line)) {
            header = match (c[1].parse::<Ipv4Addr>(), c[2].parse::<u8>()) {
                (Ok(net), Ok(len)) => Some((net, len)),
                _ => None,
            };
            continue;
        }

        let found = [&ROUTE_CONNECTED, &ROUTE_NXOS, &ROUTE_JUNOS, &ROUTE_BARE]
            .into_iter()
            .find_map(|p| p.as_ref().and_then(|re| re.captures(line)));
        let Some(c) = found else {
            continue;
        };
        let Ok(ip) = c[1].parse::<Ipv4Addr>() else {
            continue;
        };
        let prefix = match c.get(2) {
            Some(m) => m.as_str().parse::<u8>().ok(),
            None => Some(
                header
                    .filter(|(net, _)| same_major_network(*net, ip))
                    .map(|(_, len)| len)
                    .unwrap_or(LEGACY_ROUTE_PREFIX),
            ),
        };
        if let Some(prefix) = prefix.filter(|p| *p <= 32) {
            routes.push((ip, prefix));
        }
    }

    routes
}

pattern!(SECTION_RULE, r"(?m)^\s*[-=]{4,}\s*$");
pattern!(CDP_DEVICE_ID, r"Device ID:\s*([\w.\-]+)");
pattern!(CDP_IP, r"(?i)(?:IP|IPv4)\s+address:\s*(\d+\.\d+\.\d+\.\d+)");
pattern!(CDP_PLATFORM, r"Platform:\s*([^,\n]+)");
pattern!(CDP_LOCAL_IF, r"(?m)^Interface:\s*([^,\n]+)");
pattern!(CDP_REMOTE_IF, r"Port ID \(outgoing port\):\s*(\S+)");

/// Split detail output on `----` / `====` rules
fn rule_sections(text: &str) -> Vec<&str> {
    match SECTION_RULE.as_ref() {
        Some(re) => re.split(text).filter(|s| !s.trim().is_empty()).collect(),
        None => vec![text],
    }
}

/// Parse `show cdp neighbors detail`
pub fn parse_cdp_neighbors(text: &str) -> Vec<Neighbor> {
    rule_sections(text)
        .into_iter()
        .filter_map(|section| {
            let hostname = capture(&CDP_DEVICE_ID, section)?;
            Some(Neighbor {
                hostname: Some(hostname),
                ip_address: capture(&CDP_IP, section).and_then(|ip| ip.parse().ok()),
                local_interface: capture(&CDP_LOCAL_IF, section),
                remote_interface: capture(&CDP_REMOTE_IF, section),
                platform: capture(&CDP_PLATFORM, section),
                protocol: NeighborProtocol::Cdp,
            })
        })
        .collect()
}

pattern!(LLDP_LOCAL_IF, r"(?m)^\s*Local (?:Intf|Interface|Port id):\s*(\S+)");
pattern!(LLDP_REMOTE_IF, r#"(?mi)^\s*-?\s*Port id\s*:\s*"?([^"\n]+?)"?\s*$"#);
pattern!(LLDP_SYSTEM_NAME, r#"(?m)^\s*-?\s*System Name:\s*"?([\w.\-]+)"?"#);
pattern!(LLDP_DESCRIPTION, r#"(?m)^\s*-?\s*System Description:\s*\n?\s*"?([^"\n]+)"?"#);
pattern!(EOS_LLDP_HEADER, r"(?m)^Interface\s+(\S+)\s+detected\s+\d+\s+LLDP neighbors");

/// Management address: the first IPv4 in the lines after the label
fn lldp_management_ip(section: &str) -> Option<IpAddr> {
    let start = section.find("Management Address")?;
    let window: String = section[start..].lines().take(3).collect::<Vec<_>>().join("\n");
    first_ipv4(&window).map(IpAddr::V4)
}

fn lldp_neighbor(section: &str, local_interface: Option<String>) -> Option<Neighbor> {
    let hostname = capture(&LLDP_SYSTEM_NAME, section);
    let ip_address = lldp_management_ip(section);
    if hostname.is_none() && ip_address.is_none() {
        return None;
    }
    Some(Neighbor {
        hostname,
        ip_address,
        local_interface: local_interface.or_else(|| capture(&LLDP_LOCAL_IF, section)),
        remote_interface: capture(&LLDP_REMOTE_IF, section),
        platform: capture(&LLDP_DESCRIPTION, section),
        protocol: NeighborProtocol::Lldp,
    })
}

/// Parse LLDP neighbor output for `family`
pub fn parse_lldp_neighbors(family: VendorFamily, text: &str) -> Vec<Neighbor> {
    match family {
        VendorFamily::JuniperJunos => parse_junos_lldp_table(text),
        VendorFamily::AristaEos if EOS_LLDP_HEADER.as_ref().is_some_and(|re| re.is_match(text)) => {
            sections(&EOS_LLDP_HEADER, text)
                .into_iter()
                .filter_map(|section| {
                    let local = capture(&EOS_LLDP_HEADER, section);
                    lldp_neighbor(section, local)
                })
                .collect()
        }
        _ => rule_sections(text)
            .into_iter()
            .filter_map(|section| lldp_neighbor(section, None))
            .collect(),
    }
}

/// `show lldp neighbors` on Junos:
/// `Local Interface  Parent Interface  Chassis Id  Port info  System Name`
fn parse_junos_lldp_table(text: &str) -> Vec<Neighbor> {
    text.lines()
        .filter(|line| !line.trim().is_empty() && !line.contains("Local Interface"))
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 5 {
                return None;
            }
            Some(Neighbor {
                hostname: parts.last().map(|s| s.to_string()),
                ip_address: None,
                local_interface: Some(parts[0].to_string()),
                remote_interface: Some(parts[3].to_string()),
                platform: None,
                protocol: NeighborProtocol::Lldp,
            })
        })
        .collect()
}
