//! Vendor family profiles: which CLI command answers which question, and
//! how to read the answer.

use serde::{Deserialize, Serialize};

use super::parsers::{self, InterfaceAddress, VersionFacts};
use crate::model::{InterfaceRecord, Neighbor, NeighborProtocol};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VendorFamily {
    CiscoIos,
    CiscoNxos,
    AristaEos,
    JuniperJunos,
    Generic,
}

impl VendorFamily {
    /// Device-type tag stored on device records
    pub fn tag(&self) -> &'static str {
        match self {
            VendorFamily::CiscoIos => "cisco_ios",
            VendorFamily::CiscoNxos => "cisco_nxos",
            VendorFamily::AristaEos => "arista_eos",
            VendorFamily::JuniperJunos => "juniper_junos",
            VendorFamily::Generic => "generic",
        }
    }
}

impl std::fmt::Display for VendorFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

/// Question asked of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Version,
    Hostname,
    Interfaces,
    InterfaceBrief,
    ConnectedRoutes,
    CdpNeighbors,
    LldpNeighbors,
    RunningConfig,
}

impl CommandKind {
    pub fn for_protocol(protocol: NeighborProtocol) -> Self {
        match protocol {
            NeighborProtocol::Cdp => CommandKind::CdpNeighbors,
            NeighborProtocol::Lldp => CommandKind::LldpNeighbors,
        }
    }
}

/// Per-family command table and output readers
pub trait VendorProfile: Send + Sync {
    fn family(&self) -> VendorFamily;

    /// CLI string for `kind`, or `None` if the family has no such command
    fn command(&self, kind: CommandKind) -> Option<&'static str>;

    /// Manufacturer name when the family implies it
    fn vendor_name(&self) -> Option<&'static str>;

    fn parse_version(&self, text: &str) -> VersionFacts {
        parsers::parse_version(self.family(), text)
    }

    fn parse_interfaces(&self, text: &str) -> Vec<InterfaceRecord> {
        parsers::parse_interfaces(self.family(), text)
    }

    fn parse_interface_brief(&self, text: &str) -> Vec<InterfaceAddress> {
        parsers::parse_interface_brief(text)
    }

    fn parse_connected_routes(&self, text: &str) -> Vec<(std::net::Ipv4Addr, u8)> {
        parsers::parse_connected_routes(text)
    }

    fn parse_neighbors(&self, protocol: NeighborProtocol, text: &str) -> Vec<Neighbor> {
        match protocol {
            NeighborProtocol::Cdp => parsers::parse_cdp_neighbors(text),
            NeighborProtocol::Lldp => parsers::parse_lldp_neighbors(self.family(), text),
        }
    }

    /// Whether outputs are parsed into structured fields at all
    fn structured(&self) -> bool {
        true
    }
}

/// Table-driven profile for a known CLI family
pub struct CliProfile {
    family: VendorFamily,
    vendor: &'static str,
    commands: &'static [(CommandKind, &'static str)],
}

impl VendorProfile for CliProfile {
    fn family(&self) -> VendorFamily {
        self.family
    }

    fn command(&self, kind: CommandKind) -> Option<&'static str> {
        self.commands
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, cmd)| *cmd)
    }

    fn vendor_name(&self) -> Option<&'static str> {
        Some(self.vendor)
    }
}

/// Fallback for unrecognised devices: only `show version` is asked and
/// nothing is parsed beyond a version string.
pub struct GenericProfile;

impl VendorProfile for GenericProfile {
    fn family(&self) -> VendorFamily {
        VendorFamily::Generic
    }

    fn command(&self, kind: CommandKind) -> Option<&'static str> {
        match kind {
            CommandKind::Version => Some("show version"),
            _ => None,
        }
    }

    fn vendor_name(&self) -> Option<&'static str> {
        None
    }

    fn parse_interfaces(&self, _text: &str) -> Vec<InterfaceRecord> {
        Vec::new()
    }

    fn parse_interface_brief(&self, _text: &str) -> Vec<InterfaceAddress> {
        Vec::new()
    }

    fn parse_connected_routes(&self, _text: &str) -> Vec<(std::net::Ipv4Addr, u8)> {
        Vec::new()
    }

    fn parse_neighbors(&self, _protocol: NeighborProtocol, _text: &str) -> Vec<Neighbor> {
        Vec::new()
    }

    fn structured(&self) -> bool {
        false
    }
}

static CISCO_IOS: CliProfile = CliProfile {
    family: VendorFamily::CiscoIos,
    vendor: "Cisco",
    commands: &[
        (CommandKind::Version, "show version"),
        (CommandKind::Interfaces, "show interfaces"),
        (CommandKind::InterfaceBrief, "show ip interface brief"),
        (CommandKind::ConnectedRoutes, "show ip route connected"),
        (CommandKind::CdpNeighbors, "show cdp neighbors detail"),
        (CommandKind::LldpNeighbors, "show lldp neighbors detail"),
        (CommandKind::RunningConfig, "show running-config"),
    ],
};

static CISCO_NXOS: CliProfile = CliProfile {
    family: VendorFamily::CiscoNxos,
    vendor: "Cisco",
    commands: &[
        (CommandKind::Version, "show version"),
        (CommandKind::Hostname, "show hostname"),
        (CommandKind::Interfaces, "show interface"),
        (CommandKind::InterfaceBrief, "show ip interface brief"),
        (CommandKind::ConnectedRoutes, "show ip route direct"),
        (CommandKind::CdpNeighbors, "show cdp neighbors detail"),
        (CommandKind::LldpNeighbors, "show lldp neighbors detail"),
        (CommandKind::RunningConfig, "show running-config"),
    ],
};

static ARISTA_EOS: CliProfile = CliProfile {
    family: VendorFamily::AristaEos,
    vendor: "Arista Networks",
    commands: &[
        (CommandKind::Version, "show version"),
        (CommandKind::Hostname, "show hostname"),
        (CommandKind::Interfaces, "show interfaces"),
        (CommandKind::InterfaceBrief, "show ip interface brief"),
        (CommandKind::ConnectedRoutes, "show ip route connected"),
        (CommandKind::LldpNeighbors, "show lldp neighbors detail"),
        (CommandKind::RunningConfig, "show running-config"),
    ],
};

static JUNIPER_JUNOS: CliProfile = CliProfile {
    family: VendorFamily::JuniperJunos,
    vendor: "Juniper Networks",
    commands: &[
        (CommandKind::Version, "show version"),
        (CommandKind::Interfaces, "show interfaces"),
        (CommandKind::InterfaceBrief, "show interfaces terse"),
        (CommandKind::ConnectedRoutes, "show route protocol direct"),
        (CommandKind::LldpNeighbors, "show lldp neighbors"),
        (CommandKind::RunningConfig, "show configuration | display set"),
    ],
};

static GENERIC: GenericProfile = GenericProfile;

/// Profile selected by a detected family tag
pub fn profile_for(family: VendorFamily) -> &'static dyn VendorProfile {
    match family {
        VendorFamily::CiscoIos => &CISCO_IOS,
        VendorFamily::CiscoNxos => &CISCO_NXOS,
        VendorFamily::AristaEos => &ARISTA_EOS,
        VendorFamily::JuniperJunos => &JUNIPER_JUNOS,
        VendorFamily::Generic => &GENERIC,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_family_asks_for_version() {
        for family in [
            VendorFamily::CiscoIos,
            VendorFamily::CiscoNxos,
            VendorFamily::AristaEos,
            VendorFamily::JuniperJunos,
            VendorFamily::Generic,
        ] {
            let profile = profile_for(family);
            assert_eq!(profile.family(), family);
            assert_eq!(profile.command(CommandKind::Version), Some("show version"));
        }
    }

    #[test]
    fn test_families_without_cdp() {
        assert!(profile_for(VendorFamily::AristaEos)
            .command(CommandKind::CdpNeighbors)
            .is_none());
        assert!(profile_for(VendorFamily::JuniperJunos)
            .command(CommandKind::CdpNeighbors)
            .is_none());
        assert_eq!(
            profile_for(VendorFamily::JuniperJunos).command(CommandKind::LldpNeighbors),
            Some("show lldp neighbors")
        );
    }

    #[test]
    fn test_generic_returns_raw_text_only() {
        let generic = profile_for(VendorFamily::Generic);
        assert!(!generic.structured());
        assert!(generic.vendor_name().is_none());
        assert!(generic
            .parse_neighbors(NeighborProtocol::Cdp, "Device ID: sw1\nIP address: 10.0.0.1\n")
            .is_empty());
    }

    #[test]
    fn test_tags() {
        assert_eq!(VendorFamily::CiscoNxos.tag(), "cisco_nxos");
        assert_eq!(VendorFamily::Generic.to_string(), "generic");
    }
}
