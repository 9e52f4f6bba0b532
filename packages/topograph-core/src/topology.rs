//! Topology assembly: reconcile one-sided adjacency reports into links.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;

use crate::model::{AdjacencyEdge, ConnectedTo, ConnectionStatus, DeviceRecord, NeighborProtocol};

/// Long interface prefixes and the short form they normalize to
const INTERFACE_PREFIXES: &[(&str, &str)] = &[
    ("hundredgige", "hu"),
    ("fortygigabitethernet", "fo"),
    ("twentyfivegige", "twe"),
    ("tengigabitethernet", "te"),
    ("gigabitethernet", "gi"),
    ("fastethernet", "fa"),
    ("ethernet", "eth"),
    ("port-channel", "po"),
    ("management", "mgmt"),
    ("loopback", "lo"),
    ("vlan", "vlan"),
];

/// Lowercase, domain suffix and serial suffix removed.
///
/// `Core-1.corp.example.com` and `core-1(FOX1234)` both become `core-1`.
/// Literal IP addresses are returned unchanged.
pub fn normalize_hostname(name: &str) -> String {
    let name = name.trim();
    if name.parse::<IpAddr>().is_ok() {
        return name.to_string();
    }
    let name = name.split('(').next().unwrap_or(name);
    name.split('.').next().unwrap_or(name).to_ascii_lowercase()
}

/// Canonical short interface name: `GigabitEthernet0/1`, `Gi0/1` and
/// `gi 0/1` all become `gi0/1`.
pub fn normalize_interface(name: &str) -> String {
    let compact: String = name.split_whitespace().collect::<String>().to_ascii_lowercase();
    let split = compact
        .find(|c: char| c.is_ascii_digit())
        .unwrap_or(compact.len());
    let (prefix, rest) = compact.split_at(split);

    // Junos-style names (ge-0/0/0) carry no long form
    if prefix.ends_with('-') {
        return compact;
    }
    let short = INTERFACE_PREFIXES
        .iter()
        .find(|(long, short)| prefix == *short || (prefix.len() >= 2 && long.starts_with(prefix)))
        .map(|(_, short)| *short)
        .unwrap_or(prefix);
    format!("{}{}", short, rest)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TopologyOptions {
    /// Match neighbors to crawled devices by hostname when they advertise
    /// no address. Distinct devices sharing a hostname will be merged.
    pub hostname_fallback: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopologyNode {
    pub id: String,
    pub name: String,
    pub ip_address: Option<IpAddr>,
    pub device_type: Option<String>,
    /// None for neighbors that were reported but never crawled
    pub status: Option<ConnectionStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkEnd {
    /// Node id
    pub device: String,
    pub interface: Option<String>,
    /// Whether this side reported the link itself
    pub resolved: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkStatus {
    Bidirectional,
    OneSided,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyLink {
    pub a: LinkEnd,
    pub b: LinkEnd,
    pub protocols: Vec<NeighborProtocol>,
    pub status: LinkStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TopologyGraph {
    pub nodes: Vec<TopologyNode>,
    pub links: Vec<TopologyLink>,
}

impl TopologyGraph {
    pub fn node(&self, id: &str) -> Option<&TopologyNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn bidirectional_count(&self) -> usize {
        self.links
            .iter()
            .filter(|l| l.status == LinkStatus::Bidirectional)
            .count()
    }
}

/// Lookup from addresses and names to node ids
struct NodeIndex {
    nodes: Vec<TopologyNode>,
    by_id: HashMap<String, usize>,
    by_ip: HashMap<IpAddr, usize>,
    by_name: HashMap<String, usize>,
    hostname_fallback: bool,
}

impl NodeIndex {
    fn new(devices: &[DeviceRecord], options: TopologyOptions) -> Self {
        let mut index = Self {
            nodes: Vec::new(),
            by_id: HashMap::new(),
            by_ip: HashMap::new(),
            by_name: HashMap::new(),
            hostname_fallback: options.hostname_fallback,
        };
        for device in devices {
            if index.by_ip.contains_key(&device.ip_address) {
                continue;
            }
            let slot = index.push(TopologyNode {
                id: device.ip_address.to_string(),
                name: device.display_name(),
                ip_address: Some(device.ip_address),
                device_type: device.device_type.clone(),
                status: Some(device.status),
            });
            for ip in &device.all_ip_addresses {
                index.by_ip.entry(*ip).or_insert(slot);
            }
            if let Some(hostname) = &device.hostname {
                index.by_name.entry(normalize_hostname(hostname)).or_insert(slot);
            }
        }
        index
    }

    fn push(&mut self, node: TopologyNode) -> usize {
        let slot = self.nodes.len();
        self.by_id.insert(node.id.clone(), slot);
        self.nodes.push(node);
        slot
    }

    /// Node id for a reported endpoint, adding a placeholder node if needed
    fn resolve(&mut self, ip: Option<IpAddr>, name: Option<&str>) -> String {
        if let Some(&slot) = ip.and_then(|ip| self.by_ip.get(&ip)) {
            return self.nodes[slot].id.clone();
        }
        let normalized = name.map(normalize_hostname);
        if self.hostname_fallback {
            if let Some(&slot) = normalized.as_ref().and_then(|n| self.by_name.get(n)) {
                return self.nodes[slot].id.clone();
            }
        }

        let id = match (ip, &normalized) {
            (Some(ip), _) => ip.to_string(),
            (None, Some(name)) => format!("name:{}", name),
            (None, None) => "unknown".to_string(),
        };
        if self.by_id.contains_key(&id) {
            return id;
        }
        let slot = self.push(TopologyNode {
            id: id.clone(),
            name: name.map(str::to_string).unwrap_or_else(|| id.clone()),
            ip_address: ip,
            device_type: None,
            status: None,
        });
        if let Some(ip) = ip {
            self.by_ip.insert(ip, slot);
        }
        id
    }
}

type EndKey = (String, String);

/// Reconcile adjacency edges into undirected links.
///
/// A→B and B→A over the same interface pair become one bidirectional link.
/// Repeat reports from the same side (CDP and LLDP) only add a protocol.
pub fn build(
    devices: &[DeviceRecord],
    edges: &[AdjacencyEdge],
    options: TopologyOptions,
) -> TopologyGraph {
    let mut index = NodeIndex::new(devices, options);
    let mut links: Vec<TopologyLink> = Vec::new();
    let mut by_pair: HashMap<(EndKey, EndKey), usize> = HashMap::new();

    for edge in edges {
        let local = index.resolve(Some(edge.local_ip), Some(&edge.local_name));
        let remote = index.resolve(edge.neighbor_ip, edge.neighbor_name.as_deref());
        let local_if = edge.local_interface.as_deref().map(normalize_interface);
        let remote_if = edge.neighbor_interface.as_deref().map(normalize_interface);

        let near: EndKey = (local.clone(), local_if.clone().unwrap_or_default());
        let far: EndKey = (remote.clone(), remote_if.clone().unwrap_or_default());
        let key = if near <= far {
            (near, far)
        } else {
            (far, near)
        };

        match by_pair.get(&key) {
            Some(&i) => {
                let link = &mut links[i];
                if !link.protocols.contains(&edge.protocol) {
                    link.protocols.push(edge.protocol);
                }
                let end = if link.a.device == local && link.a.interface == local_if {
                    &mut link.a
                } else {
                    &mut link.b
                };
                end.resolved = true;
                if link.a.resolved && link.b.resolved {
                    link.status = LinkStatus::Bidirectional;
                }
            }
            None => {
                by_pair.insert(key, links.len());
                links.push(TopologyLink {
                    a: LinkEnd {
                        device: local,
                        interface: local_if,
                        resolved: true,
                    },
                    b: LinkEnd {
                        device: remote,
                        interface: remote_if,
                        resolved: false,
                    },
                    protocols: vec![edge.protocol],
                    status: LinkStatus::OneSided,
                });
            }
        }
    }

    tracing::debug!(
        "Topology built: {} node(s), {} link(s)",
        index.nodes.len(),
        links.len()
    );
    TopologyGraph {
        nodes: index.nodes,
        links,
    }
}

/// Point each device interface at the far end of its link
pub fn annotate(devices: &mut [DeviceRecord], graph: &TopologyGraph) {
    let names: HashMap<&str, &str> = graph
        .nodes
        .iter()
        .map(|n| (n.id.as_str(), n.name.as_str()))
        .collect();

    for device in devices.iter_mut() {
        let id = device.ip_address.to_string();
        for link in &graph.links {
            let (near, far) = if link.a.device == id {
                (&link.a, &link.b)
            } else if link.b.device == id {
                (&link.b, &link.a)
            } else {
                continue;
            };
            let Some(near_if) = &near.interface else {
                continue;
            };
            let far_name = names.get(far.device.as_str()).copied().unwrap_or(&far.device);
            for iface in device
                .interfaces
                .iter_mut()
                .filter(|i| normalize_interface(&i.name) == *near_if)
            {
                iface.connected_to = Some(ConnectedTo {
                    device: far_name.to_string(),
                    interface: far.interface.clone(),
                });
            }
        }
    }
}
