//! Subnet extraction: log into seed devices and collect the IPv4 networks
//! they are directly attached to.

use futures::stream::{self, StreamExt};
use ipnetwork::Ipv4Network;
use serde::Serialize;
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::adapter::{self, ConnectOptions, DeviceAdapter, Introspection, IntrospectionPlan};
use crate::error::DeviceError;
use crate::exclude::ExcludeFilter;
use crate::model::{Credential, DeviceRecord, SeedDevice};

#[derive(Debug, Clone, Default, Serialize)]
pub struct SubnetExtraction {
    /// Canonical networks in order of first discovery
    pub subnets: Vec<Ipv4Network>,
    /// One record per seed device, failed logins included
    pub devices: Vec<DeviceRecord>,
    pub errors: Vec<DeviceError>,
}

impl SubnetExtraction {
    /// Append `network` unless the exact same CIDR is already present.
    /// Overlapping networks of different lengths are all kept.
    pub fn add_subnet(&mut self, network: Ipv4Network) -> bool {
        if self.subnets.contains(&network) {
            return false;
        }
        self.subnets.push(network);
        true
    }
}

/// Network containing `ip` with host bits zeroed
pub fn canonical_network(ip: Ipv4Addr, prefix: u8) -> Option<Ipv4Network> {
    let network = Ipv4Network::new(ip, prefix).ok()?;
    Ipv4Network::new(network.network(), prefix).ok()
}

/// Networks reported by one device, deduplicated, in report order.
///
/// Addresses without a mask are skipped; the connected-route table covers
/// them. Loopbacks become /32 host routes.
pub fn networks_from(introspection: &Introspection) -> Vec<Ipv4Network> {
    let mut seen = HashSet::new();
    let mut networks = Vec::new();

    let from_interfaces = introspection.record.interfaces.iter().filter_map(|iface| {
        match (iface.ip_address, iface.prefix_len) {
            (Some(IpAddr::V4(ip)), Some(prefix)) => Some((ip, prefix)),
            _ => None,
        }
    });
    let from_brief = introspection.addresses.iter().filter_map(|addr| {
        if addr.loopback {
            Some((addr.ip, 32))
        } else {
            addr.prefix_len.map(|prefix| (addr.ip, prefix))
        }
    });
    let candidates = from_interfaces
        .chain(from_brief)
        .chain(introspection.connected_routes.iter().copied());

    for (ip, prefix) in candidates {
        if prefix == 0 || ip.is_unspecified() {
            continue;
        }
        if let Some(network) = canonical_network(ip, prefix) {
            if seen.insert(network) {
                networks.push(network);
            }
        }
    }
    networks
}

/// Log into every host seed and collect its attached networks.
///
/// Seeds are processed concurrently but results are folded in seed order, so
/// the subnet list is stable across runs. A seed that fails contributes a
/// failed record and an error but no subnets.
#[allow(clippy::too_many_arguments)]
pub async fn extract_subnets(
    adapter: Arc<dyn DeviceAdapter>,
    seeds: &[SeedDevice],
    credentials: &[Credential],
    plan: &IntrospectionPlan,
    connect: ConnectOptions,
    concurrency: usize,
    exclude: &ExcludeFilter,
    cancel: &CancellationToken,
) -> SubnetExtraction {
    let mut plan = plan.clone();
    plan.addressing = true;

    let targets: Vec<(IpAddr, u16)> = seeds
        .iter()
        .filter_map(|seed| seed.host_ip().map(|ip| (ip, seed.management_port())))
        .filter(|(ip, _)| {
            let excluded = exclude.excludes_ip(ip);
            if excluded {
                tracing::debug!("Skipping excluded seed {}", ip);
            }
            !excluded
        })
        .collect();

    tracing::info!("Extracting subnets from {} seed device(s)", targets.len());

    let plan = &plan;
    let outcomes: Vec<_> = stream::iter(targets)
        .map(|(ip, port)| {
            let adapter = adapter.clone();
            async move {
                adapter::introspect(adapter.as_ref(), ip, port, credentials, plan, connect, cancel)
                    .await
                    .map_err(|e| (ip, e))
            }
        })
        .buffered(concurrency.max(1))
        .collect()
        .await;

    let mut extraction = SubnetExtraction::default();
    for outcome in outcomes {
        match outcome {
            Ok(introspection) => {
                let found = networks_from(&introspection);
                tracing::info!(
                    "{} reported {} network(s)",
                    introspection.record.display_name(),
                    found.len()
                );
                for network in found {
                    extraction.add_subnet(network);
                }
                extraction.devices.push(introspection.record);
            }
            Err((ip, e)) => {
                tracing::warn!("Subnet extraction failed for {}: {}", ip, e);
                extraction.devices.push(DeviceRecord::failed(ip, e.clone()));
                extraction.errors.push(e);
            }
        }
    }

    tracing::info!(
        "Subnet extraction complete: {} subnet(s), {} error(s)",
        extraction.subnets.len(),
        extraction.errors.len()
    );
    extraction
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{AdapterError, DeviceSession, InterfaceAddress, VendorFamily};
    use crate::error::DeviceErrorKind;
    use crate::model::ConnectionStatus;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::time::Duration;

    fn net(s: &str) -> Ipv4Network {
        s.parse().unwrap()
    }

    #[test]
    fn test_canonical_network_zeroes_host_bits() {
        assert_eq!(
            canonical_network("10.1.2.77".parse().unwrap(), 24),
            Some(net("10.1.2.0/24"))
        );
        assert_eq!(
            canonical_network("10.1.2.77".parse().unwrap(), 32),
            Some(net("10.1.2.77/32"))
        );
        assert_eq!(canonical_network("10.1.2.77".parse().unwrap(), 40), None);
    }

    #[test]
    fn test_only_exact_duplicates_collapse() {
        let mut extraction = SubnetExtraction::default();
        assert!(extraction.add_subnet(net("10.0.0.0/24")));
        assert!(extraction.add_subnet(net("10.0.0.5/32")));
        assert!(!extraction.add_subnet(net("10.0.0.0/24")));
        // Containment is not deduplicated
        assert_eq!(extraction.subnets, vec![net("10.0.0.0/24"), net("10.0.0.5/32")]);
    }

    #[test]
    fn test_networks_from_introspection() {
        let mut record = DeviceRecord::new("10.0.0.1".parse().unwrap(), ConnectionStatus::Success);
        let mut iface = crate::model::InterfaceRecord::named("Gi0/1");
        iface.ip_address = Some("10.0.0.1".parse().unwrap());
        iface.prefix_len = Some(30);
        record.interfaces.push(iface);

        let introspection = Introspection {
            record,
            family: VendorFamily::CiscoIos,
            neighbors: Vec::new(),
            addresses: vec![
                InterfaceAddress {
                    interface: "Loopback0".to_string(),
                    ip: "192.0.2.1".parse().unwrap(),
                    prefix_len: None,
                    loopback: true,
                },
                InterfaceAddress {
                    interface: "Vlan10".to_string(),
                    ip: "172.16.10.1".parse().unwrap(),
                    prefix_len: None,
                    loopback: false,
                },
            ],
            connected_routes: vec![
                ("10.0.0.0".parse().unwrap(), 30),
                ("172.16.10.0".parse().unwrap(), 24),
                ("0.0.0.0".parse().unwrap(), 0),
            ],
        };

        assert_eq!(
            networks_from(&introspection),
            vec![net("10.0.0.0/30"), net("192.0.2.1/32"), net("172.16.10.0/24")]
        );
    }

    struct RouteSession {
        routes: String,
    }

    #[async_trait]
    impl DeviceSession for RouteSession {
        async fn run(&mut self, command: &str) -> Result<String, AdapterError> {
            match command {
                "show version" => {
                    Ok("Cisco IOS Software, Version 15.2(4)E10\nr1 uptime is 2 days\n".to_string())
                }
                "show ip route connected" => Ok(self.routes.clone()),
                _ => Ok("% Invalid input detected".to_string()),
            }
        }

        async fn close(self: Box<Self>) {}
    }

    struct RouteAdapter {
        routes: HashMap<IpAddr, &'static str>,
    }

    #[async_trait]
    impl DeviceAdapter for RouteAdapter {
        async fn connect(
            &self,
            target: IpAddr,
            _port: u16,
            _credential: &Credential,
            _timeout: Duration,
        ) -> Result<Box<dyn DeviceSession>, AdapterError> {
            match self.routes.get(&target) {
                Some(routes) => Ok(Box::new(RouteSession {
                    routes: routes.to_string(),
                })),
                None => Err(AdapterError::Unreachable("no route to host".to_string())),
            }
        }
    }

    #[tokio::test]
    async fn test_extract_merges_seeds_and_keeps_partial_results() {
        let adapter = Arc::new(RouteAdapter {
            routes: HashMap::from([
                (
                    "10.0.0.1".parse().unwrap(),
                    "C        10.0.0.0/24 is directly connected, Vlan1\nC        10.9.0.0/30 is directly connected, Gi0/1\n",
                ),
                (
                    "10.0.0.2".parse().unwrap(),
                    "C        10.0.0.0/24 is directly connected, Vlan1\nC        10.0.0.5/32 is directly connected, Loopback0\n",
                ),
            ]),
        });
        let seeds = vec![
            SeedDevice::parse("10.0.0.1").unwrap(),
            SeedDevice::parse("10.0.0.2").unwrap(),
            SeedDevice::parse("10.0.0.3").unwrap(),
            SeedDevice::parse("10.5.0.0/16").unwrap(),
        ];

        let extraction = extract_subnets(
            adapter,
            &seeds,
            &[Credential::new("ops", "pw")],
            &IntrospectionPlan::addressing(),
            ConnectOptions::new(Duration::from_secs(5)),
            4,
            &ExcludeFilter::default(),
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(
            extraction.subnets,
            vec![net("10.0.0.0/24"), net("10.9.0.0/30"), net("10.0.0.5/32")]
        );
        assert_eq!(extraction.devices.len(), 3);
        assert_eq!(extraction.devices[2].status, ConnectionStatus::Unreachable);
        assert_eq!(extraction.errors.len(), 1);
        assert_eq!(extraction.errors[0].target, "10.0.0.3");
        assert_eq!(extraction.errors[0].kind, DeviceErrorKind::Unreachable);
    }

    #[tokio::test]
    async fn test_excluded_seed_is_not_contacted() {
        let adapter = Arc::new(RouteAdapter {
            routes: HashMap::new(),
        });
        let exclude = ExcludeFilter::new(&[r"^10\.0\.0\.3$".to_string()]).unwrap();
        let extraction = extract_subnets(
            adapter,
            &[SeedDevice::parse("10.0.0.3").unwrap()],
            &[Credential::new("ops", "pw")],
            &IntrospectionPlan::addressing(),
            ConnectOptions::new(Duration::from_secs(5)),
            4,
            &exclude,
            &CancellationToken::new(),
        )
        .await;
        assert!(extraction.errors.is_empty());
        assert!(extraction.devices.is_empty());
    }
}
