//! CIDR expansion into individual host addresses.

use ipnetwork::{IpNetwork, Ipv4Network, Ipv6Network};
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::model::SeedAddress;

/// Number of host addresses `network` expands to
pub fn host_count(network: &IpNetwork) -> u128 {
    match network {
        IpNetwork::V4(net) => {
            let size = 1u128 << (32 - u32::from(net.prefix()));
            if net.prefix() <= 30 { size - 2 } else { size }
        }
        IpNetwork::V6(net) => {
            let bits = 128 - u32::from(net.prefix());
            let size = 1u128.checked_shl(bits).unwrap_or(u128::MAX);
            if net.prefix() < 127 { size - 1 } else { size }
        }
    }
}

/// Expand a network to host addresses.
///
/// IPv4 masks up to /30 drop the network and broadcast addresses; /31 and
/// /32 keep every address. IPv6 drops only the subnet-router anycast
/// address below /127.
pub fn expand_network(network: &IpNetwork, max_hosts: usize) -> Result<Vec<IpAddr>, String> {
    let count = host_count(network);
    if count > max_hosts as u128 {
        return Err(format!(
            "{} expands to {} hosts, more than the limit of {}",
            network, count, max_hosts
        ));
    }

    Ok(match network {
        IpNetwork::V4(net) => expand_v4(net),
        IpNetwork::V6(net) => expand_v6(net, count as u64),
    })
}

fn expand_v4(net: &Ipv4Network) -> Vec<IpAddr> {
    let base = u64::from(u32::from(net.network()));
    let size = 1u64 << (32 - u32::from(net.prefix()));
    let (first, last) = if net.prefix() <= 30 {
        (base + 1, base + size - 2)
    } else {
        (base, base + size - 1)
    };
    (first..=last)
        .map(|n| IpAddr::V4(Ipv4Addr::from(n as u32)))
        .collect()
}

fn expand_v6(net: &Ipv6Network, count: u64) -> Vec<IpAddr> {
    let base = u128::from(net.network());
    let first = if net.prefix() < 127 { base + 1 } else { base };
    (0..count as u128)
        .map(|offset| IpAddr::V6(Ipv6Addr::from(first + offset)))
        .collect()
}

/// Expand scan targets in input order, dropping repeated addresses.
pub fn expand_targets(
    targets: &[SeedAddress],
    max_hosts_per_target: usize,
) -> Result<Vec<IpAddr>, String> {
    let mut seen = HashSet::new();
    let mut addresses = Vec::new();

    for target in targets {
        let expanded = match target {
            SeedAddress::Host(ip) => vec![*ip],
            SeedAddress::Network(net) => expand_network(net, max_hosts_per_target)?,
        };
        for ip in expanded {
            if seen.insert(ip) {
                addresses.push(ip);
            }
        }
    }

    Ok(addresses)
}
