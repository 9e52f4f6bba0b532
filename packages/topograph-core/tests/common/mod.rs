//! In-memory network used by the integration tests: CLI-speaking devices,
//! an ICMP tier and a TCP prober, all without touching the network.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use topograph_core::adapter::{AdapterError, DeviceAdapter, DeviceSession};
use topograph_core::crawler::NameResolver;
use topograph_core::jobs::{JobManager, JobStore, JobView, Services};
use topograph_core::scanner::ping::PingError;
use topograph_core::scanner::{Pinger, PortProber, ReachabilityScanner};
use topograph_core::{Credential, EngineConfig};

pub fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

/// One CDP adjacency as seen from the reporting device
#[derive(Clone)]
pub struct Link {
    pub local: String,
    pub name: String,
    pub ip: Option<String>,
    pub remote: String,
}

pub fn link(local: &str, name: &str, ip: Option<&str>, remote: &str) -> Link {
    Link {
        local: local.to_string(),
        name: name.to_string(),
        ip: ip.map(str::to_string),
        remote: remote.to_string(),
    }
}

#[derive(Clone, Default)]
pub struct LabDevice {
    pub hostname: String,
    /// Accepted usernames; empty accepts anyone
    pub users: Vec<String>,
    /// `show ip route connected` output
    pub routes: String,
    pub links: Vec<Link>,
}

#[derive(Default)]
pub struct LabStats {
    pub connects: Mutex<HashMap<IpAddr, usize>>,
    pub neighbor_queries: Mutex<HashMap<IpAddr, usize>>,
    pub open: AtomicUsize,
    pub max_open: AtomicUsize,
}

impl LabStats {
    pub fn connects(&self, ip: IpAddr) -> usize {
        self.connects.lock().unwrap().get(&ip).copied().unwrap_or(0)
    }

    pub fn neighbor_queries(&self, ip: IpAddr) -> usize {
        self.neighbor_queries.lock().unwrap().get(&ip).copied().unwrap_or(0)
    }

    pub fn open(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    pub fn max_open(&self) -> usize {
        self.max_open.load(Ordering::SeqCst)
    }
}

/// Simulated network of Cisco IOS devices keyed by management address
#[derive(Default)]
pub struct Lab {
    devices: HashMap<IpAddr, LabDevice>,
    pub stats: Arc<LabStats>,
    /// Per-command latency
    delay: Duration,
    /// Sessions open but never answer
    hang: bool,
    panic_on_connect: bool,
}

impl Lab {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn device(mut self, addr: &str, hostname: &str, routes: &str, links: Vec<Link>) -> Self {
        self.devices.insert(
            ip(addr),
            LabDevice {
                hostname: hostname.to_string(),
                routes: routes.to_string(),
                links,
                ..Default::default()
            },
        );
        self
    }

    pub fn users(mut self, addr: &str, users: &[&str]) -> Self {
        if let Some(device) = self.devices.get_mut(&ip(addr)) {
            device.users = users.iter().map(|u| u.to_string()).collect();
        }
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn hanging(mut self) -> Self {
        self.hang = true;
        self
    }

    pub fn panicking(mut self) -> Self {
        self.panic_on_connect = true;
        self
    }
}

fn cdp_text(links: &[Link]) -> String {
    links
        .iter()
        .map(|l| {
            let mut s = format!("-------------------------\nDevice ID: {}\n", l.name);
            if let Some(ip) = &l.ip {
                s.push_str(&format!("Entry address(es):\n  IP address: {}\n", ip));
            }
            s.push_str(&format!(
                "Platform: cisco WS-C3850-24T,  Capabilities: Switch IGMP\nInterface: {},  Port ID (outgoing port): {}\n",
                l.local, l.remote
            ));
            s
        })
        .collect()
}

struct LabSession {
    ip: IpAddr,
    device: LabDevice,
    stats: Arc<LabStats>,
    delay: Duration,
    hang: bool,
}

#[async_trait]
impl DeviceSession for LabSession {
    async fn run(&mut self, command: &str) -> Result<String, AdapterError> {
        if self.hang {
            std::future::pending::<()>().await;
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match command {
            "show version" => Ok(format!(
                "Cisco IOS Software, C3850 Software, Version 16.9.4, RELEASE SOFTWARE (fc2)\n{} uptime is 2 weeks, 3 days\n",
                self.device.hostname
            )),
            "show ip route connected" => Ok(self.device.routes.clone()),
            "show interfaces" => Ok(self
                .device
                .links
                .iter()
                .map(|l| format!("{} is up, line protocol is up\n  Description: to {}\n", l.local, l.name))
                .collect()),
            "show cdp neighbors detail" => {
                *self
                    .stats
                    .neighbor_queries
                    .lock()
                    .unwrap()
                    .entry(self.ip)
                    .or_default() += 1;
                Ok(cdp_text(&self.device.links))
            }
            _ => Ok("% Invalid input detected at '^' marker.\n".to_string()),
        }
    }

    async fn close(self: Box<Self>) {
        self.stats.open.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl DeviceAdapter for Lab {
    async fn connect(
        &self,
        target: IpAddr,
        _port: u16,
        credential: &Credential,
        _timeout: Duration,
    ) -> Result<Box<dyn DeviceSession>, AdapterError> {
        if self.panic_on_connect {
            panic!("adapter exploded on {}", target);
        }
        *self.stats.connects.lock().unwrap().entry(target).or_default() += 1;
        tokio::task::yield_now().await;

        let Some(device) = self.devices.get(&target) else {
            return Err(AdapterError::Unreachable("connection timed out".to_string()));
        };
        if !device.users.is_empty() && !device.users.contains(&credential.username) {
            return Err(AdapterError::Auth(credential.username.clone()));
        }

        let now = self.stats.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.max_open.fetch_max(now, Ordering::SeqCst);
        Ok(Box::new(LabSession {
            ip: target,
            device: device.clone(),
            stats: self.stats.clone(),
            delay: self.delay,
            hang: self.hang,
        }))
    }
}

/// ICMP tier answering for a fixed set of hosts
pub struct StaticPinger {
    pub alive: HashSet<IpAddr>,
}

#[async_trait]
impl Pinger for StaticPinger {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn available(&self) -> bool {
        true
    }

    async fn sweep(
        &self,
        targets: &[IpAddr],
        _timeout: Duration,
        _concurrency: usize,
    ) -> Result<HashSet<IpAddr>, PingError> {
        Ok(targets.iter().filter(|ip| self.alive.contains(ip)).copied().collect())
    }
}

/// TCP prober with fixed open ports and optional per-host latency
#[derive(Default)]
pub struct StaticProber {
    pub open: HashSet<(IpAddr, u16)>,
    pub latency: HashMap<IpAddr, Duration>,
    pub probes: AtomicUsize,
}

#[async_trait]
impl PortProber for StaticProber {
    async fn probe(&self, ip: IpAddr, port: u16, _timeout: Duration) -> bool {
        self.probes.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency.get(&ip) {
            tokio::time::sleep(*latency).await;
        }
        self.open.contains(&(ip, port))
    }
}

pub struct NoDns;

#[async_trait]
impl NameResolver for NoDns {
    async fn resolve(&self, _name: &str) -> Option<IpAddr> {
        None
    }
}

/// Lookups that never complete
pub struct SilentDns;

#[async_trait]
impl NameResolver for SilentDns {
    async fn resolve(&self, _name: &str) -> Option<IpAddr> {
        std::future::pending().await
    }
}

pub fn scanner(alive: &[&str], open: &[(&str, u16)]) -> ReachabilityScanner {
    let pinger = StaticPinger {
        alive: alive.iter().map(|a| ip(a)).collect(),
    };
    let prober = StaticProber {
        open: open.iter().map(|(a, p)| (ip(a), *p)).collect(),
        ..Default::default()
    };
    ReachabilityScanner::new(vec![Box::new(pinger)], Arc::new(prober), Duration::from_millis(50))
}

pub fn manager(lab: Arc<Lab>, scanner: ReachabilityScanner) -> JobManager {
    manager_with_resolver(lab, scanner, Arc::new(NoDns))
}

pub fn manager_with_resolver(
    lab: Arc<Lab>,
    scanner: ReachabilityScanner,
    resolver: Arc<dyn NameResolver>,
) -> JobManager {
    let services = Services {
        adapter: lab,
        scanner: Arc::new(scanner),
        resolver,
    };
    let store = Arc::new(JobStore::new(Duration::from_secs(3600)));
    JobManager::new(store, EngineConfig::default(), services)
}

pub async fn finish(manager: &JobManager, id: &str) -> JobView {
    tokio::time::timeout(
        Duration::from_secs(20),
        manager.wait(id, Duration::from_millis(10)),
    )
    .await
    .expect("job did not finish in time")
    .unwrap()
}

pub fn creds(users: &[&str]) -> Vec<Credential> {
    users.iter().map(|u| Credential::new(*u, "secret")).collect()
}
