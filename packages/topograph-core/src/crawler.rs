//! Breadth-first crawl of the device adjacency graph.
//!
//! Each depth level is one frontier, worked through a bounded pool of
//! device sessions. The visited set, device records, edges and errors live
//! behind a single mutex; a candidate is claimed in the visited set before
//! it is queued, so no device is dispatched twice.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::adapter::{self, ConnectOptions, DeviceAdapter, Introspection, IntrospectionPlan};
use crate::error::{DeviceError, DeviceErrorKind};
use crate::exclude::ExcludeFilter;
use crate::model::{
    AdjacencyEdge, Credential, DEFAULT_MANAGEMENT_PORT, DeviceRecord, Neighbor, NeighborProtocol,
    SeedDevice,
};
use crate::topology::normalize_hostname;

/// Called with the merged record each time a device finishes
pub type DeviceCallback = Arc<dyn Fn(&DeviceRecord) + Send + Sync>;

/// Resolves neighbors that advertise a name but no management address
#[async_trait]
pub trait NameResolver: Send + Sync {
    async fn resolve(&self, name: &str) -> Option<IpAddr>;
}

/// System resolver; prefers IPv4 answers
pub struct DnsResolver;

#[async_trait]
impl NameResolver for DnsResolver {
    async fn resolve(&self, name: &str) -> Option<IpAddr> {
        let addrs: Vec<IpAddr> = tokio::net::lookup_host((name, 0))
            .await
            .ok()?
            .map(|a| a.ip())
            .collect();
        addrs
            .iter()
            .find(|ip| ip.is_ipv4())
            .or_else(|| addrs.first())
            .copied()
    }
}

#[derive(Debug, Clone)]
pub struct CrawlOptions {
    pub max_depth: u32,
    /// Concurrent device sessions
    pub concurrency: usize,
    /// Per-command timeout inside a session
    pub timeout: Duration,
    /// Extra connect attempts after a transient failure
    pub retries: u32,
    pub protocols: Vec<NeighborProtocol>,
    pub exclude: ExcludeFilter,
}

impl CrawlOptions {
    fn connect(&self) -> ConnectOptions {
        ConnectOptions::new(self.timeout).with_retries(self.retries)
    }
}

impl Default for CrawlOptions {
    fn default() -> Self {
        Self {
            max_depth: crate::config::DEFAULT_MAX_DEPTH,
            concurrency: crate::config::DEFAULT_CONCURRENT_CONNECTIONS,
            timeout: Duration::from_secs(crate::config::DEFAULT_TIMEOUT_SECS),
            retries: crate::config::DEFAULT_RETRY_COUNT,
            protocols: vec![NeighborProtocol::Cdp, NeighborProtocol::Lldp],
            exclude: ExcludeFilter::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CrawlOutcome {
    /// One record per management IP, in order of first discovery
    pub devices: Vec<DeviceRecord>,
    pub edges: Vec<AdjacencyEdge>,
    pub errors: Vec<DeviceError>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum VisitKey {
    Ip(IpAddr),
    /// Neighbor known only by name
    Name(String),
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    ip: IpAddr,
    port: u16,
    depth: u32,
}

#[derive(Default)]
struct CrawlState {
    visited: HashSet<VisitKey>,
    devices: Vec<DeviceRecord>,
    index: HashMap<IpAddr, usize>,
    edges: Vec<AdjacencyEdge>,
    errors: Vec<DeviceError>,
    /// Normalized neighbor name to the address it resolved to
    resolved: HashMap<String, IpAddr>,
}

impl CrawlState {
    /// Insert or merge `record`, returning the stored version
    fn store(&mut self, record: DeviceRecord) -> DeviceRecord {
        match self.index.get(&record.ip_address) {
            Some(&i) => {
                self.devices[i].merge_from(record);
                self.devices[i].clone()
            }
            None => {
                self.index.insert(record.ip_address, self.devices.len());
                self.devices.push(record.clone());
                record
            }
        }
    }

    /// Fill in the address of name-only neighbors that later resolved
    fn apply_resolved_names(&mut self) {
        let CrawlState {
            edges, resolved, ..
        } = self;
        for edge in edges.iter_mut().filter(|e| e.neighbor_ip.is_none()) {
            let Some(name) = edge.neighbor_name.as_deref() else {
                continue;
            };
            if let Some(ip) = resolved.get(&normalize_hostname(name)) {
                edge.neighbor_ip = Some(*ip);
            }
        }
    }
}

fn lock(state: &Mutex<CrawlState>) -> MutexGuard<'_, CrawlState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn neighbor_excluded(exclude: &ExcludeFilter, neighbor: &Neighbor) -> bool {
    neighbor.ip_address.is_some_and(|ip| exclude.excludes_ip(&ip))
        || neighbor
            .hostname
            .as_deref()
            .is_some_and(|name| exclude.excludes_name(name))
}

pub struct Crawler {
    adapter: Arc<dyn DeviceAdapter>,
    resolver: Arc<dyn NameResolver>,
}

/// Per-crawl inputs shared by every visit
struct CrawlContext<'a> {
    credentials: &'a [Credential],
    options: &'a CrawlOptions,
    plan: IntrospectionPlan,
    state: Mutex<CrawlState>,
    cancel: &'a CancellationToken,
    on_device: Option<DeviceCallback>,
}

impl Crawler {
    pub fn new(adapter: Arc<dyn DeviceAdapter>) -> Self {
        Self {
            adapter,
            resolver: Arc::new(DnsResolver),
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn NameResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Crawl outward from the host seeds. CIDR seeds are ignored here.
    pub async fn crawl(
        &self,
        seeds: &[SeedDevice],
        credentials: &[Credential],
        options: &CrawlOptions,
        cancel: &CancellationToken,
        on_device: Option<DeviceCallback>,
    ) -> CrawlOutcome {
        let ctx = CrawlContext {
            credentials,
            options,
            plan: IntrospectionPlan::crawl(&options.protocols),
            state: Mutex::new(CrawlState::default()),
            cancel,
            on_device,
        };

        let mut frontier = Vec::new();
        {
            let mut state = lock(&ctx.state);
            for seed in seeds {
                let Some(ip) = seed.host_ip() else {
                    continue;
                };
                if options.exclude.excludes_ip(&ip) {
                    tracing::debug!("Skipping excluded seed {}", ip);
                    continue;
                }
                if state.visited.insert(VisitKey::Ip(ip)) {
                    frontier.push(Candidate {
                        ip,
                        port: seed.management_port(),
                        depth: 0,
                    });
                }
            }
        }

        let mut depth = 0;
        while !frontier.is_empty() {
            tracing::info!("Crawling depth {}: {} device(s)", depth, frontier.len());
            let levels: Vec<Vec<Candidate>> = stream::iter(frontier)
                .map(|candidate| self.visit(candidate, &ctx))
                .buffer_unordered(options.concurrency.max(1))
                .collect()
                .await;
            frontier = levels.into_iter().flatten().collect();
            depth += 1;
        }

        let mut state = ctx.state.into_inner().unwrap_or_else(PoisonError::into_inner);
        state.apply_resolved_names();
        tracing::info!(
            "Crawl complete: {} device(s), {} edge(s), {} error(s)",
            state.devices.len(),
            state.edges.len(),
            state.errors.len()
        );
        CrawlOutcome {
            devices: state.devices,
            edges: state.edges,
            errors: state.errors,
        }
    }

    /// Introspect one device and return the neighbors it adds to the next level
    async fn visit(&self, candidate: Candidate, ctx: &CrawlContext<'_>) -> Vec<Candidate> {
        let result = if ctx.cancel.is_cancelled() {
            Err(adapter::deadline_error(candidate.ip))
        } else {
            adapter::introspect(
                self.adapter.as_ref(),
                candidate.ip,
                candidate.port,
                ctx.credentials,
                &ctx.plan,
                ctx.options.connect(),
                ctx.cancel,
            )
            .await
        };

        match result {
            Ok(introspection) => self.accept(candidate, introspection, ctx).await,
            Err(e) => {
                tracing::warn!("{}: {}", candidate.ip, e);
                let mut record = DeviceRecord::failed(candidate.ip, e.clone());
                record.depth = Some(candidate.depth);
                let stored = {
                    let mut state = lock(&ctx.state);
                    state.errors.push(e);
                    state.store(record)
                };
                if let Some(callback) = &ctx.on_device {
                    callback(&stored);
                }
                Vec::new()
            }
        }
    }

    async fn accept(
        &self,
        candidate: Candidate,
        introspection: Introspection,
        ctx: &CrawlContext<'_>,
    ) -> Vec<Candidate> {
        let Introspection {
            mut record,
            neighbors,
            ..
        } = introspection;
        record.depth = Some(candidate.depth);
        let local_name = record.display_name();
        let expand = candidate.depth < ctx.options.max_depth && !ctx.cancel.is_cancelled();
        let next_depth = candidate.depth + 1;

        tracing::info!(
            "{} ({}) at depth {}: {} neighbor(s)",
            local_name,
            candidate.ip,
            candidate.depth,
            neighbors.len()
        );

        let mut next = Vec::new();
        let mut unresolved_names = Vec::new();
        let stored = {
            let mut state = lock(&ctx.state);
            for ip in &record.all_ip_addresses {
                state.visited.insert(VisitKey::Ip(*ip));
            }
            if let Some(hostname) = &record.hostname {
                state.visited.insert(VisitKey::Name(normalize_hostname(hostname)));
            }
            if let Some(error) = &record.error {
                state.errors.push(error.clone());
            }

            for neighbor in &neighbors {
                state.edges.push(AdjacencyEdge {
                    local_ip: candidate.ip,
                    local_name: local_name.clone(),
                    local_interface: neighbor.local_interface.clone(),
                    neighbor_ip: neighbor.ip_address,
                    neighbor_name: neighbor.hostname.clone(),
                    neighbor_interface: neighbor.remote_interface.clone(),
                    protocol: neighbor.protocol,
                });

                if !expand || neighbor_excluded(&ctx.options.exclude, neighbor) {
                    continue;
                }
                match (neighbor.ip_address, &neighbor.hostname) {
                    (Some(ip), hostname) => {
                        if state.visited.insert(VisitKey::Ip(ip)) {
                            if let Some(name) = hostname {
                                state.visited.insert(VisitKey::Name(normalize_hostname(name)));
                            }
                            next.push(Candidate {
                                ip,
                                port: DEFAULT_MANAGEMENT_PORT,
                                depth: next_depth,
                            });
                        }
                    }
                    (None, Some(name)) => {
                        if state.visited.insert(VisitKey::Name(normalize_hostname(name))) {
                            unresolved_names.push(name.clone());
                        }
                    }
                    (None, None) => {}
                }
            }
            state.store(record)
        };

        if let Some(callback) = &ctx.on_device {
            callback(&stored);
        }

        for name in unresolved_names {
            let resolved = tokio::select! {
                resolved = self.resolver.resolve(&name) => resolved,
                _ = ctx.cancel.cancelled() => break,
            };
            let Some(ip) = resolved else {
                tracing::warn!("Neighbor {} advertised no address and did not resolve", name);
                lock(&ctx.state).errors.push(DeviceError::new(
                    name,
                    DeviceErrorKind::Unresolved,
                    "neighbor advertised no management address and name lookup failed",
                ));
                continue;
            };

            tracing::debug!("Resolved neighbor {} to {}", name, ip);
            let mut state = lock(&ctx.state);
            state.resolved.insert(normalize_hostname(&name), ip);
            if !ctx.options.exclude.excludes_ip(&ip) && state.visited.insert(VisitKey::Ip(ip)) {
                next.push(Candidate {
                    ip,
                    port: DEFAULT_MANAGEMENT_PORT,
                    depth: next_depth,
                });
            }
        }

        next
    }
}
