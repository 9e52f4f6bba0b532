//! Reachability scanning.
//!
//! Determines ICMP and TCP liveness for a set of addresses:
//! - CIDR expansion into host addresses
//! - tiered ICMP sweep (fping, ICMP sockets, system ping)
//! - bounded TCP connect probes, with an SSH banner check on port 22

pub mod ping;
pub mod privileges;
pub mod targets;
pub mod tcp;

pub use ping::{Pinger, default_pingers};
pub use tcp::{PortProber, TcpConnectProber};

use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

use crate::error::{DiscoveryError, Result};
use crate::model::{ReachabilityReport, ReachabilityResult, ReachabilitySummary, SeedAddress};

/// Progress update emitted while a scan runs
#[derive(Debug, Clone, Serialize)]
pub struct ScanProgress {
    pub stage: ScanStage,
    pub completed: usize,
    pub total: usize,
    pub elapsed_secs: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStage {
    PingSweep,
    PortProbe,
    Complete,
}

/// Callback type for progress updates
pub type ProgressCallback = Arc<dyn Fn(ScanProgress) + Send + Sync>;

/// Report every this many finished TCP probes
const PROGRESS_INTERVAL: usize = 256;

pub struct ReachabilityScanner {
    pingers: Vec<Box<dyn Pinger>>,
    prober: Arc<dyn PortProber>,
    probe_timeout: Duration,
    /// Index of the first available ICMP tier, chosen once
    selected: OnceCell<Option<usize>>,
}

impl ReachabilityScanner {
    pub fn new(
        pingers: Vec<Box<dyn Pinger>>,
        prober: Arc<dyn PortProber>,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            pingers,
            prober,
            probe_timeout,
            selected: OnceCell::new(),
        }
    }

    /// Scanner using the real ICMP tiers and TCP connects
    pub fn system(probe_timeout: Duration) -> Self {
        Self::new(default_pingers(), Arc::new(TcpConnectProber), probe_timeout)
    }

    async fn selected_tier(&self) -> Option<usize> {
        *self
            .selected
            .get_or_init(|| async {
                for (idx, pinger) in self.pingers.iter().enumerate() {
                    if pinger.available().await {
                        tracing::debug!("ICMP tier selected: {}", pinger.name());
                        return Some(idx);
                    }
                }
                tracing::warn!("No ICMP tier available; relying on TCP probes only");
                None
            })
            .await
    }

    /// Sweep with the selected tier, falling through to later tiers on error.
    /// Never fails: total failure means nothing answered.
    async fn icmp_sweep(&self, targets: &[IpAddr], concurrency: usize) -> HashSet<IpAddr> {
        let Some(first) = self.selected_tier().await else {
            return HashSet::new();
        };

        for (idx, pinger) in self.pingers.iter().enumerate().skip(first) {
            if idx != first && !pinger.available().await {
                continue;
            }
            match pinger.sweep(targets, self.probe_timeout, concurrency).await {
                Ok(alive) => return alive,
                Err(e) => tracing::warn!("ICMP tier {} failed: {}", pinger.name(), e),
            }
        }

        HashSet::new()
    }

    /// Expand CIDR targets, then scan.
    pub async fn scan_targets(
        &self,
        targets: &[SeedAddress],
        ports: &[u16],
        concurrency: usize,
        max_hosts_per_target: usize,
        cancel: &CancellationToken,
        on_progress: Option<ProgressCallback>,
    ) -> Result<ReachabilityReport> {
        let addresses = targets::expand_targets(targets, max_hosts_per_target)
            .map_err(DiscoveryError::Validation)?;
        Ok(self.scan(&addresses, ports, concurrency, cancel, on_progress).await)
    }

    /// Probe every address for ICMP and the given TCP ports.
    ///
    /// Results follow input order. Cancellation stops dispatching new probes;
    /// unfinished addresses are reported as unreachable.
    pub async fn scan(
        &self,
        addresses: &[IpAddr],
        ports: &[u16],
        concurrency: usize,
        cancel: &CancellationToken,
        on_progress: Option<ProgressCallback>,
    ) -> ReachabilityReport {
        let start = Instant::now();
        let concurrency = concurrency.max(1);
        let report = |stage: ScanStage, completed: usize, total: usize| {
            if let Some(ref cb) = on_progress {
                cb(ScanProgress {
                    stage,
                    completed,
                    total,
                    elapsed_secs: start.elapsed().as_secs_f64(),
                });
            }
        };

        tracing::info!(
            "Scanning {} addresses on ports {:?} (concurrency {})",
            addresses.len(),
            ports,
            concurrency
        );

        let mut results: Vec<ReachabilityResult> =
            addresses.iter().map(|ip| ReachabilityResult::unreachable(*ip)).collect();

        report(ScanStage::PingSweep, 0, addresses.len());
        let alive = tokio::select! {
            alive = self.icmp_sweep(addresses, concurrency) => alive,
            _ = cancel.cancelled() => HashSet::new(),
        };
        for result in &mut results {
            result.icmp_reachable = alive.contains(&result.ip);
        }
        report(ScanStage::PingSweep, addresses.len(), addresses.len());

        let jobs: Vec<(usize, IpAddr, u16)> = addresses
            .iter()
            .enumerate()
            .flat_map(|(idx, ip)| ports.iter().map(move |port| (idx, *ip, *port)))
            .collect();
        let total_probes = jobs.len();
        let prober = self.prober.clone();
        let probe_timeout = self.probe_timeout;

        let probes = stream::iter(jobs)
            .map(|(idx, ip, port)| {
                let prober = prober.clone();
                async move { (idx, port, prober.probe(ip, port, probe_timeout).await) }
            })
            .buffer_unordered(concurrency)
            .take_until(cancel.cancelled());
        let mut probes = std::pin::pin!(probes);

        let mut completed = 0;
        while let Some((idx, port, open)) = probes.next().await {
            if open {
                results[idx].open_ports.push(port);
            }
            completed += 1;
            if completed % PROGRESS_INTERVAL == 0 {
                report(ScanStage::PortProbe, completed, total_probes);
            }
        }

        if completed < total_probes {
            tracing::warn!(
                "Scan cancelled after {}/{} port probes",
                completed,
                total_probes
            );
        }

        for result in &mut results {
            result
                .open_ports
                .sort_by_key(|p| ports.iter().position(|q| q == p));
        }

        let summary = ReachabilitySummary::from_results(&results, ports);
        let duration = start.elapsed();
        report(ScanStage::Complete, completed, total_probes);
        tracing::info!(
            "Scan complete: {}/{} live, {} ICMP reachable in {:.1}s",
            summary.live_hosts,
            summary.total_scanned,
            summary.icmp_reachable,
            duration.as_secs_f64()
        );

        ReachabilityReport {
            results,
            summary,
            duration_secs: duration.as_secs_f64(),
            timestamp: Utc::now(),
        }
    }
}
