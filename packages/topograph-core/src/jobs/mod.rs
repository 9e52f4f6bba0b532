//! Job manager: creates discovery jobs, runs each on its own task, and
//! serves consistent snapshots of their progress and results.

pub mod request;
mod runner;
pub mod state;
pub mod store;

pub use request::{DiscoveryMethod, DiscoveryMode, DiscoveryRequest, JobParams};
pub use state::{JobStage, JobStatus};
pub use store::{JobHandle, JobStore};

use chrono::{DateTime, Utc};
use ipnetwork::Ipv4Network;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::adapter::{DeviceAdapter, SshCliAdapter};
use crate::config::EngineConfig;
use crate::crawler::{DnsResolver, NameResolver};
use crate::error::{DeviceError, DiscoveryError, Result};
use crate::model::{
    AdjacencyEdge, ConnectionStatus, DeviceRecord, ReachabilityReport, ReachabilitySummary,
};
use crate::scanner::{ReachabilityScanner, ScanProgress};
use crate::topology::TopologyGraph;

/// Devices shown in a status snapshot
pub const PREVIEW_DEVICES: usize = 5;

/// Accumulated output of a job, filled in as stages finish
#[derive(Debug, Clone, Default)]
pub struct JobResults {
    pub reachability: Option<ReachabilityReport>,
    pub subnets: Option<Vec<Ipv4Network>>,
    /// In order of first discovery
    pub devices: Vec<DeviceRecord>,
    device_index: HashMap<IpAddr, usize>,
    pub edges: Vec<AdjacencyEdge>,
    pub topology: Option<TopologyGraph>,
    pub device_errors: Vec<DeviceError>,
}

impl JobResults {
    /// Add a device or merge it into the record with the same management IP
    pub fn upsert_device(&mut self, record: DeviceRecord) {
        match self.device_index.get(&record.ip_address) {
            Some(&i) => self.devices[i].merge_from(record),
            None => {
                self.device_index.insert(record.ip_address, self.devices.len());
                self.devices.push(record);
            }
        }
    }

    /// Store `record` as-is, keeping its position if already known
    pub fn replace_device(&mut self, record: DeviceRecord) {
        match self.device_index.get(&record.ip_address) {
            Some(&i) => self.devices[i] = record,
            None => self.upsert_device(record),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub params: JobParams,
    pub status: JobStatus,
    pub stage: Option<JobStage>,
    pub progress: Option<ScanProgress>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub results: JobResults,
    pub error: Option<String>,
}

impl Job {
    pub fn new(id: String, params: JobParams) -> Self {
        Self {
            id,
            params,
            status: JobStatus::Pending,
            stage: None,
            progress: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            results: JobResults::default(),
            error: None,
        }
    }

    /// Move to `next`, stamping start/completion times
    pub fn transition(&mut self, next: JobStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(DiscoveryError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        match next {
            JobStatus::Running => self.started_at = Some(Utc::now()),
            JobStatus::Completed | JobStatus::Failed => {
                self.completed_at = Some(Utc::now());
                self.stage = None;
            }
            JobStatus::Pending => {}
        }
        Ok(())
    }

    pub fn summary(&self) -> JobSummary {
        let mut status_counts = BTreeMap::new();
        for device in &self.results.devices {
            *status_counts.entry(device.status).or_insert(0) += 1;
        }
        let count = |status| status_counts.get(&status).copied().unwrap_or(0);
        JobSummary {
            total_devices: self.results.devices.len(),
            successful_connections: count(ConnectionStatus::Success),
            failed_connections: count(ConnectionStatus::Failed)
                + count(ConnectionStatus::Unreachable),
            status_counts,
            device_errors: self.results.device_errors.len(),
            edges: self.results.edges.len(),
            subnets: self.results.subnets.as_ref().map(Vec::len),
            links: self.results.topology.as_ref().map(|t| t.links.len()),
            reachability: self.results.reachability.as_ref().map(|r| r.summary.clone()),
        }
    }

    pub fn view(&self) -> JobView {
        let duration_secs = self.started_at.map(|start| {
            let end = self.completed_at.unwrap_or_else(Utc::now);
            end.signed_duration_since(start).num_milliseconds().max(0) as f64 / 1000.0
        });
        JobView {
            job_id: self.id.clone(),
            mode: self.params.mode,
            method: self.params.method,
            status: self.status,
            stage: self.stage,
            progress: self.progress.clone(),
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            duration_secs,
            summary: self.summary(),
            devices_preview: self
                .results
                .devices
                .iter()
                .take(PREVIEW_DEVICES)
                .cloned()
                .collect(),
            error: self.error.clone(),
        }
    }

    fn produces(&self, kind: ResultKind) -> bool {
        let params = &self.params;
        match kind {
            ResultKind::Reachability | ResultKind::Error => true,
            ResultKind::Subnets => params.mode != DiscoveryMode::Subnet,
            ResultKind::Devices => {
                params.mode != DiscoveryMode::Subnet || params.method == DiscoveryMethod::SubnetScan
            }
            ResultKind::Topology => params.mode == DiscoveryMode::FullPipeline,
        }
    }

    /// Result of `kind`, or why it cannot be served yet
    pub fn result(&self, kind: ResultKind) -> Result<JobResult> {
        if !self.produces(kind) {
            return Err(DiscoveryError::ResultUnavailable {
                kind: kind.to_string(),
                mode: self.params.mode.to_string(),
            });
        }
        let not_ready = || DiscoveryError::ResultNotReady {
            kind: kind.to_string(),
            status: self.status,
        };
        match kind {
            ResultKind::Devices if self.status == JobStatus::Pending => Err(not_ready()),
            ResultKind::Devices => Ok(JobResult::Devices(self.results.devices.clone())),
            ResultKind::Reachability => self
                .results
                .reachability
                .clone()
                .map(JobResult::Reachability)
                .ok_or_else(not_ready),
            ResultKind::Subnets => self
                .results
                .subnets
                .clone()
                .map(JobResult::Subnets)
                .ok_or_else(not_ready),
            ResultKind::Topology => self
                .results
                .topology
                .clone()
                .map(JobResult::Topology)
                .ok_or_else(not_ready),
            ResultKind::Error if !self.status.is_terminal() => Err(not_ready()),
            ResultKind::Error => Ok(JobResult::Error(JobErrorReport {
                status: self.status,
                error: self.error.clone(),
                device_errors: self.results.device_errors.clone(),
            })),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub total_devices: usize,
    pub successful_connections: usize,
    /// Failed and unreachable devices
    pub failed_connections: usize,
    pub status_counts: BTreeMap<ConnectionStatus, usize>,
    pub device_errors: usize,
    pub edges: usize,
    pub subnets: Option<usize>,
    pub links: Option<usize>,
    pub reachability: Option<ReachabilitySummary>,
}

/// Consistent point-in-time snapshot of a job
#[derive(Debug, Clone, Serialize)]
pub struct JobView {
    pub job_id: String,
    pub mode: DiscoveryMode,
    pub method: DiscoveryMethod,
    pub status: JobStatus,
    pub stage: Option<JobStage>,
    pub progress: Option<ScanProgress>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_secs: Option<f64>,
    pub summary: JobSummary,
    pub devices_preview: Vec<DeviceRecord>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultKind {
    Devices,
    Reachability,
    Subnets,
    Topology,
    Error,
}

impl std::fmt::Display for ResultKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ResultKind::Devices => "devices",
            ResultKind::Reachability => "reachability",
            ResultKind::Subnets => "subnets",
            ResultKind::Topology => "topology",
            ResultKind::Error => "error",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobErrorReport {
    pub status: JobStatus,
    pub error: Option<String>,
    pub device_errors: Vec<DeviceError>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum JobResult {
    Devices(Vec<DeviceRecord>),
    Reachability(ReachabilityReport),
    Subnets(Vec<Ipv4Network>),
    Topology(TopologyGraph),
    Error(JobErrorReport),
}

/// Collaborators shared by every job a manager runs
#[derive(Clone)]
pub struct Services {
    pub adapter: Arc<dyn DeviceAdapter>,
    pub scanner: Arc<ReachabilityScanner>,
    pub resolver: Arc<dyn NameResolver>,
}

impl Services {
    /// SSH CLI adapter, system ICMP tiers and TCP probes, system DNS
    pub fn system(config: &EngineConfig) -> Self {
        Self {
            adapter: Arc::new(SshCliAdapter::new()),
            scanner: Arc::new(ReachabilityScanner::system(config.tcp_probe_timeout())),
            resolver: Arc::new(DnsResolver),
        }
    }
}

pub struct JobManager {
    store: Arc<JobStore>,
    config: EngineConfig,
    services: Services,
}

impl JobManager {
    pub fn new(store: Arc<JobStore>, config: EngineConfig, services: Services) -> Self {
        Self {
            store,
            config,
            services,
        }
    }

    /// Manager with a fresh store and system collaborators
    pub fn with_config(config: EngineConfig) -> Self {
        let store = Arc::new(JobStore::new(config.job_ttl()));
        let services = Services::system(&config);
        Self::new(store, config, services)
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Validate `request`, register a pending job and start it on its own
    /// task. Returns as soon as the job is registered.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn create_job(&self, request: DiscoveryRequest) -> Result<String> {
        self.store.evict_expired();
        let (requested_id, params) = request.resolve(&self.config)?;
        let id = requested_id
            .unwrap_or_else(|| format!("discovery_{}", uuid::Uuid::new_v4().simple()));

        let mode = params.mode;
        let method = params.method;
        let handle = self.store.insert(Job::new(id.clone(), params))?;
        tracing::info!("Created job {} (mode {}, method {})", id, mode, method);

        tokio::spawn(runner::run_job(handle, self.services.clone()));
        Ok(id)
    }

    pub fn status(&self, id: &str) -> Result<JobView> {
        self.store.evict_expired();
        let handle = self.store.get(id)?;
        let view = store::read(&handle).view();
        Ok(view)
    }

    pub fn result(&self, id: &str, kind: ResultKind) -> Result<JobResult> {
        let handle = self.store.get(id)?;
        store::read(&handle).result(kind)
    }

    /// Devices result, narrowed to one connection status when given
    pub fn devices(
        &self,
        id: &str,
        status: Option<ConnectionStatus>,
    ) -> Result<Vec<DeviceRecord>> {
        let handle = self.store.get(id)?;
        let JobResult::Devices(devices) = store::read(&handle).result(ResultKind::Devices)? else {
            return Err(DiscoveryError::internal("devices result has the wrong shape"));
        };
        Ok(devices
            .into_iter()
            .filter(|d| status.is_none_or(|s| d.status == s))
            .collect())
    }

    /// Poll until the job reaches a terminal state
    pub async fn wait(&self, id: &str, poll: Duration) -> Result<JobView> {
        loop {
            let view = self.status(id)?;
            if view.status.is_terminal() {
                return Ok(view);
            }
            tokio::time::sleep(poll).await;
        }
    }
}
