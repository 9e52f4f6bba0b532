//! Topograph Core Library
//!
//! This crate provides the discovery engine behind Topograph:
//! - Reachability scanning (tiered ICMP sweep, TCP/SSH port probes)
//! - Subnet extraction from seed devices
//! - Breadth-first neighbor crawling over CDP/LLDP
//! - Topology assembly from one-sided adjacency reports
//! - A job manager that runs each discovery on its own task
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use topograph_core::{config, Credential, DiscoveryMode, DiscoveryRequest, JobManager};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let manager = JobManager::with_config(config::load_engine_config());
//!
//!     let job_id = manager.create_job(DiscoveryRequest {
//!         seed_devices: vec!["10.0.0.1".to_string()],
//!         credentials: vec![Credential::new("netops", "secret")],
//!         mode: DiscoveryMode::FullPipeline,
//!         ..Default::default()
//!     })?;
//!
//!     let view = manager.wait(&job_id, Duration::from_millis(500)).await?;
//!     println!("{}: {} devices", view.status, view.summary.total_devices);
//!     Ok(())
//! }
//! ```

pub mod adapter;
pub mod config;
pub mod crawler;
pub mod error;
pub mod exclude;
pub mod jobs;
pub mod model;
pub mod process;
pub mod scanner;
pub mod subnets;
pub mod topology;

// Re-export commonly used types
pub use adapter::{
    AdapterError, ConnectOptions, DeviceAdapter, DeviceSession, SshCliAdapter, VendorFamily,
};
pub use config::{ConfigSource, EngineConfig};
pub use crawler::{CrawlOptions, CrawlOutcome, Crawler, NameResolver};
pub use error::{DeviceError, DeviceErrorKind, DiscoveryError};
pub use jobs::{
    DiscoveryMethod, DiscoveryMode, DiscoveryRequest, JobManager, JobResult, JobStatus, JobStore,
    JobView, ResultKind, Services,
};
pub use model::{
    AdjacencyEdge, ConnectionStatus, Credential, DeviceRecord, InterfaceRecord, Neighbor,
    NeighborProtocol, ReachabilityReport, ReachabilityResult, ReachabilitySummary, SeedDevice,
};
pub use scanner::{ReachabilityScanner, ScanProgress, ScanStage};
pub use topology::{TopologyGraph, TopologyLink};
