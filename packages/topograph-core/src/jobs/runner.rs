//! Executes one job's pipeline under its deadline.

use futures::FutureExt;
use futures::stream::{self, StreamExt};
use ipnetwork::{IpNetwork, Ipv4Network};
use std::any::Any;
use std::future::Future;
use std::net::IpAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::store::{self, JobHandle};
use super::{DiscoveryMethod, DiscoveryMode, Job, JobParams, JobStage, JobStatus, Services};
use crate::adapter::{self, IntrospectionPlan};
use crate::crawler::{CrawlOptions, Crawler, DeviceCallback};
use crate::error::{DiscoveryError, Result};
use crate::model::{DEFAULT_MANAGEMENT_PORT, DeviceRecord, ReachabilityReport, SeedAddress};
use crate::scanner::{ProgressCallback, targets};
use crate::subnets::{self, SubnetExtraction};
use crate::topology::{self, TopologyOptions};

/// How long a cancelled pipeline may take to wind down
const CANCEL_GRACE: Duration = Duration::from_secs(5);

fn update(handle: &JobHandle, f: impl FnOnce(&mut Job)) {
    f(&mut store::write(handle));
}

fn set_stage(handle: &JobHandle, stage: JobStage) {
    tracing::info!("{}: {}", store::read(handle).id, stage);
    update(handle, |job| {
        job.stage = Some(stage);
        job.progress = None;
    });
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Await a cancelled pipeline, giving up after `grace`
async fn drain<F, T>(pipeline: F, grace: Duration) -> Option<T>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(grace, pipeline).await.ok()
}

pub(super) async fn run_job(handle: JobHandle, services: Services) {
    let (id, params) = {
        let mut job = store::write(&handle);
        if let Err(e) = job.transition(JobStatus::Running) {
            tracing::error!("Job {} could not start: {}", job.id, e);
            return;
        }
        (job.id.clone(), job.params.clone())
    };
    tracing::info!("Job {} running", id);

    let cancel = CancellationToken::new();
    let pipeline =
        AssertUnwindSafe(run_pipeline(&handle, &services, &params, &cancel)).catch_unwind();
    tokio::pin!(pipeline);

    let outcome = tokio::select! {
        outcome = &mut pipeline => outcome,
        _ = tokio::time::sleep(params.timeout()) => {
            tracing::warn!(
                "Job {} reached its {}s deadline, cancelling outstanding work",
                id,
                params.timeout_secs
            );
            cancel.cancel();
            drain(&mut pipeline, CANCEL_GRACE).await.unwrap_or_else(|| {
                Ok(Err(DiscoveryError::internal(format!(
                    "pipeline still running {}s after cancellation",
                    CANCEL_GRACE.as_secs()
                ))))
            })
        }
    };
    let outcome = outcome.unwrap_or_else(|panic| {
        Err(DiscoveryError::internal(format!(
            "pipeline panicked: {}",
            panic_message(panic)
        )))
    });

    let mut job = store::write(&handle);
    let next = match outcome {
        Ok(()) => JobStatus::Completed,
        Err(e) => {
            tracing::error!("Job {} failed: {}", id, e);
            job.error = Some(e.to_string());
            JobStatus::Failed
        }
    };
    if let Err(e) = job.transition(next) {
        tracing::error!("Job {}: {}", id, e);
        return;
    }
    let summary = job.summary();
    tracing::info!(
        "Job {} {}: {} device(s) ({} ok, {} failed)",
        id,
        job.status,
        summary.total_devices,
        summary.successful_connections,
        summary.failed_connections
    );
}

async fn run_pipeline(
    handle: &JobHandle,
    services: &Services,
    params: &JobParams,
    cancel: &CancellationToken,
) -> Result<()> {
    match params.mode {
        DiscoveryMode::Subnet => {
            let seeds: Vec<SeedAddress> = params.seeds.iter().map(|s| s.address.clone()).collect();
            let report = sweep(handle, services, params, &seeds, cancel).await?;
            if params.method == DiscoveryMethod::SubnetScan {
                introspect_live_hosts(handle, services, params, &report, cancel).await;
            }
        }
        DiscoveryMode::SeedDevice => {
            let plan = match params.method {
                DiscoveryMethod::SeedDeviceIntrospection => IntrospectionPlan::inventory(),
                _ => IntrospectionPlan::addressing(),
            };
            let extraction = extract(handle, services, params, &plan, cancel).await;
            update(handle, |job| {
                for record in &extraction.devices {
                    job.results.upsert_device(record.clone());
                }
                job.results.device_errors.extend(extraction.errors.iter().cloned());
            });
            let targets = scan_targets(params, &extraction.subnets);
            sweep(handle, services, params, &targets, cancel).await?;
        }
        DiscoveryMode::FullPipeline => {
            let extraction =
                extract(handle, services, params, &IntrospectionPlan::addressing(), cancel).await;
            let targets = scan_targets(params, &extraction.subnets);
            sweep(handle, services, params, &targets, cancel).await?;
            crawl(handle, services, params, cancel).await;
        }
    }
    Ok(())
}

async fn extract(
    handle: &JobHandle,
    services: &Services,
    params: &JobParams,
    plan: &IntrospectionPlan,
    cancel: &CancellationToken,
) -> SubnetExtraction {
    set_stage(handle, JobStage::ExtractingSubnets);
    let extraction = subnets::extract_subnets(
        services.adapter.clone(),
        &params.seeds,
        &params.credentials,
        plan,
        params.connect_options(),
        params.concurrent_connections,
        &params.exclude,
        cancel,
    )
    .await;
    let found = extraction.subnets.clone();
    update(handle, |job| job.results.subnets = Some(found));
    extraction
}

/// Extracted subnets first, then the caller's own seeds. Extracted networks
/// too large to sweep are skipped rather than failing the job.
fn scan_targets(params: &JobParams, extracted: &[Ipv4Network]) -> Vec<SeedAddress> {
    let limit = params.max_hosts_per_target as u128;
    extracted
        .iter()
        .map(|net| IpNetwork::V4(*net))
        .filter(|net| {
            let fits = targets::host_count(net) <= limit;
            if !fits {
                tracing::warn!("Skipping {}: more than {} hosts", net, limit);
            }
            fits
        })
        .map(SeedAddress::Network)
        .chain(params.seeds.iter().map(|s| s.address.clone()))
        .collect()
}

async fn sweep(
    handle: &JobHandle,
    services: &Services,
    params: &JobParams,
    seeds: &[SeedAddress],
    cancel: &CancellationToken,
) -> Result<ReachabilityReport> {
    set_stage(handle, JobStage::Scanning);
    let addresses: Vec<IpAddr> = targets::expand_targets(seeds, params.max_hosts_per_target)
        .map_err(DiscoveryError::Validation)?
        .into_iter()
        .filter(|ip| !params.exclude.excludes_ip(ip))
        .collect();

    let progress_handle = handle.clone();
    let on_progress: ProgressCallback = Arc::new(move |progress| {
        update(&progress_handle, |job| job.progress = Some(progress));
    });

    let report = services
        .scanner
        .scan(
            &addresses,
            &params.probe_ports,
            params.concurrency,
            cancel,
            Some(on_progress),
        )
        .await;
    let stored = report.clone();
    update(handle, |job| job.results.reachability = Some(stored));
    Ok(report)
}

/// Log into every live host for inventory, without following neighbors
async fn introspect_live_hosts(
    handle: &JobHandle,
    services: &Services,
    params: &JobParams,
    report: &ReachabilityReport,
    cancel: &CancellationToken,
) {
    set_stage(handle, JobStage::Introspecting);
    let live: Vec<IpAddr> = report
        .results
        .iter()
        .filter(|r| r.is_live())
        .map(|r| r.ip)
        .collect();
    tracing::info!("Introspecting {} live host(s)", live.len());

    let plan = IntrospectionPlan::inventory();
    let plan = &plan;
    stream::iter(live)
        .map(|ip| {
            let adapter = services.adapter.clone();
            async move {
                let outcome = adapter::introspect(
                    adapter.as_ref(),
                    ip,
                    DEFAULT_MANAGEMENT_PORT,
                    &params.credentials,
                    plan,
                    params.connect_options(),
                    cancel,
                )
                .await;
                (ip, outcome)
            }
        })
        .buffer_unordered(params.concurrent_connections.max(1))
        .for_each(|(ip, outcome)| {
            update(handle, |job| match outcome {
                Ok(introspection) => {
                    if let Some(error) = &introspection.record.error {
                        job.results.device_errors.push(error.clone());
                    }
                    job.results.upsert_device(introspection.record);
                }
                Err(e) => {
                    tracing::debug!("{}: {}", ip, e);
                    job.results.upsert_device(DeviceRecord::failed(ip, e.clone()));
                    job.results.device_errors.push(e);
                }
            });
            futures::future::ready(())
        })
        .await;
}

async fn crawl(
    handle: &JobHandle,
    services: &Services,
    params: &JobParams,
    cancel: &CancellationToken,
) {
    set_stage(handle, JobStage::Crawling);
    let options = CrawlOptions {
        max_depth: params.max_depth,
        concurrency: params.concurrent_connections,
        timeout: params.timeout(),
        retries: params.retry_count,
        protocols: params.protocols.clone(),
        exclude: params.exclude.clone(),
    };

    let live_handle = handle.clone();
    let on_device: DeviceCallback = Arc::new(move |record: &DeviceRecord| {
        update(&live_handle, |job| job.results.upsert_device(record.clone()));
    });

    let crawler =
        Crawler::new(services.adapter.clone()).with_resolver(services.resolver.clone());
    let outcome = crawler
        .crawl(
            &params.seeds,
            &params.credentials,
            &options,
            cancel,
            Some(on_device),
        )
        .await;

    set_stage(handle, JobStage::BuildingTopology);
    let graph = topology::build(
        &outcome.devices,
        &outcome.edges,
        TopologyOptions {
            hostname_fallback: params.hostname_fallback,
        },
    );
    let mut devices = outcome.devices;
    topology::annotate(&mut devices, &graph);

    update(handle, |job| {
        for record in devices {
            job.results.replace_device(record);
        }
        job.results.edges = outcome.edges;
        job.results.device_errors.extend(outcome.errors);
        job.results.topology = Some(graph);
    });
}
