mod common;

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{Lab, StaticPinger, StaticProber, creds, finish, ip, manager, scanner};
use tokio_util::sync::CancellationToken;
use topograph_core::scanner::targets::expand_targets;
use topograph_core::scanner::{ProgressCallback, ReachabilityScanner, ScanStage};
use topograph_core::{
    ConnectionStatus, DiscoveryMethod, DiscoveryMode, DiscoveryRequest, JobResult, JobStatus,
    ResultKind, SeedDevice,
};

fn seeds(raw: &[&str]) -> Vec<topograph_core::model::SeedAddress> {
    raw.iter()
        .map(|s| SeedDevice::parse(s).unwrap().address)
        .collect()
}

#[test]
fn test_cidr_expansion_counts() {
    let hosts = expand_targets(&seeds(&["192.168.1.0/24"]), 65536).unwrap();
    assert_eq!(hosts.len(), 254);
    assert_eq!(hosts[0], ip("192.168.1.1"));
    assert_eq!(hosts[253], ip("192.168.1.254"));

    let p2p = expand_targets(&seeds(&["192.168.1.0/31"]), 65536).unwrap();
    assert_eq!(p2p, vec![ip("192.168.1.0"), ip("192.168.1.1")]);

    assert!(expand_targets(&seeds(&["10.0.0.0/8"]), 65536).is_err());
}

#[tokio::test]
async fn test_results_follow_input_order() {
    let prober = StaticProber {
        open: [(ip("10.0.0.5"), 22), (ip("10.0.0.1"), 443)].into_iter().collect(),
        latency: HashMap::from([(ip("10.0.0.5"), Duration::from_millis(60))]),
        ..Default::default()
    };
    let pinger = StaticPinger {
        alive: [ip("10.0.0.1")].into_iter().collect(),
    };
    let scanner = ReachabilityScanner::new(
        vec![Box::new(pinger)],
        Arc::new(prober),
        Duration::from_millis(100),
    );

    let report = scanner
        .scan(
            &[ip("10.0.0.5"), ip("10.0.0.1")],
            &[22, 443],
            8,
            &CancellationToken::new(),
            None,
        )
        .await;

    let order: Vec<IpAddr> = report.results.iter().map(|r| r.ip).collect();
    assert_eq!(order, vec![ip("10.0.0.5"), ip("10.0.0.1")]);
    assert!(!report.results[0].icmp_reachable);
    assert_eq!(report.results[0].open_ports, vec![22]);
    assert!(report.results[1].icmp_reachable);
    assert_eq!(report.results[1].open_ports, vec![443]);
    assert_eq!(report.summary.live_hosts, 2);
    assert_eq!(report.summary.ports_open[&22], 1);
    assert_eq!(report.summary.ports_open[&443], 1);
}

#[tokio::test]
async fn test_progress_ends_with_complete() {
    let scanner = scanner(&[], &[]);
    let stages = Arc::new(Mutex::new(Vec::new()));
    let sink = stages.clone();
    let on_progress: ProgressCallback =
        Arc::new(move |p| sink.lock().unwrap().push((p.stage, p.total)));

    scanner
        .scan_targets(
            &seeds(&["10.0.0.0/30"]),
            &[22],
            4,
            65536,
            &CancellationToken::new(),
            Some(on_progress),
        )
        .await
        .unwrap();

    let stages = stages.lock().unwrap();
    assert_eq!(stages.first(), Some(&(ScanStage::PingSweep, 2)));
    assert_eq!(stages.last(), Some(&(ScanStage::Complete, 2)));
}

#[tokio::test]
async fn test_cancelled_scan_reports_every_address() {
    let prober = Arc::new(StaticProber::default());
    let scanner = ReachabilityScanner::new(Vec::new(), prober.clone(), Duration::from_millis(10));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let addresses: Vec<IpAddr> = (1..=20).map(|i| ip(&format!("10.0.0.{}", i))).collect();
    let report = scanner.scan(&addresses, &[22], 4, &cancel, None).await;

    assert_eq!(report.results.len(), 20);
    assert!(report.results.iter().all(|r| !r.is_live()));
    assert!(prober.probes.load(Ordering::SeqCst) <= 4);
}

#[tokio::test]
async fn test_subnet_job_reports_reachability_only() {
    let lab = Arc::new(Lab::new());
    let manager = manager(lab, scanner(&["10.0.0.1"], &[("10.0.0.2", 443)]));

    let id = manager
        .create_job(DiscoveryRequest {
            seed_devices: vec!["10.0.0.0/30".to_string(), "10.0.0.9".to_string()],
            mode: DiscoveryMode::Subnet,
            probe_ports: Some(vec![443]),
            ..Default::default()
        })
        .unwrap();
    let view = finish(&manager, &id).await;
    assert_eq!(view.status, JobStatus::Completed);
    assert_eq!(view.method, DiscoveryMethod::IpReachability);

    let reach = view.summary.reachability.unwrap();
    assert_eq!(reach.total_scanned, 3);
    assert_eq!(reach.live_hosts, 2);
    assert_eq!(reach.icmp_reachable, 1);

    let JobResult::Reachability(report) = manager.result(&id, ResultKind::Reachability).unwrap()
    else {
        panic!("expected reachability");
    };
    let order: Vec<IpAddr> = report.results.iter().map(|r| r.ip).collect();
    assert_eq!(order, vec![ip("10.0.0.1"), ip("10.0.0.2"), ip("10.0.0.9")]);
}

#[tokio::test]
async fn test_subnet_scan_introspects_live_hosts() {
    let lab = Arc::new(
        Lab::new()
            .device("10.0.0.1", "edge-1", "", vec![])
            .device("10.0.0.2", "edge-2", "", vec![]),
    );
    let stats = lab.stats.clone();
    let manager = manager(lab, scanner(&["10.0.0.1"], &[("10.0.0.2", 22)]));

    let id = manager
        .create_job(DiscoveryRequest {
            seed_devices: vec!["10.0.0.0/29".to_string()],
            credentials: creds(&["ops"]),
            mode: DiscoveryMode::Subnet,
            method: DiscoveryMethod::SubnetScan,
            ..Default::default()
        })
        .unwrap();
    let view = finish(&manager, &id).await;
    assert_eq!(view.status, JobStatus::Completed);

    let JobResult::Devices(devices) = manager.result(&id, ResultKind::Devices).unwrap() else {
        panic!("expected devices");
    };
    let mut names: Vec<_> = devices.iter().filter_map(|d| d.hostname.clone()).collect();
    names.sort();
    assert_eq!(names, vec!["edge-1", "edge-2"]);
    assert!(devices.iter().all(|d| d.status == ConnectionStatus::Success));

    // dead hosts in the /29 are never logged into
    assert_eq!(stats.connects(ip("10.0.0.3")), 0);
    assert_eq!(stats.open(), 0);
}
