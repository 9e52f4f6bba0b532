//! Human-readable renderings of job snapshots and results.

use topograph_core::jobs::{JobErrorReport, JobView};
use topograph_core::topology::{LinkEnd, LinkStatus};
use topograph_core::{
    DeviceRecord, NeighborProtocol, ReachabilityReport, ScanProgress, ScanStage, TopologyGraph,
};

use ipnetwork::Ipv4Network;

fn or_dash(value: Option<&str>) -> &str {
    value.unwrap_or("-")
}

pub fn progress_line(progress: &ScanProgress) -> String {
    let stage = match progress.stage {
        ScanStage::PingSweep => "ping sweep",
        ScanStage::PortProbe => "port probe",
        ScanStage::Complete => "complete",
    };
    let pct = if progress.total == 0 {
        100
    } else {
        progress.completed * 100 / progress.total
    };
    format!(
        "  [{:>3}%] {} {}/{} ({:.1}s)",
        pct, stage, progress.completed, progress.total, progress.elapsed_secs
    )
}

pub fn print_view(view: &JobView) {
    println!("Job:       {}", view.job_id);
    println!("Mode:      {} ({})", view.mode, view.method.as_str());
    println!("Status:    {}", view.status);
    if let Some(secs) = view.duration_secs {
        println!("Duration:  {:.1}s", secs);
    }
    if let Some(error) = &view.error {
        println!("Error:     {}", error);
    }

    let summary = &view.summary;
    println!();
    println!(
        "Devices:   {} ({} ok, {} failed)",
        summary.total_devices, summary.successful_connections, summary.failed_connections
    );
    if let Some(subnets) = summary.subnets {
        println!("Subnets:   {}", subnets);
    }
    if let Some(links) = summary.links {
        println!("Links:     {} ({} adjacency reports)", links, summary.edges);
    }
    if let Some(reach) = &summary.reachability {
        println!(
            "Scanned:   {} hosts, {} answer ICMP, {} live",
            reach.total_scanned, reach.icmp_reachable, reach.live_hosts
        );
        for (port, open) in &reach.ports_open {
            println!("  port {:<5} open on {}", port, open);
        }
    }
    if summary.device_errors > 0 {
        println!("Errors:    {}", summary.device_errors);
    }

    if !view.devices_preview.is_empty() {
        println!();
        for device in &view.devices_preview {
            print_device_line(device);
        }
        if summary.total_devices > view.devices_preview.len() {
            println!(
                "  ... and {} more (use --output devices)",
                summary.total_devices - view.devices_preview.len()
            );
        }
    }
}

fn print_device_line(device: &DeviceRecord) {
    let depth = device
        .depth
        .map(|d| d.to_string())
        .unwrap_or_else(|| "-".to_string());
    println!(
        "  {:<39} {:<11} {:>2}  {:<24} {}",
        device.ip_address,
        device.status.to_string(),
        depth,
        or_dash(device.hostname.as_deref()),
        or_dash(device.platform.as_deref().or(device.vendor.as_deref())),
    );
}

pub fn print_devices(devices: &[DeviceRecord]) {
    println!("Found {} devices:", devices.len());
    println!();
    for device in devices {
        print_device_line(device);
        if let Some(error) = &device.error {
            println!("      {}: {}", error.kind, error.message);
        }
        for iface in &device.interfaces {
            let Some(peer) = &iface.connected_to else {
                continue;
            };
            println!(
                "      {} -> {} {}",
                iface.name,
                peer.device,
                or_dash(peer.interface.as_deref())
            );
        }
    }
}

pub fn print_reachability(report: &ReachabilityReport) {
    let summary = &report.summary;
    println!(
        "Scanned {} hosts in {:.1}s: {} answer ICMP, {} live",
        summary.total_scanned, report.duration_secs, summary.icmp_reachable, summary.live_hosts
    );
    println!();
    for result in report.results.iter().filter(|r| r.is_live()) {
        let ports: Vec<String> = result.open_ports.iter().map(u16::to_string).collect();
        println!(
            "  {:<39} {:<5} {}",
            result.ip,
            if result.icmp_reachable { "icmp" } else { "-" },
            ports.join(",")
        );
    }
}

pub fn print_subnets(subnets: &[Ipv4Network]) {
    println!("Extracted {} subnets:", subnets.len());
    for net in subnets {
        println!("  {}", net);
    }
}

fn link_end(end: &LinkEnd) -> String {
    match &end.interface {
        Some(iface) => format!("{} {}", end.device, iface),
        None => end.device.clone(),
    }
}

pub fn print_topology(graph: &TopologyGraph) {
    println!(
        "{} nodes, {} links ({} bidirectional)",
        graph.nodes.len(),
        graph.links.len(),
        graph.bidirectional_count()
    );
    println!();
    for link in &graph.links {
        let protocols: Vec<&str> = link
            .protocols
            .iter()
            .map(|p| match p {
                NeighborProtocol::Cdp => "cdp",
                NeighborProtocol::Lldp => "lldp",
            })
            .collect();
        let arrow = match link.status {
            LinkStatus::Bidirectional => "<->",
            LinkStatus::OneSided => "-->",
        };
        println!(
            "  {} {} {}  [{}]",
            link_end(&link.a),
            arrow,
            link_end(&link.b),
            protocols.join("+")
        );
    }
}

pub fn print_errors(report: &JobErrorReport) {
    println!("Status: {}", report.status);
    if let Some(error) = &report.error {
        println!("Error:  {}", error);
    }
    if report.device_errors.is_empty() {
        println!("No device errors.");
        return;
    }
    println!();
    for error in &report.device_errors {
        println!("  {}", error);
    }
}
