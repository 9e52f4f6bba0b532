//! Topograph CLI - network discovery from the terminal
//!
//! This binary drives the discovery engine directly:
//! - Run discovery jobs (subnet sweep, seed-device extraction, full crawl)
//! - Sweep addresses and CIDR blocks for ICMP and TCP reachability
//! - List the supported discovery methods
//! - Show the effective engine configuration

mod report;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand, ValueEnum};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use topograph_core::config::{self, EngineConfig};
use topograph_core::scanner::{ProgressCallback, privileges};
use topograph_core::{
    ConnectionStatus, Credential, DiscoveryMethod, DiscoveryMode, DiscoveryRequest, JobManager,
    JobResult, JobStatus, ReachabilityScanner, ResultKind, ScanProgress, SeedDevice,
};

/// Environment variable consulted for passwords omitted from `--credential`
const PASSWORD_ENV: &str = "TOPOGRAPH_PASSWORD";

/// Enable secret for credentials that do not carry their own
const ENABLE_SECRET_ENV: &str = "TOPOGRAPH_ENABLE_SECRET";

const POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Parser)]
#[command(name = "topograph")]
#[command(author = "Topograph Team")]
#[command(version)]
#[command(about = "Discover network devices and the links between them")]
#[command(long_about = "
Topograph logs into network devices over SSH, reads their interface,
route and neighbor tables, and assembles a topology from what they report.

Quick start:
  1. Sweep a subnet:        topograph discover --mode subnet 10.0.0.0/24
  2. Crawl from a switch:   topograph discover -c admin 10.0.0.1
  3. Show the topology:     topograph discover -c admin 10.0.0.1 --output topology

Passwords omitted from --credential are read from TOPOGRAPH_PASSWORD.
TOPOGRAPH_ENABLE_SECRET supplies the enable secret for privileged mode.
")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format
    #[arg(short, long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for scripting
    Json,
}

/// Which part of a finished job to print
#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputKind {
    /// Status snapshot with counts and a device preview
    Summary,
    Devices,
    Reachability,
    Subnets,
    Topology,
    /// Job error and per-device failures
    Errors,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StatusFilter {
    Success,
    Failed,
    Unreachable,
}

impl From<StatusFilter> for ConnectionStatus {
    fn from(filter: StatusFilter) -> Self {
        match filter {
            StatusFilter::Success => ConnectionStatus::Success,
            StatusFilter::Failed => ConnectionStatus::Failed,
            StatusFilter::Unreachable => ConnectionStatus::Unreachable,
        }
    }
}

impl OutputKind {
    fn result_kind(self) -> Option<ResultKind> {
        match self {
            OutputKind::Summary => None,
            OutputKind::Devices => Some(ResultKind::Devices),
            OutputKind::Reachability => Some(ResultKind::Reachability),
            OutputKind::Subnets => Some(ResultKind::Subnets),
            OutputKind::Topology => Some(ResultKind::Topology),
            OutputKind::Errors => Some(ResultKind::Error),
        }
    }
}

#[derive(clap::Args)]
pub struct DiscoverArgs {
    /// Seed devices: host, host:port, [v6]:port or CIDR
    #[arg(required = true)]
    pub seeds: Vec<String>,

    /// Login as user:password (password falls back to TOPOGRAPH_PASSWORD), tried in order
    #[arg(short, long = "credential")]
    pub credentials: Vec<String>,

    /// JSON file with a list of {"username", "password", "port", "enable_secret"} objects
    #[arg(long)]
    pub credentials_file: Option<std::path::PathBuf>,

    /// subnet, seed-device or full-pipeline
    #[arg(short, long, default_value = "full-pipeline")]
    pub mode: String,

    /// Discovery method (see `topograph methods`)
    #[arg(long, default_value = "auto")]
    pub method: String,

    /// Maximum hops from the seeds
    #[arg(long)]
    pub max_depth: Option<u32>,

    /// Job deadline and per-command timeout, in seconds
    #[arg(short, long)]
    pub timeout: Option<u64>,

    /// Simultaneous device sessions
    #[arg(long)]
    pub concurrent_connections: Option<usize>,

    /// Extra login attempts after a refused or timed-out connection
    #[arg(long)]
    pub retry_count: Option<u32>,

    /// TCP ports to probe, comma separated
    #[arg(long)]
    pub probe_ports: Option<String>,

    /// Simultaneous host probes during sweeps
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Caller-chosen job id
    #[arg(long)]
    pub job_id: Option<String>,

    /// Neighbor protocol to read (cdp, lldp); repeatable
    #[arg(long = "protocol")]
    pub protocols: Vec<String>,

    /// Regex for hostnames or addresses to skip; repeatable
    #[arg(short = 'x', long = "exclude")]
    pub exclude: Vec<String>,

    /// What to print once the job finishes
    #[arg(short, long, default_value = "summary")]
    pub output: OutputKind,

    /// Only print devices with this connection status (with --output devices)
    #[arg(long)]
    pub status: Option<StatusFilter>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a discovery job and wait for it to finish
    Discover(DiscoverArgs),

    /// Sweep addresses for ICMP and TCP reachability
    Scan {
        /// Addresses or CIDR blocks
        #[arg(required = true)]
        targets: Vec<String>,

        /// TCP ports to probe, comma separated
        #[arg(short, long)]
        ports: Option<String>,

        /// Simultaneous host probes
        #[arg(long)]
        concurrency: Option<usize>,
    },

    /// List discovery methods and the modes that accept them
    Methods,

    /// Show configuration paths and settings
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("topograph={},topograph_core={}", log_level, log_level).into()
            }),
        )
        .with_target(false)
        .init();

    match &cli.command {
        Commands::Discover(args) => cmd_discover(&cli, args).await,
        Commands::Scan {
            targets,
            ports,
            concurrency,
        } => cmd_scan(&cli, targets, ports.as_deref(), *concurrency).await,
        Commands::Methods => cmd_methods(&cli),
        Commands::Config => cmd_config(&cli).await,
    }
}

fn parse_ports(raw: Option<&str>) -> Result<Option<Vec<u16>>> {
    raw.map(|raw| {
        config::parse_port_list(raw).ok_or_else(|| anyhow!("invalid port list '{}'", raw))
    })
    .transpose()
}

/// `user:password`, or `user` with the password from the environment
fn parse_credential(raw: &str) -> Result<Credential> {
    let (username, password) = match raw.split_once(':') {
        Some((user, password)) => (user.to_string(), password.to_string()),
        None => {
            let password = std::env::var(PASSWORD_ENV).with_context(|| {
                format!("no password given for '{}' and {} is not set", raw, PASSWORD_ENV)
            })?;
            (raw.to_string(), password)
        }
    };
    if username.is_empty() {
        bail!("credential '{}' has an empty username", raw);
    }
    Ok(Credential::new(username, password))
}

fn load_credentials(args: &DiscoverArgs) -> Result<Vec<Credential>> {
    let mut credentials = args
        .credentials
        .iter()
        .map(|raw| parse_credential(raw))
        .collect::<Result<Vec<_>>>()?;
    if let Some(path) = &args.credentials_file {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let from_file: Vec<Credential> = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        credentials.extend(from_file);
    }
    apply_enable_secret(&mut credentials, std::env::var(ENABLE_SECRET_ENV).ok());
    Ok(credentials)
}

/// Give `secret` to every credential without an enable secret of its own
fn apply_enable_secret(credentials: &mut [Credential], secret: Option<String>) {
    let Some(secret) = secret.filter(|s| !s.is_empty()) else {
        return;
    };
    for credential in credentials.iter_mut() {
        if credential.enable_secret.is_none() {
            credential.enable_secret = Some(secret.clone());
        }
    }
}

fn build_request(args: &DiscoverArgs) -> Result<DiscoveryRequest> {
    let mode: DiscoveryMode = args.mode.parse()?;
    let method: DiscoveryMethod = args.method.parse()?;
    Ok(DiscoveryRequest {
        seed_devices: args.seeds.clone(),
        credentials: load_credentials(args)?,
        mode,
        method,
        max_depth: args.max_depth,
        timeout: args.timeout,
        concurrent_connections: args.concurrent_connections,
        retry_count: args.retry_count,
        probe_ports: parse_ports(args.probe_ports.as_deref())?,
        concurrency: args.concurrency,
        job_id: args.job_id.clone(),
        discovery_protocols: (!args.protocols.is_empty()).then(|| args.protocols.clone()),
        exclude_patterns: args.exclude.clone(),
    })
}

async fn cmd_discover(cli: &Cli, args: &DiscoverArgs) -> Result<()> {
    let request = build_request(args)?;
    if args.status.is_some() && args.output != OutputKind::Devices {
        bail!("--status only applies to --output devices");
    }
    let manager = JobManager::with_config(config::load_engine_config());
    let job_id = manager.create_job(request)?;

    match cli.format {
        OutputFormat::Text => println!("Started job {}", job_id),
        OutputFormat::Json => {}
    }

    let view = tokio::select! {
        view = follow_job(cli, &manager, &job_id) => view?,
        _ = tokio::signal::ctrl_c() => bail!("interrupted; job {} abandoned", job_id),
    };

    match args.output.result_kind() {
        None => match cli.format {
            OutputFormat::Text => {
                println!();
                report::print_view(&view);
            }
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&view)?),
        },
        Some(kind) => {
            let result = match args.status {
                Some(status) => JobResult::Devices(manager.devices(&job_id, Some(status.into()))?),
                None => manager.result(&job_id, kind)?,
            };
            match cli.format {
                OutputFormat::Text => {
                    println!();
                    print_result(&result);
                }
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
            }
        }
    }

    if view.status == JobStatus::Failed {
        bail!(
            "job {} failed: {}",
            job_id,
            view.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

/// Poll until the job finishes, echoing stage changes in text mode
async fn follow_job(
    cli: &Cli,
    manager: &JobManager,
    job_id: &str,
) -> Result<topograph_core::JobView> {
    let mut last_line = String::new();
    loop {
        let view = manager.status(job_id)?;
        if view.status.is_terminal() {
            return Ok(view);
        }
        if let OutputFormat::Text = cli.format {
            let line = match (&view.stage, &view.progress) {
                (Some(_), Some(progress)) => report::progress_line(progress),
                (Some(stage), None) => format!("  {}...", stage),
                (None, _) => format!("  {}...", view.status),
            };
            if line != last_line {
                println!("{}", line);
                last_line = line;
            }
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

fn print_result(result: &JobResult) {
    match result {
        JobResult::Devices(devices) => report::print_devices(devices),
        JobResult::Reachability(reach) => report::print_reachability(reach),
        JobResult::Subnets(subnets) => report::print_subnets(subnets),
        JobResult::Topology(graph) => report::print_topology(graph),
        JobResult::Error(errors) => report::print_errors(errors),
    }
}

async fn cmd_scan(
    cli: &Cli,
    targets: &[String],
    ports: Option<&str>,
    concurrency: Option<usize>,
) -> Result<()> {
    let engine = config::load_engine_config();
    let ports = parse_ports(ports)?.unwrap_or_else(|| engine.probe_ports.clone());
    let concurrency = concurrency.unwrap_or(engine.concurrency);
    if concurrency == 0 {
        bail!("concurrency must be at least 1");
    }
    let seeds = targets
        .iter()
        .map(|raw| SeedDevice::parse(raw).map(|seed| seed.address).map_err(|e| anyhow!(e)))
        .collect::<Result<Vec<_>>>()?;

    match cli.format {
        OutputFormat::Text => println!("Scanning {} target(s)...", seeds.len()),
        OutputFormat::Json => {}
    }

    // Create progress callback for text mode
    let progress_callback: Option<ProgressCallback> = match cli.format {
        OutputFormat::Text => Some(Arc::new(|progress: ScanProgress| {
            println!("{}", report::progress_line(&progress));
        })),
        OutputFormat::Json => None,
    };

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    let scanner = ReachabilityScanner::system(engine.tcp_probe_timeout());
    let result = scanner
        .scan_targets(
            &seeds,
            &ports,
            concurrency,
            engine.max_hosts_per_target,
            &cancel,
            progress_callback,
        )
        .await?;

    match cli.format {
        OutputFormat::Text => {
            println!();
            report::print_reachability(&result);
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
    }
    Ok(())
}

fn cmd_methods(cli: &Cli) -> Result<()> {
    match cli.format {
        OutputFormat::Text => {
            for method in DiscoveryMethod::all() {
                let modes: Vec<&str> = method.modes().iter().map(|m| m.as_str()).collect();
                println!("{:<28} {}", method.as_str(), method.description());
                println!("{:<28} modes: {}", "", modes.join(", "));
            }
        }
        OutputFormat::Json => {
            let methods: Vec<serde_json::Value> = DiscoveryMethod::all()
                .iter()
                .map(|method| {
                    serde_json::json!({
                        "name": method.as_str(),
                        "description": method.description(),
                        "modes": method.modes(),
                    })
                })
                .collect();
            println!("{}", serde_json::json!({ "methods": methods }));
        }
    }
    Ok(())
}

fn print_config_line(engine: &EngineConfig, label: &str, key: &str, value: String) {
    println!("{:<24} {} (from {})", label, value, engine.source_of(key));
}

async fn cmd_config(cli: &Cli) -> Result<()> {
    let engine = config::load_engine_config();
    let config_path = config::get_config_file_path_string();
    let capabilities = privileges::detect_capabilities().await;

    match cli.format {
        OutputFormat::Text => {
            println!("Configuration");
            println!("=============");
            println!();
            println!("Config file:             {}", config_path);
            let ports: Vec<String> = engine.probe_ports.iter().map(u16::to_string).collect();
            print_config_line(
                &engine,
                "Timeout:",
                "timeout_secs",
                format!("{}s", engine.timeout_secs),
            );
            print_config_line(
                &engine,
                "Probe concurrency:",
                "concurrency",
                engine.concurrency.to_string(),
            );
            print_config_line(&engine, "Probe ports:", "probe_ports", ports.join(","));
            print_config_line(
                &engine,
                "Device sessions:",
                "concurrent_connections",
                engine.concurrent_connections.to_string(),
            );
            print_config_line(&engine, "Max depth:", "max_depth", engine.max_depth.to_string());
            print_config_line(
                &engine,
                "Login retries:",
                "retry_count",
                engine.retry_count.to_string(),
            );
            print_config_line(
                &engine,
                "TCP probe timeout:",
                "tcp_probe_timeout_ms",
                format!("{}ms", engine.tcp_probe_timeout_ms),
            );
            print_config_line(
                &engine,
                "Job TTL:",
                "job_ttl_secs",
                format!("{}s", engine.job_ttl_secs),
            );
            print_config_line(
                &engine,
                "Hostname fallback:",
                "hostname_fallback",
                engine.hostname_fallback.to_string(),
            );
            print_config_line(
                &engine,
                "Max hosts per target:",
                "max_hosts_per_target",
                engine.max_hosts_per_target.to_string(),
            );
            println!();
            println!("Probes: {}", privileges::format_capabilities_message(&capabilities));
            println!();
            println!("Environment variables:");
            println!("  TOPOGRAPH_TIMEOUT      - Override job timeout (seconds)");
            println!("  TOPOGRAPH_CONCURRENCY  - Override probe concurrency");
            println!("  TOPOGRAPH_PROBE_PORTS  - Override probe ports (comma separated)");
            println!("  TOPOGRAPH_JOB_TTL      - Override finished-job retention (seconds)");
            println!("  TOPOGRAPH_RETRY_COUNT  - Override login retries after transient failures");
            println!("  {}     - Password for credentials given without one", PASSWORD_ENV);
            println!("  {} - Enable secret for privileged mode", ENABLE_SECRET_ENV);
            println!();
            println!("Example config.toml:");
            println!();
            println!("{}", config::generate_example_config());
        }
        OutputFormat::Json => {
            let report = serde_json::json!({
                "config_file": config_path,
                "engine": engine,
                "capabilities": capabilities,
            });
            println!("{}", report);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_credential_with_password() {
        let cred = parse_credential("admin:s3:cret").unwrap();
        assert_eq!(cred.username, "admin");
        assert_eq!(cred.password, "s3:cret");
    }

    #[test]
    fn test_parse_credential_rejects_empty_user() {
        assert!(parse_credential(":pw").is_err());
    }

    #[test]
    fn test_parse_ports() {
        assert_eq!(parse_ports(Some("22,443")).unwrap(), Some(vec![22, 443]));
        assert_eq!(parse_ports(None).unwrap(), None);
        assert!(parse_ports(Some("22,http")).is_err());
    }

    #[test]
    fn test_cli_parses_discover() {
        let cli = Cli::try_parse_from([
            "topograph",
            "discover",
            "10.0.0.1",
            "-c",
            "ops:pw",
            "--mode",
            "seed-device",
            "--protocol",
            "lldp",
            "--output",
            "subnets",
        ])
        .unwrap();
        let Commands::Discover(args) = cli.command else {
            panic!("expected discover");
        };
        let request = build_request(&args).unwrap();
        assert_eq!(request.mode, DiscoveryMode::SeedDevice);
        assert_eq!(request.credentials.len(), 1);
        assert_eq!(request.discovery_protocols, Some(vec!["lldp".to_string()]));
        assert!(args.output == OutputKind::Subnets);
    }

    #[test]
    fn test_enable_secret_fills_only_missing() {
        let mut credentials = vec![
            Credential::new("ops", "pw"),
            Credential::new("netadmin", "pw").with_enable_secret("own"),
        ];
        apply_enable_secret(&mut credentials, Some("shared".to_string()));
        assert_eq!(credentials[0].enable_secret.as_deref(), Some("shared"));
        assert_eq!(credentials[1].enable_secret.as_deref(), Some("own"));

        let mut untouched = vec![Credential::new("ops", "pw")];
        apply_enable_secret(&mut untouched, Some(String::new()));
        apply_enable_secret(&mut untouched, None);
        assert!(untouched[0].enable_secret.is_none());
    }

    #[test]
    fn test_cli_parses_status_filter_and_retries() {
        let cli = Cli::try_parse_from([
            "topograph",
            "discover",
            "10.0.0.0/24",
            "-c",
            "ops:pw",
            "--retry-count",
            "0",
            "--output",
            "devices",
            "--status",
            "unreachable",
        ])
        .unwrap();
        let Commands::Discover(args) = cli.command else {
            panic!("expected discover");
        };
        let request = build_request(&args).unwrap();
        assert_eq!(request.retry_count, Some(0));
        assert_eq!(args.status.map(ConnectionStatus::from), Some(ConnectionStatus::Unreachable));
    }
}
