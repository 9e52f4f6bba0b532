//! ICMP echo tiers: fping, async ICMP echo through surge-ping, and the system
//! ping command. The scanner picks the first available tier once per lifetime.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::net::IpAddr;
use std::process::Stdio;
use std::time::Duration;
use surge_ping::SurgeError;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

use crate::process::{hidden_command, program_on_path};

#[derive(Error, Debug)]
pub enum PingError {
    #[error("{0} is not available")]
    Unavailable(&'static str),

    #[error("{tool} failed: {message}")]
    ToolFailed { tool: &'static str, message: String },

    #[error("ICMP error: {0}")]
    Icmp(SurgeError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One ICMP sweep strategy
#[async_trait]
pub trait Pinger: Send + Sync {
    fn name(&self) -> &'static str;

    /// Cheap probe for whether this tier can run here at all
    async fn available(&self) -> bool;

    /// Return the subset of `targets` that answered an echo request.
    async fn sweep(
        &self,
        targets: &[IpAddr],
        timeout: Duration,
        concurrency: usize,
    ) -> Result<HashSet<IpAddr>, PingError>;
}

/// Default tier order
pub fn default_pingers() -> Vec<Box<dyn Pinger>> {
    vec![
        Box::new(FpingPinger),
        Box::new(IcmpSocketPinger),
        Box::new(SystemPinger),
    ]
}

/// Parallel sweep through `fping -a`, targets fed on stdin
pub struct FpingPinger;

#[async_trait]
impl Pinger for FpingPinger {
    fn name(&self) -> &'static str {
        "fping"
    }

    async fn available(&self) -> bool {
        program_on_path("fping")
    }

    async fn sweep(
        &self,
        targets: &[IpAddr],
        timeout: Duration,
        _concurrency: usize,
    ) -> Result<HashSet<IpAddr>, PingError> {
        if targets.is_empty() {
            return Ok(HashSet::new());
        }

        let timeout_ms = timeout.as_millis().max(100).to_string();
        let mut child = hidden_command("fping")
            .args(["-a", "-r", "1", "-t", &timeout_ms])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or(PingError::Unavailable("fping stdin"))?;
        let input: String = targets.iter().map(|ip| format!("{}\n", ip)).collect();
        stdin.write_all(input.as_bytes()).await?;
        drop(stdin);

        let output = child.wait_with_output().await?;

        // 0: all alive, 1: some unreachable, 2: some addresses not found
        match output.status.code() {
            Some(0..=2) => {}
            other => {
                return Err(PingError::ToolFailed {
                    tool: "fping",
                    message: format!("exit status {:?}", other),
                });
            }
        }

        let requested: HashSet<&IpAddr> = targets.iter().collect();
        let alive = parse_fping_alive(&String::from_utf8_lossy(&output.stdout))
            .into_iter()
            .filter(|ip| requested.contains(ip))
            .collect::<HashSet<_>>();

        tracing::debug!("fping: {}/{} hosts alive", alive.len(), targets.len());
        Ok(alive)
    }
}

/// Parse `fping -a` output: one alive address per line
fn parse_fping_alive(output: &str) -> Vec<IpAddr> {
    output
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .filter_map(|token| token.parse().ok())
        .collect()
}

/// Echo requests through surge-ping's async ICMP client
pub struct IcmpSocketPinger;

const ECHO_PAYLOAD: [u8; 56] = [0; 56];

async fn echo_once(ip: IpAddr, timeout: Duration) -> Result<bool, SurgeError> {
    match tokio::time::timeout(timeout, surge_ping::ping(ip, &ECHO_PAYLOAD)).await {
        Ok(Ok(_)) => Ok(true),
        Ok(Err(SurgeError::Timeout { .. })) | Err(_) => Ok(false),
        Ok(Err(e)) => Err(e),
    }
}

#[async_trait]
impl Pinger for IcmpSocketPinger {
    fn name(&self) -> &'static str {
        "icmp-socket"
    }

    async fn available(&self) -> bool {
        match surge_ping::Client::new(&surge_ping::Config::default()) {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!("ICMP socket unavailable: {}", e);
                false
            }
        }
    }

    async fn sweep(
        &self,
        targets: &[IpAddr],
        timeout: Duration,
        concurrency: usize,
    ) -> Result<HashSet<IpAddr>, PingError> {
        let outcomes: Vec<(IpAddr, Result<bool, SurgeError>)> =
            stream::iter(targets.iter().copied())
                .map(|ip| async move { (ip, echo_once(ip, timeout).await) })
                .buffer_unordered(concurrency.max(1))
                .collect()
                .await;

        let mut alive = HashSet::new();
        let mut failures = 0;
        let mut last_error = None;
        for (ip, outcome) in outcomes {
            match outcome {
                Ok(true) => {
                    alive.insert(ip);
                }
                Ok(false) => {}
                Err(e) => {
                    failures += 1;
                    last_error = Some(e);
                }
            }
        }

        // Every echo erroring marks the tier unusable
        if let Some(e) = last_error.filter(|_| failures == targets.len()) {
            return Err(PingError::Icmp(e));
        }

        Ok(alive)
    }
}

/// Per-host system `ping`, one echo each
pub struct SystemPinger;

fn ping_command(ip: &IpAddr, timeout: Duration) -> tokio::process::Command {
    let secs = timeout.as_secs().max(1).to_string();

    #[cfg(target_os = "windows")]
    {
        let ms = timeout.as_millis().max(500).to_string();
        let mut cmd = hidden_command("ping");
        cmd.args(["-n", "1", "-w", &ms, &ip.to_string()]);
        cmd
    }

    #[cfg(target_os = "macos")]
    {
        let program = if ip.is_ipv6() { "ping6" } else { "ping" };
        let mut cmd = hidden_command(program);
        if ip.is_ipv6() {
            cmd.args(["-c", "1", &ip.to_string()]);
        } else {
            cmd.args(["-c", "1", "-t", &secs, &ip.to_string()]);
        }
        cmd
    }

    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        let mut cmd = hidden_command("ping");
        cmd.args(["-c", "1", "-W", &secs, &ip.to_string()]);
        cmd
    }
}

async fn ping_host(ip: IpAddr, timeout: Duration) -> Result<bool, PingError> {
    let output = tokio::time::timeout(
        timeout + Duration::from_secs(1),
        ping_command(&ip, timeout)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .output(),
    )
    .await;

    let output = match output {
        Ok(result) => result?,
        Err(_) => return Ok(false),
    };
    #[cfg(target_os = "windows")]
    {
        // Windows ping exits 0 on "Destination host unreachable"
        let output_str = String::from_utf8_lossy(&output.stdout);
        if !output_str.to_lowercase().contains("reply from")
            || output_str.to_lowercase().contains("unreachable")
        {
            return Ok(false);
        }
    }

    #[cfg(not(target_os = "windows"))]
    {
        if !output.status.success() {
            return Ok(false);
        }
    }

    tracing::trace!("{} answered system ping", ip);
    Ok(true)
}

#[async_trait]
impl Pinger for SystemPinger {
    fn name(&self) -> &'static str {
        "system-ping"
    }

    async fn available(&self) -> bool {
        program_on_path("ping")
    }

    async fn sweep(
        &self,
        targets: &[IpAddr],
        timeout: Duration,
        concurrency: usize,
    ) -> Result<HashSet<IpAddr>, PingError> {
        let outcomes: Vec<(IpAddr, Result<bool, PingError>)> =
            stream::iter(targets.iter().copied())
                .map(|ip| async move { (ip, ping_host(ip, timeout).await) })
                .buffer_unordered(concurrency.max(1))
                .collect()
                .await;

        let mut alive = HashSet::new();
        let mut spawn_failures = 0;
        let mut last_error = None;
        for (ip, outcome) in outcomes {
            match outcome {
                Ok(true) => {
                    alive.insert(ip);
                }
                Ok(false) => {}
                Err(e) => {
                    spawn_failures += 1;
                    last_error = Some(e);
                }
            }
        }

        if let Some(e) = last_error.filter(|_| spawn_failures == targets.len()) {
            return Err(e);
        }
        Ok(alive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fping_alive() {
        let out = "10.0.0.1\n10.0.0.7\n\nnot-an-ip\n";
        let alive = parse_fping_alive(out);
        assert_eq!(alive.len(), 2);
        assert_eq!(alive[1], "10.0.0.7".parse::<IpAddr>().unwrap());
    }

    #[tokio::test]
    async fn test_empty_fping_sweep_skips_spawn() {
        let alive = FpingPinger
            .sweep(&[], Duration::from_millis(100), 10)
            .await
            .unwrap();
        assert!(alive.is_empty());
    }

    #[tokio::test]
    async fn test_empty_icmp_sweep_opens_no_socket() {
        let alive = IcmpSocketPinger
            .sweep(&[], Duration::from_millis(100), 10)
            .await
            .unwrap();
        assert!(alive.is_empty());
    }
}
