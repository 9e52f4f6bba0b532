//! Device adapter seam.
//!
//! A `DeviceAdapter` opens a management session with one credential; a
//! `DeviceSession` runs CLI commands and returns raw text. Everything above
//! this seam (credential fallback, vendor detection, parsing) lives here so
//! the crawler and subnet extractor share one login contract.

pub mod oui;
pub mod parsers;
pub mod ssh;
pub mod vendor;

pub use parsers::InterfaceAddress;
pub use ssh::SshCliAdapter;
pub use vendor::{CommandKind, VendorFamily, VendorProfile, profile_for};

use async_trait::async_trait;
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::error::{DeviceError, DeviceErrorKind};
use crate::model::{
    ConnectionStatus, Credential, CredentialRef, DeviceRecord, Neighbor, NeighborProtocol,
};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AdapterError {
    #[error("authentication failed for user '{0}'")]
    Auth(String),

    #[error("unreachable: {0}")]
    Unreachable(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("command '{command}' failed: {message}")]
    Command { command: String, message: String },
}

/// An open management session
#[async_trait]
pub trait DeviceSession: Send {
    async fn run(&mut self, command: &str) -> Result<String, AdapterError>;

    /// Release the session. Always called once, on success and failure.
    async fn close(self: Box<Self>);
}

#[async_trait]
pub trait DeviceAdapter: Send + Sync {
    async fn connect(
        &self,
        target: IpAddr,
        port: u16,
        credential: &Credential,
        timeout: Duration,
    ) -> Result<Box<dyn DeviceSession>, AdapterError>;
}

/// Pause before the n-th retry is `RETRY_BACKOFF * n`
const RETRY_BACKOFF: Duration = Duration::from_millis(250);

/// Connection settings shared by every device in a job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Login and per-command timeout
    pub timeout: Duration,
    /// Extra attempts per credential after an unreachable or timed-out connect
    pub retries: u32,
}

impl ConnectOptions {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            retries: 0,
        }
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }
}

/// Connect once per attempt, retrying transient failures up to `options.retries` times
async fn connect_with_retry(
    adapter: &dyn DeviceAdapter,
    target: IpAddr,
    port: u16,
    credential: &Credential,
    options: ConnectOptions,
) -> Result<Box<dyn DeviceSession>, AdapterError> {
    let timeout = options.timeout;
    let mut attempt = 0;
    loop {
        let connect = adapter.connect(target, port, credential, timeout);
        let result = tokio::time::timeout(timeout, connect)
            .await
            .unwrap_or(Err(AdapterError::Timeout(timeout)));
        match result {
            Err(e @ (AdapterError::Unreachable(_) | AdapterError::Timeout(_)))
                if attempt < options.retries =>
            {
                attempt += 1;
                tracing::debug!(
                    "{}:{} attempt {} failed ({}), retrying",
                    target,
                    port,
                    attempt,
                    e
                );
                tokio::time::sleep(RETRY_BACKOFF * attempt).await;
            }
            other => return other,
        }
    }
}

/// Log in with each credential in order, stopping at the first success.
///
/// A port that proved unreachable is not retried with later credentials.
pub async fn login(
    adapter: &dyn DeviceAdapter,
    target: IpAddr,
    seed_port: u16,
    credentials: &[Credential],
    options: ConnectOptions,
) -> Result<(Box<dyn DeviceSession>, CredentialRef), DeviceError> {
    let target_name = target.to_string();
    if credentials.is_empty() {
        return Err(DeviceError::new(
            target_name,
            DeviceErrorKind::AuthExhausted,
            "no credentials supplied",
        ));
    }

    let mut dead_ports = HashSet::new();
    let mut rejected = 0;
    let mut last_failure = String::new();

    for credential in credentials {
        let port = credential.effective_port(seed_port);
        if dead_ports.contains(&port) {
            continue;
        }

        match connect_with_retry(adapter, target, port, credential, options).await {
            Ok(session) => {
                tracing::debug!("{}:{} logged in as {}", target, port, credential.username);
                return Ok((
                    session,
                    CredentialRef {
                        username: credential.username.clone(),
                        port,
                    },
                ));
            }
            Err(AdapterError::Auth(user)) => {
                tracing::debug!("{}:{} rejected credentials for {}", target, port, user);
                rejected += 1;
                last_failure = format!("authentication failed for user '{}'", user);
            }
            Err(e) => {
                tracing::debug!("{}:{} connection failed: {}", target, port, e);
                dead_ports.insert(port);
                last_failure = e.to_string();
            }
        }
    }

    if rejected > 0 {
        Err(DeviceError::new(
            target_name,
            DeviceErrorKind::AuthExhausted,
            format!("all {} credential(s) failed: {}", credentials.len(), last_failure),
        ))
    } else {
        Err(DeviceError::new(
            target_name,
            DeviceErrorKind::Unreachable,
            last_failure,
        ))
    }
}

/// What to collect from a device once logged in
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntrospectionPlan {
    /// Hostname and interface table
    pub inventory: bool,
    pub config: bool,
    /// Interface addresses and connected routes
    pub addressing: bool,
    pub neighbors: Vec<NeighborProtocol>,
}

impl IntrospectionPlan {
    pub fn inventory() -> Self {
        Self {
            inventory: true,
            config: true,
            ..Default::default()
        }
    }

    pub fn addressing() -> Self {
        Self {
            addressing: true,
            ..Default::default()
        }
    }

    pub fn crawl(protocols: &[NeighborProtocol]) -> Self {
        Self {
            inventory: true,
            config: true,
            addressing: false,
            neighbors: protocols.to_vec(),
        }
    }
}

/// Everything learned from one device session
#[derive(Debug, Clone)]
pub struct Introspection {
    pub record: DeviceRecord,
    pub family: VendorFamily,
    pub neighbors: Vec<Neighbor>,
    pub addresses: Vec<InterfaceAddress>,
    pub connected_routes: Vec<(Ipv4Addr, u8)>,
}

/// Error recorded for a device whose work was cut off by the job deadline
pub fn deadline_error(target: IpAddr) -> DeviceError {
    DeviceError::new(
        target.to_string(),
        DeviceErrorKind::Unreachable,
        "job deadline exceeded",
    )
}

/// Log in, run `plan`, and close the session.
///
/// On cancellation the open session is still closed and the device is
/// reported unreachable.
pub async fn introspect(
    adapter: &dyn DeviceAdapter,
    target: IpAddr,
    seed_port: u16,
    credentials: &[Credential],
    plan: &IntrospectionPlan,
    options: ConnectOptions,
    cancel: &CancellationToken,
) -> Result<Introspection, DeviceError> {
    let (mut session, used) = tokio::select! {
        result = login(adapter, target, seed_port, credentials, options) => result?,
        _ = cancel.cancelled() => return Err(deadline_error(target)),
    };
    let outcome = tokio::select! {
        result = run_plan(session.as_mut(), target, plan, options.timeout) => result,
        _ = cancel.cancelled() => Err(deadline_error(target)),
    };
    session.close().await;

    let mut introspection = outcome?;
    introspection.record.credentials_used = Some(used);
    Ok(introspection)
}

struct Asker<'a> {
    session: &'a mut dyn DeviceSession,
    target: IpAddr,
    timeout: Duration,
    rejected: Vec<&'static str>,
}

impl Asker<'_> {
    /// Run `command`; device-side rejections become `None`, transport
    /// failures end the session.
    async fn ask(&mut self, command: Option<&'static str>) -> Result<Option<String>, DeviceError> {
        let Some(command) = command else {
            return Ok(None);
        };
        let result = tokio::time::timeout(self.timeout, self.session.run(command))
            .await
            .unwrap_or(Err(AdapterError::Timeout(self.timeout)));

        match result {
            Ok(output) if parsers::is_command_error(&output) => {
                self.rejected.push(command);
                Ok(None)
            }
            Ok(output) => Ok(Some(output)),
            Err(AdapterError::Command { .. }) => {
                self.rejected.push(command);
                Ok(None)
            }
            Err(e) => Err(DeviceError::new(
                self.target.to_string(),
                DeviceErrorKind::Unreachable,
                format!("session lost during '{}': {}", command, e),
            )),
        }
    }
}

async fn run_plan(
    session: &mut dyn DeviceSession,
    target: IpAddr,
    plan: &IntrospectionPlan,
    timeout: Duration,
) -> Result<Introspection, DeviceError> {
    let mut asker = Asker {
        session,
        target,
        timeout,
        rejected: Vec::new(),
    };

    let version = asker.ask(Some("show version")).await?.unwrap_or_default();
    let family = parsers::detect_family(&version);
    let profile = profile_for(family);
    let facts = profile.parse_version(&version);

    let mut record = DeviceRecord::new(target, ConnectionStatus::Success);
    record.device_type = Some(family.tag().to_string());
    record.platform = facts.model.clone();
    record.model = facts.model.clone();
    record.os_version = facts.os_version.clone();
    record.serial_number = facts.serial_number.clone();
    record.uptime = facts.uptime.clone();
    record.hostname = facts.hostname.clone();
    record.vendor = profile.vendor_name().map(str::to_string);

    if plan.inventory {
        if let Some(text) = asker.ask(profile.command(CommandKind::Hostname)).await? {
            if let Some(name) = parsers::parse_hostname(&text) {
                record.hostname = Some(name);
            }
        }
        if let Some(text) = asker.ask(profile.command(CommandKind::Interfaces)).await? {
            record.interfaces = profile.parse_interfaces(&text);
        }
    }

    if plan.config {
        if let Some(text) = asker.ask(profile.command(CommandKind::RunningConfig)).await? {
            if record.hostname.is_none() {
                record.hostname = parsers::parse_config_hostname(&text);
            }
            record.config = Some(text);
        }
    }

    let mut addresses = Vec::new();
    let mut connected_routes = Vec::new();
    if plan.addressing {
        if let Some(text) = asker.ask(profile.command(CommandKind::InterfaceBrief)).await? {
            addresses = profile.parse_interface_brief(&text);
        }
        if let Some(text) = asker.ask(profile.command(CommandKind::ConnectedRoutes)).await? {
            connected_routes = profile.parse_connected_routes(&text);
        }
    }

    let mut neighbors = Vec::new();
    for protocol in &plan.neighbors {
        let command = profile.command(CommandKind::for_protocol(*protocol));
        if let Some(text) = asker.ask(command).await? {
            neighbors.extend(profile.parse_neighbors(*protocol, &text));
        }
    }

    if !asker.rejected.is_empty() {
        tracing::debug!("{} rejected commands: {:?}", target, asker.rejected);
    }

    let interface_ips = record
        .interfaces
        .iter()
        .filter_map(|i| i.ip_address)
        .chain(addresses.iter().map(|a| IpAddr::V4(a.ip)));
    for ip in interface_ips {
        if !record.all_ip_addresses.contains(&ip) {
            record.all_ip_addresses.push(ip);
        }
    }

    if record.vendor.is_none() {
        record.vendor = record
            .interfaces
            .iter()
            .filter_map(|i| i.mac_address.as_deref())
            .find_map(oui::lookup_vendor);
    }

    if profile.structured() && facts.is_empty() && record.hostname.is_none() {
        record.error = Some(DeviceError::new(
            target.to_string(),
            DeviceErrorKind::ParseFailure,
            format!("unrecognised {} version output", family),
        ));
    }

    Ok(Introspection {
        record,
        family,
        neighbors,
        addresses,
        connected_routes,
    })
}
