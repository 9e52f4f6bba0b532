//! Privilege and probe-tool detection.
//!
//! None of the ICMP tiers strictly need root: fping and the system ping are
//! usually setuid or capability-enabled, and Linux allows unprivileged ICMP
//! datagram sockets when `net.ipv4.ping_group_range` covers the caller.

use serde::Serialize;

use super::ping::{FpingPinger, IcmpSocketPinger, Pinger, SystemPinger};

/// Which ICMP tiers the current process can use
#[derive(Debug, Clone, Serialize)]
pub struct ProbeCapabilities {
    pub is_elevated: bool,
    pub fping: bool,
    pub icmp_socket: bool,
    pub system_ping: bool,
}

impl ProbeCapabilities {
    pub fn any_icmp(&self) -> bool {
        self.fping || self.icmp_socket || self.system_ping
    }
}

/// Check if the current process is running with elevated privileges
pub fn is_elevated() -> bool {
    #[cfg(unix)]
    {
        unsafe { libc::geteuid() == 0 }
    }

    #[cfg(not(unix))]
    {
        false
    }
}

pub async fn detect_capabilities() -> ProbeCapabilities {
    ProbeCapabilities {
        is_elevated: is_elevated(),
        fping: FpingPinger.available().await,
        icmp_socket: IcmpSocketPinger.available().await,
        system_ping: SystemPinger.available().await,
    }
}

/// Format a user-friendly message about current probe capabilities
pub fn format_capabilities_message(caps: &ProbeCapabilities) -> String {
    if caps.any_icmp() {
        let mut tiers = Vec::new();
        if caps.fping {
            tiers.push("fping");
        }
        if caps.icmp_socket {
            tiers.push("icmp sockets");
        }
        if caps.system_ping {
            tiers.push("system ping");
        }
        return format!("ICMP available via {}", tiers.join(", "));
    }

    let mut msg = String::from(
        "No ICMP method available: hosts are reported reachable only by open TCP ports.\n",
    );
    #[cfg(target_os = "linux")]
    {
        msg.push_str(
            "Install fping, or allow ICMP sockets:\n\
             $ sudo sysctl -w net.ipv4.ping_group_range=\"0 2147483647\"\n",
        );
    }
    #[cfg(not(target_os = "linux"))]
    {
        msg.push_str("Install fping or make sure the system ping command is on PATH.\n");
    }
    msg
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_lists_tiers() {
        let caps = ProbeCapabilities {
            is_elevated: false,
            fping: true,
            icmp_socket: false,
            system_ping: true,
        };
        assert_eq!(
            format_capabilities_message(&caps),
            "ICMP available via fping, system ping"
        );
    }

    #[test]
    fn test_message_without_icmp() {
        let caps = ProbeCapabilities {
            is_elevated: false,
            fping: false,
            icmp_socket: false,
            system_ping: false,
        };
        assert!(!caps.any_icmp());
        assert!(format_capabilities_message(&caps).starts_with("No ICMP method available"));
    }
}
