//! SSH CLI adapter built on the OpenSSH client and `sshpass`.
//!
//! Each command runs as its own exec channel; the password reaches `sshpass`
//! through the child's `SSHPASS` environment only. With an enable secret,
//! commands run in an interactive shell after `enable`, and the secret is
//! written to the shell's stdin.

use async_trait::async_trait;
use std::net::IpAddr;
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::{AdapterError, DeviceAdapter, DeviceSession};
use crate::model::Credential;
use crate::process::{hidden_command, program_on_path};

/// sshpass: the password was rejected
const SSHPASS_BAD_PASSWORD: i32 = 5;
/// sshpass: host key unknown or changed
const SSHPASS_HOST_KEY: i32 = 6;
/// ssh: connection-level failure
const SSH_CONNECTION_ERROR: i32 = 255;

const VERSION_COMMAND: &str = "show version";

#[derive(Debug, Clone, Default)]
pub struct SshCliAdapter {
    /// Extra `-o Key=Value` options passed to ssh
    pub ssh_options: Vec<String>,
}

impl SshCliAdapter {
    pub fn new() -> Self {
        Self::default()
    }
}

struct SshCliSession {
    target: IpAddr,
    port: u16,
    username: String,
    password: String,
    enable_secret: Option<String>,
    timeout: Duration,
    ssh_options: Vec<String>,
    /// Output of the login probe, handed back on the first `show version`
    version: Option<String>,
}

impl SshCliSession {
    /// `sshpass -e ssh ...` up to, but not including, the destination
    fn ssh_command(&self) -> Command {
        let connect_timeout = format!("ConnectTimeout={}", self.timeout.as_secs().max(1));
        let mut cmd = hidden_command("sshpass");
        cmd.arg("-e")
            .arg("ssh")
            .args([
                "-o",
                "StrictHostKeyChecking=no",
                "-o",
                "UserKnownHostsFile=/dev/null",
                "-o",
                "NumberOfPasswordPrompts=1",
                "-o",
                "PreferredAuthentications=password,keyboard-interactive",
                "-o",
                "LogLevel=ERROR",
                "-o",
                &connect_timeout,
            ]);
        for option in &self.ssh_options {
            cmd.arg("-o").arg(option);
        }
        cmd.args(["-p", &self.port.to_string()])
            .env("SSHPASS", &self.password)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }

    fn destination(&self) -> String {
        format!("{}@{}", self.username, self.target)
    }

    fn check(&self, output: Output, command: &str) -> Result<String, AdapterError> {
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        classify_exit(
            output.status.code(),
            &stdout,
            &stderr,
            &self.username,
            command,
        )?;
        Ok(stdout)
    }

    async fn exec(&self, command: &str) -> Result<String, AdapterError> {
        let mut cmd = self.ssh_command();
        cmd.args([&self.destination(), command]);

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(AdapterError::Unreachable(format!("failed to run sshpass: {}", e)));
            }
            Err(_) => return Err(AdapterError::Timeout(self.timeout)),
        };
        self.check(output, command)
    }

    /// Run `command` from privileged mode in an interactive shell
    async fn exec_privileged(&self, secret: &str, command: &str) -> Result<String, AdapterError> {
        let mut cmd = self.ssh_command();
        cmd.args(["-tt", &self.destination()])
            .stdin(Stdio::piped())
            .kill_on_drop(true);

        let run = async {
            let mut child = cmd.spawn()?;
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(enable_script(secret, command).as_bytes()).await?;
            }
            child.wait_with_output().await
        };
        let output = match tokio::time::timeout(self.timeout, run).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(AdapterError::Unreachable(format!("failed to run sshpass: {}", e)));
            }
            Err(_) => return Err(AdapterError::Timeout(self.timeout)),
        };

        let stdout = self.check(output, command)?;
        if enable_rejected(&stdout) {
            return Err(AdapterError::Command {
                command: command.to_string(),
                message: "enable secret rejected".to_string(),
            });
        }
        Ok(stdout)
    }
}

/// Shell input that enters privileged mode, runs `command` unpaged and leaves
fn enable_script(secret: &str, command: &str) -> String {
    format!("enable\n{}\nterminal length 0\n{}\nexit\n", secret, command)
}

fn enable_rejected(output: &str) -> bool {
    output.contains("% Access denied") || output.contains("% Bad secrets")
}

/// Map an sshpass/ssh exit to an adapter error
fn classify_exit(
    code: Option<i32>,
    stdout: &str,
    stderr: &str,
    username: &str,
    command: &str,
) -> Result<(), AdapterError> {
    let first_line = stderr.lines().next().unwrap_or("").trim().to_string();
    match code {
        Some(0) => Ok(()),
        Some(SSHPASS_BAD_PASSWORD) => Err(AdapterError::Auth(username.to_string())),
        _ if stderr.contains("Permission denied") => Err(AdapterError::Auth(username.to_string())),
        Some(SSHPASS_HOST_KEY) => Err(AdapterError::Command {
            command: command.to_string(),
            message: "host key verification failed".to_string(),
        }),
        Some(SSH_CONNECTION_ERROR) => Err(AdapterError::Unreachable(first_line)),
        // Some network OSes exit non-zero after printing valid output
        _ if !stdout.trim().is_empty() => Ok(()),
        other => Err(AdapterError::Command {
            command: command.to_string(),
            message: format!("exit status {:?}: {}", other, first_line),
        }),
    }
}

#[async_trait]
impl DeviceSession for SshCliSession {
    async fn run(&mut self, command: &str) -> Result<String, AdapterError> {
        if command == VERSION_COMMAND {
            if let Some(version) = self.version.take() {
                return Ok(version);
            }
        }
        match &self.enable_secret {
            Some(secret) => self.exec_privileged(secret, command).await,
            None => self.exec(command).await,
        }
    }

    async fn close(self: Box<Self>) {
        tracing::trace!("closing session to {}:{}", self.target, self.port);
    }
}

#[async_trait]
impl DeviceAdapter for SshCliAdapter {
    async fn connect(
        &self,
        target: IpAddr,
        port: u16,
        credential: &Credential,
        timeout: Duration,
    ) -> Result<Box<dyn DeviceSession>, AdapterError> {
        if !program_on_path("sshpass") {
            return Err(AdapterError::Unreachable("sshpass is not installed".to_string()));
        }

        let mut session = SshCliSession {
            target,
            port,
            username: credential.username.clone(),
            password: credential.password.clone(),
            enable_secret: credential.enable_secret.clone(),
            timeout,
            ssh_options: self.ssh_options.clone(),
            version: None,
        };

        // Login probe doubles as the first command every introspection runs
        let version = session.exec(VERSION_COMMAND).await?;
        session.version = Some(version);
        Ok(Box::new(session))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_exit_codes() {
        assert!(classify_exit(Some(0), "ok", "", "admin", "show version").is_ok());
        assert_eq!(
            classify_exit(Some(5), "", "", "admin", "show version"),
            Err(AdapterError::Auth("admin".to_string()))
        );
        let denied = "admin@10.0.0.1: Permission denied (password).";
        assert_eq!(
            classify_exit(Some(255), "", denied, "admin", "x"),
            Err(AdapterError::Auth("admin".to_string()))
        );
        let refused = "ssh: connect to host 10.0.0.1 port 22: Connection refused\n";
        assert!(matches!(
            classify_exit(Some(255), "", refused, "admin", "x"),
            Err(AdapterError::Unreachable(msg)) if msg.contains("Connection refused")
        ));
        assert!(matches!(
            classify_exit(Some(6), "", "", "admin", "x"),
            Err(AdapterError::Command { .. })
        ));
    }

    #[test]
    fn test_enable_script_enters_privileged_mode_first() {
        let script = enable_script("en-secret", "show running-config");
        let lines: Vec<&str> = script.lines().collect();
        assert_eq!(
            lines,
            vec!["enable", "en-secret", "terminal length 0", "show running-config", "exit"]
        );
    }

    #[test]
    fn test_enable_rejection_detected() {
        assert!(enable_rejected("edge-1>enable\nPassword:\n% Access denied\n"));
        assert!(enable_rejected("Password:\n% Bad secrets\n"));
        assert!(!enable_rejected("edge-1#show running-config\nhostname edge-1\n"));
    }

    #[test]
    fn test_nonzero_exit_with_output_is_accepted() {
        assert!(classify_exit(Some(1), "Device ID: sw1", "", "admin", "show cdp").is_ok());
        assert!(classify_exit(Some(1), "", "boom", "admin", "show cdp").is_err());
    }
}
