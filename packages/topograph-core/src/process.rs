//! Helpers for spawning external tools (ping, fping, ssh).

use std::process::Stdio;
use tokio::process::Command;

#[cfg(target_os = "windows")]
const CREATE_NO_WINDOW: u32 = 0x08000000;

/// Create a Command that hides the console window on Windows.
///
/// The child is killed when its handle is dropped, so a cancelled probe or
/// session never leaves a process behind.
pub fn hidden_command(program: &str) -> Command {
    let mut cmd = Command::new(program);
    #[cfg(target_os = "windows")]
    {
        cmd.creation_flags(CREATE_NO_WINDOW);
    }
    cmd.kill_on_drop(true).stdin(Stdio::null());
    cmd
}

/// Whether `program` can be found on PATH
pub fn program_on_path(program: &str) -> bool {
    let Some(paths) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&paths).any(|dir| {
        dir.join(program).is_file()
            || (cfg!(target_os = "windows") && dir.join(format!("{}.exe", program)).is_file())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_program_not_on_path() {
        assert!(!program_on_path("topograph-definitely-not-installed"));
    }
}
