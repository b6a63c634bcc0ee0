use std::process::Command;

use crate::{zlog_debug, zlog_warn, Error, Result};

pub struct Tmux;

impl Tmux {
    /// Session name hosting a polecat: `<prefix>-<rig>-<polecat>`, where the
    /// prefix is the workspace's bead prefix.
    pub fn polecat_session(prefix: &str, rig: &str, polecat: &str) -> String {
        format!("{}-{}-{}", prefix, rig, polecat)
    }

    pub fn is_available() -> bool {
        which::which("tmux").is_ok()
    }

    pub fn kill_session(name: &str) -> Result<()> {
        zlog_debug!("Tmux::kill_session name={}", name);
        let output = Command::new("tmux")
            .args(["kill-session", "-t", name])
            .output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if !stderr.contains("session not found") && !stderr.contains("can't find session") {
                zlog_warn!("Failed to kill tmux session '{}': {}", name, stderr);
                return Err(Error::Tmux(format!(
                    "Failed to kill session '{}': {}",
                    name, stderr
                )));
            }
            zlog_debug!("Tmux session '{}' not found (already dead?)", name);
        } else {
            zlog_debug!("Tmux session killed: {}", name);
        }
        Ok(())
    }

    pub fn session_exists(name: &str) -> bool {
        Command::new("tmux")
            .args(["has-session", "-t", name])
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }
}
