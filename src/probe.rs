//! Single-shot reachability probe.
//!
//! Every failure mode (host down, timeout, bad address, missing `ping`
//! binary, permission error) collapses to `false`. Retrying is the
//! watchdog's job, not the prober's.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use futures::future::BoxFuture;

/// Slack allowed on top of the probe timeout for process start/teardown.
pub const PROBE_OVERHEAD: Duration = Duration::from_secs(1);

pub trait Prober: Send + Sync {
    /// Resolves to `true` only if the target answered within `timeout`.
    fn probe<'a>(&'a self, address: &'a str, timeout: Duration) -> BoxFuture<'a, bool>;
}

/// ICMP echo through the platform `ping` utility, count = 1.
#[derive(Debug, Clone)]
pub struct SystemPinger {
    binary: PathBuf,
}

impl Default for SystemPinger {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemPinger {
    pub fn new() -> Self {
        let binary = which::which("ping").unwrap_or_else(|_| {
            log::warn!("ping binary not found in PATH, using bare name");
            PathBuf::from("ping")
        });
        log::debug!("ping binary path: {binary:?}");
        Self { binary }
    }

    fn command(&self, address: &str, timeout: Duration) -> tokio::process::Command {
        let secs = timeout.as_secs().max(1);
        let mut cmd = tokio::process::Command::new(&self.binary);
        cmd.args(single_echo_args(secs))
            .arg(address)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        cmd
    }

    async fn ping_once(&self, address: &str, timeout: Duration) -> bool {
        if !is_plausible_address(address) {
            log::debug!("refusing to probe malformed address {address:?}");
            return false;
        }
        let mut cmd = self.command(address, timeout);
        match tokio::time::timeout(timeout + PROBE_OVERHEAD, cmd.status()).await {
            Ok(Ok(status)) => status.success(),
            Ok(Err(e)) => {
                log::debug!("failed to execute ping for {address}: {e}");
                false
            }
            Err(_) => {
                log::debug!("ping for {address} exceeded {timeout:?}");
                false
            }
        }
    }
}

impl Prober for SystemPinger {
    fn probe<'a>(&'a self, address: &'a str, timeout: Duration) -> BoxFuture<'a, bool> {
        Box::pin(self.ping_once(address, timeout))
    }
}

// One echo request, bounded wait, numeric output.
cfg_if::cfg_if! {
    if #[cfg(target_os = "windows")] {
        fn single_echo_args(timeout_secs: u64) -> Vec<String> {
            vec!["-n".into(), "1".into(), "-w".into(), (timeout_secs * 1000).to_string()]
        }
    } else if #[cfg(target_os = "macos")] {
        fn single_echo_args(timeout_secs: u64) -> Vec<String> {
            vec!["-n".into(), "-c".into(), "1".into(), "-t".into(), timeout_secs.to_string()]
        }
    } else {
        fn single_echo_args(timeout_secs: u64) -> Vec<String> {
            vec!["-n".into(), "-c".into(), "1".into(), "-w".into(), timeout_secs.to_string()]
        }
    }
}

/// Cheap screening before handing user input to an external program.
pub fn is_plausible_address(address: &str) -> bool {
    !address.is_empty()
        && !address.starts_with('-')
        && !address.chars().any(|c| c.is_whitespace() || c.is_control())
}
