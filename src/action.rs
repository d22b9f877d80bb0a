//! Launching the recovery action without blocking the watchdog.

use std::process::Stdio;
use std::sync::Arc;

use anyhow::Context;
use futures::future::BoxFuture;

use crate::event_log::EventLog;

/// Resolves once the launched child exits; `Err` for nonzero exit or wait failure.
pub type Completion = BoxFuture<'static, anyhow::Result<()>>;

/// Starts a command line and hands back its completion.
pub trait Launcher: Send + Sync {
    fn launch(&self, command_line: &str) -> std::io::Result<Completion>;
}

#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("failed to launch `{command}`: {source}")]
    Launch {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

/// Runs command lines through the platform shell.
#[derive(Debug, Default, Clone, Copy)]
pub struct ShellLauncher;

impl ShellLauncher {
    #[cfg(target_os = "windows")]
    fn command(command_line: &str) -> tokio::process::Command {
        // CREATE_NO_WINDOW: keep the cmd console from flashing up.
        const CREATE_NO_WINDOW: u32 = 0x0800_0000;
        let mut cmd = tokio::process::Command::new("cmd");
        cmd.arg("/C")
            .arg(command_line)
            .creation_flags(CREATE_NO_WINDOW)
            .stdin(Stdio::null());
        cmd
    }

    #[cfg(not(target_os = "windows"))]
    fn command(command_line: &str) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c").arg(command_line).stdin(Stdio::null());
        cmd
    }
}

impl Launcher for ShellLauncher {
    fn launch(&self, command_line: &str) -> std::io::Result<Completion> {
        let child = Self::command(command_line).spawn()?;
        if let Some(pid) = child.id() {
            log::debug!("action spawned (PID: {pid})");
        }
        Ok(Box::pin(wait_for_exit(child)))
    }
}

async fn wait_for_exit(mut child: tokio::process::Child) -> anyhow::Result<()> {
    let status = child.wait().await.context("failed to wait for action")?;
    if !status.success() {
        anyhow::bail!("action exited with {status}");
    }
    Ok(())
}

/// Executes the configured action and reports its outcome to the event log.
#[derive(Clone)]
pub struct ActionExecutor {
    launcher: Arc<dyn Launcher>,
    events: Arc<dyn EventLog>,
}

impl ActionExecutor {
    pub fn new(launcher: Arc<dyn Launcher>, events: Arc<dyn EventLog>) -> Self {
        Self { launcher, events }
    }

    /// Returns `Ok(true)` once the command is running, `Ok(false)` when there
    /// is nothing to run. Completion is logged later from a detached task, so
    /// a hung command never holds up the caller.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn execute(&self, command: &str) -> Result<bool, ActionError> {
        let command = command.trim();
        if command.is_empty() {
            self.events.log("skipped action: no command configured");
            return Ok(false);
        }

        self.events.log(&format!("running action: {command}"));
        let completion = match self.launcher.launch(command) {
            Ok(completion) => completion,
            Err(source) => {
                let err = ActionError::Launch {
                    command: command.to_string(),
                    source,
                };
                self.events.log(&format!("action failed to start: {err}"));
                return Err(err);
            }
        };

        let events = Arc::clone(&self.events);
        tokio::spawn(async move {
            match completion.await {
                Ok(()) => events.log("action completed"),
                Err(e) => events.log(&format!("action returned an error: {e:#}")),
            }
        });
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl EventLog for Recorder {
        fn log(&self, event: &str) {
            self.0.lock().unwrap().push(event.to_string());
        }
    }

    impl Recorder {
        fn events(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }
    }

    #[derive(Default)]
    struct CountingLauncher {
        launches: AtomicUsize,
        fail_spawn: bool,
        fail_exit: bool,
    }

    impl Launcher for CountingLauncher {
        fn launch(&self, _command_line: &str) -> std::io::Result<Completion> {
            self.launches.fetch_add(1, Ordering::SeqCst);
            if self.fail_spawn {
                return Err(std::io::Error::new(std::io::ErrorKind::NotFound, "no such command"));
            }
            let fail_exit = self.fail_exit;
            Ok(Box::pin(async move {
                if fail_exit {
                    anyhow::bail!("exit status: 1");
                }
                Ok::<(), anyhow::Error>(())
            }))
        }
    }

    fn executor(launcher: Arc<CountingLauncher>) -> (ActionExecutor, Arc<Recorder>) {
        let events = Arc::new(Recorder::default());
        (ActionExecutor::new(launcher, events.clone()), events)
    }

    #[tokio::test]
    async fn blank_command_is_skipped() {
        let launcher = Arc::new(CountingLauncher::default());
        let (exec, events) = executor(launcher.clone());

        assert!(!exec.execute("   ").unwrap());
        assert_eq!(launcher.launches.load(Ordering::SeqCst), 0);
        assert_eq!(events.events(), vec!["skipped action: no command configured"]);
    }

    #[tokio::test]
    async fn completion_is_logged() {
        let launcher = Arc::new(CountingLauncher::default());
        let (exec, events) = executor(launcher.clone());

        assert!(exec.execute("shutdown -h now").unwrap());
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        assert_eq!(launcher.launches.load(Ordering::SeqCst), 1);
        assert_eq!(
            events.events(),
            vec!["running action: shutdown -h now", "action completed"]
        );
    }

    #[tokio::test]
    async fn nonzero_exit_is_logged_not_returned() {
        let launcher = Arc::new(CountingLauncher {
            fail_exit: true,
            ..Default::default()
        });
        let (exec, events) = executor(launcher);

        assert!(exec.execute("false").unwrap());
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        let logged = events.events();
        assert!(logged.last().unwrap().starts_with("action returned an error"));
    }

    #[tokio::test]
    async fn spawn_failure_is_reported() {
        let launcher = Arc::new(CountingLauncher {
            fail_spawn: true,
            ..Default::default()
        });
        let (exec, events) = executor(launcher);

        let err = exec.execute("missing-binary").unwrap_err();
        assert!(matches!(err, ActionError::Launch { .. }));
        assert!(events.events().last().unwrap().starts_with("action failed to start"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn shell_launcher_reports_exit_status() {
        ShellLauncher.launch("exit 0").unwrap().await.unwrap();
        assert!(ShellLauncher.launch("exit 3").unwrap().await.is_err());
    }
}
