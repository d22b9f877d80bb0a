//! The periodic driver: probe, count failures, arm or disarm the alarm.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::action::{ActionExecutor, Launcher};
use crate::alarm::{AlarmController, CountdownPlan};
use crate::config::{ConfigError, ConfigStore};
use crate::event_log::EventLog;
use crate::presenter::{Presenter, Request, Severity};
use crate::probe::Prober;

/// Failure bookkeeping. Only the watchdog loop writes it.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WatchdogState {
    pub consecutive_failures: u32,
    /// "connection lost" already logged since the last successful probe.
    lost_reported: bool,
}

impl WatchdogState {
    fn reset(&mut self) {
        self.consecutive_failures = 0;
        self.lost_reported = false;
    }
}

/// What one cycle observed and did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub target: String,
    pub reachable: bool,
    pub consecutive_failures: u32,
    /// Id of the countdown session armed this cycle.
    pub armed: Option<u64>,
    /// A running countdown was stopped because the target answered.
    pub recovered: bool,
    pub connection_lost: bool,
    /// Sleep before the next cycle, from the same config snapshot.
    pub interval: Duration,
}

/// Result of moving the watchdog to a new target.
#[derive(Debug)]
pub struct TargetUpdate {
    pub reachable: bool,
    pub saved: Result<(), ConfigError>,
}

/// Probe `address` once, then switch the config to it and persist.
///
/// The target is switched even when it does not answer; the probe result
/// is only reported back so the requester can warn about it.
pub async fn apply_target_update(
    config: &ConfigStore,
    prober: &dyn Prober,
    address: &str,
) -> TargetUpdate {
    let address = address.trim();
    let timeout = config.snapshot().probe_timeout();
    let reachable = prober.probe(address, timeout).await;
    TargetUpdate {
        reachable,
        saved: config.update_target(address),
    }
}

pub struct Watchdog {
    config: Arc<ConfigStore>,
    prober: Arc<dyn Prober>,
    alarm: AlarmController,
    executor: ActionExecutor,
    presenter: Arc<dyn Presenter>,
    events: Arc<dyn EventLog>,
    state: WatchdogState,
}

impl Watchdog {
    pub fn new(
        config: Arc<ConfigStore>,
        prober: Arc<dyn Prober>,
        launcher: Arc<dyn Launcher>,
        presenter: Arc<dyn Presenter>,
        events: Arc<dyn EventLog>,
    ) -> Self {
        let executor = ActionExecutor::new(launcher, Arc::clone(&events));
        let alarm = AlarmController::new(
            Arc::clone(&presenter),
            executor.clone(),
            Arc::clone(&events),
        );
        Self {
            config,
            prober,
            alarm,
            executor,
            presenter,
            events,
            state: WatchdogState::default(),
        }
    }

    pub fn state(&self) -> &WatchdogState {
        &self.state
    }

    pub fn alarm(&self) -> &AlarmController {
        &self.alarm
    }

    /// One probe and the state transitions that follow from it.
    pub async fn cycle(&mut self) -> CycleReport {
        let cfg = self.config.snapshot();
        let target = cfg.target_address.as_str();
        let reachable = self.prober.probe(target, cfg.probe_timeout()).await;

        let mut report = CycleReport {
            target: target.to_string(),
            reachable,
            consecutive_failures: 0,
            armed: None,
            recovered: false,
            connection_lost: false,
            interval: cfg.probe_interval(),
        };

        if reachable {
            if self.alarm.cancel() {
                report.recovered = true;
                self.events
                    .log(&format!("network restored: {target} (countdown stopped)"));
                self.presenter.on_alarm_cleared();
                if cfg.hide_after_recovery {
                    self.presenter.request_hide();
                } else {
                    self.presenter
                        .on_status(&format!("recovered: {target} (running)"), Severity::Normal);
                }
            }
            self.state.reset();
            // The recovery line stays up until the next cycle.
            if !report.recovered {
                self.presenter
                    .on_status(&format!("monitoring {target} (normal)"), Severity::Normal);
            }
        } else {
            self.state.consecutive_failures = self.state.consecutive_failures.saturating_add(1);
            let failures = self.state.consecutive_failures;
            self.presenter.on_status(
                &format!(
                    "degraded {target} (failed {failures}/{})",
                    cfg.failure_threshold
                ),
                Severity::Warning,
            );
            if failures >= cfg.failure_threshold && !self.state.lost_reported {
                self.state.lost_reported = true;
                report.connection_lost = true;
                self.events.log(&format!(
                    "connection lost: {target} ({failures} consecutive failures)"
                ));
            }
        }

        if self.state.consecutive_failures >= cfg.failure_threshold && !self.alarm.is_active() {
            let plan = CountdownPlan {
                countdown_secs: cfg.countdown_secs,
                command: cfg.action_command.clone(),
            };
            // Dropping the handle detaches the session task.
            report.armed = self.alarm.arm(plan).map(|handle| handle.id());
        }

        report.consecutive_failures = self.state.consecutive_failures;
        report
    }

    /// Cycle until `shutdown` fires, serving presentation requests while idle.
    pub async fn run(mut self, shutdown: CancellationToken, mut requests: mpsc::Receiver<Request>) {
        let cfg = self.config.snapshot();
        self.events.log(&format!(
            "watchdog started: probing {} every {}s",
            cfg.target_address, cfg.probe_interval_secs
        ));

        loop {
            let report = tokio::select! {
                _ = shutdown.cancelled() => break,
                report = self.cycle() => report,
            };
            log::debug!("cycle: {report:?}");

            let sleep = tokio::time::sleep(report.interval);
            tokio::pin!(sleep);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = &mut sleep => break,
                    Some(request) = requests.recv() => self.handle_request(request),
                }
            }
            if shutdown.is_cancelled() {
                break;
            }
        }

        if self.alarm.cancel() {
            self.events.log("countdown abandoned at shutdown");
        }
        self.events.log("watchdog stopped");
    }

    fn handle_request(&self, request: Request) {
        match request {
            Request::RunActionNow => {
                let command = self.config.snapshot().action_command;
                self.events.log("action requested manually");
                match self.executor.execute(&command) {
                    Ok(true) => {}
                    Ok(false) => self
                        .presenter
                        .on_status("no action command configured", Severity::Warning),
                    Err(e) => self.presenter.on_status(&e.to_string(), Severity::Alert),
                }
            }
            Request::UpdateTarget(address) => {
                self.events
                    .log(&format!("target change requested: {}", address.trim()));
                let config = Arc::clone(&self.config);
                let prober = Arc::clone(&self.prober);
                let presenter = Arc::clone(&self.presenter);
                let events = Arc::clone(&self.events);
                tokio::spawn(async move {
                    let update = apply_target_update(&config, prober.as_ref(), &address).await;
                    let address = address.trim();
                    if let Err(e) = &update.saved {
                        events.log(&format!("failed to save target {address}: {e}"));
                    }
                    presenter.on_target_updated(
                        address,
                        update.reachable,
                        update.saved.map_err(|e| e.to_string()),
                    );
                });
            }
        }
    }
}
