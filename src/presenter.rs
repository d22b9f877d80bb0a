//! Interface between the watchdog core and whatever shows its state.
//!
//! Background tasks never touch presentation state. They post a
//! [`Notification`] through a [`PresenterHandle`] and the presentation
//! layer applies it on its own thread, one message at a time.

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

/// Queue depth between the core and the presentation thread.
const POST_BOUND: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Normal,
    Warning,
    Alert,
}

/// One state change posted to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Status {
        text: String,
        severity: Severity,
    },
    CountdownTick {
        remaining_secs: u64,
        command: String,
    },
    AlarmCleared,
    Foreground,
    Hide,
    TargetUpdated {
        address: String,
        reachable: bool,
        /// `Err` carries the reason persisting the new target failed.
        saved: Result<(), String>,
    },
}

impl Notification {
    /// Whether a later notification of the same kind supersedes this one.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Status { .. } | Self::CountdownTick { .. })
    }
}

/// What the presentation layer may ask of the core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    RunActionNow,
    UpdateTarget(String),
}

/// Callbacks the core fires on state transitions.
pub trait Presenter: Send + Sync {
    fn on_status(&self, text: &str, severity: Severity);
    fn on_countdown_tick(&self, remaining_secs: u64, command: &str);
    fn on_alarm_cleared(&self);
    fn request_foreground(&self);
    fn request_hide(&self);
    fn on_target_updated(&self, address: &str, reachable: bool, saved: Result<(), String>);
}

/// Posts notifications to the presentation thread.
///
/// Sending never blocks. If the presenter has fallen behind, the update is
/// dropped. Ticks and statuses are superseded on the next tick or cycle;
/// a dropped one-shot transition is lost and logged as a warning.
#[derive(Debug, Clone)]
pub struct PresenterHandle {
    tx: Sender<Notification>,
}

impl PresenterHandle {
    pub fn channel() -> (Self, Receiver<Notification>) {
        let (tx, rx) = bounded(POST_BOUND);
        (Self { tx }, rx)
    }

    pub fn post(&self, notification: Notification) {
        match self.tx.try_send(notification) {
            Ok(()) => {}
            Err(TrySendError::Full(n)) if n.is_transient() => {
                log::debug!("presenter busy, dropped {n:?}")
            }
            Err(TrySendError::Full(n)) => log::warn!("presenter busy, lost transition {n:?}"),
            Err(TrySendError::Disconnected(_)) => log::debug!("presenter gone"),
        }
    }
}

impl Presenter for PresenterHandle {
    fn on_status(&self, text: &str, severity: Severity) {
        self.post(Notification::Status {
            text: text.to_string(),
            severity,
        });
    }

    fn on_countdown_tick(&self, remaining_secs: u64, command: &str) {
        self.post(Notification::CountdownTick {
            remaining_secs,
            command: command.to_string(),
        });
    }

    fn on_alarm_cleared(&self) {
        self.post(Notification::AlarmCleared);
    }

    fn request_foreground(&self) {
        self.post(Notification::Foreground);
    }

    fn request_hide(&self) {
        self.post(Notification::Hide);
    }

    fn on_target_updated(&self, address: &str, reachable: bool, saved: Result<(), String>) {
        self.post(Notification::TargetUpdated {
            address: address.to_string(),
            reachable,
            saved,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn posts_arrive_in_order() {
        let (handle, rx) = PresenterHandle::channel();
        handle.request_foreground();
        handle.on_countdown_tick(9, "shutdown -h now");
        handle.on_alarm_cleared();

        let got: Vec<_> = rx.try_iter().collect();
        assert_eq!(
            got,
            vec![
                Notification::Foreground,
                Notification::CountdownTick {
                    remaining_secs: 9,
                    command: "shutdown -h now".into()
                },
                Notification::AlarmCleared,
            ]
        );
    }

    #[test]
    fn full_queue_drops_instead_of_blocking() {
        let (handle, rx) = PresenterHandle::channel();
        for n in 0..(POST_BOUND as u64 + 10) {
            handle.on_countdown_tick(n, "x");
        }
        assert_eq!(rx.len(), POST_BOUND);
    }

    #[test]
    fn only_ticks_and_statuses_are_transient() {
        assert!(Notification::CountdownTick {
            remaining_secs: 3,
            command: "x".into()
        }
        .is_transient());
        assert!(Notification::Status {
            text: "monitoring".into(),
            severity: Severity::Normal
        }
        .is_transient());
        assert!(!Notification::Foreground.is_transient());
        assert!(!Notification::Hide.is_transient());
        assert!(!Notification::AlarmCleared.is_transient());
        assert!(!Notification::TargetUpdated {
            address: "10.0.0.1".into(),
            reachable: true,
            saved: Ok(())
        }
        .is_transient());
    }

    #[test]
    fn full_queue_never_blocks_on_transitions() {
        let (handle, rx) = PresenterHandle::channel();
        for n in 0..POST_BOUND as u64 {
            handle.on_countdown_tick(n, "x");
        }
        handle.request_foreground();
        handle.on_alarm_cleared();
        assert_eq!(rx.len(), POST_BOUND);
    }

    #[test]
    fn posting_after_presenter_exit_is_harmless() {
        let (handle, rx) = PresenterHandle::channel();
        drop(rx);
        handle.on_status("monitoring", Severity::Normal);
    }
}
