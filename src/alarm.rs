//! Countdown alarm: `Idle → Counting → {Cancelled, Expired}`.
//!
//! At most one session counts at a time. The slot holding the active
//! session *is* the "alarm active" flag, so arming is a single
//! check‑and‑insert under one lock and cannot race a concurrent clear.
//! Cancellation and expiry both take the session out of that slot, so
//! whichever gets there first wins and the other becomes a no-op.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at};
use tokio_util::sync::CancellationToken;

use crate::action::ActionExecutor;
use crate::event_log::EventLog;
use crate::presenter::{Presenter, Severity};

/// Countdown resolution.
pub const TICK: Duration = Duration::from_secs(1);

/// What a freshly armed session counts down to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountdownPlan {
    pub countdown_secs: u64,
    pub command: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    Cancelled,
    Expired,
}

struct ActiveSession {
    id: u64,
    token: CancellationToken,
}

struct Shared {
    slot: Mutex<Option<ActiveSession>>,
    next_id: AtomicU64,
    presenter: Arc<dyn Presenter>,
    executor: ActionExecutor,
    events: Arc<dyn EventLog>,
}

impl Shared {
    fn slot(&self) -> MutexGuard<'_, Option<ActiveSession>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Remove session `id` from the slot if it is still the active one.
    fn release(&self, id: u64) -> bool {
        let mut slot = self.slot();
        if slot.as_ref().is_some_and(|s| s.id == id) {
            *slot = None;
            true
        } else {
            false
        }
    }
}

/// Clears the slot if the session task ends on an unexpected path (panic, abort).
struct ReleaseOnDrop {
    shared: Arc<Shared>,
    id: u64,
}

impl Drop for ReleaseOnDrop {
    fn drop(&mut self) {
        self.shared.release(self.id);
    }
}

/// Handle to one armed countdown.
#[derive(Debug)]
pub struct SessionHandle {
    id: u64,
    task: JoinHandle<SessionOutcome>,
}

impl SessionHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the session to end.
    pub async fn outcome(self) -> SessionOutcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                log::error!("countdown session {} ended abnormally: {e}", self.id);
                SessionOutcome::Cancelled
            }
        }
    }
}

/// Owns the countdown lifecycle and hands expiry to the [`ActionExecutor`].
#[derive(Clone)]
pub struct AlarmController {
    shared: Arc<Shared>,
}

impl AlarmController {
    pub fn new(
        presenter: Arc<dyn Presenter>,
        executor: ActionExecutor,
        events: Arc<dyn EventLog>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                slot: Mutex::new(None),
                next_id: AtomicU64::new(1),
                presenter,
                executor,
                events,
            }),
        }
    }

    /// True exactly while a countdown is running.
    pub fn is_active(&self) -> bool {
        self.shared.slot().is_some()
    }

    /// Start a countdown on its own task. Returns `None` if one is already
    /// counting. Must be called from within a Tokio runtime.
    pub fn arm(&self, plan: CountdownPlan) -> Option<SessionHandle> {
        let token = CancellationToken::new();
        let id = {
            let mut slot = self.shared.slot();
            if slot.is_some() {
                return None;
            }
            let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
            *slot = Some(ActiveSession {
                id,
                token: token.clone(),
            });
            id
        };

        let guard = ReleaseOnDrop {
            shared: Arc::clone(&self.shared),
            id,
        };
        let task = tokio::spawn(run_session(guard, token, plan));
        Some(SessionHandle { id, task })
    }

    /// Stop the running countdown, if any, without running the action.
    ///
    /// Never blocks. Returns `false` when nothing was counting; calling it
    /// repeatedly is harmless.
    pub fn cancel(&self) -> bool {
        let taken = self.shared.slot().take();
        match taken {
            Some(session) => {
                session.token.cancel();
                log::debug!("countdown session {} cancelled", session.id);
                true
            }
            None => false,
        }
    }
}

async fn run_session(
    guard: ReleaseOnDrop,
    token: CancellationToken,
    plan: CountdownPlan,
) -> SessionOutcome {
    let shared = Arc::clone(&guard.shared);
    let id = guard.id;
    if token.is_cancelled() {
        return SessionOutcome::Cancelled;
    }

    shared.presenter.request_foreground();
    shared.events.log(&format!(
        "countdown started: running `{}` in {}s",
        plan.command, plan.countdown_secs
    ));

    let mut remaining = plan.countdown_secs;
    let mut ticker = interval_at(Instant::now() + TICK, TICK);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => return SessionOutcome::Cancelled,
            _ = ticker.tick() => {
                remaining = remaining.saturating_sub(1);
                shared.presenter.on_countdown_tick(remaining, &plan.command);
                if remaining > 0 {
                    continue;
                }
                // Losing this race means cancel() already took the slot.
                if !shared.release(id) {
                    return SessionOutcome::Cancelled;
                }
                shared.events.log("countdown expired");
                let status = match shared.executor.execute(&plan.command) {
                    Ok(true) => format!("countdown expired, ran `{}`", plan.command.trim()),
                    Ok(false) => "countdown expired, no action configured".to_string(),
                    Err(e) => {
                        log::error!("countdown session {id}: {e}");
                        format!("countdown expired, {e}")
                    }
                };
                shared.presenter.on_status(&status, Severity::Alert);
                return SessionOutcome::Expired;
            }
        }
    }
}
