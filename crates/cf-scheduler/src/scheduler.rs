//! Bounded-concurrency scheduler with retry.
//!
//! Units wait in a FIFO backlog and are admitted while fewer than
//! `concurrency` are running. A unit that fails (or times out) is retried up
//! to `max_retries` times: it keeps its slot through the backoff delay, then
//! a fresh attempt goes to the *front* of the backlog.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;

use cf_av::{CancelReason, OperationUnit, Outcome};
use cf_core::config::SchedulerConfig;
use cf_core::{EventSink, UnitId};

/// Events emitted by the scheduler.
#[derive(Debug, Clone)]
pub enum SchedulerEvent {
    /// A unit entered the backlog.
    Added { id: UnitId },
    /// An attempt was admitted. `attempt` is 1-based.
    Started { id: UnitId, attempt: u32 },
    Completed { id: UnitId, outcome: Outcome },
    /// An attempt failed and another will follow after `delay`.
    Retrying {
        id: UnitId,
        next_attempt: u32,
        delay: Duration,
        error: String,
    },
    /// The unit failed for good after `attempts` attempts.
    Failed {
        id: UnitId,
        attempts: u32,
        outcome: Outcome,
    },
    /// The unit was removed from the backlog or stopped on request.
    Cancelled { id: UnitId },
    /// Nothing is running and the backlog is empty.
    Idle,
}

/// A backlog entry: a unit and how many attempts it has already used.
#[derive(Debug)]
struct QueueEntry {
    unit: Arc<OperationUnit>,
    tries: u32,
}

#[derive(Debug)]
struct State {
    backlog: VecDeque<QueueEntry>,
    running: HashMap<UnitId, Arc<OperationUnit>>,
    cancel_requested: HashSet<UnitId>,
    paused: bool,
    idle_notified: bool,
}

#[derive(Debug)]
struct Inner {
    config: SchedulerConfig,
    events: EventSink<SchedulerEvent>,
    state: Mutex<State>,
    idle: Notify,
}

/// Runs independent units with bounded parallelism.
///
/// Cheap to clone; clones share the same backlog. Methods that admit work
/// spawn tasks and must be called from within a Tokio runtime.
#[derive(Debug, Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, events: EventSink<SchedulerEvent>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                events,
                state: Mutex::new(State {
                    backlog: VecDeque::new(),
                    running: HashMap::new(),
                    cancel_requested: HashSet::new(),
                    paused: false,
                    // A fresh scheduler has not left the idle state yet.
                    idle_notified: true,
                }),
                idle: Notify::new(),
            }),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// Queue a unit and admit work if a slot is free.
    pub fn add(&self, unit: OperationUnit) -> UnitId {
        let id = unit.id();
        {
            let mut state = self.inner.state.lock();
            state.backlog.push_back(QueueEntry {
                unit: Arc::new(unit),
                tries: 0,
            });
            state.idle_notified = false;
            self.inner.events.send(SchedulerEvent::Added { id });
        }
        tracing::debug!(unit_id = %id, "Unit queued");
        self.pump();
        id
    }

    /// Stop admitting units. Running units are unaffected.
    pub fn pause(&self) {
        self.inner.state.lock().paused = true;
        tracing::info!("Scheduler paused");
    }

    pub fn resume(&self) {
        self.inner.state.lock().paused = false;
        tracing::info!("Scheduler resumed");
        self.pump();
    }

    pub fn is_paused(&self) -> bool {
        self.inner.state.lock().paused
    }

    /// Cancel a unit.
    ///
    /// A queued unit is removed and `true` is returned. An admitted unit is
    /// only signalled and `false` is returned: it stops through its own
    /// cancellation path (before launching its tool if it has not got that
    /// far) and is not retried. Unknown ids return `false`.
    pub fn cancel(&self, id: UnitId) -> bool {
        let mut state = self.inner.state.lock();

        if let Some(pos) = state.backlog.iter().position(|e| e.unit.id() == id) {
            state.backlog.remove(pos);
            tracing::info!(unit_id = %id, "Queued unit cancelled");
            self.inner.events.send(SchedulerEvent::Cancelled { id });
            self.check_idle(&mut state);
            return true;
        }

        if let Some(unit) = state.running.get(&id).cloned() {
            state.cancel_requested.insert(id);
            drop(state);
            unit.cancel_pending(CancelReason::Requested("cancelled by scheduler".into()));
            tracing::info!(unit_id = %id, "Cancellation signalled to running unit");
        }
        false
    }

    pub fn running_count(&self) -> usize {
        self.inner.state.lock().running.len()
    }

    pub fn queued_count(&self) -> usize {
        self.inner.state.lock().backlog.len()
    }

    pub fn is_idle(&self) -> bool {
        let state = self.inner.state.lock();
        state.running.is_empty() && state.backlog.is_empty()
    }

    /// Resolve once nothing is running and the backlog is empty.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_idle() {
                return;
            }
            notified.await;
        }
    }

    /// Admit backlog entries while slots are free.
    fn pump(&self) {
        let mut state = self.inner.state.lock();
        while !state.paused && state.running.len() < self.inner.config.concurrency {
            let Some(entry) = state.backlog.pop_front() else {
                break;
            };
            let id = entry.unit.id();
            let attempt = entry.tries + 1;
            state.running.insert(id, Arc::clone(&entry.unit));
            tracing::info!(unit_id = %id, attempt, running = state.running.len(), "Unit admitted");
            self.inner.events.send(SchedulerEvent::Started { id, attempt });

            let this = self.clone();
            tokio::spawn(async move { this.run_entry(entry).await });
        }
        self.check_idle(&mut state);
    }

    fn check_idle(&self, state: &mut State) {
        if state.running.is_empty() && state.backlog.is_empty() && !state.idle_notified {
            state.idle_notified = true;
            tracing::debug!("Scheduler idle");
            self.inner.events.send(SchedulerEvent::Idle);
            self.inner.idle.notify_waiters();
        }
    }

    async fn run_entry(&self, entry: QueueEntry) {
        let QueueEntry { unit, tries } = entry;
        let id = unit.id();
        let attempts = tries + 1;
        let timeout = self.inner.config.timeout_secs.map(Duration::from_secs);

        let outcome = match unit.start(timeout).await {
            Ok(outcome) => outcome,
            Err(e) => Outcome::Failed(Arc::new(e)),
        };

        let cancel_requested = self.inner.state.lock().cancel_requested.contains(&id);
        let mut retry = None;

        if outcome.is_done() {
            self.inner.events.send(SchedulerEvent::Completed { id, outcome });
        } else if matches!(outcome, Outcome::Cancelled { .. })
            && (cancel_requested || !outcome.is_retryable())
        {
            self.inner.events.send(SchedulerEvent::Cancelled { id });
        } else if outcome.is_retryable() && tries < self.inner.config.max_retries && !cancel_requested {
            let delay = Duration::from_millis(self.inner.config.backoff_ms);
            let error = describe(&outcome);
            tracing::warn!(
                unit_id = %id,
                attempt = attempts,
                max_retries = self.inner.config.max_retries,
                backoff_ms = self.inner.config.backoff_ms,
                error = %error,
                "Scheduling retry"
            );
            self.inner.events.send(SchedulerEvent::Retrying {
                id,
                next_attempt: attempts + 1,
                delay,
                error,
            });
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            retry = Some(QueueEntry {
                unit: Arc::new(unit.retry_attempt()),
                tries: attempts,
            });
        } else {
            tracing::error!(unit_id = %id, attempts, error = %describe(&outcome), "Unit failed");
            self.inner.events.send(SchedulerEvent::Failed {
                id,
                attempts,
                outcome,
            });
        }

        {
            let mut state = self.inner.state.lock();
            // Cleared together so no later cancel can re-add the id.
            let cancelled_late = state.cancel_requested.remove(&id);
            state.running.remove(&id);
            if let Some(entry) = retry {
                // A cancel during backoff drops the retry.
                if cancelled_late {
                    self.inner.events.send(SchedulerEvent::Cancelled { id });
                } else {
                    state.backlog.push_front(entry);
                }
            }
        }
        self.pump();
    }
}

fn describe(outcome: &Outcome) -> String {
    match outcome {
        Outcome::Done { .. } => "done".into(),
        Outcome::Failed(e) => e.to_string(),
        Outcome::Cancelled { reason } => format!("cancelled: {reason}"),
    }
}
