//! The Operation Unit: one external process for one [`OperationSpec`].
//!
//! A unit is single-use. [`OperationUnit::start`] probes the input duration,
//! launches the tool, turns its diagnostic stream into
//! [`ProgressSample`]s and finishes with exactly one terminal [`Outcome`].
//! Lifecycle:
//!
//! ```text
//! Queued ──► Running ──► Done
//!    │          ├──────► Error
//!    │          └──────► Cancelled
//!    ├─────────────────► Error      (probe or tool lookup failed)
//!    └─────────────────► Cancelled  (cancelled before launch)
//! ```
//!
//! No transition leaves a terminal state.

use std::collections::VecDeque;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::AsyncReadExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use cf_core::{Error, EventSink, OperationSpec, UnitId};

use crate::args::{binary_for, build_args};
use crate::command::ToolCommand;
use crate::probe::DurationProbe;
use crate::progress::{ProgressSample, ProgressTracker};
use crate::tools::ToolRegistry;

/// Diagnostic lines kept for error messages.
const STDERR_TAIL_LINES: usize = 20;

/// Upper bound on draining stderr after the process has exited.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Lifecycle state of a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    Queued,
    Running,
    Done,
    Error,
    Cancelled,
}

impl UnitState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, UnitState::Done | UnitState::Error | UnitState::Cancelled)
    }
}

/// Why a running unit was stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelReason {
    /// The unit exceeded its time limit.
    Timeout,
    /// A caller asked for cancellation.
    Requested(String),
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::Timeout => write!(f, "timeout"),
            CancelReason::Requested(why) => write!(f, "{why}"),
        }
    }
}

/// Terminal result of a unit.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// The tool exited with status 0.
    Done {
        output: Option<PathBuf>,
        /// Parsed ffprobe JSON for probe units.
        metadata: Option<serde_json::Value>,
    },
    /// The unit could not run or the tool failed.
    Failed(Arc<Error>),
    /// The unit was stopped before the tool finished.
    Cancelled { reason: CancelReason },
}

impl Outcome {
    pub fn is_done(&self) -> bool {
        matches!(self, Outcome::Done { .. })
    }

    pub fn error(&self) -> Option<&Error> {
        match self {
            Outcome::Failed(e) => Some(e),
            _ => None,
        }
    }

    /// Failures and timeouts may succeed on another attempt; requested
    /// cancellations and validation errors never do.
    pub fn is_retryable(&self) -> bool {
        match self {
            Outcome::Done { .. } => false,
            Outcome::Failed(e) => !e.is_validation(),
            Outcome::Cancelled { reason } => *reason == CancelReason::Timeout,
        }
    }

    /// Convert into a `Result`, mapping cancellation onto the error type.
    pub fn into_result(self, timeout: Option<Duration>) -> cf_core::Result<Option<PathBuf>> {
        match self {
            Outcome::Done { output, .. } => Ok(output),
            Outcome::Failed(e) => Err(Arc::try_unwrap(e)
                .unwrap_or_else(|shared| Error::Internal(shared.to_string()))),
            Outcome::Cancelled {
                reason: CancelReason::Timeout,
            } => Err(Error::Timeout {
                after: timeout.unwrap_or_default(),
            }),
            Outcome::Cancelled { reason } => Err(Error::Cancelled {
                reason: reason.to_string(),
            }),
        }
    }

    fn state(&self) -> UnitState {
        match self {
            Outcome::Done { .. } => UnitState::Done,
            Outcome::Failed(_) => UnitState::Error,
            Outcome::Cancelled { .. } => UnitState::Cancelled,
        }
    }
}

/// Events emitted by a unit, in order: at most one `Started`, any number of
/// `Progress`, exactly one `Finished`.
#[derive(Debug, Clone)]
pub enum UnitEvent {
    Started {
        id: UnitId,
        command_line: String,
    },
    Progress {
        id: UnitId,
        sample: ProgressSample,
    },
    Finished {
        id: UnitId,
        outcome: Outcome,
    },
}

/// Collaborators a unit needs to run.
#[derive(Clone)]
pub struct UnitContext {
    pub tools: Arc<ToolRegistry>,
    pub prober: Arc<dyn DurationProbe>,
    pub events: EventSink<UnitEvent>,
}

impl UnitContext {
    pub fn new(tools: Arc<ToolRegistry>, prober: Arc<dyn DurationProbe>) -> Self {
        Self {
            tools,
            prober,
            events: EventSink::noop(),
        }
    }

    /// Same collaborators, different event sink.
    pub fn with_events(mut self, events: EventSink<UnitEvent>) -> Self {
        self.events = events;
        self
    }
}

impl fmt::Debug for UnitContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitContext")
            .field("tools", &self.tools)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
struct UnitInner {
    state: UnitState,
    started: bool,
    duration: Option<f64>,
    last_percent: f64,
    cancel_reason: Option<CancelReason>,
}

/// A single-use handle on one external tool invocation.
#[derive(Debug)]
pub struct OperationUnit {
    id: UnitId,
    spec: OperationSpec,
    ctx: UnitContext,
    inner: Mutex<UnitInner>,
    cancel_token: CancellationToken,
}

enum Ending {
    Exited(cf_core::Result<Option<i32>>),
    Cancelled,
}

impl OperationUnit {
    /// Build a unit for `spec`; parameter defaults are filled in here.
    pub fn new(spec: OperationSpec, ctx: UnitContext) -> Self {
        Self::with_id(UnitId::new(), spec.with_defaults(), ctx)
    }

    fn with_id(id: UnitId, spec: OperationSpec, ctx: UnitContext) -> Self {
        Self {
            id,
            spec,
            ctx,
            inner: Mutex::new(UnitInner {
                state: UnitState::Queued,
                started: false,
                duration: None,
                last_percent: 0.0,
                cancel_reason: None,
            }),
            cancel_token: CancellationToken::new(),
        }
    }

    /// A fresh, unstarted attempt with the same identity and spec.
    pub fn retry_attempt(&self) -> Self {
        Self::with_id(self.id, self.spec.clone(), self.ctx.clone())
    }

    pub fn id(&self) -> UnitId {
        self.id
    }

    pub fn spec(&self) -> &OperationSpec {
        &self.spec
    }

    pub fn state(&self) -> UnitState {
        self.inner.lock().state
    }

    /// Probed input duration in seconds, once known.
    pub fn duration(&self) -> Option<f64> {
        self.inner.lock().duration
    }

    /// Percent carried by the last emitted progress sample.
    pub fn last_percent(&self) -> f64 {
        self.inner.lock().last_percent
    }

    /// Stop a started unit. The state becomes [`UnitState::Cancelled`] at
    /// once. A cancel that arrives while the input is still being probed
    /// is kept and the tool is never launched.
    ///
    /// Returns `false` (and does nothing) before [`start`](Self::start), once
    /// the unit is terminal, or when a cancel is already pending.
    pub fn cancel(&self, reason: CancelReason) -> bool {
        self.request_cancel(reason, false)
    }

    /// Like [`cancel`](Self::cancel), but also accepted before `start`: the
    /// later `start` then finishes as cancelled without doing any work.
    /// Meant for owners that have already committed to starting the unit.
    pub fn cancel_pending(&self, reason: CancelReason) -> bool {
        self.request_cancel(reason, true)
    }

    fn request_cancel(&self, reason: CancelReason, before_start: bool) -> bool {
        let mut inner = self.inner.lock();
        if (!inner.started && !before_start)
            || inner.state.is_terminal()
            || inner.cancel_reason.is_some()
        {
            return false;
        }
        tracing::debug!(unit_id = %self.id, %reason, "Cancelling unit");
        inner.cancel_reason = Some(reason);
        inner.state = UnitState::Cancelled;
        self.cancel_token.cancel();
        true
    }

    fn cancelled_outcome(&self) -> Outcome {
        let reason = self
            .inner
            .lock()
            .cancel_reason
            .clone()
            .unwrap_or_else(|| CancelReason::Requested("cancelled".into()));
        Outcome::Cancelled { reason }
    }

    fn expire(&self, timeout: Option<Duration>) {
        tracing::warn!(unit_id = %self.id, ?timeout, "Unit timed out");
        self.cancel(CancelReason::Timeout);
    }

    /// Run the unit to completion.
    ///
    /// `timeout` bounds the whole call, duration probe included; when it
    /// elapses the unit cancels itself with [`CancelReason::Timeout`].
    ///
    /// # Errors
    ///
    /// Only for misuse detected before any work starts: an incomplete spec
    /// ([`Error::Validation`]) or a second call ([`Error::Usage`]). No event
    /// is emitted in that case. Every other failure is reported as
    /// [`Outcome::Failed`].
    pub async fn start(&self, timeout: Option<Duration>) -> cf_core::Result<Outcome> {
        let args = build_args(&self.spec)?;
        {
            let mut inner = self.inner.lock();
            if inner.started {
                return Err(Error::usage(format!("unit {} was already started", self.id)));
            }
            inner.started = true;
        }
        let deadline = timeout.map(|limit| Instant::now() + limit);

        if self.cancel_token.is_cancelled() {
            return Ok(self.finish(self.cancelled_outcome()));
        }

        let kind = self.spec.kind();

        let duration = if kind.requires_duration() {
            let probed = tokio::select! {
                biased;
                _ = self.cancel_token.cancelled() => None,
                _ = sleep_until(deadline) => {
                    self.expire(timeout);
                    None
                }
                probed = self.ctx.prober.duration(&self.spec.input) => Some(probed),
            };
            match probed {
                None => return Ok(self.finish(self.cancelled_outcome())),
                Some(Ok(secs)) => {
                    self.inner.lock().duration = Some(secs);
                    Some(secs)
                }
                Some(Err(e)) => {
                    tracing::warn!(unit_id = %self.id, error = %e, "Duration probe failed");
                    return Ok(self.finish(Outcome::Failed(Arc::new(e))));
                }
            }
        } else {
            None
        };

        let tool = match self.ctx.tools.require(binary_for(kind)) {
            Ok(tool) => tool,
            Err(e) => return Ok(self.finish(Outcome::Failed(Arc::new(e)))),
        };

        let mut cmd = ToolCommand::new(tool.path.clone());
        cmd.args(args).capture_stdout(!kind.requires_output());
        let command_line = cmd.command_line();

        // Spawn under the lock so a cancel either prevents the launch or
        // finds the unit running.
        let spawned = {
            let mut inner = self.inner.lock();
            if inner.cancel_reason.is_some() {
                None
            } else {
                let spawned = cmd.spawn();
                if spawned.is_ok() {
                    inner.state = UnitState::Running;
                }
                Some(spawned)
            }
        };
        let mut process = match spawned {
            None => return Ok(self.finish(self.cancelled_outcome())),
            Some(Ok(p)) => p,
            Some(Err(e)) => return Ok(self.finish(Outcome::Failed(Arc::new(e)))),
        };

        tracing::info!(unit_id = %self.id, kind = %kind, pid = ?process.id(), "Unit running");
        tracing::debug!(unit_id = %self.id, command = %command_line, "Command line");
        self.ctx.events.send(UnitEvent::Started {
            id: self.id,
            command_line,
        });

        let stdout_task = process.take_stdout().map(|mut out| {
            tokio::spawn(async move {
                let mut buf = String::new();
                out.read_to_string(&mut buf).await.map(|_| buf)
            })
        });

        let mut tracker = ProgressTracker::new(duration);
        let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);
        let mut diagnostics = process.take_diagnostics();

        let expiry = sleep_until(deadline);
        tokio::pin!(expiry);
        let mut deadline_passed = false;

        let ending = loop {
            tokio::select! {
                biased;
                _ = self.cancel_token.cancelled() => break Ending::Cancelled,
                _ = &mut expiry, if !deadline_passed => {
                    deadline_passed = true;
                    self.expire(timeout);
                }
                line = next_line(&mut diagnostics), if diagnostics.is_some() => match line {
                    Some(line) => self.observe(&mut tracker, &mut tail, line),
                    None => diagnostics = None,
                },
                status = process.wait() => break Ending::Exited(status),
            }
        };

        // An exit racing a cancel still counts as cancelled.
        let status = match ending {
            Ending::Exited(status) if !self.cancel_token.is_cancelled() => status,
            _ => {
                if let Err(e) = process.kill().await {
                    tracing::debug!(unit_id = %self.id, error = %e, "Kill after cancel failed");
                }
                return Ok(self.finish(self.cancelled_outcome()));
            }
        };

        if diagnostics.is_some() {
            let drain = async {
                while let Some(line) = next_line(&mut diagnostics).await {
                    self.observe(&mut tracker, &mut tail, line);
                }
            };
            if tokio::time::timeout(DRAIN_TIMEOUT, drain).await.is_err() {
                tracing::debug!(unit_id = %self.id, "Diagnostic stream still open after exit");
            }
        }

        let outcome = match status {
            Ok(Some(0)) => match stdout_task {
                Some(task) => match collect_metadata(task).await {
                    Ok(metadata) => Outcome::Done {
                        output: self.spec.output.clone(),
                        metadata: Some(metadata),
                    },
                    Err(e) => Outcome::Failed(Arc::new(e)),
                },
                None => Outcome::Done {
                    output: self.spec.output.clone(),
                    metadata: None,
                },
            },
            Ok(code) => Outcome::Failed(Arc::new(Error::ProcessExit {
                code,
                stderr: tail.into_iter().collect::<Vec<_>>().join("\n"),
            })),
            Err(e) => Outcome::Failed(Arc::new(e)),
        };

        Ok(self.finish(outcome))
    }

    fn observe(&self, tracker: &mut ProgressTracker, tail: &mut VecDeque<String>, line: String) {
        if let Some(sample) = tracker.observe(&line) {
            self.inner.lock().last_percent = sample.percent;
            tracing::trace!(unit_id = %self.id, percent = sample.percent, "Progress");
            self.ctx.events.send(UnitEvent::Progress {
                id: self.id,
                sample,
            });
        }
        if tail.len() == STDERR_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }

    fn finish(&self, outcome: Outcome) -> Outcome {
        {
            let mut inner = self.inner.lock();
            if !inner.state.is_terminal() {
                inner.state = outcome.state();
            }
        }

        match &outcome {
            Outcome::Done { .. } => tracing::info!(unit_id = %self.id, "Unit done"),
            Outcome::Failed(e) => tracing::warn!(unit_id = %self.id, error = %e, "Unit failed"),
            Outcome::Cancelled { reason } => {
                tracing::info!(unit_id = %self.id, %reason, "Unit cancelled")
            }
        }

        self.ctx.events.send(UnitEvent::Finished {
            id: self.id,
            outcome: outcome.clone(),
        });
        outcome
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending::<()>().await,
    }
}

async fn next_line(
    diagnostics: &mut Option<crate::command::DiagnosticLines<tokio::process::ChildStderr>>,
) -> Option<String> {
    match diagnostics {
        Some(lines) => lines.next_line().await.ok().flatten(),
        None => None,
    }
}

async fn collect_metadata(
    task: tokio::task::JoinHandle<std::io::Result<String>>,
) -> cf_core::Result<serde_json::Value> {
    let stdout = task
        .await
        .map_err(|e| Error::Internal(format!("stdout reader panicked: {e}")))??;
    serde_json::from_str(&stdout).map_err(|e| Error::Probe(format!("invalid ffprobe JSON: {e}")))
}
