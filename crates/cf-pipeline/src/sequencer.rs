//! Sequential execution of a [`Workflow`].
//!
//! The sequencer validates the whole workflow, then runs one
//! [`OperationUnit`] per step, strictly in order. Unit progress is rescaled
//! into workflow progress and the first failure ends the run.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use cf_av::{DurationProbe, OperationUnit, Outcome, ProgressSample, ToolRegistry, UnitContext, UnitEvent};
use cf_core::config::WorkflowConfig;
use cf_core::{EventSink, OperationKind, OperationSpec, WorkflowId};

use crate::classify::{StepIndex, WorkflowError, WorkflowErrorKind};
use crate::resolve::{generated_output, output_dir, resolve_input};
use crate::timeouts::step_timeout;
use crate::workflow::Workflow;

/// Workflow-level progress.
#[derive(Debug, Clone)]
pub struct WorkflowProgress {
    /// Running step, 1-based.
    pub step: usize,
    pub total_steps: usize,
    pub kind: OperationKind,
    /// Progress of the running step, 0–100.
    pub step_percent: f64,
    /// Progress of the whole workflow, 0–100.
    pub overall_percent: f64,
    /// Remaining time for the running step, once it can be estimated.
    pub eta: Option<Duration>,
    pub sample: ProgressSample,
}

/// Events emitted by a workflow run.
#[derive(Debug, Clone)]
pub enum WorkflowEvent {
    Started {
        workflow: WorkflowId,
        total_steps: usize,
    },
    /// A non-fatal pre-flight finding.
    Warning(String),
    StepStarted {
        step: usize,
        kind: OperationKind,
        input: PathBuf,
        output: Option<PathBuf>,
    },
    Progress(WorkflowProgress),
    StepCompleted {
        step: usize,
        output: Option<PathBuf>,
    },
    Done {
        outputs: Vec<PathBuf>,
    },
    Failed(WorkflowError),
}

/// `((i + p/100) / n) * 100` for 0-based step `i` of `n`.
pub fn overall_percent(step_index: usize, step_percent: f64, total_steps: usize) -> f64 {
    if total_steps == 0 {
        return 0.0;
    }
    ((step_index as f64 + step_percent / 100.0) / total_steps as f64) * 100.0
}

/// `elapsed / (p/100) - elapsed`, known once `p > 0`.
pub fn estimate_eta(elapsed: Duration, step_percent: f64) -> Option<Duration> {
    if step_percent <= 0.0 {
        return None;
    }
    let fraction = (step_percent / 100.0).min(1.0);
    let secs = elapsed.as_secs_f64();
    Some(Duration::from_secs_f64((secs / fraction - secs).max(0.0)))
}

/// Runs workflows against a fixed set of tools.
#[derive(Clone)]
pub struct Sequencer {
    tools: Arc<ToolRegistry>,
    prober: Arc<dyn DurationProbe>,
    config: WorkflowConfig,
}

impl Sequencer {
    pub fn new(tools: Arc<ToolRegistry>, prober: Arc<dyn DurationProbe>, config: WorkflowConfig) -> Self {
        Self {
            tools,
            prober,
            config,
        }
    }

    /// Run `workflow` to completion, returning the outputs of all steps that
    /// write one, in step order.
    ///
    /// Every failure, including a concurrent run of the same workflow, is
    /// both returned and sent as [`WorkflowEvent::Failed`].
    pub async fn run(
        &self,
        workflow: &Workflow,
        events: EventSink<WorkflowEvent>,
    ) -> Result<Vec<PathBuf>, WorkflowError> {
        let result = self.run_inner(workflow, &events).await;
        match &result {
            Ok(outputs) => {
                tracing::info!(workflow_id = %workflow.id(), outputs = outputs.len(), "Workflow done");
                events.send(WorkflowEvent::Done {
                    outputs: outputs.clone(),
                });
            }
            Err(err) => {
                tracing::warn!(workflow_id = %workflow.id(), error = %err, "Workflow failed");
                events.send(WorkflowEvent::Failed(err.clone()));
            }
        }
        result
    }

    async fn run_inner(
        &self,
        workflow: &Workflow,
        events: &EventSink<WorkflowEvent>,
    ) -> Result<Vec<PathBuf>, WorkflowError> {
        let _guard = workflow.begin_run().ok_or_else(WorkflowError::already_running)?;

        let warnings = workflow
            .validate()
            .map_err(|e| WorkflowError::from_error(&e, StepIndex::Global))?;
        for warning in warnings {
            events.send(WorkflowEvent::Warning(warning));
        }

        let original = workflow.input().ok_or_else(|| {
            WorkflowError::new(
                WorkflowErrorKind::Validation,
                StepIndex::Global,
                "workflow input is not set",
            )
        })?;
        let total = workflow.len();
        let dir = output_dir(self.config.output_dir.as_deref(), &original);
        let stamp = chrono::Utc::now().timestamp_millis();

        let needs_generated = workflow.with_steps(|steps| {
            steps
                .iter()
                .any(|s| s.output.is_none() && s.kind().requires_output())
        });
        if needs_generated {
            std::fs::create_dir_all(&dir).map_err(|e| {
                WorkflowError::new(
                    WorkflowErrorKind::Validation,
                    StepIndex::Global,
                    format!("cannot create output directory {}: {e}", dir.display()),
                )
            })?;
        }

        tracing::info!(workflow_id = %workflow.id(), steps = total, input = %original.display(), "Workflow started");
        events.send(WorkflowEvent::Started {
            workflow: workflow.id(),
            total_steps: total,
        });

        let mut outputs = Vec::new();
        for index in 0..total {
            if workflow.is_aborted() {
                tracing::info!(workflow_id = %workflow.id(), step = index + 1, "Workflow aborted");
                return Err(WorkflowError::aborted());
            }

            let spec = workflow.with_steps(|steps| {
                let input = resolve_input(steps, index, &original);
                let step = &mut steps[index];
                if step.output.is_none() {
                    step.output = generated_output(step.kind(), index, &dir, stamp);
                }
                step.input = Some(input.clone());
                OperationSpec::new(step.operation.clone(), input, step.output.clone())
            });

            if let Some(output) = self.run_step(index, total, spec, events).await? {
                outputs.push(output);
            }
        }

        Ok(outputs)
    }

    async fn run_step(
        &self,
        index: usize,
        total: usize,
        spec: OperationSpec,
        events: &EventSink<WorkflowEvent>,
    ) -> Result<Option<PathBuf>, WorkflowError> {
        let step_no = index + 1;
        let kind = spec.kind();
        let timeout = step_timeout(kind, &self.config);

        tracing::info!(
            step = step_no,
            kind = %kind,
            input = %spec.input.display(),
            output = ?spec.output,
            ?timeout,
            "Step started"
        );
        events.send(WorkflowEvent::StepStarted {
            step: step_no,
            kind,
            input: spec.input.clone(),
            output: spec.output.clone(),
        });

        let (unit_events, mut unit_rx) = EventSink::channel();
        let ctx = UnitContext::new(Arc::clone(&self.tools), Arc::clone(&self.prober))
            .with_events(unit_events);
        let unit = OperationUnit::new(spec, ctx);

        let started = Instant::now();
        let forward = |event: UnitEvent| {
            if let UnitEvent::Progress { sample, .. } = event {
                let step_percent = sample.percent;
                events.send(WorkflowEvent::Progress(WorkflowProgress {
                    step: step_no,
                    total_steps: total,
                    kind,
                    step_percent,
                    overall_percent: overall_percent(index, step_percent, total),
                    eta: estimate_eta(started.elapsed(), step_percent),
                    sample,
                }));
            }
        };

        let run = unit.start(Some(timeout));
        tokio::pin!(run);
        let result = loop {
            tokio::select! {
                result = &mut run => break result,
                Some(event) = unit_rx.recv() => forward(event),
            }
        };
        while let Ok(event) = unit_rx.try_recv() {
            forward(event);
        }

        let step = StepIndex::Step(step_no);
        let outcome = result.map_err(|e| WorkflowError::from_error(&e, step))?;
        if let Some(err) = WorkflowError::from_outcome(&outcome, step) {
            return Err(err);
        }

        let output = match outcome {
            Outcome::Done { output, .. } => output,
            _ => None,
        };
        tracing::info!(step = step_no, elapsed = ?started.elapsed(), "Step completed");
        events.send(WorkflowEvent::StepCompleted {
            step: step_no,
            output: output.clone(),
        });
        Ok(output)
    }
}

impl std::fmt::Debug for Sequencer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sequencer")
            .field("tools", &self.tools)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overall_progress_midpoint_of_second_step() {
        let overall = overall_percent(1, 50.0, 3);
        assert!((overall - 50.0).abs() < 1e-9);
        assert_eq!(overall_percent(0, 0.0, 3), 0.0);
        assert!((overall_percent(2, 100.0, 3) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn eta_needs_progress() {
        assert_eq!(estimate_eta(Duration::from_secs(10), 0.0), None);
        assert_eq!(
            estimate_eta(Duration::from_secs(10), 25.0),
            Some(Duration::from_secs(30))
        );
        assert_eq!(
            estimate_eta(Duration::from_secs(10), 100.0),
            Some(Duration::ZERO)
        );
    }
}
