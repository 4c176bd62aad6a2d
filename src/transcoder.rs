//! One-call façade over the castforge crates.
//!
//! A [`Transcoder`] owns the discovered tools and the duration probe and
//! hands them to everything it builds: single units, workflows run through a
//! [`Sequencer`], and batches run through a [`Scheduler`].

use std::path::PathBuf;
use std::sync::Arc;

use cf_av::{
    DurationProbe, FfprobeDuration, OperationUnit, Outcome, ToolRegistry, UnitContext, UnitEvent,
};
use cf_core::config::Config;
use cf_core::{EventSink, Operation, OperationSpec, Position, Result};
use cf_pipeline::{step_timeout, Sequencer, Workflow};
use cf_scheduler::{Scheduler, SchedulerEvent};

/// Entry point for running operations.
#[derive(Clone)]
pub struct Transcoder {
    config: Config,
    tools: Arc<ToolRegistry>,
    prober: Arc<dyn DurationProbe>,
}

impl Transcoder {
    /// Discover tools according to `config` and probe durations with
    /// ffprobe.
    pub fn new(config: Config) -> Self {
        let tools = ToolRegistry::discover(&config.tools);
        let prober = FfprobeDuration::from_registry(&tools).unwrap_or_else(|_| {
            tracing::warn!("ffprobe not found; duration probes will fail");
            FfprobeDuration::new(PathBuf::from("ffprobe"))
        });
        Self::with_parts(config, Arc::new(tools), Arc::new(prober))
    }

    /// Build from explicit collaborators.
    pub fn with_parts(config: Config, tools: Arc<ToolRegistry>, prober: Arc<dyn DurationProbe>) -> Self {
        Self {
            config,
            tools,
            prober,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    fn context(&self, events: EventSink<UnitEvent>) -> UnitContext {
        UnitContext::new(Arc::clone(&self.tools), Arc::clone(&self.prober)).with_events(events)
    }

    /// Validate `spec` and build a unit for it.
    pub fn unit(&self, spec: OperationSpec, events: EventSink<UnitEvent>) -> Result<OperationUnit> {
        spec.operation.validate()?;
        spec.check_ready()?;
        Ok(OperationUnit::new(spec, self.context(events)))
    }

    /// Run one operation with the time limit configured for its kind.
    pub async fn run(&self, spec: OperationSpec, events: EventSink<UnitEvent>) -> Result<Outcome> {
        let timeout = step_timeout(spec.kind(), &self.config.workflow);
        self.unit(spec, events)?.start(Some(timeout)).await
    }

    async fn run_quiet(&self, operation: Operation, input: PathBuf, output: Option<PathBuf>) -> Result<Outcome> {
        self.run(OperationSpec::new(operation, input, output), EventSink::noop())
            .await
    }

    pub async fn convert(
        &self,
        input: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
        format: Option<&str>,
    ) -> Result<Outcome> {
        let operation = Operation::Convert {
            format: format.map(str::to_string),
        };
        self.run_quiet(operation, input.into(), Some(output.into())).await
    }

    pub async fn compress(
        &self,
        input: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
        video_bitrate: &str,
        audio_bitrate: Option<&str>,
    ) -> Result<Outcome> {
        let operation = Operation::Compress {
            video_bitrate: video_bitrate.to_string(),
            audio_bitrate: audio_bitrate.map(str::to_string),
        };
        self.run_quiet(operation, input.into(), Some(output.into())).await
    }

    pub async fn thumbnail(
        &self,
        input: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
        timestamp: &str,
        width: Option<u32>,
    ) -> Result<Outcome> {
        let operation = Operation::Thumbnail {
            timestamp: timestamp.to_string(),
            width,
        };
        self.run_quiet(operation, input.into(), Some(output.into())).await
    }

    /// Container and stream metadata; the outcome carries the parsed JSON.
    pub async fn probe(&self, input: impl Into<PathBuf>) -> Result<Outcome> {
        self.run_quiet(Operation::Probe, input.into(), None).await
    }

    pub async fn extract_audio(
        &self,
        input: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
        bitrate: Option<&str>,
    ) -> Result<Outcome> {
        let operation = Operation::ExtractAudio {
            codec: None,
            bitrate: bitrate.map(str::to_string),
        };
        self.run_quiet(operation, input.into(), Some(output.into())).await
    }

    pub async fn replace_audio(
        &self,
        input: impl Into<PathBuf>,
        audio: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
    ) -> Result<Outcome> {
        let operation = Operation::ReplaceAudio {
            audio: audio.into(),
        };
        self.run_quiet(operation, input.into(), Some(output.into())).await
    }

    pub async fn to_gif(
        &self,
        input: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
        start: Option<&str>,
        duration: Option<f64>,
    ) -> Result<Outcome> {
        let operation = Operation::ToGif {
            start: start.map(str::to_string),
            duration,
            fps: None,
            width: None,
        };
        self.run_quiet(operation, input.into(), Some(output.into())).await
    }

    pub async fn clip(
        &self,
        input: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
        start: &str,
        duration: &str,
    ) -> Result<Outcome> {
        let operation = Operation::Clip {
            start: start.to_string(),
            duration: duration.to_string(),
        };
        self.run_quiet(operation, input.into(), Some(output.into())).await
    }

    /// Join `inputs` in order. The first input is the unit input.
    pub async fn concatenate(&self, inputs: Vec<PathBuf>, output: impl Into<PathBuf>) -> Result<Outcome> {
        let mut inputs = inputs.into_iter();
        let first = inputs
            .next()
            .ok_or_else(|| cf_core::Error::validation("concatenate needs at least two inputs"))?;
        let operation = Operation::Concatenate {
            inputs: inputs.collect(),
        };
        self.run_quiet(operation, first, Some(output.into())).await
    }

    pub async fn watermark(
        &self,
        input: impl Into<PathBuf>,
        overlay: impl Into<PathBuf>,
        position: Position,
        output: impl Into<PathBuf>,
    ) -> Result<Outcome> {
        let operation = Operation::Watermark {
            overlay: overlay.into(),
            position,
        };
        self.run_quiet(operation, input.into(), Some(output.into())).await
    }

    pub async fn extract_frames(
        &self,
        input: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
        fps: f64,
    ) -> Result<Outcome> {
        self.run_quiet(Operation::ExtractFrames { fps }, input.into(), Some(output.into()))
            .await
    }

    // ---- Builders for the orchestration layers ----

    /// An empty workflow reading `input`.
    pub fn workflow(&self, input: impl Into<PathBuf>) -> Result<Workflow> {
        Workflow::with_input(input)
    }

    /// A sequencer sharing this transcoder's tools and config.
    pub fn sequencer(&self) -> Sequencer {
        Sequencer::new(
            Arc::clone(&self.tools),
            Arc::clone(&self.prober),
            self.config.workflow.clone(),
        )
    }

    /// A scheduler using the configured concurrency and retry policy.
    pub fn scheduler(&self, events: EventSink<SchedulerEvent>) -> Scheduler {
        Scheduler::new(self.config.scheduler.clone(), events)
    }
}

impl std::fmt::Debug for Transcoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transcoder")
            .field("config", &self.config)
            .field("tools", &self.tools)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cf_av::FixedDuration;

    fn transcoder() -> Transcoder {
        Transcoder::with_parts(
            Config::default(),
            Arc::new(ToolRegistry::empty()),
            Arc::new(FixedDuration(10.0)),
        )
    }

    #[test]
    fn unit_validates_parameters_and_output() {
        let t = transcoder();
        let bad_bitrate = OperationSpec::new(
            Operation::Compress {
                video_bitrate: "quick".into(),
                audio_bitrate: None,
            },
            "in.mp4",
            Some(PathBuf::from("out.mp4")),
        );
        assert!(matches!(
            t.unit(bad_bitrate, EventSink::noop()),
            Err(cf_core::Error::Validation(_))
        ));

        let no_output = OperationSpec::new(Operation::Convert { format: None }, "in.mp4", None);
        assert!(t.unit(no_output, EventSink::noop()).is_err());
    }

    #[tokio::test]
    async fn missing_ffmpeg_is_a_failed_outcome() {
        let outcome = transcoder()
            .convert("in.mp4", "out.mkv", None)
            .await
            .unwrap();
        assert!(matches!(
            outcome.error(),
            Some(cf_core::Error::ToolNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn concatenate_needs_inputs() {
        let err = transcoder()
            .concatenate(Vec::new(), "all.mp4")
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn scheduler_uses_configured_policy() {
        let mut config = Config::default();
        config.scheduler.concurrency = 7;
        let t = Transcoder::with_parts(
            config,
            Arc::new(ToolRegistry::empty()),
            Arc::new(FixedDuration(1.0)),
        );
        assert_eq!(t.scheduler(EventSink::noop()).config().concurrency, 7);
    }
}
