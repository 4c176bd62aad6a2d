//! Workflow integration tests
//!
//! Run multi-step workflows end to end against fake ffmpeg/ffprobe scripts.

#![cfg(unix)]

mod common;

use std::time::Duration;

use cf_core::config::Config;
use cf_core::{EventSink, Operation, OperationKind};
use cf_pipeline::{StepIndex, Workflow, WorkflowErrorKind, WorkflowEvent};
use common::Harness;
use tokio::sync::mpsc::UnboundedReceiver;

fn drain(rx: &mut UnboundedReceiver<WorkflowEvent>) -> Vec<WorkflowEvent> {
    let mut events = Vec::new();
    while let Ok(e) = rx.try_recv() {
        events.push(e);
    }
    events
}

const SLOW_OK: &str = r#"echo "$@" >> "$(dirname "$0")/invocations.log"
for last; do :; done
sleep 1
touch "$last"
exit 0"#;

#[tokio::test]
async fn three_step_workflow_chains_outputs() {
    let h = Harness::new();
    let out = h.path("out.mkv");
    let out_c = h.path("out_c.mkv");
    let thumb = h.path("thumb.png");

    let workflow = Workflow::with_input(&h.input).unwrap();
    workflow
        .convert(None, &out)
        .unwrap()
        .compress("800k", &out_c)
        .unwrap()
        .thumbnail("00:00:05", &thumb)
        .unwrap();

    let (events, mut rx) = EventSink::channel();
    let outputs = h.transcoder().sequencer().run(&workflow, events).await.unwrap();

    assert_eq!(outputs, vec![out.clone(), out_c.clone(), thumb.clone()]);
    assert!(out.exists() && out_c.exists() && thumb.exists());

    // Each step read the previous step's output.
    let calls = h.invocations();
    assert_eq!(calls.len(), 3);
    assert!(calls[0].contains(h.input.to_str().unwrap()));
    assert!(calls[1].contains(&format!("-i {}", out.display())));
    assert!(calls[1].contains("-b:v 800k"));
    assert!(calls[2].contains(&format!("-i {}", out_c.display())));

    let steps = workflow.steps();
    assert_eq!(steps[1].input.as_deref(), Some(out.as_path()));
    assert_eq!(steps[2].input.as_deref(), Some(out_c.as_path()));

    let events = drain(&mut rx);
    assert!(matches!(
        events.first(),
        Some(WorkflowEvent::Started { total_steps: 3, .. })
    ));
    assert!(matches!(events.last(), Some(WorkflowEvent::Done { outputs }) if outputs.len() == 3));

    // Half-way through step 2 of 3 is half-way through the workflow.
    let midpoint = events
        .iter()
        .find_map(|e| match e {
            WorkflowEvent::Progress(p) if p.step == 2 && (p.step_percent - 50.0).abs() < 1e-6 => {
                Some(p.overall_percent)
            }
            _ => None,
        })
        .expect("progress at 50% of step 2");
    assert!((midpoint - 50.0).abs() < 1e-6, "overall was {midpoint}");

    let overall: Vec<f64> = events
        .iter()
        .filter_map(|e| match e {
            WorkflowEvent::Progress(p) => Some(p.overall_percent),
            _ => None,
        })
        .collect();
    assert!(overall.windows(2).all(|w| w[0] <= w[1]), "{overall:?}");

    let completed: Vec<usize> = events
        .iter()
        .filter_map(|e| match e {
            WorkflowEvent::StepCompleted { step, .. } => Some(*step),
            _ => None,
        })
        .collect();
    assert_eq!(completed, vec![1, 2, 3]);
    assert!(!workflow.is_running());
}

#[tokio::test]
async fn probe_step_is_skipped_when_wiring_inputs() {
    let h = Harness::new();
    let clip = h.path("clip.mp4");
    let audio = h.path("clip.mp3");

    let workflow = Workflow::with_input(&h.input).unwrap();
    workflow
        .clip("00:00:01", "3", &clip)
        .unwrap()
        .probe()
        .unwrap()
        .extract_audio(&audio)
        .unwrap();

    let outputs = h
        .transcoder()
        .sequencer()
        .run(&workflow, EventSink::noop())
        .await
        .unwrap();

    assert_eq!(outputs, vec![clip.clone(), audio]);
    let steps = workflow.steps();
    assert_eq!(steps[1].input.as_deref(), Some(clip.as_path()));
    assert_eq!(steps[2].input.as_deref(), Some(clip.as_path()));
}

#[tokio::test]
async fn missing_outputs_are_generated_next_to_input() {
    let h = Harness::new();
    let workflow = Workflow::with_input(&h.input).unwrap();
    workflow
        .step(Operation::Convert { format: None }, None)
        .unwrap();

    let outputs = h
        .transcoder()
        .sequencer()
        .run(&workflow, EventSink::noop())
        .await
        .unwrap();

    assert_eq!(outputs.len(), 1);
    let generated = &outputs[0];
    assert_eq!(generated.parent(), h.input.parent());
    let name = generated.file_name().unwrap().to_string_lossy();
    assert!(name.starts_with("convert_step1_"), "{name}");
    assert!(generated.exists());
}

#[tokio::test]
async fn duplicate_outputs_fail_before_any_step() {
    let h = Harness::new();
    let out = h.path("same.mkv");
    let workflow = Workflow::with_input(&h.input).unwrap();
    workflow
        .convert(None, &out)
        .unwrap()
        .compress("1M", &out)
        .unwrap();

    let (events, mut rx) = EventSink::channel();
    let err = h
        .transcoder()
        .sequencer()
        .run(&workflow, events)
        .await
        .unwrap_err();

    assert_eq!(err.kind, WorkflowErrorKind::Validation);
    assert_eq!(err.step, StepIndex::Global);
    assert!(h.invocations().is_empty());
    assert!(matches!(
        drain(&mut rx).as_slice(),
        [WorkflowEvent::Failed(_)]
    ));
}

#[tokio::test]
async fn missing_input_is_file_not_found() {
    let h = Harness::new();
    let workflow = Workflow::with_input(h.path("nope.mp4")).unwrap();
    workflow.convert(None, h.path("out.mkv")).unwrap();

    let err = h
        .transcoder()
        .sequencer()
        .run(&workflow, EventSink::noop())
        .await
        .unwrap_err();

    assert_eq!(err.kind, WorkflowErrorKind::FileNotFound);
    assert_eq!(err.step, StepIndex::Global);
}

#[tokio::test]
async fn failing_step_short_circuits() {
    let h = Harness::with_ffmpeg(common::FFMPEG_BAD_INPUT);
    let workflow = Workflow::with_input(&h.input).unwrap();
    workflow
        .convert(None, h.path("a.mkv"))
        .unwrap()
        .compress("1M", h.path("b.mkv"))
        .unwrap();

    let (events, mut rx) = EventSink::channel();
    let err = h
        .transcoder()
        .sequencer()
        .run(&workflow, events)
        .await
        .unwrap_err();

    assert_eq!(err.kind, WorkflowErrorKind::InvalidMedia);
    assert_eq!(err.step, StepIndex::Step(1));
    assert_eq!(h.invocations().len(), 1);

    let events = drain(&mut rx);
    assert!(!events
        .iter()
        .any(|e| matches!(e, WorkflowEvent::StepStarted { step: 2, .. })));
    assert!(matches!(events.last(), Some(WorkflowEvent::Failed(e)) if e == &err));
}

#[tokio::test]
async fn step_timeout_is_reported() {
    let h = Harness::with_ffmpeg(common::FFMPEG_HANG);
    let mut config = Config::default();
    config.workflow.timeouts.insert(OperationKind::Convert, 0);

    let workflow = Workflow::with_input(&h.input).unwrap();
    workflow.convert(None, h.path("slow.mkv")).unwrap();

    let err = h
        .transcoder_with(config)
        .sequencer()
        .run(&workflow, EventSink::noop())
        .await
        .unwrap_err();

    assert_eq!(err.kind, WorkflowErrorKind::Timeout);
    assert_eq!(err.step, StepIndex::Step(1));
}

#[tokio::test]
async fn abort_stops_before_next_step() {
    let h = Harness::with_ffmpeg(SLOW_OK);
    let workflow = Workflow::with_input(&h.input).unwrap();
    workflow
        .convert(None, h.path("a.mkv"))
        .unwrap()
        .compress("1M", h.path("b.mkv"))
        .unwrap();
    let sequencer = h.transcoder().sequencer();

    let control = async {
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(workflow.is_running());

        let err = workflow.convert(None, h.path("c.mkv")).unwrap_err();
        assert!(matches!(err, cf_core::Error::Usage(_)));

        let again = sequencer.run(&workflow, EventSink::noop()).await.unwrap_err();
        assert_eq!(again.kind, WorkflowErrorKind::AlreadyRunning);

        assert!(workflow.abort());
    };

    let (result, ()) = tokio::join!(sequencer.run(&workflow, EventSink::noop()), control);
    let err = result.unwrap_err();

    assert_eq!(err.kind, WorkflowErrorKind::Aborted);
    assert_eq!(err.step, StepIndex::Global);
    assert_eq!(h.invocations().len(), 1);
    assert!(!workflow.is_running());
    assert!(!workflow.abort());
    assert_eq!(workflow.len(), 2);
}

#[tokio::test]
async fn empty_workflow_is_rejected() {
    let h = Harness::new();
    let workflow = Workflow::with_input(&h.input).unwrap();
    let err = h
        .transcoder()
        .sequencer()
        .run(&workflow, EventSink::noop())
        .await
        .unwrap_err();
    assert_eq!(err.kind, WorkflowErrorKind::Validation);

    let no_input = Workflow::new();
    no_input.probe().unwrap();
    let err = h
        .transcoder()
        .sequencer()
        .run(&no_input, EventSink::noop())
        .await
        .unwrap_err();
    assert_eq!(err.kind, WorkflowErrorKind::Validation);
    assert_eq!(err.step, StepIndex::Global);
    assert!(no_input.input().is_none());
}
