use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use etl_core::{CancellationToken, Checkpoint, EtlError, EventSourcedJobTracker, InMemoryEventStore, JobRun, JobTracker,
               PipelineBuilder, PipelineStep, RetryPolicy, RunStatus, StepContext, StepKind, StepState, StepStatus};
use serde_json::json;
use uuid::Uuid;

type Tracker = EventSourcedJobTracker<InMemoryEventStore>;

fn tracker() -> Tracker {
    EventSourcedJobTracker::new(InMemoryEventStore::new())
}

fn counting(name: &str, kind: StepKind, counter: &Arc<AtomicUsize>) -> PipelineStep {
    let counter = Arc::clone(counter);
    let label = name.to_string();
    PipelineStep::from_fn(name, kind, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(Checkpoint::new(json!({ "from": label })))
    })
}

#[test]
fn linear_pipeline_succeeds_and_passes_checkpoints_downstream() {
    let n = Arc::new(AtomicUsize::new(0));
    let pipeline = PipelineBuilder::new().step(counting("extract", StepKind::Extract, &n))
                                         .step(PipelineStep::from_fn("transform", StepKind::Transform, |ctx| {
                                                   let up = ctx.upstream("extract")?;
                                                   Ok(Checkpoint::new(json!({ "seen": up.value()["from"] })))
                                               }).depends_on(["extract"]))
                                         .build()
                                         .unwrap();
    let t = tracker();
    let run = pipeline.run(&t, None, &CancellationToken::new()).unwrap();
    assert_eq!(run.status, RunStatus::Succeeded);
    assert!(run.finished_at.is_some());
    let transform = run.step("transform").unwrap();
    assert_eq!(transform.checkpoint.as_ref().unwrap().value(), &json!({ "seen": "extract" }));
    assert_eq!(transform.attempt_count, 1);
    assert_eq!(pipeline.order(), vec!["extract", "transform"]);
}

#[test]
fn cycles_fail_at_construction() {
    fn ok(_: &StepContext<'_>) -> Result<Checkpoint, EtlError> {
        Ok(Checkpoint::empty())
    }
    let err = PipelineBuilder::new().step(PipelineStep::from_fn("a", StepKind::Extract, ok).depends_on(["b"]))
                                    .step(PipelineStep::from_fn("b", StepKind::Transform, ok).depends_on(["a"]))
                                    .build()
                                    .unwrap_err();
    assert_eq!(err, EtlError::CyclicDependency { steps: vec!["a".into(), "b".into()] });
}

#[test]
fn transient_failure_is_retried_until_success() {
    let calls = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&calls);
    let flaky = PipelineStep::from_fn("extract", StepKind::Extract, move |ctx| {
                    if c.fetch_add(1, Ordering::SeqCst) < 2 {
                        return Err(EtlError::TransientIo(format!("reset on attempt {}", ctx.attempt())));
                    }
                    Ok(Checkpoint::empty())
                });
    let pipeline = PipelineBuilder::new().retry(RetryPolicy::immediate(3)).step(flaky).build().unwrap();
    let run = pipeline.run(&tracker(), None, &CancellationToken::new()).unwrap();
    assert_eq!(run.status, RunStatus::Succeeded);
    assert_eq!(run.step("extract").unwrap().attempt_count, 3);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[test]
fn exhausted_retries_fail_step_and_skip_dependents() {
    let later = Arc::new(AtomicUsize::new(0));
    let pipeline = PipelineBuilder::new().retry(RetryPolicy::immediate(2))
                                         .step(PipelineStep::from_fn("extract", StepKind::Extract, |_| {
                                                   Err(EtlError::TransientIo("timeout".into()))
                                               }))
                                         .step(counting("transform", StepKind::Transform, &later).depends_on(["extract"]))
                                         .step(counting("load", StepKind::Load, &later).depends_on(["transform"]))
                                         .build()
                                         .unwrap();
    let run = pipeline.run(&tracker(), None, &CancellationToken::new()).unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    let extract = run.step("extract").unwrap();
    assert_eq!(extract.status, StepStatus::Failed);
    assert_eq!(extract.attempt_count, 2);
    assert!(extract.last_error.as_deref().unwrap().contains("timeout"));
    assert_eq!(run.step_status("transform"), Some(StepStatus::Skipped));
    assert_eq!(run.step_status("load"), Some(StepStatus::Skipped));
    assert_eq!(later.load(Ordering::SeqCst), 0);
}

#[test]
fn fatal_errors_are_not_retried() {
    let calls = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&calls);
    let pipeline = PipelineBuilder::new().retry(RetryPolicy::immediate(5))
                                         .step(PipelineStep::from_fn("extract", StepKind::Extract, move |_| {
                                                   c.fetch_add(1, Ordering::SeqCst);
                                                   Err(EtlError::Auth("401 Unauthorized".into()))
                                               }))
                                         .build()
                                         .unwrap();
    let run = pipeline.run(&tracker(), None, &CancellationToken::new()).unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn non_critical_failure_yields_partial_success() {
    let n = Arc::new(AtomicUsize::new(0));
    let pipeline = PipelineBuilder::new().retry(RetryPolicy::none())
                                         .step(counting("extract_gitlab", StepKind::Extract, &n))
                                         .step(PipelineStep::from_fn("extract_sonar", StepKind::Extract, |_| {
                                                   Err(EtlError::Configuration("missing token".into()))
                                               }).non_critical())
                                         .step(counting("report_sonar", StepKind::Load, &n).depends_on(["extract_sonar"])
                                                                                          .non_critical())
                                         .step(counting("load_gitlab", StepKind::Load, &n).depends_on(["extract_gitlab"]))
                                         .build()
                                         .unwrap();
    let run = pipeline.run(&tracker(), None, &CancellationToken::new()).unwrap();
    assert_eq!(run.status, RunStatus::PartialSuccess);
    assert_eq!(run.step_status("load_gitlab"), Some(StepStatus::Succeeded));
    assert_eq!(run.step_status("report_sonar"), Some(StepStatus::Skipped));
    assert_eq!(n.load(Ordering::SeqCst), 2);
}

#[test]
fn skipped_critical_dependent_fails_the_run() {
    let n = Arc::new(AtomicUsize::new(0));
    let pipeline = PipelineBuilder::new().retry(RetryPolicy::none())
                                         .step(PipelineStep::from_fn("extract", StepKind::Extract, |_| {
                                                   Err(EtlError::TransientIo("down".into()))
                                               }).non_critical())
                                         .step(counting("load", StepKind::Load, &n).depends_on(["extract"]))
                                         .build()
                                         .unwrap();
    let run = pipeline.run(&tracker(), None, &CancellationToken::new()).unwrap();
    assert_eq!(run.status, RunStatus::Failed);
}

/// Tracker que simula un crash: falla al persistir el éxito de un step.
struct CrashOnSuccess {
    inner: Tracker,
    step: &'static str,
    armed: AtomicBool,
}

impl JobTracker for CrashOnSuccess {
    fn start(&self, pipeline_hash: &str, steps: &[String]) -> Result<JobRun, EtlError> {
        self.inner.start(pipeline_hash, steps)
    }
    fn record_step(&self, run_id: Uuid, step: &str, state: &StepState) -> Result<(), EtlError> {
        if step == self.step && state.status == StepStatus::Succeeded && self.armed.load(Ordering::SeqCst) {
            return Err(EtlError::Store("process killed".into()));
        }
        self.inner.record_step(run_id, step, state)
    }
    fn record_status(&self, run_id: Uuid, status: RunStatus) -> Result<(), EtlError> {
        self.inner.record_status(run_id, status)
    }
    fn load(&self, run_id: Uuid) -> Result<JobRun, EtlError> {
        self.inner.load(run_id)
    }
    fn latest_incomplete(&self) -> Result<Option<JobRun>, EtlError> {
        self.inner.latest_incomplete()
    }
}

#[test]
fn crash_during_historize_resumes_without_rerunning_upstream() {
    let extract = Arc::new(AtomicUsize::new(0));
    let transform = Arc::new(AtomicUsize::new(0));
    let historize = Arc::new(AtomicUsize::new(0));
    let pipeline = PipelineBuilder::new().step(counting("extract", StepKind::Extract, &extract))
                                         .step(counting("transform", StepKind::Transform, &transform).depends_on(["extract"]))
                                         .step(counting("historize", StepKind::Historize, &historize).depends_on(["transform"]))
                                         .build()
                                         .unwrap();
    let t = CrashOnSuccess { inner: tracker(),
                             step: "historize",
                             armed: AtomicBool::new(true) };

    assert!(pipeline.run(&t, None, &CancellationToken::new()).is_err());
    let interrupted = t.latest_incomplete().unwrap().expect("interrupted run");
    assert_eq!(interrupted.step_status("transform"), Some(StepStatus::Succeeded));
    assert_eq!(interrupted.step_status("historize"), Some(StepStatus::Running));

    t.armed.store(false, Ordering::SeqCst);
    historize.store(0, Ordering::SeqCst);
    let resumed = pipeline.run(&t, Some(interrupted.clone()), &CancellationToken::new()).unwrap();
    assert_eq!(resumed.run_id, interrupted.run_id);
    assert_eq!(resumed.status, RunStatus::Succeeded);
    assert_eq!(extract.load(Ordering::SeqCst), 1);
    assert_eq!(transform.load(Ordering::SeqCst), 1);
    assert_eq!(historize.load(Ordering::SeqCst), 1);
    assert_eq!(resumed.step("historize").unwrap().attempt_count, 2);
    assert_eq!(t.latest_incomplete().unwrap(), None);
}

#[test]
fn resume_with_a_different_definition_is_refused() {
    let n = Arc::new(AtomicUsize::new(0));
    let t = tracker();
    let original = PipelineBuilder::new().step(counting("extract", StepKind::Extract, &n)).build().unwrap();
    let run = t.start(original.definition_hash(), &["extract".to_string()]).unwrap();
    let other = PipelineBuilder::new().step(counting("extract", StepKind::Extract, &n))
                                      .step(counting("load", StepKind::Load, &n).depends_on(["extract"]))
                                      .build()
                                      .unwrap();
    assert!(matches!(other.run(&t, Some(run), &CancellationToken::new()), Err(EtlError::Configuration(_))));
}

#[test]
fn cancellation_parks_step_with_progress_and_resume_continues_from_it() {
    let token = CancellationToken::new();
    let cancel_handle = token.clone();
    let step = PipelineStep::from_fn("historize", StepKind::Historize, move |ctx| {
        let done = ctx.checkpoint()
                      .and_then(|cp| cp.value()["done"].as_u64())
                      .unwrap_or(0);
        for batch in done..4 {
            ctx.check_cancelled()?;
            ctx.save_progress(Checkpoint::new(json!({ "done": batch + 1 })))?;
            if batch == 1 {
                cancel_handle.cancel();
            }
        }
        Ok(Checkpoint::new(json!({ "done": 4, "resumed_from": done })))
    });
    let pipeline = PipelineBuilder::new().step(step).build().unwrap();
    let t = tracker();

    let first = pipeline.run(&t, None, &token).unwrap();
    assert_eq!(first.status, RunStatus::Cancelled);
    let parked = first.step("historize").unwrap();
    assert_eq!(parked.status, StepStatus::Pending);
    assert_eq!(parked.checkpoint.as_ref().unwrap().value(), &json!({ "done": 2 }));

    let resumed = pipeline.run(&t, t.latest_incomplete().unwrap(), &CancellationToken::new()).unwrap();
    assert_eq!(resumed.status, RunStatus::Succeeded);
    assert_eq!(resumed.step("historize").unwrap().checkpoint.as_ref().unwrap().value(),
               &json!({ "done": 4, "resumed_from": 2 }));
}

#[test]
fn finished_runs_cannot_be_resumed() {
    let n = Arc::new(AtomicUsize::new(0));
    let t = tracker();
    let pipeline = PipelineBuilder::new().step(counting("extract", StepKind::Extract, &n)).build().unwrap();
    let run = pipeline.run(&t, None, &CancellationToken::new()).unwrap();
    assert!(matches!(pipeline.run(&t, Some(run), &CancellationToken::new()), Err(EtlError::Configuration(_))));
}
