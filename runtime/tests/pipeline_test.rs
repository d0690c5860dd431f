//! Integration tests for pipeline semantics
//!
//! Covers state replay and deduplication, ingress buffering while dormant,
//! at-most-once effect delivery, concurrent completion order, the grace
//! period, and failure isolation.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use statepipe_runtime::{
    ContextOf, EffectStream, ErrorContext, LifecyclePhase, Pipeline, PipelineConfig, PipelineError, Processor,
};
use statepipe_testing::{RecordingObserver, helpers};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

// ============================================================================
// Test Fixtures
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Cmd {
    Set(u32),
    Add(u32),
    Emit(u32),
    Delayed { millis: u64, tag: u32 },
    Double(u32),
    SetAndEmit(u32),
    Fail,
    Panic,
}

#[derive(Default)]
struct TestProcessor {
    subscribed: Arc<AtomicUsize>,
}

impl Processor for TestProcessor {
    type Event = Cmd;
    type State = u32;
    type Effect = u32;

    async fn process(&self, ctx: &ContextOf<Self>, event: Cmd) -> anyhow::Result<()> {
        match event {
            Cmd::Set(value) => {
                ctx.update_state(|_| value);
            },
            Cmd::Add(amount) => {
                ctx.update_state(|current| current + amount);
            },
            Cmd::Emit(tag) => ctx.emit_effect(tag).await,
            Cmd::Delayed { millis, tag } => {
                tokio::time::sleep(Duration::from_millis(millis)).await;
                ctx.emit_effect(tag).await;
            },
            Cmd::Double(value) => {
                let doubled = ctx.offload(move || value * 2).await?;
                ctx.update_state(|_| doubled);
            },
            Cmd::SetAndEmit(value) => {
                ctx.update_state(|_| value);
                ctx.emit_effect(value).await;
            },
            Cmd::Fail => anyhow::bail!("rejected"),
            Cmd::Panic => panic!("processor blew up"),
        }
        Ok(())
    }

    async fn on_subscribed(&self, _ctx: &ContextOf<Self>) -> anyhow::Result<()> {
        self.subscribed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

type Recorder = RecordingObserver<Cmd, u32, u32>;

fn pipeline_with(config: PipelineConfig) -> (Pipeline<TestProcessor>, Recorder, Arc<AtomicUsize>) {
    helpers::init_test_tracing();
    let subscribed = Arc::new(AtomicUsize::new(0));
    let observer = Recorder::new();
    let pipeline = Pipeline::builder(
        TestProcessor {
            subscribed: Arc::clone(&subscribed),
        },
        || 0,
    )
    .with_name("test")
    .with_config(config)
    .with_observer(observer.clone().shared())
    .build()
    .unwrap();
    (pipeline, observer, subscribed)
}

fn pipeline() -> (Pipeline<TestProcessor>, Recorder, Arc<AtomicUsize>) {
    pipeline_with(PipelineConfig::default())
}

async fn drain_quietly(stream: &mut EffectStream<u32>) -> Vec<u32> {
    let mut seen = Vec::new();
    while let Some(tag) = helpers::next_effect_within(stream, Duration::from_millis(200)).await {
        seen.push(tag);
    }
    seen
}

// ============================================================================
// State
// ============================================================================

#[tokio::test]
async fn test_equal_state_still_emits_every_effect() {
    let (pipeline, observer, _) = pipeline();
    let mut state = pipeline.state();
    let mut effects = pipeline.effects();
    pipeline.submit(Cmd::Set(3));
    assert_eq!(helpers::wait_for_state(&mut state, |s| *s == 3).await, Some(3));

    for _ in 0..5 {
        pipeline.submit(Cmd::SetAndEmit(3));
    }

    assert_eq!(helpers::collect_effects(&mut effects, 5).await, vec![3; 5]);
    assert_eq!(
        helpers::next_state_within(&mut state, Duration::from_millis(100)).await,
        None
    );
    assert_eq!(observer.states(), vec![3]);
}

#[tokio::test]
async fn test_new_subscriber_receives_current_state_first() {
    let (pipeline, _, _) = pipeline();
    let mut first = pipeline.state();
    assert_eq!(first.next().await, Some(0));

    pipeline.submit(Cmd::Set(4));
    assert_eq!(helpers::wait_for_state(&mut first, |s| *s == 4).await, Some(4));

    let mut late = pipeline.state();
    assert_eq!(late.next().await, Some(4));
}

#[tokio::test]
async fn test_equal_states_are_not_republished() {
    let (pipeline, observer, _) = pipeline_with(PipelineConfig::default().with_max_concurrency(1));
    let mut state = pipeline.state();
    assert_eq!(state.next().await, Some(0));

    for cmd in [Cmd::Set(1), Cmd::Set(1), Cmd::Set(1), Cmd::Set(2)] {
        pipeline.submit(cmd);
    }

    assert_eq!(helpers::wait_for_state(&mut state, |s| *s == 2).await, Some(2));
    assert_eq!(observer.states(), vec![1, 2]);
    assert_eq!(
        helpers::next_state_within(&mut state, Duration::from_millis(100)).await,
        None
    );
}

#[tokio::test]
async fn test_events_submitted_while_dormant_are_processed_on_activation() {
    let (pipeline, _, _) = pipeline();
    for amount in 1..=3 {
        pipeline.submit(Cmd::Add(amount));
    }
    assert_eq!(pipeline.phase(), LifecyclePhase::Dormant);
    assert_eq!(pipeline.queued_events(), 3);

    let mut state = pipeline.state();
    assert_eq!(helpers::wait_for_state(&mut state, |s| *s == 6).await, Some(6));
    assert_eq!(pipeline.queued_events(), 0);
}

#[tokio::test]
async fn test_offloaded_result_resumes_in_handler() {
    let (pipeline, _, _) = pipeline();
    let mut state = pipeline.state();
    pipeline.submit(Cmd::Double(21));
    assert_eq!(helpers::wait_for_state(&mut state, |s| *s == 42).await, Some(42));
}

// ============================================================================
// Effects
// ============================================================================

#[tokio::test]
async fn test_each_effect_reaches_exactly_one_subscriber() {
    let (pipeline, _, _) = pipeline();
    let mut left = pipeline.effects();
    let mut right = pipeline.effects();

    for tag in 0..20 {
        pipeline.submit(Cmd::Emit(tag));
    }

    let (mut from_left, from_right) = tokio::join!(drain_quietly(&mut left), drain_quietly(&mut right));

    from_left.extend(from_right);
    from_left.sort_unstable();
    assert_eq!(from_left, (0..20).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_effects_buffered_without_reader_reach_first_effect_subscriber() {
    let (pipeline, observer, _) = pipeline();
    let _keep_active = pipeline.state();

    for tag in [7, 8, 9] {
        pipeline.submit(Cmd::Emit(tag));
    }
    while observer.effects().len() < 3 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let mut effects = pipeline.effects();
    assert_eq!(helpers::collect_effects(&mut effects, 3).await, vec![7, 8, 9]);
}

#[tokio::test]
async fn test_buffered_effects_are_discarded_at_teardown() {
    let (pipeline, observer, _) =
        pipeline_with(PipelineConfig::default().with_grace_period(Duration::ZERO));
    let state = pipeline.state();

    pipeline.submit(Cmd::Emit(1));
    while observer.effects().is_empty() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    drop(state);
    assert_eq!(pipeline.phase(), LifecyclePhase::Dormant);

    let mut effects = pipeline.effects();
    assert_eq!(
        helpers::next_effect_within(&mut effects, Duration::from_millis(100)).await,
        None
    );
}

#[tokio::test(start_paused = true)]
async fn test_slow_events_do_not_block_fast_ones() {
    let (pipeline, _, _) = pipeline();
    let mut effects = pipeline.effects();

    pipeline.submit(Cmd::Delayed { millis: 100, tag: 1 });
    pipeline.submit(Cmd::Delayed { millis: 50, tag: 2 });
    pipeline.submit(Cmd::Delayed { millis: 25, tag: 3 });

    assert_eq!(helpers::collect_effects(&mut effects, 3).await, vec![3, 2, 1]);
}

#[tokio::test(start_paused = true)]
async fn test_in_flight_events_are_bounded() {
    let (pipeline, _, _) = pipeline_with(PipelineConfig::default().with_max_concurrency(2));
    let _effects = pipeline.effects();

    for tag in 0..5 {
        pipeline.submit(Cmd::Delayed { millis: 1_000, tag });
    }
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(pipeline.in_flight_events(), 2);
    assert_eq!(pipeline.queued_events(), 3);
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_resubscribing_within_grace_keeps_pipeline_alive() {
    let (pipeline, observer, subscribed) =
        pipeline_with(PipelineConfig::default().with_grace_period(Duration::from_secs(5)));

    let mut first = pipeline.state();
    pipeline.submit(Cmd::Set(7));
    assert_eq!(helpers::wait_for_state(&mut first, |s| *s == 7).await, Some(7));
    drop(first);
    assert_eq!(pipeline.phase(), LifecyclePhase::PendingTeardown);

    tokio::time::sleep(Duration::from_secs(2)).await;
    let mut state = pipeline.state();
    assert_eq!(pipeline.phase(), LifecyclePhase::Active);
    assert_eq!(state.next().await, Some(7));

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(subscribed.load(Ordering::SeqCst), 1);
    assert_eq!(observer.started(), 1);
    assert_eq!(observer.stopped(), 0);

    drop(state);
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(pipeline.phase(), LifecyclePhase::Dormant);
    assert_eq!(observer.stopped(), 1);

    let _again = pipeline.state();
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(subscribed.load(Ordering::SeqCst), 2);
    assert_eq!(observer.started(), 2);
}

#[tokio::test]
async fn test_state_and_effect_subscribers_share_one_count() {
    let (pipeline, _, _) = pipeline();
    let state = pipeline.state();
    let effects = pipeline.effects();
    assert_eq!(pipeline.subscriber_count(), 2);

    drop(state);
    assert_eq!(pipeline.phase(), LifecyclePhase::Active);
    drop(effects);
    assert_eq!(pipeline.subscriber_count(), 0);
    assert_eq!(pipeline.phase(), LifecyclePhase::PendingTeardown);
}

#[tokio::test]
async fn test_state_stream_adapts_to_futures_stream() {
    use futures::StreamExt;

    let (pipeline, _, _) = pipeline();
    let stream = pipeline.state().into_stream();
    pipeline.submit(Cmd::Set(3));

    let states: Vec<u32> = stream.take(2).collect().await;
    assert_eq!(states, vec![0, 3]);
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test]
async fn test_failing_events_are_reported_and_pipeline_keeps_running() {
    let (pipeline, observer, _) = pipeline_with(PipelineConfig::default().with_max_concurrency(1));
    let mut state = pipeline.state();

    pipeline.submit(Cmd::Fail);
    pipeline.submit(Cmd::Panic);
    pipeline.submit(Cmd::Set(5));

    assert_eq!(helpers::wait_for_state(&mut state, |s| *s == 5).await, Some(5));

    let errors = observer.errors();
    assert_eq!(errors.len(), 2);
    assert!(errors.iter().all(|(_, context)| *context == ErrorContext::Process));
    assert!(errors[0].0.contains("rejected"));
    assert!(errors[1].0.contains("processor blew up"));
}

#[tokio::test]
async fn test_failure_between_valid_events_is_isolated() {
    let (pipeline, observer, _) = pipeline_with(PipelineConfig::default().with_max_concurrency(1));
    let mut state = pipeline.state();

    pipeline.submit(Cmd::Add(2));
    pipeline.submit(Cmd::Fail);
    pipeline.submit(Cmd::Add(3));

    assert_eq!(helpers::wait_for_state(&mut state, |s| *s == 5).await, Some(5));
    assert_eq!(observer.states(), vec![2, 5]);

    let errors = observer.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].1, ErrorContext::Process);
    assert!(errors[0].0.contains("rejected"));
}

#[tokio::test]
async fn test_effect_subscriber_is_woken_by_emit() {
    let (pipeline, _, _) = pipeline();
    let mut effects = pipeline.effects();

    let mut next = tokio_test::task::spawn(effects.next());
    tokio_test::assert_pending!(next.poll());

    pipeline.submit(Cmd::Emit(9));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(next.is_woken());
    tokio_test::assert_ready_eq!(next.poll(), Some(9));
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let result = Pipeline::builder(TestProcessor::default(), || 0)
        .with_config(PipelineConfig::default().with_effect_buffer(0))
        .build();
    assert!(matches!(result, Err(PipelineError::InvalidConfig(_))));
}

#[test]
fn test_build_outside_runtime_fails() {
    let result = Pipeline::new(TestProcessor::default(), || 0);
    assert!(matches!(result, Err(PipelineError::NoRuntime)));
}

#[test]
fn test_build_with_explicit_runtime_handle() {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap();

    let pipeline = Pipeline::builder(TestProcessor::default(), || 1)
        .with_runtime(runtime.handle().clone())
        .build()
        .unwrap();

    // Subscribing from a thread outside the runtime still activates it
    let mut state = pipeline.state();
    pipeline.submit(Cmd::Add(1));
    let reached = runtime.block_on(helpers::wait_for_state(&mut state, |s| *s == 2));
    assert_eq!(reached, Some(2));
}

// ============================================================================
// Health
// ============================================================================

#[tokio::test]
async fn test_health_reflects_effect_backlog() {
    let (pipeline, observer, _) = pipeline_with(PipelineConfig::default().with_effect_buffer(2));
    let _state = pipeline.state();
    assert!(pipeline.health().status.is_healthy());

    pipeline.submit(Cmd::Emit(1));
    pipeline.submit(Cmd::Emit(2));
    while observer.effects().len() < 2 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let check = pipeline.health();
    assert!(check.status.is_unhealthy());
    assert_eq!(check.metadata_value("phase"), Some("active"));
    assert_eq!(check.metadata_value("buffered_effects"), Some("2"));

    let report = pipeline.health_report();
    assert!(report.is_unhealthy());
    assert_eq!(report.checks.len(), 1);
}
