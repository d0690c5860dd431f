//! Integration tests for the counter pipeline with the notifier plugin
//!
//! These tests demonstrate the full end-to-end flow: events in, state and
//! effects out, plugin feedback, and the subscriber-driven lifecycle.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use counter::notifier::{self, NotifierProcessor, RESET_NOTICE};
use counter::{CounterEffect, CounterEvent, CounterProcessor, CounterState};
use statepipe_runtime::{LifecyclePhase, Pipeline, PipelineConfig};
use statepipe_testing::helpers;
use std::time::Duration;

fn counter_with_notifier() -> (Pipeline<CounterProcessor>, Pipeline<NotifierProcessor>) {
    let counter = Pipeline::builder(CounterProcessor::new(), CounterState::default)
        .with_name("counter")
        .build()
        .unwrap();
    let notifier = Pipeline::builder(NotifierProcessor, || None)
        .with_name("notifier")
        .build()
        .unwrap();
    counter.register(notifier::registration(&notifier));
    (counter, notifier)
}

#[tokio::test]
async fn test_counter_with_pipeline() {
    let (counter, _) = counter_with_notifier();
    let mut state = counter.state();
    assert_eq!(state.next().await.map(|s| s.count), Some(0));

    for event in [CounterEvent::Increment, CounterEvent::Increment, CounterEvent::Decrement] {
        counter.submit(event);
    }

    let reached = helpers::wait_for_state(&mut state, |s| s.count == 1).await;
    assert!(reached.is_some());
}

#[tokio::test]
async fn test_concurrent_submitters() {
    let (counter, _) = counter_with_notifier();
    let mut state = counter.state();

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let counter = counter.clone();
            tokio::spawn(async move {
                counter.submit(CounterEvent::Increment);
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }

    let reached = helpers::wait_for_state(&mut state, |s| s.count == 10).await;
    assert!(reached.is_some());
}

#[tokio::test]
async fn test_milestone_effect_reaches_subscriber() {
    let (counter, _) = counter_with_notifier();
    let mut effects = counter.effects();

    for _ in 0..10 {
        counter.submit(CounterEvent::Increment);
    }

    let effect = helpers::next_effect_within(&mut effects, helpers::DEFAULT_WAIT).await;
    assert_eq!(effect, Some(CounterEffect::Milestone(10)));
}

#[tokio::test]
async fn test_each_milestone_announced_once_under_concurrency() {
    let (counter, _) = counter_with_notifier();
    let mut effects = counter.effects();

    for _ in 0..25 {
        counter.submit(CounterEvent::Increment);
    }

    let mut milestones = helpers::collect_effects(&mut effects, 2).await;
    milestones.sort_by_key(|effect| match effect {
        CounterEffect::Milestone(count) => *count,
        CounterEffect::Notified(_) => i64::MAX,
    });
    assert_eq!(milestones, vec![CounterEffect::Milestone(10), CounterEffect::Milestone(20)]);
    assert_eq!(
        helpers::next_effect_within(&mut effects, Duration::from_millis(100)).await,
        None
    );
}

#[tokio::test]
async fn test_reset_notice_round_trip_through_plugin() {
    let (counter, notifier) = counter_with_notifier();
    let mut state = counter.state();
    let mut effects = counter.effects();
    assert_eq!(notifier.phase(), LifecyclePhase::Active);

    counter.submit(CounterEvent::Reset);
    let noticed = helpers::wait_for_state(&mut state, |s| s.notice.is_some())
        .await
        .unwrap();
    assert_eq!(noticed.notice.as_deref(), Some(RESET_NOTICE));

    counter.submit(CounterEvent::Acknowledge);
    let effect = helpers::next_effect_within(&mut effects, helpers::DEFAULT_WAIT).await;
    assert_eq!(effect, Some(CounterEffect::Notified(RESET_NOTICE.to_string())));

    let settled = helpers::wait_for_state(&mut state, |s| s.acknowledged == 1 && s.notice.is_none())
        .await
        .unwrap();
    assert_eq!(settled.acknowledged, 1);

    // Feedback is applied exactly once
    assert_eq!(
        helpers::next_state_within(&mut state, Duration::from_millis(100)).await,
        None
    );
}

#[tokio::test]
async fn test_pipeline_isolation() {
    let (first, _) = counter_with_notifier();
    let (second, _) = counter_with_notifier();
    let mut first_state = first.state();
    let _second_state = second.state();

    first.submit(CounterEvent::Increment);
    first.submit(CounterEvent::Increment);
    helpers::wait_for_state(&mut first_state, |s| s.count == 2)
        .await
        .unwrap();

    assert_eq!(second.current_state().count, 0);
}

#[tokio::test(start_paused = true)]
async fn test_ticker_runs_only_while_subscribed() {
    let counter = Pipeline::builder(
        CounterProcessor::with_ticker(Duration::from_millis(100)),
        CounterState::default,
    )
    .with_config(PipelineConfig::default().with_grace_period(Duration::from_secs(1)))
    .build()
    .unwrap();

    let mut state = counter.state();
    let reached = helpers::wait_for_state(&mut state, |s| s.count >= 3).await;
    assert!(reached.is_some());

    drop(state);
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(counter.phase(), LifecyclePhase::Dormant);

    let frozen = counter.current_state().count;
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(counter.current_state().count, frozen);
}
