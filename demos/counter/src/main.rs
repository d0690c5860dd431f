//! Counter demo binary
//!
//! Runs a counter pipeline with the notifier plugin attached and prints what
//! a subscriber sees. Set `RUST_LOG` to watch the runtime's lifecycle logs and
//! `STATEPIPE_*` variables to change the pipeline configuration.

use counter::notifier::{self, NotifierProcessor};
use counter::{CounterEffect, CounterEvent, CounterProcessor, CounterState};
use statepipe_runtime::metrics::MetricsRecorder;
use statepipe_runtime::{Pipeline, PipelineConfig, TracingObserver};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "counter=debug,statepipe_runtime=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut metrics = MetricsRecorder::new();
    metrics.install()?;

    println!("=== Counter Demo: statepipe ===\n");

    let config = PipelineConfig::from_env()?.with_grace_period(Duration::from_millis(200));
    let counter = Pipeline::builder(CounterProcessor::new(), CounterState::default)
        .with_name("counter")
        .with_config(config.clone())
        .with_observer(Arc::new(TracingObserver))
        .build()?;
    let notifier = Pipeline::builder(NotifierProcessor, || None)
        .with_name("notifier")
        .with_config(config)
        .build()?;
    counter.register(notifier::registration(&notifier));

    // Nothing runs until someone subscribes; this event waits in the ingress
    counter.submit(CounterEvent::Increment);
    println!("Phase before subscribing: {}", counter.phase());

    let mut state = counter.state();
    let mut effects = counter.effects();
    println!("Phase after subscribing:  {}", counter.phase());
    println!("Initial state: {:?}", state.next().await);

    let script = std::iter::repeat_n(CounterEvent::Increment, 9)
        .chain([CounterEvent::Decrement, CounterEvent::Reset, CounterEvent::Acknowledge]);
    for event in script {
        println!("\n>>> Submitting: {event:?}");
        counter.submit(event);
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    tokio::time::sleep(Duration::from_millis(50)).await;
    println!("\nFinal state: {:?}", counter.current_state());

    println!("\nEffects received:");
    while let Ok(Some(effect)) =
        tokio::time::timeout(Duration::from_millis(50), effects.next()).await
    {
        match effect {
            CounterEffect::Milestone(count) => println!("  • milestone at {count}"),
            CounterEffect::Notified(notice) => println!("  • notice acknowledged: {notice}"),
        }
    }

    let report = counter.health_report();
    println!("\nHealth: {}", report.status);
    for check in &report.checks {
        println!("  • {}: {} {:?}", check.component, check.status, check.metadata);
    }

    drop(state);
    drop(effects);
    println!("\nPhase after unsubscribing: {}", counter.phase());
    tokio::time::sleep(Duration::from_millis(300)).await;
    println!("Phase after grace period:  {}", counter.phase());

    if let Some(rendered) = metrics.render() {
        println!("\n=== Metrics ===\n{rendered}");
    }

    Ok(())
}
