//! # Statepipe Testing
//!
//! Testing utilities and helpers for statepipe processors and pipelines.
//!
//! This crate provides:
//! - [`ProcessorTest`]: Given-When-Then harness for a processor in isolation
//! - [`RecordingObserver`]: observer that captures every callback
//! - Stream helpers with timeouts for pipeline-level tests
//!
//! ## Example
//!
//! ```ignore
//! use statepipe_testing::{RecordingObserver, helpers};
//!
//! #[tokio::test]
//! async fn test_counter_flow() {
//!     let observer = RecordingObserver::new();
//!     let pipeline = Pipeline::builder(CounterProcessor, || 0)
//!         .with_observer(observer.clone().shared())
//!         .build()
//!         .unwrap();
//!
//!     let mut state = pipeline.state();
//!     pipeline.submit(CounterEvent::Increment);
//!
//!     let states = helpers::collect_states(&mut state, 2).await;
//!     assert_eq!(states, vec![0, 1]);
//!     assert_eq!(observer.started(), 1);
//! }
//! ```


pub use processor_test::{ProcessorTest, assertions};

/// Observer implementations for tests.
pub mod mocks {
    use statepipe_core::{ErrorContext, PipelineError, PipelineObserver};
    use std::sync::{Arc, Mutex, PoisonError};

    #[derive(Debug)]
    struct Recorded<E, S, F> {
        events: Vec<E>,
        states: Vec<S>,
        effects: Vec<F>,
        errors: Vec<(String, ErrorContext)>,
        started: usize,
        stopped: usize,
    }

    /// Observer that records every callback for later assertions.
    ///
    /// Clones share the same recording.
    ///
    /// # Example
    ///
    /// ```
    /// use statepipe_core::{ErrorContext, PipelineError, PipelineObserver};
    /// use statepipe_testing::RecordingObserver;
    ///
    /// let observer = RecordingObserver::<u32, u32, ()>::new();
    /// observer.on_event("p", &7);
    /// observer.on_error("p", &PipelineError::Cancelled, &ErrorContext::Process);
    ///
    /// assert_eq!(observer.events(), vec![7]);
    /// assert_eq!(observer.errors().len(), 1);
    /// ```
    #[derive(Debug)]
    pub struct RecordingObserver<E, S, F> {
        recorded: Arc<Mutex<Recorded<E, S, F>>>,
    }

    impl<E, S, F> Clone for RecordingObserver<E, S, F> {
        fn clone(&self) -> Self {
            Self {
                recorded: Arc::clone(&self.recorded),
            }
        }
    }

    impl<E, S, F> Default for RecordingObserver<E, S, F> {
        fn default() -> Self {
            Self::new()
        }
    }

    impl<E, S, F> RecordingObserver<E, S, F> {
        /// Create an empty recording
        #[must_use]
        pub fn new() -> Self {
            Self {
                recorded: Arc::new(Mutex::new(Recorded {
                    events: Vec::new(),
                    states: Vec::new(),
                    effects: Vec::new(),
                    errors: Vec::new(),
                    started: 0,
                    stopped: 0,
                })),
            }
        }

        fn with<T>(&self, read: impl FnOnce(&mut Recorded<E, S, F>) -> T) -> T {
            read(&mut self.recorded.lock().unwrap_or_else(PoisonError::into_inner))
        }

        /// Number of activations seen
        #[must_use]
        pub fn started(&self) -> usize {
            self.with(|r| r.started)
        }

        /// Number of teardowns seen
        #[must_use]
        pub fn stopped(&self) -> usize {
            self.with(|r| r.stopped)
        }

        /// Reported errors, rendered, with their context
        #[must_use]
        pub fn errors(&self) -> Vec<(String, ErrorContext)> {
            self.with(|r| r.errors.clone())
        }
    }

    impl<E, S, F> RecordingObserver<E, S, F>
    where
        E: Clone + Send + 'static,
        S: Clone + Send + 'static,
        F: Clone + Send + 'static,
    {
        /// Type-erased handle for `PipelineBuilder::with_observer`
        #[must_use]
        pub fn shared(self) -> Arc<dyn PipelineObserver<E, S, F>> {
            Arc::new(self)
        }

        /// Events in the order the processor took them
        #[must_use]
        pub fn events(&self) -> Vec<E> {
            self.with(|r| r.events.clone())
        }

        /// Distinct states in update order
        #[must_use]
        pub fn states(&self) -> Vec<S> {
            self.with(|r| r.states.clone())
        }

        /// Effects in emission order
        #[must_use]
        pub fn effects(&self) -> Vec<F> {
            self.with(|r| r.effects.clone())
        }
    }

    impl<E, S, F> PipelineObserver<E, S, F> for RecordingObserver<E, S, F>
    where
        E: Clone + Send + 'static,
        S: Clone + Send + 'static,
        F: Clone + Send + 'static,
    {
        fn on_event(&self, _pipeline: &str, event: &E) {
            self.with(|r| r.events.push(event.clone()));
        }

        fn on_state_updated(&self, _pipeline: &str, state: &S) {
            self.with(|r| r.states.push(state.clone()));
        }

        fn on_effect(&self, _pipeline: &str, effect: &F) {
            self.with(|r| r.effects.push(effect.clone()));
        }

        fn on_pipeline_started(&self, _pipeline: &str) {
            self.with(|r| r.started += 1);
        }

        fn on_pipeline_stopped(&self, _pipeline: &str) {
            self.with(|r| r.stopped += 1);
        }

        fn on_error(&self, _pipeline: &str, error: &PipelineError, context: &ErrorContext) {
            self.with(|r| r.errors.push((error.to_string(), context.clone())));
        }
    }
}

/// Test helpers and utilities
pub mod helpers {
    use statepipe_runtime::{EffectStream, StateStream};
    use std::time::Duration;

    /// How long the collecting helpers wait for each value
    pub const DEFAULT_WAIT: Duration = Duration::from_secs(2);

    /// Next state, or `None` if nothing arrives within `wait`.
    pub async fn next_state_within<S>(stream: &mut StateStream<S>, wait: Duration) -> Option<S>
    where
        S: Clone + PartialEq + Send + Sync + 'static,
    {
        tokio::time::timeout(wait, stream.next()).await.ok().flatten()
    }

    /// Next effect, or `None` if nothing arrives within `wait`.
    pub async fn next_effect_within<F>(stream: &mut EffectStream<F>, wait: Duration) -> Option<F>
    where
        F: Send + 'static,
    {
        tokio::time::timeout(wait, stream.next()).await.ok().flatten()
    }

    /// Collect up to `count` states, stopping early after [`DEFAULT_WAIT`]
    /// of silence.
    pub async fn collect_states<S>(stream: &mut StateStream<S>, count: usize) -> Vec<S>
    where
        S: Clone + PartialEq + Send + Sync + 'static,
    {
        let mut collected = Vec::with_capacity(count);
        while collected.len() < count {
            match next_state_within(stream, DEFAULT_WAIT).await {
                Some(state) => collected.push(state),
                None => break,
            }
        }
        collected
    }

    /// Wait until a state satisfying `predicate` arrives.
    pub async fn wait_for_state<S, P>(stream: &mut StateStream<S>, predicate: P) -> Option<S>
    where
        S: Clone + PartialEq + Send + Sync + 'static,
        P: Fn(&S) -> bool,
    {
        loop {
            let state = next_state_within(stream, DEFAULT_WAIT).await?;
            if predicate(&state) {
                return Some(state);
            }
        }
    }

    /// Collect up to `count` effects, stopping early after [`DEFAULT_WAIT`]
    /// of silence.
    pub async fn collect_effects<F>(stream: &mut EffectStream<F>, count: usize) -> Vec<F>
    where
        F: Send + 'static,
    {
        let mut collected = Vec::with_capacity(count);
        while collected.len() < count {
            match next_effect_within(stream, DEFAULT_WAIT).await {
                Some(effect) => collected.push(effect),
                None => break,
            }
        }
        collected
    }

    /// Install a `tracing` subscriber honouring `RUST_LOG`, once per process.
    pub fn init_test_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }
}

// Re-export commonly used items
pub use mocks::RecordingObserver;
