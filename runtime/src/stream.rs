//! Subscriber handles for a pipeline's state and effects.
//!
//! Each handle counts as one subscriber for as long as it lives. Dropping it
//! is the only way to unsubscribe.

use crate::lifecycle::SubscriberGuard;
use futures::Stream;
use statepipe_core::{EffectReceiver, StateWatcher};

/// A subscription to a pipeline's state.
///
/// The first value is the state current at subscription time. After that,
/// every value differs from the one before it.
#[derive(Debug)]
pub struct StateStream<S> {
    watcher: StateWatcher<S>,
    _guard: SubscriberGuard,
}

impl<S> StateStream<S>
where
    S: Clone + PartialEq + Send + Sync + 'static,
{
    pub(crate) fn new(watcher: StateWatcher<S>, guard: SubscriberGuard) -> Self {
        Self {
            watcher,
            _guard: guard,
        }
    }

    /// Wait for the next distinct state.
    ///
    /// Returns `None` only once the pipeline itself is gone.
    pub async fn next(&mut self) -> Option<S> {
        self.watcher.recv().await
    }

    /// Adapt into a [`Stream`] for use with `futures` combinators.
    pub fn into_stream(self) -> impl Stream<Item = S> + Send {
        let mut this = self;
        async_stream::stream! {
            while let Some(state) = this.next().await {
                yield state;
            }
        }
    }
}

/// A subscription to a pipeline's effects.
///
/// Each effect is delivered to exactly one effect subscriber. Effects emitted
/// while nobody was receiving are handed out first, in emission order.
#[derive(Debug)]
pub struct EffectStream<F> {
    receiver: EffectReceiver<F>,
    _guard: SubscriberGuard,
}

impl<F> EffectStream<F>
where
    F: Send + 'static,
{
    pub(crate) fn new(receiver: EffectReceiver<F>, guard: SubscriberGuard) -> Self {
        Self {
            receiver,
            _guard: guard,
        }
    }

    /// Wait for the next effect.
    pub async fn next(&mut self) -> Option<F> {
        self.receiver.recv().await
    }

    /// Adapt into a [`Stream`] for use with `futures` combinators.
    pub fn into_stream(self) -> impl Stream<Item = F> + Send {
        let mut this = self;
        async_stream::stream! {
            while let Some(effect) = this.next().await {
                yield effect;
            }
        }
    }
}
