//! The effect queue: one-shot outputs, each delivered to exactly one reader.
//!
//! Effects are never replayed and never deduplicated. While nobody is
//! receiving, sent effects wait in a bounded buffer and are handed, in send
//! order, to whichever receiver asks first. Once taken, an effect is gone.

use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};

/// Bounded, at-most-once effect queue.
#[derive(Debug)]
pub struct EffectQueue<F> {
    sender: mpsc::Sender<F>,
    receiver: Arc<Mutex<mpsc::Receiver<F>>>,
}

impl<F> Clone for EffectQueue<F> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            receiver: Arc::clone(&self.receiver),
        }
    }
}

impl<F> EffectQueue<F> {
    /// Create a queue buffering up to `capacity` undelivered effects.
    ///
    /// A zero capacity is raised to one.
    #[must_use]
    pub fn bounded(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        Self {
            sender,
            receiver: Arc::new(Mutex::new(receiver)),
        }
    }

    /// Queue an effect, waiting for buffer space if the buffer is full.
    pub async fn send(&self, effect: F) {
        // The queue owns its receiver, so the channel cannot be closed.
        if self.sender.send(effect).await.is_err() {
            tracing::warn!("Effect queue closed, effect dropped");
        }
    }

    /// A new reader handle.
    #[must_use]
    pub fn receiver(&self) -> EffectReceiver<F> {
        EffectReceiver {
            receiver: Arc::clone(&self.receiver),
        }
    }

    /// Drop every buffered effect, returning how many were discarded.
    ///
    /// Returns 0 without draining if a reader is currently waiting.
    pub fn discard_buffered(&self) -> usize {
        let Ok(mut receiver) = self.receiver.try_lock() else {
            return 0;
        };
        let mut discarded = 0;
        while receiver.try_recv().is_ok() {
            discarded += 1;
        }
        discarded
    }

    /// Effects currently waiting for a reader.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    /// Maximum number of buffered effects.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.sender.max_capacity()
    }
}

/// Reader side of an [`EffectQueue`].
///
/// Several receivers may wait at once; each effect goes to exactly one of them.
#[derive(Debug)]
pub struct EffectReceiver<F> {
    receiver: Arc<Mutex<mpsc::Receiver<F>>>,
}

impl<F> EffectReceiver<F> {
    /// Take the next effect, waiting until one is sent.
    ///
    /// Cancel safe: dropping the future never loses an effect.
    pub async fn recv(&self) -> Option<F> {
        let mut receiver = self.receiver.lock().await;
        receiver.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_buffered_effects_drain_in_send_order() {
        let queue = EffectQueue::bounded(8);
        queue.send("first").await;
        queue.send("second").await;
        assert_eq!(queue.buffered(), 2);

        let receiver = queue.receiver();
        assert_eq!(receiver.recv().await, Some("first"));
        assert_eq!(receiver.recv().await, Some("second"));
        assert_eq!(queue.buffered(), 0);
    }

    #[tokio::test]
    async fn test_effect_delivered_to_only_one_receiver() {
        let queue = EffectQueue::bounded(8);
        queue.send(1).await;

        let first = queue.receiver();
        let second = queue.receiver();
        assert_eq!(first.recv().await, Some(1));

        let again = tokio::time::timeout(Duration::from_millis(20), second.recv()).await;
        assert!(again.is_err(), "effect must not be delivered twice");
    }

    #[tokio::test]
    async fn test_discard_buffered() {
        let queue = EffectQueue::bounded(4);
        queue.send('a').await;
        queue.send('b').await;

        assert_eq!(queue.discard_buffered(), 2);
        assert_eq!(queue.buffered(), 0);

        queue.send('c').await;
        assert_eq!(queue.receiver().recv().await, Some('c'));
    }

    #[tokio::test]
    async fn test_send_waits_for_space_when_full() {
        let queue = EffectQueue::bounded(1);
        queue.send(1).await;

        let blocked = tokio::time::timeout(Duration::from_millis(20), queue.send(2)).await;
        assert!(blocked.is_err(), "send should wait while the buffer is full");

        assert_eq!(queue.receiver().recv().await, Some(1));
        queue.send(3).await;
        assert_eq!(queue.receiver().recv().await, Some(3));
    }
}
