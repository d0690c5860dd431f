//! Event intake: ordered, unbounded, multi-producer / single-consumer.
//!
//! Submitting never blocks and never fails, whether or not anything is
//! draining. The consumer side is borrowed for one activation at a time via
//! [`EventIngress::drain`]; events left in the queue when a drain is released
//! are picked up by the next one.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Mutex, OwnedMutexGuard, mpsc};

/// Intake queue for a pipeline's events.
#[derive(Debug)]
pub struct EventIngress<E> {
    sender: mpsc::UnboundedSender<E>,
    receiver: Arc<Mutex<mpsc::UnboundedReceiver<E>>>,
    queued: Arc<AtomicUsize>,
}

impl<E> Clone for EventIngress<E> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            receiver: Arc::clone(&self.receiver),
            queued: Arc::clone(&self.queued),
        }
    }
}

impl<E> Default for EventIngress<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> EventIngress<E> {
    /// Create an empty ingress.
    #[must_use]
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Arc::new(Mutex::new(receiver)),
            queued: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Enqueue an event.
    pub fn submit(&self, event: E) {
        self.queued.fetch_add(1, Ordering::AcqRel);
        if self.sender.send(event).is_err() {
            // Unreachable while `self` holds the receiver
            self.queued.fetch_sub(1, Ordering::AcqRel);
            tracing::warn!("Event ingress closed, event dropped");
        }
    }

    /// Events accepted but not yet taken by a drain.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::Acquire)
    }

    /// Take exclusive ownership of the consumer side.
    ///
    /// Waits while another drain is alive.
    pub async fn drain(&self) -> IngressDrain<E> {
        IngressDrain {
            receiver: Arc::clone(&self.receiver).lock_owned().await,
            queued: Arc::clone(&self.queued),
        }
    }
}

/// Exclusive consumer of an [`EventIngress`], released on drop.
#[derive(Debug)]
pub struct IngressDrain<E> {
    receiver: OwnedMutexGuard<mpsc::UnboundedReceiver<E>>,
    queued: Arc<AtomicUsize>,
}

impl<E> IngressDrain<E> {
    /// Next event in submission order. Cancel safe.
    pub async fn recv(&mut self) -> Option<E> {
        let event = self.receiver.recv().await;
        if event.is_some() {
            self.queued.fetch_sub(1, Ordering::AcqRel);
        }
        event
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_events_submitted_before_drain_are_kept() {
        let ingress = EventIngress::new();
        ingress.submit(1);
        ingress.submit(2);
        assert_eq!(ingress.queued(), 2);

        let mut drain = ingress.drain().await;
        assert_eq!(drain.recv().await, Some(1));
        assert_eq!(drain.recv().await, Some(2));
        assert_eq!(ingress.queued(), 0);
    }

    #[tokio::test]
    async fn test_released_drain_resumes_in_next() {
        let ingress = EventIngress::new();
        for n in 0..3 {
            ingress.submit(n);
        }

        {
            let mut drain = ingress.drain().await;
            assert_eq!(drain.recv().await, Some(0));
        }

        let mut drain = ingress.drain().await;
        assert_eq!(drain.recv().await, Some(1));
        assert_eq!(drain.recv().await, Some(2));
    }

    #[tokio::test]
    async fn test_second_drain_waits_for_first() {
        let ingress: EventIngress<u8> = EventIngress::new();
        let first = ingress.drain().await;

        let second = tokio::time::timeout(Duration::from_millis(20), ingress.drain()).await;
        assert!(second.is_err());

        drop(first);
        let second = tokio::time::timeout(Duration::from_millis(20), ingress.drain()).await;
        assert!(second.is_ok());
    }
}
