//! The state cell: one current value, atomic updates, replay-latest readers.
//!
//! A [`StateCell`] always holds a valid state. Updates are whole-value
//! replacements applied through a single serialization point, and a new value
//! that compares equal to the current one is dropped without waking readers.
//!
//! # Example
//!
//! ```
//! use statepipe_core::state::StateCell;
//!
//! # tokio_test::block_on(async {
//! let cell = StateCell::new(0_u32);
//! let mut watcher = cell.watch();
//!
//! assert_eq!(watcher.recv().await, Some(0)); // replay of the latest value
//!
//! assert_eq!(cell.update(|n| n + 1), Some(1));
//! assert_eq!(cell.update(|n| *n), None); // equal value, deduplicated
//!
//! assert_eq!(watcher.recv().await, Some(1));
//! # });
//! ```

use std::sync::Arc;
use tokio::sync::watch;

/// Holder of a pipeline's current state.
///
/// Cloning a `StateCell` yields another handle to the same value.
#[derive(Debug)]
pub struct StateCell<S> {
    sender: Arc<watch::Sender<S>>,
}

impl<S> Clone for StateCell<S> {
    fn clone(&self) -> Self {
        Self {
            sender: Arc::clone(&self.sender),
        }
    }
}

impl<S> StateCell<S>
where
    S: Clone + PartialEq,
{
    /// Create a cell holding `initial`.
    #[must_use]
    pub fn new(initial: S) -> Self {
        let (sender, _) = watch::channel(initial);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Snapshot of the current value.
    #[must_use]
    pub fn current(&self) -> S {
        self.sender.borrow().clone()
    }

    /// Atomically replace the state with `f(current)`.
    ///
    /// Returns the new value if it differs from the previous one, `None` if
    /// the update was deduplicated. Concurrent callers are serialized; no
    /// update is ever computed from a stale value.
    pub fn update<F>(&self, f: F) -> Option<S>
    where
        F: FnOnce(&S) -> S,
    {
        let mut applied = None;
        self.sender.send_if_modified(|current| {
            let next = f(current);
            if next == *current {
                false
            } else {
                *current = next;
                applied = Some(current.clone());
                true
            }
        });
        applied
    }

    /// Start observing the cell.
    ///
    /// The first [`StateWatcher::recv`] yields the latest value immediately;
    /// later calls yield each distinct subsequent value.
    #[must_use]
    pub fn watch(&self) -> StateWatcher<S> {
        StateWatcher {
            receiver: self.sender.subscribe(),
            last: None,
            primed: false,
        }
    }

    /// Number of live watchers.
    #[must_use]
    pub fn watcher_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Reader side of a [`StateCell`].
///
/// Slow readers may skip intermediate values, but never observe an older
/// value after a newer one and never see the same value twice in a row.
#[derive(Debug)]
pub struct StateWatcher<S> {
    receiver: watch::Receiver<S>,
    last: Option<S>,
    primed: bool,
}

impl<S> StateWatcher<S>
where
    S: Clone + PartialEq,
{
    /// Wait for the next distinct value.
    ///
    /// Returns `None` once every handle to the cell has been dropped.
    pub async fn recv(&mut self) -> Option<S> {
        loop {
            if self.primed {
                self.receiver.changed().await.ok()?;
            }
            self.primed = true;

            let value = self.receiver.borrow_and_update().clone();
            if self.last.as_ref() == Some(&value) {
                continue;
            }
            self.last = Some(value.clone());
            return Some(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_initial_replay_is_latest_value() {
        let cell = StateCell::new(1);
        cell.update(|n| n + 1);
        cell.update(|n| n + 1);

        let mut watcher = cell.watch();
        assert_eq!(watcher.recv().await, Some(3));
    }

    #[tokio::test]
    async fn test_equal_update_does_not_wake_watchers() {
        let cell = StateCell::new(String::from("same"));
        let mut watcher = cell.watch();
        assert_eq!(watcher.recv().await.as_deref(), Some("same"));

        assert!(cell.update(|_| String::from("same")).is_none());

        let woke = tokio::time::timeout(Duration::from_millis(20), watcher.recv()).await;
        assert!(woke.is_err(), "watcher should not see a duplicate value");
    }

    #[tokio::test]
    async fn test_watcher_skips_value_equal_to_last_seen() {
        let cell = StateCell::new(0);
        let mut watcher = cell.watch();
        assert_eq!(watcher.recv().await, Some(0));

        // Changes and reverts before the watcher looks again
        cell.update(|_| 5);
        cell.update(|_| 0);
        cell.update(|_| 9);

        assert_eq!(watcher.recv().await, Some(9));
    }

    #[tokio::test]
    async fn test_concurrent_updates_are_atomic() {
        let cell = StateCell::new(0_u64);
        let handles: Vec<_> = (0..50)
            .map(|_| {
                let cell = cell.clone();
                tokio::spawn(async move {
                    for _ in 0..20 {
                        cell.update(|n| n + 1);
                    }
                })
            })
            .collect();

        for handle in handles {
            assert!(handle.await.is_ok());
        }
        assert_eq!(cell.current(), 1000);
    }

    #[tokio::test]
    async fn test_watcher_ends_when_cell_dropped() {
        let cell = StateCell::new(1);
        let mut watcher = cell.watch();
        assert_eq!(watcher.recv().await, Some(1));
        drop(cell);
        assert_eq!(watcher.recv().await, None);
    }

    proptest! {
        #[test]
        fn prop_update_reports_change_iff_value_differs(start in 0_i32..10, next in 0_i32..10) {
            let cell = StateCell::new(start);
            let applied = cell.update(|_| next);
            prop_assert_eq!(applied.is_some(), start != next);
            prop_assert_eq!(cell.current(), next);
        }
    }
}
