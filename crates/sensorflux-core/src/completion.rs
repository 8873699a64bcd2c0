//! Completion counting for queues fed by several producers.

use std::pin::pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

/// Counts down from the number of producers sharing an output.
///
/// Each producer calls [`arrive`](Self::arrive) exactly once when it exits.
/// The caller that takes the count to zero gets `true` back, and every task
/// parked in [`wait`](Self::wait) is released.
#[derive(Debug, Clone)]
pub struct CompletionCounter {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    label: &'static str,
    remaining: AtomicUsize,
    finished: Notify,
}

impl CompletionCounter {
    pub fn new(label: &'static str, producers: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                label,
                remaining: AtomicUsize::new(producers),
                finished: Notify::new(),
            }),
        }
    }

    pub fn label(&self) -> &'static str {
        self.inner.label
    }

    pub fn remaining(&self) -> usize {
        self.inner.remaining.load(Ordering::Acquire)
    }

    pub fn is_finished(&self) -> bool {
        self.remaining() == 0
    }

    /// Records one producer exit. Returns `true` for the last one.
    ///
    /// # Panics
    ///
    /// Panics if called more times than the counter was initialised with.
    pub fn arrive(&self) -> bool {
        let previous = self
            .inner
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .unwrap_or_else(|_| {
                panic!(
                    "completion counter `{}` arrived more often than it has producers",
                    self.inner.label
                )
            });

        if previous == 1 {
            self.inner.finished.notify_waiters();
            true
        } else {
            false
        }
    }

    /// Hands out a guard that arrives when dropped.
    pub fn guard(&self) -> CompletionGuard {
        CompletionGuard {
            counter: self.clone(),
        }
    }

    /// Suspends until every producer has arrived.
    pub async fn wait(&self) {
        loop {
            let mut notified = pin!(self.inner.finished.notified());
            // Register before checking so a concurrent final arrive is not missed.
            notified.as_mut().enable();
            if self.is_finished() {
                return;
            }
            notified.await;
        }
    }
}

/// Arrives on its counter when dropped, including during unwinding.
#[derive(Debug)]
pub struct CompletionGuard {
    counter: CompletionCounter,
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        self.counter.arrive();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_last_arrival_reports_completion() {
        let counter = CompletionCounter::new("workers", 3);
        assert!(!counter.arrive());
        assert!(!counter.arrive());
        assert!(counter.arrive());
        assert!(counter.is_finished());
    }

    #[test]
    #[should_panic(expected = "arrived more often")]
    fn over_arrival_panics() {
        let counter = CompletionCounter::new("workers", 1);
        counter.arrive();
        counter.arrive();
    }

    #[tokio::test]
    async fn wait_returns_after_guards_drop() {
        let counter = CompletionCounter::new("workers", 4);
        let guards: Vec<_> = (0..4).map(|_| counter.guard()).collect();

        let waiter = tokio::spawn({
            let counter = counter.clone();
            async move { counter.wait().await }
        });

        for guard in guards {
            tokio::task::yield_now().await;
            drop(guard);
        }

        waiter.await.unwrap();
        assert_eq!(counter.remaining(), 0);
    }

    #[tokio::test]
    async fn wait_on_finished_counter_is_immediate() {
        let counter = CompletionCounter::new("nobody", 0);
        counter.wait().await;
    }
}
