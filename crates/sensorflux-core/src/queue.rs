//! Fixed-capacity FIFO channel shared by every stage of the pipeline.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tracing::debug;

/// A bounded, multi-producer multi-consumer queue with an explicit close.
///
/// `put` suspends while the queue is full and `get` suspends while it is empty
/// and still open. After [`close`](Self::close), `get` keeps handing out the
/// buffered items and then returns `None` on every subsequent call. Calling
/// `put` on a closed queue is a programming error and panics.
///
/// Handles are cheap to clone; every clone refers to the same buffer.
pub struct BoundedQueue<T> {
    inner: Arc<Inner<T>>,
}

struct Inner<T> {
    name: Arc<str>,
    capacity: usize,
    // `None` once closed. In-flight puts hold their own sender clone, so the
    // channel only reports end-of-stream after they land.
    sender: Mutex<Option<mpsc::Sender<T>>>,
    receiver: AsyncMutex<mpsc::Receiver<T>>,
}

impl<T> BoundedQueue<T> {
    pub fn new(name: impl Into<Arc<str>>, capacity: usize) -> Self {
        let name = name.into();
        assert!(capacity > 0, "queue `{name}` needs a non-zero capacity");

        let (sender, receiver) = mpsc::channel(capacity);
        Self {
            inner: Arc::new(Inner {
                name,
                capacity,
                sender: Mutex::new(Some(sender)),
                receiver: AsyncMutex::new(receiver),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn is_closed(&self) -> bool {
        self.inner
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Appends `item`, waiting for free space if the queue is full.
    ///
    /// # Panics
    ///
    /// Panics if the queue has already been closed.
    pub async fn put(&self, item: T) {
        let sender = {
            let guard = self
                .inner
                .sender
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            match guard.as_ref() {
                Some(sender) => sender.clone(),
                None => panic!("put on closed queue `{}`", self.inner.name),
            }
        };

        if sender.send(item).await.is_err() {
            // The receiver lives as long as `inner`, which we are borrowing.
            unreachable!("receiver of queue `{}` dropped", self.inner.name);
        }
    }

    /// Removes the oldest item, waiting while the queue is empty and open.
    ///
    /// Returns `None` once the queue is closed and fully drained.
    pub async fn get(&self) -> Option<T> {
        let mut receiver = self.inner.receiver.lock().await;
        receiver.recv().await
    }

    /// Signals that no further items will be put.
    ///
    /// Returns `true` for the call that actually closed the queue and `false`
    /// for any later call.
    pub fn close(&self) -> bool {
        let closed = self
            .inner
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some();
        if closed {
            debug!(queue = %self.inner.name, "queue closed");
        }
        closed
    }
}

impl<T> Clone for BoundedQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for BoundedQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedQueue")
            .field("name", &self.inner.name)
            .field("capacity", &self.inner.capacity)
            .field("closed", &self.is_closed())
            .finish()
    }
}
