//! Fair receive over a small set of queues.

use std::collections::BTreeSet;

use futures::future;
use futures::stream::{self, BoxStream, SelectAll, StreamExt};

use crate::queue::BoundedQueue;

/// What the multiplexer hands back for each wake-up.
#[derive(Debug, Clone, PartialEq)]
pub enum Signal<E> {
    /// An item drawn from one of the attached queues.
    Item(E),
    /// The named queue is closed and drained; it will not be polled again.
    Closed(&'static str),
}

/// Waits on several queues at once and yields whichever is ready first.
///
/// Sources that become ready together are serviced round-robin, so a busy
/// queue cannot starve a quieter one. Each source reports its closure exactly
/// once through [`Signal::Closed`]; after the last one closes,
/// [`next`](Self::next) returns `None`.
pub struct Multiplexer<E> {
    sources: SelectAll<BoxStream<'static, Signal<E>>>,
    open: BTreeSet<&'static str>,
}

impl<E: Send + 'static> Multiplexer<E> {
    pub fn new() -> Self {
        Self {
            sources: SelectAll::new(),
            open: BTreeSet::new(),
        }
    }

    /// Adds a queue, tagging each of its items with `wrap`.
    pub fn attach<T>(&mut self, name: &'static str, queue: BoundedQueue<T>, wrap: fn(T) -> E)
    where
        T: Send + 'static,
    {
        assert!(self.open.insert(name), "source `{name}` attached twice");

        let items = stream::unfold(queue, |queue| async move {
            queue.get().await.map(|item| (item, queue))
        })
        .map(move |item| Signal::Item(wrap(item)));
        let closed = stream::once(future::ready(Signal::Closed(name)));

        self.sources.push(items.chain(closed).boxed());
    }

    pub fn open_sources(&self) -> usize {
        self.open.len()
    }

    pub fn is_open(&self, name: &str) -> bool {
        self.open.contains(name)
    }

    /// Suspends until some source has an item or closes.
    pub async fn next(&mut self) -> Option<Signal<E>> {
        let signal = self.sources.next().await?;
        if let Signal::Closed(name) = &signal {
            self.open.remove(name);
        }
        Some(signal)
    }
}

impl<E: Send + 'static> Default for Multiplexer<E> {
    fn default() -> Self {
        Self::new()
    }
}
