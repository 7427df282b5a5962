//! Stream plumbing shared by the pipeline stages: a terminal-status
//! handshake and a finite producer/consumer channel with an explicit done
//! marker.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use crossbeam_channel::{Receiver, Sender};

/// One-shot terminal status slot. The first `set` wins; `wait` blocks on a
/// condvar until the status lands and every later call observes the same
/// value.
pub struct Completion<E> {
    slot: Mutex<Option<Result<(), E>>>,
    ready: Condvar,
}

impl<E: Clone> Completion<E> {
    pub fn new() -> Self {
        Self { slot: Mutex::new(None), ready: Condvar::new() }
    }

    pub fn set(&self, result: Result<(), E>) {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_none() {
            *slot = Some(result);
            self.ready.notify_all();
        }
    }

    pub fn wait(&self) -> Result<(), E> {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        while slot.is_none() {
            slot = self.ready.wait(slot).unwrap_or_else(|e| e.into_inner());
        }
        slot.clone().unwrap_or(Ok(()))
    }

    pub fn try_get(&self) -> Option<Result<(), E>> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn is_set(&self) -> bool {
        self.slot.lock().unwrap_or_else(|e| e.into_inner()).is_some()
    }
}

impl<E: Clone> Default for Completion<E> {
    fn default() -> Self {
        Self::new()
    }
}

struct ChannelInner<T, E> {
    tx: Sender<T>,
    rx: Receiver<T>,
    done: AtomicBool,
    completion: Completion<E>,
}

/// Finite single-producer/single-consumer stream between two pipeline
/// stages. The producer pushes items and marks the stream done; the worker
/// drains items, re-checks the queue after observing the done marker, and
/// finishes the stream with a terminal status the producer can wait on.
///
/// The queue is dimensioned above any legal workload (the runs flowing
/// through it are finite); a push failure is a fatal invariant violation.
pub struct StreamChannel<T, E> {
    inner: Arc<ChannelInner<T, E>>,
}

impl<T, E> Clone for StreamChannel<T, E> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<T, E: Clone> StreamChannel<T, E> {
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self {
            inner: Arc::new(ChannelInner {
                tx,
                rx,
                done: AtomicBool::new(false),
                completion: Completion::new(),
            }),
        }
    }

    /// Enqueues one item. Fails only if the channel is broken, which callers
    /// treat as fatal.
    pub fn try_push(&self, item: T) -> Result<(), T> {
        self.inner.tx.send(item).map_err(|e| e.0)
    }

    /// Dequeues one item if any is ready.
    pub fn try_next(&self) -> Option<T> {
        self.inner.rx.try_recv().ok()
    }

    /// Marks the producer side done. Items already queued remain readable.
    pub fn mark_done(&self) {
        self.inner.done.store(true, Ordering::SeqCst);
    }

    pub fn is_marked_done(&self) -> bool {
        self.inner.done.load(Ordering::SeqCst)
    }

    /// Records the terminal status of the stream. First caller wins.
    pub fn finish(&self, result: Result<(), E>) {
        self.inner.completion.set(result);
    }

    pub fn is_finished(&self) -> bool {
        self.inner.completion.is_set()
    }

    pub fn try_result(&self) -> Option<Result<(), E>> {
        self.inner.completion.try_get()
    }

    /// Blocks until [`finish`](Self::finish) has been called.
    pub fn wait_result(&self) -> Result<(), E> {
        self.inner.completion.wait()
    }

    pub fn queued(&self) -> usize {
        self.inner.rx.len()
    }
}

impl<T, E: Clone> Default for StreamChannel<T, E> {
    fn default() -> Self {
        Self::new()
    }
}
