//! Blocking FIFO used for every pipeline edge.
//!
//! The capacity of a queue equals the object count of the pool that feeds
//! it, so [`BoundedQueue::push`] never has to wait: backpressure is applied
//! when a producer acquires from an exhausted pool, not here.

use crate::error::{Error, Result};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;

struct QueueState<T> {
    items: VecDeque<T>,
    shutdown: bool,
}

/// A capacity-bounded, blocking FIFO queue.
pub struct BoundedQueue<T> {
    name: String,
    capacity: usize,
    state: Mutex<QueueState<T>>,
    not_empty: Condvar,
}

impl<T> BoundedQueue<T> {
    /// Create a new queue able to hold `capacity` items.
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        Self {
            name: name.into(),
            capacity,
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity),
                shutdown: false,
            }),
            not_empty: Condvar::new(),
        }
    }

    /// Get the queue name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the maximum number of items the queue can hold.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append an item to the tail and wake one waiting consumer.
    ///
    /// Accepted even after shutdown so that objects returned during drain
    /// are not lost.
    pub fn push(&self, item: T) {
        let mut state = self.state.lock();
        debug_assert!(
            state.items.len() < self.capacity,
            "queue {} overflowed its capacity of {}",
            self.name,
            self.capacity
        );
        state.items.push_back(item);
        drop(state);
        self.not_empty.notify_one();
    }

    /// Remove the head item, blocking until one is available.
    ///
    /// Returns [`Error::Shutdown`] once the queue has been shut down, even
    /// if items remain; those are recovered by [`BoundedQueue::drain`].
    pub fn pop(&self) -> Result<T> {
        let mut state = self.state.lock();
        loop {
            if state.shutdown {
                return Err(Error::Shutdown);
            }
            if let Some(item) = state.items.pop_front() {
                return Ok(item);
            }
            self.not_empty.wait(&mut state);
        }
    }

    /// Like [`BoundedQueue::pop`], reporting whether the caller had to wait.
    pub(crate) fn pop_counting_wait(&self) -> Result<(T, bool)> {
        let mut state = self.state.lock();
        let mut waited = false;
        loop {
            if state.shutdown {
                return Err(Error::Shutdown);
            }
            if let Some(item) = state.items.pop_front() {
                return Ok((item, waited));
            }
            waited = true;
            self.not_empty.wait(&mut state);
        }
    }

    /// Remove the head item without blocking.
    pub fn try_pop(&self) -> Option<T> {
        let mut state = self.state.lock();
        if state.shutdown {
            return None;
        }
        state.items.pop_front()
    }

    /// Number of queued items.
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Check if the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }

    /// Broadcast shutdown: every blocked and future `pop` returns
    /// [`Error::Shutdown`].
    pub fn shutdown(&self) {
        self.state.lock().shutdown = true;
        self.not_empty.notify_all();
    }

    /// Check if the queue has been shut down.
    pub fn is_shutdown(&self) -> bool {
        self.state.lock().shutdown
    }

    /// Remove every queued item regardless of the shutdown flag.
    pub fn drain(&self) -> Vec<T> {
        self.state.lock().items.drain(..).collect()
    }
}

impl<T> std::fmt::Debug for BoundedQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("BoundedQueue")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("len", &state.items.len())
            .field("shutdown", &state.shutdown)
            .finish()
    }
}
