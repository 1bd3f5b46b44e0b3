//! Stage workers.
//!
//! A stage is a named group of identical worker threads that all consume the
//! same input queue. Each worker runs the same loop: dequeue one resource,
//! hand it to its [`Processor`], repeat. Workers of one stage share nothing
//! but the input queue, so results may leave a parallel stage in any order.

use crate::error::{PipelineError, Result};
use crate::graph::Control;
use penc_core::{Resource, ResourcePool};
use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, trace};

/// Stage identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StageId(pub &'static str);

impl StageId {
    /// Get the stage name.
    pub fn name(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

impl From<&'static str> for StageId {
    fn from(name: &'static str) -> Self {
        StageId(name)
    }
}

/// Per-input work of a stage.
///
/// The processor owns the input resource for the duration of the call and
/// must either release it or pass it on. Returning
/// [`penc_core::Error::Shutdown`] (from a blocking `acquire`, for example)
/// ends the worker quietly; any other error fails the whole session.
pub trait Processor<T>: Send {
    /// Handle one input.
    fn process(&mut self, input: Resource<T>) -> Result<()>;
}

impl<T, F> Processor<T> for F
where
    F: FnMut(Resource<T>) -> Result<()> + Send,
{
    fn process(&mut self, input: Resource<T>) -> Result<()> {
        self(input)
    }
}

/// A consumer queue of a pool, the input of a stage.
pub struct QueueRef<T> {
    pool: ResourcePool<T>,
    queue: usize,
}

impl<T> QueueRef<T> {
    /// Refer to consumer queue `queue` of `pool`.
    pub fn new(pool: &ResourcePool<T>, queue: usize) -> Self {
        Self {
            pool: pool.clone(),
            queue,
        }
    }

    /// The pool feeding this queue.
    pub fn pool(&self) -> &ResourcePool<T> {
        &self.pool
    }

    /// Consumer queue index.
    pub fn queue(&self) -> usize {
        self.queue
    }

    fn dequeue(&self) -> penc_core::Result<Resource<T>> {
        self.pool.dequeue(self.queue)
    }
}

impl<T> Clone for QueueRef<T> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            queue: self.queue,
        }
    }
}

impl<T> From<&ResourcePool<T>> for QueueRef<T> {
    fn from(pool: &ResourcePool<T>) -> Self {
        QueueRef::new(pool, 0)
    }
}

/// Running stage: its worker threads.
pub(crate) struct StageRuntime {
    pub(crate) id: StageId,
    pub(crate) workers: usize,
    pub(crate) handles: Vec<JoinHandle<()>>,
}

/// Reports the failure of a worker that unwinds out of its processor.
struct PanicGuard {
    stage: StageId,
    control: Arc<Control>,
}

impl Drop for PanicGuard {
    fn drop(&mut self) {
        if thread::panicking() {
            self.control.fail(self.stage, "worker panicked".to_string());
        }
    }
}

fn run_worker<T>(
    stage: StageId,
    worker: usize,
    input: QueueRef<T>,
    mut processor: Box<dyn Processor<T>>,
    control: Arc<Control>,
) {
    let _guard = PanicGuard {
        stage,
        control: Arc::clone(&control),
    };
    debug!(stage = %stage, worker, "worker started");

    let mut processed = 0u64;
    loop {
        let item = match input.dequeue() {
            Ok(item) => item,
            Err(e) if e.is_shutdown() => break,
            Err(e) => {
                control.fail(stage, e.to_string());
                break;
            }
        };

        trace!(stage = %stage, worker, index = item.index(), "process");
        match processor.process(item) {
            Ok(()) => processed += 1,
            Err(e) if e.is_shutdown() => break,
            Err(e) => {
                control.fail(stage, e.to_string());
                break;
            }
        }
    }

    debug!(stage = %stage, worker, processed, "worker stopped");
}

/// Spawn `processors.len()` workers of one stage.
///
/// On a spawn failure the workers already started are left running; the
/// caller shuts the session down and joins them.
pub(crate) fn spawn_workers<T: Send + 'static>(
    stage: StageId,
    input: QueueRef<T>,
    processors: Vec<Box<dyn Processor<T>>>,
    control: &Arc<Control>,
    handles: &mut Vec<JoinHandle<()>>,
) -> Result<()> {
    for (worker, processor) in processors.into_iter().enumerate() {
        let input = input.clone();
        let control = Arc::clone(control);
        let handle = thread::Builder::new()
            .name(format!("{stage}-{worker}"))
            .spawn(move || run_worker(stage, worker, input, processor, control))
            .map_err(|source| PipelineError::Spawn {
                stage: stage.to_string(),
                source,
            })?;
        handles.push(handle);
    }
    Ok(())
}
