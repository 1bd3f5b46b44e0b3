//! Pipeline graph construction and lifecycle.
//!
//! A graph is a set of named pools (the edges) and named stages (the nodes).
//! [`PipelineBuilder`] allocates every pool and instantiates every stage
//! processor up front; [`PipelineBuilder::start`] then launches all worker
//! threads at once. From then on the topology is fixed until
//! [`PipelineGraph::drain_and_close`], which broadcasts shutdown, joins every
//! worker and returns every object to its pool.

use crate::error::{PipelineError, Result};
use crate::stage::{spawn_workers, Processor, QueueRef, StageId, StageRuntime};
use parking_lot::Mutex;
use penc_core::{PoolStats, ResourcePool};
use std::any::Any;
use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

/// Edge (pool) identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EdgeId(pub &'static str);

impl EdgeId {
    /// Get the edge name.
    pub fn name(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

impl From<&'static str> for EdgeId {
    fn from(name: &'static str) -> Self {
        EdgeId(name)
    }
}

impl Borrow<str> for EdgeId {
    fn borrow(&self) -> &str {
        self.0
    }
}

/// Graph lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum GraphState {
    /// Workers are running.
    Running,
    /// Shutdown has been broadcast; workers are exiting.
    Stopping,
    /// A stage failed; the session has been shut down.
    Failed,
}

/// Type-erased view of a pool, enough to tear it down.
pub(crate) trait PoolControl: Send + Sync {
    fn shutdown(&self);
    fn drain(&self) -> usize;
    fn stats(&self) -> PoolStats;
    fn as_any(&self) -> &dyn Any;
}

impl<T: Send + 'static> PoolControl for ResourcePool<T> {
    fn shutdown(&self) {
        ResourcePool::shutdown(self);
    }

    fn drain(&self) -> usize {
        ResourcePool::drain(self)
    }

    fn stats(&self) -> PoolStats {
        ResourcePool::stats(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// State shared by every worker of a graph.
pub(crate) struct Control {
    pools: BTreeMap<EdgeId, Arc<dyn PoolControl>>,
    stopping: AtomicBool,
    failure: Mutex<Option<(StageId, String)>>,
}

impl Control {
    /// Broadcast shutdown to every pool.
    pub(crate) fn shutdown(&self) {
        if self.stopping.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("pipeline shutdown");
        for pool in self.pools.values() {
            pool.shutdown();
        }
    }

    /// Record a stage failure (the first one wins) and shut the session down.
    pub(crate) fn fail(&self, stage: StageId, message: String) {
        {
            let mut failure = self.failure.lock();
            if failure.is_none() {
                error!(stage = %stage, error = %message, "stage failed");
                *failure = Some((stage, message));
            } else {
                debug!(stage = %stage, error = %message, "further stage failure");
            }
        }
        self.shutdown();
    }

    fn failure(&self) -> Option<PipelineError> {
        self.failure
            .lock()
            .as_ref()
            .map(|(stage, message)| PipelineError::StageFailed {
                stage: stage.to_string(),
                message: message.clone(),
            })
    }
}

type Launch = Box<dyn FnOnce(&Arc<Control>, &mut Vec<JoinHandle<()>>) -> Result<()>>;

struct PendingStage {
    id: StageId,
    workers: usize,
    launch: Launch,
}

/// Builder for a [`PipelineGraph`].
#[derive(Default)]
pub struct PipelineBuilder {
    pools: BTreeMap<EdgeId, Arc<dyn PoolControl>>,
    stages: Vec<PendingStage>,
}

impl PipelineBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the pool behind edge `edge`.
    pub fn add_pool<T, F>(
        &mut self,
        edge: impl Into<EdgeId>,
        count: usize,
        consumers: usize,
        init: F,
    ) -> Result<ResourcePool<T>>
    where
        T: Send + 'static,
        F: FnMut(usize) -> T,
    {
        let edge = edge.into();
        self.ensure_new_edge(edge)?;
        let pool = ResourcePool::new(edge.name(), count, consumers, init)?;
        self.pools.insert(edge, Arc::new(pool.clone()));
        Ok(pool)
    }

    /// Like [`PipelineBuilder::add_pool`], with a hook run on every object
    /// returned to the free list (see [`ResourcePool::with_recycle`]).
    pub fn add_recycling_pool<T, F>(
        &mut self,
        edge: impl Into<EdgeId>,
        count: usize,
        consumers: usize,
        init: F,
        recycle: fn(&mut T),
    ) -> Result<ResourcePool<T>>
    where
        T: Send + 'static,
        F: FnMut(usize) -> T,
    {
        let edge = edge.into();
        self.ensure_new_edge(edge)?;
        let pool = ResourcePool::with_recycle(edge.name(), count, consumers, init, recycle)?;
        self.pools.insert(edge, Arc::new(pool.clone()));
        Ok(pool)
    }

    fn ensure_new_edge(&self, edge: EdgeId) -> Result<()> {
        if self.pools.contains_key(&edge) {
            return Err(PipelineError::InvalidConfig(format!("duplicate pool {edge}")));
        }
        Ok(())
    }

    /// Add a stage of `workers` threads consuming `input`.
    ///
    /// `factory` is called once per worker, with the worker index, to build
    /// that worker's processor.
    pub fn add_stage<T, P, F>(
        &mut self,
        id: impl Into<StageId>,
        input: QueueRef<T>,
        workers: usize,
        mut factory: F,
    ) -> Result<()>
    where
        T: Send + 'static,
        P: Processor<T> + 'static,
        F: FnMut(usize) -> P,
    {
        let id = id.into();
        if workers == 0 {
            return Err(PipelineError::InvalidConfig(format!("stage {id} needs at least one worker")));
        }
        if self.stages.iter().any(|s| s.id == id) {
            return Err(PipelineError::InvalidConfig(format!("duplicate stage {id}")));
        }
        let registered = self
            .pools
            .get(input.pool().name())
            .and_then(|pool| pool.as_any().downcast_ref::<ResourcePool<T>>());
        if !registered.is_some_and(|pool| pool.same_pool(input.pool())) {
            return Err(PipelineError::PoolNotFound(input.pool().name().to_string()));
        }
        if input.queue() >= input.pool().consumer_count() {
            return Err(PipelineError::InvalidConfig(format!(
                "stage {id} reads queue {} of {}, which has {} consumer queues",
                input.queue(),
                input.pool().name(),
                input.pool().consumer_count()
            )));
        }

        let processors: Vec<Box<dyn Processor<T>>> = (0..workers)
            .map(|worker| Box::new(factory(worker)) as Box<dyn Processor<T>>)
            .collect();

        self.stages.push(PendingStage {
            id,
            workers,
            launch: Box::new(move |control: &Arc<Control>, handles: &mut Vec<JoinHandle<()>>| {
                spawn_workers(id, input, processors, control, handles)
            }),
        });
        Ok(())
    }

    /// Launch every worker thread.
    pub fn start(self) -> Result<PipelineGraph> {
        let control = Arc::new(Control {
            pools: self.pools,
            stopping: AtomicBool::new(false),
            failure: Mutex::new(None),
        });

        let mut stages = BTreeMap::new();
        for pending in self.stages {
            let mut handles = Vec::with_capacity(pending.workers);
            let launched = (pending.launch)(&control, &mut handles);
            stages.insert(
                pending.id,
                StageRuntime {
                    id: pending.id,
                    workers: pending.workers,
                    handles,
                },
            );
            if let Err(e) = launched {
                error!(stage = %pending.id, error = %e, "stage launch failed");
                let mut graph = PipelineGraph {
                    control,
                    stages,
                    closed: false,
                };
                // Launch errors take precedence over anything the partial
                // session recorded.
                let _ = graph.teardown();
                return Err(e);
            }
            debug!(stage = %pending.id, workers = pending.workers, "stage started");
        }

        info!(
            stages = stages.len(),
            pools = control.pools.len(),
            "pipeline started"
        );
        Ok(PipelineGraph {
            control,
            stages,
            closed: false,
        })
    }
}

/// A running pipeline.
pub struct PipelineGraph {
    control: Arc<Control>,
    stages: BTreeMap<StageId, StageRuntime>,
    closed: bool,
}

impl PipelineGraph {
    /// Typed handle to the pool behind `edge`.
    pub fn pool<T: Send + 'static>(&self, edge: impl Into<EdgeId>) -> Result<ResourcePool<T>> {
        let edge = edge.into();
        let pool = self
            .control
            .pools
            .get(&edge)
            .ok_or_else(|| PipelineError::PoolNotFound(edge.to_string()))?;
        pool.as_any()
            .downcast_ref::<ResourcePool<T>>()
            .cloned()
            .ok_or_else(|| PipelineError::PoolTypeMismatch {
                edge: edge.to_string(),
                expected: std::any::type_name::<T>(),
            })
    }

    /// Usage counters of the pool behind `edge`.
    pub fn pool_stats(&self, edge: impl Into<EdgeId>) -> Result<PoolStats> {
        let edge = edge.into();
        self.control
            .pools
            .get(&edge)
            .map(|pool| pool.stats())
            .ok_or_else(|| PipelineError::PoolNotFound(edge.to_string()))
    }

    /// Number of workers running `stage`.
    pub fn stage_workers(&self, stage: impl Into<StageId>) -> Result<usize> {
        let stage = stage.into();
        self.stages
            .get(&stage)
            .map(|s| s.workers)
            .ok_or_else(|| PipelineError::StageNotFound(stage.to_string()))
    }

    /// Identifiers of every stage, sorted by name.
    pub fn stage_ids(&self) -> Vec<StageId> {
        self.stages.keys().copied().collect()
    }

    /// Identifiers of every pool, sorted by name.
    pub fn edge_ids(&self) -> Vec<EdgeId> {
        self.control.pools.keys().copied().collect()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> GraphState {
        if self.control.failure.lock().is_some() {
            GraphState::Failed
        } else if self.control.stopping.load(Ordering::Acquire) {
            GraphState::Stopping
        } else {
            GraphState::Running
        }
    }

    /// The first recorded stage failure, if any.
    pub fn failure(&self) -> Option<String> {
        self.control
            .failure
            .lock()
            .as_ref()
            .map(|(stage, message)| format!("{stage}: {message}"))
    }

    /// Fail with the recorded stage failure, if any.
    pub fn check(&self) -> Result<()> {
        match self.control.failure() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Broadcast shutdown: every blocked `acquire` and `dequeue` in the
    /// graph returns, and workers exit after their current input.
    pub fn shutdown(&self) {
        self.control.shutdown();
    }

    /// Shut down, join every worker and return every object to its pool.
    ///
    /// Returns the first stage failure of the session, if one occurred.
    pub fn drain_and_close(mut self) -> Result<()> {
        self.teardown()
    }

    fn teardown(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.control.shutdown();

        for stage in self.stages.values_mut() {
            for handle in stage.handles.drain(..) {
                if handle.join().is_err() {
                    self.control.fail(stage.id, "worker panicked".to_string());
                }
            }
            debug!(stage = %stage.id, "stage joined");
        }

        // Queued objects may hold handles into other pools, so every pool is
        // drained before any free list is checked.
        let recovered: Vec<usize> = self.control.pools.values().map(|pool| pool.drain()).collect();
        for ((edge, pool), recovered) in self.control.pools.iter().zip(recovered) {
            let stats = pool.stats();
            if stats.free != stats.capacity {
                warn!(
                    pool = %edge,
                    free = stats.free,
                    capacity = stats.capacity,
                    "pool objects still outstanding at close"
                );
            } else {
                debug!(pool = %edge, recovered, "pool drained");
            }
        }

        info!("pipeline closed");
        self.check()
    }
}

impl Drop for PipelineGraph {
    fn drop(&mut self) {
        let _ = self.teardown();
    }
}

impl fmt::Debug for PipelineGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineGraph")
            .field("stages", &self.stage_ids())
            .field("pools", &self.edge_ids())
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use penc_core::Resource;

    #[test]
    fn test_duplicate_pool_rejected() {
        let mut builder = PipelineBuilder::new();
        builder.add_pool("a", 1, 1, |_| 0u8).unwrap();
        assert!(matches!(
            builder.add_pool("a", 1, 1, |_| 0u8),
            Err(PipelineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_stage_validation() {
        let mut builder = PipelineBuilder::new();
        let pool = builder.add_pool("in", 1, 1, |_| 0u8).unwrap();
        let sink = |_: Resource<u8>| -> Result<()> { Ok(()) };

        assert!(matches!(
            builder.add_stage("zero", QueueRef::from(&pool), 0, |_| sink),
            Err(PipelineError::InvalidConfig(_))
        ));
        assert!(matches!(
            builder.add_stage("bad-queue", QueueRef::new(&pool, 1), 1, |_| sink),
            Err(PipelineError::InvalidConfig(_))
        ));

        let foreign = ResourcePool::new("foreign", 1, 1, |_| 0u8).unwrap();
        assert!(matches!(
            builder.add_stage("foreign", QueueRef::from(&foreign), 1, |_| sink),
            Err(PipelineError::PoolNotFound(_))
        ));

        let impostor = ResourcePool::new("in", 1, 1, |_| 0u8).unwrap();
        assert!(matches!(
            builder.add_stage("impostor", QueueRef::from(&impostor), 1, |_| sink),
            Err(PipelineError::PoolNotFound(_))
        ));

        builder.add_stage("sink", QueueRef::from(&pool), 1, |_| sink).unwrap();
        assert!(matches!(
            builder.add_stage("sink", QueueRef::from(&pool), 1, |_| sink),
            Err(PipelineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_empty_graph_lifecycle() {
        let mut builder = PipelineBuilder::new();
        builder.add_pool("only", 2, 1, |i| i).unwrap();
        let graph = builder.start().unwrap();

        assert_eq!(graph.state(), GraphState::Running);
        assert!(graph.stage_ids().is_empty());
        assert_eq!(graph.edge_ids(), vec![EdgeId("only")]);
        graph.shutdown();
        assert_eq!(graph.state(), GraphState::Stopping);
        graph.drain_and_close().unwrap();
    }
}
