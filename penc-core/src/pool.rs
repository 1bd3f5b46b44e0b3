//! Fixed-count resource pools.
//!
//! A [`ResourcePool`] allocates all of its objects once, at creation, and
//! never grows or shrinks. Producers take objects with
//! [`ResourcePool::acquire`], which blocks while every object is in flight;
//! this is the only flow control in the encoder. Filled objects travel to
//! consumers through the pool's consumer queues and come back to the free
//! list when the last holder releases (or drops) its [`Resource`] handle.
//!
//! An object is always in exactly one place: the free list, a consumer
//! queue, or the hands of a single worker.

use crate::error::{Error, Result};
use crate::queue::BoundedQueue;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

/// An object parked on the free list.
struct Slot<T> {
    index: usize,
    object: Box<T>,
}

struct PoolShared<T> {
    name: String,
    capacity: usize,
    free: BoundedQueue<Slot<T>>,
    consumers: Vec<BoundedQueue<Resource<T>>>,
    acquisitions: AtomicU64,
    waits: AtomicU64,
    recycle: Option<fn(&mut T)>,
}

impl<T> PoolShared<T> {
    fn give_back(&self, mut slot: Slot<T>) {
        if let Some(recycle) = self.recycle {
            recycle(&mut slot.object);
        }
        trace!(pool = %self.name, index = slot.index, "release");
        self.free.push(slot);
    }
}

/// Statistics about pool usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Total objects owned by the pool.
    pub capacity: usize,
    /// Objects currently on the free list.
    pub free: usize,
    /// Objects waiting on consumer queues.
    pub queued: usize,
    /// Objects acquired and not yet released (queued ones included).
    pub outstanding: usize,
    /// Total number of successful acquisitions.
    pub acquisitions: u64,
    /// Acquisitions that had to wait for an object.
    pub waits: u64,
}

impl PoolStats {
    /// Objects held by workers, neither free nor queued.
    pub fn in_processing(&self) -> usize {
        self.outstanding.saturating_sub(self.queued)
    }
}

/// Exclusive handle to one pool-owned object.
///
/// The handle dereferences to the payload. Releasing it (explicitly with
/// [`Resource::release`] or implicitly on drop) returns the object to its
/// pool and wakes one blocked `acquire`. Because release consumes the
/// handle, an object cannot be released twice or touched afterwards.
pub struct Resource<T> {
    index: usize,
    object: Option<Box<T>>,
    pool: Arc<PoolShared<T>>,
}

impl<T> Resource<T> {
    /// Index of the object within its pool, stable for the pool's lifetime.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Name of the owning pool.
    pub fn pool_name(&self) -> &str {
        &self.pool.name
    }

    /// Return the object to its pool.
    pub fn release(self) {
        drop(self);
    }
}

impl<T> Deref for Resource<T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.object.as_deref().expect("resource object present until drop")
    }
}

impl<T> DerefMut for Resource<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.object.as_deref_mut().expect("resource object present until drop")
    }
}

impl<T> Drop for Resource<T> {
    fn drop(&mut self) {
        if let Some(object) = self.object.take() {
            self.pool.give_back(Slot {
                index: self.index,
                object,
            });
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Resource<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resource")
            .field("pool", &self.pool.name)
            .field("index", &self.index)
            .field("object", &self.object)
            .finish()
    }
}

/// A fixed-count pool of reusable objects with its consumer queues.
pub struct ResourcePool<T> {
    shared: Arc<PoolShared<T>>,
}

impl<T> Clone for ResourcePool<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> ResourcePool<T> {
    /// Create a pool of `count` objects built by `init`, with
    /// `consumer_count` consumer queues of capacity `count` each.
    pub fn new<F>(name: impl Into<String>, count: usize, consumer_count: usize, init: F) -> Result<Self>
    where
        F: FnMut(usize) -> T,
    {
        Self::build(name.into(), count, consumer_count, init, None)
    }

    /// Like [`ResourcePool::new`], running `recycle` on every object as it
    /// returns to the free list.
    ///
    /// Payloads that carry handles into other pools use this to let go of
    /// them, so that draining one pool also returns what its objects held.
    pub fn with_recycle<F>(
        name: impl Into<String>,
        count: usize,
        consumer_count: usize,
        init: F,
        recycle: fn(&mut T),
    ) -> Result<Self>
    where
        F: FnMut(usize) -> T,
    {
        Self::build(name.into(), count, consumer_count, init, Some(recycle))
    }

    fn build<F>(
        name: String,
        count: usize,
        consumer_count: usize,
        mut init: F,
        recycle: Option<fn(&mut T)>,
    ) -> Result<Self>
    where
        F: FnMut(usize) -> T,
    {
        if count == 0 {
            return Err(Error::InvalidParameter(format!(
                "pool {name} needs at least one object"
            )));
        }
        if consumer_count == 0 {
            return Err(Error::InvalidParameter(format!(
                "pool {name} needs at least one consumer queue"
            )));
        }

        let free = BoundedQueue::new(format!("{name}.free"), count);
        for index in 0..count {
            free.push(Slot {
                index,
                object: Box::new(init(index)),
            });
        }
        let consumers = (0..consumer_count)
            .map(|i| BoundedQueue::new(format!("{name}.consumer{i}"), count))
            .collect();

        debug!(pool = %name, count, consumer_count, "resource pool allocated");

        Ok(Self {
            shared: Arc::new(PoolShared {
                name,
                capacity: count,
                free,
                consumers,
                acquisitions: AtomicU64::new(0),
                waits: AtomicU64::new(0),
                recycle,
            }),
        })
    }

    /// Get the pool name.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Total number of objects owned by the pool.
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Number of consumer queues.
    pub fn consumer_count(&self) -> usize {
        self.shared.consumers.len()
    }

    /// Check whether `other` is a handle to this very pool.
    pub fn same_pool(&self, other: &ResourcePool<T>) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    fn wrap(&self, slot: Slot<T>) -> Resource<T> {
        self.shared.acquisitions.fetch_add(1, Ordering::Relaxed);
        trace!(pool = %self.shared.name, index = slot.index, "acquire");
        Resource {
            index: slot.index,
            object: Some(slot.object),
            pool: Arc::clone(&self.shared),
        }
    }

    /// Take a free object, blocking while the pool is exhausted.
    ///
    /// Returns [`Error::Shutdown`] once the pool has been shut down.
    pub fn acquire(&self) -> Result<Resource<T>> {
        let (slot, waited) = self.shared.free.pop_counting_wait()?;
        if waited {
            self.shared.waits.fetch_add(1, Ordering::Relaxed);
        }
        Ok(self.wrap(slot))
    }

    /// Take a free object if one is available right now.
    pub fn try_acquire(&self) -> Option<Resource<T>> {
        self.shared.free.try_pop().map(|slot| self.wrap(slot))
    }

    /// Append a filled object to consumer queue `queue`.
    ///
    /// Never blocks. The object must belong to this pool.
    pub fn enqueue(&self, queue: usize, resource: Resource<T>) -> Result<()> {
        debug_assert!(
            Arc::ptr_eq(&resource.pool, &self.shared),
            "resource from pool {} posted to pool {}",
            resource.pool.name,
            self.shared.name
        );
        let consumer = self.shared.consumers.get(queue).ok_or_else(|| {
            Error::InvalidParameter(format!(
                "pool {} has no consumer queue {queue}",
                self.shared.name
            ))
        })?;
        consumer.push(resource);
        Ok(())
    }

    /// Append a filled object to the first consumer queue.
    pub fn post(&self, resource: Resource<T>) -> Result<()> {
        self.enqueue(0, resource)
    }

    /// Take the oldest object from consumer queue `queue`, blocking while it
    /// is empty. Returns [`Error::Shutdown`] once the pool has been shut down.
    pub fn dequeue(&self, queue: usize) -> Result<Resource<T>> {
        self.consumer(queue)?.pop()
    }

    /// Take the oldest object from consumer queue `queue` without blocking.
    pub fn try_dequeue(&self, queue: usize) -> Result<Option<Resource<T>>> {
        Ok(self.consumer(queue)?.try_pop())
    }

    fn consumer(&self, queue: usize) -> Result<&BoundedQueue<Resource<T>>> {
        self.shared.consumers.get(queue).ok_or_else(|| {
            Error::InvalidParameter(format!(
                "pool {} has no consumer queue {queue}",
                self.shared.name
            ))
        })
    }

    /// Wake every blocked `acquire` and `dequeue` with [`Error::Shutdown`].
    pub fn shutdown(&self) {
        debug!(pool = %self.shared.name, "pool shutdown");
        self.shared.free.shutdown();
        for consumer in &self.shared.consumers {
            consumer.shutdown();
        }
    }

    /// Check if the pool has been shut down.
    pub fn is_shutdown(&self) -> bool {
        self.shared.free.is_shutdown()
    }

    /// Return every object still waiting on a consumer queue to the free
    /// list. Returns the number of objects recovered.
    pub fn drain(&self) -> usize {
        self.shared
            .consumers
            .iter()
            .map(|consumer| consumer.drain().len())
            .sum()
    }

    /// Snapshot of the pool counters.
    ///
    /// `outstanding` is derived from a single read of the free list, so
    /// `free + outstanding == capacity` holds in every snapshot.
    pub fn stats(&self) -> PoolStats {
        let free = self.shared.free.len();
        PoolStats {
            capacity: self.shared.capacity,
            free,
            queued: self.shared.consumers.iter().map(BoundedQueue::len).sum(),
            outstanding: self.shared.capacity - free,
            acquisitions: self.shared.acquisitions.load(Ordering::Relaxed),
            waits: self.shared.waits.load(Ordering::Relaxed),
        }
    }
}

impl<T> std::fmt::Debug for ResourcePool<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourcePool")
            .field("name", &self.shared.name)
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::thread;
    use std::time::Duration;

    fn pool(count: usize) -> ResourcePool<Vec<u8>> {
        ResourcePool::new("test", count, 1, |_| vec![0u8; 16]).unwrap()
    }

    #[test]
    fn test_rejects_empty_pool() {
        assert!(ResourcePool::new("empty", 0, 1, |_| 0u8).is_err());
        assert!(ResourcePool::new("no-consumers", 2, 0, |_| 0u8).is_err());
    }

    #[test]
    fn test_acquire_release_reuses_objects() {
        let pool = pool(2);
        let first = pool.acquire().unwrap();
        let index = first.index();
        first.release();

        let stats = pool.stats();
        assert_eq!(stats.free, 2);
        assert_eq!(stats.outstanding, 0);

        // FIFO free list: the released object goes to the back.
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        assert_ne!(a.index(), b.index());
        assert!(a.index() == index || b.index() == index);
    }

    #[test]
    fn test_no_double_acquire() {
        let pool = pool(4);
        let mut held = Vec::new();
        let mut seen = HashSet::new();
        for _ in 0..4 {
            let res = pool.acquire().unwrap();
            assert!(seen.insert(res.index()), "object handed out twice");
            held.push(res);
        }
        assert!(pool.try_acquire().is_none());

        let returned = held.remove(1).index();
        let again = pool.acquire().unwrap();
        assert_eq!(again.index(), returned);
    }

    #[test]
    fn test_conservation_through_queues() {
        let pool = pool(3);
        let check = |pool: &ResourcePool<Vec<u8>>| {
            let s = pool.stats();
            assert_eq!(s.free + s.outstanding, s.capacity);
            assert!(s.queued <= s.outstanding);
        };

        check(&pool);
        let a = pool.acquire().unwrap();
        check(&pool);
        pool.post(a).unwrap();
        check(&pool);
        let b = pool.acquire().unwrap();
        check(&pool);
        let a = pool.dequeue(0).unwrap();
        check(&pool);
        assert_eq!(pool.stats().in_processing(), 2);
        drop(a);
        b.release();
        check(&pool);
        assert_eq!(pool.stats().free, 3);
    }

    #[test]
    fn test_stats_consistent_under_contention() {
        let pool = pool(4);
        thread::scope(|scope| {
            for _ in 0..3 {
                scope.spawn(|| {
                    for _ in 0..2000 {
                        let res = pool.acquire().unwrap();
                        pool.post(res).unwrap();
                        if let Ok(Some(res)) = pool.try_dequeue(0) {
                            res.release();
                        }
                    }
                });
            }
            for _ in 0..2000 {
                let s = pool.stats();
                assert_eq!(s.free + s.outstanding, s.capacity);
            }
        });
    }

    #[test]
    fn test_same_pool_is_identity() {
        let a = pool(1);
        let b = pool(1);
        assert!(a.same_pool(&a.clone()));
        assert!(!a.same_pool(&b));
    }

    #[test]
    fn test_payload_mutation_survives_queue() {
        let pool = pool(1);
        let mut res = pool.acquire().unwrap();
        res[0] = 9;
        pool.post(res).unwrap();
        let res = pool.dequeue(0).unwrap();
        assert_eq!(res[0], 9);
    }

    #[test]
    fn test_invalid_queue_index() {
        let pool = pool(1);
        let res = pool.acquire().unwrap();
        assert!(pool.enqueue(3, res).is_err());
        // The rejected handle was dropped and went home.
        assert_eq!(pool.stats().free, 1);
        assert!(pool.dequeue(1).is_err());
    }

    #[test]
    fn test_acquire_blocks_until_release() {
        let pool = pool(1);
        let held = pool.acquire().unwrap();

        let waiter = {
            let pool = pool.clone();
            thread::spawn(move || pool.acquire().map(|r| r.index()))
        };

        thread::sleep(Duration::from_millis(30));
        assert!(!waiter.is_finished());
        held.release();

        assert_eq!(waiter.join().unwrap().unwrap(), 0);
        assert_eq!(pool.stats().waits, 1);
    }

    #[test]
    fn test_shutdown_unblocks_acquire_and_dequeue() {
        let pool = pool(1);
        let held = pool.acquire().unwrap();

        let acquirer = {
            let pool = pool.clone();
            thread::spawn(move || pool.acquire().map(|_| ()))
        };
        let dequeuer = {
            let pool = pool.clone();
            thread::spawn(move || pool.dequeue(0).map(|_| ()))
        };

        thread::sleep(Duration::from_millis(20));
        pool.shutdown();

        assert!(acquirer.join().unwrap().unwrap_err().is_shutdown());
        assert!(dequeuer.join().unwrap().unwrap_err().is_shutdown());

        // Releases after shutdown still land on the free list.
        drop(held);
        assert_eq!(pool.stats().free, 1);
    }

    #[test]
    fn test_recycle_runs_on_release() {
        let pool = ResourcePool::with_recycle("recycle", 1, 1, |_| vec![1u8, 2, 3], Vec::clear).unwrap();
        let res = pool.acquire().unwrap();
        assert_eq!(res.len(), 3);
        res.release();
        assert!(pool.acquire().unwrap().is_empty());
    }

    #[test]
    fn test_recycle_releases_nested_handles() {
        let inner = pool(2);
        let outer: ResourcePool<Option<Resource<Vec<u8>>>> =
            ResourcePool::with_recycle("outer", 2, 1, |_| None, |slot| drop(slot.take())).unwrap();

        let mut task = outer.acquire().unwrap();
        *task = Some(inner.acquire().unwrap());
        outer.post(task).unwrap();
        assert_eq!(inner.stats().outstanding, 1);

        outer.shutdown();
        outer.drain();
        assert_eq!(inner.stats().free, 2);
    }

    #[test]
    fn test_drain_recovers_queued_objects() {
        let pool = pool(3);
        for _ in 0..3 {
            let res = pool.acquire().unwrap();
            pool.post(res).unwrap();
        }
        pool.shutdown();
        assert_eq!(pool.drain(), 3);

        let stats = pool.stats();
        assert_eq!(stats.free, 3);
        assert_eq!(stats.queued, 0);
        assert_eq!(stats.outstanding, 0);
    }
}
