use std::cell::Cell;
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

type Job = Box<dyn FnOnce() + Send + 'static>;

thread_local! {
    static IS_POOL_WORKER: Cell<bool> = const { Cell::new(false) };
}

struct PoolInner {
    queue: VecDeque<Job>,
    /// Slots in use: running jobs, minus released, plus reserved. May
    /// exceed `max_slots` transiently after a reserve.
    active: isize,
    /// Workers parked waiting for a job.
    idle: usize,
    /// Worker threads ever spawned; bounds thread creation.
    spawned: usize,
    shutdown: bool,
}

/// Fixed-slot worker pool. Jobs queue until a slot frees; a blocked worker
/// can hand its slot back with [`WorkerPool::release_slot`] so the job it
/// waits on can run, then take it back with [`WorkerPool::reserve_slot`].
/// Without that, a tree whose leaves outnumber the slots deadlocks: every
/// slot sits in a join waiting for leaves that can never start.
pub struct WorkerPool {
    max_slots: usize,
    inner: Mutex<PoolInner>,
    cv: Condvar,
}

impl WorkerPool {
    /// Creates a pool with `max_slots` concurrent slots (minimum one).
    pub fn new(max_slots: usize) -> Arc<WorkerPool> {
        Arc::new(WorkerPool {
            max_slots: max_slots.max(1),
            inner: Mutex::new(PoolInner {
                queue: VecDeque::new(),
                active: 0,
                idle: 0,
                spawned: 0,
                shutdown: false,
            }),
            cv: Condvar::new(),
        })
    }

    /// Configured slot count.
    pub fn max_slots(&self) -> usize {
        self.max_slots
    }

    /// True on a thread owned by some [`WorkerPool`].
    pub fn current_is_pool_thread() -> bool {
        IS_POOL_WORKER.with(Cell::get)
    }

    /// Queues a job. It runs as soon as a slot and a worker are free.
    pub fn spawn(self: &Arc<Self>, job: impl FnOnce() + Send + 'static) {
        let mut inner = self.inner.lock().expect("pool lock");
        if inner.shutdown {
            return;
        }
        inner.queue.push_back(Box::new(job));
        self.ensure_worker(&mut inner);
        self.cv.notify_all();
    }

    /// Spawns a worker thread when queued work could otherwise sit idle.
    /// Workers blocked in a released-slot wait do not count against
    /// `max_slots`, so a release can require a fresh thread to drain the
    /// queue; threads park idle afterwards and get reused.
    fn ensure_worker(self: &Arc<Self>, inner: &mut PoolInner) {
        let slot_free = (inner.active as usize) < self.max_slots;
        if !inner.queue.is_empty() && slot_free && inner.idle == 0 {
            inner.spawned += 1;
            let pool = Arc::clone(self);
            thread::Builder::new()
                .name(format!("cairn-worker-{}", inner.spawned))
                .spawn(move || pool.worker_loop())
                .expect("spawn pool worker");
        }
    }

    fn worker_loop(self: Arc<Self>) {
        IS_POOL_WORKER.with(|f| f.set(true));
        let mut inner = self.inner.lock().expect("pool lock");
        loop {
            if inner.shutdown {
                return;
            }
            if (inner.active as usize) < self.max_slots {
                if let Some(job) = inner.queue.pop_front() {
                    inner.active += 1;
                    drop(inner);
                    job();
                    inner = self.inner.lock().expect("pool lock");
                    inner.active -= 1;
                    self.cv.notify_all();
                    continue;
                }
            }
            inner.idle += 1;
            inner = self.cv.wait(inner).expect("pool lock");
            inner.idle -= 1;
        }
    }

    /// Gives this worker's slot back to the pool while the caller blocks
    /// on work that needs it. No-op off pool threads.
    pub fn release_slot(self: &Arc<Self>) {
        if !Self::current_is_pool_thread() {
            return;
        }
        let mut inner = self.inner.lock().expect("pool lock");
        inner.active -= 1;
        self.ensure_worker(&mut inner);
        self.cv.notify_all();
    }

    /// Takes a slot back after [`WorkerPool::release_slot`]. May push the
    /// pool transiently over its slot budget; the debt settles as running
    /// jobs finish. No-op off pool threads.
    pub fn reserve_slot(self: &Arc<Self>) {
        if !Self::current_is_pool_thread() {
            return;
        }
        let mut inner = self.inner.lock().expect("pool lock");
        inner.active += 1;
    }

    /// Stops accepting jobs and wakes every worker. Queued jobs that have
    /// not started are dropped.
    pub fn shutdown(&self) {
        let mut inner = self.inner.lock().expect("pool lock");
        inner.shutdown = true;
        inner.queue.clear();
        self.cv.notify_all();
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.shutdown = true;
        }
        self.cv.notify_all();
    }
}

/// RAII pairing of [`WorkerPool::release_slot`] / [`WorkerPool::reserve_slot`]
/// around a blocking region.
pub struct PoolSlotRelease<'a> {
    pool: &'a Arc<WorkerPool>,
}

impl<'a> PoolSlotRelease<'a> {
    /// Releases the current worker's slot until drop.
    pub fn new(pool: &'a Arc<WorkerPool>) -> Self {
        pool.release_slot();
        Self { pool }
    }
}

impl Drop for PoolSlotRelease<'_> {
    fn drop(&mut self) {
        self.pool.reserve_slot();
    }
}

#[cfg(test)]
#[path = "../../tests/unit/render/pool.rs"]
mod tests;
