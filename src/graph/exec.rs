use std::cmp::Ordering as CmpOrdering;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use crate::foundation::error::Status;
use crate::graph::request::{FrameViewRequest, RequestId};

static NEXT_EXEC_ID: AtomicU64 = AtomicU64::new(1);

/// Identifier of one execution pass over a tree's request graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ExecId(u64);

impl ExecId {
    fn next() -> ExecId {
        ExecId(NEXT_EXEC_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ExecId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

/// Ready-queue key: requests with more listeners drain first (their result
/// unblocks the most downstream work), ties broken by creation order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct ReadyKey {
    listeners: usize,
    id: RequestId,
}

impl Ord for ReadyKey {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .listeners
            .cmp(&self.listeners)
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for ReadyKey {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

struct ExecInner {
    requests: HashMap<RequestId, Arc<FrameViewRequest>>,
    ready: BTreeSet<ReadyKey>,
    ready_ids: HashSet<RequestId>,
    sticky: Status,
    outstanding: usize,
}

/// What the launch loop should do next.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PassProgress {
    /// Dependency-free requests are waiting in the ready queue.
    Ready,
    /// Every registered task settled.
    Done,
    /// The sticky failure fired; stop submitting.
    Failed(Status),
}

/// State of one execution pass: the registered tasks, the priority-ordered
/// ready queue of dependency-free requests, and the pass's sticky failure
/// status. The launch loop blocks on this; workers feed it back.
pub struct ExecutionData {
    id: ExecId,
    inner: Mutex<ExecInner>,
    cv: Condvar,
}

impl ExecutionData {
    /// Creates an empty pass.
    pub fn new() -> Arc<ExecutionData> {
        Arc::new(ExecutionData {
            id: ExecId::next(),
            inner: Mutex::new(ExecInner {
                requests: HashMap::new(),
                ready: BTreeSet::new(),
                ready_ids: HashSet::new(),
                sticky: Status::Ok,
                outstanding: 0,
            }),
            cv: Condvar::new(),
        })
    }

    /// Pass identifier; keys per-pass edges on requests.
    pub fn id(&self) -> ExecId {
        self.id
    }

    /// Registers a request as a task of this pass. Idempotent.
    pub(crate) fn register_task(&self, req: &Arc<FrameViewRequest>) {
        let mut inner = self.inner.lock().expect("exec lock");
        if inner.requests.insert(req.id(), Arc::clone(req)).is_none() {
            inner.outstanding += 1;
        }
    }

    /// Looks up a registered request.
    pub(crate) fn get(&self, id: RequestId) -> Option<Arc<FrameViewRequest>> {
        self.inner.lock().expect("exec lock").requests.get(&id).cloned()
    }

    /// Queues a dependency-free request for launch.
    pub(crate) fn make_ready(&self, req: &Arc<FrameViewRequest>) {
        let mut inner = self.inner.lock().expect("exec lock");
        if inner.ready_ids.insert(req.id()) {
            let key = ReadyKey { listeners: req.listener_count(self.id), id: req.id() };
            inner.ready.insert(key);
            self.cv.notify_all();
        }
    }

    /// Drains the ready queue in priority order.
    pub(crate) fn take_ready(&self) -> Vec<Arc<FrameViewRequest>> {
        let mut inner = self.inner.lock().expect("exec lock");
        let keys: Vec<ReadyKey> = inner.ready.iter().copied().collect();
        inner.ready.clear();
        inner.ready_ids.clear();
        keys.iter()
            .filter_map(|k| inner.requests.get(&k.id).cloned())
            .collect()
    }

    /// Marks one registered task settled and records a failure into the
    /// pass's sticky status. The first failure wins.
    pub(crate) fn task_done(&self, status: Status) {
        let mut inner = self.inner.lock().expect("exec lock");
        inner.outstanding = inner.outstanding.saturating_sub(1);
        if status.is_failure() && !inner.sticky.is_failure() {
            inner.sticky = status;
        }
        self.cv.notify_all();
    }

    /// True when the ready queue is non-empty.
    pub(crate) fn has_ready(&self) -> bool {
        !self.inner.lock().expect("exec lock").ready.is_empty()
    }

    /// First failure observed in this pass, or `Ok`.
    pub fn sticky_status(&self) -> Status {
        self.inner.lock().expect("exec lock").sticky
    }

    /// Tasks registered and not yet settled.
    pub fn outstanding_count(&self) -> usize {
        self.inner.lock().expect("exec lock").outstanding
    }

    /// Blocks until the pass needs the launch loop: new ready tasks, a
    /// sticky failure, or full completion.
    pub(crate) fn wait_progress(&self) -> PassProgress {
        let mut inner = self.inner.lock().expect("exec lock");
        loop {
            if inner.sticky.is_failure() {
                return PassProgress::Failed(inner.sticky);
            }
            if !inner.ready.is_empty() {
                return PassProgress::Ready;
            }
            if inner.outstanding == 0 {
                return PassProgress::Done;
            }
            inner = self.cv.wait(inner).expect("exec lock");
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/graph/exec.rs"]
mod tests;
