//! `one_thread` dispatcher: a single worker serving one shared FIFO.
//!
//! All bound agents share the worker, so every handler of every bound agent
//! is trivially serialised.

// Layer 1: Standard library imports
use std::sync::Arc;

// Layer 2: Third-party crate imports
// (none for this module)

// Layer 3: Internal module imports
use crate::agent::runtime::AgentCell;
use crate::environment::Environment;
use crate::error::{Error, Result};
use crate::queue::{Demand, EventQueue};

use super::queue::{DemandQueue, QueueLockPolicy};
use super::work_thread::{ActivityStats, ActivityTracking, WorkThread};
use super::{DispBinder, DispatcherKind, DispatcherRuntime};

/// Tuning of a `one_thread` dispatcher.
#[derive(Debug, Default, Clone, Copy)]
pub struct OneThreadParams {
    pub(crate) activity_tracking: ActivityTracking,
}

impl OneThreadParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the environment-wide activity-tracking setting.
    pub fn activity_tracking(mut self, tracking: ActivityTracking) -> Self {
        self.activity_tracking = tracking;
        self
    }
}

pub(crate) struct OneThreadInner {
    name: String,
    kind: DispatcherKind,
    queue: Arc<DemandQueue>,
    worker: Option<WorkThread>,
}

impl OneThreadInner {
    pub(crate) fn queue(&self) -> &Arc<DemandQueue> {
        &self.queue
    }
}

impl DispatcherRuntime for OneThreadInner {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> DispatcherKind {
        self.kind
    }

    fn default_binder(&self) -> Arc<dyn DispBinder> {
        Arc::new(OneThreadBinder {
            queue: Arc::clone(&self.queue),
        })
    }

    fn shutdown(&self) {
        self.queue.close();
    }

    fn wait(&self) -> Result<()> {
        match &self.worker {
            Some(worker) => worker.join(),
            None => Ok(()),
        }
    }

    fn stats_snapshot(&self) -> (usize, usize) {
        (usize::from(self.worker.is_some()), self.queue.len())
    }

    fn activity_snapshot(&self) -> Option<super::work_thread::ActivitySnapshot> {
        self.worker
            .as_ref()
            .and_then(|worker| worker.activity().snapshot())
    }
}

struct OneThreadBinder {
    queue: Arc<DemandQueue>,
}

struct QueuePush {
    queue: Arc<DemandQueue>,
}

impl EventQueue for QueuePush {
    fn push(&self, demand: Demand) {
        self.queue.push(demand);
    }
}

impl DispBinder for OneThreadBinder {
    fn preallocate_resources(&self, _agent: &Arc<AgentCell>) -> Result<()> {
        Ok(())
    }

    fn undo_preallocation(&self, _agent: &Arc<AgentCell>) {}

    fn bind(&self, agent: &Arc<AgentCell>) {
        agent.runtime.bind_queue(Arc::new(QueuePush {
            queue: Arc::clone(&self.queue),
        }));
    }

    fn unbind(&self, agent: &Arc<AgentCell>) {
        agent.runtime.unbind_queue();
    }
}

/// Handle of a `one_thread`-family dispatcher.
#[derive(Clone)]
pub struct OneThreadDispatcher {
    inner: Arc<OneThreadInner>,
}

impl OneThreadDispatcher {
    /// Binder attaching agents to this dispatcher.
    pub fn binder(&self) -> Arc<dyn DispBinder> {
        self.inner.default_binder()
    }

    /// Signal the worker to drain its current demand and stop.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }

    /// Join the worker.
    pub fn wait(&self) -> Result<()> {
        self.inner.wait()
    }

    pub(crate) fn inner(&self) -> &Arc<OneThreadInner> {
        &self.inner
    }
}

pub(crate) fn worker_loop(queue: &DemandQueue, stats: &ActivityStats) {
    loop {
        let demand = stats.track_waiting(|| queue.pop());
        match demand {
            Some(demand) => stats.track_working(|| demand.execute()),
            None => break,
        }
    }
}

pub(crate) fn make_impl(
    env: &Environment,
    name: &str,
    kind: DispatcherKind,
    policy: QueueLockPolicy,
    tracking: ActivityTracking,
    spawn_worker: bool,
) -> Result<OneThreadDispatcher> {
    env.ensure_running()?;
    if name.is_empty() {
        return Err(Error::EmptyName);
    }

    let queue = Arc::new(DemandQueue::new(policy));
    let worker = if spawn_worker {
        let enabled = tracking.resolve(env.activity_tracking_default());
        let loop_queue = Arc::clone(&queue);
        Some(WorkThread::spawn(
            env.work_thread_factory().as_ref(),
            format!("troupe-ot-{name}"),
            ActivityStats::new(enabled),
            move |stats| worker_loop(&loop_queue, &stats),
        )?)
    } else {
        None
    };

    let inner = Arc::new(OneThreadInner {
        name: name.to_string(),
        kind,
        queue,
        worker,
    });
    env.register_dispatcher(Arc::clone(&inner) as Arc<dyn DispatcherRuntime>);
    Ok(OneThreadDispatcher { inner })
}

/// Create a `one_thread` dispatcher.
pub fn make_dispatcher(
    env: &Environment,
    name: &str,
    params: OneThreadParams,
) -> Result<OneThreadDispatcher> {
    make_impl(
        env,
        name,
        DispatcherKind::OneThread,
        QueueLockPolicy::Sleep,
        params.activity_tracking,
        true,
    )
}

/// Create the environment's default dispatcher. For the single-threaded
/// infrastructures no worker is spawned: the environment's own loop drains
/// the queue.
pub(crate) fn make_default(env: &Environment, spawn_worker: bool) -> Result<OneThreadDispatcher> {
    make_impl(
        env,
        "default",
        DispatcherKind::OneThread,
        QueueLockPolicy::Sleep,
        ActivityTracking::Unspecified,
        spawn_worker,
    )
}
