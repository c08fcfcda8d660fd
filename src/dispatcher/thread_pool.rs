//! `thread_pool` dispatcher: N workers over per-binding FIFOs.
//!
//! Each binding entity (a cooperation or an individual agent, selected per
//! binder) owns one FIFO. A FIFO is served by at most one worker at a time,
//! which preserves both ordering and the single-writer discipline;
//! `max_demands_at_once` caps how many demands a worker drains before it
//! yields the FIFO back to the pool.

// Layer 1: Standard library imports
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, OnceLock, Weak};

// Layer 2: Third-party crate imports
use parking_lot::{Condvar, Mutex};

// Layer 3: Internal module imports
use crate::agent::runtime::AgentCell;
use crate::environment::Environment;
use crate::error::{Error, Result};
use crate::queue::{Demand, EventQueue};
use crate::util::CoopId;

use super::work_thread::{ActivityStats, ActivityTracking, WorkThread};
use super::{DispBinder, DispatcherKind, DispatcherRuntime};

/// Which entity owns a FIFO under a binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FifoKind {
    /// All agents of one cooperation share a FIFO.
    #[default]
    Cooperation,
    /// Every agent gets its own FIFO.
    Individual,
}

/// Tuning of a `thread_pool` dispatcher.
#[derive(Debug, Clone, Copy)]
pub struct ThreadPoolParams {
    pub(crate) thread_count: usize,
    pub(crate) activity_tracking: ActivityTracking,
}

impl ThreadPoolParams {
    /// Defaults: one worker per available core, environment-wide activity
    /// tracking.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the worker count.
    pub fn thread_count(mut self, count: usize) -> Self {
        self.thread_count = count.max(1);
        self
    }

    /// Override the environment-wide activity-tracking setting.
    pub fn activity_tracking(mut self, tracking: ActivityTracking) -> Self {
        self.activity_tracking = tracking;
        self
    }
}

impl Default for ThreadPoolParams {
    fn default() -> Self {
        Self {
            thread_count: default_thread_pool_size(),
            activity_tracking: ActivityTracking::Unspecified,
        }
    }
}

/// One worker per available core, with a floor of two.
pub fn default_thread_pool_size() -> usize {
    std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(2)
        .max(2)
}

/// Per-binding tuning.
#[derive(Debug, Clone, Copy)]
pub struct BindParams {
    pub(crate) fifo: FifoKind,
    pub(crate) max_demands_at_once: usize,
}

impl BindParams {
    /// Defaults: cooperation FIFO, four demands per batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Select the FIFO-owning entity.
    pub fn fifo(mut self, fifo: FifoKind) -> Self {
        self.fifo = fifo;
        self
    }

    /// Cap how many demands a worker drains before yielding the FIFO.
    pub fn max_demands_at_once(mut self, max: usize) -> Self {
        self.max_demands_at_once = max.max(1);
        self
    }
}

impl Default for BindParams {
    fn default() -> Self {
        Self {
            fifo: FifoKind::Cooperation,
            max_demands_at_once: 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum QueueKey {
    Coop(CoopId),
    Agent(u64),
}

struct PoolQueueInner {
    demands: VecDeque<Demand>,
    /// True while the queue is in the active list or held by a worker.
    scheduled: bool,
}

pub(crate) struct PoolQueue {
    max_batch: usize,
    inner: Mutex<PoolQueueInner>,
}

impl PoolQueue {
    fn new(max_batch: usize) -> Arc<Self> {
        Arc::new(Self {
            max_batch,
            inner: Mutex::new(PoolQueueInner {
                demands: VecDeque::new(),
                scheduled: false,
            }),
        })
    }

    fn len(&self) -> usize {
        self.inner.lock().demands.len()
    }
}

struct QueueSlot {
    queue: Arc<PoolQueue>,
    refs: usize,
}

struct ActiveList {
    queues: VecDeque<Arc<PoolQueue>>,
    closed: bool,
}

pub(crate) struct PoolInner {
    name: String,
    env: Environment,
    active: Mutex<ActiveList>,
    available: Condvar,
    queues: Mutex<HashMap<QueueKey, QueueSlot>>,
    workers: Mutex<Vec<WorkThread>>,
    self_ref: OnceLock<Weak<PoolInner>>,
}

impl PoolInner {
    fn activate(&self, queue: &Arc<PoolQueue>) {
        let mut active = self.active.lock();
        if active.closed {
            return;
        }
        active.queues.push_back(Arc::clone(queue));
        drop(active);
        self.available.notify_one();
    }

    fn pop_active(&self) -> Option<Arc<PoolQueue>> {
        let mut active = self.active.lock();
        loop {
            if let Some(queue) = active.queues.pop_front() {
                return Some(queue);
            }
            if active.closed {
                return None;
            }
            self.available.wait(&mut active);
        }
    }

    fn acquire_queue(&self, key: QueueKey, max_batch: usize) -> Arc<PoolQueue> {
        let mut queues = self.queues.lock();
        let slot = queues.entry(key).or_insert_with(|| QueueSlot {
            queue: PoolQueue::new(max_batch),
            refs: 0,
        });
        slot.refs += 1;
        Arc::clone(&slot.queue)
    }

    fn release_queue(&self, key: QueueKey) {
        let mut queues = self.queues.lock();
        if let Some(slot) = queues.get_mut(&key) {
            slot.refs -= 1;
            if slot.refs == 0 {
                queues.remove(&key);
            }
        }
    }

    fn worker_loop(&self, stats: &ActivityStats) {
        while let Some(queue) = stats.track_waiting(|| self.pop_active()) {
            let mut processed = 0;
            loop {
                let demand = queue.inner.lock().demands.pop_front();
                match demand {
                    Some(demand) => {
                        stats.track_working(|| demand.execute());
                        processed += 1;
                        if processed >= queue.max_batch {
                            break;
                        }
                    }
                    None => break,
                }
            }

            let mut inner = queue.inner.lock();
            if inner.demands.is_empty() {
                inner.scheduled = false;
            } else {
                drop(inner);
                self.activate(&queue);
            }
        }
    }
}

impl DispatcherRuntime for PoolInner {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> DispatcherKind {
        DispatcherKind::ThreadPool
    }

    fn default_binder(&self) -> Arc<dyn DispBinder> {
        match self.self_ref.get().and_then(Weak::upgrade) {
            Some(inner) => Arc::new(ThreadPoolBinder {
                inner,
                params: BindParams::default(),
            }),
            None => Arc::new(super::NullBinder),
        }
    }

    fn shutdown(&self) {
        let mut active = self.active.lock();
        active.closed = true;
        active.queues.clear();
        drop(active);
        self.available.notify_all();
    }

    fn wait(&self) -> Result<()> {
        let workers = {
            let mut slot = self.workers.lock();
            std::mem::take(&mut *slot)
        };
        for worker in &workers {
            worker.join()?;
        }
        Ok(())
    }

    fn stats_snapshot(&self) -> (usize, usize) {
        let demands = self.queues.lock().values().map(|s| s.queue.len()).sum();
        (self.workers.lock().len(), demands)
    }

    fn activity_snapshot(&self) -> Option<super::work_thread::ActivitySnapshot> {
        let workers = self.workers.lock();
        let mut total = super::work_thread::ActivitySnapshot {
            working_ns: 0,
            waiting_ns: 0,
        };
        let mut any = false;
        for worker in workers.iter() {
            if let Some(snapshot) = worker.activity().snapshot() {
                any = true;
                total.working_ns += snapshot.working_ns;
                total.waiting_ns += snapshot.waiting_ns;
            }
        }
        any.then_some(total)
    }
}

struct PoolQueuePush {
    pool: Weak<PoolInner>,
    queue: Arc<PoolQueue>,
}

impl EventQueue for PoolQueuePush {
    fn push(&self, demand: Demand) {
        let needs_activation = {
            let mut inner = self.queue.inner.lock();
            inner.demands.push_back(demand);
            if inner.scheduled {
                false
            } else {
                inner.scheduled = true;
                true
            }
        };
        if needs_activation {
            if let Some(pool) = self.pool.upgrade() {
                pool.activate(&self.queue);
            }
        }
    }
}

struct ThreadPoolBinder {
    inner: Arc<PoolInner>,
    params: BindParams,
}

impl ThreadPoolBinder {
    fn key_for(&self, agent: &Arc<AgentCell>) -> QueueKey {
        match self.params.fifo {
            FifoKind::Cooperation => match agent.runtime.coop() {
                Some(coop) => QueueKey::Coop(coop.id()),
                None => QueueKey::Agent(agent.runtime.ordinal()),
            },
            FifoKind::Individual => QueueKey::Agent(agent.runtime.ordinal()),
        }
    }
}

impl DispBinder for ThreadPoolBinder {
    fn preallocate_resources(&self, agent: &Arc<AgentCell>) -> Result<()> {
        self.inner.env.ensure_running()?;
        let key = self.key_for(agent);
        self.inner
            .acquire_queue(key, self.params.max_demands_at_once);
        Ok(())
    }

    fn undo_preallocation(&self, agent: &Arc<AgentCell>) {
        self.inner.release_queue(self.key_for(agent));
    }

    fn bind(&self, agent: &Arc<AgentCell>) {
        let key = self.key_for(agent);
        let queue = {
            let queues = self.inner.queues.lock();
            queues.get(&key).map(|slot| Arc::clone(&slot.queue))
        };
        if let Some(queue) = queue {
            agent.runtime.bind_queue(Arc::new(PoolQueuePush {
                pool: Arc::downgrade(&self.inner),
                queue,
            }));
        }
    }

    fn unbind(&self, agent: &Arc<AgentCell>) {
        agent.runtime.unbind_queue();
        self.inner.release_queue(self.key_for(agent));
    }
}

/// Handle of a `thread_pool` dispatcher.
#[derive(Clone)]
pub struct ThreadPoolDispatcher {
    inner: Arc<PoolInner>,
}

impl ThreadPoolDispatcher {
    /// Binder with the given per-binding parameters.
    pub fn binder(&self, params: BindParams) -> Arc<dyn DispBinder> {
        Arc::new(ThreadPoolBinder {
            inner: Arc::clone(&self.inner),
            params,
        })
    }

    /// Signal all workers to stop after their current demand.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }

    /// Join all workers.
    pub fn wait(&self) -> Result<()> {
        DispatcherRuntime::wait(&*self.inner)
    }
}

/// Create a `thread_pool` dispatcher with `params.thread_count` workers.
pub fn make_dispatcher(
    env: &Environment,
    name: &str,
    params: ThreadPoolParams,
) -> Result<ThreadPoolDispatcher> {
    env.ensure_running()?;
    if name.is_empty() {
        return Err(Error::EmptyName);
    }

    let inner = Arc::new(PoolInner {
        name: name.to_string(),
        env: env.clone(),
        active: Mutex::new(ActiveList {
            queues: VecDeque::new(),
            closed: false,
        }),
        available: Condvar::new(),
        queues: Mutex::new(HashMap::new()),
        workers: Mutex::new(Vec::new()),
        self_ref: OnceLock::new(),
    });
    let _ = inner.self_ref.set(Arc::downgrade(&inner));

    let enabled = params
        .activity_tracking
        .resolve(env.activity_tracking_default());
    let mut workers = Vec::with_capacity(params.thread_count);
    for index in 0..params.thread_count {
        let pool = Arc::clone(&inner);
        workers.push(WorkThread::spawn(
            env.work_thread_factory().as_ref(),
            format!("troupe-tp-{name}-{index}"),
            ActivityStats::new(enabled),
            move |stats| pool.worker_loop(&stats),
        )?);
    }
    *inner.workers.lock() = workers;

    env.register_dispatcher(Arc::clone(&inner) as Arc<dyn DispatcherRuntime>);
    Ok(ThreadPoolDispatcher { inner })
}
