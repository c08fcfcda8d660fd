//! `adv_thread_pool` dispatcher: a pool that exploits the thread-safe flag
//! of event handlers.
//!
//! Demands of one binding are consumed strictly in FIFO order, but
//! consecutive thread-safe demands at the head may be executed by several
//! workers at once. A non-thread-safe demand is a barrier: it waits until
//! the running safe batch drains and then runs alone.

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

/// Tuning of an `adv_thread_pool` dispatcher.
#[derive(Debug, Clone, Copy)]
pub struct AdvThreadPoolParams {
    pub(crate) thread_count: usize,
    pub(crate) activity_tracking: ActivityTracking,
}

impl AdvThreadPoolParams {
    /// Defaults: one worker per available core.
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

impl Default for AdvThreadPoolParams {
    fn default() -> Self {
        Self {
            thread_count: super::thread_pool::default_thread_pool_size(),
            activity_tracking: ActivityTracking::Unspecified,
        }
    }
}

/// Which entity owns a FIFO under an adv-pool binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AdvFifoKind {
    /// All agents of one cooperation share a FIFO.
    #[default]
    Cooperation,
    /// Every agent gets its own FIFO.
    Individual,
}

/// Per-binding tuning.
#[derive(Debug, Clone, Copy, Default)]
pub struct AdvBindParams {
    pub(crate) fifo: AdvFifoKind,
}

impl AdvBindParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Select the FIFO-owning entity.
    pub fn fifo(mut self, fifo: AdvFifoKind) -> Self {
        self.fifo = fifo;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum QueueKey {
    Coop(CoopId),
    Agent(u64),
}

struct AdvQueueInner {
    demands: VecDeque<Demand>,
    running_safe: usize,
    running_exclusive: bool,
    in_active_list: bool,
}

struct AdvQueue {
    inner: Mutex<AdvQueueInner>,
}

impl AdvQueue {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(AdvQueueInner {
                demands: VecDeque::new(),
                running_safe: 0,
                running_exclusive: false,
                in_active_list: false,
            }),
        })
    }

    fn len(&self) -> usize {
        self.inner.lock().demands.len()
    }
}

struct QueueSlot {
    queue: Arc<AdvQueue>,
    refs: usize,
}

struct ActiveList {
    queues: VecDeque<Arc<AdvQueue>>,
    closed: bool,
}

struct AdvPoolInner {
    name: String,
    env: Environment,
    active: Mutex<ActiveList>,
    available: Condvar,
    queues: Mutex<HashMap<QueueKey, QueueSlot>>,
    workers: Mutex<Vec<WorkThread>>,
    self_ref: OnceLock<Weak<AdvPoolInner>>,
}

impl AdvPoolInner {
    fn activate(&self, queue: &Arc<AdvQueue>) {
        let mut active = self.active.lock();
        if active.closed {
            return;
        }
        active.queues.push_back(Arc::clone(queue));
        drop(active);
        self.available.notify_one();
    }

    fn pop_active(&self) -> Option<Arc<AdvQueue>> {
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

    /// Reactivate `queue` if it still has work and is not already offered.
    fn reoffer(&self, queue: &Arc<AdvQueue>) {
        let mut inner = queue.inner.lock();
        if !inner.in_active_list && !inner.running_exclusive && !inner.demands.is_empty() {
            inner.in_active_list = true;
            drop(inner);
            self.activate(queue);
        }
    }

    fn worker_loop(&self, stats: &ActivityStats) {
        while let Some(queue) = stats.track_waiting(|| self.pop_active()) {
            let demand = {
                let mut inner = queue.inner.lock();
                if inner.running_exclusive {
                    // Will be re-offered when the exclusive demand ends.
                    inner.in_active_list = false;
                    continue;
                }
                match inner.demands.pop_front() {
                    Some(demand) => demand,
                    None => {
                        inner.in_active_list = false;
                        continue;
                    }
                }
            };

            // Handler resolution happens outside the queue lock.
            let resolution = demand.resolve();

            if resolution.thread_safe {
                {
                    let mut inner = queue.inner.lock();
                    if inner.running_exclusive {
                        // An exclusive demand slipped in; restore order and
                        // let the completion path re-offer the queue.
                        inner.demands.push_front(demand);
                        inner.in_active_list = false;
                        continue;
                    }
                    inner.running_safe += 1;
                    if inner.demands.is_empty() {
                        inner.in_active_list = false;
                    } else {
                        // Let another worker pick the next head demand
                        // while this one executes.
                        drop(inner);
                        self.activate(&queue);
                    }
                }
                stats.track_working(|| demand.execute_resolved(resolution));
                {
                    let mut inner = queue.inner.lock();
                    inner.running_safe -= 1;
                }
                self.reoffer(&queue);
            } else {
                let runnable = {
                    let mut inner = queue.inner.lock();
                    if inner.running_safe > 0 || inner.running_exclusive {
                        // Barrier: wait for the safe batch to drain.
                        inner.demands.push_front(demand);
                        inner.in_active_list = false;
                        None
                    } else {
                        inner.running_exclusive = true;
                        inner.in_active_list = false;
                        Some(demand)
                    }
                };
                if let Some(demand) = runnable {
                    stats.track_working(|| demand.execute_resolved(resolution));
                    {
                        let mut inner = queue.inner.lock();
                        inner.running_exclusive = false;
                    }
                    self.reoffer(&queue);
                }
            }
        }
    }
}

impl DispatcherRuntime for AdvPoolInner {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> DispatcherKind {
        DispatcherKind::AdvThreadPool
    }

    fn default_binder(&self) -> Arc<dyn DispBinder> {
        match self.self_ref.get().and_then(Weak::upgrade) {
            Some(inner) => Arc::new(AdvBinder {
                inner,
                params: AdvBindParams::default(),
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

struct AdvQueuePush {
    pool: Weak<AdvPoolInner>,
    queue: Arc<AdvQueue>,
}

impl EventQueue for AdvQueuePush {
    fn push(&self, demand: Demand) {
        let needs_activation = {
            let mut inner = self.queue.inner.lock();
            inner.demands.push_back(demand);
            if inner.in_active_list || inner.running_exclusive {
                false
            } else {
                inner.in_active_list = true;
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

struct AdvBinder {
    inner: Arc<AdvPoolInner>,
    params: AdvBindParams,
}

impl AdvBinder {
    fn key_for(&self, agent: &Arc<AgentCell>) -> QueueKey {
        match self.params.fifo {
            AdvFifoKind::Cooperation => match agent.runtime.coop() {
                Some(coop) => QueueKey::Coop(coop.id()),
                None => QueueKey::Agent(agent.runtime.ordinal()),
            },
            AdvFifoKind::Individual => QueueKey::Agent(agent.runtime.ordinal()),
        }
    }
}

impl DispBinder for AdvBinder {
    fn preallocate_resources(&self, agent: &Arc<AgentCell>) -> Result<()> {
        self.inner.env.ensure_running()?;
        let key = self.key_for(agent);
        let mut queues = self.inner.queues.lock();
        let slot = queues.entry(key).or_insert_with(|| QueueSlot {
            queue: AdvQueue::new(),
            refs: 0,
        });
        slot.refs += 1;
        Ok(())
    }

    fn undo_preallocation(&self, agent: &Arc<AgentCell>) {
        let key = self.key_for(agent);
        let mut queues = self.inner.queues.lock();
        if let Some(slot) = queues.get_mut(&key) {
            slot.refs -= 1;
            if slot.refs == 0 {
                queues.remove(&key);
            }
        }
    }

    fn bind(&self, agent: &Arc<AgentCell>) {
        let key = self.key_for(agent);
        let queue = {
            let queues = self.inner.queues.lock();
            queues.get(&key).map(|slot| Arc::clone(&slot.queue))
        };
        if let Some(queue) = queue {
            agent.runtime.bind_queue(Arc::new(AdvQueuePush {
                pool: Arc::downgrade(&self.inner),
                queue,
            }));
        }
    }

    fn unbind(&self, agent: &Arc<AgentCell>) {
        agent.runtime.unbind_queue();
        self.undo_preallocation(agent);
    }
}

/// Handle of an `adv_thread_pool` dispatcher.
#[derive(Clone)]
pub struct AdvThreadPoolDispatcher {
    inner: Arc<AdvPoolInner>,
}

impl AdvThreadPoolDispatcher {
    /// Binder with the given per-binding parameters.
    pub fn binder(&self, params: AdvBindParams) -> Arc<dyn DispBinder> {
        Arc::new(AdvBinder {
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

/// Create an `adv_thread_pool` dispatcher with `params.thread_count`
/// workers.
pub fn make_dispatcher(
    env: &Environment,
    name: &str,
    params: AdvThreadPoolParams,
) -> Result<AdvThreadPoolDispatcher> {
    env.ensure_running()?;
    if name.is_empty() {
        return Err(Error::EmptyName);
    }

    let inner = Arc::new(AdvPoolInner {
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
            format!("troupe-atp-{name}-{index}"),
            ActivityStats::new(enabled),
            move |stats| pool.worker_loop(&stats),
        )?);
    }
    *inner.workers.lock() = workers;

    env.register_dispatcher(Arc::clone(&inner) as Arc<dyn DispatcherRuntime>);
    Ok(AdvThreadPoolDispatcher { inner })
}
