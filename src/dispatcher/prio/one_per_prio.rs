//! `prio_dedicated_threads::one_per_prio`: eight workers, one per priority
//! level.

// Layer 1: Standard library imports
use std::sync::{Arc, OnceLock, Weak};

// Layer 2: Third-party crate imports
use parking_lot::Mutex;

// Layer 3: Internal module imports
use crate::agent::runtime::AgentCell;
use crate::environment::Environment;
use crate::error::{Error, Result};
use crate::queue::{Demand, EventQueue};
use crate::util::PRIORITIES_COUNT;

use super::super::one_thread::worker_loop;
use super::super::queue::{DemandQueue, QueueLockPolicy};
use super::super::work_thread::{ActivityStats, ActivityTracking, WorkThread};
use super::super::{DispBinder, DispatcherKind, DispatcherRuntime};

pub(crate) struct OnePerPrioInner {
    name: String,
    queues: Vec<Arc<DemandQueue>>,
    workers: Mutex<Vec<WorkThread>>,
    self_ref: OnceLock<Weak<OnePerPrioInner>>,
}

impl DispatcherRuntime for OnePerPrioInner {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> DispatcherKind {
        DispatcherKind::PrioOnePerPrio
    }

    fn default_binder(&self) -> Arc<dyn DispBinder> {
        match self.self_ref.get().and_then(Weak::upgrade) {
            Some(inner) => Arc::new(OnePerPrioBinder { inner }),
            None => Arc::new(super::super::NullBinder),
        }
    }

    fn shutdown(&self) {
        for queue in &self.queues {
            queue.close();
        }
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
        let demands = self.queues.iter().map(|q| q.len()).sum();
        (PRIORITIES_COUNT, demands)
    }

    fn activity_snapshot(&self) -> Option<super::super::work_thread::ActivitySnapshot> {
        let workers = self.workers.lock();
        let mut total = super::super::work_thread::ActivitySnapshot {
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

struct QueuePush {
    queue: Arc<DemandQueue>,
}

impl EventQueue for QueuePush {
    fn push(&self, demand: Demand) {
        self.queue.push(demand);
    }
}

struct OnePerPrioBinder {
    inner: Arc<OnePerPrioInner>,
}

impl DispBinder for OnePerPrioBinder {
    fn preallocate_resources(&self, _agent: &Arc<AgentCell>) -> Result<()> {
        Ok(())
    }

    fn undo_preallocation(&self, _agent: &Arc<AgentCell>) {}

    fn bind(&self, agent: &Arc<AgentCell>) {
        let queue = &self.inner.queues[agent.runtime.priority().index()];
        agent.runtime.bind_queue(Arc::new(QueuePush {
            queue: Arc::clone(queue),
        }));
    }

    fn unbind(&self, agent: &Arc<AgentCell>) {
        agent.runtime.unbind_queue();
    }
}

/// Handle of a `one_per_prio` dispatcher.
#[derive(Clone)]
pub struct OnePerPrioDispatcher {
    inner: Arc<OnePerPrioInner>,
}

impl OnePerPrioDispatcher {
    /// Binder routing each agent to the worker of its priority.
    pub fn binder(&self) -> Arc<dyn DispBinder> {
        self.inner.default_binder()
    }

    /// Signal all workers to stop after their current demand.
    pub fn shutdown(&self) {
        DispatcherRuntime::shutdown(&*self.inner);
    }

    /// Join all workers.
    pub fn wait(&self) -> Result<()> {
        DispatcherRuntime::wait(&*self.inner)
    }
}

/// Create a `one_per_prio` dispatcher: eight workers, one per priority.
pub fn make_dispatcher(
    env: &Environment,
    name: &str,
    tracking: ActivityTracking,
) -> Result<OnePerPrioDispatcher> {
    env.ensure_running()?;
    if name.is_empty() {
        return Err(Error::EmptyName);
    }

    let queues: Vec<Arc<DemandQueue>> = (0..PRIORITIES_COUNT)
        .map(|_| Arc::new(DemandQueue::new(QueueLockPolicy::Sleep)))
        .collect();

    let inner = Arc::new(OnePerPrioInner {
        name: name.to_string(),
        queues,
        workers: Mutex::new(Vec::new()),
        self_ref: OnceLock::new(),
    });
    let _ = inner.self_ref.set(Arc::downgrade(&inner));

    let enabled = tracking.resolve(env.activity_tracking_default());
    let mut workers = Vec::with_capacity(PRIORITIES_COUNT);
    for priority in 0..PRIORITIES_COUNT {
        let queue = Arc::clone(&inner.queues[priority]);
        workers.push(WorkThread::spawn(
            env.work_thread_factory().as_ref(),
            format!("troupe-opp-{name}-p{priority}"),
            ActivityStats::new(enabled),
            move |stats| worker_loop(&queue, &stats),
        )?);
    }
    *inner.workers.lock() = workers;

    env.register_dispatcher(Arc::clone(&inner) as Arc<dyn DispatcherRuntime>);
    Ok(OnePerPrioDispatcher { inner })
}
