//! `prio_one_thread::strictly_ordered`: a single worker that always drains
//! the highest-priority non-empty FIFO first.

// Layer 1: Standard library imports
use std::collections::VecDeque;
use std::sync::{Arc, OnceLock, Weak};

// Layer 2: Third-party crate imports
use parking_lot::{Condvar, Mutex};

// Layer 3: Internal module imports
use crate::agent::runtime::AgentCell;
use crate::environment::Environment;
use crate::error::{Error, Result};
use crate::queue::{Demand, EventQueue};
use crate::util::PRIORITIES_COUNT;

use super::super::work_thread::{ActivityStats, ActivityTracking, WorkThread};
use super::super::{DispBinder, DispatcherKind, DispatcherRuntime};

struct PrioQueues {
    demands: [VecDeque<Demand>; PRIORITIES_COUNT],
    closed: bool,
}

impl PrioQueues {
    fn pop_highest(&mut self) -> Option<Demand> {
        for queue in self.demands.iter_mut().rev() {
            if let Some(demand) = queue.pop_front() {
                return Some(demand);
            }
        }
        None
    }

    fn len(&self) -> usize {
        self.demands.iter().map(VecDeque::len).sum()
    }
}

pub(crate) struct StrictlyOrderedInner {
    name: String,
    queues: Mutex<PrioQueues>,
    available: Condvar,
    worker: Mutex<Option<WorkThread>>,
    self_ref: OnceLock<Weak<StrictlyOrderedInner>>,
}

impl StrictlyOrderedInner {
    fn push(&self, priority: usize, demand: Demand) {
        let mut queues = self.queues.lock();
        if queues.closed {
            return;
        }
        queues.demands[priority].push_back(demand);
        drop(queues);
        self.available.notify_one();
    }

    fn pop(&self) -> Option<Demand> {
        let mut queues = self.queues.lock();
        loop {
            if let Some(demand) = queues.pop_highest() {
                return Some(demand);
            }
            if queues.closed {
                return None;
            }
            self.available.wait(&mut queues);
        }
    }
}

impl DispatcherRuntime for StrictlyOrderedInner {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> DispatcherKind {
        DispatcherKind::PrioStrictlyOrdered
    }

    fn default_binder(&self) -> Arc<dyn DispBinder> {
        match self.self_ref.get().and_then(Weak::upgrade) {
            Some(inner) => Arc::new(StrictlyOrderedBinder { inner }),
            None => Arc::new(super::super::NullBinder),
        }
    }

    fn shutdown(&self) {
        let mut queues = self.queues.lock();
        queues.closed = true;
        for queue in &mut queues.demands {
            queue.clear();
        }
        drop(queues);
        self.available.notify_all();
    }

    fn wait(&self) -> Result<()> {
        let worker = self.worker.lock().take();
        match worker {
            Some(worker) => worker.join(),
            None => Ok(()),
        }
    }

    fn stats_snapshot(&self) -> (usize, usize) {
        (1, self.queues.lock().len())
    }

    fn activity_snapshot(&self) -> Option<super::super::work_thread::ActivitySnapshot> {
        self.worker
            .lock()
            .as_ref()
            .and_then(|worker| worker.activity().snapshot())
    }
}

struct PrioPush {
    inner: Arc<StrictlyOrderedInner>,
    priority: usize,
}

impl EventQueue for PrioPush {
    fn push(&self, demand: Demand) {
        self.inner.push(self.priority, demand);
    }
}

struct StrictlyOrderedBinder {
    inner: Arc<StrictlyOrderedInner>,
}

impl DispBinder for StrictlyOrderedBinder {
    fn preallocate_resources(&self, _agent: &Arc<AgentCell>) -> Result<()> {
        Ok(())
    }

    fn undo_preallocation(&self, _agent: &Arc<AgentCell>) {}

    fn bind(&self, agent: &Arc<AgentCell>) {
        agent.runtime.bind_queue(Arc::new(PrioPush {
            inner: Arc::clone(&self.inner),
            priority: agent.runtime.priority().index(),
        }));
    }

    fn unbind(&self, agent: &Arc<AgentCell>) {
        agent.runtime.unbind_queue();
    }
}

/// Handle of a `strictly_ordered` priority dispatcher.
#[derive(Clone)]
pub struct StrictlyOrderedDispatcher {
    inner: Arc<StrictlyOrderedInner>,
}

impl StrictlyOrderedDispatcher {
    /// Binder routing each agent by its priority.
    pub fn binder(&self) -> Arc<dyn DispBinder> {
        self.inner.default_binder()
    }

    /// Signal the worker to stop after its current demand.
    pub fn shutdown(&self) {
        DispatcherRuntime::shutdown(&*self.inner);
    }

    /// Join the worker.
    pub fn wait(&self) -> Result<()> {
        DispatcherRuntime::wait(&*self.inner)
    }
}

/// Create a `strictly_ordered` priority dispatcher.
pub fn make_dispatcher(
    env: &Environment,
    name: &str,
    tracking: ActivityTracking,
) -> Result<StrictlyOrderedDispatcher> {
    env.ensure_running()?;
    if name.is_empty() {
        return Err(Error::EmptyName);
    }

    let inner = Arc::new(StrictlyOrderedInner {
        name: name.to_string(),
        queues: Mutex::new(PrioQueues {
            demands: Default::default(),
            closed: false,
        }),
        available: Condvar::new(),
        worker: Mutex::new(None),
        self_ref: OnceLock::new(),
    });
    let _ = inner.self_ref.set(Arc::downgrade(&inner));

    let enabled = tracking.resolve(env.activity_tracking_default());
    let loop_inner = Arc::clone(&inner);
    let worker = WorkThread::spawn(
        env.work_thread_factory().as_ref(),
        format!("troupe-pso-{name}"),
        ActivityStats::new(enabled),
        move |stats| loop {
            let demand = stats.track_waiting(|| loop_inner.pop());
            match demand {
                Some(demand) => stats.track_working(|| demand.execute()),
                None => break,
            }
        },
    )?;
    *inner.worker.lock() = Some(worker);

    env.register_dispatcher(Arc::clone(&inner) as Arc<dyn DispatcherRuntime>);
    Ok(StrictlyOrderedDispatcher { inner })
}
