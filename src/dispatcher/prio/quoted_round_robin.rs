//! `prio_one_thread::quoted_round_robin`: a single worker that processes up
//! to `quote[p]` demands at priority `p` before rotating to the next lower
//! priority.

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
use super::PrioQuotes;

struct PrioQueues {
    demands: [VecDeque<Demand>; PRIORITIES_COUNT],
    closed: bool,
}

impl PrioQueues {
    fn len(&self) -> usize {
        self.demands.iter().map(VecDeque::len).sum()
    }

    fn is_empty(&self) -> bool {
        self.demands.iter().all(VecDeque::is_empty)
    }
}

pub(crate) struct QuotedRoundRobinInner {
    name: String,
    quotes: PrioQuotes,
    queues: Mutex<PrioQueues>,
    available: Condvar,
    worker: Mutex<Option<WorkThread>>,
    self_ref: OnceLock<Weak<QuotedRoundRobinInner>>,
}

impl QuotedRoundRobinInner {
    fn push(&self, priority: usize, demand: Demand) {
        let mut queues = self.queues.lock();
        if queues.closed {
            return;
        }
        queues.demands[priority].push_back(demand);
        drop(queues);
        self.available.notify_one();
    }

    /// One full rotation: highest to lowest priority, bounded by quotes.
    /// Returns the demands to execute, or `None` on shutdown.
    fn collect_rotation(&self) -> Option<Vec<Demand>> {
        let mut queues = self.queues.lock();
        loop {
            if queues.closed {
                return None;
            }
            if !queues.is_empty() {
                break;
            }
            self.available.wait(&mut queues);
        }

        let mut batch = Vec::new();
        for priority in (0..PRIORITIES_COUNT).rev() {
            let quote = self.quotes.get(priority);
            for _ in 0..quote {
                match queues.demands[priority].pop_front() {
                    Some(demand) => batch.push(demand),
                    None => break,
                }
            }
        }
        Some(batch)
    }
}

impl DispatcherRuntime for QuotedRoundRobinInner {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> DispatcherKind {
        DispatcherKind::PrioQuotedRoundRobin
    }

    fn default_binder(&self) -> Arc<dyn DispBinder> {
        match self.self_ref.get().and_then(Weak::upgrade) {
            Some(inner) => Arc::new(QuotedRoundRobinBinder { inner }),
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
    inner: Arc<QuotedRoundRobinInner>,
    priority: usize,
}

impl EventQueue for PrioPush {
    fn push(&self, demand: Demand) {
        self.inner.push(self.priority, demand);
    }
}

struct QuotedRoundRobinBinder {
    inner: Arc<QuotedRoundRobinInner>,
}

impl DispBinder for QuotedRoundRobinBinder {
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

/// Handle of a `quoted_round_robin` priority dispatcher.
#[derive(Clone)]
pub struct QuotedRoundRobinDispatcher {
    inner: Arc<QuotedRoundRobinInner>,
}

impl QuotedRoundRobinDispatcher {
    /// Binder routing each agent by its priority.
    pub fn binder(&self) -> Arc<dyn DispBinder> {
        self.inner.default_binder()
    }

    /// Signal the worker to stop after its current rotation.
    pub fn shutdown(&self) {
        DispatcherRuntime::shutdown(&*self.inner);
    }

    /// Join the worker.
    pub fn wait(&self) -> Result<()> {
        DispatcherRuntime::wait(&*self.inner)
    }
}

/// Create a `quoted_round_robin` priority dispatcher.
pub fn make_dispatcher(
    env: &Environment,
    name: &str,
    quotes: PrioQuotes,
    tracking: ActivityTracking,
) -> Result<QuotedRoundRobinDispatcher> {
    env.ensure_running()?;
    if name.is_empty() {
        return Err(Error::EmptyName);
    }

    let inner = Arc::new(QuotedRoundRobinInner {
        name: name.to_string(),
        quotes,
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
        format!("troupe-prr-{name}"),
        ActivityStats::new(enabled),
        move |stats| loop {
            let batch = stats.track_waiting(|| loop_inner.collect_rotation());
            match batch {
                Some(batch) => {
                    for demand in batch {
                        stats.track_working(|| demand.execute());
                    }
                }
                None => break,
            }
        },
    )?;
    *inner.worker.lock() = Some(worker);

    env.register_dispatcher(Arc::clone(&inner) as Arc<dyn DispatcherRuntime>);
    Ok(QuotedRoundRobinDispatcher { inner })
}
