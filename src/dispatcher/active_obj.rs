//! `active_obj` dispatcher: one dedicated worker per bound agent.

// Layer 1: Standard library imports
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, Weak};

// Layer 2: Third-party crate imports
use parking_lot::Mutex;

// Layer 3: Internal module imports
use crate::agent::runtime::AgentCell;
use crate::environment::Environment;
use crate::error::{Error, Result};
use crate::queue::{Demand, EventQueue};

use super::one_thread::worker_loop;
use super::queue::{DemandQueue, QueueLockPolicy};
use super::work_thread::{ActivityStats, ActivityTracking, WorkThread};
use super::{DispBinder, DispatcherKind, DispatcherRuntime};

/// Tuning of an `active_obj` dispatcher.
#[derive(Debug, Default, Clone, Copy)]
pub struct ActiveObjParams {
    pub(crate) activity_tracking: ActivityTracking,
}

impl ActiveObjParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the environment-wide activity-tracking setting.
    pub fn activity_tracking(mut self, tracking: ActivityTracking) -> Self {
        self.activity_tracking = tracking;
        self
    }
}

struct AgentWorker {
    queue: Arc<DemandQueue>,
    worker: WorkThread,
}

struct ActiveObjInner {
    name: String,
    env: Environment,
    track_activity: bool,
    workers: Mutex<HashMap<u64, AgentWorker>>,
    self_ref: OnceLock<Weak<ActiveObjInner>>,
}

impl ActiveObjInner {
    fn stop_worker(&self, ordinal: u64) {
        let removed = self.workers.lock().remove(&ordinal);
        if let Some(worker) = removed {
            worker.queue.close();
            if let Err(error) = worker.worker.join() {
                tracing::error!(%error, "active_obj worker join failed");
            }
        }
    }
}

impl DispatcherRuntime for ActiveObjInner {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> DispatcherKind {
        DispatcherKind::ActiveObj
    }

    fn default_binder(&self) -> Arc<dyn DispBinder> {
        match self.self_ref.get().and_then(Weak::upgrade) {
            Some(inner) => Arc::new(ActiveObjBinder { inner }),
            None => Arc::new(super::NullBinder),
        }
    }

    fn shutdown(&self) {
        for worker in self.workers.lock().values() {
            worker.queue.close();
        }
    }

    fn wait(&self) -> Result<()> {
        let ordinals: Vec<u64> = self.workers.lock().keys().copied().collect();
        for ordinal in ordinals {
            self.stop_worker(ordinal);
        }
        Ok(())
    }

    fn stats_snapshot(&self) -> (usize, usize) {
        let workers = self.workers.lock();
        let demands = workers.values().map(|w| w.queue.len()).sum();
        (workers.len(), demands)
    }

    fn activity_snapshot(&self) -> Option<super::work_thread::ActivitySnapshot> {
        if !self.track_activity {
            return None;
        }
        let workers = self.workers.lock();
        let mut total = super::work_thread::ActivitySnapshot {
            working_ns: 0,
            waiting_ns: 0,
        };
        for worker in workers.values() {
            if let Some(snapshot) = worker.worker.activity().snapshot() {
                total.working_ns += snapshot.working_ns;
                total.waiting_ns += snapshot.waiting_ns;
            }
        }
        Some(total)
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

struct ActiveObjBinder {
    inner: Arc<ActiveObjInner>,
}

impl DispBinder for ActiveObjBinder {
    fn preallocate_resources(&self, agent: &Arc<AgentCell>) -> Result<()> {
        self.inner.env.ensure_running()?;
        let ordinal = agent.runtime.ordinal();
        let queue = Arc::new(DemandQueue::new(QueueLockPolicy::Sleep));
        let loop_queue = Arc::clone(&queue);
        let worker = WorkThread::spawn(
            self.inner.env.work_thread_factory().as_ref(),
            format!("troupe-ao-{}-{}", self.inner.name, ordinal),
            ActivityStats::new(self.inner.track_activity),
            move |stats| worker_loop(&loop_queue, &stats),
        )?;
        self.inner
            .workers
            .lock()
            .insert(ordinal, AgentWorker { queue, worker });
        Ok(())
    }

    fn undo_preallocation(&self, agent: &Arc<AgentCell>) {
        self.inner.stop_worker(agent.runtime.ordinal());
    }

    fn bind(&self, agent: &Arc<AgentCell>) {
        let workers = self.inner.workers.lock();
        if let Some(worker) = workers.get(&agent.runtime.ordinal()) {
            agent.runtime.bind_queue(Arc::new(QueuePush {
                queue: Arc::clone(&worker.queue),
            }));
        }
    }

    fn unbind(&self, agent: &Arc<AgentCell>) {
        agent.runtime.unbind_queue();
        self.inner.stop_worker(agent.runtime.ordinal());
    }
}

/// Handle of an `active_obj` dispatcher.
#[derive(Clone)]
pub struct ActiveObjDispatcher {
    inner: Arc<ActiveObjInner>,
}

impl ActiveObjDispatcher {
    /// Binder giving each bound agent its own worker thread.
    pub fn binder(&self) -> Arc<dyn DispBinder> {
        Arc::new(ActiveObjBinder {
            inner: Arc::clone(&self.inner),
        })
    }

    /// Stop accepting demands on every agent worker.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }

    /// Join every agent worker.
    pub fn wait(&self) -> Result<()> {
        self.inner.wait()
    }
}

/// Create an `active_obj` dispatcher.
pub fn make_dispatcher(
    env: &Environment,
    name: &str,
    params: ActiveObjParams,
) -> Result<ActiveObjDispatcher> {
    env.ensure_running()?;
    if name.is_empty() {
        return Err(Error::EmptyName);
    }
    let inner = Arc::new(ActiveObjInner {
        name: name.to_string(),
        env: env.clone(),
        track_activity: params
            .activity_tracking
            .resolve(env.activity_tracking_default()),
        workers: Mutex::new(HashMap::new()),
        self_ref: OnceLock::new(),
    });
    let _ = inner.self_ref.set(Arc::downgrade(&inner));
    env.register_dispatcher(Arc::clone(&inner) as Arc<dyn DispatcherRuntime>);
    Ok(ActiveObjDispatcher { inner })
}
