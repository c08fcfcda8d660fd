//! `active_group` dispatcher: one worker per named group, reference-counted
//! on the agents bound through it.

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

/// Tuning of an `active_group` dispatcher.
#[derive(Debug, Default, Clone, Copy)]
pub struct ActiveGroupParams {
    pub(crate) activity_tracking: ActivityTracking,
}

impl ActiveGroupParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the environment-wide activity-tracking setting.
    pub fn activity_tracking(mut self, tracking: ActivityTracking) -> Self {
        self.activity_tracking = tracking;
        self
    }
}

struct GroupEntry {
    queue: Arc<DemandQueue>,
    worker: WorkThread,
    refs: usize,
}

struct ActiveGroupInner {
    name: String,
    env: Environment,
    track_activity: bool,
    groups: Mutex<HashMap<String, GroupEntry>>,
    self_ref: OnceLock<Weak<ActiveGroupInner>>,
}

impl ActiveGroupInner {
    fn acquire_group(&self, group: &str) -> Result<Arc<DemandQueue>> {
        let mut groups = self.groups.lock();
        if let Some(entry) = groups.get_mut(group) {
            entry.refs += 1;
            return Ok(Arc::clone(&entry.queue));
        }

        let queue = Arc::new(DemandQueue::new(QueueLockPolicy::Sleep));
        let loop_queue = Arc::clone(&queue);
        let worker = WorkThread::spawn(
            self.env.work_thread_factory().as_ref(),
            format!("troupe-ag-{}-{}", self.name, group),
            ActivityStats::new(self.track_activity),
            move |stats| worker_loop(&loop_queue, &stats),
        )?;
        groups.insert(
            group.to_string(),
            GroupEntry {
                queue: Arc::clone(&queue),
                worker,
                refs: 1,
            },
        );
        Ok(queue)
    }

    fn release_group(&self, group: &str) {
        let entry = {
            let mut groups = self.groups.lock();
            match groups.get_mut(group) {
                Some(entry) => {
                    entry.refs -= 1;
                    if entry.refs == 0 {
                        groups.remove(group)
                    } else {
                        None
                    }
                }
                None => None,
            }
        };
        if let Some(entry) = entry {
            entry.queue.close();
            if let Err(error) = entry.worker.join() {
                tracing::error!(%error, group, "active_group worker join failed");
            }
        }
    }
}

impl DispatcherRuntime for ActiveGroupInner {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> DispatcherKind {
        DispatcherKind::ActiveGroup
    }

    fn default_binder(&self) -> Arc<dyn DispBinder> {
        match self.self_ref.get().and_then(Weak::upgrade) {
            Some(inner) => Arc::new(ActiveGroupBinder {
                inner,
                group: "default".to_string(),
            }),
            None => Arc::new(super::NullBinder),
        }
    }

    fn shutdown(&self) {
        for entry in self.groups.lock().values() {
            entry.queue.close();
        }
    }

    fn wait(&self) -> Result<()> {
        let names: Vec<String> = self.groups.lock().keys().cloned().collect();
        for name in names {
            let entry = self.groups.lock().remove(&name);
            if let Some(entry) = entry {
                entry.queue.close();
                entry.worker.join()?;
            }
        }
        Ok(())
    }

    fn stats_snapshot(&self) -> (usize, usize) {
        let groups = self.groups.lock();
        let demands = groups.values().map(|e| e.queue.len()).sum();
        (groups.len(), demands)
    }

    fn activity_snapshot(&self) -> Option<super::work_thread::ActivitySnapshot> {
        if !self.track_activity {
            return None;
        }
        let groups = self.groups.lock();
        let mut total = super::work_thread::ActivitySnapshot {
            working_ns: 0,
            waiting_ns: 0,
        };
        for entry in groups.values() {
            if let Some(snapshot) = entry.worker.activity().snapshot() {
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

struct ActiveGroupBinder {
    inner: Arc<ActiveGroupInner>,
    group: String,
}

impl DispBinder for ActiveGroupBinder {
    fn preallocate_resources(&self, _agent: &Arc<AgentCell>) -> Result<()> {
        self.inner.env.ensure_running()?;
        self.inner.acquire_group(&self.group).map(|_| ())
    }

    fn undo_preallocation(&self, _agent: &Arc<AgentCell>) {
        self.inner.release_group(&self.group);
    }

    fn bind(&self, agent: &Arc<AgentCell>) {
        let groups = self.inner.groups.lock();
        if let Some(entry) = groups.get(&self.group) {
            agent.runtime.bind_queue(Arc::new(QueuePush {
                queue: Arc::clone(&entry.queue),
            }));
        }
    }

    fn unbind(&self, agent: &Arc<AgentCell>) {
        agent.runtime.unbind_queue();
        self.inner.release_group(&self.group);
    }
}

/// Handle of an `active_group` dispatcher.
#[derive(Clone)]
pub struct ActiveGroupDispatcher {
    inner: Arc<ActiveGroupInner>,
}

impl ActiveGroupDispatcher {
    /// Binder attaching agents to the named group's worker.
    pub fn binder(&self, group: &str) -> Result<Arc<dyn DispBinder>> {
        if group.is_empty() {
            return Err(Error::EmptyName);
        }
        Ok(Arc::new(ActiveGroupBinder {
            inner: Arc::clone(&self.inner),
            group: group.to_string(),
        }))
    }

    /// Stop accepting demands in every group.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }

    /// Join every group worker.
    pub fn wait(&self) -> Result<()> {
        self.inner.wait()
    }

    /// Number of currently live groups.
    pub fn group_count(&self) -> usize {
        self.inner.groups.lock().len()
    }
}

/// Create an `active_group` dispatcher.
pub fn make_dispatcher(
    env: &Environment,
    name: &str,
    params: ActiveGroupParams,
) -> Result<ActiveGroupDispatcher> {
    env.ensure_running()?;
    if name.is_empty() {
        return Err(Error::EmptyName);
    }
    let inner = Arc::new(ActiveGroupInner {
        name: name.to_string(),
        env: env.clone(),
        track_activity: params
            .activity_tracking
            .resolve(env.activity_tracking_default()),
        groups: Mutex::new(HashMap::new()),
        self_ref: OnceLock::new(),
    });
    let _ = inner.self_ref.set(Arc::downgrade(&inner));
    env.register_dispatcher(Arc::clone(&inner) as Arc<dyn DispatcherRuntime>);
    Ok(ActiveGroupDispatcher { inner })
}
