//! Cooperation repository and the deregistration service thread.

// Layer 1: Standard library imports
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

// Layer 2: Third-party crate imports
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};

// Layer 3: Internal module imports
use crate::util::CoopId;

use super::coop::CoopInner;

/// Registry of live cooperations plus counters for stats.
#[derive(Default)]
pub(crate) struct CoopRepository {
    coops: DashMap<CoopId, Arc<CoopInner>>,
    registered: AtomicUsize,
}

impl CoopRepository {
    pub(crate) fn insert(&self, coop: &Arc<CoopInner>) {
        self.coops.insert(coop.id(), Arc::clone(coop));
        self.registered.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn remove(&self, id: CoopId) {
        if self.coops.remove(&id).is_some() {
            self.registered.fetch_sub(1, Ordering::AcqRel);
        }
    }

    pub(crate) fn count(&self) -> usize {
        self.registered.load(Ordering::Acquire)
    }

    pub(crate) fn deregistering_count(&self) -> usize {
        self.coops
            .iter()
            .filter(|entry| entry.is_deregistering())
            .count()
    }

    pub(crate) fn total_agents(&self) -> usize {
        self.coops.iter().map(|entry| entry.agent_count()).sum()
    }

    /// Snapshot of every live cooperation (used at environment shutdown).
    pub(crate) fn snapshot(&self) -> Vec<Arc<CoopInner>> {
        self.coops
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }
}

struct DeregQueue {
    pending: VecDeque<Arc<CoopInner>>,
    closed: bool,
}

/// Dedicated thread executing final deregistrations.
///
/// Unbinding joins dedicated workers (`active_obj`, `active_group`); doing
/// that from the last agent's own worker would be a self-join.
pub(crate) struct DeregService {
    queue: Arc<(Mutex<DeregQueue>, Condvar)>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl DeregService {
    pub(crate) fn start() -> Self {
        let queue = Arc::new((
            Mutex::new(DeregQueue {
                pending: VecDeque::new(),
                closed: false,
            }),
            Condvar::new(),
        ));

        let loop_queue = Arc::clone(&queue);
        let handle = std::thread::Builder::new()
            .name("troupe-coop-dereg".to_string())
            .spawn(move || loop {
                let coop = {
                    let (lock, cv) = &*loop_queue;
                    let mut state = lock.lock();
                    loop {
                        if let Some(coop) = state.pending.pop_front() {
                            break coop;
                        }
                        if state.closed {
                            return;
                        }
                        cv.wait(&mut state);
                    }
                };
                coop.finalize();
            })
            .ok();

        Self {
            queue,
            handle: Mutex::new(handle),
        }
    }

    pub(crate) fn schedule(&self, coop: Arc<CoopInner>) {
        let (lock, cv) = &*self.queue;
        let mut state = lock.lock();
        if state.closed {
            // Late stragglers during teardown are finalized inline.
            drop(state);
            coop.finalize();
            return;
        }
        state.pending.push_back(coop);
        drop(state);
        cv.notify_one();
    }

    pub(crate) fn shutdown_and_join(&self) {
        {
            let (lock, cv) = &*self.queue;
            let mut state = lock.lock();
            state.closed = true;
            drop(state);
            cv.notify_all();
        }
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}
