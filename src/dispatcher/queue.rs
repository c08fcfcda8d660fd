//! Shared FIFO demand queue used by the single-queue dispatcher variants.

// Layer 1: Standard library imports
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

// Layer 2: Third-party crate imports
use parking_lot::{Condvar, Mutex};

// Layer 3: Internal module imports
use crate::queue::Demand;

/// How waiting workers park on an empty queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum QueueLockPolicy {
    /// Condvar sleep; the default.
    Sleep,
    /// Short spin with yields before falling back to a timed sleep.
    /// Intended for agents that never block and produce steady load.
    Spin,
}

struct Inner {
    demands: VecDeque<Demand>,
    closed: bool,
}

pub(crate) struct DemandQueue {
    inner: Mutex<Inner>,
    available: Condvar,
    policy: QueueLockPolicy,
    size: AtomicUsize,
}

impl DemandQueue {
    pub(crate) fn new(policy: QueueLockPolicy) -> Self {
        Self {
            inner: Mutex::new(Inner {
                demands: VecDeque::new(),
                closed: false,
            }),
            available: Condvar::new(),
            policy,
            size: AtomicUsize::new(0),
        }
    }

    pub(crate) fn push(&self, demand: Demand) {
        let mut inner = self.inner.lock();
        if inner.closed {
            return;
        }
        inner.demands.push_back(demand);
        self.size.fetch_add(1, Ordering::Relaxed);
        drop(inner);
        self.available.notify_one();
    }

    /// Pop the next demand, blocking while the queue is open and empty.
    /// Returns `None` once the queue is closed and drained.
    pub(crate) fn pop(&self) -> Option<Demand> {
        const SPIN_ROUNDS: u32 = 64;

        loop {
            {
                let mut inner = self.inner.lock();
                loop {
                    if let Some(demand) = inner.demands.pop_front() {
                        self.size.fetch_sub(1, Ordering::Relaxed);
                        return Some(demand);
                    }
                    if inner.closed {
                        return None;
                    }
                    match self.policy {
                        QueueLockPolicy::Sleep => self.available.wait(&mut inner),
                        QueueLockPolicy::Spin => {
                            // Bounded sleep keeps the spin policy from
                            // burning a core on an idle queue.
                            self.available
                                .wait_for(&mut inner, Duration::from_micros(250));
                            break;
                        }
                    }
                }
            }
            for _ in 0..SPIN_ROUNDS {
                std::hint::spin_loop();
            }
            std::thread::yield_now();
        }
    }

    /// Close the queue: pending demands are dropped and waiting workers
    /// wake with `None`.
    pub(crate) fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        inner.demands.clear();
        self.size.store(0, Ordering::Relaxed);
        drop(inner);
        self.available.notify_all();
    }

    pub(crate) fn len(&self) -> usize {
        self.size.load(Ordering::Relaxed)
    }
}
