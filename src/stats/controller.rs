//! The stats controller and its distribution thread.

// Layer 1: Standard library imports
use std::sync::{Arc, OnceLock, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

// Layer 2: Third-party crate imports
use parking_lot::{Condvar, Mutex};

// Layer 3: Internal module imports
use crate::environment::env::{builtin_stats, EnvInner, Environment};
use crate::mailbox::MboxRef;
use crate::send::send;

use super::messages::Quantity;

/// A pluggable statistics probe.
pub trait StatsSource: Send + Sync + 'static {
    /// Publish the source's current samples on the stats mailbox.
    fn distribute(&self, mbox: &MboxRef);
}

struct CtlState {
    running: bool,
    closed: bool,
    period: Duration,
}

struct CtlInner {
    env: OnceLock<Weak<EnvInner>>,
    mbox: OnceLock<MboxRef>,
    sources: Mutex<Vec<Weak<dyn StatsSource>>>,
    state: Mutex<CtlState>,
    changed: Condvar,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl CtlInner {
    fn distribute(&self) {
        let Some(mbox) = self.mbox.get() else {
            return;
        };
        if let Some(env) = self.env.get().and_then(Weak::upgrade) {
            for (prefix, suffix, value) in builtin_stats(env.as_ref()) {
                let outcome = send(
                    mbox,
                    Quantity {
                        prefix,
                        suffix,
                        value,
                    },
                );
                if let Err(error) = outcome {
                    tracing::warn!(%error, "stats distribution failed");
                }
            }
        }

        let sources: Vec<Arc<dyn StatsSource>> = {
            let mut list = self.sources.lock();
            list.retain(|weak| weak.strong_count() > 0);
            list.iter().filter_map(Weak::upgrade).collect()
        };
        for source in sources {
            source.distribute(mbox);
        }
    }

    fn run(&self) {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return;
            }
            if !state.running {
                self.changed.wait(&mut state);
                continue;
            }
            let period = state.period;
            let timed_out = self.changed.wait_for(&mut state, period).timed_out();
            if state.closed {
                return;
            }
            if timed_out && state.running {
                drop(state);
                self.distribute();
                state = self.state.lock();
            }
        }
    }
}

/// Controller of run-time statistics distribution.
///
/// Distribution is off by default; `turn_on` starts periodic sampling onto
/// the controller's mailbox.
#[derive(Clone)]
pub struct StatsController {
    inner: Arc<CtlInner>,
}

impl StatsController {
    pub(crate) fn new(period: Duration) -> Self {
        Self {
            inner: Arc::new(CtlInner {
                env: OnceLock::new(),
                mbox: OnceLock::new(),
                sources: Mutex::new(Vec::new()),
                state: Mutex::new(CtlState {
                    running: false,
                    closed: false,
                    period,
                }),
                changed: Condvar::new(),
                thread: Mutex::new(None),
            }),
        }
    }

    pub(crate) fn attach(&self, env: &Environment) {
        let _ = self.inner.env.set(Arc::downgrade(env.inner()));
        let _ = self.inner.mbox.set(env.create_mbox());
    }

    /// The mailbox `Quantity` samples are published on.
    pub fn mbox(&self) -> Option<MboxRef> {
        self.inner.mbox.get().map(Arc::clone)
    }

    /// Start periodic distribution.
    pub fn turn_on(&self) {
        {
            let mut state = self.inner.state.lock();
            if state.closed {
                return;
            }
            state.running = true;
        }
        self.inner.changed.notify_all();

        let mut thread = self.inner.thread.lock();
        if thread.is_none() {
            let inner = Arc::clone(&self.inner);
            *thread = std::thread::Builder::new()
                .name("troupe-stats".to_string())
                .spawn(move || inner.run())
                .ok();
        }
    }

    /// Pause distribution.
    pub fn turn_off(&self) {
        self.inner.state.lock().running = false;
        self.inner.changed.notify_all();
    }

    /// Change the distribution period; takes effect at the next tick.
    pub fn set_distribution_period(&self, period: Duration) {
        self.inner.state.lock().period = period;
        self.inner.changed.notify_all();
    }

    /// Register a custom probe; held weakly.
    pub fn add_source(&self, source: &Arc<dyn StatsSource>) {
        self.inner.sources.lock().push(Arc::downgrade(source));
    }

    pub(crate) fn shutdown_and_join(&self) {
        {
            let mut state = self.inner.state.lock();
            state.closed = true;
        }
        self.inner.changed.notify_all();
        let handle = self.inner.thread.lock().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}
