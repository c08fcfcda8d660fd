//! Hashed timer-wheel back-end.
//!
//! Insertion is O(1) at the cost of a fixed tick granularity: a timer fires
//! on the first tick at or after its deadline.

// Layer 1: Standard library imports
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

// Layer 2: Third-party crate imports
use parking_lot::{Condvar, Mutex};

// Layer 3: Internal module imports
use super::{TimerAction, TimerCtl, TimerThread};

struct Entry {
    /// Remaining full wheel revolutions before the entry is due.
    rounds: u64,
    period: Option<Duration>,
    action: TimerAction,
    ctl: Arc<TimerCtl>,
}

struct WheelState {
    buckets: Vec<Vec<Entry>>,
    current: usize,
    closed: bool,
}

struct Shared {
    state: Mutex<WheelState>,
    changed: Condvar,
    tick: Duration,
}

pub(crate) struct WheelTimerThread {
    shared: Arc<Shared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl WheelTimerThread {
    pub(crate) fn start(tick: Duration, wheel_size: usize) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(WheelState {
                buckets: (0..wheel_size.max(2)).map(|_| Vec::new()).collect(),
                current: 0,
                closed: false,
            }),
            changed: Condvar::new(),
            tick: tick.max(Duration::from_millis(1)),
        });

        let loop_shared = Arc::clone(&shared);
        let handle = std::thread::Builder::new()
            .name("troupe-timer-wheel".to_string())
            .spawn(move || timer_loop(&loop_shared))
            .ok();

        Self {
            shared,
            handle: Mutex::new(handle),
        }
    }
}

fn insert_locked(state: &mut WheelState, tick: Duration, after: Duration, entry: Entry) {
    let size = state.buckets.len() as u64;
    let ticks = (after.as_nanos() / tick.as_nanos().max(1)) as u64;
    let bucket = (state.current as u64 + ticks % size) as usize % size as usize;
    let rounds = ticks / size;
    state.buckets[bucket].push(Entry { rounds, ..entry });
}

fn timer_loop(shared: &Shared) {
    loop {
        let due: Vec<Entry> = {
            let mut state = shared.state.lock();
            if state.closed {
                for bucket in &mut state.buckets {
                    for entry in bucket.drain(..) {
                        entry.ctl.finish();
                    }
                }
                return;
            }
            shared.changed.wait_for(&mut state, shared.tick);
            if state.closed {
                continue;
            }

            let current = state.current;
            state.current = (current + 1) % state.buckets.len();

            let bucket = &mut state.buckets[current];
            let mut due = Vec::new();
            let mut index = 0;
            while index < bucket.len() {
                if bucket[index].ctl.is_done() {
                    bucket.swap_remove(index);
                } else if bucket[index].rounds == 0 {
                    due.push(bucket.swap_remove(index));
                } else {
                    bucket[index].rounds -= 1;
                    index += 1;
                }
            }
            due
        };

        for entry in due {
            if entry.ctl.is_done() {
                continue;
            }
            entry.action.fire();
            match entry.period {
                Some(period) => {
                    let mut state = shared.state.lock();
                    if !state.closed && !entry.ctl.is_done() {
                        insert_locked(&mut state, shared.tick, period, entry);
                    } else {
                        entry.ctl.finish();
                    }
                }
                None => entry.ctl.finish(),
            }
        }
    }
}

impl TimerThread for WheelTimerThread {
    fn schedule(
        &self,
        after: Duration,
        period: Option<Duration>,
        action: TimerAction,
        ctl: Arc<TimerCtl>,
    ) {
        let mut state = self.shared.state.lock();
        if state.closed {
            ctl.finish();
            return;
        }
        insert_locked(
            &mut state,
            self.shared.tick,
            after,
            Entry {
                rounds: 0,
                period,
                action,
                ctl,
            },
        );
    }

    fn shutdown_and_join(&self) {
        {
            let mut state = self.shared.state.lock();
            state.closed = true;
        }
        self.shared.changed.notify_all();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}
