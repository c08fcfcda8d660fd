//! Sorted-list timer back-end.
//!
//! A `BTreeMap` ordered by `(deadline, sequence)`. Insertion is O(log n)
//! like the heap, but cancellation-by-key and ordered traversal are cheap,
//! which suits small and mostly-ordered timer sets.

// Layer 1: Standard library imports
use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

// Layer 2: Third-party crate imports
use parking_lot::{Condvar, Mutex};

// Layer 3: Internal module imports
use super::{TimerAction, TimerCtl, TimerThread};

struct Entry {
    period: Option<Duration>,
    action: TimerAction,
    ctl: Arc<TimerCtl>,
}

struct ListState {
    entries: BTreeMap<(Instant, u64), Entry>,
    next_seq: u64,
    closed: bool,
}

struct Shared {
    state: Mutex<ListState>,
    changed: Condvar,
}

pub(crate) struct ListTimerThread {
    shared: Arc<Shared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ListTimerThread {
    pub(crate) fn start() -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(ListState {
                entries: BTreeMap::new(),
                next_seq: 0,
                closed: false,
            }),
            changed: Condvar::new(),
        });

        let loop_shared = Arc::clone(&shared);
        let handle = std::thread::Builder::new()
            .name("troupe-timer-list".to_string())
            .spawn(move || timer_loop(&loop_shared))
            .ok();

        Self {
            shared,
            handle: Mutex::new(handle),
        }
    }
}

fn timer_loop(shared: &Shared) {
    loop {
        let due: Vec<(Instant, Entry)> = {
            let mut state = shared.state.lock();
            loop {
                if state.closed {
                    for (_, entry) in std::mem::take(&mut state.entries) {
                        entry.ctl.finish();
                    }
                    return;
                }

                let now = Instant::now();
                let next_at = state.entries.keys().next().map(|(at, _)| *at);
                match next_at {
                    Some(at) if at <= now => break,
                    Some(at) => {
                        shared.changed.wait_for(&mut state, at - now);
                    }
                    None => shared.changed.wait(&mut state),
                }
            }

            let now = Instant::now();
            let mut due = Vec::new();
            while let Some((&(at, seq), _)) = state.entries.iter().next() {
                if at > now {
                    break;
                }
                if let Some(entry) = state.entries.remove(&(at, seq)) {
                    due.push((at, entry));
                }
            }
            due
        };

        for (fired_at, entry) in due {
            if entry.ctl.is_done() {
                continue;
            }
            entry.action.fire();
            match entry.period {
                Some(period) => {
                    let mut state = shared.state.lock();
                    if !state.closed && !entry.ctl.is_done() {
                        let seq = state.next_seq;
                        state.next_seq += 1;
                        state.entries.insert((fired_at + period, seq), entry);
                    } else {
                        entry.ctl.finish();
                    }
                }
                None => entry.ctl.finish(),
            }
        }
    }
}

impl TimerThread for ListTimerThread {
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
        let seq = state.next_seq;
        state.next_seq += 1;
        state.entries.insert(
            (Instant::now() + after, seq),
            Entry {
                period,
                action,
                ctl,
            },
        );
        drop(state);
        self.shared.changed.notify_one();
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
