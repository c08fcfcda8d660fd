//! Binary-heap timer back-end.

// Layer 1: Standard library imports
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

// Layer 2: Third-party crate imports
use parking_lot::{Condvar, Mutex};

// Layer 3: Internal module imports
use super::{TimerAction, TimerCtl, TimerThread};

struct Entry {
    at: Instant,
    seq: u64,
    period: Option<Duration>,
    action: TimerAction,
    ctl: Arc<TimerCtl>,
}

// Min-heap by (deadline, sequence).
impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .at
            .cmp(&self.at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct HeapState {
    entries: BinaryHeap<Entry>,
    next_seq: u64,
    closed: bool,
}

struct Shared {
    state: Mutex<HeapState>,
    changed: Condvar,
}

pub(crate) struct HeapTimerThread {
    shared: Arc<Shared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl HeapTimerThread {
    pub(crate) fn start() -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(HeapState {
                entries: BinaryHeap::new(),
                next_seq: 0,
                closed: false,
            }),
            changed: Condvar::new(),
        });

        let loop_shared = Arc::clone(&shared);
        let handle = std::thread::Builder::new()
            .name("troupe-timer-heap".to_string())
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
        let due: Vec<Entry> = {
            let mut state = shared.state.lock();
            loop {
                if state.closed {
                    for entry in state.entries.drain() {
                        entry.ctl.finish();
                    }
                    return;
                }

                let now = Instant::now();
                let next_at = state.entries.peek().map(|e| e.at);
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
            while state
                .entries
                .peek()
                .is_some_and(|entry| entry.at <= now)
            {
                if let Some(entry) = state.entries.pop() {
                    due.push(entry);
                }
            }
            due
        };

        // Fire outside the lock; destinations may take their own locks.
        for entry in due {
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
                        state.entries.push(Entry {
                            at: entry.at + period,
                            seq,
                            period: entry.period,
                            action: entry.action,
                            ctl: entry.ctl,
                        });
                    } else {
                        entry.ctl.finish();
                    }
                }
                None => entry.ctl.finish(),
            }
        }
    }
}

impl TimerThread for HeapTimerThread {
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
        state.entries.push(Entry {
            at: Instant::now() + after,
            seq,
            period,
            action,
            ctl,
        });
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
