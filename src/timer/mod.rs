//! Timer service: delayed and periodic delivery.
//!
//! One logical timer thread per environment. Firing a timer re-enters the
//! delivery pipeline with [`DeliveryMode::FromTimer`], under which
//! destinations must not apply blocking back-pressure. Three interchangeable
//! back-ends trade insertion and cancellation complexity: a binary heap (the
//! default), a sorted list, and a hashed timer wheel.

pub mod heap;
pub mod list;
pub mod wheel;

// Layer 1: Standard library imports
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

// Layer 2: Third-party crate imports
// (none)

// Layer 3: Internal module imports
use crate::agent::runtime::AgentCell;
use crate::agent::state::State;
use crate::mailbox::{DeliveryMode, MboxRef};
use crate::message::Delivery;
use crate::queue::DemandKind;

/// Selects the timer back-end for an environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerThreadKind {
    /// Binary heap: O(log n) insertion, lazy cancellation. The default.
    Heap,
    /// Sorted list: cheap for small, mostly-ordered timer sets.
    List,
    /// Hashed wheel: O(1) insertion at a fixed tick granularity.
    Wheel,
}

impl Default for TimerThreadKind {
    fn default() -> Self {
        TimerThreadKind::Heap
    }
}

impl TimerThreadKind {
    pub(crate) fn start(self) -> Box<dyn TimerThread> {
        match self {
            TimerThreadKind::Heap => Box::new(heap::HeapTimerThread::start()),
            TimerThreadKind::List => Box::new(list::ListTimerThread::start()),
            TimerThreadKind::Wheel => {
                Box::new(wheel::WheelTimerThread::start(Duration::from_millis(10), 512))
            }
        }
    }
}

/// What a timer does when it fires.
pub(crate) enum TimerAction {
    /// Deliver a message to a mailbox (or chain).
    Deliver { dest: MboxRef, delivery: Delivery },
    /// Push a state time-limit demand to an agent.
    StateTimeout {
        cell: Weak<AgentCell>,
        expected_state: u64,
        target: State,
    },
}

impl TimerAction {
    pub(crate) fn fire(&self) {
        match self {
            TimerAction::Deliver { dest, delivery } => {
                if let Err(error) =
                    dest.do_deliver_message(DeliveryMode::FromTimer, delivery.clone(), 0)
                {
                    tracing::error!(%error, "timer delivery failed");
                }
            }
            TimerAction::StateTimeout {
                cell,
                expected_state,
                target,
            } => {
                if let Some(cell) = cell.upgrade() {
                    cell.runtime.push_demand(DemandKind::StateTimeout {
                        expected_state: *expected_state,
                        target: target.clone(),
                    });
                }
            }
        }
    }
}

/// Live single-shot / periodic timer counters of one environment.
#[derive(Debug, Default)]
pub(crate) struct TimerCounts {
    single_shot: AtomicUsize,
    periodic: AtomicUsize,
}

impl TimerCounts {
    pub(crate) fn snapshot(&self) -> (usize, usize) {
        (
            self.single_shot.load(Ordering::Relaxed),
            self.periodic.load(Ordering::Relaxed),
        )
    }
}

/// Shared control block of a scheduled timer.
pub(crate) struct TimerCtl {
    done: AtomicBool,
    periodic: bool,
    counts: Weak<TimerCounts>,
}

impl TimerCtl {
    pub(crate) fn new(periodic: bool, counts: &Arc<TimerCounts>) -> Arc<Self> {
        if periodic {
            counts.periodic.fetch_add(1, Ordering::Relaxed);
        } else {
            counts.single_shot.fetch_add(1, Ordering::Relaxed);
        }
        Arc::new(Self {
            done: AtomicBool::new(false),
            periodic,
            counts: Arc::downgrade(counts),
        })
    }

    /// Mark finished or cancelled; adjusts counters exactly once.
    pub(crate) fn finish(&self) {
        if self.done.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(counts) = self.counts.upgrade() {
            let counter = if self.periodic {
                &counts.periodic
            } else {
                &counts.single_shot
            };
            counter.fetch_sub(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }
}

/// Identifier of a periodic (or delayed) message. Dropping the id cancels
/// the timer; a periodic timer keeps firing only while its id is held.
pub struct TimerId {
    ctl: Arc<TimerCtl>,
}

impl TimerId {
    pub(crate) fn new(ctl: Arc<TimerCtl>) -> Self {
        Self { ctl }
    }

    /// Cancel explicitly. Equivalent to dropping the id.
    pub fn cancel(self) {
        drop(self);
    }

    /// True once the timer has fired for the last time or was cancelled.
    pub fn is_finished(&self) -> bool {
        self.ctl.is_done()
    }
}

impl Drop for TimerId {
    fn drop(&mut self) {
        self.ctl.finish();
    }
}

impl std::fmt::Debug for TimerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerId")
            .field("finished", &self.ctl.is_done())
            .finish()
    }
}

/// Back-end contract: schedule entries, stop the thread.
pub(crate) trait TimerThread: Send + Sync {
    fn schedule(
        &self,
        after: Duration,
        period: Option<Duration>,
        action: TimerAction,
        ctl: Arc<TimerCtl>,
    );

    fn shutdown_and_join(&self);
}

/// The per-environment timer front: a back-end thread plus counters.
pub(crate) struct TimerService {
    thread: Box<dyn TimerThread>,
    counts: Arc<TimerCounts>,
}

impl TimerService {
    pub(crate) fn start(kind: TimerThreadKind) -> Self {
        Self {
            thread: kind.start(),
            counts: Arc::new(TimerCounts::default()),
        }
    }

    /// One-shot delivery after `after`; the caller does not hold an id.
    pub(crate) fn schedule_anonymous(&self, after: Duration, action: TimerAction) {
        let ctl = TimerCtl::new(false, &self.counts);
        self.thread.schedule(after, None, action, ctl);
    }

    /// Schedule with an id; `period` of `None` means one-shot.
    pub(crate) fn schedule(
        &self,
        after: Duration,
        period: Option<Duration>,
        action: TimerAction,
    ) -> TimerId {
        let ctl = TimerCtl::new(period.is_some(), &self.counts);
        self.thread
            .schedule(after, period, action, Arc::clone(&ctl));
        TimerId::new(ctl)
    }

    /// `(single_shot, periodic)` live-timer counts.
    pub(crate) fn counts(&self) -> (usize, usize) {
        self.counts.snapshot()
    }

    pub(crate) fn shutdown(&self) {
        self.thread.shutdown_and_join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ctl_adjusts_counts_once() {
        let counts = Arc::new(TimerCounts::default());
        let ctl = TimerCtl::new(true, &counts);
        assert_eq!(counts.snapshot(), (0, 1));

        ctl.finish();
        ctl.finish();
        assert_eq!(counts.snapshot(), (0, 0));
    }

    #[test]
    fn test_timer_id_cancels_on_drop() {
        let counts = Arc::new(TimerCounts::default());
        let ctl = TimerCtl::new(false, &counts);
        let id = TimerId::new(Arc::clone(&ctl));
        assert_eq!(counts.snapshot(), (1, 0));
        assert!(!id.is_finished());

        drop(id);
        assert!(ctl.is_done());
        assert_eq!(counts.snapshot(), (0, 0));
    }
}
