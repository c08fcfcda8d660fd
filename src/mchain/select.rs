//! Racing several chains: `select` over receive- and send-cases.

// Layer 1: Standard library imports
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

// Layer 2: Third-party crate imports
// (none for this module)

// Layer 3: Internal module imports
use crate::error::Result;
use crate::message::{Delivery, Message, MessageRef};

use super::chain::{ChainRef, PopOutcome, SelectSignal, TryPushOutcome};
use super::receive::{dispatch_item, ChainHandler};

/// Parameters of one `select` operation.
#[derive(Debug, Clone, Copy, Default)]
pub struct SelectParams {
    pub(crate) handle_n: Option<usize>,
    pub(crate) empty_timeout: Option<Duration>,
    pub(crate) total_time: Option<Duration>,
}

/// Start building select parameters over all attached cases.
pub fn from_all() -> SelectParams {
    SelectParams::default()
}

impl SelectParams {
    /// Return after `n` events (handled receives plus completed sends).
    pub fn handle_n(mut self, n: usize) -> Self {
        self.handle_n = Some(n);
        self
    }

    /// Keep going until every case is exhausted.
    pub fn handle_all(mut self) -> Self {
        self.handle_n = None;
        self
    }

    /// Give up after no case becomes ready for this long.
    pub fn empty_timeout(mut self, timeout: Duration) -> Self {
        self.empty_timeout = Some(timeout);
        self
    }

    /// Hard bound on the whole operation.
    pub fn total_time(mut self, timeout: Duration) -> Self {
        self.total_time = Some(timeout);
        self
    }
}

enum CaseKind {
    Receive {
        chain: ChainRef,
        handlers: Vec<ChainHandler>,
        closed: bool,
    },
    Send {
        chain: ChainRef,
        delivery: Option<Delivery>,
        on_sent: Option<Box<dyn FnOnce() + Send>>,
        failed: bool,
    },
}

/// One case of a `select`.
pub struct SelectCase {
    kind: CaseKind,
}

impl SelectCase {
    fn chain(&self) -> &ChainRef {
        match &self.kind {
            CaseKind::Receive { chain, .. } | CaseKind::Send { chain, .. } => chain,
        }
    }
}

/// A case that pops from `chain` and dispatches into `handlers`.
pub fn receive_case(chain: &ChainRef, handlers: Vec<ChainHandler>) -> SelectCase {
    SelectCase {
        kind: CaseKind::Receive {
            chain: chain.clone(),
            handlers,
            closed: false,
        },
    }
}

/// A case that pushes `msg` into `chain` as soon as there is room, then
/// runs `on_sent`. A closed chain surfaces as a send failure instead of
/// blocking forever.
pub fn send_case<T, F>(chain: &ChainRef, msg: T, on_sent: F) -> SelectCase
where
    T: Message,
    F: FnOnce() + Send + 'static,
{
    SelectCase {
        kind: CaseKind::Send {
            chain: chain.clone(),
            delivery: Some(Delivery::plain(MessageRef::immutable(msg))),
            on_sent: Some(Box::new(on_sent)),
            failed: false,
        },
    }
}

/// Why a `select` returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectStatus {
    /// The requested number of events completed.
    Completed,
    /// A timeout elapsed first.
    Timeout,
    /// Every case is exhausted: receive chains closed and drained, send
    /// cases completed or failed.
    AllClosed,
}

/// Outcome of one `select`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectResult {
    /// Handled receives plus completed sends.
    pub handled: usize,
    /// Completed sends.
    pub sent: usize,
    /// Send cases that hit a closed chain.
    pub send_failures: usize,
    /// Why the operation returned.
    pub status: SelectStatus,
}

// Rotates the probe order across invocations so that no single ready case
// can starve the others.
static ROTATION: AtomicUsize = AtomicUsize::new(0);

fn select_loop(
    params: SelectParams,
    cases: &mut [SelectCase],
    signal: &Arc<SelectSignal>,
) -> Result<SelectResult> {
    let total_deadline = params.total_time.map(|d| Instant::now() + d);
    let start = ROTATION.fetch_add(1, Ordering::Relaxed);
    let mut handled = 0;
    let mut sent = 0;
    let mut send_failures = 0;

    let finished = |handled: usize| params.handle_n.is_some_and(|n| handled >= n);

    loop {
        if finished(handled) {
            return Ok(SelectResult {
                handled,
                sent,
                send_failures,
                status: SelectStatus::Completed,
            });
        }

        let case_count = cases.len().max(1);
        let mut progress = false;
        let mut live_cases = 0;

        for offset in 0..cases.len() {
            if finished(handled) {
                break;
            }
            let case = &mut cases[(start + offset) % case_count];
            match &mut case.kind {
                CaseKind::Receive {
                    chain,
                    handlers,
                    closed,
                } => {
                    if *closed {
                        continue;
                    }
                    match chain.inner().try_pop() {
                        PopOutcome::Item(item) => {
                            if dispatch_item(handlers, &item) {
                                handled += 1;
                            }
                            progress = true;
                            live_cases += 1;
                        }
                        PopOutcome::Empty => live_cases += 1,
                        PopOutcome::Closed => *closed = true,
                    }
                }
                CaseKind::Send {
                    chain,
                    delivery,
                    on_sent,
                    failed,
                } => {
                    if *failed {
                        continue;
                    }
                    let Some(pending) = delivery.take() else {
                        continue;
                    };
                    match chain.inner().try_push_room(pending) {
                        TryPushOutcome::Stored => {
                            if let Some(on_sent) = on_sent.take() {
                                on_sent();
                            }
                            sent += 1;
                            handled += 1;
                            progress = true;
                        }
                        TryPushOutcome::Full(returned) => {
                            *delivery = Some(returned);
                            live_cases += 1;
                        }
                        TryPushOutcome::Closed(_) => {
                            *failed = true;
                            send_failures += 1;
                        }
                    }
                }
            }
        }

        if finished(handled) {
            continue;
        }
        if live_cases == 0 {
            return Ok(SelectResult {
                handled,
                sent,
                send_failures,
                status: SelectStatus::AllClosed,
            });
        }
        if progress {
            continue;
        }

        let empty_deadline = params.empty_timeout.map(|d| Instant::now() + d);
        let deadline = match (total_deadline, empty_deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        if !signal.wait_until(deadline) {
            return Ok(SelectResult {
                handled,
                sent,
                send_failures,
                status: SelectStatus::Timeout,
            });
        }
    }
}

/// Race all cases under the given parameters.
///
/// # Example
/// ```rust,ignore
/// let result = select(
///     from_all().handle_n(1),
///     vec![
///         send_case(&values, Fib(current), move || { /* advance */ }),
///         receive_case(&quit, vec![handler(|_: &Quit| {})]),
///     ],
/// )?;
/// ```
pub fn select(params: SelectParams, mut cases: Vec<SelectCase>) -> Result<SelectResult> {
    let signal = SelectSignal::new();
    for case in &cases {
        case.chain().inner().register_waker(&signal);
    }
    select_loop(params, &mut cases, &signal)
}

/// A reusable select operation: wakeup plumbing and the case set are
/// allocated once. Receive cases stay live across runs; a send case fires
/// at most once over the prepared object's lifetime.
pub struct PreparedSelect {
    params: SelectParams,
    cases: Vec<SelectCase>,
    signal: Arc<SelectSignal>,
}

impl PreparedSelect {
    /// Run the prepared operation once.
    pub fn perform(&mut self) -> Result<SelectResult> {
        select_loop(self.params, &mut self.cases, &self.signal)
    }
}

/// Capture a reusable select operation.
pub fn prepare_select(params: SelectParams, cases: Vec<SelectCase>) -> PreparedSelect {
    let signal = SelectSignal::new();
    for case in &cases {
        case.chain().inner().register_waker(&signal);
    }
    PreparedSelect {
        params,
        cases,
        signal,
    }
}
