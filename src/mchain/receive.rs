//! Consuming a chain: typed handler sets and the `receive` operation.

// Layer 1: Standard library imports
use std::any::TypeId;
use std::time::{Duration, Instant};

// Layer 2: Third-party crate imports
// (none for this module)

// Layer 3: Internal module imports
use crate::error::Result;
use crate::message::envelope::invoke_access_hook;
use crate::message::{AccessContext, Delivery, Message, MessageRef, MutMhood, PayloadInvoker};

use super::chain::{ChainRef, PopOutcome};

/// One typed handler of a receive/select handler set.
pub struct ChainHandler {
    type_id: TypeId,
    invoke: Box<dyn FnMut(&MessageRef) + Send>,
}

impl ChainHandler {
    pub(crate) fn matches(&self, delivery: &Delivery) -> bool {
        self.type_id == delivery.message.type_id()
    }
}

/// Handler for immutable messages of `T`.
pub fn handler<T, F>(mut f: F) -> ChainHandler
where
    T: Message,
    F: FnMut(&T) + Send + 'static,
{
    ChainHandler {
        type_id: TypeId::of::<T>(),
        invoke: Box::new(move |message| {
            if let Some(msg) = message.downcast_ref::<T>() {
                f(msg);
            }
        }),
    }
}

/// Handler taking unique ownership of mutable messages of `T`.
pub fn handler_mutable<T, F>(mut f: F) -> ChainHandler
where
    T: Message,
    F: FnMut(MutMhood<T>) + Send + 'static,
{
    ChainHandler {
        type_id: TypeId::of::<T>(),
        invoke: Box::new(move |message| {
            if let Some(boxed) = message.take_mutable::<T>() {
                f(MutMhood::new(boxed));
            }
        }),
    }
}

struct HandlerInvokerAdapter<'a> {
    handler: &'a mut ChainHandler,
}

impl PayloadInvoker for HandlerInvokerAdapter<'_> {
    fn invoke(&mut self, message: &MessageRef) {
        (self.handler.invoke)(message);
    }
}

/// Dispatch one extracted item into the handler set. Returns true when a
/// handler matched.
pub(crate) fn dispatch_item(handlers: &mut [ChainHandler], delivery: &Delivery) -> bool {
    let Some(handler) = handlers.iter_mut().find(|h| h.matches(delivery)) else {
        return false;
    };
    match &delivery.envelope {
        Some(envelope) => {
            let mut adapter = HandlerInvokerAdapter { handler };
            invoke_access_hook(envelope, AccessContext::DeliveryAttempt, &mut adapter);
        }
        None => (handler.invoke)(&delivery.message),
    }
    true
}

/// Parameters of one `receive` operation.
///
/// # Example
/// ```rust,ignore
/// let result = receive(
///     from(&ch).handle_n(10).empty_timeout(Duration::from_millis(200)),
///     vec![handler(|m: &Reading| println!("{m:?}"))],
/// )?;
/// ```
#[derive(Clone)]
pub struct ReceiveParams {
    pub(crate) chain: ChainRef,
    pub(crate) handle_n: Option<usize>,
    pub(crate) empty_timeout: Option<Duration>,
    pub(crate) total_time: Option<Duration>,
}

/// Start building receive parameters for `chain`.
pub fn from(chain: &ChainRef) -> ReceiveParams {
    ReceiveParams {
        chain: chain.clone(),
        handle_n: None,
        empty_timeout: None,
        total_time: None,
    }
}

impl ReceiveParams {
    /// Return after `n` items were handled.
    pub fn handle_n(mut self, n: usize) -> Self {
        self.handle_n = Some(n);
        self
    }

    /// Keep handling until the chain closes.
    pub fn handle_all(mut self) -> Self {
        self.handle_n = None;
        self
    }

    /// Give up after the chain stays empty this long.
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

/// Why a `receive` returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveStatus {
    /// The requested number of items was handled.
    Completed,
    /// A timeout elapsed first.
    Timeout,
    /// The chain closed and drained.
    Closed,
}

/// Outcome of one `receive`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiveResult {
    /// Items removed from the chain.
    pub extracted: usize,
    /// Items for which a handler matched.
    pub handled: usize,
    /// Why the operation returned.
    pub status: ReceiveStatus,
}

/// Pop and dispatch items from a chain until the configured condition, a
/// timeout, or close-and-drained.
pub fn receive(params: ReceiveParams, mut handlers: Vec<ChainHandler>) -> Result<ReceiveResult> {
    receive_impl(&params, &mut handlers)
}

pub(crate) fn receive_impl(
    params: &ReceiveParams,
    handlers: &mut [ChainHandler],
) -> Result<ReceiveResult> {
    let total_deadline = params.total_time.map(|d| Instant::now() + d);
    let mut extracted = 0;
    let mut handled = 0;

    loop {
        if params.handle_n.is_some_and(|n| handled >= n) {
            return Ok(ReceiveResult {
                extracted,
                handled,
                status: ReceiveStatus::Completed,
            });
        }

        let empty_deadline = params.empty_timeout.map(|d| Instant::now() + d);
        let deadline = match (total_deadline, empty_deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };

        match params.chain.inner().pop(deadline) {
            PopOutcome::Item(item) => {
                extracted += 1;
                if dispatch_item(handlers, &item) {
                    handled += 1;
                }
            }
            PopOutcome::Empty => {
                return Ok(ReceiveResult {
                    extracted,
                    handled,
                    status: ReceiveStatus::Timeout,
                });
            }
            PopOutcome::Closed => {
                return Ok(ReceiveResult {
                    extracted,
                    handled,
                    status: ReceiveStatus::Closed,
                });
            }
        }
    }
}

/// A reusable receive operation for hot loops: parameters and the handler
/// dispatch table are allocated once.
pub struct PreparedReceive {
    params: ReceiveParams,
    handlers: Vec<ChainHandler>,
}

impl PreparedReceive {
    /// Run the prepared operation once.
    pub fn perform(&mut self) -> Result<ReceiveResult> {
        receive_impl(&self.params, &mut self.handlers)
    }
}

/// Capture a reusable receive operation.
pub fn prepare_receive(params: ReceiveParams, handlers: Vec<ChainHandler>) -> PreparedReceive {
    PreparedReceive { params, handlers }
}
