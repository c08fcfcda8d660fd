//! Chain storage, capacity policies, and the mailbox face of a chain.

// Layer 1: Standard library imports
use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

// Layer 2: Third-party crate imports
use chrono::Utc;
use parking_lot::{Condvar, Mutex};

// Layer 3: Internal module imports
use crate::error::{Error, Result};
use crate::mailbox::filter::DeliveryFilter;
use crate::mailbox::{DeliveryMode, Mbox, MboxKind, MboxRef, MessageSinkRef, MsgType};
use crate::message::{Delivery, Message, MessageRef};
use crate::msg_tracing::{TraceEvent, TraceOp, TracingHolder};
use crate::util::MboxId;

/// Memory strategy of a bounded chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryUsage {
    /// Storage for the full capacity is allocated up front.
    Preallocated,
    /// Storage grows on demand.
    Dynamic,
}

/// What happens when a bounded chain is full (after any configured wait).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainOverflowReaction {
    /// Discard the message being pushed.
    DropNewest,
    /// Discard the oldest stored message, then store the new one.
    RemoveOldest,
    /// Raise [`Error::MessageChainOverflow`] to the producer.
    ThrowException,
    /// Terminate the process.
    Abort,
}

/// Capacity policy of a chain.
#[derive(Debug, Clone, Copy)]
pub struct ChainCapacity {
    pub(crate) max: Option<usize>,
    pub(crate) memory: MemoryUsage,
    pub(crate) overflow: ChainOverflowReaction,
    pub(crate) wait: Option<Duration>,
}

impl ChainCapacity {
    /// No size bound.
    pub fn unlimited() -> Self {
        Self {
            max: None,
            memory: MemoryUsage::Dynamic,
            overflow: ChainOverflowReaction::DropNewest,
            wait: None,
        }
    }

    /// Bounded to `max` items.
    pub fn limited(max: usize, memory: MemoryUsage, overflow: ChainOverflowReaction) -> Self {
        Self {
            max: Some(max),
            memory,
            overflow,
            wait: None,
        }
    }

    /// Bounded; a full chain makes ordinary producers wait up to
    /// `wait_timeout` for room before `overflow` applies. Timer-originated
    /// deliveries never wait.
    pub fn limited_with_waiting(
        max: usize,
        memory: MemoryUsage,
        overflow: ChainOverflowReaction,
        wait_timeout: Duration,
    ) -> Self {
        Self {
            max: Some(max),
            memory,
            overflow,
            wait: Some(wait_timeout),
        }
    }
}

/// Chain construction parameters.
#[derive(Debug, Clone, Copy)]
pub struct ChainParams {
    pub(crate) capacity: ChainCapacity,
}

impl ChainParams {
    pub fn new(capacity: ChainCapacity) -> Self {
        Self { capacity }
    }
}

impl Default for ChainParams {
    fn default() -> Self {
        Self {
            capacity: ChainCapacity::unlimited(),
        }
    }
}

/// What to do with stored content when closing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainCloseMode {
    /// Consumers may still drain stored items.
    RetainContent,
    /// Stored items are discarded; `size()` drops to zero.
    DropContent,
}

/// Outcome of a producer-side push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainSendResult {
    /// The item was stored.
    Stored,
    /// The item was discarded by the overflow policy.
    Dropped,
    /// The chain is closed; nothing was stored.
    SendFailedClosed,
}

/// Wakeup channel between chains and a pending `select`/`receive`.
pub(crate) struct SelectSignal {
    fired: Mutex<bool>,
    cv: Condvar,
}

impl SelectSignal {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            fired: Mutex::new(false),
            cv: Condvar::new(),
        })
    }

    pub(crate) fn notify(&self) {
        let mut fired = self.fired.lock();
        *fired = true;
        drop(fired);
        self.cv.notify_all();
    }

    /// Wait for a notification; `true` when notified, `false` on timeout.
    pub(crate) fn wait_until(&self, deadline: Option<Instant>) -> bool {
        let mut fired = self.fired.lock();
        loop {
            if *fired {
                *fired = false;
                return true;
            }
            match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    if self.cv.wait_for(&mut fired, deadline - now).timed_out() {
                        let was_fired = *fired;
                        *fired = false;
                        return was_fired;
                    }
                }
                None => self.cv.wait(&mut fired),
            }
        }
    }
}

pub(crate) enum PopOutcome {
    Item(Delivery),
    Empty,
    Closed,
}

/// Outcome of a non-blocking room-checked push (select send-cases).
pub(crate) enum TryPushOutcome {
    Stored,
    /// The chain is full; the delivery is handed back for a retry.
    Full(Delivery),
    /// The chain is closed; the delivery is handed back.
    Closed(Delivery),
}

struct ChainState {
    items: VecDeque<Delivery>,
    closed: bool,
}

pub(crate) struct MchainInner {
    id: MboxId,
    capacity: ChainCapacity,
    tracing: Arc<TracingHolder>,
    state: Mutex<ChainState>,
    not_empty: Condvar,
    not_full: Condvar,
    wakers: Mutex<Vec<Weak<SelectSignal>>>,
}

impl MchainInner {
    fn trace(&self, op: TraceOp, message_type: &'static str) {
        self.tracing.emit(|| TraceEvent {
            when: Utc::now(),
            op,
            mbox_id: self.id,
            mbox_name: format!("<mchain:id={}>", self.id.raw()),
            message_type,
            agent: None,
            redirection_depth: None,
        });
    }

    fn notify_wakers(&self) {
        let mut wakers = self.wakers.lock();
        wakers.retain(|weak| match weak.upgrade() {
            Some(signal) => {
                signal.notify();
                true
            }
            None => false,
        });
    }

    /// Producer-side push. `allow_wait` is false for timer deliveries and
    /// non-blocking select send-cases.
    pub(crate) fn push(&self, delivery: Delivery, allow_wait: bool) -> Result<ChainSendResult> {
        let message_type = delivery.message.message_type();
        let mut state = self.state.lock();

        if state.closed {
            self.trace(TraceOp::ChainDropped, message_type);
            return Ok(ChainSendResult::SendFailedClosed);
        }

        if let Some(max) = self.capacity.max {
            if state.items.len() >= max {
                if let (true, Some(wait)) = (allow_wait, self.capacity.wait) {
                    let deadline = Instant::now() + wait;
                    while state.items.len() >= max && !state.closed {
                        let now = Instant::now();
                        if now >= deadline {
                            break;
                        }
                        self.not_full.wait_for(&mut state, deadline - now);
                    }
                    if state.closed {
                        self.trace(TraceOp::ChainDropped, message_type);
                        return Ok(ChainSendResult::SendFailedClosed);
                    }
                }

                if state.items.len() >= max {
                    match self.capacity.overflow {
                        ChainOverflowReaction::DropNewest => {
                            self.trace(TraceOp::ChainDropped, message_type);
                            return Ok(ChainSendResult::Dropped);
                        }
                        ChainOverflowReaction::RemoveOldest => {
                            if let Some(oldest) = state.items.pop_front() {
                                self.trace(
                                    TraceOp::ChainDropped,
                                    oldest.message.message_type(),
                                );
                            }
                        }
                        ChainOverflowReaction::ThrowException => {
                            return Err(Error::MessageChainOverflow);
                        }
                        ChainOverflowReaction::Abort => {
                            tracing::error!(
                                chain = %self.id,
                                "message chain overflow with abort reaction; aborting"
                            );
                            std::process::abort();
                        }
                    }
                }
            }
        }

        state.items.push_back(delivery);
        self.trace(TraceOp::ChainStored, message_type);
        drop(state);
        self.not_empty.notify_one();
        self.notify_wakers();
        Ok(ChainSendResult::Stored)
    }

    /// Consumer-side pop. `deadline` of `None` waits indefinitely while the
    /// chain is open; `Some(past instant)` makes it a try-pop.
    pub(crate) fn pop(&self, deadline: Option<Instant>) -> PopOutcome {
        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                drop(state);
                self.not_full.notify_one();
                self.notify_wakers();
                return PopOutcome::Item(item);
            }
            if state.closed {
                return PopOutcome::Closed;
            }
            match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return PopOutcome::Empty;
                    }
                    self.not_empty.wait_for(&mut state, deadline - now);
                }
                None => self.not_empty.wait(&mut state),
            }
        }
    }

    /// Push only when room is available right now; never applies the
    /// overflow reaction. Used by select send-cases, which wait for room
    /// instead of overflowing.
    pub(crate) fn try_push_room(&self, delivery: Delivery) -> TryPushOutcome {
        let message_type = delivery.message.message_type();
        let mut state = self.state.lock();
        if state.closed {
            self.trace(TraceOp::ChainDropped, message_type);
            return TryPushOutcome::Closed(delivery);
        }
        if let Some(max) = self.capacity.max {
            if state.items.len() >= max {
                return TryPushOutcome::Full(delivery);
            }
        }
        state.items.push_back(delivery);
        self.trace(TraceOp::ChainStored, message_type);
        drop(state);
        self.not_empty.notify_one();
        self.notify_wakers();
        TryPushOutcome::Stored
    }

    pub(crate) fn try_pop(&self) -> PopOutcome {
        let mut state = self.state.lock();
        if let Some(item) = state.items.pop_front() {
            drop(state);
            self.not_full.notify_one();
            self.notify_wakers();
            return PopOutcome::Item(item);
        }
        if state.closed {
            return PopOutcome::Closed;
        }
        PopOutcome::Empty
    }

    pub(crate) fn close(&self, mode: ChainCloseMode) {
        {
            let mut state = self.state.lock();
            if state.closed && state.items.is_empty() {
                return;
            }
            state.closed = true;
            if mode == ChainCloseMode::DropContent {
                state.items.clear();
            }
        }
        self.not_empty.notify_all();
        self.not_full.notify_all();
        self.notify_wakers();
    }

    pub(crate) fn register_waker(&self, signal: &Arc<SelectSignal>) {
        self.wakers.lock().push(Arc::downgrade(signal));
    }

    fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

impl Mbox for MchainInner {
    fn id(&self) -> MboxId {
        self.id
    }

    fn query_name(&self) -> String {
        format!("<mchain:id={}>", self.id.raw())
    }

    fn kind(&self) -> MboxKind {
        MboxKind::MultiProducerSingleConsumer
    }

    fn subscribe_event_handler(&self, _msg_type: MsgType, _sink: MessageSinkRef) -> Result<()> {
        Err(Error::IllegalSubscriberForMpscMbox)
    }

    fn unsubscribe_event_handler(&self, _msg_type: MsgType, _sink: &MessageSinkRef) {}

    fn set_delivery_filter(
        &self,
        _msg_type: MsgType,
        _filter: Arc<DeliveryFilter>,
        _sink: MessageSinkRef,
    ) -> Result<()> {
        Err(Error::DeliveryFilterCannotBeUsedOnMpscMbox)
    }

    fn drop_delivery_filter(&self, _msg_type: MsgType, _sink: &MessageSinkRef) {}

    fn do_deliver_message(
        &self,
        mode: DeliveryMode,
        delivery: Delivery,
        _redirection_depth: u32,
    ) -> Result<()> {
        // Timer deliveries must never block the timer thread on a full
        // chain.
        let allow_wait = mode == DeliveryMode::Ordinary;
        self.push(delivery, allow_wait).map(|_| ())
    }
}

/// Handle of a message chain.
#[derive(Clone)]
pub struct ChainRef {
    inner: Arc<MchainInner>,
}

impl ChainRef {
    pub(crate) fn new(id: MboxId, params: ChainParams, tracing: Arc<TracingHolder>) -> Self {
        let items = match (params.capacity.memory, params.capacity.max) {
            (MemoryUsage::Preallocated, Some(max)) => VecDeque::with_capacity(max),
            _ => VecDeque::new(),
        };
        Self {
            inner: Arc::new(MchainInner {
                id,
                capacity: params.capacity,
                tracing,
                state: Mutex::new(ChainState {
                    items,
                    closed: false,
                }),
                not_empty: Condvar::new(),
                not_full: Condvar::new(),
                wakers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// The chain as a send destination.
    pub fn as_mbox(&self) -> MboxRef {
        Arc::clone(&self.inner) as MboxRef
    }

    /// Stable identity (shared with the mailbox face).
    pub fn id(&self) -> MboxId {
        self.inner.id
    }

    /// Push an immutable message, honouring capacity and wait policies.
    pub fn send<T: Message>(&self, msg: T) -> Result<ChainSendResult> {
        self.inner
            .push(Delivery::plain(MessageRef::immutable(msg)), true)
    }

    /// Push a mutable (exclusive-owned) message.
    pub fn send_mutable<T: Message>(&self, msg: T) -> Result<ChainSendResult> {
        self.inner
            .push(Delivery::plain(MessageRef::mutable(msg)), true)
    }

    /// Number of stored items.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// True when no items are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True once the chain is closed.
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Close the chain. Idempotent.
    pub fn close(&self, mode: ChainCloseMode) {
        self.inner.close(mode);
    }

    pub(crate) fn inner(&self) -> &Arc<MchainInner> {
        &self.inner
    }
}

impl std::fmt::Debug for ChainRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainRef")
            .field("id", &self.inner.id)
            .field("len", &self.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Close `chain`, letting consumers drain what is already stored.
pub fn close_retain_content(chain: &ChainRef) {
    chain.close(ChainCloseMode::RetainContent);
}

/// Close `chain` and discard stored content; blocked producers unblock with
/// a send-failed indication and `size()` drops to zero.
pub fn close_drop_content(chain: &ChainRef) {
    chain.close(ChainCloseMode::DropContent);
}
