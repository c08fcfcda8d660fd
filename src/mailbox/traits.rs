// Layer 1: Standard library imports
use std::any::TypeId;
use std::sync::Arc;

// Layer 2: Third-party crate imports
// (none for this module)

// Layer 3: Internal module imports
use crate::error::Result;
use crate::message::{Delivery, Message};
use crate::util::{AgentId, MboxId, Priority};

use super::filter::DeliveryFilter;

/// Runtime identity of a message type: `TypeId` for keys, a stable name for
/// diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MsgType {
    /// Compile-time type identity.
    pub id: TypeId,
    /// Stable human-readable name.
    pub name: &'static str,
}

impl MsgType {
    /// Identity of message type `T`.
    pub fn of<T: Message>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: T::MESSAGE_TYPE,
        }
    }
}

/// Mailbox variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MboxKind {
    /// Multi-producer, multi-consumer.
    MultiProducerMultiConsumer,
    /// Multi-producer, single-consumer ("direct" mailbox of one agent).
    MultiProducerSingleConsumer,
}

/// How a delivery entered the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// An ordinary `send`.
    Ordinary,
    /// A delivery fired by the timer service. Destinations must not apply
    /// blocking back-pressure to this mode.
    FromTimer,
}

/// Subscriber-side endpoint of the delivery pipeline.
///
/// A sink fronts one agent: it applies the agent's message limits and pushes
/// execution demands into the agent's bound event queue. Mailboxes hold sinks
/// weakly through this trait and never look inside the agent.
pub trait MessageSink: Send + Sync + 'static {
    /// Stable ordinal used for equal-priority ordering in MPMC mailboxes.
    fn ordinal(&self) -> u64;

    /// Identity of the fronted agent.
    fn agent_id(&self) -> AgentId;

    /// Priority of the fronted agent.
    fn priority(&self) -> Priority;

    /// Route one delivery through limits into the agent's event queue.
    /// Whether a handler exists is resolved at execution time, against the
    /// agent's state at that moment.
    fn push_event(
        &self,
        mode: DeliveryMode,
        mbox_id: MboxId,
        delivery: Delivery,
        redirection_depth: u32,
    );
}

/// Shared handle to a message sink.
pub type MessageSinkRef = Arc<dyn MessageSink>;

/// A routing endpoint for messages.
pub trait Mbox: Send + Sync + 'static {
    /// Stable identity of the mailbox.
    fn id(&self) -> MboxId;

    /// Human-readable name.
    fn query_name(&self) -> String;

    /// Mailbox variant.
    fn kind(&self) -> MboxKind;

    /// Add a subscription of `sink` to `msg_type`. Idempotent on
    /// `(msg_type, sink)`.
    fn subscribe_event_handler(&self, msg_type: MsgType, sink: MessageSinkRef) -> Result<()>;

    /// Remove a subscription. No-op if absent.
    fn unsubscribe_event_handler(&self, msg_type: MsgType, sink: &MessageSinkRef);

    /// Attach a delivery filter for `(msg_type, sink)`. MPMC only.
    fn set_delivery_filter(
        &self,
        msg_type: MsgType,
        filter: Arc<DeliveryFilter>,
        sink: MessageSinkRef,
    ) -> Result<()>;

    /// Remove a delivery filter. No-op if absent.
    fn drop_delivery_filter(&self, msg_type: MsgType, sink: &MessageSinkRef);

    /// Synchronous route-and-enqueue of one delivery.
    fn do_deliver_message(
        &self,
        mode: DeliveryMode,
        delivery: Delivery,
        redirection_depth: u32,
    ) -> Result<()>;
}

/// Shared handle to a mailbox.
pub type MboxRef = Arc<dyn Mbox>;
