//! Multi-producer / single-consumer ("direct") mailbox.
//!
//! Every agent owns exactly one. Only the owner may subscribe, delivery
//! filters are illegal, and it is the only mailbox kind through which
//! mutable (exclusive-owned) messages travel.

// Layer 1: Standard library imports
use std::sync::{Arc, Weak};

// Layer 2: Third-party crate imports
use chrono::Utc;

// Layer 3: Internal module imports
use crate::error::{Error, Result};
use crate::message::Delivery;
use crate::msg_tracing::{TraceEvent, TraceOp, TracingHolder};
use crate::util::{AgentId, MboxId};

use super::filter::DeliveryFilter;
use super::traits::{DeliveryMode, Mbox, MboxKind, MessageSink, MessageSinkRef, MsgType};
use super::MAX_REDIRECTION_DEPTH;

pub(crate) struct DirectMbox {
    id: MboxId,
    owner_ordinal: u64,
    owner_agent: AgentId,
    owner: Weak<dyn MessageSink>,
    tracing: Arc<TracingHolder>,
}

impl DirectMbox {
    pub(crate) fn new(
        id: MboxId,
        owner_ordinal: u64,
        owner_agent: AgentId,
        owner: Weak<dyn MessageSink>,
        tracing: Arc<TracingHolder>,
    ) -> Self {
        Self {
            id,
            owner_ordinal,
            owner_agent,
            owner,
            tracing,
        }
    }

    fn trace(&self, op: TraceOp, msg_type: &'static str, depth: Option<u32>) {
        self.tracing.emit(|| TraceEvent {
            when: Utc::now(),
            op,
            mbox_id: self.id,
            mbox_name: self.query_name(),
            message_type: msg_type,
            agent: Some(self.owner_agent),
            redirection_depth: depth,
        });
    }
}

impl Mbox for DirectMbox {
    fn id(&self) -> MboxId {
        self.id
    }

    fn query_name(&self) -> String {
        format!("<direct:id={};agent={}>", self.id.raw(), self.owner_agent)
    }

    fn kind(&self) -> MboxKind {
        MboxKind::MultiProducerSingleConsumer
    }

    fn subscribe_event_handler(&self, _msg_type: MsgType, sink: MessageSinkRef) -> Result<()> {
        if sink.ordinal() != self.owner_ordinal {
            return Err(Error::IllegalSubscriberForMpscMbox);
        }
        // The owner's subscription store is the single source of truth; the
        // mailbox itself keeps no table.
        Ok(())
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
        redirection_depth: u32,
    ) -> Result<()> {
        let msg_type = delivery.message.message_type();
        self.trace(
            match mode {
                DeliveryMode::Ordinary => TraceOp::Push,
                DeliveryMode::FromTimer => TraceOp::PushFromTimer,
            },
            msg_type,
            Some(redirection_depth),
        );

        if redirection_depth > MAX_REDIRECTION_DEPTH {
            self.trace(
                TraceOp::RedirectionDepthExceeded,
                msg_type,
                Some(redirection_depth),
            );
            return Ok(());
        }

        let Some(owner) = self.owner.upgrade() else {
            self.trace(TraceOp::DemandDiscarded, msg_type, None);
            return Ok(());
        };

        // Handler lookup (and the dead-letter fallback) happens when the
        // demand executes, against the owner's state at that moment.
        owner.push_event(mode, self.id, delivery, redirection_depth);
        Ok(())
    }
}
