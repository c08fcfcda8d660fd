//! Multi-producer / multi-consumer mailbox.

// Layer 1: Standard library imports
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

// Layer 2: Third-party crate imports
use chrono::Utc;
use parking_lot::RwLock;

// Layer 3: Internal module imports
use crate::error::{Error, Result};
use crate::message::Delivery;
use crate::msg_tracing::{TraceEvent, TraceOp, TracingHolder};
use crate::util::MboxId;

use super::filter::DeliveryFilter;
use super::traits::{DeliveryMode, Mbox, MboxKind, MessageSinkRef, MsgType};
use super::MAX_REDIRECTION_DEPTH;

struct SubscriberEntry {
    sink: MessageSinkRef,
    /// False when the entry exists only to hold a delivery filter.
    subscribed: bool,
    filter: Option<Arc<DeliveryFilter>>,
}

#[derive(Default)]
struct TypeSubscribers {
    /// Sorted by descending priority, then by subscriber ordinal.
    entries: Vec<SubscriberEntry>,
}

impl TypeSubscribers {
    fn position(&self, ordinal: u64) -> Option<usize> {
        self.entries.iter().position(|e| e.sink.ordinal() == ordinal)
    }

    fn insertion_point(&self, sink: &MessageSinkRef) -> usize {
        let key = (std::cmp::Reverse(sink.priority()), sink.ordinal());
        self.entries
            .partition_point(|e| (std::cmp::Reverse(e.sink.priority()), e.sink.ordinal()) < key)
    }
}

/// The default mailbox kind: any number of subscribers, delivery filters,
/// immutable messages only.
pub(crate) struct MpmcMbox {
    id: MboxId,
    name: Option<String>,
    tracing: Arc<TracingHolder>,
    subscribers: RwLock<HashMap<TypeId, TypeSubscribers>>,
}

impl MpmcMbox {
    pub(crate) fn new(id: MboxId, name: Option<String>, tracing: Arc<TracingHolder>) -> Self {
        Self {
            id,
            name,
            tracing,
            subscribers: RwLock::new(HashMap::new()),
        }
    }

    fn trace(&self, op: TraceOp, msg_type: &'static str, depth: Option<u32>) {
        self.tracing.emit(|| TraceEvent {
            when: Utc::now(),
            op,
            mbox_id: self.id,
            mbox_name: self.query_name(),
            message_type: msg_type,
            agent: None,
            redirection_depth: depth,
        });
    }
}

impl Mbox for MpmcMbox {
    fn id(&self) -> MboxId {
        self.id
    }

    fn query_name(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("<mbox:id={}>", self.id.raw()),
        }
    }

    fn kind(&self) -> MboxKind {
        MboxKind::MultiProducerMultiConsumer
    }

    fn subscribe_event_handler(&self, msg_type: MsgType, sink: MessageSinkRef) -> Result<()> {
        let mut table = self.subscribers.write();
        let subs = table.entry(msg_type.id).or_default();
        match subs.position(sink.ordinal()) {
            Some(index) => subs.entries[index].subscribed = true,
            None => {
                let at = subs.insertion_point(&sink);
                subs.entries.insert(
                    at,
                    SubscriberEntry {
                        sink,
                        subscribed: true,
                        filter: None,
                    },
                );
            }
        }
        Ok(())
    }

    fn unsubscribe_event_handler(&self, msg_type: MsgType, sink: &MessageSinkRef) {
        let mut table = self.subscribers.write();
        if let Some(subs) = table.get_mut(&msg_type.id) {
            if let Some(index) = subs.position(sink.ordinal()) {
                let entry = &mut subs.entries[index];
                entry.subscribed = false;
                if entry.filter.is_none() {
                    subs.entries.remove(index);
                }
            }
        }
    }

    fn set_delivery_filter(
        &self,
        msg_type: MsgType,
        filter: Arc<DeliveryFilter>,
        sink: MessageSinkRef,
    ) -> Result<()> {
        let mut table = self.subscribers.write();
        let subs = table.entry(msg_type.id).or_default();
        match subs.position(sink.ordinal()) {
            Some(index) => subs.entries[index].filter = Some(filter),
            None => {
                let at = subs.insertion_point(&sink);
                subs.entries.insert(
                    at,
                    SubscriberEntry {
                        sink,
                        subscribed: false,
                        filter: Some(filter),
                    },
                );
            }
        }
        Ok(())
    }

    fn drop_delivery_filter(&self, msg_type: MsgType, sink: &MessageSinkRef) {
        let mut table = self.subscribers.write();
        if let Some(subs) = table.get_mut(&msg_type.id) {
            if let Some(index) = subs.position(sink.ordinal()) {
                let entry = &mut subs.entries[index];
                entry.filter = None;
                if !entry.subscribed {
                    subs.entries.remove(index);
                }
            }
        }
    }

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

        if delivery.message.is_mutable() {
            return Err(Error::MutableMessageCannotBeDeliveredViaMpmcMbox);
        }
        if redirection_depth > MAX_REDIRECTION_DEPTH {
            self.trace(
                TraceOp::RedirectionDepthExceeded,
                msg_type,
                Some(redirection_depth),
            );
            return Ok(());
        }

        // Snapshot under the read lock; demands are pushed outside it.
        let recipients: Vec<(MessageSinkRef, Option<Arc<DeliveryFilter>>)> = {
            let table = self.subscribers.read();
            match table.get(&delivery.message.type_id()) {
                Some(subs) => subs
                    .entries
                    .iter()
                    .filter(|e| e.subscribed)
                    .map(|e| (Arc::clone(&e.sink), e.filter.clone()))
                    .collect(),
                None => Vec::new(),
            }
        };

        if recipients.is_empty() {
            self.trace(TraceOp::NoSubscribers, msg_type, None);
            return Ok(());
        }

        for (sink, filter) in recipients {
            if let Some(filter) = filter {
                let passed = filter.check(&delivery.message);
                self.tracing.emit(|| TraceEvent {
                    when: Utc::now(),
                    op: if passed {
                        TraceOp::FilterPassed
                    } else {
                        TraceOp::FilterRejected
                    },
                    mbox_id: self.id,
                    mbox_name: self.query_name(),
                    message_type: msg_type,
                    agent: Some(sink.agent_id()),
                    redirection_depth: None,
                });
                if !passed {
                    continue;
                }
            }
            sink.push_event(mode, self.id, delivery.clone(), redirection_depth);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Message, MessageRef};
    use crate::util::{AgentId, Priority};
    use parking_lot::Mutex;

    #[derive(Debug)]
    struct Keyed {
        key: u32,
    }

    impl Message for Keyed {
        const MESSAGE_TYPE: &'static str = "keyed";
    }

    struct RecordingSink {
        ordinal: u64,
        priority: Priority,
        agent: AgentId,
        received: Mutex<Vec<u32>>,
    }

    impl RecordingSink {
        fn make(ordinal: u64, priority: Priority) -> Arc<Self> {
            Arc::new(Self {
                ordinal,
                priority,
                agent: AgentId::new(),
                received: Mutex::new(Vec::new()),
            })
        }
    }

    impl super::super::traits::MessageSink for RecordingSink {
        fn ordinal(&self) -> u64 {
            self.ordinal
        }

        fn agent_id(&self) -> AgentId {
            self.agent
        }

        fn priority(&self) -> Priority {
            self.priority
        }

        fn push_event(
            &self,
            _mode: DeliveryMode,
            _mbox_id: MboxId,
            delivery: Delivery,
            _redirection_depth: u32,
        ) {
            if let Some(m) = delivery.message.downcast_ref::<Keyed>() {
                self.received.lock().push(m.key);
            }
        }
    }

    fn mbox() -> MpmcMbox {
        MpmcMbox::new(
            MboxId::from_raw(1),
            None,
            Arc::new(TracingHolder::default()),
        )
    }

    fn deliver(mbox: &MpmcMbox, key: u32) {
        mbox.do_deliver_message(
            DeliveryMode::Ordinary,
            Delivery::plain(MessageRef::immutable(Keyed { key })),
            0,
        )
        .ok();
    }

    #[test]
    fn test_subscribe_and_deliver() {
        let mbox = mbox();
        let sink = RecordingSink::make(1, Priority::P0);
        mbox.subscribe_event_handler(MsgType::of::<Keyed>(), Arc::clone(&sink) as _)
            .ok();

        deliver(&mbox, 5);
        assert_eq!(*sink.received.lock(), vec![5]);
    }

    #[test]
    fn test_subscribe_is_idempotent() {
        let mbox = mbox();
        let sink = RecordingSink::make(1, Priority::P0);
        for _ in 0..3 {
            mbox.subscribe_event_handler(MsgType::of::<Keyed>(), Arc::clone(&sink) as _)
                .ok();
        }

        deliver(&mbox, 1);
        assert_eq!(sink.received.lock().len(), 1);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let mbox = mbox();
        let sink = RecordingSink::make(1, Priority::P0);
        let sink_ref: MessageSinkRef = Arc::clone(&sink) as _;
        mbox.subscribe_event_handler(MsgType::of::<Keyed>(), Arc::clone(&sink_ref))
            .ok();
        mbox.unsubscribe_event_handler(MsgType::of::<Keyed>(), &sink_ref);

        deliver(&mbox, 1);
        assert!(sink.received.lock().is_empty());
    }

    #[test]
    fn test_mutable_message_is_rejected() {
        let mbox = mbox();
        let result = mbox.do_deliver_message(
            DeliveryMode::Ordinary,
            Delivery::plain(MessageRef::mutable(Keyed { key: 1 })),
            0,
        );
        assert_eq!(
            result,
            Err(Error::MutableMessageCannotBeDeliveredViaMpmcMbox)
        );
    }

    #[test]
    fn test_redirection_depth_bound() {
        let mbox = mbox();
        let sink = RecordingSink::make(1, Priority::P0);
        mbox.subscribe_event_handler(MsgType::of::<Keyed>(), Arc::clone(&sink) as _)
            .ok();

        mbox.do_deliver_message(
            DeliveryMode::Ordinary,
            Delivery::plain(MessageRef::immutable(Keyed { key: 1 })),
            MAX_REDIRECTION_DEPTH + 1,
        )
        .ok();
        assert!(sink.received.lock().is_empty());
    }

    #[test]
    fn test_delivery_filter_drops() {
        let mbox = mbox();
        let sink = RecordingSink::make(1, Priority::P0);
        let sink_ref: MessageSinkRef = Arc::clone(&sink) as _;
        mbox.subscribe_event_handler(MsgType::of::<Keyed>(), Arc::clone(&sink_ref))
            .ok();
        mbox.set_delivery_filter(
            MsgType::of::<Keyed>(),
            Arc::new(DeliveryFilter::new::<Keyed, _>(|m| m.key == 1)),
            Arc::clone(&sink_ref),
        )
        .ok();

        deliver(&mbox, 0);
        deliver(&mbox, 1);
        deliver(&mbox, 2);
        assert_eq!(*sink.received.lock(), vec![1]);
    }

    #[test]
    fn test_filter_without_subscription_then_drop_keeps_type_silent() {
        let mbox = mbox();
        let sink = RecordingSink::make(1, Priority::P0);
        let sink_ref: MessageSinkRef = Arc::clone(&sink) as _;

        // Filter alone does not make the agent a subscriber.
        mbox.set_delivery_filter(
            MsgType::of::<Keyed>(),
            Arc::new(DeliveryFilter::new::<Keyed, _>(|_| true)),
            Arc::clone(&sink_ref),
        )
        .ok();
        deliver(&mbox, 1);
        assert!(sink.received.lock().is_empty());

        mbox.drop_delivery_filter(MsgType::of::<Keyed>(), &sink_ref);
        deliver(&mbox, 1);
        assert!(sink.received.lock().is_empty());
    }

    #[test]
    fn test_priority_ordering_of_subscribers() {
        let mbox = mbox();
        let low = RecordingSink::make(1, Priority::P1);
        let high = RecordingSink::make(2, Priority::P6);
        mbox.subscribe_event_handler(MsgType::of::<Keyed>(), Arc::clone(&low) as _)
            .ok();
        mbox.subscribe_event_handler(MsgType::of::<Keyed>(), Arc::clone(&high) as _)
            .ok();

        let order = Mutex::new(Vec::<u64>::new());
        {
            let table = mbox.subscribers.read();
            if let Some(subs) = table.get(&TypeId::of::<Keyed>()) {
                for e in &subs.entries {
                    order.lock().push(e.sink.ordinal());
                }
            }
        }
        assert_eq!(*order.lock(), vec![2, 1]);
    }
}
