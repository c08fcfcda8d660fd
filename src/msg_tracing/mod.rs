//! Message-delivery tracing hooks.
//!
//! When a tracer is installed on the environment, the delivery pipeline emits
//! a structured [`TraceEvent`] at every observable step: push to a mailbox,
//! filter decision, overlimit action, handler resolution, dead-letter
//! routing. An optional [`TraceFilter`] predicate can suppress events before
//! they reach the tracer.

// Layer 1: Standard library imports
use std::sync::Arc;

// Layer 2: Third-party crate imports
use chrono::{DateTime, Utc};
use serde::Serialize;

// Layer 3: Internal module imports
use crate::util::{AgentId, MboxId};

/// The pipeline step an event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TraceOp {
    /// A message entered `do_deliver_message` on a mailbox.
    Push,
    /// Same, for a delivery originated by the timer service.
    PushFromTimer,
    /// A delivery filter accepted the message for a subscriber.
    FilterPassed,
    /// A delivery filter rejected the message for a subscriber.
    FilterRejected,
    /// An execution demand was enqueued for a subscriber.
    DemandPushed,
    /// The mailbox had no subscriber for the message type.
    NoSubscribers,
    /// A handler was resolved at demand execution time.
    HandlerFound,
    /// No handler matched the current state and no dead-letter handler
    /// exists; the demand was consumed as a no-op.
    NoHandler,
    /// The dead-letter handler was used.
    DeadLetterHandler,
    /// The rate limiter discarded the message.
    OverlimitDrop,
    /// The rate limiter is about to abort the application.
    OverlimitAbort,
    /// The rate limiter redirected the message to another mailbox.
    OverlimitRedirect,
    /// The rate limiter transformed the message.
    OverlimitTransform,
    /// The redirection-depth bound was exceeded; the message was dropped.
    RedirectionDepthExceeded,
    /// A demand was discarded because the agent has no bound event queue
    /// or was deactivated.
    DemandDiscarded,
    /// A message chain stored an item.
    ChainStored,
    /// A message chain dropped an item (overflow policy or closed chain).
    ChainDropped,
}

/// A structured delivery-trace event.
#[derive(Debug, Clone, Serialize)]
pub struct TraceEvent {
    /// When the step happened.
    pub when: DateTime<Utc>,
    /// Which step this is.
    pub op: TraceOp,
    /// The mailbox (or chain) involved.
    pub mbox_id: MboxId,
    /// Human-readable mailbox name.
    pub mbox_name: String,
    /// Stable message type name.
    pub message_type: &'static str,
    /// The subscriber concerned, where one is known.
    pub agent: Option<AgentId>,
    /// Redirection depth of the delivery, where relevant.
    pub redirection_depth: Option<u32>,
}

/// Receiver of delivery-trace events.
pub trait DeliveryTracer: Send + Sync + 'static {
    /// Observe one event.
    fn trace(&self, event: &TraceEvent);
}

/// Predicate consulted before events reach the tracer.
pub trait TraceFilter: Send + Sync + 'static {
    /// Return `false` to suppress the event.
    fn filter(&self, event: &TraceEvent) -> bool;
}

impl<F> TraceFilter for F
where
    F: Fn(&TraceEvent) -> bool + Send + Sync + 'static,
{
    fn filter(&self, event: &TraceEvent) -> bool {
        self(event)
    }
}

/// Default tracer: forwards events to the `tracing` ecosystem at TRACE level.
#[derive(Debug, Default)]
pub struct TracingDeliveryTracer;

impl DeliveryTracer for TracingDeliveryTracer {
    fn trace(&self, event: &TraceEvent) {
        tracing::trace!(
            op = ?event.op,
            mbox = %event.mbox_id,
            mbox_name = %event.mbox_name,
            message_type = event.message_type,
            agent = ?event.agent,
            redirection_depth = ?event.redirection_depth,
            "msg_trace"
        );
    }
}

/// Environment-held tracer slot.
///
/// Building the event is deferred behind the `is_enabled` check so that the
/// pipeline pays nothing when tracing is off.
#[derive(Default)]
pub(crate) struct TracingHolder {
    tracer: Option<Arc<dyn DeliveryTracer>>,
    filter: Option<Arc<dyn TraceFilter>>,
}

impl TracingHolder {
    pub(crate) fn new(
        tracer: Option<Arc<dyn DeliveryTracer>>,
        filter: Option<Arc<dyn TraceFilter>>,
    ) -> Self {
        Self { tracer, filter }
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.tracer.is_some()
    }

    pub(crate) fn emit(&self, build: impl FnOnce() -> TraceEvent) {
        let Some(tracer) = &self.tracer else {
            return;
        };
        let event = build();
        if let Some(filter) = &self.filter {
            if !filter.filter(&event) {
                return;
            }
        }
        tracer.trace(&event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct CollectingTracer {
        ops: Mutex<Vec<TraceOp>>,
    }

    impl DeliveryTracer for CollectingTracer {
        fn trace(&self, event: &TraceEvent) {
            self.ops.lock().push(event.op);
        }
    }

    fn event(op: TraceOp) -> TraceEvent {
        TraceEvent {
            when: Utc::now(),
            op,
            mbox_id: MboxId::from_raw(1),
            mbox_name: "test".to_string(),
            message_type: "msg",
            agent: None,
            redirection_depth: None,
        }
    }

    #[test]
    fn test_disabled_holder_builds_nothing() {
        let holder = TracingHolder::default();
        assert!(!holder.is_enabled());

        let mut built = false;
        holder.emit(|| {
            built = true;
            event(TraceOp::Push)
        });
        assert!(!built);
    }

    #[test]
    fn test_events_reach_tracer() {
        let tracer = Arc::new(CollectingTracer {
            ops: Mutex::new(Vec::new()),
        });
        let holder = TracingHolder::new(Some(Arc::clone(&tracer) as _), None);

        holder.emit(|| event(TraceOp::Push));
        holder.emit(|| event(TraceOp::DemandPushed));
        assert_eq!(*tracer.ops.lock(), vec![TraceOp::Push, TraceOp::DemandPushed]);
    }

    #[test]
    fn test_filter_suppresses_events() {
        let tracer = Arc::new(CollectingTracer {
            ops: Mutex::new(Vec::new()),
        });
        let filter: Arc<dyn TraceFilter> =
            Arc::new(|e: &TraceEvent| e.op != TraceOp::FilterRejected);
        let holder = TracingHolder::new(Some(Arc::clone(&tracer) as _), Some(filter));

        holder.emit(|| event(TraceOp::FilterRejected));
        holder.emit(|| event(TraceOp::FilterPassed));
        assert_eq!(*tracer.ops.lock(), vec![TraceOp::FilterPassed]);
    }
}
