//! Message-rate limiting.
//!
//! An agent may declare a table of per-type quotas. A shared atomic counter
//! tracks in-flight demands per type; a `send` that would exceed the quota
//! triggers the declared overflow reaction instead of enqueueing.

// Layer 1: Standard library imports
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

// Layer 2: Third-party crate imports
use chrono::Utc;

// Layer 3: Internal module imports
use crate::error::{Error, Result};
use crate::mailbox::{DeliveryMode, MboxRef, MsgType};
use crate::message::{Delivery, Message, MessageRef, MutMhood};
use crate::msg_tracing::{TraceEvent, TraceOp, TracingHolder};
use crate::util::{AgentId, MboxId};

/// The destination produced by a transform reaction.
pub struct Transformed {
    pub(crate) dest: MboxRef,
    pub(crate) delivery: Delivery,
}

impl Transformed {
    /// Deliver `msg` as an immutable message to `dest`.
    pub fn new<U: Message>(dest: &MboxRef, msg: U) -> Self {
        Self {
            dest: Arc::clone(dest),
            delivery: Delivery::plain(MessageRef::immutable(msg)),
        }
    }

    /// Deliver `msg` as a mutable (exclusive-owned) message to `dest`.
    pub fn new_mutable<U: Message>(dest: &MboxRef, msg: U) -> Self {
        Self {
            dest: Arc::clone(dest),
            delivery: Delivery::plain(MessageRef::mutable(msg)),
        }
    }
}

pub(crate) enum OverflowReaction {
    Drop,
    Abort,
    Redirect(Box<dyn Fn() -> MboxRef + Send + Sync>),
    Transform(Box<dyn Fn(&Delivery) -> Option<Transformed> + Send + Sync>),
}

/// Shared control block of one quota entry.
pub(crate) struct LimitBlock {
    pub(crate) quota: usize,
    pub(crate) in_flight: AtomicUsize,
    pub(crate) reaction: OverflowReaction,
    pub(crate) type_name: &'static str,
}

/// RAII in-flight token: one per enqueued demand, released when the demand
/// is executed or destroyed.
pub(crate) struct LimitGuard {
    block: Arc<LimitBlock>,
}

impl LimitGuard {
    pub(crate) fn try_acquire(block: &Arc<LimitBlock>) -> Option<Self> {
        let previous = block.in_flight.fetch_add(1, Ordering::AcqRel);
        if previous < block.quota {
            Some(Self {
                block: Arc::clone(block),
            })
        } else {
            block.in_flight.fetch_sub(1, Ordering::AcqRel);
            None
        }
    }
}

impl Drop for LimitGuard {
    fn drop(&mut self) {
        self.block.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Per-agent table of `(message type → quota, overflow reaction)`.
///
/// Once a table is present, every subscribed type must have an entry or be
/// covered by the `any_unspecified` fallback.
///
/// # Example
/// ```rust,ignore
/// let limits = MessageLimits::new()
///     .limit_then_drop::<Telemetry>(1000)?
///     .limit_then_abort::<Critical>(10)?
///     .any_unspecified_then_drop(100)?;
/// ```
pub struct MessageLimits {
    entries: HashMap<TypeId, Arc<LimitBlock>>,
    fallback: Option<Arc<LimitBlock>>,
}

impl MessageLimits {
    /// Start an empty table.
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            fallback: None,
        }
    }

    fn add(mut self, msg_type: MsgType, quota: usize, reaction: OverflowReaction) -> Result<Self> {
        if self.entries.contains_key(&msg_type.id) {
            return Err(Error::SeveralLimitsForOneMessageType {
                message_type: msg_type.name,
            });
        }
        self.entries.insert(
            msg_type.id,
            Arc::new(LimitBlock {
                quota,
                in_flight: AtomicUsize::new(0),
                reaction,
                type_name: msg_type.name,
            }),
        );
        Ok(self)
    }

    /// Overquota messages of `T` are silently discarded.
    pub fn limit_then_drop<T: Message>(self, quota: usize) -> Result<Self> {
        self.add(MsgType::of::<T>(), quota, OverflowReaction::Drop)
    }

    /// Overquota messages of `T` terminate the process.
    pub fn limit_then_abort<T: Message>(self, quota: usize) -> Result<Self> {
        self.add(MsgType::of::<T>(), quota, OverflowReaction::Abort)
    }

    /// Overquota messages of `T` are redelivered to the mailbox produced by
    /// `target`, with an incremented redirection depth.
    pub fn limit_then_redirect<T, F>(self, quota: usize, target: F) -> Result<Self>
    where
        T: Message,
        F: Fn() -> MboxRef + Send + Sync + 'static,
    {
        self.add(
            MsgType::of::<T>(),
            quota,
            OverflowReaction::Redirect(Box::new(target)),
        )
    }

    /// Overquota immutable messages of `T` are transformed and redelivered.
    pub fn limit_then_transform<T, F>(self, quota: usize, transform: F) -> Result<Self>
    where
        T: Message,
        F: Fn(&T) -> Transformed + Send + Sync + 'static,
    {
        self.add(
            MsgType::of::<T>(),
            quota,
            OverflowReaction::Transform(Box::new(move |delivery| {
                delivery.message.downcast_ref::<T>().map(&transform)
            })),
        )
    }

    /// Overquota mutable messages of `T` are transformed (taking ownership)
    /// and redelivered.
    pub fn limit_then_transform_mutable<T, F>(self, quota: usize, transform: F) -> Result<Self>
    where
        T: Message,
        F: Fn(MutMhood<T>) -> Transformed + Send + Sync + 'static,
    {
        self.add(
            MsgType::of::<T>(),
            quota,
            OverflowReaction::Transform(Box::new(move |delivery| {
                delivery
                    .message
                    .take_mutable::<T>()
                    .map(|boxed| transform(MutMhood::new(boxed)))
            })),
        )
    }

    fn set_fallback(mut self, quota: usize, reaction: OverflowReaction) -> Result<Self> {
        if self.fallback.is_some() {
            return Err(Error::SeveralLimitsForOneMessageType {
                message_type: "<any_unspecified>",
            });
        }
        self.fallback = Some(Arc::new(LimitBlock {
            quota,
            in_flight: AtomicUsize::new(0),
            reaction,
            type_name: "<any_unspecified>",
        }));
        Ok(self)
    }

    /// Fallback quota applied to every type without an explicit entry;
    /// overquota messages are dropped.
    pub fn any_unspecified_then_drop(self, quota: usize) -> Result<Self> {
        self.set_fallback(quota, OverflowReaction::Drop)
    }

    /// Fallback quota; overquota messages terminate the process.
    pub fn any_unspecified_then_abort(self, quota: usize) -> Result<Self> {
        self.set_fallback(quota, OverflowReaction::Abort)
    }

    /// Fallback quota; overquota messages are redirected.
    pub fn any_unspecified_then_redirect<F>(self, quota: usize, target: F) -> Result<Self>
    where
        F: Fn() -> MboxRef + Send + Sync + 'static,
    {
        self.set_fallback(quota, OverflowReaction::Redirect(Box::new(target)))
    }

    pub(crate) fn block_for(&self, type_id: TypeId) -> Option<&Arc<LimitBlock>> {
        self.entries.get(&type_id).or(self.fallback.as_ref())
    }

    /// True when subscribing to `type_id` is permitted under this table.
    pub(crate) fn covers(&self, type_id: TypeId) -> bool {
        self.entries.contains_key(&type_id) || self.fallback.is_some()
    }
}

impl Default for MessageLimits {
    fn default() -> Self {
        Self::new()
    }
}

/// Execute an overflow reaction for a rejected delivery.
pub(crate) fn run_overflow_reaction(
    block: &Arc<LimitBlock>,
    mode: DeliveryMode,
    source_mbox: MboxId,
    source_mbox_name: &str,
    agent: AgentId,
    delivery: Delivery,
    redirection_depth: u32,
    tracing_holder: &TracingHolder,
) {
    let trace = |op: TraceOp| {
        tracing_holder.emit(|| TraceEvent {
            when: Utc::now(),
            op,
            mbox_id: source_mbox,
            mbox_name: source_mbox_name.to_string(),
            message_type: block.type_name,
            agent: Some(agent),
            redirection_depth: Some(redirection_depth),
        });
    };

    match &block.reaction {
        OverflowReaction::Drop => trace(TraceOp::OverlimitDrop),
        OverflowReaction::Abort => {
            trace(TraceOp::OverlimitAbort);
            tracing::error!(
                message_type = block.type_name,
                quota = block.quota,
                "message limit exceeded with abort reaction; aborting"
            );
            std::process::abort();
        }
        OverflowReaction::Redirect(target) => {
            trace(TraceOp::OverlimitRedirect);
            let dest = target();
            if let Err(error) = dest.do_deliver_message(mode, delivery, redirection_depth + 1) {
                tracing::error!(%error, "overlimit redirect failed");
            }
        }
        OverflowReaction::Transform(transform) => {
            trace(TraceOp::OverlimitTransform);
            if let Some(transformed) = transform(&delivery) {
                if let Err(error) = transformed.dest.do_deliver_message(
                    mode,
                    transformed.delivery,
                    redirection_depth + 1,
                ) {
                    tracing::error!(%error, "overlimit transform delivery failed");
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)] // Tests are allowed to panic on violated expectations
mod tests {
    use super::*;

    #[derive(Debug)]
    struct DataIn {
        #[allow(dead_code)]
        text: String,
    }

    impl Message for DataIn {
        const MESSAGE_TYPE: &'static str = "data_in";
    }

    #[derive(Debug)]
    struct Other;

    impl Message for Other {
        const MESSAGE_TYPE: &'static str = "other";
    }

    #[test]
    fn test_duplicate_entry_rejected() {
        let limits = MessageLimits::new().limit_then_drop::<DataIn>(1);
        let duplicated = limits.and_then(|l| l.limit_then_drop::<DataIn>(2));
        assert_eq!(
            duplicated.err(),
            Some(Error::SeveralLimitsForOneMessageType {
                message_type: "data_in"
            })
        );
    }

    #[test]
    fn test_block_lookup_and_fallback() {
        let limits = MessageLimits::new()
            .limit_then_drop::<DataIn>(1)
            .and_then(|l| l.any_unspecified_then_drop(5));
        let limits = match limits {
            Ok(l) => l,
            Err(e) => panic!("table must build: {e}"),
        };

        assert!(limits.covers(TypeId::of::<DataIn>()));
        assert!(limits.covers(TypeId::of::<Other>()));
        let specific = limits.block_for(TypeId::of::<DataIn>()).map(|b| b.quota);
        let fallback = limits.block_for(TypeId::of::<Other>()).map(|b| b.quota);
        assert_eq!(specific, Some(1));
        assert_eq!(fallback, Some(5));
    }

    #[test]
    fn test_missing_entry_without_fallback() {
        let limits = match MessageLimits::new().limit_then_drop::<DataIn>(1) {
            Ok(l) => l,
            Err(e) => panic!("table must build: {e}"),
        };
        assert!(!limits.covers(TypeId::of::<Other>()));
        assert!(limits.block_for(TypeId::of::<Other>()).is_none());
    }

    #[test]
    fn test_guard_respects_quota() {
        let block = Arc::new(LimitBlock {
            quota: 2,
            in_flight: AtomicUsize::new(0),
            reaction: OverflowReaction::Drop,
            type_name: "data_in",
        });

        let first = LimitGuard::try_acquire(&block);
        let second = LimitGuard::try_acquire(&block);
        assert!(first.is_some());
        assert!(second.is_some());
        assert!(LimitGuard::try_acquire(&block).is_none());

        drop(first);
        assert!(LimitGuard::try_acquire(&block).is_some());
    }

    #[test]
    fn test_zero_quota_always_overflows() {
        let block = Arc::new(LimitBlock {
            quota: 0,
            in_flight: AtomicUsize::new(0),
            reaction: OverflowReaction::Drop,
            type_name: "data_in",
        });
        assert!(LimitGuard::try_acquire(&block).is_none());
        assert_eq!(block.in_flight.load(Ordering::Acquire), 0);
    }
}
