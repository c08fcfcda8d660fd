//! Per-agent tuning applied when the agent is added to a cooperation.

// Layer 1: Standard library imports
use std::sync::Arc;

// Layer 2: Third-party crate imports
// (none for this module)

// Layer 3: Internal module imports
use crate::dispatcher::DispBinder;
use crate::limits::MessageLimits;
use crate::subscription::SubscriptionStorageKind;
use crate::util::Priority;

/// Tuning knobs of a single agent.
///
/// # Example
/// ```rust,ignore
/// coop.add_agent_with_opts(
///     Worker::new(),
///     AgentOptions::new()
///         .priority(Priority::P5)
///         .limits(MessageLimits::new().limit_then_drop::<Job>(128)?),
/// )?;
/// ```
#[derive(Default)]
pub struct AgentOptions {
    pub(crate) priority: Priority,
    pub(crate) limits: Option<MessageLimits>,
    pub(crate) binder: Option<Arc<dyn DispBinder>>,
    pub(crate) storage: Option<SubscriptionStorageKind>,
}

impl AgentOptions {
    /// Defaults: priority `P0`, no limits, coop's binder, environment's
    /// subscription storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the agent priority.
    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Install a message-limits table.
    pub fn limits(mut self, limits: MessageLimits) -> Self {
        self.limits = Some(limits);
        self
    }

    /// Bind this agent through `binder` instead of the coop default.
    pub fn binder(mut self, binder: Arc<dyn DispBinder>) -> Self {
        self.binder = Some(binder);
        self
    }

    /// Select the subscription-storage back-end for this agent.
    pub fn subscription_storage(mut self, storage: SubscriptionStorageKind) -> Self {
        self.storage = Some(storage);
        self
    }
}
