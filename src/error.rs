//! Runtime error kinds.
//!
//! Every failure the runtime can raise is one of the typed kinds below.
//! Classification is always by kind, never by message text; the `Display`
//! strings exist for logs only.

// Layer 1: Standard library imports
// (none)

// Layer 2: Third-party crate imports
use thiserror::Error;

// Layer 3: Internal module imports
use crate::util::Priority;

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Closed set of runtime error kinds.
///
/// Errors surface synchronously from the call that caused them. Panics from
/// user event handlers are not represented here; they are routed through the
/// agent's exception reaction instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum Error {
    /// An empty string was passed where a non-empty name is required.
    #[error("empty name where a non-empty name is required")]
    EmptyName,

    /// A binder referred to a named dispatcher that does not exist.
    #[error("named dispatcher not found: {name}")]
    NamedDispatcherNotFound {
        /// The name the binder asked for.
        name: String,
    },

    /// A binder targeted a dispatcher of a different variant.
    #[error("dispatcher type mismatch for: {name}")]
    DispatcherTypeMismatch {
        /// The name of the offending dispatcher.
        name: String,
    },

    /// Dispatcher or binding creation attempted after shutdown was initiated.
    #[error("dispatcher creation failed: environment shutdown in progress")]
    DispatcherCreationFailed,

    /// Cross-agent subscription or filter on a single-consumer mailbox.
    #[error("illegal subscriber for MPSC mailbox")]
    IllegalSubscriberForMpscMbox,

    /// A mutable (exclusive-owned) message was sent to a MPMC mailbox.
    #[error("mutable message cannot be delivered via MPMC mailbox")]
    MutableMessageCannotBeDeliveredViaMpmcMbox,

    /// Subscription to a message type missing from a present limits table.
    #[error("message has no limit defined: {message_type}")]
    MessageHasNoLimitDefined {
        /// Name of the unlimited message type.
        message_type: &'static str,
    },

    /// Two quota entries were declared for the same message type.
    #[error("several limits defined for one message type: {message_type}")]
    SeveralLimitsForOneMessageType {
        /// Name of the duplicated message type.
        message_type: &'static str,
    },

    /// A delivery filter was attached to a single-consumer mailbox.
    #[error("delivery filter cannot be used on MPSC mailbox")]
    DeliveryFilterCannotBeUsedOnMpscMbox,

    /// State nesting exceeded the maximum supported depth.
    #[error("state nesting is too deep (max {max})")]
    StateNestingTooDeep {
        /// The depth bound that was exceeded.
        max: usize,
    },

    /// A state switch was requested while another switch was in progress.
    #[error("another state switch already in progress")]
    AnotherStateSwitchInProgress,

    /// A negative pause was passed to a delayed/periodic send.
    #[error("negative value for pause")]
    NegativeValueForPause,

    /// A negative period was passed to a periodic send.
    #[error("negative value for period")]
    NegativeValueForPeriod,

    /// A zero quote was configured for a round-robin priority.
    #[error("illegal zero quote for priority {priority:?}")]
    PriorityQuoteIllegalValue {
        /// The priority the zero quote was assigned to.
        priority: Priority,
    },

    /// A stop guard was installed after stop had already been initiated.
    #[error("cannot set stop guard when stop is already started")]
    CannotSetStopGuardWhenStopIsStarted,

    /// Autoshutdown was disabled on an infrastructure that requires it.
    #[error("autoshutdown must be enabled for this environment infrastructure")]
    AutoshutdownMustBeEnabled,

    /// A dispatcher binder was assigned to an agent twice.
    #[error("dispatcher binder already set for agent")]
    DispBinderAlreadySetForAgent,

    /// An agent reached registration without a dispatcher binder.
    #[error("no dispatcher binder for agent")]
    NoDispBinderForAgent,

    /// `wait()` was invoked from a worker thread of the same dispatcher.
    #[error("a work thread cannot join itself")]
    UnableToJoinThreadByItself,

    /// A subscription with the same (mailbox, type, state) key already exists.
    #[error("event handler already provided for: {message_type}")]
    EventHandlerAlreadyProvided {
        /// Name of the message type with the duplicate subscription.
        message_type: &'static str,
    },

    /// The agent was deactivated and rejects new subscriptions.
    #[error("agent is deactivated")]
    AgentDeactivated,

    /// A runtime-mutating operation was attempted from a thread-safe handler.
    #[error("operation requires an exclusive (non-thread-safe) handler")]
    OperationRequiresExclusiveHandler,

    /// A bounded chain overflowed under the `throw` overflow reaction.
    #[error("message chain is overloaded")]
    MessageChainOverflow,
}
