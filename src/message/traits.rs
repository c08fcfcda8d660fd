// Layer 1: Standard library imports
use std::fmt::Debug;

// Layer 2: Third-party crate imports
// (none for this module)

// Layer 3: Internal module imports
// (none)

/// Core message trait with compile-time type identification.
///
/// The runtime keys subscriptions, delivery filters, and rate limits by the
/// message's `TypeId`; `MESSAGE_TYPE` provides a stable human-readable name
/// for tracing and stats without runtime reflection.
///
/// # Example
/// ```rust
/// use troupe::message::Message;
///
/// #[derive(Debug)]
/// struct Ping {
///     round: u64,
/// }
///
/// impl Message for Ping {
///     const MESSAGE_TYPE: &'static str = "ping";
/// }
/// ```
pub trait Message: Send + Sync + Debug + 'static {
    /// Unique message type identifier (compile-time constant).
    const MESSAGE_TYPE: &'static str;
}

/// A message with no payload bytes.
///
/// Signals are ordinary messages whose value carries no information; the
/// `Default` bound lets the runtime materialise the (zero-sized) instance on
/// the sending side.
///
/// # Example
/// ```rust
/// use troupe::message::{Message, Signal};
///
/// #[derive(Debug, Default)]
/// struct Tick;
///
/// impl Message for Tick {
///     const MESSAGE_TYPE: &'static str = "tick";
/// }
/// impl Signal for Tick {}
/// ```
pub trait Signal: Message + Default {}
