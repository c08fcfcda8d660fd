//! Per-agent subscription store.
//!
//! Subscriptions are keyed `(mailbox, message type, state)` and resolve to an
//! event handler with a thread-safety flag. Handler lookup at dispatch time
//! walks the active state path leaf→root and returns the first match; the
//! agent's dead-letter table is the fallback.

pub mod storage;

pub use storage::SubscriptionStorageKind;
pub(crate) use storage::{
    EventHandler, HandlerInvoker, SubscrEntry, SubscrKey, SubscriptionStorage,
};
