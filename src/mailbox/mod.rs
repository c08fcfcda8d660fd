//! Mailboxes: routing of messages to subscribers.
//!
//! Two variants exist. A multi-producer / multi-consumer (MPMC) mailbox
//! routes to any number of subscribers, ordered by descending agent priority,
//! and supports delivery filters. A multi-producer / single-consumer
//! ("direct", MPSC) mailbox is bound to exactly one owning agent; foreign
//! subscriptions and delivery filters are rejected, and it is the only
//! mailbox kind that accepts mutable messages.

pub mod direct;
pub mod filter;
pub mod mpmc;
pub mod repository;
pub mod traits;

pub use filter::DeliveryFilter;
pub use traits::{DeliveryMode, MboxKind, Mbox, MboxRef, MessageSink, MessageSinkRef, MsgType};

/// Redirection-depth bound: a delivery redirected or transformed more than
/// this many times is dropped (and traced) to break reaction cycles.
pub const MAX_REDIRECTION_DEPTH: u32 = 32;
