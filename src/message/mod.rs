//! Message model: typed payloads, mutability tagging, envelopes.
//!
//! A payload is either *immutable* (shared by any number of subscribers) or
//! *mutable* (exclusive-owned, delivered to at most one subscriber through a
//! single-consumer mailbox). Envelopes wrap a payload and may intercept
//! delivery through an access hook.

pub mod envelope;
pub mod payload;
pub mod traits;

pub use envelope::{AccessContext, Envelope, EnvelopeRef, PayloadInvoker};
pub use payload::{MessageRef, MutMhood, Mutability};
pub use traits::{Message, Signal};

/// The unit travelling through mailboxes: a payload plus an optional
/// intercepting envelope.
#[derive(Clone)]
pub struct Delivery {
    pub(crate) message: MessageRef,
    pub(crate) envelope: Option<EnvelopeRef>,
}

impl Delivery {
    pub(crate) fn plain(message: MessageRef) -> Self {
        Self {
            message,
            envelope: None,
        }
    }

    pub(crate) fn enveloped(message: MessageRef, envelope: EnvelopeRef) -> Self {
        Self {
            message,
            envelope: Some(envelope),
        }
    }

    /// The payload carried by this delivery.
    pub fn message(&self) -> &MessageRef {
        &self.message
    }
}
