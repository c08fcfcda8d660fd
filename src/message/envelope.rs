//! Envelopes: opaque wrappers that can intercept delivery.
//!
//! The runtime carries an envelope through filtering and subscription lookup
//! unchanged. Once a handler is resolved it calls
//! `access_hook(HandlerFound, invoker)` and the envelope decides whether, and
//! with which payload, to call `invoker.invoke`. The hook runs under a
//! no-unwind guarantee: a panic escaping it terminates the process.

// Layer 1: Standard library imports
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

// Layer 2: Third-party crate imports
// (none for this module)

// Layer 3: Internal module imports
use super::payload::MessageRef;

/// The point in the delivery pipeline at which the envelope is consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessContext {
    /// The message is about to be pushed towards a subscriber.
    DeliveryAttempt,
    /// A handler has been resolved and is ready to run.
    HandlerFound,
}

/// Callback through which an envelope hands a payload back to the runtime.
pub trait PayloadInvoker {
    /// Invoke the pending action (handler call, transformation, ...) with
    /// the given payload. Not calling it suppresses the delivery.
    fn invoke(&mut self, message: &MessageRef);
}

/// An opaque wrapper around a payload.
pub trait Envelope: Send + Sync + 'static {
    /// Intercept an access to the wrapped payload.
    fn access_hook(&self, context: AccessContext, invoker: &mut dyn PayloadInvoker);
}

/// Shared handle to an envelope.
pub type EnvelopeRef = Arc<dyn Envelope>;

/// Call an envelope hook under the no-unwind guarantee.
pub(crate) fn invoke_access_hook(
    envelope: &EnvelopeRef,
    context: AccessContext,
    invoker: &mut dyn PayloadInvoker,
) {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        envelope.access_hook(context, invoker);
    }));
    if outcome.is_err() {
        tracing::error!("panic escaped an envelope access hook; aborting");
        std::process::abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;

    #[derive(Debug)]
    struct Inner {
        value: u32,
    }

    impl Message for Inner {
        const MESSAGE_TYPE: &'static str = "inner";
    }

    struct PassThrough {
        message: MessageRef,
    }

    impl Envelope for PassThrough {
        fn access_hook(&self, _context: AccessContext, invoker: &mut dyn PayloadInvoker) {
            invoker.invoke(&self.message);
        }
    }

    struct Suppressing;

    impl Envelope for Suppressing {
        fn access_hook(&self, _context: AccessContext, _invoker: &mut dyn PayloadInvoker) {
            // Deliberately never invokes.
        }
    }

    struct Recorder {
        seen: Option<u32>,
    }

    impl PayloadInvoker for Recorder {
        fn invoke(&mut self, message: &MessageRef) {
            self.seen = message.downcast_ref::<Inner>().map(|m| m.value);
        }
    }

    #[test]
    fn test_pass_through_envelope_invokes_payload() {
        let envelope: EnvelopeRef = Arc::new(PassThrough {
            message: MessageRef::immutable(Inner { value: 11 }),
        });
        let mut recorder = Recorder { seen: None };
        invoke_access_hook(&envelope, AccessContext::HandlerFound, &mut recorder);
        assert_eq!(recorder.seen, Some(11));
    }

    #[test]
    fn test_suppressing_envelope_skips_invocation() {
        let envelope: EnvelopeRef = Arc::new(Suppressing);
        let mut recorder = Recorder { seen: None };
        invoke_access_hook(&envelope, AccessContext::HandlerFound, &mut recorder);
        assert_eq!(recorder.seen, None);
    }
}
