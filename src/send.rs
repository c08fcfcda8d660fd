//! Free sending functions.

// Layer 1: Standard library imports
// (none)

// Layer 2: Third-party crate imports
// (none)

// Layer 3: Internal module imports
use crate::error::Result;
use crate::mailbox::{DeliveryMode, MboxRef};
use crate::message::{Delivery, EnvelopeRef, Message, MessageRef, MutMhood, Signal};

/// Send an immutable message: any number of subscribers may observe it.
pub fn send<T: Message>(dest: &MboxRef, msg: T) -> Result<()> {
    dest.do_deliver_message(
        DeliveryMode::Ordinary,
        Delivery::plain(MessageRef::immutable(msg)),
        0,
    )
}

/// Send a mutable (exclusive-owned) message. Only single-consumer
/// destinations accept it; the receiving handler gets unique ownership.
pub fn send_mutable<T: Message>(dest: &MboxRef, msg: T) -> Result<()> {
    dest.do_deliver_message(
        DeliveryMode::Ordinary,
        Delivery::plain(MessageRef::mutable(msg)),
        0,
    )
}

/// Re-send a mutable message by move, preserving its heap allocation.
pub fn resend_mutable<T: Message>(dest: &MboxRef, mhood: MutMhood<T>) -> Result<()> {
    dest.do_deliver_message(
        DeliveryMode::Ordinary,
        Delivery::plain(MessageRef::mutable_boxed(mhood.take())),
        0,
    )
}

/// Send a zero-payload signal.
pub fn send_signal<S: Signal>(dest: &MboxRef) -> Result<()> {
    dest.do_deliver_message(
        DeliveryMode::Ordinary,
        Delivery::plain(MessageRef::signal::<S>()),
        0,
    )
}

/// Send a payload wrapped into an intercepting envelope.
pub fn send_enveloped<T: Message>(dest: &MboxRef, msg: T, envelope: EnvelopeRef) -> Result<()> {
    dest.do_deliver_message(
        DeliveryMode::Ordinary,
        Delivery::enveloped(MessageRef::immutable(msg), envelope),
        0,
    )
}
