//! Standard coop reg/dereg notificators that publish messages to a mailbox.

// Layer 1: Standard library imports
// (none)

// Layer 2: Third-party crate imports
// (none)

// Layer 3: Internal module imports
use crate::environment::Environment;
use crate::mailbox::MboxRef;
use crate::message::Message;
use crate::send::send;
use crate::util::CoopId;

use super::DeregReason;

/// Published when a cooperation finishes registration.
#[derive(Debug, Clone)]
pub struct CoopRegistered {
    /// The registered cooperation.
    pub coop: CoopId,
}

impl Message for CoopRegistered {
    const MESSAGE_TYPE: &'static str = "coop_registered";
}

/// Published when a cooperation is finally destroyed.
#[derive(Debug, Clone)]
pub struct CoopDeregistered {
    /// The destroyed cooperation.
    pub coop: CoopId,
    /// Why it was deregistered.
    pub reason: DeregReason,
}

impl Message for CoopDeregistered {
    const MESSAGE_TYPE: &'static str = "coop_deregistered";
}

/// A reg notificator sending [`CoopRegistered`] to `mbox`.
pub fn make_coop_reg_notificator(
    mbox: &MboxRef,
) -> impl FnOnce(&Environment, CoopId) + Send + 'static {
    let mbox = std::sync::Arc::clone(mbox);
    move |_env, coop| {
        if let Err(error) = send(&mbox, CoopRegistered { coop }) {
            tracing::warn!(%error, "coop reg notification failed");
        }
    }
}

/// A dereg notificator sending [`CoopDeregistered`] to `mbox`.
pub fn make_coop_dereg_notificator(
    mbox: &MboxRef,
) -> impl FnOnce(&Environment, CoopId, DeregReason) + Send + 'static {
    let mbox = std::sync::Arc::clone(mbox);
    move |_env, coop, reason| {
        if let Err(error) = send(&mbox, CoopDeregistered { coop, reason }) {
            tracing::warn!(%error, "coop dereg notification failed");
        }
    }
}
