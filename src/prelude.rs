//! Prelude module for convenient imports.
//!
//! Re-exports the types and functions most applications need:
//!
//! ```rust
//! use troupe::prelude::*;
//! ```

pub use crate::agent::state::{History, State};
pub use crate::agent::{Agent, AgentContext, AgentOptions, AgentRef, ExceptionReaction};
pub use crate::coop::{CoopBuilder, CoopHandle, DeregReason};
pub use crate::environment::{
    launch, launch_with_params, Environment, EnvironmentParams, InfrastructureKind, WrappedEnv,
};
pub use crate::error::{Error, Result};
pub use crate::limits::{MessageLimits, Transformed};
pub use crate::mailbox::{Mbox, MboxRef};
pub use crate::mchain::{
    close_drop_content, close_retain_content, from, from_all, handler, handler_mutable, receive,
    receive_case, select, send_case, ChainCapacity, ChainOverflowReaction, ChainParams, ChainRef,
    MemoryUsage,
};
pub use crate::message::{Message, MutMhood, Signal};
pub use crate::send::{resend_mutable, send, send_enveloped, send_mutable, send_signal};
pub use crate::timer::{TimerId, TimerThreadKind};
pub use crate::util::{AgentId, CoopId, MboxId, Priority};
