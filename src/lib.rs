//! # troupe - Supervised Agent / Message-Passing Runtime
//!
//! An in-process actor runtime for building concurrent applications out of
//! lightweight stateful agents. Agents are grouped into supervised
//! *cooperations*, dispatched onto pluggable work schedulers, and exchange
//! messages through typed mailboxes and bounded message chains.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use troupe::prelude::*;
//!
//! #[derive(Debug)]
//! struct Hello {
//!     text: String,
//! }
//!
//! impl Message for Hello {
//!     const MESSAGE_TYPE: &'static str = "hello";
//! }
//!
//! struct Greeter;
//!
//! impl Agent for Greeter {
//!     fn so_define_agent(&mut self, ctx: &mut AgentContext<Self>) -> Result<()> {
//!         ctx.subscribe_self()
//!             .event(|_a: &mut Self, ctx, msg: &Hello| {
//!                 println!("{}", msg.text);
//!                 ctx.deregister_coop(DeregReason::Normal);
//!             })?;
//!         Ok(())
//!     }
//! }
//!
//! fn main() -> Result<()> {
//!     launch(|env| {
//!         env.introduce_coop(|coop| {
//!             let greeter = coop.add_agent(Greeter)?;
//!             send(
//!                 &greeter.direct_mbox(),
//!                 Hello {
//!                     text: "Hello, World!".to_string(),
//!                 },
//!             )
//!         })?;
//!         Ok(())
//!     })
//! }
//! ```
//!
//! # Module Organization
//!
//! ## Core
//! - [`agent`] - Agent trait, lifecycle, hierarchical states, typed
//!   subscriptions
//! - [`message`] - Message/Signal traits, mutability tagging, envelopes
//! - [`mailbox`] - MPMC and direct (MPSC) mailboxes, delivery filters
//! - [`coop`] - Cooperation trees, atomic registration, usage counters
//!
//! ## Scheduling
//! - [`dispatcher`] - `one_thread`, `active_obj`, `active_group`,
//!   `thread_pool`, `adv_thread_pool`, and the priority variants
//! - [`timer`] - Delayed and periodic delivery (heap / list / wheel)
//!
//! ## Plumbing
//! - [`environment`] - Environment lifecycle, launch, stop guards
//! - [`limits`] - Per-agent message-rate limiting with overflow reactions
//! - [`mchain`] - Bounded typed chains with `receive` and `select`
//!
//! ## Observability & testing
//! - [`stats`] - Sampling counters distributed as messages
//! - [`msg_tracing`] - Structured delivery tracing
//! - [`testing`] - Scenario-based testing harness

pub mod agent;
pub mod coop;
pub mod dispatcher;
pub mod environment;
pub mod error;
pub mod limits;
pub mod mailbox;
pub mod mchain;
pub mod message;
pub mod msg_tracing;
pub mod prelude;
pub(crate) mod queue;
pub mod send;
pub mod stats;
pub mod subscription;
pub mod testing;
pub mod timer;
pub mod util;

// Re-export commonly used types
pub use agent::{
    Agent, AgentContext, AgentOptions, AgentRef, ExceptionReaction, History, State,
};
pub use coop::{CoopBuilder, CoopHandle, DeregReason};
pub use environment::{launch, launch_with_params, Environment, EnvironmentParams, WrappedEnv};
pub use error::{Error, Result};
pub use limits::MessageLimits;
pub use mailbox::{Mbox, MboxRef};
pub use mchain::ChainRef;
pub use message::{Message, MutMhood, Signal};
pub use send::{resend_mutable, send, send_enveloped, send_mutable, send_signal};
pub use timer::TimerId;
pub use util::{AgentId, CoopId, MboxId, Priority};
