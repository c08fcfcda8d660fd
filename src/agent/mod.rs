//! Agents: stateful actors with lifecycle, hierarchical states, and typed
//! subscriptions.

pub mod context;
pub mod options;
pub mod runtime;
pub mod state;
pub mod traits;

pub use context::{AgentContext, SubscriptionBuilder};
pub use options::AgentOptions;
pub use runtime::AgentRef;
pub use state::{History, State, MAX_STATE_NESTING};
pub use traits::{Agent, ExceptionReaction};
