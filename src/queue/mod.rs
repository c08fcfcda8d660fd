//! Execution demands and the event-queue contract.
//!
//! A demand is one queued "invoke this on this agent" record. The event
//! queue of an agent is strictly FIFO; dispatchers pop demands and execute
//! them without looking inside.

// Layer 1: Standard library imports
use std::sync::Arc;

// Layer 2: Third-party crate imports
// (none for this module)

// Layer 3: Internal module imports
use crate::agent::runtime::{AgentCell, HandlerSearch};
use crate::agent::state::State;
use crate::limits::LimitGuard;
use crate::message::Delivery;
use crate::util::MboxId;

/// What a demand asks the agent to do.
pub(crate) enum DemandKind {
    /// Run `so_evt_start`.
    EvtStart,
    /// Run `so_evt_finish` and complete deregistration of the agent.
    EvtFinish,
    /// Run the handler for a delivered message.
    Event {
        mbox_id: MboxId,
        delivery: Delivery,
        /// In-flight token of the rate limiter, released with the demand.
        limit: Option<LimitGuard>,
    },
    /// A state time-limit elapsed; switch to `target` if the agent is still
    /// inside the expected state.
    StateTimeout { expected_state: u64, target: State },
}

/// One queued execution demand.
pub(crate) struct Demand {
    pub agent: Arc<AgentCell>,
    pub kind: DemandKind,
}

/// Pre-resolved execution information, used by dispatchers that must know
/// the thread-safety of a demand before running it.
pub(crate) struct Resolution {
    pub search: Option<HandlerSearch>,
    /// True when the demand may run concurrently with other thread-safe
    /// demands of the same agent.
    pub thread_safe: bool,
}

impl Demand {
    /// Execute the demand, resolving the handler against the current state.
    pub(crate) fn execute(self) {
        let agent = Arc::clone(&self.agent);
        agent.execute_demand(self.kind);
    }

    /// Resolve the handler without executing.
    pub(crate) fn resolve(&self) -> Resolution {
        match &self.kind {
            DemandKind::Event {
                mbox_id, delivery, ..
            } => {
                let search = self
                    .agent
                    .runtime
                    .resolve_event_handler(*mbox_id, delivery.message.type_id());
                let thread_safe = match &search {
                    // A demand with no handler is a no-op and cannot
                    // conflict with anything.
                    HandlerSearch::NotFound => true,
                    HandlerSearch::Normal(h) | HandlerSearch::DeadLetter(h) => h.thread_safe,
                };
                Resolution {
                    search: Some(search),
                    thread_safe,
                }
            }
            _ => Resolution {
                search: None,
                thread_safe: false,
            },
        }
    }

    /// Execute with a previously computed resolution.
    pub(crate) fn execute_resolved(self, resolution: Resolution) {
        let agent = Arc::clone(&self.agent);
        match self.kind {
            DemandKind::Event {
                mbox_id,
                delivery,
                limit,
            } => agent.execute_event(mbox_id, delivery, limit, resolution.search),
            other => agent.execute_demand(other),
        }
    }
}

/// Destination for demands; provided to the agent by its binder at bind
/// time.
pub(crate) trait EventQueue: Send + Sync {
    fn push(&self, demand: Demand);
}
