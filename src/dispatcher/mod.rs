//! Work schedulers.
//!
//! A dispatcher owns worker threads and assigns event queues to them
//! according to its policy variant. Agents attach through a *binder*, a
//! narrow four-method contract: `preallocate_resources` must acquire
//! everything that could fail so that `bind` is infallible.

pub mod active_group;
pub mod active_obj;
pub mod adv_thread_pool;
pub mod nef_one_thread;
pub mod one_thread;
pub mod prio;
pub mod thread_pool;
pub(crate) mod queue;
pub mod work_thread;

// Layer 1: Standard library imports
use std::sync::Arc;

// Layer 2: Third-party crate imports
// (none)

// Layer 3: Internal module imports
use crate::agent::runtime::AgentCell;
use crate::error::Result;

pub use work_thread::{ActivityStats, ActivityTracking, StdWorkThreadFactory, WorkThreadFactory};

/// Dispatcher variants, used when resolving named dispatchers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherKind {
    OneThread,
    NefOneThread,
    ActiveObj,
    ActiveGroup,
    ThreadPool,
    AdvThreadPool,
    PrioStrictlyOrdered,
    PrioQuotedRoundRobin,
    PrioOnePerPrio,
}

/// Per-agent adapter that attaches an agent to a dispatcher.
///
/// Registration is transactional over `preallocate_resources`; `bind` never
/// fails.
pub trait DispBinder: Send + Sync + 'static {
    /// Acquire everything that could fail (threads, queues, group entries).
    #[doc(hidden)]
    fn preallocate_resources(&self, agent: &Arc<AgentCell>) -> Result<()>;

    /// Roll back a successful preallocation.
    #[doc(hidden)]
    fn undo_preallocation(&self, agent: &Arc<AgentCell>);

    /// Attach the agent's event queue. Infallible.
    #[doc(hidden)]
    fn bind(&self, agent: &Arc<AgentCell>);

    /// Detach the agent. Runs on the deregistration service thread.
    #[doc(hidden)]
    fn unbind(&self, agent: &Arc<AgentCell>);
}

/// Fallback binder handed out when a dispatcher is already gone; every
/// preallocation fails.
pub(crate) struct NullBinder;

impl DispBinder for NullBinder {
    fn preallocate_resources(&self, _agent: &Arc<AgentCell>) -> Result<()> {
        Err(crate::error::Error::DispatcherCreationFailed)
    }

    fn undo_preallocation(&self, _agent: &Arc<AgentCell>) {}

    fn bind(&self, _agent: &Arc<AgentCell>) {}

    fn unbind(&self, _agent: &Arc<AgentCell>) {}
}

/// Runtime face every dispatcher exposes to the environment: orderly
/// shutdown and stats sampling.
pub(crate) trait DispatcherRuntime: Send + Sync {
    fn name(&self) -> &str;
    fn kind(&self) -> DispatcherKind;
    /// Default binder, used when resolving a dispatcher by name.
    fn default_binder(&self) -> Arc<dyn DispBinder>;
    /// Signal all workers to drain their current demand and stop.
    fn shutdown(&self);
    /// Join all workers.
    fn wait(&self) -> Result<()>;
    /// `(thread_count, pending_demands)` snapshot for the stats controller.
    fn stats_snapshot(&self) -> (usize, usize);
    /// Aggregated work-thread activity, when tracking is enabled.
    fn activity_snapshot(&self) -> Option<work_thread::ActivitySnapshot>;
}
