// Layer 1: Standard library imports
use std::any::Any;
use std::sync::Arc;

// Layer 2: Third-party crate imports
// (none for this module)

// Layer 3: Internal module imports
use crate::error::Result;

use super::context::AgentContext;
use super::runtime::AgentRuntime;

/// What the runtime does with a panic that escapes an event handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionReaction {
    /// Terminate the process.
    Abort,
    /// Initiate environment shutdown.
    ShutdownOnException,
    /// Deregister the agent's cooperation with the `Error` reason.
    DeregisterCoopOnException,
    /// Log and continue.
    IgnoreException,
    /// Walk the cooperation chain, then fall back to the environment
    /// default.
    Inherit,
}

/// A stateful actor.
///
/// Lifecycle: created → added to a coop → dispatcher-bound →
/// `so_define_agent` → `so_evt_start` → event handlers → `so_evt_finish` →
/// unbound → destroyed.
///
/// # Example
/// ```rust,ignore
/// struct Greeter {
///     greetings: u64,
/// }
///
/// impl Agent for Greeter {
///     fn so_define_agent(&mut self, ctx: &mut AgentContext<Self>) -> Result<()> {
///         ctx.subscribe_self()
///             .event(|a: &mut Self, _ctx, _msg: &Hello| a.greetings += 1)?;
///         Ok(())
///     }
/// }
/// ```
pub trait Agent: Send + Sync + 'static {
    /// Define subscriptions and initial state. Runs during cooperation
    /// registration, after binding, before `so_evt_start`.
    fn so_define_agent(&mut self, _ctx: &mut AgentContext<Self>) -> Result<()>
    where
        Self: Sized,
    {
        Ok(())
    }

    /// First event executed on the agent's working context.
    fn so_evt_start(&mut self, _ctx: &mut AgentContext<Self>)
    where
        Self: Sized,
    {
    }

    /// Last event executed before the agent leaves its cooperation.
    fn so_evt_finish(&mut self, _ctx: &mut AgentContext<Self>)
    where
        Self: Sized,
    {
    }

    /// Reaction to a panic escaping one of this agent's handlers.
    fn so_exception_reaction(&self) -> ExceptionReaction {
        ExceptionReaction::Inherit
    }
}

/// Object-safe facade over [`Agent`] used by the runtime.
pub(crate) trait AnyAgent: Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn define(&mut self, runtime: &Arc<AgentRuntime>) -> Result<()>;
    fn evt_start(&mut self, runtime: &Arc<AgentRuntime>);
    fn evt_finish(&mut self, runtime: &Arc<AgentRuntime>);
    fn exception_reaction(&self) -> ExceptionReaction;
}

impl<A: Agent> AnyAgent for A {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn define(&mut self, runtime: &Arc<AgentRuntime>) -> Result<()> {
        let mut ctx = AgentContext::<A>::new_exclusive(Arc::clone(runtime));
        self.so_define_agent(&mut ctx)
    }

    fn evt_start(&mut self, runtime: &Arc<AgentRuntime>) {
        let mut ctx = AgentContext::<A>::new_exclusive(Arc::clone(runtime));
        self.so_evt_start(&mut ctx);
    }

    fn evt_finish(&mut self, runtime: &Arc<AgentRuntime>) {
        let mut ctx = AgentContext::<A>::new_exclusive(Arc::clone(runtime));
        self.so_evt_finish(&mut ctx);
    }

    fn exception_reaction(&self) -> ExceptionReaction {
        self.so_exception_reaction()
    }
}
