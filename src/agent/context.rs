//! Typed execution context handed to agent lifecycle methods and handlers.

// Layer 1: Standard library imports
use std::any::TypeId;
use std::marker::PhantomData;
use std::sync::Arc;

// Layer 2: Third-party crate imports
// (none for this module)

// Layer 3: Internal module imports
use crate::coop::{CoopHandle, DeregReason};
use crate::environment::Environment;
use crate::error::{Error, Result};
use crate::mailbox::filter::DeliveryFilter;
use crate::mailbox::{MboxRef, MsgType};
use crate::message::{Message, MutMhood};
use crate::subscription::{EventHandler, HandlerInvoker};
use crate::util::AgentId;

use super::runtime::AgentRuntime;
use super::state::State;
use super::traits::Agent;

/// Context of one agent invocation.
///
/// Grants access to the runtime half of the agent: subscriptions, state
/// switching, delivery filters, the environment, and the owning coop.
/// Contexts created for thread-safe handlers are *shared*: every mutating
/// operation fails with
/// [`Error::OperationRequiresExclusiveHandler`] instead of racing the
/// structure.
pub struct AgentContext<A: Agent> {
    runtime: Arc<AgentRuntime>,
    exclusive: bool,
    _marker: PhantomData<fn(A) -> A>,
}

impl<A: Agent> AgentContext<A> {
    pub(crate) fn new_exclusive(runtime: Arc<AgentRuntime>) -> Self {
        Self {
            runtime,
            exclusive: true,
            _marker: PhantomData,
        }
    }

    pub(crate) fn new_shared(runtime: Arc<AgentRuntime>) -> Self {
        Self {
            runtime,
            exclusive: false,
            _marker: PhantomData,
        }
    }

    fn ensure_exclusive(&self) -> Result<()> {
        if self.exclusive {
            Ok(())
        } else {
            Err(Error::OperationRequiresExclusiveHandler)
        }
    }

    /// The environment the agent lives in.
    pub fn environment(&self) -> &Environment {
        self.runtime.environment()
    }

    /// Identity of the agent.
    pub fn agent_id(&self) -> AgentId {
        self.runtime.id()
    }

    /// The agent's direct (single-consumer) mailbox.
    pub fn direct_mbox(&self) -> MboxRef {
        self.runtime.direct_mbox()
    }

    /// Handle of the owning cooperation, once registered.
    pub fn coop(&self) -> Option<CoopHandle> {
        self.runtime.coop_handle()
    }

    /// Switch the agent to `target`, running exit and enter hooks along the
    /// way and honouring history markers.
    pub fn change_state(&mut self, target: &State) -> Result<()> {
        self.ensure_exclusive()?;
        self.runtime.change_state(target)
    }

    /// Dotted name of the current state.
    pub fn current_state_name(&self) -> String {
        self.runtime.current_state_name()
    }

    /// Put the agent into its permanent terminal condition.
    pub fn deactivate_agent(&mut self) -> Result<()> {
        self.ensure_exclusive()?;
        self.runtime.deactivate();
        Ok(())
    }

    /// Start a subscription on `mbox`.
    pub fn subscription(&mut self, mbox: &MboxRef) -> SubscriptionBuilder<A> {
        SubscriptionBuilder {
            runtime: Arc::clone(&self.runtime),
            exclusive: self.exclusive,
            mbox: Arc::clone(mbox),
            states: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// Start a subscription on the agent's own direct mailbox.
    pub fn subscribe_self(&mut self) -> SubscriptionBuilder<A> {
        let mbox = self.direct_mbox();
        self.subscription(&mbox)
    }

    /// Install a dead-letter handler for `(mbox, T)`: invoked when no
    /// state-bound subscription matches at delivery time.
    pub fn deadletter_handler<T, F>(&mut self, mbox: &MboxRef, handler: F) -> Result<()>
    where
        T: Message,
        F: Fn(&mut A, &mut AgentContext<A>, &T) + Send + Sync + 'static,
    {
        self.ensure_exclusive()?;
        let erased = erase_exclusive::<A, T, F>(handler);
        self.runtime.set_deadletter_handler(
            mbox,
            MsgType::of::<T>(),
            EventHandler {
                thread_safe: false,
                invoker: HandlerInvoker::Exclusive(erased),
            },
        )
    }

    /// Remove a dead-letter handler. No-op if absent.
    pub fn drop_deadletter_handler<T: Message>(&mut self, mbox: &MboxRef) -> Result<()> {
        self.ensure_exclusive()?;
        self.runtime
            .drop_deadletter_handler(mbox, MsgType::of::<T>());
        Ok(())
    }

    /// Drop the subscription for `(mbox, T, state)`. No-op if absent.
    pub fn drop_subscription<T: Message>(&mut self, mbox: &MboxRef, state: &State) -> Result<()> {
        self.ensure_exclusive()?;
        self.runtime
            .drop_subscription(mbox, MsgType::of::<T>(), Some(state));
        Ok(())
    }

    /// Drop the default-state subscription for `(mbox, T)`. No-op if absent.
    pub fn drop_default_subscription<T: Message>(&mut self, mbox: &MboxRef) -> Result<()> {
        self.ensure_exclusive()?;
        self.runtime
            .drop_subscription(mbox, MsgType::of::<T>(), None);
        Ok(())
    }

    /// Drop every subscription the agent holds on `mbox`.
    pub fn drop_all_subscriptions_for(&mut self, mbox: &MboxRef) -> Result<()> {
        self.ensure_exclusive()?;
        self.runtime.drop_all_subscriptions_for_mbox(mbox);
        Ok(())
    }

    /// True when a subscription for `(mbox, T)` exists in any state.
    pub fn has_subscription<T: Message>(&self, mbox: &MboxRef) -> bool {
        self.runtime
            .has_subscription(mbox, TypeId::of::<T>(), None)
    }

    /// True when a subscription for `(mbox, T)` exists in `state`.
    pub fn has_subscription_in<T: Message>(&self, mbox: &MboxRef, state: &State) -> bool {
        self.runtime
            .has_subscription(mbox, TypeId::of::<T>(), Some(state))
    }

    /// Attach a delivery filter for `(mbox, T)` owned by this agent.
    pub fn set_delivery_filter<T, F>(&mut self, mbox: &MboxRef, predicate: F) -> Result<()>
    where
        T: Message,
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.ensure_exclusive()?;
        self.runtime.set_delivery_filter(
            mbox,
            MsgType::of::<T>(),
            Arc::new(DeliveryFilter::new::<T, F>(predicate)),
        )
    }

    /// Remove a delivery filter. No-op if absent.
    pub fn drop_delivery_filter<T: Message>(&mut self, mbox: &MboxRef) -> Result<()> {
        self.ensure_exclusive()?;
        self.runtime.drop_delivery_filter(mbox, MsgType::of::<T>());
        Ok(())
    }

    /// Deregister the agent's own cooperation. No-op before registration
    /// completes.
    pub fn deregister_coop(&self, reason: DeregReason) {
        if let Some(coop) = self.runtime.coop() {
            coop.deregister(reason);
        }
    }
}

fn erase_exclusive<A, T, F>(
    handler: F,
) -> Arc<dyn Fn(&mut dyn super::traits::AnyAgent, &Arc<AgentRuntime>, &crate::message::Delivery) + Send + Sync>
where
    A: Agent,
    T: Message,
    F: Fn(&mut A, &mut AgentContext<A>, &T) + Send + Sync + 'static,
{
    Arc::new(move |agent, runtime, delivery| {
        let Some(agent) = agent.as_any_mut().downcast_mut::<A>() else {
            return;
        };
        let Some(msg) = delivery.message.downcast_ref::<T>() else {
            return;
        };
        let mut ctx = AgentContext::<A>::new_exclusive(Arc::clone(runtime));
        handler(agent, &mut ctx, msg);
    })
}

/// Builder of one subscription: mailbox, optional states, handler.
///
/// # Example
/// ```rust,ignore
/// ctx.subscription(&board)
///     .in_state(&self.working)
///     .event(|a: &mut Self, ctx, msg: &Job| a.accept(msg))?;
/// ```
pub struct SubscriptionBuilder<A: Agent> {
    runtime: Arc<AgentRuntime>,
    exclusive: bool,
    mbox: MboxRef,
    states: Vec<State>,
    _marker: PhantomData<fn(A) -> A>,
}

impl<A: Agent> SubscriptionBuilder<A> {
    /// Restrict the subscription to `state`. May be repeated; without any
    /// call the subscription lives in the default state.
    pub fn in_state(mut self, state: &State) -> Self {
        self.states.push(state.clone());
        self
    }

    fn register(&self, msg_type: MsgType, handler: EventHandler) -> Result<()> {
        if !self.exclusive {
            return Err(Error::OperationRequiresExclusiveHandler);
        }
        self.runtime
            .subscribe(&self.mbox, msg_type, &self.states, handler)
    }

    /// Subscribe an ordinary (exclusive, non-thread-safe) handler for
    /// immutable messages of `T`.
    pub fn event<T, F>(self, handler: F) -> Result<Self>
    where
        T: Message,
        F: Fn(&mut A, &mut AgentContext<A>, &T) + Send + Sync + 'static,
    {
        let erased = erase_exclusive::<A, T, F>(handler);
        self.register(
            MsgType::of::<T>(),
            EventHandler {
                thread_safe: false,
                invoker: HandlerInvoker::Exclusive(erased),
            },
        )?;
        Ok(self)
    }

    /// Subscribe a handler that takes unique ownership of a mutable message
    /// of `T`.
    pub fn event_mutable<T, F>(self, handler: F) -> Result<Self>
    where
        T: Message,
        F: Fn(&mut A, &mut AgentContext<A>, MutMhood<T>) + Send + Sync + 'static,
    {
        let erased: Arc<
            dyn Fn(&mut dyn super::traits::AnyAgent, &Arc<AgentRuntime>, &crate::message::Delivery)
                + Send
                + Sync,
        > = Arc::new(move |agent, runtime, delivery| {
            let Some(agent) = agent.as_any_mut().downcast_mut::<A>() else {
                return;
            };
            let Some(boxed) = delivery.message.take_mutable::<T>() else {
                return;
            };
            let mut ctx = AgentContext::<A>::new_exclusive(Arc::clone(runtime));
            handler(agent, &mut ctx, MutMhood::new(boxed));
        });
        self.register(
            MsgType::of::<T>(),
            EventHandler {
                thread_safe: false,
                invoker: HandlerInvoker::Exclusive(erased),
            },
        )?;
        Ok(self)
    }

    /// Subscribe a thread-safe handler: it receives shared views only and
    /// may run concurrently with other thread-safe handlers of the same
    /// agent on dispatchers that exploit the flag.
    pub fn thread_safe_event<T, F>(self, handler: F) -> Result<Self>
    where
        T: Message,
        F: Fn(&A, &AgentContext<A>, &T) + Send + Sync + 'static,
    {
        let erased: Arc<
            dyn Fn(&dyn super::traits::AnyAgent, &Arc<AgentRuntime>, &crate::message::Delivery)
                + Send
                + Sync,
        > = Arc::new(move |agent, runtime, delivery| {
            let Some(agent) = agent.as_any().downcast_ref::<A>() else {
                return;
            };
            let Some(msg) = delivery.message.downcast_ref::<T>() else {
                return;
            };
            let ctx = AgentContext::<A>::new_shared(Arc::clone(runtime));
            handler(agent, &ctx, msg);
        });
        self.register(
            MsgType::of::<T>(),
            EventHandler {
                thread_safe: true,
                invoker: HandlerInvoker::Shared(erased),
            },
        )?;
        Ok(self)
    }
}
