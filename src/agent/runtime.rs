//! Agent runtime core.
//!
//! [`AgentRuntime`] is the runtime-side half of an agent: identity, direct
//! mailbox, subscription store, state machine, limits, and the bound event
//! queue. [`AgentCell`] pairs it with the user's behavior object and is the
//! unit demands point at. Dispatchers serialise demand execution per agent;
//! the behavior lock additionally makes that discipline memory-safe.

// Layer 1: Standard library imports
use std::any::TypeId;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, OnceLock, Weak};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

// Layer 2: Third-party crate imports
use chrono::Utc;
use parking_lot::{Mutex, RwLock};

// Layer 3: Internal module imports
use crate::coop::{CoopHandle, CoopInner, DeregReason};
use crate::environment::Environment;
use crate::error::{Error, Result};
use crate::limits::{run_overflow_reaction, LimitGuard, MessageLimits};
use crate::mailbox::direct::DirectMbox;
use crate::mailbox::{DeliveryMode, MboxRef, MessageSink, MessageSinkRef, MsgType};
use crate::mailbox::filter::DeliveryFilter;
use crate::message::envelope::invoke_access_hook;
use crate::message::{AccessContext, Delivery, MessageRef, PayloadInvoker};
use crate::msg_tracing::{TraceEvent, TraceOp, TracingHolder};
use crate::queue::{Demand, DemandKind, EventQueue};
use crate::subscription::{
    EventHandler, HandlerInvoker, SubscrEntry, SubscrKey, SubscriptionStorage,
    SubscriptionStorageKind,
};
use crate::timer::TimerId;
use crate::util::{AgentId, MboxId, Priority};

use super::state::{History, State};
use super::traits::{AnyAgent, ExceptionReaction};
use crate::dispatcher::DispBinder;

/// Outcome of a handler search.
pub(crate) enum HandlerSearch {
    Normal(EventHandler),
    DeadLetter(EventHandler),
    NotFound,
}

struct DeadLetterEntry {
    mbox: MboxRef,
    msg_type: MsgType,
    handler: EventHandler,
}

struct StateCtl {
    /// Active path, root to leaf.
    path: Vec<State>,
    switching: bool,
    /// Pending time-limit switches, keyed by armed state id.
    timers: HashMap<u64, TimerId>,
}

pub(crate) struct AgentRuntime {
    id: AgentId,
    ordinal: u64,
    priority: Priority,
    env: Environment,
    sink: OnceLock<MessageSinkRef>,
    direct_mbox: OnceLock<MboxRef>,
    cell: OnceLock<Weak<AgentCell>>,
    coop: OnceLock<Weak<CoopInner>>,
    binder: Mutex<Option<Arc<dyn DispBinder>>>,
    event_queue: RwLock<Option<Arc<dyn EventQueue>>>,
    subscriptions: Mutex<Box<dyn SubscriptionStorage>>,
    deadletters: Mutex<HashMap<(MboxId, TypeId), DeadLetterEntry>>,
    filters: Mutex<Vec<(MboxRef, MsgType)>>,
    limits: Option<MessageLimits>,
    default_state: State,
    state: Mutex<StateCtl>,
    deactivated: AtomicBool,
}

impl AgentRuntime {
    pub(crate) fn new(
        env: Environment,
        priority: Priority,
        limits: Option<MessageLimits>,
        storage: SubscriptionStorageKind,
    ) -> Arc<Self> {
        let id = AgentId::new();
        let ordinal = env.next_agent_ordinal();
        let default_state = State::new("<DEFAULT>");
        let runtime = Arc::new(Self {
            id,
            ordinal,
            priority,
            env: env.clone(),
            sink: OnceLock::new(),
            direct_mbox: OnceLock::new(),
            cell: OnceLock::new(),
            coop: OnceLock::new(),
            binder: Mutex::new(None),
            event_queue: RwLock::new(None),
            subscriptions: Mutex::new(storage.make()),
            deadletters: Mutex::new(HashMap::new()),
            filters: Mutex::new(Vec::new()),
            limits,
            default_state: default_state.clone(),
            state: Mutex::new(StateCtl {
                path: vec![default_state],
                switching: false,
                timers: HashMap::new(),
            }),
            deactivated: AtomicBool::new(false),
        });

        let sink: MessageSinkRef = Arc::new(AgentSink {
            agent_id: id,
            ordinal,
            priority,
            runtime: Arc::downgrade(&runtime),
            tracing: Arc::clone(env.tracing_holder()),
        });
        let direct: MboxRef = Arc::new(DirectMbox::new(
            env.next_mbox_id(),
            ordinal,
            id,
            Arc::downgrade(&sink),
            Arc::clone(env.tracing_holder()),
        ));
        let _ = runtime.sink.set(sink);
        let _ = runtime.direct_mbox.set(direct);
        runtime
    }

    pub(crate) fn id(&self) -> AgentId {
        self.id
    }

    pub(crate) fn ordinal(&self) -> u64 {
        self.ordinal
    }

    pub(crate) fn priority(&self) -> Priority {
        self.priority
    }

    pub(crate) fn environment(&self) -> &Environment {
        &self.env
    }

    pub(crate) fn sink(&self) -> MessageSinkRef {
        match self.sink.get() {
            Some(sink) => Arc::clone(sink),
            // Set in `new` before the runtime is ever shared.
            None => unreachable_sink(),
        }
    }

    pub(crate) fn direct_mbox(&self) -> MboxRef {
        match self.direct_mbox.get() {
            Some(mbox) => Arc::clone(mbox),
            None => unreachable_sink(),
        }
    }

    pub(crate) fn attach_cell(&self, cell: &Arc<AgentCell>) {
        let _ = self.cell.set(Arc::downgrade(cell));
    }

    pub(crate) fn attach_coop(&self, coop: &Arc<CoopInner>) {
        let _ = self.coop.set(Arc::downgrade(coop));
    }

    pub(crate) fn coop(&self) -> Option<Arc<CoopInner>> {
        self.coop.get().and_then(Weak::upgrade)
    }

    pub(crate) fn coop_handle(&self) -> Option<CoopHandle> {
        self.coop().map(|c| c.handle())
    }

    pub(crate) fn set_binder(&self, binder: Arc<dyn DispBinder>) -> Result<()> {
        let mut slot = self.binder.lock();
        if slot.is_some() {
            return Err(Error::DispBinderAlreadySetForAgent);
        }
        *slot = Some(binder);
        Ok(())
    }

    pub(crate) fn binder(&self) -> Result<Arc<dyn DispBinder>> {
        self.binder
            .lock()
            .as_ref()
            .map(Arc::clone)
            .ok_or(Error::NoDispBinderForAgent)
    }

    pub(crate) fn bind_queue(&self, queue: Arc<dyn EventQueue>) {
        *self.event_queue.write() = Some(queue);
    }

    pub(crate) fn unbind_queue(&self) {
        *self.event_queue.write() = None;
    }

    pub(crate) fn is_deactivated(&self) -> bool {
        self.deactivated.load(Ordering::Acquire)
    }

    pub(crate) fn push_demand(&self, kind: DemandKind) {
        let queue = self.event_queue.read().as_ref().map(Arc::clone);
        let cell = self.cell.get().and_then(Weak::upgrade);
        match (queue, cell) {
            (Some(queue), Some(agent)) => queue.push(Demand { agent, kind }),
            _ => self.env.tracing_holder().emit(|| TraceEvent {
                when: Utc::now(),
                op: TraceOp::DemandDiscarded,
                mbox_id: self.direct_mbox().id(),
                mbox_name: self.direct_mbox().query_name(),
                message_type: "<unbound>",
                agent: Some(self.id),
                redirection_depth: None,
            }),
        }
    }

    // --- Subscriptions ------------------------------------------------

    pub(crate) fn subscribe(
        &self,
        mbox: &MboxRef,
        msg_type: MsgType,
        states: &[State],
        handler: EventHandler,
    ) -> Result<()> {
        if self.is_deactivated() {
            return Err(Error::AgentDeactivated);
        }
        if let Some(limits) = &self.limits {
            if !limits.covers(msg_type.id) {
                return Err(Error::MessageHasNoLimitDefined {
                    message_type: msg_type.name,
                });
            }
        }

        mbox.subscribe_event_handler(msg_type, self.sink())?;

        let state_ids: Vec<u64> = if states.is_empty() {
            vec![self.default_state.id()]
        } else {
            states.iter().map(State::id).collect()
        };

        let mut storage = self.subscriptions.lock();
        for state_id in state_ids {
            let outcome = storage.insert(SubscrEntry {
                key: SubscrKey {
                    mbox_id: mbox.id(),
                    type_id: msg_type.id,
                    state_id,
                },
                mbox: Arc::clone(mbox),
                type_name: msg_type.name,
                handler: handler.clone(),
            });
            if let Err(error) = outcome {
                if !storage.has(mbox.id(), msg_type.id, None) {
                    mbox.unsubscribe_event_handler(msg_type, &self.sink());
                }
                return Err(error);
            }
        }
        Ok(())
    }

    pub(crate) fn drop_subscription(
        &self,
        mbox: &MboxRef,
        msg_type: MsgType,
        state: Option<&State>,
    ) {
        let state_id = state.map_or_else(|| self.default_state.id(), State::id);
        let removed = self.subscriptions.lock().remove(&SubscrKey {
            mbox_id: mbox.id(),
            type_id: msg_type.id,
            state_id,
        });
        if let Some(removed) = removed {
            if removed.last_for_type {
                removed.mbox.unsubscribe_event_handler(msg_type, &self.sink());
            }
        }
    }

    pub(crate) fn drop_all_subscriptions_for_mbox(&self, mbox: &MboxRef) {
        let removed = self.subscriptions.lock().drop_all_for_mailbox(mbox.id());
        for (mbox, type_id, name) in removed {
            mbox.unsubscribe_event_handler(MsgType { id: type_id, name }, &self.sink());
        }
    }

    pub(crate) fn has_subscription(
        &self,
        mbox: &MboxRef,
        type_id: TypeId,
        state: Option<&State>,
    ) -> bool {
        self.subscriptions
            .lock()
            .has(mbox.id(), type_id, state.map(State::id))
    }

    pub(crate) fn set_deadletter_handler(
        &self,
        mbox: &MboxRef,
        msg_type: MsgType,
        handler: EventHandler,
    ) -> Result<()> {
        if self.is_deactivated() {
            return Err(Error::AgentDeactivated);
        }
        let mut deadletters = self.deadletters.lock();
        if deadletters.contains_key(&(mbox.id(), msg_type.id)) {
            return Err(Error::EventHandlerAlreadyProvided {
                message_type: msg_type.name,
            });
        }
        mbox.subscribe_event_handler(msg_type, self.sink())?;
        deadletters.insert(
            (mbox.id(), msg_type.id),
            DeadLetterEntry {
                mbox: Arc::clone(mbox),
                msg_type,
                handler,
            },
        );
        Ok(())
    }

    pub(crate) fn drop_deadletter_handler(&self, mbox: &MboxRef, msg_type: MsgType) {
        if self.deadletters.lock().remove(&(mbox.id(), msg_type.id)).is_some()
            && !self.subscriptions.lock().has(mbox.id(), msg_type.id, None)
        {
            mbox.unsubscribe_event_handler(msg_type, &self.sink());
        }
    }

    pub(crate) fn has_deadletter_handler(&self, mbox_id: MboxId, type_id: TypeId) -> bool {
        self.deadletters.lock().contains_key(&(mbox_id, type_id))
    }

    pub(crate) fn set_delivery_filter(
        &self,
        mbox: &MboxRef,
        msg_type: MsgType,
        filter: Arc<DeliveryFilter>,
    ) -> Result<()> {
        mbox.set_delivery_filter(msg_type, filter, self.sink())?;
        let mut filters = self.filters.lock();
        if !filters
            .iter()
            .any(|(m, t)| m.id() == mbox.id() && t.id == msg_type.id)
        {
            filters.push((Arc::clone(mbox), msg_type));
        }
        Ok(())
    }

    pub(crate) fn drop_delivery_filter(&self, mbox: &MboxRef, msg_type: MsgType) {
        mbox.drop_delivery_filter(msg_type, &self.sink());
        self.filters
            .lock()
            .retain(|(m, t)| !(m.id() == mbox.id() && t.id == msg_type.id));
    }

    pub(crate) fn resolve_event_handler(&self, mbox_id: MboxId, type_id: TypeId) -> HandlerSearch {
        let path_ids: Vec<u64> = {
            let ctl = self.state.lock();
            ctl.path.iter().rev().map(State::id).collect()
        };
        if let Some(handler) = self.subscriptions.lock().find(mbox_id, type_id, &path_ids) {
            return HandlerSearch::Normal(handler);
        }
        if let Some(entry) = self.deadletters.lock().get(&(mbox_id, type_id)) {
            return HandlerSearch::DeadLetter(entry.handler.clone());
        }
        HandlerSearch::NotFound
    }

    // --- State machine ------------------------------------------------

    pub(crate) fn change_state(&self, target: &State) -> Result<()> {
        let resolved = target.resolve_history_target();
        let new_path = resolved.path_from_root();

        let old_path = {
            let mut ctl = self.state.lock();
            if self.is_deactivated() {
                return Err(Error::AgentDeactivated);
            }
            if ctl.switching {
                return Err(Error::AnotherStateSwitchInProgress);
            }
            if ctl.path.last() == Some(&resolved) {
                return Ok(());
            }
            ctl.switching = true;
            ctl.path.clone()
        };

        let common = old_path
            .iter()
            .zip(new_path.iter())
            .take_while(|(a, b)| a == b)
            .count();

        let old_leaf = old_path.last().cloned();
        for index in (common..old_path.len()).rev() {
            let exiting = &old_path[index];
            if index > 0 {
                let parent = &old_path[index - 1];
                match parent.history() {
                    History::Shallow => parent.remember(exiting),
                    History::Deep => {
                        if let Some(leaf) = &old_leaf {
                            parent.remember(leaf);
                        }
                    }
                    History::None => {}
                }
            }
            self.state.lock().timers.remove(&exiting.id());
            exiting.run_exit_hook();
        }

        for entering in new_path.iter().skip(common) {
            entering.run_enter_hook();
            if let Some((duration, tl_target)) = entering.current_time_limit() {
                if let Some(timer) = self.schedule_state_timeout(entering.id(), tl_target, duration)
                {
                    self.state.lock().timers.insert(entering.id(), timer);
                }
            }
        }

        let mut ctl = self.state.lock();
        ctl.path = new_path;
        ctl.switching = false;
        Ok(())
    }

    fn schedule_state_timeout(
        &self,
        state_id: u64,
        target: State,
        duration: Duration,
    ) -> Option<TimerId> {
        let cell = self.cell.get()?.clone();
        self.env
            .schedule_state_timeout(cell, state_id, target, duration)
    }

    pub(crate) fn current_state_name(&self) -> String {
        let ctl = self.state.lock();
        ctl.path
            .last()
            .map_or_else(String::new, State::path_name)
    }

    pub(crate) fn state_contains(&self, state_id: u64) -> bool {
        self.state.lock().path.iter().any(|s| s.id() == state_id)
    }

    /// Put the agent into the permanent terminal condition: queued demands
    /// become no-ops, every subscription is invalidated and new ones are
    /// rejected. `so_evt_finish` still runs at deregistration.
    pub(crate) fn deactivate(&self) {
        if self.deactivated.swap(true, Ordering::AcqRel) {
            return;
        }

        let removed = self.subscriptions.lock().drain_all();
        for (mbox, type_id, name) in removed {
            mbox.unsubscribe_event_handler(MsgType { id: type_id, name }, &self.sink());
        }

        let deadletters: Vec<DeadLetterEntry> = {
            let mut map = self.deadletters.lock();
            map.drain().map(|(_, entry)| entry).collect()
        };
        for entry in deadletters {
            entry
                .mbox
                .unsubscribe_event_handler(entry.msg_type, &self.sink());
        }

        let filters: Vec<(MboxRef, MsgType)> = {
            let mut list = self.filters.lock();
            list.drain(..).collect()
        };
        for (mbox, msg_type) in filters {
            mbox.drop_delivery_filter(msg_type, &self.sink());
        }

        self.state.lock().timers.clear();
    }
}

#[cold]
fn unreachable_sink() -> ! {
    // The sink and direct mailbox are installed inside `AgentRuntime::new`
    // before the runtime escapes; reaching this is a construction bug.
    std::process::abort()
}

/// The runtime half plus the user behavior object.
///
/// Public only because the binder contract names it; not part of the
/// supported API surface.
#[doc(hidden)]
pub struct AgentCell {
    pub(crate) runtime: Arc<AgentRuntime>,
    pub(crate) behavior: RwLock<Box<dyn AnyAgent>>,
}

impl AgentCell {
    pub(crate) fn new(runtime: Arc<AgentRuntime>, behavior: Box<dyn AnyAgent>) -> Arc<Self> {
        let cell = Arc::new(Self {
            runtime,
            behavior: RwLock::new(behavior),
        });
        cell.runtime.attach_cell(&cell);
        cell
    }

    pub(crate) fn define(&self) -> Result<()> {
        let mut behavior = self.behavior.write();
        behavior.define(&self.runtime)
    }

    pub(crate) fn execute_demand(self: &Arc<Self>, kind: DemandKind) {
        match kind {
            DemandKind::EvtStart => {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                    let mut behavior = self.behavior.write();
                    behavior.evt_start(&self.runtime);
                }));
                if outcome.is_err() {
                    self.run_exception_reaction();
                }
            }
            DemandKind::EvtFinish => {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                    let mut behavior = self.behavior.write();
                    behavior.evt_finish(&self.runtime);
                }));
                if outcome.is_err() {
                    tracing::error!(agent = %self.runtime.id(), "panic in so_evt_finish ignored");
                }
                self.runtime.deactivate();
                if let Some(coop) = self.runtime.coop() {
                    coop.agent_finished();
                }
            }
            DemandKind::Event {
                mbox_id,
                delivery,
                limit,
            } => self.execute_event(mbox_id, delivery, limit, None),
            DemandKind::StateTimeout {
                expected_state,
                target,
            } => {
                if self.runtime.is_deactivated() {
                    return;
                }
                if self.runtime.state_contains(expected_state) {
                    if let Err(error) = self.runtime.change_state(&target) {
                        tracing::warn!(%error, "time-limit state switch failed");
                    }
                }
            }
        }
    }

    pub(crate) fn execute_event(
        self: &Arc<Self>,
        mbox_id: MboxId,
        delivery: Delivery,
        limit: Option<LimitGuard>,
        resolved: Option<HandlerSearch>,
    ) {
        // Hold the in-flight token for the whole invocation.
        let _limit = limit;

        let trace = |op: TraceOp| {
            self.runtime.env.tracing_holder().emit(|| TraceEvent {
                when: Utc::now(),
                op,
                mbox_id,
                mbox_name: format!("<mbox:id={}>", mbox_id.raw()),
                message_type: delivery.message.message_type(),
                agent: Some(self.runtime.id()),
                redirection_depth: None,
            });
        };

        if self.runtime.is_deactivated() {
            trace(TraceOp::DemandDiscarded);
            return;
        }

        let search = resolved.unwrap_or_else(|| {
            self.runtime
                .resolve_event_handler(mbox_id, delivery.message.type_id())
        });
        let handler = match search {
            HandlerSearch::Normal(handler) => {
                trace(TraceOp::HandlerFound);
                handler
            }
            HandlerSearch::DeadLetter(handler) => {
                trace(TraceOp::DeadLetterHandler);
                handler
            }
            HandlerSearch::NotFound => {
                trace(TraceOp::NoHandler);
                self.runtime.env.notify_ignored(self.runtime.id(), &delivery);
                return;
            }
        };

        let mut call = |message: &MessageRef| {
            let effective = Delivery::plain(message.clone());
            match &handler.invoker {
                HandlerInvoker::Exclusive(f) => {
                    let mut behavior = self.behavior.write();
                    f(behavior.as_mut(), &self.runtime, &effective);
                }
                HandlerInvoker::Shared(f) => {
                    let behavior = self.behavior.read();
                    f(behavior.as_ref(), &self.runtime, &effective);
                }
            }
        };

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| match &delivery.envelope {
            Some(envelope) => {
                let mut adapter = CallInvoker { call: &mut call };
                invoke_access_hook(envelope, AccessContext::HandlerFound, &mut adapter);
            }
            None => call(&delivery.message),
        }));
        match outcome {
            Ok(()) => self.runtime.env.notify_handled(self.runtime.id(), &delivery),
            Err(_) => self.run_exception_reaction(),
        }
    }

    fn run_exception_reaction(self: &Arc<Self>) {
        let declared = panic::catch_unwind(AssertUnwindSafe(|| {
            self.behavior.read().exception_reaction()
        }))
        .unwrap_or(ExceptionReaction::Inherit);

        let effective = match declared {
            ExceptionReaction::Inherit => match self.runtime.coop() {
                Some(coop) => coop.effective_exception_reaction(),
                None => self.runtime.env.default_exception_reaction(),
            },
            other => other,
        };

        match effective {
            ExceptionReaction::Abort | ExceptionReaction::Inherit => {
                tracing::error!(
                    agent = %self.runtime.id(),
                    "panic escaped an event handler; aborting"
                );
                std::process::abort();
            }
            ExceptionReaction::ShutdownOnException => {
                tracing::error!(
                    agent = %self.runtime.id(),
                    "panic escaped an event handler; shutting the environment down"
                );
                self.runtime.env.stop();
            }
            ExceptionReaction::DeregisterCoopOnException => {
                tracing::error!(
                    agent = %self.runtime.id(),
                    "panic escaped an event handler; deregistering the cooperation"
                );
                if let Some(coop) = self.runtime.coop() {
                    coop.deregister(DeregReason::Error);
                }
            }
            ExceptionReaction::IgnoreException => {
                tracing::warn!(
                    agent = %self.runtime.id(),
                    "panic escaped an event handler; ignored"
                );
            }
        }
    }
}

struct CallInvoker<'a> {
    call: &'a mut dyn FnMut(&MessageRef),
}

impl PayloadInvoker for CallInvoker<'_> {
    fn invoke(&mut self, message: &MessageRef) {
        (self.call)(message);
    }
}

/// The delivery-pipeline endpoint fronting one agent.
struct AgentSink {
    agent_id: AgentId,
    ordinal: u64,
    priority: Priority,
    runtime: Weak<AgentRuntime>,
    tracing: Arc<TracingHolder>,
}

impl AgentSink {
    fn trace(&self, op: TraceOp, mbox_id: MboxId, message_type: &'static str, depth: Option<u32>) {
        self.tracing.emit(|| TraceEvent {
            when: Utc::now(),
            op,
            mbox_id,
            mbox_name: format!("<mbox:id={}>", mbox_id.raw()),
            message_type,
            agent: Some(self.agent_id),
            redirection_depth: depth,
        });
    }
}

impl MessageSink for AgentSink {
    fn ordinal(&self) -> u64 {
        self.ordinal
    }

    fn agent_id(&self) -> AgentId {
        self.agent_id
    }

    fn priority(&self) -> Priority {
        self.priority
    }

    fn push_event(
        &self,
        mode: DeliveryMode,
        mbox_id: MboxId,
        delivery: Delivery,
        redirection_depth: u32,
    ) {
        let message_type = delivery.message.message_type();
        let Some(runtime) = self.runtime.upgrade() else {
            self.trace(TraceOp::DemandDiscarded, mbox_id, message_type, None);
            return;
        };
        if runtime.is_deactivated() {
            self.trace(TraceOp::DemandDiscarded, mbox_id, message_type, None);
            return;
        }

        let block = runtime
            .limits
            .as_ref()
            .and_then(|limits| limits.block_for(delivery.message.type_id()))
            .map(Arc::clone);

        match block {
            None => {
                self.trace(
                    TraceOp::DemandPushed,
                    mbox_id,
                    message_type,
                    Some(redirection_depth),
                );
                runtime.push_demand(DemandKind::Event {
                    mbox_id,
                    delivery,
                    limit: None,
                });
            }
            Some(block) => match LimitGuard::try_acquire(&block) {
                Some(guard) => {
                    self.trace(
                        TraceOp::DemandPushed,
                        mbox_id,
                        message_type,
                        Some(redirection_depth),
                    );
                    runtime.push_demand(DemandKind::Event {
                        mbox_id,
                        delivery,
                        limit: Some(guard),
                    });
                }
                None => run_overflow_reaction(
                    &block,
                    mode,
                    mbox_id,
                    &format!("<mbox:id={}>", mbox_id.raw()),
                    self.agent_id,
                    delivery,
                    redirection_depth,
                    &self.tracing,
                ),
            },
        }
    }
}

/// Public handle to a registered agent: identity, direct mailbox, and
/// introspection queries.
#[derive(Clone)]
pub struct AgentRef {
    id: AgentId,
    direct_mbox: MboxRef,
    runtime: Weak<AgentRuntime>,
}

impl AgentRef {
    pub(crate) fn new(runtime: &Arc<AgentRuntime>) -> Self {
        Self {
            id: runtime.id(),
            direct_mbox: runtime.direct_mbox(),
            runtime: Arc::downgrade(runtime),
        }
    }

    /// Identity of the agent.
    pub fn id(&self) -> AgentId {
        self.id
    }

    /// The agent's direct (single-consumer) mailbox.
    pub fn direct_mbox(&self) -> MboxRef {
        Arc::clone(&self.direct_mbox)
    }

    /// Dotted name of the agent's current state, or `None` once the agent
    /// is gone.
    pub fn current_state_name(&self) -> Option<String> {
        self.runtime.upgrade().map(|r| r.current_state_name())
    }

    /// True while the agent is alive and not deactivated.
    pub fn is_active(&self) -> bool {
        self.runtime.upgrade().is_some_and(|r| !r.is_deactivated())
    }
}
