//! Cooperation building, atomic registration, and supervised
//! deregistration.

// Layer 1: Standard library imports
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

// Layer 2: Third-party crate imports
use parking_lot::Mutex;

// Layer 3: Internal module imports
use crate::agent::runtime::{AgentCell, AgentRef, AgentRuntime};
use crate::agent::traits::{Agent, ExceptionReaction};
use crate::agent::AgentOptions;
use crate::dispatcher::DispBinder;
use crate::environment::Environment;
use crate::error::Result;
use crate::queue::DemandKind;
use crate::util::rollback::run_with_rollback;
use crate::util::CoopId;

use super::DeregReason;

pub(crate) type RegNotificator = Box<dyn FnOnce(&Environment, CoopId) + Send>;
pub(crate) type DeregNotificator = Box<dyn FnOnce(&Environment, CoopId, DeregReason) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CoopPhase {
    Building,
    Registered,
    Deregistering,
    Destroyed,
}

struct CoopState {
    agents: Vec<Arc<AgentCell>>,
    children: Vec<Weak<CoopInner>>,
    reg_notificators: Vec<RegNotificator>,
    dereg_notificators: Vec<DeregNotificator>,
    phase: CoopPhase,
    dereg_reason: Option<DeregReason>,
}

pub(crate) struct CoopInner {
    id: CoopId,
    name: Option<String>,
    env: Environment,
    parent: Option<Weak<CoopInner>>,
    exception_reaction: Mutex<ExceptionReaction>,
    state: Mutex<CoopState>,
    /// Live agents + live children + pinned async work.
    usage: AtomicUsize,
}

impl CoopInner {
    pub(crate) fn id(&self) -> CoopId {
        self.id
    }

    pub(crate) fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub(crate) fn handle(self: &Arc<Self>) -> CoopHandle {
        CoopHandle {
            id: self.id,
            inner: Arc::downgrade(self),
        }
    }

    pub(crate) fn agent_count(&self) -> usize {
        self.state.lock().agents.len()
    }

    pub(crate) fn usage_count(&self) -> usize {
        self.usage.load(Ordering::Acquire)
    }

    pub(crate) fn is_deregistering(&self) -> bool {
        self.state.lock().phase == CoopPhase::Deregistering
    }

    pub(crate) fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub(crate) fn increment_usage(&self) {
        self.usage.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn decrement_usage(self: &Arc<Self>) {
        let previous = self
            .usage
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| v.checked_sub(1));
        if previous == Ok(1) {
            self.maybe_finalize();
        }
    }

    fn maybe_finalize(self: &Arc<Self>) {
        let ready = {
            let state = self.state.lock();
            state.phase == CoopPhase::Deregistering
        };
        if ready && self.usage.load(Ordering::Acquire) == 0 {
            self.env.schedule_final_dereg(Arc::clone(self));
        }
    }

    pub(crate) fn effective_exception_reaction(&self) -> ExceptionReaction {
        let own = *self.exception_reaction.lock();
        if own != ExceptionReaction::Inherit {
            return own;
        }
        match self.parent.as_ref().and_then(Weak::upgrade) {
            Some(parent) => parent.effective_exception_reaction(),
            None => self.env.default_exception_reaction(),
        }
    }

    /// Initiate deregistration: children first, then an `EvtFinish` demand
    /// for every agent. Idempotent.
    pub(crate) fn deregister(self: &Arc<Self>, reason: DeregReason) {
        let (agents, children) = {
            let mut state = self.state.lock();
            if state.phase != CoopPhase::Registered {
                return;
            }
            state.phase = CoopPhase::Deregistering;
            state.dereg_reason = Some(reason);
            (state.agents.clone(), state.children.clone())
        };

        for child in children {
            if let Some(child) = child.upgrade() {
                child.deregister(DeregReason::ParentShutdown);
            }
        }

        for agent in &agents {
            agent.runtime.push_demand(DemandKind::EvtFinish);
        }

        if agents.is_empty() {
            self.maybe_finalize();
        }
    }

    /// One agent completed `so_evt_finish`.
    pub(crate) fn agent_finished(self: &Arc<Self>) {
        self.decrement_usage();
    }

    /// Final destruction, executed on the deregistration service thread.
    pub(crate) fn finalize(self: &Arc<Self>) {
        let (agents, notificators, reason) = {
            let mut state = self.state.lock();
            if state.phase == CoopPhase::Destroyed {
                return;
            }
            state.phase = CoopPhase::Destroyed;
            let notificators = std::mem::take(&mut state.dereg_notificators);
            let reason = state.dereg_reason.unwrap_or(DeregReason::Normal);
            (std::mem::take(&mut state.agents), notificators, reason)
        };

        for agent in &agents {
            if let Ok(binder) = agent.runtime.binder() {
                binder.unbind(agent);
            }
        }
        drop(agents);

        for notificator in notificators {
            notificator(&self.env, self.id, reason);
        }

        if let Some(parent) = self.parent.as_ref().and_then(Weak::upgrade) {
            parent.child_destroyed(self.id);
        }

        self.env.coop_destroyed(self.id, reason);
    }

    fn child_destroyed(self: &Arc<Self>, child: CoopId) {
        {
            let mut state = self.state.lock();
            state
                .children
                .retain(|weak| weak.upgrade().is_some_and(|c| c.id != child));
        }
        self.decrement_usage();
    }

    fn add_child(self: &Arc<Self>, child: &Arc<CoopInner>) {
        self.state.lock().children.push(Arc::downgrade(child));
        self.increment_usage();
    }
}

/// Builder of one cooperation: agents are added before registration.
pub struct CoopBuilder {
    inner: Arc<CoopInner>,
    default_binder: Arc<dyn DispBinder>,
}

impl CoopBuilder {
    pub(crate) fn new(
        env: Environment,
        name: Option<String>,
        parent: Option<&CoopHandle>,
        default_binder: Arc<dyn DispBinder>,
    ) -> Self {
        let inner = Arc::new(CoopInner {
            id: CoopId::new(),
            name,
            env,
            parent: parent.map(|handle| Weak::clone(&handle.inner)),
            exception_reaction: Mutex::new(ExceptionReaction::Inherit),
            state: Mutex::new(CoopState {
                agents: Vec::new(),
                children: Vec::new(),
                reg_notificators: Vec::new(),
                dereg_notificators: Vec::new(),
                phase: CoopPhase::Building,
                dereg_reason: None,
            }),
            usage: AtomicUsize::new(0),
        });
        Self {
            inner,
            default_binder,
        }
    }

    /// Identity the cooperation will have once registered.
    pub fn id(&self) -> CoopId {
        self.inner.id
    }

    /// Handle of the cooperation under construction.
    pub fn handle(&self) -> CoopHandle {
        self.inner.handle()
    }

    /// Exception reaction inherited by this coop's agents.
    pub fn set_exception_reaction(&mut self, reaction: ExceptionReaction) {
        *self.inner.exception_reaction.lock() = reaction;
    }

    /// Add an agent with default options.
    pub fn add_agent<A: Agent>(&mut self, agent: A) -> Result<AgentRef> {
        self.add_agent_with_opts(agent, AgentOptions::new())
    }

    /// Add an agent with explicit options.
    pub fn add_agent_with_opts<A: Agent>(
        &mut self,
        agent: A,
        opts: AgentOptions,
    ) -> Result<AgentRef> {
        let env = self.inner.env.clone();
        let storage = opts
            .storage
            .unwrap_or_else(|| env.default_subscription_storage());
        let runtime = AgentRuntime::new(env, opts.priority, opts.limits, storage);
        let binder = opts
            .binder
            .unwrap_or_else(|| Arc::clone(&self.default_binder));
        runtime.set_binder(binder)?;
        runtime.attach_coop(&self.inner);

        let agent_ref = AgentRef::new(&runtime);
        let cell = AgentCell::new(runtime, Box::new(agent));
        self.inner.state.lock().agents.push(cell);
        Ok(agent_ref)
    }

    /// Run `notificator` after all agents are bound, before any
    /// `so_evt_start` is dispatched.
    pub fn add_reg_notificator(
        &mut self,
        notificator: impl FnOnce(&Environment, CoopId) + Send + 'static,
    ) {
        self.inner
            .state
            .lock()
            .reg_notificators
            .push(Box::new(notificator));
    }

    /// Run `notificator` after the final `so_evt_finish` and after all
    /// children have deregistered.
    pub fn add_dereg_notificator(
        &mut self,
        notificator: impl FnOnce(&Environment, CoopId, DeregReason) + Send + 'static,
    ) {
        self.inner
            .state
            .lock()
            .dereg_notificators
            .push(Box::new(notificator));
    }

    /// Atomic registration: every agent preallocates and binds, or the
    /// whole registration unwinds.
    pub(crate) fn register(self) -> Result<CoopHandle> {
        let inner = self.inner;
        inner.env.ensure_running()?;

        let agents = inner.state.lock().agents.clone();

        // Stage 1: preallocation, transactional.
        let mut preallocated: Vec<Arc<AgentCell>> = Vec::with_capacity(agents.len());
        for agent in &agents {
            let outcome = agent
                .runtime
                .binder()
                .and_then(|binder| binder.preallocate_resources(agent));
            if let Err(error) = outcome {
                for done in &preallocated {
                    if let Ok(binder) = done.runtime.binder() {
                        binder.undo_preallocation(done);
                    }
                }
                return Err(error);
            }
            preallocated.push(Arc::clone(agent));
        }

        // Stage 2: binding never fails.
        for agent in &agents {
            if let Ok(binder) = agent.runtime.binder() {
                binder.bind(agent);
            }
        }

        // Stage 3: subscriptions and states; a failed definition unwinds
        // the whole registration.
        run_with_rollback(
            || {
                for agent in &agents {
                    agent.define()?;
                }
                Ok(())
            },
            || {
                for agent in &agents {
                    agent.runtime.deactivate();
                }
                for agent in &agents {
                    if let Ok(binder) = agent.runtime.binder() {
                        binder.unbind(agent);
                        binder.undo_preallocation(agent);
                    }
                }
            },
        )?;

        // Stage 4: the coop becomes visible. Async pins taken during
        // building stay counted.
        inner.usage.fetch_add(agents.len(), Ordering::AcqRel);
        let reg_notificators = {
            let mut state = inner.state.lock();
            state.phase = CoopPhase::Registered;
            std::mem::take(&mut state.reg_notificators)
        };
        if let Some(parent) = inner.parent.as_ref().and_then(Weak::upgrade) {
            parent.add_child(&inner);
        }
        inner.env.coop_registered(&inner);

        for notificator in reg_notificators {
            notificator(&inner.env, inner.id);
        }

        // Stage 5: start events flow.
        for agent in &agents {
            agent.runtime.push_demand(DemandKind::EvtStart);
        }

        Ok(inner.handle())
    }
}

/// Public handle of a cooperation.
#[derive(Clone)]
pub struct CoopHandle {
    id: CoopId,
    pub(crate) inner: Weak<CoopInner>,
}

impl CoopHandle {
    /// Identity of the cooperation.
    pub fn id(&self) -> CoopId {
        self.id
    }

    /// True while the cooperation has not been finally destroyed.
    pub fn is_alive(&self) -> bool {
        self.inner.upgrade().is_some()
    }

    /// Number of agents, zero once destroyed.
    pub fn agent_count(&self) -> usize {
        self.inner.upgrade().map_or(0, |inner| inner.agent_count())
    }

    /// Current usage count (live agents + live children + async pins).
    pub fn usage_count(&self) -> usize {
        self.inner.upgrade().map_or(0, |inner| inner.usage_count())
    }

    /// Pin outstanding async work to the coop, delaying its destruction.
    pub fn increment_usage_count(&self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.increment_usage();
        }
    }

    /// Release one async-work pin.
    pub fn decrement_usage_count(&self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.decrement_usage();
        }
    }

    pub(crate) fn upgrade(&self) -> Option<Arc<CoopInner>> {
        self.inner.upgrade()
    }
}

impl std::fmt::Debug for CoopHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoopHandle")
            .field("id", &self.id)
            .field("alive", &self.is_alive())
            .finish()
    }
}
