//! Testing harness: a wrapped environment plus a step-based scenario DSL.
//!
//! A scenario is a sequence of named steps. Each step optionally performs an
//! *impact* (usually sending messages) when it becomes active, and completes
//! when its triggers fire: `reacts_to::<M>` (a handler ran) or
//! `ignores::<M>` (the delivery found no handler). `run_for` drives the
//! scenario to completion or a deadline.

// Layer 1: Standard library imports
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

// Layer 2: Third-party crate imports
use parking_lot::{Condvar, Mutex};

// Layer 3: Internal module imports
use crate::agent::AgentRef;
use crate::environment::env::TestingHook;
use crate::environment::{Environment, EnvironmentParams, WrappedEnv};
use crate::error::Result;
use crate::message::Message;
use crate::util::AgentId;

/// One completion condition of a step.
#[derive(Debug, Clone)]
pub struct Trigger {
    agent: AgentId,
    type_id: TypeId,
    expect_handled: bool,
}

/// Fires when `agent` handles a message of type `M`.
pub fn reacts_to<M: Message>(agent: &AgentRef) -> Trigger {
    Trigger {
        agent: agent.id(),
        type_id: TypeId::of::<M>(),
        expect_handled: true,
    }
}

/// Fires when a message of type `M` reaches `agent` without any handler.
pub fn ignores<M: Message>(agent: &AgentRef) -> Trigger {
    Trigger {
        agent: agent.id(),
        type_id: TypeId::of::<M>(),
        expect_handled: false,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TriggerMode {
    All,
    Any,
}

struct TriggerSlot {
    trigger: Trigger,
    fired: bool,
}

struct Step {
    name: String,
    impact: Option<Box<dyn FnOnce() + Send>>,
    triggers: Vec<TriggerSlot>,
    mode: TriggerMode,
    stores: Vec<(AgentRef, String)>,
    completed: bool,
}

struct ScenarioState {
    steps: Vec<Step>,
    active: usize,
    started: bool,
    stored: HashMap<String, String>,
}

struct ScenarioInner {
    state: Mutex<ScenarioState>,
    advanced: Condvar,
}

impl ScenarioInner {
    fn all_completed(state: &ScenarioState) -> bool {
        state.steps.iter().all(|s| s.completed)
    }

    fn step_satisfied(step: &Step) -> bool {
        match step.mode {
            TriggerMode::All => step.triggers.iter().all(|t| t.fired),
            TriggerMode::Any => step.triggers.iter().any(|t| t.fired),
        }
    }
}

impl TestingHook for ScenarioInner {
    fn on_event(&self, agent: AgentId, type_id: TypeId, handled: bool) {
        let impact = {
            let mut state = self.state.lock();
            if !state.started || state.active >= state.steps.len() {
                return;
            }

            let active = state.active;
            let step = &mut state.steps[active];
            let mut any_fired = false;
            for slot in &mut step.triggers {
                if !slot.fired
                    && slot.trigger.agent == agent
                    && slot.trigger.type_id == type_id
                    && slot.trigger.expect_handled == handled
                {
                    slot.fired = true;
                    any_fired = true;
                }
            }
            if !any_fired || !Self::step_satisfied(step) {
                return;
            }

            step.completed = true;
            let stores: Vec<(AgentRef, String)> = step.stores.drain(..).collect();
            for (agent_ref, tag) in stores {
                if let Some(name) = agent_ref.current_state_name() {
                    state.stored.insert(tag, name);
                }
            }
            state.active += 1;
            let active = state.active;
            let impact = state
                .steps
                .get_mut(active)
                .and_then(|next| next.impact.take());
            impact
        };

        // Impacts send messages; run them outside the scenario lock.
        if let Some(impact) = impact {
            impact();
        }
        self.advanced.notify_all();
    }
}

/// Outcome of `run_for`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScenarioResult {
    /// Every step completed.
    Completed,
    /// The deadline hit first; the unfinished step names are listed in
    /// order.
    NotCompleted(Vec<String>),
}

impl ScenarioResult {
    /// True when every step completed.
    pub fn completed(&self) -> bool {
        matches!(self, ScenarioResult::Completed)
    }
}

/// The scenario attached to a [`TestingEnv`].
#[derive(Clone)]
pub struct Scenario {
    inner: Arc<ScenarioInner>,
}

impl Scenario {
    /// Append a step. Steps complete strictly in definition order.
    pub fn define_step(&self, name: impl Into<String>) -> StepBuilder {
        let index = {
            let mut state = self.inner.state.lock();
            state.steps.push(Step {
                name: name.into(),
                impact: None,
                triggers: Vec::new(),
                mode: TriggerMode::All,
                stores: Vec::new(),
                completed: false,
            });
            state.steps.len() - 1
        };
        StepBuilder {
            inner: Arc::clone(&self.inner),
            index,
        }
    }

    /// Run the scenario: the first step's impact fires immediately, then
    /// events drive the steps until all complete or `timeout` elapses.
    pub fn run_for(&self, timeout: Duration) -> ScenarioResult {
        let first_impact = {
            let mut state = self.inner.state.lock();
            state.started = true;
            let active = state.active;
            state
                .steps
                .get_mut(active)
                .and_then(|step| step.impact.take())
        };
        if let Some(impact) = first_impact {
            impact();
        }

        let deadline = Instant::now() + timeout;
        let mut state = self.inner.state.lock();
        loop {
            if ScenarioInner::all_completed(&state) {
                return ScenarioResult::Completed;
            }
            let now = Instant::now();
            if now >= deadline {
                let unfinished = state
                    .steps
                    .iter()
                    .filter(|s| !s.completed)
                    .map(|s| s.name.clone())
                    .collect();
                return ScenarioResult::NotCompleted(unfinished);
            }
            self.inner
                .advanced
                .wait_for(&mut state, deadline - now);
        }
    }

    /// A state name recorded by `store_state_name` when its step completed.
    pub fn stored_state_name(&self, tag: &str) -> Option<String> {
        self.inner.state.lock().stored.get(tag).cloned()
    }
}

/// Builder of one scenario step.
pub struct StepBuilder {
    inner: Arc<ScenarioInner>,
    index: usize,
}

impl StepBuilder {
    fn with_step(&self, edit: impl FnOnce(&mut Step)) {
        let mut state = self.inner.state.lock();
        if let Some(step) = state.steps.get_mut(self.index) {
            edit(step);
        }
    }

    /// Action performed when the step becomes active.
    pub fn impact(self, impact: impl FnOnce() + Send + 'static) -> Self {
        self.with_step(|step| step.impact = Some(Box::new(impact)));
        self
    }

    /// Complete when this single trigger fires.
    pub fn when(self, trigger: Trigger) -> Self {
        self.with_step(|step| {
            step.mode = TriggerMode::All;
            step.triggers.push(TriggerSlot {
                trigger,
                fired: false,
            });
        });
        self
    }

    /// Complete when every trigger has fired.
    pub fn when_all(self, triggers: Vec<Trigger>) -> Self {
        self.with_step(|step| {
            step.mode = TriggerMode::All;
            for trigger in triggers {
                step.triggers.push(TriggerSlot {
                    trigger,
                    fired: false,
                });
            }
        });
        self
    }

    /// Complete when any one trigger fires.
    pub fn when_any(self, triggers: Vec<Trigger>) -> Self {
        self.with_step(|step| {
            step.mode = TriggerMode::Any;
            for trigger in triggers {
                step.triggers.push(TriggerSlot {
                    trigger,
                    fired: false,
                });
            }
        });
        self
    }

    /// Record `agent`'s current state under `tag` when the step completes.
    pub fn store_state_name(self, agent: &AgentRef, tag: impl Into<String>) -> Self {
        self.with_step(|step| step.stores.push((agent.clone(), tag.into())));
        self
    }
}

/// A wrapped environment with scenario support.
pub struct TestingEnv {
    wrapped: WrappedEnv,
    scenario: Scenario,
}

impl TestingEnv {
    /// Start a testing environment with default parameters.
    pub fn new() -> Result<Self> {
        Self::with_params(|_| {})
    }

    /// Start with tuned parameters.
    pub fn with_params<T>(tune: T) -> Result<Self>
    where
        T: FnOnce(&mut EnvironmentParams),
    {
        let wrapped = WrappedEnv::with_params(tune)?;
        let scenario = Scenario {
            inner: Arc::new(ScenarioInner {
                state: Mutex::new(ScenarioState {
                    steps: Vec::new(),
                    active: 0,
                    started: false,
                    stored: HashMap::new(),
                }),
                advanced: Condvar::new(),
            }),
        };
        wrapped
            .environment()
            .set_testing_hook(Arc::clone(&scenario.inner) as Arc<dyn TestingHook>);
        Ok(Self { wrapped, scenario })
    }

    /// The wrapped environment.
    pub fn environment(&self) -> &Environment {
        self.wrapped.environment()
    }

    /// The scenario of this testing environment.
    pub fn scenario(&self) -> &Scenario {
        &self.scenario
    }

    /// Stop the environment and wait for full teardown.
    pub fn stop_then_join(&self) {
        self.wrapped.stop_then_join();
    }
}
