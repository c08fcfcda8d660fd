//! The environment object, `launch`, and the wrapped (background)
//! environment.

// Layer 1: Standard library imports
use std::any::TypeId;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

// Layer 2: Third-party crate imports
use parking_lot::{Condvar, Mutex, RwLock};

// Layer 3: Internal module imports
use crate::agent::runtime::AgentCell;
use crate::agent::state::State;
use crate::agent::ExceptionReaction;
use crate::coop::coop::CoopInner;
use crate::coop::repository::{CoopRepository, DeregService};
use crate::coop::{CoopBuilder, CoopHandle, DeregReason};
use crate::dispatcher::one_thread::{self, OneThreadDispatcher};
use crate::dispatcher::{
    ActivityTracking, DispBinder, DispatcherKind, DispatcherRuntime, WorkThreadFactory,
};
use crate::error::{Error, Result};
use crate::mailbox::repository::MboxRepository;
use crate::mailbox::MboxRef;
use crate::mchain::{ChainParams, ChainRef};
use crate::message::{Delivery, Message, MessageRef};
use crate::msg_tracing::TracingHolder;
use crate::stats::{StatsController, StatsSource};
use crate::subscription::SubscriptionStorageKind;
use crate::timer::{TimerAction, TimerId, TimerService};
use crate::util::ids::SeqCounter;
use crate::util::{AgentId, MboxId};

use super::params::{CoopListener, EnvironmentParams, ErrorLogger, InfrastructureKind};
use super::stop_guard::{StopGuard, StopGuardSetupOutcome};

/// Hook used by the testing harness to observe handler resolution.
pub(crate) trait TestingHook: Send + Sync {
    fn on_event(&self, agent: AgentId, type_id: TypeId, handled: bool);
}

struct StopState {
    stop_requested: bool,
    shutdown_started: bool,
    guards: Vec<Arc<dyn StopGuard>>,
}

pub(crate) struct EnvInner {
    tracing: Arc<TracingHolder>,
    mboxes: MboxRepository,
    pub(crate) coops: CoopRepository,
    dereg_service: DeregService,
    pub(crate) timer: TimerService,
    agent_ordinals: SeqCounter,
    pub(crate) dispatchers: Mutex<Vec<Weak<dyn DispatcherRuntime>>>,
    default_dispatcher: OnceLock<OneThreadDispatcher>,
    stats: StatsController,
    error_logger: Arc<dyn ErrorLogger>,
    coop_listener: Option<Arc<dyn CoopListener>>,
    work_thread_factory: Arc<dyn WorkThreadFactory>,
    activity_tracking: ActivityTracking,
    default_storage: SubscriptionStorageKind,
    default_exception_reaction: ExceptionReaction,
    autoshutdown: bool,
    stop: Mutex<StopState>,
    completed: Mutex<bool>,
    completed_cv: Condvar,
    torn_down: AtomicBool,
    testing_hook: RwLock<Option<Arc<dyn TestingHook>>>,
}

/// Handle of a running environment. Cheap to clone; all clones refer to the
/// same environment instance.
#[derive(Clone)]
pub struct Environment {
    inner: Arc<EnvInner>,
}

impl Environment {
    pub(crate) fn build(params: EnvironmentParams) -> Result<Self> {
        if params.infrastructure == InfrastructureKind::SimpleNotMtsafe && !params.autoshutdown {
            return Err(Error::AutoshutdownMustBeEnabled);
        }

        let tracing = Arc::new(TracingHolder::new(params.tracer, params.tracer_filter));
        let inner = Arc::new(EnvInner {
            tracing: Arc::clone(&tracing),
            mboxes: MboxRepository::new(tracing),
            coops: CoopRepository::default(),
            dereg_service: DeregService::start(),
            timer: TimerService::start(params.timer),
            agent_ordinals: SeqCounter::default(),
            dispatchers: Mutex::new(Vec::new()),
            default_dispatcher: OnceLock::new(),
            stats: StatsController::new(params.stats_distribution_period),
            error_logger: params.error_logger,
            coop_listener: params.coop_listener,
            work_thread_factory: params.work_thread_factory,
            activity_tracking: params.activity_tracking,
            default_storage: params.default_storage,
            default_exception_reaction: params.default_exception_reaction,
            autoshutdown: params.autoshutdown,
            stop: Mutex::new(StopState {
                stop_requested: false,
                shutdown_started: false,
                guards: Vec::new(),
            }),
            completed: Mutex::new(false),
            completed_cv: Condvar::new(),
            torn_down: AtomicBool::new(false),
            testing_hook: RwLock::new(None),
        });

        let env = Environment { inner };
        env.inner.stats.attach(&env);

        let spawn_worker = params.infrastructure == InfrastructureKind::MultiThreaded;
        let default_dispatcher = one_thread::make_default(&env, spawn_worker)?;
        let _ = env.inner.default_dispatcher.set(default_dispatcher);
        Ok(env)
    }

    // --- Mailboxes and chains -----------------------------------------

    /// Create an anonymous MPMC mailbox.
    pub fn create_mbox(&self) -> MboxRef {
        self.inner.mboxes.create_mbox()
    }

    /// Resolve or create a named MPMC mailbox.
    pub fn named_mbox(&self, name: &str) -> Result<MboxRef> {
        self.inner.mboxes.named_mbox(name)
    }

    /// Resolve or create a named MPMC mailbox inside a namespace.
    pub fn named_mbox_in(&self, namespace: &str, name: &str) -> Result<MboxRef> {
        self.inner.mboxes.named_mbox_in(Some(namespace), name)
    }

    /// Create a message chain.
    pub fn create_mchain(&self, params: ChainParams) -> ChainRef {
        ChainRef::new(
            self.inner.mboxes.next_id(),
            params,
            Arc::clone(&self.inner.tracing),
        )
    }

    // --- Timed sends --------------------------------------------------

    /// Deliver `msg` to `dest` once, after `pause`.
    pub fn send_delayed<T: Message>(
        &self,
        dest: &MboxRef,
        pause: chrono::Duration,
        msg: T,
    ) -> Result<()> {
        let pause = pause.to_std().map_err(|_| Error::NegativeValueForPause)?;
        self.inner.timer.schedule_anonymous(
            pause,
            TimerAction::Deliver {
                dest: Arc::clone(dest),
                delivery: Delivery::plain(MessageRef::immutable(msg)),
            },
        );
        Ok(())
    }

    /// Deliver a mutable `msg` to `dest` once, after `pause`.
    pub fn send_delayed_mutable<T: Message>(
        &self,
        dest: &MboxRef,
        pause: chrono::Duration,
        msg: T,
    ) -> Result<()> {
        let pause = pause.to_std().map_err(|_| Error::NegativeValueForPause)?;
        self.inner.timer.schedule_anonymous(
            pause,
            TimerAction::Deliver {
                dest: Arc::clone(dest),
                delivery: Delivery::plain(MessageRef::mutable(msg)),
            },
        );
        Ok(())
    }

    /// Deliver `msg` after `pause` and then every `period`. A zero period
    /// degenerates to a one-shot. The timer lives while the returned id is
    /// held.
    pub fn send_periodic<T: Message>(
        &self,
        dest: &MboxRef,
        pause: chrono::Duration,
        period: chrono::Duration,
        msg: T,
    ) -> Result<TimerId> {
        let pause = pause.to_std().map_err(|_| Error::NegativeValueForPause)?;
        let period = period.to_std().map_err(|_| Error::NegativeValueForPeriod)?;
        let period = (!period.is_zero()).then_some(period);
        Ok(self.inner.timer.schedule(
            pause,
            period,
            TimerAction::Deliver {
                dest: Arc::clone(dest),
                delivery: Delivery::plain(MessageRef::immutable(msg)),
            },
        ))
    }

    pub(crate) fn schedule_state_timeout(
        &self,
        cell: Weak<AgentCell>,
        expected_state: u64,
        target: State,
        duration: Duration,
    ) -> Option<TimerId> {
        Some(self.inner.timer.schedule(
            duration,
            None,
            TimerAction::StateTimeout {
                cell,
                expected_state,
                target,
            },
        ))
    }

    // --- Cooperations -------------------------------------------------

    /// The binder of the environment's default dispatcher.
    pub fn default_binder(&self) -> Arc<dyn DispBinder> {
        match self.inner.default_dispatcher.get() {
            Some(dispatcher) => dispatcher.binder(),
            None => Arc::new(crate::dispatcher::NullBinder),
        }
    }

    /// Build and register a cooperation in one step.
    pub fn introduce_coop<F>(&self, build: F) -> Result<CoopHandle>
    where
        F: FnOnce(&mut CoopBuilder) -> Result<()>,
    {
        let mut builder = CoopBuilder::new(self.clone(), None, None, self.default_binder());
        build(&mut builder)?;
        builder.register()
    }

    /// Build and register a named cooperation.
    pub fn introduce_named_coop<F>(&self, name: &str, build: F) -> Result<CoopHandle>
    where
        F: FnOnce(&mut CoopBuilder) -> Result<()>,
    {
        if name.is_empty() {
            return Err(Error::EmptyName);
        }
        let mut builder = CoopBuilder::new(
            self.clone(),
            Some(name.to_string()),
            None,
            self.default_binder(),
        );
        build(&mut builder)?;
        builder.register()
    }

    /// Build and register a cooperation with an explicit default binder.
    pub fn introduce_coop_with_binder<F>(
        &self,
        binder: Arc<dyn DispBinder>,
        build: F,
    ) -> Result<CoopHandle>
    where
        F: FnOnce(&mut CoopBuilder) -> Result<()>,
    {
        let mut builder = CoopBuilder::new(self.clone(), None, None, binder);
        build(&mut builder)?;
        builder.register()
    }

    /// Build and register a child cooperation of `parent`.
    pub fn introduce_child_coop<F>(&self, parent: &CoopHandle, build: F) -> Result<CoopHandle>
    where
        F: FnOnce(&mut CoopBuilder) -> Result<()>,
    {
        let mut builder =
            CoopBuilder::new(self.clone(), None, Some(parent), self.default_binder());
        build(&mut builder)?;
        builder.register()
    }

    /// Initiate deregistration of a cooperation.
    pub fn deregister_coop(&self, handle: &CoopHandle, reason: DeregReason) {
        if let Some(coop) = handle.upgrade() {
            coop.deregister(reason);
        }
    }

    pub(crate) fn coop_registered(&self, coop: &Arc<CoopInner>) {
        self.inner.coops.insert(coop);
        if let Some(listener) = &self.inner.coop_listener {
            listener.on_registered(coop.id());
        }
    }

    pub(crate) fn coop_destroyed(&self, id: crate::util::CoopId, reason: DeregReason) {
        self.inner.coops.remove(id);
        if let Some(listener) = &self.inner.coop_listener {
            listener.on_deregistered(id, reason);
        }
        if self.inner.coops.count() == 0 {
            if self.inner.autoshutdown {
                self.stop();
            }
            self.check_completion();
        }
    }

    pub(crate) fn schedule_final_dereg(&self, coop: Arc<CoopInner>) {
        self.inner.dereg_service.schedule(coop);
    }

    // --- Stop and shutdown --------------------------------------------

    /// Initiate shutdown. New coop registrations fail from this point; the
    /// actual shutdown proceeds once every stop guard is removed.
    pub fn stop(&self) {
        let guards = {
            let mut stop = self.inner.stop.lock();
            if stop.stop_requested {
                None
            } else {
                stop.stop_requested = true;
                Some(stop.guards.clone())
            }
        };
        if let Some(guards) = guards {
            for guard in guards {
                guard.stop();
            }
        }
        self.maybe_begin_shutdown();
    }

    /// Install a stop guard; fails once stop has started.
    pub fn setup_stop_guard(&self, guard: Arc<dyn StopGuard>) -> Result<()> {
        let mut stop = self.inner.stop.lock();
        if stop.stop_requested {
            return Err(Error::CannotSetStopGuardWhenStopIsStarted);
        }
        stop.guards.push(guard);
        Ok(())
    }

    /// Install a stop guard; reports instead of failing once stop has
    /// started.
    pub fn setup_stop_guard_unless_stopping(
        &self,
        guard: Arc<dyn StopGuard>,
    ) -> StopGuardSetupOutcome {
        let mut stop = self.inner.stop.lock();
        if stop.stop_requested {
            StopGuardSetupOutcome::StopAlreadyInProgress
        } else {
            stop.guards.push(guard);
            StopGuardSetupOutcome::Installed
        }
    }

    /// Remove a previously installed stop guard. When the last guard goes
    /// away during a stop, the shutdown proceeds.
    pub fn remove_stop_guard(&self, guard: &Arc<dyn StopGuard>) {
        {
            let mut stop = self.inner.stop.lock();
            stop.guards.retain(|g| !Arc::ptr_eq(g, guard));
        }
        self.maybe_begin_shutdown();
    }

    fn maybe_begin_shutdown(&self) {
        let begin = {
            let mut stop = self.inner.stop.lock();
            if stop.stop_requested && stop.guards.is_empty() && !stop.shutdown_started {
                stop.shutdown_started = true;
                true
            } else {
                false
            }
        };
        if !begin {
            return;
        }

        for coop in self.inner.coops.snapshot() {
            if coop.is_root() {
                coop.deregister(DeregReason::Shutdown);
            }
        }
        self.check_completion();
    }

    fn check_completion(&self) {
        let shutdown_started = self.inner.stop.lock().shutdown_started;
        if !shutdown_started || self.inner.coops.count() != 0 {
            return;
        }
        {
            let mut completed = self.inner.completed.lock();
            if *completed {
                return;
            }
            *completed = true;
        }
        self.inner.completed_cv.notify_all();
        // Wake a single-threaded event loop blocked on the default queue.
        if let Some(dispatcher) = self.inner.default_dispatcher.get() {
            dispatcher.shutdown();
        }
    }

    pub(crate) fn wait_until_finished(&self) {
        let mut completed = self.inner.completed.lock();
        while !*completed {
            self.inner.completed_cv.wait(&mut completed);
        }
    }

    /// Drain-and-execute loop of the single-threaded infrastructures.
    pub(crate) fn run_event_loop(&self) {
        let Some(dispatcher) = self.inner.default_dispatcher.get() else {
            return;
        };
        let queue = Arc::clone(dispatcher.inner().queue());
        while let Some(demand) = queue.pop() {
            demand.execute();
        }
    }

    pub(crate) fn teardown(&self) {
        if self.inner.torn_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.stats.shutdown_and_join();
        self.inner.timer.shutdown();

        let dispatchers: Vec<Arc<dyn DispatcherRuntime>> = {
            let list = self.inner.dispatchers.lock();
            list.iter().filter_map(Weak::upgrade).collect()
        };
        for dispatcher in &dispatchers {
            dispatcher.shutdown();
        }
        for dispatcher in &dispatchers {
            if let Err(error) = dispatcher.wait() {
                self.inner
                    .error_logger
                    .log(&format!("dispatcher join failed: {error}"));
            }
        }

        self.inner.dereg_service.shutdown_and_join();
    }

    // --- Runtime plumbing ---------------------------------------------

    pub(crate) fn ensure_running(&self) -> Result<()> {
        if self.inner.stop.lock().stop_requested {
            return Err(Error::DispatcherCreationFailed);
        }
        Ok(())
    }

    /// True once `stop()` was called.
    pub fn is_stop_requested(&self) -> bool {
        self.inner.stop.lock().stop_requested
    }

    pub(crate) fn tracing_holder(&self) -> &Arc<TracingHolder> {
        &self.inner.tracing
    }

    pub(crate) fn next_agent_ordinal(&self) -> u64 {
        self.inner.agent_ordinals.next()
    }

    pub(crate) fn next_mbox_id(&self) -> MboxId {
        self.inner.mboxes.next_id()
    }

    pub(crate) fn register_dispatcher(&self, dispatcher: Arc<dyn DispatcherRuntime>) {
        let mut list = self.inner.dispatchers.lock();
        list.retain(|weak| weak.strong_count() > 0);
        list.push(Arc::downgrade(&dispatcher));
    }

    /// Resolve a previously created dispatcher by name, checking its
    /// variant, and return its default binder.
    pub fn named_dispatcher_binder(
        &self,
        name: &str,
        kind: DispatcherKind,
    ) -> Result<Arc<dyn DispBinder>> {
        if name.is_empty() {
            return Err(Error::EmptyName);
        }
        let list = self.inner.dispatchers.lock();
        for dispatcher in list.iter().filter_map(Weak::upgrade) {
            if dispatcher.name() == name {
                if dispatcher.kind() != kind {
                    return Err(Error::DispatcherTypeMismatch {
                        name: name.to_string(),
                    });
                }
                return Ok(dispatcher.default_binder());
            }
        }
        Err(Error::NamedDispatcherNotFound {
            name: name.to_string(),
        })
    }

    pub(crate) fn work_thread_factory(&self) -> &Arc<dyn WorkThreadFactory> {
        &self.inner.work_thread_factory
    }

    pub(crate) fn activity_tracking_default(&self) -> ActivityTracking {
        self.inner.activity_tracking
    }

    pub(crate) fn default_subscription_storage(&self) -> SubscriptionStorageKind {
        self.inner.default_storage
    }

    pub(crate) fn default_exception_reaction(&self) -> ExceptionReaction {
        self.inner.default_exception_reaction
    }

    // --- Stats and introspection --------------------------------------

    /// The run-time stats controller of this environment.
    pub fn stats_controller(&self) -> StatsController {
        self.inner.stats.clone()
    }

    /// Register a custom stats source.
    pub fn add_stats_source(&self, source: &Arc<dyn StatsSource>) {
        self.inner.stats.add_source(source);
    }

    /// Number of live cooperations.
    pub fn coop_count(&self) -> usize {
        self.inner.coops.count()
    }

    /// Total number of live agents across cooperations.
    pub fn agent_count(&self) -> usize {
        self.inner.coops.total_agents()
    }

    pub(crate) fn inner(&self) -> &Arc<EnvInner> {
        &self.inner
    }

    // --- Testing hook -------------------------------------------------

    pub(crate) fn set_testing_hook(&self, hook: Arc<dyn TestingHook>) {
        *self.inner.testing_hook.write() = Some(hook);
    }

    pub(crate) fn notify_handled(&self, agent: AgentId, delivery: &Delivery) {
        let hook = self.inner.testing_hook.read().as_ref().map(Arc::clone);
        if let Some(hook) = hook {
            hook.on_event(agent, delivery.message.type_id(), true);
        }
    }

    pub(crate) fn notify_ignored(&self, agent: AgentId, delivery: &Delivery) {
        let hook = self.inner.testing_hook.read().as_ref().map(Arc::clone);
        if let Some(hook) = hook {
            hook.on_event(agent, delivery.message.type_id(), false);
        }
    }
}

/// Launch an environment with default parameters, run `init`, and block
/// until the environment finishes.
pub fn launch<F>(init: F) -> Result<()>
where
    F: FnOnce(&Environment) -> Result<()>,
{
    launch_with_params(|_| {}, init)
}

/// Launch an environment with tuned parameters.
///
/// Returns `Ok(())` on a normal shutdown; an error from `init` aborts the
/// launch after an orderly teardown.
pub fn launch_with_params<T, F>(tune: T, init: F) -> Result<()>
where
    T: FnOnce(&mut EnvironmentParams),
    F: FnOnce(&Environment) -> Result<()>,
{
    let mut params = EnvironmentParams::default();
    tune(&mut params);
    let infrastructure = params.infrastructure;
    let env = Environment::build(params)?;

    let init_outcome = init(&env);
    if init_outcome.is_err() {
        env.stop();
    } else if env.inner.autoshutdown && env.inner.coops.count() == 0 {
        // Nothing was registered; an autoshutdown environment is done.
        env.stop();
    }

    match infrastructure {
        InfrastructureKind::MultiThreaded => env.wait_until_finished(),
        InfrastructureKind::SimpleMtsafe | InfrastructureKind::SimpleNotMtsafe => {
            env.run_event_loop();
            env.wait_until_finished();
        }
    }
    env.teardown();
    init_outcome
}

/// An environment running in the background of the current scope: built on
/// creation, stopped and joined on drop. Useful for embedding the runtime
/// into a larger application and for tests.
pub struct WrappedEnv {
    env: Environment,
}

impl WrappedEnv {
    /// Start a multi-threaded environment with default parameters.
    pub fn new() -> Result<Self> {
        Self::with_params(|_| {})
    }

    /// Start with tuned parameters. The infrastructure is forced to
    /// multi-threaded: a wrapped environment has no dedicated loop thread.
    pub fn with_params<T>(tune: T) -> Result<Self>
    where
        T: FnOnce(&mut EnvironmentParams),
    {
        let mut params = EnvironmentParams::default();
        tune(&mut params);
        params.infrastructure = InfrastructureKind::MultiThreaded;
        // A wrapped environment is owned by its scope, not by coop count.
        params.autoshutdown = false;
        let env = Environment::build(params)?;
        Ok(Self { env })
    }

    /// The wrapped environment.
    pub fn environment(&self) -> &Environment {
        &self.env
    }

    /// Initiate shutdown without waiting.
    pub fn stop(&self) {
        self.env.stop();
    }

    /// Initiate shutdown and wait for full teardown.
    pub fn stop_then_join(&self) {
        self.env.stop();
        self.env.wait_until_finished();
        self.env.teardown();
    }
}

impl Drop for WrappedEnv {
    fn drop(&mut self) {
        self.stop_then_join();
    }
}

/// Built-in stats sources walk the environment itself; custom sources are
/// registered through [`Environment::add_stats_source`].
pub(crate) fn builtin_stats(env: &EnvInner) -> Vec<(String, &'static str, usize)> {
    use crate::stats::names;

    let mut out = vec![
        (
            names::PREFIX_COOP_REPOSITORY.to_string(),
            names::SUFFIX_COOP_REG_COUNT,
            env.coops.count(),
        ),
        (
            names::PREFIX_COOP_REPOSITORY.to_string(),
            names::SUFFIX_COOP_DEREG_COUNT,
            env.coops.deregistering_count(),
        ),
        (
            names::PREFIX_COOP_REPOSITORY.to_string(),
            names::SUFFIX_AGENT_COUNT,
            env.coops.total_agents(),
        ),
        (
            names::PREFIX_MBOX_REPOSITORY.to_string(),
            names::SUFFIX_NAMED_MBOX_COUNT,
            env.mboxes.named_mbox_count(),
        ),
    ];

    let (single_shot, periodic) = env.timer.counts();
    out.push((
        names::PREFIX_TIMER_THREAD.to_string(),
        names::SUFFIX_TIMER_SINGLE_SHOT_COUNT,
        single_shot,
    ));
    out.push((
        names::PREFIX_TIMER_THREAD.to_string(),
        names::SUFFIX_TIMER_PERIODIC_COUNT,
        periodic,
    ));

    let dispatchers = env.dispatchers.lock();
    for dispatcher in dispatchers.iter().filter_map(Weak::upgrade) {
        let (threads, demands) = dispatcher.stats_snapshot();
        let prefix = format!("{}/{}", names::PREFIX_DISPATCHER, dispatcher.name());
        out.push((prefix.clone(), names::SUFFIX_WORK_THREAD_COUNT, threads));
        out.push((prefix.clone(), names::SUFFIX_DEMANDS_COUNT, demands));
        if let Some(activity) = dispatcher.activity_snapshot() {
            out.push((
                prefix.clone(),
                names::SUFFIX_THREAD_WORKING_MICROS,
                (activity.working_ns / 1_000) as usize,
            ));
            out.push((
                prefix,
                names::SUFFIX_THREAD_WAITING_MICROS,
                (activity.waiting_ns / 1_000) as usize,
            ));
        }
    }
    out
}
