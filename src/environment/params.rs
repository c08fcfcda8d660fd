//! Environment tuning parameters.

// Layer 1: Standard library imports
use std::sync::Arc;
use std::time::Duration;

// Layer 2: Third-party crate imports
// (none for this module)

// Layer 3: Internal module imports
use crate::agent::ExceptionReaction;
use crate::coop::DeregReason;
use crate::dispatcher::{ActivityTracking, StdWorkThreadFactory, WorkThreadFactory};
use crate::msg_tracing::{DeliveryTracer, TraceFilter};
use crate::subscription::SubscriptionStorageKind;
use crate::timer::TimerThreadKind;
use crate::util::CoopId;

/// Environment infrastructure family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfrastructureKind {
    /// Own worker threads; the default.
    MultiThreaded,
    /// Single-threaded event loop on the launching thread; external threads
    /// may still `send` concurrently.
    SimpleMtsafe,
    /// Single-threaded event loop; only the owning thread may touch the
    /// environment. Auto-shutdown is mandatory.
    SimpleNotMtsafe,
}

/// Receiver of runtime error reports.
pub trait ErrorLogger: Send + Sync + 'static {
    /// Log one error line.
    fn log(&self, message: &str);
}

/// Default error logger: forwards to the `tracing` ecosystem.
#[derive(Debug, Default)]
pub struct TracingErrorLogger;

impl ErrorLogger for TracingErrorLogger {
    fn log(&self, message: &str) {
        tracing::error!("{message}");
    }
}

/// Observer of every cooperation registration and deregistration.
pub trait CoopListener: Send + Sync + 'static {
    fn on_registered(&self, coop: CoopId);
    fn on_deregistered(&self, coop: CoopId, reason: DeregReason);
}

/// Options recognised by [`launch_with_params`](crate::environment::launch_with_params).
///
/// # Example
/// ```rust,ignore
/// launch_with_params(
///     |params| {
///         params
///             .timer_thread(TimerThreadKind::Wheel)
///             .work_thread_activity_tracking(ActivityTracking::On);
///     },
///     |env| { /* init */ Ok(()) },
/// )?;
/// ```
pub struct EnvironmentParams {
    pub(crate) infrastructure: InfrastructureKind,
    pub(crate) timer: TimerThreadKind,
    pub(crate) error_logger: Arc<dyn ErrorLogger>,
    pub(crate) tracer: Option<Arc<dyn DeliveryTracer>>,
    pub(crate) tracer_filter: Option<Arc<dyn TraceFilter>>,
    pub(crate) activity_tracking: ActivityTracking,
    pub(crate) default_storage: SubscriptionStorageKind,
    pub(crate) autoshutdown: bool,
    pub(crate) work_thread_factory: Arc<dyn WorkThreadFactory>,
    pub(crate) coop_listener: Option<Arc<dyn CoopListener>>,
    pub(crate) default_exception_reaction: ExceptionReaction,
    pub(crate) stats_distribution_period: Duration,
}

impl Default for EnvironmentParams {
    fn default() -> Self {
        Self {
            infrastructure: InfrastructureKind::MultiThreaded,
            timer: TimerThreadKind::default(),
            error_logger: Arc::new(TracingErrorLogger),
            tracer: None,
            tracer_filter: None,
            activity_tracking: ActivityTracking::Unspecified,
            default_storage: SubscriptionStorageKind::default(),
            autoshutdown: true,
            work_thread_factory: Arc::new(StdWorkThreadFactory),
            coop_listener: None,
            default_exception_reaction: ExceptionReaction::Abort,
            stats_distribution_period: Duration::from_secs(2),
        }
    }
}

impl EnvironmentParams {
    /// Select the infrastructure family.
    pub fn infrastructure(&mut self, kind: InfrastructureKind) -> &mut Self {
        self.infrastructure = kind;
        self
    }

    /// Select the timer back-end.
    pub fn timer_thread(&mut self, kind: TimerThreadKind) -> &mut Self {
        self.timer = kind;
        self
    }

    /// Replace the error logger.
    pub fn error_logger(&mut self, logger: Arc<dyn ErrorLogger>) -> &mut Self {
        self.error_logger = logger;
        self
    }

    /// Install a message-delivery tracer.
    pub fn message_delivery_tracer(&mut self, tracer: Arc<dyn DeliveryTracer>) -> &mut Self {
        self.tracer = Some(tracer);
        self
    }

    /// Install a filter in front of the delivery tracer.
    pub fn message_delivery_tracer_filter(&mut self, filter: Arc<dyn TraceFilter>) -> &mut Self {
        self.tracer_filter = Some(filter);
        self
    }

    /// Environment-wide default for work-thread activity tracking.
    pub fn work_thread_activity_tracking(&mut self, tracking: ActivityTracking) -> &mut Self {
        self.activity_tracking = tracking;
        self
    }

    /// Default subscription-storage back-end for agents.
    pub fn default_subscription_storage_factory(
        &mut self,
        storage: SubscriptionStorageKind,
    ) -> &mut Self {
        self.default_storage = storage;
        self
    }

    /// Keep the environment alive after the last coop deregisters.
    pub fn disable_autoshutdown(&mut self) -> &mut Self {
        self.autoshutdown = false;
        self
    }

    /// Replace the work-thread factory used by dispatchers.
    pub fn work_thread_factory(&mut self, factory: Arc<dyn WorkThreadFactory>) -> &mut Self {
        self.work_thread_factory = factory;
        self
    }

    /// Observe every coop registration/deregistration.
    pub fn coop_listener(&mut self, listener: Arc<dyn CoopListener>) -> &mut Self {
        self.coop_listener = Some(listener);
        self
    }

    /// Environment default for `ExceptionReaction::Inherit` chains.
    pub fn exception_reaction(&mut self, reaction: ExceptionReaction) -> &mut Self {
        self.default_exception_reaction = reaction;
        self
    }

    /// Initial stats distribution period.
    pub fn stats_distribution_period(&mut self, period: Duration) -> &mut Self {
        self.stats_distribution_period = period;
        self
    }
}
