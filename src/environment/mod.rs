//! Environment: the container of every runtime service.
//!
//! Each environment owns its own timer service, stats controller, tracing
//! holder, mailbox and cooperation repositories, and dispatcher registry;
//! multiple environments coexist in one process with isolated lifetimes.

pub mod env;
pub mod params;
pub mod stop_guard;

pub use env::{launch, launch_with_params, Environment, WrappedEnv};
pub use params::{
    CoopListener, EnvironmentParams, ErrorLogger, InfrastructureKind, TracingErrorLogger,
};
pub use stop_guard::{StopGuard, StopGuardSetupOutcome};
