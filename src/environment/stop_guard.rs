//! Stop guards: delaying environment shutdown until released.

// Layer 1: Standard library imports
// (none)

// Layer 2: Third-party crate imports
// (none)

// Layer 3: Internal module imports
// (none)

/// A registered guard consulted by `Environment::stop`.
///
/// While any guard is installed, `stop()` signals every guard but does not
/// begin draining dispatchers; the actual shutdown proceeds only after each
/// guard has been removed with `remove_stop_guard`.
pub trait StopGuard: Send + Sync + 'static {
    /// Called once when stop is initiated. Typical implementations kick off
    /// their own wind-down and call `remove_stop_guard` when done.
    fn stop(&self);
}

/// Outcome of the non-throwing stop-guard installation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopGuardSetupOutcome {
    /// The guard is installed.
    Installed,
    /// Stop was already in progress; the guard was not installed.
    StopAlreadyInProgress,
}
