//! Hierarchical agent states.
//!
//! States form a rooted forest per agent, up to [`MAX_STATE_NESTING`] levels
//! deep. A state carries optional enter/exit hooks, an optional time limit
//! (duration plus successor state), and an optional history kind. The agent
//! is always "in" exactly one leaf; the active path is the chain of
//! ancestors from root to that leaf.

// Layer 1: Standard library imports
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

// Layer 2: Third-party crate imports
use parking_lot::Mutex;

// Layer 3: Internal module imports
use crate::error::{Error, Result};

/// Maximum supported nesting depth of substates.
pub const MAX_STATE_NESTING: usize = 16;

static NEXT_STATE_ID: AtomicU64 = AtomicU64::new(1);

/// History kind of a composite state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum History {
    /// No history: entering the state activates the state itself.
    None,
    /// Entering the state re-activates its last active direct substate.
    Shallow,
    /// Entering the state re-activates the last active leaf beneath it.
    Deep,
}

type Hook = Arc<dyn Fn() + Send + Sync>;

pub(crate) struct TimeLimit {
    pub duration: Duration,
    pub target: State,
}

struct StateNode {
    id: u64,
    name: String,
    parent: Option<State>,
    depth: usize,
    history: History,
    on_enter: Mutex<Option<Hook>>,
    on_exit: Mutex<Option<Hook>>,
    time_limit: Mutex<Option<TimeLimit>>,
    remembered: Mutex<Option<State>>,
}

/// Cheap handle to a state node.
///
/// States are usually stored as fields of the agent struct and referenced
/// from subscriptions and `change_state` calls.
///
/// # Example
/// ```rust
/// use troupe::agent::state::{History, State};
///
/// let off = State::new("off");
/// let blinking = State::with_history("blinking", History::Shallow);
/// let blink_on = blinking.substate("blink_on")?;
/// # Ok::<(), troupe::Error>(())
/// ```
#[derive(Clone)]
pub struct State {
    node: Arc<StateNode>,
}

impl State {
    /// Create a top-level state.
    pub fn new(name: impl Into<String>) -> Self {
        Self::make(name.into(), None, History::None)
    }

    /// Create a top-level state with history.
    pub fn with_history(name: impl Into<String>, history: History) -> Self {
        Self::make(name.into(), None, history)
    }

    /// Create a substate of `self`.
    pub fn substate(&self, name: impl Into<String>) -> Result<Self> {
        self.substate_with_history(name, History::None)
    }

    /// Create a substate of `self` with history.
    pub fn substate_with_history(
        &self,
        name: impl Into<String>,
        history: History,
    ) -> Result<Self> {
        if self.node.depth + 1 >= MAX_STATE_NESTING {
            return Err(Error::StateNestingTooDeep {
                max: MAX_STATE_NESTING,
            });
        }
        Ok(Self::make(name.into(), Some(self.clone()), history))
    }

    fn make(name: String, parent: Option<State>, history: History) -> Self {
        let depth = parent.as_ref().map_or(0, |p| p.node.depth + 1);
        Self {
            node: Arc::new(StateNode {
                id: NEXT_STATE_ID.fetch_add(1, Ordering::Relaxed),
                name,
                parent,
                depth,
                history,
                on_enter: Mutex::new(None),
                on_exit: Mutex::new(None),
                time_limit: Mutex::new(None),
                remembered: Mutex::new(None),
            }),
        }
    }

    /// Short name of the state.
    pub fn name(&self) -> &str {
        &self.node.name
    }

    /// Dotted path name, e.g. `blinking.blink_on`.
    pub fn path_name(&self) -> String {
        match &self.node.parent {
            Some(parent) => format!("{}.{}", parent.path_name(), self.node.name),
            None => self.node.name.clone(),
        }
    }

    /// Install the enter hook, replacing any previous one.
    pub fn on_enter(&self, hook: impl Fn() + Send + Sync + 'static) -> State {
        *self.node.on_enter.lock() = Some(Arc::new(hook));
        self.clone()
    }

    /// Install the exit hook, replacing any previous one.
    pub fn on_exit(&self, hook: impl Fn() + Send + Sync + 'static) -> State {
        *self.node.on_exit.lock() = Some(Arc::new(hook));
        self.clone()
    }

    /// Arm a time limit: when the agent stays in this state longer than
    /// `duration`, it switches to `target`.
    pub fn time_limit(&self, duration: Duration, target: &State) -> State {
        *self.node.time_limit.lock() = Some(TimeLimit {
            duration,
            target: target.clone(),
        });
        self.clone()
    }

    /// Remove the time limit. Idempotent: dropping a limit that was never
    /// armed is a no-op.
    pub fn drop_time_limit(&self) {
        *self.node.time_limit.lock() = None;
    }

    pub(crate) fn id(&self) -> u64 {
        self.node.id
    }

    pub(crate) fn depth(&self) -> usize {
        self.node.depth
    }

    pub(crate) fn parent(&self) -> Option<&State> {
        self.node.parent.as_ref()
    }

    pub(crate) fn history(&self) -> History {
        self.node.history
    }

    pub(crate) fn run_enter_hook(&self) {
        let hook = self.node.on_enter.lock().clone();
        if let Some(hook) = hook {
            hook();
        }
    }

    pub(crate) fn run_exit_hook(&self) {
        let hook = self.node.on_exit.lock().clone();
        if let Some(hook) = hook {
            hook();
        }
    }

    pub(crate) fn current_time_limit(&self) -> Option<(Duration, State)> {
        self.node
            .time_limit
            .lock()
            .as_ref()
            .map(|tl| (tl.duration, tl.target.clone()))
    }

    pub(crate) fn remember(&self, descendant: &State) {
        *self.node.remembered.lock() = Some(descendant.clone());
    }

    pub(crate) fn remembered(&self) -> Option<State> {
        self.node.remembered.lock().clone()
    }

    /// Path from the forest root down to `self`, inclusive.
    pub(crate) fn path_from_root(&self) -> Vec<State> {
        let mut path = Vec::with_capacity(self.node.depth + 1);
        let mut cursor = Some(self.clone());
        while let Some(state) = cursor {
            cursor = state.parent().cloned();
            path.push(state);
        }
        path.reverse();
        path
    }

    /// Resolve the effective switch target, honouring history markers.
    pub(crate) fn resolve_history_target(&self) -> State {
        match (self.history(), self.remembered()) {
            (History::None, _) | (_, None) => self.clone(),
            (History::Shallow, Some(child)) => child.clone(),
            (History::Deep, Some(leaf)) => leaf,
        }
    }
}

impl PartialEq for State {
    fn eq(&self, other: &Self) -> bool {
        self.node.id == other.node.id
    }
}

impl Eq for State {}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("State")
            .field("name", &self.path_name())
            .field("id", &self.node.id)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::panic)] // Tests are allowed to panic on violated expectations
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_nesting_bound() {
        let mut state = State::new("s0");
        for i in 1..MAX_STATE_NESTING {
            state = match state.substate(format!("s{i}")) {
                Ok(s) => s,
                Err(e) => panic!("depth {i} must be allowed: {e}"),
            };
        }
        assert_eq!(
            state.substate("too_deep").err(),
            Some(Error::StateNestingTooDeep {
                max: MAX_STATE_NESTING
            })
        );
    }

    #[test]
    fn test_path_from_root() {
        let a = State::new("a");
        let b = a.substate("b").ok();
        let c = b.as_ref().and_then(|b| b.substate("c").ok());
        let c = match c {
            Some(c) => c,
            None => panic!("substates must build"),
        };

        let names: Vec<String> = c
            .path_from_root()
            .iter()
            .map(|s| s.name().to_string())
            .collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(c.path_name(), "a.b.c");
    }

    #[test]
    fn test_hooks_run() {
        let entered = Arc::new(AtomicUsize::new(0));
        let exited = Arc::new(AtomicUsize::new(0));
        let state = State::new("s");
        {
            let entered = Arc::clone(&entered);
            state.on_enter(move || {
                entered.fetch_add(1, Ordering::SeqCst);
            });
        }
        {
            let exited = Arc::clone(&exited);
            state.on_exit(move || {
                exited.fetch_add(1, Ordering::SeqCst);
            });
        }

        state.run_enter_hook();
        state.run_enter_hook();
        state.run_exit_hook();
        assert_eq!(entered.load(Ordering::SeqCst), 2);
        assert_eq!(exited.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_time_limit_round_trip() {
        let target = State::new("target");
        let state = State::new("s");
        assert!(state.current_time_limit().is_none());

        state.time_limit(Duration::from_millis(100), &target);
        let limit = state.current_time_limit();
        assert_eq!(
            limit.map(|(d, t)| (d, t.name().to_string())),
            Some((Duration::from_millis(100), "target".to_string()))
        );

        state.drop_time_limit();
        state.drop_time_limit(); // idempotent
        assert!(state.current_time_limit().is_none());
    }

    #[test]
    fn test_history_resolution() {
        let plain = State::new("plain");
        assert_eq!(plain.resolve_history_target(), plain);

        let shallow = State::with_history("shallow", History::Shallow);
        assert_eq!(shallow.resolve_history_target(), shallow);

        let child = match shallow.substate("child") {
            Ok(c) => c,
            Err(e) => panic!("substate must build: {e}"),
        };
        shallow.remember(&child);
        assert_eq!(shallow.resolve_history_target(), child);
    }

    #[test]
    fn test_state_identity() {
        let a = State::new("same");
        let b = State::new("same");
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }
}
