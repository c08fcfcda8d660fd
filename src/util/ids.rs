// Layer 1: Standard library imports
use std::fmt::{self, Display};
use std::sync::atomic::{AtomicU64, Ordering};

// Layer 2: Third-party crate imports
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// Layer 3: Internal module imports
// (none)

/// Unique identifier of an agent.
///
/// UUIDv4, globally unique, cheap to copy. Used in trace events, stats
/// samples, and introspection; the runtime additionally orders agents by an
/// internal registration ordinal, never by this id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentId(Uuid);

impl AgentId {
    /// Generate a new random agent id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for AgentId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier of a cooperation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CoopId(Uuid);

impl CoopId {
    /// Generate a new random cooperation id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for CoopId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for CoopId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a mailbox.
///
/// Sequential within an environment. The ordering is meaningful: MPMC
/// mailboxes iterate equal-priority subscribers in a stable order derived
/// from creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MboxId(u64);

impl MboxId {
    pub(crate) fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw numeric value, for logs and trace events.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Display for MboxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mbox:{}", self.0)
    }
}

/// Monotonic counter for environment-scoped sequence numbers.
#[derive(Debug, Default)]
pub(crate) struct SeqCounter(AtomicU64);

impl SeqCounter {
    pub(crate) fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// Agent priority, `P0` (lowest, default) through `P7` (highest).
///
/// Priorities affect MPMC delivery order between subscribers and the
/// priority-aware dispatcher variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Priority {
    /// Lowest priority (the default).
    P0,
    P1,
    P2,
    P3,
    P4,
    P5,
    P6,
    /// Highest priority.
    P7,
}

/// Total count of priority levels.
pub const PRIORITIES_COUNT: usize = 8;

impl Priority {
    /// Numeric index in `0..PRIORITIES_COUNT`.
    pub fn index(self) -> usize {
        self as usize
    }

    /// All priorities from lowest to highest.
    pub fn all() -> [Priority; PRIORITIES_COUNT] {
        [
            Priority::P0,
            Priority::P1,
            Priority::P2,
            Priority::P3,
            Priority::P4,
            Priority::P5,
            Priority::P6,
            Priority::P7,
        ]
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::P0
    }
}

impl Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.index())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_id_uniqueness() {
        assert_ne!(AgentId::new(), AgentId::new());
    }

    #[test]
    fn test_coop_id_uniqueness() {
        assert_ne!(CoopId::new(), CoopId::new());
    }

    #[test]
    fn test_mbox_id_ordering_follows_creation() {
        let counter = SeqCounter::default();
        let first = MboxId::from_raw(counter.next());
        let second = MboxId::from_raw(counter.next());
        assert!(first < second);
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::P7 > Priority::P0);
        assert!(Priority::P4 > Priority::P3);
        assert_eq!(Priority::default(), Priority::P0);
    }

    #[test]
    fn test_priority_index_roundtrip() {
        for (i, p) in Priority::all().into_iter().enumerate() {
            assert_eq!(p.index(), i);
        }
    }

    #[test]
    fn test_display_formats() {
        assert_eq!(Priority::P3.to_string(), "p3");
        assert_eq!(MboxId::from_raw(7).to_string(), "mbox:7");
    }
}
