//! Mailbox repository: id allocation and the named-mailbox registry.
//!
//! Named mailboxes are uniquely resolvable within an optional namespace. The
//! registry keeps weak references: asking for a name with a live mailbox
//! returns that mailbox, otherwise a fresh one is created under the name.

// Layer 1: Standard library imports
use std::sync::{Arc, Weak};

// Layer 2: Third-party crate imports
use dashmap::DashMap;

// Layer 3: Internal module imports
use crate::error::{Error, Result};
use crate::msg_tracing::TracingHolder;
use crate::util::ids::SeqCounter;
use crate::util::MboxId;

use super::mpmc::MpmcMbox;
use super::traits::{Mbox, MboxRef};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct NamedMboxKey {
    namespace: Option<String>,
    name: String,
}

pub(crate) struct MboxRepository {
    counter: SeqCounter,
    tracing: Arc<TracingHolder>,
    named: DashMap<NamedMboxKey, Weak<dyn Mbox>>,
}

impl MboxRepository {
    pub(crate) fn new(tracing: Arc<TracingHolder>) -> Self {
        Self {
            counter: SeqCounter::default(),
            tracing,
            named: DashMap::new(),
        }
    }

    /// Allocate an id for any mailbox-like endpoint (chains included).
    pub(crate) fn next_id(&self) -> MboxId {
        MboxId::from_raw(self.counter.next())
    }

    /// Create an anonymous MPMC mailbox.
    pub(crate) fn create_mbox(&self) -> MboxRef {
        Arc::new(MpmcMbox::new(
            self.next_id(),
            None,
            Arc::clone(&self.tracing),
        ))
    }

    /// Resolve or create a named MPMC mailbox in the default namespace.
    pub(crate) fn named_mbox(&self, name: &str) -> Result<MboxRef> {
        self.named_mbox_in(None, name)
    }

    /// Resolve or create a named MPMC mailbox inside a namespace.
    pub(crate) fn named_mbox_in(&self, namespace: Option<&str>, name: &str) -> Result<MboxRef> {
        if name.is_empty() || namespace.is_some_and(str::is_empty) {
            return Err(Error::EmptyName);
        }
        let key = NamedMboxKey {
            namespace: namespace.map(str::to_string),
            name: name.to_string(),
        };

        let mut entry = self.named.entry(key.clone()).or_insert_with(|| {
            let empty: Weak<MpmcMbox> = Weak::new();
            empty as Weak<dyn Mbox>
        });
        if let Some(live) = entry.upgrade() {
            return Ok(live);
        }
        let display = match &key.namespace {
            Some(ns) => format!("<named:{ns}::{name}>"),
            None => format!("<named:{name}>"),
        };
        let fresh: Arc<MpmcMbox> = Arc::new(MpmcMbox::new(
            self.next_id(),
            Some(display),
            Arc::clone(&self.tracing),
        ));
        let fresh_ref: MboxRef = fresh;
        *entry = Arc::downgrade(&fresh_ref);
        Ok(fresh_ref)
    }

    /// Number of currently-live named mailboxes (dead entries are pruned).
    pub(crate) fn named_mbox_count(&self) -> usize {
        self.named.retain(|_, weak| weak.strong_count() > 0);
        self.named.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_sequential() {
        let repo = MboxRepository::new(Arc::new(TracingHolder::default()));
        let a = repo.next_id();
        let b = repo.next_id();
        assert!(a < b);
    }

    #[test]
    fn test_named_mbox_is_reused_while_alive() {
        let repo = MboxRepository::new(Arc::new(TracingHolder::default()));
        let first = repo.named_mbox("alpha").ok();
        let second = repo.named_mbox("alpha").ok();
        assert_eq!(
            first.as_ref().map(|m| m.id()),
            second.as_ref().map(|m| m.id())
        );
    }

    #[test]
    fn test_named_mbox_recreated_after_death() {
        let repo = MboxRepository::new(Arc::new(TracingHolder::default()));
        let first_id = repo.named_mbox("beta").map(|m| m.id()).ok();
        // The mailbox died with the dropped reference above.
        let second_id = repo.named_mbox("beta").map(|m| m.id()).ok();
        assert_ne!(first_id, second_id);
    }

    #[test]
    fn test_namespaces_are_isolated() {
        let repo = MboxRepository::new(Arc::new(TracingHolder::default()));
        let plain = repo.named_mbox("x").ok();
        let spaced = repo.named_mbox_in(Some("ns"), "x").ok();
        assert_ne!(
            plain.as_ref().map(|m| m.id()),
            spaced.as_ref().map(|m| m.id())
        );
    }

    #[test]
    fn test_empty_names_rejected() {
        let repo = MboxRepository::new(Arc::new(TracingHolder::default()));
        assert_eq!(repo.named_mbox("").err(), Some(Error::EmptyName));
        assert_eq!(
            repo.named_mbox_in(Some(""), "x").err(),
            Some(Error::EmptyName)
        );
    }

    #[test]
    fn test_named_mbox_count_prunes_dead() {
        let repo = MboxRepository::new(Arc::new(TracingHolder::default()));
        let held = repo.named_mbox("held").ok();
        let _ = repo.named_mbox("dropped").map(|m| m.id());
        assert_eq!(repo.named_mbox_count(), 1);
        drop(held);
        assert_eq!(repo.named_mbox_count(), 0);
    }
}
