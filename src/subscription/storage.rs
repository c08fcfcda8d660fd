// Layer 1: Standard library imports
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

// Layer 2: Third-party crate imports
// (none for this module)

// Layer 3: Internal module imports
use crate::agent::runtime::AgentRuntime;
use crate::agent::traits::AnyAgent;
use crate::error::{Error, Result};
use crate::mailbox::MboxRef;
use crate::message::Delivery;
use crate::util::MboxId;

/// Erased handler invoked with exclusive access to the agent.
pub(crate) type ExclusiveFn = dyn Fn(&mut dyn AnyAgent, &Arc<AgentRuntime>, &Delivery) + Send + Sync;

/// Erased handler invoked with shared access (thread-safe handlers).
pub(crate) type SharedFn = dyn Fn(&dyn AnyAgent, &Arc<AgentRuntime>, &Delivery) + Send + Sync;

#[derive(Clone)]
pub(crate) enum HandlerInvoker {
    Exclusive(Arc<ExclusiveFn>),
    Shared(Arc<SharedFn>),
}

/// A subscribed event handler.
#[derive(Clone)]
pub(crate) struct EventHandler {
    pub thread_safe: bool,
    pub invoker: HandlerInvoker,
}

/// Subscription key: `(mailbox, message type, state)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct SubscrKey {
    pub mbox_id: MboxId,
    pub type_id: TypeId,
    pub state_id: u64,
}

/// A stored subscription. The mailbox reference is retained so that dropping
/// the subscription can unsubscribe at the mailbox side.
pub(crate) struct SubscrEntry {
    pub key: SubscrKey,
    pub mbox: MboxRef,
    pub type_name: &'static str,
    pub handler: EventHandler,
}

/// Outcome of removing one subscription.
pub(crate) struct RemovedSubscription {
    pub mbox: MboxRef,
    /// True when no other state still subscribes `(mailbox, type)`; the
    /// caller must then unsubscribe at the mailbox.
    pub last_for_type: bool,
}

/// Storage back-end contract.
///
/// Lookup cost must not depend on cooperation size, and iteration order must
/// be stable for tracing.
pub(crate) trait SubscriptionStorage: Send {
    fn insert(&mut self, entry: SubscrEntry) -> Result<()>;

    fn remove(&mut self, key: &SubscrKey) -> Option<RemovedSubscription>;

    /// First handler matching `(mbox, type)` along the state path, leaf
    /// first.
    fn find(&self, mbox_id: MboxId, type_id: TypeId, path_leaf_to_root: &[u64])
        -> Option<EventHandler>;

    fn has(&self, mbox_id: MboxId, type_id: TypeId, state_id: Option<u64>) -> bool;

    /// Remove every subscription referring to `mbox_id`; returns the
    /// distinct `(mailbox, type, name)` tuples that must be unsubscribed.
    fn drop_all_for_mailbox(&mut self, mbox_id: MboxId) -> Vec<(MboxRef, TypeId, &'static str)>;

    /// Remove everything; returns the distinct `(mailbox, type, name)`
    /// tuples that must be unsubscribed.
    fn drain_all(&mut self) -> Vec<(MboxRef, TypeId, &'static str)>;

    fn len(&self) -> usize;
}

fn distinct_pairs(
    entries: impl Iterator<Item = (MboxRef, TypeId, &'static str)>,
) -> Vec<(MboxRef, TypeId, &'static str)> {
    let mut seen: Vec<(MboxId, TypeId)> = Vec::new();
    let mut out = Vec::new();
    for (mbox, type_id, name) in entries {
        let key = (mbox.id(), type_id);
        if !seen.contains(&key) {
            seen.push(key);
            out.push((mbox, type_id, name));
        }
    }
    out
}

/// Default back-end: a small sorted-by-nothing vector with linear probing.
/// Agents rarely hold more than a handful of subscriptions.
pub(crate) struct VecStorage {
    entries: Vec<SubscrEntry>,
}

impl VecStorage {
    pub(crate) fn new(initial_capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(initial_capacity),
        }
    }
}

impl SubscriptionStorage for VecStorage {
    fn insert(&mut self, entry: SubscrEntry) -> Result<()> {
        if self.entries.iter().any(|e| e.key == entry.key) {
            return Err(Error::EventHandlerAlreadyProvided {
                message_type: entry.type_name,
            });
        }
        self.entries.push(entry);
        Ok(())
    }

    fn remove(&mut self, key: &SubscrKey) -> Option<RemovedSubscription> {
        let index = self.entries.iter().position(|e| &e.key == key)?;
        let removed = self.entries.remove(index);
        let last_for_type = !self
            .entries
            .iter()
            .any(|e| e.key.mbox_id == key.mbox_id && e.key.type_id == key.type_id);
        Some(RemovedSubscription {
            mbox: removed.mbox,
            last_for_type,
        })
    }

    fn find(
        &self,
        mbox_id: MboxId,
        type_id: TypeId,
        path_leaf_to_root: &[u64],
    ) -> Option<EventHandler> {
        for state_id in path_leaf_to_root {
            let hit = self.entries.iter().find(|e| {
                e.key.mbox_id == mbox_id && e.key.type_id == type_id && e.key.state_id == *state_id
            });
            if let Some(entry) = hit {
                return Some(entry.handler.clone());
            }
        }
        None
    }

    fn has(&self, mbox_id: MboxId, type_id: TypeId, state_id: Option<u64>) -> bool {
        self.entries.iter().any(|e| {
            e.key.mbox_id == mbox_id
                && e.key.type_id == type_id
                && state_id.map_or(true, |s| e.key.state_id == s)
        })
    }

    fn drop_all_for_mailbox(&mut self, mbox_id: MboxId) -> Vec<(MboxRef, TypeId, &'static str)> {
        let mut removed = Vec::new();
        self.entries.retain(|e| {
            if e.key.mbox_id == mbox_id {
                removed.push((Arc::clone(&e.mbox), e.key.type_id, e.type_name));
                false
            } else {
                true
            }
        });
        distinct_pairs(removed.into_iter())
    }

    fn drain_all(&mut self) -> Vec<(MboxRef, TypeId, &'static str)> {
        let drained: Vec<_> = self
            .entries
            .drain(..)
            .map(|e| (e.mbox, e.key.type_id, e.type_name))
            .collect();
        distinct_pairs(drained.into_iter())
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Hash-map back-end for subscription-heavy agents.
pub(crate) struct HashStorage {
    by_key: HashMap<SubscrKey, SubscrEntry>,
}

impl HashStorage {
    pub(crate) fn new() -> Self {
        Self {
            by_key: HashMap::new(),
        }
    }
}

impl SubscriptionStorage for HashStorage {
    fn insert(&mut self, entry: SubscrEntry) -> Result<()> {
        if self.by_key.contains_key(&entry.key) {
            return Err(Error::EventHandlerAlreadyProvided {
                message_type: entry.type_name,
            });
        }
        self.by_key.insert(entry.key, entry);
        Ok(())
    }

    fn remove(&mut self, key: &SubscrKey) -> Option<RemovedSubscription> {
        let removed = self.by_key.remove(key)?;
        let last_for_type = !self
            .by_key
            .keys()
            .any(|k| k.mbox_id == key.mbox_id && k.type_id == key.type_id);
        Some(RemovedSubscription {
            mbox: removed.mbox,
            last_for_type,
        })
    }

    fn find(
        &self,
        mbox_id: MboxId,
        type_id: TypeId,
        path_leaf_to_root: &[u64],
    ) -> Option<EventHandler> {
        for state_id in path_leaf_to_root {
            let key = SubscrKey {
                mbox_id,
                type_id,
                state_id: *state_id,
            };
            if let Some(entry) = self.by_key.get(&key) {
                return Some(entry.handler.clone());
            }
        }
        None
    }

    fn has(&self, mbox_id: MboxId, type_id: TypeId, state_id: Option<u64>) -> bool {
        match state_id {
            Some(state_id) => self.by_key.contains_key(&SubscrKey {
                mbox_id,
                type_id,
                state_id,
            }),
            None => self
                .by_key
                .keys()
                .any(|k| k.mbox_id == mbox_id && k.type_id == type_id),
        }
    }

    fn drop_all_for_mailbox(&mut self, mbox_id: MboxId) -> Vec<(MboxRef, TypeId, &'static str)> {
        let keys: Vec<SubscrKey> = self
            .by_key
            .keys()
            .filter(|k| k.mbox_id == mbox_id)
            .copied()
            .collect();
        let removed = keys.into_iter().filter_map(|k| {
            self.by_key
                .remove(&k)
                .map(|e| (e.mbox, e.key.type_id, e.type_name))
        });
        let removed: Vec<_> = removed.collect();
        distinct_pairs(removed.into_iter())
    }

    fn drain_all(&mut self) -> Vec<(MboxRef, TypeId, &'static str)> {
        let drained: Vec<_> = self
            .by_key
            .drain()
            .map(|(_, e)| (e.mbox, e.key.type_id, e.type_name))
            .collect();
        distinct_pairs(drained.into_iter())
    }

    fn len(&self) -> usize {
        self.by_key.len()
    }
}

/// Factory-selectable storage back-end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionStorageKind {
    /// Linear small-vector storage; the right choice for almost all agents.
    VecBased {
        /// Capacity reserved up front.
        initial_capacity: usize,
    },
    /// Hash-map storage for agents with very many subscriptions.
    HashBased,
}

impl SubscriptionStorageKind {
    pub(crate) fn make(&self) -> Box<dyn SubscriptionStorage> {
        match self {
            Self::VecBased { initial_capacity } => Box::new(VecStorage::new(*initial_capacity)),
            Self::HashBased => Box::new(HashStorage::new()),
        }
    }
}

impl Default for SubscriptionStorageKind {
    fn default() -> Self {
        Self::VecBased {
            initial_capacity: 8,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailbox::MsgType;
    use crate::message::Message;
    use crate::msg_tracing::TracingHolder;

    #[derive(Debug)]
    struct Ping;

    impl Message for Ping {
        const MESSAGE_TYPE: &'static str = "ping";
    }

    #[derive(Debug)]
    struct Pong;

    impl Message for Pong {
        const MESSAGE_TYPE: &'static str = "pong";
    }

    fn test_mbox(id: u64) -> MboxRef {
        Arc::new(crate::mailbox::mpmc::MpmcMbox::new(
            MboxId::from_raw(id),
            None,
            Arc::new(TracingHolder::default()),
        ))
    }

    fn noop_handler() -> EventHandler {
        EventHandler {
            thread_safe: false,
            invoker: HandlerInvoker::Exclusive(Arc::new(
                |_: &mut dyn AnyAgent, _: &Arc<AgentRuntime>, _: &Delivery| {},
            )),
        }
    }

    fn entry(mbox: &MboxRef, msg_type: MsgType, state_id: u64) -> SubscrEntry {
        SubscrEntry {
            key: SubscrKey {
                mbox_id: mbox.id(),
                type_id: msg_type.id,
                state_id,
            },
            mbox: Arc::clone(mbox),
            type_name: msg_type.name,
            handler: noop_handler(),
        }
    }

    fn backends() -> Vec<Box<dyn SubscriptionStorage>> {
        vec![
            SubscriptionStorageKind::default().make(),
            SubscriptionStorageKind::HashBased.make(),
        ]
    }

    #[test]
    fn test_duplicate_key_rejected() {
        for mut storage in backends() {
            let mbox = test_mbox(1);
            assert!(storage.insert(entry(&mbox, MsgType::of::<Ping>(), 1)).is_ok());
            let duplicate = storage.insert(entry(&mbox, MsgType::of::<Ping>(), 1));
            assert_eq!(
                duplicate.err(),
                Some(Error::EventHandlerAlreadyProvided {
                    message_type: "ping"
                })
            );
        }
    }

    #[test]
    fn test_find_walks_leaf_to_root() {
        for mut storage in backends() {
            let mbox = test_mbox(1);
            storage.insert(entry(&mbox, MsgType::of::<Ping>(), 10)).ok();
            storage.insert(entry(&mbox, MsgType::of::<Ping>(), 20)).ok();

            // Leaf 20 wins over ancestor 10.
            assert!(storage
                .find(mbox.id(), MsgType::of::<Ping>().id, &[20, 10])
                .is_some());
            // A path that only contains the ancestor still resolves.
            assert!(storage
                .find(mbox.id(), MsgType::of::<Ping>().id, &[10])
                .is_some());
            // An unrelated path resolves nothing.
            assert!(storage
                .find(mbox.id(), MsgType::of::<Ping>().id, &[33])
                .is_none());
        }
    }

    #[test]
    fn test_remove_reports_last_for_type() {
        for mut storage in backends() {
            let mbox = test_mbox(1);
            storage.insert(entry(&mbox, MsgType::of::<Ping>(), 1)).ok();
            storage.insert(entry(&mbox, MsgType::of::<Ping>(), 2)).ok();

            let first = storage.remove(&SubscrKey {
                mbox_id: mbox.id(),
                type_id: MsgType::of::<Ping>().id,
                state_id: 1,
            });
            assert!(matches!(
                first,
                Some(RemovedSubscription {
                    last_for_type: false,
                    ..
                })
            ));

            let second = storage.remove(&SubscrKey {
                mbox_id: mbox.id(),
                type_id: MsgType::of::<Ping>().id,
                state_id: 2,
            });
            assert!(matches!(
                second,
                Some(RemovedSubscription {
                    last_for_type: true,
                    ..
                })
            ));
        }
    }

    #[test]
    fn test_drop_all_for_mailbox() {
        for mut storage in backends() {
            let kept = test_mbox(1);
            let dropped = test_mbox(2);
            storage.insert(entry(&kept, MsgType::of::<Ping>(), 1)).ok();
            storage.insert(entry(&dropped, MsgType::of::<Ping>(), 1)).ok();
            storage.insert(entry(&dropped, MsgType::of::<Pong>(), 1)).ok();
            storage.insert(entry(&dropped, MsgType::of::<Pong>(), 2)).ok();

            let removed = storage.drop_all_for_mailbox(dropped.id());
            // Distinct (mailbox, type) pairs only.
            assert_eq!(removed.len(), 2);
            assert_eq!(storage.len(), 1);
        }
    }

    #[test]
    fn test_drain_all_distinct() {
        for mut storage in backends() {
            let mbox = test_mbox(1);
            storage.insert(entry(&mbox, MsgType::of::<Ping>(), 1)).ok();
            storage.insert(entry(&mbox, MsgType::of::<Ping>(), 2)).ok();
            storage.insert(entry(&mbox, MsgType::of::<Pong>(), 1)).ok();

            let removed = storage.drain_all();
            assert_eq!(removed.len(), 2);
            assert_eq!(storage.len(), 0);
        }
    }

    #[test]
    fn test_has_with_and_without_state() {
        for mut storage in backends() {
            let mbox = test_mbox(1);
            storage.insert(entry(&mbox, MsgType::of::<Ping>(), 5)).ok();

            let type_id = MsgType::of::<Ping>().id;
            assert!(storage.has(mbox.id(), type_id, None));
            assert!(storage.has(mbox.id(), type_id, Some(5)));
            assert!(!storage.has(mbox.id(), type_id, Some(6)));
        }
    }
}
