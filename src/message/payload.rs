//! Internal payload representation.
//!
//! Immutable payloads live behind a shared allocation and may be observed by
//! any number of handlers concurrently. Mutable payloads are carried inside a
//! take-once cell: the box is moved out exactly once, at handler entry, which
//! preserves single ownership and the heap address across the whole
//! send → handler → resend chain.

// Layer 1: Standard library imports
use std::any::{Any, TypeId};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

// Layer 2: Third-party crate imports
use parking_lot::Mutex;

// Layer 3: Internal module imports
use super::traits::{Message, Signal};

/// Whether a payload is shared or exclusive-owned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutability {
    /// Deliverable to many subscribers; handlers get a shared view.
    Immutable,
    /// Deliverable to at most one subscriber; the handler gets unique
    /// ownership.
    Mutable,
}

enum PayloadCell {
    Immutable(Box<dyn Any + Send + Sync>),
    Mutable(Mutex<Option<Box<dyn Any + Send>>>),
}

struct PayloadInner {
    type_id: TypeId,
    message_type: &'static str,
    signal: bool,
    cell: PayloadCell,
}

/// Type-erased, cheaply cloneable reference to a message payload.
#[derive(Clone)]
pub struct MessageRef {
    inner: Arc<PayloadInner>,
}

impl MessageRef {
    /// Wrap an immutable message. Public for envelope implementations that
    /// substitute payloads.
    pub fn immutable<T: Message>(msg: T) -> Self {
        Self {
            inner: Arc::new(PayloadInner {
                type_id: TypeId::of::<T>(),
                message_type: T::MESSAGE_TYPE,
                signal: false,
                cell: PayloadCell::Immutable(Box::new(msg)),
            }),
        }
    }

    /// Wrap a mutable (exclusive-owned) message.
    pub fn mutable<T: Message>(msg: T) -> Self {
        Self::mutable_boxed(Box::new(msg))
    }

    /// Wrap an already-boxed mutable message, keeping its heap address.
    pub(crate) fn mutable_boxed<T: Message>(msg: Box<T>) -> Self {
        Self {
            inner: Arc::new(PayloadInner {
                type_id: TypeId::of::<T>(),
                message_type: T::MESSAGE_TYPE,
                signal: false,
                cell: PayloadCell::Mutable(Mutex::new(Some(msg))),
            }),
        }
    }

    /// Materialise a signal instance.
    pub(crate) fn signal<S: Signal>() -> Self {
        Self {
            inner: Arc::new(PayloadInner {
                type_id: TypeId::of::<S>(),
                message_type: S::MESSAGE_TYPE,
                signal: true,
                cell: PayloadCell::Immutable(Box::new(S::default())),
            }),
        }
    }

    /// `TypeId` of the payload type.
    pub fn type_id(&self) -> TypeId {
        self.inner.type_id
    }

    /// Stable name of the payload type.
    pub fn message_type(&self) -> &'static str {
        self.inner.message_type
    }

    /// True for exclusive-owned payloads.
    pub fn is_mutable(&self) -> bool {
        matches!(self.inner.cell, PayloadCell::Mutable(_))
    }

    /// True for zero-payload signals.
    pub fn is_signal(&self) -> bool {
        self.inner.signal
    }

    /// Shared view of an immutable payload.
    ///
    /// Returns `None` for a type mismatch or a mutable payload.
    pub fn downcast_ref<T: Message>(&self) -> Option<&T> {
        match &self.inner.cell {
            PayloadCell::Immutable(payload) => payload.downcast_ref::<T>(),
            PayloadCell::Mutable(_) => None,
        }
    }

    /// Move the unique owner out of a mutable payload.
    ///
    /// Returns `None` for a type mismatch, an immutable payload, or a cell
    /// that was already consumed.
    pub(crate) fn take_mutable<T: Message>(&self) -> Option<Box<T>> {
        match &self.inner.cell {
            PayloadCell::Mutable(cell) => {
                let payload = cell.lock().take()?;
                match payload.downcast::<T>() {
                    Ok(boxed) => Some(boxed),
                    Err(payload) => {
                        // Type mismatch: put the owner back untouched.
                        *cell.lock() = Some(payload);
                        None
                    }
                }
            }
            PayloadCell::Immutable(_) => None,
        }
    }
}

impl fmt::Debug for MessageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageRef")
            .field("message_type", &self.inner.message_type)
            .field("mutable", &self.is_mutable())
            .field("signal", &self.inner.signal)
            .finish()
    }
}

/// Unique view of a mutable message inside a handler.
///
/// Dereferences to the payload; `take` recovers the owning box so the message
/// can be re-sent by move with its heap address intact.
pub struct MutMhood<T: Message> {
    msg: Box<T>,
}

impl<T: Message> MutMhood<T> {
    pub(crate) fn new(msg: Box<T>) -> Self {
        Self { msg }
    }

    /// Consume the view and recover the owning box.
    pub fn take(self) -> Box<T> {
        self.msg
    }

    /// Consume the view and recover the payload by value.
    pub fn into_inner(self) -> T {
        *self.msg
    }
}

impl<T: Message> Deref for MutMhood<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.msg
    }
}

impl<T: Message> DerefMut for MutMhood<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.msg
    }
}

impl<T: Message> fmt::Debug for MutMhood<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MutMhood").field(&*self.msg).finish()
    }
}
