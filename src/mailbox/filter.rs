//! Delivery filters.
//!
//! A delivery filter is a pure predicate over the payload, attached per
//! `(mailbox, message type, subscriber)` and owned by the subscriber. Filters
//! are consulted before rate limiting and may exist without any subscription;
//! removing the last filter for a type does not remove the type from the
//! mailbox.

// Layer 1: Standard library imports
use std::any::TypeId;
use std::fmt;

// Layer 2: Third-party crate imports
// (none for this module)

// Layer 3: Internal module imports
use crate::message::{Message, MessageRef};

/// A type-erased keep/drop predicate.
pub struct DeliveryFilter {
    expected: TypeId,
    predicate: Box<dyn Fn(&MessageRef) -> bool + Send + Sync>,
}

impl DeliveryFilter {
    /// Build a filter from a typed predicate.
    pub fn new<T, F>(predicate: F) -> Self
    where
        T: Message,
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        Self {
            expected: TypeId::of::<T>(),
            predicate: Box::new(move |message| {
                // A payload of another type never reaches this filter; if it
                // somehow does, let it through rather than lose it silently.
                message.downcast_ref::<T>().map_or(true, &predicate)
            }),
        }
    }

    /// Apply the predicate; `false` means drop without invoking the handler.
    pub fn check(&self, message: &MessageRef) -> bool {
        (self.predicate)(message)
    }

    pub(crate) fn expected_type(&self) -> TypeId {
        self.expected
    }
}

impl fmt::Debug for DeliveryFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliveryFilter")
            .field("expected", &self.expected)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Keyed {
        key: u32,
    }

    impl Message for Keyed {
        const MESSAGE_TYPE: &'static str = "keyed";
    }

    #[derive(Debug)]
    struct Other;

    impl Message for Other {
        const MESSAGE_TYPE: &'static str = "other";
    }

    #[test]
    fn test_filter_keeps_and_drops() {
        let filter = DeliveryFilter::new::<Keyed, _>(|m| m.key == 1);

        assert!(filter.check(&MessageRef::immutable(Keyed { key: 1 })));
        assert!(!filter.check(&MessageRef::immutable(Keyed { key: 2 })));
    }

    #[test]
    fn test_foreign_type_passes() {
        let filter = DeliveryFilter::new::<Keyed, _>(|_| false);
        assert!(filter.check(&MessageRef::immutable(Other)));
    }

    #[test]
    fn test_expected_type() {
        let filter = DeliveryFilter::new::<Keyed, _>(|_| true);
        assert_eq!(filter.expected_type(), TypeId::of::<Keyed>());
    }
}
