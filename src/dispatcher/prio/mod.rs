//! Priority-aware dispatcher variants.
//!
//! All variants keep eight demand FIFOs, one per priority level, and
//! preserve per-agent FIFO while reordering across agents by priority.

pub mod one_per_prio;
pub mod quoted_round_robin;
pub mod strictly_ordered;

// Layer 1: Standard library imports
// (none)

// Layer 2: Third-party crate imports
// (none)

// Layer 3: Internal module imports
use crate::error::{Error, Result};
use crate::util::{Priority, PRIORITIES_COUNT};

/// Per-priority demand quotes for the quoted round-robin variant.
///
/// A quote is how many demands of one priority the worker processes before
/// rotating to the next lower priority. Zero quotes are illegal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrioQuotes {
    quotes: [usize; PRIORITIES_COUNT],
}

impl PrioQuotes {
    /// Give every priority the same `default_quote`.
    pub fn new(default_quote: usize) -> Result<Self> {
        if default_quote == 0 {
            return Err(Error::PriorityQuoteIllegalValue {
                priority: Priority::P0,
            });
        }
        Ok(Self {
            quotes: [default_quote; PRIORITIES_COUNT],
        })
    }

    /// Override the quote of one priority.
    pub fn quote(mut self, priority: Priority, quote: usize) -> Result<Self> {
        if quote == 0 {
            return Err(Error::PriorityQuoteIllegalValue { priority });
        }
        self.quotes[priority.index()] = quote;
        Ok(self)
    }

    pub(crate) fn get(&self, index: usize) -> usize {
        self.quotes[index]
    }
}

#[cfg(test)]
#[allow(clippy::panic)] // Tests are allowed to panic on violated expectations
mod tests {
    use super::*;

    #[test]
    fn test_zero_default_quote_rejected() {
        assert_eq!(
            PrioQuotes::new(0).err(),
            Some(Error::PriorityQuoteIllegalValue {
                priority: Priority::P0
            })
        );
    }

    #[test]
    fn test_zero_override_rejected() {
        let quotes = PrioQuotes::new(10).and_then(|q| q.quote(Priority::P3, 0));
        assert_eq!(
            quotes.err(),
            Some(Error::PriorityQuoteIllegalValue {
                priority: Priority::P3
            })
        );
    }

    #[test]
    fn test_overrides_apply() {
        let quotes = PrioQuotes::new(10).and_then(|q| q.quote(Priority::P7, 3));
        let quotes = match quotes {
            Ok(q) => q,
            Err(e) => panic!("quotes must build: {e}"),
        };
        assert_eq!(quotes.get(Priority::P7.index()), 3);
        assert_eq!(quotes.get(Priority::P0.index()), 10);
    }
}
