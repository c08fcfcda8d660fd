// Layer 1: Standard library imports
// (none)

// Layer 2: Third-party crate imports
use serde::Serialize;

// Layer 3: Internal module imports
use crate::message::Message;

/// One sampled counter value, published on the stats mailbox.
#[derive(Debug, Clone, Serialize)]
pub struct Quantity {
    /// Data-source prefix identifying the sampled subsystem
    /// (e.g. `coop_repository`, `disp/workers`).
    pub prefix: String,
    /// Data-source suffix identifying the metric (e.g. `/agent.count`).
    pub suffix: &'static str,
    /// The sampled value.
    pub value: usize,
}

impl Message for Quantity {
    const MESSAGE_TYPE: &'static str = "stats_quantity";
}

impl Quantity {
    /// Full data-source name, `prefix` + `suffix`.
    pub fn full_name(&self) -> String {
        format!("{}{}", self.prefix, self.suffix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_name() {
        let quantity = Quantity {
            prefix: "timer_thread".to_string(),
            suffix: "/single_shot.count",
            value: 3,
        };
        assert_eq!(quantity.full_name(), "timer_thread/single_shot.count");
    }
}
