//! Run-time statistics: sampling counters distributed as messages.
//!
//! The controller owns a distribution thread. At every tick it publishes
//! [`Quantity`] samples on its mailbox, one per data source, each named by a
//! prefix/suffix pair (`coop_repository` + `/coop.reg.count`, ...). Custom
//! probes implement [`StatsSource`] and stream into the same fan-out.

pub mod controller;
pub mod messages;
pub mod names;

pub use controller::{StatsController, StatsSource};
pub use messages::Quantity;
