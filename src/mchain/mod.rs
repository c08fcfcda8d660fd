//! Message chains: bounded, typed, closable queues usable from non-agent
//! threads.
//!
//! A chain is mailbox-like on the producer side (it can be a `send`
//! destination) and a blocking consumer endpoint on the other:
//! [`receive`](crate::mchain::receive()) pops and dispatches items,
//! [`select`] races several chains, supporting both receive- and
//! send-cases.

pub mod chain;
pub mod receive;
pub mod select;

pub use chain::{
    close_drop_content, close_retain_content, ChainCapacity, ChainCloseMode, ChainOverflowReaction,
    ChainParams, ChainRef, ChainSendResult, MemoryUsage,
};
pub use receive::{
    from, handler, handler_mutable, prepare_receive, receive, ChainHandler, PreparedReceive,
    ReceiveParams, ReceiveResult, ReceiveStatus,
};
pub use select::{
    from_all, prepare_select, receive_case, select, send_case, PreparedSelect, SelectCase,
    SelectParams, SelectResult, SelectStatus,
};
