//! `nef_one_thread` dispatcher.
//!
//! Same scheduling as `one_thread` but with a spin-first queue lock policy,
//! intended for agents that never block inside handlers ("never-ending
//! flow" workloads).

// Layer 1: Standard library imports
// (none)

// Layer 2: Third-party crate imports
// (none)

// Layer 3: Internal module imports
use crate::environment::Environment;
use crate::error::Result;

use super::one_thread::{make_impl, OneThreadDispatcher, OneThreadParams};
use super::queue::QueueLockPolicy;
use super::DispatcherKind;

/// Create a `nef_one_thread` dispatcher.
pub fn make_dispatcher(
    env: &Environment,
    name: &str,
    params: OneThreadParams,
) -> Result<OneThreadDispatcher> {
    make_impl(
        env,
        name,
        DispatcherKind::NefOneThread,
        QueueLockPolicy::Spin,
        params.activity_tracking,
        true,
    )
}
