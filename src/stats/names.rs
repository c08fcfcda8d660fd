//! Standard data-source prefixes and suffixes.

/// Cooperation/agent repository statistics.
pub const PREFIX_COOP_REPOSITORY: &str = "coop_repository";
/// Mailbox repository statistics.
pub const PREFIX_MBOX_REPOSITORY: &str = "mbox_repository";
/// Timer service statistics.
pub const PREFIX_TIMER_THREAD: &str = "timer_thread";
/// Dispatcher statistics; the dispatcher name is appended.
pub const PREFIX_DISPATCHER: &str = "disp";

/// Count of registered cooperations.
pub const SUFFIX_COOP_REG_COUNT: &str = "/coop.reg.count";
/// Count of cooperations in the deregistration state.
pub const SUFFIX_COOP_DEREG_COUNT: &str = "/coop.dereg.count";
/// Count of live agents.
pub const SUFFIX_AGENT_COUNT: &str = "/agent.count";
/// Count of live named mailboxes.
pub const SUFFIX_NAMED_MBOX_COUNT: &str = "/named_mbox.count";
/// Count of live single-shot timers.
pub const SUFFIX_TIMER_SINGLE_SHOT_COUNT: &str = "/single_shot.count";
/// Count of live periodic timers.
pub const SUFFIX_TIMER_PERIODIC_COUNT: &str = "/periodic.count";
/// Count of pending demands in a dispatcher.
pub const SUFFIX_DEMANDS_COUNT: &str = "/demands.count";
/// Count of work threads of a dispatcher.
pub const SUFFIX_WORK_THREAD_COUNT: &str = "/threads.count";
/// Cumulative working time of a dispatcher's threads, microseconds.
pub const SUFFIX_THREAD_WORKING_MICROS: &str = "/thread.working_us";
/// Cumulative waiting time of a dispatcher's threads, microseconds.
pub const SUFFIX_THREAD_WAITING_MICROS: &str = "/thread.waiting_us";
