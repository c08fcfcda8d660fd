//! Dispatcher variants: thread-safety exploitation, priority scheduling,
//! and named-dispatcher resolution.

#![allow(clippy::unwrap_used)]
#![allow(clippy::panic)]

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use troupe::dispatcher::adv_thread_pool::{self, AdvBindParams, AdvThreadPoolParams};
use troupe::dispatcher::prio::quoted_round_robin;
use troupe::dispatcher::prio::strictly_ordered;
use troupe::dispatcher::prio::PrioQuotes;
use troupe::dispatcher::thread_pool::{self, BindParams, FifoKind, ThreadPoolParams};
use troupe::dispatcher::{one_thread, ActivityTracking, DispatcherKind};
use troupe::prelude::*;

#[derive(Debug)]
struct SafeJob;

impl Message for SafeJob {
    const MESSAGE_TYPE: &'static str = "safe_job";
}

#[derive(Debug)]
struct ExclusiveJob;

impl Message for ExclusiveJob {
    const MESSAGE_TYPE: &'static str = "exclusive_job";
}

struct Probe {
    active_safe: Arc<AtomicI64>,
    max_safe: Arc<AtomicI64>,
    conflict: Arc<AtomicBool>,
    done: Arc<AtomicU64>,
}

impl Agent for Probe {
    fn so_define_agent(&mut self, ctx: &mut AgentContext<Self>) -> Result<()> {
        ctx.subscribe_self()
            .thread_safe_event(|a: &Self, _ctx, _msg: &SafeJob| {
                let now = a.active_safe.fetch_add(1, Ordering::SeqCst) + 1;
                a.max_safe.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(60));
                a.active_safe.fetch_sub(1, Ordering::SeqCst);
                a.done.fetch_add(1, Ordering::SeqCst);
            })?
            .event(|a: &mut Self, _ctx, _msg: &ExclusiveJob| {
                if a.active_safe.load(Ordering::SeqCst) != 0 {
                    a.conflict.store(true, Ordering::SeqCst);
                }
                std::thread::sleep(Duration::from_millis(30));
                a.done.fetch_add(1, Ordering::SeqCst);
            })?;
        Ok(())
    }
}

#[test]
fn adv_pool_runs_safe_handlers_concurrently_but_exclusive_alone() -> Result<()> {
    let wrapped = WrappedEnv::new()?;
    let env = wrapped.environment();

    let pool = adv_thread_pool::make_dispatcher(
        env,
        "probe-pool",
        AdvThreadPoolParams::new().thread_count(4),
    )?;

    let active_safe = Arc::new(AtomicI64::new(0));
    let max_safe = Arc::new(AtomicI64::new(0));
    let conflict = Arc::new(AtomicBool::new(false));
    let done = Arc::new(AtomicU64::new(0));

    let mut agent_ref = None;
    env.introduce_coop_with_binder(pool.binder(AdvBindParams::new()), |coop| {
        agent_ref = Some(coop.add_agent(Probe {
            active_safe: Arc::clone(&active_safe),
            max_safe: Arc::clone(&max_safe),
            conflict: Arc::clone(&conflict),
            done: Arc::clone(&done),
        })?);
        Ok(())
    })?;
    let mbox = agent_ref.unwrap().direct_mbox();

    for _ in 0..4 {
        send(&mbox, SafeJob)?;
    }
    send(&mbox, ExclusiveJob)?;
    for _ in 0..4 {
        send(&mbox, SafeJob)?;
    }

    let deadline = Instant::now() + Duration::from_secs(10);
    while done.load(Ordering::SeqCst) < 9 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(done.load(Ordering::SeqCst), 9);
    assert!(
        max_safe.load(Ordering::SeqCst) >= 2,
        "thread-safe handlers must overlap"
    );
    assert!(
        !conflict.load(Ordering::SeqCst),
        "exclusive handler must never overlap a thread-safe one"
    );

    wrapped.stop_then_join();
    Ok(())
}

#[derive(Debug)]
struct Job;

impl Message for Job {
    const MESSAGE_TYPE: &'static str = "job";
}

#[derive(Debug)]
struct Blocker;

impl Message for Blocker {
    const MESSAGE_TYPE: &'static str = "blocker";
}

struct LoggingWorker {
    tag: &'static str,
    log: Arc<Mutex<String>>,
}

impl Agent for LoggingWorker {
    fn so_define_agent(&mut self, ctx: &mut AgentContext<Self>) -> Result<()> {
        ctx.subscribe_self()
            .event(|a: &mut Self, _ctx, _msg: &Job| {
                a.log.lock().push_str(a.tag);
            })?
            .event(|_a: &mut Self, _ctx, _msg: &Blocker| {
                std::thread::sleep(Duration::from_millis(250));
            })?;
        Ok(())
    }
}

#[test]
fn quoted_round_robin_respects_quotes() -> Result<()> {
    let wrapped = WrappedEnv::new()?;
    let env = wrapped.environment();

    let quotes = PrioQuotes::new(1)?.quote(Priority::P7, 2)?;
    let dispatcher = quoted_round_robin::make_dispatcher(
        env,
        "quoted",
        quotes,
        ActivityTracking::Unspecified,
    )?;

    let log = Arc::new(Mutex::new(String::new()));
    let mut high_ref = None;
    let mut low_ref = None;
    let mut blocker_ref = None;
    env.introduce_coop_with_binder(dispatcher.binder(), |coop| {
        blocker_ref = Some(coop.add_agent_with_opts(
            LoggingWorker {
                tag: "x",
                log: Arc::clone(&log),
            },
            AgentOptions::new().priority(Priority::P0),
        )?);
        high_ref = Some(coop.add_agent_with_opts(
            LoggingWorker {
                tag: "H",
                log: Arc::clone(&log),
            },
            AgentOptions::new().priority(Priority::P7),
        )?);
        low_ref = Some(coop.add_agent_with_opts(
            LoggingWorker {
                tag: "L",
                log: Arc::clone(&log),
            },
            AgentOptions::new().priority(Priority::P1),
        )?);
        Ok(())
    })?;

    // Stall the single worker, then enqueue while it sleeps.
    send(&blocker_ref.unwrap().direct_mbox(), Blocker)?;
    std::thread::sleep(Duration::from_millis(50));
    let high = high_ref.unwrap().direct_mbox();
    let low = low_ref.unwrap().direct_mbox();
    for _ in 0..6 {
        send(&high, Job)?;
    }
    for _ in 0..6 {
        send(&low, Job)?;
    }

    std::thread::sleep(Duration::from_millis(700));
    // Two high-priority demands per rotation, one low-priority.
    assert_eq!(log.lock().as_str(), "HHLHHLHHLLLL");

    wrapped.stop_then_join();
    Ok(())
}

#[test]
fn strictly_ordered_drains_highest_priority_first() -> Result<()> {
    let wrapped = WrappedEnv::new()?;
    let env = wrapped.environment();

    let dispatcher =
        strictly_ordered::make_dispatcher(env, "strict", ActivityTracking::Unspecified)?;

    let log = Arc::new(Mutex::new(String::new()));
    let mut high_ref = None;
    let mut low_ref = None;
    let mut blocker_ref = None;
    env.introduce_coop_with_binder(dispatcher.binder(), |coop| {
        blocker_ref = Some(coop.add_agent_with_opts(
            LoggingWorker {
                tag: "x",
                log: Arc::clone(&log),
            },
            AgentOptions::new().priority(Priority::P0),
        )?);
        high_ref = Some(coop.add_agent_with_opts(
            LoggingWorker {
                tag: "H",
                log: Arc::clone(&log),
            },
            AgentOptions::new().priority(Priority::P6),
        )?);
        low_ref = Some(coop.add_agent_with_opts(
            LoggingWorker {
                tag: "L",
                log: Arc::clone(&log),
            },
            AgentOptions::new().priority(Priority::P2),
        )?);
        Ok(())
    })?;

    send(&blocker_ref.unwrap().direct_mbox(), Blocker)?;
    std::thread::sleep(Duration::from_millis(50));
    let high = high_ref.unwrap().direct_mbox();
    let low = low_ref.unwrap().direct_mbox();
    for _ in 0..3 {
        send(&low, Job)?;
        send(&high, Job)?;
    }

    std::thread::sleep(Duration::from_millis(600));
    assert_eq!(log.lock().as_str(), "HHHLLL");

    wrapped.stop_then_join();
    Ok(())
}

#[test]
fn thread_pool_individual_fifo_preserves_per_agent_order() -> Result<()> {
    let wrapped = WrappedEnv::new()?;
    let env = wrapped.environment();

    let pool = thread_pool::make_dispatcher(
        env,
        "ordered-pool",
        ThreadPoolParams::new().thread_count(4),
    )?;

    let order = Arc::new(Mutex::new(Vec::new()));

    struct Sequencer {
        order: Arc<Mutex<Vec<u64>>>,
    }

    #[derive(Debug)]
    struct Seq(u64);

    impl Message for Seq {
        const MESSAGE_TYPE: &'static str = "seq";
    }

    impl Agent for Sequencer {
        fn so_define_agent(&mut self, ctx: &mut AgentContext<Self>) -> Result<()> {
            ctx.subscribe_self()
                .event(|a: &mut Self, _ctx, msg: &Seq| {
                    a.order.lock().push(msg.0);
                })?;
            Ok(())
        }
    }

    let binder = pool.binder(BindParams::new().fifo(FifoKind::Individual).max_demands_at_once(2));
    let mut agent_ref = None;
    env.introduce_coop_with_binder(binder, |coop| {
        agent_ref = Some(coop.add_agent(Sequencer {
            order: Arc::clone(&order),
        })?);
        Ok(())
    })?;
    let mbox = agent_ref.unwrap().direct_mbox();

    for value in 0..500 {
        send(&mbox, Seq(value))?;
    }

    let deadline = Instant::now() + Duration::from_secs(10);
    while order.lock().len() < 500 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    let observed = order.lock().clone();
    assert_eq!(observed.len(), 500);
    assert!(observed.windows(2).all(|pair| pair[0] < pair[1]));

    wrapped.stop_then_join();
    Ok(())
}

#[test]
fn named_dispatcher_resolution_and_errors() -> Result<()> {
    let wrapped = WrappedEnv::new()?;
    let env = wrapped.environment();

    let _keep_alive = one_thread::make_dispatcher(
        env,
        "workers",
        one_thread::OneThreadParams::new(),
    )?;

    assert!(env
        .named_dispatcher_binder("workers", DispatcherKind::OneThread)
        .is_ok());
    assert_eq!(
        env.named_dispatcher_binder("workers", DispatcherKind::ThreadPool)
            .err(),
        Some(Error::DispatcherTypeMismatch {
            name: "workers".to_string()
        })
    );
    assert_eq!(
        env.named_dispatcher_binder("absent", DispatcherKind::OneThread)
            .err(),
        Some(Error::NamedDispatcherNotFound {
            name: "absent".to_string()
        })
    );
    assert_eq!(
        env.named_dispatcher_binder("", DispatcherKind::OneThread).err(),
        Some(Error::EmptyName)
    );

    let quotes = PrioQuotes::new(0);
    assert_eq!(
        quotes.err(),
        Some(Error::PriorityQuoteIllegalValue {
            priority: Priority::P0
        })
    );

    wrapped.stop_then_join();
    Ok(())
}
