//! Cooperation lifecycle: start/finish ordering, notificators, parent/child
//! trees, dead-letter handling after child deregistration, and stop guards.

#![allow(clippy::unwrap_used)]
#![allow(clippy::panic)]

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use troupe::environment::StopGuard;
use troupe::prelude::*;

#[derive(Debug)]
struct Data {
    key: u32,
}

impl Message for Data {
    const MESSAGE_TYPE: &'static str = "data";
}

#[derive(Debug, Default)]
struct InstallDeadLetter;

impl Message for InstallDeadLetter {
    const MESSAGE_TYPE: &'static str = "install_dead_letter";
}
impl Signal for InstallDeadLetter {}

struct Child {
    board: MboxRef,
    received: Arc<Mutex<Vec<u32>>>,
}

impl Agent for Child {
    fn so_define_agent(&mut self, ctx: &mut AgentContext<Self>) -> Result<()> {
        ctx.set_delivery_filter(&self.board, |m: &Data| m.key == 1)?;
        ctx.subscription(&self.board)
            .event(|a: &mut Self, _ctx, msg: &Data| {
                a.received.lock().push(msg.key);
            })?;
        Ok(())
    }
}

struct Parent {
    board: MboxRef,
    dead_letters: Arc<Mutex<Vec<u32>>>,
}

impl Agent for Parent {
    fn so_define_agent(&mut self, ctx: &mut AgentContext<Self>) -> Result<()> {
        ctx.subscribe_self()
            .event(|a: &mut Self, ctx, _msg: &InstallDeadLetter| {
                let board = Arc::clone(&a.board);
                let dead_letters = Arc::clone(&a.dead_letters);
                let _ = ctx.deadletter_handler(&board, move |_a: &mut Self, _ctx, msg: &Data| {
                    dead_letters.lock().push(msg.key);
                });
            })?;
        Ok(())
    }
}

#[test]
fn filtered_child_then_dead_letter_parent() -> Result<()> {
    let wrapped = WrappedEnv::new()?;
    let env = wrapped.environment();

    let board = env.create_mbox();
    let child_received = Arc::new(Mutex::new(Vec::new()));
    let dead_letters = Arc::new(Mutex::new(Vec::new()));

    let mut parent_ref = None;
    let parent_coop = env.introduce_coop(|coop| {
        parent_ref = Some(coop.add_agent(Parent {
            board: Arc::clone(&board),
            dead_letters: Arc::clone(&dead_letters),
        })?);
        Ok(())
    })?;
    let parent_ref = parent_ref.unwrap();

    let child_coop = env.introduce_child_coop(&parent_coop, |coop| {
        coop.add_agent(Child {
            board: Arc::clone(&board),
            received: Arc::clone(&child_received),
        })?;
        Ok(())
    })?;

    // Before deregistration: the child's filter admits only key == 1.
    for key in [0, 1, 2] {
        send(&board, Data { key })?;
    }
    std::thread::sleep(Duration::from_millis(200));
    assert_eq!(*child_received.lock(), vec![1]);
    assert!(dead_letters.lock().is_empty());

    env.deregister_coop(&child_coop, DeregReason::Normal);
    let deadline = Instant::now() + Duration::from_secs(5);
    while child_coop.is_alive() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    assert!(!child_coop.is_alive());

    // After deregistration: the parent's dead-letter handler sees all keys.
    send_signal::<InstallDeadLetter>(&parent_ref.direct_mbox())?;
    std::thread::sleep(Duration::from_millis(100));
    for key in [0, 1, 2] {
        send(&board, Data { key })?;
    }
    std::thread::sleep(Duration::from_millis(200));
    assert_eq!(*child_received.lock(), vec![1]);
    assert_eq!(*dead_letters.lock(), vec![0, 1, 2]);

    wrapped.stop_then_join();
    Ok(())
}

struct Tracker {
    tag: &'static str,
    log: Arc<Mutex<Vec<String>>>,
}

impl Agent for Tracker {
    fn so_evt_start(&mut self, _ctx: &mut AgentContext<Self>) {
        self.log.lock().push(format!("start:{}", self.tag));
    }

    fn so_evt_finish(&mut self, _ctx: &mut AgentContext<Self>) {
        self.log.lock().push(format!("finish:{}", self.tag));
    }
}

#[test]
fn lifecycle_order_start_before_finish_before_dereg_notificator() -> Result<()> {
    let wrapped = WrappedEnv::new()?;
    let env = wrapped.environment();

    let log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

    let handle = {
        let log = Arc::clone(&log);
        let reg_log = Arc::clone(&log);
        let dereg_log = Arc::clone(&log);
        env.introduce_coop(move |coop| {
            coop.add_agent(Tracker {
                tag: "a",
                log: Arc::clone(&log),
            })?;
            coop.add_agent(Tracker {
                tag: "b",
                log: Arc::clone(&log),
            })?;
            coop.add_reg_notificator(move |_env, _id| {
                reg_log.lock().push("reg".to_string());
            });
            coop.add_dereg_notificator(move |_env, _id, _reason| {
                dereg_log.lock().push("dereg".to_string());
            });
            Ok(())
        })?
    };

    std::thread::sleep(Duration::from_millis(150));
    env.deregister_coop(&handle, DeregReason::Normal);

    let deadline = Instant::now() + Duration::from_secs(5);
    while handle.is_alive() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }

    let observed = log.lock().clone();
    let position = |needle: &str| {
        observed
            .iter()
            .position(|entry| entry == needle)
            .unwrap_or_else(|| panic!("{needle} missing from {observed:?}"))
    };

    // Reg notificator runs before any start; every start precedes every
    // finish; the dereg notificator is last.
    assert_eq!(position("reg"), 0);
    assert!(position("start:a") < position("finish:a"));
    assert!(position("start:b") < position("finish:b"));
    assert!(position("start:a") < position("finish:b"));
    assert!(position("start:b") < position("finish:a"));
    assert_eq!(observed.last().map(String::as_str), Some("dereg"));

    wrapped.stop_then_join();
    Ok(())
}

#[test]
fn usage_pins_delay_final_destruction() -> Result<()> {
    let wrapped = WrappedEnv::new()?;
    let env = wrapped.environment();

    let handle = env.introduce_coop(|coop| {
        coop.add_agent(Tracker {
            tag: "pinned",
            log: Arc::new(Mutex::new(Vec::new())),
        })?;
        Ok(())
    })?;

    handle.increment_usage_count();
    env.deregister_coop(&handle, DeregReason::Normal);

    std::thread::sleep(Duration::from_millis(300));
    assert!(handle.is_alive(), "async pin must delay destruction");

    handle.decrement_usage_count();
    let deadline = Instant::now() + Duration::from_secs(5);
    while handle.is_alive() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    assert!(!handle.is_alive());

    wrapped.stop_then_join();
    Ok(())
}

struct ReleasingGuard {
    signalled: AtomicBool,
}

impl StopGuard for ReleasingGuard {
    fn stop(&self) {
        self.signalled.store(true, Ordering::SeqCst);
    }
}

struct Counter {
    seen: Arc<AtomicU64>,
}

impl Agent for Counter {
    fn so_define_agent(&mut self, ctx: &mut AgentContext<Self>) -> Result<()> {
        ctx.subscribe_self()
            .event(|a: &mut Self, _ctx, _msg: &Data| {
                a.seen.fetch_add(1, Ordering::SeqCst);
            })?;
        Ok(())
    }
}

#[test]
fn stop_waits_for_guards() -> Result<()> {
    let wrapped = WrappedEnv::new()?;
    let env = wrapped.environment();

    let seen = Arc::new(AtomicU64::new(0));
    let mut agent_ref = None;
    let coop = env.introduce_coop(|coop| {
        agent_ref = Some(coop.add_agent(Counter {
            seen: Arc::clone(&seen),
        })?);
        Ok(())
    })?;
    let mbox = agent_ref.unwrap().direct_mbox();

    let guard: Arc<ReleasingGuard> = Arc::new(ReleasingGuard {
        signalled: AtomicBool::new(false),
    });
    let guard_ref: Arc<dyn StopGuard> = guard.clone();
    env.setup_stop_guard(Arc::clone(&guard_ref))?;

    env.stop();
    assert!(guard.signalled.load(Ordering::SeqCst));

    // The guard is still live: shutdown has not begun, agents still work.
    std::thread::sleep(Duration::from_millis(150));
    assert!(coop.is_alive());
    send(&mbox, Data { key: 9 })?;
    let deadline = Instant::now() + Duration::from_secs(2);
    while seen.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(seen.load(Ordering::SeqCst), 1);

    // New registrations are already rejected, and late guards fail.
    let rejected = env.introduce_coop(|coop| {
        coop.add_agent(Counter {
            seen: Arc::new(AtomicU64::new(0)),
        })?;
        Ok(())
    });
    assert_eq!(rejected.err(), Some(Error::DispatcherCreationFailed));

    let late: Arc<dyn StopGuard> = Arc::new(ReleasingGuard {
        signalled: AtomicBool::new(false),
    });
    assert_eq!(
        env.setup_stop_guard(Arc::clone(&late)).err(),
        Some(Error::CannotSetStopGuardWhenStopIsStarted)
    );
    assert_eq!(
        env.setup_stop_guard_unless_stopping(late),
        troupe::environment::StopGuardSetupOutcome::StopAlreadyInProgress
    );

    // Removing the last guard lets the shutdown complete.
    env.remove_stop_guard(&guard_ref);
    let deadline = Instant::now() + Duration::from_secs(5);
    while coop.is_alive() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    assert!(!coop.is_alive());

    wrapped.stop_then_join();
    Ok(())
}
