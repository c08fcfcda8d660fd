//! Hierarchical states: a blinking led driven by time-limited substates,
//! history restoration, and guarded switching.

#![allow(clippy::unwrap_used)]
#![allow(clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use troupe::agent::state::MAX_STATE_NESTING;
use troupe::prelude::*;

#[derive(Debug, Default)]
struct Toggle;

impl Message for Toggle {
    const MESSAGE_TYPE: &'static str = "toggle";
}
impl Signal for Toggle {}

struct Led {
    off: State,
    blinking: State,
    blink_on: State,
}

impl Led {
    fn new(log: Arc<Mutex<Vec<&'static str>>>) -> Result<Self> {
        let off = State::new("off");
        let blinking = State::new("blinking");
        let blink_on = blinking.substate("blink_on")?;
        let blink_off = blinking.substate("blink_off")?;

        {
            let log = Arc::clone(&log);
            blink_on.on_enter(move || log.lock().push("ON"));
        }
        {
            let log = Arc::clone(&log);
            blink_off.on_enter(move || log.lock().push("off"));
        }
        blink_on.time_limit(Duration::from_millis(150), &blink_off);
        blink_off.time_limit(Duration::from_millis(100), &blink_on);

        Ok(Self {
            off,
            blinking,
            blink_on,
        })
    }
}

impl Agent for Led {
    fn so_define_agent(&mut self, ctx: &mut AgentContext<Self>) -> Result<()> {
        ctx.subscribe_self()
            .in_state(&self.off)
            .event(|a: &mut Self, ctx, _msg: &Toggle| {
                let target = a.blink_on.clone();
                let _ = ctx.change_state(&target);
            })?;
        ctx.subscribe_self()
            .in_state(&self.blinking)
            .event(|a: &mut Self, ctx, _msg: &Toggle| {
                let target = a.off.clone();
                let _ = ctx.change_state(&target);
            })?;
        Ok(())
    }

    fn so_evt_start(&mut self, ctx: &mut AgentContext<Self>) {
        let _ = ctx.change_state(&self.off);
    }
}

#[test]
fn blinking_led_cycles_and_goes_silent() -> Result<()> {
    let wrapped = WrappedEnv::new()?;
    let env = wrapped.environment();

    let log = Arc::new(Mutex::new(Vec::new()));
    let led = {
        let log = Arc::clone(&log);
        Led::new(log)?
    };

    let mut led_ref = None;
    env.introduce_coop(|coop| {
        led_ref = Some(coop.add_agent(led)?);
        Ok(())
    })?;
    let led_ref = led_ref.unwrap();

    // Silent while off.
    std::thread::sleep(Duration::from_millis(120));
    assert!(log.lock().is_empty());

    // Toggle into blinking: ON / off alternation driven by time limits.
    send_signal::<Toggle>(&led_ref.direct_mbox())?;
    std::thread::sleep(Duration::from_millis(800));

    // Toggle back off, let any in-flight switch settle, snapshot.
    send_signal::<Toggle>(&led_ref.direct_mbox())?;
    std::thread::sleep(Duration::from_millis(100));
    let observed: Vec<&'static str> = log.lock().clone();

    assert!(observed.len() >= 4, "expected several blinks: {observed:?}");
    assert_eq!(observed[0], "ON");
    for pair in observed.windows(2) {
        assert_ne!(pair[0], pair[1], "entries must alternate: {observed:?}");
    }
    assert_eq!(led_ref.current_state_name().as_deref(), Some("off"));

    // Silence after the second toggle.
    let frozen = log.lock().len();
    std::thread::sleep(Duration::from_millis(400));
    assert_eq!(log.lock().len(), frozen);

    wrapped.stop_then_join();
    Ok(())
}

struct HistoryKeeper {
    work: State,
    stage_two: State,
    paused: State,
}

impl HistoryKeeper {
    fn new() -> Result<Self> {
        let work = State::with_history("work", History::Shallow);
        let _stage_one = work.substate("stage_one")?;
        let stage_two = work.substate("stage_two")?;
        let paused = State::new("paused");
        Ok(Self {
            work,
            stage_two,
            paused,
        })
    }
}

#[derive(Debug, Default)]
struct GoDeep;

impl Message for GoDeep {
    const MESSAGE_TYPE: &'static str = "go_deep";
}
impl Signal for GoDeep {}

#[derive(Debug, Default)]
struct Pause;

impl Message for Pause {
    const MESSAGE_TYPE: &'static str = "pause";
}
impl Signal for Pause {}

#[derive(Debug, Default)]
struct Resume;

impl Message for Resume {
    const MESSAGE_TYPE: &'static str = "resume";
}
impl Signal for Resume {}

impl Agent for HistoryKeeper {
    fn so_define_agent(&mut self, ctx: &mut AgentContext<Self>) -> Result<()> {
        ctx.subscribe_self()
            .event(|a: &mut Self, ctx, _msg: &GoDeep| {
                let target = a.stage_two.clone();
                let _ = ctx.change_state(&target);
            })?
            .event(|a: &mut Self, ctx, _msg: &Pause| {
                let target = a.paused.clone();
                let _ = ctx.change_state(&target);
            })?
            .event(|a: &mut Self, ctx, _msg: &Resume| {
                // History brings the agent back to the remembered substate.
                let target = a.work.clone();
                let _ = ctx.change_state(&target);
            })?;
        Ok(())
    }
}

#[test]
fn shallow_history_restores_last_substate() -> Result<()> {
    let wrapped = WrappedEnv::new()?;
    let env = wrapped.environment();

    let mut agent_ref = None;
    env.introduce_coop(|coop| {
        agent_ref = Some(coop.add_agent(HistoryKeeper::new()?)?);
        Ok(())
    })?;
    let agent_ref = agent_ref.unwrap();
    let mbox = agent_ref.direct_mbox();

    let settle = || std::thread::sleep(Duration::from_millis(100));

    send_signal::<GoDeep>(&mbox)?;
    settle();
    assert_eq!(
        agent_ref.current_state_name().as_deref(),
        Some("work.stage_two")
    );

    send_signal::<Pause>(&mbox)?;
    settle();
    assert_eq!(agent_ref.current_state_name().as_deref(), Some("paused"));

    send_signal::<Resume>(&mbox)?;
    settle();
    assert_eq!(
        agent_ref.current_state_name().as_deref(),
        Some("work.stage_two")
    );

    wrapped.stop_then_join();
    Ok(())
}

#[test]
fn state_nesting_bound_is_enforced() {
    let mut state = State::new("root");
    for level in 1..MAX_STATE_NESTING {
        state = state.substate(format!("level{level}")).unwrap();
    }
    assert_eq!(
        state.substate("overflow").err(),
        Some(Error::StateNestingTooDeep {
            max: MAX_STATE_NESTING
        })
    );
}

#[derive(Debug, Default)]
struct Arm;

impl Message for Arm {
    const MESSAGE_TYPE: &'static str = "arm";
}
impl Signal for Arm {}

struct TimeLimited {
    waiting: State,
    expired: State,
}

impl Agent for TimeLimited {
    fn so_define_agent(&mut self, ctx: &mut AgentContext<Self>) -> Result<()> {
        ctx.subscribe_self()
            .event(|a: &mut Self, ctx, _msg: &Arm| {
                let target = a.waiting.clone();
                let _ = ctx.change_state(&target);
            })?
            .event(|a: &mut Self, ctx, _msg: &Pause| {
                // Leaving the state cancels the pending time-limit switch.
                let target = a.expired.clone();
                a.waiting.drop_time_limit();
                let _ = ctx.change_state(&target);
                let back = a.waiting.clone();
                let _ = ctx.change_state(&back);
            })?;
        Ok(())
    }
}

#[test]
fn explicit_switch_cancels_time_limit() -> Result<()> {
    let wrapped = WrappedEnv::new()?;
    let env = wrapped.environment();

    let waiting = State::new("waiting");
    let expired = State::new("expired");
    waiting.time_limit(Duration::from_millis(150), &expired);

    let mut agent_ref = None;
    env.introduce_coop(|coop| {
        agent_ref = Some(coop.add_agent(TimeLimited {
            waiting: waiting.clone(),
            expired: expired.clone(),
        })?);
        Ok(())
    })?;
    let agent_ref = agent_ref.unwrap();
    let mbox = agent_ref.direct_mbox();

    // Armed and left alone: the time limit fires.
    send_signal::<Arm>(&mbox)?;
    std::thread::sleep(Duration::from_millis(300));
    assert_eq!(agent_ref.current_state_name().as_deref(), Some("expired"));

    // Re-armed, then switched out with the limit dropped: no switch fires.
    send_signal::<Pause>(&mbox)?;
    std::thread::sleep(Duration::from_millis(300));
    assert_eq!(agent_ref.current_state_name().as_deref(), Some("waiting"));

    wrapped.stop_then_join();
    Ok(())
}
