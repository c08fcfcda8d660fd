//! The scenario DSL of the testing harness.

#![allow(clippy::unwrap_used)]
#![allow(clippy::panic)]

use std::time::Duration;

use troupe::prelude::*;
use troupe::testing::{ignores, reacts_to, ScenarioResult, TestingEnv};

#[derive(Debug)]
struct Hello;

impl Message for Hello {
    const MESSAGE_TYPE: &'static str = "hello";
}

#[derive(Debug)]
struct Unknown;

impl Message for Unknown {
    const MESSAGE_TYPE: &'static str = "unknown";
}

struct Greeter {
    busy: State,
}

impl Agent for Greeter {
    fn so_define_agent(&mut self, ctx: &mut AgentContext<Self>) -> Result<()> {
        ctx.subscribe_self()
            .event(|a: &mut Self, ctx, _msg: &Hello| {
                let target = a.busy.clone();
                let _ = ctx.change_state(&target);
            })?;
        Ok(())
    }
}

#[test]
fn scenario_completes_on_reaction_and_records_state() -> Result<()> {
    let testing = TestingEnv::new()?;
    let env = testing.environment();

    let mut greeter_ref = None;
    env.introduce_coop(|coop| {
        greeter_ref = Some(coop.add_agent(Greeter {
            busy: State::new("busy"),
        })?);
        Ok(())
    })?;
    let greeter_ref = greeter_ref.unwrap();
    let mbox = greeter_ref.direct_mbox();

    let scenario = testing.scenario().clone();
    {
        let mbox = std::sync::Arc::clone(&mbox);
        scenario
            .define_step("greeted")
            .impact(move || {
                let _ = send(&mbox, Hello);
            })
            .when(reacts_to::<Hello>(&greeter_ref))
            .store_state_name(&greeter_ref, "after_greeting");
    }

    let result = scenario.run_for(Duration::from_secs(5));
    assert_eq!(result, ScenarioResult::Completed);
    assert_eq!(
        scenario.stored_state_name("after_greeting").as_deref(),
        Some("busy")
    );

    testing.stop_then_join();
    Ok(())
}

#[test]
fn scenario_observes_ignored_messages_and_diagnoses_incomplete_runs() -> Result<()> {
    let testing = TestingEnv::new()?;
    let env = testing.environment();

    let mut greeter_ref = None;
    env.introduce_coop(|coop| {
        greeter_ref = Some(coop.add_agent(Greeter {
            busy: State::new("busy"),
        })?);
        Ok(())
    })?;
    let greeter_ref = greeter_ref.unwrap();
    let mbox = greeter_ref.direct_mbox();

    let scenario = testing.scenario().clone();
    {
        let mbox = std::sync::Arc::clone(&mbox);
        scenario
            .define_step("ignored")
            .impact(move || {
                let _ = send(&mbox, Unknown);
            })
            .when(ignores::<Unknown>(&greeter_ref));
    }
    scenario
        .define_step("never_happens")
        .when(reacts_to::<Hello>(&greeter_ref));

    let result = scenario.run_for(Duration::from_millis(400));
    assert_eq!(
        result,
        ScenarioResult::NotCompleted(vec!["never_happens".to_string()])
    );

    testing.stop_then_join();
    Ok(())
}
