//! Message limits: transform-on-overflow and subscription-time checks.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use parking_lot::Mutex;
use troupe::limits::Transformed;
use troupe::prelude::*;

#[derive(Debug)]
struct DataIn {
    text: String,
}

impl Message for DataIn {
    const MESSAGE_TYPE: &'static str = "data_in";
}

#[derive(Debug)]
struct DataOut {
    text: String,
}

impl Message for DataOut {
    const MESSAGE_TYPE: &'static str = "data_out";
}

#[derive(Debug, Default)]
struct Block;

impl Message for Block {
    const MESSAGE_TYPE: &'static str = "block";
}
impl Signal for Block {}

struct Processor {
    trace: Arc<Mutex<String>>,
}

impl Agent for Processor {
    fn so_define_agent(&mut self, ctx: &mut AgentContext<Self>) -> Result<()> {
        ctx.subscribe_self()
            .event(|_a: &mut Self, _ctx, _msg: &Block| {
                // Keeps the queued data_in demand in flight while the
                // second send overflows.
                std::thread::sleep(Duration::from_millis(200));
            })?
            .event_mutable(|a: &mut Self, _ctx, msg: MutMhood<DataIn>| {
                a.trace.lock().push_str(&format!("[initial:{}]", msg.text));
            })?
            .event_mutable(|a: &mut Self, _ctx, msg: MutMhood<DataOut>| {
                a.trace
                    .lock()
                    .push_str(&format!("[transformed:{}]", msg.text));
            })?;
        Ok(())
    }
}

#[test]
fn second_mutable_message_is_transformed() -> Result<()> {
    let wrapped = WrappedEnv::new()?;
    let env = wrapped.environment();

    let trace = Arc::new(Mutex::new(String::new()));
    let self_mbox: Arc<OnceLock<MboxRef>> = Arc::new(OnceLock::new());

    let limits = {
        let self_mbox = Arc::clone(&self_mbox);
        MessageLimits::new()
            .limit_then_transform_mutable::<DataIn, _>(1, move |msg| {
                let dest = self_mbox.get().expect("destination set before sends");
                Transformed::new_mutable(
                    dest,
                    DataOut {
                        text: format!("<{}>", msg.text),
                    },
                )
            })?
            .limit_then_drop::<DataOut>(8)?
            .limit_then_drop::<Block>(1)?
    };

    let mut agent_ref = None;
    env.introduce_coop(|coop| {
        agent_ref = Some(coop.add_agent_with_opts(
            Processor {
                trace: Arc::clone(&trace),
            },
            AgentOptions::new().limits(limits),
        )?);
        Ok(())
    })?;
    let mbox = agent_ref.unwrap().direct_mbox();
    self_mbox.set(Arc::clone(&mbox)).ok();

    // Stall the agent, then overflow the one-message data_in quota.
    send_signal::<Block>(&mbox)?;
    send_mutable(
        &mbox,
        DataIn {
            text: "hello".to_string(),
        },
    )?;
    send_mutable(
        &mbox,
        DataIn {
            text: "bye".to_string(),
        },
    )?;

    std::thread::sleep(Duration::from_millis(600));
    assert_eq!(trace.lock().as_str(), "[initial:hello][transformed:<bye>]");

    wrapped.stop_then_join();
    Ok(())
}

#[derive(Debug)]
struct Unlimited;

impl Message for Unlimited {
    const MESSAGE_TYPE: &'static str = "unlimited";
}

struct Strict;

impl Agent for Strict {
    fn so_define_agent(&mut self, ctx: &mut AgentContext<Self>) -> Result<()> {
        let outcome = ctx
            .subscribe_self()
            .event(|_a: &mut Self, _ctx, _msg: &Unlimited| {});
        assert_eq!(
            outcome.err(),
            Some(Error::MessageHasNoLimitDefined {
                message_type: "unlimited"
            })
        );
        Ok(())
    }
}

#[test]
fn subscription_requires_limit_entry_when_table_present() -> Result<()> {
    let wrapped = WrappedEnv::new()?;
    let env = wrapped.environment();

    let limits = MessageLimits::new().limit_then_drop::<DataIn>(4)?;
    env.introduce_coop(|coop| {
        coop.add_agent_with_opts(Strict, AgentOptions::new().limits(limits))?;
        Ok(())
    })?;

    wrapped.stop_then_join();
    Ok(())
}

#[test]
fn duplicate_limit_entries_are_rejected() {
    let duplicated = MessageLimits::new()
        .limit_then_drop::<DataIn>(1)
        .and_then(|l| l.limit_then_abort::<DataIn>(2));
    assert_eq!(
        duplicated.err(),
        Some(Error::SeveralLimitsForOneMessageType {
            message_type: "data_in"
        })
    );
}

#[test]
fn drop_reaction_discards_overquota_messages() -> Result<()> {
    let wrapped = WrappedEnv::new()?;
    let env = wrapped.environment();

    let trace = Arc::new(Mutex::new(String::new()));
    let limits = MessageLimits::new()
        .limit_then_drop::<DataIn>(1)?
        .limit_then_drop::<DataOut>(8)?
        .limit_then_drop::<Block>(1)?;

    let mut agent_ref = None;
    env.introduce_coop(|coop| {
        agent_ref = Some(coop.add_agent_with_opts(
            Processor {
                trace: Arc::clone(&trace),
            },
            AgentOptions::new().limits(limits),
        )?);
        Ok(())
    })?;
    let mbox = agent_ref.unwrap().direct_mbox();

    send_signal::<Block>(&mbox)?;
    for text in ["one", "two", "three"] {
        send_mutable(
            &mbox,
            DataIn {
                text: text.to_string(),
            },
        )?;
    }

    std::thread::sleep(Duration::from_millis(500));
    assert_eq!(trace.lock().as_str(), "[initial:one]");

    wrapped.stop_then_join();
    Ok(())
}
