//! Two agents on an `active_obj` dispatcher exchange ping/pong for a fixed
//! number of rounds, then deregister their cooperation.

#![allow(clippy::unwrap_used)]
#![allow(clippy::panic)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use troupe::dispatcher::active_obj::{self, ActiveObjParams};
use troupe::mchain::{from, handler, receive, ChainParams};
use troupe::coop::CoopDeregistered;
use troupe::coop::make_coop_dereg_notificator;
use troupe::prelude::*;

const ROUNDS: u64 = 100_000;

#[derive(Debug)]
struct Ping;

impl Message for Ping {
    const MESSAGE_TYPE: &'static str = "ping";
}

#[derive(Debug)]
struct Pong;

impl Message for Pong {
    const MESSAGE_TYPE: &'static str = "pong";
}

struct Pinger {
    board: MboxRef,
    rounds_left: u64,
    pings_sent: Arc<AtomicU64>,
}

impl Agent for Pinger {
    fn so_define_agent(&mut self, ctx: &mut AgentContext<Self>) -> Result<()> {
        ctx.subscription(&self.board)
            .event(|a: &mut Self, ctx, _msg: &Pong| {
                if a.rounds_left == 0 {
                    ctx.deregister_coop(DeregReason::Normal);
                } else {
                    a.rounds_left -= 1;
                    a.pings_sent.fetch_add(1, Ordering::Relaxed);
                    let _ = send(&a.board, Ping);
                }
            })?;
        Ok(())
    }

    fn so_evt_start(&mut self, _ctx: &mut AgentContext<Self>) {
        self.rounds_left -= 1;
        self.pings_sent.fetch_add(1, Ordering::Relaxed);
        let _ = send(&self.board, Ping);
    }
}

struct Ponger {
    board: MboxRef,
    pongs_sent: Arc<AtomicU64>,
}

impl Agent for Ponger {
    fn so_define_agent(&mut self, ctx: &mut AgentContext<Self>) -> Result<()> {
        ctx.subscription(&self.board)
            .event(|a: &mut Self, _ctx, _msg: &Ping| {
                a.pongs_sent.fetch_add(1, Ordering::Relaxed);
                let _ = send(&a.board, Pong);
            })?;
        Ok(())
    }
}

#[test]
fn ping_pong_hundred_thousand_rounds() -> Result<()> {
    let wrapped = WrappedEnv::new()?;
    let env = wrapped.environment();

    let dispatcher = active_obj::make_dispatcher(env, "pingpong", ActiveObjParams::new())?;
    let board = env.create_mbox();
    let done = env.create_mchain(ChainParams::default());

    let pings = Arc::new(AtomicU64::new(0));
    let pongs = Arc::new(AtomicU64::new(0));

    env.introduce_coop_with_binder(dispatcher.binder(), |coop| {
        coop.add_agent(Pinger {
            board: Arc::clone(&board),
            rounds_left: ROUNDS,
            pings_sent: Arc::clone(&pings),
        })?;
        coop.add_agent(Ponger {
            board: Arc::clone(&board),
            pongs_sent: Arc::clone(&pongs),
        })?;
        coop.add_dereg_notificator(make_coop_dereg_notificator(&done.as_mbox()));
        Ok(())
    })?;

    let result = receive(
        from(&done).handle_n(1).empty_timeout(Duration::from_secs(60)),
        vec![handler(|_: &CoopDeregistered| {})],
    )?;
    assert_eq!(result.handled, 1, "cooperation must deregister in time");

    assert_eq!(pings.load(Ordering::Relaxed), ROUNDS);
    assert_eq!(pongs.load(Ordering::Relaxed), ROUNDS);

    wrapped.stop_then_join();
    Ok(())
}
