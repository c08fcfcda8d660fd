//! Delivery-path benchmarks: chain round trips and MPMC fan-out.

#![allow(clippy::unwrap_used)]
#![allow(clippy::panic)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use criterion::{criterion_group, criterion_main, Criterion};
use troupe::mchain::{from, handler, receive, ChainParams};
use troupe::prelude::*;

#[derive(Debug)]
struct Sample(u64);

impl Message for Sample {
    const MESSAGE_TYPE: &'static str = "sample";
}

fn chain_round_trip(c: &mut Criterion) {
    let wrapped = WrappedEnv::new().unwrap();
    let env = wrapped.environment();
    let chain = env.create_mchain(ChainParams::default());

    c.bench_function("chain_send_receive", |b| {
        b.iter(|| {
            chain.send(Sample(1)).unwrap();
            let result = receive(
                from(&chain).handle_n(1).empty_timeout(Duration::from_secs(1)),
                vec![handler(|m: &Sample| {
                    std::hint::black_box(m.0);
                })],
            )
            .unwrap();
            assert_eq!(result.handled, 1);
        });
    });

    wrapped.stop_then_join();
}

struct Echo {
    seen: Arc<AtomicU64>,
}

impl Agent for Echo {
    fn so_define_agent(&mut self, ctx: &mut AgentContext<Self>) -> Result<()> {
        ctx.subscribe_self()
            .event(|a: &mut Self, _ctx, msg: &Sample| {
                a.seen.fetch_add(msg.0, Ordering::Relaxed);
            })?;
        Ok(())
    }
}

fn agent_delivery(c: &mut Criterion) {
    let wrapped = WrappedEnv::new().unwrap();
    let env = wrapped.environment();

    let seen = Arc::new(AtomicU64::new(0));
    let mut agent_ref = None;
    env.introduce_coop(|coop| {
        agent_ref = Some(coop.add_agent(Echo {
            seen: Arc::clone(&seen),
        })?);
        Ok(())
    })
    .unwrap();
    let mbox = agent_ref.unwrap().direct_mbox();

    c.bench_function("direct_mbox_send", |b| {
        b.iter(|| {
            send(&mbox, Sample(1)).unwrap();
        });
    });

    wrapped.stop_then_join();
}

criterion_group!(benches, chain_round_trip, agent_delivery);
criterion_main!(benches);
