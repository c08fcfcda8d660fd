//! Chains under select: a Fibonacci producer over a size-one chain, and
//! close/unblock semantics.

#![allow(clippy::unwrap_used)]
#![allow(clippy::panic)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use troupe::mchain::{
    close_drop_content, from, from_all, handler, prepare_receive, receive, receive_case, select,
    send_case, ChainCapacity, ChainOverflowReaction, ChainParams, ChainSendResult, MemoryUsage,
    SelectStatus,
};
use troupe::prelude::*;

#[derive(Debug, Clone, Copy)]
struct Fib(u64);

impl Message for Fib {
    const MESSAGE_TYPE: &'static str = "fib";
}

#[derive(Debug, Default)]
struct Quit;

impl Message for Quit {
    const MESSAGE_TYPE: &'static str = "quit";
}
impl Signal for Quit {}

#[test]
fn fibonacci_over_bounded_chain() -> Result<()> {
    let wrapped = WrappedEnv::new()?;
    let env = wrapped.environment();

    let values = env.create_mchain(ChainParams::new(ChainCapacity::limited(
        1,
        MemoryUsage::Preallocated,
        ChainOverflowReaction::Abort,
    )));
    let quit = env.create_mchain(ChainParams::default());

    let producer = {
        let values = values.clone();
        let quit = quit.clone();
        std::thread::spawn(move || -> Result<()> {
            let mut current: u64 = 0;
            let mut next: u64 = 1;
            loop {
                let advanced = Arc::new(AtomicU64::new(0));
                let on_sent = {
                    let advanced = Arc::clone(&advanced);
                    move || {
                        advanced.store(1, Ordering::SeqCst);
                    }
                };
                let outcome = select(
                    from_all().handle_n(1),
                    vec![
                        send_case(&values, Fib(current), on_sent),
                        receive_case(&quit, vec![handler(|_: &Quit| {})]),
                    ],
                )?;
                if advanced.load(Ordering::SeqCst) == 1 {
                    let upcoming = current + next;
                    current = next;
                    next = upcoming;
                }
                if outcome.sent == 0 {
                    // Either quit arrived or every case is dead.
                    return Ok(());
                }
            }
        })
    };

    let mut observed = Vec::new();
    for _ in 0..10 {
        let result = {
            let sink: Arc<parking_lot::Mutex<Vec<u64>>> =
                Arc::new(parking_lot::Mutex::new(Vec::new()));
            let push = Arc::clone(&sink);
            let result = receive(
                from(&values).handle_n(1).empty_timeout(Duration::from_secs(5)),
                vec![handler(move |m: &Fib| push.lock().push(m.0))],
            )?;
            observed.extend(sink.lock().iter().copied());
            result
        };
        assert_eq!(result.handled, 1);
    }

    assert_eq!(observed, vec![0, 1, 1, 2, 3, 5, 8, 13, 21, 34]);

    send_signal::<Quit>(&quit.as_mbox())?;
    producer.join().unwrap()?;

    close_drop_content(&values);
    close_drop_content(&quit);
    wrapped.stop_then_join();
    Ok(())
}

#[test]
fn prepared_receive_reuses_handlers() -> Result<()> {
    let wrapped = WrappedEnv::new()?;
    let env = wrapped.environment();

    let chain = env.create_mchain(ChainParams::default());
    let seen = Arc::new(AtomicU64::new(0));

    let mut prepared = {
        let seen = Arc::clone(&seen);
        prepare_receive(
            from(&chain).handle_n(1).empty_timeout(Duration::from_secs(1)),
            vec![handler(move |m: &Fib| {
                seen.fetch_add(m.0, Ordering::SeqCst);
            })],
        )
    };

    for value in [1, 2, 3] {
        assert_eq!(chain.send(Fib(value))?, ChainSendResult::Stored);
        let result = prepared.perform()?;
        assert_eq!(result.handled, 1);
    }
    assert_eq!(seen.load(Ordering::SeqCst), 6);

    wrapped.stop_then_join();
    Ok(())
}

#[test]
fn closing_unblocks_select_send_case() -> Result<()> {
    let wrapped = WrappedEnv::new()?;
    let env = wrapped.environment();

    let chain = env.create_mchain(ChainParams::new(ChainCapacity::limited(
        1,
        MemoryUsage::Preallocated,
        ChainOverflowReaction::DropNewest,
    )));
    assert_eq!(chain.send(Fib(0))?, ChainSendResult::Stored);

    let blocked = {
        let chain = chain.clone();
        std::thread::spawn(move || {
            select(
                from_all().handle_n(1),
                vec![send_case(&chain, Fib(1), || {})],
            )
        })
    };

    std::thread::sleep(Duration::from_millis(100));
    close_drop_content(&chain);

    let result = blocked.join().unwrap()?;
    assert_eq!(result.send_failures, 1);
    assert_eq!(result.status, SelectStatus::AllClosed);
    assert_eq!(chain.len(), 0);

    wrapped.stop_then_join();
    Ok(())
}

#[test]
fn chain_is_a_send_destination_for_agents() -> Result<()> {
    let wrapped = WrappedEnv::new()?;
    let env = wrapped.environment();

    let chain = env.create_mchain(ChainParams::default());
    let dest = chain.as_mbox();
    send(&dest, Fib(41))?;
    send(&dest, Fib(42))?;

    let collected: Arc<parking_lot::Mutex<Vec<u64>>> = Arc::new(parking_lot::Mutex::new(Vec::new()));
    {
        let collected = Arc::clone(&collected);
        let result = receive(
            from(&chain).handle_n(2).empty_timeout(Duration::from_secs(1)),
            vec![handler(move |m: &Fib| collected.lock().push(m.0))],
        )?;
        assert_eq!(result.extracted, 2);
    }
    assert_eq!(*collected.lock(), vec![41, 42]);

    wrapped.stop_then_join();
    Ok(())
}
