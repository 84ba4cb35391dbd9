//! Timer behavior: one-shot sleeps and racing an operation against a
//! deadline, including the discard of the race loser's late rouse.

use std::time::{Duration, Instant};

use rouse::prelude::*;

#[test]
fn sleep_waits_at_least_the_requested_duration() {
    let runtime = Runtime::new();
    let reactor = runtime.reactor().clone();

    let start = Instant::now();
    runtime.block_on(async {
        sleep(&reactor, Duration::from_millis(20)).await.unwrap();
    });
    assert!(start.elapsed() >= Duration::from_millis(20));
}

#[test]
fn timeout_yields_values_when_target_rouses_first() {
    let runtime = Runtime::new();
    let reactor = runtime.reactor().clone();
    let condition = reactor.new_condition();

    {
        let reactor = reactor.clone();
        let condition = condition.clone();
        runtime.spawn(async move {
            sleep(&reactor, Duration::from_millis(5)).await.unwrap();
            condition.rouse(vec![Value::str("won")]).unwrap();
        });
    }

    let values = runtime
        .block_on(timeout(&reactor, Duration::from_millis(500), &condition))
        .unwrap();
    assert_eq!(values, Some(vec![Value::str("won")]));
}

#[test]
fn timeout_yields_none_when_the_deadline_fires_first() {
    let runtime = Runtime::new();
    let reactor = runtime.reactor().clone();
    let condition = reactor.new_condition();

    let values = runtime
        .block_on(timeout(&reactor, Duration::from_millis(5), &condition))
        .unwrap();
    assert_eq!(values, None);
}

#[test]
fn rouse_after_a_lost_race_is_buffered_not_dropped() {
    let runtime = Runtime::new();
    let reactor = runtime.reactor().clone();
    let condition = reactor.new_condition();

    runtime.block_on(async {
        let raced = timeout(&reactor, Duration::from_millis(5), &condition)
            .await
            .unwrap();
        assert!(raced.is_none());

        // The loser's ticket was canceled with the timeout; this rouse finds
        // no waiter and lands in the sticky slot instead of vanishing.
        condition.rouse(vec![Value::Number(3.0)]).unwrap();
        let values = condition.await_signal().await.unwrap();
        assert_eq!(values, vec![Value::Number(3.0)]);
    });
}

#[test]
fn two_timers_fire_in_deadline_order() {
    let runtime = Runtime::new();
    let reactor = runtime.reactor().clone();

    runtime.block_on(async {
        let slow = reactor.new_timer(Duration::from_millis(30));
        let fast = reactor.new_timer(Duration::from_millis(5));

        let first = futures::future::select(fast.await_signal(), slow.await_signal()).await;
        let futures::future::Either::Left((fired, slow_wait)) = first else {
            panic!("slow timer fired first");
        };
        fired.unwrap();
        // Cancel the loser's ticket before parking again; a fresh waiter
        // must not queue behind a stale one.
        drop(slow_wait);

        slow.await_signal().await.unwrap();
        fast.close().unwrap();
        slow.close().unwrap();
    });
}

#[test]
fn fresh_await_after_an_undropped_loss_still_gets_the_wake() {
    // The loser future stays alive (never polled again) while the timer
    // fires; the wake addressed to the stale ticket must reach the fresh
    // waiter once the stale future finally drops.
    let runtime = Runtime::new();
    let reactor = runtime.reactor().clone();

    runtime.block_on(async {
        let slow = reactor.new_timer(Duration::from_millis(10));
        let fast = reactor.new_timer(Duration::from_millis(2));

        let first = futures::future::select(fast.await_signal(), slow.await_signal()).await;
        let futures::future::Either::Left((fired, slow_wait)) = first else {
            panic!("slow timer fired first");
        };
        fired.unwrap();

        // Let the slow deadline pass while the stale ticket is still parked.
        sleep(&reactor, Duration::from_millis(20)).await.unwrap();
        drop(slow_wait);

        slow.await_signal().await.unwrap();
        fast.close().unwrap();
        slow.close().unwrap();
    });
}
