//! Timer actors: one-shot delays and deadline racing.
//!
//! A timer is an ordinary actor whose rouse is driven by the reactor's event
//! queue instead of a caller. That makes deadline composition trivial: racing
//! an operation against a timeout is just awaiting both actors and closing
//! the loser, with the loser's eventual rouse discarded by its dropped await.

use std::time::Duration;

use futures::future::{select, Either};

use crate::error::RouseResult;
use crate::reactor::{ActorRef, Reactor};
use crate::transfer::Value;

/// Suspends the calling context for `duration`.
///
/// Allocates a one-shot timer actor, awaits its single rouse, and closes it.
pub async fn sleep(reactor: &Reactor, duration: Duration) -> RouseResult<()> {
    let timer = reactor.new_timer(duration);
    let result = timer.await_signal().await;
    timer.close()?;
    result.map(|_| ())
}

/// Awaits `target` for at most `duration`.
///
/// Returns `Ok(Some(values))` when the target rouses first, `Ok(None)` on
/// timeout. Whichever await loses the race is dropped, which cancels its
/// parked ticket; a rouse arriving after the loss is discarded, never
/// delivered twice. The timer actor is closed on both paths.
pub async fn timeout(
    reactor: &Reactor,
    duration: Duration,
    target: &ActorRef,
) -> RouseResult<Option<Vec<Value>>> {
    let timer = reactor.new_timer(duration);
    let winner = select(target.await_signal(), timer.await_signal()).await;
    timer.close()?;
    match winner {
        Either::Left((values, _timer_wait)) => values.map(Some),
        Either::Right((fired, _target_wait)) => {
            fired?;
            Ok(None)
        }
    }
}
