//! The await side of the await/rouse protocol.
//!
//! [`AwaitFuture`] is the crate's only suspension point. It never blocks the
//! thread: pending means the caller's task is parked on the target actor's
//! waiter queue and control has returned to the run loop. The future
//! integrates with the reactor by:
//!
//! 1. consuming the target's sticky result buffer if one is already
//!    populated (rouse-before-park races resolve here, no wakeup is lost);
//! 2. otherwise parking a waiter ticket FIFO and registering its waker;
//! 3. completing when the reactor addresses a delivery to the ticket.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::actor::{ActorId, DomainId, WaiterId};
use crate::error::{RouseError, RouseResult};
use crate::reactor::{Delivery, WeakReactor};
use crate::transfer::Value;

#[derive(Debug)]
enum AwaitState {
    /// Not yet polled against the reactor.
    Init,
    /// Parked with this ticket, waiting for a delivery.
    Parked(WaiterId),
    /// Resolved; polling again is a caller bug.
    Done,
}

/// Future returned by [`ActorRef::await_signal`](crate::ActorRef::await_signal).
///
/// Resolves to the transferred values from the rouse that woke it, or
/// [`RouseError::Closed`] when the target closed first. Dropping a parked
/// `AwaitFuture` (the losing arm of a race) cancels its ticket; a value
/// delivery already addressed to the dropped ticket is re-routed to the next
/// waiter or re-buffered, never delivered twice and never swallowed.
#[derive(Debug)]
pub struct AwaitFuture {
    reactor: WeakReactor,
    actor: ActorId,
    domain: DomainId,
    state: AwaitState,
}

impl AwaitFuture {
    pub(crate) fn new(reactor: WeakReactor, actor: ActorId, domain: DomainId) -> Self {
        Self {
            reactor,
            actor,
            domain,
            state: AwaitState::Init,
        }
    }
}

impl Future for AwaitFuture {
    type Output = RouseResult<Vec<Value>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let reactor = match self.reactor.upgrade() {
            Ok(reactor) => reactor,
            Err(err) => {
                self.state = AwaitState::Done;
                return Poll::Ready(Err(err));
            }
        };

        match self.state {
            AwaitState::Init => {
                // Sticky buffer first: a rouse that fired before we parked
                // must still be observable.
                match reactor.try_consume(self.actor, self.domain) {
                    Ok(Some(values)) => {
                        self.state = AwaitState::Done;
                        Poll::Ready(Ok(values))
                    }
                    Ok(None) => match reactor.park(self.actor, self.domain, cx.waker().clone()) {
                        Ok(waiter) => {
                            self.state = AwaitState::Parked(waiter);
                            Poll::Pending
                        }
                        Err(err) => {
                            self.state = AwaitState::Done;
                            Poll::Ready(Err(err))
                        }
                    },
                    Err(err) => {
                        self.state = AwaitState::Done;
                        Poll::Ready(Err(err))
                    }
                }
            }
            AwaitState::Parked(waiter) => match reactor.take_delivery(waiter) {
                Some(Delivery::Values { values, .. }) => {
                    self.state = AwaitState::Done;
                    Poll::Ready(Ok(values))
                }
                Some(Delivery::Closed) => {
                    self.state = AwaitState::Done;
                    Poll::Ready(Err(RouseError::Closed))
                }
                None => {
                    reactor.update_waker(waiter, cx.waker().clone());
                    Poll::Pending
                }
            },
            AwaitState::Done => panic!("AwaitFuture polled after completion"),
        }
    }
}

impl Drop for AwaitFuture {
    fn drop(&mut self) {
        if let AwaitState::Parked(waiter) = self.state {
            if let Ok(reactor) = self.reactor.upgrade() {
                reactor.cancel_waiter(self.actor, waiter);
            }
        }
    }
}
