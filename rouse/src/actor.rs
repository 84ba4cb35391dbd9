//! Actor identity, lifecycle flags, and per-actor scheduling state.
//!
//! An actor is a schedulable unit bound to exactly one reactor resource. Its
//! mutable scheduling state (lifecycle flag, FIFO waiter queue, single-slot
//! result buffer, handle binding) lives in an [`ActorCell`] inside the
//! reactor's actor table. Behavior differences between resource kinds are
//! selected by exhaustive `match` on [`ActorKind`] rather than a vtable.

use std::collections::VecDeque;

use crate::transfer::Value;

/// Unique identifier for an actor within one reactor.
///
/// The default id names the root actor, which is always allocated first.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActorId(pub u64);

/// Unique identifier for a reactor-owned resource binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandleId(pub u64);

/// Unique ticket for one parked waiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WaiterId(pub u64);

/// Isolation domain of an execution context.
///
/// Actors in the same domain share memory and transfer values by reference;
/// a rouse that crosses domains goes through the codec instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DomainId(pub u64);

impl DomainId {
    /// The root domain every reactor starts with.
    pub const ROOT: DomainId = DomainId(0);
}

/// Lifecycle flag of an actor.
///
/// Transitions are monotonic: `Start → Active → Closed`. Entering `Active`
/// is reentrant-safe, and closing is idempotent: closing twice is a no-op,
/// not an error. Nothing leaves `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorState {
    /// Created, not yet awaited or signaled.
    Start,
    /// At least one await or reactor callback has touched the actor.
    Active,
    /// Terminal. The handle has been released and waiters woken.
    Closed,
}

/// The resource kind an actor wraps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorKind {
    /// The distinguished actor bound to the reactor's run loop.
    Root,
    /// One-shot deadline resource.
    Timer,
    /// Reactor-managed child process.
    Process,
    /// Byte-stream resource with chunked delivery.
    Pipe,
    /// Bare await/rouse rendezvous with no underlying resource.
    Condition,
}

impl ActorKind {
    /// The wake policy a natural signal of this kind uses.
    ///
    /// Process exits and timer deadlines concern exactly the caller that
    /// awaits them; conditions broadcast to every parked waiter. Close always
    /// broadcasts regardless of kind.
    pub fn wake_policy(self) -> WakePolicy {
        match self {
            ActorKind::Root | ActorKind::Timer | ActorKind::Process | ActorKind::Pipe => {
                WakePolicy::One
            }
            ActorKind::Condition => WakePolicy::All,
        }
    }
}

/// How many parked waiters one rouse pops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakePolicy {
    /// Pop the single oldest waiter.
    One,
    /// Pop every currently parked waiter.
    All,
}

/// One parked waiter: the ticket plus the domain of the awaiting context.
#[derive(Debug, Clone, Copy)]
pub struct Waiter {
    /// Ticket identifying the parked `AwaitFuture`.
    pub id: WaiterId,
    /// Isolation domain values must be transferred into.
    pub domain: DomainId,
}

/// Per-actor scheduling state, owned by the reactor.
#[derive(Debug)]
pub struct ActorCell {
    /// Lifecycle flag.
    pub state: ActorState,
    /// Resource kind tag.
    pub kind: ActorKind,
    /// Parked waiters in FIFO park order; insertion order = wake order.
    pub waiters: VecDeque<Waiter>,
    /// Single-slot sticky result buffer. Overwritten, never queued.
    pub result: Option<Vec<Value>>,
    /// Exclusively owned resource binding; `Some` iff not closed.
    pub handle: Option<HandleId>,
    /// Isolation domain of the actor's owning execution context.
    pub domain: DomainId,
}

impl ActorCell {
    /// Creates a cell in the `Start` state bound to `handle`.
    pub fn new(kind: ActorKind, handle: HandleId, domain: DomainId) -> Self {
        Self {
            state: ActorState::Start,
            kind,
            waiters: VecDeque::new(),
            result: None,
            handle: Some(handle),
            domain,
        }
    }

    /// Marks the actor active. Reentrant-safe; a no-op once closed.
    pub fn activate(&mut self) {
        if self.state == ActorState::Start {
            self.state = ActorState::Active;
        }
    }

    /// Returns `true` once the actor has been closed.
    pub fn is_closed(&self) -> bool {
        self.state == ActorState::Closed
    }

    /// Transitions to `Closed` and releases the handle binding.
    ///
    /// Returns the handle on the first close so the reactor can free the
    /// underlying resource exactly once; `None` on repeated closes.
    pub fn close(&mut self) -> Option<HandleId> {
        self.state = ActorState::Closed;
        self.handle.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn activate_is_reentrant_and_respects_closed() {
        let mut cell = ActorCell::new(ActorKind::Timer, HandleId(0), DomainId::ROOT);
        assert_eq!(cell.state, ActorState::Start);
        cell.activate();
        cell.activate();
        assert_eq!(cell.state, ActorState::Active);

        assert!(cell.close().is_some());
        cell.activate();
        assert_eq!(cell.state, ActorState::Closed);
    }

    #[test]
    fn close_releases_handle_exactly_once() {
        let mut cell = ActorCell::new(ActorKind::Process, HandleId(7), DomainId::ROOT);
        assert_eq!(cell.close(), Some(HandleId(7)));
        assert_eq!(cell.close(), None);
        assert!(cell.handle.is_none());
        assert!(cell.is_closed());
    }

    #[test]
    fn default_actor_id_names_the_root() {
        assert_eq!(ActorId::default(), ActorId(0));
    }

    #[test]
    fn wake_policy_matches_variant() {
        assert_eq!(ActorKind::Process.wake_policy(), WakePolicy::One);
        assert_eq!(ActorKind::Timer.wake_policy(), WakePolicy::One);
        assert_eq!(ActorKind::Condition.wake_policy(), WakePolicy::All);
    }
}
