//! Pipe actors: byte streams with chunked, in-order delivery.
//!
//! A pipe buffers whole chunks and rouses one parked reader per chunk; the
//! sticky result slot never carries the data, so a burst of writes before
//! anyone reads loses nothing. Pipes double as stdio capture targets for
//! process actors (see [`crate::process`]).

use crate::actor::{ActorKind, DomainId};
use crate::error::RouseResult;
use crate::reactor::{ActorRef, PipeResource, Reactor, Resource};

/// A handle on a pipe actor.
#[derive(Debug, Clone)]
pub struct PipeRef {
    actor: ActorRef,
}

impl PipeRef {
    /// Allocates a pipe actor in the root domain.
    pub fn new(reactor: &Reactor) -> PipeRef {
        Self::new_in(reactor, DomainId::ROOT)
    }

    /// Allocates a pipe actor owned by `domain`.
    pub fn new_in(reactor: &Reactor, domain: DomainId) -> PipeRef {
        let (id, handle) = reactor.alloc_actor(ActorKind::Pipe, domain);
        reactor.bind_resource(handle, Resource::Pipe(PipeResource::default()));
        PipeRef {
            actor: reactor.actor_ref(id),
        }
    }

    /// The underlying actor, for awaiting or closing directly.
    pub fn actor(&self) -> &ActorRef {
        &self.actor
    }

    /// Appends one chunk and wakes at most one parked reader.
    ///
    /// `Err(Closed)` once the pipe actor has closed.
    pub fn write(&self, data: &[u8]) -> RouseResult<()> {
        let reactor = self.actor.reactor.upgrade()?;
        reactor.pipe_deliver(self.actor.id(), data.to_vec())?;
        Ok(())
    }

    /// Takes the next chunk, parking until one arrives.
    ///
    /// Chunks come out whole and in write order. `Err(Closed)` when the pipe
    /// closes while this reader is parked; chunks buffered before the close
    /// are gone with the resource.
    pub async fn read(&self) -> RouseResult<Vec<u8>> {
        loop {
            let reactor = self.actor.reactor.upgrade()?;
            if let Some(chunk) = reactor.pipe_pop(self.actor.id())? {
                return Ok(chunk);
            }
            // Two readers racing one chunk: the loser loops and re-parks.
            self.actor.await_signal().await?;
        }
    }

    /// Drains every buffered chunk into one contiguous buffer, without
    /// parking. Used to hand pre-written input to a spawned child's stdin.
    pub(crate) fn drain_buffered(&self) -> RouseResult<Vec<u8>> {
        let reactor = self.actor.reactor.upgrade()?;
        let mut data = Vec::new();
        while let Some(chunk) = reactor.pipe_pop(self.actor.id())? {
            data.extend_from_slice(&chunk);
        }
        Ok(data)
    }

    /// Closes the pipe actor; parked readers get the terminal signal.
    pub fn close(&self) -> RouseResult<()> {
        self.actor.close()
    }
}
