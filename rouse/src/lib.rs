//! # Rouse
//!
//! A single-threaded await/rouse scheduling core.
//!
//! Every concurrent entity is an *actor*: a lifecycle flag, a FIFO queue of
//! parked waiters, and a single sticky result slot, bound to at most one
//! reactor-owned resource. Execution contexts suspend on an actor with
//! `await_signal`; a rouse delivers values to parked waiters (or buffers
//! them, so a wakeup fired before the park is never lost); close is the
//! terminal signal and doubles as cancellation.
//!
//! The crate provides:
//! - The reactor: the event loop owning every actor and resource
//! - A runtime driving plain futures interleaved with reactor turns
//! - Consumers: timers, pipes, and child processes delivering their
//!   `(status, signal)` exit pair as a rouse
//! - Cross-isolation value transfer preserving shared substructure and cycles

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

/// Actor cells: lifecycle flags, waiter queues, and wake policies.
pub mod actor;
/// Error types shared across the crate.
pub mod error;
/// Deadline events and the reactor's timer queue.
pub mod events;
/// Pipe actors with chunked byte delivery.
pub mod pipe;
/// Common re-exports.
pub mod prelude;
/// Child processes bound to actors.
pub mod process;
/// The await side of the protocol.
pub mod protocol;
/// The event loop owning actors and resources.
pub mod reactor;
/// The single-threaded executor driving the reactor.
pub mod runtime;
/// Timer actors and deadline composition.
pub mod timer;
/// Transferable values and the cross-isolation codec.
pub mod transfer;

pub use actor::{ActorId, ActorKind, ActorState, DomainId, WakePolicy};
pub use error::{RouseError, RouseResult};
pub use pipe::PipeRef;
pub use process::{spawn, ProcessOptions, ProcessOutcome, ProcessRef, StdioBinding};
pub use protocol::AwaitFuture;
pub use reactor::{ActorRef, Reactor, TurnOutcome, WeakReactor};
pub use runtime::{Runtime, Spawner};
pub use timer::{sleep, timeout};
pub use transfer::{transfer, Function, Table, Value};
