//! The reactor: a single-threaded event loop that owns every actor and
//! resource, delivers completion events, and implements the rouse/close side
//! of the scheduling protocol.
//!
//! All mutable state lives behind `Rc<RefCell<ReactorInner>>`; futures and
//! actor refs hold a [`WeakReactor`] and upgrade per operation, so dropping
//! the reactor is observable instead of dangling. The `RefCell` borrow is
//! never held across a suspension point; there is exactly one thread of
//! control.

use std::{
    cell::RefCell,
    collections::{HashMap, VecDeque},
    io::{Read, Write},
    rc::{Rc, Weak},
    task::Waker,
    time::{Duration, Instant},
};

use tracing::instrument;

use crate::{
    actor::{ActorCell, ActorId, ActorKind, ActorState, DomainId, HandleId, Waiter, WaiterId, WakePolicy},
    error::{RouseError, RouseResult},
    events::{Event, EventQueue, ScheduledEvent},
    protocol::AwaitFuture,
    transfer::{transfer, Value},
};

/// How often the reactor re-polls live children when no timer is due sooner.
const CHILD_POLL_TICK: Duration = Duration::from_millis(2);

/// A reactor-owned resource, keyed by [`HandleId`].
#[derive(Debug)]
pub(crate) enum Resource {
    /// Root and condition actors own no underlying resource.
    Bare,
    /// Deadline tracked by the event queue.
    Timer,
    /// A spawned child process.
    Process(ProcessResource),
    /// A byte-stream with chunked delivery.
    Pipe(PipeResource),
}

/// State of one reactor-managed child process.
#[derive(Debug)]
pub(crate) struct ProcessResource {
    pub(crate) child: std::process::Child,
    pub(crate) actor: ActorId,
    /// Detached children are dropped from the keep-alive set: the run loop
    /// does not wait on them and close never kills them.
    pub(crate) detached: bool,
    pub(crate) exited: bool,
    /// Write end of the child's stdin, held while pre-written input is
    /// still being flushed. Dropping it signals EOF.
    pub(crate) stdin: Option<std::process::ChildStdin>,
    pub(crate) stdin_buf: Vec<u8>,
    pub(crate) stdin_pos: usize,
    /// Pipe actors bound as stdout/stderr capture targets.
    pub(crate) stdout_pipe: Option<ActorId>,
    pub(crate) stderr_pipe: Option<ActorId>,
}

impl ProcessResource {
    /// Writes as much pending stdin as the pipe accepts right now.
    ///
    /// Once the buffer is fully written (or the child stops reading) the
    /// write end is dropped so the child sees EOF. Never blocks on unix,
    /// where the descriptor is `O_NONBLOCK`.
    pub(crate) fn flush_stdin(&mut self) {
        let Some(stdin) = self.stdin.as_mut() else {
            return;
        };
        loop {
            if self.stdin_pos >= self.stdin_buf.len() {
                self.stdin = None;
                self.stdin_buf = Vec::new();
                return;
            }
            match stdin.write(&self.stdin_buf[self.stdin_pos..]) {
                Ok(0) => break,
                Ok(n) => self.stdin_pos += n,
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => return,
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => {}
                // EPIPE and friends: the child stopped reading; its exit is
                // still delivered normally.
                Err(err) => {
                    tracing::debug!(error = %err, "child stdin write failed; input dropped");
                    break;
                }
            }
        }
        self.stdin = None;
        self.stdin_buf = Vec::new();
    }
}

/// Reads everything currently available from a captured child stream.
///
/// Stops on `WouldBlock`; drops the stream on EOF or a read error so later
/// polls skip it.
fn drain_stream<R: Read>(stream: &mut Option<R>, chunks: &mut Vec<Vec<u8>>) {
    let Some(reader) = stream.as_mut() else {
        return;
    };
    loop {
        let mut buf = [0u8; 8192];
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => chunks.push(buf[..n].to_vec()),
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => return,
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => {}
            Err(err) => {
                tracing::debug!(error = %err, "child stream read failed");
                break;
            }
        }
    }
    *stream = None;
}

/// Buffered chunks of a pipe resource, oldest first.
#[derive(Debug, Default)]
pub(crate) struct PipeResource {
    pub(crate) chunks: VecDeque<Vec<u8>>,
}

/// A value (or terminal signal) delivered to a specific parked waiter.
#[derive(Debug)]
pub(crate) enum Delivery {
    /// The roused result, already transferred into the waiter's domain.
    Values {
        values: Vec<Value>,
        /// The domain the values currently live in, kept so an unclaimed
        /// delivery can be re-routed to a waiter in a different domain.
        domain: DomainId,
    },
    /// The target actor closed before signaling.
    Closed,
}

/// What one reactor turn accomplished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    /// At least this many rouse deliveries happened.
    Delivered(usize),
    /// Nothing was due; the reactor slept until the next deadline or poll tick.
    Slept,
    /// No timers, no live children, nothing buffered: the reactor is idle.
    Idle,
}

#[derive(Debug, Default)]
pub(crate) struct ReactorInner {
    pub(crate) actors: HashMap<ActorId, ActorCell>,
    pub(crate) resources: HashMap<HandleId, Resource>,
    pub(crate) timers: EventQueue,
    pub(crate) deliveries: HashMap<WaiterId, Delivery>,
    pub(crate) waiter_wakers: HashMap<WaiterId, Waker>,
    pub(crate) next_actor_id: u64,
    pub(crate) next_handle_id: u64,
    pub(crate) next_waiter_id: u64,
    pub(crate) next_sequence: u64,
    pub(crate) root: ActorId,
    /// Live children whose actor closed before they exited. Still reaped on
    /// every poll so they never linger as zombies.
    pub(crate) orphans: Vec<std::process::Child>,
}

/// The event-loop coordinator. Cheap to clone; clones share state.
#[derive(Debug, Clone)]
pub struct Reactor {
    pub(crate) inner: Rc<RefCell<ReactorInner>>,
}

/// Weak handle to a reactor, held by futures and actor refs.
#[derive(Debug, Clone)]
pub struct WeakReactor {
    inner: Weak<RefCell<ReactorInner>>,
}

impl WeakReactor {
    /// Upgrades to a strong handle, or reports that the reactor is gone.
    pub fn upgrade(&self) -> RouseResult<Reactor> {
        self.inner
            .upgrade()
            .map(|inner| Reactor { inner })
            .ok_or(RouseError::ReactorGone)
    }
}

/// A handle on one actor: identity plus a weak reactor reference.
#[derive(Debug, Clone)]
pub struct ActorRef {
    pub(crate) reactor: WeakReactor,
    pub(crate) id: ActorId,
}

impl ActorRef {
    /// The actor's identity within its reactor.
    pub fn id(&self) -> ActorId {
        self.id
    }

    /// Parks the calling context (root domain) until this actor rouses.
    pub fn await_signal(&self) -> AwaitFuture {
        self.await_signal_in(DomainId::ROOT)
    }

    /// Parks the calling context, recording `domain` as the destination for
    /// the cross-actor value transfer.
    pub fn await_signal_in(&self, domain: DomainId) -> AwaitFuture {
        AwaitFuture::new(self.reactor.clone(), self.id, domain)
    }

    /// Delivers `values` to this actor's waiters using its kind's wake
    /// policy. Returns how many waiters were woken.
    pub fn rouse(&self, values: Vec<Value>) -> RouseResult<usize> {
        let reactor = self.reactor.upgrade()?;
        let policy = reactor
            .actor_kind(self.id)
            .map(ActorKind::wake_policy)
            .unwrap_or(WakePolicy::All);
        reactor.rouse(self.id, values, policy)
    }

    /// Closes the actor: releases its handle and wakes all parked waiters
    /// with the terminal closed signal. Idempotent.
    pub fn close(&self) -> RouseResult<()> {
        self.reactor.upgrade()?.close(self.id);
        Ok(())
    }

    /// Current lifecycle flag, if the actor still exists.
    pub fn state(&self) -> RouseResult<Option<ActorState>> {
        Ok(self.reactor.upgrade()?.actor_state(self.id))
    }
}

impl Default for Reactor {
    fn default() -> Self {
        Self::new()
    }
}

impl Reactor {
    /// Creates a reactor with its root actor already bound to the run loop.
    pub fn new() -> Self {
        let reactor = Self {
            inner: Rc::new(RefCell::new(ReactorInner::default())),
        };
        let (root, _) = reactor.alloc_actor(ActorKind::Root, DomainId::ROOT);
        reactor.inner.borrow_mut().root = root;
        reactor
    }

    /// Creates a weak handle to this reactor.
    pub fn downgrade(&self) -> WeakReactor {
        WeakReactor {
            inner: Rc::downgrade(&self.inner),
        }
    }

    /// The distinguished actor bound to the run loop.
    pub fn root(&self) -> ActorRef {
        let root = self.inner.borrow().root;
        self.actor_ref(root)
    }

    pub(crate) fn actor_ref(&self, id: ActorId) -> ActorRef {
        ActorRef {
            reactor: self.downgrade(),
            id,
        }
    }

    /// Allocates an actor cell bound to a fresh bare handle.
    ///
    /// Callers that wrap a real resource replace the binding through
    /// [`Reactor::bind_resource`] once the resource knows its actor.
    pub(crate) fn alloc_actor(&self, kind: ActorKind, domain: DomainId) -> (ActorId, HandleId) {
        let mut inner = self.inner.borrow_mut();
        let actor = ActorId(inner.next_actor_id);
        inner.next_actor_id += 1;
        let handle = HandleId(inner.next_handle_id);
        inner.next_handle_id += 1;
        inner.resources.insert(handle, Resource::Bare);
        inner.actors.insert(actor, ActorCell::new(kind, handle, domain));
        tracing::debug!(?actor, ?kind, ?domain, "actor created");
        (actor, handle)
    }

    /// Replaces the resource owned by `handle`.
    pub(crate) fn bind_resource(&self, handle: HandleId, resource: Resource) {
        self.inner.borrow_mut().resources.insert(handle, resource);
    }

    /// Creates a bare rendezvous actor in the root domain.
    ///
    /// Conditions have no underlying resource; they exist purely to park and
    /// broadcast-rouse waiters.
    pub fn new_condition(&self) -> ActorRef {
        self.new_condition_in(DomainId::ROOT)
    }

    /// Creates a bare rendezvous actor owned by `domain`.
    pub fn new_condition_in(&self, domain: DomainId) -> ActorRef {
        let (id, _) = self.alloc_actor(ActorKind::Condition, domain);
        self.actor_ref(id)
    }

    /// Creates a one-shot timer actor that rouses after `duration`.
    pub fn new_timer(&self, duration: Duration) -> ActorRef {
        let (id, handle) = self.alloc_actor(ActorKind::Timer, DomainId::ROOT);
        self.bind_resource(handle, Resource::Timer);
        let deadline = Instant::now() + duration;
        let mut inner = self.inner.borrow_mut();
        let sequence = inner.next_sequence;
        inner.next_sequence += 1;
        inner
            .timers
            .schedule(ScheduledEvent::new(deadline, Event::TimerFired { actor: id }, sequence));
        drop(inner);
        self.actor_ref(id)
    }

    /// Schedules reactor-wide teardown: once `delay` elapses, every live
    /// actor is closed and its parked waiters get the terminal signal.
    pub fn shutdown_after(&self, delay: Duration) {
        let deadline = Instant::now() + delay;
        let mut inner = self.inner.borrow_mut();
        let sequence = inner.next_sequence;
        inner.next_sequence += 1;
        inner
            .timers
            .schedule(ScheduledEvent::new(deadline, Event::Shutdown, sequence));
    }

    /// The kind of `actor`, if it exists.
    pub(crate) fn actor_kind(&self, actor: ActorId) -> Option<ActorKind> {
        self.inner.borrow().actors.get(&actor).map(|cell| cell.kind)
    }

    /// The lifecycle flag of `actor`, if it exists.
    pub fn actor_state(&self, actor: ActorId) -> Option<ActorState> {
        self.inner.borrow().actors.get(&actor).map(|cell| cell.state)
    }

    /// Buffers `values` on `actor` and wakes parked waiters per `policy`.
    ///
    /// Safe with an empty waiter queue: the values stay in the sticky slot
    /// and the next await consumes them without parking. A second rouse
    /// before anyone consumed the previous result overwrites it: latest
    /// value wins.
    #[instrument(skip(self, values))]
    pub fn rouse(
        &self,
        actor: ActorId,
        values: Vec<Value>,
        policy: WakePolicy,
    ) -> RouseResult<usize> {
        let (payload, source, woken) = {
            let mut inner = self.inner.borrow_mut();
            let cell = match inner.actors.get_mut(&actor) {
                Some(cell) => cell,
                None => return Err(RouseError::Closed),
            };
            if cell.is_closed() {
                return Err(RouseError::Closed);
            }
            cell.activate();
            if cell.result.replace(values).is_some() {
                tracing::warn!(?actor, "overwriting undelivered result; latest value wins");
            }
            if cell.waiters.is_empty() {
                tracing::trace!(?actor, "rouse with no waiters; result buffered");
                return Ok(0);
            }
            let count = match policy {
                WakePolicy::One => 1,
                WakePolicy::All => cell.waiters.len(),
            };
            let mut woken = Vec::with_capacity(count);
            for _ in 0..count {
                if let Some(waiter) = cell.waiters.pop_front() {
                    woken.push(waiter);
                }
            }
            let payload = cell.result.take().unwrap_or_default();
            (payload, cell.domain, woken)
        };

        // Transfer into every destination domain before delivering anything,
        // so an encoding failure leaves no waiter half-served.
        let mut packets = Vec::with_capacity(woken.len());
        for waiter in &woken {
            match transfer(&payload, source, waiter.domain) {
                Ok(values) => packets.push(values),
                Err(err) => {
                    let mut inner = self.inner.borrow_mut();
                    if let Some(cell) = inner.actors.get_mut(&actor) {
                        for waiter in woken.into_iter().rev() {
                            cell.waiters.push_front(waiter);
                        }
                        cell.result = Some(payload);
                    }
                    return Err(err);
                }
            }
        }

        let mut inner = self.inner.borrow_mut();
        let count = woken.len();
        for (waiter, values) in woken.into_iter().zip(packets) {
            inner.deliveries.insert(
                waiter.id,
                Delivery::Values {
                    values,
                    domain: waiter.domain,
                },
            );
            if let Some(waker) = inner.waiter_wakers.remove(&waiter.id) {
                waker.wake();
            }
        }
        tracing::debug!(?actor, count, "roused waiters");
        Ok(count)
    }

    /// Closes `actor`: terminal flag, handle released exactly once, every
    /// remaining waiter woken with the closed signal. Safe to call from
    /// completion handling or explicit teardown; calling it twice is a no-op.
    #[instrument(skip(self))]
    pub fn close(&self, actor: ActorId) {
        let mut inner = self.inner.borrow_mut();
        let cell = match inner.actors.get_mut(&actor) {
            Some(cell) => cell,
            None => return,
        };
        if cell.is_closed() {
            return;
        }
        let handle = cell.close();
        cell.result = None;
        let drained: Vec<Waiter> = cell.waiters.drain(..).collect();
        if let Some(handle) = handle {
            // Dropping the resource releases it. Children are never killed
            // here; close relinquishes the handle, nothing more. A child
            // that has not exited yet moves to the orphan list so its exit
            // is still reaped instead of leaving a zombie.
            if let Some(Resource::Process(process)) = inner.resources.remove(&handle) {
                if !process.exited {
                    inner.orphans.push(process.child);
                }
            }
        }
        for waiter in drained {
            inner.deliveries.insert(waiter.id, Delivery::Closed);
            if let Some(waker) = inner.waiter_wakers.remove(&waiter.id) {
                waker.wake();
            }
        }
        tracing::debug!(?actor, "actor closed");
    }

    /// Closes every live actor. Used at runtime teardown so no execution
    /// context stays parked past shutdown.
    pub fn close_all(&self) {
        let ids: Vec<ActorId> = self.inner.borrow().actors.keys().copied().collect();
        for id in ids {
            self.close(id);
        }
    }

    /// Parks a waiter on `actor`. Caller must have checked the sticky slot
    /// and the closed flag first (see [`AwaitFuture`]).
    pub(crate) fn park(
        &self,
        actor: ActorId,
        domain: DomainId,
        waker: Waker,
    ) -> RouseResult<WaiterId> {
        let mut inner = self.inner.borrow_mut();
        let waiter = WaiterId(inner.next_waiter_id);
        inner.next_waiter_id += 1;
        let cell = match inner.actors.get_mut(&actor) {
            Some(cell) if !cell.is_closed() => cell,
            _ => return Err(RouseError::Closed),
        };
        cell.activate();
        cell.waiters.push_back(Waiter { id: waiter, domain });
        inner.waiter_wakers.insert(waiter, waker);
        tracing::trace!(?actor, ?waiter, "waiter parked");
        Ok(waiter)
    }

    /// Consumes the sticky result buffer if populated, transferring it into
    /// `domain`. `Err(Closed)` when the actor is closed or unknown.
    pub(crate) fn try_consume(
        &self,
        actor: ActorId,
        domain: DomainId,
    ) -> RouseResult<Option<Vec<Value>>> {
        let (payload, source) = {
            let mut inner = self.inner.borrow_mut();
            let cell = match inner.actors.get_mut(&actor) {
                Some(cell) => cell,
                None => return Err(RouseError::Closed),
            };
            if cell.is_closed() {
                return Err(RouseError::Closed);
            }
            cell.activate();
            match cell.result.take() {
                Some(values) => (values, cell.domain),
                None => return Ok(None),
            }
        };
        match transfer(&payload, source, domain) {
            Ok(values) => Ok(Some(values)),
            Err(err) => {
                // Put the untransferable payload back; the caller sees the
                // encoding failure, nothing is silently dropped.
                let mut inner = self.inner.borrow_mut();
                if let Some(cell) = inner.actors.get_mut(&actor) {
                    cell.result = Some(payload);
                }
                Err(err)
            }
        }
    }

    /// Takes the delivery addressed to `waiter`, if any has arrived.
    pub(crate) fn take_delivery(&self, waiter: WaiterId) -> Option<Delivery> {
        self.inner.borrow_mut().deliveries.remove(&waiter)
    }

    /// Re-registers the waker for a parked waiter. Called on every poll, so
    /// a future that migrated tasks still wakes the right one.
    pub(crate) fn update_waker(&self, waiter: WaiterId, waker: Waker) {
        self.inner.borrow_mut().waiter_wakers.insert(waiter, waker);
    }

    /// Removes a waiter that stopped waiting (its future was dropped, e.g.
    /// the losing side of a race).
    ///
    /// A value delivery already addressed to the canceled ticket is not
    /// discarded: a single wake must reach someone. It is re-routed to the
    /// next parked waiter, or re-buffered on the actor for the next await.
    /// Only the terminal closed signal is dropped with the ticket.
    pub(crate) fn cancel_waiter(&self, actor: ActorId, waiter: WaiterId) {
        let mut guard = self.inner.borrow_mut();
        let inner = &mut *guard;
        inner.waiter_wakers.remove(&waiter);
        let Some(cell) = inner.actors.get_mut(&actor) else {
            inner.deliveries.remove(&waiter);
            return;
        };
        cell.waiters.retain(|w| w.id != waiter);
        let Some(Delivery::Values { values, domain }) = inner.deliveries.remove(&waiter) else {
            return;
        };
        if cell.is_closed() {
            return;
        }
        if let Some(next) = cell.waiters.pop_front() {
            match transfer(&values, domain, next.domain) {
                Ok(values) => {
                    inner.deliveries.insert(
                        next.id,
                        Delivery::Values {
                            values,
                            domain: next.domain,
                        },
                    );
                    if let Some(waker) = inner.waiter_wakers.remove(&next.id) {
                        waker.wake();
                    }
                    tracing::trace!(?actor, ?waiter, to = ?next.id, "unclaimed wake redelivered");
                }
                Err(err) => {
                    cell.waiters.push_front(next);
                    tracing::warn!(?actor, error = %err, "unclaimed wake dropped: transfer failed");
                }
            }
        } else if cell.result.is_none() {
            match transfer(&values, domain, cell.domain) {
                Ok(values) => {
                    cell.result = Some(values);
                    tracing::trace!(?actor, ?waiter, "unclaimed wake re-buffered");
                }
                Err(err) => {
                    tracing::warn!(?actor, error = %err, "unclaimed wake dropped: transfer failed");
                }
            }
        } else {
            // A newer rouse landed in the meantime; latest value wins.
            tracing::trace!(?actor, ?waiter, "unclaimed wake superseded by a newer result");
        }
    }

    /// One reactor turn: poll children, fire due timers, or sleep until the
    /// next deadline / child poll tick.
    #[instrument(skip(self))]
    pub fn turn(&self) -> RouseResult<TurnOutcome> {
        let delivered = self.poll_children()? + self.fire_due_timers()?;
        if delivered > 0 {
            return Ok(TurnOutcome::Delivered(delivered));
        }

        let (next_deadline, children_pending) = {
            let inner = self.inner.borrow();
            let deadline = inner.timers.peek_earliest().map(|event| event.time());
            let pending = inner.resources.values().any(|resource| {
                matches!(
                    resource,
                    Resource::Process(process) if !process.detached && !process.exited
                )
            });
            (deadline, pending)
        };

        match (next_deadline, children_pending) {
            (None, false) => Ok(TurnOutcome::Idle),
            (deadline, pending) => {
                let now = Instant::now();
                let mut wait = deadline
                    .map(|deadline| deadline.saturating_duration_since(now))
                    .unwrap_or(CHILD_POLL_TICK);
                if pending {
                    wait = wait.min(CHILD_POLL_TICK);
                }
                if !wait.is_zero() {
                    std::thread::sleep(wait);
                }
                Ok(TurnOutcome::Slept)
            }
        }
    }

    /// Pops and dispatches every timer event whose deadline has passed.
    fn fire_due_timers(&self) -> RouseResult<usize> {
        let now = Instant::now();
        let mut fired = 0;
        loop {
            let event = {
                let mut inner = self.inner.borrow_mut();
                match inner.timers.peek_earliest() {
                    Some(event) if event.time() <= now => inner.timers.pop_earliest(),
                    _ => None,
                }
            };
            let Some(event) = event else { break };
            match event.into_event() {
                Event::TimerFired { actor } => {
                    // The actor may have been closed while the event was
                    // queued; a closed timer's deadline is simply dropped.
                    if self.actor_state(actor) == Some(ActorState::Active)
                        || self.actor_state(actor) == Some(ActorState::Start)
                    {
                        self.rouse(actor, Vec::new(), WakePolicy::One)?;
                        fired += 1;
                    }
                }
                Event::Shutdown => {
                    self.close_all();
                    fired += 1;
                }
            }
        }
        Ok(fired)
    }

    /// Polls every live non-detached child once: flushes pending stdin,
    /// streams whatever output is ready into the capture pipes, and on exit
    /// delivers the remaining output followed by the (status, signal) pair
    /// with exactly one wake.
    fn poll_children(&self) -> RouseResult<usize> {
        self.reap_orphans();

        let handles: Vec<HandleId> = {
            let inner = self.inner.borrow();
            inner
                .resources
                .iter()
                .filter_map(|(handle, resource)| match resource {
                    Resource::Process(process) if !process.detached && !process.exited => {
                        Some(*handle)
                    }
                    _ => None,
                })
                .collect()
        };

        let mut delivered = 0;
        for handle in handles {
            // Service stdio before checking for exit, so a chatty child
            // never stays blocked on a full pipe until it terminates.
            delivered += self.service_child_io(handle)?;

            let exit = {
                let mut inner = self.inner.borrow_mut();
                let Some(Resource::Process(process)) = inner.resources.get_mut(&handle) else {
                    continue;
                };
                match process.child.try_wait() {
                    Ok(Some(status)) => {
                        process.exited = true;
                        process.stdin = None;
                        let mut chunks = Vec::new();
                        if let Some(pipe) = process.stdout_pipe {
                            let mut data = Vec::new();
                            drain_stream(&mut process.child.stdout, &mut data);
                            chunks.extend(data.into_iter().map(|chunk| (pipe, chunk)));
                        }
                        if let Some(pipe) = process.stderr_pipe {
                            let mut data = Vec::new();
                            drain_stream(&mut process.child.stderr, &mut data);
                            chunks.extend(data.into_iter().map(|chunk| (pipe, chunk)));
                        }
                        Some((process.actor, exit_pair(status), chunks))
                    }
                    Ok(None) => None,
                    Err(err) => {
                        tracing::warn!(?handle, error = %err, "child wait failed");
                        None
                    }
                }
            };

            let Some((actor, (status, signal), chunks)) = exit else {
                continue;
            };
            delivered += self.deliver_capture_chunks(chunks)?;
            tracing::debug!(?actor, status, signal, "child exited");
            match self.rouse(
                actor,
                vec![Value::Number(status), Value::Number(signal)],
                WakePolicy::One,
            ) {
                Ok(_) => delivered += 1,
                // The actor was closed before its natural exit; its waiters
                // already got the terminal signal.
                Err(RouseError::Closed) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(delivered)
    }

    /// One non-blocking stdio pass over a live child: flush pending stdin,
    /// read available stdout/stderr, deliver the chunks. Returns how many
    /// parked readers were woken.
    fn service_child_io(&self, handle: HandleId) -> RouseResult<usize> {
        let chunks = {
            let mut inner = self.inner.borrow_mut();
            let Some(Resource::Process(process)) = inner.resources.get_mut(&handle) else {
                return Ok(0);
            };
            process.flush_stdin();
            let mut chunks = Vec::new();
            if let Some(pipe) = process.stdout_pipe {
                let mut data = Vec::new();
                drain_stream(&mut process.child.stdout, &mut data);
                chunks.extend(data.into_iter().map(|chunk| (pipe, chunk)));
            }
            if let Some(pipe) = process.stderr_pipe {
                let mut data = Vec::new();
                drain_stream(&mut process.child.stderr, &mut data);
                chunks.extend(data.into_iter().map(|chunk| (pipe, chunk)));
            }
            chunks
        };
        self.deliver_capture_chunks(chunks)
    }

    fn deliver_capture_chunks(&self, chunks: Vec<(ActorId, Vec<u8>)>) -> RouseResult<usize> {
        let mut woken = 0;
        for (pipe, data) in chunks {
            match self.pipe_deliver(pipe, data) {
                Ok(count) => woken += count,
                // A closed capture pipe just stops receiving output.
                Err(RouseError::Closed) => {
                    tracing::trace!(?pipe, "capture pipe closed; output dropped")
                }
                Err(err) => return Err(err),
            }
        }
        Ok(woken)
    }

    /// Reaps children whose actor closed before they exited. Non-blocking;
    /// a child that has not exited yet stays on the list.
    fn reap_orphans(&self) {
        let mut inner = self.inner.borrow_mut();
        inner.orphans.retain_mut(|child| match child.try_wait() {
            Ok(None) => true,
            Ok(Some(_)) | Err(_) => false,
        });
    }

    /// Appends a chunk to a pipe's buffer and rouses one parked reader.
    pub(crate) fn pipe_deliver(&self, actor: ActorId, data: Vec<u8>) -> RouseResult<usize> {
        {
            let mut inner = self.inner.borrow_mut();
            let handle = match inner.actors.get(&actor) {
                Some(cell) if !cell.is_closed() => match cell.handle {
                    Some(handle) => handle,
                    None => return Err(RouseError::Closed),
                },
                _ => return Err(RouseError::Closed),
            };
            match inner.resources.get_mut(&handle) {
                Some(Resource::Pipe(pipe)) => pipe.chunks.push_back(data),
                _ => {
                    return Err(RouseError::Allocation(format!(
                        "actor {:?} is not a pipe",
                        actor
                    )))
                }
            }
        }
        // Chunks live in the pipe buffer, not the result slot.
        self.rouse(actor, Vec::new(), WakePolicy::One)
    }

    /// Pops the oldest buffered chunk of a pipe, if any.
    pub(crate) fn pipe_pop(&self, actor: ActorId) -> RouseResult<Option<Vec<u8>>> {
        let mut inner = self.inner.borrow_mut();
        let handle = match inner.actors.get(&actor) {
            Some(cell) if !cell.is_closed() => match cell.handle {
                Some(handle) => handle,
                None => return Err(RouseError::Closed),
            },
            _ => return Err(RouseError::Closed),
        };
        match inner.resources.get_mut(&handle) {
            Some(Resource::Pipe(pipe)) => Ok(pipe.chunks.pop_front()),
            _ => Err(RouseError::Allocation(format!(
                "actor {:?} is not a pipe",
                actor
            ))),
        }
    }
}

#[cfg(unix)]
fn exit_pair(status: std::process::ExitStatus) -> (f64, f64) {
    use std::os::unix::process::ExitStatusExt;
    (
        f64::from(status.code().unwrap_or(0)),
        f64::from(status.signal().unwrap_or(0)),
    )
}

#[cfg(not(unix))]
fn exit_pair(status: std::process::ExitStatus) -> (f64, f64) {
    (f64::from(status.code().unwrap_or(0)), 0.0)
}
