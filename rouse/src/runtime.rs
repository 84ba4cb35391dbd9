//! The root actor: a single-threaded executor interleaved with reactor turns.
//!
//! Caller-side execution contexts are plain futures multiplexed onto the
//! reactor thread. The drive loop alternates between polling every ready
//! task and giving the reactor one turn; there is no preemption and no
//! parallelism among actors sharing one runtime. The runtime is explicit
//! process-wide state: construct it at startup, pass it to whatever creates
//! actors, and let teardown close every surviving actor so nothing stays
//! parked past shutdown.

use std::{
    cell::RefCell,
    collections::{HashMap, VecDeque},
    future::Future,
    pin::Pin,
    rc::{Rc, Weak},
    sync::{Arc, Mutex},
    task::{Context, Poll},
};

use futures::task::{waker, ArcWake};
use tracing::instrument;

use crate::reactor::{Reactor, TurnOutcome};

/// Identifier of a task multiplexed on the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct TaskId(u64);

/// The main task driven by `block_on`.
const MAIN_TASK: TaskId = TaskId(u64::MAX);

type LocalFuture = Pin<Box<dyn Future<Output = ()>>>;

/// Tasks spawned while the loop is running, picked up on the next iteration.
#[derive(Default)]
struct Incoming {
    tasks: Vec<(TaskId, LocalFuture)>,
    next_task_id: u64,
}

/// FIFO of tasks whose wakers fired. Shared with every waker.
type ReadyQueue = Arc<Mutex<VecDeque<TaskId>>>;

struct TaskWaker {
    task: TaskId,
    ready: ReadyQueue,
}

impl ArcWake for TaskWaker {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        arc_self
            .ready
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push_back(arc_self.task);
    }
}

/// Handle for spawning tasks from inside a running task.
#[derive(Clone)]
pub struct Spawner {
    incoming: Weak<RefCell<Incoming>>,
}

impl Spawner {
    /// Queues a task for execution on the runtime's thread.
    ///
    /// Silently a no-op once the runtime is gone; a task spawned during
    /// teardown has nothing left to run on.
    pub fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + 'static,
    {
        if let Some(incoming) = self.incoming.upgrade() {
            let mut incoming = incoming.borrow_mut();
            let id = TaskId(incoming.next_task_id);
            incoming.next_task_id += 1;
            incoming.tasks.push((id, Box::pin(future)));
        }
    }
}

/// The root of a rouse program: one reactor plus the executor driving it.
pub struct Runtime {
    reactor: Reactor,
    incoming: Rc<RefCell<Incoming>>,
    ready: ReadyQueue,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    /// Creates a runtime with a fresh reactor and root actor.
    pub fn new() -> Self {
        Self {
            reactor: Reactor::new(),
            incoming: Rc::new(RefCell::new(Incoming::default())),
            ready: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// The reactor actors are created against.
    pub fn reactor(&self) -> &Reactor {
        &self.reactor
    }

    /// A handle for spawning additional tasks onto this runtime.
    pub fn spawner(&self) -> Spawner {
        Spawner {
            incoming: Rc::downgrade(&self.incoming),
        }
    }

    /// Queues a background task; it starts running inside `block_on`.
    pub fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + 'static,
    {
        self.spawner().spawn(future);
    }

    /// Drives `future` (and every spawned task) to completion, interleaving
    /// task polling with reactor turns.
    ///
    /// # Panics
    ///
    /// Panics if the runtime wedges: the main task is pending but no task is
    /// ready and the reactor has no timers, live children, or buffered work.
    /// Close always wakes parked waiters, so reaching that state means some
    /// actor was neither roused nor closed. That is a caller bug, not a
    /// transient condition.
    #[instrument(skip(self, future))]
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        let mut main = Box::pin(future);
        let mut tasks: HashMap<TaskId, LocalFuture> = HashMap::new();
        self.push_ready(MAIN_TASK);

        loop {
            self.adopt_incoming(&mut tasks);

            while let Some(id) = self.pop_ready() {
                if id == MAIN_TASK {
                    let task_waker = self.waker_for(MAIN_TASK);
                    let mut cx = Context::from_waker(&task_waker);
                    if let Poll::Ready(output) = main.as_mut().poll(&mut cx) {
                        tracing::debug!("main task complete; closing surviving actors");
                        self.reactor.close_all();
                        return output;
                    }
                } else if let Some(mut task) = tasks.remove(&id) {
                    let task_waker = self.waker_for(id);
                    let mut cx = Context::from_waker(&task_waker);
                    if task.as_mut().poll(&mut cx).is_pending() {
                        tasks.insert(id, task);
                    }
                }
                self.adopt_incoming(&mut tasks);
            }

            match self.reactor.turn() {
                Ok(TurnOutcome::Delivered(_)) | Ok(TurnOutcome::Slept) => {}
                Ok(TurnOutcome::Idle) => {
                    let nothing_ready = self
                        .ready
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .is_empty();
                    if nothing_ready && self.incoming.borrow().tasks.is_empty() {
                        panic!(
                            "runtime deadlock: main task parked with an idle reactor \
                             (an awaited actor was never roused or closed)"
                        );
                    }
                }
                Err(err) => panic!("reactor turn failed: {err}"),
            }
        }
    }

    fn adopt_incoming(&self, tasks: &mut HashMap<TaskId, LocalFuture>) {
        let spawned: Vec<(TaskId, LocalFuture)> =
            self.incoming.borrow_mut().tasks.drain(..).collect();
        for (id, task) in spawned {
            tasks.insert(id, task);
            self.push_ready(id);
        }
    }

    fn waker_for(&self, task: TaskId) -> std::task::Waker {
        waker(Arc::new(TaskWaker {
            task,
            ready: Arc::clone(&self.ready),
        }))
    }

    fn push_ready(&self, task: TaskId) {
        self.ready
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push_back(task);
    }

    fn pop_ready(&self) -> Option<TaskId> {
        self.ready
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front()
    }
}
