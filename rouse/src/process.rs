//! Process actors: child processes whose exit is delivered as a rouse.
//!
//! Spawning binds a child to a fresh actor. The reactor polls live children
//! each turn, streaming piped stdio both ways without ever blocking its
//! thread; when a child exits, the tail of its output is delivered to the
//! capture pipes and then the `(status, signal)` pair is roused to the actor
//! with a single wake, so a consumer woken by the exit can read everything
//! the child wrote. Closing the actor releases the handle but never kills
//! the child; killing is explicit, via [`ProcessRef::kill`].

use std::path::PathBuf;
use std::process::{Command, Stdio};

use crate::actor::{ActorKind, DomainId};
use crate::error::{RouseError, RouseResult};
use crate::pipe::PipeRef;
use crate::reactor::{ActorRef, ProcessResource, Reactor, Resource};
use crate::transfer::Value;

/// Where one of the child's standard streams is connected.
#[derive(Debug, Clone, Default)]
pub enum StdioBinding {
    /// Discard (or read nothing): the stream is bound to the null device.
    #[default]
    Null,
    /// Share the parent's stream.
    Inherit,
    /// Bind to a pipe actor. For stdin, everything written to the pipe
    /// before the spawn is fed to the child as the reactor turns; for
    /// stdout/stderr, the child's output streams onto the pipe in chunks as
    /// it is produced, with the tail delivered before the exit wake.
    Piped(PipeRef),
}

impl StdioBinding {
    fn as_stdio(&self) -> Stdio {
        match self {
            StdioBinding::Null => Stdio::null(),
            StdioBinding::Inherit => Stdio::inherit(),
            StdioBinding::Piped(_) => Stdio::piped(),
        }
    }
}

/// Spawn-time configuration for a child process.
#[derive(Debug, Clone, Default)]
pub struct ProcessOptions {
    /// Arguments, not including the program name.
    pub args: Vec<String>,
    /// When set, the child's environment is exactly these pairs; when unset,
    /// the parent's environment is inherited.
    pub env: Option<Vec<(String, String)>>,
    /// Working directory for the child.
    pub cwd: Option<PathBuf>,
    /// Standard input binding.
    pub stdin: StdioBinding,
    /// Standard output binding.
    pub stdout: StdioBinding,
    /// Standard error binding.
    pub stderr: StdioBinding,
    /// Detach the child: it runs in its own process group, the reactor does
    /// not wait on it, and it never keeps the run loop alive.
    pub detach: bool,
}

/// Result of [`spawn`]: either an immediately-returned detached handle or
/// the awaited exit of a supervised child.
#[derive(Debug)]
pub enum ProcessOutcome {
    /// The child was detached; no exit will ever be delivered.
    Detached(ProcessRef),
    /// The child exited.
    Completed {
        /// Exit code, 0 when the child was terminated by a signal.
        status: i32,
        /// Terminating signal number, 0 on a normal exit.
        signal: i32,
    },
}

/// A handle on a process actor.
#[derive(Debug, Clone)]
pub struct ProcessRef {
    actor: ActorRef,
}

impl ProcessRef {
    /// The underlying actor, for awaiting the exit pair or racing it.
    pub fn actor(&self) -> &ActorRef {
        &self.actor
    }

    /// Sends `signum` to the child.
    ///
    /// Fails with a reactor error when the child has already been reaped
    /// (`ESRCH`) or the signal is invalid (`EINVAL`). Works on detached
    /// children too, as long as the actor is still open.
    #[cfg(unix)]
    pub fn kill(&self, signum: i32) -> RouseResult<()> {
        let reactor = self.actor.reactor.upgrade()?;
        let pid = live_pid(&reactor, &self.actor).ok_or_else(|| {
            RouseError::Reactor(std::io::Error::from_raw_os_error(libc::ESRCH))
        })?;
        // Safety: plain syscall; pid came from a child we spawned and have
        // not reaped, so it cannot alias an unrelated process yet.
        let rv = unsafe { libc::kill(pid, signum) };
        if rv == 0 {
            Ok(())
        } else {
            Err(RouseError::Reactor(std::io::Error::last_os_error()))
        }
    }

    /// Sends `signum` to the child. Unsupported off unix.
    #[cfg(not(unix))]
    pub fn kill(&self, _signum: i32) -> RouseResult<()> {
        Err(RouseError::Reactor(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "kill is unix-only",
        )))
    }

    /// Pid of the child, while the reactor still tracks it.
    pub fn pid(&self) -> RouseResult<u32> {
        let reactor = self.actor.reactor.upgrade()?;
        let inner = reactor.inner.borrow();
        let resource = inner
            .actors
            .get(&self.actor.id())
            .and_then(|cell| cell.handle)
            .and_then(|handle| inner.resources.get(&handle));
        match resource {
            Some(Resource::Process(process)) if !process.exited => Ok(process.child.id()),
            _ => Err(RouseError::Reactor(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "child no longer tracked",
            ))),
        }
    }

    /// Closes the process actor. The handle is released and waiters get the
    /// terminal signal; the child itself is left running (a live child is
    /// still reaped by the reactor when it eventually exits).
    pub fn close(&self) -> RouseResult<()> {
        self.actor.close()
    }
}

#[cfg(unix)]
fn set_nonblocking<F: std::os::unix::io::AsRawFd>(stream: &F) -> std::io::Result<()> {
    let fd = stream.as_raw_fd();
    // Safety: fcntl flag manipulation on a descriptor we own.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(std::io::Error::last_os_error());
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(unix)]
fn live_pid(reactor: &Reactor, actor: &ActorRef) -> Option<libc::pid_t> {
    let inner = reactor.inner.borrow();
    let handle = inner.actors.get(&actor.id())?.handle?;
    match inner.resources.get(&handle) {
        Some(Resource::Process(process)) if !process.exited => {
            Some(process.child.id() as libc::pid_t)
        }
        _ => None,
    }
}

impl Reactor {
    /// Spawns `program` and binds it to a fresh process actor.
    ///
    /// The actor rouses exactly once, with `[status, signal]`, when the
    /// child exits. With `detach` set the reactor forgets the child entirely
    /// and the actor never rouses.
    pub fn spawn_process(
        &self,
        program: &str,
        options: ProcessOptions,
    ) -> RouseResult<ProcessRef> {
        let mut command = Command::new(program);
        command.args(&options.args);
        if let Some(env) = &options.env {
            command.env_clear();
            command.envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        }
        if let Some(cwd) = &options.cwd {
            command.current_dir(cwd);
        }
        command.stdin(options.stdin.as_stdio());
        command.stdout(options.stdout.as_stdio());
        command.stderr(options.stderr.as_stdio());
        #[cfg(unix)]
        if options.detach {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        // Collected before the spawn so a closed stdin pipe cannot leak an
        // already-running child.
        let stdin_buf = match &options.stdin {
            StdioBinding::Piped(pipe) => pipe.drain_buffered()?,
            _ => Vec::new(),
        };

        // A failed spawn means no resource was ever bound; no actor is
        // allocated and nothing enters `Active`.
        let mut child = command
            .spawn()
            .map_err(|err| RouseError::Allocation(format!("spawn {program}: {err}")))?;

        // Stdio is serviced incrementally from the reactor loop; the
        // descriptors must never block the reactor thread.
        #[cfg(unix)]
        for result in [
            child.stdin.as_ref().map(set_nonblocking),
            child.stdout.as_ref().map(set_nonblocking),
            child.stderr.as_ref().map(set_nonblocking),
        ]
        .into_iter()
        .flatten()
        {
            if let Err(err) = result {
                tracing::warn!(error = %err, "O_NONBLOCK failed; stream drains at exit only");
            }
        }

        let (id, handle) = self.alloc_actor(ActorKind::Process, DomainId::ROOT);
        let capture = |binding: &StdioBinding| match binding {
            StdioBinding::Piped(pipe) => Some(pipe.actor().id()),
            _ => None,
        };
        let stdin = match &options.stdin {
            StdioBinding::Piped(_) => child.stdin.take(),
            _ => None,
        };
        let mut resource = ProcessResource {
            child,
            actor: id,
            detached: options.detach,
            exited: false,
            stdin,
            stdin_buf,
            stdin_pos: 0,
            stdout_pipe: capture(&options.stdout),
            stderr_pipe: capture(&options.stderr),
        };
        // First flush now; the poll loop continues it for supervised
        // children. Detached children get only this one pass.
        resource.flush_stdin();
        self.bind_resource(handle, Resource::Process(resource));
        tracing::debug!(program, actor = ?id, detached = options.detach, "child spawned");
        Ok(ProcessRef {
            actor: self.actor_ref(id),
        })
    }
}

/// Spawns `program` and, unless detached, awaits its exit pair.
pub async fn spawn(
    reactor: &Reactor,
    program: &str,
    options: ProcessOptions,
) -> RouseResult<ProcessOutcome> {
    let detach = options.detach;
    let process = reactor.spawn_process(program, options)?;
    if detach {
        return Ok(ProcessOutcome::Detached(process));
    }
    let values = process.actor().await_signal().await?;
    let field = |index: usize| {
        values
            .get(index)
            .and_then(Value::as_number)
            .unwrap_or(0.0) as i32
    };
    Ok(ProcessOutcome::Completed {
        status: field(0),
        signal: field(1),
    })
}
