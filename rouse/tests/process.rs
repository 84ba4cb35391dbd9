//! Process actor behavior: exit pair delivery, stdio capture, detach, and
//! explicit kill. Unix-only; the exit pair's signal half needs waitpid
//! semantics.

#![cfg(unix)]

use std::time::Duration;

use rouse::prelude::*;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn sh(script: &str) -> ProcessOptions {
    ProcessOptions {
        args: vec!["-c".into(), script.into()],
        ..ProcessOptions::default()
    }
}

#[test]
fn exit_code_arrives_as_the_status_half() {
    init_tracing();
    let runtime = Runtime::new();
    let reactor = runtime.reactor().clone();

    let outcome = runtime
        .block_on(spawn(&reactor, "sh", sh("exit 7")))
        .unwrap();
    assert!(matches!(
        outcome,
        ProcessOutcome::Completed { status: 7, signal: 0 }
    ));
}

#[test]
fn clean_exit_delivers_zero_zero() {
    let runtime = Runtime::new();
    let reactor = runtime.reactor().clone();

    let outcome = runtime
        .block_on(spawn(&reactor, "sh", sh("exit 0")))
        .unwrap();
    assert!(matches!(
        outcome,
        ProcessOutcome::Completed { status: 0, signal: 0 }
    ));
}

#[test]
fn spawning_a_missing_program_is_an_allocation_error() {
    let runtime = Runtime::new();
    let reactor = runtime.reactor().clone();

    let err = reactor
        .spawn_process("definitely-not-a-real-program", ProcessOptions::default())
        .unwrap_err();
    assert!(matches!(err, RouseError::Allocation(_)));
    drop(runtime);
}

#[test]
fn kill_after_the_child_was_reaped_reports_no_such_process() {
    let runtime = Runtime::new();
    let reactor = runtime.reactor().clone();

    runtime.block_on(async {
        let process = reactor.spawn_process("sh", sh("exit 0")).unwrap();
        process.actor().await_signal().await.unwrap();

        // Reaped and forgotten; the pid must not be reused for a signal.
        let err = process.kill(libc::SIGTERM).unwrap_err();
        assert!(matches!(err, RouseError::Reactor(_)));
        assert_eq!(
            process.actor().state().unwrap(),
            Some(rouse::ActorState::Active)
        );
    });
}

#[test]
fn death_by_signal_arrives_as_the_signal_half() {
    let runtime = Runtime::new();
    let reactor = runtime.reactor().clone();

    let outcome = runtime
        .block_on(spawn(&reactor, "sh", sh("kill -TERM $$")))
        .unwrap();
    assert!(matches!(
        outcome,
        ProcessOutcome::Completed {
            status: 0,
            signal
        } if signal == libc::SIGTERM
    ));
}

#[test]
fn piped_stdout_is_readable_after_the_exit_wake() {
    let runtime = Runtime::new();
    let reactor = runtime.reactor().clone();
    let stdout = PipeRef::new(&reactor);

    let mut options = sh("printf hello");
    options.stdout = StdioBinding::Piped(stdout.clone());

    runtime.block_on(async {
        let outcome = spawn(&reactor, "sh", options).await.unwrap();
        assert!(matches!(
            outcome,
            ProcessOutcome::Completed { status: 0, .. }
        ));
        // Output was drained into the pipe before the exit rouse, so this
        // read never parks.
        assert_eq!(stdout.read().await.unwrap(), b"hello");
    });
}

#[test]
fn prewritten_stdin_reaches_the_child() {
    let runtime = Runtime::new();
    let reactor = runtime.reactor().clone();
    let stdin = PipeRef::new(&reactor);
    let stdout = PipeRef::new(&reactor);

    stdin.write(b"in one ").unwrap();
    stdin.write(b"buffer").unwrap();

    let mut options = sh("cat");
    options.stdin = StdioBinding::Piped(stdin);
    options.stdout = StdioBinding::Piped(stdout.clone());

    runtime.block_on(async {
        spawn(&reactor, "sh", options).await.unwrap();
        assert_eq!(stdout.read().await.unwrap(), b"in one buffer");
    });
}

#[test]
fn chatty_child_streams_output_before_exit() {
    init_tracing();
    let runtime = Runtime::new();
    let reactor = runtime.reactor().clone();
    let stdout = PipeRef::new(&reactor);

    // Well past the OS pipe capacity; the child can only finish if the
    // reactor drains its output while it runs.
    let mut options = sh("head -c 262144 /dev/zero");
    options.stdout = StdioBinding::Piped(stdout.clone());

    runtime.block_on(async {
        let process = reactor.spawn_process("sh", options).unwrap();
        let raced = timeout(&reactor, Duration::from_secs(5), process.actor())
            .await
            .unwrap();
        assert!(raced.is_some(), "exit never delivered: child wedged on a full pipe");

        let mut total = 0;
        while total < 262_144 {
            total += stdout.read().await.unwrap().len();
        }
        assert_eq!(total, 262_144);
    });
}

#[test]
fn large_stdin_streams_to_the_child_without_wedging() {
    init_tracing();
    let runtime = Runtime::new();
    let reactor = runtime.reactor().clone();
    let stdin = PipeRef::new(&reactor);
    let stdout = PipeRef::new(&reactor);

    let payload = vec![b'z'; 262_144];
    stdin.write(&payload).unwrap();

    let mut options = sh("cat");
    options.stdin = StdioBinding::Piped(stdin);
    options.stdout = StdioBinding::Piped(stdout.clone());

    runtime.block_on(async {
        let outcome = spawn(&reactor, "sh", options).await.unwrap();
        assert!(matches!(
            outcome,
            ProcessOutcome::Completed { status: 0, signal: 0 }
        ));

        let mut total = 0;
        while total < payload.len() {
            total += stdout.read().await.unwrap().len();
        }
        assert_eq!(total, payload.len());
    });
}

#[test]
fn early_closed_child_is_still_reaped() {
    init_tracing();
    let runtime = Runtime::new();
    let reactor = runtime.reactor().clone();

    runtime.block_on(async {
        let process = reactor.spawn_process("sh", sh("exit 0")).unwrap();
        let pid = process.pid().unwrap() as i32;
        process.close().unwrap();

        // The child exits on its own; the reactor must collect it even
        // though its actor is gone.
        sleep(&reactor, Duration::from_millis(200)).await.unwrap();

        let mut status = 0;
        // Safety: WNOHANG waitpid on a pid this test spawned; never blocks.
        let rv = unsafe { libc::waitpid(pid, &mut status, libc::WNOHANG) };
        assert_eq!(rv, -1, "child was left as a zombie");
    });
}

#[test]
fn detached_children_return_immediately_and_close_never_kills() {
    init_tracing();
    let runtime = Runtime::new();
    let reactor = runtime.reactor().clone();

    let mut options = sh("sleep 30");
    options.detach = true;

    runtime.block_on(async {
        let outcome = spawn(&reactor, "sh", options).await.unwrap();
        let ProcessOutcome::Detached(process) = outcome else {
            panic!("expected a detached handle");
        };

        // The handle stays usable for explicit signaling after close is
        // *not* called; reap it ourselves so the test leaves nothing behind.
        process.kill(libc::SIGKILL).unwrap();
        process.close().unwrap();

        // Closing released the handle; the child is no longer addressable.
        let err = process.kill(libc::SIGKILL).unwrap_err();
        assert!(matches!(err, RouseError::Reactor(_)));
    });
}

#[test]
fn kill_with_an_invalid_signal_reports_the_os_error() {
    let runtime = Runtime::new();
    let reactor = runtime.reactor().clone();

    runtime.block_on(async {
        let process = reactor.spawn_process("sh", sh("sleep 30")).unwrap();

        let err = process.kill(-1).unwrap_err();
        assert!(matches!(err, RouseError::Reactor(_)));

        process.kill(libc::SIGKILL).unwrap();
        let values = process.actor().await_signal().await.unwrap();
        assert_eq!(values[1].as_number().unwrap() as i32, libc::SIGKILL);
    });
}

#[test]
fn racing_a_slow_child_against_a_timer_times_out() {
    let runtime = Runtime::new();
    let reactor = runtime.reactor().clone();

    runtime.block_on(async {
        let process = reactor.spawn_process("sh", sh("sleep 30")).unwrap();

        let raced = timeout(&reactor, Duration::from_millis(20), process.actor())
            .await
            .unwrap();
        assert!(raced.is_none());

        process.kill(libc::SIGKILL).unwrap();
        let values = process.actor().await_signal().await.unwrap();
        assert_eq!(values[1].as_number().unwrap() as i32, libc::SIGKILL);
    });
}
