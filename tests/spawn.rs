//! The spawn path: TRACEME child, seized reattach, run to exit.

use std::process::Command;
use std::sync::Arc;

use anyhow::Result;
use nix::sys::signal::kill;
use nix::sys::wait::{waitpid, WaitStatus};
use ntest::timeout;
use pretty_assertions::assert_eq;
use remora::x86::TRAP;
use remora::{AddrRegion, Error, FixedOffset, Proc, Region, Signal, Tracer};

mod support;
use support::*;

#[test]
#[timeout(5000)]
fn test_spawn_runs_to_exit() -> Result<()> {
    let cmd = Command::new("true");

    let (mut proc, child) = Proc::spawn(cmd, &FixedOffset(0), &[])?;

    loop {
        match waitpid(proc.pid(), None)? {
            WaitStatus::Exited(_, code) => {
                proc.exit();
                assert_eq!(code, 0);
                break;
            }
            WaitStatus::Stopped(_, signal) => proc.cont(Some(signal), false)?,
            WaitStatus::PtraceEvent(..) => proc.cont(None, false)?,
            status => panic!("unexpected wait status: {status:?}"),
        }
    }

    // Exited tracees are no longer continued.
    proc.cont(None, false)?;

    // Already reaped by the wait loop above.
    drop(child);

    Ok(())
}

#[test]
#[timeout(5000)]
fn test_spawn_missing_target() -> Result<()> {
    let cmd = Command::new("/nonexistent/definitely-not-a-binary");

    let err = Proc::spawn(cmd, &FixedOffset(0), &[]).err().expect("spawn must fail");
    assert!(matches!(err, Error::Spawn { .. }));

    Ok(())
}

#[test]
#[timeout(5000)]
fn test_attach_stop_with_wrong_signal() -> Result<()> {
    let (child, pid) = spawn_stopped(&["sleep", "30"])?;
    let (pc, _sp) = pc_sp(pid)?;

    let tracer = Tracer::new(pid);
    let orig = tracer.peek(pc, TRAP.len())?;

    let regions: Vec<Arc<dyn Region>> = vec![Arc::new(AddrRegion { start: pc, end: pc })];
    let mut proc = Proc::attach(pid, &FixedOffset(0), &regions, None)?;
    assert!(proc.breakpoints().contains(pc));

    // Queue a stop signal while the tracee is still stopped, then resume:
    // the queued signal is delivered before the tracee executes a single
    // instruction, so the attach-stop wait observes it instead of the
    // trap.
    kill(pid, Signal::SIGSTOP)?;
    proc.cont(None, false)?;

    let err = proc.expect_attach_stop().unwrap_err();
    assert!(matches!(err, Error::UnexpectedStop { signal: Signal::SIGSTOP }));

    // The failed setup left no breakpoints installed.
    assert!(proc.breakpoints().is_empty());
    assert_eq!(proc.tracer().peek(pc, TRAP.len())?, orig);

    kill_and_reap(child)
}
