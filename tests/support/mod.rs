use std::io;
use std::os::unix::process::CommandExt;
use std::process::{Child, Command};

use nix::sys::ptrace;
use nix::sys::signal::Signal;
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::Pid;

/// Spawn `argv` with a pre-exec `PTRACE_TRACEME` request and consume the
/// exec stop, leaving the child stopped and traced by the calling thread.
#[allow(unused)]
pub fn spawn_stopped(argv: &[&str]) -> anyhow::Result<(Child, Pid)> {
    let mut cmd = Command::new(argv[0]);
    cmd.args(&argv[1..]);

    unsafe {
        cmd.pre_exec(|| ptrace::traceme().map_err(|err| io::Error::from_raw_os_error(err as i32)));
    }

    let child = cmd.spawn()?;
    let pid = Pid::from_raw(child.id() as i32);

    let status = waitpid(pid, None)?;
    assert!(
        matches!(status, WaitStatus::Stopped(_, Signal::SIGTRAP)),
        "expected exec stop, got {status:?}"
    );

    Ok((child, pid))
}

/// Current instruction and stack pointers of a stopped tracee.
#[allow(unused)]
pub fn pc_sp(pid: Pid) -> anyhow::Result<(u64, u64)> {
    let regs = ptrace::getregs(pid)?;
    Ok((regs.rip, regs.rsp))
}

/// Block until `pid` stops with the trap signal.
#[allow(unused)]
pub fn expect_trap(pid: Pid) -> anyhow::Result<()> {
    let status = waitpid(pid, None)?;
    assert!(
        matches!(status, WaitStatus::Stopped(_, Signal::SIGTRAP)),
        "expected trap stop, got {status:?}"
    );

    Ok(())
}

#[allow(unused)]
pub fn kill_and_reap(mut child: Child) -> anyhow::Result<()> {
    child.kill()?;
    child.wait()?;
    Ok(())
}
