use std::process::Command;
use std::sync::Arc;

use anyhow::Result;
use nix::sys::wait::{waitpid, WaitStatus};
use remora::{Event, FixedOffset, FuncRegion, Proc, Region, RegionState, Signal};
use structopt::StructOpt;

/// Trace enter/exit of one function in a spawned process.
#[derive(StructOpt, Debug)]
struct Opt {
    /// Image offset of the function to trace, e.g. 0x401000.
    #[structopt(short, long, parse(try_from_str = parse_hex))]
    func: u64,

    /// Load offset of the target image (0 for non-PIE executables).
    #[structopt(short, long, default_value = "0", parse(try_from_str = parse_hex))]
    pie: u64,

    #[structopt(min_values = 1)]
    argv: Vec<String>,
}

fn parse_hex(s: &str) -> Result<u64> {
    let s = s.trim_start_matches("0x");
    Ok(u64::from_str_radix(s, 16)?)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let opt = Opt::from_args();

    let mut cmd = Command::new(&opt.argv[0]);
    if let Some(args) = opt.argv.get(1..) {
        cmd.args(args);
    }

    let regions: Vec<Arc<dyn Region>> = vec![Arc::new(FuncRegion { offset: opt.func })];
    let (mut proc, _child) = Proc::spawn(cmd, &FixedOffset(opt.pie), &regions)?;

    loop {
        match waitpid(proc.pid(), None)? {
            WaitStatus::Exited(pid, code) => {
                proc.exit();
                println!("{pid}: exited with {code}");
                break;
            }
            WaitStatus::Signaled(pid, signal, _) => {
                proc.exit();
                println!("{pid}: killed by {signal:?}");
                break;
            }
            WaitStatus::Stopped(_, Signal::SIGTRAP) => {
                match proc.handle_trap() {
                    Ok(events) => {
                        for Event { id, state } in events {
                            match state {
                                RegionState::Start => println!("region {id}: enter"),
                                RegionState::End => println!("region {id}: exit"),
                            }
                        }
                        proc.cont(None, false)?;
                    }
                    Err(remora::Error::InvalidBreakpoint { .. }) => {
                        // A trap we did not install; the tracee gets it.
                        proc.cont(Some(Signal::SIGTRAP), false)?;
                    }
                    Err(err) => return Err(err.into()),
                }
            }
            WaitStatus::Stopped(_, signal) => {
                // Not ours; redeliver.
                proc.cont(Some(signal), false)?;
            }
            WaitStatus::PtraceEvent(_, _, event) if event == libc::PTRACE_EVENT_STOP => {
                // Group-stop: the tracee must stay stopped, but observable.
                proc.cont(None, true)?;
            }
            WaitStatus::PtraceEvent(..) => proc.cont(None, false)?,
            status => anyhow::bail!("unexpected wait status: {status:?}"),
        }
    }

    Ok(())
}
