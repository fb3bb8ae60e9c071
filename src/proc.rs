//! The per-tracee engine.
//!
//! A [`Proc`] owns the tracer handle, the breakpoint table, and the
//! runtime state of every traced region, and turns raw trap stops into
//! region-transition [`Event`]s. The supervisor owns the `wait` loop and
//! calls in after each stop.

use std::collections::HashMap;
use std::io;
use std::os::unix::process::CommandExt;
use std::process::{Child, Command};
use std::sync::Arc;

use nix::sys::ptrace;
use nix::sys::wait::{waitpid, WaitStatus};
use tracing::{debug, trace};

use crate::breakpoint::BreakpointTable;
use crate::error::{Error, Result};
use crate::region::{PieResolver, Region, RegionState};
use crate::tracer::{Options, Pid, Signal, Tracer};
use crate::x86;

/// Options installed on a spawned tracee when its `TRACEME`-style attach
/// is upgraded: kill the tracee if the tracer dies, and keep tracing
/// across clone, fork, vfork, and exec.
pub const TRACE_OPTIONS: Options = Options::empty()
    .union(Options::PTRACE_O_EXITKILL)
    .union(Options::PTRACE_O_TRACECLONE)
    .union(Options::PTRACE_O_TRACEFORK)
    .union(Options::PTRACE_O_TRACEVFORK)
    .union(Options::PTRACE_O_TRACEEXEC);

/// A change of state in one traced region.
///
/// `state` is the state the tracee just *entered*: `Start` means the
/// tracee reached the region's first instruction, `End` means it left.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Event {
    pub id: usize,
    pub state: RegionState,
}

// One region's runtime state: which edge fires next, and the address its
// trap is currently armed at. `armed` is `None` only after a failed end
// resolution.
struct ActiveRegion {
    region: Arc<dyn Region>,
    state: RegionState,
    armed: Option<u64>,
    id: usize,
}

/// A single traced task. On Linux this may be a process or a thread;
/// they are equivalent here apart from the visible address space.
///
/// At most one `Proc` exists per tracee, and it is pinned to the thread
/// that attached: the kernel rejects tracing calls from any other thread.
pub struct Proc {
    tracer: Tracer,
    pie_offset: u64,
    regions: Vec<ActiveRegion>,
    breakpoints: BreakpointTable,
    exited: bool,
}

impl Proc {
    /// Instrument an already-traced, stopped task.
    ///
    /// Region ids are positions in `regions`. For each region the start
    /// breakpoint is installed. When `inherited` already carries saved
    /// bytes for that address, the entry is copied without touching
    /// memory, since a task cloned from a traced parent starts life with
    /// the parent's patches already in its address space.
    pub fn attach(
        pid: Pid,
        pie: &dyn PieResolver,
        regions: &[Arc<dyn Region>],
        inherited: Option<&HashMap<u64, Vec<u8>>>,
    ) -> Result<Self> {
        let pie_offset = pie.pie_offset(pid)?;

        debug!(pid = pid.as_raw(), pie_offset = %format_args!("{pie_offset:#x}"), "instrumenting tracee");

        let mut proc = Self {
            tracer: Tracer::new(pid),
            pie_offset,
            regions: Vec::with_capacity(regions.len()),
            breakpoints: BreakpointTable::new(),
            exited: false,
        };

        for (id, region) in regions.iter().enumerate() {
            let start = region.start(&proc);

            match inherited.and_then(|saved| saved.get(&start)) {
                Some(orig) => proc.breakpoints.inherit(start, orig),
                None => proc.breakpoints.set(&mut proc.tracer, start)?,
            }

            proc.regions.push(ActiveRegion {
                region: Arc::clone(region),
                state: RegionState::Start,
                armed: Some(start),
                id,
            });
        }

        Ok(proc)
    }

    /// Spawn `cmd` as a new tracee and start it running.
    ///
    /// The child requests `PTRACE_TRACEME` pre-exec and std streams are
    /// inherited as configured on `cmd`. After the exec stop the start
    /// breakpoints are installed, the attach is upgraded to a seized one
    /// carrying [`TRACE_OPTIONS`], and the tracee is resumed. On return
    /// it is running; the caller waits for its stops.
    pub fn spawn(
        mut cmd: Command,
        pie: &dyn PieResolver,
        regions: &[Arc<dyn Region>],
    ) -> Result<(Self, Child)> {
        unsafe {
            cmd.pre_exec(|| {
                ptrace::traceme().map_err(|err| io::Error::from_raw_os_error(err as i32))
            });
        }

        let child = cmd.spawn().map_err(|source| Error::Spawn { source })?;
        let pid = Pid::from_raw(child.id() as i32);

        // The exec stop.
        wait_for_stop(pid)?;

        let mut proc = Self::attach(pid, pie, regions, None)?;
        proc.tracer.reattach_and_continue(TRACE_OPTIONS)?;
        proc.expect_attach_stop()?;

        Ok((proc, child))
    }

    /// Consume the synthetic attach-stop raised by
    /// [`Tracer::reattach_and_continue`] and start the tracee running.
    ///
    /// Anything but the trap signal here means setup has gone wrong: the
    /// patches installed so far are restored and the regions disarmed
    /// before [`Error::UnexpectedStop`] is surfaced, so a failed
    /// construction leaves no breakpoints behind.
    pub fn expect_attach_stop(&mut self) -> Result<()> {
        let signal = wait_for_stop(self.tracer.pid())?;

        if signal != Signal::SIGTRAP {
            self.breakpoints.clear(&mut self.tracer)?;
            for region in &mut self.regions {
                region.armed = None;
            }

            return Err(Error::UnexpectedStop { signal });
        }

        self.cont(None, false)
    }

    /// Handle a trap stop for this task.
    ///
    /// Rewinds the instruction pointer onto the patched address, restores
    /// the displaced instruction, and reports every region whose armed
    /// trap this was, in declared region order. Each reported region is
    /// advanced and rearmed at its complementary edge: on `Start` the end
    /// address is resolved from the entry stack pointer, on `End` the
    /// start address is recomputed.
    ///
    /// A trap at an address we never patched fails with
    /// [`Error::InvalidBreakpoint`], leaving the register file untouched.
    pub fn handle_trap(&mut self) -> Result<Vec<Event>> {
        let mut regs = self.tracer.get_regs()?;
        let pc = x86::pc(&regs).saturating_sub(x86::PC_REWIND);

        if !self.breakpoints.contains(pc) {
            return Err(Error::InvalidBreakpoint { addr: pc });
        }

        trace!(pid = self.tracer.pid().as_raw(), pc = %format_args!("{pc:#x}"), "trap");

        // The trap opcode already executed; re-run the original byte.
        x86::set_pc(&mut regs, pc);
        self.tracer.set_regs(regs)?;

        self.breakpoints.remove(&mut self.tracer, pc)?;

        let sp = x86::sp(&regs);
        let mut events = Vec::new();

        for i in 0..self.regions.len() {
            if self.regions[i].armed != Some(pc) {
                continue;
            }

            events.push(Event {
                id: self.regions[i].id,
                state: self.regions[i].state,
            });

            match self.regions[i].state {
                RegionState::Start => {
                    let region = Arc::clone(&self.regions[i].region);
                    let id = self.regions[i].id;

                    self.regions[i].state = RegionState::End;
                    self.regions[i].armed = None;

                    let end = region.end(sp, self).map_err(|source| {
                        Error::RegionEndUnresolved { id, source: Box::new(source) }
                    })?;

                    self.breakpoints.set(&mut self.tracer, end)?;
                    self.regions[i].armed = Some(end);
                }
                RegionState::End => {
                    let region = Arc::clone(&self.regions[i].region);
                    let start = region.start(self);

                    self.regions[i].state = RegionState::Start;
                    self.breakpoints.set(&mut self.tracer, start)?;
                    self.regions[i].armed = Some(start);
                }
            }
        }

        Ok(events)
    }

    /// Resume the tracee after a stop, or acknowledge a group-stop.
    ///
    /// `signal` is redelivered on resume; pass `None` when the stop was
    /// one of our own traps. When the waiter reported a group-stop the
    /// tracee must remain stopped, so it is only `listen`ed to. Once the
    /// tracee has exited this is a no-op.
    pub fn cont(&mut self, signal: Option<Signal>, group_stop: bool) -> Result<()> {
        if self.exited {
            return Ok(());
        }

        if group_stop {
            return self.tracer.listen();
        }

        self.tracer.cont(signal)
    }

    /// Record that the waiter observed this tracee's exit. All further
    /// continues become no-ops.
    pub fn exit(&mut self) {
        self.exited = true;
    }

    pub fn pid(&self) -> Pid {
        self.tracer.pid()
    }

    /// Load offset of the tracee image, fixed at attach.
    pub fn pie_offset(&self) -> u64 {
        self.pie_offset
    }

    /// The underlying tracer handle, for region descriptors that read
    /// tracee memory.
    pub fn tracer(&self) -> &Tracer {
        &self.tracer
    }

    /// Currently installed breakpoints.
    ///
    /// After a fork or clone stop, pass
    /// [`saved()`](BreakpointTable::saved) to [`Proc::attach`] for the
    /// child so its table can restore bytes it never read itself.
    pub fn breakpoints(&self) -> &BreakpointTable {
        &self.breakpoints
    }
}

// Block until `pid` stops, and report the stop signal. Group-stops and
// other ptrace-event stops report the signal the kernel tagged them with.
fn wait_for_stop(pid: Pid) -> Result<Signal> {
    match waitpid(pid, None) {
        Ok(WaitStatus::Stopped(_, signal)) => Ok(signal),
        Ok(WaitStatus::PtraceEvent(_, signal, _)) => Ok(signal),
        Ok(_) => Err(Error::NotTraced { pid, source: nix::errno::Errno::ESRCH }),
        Err(source) => Err(Error::Wait { pid, source }),
    }
}
