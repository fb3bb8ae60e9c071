//! Region descriptors, and the capability they resolve addresses with.

use crate::error::Result;
use crate::proc::Proc;
use crate::tracer::Pid;

/// Which edge of a region the tracee has reached.
///
/// Per region, emitted states alternate `Start, End, Start, …` beginning
/// with `Start`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RegionState {
    Start,
    End,
}

/// A code region to trace.
///
/// The start address must be pure over the tracee's load offset, so it
/// can be recomputed whenever the region is rearmed. The end address is
/// resolved fresh on every entry and may fail; the only contract is that
/// the returned address is the instruction immediately after the region's
/// last executed instruction.
pub trait Region: Send + Sync {
    /// Absolute virtual address of the region's first instruction.
    fn start(&self, proc: &Proc) -> u64;

    /// Absolute virtual address the tracee reaches right after leaving
    /// the region, given the stack pointer observed at `start`.
    fn end(&self, sp: u64, proc: &Proc) -> Result<u64>;
}

/// A function region: entered at a fixed image offset, exited when the
/// caller's return address is reached.
///
/// The exit address is the return address at `[sp]` on entry, which is
/// where `call` left it. Each invocation therefore arms a fresh exit
/// breakpoint, and no disassembly is needed to find the function's end.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FuncRegion {
    /// Image offset of the function's first instruction.
    pub offset: u64,
}

impl Region for FuncRegion {
    fn start(&self, proc: &Proc) -> u64 {
        proc.pie_offset() + self.offset
    }

    fn end(&self, sp: u64, proc: &Proc) -> Result<u64> {
        proc.tracer().peek_u64(sp)
    }
}

/// A region bounded by two fixed image offsets.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AddrRegion {
    pub start: u64,
    pub end: u64,
}

impl Region for AddrRegion {
    fn start(&self, proc: &Proc) -> u64 {
        proc.pie_offset() + self.start
    }

    fn end(&self, _sp: u64, proc: &Proc) -> Result<u64> {
        Ok(proc.pie_offset() + self.end)
    }
}

/// Capability for discovering the base address a position-independent
/// executable was loaded at.
///
/// Implementations typically read `/proc/<pid>/…`, and must be safe to
/// query concurrently from sibling supervisor threads.
pub trait PieResolver: Send + Sync {
    /// Load offset added to image offsets to form virtual addresses.
    /// 0 for non-relocated executables.
    fn pie_offset(&self, pid: Pid) -> Result<u64>;
}

/// Resolver for targets whose load offset is already known, such as
/// non-PIE executables.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct FixedOffset(pub u64);

impl PieResolver for FixedOffset {
    fn pie_offset(&self, _pid: Pid) -> Result<u64> {
        Ok(self.0)
    }
}
