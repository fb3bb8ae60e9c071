//! Region tracing for Linux processes via software breakpoints.
//!
//! Remora instruments a tracee by patching a trap instruction over the
//! entry of each traced code region. When the tracee hits one, the engine
//! rewinds it onto the displaced byte, restores the original instruction,
//! reports which regions fired as [`Event`]s, and arms each region's
//! complementary edge. A region's exit address is not known statically:
//! it is the caller's return address, read from the tracee's stack at
//! entry, so every invocation arms a fresh exit trap and no disassembly
//! is ever needed.
//!
//! The supervisor owns the `wait(2)` loop. After each trap-signal stop it
//! calls [`Proc::handle_trap`], decides which signal (if any) to
//! redeliver, and resumes the tracee with [`Proc::cont`]. One supervisor
//! thread per tracee: the kernel requires all tracing operations on a
//! task to come from the thread that attached to it.
//!
//! x86_64 Linux only. The architecture-specific surface (trap opcode,
//! rewind distance, register fields) is collected in [`x86`].

pub mod breakpoint;
pub mod error;
pub mod proc;
pub mod region;
pub mod tracer;
pub mod x86;

#[doc(inline)]
pub use breakpoint::BreakpointTable;

#[doc(inline)]
pub use error::{Error, Result};

#[doc(inline)]
pub use proc::{Event, Proc, TRACE_OPTIONS};

#[doc(inline)]
pub use region::{AddrRegion, FixedOffset, FuncRegion, PieResolver, Region, RegionState};

#[doc(inline)]
pub use tracer::{Options, Pid, Signal, Tracer};
