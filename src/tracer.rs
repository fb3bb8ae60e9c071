//! A typed handle over the kernel's per-task tracing primitives.

use std::marker::PhantomData;
use std::mem;

use nix::errno::Errno;
use nix::sys::ptrace;
use tracing::trace;

use crate::error::{ErrnoExt, Result};
use crate::x86::Registers;

pub use nix::sys::ptrace::Options;

/// POSIX signal.
pub use nix::sys::signal::Signal;

pub use nix::unistd::Pid;

/// Transfer unit of `PTRACE_PEEKDATA`/`PTRACE_POKEDATA`.
const WORD: usize = mem::size_of::<libc::c_long>();

/// Handle for issuing tracing operations against a single traced task.
///
/// Every operation must be issued from the thread the task is attached
/// to; the kernel rejects calls from elsewhere, which surfaces here as
/// [`NotTraced`](crate::Error::NotTraced). The handle is deliberately
/// not `Send`, so it cannot be moved off that thread.
#[derive(Debug)]
pub struct Tracer {
    pid: Pid,

    #[doc(hidden)]
    _not_send: PhantomData<*const ()>,
}

impl Tracer {
    /// Wrap an already-traced task.
    ///
    /// This does not attach: the task must have requested tracing itself
    /// (`PTRACE_TRACEME`), or been auto-attached as the child of a traced
    /// fork or clone.
    pub fn new(pid: Pid) -> Self {
        let _not_send = PhantomData;

        Self { pid, _not_send }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Read `len` bytes of tracee memory at `addr`.
    pub fn peek(&self, addr: u64, len: usize) -> Result<Vec<u8>> {
        let mut data = Vec::with_capacity(len);

        while data.len() < len {
            let at = addr + data.len() as u64;
            let bytes = self.peek_word(at)?.to_ne_bytes();
            let take = WORD.min(len - data.len());
            data.extend_from_slice(&bytes[..take]);
        }

        Ok(data)
    }

    /// Read one pointer-sized word of tracee memory at `addr`.
    pub fn peek_u64(&self, addr: u64) -> Result<u64> {
        Ok(self.peek_word(addr)? as u64)
    }

    /// Write `data` into tracee memory at `addr`.
    ///
    /// Valid over executable pages while the task is traced. The kernel
    /// interface is word-granular, so a partial trailing word is read
    /// back first and the neighboring bytes are preserved.
    pub fn poke(&mut self, addr: u64, data: &[u8]) -> Result<()> {
        let mut off = 0;

        while off < data.len() {
            let at = addr + off as u64;
            let rest = data.len() - off;

            let word = if rest < WORD {
                let mut bytes = self.peek_word(at)?.to_ne_bytes();
                bytes[..rest].copy_from_slice(&data[off..]);
                libc::c_long::from_ne_bytes(bytes)
            } else {
                let mut bytes = [0u8; WORD];
                bytes.copy_from_slice(&data[off..off + WORD]);
                libc::c_long::from_ne_bytes(bytes)
            };

            ptrace::write(self.pid, addr_ptr(at), word).memory(self.pid, at)?;

            off += rest.min(WORD);
        }

        Ok(())
    }

    fn peek_word(&self, addr: u64) -> Result<libc::c_long> {
        ptrace::read(self.pid, addr_ptr(addr)).memory(self.pid, addr)
    }

    /// Whole-file register read.
    pub fn get_regs(&self) -> Result<Registers> {
        ptrace::getregs(self.pid).register(self.pid)
    }

    /// Whole-file register write.
    pub fn set_regs(&mut self, regs: Registers) -> Result<()> {
        ptrace::setregs(self.pid, regs).register(self.pid)
    }

    /// Convert a `TRACEME`-style attach into a seized attach carrying
    /// `options`, and resume the tracee.
    ///
    /// Detaches, re-attaches with `PTRACE_SEIZE`, then requests a
    /// `PTRACE_INTERRUPT` stop. Seizing is what makes group-stops
    /// reportable as such and [`listen`](Tracer::listen) legal, and the
    /// interrupt produces a trap-signal stop the caller must consume with
    /// `wait` before continuing the tracee for real.
    pub fn reattach_and_continue(&mut self, options: Options) -> Result<()> {
        trace!(pid = self.pid.as_raw(), ?options, "reattaching with seize");

        ptrace::detach(self.pid, None).control(self.pid)?;
        ptrace::seize(self.pid, options).control(self.pid)?;
        ptrace::interrupt(self.pid).control(self.pid)
    }

    /// Resume the tracee, redelivering `signal` if one is given.
    pub fn cont(&mut self, signal: Option<Signal>) -> Result<()> {
        ptrace::cont(self.pid, signal).control(self.pid)
    }

    /// Acknowledge a group-stop without resuming execution.
    ///
    /// The tracee stays stopped but becomes observable again, so a later
    /// `SIGCONT` is seen by the next `wait`. nix has no wrapper for
    /// `PTRACE_LISTEN`, so this drops to the raw syscall.
    pub fn listen(&mut self) -> Result<()> {
        let res = unsafe { libc::ptrace(libc::PTRACE_LISTEN, self.pid.as_raw(), 0, 0) };

        Errno::result(res).map(drop).control(self.pid)
    }
}

fn addr_ptr(addr: u64) -> ptrace::AddressType {
    addr as usize as ptrace::AddressType
}
