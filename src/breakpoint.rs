//! The breakpoint table: saved instruction bytes, keyed by address.

use std::collections::HashMap;

use tracing::trace;

use crate::error::{Error, Result};
use crate::tracer::Tracer;
use crate::x86::TRAP;

/// Map from patched tracee virtual address to the original instruction
/// bytes found there before the trap opcode was written.
///
/// While an address is present in the table, tracee memory at that
/// address holds the trap opcode. The table is keyed by address, not by
/// region: several regions armed at one address share a single physical
/// patch.
#[derive(Debug, Default)]
pub struct BreakpointTable {
    saved: HashMap<u64, Vec<u8>>,
}

impl BreakpointTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Patch a trap instruction at `addr`, saving the bytes it displaces.
    ///
    /// Idempotent: setting an address that is already patched is a no-op,
    /// and does not touch tracee memory again.
    pub fn set(&mut self, tracer: &mut Tracer, addr: u64) -> Result<()> {
        if self.saved.contains_key(&addr) {
            return Ok(());
        }

        let orig = tracer.peek(addr, TRAP.len())?;
        tracer.poke(addr, &TRAP)?;

        trace!(pid = tracer.pid().as_raw(), addr = %format_args!("{addr:#x}"), "installed breakpoint");

        self.saved.insert(addr, orig);
        Ok(())
    }

    /// Restore the original bytes at `addr` and drop the entry.
    ///
    /// Fails with [`Error::InvalidBreakpoint`] when `addr` was never
    /// patched. A failed restore leaves the tracee's code stream corrupt,
    /// so the entry is forgotten either way.
    pub fn remove(&mut self, tracer: &mut Tracer, addr: u64) -> Result<()> {
        let orig = self
            .saved
            .remove(&addr)
            .ok_or(Error::InvalidBreakpoint { addr })?;

        tracer.poke(addr, &orig)?;

        trace!(pid = tracer.pid().as_raw(), addr = %format_args!("{addr:#x}"), "removed breakpoint");

        Ok(())
    }

    /// Restore every patched address and empty the table.
    pub fn clear(&mut self, tracer: &mut Tracer) -> Result<()> {
        let addrs: Vec<u64> = self.saved.keys().copied().collect();

        for addr in addrs {
            self.remove(tracer, addr)?;
        }

        Ok(())
    }

    /// Record saved bytes for an address that is already patched in the
    /// tracee's address space, without issuing any memory syscalls.
    ///
    /// Used when a child inherits a parent's patched address space across
    /// fork or clone: the memory already carries the trap opcode, and the
    /// pre-patch bytes can only come from the parent's table.
    pub fn inherit(&mut self, addr: u64, orig: &[u8]) {
        self.saved.insert(addr, orig.to_vec());
    }

    pub fn contains(&self, addr: u64) -> bool {
        self.saved.contains_key(&addr)
    }

    pub fn len(&self) -> usize {
        self.saved.len()
    }

    pub fn is_empty(&self) -> bool {
        self.saved.is_empty()
    }

    /// Patched addresses, in no particular order.
    pub fn addrs(&self) -> impl Iterator<Item = u64> + '_ {
        self.saved.keys().copied()
    }

    /// The full address → original-bytes map.
    ///
    /// A supervisor hands this to [`Proc::attach`](crate::Proc::attach)
    /// when constructing the `Proc` for a newly forked child, so the
    /// child's table can restore bytes it never read itself.
    pub fn saved(&self) -> &HashMap<u64, Vec<u8>> {
        &self.saved
    }
}
