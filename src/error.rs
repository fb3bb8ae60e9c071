use std::io;

use nix::errno::Errno;
use nix::sys::signal::Signal;
use nix::unistd::Pid;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A trap fired at an address with no saved original bytes. Either the
    /// region model is wrong, or the tracee took a trap we did not install.
    #[error("No breakpoint installed at address = {addr:#x}")]
    InvalidBreakpoint { addr: u64 },

    #[error("Could not access memory of tracee = {pid} at address = {addr:#x}")]
    MemoryAccess { pid: Pid, addr: u64, source: Errno },

    #[error("Could not access registers of tracee = {pid}")]
    RegisterAccess { pid: Pid, source: Errno },

    /// The task is gone, or is not traced by the calling thread. The
    /// kernel reports both the same way.
    #[error("Task = {pid} is not traced by this thread")]
    NotTraced { pid: Pid, source: Errno },

    #[error("Tracing syscall was interrupted")]
    SyscallInterrupted { source: Errno },

    /// The region's end-address function failed, e.g. reading the return
    /// address at `[sp]` hit unmapped memory. The region is left with no
    /// armed breakpoint.
    #[error("Could not resolve end address for region = {id}")]
    RegionEndUnresolved { id: usize, source: Box<Error> },

    /// The synthetic attach-stop arrived with a non-trap signal.
    #[error("Expected trap-signal stop at attach, got signal = {signal:?}")]
    UnexpectedStop { signal: Signal },

    /// The active-region state machine reached a value outside
    /// {Start, End}. Unreachable with the current state type; kept so
    /// downstream matchers have a stable kind for it.
    #[error("Active region in invalid state")]
    InvalidState,

    #[error("Could not spawn tracee")]
    Spawn { source: io::Error },

    #[error("Error waiting on tracee = {pid}")]
    Wait { pid: Pid, source: Errno },
}

// Fold an errno from one tracing syscall into the error kind for that
// operation's category. `ESRCH` and `EINTR` mean the same thing whatever
// the operation was.
pub(crate) trait ErrnoExt<T> {
    fn memory(self, pid: Pid, addr: u64) -> Result<T>;
    fn register(self, pid: Pid) -> Result<T>;
    fn control(self, pid: Pid) -> Result<T>;
}

impl<T> ErrnoExt<T> for std::result::Result<T, Errno> {
    fn memory(self, pid: Pid, addr: u64) -> Result<T> {
        self.map_err(|source| match source {
            Errno::ESRCH => Error::NotTraced { pid, source },
            Errno::EINTR => Error::SyscallInterrupted { source },
            source => Error::MemoryAccess { pid, addr, source },
        })
    }

    fn register(self, pid: Pid) -> Result<T> {
        self.map_err(|source| match source {
            Errno::ESRCH => Error::NotTraced { pid, source },
            Errno::EINTR => Error::SyscallInterrupted { source },
            source => Error::RegisterAccess { pid, source },
        })
    }

    fn control(self, pid: Pid) -> Result<T> {
        self.map_err(|source| match source {
            Errno::EINTR => Error::SyscallInterrupted { source },
            source => Error::NotTraced { pid, source },
        })
    }
}
