//! Patching a live tracee's text and restoring it.

use anyhow::Result;
use ntest::timeout;
use pretty_assertions::assert_eq;
use remora::x86::TRAP;
use remora::{BreakpointTable, Error, Tracer};

mod support;
use support::*;

#[test]
#[timeout(5000)]
fn test_set_and_remove_restores_text() -> Result<()> {
    let (child, pid) = spawn_stopped(&["sleep", "30"])?;
    let (pc, _sp) = pc_sp(pid)?;

    let mut tracer = Tracer::new(pid);
    let mut table = BreakpointTable::new();

    let orig = tracer.peek(pc, TRAP.len())?;

    table.set(&mut tracer, pc)?;

    assert!(table.contains(pc));
    assert_eq!(tracer.peek(pc, TRAP.len())?, TRAP.to_vec());
    assert_eq!(table.saved().get(&pc), Some(&orig));

    table.remove(&mut tracer, pc)?;

    assert!(!table.contains(pc));
    assert!(table.is_empty());
    assert_eq!(tracer.peek(pc, TRAP.len())?, orig);

    kill_and_reap(child)
}

#[test]
#[timeout(5000)]
fn test_set_is_idempotent() -> Result<()> {
    let (child, pid) = spawn_stopped(&["sleep", "30"])?;
    let (pc, _sp) = pc_sp(pid)?;

    let mut tracer = Tracer::new(pid);
    let mut table = BreakpointTable::new();

    let orig = tracer.peek(pc, TRAP.len())?;

    table.set(&mut tracer, pc)?;

    // Second set sees the address in the table and must not re-read the
    // (now patched) memory as "original" bytes.
    table.set(&mut tracer, pc)?;

    assert_eq!(table.len(), 1);
    assert_eq!(table.saved().get(&pc), Some(&orig));

    table.remove(&mut tracer, pc)?;
    assert_eq!(tracer.peek(pc, TRAP.len())?, orig);

    // The single entry is gone; removing again is an error.
    let err = table.remove(&mut tracer, pc).unwrap_err();
    assert!(matches!(err, Error::InvalidBreakpoint { addr } if addr == pc));

    kill_and_reap(child)
}

#[test]
#[timeout(5000)]
fn test_remove_unknown_address() -> Result<()> {
    let (child, pid) = spawn_stopped(&["sleep", "30"])?;

    let mut tracer = Tracer::new(pid);
    let mut table = BreakpointTable::new();

    let err = table.remove(&mut tracer, 0x4000_0000).unwrap_err();
    assert!(matches!(err, Error::InvalidBreakpoint { addr: 0x4000_0000 }));

    kill_and_reap(child)
}

#[test]
#[timeout(5000)]
fn test_peek_poke_round_trip() -> Result<()> {
    let (child, pid) = spawn_stopped(&["sleep", "30"])?;
    let (_pc, sp) = pc_sp(pid)?;

    let mut tracer = Tracer::new(pid);

    // An odd length forces the partial-word read-modify-write path.
    let data = [0xde, 0xad, 0xbe, 0xef, 0x55];
    let orig = tracer.peek(sp, data.len())?;

    tracer.poke(sp, &data)?;
    assert_eq!(tracer.peek(sp, data.len())?, data.to_vec());

    tracer.poke(sp, &orig)?;
    assert_eq!(tracer.peek(sp, orig.len())?, orig);

    kill_and_reap(child)
}
