//! A mock of architecture specific features when running in user space.
//!
//! This implementation is backed by the userspace machine model, see [crate::userspace].

use core::sync::atomic::Ordering;

use super::{Architecture, IrqLevel, StatusRegister, TrapHandler};
use crate::jump_table::{JumpTable, ProbeRecord, ProbeRoutine};
use crate::userspace::{
    self, EXCEPTION_SLOT, HID0, HID1, IRQ_MASK_DEPTH, JUMP_TABLE_BASE, JUMP_TABLE_END, PVR,
};

/// User space mock, running on the host architecture.
pub struct HostArch {}

impl Architecture for HostArch {
    fn read_pvr() -> usize {
        PVR.load(Ordering::SeqCst)
    }

    fn read_status(reg: StatusRegister) -> usize {
        userspace::read_hid(reg)
    }

    unsafe fn write_status(reg: StatusRegister, value: usize) {
        match reg {
            StatusRegister::Hid0 => HID0.store(value, Ordering::SeqCst),
            StatusRegister::Hid1 => HID1.store(value, Ordering::SeqCst),
        }
    }

    fn disable_interrupts() -> IrqLevel {
        // Several host threads may mask concurrently, so we count instead of saving a flag.
        IrqLevel(IRQ_MASK_DEPTH.fetch_add(1, Ordering::SeqCst))
    }

    fn restore_interrupts(_level: IrqLevel) {
        IRQ_MASK_DEPTH.fetch_sub(1, Ordering::SeqCst);
    }

    fn memory_barrier() {
        core::sync::atomic::fence(Ordering::SeqCst);
    }

    fn exception_handler() -> Option<TrapHandler> {
        match EXCEPTION_SLOT.load(Ordering::SeqCst) {
            0 => None,
            // SAFETY: the slot only ever holds 0 or a `TrapHandler`.
            raw => Some(unsafe { core::mem::transmute::<usize, TrapHandler>(raw) }),
        }
    }

    unsafe fn set_exception_handler(handler: Option<TrapHandler>) {
        let raw = handler.map_or(0, |h| h as usize);
        EXCEPTION_SLOT.store(raw, Ordering::SeqCst);
    }

    fn jump_table() -> JumpTable {
        JumpTable {
            start: JUMP_TABLE_BASE,
            end: JUMP_TABLE_END,
        }
    }

    unsafe fn run_probe(
        routine: ProbeRoutine,
        record: *mut ProbeRecord,
        from: *const u8,
        to: *mut u8,
    ) {
        userspace::run_probe(routine, record, from, to)
    }
}
