//! Bare metal PowerPC

use core::arch::{asm, global_asm};
use core::ptr;

use super::{Architecture, IrqLevel, StatusRegister, TrapHandler};
use crate::arch::msr;
use crate::jump_table::{JumpTable, ProbeRecord, ProbeRoutine};

/// Bare metal PowerPC runtime, running under the RTEMS BSP exception layer.
pub struct MetalArch {}

impl Architecture for MetalArch {
    fn read_pvr() -> usize {
        let pvr: usize;
        unsafe {
            asm!(
                "mfspr {x}, 287",
                x = out(reg) pvr,
                options(nomem, nostack));
        }
        pvr
    }

    fn read_status(reg: StatusRegister) -> usize {
        let value: usize;
        unsafe {
            match reg {
                StatusRegister::Hid0 => asm!(
                    "mfspr {x}, {spr}",
                    x = out(reg) value,
                    spr = const StatusRegister::Hid0.spr(),
                    options(nomem, nostack)),
                StatusRegister::Hid1 => asm!(
                    "mfspr {x}, {spr}",
                    x = out(reg) value,
                    spr = const StatusRegister::Hid1.spr(),
                    options(nomem, nostack)),
            }
        }
        value
    }

    unsafe fn write_status(reg: StatusRegister, value: usize) {
        match reg {
            StatusRegister::Hid0 => asm!(
                "sync",
                "mtspr {spr}, {x}",
                "isync",
                x = in(reg) value,
                spr = const StatusRegister::Hid0.spr(),
                options(nostack)),
            StatusRegister::Hid1 => asm!(
                "sync",
                "mtspr {spr}, {x}",
                "isync",
                x = in(reg) value,
                spr = const StatusRegister::Hid1.spr(),
                options(nostack)),
        }
    }

    fn disable_interrupts() -> IrqLevel {
        let msr: usize;
        unsafe {
            asm!(
                "mfmsr {x}",
                x = out(reg) msr,
                options(nomem, nostack));
            asm!(
                "mtmsr {x}",
                x = in(reg) msr & !msr::EE,
                options(nostack));
        }
        IrqLevel(msr)
    }

    fn restore_interrupts(level: IrqLevel) {
        // Only EE is restored, the rest of the MSR may have changed since
        if level.0 & msr::EE == 0 {
            return;
        }
        unsafe {
            let current: usize;
            asm!(
                "mfmsr {x}",
                x = out(reg) current,
                options(nomem, nostack));
            asm!(
                "mtmsr {x}",
                x = in(reg) current | msr::EE,
                options(nostack));
        }
    }

    fn memory_barrier() {
        unsafe { asm!("sync", options(nostack)) }
    }

    fn exception_handler() -> Option<TrapHandler> {
        // SAFETY: the slot is a single aligned word, updated with interrupts masked.
        unsafe { ptr::addr_of!(globalExceptHdl).read_volatile() }
    }

    unsafe fn set_exception_handler(handler: Option<TrapHandler>) {
        ptr::addr_of_mut!(globalExceptHdl).write_volatile(handler)
    }

    fn jump_table() -> JumpTable {
        JumpTable {
            start: memprobe_byte as usize,
            end: memprobe_end as usize,
        }
    }

    unsafe fn run_probe(
        routine: ProbeRoutine,
        record: *mut ProbeRecord,
        from: *const u8,
        to: *mut u8,
    ) {
        match routine {
            ProbeRoutine::Byte => memprobe_byte(record, from, to),
            ProbeRoutine::Half => memprobe_half(record, from, to),
            ProbeRoutine::Word => memprobe_word(record, from, to),
        }
    }
}

extern "C" {
    /// The BSP global exception slot, called by the low-level exception prologue.
    static mut globalExceptHdl: Option<TrapHandler>;

    fn memprobe_byte(record: *mut ProbeRecord, from: *const u8, to: *mut u8);
    fn memprobe_half(record: *mut ProbeRecord, from: *const u8, to: *mut u8);
    fn memprobe_word(record: *mut ProbeRecord, from: *const u8, to: *mut u8);
    fn memprobe_end();
}

// —————————————————————————————— Jump Table ———————————————————————————————— //

// Each routine copies one unit from r4 to r5, r3 holds the probe record and is left untouched so
// that the exception interceptor can flag the fault through it.
//
// Once the access is issued the shared tail leaves time for the host bridge to assert the machine
// check pin before returning. `memprobe_end` is the upper bound of the range checked by the
// interceptor, the `blr` it labels must never fault.
global_asm!(
    r#"
.text
.global memprobe_byte, memprobe_half, memprobe_word, memprobe_end
memprobe_byte:
    lbz %r4, 0(%r4)
    stb %r4, 0(%r5)
    b 1f
memprobe_half:
    lhz %r4, 0(%r4)
    sth %r4, 0(%r5)
    b 1f
memprobe_word:
    lwz %r4, 0(%r4)
    stw %r4, 0(%r5)
1:  sync
    nop
    nop
    nop
    nop
    nop
    nop
    nop
    nop
    sync
memprobe_end:
    blr
"#
);
