//! Architecture specific functions
//!
//! All direct interaction with PowerPC specific architecture features should live here: status
//! registers, the machine state register, memory barriers, the OS exception slot and the probe
//! routines themselves. When not building for PowerPC the architecture is emulated by the
//! userspace machine model, which is what the unit tests run against.

#[cfg(not(target_arch = "powerpc"))]
mod host;
#[cfg(target_arch = "powerpc")]
mod metal;
mod registers;
mod trap;

pub use registers::{hid, msr, CpuModel, StatusRegister};
pub use trap::{srr1, ExceptionFrame, FaultClass, TrapHandler, Vector};

use crate::jump_table::{JumpTable, ProbeRecord, ProbeRoutine};

// —————————————————————————— Select Architecture ——————————————————————————— //

/// PowerPC bare-metal runtime.
#[cfg(target_arch = "powerpc")]
pub type Arch = metal::MetalArch;

/// Host architecture, running in userspace.
#[cfg(not(target_arch = "powerpc"))]
pub type Arch = host::HostArch;

// ———————————————————————— Architecture Definition ————————————————————————— //

/// Architecture abstraction layer.
pub trait Architecture {
    /// Read the processor version register.
    fn read_pvr() -> usize;

    fn read_status(reg: StatusRegister) -> usize;

    /// Write one of the hardware implementation dependent registers.
    ///
    /// SAFETY:
    /// HID registers control caches, bus behavior and exception delivery, the caller must only
    /// flip bits it understands.
    unsafe fn write_status(reg: StatusRegister, value: usize);

    /// Mask external interrupts, returning the previous state.
    fn disable_interrupts() -> IrqLevel;

    /// Restore the interrupt state captured by [Architecture::disable_interrupts].
    fn restore_interrupts(level: IrqLevel);

    /// Full memory barrier (`sync`).
    fn memory_barrier();

    /// The handler currently installed in the OS global exception slot.
    fn exception_handler() -> Option<TrapHandler>;

    /// Replace the handler in the OS global exception slot.
    ///
    /// SAFETY:
    /// Every exception raised after this call is delivered to `handler`, the caller must make
    /// sure no exception can be raised while the slot is half-updated (i.e. interrupts are
    /// masked and a barrier follows the update).
    unsafe fn set_exception_handler(handler: Option<TrapHandler>);

    /// Return the address range covered by the probe routines.
    fn jump_table() -> JumpTable;

    /// Execute one of the probe routines, copying one unit from `from` to `to`.
    ///
    /// SAFETY:
    /// `record` must be valid for writes for the whole call, and one of `from`/`to` must point to
    /// memory owned by the caller. A fault on the other address is caught by the exception
    /// interceptor only if it is installed.
    unsafe fn run_probe(
        routine: ProbeRoutine,
        record: *mut ProbeRecord,
        from: *const u8,
        to: *mut u8,
    );
}

// ———————————————————————————— Helper Functions ———————————————————————————— //

/// Identify the CPU we are running on.
pub fn cpu_model() -> CpuModel {
    CpuModel::from_pvr(Arch::read_pvr())
}

/// Set `bits` in a status register (read-modify-write).
///
/// SAFETY:
/// See [Architecture::write_status].
pub unsafe fn set_status_bits(reg: StatusRegister, bits: usize) {
    let value = Arch::read_status(reg);
    Arch::write_status(reg, value | bits);
}

// ——————————————————————————— Interrupt Masking ———————————————————————————— //

/// An opaque interrupt state, as returned by [Architecture::disable_interrupts].
#[derive(Debug)]
#[must_use]
pub struct IrqLevel(usize);

/// Keeps external interrupts masked for as long as it is alive.
pub struct IrqGuard {
    level: Option<IrqLevel>,
}

impl IrqGuard {
    pub fn new() -> Self {
        IrqGuard {
            level: Some(Arch::disable_interrupts()),
        }
    }
}

impl Default for IrqGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for IrqGuard {
    fn drop(&mut self) {
        if let Some(level) = self.level.take() {
            Arch::restore_interrupts(level);
        }
    }
}
