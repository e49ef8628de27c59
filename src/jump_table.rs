//! Probe routines
//!
//! The probe routines are tiny assembly functions, one per access width, that copy a single unit
//! from one address to another. They all live in one contiguous range of text, the jump table,
//! which lets the exception interceptor tell a probe fault apart from any other exception by
//! looking at the faulting pc alone.

use core::ptr;

use spin::Once;

use crate::arch::{Arch, Architecture};

/// Size of a PowerPC instruction, in bytes.
pub const INSTRUCTION_SIZE: usize = 4;

/// The general purpose register holding the probe record while a routine executes.
pub const PROBE_RECORD_GPR: usize = 3;

// ————————————————————————————— Access Widths —————————————————————————————— //

/// The width of a single probe access.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(usize)]
pub enum ProbeWidth {
    Byte = 1,
    Half = 2,
    Word = 4,
}

impl ProbeWidth {
    pub const fn bytes(self) -> usize {
        self as usize
    }

    pub const fn routine(self) -> ProbeRoutine {
        match self {
            ProbeWidth::Byte => ProbeRoutine::Byte,
            ProbeWidth::Half => ProbeRoutine::Half,
            ProbeWidth::Word => ProbeRoutine::Word,
        }
    }
}

impl TryFrom<usize> for ProbeWidth {
    /// The rejected size.
    type Error = usize;

    fn try_from(size: usize) -> Result<Self, Self::Error> {
        match size {
            1 => Ok(ProbeWidth::Byte),
            2 => Ok(ProbeWidth::Half),
            4 => Ok(ProbeWidth::Word),
            _ => Err(size),
        }
    }
}

/// Entries of the jump table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProbeRoutine {
    /// `lbz`/`stb`
    Byte,
    /// `lhz`/`sth`
    Half,
    /// `lwz`/`stw`
    Word,
}

impl ProbeRoutine {
    pub const fn width(self) -> ProbeWidth {
        match self {
            ProbeRoutine::Byte => ProbeWidth::Byte,
            ProbeRoutine::Half => ProbeWidth::Half,
            ProbeRoutine::Word => ProbeWidth::Word,
        }
    }
}

// ——————————————————————————————— Probe Record ————————————————————————————— //

/// Per-call fault record.
///
/// The record is owned by the caller of a probe routine and passed in r3. The interceptor never
/// touches the return value register, it writes the faulting pc through the record instead.
#[repr(C)]
#[derive(Debug, Default)]
pub struct ProbeRecord {
    fault_pc: usize,
}

impl ProbeRecord {
    pub const fn new() -> Self {
        ProbeRecord { fault_pc: 0 }
    }

    /// The pc of the faulting instruction, if the probe faulted.
    pub fn fault_pc(&self) -> Option<usize> {
        // SAFETY: the record is written behind the compiler's back by the exception handler.
        match unsafe { ptr::addr_of!(self.fault_pc).read_volatile() } {
            0 => None,
            pc => Some(pc),
        }
    }

    /// Flag a fault at `pc`.
    ///
    /// SAFETY:
    /// `record` must point to a live probe record, i.e. be the r3 of a probe routine that is
    /// currently executing.
    pub unsafe fn flag(record: *mut ProbeRecord, pc: usize) {
        ptr::addr_of_mut!((*record).fault_pc).write_volatile(pc)
    }
}

// ————————————————————————————————— Jump Table ————————————————————————————— //

/// The text range `[start, end)` covered by the probe routines.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct JumpTable {
    pub start: usize,
    pub end: usize,
}

static JUMP_TABLE: Once<JumpTable> = Once::new();

impl JumpTable {
    /// The jump table of the running image.
    pub fn get() -> JumpTable {
        *JUMP_TABLE.call_once(Arch::jump_table)
    }

    /// Whether `pc` lies within one of the probe routines.
    pub fn contains(&self, pc: usize) -> bool {
        pc >= self.start && pc < self.end
    }
}

/// Execute the probe routine, returning the faulting pc if the access faulted.
///
/// Exactly one of `from` and `to` is expected to be the probed address, the other must be a
/// buffer owned by the caller that is large enough for the routine's width.
pub(crate) fn run(routine: ProbeRoutine, from: *const u8, to: *mut u8) -> Option<usize> {
    let mut record = ProbeRecord::new();
    // SAFETY: the record outlives the call, the buffer is owned by our caller and faults on the
    // probed address are caught by the interceptor, which is installed before any probe runs.
    unsafe { Arch::run_probe(routine, &mut record, from, to) };
    Arch::memory_barrier();
    record.fault_pc()
}

// ————————————————————————————————— Tests —————————————————————————————————— //

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn width_from_size() {
        assert_eq!(ProbeWidth::try_from(1), Ok(ProbeWidth::Byte));
        assert_eq!(ProbeWidth::try_from(2), Ok(ProbeWidth::Half));
        assert_eq!(ProbeWidth::try_from(4), Ok(ProbeWidth::Word));
        assert_eq!(ProbeWidth::try_from(3), Err(3));
        assert_eq!(ProbeWidth::try_from(8), Err(8));
        assert_eq!(ProbeWidth::try_from(0), Err(0));

        for width in [ProbeWidth::Byte, ProbeWidth::Half, ProbeWidth::Word] {
            assert_eq!(width.routine().width(), width);
        }
    }

    #[test]
    fn record_flagging() {
        let mut record = ProbeRecord::new();
        assert_eq!(record.fault_pc(), None);
        unsafe { ProbeRecord::flag(&mut record, 0x1234) };
        assert_eq!(record.fault_pc(), Some(0x1234));
    }

    #[test]
    fn table_bounds() {
        let table = JumpTable::get();
        assert!(table.start < table.end);
        assert!(table.contains(table.start));
        assert!(table.contains(table.end - INSTRUCTION_SIZE));
        assert!(!table.contains(table.end));
        assert!(!table.contains(table.start - 1));
    }

    #[test]
    fn copy_between_host_buffers() {
        let from: u32 = 0xdead_beef;
        let mut to: u32 = 0;
        let fault = run(
            ProbeRoutine::Word,
            &from as *const u32 as *const u8,
            &mut to as *mut u32 as *mut u8,
        );
        assert_eq!(fault, None);
        assert_eq!(to, 0xdead_beef);
    }
}
