//! Exception frames

use core::fmt;

/// An exception handler, as stored in the OS global exception slot.
pub type TrapHandler = unsafe extern "C" fn(frame: *mut ExceptionFrame);

// ————————————————————————————— Exception Frame ———————————————————————————— //

/// The CPU context saved by the OS when an exception is raised.
///
/// The layout is shared with the low-level exception prologue of the BSP, do not reorder.
#[repr(C)]
#[derive(Clone, Debug, Default)]
pub struct ExceptionFrame {
    /// Save/restore register 0: the pc the exception returns to.
    pub srr0: usize,
    /// Save/restore register 1: saved MSR plus exception specific status bits.
    pub srr1: usize,
    /// The exception vector offset.
    pub vector: usize,
    pub cr: usize,
    pub ctr: usize,
    pub xer: usize,
    pub lr: usize,
    /// Data address register, not valid for machine checks.
    pub dar: usize,
    /// General purpose registers.
    pub gpr: [usize; 32],
}

impl ExceptionFrame {
    /// The pc of the instruction the exception returns to.
    pub fn pc(&self) -> usize {
        self.srr0
    }

    pub fn fault_class(&self) -> FaultClass {
        FaultClass::from_srr1(self.srr1)
    }

    pub fn vector(&self) -> Vector {
        Vector::new(self.vector)
    }
}

/// Status bits of SRR1 on a machine check.
pub mod srr1 {
    /// Transfer error acknowledge
    pub const TEA: usize = 1 << (31 - 13);
    /// Machine check pin
    pub const MCP: usize = 1 << (31 - 12);
}

/// What kind of bus event raised an exception, according to SRR1.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FaultClass {
    /// Transfer error acknowledge, signaled by the bus.
    Tea,
    /// Machine check signaled by the host bridge.
    Mcp,
    /// Anything else, such as a synchronous data access exception.
    Other,
}

impl FaultClass {
    pub fn from_srr1(srr1: usize) -> Self {
        if srr1 & srr1::TEA != 0 {
            FaultClass::Tea
        } else if srr1 & srr1::MCP != 0 {
            FaultClass::Mcp
        } else {
            FaultClass::Other
        }
    }

    /// Whether the host bridge latched an error that needs clearing.
    pub fn is_bus_error(self) -> bool {
        matches!(self, FaultClass::Tea | FaultClass::Mcp)
    }
}

// ———————————————————————————————— Vectors ————————————————————————————————— //

/// Exception vector offsets.
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum Vector {
    SystemReset = 0x100,
    MachineCheck = 0x200,
    DataAccess = 0x300,
    InstrAccess = 0x400,
    External = 0x500,
    Alignment = 0x600,
    Program = 0x700,
    FpUnavailable = 0x800,
    Decrementer = 0x900,
    SystemCall = 0xc00,
    Trace = 0xd00,
    InstrBreakpoint = 0x1300,
    Unknown,
}

impl Vector {
    pub fn new(offset: usize) -> Self {
        match offset {
            0x100 => Vector::SystemReset,
            0x200 => Vector::MachineCheck,
            0x300 => Vector::DataAccess,
            0x400 => Vector::InstrAccess,
            0x500 => Vector::External,
            0x600 => Vector::Alignment,
            0x700 => Vector::Program,
            0x800 => Vector::FpUnavailable,
            0x900 => Vector::Decrementer,
            0xc00 => Vector::SystemCall,
            0xd00 => Vector::Trace,
            0x1300 => Vector::InstrBreakpoint,
            _ => Vector::Unknown,
        }
    }
}

impl fmt::Debug for Vector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Vector::SystemReset => write!(f, "system reset"),
            Vector::MachineCheck => write!(f, "machine check"),
            Vector::DataAccess => write!(f, "data access"),
            Vector::InstrAccess => write!(f, "instruction access"),
            Vector::External => write!(f, "external interrupt"),
            Vector::Alignment => write!(f, "alignment"),
            Vector::Program => write!(f, "program"),
            Vector::FpUnavailable => write!(f, "floating-point unavailable"),
            Vector::Decrementer => write!(f, "decrementer"),
            Vector::SystemCall => write!(f, "system call"),
            Vector::Trace => write!(f, "trace"),
            Vector::InstrBreakpoint => write!(f, "instruction address breakpoint"),
            Vector::Unknown => write!(f, "unknown exception"),
        }
    }
}

// ————————————————————————————————— Tests —————————————————————————————————— //

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_srr1() {
        assert_eq!(FaultClass::from_srr1(srr1::TEA), FaultClass::Tea);
        assert_eq!(FaultClass::from_srr1(srr1::MCP | 0x3032), FaultClass::Mcp);
        assert_eq!(FaultClass::from_srr1(0x3032), FaultClass::Other);
        assert!(FaultClass::Tea.is_bus_error());
        assert!(!FaultClass::Other.is_bus_error());
    }

    #[test]
    fn frame_layout() {
        // 8 special registers followed by the 32 GPRs
        assert_eq!(
            core::mem::size_of::<ExceptionFrame>(),
            40 * core::mem::size_of::<usize>()
        );
        assert_eq!(core::mem::offset_of!(ExceptionFrame, gpr), 8 * core::mem::size_of::<usize>());
    }
}
