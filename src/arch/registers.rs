//! PowerPC Registers

use core::fmt;

/// Hardware implementation dependent registers holding the machine check enable bit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusRegister {
    /// Hardware Implementation Dependent register 0
    Hid0,
    /// Hardware Implementation Dependent register 1
    Hid1,
}

impl StatusRegister {
    /// The special purpose register number.
    pub const fn spr(self) -> u16 {
        match self {
            StatusRegister::Hid0 => 1008,
            StatusRegister::Hid1 => 1009,
        }
    }
}

/// Bits of the HID registers.
pub mod hid {
    /// Enable the machine check pin (MCP).
    ///
    /// Bit 0 in IBM bit numbering. The 745x family moved the bit to HID1, at the same position.
    pub const EMCP: usize = 1 << 31;
}

/// Bits of the machine state register (MSR).
pub mod msr {
    /// External interrupt enable
    pub const EE: usize = 1 << 15;
}

// ——————————————————————————————— CPU Models ——————————————————————————————— //

/// CPU models, as identified by the upper half of the processor version register.
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum CpuModel {
    Ppc603,
    Ppc603e,
    Ppc603ev,
    Ppc604,
    Ppc604e,
    Ppc604r,
    Ppc750,
    Ppc7400,
    Ppc7455,
    Ppc7457,
    /// Also reported by the 8240
    Ppc8260,
    Ppc8245,
    Unknown(u16),
}

impl CpuModel {
    pub fn from_pvr(pvr: usize) -> Self {
        match (pvr >> 16) as u16 {
            0x0003 => CpuModel::Ppc603,
            0x0004 => CpuModel::Ppc604,
            0x0006 => CpuModel::Ppc603e,
            0x0007 => CpuModel::Ppc603ev,
            0x0008 => CpuModel::Ppc750,
            0x0009 => CpuModel::Ppc604e,
            0x000a => CpuModel::Ppc604r,
            0x000c => CpuModel::Ppc7400,
            0x0081 => CpuModel::Ppc8260,
            0x8001 => CpuModel::Ppc7455,
            0x8002 => CpuModel::Ppc7457,
            0x8081 => CpuModel::Ppc8245,
            version => CpuModel::Unknown(version),
        }
    }

    /// The status register holding the EMCP bit, if the model has one we know of.
    pub fn mcp_register(self) -> Option<StatusRegister> {
        match self {
            CpuModel::Ppc7455 | CpuModel::Ppc7457 => Some(StatusRegister::Hid1),
            CpuModel::Ppc7400
            | CpuModel::Ppc750
            | CpuModel::Ppc604
            | CpuModel::Ppc604e
            | CpuModel::Ppc604r
            | CpuModel::Ppc603
            | CpuModel::Ppc603e
            | CpuModel::Ppc603ev
            | CpuModel::Ppc8260
            | CpuModel::Ppc8245 => Some(StatusRegister::Hid0),
            CpuModel::Unknown(_) => None,
        }
    }
}

impl fmt::Debug for CpuModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CpuModel::Ppc603 => write!(f, "PPC603"),
            CpuModel::Ppc603e => write!(f, "PPC603e"),
            CpuModel::Ppc603ev => write!(f, "PPC603ev"),
            CpuModel::Ppc604 => write!(f, "PPC604"),
            CpuModel::Ppc604e => write!(f, "PPC604e"),
            CpuModel::Ppc604r => write!(f, "PPC604r"),
            CpuModel::Ppc750 => write!(f, "PPC750"),
            CpuModel::Ppc7400 => write!(f, "MPC7400"),
            CpuModel::Ppc7455 => write!(f, "MPC7455"),
            CpuModel::Ppc7457 => write!(f, "MPC7457"),
            CpuModel::Ppc8260 => write!(f, "MPC8260"),
            CpuModel::Ppc8245 => write!(f, "MPC8245"),
            CpuModel::Unknown(version) => write!(f, "unknown CPU (version 0x{:04x})", version),
        }
    }
}

// ————————————————————————————————— Tests —————————————————————————————————— //
