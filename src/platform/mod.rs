//! Board support
//!
//! The board provides the collaborators the probing logic relies on but cannot implement in a
//! generic way: clearing the error latches of the host bridge, catching hardware breakpoints, a
//! console and a panic routine.

#[cfg(target_arch = "powerpc")]
mod bsp;
#[cfg(target_arch = "powerpc")]
mod generic;
#[cfg(target_arch = "powerpc")]
mod rtems;
#[cfg(not(target_arch = "powerpc"))]
mod userspace;

use core::fmt;

use log::Level;

use crate::arch::ExceptionFrame;

// ———————————————————————————— Select Platform ————————————————————————————— //

/// The board we are building for.
#[cfg(target_arch = "powerpc")]
pub type Plat = config_select::select_env!["MEMPROBE_PLATFORM_NAME":
    "bsp" => bsp::BspPlatform
    _     => generic::GenericPlatform
];

/// The simulated board of the userspace machine model.
#[cfg(not(target_arch = "powerpc"))]
pub type Plat = userspace::UserspacePlatform;

// —————————————————————————— Platform Definition ——————————————————————————— //

pub trait Platform {
    fn name() -> &'static str;

    /// Clear the error conditions latched by the host bridge and return the latched status.
    ///
    /// When `enable_mcp` is set the bridge is also asked to report future errors by asserting the
    /// machine check pin. Must be idempotent and safe to call with interrupts disabled, or from
    /// the exception handler.
    ///
    /// The default implementation is for boards that can't do either, it reports
    /// [BridgeStatus::UNSUPPORTED] when asked to enable machine checks.
    fn clear_hostbridge_errors(enable_mcp: bool, _quiet: bool) -> BridgeStatus {
        if enable_mcp {
            BridgeStatus::UNSUPPORTED
        } else {
            BridgeStatus::CLEAR
        }
    }

    /// Offer an exception to the hardware breakpoint support, if any.
    fn catch_breakpoint(_frame: &mut ExceptionFrame) -> BreakpointAction {
        BreakpointAction::NotMine
    }

    fn debug_print(level: Level, args: fmt::Arguments);

    /// Halt the system.
    fn panic(msg: &str) -> !;
}

// ——————————————————————————— Host Bridge Status ——————————————————————————— //

/// The status returned by the host bridge error clearing routine.
///
/// Any value other than the two constants holds the error bits latched by the bridge, in a board
/// specific format.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BridgeStatus(pub u32);

impl BridgeStatus {
    /// No error was latched.
    pub const CLEAR: BridgeStatus = BridgeStatus(0);
    /// The bridge can't deliver machine checks.
    pub const UNSUPPORTED: BridgeStatus = BridgeStatus(u32::MAX);

    pub fn is_clear(self) -> bool {
        self == Self::CLEAR
    }

    pub fn is_unsupported(self) -> bool {
        self == Self::UNSUPPORTED
    }
}

impl fmt::Display for BridgeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unsupported() {
            write!(f, "unsupported")
        } else {
            write!(f, "0x{:08x}", self.0)
        }
    }
}

// ———————————————————————————— Breakpoint Catcher —————————————————————————— //

/// The verdict of the breakpoint catcher on an exception.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BreakpointAction {
    /// Not a breakpoint exception.
    NotMine,
    /// A breakpoint hit, but the user handler asks for a panic.
    Panic,
    /// First phase: the breakpoint was removed, the access can complete.
    Deinstalled,
    /// Second phase: stopped after the faulting instruction completed.
    Stepped,
}

impl BreakpointAction {
    /// Decode the value returned by the C breakpoint catcher.
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            0 => BreakpointAction::NotMine,
            1 => BreakpointAction::Deinstalled,
            2 => BreakpointAction::Stepped,
            // -1, and anything we don't understand
            _ => BreakpointAction::Panic,
        }
    }

    pub fn to_raw(self) -> i32 {
        match self {
            BreakpointAction::NotMine => 0,
            BreakpointAction::Panic => -1,
            BreakpointAction::Deinstalled => 1,
            BreakpointAction::Stepped => 2,
        }
    }

    /// Whether the exception has been fully dealt with.
    pub fn is_handled(self) -> bool {
        matches!(self, BreakpointAction::Deinstalled | BreakpointAction::Stepped)
    }
}

// ————————————————————————————————— Tests —————————————————————————————————— //
