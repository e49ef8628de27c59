//! RTEMS BSP with host bridge support
//!
//! The BSP links in its own host bridge driver and breakpoint support, we call into them.

use core::ffi::c_int;
use core::fmt;

use log::Level;

use super::{rtems, BreakpointAction, BridgeStatus, Platform};
use crate::arch::ExceptionFrame;

extern "C" {
    fn _BSP_clear_hostbridge_errors(enable_mcp: c_int, quiet: c_int) -> u32;
    fn _bspExtCatchBreakpoint(frame: *mut ExceptionFrame) -> c_int;
}

pub struct BspPlatform {}

impl Platform for BspPlatform {
    fn name() -> &'static str {
        "RTEMS BSP"
    }

    fn clear_hostbridge_errors(enable_mcp: bool, quiet: bool) -> BridgeStatus {
        // SAFETY: the BSP routine is safe to call in any context, including with interrupts
        // disabled and from the exception handler.
        let status =
            unsafe { _BSP_clear_hostbridge_errors(enable_mcp as c_int, quiet as c_int) };
        BridgeStatus(status)
    }

    fn catch_breakpoint(frame: &mut ExceptionFrame) -> BreakpointAction {
        // SAFETY: the frame is valid for the duration of the call.
        BreakpointAction::from_raw(unsafe { _bspExtCatchBreakpoint(frame) })
    }

    fn debug_print(level: Level, args: fmt::Arguments) {
        rtems::debug_print(level, args)
    }

    fn panic(msg: &str) -> ! {
        rtems::panic(msg)
    }
}
