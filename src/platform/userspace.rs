//! The board of the userspace machine model

use core::fmt;

use log::Level;

use super::{BreakpointAction, BridgeStatus, Platform};
use crate::arch::ExceptionFrame;
use crate::userspace;

pub struct UserspacePlatform {}

impl Platform for UserspacePlatform {
    fn name() -> &'static str {
        "Userspace"
    }

    fn clear_hostbridge_errors(enable_mcp: bool, _quiet: bool) -> BridgeStatus {
        userspace::clear_hostbridge_errors(enable_mcp)
    }

    fn catch_breakpoint(_frame: &mut ExceptionFrame) -> BreakpointAction {
        userspace::catch_breakpoint()
    }

    fn debug_print(_level: Level, args: fmt::Arguments) {
        std::eprint!("{}", args);
    }

    fn panic(msg: &str) -> ! {
        panic!("{}", msg)
    }
}
