//! Generic RTEMS board
//!
//! For boards that can neither clear nor arm host bridge errors. Probing then relies on the
//! synchronous data access exception only.

use core::fmt;

use log::Level;

use super::{rtems, Platform};

pub struct GenericPlatform {}

impl Platform for GenericPlatform {
    fn name() -> &'static str {
        "Generic RTEMS board"
    }

    fn debug_print(level: Level, args: fmt::Arguments) {
        rtems::debug_print(level, args)
    }

    fn panic(msg: &str) -> ! {
        rtems::panic(msg)
    }
}
