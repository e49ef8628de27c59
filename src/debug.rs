//! Debug utils

use core::sync::atomic::{AtomicU8, Ordering};

use crate::arch::ExceptionFrame;
use crate::config;

// ————————————————————————————— Logging Utils —————————————————————————————— //

/// Emit a warning only once.
///
/// This macro calls log::warn internally and forwards all arguments.
macro_rules! warn_once {
    ($($args:tt)*) => {{
        use core::sync::atomic::{AtomicBool, Ordering};
        static IS_FIRST_WARN: AtomicBool = AtomicBool::new(true);

        if IS_FIRST_WARN.swap(false, Ordering::Relaxed) == true {
            log::warn!($($args)*);
        }
    }}
}

pub(crate) use warn_once;

// ——————————————————————————————— Verbosity ———————————————————————————————— //

static VERBOSITY: AtomicU8 = AtomicU8::new(config::VERBOSITY);

/// Set the verbosity of the probing diagnostics.
///
/// 0 is silent, 1 warns about the real-time impact of probing and greater values also report
/// the host bridge status on machine checks.
pub fn set_verbosity(level: u8) {
    VERBOSITY.store(level, Ordering::Relaxed);
}

pub fn verbosity() -> u8 {
    VERBOSITY.load(Ordering::Relaxed)
}

// ————————————————————————————— Exception Frame ———————————————————————————— //

/// Log an exception frame, at debug level.
pub fn log_frame(frame: &ExceptionFrame) {
    log::debug!(
        "{:?} exception at 0x{:08x}, srr1 0x{:08x}, dar 0x{:08x}, lr 0x{:08x}",
        frame.vector(),
        frame.srr0,
        frame.srr1,
        frame.dar,
        frame.lr
    );
    for (idx, regs) in frame.gpr.chunks(4).enumerate() {
        log::trace!(
            "  r{:<2} 0x{:08x} 0x{:08x} 0x{:08x} 0x{:08x}",
            idx * 4,
            regs[0],
            regs[1],
            regs[2],
            regs[3]
        );
    }
}
