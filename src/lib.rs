//! Memprobe
//!
//! Fault-tolerant probing of memory and I/O addresses for PowerPC board support packages.
//!
//! Probing an address that is not decoded by the host bridge normally ends in a data access
//! exception or a machine check, which the BSP turns into a fatal panic. This library installs an
//! exception interceptor that recognizes faults raised from within its own probe routines and
//! turns them into plain error values instead. Exceptions that do not come from a probe are
//! offered to a chain of registered handlers before falling back to the handler installed by the
//! BSP.
//!
//! The main entry points are [init], [probe] (and its typed siblings [read] and [write]), and
//! [install_handler] / [remove_handler].

// Mark the crate as no_std, but only when not running tests.
// We need std to be able to run tests in user-space on the host architecture.
#![cfg_attr(not(test), no_std)]
#![cfg_attr(target_arch = "powerpc", feature(asm_experimental_arch))]

extern crate alloc;

// The userspace machine model prints to the host console.
#[cfg(all(not(test), not(target_arch = "powerpc")))]
extern crate std;

pub mod abi;
pub mod arch;
pub mod config;
pub mod debug;
pub mod dispatch;
pub mod handlers;
pub mod jump_table;
pub mod logger;
pub mod platform;
pub mod probe;

#[cfg(not(target_arch = "powerpc"))]
pub mod userspace;

pub use arch::ExceptionFrame;
pub use debug::{set_verbosity, verbosity};
pub use handlers::{install_handler, remove_handler, HandlerError, Hook, HookAction, Placement};
pub use jump_table::ProbeWidth;
pub use platform::{BreakpointAction, BridgeStatus};
pub use probe::{init, probe, read, write, McpCapability, MemProbe, ProbeError, ProbeValue};

#[cfg(all(target_arch = "powerpc", not(test)))]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    use platform::{Plat, Platform};

    log::error!("Panicked at {:#?} ", info);
    Plat::panic("panic")
}
