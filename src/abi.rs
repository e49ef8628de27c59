//! C entry points
//!
//! Driver code written in C reaches the prober and the handler chain through these functions.
//! Status values follow the RTEMS conventions, see [crate::probe::status].

use core::ffi::{c_int, c_void};
use core::slice;

use crate::handlers::{self, ForeignHook, Hook, Placement};
use crate::jump_table::ProbeWidth;
use crate::probe::{self, status};

/// Probe `size` bytes at `addr`, reading into or writing from `pval`.
///
/// SAFETY:
/// If not null, `pval` must be valid for reads and writes of `size` bytes.
#[no_mangle]
pub unsafe extern "C" fn mem_probe(
    addr: *mut c_void,
    write: c_int,
    size: c_int,
    pval: *mut c_void,
) -> u32 {
    let Ok(size) = usize::try_from(size) else {
        return status::INVALID_SIZE;
    };

    // Only build the slice once we know it is small
    let value = match (ProbeWidth::try_from(size), pval.is_null()) {
        (Ok(_), false) => Some(slice::from_raw_parts_mut(pval as *mut u8, size)),
        _ => None,
    };

    match probe::probe(addr as usize, write != 0, size, value) {
        Ok(()) => status::SUCCESSFUL,
        Err(err) => err.status(),
    }
}

#[no_mangle]
pub extern "C" fn mem_probe_init() {
    probe::init();
}

/// Register a C exception hook, at the head of the chain if `at_head` is non-zero.
///
/// Returns 0 on success, -1 if the hook is already installed with the same data or if memory is
/// exhausted.
#[no_mangle]
pub extern "C" fn mem_probe_install_handler(
    hook: Option<ForeignHook>,
    data: *mut c_void,
    at_head: c_int,
) -> c_int {
    let Some(hook) = hook else {
        return -1;
    };
    let placement = if at_head != 0 {
        Placement::Head
    } else {
        Placement::Tail
    };

    match handlers::install_handler(Hook::Foreign(hook), data as usize, placement) {
        Ok(()) => 0,
        Err(err) => {
            log::warn!("Unable to install exception hook: {}", err);
            -1
        }
    }
}

/// Remove a C exception hook.
///
/// Returns 0 on success, 1 if the (hook, data) pair was not installed.
#[no_mangle]
pub extern "C" fn mem_probe_remove_handler(hook: Option<ForeignHook>, data: *mut c_void) -> c_int {
    let Some(hook) = hook else {
        return 1;
    };
    match handlers::remove_handler(Hook::Foreign(hook), data as usize) {
        Ok(()) => 0,
        Err(_) => 1,
    }
}

// ————————————————————————————————— Tests —————————————————————————————————— //

#[cfg(test)]
mod tests {
    use core::ptr;

    use super::*;
    use crate::arch::ExceptionFrame;
    use crate::jump_table::ProbeWidth;
    use crate::userspace::{self, BUS_BASE};

    unsafe extern "C" fn pass(_frame: *mut ExceptionFrame, _data: *mut c_void) -> c_int {
        1
    }

    #[test]
    fn probe_from_c() {
        let _machine = userspace::lock_machine();
        userspace::reset();
        mem_probe_init();
        userspace::map(BUS_BASE, 0x10);
        userspace::poke(BUS_BASE + 4, ProbeWidth::Word, 0x0bad_cafe);

        let mut value: u32 = 0;
        let pval = &mut value as *mut u32 as *mut c_void;
        unsafe {
            assert_eq!(mem_probe((BUS_BASE + 4) as *mut c_void, 0, 4, pval), status::SUCCESSFUL);
            assert_eq!(value, 0x0bad_cafe);

            assert_eq!(
                mem_probe((BUS_BASE + 0x100) as *mut c_void, 0, 4, pval),
                status::INVALID_ADDRESS
            );
            assert_eq!(
                mem_probe(BUS_BASE as *mut c_void, 1, 3, pval),
                status::INVALID_SIZE
            );
            assert_eq!(
                mem_probe(BUS_BASE as *mut c_void, 1, -1, pval),
                status::INVALID_SIZE
            );

            // A null value reads into nothing and writes zeros
            assert_eq!(
                mem_probe((BUS_BASE + 4) as *mut c_void, 1, 4, ptr::null_mut()),
                status::SUCCESSFUL
            );
        }
        assert_eq!(userspace::peek(BUS_BASE + 4, ProbeWidth::Word), Some(0));
    }

    #[test]
    fn handlers_from_c() {
        let _machine = userspace::lock_machine();
        let data = 0x1000 as *mut c_void;

        assert_eq!(mem_probe_install_handler(Some(pass), data, 1), 0);
        assert_eq!(mem_probe_install_handler(Some(pass), data, 0), -1);
        assert_eq!(mem_probe_install_handler(None, data, 0), -1);
        assert_eq!(mem_probe_remove_handler(Some(pass), data), 0);
        assert_eq!(mem_probe_remove_handler(Some(pass), data), 1);
    }
}
