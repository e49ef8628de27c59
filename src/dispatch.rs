//! Exception interception
//!
//! We take over the OS global exception slot and look at every exception before the BSP does.
//! Faults raised by the probe routines are recovered from, everything else is offered to the
//! breakpoint catcher and the registered handlers, and finally forwarded to whatever handler was
//! installed before us.

use spin::Once;

use crate::arch::{Arch, Architecture, ExceptionFrame, FaultClass, IrqGuard, TrapHandler};
use crate::debug;
use crate::handlers::{HookAction, CHAIN};
use crate::jump_table::{JumpTable, ProbeRecord, INSTRUCTION_SIZE, PROBE_RECORD_GPR};
use crate::platform::{Plat, Platform};

/// The handler that was installed before ours, captured once and never cleared.
static ORIGINAL_HANDLER: Once<Option<TrapHandler>> = Once::new();

// ————————————————————————————— Installation ——————————————————————————————— //

/// Install the interceptor in the global exception slot.
///
/// Does nothing if the interceptor is already installed.
pub fn install() {
    let _irq = IrqGuard::new();
    if is_installed() {
        return;
    }

    let original = *ORIGINAL_HANDLER.call_once(Arch::exception_handler);
    Arch::memory_barrier();
    // SAFETY: interrupts are masked and the original handler is recorded, the interceptor can
    // take any exception from now on.
    unsafe { Arch::set_exception_handler(Some(intercept)) };
    Arch::memory_barrier();

    log::debug!(
        "Exception interceptor installed, original handler at 0x{:x}",
        original.map_or(0, |h| h as usize)
    );
}

/// Whether the global exception slot still holds our interceptor.
pub fn is_installed() -> bool {
    match Arch::exception_handler() {
        Some(handler) => handler as usize == intercept as TrapHandler as usize,
        None => false,
    }
}

/// The handler we forward unrelated exceptions to, if captured yet.
pub fn original_handler() -> Option<TrapHandler> {
    ORIGINAL_HANDLER.get().copied().flatten()
}

// —————————————————————————————— Interception —————————————————————————————— //

/// Entry point called by the low-level exception prologue.
///
/// SAFETY:
/// `frame` must point to the valid exception frame of the exception being handled.
pub unsafe extern "C" fn intercept(frame: *mut ExceptionFrame) {
    dispatch(&mut *frame)
}

/// Route an exception, in that order: probe faults, breakpoints, registered handlers and finally
/// the original handler.
pub fn dispatch(frame: &mut ExceptionFrame) {
    let pc = frame.pc();

    if JumpTable::get().contains(pc) {
        recover_probe_fault(frame);
        return;
    }

    if Plat::catch_breakpoint(frame).is_handled() {
        return;
    }

    if CHAIN.dispatch(frame) == HookAction::Handled {
        return;
    }

    debug::log_frame(frame);
    match original_handler() {
        // SAFETY: the original handler expects the same frame layout as we do.
        Some(handler) => unsafe { handler(frame) },
        None => Plat::panic("unhandled exception and no original handler"),
    }
}

/// Resume after the faulting instruction of a probe routine, flagging the fault in its record.
///
/// DAR is not looked at, some boards report bad accesses with a machine check which leaves it
/// undefined.
fn recover_probe_fault(frame: &mut ExceptionFrame) {
    let pc = frame.pc();
    let record = frame.gpr[PROBE_RECORD_GPR] as *mut ProbeRecord;
    // SAFETY: r3 holds the probe record for the whole routine, which is live until the routine
    // returns to its caller.
    unsafe { ProbeRecord::flag(record, pc) };
    frame.srr0 = pc + INSTRUCTION_SIZE;

    let class = frame.fault_class();
    if class.is_bus_error() {
        let status = Plat::clear_hostbridge_errors(true, true);
        if debug::verbosity() > 1 {
            log::warn!(
                "Machine check [{}]; host bridge status {}",
                if class == FaultClass::Tea { "TEA" } else { "MCP" },
                status
            );
        }
    }
}

// ————————————————————————————————— Tests —————————————————————————————————— //

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::{Hook, Placement};
    use crate::platform::BreakpointAction;
    use crate::userspace;

    const UNRELATED_PC: usize = 0x0004_2000;

    fn unrelated_frame() -> ExceptionFrame {
        ExceptionFrame {
            srr0: UNRELATED_PC,
            vector: 0x300,
            ..Default::default()
        }
    }

    fn claim(frame: &mut ExceptionFrame, _: usize) -> HookAction {
        frame.gpr[0] += 1;
        HookAction::Handled
    }

    #[test]
    fn install_is_idempotent() {
        let _machine = userspace::lock_machine();
        install();
        install();
        assert!(is_installed());
        assert_eq!(
            original_handler().map(|h| h as usize),
            Some(userspace::bsp_exception_handler as TrapHandler as usize)
        );
    }

    #[test]
    fn probe_fault_is_recovered() {
        let _machine = userspace::lock_machine();
        userspace::reset();

        let table = JumpTable::get();
        let mut record = ProbeRecord::new();
        let mut frame = ExceptionFrame {
            srr0: table.start,
            vector: 0x300,
            ..Default::default()
        };
        frame.gpr[PROBE_RECORD_GPR] = &mut record as *mut ProbeRecord as usize;

        dispatch(&mut frame);

        assert_eq!(record.fault_pc(), Some(table.start));
        assert_eq!(frame.srr0, table.start + INSTRUCTION_SIZE);
        // Not a bus error, the bridge is left alone
        assert_eq!(userspace::bridge_clear_calls(), 0);
        assert_eq!(userspace::fatal_exceptions(), 0);
    }

    #[test]
    fn bus_error_clears_bridge() {
        let _machine = userspace::lock_machine();
        userspace::reset();
        userspace::latch_bridge_error(userspace::BRIDGE_ERROR_BITS);

        let table = JumpTable::get();
        let mut record = ProbeRecord::new();
        let mut frame = ExceptionFrame {
            srr0: table.end - INSTRUCTION_SIZE,
            srr1: crate::arch::srr1::TEA,
            vector: 0x200,
            ..Default::default()
        };
        frame.gpr[PROBE_RECORD_GPR] = &mut record as *mut ProbeRecord as usize;

        dispatch(&mut frame);

        assert!(record.fault_pc().is_some());
        assert_eq!(userspace::bridge_clear_calls(), 1);
        assert_eq!(userspace::bridge_status(), 0);
    }

    #[test]
    fn breakpoint_catcher_comes_first() {
        let _machine = userspace::lock_machine();
        userspace::reset();
        install();

        let hook = Hook::Native(claim);
        CHAIN.install(hook, 0xb0, Placement::Head).unwrap();

        // A handled breakpoint never reaches the chain, whether the catcher just removed its
        // breakpoint or stepped over it
        let mut frame = unrelated_frame();
        for answer in [BreakpointAction::Deinstalled, BreakpointAction::Stepped] {
            userspace::set_breakpoint_answer(answer);
            dispatch(&mut frame);
            assert_eq!(frame.gpr[0], 0);
        }

        // A breakpoint requesting a panic goes on with the chain
        userspace::set_breakpoint_answer(BreakpointAction::Panic);
        dispatch(&mut frame);
        assert_eq!(frame.gpr[0], 1);
        assert_eq!(userspace::fatal_exceptions(), 0);

        CHAIN.remove(hook, 0xb0).unwrap();
    }

    #[test]
    fn unrelated_exception_reaches_original_handler() {
        let _machine = userspace::lock_machine();
        userspace::reset();
        install();

        let mut frame = unrelated_frame();
        dispatch(&mut frame);

        assert_eq!(userspace::fatal_exceptions(), 1);
        assert_eq!(userspace::last_fatal_pc(), UNRELATED_PC);
    }
}
