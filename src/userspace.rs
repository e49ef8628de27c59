//! Userspace machine model
//!
//! When not running on PowerPC hardware there is no bus to probe and no way to receive a machine
//! check. This module models just enough of a PowerPC board to exercise the probing logic on the
//! host, such as when running unit tests:
//!
//! - A bus occupying the upper half of the address space ([BUS_BASE] and above). Windows can be
//!   mapped as plain memory with [map], or as windows whose accesses complete but make the host
//!   bridge latch an error with [map_bridge_error]. Any other bus address is unmapped and raises a
//!   data access exception. Addresses below [BUS_BASE] are regular host memory.
//! - The probe routines, interpreted instruction by instruction at fake text addresses. Exceptions
//!   are delivered through the global exception slot, exactly like the BSP prologue would.
//! - HID0, HID1, the PVR, the interrupt mask, a host bridge and a BSP default exception handler.
//!
//! The model is process-wide, tests must hold the guard returned by [lock_machine] while using it.

use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicUsize, Ordering};

use spin::{Mutex, MutexGuard};

use crate::arch::{hid, srr1, CpuModel, ExceptionFrame, StatusRegister, TrapHandler, Vector};
use crate::jump_table::{ProbeRecord, ProbeRoutine, ProbeWidth, INSTRUCTION_SIZE};
use crate::platform::{BreakpointAction, BridgeStatus};

// ——————————————————————————— Machine Parameters ——————————————————————————— //

/// Start of the simulated bus.
pub const BUS_BASE: usize = 1 << (usize::BITS - 1);

/// Fake address of the first probe routine.
pub const JUMP_TABLE_BASE: usize = 0x0001_0000;
const BYTE_ENTRY: usize = JUMP_TABLE_BASE;
const HALF_ENTRY: usize = JUMP_TABLE_BASE + 3 * INSTRUCTION_SIZE;
const WORD_ENTRY: usize = JUMP_TABLE_BASE + 6 * INSTRUCTION_SIZE;
/// The shared tail: sync, eight nops, sync.
const TAIL: usize = JUMP_TABLE_BASE + 8 * INSTRUCTION_SIZE;
/// Fake address of the end sentinel.
pub const JUMP_TABLE_END: usize = TAIL + 10 * INSTRUCTION_SIZE;

/// Version register of the simulated CPU, an MPC7457 by default.
pub const DEFAULT_PVR: usize = 0x8002_0101;

/// The error bits latched by the host bridge on a failed transaction (master abort).
pub const BRIDGE_ERROR_BITS: u32 = 0x0000_2000;

// ————————————————————————————— Machine State —————————————————————————————— //

enum RegionKind {
    /// Behaves like memory.
    Ram,
    /// Accesses complete but the host bridge latches an error.
    BridgeError,
}

struct Region {
    base: usize,
    data: Vec<u8>,
    kind: RegionKind,
}

impl Region {
    fn contains(&self, addr: usize, len: usize) -> bool {
        addr >= self.base && addr - self.base + len <= self.data.len()
    }
}

static REGIONS: Mutex<Vec<Region>> = Mutex::new(Vec::new());
static MACHINE_LOCK: Mutex<()> = Mutex::new(());

pub(crate) static PVR: AtomicUsize = AtomicUsize::new(DEFAULT_PVR);
pub(crate) static HID0: AtomicUsize = AtomicUsize::new(0);
pub(crate) static HID1: AtomicUsize = AtomicUsize::new(0);
pub(crate) static IRQ_MASK_DEPTH: AtomicUsize = AtomicUsize::new(0);
/// The OS global exception slot, 0 when empty.
pub(crate) static EXCEPTION_SLOT: AtomicUsize = AtomicUsize::new(0);

static LAST_ACCESS_MASKED: AtomicBool = AtomicBool::new(false);

static BRIDGE_LATCH: AtomicU32 = AtomicU32::new(0);
static BRIDGE_MCP_ARMED: AtomicBool = AtomicBool::new(false);
static BRIDGE_MCP_CAPABLE: AtomicBool = AtomicBool::new(true);
static BRIDGE_STUCK: AtomicBool = AtomicBool::new(false);
static BRIDGE_CLEAR_CALLS: AtomicUsize = AtomicUsize::new(0);

static BREAKPOINT_ANSWER: AtomicI32 = AtomicI32::new(0);

static FATAL_EXCEPTIONS: AtomicUsize = AtomicUsize::new(0);
static LAST_FATAL_PC: AtomicUsize = AtomicUsize::new(0);

// ——————————————————————————— Machine Management ——————————————————————————— //

/// Take exclusive ownership of the machine.
///
/// The first call boots the simulated BSP, which installs its own handler in the global exception
/// slot.
pub fn lock_machine() -> MutexGuard<'static, ()> {
    let guard = MACHINE_LOCK.lock();
    let _ = EXCEPTION_SLOT.compare_exchange(
        0,
        bsp_exception_handler as usize,
        Ordering::SeqCst,
        Ordering::SeqCst,
    );
    guard
}

/// Restore the power-on state of the machine, except for the global exception slot.
pub fn reset() {
    REGIONS.lock().clear();
    PVR.store(DEFAULT_PVR, Ordering::SeqCst);
    HID0.store(0, Ordering::SeqCst);
    HID1.store(0, Ordering::SeqCst);
    LAST_ACCESS_MASKED.store(false, Ordering::SeqCst);
    BRIDGE_LATCH.store(0, Ordering::SeqCst);
    BRIDGE_MCP_ARMED.store(false, Ordering::SeqCst);
    BRIDGE_MCP_CAPABLE.store(true, Ordering::SeqCst);
    BRIDGE_STUCK.store(false, Ordering::SeqCst);
    BRIDGE_CLEAR_CALLS.store(0, Ordering::SeqCst);
    BREAKPOINT_ANSWER.store(0, Ordering::SeqCst);
    FATAL_EXCEPTIONS.store(0, Ordering::SeqCst);
    LAST_FATAL_PC.store(0, Ordering::SeqCst);
}

/// Map `len` bytes of zeroed memory on the bus at `base`.
pub fn map(base: usize, len: usize) {
    map_region(base, len, RegionKind::Ram);
}

/// Map a window whose accesses make the host bridge latch an error.
pub fn map_bridge_error(base: usize, len: usize) {
    map_region(base, len, RegionKind::BridgeError);
}

fn map_region(base: usize, len: usize, kind: RegionKind) {
    assert!(base >= BUS_BASE, "0x{:x} is not a bus address", base);
    REGIONS.lock().push(Region {
        base,
        data: vec![0; len],
        kind,
    });
}

/// Read a mapped bus location directly, without going through a probe.
pub fn peek(addr: usize, width: ProbeWidth) -> Option<u32> {
    let regions = REGIONS.lock();
    let region = regions
        .iter()
        .find(|r| matches!(r.kind, RegionKind::Ram) && r.contains(addr, width.bytes()))?;
    let offset = addr - region.base;
    Some(decode(&region.data[offset..offset + width.bytes()]))
}

/// Write a mapped bus location directly, without going through a probe.
pub fn poke(addr: usize, width: ProbeWidth, value: u32) -> bool {
    let mut regions = REGIONS.lock();
    let Some(region) = regions
        .iter_mut()
        .find(|r| matches!(r.kind, RegionKind::Ram) && r.contains(addr, width.bytes()))
    else {
        return false;
    };
    let offset = addr - region.base;
    encode(&mut region.data[offset..offset + width.bytes()], value);
    true
}

pub fn set_pvr(pvr: usize) {
    PVR.store(pvr, Ordering::SeqCst);
}

pub fn read_hid(reg: StatusRegister) -> usize {
    match reg {
        StatusRegister::Hid0 => HID0.load(Ordering::SeqCst),
        StatusRegister::Hid1 => HID1.load(Ordering::SeqCst),
    }
}

/// Whether interrupts are currently masked.
pub fn interrupts_masked() -> bool {
    IRQ_MASK_DEPTH.load(Ordering::SeqCst) != 0
}

/// Whether interrupts were masked during the last bus access.
pub fn last_access_masked() -> bool {
    LAST_ACCESS_MASKED.load(Ordering::SeqCst)
}

/// Force the latched host bridge status.
pub fn latch_bridge_error(bits: u32) {
    BRIDGE_LATCH.fetch_or(bits, Ordering::SeqCst);
}

pub fn bridge_status() -> u32 {
    BRIDGE_LATCH.load(Ordering::SeqCst)
}

/// Make the latched bridge errors impossible to clear.
pub fn set_bridge_stuck(stuck: bool) {
    BRIDGE_STUCK.store(stuck, Ordering::SeqCst);
}

/// Whether the host bridge can drive the machine check pin at all.
pub fn set_bridge_mcp_capable(capable: bool) {
    BRIDGE_MCP_CAPABLE.store(capable, Ordering::SeqCst);
}

pub fn bridge_mcp_armed() -> bool {
    BRIDGE_MCP_ARMED.load(Ordering::SeqCst)
}

/// Number of calls to the host bridge clearing routine since the last reset.
pub fn bridge_clear_calls() -> usize {
    BRIDGE_CLEAR_CALLS.load(Ordering::SeqCst)
}

/// The answer of the breakpoint catcher for the next exception.
pub fn set_breakpoint_answer(answer: BreakpointAction) {
    BREAKPOINT_ANSWER.store(answer.to_raw(), Ordering::SeqCst);
}

/// Number of exceptions that reached the BSP default handler.
pub fn fatal_exceptions() -> usize {
    FATAL_EXCEPTIONS.load(Ordering::SeqCst)
}

pub fn last_fatal_pc() -> usize {
    LAST_FATAL_PC.load(Ordering::SeqCst)
}

/// The handler the simulated BSP installs at boot.
///
/// A real BSP would print the frame and halt. We record the exception and skip the faulting
/// instruction so that tests can observe it.
///
/// SAFETY:
/// `frame` must point to a valid exception frame.
pub unsafe extern "C" fn bsp_exception_handler(frame: *mut ExceptionFrame) {
    let frame = &mut *frame;
    FATAL_EXCEPTIONS.fetch_add(1, Ordering::SeqCst);
    LAST_FATAL_PC.store(frame.srr0, Ordering::SeqCst);
    frame.srr0 += INSTRUCTION_SIZE;
}

// ———————————————————————————————— Host Bridge ————————————————————————————— //

pub(crate) fn clear_hostbridge_errors(enable_mcp: bool) -> BridgeStatus {
    BRIDGE_CLEAR_CALLS.fetch_add(1, Ordering::SeqCst);
    let status = if BRIDGE_STUCK.load(Ordering::SeqCst) {
        BRIDGE_LATCH.load(Ordering::SeqCst)
    } else {
        BRIDGE_LATCH.swap(0, Ordering::SeqCst)
    };

    if enable_mcp {
        if !BRIDGE_MCP_CAPABLE.load(Ordering::SeqCst) {
            return BridgeStatus::UNSUPPORTED;
        }
        BRIDGE_MCP_ARMED.store(true, Ordering::SeqCst);
    }
    BridgeStatus(status)
}

pub(crate) fn catch_breakpoint() -> BreakpointAction {
    BreakpointAction::from_raw(BREAKPOINT_ANSWER.swap(0, Ordering::SeqCst))
}

/// Whether a bridge error is reported as a machine check, which requires both the bridge and the
/// CPU to be configured.
fn machine_check_enabled() -> bool {
    let cpu_enabled = match CpuModel::from_pvr(PVR.load(Ordering::SeqCst)).mcp_register() {
        Some(reg) => read_hid(reg) & hid::EMCP != 0,
        None => false,
    };
    cpu_enabled && BRIDGE_MCP_ARMED.load(Ordering::SeqCst)
}

// ————————————————————————————————— Bus ———————————————————————————————————— //

/// The outcome of a bus transaction.
enum Transaction {
    Done(u32),
    /// Completed, but the bridge will raise a machine check.
    Deferred(u32),
    Fault,
}

fn bus_read(addr: usize, width: ProbeWidth) -> Transaction {
    if addr < BUS_BASE {
        // SAFETY: below BUS_BASE the routines only ever touch the probe scratch buffer.
        return Transaction::Done(unsafe { host_read(addr, width) });
    }
    LAST_ACCESS_MASKED.store(interrupts_masked(), Ordering::SeqCst);

    let regions = REGIONS.lock();
    let Some(region) = regions.iter().find(|r| r.contains(addr, width.bytes())) else {
        return Transaction::Fault;
    };
    match region.kind {
        RegionKind::Ram => {
            let offset = addr - region.base;
            Transaction::Done(decode(&region.data[offset..offset + width.bytes()]))
        }
        RegionKind::BridgeError => bridge_error(all_ones(width)),
    }
}

fn bus_write(addr: usize, width: ProbeWidth, value: u32) -> Transaction {
    if addr < BUS_BASE {
        // SAFETY: below BUS_BASE the routines only ever touch the probe scratch buffer.
        unsafe { host_write(addr, width, value) };
        return Transaction::Done(value);
    }
    LAST_ACCESS_MASKED.store(interrupts_masked(), Ordering::SeqCst);

    let mut regions = REGIONS.lock();
    let Some(region) = regions.iter_mut().find(|r| r.contains(addr, width.bytes())) else {
        return Transaction::Fault;
    };
    match region.kind {
        RegionKind::Ram => {
            let offset = addr - region.base;
            encode(&mut region.data[offset..offset + width.bytes()], value);
            Transaction::Done(value)
        }
        RegionKind::BridgeError => bridge_error(value),
    }
}

fn bridge_error(value: u32) -> Transaction {
    BRIDGE_LATCH.fetch_or(BRIDGE_ERROR_BITS, Ordering::SeqCst);
    if machine_check_enabled() {
        Transaction::Deferred(value)
    } else {
        Transaction::Done(value)
    }
}

unsafe fn host_read(addr: usize, width: ProbeWidth) -> u32 {
    match width {
        ProbeWidth::Byte => (addr as *const u8).read_volatile() as u32,
        ProbeWidth::Half => (addr as *const u16).read_volatile() as u32,
        ProbeWidth::Word => (addr as *const u32).read_volatile(),
    }
}

unsafe fn host_write(addr: usize, width: ProbeWidth, value: u32) {
    match width {
        ProbeWidth::Byte => (addr as *mut u8).write_volatile(value as u8),
        ProbeWidth::Half => (addr as *mut u16).write_volatile(value as u16),
        ProbeWidth::Word => (addr as *mut u32).write_volatile(value),
    }
}

fn decode(bytes: &[u8]) -> u32 {
    match bytes.len() {
        1 => bytes[0] as u32,
        2 => u16::from_ne_bytes([bytes[0], bytes[1]]) as u32,
        _ => u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
    }
}

fn encode(bytes: &mut [u8], value: u32) {
    match bytes.len() {
        1 => bytes[0] = value as u8,
        2 => bytes.copy_from_slice(&(value as u16).to_ne_bytes()),
        _ => bytes.copy_from_slice(&value.to_ne_bytes()),
    }
}

fn all_ones(width: ProbeWidth) -> u32 {
    match width {
        ProbeWidth::Byte => 0xff,
        ProbeWidth::Half => 0xffff,
        ProbeWidth::Word => 0xffff_ffff,
    }
}

// ————————————————————————————— Probe Routines ————————————————————————————— //

pub(crate) fn entry_point(routine: ProbeRoutine) -> usize {
    match routine {
        ProbeRoutine::Byte => BYTE_ENTRY,
        ProbeRoutine::Half => HALF_ENTRY,
        ProbeRoutine::Word => WORD_ENTRY,
    }
}

/// Interpret a probe routine: load r4 from (r4), store r4 to (r5), then the settling tail.
///
/// SAFETY:
/// Same contract as the hardware routines, see [crate::arch::Architecture::run_probe].
pub(crate) unsafe fn run_probe(
    routine: ProbeRoutine,
    record: *mut ProbeRecord,
    from: *const u8,
    to: *mut u8,
) {
    let width = routine.width();
    let entry = entry_point(routine);
    let mut machine_check = false;

    let mut frame = ExceptionFrame {
        srr0: entry,
        ..Default::default()
    };
    frame.gpr[3] = record as usize;
    frame.gpr[4] = from as usize;
    frame.gpr[5] = to as usize;

    // Load
    match bus_read(frame.gpr[4], width) {
        Transaction::Done(value) => {
            frame.gpr[4] = value as usize;
            frame.srr0 += INSTRUCTION_SIZE;
        }
        Transaction::Deferred(value) => {
            frame.gpr[4] = value as usize;
            frame.srr0 += INSTRUCTION_SIZE;
            machine_check = true;
        }
        Transaction::Fault => {
            let addr = frame.gpr[4];
            raise_data_access(&mut frame, addr)
        }
    }

    // Store, unless the exception handler moved us somewhere else
    if frame.srr0 == entry + INSTRUCTION_SIZE {
        match bus_write(frame.gpr[5], width, frame.gpr[4] as u32) {
            Transaction::Done(_) => frame.srr0 += INSTRUCTION_SIZE,
            Transaction::Deferred(_) => {
                frame.srr0 += INSTRUCTION_SIZE;
                machine_check = true;
            }
            Transaction::Fault => {
                let addr = frame.gpr[5];
                raise_data_access(&mut frame, addr)
            }
        }
    }

    // The bridge asserts the machine check pin while we wait in the tail
    if machine_check {
        frame.srr0 = TAIL + INSTRUCTION_SIZE;
        frame.vector = Vector::MachineCheck as usize;
        frame.srr1 = srr1::MCP;
        deliver(&mut frame);
    }
}

fn raise_data_access(frame: &mut ExceptionFrame, addr: usize) {
    frame.vector = Vector::DataAccess as usize;
    frame.srr1 = 0;
    frame.dar = addr;
    deliver(frame);
}

/// Deliver an exception through the global exception slot.
fn deliver(frame: &mut ExceptionFrame) {
    let pc = frame.srr0;
    let raw = EXCEPTION_SLOT.load(Ordering::SeqCst);
    let handler = if raw == 0 {
        bsp_exception_handler as TrapHandler
    } else {
        // SAFETY: the slot only ever holds 0 or a `TrapHandler`, see `HostArch`.
        unsafe { core::mem::transmute::<usize, TrapHandler>(raw) }
    };

    // SAFETY: the frame lives on our stack for the duration of the call.
    unsafe { handler(frame) };

    assert!(
        frame.srr0 != pc,
        "exception at 0x{:x} returned to the faulting instruction",
        pc
    );
}
