//! Memory probing
//!
//! A probe performs a single read or write of 1, 2 or 4 bytes through one of the probe routines.
//! If the address is not decoded the CPU raises an exception which the interceptor recovers
//! from, and the probe reports [ProbeError::InvalidAddress] instead of crashing the system.
//!
//! Not all boards can report a bad access through an exception: on a PCI bus, reading an address
//! no device claims typically completes with all ones and the host bridge merely latches an
//! error. When the CPU and the bridge support it we ask the bridge to assert the machine check
//! pin (MCP) on such errors. Otherwise probes run in polling mode: interrupts are masked and the
//! bridge status is checked after the access.

use spin::Once;
use thiserror_no_std::Error;

use crate::arch::{self, hid, CpuModel, IrqGuard, StatusRegister};
use crate::debug::{self, warn_once};
use crate::jump_table::{self, ProbeWidth};
use crate::platform::{BridgeStatus, Plat, Platform};
use crate::{dispatch, logger};

// ————————————————————————————————— Errors ————————————————————————————————— //

/// RTEMS status codes, as returned to C callers.
pub mod status {
    pub const SUCCESSFUL: u32 = 0;
    pub const INVALID_SIZE: u32 = 8;
    pub const INVALID_ADDRESS: u32 = 9;
    /// The exception handler was replaced behind our back.
    pub const REFUSED: u32 = u32::MAX;
}

#[derive(Error, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProbeError {
    #[error("invalid probe size: {0} bytes")]
    InvalidSize(usize),
    #[error("invalid address, the access faulted at pc 0x{fault_pc:x}")]
    InvalidAddress { fault_pc: usize },
    #[error("the exception handler has been replaced, refusing to probe")]
    HandlerReplaced,
    #[error("host bridge error (status {0})")]
    HostBridge(BridgeStatus),
}

impl ProbeError {
    /// The RTEMS status code for this error.
    pub fn status(self) -> u32 {
        match self {
            ProbeError::InvalidSize(_) => status::INVALID_SIZE,
            ProbeError::InvalidAddress { .. } => status::INVALID_ADDRESS,
            ProbeError::HandlerReplaced => status::REFUSED,
            ProbeError::HostBridge(bridge) => bridge.0,
        }
    }
}

// ——————————————————————————— MCP Capability ——————————————————————————————— //

/// How bad accesses are detected.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum McpCapability {
    /// The host bridge raises a machine check on errors.
    MachineCheck,
    /// The bridge status must be checked after each access, with interrupts masked.
    Polling,
}

impl McpCapability {
    /// Try to have bus errors reported as machine checks.
    ///
    /// This clears pending bridge errors, then arms the bridge and sets EMCP in the CPU's HID
    /// register. Falls back to polling if the CPU is unknown, if errors can't be cleared or if the
    /// bridge can't deliver machine checks.
    pub fn negotiate(cpu: CpuModel) -> Self {
        let capability = match cpu.mcp_register() {
            Some(reg) => Self::enable(reg),
            None => McpCapability::Polling,
        };

        if capability == McpCapability::Polling {
            log::warn!(
                "MCP support is not available on {:?} or not implemented by the board ({}), \
                 address probing must be performed in polling mode with interrupts disabled",
                cpu,
                Plat::name()
            );
        }
        capability
    }

    fn enable(reg: StatusRegister) -> Self {
        Plat::clear_hostbridge_errors(false, true);
        let pending = Plat::clear_hostbridge_errors(false, true);
        if !pending.is_clear() {
            log::warn!(
                "Unable to clear pending host bridge errors ({}), leaving MCP disabled; \
                 proper operation of address probing not guaranteed",
                pending
            );
            return McpCapability::Polling;
        }

        if Plat::clear_hostbridge_errors(true, true).is_unsupported() {
            return McpCapability::Polling;
        }

        // SAFETY: EMCP only enables the machine check pin, errors are now handled by the
        // interceptor.
        unsafe { arch::set_status_bits(reg, hid::EMCP) };
        McpCapability::MachineCheck
    }

    pub fn uses_mcp(self) -> bool {
        self == McpCapability::MachineCheck
    }
}

// ————————————————————————————————— Probing ———————————————————————————————— //

/// Probes memory, see [init].
#[derive(Debug)]
pub struct MemProbe {
    capability: McpCapability,
}

impl MemProbe {
    /// Create a prober for the given capability.
    ///
    /// The interceptor must be installed, see [dispatch::install], otherwise every probe is
    /// refused.
    pub fn new(capability: McpCapability) -> Self {
        MemProbe { capability }
    }

    pub fn capability(&self) -> McpCapability {
        self.capability
    }

    /// Read or write `size` bytes at `addr`.
    ///
    /// For a write the value is taken from the first `size` bytes of `value` (zeros if `None`).
    /// For a read the value is copied into `value`, or on a fault the first `size` bytes of the
    /// faulting pc.
    pub fn probe(
        &self,
        addr: usize,
        write: bool,
        size: usize,
        value: Option<&mut [u8]>,
    ) -> Result<(), ProbeError> {
        let width = ProbeWidth::try_from(size).map_err(ProbeError::InvalidSize)?;
        if value.as_ref().is_some_and(|value| value.len() < size) {
            return Err(ProbeError::InvalidSize(size));
        }

        if !dispatch::is_installed() {
            log::error!("Someone changed the exception handler, refusing to probe");
            return Err(ProbeError::HandlerReplaced);
        }

        self.warn_realtime();

        // The routines access the caller through this buffer only, so that a fault never
        // touches `value`.
        let mut bytes = [0u8; 4];
        if write {
            if let Some(value) = &value {
                bytes[..size].copy_from_slice(&value[..size]);
            }
        }
        let mut scratch = u32::from_ne_bytes(bytes);

        let result = self.access(addr, write, width, &mut scratch);

        if let (false, Some(value)) = (write, value) {
            let out = match result {
                Err(ProbeError::InvalidAddress { fault_pc }) => (fault_pc as u32).to_ne_bytes(),
                _ => scratch.to_ne_bytes(),
            };
            value[..size].copy_from_slice(&out[..size]);
        }

        result
    }

    /// Read a value at `addr`.
    pub fn read<T: ProbeValue>(&self, addr: usize) -> Result<T, ProbeError> {
        let size = T::WIDTH.bytes();
        let mut bytes = [0u8; 4];
        self.probe(addr, false, size, Some(&mut bytes[..size]))?;
        Ok(T::from_bytes(&bytes[..size]))
    }

    /// Write `value` at `addr`.
    pub fn write<T: ProbeValue>(&self, addr: usize, value: T) -> Result<(), ProbeError> {
        let size = T::WIDTH.bytes();
        let mut bytes = [0u8; 4];
        value.to_bytes(&mut bytes[..size]);
        self.probe(addr, true, size, Some(&mut bytes[..size]))
    }

    fn access(
        &self,
        addr: usize,
        write: bool,
        width: ProbeWidth,
        scratch: &mut u32,
    ) -> Result<(), ProbeError> {
        let routine = width.routine();
        let scratch = scratch as *mut u32 as *mut u8;
        let (from, to) = if write {
            (scratch as *const u8, addr as *mut u8)
        } else {
            (addr as *const u8, scratch)
        };

        match self.capability {
            McpCapability::MachineCheck => match jump_table::run(routine, from, to) {
                Some(fault_pc) => Err(ProbeError::InvalidAddress { fault_pc }),
                None => Ok(()),
            },
            McpCapability::Polling => {
                // Without machine checks the bridge status is our only witness, nobody else may
                // touch it until we looked at it.
                let _irq = IrqGuard::new();
                Plat::clear_hostbridge_errors(false, true);
                let fault = jump_table::run(routine, from, to);
                let bridge = Plat::clear_hostbridge_errors(false, true);

                match fault {
                    Some(fault_pc) => Err(ProbeError::InvalidAddress { fault_pc }),
                    None if !bridge.is_clear() => Err(ProbeError::HostBridge(bridge)),
                    None => Ok(()),
                }
            }
        }
    }

    fn warn_realtime(&self) {
        if debug::verbosity() == 0 {
            return;
        }
        if self.capability.uses_mcp() {
            log::warn!("Memory probing kills real-time performance, use only during driver initialization");
        } else {
            log::warn!(
                "Memory probing kills real-time performance, and this board can't use MCP \
                 exceptions: probing runs with INTERRUPTS DISABLED. Use only during driver \
                 initialization"
            );
        }
    }
}

// ——————————————————————————————— Typed Values ————————————————————————————— //

mod sealed {
    pub trait Sealed {}
}

/// Values that can be transferred by a single probe.
pub trait ProbeValue: sealed::Sealed + Copy {
    const WIDTH: ProbeWidth;

    fn from_bytes(bytes: &[u8]) -> Self;
    fn to_bytes(self, bytes: &mut [u8]);
}

macro_rules! impl_probe_value {
    ($ty:ty, $width:expr) => {
        impl sealed::Sealed for $ty {}

        impl ProbeValue for $ty {
            const WIDTH: ProbeWidth = $width;

            fn from_bytes(bytes: &[u8]) -> Self {
                let mut raw = [0u8; core::mem::size_of::<$ty>()];
                raw.copy_from_slice(bytes);
                <$ty>::from_ne_bytes(raw)
            }

            fn to_bytes(self, bytes: &mut [u8]) {
                bytes.copy_from_slice(&self.to_ne_bytes())
            }
        }
    };
}

impl_probe_value!(u8, ProbeWidth::Byte);
impl_probe_value!(u16, ProbeWidth::Half);
impl_probe_value!(u32, ProbeWidth::Word);

// ———————————————————————————————— Global Prober ——————————————————————————— //

static MEM_PROBE: Once<MemProbe> = Once::new();

/// Initialize memory probing.
///
/// Negotiates MCP support with the CPU and the host bridge, and installs the exception
/// interceptor. Runs only once, every probing entry point calls it.
pub fn init() -> &'static MemProbe {
    init_once(&MEM_PROBE)
}

fn init_once(cell: &Once<MemProbe>) -> &MemProbe {
    cell.call_once(|| {
        logger::init();

        let cpu = arch::cpu_model();
        log::debug!("Memory probing on {:?}, board: {}", cpu, Plat::name());
        let capability = McpCapability::negotiate(cpu);
        if !capability.uses_mcp() {
            warn_once!("Probing relies on synchronous exceptions and host bridge polling");
        }

        dispatch::install();
        MemProbe::new(capability)
    })
}

/// Read or write `size` bytes at `addr`, see [MemProbe::probe].
pub fn probe(
    addr: usize,
    write: bool,
    size: usize,
    value: Option<&mut [u8]>,
) -> Result<(), ProbeError> {
    init().probe(addr, write, size, value)
}

/// Read a value at `addr`, see [MemProbe::read].
pub fn read<T: ProbeValue>(addr: usize) -> Result<T, ProbeError> {
    init().read(addr)
}

/// Write a value at `addr`, see [MemProbe::write].
pub fn write<T: ProbeValue>(addr: usize, value: T) -> Result<(), ProbeError> {
    init().write(addr, value)
}

// ————————————————————————————————— Tests —————————————————————————————————— //

#[cfg(test)]
mod tests {
    use spin::MutexGuard;

    use super::*;
    use crate::arch::{Arch, Architecture};
    use crate::jump_table::{JumpTable, INSTRUCTION_SIZE};
    use crate::userspace::{self, BUS_BASE};

    const RAM: usize = BUS_BASE + 0x1000;
    const BAD_BRIDGE: usize = BUS_BASE + 0x2000;
    const UNMAPPED: usize = BUS_BASE + 0x0010_0000;

    /// Lock a freshly reset machine, with the interceptor installed.
    fn machine() -> MutexGuard<'static, ()> {
        let guard = userspace::lock_machine();
        userspace::reset();
        init();
        userspace::reset();
        userspace::map(RAM, 0x100);
        userspace::map_bridge_error(BAD_BRIDGE, 0x10);
        guard
    }

    fn negotiated() -> MemProbe {
        MemProbe::new(McpCapability::negotiate(arch::cpu_model()))
    }

    #[test]
    fn read_and_write_every_width() {
        let _machine = machine();

        for prober in [negotiated(), MemProbe::new(McpCapability::Polling)] {
            userspace::poke(RAM, ProbeWidth::Byte, 0xff);
            assert_eq!(prober.read::<u8>(RAM), Ok(0xff));
            prober.write::<u8>(RAM + 1, 0xa5).unwrap();
            assert_eq!(userspace::peek(RAM + 1, ProbeWidth::Byte), Some(0xa5));

            userspace::poke(RAM + 0x10, ProbeWidth::Half, 0xffff);
            assert_eq!(prober.read::<u16>(RAM + 0x10), Ok(0xffff));
            prober.write::<u16>(RAM + 0x12, 0x1234).unwrap();
            assert_eq!(userspace::peek(RAM + 0x12, ProbeWidth::Half), Some(0x1234));

            userspace::poke(RAM + 0x20, ProbeWidth::Word, 0xffff_ffff);
            assert_eq!(prober.read::<u32>(RAM + 0x20), Ok(0xffff_ffff));
            prober.write::<u32>(RAM + 0x24, 0xdead_beef).unwrap();
            assert_eq!(
                userspace::peek(RAM + 0x24, ProbeWidth::Word),
                Some(0xdead_beef)
            );
        }
        assert_eq!(userspace::fatal_exceptions(), 0);
    }

    #[test]
    fn write_then_read_back() {
        let _machine = machine();
        let prober = negotiated();

        prober.write::<u8>(RAM + 0x40, 0xff).unwrap();
        assert_eq!(prober.read::<u8>(RAM + 0x40), Ok(0xff));
        prober.write::<u16>(RAM + 0x42, 0xffff).unwrap();
        assert_eq!(prober.read::<u16>(RAM + 0x42), Ok(0xffff));
        prober.write::<u32>(RAM + 0x44, 0xffff_ffff).unwrap();
        assert_eq!(prober.read::<u32>(RAM + 0x44), Ok(0xffff_ffff));
    }

    #[test]
    fn unmapped_addresses() {
        let _machine = machine();
        let prober = negotiated();
        let table = JumpTable::get();

        for size in [1, 2, 4] {
            let mut value = [0x55u8; 4];
            let err = prober
                .probe(UNMAPPED, false, size, Some(&mut value[..size]))
                .unwrap_err();
            let ProbeError::InvalidAddress { fault_pc } = err else {
                panic!("unexpected error: {:?}", err);
            };
            assert!(table.contains(fault_pc));

            // The fault pc is echoed, the rest of the buffer is left untouched
            let echo = (fault_pc as u32).to_ne_bytes();
            assert_eq!(value[..size], echo[..size]);
            assert!(value[size..].iter().all(|b| *b == 0x55));

            let mut value = [0x55u8; 4];
            let err = prober
                .probe(UNMAPPED, true, size, Some(&mut value[..size]))
                .unwrap_err();
            assert!(matches!(err, ProbeError::InvalidAddress { .. }));
            assert_eq!(value, [0x55; 4]);
            assert_eq!(err.status(), status::INVALID_ADDRESS);
        }

        // The load faults in one routine, the store in the next instruction
        let load = prober.read::<u32>(UNMAPPED).unwrap_err();
        let store = prober.write::<u32>(UNMAPPED, 0).unwrap_err();
        match (load, store) {
            (
                ProbeError::InvalidAddress { fault_pc: load },
                ProbeError::InvalidAddress { fault_pc: store },
            ) => assert_eq!(store, load + INSTRUCTION_SIZE),
            other => panic!("unexpected errors: {:?}", other),
        }

        assert_eq!(userspace::fatal_exceptions(), 0);
    }

    #[test]
    fn invalid_sizes() {
        let _machine = machine();
        let prober = negotiated();
        let clear_calls = userspace::bridge_clear_calls();

        for size in [0, 3, 5, 8] {
            let mut value = [0u8; 8];
            assert_eq!(
                prober.probe(RAM, false, size, Some(&mut value)),
                Err(ProbeError::InvalidSize(size))
            );
        }

        // The buffer must hold a whole unit
        let mut value = [0u8; 2];
        assert_eq!(
            prober.probe(RAM, false, 4, Some(&mut value)),
            Err(ProbeError::InvalidSize(4))
        );

        assert_eq!(ProbeError::InvalidSize(3).status(), status::INVALID_SIZE);
        assert_eq!(userspace::bridge_clear_calls(), clear_calls);
    }

    #[test]
    fn refuse_with_foreign_handler() {
        let _machine = machine();
        let prober = negotiated();

        unsafe { Arch::set_exception_handler(Some(userspace::bsp_exception_handler)) };
        let clear_calls = userspace::bridge_clear_calls();
        let result = prober.read::<u32>(UNMAPPED);
        dispatch::install();

        assert_eq!(result, Err(ProbeError::HandlerReplaced));
        assert_eq!(ProbeError::HandlerReplaced.status(), u32::MAX);
        // No access was attempted
        assert_eq!(userspace::fatal_exceptions(), 0);
        assert_eq!(userspace::bridge_clear_calls(), clear_calls);

        assert!(dispatch::is_installed());
        assert_eq!(prober.read::<u32>(RAM), Ok(0));
    }

    #[test]
    fn polling_mode_reports_bridge_errors() {
        let _machine = machine();
        let prober = MemProbe::new(McpCapability::Polling);
        let clear_calls = userspace::bridge_clear_calls();

        let result = prober.read::<u32>(BAD_BRIDGE);
        assert_eq!(
            result,
            Err(ProbeError::HostBridge(BridgeStatus(userspace::BRIDGE_ERROR_BITS)))
        );
        assert_eq!(result.unwrap_err().status(), userspace::BRIDGE_ERROR_BITS);
        assert!(userspace::last_access_masked());
        // Cleared before and after the access
        assert_eq!(userspace::bridge_clear_calls(), clear_calls + 2);
        assert_eq!(userspace::bridge_status(), 0);

        // A stale error does not leak into the next probe
        userspace::latch_bridge_error(userspace::BRIDGE_ERROR_BITS);
        assert_eq!(prober.read::<u8>(RAM), Ok(0));
        assert!(userspace::last_access_masked());
    }

    #[test]
    fn machine_check_mode() {
        let _machine = machine();
        let verbosity = debug::verbosity();
        debug::set_verbosity(2);

        let prober = negotiated();
        assert_eq!(prober.capability(), McpCapability::MachineCheck);
        assert!(userspace::bridge_mcp_armed());
        assert_ne!(userspace::read_hid(StatusRegister::Hid1) & hid::EMCP, 0);

        let err = prober.read::<u16>(BAD_BRIDGE).unwrap_err();
        let ProbeError::InvalidAddress { fault_pc } = err else {
            panic!("unexpected error: {:?}", err);
        };
        assert!(JumpTable::get().contains(fault_pc));
        // The interceptor cleared the bridge and kept it armed
        assert_eq!(userspace::bridge_status(), 0);
        assert!(userspace::bridge_mcp_armed());

        prober.write::<u32>(BAD_BRIDGE, 1).unwrap_err();
        assert_eq!(userspace::fatal_exceptions(), 0);

        debug::set_verbosity(verbosity);
    }

    #[test]
    fn negotiation() {
        let _machine = machine();

        // MPC7457, EMCP lives in HID1
        assert_eq!(
            McpCapability::negotiate(arch::cpu_model()),
            McpCapability::MachineCheck
        );
        assert_ne!(userspace::read_hid(StatusRegister::Hid1) & hid::EMCP, 0);
        assert_eq!(userspace::read_hid(StatusRegister::Hid0) & hid::EMCP, 0);

        // PPC750, EMCP lives in HID0
        userspace::reset();
        userspace::set_pvr(0x0008_3203);
        assert_eq!(
            McpCapability::negotiate(arch::cpu_model()),
            McpCapability::MachineCheck
        );
        assert_ne!(userspace::read_hid(StatusRegister::Hid0) & hid::EMCP, 0);

        // Unknown CPU
        userspace::reset();
        userspace::set_pvr(0x0050_0000);
        assert_eq!(
            McpCapability::negotiate(arch::cpu_model()),
            McpCapability::Polling
        );
        assert_eq!(userspace::bridge_clear_calls(), 0);
        assert!(!userspace::bridge_mcp_armed());

        // Bridge without MCP support
        userspace::reset();
        userspace::set_bridge_mcp_capable(false);
        assert_eq!(
            McpCapability::negotiate(arch::cpu_model()),
            McpCapability::Polling
        );
        assert_eq!(userspace::read_hid(StatusRegister::Hid1), 0);

        // Errors that can't be cleared
        userspace::reset();
        userspace::latch_bridge_error(userspace::BRIDGE_ERROR_BITS);
        userspace::set_bridge_stuck(true);
        assert_eq!(
            McpCapability::negotiate(arch::cpu_model()),
            McpCapability::Polling
        );
        assert!(!userspace::bridge_mcp_armed());
        assert_eq!(userspace::read_hid(StatusRegister::Hid1), 0);
    }

    #[test]
    fn global_entry_points() {
        let _machine = machine();

        write::<u16>(RAM + 0x80, 0xbeef).unwrap();
        assert_eq!(read::<u16>(RAM + 0x80), Ok(0xbeef));

        let mut value = [0u8; 1];
        probe(RAM + 0x80, false, 1, Some(&mut value)).unwrap();
        assert_eq!(value[0], 0xbeefu16.to_ne_bytes()[0]);

        assert!(matches!(
            read::<u8>(UNMAPPED),
            Err(ProbeError::InvalidAddress { .. })
        ));
    }

    #[test]
    fn concurrent_init() {
        let _machine = machine();
        userspace::reset();
        let cell = Once::new();

        let probers: std::vec::Vec<usize> = std::thread::scope(|s| {
            let threads: std::vec::Vec<_> = (0..4)
                .map(|_| s.spawn(|| init_once(&cell) as *const MemProbe as usize))
                .collect();
            threads.into_iter().map(|t| t.join().unwrap()).collect()
        });

        assert!(probers.iter().all(|p| *p == probers[0]));
        assert_eq!(cell.get().map(MemProbe::capability), Some(McpCapability::MachineCheck));
        // Clear, check, then arm: a single negotiation
        assert_eq!(userspace::bridge_clear_calls(), 3);
        assert!(dispatch::is_installed());
    }

    #[test]
    fn quiet_probing() {
        let _machine = machine();
        let verbosity = debug::verbosity();

        debug::set_verbosity(0);
        assert_eq!(negotiated().read::<u8>(RAM), Ok(0));
        debug::set_verbosity(verbosity);
    }
}
