//! # Per-device retention capabilities
//!
//! ## Overview
//! The devices supported by this crate implement the same retention scheme
//! but differ in which CSR banks exist, which interrupt controller and timer
//! blocks lose their state when the CPU power domain is switched off, and
//! where the relevant hardware registers live. All of that is captured in a
//! [`Capabilities`] descriptor, which is what the retention engine is
//! parametrized by.
//!
//! The descriptor for the device selected through the chip feature is
//! available as [`Chip::current()`]`.capabilities()`.

use crate::{csr::Csr, platform::RegisterAccess};

mod esp32c5;
mod esp32c6;
mod esp32h2;
mod esp32h4;
mod esp32p4;

/// Maximum number of cores taking part in retention.
pub const MAX_CORES: usize = 2;

/// Maximum number of device snapshots a descriptor may declare.
pub const MAX_DEVICES: usize = 6;

/// Maximum number of non-PMP/PMA CSRs in the non-critical frame.
pub const MAX_CORE_CSRS: usize = 32;

/// Maximum number of PMP entries.
pub const MAX_PMP_ENTRIES: usize = 16;

/// Maximum number of PMA entries.
pub const MAX_PMA_ENTRIES: usize = 16;

/// Available CPU cores
///
/// The actual number of available cores depends on the target.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(C)]
pub enum Cpu {
    /// The first core
    ProCpu = 0,
    /// The second core
    AppCpu = 1,
}

impl Cpu {
    /// All cores, in core id order.
    pub const ALL: [Cpu; MAX_CORES] = [Cpu::ProCpu, Cpu::AppCpu];

    /// Returns the core with the given hart id.
    pub fn from_hart_id(id: usize) -> Self {
        match id {
            0 => Cpu::ProCpu,
            1 => Cpu::AppCpu,
            _ => panic!("unexpected hart id {}", id),
        }
    }

    /// The core id as an index.
    #[inline(always)]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// The other core of a dual-core device.
    #[inline(always)]
    pub const fn other(self) -> Self {
        match self {
            Cpu::ProCpu => Cpu::AppCpu,
            Cpu::AppCpu => Cpu::ProCpu,
        }
    }
}

/// Supported devices.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub enum Chip {
    /// ESP32-C5
    Esp32c5,
    /// ESP32-C6
    Esp32c6,
    /// ESP32-H2
    Esp32h2,
    /// ESP32-H4
    Esp32h4,
    /// ESP32-P4
    Esp32p4,
}

impl Chip {
    /// The device selected by the enabled chip feature.
    #[cfg(any(
        feature = "esp32c5",
        feature = "esp32c6",
        feature = "esp32h2",
        feature = "esp32h4",
        feature = "esp32p4"
    ))]
    pub const fn current() -> Self {
        cfg_if::cfg_if! {
            if #[cfg(feature = "esp32c5")] {
                Chip::Esp32c5
            } else if #[cfg(feature = "esp32c6")] {
                Chip::Esp32c6
            } else if #[cfg(feature = "esp32h2")] {
                Chip::Esp32h2
            } else if #[cfg(feature = "esp32h4")] {
                Chip::Esp32h4
            } else {
                Chip::Esp32p4
            }
        }
    }

    /// The retention capabilities of this device.
    pub const fn capabilities(self) -> &'static Capabilities {
        match self {
            Chip::Esp32c5 => &esp32c5::CAPABILITIES,
            Chip::Esp32c6 => &esp32c6::CAPABILITIES,
            Chip::Esp32h2 => &esp32h2::CAPABILITIES,
            Chip::Esp32h4 => &esp32h4::CAPABILITIES,
            Chip::Esp32p4 => &esp32p4::CAPABILITIES,
        }
    }
}

/// A `[start, end)` window of memory-mapped 32-bit registers.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(C)]
pub struct RegRange {
    /// Address of the first register.
    pub start: usize,
    /// Address one past the last register.
    pub end: usize,
}

impl RegRange {
    /// Creates a new range. Both bounds must be word aligned.
    pub const fn new(start: usize, end: usize) -> Self {
        ::core::assert!(start <= end);
        ::core::assert!(start % 4 == 0 && end % 4 == 0);
        Self { start, end }
    }

    /// A range covering the single register at `addr`.
    pub const fn single(addr: usize) -> Self {
        Self::new(addr, addr + 4)
    }

    /// Number of 32-bit registers in the range.
    pub const fn words(&self) -> usize {
        (self.end - self.start) / 4
    }

    /// Iterates over the register addresses in ascending order.
    pub fn addresses(&self) -> impl Iterator<Item = usize> {
        (self.start..self.end).step_by(4)
    }
}

/// Total number of registers covered by a range table.
pub const fn total_words(ranges: &[RegRange]) -> usize {
    let mut words = 0;
    let mut i = 0;
    while i < ranges.len() {
        words += ranges[i].words();
        i += 1;
    }
    words
}

/// Hardware blocks in the CPU power domain whose registers are snapshotted.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DeviceDomain {
    /// Interrupt priority and routing block.
    IntPri,
    /// Platform-level interrupt controller.
    Plic,
    /// Core-local interruptor (machine timer compare and software interrupts).
    Clint,
    /// Core-local interrupt controller.
    Clic,
    /// Cache configuration.
    CacheConfig,
}

/// Register windows of one hardware block that loses state on power down.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DeviceRegions {
    /// Which block the windows belong to.
    pub domain: DeviceDomain,
    /// Whether every core sees its own instance of the block at the same
    /// addresses. Shared blocks are saved and restored by the core driving
    /// the sleep request only.
    pub per_core: bool,
    /// The register windows, in save order.
    pub ranges: &'static [RegRange],
}

/// Clock and reset gate of the second core.
///
/// While the CPU domain is powered down the second core is held in reset;
/// the driving core reopens the gate before it announces the restore.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Core1Gate {
    /// Register holding the core 1 clock enable.
    pub clock_reg: usize,
    /// Clock enable bit.
    pub clock_mask: u32,
    /// Register holding the core 1 global reset.
    pub reset_reg: usize,
    /// Reset bit.
    pub reset_mask: u32,
}

impl Core1Gate {
    pub(crate) fn open(&self, regs: &impl RegisterAccess) {
        regs.set_bits(self.clock_reg, self.clock_mask);
        regs.clear_bits(self.reset_reg, self.reset_mask);
    }
}

/// UART registers needed to release a flow-controlled console.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct UartRegs {
    /// Base address of the UART register block.
    pub base: usize,
    /// Register holding the bus clock enable of this UART.
    pub clk_en_reg: usize,
    /// Clock enable bits, all of which must be set.
    pub clk_en_mask: u32,
    /// Register holding the reset of this UART.
    pub rst_reg: usize,
    /// Reset bits, none of which may be set.
    pub rst_mask: u32,
}

impl UartRegs {
    const SWFC_CONF0: usize = 0x18;
    const REG_UPDATE: usize = 0x98;

    const SW_FLOW_CON_EN: u32 = 1 << 17;
    const FORCE_XON: u32 = 1 << 19;
    const FORCE_XOFF: u32 = 1 << 20;

    /// Whether the UART is clocked and out of reset.
    pub(crate) fn is_enabled(&self, regs: &impl RegisterAccess) -> bool {
        let clocked = regs.read(self.clk_en_reg) & self.clk_en_mask == self.clk_en_mask;
        let in_reset = regs.read(self.rst_reg) & self.rst_mask != 0;
        clocked && !in_reset
    }

    /// Forces the transmitter into the XON state so a peer that was told to
    /// stop sending is released.
    pub(crate) fn force_xon(&self, regs: &impl RegisterAccess) {
        let swfc = self.base + Self::SWFC_CONF0;
        let value = regs.read(swfc);
        regs.write(
            swfc,
            (value | Self::FORCE_XON | Self::SW_FLOW_CON_EN) & !Self::FORCE_XOFF,
        );

        // Sync the configuration into the UART core clock domain.
        let update = self.base + Self::REG_UPDATE;
        regs.write(update, 1);
        while regs.read(update) & 1 != 0 {
            core::hint::spin_loop();
        }
    }
}

/// Everything the retention engine needs to know about a device.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Capabilities {
    /// The device described.
    pub chip: Chip,
    /// Number of cores sharing the CPU power domain.
    pub cores: usize,
    /// Number of implemented PMP entries.
    pub pmp_entries: usize,
    /// Number of implemented PMA entries, 0 without the PMA extension.
    pub pma_entries: usize,
    /// CSRs captured in the non-critical frame besides the PMP and PMA
    /// banks, in save order.
    pub core_csrs: &'static [Csr],
    /// Device snapshots, in save order.
    pub devices: &'static [DeviceRegions],
    /// Register the ROM reads the critical-frame restore routine address
    /// from when the CPU domain powers back up.
    pub wake_stub_reg: usize,
    /// Clock and reset gate of the second core, on dual-core devices.
    pub core1_gate: Option<Core1Gate>,
    /// "Interrupt from CPU" trigger register targeting each core, on
    /// dual-core devices.
    pub ipc_intr_regs: &'static [usize],
    /// UARTs that may carry a console.
    pub uarts: &'static [UartRegs],
}

impl Capabilities {
    /// Whether the descriptor fits the fixed-size frame layouts.
    pub const fn is_valid(&self) -> bool {
        self.cores >= 1
            && self.cores <= MAX_CORES
            && (self.cores == 1 || self.ipc_intr_regs.len() >= self.cores)
            && self.pmp_entries <= MAX_PMP_ENTRIES
            && self.pma_entries <= MAX_PMA_ENTRIES
            && self.core_csrs.len() <= MAX_CORE_CSRS
            && self.devices.len() <= MAX_DEVICES
    }

    /// Number of `pmpcfg` registers backing `pmp_entries`.
    pub const fn pmpcfg_regs(&self) -> usize {
        self.pmp_entries.div_ceil(4)
    }

    /// Whether the second core takes part in retention.
    pub const fn is_multi_core(&self) -> bool {
        self.cores > 1
    }
}
