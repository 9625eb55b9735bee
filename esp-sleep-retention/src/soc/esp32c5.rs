use super::{Capabilities, Chip, DeviceDomain, DeviceRegions, RegRange, UartRegs};
use crate::csr::*;

const DR_REG_CLIC_BASE: usize = 0x2080_0000;
const DR_REG_CLIC_CTRL_BASE: usize = 0x2080_1000;
const DR_REG_CLINT_M_BASE: usize = 0x2000_1800;
const DR_REG_CACHE_BASE: usize = 0x3a00_0000;
const DR_REG_LP_AON_BASE: usize = 0x600b_1000;
const DR_REG_PCR_BASE: usize = 0x6009_6000;

/// External interrupts start at CLIC line 16.
const CLIC_EXT_INTR_NUM_OFFSET: usize = 16;
const CLIC_INT_LINES: usize = 48;

const CLIC: &[RegRange] = &[
    // CLICCFG, CLICINFO, MINTTHRESH
    RegRange::new(DR_REG_CLIC_BASE, DR_REG_CLIC_BASE + 0x0c),
    // INT_CTRL of the machine timer and software interrupt lines
    RegRange::new(DR_REG_CLIC_CTRL_BASE + 3 * 4, DR_REG_CLIC_CTRL_BASE + 8 * 4),
    // INT_CTRL of the external interrupt lines
    RegRange::new(
        DR_REG_CLIC_CTRL_BASE + CLIC_EXT_INTR_NUM_OFFSET * 4,
        DR_REG_CLIC_CTRL_BASE + CLIC_INT_LINES * 4,
    ),
];

const CLINT: &[RegRange] = &[RegRange::new(DR_REG_CLINT_M_BASE, DR_REG_CLINT_M_BASE + 0x14)];

const CACHE_CONFIG: &[RegRange] = &[
    // L1_CACHE_CTRL
    RegRange::single(DR_REG_CACHE_BASE + 0x04),
    // L1_CACHE_WRAP_AROUND_CTRL ..= L1_CACHE_AUTOLOAD_CTRL
    RegRange::new(DR_REG_CACHE_BASE + 0x20, DR_REG_CACHE_BASE + 0x28),
];

pub(super) const CAPABILITIES: Capabilities = Capabilities {
    chip: Chip::Esp32c5,
    cores: 1,
    pmp_entries: 16,
    pma_entries: 16,
    core_csrs: &[
        MSCRATCH,
        MISA,
        TSELECT,
        TDATA1,
        TDATA2,
        TCONTROL,
        MTVT,
        MINTTHRESH,
        JVT,
        MPCER,
        MPCMR,
        MPCCR,
        CPU_TESTBUS_CTRL,
        PM_USER,
        GPIO_OEN_USER,
        GPIO_IN_USER,
        GPIO_OUT_USER,
    ],
    devices: &[
        DeviceRegions {
            domain: DeviceDomain::Clic,
            per_core: true,
            ranges: CLIC,
        },
        DeviceRegions {
            domain: DeviceDomain::Clint,
            per_core: true,
            ranges: CLINT,
        },
        DeviceRegions {
            domain: DeviceDomain::CacheConfig,
            per_core: false,
            ranges: CACHE_CONFIG,
        },
    ],
    wake_stub_reg: DR_REG_LP_AON_BASE + 0x20,
    core1_gate: None,
    ipc_intr_regs: &[],
    uarts: &[
        UartRegs {
            base: 0x6000_0000,
            clk_en_reg: DR_REG_PCR_BASE + 0x04,
            clk_en_mask: 1 << 0,
            rst_reg: DR_REG_PCR_BASE + 0x04,
            rst_mask: 1 << 1,
        },
        UartRegs {
            base: 0x6000_1000,
            clk_en_reg: DR_REG_PCR_BASE + 0x18,
            clk_en_mask: 1 << 0,
            rst_reg: DR_REG_PCR_BASE + 0x18,
            rst_mask: 1 << 1,
        },
    ],
};
