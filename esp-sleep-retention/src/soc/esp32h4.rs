use super::{Capabilities, Chip, Core1Gate, DeviceDomain, DeviceRegions, RegRange, UartRegs};
use crate::csr::*;

const DR_REG_CLIC_BASE: usize = 0x2080_0000;
const DR_REG_CLIC_CTRL_BASE: usize = 0x2080_1000;
const DR_REG_CLINT_M_BASE: usize = 0x2000_1800;
const DR_REG_CACHE_BASE: usize = 0x3a00_0000;
const DR_REG_HP_SYSTEM_BASE: usize = 0x6009_5000;
const DR_REG_LP_AON_BASE: usize = 0x600b_1000;
const DR_REG_PCR_BASE: usize = 0x6009_6000;

const CLIC_EXT_INTR_NUM_OFFSET: usize = 16;
const CLIC_INT_LINES: usize = 48;

const CLIC: &[RegRange] = &[
    RegRange::new(DR_REG_CLIC_BASE, DR_REG_CLIC_BASE + 0x0c),
    RegRange::new(DR_REG_CLIC_CTRL_BASE + 3 * 4, DR_REG_CLIC_CTRL_BASE + 8 * 4),
    RegRange::new(
        DR_REG_CLIC_CTRL_BASE + CLIC_EXT_INTR_NUM_OFFSET * 4,
        DR_REG_CLIC_CTRL_BASE + CLIC_INT_LINES * 4,
    ),
];

const CLINT: &[RegRange] = &[RegRange::new(DR_REG_CLINT_M_BASE, DR_REG_CLINT_M_BASE + 0x14)];

const CACHE_CONFIG: &[RegRange] = &[
    RegRange::single(DR_REG_CACHE_BASE + 0x04),
    RegRange::new(DR_REG_CACHE_BASE + 0x20, DR_REG_CACHE_BASE + 0x28),
];

pub(super) const CAPABILITIES: Capabilities = Capabilities {
    chip: Chip::Esp32h4,
    cores: 2,
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
        GPIO_OEN_USER,
        GPIO_IN_USER,
        GPIO_OUT_USER,
        LPSTART0,
        LPEND0,
        LPCOUNT0,
        LPSTART1,
        LPEND1,
        LPCOUNT1,
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
    core1_gate: Some(Core1Gate {
        // CORE1_CLK_CTRL
        clock_reg: DR_REG_HP_SYSTEM_BASE + 0x10,
        clock_mask: 1 << 0,
        // CORE1_RST_CTRL
        reset_reg: DR_REG_HP_SYSTEM_BASE + 0x14,
        reset_mask: 1 << 0,
    }),
    // CPU_INTR_FROM_CPU_0, CPU_INTR_FROM_CPU_1
    ipc_intr_regs: &[DR_REG_HP_SYSTEM_BASE + 0x28, DR_REG_HP_SYSTEM_BASE + 0x2c],
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
