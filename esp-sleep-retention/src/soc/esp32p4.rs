use super::{Capabilities, Chip, Core1Gate, DeviceDomain, DeviceRegions, RegRange, UartRegs};
use crate::csr::*;

const DR_REG_CLIC_BASE: usize = 0x2080_0000;
const DR_REG_CLIC_CTRL_BASE: usize = 0x2080_1000;
const DR_REG_CLINT_M_BASE: usize = 0x2000_1800;
const DR_REG_CACHE_BASE: usize = 0x3ff1_0000;
const DR_REG_HP_SYS_BASE: usize = 0x500e_5000;
const DR_REG_HP_SYS_CLKRST_BASE: usize = 0x500e_6000;
const DR_REG_LP_SYS_BASE: usize = 0x5011_0000;

const CLIC_EXT_INTR_NUM_OFFSET: usize = 16;
const CLIC_INT_LINES: usize = 128;

const CLIC: &[RegRange] = &[
    RegRange::new(DR_REG_CLIC_BASE, DR_REG_CLIC_BASE + 0x0c),
    RegRange::new(DR_REG_CLIC_CTRL_BASE + 3 * 4, DR_REG_CLIC_CTRL_BASE + 8 * 4),
    RegRange::new(
        DR_REG_CLIC_CTRL_BASE + CLIC_EXT_INTR_NUM_OFFSET * 4,
        DR_REG_CLIC_CTRL_BASE + CLIC_INT_LINES * 4,
    ),
];

// MSIP, MTIMECTL, MTIME and MTIMECMP of the core-local interruptor.
const CLINT: &[RegRange] = &[RegRange::new(DR_REG_CLINT_M_BASE, DR_REG_CLINT_M_BASE + 0x14)];

const CACHE_CONFIG: &[RegRange] = &[
    // L1_ICACHE_CTRL ..= L1_DCACHE_CTRL
    RegRange::new(DR_REG_CACHE_BASE, DR_REG_CACHE_BASE + 0x08),
    // L1_CACHE_WRAP_AROUND_CTRL, L2_CACHE_WRAP_AROUND_CTRL
    RegRange::single(DR_REG_CACHE_BASE + 0x20),
    RegRange::single(DR_REG_CACHE_BASE + 0x2c),
    // L2_CACHE_CTRL
    RegRange::single(DR_REG_CACHE_BASE + 0x80),
];

const HP_SYS_CLKRST_SOC_CLK_CTRL0: usize = DR_REG_HP_SYS_CLKRST_BASE + 0x14;
const HP_SYS_CLKRST_SOC_CLK_CTRL2: usize = DR_REG_HP_SYS_CLKRST_BASE + 0x1c;
const HP_SYS_CLKRST_HP_RST_EN0: usize = DR_REG_HP_SYS_CLKRST_BASE + 0xc0;
const HP_SYS_CLKRST_HP_RST_EN1: usize = DR_REG_HP_SYS_CLKRST_BASE + 0xc4;

const fn uart(n: usize) -> UartRegs {
    UartRegs {
        base: 0x500c_a000 + n * 0x1000,
        clk_en_reg: HP_SYS_CLKRST_SOC_CLK_CTRL2,
        // REG_UARTn_APB_CLK_EN
        clk_en_mask: 1 << (16 + n),
        rst_reg: HP_SYS_CLKRST_HP_RST_EN1,
        // REG_RST_EN_UARTn_APB
        rst_mask: 1 << (10 + n),
    }
}

pub(super) const CAPABILITIES: Capabilities = Capabilities {
    chip: Chip::Esp32p4,
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
        MCLICBASE,
        JVT,
        MXSTATUS,
        MHCR,
        MHINT,
        MEXSTATUS,
        LPSTART0,
        LPEND0,
        LPCOUNT0,
        LPSTART1,
        LPEND1,
        LPCOUNT1,
        UHWLPSTATE,
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
    // LP_SYSTEM_REG_LP_STORE8
    wake_stub_reg: DR_REG_LP_SYS_BASE + 0x20,
    core1_gate: Some(Core1Gate {
        clock_reg: HP_SYS_CLKRST_SOC_CLK_CTRL0,
        // REG_CORE1_CPU_CLK_EN
        clock_mask: 1 << 1,
        reset_reg: HP_SYS_CLKRST_HP_RST_EN0,
        // REG_RST_EN_CORE1_GLOBAL
        reset_mask: 1 << 2,
    }),
    // CPU_INT_FROM_CPU_0, CPU_INT_FROM_CPU_1
    ipc_intr_regs: &[DR_REG_HP_SYS_BASE + 0x140, DR_REG_HP_SYS_BASE + 0x144],
    uarts: &[uart(0), uart(1), uart(2), uart(3), uart(4)],
};
