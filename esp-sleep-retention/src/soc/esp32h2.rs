use super::{Capabilities, Chip, DeviceDomain, DeviceRegions, RegRange, UartRegs};
use crate::csr::*;

const DR_REG_INTPRI_BASE: usize = 0x600c_5000;
const DR_REG_CACHE_BASE: usize = 0x600c_8000;
const DR_REG_PLIC_MX_BASE: usize = 0x2000_1000;
const DR_REG_PLIC_UX_BASE: usize = 0x2000_1400;
const DR_REG_CLINT_M_BASE: usize = 0x2000_1800;
const DR_REG_CLINT_U_BASE: usize = 0x2000_1c00;
const DR_REG_LP_AON_BASE: usize = 0x600b_1000;
const DR_REG_PCR_BASE: usize = 0x6009_6000;

const INTPRI: &[RegRange] = &[RegRange::new(DR_REG_INTPRI_BASE, DR_REG_INTPRI_BASE + 0x9c)];

const PLIC: &[RegRange] = &[
    RegRange::new(DR_REG_PLIC_MX_BASE, DR_REG_PLIC_MX_BASE + 0x98),
    RegRange::single(DR_REG_PLIC_MX_BASE + 0xc0),
    RegRange::new(DR_REG_PLIC_UX_BASE, DR_REG_PLIC_UX_BASE + 0x98),
    RegRange::single(DR_REG_PLIC_UX_BASE + 0xc0),
];

const CLINT: &[RegRange] = &[
    RegRange::new(DR_REG_CLINT_M_BASE, DR_REG_CLINT_M_BASE + 0x14),
    RegRange::new(DR_REG_CLINT_U_BASE, DR_REG_CLINT_U_BASE + 0x14),
];

const CACHE_CONFIG: &[RegRange] = &[
    RegRange::single(DR_REG_CACHE_BASE + 0x04),
    RegRange::single(DR_REG_CACHE_BASE + 0x20),
];

pub(super) const CAPABILITIES: Capabilities = Capabilities {
    chip: Chip::Esp32h2,
    cores: 1,
    pmp_entries: 16,
    pma_entries: 16,
    core_csrs: &[
        MSCRATCH,
        MIDELEG,
        MISA,
        TSELECT,
        TDATA1,
        TDATA2,
        TCONTROL,
        UTVEC,
        USTATUS,
        UEPC,
        UCAUSE,
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
            domain: DeviceDomain::Plic,
            per_core: true,
            ranges: PLIC,
        },
        DeviceRegions {
            domain: DeviceDomain::Clint,
            per_core: true,
            ranges: CLINT,
        },
        DeviceRegions {
            domain: DeviceDomain::IntPri,
            per_core: true,
            ranges: INTPRI,
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
