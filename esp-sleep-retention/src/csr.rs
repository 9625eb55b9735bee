//! # Control and status register numbers
//!
//! Standard RISC-V CSR numbers plus the Espressif custom CSRs that the
//! non-critical retention frame captures on one or more devices.

#![allow(missing_docs)]

/// A RISC-V control and status register number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Csr(u16);

impl Csr {
    /// Creates a CSR from its 12-bit number.
    pub const fn new(number: u16) -> Self {
        ::core::assert!(number < 0x1000, "CSR numbers are 12 bits wide");
        Self(number)
    }

    /// The 12-bit CSR number.
    pub const fn number(self) -> u16 {
        self.0
    }

    /// `pmpaddrN`
    pub const fn pmpaddr(n: usize) -> Self {
        ::core::assert!(n < 16);
        Self(PMPADDR0.0 + n as u16)
    }

    /// `pmpcfgN`. On RV32 each register packs the configuration of four
    /// PMP entries.
    pub const fn pmpcfg(n: usize) -> Self {
        ::core::assert!(n < 4);
        Self(PMPCFG0.0 + n as u16)
    }

    /// Espressif `pmaaddrN`
    pub const fn pmaaddr(n: usize) -> Self {
        ::core::assert!(n < 16);
        Self(PMAADDR0.0 + n as u16)
    }

    /// Espressif `pmacfgN`, one register per PMA entry.
    pub const fn pmacfg(n: usize) -> Self {
        ::core::assert!(n < 16);
        Self(PMACFG0.0 + n as u16)
    }
}

// User mode
pub const USTATUS: Csr = Csr(0x000);
pub const UTVEC: Csr = Csr(0x005);
pub const UEPC: Csr = Csr(0x041);
pub const UCAUSE: Csr = Csr(0x042);
pub const JVT: Csr = Csr(0x017);

// Machine mode
pub const MSTATUS: Csr = Csr(0x300);
pub const MISA: Csr = Csr(0x301);
pub const MIDELEG: Csr = Csr(0x303);
pub const MTVT: Csr = Csr(0x307);
pub const MSCRATCH: Csr = Csr(0x340);
pub const MINTTHRESH: Csr = Csr(0x347);
pub const MCLICBASE: Csr = Csr(0x350);
pub const PMPCFG0: Csr = Csr(0x3a0);
pub const PMPADDR0: Csr = Csr(0x3b0);

// Debug triggers
pub const TSELECT: Csr = Csr(0x7a0);
pub const TDATA1: Csr = Csr(0x7a1);
pub const TDATA2: Csr = Csr(0x7a2);
pub const TCONTROL: Csr = Csr(0x7a5);

// Espressif machine-mode performance counters
pub const MPCER: Csr = Csr(0x7e0);
pub const MPCMR: Csr = Csr(0x7e1);
pub const MPCCR: Csr = Csr(0x7e2);
pub const CPU_TESTBUS_CTRL: Csr = Csr(0x7e3);

// Espressif user-mode shadows
pub const PM_USER: Csr = Csr(0x802);
pub const GPIO_OEN_USER: Csr = Csr(0x803);
pub const GPIO_IN_USER: Csr = Csr(0x804);
pub const GPIO_OUT_USER: Csr = Csr(0x805);

// Espressif hardware loop and exception status (ESP32-P4 class cores)
pub const MXSTATUS: Csr = Csr(0x7c0);
pub const MHCR: Csr = Csr(0x7c1);
pub const MHINT: Csr = Csr(0x7c5);
pub const MEXSTATUS: Csr = Csr(0x7d0);
pub const LPSTART0: Csr = Csr(0xcc0);
pub const LPEND0: Csr = Csr(0xcc1);
pub const LPCOUNT0: Csr = Csr(0xcc2);
pub const LPSTART1: Csr = Csr(0xcc4);
pub const LPEND1: Csr = Csr(0xcc5);
pub const LPCOUNT1: Csr = Csr(0xcc6);
pub const UHWLPSTATE: Csr = Csr(0x808);

// Espressif physical memory attributes
pub const PMACFG0: Csr = Csr(0xbc0);
pub const PMAADDR0: Csr = Csr(0xbd0);

/// Machine interrupt enable bit of `mstatus`.
pub const MSTATUS_MIE: usize = 1 << 3;
