//! # Platform access
//!
//! ## Overview
//! The retention engine never touches hardware directly. Register windows,
//! CSRs, the architecture level critical-frame primitives and the PMU are
//! reached through the traits in this module, which the engine is generic
//! over.
//!
//! On `riscv32` targets the [`Esp`] type implements all of them on top of
//! volatile MMIO, inline assembly and the ROM and runtime symbols linked into the
//! application.

use core::ptr::NonNull;

use crate::{
    SleepError,
    csr::{Csr, MSTATUS, MSTATUS_MIE},
    frame::CriticalFrame,
    soc::Cpu,
};

/// Access to 32-bit memory-mapped registers.
pub trait RegisterAccess {
    /// Reads the register at `addr`.
    fn read(&self, addr: usize) -> u32;

    /// Writes `value` to the register at `addr`.
    fn write(&self, addr: usize, value: u32);

    /// Sets `mask` in the register at `addr`.
    fn set_bits(&self, addr: usize, mask: u32) {
        let value = self.read(addr);
        self.write(addr, value | mask);
    }

    /// Clears `mask` in the register at `addr`.
    fn clear_bits(&self, addr: usize, mask: u32) {
        let value = self.read(addr);
        self.write(addr, value & !mask);
    }
}

/// Access to the state of the core the caller is running on.
pub trait CoreAccess {
    /// The core executing the call.
    fn current_core(&self) -> Cpu;

    /// Reads a CSR of the current core.
    fn read_csr(&self, csr: Csr) -> usize;

    /// Writes a CSR of the current core.
    fn write_csr(&self, csr: Csr, value: usize);

    /// Clears the global machine interrupt enable and returns the previous
    /// `mstatus` value.
    fn disable_interrupts(&self) -> usize {
        let mstatus = self.read_csr(MSTATUS);
        self.write_csr(MSTATUS, mstatus & !MSTATUS_MIE);
        mstatus
    }

    /// Writes back an `mstatus` value returned by
    /// [`CoreAccess::disable_interrupts`].
    fn restore_interrupts(&self, mstatus: usize) {
        self.write_csr(MSTATUS, mstatus);
    }

    /// Tells the critical-frame primitives which frame belongs to `core`.
    /// `None` unbinds the frame before it is freed.
    fn bind_critical_frame(&self, core: Cpu, frame: Option<NonNull<CriticalFrame>>);

    /// Saves the critical registers of the current core into `frame`.
    ///
    /// After a power down of the CPU domain the restore routine resumes
    /// execution at the return of this call a second time, with the
    /// `pmufunc` field of the frame telling both returns apart.
    ///
    /// # Safety
    ///
    /// `frame` must be the frame bound to the current core and must stay
    /// allocated until the restore routine has run.
    unsafe fn save_critical_regs(&self, frame: NonNull<CriticalFrame>);

    /// Address of the routine restoring a critical frame, as published to
    /// the wake stub register.
    fn critical_restore_entry(&self) -> usize;
}

/// The PMU and system level operations used around a sleep.
pub trait PowerControl {
    /// Finishes a light sleep cycle that came back through the restore
    /// routine.
    fn sleep_finish(&self, deep_sleep: bool) -> Result<(), SleepError>;

    /// Stops the current core until an interrupt is pending, masked or not.
    ///
    /// May return spuriously; callers wait in a loop on the condition they
    /// need.
    fn wait_for_interrupt(&self);

    /// Restarts the system without any OS support.
    fn restart(&self) -> !;
}

/// One iteration of a busy-wait on another core.
#[inline(always)]
pub(crate) fn relax() {
    core::hint::spin_loop();
    // Simulated cores are threads that may share a single host CPU.
    #[cfg(test)]
    std::thread::yield_now();
}

/// Everything the retention engine needs from the platform.
pub trait Platform: RegisterAccess + CoreAccess + PowerControl {}

impl<T> Platform for T where T: RegisterAccess + CoreAccess + PowerControl {}

#[cfg(target_arch = "riscv32")]
pub use self::esp::Esp;

#[cfg(target_arch = "riscv32")]
mod esp {
    use core::sync::atomic::{Ordering, compiler_fence};

    use super::*;
    use crate::soc::MAX_CORES;

    unsafe extern "C" {
        /// One slot per core, read by the critical-frame primitives.
        static mut p_rv_core_critical_regs_frame: [*mut CriticalFrame; MAX_CORES];

        fn rv_core_critical_regs_save() -> *mut CriticalFrame;
        fn rv_core_critical_regs_restore();

        fn pmu_sleep_finish(dslp: bool) -> u32;
        fn software_reset() -> !;
    }

    macro_rules! csr_access {
        ($($csr:literal),+ $(,)?) => {
            fn csr_read(csr: u16) -> usize {
                match csr {
                    $(
                        $csr => {
                            let value: usize;
                            unsafe { core::arch::asm!("csrr {0}, {csr}", out(reg) value, csr = const $csr) };
                            value
                        }
                    )+
                    _ => panic!("unsupported CSR {}", csr),
                }
            }

            fn csr_write(csr: u16, value: usize) {
                match csr {
                    $(
                        $csr => unsafe {
                            core::arch::asm!("csrw {csr}, {0}", in(reg) value, csr = const $csr)
                        },
                    )+
                    _ => panic!("unsupported CSR {}", csr),
                }
            }
        };
    }

    csr_access!(
        0x000, 0x005, 0x017, 0x041, 0x042, // user mode
        0x300, 0x301, 0x303, 0x307, 0x340, 0x347, 0x350, // machine mode
        0x3a0, 0x3a1, 0x3a2, 0x3a3, // pmpcfg
        0x3b0, 0x3b1, 0x3b2, 0x3b3, 0x3b4, 0x3b5, 0x3b6, 0x3b7, // pmpaddr
        0x3b8, 0x3b9, 0x3ba, 0x3bb, 0x3bc, 0x3bd, 0x3be, 0x3bf,
        0x7a0, 0x7a1, 0x7a2, 0x7a5, // triggers
        0x7c0, 0x7c1, 0x7c5, 0x7d0, // exception and cache control
        0x7e0, 0x7e1, 0x7e2, 0x7e3, // performance counters
        0x802, 0x803, 0x804, 0x805, 0x808, // user shadows
        0xbc0, 0xbc1, 0xbc2, 0xbc3, 0xbc4, 0xbc5, 0xbc6, 0xbc7, // pmacfg
        0xbc8, 0xbc9, 0xbca, 0xbcb, 0xbcc, 0xbcd, 0xbce, 0xbcf,
        0xbd0, 0xbd1, 0xbd2, 0xbd3, 0xbd4, 0xbd5, 0xbd6, 0xbd7, // pmaaddr
        0xbd8, 0xbd9, 0xbda, 0xbdb, 0xbdc, 0xbdd, 0xbde, 0xbdf,
        0xcc0, 0xcc1, 0xcc2, 0xcc4, 0xcc5, 0xcc6, // hardware loops
    );

    /// The hardware platform.
    #[derive(Debug, Default, Clone, Copy)]
    #[non_exhaustive]
    pub struct Esp;

    impl Esp {
        /// Creates a handle to the hardware.
        pub const fn new() -> Self {
            Self
        }
    }

    impl RegisterAccess for Esp {
        #[inline(always)]
        fn read(&self, addr: usize) -> u32 {
            unsafe { (addr as *const u32).read_volatile() }
        }

        #[inline(always)]
        fn write(&self, addr: usize, value: u32) {
            unsafe { (addr as *mut u32).write_volatile(value) }
        }
    }

    impl CoreAccess for Esp {
        #[inline(always)]
        fn current_core(&self) -> Cpu {
            Cpu::from_hart_id(riscv::register::mhartid::read())
        }

        #[inline(always)]
        fn read_csr(&self, csr: Csr) -> usize {
            csr_read(csr.number())
        }

        #[inline(always)]
        fn write_csr(&self, csr: Csr, value: usize) {
            csr_write(csr.number(), value)
        }

        #[inline(always)]
        fn disable_interrupts(&self) -> usize {
            let mut mstatus = 0usize;
            unsafe { core::arch::asm!("csrrci {0}, mstatus, 8", inout(reg) mstatus) };
            compiler_fence(Ordering::SeqCst);
            mstatus
        }

        #[inline(always)]
        fn restore_interrupts(&self, mstatus: usize) {
            compiler_fence(Ordering::SeqCst);
            unsafe { core::arch::asm!("csrw mstatus, {0}", in(reg) mstatus) };
        }

        fn bind_critical_frame(&self, core: Cpu, frame: Option<NonNull<CriticalFrame>>) {
            let ptr = frame.map_or(core::ptr::null_mut(), NonNull::as_ptr);
            unsafe { (&raw mut p_rv_core_critical_regs_frame[core.index()]).write_volatile(ptr) };
        }

        unsafe fn save_critical_regs(&self, frame: NonNull<CriticalFrame>) {
            let saved = unsafe { rv_core_critical_regs_save() };
            debug_assert!(saved == frame.as_ptr());
        }

        fn critical_restore_entry(&self) -> usize {
            rv_core_critical_regs_restore as usize
        }
    }

    impl PowerControl for Esp {
        fn sleep_finish(&self, deep_sleep: bool) -> Result<(), SleepError> {
            match unsafe { pmu_sleep_finish(deep_sleep) } {
                0 => Ok(()),
                code => Err(SleepError::new(code)),
            }
        }

        #[inline(always)]
        fn wait_for_interrupt(&self) {
            unsafe { core::arch::asm!("wfi") };
        }

        fn restart(&self) -> ! {
            unsafe { software_reset() }
        }
    }
}
