//! # Dual-core rendezvous
//!
//! ## Overview
//! When both cores share the CPU power domain, neither may be in the middle
//! of saving its context when the power is cut, and neither may resume
//! before the other has restored. Each core publishes its progress as an
//! [`SmpState`] and waits on the other core's state before every step that
//! depends on it.
//!
//! The core driving the sleep request runs
//! [`CpuRetention::sleep_cpu_retention`]; the other core is brought into
//! the same sequence through an inter-processor call made by
//! [`CpuRetention::smp_sleep_prepare`].
//!
//! No wait has a timeout. A core that never reaches the state the other one
//! waits for keeps the other spinning.

use core::sync::atomic::{AtomicU8, Ordering};

use allocator_api2::alloc::Allocator;

use crate::{
    CpuRetention,
    frame::PmuFunc,
    integrity,
    platform::{Platform, relax},
    soc::{Cpu, MAX_CORES},
};

/// Retention progress of one core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum SmpState {
    /// No retention in progress.
    Idle = 0,
    /// Saving the non-critical frame and device snapshots.
    BackupStart,
    /// Everything saved, ready for the CPU domain to power down.
    BackupDone,
    /// Restoring after wake-up.
    RestoreStart,
    /// Restore complete.
    RestoreDone,
    /// Not taking part in this sleep cycle.
    SkipRetention,
}

impl SmpState {
    const fn from_u8(value: u8) -> Self {
        match value {
            1 => SmpState::BackupStart,
            2 => SmpState::BackupDone,
            3 => SmpState::RestoreStart,
            4 => SmpState::RestoreDone,
            5 => SmpState::SkipRetention,
            _ => SmpState::Idle,
        }
    }
}

/// The published state of every core.
pub(crate) struct Rendezvous {
    states: [AtomicU8; MAX_CORES],
}

impl Rendezvous {
    pub(crate) const fn new() -> Self {
        Self {
            states: [const { AtomicU8::new(SmpState::Idle as u8) }; MAX_CORES],
        }
    }

    pub(crate) fn reset(&self) {
        for state in &self.states {
            state.store(SmpState::Idle as u8, Ordering::Release);
        }
    }

    pub(crate) fn get(&self, core: Cpu) -> SmpState {
        SmpState::from_u8(self.states[core.index()].load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, core: Cpu, state: SmpState) {
        self.states[core.index()].store(state as u8, Ordering::Release);
    }

    /// Spins until the state of `core` satisfies `f` and returns that state.
    pub(crate) fn wait_until(&self, core: Cpu, f: impl Fn(SmpState) -> bool) -> SmpState {
        loop {
            let state = self.get(core);
            if f(state) {
                return state;
            }
            relax();
        }
    }

    pub(crate) fn wait_for(&self, core: Cpu, expected: SmpState) {
        self.wait_until(core, |state| state == expected);
    }
}

unsafe fn smp_core_do_retention<P, A>(arg: *const ())
where
    P: Platform,
    A: Allocator + Clone,
{
    // SAFETY: `smp_sleep_prepare` posts a `&'static CpuRetention<P, A>`.
    let retention = unsafe { &*arg.cast::<CpuRetention<P, A>>() };
    retention.smp_core_do_retention();
}

impl<P, A> CpuRetention<P, A>
where
    P: Platform,
    A: Allocator + Clone,
{
    /// The published retention state of `core`.
    pub fn smp_state(&self, core: Cpu) -> SmpState {
        self.smp.get(core)
    }

    /// Opts the current core out of the upcoming sleep cycle. A core waiting
    /// in the retention handler mirrors the decision instead of waiting for
    /// a backup that never starts.
    pub fn skip_retention(&self) {
        self.smp.set(self.platform.current_core(), SmpState::SkipRetention);
    }

    /// Brings the other core into the sleep cycle, from the core about to
    /// call [`CpuRetention::sleep_cpu_retention`].
    ///
    /// Waits for the other core to have finished the previous cycle. If the
    /// CPU domain may power down the other core runs the retention handler,
    /// otherwise it is stalled until [`CpuRetention::smp_wakeup_prepare`].
    pub fn smp_sleep_prepare(&'static self)
    where
        P: 'static,
        A: 'static,
    {
        if !self.smp_enabled() {
            return;
        }

        let core = self.platform.current_core();
        self.smp.wait_for(core.other(), SmpState::Idle);

        if self.cpu_domain_pd_allowed() {
            let arg = (self as *const Self).cast::<()>();
            unsafe {
                self.ipc
                    .call(&self.platform, core, smp_core_do_retention::<P, A>, arg)
            };
        } else {
            self.ipc.stall_other(&self.platform, core);
        }
    }

    /// Ends the sleep cycle on the driving core after
    /// [`CpuRetention::sleep_cpu_retention`] returned.
    pub fn smp_wakeup_prepare(&self) {
        if !self.smp_enabled() {
            return;
        }

        let core = self.platform.current_core();
        if self.smp.get(core) == SmpState::RestoreDone {
            self.smp.wait_for(core.other(), SmpState::RestoreDone);
        }
        self.smp.set(core, SmpState::Idle);

        if !self.cpu_domain_pd_allowed() {
            self.ipc.release_other(core);
        }
    }

    /// Serves the "interrupt from CPU" of the current core. Call this from
    /// that interrupt's handler on every core.
    pub fn handle_ipc(&self) {
        self.ipc.handle(&self.platform, self.platform.current_core());
    }

    /// Retention on the core that is not driving the sleep request.
    fn smp_core_do_retention(&self) {
        let core = self.platform.current_core();
        let other = core.other();

        // The driving core may already be past `BackupStart` by the time this
        // core gets here.
        let other_state = self.smp.wait_until(other, |state| state != SmpState::Idle);

        if other_state == SmpState::SkipRetention {
            self.smp.set(core, SmpState::SkipRetention);
        } else {
            self.smp.set(core, SmpState::BackupStart);
            let mstatus = self.platform.disable_interrupts();

            // SAFETY: only this core touches its own frames while it is
            // outside `SmpState::Idle`.
            let frames = unsafe { self.frames.core(core) };
            self.save_devices(frames, None);
            self.save_non_critical(frames);

            let critical = unwrap!(frames.critical.as_ref()).as_non_null();
            unsafe { self.platform.save_critical_regs(critical) };
            let frame = unsafe { &mut *critical.as_ptr() };

            match frame.pmu_func() {
                PmuFunc::Saved => {
                    if self.config.check_frames() {
                        integrity::stamp(frame);
                    }
                    self.smp.set(core, SmpState::BackupDone);

                    // Left through the restore routine once the CPU domain
                    // powers down. The driving core only moves on from
                    // `BackupDone` here if the sleep ended without a power down.
                    while self.smp.get(other) == SmpState::BackupDone {
                        self.platform.wait_for_interrupt();
                    }
                }
                PmuFunc::Resumed => {
                    if self.config.check_frames() {
                        integrity::validate_or_restart(frame, self.caps, &self.platform);
                    }
                }
            }

            self.restore_core(core, frames, None, mstatus);
        }

        self.smp.wait_for(other, SmpState::Idle);
        self.smp.set(core, SmpState::Idle);
    }
}
