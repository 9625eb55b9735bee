//! # Inter-processor calls
//!
//! ## Overview
//! On dual-core devices the core driving a sleep request has to get the
//! other core into the retention handler, or park it while the sleep runs
//! without powering the CPU domain down. Both are done by raising the
//! other core's "interrupt from CPU" line; the other core's interrupt
//! handler calls [`IpcMailbox::handle`], which runs the posted call or
//! parks the core.
//!
//! Nothing here blocks on a scheduler: every wait is a busy-wait on
//! atomics, as the scheduler is not running while this code is in use.

use core::sync::atomic::{AtomicPtr, AtomicU8, Ordering};

use crate::{
    platform::{RegisterAccess, relax},
    soc::{Cpu, MAX_CORES},
};

/// A function posted to another core.
pub type IpcHandler = unsafe fn(arg: *const ());

const CALL_IDLE: u8 = 0;
const CALL_POSTED: u8 = 1;
const CALL_RUNNING: u8 = 2;
const CALL_CLAIMED: u8 = 3;

const STALL_NONE: u8 = 0;
const STALL_REQUESTED: u8 = 1;
const STALL_ACTIVE: u8 = 2;

struct Slot {
    call: AtomicU8,
    handler: AtomicPtr<()>,
    arg: AtomicPtr<()>,
    stall: AtomicU8,
}

impl Slot {
    const fn new() -> Self {
        Self {
            call: AtomicU8::new(CALL_IDLE),
            handler: AtomicPtr::new(core::ptr::null_mut()),
            arg: AtomicPtr::new(core::ptr::null_mut()),
            stall: AtomicU8::new(STALL_NONE),
        }
    }
}

/// Calls into and stalls of the other core.
pub struct IpcMailbox {
    intr_regs: &'static [usize],
    slots: [Slot; MAX_CORES],
}

impl IpcMailbox {
    /// Creates a mailbox raising the "interrupt from CPU" lines in
    /// `intr_regs`, one register per target core.
    pub const fn new(intr_regs: &'static [usize]) -> Self {
        Self {
            intr_regs,
            slots: [const { Slot::new() }; MAX_CORES],
        }
    }

    fn raise(&self, regs: &impl RegisterAccess, target: Cpu) {
        regs.write(self.intr_regs[target.index()], 1);
    }

    /// Runs `handler(arg)` on the core other than `from` and returns once
    /// that core has started executing it.
    ///
    /// # Safety
    ///
    /// `arg` must stay valid for as long as `handler` uses it.
    pub unsafe fn call(&self, regs: &impl RegisterAccess, from: Cpu, handler: IpcHandler, arg: *const ()) {
        let slot = &self.slots[from.other().index()];

        while slot
            .call
            .compare_exchange(CALL_IDLE, CALL_CLAIMED, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            relax();
        }

        slot.handler.store(handler as *mut (), Ordering::Relaxed);
        slot.arg.store(arg.cast_mut(), Ordering::Relaxed);
        // Publishes the handler and argument.
        slot.call.store(CALL_POSTED, Ordering::Release);

        self.raise(regs, from.other());

        while slot.call.load(Ordering::Acquire) == CALL_POSTED {
            relax();
        }
    }

    /// Parks the core other than `from` in its interrupt handler until
    /// [`IpcMailbox::release_other`] is called.
    pub fn stall_other(&self, regs: &impl RegisterAccess, from: Cpu) {
        let slot = &self.slots[from.other().index()];
        slot.stall.store(STALL_REQUESTED, Ordering::Release);
        self.raise(regs, from.other());

        while slot.stall.load(Ordering::Acquire) != STALL_ACTIVE {
            relax();
        }
    }

    /// Releases a core parked by [`IpcMailbox::stall_other`].
    pub fn release_other(&self, from: Cpu) {
        let slot = &self.slots[from.other().index()];
        // Only release an actual stall, a pending request is left alone.
        let _ = slot
            .stall
            .compare_exchange(STALL_ACTIVE, STALL_NONE, Ordering::AcqRel, Ordering::Relaxed);
    }

    /// Raises the "interrupt from CPU" of the core other than `from` without
    /// posting anything, to get it out of a `wfi`.
    pub fn notify(&self, regs: &impl RegisterAccess, from: Cpu) {
        self.raise(regs, from.other());
    }

    /// Whether `core` has a call or a stall pending.
    pub fn is_pending(&self, core: Cpu) -> bool {
        let slot = &self.slots[core.index()];
        slot.call.load(Ordering::Acquire) == CALL_POSTED || slot.stall.load(Ordering::Acquire) == STALL_REQUESTED
    }

    /// Serves the "interrupt from CPU" of `core`. Must be called from that
    /// interrupt's handler on `core`.
    pub fn handle(&self, regs: &impl RegisterAccess, core: Cpu) {
        regs.write(self.intr_regs[core.index()], 0);

        let slot = &self.slots[core.index()];

        if slot
            .call
            .compare_exchange(CALL_POSTED, CALL_RUNNING, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
        {
            let handler = slot.handler.load(Ordering::Relaxed);
            let arg = slot.arg.load(Ordering::Relaxed);
            // SAFETY: only `call` stores into `handler`, always an `IpcHandler`.
            let handler = unsafe { core::mem::transmute::<*mut (), IpcHandler>(handler) };
            unsafe { handler(arg.cast_const()) };
            slot.call.store(CALL_IDLE, Ordering::Release);
        }

        if slot
            .stall
            .compare_exchange(STALL_REQUESTED, STALL_ACTIVE, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
        {
            while slot.stall.load(Ordering::Acquire) == STALL_ACTIVE {
                relax();
            }
        }
    }
}
