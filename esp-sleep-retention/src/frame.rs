//! # Retention frames
//!
//! ## Overview
//! Every core taking part in retention owns two register frames:
//!
//! - the [`CriticalFrame`], filled and consumed by the architecture level
//!   save/restore primitives. The restore routine runs straight out of the
//!   ROM wake stub, before any Rust code, so its layout is fixed and shared
//!   with that routine.
//! - the [`NonCriticalFrame`], holding the rest of the CSR state, saved and
//!   restored by this crate once interrupts are disabled.
//!
//! Together with the device snapshots these form the frame set allocated by
//! [`FrameStore::init`].

use core::{
    cell::UnsafeCell,
    marker::PhantomData,
    mem::size_of,
    ops::{Deref, DerefMut},
    ptr::NonNull,
};

use allocator_api2::alloc::{AllocError, Allocator, Layout};

use crate::{
    csr::Csr,
    platform::CoreAccess,
    region::RegionSnapshot,
    soc::{
        Capabilities,
        Cpu,
        MAX_CORE_CSRS,
        MAX_CORES,
        MAX_DEVICES,
        MAX_PMA_ENTRIES,
        MAX_PMP_ENTRIES,
    },
};

/// Registers captured by the critical save primitive.
///
/// The layout is shared with the assembly save/restore routines. `pmufunc`
/// and `frame_crc` must stay the last two words.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct CriticalFrame {
    /// Return address of the save primitive.
    pub mepc: usize,
    /// `x1` to `x31`.
    pub gprs: [usize; 31],
    /// `mstatus`
    pub mstatus: usize,
    /// `mtvec`
    pub mtvec: usize,
    /// `mcause`
    pub mcause: usize,
    /// `mtval`
    pub mtval: usize,
    /// `mie`
    pub mie: usize,
    /// `mip`
    pub mip: usize,
    /// Mode tag written by the save and restore primitives. Only the low two
    /// bits are meaningful, see [`PmuFunc`].
    pub pmufunc: usize,
    /// CRC over everything before `pmufunc`.
    pub frame_crc: usize,
}

const _: () = {
    core::assert!(core::mem::offset_of!(CriticalFrame, pmufunc) == size_of::<CriticalFrame>() - 2 * size_of::<usize>());
    core::assert!(core::mem::offset_of!(CriticalFrame, frame_crc) == size_of::<CriticalFrame>() - size_of::<usize>());
};

impl CriticalFrame {
    /// Decodes the mode tag left by the last save or restore.
    pub fn pmu_func(&self) -> PmuFunc {
        PmuFunc::from_bits(self.pmufunc)
    }
}

/// How control returned from the critical save primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PmuFunc {
    /// The registers were just saved; the core is on its way into sleep.
    Saved,
    /// Control came back without a fresh save, through the restore routine
    /// run by the wake stub.
    Resumed,
}

impl PmuFunc {
    /// Tag value written by the save primitive.
    pub const SAVED_BITS: usize = 0b01;

    /// Decodes the low two bits of a `pmufunc` word.
    pub const fn from_bits(bits: usize) -> Self {
        if bits & 0b11 == Self::SAVED_BITS {
            PmuFunc::Saved
        } else {
            PmuFunc::Resumed
        }
    }
}

/// CSR state restored by software after wake-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct NonCriticalFrame {
    /// [`Capabilities::core_csrs`], in order.
    pub csrs: [usize; MAX_CORE_CSRS],
    /// `pmpaddr0..`
    pub pmpaddr: [usize; MAX_PMP_ENTRIES],
    /// `pmpcfg0..`
    pub pmpcfg: [usize; MAX_PMP_ENTRIES / 4],
    /// `pmaaddr0..`
    pub pmaaddr: [usize; MAX_PMA_ENTRIES],
    /// `pmacfg0..`
    pub pmacfg: [usize; MAX_PMA_ENTRIES],
    /// CRC over everything before this field.
    pub frame_crc: usize,
}

const _: () = core::assert!(
    core::mem::offset_of!(NonCriticalFrame, frame_crc) == size_of::<NonCriticalFrame>() - size_of::<usize>()
);

impl NonCriticalFrame {
    /// Reads every CSR described by `caps` from the current core.
    ///
    /// Must run with interrupts disabled.
    pub(crate) fn save(&mut self, caps: &Capabilities, core: &impl CoreAccess) {
        for (slot, csr) in self.csrs.iter_mut().zip(caps.core_csrs) {
            *slot = core.read_csr(*csr);
        }
        for n in 0..caps.pmp_entries {
            self.pmpaddr[n] = core.read_csr(Csr::pmpaddr(n));
        }
        for n in 0..caps.pmpcfg_regs() {
            self.pmpcfg[n] = core.read_csr(Csr::pmpcfg(n));
        }
        for n in 0..caps.pma_entries {
            self.pmaaddr[n] = core.read_csr(Csr::pmaaddr(n));
            self.pmacfg[n] = core.read_csr(Csr::pmacfg(n));
        }
    }

    /// Writes the frame back, in the same order it was saved in.
    pub(crate) fn restore(&self, caps: &Capabilities, core: &impl CoreAccess) {
        for (value, csr) in self.csrs.iter().zip(caps.core_csrs) {
            core.write_csr(*csr, *value);
        }
        for n in 0..caps.pmp_entries {
            core.write_csr(Csr::pmpaddr(n), self.pmpaddr[n]);
        }
        for n in 0..caps.pmpcfg_regs() {
            core.write_csr(Csr::pmpcfg(n), self.pmpcfg[n]);
        }
        for n in 0..caps.pma_entries {
            core.write_csr(Csr::pmaaddr(n), self.pmaaddr[n]);
            core.write_csr(Csr::pmacfg(n), self.pmacfg[n]);
        }
    }
}

/// Frame types that may be allocated zeroed.
///
/// # Safety
///
/// The all-zero bit pattern must be a valid value of the type.
pub(crate) unsafe trait Zeroable {}

unsafe impl Zeroable for CriticalFrame {}
unsafe impl Zeroable for NonCriticalFrame {}

/// A zero-initialized frame owned through an [`Allocator`].
pub(crate) struct FrameBox<T: Zeroable, A: Allocator> {
    ptr: NonNull<T>,
    alloc: A,
    _frame: PhantomData<T>,
}

impl<T: Zeroable, A: Allocator> FrameBox<T, A> {
    pub(crate) fn new_zeroed(alloc: A) -> Result<Self, AllocError> {
        let ptr = alloc.allocate_zeroed(Layout::new::<T>())?;
        Ok(Self {
            ptr: ptr.cast(),
            alloc,
            _frame: PhantomData,
        })
    }

    pub(crate) fn as_non_null(&self) -> NonNull<T> {
        self.ptr
    }
}

impl<T: Zeroable, A: Allocator> Deref for FrameBox<T, A> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { self.ptr.as_ref() }
    }
}

impl<T: Zeroable, A: Allocator> DerefMut for FrameBox<T, A> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { self.ptr.as_mut() }
    }
}

impl<T: Zeroable, A: Allocator> Drop for FrameBox<T, A> {
    fn drop(&mut self) {
        unsafe { self.alloc.deallocate(self.ptr.cast(), Layout::new::<T>()) }
    }
}

/// The frames owned by one core.
pub(crate) struct CoreFrames<A: Allocator> {
    pub(crate) critical: Option<FrameBox<CriticalFrame, A>>,
    pub(crate) non_critical: Option<FrameBox<NonCriticalFrame, A>>,
    /// Per-core device snapshots, indexed like [`Capabilities::devices`].
    pub(crate) devices: [Option<RegionSnapshot<A>>; MAX_DEVICES],
}

impl<A: Allocator> CoreFrames<A> {
    const fn new() -> Self {
        Self {
            critical: None,
            non_critical: None,
            devices: [const { None }; MAX_DEVICES],
        }
    }

    fn is_complete(&self, caps: &Capabilities) -> bool {
        self.critical.is_some()
            && self.non_critical.is_some()
            && caps
                .devices
                .iter()
                .zip(&self.devices)
                .all(|(device, frame)| !device.per_core || frame.is_some())
    }
}

/// Ownership root of every retention frame.
///
/// Each core only ever touches its own [`CoreFrames`]; the shared device
/// snapshots are touched by the core driving the sleep request. Both are
/// guaranteed by the rendezvous protocol rather than a lock.
pub(crate) struct FrameStore<A: Allocator> {
    cores: [UnsafeCell<CoreFrames<A>>; MAX_CORES],
    shared: UnsafeCell<[Option<RegionSnapshot<A>>; MAX_DEVICES]>,
}

impl<A: Allocator + Clone> FrameStore<A> {
    pub(crate) const fn new() -> Self {
        Self {
            cores: [const { UnsafeCell::new(CoreFrames::new()) }; MAX_CORES],
            shared: UnsafeCell::new([const { None }; MAX_DEVICES]),
        }
    }

    /// Allocates every frame missing for the first `cores` cores. Frames
    /// that already exist are kept.
    ///
    /// On failure everything allocated so far, by this or an earlier call,
    /// is released again.
    pub(crate) fn init(&mut self, caps: &Capabilities, cores: usize, alloc: &A) -> Result<(), AllocError> {
        let result = self.allocate_missing(caps, cores, alloc);
        if result.is_err() {
            self.deinit();
        }
        result
    }

    fn allocate_missing(&mut self, caps: &Capabilities, cores: usize, alloc: &A) -> Result<(), AllocError> {
        for frames in self.cores.iter_mut().take(cores) {
            let frames = frames.get_mut();

            if frames.critical.is_none() {
                frames.critical = Some(FrameBox::new_zeroed(alloc.clone())?);
            }
            if frames.non_critical.is_none() {
                frames.non_critical = Some(FrameBox::new_zeroed(alloc.clone())?);
            }
            for (device, frame) in caps.devices.iter().zip(frames.devices.iter_mut()) {
                if device.per_core && frame.is_none() {
                    *frame = Some(RegionSnapshot::allocate(device.ranges, alloc.clone())?);
                }
            }
        }

        for (device, frame) in caps.devices.iter().zip(self.shared.get_mut().iter_mut()) {
            if !device.per_core && frame.is_none() {
                *frame = Some(RegionSnapshot::allocate(device.ranges, alloc.clone())?);
            }
        }

        Ok(())
    }

    /// Frees every frame. Safe to call repeatedly.
    pub(crate) fn deinit(&mut self) {
        for frames in self.cores.iter_mut() {
            *frames.get_mut() = CoreFrames::new();
        }
        *self.shared.get_mut() = [const { None }; MAX_DEVICES];
    }

    /// Whether every frame needed by the first `cores` cores exists.
    pub(crate) fn is_complete(&mut self, caps: &Capabilities, cores: usize) -> bool {
        let shared_complete = caps
            .devices
            .iter()
            .zip(self.shared.get_mut().iter())
            .all(|(device, frame)| device.per_core || frame.is_some());

        shared_complete
            && self
                .cores
                .iter_mut()
                .take(cores)
                .all(|frames| frames.get_mut().is_complete(caps))
    }

    pub(crate) fn critical_frame(&mut self, core: Cpu) -> Option<NonNull<CriticalFrame>> {
        self.cores[core.index()]
            .get_mut()
            .critical
            .as_ref()
            .map(FrameBox::as_non_null)
    }

    /// The frames of `core`.
    ///
    /// # Safety
    ///
    /// Only `core` itself may hold the returned reference, and never across
    /// an `init`/`deinit`.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn core(&self, core: Cpu) -> &mut CoreFrames<A> {
        unsafe { &mut *self.cores[core.index()].get() }
    }

    /// The shared device snapshots.
    ///
    /// # Safety
    ///
    /// Only the core driving the sleep request may hold the returned
    /// reference, and never across an `init`/`deinit`.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn shared(&self) -> &mut [Option<RegionSnapshot<A>>; MAX_DEVICES] {
        unsafe { &mut *self.shared.get() }
    }
}
