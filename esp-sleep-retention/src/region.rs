//! Save and restore of memory-mapped register windows.

use core::{ptr::NonNull, slice};

use allocator_api2::alloc::{AllocError, Allocator, Global, Layout};

use crate::{
    platform::RegisterAccess,
    soc::{RegRange, total_words},
};

/// A copy of a set of register windows.
///
/// The range table and the saved words live in a single allocation, so a
/// snapshot either exists completely or not at all. Slot `i` of the data
/// always belongs to the same register, both windows and registers being
/// walked in ascending declared order.
pub struct RegionSnapshot<A: Allocator = Global> {
    ptr: NonNull<u8>,
    layout: Layout,
    ranges: usize,
    words: usize,
    data_offset: usize,
    alloc: A,
}

impl<A: Allocator> RegionSnapshot<A> {
    /// Allocates a zeroed snapshot of `ranges`.
    pub fn allocate(ranges: &[RegRange], alloc: A) -> Result<Self, AllocError> {
        let words = total_words(ranges);
        let (layout, data_offset) = Layout::array::<RegRange>(ranges.len())
            .and_then(|table| table.extend(Layout::array::<u32>(words)?))
            .map_err(|_| AllocError)?;

        let ptr = alloc.allocate_zeroed(layout)?.cast::<u8>();

        // SAFETY: the allocation starts with room for exactly `ranges.len()`
        // properly aligned descriptors.
        unsafe {
            core::ptr::copy_nonoverlapping(ranges.as_ptr(), ptr.cast::<RegRange>().as_ptr(), ranges.len());
        }

        Ok(Self {
            ptr,
            layout,
            ranges: ranges.len(),
            words,
            data_offset,
            alloc,
        })
    }

    /// The register windows covered.
    pub fn ranges(&self) -> &[RegRange] {
        unsafe { slice::from_raw_parts(self.ptr.cast::<RegRange>().as_ptr(), self.ranges) }
    }

    /// The saved register values.
    pub fn words(&self) -> &[u32] {
        unsafe { slice::from_raw_parts(self.data_ptr(), self.words) }
    }

    fn data_ptr(&self) -> *mut u32 {
        unsafe { self.ptr.as_ptr().add(self.data_offset).cast::<u32>() }
    }

    /// Reads every register into the snapshot.
    ///
    /// Does not allocate and may run with interrupts disabled.
    pub fn save(&mut self, regs: &impl RegisterAccess) {
        // The table and data parts of the allocation don't overlap.
        let data = unsafe { slice::from_raw_parts_mut(self.data_ptr(), self.words) };
        let addresses = self.ranges().iter().flat_map(RegRange::addresses);
        for (slot, addr) in data.iter_mut().zip(addresses) {
            *slot = regs.read(addr);
        }
    }

    /// Writes the snapshot back to the registers it was taken from.
    pub fn restore(&self, regs: &impl RegisterAccess) {
        let addresses = self.ranges().iter().flat_map(RegRange::addresses);
        for (value, addr) in self.words().iter().zip(addresses) {
            regs.write(addr, *value);
        }
    }
}

impl<A: Allocator> Drop for RegionSnapshot<A> {
    fn drop(&mut self) {
        unsafe { self.alloc.deallocate(self.ptr, self.layout) }
    }
}

impl<A: Allocator> core::fmt::Debug for RegionSnapshot<A> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RegionSnapshot")
            .field("ranges", &self.ranges())
            .field("words", &self.words)
            .finish()
    }
}
