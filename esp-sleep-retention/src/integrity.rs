//! CRC protection of retained frames.
//!
//! A frame is stamped right before the CPU domain may lose power and
//! checked right after it comes back. A mismatch means the context we are
//! about to resume cannot be trusted, so the only way out is a restart.

use core::mem::size_of;

use crc::{CRC_32_ISO_HDLC, Crc};

use crate::{
    FrameCorrupted,
    frame::{CriticalFrame, NonCriticalFrame},
    platform::Platform,
    soc::Capabilities,
};

/// The ROM `crc32_le` with a zero seed.
const CRC32_LE: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// A frame carrying its own CRC.
///
/// # Safety
///
/// The first [`Checked::CHECKED_LEN`] bytes of the type must be plain
/// initialized data without padding.
pub(crate) unsafe trait Checked {
    /// Number of bytes from the start of the frame covered by the CRC.
    const CHECKED_LEN: usize;

    fn stored_crc(&self) -> u32;

    fn set_stored_crc(&mut self, crc: u32);
}

// `pmufunc` and `frame_crc` are rewritten by the assembly routines.
unsafe impl Checked for CriticalFrame {
    const CHECKED_LEN: usize = size_of::<Self>() - 2 * size_of::<usize>();

    fn stored_crc(&self) -> u32 {
        self.frame_crc as u32
    }

    fn set_stored_crc(&mut self, crc: u32) {
        self.frame_crc = crc as usize;
    }
}

unsafe impl Checked for NonCriticalFrame {
    const CHECKED_LEN: usize = size_of::<Self>() - size_of::<usize>();

    fn stored_crc(&self) -> u32 {
        self.frame_crc as u32
    }

    fn set_stored_crc(&mut self, crc: u32) {
        self.frame_crc = crc as usize;
    }
}

fn compute<T: Checked>(frame: &T) -> u32 {
    let bytes = unsafe { core::slice::from_raw_parts((frame as *const T).cast::<u8>(), T::CHECKED_LEN) };
    CRC32_LE.checksum(bytes)
}

/// Stores the CRC of the frame's checked bytes in the frame.
pub(crate) fn stamp<T: Checked>(frame: &mut T) {
    let crc = compute(frame);
    frame.set_stored_crc(crc);
}

/// Recomputes the CRC and compares it with the stored one.
pub(crate) fn validate<T: Checked>(frame: &T) -> Result<(), FrameCorrupted> {
    if compute(frame) == frame.stored_crc() {
        Ok(())
    } else {
        Err(FrameCorrupted)
    }
}

/// Validates `frame` and restarts the system if it was corrupted.
pub(crate) fn validate_or_restart<T: Checked>(frame: &T, caps: &Capabilities, platform: &impl Platform) {
    if validate(frame).is_err() {
        frame_corrupted(caps, platform);
    }
}

/// Releases any console stuck in flow control and restarts.
#[cold]
pub(crate) fn frame_corrupted(caps: &Capabilities, platform: &impl Platform) -> ! {
    for uart in caps.uarts {
        if uart.is_enabled(platform) {
            uart.force_xon(platform);
        }
    }
    error!("Sleep retention frame is corrupted");
    platform.restart()
}
