//! # CPU sleep retention for Espressif RISC-V devices
//!
//! ## Overview
//!
//! When a device enters light sleep with the CPU power domain switched
//! off, everything inside that domain is lost: the core registers, the
//! interrupt controller, the machine timer compare registers and parts of
//! the cache configuration. This crate saves all of it before the PMU cuts
//! the power and puts it back after wake-up.
//!
//! - a critical frame is filled by the architecture level save routine and
//!   restored by the ROM wake stub before any other code runs,
//! - a non-critical frame and per-device register snapshots are restored by
//!   [`CpuRetention`] once execution is back in Rust,
//! - on dual-core devices both cores coordinate through an [`SmpState`]
//!   rendezvous, the second core being pulled in with an inter-processor
//!   call.
//!
//! Frames can be CRC protected (see [`Config::with_check_frames`]). A frame
//! failing its check after wake-up makes the device restart, as the context
//! about to be resumed can't be trusted.
//!
//! The device specifics live in a [`soc::Capabilities`] descriptor; the one
//! for the device selected through the chip feature is returned by
//! [`soc::Chip::current`].
//!
//! ## Feature Flags
#![doc = document_features::document_features!(feature_label = r#"<span class="stab portability"><code>{feature}</code></span>"#)]
#![doc(html_logo_url = "https://avatars.githubusercontent.com/u/46717278")]
#![deny(missing_docs, rust_2018_idioms)]
#![cfg_attr(not(test), no_std)]

// MUST be the first module
mod fmt;

pub mod csr;
mod events;
mod frame;
mod integrity;
pub mod ipc;
pub mod platform;
mod region;
mod retention;
mod smp;
pub mod soc;

#[cfg(test)]
mod testing;

pub use self::{
    events::{SleepEvent, SleepEventHandler, SleepEvents},
    frame::{CriticalFrame, NonCriticalFrame, PmuFunc},
    region::RegionSnapshot,
    retention::{CpuRetention, SleepRequest},
    smp::SmpState,
};

/// Retention setup errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub enum Error {
    /// A retention frame could not be allocated. No frame was kept.
    OutOfMemory,
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::OutOfMemory => write!(f, "Not enough memory for the sleep retention frames"),
        }
    }
}

impl core::error::Error for Error {}

/// An error code returned by the PMU when entering or finishing a sleep.
///
/// The code is passed through unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SleepError {
    code: u32,
}

impl SleepError {
    /// Wraps a PMU error code.
    pub const fn new(code: u32) -> Self {
        Self { code }
    }

    /// The PMU error code.
    pub const fn code(&self) -> u32 {
        self.code
    }
}

impl core::fmt::Display for SleepError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Sleep request failed with code {:#x}", self.code)
    }
}

impl core::error::Error for SleepError {}

/// A retention frame failed its integrity check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) struct FrameCorrupted;

/// Sleep event registration errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub enum EventError {
    /// The callback table is full.
    Full,
    /// The handler is already registered for this event.
    AlreadyRegistered,
    /// The handler is not registered for this event.
    NotRegistered,
}

impl core::fmt::Display for EventError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            EventError::Full => write!(f, "The sleep event callback table is full"),
            EventError::AlreadyRegistered => write!(f, "The callback is already registered"),
            EventError::NotRegistered => write!(f, "The callback is not registered"),
        }
    }
}

impl core::error::Error for EventError {}

/// The failure of a sleep event callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CallbackError {
    code: i32,
}

impl CallbackError {
    /// Creates an error carrying a callback specific code.
    pub const fn new(code: i32) -> Self {
        Self { code }
    }

    /// The callback specific code.
    pub const fn code(&self) -> i32 {
        self.code
    }
}

impl core::fmt::Display for CallbackError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Sleep event callback failed with code {}", self.code)
    }
}

impl core::error::Error for CallbackError {}

/// Retention configuration.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub struct Config {
    check_frames: bool,
    single_core: bool,
}

impl Config {
    /// CRC protect the non-critical and critical frames, restarting the
    /// device if either is found corrupted after wake-up.
    ///
    /// Disabled by default.
    pub const fn with_check_frames(mut self, check_frames: bool) -> Self {
        self.check_frames = check_frames;
        self
    }

    /// Only retain the first core, for applications that never start the
    /// second one.
    ///
    /// Disabled by default. Has no effect on single-core devices.
    pub const fn with_single_core(mut self, single_core: bool) -> Self {
        self.single_core = single_core;
        self
    }

    /// Whether frames are CRC protected.
    pub const fn check_frames(&self) -> bool {
        self.check_frames
    }

    /// Whether only the first core is retained.
    pub const fn single_core(&self) -> bool {
        self.single_core
    }
}
