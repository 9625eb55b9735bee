//! # Sleep event callbacks
//!
//! ## Overview
//! Other drivers can hook into well-defined points of a sleep cycle. The
//! retention engine itself raises [`SleepEvent::SwCpuToMemStart`] before it
//! starts saving state and [`SleepEvent::SwCpuToMemEnd`] right before the
//! PMU is asked to power the CPU domain down; the remaining events are
//! raised by the power management code driving the sleep.
//!
//! Callbacks run with interrupts disabled. A callback's failure is logged
//! and does not stop the sleep.

use core::cell::RefCell;

use critical_section::Mutex;

use crate::{CallbackError, EventError};

/// Points of a sleep cycle callbacks can be registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub enum SleepEvent {
    /// Software is about to start the sleep sequence.
    SwGotoSleep,
    /// The CPU context is about to be copied to memory.
    SwCpuToMemStart,
    /// The CPU context has been copied; the CPU domain may now lose power.
    SwCpuToMemEnd,
    /// Clocks have been switched back after wake-up.
    SwClkReady,
    /// Software has left the sleep sequence.
    SwExitSleep,
    /// Hardware has left sleep.
    HwExitSleep,
}

/// A sleep event callback.
///
/// Receives the `user_arg` given at registration and an event specific
/// argument.
pub type SleepEventHandler = fn(user_arg: usize, ext_arg: usize) -> Result<(), CallbackError>;

#[derive(Clone, Copy)]
struct Registration {
    event: SleepEvent,
    handler: SleepEventHandler,
    user_arg: usize,
    priority: u32,
}

/// Registry of sleep event callbacks holding up to `N` registrations.
pub struct SleepEvents<const N: usize = 16> {
    registrations: Mutex<RefCell<heapless::Vec<Registration, N>>>,
}

impl<const N: usize> Default for SleepEvents<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> SleepEvents<N> {
    /// Creates an empty registry.
    pub const fn new() -> Self {
        Self {
            registrations: Mutex::new(RefCell::new(heapless::Vec::new())),
        }
    }

    /// Registers `handler` for `event`.
    ///
    /// Callbacks of an event run in ascending `priority`, callbacks of equal
    /// priority in registration order.
    pub fn register(
        &self,
        event: SleepEvent,
        handler: SleepEventHandler,
        user_arg: usize,
        priority: u32,
    ) -> Result<(), EventError> {
        critical_section::with(|cs| {
            let mut registrations = self.registrations.borrow_ref_mut(cs);

            if registrations
                .iter()
                .any(|r| r.event == event && core::ptr::fn_addr_eq(r.handler, handler))
            {
                return Err(EventError::AlreadyRegistered);
            }

            let position = registrations
                .iter()
                .position(|r| r.priority > priority)
                .unwrap_or(registrations.len());

            registrations
                .insert(
                    position,
                    Registration {
                        event,
                        handler,
                        user_arg,
                        priority,
                    },
                )
                .map_err(|_| EventError::Full)
        })
    }

    /// Removes the registration of `handler` for `event`.
    pub fn unregister(&self, event: SleepEvent, handler: SleepEventHandler) -> Result<(), EventError> {
        critical_section::with(|cs| {
            let mut registrations = self.registrations.borrow_ref_mut(cs);
            let position = registrations
                .iter()
                .position(|r| r.event == event && core::ptr::fn_addr_eq(r.handler, handler))
                .ok_or(EventError::NotRegistered)?;
            registrations.remove(position);
            Ok(())
        })
    }

    /// Runs every callback registered for `event`.
    ///
    /// The registrations are copied out first, so callbacks may register and
    /// unregister themselves.
    pub fn execute(&self, event: SleepEvent, ext_arg: usize) {
        let registrations = critical_section::with(|cs| self.registrations.borrow_ref(cs).clone());

        for registration in registrations.iter().filter(|r| r.event == event) {
            if let Err(error) = (registration.handler)(registration.user_arg, ext_arg) {
                warn!("Sleep event {:?} callback failed: {}", event, error);
            }
        }
    }
}
