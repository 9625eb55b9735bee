//! # CPU retention
//!
//! ## Overview
//! [`CpuRetention`] owns every frame needed to resume the CPU after its
//! power domain was switched off during light sleep, and runs the
//! save/sleep/restore sequence around the PMU's sleep entry.
//!
//! The sequence on the driving core is:
//!
//! 1. raise [`SleepEvent::SwCpuToMemStart`] and disable interrupts,
//! 2. snapshot the devices and save the non-critical frame,
//! 3. save the critical frame. If the save returns with a fresh context
//!    the restore routine is published to the wake stub and `goto_sleep`
//!    is called; if control comes back through the restore routine the PMU
//!    is told the sleep is finished,
//! 4. restore the non-critical frame, then the devices in reverse order,
//!    and re-enable interrupts.
//!
//! ## Examples
//!
//! ```rust, ignore
//! static RETENTION: StaticCell<CpuRetention<Esp>> = StaticCell::new();
//!
//! let retention = RETENTION.init(CpuRetention::new(
//!     Chip::current().capabilities(),
//!     Esp::new(),
//!     Config::default().with_check_frames(true),
//! ));
//! retention.init()?;
//!
//! let retention: &'static CpuRetention<Esp> = retention;
//! retention.smp_sleep_prepare();
//! let result = retention.sleep_cpu_retention(pmu_sleep_start, request);
//! retention.smp_wakeup_prepare();
//! ```

use core::sync::atomic::{AtomicBool, Ordering};

use allocator_api2::alloc::{Allocator, Global};

use crate::{
    Config,
    Error,
    SleepError,
    events::{SleepEvent, SleepEvents},
    frame::{CoreFrames, CriticalFrame, FrameStore, PmuFunc},
    integrity,
    ipc::IpcMailbox,
    platform::Platform,
    region::RegionSnapshot,
    smp::{Rendezvous, SmpState},
    soc::{Capabilities, Cpu, MAX_DEVICES},
};

/// Options passed through to the PMU's sleep entry.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SleepRequest {
    /// Wake-up source options.
    pub wakeup_opt: u32,
    /// Sleep reject source options.
    pub reject_opt: u32,
    /// Memory, interface and FPU power options for light sleep.
    pub lslp_mem_inf_fpu: u32,
    /// Whether this is a deep sleep.
    pub deep_sleep: bool,
}

type SharedSnapshots<A> = [Option<RegionSnapshot<A>>; MAX_DEVICES];

/// CPU retention manager.
pub struct CpuRetention<P: Platform, A: Allocator + Clone = Global> {
    pub(crate) caps: &'static Capabilities,
    pub(crate) platform: P,
    alloc: A,
    pub(crate) config: Config,
    pub(crate) frames: FrameStore<A>,
    complete: AtomicBool,
    pub(crate) smp: Rendezvous,
    pub(crate) ipc: IpcMailbox,
    events: SleepEvents,
}

// The frame store is only touched through the rendezvous protocol: each
// core accesses its own frames and the driving core the shared snapshots.
unsafe impl<P, A> Sync for CpuRetention<P, A>
where
    P: Platform + Sync,
    A: Allocator + Clone + Sync,
{
}

unsafe impl<P, A> Send for CpuRetention<P, A>
where
    P: Platform + Send,
    A: Allocator + Clone + Send,
{
}

impl<P: Platform> CpuRetention<P> {
    /// Creates a retention manager allocating from the global allocator.
    pub fn new(caps: &'static Capabilities, platform: P, config: Config) -> Self {
        Self::new_in(caps, platform, Global, config)
    }
}

impl<P, A> CpuRetention<P, A>
where
    P: Platform,
    A: Allocator + Clone,
{
    /// Creates a retention manager allocating its frames from `alloc`.
    ///
    /// Frames must live in internal RAM, so on targets with PSRAM pass an
    /// allocator restricted to internal memory.
    pub fn new_in(caps: &'static Capabilities, platform: P, alloc: A, config: Config) -> Self {
        assert!(caps.is_valid(), "invalid capabilities for {:?}", caps.chip);

        Self {
            caps,
            platform,
            alloc,
            config,
            frames: FrameStore::new(),
            complete: AtomicBool::new(false),
            smp: Rendezvous::new(),
            ipc: IpcMailbox::new(caps.ipc_intr_regs),
            events: SleepEvents::new(),
        }
    }

    /// The capabilities of the device.
    pub fn capabilities(&self) -> &'static Capabilities {
        self.caps
    }

    /// The platform.
    pub fn platform(&self) -> &P {
        &self.platform
    }

    /// The configuration.
    pub fn config(&self) -> Config {
        self.config
    }

    /// Callbacks raised during the sleep sequence.
    pub fn events(&self) -> &SleepEvents {
        &self.events
    }

    pub(crate) fn smp_enabled(&self) -> bool {
        self.caps.is_multi_core() && !self.config.single_core()
    }

    fn retained_cores(&self) -> usize {
        if self.smp_enabled() { self.caps.cores } else { 1 }
    }

    /// Allocates every retention frame that doesn't exist yet.
    ///
    /// If any allocation fails all frames are released again and
    /// [`Error::OutOfMemory`] is returned.
    pub fn init(&mut self) -> Result<(), Error> {
        let cores = self.retained_cores();

        if self.frames.init(self.caps, cores, &self.alloc).is_err() {
            for core in Cpu::ALL.into_iter().take(cores) {
                self.platform.bind_critical_frame(core, None);
            }
            self.complete.store(false, Ordering::Release);
            warn!("Failed to allocate sleep retention frames");
            return Err(Error::OutOfMemory);
        }

        for core in Cpu::ALL.into_iter().take(cores) {
            let frame = self.frames.critical_frame(core);
            self.platform.bind_critical_frame(core, frame);
        }
        self.smp.reset();

        let complete = self.frames.is_complete(self.caps, cores);
        self.complete.store(complete, Ordering::Release);
        debug!("Sleep retention frames allocated for {} core(s)", cores);

        Ok(())
    }

    /// Releases every retention frame. Does nothing if none exist.
    pub fn deinit(&mut self) {
        for core in Cpu::ALL.into_iter().take(self.retained_cores()) {
            self.platform.bind_critical_frame(core, None);
        }
        self.complete.store(false, Ordering::Release);
        self.frames.deinit();
        debug!("Sleep retention frames released");
    }

    /// Allocates or releases the retention frames.
    pub fn configure(&mut self, enable: bool) -> Result<(), Error> {
        if enable {
            self.init()
        } else {
            self.deinit();
            Ok(())
        }
    }

    /// Whether the CPU power domain may be powered down, which is the case
    /// once every retention frame exists.
    pub fn cpu_domain_pd_allowed(&self) -> bool {
        self.complete.load(Ordering::Acquire)
    }

    /// Saves the CPU context, calls `goto_sleep` and restores the context.
    ///
    /// Returns the result of `goto_sleep`, or of the PMU's sleep finish if
    /// execution came back through the restore routine. A frame failing its
    /// integrity check restarts the system.
    ///
    /// On dual-core devices the other core must have been brought in with
    /// [`CpuRetention::smp_sleep_prepare`] first.
    ///
    /// # Panics
    ///
    /// Panics if the retention frames have not been allocated.
    pub fn sleep_cpu_retention<F>(&self, goto_sleep: F, request: SleepRequest) -> Result<(), SleepError>
    where
        F: FnOnce(&SleepRequest) -> Result<(), SleepError>,
    {
        let core = self.platform.current_core();

        self.events.execute(SleepEvent::SwCpuToMemStart, 0);
        let mstatus = self.platform.disable_interrupts();

        if self.smp_enabled() {
            self.smp.set(core, SmpState::BackupStart);
        }

        // SAFETY: this core drives the sleep request and so owns its frames
        // and the shared snapshots until it returns.
        let frames = unsafe { self.frames.core(core) };
        let shared = unsafe { self.frames.shared() };

        self.save_devices(frames, Some(&mut *shared));
        self.save_non_critical(frames);

        let critical = unwrap!(frames.critical.as_ref()).as_non_null();
        let result = unsafe { self.do_cpu_retention(core, critical, goto_sleep, &request) };

        self.restore_core(core, frames, Some(&*shared), mstatus);

        result
    }

    /// # Safety
    ///
    /// `critical` must be the critical frame of `core`.
    unsafe fn do_cpu_retention<F>(
        &self,
        core: Cpu,
        critical: core::ptr::NonNull<CriticalFrame>,
        goto_sleep: F,
        request: &SleepRequest,
    ) -> Result<(), SleepError>
    where
        F: FnOnce(&SleepRequest) -> Result<(), SleepError>,
    {
        unsafe { self.platform.save_critical_regs(critical) };
        let frame = unsafe { &mut *critical.as_ptr() };

        match frame.pmu_func() {
            PmuFunc::Saved => {
                if self.smp_enabled() {
                    self.smp.set(core, SmpState::BackupDone);
                    self.smp.wait_for(core.other(), SmpState::BackupDone);
                }

                self.events.execute(SleepEvent::SwCpuToMemEnd, 0);

                if self.config.check_frames() {
                    integrity::stamp(frame);
                }

                self.platform.write(
                    self.caps.wake_stub_reg,
                    self.platform.critical_restore_entry() as u32,
                );

                goto_sleep(request)
            }
            PmuFunc::Resumed => {
                if self.config.check_frames() {
                    integrity::validate_or_restart(frame, self.caps, &self.platform);
                }

                self.platform.sleep_finish(request.deep_sleep)
            }
        }
    }

    /// Snapshots the devices of a core in table order. The shared ones are
    /// only saved by the driving core, which passes `shared`.
    pub(crate) fn save_devices(&self, frames: &mut CoreFrames<A>, mut shared: Option<&mut SharedSnapshots<A>>) {
        for (index, device) in self.caps.devices.iter().enumerate() {
            if device.per_core {
                unwrap!(frames.devices[index].as_mut()).save(&self.platform);
            } else if let Some(shared) = shared.as_deref_mut() {
                unwrap!(shared[index].as_mut()).save(&self.platform);
            }
        }
    }

    /// Restores the devices in reverse table order.
    pub(crate) fn restore_devices(&self, frames: &CoreFrames<A>, shared: Option<&SharedSnapshots<A>>) {
        for (index, device) in self.caps.devices.iter().enumerate().rev() {
            if device.per_core {
                unwrap!(frames.devices[index].as_ref()).restore(&self.platform);
            } else if let Some(shared) = shared {
                unwrap!(shared[index].as_ref()).restore(&self.platform);
            }
        }
    }

    pub(crate) fn save_non_critical(&self, frames: &mut CoreFrames<A>) {
        let frame = unwrap!(frames.non_critical.as_mut());
        frame.save(self.caps, &self.platform);
        if self.config.check_frames() {
            integrity::stamp(&mut **frame);
        }
    }

    /// Everything after the critical frame came back, on either core.
    pub(crate) fn restore_core(
        &self,
        core: Cpu,
        frames: &CoreFrames<A>,
        shared: Option<&SharedSnapshots<A>>,
        mstatus: usize,
    ) {
        let frame = unwrap!(frames.non_critical.as_ref());
        if self.config.check_frames() {
            integrity::validate_or_restart(&**frame, self.caps, &self.platform);
        }

        if self.smp_enabled() {
            if core == Cpu::ProCpu {
                if let Some(gate) = &self.caps.core1_gate {
                    gate.open(&self.platform);
                }
            }
            self.smp.set(core, SmpState::RestoreStart);

            // The driving core wakes the other one if it is still parked
            // after its backup.
            if shared.is_some() {
                self.ipc.notify(&self.platform, core);
            }
        }

        frame.restore(self.caps, &self.platform);
        self.restore_devices(frames, shared);
        self.platform.restore_interrupts(mstatus);

        if self.smp_enabled() {
            self.smp.set(core, SmpState::RestoreDone);
        }
    }
}

impl<P, A> Drop for CpuRetention<P, A>
where
    P: Platform,
    A: Allocator + Clone,
{
    fn drop(&mut self) {
        if self.cpu_domain_pd_allowed() {
            self.deinit();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        panic::{AssertUnwindSafe, catch_unwind},
        sync::atomic::AtomicUsize,
    };

    use super::*;
    use crate::{
        CallbackError,
        csr::{MSTATUS, MSTATUS_MIE},
        platform::{CoreAccess, RegisterAccess},
        testing::{FakePlatform, RESTORE_ENTRY, TEST_UART, TestAlloc, WAKE_STUB_REG, test_capabilities},
    };

    const MSTATUS_BEFORE: usize = 0x1888;

    fn retention(cores: usize, alloc: &TestAlloc, config: Config) -> CpuRetention<FakePlatform, TestAlloc> {
        CpuRetention::new_in(test_capabilities(cores), FakePlatform::new(), alloc.clone(), config)
    }

    fn prepare(retention: &CpuRetention<FakePlatform, TestAlloc>) {
        let caps = retention.capabilities();
        let platform = retention.platform();
        platform.seed_devices(caps);
        platform.core.seed_csrs(Cpu::ProCpu, caps);
        platform.write_csr(MSTATUS, MSTATUS_BEFORE);
    }

    fn device_values(retention: &CpuRetention<FakePlatform, TestAlloc>) -> Vec<Vec<u32>> {
        let platform = retention.platform();
        retention
            .capabilities()
            .devices
            .iter()
            .map(|device| platform.regs.values(device.ranges))
            .collect()
    }

    #[test]
    fn failed_init_keeps_no_frames() {
        let alloc = TestAlloc::new();
        alloc.fail_allocation(3);
        let mut retention = retention(1, &alloc, Config::default());

        assert_eq!(retention.init(), Err(Error::OutOfMemory));
        assert_eq!(alloc.live(), 0);
        assert!(!retention.cpu_domain_pd_allowed());
        assert!(retention.platform().core.bound_frame(Cpu::ProCpu).is_null());
    }

    #[test]
    fn power_down_is_allowed_while_frames_exist() {
        let alloc = TestAlloc::new();
        let mut retention = retention(1, &alloc, Config::default());
        assert!(!retention.cpu_domain_pd_allowed());

        retention.configure(true).unwrap();
        assert!(retention.cpu_domain_pd_allowed());
        assert!(!retention.platform().core.bound_frame(Cpu::ProCpu).is_null());

        let allocated = alloc.allocations();
        retention.init().unwrap();
        assert_eq!(alloc.allocations(), allocated);

        retention.configure(false).unwrap();
        assert!(!retention.cpu_domain_pd_allowed());
        assert!(retention.platform().core.bound_frame(Cpu::ProCpu).is_null());
        assert_eq!(alloc.live(), 0);

        retention.deinit();
        assert_eq!(alloc.live(), 0);
    }

    #[test]
    fn dropping_releases_the_frames() {
        let alloc = TestAlloc::new();
        let mut retention = retention(2, &alloc, Config::default());
        retention.init().unwrap();
        assert_ne!(alloc.live(), 0);

        drop(retention);
        assert_eq!(alloc.live(), 0);
    }

    #[test]
    fn each_core_gets_its_own_critical_frame() {
        let alloc = TestAlloc::new();
        let mut retention = retention(2, &alloc, Config::default());
        retention.init().unwrap();

        let platform = retention.platform();
        let pro = platform.core.bound_frame(Cpu::ProCpu);
        let app = platform.core.bound_frame(Cpu::AppCpu);
        assert!(!pro.is_null());
        assert!(!app.is_null());
        assert_ne!(pro, app);

        retention.deinit();
        let platform = retention.platform();
        assert!(platform.core.bound_frame(Cpu::ProCpu).is_null());
        assert!(platform.core.bound_frame(Cpu::AppCpu).is_null());
    }

    static STARTS: AtomicUsize = AtomicUsize::new(0);
    static ENDS: AtomicUsize = AtomicUsize::new(0);

    fn on_start(user_arg: usize, _ext_arg: usize) -> Result<(), CallbackError> {
        STARTS.fetch_add(user_arg, Ordering::SeqCst);
        Ok(())
    }

    fn on_end(user_arg: usize, _ext_arg: usize) -> Result<(), CallbackError> {
        ENDS.fetch_add(user_arg, Ordering::SeqCst);
        Err(CallbackError::new(-1))
    }

    #[test]
    fn fresh_save_goes_to_sleep() {
        let alloc = TestAlloc::new();
        let mut retention = retention(1, &alloc, Config::default().with_check_frames(true));
        retention.init().unwrap();
        prepare(&retention);

        let events = retention.events();
        events.register(SleepEvent::SwCpuToMemStart, on_start, 1, 0).unwrap();
        events.register(SleepEvent::SwCpuToMemEnd, on_end, 1, 0).unwrap();

        let platform = retention.platform();
        let devices = device_values(&retention);
        let request = SleepRequest {
            wakeup_opt: 0x4,
            ..Default::default()
        };

        let mut seen = None;
        let result = retention.sleep_cpu_retention(
            |request| {
                assert_eq!(platform.read_csr(MSTATUS) & MSTATUS_MIE, 0);
                assert_eq!(STARTS.load(Ordering::SeqCst), 1);
                seen = Some(*request);
                Err(SleepError::new(0x42))
            },
            request,
        );

        assert_eq!(result, Err(SleepError::new(0x42)));
        assert_eq!(seen, Some(request));
        assert_eq!(ENDS.load(Ordering::SeqCst), 1);
        assert_eq!(platform.core.critical_saves(Cpu::ProCpu), 1);
        assert_eq!(platform.sleep_finish_calls(), 0);
        assert_eq!(platform.regs.peek(WAKE_STUB_REG), RESTORE_ENTRY as u32);
        assert_eq!(platform.read_csr(MSTATUS), MSTATUS_BEFORE);
        assert_eq!(device_values(&retention), devices);
        assert_eq!(platform.restarts(), 0);
    }

    #[test]
    fn resumed_context_is_restored() {
        let alloc = TestAlloc::new();
        let mut retention = retention(1, &alloc, Config::default().with_check_frames(true));
        retention.init().unwrap();
        prepare(&retention);
        let platform = retention.platform();

        // Saves and stamps the critical frame the restore routine returns with.
        assert_eq!(retention.sleep_cpu_retention(|_| Ok(()), SleepRequest::default()), Ok(()));

        let devices = device_values(&retention);
        let csrs = platform.core.csr_snapshot(Cpu::ProCpu);
        platform.core.set_pmufunc(Cpu::ProCpu, 0b11);
        platform.set_sleep_finish_result(Err(SleepError::new(0x103)));
        platform.regs.take_writes();

        let result = retention.sleep_cpu_retention(|_| panic!("no second sleep"), SleepRequest::default());

        assert_eq!(result, Err(SleepError::new(0x103)));
        assert_eq!(platform.sleep_finish_calls(), 1);
        assert_eq!(platform.restarts(), 0);
        assert_eq!(device_values(&retention), devices);
        assert_eq!(platform.core.csr_snapshot(Cpu::ProCpu), csrs);
        assert_eq!(platform.read_csr(MSTATUS), MSTATUS_BEFORE);

        // Devices come back in reverse order.
        let writes = platform.regs.take_writes();
        let first = |addr| writes.iter().position(|a| *a == addr).unwrap();
        assert!(first(0x7000) < first(0x5000));
        assert!(first(0x5000) < first(0x1000));
    }

    #[test]
    fn corrupted_frame_restarts() {
        let alloc = TestAlloc::new();
        let mut retention = retention(1, &alloc, Config::default().with_check_frames(true));
        retention.init().unwrap();
        prepare(&retention);
        let platform = retention.platform();
        platform.enable_uart(&TEST_UART);

        let frame = unsafe { retention.frames.core(Cpu::ProCpu) }
            .non_critical
            .as_ref()
            .unwrap()
            .as_non_null();

        let result = catch_unwind(AssertUnwindSafe(|| {
            retention.sleep_cpu_retention(
                |_| {
                    unsafe { (*frame.as_ptr()).csrs[1] ^= 1 << 4 };
                    Ok(())
                },
                SleepRequest::default(),
            )
        }));

        assert!(result.is_err());
        assert_eq!(platform.restarts(), 1);
        assert_eq!(platform.read_csr(MSTATUS) & MSTATUS_MIE, 0);
        assert_ne!(platform.regs.peek(TEST_UART.base + 0x18) & (1 << 19), 0);
    }

    #[test]
    fn unchecked_frames_are_not_validated() {
        let alloc = TestAlloc::new();
        let mut retention = retention(1, &alloc, Config::default());
        retention.init().unwrap();
        prepare(&retention);
        let platform = retention.platform();

        let frame = unsafe { retention.frames.core(Cpu::ProCpu) }
            .non_critical
            .as_ref()
            .unwrap()
            .as_non_null();

        let result = retention.sleep_cpu_retention(
            |_| {
                unsafe { (*frame.as_ptr()).csrs[1] ^= 1 << 4 };
                Ok(())
            },
            SleepRequest::default(),
        );

        assert_eq!(result, Ok(()));
        assert_eq!(platform.restarts(), 0);
        assert_eq!(unsafe { frame.as_ref() }.frame_crc, 0);
    }

    #[test]
    fn single_core_config_only_retains_the_first_core() {
        let alloc = TestAlloc::new();
        let mut retention = retention(2, &alloc, Config::default().with_single_core(true));
        retention.init().unwrap();

        // Critical, non-critical, two per-core snapshots and the shared one.
        assert_eq!(alloc.allocations(), 5);
        assert!(retention.cpu_domain_pd_allowed());
        assert!(retention.platform().core.bound_frame(Cpu::AppCpu).is_null());

        prepare(&retention);
        assert_eq!(retention.sleep_cpu_retention(|_| Ok(()), SleepRequest::default()), Ok(()));
        assert_eq!(retention.smp_state(Cpu::ProCpu), SmpState::Idle);
        assert_eq!(retention.smp_state(Cpu::AppCpu), SmpState::Idle);
    }
}
