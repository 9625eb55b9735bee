//! Host simulation of the platform, shared by the unit tests.

use std::{
    cell::Cell,
    collections::{BTreeMap, BTreeSet},
    panic::{AssertUnwindSafe, catch_unwind, resume_unwind},
    ptr::NonNull,
    sync::{
        Arc,
        Mutex,
        atomic::{AtomicPtr, AtomicUsize, Ordering},
        mpsc,
    },
    thread,
    time::{Duration, Instant},
};

use allocator_api2::alloc::{AllocError, Allocator, Global, Layout};

use crate::{
    SleepError,
    csr::*,
    frame::{CriticalFrame, PmuFunc},
    platform::{CoreAccess, PowerControl, RegisterAccess},
    soc::{
        Capabilities,
        Chip,
        Core1Gate,
        Cpu,
        DeviceDomain,
        DeviceRegions,
        MAX_CORES,
        RegRange,
        UartRegs,
    },
};

thread_local! {
    static CURRENT_CORE: Cell<Cpu> = const { Cell::new(Cpu::ProCpu) };
}

/// Makes the calling thread act as `core`.
pub(crate) fn set_current_core(core: Cpu) {
    CURRENT_CORE.with(|current| current.set(core));
}

/// How long a simulated core may take before a test gives up on it.
pub(crate) const TIMEOUT: Duration = Duration::from_secs(10);

/// A simulated core running on its own thread.
pub(crate) struct CoreThread {
    core: Cpu,
    thread: thread::JoinHandle<()>,
    finished: mpsc::Receiver<thread::Result<()>>,
}

/// Runs `f` on a new thread acting as `core`.
pub(crate) fn spawn_core(core: Cpu, f: impl FnOnce() + Send + 'static) -> CoreThread {
    let (tx, finished) = mpsc::channel();
    let thread = thread::spawn(move || {
        set_current_core(core);
        let _ = tx.send(catch_unwind(AssertUnwindSafe(f)));
    });
    CoreThread {
        core,
        thread,
        finished,
    }
}

impl CoreThread {
    pub(crate) fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Waits for the core to finish, forwarding its panic. A core still
    /// running after [`TIMEOUT`] fails the test instead of hanging it.
    pub(crate) fn join(self) {
        match self.finished.recv_timeout(TIMEOUT) {
            Ok(Ok(())) => {}
            Ok(Err(panic)) => resume_unwind(panic),
            Err(_) => panic!("{:?} did not finish within {:?}", self.core, TIMEOUT),
        }
    }
}

/// Polls `condition` until it holds, failing the test after [`TIMEOUT`].
#[track_caller]
pub(crate) fn eventually(what: &str, condition: impl Fn() -> bool) {
    let start = Instant::now();
    while !condition() {
        assert!(start.elapsed() < TIMEOUT, "timed out waiting for {}", what);
        thread::yield_now();
    }
}

pub(crate) const INTERRUPT_CONTROLLER: &[RegRange] = &[
    RegRange::new(0x1000, 0x1010),
    RegRange::new(0x2000, 0x2010),
    RegRange::new(0x3000, 0x3008),
];
pub(crate) const TIMER: &[RegRange] = &[RegRange::new(0x5000, 0x5008)];
pub(crate) const CACHE_CONFIG: &[RegRange] = &[RegRange::single(0x7000)];

pub(crate) const WAKE_STUB_REG: usize = 0x9000;
pub(crate) const RESTORE_ENTRY: usize = 0x4fc0_1000;

pub(crate) const CORE1_GATE: Core1Gate = Core1Gate {
    clock_reg: 0xa000,
    clock_mask: 1 << 1,
    reset_reg: 0xa004,
    reset_mask: 1 << 2,
};

pub(crate) const IPC_INTR_REGS: &[usize] = &[0xb000, 0xb004];

pub(crate) const TEST_UART: UartRegs = UartRegs {
    base: 0xc000,
    clk_en_reg: 0xd000,
    clk_en_mask: 1 << 0,
    rst_reg: 0xd000,
    rst_mask: 1 << 1,
};

const DEVICES: &[DeviceRegions] = &[
    DeviceRegions {
        domain: DeviceDomain::Clic,
        per_core: true,
        ranges: INTERRUPT_CONTROLLER,
    },
    DeviceRegions {
        domain: DeviceDomain::Clint,
        per_core: true,
        ranges: TIMER,
    },
    DeviceRegions {
        domain: DeviceDomain::CacheConfig,
        per_core: false,
        ranges: CACHE_CONFIG,
    },
];

const CORE_CSRS: &[Csr] = &[MSCRATCH, MTVT, MINTTHRESH, TSELECT, TDATA1, TDATA2, PM_USER];

static SINGLE_CORE: Capabilities = Capabilities {
    chip: Chip::Esp32c6,
    cores: 1,
    pmp_entries: 16,
    pma_entries: 16,
    core_csrs: CORE_CSRS,
    devices: DEVICES,
    wake_stub_reg: WAKE_STUB_REG,
    core1_gate: None,
    ipc_intr_regs: &[],
    uarts: &[TEST_UART],
};

static DUAL_CORE: Capabilities = Capabilities {
    chip: Chip::Esp32p4,
    cores: 2,
    pmp_entries: 16,
    pma_entries: 0,
    core_csrs: CORE_CSRS,
    devices: DEVICES,
    wake_stub_reg: WAKE_STUB_REG,
    core1_gate: Some(CORE1_GATE),
    ipc_intr_regs: IPC_INTR_REGS,
    uarts: &[TEST_UART],
};

/// A descriptor pointing into simulated memory, with three device
/// snapshots. The interrupt controller snapshot covers 10 words.
pub(crate) fn test_capabilities(cores: usize) -> &'static Capabilities {
    match cores {
        1 => &SINGLE_CORE,
        _ => &DUAL_CORE,
    }
}

/// Sparse simulated register space.
#[derive(Default)]
pub(crate) struct FakeRegisters {
    values: Mutex<BTreeMap<usize, u32>>,
    reads: Mutex<BTreeMap<usize, usize>>,
    writes: Mutex<Vec<usize>>,
    self_clearing: Mutex<BTreeSet<usize>>,
}

impl FakeRegisters {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Reads a register without counting it as a hardware access.
    pub(crate) fn peek(&self, addr: usize) -> u32 {
        self.values.lock().unwrap().get(&addr).copied().unwrap_or(0)
    }

    /// Writes a register without logging the write.
    pub(crate) fn poke(&self, addr: usize, value: u32) {
        self.values.lock().unwrap().insert(addr, value);
    }

    /// Makes writes to `addr` read back as 0, like an update trigger.
    pub(crate) fn self_clearing(&self, addr: usize) {
        self.self_clearing.lock().unwrap().insert(addr);
    }

    pub(crate) fn reads_of(&self, addr: usize) -> usize {
        self.reads.lock().unwrap().get(&addr).copied().unwrap_or(0)
    }

    /// Addresses written since the last call, in order.
    pub(crate) fn take_writes(&self) -> Vec<usize> {
        std::mem::take(&mut *self.writes.lock().unwrap())
    }

    /// Seeds every register of `ranges` with a value derived from its
    /// address.
    pub(crate) fn seed(&self, ranges: &[RegRange]) {
        for addr in ranges.iter().flat_map(RegRange::addresses) {
            self.poke(addr, (addr as u32).rotate_left(13) ^ 0x5a5a_0000);
        }
    }

    pub(crate) fn values(&self, ranges: &[RegRange]) -> Vec<u32> {
        ranges.iter().flat_map(RegRange::addresses).map(|addr| self.peek(addr)).collect()
    }

    /// Forgets the value of every register.
    pub(crate) fn wipe(&self) {
        self.values.lock().unwrap().clear();
    }
}

impl RegisterAccess for FakeRegisters {
    fn read(&self, addr: usize) -> u32 {
        *self.reads.lock().unwrap().entry(addr).or_default() += 1;
        self.peek(addr)
    }

    fn write(&self, addr: usize, value: u32) {
        self.writes.lock().unwrap().push(addr);
        let value = if self.self_clearing.lock().unwrap().contains(&addr) {
            0
        } else {
            value
        };
        self.poke(addr, value);
    }
}

/// Simulated CSR files and critical-frame primitives of both cores.
pub(crate) struct FakeCore {
    csrs: [Mutex<BTreeMap<u16, usize>>; MAX_CORES],
    pmufunc: [AtomicUsize; MAX_CORES],
    bound: [AtomicPtr<CriticalFrame>; MAX_CORES],
    critical_saves: [AtomicUsize; MAX_CORES],
}

impl FakeCore {
    pub(crate) fn new() -> Self {
        Self {
            csrs: [const { Mutex::new(BTreeMap::new()) }; MAX_CORES],
            pmufunc: [const { AtomicUsize::new(PmuFunc::SAVED_BITS) }; MAX_CORES],
            bound: [const { AtomicPtr::new(std::ptr::null_mut()) }; MAX_CORES],
            critical_saves: [const { AtomicUsize::new(0) }; MAX_CORES],
        }
    }

    /// The `pmufunc` value the next critical save of `core` leaves behind.
    pub(crate) fn set_pmufunc(&self, core: Cpu, bits: usize) {
        self.pmufunc[core.index()].store(bits, Ordering::SeqCst);
    }

    pub(crate) fn critical_saves(&self, core: Cpu) -> usize {
        self.critical_saves[core.index()].load(Ordering::SeqCst)
    }

    pub(crate) fn bound_frame(&self, core: Cpu) -> *mut CriticalFrame {
        self.bound[core.index()].load(Ordering::SeqCst)
    }

    /// Gives every CSR of the non-critical frame a distinct value.
    pub(crate) fn seed_csrs(&self, core: Cpu, caps: &Capabilities) {
        let mut csrs = self.csrs[core.index()].lock().unwrap();
        let base = 0x1000 * (core.index() + 1);

        for (i, csr) in caps.core_csrs.iter().enumerate() {
            csrs.insert(csr.number(), base + i);
        }
        for n in 0..caps.pmp_entries {
            csrs.insert(Csr::pmpaddr(n).number(), base + 0x100 + n);
        }
        for n in 0..caps.pmpcfg_regs() {
            csrs.insert(Csr::pmpcfg(n).number(), 0x1f1f_1f1f);
        }
        for n in 0..caps.pma_entries {
            csrs.insert(Csr::pmaaddr(n).number(), base + 0x200 + n);
            csrs.insert(Csr::pmacfg(n).number(), n << 2);
        }
    }

    pub(crate) fn csr_snapshot(&self, core: Cpu) -> BTreeMap<u16, usize> {
        self.csrs[core.index()].lock().unwrap().clone()
    }

    /// Zeroes every CSR of `core` that has been written before.
    pub(crate) fn clear_csrs(&self, core: Cpu) {
        for value in self.csrs[core.index()].lock().unwrap().values_mut() {
            *value = 0;
        }
    }
}

impl CoreAccess for FakeCore {
    fn current_core(&self) -> Cpu {
        CURRENT_CORE.with(Cell::get)
    }

    fn read_csr(&self, csr: Csr) -> usize {
        let csrs = self.csrs[self.current_core().index()].lock().unwrap();
        csrs.get(&csr.number()).copied().unwrap_or(0)
    }

    fn write_csr(&self, csr: Csr, value: usize) {
        let mut csrs = self.csrs[self.current_core().index()].lock().unwrap();
        csrs.insert(csr.number(), value);
    }

    fn bind_critical_frame(&self, core: Cpu, frame: Option<NonNull<CriticalFrame>>) {
        let ptr = frame.map_or(std::ptr::null_mut(), NonNull::as_ptr);
        self.bound[core.index()].store(ptr, Ordering::SeqCst);
    }

    unsafe fn save_critical_regs(&self, frame: NonNull<CriticalFrame>) {
        let core = self.current_core();
        assert_eq!(self.bound_frame(core), frame.as_ptr());
        self.critical_saves[core.index()].fetch_add(1, Ordering::SeqCst);

        let pmufunc = self.pmufunc[core.index()].load(Ordering::SeqCst);
        let frame = unsafe { &mut *frame.as_ptr() };

        // The restore routine only rewrites the tag.
        if PmuFunc::from_bits(pmufunc) == PmuFunc::Saved {
            frame.mepc = 0x4200_0000 + core.index() * 0x100;
            frame.gprs = std::array::from_fn(|i| (i + 1) * 0x11 + core.index());
            frame.mstatus = self.read_csr(MSTATUS);
            frame.mtvec = 0x4080_0001;
        }
        frame.pmufunc = pmufunc;
    }

    fn critical_restore_entry(&self) -> usize {
        RESTORE_ENTRY
    }
}

/// Simulated PMU.
pub(crate) struct FakePower {
    sleep_finish_result: Mutex<Result<(), SleepError>>,
    sleep_finish_calls: AtomicUsize,
    wfi_calls: AtomicUsize,
    restarts: AtomicUsize,
}

impl FakePower {
    fn new() -> Self {
        Self {
            sleep_finish_result: Mutex::new(Ok(())),
            sleep_finish_calls: AtomicUsize::new(0),
            wfi_calls: AtomicUsize::new(0),
            restarts: AtomicUsize::new(0),
        }
    }
}

/// The whole simulated platform.
pub(crate) struct FakePlatform {
    pub(crate) regs: FakeRegisters,
    pub(crate) core: FakeCore,
    pub(crate) power: FakePower,
}

impl FakePlatform {
    pub(crate) fn new() -> Self {
        Self {
            regs: FakeRegisters::new(),
            core: FakeCore::new(),
            power: FakePower::new(),
        }
    }

    pub(crate) fn restarts(&self) -> usize {
        self.power.restarts.load(Ordering::SeqCst)
    }

    pub(crate) fn sleep_finish_calls(&self) -> usize {
        self.power.sleep_finish_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn set_sleep_finish_result(&self, result: Result<(), SleepError>) {
        *self.power.sleep_finish_result.lock().unwrap() = result;
    }

    pub(crate) fn wfi_calls(&self) -> usize {
        self.power.wfi_calls.load(Ordering::SeqCst)
    }

    /// Clocks `uart` and makes its register update trigger self-clearing.
    pub(crate) fn enable_uart(&self, uart: &UartRegs) {
        self.regs.poke(uart.clk_en_reg, uart.clk_en_mask);
        self.regs.self_clearing(uart.base + 0x98);
    }

    /// Seeds every device register of `caps`.
    pub(crate) fn seed_devices(&self, caps: &Capabilities) {
        for device in caps.devices {
            self.regs.seed(device.ranges);
        }
    }
}

impl RegisterAccess for FakePlatform {
    fn read(&self, addr: usize) -> u32 {
        self.regs.read(addr)
    }

    fn write(&self, addr: usize, value: u32) {
        self.regs.write(addr, value)
    }
}

impl CoreAccess for FakePlatform {
    fn current_core(&self) -> Cpu {
        self.core.current_core()
    }

    fn read_csr(&self, csr: Csr) -> usize {
        self.core.read_csr(csr)
    }

    fn write_csr(&self, csr: Csr, value: usize) {
        self.core.write_csr(csr, value)
    }

    fn bind_critical_frame(&self, core: Cpu, frame: Option<NonNull<CriticalFrame>>) {
        self.core.bind_critical_frame(core, frame)
    }

    /// A resumed save comes back after a power down, with the registers of
    /// the CPU domain lost.
    unsafe fn save_critical_regs(&self, frame: NonNull<CriticalFrame>) {
        unsafe { self.core.save_critical_regs(frame) };

        let core = self.current_core();
        if PmuFunc::from_bits(self.core.pmufunc[core.index()].load(Ordering::SeqCst)) == PmuFunc::Resumed {
            self.regs.wipe();
            self.core.clear_csrs(core);
        }
    }

    fn critical_restore_entry(&self) -> usize {
        self.core.critical_restore_entry()
    }
}

impl PowerControl for FakePlatform {
    fn sleep_finish(&self, _deep_sleep: bool) -> Result<(), SleepError> {
        self.power.sleep_finish_calls.fetch_add(1, Ordering::SeqCst);
        *self.power.sleep_finish_result.lock().unwrap()
    }

    fn wait_for_interrupt(&self) {
        self.power.wfi_calls.fetch_add(1, Ordering::SeqCst);
        thread::yield_now();
    }

    fn restart(&self) -> ! {
        self.power.restarts.fetch_add(1, Ordering::SeqCst);
        panic!("restart requested");
    }
}

#[derive(Default)]
struct AllocStats {
    allocations: AtomicUsize,
    live: AtomicUsize,
    fail_at: AtomicUsize,
}

/// Global allocator wrapper counting allocations, able to fail one of them.
#[derive(Clone, Default)]
pub(crate) struct TestAlloc {
    stats: Arc<AllocStats>,
}

impl TestAlloc {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Makes the `n`-th allocation attempt, counting from 1, fail.
    pub(crate) fn fail_allocation(&self, n: usize) {
        self.stats.fail_at.store(n, Ordering::SeqCst);
    }

    /// Number of allocation attempts so far.
    pub(crate) fn allocations(&self) -> usize {
        self.stats.allocations.load(Ordering::SeqCst)
    }

    /// Number of allocations not yet freed.
    pub(crate) fn live(&self) -> usize {
        self.stats.live.load(Ordering::SeqCst)
    }
}

unsafe impl Allocator for TestAlloc {
    fn allocate(&self, layout: Layout) -> Result<NonNull<[u8]>, AllocError> {
        let attempt = self.stats.allocations.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt == self.stats.fail_at.load(Ordering::SeqCst) {
            return Err(AllocError);
        }

        let ptr = Global.allocate(layout)?;
        self.stats.live.fetch_add(1, Ordering::SeqCst);
        Ok(ptr)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        self.stats.live.fetch_sub(1, Ordering::SeqCst);
        unsafe { Global.deallocate(ptr, layout) }
    }
}
