pub mod clock {
    use std::sync::{Arc, Mutex};

    use log::{debug, error, info, trace, warn};

    use crate::device::device::{DEV_READY, DeviceKind, DeviceLayer};
    use crate::error::error::{SUCCESS, SysError, SysResult};
    use crate::kernel::kernel::Phase2;
    use crate::proc::proc::{MAX_PROC, MIN_STACK, Pid, ProcessLayer, SemId, Tag};
    use crate::stubs::stubs;
    use crate::syscall::syscall::SYS_SLEEP;

    pub const MICROS_PER_SECOND: i64 = 1_000_000;

    /// Above ordinary user priority so sleepers are released on the tick
    /// they become due.
    pub const CLOCK_DRIVER_PRIORITY: u32 = 2;

    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub enum SleeperSlot {
        #[default]
        Empty,
        Armed { pid: Pid, sid: SemId, wake_at: i64 },
    }

    struct Slots {
        slots: Vec<SleeperSlot>,
        closed: bool,
    }

    /// Sleepers indexed by process id. A slot is armed by its own process
    /// and cleared exactly once, by the clock driver or by shutdown.
    pub struct SleepRegistry {
        inner: Mutex<Slots>,
    }

    impl SleepRegistry {
        pub fn new() -> SleepRegistry {
            SleepRegistry {
                inner: Mutex::new(Slots {
                    slots: vec![SleeperSlot::Empty; MAX_PROC],
                    closed: false,
                }),
            }
        }

        pub fn arm(&self, pid: Pid, sid: SemId, wake_at: i64) -> SysResult<()> {
            let mut inner = self.inner.lock().unwrap();
            if inner.closed {
                return Err(SysError::WaitAborted);
            }
            let slot = inner.slots.get_mut(pid).ok_or(SysError::InvalidPid)?;
            if *slot != SleeperSlot::Empty {
                // a process is blocked while armed, so this is a second sleeper
                // claiming the same identity
                return Err(SysError::InvalidPid);
            }
            *slot = SleeperSlot::Armed { pid, sid, wake_at };
            Ok(())
        }

        /// Clear every armed slot due at `now`, in slot order.
        pub fn take_due(&self, now: i64) -> Vec<(Pid, SemId)> {
            let mut inner = self.inner.lock().unwrap();
            let mut due = Vec::new();
            for slot in inner.slots.iter_mut() {
                if let SleeperSlot::Armed { pid, sid, wake_at } = *slot {
                    if wake_at <= now {
                        due.push((pid, sid));
                        *slot = SleeperSlot::Empty;
                    }
                }
            }
            due
        }

        /// Clear every armed slot and refuse further sleepers.
        pub fn take_all(&self) -> Vec<(Pid, SemId)> {
            let mut inner = self.inner.lock().unwrap();
            inner.closed = true;
            let mut armed = Vec::new();
            for slot in inner.slots.iter_mut() {
                if let SleeperSlot::Armed { pid, sid, .. } = std::mem::take(slot) {
                    armed.push((pid, sid));
                }
            }
            armed
        }

        pub fn armed(&self) -> usize {
            let inner = self.inner.lock().unwrap();
            inner.slots.iter().filter(|slot| **slot != SleeperSlot::Empty).count()
        }

        pub fn slot(&self, pid: Pid) -> SleeperSlot {
            let inner = self.inner.lock().unwrap();
            inner.slots.get(pid).copied().unwrap_or_default()
        }
    }

    impl Default for SleepRegistry {
        fn default() -> Self {
            SleepRegistry::new()
        }
    }

    impl<P: ProcessLayer, D: DeviceLayer> Phase2<P, D> {
        /// Install the sleep call and fork the clock driver.
        pub fn clock_init(self: &Arc<Self>) -> SysResult<()> {
            self.set_syscall_handler(SYS_SLEEP, stubs::sleep_stub::<P, D>)?;

            let kernel = Arc::clone(self);
            let pid = self.procs.fork(
                "Clock_Driver",
                Box::new(move || kernel.clock_driver()),
                MIN_STACK,
                CLOCK_DRIVER_PRIORITY,
                Tag::Kernel,
            )?;
            self.drivers.lock().unwrap().push(pid);
            info!("clock: driver is process {pid}");
            Ok(())
        }

        /// Block the caller for at least `seconds` of device time.
        pub fn sleep(&self, seconds: i32) -> SysResult<()> {
            self.require_kernel_mode();
            if seconds < 0 {
                return Err(SysError::InvalidSeconds);
            }
            let pid = self.caller()?;
            let sid = self.procs.sem_create(&format!("Sleep {pid}"), 0)?;

            let armed = self
                .dev
                .device_input(DeviceKind::Clock, 0)
                .map(|now| now + seconds as i64 * MICROS_PER_SECOND)
                .and_then(|wake_at| self.sleepers.arm(pid, sid, wake_at).map(|_| wake_at));
            let wake_at = match armed {
                Ok(wake_at) => wake_at,
                Err(err) => {
                    let _ = self.procs.sem_free(sid);
                    return Err(err);
                }
            };
            debug!("clock: process {pid} sleeps until {wake_at}");

            let woke = self.procs.p(sid);
            let freed = self.procs.sem_free(sid);
            woke.and(freed)
        }

        pub fn armed_sleepers(&self) -> usize {
            self.sleepers.armed()
        }

        fn clock_driver(&self) -> i32 {
            loop {
                let now = match self.dev.wait_device(DeviceKind::Clock, 0) {
                    Ok(now) => now,
                    Err(SysError::WaitAborted) => break,
                    Err(err) => {
                        error!("clock: wait failed: {err}");
                        break;
                    }
                };
                for (pid, sid) in self.sleepers.take_due(now) {
                    trace!("clock: waking process {pid} at {now}");
                    if let Err(err) = self.procs.v(sid) {
                        warn!("clock: could not wake process {pid}: {err}");
                    }
                }
            }
            info!("clock: driver exiting");
            SUCCESS
        }

        /// Release every remaining sleeper, then abort the driver's wait.
        /// Returns the number of sleepers released.
        pub fn clock_shutdown(&self) -> usize {
            let armed = self.sleepers.take_all();
            for (pid, sid) in &armed {
                debug!("clock: releasing sleeper {pid} at shutdown");
                if let Err(err) = self.procs.v(*sid) {
                    warn!("clock: could not release sleeper {pid}: {err}");
                }
            }

            let status = self.dev.device_input(DeviceKind::Clock, 0).unwrap_or(DEV_READY);
            if let Err(err) = self.dev.wakeup_device(DeviceKind::Clock, 0, status, true) {
                warn!("clock: could not stop driver: {err}");
            }
            armed.len()
        }
    }

}
