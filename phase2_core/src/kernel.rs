pub mod kernel {
    use std::sync::{Arc, Mutex, RwLock};

    use log::{debug, error, info, trace, warn};

    use crate::clock::clock::SleepRegistry;
    use crate::device::device::{DeviceLayer, Mode};
    use crate::disk::disk::DiskUnits;
    use crate::error::error::{SysError, SysResult};
    use crate::proc::proc::{MIN_STACK, Pid, ProcEntry, ProcessLayer, SemId, Tag};
    use crate::stubs::stubs;
    use crate::syscall::syscall::{SyscallHandler, SyscallTable, Sysargs};

    /// exit status of a kernel process that faulted.
    pub const KERNEL_FAULT_STATUS: i32 = 1024;
    /// exit status of a user process that faulted.
    pub const USER_FAULT_STATUS: i32 = 2048;

    pub const STARTUP_PRIORITY: u32 = 3;

    /// How an illegal-instruction fault is resolved, chosen by the tag of
    /// the faulting process.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub enum Fault {
        /// the kernel itself misbehaved; the process quits immediately.
        Kernel,
        /// a user process tried a privileged operation; it is terminated.
        User,
    }

    impl Fault {
        pub fn for_tag(tag: Tag) -> Fault {
            match tag {
                Tag::Kernel => Fault::Kernel,
                Tag::User => Fault::User,
            }
        }

        pub fn status(self) -> i32 {
            match self {
                Fault::Kernel => KERNEL_FAULT_STATUS,
                Fault::User => USER_FAULT_STATUS,
            }
        }
    }

    /// What shutdown found still outstanding.
    #[derive(Clone, Debug, Default, PartialEq, Eq)]
    pub struct ShutdownReport {
        pub released_sleepers: usize,
        /// queued disk requests dropped without service.
        pub drained_requests: usize,
        /// completion semaphores of the dropped requests. Their callers stay
        /// blocked on them, so they are never freed.
        pub stranded_semaphores: Vec<SemId>,
        pub reaped_drivers: usize,
    }

    /// The second kernel layer: syscall table, clock and disk drivers, and
    /// the user-process shim, running over a process layer `P` and the
    /// machine's devices `D`.
    pub struct Phase2<P: ProcessLayer, D: DeviceLayer> {
        pub(crate) procs: Arc<P>,
        pub(crate) dev: Arc<D>,
        syscalls: RwLock<SyscallTable<Phase2<P, D>>>,
        pub(crate) sleepers: SleepRegistry,
        pub(crate) disks: DiskUnits,
        pub(crate) drivers: Mutex<Vec<Pid>>,
        report: Mutex<ShutdownReport>,
    }

    impl<P: ProcessLayer, D: DeviceLayer> Phase2<P, D> {
        pub fn new(procs: Arc<P>, dev: Arc<D>) -> Arc<Phase2<P, D>> {
            Arc::new(Phase2 {
                procs,
                dev,
                syscalls: RwLock::new(SyscallTable::new()),
                sleepers: SleepRegistry::new(),
                disks: DiskUnits::new(),
                drivers: Mutex::new(Vec::new()),
                report: Mutex::new(ShutdownReport::default()),
            })
        }

        pub fn procs(&self) -> &Arc<P> {
            &self.procs
        }

        pub fn devices(&self) -> &Arc<D> {
            &self.dev
        }

        pub fn shutdown_report(&self) -> ShutdownReport {
            self.report.lock().unwrap().clone()
        }

        /// privileged operations call this first; from user mode it faults
        /// and never returns.
        pub fn require_kernel_mode(&self) {
            if self.dev.mode() == Mode::User {
                self.illegal_instruction();
            }
        }

        /// illegal-instruction fault handler.
        pub fn illegal_instruction(&self) -> ! {
            let caller = self.procs.current_pid();
            let fault = caller
                .and_then(|pid| self.procs.proc_info(pid).ok())
                .map(|info| Fault::for_tag(info.tag))
                .unwrap_or(Fault::Kernel);

            match fault {
                Fault::Kernel => {
                    error!("illegal instruction in kernel process {caller:?}, halting it");
                    self.procs.quit(fault.status())
                }
                Fault::User => {
                    warn!("illegal instruction in user process {caller:?}, terminating");
                    self.dev.set_mode(Mode::Kernel);
                    self.terminate(fault.status())
                }
            }
        }

        pub(crate) fn caller(&self) -> SysResult<Pid> {
            self.procs.current_pid().ok_or(SysError::InvalidPid)
        }

        pub fn set_syscall_handler(&self, number: u32, handler: SyscallHandler<Phase2<P, D>>) -> SysResult<()> {
            self.require_kernel_mode();
            self.syscalls.write().unwrap().register(number, handler)
        }

        /// Trap entry: run the handler for `args.number` in kernel mode and
        /// return to the caller's mode.
        pub fn syscall(self: &Arc<Self>, args: &mut Sysargs) {
            let saved = self.dev.mode();
            self.dev.set_mode(Mode::Kernel);
            self.dispatch(args);
            self.dev.set_mode(saved);
        }

        fn dispatch(self: &Arc<Self>, args: &mut Sysargs) {
            // copy the handler out so blocking calls do not hold the table
            let handler = self.syscalls.read().unwrap().handler(args.number);
            match handler {
                Some(handler) => {
                    trace!("syscall {} from {:?}", args.number, self.procs.current_pid());
                    handler(self, args);
                }
                None => {
                    error!("syscall {} has no handler", args.number);
                    self.illegal_instruction();
                }
            }
        }

        /// Start a user process running `entry` in user mode. Returning from
        /// `entry` terminates the process with the returned status.
        pub fn spawn(self: &Arc<Self>, name: &str, entry: ProcEntry, stack_size: usize, priority: u32) -> SysResult<Pid> {
            self.require_kernel_mode();
            let kernel = Arc::clone(self);
            let trampoline: ProcEntry = Box::new(move || -> i32 {
                kernel.dev.set_mode(Mode::User);
                let status = entry();
                crate::libuser::libuser::sys_terminate(&kernel, status)
            });
            let pid = self.procs.fork(name, trampoline, stack_size, priority, Tag::User)?;
            debug!("spawned user process {pid} ({name})");
            Ok(pid)
        }

        /// Reap one user child of the caller.
        pub fn wait(&self) -> SysResult<(Pid, i32)> {
            self.require_kernel_mode();
            self.procs.join(Tag::User)
        }

        pub fn terminate(&self, status: i32) -> ! {
            self.require_kernel_mode();
            self.procs.quit(status)
        }

        /// Body of the first kernel process: bring up the drivers, run
        /// `entry` as the first user process, wait for it, then tear the
        /// drivers down. Returns the user process's exit status.
        pub fn startup(self: &Arc<Self>, entry: ProcEntry) -> SysResult<i32> {
            self.require_kernel_mode();
            info!("phase2: starting");

            stubs::install_process_calls(self)?;
            self.clock_init()?;
            self.disk_init()?;
            stubs::install_semaphore_calls(self)?;
            info!(
                "phase2: {} syscalls installed",
                self.syscalls.read().unwrap().installed()
            );

            let pid = self.spawn("P3_Startup", entry, 4 * MIN_STACK, STARTUP_PRIORITY)?;
            let (child, status) = self.wait()?;
            if child != pid {
                warn!("phase2: reaped {child}, expected P3_Startup {pid}");
            }
            info!("phase2: P3_Startup exited with status {status}");

            let stranded_semaphores = self.disk_shutdown();
            let drained_requests = stranded_semaphores.len();
            let released_sleepers = self.clock_shutdown();
            let reaped_drivers = self.reap_drivers()?;
            *self.report.lock().unwrap() = ShutdownReport {
                released_sleepers,
                drained_requests,
                stranded_semaphores,
                reaped_drivers,
            };
            info!("phase2: shut down ({released_sleepers} sleepers released, {drained_requests} requests drained)");
            Ok(status)
        }

        fn reap_drivers(&self) -> SysResult<usize> {
            let expected = std::mem::take(&mut *self.drivers.lock().unwrap());
            for _ in &expected {
                let (pid, status) = self.procs.join(Tag::Kernel)?;
                debug!("reaped driver {pid} (status {status})");
            }
            Ok(expected.len())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn fault_follows_process_tag() {
            assert_eq!(Fault::for_tag(Tag::Kernel), Fault::Kernel);
            assert_eq!(Fault::for_tag(Tag::User), Fault::User);
            assert_eq!(Fault::Kernel.status(), 1024);
            assert_eq!(Fault::User.status(), 2048);
        }
    }
}
