pub mod system {
    use std::sync::Arc;

    use log::{error, info};

    use phase2_core::kernel::kernel::{Phase2, ShutdownReport};

    use crate::config::config::MachineConfig;
    use crate::machine::machine::Machine;
    use crate::phase1::phase1::Phase1;

    pub type HostKernel = Phase2<Phase1, Machine>;

    /// A powered machine with both kernel layers stacked on it.
    pub struct System {
        pub machine: Arc<Machine>,
        pub phase1: Arc<Phase1>,
        pub kernel: Arc<HostKernel>,
    }

    impl System {
        pub fn new(config: MachineConfig) -> System {
            let machine = Machine::power_on(config);
            let phase1 = Arc::new(Phase1::new());
            let kernel = Phase2::new(Arc::clone(&phase1), Arc::clone(&machine));
            System { machine, phase1, kernel }
        }

        /// Boot P2_Startup, which runs `p3` as P3_Startup and shuts the
        /// drivers down after it. Returns P3_Startup's exit status, or the
        /// error code when startup failed.
        pub fn run<F>(&self, p3: F) -> i32
        where
            F: FnOnce(Arc<HostKernel>) -> i32 + Send + 'static,
        {
            let kernel = Arc::clone(&self.kernel);
            let booted = self.phase1.boot("P2_Startup", move || {
                let user = Arc::clone(&kernel);
                match kernel.startup(Box::new(move || p3(user))) {
                    Ok(status) => status,
                    Err(err) => {
                        error!("startup failed: {err}");
                        err.code()
                    }
                }
            });
            match booted {
                Ok(status) => {
                    info!("P2_Startup finished with status {status}");
                    status
                }
                Err(err) => {
                    error!("could not boot: {err}");
                    err.code()
                }
            }
        }

        pub fn report(&self) -> ShutdownReport {
            self.kernel.shutdown_report()
        }
    }

    impl Drop for System {
        fn drop(&mut self) {
            self.machine.power_off();
        }
    }
}
