pub mod proc {
    use std::any::Any;

    use crate::error::error::SysResult;

    pub const MAX_PROC: usize = 50;
    pub const MAX_SEMS: usize = 200;
    pub const MAX_NAME: usize = 80;
    pub const MIN_STACK: usize = 80 * 1024;

    /// lowest and highest priority a caller may request.
    pub const HIGHEST_PRIORITY: u32 = 1;
    pub const LOWEST_PRIORITY: u32 = 5;

    /// Process identities are dense slots in `0..MAX_PROC`.
    pub type Pid = usize;
    pub type SemId = usize;

    /// Code run as the body of a new process. The returned value is the
    /// exit status.
    pub type ProcEntry = Box<dyn FnOnce() -> i32 + Send + 'static>;

    #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
    pub enum Tag {
        Kernel = 0,
        User = 1,
    }

    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub enum ProcState {
        Running,
        Blocked,
        Quit,
    }

    #[derive(Clone, Debug, PartialEq, Eq)]
    pub struct ProcInfo {
        pub name: String,
        pub state: ProcState,
        pub priority: u32,
        pub tag: Tag,
        pub parent: Option<Pid>,
        pub children: Vec<Pid>,
    }

    /// Unwind payload carrying the status of a process that quit.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct ProcessExit(pub i32);

    impl ProcessExit {
        pub fn from_payload(payload: &(dyn Any + Send)) -> Option<i32> {
            payload.downcast_ref::<ProcessExit>().map(|exit| exit.0)
        }
    }

    /// Process creation, semaphores and process-table queries provided by
    /// the layer underneath.
    pub trait ProcessLayer: Send + Sync + 'static {
        fn fork(&self, name: &str, entry: ProcEntry, stack_size: usize, priority: u32, tag: Tag) -> SysResult<Pid>;

        /// reap one quit child carrying `tag`, blocking until one exists.
        fn join(&self, tag: Tag) -> SysResult<(Pid, i32)>;

        /// end the calling process. Never returns.
        fn quit(&self, status: i32) -> !;

        fn sem_create(&self, name: &str, value: u32) -> SysResult<SemId>;

        fn p(&self, sid: SemId) -> SysResult<()>;

        fn v(&self, sid: SemId) -> SysResult<()>;

        fn sem_free(&self, sid: SemId) -> SysResult<()>;

        fn sem_name(&self, sid: SemId) -> SysResult<String>;

        fn proc_info(&self, pid: Pid) -> SysResult<ProcInfo>;

        /// `None` when called from a thread that is not a process.
        fn current_pid(&self) -> Option<Pid>;
    }
}
