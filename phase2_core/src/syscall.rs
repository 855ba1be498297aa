pub mod syscall {
    use std::fmt;
    use std::sync::Arc;

    use crate::device::device::SectorBuffer;
    use crate::error::error::{SysError, SysResult};
    use crate::proc::proc::{ProcEntry, ProcInfo};

    pub const MAX_SYSCALLS: u32 = 50;

    pub const SYS_SPAWN: u32 = 1;
    pub const SYS_WAIT: u32 = 2;
    pub const SYS_TERMINATE: u32 = 3;
    pub const SYS_GETPID: u32 = 4;
    pub const SYS_GETPROCINFO: u32 = 5;
    pub const SYS_GETTIMEOFDAY: u32 = 6;
    pub const SYS_SLEEP: u32 = 7;
    pub const SYS_DISKREAD: u32 = 8;
    pub const SYS_DISKWRITE: u32 = 9;
    pub const SYS_DISKSIZE: u32 = 10;
    pub const SYS_SEMCREATE: u32 = 11;
    pub const SYS_SEMP: u32 = 12;
    pub const SYS_SEMV: u32 = 13;
    pub const SYS_SEMFREE: u32 = 14;
    pub const SYS_SEMNAME: u32 = 15;

    /// One word of the argument block. Integers cover every scalar; the
    /// other variants carry what a raw pointer would in a real trap frame.
    #[derive(Default)]
    pub enum SysArg {
        #[default]
        None,
        Int(i64),
        Buffer(SectorBuffer),
        Text(String),
        Entry(ProcEntry),
        Info(Box<ProcInfo>),
    }

    impl SysArg {
        pub fn int(&self) -> i64 {
            match self {
                SysArg::Int(value) => *value,
                _ => 0,
            }
        }

        pub fn take(&mut self) -> SysArg {
            std::mem::take(self)
        }

        pub fn take_buffer(&mut self) -> Option<SectorBuffer> {
            match self.take() {
                SysArg::Buffer(buffer) => Some(buffer),
                _ => None,
            }
        }

        pub fn take_entry(&mut self) -> Option<ProcEntry> {
            match self.take() {
                SysArg::Entry(entry) => Some(entry),
                _ => None,
            }
        }

        pub fn take_text(&mut self) -> Option<String> {
            match self.take() {
                SysArg::Text(text) => Some(text),
                _ => None,
            }
        }

        pub fn take_info(&mut self) -> Option<ProcInfo> {
            match self.take() {
                SysArg::Info(info) => Some(*info),
                _ => None,
            }
        }
    }

    impl fmt::Debug for SysArg {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                SysArg::None => write!(f, "None"),
                SysArg::Int(value) => write!(f, "Int({value})"),
                SysArg::Buffer(buffer) => write!(f, "Buffer({} bytes)", buffer.lock().unwrap().len()),
                SysArg::Text(text) => write!(f, "Text({text:?})"),
                SysArg::Entry(_) => write!(f, "Entry"),
                SysArg::Info(info) => write!(f, "Info({})", info.name),
            }
        }
    }

    /// Argument block of one trapped call. Stubs read their inputs from the
    /// numbered words and write results back into them.
    #[derive(Debug, Default)]
    pub struct Sysargs {
        pub number: u32,
        pub arg1: SysArg,
        pub arg2: SysArg,
        pub arg3: SysArg,
        pub arg4: SysArg,
        pub arg5: SysArg,
    }

    impl Sysargs {
        pub fn new(number: u32) -> Sysargs {
            Sysargs {
                number,
                ..Sysargs::default()
            }
        }
    }

    pub type SyscallHandler<K> = fn(&Arc<K>, &mut Sysargs);

    /// Fixed table of handlers indexed by `number - 1`.
    pub struct SyscallTable<K> {
        handlers: Vec<Option<SyscallHandler<K>>>,
    }

    impl<K> SyscallTable<K> {
        pub fn new() -> SyscallTable<K> {
            SyscallTable {
                handlers: vec![None; MAX_SYSCALLS as usize],
            }
        }

        pub fn register(&mut self, number: u32, handler: SyscallHandler<K>) -> SysResult<()> {
            if !(1..=MAX_SYSCALLS).contains(&number) {
                return Err(SysError::InvalidSyscall);
            }
            self.handlers[(number - 1) as usize] = Some(handler);
            Ok(())
        }

        pub fn handler(&self, number: u32) -> Option<SyscallHandler<K>> {
            if !(1..=MAX_SYSCALLS).contains(&number) {
                return None;
            }
            self.handlers[(number - 1) as usize]
        }

        pub fn installed(&self) -> usize {
            self.handlers.iter().filter(|slot| slot.is_some()).count()
        }
    }

    impl<K> Default for SyscallTable<K> {
        fn default() -> Self {
            SyscallTable::new()
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        struct Ctx;

        fn mark(_: &Arc<Ctx>, args: &mut Sysargs) {
            args.arg4 = SysArg::Int(7);
        }

        #[test]
        fn register_rejects_out_of_range_numbers() {
            let mut table: SyscallTable<Ctx> = SyscallTable::new();
            assert_eq!(table.register(0, mark), Err(SysError::InvalidSyscall));
            assert_eq!(table.register(MAX_SYSCALLS + 1, mark), Err(SysError::InvalidSyscall));
            assert_eq!(table.installed(), 0);
        }

        #[test]
        fn registered_handler_is_invoked() {
            let mut table: SyscallTable<Ctx> = SyscallTable::new();
            table.register(MAX_SYSCALLS, mark).unwrap();
            table.register(SYS_SLEEP, mark).unwrap();
            assert_eq!(table.installed(), 2);

            let handler = table.handler(SYS_SLEEP).unwrap();
            let mut args = Sysargs::new(SYS_SLEEP);
            handler(&Arc::new(Ctx), &mut args);
            assert_eq!(args.arg4.int(), 7);
            assert!(table.handler(SYS_DISKREAD).is_none());
            assert!(table.handler(0).is_none());
        }

        #[test]
        fn take_leaves_none_behind() {
            let mut arg = SysArg::Text("sem".to_string());
            assert_eq!(arg.take_text().as_deref(), Some("sem"));
            assert!(matches!(arg, SysArg::None));
            assert_eq!(arg.int(), 0);
            assert!(arg.take_buffer().is_none());
        }
    }
}
