pub mod error {
    use std::fmt;

    /// Status returned through the result slot when a call succeeds.
    pub const SUCCESS: i32 = 0;

    /// Every status a kernel call can report.
    ///
    /// Process layer statuses sit in -1..-19, device and driver statuses in
    /// -20..-39. Values are stable: user code sees them as raw integers in
    /// the result slot of the argument block.
    #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
    #[repr(i32)]
    pub enum SysError {
        // process layer
        InvalidPid = -1,
        InvalidPriority = -2,
        InvalidStack = -3,
        InvalidTag = -4,
        NameTooLong = -5,
        DuplicateName = -6,
        TooManyProcesses = -7,
        NoChildren = -8,
        InvalidSid = -9,
        TooManySemaphores = -10,
        BlockedProcesses = -11,
        WaitAborted = -12,

        // devices and drivers
        InvalidSyscall = -20,
        InvalidSeconds = -21,
        InvalidUnit = -22,
        InvalidTrack = -23,
        InvalidFirst = -24,
        InvalidSectors = -25,
        NullAddress = -26,
        DeviceFailure = -27,
        DeviceBusy = -28,
        InvalidDevice = -29,
    }

    pub type SysResult<T> = Result<T, SysError>;

    const ALL: [SysError; 22] = [
        SysError::InvalidPid,
        SysError::InvalidPriority,
        SysError::InvalidStack,
        SysError::InvalidTag,
        SysError::NameTooLong,
        SysError::DuplicateName,
        SysError::TooManyProcesses,
        SysError::NoChildren,
        SysError::InvalidSid,
        SysError::TooManySemaphores,
        SysError::BlockedProcesses,
        SysError::WaitAborted,
        SysError::InvalidSyscall,
        SysError::InvalidSeconds,
        SysError::InvalidUnit,
        SysError::InvalidTrack,
        SysError::InvalidFirst,
        SysError::InvalidSectors,
        SysError::NullAddress,
        SysError::DeviceFailure,
        SysError::DeviceBusy,
        SysError::InvalidDevice,
    ];

    impl SysError {
        pub fn code(self) -> i32 {
            self as i32
        }

        pub fn from_code(code: i32) -> Option<SysError> {
            ALL.iter().copied().find(|err| err.code() == code)
        }

        pub fn description(self) -> &'static str {
            match self {
                SysError::InvalidPid => "invalid process id",
                SysError::InvalidPriority => "invalid priority",
                SysError::InvalidStack => "stack size below minimum",
                SysError::InvalidTag => "invalid process tag",
                SysError::NameTooLong => "name too long",
                SysError::DuplicateName => "name already in use",
                SysError::TooManyProcesses => "process table full",
                SysError::NoChildren => "no children with that tag",
                SysError::InvalidSid => "invalid semaphore id",
                SysError::TooManySemaphores => "semaphore table full",
                SysError::BlockedProcesses => "processes blocked on semaphore",
                SysError::WaitAborted => "device wait aborted",
                SysError::InvalidSyscall => "invalid syscall number",
                SysError::InvalidSeconds => "invalid number of seconds",
                SysError::InvalidUnit => "invalid device unit",
                SysError::InvalidTrack => "invalid track",
                SysError::InvalidFirst => "invalid first sector",
                SysError::InvalidSectors => "invalid sector count",
                SysError::NullAddress => "null address",
                SysError::DeviceFailure => "device reported an error",
                SysError::DeviceBusy => "device busy",
                SysError::InvalidDevice => "invalid device",
            }
        }
    }

    impl fmt::Display for SysError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{} ({})", self.description(), self.code())
        }
    }

    impl std::error::Error for SysError {}

    /// Collapse a call result into the integer placed in the result slot.
    pub fn status_code<T>(result: &SysResult<T>) -> i32 {
        match result {
            Ok(_) => SUCCESS,
            Err(err) => err.code(),
        }
    }

    /// Inverse of [`status_code`] for callers reading a result slot.
    pub fn check_status(code: i64) -> SysResult<()> {
        if code == SUCCESS as i64 {
            return Ok(());
        }
        let code = i32::try_from(code).map_err(|_| SysError::InvalidSyscall)?;
        Err(SysError::from_code(code).unwrap_or(SysError::InvalidSyscall))
    }

}
