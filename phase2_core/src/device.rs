pub mod device {
    use std::sync::atomic::AtomicUsize;
    use std::sync::{Arc, Mutex};

    use crate::error::error::SysResult;

    pub const CLOCK_UNITS: usize = 1;
    pub const DISK_UNITS: usize = 2;

    /// bytes per sector.
    pub const DISK_SECTOR_SIZE: usize = 512;
    /// sectors per track.
    pub const DISK_TRACK_SIZE: usize = 16;

    /// Device status words reported by `device_input` and interrupts.
    pub const DEV_READY: i64 = 0;
    pub const DEV_BUSY: i64 = 1;
    pub const DEV_ERROR: i64 = 2;
    /// Status attached to a software wakeup of a disk driver. Never produced
    /// by the hardware, so a driver can tell a wakeup from a completion.
    pub const DEV_WAKE: i64 = -1;

    #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
    pub enum DeviceKind {
        Clock,
        Disk,
    }

    impl DeviceKind {
        pub fn units(self) -> usize {
            match self {
                DeviceKind::Clock => CLOCK_UNITS,
                DeviceKind::Disk => DISK_UNITS,
            }
        }
    }

    /// Processor mode bit of the current process.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub enum Mode {
        Kernel,
        User,
    }

    /// Caller-owned memory a disk request reads into or writes from.
    pub type SectorBuffer = Arc<Mutex<Vec<u8>>>;

    pub fn sector_buffer(sectors: usize) -> SectorBuffer {
        Arc::new(Mutex::new(vec![0; sectors * DISK_SECTOR_SIZE]))
    }

    /// One hardware operation handed to a disk unit. Completion is reported
    /// by an interrupt on that unit.
    #[derive(Clone, Debug)]
    pub enum DiskOp {
        /// move the head to `track`.
        Seek { track: usize },
        /// read `sector` of the current track into `buffer[offset..offset + 512]`.
        Read { sector: usize, buffer: SectorBuffer, offset: usize },
        /// write `buffer[offset..offset + 512]` to `sector` of the current track.
        Write { sector: usize, buffer: SectorBuffer, offset: usize },
        /// store the unit's track count into `tracks`.
        Tracks { tracks: Arc<AtomicUsize> },
    }

    /// Raw device surface of the machine. Everything here is a single
    /// register access or interrupt wait; no policy lives behind it.
    pub trait DeviceLayer: Send + Sync + 'static {
        /// start an operation on a unit. Only disks accept operations.
        fn device_output(&self, kind: DeviceKind, unit: usize, op: DiskOp) -> SysResult<()>;

        /// read the unit's status register. The clock reports microseconds.
        fn device_input(&self, kind: DeviceKind, unit: usize) -> SysResult<i64>;

        /// block until the next interrupt on the unit and return its status.
        /// Fails with `WaitAborted` once the wait has been force-aborted.
        fn wait_device(&self, kind: DeviceKind, unit: usize) -> SysResult<i64>;

        /// deliver `status` to a waiter as if an interrupt occurred, or
        /// abort every present and future wait on the unit.
        fn wakeup_device(&self, kind: DeviceKind, unit: usize, status: i64, abort: bool) -> SysResult<()>;

        fn mode(&self) -> Mode;

        fn set_mode(&self, mode: Mode);
    }
}
