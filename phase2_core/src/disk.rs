pub mod disk {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use log::{debug, error, info, trace, warn};

    use crate::device::device::{
        DEV_READY, DEV_WAKE, DISK_SECTOR_SIZE, DISK_TRACK_SIZE, DISK_UNITS, DeviceKind, DeviceLayer, DiskOp,
        SectorBuffer,
    };
    use crate::error::error::{SUCCESS, SysError, SysResult};
    use crate::kernel::kernel::Phase2;
    use crate::proc::proc::{MIN_STACK, ProcessLayer, SemId, Tag};
    use crate::stubs::stubs;
    use crate::syscall::syscall::{SYS_DISKREAD, SYS_DISKSIZE, SYS_DISKWRITE};

    pub const DISK_DRIVER_PRIORITY: u32 = 2;

    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub enum IoKind {
        Read,
        Write,
    }

    /// Geometry reported by `DiskSize`.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct DiskGeometry {
        /// bytes per sector.
        pub sector_bytes: usize,
        /// sectors per track.
        pub track_sectors: usize,
        /// tracks on the unit.
        pub tracks: usize,
    }

    pub fn validate_unit(unit: i64) -> SysResult<usize> {
        match usize::try_from(unit) {
            Ok(unit) if unit < DISK_UNITS => Ok(unit),
            _ => Err(SysError::InvalidUnit),
        }
    }

    /// A validated run of sectors starting at (`track`, `first`).
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct Extent {
        pub track: usize,
        pub first: usize,
        pub sectors: usize,
    }

    impl Extent {
        /// Check a request against a unit with `tracks` tracks. The run may
        /// continue past the end of `track` but not past the end of the disk.
        pub fn validate(track: i64, first: i64, sectors: i64, tracks: usize) -> SysResult<Extent> {
            let track = match usize::try_from(track) {
                Ok(track) if track < tracks => track,
                _ => return Err(SysError::InvalidTrack),
            };
            let first = match usize::try_from(first) {
                Ok(first) if first < DISK_TRACK_SIZE => first,
                _ => return Err(SysError::InvalidFirst),
            };
            let sectors = usize::try_from(sectors).map_err(|_| SysError::InvalidSectors)?;
            let start = track * DISK_TRACK_SIZE + first;
            match start.checked_add(sectors) {
                Some(end) if end <= tracks * DISK_TRACK_SIZE => Ok(Extent { track, first, sectors }),
                _ => Err(SysError::InvalidSectors),
            }
        }

        /// (track, sector) of the `index`th sector of the run.
        pub fn locate(&self, index: usize) -> (usize, usize) {
            let absolute = self.track * DISK_TRACK_SIZE + self.first + index;
            (absolute / DISK_TRACK_SIZE, absolute % DISK_TRACK_SIZE)
        }

        pub fn bytes(&self) -> usize {
            self.sectors * DISK_SECTOR_SIZE
        }
    }

    /// One queued read or write. The caller keeps the buffer and the
    /// completion semaphore; the driver borrows both until it signals.
    pub struct DiskRequest {
        pub id: u64,
        pub kind: IoKind,
        pub extent: Extent,
        buffer: SectorBuffer,
        done: SemId,
        started: AtomicBool,
        outcome: Mutex<Option<SysResult<()>>>,
    }

    impl DiskRequest {
        fn finish(&self, result: SysResult<()>) {
            *self.outcome.lock().unwrap() = Some(result);
        }

        fn take_outcome(&self) -> SysResult<()> {
            self.outcome.lock().unwrap().take().unwrap_or(Err(SysError::WaitAborted))
        }
    }

    struct Queue {
        requests: VecDeque<Arc<DiskRequest>>,
        closed: bool,
    }

    /// Per-unit state: the track count read at init and the FIFO of
    /// outstanding requests. Callers append, only the unit's driver removes.
    pub struct DiskUnit {
        tracks: AtomicUsize,
        queue: Mutex<Queue>,
    }

    impl DiskUnit {
        fn new() -> DiskUnit {
            DiskUnit {
                tracks: AtomicUsize::new(0),
                queue: Mutex::new(Queue {
                    requests: VecDeque::new(),
                    closed: false,
                }),
            }
        }

        pub fn tracks(&self) -> usize {
            self.tracks.load(Ordering::Acquire)
        }

        fn enqueue(&self, request: Arc<DiskRequest>) -> SysResult<()> {
            let mut queue = self.queue.lock().unwrap();
            if queue.closed {
                return Err(SysError::WaitAborted);
            }
            queue.requests.push_back(request);
            Ok(())
        }

        /// oldest request, marked as being serviced.
        fn head(&self) -> Option<Arc<DiskRequest>> {
            let queue = self.queue.lock().unwrap();
            let head = queue.requests.front().cloned();
            if let Some(request) = &head {
                request.started.store(true, Ordering::Release);
            }
            head
        }

        fn pop(&self, request: &Arc<DiskRequest>) {
            let mut queue = self.queue.lock().unwrap();
            if queue.requests.front().is_some_and(|head| Arc::ptr_eq(head, request)) {
                queue.requests.pop_front();
            }
        }

        /// Drop every queued request and refuse new ones. Returns the
        /// completion semaphores of the requests that had not been started;
        /// their callers are still blocked on them.
        fn drain(&self) -> Vec<SemId> {
            let mut queue = self.queue.lock().unwrap();
            queue.closed = true;
            queue
                .requests
                .drain(..)
                .filter(|request| !request.started.load(Ordering::Acquire))
                .map(|request| request.done)
                .collect()
        }

        pub fn pending(&self) -> usize {
            self.queue.lock().unwrap().requests.len()
        }
    }

    pub struct DiskUnits {
        units: Vec<DiskUnit>,
        next_id: AtomicU64,
    }

    impl DiskUnits {
        pub fn new() -> DiskUnits {
            DiskUnits {
                units: (0..DISK_UNITS).map(|_| DiskUnit::new()).collect(),
                next_id: AtomicU64::new(1),
            }
        }

        pub fn unit(&self, unit: usize) -> &DiskUnit {
            &self.units[unit]
        }
    }

    impl Default for DiskUnits {
        fn default() -> Self {
            DiskUnits::new()
        }
    }

    impl<P: ProcessLayer, D: DeviceLayer> Phase2<P, D> {
        /// Install the disk calls, read each unit's geometry and fork one
        /// driver per unit.
        pub fn disk_init(self: &Arc<Self>) -> SysResult<()> {
            self.set_syscall_handler(SYS_DISKREAD, stubs::disk_read_stub::<P, D>)?;
            self.set_syscall_handler(SYS_DISKWRITE, stubs::disk_write_stub::<P, D>)?;
            self.set_syscall_handler(SYS_DISKSIZE, stubs::disk_size_stub::<P, D>)?;

            for unit in 0..DISK_UNITS {
                let tracks = self.query_tracks(unit)?;
                self.disks.unit(unit).tracks.store(tracks, Ordering::Release);

                let kernel = Arc::clone(self);
                let pid = self.procs.fork(
                    &format!("Disk{unit}_Driver"),
                    Box::new(move || kernel.disk_driver(unit)),
                    MIN_STACK,
                    DISK_DRIVER_PRIORITY,
                    Tag::Kernel,
                )?;
                self.drivers.lock().unwrap().push(pid);
                info!("disk{unit}: {tracks} tracks, driver is process {pid}");
            }
            Ok(())
        }

        fn query_tracks(&self, unit: usize) -> SysResult<usize> {
            let tracks = Arc::new(AtomicUsize::new(0));
            self.issue(
                unit,
                DiskOp::Tracks {
                    tracks: Arc::clone(&tracks),
                },
            )?;
            self.await_completion(unit)?;
            Ok(tracks.load(Ordering::Acquire))
        }

        pub fn disk_read(&self, unit: i64, track: i64, first: i64, sectors: i64, buffer: Option<SectorBuffer>) -> SysResult<()> {
            self.disk_io(IoKind::Read, unit, track, first, sectors, buffer)
        }

        pub fn disk_write(&self, unit: i64, track: i64, first: i64, sectors: i64, buffer: Option<SectorBuffer>) -> SysResult<()> {
            self.disk_io(IoKind::Write, unit, track, first, sectors, buffer)
        }

        pub fn disk_size(&self, unit: i64) -> SysResult<DiskGeometry> {
            self.require_kernel_mode();
            let unit = validate_unit(unit)?;
            Ok(DiskGeometry {
                sector_bytes: DISK_SECTOR_SIZE,
                track_sectors: DISK_TRACK_SIZE,
                tracks: self.disks.unit(unit).tracks(),
            })
        }

        pub fn pending_requests(&self, unit: usize) -> usize {
            self.disks.unit(unit).pending()
        }

        /// Validate, queue for the unit's driver and block until the driver
        /// has finished this request.
        fn disk_io(
            &self,
            kind: IoKind,
            unit: i64,
            track: i64,
            first: i64,
            sectors: i64,
            buffer: Option<SectorBuffer>,
        ) -> SysResult<()> {
            self.require_kernel_mode();
            let unit = validate_unit(unit)?;
            let extent = Extent::validate(track, first, sectors, self.disks.unit(unit).tracks())?;
            let buffer = buffer.ok_or(SysError::NullAddress)?;
            if buffer.lock().unwrap().len() < extent.bytes() {
                return Err(SysError::InvalidSectors);
            }

            let pid = self.caller()?;
            let done = self.procs.sem_create(&format!("Disk{unit} {pid}"), 0)?;
            let request = Arc::new(DiskRequest {
                id: self.disks.next_id.fetch_add(1, Ordering::Relaxed),
                kind,
                extent,
                buffer,
                done,
                started: AtomicBool::new(false),
                outcome: Mutex::new(None),
            });
            if let Err(err) = self.disks.unit(unit).enqueue(Arc::clone(&request)) {
                let _ = self.procs.sem_free(done);
                return Err(err);
            }
            debug!("disk{unit}: queued request {} {kind:?} {extent:?} for process {pid}", request.id);

            if let Err(err) = self.dev.wakeup_device(DeviceKind::Disk, unit, DEV_WAKE, false) {
                warn!("disk{unit}: could not wake driver: {err}");
            }
            self.procs.p(done)?;
            self.procs.sem_free(done)?;
            request.take_outcome()
        }

        fn disk_driver(&self, unit: usize) -> i32 {
            'serve: loop {
                match self.dev.wait_device(DeviceKind::Disk, unit) {
                    Ok(_) => {}
                    Err(SysError::WaitAborted) => break,
                    Err(err) => {
                        error!("disk{unit}: wait failed: {err}");
                        break;
                    }
                }
                // one wakeup may stand for several requests
                while let Some(request) = self.disks.unit(unit).head() {
                    let result = self.service(unit, &request);
                    self.disks.unit(unit).pop(&request);
                    let aborted = result == Err(SysError::WaitAborted);
                    debug!("disk{unit}: request {} finished: {result:?}", request.id);
                    request.finish(result);
                    if let Err(err) = self.procs.v(request.done) {
                        warn!("disk{unit}: could not release request {}: {err}", request.id);
                    }
                    if aborted {
                        break 'serve;
                    }
                }
            }
            info!("disk{unit}: driver exiting");
            SUCCESS
        }

        /// Run one request sector by sector, seeking whenever the run
        /// crosses into a new track.
        fn service(&self, unit: usize, request: &DiskRequest) -> SysResult<()> {
            let mut head = None;
            for index in 0..request.extent.sectors {
                let (track, sector) = request.extent.locate(index);
                if head != Some(track) {
                    trace!("disk{unit}: seek to track {track}");
                    self.issue(unit, DiskOp::Seek { track })?;
                    self.await_completion(unit)?;
                    head = Some(track);
                }

                let buffer = Arc::clone(&request.buffer);
                let offset = index * DISK_SECTOR_SIZE;
                let op = match request.kind {
                    IoKind::Read => DiskOp::Read { sector, buffer, offset },
                    IoKind::Write => DiskOp::Write { sector, buffer, offset },
                };
                trace!("disk{unit}: {:?} track {track} sector {sector}", request.kind);
                self.issue(unit, op)?;
                self.await_completion(unit)?;
            }
            Ok(())
        }

        /// Start one hardware operation. A refused operation is a device
        /// failure as far as the caller is concerned.
        fn issue(&self, unit: usize, op: DiskOp) -> SysResult<()> {
            self.dev.device_output(DeviceKind::Disk, unit, op).map_err(|err| {
                error!("disk{unit}: operation refused: {err}");
                SysError::DeviceFailure
            })
        }

        /// Wait for the completion interrupt of the operation in flight,
        /// skipping wakeups posted by callers in the meantime.
        fn await_completion(&self, unit: usize) -> SysResult<()> {
            loop {
                match self.dev.wait_device(DeviceKind::Disk, unit)? {
                    DEV_WAKE => continue,
                    DEV_READY => return Ok(()),
                    status => {
                        error!("disk{unit}: operation failed with status {status}");
                        return Err(SysError::DeviceFailure);
                    }
                }
            }
        }

        /// Drop queued requests and stop both drivers. Callers whose
        /// requests were still queued stay blocked, each holding its
        /// completion semaphore. Returns those semaphores.
        pub fn disk_shutdown(&self) -> Vec<SemId> {
            let mut stranded = Vec::new();
            for unit in 0..DISK_UNITS {
                let dropped = self.disks.unit(unit).drain();
                if !dropped.is_empty() {
                    warn!(
                        "disk{unit}: dropping {} unserviced requests, semaphores {dropped:?} stay held",
                        dropped.len()
                    );
                }
                stranded.extend(dropped);
            }
            for unit in 0..DISK_UNITS {
                let status = self.dev.device_input(DeviceKind::Disk, unit).unwrap_or(DEV_READY);
                if let Err(err) = self.dev.wakeup_device(DeviceKind::Disk, unit, status, true) {
                    warn!("disk{unit}: could not stop driver: {err}");
                }
            }
            stranded
        }
    }

}
