pub mod machine {
    use std::cell::Cell;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
    use std::sync::mpsc::{self, Receiver, Sender};
    use std::sync::{Arc, Condvar, Mutex, Weak};
    use std::thread::{self, JoinHandle};
    use std::time::{Duration, Instant};

    use log::{debug, error, info, trace};
    use rand::Rng;

    use phase2_core::device::device::{
        DEV_BUSY, DEV_ERROR, DEV_READY, DISK_SECTOR_SIZE, DISK_TRACK_SIZE, DISK_UNITS, DeviceKind, DeviceLayer,
        DiskOp, Mode,
    };
    use phase2_core::error::error::{SysError, SysResult};

    use crate::config::config::MachineConfig;

    thread_local! {
        // every process runs on its own thread, so this is the process's mode bit
        static MODE: Cell<Mode> = const { Cell::new(Mode::Kernel) };
    }

    struct LineState {
        pending: VecDeque<i64>,
        aborted: bool,
    }

    /// Interrupts raised on one device unit, counted until a driver takes
    /// them. A coalescing line keeps only the latest status.
    pub struct InterruptLine {
        state: Mutex<LineState>,
        signal: Condvar,
        coalesce: bool,
    }

    impl InterruptLine {
        fn new(coalesce: bool) -> InterruptLine {
            InterruptLine {
                state: Mutex::new(LineState {
                    pending: VecDeque::new(),
                    aborted: false,
                }),
                signal: Condvar::new(),
                coalesce,
            }
        }

        fn raise(&self, status: i64) {
            let mut state = self.state.lock().unwrap();
            if self.coalesce {
                state.pending.clear();
            }
            state.pending.push_back(status);
            self.signal.notify_one();
        }

        fn abort(&self) {
            let mut state = self.state.lock().unwrap();
            state.aborted = true;
            self.signal.notify_all();
        }

        fn wait(&self) -> SysResult<i64> {
            let mut state = self.state.lock().unwrap();
            loop {
                if state.aborted {
                    return Err(SysError::WaitAborted);
                }
                if let Some(status) = state.pending.pop_front() {
                    return Ok(status);
                }
                state = self.signal.wait(state).unwrap();
            }
        }
    }

    struct Media {
        tracks: usize,
        head: usize,
        busy: bool,
        data: Vec<u8>,
    }

    impl Media {
        fn sector_range(&self, sector: usize) -> Option<std::ops::Range<usize>> {
            if sector >= DISK_TRACK_SIZE || self.head >= self.tracks {
                return None;
            }
            let start = (self.head * DISK_TRACK_SIZE + sector) * DISK_SECTOR_SIZE;
            Some(start..start + DISK_SECTOR_SIZE)
        }

        fn perform(&mut self, op: DiskOp) -> i64 {
            match op {
                DiskOp::Seek { track } => {
                    if track >= self.tracks {
                        return DEV_ERROR;
                    }
                    self.head = track;
                    DEV_READY
                }
                DiskOp::Read { sector, buffer, offset } => {
                    let Some(range) = self.sector_range(sector) else {
                        return DEV_ERROR;
                    };
                    let mut buffer = buffer.lock().unwrap();
                    match buffer.get_mut(offset..offset + DISK_SECTOR_SIZE) {
                        Some(dst) => {
                            dst.copy_from_slice(&self.data[range]);
                            DEV_READY
                        }
                        None => DEV_ERROR,
                    }
                }
                DiskOp::Write { sector, buffer, offset } => {
                    let Some(range) = self.sector_range(sector) else {
                        return DEV_ERROR;
                    };
                    let buffer = buffer.lock().unwrap();
                    match buffer.get(offset..offset + DISK_SECTOR_SIZE) {
                        Some(src) => {
                            self.data[range].copy_from_slice(src);
                            DEV_READY
                        }
                        None => DEV_ERROR,
                    }
                }
                DiskOp::Tracks { tracks } => {
                    tracks.store(self.tracks, Ordering::Release);
                    DEV_READY
                }
            }
        }
    }

    /// One disk unit: its platters, its interrupt line and the worker
    /// thread that carries out operations.
    struct DiskDevice {
        unit: usize,
        media: Mutex<Media>,
        line: InterruptLine,
        ops: Mutex<Option<Sender<DiskOp>>>,
        held: Mutex<bool>,
        released: Condvar,
        issued: AtomicU64,
        fail_next: AtomicBool,
        refuse_next: AtomicBool,
    }

    impl DiskDevice {
        fn new(unit: usize, tracks: usize) -> DiskDevice {
            DiskDevice {
                unit,
                media: Mutex::new(Media {
                    tracks,
                    head: 0,
                    busy: false,
                    data: vec![0; tracks * DISK_TRACK_SIZE * DISK_SECTOR_SIZE],
                }),
                line: InterruptLine::new(false),
                ops: Mutex::new(None),
                held: Mutex::new(false),
                released: Condvar::new(),
                issued: AtomicU64::new(0),
                fail_next: AtomicBool::new(false),
                refuse_next: AtomicBool::new(false),
            }
        }

        fn run(&self, ops: Receiver<DiskOp>, latency_us: (u64, u64), powered: &AtomicBool) {
            for op in ops {
                let (min, max) = latency_us;
                let delay = rand::rng().random_range(min..=max);
                if delay > 0 {
                    thread::sleep(Duration::from_micros(delay));
                }

                let status = {
                    let mut media = self.media.lock().unwrap();
                    let status = if self.fail_next.swap(false, Ordering::AcqRel) {
                        DEV_ERROR
                    } else {
                        media.perform(op)
                    };
                    media.busy = false;
                    status
                };

                // a held unit finishes its work but keeps the interrupt back
                let mut held = self.held.lock().unwrap();
                while *held && powered.load(Ordering::Acquire) {
                    held = self.released.wait(held).unwrap();
                }
                drop(held);
                trace!("disk{}: operation done, status {status}", self.unit);
                self.line.raise(status);
            }
        }
    }

    /// The hosted machine: a microsecond clock that interrupts every tick
    /// and two disk units, each with its own interrupt line.
    pub struct Machine {
        config: MachineConfig,
        now: AtomicI64,
        powered: Arc<AtomicBool>,
        clock_line: InterruptLine,
        disks: Vec<Arc<DiskDevice>>,
        threads: Mutex<Vec<JoinHandle<()>>>,
    }

    impl Machine {
        pub fn power_on(config: MachineConfig) -> Arc<Machine> {
            let machine = Arc::new(Machine {
                now: AtomicI64::new(0),
                powered: Arc::new(AtomicBool::new(true)),
                clock_line: InterruptLine::new(true),
                disks: (0..DISK_UNITS)
                    .map(|unit| Arc::new(DiskDevice::new(unit, config.disk_tracks[unit])))
                    .collect(),
                threads: Mutex::new(Vec::new()),
                config,
            });

            let mut threads = Vec::new();
            for disk in &machine.disks {
                let (tx, rx) = mpsc::channel();
                *disk.ops.lock().unwrap() = Some(tx);
                let worker = Arc::clone(disk);
                let powered = Arc::clone(&machine.powered);
                let latency = machine.config.disk_latency_us;
                let handle = thread::Builder::new()
                    .name(format!("disk{}", disk.unit))
                    .spawn(move || worker.run(rx, latency, &powered));
                match handle {
                    Ok(handle) => threads.push(handle),
                    Err(err) => error!("machine: disk{} worker did not start: {err}", disk.unit),
                }
            }

            let clock = Arc::downgrade(&machine);
            let tick = machine.config.tick;
            let handle = thread::Builder::new()
                .name("clock".to_string())
                .spawn(move || Machine::run_clock(clock, tick));
            match handle {
                Ok(handle) => threads.push(handle),
                Err(err) => error!("machine: clock did not start: {err}"),
            }
            *machine.threads.lock().unwrap() = threads;
            info!(
                "machine: powered on, {} disk units, tick {:?}",
                DISK_UNITS, machine.config.tick
            );
            machine
        }

        fn run_clock(machine: Weak<Machine>, tick: Duration) {
            let mut deadline = Instant::now() + tick;
            loop {
                thread::park_timeout(deadline.saturating_duration_since(Instant::now()));
                let Some(machine) = machine.upgrade() else {
                    break;
                };
                if !machine.powered.load(Ordering::Acquire) {
                    break;
                }
                if Instant::now() < deadline {
                    continue;
                }
                deadline += tick;
                let now = machine.now.fetch_add(machine.config.clock_us_per_tick, Ordering::AcqRel)
                    + machine.config.clock_us_per_tick;
                machine.clock_line.raise(now);
            }
        }

        /// Stop the clock and the disk workers. Idempotent.
        pub fn power_off(&self) {
            if !self.powered.swap(false, Ordering::AcqRel) {
                return;
            }
            for disk in &self.disks {
                disk.ops.lock().unwrap().take();
                let _held = disk.held.lock().unwrap();
                disk.released.notify_all();
            }
            let threads = std::mem::take(&mut *self.threads.lock().unwrap());
            let me = thread::current().id();
            for handle in threads {
                handle.thread().unpark();
                // the last handle to the machine may be dropped by its own clock
                if handle.thread().id() != me {
                    let _ = handle.join();
                }
            }
            debug!("machine: powered off");
        }

        pub fn config(&self) -> &MachineConfig {
            &self.config
        }

        /// Hold back (or release) completion interrupts of a disk unit.
        pub fn hold_disk(&self, unit: usize, held: bool) {
            let disk = &self.disks[unit];
            *disk.held.lock().unwrap() = held;
            disk.released.notify_all();
        }

        /// Complete the next operation on `unit` with an error status
        /// without touching the media.
        pub fn fail_next_op(&self, unit: usize) {
            self.disks[unit].fail_next.store(true, Ordering::Release);
        }

        /// Reject the next operation offered to `unit` as busy.
        pub fn refuse_next_op(&self, unit: usize) {
            self.disks[unit].refuse_next.store(true, Ordering::Release);
        }

        /// operations accepted by a unit since power on.
        pub fn disk_ops(&self, unit: usize) -> u64 {
            self.disks[unit].issued.load(Ordering::Acquire)
        }

        /// raw copy of one sector, bypassing the driver.
        pub fn peek_sector(&self, unit: usize, track: usize, sector: usize) -> Vec<u8> {
            let media = self.disks[unit].media.lock().unwrap();
            let start = (track * DISK_TRACK_SIZE + sector) * DISK_SECTOR_SIZE;
            media.data[start..start + DISK_SECTOR_SIZE].to_vec()
        }

        fn disk(&self, unit: usize) -> SysResult<&Arc<DiskDevice>> {
            self.disks.get(unit).ok_or(SysError::InvalidUnit)
        }

        fn line(&self, kind: DeviceKind, unit: usize) -> SysResult<&InterruptLine> {
            match kind {
                DeviceKind::Clock if unit < kind.units() => Ok(&self.clock_line),
                DeviceKind::Disk => Ok(&self.disk(unit)?.line),
                DeviceKind::Clock => Err(SysError::InvalidUnit),
            }
        }
    }

    impl Drop for Machine {
        fn drop(&mut self) {
            self.power_off();
        }
    }

    impl DeviceLayer for Machine {
        fn device_output(&self, kind: DeviceKind, unit: usize, op: DiskOp) -> SysResult<()> {
            if kind != DeviceKind::Disk {
                return Err(SysError::InvalidDevice);
            }
            let disk = self.disk(unit)?;
            if disk.refuse_next.swap(false, Ordering::AcqRel) {
                return Err(SysError::DeviceBusy);
            }
            {
                let mut media = disk.media.lock().unwrap();
                if media.busy {
                    return Err(SysError::DeviceBusy);
                }
                media.busy = true;
            }
            let sent = match disk.ops.lock().unwrap().as_ref() {
                Some(ops) => ops.send(op).is_ok(),
                None => false,
            };
            if !sent {
                disk.media.lock().unwrap().busy = false;
                return Err(SysError::DeviceFailure);
            }
            disk.issued.fetch_add(1, Ordering::AcqRel);
            Ok(())
        }

        fn device_input(&self, kind: DeviceKind, unit: usize) -> SysResult<i64> {
            match kind {
                DeviceKind::Clock if unit < kind.units() => Ok(self.now.load(Ordering::Acquire)),
                DeviceKind::Clock => Err(SysError::InvalidUnit),
                DeviceKind::Disk => {
                    let busy = self.disk(unit)?.media.lock().unwrap().busy;
                    Ok(if busy { DEV_BUSY } else { DEV_READY })
                }
            }
        }

        fn wait_device(&self, kind: DeviceKind, unit: usize) -> SysResult<i64> {
            self.line(kind, unit)?.wait()
        }

        fn wakeup_device(&self, kind: DeviceKind, unit: usize, status: i64, abort: bool) -> SysResult<()> {
            let line = self.line(kind, unit)?;
            if abort {
                line.abort();
            } else {
                line.raise(status);
            }
            Ok(())
        }

        fn mode(&self) -> Mode {
            MODE.with(|mode| mode.get())
        }

        fn set_mode(&self, mode: Mode) {
            MODE.with(|cell| cell.set(mode));
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use phase2_core::device::device::sector_buffer;
        use std::sync::atomic::AtomicUsize;

        fn quiet() -> MachineConfig {
            MachineConfig {
                tick: Duration::from_secs(3600),
                disk_tracks: [2, 3],
                disk_latency_us: (0, 0),
                ..MachineConfig::default()
            }
        }

        #[test]
        fn interrupt_line_counts_and_aborts() {
            let line = InterruptLine::new(false);
            line.raise(1);
            line.raise(2);
            assert_eq!(line.wait(), Ok(1));
            assert_eq!(line.wait(), Ok(2));
            line.raise(3);
            line.abort();
            assert_eq!(line.wait(), Err(SysError::WaitAborted));
        }

        #[test]
        fn coalescing_line_keeps_latest() {
            let line = InterruptLine::new(true);
            line.raise(10);
            line.raise(20);
            assert_eq!(line.wait(), Ok(20));
        }

        #[test]
        fn disk_reports_tracks_and_round_trips_a_sector() {
            let machine = Machine::power_on(quiet());
            let tracks = Arc::new(AtomicUsize::new(0));
            machine
                .device_output(DeviceKind::Disk, 1, DiskOp::Tracks { tracks: Arc::clone(&tracks) })
                .unwrap();
            assert_eq!(machine.wait_device(DeviceKind::Disk, 1), Ok(DEV_READY));
            assert_eq!(tracks.load(Ordering::Acquire), 3);

            let buffer = sector_buffer(1);
            buffer.lock().unwrap().fill(0x5A);
            machine.device_output(DeviceKind::Disk, 0, DiskOp::Seek { track: 1 }).unwrap();
            assert_eq!(machine.wait_device(DeviceKind::Disk, 0), Ok(DEV_READY));
            machine
                .device_output(DeviceKind::Disk, 0, DiskOp::Write { sector: 3, buffer, offset: 0 })
                .unwrap();
            assert_eq!(machine.wait_device(DeviceKind::Disk, 0), Ok(DEV_READY));
            assert_eq!(machine.peek_sector(0, 1, 3), vec![0x5A; DISK_SECTOR_SIZE]);
            assert_eq!(machine.disk_ops(0), 2);
            machine.power_off();
        }

        #[test]
        fn injected_failures_leave_the_media_alone() {
            let machine = Machine::power_on(quiet());
            machine.refuse_next_op(1);
            assert_eq!(
                machine.device_output(DeviceKind::Disk, 1, DiskOp::Seek { track: 0 }),
                Err(SysError::DeviceBusy)
            );
            assert_eq!(machine.device_input(DeviceKind::Disk, 1), Ok(DEV_READY));

            machine.fail_next_op(1);
            let buffer = sector_buffer(1);
            buffer.lock().unwrap().fill(0x11);
            machine
                .device_output(DeviceKind::Disk, 1, DiskOp::Write { sector: 0, buffer, offset: 0 })
                .unwrap();
            assert_eq!(machine.wait_device(DeviceKind::Disk, 1), Ok(DEV_ERROR));
            assert_eq!(machine.peek_sector(1, 0, 0), vec![0; DISK_SECTOR_SIZE]);
            assert_eq!(machine.disk_ops(1), 1);
            machine.power_off();
        }

        #[test]
        fn bad_operations_complete_with_error_status() {
            let machine = Machine::power_on(quiet());
            machine.device_output(DeviceKind::Disk, 0, DiskOp::Seek { track: 2 }).unwrap();
            assert_eq!(machine.wait_device(DeviceKind::Disk, 0), Ok(DEV_ERROR));

            let short = Arc::new(Mutex::new(vec![0u8; 10]));
            machine
                .device_output(DeviceKind::Disk, 0, DiskOp::Read { sector: 0, buffer: short, offset: 0 })
                .unwrap();
            assert_eq!(machine.wait_device(DeviceKind::Disk, 0), Ok(DEV_ERROR));
            assert_eq!(
                machine.device_output(DeviceKind::Clock, 0, DiskOp::Seek { track: 0 }),
                Err(SysError::InvalidDevice)
            );
            assert_eq!(machine.device_input(DeviceKind::Disk, 2), Err(SysError::InvalidUnit));
        }
    }
}
