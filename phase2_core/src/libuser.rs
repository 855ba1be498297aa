pub mod libuser {
    //! User-side entry points. Each call fills an argument block, traps into
    //! the kernel and decodes the result words.

    use std::sync::Arc;

    use crate::device::device::{DeviceLayer, SectorBuffer};
    use crate::disk::disk::DiskGeometry;
    use crate::error::error::{SysResult, check_status};
    use crate::kernel::kernel::Phase2;
    use crate::proc::proc::{Pid, ProcInfo, ProcessLayer, SemId};
    use crate::syscall::syscall::*;

    fn trap<P: ProcessLayer, D: DeviceLayer>(kernel: &Arc<Phase2<P, D>>, mut args: Sysargs) -> Sysargs {
        kernel.syscall(&mut args);
        args
    }

    pub fn sys_spawn<P, D, F>(kernel: &Arc<Phase2<P, D>>, name: &str, entry: F, stack_size: usize, priority: u32) -> SysResult<Pid>
    where
        P: ProcessLayer,
        D: DeviceLayer,
        F: FnOnce() -> i32 + Send + 'static,
    {
        let mut args = Sysargs::new(SYS_SPAWN);
        args.arg1 = SysArg::Entry(Box::new(entry));
        args.arg3 = SysArg::Int(stack_size as i64);
        args.arg4 = SysArg::Int(priority as i64);
        args.arg5 = SysArg::Text(name.to_string());
        let args = trap(kernel, args);
        check_status(args.arg4.int())?;
        Ok(args.arg1.int() as Pid)
    }

    pub fn sys_wait<P: ProcessLayer, D: DeviceLayer>(kernel: &Arc<Phase2<P, D>>) -> SysResult<(Pid, i32)> {
        let args = trap(kernel, Sysargs::new(SYS_WAIT));
        check_status(args.arg4.int())?;
        Ok((args.arg1.int() as Pid, args.arg2.int() as i32))
    }

    pub fn sys_terminate<P: ProcessLayer, D: DeviceLayer>(kernel: &Arc<Phase2<P, D>>, status: i32) -> ! {
        let mut args = Sysargs::new(SYS_TERMINATE);
        args.arg1 = SysArg::Int(status as i64);
        trap(kernel, args);
        unreachable!("terminate returned to its caller")
    }

    pub fn sys_get_pid<P: ProcessLayer, D: DeviceLayer>(kernel: &Arc<Phase2<P, D>>) -> Pid {
        trap(kernel, Sysargs::new(SYS_GETPID)).arg1.int() as Pid
    }

    pub fn sys_get_proc_info<P: ProcessLayer, D: DeviceLayer>(kernel: &Arc<Phase2<P, D>>, pid: Pid) -> SysResult<ProcInfo> {
        let mut args = Sysargs::new(SYS_GETPROCINFO);
        args.arg1 = SysArg::Int(pid as i64);
        let mut args = trap(kernel, args);
        check_status(args.arg4.int())?;
        args.arg2.take_info().ok_or(crate::error::error::SysError::InvalidPid)
    }

    /// microseconds on the device clock.
    pub fn sys_get_time_of_day<P: ProcessLayer, D: DeviceLayer>(kernel: &Arc<Phase2<P, D>>) -> i64 {
        trap(kernel, Sysargs::new(SYS_GETTIMEOFDAY)).arg1.int()
    }

    pub fn sys_sleep<P: ProcessLayer, D: DeviceLayer>(kernel: &Arc<Phase2<P, D>>, seconds: i32) -> SysResult<()> {
        let mut args = Sysargs::new(SYS_SLEEP);
        args.arg1 = SysArg::Int(seconds as i64);
        check_status(trap(kernel, args).arg4.int())
    }

    fn disk_args(number: u32, buffer: Option<&SectorBuffer>, sectors: i32, track: i32, first: i32, unit: i32) -> Sysargs {
        let mut args = Sysargs::new(number);
        args.arg1 = match buffer {
            Some(buffer) => SysArg::Buffer(Arc::clone(buffer)),
            None => SysArg::None,
        };
        args.arg2 = SysArg::Int(sectors as i64);
        args.arg3 = SysArg::Int(track as i64);
        args.arg4 = SysArg::Int(first as i64);
        args.arg5 = SysArg::Int(unit as i64);
        args
    }

    pub fn sys_disk_read<P: ProcessLayer, D: DeviceLayer>(
        kernel: &Arc<Phase2<P, D>>,
        buffer: Option<&SectorBuffer>,
        sectors: i32,
        track: i32,
        first: i32,
        unit: i32,
    ) -> SysResult<()> {
        let args = disk_args(SYS_DISKREAD, buffer, sectors, track, first, unit);
        check_status(trap(kernel, args).arg4.int())
    }

    pub fn sys_disk_write<P: ProcessLayer, D: DeviceLayer>(
        kernel: &Arc<Phase2<P, D>>,
        buffer: Option<&SectorBuffer>,
        sectors: i32,
        track: i32,
        first: i32,
        unit: i32,
    ) -> SysResult<()> {
        let args = disk_args(SYS_DISKWRITE, buffer, sectors, track, first, unit);
        check_status(trap(kernel, args).arg4.int())
    }

    pub fn sys_disk_size<P: ProcessLayer, D: DeviceLayer>(kernel: &Arc<Phase2<P, D>>, unit: i32) -> SysResult<DiskGeometry> {
        let mut args = Sysargs::new(SYS_DISKSIZE);
        args.arg1 = SysArg::Int(unit as i64);
        let args = trap(kernel, args);
        check_status(args.arg4.int())?;
        Ok(DiskGeometry {
            sector_bytes: args.arg1.int() as usize,
            track_sectors: args.arg2.int() as usize,
            tracks: args.arg3.int() as usize,
        })
    }

    pub fn sys_sem_create<P: ProcessLayer, D: DeviceLayer>(kernel: &Arc<Phase2<P, D>>, name: &str, value: u32) -> SysResult<SemId> {
        let mut args = Sysargs::new(SYS_SEMCREATE);
        args.arg1 = SysArg::Int(value as i64);
        args.arg2 = SysArg::Text(name.to_string());
        let args = trap(kernel, args);
        check_status(args.arg4.int())?;
        Ok(args.arg1.int() as SemId)
    }

    fn sem_call<P: ProcessLayer, D: DeviceLayer>(kernel: &Arc<Phase2<P, D>>, number: u32, sid: SemId) -> Sysargs {
        let mut args = Sysargs::new(number);
        args.arg1 = SysArg::Int(sid as i64);
        trap(kernel, args)
    }

    pub fn sys_sem_p<P: ProcessLayer, D: DeviceLayer>(kernel: &Arc<Phase2<P, D>>, sid: SemId) -> SysResult<()> {
        check_status(sem_call(kernel, SYS_SEMP, sid).arg4.int())
    }

    pub fn sys_sem_v<P: ProcessLayer, D: DeviceLayer>(kernel: &Arc<Phase2<P, D>>, sid: SemId) -> SysResult<()> {
        check_status(sem_call(kernel, SYS_SEMV, sid).arg4.int())
    }

    pub fn sys_sem_free<P: ProcessLayer, D: DeviceLayer>(kernel: &Arc<Phase2<P, D>>, sid: SemId) -> SysResult<()> {
        check_status(sem_call(kernel, SYS_SEMFREE, sid).arg4.int())
    }

    pub fn sys_sem_name<P: ProcessLayer, D: DeviceLayer>(kernel: &Arc<Phase2<P, D>>, sid: SemId) -> SysResult<String> {
        let mut args = sem_call(kernel, SYS_SEMNAME, sid);
        check_status(args.arg4.int())?;
        Ok(args.arg2.take_text().unwrap_or_default())
    }
}
