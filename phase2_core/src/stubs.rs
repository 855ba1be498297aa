pub mod stubs {
    //! Argument-block adapters. Each stub unpacks the words it needs, calls
    //! the kernel operation and packs results back; the status code always
    //! goes into `arg4`.

    use std::sync::Arc;

    use crate::device::device::{DeviceKind, DeviceLayer};
    use crate::error::error::{SysError, SysResult, status_code};
    use crate::kernel::kernel::Phase2;
    use crate::proc::proc::ProcessLayer;
    use crate::syscall::syscall::*;

    type Kernel<P, D> = Arc<Phase2<P, D>>;

    fn put_status<T>(args: &mut Sysargs, result: &SysResult<T>) {
        args.arg4 = SysArg::Int(status_code(result) as i64);
    }

    fn int_arg<T: TryFrom<i64>>(arg: &SysArg, fallback: T) -> T {
        T::try_from(arg.int()).unwrap_or(fallback)
    }

    /// Phase 2a calls: spawn, wait, terminate, pid, process info, time.
    pub fn install_process_calls<P: ProcessLayer, D: DeviceLayer>(kernel: &Kernel<P, D>) -> SysResult<()> {
        kernel.set_syscall_handler(SYS_SPAWN, spawn_stub::<P, D>)?;
        kernel.set_syscall_handler(SYS_WAIT, wait_stub::<P, D>)?;
        kernel.set_syscall_handler(SYS_TERMINATE, terminate_stub::<P, D>)?;
        kernel.set_syscall_handler(SYS_GETPID, get_pid_stub::<P, D>)?;
        kernel.set_syscall_handler(SYS_GETPROCINFO, proc_info_stub::<P, D>)?;
        kernel.set_syscall_handler(SYS_GETTIMEOFDAY, time_of_day_stub::<P, D>)?;
        Ok(())
    }

    pub fn install_semaphore_calls<P: ProcessLayer, D: DeviceLayer>(kernel: &Kernel<P, D>) -> SysResult<()> {
        kernel.set_syscall_handler(SYS_SEMCREATE, sem_create_stub::<P, D>)?;
        kernel.set_syscall_handler(SYS_SEMP, sem_p_stub::<P, D>)?;
        kernel.set_syscall_handler(SYS_SEMV, sem_v_stub::<P, D>)?;
        kernel.set_syscall_handler(SYS_SEMFREE, sem_free_stub::<P, D>)?;
        kernel.set_syscall_handler(SYS_SEMNAME, sem_name_stub::<P, D>)?;
        Ok(())
    }

    // arg1 entry, arg3 stack size, arg4 priority, arg5 name -> arg1 pid
    pub fn spawn_stub<P: ProcessLayer, D: DeviceLayer>(kernel: &Kernel<P, D>, args: &mut Sysargs) {
        let entry = args.arg1.take_entry();
        let stack_size = int_arg(&args.arg3, 0usize);
        let priority = int_arg(&args.arg4, 0u32);
        let name = args.arg5.take_text().unwrap_or_default();
        let result = match entry {
            Some(entry) => kernel.spawn(&name, entry, stack_size, priority),
            None => Err(SysError::NullAddress),
        };
        if let Ok(pid) = result {
            args.arg1 = SysArg::Int(pid as i64);
        }
        put_status(args, &result);
    }

    // -> arg1 pid, arg2 status
    pub fn wait_stub<P: ProcessLayer, D: DeviceLayer>(kernel: &Kernel<P, D>, args: &mut Sysargs) {
        let result = kernel.wait();
        if let Ok((pid, status)) = result {
            args.arg1 = SysArg::Int(pid as i64);
            args.arg2 = SysArg::Int(status as i64);
        }
        put_status(args, &result);
    }

    pub fn terminate_stub<P: ProcessLayer, D: DeviceLayer>(kernel: &Kernel<P, D>, args: &mut Sysargs) {
        kernel.terminate(int_arg(&args.arg1, 0i32))
    }

    pub fn get_pid_stub<P: ProcessLayer, D: DeviceLayer>(kernel: &Kernel<P, D>, args: &mut Sysargs) {
        let pid = kernel.procs().current_pid().map(|pid| pid as i64).unwrap_or(-1);
        args.arg1 = SysArg::Int(pid);
    }

    // arg1 pid -> arg2 info
    pub fn proc_info_stub<P: ProcessLayer, D: DeviceLayer>(kernel: &Kernel<P, D>, args: &mut Sysargs) {
        let result = usize::try_from(args.arg1.int())
            .map_err(|_| SysError::InvalidPid)
            .and_then(|pid| kernel.procs().proc_info(pid));
        put_status(args, &result);
        if let Ok(info) = result {
            args.arg2 = SysArg::Info(Box::new(info));
        }
    }

    pub fn time_of_day_stub<P: ProcessLayer, D: DeviceLayer>(kernel: &Kernel<P, D>, args: &mut Sysargs) {
        let result = kernel.devices().device_input(DeviceKind::Clock, 0);
        if let Ok(now) = result {
            args.arg1 = SysArg::Int(now);
        }
        put_status(args, &result);
    }

    // arg1 seconds; a value outside i32 becomes -1 and reports InvalidSeconds
    pub fn sleep_stub<P: ProcessLayer, D: DeviceLayer>(kernel: &Kernel<P, D>, args: &mut Sysargs) {
        let seconds = int_arg(&args.arg1, -1i32);
        let result = kernel.sleep(seconds);
        put_status(args, &result);
    }

    // arg1 buffer, arg2 sectors, arg3 track, arg4 first, arg5 unit
    pub fn disk_read_stub<P: ProcessLayer, D: DeviceLayer>(kernel: &Kernel<P, D>, args: &mut Sysargs) {
        let buffer = args.arg1.take_buffer();
        let result = kernel.disk_read(args.arg5.int(), args.arg3.int(), args.arg4.int(), args.arg2.int(), buffer);
        put_status(args, &result);
    }

    pub fn disk_write_stub<P: ProcessLayer, D: DeviceLayer>(kernel: &Kernel<P, D>, args: &mut Sysargs) {
        let buffer = args.arg1.take_buffer();
        let result = kernel.disk_write(args.arg5.int(), args.arg3.int(), args.arg4.int(), args.arg2.int(), buffer);
        put_status(args, &result);
    }

    // arg1 unit -> arg1 sector bytes, arg2 track sectors, arg3 tracks
    pub fn disk_size_stub<P: ProcessLayer, D: DeviceLayer>(kernel: &Kernel<P, D>, args: &mut Sysargs) {
        let result = kernel.disk_size(args.arg1.int());
        if let Ok(geometry) = result {
            args.arg1 = SysArg::Int(geometry.sector_bytes as i64);
            args.arg2 = SysArg::Int(geometry.track_sectors as i64);
            args.arg3 = SysArg::Int(geometry.tracks as i64);
        }
        put_status(args, &result);
    }

    // arg1 initial value, arg2 name -> arg1 sid
    pub fn sem_create_stub<P: ProcessLayer, D: DeviceLayer>(kernel: &Kernel<P, D>, args: &mut Sysargs) {
        let value = int_arg(&args.arg1, 0u32);
        let name = args.arg2.take_text().unwrap_or_default();
        let result = kernel.procs().sem_create(&name, value);
        if let Ok(sid) = result {
            args.arg1 = SysArg::Int(sid as i64);
        }
        put_status(args, &result);
    }

    fn sid_arg(args: &Sysargs) -> SysResult<usize> {
        usize::try_from(args.arg1.int()).map_err(|_| SysError::InvalidSid)
    }

    pub fn sem_p_stub<P: ProcessLayer, D: DeviceLayer>(kernel: &Kernel<P, D>, args: &mut Sysargs) {
        let result = sid_arg(args).and_then(|sid| kernel.procs().p(sid));
        put_status(args, &result);
    }

    pub fn sem_v_stub<P: ProcessLayer, D: DeviceLayer>(kernel: &Kernel<P, D>, args: &mut Sysargs) {
        let result = sid_arg(args).and_then(|sid| kernel.procs().v(sid));
        put_status(args, &result);
    }

    pub fn sem_free_stub<P: ProcessLayer, D: DeviceLayer>(kernel: &Kernel<P, D>, args: &mut Sysargs) {
        let result = sid_arg(args).and_then(|sid| kernel.procs().sem_free(sid));
        put_status(args, &result);
    }

    // arg1 sid -> arg2 name
    pub fn sem_name_stub<P: ProcessLayer, D: DeviceLayer>(kernel: &Kernel<P, D>, args: &mut Sysargs) {
        let result = sid_arg(args).and_then(|sid| kernel.procs().sem_name(sid));
        put_status(args, &result);
        if let Ok(name) = result {
            args.arg2 = SysArg::Text(name);
        }
    }
}
