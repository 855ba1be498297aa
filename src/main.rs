use std::process::ExitCode;

use log::{error, info};

use phase2::config::config::MachineConfig;
use phase2::logger::logger;
use phase2::system::system::System;
use phase2_core::device::device::{DISK_SECTOR_SIZE, sector_buffer};
use phase2_core::libuser::libuser::*;

const MSG1: &[u8] = b"This is a test.";
const MSG2: &[u8] = b"Does it work?";

fn main() -> ExitCode {
    if let Err(err) = logger::init() {
        eprintln!("logger: {err}");
    }
    let config = match MachineConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!("config: {err}");
            return ExitCode::FAILURE;
        }
    };

    let system = System::new(config);
    let status = system.run(|kernel| {
        let pid = sys_get_pid(&kernel);
        info!("P3_Startup is process {pid}");

        let out = sector_buffer(2);
        {
            let mut out = out.lock().unwrap();
            out[..MSG1.len()].copy_from_slice(MSG1);
            out[DISK_SECTOR_SIZE..DISK_SECTOR_SIZE + MSG2.len()].copy_from_slice(MSG2);
        }
        if let Err(err) = sys_disk_write(&kernel, Some(&out), 2, 0, 0, 0) {
            error!("write failed: {err}");
            return 1;
        }

        let back = sector_buffer(2);
        if let Err(err) = sys_disk_read(&kernel, Some(&back), 2, 0, 0, 0) {
            error!("read failed: {err}");
            return 1;
        }
        let back = back.lock().unwrap();
        println!("sector 0: {}", String::from_utf8_lossy(&back[..MSG1.len()]));
        println!("sector 1: {}", String::from_utf8_lossy(&back[DISK_SECTOR_SIZE..DISK_SECTOR_SIZE + MSG2.len()]));

        let before = sys_get_time_of_day(&kernel);
        if let Err(err) = sys_sleep(&kernel, 1) {
            error!("sleep failed: {err}");
            return 1;
        }
        println!("slept {}us", sys_get_time_of_day(&kernel) - before);

        match sys_disk_size(&kernel, 0) {
            Ok(geometry) => println!("disk0: {geometry:?}"),
            Err(err) => error!("disk size failed: {err}"),
        }
        0
    });

    let report = system.report();
    info!("shutdown: {report:?}");
    if status == 0 { ExitCode::SUCCESS } else { ExitCode::FAILURE }
}
