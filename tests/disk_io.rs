use std::sync::Arc;
use std::thread;
use std::time::Duration;

use phase2::config::config::MachineConfig;
use phase2::system::system::System;
use phase2_core::device::device::{DISK_SECTOR_SIZE, SectorBuffer, sector_buffer};
use phase2_core::error::error::SysError;
use phase2_core::libuser::libuser::*;
use phase2_core::proc::proc::MIN_STACK;

const MSG1: &[u8] = b"This is a test.";
const MSG2: &[u8] = b"Does it work?";

fn system() -> System {
    System::new(MachineConfig::fast())
}

fn filled(sectors: usize, byte: u8) -> SectorBuffer {
    let buffer = sector_buffer(sectors);
    buffer.lock().unwrap().fill(byte);
    buffer
}

fn wait_until(mut done: impl FnMut() -> bool) -> bool {
    for _ in 0..5000 {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    false
}

#[test]
fn two_messages_survive_a_round_trip() {
    let system = system();
    let status = system.run(|kernel| {
        let out = sector_buffer(2);
        {
            let mut out = out.lock().unwrap();
            out[..MSG1.len()].copy_from_slice(MSG1);
            out[DISK_SECTOR_SIZE..DISK_SECTOR_SIZE + MSG2.len()].copy_from_slice(MSG2);
        }
        sys_disk_write(&kernel, Some(&out), 1, 0, 0, 0).unwrap();
        let second = sector_buffer(1);
        second.lock().unwrap().copy_from_slice(&out.lock().unwrap()[DISK_SECTOR_SIZE..]);
        sys_disk_write(&kernel, Some(&second), 1, 0, 1, 0).unwrap();

        let back = sector_buffer(2);
        sys_disk_read(&kernel, Some(&back), 2, 0, 0, 0).unwrap();
        let back = back.lock().unwrap();
        assert_eq!(&back[..MSG1.len()], MSG1);
        assert_eq!(&back[DISK_SECTOR_SIZE..DISK_SECTOR_SIZE + MSG2.len()], MSG2);
        0
    });
    assert_eq!(status, 0);
    assert_eq!(&system.machine.peek_sector(0, 0, 1)[..MSG2.len()], MSG2);
    assert_eq!(system.phase1.live_semaphores(), 0);
}

#[test]
fn later_sector_does_not_clobber_earlier_one() {
    let system = system();
    let status = system.run(|kernel| {
        sys_disk_write(&kernel, Some(&filled(1, b'A')), 1, 0, 0, 0).unwrap();
        sys_disk_write(&kernel, Some(&filled(1, b'B')), 1, 0, 1, 0).unwrap();

        let back = sector_buffer(1);
        sys_disk_read(&kernel, Some(&back), 1, 0, 1, 0).unwrap();
        assert_eq!(*back.lock().unwrap(), vec![b'B'; DISK_SECTOR_SIZE]);
        sys_disk_read(&kernel, Some(&back), 1, 0, 0, 0).unwrap();
        assert_eq!(*back.lock().unwrap(), vec![b'A'; DISK_SECTOR_SIZE]);
        0
    });
    assert_eq!(status, 0);
}

#[test]
fn runs_continue_onto_the_next_track() {
    let system = system();
    let status = system.run(|kernel| {
        let out = sector_buffer(3);
        {
            let mut out = out.lock().unwrap();
            for (index, sector) in out.chunks_mut(DISK_SECTOR_SIZE).enumerate() {
                sector.fill(b'a' + index as u8);
            }
        }
        sys_disk_write(&kernel, Some(&out), 3, 2, 15, 1).unwrap();

        let back = sector_buffer(3);
        sys_disk_read(&kernel, Some(&back), 3, 2, 15, 1).unwrap();
        assert_eq!(*back.lock().unwrap(), *out.lock().unwrap());
        0
    });
    assert_eq!(status, 0);
    assert_eq!(system.machine.peek_sector(1, 2, 15), vec![b'a'; DISK_SECTOR_SIZE]);
    assert_eq!(system.machine.peek_sector(1, 3, 0), vec![b'b'; DISK_SECTOR_SIZE]);
    assert_eq!(system.machine.peek_sector(1, 3, 1), vec![b'c'; DISK_SECTOR_SIZE]);
    // unit 0 is untouched
    assert_eq!(system.machine.peek_sector(0, 2, 15), vec![0; DISK_SECTOR_SIZE]);
}

#[test]
fn disk_size_reports_geometry() {
    let system = System::new(MachineConfig {
        disk_tracks: [16, 8],
        ..MachineConfig::fast()
    });
    let status = system.run(|kernel| {
        let unit0 = sys_disk_size(&kernel, 0).unwrap();
        assert_eq!((unit0.sector_bytes, unit0.track_sectors, unit0.tracks), (512, 16, 16));
        assert_eq!(sys_disk_size(&kernel, 1).unwrap().tracks, 8);
        assert_eq!(sys_disk_size(&kernel, 2), Err(SysError::InvalidUnit));
        assert_eq!(sys_disk_size(&kernel, -1), Err(SysError::InvalidUnit));
        0
    });
    assert_eq!(status, 0);
}

#[test]
fn rejected_requests_never_reach_the_device() {
    let system = system();
    let machine = Arc::clone(&system.machine);
    let status = system.run(move |kernel| {
        let ops = machine.disk_ops(0);
        let one = sector_buffer(1);
        let two = sector_buffer(2);
        let cases = [
            (sys_disk_write(&kernel, Some(&one), 1, 0, 0, 2), SysError::InvalidUnit),
            (sys_disk_read(&kernel, Some(&one), 1, 0, 0, -1), SysError::InvalidUnit),
            (sys_disk_write(&kernel, Some(&one), 1, -1, 0, 0), SysError::InvalidTrack),
            (sys_disk_read(&kernel, Some(&one), 1, 16, 0, 0), SysError::InvalidTrack),
            (sys_disk_write(&kernel, Some(&one), 1, 0, 16, 0), SysError::InvalidFirst),
            (sys_disk_read(&kernel, Some(&one), -1, 0, 0, 0), SysError::InvalidSectors),
            (sys_disk_read(&kernel, Some(&two), 2, 15, 15, 0), SysError::InvalidSectors),
            (sys_disk_write(&kernel, None, 1, 0, 0, 0), SysError::NullAddress),
            (sys_disk_write(&kernel, Some(&one), 2, 0, 0, 0), SysError::InvalidSectors),
        ];
        for (result, expected) in cases {
            assert_eq!(result, Err(expected));
        }
        assert_eq!(machine.disk_ops(0), ops);
        assert_eq!(kernel.pending_requests(0), 0);

        // an empty run is valid and issues nothing
        sys_disk_read(&kernel, Some(&one), 0, 3, 4, 0).unwrap();
        assert_eq!(machine.disk_ops(0), ops);
        0
    });
    assert_eq!(status, 0);
}

#[test]
fn requests_on_one_unit_are_served_in_arrival_order() {
    let system = system();
    let machine = Arc::clone(&system.machine);
    let status = system.run(move |kernel| {
        machine.hold_disk(0, true);

        let writer = Arc::clone(&kernel);
        sys_spawn(
            &kernel,
            "first_writer",
            move || sys_disk_write(&writer, Some(&filled(1, b'A')), 1, 5, 0, 0).map_or(1, |_| 0),
            MIN_STACK,
            3,
        )
        .unwrap();
        assert!(wait_until(|| kernel.pending_requests(0) == 1));

        let reader = Arc::clone(&kernel);
        sys_spawn(
            &kernel,
            "reader",
            move || {
                let back = sector_buffer(1);
                if sys_disk_read(&reader, Some(&back), 1, 5, 0, 0).is_err() {
                    return 1;
                }
                // the earlier write has landed
                let first = back.lock().unwrap()[0];
                first as i32
            },
            MIN_STACK,
            3,
        )
        .unwrap();
        assert!(wait_until(|| kernel.pending_requests(0) == 2));

        let last = Arc::clone(&kernel);
        sys_spawn(
            &kernel,
            "second_writer",
            move || sys_disk_write(&last, Some(&filled(1, b'C')), 1, 5, 0, 0).map_or(1, |_| 0),
            MIN_STACK,
            3,
        )
        .unwrap();
        assert!(wait_until(|| kernel.pending_requests(0) == 3));

        machine.hold_disk(0, false);
        let mut statuses = Vec::new();
        for _ in 0..3 {
            statuses.push(sys_wait(&kernel).unwrap().1);
        }
        statuses.sort();
        assert_eq!(statuses, vec![0, 0, b'A' as i32]);
        assert_eq!(machine.peek_sector(0, 5, 0), vec![b'C'; DISK_SECTOR_SIZE]);
        0
    });
    assert_eq!(status, 0);
}

#[test]
fn a_stalled_unit_does_not_hold_up_the_other() {
    let system = system();
    let machine = Arc::clone(&system.machine);
    let status = system.run(move |kernel| {
        machine.hold_disk(1, true);
        let stalled = Arc::clone(&kernel);
        sys_spawn(
            &kernel,
            "stalled",
            move || sys_disk_write(&stalled, Some(&filled(1, 7)), 1, 0, 0, 1).map_or(1, |_| 0),
            MIN_STACK,
            3,
        )
        .unwrap();
        assert!(wait_until(|| kernel.pending_requests(1) == 1));

        sys_disk_write(&kernel, Some(&filled(4, 9)), 4, 1, 0, 0).unwrap();
        assert_eq!(kernel.pending_requests(1), 1);

        machine.hold_disk(1, false);
        assert_eq!(sys_wait(&kernel).map(|(_, status)| status), Ok(0));
        assert_eq!(machine.peek_sector(1, 0, 0), vec![7; DISK_SECTOR_SIZE]);
        assert_eq!(machine.peek_sector(0, 1, 3), vec![9; DISK_SECTOR_SIZE]);
        0
    });
    assert_eq!(status, 0);
}

#[test]
fn failed_operation_reports_device_failure_and_the_driver_carries_on() {
    let system = system();
    let machine = Arc::clone(&system.machine);
    let status = system.run(move |kernel| {
        machine.fail_next_op(0);
        assert_eq!(
            sys_disk_write(&kernel, Some(&filled(1, b'X')), 1, 2, 0, 0),
            Err(SysError::DeviceFailure)
        );
        machine.refuse_next_op(0);
        assert_eq!(
            sys_disk_read(&kernel, Some(&sector_buffer(1)), 1, 2, 0, 0),
            Err(SysError::DeviceFailure)
        );

        sys_disk_write(&kernel, Some(&filled(1, b'Y')), 1, 2, 0, 0).unwrap();
        let back = sector_buffer(1);
        sys_disk_read(&kernel, Some(&back), 1, 2, 0, 0).unwrap();
        assert_eq!(*back.lock().unwrap(), vec![b'Y'; DISK_SECTOR_SIZE]);
        assert_eq!(kernel.pending_requests(0), 0);
        0
    });
    assert_eq!(status, 0);
    assert_eq!(system.phase1.live_semaphores(), 0);
}
