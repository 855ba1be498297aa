use std::sync::{Arc, Mutex};

use phase2::config::config::MachineConfig;
use phase2::system::system::System;
use phase2_core::clock::clock::MICROS_PER_SECOND;
use phase2_core::error::error::SysError;
use phase2_core::libuser::libuser::*;
use phase2_core::proc::proc::MIN_STACK;

fn system() -> System {
    System::new(MachineConfig::fast())
}

#[test]
fn sleep_lasts_at_least_the_requested_time() {
    let system = system();
    let status = system.run(|kernel| {
        let before = sys_get_time_of_day(&kernel);
        sys_sleep(&kernel, 1).unwrap();
        let after = sys_get_time_of_day(&kernel);
        assert!(after - before >= MICROS_PER_SECOND, "woke after {}us", after - before);
        assert_eq!(kernel.armed_sleepers(), 0);
        0
    });
    assert_eq!(status, 0);
    assert_eq!(system.phase1.live_semaphores(), 0);
}

#[test]
fn zero_seconds_returns_on_the_next_tick() {
    let system = system();
    let status = system.run(|kernel| sys_sleep(&kernel, 0).map_or(1, |_| 0));
    assert_eq!(status, 0);
}

#[test]
fn negative_seconds_are_rejected() {
    let system = system();
    let status = system.run(|kernel| {
        assert_eq!(sys_sleep(&kernel, -1), Err(SysError::InvalidSeconds));
        assert_eq!(kernel.armed_sleepers(), 0);
        0
    });
    assert_eq!(status, 0);
}

#[test]
fn shorter_sleeper_wakes_first() {
    let system = system();
    let woke = Arc::new(Mutex::new(Vec::new()));
    let order = Arc::clone(&woke);
    let status = system.run(move |kernel| {
        for (name, seconds) in [("long", 3), ("short", 1)] {
            let sleeper = Arc::clone(&kernel);
            let order = Arc::clone(&order);
            sys_spawn(
                &kernel,
                name,
                move || {
                    if sys_sleep(&sleeper, seconds).is_err() {
                        return 1;
                    }
                    order.lock().unwrap().push(name);
                    0
                },
                MIN_STACK,
                3,
            )
            .unwrap();
        }
        for _ in 0..2 {
            assert_eq!(sys_wait(&kernel).map(|(_, status)| status), Ok(0));
        }
        0
    });
    assert_eq!(status, 0);
    assert_eq!(*woke.lock().unwrap(), vec!["short", "long"]);
}

#[test]
fn many_sleepers_all_wake() {
    let system = system();
    let status = system.run(|kernel| {
        for index in 0..8 {
            let sleeper = Arc::clone(&kernel);
            sys_spawn(
                &kernel,
                &format!("sleeper{index}"),
                move || sys_sleep(&sleeper, index % 2).map_or(1, |_| 0),
                MIN_STACK,
                4,
            )
            .unwrap();
        }
        let mut reaped = 0;
        while let Ok((_, status)) = sys_wait(&kernel) {
            assert_eq!(status, 0);
            reaped += 1;
        }
        reaped
    });
    assert_eq!(status, 8);
}
