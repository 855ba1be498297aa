pub mod config {
    use std::io::{Error, ErrorKind};
    use std::time::Duration;

    use phase2_core::device::device::DISK_UNITS;

    /// Knobs of the hosted machine. Defaults run the clock in real time;
    /// `fast` compresses it for tests.
    #[derive(Clone, Debug, PartialEq, Eq)]
    pub struct MachineConfig {
        /// real time between clock interrupts.
        pub tick: Duration,
        /// device time added by each clock interrupt.
        pub clock_us_per_tick: i64,
        pub disk_tracks: [usize; DISK_UNITS],
        /// inclusive range of real microseconds each disk operation takes.
        pub disk_latency_us: (u64, u64),
    }

    impl Default for MachineConfig {
        fn default() -> MachineConfig {
            MachineConfig {
                tick: Duration::from_millis(20),
                clock_us_per_tick: 20_000,
                disk_tracks: [16; DISK_UNITS],
                disk_latency_us: (0, 200),
            }
        }
    }

    impl MachineConfig {
        /// 1ms of real time per 20ms of device time.
        pub fn fast() -> MachineConfig {
            MachineConfig {
                tick: Duration::from_millis(1),
                disk_latency_us: (0, 50),
                ..MachineConfig::default()
            }
        }

        /// defaults overridden by P2_TICK_MS, P2_DISK_TRACKS and
        /// P2_DISK_LATENCY_US (`min-max`).
        pub fn from_env() -> Result<MachineConfig, Error> {
            let mut config = MachineConfig::default();
            if let Ok(value) = std::env::var("P2_TICK_MS") {
                let millis = parse_u64("P2_TICK_MS", &value)?;
                if millis == 0 {
                    return Err(Error::new(ErrorKind::InvalidInput, "P2_TICK_MS must be > 0"));
                }
                config.tick = Duration::from_millis(millis);
            }
            if let Ok(value) = std::env::var("P2_DISK_TRACKS") {
                let tracks = parse_u64("P2_DISK_TRACKS", &value)? as usize;
                config.disk_tracks = [tracks; DISK_UNITS];
            }
            if let Ok(value) = std::env::var("P2_DISK_LATENCY_US") {
                config.disk_latency_us = parse_range("P2_DISK_LATENCY_US", &value)?;
            }
            Ok(config)
        }
    }

    fn parse_u64(key: &str, value: &str) -> Result<u64, Error> {
        value
            .trim()
            .parse()
            .map_err(|_| Error::new(ErrorKind::InvalidInput, format!("{key}: not a number: {value:?}")))
    }

    pub(crate) fn parse_range(key: &str, value: &str) -> Result<(u64, u64), Error> {
        let (min, max) = match value.split_once('-') {
            Some((min, max)) => (parse_u64(key, min)?, parse_u64(key, max)?),
            None => {
                let fixed = parse_u64(key, value)?;
                (fixed, fixed)
            }
        };
        if min > max {
            return Err(Error::new(ErrorKind::InvalidInput, format!("{key}: empty range {value:?}")));
        }
        Ok((min, max))
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn latency_ranges_parse() {
            assert_eq!(parse_range("k", "10-20").unwrap(), (10, 20));
            assert_eq!(parse_range("k", " 5 ").unwrap(), (5, 5));
            assert!(parse_range("k", "20-10").is_err());
            assert!(parse_range("k", "a-b").is_err());
        }

        #[test]
        fn fast_keeps_device_time_per_tick() {
            let fast = MachineConfig::fast();
            assert_eq!(fast.clock_us_per_tick, MachineConfig::default().clock_us_per_tick);
            assert!(fast.tick < MachineConfig::default().tick);
        }
    }
}
