pub mod logger {
    use std::io::Write;
    use std::str::FromStr;

    use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError};

    const P_ERROR: &str = "\x1b[1;31m[ERRO]\x1b[0m ";
    const P_WARN: &str = "\x1b[1;33m[WARN]\x1b[0m ";
    const P_INFO: &str = "\x1b[32m[INFO]\x1b[0m ";
    const P_DEBUG: &str = "\x1b[36m[DEBG]\x1b[0m ";
    const P_TRACE: &str = "\x1b[35m[TRAC]\x1b[0m ";

    struct ConsoleLogger;

    static LOGGER: ConsoleLogger = ConsoleLogger;

    fn prefix(level: Level) -> &'static str {
        match level {
            Level::Error => P_ERROR,
            Level::Warn => P_WARN,
            Level::Info => P_INFO,
            Level::Debug => P_DEBUG,
            Level::Trace => P_TRACE,
        }
    }

    impl Log for ConsoleLogger {
        fn enabled(&self, metadata: &Metadata) -> bool {
            metadata.level() <= log::max_level()
        }

        fn log(&self, record: &Record) {
            if !self.enabled(record.metadata()) {
                return;
            }
            let thread = std::thread::current();
            let name = thread.name().unwrap_or("host");
            let mut err = std::io::stderr().lock();
            let _ = writeln!(err, "{}{name}: {}", prefix(record.level()), record.args());
        }

        fn flush(&self) {
            let _ = std::io::stderr().flush();
        }
    }

    /// level from P2_LOG (error..trace, or off), default info.
    pub fn level_from_env() -> LevelFilter {
        std::env::var("P2_LOG")
            .ok()
            .and_then(|value| LevelFilter::from_str(value.trim()).ok())
            .unwrap_or(LevelFilter::Info)
    }

    /// Install the console logger. Fails if a logger is already set.
    pub fn init() -> Result<(), SetLoggerError> {
        log::set_logger(&LOGGER)?;
        log::set_max_level(level_from_env());
        Ok(())
    }
}
