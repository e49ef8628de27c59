use std::sync::atomic::{AtomicUsize, Ordering};

use log::{Level, LevelFilter, Metadata, Record, SetLoggerError};

/// The runner logger, printing to the terminal.
pub struct RunnerLogger {
    /// The maximum level, as a `LevelFilter` discriminant.
    level: AtomicUsize,
}

static LOGGER: RunnerLogger = RunnerLogger {
    level: AtomicUsize::new(LevelFilter::Info as usize),
};

impl RunnerLogger {
    pub fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
        LOGGER.level.store(level as usize, Ordering::Relaxed);
        log::set_logger(&LOGGER)?;
        log::set_max_level(level);
        Ok(())
    }
}

impl log::Log for RunnerLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() as usize <= self.level.load(Ordering::Relaxed)
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        match record.level() {
            Level::Error => eprintln!("\x1b[31m{}\x1b[0m", record.args()),
            Level::Warn => println!("\x1b[33m{}\x1b[0m", record.args()),
            Level::Info => println!("{}", record.args()),
            Level::Debug | Level::Trace => println!("\x1b[2m{}\x1b[0m", record.args()),
        }
    }

    fn flush(&self) {}
}
