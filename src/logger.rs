//! Structured logging implementation

use core::sync::atomic::{AtomicBool, Ordering};

use log::{Level, LevelFilter, Metadata, Record};

use crate::config;
use crate::platform::{Plat, Platform};

// ————————————————————————————————— Logger ————————————————————————————————— //

pub struct Logger {}

static LOGGER: Logger = Logger {};

impl Logger {
    const GLOBAL_LOG_LEVEL: LevelFilter = match config::LOG_LEVEL {
        Some(s) => match s.as_bytes() {
            b"trace" => LevelFilter::Trace,
            b"debug" => LevelFilter::Debug,
            b"info" => LevelFilter::Info,
            b"warn" => LevelFilter::Warn,
            b"error" => LevelFilter::Error,
            b"off" => LevelFilter::Off,
            _ => LevelFilter::Warn,
        },
        _ => LevelFilter::Warn,
    };

    fn contains_target(log_modules: &[&str], target: &str) -> bool {
        log_modules.iter().any(|module| *module == target)
    }

    fn filter_by_module(&self, record: &Record) -> bool {
        let level = record.metadata().level();
        let target = record.target();

        (level <= LevelFilter::Trace && Self::contains_target(config::LOG_TRACE, target))
            || (level <= LevelFilter::Debug && Self::contains_target(config::LOG_DEBUG, target))
            || (level <= LevelFilter::Info && Self::contains_target(config::LOG_INFO, target))
            || (level <= LevelFilter::Warn && Self::contains_target(config::LOG_WARN, target))
            || (level <= LevelFilter::Error && Self::contains_target(config::LOG_ERROR, target))
    }

    fn filter_by_global_level(&self, record: &Record) -> bool {
        Self::GLOBAL_LOG_LEVEL >= record.metadata().level()
    }
}

impl log::Log for Logger {
    fn enabled(&self, _: &Metadata) -> bool {
        // Every record reaches `log`, filtering happens there
        true
    }

    fn log(&self, record: &Record) {
        if self.filter_by_global_level(record) || self.filter_by_module(record) {
            Plat::debug_print(
                record.level(),
                format_args!(
                    "[{} | {}] {}\n",
                    level_display(record.level()),
                    record.target(),
                    record.args()
                ),
            )
        }
    }

    fn flush(&self) {}
}

/// Install the logger, subsequent calls are no-ops.
pub fn init() {
    static IS_INITIALIZED: AtomicBool = AtomicBool::new(false);

    if IS_INITIALIZED
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return;
    }

    // Another logger might have been installed by the application, we leave it in charge.
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(LevelFilter::Trace);
    }
}

// ————————————————————————————————— Utils —————————————————————————————————— //

fn level_display(level: Level) -> &'static str {
    if config::LOG_COLOR {
        // We log with colors, using ANSI escape sequences
        match level {
            Level::Error => "\x1b[31;1mError\x1b[0m",
            Level::Warn => "\x1b[33;1mWarn\x1b[0m ",
            Level::Info => "\x1b[32;1mInfo\x1b[0m ",
            Level::Debug => "\x1b[34;1mDebug\x1b[0m",
            Level::Trace => "\x1b[35;1mTrace\x1b[0m",
        }
    } else {
        match level {
            Level::Error => "Error",
            Level::Warn => "Warn ",
            Level::Info => "Info ",
            Level::Debug => "Debug",
            Level::Trace => "Trace",
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::logger::Logger;

    #[test]
    fn test_in_list() {
        assert!(Logger::contains_target(&["memprobe::probe"], "memprobe::probe"));
        assert!(!Logger::contains_target(&["memprobe::probe"], "memprobe::dispatch"));
        assert!(!Logger::contains_target(&[], "memprobe"));
        assert!(!Logger::contains_target(&["memprobe"], "memprobe::probe"));
        assert!(Logger::contains_target(
            &["memprobe::arch", "memprobe::handlers", "memprobe::dispatch"],
            "memprobe::dispatch"
        ));
    }

    #[test]
    fn init_twice() {
        super::init();
        super::init();
        log::debug!("logger initialized");
    }
}
