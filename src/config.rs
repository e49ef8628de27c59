//! Configuration constants
//!
//! The constants in this file are parsed from the memprobe configuration file (passed through
//! environment variables by the runner when building the library).

use config_helpers::{is_enabled_default_false, parse_str_list, parse_u8_or, str_list_len};

// ———————————————————————— Configuration Parameters ———————————————————————— //

/// The desired log level.
pub const LOG_LEVEL: Option<&'static str> = option_env!("MEMPROBE_LOG_LEVEL");

/// If colors in logs are enabled.
pub const LOG_COLOR: bool = is_enabled_default_false!("MEMPROBE_LOG_COLOR");

/// Log error
pub const LOG_ERROR: &[&str; str_list_len(option_env!("MEMPROBE_LOG_ERROR"))] =
    &parse_str_list(option_env!("MEMPROBE_LOG_ERROR"));

/// Log warn
pub const LOG_WARN: &[&str; str_list_len(option_env!("MEMPROBE_LOG_WARN"))] =
    &parse_str_list(option_env!("MEMPROBE_LOG_WARN"));

/// Log info
pub const LOG_INFO: &[&str; str_list_len(option_env!("MEMPROBE_LOG_INFO"))] =
    &parse_str_list(option_env!("MEMPROBE_LOG_INFO"));

/// Log debug
pub const LOG_DEBUG: &[&str; str_list_len(option_env!("MEMPROBE_LOG_DEBUG"))] =
    &parse_str_list(option_env!("MEMPROBE_LOG_DEBUG"));

/// Log trace
pub const LOG_TRACE: &[&str; str_list_len(option_env!("MEMPROBE_LOG_TRACE"))] =
    &parse_str_list(option_env!("MEMPROBE_LOG_TRACE"));

/// Initial verbosity of the probing diagnostics.
pub const VERBOSITY: u8 = parse_u8_or(option_env!("MEMPROBE_VERBOSITY"), 1);

// The board is selected by `MEMPROBE_PLATFORM_NAME`, see [crate::platform::Plat].
