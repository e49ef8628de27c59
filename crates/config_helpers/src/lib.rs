//! Compile-time configuration helpers
//!
//! The configuration is passed to the library as environment variables at build time, and read
//! with `option_env!`. Everything here is `const` so that configuration values can be used to
//! size arrays and select code paths without any runtime cost.

#![cfg_attr(not(test), no_std)]

// ———————————————————————————————— Booleans ———————————————————————————————— //

/// Check if a boolean option is enabled, defaulting to no.
#[macro_export]
macro_rules! is_enabled_default_false {
    ($env_var: tt) => {
        match option_env!($env_var) {
            Some(env_var) => matches!(env_var.as_bytes(), b"true" | b"1"),
            None => false,
        }
    };
}

// ———————————————————————————————— Integers ———————————————————————————————— //

pub const fn parse_u8_or(env_var: Option<&str>, default: u8) -> u8 {
    match env_var {
        Some(value) => match u8::from_str_radix(value, 10) {
            Ok(value) => value,
            Err(_) => panic!("Failed to parse u8 from configuration"),
        },
        None => default,
    }
}

// ————————————————————————————————— Strings ———————————————————————————————— //

/// Split a string of comma (",") separated values into a list of strings slices.
///
/// `LEN` must be the value returned by [str_list_len] for the same input.
pub const fn parse_str_list<const LEN: usize>(env_var: Option<&str>) -> [&str; LEN] {
    let mut res: [&str; LEN] = [""; LEN];
    let bytes = match env_var {
        Some(var) => var.as_bytes(),
        None => return res,
    };

    let mut start = 0;
    let mut i = 0;
    while i < LEN {
        let mut end = start;
        while end < bytes.len() && bytes[end] != b',' {
            end += 1;
        }

        // Range indexing is not const yet, but splitting is
        let (_, tail) = bytes.split_at(start);
        let (item, _) = tail.split_at(end - start);
        res[i] = match core::str::from_utf8(item) {
            Ok(item) => item,
            Err(_) => panic!("Invalid string list in configuration"),
        };

        start = end + 1;
        i += 1;
    }

    res
}

/// Returns the len of a list of comma (",") separated values.
pub const fn str_list_len(env_var: Option<&str>) -> usize {
    let bytes = match env_var {
        Some(var) => var.as_bytes(),
        None => return 0,
    };

    let mut len = 1;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b',' {
            len += 1;
        }
        i += 1;
    }
    len
}

// ————————————————————————————————— Tests —————————————————————————————————— //
