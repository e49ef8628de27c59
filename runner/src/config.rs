//! Memprobe configuration
//!
//! The configuration is read from a TOML file by the runner, which sets the corresponding
//! `MEMPROBE_*` environment variables when building the library.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::{fmt, fs, io};

use serde::Deserialize;

use crate::path::get_default_config_path;

// ——————————————————————————— Config Definition ———————————————————————————— //

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub log: Log,
    #[serde(default)]
    pub probe: Probe,
    #[serde(default)]
    pub platform: Platform,
    #[serde(default)]
    pub target: Target,
}

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
pub struct Log {
    pub level: Option<String>,
    pub color: Option<bool>,
    pub error: Option<Vec<String>>,
    pub warn: Option<Vec<String>>,
    pub info: Option<Vec<String>>,
    pub debug: Option<Vec<String>>,
    pub trace: Option<Vec<String>>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
pub struct Probe {
    /// Initial verbosity of the probing diagnostics.
    pub verbosity: Option<u8>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
pub struct Platform {
    pub name: Option<Platforms>,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Platforms {
    /// A BSP providing host bridge and breakpoint support.
    Bsp,
    /// Any other RTEMS board.
    Generic,
}

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
pub struct Target {
    /// The target triple, or path to a target specification, to cross-compile for.
    pub triple: Option<String>,
}

// ————————————————————————— Environment Variables —————————————————————————— //

impl Config {
    pub fn build_envs(&self) -> HashMap<String, String> {
        let mut envs = HashMap::new();
        envs.extend(self.log.build_envs());
        envs.extend(self.probe.build_envs());
        envs.extend(self.platform.build_envs());
        envs
    }
}

impl Log {
    fn build_envs(&self) -> HashMap<String, String> {
        let mut envs = HashMap::new();
        if let Some(level) = &self.level {
            envs.insert(String::from("MEMPROBE_LOG_LEVEL"), level.clone());
        }
        if let Some(color) = self.color {
            envs.insert(String::from("MEMPROBE_LOG_COLOR"), format!("{}", color));
        }

        let lists = [
            ("MEMPROBE_LOG_ERROR", &self.error),
            ("MEMPROBE_LOG_WARN", &self.warn),
            ("MEMPROBE_LOG_INFO", &self.info),
            ("MEMPROBE_LOG_DEBUG", &self.debug),
            ("MEMPROBE_LOG_TRACE", &self.trace),
        ];
        for (key, modules) in lists {
            if let Some(modules) = modules {
                envs.insert(String::from(key), modules.join(","));
            }
        }
        envs
    }
}

impl Probe {
    fn build_envs(&self) -> HashMap<String, String> {
        let mut envs = HashMap::new();
        if let Some(verbosity) = self.verbosity {
            envs.insert(String::from("MEMPROBE_VERBOSITY"), format!("{}", verbosity));
        }
        envs
    }
}

impl Platform {
    fn build_envs(&self) -> HashMap<String, String> {
        let mut envs = HashMap::new();
        if let Some(name) = self.name {
            let name = match name {
                Platforms::Bsp => "bsp",
                Platforms::Generic => "generic",
            };
            envs.insert(String::from("MEMPROBE_PLATFORM_NAME"), String::from(name));
        }
        envs
    }
}

// ————————————————————————————— Config Loader —————————————————————————————— //

#[derive(Debug)]
pub enum ConfigError {
    Read(PathBuf, io::Error),
    Parse(PathBuf, toml::de::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Read(path, err) => {
                write!(f, "Could not read '{}': {}", path.display(), err)
            }
            ConfigError::Parse(path, err) => write!(
                f,
                "Failed to parse configuration '{}':\n{}",
                path.display(),
                err.message()
            ),
        }
    }
}

/// Read the configuration at `path`, or the default configuration if none is provided.
pub fn read_config(path: &Option<PathBuf>) -> Result<Config, ConfigError> {
    let path = match path {
        Some(path) => path.clone(),
        None => {
            let path = get_default_config_path();
            if !path.exists() {
                log::debug!("No config file found, using the defaults");
                return Ok(Config::default());
            }
            path
        }
    };

    let config =
        fs::read_to_string(&path).map_err(|err| ConfigError::Read(path.clone(), err))?;
    parse_config(&path, &config)
}

fn parse_config(path: &Path, config: &str) -> Result<Config, ConfigError> {
    toml::from_str::<Config>(config).map_err(|err| ConfigError::Parse(path.to_owned(), err))
}

// ————————————————————————————————— Tests —————————————————————————————————— //
