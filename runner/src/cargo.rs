//! Cargo invocations
//!
//! The library is configured at compile time, so each command reads the configuration and forwards
//! it to cargo as environment variables.

use std::process::Command;
use std::{fmt, io};

use crate::config::{read_config, Config, ConfigError};
use crate::path::{get_library_manifest_path, get_workspace_path};
use crate::{BuildArgs, TestArgs};

/// Unstable flags needed when cross-compiling for targets without a pre-built standard library.
const BUILD_STD_ARGS: &[&str] = &[
    "-Zbuild-std=core,alloc",
    "-Zbuild-std-features=compiler-builtins-mem",
];

#[derive(Debug)]
pub enum CargoError {
    Config(ConfigError),
    Spawn(io::Error),
    Failed(String),
}

impl fmt::Display for CargoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CargoError::Config(err) => write!(f, "{}", err),
            CargoError::Spawn(err) => write!(f, "Failed to run cargo: {}", err),
            CargoError::Failed(cmd) => write!(f, "Command failed: {}", cmd),
        }
    }
}

impl From<ConfigError> for CargoError {
    fn from(err: ConfigError) -> Self {
        CargoError::Config(err)
    }
}

/// Build the library, cross-compiling if the configuration names a target.
pub fn build(args: &BuildArgs) -> Result<(), CargoError> {
    let cfg = read_config(&args.config)?;
    let mut cmd = cargo_cmd("build", &cfg);
    if let Some(triple) = &cfg.target.triple {
        // Target specifications are looked up from the workspace root
        let target = if triple.ends_with(".json") {
            get_workspace_path().join(triple).into_os_string()
        } else {
            triple.into()
        };
        cmd.arg("--target").arg(target).args(BUILD_STD_ARGS);
    }
    if args.release {
        cmd.arg("--release");
    }

    run(cmd)?;
    match &args.config {
        Some(config) => log::info!("Built memprobe with config '{}'", config.display()),
        None => log::info!("Built memprobe"),
    }
    Ok(())
}

/// Run the unit tests on the host.
pub fn test(args: &TestArgs) -> Result<(), CargoError> {
    let cfg = read_config(&args.config)?;
    if cfg.target.triple.is_some() {
        log::warn!("Tests always run on the host, ignoring the configured target");
    }

    let mut cmd = cargo_cmd("test", &cfg);
    if let Some(filter) = &args.filter {
        cmd.arg(filter);
    }
    run(cmd)
}

fn cargo_cmd(subcommand: &str, cfg: &Config) -> Command {
    let mut cmd = Command::new(env!("CARGO"));
    cmd.arg(subcommand)
        .arg("--manifest-path")
        .arg(get_library_manifest_path())
        .envs(cfg.build_envs());
    cmd
}

fn run(mut cmd: Command) -> Result<(), CargoError> {
    log::debug!("{:?}", cmd);
    let status = cmd.status().map_err(CargoError::Spawn)?;
    if status.success() {
        Ok(())
    } else {
        Err(CargoError::Failed(format!("{:?}", cmd)))
    }
}
