use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use log::LevelFilter;

mod cargo;
mod config;
mod logger;
mod path;

// —————————————————————————————— CLI Parsing ——————————————————————————————— //

#[derive(Parser)]
#[command(about = "Build and test the memprobe library")]
struct CliArgs {
    #[command(subcommand)]
    command: Subcommands,
    /// Print the commands being executed
    #[arg(short, long, action, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Subcommands {
    /// Build the library
    Build(BuildArgs),
    /// Run the unit tests on the host, against the userspace machine model
    Test(TestArgs),
    /// Print the environment variables derived from a configuration
    Env(EnvArgs),
}

#[derive(Args)]
struct BuildArgs {
    #[arg(long)]
    /// Path to the configuration file to use
    config: Option<PathBuf>,
    #[arg(long, action)]
    /// Build in release mode
    release: bool,
}

#[derive(Args)]
struct TestArgs {
    #[arg(long)]
    /// Path to the configuration file to use
    config: Option<PathBuf>,
    /// Only run the tests whose name contains this string
    filter: Option<String>,
}

#[derive(Args)]
struct EnvArgs {
    #[arg(long)]
    /// Path to the configuration file to use
    config: Option<PathBuf>,
}

// —————————————————————————————— Entry Point ——————————————————————————————— //

fn main() -> ExitCode {
    let args = CliArgs::parse();
    let level = if args.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    if let Err(err) = logger::RunnerLogger::init(level) {
        eprintln!("Failed to initialize logger: {}", err);
        return ExitCode::FAILURE;
    }

    let result = match args.command {
        Subcommands::Build(args) => cargo::build(&args),
        Subcommands::Test(args) => cargo::test(&args),
        Subcommands::Env(args) => print_env(&args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{}", err);
            ExitCode::FAILURE
        }
    }
}

fn print_env(args: &EnvArgs) -> Result<(), cargo::CargoError> {
    let cfg = config::read_config(&args.config)?;
    let mut envs: Vec<_> = cfg.build_envs().into_iter().collect();
    envs.sort();
    for (key, value) in envs {
        println!("{}={}", key, value);
    }
    Ok(())
}
