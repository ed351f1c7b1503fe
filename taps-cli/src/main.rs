use std::process::ExitCode;

use clap::Parser;
use taps::state::Direction;
use taps::version::VERSION;
use taps_config::Environment;
use taps_telemetry::tracing::init_tracing;

use crate::cli::{Cli, Command};

mod cli;
mod config;
mod core;

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    if let Command::Version = cli.command {
        println!("taps {VERSION}");
        return Ok(ExitCode::SUCCESS);
    }

    // Interactive transfers log to the console unless an environment was chosen explicitly.
    let interactive = !matches!(cli.command, Command::Server(_));
    if interactive && std::env::var_os("APP_ENVIRONMENT").is_none() {
        Environment::Dev.set();
    }

    // Initialize tracing from the binary name, tagged with the sub-command
    let _log_flusher = init_tracing(env!("CARGO_BIN_NAME"), Some(cli.command.name()))?;

    match cli.command {
        Command::Push(args) => run_transfer(Direction::Push, args),
        Command::Pull(args) => run_transfer(Direction::Pull, args),
        Command::Server(args) => {
            actix_web::rt::System::new().block_on(core::start_server(args))?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Version => Ok(ExitCode::SUCCESS),
    }
}

fn run_transfer(direction: Direction, args: cli::TransferArgs) -> anyhow::Result<ExitCode> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(core::transfer(direction, args))
}
