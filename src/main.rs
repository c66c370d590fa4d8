//! wasmdev - dev server, live reload and test runner for Rust WebAssembly projects.

mod channel;
mod cli;
mod config;
mod coordinator;
mod diagnostics;
mod embed;
mod logger;
mod runner;
mod server;
mod session;
mod utils;
mod watch;

use std::collections::BTreeMap;
use std::process::ExitCode;

use anyhow::Result;
use clap::{ColorChoice, Parser};
use cli::{Cli, Commands};
use cli::test::TestInvocation;
use config::Config;
use runner::{RunnerError, TestRunnerOptions};

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set global color override based on CLI option
    match cli.color {
        ColorChoice::Always => owo_colors::set_override(true),
        ColorChoice::Never => owo_colors::set_override(false),
        ColorChoice::Auto => {} // owo-colors auto-detects TTY
    }
    logger::set_verbose(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let code = e
                .downcast_ref::<RunnerError>()
                .map_or(1, RunnerError::exit_code);
            log!("error"; "{:#}", e);
            ExitCode::from(code)
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    // The executor only needs its arguments, never the project config
    if let Commands::BuildExecutor(args) = &cli.command {
        return coordinator::executor::run(args);
    }

    let config = Config::load(&cli)?;
    match cli.command {
        Commands::Dev { .. } => cli::dev::run_dev(config),
        Commands::Test {
            prebuilt,
            list,
            env,
            work_dir,
            test_cases,
            ..
        } => {
            let invocation = TestInvocation {
                prebuilt,
                work_dir,
                options: TestRunnerOptions {
                    env: env.into_iter().collect::<BTreeMap<_, _>>(),
                    list_test_cases: list,
                    test_cases,
                },
            };
            cli::test::run_test(&config, invocation)
        }
        Commands::BuildExecutor(_) => Ok(()),
    }
}
