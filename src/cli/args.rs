//! Command-line interface definitions.

use clap::{ColorChoice, Parser, Subcommand};
use std::net::IpAddr;
use std::path::PathBuf;

use crate::runner::EnvironmentKind;

/// Dev server, live reload and test runner for Rust WebAssembly projects
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None, arg_required_else_help = true)]
pub struct Cli {
    /// Control colored output (auto, always, never)
    #[arg(long, global = true, default_value = "auto")]
    pub color: ColorChoice,

    /// Config file path (default: wasmdev.toml)
    #[arg(short = 'C', long, global = true, default_value = "wasmdev.toml", value_hint = clap::ValueHint::FilePath)]
    pub config: PathBuf,

    /// Print debug output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// subcommands
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Watch, rebuild and serve the project with live reload
    #[command(visible_alias = "d")]
    Dev {
        #[command(flatten)]
        build_args: BuildArgs,

        #[command(flatten)]
        serve_args: ServeArgs,

        /// Additional directory to watch (repeatable)
        #[arg(short, long = "watch-path", value_hint = clap::ValueHint::DirPath)]
        watch_paths: Vec<PathBuf>,

        /// Don't open the browser after the server starts
        #[arg(long)]
        skip_auto_open: bool,

        /// HTML page served at `/` instead of the built-in shell
        #[arg(long, value_hint = clap::ValueHint::FilePath)]
        custom_index_page: Option<PathBuf>,

        /// Static directory served at the root URL (repeatable)
        #[arg(long = "resources", value_hint = clap::ValueHint::DirPath)]
        resources: Vec<PathBuf>,

        /// Debounce window for file changes, in milliseconds
        #[arg(long)]
        debounce: Option<u64>,
    },

    /// Build and run the test bundle
    #[command(visible_alias = "t")]
    Test {
        #[command(flatten)]
        build_args: BuildArgs,

        #[command(flatten)]
        serve_args: ServeArgs,

        /// Environment used to run the tests
        #[arg(short, long, value_enum)]
        environment: Option<EnvironmentKind>,

        /// Run an already built test bundle instead of building one
        #[arg(long, value_hint = clap::ValueHint::FilePath)]
        prebuilt: Option<PathBuf>,

        /// List test cases instead of running them
        #[arg(short, long)]
        list: bool,

        /// Run the browser through WebDriver without a window
        #[arg(long)]
        headless: bool,

        /// Extra argument for `node` (repeatable)
        #[arg(long = "node-arg", allow_hyphen_values = true)]
        node_args: Vec<String>,

        /// Environment variable for the test process, `KEY=VALUE` (repeatable)
        #[arg(long = "env", value_parser = parse_env_pair)]
        env: Vec<(String, String)>,

        /// Scratch directory for generated harness files
        #[arg(long, value_hint = clap::ValueHint::DirPath)]
        work_dir: Option<PathBuf>,

        /// Only run the named test cases
        #[arg(value_name = "TEST")]
        test_cases: Vec<String>,
    },

    /// Serve build requests over the request/response FIFOs (spawned by `dev`)
    #[command(hide = true)]
    BuildExecutor(ExecutorArgs),
}

/// Shared build arguments for Dev and Test commands
#[derive(clap::Args, Debug, Clone, Default)]
pub struct BuildArgs {
    /// Binary target to build
    #[arg(long)]
    pub product: Option<String>,

    /// Build with the release profile
    #[arg(short, long)]
    pub release: bool,

    /// Compilation target triple
    #[arg(long)]
    pub target: Option<String>,
}

/// Shared server arguments for Dev and Test commands
#[derive(clap::Args, Debug, Clone, Default)]
pub struct ServeArgs {
    /// Network interface to bind (e.g., 127.0.0.1, 0.0.0.0)
    #[arg(short, long)]
    pub bind: Option<IpAddr>,

    /// Port number to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Host name used in printed and opened URLs
    #[arg(long)]
    pub host: Option<String>,
}

/// Arguments of the out-of-process build executor
#[derive(clap::Args, Debug, Clone)]
pub struct ExecutorArgs {
    /// FIFO the dev server writes build requests to
    #[arg(long)]
    pub request: PathBuf,

    /// FIFO the executor writes build responses to
    #[arg(long)]
    pub response: PathBuf,

    /// File receiving the output of the latest build
    #[arg(long)]
    pub log: PathBuf,

    /// Binary target to build
    #[arg(long)]
    pub product: String,

    /// Build with the release profile
    #[arg(long)]
    pub release: bool,

    /// Compilation target triple
    #[arg(long)]
    pub target: String,

    /// Directory the build command runs in
    #[arg(long)]
    pub manifest_dir: PathBuf,

    /// Build command and its leading arguments
    #[arg(last = true, required = true)]
    pub command: Vec<String>,
}

/// Parse a `KEY=VALUE` pair.
fn parse_env_pair(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got `{raw}`")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_env_pair() {
        assert_eq!(
            parse_env_pair("RUST_LOG=debug").unwrap(),
            ("RUST_LOG".to_string(), "debug".to_string())
        );
        assert_eq!(
            parse_env_pair("EMPTY=").unwrap(),
            ("EMPTY".to_string(), String::new())
        );
        assert!(parse_env_pair("novalue").is_err());
        assert!(parse_env_pair("=value").is_err());
    }

    #[test]
    fn test_parse_dev_command() {
        let cli = Cli::try_parse_from([
            "wasmdev", "dev", "--product", "app", "-p", "9000", "-w", "assets",
            "--skip-auto-open",
        ])
        .unwrap();
        match cli.command {
            Commands::Dev {
                build_args,
                serve_args,
                watch_paths,
                skip_auto_open,
                ..
            } => {
                assert_eq!(build_args.product.as_deref(), Some("app"));
                assert_eq!(serve_args.port, Some(9000));
                assert_eq!(watch_paths, vec![PathBuf::from("assets")]);
                assert!(skip_auto_open);
            }
            _ => panic!("expected dev command"),
        }
    }

    #[test]
    fn test_parse_test_command() {
        let cli = Cli::try_parse_from([
            "wasmdev", "test", "-e", "node", "--env", "A=1", "--list", "suite::case",
        ])
        .unwrap();
        match cli.command {
            Commands::Test {
                environment,
                env,
                list,
                test_cases,
                ..
            } => {
                assert_eq!(environment, Some(EnvironmentKind::Node));
                assert_eq!(env, vec![("A".to_string(), "1".to_string())]);
                assert!(list);
                assert_eq!(test_cases, vec!["suite::case"]);
            }
            _ => panic!("expected test command"),
        }
    }

    #[test]
    fn test_parse_executor_command() {
        let cli = Cli::try_parse_from([
            "wasmdev", "build-executor", "--request", "/tmp/req", "--response", "/tmp/resp",
            "--log", "/tmp/build.log", "--product", "app", "--target", "wasm32-wasip1",
            "--manifest-dir", "/p", "--", "cargo", "build",
        ])
        .unwrap();
        match cli.command {
            Commands::BuildExecutor(args) => {
                assert_eq!(args.command, vec!["cargo", "build"]);
                assert!(!args.release);
            }
            _ => panic!("expected build-executor command"),
        }
    }
}
