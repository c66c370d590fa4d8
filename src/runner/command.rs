//! WASI runtime on the command line.
//!
//! Runtime discovery order:
//! 1. `--runner` / `[test] runner`
//! 2. `WASMDEV_TEST_RUNNER`
//! 3. the first of `wasmtime`, `wasmer` found on `PATH`

use std::env;
use std::path::{Path, PathBuf};

use super::{EnvironmentKind, RunnerError, TestRunner, TestRunnerOptions, conclude};
use crate::diagnostics::TestReport;
use crate::utils::exec::{Cmd, combined_output};

/// Environment variable naming the WASI runtime.
pub const RUNNER_ENV_VAR: &str = "WASMDEV_TEST_RUNNER";

const KNOWN_RUNTIMES: &[&str] = &["wasmtime", "wasmer"];

/// Command-line dialect of a runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeFlavor {
    Wasmtime,
    Wasmer,
    /// Unknown program: `program bundle args...`, env through the process
    Plain,
}

impl RuntimeFlavor {
    fn of(program: &Path) -> Self {
        let stem = program
            .file_stem()
            .map(|s| s.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        match stem.as_str() {
            "wasmtime" => Self::Wasmtime,
            "wasmer" => Self::Wasmer,
            _ => Self::Plain,
        }
    }
}

/// Runs the bundle under a WASI runtime process.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    program: PathBuf,
    flavor: RuntimeFlavor,
    work_dir: Option<PathBuf>,
}

impl CommandRunner {
    pub fn new(program: impl Into<PathBuf>, work_dir: Option<PathBuf>) -> Self {
        let program = program.into();
        Self {
            flavor: RuntimeFlavor::of(&program),
            program,
            work_dir,
        }
    }

    /// Locate a runtime. `explicit` wins over the environment variable.
    pub fn discover(explicit: Option<&str>, work_dir: Option<PathBuf>) -> Result<Self, RunnerError> {
        let requested = explicit
            .map(str::to_string)
            .or_else(|| env::var(RUNNER_ENV_VAR).ok())
            .filter(|name| !name.trim().is_empty());

        if let Some(name) = requested {
            let program = which::which(&name).map_err(|_| {
                RunnerError::unavailable(
                    format!("test runner `{name}`"),
                    format!("install `{name}` or change `--runner` / {RUNNER_ENV_VAR}"),
                )
            })?;
            return Ok(Self::new(program, work_dir));
        }

        KNOWN_RUNTIMES
            .iter()
            .find_map(|name| which::which(name).ok())
            .map(|program| Self::new(program, work_dir))
            .ok_or_else(|| {
                RunnerError::unavailable(
                    "WASI runtime",
                    format!("install one of: {}", KNOWN_RUNTIMES.join(", ")),
                )
            })
    }

    pub fn flavor(&self) -> RuntimeFlavor {
        self.flavor
    }

    /// Native invocation for one run.
    pub fn command(&self, bundle: &Path, options: &TestRunnerOptions) -> Cmd {
        let program_args = options.libtest_args();
        let mut cmd = Cmd::new(&self.program);
        if let Some(dir) = &self.work_dir {
            cmd = cmd.cwd(dir);
        }

        match self.flavor {
            RuntimeFlavor::Wasmtime | RuntimeFlavor::Wasmer => {
                cmd = cmd.args(["run", "--dir", "."]);
                for (key, value) in &options.env {
                    cmd = cmd.arg("--env").arg(format!("{key}={value}"));
                }
                cmd = cmd.arg(bundle);
                if self.flavor == RuntimeFlavor::Wasmer {
                    cmd = cmd.arg_if(!program_args.is_empty(), "--");
                }
                cmd.args(program_args)
            }
            RuntimeFlavor::Plain => cmd.arg(bundle).args(program_args).envs(&options.env),
        }
    }
}

impl TestRunner for CommandRunner {
    fn environment(&self) -> EnvironmentKind {
        EnvironmentKind::Command
    }

    fn run(&self, bundle: &Path, options: &TestRunnerOptions) -> Result<TestReport, RunnerError> {
        let cmd = self.command(bundle, options);
        crate::debug!("test"; "{}", cmd.display());

        let output = cmd.output()?;
        let text = combined_output(&output);
        conclude(TestReport::from_libtest(&text, output.status.success()))
    }
}
