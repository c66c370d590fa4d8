//! Test runners.
//!
//! One contract, three environments:
//!
//! ```text
//! EnvironmentKind::Command  -> CommandRunner  (wasmtime / wasmer / custom WASI runtime)
//! EnvironmentKind::Node     -> NodeRunner     (node:wasi harness)
//! EnvironmentKind::Browser  -> BrowserRunner  (test-mode live server + WebDriver)
//! ```
//!
//! Every runner turns [`TestRunnerOptions`] into its native invocation and
//! returns the same [`TestReport`] shape. A missing executable is reported as
//! [`RunnerError::EnvironmentUnavailable`], never as a test failure.

pub mod browser;
pub mod bundle;
pub mod command;
pub mod node;
pub mod webdriver;

use std::collections::BTreeMap;
use std::path::Path;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::diagnostics::TestReport;

pub use browser::BrowserRunner;
pub use command::CommandRunner;
pub use node::NodeRunner;

/// Exit code when a required environment is missing (`EX_UNAVAILABLE`).
pub const EXIT_UNAVAILABLE: u8 = 69;

/// Where the test bundle runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum EnvironmentKind {
    /// WASI runtime on the command line
    #[default]
    Command,
    /// Web browser, optionally driven through WebDriver
    Browser,
    /// Node.js with its WASI implementation
    Node,
}

impl EnvironmentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Command => "command",
            Self::Browser => "browser",
            Self::Node => "node",
        }
    }
}

impl std::fmt::Display for EnvironmentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Options shared by every runner. Not mutated after construction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestRunnerOptions {
    pub env: BTreeMap<String, String>,
    pub list_test_cases: bool,
    pub test_cases: Vec<String>,
}

impl TestRunnerOptions {
    /// Arguments for the libtest harness inside the bundle.
    pub fn libtest_args(&self) -> Vec<String> {
        if self.list_test_cases {
            return vec!["--list".into(), "--format".into(), "terse".into()];
        }
        let mut args = self.test_cases.clone();
        if !args.is_empty() {
            args.push("--exact".into());
        }
        args
    }
}

/// Runner failures.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// A required executable or service is missing. Not a test failure.
    #[error("{what} is not available\n{remediation}")]
    EnvironmentUnavailable { what: String, remediation: String },

    #[error("tests failed")]
    TestsFailed(Box<TestReport>),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebDriver error: {0}")]
    WebDriver(String),

    #[error("timed out after {0} seconds waiting for test results")]
    Timeout(u64),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RunnerError {
    pub fn unavailable(what: impl Into<String>, remediation: impl Into<String>) -> Self {
        Self::EnvironmentUnavailable {
            what: what.into(),
            remediation: remediation.into(),
        }
    }

    pub fn exit_code(&self) -> u8 {
        match self {
            Self::EnvironmentUnavailable { .. } => EXIT_UNAVAILABLE,
            _ => 1,
        }
    }
}

/// Common runner contract.
pub trait TestRunner {
    fn environment(&self) -> EnvironmentKind;

    /// Run (or list) the tests in `bundle`.
    ///
    /// Returns the report for a passing run; a failing run becomes
    /// [`RunnerError::TestsFailed`] carrying the same report.
    fn run(&self, bundle: &Path, options: &TestRunnerOptions) -> Result<TestReport, RunnerError>;
}

/// Turn a finished report into the runner result.
pub(crate) fn conclude(report: TestReport) -> Result<TestReport, RunnerError> {
    if report.passed {
        Ok(report)
    } else {
        Err(RunnerError::TestsFailed(Box::new(report)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_libtest_args_list_mode() {
        let options = TestRunnerOptions {
            list_test_cases: true,
            test_cases: vec!["ignored".into()],
            ..Default::default()
        };
        assert_eq!(options.libtest_args(), vec!["--list", "--format", "terse"]);
    }

    #[test]
    fn test_libtest_args_filters() {
        let options = TestRunnerOptions {
            test_cases: vec!["math::adds".into(), "math::divides".into()],
            ..Default::default()
        };
        assert_eq!(
            options.libtest_args(),
            vec!["math::adds", "math::divides", "--exact"]
        );
        assert!(TestRunnerOptions::default().libtest_args().is_empty());
    }

    #[test]
    fn test_exit_codes_are_distinct() {
        let unavailable = RunnerError::unavailable("wasmtime", "install one of: wasmtime, wasmer");
        let failed = RunnerError::TestsFailed(Box::new(TestReport::coarse(false, "")));
        assert_eq!(unavailable.exit_code(), EXIT_UNAVAILABLE);
        assert_eq!(failed.exit_code(), 1);
        assert!(unavailable.to_string().contains("install one of"));
    }

    #[test]
    fn test_conclude() {
        assert!(conclude(TestReport::coarse(true, "")).is_ok());
        assert!(matches!(
            conclude(TestReport::coarse(false, "")),
            Err(RunnerError::TestsFailed(_))
        ));
    }

    #[test]
    fn test_environment_kind_serde() {
        #[derive(Deserialize)]
        struct Wrapper {
            env: EnvironmentKind,
        }
        let parsed: Wrapper = toml::from_str("env = \"node\"").unwrap();
        assert_eq!(parsed.env, EnvironmentKind::Node);
        assert_eq!(EnvironmentKind::Browser.to_string(), "browser");
    }
}
