//! Node.js with `node:wasi`.
//!
//! The embedded harness is written next to the run (work dir, or a temp dir
//! that lives for the duration of the run) and invoked as
//! `node [node_args] test-node.mjs <bundle> [args]`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;

use super::{EnvironmentKind, RunnerError, TestRunner, TestRunnerOptions, conclude};
use crate::diagnostics::TestReport;
use crate::embed::node::{ENV_VAR, HARNESS_MJS, HARNESS_NAME};
use crate::utils::exec::{Cmd, combined_output};

#[derive(Debug, Clone)]
pub struct NodeRunner {
    node: PathBuf,
    node_args: Vec<String>,
    work_dir: Option<PathBuf>,
}

impl NodeRunner {
    pub fn new(node: impl Into<PathBuf>, node_args: Vec<String>, work_dir: Option<PathBuf>) -> Self {
        Self {
            node: node.into(),
            node_args,
            work_dir,
        }
    }

    /// Locate `node` on `PATH`.
    pub fn discover(node_args: Vec<String>, work_dir: Option<PathBuf>) -> Result<Self, RunnerError> {
        let node = which::which("node").map_err(|_| {
            RunnerError::unavailable(
                "node",
                "install Node.js (https://nodejs.org) and make sure `node` is on PATH",
            )
        })?;
        Ok(Self::new(node, node_args, work_dir))
    }

    /// Native invocation, given the written harness.
    pub fn command(&self, harness: &Path, bundle: &Path, options: &TestRunnerOptions) -> Result<Cmd, RunnerError> {
        let env = serde_json::to_string(&options.env).context("Failed to encode test environment")?;
        let mut cmd = Cmd::new(&self.node)
            .args(&self.node_args)
            .arg(harness)
            .arg(bundle)
            .args(options.libtest_args())
            .env(ENV_VAR, env);
        if let Some(dir) = &self.work_dir {
            cmd = cmd.cwd(dir);
        }
        Ok(cmd)
    }
}

/// Write the harness into `dir`.
pub fn write_harness(dir: &Path) -> Result<PathBuf, RunnerError> {
    fs::create_dir_all(dir)?;
    let path = dir.join(HARNESS_NAME);
    fs::write(&path, HARNESS_MJS)?;
    Ok(path)
}

impl TestRunner for NodeRunner {
    fn environment(&self) -> EnvironmentKind {
        EnvironmentKind::Node
    }

    fn run(&self, bundle: &Path, options: &TestRunnerOptions) -> Result<TestReport, RunnerError> {
        // Held until the run is over
        let _scratch: tempfile::TempDir;
        let harness_dir = match &self.work_dir {
            Some(dir) => dir.clone(),
            None => {
                _scratch = tempfile::Builder::new().prefix("wasmdev-node-").tempdir()?;
                _scratch.path().to_path_buf()
            }
        };
        let harness = write_harness(&harness_dir)?;

        let cmd = self.command(&harness, bundle, options)?;
        crate::debug!("test"; "{}", cmd.display());

        let output = cmd.output()?;
        let text = combined_output(&output);
        conclude(TestReport::from_libtest(&text, output.status.success()))
    }
}
