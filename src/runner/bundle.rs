//! Building the test bundle.
//!
//! `cargo test --no-run --message-format=json --target <triple>` compiles the
//! test harness without running it; the executable path comes from the
//! `compiler-artifact` messages on stdout.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use crate::config::BuildConfig;
use crate::diagnostics::{parse_diagnostics, render_diagnostics};
use crate::log;
use crate::utils::exec::{CARGO_FILTER, Cmd};

#[derive(Debug, Deserialize)]
struct ArtifactMessage {
    reason: String,
    #[serde(default)]
    profile: Option<ArtifactProfile>,
    #[serde(default)]
    executable: Option<PathBuf>,
    #[serde(default)]
    target: Option<ArtifactTarget>,
}

#[derive(Debug, Deserialize)]
struct ArtifactProfile {
    #[serde(default)]
    test: bool,
}

#[derive(Debug, Deserialize)]
struct ArtifactTarget {
    name: String,
}

/// A compiled test harness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestExecutable {
    pub target: String,
    pub path: PathBuf,
}

/// Test executables announced in cargo's JSON message stream.
///
/// Lines that are not JSON (or not artifacts) are skipped.
pub fn test_executables(stdout: &str) -> Vec<TestExecutable> {
    stdout
        .lines()
        .filter_map(|line| serde_json::from_str::<ArtifactMessage>(line).ok())
        .filter(|msg| msg.reason == "compiler-artifact")
        .filter(|msg| msg.profile.as_ref().is_some_and(|p| p.test))
        .filter_map(|msg| {
            Some(TestExecutable {
                target: msg.target.map(|t| t.name).unwrap_or_default(),
                path: msg.executable?,
            })
        })
        .collect()
}

/// Pick the harness to run: the one named after the product, else the first.
pub fn select_executable(executables: &[TestExecutable], product: &str) -> Option<PathBuf> {
    executables
        .iter()
        .find(|exe| exe.target == product)
        .or_else(|| executables.first())
        .map(|exe| exe.path.clone())
}

/// Compile the test bundle and return its path.
pub fn build_test_bundle(build: &BuildConfig) -> Result<PathBuf> {
    let cargo = build
        .command
        .first()
        .map(String::as_str)
        .unwrap_or("cargo");
    let cmd = Cmd::new(cargo)
        .args(["test", "--no-run", "--message-format=json", "--target"])
        .arg(&build.target)
        .arg_if(build.release, "--release")
        .cwd(&build.manifest_dir)
        .env("CARGO_TERM_COLOR", "never");

    log!("build"; "building test bundle for {}", build.target);
    crate::debug!("build"; "{}", cmd.display());

    let output = cmd.output()?;
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);

    if !output.status.success() {
        let diagnostics = parse_diagnostics(&stderr);
        if diagnostics.is_empty() {
            CARGO_FILTER.log("build", &stderr);
        } else {
            crate::logger::print_block(&render_diagnostics(&diagnostics));
        }
        bail!("test bundle build failed");
    }

    let executables = test_executables(&stdout);
    if executables.len() > 1 {
        crate::debug!("build"; "{} test executables, using the one for `{}`", executables.len(), build.product_name());
    }
    select_executable(&executables, &build.product_name())
        .context("cargo did not report a test executable; does the package have tests?")
}

#[cfg(test)]
mod tests {
    use super::*;

    const MESSAGES: &str = r#"{"reason":"compiler-artifact","target":{"name":"helper","kind":["lib"]},"profile":{"test":false},"executable":null}
   Compiling app v0.1.0
{"reason":"compiler-artifact","target":{"name":"app","kind":["bin"]},"profile":{"test":true},"executable":"/p/target/wasm32-wasip1/debug/deps/app-1a2b.wasm"}
{"reason":"compiler-artifact","target":{"name":"integration","kind":["test"]},"profile":{"test":true},"executable":"/p/target/wasm32-wasip1/debug/deps/integration-3c4d.wasm"}
{"reason":"build-finished","success":true}"#;

    #[test]
    fn test_executables_from_messages() {
        let exes = test_executables(MESSAGES);
        assert_eq!(exes.len(), 2);
        assert_eq!(exes[0].target, "app");
        assert_eq!(
            exes[1].path,
            PathBuf::from("/p/target/wasm32-wasip1/debug/deps/integration-3c4d.wasm")
        );
    }

    #[test]
    fn test_select_prefers_product() {
        let exes = test_executables(MESSAGES);
        assert_eq!(
            select_executable(&exes, "integration"),
            Some(PathBuf::from("/p/target/wasm32-wasip1/debug/deps/integration-3c4d.wasm"))
        );
        assert_eq!(
            select_executable(&exes, "unknown"),
            Some(PathBuf::from("/p/target/wasm32-wasip1/debug/deps/app-1a2b.wasm"))
        );
        assert_eq!(select_executable(&[], "app"), None);
    }
}
