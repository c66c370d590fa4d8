//! External command execution utilities.
//!
//! Builder-based API for the toolchain and runtime processes wasmdev drives
//! (`cargo`, `wasmtime`, `node`, WebDriver binaries).
//!
//! # Examples
//!
//! ```ignore
//! use crate::utils::exec::Cmd;
//!
//! // Capture output regardless of exit status
//! let output = Cmd::from_slice(&["cargo", "build"])
//!     .args(["--target", "wasm32-wasip1"])
//!     .cwd(root)
//!     .output()?;
//!
//! // Spawn with inherited stdio
//! Cmd::new("xdg-open").arg(url).spawn()?;
//! ```

use crate::log;
use anyhow::{Context, Result};
use regex::Regex;
use std::{
    ffi::{OsStr, OsString},
    path::{Path, PathBuf},
    process::{Child, Command, Output, Stdio},
    sync::OnceLock,
};

// ============================================================================
// Builder API
// ============================================================================

/// Command builder for external process execution.
#[derive(Debug, Default, Clone)]
pub struct Cmd {
    program: OsString,
    args: Vec<OsString>,
    cwd: Option<PathBuf>,
    envs: Vec<(String, String)>,
}

impl Cmd {
    pub fn new<S: AsRef<OsStr>>(program: S) -> Self {
        Self {
            program: program.as_ref().to_owned(),
            ..Default::default()
        }
    }

    /// Create from a command array (e.g., `["cargo", "build"]`).
    pub fn from_slice<S: AsRef<OsStr>>(cmd: &[S]) -> Self {
        let mut iter = cmd.iter();
        let program = iter
            .next()
            .map(|s| s.as_ref().to_owned())
            .unwrap_or_default();
        let args: Vec<_> = iter.map(|s| s.as_ref().to_owned()).collect();
        Self {
            program,
            args,
            ..Default::default()
        }
    }

    /// Add a single argument. Empty arguments are skipped.
    pub fn arg<S: AsRef<OsStr>>(mut self, arg: S) -> Self {
        let arg = arg.as_ref();
        if !arg.is_empty() {
            self.args.push(arg.to_owned());
        }
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        for arg in args {
            let arg = arg.as_ref();
            if !arg.is_empty() {
                self.args.push(arg.to_owned());
            }
        }
        self
    }

    /// Add the argument only when `enabled`.
    pub fn arg_if<S: AsRef<OsStr>>(self, enabled: bool, arg: S) -> Self {
        if enabled { self.arg(arg) } else { self }
    }

    pub fn cwd<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.cwd = Some(dir.as_ref().to_owned());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn envs<K, V, I>(mut self, vars: I) -> Self
    where
        K: AsRef<str>,
        V: AsRef<str>,
        I: IntoIterator<Item = (K, V)>,
    {
        for (k, v) in vars {
            self.envs.push((k.as_ref().to_owned(), v.as_ref().to_owned()));
        }
        self
    }

    /// Program name for error messages.
    pub fn program_name(&self) -> String {
        self.program.to_string_lossy().to_string()
    }

    /// Shell-like rendering of the full command line.
    pub fn display(&self) -> String {
        std::iter::once(&self.program)
            .chain(self.args.iter())
            .map(|s| {
                let s = s.to_string_lossy();
                if s.contains(char::is_whitespace) {
                    format!("'{s}'")
                } else {
                    s.to_string()
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).envs(self.envs.iter().cloned());
        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }
        cmd
    }

    /// Execute and capture output. The exit status is left to the caller.
    pub fn output(self) -> Result<Output> {
        let name = self.program_name();
        self.command()
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("Failed to execute `{name}`"))
    }

    /// Spawn with piped stdout/stderr.
    pub fn spawn_piped(self) -> Result<Child> {
        let name = self.program_name();
        self.command()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to spawn `{name}`"))
    }

    /// Spawn with inherited stdio.
    pub fn spawn(self) -> Result<Child> {
        let name = self.program_name();
        self.command()
            .stdin(Stdio::null())
            .spawn()
            .with_context(|| format!("Failed to spawn `{name}`"))
    }
}

// ============================================================================
// Output Filtering
// ============================================================================

/// Filter rule for command output logging.
///
/// Used to reduce noise by skipping known progress or irrelevant messages.
pub struct FilterRule {
    /// Prefixes to skip when logging output.
    pub skip_prefixes: &'static [&'static str],
}

impl FilterRule {
    pub const fn new(skip_prefixes: &'static [&'static str]) -> Self {
        Self { skip_prefixes }
    }

    fn should_skip(&self, line: &str) -> bool {
        line.is_empty() || self.skip_prefixes.iter().any(|p| line.starts_with(p))
    }

    /// Keep output lines that pass the filter.
    pub fn apply(&self, output: &str) -> Vec<String> {
        output
            .lines()
            .filter(|line| {
                let plain = strip_ansi(line);
                let trimmed = plain.trim();
                !trimmed.is_empty() && !self.should_skip(trimmed)
            })
            .map(str::to_string)
            .collect()
    }

    /// Log output lines that pass the filter.
    pub fn log(&self, name: &str, output: &str) {
        let lines = self.apply(output);
        if !lines.is_empty() {
            log!(name; "{}", lines.join("\n"));
        }
    }
}

/// Cargo progress lines.
pub const CARGO_FILTER: FilterRule = FilterRule::new(&[
    "Compiling ",
    "Finished ",
    "Blocking waiting",
    "Updating ",
    "Downloaded ",
    "Downloading ",
    "Locking ",
    "Adding ",
    "Checking ",
    "Executable ",
]);

// ============================================================================
// Helpers
// ============================================================================

/// Strip ANSI escape codes from string.
pub fn strip_ansi(s: &str) -> std::borrow::Cow<'_, str> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"\x1b\[[0-9;]*[A-Za-z]").unwrap());
    re.replace_all(s, "")
}

/// Combined stdout then stderr, lossily decoded.
pub fn combined_output(output: &Output) -> String {
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.is_empty() {
        if !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str(&stderr);
    }
    text
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cmd_builder() {
        let cmd = Cmd::new("echo")
            .arg("hello")
            .args(["world", "!"])
            .cwd("/tmp");

        assert_eq!(cmd.program, OsString::from("echo"));
        assert_eq!(cmd.args.len(), 3);
        assert_eq!(cmd.cwd, Some(PathBuf::from("/tmp")));
    }

    #[test]
    fn test_from_slice_and_arg_if() {
        let cmd = Cmd::from_slice(&["cargo", "build"])
            .arg_if(true, "--release")
            .arg_if(false, "--offline");
        assert_eq!(cmd.display(), "cargo build --release");
    }

    #[test]
    fn test_display_quotes_whitespace() {
        let cmd = Cmd::new("node").arg("my file.mjs");
        assert_eq!(cmd.display(), "node 'my file.mjs'");
    }

    #[test]
    fn test_empty_args_filtered() {
        let cmd = Cmd::new("echo").arg("").args(["a", "", "b"]);
        assert_eq!(cmd.args.len(), 2);
    }

    #[test]
    fn test_filter_rule() {
        let filter = FilterRule::new(&["WARN:", "INFO:"]);
        assert!(filter.should_skip("WARN: something"));
        assert!(filter.should_skip("INFO: something"));
        assert!(!filter.should_skip("ERROR: something"));
        assert!(filter.should_skip(""));
    }

    #[test]
    fn test_cargo_filter_keeps_diagnostics() {
        let kept = CARGO_FILTER.apply(
            "   Compiling app v0.1.0\nerror: boom\n    Finished `dev` profile\n",
        );
        assert_eq!(kept, vec!["error: boom"]);
    }

    #[test]
    fn test_strip_ansi() {
        assert_eq!(strip_ansi("\x1b[31mRed\x1b[0m"), "Red");
        assert_eq!(strip_ansi("\x1b[1m\x1b[2Kbold"), "bold");
        assert_eq!(strip_ansi("Plain text"), "Plain text");
    }

    #[cfg(unix)]
    #[test]
    fn test_output_keeps_failure() {
        let output = Cmd::from_slice(&["sh", "-c", "echo out; echo err >&2; exit 3"])
            .output()
            .unwrap();
        assert_eq!(output.status.code(), Some(3));
        let text = combined_output(&output);
        assert!(text.contains("out"));
        assert!(text.contains("err"));
    }
}
