//! Structured test reports built from libtest output.
//!
//! All runners produce a [`TestReport`]: per-case results when the output
//! follows the libtest format, otherwise a coarse pass/fail plus the raw
//! captured output.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::OnceLock;

use owo_colors::OwoColorize;
use regex::Regex;
use serde::Serialize;

use crate::utils::exec::strip_ansi;
use crate::utils::plural::plural_s;

/// Result of one test case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CaseStatus {
    Passed,
    Failed,
    Ignored,
}

/// One test case. `status` is `None` when the case was only listed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestCase {
    pub name: String,
    pub status: Option<CaseStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

/// Outcome of one test run, identical in shape for every environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestReport {
    pub cases: Vec<TestCase>,
    pub passed: bool,
    pub output: String,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Counts {
    pub passed: usize,
    pub failed: usize,
    pub ignored: usize,
}

fn case_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^test (.+?) \.\.\. (ok|FAILED|ignored)\b").unwrap())
}

fn list_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\S+): (?:test|benchmark)$").unwrap())
}

fn failure_header() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^---- (\S+) std(?:out|err) ----$").unwrap())
}

impl TestReport {
    /// Build a report from libtest output and the process exit status.
    ///
    /// A run only passes when the process succeeded and no case failed.
    pub fn from_libtest(output: &str, exit_ok: bool) -> Self {
        let mut cases: Vec<TestCase> = Vec::new();
        let mut failure: Option<(String, Vec<String>)> = None;
        let mut failures: Vec<(String, String)> = Vec::new();

        for raw in output.lines() {
            let plain = strip_ansi(raw);
            let line = plain.trim_end();

            if let Some(caps) = failure_header().captures(line) {
                if let Some((name, lines)) = failure.take() {
                    failures.push((name, lines.join("\n").trim().to_string()));
                }
                failure = Some((caps[1].to_string(), Vec::new()));
                continue;
            }
            if line == "failures:" || line.starts_with("test result:") {
                if let Some((name, lines)) = failure.take() {
                    failures.push((name, lines.join("\n").trim().to_string()));
                }
                continue;
            }
            if let Some((_, lines)) = failure.as_mut() {
                lines.push(line.to_string());
                continue;
            }

            if let Some(caps) = case_line().captures(line) {
                let status = match &caps[2] {
                    "ok" => CaseStatus::Passed,
                    "FAILED" => CaseStatus::Failed,
                    _ => CaseStatus::Ignored,
                };
                cases.push(TestCase {
                    name: caps[1].to_string(),
                    status: Some(status),
                    output: None,
                });
            } else if let Some(caps) = list_line().captures(line) {
                cases.push(TestCase {
                    name: caps[1].to_string(),
                    status: None,
                    output: None,
                });
            }
        }
        if let Some((name, lines)) = failure.take() {
            failures.push((name, lines.join("\n").trim().to_string()));
        }

        for (name, text) in failures {
            if let Some(case) = cases.iter_mut().find(|c| c.name == name) {
                case.output = Some(text);
            }
        }

        let any_failed = cases
            .iter()
            .any(|c| c.status == Some(CaseStatus::Failed));

        Self {
            cases,
            passed: exit_ok && !any_failed,
            output: output.to_string(),
        }
    }

    /// Report without per-case information.
    pub fn coarse(passed: bool, output: impl Into<String>) -> Self {
        Self {
            cases: Vec::new(),
            passed,
            output: output.into(),
        }
    }

    pub fn case_names(&self) -> Vec<&str> {
        self.cases.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn counts(&self) -> Counts {
        let mut counts = Counts::default();
        for case in &self.cases {
            match case.status {
                Some(CaseStatus::Passed) => counts.passed += 1,
                Some(CaseStatus::Failed) => counts.failed += 1,
                Some(CaseStatus::Ignored) => counts.ignored += 1,
                None => {}
            }
        }
        counts
    }

    /// Process exit code for this report.
    pub fn exit_code(&self) -> i32 {
        if self.passed { 0 } else { 1 }
    }

    fn is_listing(&self) -> bool {
        !self.cases.is_empty() && self.cases.iter().all(|c| c.status.is_none())
    }

    /// Render the report for the terminal.
    pub fn render(&self) -> String {
        let mut out = String::new();

        if self.cases.is_empty() {
            let _ = writeln!(out, "{}", self.output.trim_end());
            let _ = writeln!(out, "{}", overall_badge(self.passed));
            return out;
        }

        if self.is_listing() {
            for case in &self.cases {
                let _ = writeln!(out, "{}", case.name);
            }
            let _ = writeln!(
                out,
                "{} test case{}",
                self.cases.len(),
                plural_s(self.cases.len())
            );
            return out;
        }

        for (module, cases) in group_by_module(&self.cases) {
            let module_failed = cases
                .iter()
                .any(|c| c.status == Some(CaseStatus::Failed));
            let label = if module.is_empty() { "<root>" } else { module };
            let _ = writeln!(out, "{} {}", overall_badge(!module_failed), label.bold());

            for case in cases {
                let short = case.name.rsplit("::").next().unwrap_or(&case.name);
                let line = match case.status {
                    Some(CaseStatus::Passed) => format!("{} {}", "✓".green(), short),
                    Some(CaseStatus::Failed) => format!("{} {}", "✕".red(), short.red()),
                    _ => format!("{}", format!("○ {short} (ignored)").dimmed()),
                };
                let _ = writeln!(out, "  {line}");
            }
        }

        for case in &self.cases {
            if let Some(text) = &case.output
                && !text.is_empty()
            {
                let _ = writeln!(out, "\n{} {}", "●".red(), case.name.bold());
                for line in text.lines() {
                    let _ = writeln!(out, "    {line}");
                }
            }
        }

        let Counts {
            passed,
            failed,
            ignored,
        } = self.counts();
        let _ = writeln!(
            out,
            "\n{} {}, {} {}, {} ignored, {} total",
            passed.to_string().green().bold(),
            "passed",
            failed.to_string().red().bold(),
            "failed",
            ignored,
            self.cases.len()
        );
        out
    }
}

fn overall_badge(passed: bool) -> String {
    if passed {
        format!("{}", " PASSED ".on_green().black().bold())
    } else {
        format!("{}", " FAILED ".on_red().bold())
    }
}

fn group_by_module(cases: &[TestCase]) -> BTreeMap<&str, Vec<&TestCase>> {
    let mut groups: BTreeMap<&str, Vec<&TestCase>> = BTreeMap::new();
    for case in cases {
        let module = case.name.rsplit_once("::").map_or("", |(m, _)| m);
        groups.entry(module).or_default().push(case);
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    const RUN: &str = "
running 3 tests
test math::adds ... ok
test math::divides ... FAILED
test net::fetches ... ignored, needs network

failures:

---- math::divides stdout ----
thread 'math::divides' panicked at src/lib.rs:10:5:
attempt to divide by zero


failures:
    math::divides

test result: FAILED. 1 passed; 1 failed; 1 ignored; 0 measured; 0 filtered out; finished in 0.01s
";

    #[test]
    fn test_parse_run() {
        let report = TestReport::from_libtest(RUN, false);
        assert_eq!(
            report.case_names(),
            vec!["math::adds", "math::divides", "net::fetches"]
        );
        assert_eq!(
            report.counts(),
            Counts {
                passed: 1,
                failed: 1,
                ignored: 1
            }
        );
        assert!(!report.passed);
        assert_eq!(report.exit_code(), 1);

        let divides = &report.cases[1];
        assert!(
            divides
                .output
                .as_deref()
                .unwrap()
                .contains("attempt to divide by zero")
        );
    }

    #[test]
    fn test_failed_case_overrides_exit_status() {
        let report = TestReport::from_libtest("test a ... FAILED", true);
        assert!(!report.passed);
    }

    #[test]
    fn test_parse_listing() {
        let output = "math::adds: test\nmath::divides: test\n\n2 tests, 0 benchmarks\n";
        let report = TestReport::from_libtest(output, true);
        assert_eq!(report.case_names(), vec!["math::adds", "math::divides"]);
        assert!(report.cases.iter().all(|c| c.status.is_none()));
        assert!(report.passed);
        assert_eq!(report.exit_code(), 0);
        assert!(report.render().contains("2 test cases"));
    }

    #[test]
    fn test_coarse_report() {
        let report = TestReport::coarse(false, "segfault");
        assert!(report.cases.is_empty());
        assert_eq!(report.exit_code(), 1);
        assert!(report.render().contains("segfault"));
    }

    #[test]
    fn test_render_groups_by_module() {
        let report = TestReport::from_libtest(RUN, false);
        let rendered = report.render();
        assert!(rendered.contains("math"));
        assert!(rendered.contains("net"));
        assert!(rendered.contains("adds"));
        assert!(rendered.contains("attempt to divide by zero"));
    }
}
