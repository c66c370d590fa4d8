//! Compiler diagnostics: parse rustc's human output, de-duplicate, render.
//!
//! Recognized lines:
//!
//! ```text
//! error[E0425]: cannot find value `x` in this scope   <- header
//!  --> src/main.rs:3:20                              <- location
//!   |
//! 3 |     println!("{}", x);                          <- snippet
//!   |                    ^ not found in this scope
//!   = help: consider importing ...                   <- child note
//! ```
//!
//! Everything else (progress lines, summaries) is dropped.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::OnceLock;

use owo_colors::OwoColorize;
use regex::Regex;
use serde::Serialize;

use crate::utils::exec::strip_ansi;
use crate::utils::plural::plural_s;

/// Diagnostic severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Note,
}

impl Severity {
    fn parse(label: &str) -> Self {
        match label {
            "error" => Self::Error,
            "warning" => Self::Warning,
            _ => Self::Note,
        }
    }

    fn badge(self) -> String {
        match self {
            Self::Error => format!("{}", " ERROR ".on_red().bold()),
            Self::Warning => format!("{}", " WARNING ".on_yellow().bold()),
            Self::Note => format!("{}", " NOTE ".reversed()),
        }
    }
}

/// Position in a source file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SourceLocation {
    pub file: String,
    pub line: u32,
    pub column: u32,
}

/// One compiler diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<SourceLocation>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub snippet: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

impl Diagnostic {
    fn key(&self) -> (Severity, &Option<String>, &str, &Option<SourceLocation>) {
        (self.severity, &self.code, &self.message, &self.location)
    }
}

// ============================================================================
// Patterns
// ============================================================================

fn header() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(error|warning|note|help)(?:\[(\w+)\])?: (.+)$").unwrap())
}

fn location() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*--> (.+?):(\d+):(\d+)$").unwrap())
}

fn child_note() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*= ((?:note|help): .+)$").unwrap())
}

fn snippet() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(\d+)?\s*\|(.*)$").unwrap())
}

/// Cargo summaries that look like diagnostics but carry no information.
fn is_summary(message: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(
            r"^(could not compile|aborting due to|build failed|`[^`]+` \(.+\) generated \d+ (warning|error)s?)",
        )
        .unwrap()
    });
    re.is_match(message)
}

// ============================================================================
// Parsing
// ============================================================================

/// Parse compiler output into de-duplicated diagnostics, in first-seen order.
pub fn parse_diagnostics(output: &str) -> Vec<Diagnostic> {
    let mut parsed: Vec<Diagnostic> = Vec::new();
    let mut current: Option<Diagnostic> = None;

    for raw in output.lines() {
        let plain = strip_ansi(raw);
        let line = plain.trim_end();

        if let Some(caps) = header().captures(line) {
            let label = &caps[1];
            let message = caps[3].to_string();

            // Top-level help/note right after a diagnostic belongs to it
            if matches!(label, "help" | "note")
                && let Some(diag) = current.as_mut()
            {
                diag.notes.push(format!("{label}: {message}"));
                continue;
            }

            if let Some(done) = current.take() {
                parsed.push(done);
            }
            if is_summary(&message) {
                continue;
            }
            current = Some(Diagnostic {
                severity: Severity::parse(label),
                code: caps.get(2).map(|m| m.as_str().to_string()),
                message,
                location: None,
                snippet: Vec::new(),
                notes: Vec::new(),
            });
            continue;
        }

        let Some(diag) = current.as_mut() else {
            continue;
        };

        if let Some(caps) = location().captures(line) {
            if diag.location.is_none() {
                diag.location = Some(SourceLocation {
                    file: caps[1].to_string(),
                    line: caps[2].parse().unwrap_or(0),
                    column: caps[3].parse().unwrap_or(0),
                });
            }
        } else if let Some(caps) = child_note().captures(line) {
            diag.notes.push(caps[1].to_string());
        } else if snippet().is_match(line) {
            diag.snippet.push(line.to_string());
        }
    }

    if let Some(done) = current.take() {
        parsed.push(done);
    }

    dedup(parsed)
}

fn dedup(diagnostics: Vec<Diagnostic>) -> Vec<Diagnostic> {
    let mut unique: Vec<Diagnostic> = Vec::with_capacity(diagnostics.len());
    for diag in diagnostics {
        if !unique.iter().any(|seen| seen.key() == diag.key()) {
            unique.push(diag);
        }
    }
    unique
}

// ============================================================================
// Rendering
// ============================================================================

/// Counts per severity.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Tally {
    pub errors: usize,
    pub warnings: usize,
}

pub fn tally(diagnostics: &[Diagnostic]) -> Tally {
    let mut tally = Tally::default();
    for diag in diagnostics {
        match diag.severity {
            Severity::Error => tally.errors += 1,
            Severity::Warning => tally.warnings += 1,
            Severity::Note => {}
        }
    }
    tally
}

/// Group diagnostics by file (sorted), then by position inside each file.
pub fn group_by_file(diagnostics: &[Diagnostic]) -> BTreeMap<String, Vec<&Diagnostic>> {
    let mut groups: BTreeMap<String, Vec<&Diagnostic>> = BTreeMap::new();
    for diag in diagnostics {
        let file = diag
            .location
            .as_ref()
            .map(|l| l.file.clone())
            .unwrap_or_default();
        groups.entry(file).or_default().push(diag);
    }
    for group in groups.values_mut() {
        group.sort_by_key(|d| d.location.as_ref().map(|l| (l.line, l.column)));
    }
    groups
}

/// Render diagnostics for the terminal.
///
/// Diagnostics on adjacent lines of the same file share one block.
pub fn render_diagnostics(diagnostics: &[Diagnostic]) -> String {
    let mut out = String::new();

    for (file, group) in group_by_file(diagnostics) {
        if !file.is_empty() {
            let _ = writeln!(out, "{}", file.underline().bold());
        }

        let mut previous_line: Option<u32> = None;
        for diag in group {
            let line = diag.location.as_ref().map(|l| l.line);
            let adjacent = matches!((previous_line, line), (Some(p), Some(l)) if l <= p.saturating_add(1));
            if previous_line.is_some() && !adjacent {
                out.push('\n');
            }
            previous_line = line;

            let position = diag
                .location
                .as_ref()
                .map(|l| format!("{}:{} ", l.line, l.column))
                .unwrap_or_default();
            let code = diag
                .code
                .as_ref()
                .map(|c| format!(" [{c}]"))
                .unwrap_or_default();
            let _ = writeln!(
                out,
                "{} {}{}{}",
                diag.severity.badge(),
                position.dimmed(),
                diag.message,
                code.dimmed()
            );

            for snippet in &diag.snippet {
                let _ = writeln!(out, "  {}", snippet.dimmed());
            }
            for note in &diag.notes {
                let _ = writeln!(out, "  {} {}", "=".cyan(), note);
            }
        }
        out.push('\n');
    }

    let Tally { errors, warnings } = tally(diagnostics);
    if errors + warnings > 0 {
        let _ = writeln!(
            out,
            "{} error{}, {} warning{}",
            errors.to_string().red().bold(),
            plural_s(errors),
            warnings.to_string().yellow().bold(),
            plural_s(warnings),
        );
    }

    out
}

// ============================================================================
// tests
// ============================================================================
