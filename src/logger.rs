//! Terminal output for wasmdev.
//!
//! - `log!` prints a line under a colored `[module]` prefix
//! - `debug!` does the same, but only with `--verbose`
//! - the build status block is rewritten in place on every build, so a
//!   success after a failure wipes the stale compiler errors
//!
//! ```ignore
//! log!("serve"; "http://{}", addr);
//! debug!("watch"; "event: {}", path.display());
//! logger::status_success("build succeeded");
//! ```

use crossterm::{
    cursor, execute,
    terminal::{Clear, ClearType},
};
use owo_colors::OwoColorize;
use parking_lot::Mutex;
use std::{
    io::{Write, stdout},
    sync::atomic::{AtomicBool, Ordering},
};

static VERBOSE: AtomicBool = AtomicBool::new(false);

pub fn set_verbose(v: bool) {
    VERBOSE.store(v, Ordering::Relaxed);
}

pub fn is_verbose() -> bool {
    VERBOSE.load(Ordering::Relaxed)
}

// ============================================================================
// Log Macro
// ============================================================================

/// Log a message with a colored module prefix
///
/// # Usage
/// ```ignore
/// log!("module"; "message with {} formatting", args);
/// ```
#[macro_export]
macro_rules! log {
    ($module:expr; $($arg:tt)*) => {{
        $crate::logger::log($module, &format!($($arg)*))
    }};
}

/// Log a debug message (only shown when --verbose is enabled)
///
/// # Usage
/// ```ignore
/// debug!("module"; "debug info: {}", value);
/// ```
#[macro_export]
macro_rules! debug {
    ($module:expr; $($arg:tt)*) => {{
        if $crate::logger::is_verbose() {
            $crate::logger::log($module, &format!($($arg)*))
        }
    }};
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Log a message with a colored module prefix
#[inline]
pub fn log(module: &str, message: &str) {
    let module_lower = module.to_ascii_lowercase();
    let prefix = colorize_prefix(module, &module_lower);

    let mut stdout = stdout().lock();
    execute!(stdout, Clear(ClearType::UntilNewLine)).ok();
    writeln!(stdout, "{prefix} {message}").ok();
    stdout.flush().ok();
}

/// Print a pre-rendered multi-line block (diagnostics, test reports) as-is.
pub fn print_block(block: &str) {
    let mut stdout = stdout().lock();
    for line in block.lines() {
        writeln!(stdout, "{line}").ok();
    }
    stdout.flush().ok();
}

/// Prefix color per module. Browser output gets its own pair so it stands
/// apart from wasmdev's own lines.
fn colorize_prefix(module: &str, module_lower: &str) -> String {
    let prefix = format!("[{module}]");
    match module_lower {
        "serve" | "ws" => prefix.bright_blue().bold().to_string(),
        "watch" => prefix.bright_green().bold().to_string(),
        "error" | "stderr" => prefix.bright_red().bold().to_string(),
        "build" => prefix.bright_magenta().bold().to_string(),
        "test" => prefix.bright_cyan().bold().to_string(),
        "stdout" => prefix.dimmed().to_string(),
        _ => prefix.bright_yellow().bold().to_string(),
    }
}

// ============================================================================
// Build status block
// ============================================================================

/// Current time as UTC `HH:MM:SS`.
fn now() -> String {
    use std::time::SystemTime;
    let secs = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    format!("{:02}:{:02}:{:02}", (secs / 3600) % 24, (secs / 60) % 60, secs % 60)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StatusKind {
    Pending,
    Success,
    Failure,
}

impl StatusKind {
    fn symbol(self) -> Option<String> {
        match self {
            Self::Pending => None,
            Self::Success => Some("✓".green().to_string()),
            Self::Failure => Some("✗".red().to_string()),
        }
    }
}

/// The block of lines describing the latest build.
///
/// Each update moves the cursor back over the previous block and clears it.
/// `log!` output printed in between is not tracked, so [`detach`] must be
/// called before anything else is expected to stay on screen.
///
/// [`detach`]: StatusBlock::detach
pub struct StatusBlock {
    /// Lines written by the previous update
    last_lines: usize,
}

static STATUS: Mutex<StatusBlock> = Mutex::new(StatusBlock::new());

impl StatusBlock {
    pub const fn new() -> Self {
        Self { last_lines: 0 }
    }

    fn update(&mut self, kind: StatusKind, message: &str) {
        let mut stdout = stdout().lock();

        if self.last_lines > 0 {
            let lines = u16::try_from(self.last_lines).unwrap_or(u16::MAX);
            execute!(stdout, cursor::MoveUp(lines), Clear(ClearType::FromCursorDown)).ok();
        }

        let timestamp = format!("[{}]", now()).dimmed().to_string();
        let line = match kind.symbol() {
            Some(symbol) => format!("{timestamp} {symbol} {message}"),
            None => format!("{timestamp} {}", message.dimmed()),
        };
        writeln!(stdout, "{line}").ok();
        stdout.flush().ok();

        self.last_lines = line_count(message);
    }

    /// Leave the current block on screen.
    pub fn detach(&mut self) {
        self.last_lines = 0;
    }
}

fn line_count(message: &str) -> usize {
    message.matches('\n').count() + 1
}

pub fn status_success(message: &str) {
    STATUS.lock().update(StatusKind::Success, message);
}

pub fn status_pending(message: &str) {
    STATUS.lock().update(StatusKind::Pending, message);
}

/// Failure summary with the compiler output (or error) underneath.
pub fn status_error(summary: &str, detail: &str) {
    let message = if detail.is_empty() {
        summary.to_string()
    } else {
        format!("{summary}\n{detail}")
    };
    STATUS.lock().update(StatusKind::Failure, &message);
}

pub fn status_detach() {
    STATUS.lock().detach();
}

// ============================================================================
// Tests
// ============================================================================
