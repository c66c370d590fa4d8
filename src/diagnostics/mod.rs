//! Diagnostics and stack-trace processing.
//!
//! Best-effort enrichment of raw tool output: anything that does not parse
//! is dropped, never reported as an error.
//!
//! - [`compiler`]: rustc diagnostics (parse, de-duplicate, group, render)
//! - [`stacktrace`]: browser / runtime stack traces into `StackTraceItem`s
//! - [`demangle`]: Rust symbol demangling
//! - [`report`]: libtest output into a [`TestReport`]

pub mod compiler;
pub mod demangle;
pub mod report;
pub mod stacktrace;

pub use compiler::{Diagnostic, parse_diagnostics, render_diagnostics};
pub use report::TestReport;
pub use stacktrace::{TraceFormat, format_stack_trace};
