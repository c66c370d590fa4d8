//! Push-channel wire messages.
//!
//! Server → client (text frames, JSON):
//!
//! ```text
//! {"kind":"reload"}
//! {"kind":"stackTrace","stackTrace":"<build log>","diagnostics":[...]}
//! ```
//!
//! Client → server:
//!
//! - text frames tagged by `kind`: `stackTrace`, `testRunOutput`,
//!   `testPassed`, `errorReport`
//! - binary frames: little-endian `u16` stream id (`1001` stdout,
//!   `1002` stderr) followed by UTF-8 payload

use serde::{Deserialize, Serialize};

use crate::coordinator::BuildOutcome;
use crate::diagnostics::{Diagnostic, parse_diagnostics};

/// Message pushed to every connected client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum PushMessage {
    Reload,
    StackTrace {
        #[serde(rename = "stackTrace")]
        stack_trace: String,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        diagnostics: Vec<Diagnostic>,
    },
}

impl PushMessage {
    /// Reload on success, the build log (plus parsed diagnostics) on failure.
    pub fn from_outcome(outcome: &BuildOutcome) -> Self {
        if outcome.succeeded {
            Self::Reload
        } else {
            Self::StackTrace {
                stack_trace: outcome.log_text.clone(),
                diagnostics: parse_diagnostics(&outcome.log_text),
            }
        }
    }

    pub fn to_json(&self) -> String {
        // Serializing plain strings and vectors cannot fail
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"kind":"reload"}"#.to_string())
    }
}

/// Event sent by a client.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ClientEvent {
    StackTrace {
        #[serde(rename = "stackTrace")]
        stack_trace: String,
    },
    TestRunOutput {
        #[serde(rename = "testRunOutput")]
        output: String,
    },
    TestPassed,
    ErrorReport {
        #[serde(rename = "errorReport")]
        report: String,
    },
}

impl ClientEvent {
    /// Parse a text frame. Unknown or malformed events are dropped.
    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }
}

/// Stream id of a binary output frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl OutputStream {
    pub const STDOUT_KIND: u16 = 1001;
    pub const STDERR_KIND: u16 = 1002;

    fn from_kind(kind: u16) -> Option<Self> {
        match kind {
            Self::STDOUT_KIND => Some(Self::Stdout),
            Self::STDERR_KIND => Some(Self::Stderr),
            _ => None,
        }
    }
}

/// Program output forwarded by a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputChunk {
    pub stream: OutputStream,
    pub text: String,
}

impl OutputChunk {
    /// Decode a binary frame.
    pub fn decode(frame: &[u8]) -> Option<Self> {
        let (head, payload) = frame.split_first_chunk::<2>()?;
        let stream = OutputStream::from_kind(u16::from_le_bytes(*head))?;
        Some(Self {
            stream,
            text: String::from_utf8_lossy(payload).into_owned(),
        })
    }
}
