//! Stack-trace parsing for browser engines and WASI runtimes.
//!
//! Every engine prints frames differently:
//!
//! | Format           | Frame shape                                         |
//! |------------------|-----------------------------------------------------|
//! | `V8`             | `at symbol (location)` / `at location`              |
//! | `SpiderMonkey`   | `symbol@location`                                   |
//! | `JavaScriptCore` | `<?>.wasm-function[symbol]@[wasm code]`, `symbol@location` |
//! | `WasmRuntime`    | `N: 0xOFFSET - module!symbol` (+ `at file:line:col`) |
//!
//! Lines that match nothing are dropped. Frame order is preserved.

use std::sync::OnceLock;

use owo_colors::OwoColorize;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::demangle::demangle;

/// Symbol shown for frames without a function name.
const ANONYMOUS: &str = "<anonymous>";

/// Where a frame's code lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FrameKind {
    Script,
    CompiledModule,
}

/// One parsed stack frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackTraceItem {
    pub symbol: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub kind: FrameKind,
}

impl StackTraceItem {
    fn script(symbol: &str, location: Option<&str>) -> Self {
        Self {
            symbol: non_empty_symbol(symbol),
            location: location.map(str::to_string),
            kind: FrameKind::Script,
        }
    }

    fn compiled(symbol: &str, location: Option<&str>) -> Self {
        Self {
            symbol: demangle(&non_empty_symbol(symbol)),
            location: location.map(str::to_string),
            kind: FrameKind::CompiledModule,
        }
    }
}

fn non_empty_symbol(symbol: &str) -> String {
    let symbol = symbol.trim();
    if symbol.is_empty() {
        ANONYMOUS.to_string()
    } else {
        symbol.to_string()
    }
}

/// Textual stack-trace format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceFormat {
    /// Chrome, Edge, Node
    V8,
    /// Firefox
    SpiderMonkey,
    /// Safari
    JavaScriptCore,
    /// wasmtime / wasmer backtraces
    WasmRuntime,
}

impl TraceFormat {
    /// Infer the engine from a browser `User-Agent` header.
    pub fn from_user_agent(user_agent: &str) -> Option<Self> {
        if user_agent.contains("Firefox/") {
            Some(Self::SpiderMonkey)
        } else if ["Chrome/", "Chromium/", "Edg/", "Node"]
            .iter()
            .any(|m| user_agent.contains(m))
        {
            Some(Self::V8)
        } else if user_agent.contains("Safari/") || user_agent.contains("AppleWebKit") {
            Some(Self::JavaScriptCore)
        } else {
            None
        }
    }

    /// Guess the format from the trace text itself.
    pub fn detect(text: &str) -> Self {
        if text.contains("wasm backtrace") || text.lines().any(|l| wasmtime_frame().is_match(l)) {
            Self::WasmRuntime
        } else if text.lines().any(|l| l.trim_start().starts_with("at ")) {
            Self::V8
        } else if text.contains("@[wasm code]") || text.contains("@[native code]") {
            Self::JavaScriptCore
        } else {
            Self::SpiderMonkey
        }
    }
}

// ============================================================================
// Patterns
// ============================================================================

fn v8_frame() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(.+?) \((.+)\)$").unwrap())
}

fn spidermonkey_frame() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(.*?)@(.+)$").unwrap())
}

fn jsc_wasm_frame() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^<\?>\.wasm-function\[(.+)\]@\[wasm code\]$").unwrap())
}

fn jsc_frame() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(.+?)(?:@(\[(?:native|wasm) code\]|.+))?$").unwrap())
}

fn wasmtime_frame() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*\d+:\s+(0x[0-9a-fA-F]+) - (?:([^!\s]+)!)?(.+)$").unwrap()
    })
}

fn source_location() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*at (\S+:\d+(?::\d+)?)$").unwrap())
}

fn is_wasm_location(location: &str) -> bool {
    location.starts_with("wasm://")
        || location.contains("wasm-function[")
        || location.contains("WebAssembly.instantiate")
        || location.contains(".wasm[")
}

// ============================================================================
// Parsing
// ============================================================================

/// Parse raw stack-trace text in the given format.
pub fn parse_stack_trace(text: &str, format: TraceFormat) -> Vec<StackTraceItem> {
    let mut items: Vec<StackTraceItem> = Vec::new();

    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let item = match format {
            TraceFormat::V8 => parse_v8(trimmed),
            TraceFormat::SpiderMonkey => parse_spidermonkey(trimmed),
            TraceFormat::JavaScriptCore => parse_jsc(trimmed),
            TraceFormat::WasmRuntime => {
                // `at file:line:col` continues the previous runtime frame
                if let Some(caps) = source_location().captures(line)
                    && let Some(last) = items.last_mut()
                    && last.kind == FrameKind::CompiledModule
                {
                    last.location = Some(caps[1].to_string());
                    continue;
                }
                parse_wasm_runtime(line)
            }
        };

        if let Some(item) = item {
            items.push(item);
        }
    }

    items
}

fn parse_v8(line: &str) -> Option<StackTraceItem> {
    let rest = line.strip_prefix("at ")?;
    let rest = rest.strip_prefix("async ").unwrap_or(rest);

    let (symbol, location) = match v8_frame().captures(rest) {
        Some(caps) => (
            caps.get(1).map_or("", |m| m.as_str()),
            caps.get(2).map_or("", |m| m.as_str()),
        ),
        None => ("", rest),
    };

    if is_wasm_location(location) {
        // `module.wasm.$symbol` -> `$symbol`
        let symbol = match symbol.rsplit_once(".$") {
            Some((_, name)) => format!("${name}"),
            None => symbol.to_string(),
        };
        Some(StackTraceItem::compiled(&symbol, Some(location)))
    } else {
        Some(StackTraceItem::script(symbol, Some(location)))
    }
}

fn parse_spidermonkey(line: &str) -> Option<StackTraceItem> {
    let caps = spidermonkey_frame().captures(line)?;
    let symbol = caps.get(1).map_or("", |m| m.as_str());
    let location = caps.get(2).map_or("", |m| m.as_str());

    if is_wasm_location(location) {
        let location = location
            .split_once("WebAssembly.instantiate:")
            .map_or(location, |(_, rest)| rest);
        Some(StackTraceItem::compiled(symbol, Some(location)))
    } else {
        Some(StackTraceItem::script(symbol, Some(location)))
    }
}

fn parse_jsc(line: &str) -> Option<StackTraceItem> {
    if let Some(caps) = jsc_wasm_frame().captures(line) {
        return Some(StackTraceItem::compiled(&caps[1], None));
    }

    let caps = jsc_frame().captures(line)?;
    let symbol = caps.get(1).map_or("", |m| m.as_str());
    match caps.get(2).map(|m| m.as_str()) {
        Some("[wasm code]") => Some(StackTraceItem::compiled(symbol, None)),
        Some("[native code]") | None => Some(StackTraceItem::script(symbol, None)),
        Some(location) => Some(StackTraceItem::script(symbol, Some(location))),
    }
}

fn parse_wasm_runtime(line: &str) -> Option<StackTraceItem> {
    if let Some(caps) = wasmtime_frame().captures(line) {
        let offset = &caps[1];
        let location = match caps.get(2) {
            Some(module) => format!("{}@{}", module.as_str(), offset),
            None => offset.to_string(),
        };
        let symbol = caps[3].trim();
        let symbol = if symbol == "<unknown>" { "" } else { symbol };
        return Some(StackTraceItem::compiled(symbol, Some(&location)));
    }

    // wasmer prints V8-style frames with `module.wasm[index]:0xoffset` locations
    let item = parse_v8(line.trim())?;
    (item.kind == FrameKind::CompiledModule).then_some(item)
}

// ============================================================================
// Rendering
// ============================================================================

/// Render parsed frames for the terminal.
pub fn render_stack_trace(items: &[StackTraceItem]) -> String {
    let mut out = String::new();
    for item in items {
        let tag = match item.kind {
            FrameKind::CompiledModule => format!("{}", "wasm".magenta()),
            FrameKind::Script => format!("{}", "js  ".dimmed()),
        };
        out.push_str(&format!("  {} {}\n", tag, item.symbol.bold()));
        if let Some(location) = &item.location {
            out.push_str(&format!("         {} {}\n", "at".dimmed(), location.dimmed()));
        }
    }
    out
}

/// Render a trace that could not be parsed, asking the user to report it.
pub fn render_unparsed(text: &str) -> String {
    format!(
        "{}\n{}\n{}",
        "could not parse this stack trace, printing it as-is:".yellow(),
        text.trim_end(),
        "please file an issue with the trace above attached so the format can be supported".dimmed()
    )
}

/// Parse and render, falling back to the raw text when nothing parses.
pub fn format_stack_trace(text: &str, format: TraceFormat) -> String {
    let items = parse_stack_trace(text, format);
    if items.is_empty() {
        render_unparsed(text)
    } else {
        render_stack_trace(&items)
    }
}

// ============================================================================
// tests
// ============================================================================
