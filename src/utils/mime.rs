//! Content types for what the dev server hands to browsers.
//!
//! Covers the generated pages, the wasm artifact and the usual contents of a
//! resource directory. Anything else is served as `application/octet-stream`.

use std::path::Path;

pub mod types {
    pub const HTML: &str = "text/html; charset=utf-8";
    pub const PLAIN: &str = "text/plain; charset=utf-8";
    pub const CSS: &str = "text/css; charset=utf-8";
    pub const JAVASCRIPT: &str = "text/javascript; charset=utf-8";
    pub const JSON: &str = "application/json";
    pub const WASM: &str = "application/wasm";
    pub const OCTET_STREAM: &str = "application/octet-stream";
}

/// Extension (lowercase) to content type.
const TABLE: &[(&[&str], &str)] = &[
    (&["html", "htm"], types::HTML),
    (&["js", "mjs", "cjs"], types::JAVASCRIPT),
    (&["wasm"], types::WASM),
    (&["css"], types::CSS),
    (&["json", "map", "webmanifest"], types::JSON),
    (&["txt", "wat", "wit"], types::PLAIN),
    (&["svg"], "image/svg+xml"),
    (&["png"], "image/png"),
    (&["jpg", "jpeg"], "image/jpeg"),
    (&["gif"], "image/gif"),
    (&["webp"], "image/webp"),
    (&["ico"], "image/x-icon"),
    (&["woff"], "font/woff"),
    (&["woff2"], "font/woff2"),
    (&["ttf"], "font/ttf"),
    (&["otf"], "font/otf"),
];

/// Content type for a file, by extension.
pub fn from_path(path: &Path) -> &'static str {
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return types::OCTET_STREAM;
    };
    let ext = ext.to_ascii_lowercase();
    TABLE
        .iter()
        .find(|(exts, _)| exts.contains(&ext.as_str()))
        .map_or(types::OCTET_STREAM, |(_, mime)| mime)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_served_files() {
        assert_eq!(from_path(Path::new("index.html")), types::HTML);
        assert_eq!(from_path(Path::new("dev.js")), types::JAVASCRIPT);
        assert_eq!(from_path(Path::new("harness.mjs")), types::JAVASCRIPT);
        assert_eq!(from_path(Path::new("target/app.wasm")), types::WASM);
        assert_eq!(from_path(Path::new("static/LOGO.PNG")), "image/png");
    }

    #[test]
    fn test_unknown_is_octet_stream() {
        assert_eq!(from_path(Path::new("data.xyz")), types::OCTET_STREAM);
        assert_eq!(from_path(Path::new("Makefile")), types::OCTET_STREAM);
    }
}
