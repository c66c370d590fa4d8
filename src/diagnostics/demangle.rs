//! Rust symbol demangling for compiled-module stack frames.

/// Demangle a Rust symbol (legacy `_ZN…E` or v0 `_R…`).
///
/// Browsers prefix name-section symbols with `$`; that prefix is ignored.
/// Anything that is not a valid mangled name is returned unchanged.
pub fn demangle(symbol: &str) -> String {
    let candidate = symbol.strip_prefix('$').unwrap_or(symbol);
    match rustc_demangle::try_demangle(candidate) {
        // `{:#}` drops the trailing `::h0123abcd` hash
        Ok(demangled) => format!("{demangled:#}"),
        Err(_) => symbol.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demangle_legacy() {
        assert_eq!(
            demangle("_ZN4core9panicking5panic17h2f5b3a8b6bcd4e1aE"),
            "core::panicking::panic"
        );
    }

    #[test]
    fn test_demangle_strips_browser_prefix() {
        assert_eq!(demangle("$_ZN3app4main17h0123456789abcdefE"), "app::main");
    }

    #[test]
    fn test_invalid_input_unchanged() {
        assert_eq!(demangle("main"), "main");
        assert_eq!(demangle("$func42"), "$func42");
        assert_eq!(demangle(""), "");
    }

    #[test]
    fn test_demangle_is_idempotent() {
        let once = demangle("_ZN3app4main17h0123456789abcdefE");
        assert_eq!(demangle(&once), once);
    }
}
