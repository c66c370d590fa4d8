//! Counted nouns for status lines ("1 error", "3 warnings").

/// `""` for one, `"s"` otherwise.
pub fn plural_s(n: usize) -> &'static str {
    if n == 1 { "" } else { "s" }
}

pub fn plural_count(count: usize, noun: &str) -> String {
    format!("{count} {noun}{}", plural_s(count))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts() {
        assert_eq!(plural_count(0, "error"), "0 errors");
        assert_eq!(plural_count(1, "warning"), "1 warning");
        assert_eq!(plural_count(2, "file"), "2 files");
    }
}
