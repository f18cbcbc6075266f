//! Regex keyword validation.

use regex::{Regex, RegexBuilder};

/// Upper bound on the compiled program size of a keyword pattern.
///
/// Keeps a hostile pattern such as `\w{1000}{1000}` from allocating
/// unbounded memory at compile time.
pub const PATTERN_SIZE_LIMIT: usize = 1 << 20;

/// Compile a keyword as a regular expression in the default Unicode-aware syntax.
///
/// # Errors
///
/// Returns the compile error if the pattern is syntactically invalid or
/// exceeds [`PATTERN_SIZE_LIMIT`].
pub fn compile_pattern(pattern: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(pattern)
        .size_limit(PATTERN_SIZE_LIMIT)
        .build()
}

/// Returns `true` if `pattern` compiles.
pub fn is_valid_pattern(pattern: &str) -> bool {
    compile_pattern(pattern).is_ok()
}

/// Return the keywords that are not valid patterns, in order.
pub fn invalid_patterns(keywords: &[String]) -> Vec<String> {
    keywords
        .iter()
        .filter(|k| !is_valid_pattern(k))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_patterns_compile() {
        for p in [r"\b错误\d+\b", "(紧急|urgent)", r"@\w+", "订单.*完成", "plain"] {
            assert!(is_valid_pattern(p), "{p} should be valid");
        }
    }

    #[test]
    fn invalid_patterns_are_rejected() {
        for p in ["(", "[a-", "a{2,1}", "*x"] {
            assert!(!is_valid_pattern(p), "{p} should be invalid");
        }
    }

    #[test]
    fn oversized_pattern_is_rejected() {
        assert!(!is_valid_pattern(r"\w{1000}{1000}"));
    }

    #[test]
    fn invalid_patterns_keeps_order() {
        let keywords = vec!["ok".to_string(), "(".to_string(), r"\d+".to_string(), "[".to_string()];
        assert_eq!(invalid_patterns(&keywords), vec!["(", "["]);
    }
}
