use std::time::Duration;

/// Maximum rule source size in bytes.
pub const MAX_SOURCE_BYTES: usize = 64 * 1024;
/// Maximum decoded length of a single string literal, in bytes.
pub const MAX_STRING_BYTES: usize = 10 * 1024;
/// Maximum identifier (or dotted path) length, in characters.
pub const MAX_IDENTIFIER_CHARS: usize = 100;
/// Maximum number of nested parser frames.
pub const MAX_DEPTH: usize = 100;
/// Lexical errors recorded per rule before the rest are summarized.
pub const MAX_LEX_DIAGNOSTICS: usize = 100;
/// Wall-clock budget for parsing a single rule.
pub const PARSE_TIMEOUT: Duration = Duration::from_millis(100);

/// Nesting limit handed to the regex parser for `matches` patterns.
pub const MAX_REGEX_NEST: u32 = 50;
/// Compiled program / lazy DFA budget for `matches` patterns.
pub const MAX_REGEX_BYTES: usize = 1 << 20;

/// Limits applied while compiling one rule.
///
/// The defaults are the production limits; tests and the config layer may
/// tighten or relax them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompileLimits {
    pub max_source_bytes: usize,
    pub max_string_bytes: usize,
    pub max_identifier_chars: usize,
    pub max_depth: usize,
    pub parse_timeout: Duration,
}

impl Default for CompileLimits {
    fn default() -> Self {
        Self {
            max_source_bytes: MAX_SOURCE_BYTES,
            max_string_bytes: MAX_STRING_BYTES,
            max_identifier_chars: MAX_IDENTIFIER_CHARS,
            max_depth: MAX_DEPTH,
            parse_timeout: PARSE_TIMEOUT,
        }
    }
}
