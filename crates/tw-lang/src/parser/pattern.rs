use regex::{Regex, RegexBuilder};

use crate::limits::{MAX_REGEX_BYTES, MAX_REGEX_NEST};

/// Validate and compile a `matches` pattern. The regex engine never
/// backtracks; the nest and size limits bound compile cost. On failure the
/// returned reason is unsanitized.
pub(super) fn compile_pattern(source: &str) -> Result<Regex, String> {
    regex_syntax::ParserBuilder::new()
        .nest_limit(MAX_REGEX_NEST)
        .build()
        .parse(source)
        .map_err(|e| {
            // the rendering repeats the pattern; keep only the reason line
            let text = e.to_string();
            text.lines()
                .rev()
                .find(|l| !l.trim().is_empty())
                .unwrap_or("invalid pattern")
                .trim_start_matches("error: ")
                .to_string()
        })?;
    RegexBuilder::new(source)
        .size_limit(MAX_REGEX_BYTES)
        .dfa_size_limit(MAX_REGEX_BYTES)
        .build()
        .map_err(|e| match e {
            regex::Error::CompiledTooBig(limit) => {
                format!("pattern compiles to more than {limit} bytes")
            }
            _ => "pattern could not be compiled".to_string(),
        })
}
