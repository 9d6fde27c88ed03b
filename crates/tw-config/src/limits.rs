use serde::{Deserialize, Serialize};
use tw_lang::CompileLimits;
use tw_lang::limits::{
    MAX_DEPTH, MAX_IDENTIFIER_CHARS, MAX_SOURCE_BYTES, MAX_STRING_BYTES, PARSE_TIMEOUT,
};

use crate::types::{ByteSize, HumanDuration};

/// `[limits]`: rule compilation limits.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_source_bytes: ByteSize,
    pub max_string_bytes: ByteSize,
    pub max_identifier_chars: usize,
    pub max_depth: usize,
    pub parse_timeout: HumanDuration,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_source_bytes: ByteSize::from(MAX_SOURCE_BYTES),
            max_string_bytes: ByteSize::from(MAX_STRING_BYTES),
            max_identifier_chars: MAX_IDENTIFIER_CHARS,
            max_depth: MAX_DEPTH,
            parse_timeout: HumanDuration::from(PARSE_TIMEOUT),
        }
    }
}

impl LimitsConfig {
    pub fn to_compile_limits(&self) -> CompileLimits {
        CompileLimits {
            max_source_bytes: self.max_source_bytes.as_bytes(),
            max_string_bytes: self.max_string_bytes.as_bytes(),
            max_identifier_chars: self.max_identifier_chars,
            max_depth: self.max_depth,
            parse_timeout: self.parse_timeout.as_duration(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_compiler_defaults() {
        assert_eq!(LimitsConfig::default().to_compile_limits(), CompileLimits::default());
    }

    #[test]
    fn defaults_render_as_human_units() {
        let d = LimitsConfig::default();
        assert_eq!(d.max_source_bytes.to_string(), "64KB");
        assert_eq!(d.max_string_bytes.to_string(), "10KB");
        assert_eq!(d.parse_timeout.to_string(), "100ms");
    }
}
