use std::fmt;

use serde::Serialize;

use crate::token::ByteSpan;

/// Maximum number of characters of user-controlled text embedded in a
/// diagnostic message.
pub const MAX_FRAGMENT_CHARS: usize = 40;

// ---------------------------------------------------------------------------
// Severity / kind / category
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    SizeLimitExceeded,
    UnexpectedToken,
    UnexpectedChar,
    MissingPrefix,
    UnbalancedParen,
    MissingOperand,
    UnterminatedString,
    InvalidOperator,
    InvalidValue,
    InvalidPattern,
    RecursionLimit,
    ParseTimeout,
    TooManyErrors,
    Lint,
}

impl DiagnosticKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiagnosticKind::SizeLimitExceeded => "size_limit_exceeded",
            DiagnosticKind::UnexpectedToken => "unexpected_token",
            DiagnosticKind::UnexpectedChar => "unexpected_char",
            DiagnosticKind::MissingPrefix => "missing_prefix",
            DiagnosticKind::UnbalancedParen => "unbalanced_paren",
            DiagnosticKind::MissingOperand => "missing_operand",
            DiagnosticKind::UnterminatedString => "unterminated_string",
            DiagnosticKind::InvalidOperator => "invalid_operator",
            DiagnosticKind::InvalidValue => "invalid_value",
            DiagnosticKind::InvalidPattern => "invalid_pattern",
            DiagnosticKind::RecursionLimit => "recursion_limit",
            DiagnosticKind::ParseTimeout => "parse_timeout",
            DiagnosticKind::TooManyErrors => "too_many_errors",
            DiagnosticKind::Lint => "lint",
        }
    }

    /// Rejection category reported to callers.
    pub fn category(&self) -> ErrorCategory {
        match self {
            DiagnosticKind::SizeLimitExceeded => ErrorCategory::SizeLimitExceeded,
            DiagnosticKind::RecursionLimit => ErrorCategory::RecursionLimitExceeded,
            DiagnosticKind::ParseTimeout => ErrorCategory::ParseTimeout,
            _ => ErrorCategory::SyntaxError,
        }
    }
}

/// Why a rule was rejected. Recursion and timeout rejections look like syntax
/// errors to the author but are tracked separately for abuse monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    SyntaxError,
    ParseTimeout,
    RecursionLimitExceeded,
    SizeLimitExceeded,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::SyntaxError => "syntax_error",
            ErrorCategory::ParseTimeout => "parse_timeout",
            ErrorCategory::RecursionLimitExceeded => "recursion_limit_exceeded",
            ErrorCategory::SizeLimitExceeded => "size_limit_exceeded",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Diagnostic
// ---------------------------------------------------------------------------

/// A located compile diagnostic. Positions are 1-based; columns count
/// characters, not bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub severity: Severity,
    pub line: u32,
    pub column: u32,
    pub end_line: u32,
    pub end_column: u32,
    pub message: String,
    pub suggestion: Option<String>,
}

impl Diagnostic {
    pub fn error(kind: DiagnosticKind, span: ByteSpan, index: &LineIndex<'_>, message: String) -> Self {
        Self::new(kind, Severity::Error, span, index, message)
    }

    pub fn warning(span: ByteSpan, index: &LineIndex<'_>, message: String) -> Self {
        Self::new(DiagnosticKind::Lint, Severity::Warning, span, index, message)
    }

    fn new(
        kind: DiagnosticKind,
        severity: Severity,
        span: ByteSpan,
        index: &LineIndex<'_>,
        message: String,
    ) -> Self {
        let (line, column) = index.position(span.start);
        let (end_line, end_column) = index.position(span.end);
        Self {
            kind,
            severity,
            line,
            column,
            end_line,
            end_column,
            message,
            suggestion: None,
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(
            f,
            "{}[{}] {}:{}-{}:{}: {}",
            prefix,
            self.kind.as_str(),
            self.line,
            self.column,
            self.end_line,
            self.end_column,
            self.message
        )?;
        if let Some(s) = &self.suggestion {
            write!(f, " (suggestion: {s})")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Line index
// ---------------------------------------------------------------------------

/// Byte offset → (line, column) lookup, built once per source. Lookups are
/// two binary searches, independent of line length.
pub struct LineIndex<'s> {
    source: &'s str,
    line_starts: Vec<usize>,
    /// `(offset, extra)` for every multi-byte char: its byte offset and the
    /// running total of continuation bytes up to and including it.
    wide_chars: Vec<(usize, usize)>,
}

impl<'s> LineIndex<'s> {
    pub fn new(source: &'s str) -> Self {
        let mut line_starts = vec![0];
        let mut wide_chars = Vec::new();
        let mut extra = 0;
        for (i, c) in source.char_indices() {
            match c {
                '\n' => line_starts.push(i + 1),
                c if c.len_utf8() > 1 => {
                    extra += c.len_utf8() - 1;
                    wide_chars.push((i, extra));
                }
                _ => {}
            }
        }
        Self {
            source,
            line_starts,
            wide_chars,
        }
    }

    pub fn position(&self, offset: usize) -> (u32, u32) {
        let offset = offset.min(self.source.len());
        let line = match self.line_starts.binary_search(&offset) {
            Ok(i) => i,
            Err(i) => i - 1,
        };
        let start = self.line_starts[line];
        // Offsets always come from token boundaries, but clamp to a char
        // boundary anyway so a bad span can never panic.
        let mut end = offset;
        while !self.source.is_char_boundary(end) {
            end -= 1;
        }
        let chars = (end - start) - (self.extra_before(end) - self.extra_before(start));
        (line as u32 + 1, chars as u32 + 1)
    }

    /// Continuation bytes of all chars starting before `offset`.
    fn extra_before(&self, offset: usize) -> usize {
        match self.wide_chars.partition_point(|(at, _)| *at < offset) {
            0 => 0,
            n => self.wide_chars[n - 1].1,
        }
    }

    pub fn source(&self) -> &'s str {
        self.source
    }
}

// ---------------------------------------------------------------------------
// Sanitization
// ---------------------------------------------------------------------------

/// Make user-controlled text safe to embed in a diagnostic message:
/// truncated to [`MAX_FRAGMENT_CHARS`], control characters removed, and
/// HTML-significant characters escaped.
pub fn sanitize_fragment(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len().min(MAX_FRAGMENT_CHARS * 2));
    let mut kept = 0usize;
    for c in raw.chars().filter(|c| !c.is_control()) {
        if kept == MAX_FRAGMENT_CHARS {
            out.push_str("...");
            break;
        }
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            '`' => out.push_str("&#96;"),
            c => out.push(c),
        }
        kept += 1;
    }
    out
}

/// Quote the source text starting at `start` up to the next `)`, `,` or line
/// end, sanitized and wrapped in backticks. Never looks further than one char
/// past [`MAX_FRAGMENT_CHARS`].
pub fn excerpt_at(source: &str, start: usize) -> String {
    let rest = source.get(start..).unwrap_or("");
    let end = rest
        .char_indices()
        .take(MAX_FRAGMENT_CHARS + 2)
        .enumerate()
        .find(|&(n, (_, c))| n > MAX_FRAGMENT_CHARS || (n > 0 && matches!(c, ')' | ',' | '\n')))
        .map(|(_, (i, _))| i)
        .unwrap_or(rest.len());
    format!("`{}`", sanitize_fragment(&rest[..end]))
}
