//! Rule source → token stream.
//!
//! Single forward pass, no backtracking beyond one segment of lookahead, so
//! lexing is linear in the input length. Size limits abort immediately; all
//! other problems are recorded as diagnostics and lexing continues.

use std::fmt;

use winnow::ascii::multispace0;
use winnow::combinator::{opt, preceded};
use winnow::error::{ContextError, ErrMode};
use winnow::prelude::*;
use winnow::token::{literal, take_till, take_while};

use crate::diagnostic::{Diagnostic, DiagnosticKind, LineIndex, excerpt_at, sanitize_fragment};
use crate::limits::{CompileLimits, MAX_LEX_DIAGNOSTICS};
use crate::token::{ByteSpan, Token, TokenKind, keyword};

#[cfg(test)]
mod tests;

// ---------------------------------------------------------------------------
// Errors and output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeLimit {
    Source,
    StringLiteral,
    Identifier,
}

impl SizeLimit {
    fn unit(&self) -> &'static str {
        match self {
            SizeLimit::Identifier => "characters",
            _ => "bytes",
        }
    }
}

impl fmt::Display for SizeLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SizeLimit::Source => "rule source",
            SizeLimit::StringLiteral => "string literal",
            SizeLimit::Identifier => "identifier",
        };
        f.write_str(name)
    }
}

/// A size limit was hit. `start..end` are byte offsets of the offending text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{limit} is {actual} {}, exceeding the limit of {max}", .limit.unit())]
pub struct SizeExceeded {
    pub limit: SizeLimit,
    pub max: usize,
    pub actual: usize,
    pub start: usize,
    pub end: usize,
}

impl SizeExceeded {
    pub fn to_diagnostic(&self, index: &LineIndex<'_>) -> Diagnostic {
        let span = ByteSpan::new(self.start, self.end);
        let (message, suggestion) = match self.limit {
            SizeLimit::Source => (
                format!(
                    "rule source is {} bytes, exceeding the {}-byte limit",
                    self.actual, self.max
                ),
                "split the rule into several smaller rules",
            ),
            SizeLimit::StringLiteral => (
                format!(
                    "string literal starting at {} is longer than {} bytes",
                    excerpt_at(index.source(), self.start),
                    self.max
                ),
                "shorten the literal",
            ),
            SizeLimit::Identifier => (
                format!(
                    "identifier {} is {} characters, exceeding the {}-character limit",
                    excerpt_at(index.source(), self.start),
                    self.actual,
                    self.max
                ),
                "use a shorter name, or quote it as a string",
            ),
        };
        Diagnostic::error(DiagnosticKind::SizeLimitExceeded, span, index, message)
            .with_suggestion(suggestion)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Lexed {
    pub tokens: Vec<Token>,
    pub diagnostics: Vec<Diagnostic>,
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Tokenize `source`. The returned token list always ends with `Eof`.
pub fn tokenize(source: &str, limits: &CompileLimits) -> Result<Lexed, SizeExceeded> {
    if source.len() > limits.max_source_bytes {
        return Err(SizeExceeded {
            limit: SizeLimit::Source,
            max: limits.max_source_bytes,
            actual: source.len(),
            start: limits.max_source_bytes,
            end: source.len(),
        });
    }
    let mut lexer = Lexer {
        source,
        input: source,
        limits,
        index: LineIndex::new(source),
        out: Lexed::default(),
        suppressed: 0,
    };
    lexer.run()?;
    Ok(lexer.out)
}

struct Lexer<'s, 'l> {
    source: &'s str,
    input: &'s str,
    limits: &'l CompileLimits,
    index: LineIndex<'s>,
    out: Lexed,
    suppressed: usize,
}

impl<'s> Lexer<'s, '_> {
    fn offset(&self) -> usize {
        self.source.len() - self.input.len()
    }

    fn push(&mut self, kind: TokenKind, start: usize) {
        let span = ByteSpan::new(start, self.offset());
        self.out.tokens.push(Token { kind, span });
    }

    fn report(&mut self, kind: DiagnosticKind, start: usize, message: String, suggestion: Option<&str>) {
        if self.out.diagnostics.len() >= MAX_LEX_DIAGNOSTICS {
            self.suppressed += 1;
            return;
        }
        let span = ByteSpan::new(start, self.offset().max(start + 1).min(self.source.len()));
        let mut diag = Diagnostic::error(kind, span, &self.index, message);
        if let Some(s) = suggestion {
            diag = diag.with_suggestion(s);
        }
        self.out.diagnostics.push(diag);
    }

    fn summarize_suppressed(&mut self, at: usize) {
        if self.suppressed == 0 {
            return;
        }
        let message = format!(
            "{} more lexical errors not shown (limit {MAX_LEX_DIAGNOSTICS})",
            self.suppressed
        );
        let diag = Diagnostic::error(DiagnosticKind::TooManyErrors, ByteSpan::new(at, at), &self.index, message)
            .with_suggestion("fix the reported errors first");
        self.out.diagnostics.push(diag);
    }

    fn run(&mut self) -> Result<(), SizeExceeded> {
        loop {
            // trivia parsers accept empty input and cannot fail
            let _ = skip_trivia(&mut self.input);
            let start = self.offset();
            let Some(c) = self.input.chars().next() else {
                self.summarize_suppressed(start);
                self.push(TokenKind::Eof, start);
                return Ok(());
            };
            match c {
                '"' => self.string(start)?,
                c if c.is_ascii_digit() => self.number(start),
                '-' if self.input[1..].starts_with(|c: char| c.is_ascii_digit()) => self.number(start),
                c if is_ident_start(c) => self.word(start)?,
                _ => self.operator_or_punct(c, start),
            }
        }
    }

    // -- words --------------------------------------------------------------

    fn word(&mut self, start: usize) -> Result<(), SizeExceeded> {
        let text = match dotted_word.take().parse_next(&mut self.input) {
            Ok(text) => text,
            Err(_) => {
                // is_ident_start guarantees at least one character
                self.bump_char();
                return Ok(());
            }
        };
        let chars = text.chars().count();
        if chars > self.limits.max_identifier_chars {
            return Err(SizeExceeded {
                limit: SizeLimit::Identifier,
                max: self.limits.max_identifier_chars,
                actual: chars,
                start,
                end: self.offset(),
            });
        }

        if !text.contains('.') {
            let kind = keyword(text).unwrap_or_else(|| TokenKind::Ident(text.to_string()));
            self.push(kind, start);
            return Ok(());
        }

        // `trace.has` and friends: a path led by a keyword is split into its
        // segments so the parser sees the structure.
        let lead = text.split('.').next().unwrap_or_default();
        if keyword(lead).is_some() {
            let mut pos = start;
            for (i, seg) in text.split('.').enumerate() {
                if i > 0 {
                    self.out.tokens.push(Token {
                        kind: TokenKind::Dot,
                        span: ByteSpan::new(pos, pos + 1),
                    });
                    pos += 1;
                }
                let kind = keyword(seg).unwrap_or_else(|| TokenKind::Ident(seg.to_string()));
                self.out.tokens.push(Token {
                    kind,
                    span: ByteSpan::new(pos, pos + seg.len()),
                });
                pos += seg.len();
            }
            return Ok(());
        }

        self.push(TokenKind::Path(text.to_string()), start);
        Ok(())
    }

    // -- numbers ------------------------------------------------------------

    fn number(&mut self, start: usize) {
        let text = number_literal.take().parse_next(&mut self.input).unwrap_or_default();
        match text.parse::<f64>() {
            Ok(n) if n.is_finite() => self.push(TokenKind::Number(n), start),
            _ => {
                if text.is_empty() {
                    self.bump_char();
                }
                let message = format!("invalid number {}", excerpt_at(self.source, start));
                self.report(DiagnosticKind::InvalidValue, start, message, None);
            }
        }
    }

    // -- strings ------------------------------------------------------------

    fn string(&mut self, start: usize) -> Result<(), SizeExceeded> {
        self.input = &self.input[1..];
        let mut value = String::new();
        loop {
            let chunk = take_till::<_, _, ContextError>(0.., ['"', '\\', '\n'])
                .parse_next(&mut self.input)
                .unwrap_or_default();
            value.push_str(chunk);
            self.check_string_len(&value, start)?;

            match self.input.chars().next() {
                Some('"') => {
                    self.input = &self.input[1..];
                    self.push(TokenKind::Str(value), start);
                    return Ok(());
                }
                Some('\\') => {
                    let escape_at = self.offset();
                    self.input = &self.input[1..];
                    match self.input.chars().next() {
                        Some('"') => value.push('"'),
                        Some('\\') => value.push('\\'),
                        Some('n') => value.push('\n'),
                        Some('t') => value.push('\t'),
                        Some('\n') | None => continue,
                        Some(other) => {
                            value.push(other);
                            let message = format!(
                                "unknown escape sequence `\\{}`",
                                sanitize_fragment(&other.to_string())
                            );
                            self.bump_char();
                            self.report(
                                DiagnosticKind::InvalidValue,
                                escape_at,
                                message,
                                Some("supported escapes are \\\", \\\\, \\n and \\t"),
                            );
                            continue;
                        }
                    }
                    self.bump_char();
                }
                // newline or end of input
                _ => {
                    self.report(
                        DiagnosticKind::UnterminatedString,
                        start,
                        "unterminated string literal".to_string(),
                        Some("add a closing '\"' before the end of the line"),
                    );
                    self.push(TokenKind::Str(value), start);
                    return Ok(());
                }
            }
        }
    }

    fn check_string_len(&self, value: &str, start: usize) -> Result<(), SizeExceeded> {
        if value.len() > self.limits.max_string_bytes {
            return Err(SizeExceeded {
                limit: SizeLimit::StringLiteral,
                max: self.limits.max_string_bytes,
                actual: value.len(),
                start,
                end: self.offset(),
            });
        }
        Ok(())
    }

    // -- operators and punctuation -------------------------------------------

    fn operator_or_punct(&mut self, c: char, start: usize) {
        let two = self.input.get(..2).unwrap_or("");
        let (kind, len) = match two {
            "==" => (Some(TokenKind::Eq), 2),
            "!=" => (Some(TokenKind::Ne), 2),
            ">=" => (Some(TokenKind::Ge), 2),
            "<=" => (Some(TokenKind::Le), 2),
            "&&" | "||" => (None, 2),
            _ => match c {
                '>' => (Some(TokenKind::Gt), 1),
                '<' => (Some(TokenKind::Lt), 1),
                '(' => (Some(TokenKind::LParen), 1),
                ')' => (Some(TokenKind::RParen), 1),
                '[' => (Some(TokenKind::LBracket), 1),
                ']' => (Some(TokenKind::RBracket), 1),
                ',' => (Some(TokenKind::Comma), 1),
                '.' => (Some(TokenKind::Dot), 1),
                _ => (None, c.len_utf8()),
            },
        };
        self.input = &self.input[len..];

        if let Some(kind) = kind {
            self.push(kind, start);
            return;
        }
        match (two, c) {
            ("&&", _) => {
                self.report(
                    DiagnosticKind::InvalidOperator,
                    start,
                    format!("invalid operator `{}`", sanitize_fragment(two)),
                    Some("use 'and' to combine conditions"),
                );
                self.push(TokenKind::And, start);
            }
            ("||", _) => {
                self.report(
                    DiagnosticKind::InvalidOperator,
                    start,
                    "invalid operator `||`".to_string(),
                    Some("use 'or' to combine conditions"),
                );
                self.push(TokenKind::Or, start);
            }
            (_, '=') => {
                self.report(
                    DiagnosticKind::InvalidOperator,
                    start,
                    "invalid operator `=`".to_string(),
                    Some("use '==' for equality"),
                );
                self.push(TokenKind::Eq, start);
            }
            (_, '!') => {
                self.report(
                    DiagnosticKind::InvalidOperator,
                    start,
                    "invalid operator `!`".to_string(),
                    Some("use 'not' for negation or '!=' for inequality"),
                );
                self.push(TokenKind::Not, start);
            }
            _ => {
                let message = format!(
                    "unexpected character `{}`",
                    sanitize_fragment(&c.to_string())
                );
                self.report(DiagnosticKind::UnexpectedChar, start, message, None);
            }
        }
    }

    fn bump_char(&mut self) {
        if let Some(c) = self.input.chars().next() {
            self.input = &self.input[c.len_utf8()..];
        }
    }
}

// ---------------------------------------------------------------------------
// Primitives
// ---------------------------------------------------------------------------

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn ident_segment<'a>(input: &mut &'a str) -> ModalResult<&'a str> {
    if !input.starts_with(is_ident_start) {
        return Err(ErrMode::Backtrack(ContextError::new()));
    }
    take_while(1.., is_ident_continue).parse_next(input)
}

/// `seg ("." seg)*`; a trailing dot is left in the input.
fn dotted_word(input: &mut &str) -> ModalResult<()> {
    ident_segment.parse_next(input)?;
    while opt(preceded(literal("."), ident_segment))
        .parse_next(input)?
        .is_some()
    {}
    Ok(())
}

fn number_literal(input: &mut &str) -> ModalResult<()> {
    opt(literal("-")).parse_next(input)?;
    take_while(1.., |c: char| c.is_ascii_digit()).parse_next(input)?;
    opt(preceded(
        literal("."),
        take_while(1.., |c: char| c.is_ascii_digit()),
    ))
    .parse_next(input)?;
    Ok(())
}

/// Skip whitespace and `// ...` line comments.
fn skip_trivia(input: &mut &str) -> ModalResult<()> {
    loop {
        multispace0.parse_next(input)?;
        if opt(literal("//")).parse_next(input)?.is_none() {
            return Ok(());
        }
        take_till(0.., '\n').parse_next(input)?;
    }
}
