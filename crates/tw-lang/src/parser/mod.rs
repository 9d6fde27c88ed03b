//! Recursive-descent parser over the token stream.
//!
//! ```text
//! rule       := or_expr EOF
//! or_expr    := and_expr ("or" and_expr)*
//! and_expr   := term ("and" term)*
//! term       := "not" term | "(" or_expr ")" | span_check
//! span_check := "trace" "." ("has" | "count") "(" name ")" where* [cmp number]
//! where      := "." "where" "(" name cmp literal ")"
//! ```
//!
//! Syntax errors are recorded and the parser resynchronizes at the next
//! top-level `and`/`or` so one pass reports every independent problem.
//! Recursion-limit and timeout errors abort the whole parse.

mod guard;
mod pattern;

#[cfg(test)]
mod tests;

use std::cell::Cell;
use std::rc::Rc;
use std::time::Instant;

use crate::ast::{CmpOp, Expr, Literal, LogicOp, OperationPattern, Pattern, WhereClause};
use crate::diagnostic::{Diagnostic, DiagnosticKind, LineIndex, excerpt_at, sanitize_fragment};
use crate::limits::CompileLimits;
use crate::token::{ByteSpan, Token, TokenKind};

use guard::DepthGuard;
use pattern::compile_pattern;

const START_HINT: &str = "expression must start with trace.has(...) or trace.count(...)";
const VALID_OPERATORS: &str = "Valid operators: ==, !=, >, >=, <, <=, in, matches";
const COMBINE_HINT: &str = "combine conditions with 'and' or 'or'";

static EOF_TOKEN: Token = Token {
    kind: TokenKind::Eof,
    span: ByteSpan { start: 0, end: 0 },
};

/// Largest count literal that survives the f64 round trip exactly.
const MAX_COUNT_LITERAL: f64 = 9_007_199_254_740_992.0;

/// Parse a token stream produced by [`crate::tokenize`]. Returns the tree
/// only when no error diagnostics were produced.
pub fn parse_tokens(
    source: &str,
    tokens: &[Token],
    limits: &CompileLimits,
) -> (Option<Expr>, Vec<Diagnostic>) {
    let mut parser = Parser {
        source,
        tokens,
        pos: 0,
        index: LineIndex::new(source),
        limits,
        started: Instant::now(),
        depth: Rc::new(Cell::new(0)),
        diagnostics: Vec::new(),
    };
    let expr = match parser.rule() {
        Ok(expr) if !parser.diagnostics.iter().any(Diagnostic::is_error) => expr,
        _ => None,
    };
    (expr, parser.diagnostics)
}

// ---------------------------------------------------------------------------
// Parser state
// ---------------------------------------------------------------------------

/// Why a production stopped. A diagnostic has already been recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Abort {
    /// Recoverable: the caller resynchronizes and keeps parsing.
    Syntax,
    /// Depth or time budget exhausted: unwind to the top.
    Fatal,
}

type PResult<T> = Result<T, Abort>;

struct Parser<'s, 't> {
    source: &'s str,
    tokens: &'t [Token],
    pos: usize,
    index: LineIndex<'s>,
    limits: &'t CompileLimits,
    started: Instant,
    depth: Rc<Cell<usize>>,
    diagnostics: Vec<Diagnostic>,
}

impl Parser<'_, '_> {
    // -- token cursor -------------------------------------------------------

    fn peek(&self) -> &Token {
        self.tokens
            .get(self.pos)
            .or(self.tokens.last())
            .unwrap_or(&EOF_TOKEN)
    }

    fn peek_kind(&self) -> &TokenKind {
        &self.peek().kind
    }

    fn peek_span(&self) -> ByteSpan {
        self.peek().span
    }

    fn at(&self, kind: &TokenKind) -> bool {
        self.peek_kind() == kind
    }

    fn bump(&mut self) -> Token {
        let tok = self.peek().clone();
        if tok.kind != TokenKind::Eof {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.at(kind) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn peek_nth_kind(&self, n: usize) -> Option<&TokenKind> {
        self.tokens.get(self.pos + n).map(|t| &t.kind)
    }

    /// Sanitized description of the current token for messages.
    fn found(&self) -> String {
        let tok = self.peek();
        match tok.kind {
            TokenKind::Eof => "end of input".to_string(),
            _ => excerpt_at(self.source, tok.span.start),
        }
    }

    // -- diagnostics --------------------------------------------------------

    fn error(
        &mut self,
        kind: DiagnosticKind,
        span: ByteSpan,
        message: String,
        suggestion: Option<&str>,
    ) -> Abort {
        let mut diag = Diagnostic::error(kind, span, &self.index, message);
        if let Some(s) = suggestion {
            diag = diag.with_suggestion(s);
        }
        self.diagnostics.push(diag);
        Abort::Syntax
    }

    fn error_here(&mut self, kind: DiagnosticKind, message: String, suggestion: Option<&str>) -> Abort {
        let span = self.peek_span();
        self.error(kind, span, message, suggestion)
    }

    fn fatal(&mut self, kind: DiagnosticKind, message: String, suggestion: &str) -> Abort {
        self.error_here(kind, message, Some(suggestion));
        Abort::Fatal
    }

    fn enter(&mut self) -> PResult<DepthGuard> {
        match DepthGuard::enter(&self.depth, self.limits.max_depth) {
            Some(guard) => Ok(guard),
            None => Err(self.fatal(
                DiagnosticKind::RecursionLimit,
                format!(
                    "expression nesting exceeds the maximum depth of {}",
                    self.limits.max_depth
                ),
                "flatten the expression or split it into several rules",
            )),
        }
    }

    fn check_deadline(&mut self) -> PResult<()> {
        if self.started.elapsed() >= self.limits.parse_timeout {
            return Err(self.fatal(
                DiagnosticKind::ParseTimeout,
                format!(
                    "rule took longer than {}ms to parse",
                    self.limits.parse_timeout.as_millis()
                ),
                "simplify the rule or split it into several rules",
            ));
        }
        Ok(())
    }

    /// Skip to the next `and`/`or`/`)` that is not nested inside parentheses
    /// opened since `start`.
    fn synchronize(&mut self, start: usize) {
        let mut depth = self.tokens[start..self.pos.min(self.tokens.len())]
            .iter()
            .fold(0i64, |d, t| match t.kind {
                TokenKind::LParen => d + 1,
                TokenKind::RParen => d - 1,
                _ => d,
            })
            .max(0);
        loop {
            match self.peek_kind() {
                TokenKind::Eof => return,
                TokenKind::And | TokenKind::Or | TokenKind::RParen if depth == 0 => return,
                TokenKind::RParen => depth -= 1,
                TokenKind::LParen => depth += 1,
                _ => {}
            }
            self.bump();
        }
    }

    // -- expressions --------------------------------------------------------

    fn rule(&mut self) -> PResult<Option<Expr>> {
        if self.at(&TokenKind::Eof) {
            self.error_here(
                DiagnosticKind::MissingOperand,
                "rule is empty".to_string(),
                Some(START_HINT),
            );
            return Ok(None);
        }
        let expr = self.or_expr()?;
        while !self.at(&TokenKind::Eof) {
            if self.at(&TokenKind::RParen) {
                self.error_here(
                    DiagnosticKind::UnbalancedParen,
                    "unmatched ')'".to_string(),
                    Some("remove it or add a matching '('"),
                );
                self.bump();
            } else {
                let message = format!("expected 'and' or 'or', found {}", self.found());
                self.error_here(DiagnosticKind::UnexpectedToken, message, Some(COMBINE_HINT));
                self.bump();
                let pos = self.pos;
                self.synchronize(pos);
            }
            if self.eat(&TokenKind::And) || self.eat(&TokenKind::Or) {
                self.or_expr()?;
            }
        }
        Ok(expr)
    }

    fn or_expr(&mut self) -> PResult<Option<Expr>> {
        let _guard = self.enter()?;
        let mut acc = self.and_expr()?;
        while self.eat(&TokenKind::Or) {
            let rhs = self.and_expr()?;
            acc = combine(LogicOp::Or, acc, rhs);
        }
        Ok(acc)
    }

    fn and_expr(&mut self) -> PResult<Option<Expr>> {
        let mut acc = self.recovering_term()?;
        while self.eat(&TokenKind::And) {
            let rhs = self.recovering_term()?;
            acc = combine(LogicOp::And, acc, rhs);
        }
        Ok(acc)
    }

    /// `term`, turning a syntax error into `None` after resynchronizing.
    fn recovering_term(&mut self) -> PResult<Option<Expr>> {
        let start = self.pos;
        match self.term() {
            Ok(expr) => Ok(Some(expr)),
            Err(Abort::Fatal) => Err(Abort::Fatal),
            Err(Abort::Syntax) => {
                self.synchronize(start);
                Ok(None)
            }
        }
    }

    fn term(&mut self) -> PResult<Expr> {
        let _guard = self.enter()?;
        self.check_deadline()?;
        match self.peek_kind() {
            TokenKind::Not => {
                self.bump();
                let inner = self.term()?;
                Ok(Expr::negate(inner))
            }
            TokenKind::LParen => self.group(),
            TokenKind::Trace => self.span_check(),
            TokenKind::Has | TokenKind::Count => {
                let message = format!("missing 'trace.' prefix before {}", self.found());
                Err(self.error_here(DiagnosticKind::MissingPrefix, message, Some(START_HINT)))
            }
            TokenKind::Eof | TokenKind::And | TokenKind::Or | TokenKind::RParen => {
                let message = match self.pos.checked_sub(1).map(|p| &self.tokens[p].kind) {
                    Some(prev @ (TokenKind::And | TokenKind::Or | TokenKind::Not)) => {
                        format!("missing operand after {}", prev.describe())
                    }
                    _ => format!("expected an expression, found {}", self.found()),
                };
                Err(self.error_here(DiagnosticKind::MissingOperand, message, Some(START_HINT)))
            }
            _ => {
                let message = format!("expected an expression, found {}", self.found());
                Err(self.error_here(DiagnosticKind::UnexpectedToken, message, Some(START_HINT)))
            }
        }
    }

    fn group(&mut self) -> PResult<Expr> {
        let open = self.bump().span;
        let inner = self.or_expr()?;
        match self.peek_kind() {
            TokenKind::RParen => {
                self.bump();
                inner.ok_or(Abort::Syntax)
            }
            TokenKind::Eof => Err(self.error(
                DiagnosticKind::UnbalancedParen,
                open,
                "unclosed '('".to_string(),
                Some("add a matching ')'"),
            )),
            _ => {
                let message = format!("expected ')' to close the group, found {}", self.found());
                Err(self.error_here(DiagnosticKind::UnexpectedToken, message, Some(COMBINE_HINT)))
            }
        }
    }

    // -- span checks --------------------------------------------------------

    fn span_check(&mut self) -> PResult<Expr> {
        let trace = self.bump().span;
        if !self.eat(&TokenKind::Dot) {
            let message = format!("expected '.' after 'trace', found {}", self.found());
            return Err(self.error_here(DiagnosticKind::UnexpectedToken, message, Some(START_HINT)));
        }
        let is_count = match self.peek_kind() {
            TokenKind::Has => false,
            TokenKind::Count => true,
            _ => {
                let message = format!("expected 'has' or 'count' after 'trace.', found {}", self.found());
                return Err(self.error_here(DiagnosticKind::UnexpectedToken, message, Some(START_HINT)));
            }
        };
        let check = self.bump().span;
        let call = if is_count { "trace.count" } else { "trace.has" };

        let open = self.expect_open(call)?;
        let name_span = self.peek_span();
        let name = self.name("operation name")?;
        if name.is_empty() {
            return Err(self.error(
                DiagnosticKind::InvalidValue,
                name_span,
                "operation name must not be empty".to_string(),
                None,
            ));
        }
        self.expect_close(open, call)?;
        let pattern = OperationPattern::new(name);

        let mut wheres = Vec::new();
        while self.at(&TokenKind::Dot) {
            if self.peek_nth_kind(1) != Some(&TokenKind::Where) {
                self.bump();
                let message = format!("expected 'where' after '.', found {}", self.found());
                return Err(self.error_here(
                    DiagnosticKind::UnexpectedToken,
                    message,
                    Some("filter spans with .where(<attribute> <op> <value>)"),
                ));
            }
            self.check_deadline()?;
            wheres.push(self.where_clause()?);
        }

        if !is_count {
            if self.peek_kind().is_comparison() {
                let message = format!(
                    "trace.has(...) cannot be compared with {}",
                    self.peek_kind().describe()
                );
                return Err(self.error_here(
                    DiagnosticKind::InvalidOperator,
                    message,
                    Some("use trace.count(...) <op> <number> to compare span counts"),
                ));
            }
            return Ok(Expr::Has { pattern, wheres });
        }

        let (op, value) = self.count_comparison(trace.to(check))?;
        Ok(Expr::Count {
            pattern,
            wheres,
            op,
            value,
        })
    }

    fn count_comparison(&mut self, call_span: ByteSpan) -> PResult<(CmpOp, u64)> {
        let op = match cmp_op(self.peek_kind()) {
            Some(CmpOp::In | CmpOp::Matches) => {
                let message = format!(
                    "{} cannot be applied to a span count",
                    self.peek_kind().describe()
                );
                return Err(self.error_here(
                    DiagnosticKind::InvalidOperator,
                    message,
                    Some("compare counts with ==, !=, >, >=, < or <="),
                ));
            }
            Some(op) => op,
            None => {
                return Err(self.error(
                    DiagnosticKind::MissingOperand,
                    call_span.to(self.peek_span()),
                    format!(
                        "trace.count(...) must be followed by a comparison, found {}",
                        self.found()
                    ),
                    Some("for example: trace.count(http.retry) > 3"),
                ));
            }
        };
        self.bump();
        match self.peek_kind() {
            TokenKind::Number(n) if *n >= 0.0 && n.fract() == 0.0 && *n <= MAX_COUNT_LITERAL => {
                let value = *n as u64;
                self.bump();
                Ok((op, value))
            }
            TokenKind::Eof | TokenKind::And | TokenKind::Or | TokenKind::RParen => {
                let message = format!("missing count after '{op}'");
                Err(self.error_here(
                    DiagnosticKind::MissingOperand,
                    message,
                    Some("compare the count with a non-negative integer"),
                ))
            }
            _ => {
                let message = format!(
                    "a span count must be compared with a non-negative integer, found {}",
                    self.found()
                );
                Err(self.error_here(DiagnosticKind::InvalidValue, message, None))
            }
        }
    }

    fn where_clause(&mut self) -> PResult<WhereClause> {
        self.bump(); // '.'
        self.bump(); // 'where'
        let open = self.expect_open("where")?;
        let attribute = self.name("attribute name")?;

        let Some(op) = cmp_op(self.peek_kind()) else {
            let kind = match self.peek_kind() {
                TokenKind::RParen | TokenKind::Eof => DiagnosticKind::MissingOperand,
                _ => DiagnosticKind::InvalidOperator,
            };
            let message = format!("expected a comparison operator, found {}", self.found());
            return Err(self.error_here(kind, message, Some(VALID_OPERATORS)));
        };
        self.bump();

        let value_span = self.peek_span();
        let value = self.literal(op)?;
        let value = self.check_operand(op, value, value_span)?;
        self.expect_close(open, "where")?;
        Ok(WhereClause {
            attribute,
            op,
            value,
        })
    }

    /// Operation or attribute name: identifier, dotted path, quoted string,
    /// or a keyword used as a plain word.
    fn name(&mut self, what: &str) -> PResult<String> {
        let name = match self.peek_kind() {
            TokenKind::Ident(s) | TokenKind::Path(s) | TokenKind::Str(s) => s.clone(),
            kind => match kind.keyword_text() {
                Some(word) => word.to_string(),
                None => {
                    let kind = match kind {
                        TokenKind::RParen | TokenKind::Eof => DiagnosticKind::MissingOperand,
                        _ => DiagnosticKind::UnexpectedToken,
                    };
                    let message = format!("expected {what}, found {}", self.found());
                    return Err(self.error_here(
                        kind,
                        message,
                        Some("names are identifiers like payment.charge or quoted strings"),
                    ));
                }
            },
        };
        self.bump();
        Ok(name)
    }

    fn literal(&mut self, op: CmpOp) -> PResult<Literal> {
        let lit = match self.peek_kind().clone() {
            TokenKind::Str(s) | TokenKind::Ident(s) | TokenKind::Path(s) => Literal::Str(s),
            TokenKind::Number(n) => Literal::Number(n),
            TokenKind::True => Literal::Bool(true),
            TokenKind::False => Literal::Bool(false),
            TokenKind::LBracket => return self.list(),
            TokenKind::RParen | TokenKind::Eof => {
                let message = format!("missing value after '{op}'");
                return Err(self.error_here(DiagnosticKind::MissingOperand, message, None));
            }
            _ => {
                let message = format!("expected a value, found {}", self.found());
                return Err(self.error_here(
                    DiagnosticKind::UnexpectedToken,
                    message,
                    Some("values are strings, numbers, true/false or [lists]"),
                ));
            }
        };
        self.bump();
        Ok(lit)
    }

    fn list(&mut self) -> PResult<Literal> {
        let open = self.bump().span;
        let mut items = Vec::new();
        loop {
            self.check_deadline()?;
            match self.peek_kind().clone() {
                TokenKind::RBracket => {
                    self.bump();
                    return Ok(Literal::List(items));
                }
                TokenKind::Str(s) | TokenKind::Ident(s) | TokenKind::Path(s) => {
                    items.push(Literal::Str(s))
                }
                TokenKind::Number(n) => items.push(Literal::Number(n)),
                TokenKind::True => items.push(Literal::Bool(true)),
                TokenKind::False => items.push(Literal::Bool(false)),
                TokenKind::LBracket => {
                    return Err(self.error_here(
                        DiagnosticKind::InvalidValue,
                        "lists cannot be nested".to_string(),
                        None,
                    ));
                }
                TokenKind::Eof | TokenKind::RParen => {
                    return Err(self.error(
                        DiagnosticKind::UnbalancedParen,
                        open,
                        "unclosed '['".to_string(),
                        Some("add a matching ']'"),
                    ));
                }
                _ => {
                    let message = format!("expected a list item, found {}", self.found());
                    return Err(self.error_here(DiagnosticKind::UnexpectedToken, message, None));
                }
            }
            self.bump();
            if !self.eat(&TokenKind::Comma) && !self.at(&TokenKind::RBracket) {
                let message = format!("expected ',' or ']', found {}", self.found());
                return Err(self.error_here(DiagnosticKind::UnexpectedToken, message, None));
            }
        }
    }

    /// Operator-specific operand rules; compiles `matches` patterns.
    fn check_operand(&mut self, op: CmpOp, value: Literal, span: ByteSpan) -> PResult<Literal> {
        match (op, value) {
            (CmpOp::Matches, Literal::Str(source)) => match compile_pattern(&source) {
                Ok(regex) => Ok(Literal::Pattern(Pattern { source, regex })),
                Err(reason) => Err(self.error(
                    DiagnosticKind::InvalidPattern,
                    span,
                    format!("invalid pattern: {}", sanitize_fragment(&reason)),
                    Some("patterns use RE2-style syntax without backreferences or lookaround"),
                )),
            },
            (CmpOp::Matches, other) => Err(self.error(
                DiagnosticKind::InvalidValue,
                span,
                format!("'matches' requires a string pattern, found a {}", other.type_name()),
                None,
            )),
            (CmpOp::In, value) => Ok(value),
            (_, Literal::List(_)) => Err(self.error(
                DiagnosticKind::InvalidValue,
                span,
                format!("a list is only valid with 'in', not '{op}'"),
                Some("use 'in' to test membership"),
            )),
            (_, value) => Ok(value),
        }
    }

    fn expect_open(&mut self, after: &str) -> PResult<ByteSpan> {
        if self.at(&TokenKind::LParen) {
            return Ok(self.bump().span);
        }
        let message = format!("expected '(' after '{after}', found {}", self.found());
        Err(self.error_here(DiagnosticKind::UnexpectedToken, message, None))
    }

    fn expect_close(&mut self, open: ByteSpan, call: &str) -> PResult<()> {
        match self.peek_kind() {
            TokenKind::RParen => {
                self.bump();
                Ok(())
            }
            TokenKind::Eof => Err(self.error(
                DiagnosticKind::UnbalancedParen,
                open,
                format!("unclosed '(' in {call}(...)"),
                Some("add a matching ')'"),
            )),
            _ => {
                let message = format!("expected ')' to close {call}(...), found {}", self.found());
                Err(self.error_here(DiagnosticKind::UnexpectedToken, message, None))
            }
        }
    }
}

fn combine(op: LogicOp, left: Option<Expr>, right: Option<Expr>) -> Option<Expr> {
    Some(Expr::binary(op, left?, right?))
}

fn cmp_op(kind: &TokenKind) -> Option<CmpOp> {
    let op = match kind {
        TokenKind::Eq => CmpOp::Eq,
        TokenKind::Ne => CmpOp::Ne,
        TokenKind::Gt => CmpOp::Gt,
        TokenKind::Ge => CmpOp::Ge,
        TokenKind::Lt => CmpOp::Lt,
        TokenKind::Le => CmpOp::Le,
        TokenKind::In => CmpOp::In,
        TokenKind::Matches => CmpOp::Matches,
        _ => return None,
    };
    Some(op)
}
