use super::*;

fn kinds(src: &str) -> Vec<TokenKind> {
    let lexed = tokenize(src, &CompileLimits::default()).expect("lex");
    assert!(lexed.diagnostics.is_empty(), "{:?}", lexed.diagnostics);
    lexed.tokens.into_iter().map(|t| t.kind).collect()
}

fn ident(s: &str) -> TokenKind {
    TokenKind::Ident(s.to_string())
}

fn path(s: &str) -> TokenKind {
    TokenKind::Path(s.to_string())
}

// ---------------------------------------------------------------------------
// Token shapes
// ---------------------------------------------------------------------------

#[test]
fn has_with_where() {
    let got = kinds("trace.has(payment.charge).where(amount > 1000)");
    assert_eq!(
        got,
        vec![
            TokenKind::Trace,
            TokenKind::Dot,
            TokenKind::Has,
            TokenKind::LParen,
            path("payment.charge"),
            TokenKind::RParen,
            TokenKind::Dot,
            TokenKind::Where,
            TokenKind::LParen,
            ident("amount"),
            TokenKind::Gt,
            TokenKind::Number(1000.0),
            TokenKind::RParen,
            TokenKind::Eof,
        ]
    );
}

#[test]
fn keyword_split_keeps_offsets() {
    let lexed = tokenize("  trace.count(x)", &CompileLimits::default()).unwrap();
    let spans: Vec<_> = lexed.tokens.iter().take(3).map(|t| (t.span.start, t.span.end)).collect();
    assert_eq!(spans, vec![(2, 7), (7, 8), (8, 13)]);
}

#[test]
fn path_with_keyword_tail_is_not_split() {
    assert_eq!(kinds("retry.count"), vec![path("retry.count"), TokenKind::Eof]);
}

#[test]
fn operators() {
    assert_eq!(
        kinds("== != > >= < <= in matches"),
        vec![
            TokenKind::Eq,
            TokenKind::Ne,
            TokenKind::Gt,
            TokenKind::Ge,
            TokenKind::Lt,
            TokenKind::Le,
            TokenKind::In,
            TokenKind::Matches,
            TokenKind::Eof,
        ]
    );
}

#[test]
fn numbers() {
    assert_eq!(
        kinds("3 -2 0.25 1."),
        vec![
            TokenKind::Number(3.0),
            TokenKind::Number(-2.0),
            TokenKind::Number(0.25),
            TokenKind::Number(1.0),
            TokenKind::Dot,
            TokenKind::Eof,
        ]
    );
}

#[test]
fn string_escapes() {
    assert_eq!(
        kinds(r#""a\"b\\c\nd\te""#),
        vec![TokenKind::Str("a\"b\\c\nd\te".into()), TokenKind::Eof]
    );
}

#[test]
fn comments_are_skipped() {
    let got = kinds("// leading\ntrace.has(a) // trailing\n  and // mid\n trace.has(b)");
    assert_eq!(got.iter().filter(|k| **k == TokenKind::Trace).count(), 2);
    assert!(got.contains(&TokenKind::And));
}

#[test]
fn list_punctuation() {
    assert_eq!(
        kinds(r#"["a", 2]"#),
        vec![
            TokenKind::LBracket,
            TokenKind::Str("a".into()),
            TokenKind::Comma,
            TokenKind::Number(2.0),
            TokenKind::RBracket,
            TokenKind::Eof,
        ]
    );
}

// ---------------------------------------------------------------------------
// Recoverable problems
// ---------------------------------------------------------------------------

#[test]
fn unterminated_string_is_reported_and_lexing_continues() {
    let lexed = tokenize("trace.has(\"abc\n) and $", &CompileLimits::default()).unwrap();
    let kinds: Vec<_> = lexed.diagnostics.iter().map(|d| d.kind).collect();
    assert_eq!(
        kinds,
        vec![DiagnosticKind::UnterminatedString, DiagnosticKind::UnexpectedChar]
    );
    assert!(lexed.diagnostics[0].suggestion.is_some());
    assert_eq!(lexed.diagnostics[1].line, 2);
    assert_eq!(lexed.tokens.last().map(|t| &t.kind), Some(&TokenKind::Eof));
}

#[test]
fn c_style_operators_get_suggestions() {
    let lexed = tokenize("a && b || !c = d", &CompileLimits::default()).unwrap();
    let suggestions: Vec<_> = lexed
        .diagnostics
        .iter()
        .filter_map(|d| d.suggestion.as_deref())
        .collect();
    assert_eq!(suggestions.len(), 4);
    assert!(suggestions[0].contains("'and'"));
    assert!(suggestions[1].contains("'or'"));
    assert!(suggestions[3].contains("'=='"));
    assert!(lexed.diagnostics.iter().all(|d| d.kind == DiagnosticKind::InvalidOperator));
}

#[test]
fn unexpected_char_is_sanitized() {
    let lexed = tokenize("\u{1b}", &CompileLimits::default()).unwrap();
    assert_eq!(lexed.diagnostics.len(), 1);
    assert!(!lexed.diagnostics[0].message.contains('\u{1b}'));
}

// ---------------------------------------------------------------------------
// Size limits
// ---------------------------------------------------------------------------

#[test]
fn source_at_limit_is_accepted() {
    let mut src = String::from("trace.has(a)");
    src.push_str(&" ".repeat(65536 - src.len()));
    assert_eq!(src.len(), 65536);
    assert!(tokenize(&src, &CompileLimits::default()).is_ok());
}

#[test]
fn source_over_limit_cites_limit_and_length() {
    let src = " ".repeat(65537);
    let err = tokenize(&src, &CompileLimits::default()).unwrap_err();
    assert_eq!(err.limit, SizeLimit::Source);
    assert_eq!(err.max, 65536);
    assert_eq!(err.actual, 65537);
    let msg = err.to_diagnostic(&LineIndex::new(&src)).message;
    assert!(msg.contains("65536") && msg.contains("65537"), "{msg}");
}

#[test]
fn identifier_length_boundary() {
    let ok = "a".repeat(100);
    assert!(tokenize(&ok, &CompileLimits::default()).is_ok());

    let long = "a".repeat(101);
    let err = tokenize(&long, &CompileLimits::default()).unwrap_err();
    assert_eq!(err.limit, SizeLimit::Identifier);
    assert_eq!(err.actual, 101);
    assert_eq!((err.start, err.end), (0, 101));
}

#[test]
fn dotted_identifier_counts_whole_path() {
    let long = format!("{}.{}", "a".repeat(50), "b".repeat(50));
    let err = tokenize(&long, &CompileLimits::default()).unwrap_err();
    assert_eq!(err.limit, SizeLimit::Identifier);
}

#[test]
fn string_literal_limit() {
    let limits = CompileLimits {
        max_string_bytes: 8,
        ..CompileLimits::default()
    };
    assert!(tokenize("\"12345678\"", &limits).is_ok());
    let err = tokenize("\"123456789\"", &limits).unwrap_err();
    assert_eq!(err.limit, SizeLimit::StringLiteral);
    assert_eq!(err.start, 0);
}

#[test]
fn lexical_errors_are_capped_with_a_summary() {
    let src = "$".repeat(MAX_LEX_DIAGNOSTICS + 50);
    let lexed = tokenize(&src, &CompileLimits::default()).unwrap();
    assert_eq!(lexed.diagnostics.len(), MAX_LEX_DIAGNOSTICS + 1);
    let summary = lexed.diagnostics.last().unwrap();
    assert_eq!(summary.kind, DiagnosticKind::TooManyErrors);
    assert!(summary.message.starts_with("50 more lexical errors"), "{}", summary.message);
    assert_eq!(summary.column as usize, src.len() + 1);
    assert_eq!(lexed.tokens.last().map(|t| &t.kind), Some(&TokenKind::Eof));
}
