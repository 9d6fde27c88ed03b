use std::time::{Duration, Instant};

use crate::ast::{CmpOp, Expr, Literal, LogicOp, OperationPattern, WhereClause};
use crate::diagnostic::{Diagnostic, DiagnosticKind, ErrorCategory};
use crate::limits::CompileLimits;
use crate::{CompileFailure, compile_rule, compile_rule_with};

fn parse(src: &str) -> Expr {
    match compile_rule(src) {
        Ok(c) => c.expr,
        Err(e) => panic!("unexpected failure for {src:?}: {e}"),
    }
}

fn fail(src: &str) -> CompileFailure {
    match compile_rule(src) {
        Ok(c) => panic!("expected failure for {src:?}, got {}", c.expr),
        Err(e) => e,
    }
}

fn kinds(diags: &[Diagnostic]) -> Vec<DiagnosticKind> {
    diags.iter().map(|d| d.kind).collect()
}

fn has(name: &str) -> Expr {
    Expr::Has {
        pattern: OperationPattern::new(name),
        wheres: vec![],
    }
}

// ---------------------------------------------------------------------------
// Shapes
// ---------------------------------------------------------------------------

#[test]
fn has_with_where_and_conjunction() {
    let expr = parse("trace.has(payment.charge).where(amount > 1000) and trace.has(fraud.check)");
    let expected = Expr::binary(
        LogicOp::And,
        Expr::Has {
            pattern: OperationPattern::new("payment.charge"),
            wheres: vec![WhereClause {
                attribute: "amount".into(),
                op: CmpOp::Gt,
                value: Literal::Number(1000.0),
            }],
        },
        has("fraud.check"),
    );
    assert_eq!(expr, expected);
}

#[test]
fn count_comparison() {
    let expr = parse("trace.count(http.retry) > 3");
    assert_eq!(
        expr,
        Expr::Count {
            pattern: OperationPattern::new("http.retry"),
            wheres: vec![],
            op: CmpOp::Gt,
            value: 3,
        }
    );
}

#[test]
fn count_with_where() {
    let expr = parse("trace.count(http.retry).where(status_code >= 500) >= 2");
    match expr {
        Expr::Count { wheres, op, value, .. } => {
            assert_eq!(wheres.len(), 1);
            assert_eq!(op, CmpOp::Ge);
            assert_eq!(value, 2);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn and_binds_tighter_than_or() {
    let expr = parse("trace.has(a.a) or trace.has(b.b) and trace.has(c.c)");
    assert_eq!(
        expr,
        Expr::binary(
            LogicOp::Or,
            has("a.a"),
            Expr::binary(LogicOp::And, has("b.b"), has("c.c")),
        )
    );
}

#[test]
fn chains_are_left_associative() {
    let expr = parse("trace.has(a.a) and trace.has(b.b) and trace.has(c.c)");
    assert_eq!(
        expr,
        Expr::binary(
            LogicOp::And,
            Expr::binary(LogicOp::And, has("a.a"), has("b.b")),
            has("c.c"),
        )
    );
}

#[test]
fn not_binds_to_single_term() {
    let expr = parse("not trace.has(a.a) and trace.has(b.b)");
    assert_eq!(
        expr,
        Expr::binary(LogicOp::And, Expr::negate(has("a.a")), has("b.b"))
    );
    let grouped = parse("not (trace.has(a.a) and trace.has(b.b))");
    assert_eq!(
        grouped,
        Expr::negate(Expr::binary(LogicOp::And, has("a.a"), has("b.b")))
    );
}

#[test]
fn literal_forms() {
    let expr = parse(
        r#"trace.has("GET /users").where(region in [us, "eu", 3]).where(ok == true).where(tier == gold)"#,
    );
    let Expr::Has { pattern, wheres } = expr else {
        panic!("expected has");
    };
    assert_eq!(pattern.as_str(), "GET /users");
    assert_eq!(
        wheres[0].value,
        Literal::List(vec![
            Literal::Str("us".into()),
            Literal::Str("eu".into()),
            Literal::Number(3.0),
        ])
    );
    assert_eq!(wheres[1].value, Literal::Bool(true));
    assert_eq!(wheres[2].value, Literal::Str("gold".into()));
}

#[test]
fn keywords_usable_as_attribute_names() {
    let expr = parse("trace.has(queue.poll).where(count > 5)");
    let Expr::Has { wheres, .. } = expr else {
        panic!("expected has");
    };
    assert_eq!(wheres[0].attribute, "count");
}

#[test]
fn matches_compiles_pattern() {
    let expr = parse(r#"trace.has(http.request).where(url matches "^/api/v[0-9]+/")"#);
    let Expr::Has { wheres, .. } = expr else {
        panic!("expected has");
    };
    match &wheres[0].value {
        Literal::Pattern(p) => assert!(p.regex.is_match("/api/v2/users")),
        other => panic!("expected pattern, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Display round trip
// ---------------------------------------------------------------------------

#[test]
fn display_reparses_to_equal_tree() {
    let sources = [
        "trace.has(payment.charge).where(amount > 1000) and trace.has(fraud.check)",
        "not (trace.has(a.a) or trace.has(b.b)) and trace.count(c.c) <= 4",
        "trace.has(\"weird name\").where(\"x-y\" in [\"a\\\"b\", 2, false]) or not not trace.has(z.z)",
        "trace.has(a.a) or (trace.has(b.b) or trace.has(c.c))",
        "trace.has(h.r).where(path matches \"^/v1\")",
    ];
    for src in sources {
        let first = parse(src);
        let rendered = first.to_string();
        let second = parse(&rendered);
        assert_eq!(first, second, "{src} -> {rendered}");
    }
}

// ---------------------------------------------------------------------------
// Diagnostics
// ---------------------------------------------------------------------------

#[test]
fn script_injection_is_escaped() {
    let err = fail("trace.has(<script>)");
    assert!(!err.diagnostics.is_empty());
    for d in &err.diagnostics {
        assert!(!d.message.contains("<script>"), "{}", d.message);
    }
    assert!(
        err.diagnostics.iter().any(|d| d.message.contains("&lt;script&gt;")),
        "{:?}",
        err.diagnostics
    );
}

#[test]
fn empty_rule() {
    let err = fail("   // nothing here\n");
    assert_eq!(kinds(&err.diagnostics), vec![DiagnosticKind::MissingOperand]);
    assert_eq!(
        err.diagnostics[0].suggestion.as_deref(),
        Some("expression must start with trace.has(...) or trace.count(...)")
    );
}

#[test]
fn missing_prefix() {
    let err = fail("has(payment.charge)");
    assert_eq!(kinds(&err.diagnostics), vec![DiagnosticKind::MissingPrefix]);
    assert!(err.diagnostics[0].suggestion.is_some());
}

#[test]
fn unclosed_group_points_at_open_paren() {
    let err = fail("trace.has(a.a) and (trace.has(b.b)");
    let d = &err.diagnostics[0];
    assert_eq!(d.kind, DiagnosticKind::UnbalancedParen);
    assert_eq!((d.line, d.column), (1, 20));
}

#[test]
fn unmatched_close_paren() {
    let err = fail("trace.has(a.a))");
    assert_eq!(kinds(&err.diagnostics), vec![DiagnosticKind::UnbalancedParen]);
}

#[test]
fn missing_operand_after_and() {
    let err = fail("trace.has(a.a) and");
    assert_eq!(kinds(&err.diagnostics), vec![DiagnosticKind::MissingOperand]);
    assert!(err.diagnostics[0].message.contains("'and'"));
}

#[test]
fn unterminated_string_reported_once() {
    let err = fail("trace.has(a.a).where(name == \"abc)");
    let unterminated = err
        .diagnostics
        .iter()
        .filter(|d| d.kind == DiagnosticKind::UnterminatedString)
        .count();
    assert_eq!(unterminated, 1, "{:?}", err.diagnostics);
}

#[test]
fn several_errors_in_one_pass() {
    let err = fail("trace.has() and has(x.y) and trace.count(z.z) and trace.has(ok.ok)");
    assert_eq!(
        kinds(&err.diagnostics),
        vec![
            DiagnosticKind::MissingOperand,
            DiagnosticKind::MissingPrefix,
            DiagnosticKind::MissingOperand,
        ]
    );
    // positions are ordered and distinct
    let cols: Vec<_> = err.diagnostics.iter().map(|d| d.column).collect();
    assert!(cols.windows(2).all(|w| w[0] < w[1]), "{cols:?}");
}

#[test]
fn invalid_where_operator_lists_valid_ones() {
    let err = fail("trace.has(a.a).where(x ~ 3)");
    let d = err
        .diagnostics
        .iter()
        .find(|d| d.kind == DiagnosticKind::InvalidOperator)
        .expect("operator diagnostic");
    assert_eq!(
        d.suggestion.as_deref(),
        Some("Valid operators: ==, !=, >, >=, <, <=, in, matches")
    );
}

#[test]
fn comparison_after_has_suggests_count() {
    let err = fail("trace.has(http.retry) > 3");
    assert_eq!(err.diagnostics[0].kind, DiagnosticKind::InvalidOperator);
    assert!(err.diagnostics[0].suggestion.as_deref().unwrap().contains("trace.count"));
}

#[test]
fn count_rejects_bad_operands() {
    assert_eq!(fail("trace.count(a.a)").diagnostics[0].kind, DiagnosticKind::MissingOperand);
    assert_eq!(fail("trace.count(a.a) > -1").diagnostics[0].kind, DiagnosticKind::InvalidValue);
    assert_eq!(fail("trace.count(a.a) > 1.5").diagnostics[0].kind, DiagnosticKind::InvalidValue);
    assert_eq!(fail("trace.count(a.a) > \"3\"").diagnostics[0].kind, DiagnosticKind::InvalidValue);
    assert_eq!(fail("trace.count(a.a) in [1]").diagnostics[0].kind, DiagnosticKind::InvalidOperator);
}

#[test]
fn list_only_with_in() {
    let err = fail("trace.has(a.a).where(x == [1, 2])");
    assert_eq!(err.diagnostics[0].kind, DiagnosticKind::InvalidValue);
}

#[test]
fn invalid_patterns() {
    let err = fail(r#"trace.has(a.a).where(x matches "(unclosed")"#);
    assert_eq!(err.diagnostics[0].kind, DiagnosticKind::InvalidPattern);

    let err = fail(r#"trace.has(a.a).where(x matches "(a)\\1")"#);
    assert_eq!(err.diagnostics[0].kind, DiagnosticKind::InvalidPattern);

    let nested = format!("{}a{}", "(".repeat(60), ")".repeat(60));
    let err = fail(&format!("trace.has(a.a).where(x matches \"{nested}\")"));
    assert_eq!(err.diagnostics[0].kind, DiagnosticKind::InvalidPattern);

    let err = fail("trace.has(a.a).where(x matches 3)");
    assert_eq!(err.diagnostics[0].kind, DiagnosticKind::InvalidValue);
}

#[test]
fn diagnostics_carry_end_positions() {
    let err = fail("trace.has(a.a)\n  and trace.has(b.b) trace.has(c.c)");
    let d = &err.diagnostics[0];
    assert_eq!(d.kind, DiagnosticKind::UnexpectedToken);
    assert_eq!((d.line, d.column), (2, 22));
    assert_eq!((d.end_line, d.end_column), (2, 27));
}

// ---------------------------------------------------------------------------
// Resource limits
// ---------------------------------------------------------------------------

#[test]
fn nesting_within_depth_limit() {
    let src = format!("{}trace.has(a.a){}", "(".repeat(49), ")".repeat(49));
    parse(&src);
}

#[test]
fn nesting_beyond_depth_limit() {
    let src = format!("{}trace.has(a.a){}", "(".repeat(50), ")".repeat(50));
    let err = fail(&src);
    assert_eq!(err.category(), ErrorCategory::RecursionLimitExceeded);
    assert_eq!(kinds(&err.diagnostics), vec![DiagnosticKind::RecursionLimit]);
}

#[test]
fn negation_chain_beyond_depth_limit() {
    let src = format!("{}trace.has(a.a)", "not ".repeat(200));
    assert_eq!(fail(&src).category(), ErrorCategory::RecursionLimitExceeded);
}

#[test]
fn thousand_nested_parens_fail_fast() {
    let src = format!("{}trace.has(a.a){}", "(".repeat(1000), ")".repeat(1000));
    let started = Instant::now();
    let err = fail(&src);
    assert!(started.elapsed() < Duration::from_millis(100));
    assert_eq!(err.category(), ErrorCategory::RecursionLimitExceeded);
}

#[test]
fn thousand_term_chain_parses_fast() {
    let src = vec!["trace.has(a.a)"; 1000].join(" and ");
    let started = Instant::now();
    let expr = parse(&src);
    assert!(started.elapsed() < Duration::from_millis(100));
    assert_eq!(expr.node_count(), 1999);
}

#[test]
fn thousand_unclosed_parens_fail_fast() {
    let src = "(".repeat(1000);
    let started = Instant::now();
    let err = fail(&src);
    assert!(started.elapsed() < Duration::from_millis(100));
    assert_eq!(err.category(), ErrorCategory::RecursionLimitExceeded);
}

#[test]
fn max_size_garbage_source_compiles_within_budget() {
    let src = "$".repeat(CompileLimits::default().max_source_bytes);
    let started = Instant::now();
    let err = fail(&src);
    assert!(started.elapsed() < Duration::from_millis(100));
    assert_eq!(err.category(), ErrorCategory::SyntaxError);
    let found = kinds(&err.diagnostics);
    assert_eq!(found.iter().filter(|k| **k == DiagnosticKind::UnexpectedChar).count(), 100);
    assert!(found.contains(&DiagnosticKind::TooManyErrors), "{found:?}");
}

#[test]
fn long_broken_chain_reports_every_error() {
    let src = vec!["1"; 4096].join(" and ");
    let started = Instant::now();
    let err = fail(&src);
    assert!(started.elapsed() < Duration::from_millis(100));
    assert_eq!(err.category(), ErrorCategory::SyntaxError);
    assert_eq!(err.errors().count(), 4096);
}

#[test]
fn long_value_list_parses_fast() {
    let items: Vec<String> = (0..5000).map(|i| i.to_string()).collect();
    let src = format!("trace.has(a.b).where(code in [{}])", items.join(", "));
    let started = Instant::now();
    let expr = parse(&src);
    assert!(started.elapsed() < Duration::from_millis(100));
    let Expr::Has { wheres, .. } = expr else {
        panic!("expected has, got {expr}");
    };
    assert!(matches!(&wheres[0].value, Literal::List(items) if items.len() == 5000));
}

#[test]
fn zero_budget_times_out() {
    let limits = CompileLimits {
        parse_timeout: Duration::ZERO,
        ..CompileLimits::default()
    };
    let err = compile_rule_with("trace.has(a.a)", &limits).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::ParseTimeout);
    assert_eq!(kinds(&err.diagnostics), vec![DiagnosticKind::ParseTimeout]);
}

#[test]
fn custom_depth_limit() {
    let limits = CompileLimits {
        max_depth: 4,
        ..CompileLimits::default()
    };
    assert!(compile_rule_with("(trace.has(a.a))", &limits).is_ok());
    let err = compile_rule_with("((trace.has(a.a)))", &limits).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::RecursionLimitExceeded);
}
