use crate::ast::Expr;
use crate::diagnostic::{Diagnostic, ErrorCategory, LineIndex};
use crate::lexer::tokenize;
use crate::limits::CompileLimits;
use crate::lint::lint_expr;
use crate::parser::parse_tokens;

/// A rule that compiled cleanly, plus any non-blocking warnings.
#[derive(Debug, Clone)]
pub struct CompiledExpr {
    pub expr: Expr,
    pub warnings: Vec<Diagnostic>,
}

/// A rejected rule with every diagnostic found in one pass.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{}", summarize(.diagnostics))]
pub struct CompileFailure {
    pub diagnostics: Vec<Diagnostic>,
}

impl CompileFailure {
    /// The most severe category among the error diagnostics. Resource-limit
    /// rejections win over plain syntax errors.
    pub fn category(&self) -> ErrorCategory {
        category_of(&self.diagnostics)
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(|d| d.is_error())
    }
}

fn category_of(diagnostics: &[Diagnostic]) -> ErrorCategory {
    diagnostics
        .iter()
        .filter(|d| d.is_error())
        .map(|d| d.kind.category())
        .max()
        .unwrap_or(ErrorCategory::SyntaxError)
}

fn summarize(diagnostics: &[Diagnostic]) -> String {
    let errors: Vec<_> = diagnostics.iter().filter(|d| d.is_error()).collect();
    let detail = match errors.as_slice() {
        [] => "no diagnostics".to_string(),
        [only] => only.to_string(),
        [first, rest @ ..] => format!("{first} (and {} more)", rest.len()),
    };
    format!("rule rejected ({}): {detail}", category_of(diagnostics))
}

/// Compile rule source under the production limits.
pub fn compile_rule(source: &str) -> Result<CompiledExpr, CompileFailure> {
    compile_rule_with(source, &CompileLimits::default())
}

pub fn compile_rule_with(
    source: &str,
    limits: &CompileLimits,
) -> Result<CompiledExpr, CompileFailure> {
    let lexed = match tokenize(source, limits) {
        Ok(lexed) => lexed,
        Err(exceeded) => {
            let diagnostic = exceeded.to_diagnostic(&LineIndex::new(source));
            return Err(CompileFailure {
                diagnostics: vec![diagnostic],
            });
        }
    };

    let (expr, parse_diags) = parse_tokens(source, &lexed.tokens, limits);
    let mut diagnostics = lexed.diagnostics;
    diagnostics.extend(parse_diags);
    diagnostics.sort_by_key(|d| (d.line, d.column));
    diagnostics.dedup_by(|a, b| a.line == b.line && a.column == b.column && a.kind == b.kind);

    match expr {
        Some(expr) if !diagnostics.iter().any(Diagnostic::is_error) => {
            let warnings = lint_expr(&expr, source);
            Ok(CompiledExpr { expr, warnings })
        }
        _ => Err(CompileFailure { diagnostics }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostic::{DiagnosticKind, Severity};

    #[test]
    fn lexer_and_parser_diagnostics_are_merged() {
        let err = compile_rule("trace.has(\"abc\nand trace.has(b) $").unwrap_err();
        let kinds: Vec<_> = err.diagnostics.iter().map(|d| d.kind).collect();
        assert!(kinds.contains(&DiagnosticKind::UnterminatedString), "{kinds:?}");
        assert!(kinds.contains(&DiagnosticKind::UnexpectedChar), "{kinds:?}");
        assert_eq!(err.category(), ErrorCategory::SyntaxError);
    }

    #[test]
    fn size_failure_has_size_category() {
        let src = "x".repeat(200);
        let err = compile_rule(&src).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::SizeLimitExceeded);
        assert_eq!(err.diagnostics.len(), 1);
        assert!(err.to_string().contains("size_limit_exceeded"));
    }

    #[test]
    fn warnings_do_not_block() {
        let ok = compile_rule("trace.count(x) == 2000").unwrap();
        assert!(ok.warnings.iter().all(|w| w.severity == Severity::Warning));
        let messages: Vec<_> = ok.warnings.iter().map(|w| w.message.as_str()).collect();
        assert!(messages.iter().any(|m| m.contains("very short")), "{messages:?}");
        assert!(messages.iter().any(|m| m.contains("no namespace")));
        assert!(messages.iter().any(|m| m.contains("fragile")));
        assert!(messages.iter().any(|m| m.contains("more than 1000")));
    }

    #[test]
    fn lint_flags_broad_and_always_false_rules() {
        let ok = compile_rule(
            "not not trace.has(a.b).where(region > \"eu\").where(tier in gold) or trace.has(c.d)",
        )
        .unwrap();
        let messages: Vec<_> = ok.warnings.iter().map(|w| w.message.as_str()).collect();
        assert!(messages.iter().any(|m| m.contains("'or' may produce broad matches")));
        assert!(messages.iter().any(|m| m.contains("double negation")));
        assert!(messages.iter().any(|m| m.contains("never matches")));
        assert!(messages.iter().any(|m| m.contains("single value")));
    }

    #[test]
    fn clean_rule_has_no_warnings() {
        let ok = compile_rule(
            "trace.has(payment.charge).where(amount > 1000) and trace.has(fraud.check)",
        )
        .unwrap();
        assert!(ok.warnings.is_empty(), "{:?}", ok.warnings);
    }
}
