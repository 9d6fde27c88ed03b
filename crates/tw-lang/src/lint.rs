use crate::ast::{CmpOp, Expr, Literal, LogicOp, OperationPattern, WhereClause};
use crate::diagnostic::{Diagnostic, LineIndex, sanitize_fragment};
use crate::token::ByteSpan;

const MIN_OPERATION_CHARS: usize = 3;
const LARGE_COUNT: u64 = 1000;

/// Semantic warnings for a successfully parsed rule. Warnings never block
/// storage. Each warning is located at the first occurrence of the text it
/// refers to, or at the start of the rule.
pub fn lint_expr(expr: &Expr, source: &str) -> Vec<Diagnostic> {
    let mut lint = Lint {
        source,
        index: LineIndex::new(source),
        out: Vec::new(),
        saw_or: false,
    };
    lint.expr(expr);
    lint.out
}

struct Lint<'s> {
    source: &'s str,
    index: LineIndex<'s>,
    out: Vec<Diagnostic>,
    saw_or: bool,
}

impl Lint<'_> {
    fn expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Has { pattern, wheres } => {
                self.pattern(pattern);
                self.wheres(wheres);
            }
            Expr::Count {
                pattern,
                wheres,
                op,
                value,
            } => {
                self.pattern(pattern);
                self.wheres(wheres);
                if *op == CmpOp::Eq {
                    self.warn(
                        pattern.as_str(),
                        format!("exact count comparison '== {value}' is fragile when spans are retried or sampled"),
                        Some("prefer >= or <="),
                    );
                }
                if *value > LARGE_COUNT {
                    self.warn(
                        pattern.as_str(),
                        format!("counting more than {LARGE_COUNT} spans may be slow on large traces"),
                        None,
                    );
                }
            }
            Expr::Binary { op, left, right } => {
                if *op == LogicOp::Or && !self.saw_or {
                    self.saw_or = true;
                    self.warn(
                        " or ",
                        "'or' may produce broad matches: either branch alone triggers the rule".to_string(),
                        Some("split independent conditions into separate rules"),
                    );
                }
                self.expr(left);
                self.expr(right);
            }
            Expr::Not(inner) => {
                if matches!(**inner, Expr::Not(_)) {
                    self.warn(
                        "not",
                        "double negation has no effect".to_string(),
                        Some("remove both 'not' keywords"),
                    );
                }
                self.expr(inner);
            }
        }
    }

    fn pattern(&mut self, pattern: &OperationPattern) {
        let name = pattern.as_str();
        if name.chars().count() < MIN_OPERATION_CHARS {
            self.warn(
                name,
                format!(
                    "operation name `{}` is very short and may match unintended spans",
                    sanitize_fragment(name)
                ),
                None,
            );
        }
        if !name.contains('.') {
            self.warn(
                name,
                format!(
                    "operation name `{}` has no namespace",
                    sanitize_fragment(name)
                ),
                Some("use the service.operation form, e.g. payment.charge"),
            );
        }
    }

    fn wheres(&mut self, wheres: &[WhereClause]) {
        for w in wheres {
            match (&w.op, &w.value) {
                (op, Literal::Str(_) | Literal::Bool(_)) if op.is_ordering() => self.warn(
                    &w.attribute,
                    format!(
                        "'{op}' against a {} never matches",
                        w.value.type_name()
                    ),
                    Some("numeric operators need a number"),
                ),
                (CmpOp::In, value) if !matches!(value, Literal::List(_)) => self.warn(
                    &w.attribute,
                    "'in' with a single value behaves like '=='".to_string(),
                    Some("use '==' or a [list]"),
                ),
                _ => {}
            }
        }
    }

    fn warn(&mut self, anchor: &str, message: String, suggestion: Option<&str>) {
        if self.out.iter().any(|d| d.message == message) {
            return;
        }
        let span = match find_word(self.source, anchor) {
            Some(start) => ByteSpan::new(start, start + anchor.len()),
            None => ByteSpan::new(0, 0),
        };
        let mut diag = Diagnostic::warning(span, &self.index, message);
        if let Some(s) = suggestion {
            diag = diag.with_suggestion(s);
        }
        self.out.push(diag);
    }
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '.'
}

/// First occurrence of `anchor` that is not part of a longer word.
fn find_word(source: &str, anchor: &str) -> Option<usize> {
    if anchor.is_empty() {
        return None;
    }
    let guard_start = anchor.starts_with(is_word_char);
    let guard_end = anchor.ends_with(is_word_char);
    source.match_indices(anchor).map(|(at, _)| at).find(|&at| {
        let clear_before = !guard_start || !source[..at].ends_with(is_word_char);
        let clear_after = !guard_end || !source[at + anchor.len()..].starts_with(is_word_char);
        clear_before && clear_after
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile_rule;

    fn warnings_at(src: &str) -> Vec<(u32, String)> {
        compile_rule(src)
            .unwrap()
            .warnings
            .into_iter()
            .map(|w| (w.column, w.message))
            .collect()
    }

    #[test]
    fn short_name_is_located_at_its_own_occurrence() {
        let found = warnings_at("trace.has(a) and trace.has(pay.charge)");
        assert!(!found.is_empty());
        assert!(found.iter().all(|(col, _)| *col == 11), "{found:?}");
    }

    #[test]
    fn double_negation_skips_longer_words() {
        let found = warnings_at("trace.has(notify.sent) and not not trace.has(svc.a)");
        let (col, _) = found.iter().find(|(_, m)| m.contains("double negation")).unwrap();
        assert_eq!(*col, 28);
    }

    #[test]
    fn word_search() {
        assert_eq!(find_word("trace.has(a)", "a"), Some(10));
        assert_eq!(find_word("x.svc svc", "svc"), Some(6));
        assert_eq!(find_word("a or b", " or "), Some(1));
        assert_eq!(find_word("abc", ""), None);
        assert_eq!(find_word("abc", "b"), None);
    }
}
