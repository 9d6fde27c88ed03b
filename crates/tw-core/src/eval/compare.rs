use tw_lang::ast::{CmpOp, Literal, WhereClause};

use crate::span::{AttrValue, Span};

/// A value reachable from rule code: a built-in span field or an attribute.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum FieldValue<'a> {
    Str(&'a str),
    Number(f64),
    Bool(bool),
}

impl FieldValue<'_> {
    pub(crate) fn to_attr(self) -> AttrValue {
        match self {
            FieldValue::Str(s) => AttrValue::Str(s.to_string()),
            FieldValue::Number(n) => AttrValue::Number(n),
            FieldValue::Bool(b) => AttrValue::Bool(b),
        }
    }
}

/// Resolve `name` on a span. Built-in fields shadow attributes of the same
/// name; nothing outside the span is reachable.
pub(crate) fn lookup<'a>(span: &'a Span, name: &str) -> Option<FieldValue<'a>> {
    let builtin = match name {
        "operation_name" | "operationName" | "name" => FieldValue::Str(&span.operation_name),
        "service_name" | "serviceName" => FieldValue::Str(&span.service_name),
        "status" => FieldValue::Str(span.status.as_str()),
        "kind" => FieldValue::Str(span.kind.as_str()),
        "duration" => FieldValue::Number(span.duration_ms()),
        "trace_id" => FieldValue::Str(&span.trace_id),
        "span_id" => FieldValue::Str(&span.span_id),
        _ => {
            return span.attributes.get(name).map(|v| match v {
                AttrValue::Str(s) => FieldValue::Str(s),
                AttrValue::Number(n) => FieldValue::Number(*n),
                AttrValue::Bool(b) => FieldValue::Bool(*b),
            });
        }
    };
    Some(builtin)
}

/// Check one where clause against a span. Returns the attribute value the
/// clause matched on, or `None` when the clause does not hold. A missing
/// attribute never holds.
pub(crate) fn clause_holds<'a>(clause: &WhereClause, span: &'a Span) -> Option<FieldValue<'a>> {
    let value = lookup(span, &clause.attribute)?;
    compare(clause.op, value, &clause.value).then_some(value)
}

pub(crate) fn compare(op: CmpOp, value: FieldValue<'_>, literal: &Literal) -> bool {
    match op {
        CmpOp::Gt | CmpOp::Ge | CmpOp::Lt | CmpOp::Le => match (value, literal) {
            (FieldValue::Number(lhs), Literal::Number(rhs)) => op.compare_f64(lhs, *rhs),
            _ => false,
        },
        CmpOp::Eq => scalar_eq(value, literal),
        CmpOp::Ne => !scalar_eq(value, literal),
        CmpOp::In => match literal {
            Literal::List(items) => items.iter().any(|item| scalar_eq(value, item)),
            scalar => scalar_eq(value, scalar),
        },
        CmpOp::Matches => match (value, literal) {
            (FieldValue::Str(s), Literal::Pattern(p)) => p.regex.is_match(s),
            _ => false,
        },
    }
}

/// Equality only between identical scalar types.
fn scalar_eq(value: FieldValue<'_>, literal: &Literal) -> bool {
    match (value, literal) {
        (FieldValue::Str(a), Literal::Str(b)) => a == b,
        (FieldValue::Number(a), Literal::Number(b)) => a == *b,
        (FieldValue::Bool(a), Literal::Bool(b)) => a == *b,
        _ => false,
    }
}
