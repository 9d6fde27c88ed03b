use std::fmt;

use regex::Regex;

use crate::token::keyword;

// ---------------------------------------------------------------------------
// Operators
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmpOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    In,
    Matches,
}

impl CmpOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::In => "in",
            CmpOp::Matches => "matches",
        }
    }

    pub fn is_ordering(&self) -> bool {
        matches!(self, CmpOp::Gt | CmpOp::Ge | CmpOp::Lt | CmpOp::Le)
    }

    /// Apply an equality/ordering operator to two numbers. `in` and
    /// `matches` never hold between plain numbers.
    pub fn compare_f64(&self, lhs: f64, rhs: f64) -> bool {
        match self {
            CmpOp::Eq => lhs == rhs,
            CmpOp::Ne => lhs != rhs,
            CmpOp::Gt => lhs > rhs,
            CmpOp::Ge => lhs >= rhs,
            CmpOp::Lt => lhs < rhs,
            CmpOp::Le => lhs <= rhs,
            CmpOp::In | CmpOp::Matches => false,
        }
    }

    pub fn compare_u64(&self, lhs: u64, rhs: u64) -> bool {
        match self {
            CmpOp::Eq => lhs == rhs,
            CmpOp::Ne => lhs != rhs,
            CmpOp::Gt => lhs > rhs,
            CmpOp::Ge => lhs >= rhs,
            CmpOp::Lt => lhs < rhs,
            CmpOp::Le => lhs <= rhs,
            CmpOp::In | CmpOp::Matches => false,
        }
    }
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicOp {
    And,
    Or,
}

impl LogicOp {
    fn precedence(&self) -> u8 {
        match self {
            LogicOp::Or => 1,
            LogicOp::And => 2,
        }
    }
}

impl fmt::Display for LogicOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogicOp::And => "and",
            LogicOp::Or => "or",
        })
    }
}

// ---------------------------------------------------------------------------
// Literals
// ---------------------------------------------------------------------------

/// A `matches` pattern, compiled once at parse time.
#[derive(Debug, Clone)]
pub struct Pattern {
    pub source: String,
    pub regex: Regex,
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Str(String),
    Number(f64),
    Bool(bool),
    List(Vec<Literal>),
    Pattern(Pattern),
}

impl Literal {
    pub fn type_name(&self) -> &'static str {
        match self {
            Literal::Str(_) => "string",
            Literal::Number(_) => "number",
            Literal::Bool(_) => "boolean",
            Literal::List(_) => "list",
            Literal::Pattern(_) => "pattern",
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Str(s) => write_quoted(f, s),
            Literal::Number(n) => write!(f, "{n}"),
            Literal::Bool(b) => write!(f, "{b}"),
            Literal::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Literal::Pattern(p) => write_quoted(f, &p.source),
        }
    }
}

// ---------------------------------------------------------------------------
// Span checks
// ---------------------------------------------------------------------------

/// Operation name selector: matches the exact name or any name nested
/// under it (`payment` matches `payment.charge`, not `paymentx`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OperationPattern(pub String);

impl OperationPattern {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn matches(&self, operation: &str) -> bool {
        match operation.strip_prefix(self.0.as_str()) {
            Some("") => true,
            Some(rest) => rest.starts_with('.'),
            None => false,
        }
    }
}

impl fmt::Display for OperationPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_name(f, &self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WhereClause {
    pub attribute: String,
    pub op: CmpOp,
    pub value: Literal,
}

impl fmt::Display for WhereClause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(".where(")?;
        write_name(f, &self.attribute)?;
        write!(f, " {} {})", self.op, self.value)
    }
}

// ---------------------------------------------------------------------------
// Expressions
// ---------------------------------------------------------------------------

/// Compiled rule expression. Built only by the parser; immutable afterwards.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// `trace.has(pattern).where(..)*`
    Has {
        pattern: OperationPattern,
        wheres: Vec<WhereClause>,
    },
    /// `trace.count(pattern).where(..)* <op> <value>`
    Count {
        pattern: OperationPattern,
        wheres: Vec<WhereClause>,
        op: CmpOp,
        value: u64,
    },
    Binary {
        op: LogicOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Not(Box<Expr>),
}

impl Expr {
    pub fn binary(op: LogicOp, left: Expr, right: Expr) -> Expr {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn negate(inner: Expr) -> Expr {
        Expr::Not(Box::new(inner))
    }

    fn precedence(&self) -> u8 {
        match self {
            Expr::Binary { op, .. } => op.precedence(),
            _ => 3,
        }
    }

    /// Number of nodes in the tree, where clauses included.
    pub fn node_count(&self) -> usize {
        match self {
            Expr::Has { wheres, .. } | Expr::Count { wheres, .. } => 1 + wheres.len(),
            Expr::Binary { left, right, .. } => 1 + left.node_count() + right.node_count(),
            Expr::Not(inner) => 1 + inner.node_count(),
        }
    }

    fn fmt_child(&self, f: &mut fmt::Formatter<'_>, parens: bool) -> fmt::Result {
        if parens {
            write!(f, "({self})")
        } else {
            write!(f, "{self}")
        }
    }
}

/// Renders canonical rule source; re-parsing it yields an equal tree.
impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Has { pattern, wheres } => {
                write!(f, "trace.has({pattern})")?;
                for w in wheres {
                    write!(f, "{w}")?;
                }
                Ok(())
            }
            Expr::Count {
                pattern,
                wheres,
                op,
                value,
            } => {
                write!(f, "trace.count({pattern})")?;
                for w in wheres {
                    write!(f, "{w}")?;
                }
                write!(f, " {op} {value}")
            }
            Expr::Binary { op, left, right } => {
                let prec = op.precedence();
                left.fmt_child(f, left.precedence() < prec)?;
                write!(f, " {op} ")?;
                right.fmt_child(f, right.precedence() <= prec)
            }
            Expr::Not(inner) => {
                f.write_str("not ")?;
                inner.fmt_child(f, matches!(**inner, Expr::Binary { .. }))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Rendering helpers
// ---------------------------------------------------------------------------

fn write_quoted(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    f.write_str("\"")?;
    for c in s.chars() {
        match c {
            '"' => f.write_str("\\\"")?,
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            '\t' => f.write_str("\\t")?,
            c => write!(f, "{c}")?,
        }
    }
    f.write_str("\"")
}

/// Names that lex back as a single identifier or path are written bare,
/// everything else quoted.
fn write_name(f: &mut fmt::Formatter<'_>, name: &str) -> fmt::Result {
    let bare = !name.is_empty()
        && name.split('.').all(|seg| {
            seg.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_')
                && seg.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
        && name.split('.').next().and_then(keyword).is_none();
    if bare {
        f.write_str(name)
    } else {
        write_quoted(f, name)
    }
}
