pub mod ast;
mod compile;
pub mod diagnostic;
pub mod lexer;
pub mod limits;
mod lint;
mod parser;
pub mod token;

pub use compile::{CompileFailure, CompiledExpr, compile_rule, compile_rule_with};
pub use diagnostic::{Diagnostic, DiagnosticKind, ErrorCategory, LineIndex, Severity, sanitize_fragment};
pub use lexer::{Lexed, SizeExceeded, SizeLimit, tokenize};
pub use limits::CompileLimits;
pub use lint::lint_expr;
pub use parser::parse_tokens;
