// ---------------------------------------------------------------------------
// Byte spans
// ---------------------------------------------------------------------------

/// Half-open byte range `[start, end)` into the rule source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ByteSpan {
    pub start: usize,
    pub end: usize,
}

impl ByteSpan {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Smallest span covering both `self` and `other`.
    pub fn to(self, other: ByteSpan) -> ByteSpan {
        ByteSpan {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

// ---------------------------------------------------------------------------
// Tokens
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// Single-segment identifier, e.g. `amount`.
    Ident(String),
    /// Dotted identifier path, e.g. `payment.charge`.
    Path(String),
    Number(f64),
    /// String literal with escapes already processed.
    Str(String),

    // keywords
    Trace,
    Has,
    Count,
    Where,
    And,
    Or,
    Not,
    True,
    False,
    In,
    Matches,

    // comparison operators
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,

    // punctuation
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Dot,

    Eof,
}

impl TokenKind {
    /// Short, fixed description used in diagnostics. Never includes
    /// user-controlled text.
    pub fn describe(&self) -> &'static str {
        match self {
            TokenKind::Ident(_) => "identifier",
            TokenKind::Path(_) => "dotted name",
            TokenKind::Number(_) => "number",
            TokenKind::Str(_) => "string",
            TokenKind::Trace => "'trace'",
            TokenKind::Has => "'has'",
            TokenKind::Count => "'count'",
            TokenKind::Where => "'where'",
            TokenKind::And => "'and'",
            TokenKind::Or => "'or'",
            TokenKind::Not => "'not'",
            TokenKind::True => "'true'",
            TokenKind::False => "'false'",
            TokenKind::In => "'in'",
            TokenKind::Matches => "'matches'",
            TokenKind::Eq => "'=='",
            TokenKind::Ne => "'!='",
            TokenKind::Gt => "'>'",
            TokenKind::Ge => "'>='",
            TokenKind::Lt => "'<'",
            TokenKind::Le => "'<='",
            TokenKind::LParen => "'('",
            TokenKind::RParen => "')'",
            TokenKind::LBracket => "'['",
            TokenKind::RBracket => "']'",
            TokenKind::Comma => "','",
            TokenKind::Dot => "'.'",
            TokenKind::Eof => "end of input",
        }
    }

    /// Source spelling of a keyword token.
    pub fn keyword_text(&self) -> Option<&'static str> {
        let text = match self {
            TokenKind::Trace => "trace",
            TokenKind::Has => "has",
            TokenKind::Count => "count",
            TokenKind::Where => "where",
            TokenKind::And => "and",
            TokenKind::Or => "or",
            TokenKind::Not => "not",
            TokenKind::True => "true",
            TokenKind::False => "false",
            TokenKind::In => "in",
            TokenKind::Matches => "matches",
            _ => return None,
        };
        Some(text)
    }

    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            TokenKind::Eq
                | TokenKind::Ne
                | TokenKind::Gt
                | TokenKind::Ge
                | TokenKind::Lt
                | TokenKind::Le
                | TokenKind::In
                | TokenKind::Matches
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: ByteSpan,
}

/// Map a bare word to its keyword token, if it is one.
pub fn keyword(word: &str) -> Option<TokenKind> {
    let kind = match word {
        "trace" => TokenKind::Trace,
        "has" => TokenKind::Has,
        "count" => TokenKind::Count,
        "where" => TokenKind::Where,
        "and" => TokenKind::And,
        "or" => TokenKind::Or,
        "not" => TokenKind::Not,
        "true" => TokenKind::True,
        "false" => TokenKind::False,
        "in" => TokenKind::In,
        "matches" => TokenKind::Matches,
        _ => return None,
    };
    Some(kind)
}
