//! Token types produced by the lexer and consumed by the parser. There is no
//! functionality implemented here beyond classification helpers, just basic
//! types.

use std::fmt::{self, Display, Formatter};

/// Every kind of token that can appear in a CTilde source file. The reserved
/// words each get their own variant so the parser can match on them directly.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Ident,
    IntLit,
    StrLit,

    // Reserved words
    Int,
    Void,
    Char,
    Struct,
    Return,
    While,
    If,
    Else,
    Public,
    Private,
    Namespace,
    Using,
    Const,
    Enum,
    Virtual,
    Override,
    New,
    Delete,
    Operator,

    // Punctuation
    Semi,
    Comma,
    Dot,
    ColonColon,
    Colon,
    Tilde,
    Hash,
    LParen,
    RParen,
    LBrace,
    RBrace,
    Lt,
    Gt,

    // Operators
    Assign,
    EqEq,
    NotEq,
    Plus,
    Minus,
    Star,
    Slash,
    Amp,
    Arrow,

    /// A character the lexer did not recognize. Never dropped; the parser
    /// reports it.
    Unknown,
    /// Sentinel emitted once at the end of every token stream.
    Eof,
}

impl TokenKind {
    /// Maps an identifier to its reserved-word kind, if it is one.
    pub fn keyword(text: &str) -> Option<TokenKind> {
        let kind = match text {
            "int" => TokenKind::Int,
            "void" => TokenKind::Void,
            "char" => TokenKind::Char,
            "struct" => TokenKind::Struct,
            "return" => TokenKind::Return,
            "while" => TokenKind::While,
            "if" => TokenKind::If,
            "else" => TokenKind::Else,
            "public" => TokenKind::Public,
            "private" => TokenKind::Private,
            "namespace" => TokenKind::Namespace,
            "using" => TokenKind::Using,
            "const" => TokenKind::Const,
            "enum" => TokenKind::Enum,
            "virtual" => TokenKind::Virtual,
            "override" => TokenKind::Override,
            "new" => TokenKind::New,
            "delete" => TokenKind::Delete,
            "operator" => TokenKind::Operator,
            _ => return None,
        };
        Some(kind)
    }

    /// Human-readable description used in "expected X" diagnostics.
    pub fn describe(self) -> &'static str {
        match self {
            TokenKind::Ident => "identifier",
            TokenKind::IntLit => "integer literal",
            TokenKind::StrLit => "string literal",
            TokenKind::Int => "'int'",
            TokenKind::Void => "'void'",
            TokenKind::Char => "'char'",
            TokenKind::Struct => "'struct'",
            TokenKind::Return => "'return'",
            TokenKind::While => "'while'",
            TokenKind::If => "'if'",
            TokenKind::Else => "'else'",
            TokenKind::Public => "'public'",
            TokenKind::Private => "'private'",
            TokenKind::Namespace => "'namespace'",
            TokenKind::Using => "'using'",
            TokenKind::Const => "'const'",
            TokenKind::Enum => "'enum'",
            TokenKind::Virtual => "'virtual'",
            TokenKind::Override => "'override'",
            TokenKind::New => "'new'",
            TokenKind::Delete => "'delete'",
            TokenKind::Operator => "'operator'",
            TokenKind::Semi => "';'",
            TokenKind::Comma => "','",
            TokenKind::Dot => "'.'",
            TokenKind::ColonColon => "'::'",
            TokenKind::Colon => "':'",
            TokenKind::Tilde => "'~'",
            TokenKind::Hash => "'#'",
            TokenKind::LParen => "'('",
            TokenKind::RParen => "')'",
            TokenKind::LBrace => "'{'",
            TokenKind::RBrace => "'}'",
            TokenKind::Lt => "'<'",
            TokenKind::Gt => "'>'",
            TokenKind::Assign => "'='",
            TokenKind::EqEq => "'=='",
            TokenKind::NotEq => "'!='",
            TokenKind::Plus => "'+'",
            TokenKind::Minus => "'-'",
            TokenKind::Star => "'*'",
            TokenKind::Slash => "'/'",
            TokenKind::Amp => "'&'",
            TokenKind::Arrow => "'->'",
            TokenKind::Unknown => "unknown character",
            TokenKind::Eof => "end of file",
        }
    }

    /// Name fragment used when synthesizing operator-method names, e.g.
    /// `operator +` becomes `operator_Plus`.
    pub fn operator_name(self) -> Option<&'static str> {
        let name = match self {
            TokenKind::Plus => "Plus",
            TokenKind::Minus => "Minus",
            TokenKind::Star => "Multiply",
            TokenKind::Slash => "Divide",
            TokenKind::EqEq => "Equals",
            TokenKind::NotEq => "NotEquals",
            TokenKind::Lt => "Less",
            TokenKind::Gt => "Greater",
            TokenKind::Assign => "Assign",
            TokenKind::Amp => "Ampersand",
            _ => return None,
        };
        Some(name)
    }
}

/// A single lexed token, with the source text it was produced from and its
/// 1-based position. Tokens are retained for the lifetime of the AST so that
/// diagnostics can point back into the source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub line: usize,
    pub column: usize,
}

impl Token {
    pub fn new(
        kind: TokenKind,
        text: impl Into<String>,
        line: usize,
        column: usize,
    ) -> Self {
        Self {
            kind,
            text: text.into(),
            line,
            column,
        }
    }

    /// A zero-width placeholder token, used by the parser when recovering
    /// from a missing token.
    pub fn synthetic(kind: TokenKind, line: usize, column: usize) -> Self {
        Self {
            kind,
            text: String::new(),
            line,
            column,
        }
    }

    pub fn is(&self, kind: TokenKind) -> bool {
        self.kind == kind
    }
}

impl Display for Token {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.text.is_empty() {
            write!(f, "{}", self.kind.describe())
        } else {
            write!(f, "'{}'", self.text)
        }
    }
}
