use std::fmt;

use crate::source::Loc;

/// The fixed set of token kinds the scanner can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    // Keywords
    KwLet,
    KwMut,
    KwFunc,
    KwReturn,
    KwStruct,
    KwType,
    KwIf,
    KwElse,
    KwFor,
    KwIn,
    KwWhile,
    KwLink,
    KwExport,
    KwAsync,
    KwAwait,
    KwInline,
    KwImport,
    KwModule,
    KwFrom,
    KwAs,
    KwImpl,
    KwThis,
    KwLambda,

    // Type names
    TyInt,
    TyFloat,
    TyString,
    TyBool,
    TyVoid,

    // Literals
    IntLiteral,
    FloatLiteral,
    StringLiteral,
    BoolLiteral,

    Identifier,

    // Operators
    Plus,         // +
    Minus,        // -
    Star,         // *
    Slash,        // /
    Percent,      // %
    Assign,       // =
    Eq,           // ==
    Ne,           // !=
    Lt,           // <
    Le,           // <=
    Gt,           // >
    Ge,           // >=
    AndAnd,       // &&
    OrOr,         // ||
    Not,          // !
    Amp,          // &
    Pipe,         // |
    Caret,        // ^
    Tilde,        // ~
    Shl,          // <<
    Shr,          // >>

    // Delimiters
    LParen,       // (
    RParen,       // )
    LBrace,       // {
    RBrace,       // }
    LBracket,     // [
    RBracket,     // ]
    Semicolon,    // ;
    Colon,        // :
    Comma,        // ,
    Question,     // ?
    Dot,          // .
    Arrow,        // ->
    DotDot,       // ..
    Ellipsis,     // ...
    Hash,         // #
    ColonColon,   // ::

    Eof,
    Invalid,
}

impl TokenKind {
    /// Keyword/type-name lookup for a scanned identifier. `true`/`false`
    /// scan as `BoolLiteral` so the parser never special-cases them.
    pub fn from_identifier(text: &str) -> TokenKind {
        match text {
            "let" => TokenKind::KwLet,
            "mut" => TokenKind::KwMut,
            "func" => TokenKind::KwFunc,
            "return" => TokenKind::KwReturn,
            "struct" => TokenKind::KwStruct,
            "type" => TokenKind::KwType,
            "if" => TokenKind::KwIf,
            "else" => TokenKind::KwElse,
            "for" => TokenKind::KwFor,
            "in" => TokenKind::KwIn,
            "while" => TokenKind::KwWhile,
            "link" => TokenKind::KwLink,
            "export" => TokenKind::KwExport,
            "async" => TokenKind::KwAsync,
            "await" => TokenKind::KwAwait,
            "inline" => TokenKind::KwInline,
            "import" => TokenKind::KwImport,
            "module" => TokenKind::KwModule,
            "from" => TokenKind::KwFrom,
            "as" => TokenKind::KwAs,
            "impl" => TokenKind::KwImpl,
            "this" => TokenKind::KwThis,
            "lambda" => TokenKind::KwLambda,
            "int" => TokenKind::TyInt,
            "float" => TokenKind::TyFloat,
            "string" => TokenKind::TyString,
            "bool" => TokenKind::TyBool,
            "void" => TokenKind::TyVoid,
            "true" | "false" => TokenKind::BoolLiteral,
            _ => TokenKind::Identifier,
        }
    }

    /// True for the built-in type-name tokens (`int` … `void`).
    pub fn is_type_name(self) -> bool {
        matches!(
            self,
            TokenKind::TyInt
                | TokenKind::TyFloat
                | TokenKind::TyString
                | TokenKind::TyBool
                | TokenKind::TyVoid
        )
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TokenKind::KwLet => "let",
            TokenKind::KwMut => "mut",
            TokenKind::KwFunc => "func",
            TokenKind::KwReturn => "return",
            TokenKind::KwStruct => "struct",
            TokenKind::KwType => "type",
            TokenKind::KwIf => "if",
            TokenKind::KwElse => "else",
            TokenKind::KwFor => "for",
            TokenKind::KwIn => "in",
            TokenKind::KwWhile => "while",
            TokenKind::KwLink => "link",
            TokenKind::KwExport => "export",
            TokenKind::KwAsync => "async",
            TokenKind::KwAwait => "await",
            TokenKind::KwInline => "inline",
            TokenKind::KwImport => "import",
            TokenKind::KwModule => "module",
            TokenKind::KwFrom => "from",
            TokenKind::KwAs => "as",
            TokenKind::KwImpl => "impl",
            TokenKind::KwThis => "this",
            TokenKind::KwLambda => "lambda",
            TokenKind::TyInt => "int",
            TokenKind::TyFloat => "float",
            TokenKind::TyString => "string",
            TokenKind::TyBool => "bool",
            TokenKind::TyVoid => "void",
            TokenKind::IntLiteral => "integer literal",
            TokenKind::FloatLiteral => "float literal",
            TokenKind::StringLiteral => "string literal",
            TokenKind::BoolLiteral => "boolean literal",
            TokenKind::Identifier => "identifier",
            TokenKind::Plus => "+",
            TokenKind::Minus => "-",
            TokenKind::Star => "*",
            TokenKind::Slash => "/",
            TokenKind::Percent => "%",
            TokenKind::Assign => "=",
            TokenKind::Eq => "==",
            TokenKind::Ne => "!=",
            TokenKind::Lt => "<",
            TokenKind::Le => "<=",
            TokenKind::Gt => ">",
            TokenKind::Ge => ">=",
            TokenKind::AndAnd => "&&",
            TokenKind::OrOr => "||",
            TokenKind::Not => "!",
            TokenKind::Amp => "&",
            TokenKind::Pipe => "|",
            TokenKind::Caret => "^",
            TokenKind::Tilde => "~",
            TokenKind::Shl => "<<",
            TokenKind::Shr => ">>",
            TokenKind::LParen => "(",
            TokenKind::RParen => ")",
            TokenKind::LBrace => "{",
            TokenKind::RBrace => "}",
            TokenKind::LBracket => "[",
            TokenKind::RBracket => "]",
            TokenKind::Semicolon => ";",
            TokenKind::Colon => ":",
            TokenKind::Comma => ",",
            TokenKind::Question => "?",
            TokenKind::Dot => ".",
            TokenKind::Arrow => "->",
            TokenKind::DotDot => "..",
            TokenKind::Ellipsis => "...",
            TokenKind::Hash => "#",
            TokenKind::ColonColon => "::",
            TokenKind::Eof => "end of file",
            TokenKind::Invalid => "invalid token",
        };
        f.write_str(s)
    }
}

/// A scanned token. For string literals the lexeme is the *decoded* value
/// (escape sequences already processed); for every other kind it is the
/// exact source slice.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub lexeme: String,
    pub loc: Loc,
}

impl Token {
    pub fn new(kind: TokenKind, lexeme: impl Into<String>, loc: Loc) -> Self {
        Self {
            kind,
            lexeme: lexeme.into(),
            loc,
        }
    }

    pub fn is(&self, kind: TokenKind) -> bool {
        self.kind == kind
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            TokenKind::Identifier
            | TokenKind::IntLiteral
            | TokenKind::FloatLiteral
            | TokenKind::BoolLiteral => write!(f, "{} `{}`", self.kind, self.lexeme),
            TokenKind::StringLiteral => write!(f, "string literal {:?}", self.lexeme),
            _ => write!(f, "`{}`", self.kind),
        }
    }
}
