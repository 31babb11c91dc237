pub mod ast;
pub mod diagnostics;
pub mod lexer;
pub mod parse;
pub mod resolve;
pub mod source;
pub mod token;

pub use ast::{Program, Type};
pub use diagnostics::{Category, Diagnostic, DiagnosticSink, Severity};
pub use source::{FileId, Loc, SourceMap};
pub use token::{Token, TokenKind};
