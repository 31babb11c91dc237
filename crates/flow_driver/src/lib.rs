pub mod embed;
pub mod linker;
pub mod lsp;
pub mod pipeline;

pub use lsp::LanguageServer;
pub use pipeline::{compile_file, plan_build, Build, CompileError, CompileOptions};
