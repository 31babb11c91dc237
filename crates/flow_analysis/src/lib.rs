pub mod semantic;
pub mod symbols;
pub mod types;

pub use semantic::{analyze_program, Analysis, ForeignFnInfo};
pub use symbols::{Symbol, SymbolTable};
pub use types::{FnSig, StructInfo, TypeRegistry};
