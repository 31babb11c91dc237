use std::fmt;
use std::fmt::Write as _;

use crate::source::{FileId, Loc};

/// Identity of an expression node, assigned by the parser. Semantic analysis
/// keys its resolved-type side table on these ids, so the AST itself stays
/// immutable after parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub u32);

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Language-level type descriptor.
///
/// `Struct` covers user structs, type-alias references (resolved by the
/// registry) and the built-in `Option<T>`; aliases are transparent — the
/// registry replaces them before any equality check.
#[derive(Debug, Clone, PartialEq)]
pub enum Type {
    Int,
    Float,
    Bool,
    String,
    Void,
    Unknown,
    Struct {
        name: String,
        type_params: Vec<Type>,
    },
    Array(Box<Type>),
    Function {
        ret: Box<Type>,
        params: Vec<Type>,
    },
}

impl Type {
    pub fn named(name: impl Into<String>) -> Type {
        Type::Struct {
            name: name.into(),
            type_params: Vec::new(),
        }
    }

    /// The desugaring of `T?`.
    pub fn option(inner: Type) -> Type {
        Type::Struct {
            name: "Option".to_string(),
            type_params: vec![inner],
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Type::Int | Type::Float)
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Type::Void)
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Type::Unknown)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Int => f.write_str("int"),
            Type::Float => f.write_str("float"),
            Type::Bool => f.write_str("bool"),
            Type::String => f.write_str("string"),
            Type::Void => f.write_str("void"),
            Type::Unknown => f.write_str("<unknown>"),
            Type::Struct { name, type_params } => {
                if type_params.is_empty() {
                    f.write_str(name)
                } else {
                    write!(f, "{name}<")?;
                    for (i, p) in type_params.iter().enumerate() {
                        if i > 0 {
                            f.write_str(", ")?;
                        }
                        write!(f, "{p}")?;
                    }
                    f.write_str(">")
                }
            }
            Type::Array(elem) => write!(f, "{elem}[]"),
            Type::Function { ret, params } => {
                write!(f, "{ret} lambda[")?;
                for (i, p) in params.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{p}")?;
                }
                f.write_str("]")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Expressions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
}

impl BinOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge
        )
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinOp::And | BinOp::Or)
    }

    pub fn is_bitwise(self) -> bool {
        matches!(
            self,
            BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor | BinOp::Shl | BinOp::Shr
        )
    }
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Rem => "%",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::And => "&&",
            BinOp::Or => "||",
            BinOp::BitAnd => "&",
            BinOp::BitOr => "|",
            BinOp::BitXor => "^",
            BinOp::Shl => "<<",
            BinOp::Shr => ">>",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Not,
    Neg,
    BitNot,
}

impl fmt::Display for UnOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UnOp::Not => "!",
            UnOp::Neg => "-",
            UnOp::BitNot => "~",
        })
    }
}

#[derive(Debug, Clone)]
pub struct Expr {
    pub id: NodeId,
    pub loc: Loc,
    pub kind: ExprKind,
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    IntLit(i64),
    FloatLit(f64),
    StringLit(String),
    BoolLit(bool),
    Identifier(String),
    This,
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Unary {
        op: UnOp,
        operand: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    Member {
        object: Box<Expr>,
        field: String,
    },
    StructInit {
        name: String,
        fields: Vec<Expr>,
    },
    ArrayLit(Vec<Expr>),
    Index {
        array: Box<Expr>,
        index: Box<Expr>,
    },
    Lambda {
        params: Vec<Param>,
        ret: Type,
        body: Vec<Stmt>,
    },
}

// ---------------------------------------------------------------------------
// Statements
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Stmt {
    pub loc: Loc,
    pub kind: StmtKind,
}

#[derive(Debug, Clone)]
pub enum StmtKind {
    Expr(Expr),
    VarDecl {
        name: String,
        mutable: bool,
        declared: Option<Type>,
        init: Option<Expr>,
    },
    Assign {
        target: Expr,
        value: Expr,
    },
    Return(Option<Expr>),
    If {
        cond: Expr,
        then_branch: Vec<Stmt>,
        else_branch: Vec<Stmt>,
    },
    For {
        var: String,
        range: ForRange,
        body: Vec<Stmt>,
    },
    While {
        cond: Expr,
        body: Vec<Stmt>,
    },
    Block(Vec<Stmt>),
}

/// The two forms of `for v in …`.
#[derive(Debug, Clone)]
pub enum ForRange {
    /// `for i in a..b` — both bounds `int`, `i: int`.
    Range { start: Expr, end: Expr },
    /// `for x in arr` — `arr` an array, `x` its element type.
    Iterable(Expr),
}

// ---------------------------------------------------------------------------
// Declarations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub ty: Type,
    pub loc: Loc,
}

#[derive(Debug, Clone)]
pub struct FunctionDecl {
    pub name: String,
    pub params: Vec<Param>,
    pub ret: Type,
    pub body: Vec<Stmt>,
    pub is_async: bool,
    pub is_exported: bool,
    /// Set when this function came from `impl Struct::method`; the first
    /// parameter is then the implicit `this`.
    pub is_method: bool,
    /// The struct an `impl` method belongs to.
    pub receiver: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StructField {
    pub name: String,
    pub ty: Type,
    pub loc: Loc,
}

/// A foreign function signature inside a `link` block. These have no body;
/// variadic `...` is accepted here and nowhere else.
#[derive(Debug, Clone)]
pub struct ForeignFn {
    pub name: String,
    pub params: Vec<Param>,
    pub ret: Type,
    pub variadic: bool,
    pub loc: Loc,
}

#[derive(Debug, Clone)]
pub struct LinkDecl {
    /// Adapter name: `c`, `python`, …
    pub adapter: String,
    /// Optional module/library after the colon: `link "c:m"` → `m`.
    pub module: String,
    pub inline_code: Option<String>,
    pub functions: Vec<ForeignFn>,
}

#[derive(Debug, Clone)]
pub struct ImportDecl {
    pub path: String,
    /// `import { a, b } from "…"` — only these names.
    pub selected: Option<Vec<String>>,
    /// `import "…" as m` — prefix imported names with `m.`.
    pub alias: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Decl {
    pub loc: Loc,
    pub kind: DeclKind,
}

#[derive(Debug, Clone)]
pub enum DeclKind {
    Function(FunctionDecl),
    Struct {
        name: String,
        fields: Vec<StructField>,
        is_exported: bool,
    },
    TypeDef {
        name: String,
        aliased: Type,
        is_exported: bool,
    },
    Link(LinkDecl),
    Import(ImportDecl),
    Module {
        name: String,
    },
    /// A statement at the top level of a module; collected into `main` by
    /// the lowering pass.
    Stmt(Stmt),
}

/// Root of one parsed module. Owns every node beneath it.
#[derive(Debug, Clone)]
pub struct Program {
    pub file: FileId,
    pub decls: Vec<Decl>,
}

impl Program {
    /// Iterate the module's function declarations (methods included).
    pub fn functions(&self) -> impl Iterator<Item = &FunctionDecl> {
        self.decls.iter().filter_map(|d| match &d.kind {
            DeclKind::Function(f) => Some(f),
            _ => None,
        })
    }

    /// Plain-text indented dump for `--emit-ast`.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        for decl in &self.decls {
            dump_decl(decl, 0, &mut out);
        }
        out
    }
}

fn pad(depth: usize, out: &mut String) {
    for _ in 0..depth {
        out.push_str("  ");
    }
}

fn dump_decl(decl: &Decl, depth: usize, out: &mut String) {
    if let DeclKind::Stmt(stmt) = &decl.kind {
        dump_stmt(stmt, depth, out);
        return;
    }
    pad(depth, out);
    match &decl.kind {
        DeclKind::Function(f) => {
            let _ = write!(out, "Function {}(", f.name);
            for (i, p) in f.params.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                let _ = write!(out, "{}: {}", p.name, p.ty);
            }
            let _ = writeln!(out, ") -> {}", f.ret);
            for stmt in &f.body {
                dump_stmt(stmt, depth + 1, out);
            }
        }
        DeclKind::Struct { name, fields, .. } => {
            let _ = writeln!(out, "Struct {name}");
            for field in fields {
                pad(depth + 1, out);
                let _ = writeln!(out, "{}: {}", field.name, field.ty);
            }
        }
        DeclKind::TypeDef { name, aliased, .. } => {
            let _ = writeln!(out, "TypeDef {name} = {aliased}");
        }
        DeclKind::Link(link) => {
            let _ = writeln!(out, "Link adapter={} module={}", link.adapter, link.module);
            for func in &link.functions {
                pad(depth + 1, out);
                let variadic = if func.variadic { ", ..." } else { "" };
                let _ = writeln!(out, "foreign {}({}{variadic}) -> {}", func.name,
                    func.params
                        .iter()
                        .map(|p| p.ty.to_string())
                        .collect::<Vec<_>>()
                        .join(", "),
                    func.ret);
            }
        }
        DeclKind::Import(import) => {
            let _ = write!(out, "Import {:?}", import.path);
            if let Some(selected) = &import.selected {
                let _ = write!(out, " selected={selected:?}");
            }
            if let Some(alias) = &import.alias {
                let _ = write!(out, " as {alias}");
            }
            out.push('\n');
        }
        DeclKind::Module { name } => {
            let _ = writeln!(out, "Module {name}");
        }
        DeclKind::Stmt(_) => unreachable!("handled above"),
    }
}

fn dump_stmt(stmt: &Stmt, depth: usize, out: &mut String) {
    pad(depth, out);
    match &stmt.kind {
        StmtKind::Expr(e) => {
            out.push_str("Expr ");
            dump_expr(e, out);
            out.push('\n');
        }
        StmtKind::VarDecl {
            name,
            mutable,
            declared,
            init,
        } => {
            let _ = write!(out, "VarDecl {name}");
            if *mutable {
                out.push_str(" mut");
            }
            if let Some(ty) = declared {
                let _ = write!(out, ": {ty}");
            }
            if let Some(init) = init {
                out.push_str(" = ");
                dump_expr(init, out);
            }
            out.push('\n');
        }
        StmtKind::Assign { target, value } => {
            out.push_str("Assign ");
            dump_expr(target, out);
            out.push_str(" = ");
            dump_expr(value, out);
            out.push('\n');
        }
        StmtKind::Return(value) => {
            out.push_str("Return");
            if let Some(v) = value {
                out.push(' ');
                dump_expr(v, out);
            }
            out.push('\n');
        }
        StmtKind::If {
            cond,
            then_branch,
            else_branch,
        } => {
            out.push_str("If ");
            dump_expr(cond, out);
            out.push('\n');
            for s in then_branch {
                dump_stmt(s, depth + 1, out);
            }
            if !else_branch.is_empty() {
                pad(depth, out);
                out.push_str("Else\n");
                for s in else_branch {
                    dump_stmt(s, depth + 1, out);
                }
            }
        }
        StmtKind::For { var, range, body } => {
            let _ = write!(out, "For {var} in ");
            match range {
                ForRange::Range { start, end } => {
                    dump_expr(start, out);
                    out.push_str("..");
                    dump_expr(end, out);
                }
                ForRange::Iterable(e) => dump_expr(e, out),
            }
            out.push('\n');
            for s in body {
                dump_stmt(s, depth + 1, out);
            }
        }
        StmtKind::While { cond, body } => {
            out.push_str("While ");
            dump_expr(cond, out);
            out.push('\n');
            for s in body {
                dump_stmt(s, depth + 1, out);
            }
        }
        StmtKind::Block(stmts) => {
            out.push_str("Block\n");
            for s in stmts {
                dump_stmt(s, depth + 1, out);
            }
        }
    }
}

fn dump_expr(expr: &Expr, out: &mut String) {
    match &expr.kind {
        ExprKind::IntLit(v) => {
            let _ = write!(out, "{v}");
        }
        ExprKind::FloatLit(v) => {
            let _ = write!(out, "{v}");
        }
        ExprKind::StringLit(v) => {
            let _ = write!(out, "{v:?}");
        }
        ExprKind::BoolLit(v) => {
            let _ = write!(out, "{v}");
        }
        ExprKind::Identifier(name) => out.push_str(name),
        ExprKind::This => out.push_str("this"),
        ExprKind::Binary { op, lhs, rhs } => {
            out.push('(');
            dump_expr(lhs, out);
            let _ = write!(out, " {op} ");
            dump_expr(rhs, out);
            out.push(')');
        }
        ExprKind::Unary { op, operand } => {
            let _ = write!(out, "{op}");
            dump_expr(operand, out);
        }
        ExprKind::Call { callee, args } => {
            dump_expr(callee, out);
            out.push('(');
            for (i, arg) in args.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                dump_expr(arg, out);
            }
            out.push(')');
        }
        ExprKind::Member { object, field } => {
            dump_expr(object, out);
            let _ = write!(out, ".{field}");
        }
        ExprKind::StructInit { name, fields } => {
            let _ = write!(out, "{name} {{ ");
            for (i, f) in fields.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                dump_expr(f, out);
            }
            out.push_str(" }");
        }
        ExprKind::ArrayLit(elems) => {
            out.push('[');
            for (i, e) in elems.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                dump_expr(e, out);
            }
            out.push(']');
        }
        ExprKind::Index { array, index } => {
            dump_expr(array, out);
            out.push('[');
            dump_expr(index, out);
            out.push(']');
        }
        ExprKind::Lambda { params, ret, .. } => {
            let _ = write!(out, "{ret} lambda[");
            for (i, p) in params.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                let _ = write!(out, "{}: {}", p.name, p.ty);
            }
            out.push_str("] { ... }");
        }
    }
}
