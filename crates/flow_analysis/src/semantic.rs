use std::path::{Path, PathBuf};

use rustc_hash::FxHashMap;

use flow_frontend::ast::*;
use flow_frontend::diagnostics::{Category, DiagnosticSink};
use flow_frontend::parse;
use flow_frontend::resolve::ModuleResolver;
use flow_frontend::source::{FileId, Loc, SourceMap};

use crate::symbols::{Symbol, SymbolTable};
use crate::types::{FnSig, TypeRegistry};

/// A foreign function registered by a `link` declaration, with the adapter
/// metadata the orchestrator uses to pick link-time libraries.
#[derive(Debug, Clone)]
pub struct ForeignFnInfo {
    pub name: String,
    pub adapter: String,
    pub module: String,
    pub sig: FnSig,
}

/// Everything semantic analysis produces for one module.
///
/// The AST itself is left untouched; resolved expression types live in the
/// `types` side table keyed by `NodeId`, and the lowering pass reads from
/// there.
#[derive(Debug)]
pub struct Analysis {
    pub types: FxHashMap<NodeId, Type>,
    pub registry: TypeRegistry,
    /// Call expression → the IR symbol it dispatches to directly (function
    /// name, mangled method name, or a builtin). Calls absent from this map
    /// are indirect calls through a function-typed value.
    pub direct_callees: FxHashMap<NodeId, String>,
    pub foreign_functions: Vec<ForeignFnInfo>,
    /// Canonical paths of the modules this one imports.
    pub imported_modules: Vec<PathBuf>,
    /// Libraries to pass to the linker (`link "c:<lib>"`).
    pub link_libraries: Vec<String>,
    pub module_name: Option<String>,
}

impl Analysis {
    pub fn type_of(&self, id: NodeId) -> Type {
        self.types.get(&id).cloned().unwrap_or(Type::Unknown)
    }
}

/// Run semantic analysis over a parsed module.
///
/// `file_path` is the module's path on disk, used to resolve its relative
/// imports. Imported modules are parsed and analyzed on demand in a fresh
/// analyzer sharing the same resolver, source map, and sink.
pub fn analyze_program(
    program: &Program,
    file_path: &Path,
    sources: &mut SourceMap,
    resolver: &mut ModuleResolver,
    sink: &mut DiagnosticSink,
) -> Analysis {
    let mut analyzer = SemanticAnalyzer {
        sources,
        resolver,
        sink,
        file_path: file_path.to_path_buf(),
        symbols: SymbolTable::new(),
        registry: TypeRegistry::new(),
        types: FxHashMap::default(),
        direct_callees: FxHashMap::default(),
        foreign_functions: Vec::new(),
        imported_modules: Vec::new(),
        link_libraries: Vec::new(),
        module_name: None,
        current_return: None,
    };
    analyzer.register_builtins();

    for decl in &program.decls {
        analyzer.visit_decl(decl);
    }
    debug_assert_eq!(analyzer.symbols.depth(), 1);

    Analysis {
        types: analyzer.types,
        registry: analyzer.registry,
        direct_callees: analyzer.direct_callees,
        foreign_functions: analyzer.foreign_functions,
        imported_modules: analyzer.imported_modules,
        link_libraries: analyzer.link_libraries,
        module_name: analyzer.module_name,
    }
}

struct SemanticAnalyzer<'a> {
    sources: &'a mut SourceMap,
    resolver: &'a mut ModuleResolver,
    sink: &'a mut DiagnosticSink,
    file_path: PathBuf,
    symbols: SymbolTable,
    registry: TypeRegistry,
    types: FxHashMap<NodeId, Type>,
    direct_callees: FxHashMap<NodeId, String>,
    foreign_functions: Vec<ForeignFnInfo>,
    imported_modules: Vec<PathBuf>,
    link_libraries: Vec<String>,
    module_name: Option<String>,
    /// Declared return type of the function being checked.
    current_return: Option<Type>,
}

impl SemanticAnalyzer<'_> {
    fn error(&mut self, message: impl Into<String>, loc: Loc) {
        self.sink.error(Category::Semantic, message, loc);
    }

    fn warning(&mut self, message: impl Into<String>, loc: Loc) {
        self.sink.warning(Category::Semantic, message, loc);
    }

    fn register_builtins(&mut self) {
        let print_sig = FnSig::new(vec![Type::String], Type::Void);
        for name in ["print", "println"] {
            self.registry.define_function(name, print_sig.clone());
            let _ = self.symbols.define(Symbol::function(
                name,
                Type::Function {
                    ret: Box::new(Type::Void),
                    params: vec![Type::String],
                },
            ));
        }

        // `len(arr)` folds to the array's tracked length during lowering.
        self.registry.define_function(
            "len",
            FnSig::new(vec![Type::Array(Box::new(Type::Unknown))], Type::Int),
        );
        let _ = self.symbols.define(Symbol::function(
            "len",
            Type::Function {
                ret: Box::new(Type::Int),
                params: vec![Type::Array(Box::new(Type::Unknown))],
            },
        ));
    }

    // ---- helpers ----------------------------------------------------------

    fn fn_type(sig: &FnSig) -> Type {
        Type::Function {
            ret: Box::new(sig.ret.clone()),
            params: sig.params.clone(),
        }
    }

    fn sig_of(func: &FunctionDecl) -> FnSig {
        FnSig::new(
            func.params.iter().map(|p| p.ty.clone()).collect(),
            func.ret.clone(),
        )
    }

    /// Whether `value` may initialize/fill a slot of type `target`.
    /// Integer *literals* convert to `float` implicitly; everything else is
    /// resolved structural equality. `Unknown` on either side is accepted
    /// silently to avoid cascade errors.
    fn assignable(&self, target: &Type, value_ty: &Type, value: &Expr) -> bool {
        let target = self.registry.resolve(target);
        let value_ty = self.registry.resolve(value_ty);
        if target.is_unknown() || value_ty.is_unknown() {
            return true;
        }
        if target == value_ty {
            return true;
        }
        target == Type::Float && matches!(value.kind, ExprKind::IntLit(_))
    }

    /// Report uses of undeclared type names inside annotations.
    fn check_type(&mut self, ty: &Type, loc: Loc) {
        match ty {
            Type::Struct { name, type_params } => {
                for param in type_params {
                    self.check_type(param, loc);
                }
                if !self.registry.has_struct(name) && !self.registry.is_alias(name) {
                    self.error(format!("unknown type `{name}`"), loc);
                }
            }
            Type::Array(elem) => self.check_type(elem, loc),
            Type::Function { ret, params } => {
                self.check_type(ret, loc);
                for param in params {
                    self.check_type(param, loc);
                }
            }
            _ => {}
        }
    }

    fn record(&mut self, id: NodeId, ty: Type) -> Type {
        self.types.insert(id, ty.clone());
        ty
    }

    // ---- declarations -----------------------------------------------------

    fn visit_decl(&mut self, decl: &Decl) {
        match &decl.kind {
            DeclKind::Module { name } => {
                self.module_name = Some(name.clone());
            }
            DeclKind::Import(import) => self.visit_import(import, decl.loc),
            DeclKind::Function(func) => self.visit_function(func, decl.loc),
            DeclKind::Struct { name, fields, .. } => self.visit_struct(name, fields, decl.loc),
            DeclKind::TypeDef { name, aliased, .. } => {
                self.check_type(aliased, decl.loc);
                if self.registry.define_alias(name, aliased.clone()).is_err() {
                    self.error(format!("type alias cycle involving `{name}`"), decl.loc);
                }
            }
            DeclKind::Link(link) => self.visit_link(link),
            DeclKind::Stmt(stmt) => self.visit_stmt(stmt),
        }
    }

    fn visit_struct(&mut self, name: &str, fields: &[StructField], loc: Loc) {
        let mut seen = Vec::new();
        for field in fields {
            if seen.contains(&&field.name) {
                self.error(
                    format!("duplicate field `{}` in struct `{name}`", field.name),
                    field.loc,
                );
            }
            seen.push(&field.name);
            self.check_type(&field.ty, field.loc);
        }
        if self.registry.struct_info(name).is_some() {
            self.error(format!("duplicate declaration of struct `{name}`"), loc);
            return;
        }
        self.registry.define_struct(
            name,
            fields
                .iter()
                .map(|f| (f.name.clone(), f.ty.clone()))
                .collect(),
        );
    }

    fn visit_function(&mut self, func: &FunctionDecl, loc: Loc) {
        for param in &func.params {
            self.check_type(&param.ty, param.loc);
        }
        self.check_type(&func.ret, loc);

        let sig = Self::sig_of(func);
        if func.is_method {
            let receiver = func.receiver.as_deref().unwrap_or_default();
            if !self.registry.has_struct(receiver) {
                self.error(format!("unknown struct `{receiver}` in `impl`"), loc);
            }
            if self.registry.method(receiver, &func.name).is_some() {
                self.error(
                    format!("duplicate declaration of method `{receiver}::{}`", func.name),
                    loc,
                );
            }
            self.registry.define_method(receiver, &func.name, sig.clone());
        } else {
            if self
                .symbols
                .define(Symbol::function(&func.name, Self::fn_type(&sig)))
                .is_err()
            {
                self.error(format!("duplicate declaration of `{}`", func.name), loc);
            }
            self.registry.define_function(&func.name, sig);
        }

        // Body: fresh scope with parameters bound.
        let depth = self.symbols.depth();
        self.symbols.enter_scope();
        for param in &func.params {
            let _ = self.symbols.define(Symbol::variable(
                param.name.clone(),
                param.ty.clone(),
                false,
                true,
            ));
        }
        let saved_return = self.current_return.replace(func.ret.clone());
        for stmt in &func.body {
            self.visit_stmt(stmt);
        }
        self.current_return = saved_return;
        self.symbols.exit_scope();
        debug_assert_eq!(depth, self.symbols.depth());

        if !func.ret.is_void() && !always_returns(&func.body) {
            self.warning(
                format!(
                    "function `{}` does not return a value on every path; a zero value of `{}` is supplied",
                    func.name, func.ret
                ),
                loc,
            );
        }
    }

    fn visit_link(&mut self, link: &LinkDecl) {
        for func in &link.functions {
            for param in &func.params {
                self.check_type(&param.ty, param.loc);
            }
            let mut sig = FnSig::new(
                func.params.iter().map(|p| p.ty.clone()).collect(),
                func.ret.clone(),
            );
            sig.variadic = func.variadic;

            if self
                .symbols
                .define(Symbol::function(&func.name, Self::fn_type(&sig)))
                .is_err()
            {
                self.error(format!("duplicate declaration of `{}`", func.name), func.loc);
            }
            self.registry.define_function(&func.name, sig.clone());
            self.foreign_functions.push(ForeignFnInfo {
                name: func.name.clone(),
                adapter: link.adapter.clone(),
                module: link.module.clone(),
                sig,
            });
        }

        // Adapter `c` libraries are linked at build time; other adapters
        // dispatch at run time through the bridge.
        if link.adapter == "c" && !link.module.is_empty() {
            self.link_libraries.push(link.module.clone());
        }
    }

    // ---- imports ----------------------------------------------------------

    fn visit_import(&mut self, import: &ImportDecl, loc: Loc) {
        let dir = self
            .file_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        let canonical = match self.resolver.resolve(&import.path, &dir) {
            Ok(path) => path,
            Err(err) => {
                self.sink.error(Category::Import, err.to_string(), loc);
                return;
            }
        };

        if self.resolver.is_loading(&canonical) {
            self.sink.error(
                Category::Import,
                format!("circular import detected: `{}`", import.path),
                loc,
            );
            return;
        }

        if self.resolver.get(&canonical).is_none() {
            // First time through: parse and analyze the module in a fresh
            // analyzer before its symbols are copied over.
            self.resolver.begin_loading(&canonical);
            let file_id = match self.sources.load(&canonical) {
                Ok(id) => id,
                Err(err) => {
                    self.sink.error(
                        Category::Import,
                        format!("cannot read `{}`: {err}", canonical.display()),
                        loc,
                    );
                    self.resolver.finish_loading(
                        &canonical,
                        Program {
                            file: FileId(u32::MAX),
                            decls: Vec::new(),
                        },
                    );
                    return;
                }
            };
            let text = self.sources.text(file_id).to_string();
            let parsed = parse::parse_source(&text, file_id, self.sink);
            analyze_program(&parsed, &canonical, self.sources, self.resolver, self.sink);
            self.resolver.finish_loading(&canonical, parsed);
        }

        if !self.imported_modules.contains(&canonical) {
            self.imported_modules.push(canonical.clone());
        }

        // Clone the importable surface out of the cache so symbol
        // registration below can borrow `self` freely.
        let module = self
            .resolver
            .get(&canonical)
            .expect("module just loaded")
            .clone();
        self.import_symbols(&module, import, loc);
    }

    /// Copy the imported module's top-level symbols into the current scope,
    /// honoring `selected` and `alias`.
    fn import_symbols(&mut self, module: &Program, import: &ImportDecl, loc: Loc) {
        let wanted = |name: &str| match &import.selected {
            Some(selected) => selected.iter().any(|s| s == name),
            None => true,
        };
        let local_name = |name: &str| match &import.alias {
            Some(alias) => format!("{alias}.{name}"),
            None => name.to_string(),
        };

        let mut exported: Vec<&str> = Vec::new();

        for decl in &module.decls {
            match &decl.kind {
                DeclKind::Function(func) if func.is_method => {
                    // Methods travel with their struct.
                    let receiver = func.receiver.as_deref().unwrap_or_default();
                    self.registry
                        .define_method(receiver, &func.name, Self::sig_of(func));
                }
                DeclKind::Function(func) => {
                    exported.push(&func.name);
                    if !wanted(&func.name) {
                        continue;
                    }
                    let sig = Self::sig_of(func);
                    let name = local_name(&func.name);
                    let mut symbol = Symbol::function(&name, Self::fn_type(&sig));
                    symbol.is_foreign = true;
                    if self.symbols.define(symbol).is_err() {
                        self.error(format!("duplicate declaration of `{name}`"), loc);
                        continue;
                    }
                    self.registry.define_function(&name, sig);
                }
                DeclKind::Struct { name, fields, .. } => {
                    exported.push(name);
                    if !wanted(name) {
                        continue;
                    }
                    if self.registry.struct_info(name).is_none() {
                        self.registry.define_struct(
                            name,
                            fields
                                .iter()
                                .map(|f| (f.name.clone(), f.ty.clone()))
                                .collect(),
                        );
                    }
                }
                DeclKind::TypeDef { name, aliased, .. } => {
                    exported.push(name);
                    if !wanted(name) {
                        continue;
                    }
                    let _ = self.registry.define_alias(name, aliased.clone());
                }
                DeclKind::Link(link) => {
                    for func in &link.functions {
                        exported.push(&func.name);
                        if !wanted(&func.name) {
                            continue;
                        }
                        let mut sig = FnSig::new(
                            func.params.iter().map(|p| p.ty.clone()).collect(),
                            func.ret.clone(),
                        );
                        sig.variadic = func.variadic;
                        let name = local_name(&func.name);
                        let mut symbol = Symbol::function(&name, Self::fn_type(&sig));
                        symbol.is_foreign = true;
                        let _ = self.symbols.define(symbol);
                        self.registry.define_function(&name, sig.clone());
                        self.foreign_functions.push(ForeignFnInfo {
                            name: func.name.clone(),
                            adapter: link.adapter.clone(),
                            module: link.module.clone(),
                            sig,
                        });
                    }
                    if link.adapter == "c"
                        && !link.module.is_empty()
                        && !self.link_libraries.contains(&link.module)
                    {
                        self.link_libraries.push(link.module.clone());
                    }
                }
                _ => {}
            }
        }

        if let Some(selected) = &import.selected {
            for name in selected {
                if !exported.iter().any(|e| e == name) {
                    self.sink.error(
                        Category::Import,
                        format!("`{name}` is not exported by `{}`", import.path),
                        loc,
                    );
                }
            }
        }
    }

    // ---- statements -------------------------------------------------------

    fn visit_stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::Expr(expr) => {
                self.visit_expr(expr);
            }
            StmtKind::VarDecl {
                name,
                mutable,
                declared,
                init,
            } => self.visit_var_decl(name, *mutable, declared, init, stmt.loc),
            StmtKind::Assign { target, value } => self.visit_assign(target, value),
            StmtKind::Return(value) => self.visit_return(value.as_ref(), stmt.loc),
            StmtKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                let cond_ty = self.visit_expr(cond);
                self.require_bool(&cond_ty, cond.loc, "if");
                self.visit_block(then_branch);
                self.visit_block(else_branch);
            }
            StmtKind::While { cond, body } => {
                let cond_ty = self.visit_expr(cond);
                self.require_bool(&cond_ty, cond.loc, "while");
                self.visit_block(body);
            }
            StmtKind::For { var, range, body } => self.visit_for(var, range, body),
            StmtKind::Block(stmts) => self.visit_block(stmts),
        }
    }

    fn visit_block(&mut self, stmts: &[Stmt]) {
        let depth = self.symbols.depth();
        self.symbols.enter_scope();
        for stmt in stmts {
            self.visit_stmt(stmt);
        }
        self.symbols.exit_scope();
        debug_assert_eq!(depth, self.symbols.depth());
    }

    fn require_bool(&mut self, ty: &Type, loc: Loc, construct: &str) {
        let resolved = self.registry.resolve(ty);
        if !resolved.is_unknown() && resolved != Type::Bool {
            self.error(
                format!("`{construct}` condition must be `bool`, found `{resolved}`"),
                loc,
            );
        }
    }

    fn visit_var_decl(
        &mut self,
        name: &str,
        mutable: bool,
        declared: &Option<Type>,
        init: &Option<Expr>,
        loc: Loc,
    ) {
        if let Some(ty) = declared {
            self.check_type(ty, loc);
        }
        let init_ty = init.as_ref().map(|e| self.visit_expr(e));

        let ty = match (declared, init) {
            (Some(declared_ty), Some(init_expr)) => {
                let init_ty = init_ty.unwrap();
                if !self.assignable(declared_ty, &init_ty, init_expr) {
                    let expected = self.registry.resolve(declared_ty);
                    self.error(
                        format!("type mismatch: expected `{expected}`, found `{init_ty}`"),
                        init_expr.loc,
                    );
                }
                declared_ty.clone()
            }
            (Some(declared_ty), None) => declared_ty.clone(),
            (None, Some(_)) => init_ty.unwrap(),
            (None, None) => Type::Unknown,
        };

        if self
            .symbols
            .define(Symbol::variable(name, ty, mutable, init.is_some()))
            .is_err()
        {
            self.error(format!("duplicate declaration of `{name}`"), loc);
        }
    }

    fn visit_assign(&mut self, target: &Expr, value: &Expr) {
        // Mutability is a property of the root binding.
        if let Some(root) = root_identifier(target) {
            let root = root.to_string();
            match self.symbols.lookup_mut(&root) {
                Some(symbol) => {
                    if symbol.is_function {
                        self.error(format!("cannot assign to function `{root}`"), target.loc);
                    } else if !symbol.is_initialized {
                        // The one allowed definite assignment of a
                        // `let x: T;` binding.
                        symbol.is_initialized = true;
                    } else if !symbol.is_mutable {
                        self.error(
                            format!("cannot assign to immutable variable `{root}`"),
                            target.loc,
                        );
                    }
                }
                None => {
                    self.error(format!("undefined symbol `{root}`"), target.loc);
                    self.visit_expr(value);
                    return;
                }
            }
        }

        let target_ty = self.visit_expr(target);
        let value_ty = self.visit_expr(value);
        if !self.assignable(&target_ty, &value_ty, value) {
            self.error(
                format!("type mismatch: cannot assign `{value_ty}` to `{target_ty}`"),
                value.loc,
            );
        }
    }

    fn visit_return(&mut self, value: Option<&Expr>, loc: Loc) {
        let value_ty = value.map(|v| self.visit_expr(v));
        let Some(expected) = self.current_return.clone() else {
            // Top-level statements are collected into `main`; a bare return
            // there is checked by lowering against `int`.
            return;
        };

        match (value, value_ty) {
            (Some(expr), Some(ty)) => {
                if expected.is_void() {
                    self.error("cannot return a value from a void function", expr.loc);
                } else if !self.assignable(&expected, &ty, expr) {
                    let expected = self.registry.resolve(&expected);
                    self.error(
                        format!("return type mismatch: expected `{expected}`, found `{ty}`"),
                        expr.loc,
                    );
                }
            }
            (None, _) => {
                if !expected.is_void() {
                    self.error(
                        format!("return without a value in a function returning `{expected}`"),
                        loc,
                    );
                }
            }
            _ => unreachable!(),
        }
    }

    fn visit_for(&mut self, var: &str, range: &ForRange, body: &[Stmt]) {
        let elem_ty = match range {
            ForRange::Range { start, end } => {
                let start_ty = self.visit_expr(start);
                let end_ty = self.visit_expr(end);
                for (ty, expr) in [(&start_ty, start), (&end_ty, end)] {
                    let resolved = self.registry.resolve(ty);
                    if !resolved.is_unknown() && resolved != Type::Int {
                        self.error(
                            format!("range bounds must be `int`, found `{resolved}`"),
                            expr.loc,
                        );
                    }
                }
                Type::Int
            }
            ForRange::Iterable(iterable) => {
                let ty = self.visit_expr(iterable);
                match self.registry.resolve(&ty) {
                    Type::Array(elem) => *elem,
                    Type::Unknown => Type::Unknown,
                    other => {
                        self.error(
                            format!("`for … in` requires an array, found `{other}`"),
                            iterable.loc,
                        );
                        Type::Unknown
                    }
                }
            }
        };

        let depth = self.symbols.depth();
        self.symbols.enter_scope();
        let _ = self
            .symbols
            .define(Symbol::variable(var, elem_ty, false, true));
        for stmt in body {
            self.visit_stmt(stmt);
        }
        self.symbols.exit_scope();
        debug_assert_eq!(depth, self.symbols.depth());
    }

    // ---- expressions ------------------------------------------------------

    fn visit_expr(&mut self, expr: &Expr) -> Type {
        let ty = match &expr.kind {
            ExprKind::IntLit(_) => Type::Int,
            ExprKind::FloatLit(_) => Type::Float,
            ExprKind::StringLit(_) => Type::String,
            ExprKind::BoolLit(_) => Type::Bool,
            ExprKind::Identifier(name) => self.visit_identifier(name, expr.loc),
            ExprKind::This => match self.symbols.lookup("this") {
                Some(symbol) => self.registry.resolve(&symbol.ty.clone()),
                None => {
                    self.error("`this` outside of a method", expr.loc);
                    Type::Unknown
                }
            },
            ExprKind::Unary { op, operand } => self.visit_unary(*op, operand, expr.loc),
            ExprKind::Binary { op, lhs, rhs } => self.visit_binary(*op, lhs, rhs, expr.loc),
            ExprKind::Call { callee, args } => self.visit_call(expr.id, callee, args, expr.loc),
            ExprKind::Member { object, field } => self.visit_member(object, field, expr.loc),
            ExprKind::StructInit { name, fields } => self.visit_struct_init(name, fields, expr.loc),
            ExprKind::ArrayLit(elements) => self.visit_array_lit(elements),
            ExprKind::Index { array, index } => self.visit_index(array, index),
            ExprKind::Lambda { params, ret, body } => self.visit_lambda(params, ret, body),
        };
        self.record(expr.id, ty)
    }

    fn visit_identifier(&mut self, name: &str, loc: Loc) -> Type {
        let Some(symbol) = self.symbols.lookup(name) else {
            self.error(format!("undefined symbol `{name}`"), loc);
            return Type::Unknown;
        };
        let ty = symbol.ty.clone();
        let initialized = symbol.is_initialized;
        if !initialized {
            self.error(format!("use of uninitialized variable `{name}`"), loc);
        }
        self.registry.resolve(&ty)
    }

    fn visit_unary(&mut self, op: UnOp, operand: &Expr, loc: Loc) -> Type {
        let ty = self.visit_expr(operand);
        let resolved = self.registry.resolve(&ty);
        if resolved.is_unknown() {
            return Type::Unknown;
        }
        match op {
            UnOp::Not => {
                if resolved != Type::Bool {
                    self.error(format!("operator `!` requires `bool`, found `{resolved}`"), loc);
                }
                Type::Bool
            }
            UnOp::Neg => {
                if !resolved.is_numeric() {
                    self.error(
                        format!("operator `-` requires a numeric operand, found `{resolved}`"),
                        loc,
                    );
                    return Type::Unknown;
                }
                resolved
            }
            UnOp::BitNot => {
                if resolved != Type::Int {
                    self.error(format!("operator `~` requires `int`, found `{resolved}`"), loc);
                }
                Type::Int
            }
        }
    }

    fn visit_binary(&mut self, op: BinOp, lhs: &Expr, rhs: &Expr, loc: Loc) -> Type {
        let lhs_ty = self.visit_expr(lhs);
        let rhs_ty = self.visit_expr(rhs);
        let l = self.registry.resolve(&lhs_ty);
        let r = self.registry.resolve(&rhs_ty);

        if op.is_logical() {
            for (ty, side) in [(&l, lhs), (&r, rhs)] {
                if !ty.is_unknown() && *ty != Type::Bool {
                    self.error(
                        format!("operator `{op}` requires `bool` operands, found `{ty}`"),
                        side.loc,
                    );
                }
            }
            return Type::Bool;
        }

        if op.is_comparison() {
            if !l.is_unknown() && !r.is_unknown() && !self.registry.types_equal(&l, &r) {
                self.error(format!("cannot compare `{l}` with `{r}`"), loc);
            }
            return Type::Bool;
        }

        if op.is_bitwise() {
            for (ty, side) in [(&l, lhs), (&r, rhs)] {
                if !ty.is_unknown() && *ty != Type::Int {
                    self.error(
                        format!("operator `{op}` requires `int` operands, found `{ty}`"),
                        side.loc,
                    );
                }
            }
            return Type::Int;
        }

        // `+` with a string operand concatenates; the other side is
        // stringified whatever its type.
        if op == BinOp::Add && (l == Type::String || r == Type::String) {
            return Type::String;
        }

        if l.is_unknown() || r.is_unknown() {
            return Type::Unknown;
        }
        if !l.is_numeric() || !r.is_numeric() {
            self.error(
                format!("operator `{op}` requires numeric operands, found `{l}` and `{r}`"),
                loc,
            );
            return Type::Unknown;
        }
        if l == Type::Float || r == Type::Float {
            Type::Float
        } else {
            Type::Int
        }
    }

    fn visit_call(&mut self, call_id: NodeId, callee: &Expr, args: &[Expr], loc: Loc) -> Type {
        let arg_tys: Vec<Type> = args.iter().map(|a| self.visit_expr(a)).collect();

        match &callee.kind {
            ExprKind::Identifier(name) => {
                let name = name.clone();
                self.check_named_call(call_id, &name, callee, args, &arg_tys, loc)
            }
            ExprKind::Member { object, field } => {
                // Alias-qualified import: `m.f(…)` where `m.f` is a symbol.
                if let ExprKind::Identifier(ns) = &object.kind {
                    if self.symbols.lookup(ns).is_none() {
                        let qualified = format!("{ns}.{field}");
                        if self
                            .symbols
                            .lookup(&qualified)
                            .is_some_and(|s| s.is_function)
                        {
                            self.record(object.id, Type::Unknown);
                            return self
                                .check_named_call(call_id, &qualified, callee, args, &arg_tys, loc);
                        }
                    }
                }

                // Method call on a struct value.
                let object_ty = self.visit_expr(object);
                let resolved = self.registry.resolve(&object_ty);
                let Type::Struct { name, .. } = &resolved else {
                    if !resolved.is_unknown() {
                        self.error(
                            format!("method call on non-struct type `{resolved}`"),
                            object.loc,
                        );
                    }
                    self.record(callee.id, Type::Unknown);
                    return Type::Unknown;
                };
                let Some(sig) = self.registry.method(name, field).cloned() else {
                    let name = name.clone();
                    let field = field.clone();
                    self.error(format!("struct `{name}` has no method `{field}`"), loc);
                    self.record(callee.id, Type::Unknown);
                    return Type::Unknown;
                };

                // First parameter is the implicit `this`.
                let expected = sig.params.len() - 1;
                if args.len() != expected {
                    self.error(
                        format!(
                            "method `{name}::{field}` expects {expected} argument(s), found {}",
                            args.len()
                        ),
                        loc,
                    );
                } else {
                    for ((param, arg_ty), arg) in
                        sig.params[1..].iter().zip(&arg_tys).zip(args)
                    {
                        if !self.assignable(param, arg_ty, arg) {
                            let expected = self.registry.resolve(param);
                            self.error(
                                format!("argument type mismatch: expected `{expected}`, found `{arg_ty}`"),
                                arg.loc,
                            );
                        }
                    }
                }

                self.direct_callees
                    .insert(call_id, format!("{name}_{field}"));
                self.record(callee.id, Self::fn_type(&sig));
                self.registry.resolve(&sig.ret)
            }
            _ => {
                // Calling an arbitrary expression: needs a function type.
                let callee_ty = self.visit_expr(callee);
                self.check_indirect_call(&callee_ty, args, &arg_tys, loc)
            }
        }
    }

    fn check_named_call(
        &mut self,
        call_id: NodeId,
        name: &str,
        callee: &Expr,
        args: &[Expr],
        arg_tys: &[Type],
        loc: Loc,
    ) -> Type {
        let Some(symbol) = self.symbols.lookup(name).cloned() else {
            self.error(format!("undefined symbol `{name}`"), loc);
            self.record(callee.id, Type::Unknown);
            return Type::Unknown;
        };

        if !symbol.is_function {
            // A variable holding a lambda.
            let ty = self.registry.resolve(&symbol.ty);
            self.record(callee.id, ty.clone());
            return self.check_indirect_call(&ty, args, arg_tys, loc);
        }

        self.record(callee.id, symbol.ty.clone());

        // `len` resolves against the tracked array length at lowering time.
        if name == "len" {
            if args.len() != 1 {
                self.error(
                    format!("`len` expects 1 argument, found {}", args.len()),
                    loc,
                );
            } else {
                let arg = self.registry.resolve(&arg_tys[0]);
                if !arg.is_unknown() && !matches!(arg, Type::Array(_)) {
                    self.error(format!("`len` requires an array, found `{arg}`"), args[0].loc);
                }
            }
            self.direct_callees.insert(call_id, "len".to_string());
            return Type::Int;
        }

        let sig = self
            .registry
            .function(name)
            .cloned()
            .unwrap_or_else(|| FnSig::new(Vec::new(), Type::Unknown));

        let arity_ok = if sig.variadic {
            args.len() >= sig.params.len()
        } else {
            args.len() == sig.params.len()
        };
        if !arity_ok {
            self.error(
                format!(
                    "function `{name}` expects {}{} argument(s), found {}",
                    if sig.variadic { "at least " } else { "" },
                    sig.params.len(),
                    args.len()
                ),
                loc,
            );
        } else {
            for ((param, arg_ty), arg) in sig.params.iter().zip(arg_tys).zip(args) {
                if !self.assignable(param, arg_ty, arg) {
                    let expected = self.registry.resolve(param);
                    self.error(
                        format!("argument type mismatch: expected `{expected}`, found `{arg_ty}`"),
                        arg.loc,
                    );
                }
            }
        }

        // Aliased imports call through to the original symbol name.
        let ir_name = name.rsplit('.').next().unwrap_or(name).to_string();
        self.direct_callees.insert(call_id, ir_name);
        self.registry.resolve(&sig.ret)
    }

    fn check_indirect_call(
        &mut self,
        callee_ty: &Type,
        args: &[Expr],
        arg_tys: &[Type],
        loc: Loc,
    ) -> Type {
        match self.registry.resolve(callee_ty) {
            Type::Function { ret, params } => {
                if args.len() != params.len() {
                    self.error(
                        format!(
                            "function value expects {} argument(s), found {}",
                            params.len(),
                            args.len()
                        ),
                        loc,
                    );
                } else {
                    for ((param, arg_ty), arg) in params.iter().zip(arg_tys).zip(args) {
                        if !self.assignable(param, arg_ty, arg) {
                            let expected = self.registry.resolve(param);
                            self.error(
                                format!("argument type mismatch: expected `{expected}`, found `{arg_ty}`"),
                                arg.loc,
                            );
                        }
                    }
                }
                *ret
            }
            Type::Unknown => Type::Unknown,
            other => {
                self.error(format!("expression of type `{other}` is not callable"), loc);
                Type::Unknown
            }
        }
    }

    fn visit_member(&mut self, object: &Expr, field: &str, loc: Loc) -> Type {
        // Alias-qualified function reference used as a value.
        if let ExprKind::Identifier(ns) = &object.kind {
            if self.symbols.lookup(ns).is_none() {
                let qualified = format!("{ns}.{field}");
                if let Some(symbol) = self.symbols.lookup(&qualified).cloned() {
                    self.record(object.id, Type::Unknown);
                    return self.registry.resolve(&symbol.ty);
                }
            }
        }

        let object_ty = self.visit_expr(object);
        let resolved = self.registry.resolve(&object_ty);
        match &resolved {
            Type::Struct { name, .. } => match self.registry.field_of(&resolved, field) {
                Some((_, field_ty)) => field_ty,
                None => {
                    let name = name.clone();
                    self.error(format!("struct `{name}` has no field `{field}`"), loc);
                    Type::Unknown
                }
            },
            Type::Unknown => Type::Unknown,
            other => {
                self.error(
                    format!("member access on non-struct type `{other}`"),
                    loc,
                );
                Type::Unknown
            }
        }
    }

    fn visit_struct_init(&mut self, name: &str, fields: &[Expr], loc: Loc) -> Type {
        let field_tys: Vec<Type> = fields.iter().map(|f| self.visit_expr(f)).collect();

        if name == "Option" {
            // Option { hasValue, value } with the inner type taken from the
            // value field.
            if fields.len() != 2 {
                self.error("`Option` has 2 fields: `hasValue` and `value`", loc);
                return Type::option(Type::Unknown);
            }
            let flag = self.registry.resolve(&field_tys[0]);
            if !flag.is_unknown() && flag != Type::Bool {
                self.error(
                    format!("`Option.hasValue` must be `bool`, found `{flag}`"),
                    fields[0].loc,
                );
            }
            return Type::option(field_tys[1].clone());
        }

        let Some(info) = self.registry.struct_info(name).cloned() else {
            self.error(format!("unknown struct `{name}`"), loc);
            return Type::Unknown;
        };

        if fields.len() != info.fields.len() {
            self.error(
                format!(
                    "struct `{name}` has {} field(s), but the initializer provides {}",
                    info.fields.len(),
                    fields.len()
                ),
                loc,
            );
        } else {
            // Initializers are positional, in declaration order.
            for (((field_name, field_ty), value_ty), value) in
                info.fields.iter().zip(&field_tys).zip(fields)
            {
                if !self.assignable(field_ty, value_ty, value) {
                    let expected = self.registry.resolve(field_ty);
                    self.error(
                        format!("field `{field_name}`: expected `{expected}`, found `{value_ty}`"),
                        value.loc,
                    );
                }
            }
        }

        Type::named(name)
    }

    fn visit_array_lit(&mut self, elements: &[Expr]) -> Type {
        let mut elem_ty = Type::Unknown;
        for element in elements {
            let ty = self.visit_expr(element);
            if elem_ty.is_unknown() {
                elem_ty = ty;
            } else if !ty.is_unknown() && !self.registry.types_equal(&elem_ty, &ty) {
                self.error(
                    format!("array elements must share one type: `{elem_ty}` vs `{ty}`"),
                    element.loc,
                );
            }
        }
        Type::Array(Box::new(elem_ty))
    }

    fn visit_index(&mut self, array: &Expr, index: &Expr) -> Type {
        let array_ty = self.visit_expr(array);
        let index_ty = self.visit_expr(index);

        let resolved_index = self.registry.resolve(&index_ty);
        if !resolved_index.is_unknown() && resolved_index != Type::Int {
            self.error(
                format!("array index must be `int`, found `{resolved_index}`"),
                index.loc,
            );
        }

        // A constant index into a literal array is checkable right here.
        if let (ExprKind::ArrayLit(elements), Some(i)) = (&array.kind, const_index(index)) {
            if i < 0 || i >= elements.len() as i64 {
                self.error(
                    format!(
                        "index {i} out of bounds for array of length {}",
                        elements.len()
                    ),
                    index.loc,
                );
            }
        }

        match self.registry.resolve(&array_ty) {
            Type::Array(elem) => *elem,
            Type::Unknown => Type::Unknown,
            other => {
                self.error(format!("cannot index a value of type `{other}`"), array.loc);
                Type::Unknown
            }
        }
    }

    fn visit_lambda(&mut self, params: &[Param], ret: &Type, body: &[Stmt]) -> Type {
        for param in params {
            self.check_type(&param.ty, param.loc);
        }

        let depth = self.symbols.depth();
        self.symbols.enter_scope();
        for param in params {
            let _ = self.symbols.define(Symbol::variable(
                param.name.clone(),
                param.ty.clone(),
                false,
                true,
            ));
        }
        let saved_return = self.current_return.replace(ret.clone());
        for stmt in body {
            self.visit_stmt(stmt);
        }
        self.current_return = saved_return;
        self.symbols.exit_scope();
        debug_assert_eq!(depth, self.symbols.depth());

        Type::Function {
            ret: Box::new(ret.clone()),
            params: params.iter().map(|p| p.ty.clone()).collect(),
        }
    }
}

/// Integer constant of an index expression, negation included — `-1`
/// parses as `Unary(Neg, IntLit(1))`, not as a negative literal.
fn const_index(expr: &Expr) -> Option<i64> {
    match &expr.kind {
        ExprKind::IntLit(i) => Some(*i),
        ExprKind::Unary {
            op: UnOp::Neg,
            operand,
        } => match operand.kind {
            ExprKind::IntLit(i) => Some(-i),
            _ => None,
        },
        _ => None,
    }
}

fn root_identifier(expr: &Expr) -> Option<&str> {
    match &expr.kind {
        ExprKind::Identifier(name) => Some(name),
        ExprKind::Member { object, .. } => root_identifier(object),
        ExprKind::Index { array, .. } => root_identifier(array),
        _ => None,
    }
}

/// Conservative all-paths-return check used for the missing-return warning.
fn always_returns(stmts: &[Stmt]) -> bool {
    stmts.iter().any(stmt_always_returns)
}

fn stmt_always_returns(stmt: &Stmt) -> bool {
    match &stmt.kind {
        StmtKind::Return(_) => true,
        StmtKind::If {
            then_branch,
            else_branch,
            ..
        } => !else_branch.is_empty() && always_returns(then_branch) && always_returns(else_branch),
        StmtKind::Block(stmts) => always_returns(stmts),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flow_frontend::parse::parse_source;

    fn analyze_src(src: &str) -> (Program, Analysis, DiagnosticSink) {
        let mut sources = SourceMap::new();
        let id = sources.add("test.flow", src);
        let mut sink = DiagnosticSink::new();
        let program = parse_source(src, id, &mut sink);
        let mut resolver = ModuleResolver::new(Vec::new());
        let analysis = analyze_program(
            &program,
            Path::new("test.flow"),
            &mut sources,
            &mut resolver,
            &mut sink,
        );
        (program, analysis, sink)
    }

    fn semantic_errors(sink: &DiagnosticSink) -> Vec<String> {
        sink.diagnostics()
            .iter()
            .filter(|d| d.severity == flow_frontend::Severity::Error)
            .map(|d| d.message.clone())
            .collect()
    }

    fn every_expr_typed(program: &Program, analysis: &Analysis) -> bool {
        fn check_expr(e: &Expr, analysis: &Analysis, ok: &mut bool) {
            if !analysis.types.contains_key(&e.id) {
                *ok = false;
            }
            match &e.kind {
                ExprKind::Binary { lhs, rhs, .. } => {
                    check_expr(lhs, analysis, ok);
                    check_expr(rhs, analysis, ok);
                }
                ExprKind::Unary { operand, .. } => check_expr(operand, analysis, ok),
                ExprKind::Call { callee, args } => {
                    check_expr(callee, analysis, ok);
                    args.iter().for_each(|a| check_expr(a, analysis, ok));
                }
                ExprKind::Member { object, .. } => check_expr(object, analysis, ok),
                ExprKind::StructInit { fields, .. } => {
                    fields.iter().for_each(|f| check_expr(f, analysis, ok))
                }
                ExprKind::ArrayLit(elems) => {
                    elems.iter().for_each(|e| check_expr(e, analysis, ok))
                }
                ExprKind::Index { array, index } => {
                    check_expr(array, analysis, ok);
                    check_expr(index, analysis, ok);
                }
                ExprKind::Lambda { body, .. } => {
                    body.iter().for_each(|s| check_stmt(s, analysis, ok))
                }
                _ => {}
            }
        }
        fn check_stmt(s: &Stmt, analysis: &Analysis, ok: &mut bool) {
            match &s.kind {
                StmtKind::Expr(e) => check_expr(e, analysis, ok),
                StmtKind::VarDecl { init, .. } => {
                    if let Some(e) = init {
                        check_expr(e, analysis, ok);
                    }
                }
                StmtKind::Assign { target, value } => {
                    check_expr(target, analysis, ok);
                    check_expr(value, analysis, ok);
                }
                StmtKind::Return(Some(e)) => check_expr(e, analysis, ok),
                StmtKind::Return(None) => {}
                StmtKind::If {
                    cond,
                    then_branch,
                    else_branch,
                } => {
                    check_expr(cond, analysis, ok);
                    then_branch.iter().for_each(|s| check_stmt(s, analysis, ok));
                    else_branch.iter().for_each(|s| check_stmt(s, analysis, ok));
                }
                StmtKind::For { range, body, .. } => {
                    match range {
                        ForRange::Range { start, end } => {
                            check_expr(start, analysis, ok);
                            check_expr(end, analysis, ok);
                        }
                        ForRange::Iterable(e) => check_expr(e, analysis, ok),
                    }
                    body.iter().for_each(|s| check_stmt(s, analysis, ok));
                }
                StmtKind::While { cond, body } => {
                    check_expr(cond, analysis, ok);
                    body.iter().for_each(|s| check_stmt(s, analysis, ok));
                }
                StmtKind::Block(stmts) => {
                    stmts.iter().for_each(|s| check_stmt(s, analysis, ok))
                }
            }
        }

        let mut ok = true;
        for decl in &program.decls {
            match &decl.kind {
                DeclKind::Function(f) => {
                    f.body.iter().for_each(|s| check_stmt(s, analysis, &mut ok))
                }
                DeclKind::Stmt(s) => check_stmt(s, analysis, &mut ok),
                _ => {}
            }
        }
        ok
    }

    #[test]
    fn well_typed_function_has_no_diagnostics_and_full_types() {
        let (program, analysis, sink) =
            analyze_src("func add(a: int, b: int) -> int { return a + b; }");
        assert!(sink.diagnostics().is_empty(), "{:?}", sink.diagnostics());
        assert!(every_expr_typed(&program, &analysis));
    }

    #[test]
    fn float_initializer_for_int_is_a_type_mismatch() {
        let (_, _, sink) = analyze_src("let x: int = 3.14;");
        let errors = semantic_errors(&sink);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("int") && errors[0].contains("float"));
        let diag = &sink.diagnostics()[0];
        assert_eq!(diag.category, Category::Semantic);
        assert_eq!(diag.loc.column, 14);
    }

    #[test]
    fn int_literal_initializes_float() {
        let (_, _, sink) = analyze_src("let x: float = 3;");
        assert!(!sink.has_errors());
    }

    #[test]
    fn undefined_symbol_reported() {
        let (_, _, sink) = analyze_src("let x = missing + 1;");
        assert!(semantic_errors(&sink)[0].contains("undefined symbol `missing`"));
    }

    #[test]
    fn immutable_assignment_rejected_mutable_allowed() {
        let (_, _, sink) = analyze_src("let x = 1; x = 2;");
        assert!(semantic_errors(&sink)[0].contains("immutable"));

        let (_, _, sink) = analyze_src("let mut y = 1; y = 2;");
        assert!(!sink.has_errors());
    }

    #[test]
    fn uninitialized_variable_gets_one_definite_assignment() {
        let (_, _, sink) = analyze_src("let x: int; x = 1; let y = x;");
        assert!(!sink.has_errors());

        let (_, _, sink) = analyze_src("let x: int; let y = x;");
        assert!(semantic_errors(&sink)[0].contains("uninitialized"));
    }

    #[test]
    fn duplicate_declarations_rejected() {
        let (_, _, sink) = analyze_src("func f() { } func f() { }");
        assert!(semantic_errors(&sink)[0].contains("duplicate declaration"));
    }

    #[test]
    fn alias_cycle_reported() {
        let (_, _, sink) = analyze_src("type A = B;\ntype B = A;");
        assert!(
            semantic_errors(&sink)
                .iter()
                .any(|m| m.contains("alias cycle"))
        );
    }

    #[test]
    fn alias_is_transparent_in_checks() {
        let (_, _, sink) = analyze_src("type Id = int;\nlet x: Id = 7;\nlet y: int = x;");
        assert!(!sink.has_errors(), "{:?}", sink.diagnostics());
    }

    #[test]
    fn arity_mismatch_reported() {
        let (_, _, sink) =
            analyze_src("func f(a: int) -> int { return a; }\nlet x = f(1, 2);");
        assert!(semantic_errors(&sink)[0].contains("expects 1 argument(s), found 2"));
    }

    #[test]
    fn member_access_checks_fields() {
        let src = "struct Point { int x; int y; }\n\
                   func f(p: Point) -> int { return p.x + p.z; }";
        let (_, _, sink) = analyze_src(src);
        assert!(semantic_errors(&sink)[0].contains("no field `z`"));
    }

    #[test]
    fn struct_init_checks_count_and_types() {
        let src = "struct Point { int x; int y; }\nlet p = Point { 1 };";
        let (_, _, sink) = analyze_src(src);
        assert!(semantic_errors(&sink)[0].contains("initializer provides 1"));

        let src = "struct Point { int x; int y; }\nlet p = Point { 1, true };";
        let (_, _, sink) = analyze_src(src);
        assert!(semantic_errors(&sink)[0].contains("field `y`"));
    }

    #[test]
    fn struct_scenario_is_clean() {
        let src = "struct Point { int x; int y; }\n\
                   func main() -> int {\n\
                       let p = Point { 1, 2 };\n\
                       return p.x + p.y;\n\
                   }";
        let (program, analysis, sink) = analyze_src(src);
        assert!(sink.diagnostics().is_empty(), "{:?}", sink.diagnostics());
        assert!(every_expr_typed(&program, &analysis));
        let info = analysis.registry.struct_info("Point").unwrap();
        assert_eq!(info.fields[0].0, "x");
        assert_eq!(info.fields[1].0, "y");
    }

    #[test]
    fn conditions_must_be_bool() {
        let (_, _, sink) = analyze_src("if (1) { }");
        assert!(semantic_errors(&sink)[0].contains("must be `bool`"));

        let (_, _, sink) = analyze_src("while (true) { }");
        assert!(!sink.has_errors());
    }

    #[test]
    fn for_range_bounds_must_be_int() {
        let (_, _, sink) = analyze_src("for (i in 0..3.5) { }");
        assert!(semantic_errors(&sink)[0].contains("range bounds must be `int`"));
    }

    #[test]
    fn for_iterable_binds_element_type() {
        let src = "let xs = [1, 2, 3];\n\
                   for (x in xs) { let y: int = x; }";
        let (_, _, sink) = analyze_src(src);
        assert!(!sink.has_errors(), "{:?}", sink.diagnostics());
    }

    #[test]
    fn string_concat_accepts_mixed_operands() {
        let (_, analysis, sink) = analyze_src("func f() -> string { return \"n=\" + 42; }");
        assert!(!sink.has_errors());
        let _ = analysis;
    }

    #[test]
    fn bitwise_operators_require_int() {
        let (_, _, sink) = analyze_src("let x = 1 << 2 & 3;");
        assert!(!sink.has_errors());

        let (_, _, sink) = analyze_src("let x = 1.5 << 2;");
        assert!(semantic_errors(&sink)[0].contains("requires `int`"));
    }

    #[test]
    fn method_calls_resolve_through_impl() {
        let src = "struct Point { int x; int y; }\n\
                   impl Point::sum() -> int { return this.x + this.y; }\n\
                   func f(p: Point) -> int { return p.sum(); }";
        let (_, analysis, sink) = analyze_src(src);
        assert!(!sink.has_errors(), "{:?}", sink.diagnostics());
        assert!(
            analysis
                .direct_callees
                .values()
                .any(|name| name == "Point_sum")
        );
    }

    #[test]
    fn option_sugar_members() {
        let src = "func f(x: int?) -> bool { return x.hasValue; }\n\
                   func g(x: int?) -> int { return x.value; }";
        let (_, _, sink) = analyze_src(src);
        assert!(!sink.has_errors(), "{:?}", sink.diagnostics());
    }

    #[test]
    fn len_builtin_types_as_int() {
        let (_, _, sink) = analyze_src("let xs = [1, 2, 3];\nlet n: int = len(xs);");
        assert!(!sink.has_errors(), "{:?}", sink.diagnostics());

        let (_, _, sink) = analyze_src("let n = len(3);");
        assert!(semantic_errors(&sink)[0].contains("requires an array"));
    }

    #[test]
    fn literal_array_constant_index_out_of_range_is_an_error() {
        let (_, _, sink) = analyze_src("let x = [1, 2, 3][5];");
        assert!(semantic_errors(&sink)[0].contains("out of bounds"));
    }

    #[test]
    fn literal_array_negative_constant_index_is_an_error() {
        let (_, _, sink) = analyze_src("let x = [1, 2, 3][-1];");
        assert!(semantic_errors(&sink)[0].contains("out of bounds"));
    }

    #[test]
    fn constant_index_through_variable_compiles() {
        // Through a variable the check is deferred to run time.
        let (_, _, sink) = analyze_src("let arr = [10, 20, 30];\nlet x = arr[5];");
        assert!(!sink.has_errors(), "{:?}", sink.diagnostics());
    }

    #[test]
    fn missing_return_is_a_warning_not_an_error() {
        let (_, _, sink) = analyze_src("func f(c: bool) -> int { if (c) { return 1; } }");
        assert!(!sink.has_errors());
        assert!(
            sink.diagnostics()
                .iter()
                .any(|d| d.severity == flow_frontend::Severity::Warning
                    && d.message.contains("every path"))
        );
    }

    #[test]
    fn return_type_mismatch_is_an_error() {
        let (_, _, sink) = analyze_src("func f() -> int { return true; }");
        assert!(semantic_errors(&sink)[0].contains("return type mismatch"));
    }

    #[test]
    fn void_function_cannot_return_a_value() {
        let (_, _, sink) = analyze_src("func f() { return 1; }");
        assert!(semantic_errors(&sink)[0].contains("void function"));
    }

    #[test]
    fn lambdas_type_check_and_call_indirectly() {
        let src = "let double: int lambda[int] = int lambda[x: int] { return x * 2; };\n\
                   let y: int = double(21);";
        let (_, _, sink) = analyze_src(src);
        assert!(!sink.has_errors(), "{:?}", sink.diagnostics());
    }

    #[test]
    fn link_block_registers_variadic_foreign_functions() {
        let src = "link \"c:m\" {\n\
                       func printf(fmt: string, ...) -> int;\n\
                       func sqrt(x: float) -> float;\n\
                   }\n\
                   func f() -> int { return printf(\"%d %d\", 1, 2); }";
        let (_, analysis, sink) = analyze_src(src);
        assert!(!sink.has_errors(), "{:?}", sink.diagnostics());
        assert_eq!(analysis.foreign_functions.len(), 2);
        assert_eq!(analysis.link_libraries, vec!["m".to_string()]);
    }

    #[test]
    fn variadic_call_still_requires_fixed_prefix() {
        let src = "link \"c\" { func printf(fmt: string, ...) -> int; }\n\
                   let x = printf();";
        let (_, _, sink) = analyze_src(src);
        assert!(semantic_errors(&sink)[0].contains("at least 1"));
    }

    // ---- import tests (real files via tempfile) ---------------------------

    fn analyze_file(path: &Path, resolver: &mut ModuleResolver) -> (Analysis, DiagnosticSink) {
        let mut sources = SourceMap::new();
        let id = sources.load(path).unwrap();
        let mut sink = DiagnosticSink::new();
        let text = sources.text(id).to_string();
        let program = parse_source(&text, id, &mut sink);
        let analysis = analyze_program(&program, path, &mut sources, resolver, &mut sink);
        (analysis, sink)
    }

    #[test]
    fn imported_functions_are_callable() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("b.flow"),
            "func answer() -> int { return 42; }",
        )
        .unwrap();
        let main = dir.path().join("a.flow");
        std::fs::write(
            &main,
            "import \"b.flow\";\nfunc main() -> int { return answer(); }",
        )
        .unwrap();

        let mut resolver = ModuleResolver::new(Vec::new());
        let (analysis, sink) = analyze_file(&main, &mut resolver);
        assert!(!sink.has_errors(), "{:?}", sink.diagnostics());
        assert_eq!(analysis.imported_modules.len(), 1);
    }

    #[test]
    fn selected_import_restricts_names() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("lib.flow"),
            "func visible() -> int { return 1; }\nfunc hidden() -> int { return 2; }",
        )
        .unwrap();
        let main = dir.path().join("main.flow");
        std::fs::write(
            &main,
            "import { visible } from \"lib.flow\";\n\
             func main() -> int { return visible() + hidden(); }",
        )
        .unwrap();

        let mut resolver = ModuleResolver::new(Vec::new());
        let (_, sink) = analyze_file(&main, &mut resolver);
        assert!(
            semantic_errors(&sink)
                .iter()
                .any(|m| m.contains("undefined symbol `hidden`"))
        );
    }

    #[test]
    fn selected_name_not_exported_is_an_import_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("lib.flow"), "func f() { }").unwrap();
        let main = dir.path().join("main.flow");
        std::fs::write(&main, "import { nope } from \"lib.flow\";").unwrap();

        let mut resolver = ModuleResolver::new(Vec::new());
        let (_, sink) = analyze_file(&main, &mut resolver);
        assert!(
            sink.diagnostics()
                .iter()
                .any(|d| d.category == Category::Import && d.message.contains("not exported"))
        );
    }

    #[test]
    fn aliased_import_prefixes_names() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("math.flow"),
            "func square(x: int) -> int { return x * x; }",
        )
        .unwrap();
        let main = dir.path().join("main.flow");
        std::fs::write(
            &main,
            "import \"math.flow\" as m;\nfunc main() -> int { return m.square(7); }",
        )
        .unwrap();

        let mut resolver = ModuleResolver::new(Vec::new());
        let (analysis, sink) = analyze_file(&main, &mut resolver);
        assert!(!sink.has_errors(), "{:?}", sink.diagnostics());
        // The call dispatches to the unprefixed symbol.
        assert!(analysis.direct_callees.values().any(|n| n == "square"));
    }

    #[test]
    fn self_import_is_a_circular_import_error() {
        let dir = tempfile::tempdir().unwrap();
        let main = dir.path().join("loop.flow");
        std::fs::write(&main, "import \"loop.flow\";\nfunc main() -> int { return 0; }").unwrap();

        let mut resolver = ModuleResolver::new(Vec::new());
        let canonical = std::fs::canonicalize(&main).unwrap();
        resolver.begin_loading(&canonical);

        let mut sources = SourceMap::new();
        let id = sources.load(&main).unwrap();
        let mut sink = DiagnosticSink::new();
        let text = sources.text(id).to_string();
        let program = parse_source(&text, id, &mut sink);
        analyze_program(&program, &main, &mut sources, &mut resolver, &mut sink);

        assert!(
            sink.diagnostics()
                .iter()
                .any(|d| d.category == Category::Import
                    && d.message.contains("circular import detected"))
        );
    }

    #[test]
    fn importing_twice_reuses_the_cache() {
        // Property 4 groundwork: the second import is served from the
        // resolver cache and introduces no duplicate diagnostics.
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.flow"), "func f() -> int { return 1; }").unwrap();
        let a = dir.path().join("a.flow");
        std::fs::write(&a, "import \"b.flow\";\nfunc main() -> int { return f(); }").unwrap();
        let c = dir.path().join("c.flow");
        std::fs::write(&c, "import \"b.flow\";\nfunc other() -> int { return f(); }").unwrap();

        let mut resolver = ModuleResolver::new(Vec::new());
        let (_, sink_a) = analyze_file(&a, &mut resolver);
        assert!(!sink_a.has_errors());
        assert_eq!(resolver.loaded().count(), 1);

        let (_, sink_c) = analyze_file(&c, &mut resolver);
        assert!(!sink_c.has_errors(), "{:?}", sink_c.diagnostics());
        assert_eq!(resolver.loaded().count(), 1);
    }
}
