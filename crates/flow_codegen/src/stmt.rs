use flow_frontend::ast::*;

use crate::builder::Value;
use crate::types::zero_value;
use crate::CodeGenerator;

impl CodeGenerator<'_> {
    pub(crate) fn lower_stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::Expr(expr) => {
                self.lower_expr(expr);
            }
            StmtKind::VarDecl {
                name,
                declared,
                init,
                ..
            } => self.lower_var_decl(name, declared, init),
            StmtKind::Assign { target, value } => self.lower_assign(target, value),
            StmtKind::Return(value) => self.lower_return(value.as_ref()),
            StmtKind::If {
                cond,
                then_branch,
                else_branch,
            } => self.lower_if(cond, then_branch, else_branch),
            StmtKind::While { cond, body } => self.lower_while(cond, body),
            StmtKind::For { var, range, body } => match range {
                ForRange::Range { start, end } => self.lower_for_range(var, start, end, body),
                ForRange::Iterable(iterable) => self.lower_for_iterable(var, iterable, body),
            },
            StmtKind::Block(stmts) => self.lower_block(stmts),
        }
    }

    pub(crate) fn lower_block(&mut self, stmts: &[Stmt]) {
        self.push_scope();
        for stmt in stmts {
            self.lower_stmt(stmt);
        }
        self.pop_scope();
    }

    fn lower_var_decl(&mut self, name: &str, declared: &Option<Type>, init: &Option<Expr>) {
        let ty = declared
            .as_ref()
            .map(|t| self.analysis.registry.resolve(t))
            .or_else(|| init.as_ref().map(|e| self.analysis.type_of(e.id)))
            .unwrap_or(Type::Unknown);
        let ir = self.ir_type_of(&ty);
        let slot = self.builder.alloca(&ir);

        if let Some(init) = init {
            let value = self.lower_expr(init);
            let value = self.coerce(value, &ir);
            self.builder.store(&value, &slot);
            if let Some(len) = self.known_array_length(init) {
                self.array_lengths.insert(name.to_string(), len);
            }
        }

        self.define_local(name, slot, ty);
    }

    fn lower_assign(&mut self, target: &Expr, value: &Expr) {
        let destination = self.lower_lvalue(target);
        let new_value = self.lower_expr(value);
        if let Some((ptr, ty)) = destination {
            let ir = self.ir_type_of(&ty);
            let new_value = self.coerce(new_value, &ir);
            self.builder.store(&new_value, &ptr);
        }

        // Keep the array-length side map in sync when a whole array moves.
        if let ExprKind::Identifier(name) = &target.kind {
            if let Some(len) = self.known_array_length(value) {
                self.array_lengths.insert(name.clone(), len);
            }
        }
    }

    fn lower_return(&mut self, value: Option<&Expr>) {
        match value {
            Some(expr) => {
                let v = self.lower_expr(expr);
                let ret_ir = self.current_ret_ir.clone();
                let v = self.coerce(v, &ret_ir);
                self.builder.ret(Some(&v));
            }
            None => {
                if self.current_ret_ir == "void" {
                    self.builder.ret(None);
                } else {
                    let ret_ir = self.current_ret_ir.clone();
                    let zero = Value::new(&ret_ir, zero_value(&ret_ir));
                    self.builder.ret(Some(&zero));
                }
            }
        }
    }

    fn lower_if(&mut self, cond: &Expr, then_branch: &[Stmt], else_branch: &[Stmt]) {
        let condition = self.lower_expr(cond);

        let then_label = self.builder.append_block("if.then");
        let else_label = if else_branch.is_empty() {
            None
        } else {
            Some(self.builder.append_block("if.else"))
        };
        let end_label = self.builder.append_block("if.end");

        self.builder.cond_br(
            &condition,
            &then_label,
            else_label.as_deref().unwrap_or(&end_label),
        );

        self.builder.position_at_end(&then_label);
        self.lower_block(then_branch);
        if !self.builder.has_terminator() {
            self.builder.br(&end_label);
        }

        if let Some(else_label) = &else_label {
            self.builder.position_at_end(else_label);
            self.lower_block(else_branch);
            if !self.builder.has_terminator() {
                self.builder.br(&end_label);
            }
        }

        self.builder.position_at_end(&end_label);
    }

    fn lower_while(&mut self, cond: &Expr, body: &[Stmt]) {
        let cond_label = self.builder.append_block("while.cond");
        let body_label = self.builder.append_block("while.body");
        let end_label = self.builder.append_block("while.end");

        self.builder.br(&cond_label);
        self.builder.position_at_end(&cond_label);
        let condition = self.lower_expr(cond);
        self.builder.cond_br(&condition, &body_label, &end_label);

        self.builder.position_at_end(&body_label);
        self.lower_block(body);
        if !self.builder.has_terminator() {
            self.builder.br(&cond_label);
        }

        self.builder.position_at_end(&end_label);
    }

    /// `for i in a..b` — condition, body, increment blocks; `i` lives in
    /// its own slot scoped to the loop.
    fn lower_for_range(&mut self, var: &str, start: &Expr, end: &Expr, body: &[Stmt]) {
        let start_v = self.lower_expr(start);
        let start_v = self.coerce(start_v, "i64");
        let end_v = self.lower_expr(end);
        let end_v = self.coerce(end_v, "i64");

        let slot = self.builder.alloca("i64");
        self.builder.store(&start_v, &slot);

        let cond_label = self.builder.append_block("for.cond");
        let body_label = self.builder.append_block("for.body");
        let inc_label = self.builder.append_block("for.inc");
        let end_label = self.builder.append_block("for.end");

        self.builder.br(&cond_label);
        self.builder.position_at_end(&cond_label);
        let current = self.builder.load("i64", &slot);
        let in_range = self.builder.icmp("slt", &current, &end_v);
        self.builder.cond_br(&in_range, &body_label, &end_label);

        self.builder.position_at_end(&body_label);
        self.push_scope();
        self.define_local(var, slot.clone(), Type::Int);
        for stmt in body {
            self.lower_stmt(stmt);
        }
        self.pop_scope();
        if !self.builder.has_terminator() {
            self.builder.br(&inc_label);
        }

        self.builder.position_at_end(&inc_label);
        let current = self.builder.load("i64", &slot);
        let one = Value::new("i64", "1");
        let next = self.builder.binop("add", &current, &one);
        self.builder.store(&next, &slot);
        self.builder.br(&cond_label);

        self.builder.position_at_end(&end_label);
    }

    /// `for x in arr` — an index loop over the array descriptor's length,
    /// loading the element into `x`'s slot each iteration.
    fn lower_for_iterable(&mut self, var: &str, iterable: &Expr, body: &[Stmt]) {
        let array = self.lower_expr(iterable);
        let data = self.builder.extractvalue(&array, 0, "ptr");
        let length = self.builder.extractvalue(&array, 1, "i64");
        let elem_ty = match self.analysis.type_of(iterable.id) {
            Type::Array(elem) => *elem,
            _ => Type::Unknown,
        };
        let elem_ir = self.ir_type_of(&elem_ty);

        let index_slot = self.builder.alloca("i64");
        let zero = Value::new("i64", "0");
        self.builder.store(&zero, &index_slot);
        let elem_slot = self.builder.alloca(&elem_ir);

        let cond_label = self.builder.append_block("for.cond");
        let body_label = self.builder.append_block("for.body");
        let inc_label = self.builder.append_block("for.inc");
        let end_label = self.builder.append_block("for.end");

        self.builder.br(&cond_label);
        self.builder.position_at_end(&cond_label);
        let index = self.builder.load("i64", &index_slot);
        let in_range = self.builder.icmp("slt", &index, &length);
        self.builder.cond_br(&in_range, &body_label, &end_label);

        self.builder.position_at_end(&body_label);
        let index = self.builder.load("i64", &index_slot);
        let elem_ptr = self.builder.gep(&elem_ir, &data, &index);
        let element = self.builder.load(&elem_ir, &elem_ptr);
        self.builder.store(&element, &elem_slot);
        self.push_scope();
        self.define_local(var, elem_slot.clone(), elem_ty);
        for stmt in body {
            self.lower_stmt(stmt);
        }
        self.pop_scope();
        if !self.builder.has_terminator() {
            self.builder.br(&inc_label);
        }

        self.builder.position_at_end(&inc_label);
        let index = self.builder.load("i64", &index_slot);
        let one = Value::new("i64", "1");
        let next = self.builder.binop("add", &index, &one);
        self.builder.store(&next, &index_slot);
        self.builder.br(&cond_label);

        self.builder.position_at_end(&end_label);
    }

    /// Pointer + type of an assignable place: a variable slot, a struct
    /// field behind GEPs, or an array element (bounds-checked).
    pub(crate) fn lower_lvalue(&mut self, expr: &Expr) -> Option<(Value, Type)> {
        match &expr.kind {
            ExprKind::Identifier(name) => {
                let local = self.lookup_local(name)?;
                Some((local.slot, local.ty))
            }
            ExprKind::Member { object, field } => {
                let (object_ptr, object_ty) = self.lower_lvalue(object)?;
                let (index, field_ty) = self.analysis.registry.field_of(&object_ty, field)?;
                let struct_ir = self.ir_type_of(&object_ty);
                let ptr = self.builder.struct_gep(&struct_ir, &object_ptr, index);
                Some((ptr, field_ty))
            }
            ExprKind::Index { array, index } => {
                let array_v = self.lower_expr(array);
                let index_v = self.lower_expr(index);
                let index_v = self.coerce(index_v, "i64");
                let data = self.builder.extractvalue(&array_v, 0, "ptr");
                let length = self.builder.extractvalue(&array_v, 1, "i64");
                self.emit_bounds_check(&index_v, &length);
                let elem_ty = self.analysis.type_of(expr.id);
                let elem_ir = self.ir_type_of(&elem_ty);
                let ptr = self.builder.gep(&elem_ir, &data, &index_v);
                Some((ptr, elem_ty))
            }
            _ => None,
        }
    }
}
