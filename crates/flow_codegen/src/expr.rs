use flow_frontend::ast::*;

use crate::builder::Value;
use crate::types::ARRAY_TYPE;
use crate::{CodeGenerator, PendingLambda};

impl CodeGenerator<'_> {
    /// Lower one expression to its result value. Every path produces a
    /// value; `void` calls yield a placeholder that statement contexts
    /// discard.
    pub(crate) fn lower_expr(&mut self, expr: &Expr) -> Value {
        match &expr.kind {
            ExprKind::IntLit(v) => Value::new("i64", v.to_string()),
            // Hex-encoded IEEE754 round-trips exactly through the IR parser.
            ExprKind::FloatLit(v) => Value::new("double", format!("0x{:016X}", v.to_bits())),
            ExprKind::BoolLit(v) => Value::new("i1", v.to_string()),
            ExprKind::StringLit(s) => self.builder.global_string(s),
            ExprKind::Identifier(name) => match self.lookup_local(name) {
                Some(local) => {
                    let ir = self.ir_type_of(&local.ty);
                    self.builder.load(&ir, &local.slot)
                }
                // Not a local: a reference to a module-level function.
                None => Value::new("ptr", format!("@{name}")),
            },
            ExprKind::This => match self.lookup_local("this") {
                Some(local) => {
                    let ir = self.ir_type_of(&local.ty);
                    self.builder.load(&ir, &local.slot)
                }
                None => Value::new("i64", "0"),
            },
            ExprKind::Unary { op, operand } => self.lower_unary(*op, operand),
            ExprKind::Binary { op, lhs, rhs } => self.lower_binary(expr, *op, lhs, rhs),
            ExprKind::Call { callee, args } => self.lower_call(expr, callee, args),
            ExprKind::Member { object, field } => self.lower_member(expr, object, field),
            ExprKind::StructInit { fields, .. } => self.lower_struct_init(expr, fields),
            ExprKind::ArrayLit(elements) => self.lower_array_lit(expr, elements),
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
                self.builder.load(&elem_ir, &ptr)
            }
            ExprKind::Lambda { params, ret, body } => {
                let name = format!("__lambda_{}", self.lambda_count);
                self.lambda_count += 1;
                self.pending_lambdas.push(PendingLambda {
                    name: name.clone(),
                    params: params.clone(),
                    ret: ret.clone(),
                    body: body.clone(),
                });
                Value::new("ptr", format!("@{name}"))
            }
        }
    }

    fn lower_unary(&mut self, op: UnOp, operand: &Expr) -> Value {
        let value = self.lower_expr(operand);
        match op {
            UnOp::Not => {
                let truth = Value::new("i1", "true");
                self.builder.binop("xor", &value, &truth)
            }
            UnOp::Neg => {
                if value.ty == "double" {
                    self.builder.fneg(&value)
                } else {
                    let zero = Value::new("i64", "0");
                    self.builder.binop("sub", &zero, &value)
                }
            }
            UnOp::BitNot => {
                let ones = Value::new("i64", "-1");
                self.builder.binop("xor", &value, &ones)
            }
        }
    }

    fn lower_binary(&mut self, expr: &Expr, op: BinOp, lhs: &Expr, rhs: &Expr) -> Value {
        if op.is_logical() {
            return self.lower_short_circuit(op, lhs, rhs);
        }
        if op == BinOp::Add && self.analysis.type_of(expr.id) == Type::String {
            return self.lower_string_concat(lhs, rhs);
        }

        let l = self.lower_expr(lhs);
        let r = self.lower_expr(rhs);

        if op.is_comparison() {
            let float = l.ty == "double" || r.ty == "double";
            if float {
                let l = self.coerce(l, "double");
                let r = self.coerce(r, "double");
                let cond = match op {
                    BinOp::Eq => "oeq",
                    BinOp::Ne => "one",
                    BinOp::Lt => "olt",
                    BinOp::Le => "ole",
                    BinOp::Gt => "ogt",
                    _ => "oge",
                };
                return self.builder.fcmp(cond, &l, &r);
            }
            let cond = match op {
                BinOp::Eq => "eq",
                BinOp::Ne => "ne",
                BinOp::Lt => "slt",
                BinOp::Le => "sle",
                BinOp::Gt => "sgt",
                _ => "sge",
            };
            return self.builder.icmp(cond, &l, &r);
        }

        if op.is_bitwise() {
            let opcode = match op {
                BinOp::BitAnd => "and",
                BinOp::BitOr => "or",
                BinOp::BitXor => "xor",
                BinOp::Shl => "shl",
                _ => "ashr",
            };
            return self.builder.binop(opcode, &l, &r);
        }

        // Arithmetic: the analyzed result type decides int vs float.
        let float = self.analysis.type_of(expr.id) == Type::Float
            || l.ty == "double"
            || r.ty == "double";
        if float {
            let l = self.coerce(l, "double");
            let r = self.coerce(r, "double");
            let opcode = match op {
                BinOp::Add => "fadd",
                BinOp::Sub => "fsub",
                BinOp::Mul => "fmul",
                BinOp::Div => "fdiv",
                _ => "frem",
            };
            self.builder.binop(opcode, &l, &r)
        } else {
            let opcode = match op {
                BinOp::Add => "add",
                BinOp::Sub => "sub",
                BinOp::Mul => "mul",
                BinOp::Div => "sdiv",
                _ => "srem",
            };
            self.builder.binop(opcode, &l, &r)
        }
    }

    /// `&&`/`||` with short-circuit control flow: the right operand only
    /// evaluates when the left does not decide the result.
    fn lower_short_circuit(&mut self, op: BinOp, lhs: &Expr, rhs: &Expr) -> Value {
        let flag = self.builder.alloca("i1");
        let left = self.lower_expr(lhs);
        self.builder.store(&left, &flag);

        let (rhs_hint, end_hint) = if op == BinOp::And {
            ("and.rhs", "and.end")
        } else {
            ("or.rhs", "or.end")
        };
        let rhs_label = self.builder.append_block(rhs_hint);
        let end_label = self.builder.append_block(end_hint);

        if op == BinOp::And {
            self.builder.cond_br(&left, &rhs_label, &end_label);
        } else {
            self.builder.cond_br(&left, &end_label, &rhs_label);
        }

        self.builder.position_at_end(&rhs_label);
        let right = self.lower_expr(rhs);
        self.builder.store(&right, &flag);
        if !self.builder.has_terminator() {
            self.builder.br(&end_label);
        }

        self.builder.position_at_end(&end_label);
        self.builder.load("i1", &flag)
    }

    /// String `+`: a runtime `sprintf` into a fresh buffer, with the format
    /// assembled from the operand types. Mixed operands stringify.
    fn lower_string_concat(&mut self, lhs: &Expr, rhs: &Expr) -> Value {
        let format = format!(
            "{}{}",
            format_spec(&self.analysis.type_of(lhs.id)),
            format_spec(&self.analysis.type_of(rhs.id))
        );
        let format_str = self.builder.global_string(&format);

        let left = self.lower_expr(lhs);
        let right = self.lower_expr(rhs);

        let size = Value::new("i64", "256");
        let buffer = self
            .builder
            .call("ptr", "malloc", &[size])
            .expect("malloc returns a pointer");

        let left = self.promote_vararg(left);
        let right = self.promote_vararg(right);
        let args = vec![buffer.clone(), format_str, left, right];
        self.builder
            .call_variadic("i32 (ptr, ptr, ...)", "i32", "sprintf", &args);

        buffer
    }

    /// C varargs promotion: `i1` widens to `i32`.
    fn promote_vararg(&mut self, value: Value) -> Value {
        if value.ty == "i1" {
            self.builder.zext(&value, "i32")
        } else {
            value
        }
    }

    fn lower_call(&mut self, expr: &Expr, callee: &Expr, args: &[Expr]) -> Value {
        let Some(direct) = self.analysis.direct_callees.get(&expr.id).cloned() else {
            return self.lower_indirect_call(expr, callee, args);
        };

        // `len` folds against the array-length side map; when the length is
        // not statically known it reads the array descriptor instead.
        if direct == "len" {
            if let Some(length) = args.first().and_then(|a| self.known_array_length(a)) {
                return Value::new("i64", length.to_string());
            }
            let Some(arg) = args.first() else {
                return Value::new("i64", "0");
            };
            let array_v = self.lower_expr(arg);
            return self.builder.extractvalue(&array_v, 1, "i64");
        }

        // Method call: the receiver travels as the implicit first argument.
        if let ExprKind::Member { object, field } = &callee.kind {
            let object_ty = self.analysis.type_of(object.id);
            if let Type::Struct { name, .. } = &object_ty {
                if let Some(sig) = self.analysis.registry.method(name, field).cloned() {
                    let receiver = self.lower_expr(object);
                    let mut call_args = vec![receiver];
                    for (param, arg) in sig.params[1..].iter().zip(args) {
                        let param_ir = self.ir_type_of(param);
                        let value = self.lower_expr(arg);
                        call_args.push(self.coerce(value, &param_ir));
                    }
                    let ret = self.ir_ret_of(&sig.ret);
                    return self
                        .builder
                        .call(&ret, &direct, &call_args)
                        .unwrap_or_else(|| Value::new("void", ""));
                }
            }
        }

        // Signatures are registered under the local name (alias-qualified
        // for `import … as`), while the call targets the original symbol.
        let sig_key = match &callee.kind {
            ExprKind::Identifier(name) => name.clone(),
            ExprKind::Member { object, field } => match &object.kind {
                ExprKind::Identifier(ns) => format!("{ns}.{field}"),
                _ => direct.clone(),
            },
            _ => direct.clone(),
        };
        let sig = self.analysis.registry.function(&sig_key).cloned();

        let mut call_args = Vec::new();
        match sig {
            Some(sig) => {
                for (i, arg) in args.iter().enumerate() {
                    let value = self.lower_expr(arg);
                    let value = match sig.params.get(i) {
                        Some(param) => {
                            let param_ir = self.ir_type_of(param);
                            self.coerce(value, &param_ir)
                        }
                        None => self.promote_vararg(value),
                    };
                    call_args.push(value);
                }
                let ret = self.ir_ret_of(&sig.ret);
                if sig.variadic {
                    let fixed: Vec<String> = sig
                        .params
                        .iter()
                        .map(|t| self.ir_type_of(t))
                        .collect();
                    let fn_ty = format!("{ret} ({}, ...)", fixed.join(", "));
                    self.builder
                        .call_variadic(&fn_ty, &ret, &direct, &call_args)
                        .unwrap_or_else(|| Value::new("void", ""))
                } else {
                    self.builder
                        .call(&ret, &direct, &call_args)
                        .unwrap_or_else(|| Value::new("void", ""))
                }
            }
            None => {
                for arg in args {
                    let value = self.lower_expr(arg);
                    call_args.push(value);
                }
                let ret_ty = self.analysis.type_of(expr.id);
                let ret = if ret_ty.is_void() {
                    "void".to_string()
                } else {
                    self.ir_type_of(&ret_ty)
                };
                self.builder
                    .call(&ret, &direct, &call_args)
                    .unwrap_or_else(|| Value::new("void", ""))
            }
        }
    }

    fn lower_indirect_call(&mut self, expr: &Expr, callee: &Expr, args: &[Expr]) -> Value {
        let function = self.lower_expr(callee);
        let (ret_ty, param_tys) = match self.analysis.type_of(callee.id) {
            Type::Function { ret, params } => (*ret, params),
            _ => (self.analysis.type_of(expr.id), Vec::new()),
        };

        let mut call_args = Vec::new();
        for (i, arg) in args.iter().enumerate() {
            let value = self.lower_expr(arg);
            let value = match param_tys.get(i) {
                Some(param) => {
                    let param_ir = self.ir_type_of(param);
                    self.coerce(value, &param_ir)
                }
                None => value,
            };
            call_args.push(value);
        }

        let ret = if ret_ty.is_void() {
            "void".to_string()
        } else {
            self.ir_type_of(&ret_ty)
        };
        self.builder
            .call_indirect(&ret, &function, &call_args)
            .unwrap_or_else(|| Value::new("void", ""))
    }

    fn lower_member(&mut self, expr: &Expr, object: &Expr, field: &str) -> Value {
        // `alias.function` used as a value.
        if matches!(object.kind, ExprKind::Identifier(_))
            && self.analysis.type_of(object.id).is_unknown()
            && matches!(self.analysis.type_of(expr.id), Type::Function { .. })
        {
            return Value::new("ptr", format!("@{field}"));
        }

        let value = self.lower_expr(object);
        let object_ty = self.analysis.type_of(object.id);
        match self.analysis.registry.field_of(&object_ty, field) {
            Some((index, field_ty)) => {
                let field_ir = self.ir_type_of(&field_ty);
                self.builder.extractvalue(&value, index, &field_ir)
            }
            None => Value::new("i64", "0"),
        }
    }

    /// Allocate, store each field by declaration index, load the aggregate.
    fn lower_struct_init(&mut self, expr: &Expr, fields: &[Expr]) -> Value {
        let ty = self.analysis.type_of(expr.id);
        self.ensure_struct(&ty);
        let struct_ir = self.ir_type_of(&ty);
        let slot = self.builder.alloca(&struct_ir);

        let layout = self.struct_fields(&ty);
        for (index, field_expr) in fields.iter().enumerate() {
            let value = self.lower_expr(field_expr);
            let field_ir = layout
                .get(index)
                .map(|(_, t)| self.ir_type_of(t))
                .unwrap_or_else(|| "i64".to_string());
            let value = self.coerce(value, &field_ir);
            let ptr = self.builder.struct_gep(&struct_ir, &slot, index);
            self.builder.store(&value, &ptr);
        }

        self.builder.load(&struct_ir, &slot)
    }

    /// Stack array of the element type, wrapped into a `{ ptr, len }`
    /// descriptor; the constant length also lands in the side map through
    /// the enclosing `let`/assignment so `len` can fold.
    fn lower_array_lit(&mut self, expr: &Expr, elements: &[Expr]) -> Value {
        let elem_ty = match self.analysis.type_of(expr.id) {
            Type::Array(elem) => *elem,
            _ => Type::Int,
        };
        let elem_ir = self.ir_type_of(&elem_ty);
        let data = self.builder.alloca_array(&elem_ir, elements.len() as i64);

        for (index, element) in elements.iter().enumerate() {
            let value = self.lower_expr(element);
            let value = self.coerce(value, &elem_ir);
            let index_v = Value::new("i64", index.to_string());
            let ptr = self.builder.gep(&elem_ir, &data, &index_v);
            self.builder.store(&value, &ptr);
        }

        let undef = Value::new(ARRAY_TYPE, "undef");
        let with_data = self.builder.insertvalue(&undef, &data, 0);
        let length = Value::new("i64", elements.len().to_string());
        self.builder.insertvalue(&with_data, &length, 1)
    }

    /// Bounds check guarding every index operation: index `>= 0` and
    /// `< length` (from the array descriptor), branching to a trap block
    /// that reports on stderr and aborts.
    pub(crate) fn emit_bounds_check(&mut self, index: &Value, length: &Value) {
        let zero = Value::new("i64", "0");
        let negative = self.builder.icmp("slt", index, &zero);
        let too_large = self.builder.icmp("sge", index, length);
        let out_of_bounds = self.builder.binop("or", &negative, &too_large);

        let trap_label = self.builder.append_block("trap");
        let ok_label = self.builder.append_block("indexok");
        self.builder.cond_br(&out_of_bounds, &trap_label, &ok_label);

        self.builder.position_at_end(&trap_label);
        let message = "Runtime Error: array index out of bounds!\n";
        let message_v = self.builder.global_string(message);
        let stderr_fd = Value::new("i32", "2");
        let message_len = Value::new("i64", message.len().to_string());
        self.builder
            .call("i64", "write", &[stderr_fd, message_v, message_len]);
        self.builder.call("void", "llvm.trap", &[]);
        self.builder.unreachable();

        self.builder.position_at_end(&ok_label);
    }
}

/// `sprintf` conversion for a concatenation operand.
fn format_spec(ty: &Type) -> &'static str {
    match ty {
        Type::String => "%s",
        Type::Float => "%f",
        Type::Bool => "%d",
        _ => "%ld",
    }
}
