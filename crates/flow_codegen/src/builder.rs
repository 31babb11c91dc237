use std::fmt::Write as _;

use rustc_hash::FxHashSet;

/// A typed IR value: its IR type and its textual representation (an SSA
/// temporary, a global, or a constant).
#[derive(Debug, Clone)]
pub struct Value {
    pub ty: String,
    pub repr: String,
}

impl Value {
    pub fn new(ty: impl Into<String>, repr: impl Into<String>) -> Self {
        Self {
            ty: ty.into(),
            repr: repr.into(),
        }
    }

    /// `ty repr`, the form instruction operands take.
    pub fn typed(&self) -> String {
        format!("{} {}", self.ty, self.repr)
    }
}

#[derive(Debug)]
struct Block {
    label: String,
    instrs: Vec<String>,
    terminated: bool,
}

#[derive(Debug)]
struct Function {
    header: String,
    blocks: Vec<Block>,
}

/// The opaque builder interface the lowering visitor emits against.
///
/// Accepts typed operations (`alloca`, `load`, `store`, `binop`, `br`, …)
/// and renders a textual LLVM IR module; the external code generator
/// consumes that text. Instruction emission targets the current insertion
/// block, mirroring the usual LLVM builder discipline.
#[derive(Debug, Default)]
pub struct IrBuilder {
    module_name: String,
    struct_defs: Vec<String>,
    struct_names: FxHashSet<String>,
    globals: Vec<String>,
    decls: Vec<String>,
    decl_names: FxHashSet<String>,
    functions: Vec<Function>,
    current_fn: Option<usize>,
    current_block: usize,
    tmp_count: u32,
    label_count: u32,
    str_count: u32,
}

impl IrBuilder {
    pub fn new(module_name: &str) -> Self {
        Self {
            module_name: module_name.to_string(),
            ..Self::default()
        }
    }

    // ---- module-level entities --------------------------------------------

    /// Define a named struct type once; later calls with the same name are
    /// ignored.
    pub fn define_struct(&mut self, name: &str, field_types: &[String]) {
        if !self.struct_names.insert(name.to_string()) {
            return;
        }
        if field_types.is_empty() {
            self.struct_defs.push(format!("%struct.{name} = type {{}}"));
        } else {
            self.struct_defs
                .push(format!("%struct.{name} = type {{ {} }}", field_types.join(", ")));
        }
    }

    /// Declare an external function once.
    pub fn declare_function(&mut self, name: &str, ret_ty: &str, params: &[String], variadic: bool) {
        if !self.decl_names.insert(name.to_string()) {
            return;
        }
        let mut param_list = params.join(", ");
        if variadic {
            if param_list.is_empty() {
                param_list = "...".to_string();
            } else {
                param_list.push_str(", ...");
            }
        }
        self.decls
            .push(format!("declare {ret_ty} @{name}({param_list})"));
    }

    pub fn is_declared_or_defined(&self, name: &str) -> bool {
        self.decl_names.contains(name)
    }

    /// Intern a constant string; returns a `ptr` value to its global.
    pub fn global_string(&mut self, text: &str) -> Value {
        let name = format!("@.str.{}", self.str_count);
        self.str_count += 1;
        let bytes = text.as_bytes();
        let mut encoded = String::new();
        for &b in bytes {
            match b {
                b'\\' => encoded.push_str("\\5C"),
                b'"' => encoded.push_str("\\22"),
                0x20..=0x7e => encoded.push(b as char),
                _ => {
                    let _ = write!(encoded, "\\{b:02X}");
                }
            }
        }
        encoded.push_str("\\00");
        self.globals.push(format!(
            "{name} = private unnamed_addr constant [{} x i8] c\"{encoded}\", align 1",
            bytes.len() + 1
        ));
        Value::new("ptr", name)
    }

    // ---- function scaffolding ---------------------------------------------

    /// Start a function definition and position at its entry block.
    /// Parameters are `%p0 … %pN-1`. `linkage` is e.g. `""`,
    /// `"linkonce_odr "`, or `"private "`.
    pub fn begin_function(
        &mut self,
        name: &str,
        ret_ty: &str,
        param_types: &[String],
        linkage: &str,
    ) -> Vec<Value> {
        let params: Vec<Value> = param_types
            .iter()
            .enumerate()
            .map(|(i, ty)| Value::new(ty.clone(), format!("%p{i}")))
            .collect();
        let param_list = params
            .iter()
            .map(Value::typed)
            .collect::<Vec<_>>()
            .join(", ");
        self.functions.push(Function {
            header: format!("define {linkage}{ret_ty} @{name}({param_list})"),
            blocks: vec![Block {
                label: "entry".to_string(),
                instrs: Vec::new(),
                terminated: false,
            }],
        });
        self.decl_names.insert(name.to_string());
        self.current_fn = Some(self.functions.len() - 1);
        self.current_block = 0;
        self.tmp_count = 0;
        self.label_count = 0;
        params
    }

    /// Seal the current function: any block left without a terminator
    /// (unreachable continuations after `return`) gets `unreachable`.
    pub fn end_function(&mut self) {
        if let Some(idx) = self.current_fn.take() {
            for block in &mut self.functions[idx].blocks {
                if !block.terminated {
                    block.instrs.push("unreachable".to_string());
                    block.terminated = true;
                }
            }
        }
    }

    pub fn append_block(&mut self, hint: &str) -> String {
        let label = format!("{hint}{}", self.label_count);
        self.label_count += 1;
        let idx = self.current_fn.expect("no current function");
        self.functions[idx].blocks.push(Block {
            label: label.clone(),
            instrs: Vec::new(),
            terminated: false,
        });
        label
    }

    pub fn position_at_end(&mut self, label: &str) {
        let idx = self.current_fn.expect("no current function");
        self.current_block = self.functions[idx]
            .blocks
            .iter()
            .position(|b| b.label == label)
            .expect("unknown block label");
    }

    pub fn has_terminator(&self) -> bool {
        let idx = self.current_fn.expect("no current function");
        self.functions[idx].blocks[self.current_block].terminated
    }

    fn fresh(&mut self) -> String {
        let name = format!("%t{}", self.tmp_count);
        self.tmp_count += 1;
        name
    }

    fn emit(&mut self, instr: String) {
        let idx = self.current_fn.expect("no current function");
        let block = &mut self.functions[idx].blocks[self.current_block];
        if !block.terminated {
            block.instrs.push(instr);
        }
    }

    fn emit_terminator(&mut self, instr: String) {
        let idx = self.current_fn.expect("no current function");
        let block = &mut self.functions[idx].blocks[self.current_block];
        if !block.terminated {
            block.instrs.push(instr);
            block.terminated = true;
        }
    }

    // ---- instructions -----------------------------------------------------

    pub fn alloca(&mut self, ty: &str) -> Value {
        let name = self.fresh();
        self.emit(format!("{name} = alloca {ty}"));
        Value::new("ptr", name)
    }

    pub fn alloca_array(&mut self, elem_ty: &str, count: i64) -> Value {
        let name = self.fresh();
        self.emit(format!("{name} = alloca {elem_ty}, i64 {count}"));
        Value::new("ptr", name)
    }

    pub fn store(&mut self, value: &Value, ptr: &Value) {
        self.emit(format!("store {}, ptr {}", value.typed(), ptr.repr));
    }

    pub fn load(&mut self, ty: &str, ptr: &Value) -> Value {
        let name = self.fresh();
        self.emit(format!("{name} = load {ty}, ptr {}", ptr.repr));
        Value::new(ty, name)
    }

    /// `op` is the IR opcode: `add`, `fadd`, `and`, `shl`, `ashr`, …
    pub fn binop(&mut self, op: &str, lhs: &Value, rhs: &Value) -> Value {
        let name = self.fresh();
        self.emit(format!("{name} = {op} {}, {}", lhs.typed(), rhs.repr));
        Value::new(lhs.ty.clone(), name)
    }

    pub fn icmp(&mut self, cond: &str, lhs: &Value, rhs: &Value) -> Value {
        let name = self.fresh();
        self.emit(format!("{name} = icmp {cond} {}, {}", lhs.typed(), rhs.repr));
        Value::new("i1", name)
    }

    pub fn fcmp(&mut self, cond: &str, lhs: &Value, rhs: &Value) -> Value {
        let name = self.fresh();
        self.emit(format!("{name} = fcmp {cond} {}, {}", lhs.typed(), rhs.repr));
        Value::new("i1", name)
    }

    pub fn sitofp(&mut self, value: &Value) -> Value {
        let name = self.fresh();
        self.emit(format!("{name} = sitofp {} to double", value.typed()));
        Value::new("double", name)
    }

    pub fn zext(&mut self, value: &Value, to: &str) -> Value {
        let name = self.fresh();
        self.emit(format!("{name} = zext {} to {to}", value.typed()));
        Value::new(to, name)
    }

    pub fn trunc(&mut self, value: &Value, to: &str) -> Value {
        let name = self.fresh();
        self.emit(format!("{name} = trunc {} to {to}", value.typed()));
        Value::new(to, name)
    }

    pub fn fneg(&mut self, value: &Value) -> Value {
        let name = self.fresh();
        self.emit(format!("{name} = fneg {}", value.typed()));
        Value::new(value.ty.clone(), name)
    }

    pub fn gep(&mut self, elem_ty: &str, ptr: &Value, index: &Value) -> Value {
        let name = self.fresh();
        self.emit(format!(
            "{name} = getelementptr inbounds {elem_ty}, ptr {}, {}",
            ptr.repr,
            index.typed()
        ));
        Value::new("ptr", name)
    }

    pub fn struct_gep(&mut self, struct_ty: &str, ptr: &Value, index: usize) -> Value {
        let name = self.fresh();
        self.emit(format!(
            "{name} = getelementptr inbounds {struct_ty}, ptr {}, i32 0, i32 {index}",
            ptr.repr
        ));
        Value::new("ptr", name)
    }

    pub fn extractvalue(&mut self, aggregate: &Value, index: usize, field_ty: &str) -> Value {
        let name = self.fresh();
        self.emit(format!(
            "{name} = extractvalue {}, {index}",
            aggregate.typed()
        ));
        Value::new(field_ty, name)
    }

    pub fn insertvalue(&mut self, aggregate: &Value, value: &Value, index: usize) -> Value {
        let name = self.fresh();
        self.emit(format!(
            "{name} = insertvalue {}, {}, {index}",
            aggregate.typed(),
            value.typed()
        ));
        Value::new(aggregate.ty.clone(), name)
    }

    pub fn call(&mut self, ret_ty: &str, callee: &str, args: &[Value]) -> Option<Value> {
        let arg_list = args.iter().map(Value::typed).collect::<Vec<_>>().join(", ");
        if ret_ty == "void" {
            self.emit(format!("call void @{callee}({arg_list})"));
            None
        } else {
            let name = self.fresh();
            self.emit(format!("{name} = call {ret_ty} @{callee}({arg_list})"));
            Some(Value::new(ret_ty, name))
        }
    }

    /// Call through a function-typed signature string, as variadic calls
    /// require: `call i32 (ptr, ...) @printf(…)`.
    pub fn call_variadic(&mut self, fn_ty: &str, ret_ty: &str, callee: &str, args: &[Value]) -> Option<Value> {
        let arg_list = args.iter().map(Value::typed).collect::<Vec<_>>().join(", ");
        if ret_ty == "void" {
            self.emit(format!("call {fn_ty} @{callee}({arg_list})"));
            None
        } else {
            let name = self.fresh();
            self.emit(format!("{name} = call {fn_ty} @{callee}({arg_list})"));
            Some(Value::new(ret_ty, name))
        }
    }

    pub fn call_indirect(&mut self, ret_ty: &str, callee: &Value, args: &[Value]) -> Option<Value> {
        let arg_list = args.iter().map(Value::typed).collect::<Vec<_>>().join(", ");
        if ret_ty == "void" {
            self.emit(format!("call void {}({arg_list})", callee.repr));
            None
        } else {
            let name = self.fresh();
            self.emit(format!("{name} = call {ret_ty} {}({arg_list})", callee.repr));
            Some(Value::new(ret_ty, name))
        }
    }

    pub fn br(&mut self, label: &str) {
        self.emit_terminator(format!("br label %{label}"));
    }

    pub fn cond_br(&mut self, cond: &Value, then_label: &str, else_label: &str) {
        self.emit_terminator(format!(
            "br i1 {}, label %{then_label}, label %{else_label}",
            cond.repr
        ));
    }

    pub fn ret(&mut self, value: Option<&Value>) {
        match value {
            Some(v) => self.emit_terminator(format!("ret {}", v.typed())),
            None => self.emit_terminator("ret void".to_string()),
        }
    }

    pub fn unreachable(&mut self) {
        self.emit_terminator("unreachable".to_string());
    }

    // ---- rendering --------------------------------------------------------

    /// Render the whole module as LLVM IR text.
    pub fn finish(mut self) -> String {
        self.end_function();
        let mut out = String::new();
        let _ = writeln!(out, "; ModuleID = '{}'", self.module_name);
        let _ = writeln!(out, "source_filename = \"{}\"", self.module_name);
        out.push('\n');

        for def in &self.struct_defs {
            let _ = writeln!(out, "{def}");
        }
        if !self.struct_defs.is_empty() {
            out.push('\n');
        }
        for global in &self.globals {
            let _ = writeln!(out, "{global}");
        }
        if !self.globals.is_empty() {
            out.push('\n');
        }
        for decl in &self.decls {
            let _ = writeln!(out, "{decl}");
        }
        if !self.decls.is_empty() {
            out.push('\n');
        }

        for function in &self.functions {
            let _ = writeln!(out, "{} {{", function.header);
            for (i, block) in function.blocks.iter().enumerate() {
                if i > 0 {
                    let _ = writeln!(out, "{}:", block.label);
                }
                for instr in &block.instrs {
                    let _ = writeln!(out, "  {instr}");
                }
            }
            let _ = writeln!(out, "}}");
            out.push('\n');
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_a_minimal_function() {
        let mut b = IrBuilder::new("test");
        let params = b.begin_function("add", "i64", &["i64".into(), "i64".into()], "");
        let sum = b.binop("add", &params[0], &params[1]);
        b.ret(Some(&sum));
        let ir = b.finish();

        assert!(ir.contains("define i64 @add(i64 %p0, i64 %p1)"));
        assert!(ir.contains("%t0 = add i64 %p0, %p1"));
        assert!(ir.contains("ret i64 %t0"));
    }

    #[test]
    fn string_globals_are_escaped_and_nul_terminated() {
        let mut b = IrBuilder::new("test");
        let s = b.global_string("hi\n");
        assert_eq!(s.repr, "@.str.0");
        let ir = b.finish();
        assert!(ir.contains("[4 x i8] c\"hi\\0A\\00\""));
    }

    #[test]
    fn declarations_are_deduplicated() {
        let mut b = IrBuilder::new("test");
        b.declare_function("printf", "i32", &["ptr".into()], true);
        b.declare_function("printf", "i32", &["ptr".into()], true);
        let ir = b.finish();
        assert_eq!(ir.matches("declare i32 @printf(ptr, ...)").count(), 1);
    }

    #[test]
    fn struct_defs_are_deduplicated() {
        let mut b = IrBuilder::new("test");
        b.define_struct("Point", &["i64".into(), "i64".into()]);
        b.define_struct("Point", &["i64".into(), "i64".into()]);
        let ir = b.finish();
        assert_eq!(
            ir.matches("%struct.Point = type { i64, i64 }").count(),
            1
        );
    }

    #[test]
    fn instructions_after_a_terminator_are_dropped() {
        let mut b = IrBuilder::new("test");
        b.begin_function("f", "void", &[], "");
        b.ret(None);
        // A stray instruction after `ret` must not corrupt the block.
        let v = Value::new("i64", "1");
        b.store(&v, &Value::new("ptr", "%nowhere"));
        let ir = b.finish();
        assert!(!ir.contains("%nowhere"));
    }

    #[test]
    fn unterminated_extra_blocks_are_sealed() {
        let mut b = IrBuilder::new("test");
        b.begin_function("f", "void", &[], "");
        let dead = b.append_block("dead");
        b.ret(None);
        b.position_at_end(&dead);
        let ir = b.finish();
        assert!(ir.contains("dead0:"));
        assert!(ir.contains("unreachable"));
    }
}
