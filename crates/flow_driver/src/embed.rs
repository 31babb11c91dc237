//! Compile-only embedding ABI, the C-shaped surface the LSP harness and
//! runtime wrappers load. Reflection stops at function signatures; value
//! calls and JIT execution live in a separate subsystem.

use std::ffi::{c_char, c_int, CStr, CString};
use std::path::Path;

use flow_analysis::analyze_program;
use flow_frontend::diagnostics::DiagnosticSink;
use flow_frontend::parse::parse_source;
use flow_frontend::resolve::ModuleResolver;
use flow_frontend::source::SourceMap;

/// Compiler session handle.
pub struct FlowRuntime {
    last_error: CString,
}

/// A compiled (analyzed) module with its reflectable functions.
pub struct FlowModule {
    functions: Vec<FlowFunction>,
}

/// Function reflection handle; owned by its module.
pub struct FlowFunction {
    name: CString,
    param_count: usize,
}

fn compile_to_module(runtime: &mut FlowRuntime, source: &str, name: &str) -> Option<Box<FlowModule>> {
    let mut sources = SourceMap::new();
    let file_id = sources.add(name, source);
    let mut sink = DiagnosticSink::new();
    let program = parse_source(source, file_id, &mut sink);
    let mut resolver = ModuleResolver::from_env();
    analyze_program(&program, Path::new(name), &mut sources, &mut resolver, &mut sink);

    if sink.has_errors() {
        let joined = sink
            .in_source_order()
            .iter()
            .map(|d| format!("{}:{}:{}: {}", name, d.loc.line, d.loc.column, d.message))
            .collect::<Vec<_>>()
            .join("\n");
        runtime.last_error = CString::new(joined).unwrap_or_default();
        return None;
    }

    let functions = program
        .functions()
        .map(|f| FlowFunction {
            name: CString::new(f.name.as_str()).unwrap_or_default(),
            param_count: f.params.len(),
        })
        .collect();
    Some(Box::new(FlowModule { functions }))
}

/// Initialize a compiler session.
#[unsafe(no_mangle)]
pub extern "C" fn flow_runtime_new() -> *mut FlowRuntime {
    Box::into_raw(Box::new(FlowRuntime {
        last_error: CString::default(),
    }))
}

/// Dispose a session created by [`flow_runtime_new`].
#[unsafe(no_mangle)]
pub extern "C" fn flow_runtime_free(runtime: *mut FlowRuntime) {
    if !runtime.is_null() {
        drop(unsafe { Box::from_raw(runtime) });
    }
}

/// Last diagnostic text; owned by the runtime, valid until the next compile.
#[unsafe(no_mangle)]
pub extern "C" fn flow_runtime_last_error(runtime: *mut FlowRuntime) -> *const c_char {
    if runtime.is_null() {
        return std::ptr::null();
    }
    unsafe { (*runtime).last_error.as_ptr() }
}

/// Compile source text in memory. Returns null on error (see
/// [`flow_runtime_last_error`]).
#[unsafe(no_mangle)]
pub extern "C" fn flow_module_compile(
    runtime: *mut FlowRuntime,
    source: *const c_char,
    name: *const c_char,
) -> *mut FlowModule {
    if runtime.is_null() || source.is_null() {
        return std::ptr::null_mut();
    }
    let runtime = unsafe { &mut *runtime };
    let Ok(source) = unsafe { CStr::from_ptr(source) }.to_str() else {
        runtime.last_error = CString::new("source is not valid UTF-8").unwrap();
        return std::ptr::null_mut();
    };
    let name = if name.is_null() {
        "<memory>"
    } else {
        unsafe { CStr::from_ptr(name) }.to_str().unwrap_or("<memory>")
    };
    match compile_to_module(runtime, source, name) {
        Some(module) => Box::into_raw(module),
        None => std::ptr::null_mut(),
    }
}

/// Compile a module from disk.
#[unsafe(no_mangle)]
pub extern "C" fn flow_module_load_file(
    runtime: *mut FlowRuntime,
    path: *const c_char,
) -> *mut FlowModule {
    if runtime.is_null() || path.is_null() {
        return std::ptr::null_mut();
    }
    let runtime_ref = unsafe { &mut *runtime };
    let Ok(path_str) = unsafe { CStr::from_ptr(path) }.to_str() else {
        runtime_ref.last_error = CString::new("path is not valid UTF-8").unwrap();
        return std::ptr::null_mut();
    };
    match std::fs::read_to_string(path_str) {
        Ok(source) => match compile_to_module(runtime_ref, &source, path_str) {
            Some(module) => Box::into_raw(module),
            None => std::ptr::null_mut(),
        },
        Err(err) => {
            runtime_ref.last_error =
                CString::new(format!("cannot read {path_str}: {err}")).unwrap_or_default();
            std::ptr::null_mut()
        }
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn flow_module_free(module: *mut FlowModule) {
    if !module.is_null() {
        drop(unsafe { Box::from_raw(module) });
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn flow_module_function_count(module: *mut FlowModule) -> c_int {
    if module.is_null() {
        return 0;
    }
    unsafe { (*module).functions.len() as c_int }
}

#[unsafe(no_mangle)]
pub extern "C" fn flow_module_function_name_at(
    module: *mut FlowModule,
    index: c_int,
) -> *const c_char {
    if module.is_null() || index < 0 {
        return std::ptr::null();
    }
    let module = unsafe { &*module };
    match module.functions.get(index as usize) {
        Some(function) => function.name.as_ptr(),
        None => std::ptr::null(),
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn flow_module_get_function(
    module: *mut FlowModule,
    name: *const c_char,
) -> *mut FlowFunction {
    if module.is_null() || name.is_null() {
        return std::ptr::null_mut();
    }
    let module = unsafe { &mut *module };
    let Ok(wanted) = unsafe { CStr::from_ptr(name) }.to_str() else {
        return std::ptr::null_mut();
    };
    for function in &mut module.functions {
        if function.name.to_str() == Ok(wanted) {
            return function as *mut FlowFunction;
        }
    }
    std::ptr::null_mut()
}

#[unsafe(no_mangle)]
pub extern "C" fn flow_function_param_count(function: *mut FlowFunction) -> c_int {
    if function.is_null() {
        return 0;
    }
    unsafe { (*function).param_count as c_int }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compile_and_reflect() {
        let runtime = flow_runtime_new();
        let source = CString::new(
            "func add(a: int, b: int) -> int { return a + b; }\n\
             func zero() -> int { return 0; }",
        )
        .unwrap();
        let name = CString::new("test.flow").unwrap();

        let module = flow_module_compile(runtime, source.as_ptr(), name.as_ptr());
        assert!(!module.is_null());
        assert_eq!(flow_module_function_count(module), 2);

        let first = flow_module_function_name_at(module, 0);
        assert_eq!(unsafe { CStr::from_ptr(first) }.to_str().unwrap(), "add");

        let add_name = CString::new("add").unwrap();
        let function = flow_module_get_function(module, add_name.as_ptr());
        assert!(!function.is_null());
        assert_eq!(flow_function_param_count(function), 2);

        flow_module_free(module);
        flow_runtime_free(runtime);
    }

    #[test]
    fn compile_error_sets_last_error() {
        let runtime = flow_runtime_new();
        let source = CString::new("let x: int = 3.14;").unwrap();
        let name = CString::new("bad.flow").unwrap();

        let module = flow_module_compile(runtime, source.as_ptr(), name.as_ptr());
        assert!(module.is_null());

        let error = flow_runtime_last_error(runtime);
        let text = unsafe { CStr::from_ptr(error) }.to_str().unwrap();
        assert!(text.contains("type mismatch"));

        flow_runtime_free(runtime);
    }

    #[test]
    fn null_arguments_are_tolerated() {
        assert!(flow_module_compile(std::ptr::null_mut(), std::ptr::null(), std::ptr::null())
            .is_null());
        assert_eq!(flow_module_function_count(std::ptr::null_mut()), 0);
        assert_eq!(flow_function_param_count(std::ptr::null_mut()), 0);
        flow_module_free(std::ptr::null_mut());
        flow_runtime_free(std::ptr::null_mut());
    }
}
