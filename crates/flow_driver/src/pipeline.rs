use std::path::{Path, PathBuf};

use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, info};

use flow_analysis::analyze_program;
use flow_codegen::lower_program;
use flow_frontend::ast::{DeclKind, Program};
use flow_frontend::diagnostics::{self, Category, Diagnostic, DiagnosticSink};
use flow_frontend::parse::parse_source;
use flow_frontend::resolve::ModuleResolver;
use flow_frontend::source::SourceMap;

use crate::linker;

/// Fixed intermediate directory for per-module artifacts.
pub const BUILD_DIR: &str = ".build";

/// Compilation options, filled from the CLI.
#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// Output binary path.
    pub output: String,
    /// Optimization level hint passed to the backend (0-3).
    pub opt_level: u8,
    /// Write textual IR to `<output>.ll`.
    pub emit_llvm: bool,
    /// Dump each module's AST to stdout.
    pub emit_ast: bool,
    pub verbose: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            output: "a.out".to_string(),
            opt_level: 0,
            emit_llvm: false,
            emit_ast: false,
            verbose: false,
        }
    }
}

/// Errors that abort a build.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Source diagnostics were already printed; the build failed.
    #[error("compilation failed with {errors} error(s)")]
    Compilation { errors: usize },
    #[error("codegen error: {0}")]
    Codegen(String),
    #[error("link error: {0}")]
    Link(String),
}

/// One module scheduled for compilation.
#[derive(Debug)]
pub struct BuiltModule {
    pub canonical: PathBuf,
    pub stem: String,
    pub source_size: u64,
    pub ir: String,
    pub object_path: PathBuf,
}

/// Result of the front-half of a build: every module discovered, analyzed,
/// and lowered to IR text, plus the union of link libraries.
#[derive(Debug)]
pub struct Build {
    pub entry: PathBuf,
    pub modules: Vec<BuiltModule>,
    pub libraries: Vec<String>,
}

/// Compile a root file and everything it transitively imports into a
/// native executable.
///
/// 1. Discovery: parse the transitive module graph (cycle detection here).
/// 2. Compile: per module — fresh analyzer, lowering to IR, object file.
/// 3. Link: one `cc` invocation over all objects plus `link` libraries.
/// 4. Report: per-module progress and a size summary.
pub fn compile_file(root: &Path, options: &CompileOptions) -> Result<(), CompileError> {
    let build = plan_build(root, options)?;

    std::fs::create_dir_all(BUILD_DIR)?;

    if options.emit_llvm {
        let entry_ir = build
            .modules
            .iter()
            .find(|m| m.canonical == build.entry)
            .map(|m| m.ir.as_str())
            .unwrap_or_default();
        std::fs::write(format!("{}.ll", options.output), entry_ir)?;
    }

    let total = build.modules.len();
    let mut object_files = Vec::new();
    for (index, module) in build.modules.iter().enumerate() {
        println!(
            "  [{}/{}] {}",
            index + 1,
            total,
            module.canonical.file_name().unwrap_or_default().to_string_lossy()
        );
        let ll_path = Path::new(BUILD_DIR).join(format!("{}.ll", module.stem));
        std::fs::write(&ll_path, &module.ir)?;
        linker::write_object(&ll_path, &module.object_path, options.opt_level)?;
        object_files.push(module.object_path.clone());
    }

    info!(objects = object_files.len(), "linking");
    linker::link(&object_files, &options.output, &build.libraries)?;

    print_summary(&build, &options.output);
    Ok(())
}

/// Discovery + per-module analysis and lowering, no object emission. The
/// test suite and `--emit-llvm` path stop here.
pub fn plan_build(root: &Path, options: &CompileOptions) -> Result<Build, CompileError> {
    let entry = std::fs::canonicalize(root)?;

    let mut sources = SourceMap::new();
    let mut resolver = ModuleResolver::from_env();
    let mut sink = DiagnosticSink::new();

    // Phase 1: discovery. The resolver's load map is complete afterwards
    // and read-only for the rest of the build.
    info!(root = %entry.display(), "discovering modules");
    let mut order: Vec<PathBuf> = Vec::new();
    discover(&entry, &mut sources, &mut resolver, &mut sink, &mut order)?;

    if sink.has_errors() {
        diagnostics::print_all(&sink, &sources, use_color());
        return Err(CompileError::Compilation {
            errors: sink.error_count(),
        });
    }

    if options.emit_ast {
        for path in &order {
            if let Some(program) = resolver.get(path) {
                println!("; {}", path.display());
                print!("{}", program.dump());
            }
        }
    }

    // Unique object-file stems for same-named modules in different dirs.
    let mut stems: Vec<String> = Vec::new();
    let planned: Vec<(PathBuf, String)> = order
        .iter()
        .map(|path| {
            let base = path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| "module".to_string());
            let mut stem = base.clone();
            let mut n = 1;
            while stems.contains(&stem) {
                stem = format!("{base}.{n}");
                n += 1;
            }
            stems.push(stem.clone());
            (path.clone(), stem)
        })
        .collect();

    // Phase 2: per-module compile. Modules are independent (cross-module
    // symbols are forward-declared), so rayon may fan out: every worker
    // gets a fresh analyzer over a cloned, read-only resolver snapshot.
    debug!(modules = planned.len(), "compiling modules");
    let results: Vec<(Option<BuiltModule>, Vec<String>, Vec<Diagnostic>)> = planned
        .par_iter()
        .map(|(path, stem)| {
            let mut worker_sources = sources.clone();
            let mut worker_resolver = resolver.clone();
            let mut worker_sink = DiagnosticSink::new();

            let program = worker_resolver
                .get(path)
                .cloned()
                .expect("module discovered");
            let analysis = analyze_program(
                &program,
                path,
                &mut worker_sources,
                &mut worker_resolver,
                &mut worker_sink,
            );
            if worker_sink.has_errors() {
                return (None, Vec::new(), worker_sink.take());
            }

            let imports: Vec<&Program> = analysis
                .imported_modules
                .iter()
                .filter_map(|p| worker_resolver.get(p))
                .collect();
            let is_entry = *path == entry;
            let ir = lower_program(&program, &analysis, stem, &imports, is_entry);

            let source_size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
            let module = BuiltModule {
                canonical: path.clone(),
                stem: stem.clone(),
                source_size,
                ir,
                object_path: Path::new(BUILD_DIR).join(format!("{stem}.o")),
            };
            (Some(module), analysis.link_libraries, worker_sink.take())
        })
        .collect();

    let mut modules = Vec::new();
    let mut libraries: Vec<String> = Vec::new();
    for (module, libs, diags) in results {
        sink.extend(diags);
        for lib in libs {
            if !libraries.contains(&lib) {
                libraries.push(lib);
            }
        }
        if let Some(module) = module {
            modules.push(module);
        }
    }

    diagnostics::print_all(&sink, &sources, use_color());
    if sink.has_errors() {
        return Err(CompileError::Compilation {
            errors: sink.error_count(),
        });
    }

    Ok(Build {
        entry,
        modules,
        libraries,
    })
}

/// Depth-first walk of the import graph. The resolver's loading marker is
/// live while a module's imports are being visited, so an import that
/// reaches back into the active chain is a circular import.
fn discover(
    path: &Path,
    sources: &mut SourceMap,
    resolver: &mut ModuleResolver,
    sink: &mut DiagnosticSink,
    order: &mut Vec<PathBuf>,
) -> Result<(), CompileError> {
    if resolver.get(path).is_some() || resolver.is_loading(path) {
        return Ok(());
    }
    resolver.begin_loading(path);

    let file_id = sources.load(path)?;
    let text = sources.text(file_id).to_string();
    let program = parse_source(&text, file_id, sink);

    let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
    for decl in &program.decls {
        let DeclKind::Import(import) = &decl.kind else {
            continue;
        };
        match resolver.resolve(&import.path, &dir) {
            Ok(resolved) => {
                if resolver.is_loading(&resolved) {
                    sink.error(
                        Category::Import,
                        format!("circular import detected: `{}`", import.path),
                        decl.loc,
                    );
                    continue;
                }
                discover(&resolved, sources, resolver, sink, order)?;
            }
            Err(err) => {
                sink.error(Category::Import, err.to_string(), decl.loc);
            }
        }
    }

    resolver.finish_loading(path, program);
    order.push(path.to_path_buf());
    Ok(())
}

fn print_summary(build: &Build, output: &str) {
    let total_source: u64 = build.modules.iter().map(|m| m.source_size).sum();
    let total_object: u64 = build
        .modules
        .iter()
        .filter_map(|m| std::fs::metadata(&m.object_path).ok())
        .map(|m| m.len())
        .sum();
    let binary_size = std::fs::metadata(output).map(|m| m.len()).unwrap_or(0);

    println!();
    println!("  modules compiled: {}", build.modules.len());
    println!("  source size:      {total_source} bytes");
    println!("  object size:      {total_object} bytes");
    println!("  binary size:      {binary_size} bytes");
    println!("  output:           {output}");
}

fn use_color() -> bool {
    std::io::IsTerminal::is_terminal(&std::io::stderr())
}
