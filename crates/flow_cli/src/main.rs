use std::path::Path;
use std::process;

use clap::Parser;
use flow_driver::{compile_file, CompileOptions};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "flowc", about = "Flow compiler — native executables via LLVM", version)]
struct Cli {
    /// Input Flow source file.
    input: String,

    /// Output path.
    #[arg(short, long, default_value = "a.out")]
    output: String,

    /// Write textual LLVM IR to <output>.ll.
    #[arg(long)]
    emit_llvm: bool,

    /// Dump the parsed AST.
    #[arg(long)]
    emit_ast: bool,

    /// Optimization level hint for the backend (0-3).
    #[arg(short = 'O', value_name = "LEVEL", default_value_t = 0)]
    opt_level: u8,

    /// Verbose progress.
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let path = Path::new(&cli.input);
    if !path.exists() {
        eprintln!("error: file not found: {}", cli.input);
        process::exit(1);
    }

    let options = CompileOptions {
        output: cli.output,
        opt_level: cli.opt_level.min(3),
        emit_llvm: cli.emit_llvm,
        emit_ast: cli.emit_ast,
        verbose: cli.verbose,
    };

    match compile_file(path, &options) {
        Ok(()) => {}
        Err(e) => {
            eprintln!("{e}");
            process::exit(1);
        }
    }
}
