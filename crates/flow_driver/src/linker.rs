use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::debug;

use crate::pipeline::CompileError;

/// Hand one module's textual IR to the external code generator: `clang`
/// consumes the `.ll` and produces a platform-native object file.
pub fn write_object(ll_path: &Path, object_path: &Path, opt_level: u8) -> Result<(), CompileError> {
    let mut command = Command::new("clang");
    command
        .arg("-c")
        .arg(format!("-O{}", opt_level.min(3)))
        .arg("-x")
        .arg("ir")
        .arg(ll_path)
        .arg("-o")
        .arg(object_path);
    debug!(?command, "emitting object file");

    let output = command
        .output()
        .map_err(|e| CompileError::Codegen(format!("failed to invoke clang: {e}")))?;
    if !output.status.success() {
        return Err(CompileError::Codegen(format!(
            "clang exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    Ok(())
}

/// Link all object files into the final binary using the system C compiler
/// driver, with `-l` flags for every library recorded by `link`
/// declarations (adapter `c` only).
pub fn link(object_files: &[PathBuf], output: &str, libraries: &[String]) -> Result<(), CompileError> {
    let mut command = Command::new("cc");
    for object in object_files {
        command.arg(object);
    }
    command.arg("-o").arg(output);
    for library in libraries {
        command.arg(format!("-l{library}"));
    }
    debug!(?command, "linking");

    let status = command
        .status()
        .map_err(|e| CompileError::Link(format!("failed to invoke linker: {e}")))?;
    if !status.success() {
        return Err(CompileError::Link(format!(
            "linker exited with status: {status}"
        )));
    }
    Ok(())
}
