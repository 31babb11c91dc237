use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;

/// Index of a loaded file inside a [`SourceMap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct FileId(pub u32);

/// A source position: 1-based line and column inside a loaded file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Loc {
    pub file: FileId,
    pub line: u32,
    pub column: u32,
}

impl Loc {
    pub fn new(file: FileId, line: u32, column: u32) -> Self {
        Self { file, line, column }
    }
}

/// One loaded source file. The text is owned here for the duration of a
/// compilation; everything downstream borrows slices of it.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: PathBuf,
    pub text: String,
}

/// Owns all loaded file contents, keyed by [`FileId`].
///
/// The map is append-only: files are registered during discovery/parsing and
/// read back by the diagnostic formatter when rendering context lines.
#[derive(Debug, Default, Clone)]
pub struct SourceMap {
    files: Vec<SourceFile>,
}

impl SourceMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register source text under a path and return its id.
    pub fn add(&mut self, path: impl Into<PathBuf>, text: impl Into<String>) -> FileId {
        let id = FileId(self.files.len() as u32);
        self.files.push(SourceFile {
            path: path.into(),
            text: text.into(),
        });
        id
    }

    /// Read a file from disk and register it.
    pub fn load(&mut self, path: &Path) -> io::Result<FileId> {
        let text = std::fs::read_to_string(path)?;
        Ok(self.add(path, text))
    }

    pub fn file(&self, id: FileId) -> &SourceFile {
        &self.files[id.0 as usize]
    }

    pub fn path(&self, id: FileId) -> &Path {
        &self.files[id.0 as usize].path
    }

    pub fn text(&self, id: FileId) -> &str {
        &self.files[id.0 as usize].text
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// The 1-based `line` of a file, without its trailing newline. Returns
    /// `None` when the line number is out of range.
    pub fn line(&self, id: FileId, line: u32) -> Option<&str> {
        if line == 0 {
            return None;
        }
        self.text(id)
            .split('\n')
            .nth(line as usize - 1)
            .map(|l| l.strip_suffix('\r').unwrap_or(l))
    }
}
