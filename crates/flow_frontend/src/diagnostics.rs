use std::fmt::Write as _;

use serde::Serialize;

use crate::source::{Loc, SourceMap};

// ANSI escapes used by the human-readable formatter.
const RED: &str = "\x1b[1;31m";
const YELLOW: &str = "\x1b[1;33m";
const BLUE: &str = "\x1b[1;34m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Severity {
    Error,
    Warning,
}

/// Which pipeline stage produced a diagnostic. Every diagnostic carries
/// exactly one category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Category {
    Lex,
    Parse,
    Semantic,
    Import,
    Io,
    Link,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Lex => "Lex",
            Category::Parse => "Parse",
            Category::Semantic => "Semantic",
            Category::Import => "Import",
            Category::Io => "Io",
            Category::Link => "Link",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub category: Category,
    pub message: String,
    pub loc: Loc,
}

/// Accumulates diagnostics across the whole pipeline.
///
/// Non-fatal problems are pushed here and compilation continues; a build is
/// successful iff the sink holds zero errors once lowering has finished.
#[derive(Debug, Default)]
pub struct DiagnosticSink {
    diagnostics: Vec<Diagnostic>,
}

impl DiagnosticSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn error(&mut self, category: Category, message: impl Into<String>, loc: Loc) {
        self.diagnostics.push(Diagnostic {
            severity: Severity::Error,
            category,
            message: message.into(),
            loc,
        });
    }

    pub fn warning(&mut self, category: Category, message: impl Into<String>, loc: Loc) {
        self.diagnostics.push(Diagnostic {
            severity: Severity::Warning,
            category,
            message: message.into(),
            loc,
        });
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    pub fn error_count(&self) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Error)
            .count()
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn take(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.diagnostics)
    }

    pub fn extend(&mut self, other: Vec<Diagnostic>) {
        self.diagnostics.extend(other);
    }

    /// Diagnostics sorted by file, then line, then column — the order the
    /// CLI prints them in.
    pub fn in_source_order(&self) -> Vec<&Diagnostic> {
        let mut out: Vec<&Diagnostic> = self.diagnostics.iter().collect();
        out.sort_by_key(|d| (d.loc.file.0, d.loc.line, d.loc.column));
        out
    }
}

/// Render one diagnostic with a window of source context: the line before,
/// the offending line with a caret underline, and the line after.
pub fn render(diag: &Diagnostic, sources: &SourceMap, color: bool) -> String {
    let (red, yellow, blue, bold, reset) = if color {
        (RED, YELLOW, BLUE, BOLD, RESET)
    } else {
        ("", "", "", "", "")
    };

    let mut out = String::new();
    match diag.severity {
        Severity::Error => {
            let _ = write!(
                out,
                "{red}error[{}]:{reset}{bold} {}{reset}\n",
                diag.category.as_str(),
                diag.message
            );
        }
        Severity::Warning => {
            let _ = write!(
                out,
                "{yellow}warning[{}]:{reset}{bold} {}{reset}\n",
                diag.category.as_str(),
                diag.message
            );
        }
    }

    let path = sources.path(diag.loc.file).display();
    let _ = write!(
        out,
        "{blue}  --> {reset}{}:{}:{}\n",
        path, diag.loc.line, diag.loc.column
    );

    let line_no = diag.loc.line;
    if let Some(line) = sources.line(diag.loc.file, line_no) {
        out.push('\n');
        if line_no > 1 {
            if let Some(prev) = sources.line(diag.loc.file, line_no - 1) {
                let _ = write!(out, "{blue}{:>5} | {reset}{prev}\n", line_no - 1);
            }
        }
        let _ = write!(out, "{blue}{:>5} | {reset}{line}\n", line_no);

        // Caret underline below the offending column.
        let _ = write!(out, "{blue}      | {reset}");
        for _ in 1..diag.loc.column {
            out.push(' ');
        }
        let mark = if diag.severity == Severity::Error {
            red
        } else {
            yellow
        };
        let _ = write!(out, "{mark}^");
        let rest = line.chars().count() as u32;
        let end = (diag.loc.column + 3).min(rest + 1);
        for _ in (diag.loc.column + 1)..end {
            let _ = write!(out, "~");
        }
        let _ = write!(out, "{reset}\n");

        if let Some(next) = sources.line(diag.loc.file, line_no + 1) {
            let _ = write!(out, "{blue}{:>5} | {reset}{next}\n", line_no + 1);
        }
    }

    out
}

/// Print every collected diagnostic to stderr in source order.
pub fn print_all(sink: &DiagnosticSink, sources: &SourceMap, color: bool) {
    for diag in sink.in_source_order() {
        eprintln!("{}", render(diag, sources, color));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::FileId;

    fn loc(line: u32, column: u32) -> Loc {
        Loc::new(FileId(0), line, column)
    }

    #[test]
    fn sink_tracks_errors_and_warnings_separately() {
        let mut sink = DiagnosticSink::new();
        sink.warning(Category::Semantic, "missing return", loc(1, 1));
        assert!(!sink.has_errors());
        sink.error(Category::Parse, "unexpected token", loc(2, 5));
        assert!(sink.has_errors());
        assert_eq!(sink.error_count(), 1);
        assert_eq!(sink.diagnostics().len(), 2);
    }

    #[test]
    fn render_includes_context_and_caret() {
        let mut sources = SourceMap::new();
        sources.add("demo.flow", "let a = 1;\nlet x: int = 3.14;\nlet b = 2;");
        let mut sink = DiagnosticSink::new();
        sink.error(Category::Semantic, "type mismatch", loc(2, 14));

        let text = render(&sink.diagnostics()[0], &sources, false);
        assert!(text.contains("error[Semantic]: type mismatch"));
        assert!(text.contains("demo.flow:2:14"));
        assert!(text.contains("let x: int = 3.14;"));
        assert!(text.contains("let a = 1;"));
        assert!(text.contains("let b = 2;"));
        // Caret sits under column 14.
        let caret_line = text
            .lines()
            .find(|l| l.contains('^'))
            .expect("caret line present");
        assert_eq!(caret_line.find('^').unwrap(), 8 + 13);
    }

    #[test]
    fn source_order_sorts_by_position() {
        let mut sink = DiagnosticSink::new();
        sink.error(Category::Semantic, "later", loc(5, 1));
        sink.error(Category::Parse, "earlier", loc(2, 3));
        let ordered = sink.in_source_order();
        assert_eq!(ordered[0].message, "earlier");
        assert_eq!(ordered[1].message, "later");
    }
}
