use std::io::{self, BufRead, Read, Write};
use std::path::PathBuf;

use rustc_hash::FxHashMap;
use serde_json::{json, Value};
use tracing::debug;

use flow_analysis::analyze_program;
use flow_frontend::ast::{DeclKind, Program};
use flow_frontend::diagnostics::{DiagnosticSink, Severity};
use flow_frontend::lexer::Scanner;
use flow_frontend::parse::parse_source;
use flow_frontend::resolve::ModuleResolver;
use flow_frontend::source::{FileId, SourceMap};
use flow_frontend::token::TokenKind;

const KEYWORDS: &[&str] = &[
    "let", "mut", "func", "return", "struct", "type", "if", "else", "for", "in", "while", "link",
    "export", "async", "await", "inline", "import", "module", "from", "as", "impl", "this",
    "lambda", "int", "float", "string", "bool", "void", "true", "false",
];

/// JSON-RPC language server over stdio.
///
/// Keeps the open documents in memory; every change re-runs the scanner,
/// parser, and semantic analyzer on the changed document and republishes
/// its diagnostics.
#[derive(Default)]
pub struct LanguageServer {
    documents: FxHashMap<String, String>,
}

impl LanguageServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve until `exit`.
    pub fn run_stdio(&mut self) -> io::Result<()> {
        let stdin = io::stdin();
        let mut reader = stdin.lock();
        loop {
            let Some(message) = read_message(&mut reader)? else {
                break;
            };
            let Ok(request) = serde_json::from_str::<Value>(&message) else {
                continue;
            };
            let method = request["method"].as_str().unwrap_or("").to_string();
            debug!(%method, "lsp request");
            if method == "exit" {
                break;
            }
            for response in self.handle(&method, &request) {
                write_message(&response)?;
            }
        }
        Ok(())
    }

    /// Dispatch one request/notification; returns the messages to send
    /// (responses and published diagnostics).
    pub fn handle(&mut self, method: &str, request: &Value) -> Vec<Value> {
        let id = request.get("id").cloned().unwrap_or(Value::Null);
        match method {
            "initialize" => vec![response(
                id,
                json!({
                    "capabilities": {
                        "textDocumentSync": 1,
                        "completionProvider": {},
                        "hoverProvider": true,
                        "definitionProvider": true,
                        "referencesProvider": true,
                    },
                    "serverInfo": { "name": "flow-lsp" },
                }),
            )],
            "initialized" => Vec::new(),
            "shutdown" => vec![response(id, Value::Null)],
            "textDocument/didOpen" => {
                let uri = request["params"]["textDocument"]["uri"]
                    .as_str()
                    .unwrap_or_default()
                    .to_string();
                let text = request["params"]["textDocument"]["text"]
                    .as_str()
                    .unwrap_or_default()
                    .to_string();
                self.documents.insert(uri.clone(), text);
                vec![self.publish_diagnostics(&uri)]
            }
            "textDocument/didChange" => {
                let uri = request["params"]["textDocument"]["uri"]
                    .as_str()
                    .unwrap_or_default()
                    .to_string();
                // Full-document sync: the last content change wins.
                if let Some(change) = request["params"]["contentChanges"]
                    .as_array()
                    .and_then(|c| c.last())
                {
                    if let Some(text) = change["text"].as_str() {
                        self.documents.insert(uri.clone(), text.to_string());
                    }
                }
                vec![self.publish_diagnostics(&uri)]
            }
            "textDocument/didClose" => {
                let uri = request["params"]["textDocument"]["uri"]
                    .as_str()
                    .unwrap_or_default()
                    .to_string();
                self.documents.remove(&uri);
                vec![json!({
                    "jsonrpc": "2.0",
                    "method": "textDocument/publishDiagnostics",
                    "params": { "uri": uri, "diagnostics": [] },
                })]
            }
            "textDocument/completion" => {
                let uri = request["params"]["textDocument"]["uri"]
                    .as_str()
                    .unwrap_or_default();
                vec![response(id, self.completion_items(uri))]
            }
            "textDocument/hover" => {
                let (uri, line, character) = text_document_position(request);
                vec![response(id, self.hover(&uri, line, character))]
            }
            "textDocument/definition" => {
                let (uri, line, character) = text_document_position(request);
                vec![response(id, self.definition(&uri, line, character))]
            }
            "textDocument/references" => {
                let (uri, line, character) = text_document_position(request);
                vec![response(id, self.references(&uri, line, character))]
            }
            _ => {
                // Unknown requests (with an id) get a MethodNotFound error;
                // unknown notifications are ignored.
                if id.is_null() {
                    Vec::new()
                } else {
                    vec![json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "error": { "code": -32601, "message": format!("method not found: {method}") },
                    })]
                }
            }
        }
    }

    // ---- analysis ---------------------------------------------------------

    fn analyze_document(&self, uri: &str) -> Option<(FileId, Program, DiagnosticSink)> {
        let text = self.documents.get(uri)?;
        let path = uri_to_path(uri);
        let mut sources = SourceMap::new();
        let file_id = sources.add(path.clone(), text.clone());
        let mut sink = DiagnosticSink::new();
        let program = parse_source(text, file_id, &mut sink);
        let mut resolver = ModuleResolver::from_env();
        analyze_program(&program, &path, &mut sources, &mut resolver, &mut sink);
        Some((file_id, program, sink))
    }

    fn publish_diagnostics(&self, uri: &str) -> Value {
        let mut items = Vec::new();
        if let Some((file_id, _, sink)) = self.analyze_document(uri) {
            for diag in sink.in_source_order() {
                // Imported modules publish under their own uri, not this one.
                if diag.loc.file != file_id {
                    continue;
                }
                let line = diag.loc.line.saturating_sub(1);
                let character = diag.loc.column.saturating_sub(1);
                items.push(json!({
                    "range": {
                        "start": { "line": line, "character": character },
                        "end": { "line": line, "character": character + 1 },
                    },
                    "severity": if diag.severity == Severity::Error { 1 } else { 2 },
                    "source": "flow",
                    "message": format!("[{}] {}", diag.category.as_str(), diag.message),
                }));
            }
        }
        json!({
            "jsonrpc": "2.0",
            "method": "textDocument/publishDiagnostics",
            "params": { "uri": uri, "diagnostics": items },
        })
    }

    fn completion_items(&self, uri: &str) -> Value {
        let mut items: Vec<Value> = KEYWORDS
            .iter()
            .map(|kw| json!({ "label": kw, "kind": 14 }))
            .collect();
        if let Some((_, program, _)) = self.analyze_document(uri) {
            for decl in &program.decls {
                match &decl.kind {
                    DeclKind::Function(f) if !f.is_method => {
                        items.push(json!({ "label": f.name, "kind": 3 }));
                    }
                    DeclKind::Struct { name, .. } => {
                        items.push(json!({ "label": name, "kind": 22 }));
                    }
                    DeclKind::TypeDef { name, .. } => {
                        items.push(json!({ "label": name, "kind": 22 }));
                    }
                    _ => {}
                }
            }
        }
        json!(items)
    }

    fn hover(&self, uri: &str, line: u32, character: u32) -> Value {
        let Some(word) = self.word_at(uri, line, character) else {
            return Value::Null;
        };
        let Some((_, program, _)) = self.analyze_document(uri) else {
            return Value::Null;
        };
        for decl in &program.decls {
            match &decl.kind {
                DeclKind::Function(f) if f.name == word => {
                    let params = f
                        .params
                        .iter()
                        .map(|p| format!("{}: {}", p.name, p.ty))
                        .collect::<Vec<_>>()
                        .join(", ");
                    return json!({
                        "contents": {
                            "kind": "markdown",
                            "value": format!("```flow\nfunc {}({}) -> {}\n```", f.name, params, f.ret),
                        }
                    });
                }
                DeclKind::Struct { name, fields, .. } if *name == word => {
                    let body = fields
                        .iter()
                        .map(|f| format!("  {} {};", f.ty, f.name))
                        .collect::<Vec<_>>()
                        .join("\n");
                    return json!({
                        "contents": {
                            "kind": "markdown",
                            "value": format!("```flow\nstruct {name} {{\n{body}\n}}\n```"),
                        }
                    });
                }
                _ => {}
            }
        }
        Value::Null
    }

    fn definition(&self, uri: &str, line: u32, character: u32) -> Value {
        let Some(word) = self.word_at(uri, line, character) else {
            return Value::Null;
        };
        let Some((_, program, _)) = self.analyze_document(uri) else {
            return Value::Null;
        };
        for decl in &program.decls {
            let name = match &decl.kind {
                DeclKind::Function(f) => Some(&f.name),
                DeclKind::Struct { name, .. } => Some(name),
                DeclKind::TypeDef { name, .. } => Some(name),
                _ => None,
            };
            if name.is_some_and(|n| *n == word) {
                let line = decl.loc.line.saturating_sub(1);
                let character = decl.loc.column.saturating_sub(1);
                return json!({
                    "uri": uri,
                    "range": {
                        "start": { "line": line, "character": character },
                        "end": { "line": line, "character": character + 1 },
                    }
                });
            }
        }
        Value::Null
    }

    fn references(&self, uri: &str, line: u32, character: u32) -> Value {
        let Some(word) = self.word_at(uri, line, character) else {
            return json!([]);
        };
        let Some(text) = self.documents.get(uri) else {
            return json!([]);
        };
        let mut sink = DiagnosticSink::new();
        let tokens = Scanner::new(text, FileId(0)).tokenize(&mut sink);
        let locations: Vec<Value> = tokens
            .iter()
            .filter(|t| t.kind == TokenKind::Identifier && t.lexeme == word)
            .map(|t| {
                let line = t.loc.line - 1;
                let start = t.loc.column - 1;
                json!({
                    "uri": uri,
                    "range": {
                        "start": { "line": line, "character": start },
                        "end": { "line": line, "character": start + t.lexeme.len() as u32 },
                    }
                })
            })
            .collect();
        json!(locations)
    }

    /// Identifier under an LSP (0-based) position.
    fn word_at(&self, uri: &str, line: u32, character: u32) -> Option<String> {
        let text = self.documents.get(uri)?;
        let mut sink = DiagnosticSink::new();
        let tokens = Scanner::new(text, FileId(0)).tokenize(&mut sink);
        let line = line + 1;
        let column = character + 1;
        tokens
            .iter()
            .find(|t| {
                t.kind == TokenKind::Identifier
                    && t.loc.line == line
                    && t.loc.column <= column
                    && column < t.loc.column + t.lexeme.len() as u32
            })
            .map(|t| t.lexeme.clone())
    }
}

fn response(id: Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

fn text_document_position(request: &Value) -> (String, u32, u32) {
    let params = &request["params"];
    let uri = params["textDocument"]["uri"]
        .as_str()
        .unwrap_or_default()
        .to_string();
    let line = params["position"]["line"].as_u64().unwrap_or(0) as u32;
    let character = params["position"]["character"].as_u64().unwrap_or(0) as u32;
    (uri, line, character)
}

fn uri_to_path(uri: &str) -> PathBuf {
    PathBuf::from(uri.strip_prefix("file://").unwrap_or(uri))
}

/// Read one Content-Length framed message; `None` on EOF.
fn read_message(reader: &mut impl BufRead) -> io::Result<Option<String>> {
    let mut content_length = 0usize;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some(value) = line.strip_prefix("Content-Length:") {
            content_length = value.trim().parse().unwrap_or(0);
        }
    }
    if content_length == 0 {
        return Ok(Some(String::new()));
    }
    let mut buf = vec![0u8; content_length];
    reader.read_exact(&mut buf)?;
    Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
}

fn write_message(message: &Value) -> io::Result<()> {
    let body = message.to_string();
    let mut stdout = io::stdout().lock();
    write!(stdout, "Content-Length: {}\r\n\r\n{body}", body.len())?;
    stdout.flush()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open(server: &mut LanguageServer, uri: &str, text: &str) -> Vec<Value> {
        server.handle(
            "textDocument/didOpen",
            &json!({
                "params": { "textDocument": { "uri": uri, "text": text } }
            }),
        )
    }

    #[test]
    fn initialize_advertises_capabilities() {
        let mut server = LanguageServer::new();
        let responses = server.handle("initialize", &json!({ "id": 1, "params": {} }));
        assert_eq!(responses.len(), 1);
        let caps = &responses[0]["result"]["capabilities"];
        assert_eq!(caps["textDocumentSync"], 1);
        assert_eq!(caps["hoverProvider"], true);
    }

    #[test]
    fn did_open_publishes_diagnostics_with_zero_based_positions() {
        let mut server = LanguageServer::new();
        let messages = open(&mut server, "file:///t.flow", "let x: int = 3.14;");
        assert_eq!(messages.len(), 1);
        let diags = messages[0]["params"]["diagnostics"].as_array().unwrap();
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0]["severity"], 1);
        assert_eq!(diags[0]["range"]["start"]["line"], 0);
        // `3.14` sits at 1-based column 14 → 0-based character 13.
        assert_eq!(diags[0]["range"]["start"]["character"], 13);
        assert!(diags[0]["message"].as_str().unwrap().contains("Semantic"));
    }

    #[test]
    fn did_change_clears_fixed_diagnostics() {
        let mut server = LanguageServer::new();
        open(&mut server, "file:///t.flow", "let x: int = 3.14;");
        let messages = server.handle(
            "textDocument/didChange",
            &json!({
                "params": {
                    "textDocument": { "uri": "file:///t.flow" },
                    "contentChanges": [ { "text": "let x: float = 3.14;" } ],
                }
            }),
        );
        let diags = messages[0]["params"]["diagnostics"].as_array().unwrap();
        assert!(diags.is_empty());
    }

    #[test]
    fn hover_shows_function_signature() {
        let mut server = LanguageServer::new();
        open(
            &mut server,
            "file:///t.flow",
            "func add(a: int, b: int) -> int { return a + b; }",
        );
        let hover = server.hover("file:///t.flow", 0, 6);
        let text = hover["contents"]["value"].as_str().unwrap();
        assert!(text.contains("func add(a: int, b: int) -> int"));
    }

    #[test]
    fn definition_points_at_the_declaration() {
        let mut server = LanguageServer::new();
        open(
            &mut server,
            "file:///t.flow",
            "func f() -> int { return 1; }\nfunc main() -> int { return f(); }",
        );
        // `f` at line 1 (0-based), character 28.
        let location = server.definition("file:///t.flow", 1, 28);
        assert_eq!(location["range"]["start"]["line"], 0);
    }

    #[test]
    fn references_lists_every_occurrence() {
        let mut server = LanguageServer::new();
        open(
            &mut server,
            "file:///t.flow",
            "func f() -> int { return 1; }\nfunc main() -> int { return f(); }",
        );
        let refs = server.references("file:///t.flow", 1, 28);
        assert_eq!(refs.as_array().unwrap().len(), 2);
    }

    #[test]
    fn completion_includes_keywords_and_document_symbols() {
        let mut server = LanguageServer::new();
        open(
            &mut server,
            "file:///t.flow",
            "struct Point { int x; }\nfunc dist() -> int { return 0; }",
        );
        let items = server.completion_items("file:///t.flow");
        let labels: Vec<&str> = items
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|i| i["label"].as_str())
            .collect();
        assert!(labels.contains(&"func"));
        assert!(labels.contains(&"Point"));
        assert!(labels.contains(&"dist"));
    }

    #[test]
    fn unknown_method_with_id_errors() {
        let mut server = LanguageServer::new();
        let responses = server.handle("textDocument/rename", &json!({ "id": 9 }));
        assert_eq!(responses[0]["error"]["code"], -32601);
    }
}
