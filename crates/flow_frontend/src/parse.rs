use crate::ast::*;
use crate::diagnostics::{Category, DiagnosticSink};
use crate::lexer::Scanner;
use crate::source::{FileId, Loc};
use crate::token::{Token, TokenKind};

/// Marker for panic-mode recovery: the failing production has already
/// reported its diagnostic; the caller synchronizes and resumes.
struct Recovered;

type PResult<T> = Result<T, Recovered>;

/// Recursive-descent parser with precedence climbing for expressions.
///
/// The parser always runs in collector mode: every error is reported to the
/// sink, panic-mode recovery skips to the next statement/declaration
/// boundary, and a best-effort partial `Program` is returned.
pub struct Parser<'a> {
    tokens: Vec<Token>,
    current: usize,
    file: FileId,
    sink: &'a mut DiagnosticSink,
    next_id: u32,
}

/// Scan and parse source text in one step.
pub fn parse_source(src: &str, file: FileId, sink: &mut DiagnosticSink) -> Program {
    let tokens = Scanner::new(src, file).tokenize(sink);
    Parser::new(tokens, file, sink).parse()
}

impl<'a> Parser<'a> {
    pub fn new(tokens: Vec<Token>, file: FileId, sink: &'a mut DiagnosticSink) -> Self {
        Self {
            tokens,
            current: 0,
            file,
            sink,
            next_id: 0,
        }
    }

    // ---- token cursor -----------------------------------------------------

    fn peek(&self) -> &Token {
        &self.tokens[self.current.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self) -> TokenKind {
        self.peek().kind
    }

    fn peek_loc(&self) -> Loc {
        self.peek().loc
    }

    fn is_at_end(&self) -> bool {
        self.peek_kind() == TokenKind::Eof
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if !self.is_at_end() {
            self.current += 1;
        }
        token
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.peek_kind() == kind
    }

    fn match_kind(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn consume(&mut self, kind: TokenKind, message: &str) -> PResult<Token> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(self.error_here(message))
        }
    }

    fn error_here(&mut self, message: &str) -> Recovered {
        let loc = self.peek_loc();
        let found = self.peek().to_string();
        self.sink
            .error(Category::Parse, format!("{message}, found {found}"), loc);
        Recovered
    }

    fn fresh_id(&mut self) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        id
    }

    fn expr(&mut self, loc: Loc, kind: ExprKind) -> Expr {
        Expr {
            id: self.fresh_id(),
            loc,
            kind,
        }
    }

    /// Panic-mode recovery: skip tokens until a statement/declaration
    /// boundary (a semicolon, or a keyword from the synchronization set).
    fn synchronize(&mut self) {
        self.advance();
        while !self.is_at_end() {
            if self.tokens[self.current - 1].kind == TokenKind::Semicolon {
                return;
            }
            match self.peek_kind() {
                TokenKind::KwFunc
                | TokenKind::KwStruct
                | TokenKind::KwLet
                | TokenKind::KwMut
                | TokenKind::KwReturn
                | TokenKind::KwIf
                | TokenKind::KwFor
                | TokenKind::KwWhile => return,
                _ => {
                    self.advance();
                }
            }
        }
    }

    // ---- program / declarations -------------------------------------------

    pub fn parse(mut self) -> Program {
        let mut decls = Vec::new();
        while !self.is_at_end() {
            let before = self.current;
            match self.parse_declaration() {
                Ok(decl) => decls.push(decl),
                Err(Recovered) => {
                    self.synchronize();
                    // Always make progress, even when the error sat on a
                    // synchronization token.
                    if self.current == before {
                        self.advance();
                    }
                }
            }
        }
        Program {
            file: self.file,
            decls,
        }
    }

    fn parse_declaration(&mut self) -> PResult<Decl> {
        let loc = self.peek_loc();
        let is_exported = self.match_kind(TokenKind::KwExport);

        if self.match_kind(TokenKind::KwImport) {
            return self.parse_import(loc);
        }
        if self.match_kind(TokenKind::KwModule) {
            let name = self.consume(TokenKind::Identifier, "expected module name")?;
            self.consume(TokenKind::Semicolon, "expected `;` after module declaration")?;
            return Ok(Decl {
                loc,
                kind: DeclKind::Module { name: name.lexeme },
            });
        }
        let is_async = self.match_kind(TokenKind::KwAsync);
        if self.match_kind(TokenKind::KwFunc) {
            let func = self.parse_function(is_async, is_exported)?;
            return Ok(Decl {
                loc,
                kind: DeclKind::Function(func),
            });
        }
        if is_async {
            return Err(self.error_here("expected `func` after `async`"));
        }
        if self.match_kind(TokenKind::KwStruct) {
            return self.parse_struct(loc, is_exported);
        }
        if self.match_kind(TokenKind::KwImpl) {
            return self.parse_impl(loc, is_exported);
        }
        if self.match_kind(TokenKind::KwType) {
            let name = self.consume(TokenKind::Identifier, "expected type alias name")?;
            self.consume(TokenKind::Assign, "expected `=` after type name")?;
            let aliased = self.parse_type()?;
            self.consume(TokenKind::Semicolon, "expected `;` after type definition")?;
            return Ok(Decl {
                loc,
                kind: DeclKind::TypeDef {
                    name: name.lexeme,
                    aliased,
                    is_exported,
                },
            });
        }
        if self.match_kind(TokenKind::KwLink) {
            return self.parse_link(loc);
        }

        // Anything else is a top-level statement.
        let stmt = self.parse_statement()?;
        Ok(Decl {
            loc,
            kind: DeclKind::Stmt(stmt),
        })
    }

    fn parse_function(&mut self, is_async: bool, is_exported: bool) -> PResult<FunctionDecl> {
        let name = self.consume(TokenKind::Identifier, "expected function name")?;
        self.consume(TokenKind::LParen, "expected `(` after function name")?;
        let params = self.parse_params(TokenKind::RParen)?;
        self.consume(TokenKind::RParen, "expected `)` after parameters")?;

        let ret = if self.match_kind(TokenKind::Arrow) {
            self.parse_type()?
        } else {
            Type::Void
        };

        let body = self.parse_braced_body()?;

        Ok(FunctionDecl {
            name: name.lexeme,
            params,
            ret,
            body,
            is_async,
            is_exported,
            is_method: false,
            receiver: None,
        })
    }

    fn parse_struct(&mut self, loc: Loc, is_exported: bool) -> PResult<Decl> {
        let name = self.consume(TokenKind::Identifier, "expected struct name")?;
        self.consume(TokenKind::LBrace, "expected `{` after struct name")?;

        let mut fields = Vec::new();
        while !self.check(TokenKind::RBrace) && !self.is_at_end() {
            let field_loc = self.peek_loc();
            let ty = self.parse_type()?;
            let field_name = self.consume(TokenKind::Identifier, "expected field name")?;
            self.consume(TokenKind::Semicolon, "expected `;` after struct field")?;
            fields.push(StructField {
                name: field_name.lexeme,
                ty,
                loc: field_loc,
            });
        }

        self.consume(TokenKind::RBrace, "expected `}` after struct fields")?;
        Ok(Decl {
            loc,
            kind: DeclKind::Struct {
                name: name.lexeme,
                fields,
                is_exported,
            },
        })
    }

    /// `impl Struct::method(params) -> ret { body }` desugars to a function
    /// whose first parameter is the implicit `this: Struct`.
    fn parse_impl(&mut self, loc: Loc, is_exported: bool) -> PResult<Decl> {
        let struct_name = self.consume(TokenKind::Identifier, "expected struct name after `impl`")?;
        self.consume(TokenKind::ColonColon, "expected `::` after struct name")?;
        let method_name = self.consume(TokenKind::Identifier, "expected method name after `::`")?;

        self.consume(TokenKind::LParen, "expected `(` after method name")?;
        let mut params = vec![Param {
            name: "this".to_string(),
            ty: Type::named(struct_name.lexeme.clone()),
            loc: struct_name.loc,
        }];
        params.extend(self.parse_params(TokenKind::RParen)?);
        self.consume(TokenKind::RParen, "expected `)` after parameters")?;

        let ret = if self.match_kind(TokenKind::Arrow) {
            self.parse_type()?
        } else {
            Type::Void
        };

        let body = self.parse_braced_body()?;

        Ok(Decl {
            loc,
            kind: DeclKind::Function(FunctionDecl {
                name: method_name.lexeme,
                params,
                ret,
                body,
                is_async: false,
                is_exported,
                is_method: true,
                receiver: Some(struct_name.lexeme),
            }),
        })
    }

    fn parse_link(&mut self, loc: Loc) -> PResult<Decl> {
        let adapter_token =
            self.consume(TokenKind::StringLiteral, "expected adapter string after `link`")?;

        // "python:math" → adapter "python", module "math".
        let (adapter, module) = match adapter_token.lexeme.split_once(':') {
            Some((a, m)) => (a.to_string(), m.to_string()),
            None => (adapter_token.lexeme.clone(), String::new()),
        };

        self.consume(TokenKind::LBrace, "expected `{` after link adapter")?;

        let mut inline_code = None;
        let mut functions = Vec::new();
        while !self.check(TokenKind::RBrace) && !self.is_at_end() {
            if self.match_kind(TokenKind::KwInline) {
                let code = self.consume(TokenKind::StringLiteral, "expected inline code string")?;
                self.consume(TokenKind::Semicolon, "expected `;` after inline code")?;
                inline_code = Some(code.lexeme);
                continue;
            }
            if self.match_kind(TokenKind::KwFunc) {
                functions.push(self.parse_foreign_fn()?);
                continue;
            }
            return Err(self.error_here("expected `func` or `inline` in link block"));
        }

        self.consume(TokenKind::RBrace, "expected `}` after link block")?;
        Ok(Decl {
            loc,
            kind: DeclKind::Link(LinkDecl {
                adapter,
                module,
                inline_code,
                functions,
            }),
        })
    }

    /// A bodiless signature inside a `link` block. Variadic `...` must be
    /// the final parameter and is only legal here.
    fn parse_foreign_fn(&mut self) -> PResult<ForeignFn> {
        let name = self.consume(TokenKind::Identifier, "expected function name")?;
        self.consume(TokenKind::LParen, "expected `(` after function name")?;

        let mut params = Vec::new();
        let mut variadic = false;
        if !self.check(TokenKind::RParen) {
            loop {
                if self.match_kind(TokenKind::Ellipsis) {
                    variadic = true;
                    break;
                }
                params.push(self.parse_parameter()?);
                if !self.match_kind(TokenKind::Comma) {
                    break;
                }
                if self.check(TokenKind::RParen) {
                    return Err(self.error_here("trailing comma in parameter list"));
                }
            }
        }
        self.consume(TokenKind::RParen, "expected `)` after parameters")?;

        let ret = if self.match_kind(TokenKind::Arrow) {
            self.parse_type()?
        } else {
            Type::Void
        };
        self.consume(
            TokenKind::Semicolon,
            "expected `;` after foreign function declaration",
        )?;

        Ok(ForeignFn {
            name: name.lexeme.clone(),
            params,
            ret,
            variadic,
            loc: name.loc,
        })
    }

    fn parse_import(&mut self, loc: Loc) -> PResult<Decl> {
        // import { a, b } from "path";
        if self.match_kind(TokenKind::LBrace) {
            let mut selected = Vec::new();
            loop {
                let id = self.consume(TokenKind::Identifier, "expected imported name")?;
                selected.push(id.lexeme);
                if !self.match_kind(TokenKind::Comma) {
                    break;
                }
                if self.check(TokenKind::RBrace) {
                    return Err(self.error_here("trailing comma in import list"));
                }
            }
            self.consume(TokenKind::RBrace, "expected `}` after import list")?;
            self.consume(TokenKind::KwFrom, "expected `from` after import list")?;
            let path = self.consume(TokenKind::StringLiteral, "expected module path string")?;
            self.consume(TokenKind::Semicolon, "expected `;` after import")?;
            return Ok(Decl {
                loc,
                kind: DeclKind::Import(ImportDecl {
                    path: path.lexeme,
                    selected: Some(selected),
                    alias: None,
                }),
            });
        }

        // import "path" [as alias];
        let path = self.consume(TokenKind::StringLiteral, "expected module path string")?;
        let alias = if self.match_kind(TokenKind::KwAs) {
            let alias = self.consume(TokenKind::Identifier, "expected alias identifier")?;
            Some(alias.lexeme)
        } else {
            None
        };
        self.consume(TokenKind::Semicolon, "expected `;` after import")?;
        Ok(Decl {
            loc,
            kind: DeclKind::Import(ImportDecl {
                path: path.lexeme,
                selected: None,
                alias,
            }),
        })
    }

    fn parse_params(&mut self, closer: TokenKind) -> PResult<Vec<Param>> {
        let mut params = Vec::new();
        if self.check(closer) {
            return Ok(params);
        }
        loop {
            params.push(self.parse_parameter()?);
            if !self.match_kind(TokenKind::Comma) {
                break;
            }
            if self.check(closer) {
                return Err(self.error_here("trailing comma in parameter list"));
            }
        }
        Ok(params)
    }

    fn parse_parameter(&mut self) -> PResult<Param> {
        let name = self.consume(TokenKind::Identifier, "expected parameter name")?;
        self.consume(TokenKind::Colon, "expected `:` after parameter name")?;
        let ty = self.parse_type()?;
        Ok(Param {
            name: name.lexeme,
            ty,
            loc: name.loc,
        })
    }

    // ---- types ------------------------------------------------------------

    fn primitive_type(kind: TokenKind) -> Option<Type> {
        match kind {
            TokenKind::TyInt => Some(Type::Int),
            TokenKind::TyFloat => Some(Type::Float),
            TokenKind::TyString => Some(Type::String),
            TokenKind::TyBool => Some(Type::Bool),
            TokenKind::TyVoid => Some(Type::Void),
            _ => None,
        }
    }

    fn parse_type(&mut self) -> PResult<Type> {
        let loc = self.peek_loc();
        let token = self.advance();
        let base = if let Some(prim) = Self::primitive_type(token.kind) {
            prim
        } else if token.kind == TokenKind::Identifier {
            Type::named(token.lexeme)
        } else {
            self.sink.error(
                Category::Parse,
                format!("expected type name, found {token}"),
                loc,
            );
            return Err(Recovered);
        };

        // Function type: `ret lambda[param, …]`.
        if self.match_kind(TokenKind::KwLambda) {
            self.consume(TokenKind::LBracket, "expected `[` after `lambda` in function type")?;
            let mut params = Vec::new();
            if !self.check(TokenKind::RBracket) {
                loop {
                    params.push(self.parse_type()?);
                    if !self.match_kind(TokenKind::Comma) {
                        break;
                    }
                    if self.check(TokenKind::RBracket) {
                        return Err(self.error_here("trailing comma in parameter type list"));
                    }
                }
            }
            self.consume(TokenKind::RBracket, "expected `]` after lambda parameter types")?;
            return Ok(Type::Function {
                ret: Box::new(base),
                params,
            });
        }

        // `T[]` → array of T.
        if self.match_kind(TokenKind::LBracket) {
            self.consume(TokenKind::RBracket, "expected `]` in array type")?;
            return Ok(Type::Array(Box::new(base)));
        }

        // `T?` → Option<T>.
        if self.match_kind(TokenKind::Question) {
            return Ok(Type::option(base));
        }

        Ok(base)
    }

    // ---- statements -------------------------------------------------------

    fn parse_statement(&mut self) -> PResult<Stmt> {
        let loc = self.peek_loc();

        if self.match_kind(TokenKind::KwReturn) {
            let value = if self.check(TokenKind::Semicolon) {
                None
            } else {
                Some(self.parse_expression()?)
            };
            self.consume(TokenKind::Semicolon, "expected `;` after return value")?;
            return Ok(Stmt {
                loc,
                kind: StmtKind::Return(value),
            });
        }

        if self.match_kind(TokenKind::KwLet) {
            return self.parse_var_decl(loc);
        }

        if self.match_kind(TokenKind::KwIf) {
            return self.parse_if(loc);
        }

        if self.match_kind(TokenKind::KwFor) {
            return self.parse_for(loc);
        }

        if self.match_kind(TokenKind::KwWhile) {
            self.consume(TokenKind::LParen, "expected `(` after `while`")?;
            let cond = self.parse_expression()?;
            self.consume(TokenKind::RParen, "expected `)` after condition")?;
            let body = self.parse_branch_body()?;
            return Ok(Stmt {
                loc,
                kind: StmtKind::While { cond, body },
            });
        }

        if self.check(TokenKind::LBrace) {
            let stmts = self.parse_braced_body()?;
            return Ok(Stmt {
                loc,
                kind: StmtKind::Block(stmts),
            });
        }

        self.parse_expr_stmt(loc)
    }

    fn parse_var_decl(&mut self, loc: Loc) -> PResult<Stmt> {
        let mutable = self.match_kind(TokenKind::KwMut);
        let name = self.consume(TokenKind::Identifier, "expected variable name")?;

        let declared = if self.match_kind(TokenKind::Colon) {
            Some(self.parse_type()?)
        } else {
            None
        };
        let init = if self.match_kind(TokenKind::Assign) {
            Some(self.parse_expression()?)
        } else {
            None
        };

        if declared.is_none() && init.is_none() {
            self.sink.error(
                Category::Parse,
                format!(
                    "variable `{}` needs a type annotation or an initializer",
                    name.lexeme
                ),
                name.loc,
            );
        }

        self.consume(TokenKind::Semicolon, "expected `;` after variable declaration")?;
        Ok(Stmt {
            loc,
            kind: StmtKind::VarDecl {
                name: name.lexeme,
                mutable,
                declared,
                init,
            },
        })
    }

    fn parse_if(&mut self, loc: Loc) -> PResult<Stmt> {
        self.consume(TokenKind::LParen, "expected `(` after `if`")?;
        let cond = self.parse_expression()?;
        self.consume(TokenKind::RParen, "expected `)` after condition")?;

        let then_branch = self.parse_branch_body()?;
        let else_branch = if self.match_kind(TokenKind::KwElse) {
            if self.check(TokenKind::KwIf) {
                // `else if` chains nest as a single-statement else branch.
                vec![self.parse_statement()?]
            } else {
                self.parse_branch_body()?
            }
        } else {
            Vec::new()
        };

        Ok(Stmt {
            loc,
            kind: StmtKind::If {
                cond,
                then_branch,
                else_branch,
            },
        })
    }

    fn parse_for(&mut self, loc: Loc) -> PResult<Stmt> {
        self.consume(TokenKind::LParen, "expected `(` after `for`")?;
        let var = self.consume(TokenKind::Identifier, "expected iterator variable")?;
        self.consume(TokenKind::KwIn, "expected `in` after iterator variable")?;

        let first = self.parse_expression()?;
        let range = if self.match_kind(TokenKind::DotDot) {
            let end = self.parse_expression()?;
            ForRange::Range { start: first, end }
        } else {
            ForRange::Iterable(first)
        };
        self.consume(TokenKind::RParen, "expected `)` after for clause")?;

        let body = self.parse_branch_body()?;
        Ok(Stmt {
            loc,
            kind: StmtKind::For {
                var: var.lexeme,
                range,
                body,
            },
        })
    }

    /// Either a braced block or a single statement (if/for/while bodies).
    fn parse_branch_body(&mut self) -> PResult<Vec<Stmt>> {
        if self.check(TokenKind::LBrace) {
            self.parse_braced_body()
        } else {
            Ok(vec![self.parse_statement()?])
        }
    }

    /// `{ stmt* }` with statement-level recovery: an error inside one
    /// statement synchronizes and keeps parsing the rest of the block.
    fn parse_braced_body(&mut self) -> PResult<Vec<Stmt>> {
        self.consume(TokenKind::LBrace, "expected `{`")?;
        let mut stmts = Vec::new();
        while !self.check(TokenKind::RBrace) && !self.is_at_end() {
            let before = self.current;
            match self.parse_statement() {
                Ok(stmt) => stmts.push(stmt),
                Err(Recovered) => {
                    self.synchronize();
                    if self.current == before {
                        self.advance();
                    }
                }
            }
        }
        self.consume(TokenKind::RBrace, "expected `}`")?;
        Ok(stmts)
    }

    fn parse_expr_stmt(&mut self, loc: Loc) -> PResult<Stmt> {
        let expr = self.parse_expression()?;

        if self.match_kind(TokenKind::Assign) {
            match expr.kind {
                ExprKind::Identifier(_) | ExprKind::Member { .. } | ExprKind::Index { .. } => {}
                _ => {
                    self.sink
                        .error(Category::Parse, "invalid assignment target", expr.loc);
                }
            }
            let value = self.parse_expression()?;
            self.consume(TokenKind::Semicolon, "expected `;` after assignment")?;
            return Ok(Stmt {
                loc,
                kind: StmtKind::Assign {
                    target: expr,
                    value,
                },
            });
        }

        self.consume(TokenKind::Semicolon, "expected `;` after expression")?;
        Ok(Stmt {
            loc,
            kind: StmtKind::Expr(expr),
        })
    }

    // ---- expressions ------------------------------------------------------

    pub fn parse_expression(&mut self) -> PResult<Expr> {
        self.parse_binary(0)
    }

    /// Binding power per the precedence ladder, lowest first. `None` for
    /// tokens that do not continue a binary expression.
    fn binding_power(kind: TokenKind) -> Option<(u8, BinOp)> {
        let entry = match kind {
            TokenKind::OrOr => (1, BinOp::Or),
            TokenKind::AndAnd => (2, BinOp::And),
            TokenKind::Pipe => (3, BinOp::BitOr),
            TokenKind::Caret => (4, BinOp::BitXor),
            TokenKind::Amp => (5, BinOp::BitAnd),
            TokenKind::Eq => (6, BinOp::Eq),
            TokenKind::Ne => (6, BinOp::Ne),
            TokenKind::Lt => (7, BinOp::Lt),
            TokenKind::Le => (7, BinOp::Le),
            TokenKind::Gt => (7, BinOp::Gt),
            TokenKind::Ge => (7, BinOp::Ge),
            TokenKind::Shl => (8, BinOp::Shl),
            TokenKind::Shr => (8, BinOp::Shr),
            TokenKind::Plus => (9, BinOp::Add),
            TokenKind::Minus => (9, BinOp::Sub),
            TokenKind::Star => (10, BinOp::Mul),
            TokenKind::Slash => (10, BinOp::Div),
            TokenKind::Percent => (10, BinOp::Rem),
            _ => return None,
        };
        Some(entry)
    }

    /// Precedence climbing: all binary operators are left-associative.
    fn parse_binary(&mut self, min_bp: u8) -> PResult<Expr> {
        let mut lhs = self.parse_unary()?;

        while let Some((bp, op)) = Self::binding_power(self.peek_kind()) {
            if bp < min_bp {
                break;
            }
            let op_loc = self.peek_loc();
            self.advance();
            let rhs = self.parse_binary(bp + 1)?;
            lhs = self.expr(
                op_loc,
                ExprKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
            );
        }

        Ok(lhs)
    }

    fn parse_unary(&mut self) -> PResult<Expr> {
        let op = match self.peek_kind() {
            TokenKind::Not => Some(UnOp::Not),
            TokenKind::Minus => Some(UnOp::Neg),
            TokenKind::Tilde => Some(UnOp::BitNot),
            _ => None,
        };
        if let Some(op) = op {
            let loc = self.peek_loc();
            self.advance();
            let operand = self.parse_unary()?;
            return Ok(self.expr(
                loc,
                ExprKind::Unary {
                    op,
                    operand: Box::new(operand),
                },
            ));
        }
        self.parse_postfix()
    }

    /// Calls, member access, and indexing — postfix, left-associative.
    fn parse_postfix(&mut self) -> PResult<Expr> {
        let mut expr = self.parse_primary()?;

        loop {
            if self.match_kind(TokenKind::LParen) {
                let mut args = Vec::new();
                if !self.check(TokenKind::RParen) {
                    loop {
                        args.push(self.parse_expression()?);
                        if !self.match_kind(TokenKind::Comma) {
                            break;
                        }
                        if self.check(TokenKind::RParen) {
                            return Err(self.error_here("trailing comma in argument list"));
                        }
                    }
                }
                self.consume(TokenKind::RParen, "expected `)` after arguments")?;
                let loc = expr.loc;
                expr = self.expr(
                    loc,
                    ExprKind::Call {
                        callee: Box::new(expr),
                        args,
                    },
                );
            } else if self.match_kind(TokenKind::Dot) {
                let field = self.consume(TokenKind::Identifier, "expected field name after `.`")?;
                let loc = expr.loc;
                expr = self.expr(
                    loc,
                    ExprKind::Member {
                        object: Box::new(expr),
                        field: field.lexeme,
                    },
                );
            } else if self.match_kind(TokenKind::LBracket) {
                let index = self.parse_expression()?;
                self.consume(TokenKind::RBracket, "expected `]` after array index")?;
                let loc = expr.loc;
                expr = self.expr(
                    loc,
                    ExprKind::Index {
                        array: Box::new(expr),
                        index: Box::new(index),
                    },
                );
            } else {
                break;
            }
        }

        Ok(expr)
    }

    fn parse_primary(&mut self) -> PResult<Expr> {
        let loc = self.peek_loc();

        match self.peek_kind() {
            TokenKind::KwThis => {
                self.advance();
                Ok(self.expr(loc, ExprKind::This))
            }
            TokenKind::IntLiteral => {
                let token = self.advance();
                let value = token.lexeme.parse::<i64>().unwrap_or_else(|_| {
                    self.sink.error(
                        Category::Parse,
                        format!("integer literal `{}` is out of range", token.lexeme),
                        token.loc,
                    );
                    0
                });
                Ok(self.expr(loc, ExprKind::IntLit(value)))
            }
            TokenKind::FloatLiteral => {
                let token = self.advance();
                let value = token.lexeme.parse::<f64>().unwrap_or(0.0);
                Ok(self.expr(loc, ExprKind::FloatLit(value)))
            }
            TokenKind::StringLiteral => {
                let token = self.advance();
                Ok(self.expr(loc, ExprKind::StringLit(token.lexeme)))
            }
            TokenKind::BoolLiteral => {
                let token = self.advance();
                Ok(self.expr(loc, ExprKind::BoolLit(token.lexeme == "true")))
            }
            TokenKind::KwLambda => {
                self.advance();
                self.parse_lambda(loc, Type::Void)
            }
            kind if kind.is_type_name() => {
                // Only `int lambda[…]`-style typed lambdas start with a
                // type name in expression position.
                let token = self.advance();
                let ret = Self::primitive_type(token.kind).unwrap();
                if self.match_kind(TokenKind::KwLambda) {
                    self.parse_lambda(loc, ret)
                } else {
                    Err(self.error_here("expected `lambda` after return type"))
                }
            }
            TokenKind::Identifier => {
                let token = self.advance();
                if self.check(TokenKind::KwLambda) {
                    self.advance();
                    return self.parse_lambda(loc, Type::named(token.lexeme));
                }
                if self.check(TokenKind::LBrace) {
                    return self.parse_struct_init(loc, token.lexeme);
                }
                Ok(self.expr(loc, ExprKind::Identifier(token.lexeme)))
            }
            TokenKind::LParen => {
                self.advance();
                let expr = self.parse_expression()?;
                self.consume(TokenKind::RParen, "expected `)` after expression")?;
                Ok(expr)
            }
            TokenKind::LBracket => {
                self.advance();
                let mut elements = Vec::new();
                if !self.check(TokenKind::RBracket) {
                    loop {
                        elements.push(self.parse_expression()?);
                        if !self.match_kind(TokenKind::Comma) {
                            break;
                        }
                        if self.check(TokenKind::RBracket) {
                            return Err(self.error_here("trailing comma in array literal"));
                        }
                    }
                }
                self.consume(TokenKind::RBracket, "expected `]` after array elements")?;
                Ok(self.expr(loc, ExprKind::ArrayLit(elements)))
            }
            _ => Err(self.error_here("expected expression")),
        }
    }

    fn parse_struct_init(&mut self, loc: Loc, name: String) -> PResult<Expr> {
        self.consume(TokenKind::LBrace, "expected `{`")?;
        let mut fields = Vec::new();
        if !self.check(TokenKind::RBrace) {
            loop {
                fields.push(self.parse_expression()?);
                if !self.match_kind(TokenKind::Comma) {
                    break;
                }
                if self.check(TokenKind::RBrace) {
                    return Err(self.error_here("trailing comma in struct initializer"));
                }
            }
        }
        self.consume(TokenKind::RBrace, "expected `}` after struct fields")?;
        Ok(self.expr(loc, ExprKind::StructInit { name, fields }))
    }

    /// Body of a lambda after its return type and the `lambda` keyword:
    /// `[params] { stmts }`.
    fn parse_lambda(&mut self, loc: Loc, ret: Type) -> PResult<Expr> {
        self.consume(TokenKind::LBracket, "expected `[` after `lambda`")?;
        let params = self.parse_params(TokenKind::RBracket)?;
        self.consume(TokenKind::RBracket, "expected `]` after lambda parameters")?;
        let body = self.parse_braced_body()?;
        Ok(self.expr(loc, ExprKind::Lambda { params, ret, body }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(src: &str) -> Program {
        let mut sink = DiagnosticSink::new();
        let program = parse_source(src, FileId(0), &mut sink);
        assert!(
            !sink.has_errors(),
            "unexpected diagnostics: {:?}",
            sink.diagnostics()
        );
        program
    }

    fn parse_with_errors(src: &str) -> (Program, DiagnosticSink) {
        let mut sink = DiagnosticSink::new();
        let program = parse_source(src, FileId(0), &mut sink);
        (program, sink)
    }

    #[test]
    fn function_declaration_shape() {
        let program = parse_ok("func add(a: int, b: int) -> int { return a + b; }");
        assert_eq!(program.decls.len(), 1);
        let DeclKind::Function(func) = &program.decls[0].kind else {
            panic!("expected a function declaration");
        };
        assert_eq!(func.name, "add");
        assert_eq!(func.params.len(), 2);
        assert_eq!(func.params[0].ty, Type::Int);
        assert_eq!(func.params[1].ty, Type::Int);
        assert_eq!(func.ret, Type::Int);
        assert_eq!(func.body.len(), 1);
        let StmtKind::Return(Some(value)) = &func.body[0].kind else {
            panic!("expected a return statement");
        };
        let ExprKind::Binary { op, lhs, rhs } = &value.kind else {
            panic!("expected a binary expression");
        };
        assert_eq!(*op, BinOp::Add);
        assert!(matches!(&lhs.kind, ExprKind::Identifier(n) if n == "a"));
        assert!(matches!(&rhs.kind, ExprKind::Identifier(n) if n == "b"));
    }

    #[test]
    fn option_sugar_desugars_at_parse_time() {
        let program = parse_ok("func f(x: int?) -> int { return 0; }");
        let DeclKind::Function(func) = &program.decls[0].kind else {
            panic!();
        };
        assert_eq!(func.params[0].ty, Type::option(Type::Int));
    }

    #[test]
    fn array_type_sugar() {
        let program = parse_ok("func f(xs: int[]) { }");
        let DeclKind::Function(func) = &program.decls[0].kind else {
            panic!();
        };
        assert_eq!(func.params[0].ty, Type::Array(Box::new(Type::Int)));
    }

    #[test]
    fn impl_becomes_method_with_implicit_this() {
        let program = parse_ok(
            "struct Point { int x; int y; }\n\
             impl Point::norm() -> int { return this.x; }",
        );
        let DeclKind::Function(func) = &program.decls[1].kind else {
            panic!("expected method function");
        };
        assert!(func.is_method);
        assert_eq!(func.receiver.as_deref(), Some("Point"));
        assert_eq!(func.params[0].name, "this");
        assert_eq!(func.params[0].ty, Type::named("Point"));
    }

    #[test]
    fn struct_fields_preserve_order() {
        let program = parse_ok("struct Point { int x; int y; }");
        let DeclKind::Struct { name, fields, .. } = &program.decls[0].kind else {
            panic!();
        };
        assert_eq!(name, "Point");
        assert_eq!(fields[0].name, "x");
        assert_eq!(fields[1].name, "y");
    }

    #[test]
    fn precedence_multiplication_binds_tighter() {
        let program = parse_ok("let x = 1 + 2 * 3;");
        let DeclKind::Stmt(stmt) = &program.decls[0].kind else {
            panic!();
        };
        let StmtKind::VarDecl { init: Some(e), .. } = &stmt.kind else {
            panic!();
        };
        let ExprKind::Binary { op, rhs, .. } = &e.kind else {
            panic!();
        };
        assert_eq!(*op, BinOp::Add);
        assert!(matches!(&rhs.kind, ExprKind::Binary { op: BinOp::Mul, .. }));
    }

    #[test]
    fn shift_binds_between_comparison_and_additive() {
        let program = parse_ok("let x = 1 < 2 << 3 + 4;");
        let DeclKind::Stmt(stmt) = &program.decls[0].kind else {
            panic!();
        };
        let StmtKind::VarDecl { init: Some(e), .. } = &stmt.kind else {
            panic!();
        };
        // Parsed as 1 < (2 << (3 + 4)).
        let ExprKind::Binary { op: BinOp::Lt, rhs, .. } = &e.kind else {
            panic!("expected `<` at the root");
        };
        assert!(matches!(&rhs.kind, ExprKind::Binary { op: BinOp::Shl, .. }));
    }

    #[test]
    fn struct_init_in_expression() {
        let program = parse_ok("let p = Point { 1, 2 };");
        let DeclKind::Stmt(stmt) = &program.decls[0].kind else {
            panic!();
        };
        let StmtKind::VarDecl { init: Some(e), .. } = &stmt.kind else {
            panic!();
        };
        let ExprKind::StructInit { name, fields } = &e.kind else {
            panic!("expected struct initializer");
        };
        assert_eq!(name, "Point");
        assert_eq!(fields.len(), 2);
    }

    #[test]
    fn for_range_and_for_iterable() {
        let program = parse_ok("for (i in 0..10) { } for (x in xs) { }");
        let DeclKind::Stmt(first) = &program.decls[0].kind else {
            panic!();
        };
        assert!(matches!(
            &first.kind,
            StmtKind::For {
                range: ForRange::Range { .. },
                ..
            }
        ));
        let DeclKind::Stmt(second) = &program.decls[1].kind else {
            panic!();
        };
        assert!(matches!(
            &second.kind,
            StmtKind::For {
                range: ForRange::Iterable(_),
                ..
            }
        ));
    }

    #[test]
    fn assignment_targets() {
        let program = parse_ok("x = 1; p.x = 2; xs[0] = 3;");
        for decl in &program.decls {
            let DeclKind::Stmt(stmt) = &decl.kind else {
                panic!();
            };
            assert!(matches!(stmt.kind, StmtKind::Assign { .. }));
        }
    }

    #[test]
    fn invalid_assignment_target_is_an_error() {
        let (_, sink) = parse_with_errors("1 = 2;");
        assert!(sink.has_errors());
        assert!(sink.diagnostics()[0].message.contains("assignment target"));
    }

    #[test]
    fn trailing_comma_rejected() {
        let (_, sink) = parse_with_errors("let x = f(1, 2,);");
        assert!(sink.has_errors());
        assert!(
            sink.diagnostics()
                .iter()
                .any(|d| d.message.contains("trailing comma"))
        );
    }

    #[test]
    fn link_block_with_variadic_and_module() {
        let program = parse_ok(
            "link \"c:m\" {\n\
               func printf(fmt: string, ...) -> int;\n\
               func sqrt(x: float) -> float;\n\
             }",
        );
        let DeclKind::Link(link) = &program.decls[0].kind else {
            panic!();
        };
        assert_eq!(link.adapter, "c");
        assert_eq!(link.module, "m");
        assert_eq!(link.functions.len(), 2);
        assert!(link.functions[0].variadic);
        assert!(!link.functions[1].variadic);
    }

    #[test]
    fn import_forms() {
        let program = parse_ok(
            "import \"a.flow\";\n\
             import \"b.flow\" as b;\n\
             import { f, g } from \"c.flow\";",
        );
        let DeclKind::Import(plain) = &program.decls[0].kind else {
            panic!();
        };
        assert!(plain.selected.is_none() && plain.alias.is_none());
        let DeclKind::Import(aliased) = &program.decls[1].kind else {
            panic!();
        };
        assert_eq!(aliased.alias.as_deref(), Some("b"));
        let DeclKind::Import(selected) = &program.decls[2].kind else {
            panic!();
        };
        assert_eq!(
            selected.selected.as_deref(),
            Some(&["f".to_string(), "g".to_string()][..])
        );
    }

    #[test]
    fn lambda_expression_and_function_type() {
        let program = parse_ok(
            "let f: int lambda[int] = int lambda[x: int] { return x; };",
        );
        let DeclKind::Stmt(stmt) = &program.decls[0].kind else {
            panic!();
        };
        let StmtKind::VarDecl {
            declared: Some(ty),
            init: Some(init),
            ..
        } = &stmt.kind
        else {
            panic!();
        };
        assert_eq!(
            *ty,
            Type::Function {
                ret: Box::new(Type::Int),
                params: vec![Type::Int],
            }
        );
        assert!(matches!(&init.kind, ExprKind::Lambda { .. }));
    }

    #[test]
    fn panic_mode_recovers_at_statement_boundary() {
        let (program, sink) = parse_with_errors(
            "func f() -> int { let = 3; return 1; }\n\
             func g() -> int { return 2; }",
        );
        assert!(sink.has_errors());
        // Both functions survive; recovery resumed at `return 1;`.
        assert_eq!(program.decls.len(), 2);
        let DeclKind::Function(f) = &program.decls[0].kind else {
            panic!();
        };
        assert!(
            f.body
                .iter()
                .any(|s| matches!(s.kind, StmtKind::Return(Some(_))))
        );
    }

    #[test]
    fn node_ids_are_unique() {
        let program = parse_ok("let x = 1 + 2 * 3 - f(4);");
        let mut seen = std::collections::HashSet::new();
        fn walk(expr: &Expr, seen: &mut std::collections::HashSet<u32>) {
            assert!(seen.insert(expr.id.0), "duplicate node id");
            match &expr.kind {
                ExprKind::Binary { lhs, rhs, .. } => {
                    walk(lhs, seen);
                    walk(rhs, seen);
                }
                ExprKind::Unary { operand, .. } => walk(operand, seen),
                ExprKind::Call { callee, args } => {
                    walk(callee, seen);
                    args.iter().for_each(|a| walk(a, seen));
                }
                _ => {}
            }
        }
        let DeclKind::Stmt(stmt) = &program.decls[0].kind else {
            panic!();
        };
        let StmtKind::VarDecl { init: Some(e), .. } = &stmt.kind else {
            panic!();
        };
        walk(e, &mut seen);
        assert!(seen.len() >= 6);
    }
}
