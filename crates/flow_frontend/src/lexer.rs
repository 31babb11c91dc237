use crate::diagnostics::{Category, DiagnosticSink};
use crate::source::{FileId, Loc};
use crate::token::{Token, TokenKind};

/// Hand-written scanner over a UTF-8 source buffer.
///
/// Produces tokens on demand; the whole stream dies with the parser call.
/// The scanner never aborts: characters that match no rule become `Invalid`
/// tokens (with a descriptive lexeme) and scanning continues.
pub struct Scanner<'src> {
    src: &'src str,
    file: FileId,
    pos: usize,
    line: u32,
    column: u32,
}

impl<'src> Scanner<'src> {
    pub fn new(src: &'src str, file: FileId) -> Self {
        Self {
            src,
            file,
            pos: 0,
            line: 1,
            column: 1,
        }
    }

    /// Scan the entire buffer, reporting `Lex` diagnostics for invalid
    /// tokens. The returned stream always ends with an `Eof` token.
    pub fn tokenize(mut self, sink: &mut DiagnosticSink) -> Vec<Token> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token();
            let done = token.kind == TokenKind::Eof;
            if token.kind == TokenKind::Invalid {
                sink.error(Category::Lex, token.lexeme.clone(), token.loc);
            }
            tokens.push(token);
            if done {
                break;
            }
        }
        tokens
    }

    fn is_at_end(&self) -> bool {
        self.pos >= self.src.len()
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn peek_next(&self) -> Option<char> {
        let mut chars = self.src[self.pos..].chars();
        chars.next();
        chars.next()
    }

    fn advance(&mut self) -> char {
        let c = self.peek().unwrap_or('\0');
        self.pos += c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        c
    }

    fn match_char(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn skip_trivia(&mut self) {
        while let Some(c) = self.peek() {
            match c {
                ' ' | '\t' | '\r' | '\n' => {
                    self.advance();
                }
                '/' if self.peek_next() == Some('/') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                '/' if self.peek_next() == Some('*') => {
                    self.advance();
                    self.advance();
                    // Block comments do not nest.
                    while !self.is_at_end() {
                        if self.peek() == Some('*') && self.peek_next() == Some('/') {
                            self.advance();
                            self.advance();
                            break;
                        }
                        self.advance();
                    }
                }
                _ => break,
            }
        }
    }

    /// Next token. Whitespace and comments are skipped first; the token's
    /// location points at its first character.
    pub fn next_token(&mut self) -> Token {
        self.skip_trivia();

        let loc = Loc::new(self.file, self.line, self.column);
        if self.is_at_end() {
            return Token::new(TokenKind::Eof, "", loc);
        }

        let start = self.pos;
        let c = self.advance();

        if c.is_ascii_digit() {
            return self.scan_number(start, loc);
        }
        if c.is_ascii_alphabetic() || c == '_' {
            return self.scan_identifier(start, loc);
        }
        if c == '"' {
            return self.scan_string(loc);
        }

        let kind = match c {
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            ';' => TokenKind::Semicolon,
            ',' => TokenKind::Comma,
            '?' => TokenKind::Question,
            '%' => TokenKind::Percent,
            '#' => TokenKind::Hash,
            '+' => TokenKind::Plus,
            '*' => TokenKind::Star,
            '/' => TokenKind::Slash,
            '^' => TokenKind::Caret,
            '~' => TokenKind::Tilde,
            ':' => {
                if self.match_char(':') {
                    TokenKind::ColonColon
                } else {
                    TokenKind::Colon
                }
            }
            '&' => {
                if self.match_char('&') {
                    TokenKind::AndAnd
                } else {
                    TokenKind::Amp
                }
            }
            '|' => {
                if self.match_char('|') {
                    TokenKind::OrOr
                } else {
                    TokenKind::Pipe
                }
            }
            '!' => {
                if self.match_char('=') {
                    TokenKind::Ne
                } else {
                    TokenKind::Not
                }
            }
            '=' => {
                if self.match_char('=') {
                    TokenKind::Eq
                } else {
                    TokenKind::Assign
                }
            }
            '<' => {
                if self.match_char('=') {
                    TokenKind::Le
                } else if self.match_char('<') {
                    TokenKind::Shl
                } else {
                    TokenKind::Lt
                }
            }
            '>' => {
                if self.match_char('=') {
                    TokenKind::Ge
                } else if self.match_char('>') {
                    TokenKind::Shr
                } else {
                    TokenKind::Gt
                }
            }
            '.' => {
                if self.match_char('.') {
                    if self.match_char('.') {
                        TokenKind::Ellipsis
                    } else {
                        TokenKind::DotDot
                    }
                } else {
                    TokenKind::Dot
                }
            }
            '-' => {
                if self.match_char('>') {
                    TokenKind::Arrow
                } else {
                    TokenKind::Minus
                }
            }
            other => {
                return Token::new(
                    TokenKind::Invalid,
                    format!("unexpected character `{other}`"),
                    loc,
                );
            }
        };

        Token::new(kind, &self.src[start..self.pos], loc)
    }

    fn scan_number(&mut self, start: usize, loc: Loc) -> Token {
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
        }

        // A fraction only when a digit follows the dot; `1..3` stays a range.
        let mut kind = TokenKind::IntLiteral;
        if self.peek() == Some('.') && self.peek_next().is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.advance();
            }
            kind = TokenKind::FloatLiteral;
        }

        Token::new(kind, &self.src[start..self.pos], loc)
    }

    fn scan_identifier(&mut self, start: usize, loc: Loc) -> Token {
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            self.advance();
        }
        let text = &self.src[start..self.pos];
        Token::new(TokenKind::from_identifier(text), text, loc)
    }

    /// Scan a string literal. The produced lexeme is the decoded value:
    /// escape sequences `\n \t \r \\ \" \0` are processed here, and an
    /// unrecognized escape is kept verbatim.
    fn scan_string(&mut self, loc: Loc) -> Token {
        let mut value = String::new();

        while let Some(c) = self.peek() {
            if c == '"' {
                break;
            }
            if c == '\\' {
                self.advance();
                if let Some(escaped) = self.peek() {
                    self.advance();
                    match escaped {
                        'n' => value.push('\n'),
                        't' => value.push('\t'),
                        'r' => value.push('\r'),
                        '\\' => value.push('\\'),
                        '"' => value.push('"'),
                        '0' => value.push('\0'),
                        other => {
                            value.push('\\');
                            value.push(other);
                        }
                    }
                }
            } else {
                value.push(self.advance());
            }
        }

        if self.is_at_end() {
            return Token::new(TokenKind::Invalid, "unterminated string literal", loc);
        }

        self.advance(); // closing quote
        Token::new(TokenKind::StringLiteral, value, loc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan(src: &str) -> (Vec<Token>, DiagnosticSink) {
        let mut sink = DiagnosticSink::new();
        let tokens = Scanner::new(src, FileId(0)).tokenize(&mut sink);
        (tokens, sink)
    }

    fn kinds(src: &str) -> Vec<TokenKind> {
        scan(src).0.into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn keywords_and_identifiers() {
        assert_eq!(
            kinds("let mut x func impl this lambda"),
            vec![
                TokenKind::KwLet,
                TokenKind::KwMut,
                TokenKind::Identifier,
                TokenKind::KwFunc,
                TokenKind::KwImpl,
                TokenKind::KwThis,
                TokenKind::KwLambda,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn greedy_multi_char_operators() {
        assert_eq!(
            kinds("== != <= >= && || -> .. ... << >> ::"),
            vec![
                TokenKind::Eq,
                TokenKind::Ne,
                TokenKind::Le,
                TokenKind::Ge,
                TokenKind::AndAnd,
                TokenKind::OrOr,
                TokenKind::Arrow,
                TokenKind::DotDot,
                TokenKind::Ellipsis,
                TokenKind::Shl,
                TokenKind::Shr,
                TokenKind::ColonColon,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn numbers_and_ranges() {
        let (tokens, _) = scan("123 3.14 1..5");
        assert_eq!(tokens[0].kind, TokenKind::IntLiteral);
        assert_eq!(tokens[0].lexeme, "123");
        assert_eq!(tokens[1].kind, TokenKind::FloatLiteral);
        assert_eq!(tokens[1].lexeme, "3.14");
        // `1..5` must not scan `1.` as a float.
        assert_eq!(tokens[2].kind, TokenKind::IntLiteral);
        assert_eq!(tokens[3].kind, TokenKind::DotDot);
        assert_eq!(tokens[4].kind, TokenKind::IntLiteral);
    }

    #[test]
    fn string_escapes_are_decoded() {
        let (tokens, sink) = scan(r#""a\tb\n\"q\"""#);
        assert!(!sink.has_errors());
        assert_eq!(tokens[0].kind, TokenKind::StringLiteral);
        assert_eq!(tokens[0].lexeme, "a\tb\n\"q\"");
    }

    #[test]
    fn unterminated_string_is_invalid() {
        let (tokens, sink) = scan("\"oops");
        assert_eq!(tokens[0].kind, TokenKind::Invalid);
        assert!(sink.has_errors());
        assert_eq!(sink.diagnostics()[0].category, Category::Lex);
    }

    #[test]
    fn invalid_character_reported_and_scanning_continues() {
        let (tokens, sink) = scan("let @ x");
        assert_eq!(tokens[0].kind, TokenKind::KwLet);
        assert_eq!(tokens[1].kind, TokenKind::Invalid);
        assert_eq!(tokens[2].kind, TokenKind::Identifier);
        assert_eq!(sink.error_count(), 1);
    }

    #[test]
    fn comments_are_skipped() {
        assert_eq!(
            kinds("a // line\nb /* block\nstill */ c"),
            vec![
                TokenKind::Identifier,
                TokenKind::Identifier,
                TokenKind::Identifier,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn locations_are_one_based_and_track_newlines() {
        let (tokens, _) = scan("let x;\n  return;");
        assert_eq!((tokens[0].loc.line, tokens[0].loc.column), (1, 1));
        assert_eq!((tokens[1].loc.line, tokens[1].loc.column), (1, 5));
        assert_eq!((tokens[3].loc.line, tokens[3].loc.column), (2, 3));
    }

    // The source slice at a token's location, of the lexeme's length,
    // equals the lexeme (strings excepted: their lexeme is decoded).
    #[test]
    fn lexeme_round_trip() {
        let src = "func add(a: int) -> int {\n  return a + 41;\n}";
        let (tokens, _) = scan(src);
        let lines: Vec<&str> = src.split('\n').collect();
        for token in &tokens {
            if token.kind == TokenKind::Eof {
                continue;
            }
            let line = lines[token.loc.line as usize - 1];
            let col = token.loc.column as usize - 1;
            assert_eq!(
                &line[col..col + token.lexeme.len()],
                token.lexeme,
                "round-trip failed for {token}"
            );
        }
    }

    #[test]
    fn bool_literals_scan_as_literals() {
        let (tokens, _) = scan("true false");
        assert_eq!(tokens[0].kind, TokenKind::BoolLiteral);
        assert_eq!(tokens[1].kind, TokenKind::BoolLiteral);
        assert_eq!(tokens[0].lexeme, "true");
    }
}
