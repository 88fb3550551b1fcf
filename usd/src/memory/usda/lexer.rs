//! Tokenizer for the `.usda` text format.

use std::fmt;

/// Kind and payload of a token.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// Keywords, type names and property names. Namespaced names keep their
    /// `:` and `.` separators (`primvars:st`, `points.timeSamples`).
    Ident(String),
    /// Quoted string with escapes processed.
    String(String),
    /// `@path@` or `@@@path@@@`
    Asset(String),
    /// `<path>`
    Path(String),
    Int(i64),
    Double(f64),
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Equals,
    Comma,
    Colon,
    Semicolon,
    Eof,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ident(s) => write!(f, "'{s}'"),
            Self::String(s) => write!(f, "string \"{s}\""),
            Self::Asset(s) => write!(f, "asset @{s}@"),
            Self::Path(s) => write!(f, "path <{s}>"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::LParen => f.write_str("'('"),
            Self::RParen => f.write_str("')'"),
            Self::LBracket => f.write_str("'['"),
            Self::RBracket => f.write_str("']'"),
            Self::LBrace => f.write_str("'{'"),
            Self::RBrace => f.write_str("'}'"),
            Self::Equals => f.write_str("'='"),
            Self::Comma => f.write_str("','"),
            Self::Colon => f.write_str("':'"),
            Self::Semicolon => f.write_str("';'"),
            Self::Eof => f.write_str("end of file"),
        }
    }
}

/// A token with its 1-based source position.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
    pub column: usize,
}

/// A lexical error with its 1-based source position.
#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    pub message: String,
    pub line: usize,
    pub column: usize,
}

/// Byte cursor over the source text.
pub struct Lexer<'a> {
    source: &'a [u8],
    position: usize,
    line: usize,
    column: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source: source.as_bytes(),
            position: 0,
            line: 1,
            column: 1,
        }
    }

    /// Tokenizes the whole input. The last token is always [`TokenKind::Eof`].
    pub fn tokenize(mut self) -> Result<Vec<Token>, LexError> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            let done = token.kind == TokenKind::Eof;
            tokens.push(token);
            if done {
                return Ok(tokens);
            }
        }
    }

    fn peek(&self) -> Option<u8> {
        self.source.get(self.position).copied()
    }

    fn peek_ahead(&self, n: usize) -> Option<u8> {
        self.source.get(self.position + n).copied()
    }

    fn starts_with(&self, pattern: &[u8]) -> bool {
        self.source[self.position..].starts_with(pattern)
    }

    fn advance(&mut self) -> Option<u8> {
        let ch = self.peek()?;
        self.position += 1;
        if ch == b'\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(ch)
    }

    fn error(&self, line: usize, column: usize, message: impl Into<String>) -> LexError {
        LexError {
            message: message.into(),
            line,
            column,
        }
    }

    /// Skips whitespace, `#` line comments and `//`, `/* */` comments.
    fn skip_trivia(&mut self) {
        while let Some(ch) = self.peek() {
            if ch.is_ascii_whitespace() {
                self.advance();
            } else if ch == b'#' || self.starts_with(b"//") {
                while let Some(ch) = self.advance() {
                    if ch == b'\n' {
                        break;
                    }
                }
            } else if self.starts_with(b"/*") {
                self.advance();
                self.advance();
                while self.peek().is_some() && !self.starts_with(b"*/") {
                    self.advance();
                }
                self.advance();
                self.advance();
            } else {
                break;
            }
        }
    }

    fn next_token(&mut self) -> Result<Token, LexError> {
        self.skip_trivia();
        let (line, column) = (self.line, self.column);
        let token = |kind| Token { kind, line, column };

        let Some(ch) = self.peek() else {
            return Ok(token(TokenKind::Eof));
        };

        let punct = match ch {
            b'(' => Some(TokenKind::LParen),
            b')' => Some(TokenKind::RParen),
            b'[' => Some(TokenKind::LBracket),
            b']' => Some(TokenKind::RBracket),
            b'{' => Some(TokenKind::LBrace),
            b'}' => Some(TokenKind::RBrace),
            b'=' => Some(TokenKind::Equals),
            b',' => Some(TokenKind::Comma),
            b':' => Some(TokenKind::Colon),
            b';' => Some(TokenKind::Semicolon),
            _ => None,
        };
        if let Some(kind) = punct {
            self.advance();
            return Ok(token(kind));
        }

        let kind = match ch {
            b'"' | b'\'' => TokenKind::String(self.string(line, column)?),
            b'@' => TokenKind::Asset(self.asset(line, column)?),
            b'<' => TokenKind::Path(self.path(line, column)?),
            b'-' | b'+' | b'.' | b'0'..=b'9' => self.number(line, column)?,
            c if c.is_ascii_alphabetic() || c == b'_' || c == b'!' => {
                TokenKind::Ident(self.ident())
            }
            c => {
                return Err(self.error(
                    line,
                    column,
                    format!("unexpected character '{}'", c as char),
                ));
            }
        };
        Ok(token(kind))
    }

    fn ident(&mut self) -> String {
        let start = self.position;
        // `!resetXformStack!`-style markers are lexed as a single identifier
        if self.peek() == Some(b'!') {
            self.advance();
        }
        while let Some(ch) = self.peek() {
            if ch.is_ascii_alphanumeric() || matches!(ch, b'_' | b':' | b'.' | b'!') {
                self.advance();
            } else {
                break;
            }
        }
        // a trailing ':' belongs to the punctuation, not the name
        while self.position > start + 1 && self.source[self.position - 1] == b':' {
            self.position -= 1;
            self.column -= 1;
        }
        String::from_utf8_lossy(&self.source[start..self.position]).into_owned()
    }

    fn number(&mut self, line: usize, column: usize) -> Result<TokenKind, LexError> {
        let start = self.position;
        if matches!(self.peek(), Some(b'-' | b'+')) {
            self.advance();
        }
        // signed special values
        for special in ["inf", "nan"] {
            if self.starts_with(special.as_bytes()) {
                for _ in 0..special.len() {
                    self.advance();
                }
                let negative = self.source[start] == b'-';
                let value = match (special, negative) {
                    ("inf", false) => f64::INFINITY,
                    ("inf", true) => f64::NEG_INFINITY,
                    _ => f64::NAN,
                };
                return Ok(TokenKind::Double(value));
            }
        }

        let mut is_float = false;
        while let Some(ch) = self.peek() {
            match ch {
                b'0'..=b'9' => {}
                b'.' => is_float = true,
                b'e' | b'E' => {
                    is_float = true;
                    if matches!(self.peek_ahead(1), Some(b'-' | b'+')) {
                        self.advance();
                    }
                }
                _ => break,
            }
            self.advance();
        }

        let text = std::str::from_utf8(&self.source[start..self.position]).unwrap_or_default();
        let parsed = if is_float {
            text.parse::<f64>().map(TokenKind::Double).ok()
        } else {
            text.parse::<i64>()
                .map(TokenKind::Int)
                .or_else(|_| text.parse::<f64>().map(TokenKind::Double))
                .ok()
        };
        parsed.ok_or_else(|| self.error(line, column, format!("invalid number '{text}'")))
    }

    fn string(&mut self, line: usize, column: usize) -> Result<String, LexError> {
        let quote = self.peek().unwrap_or(b'"');
        let triple = [quote, quote, quote];
        let is_triple = self.starts_with(&triple);
        let delimiter_len = if is_triple { 3 } else { 1 };
        for _ in 0..delimiter_len {
            self.advance();
        }

        let mut out = Vec::new();
        loop {
            if is_triple && self.starts_with(&triple) {
                for _ in 0..3 {
                    self.advance();
                }
                break;
            }
            match self.advance() {
                None => return Err(self.error(line, column, "unterminated string")),
                Some(b'\n') if !is_triple => {
                    return Err(self.error(line, column, "newline in string"));
                }
                Some(c) if c == quote && !is_triple => break,
                Some(b'\\') => match self.advance() {
                    Some(b'n') => out.push(b'\n'),
                    Some(b't') => out.push(b'\t'),
                    Some(b'r') => out.push(b'\r'),
                    Some(c) => out.push(c),
                    None => return Err(self.error(line, column, "unterminated string")),
                },
                Some(c) => out.push(c),
            }
        }
        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    fn asset(&mut self, line: usize, column: usize) -> Result<String, LexError> {
        let delimiter: &[u8] = if self.starts_with(b"@@@") { b"@@@" } else { b"@" };
        for _ in 0..delimiter.len() {
            self.advance();
        }
        let start = self.position;
        while !self.starts_with(delimiter) {
            match self.advance() {
                None | Some(b'\n') => return Err(self.error(line, column, "unterminated asset path")),
                Some(_) => {}
            }
        }
        let text = String::from_utf8_lossy(&self.source[start..self.position]).into_owned();
        for _ in 0..delimiter.len() {
            self.advance();
        }
        Ok(text)
    }

    fn path(&mut self, line: usize, column: usize) -> Result<String, LexError> {
        self.advance();
        let start = self.position;
        loop {
            match self.advance() {
                None | Some(b'\n') => return Err(self.error(line, column, "unterminated path")),
                Some(b'>') => break,
                Some(_) => {}
            }
        }
        Ok(String::from_utf8_lossy(&self.source[start..self.position - 1]).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        Lexer::new(source)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    fn ident(s: &str) -> TokenKind {
        TokenKind::Ident(s.to_string())
    }

    #[test]
    fn attribute_statement() {
        assert_eq!(
            kinds("point3f[] points = [(0, -1.5, 2e1)]"),
            vec![
                ident("point3f"),
                TokenKind::LBracket,
                TokenKind::RBracket,
                ident("points"),
                TokenKind::Equals,
                TokenKind::LBracket,
                TokenKind::LParen,
                TokenKind::Int(0),
                TokenKind::Comma,
                TokenKind::Double(-1.5),
                TokenKind::Comma,
                TokenKind::Double(20.0),
                TokenKind::RParen,
                TokenKind::RBracket,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn namespaced_names_and_suffixes() {
        assert_eq!(
            kinds("texCoord2f[] primvars:st.timeSamples = { 1: [] }"),
            vec![
                ident("texCoord2f"),
                TokenKind::LBracket,
                TokenKind::RBracket,
                ident("primvars:st.timeSamples"),
                TokenKind::Equals,
                TokenKind::LBrace,
                TokenKind::Int(1),
                TokenKind::Colon,
                TokenKind::LBracket,
                TokenKind::RBracket,
                TokenKind::RBrace,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn strings_assets_and_paths() {
        assert_eq!(
            kinds(r#""a\"b" @./tex.png@ @@@odd@name@@@ </World/Mesh.points> """multi
line""""#),
            vec![
                TokenKind::String("a\"b".into()),
                TokenKind::Asset("./tex.png".into()),
                TokenKind::Asset("odd@name".into()),
                TokenKind::Path("/World/Mesh.points".into()),
                TokenKind::String("multi\nline".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn comments_are_skipped() {
        assert_eq!(
            kinds("#usda 1.0\n// note\n/* block */ def # trailing\n"),
            vec![ident("def"), TokenKind::Eof]
        );
    }

    #[test]
    fn reset_marker_is_one_identifier() {
        assert_eq!(kinds("!resetXformStack!"), vec![ident("!resetXformStack!"), TokenKind::Eof]);
    }

    #[test]
    fn positions_are_one_based() {
        let tokens = Lexer::new("def\n  Mesh").tokenize().unwrap();
        assert_eq!((tokens[1].line, tokens[1].column), (2, 3));
    }

    #[test]
    fn errors_carry_position() {
        let err = Lexer::new("def \"open").tokenize().unwrap_err();
        assert_eq!((err.line, err.column), (1, 5));
        assert!(Lexer::new("$").tokenize().is_err());
    }
}
