//! Recursive-descent parser for the `.usda` subset.

use crate::memory::layer::{
    AttributeSpec, DictEntry, Layer, MAX_NESTING_DEPTH, PrimSpec, Reference, RelationshipSpec,
    Specifier, Value,
};

use super::lexer::{Lexer, Token, TokenKind};

/// A parse error with its 1-based source position.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
    pub line: usize,
    pub column: usize,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}: {}", self.line, self.column, self.message)
    }
}

impl std::error::Error for ParseError {}

type Result<T> = std::result::Result<T, ParseError>;

/// Parses a complete `.usda` document.
pub fn parse_layer(source: &str) -> Result<Layer> {
    if !source.trim_start().starts_with("#usda") {
        return Err(ParseError {
            message: "missing '#usda' header".into(),
            line: 1,
            column: 1,
        });
    }
    let tokens = Lexer::new(source).tokenize().map_err(|e| ParseError {
        message: e.message,
        line: e.line,
        column: e.column,
    })?;
    Parser {
        tokens,
        pos: 0,
        depth: 0,
    }
    .layer()
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    /// Open prims and value groups, combined.
    depth: usize,
}

const PROPERTY_QUALIFIERS: [&str; 6] = ["custom", "uniform", "varying", "config", "prepend", "append"];

impl Parser {
    fn peek(&self) -> &TokenKind {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].kind
    }

    fn peek_ahead(&self, n: usize) -> &TokenKind {
        &self.tokens[(self.pos + n).min(self.tokens.len() - 1)].kind
    }

    fn next(&mut self) -> TokenKind {
        let kind = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        kind
    }

    fn error_here(&self, message: impl Into<String>) -> ParseError {
        let token = &self.tokens[self.pos.min(self.tokens.len() - 1)];
        ParseError {
            message: message.into(),
            line: token.line,
            column: token.column,
        }
    }

    fn unexpected(&self, expected: &str) -> ParseError {
        self.error_here(format!("expected {expected}, found {}", self.peek()))
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.peek() == kind {
            self.next();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<()> {
        if self.eat(&kind) {
            Ok(())
        } else {
            Err(self.unexpected(&kind.to_string()))
        }
    }

    fn is_ident(&self, word: &str) -> bool {
        matches!(self.peek(), TokenKind::Ident(s) if s == word)
    }

    fn ident(&mut self) -> Result<String> {
        if let TokenKind::Ident(s) = self.peek() {
            let s = s.clone();
            self.next();
            Ok(s)
        } else {
            Err(self.unexpected("identifier"))
        }
    }

    fn string(&mut self) -> Result<String> {
        if let TokenKind::String(s) = self.peek() {
            let s = s.clone();
            self.next();
            Ok(s)
        } else {
            Err(self.unexpected("string"))
        }
    }

    fn path(&mut self) -> Result<String> {
        if let TokenKind::Path(s) = self.peek() {
            let s = s.clone();
            self.next();
            Ok(s)
        } else {
            Err(self.unexpected("path"))
        }
    }

    /// Runs `f` one nesting level deeper.
    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        if self.depth >= MAX_NESTING_DEPTH {
            return Err(self.error_here(format!(
                "nesting deeper than {MAX_NESTING_DEPTH} levels"
            )));
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    fn skip_separators(&mut self) {
        while self.eat(&TokenKind::Semicolon) {}
    }

    // Layer and prims

    fn layer(&mut self) -> Result<Layer> {
        let mut layer = Layer::default();
        if self.eat(&TokenKind::LParen) {
            while !self.eat(&TokenKind::RParen) {
                if let TokenKind::String(_) = self.peek() {
                    let doc = self.string()?;
                    layer.metadata.push(("doc".into(), Value::String(doc)));
                } else {
                    let (key, value) = self.metadata_entry()?;
                    layer.metadata.push((key, value));
                }
                self.skip_separators();
            }
        }

        while *self.peek() != TokenKind::Eof {
            let prim = self.nested(Self::prim)?;
            merge_root(&mut layer.root_prims, prim);
        }
        Ok(layer)
    }

    fn specifier(&mut self) -> Result<Specifier> {
        let specifier = match self.peek() {
            TokenKind::Ident(s) if s == "def" => Specifier::Def,
            TokenKind::Ident(s) if s == "over" => Specifier::Over,
            TokenKind::Ident(s) if s == "class" => Specifier::Class,
            _ => return Err(self.unexpected("'def', 'over' or 'class'")),
        };
        self.next();
        Ok(specifier)
    }

    fn prim(&mut self) -> Result<PrimSpec> {
        let specifier = self.specifier()?;
        let type_name = match self.peek() {
            TokenKind::Ident(_) => self.ident()?,
            _ => String::new(),
        };
        let name = self.string()?;
        if name.is_empty() || name.contains('/') {
            return Err(self.error_here(format!("invalid prim name '{name}'")));
        }
        let mut prim = PrimSpec::new(specifier, type_name, name);

        if self.eat(&TokenKind::LParen) {
            self.prim_metadata(&mut prim)?;
        }

        self.expect(TokenKind::LBrace)?;
        loop {
            self.skip_separators();
            if self.eat(&TokenKind::RBrace) {
                break;
            }
            if self.is_ident("def") || self.is_ident("over") || self.is_ident("class") {
                let child = self.nested(Self::prim)?;
                merge_root(&mut prim.children, child);
            } else {
                self.property(&mut prim)?;
            }
        }
        Ok(prim)
    }

    fn prim_metadata(&mut self, prim: &mut PrimSpec) -> Result<()> {
        loop {
            self.skip_separators();
            if self.eat(&TokenKind::RParen) {
                return Ok(());
            }
            if let TokenKind::String(_) = self.peek() {
                let doc = self.string()?;
                prim.metadata.push(("doc".into(), Value::String(doc)));
                continue;
            }

            let mut list_op = None;
            if ["prepend", "append", "add", "delete", "reorder"]
                .iter()
                .any(|op| self.is_ident(op))
            {
                list_op = Some(self.ident()?);
            }
            let key = self.ident()?;
            self.expect(TokenKind::Equals)?;

            match key.as_str() {
                "references" | "payload" => {
                    let refs = self.references()?;
                    if list_op.as_deref() != Some("delete") {
                        prim.references.extend(refs);
                    }
                }
                "active" => {
                    let not_bool = self.error_here("'active' must be a boolean");
                    prim.active = Some(self.value()?.as_bool().ok_or(not_bool)?);
                }
                _ => {
                    let value = self.value()?;
                    let key = match list_op {
                        Some(op) => format!("{op} {key}"),
                        None => key,
                    };
                    prim.metadata.push((key, value));
                }
            }
        }
    }

    fn references(&mut self) -> Result<Vec<Reference>> {
        if self.is_ident("None") {
            self.next();
            return Ok(Vec::new());
        }
        if !self.eat(&TokenKind::LBracket) {
            return Ok(vec![self.reference()?]);
        }
        let mut refs = Vec::new();
        while !self.eat(&TokenKind::RBracket) {
            refs.push(self.reference()?);
            if !self.eat(&TokenKind::Comma) {
                self.expect(TokenKind::RBracket)?;
                break;
            }
        }
        Ok(refs)
    }

    fn reference(&mut self) -> Result<Reference> {
        let asset = match self.peek() {
            TokenKind::Asset(s) => {
                let s = s.clone();
                self.next();
                s
            }
            TokenKind::Path(_) => String::new(),
            _ => return Err(self.unexpected("asset or path")),
        };
        let prim_path = match self.peek() {
            TokenKind::Path(_) => Some(self.path()?),
            _ => None,
        };
        // reference metadata such as layer offsets is not modelled
        if self.eat(&TokenKind::LParen) {
            self.skip_group(TokenKind::LParen, TokenKind::RParen)?;
        }
        Ok(Reference { asset, prim_path })
    }

    /// Skips to the close of a group whose opening token was just consumed.
    fn skip_group(&mut self, open: TokenKind, close: TokenKind) -> Result<()> {
        let mut depth = 1;
        while depth > 0 {
            match self.next() {
                TokenKind::Eof => return Err(self.unexpected(&close.to_string())),
                k if k == open => depth += 1,
                k if k == close => depth -= 1,
                _ => {}
            }
        }
        Ok(())
    }

    // Properties

    fn property(&mut self, prim: &mut PrimSpec) -> Result<()> {
        let mut uniform = false;
        let mut custom = false;
        while PROPERTY_QUALIFIERS.iter().any(|q| self.is_ident(q)) {
            match self.ident()?.as_str() {
                "uniform" => uniform = true,
                "custom" => custom = true,
                _ => {}
            }
        }

        if self.is_ident("rel") {
            self.next();
            let name = self.ident()?;
            let mut targets = Vec::new();
            if self.eat(&TokenKind::Equals) {
                targets = self.path_list()?;
            }
            if self.eat(&TokenKind::LParen) {
                self.skip_group(TokenKind::LParen, TokenKind::RParen)?;
            }
            prim.add_relationship(RelationshipSpec {
                name,
                uniform,
                custom,
                targets,
            });
            return Ok(());
        }

        let mut type_name = self.ident()?;
        if *self.peek() == TokenKind::LBracket && *self.peek_ahead(1) == TokenKind::RBracket {
            self.next();
            self.next();
            type_name.push_str("[]");
        }
        let full_name = self.ident()?;

        let (name, suffix) = match full_name.rsplit_once('.') {
            Some((name, suffix @ ("connect" | "timeSamples"))) => (name.to_string(), Some(suffix)),
            _ => (full_name.clone(), None),
        };
        let mut attribute = AttributeSpec::new(name, type_name);
        attribute.uniform = uniform;
        attribute.custom = custom;

        if self.eat(&TokenKind::Equals) {
            match suffix {
                Some("connect") => attribute.connections = self.path_list()?,
                Some(_) => self.time_samples(&mut attribute)?,
                None => {
                    let value = self.value()?;
                    attribute.default = Some(value);
                }
            }
        }

        if self.eat(&TokenKind::LParen) {
            loop {
                self.skip_separators();
                if self.eat(&TokenKind::RParen) {
                    break;
                }
                if let TokenKind::String(_) = self.peek() {
                    let doc = self.string()?;
                    attribute.metadata.push(("doc".into(), Value::String(doc)));
                    continue;
                }
                let (key, value) = self.metadata_entry()?;
                attribute.metadata.push((key, value));
            }
        }

        prim.add_attribute(attribute);
        Ok(())
    }

    /// `</a>` or `[</a>, </b>]` or `None`.
    fn path_list(&mut self) -> Result<Vec<String>> {
        if self.is_ident("None") {
            self.next();
            return Ok(Vec::new());
        }
        if !self.eat(&TokenKind::LBracket) {
            return Ok(vec![self.path()?]);
        }
        let mut paths = Vec::new();
        while !self.eat(&TokenKind::RBracket) {
            paths.push(self.path()?);
            if !self.eat(&TokenKind::Comma) {
                self.expect(TokenKind::RBracket)?;
                break;
            }
        }
        Ok(paths)
    }

    fn time_samples(&mut self, attribute: &mut AttributeSpec) -> Result<()> {
        self.expect(TokenKind::LBrace)?;
        while !self.eat(&TokenKind::RBrace) {
            let time = match *self.peek() {
                TokenKind::Int(v) => v as f64,
                TokenKind::Double(v) => v,
                _ => return Err(self.unexpected("time code")),
            };
            self.next();
            self.expect(TokenKind::Colon)?;
            let value = self.value()?;
            attribute.set_sample(time, value);
            if !self.eat(&TokenKind::Comma) {
                self.expect(TokenKind::RBrace)?;
                break;
            }
        }
        Ok(())
    }

    // Values

    fn metadata_entry(&mut self) -> Result<(String, Value)> {
        let key = self.ident()?;
        self.expect(TokenKind::Equals)?;
        Ok((key, self.value()?))
    }

    fn value(&mut self) -> Result<Value> {
        if matches!(
            self.peek(),
            TokenKind::Eof
                | TokenKind::RParen
                | TokenKind::RBracket
                | TokenKind::RBrace
                | TokenKind::Equals
                | TokenKind::Comma
                | TokenKind::Colon
                | TokenKind::Semicolon
        ) {
            return Err(self.unexpected("value"));
        }
        let value = match self.next() {
            TokenKind::Int(v) => Value::Int(v),
            TokenKind::Double(v) => Value::Double(v),
            TokenKind::String(s) => Value::String(s),
            TokenKind::Asset(s) => Value::Asset(s),
            TokenKind::Path(s) => Value::Path(s),
            TokenKind::Ident(s) => match s.as_str() {
                "true" => Value::Bool(true),
                "false" => Value::Bool(false),
                "None" => Value::Blocked,
                "inf" => Value::Double(f64::INFINITY),
                "nan" => Value::Double(f64::NAN),
                _ => Value::String(s),
            },
            TokenKind::LParen => Value::Tuple(self.nested(|p| p.sequence(TokenKind::RParen))?),
            TokenKind::LBracket => Value::Array(self.nested(|p| p.sequence(TokenKind::RBracket))?),
            TokenKind::LBrace => Value::Dictionary(self.nested(Self::dictionary)?),
            _ => return Err(self.unexpected("value")),
        };
        Ok(value)
    }

    /// Comma-separated values up to `close`; a trailing comma is allowed.
    fn sequence(&mut self, close: TokenKind) -> Result<Vec<Value>> {
        let mut items = Vec::new();
        while !self.eat(&close) {
            items.push(self.value()?);
            if !self.eat(&TokenKind::Comma) {
                self.expect(close)?;
                break;
            }
        }
        Ok(items)
    }

    fn dictionary(&mut self) -> Result<Vec<DictEntry>> {
        let mut entries = Vec::new();
        loop {
            self.skip_separators();
            if self.eat(&TokenKind::RBrace) {
                return Ok(entries);
            }
            let mut type_name = self.ident()?;
            if *self.peek() == TokenKind::LBracket && *self.peek_ahead(1) == TokenKind::RBracket {
                self.next();
                self.next();
                type_name.push_str("[]");
            }
            let name = match self.peek() {
                TokenKind::String(_) => self.string()?,
                _ => self.ident()?,
            };
            self.expect(TokenKind::Equals)?;
            let value = self.value()?;
            entries.push(DictEntry {
                type_name,
                name,
                value,
            });
        }
    }
}

/// Adds a prim spec to a sibling list. A second spec with the same name is
/// layered over the first within the same layer.
fn merge_root(siblings: &mut Vec<PrimSpec>, prim: PrimSpec) {
    match siblings.iter_mut().find(|p| p.name == prim.name) {
        Some(existing) => merge_prim_spec(existing, prim),
        None => siblings.push(prim),
    }
}

fn merge_prim_spec(existing: &mut PrimSpec, prim: PrimSpec) {
    if prim.specifier == Specifier::Def {
        existing.specifier = Specifier::Def;
    }
    if !prim.type_name.is_empty() {
        existing.type_name = prim.type_name;
    }
    if prim.active.is_some() {
        existing.active = prim.active;
    }
    existing.references.extend(prim.references);
    crate::memory::layer::merge_metadata(&mut existing.metadata, &prim.metadata);
    for attribute in prim.attributes {
        existing.add_attribute(attribute);
    }
    for relationship in prim.relationships {
        existing.add_relationship(relationship);
    }
    for child in prim.children {
        merge_root(&mut existing.children, child);
    }
}
