//! The `.usda` text layer format.
//!
//! Supported subset: the `#usda 1.0` header, layer metadata, `def`/`over`/
//! `class` prims with metadata (`active`, `references`, `payload`, arbitrary
//! keys), typed attributes with `uniform`/`custom` qualifiers, `.timeSamples`,
//! `.connect`, attribute metadata and relationships. Variant sets are not
//! supported.

mod lexer;
mod parser;
mod writer;

pub use lexer::{LexError, Lexer, Token, TokenKind};
pub use parser::{ParseError, parse_layer};
pub use writer::write_layer;
