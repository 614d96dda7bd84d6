//! Overpass QL front end.
//!
//! Text is tokenized by the [`lexer`], turned into a [`Query`] tree by the
//! recursive-descent [`parser`], and can be rendered back to canonical
//! Overpass QL through `Display`. Tag selectors are pulled out of the tree
//! with [`Query::first_selectors`] and [`Query::all_selectors`].

pub mod ast;
pub mod lexer;
pub mod parser;
mod render;
pub mod scope;
pub mod selectors;

pub use ast::{
    AroundCenter, Block, BoundingBox, DEFAULT_SET, ElementQuery, Filter, OutModifier,
    OutStatement, Pattern, Query, RecurseDirection, Settings, Span, Statement, StatementKind,
    Target,
};
pub use lexer::{Token, TokenKind, tokenize};
pub use scope::SetIndex;
pub use selectors::SelectorSet;

/// Parse Overpass QL text into a [`Query`].
///
/// Lexical errors are reported as [`crate::Error::Parse`] located where the
/// lexer stopped; no partial tree is ever returned.
pub fn parse(input: &str) -> crate::Result<Query> {
    Ok(parser::parse(input)?)
}
