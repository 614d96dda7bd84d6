//! Parser for Overpass QL.
//!
//! Grammar (in rough EBNF):
//!
//! query        = settings? statement*
//! settings     = ("[" NAME ":" setting_value "]")+ ";"
//! statement    = block | simple ("->" SETREF)? ";"
//! block        = ("foreach" | "complete") SETREF? ("->" SETREF)? "{" statement* "}"
//! simple       = group | element | out | recurse | SETREF (out | recurse)?
//! group        = "(" statement* ")" | "(" statement "-" statement ")"
//! element      = kind (tag_filter | paren_filter | SETREF)*
//! kind         = "node" | "way" | "rel" | "relation" | "area" | "nwr"
//! tag_filter   = "[" ( "!" text | "~" pattern "~" pattern flags?
//!                    | text (("=" | "!=") text | ("~" | "!~") pattern flags?)? ) "]"
//! paren_filter = "(" ( NUMBER ("," NUMBER){3} | NUMBER
//!                    | "around" SETREF? ":" NUMBER ("," NUMBER "," NUMBER)?
//!                    | "poly" ":" STRING | "id" ":" NUMBER ("," NUMBER)*
//!                    | "area" SETREF? ) ")"
//! out          = "out" (MODIFIER | NUMBER)*
//! recurse      = ">" | ">>" | "<" | "<<"

use geo_types::Coord;

use super::ast::{
    AroundCenter, Block, BoundingBox, DEFAULT_SET, ElementQuery, Filter, OutModifier,
    OutStatement, Pattern, Query, RecurseDirection, Settings, Span, Statement, StatementKind,
    Target,
};
use super::lexer::{Keyword, Lexer, Token, TokenKind};
use crate::error::ParseError;

type ParseResult<T> = Result<T, ParseError>;

/// Deepest allowed nesting of groups and blocks.
pub const MAX_NESTING: usize = 100;

/// Parser state. `current` is the one token of lookahead.
pub struct Parser<'a> {
    lexer: Lexer<'a>,
    current: Token,
    depth: usize,
}

impl<'a> Parser<'a> {
    pub fn new(source: &'a str) -> ParseResult<Self> {
        let mut lexer = Lexer::new(source);
        let current = lexer
            .next_token()
            .map_err(|e| ParseError::from_lex(source, e))?;
        Ok(Parser {
            lexer,
            current,
            depth: 0,
        })
    }

    /// Run `parse` one nesting level deeper.
    fn nested<T>(&mut self, parse: impl FnOnce(&mut Self) -> ParseResult<T>) -> ParseResult<T> {
        if self.depth == MAX_NESTING {
            return Err(self.error(format!(
                "nesting too deep (more than {} levels)",
                MAX_NESTING
            )));
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn span(&self) -> Span {
        Span {
            offset: self.current.offset,
            line: self.current.line,
            column: self.current.column,
        }
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError {
            offset: self.current.offset,
            line: self.current.line,
            column: self.current.column,
            message: message.into(),
        }
    }

    fn unexpected(&self, expected: &str) -> ParseError {
        self.error(format!(
            "expected {}, found {}",
            expected,
            self.current.kind.describe()
        ))
    }

    /// Consume the current token and return it.
    fn advance(&mut self) -> ParseResult<Token> {
        let source = self.lexer.source();
        let next = self
            .lexer
            .next_token()
            .map_err(|e| ParseError::from_lex(source, e))?;
        Ok(std::mem::replace(&mut self.current, next))
    }

    fn check(&self, kind: &TokenKind) -> bool {
        &self.current.kind == kind
    }

    fn eat(&mut self, kind: &TokenKind) -> ParseResult<bool> {
        if self.check(kind) {
            self.advance()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn expect(&mut self, kind: TokenKind) -> ParseResult<()> {
        if self.check(&kind) {
            self.advance()?;
            Ok(())
        } else {
            Err(self.unexpected(&kind.describe()))
        }
    }

    fn eat_set_ref(&mut self) -> ParseResult<Option<String>> {
        if let TokenKind::SetRef(name) = &self.current.kind {
            let name = name.clone();
            self.advance()?;
            Ok(Some(name))
        } else {
            Ok(None)
        }
    }

    /// Parse the whole input.
    pub fn parse_query(&mut self) -> ParseResult<Query> {
        let settings = self.parse_settings()?;
        let mut statements = Vec::new();
        while !self.check(&TokenKind::Eof) {
            statements.push(self.parse_statement()?);
        }
        Ok(Query {
            settings,
            statements,
        })
    }

    fn parse_settings(&mut self) -> ParseResult<Settings> {
        let mut settings = Settings::default();
        if !self.check(&TokenKind::LBracket) {
            return Ok(settings);
        }
        while self.eat(&TokenKind::LBracket)? {
            self.parse_setting(&mut settings)?;
            self.expect(TokenKind::RBracket)?;
        }
        self.expect(TokenKind::Semicolon)?;
        Ok(settings)
    }

    fn parse_setting(&mut self, settings: &mut Settings) -> ParseResult<()> {
        let start = self.current.offset;
        let name = self.parse_text("a setting name")?;
        self.expect(TokenKind::Colon)?;
        match name.as_str() {
            "out" => settings.out = Some(self.parse_text("an output format")?),
            "timeout" => settings.timeout = Some(self.parse_integer("timeout")?),
            "maxsize" => settings.maxsize = Some(self.parse_integer("maxsize")?),
            "bbox" => settings.bbox = Some(self.parse_bbox_numbers()?),
            "date" => match &self.current.kind {
                TokenKind::Str(date) => {
                    settings.date = Some(date.clone());
                    self.advance()?;
                }
                _ => return Err(self.unexpected("a quoted date")),
            },
            other => {
                return Err(ParseError::at(
                    self.lexer.source(),
                    start,
                    format!("unknown setting `{}`", other),
                ));
            }
        }
        Ok(())
    }

    fn parse_statement(&mut self) -> ParseResult<Statement> {
        let span = self.span();
        let kind = match &self.current.kind {
            TokenKind::Keyword(Keyword::Foreach) => {
                let block = self.nested(|p| {
                    p.advance()?;
                    p.parse_block()
                })?;
                StatementKind::ForEach(block)
            }
            TokenKind::Keyword(Keyword::Complete) => {
                let block = self.nested(|p| {
                    p.advance()?;
                    p.parse_block()
                })?;
                StatementKind::Complete(block)
            }
            _ => {
                let statement = self.parse_simple_statement()?;
                let statement = self.parse_assignment(statement)?;
                self.expect(TokenKind::Semicolon)?;
                return Ok(statement);
            }
        };
        // A stray `;` after a block is tolerated.
        self.eat(&TokenKind::Semicolon)?;
        Ok(Statement::new(kind, span))
    }

    /// `->.name` binds the statement result to a named set.
    fn parse_assignment(&mut self, statement: Statement) -> ParseResult<Statement> {
        if !self.check(&TokenKind::Arrow) {
            return Ok(statement);
        }
        if matches!(statement.kind, StatementKind::Out(_)) {
            return Err(self.error("the result of `out` cannot be assigned to a set"));
        }
        self.advance()?;
        let Some(name) = self.eat_set_ref()? else {
            return Err(self.unexpected("a set name after `->`"));
        };
        let span = statement.span;
        Ok(Statement::new(
            StatementKind::SetAssignment {
                name,
                source: Box::new(statement),
            },
            span,
        ))
    }

    fn parse_block(&mut self) -> ParseResult<Block> {
        let input = self.eat_set_ref()?;
        let name = if self.eat(&TokenKind::Arrow)? {
            match self.eat_set_ref()? {
                Some(name) => Some(name),
                None => return Err(self.unexpected("a set name after `->`")),
            }
        } else {
            None
        };
        self.expect(TokenKind::LBrace)?;
        let mut body = Vec::new();
        while !self.check(&TokenKind::RBrace) {
            if self.check(&TokenKind::Eof) {
                return Err(self.unexpected("`}`"));
            }
            body.push(self.parse_statement()?);
        }
        self.advance()?;
        Ok(Block { input, name, body })
    }

    fn parse_simple_statement(&mut self) -> ParseResult<Statement> {
        let span = self.span();
        let kind = match self.current.kind.clone() {
            TokenKind::LParen => self.nested(|p| {
                p.advance()?;
                p.parse_group()
            })?,
            TokenKind::Keyword(kw) => match target_for(kw) {
                Some(target) => {
                    self.advance()?;
                    StatementKind::ElementQuery(self.parse_element_query(target)?)
                }
                None if kw == Keyword::Out => {
                    self.advance()?;
                    StatementKind::Out(self.parse_out(None)?)
                }
                None => return Err(self.unexpected("a statement")),
            },
            TokenKind::SetRef(name) => {
                self.advance()?;
                if self.check(&TokenKind::Keyword(Keyword::Out)) {
                    self.advance()?;
                    StatementKind::Out(self.parse_out(Some(name))?)
                } else if let Some(direction) = self.recurse_direction() {
                    self.advance()?;
                    StatementKind::Recurse {
                        input: Some(name),
                        direction,
                    }
                } else {
                    StatementKind::SetReference { name }
                }
            }
            _ => match self.recurse_direction() {
                Some(direction) => {
                    self.advance()?;
                    StatementKind::Recurse {
                        input: None,
                        direction,
                    }
                }
                None => return Err(self.unexpected("a statement")),
            },
        };
        Ok(Statement::new(kind, span))
    }

    fn recurse_direction(&self) -> Option<RecurseDirection> {
        match self.current.kind {
            TokenKind::Gt => Some(RecurseDirection::Down),
            TokenKind::GtGt => Some(RecurseDirection::DownRelations),
            TokenKind::Lt => Some(RecurseDirection::Up),
            TokenKind::LtLt => Some(RecurseDirection::UpRelations),
            _ => None,
        }
    }

    /// Parse the inside of `( ... )` after the opening paren: a union, or a
    /// difference when a `-` follows the first statement.
    fn parse_group(&mut self) -> ParseResult<StatementKind> {
        let mut body = Vec::new();
        loop {
            match self.current.kind {
                TokenKind::RParen => {
                    self.advance()?;
                    return Ok(StatementKind::Union { body });
                }
                TokenKind::Eof => return Err(self.unexpected("`)`")),
                TokenKind::Minus => {
                    if body.len() != 1 {
                        return Err(
                            self.error("a difference needs exactly one statement before `-`")
                        );
                    }
                    self.advance()?;
                    let subtrahend = self.parse_statement()?;
                    self.expect(TokenKind::RParen)?;
                    let minuend = body.remove(0);
                    return Ok(StatementKind::Difference {
                        minuend: Box::new(minuend),
                        subtrahend: Box::new(subtrahend),
                    });
                }
                _ => body.push(self.parse_statement()?),
            }
        }
    }

    fn parse_element_query(&mut self, target: Target) -> ParseResult<ElementQuery> {
        let mut filters = Vec::new();
        loop {
            match &self.current.kind {
                TokenKind::LBracket => {
                    self.advance()?;
                    filters.push(self.parse_tag_filter()?);
                }
                TokenKind::LParen => {
                    self.advance()?;
                    filters.push(self.parse_paren_filter()?);
                }
                TokenKind::SetRef(name) => {
                    let name = name.clone();
                    self.advance()?;
                    filters.push(Filter::SetFilter { name });
                }
                _ => break,
            }
        }
        Ok(ElementQuery { target, filters })
    }

    /// Parse the inside of `[ ... ]` after the opening bracket.
    fn parse_tag_filter(&mut self) -> ParseResult<Filter> {
        let filter = match self.current.kind {
            TokenKind::Bang => {
                self.advance()?;
                let key = self.parse_text("a tag key")?;
                Filter::TagNotExists { key }
            }
            TokenKind::Tilde => {
                self.advance()?;
                let key = self.parse_regex_source()?;
                self.expect(TokenKind::Tilde)?;
                let value = self.parse_regex_source()?;
                // `,i` applies to both sides
                let case_insensitive = self.parse_regex_flags()?;
                Filter::KeyRegex {
                    key: self.compile(key, case_insensitive)?,
                    value: self.compile(value, case_insensitive)?,
                }
            }
            _ => {
                let key = self.parse_text("a tag key")?;
                match self.current.kind {
                    TokenKind::RBracket => Filter::TagExists { key },
                    TokenKind::Eq => {
                        self.advance()?;
                        let value = self.parse_text("a tag value")?;
                        Filter::TagEquals { key, value }
                    }
                    TokenKind::Ne => {
                        self.advance()?;
                        let value = self.parse_text("a tag value")?;
                        Filter::TagNotEquals { key, value }
                    }
                    TokenKind::Tilde => {
                        self.advance()?;
                        let pattern = self.parse_flagged_pattern()?;
                        Filter::TagRegex { key, pattern }
                    }
                    TokenKind::NotTilde => {
                        self.advance()?;
                        let pattern = self.parse_flagged_pattern()?;
                        Filter::TagNotRegex { key, pattern }
                    }
                    TokenKind::Bang
                    | TokenKind::Gt
                    | TokenKind::GtGt
                    | TokenKind::Lt
                    | TokenKind::LtLt
                    | TokenKind::Arrow
                    | TokenKind::Minus => {
                        return Err(self.error(format!(
                            "unknown filter operator {}",
                            self.current.kind.describe()
                        )));
                    }
                    _ => return Err(self.unexpected("`]`")),
                }
            }
        };
        self.expect(TokenKind::RBracket)?;
        Ok(filter)
    }

    /// Regex text and its offset, compiled once the flags are known.
    fn parse_regex_source(&mut self) -> ParseResult<(usize, String)> {
        let offset = self.current.offset;
        let source = self.parse_text("a regular expression")?;
        Ok((offset, source))
    }

    fn compile(
        &self,
        (offset, source): (usize, String),
        case_insensitive: bool,
    ) -> ParseResult<Pattern> {
        let compiled = if case_insensitive {
            Pattern::case_insensitive(source)
        } else {
            Pattern::new(source)
        };
        compiled.map_err(|e| {
            ParseError::at(
                self.lexer.source(),
                offset,
                format!("invalid regular expression: {}", e),
            )
        })
    }

    /// A pattern followed by an optional `,i` flag.
    fn parse_flagged_pattern(&mut self) -> ParseResult<Pattern> {
        let source = self.parse_regex_source()?;
        let case_insensitive = self.parse_regex_flags()?;
        self.compile(source, case_insensitive)
    }

    /// `,i` after a regex; returns whether it was present.
    fn parse_regex_flags(&mut self) -> ParseResult<bool> {
        if !self.eat(&TokenKind::Comma)? {
            return Ok(false);
        }
        match &self.current.kind {
            TokenKind::Ident(flag) if flag == "i" => {
                self.advance()?;
                Ok(true)
            }
            _ => Err(self.unexpected("the regex flag `i`")),
        }
    }

    /// Parse the inside of `( ... )` after the opening paren.
    fn parse_paren_filter(&mut self) -> ParseResult<Filter> {
        let filter = match self.current.kind.clone() {
            TokenKind::Number(_) => {
                let first = self.current.clone();
                let mut numbers = vec![self.parse_number()?];
                while self.eat(&TokenKind::Comma)? {
                    numbers.push(self.parse_number()?);
                }
                match numbers.as_slice() {
                    [_] => Filter::IdList {
                        ids: vec![integer_from(&first, "id")?],
                    },
                    [south, west, north, east] => Filter::BoundingBox(BoundingBox {
                        south: *south,
                        west: *west,
                        north: *north,
                        east: *east,
                    }),
                    _ => {
                        return Err(self.error(
                            "expected a bounding box (south,west,north,east) or a single id",
                        ));
                    }
                }
            }
            TokenKind::Ident(name) if name == "around" => {
                self.advance()?;
                self.parse_around()?
            }
            TokenKind::Ident(name) if name == "poly" => {
                self.advance()?;
                self.expect(TokenKind::Colon)?;
                self.parse_poly()?
            }
            TokenKind::Ident(name) if name == "id" => {
                self.advance()?;
                self.expect(TokenKind::Colon)?;
                let mut ids = vec![self.parse_integer::<i64>("id")?];
                while self.eat(&TokenKind::Comma)? {
                    ids.push(self.parse_integer("id")?);
                }
                Filter::IdList { ids }
            }
            TokenKind::Keyword(Keyword::Area) => {
                self.advance()?;
                let name = self
                    .eat_set_ref()?
                    .unwrap_or_else(|| DEFAULT_SET.to_string());
                Filter::Area { name }
            }
            _ => {
                return Err(self.error(format!(
                    "unknown filter {}",
                    self.current.kind.describe()
                )));
            }
        };
        self.expect(TokenKind::RParen)?;
        Ok(filter)
    }

    fn parse_around(&mut self) -> ParseResult<Filter> {
        let set = self.eat_set_ref()?;
        self.expect(TokenKind::Colon)?;
        let radius = self.parse_number()?;
        let center = match set {
            Some(name) => AroundCenter::Set(name),
            None if self.eat(&TokenKind::Comma)? => {
                let lat = self.parse_number()?;
                self.expect(TokenKind::Comma)?;
                let lon = self.parse_number()?;
                AroundCenter::Point(Coord { x: lon, y: lat })
            }
            None => AroundCenter::Set(DEFAULT_SET.to_string()),
        };
        Ok(Filter::Around { radius, center })
    }

    fn parse_poly(&mut self) -> ParseResult<Filter> {
        let TokenKind::Str(text) = &self.current.kind else {
            return Err(self.unexpected("a quoted list of coordinates"));
        };
        let numbers = text
            .split_whitespace()
            .map(|n| n.parse::<f64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| self.error("malformed numeric argument in polygon"))?;
        if numbers.len() % 2 != 0 || numbers.len() < 6 {
            return Err(self.error("a polygon needs at least three `lat lon` pairs"));
        }
        let points = numbers
            .chunks(2)
            .map(|pair| Coord {
                x: pair[1],
                y: pair[0],
            })
            .collect();
        self.advance()?;
        Ok(Filter::Polygon { points })
    }

    fn parse_bbox_numbers(&mut self) -> ParseResult<BoundingBox> {
        let south = self.parse_number()?;
        self.expect(TokenKind::Comma)?;
        let west = self.parse_number()?;
        self.expect(TokenKind::Comma)?;
        let north = self.parse_number()?;
        self.expect(TokenKind::Comma)?;
        let east = self.parse_number()?;
        Ok(BoundingBox {
            south,
            west,
            north,
            east,
        })
    }

    fn parse_out(&mut self, input: Option<String>) -> ParseResult<OutStatement> {
        let mut out = OutStatement {
            input,
            ..OutStatement::default()
        };
        loop {
            match &self.current.kind {
                TokenKind::Ident(name) => {
                    let Some(modifier) = OutModifier::from_name(name) else {
                        return Err(self.error(format!("unknown out modifier `{}`", name)));
                    };
                    out.modifiers.push(modifier);
                    self.advance()?;
                }
                TokenKind::Number(_) => {
                    if out.limit.is_some() {
                        return Err(self.error("`out` takes at most one limit"));
                    }
                    out.limit = Some(self.parse_integer("out limit")?);
                }
                _ => return Ok(out),
            }
        }
    }

    /// Any word-like token used as a key, value or name.
    fn parse_text(&mut self, what: &str) -> ParseResult<String> {
        let text = match &self.current.kind {
            TokenKind::Ident(s) | TokenKind::Str(s) | TokenKind::Number(s) => s.clone(),
            TokenKind::Keyword(kw) => kw.as_str().to_string(),
            _ => return Err(self.unexpected(what)),
        };
        self.advance()?;
        Ok(text)
    }

    fn parse_number(&mut self) -> ParseResult<f64> {
        let TokenKind::Number(text) = &self.current.kind else {
            return Err(self.unexpected("a number"));
        };
        let value = text
            .parse::<f64>()
            .map_err(|_| self.error(format!("malformed numeric argument `{}`", text)))?;
        self.advance()?;
        Ok(value)
    }

    fn parse_integer<T: std::str::FromStr>(&mut self, what: &str) -> ParseResult<T> {
        let value = integer_from(&self.current, what)?;
        self.advance()?;
        Ok(value)
    }
}

fn integer_from<T: std::str::FromStr>(token: &Token, what: &str) -> ParseResult<T> {
    let message = match &token.kind {
        TokenKind::Number(text) => match text.parse::<T>() {
            Ok(value) => return Ok(value),
            Err(_) => format!(
                "malformed numeric argument `{}`: {} must be an integer",
                text, what
            ),
        },
        other => format!("expected an integer {}, found {}", what, other.describe()),
    };
    Err(ParseError {
        offset: token.offset,
        line: token.line,
        column: token.column,
        message,
    })
}

fn target_for(kw: Keyword) -> Option<Target> {
    match kw {
        Keyword::Node => Some(Target::Node),
        Keyword::Way => Some(Target::Way),
        Keyword::Rel | Keyword::Relation => Some(Target::Relation),
        Keyword::Area => Some(Target::Area),
        Keyword::Nwr => Some(Target::Nwr),
        _ => None,
    }
}

/// Parse Overpass QL text into a [`Query`].
pub fn parse(input: &str) -> Result<Query, ParseError> {
    let mut parser = Parser::new(input)?;
    let query = parser.parse_query()?;
    tracing::debug!(
        statements = query.statements.len(),
        "parsed Overpass query"
    );
    Ok(query)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn statements(input: &str) -> Vec<StatementKind> {
        parse(input)
            .unwrap()
            .statements
            .into_iter()
            .map(|s| s.kind)
            .collect()
    }

    fn filters(input: &str) -> Vec<Filter> {
        match statements(input).remove(0) {
            StatementKind::ElementQuery(query) => query.filters,
            other => panic!("expected an element query, got {:?}", other),
        }
    }

    fn error(input: &str) -> ParseError {
        parse(input).unwrap_err()
    }

    #[test]
    fn test_settings() {
        let query = parse(
            r#"[out:json][timeout:25][maxsize:1073741824][bbox:1,2,3,4][date:"2020-01-01T00:00:00Z"];"#,
        )
        .unwrap();
        assert_eq!(query.settings.out.as_deref(), Some("json"));
        assert_eq!(query.settings.timeout, Some(25));
        assert_eq!(query.settings.maxsize, Some(1_073_741_824));
        assert_eq!(
            query.settings.bbox,
            Some(BoundingBox {
                south: 1.0,
                west: 2.0,
                north: 3.0,
                east: 4.0,
            })
        );
        assert_eq!(
            query.settings.date.as_deref(),
            Some("2020-01-01T00:00:00Z")
        );
        assert!(query.statements.is_empty());
    }

    #[test]
    fn test_unknown_setting() {
        let err = error("[colour:red];");
        assert!(err.message.contains("unknown setting `colour`"));
        assert_eq!(err.column, 2);
    }

    #[test]
    fn test_tag_filters() {
        assert_eq!(
            filters(r#"node[amenity][!name][a=b][c!="d e"][f~"^g"][h!~"i",i];"#),
            vec![
                Filter::TagExists {
                    key: "amenity".into()
                },
                Filter::TagNotExists { key: "name".into() },
                Filter::TagEquals {
                    key: "a".into(),
                    value: "b".into()
                },
                Filter::TagNotEquals {
                    key: "c".into(),
                    value: "d e".into()
                },
                Filter::TagRegex {
                    key: "f".into(),
                    pattern: Pattern::new("^g").unwrap()
                },
                Filter::TagNotRegex {
                    key: "h".into(),
                    pattern: Pattern::case_insensitive("i").unwrap()
                },
            ]
        );
    }

    #[test]
    fn test_key_regex_flag_applies_to_both_sides() {
        assert_eq!(
            filters(r#"way[~"^name"~"x",i];"#),
            vec![Filter::KeyRegex {
                key: Pattern::case_insensitive("^name").unwrap(),
                value: Pattern::case_insensitive("x").unwrap(),
            }]
        );
    }

    #[test]
    fn test_keywords_as_keys_and_values() {
        assert_eq!(
            filters("node[area=node][out];"),
            vec![
                Filter::TagEquals {
                    key: "area".into(),
                    value: "node".into()
                },
                Filter::TagExists { key: "out".into() },
            ]
        );
    }

    #[test]
    fn test_paren_filters() {
        assert_eq!(
            filters("node(-33.9,18.4,-33.8,18.5)(42)(id:1,2)(around:50,1.5,2.5)(around.s:5)(area.a);"),
            vec![
                Filter::BoundingBox(BoundingBox {
                    south: -33.9,
                    west: 18.4,
                    north: -33.8,
                    east: 18.5,
                }),
                Filter::IdList { ids: vec![42] },
                Filter::IdList { ids: vec![1, 2] },
                Filter::Around {
                    radius: 50.0,
                    center: AroundCenter::Point(Coord { x: 2.5, y: 1.5 }),
                },
                Filter::Around {
                    radius: 5.0,
                    center: AroundCenter::Set("s".into()),
                },
                Filter::Area { name: "a".into() },
            ]
        );
    }

    #[test]
    fn test_polygon() {
        assert_eq!(
            filters(r#"node(poly:"10 20 11 20 11 21");"#),
            vec![Filter::Polygon {
                points: vec![
                    Coord { x: 20.0, y: 10.0 },
                    Coord { x: 20.0, y: 11.0 },
                    Coord { x: 21.0, y: 11.0 },
                ],
            }]
        );
        assert!(error(r#"node(poly:"10 20 11");"#)
            .message
            .contains("at least three"));
        assert!(error(r#"node(poly:"10 x 11 20 11 21");"#)
            .message
            .contains("malformed numeric argument"));
    }

    #[test]
    fn test_input_set_in_filter_position() {
        assert_eq!(
            filters("node.a[shop];"),
            vec![
                Filter::SetFilter { name: "a".into() },
                Filter::TagExists { key: "shop".into() },
            ]
        );
    }

    #[test]
    fn test_set_assignment_and_reference() {
        let kinds = statements("way[highway]->.roads; .roads; .roads out geom;");
        let StatementKind::SetAssignment { name, source } = &kinds[0] else {
            panic!("expected an assignment");
        };
        assert_eq!(name, "roads");
        assert!(matches!(source.kind, StatementKind::ElementQuery(_)));
        assert_eq!(
            kinds[1],
            StatementKind::SetReference {
                name: "roads".into()
            }
        );
        assert_eq!(
            kinds[2],
            StatementKind::Out(OutStatement {
                input: Some("roads".into()),
                modifiers: vec![OutModifier::Geom],
                limit: None,
            })
        );
    }

    #[test]
    fn test_union_and_difference() {
        let kinds = statements("(node[a]; way[b];); (node[a]; - node[b];);");
        let StatementKind::Union { body } = &kinds[0] else {
            panic!("expected a union");
        };
        assert_eq!(body.len(), 2);
        assert!(matches!(kinds[1], StatementKind::Difference { .. }));

        let err = error("(node[a]; way[b]; - node[c];);");
        assert!(err.message.contains("exactly one statement"));
    }

    #[test]
    fn test_recurse() {
        assert_eq!(
            statements("> ; .a <<;"),
            vec![
                StatementKind::Recurse {
                    input: None,
                    direction: RecurseDirection::Down,
                },
                StatementKind::Recurse {
                    input: Some("a".into()),
                    direction: RecurseDirection::UpRelations,
                },
            ]
        );
    }

    #[test]
    fn test_out_modifiers_and_limit() {
        assert_eq!(
            statements("out skel qt 20;"),
            vec![StatementKind::Out(OutStatement {
                input: None,
                modifiers: vec![OutModifier::Skel, OutModifier::Qt],
                limit: Some(20),
            })]
        );
        assert!(error("out fancy;").message.contains("unknown out modifier"));
        assert!(error("out 1 2;").message.contains("at most one limit"));
        assert!(error("out 1.5;").message.contains("must be an integer"));
        assert!(error("out->.x;").message.contains("cannot be assigned"));
    }

    #[test]
    fn test_blocks() {
        let kinds = statements("foreach.a->.b { .b out; }; complete { >; }");
        assert_eq!(kinds.len(), 2);
        let StatementKind::ForEach(block) = &kinds[0] else {
            panic!("expected foreach");
        };
        assert_eq!(block.input.as_deref(), Some("a"));
        assert_eq!(block.name.as_deref(), Some("b"));
        assert_eq!(block.body.len(), 1);
        let StatementKind::Complete(block) = &kinds[1] else {
            panic!("expected complete");
        };
        assert_eq!(block.input, None);
        assert_eq!(block.body.len(), 1);

        assert!(error("foreach { out;").message.contains("expected `}`"));
    }

    #[test]
    fn test_filter_errors() {
        let err = error("node[a==b];");
        assert!(err.message.contains("expected a tag value"));

        let err = error("node[a<b];");
        assert!(err.message.contains("unknown filter operator `<`"));

        let err = error("node(1,2,3);");
        assert!(err.message.contains("bounding box"));

        let err = error("node(nearby:5);");
        assert!(err.message.contains("unknown filter"));

        let err = error(r#"node[name~"("];"#);
        assert!(err.message.contains("invalid regular expression"));
        assert_eq!(err.offset, 10);
    }

    #[test]
    fn test_unbalanced_brackets() {
        let err = error("node[amenity;");
        assert!(err.message.contains("expected `]`"));
        assert_eq!(err.offset, 12);

        let err = error("(node;");
        assert!(err.message.contains("expected `)`"));
    }

    #[test]
    fn test_missing_semicolon_position() {
        let err = error("node[a]\nway[b];");
        assert_eq!((err.line, err.column), (2, 1));
        assert!(err.message.contains("expected `;`, found keyword `way`"));
    }

    #[test]
    fn test_spans() {
        let query = parse("node;\n  way;").unwrap();
        let span = query.statements[1].span;
        assert_eq!((span.offset, span.line, span.column), (8, 2, 3));
    }

    fn nested_unions(levels: usize) -> String {
        format!("{}node[a];{}", "(".repeat(levels), ");".repeat(levels))
    }

    #[test]
    fn test_nesting_limit() {
        let query = parse(&nested_unions(MAX_NESTING)).unwrap();
        assert_eq!(query.all_selectors().len(), 1);

        let err = error(&nested_unions(MAX_NESTING + 1));
        assert!(err.message.contains("nesting too deep"));
        assert_eq!(err.offset, MAX_NESTING);

        let err = error(&nested_unions(20_000));
        assert!(err.message.contains("nesting too deep"));
    }

    #[test]
    fn test_nesting_limit_counts_blocks() {
        let source = format!(
            "{}node[a];{}",
            "foreach{".repeat(MAX_NESTING + 1),
            "}".repeat(MAX_NESTING + 1)
        );
        assert!(error(&source).message.contains("nesting too deep"));
    }
}
