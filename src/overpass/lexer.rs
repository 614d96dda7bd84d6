//! Lexer/tokenizer for Overpass QL.

use winnow::ascii::{digit1, multispace1};
use winnow::combinator::{alt, not, opt, preceded, repeat, terminated};
use winnow::prelude::*;
use winnow::token::{any, one_of, take_till, take_until, take_while};

use crate::error::LexError;

/// Statement keywords. Any of them may also appear as a tag key or value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Node,
    Way,
    Rel,
    Relation,
    Area,
    Nwr,
    Out,
    Foreach,
    Complete,
}

impl Keyword {
    fn from_word(word: &str) -> Option<Self> {
        let kw = match word {
            "node" => Keyword::Node,
            "way" => Keyword::Way,
            "rel" => Keyword::Rel,
            "relation" => Keyword::Relation,
            "area" => Keyword::Area,
            "nwr" => Keyword::Nwr,
            "out" => Keyword::Out,
            "foreach" => Keyword::Foreach,
            "complete" => Keyword::Complete,
            _ => return None,
        };
        Some(kw)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Keyword::Node => "node",
            Keyword::Way => "way",
            Keyword::Rel => "rel",
            Keyword::Relation => "relation",
            Keyword::Area => "area",
            Keyword::Nwr => "nwr",
            Keyword::Out => "out",
            Keyword::Foreach => "foreach",
            Keyword::Complete => "complete",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // Words and literals
    Keyword(Keyword),
    Ident(String),
    Str(String),
    Number(String), // literal text, converted by the parser
    SetRef(String), // .name

    // Operators
    Eq,       // =
    Ne,       // !=
    Tilde,    // ~
    NotTilde, // !~
    Bang,     // !
    Arrow,    // ->
    Minus,    // -
    Gt,       // >
    GtGt,     // >>
    Lt,       // <
    LtLt,     // <<

    // Punctuation
    LBracket,
    RBracket,
    LParen,
    RParen,
    LBrace,
    RBrace,
    Semicolon,
    Comma,
    Colon,

    Eof,
}

impl TokenKind {
    /// Human-readable form used in parse error messages.
    pub fn describe(&self) -> String {
        match self {
            TokenKind::Keyword(kw) => format!("keyword `{}`", kw.as_str()),
            TokenKind::Ident(s) => format!("identifier `{}`", s),
            TokenKind::Str(s) => format!("string \"{}\"", s),
            TokenKind::Number(n) => format!("number {}", n),
            TokenKind::SetRef(s) => format!("set `.{}`", s),
            TokenKind::Eq => "`=`".into(),
            TokenKind::Ne => "`!=`".into(),
            TokenKind::Tilde => "`~`".into(),
            TokenKind::NotTilde => "`!~`".into(),
            TokenKind::Bang => "`!`".into(),
            TokenKind::Arrow => "`->`".into(),
            TokenKind::Minus => "`-`".into(),
            TokenKind::Gt => "`>`".into(),
            TokenKind::GtGt => "`>>`".into(),
            TokenKind::Lt => "`<`".into(),
            TokenKind::LtLt => "`<<`".into(),
            TokenKind::LBracket => "`[`".into(),
            TokenKind::RBracket => "`]`".into(),
            TokenKind::LParen => "`(`".into(),
            TokenKind::RParen => "`)`".into(),
            TokenKind::LBrace => "`{`".into(),
            TokenKind::RBrace => "`}`".into(),
            TokenKind::Semicolon => "`;`".into(),
            TokenKind::Comma => "`,`".into(),
            TokenKind::Colon => "`:`".into(),
            TokenKind::Eof => "end of input".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub offset: usize,
    pub line: usize,
    pub column: usize,
}

type PResult<T> = Result<T, winnow::error::ErrMode<winnow::error::ContextError>>;

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Lex a bare word: keyword or identifier.
fn lex_word(input: &mut &str) -> PResult<TokenKind> {
    take_while(1.., is_word_char)
        .map(|word: &str| match Keyword::from_word(word) {
            Some(kw) => TokenKind::Keyword(kw),
            None => TokenKind::Ident(word.to_string()),
        })
        .parse_next(input)
}

/// Lex a number. A digit run glued to letters (`50mph`) is left for `lex_word`.
fn lex_number(input: &mut &str) -> PResult<TokenKind> {
    terminated(
        (opt('-'), digit1, opt(('.', digit1))).take(),
        not(one_of(is_word_char)),
    )
    .map(|text: &str| TokenKind::Number(text.to_string()))
    .parse_next(input)
}

/// Lex a set reference: `.` followed by a name starting with a letter or `_`.
fn lex_set_ref(input: &mut &str) -> PResult<TokenKind> {
    preceded(
        '.',
        (
            one_of(|c: char| c.is_alphabetic() || c == '_'),
            take_while(0.., is_word_char),
        )
            .take(),
    )
    .map(|name: &str| TokenKind::SetRef(name.to_string()))
    .parse_next(input)
}

fn next_char(input: &mut &str) -> PResult<char> {
    any.parse_next(input)
}

/// Lex a single- or double-quoted string. Unknown escapes are kept verbatim so
/// regex classes such as `\d` survive.
fn lex_string(input: &mut &str) -> PResult<TokenKind> {
    let quote = next_char(input)?;
    let mut value = String::new();
    loop {
        match next_char(input)? {
            c if c == quote => return Ok(TokenKind::Str(value)),
            '\\' => match next_char(input)? {
                'n' => value.push('\n'),
                't' => value.push('\t'),
                c @ ('\\' | '"' | '\'') => value.push(c),
                other => {
                    value.push('\\');
                    value.push(other);
                }
            },
            c => value.push(c),
        }
    }
}

fn lex_operator(input: &mut &str) -> PResult<TokenKind> {
    alt((
        // Multi-char operators first
        "->".value(TokenKind::Arrow),
        ">>".value(TokenKind::GtGt),
        "<<".value(TokenKind::LtLt),
        "!=".value(TokenKind::Ne),
        "!~".value(TokenKind::NotTilde),
        // Single-char operators
        "=".value(TokenKind::Eq),
        "~".value(TokenKind::Tilde),
        "!".value(TokenKind::Bang),
        ">".value(TokenKind::Gt),
        "<".value(TokenKind::Lt),
    ))
    .parse_next(input)
}

fn lex_punctuation(input: &mut &str) -> PResult<TokenKind> {
    alt((
        "[".value(TokenKind::LBracket),
        "]".value(TokenKind::RBracket),
        "(".value(TokenKind::LParen),
        ")".value(TokenKind::RParen),
        "{".value(TokenKind::LBrace),
        "}".value(TokenKind::RBrace),
        ";".value(TokenKind::Semicolon),
        ",".value(TokenKind::Comma),
        ":".value(TokenKind::Colon),
    ))
    .parse_next(input)
}

/// Lex a single non-string token.
fn lex_token(input: &mut &str) -> PResult<TokenKind> {
    alt((
        lex_operator,
        lex_punctuation,
        // Number before minus to catch negative coordinates
        lex_number,
        "-".value(TokenKind::Minus),
        lex_set_ref,
        lex_word,
    ))
    .parse_next(input)
}

fn line_comment(input: &mut &str) -> PResult<()> {
    ("//", take_till(0.., '\n')).void().parse_next(input)
}

fn block_comment(input: &mut &str) -> PResult<()> {
    ("/*", take_until(0.., "*/"), "*/").void().parse_next(input)
}

/// Whitespace and comments. Stops in front of an unterminated block
/// comment, which the caller reports.
fn trivia(input: &mut &str) -> PResult<()> {
    repeat(0.., alt((multispace1.void(), line_comment, block_comment))).parse_next(input)
}

/// Single forward pass over query text. The parser holds the one token
/// of lookahead it needs.
pub struct Lexer<'a> {
    source: &'a str,
    rest: &'a str,
    line: usize,
    column: usize,
    finished: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Lexer {
            source,
            rest: source,
            line: 1,
            column: 1,
            finished: false,
        }
    }

    pub fn source(&self) -> &'a str {
        self.source
    }

    fn offset(&self) -> usize {
        self.source.len() - self.rest.len()
    }

    /// Move past `len` bytes, keeping line and column current.
    fn consume(&mut self, len: usize) {
        let (taken, rest) = self.rest.split_at(len);
        for c in taken.chars() {
            if c == '\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
        self.rest = rest;
    }

    fn lex(&mut self) -> Result<Token, LexError> {
        let mut input = self.rest;
        let skipped = trivia(&mut input);
        self.consume(self.rest.len() - input.len());

        let offset = self.offset();
        if skipped.is_err() || input.starts_with("/*") {
            return Err(LexError {
                offset,
                message: "unterminated block comment".to_string(),
            });
        }
        let (line, column) = (self.line, self.column);
        let Some(first) = input.chars().next() else {
            return Ok(Token {
                kind: TokenKind::Eof,
                offset,
                line,
                column,
            });
        };

        let kind = if first == '"' || first == '\'' {
            lex_string(&mut input).map_err(|_| LexError {
                offset,
                message: "unterminated string literal".to_string(),
            })?
        } else {
            lex_token(&mut input).map_err(|_| LexError {
                offset,
                message: format!("unexpected character '{}'", first),
            })?
        };
        self.consume(self.rest.len() - input.len());

        Ok(Token {
            kind,
            offset,
            line,
            column,
        })
    }

    /// Next token; yields `Eof` repeatedly once input is exhausted.
    pub fn next_token(&mut self) -> Result<Token, LexError> {
        self.lex()
    }
}

impl Iterator for Lexer<'_> {
    type Item = Result<Token, LexError>;

    /// Yields every token including the final `Eof`, then stops. Stops after
    /// the first error too.
    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let tok = self.next_token();
        match &tok {
            Ok(t) if t.kind != TokenKind::Eof => {}
            _ => self.finished = true,
        }
        Some(tok)
    }
}

/// Tokenize the entire input, ending with `Eof`.
pub fn tokenize(input: &str) -> Result<Vec<Token>, LexError> {
    Lexer::new(input).collect()
}
