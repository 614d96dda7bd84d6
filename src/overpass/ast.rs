//! AST types for Overpass QL.

use geo_types::Coord;
use regex::{Regex, RegexBuilder};
use serde::Serialize;
use std::fmt;

/// Source location of a statement.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct Span {
    pub offset: usize,
    pub line: usize,
    pub column: usize,
}

/// Spans never take part in structural equality: a re-parsed tree compares
/// equal to the original regardless of layout.
impl PartialEq for Span {
    fn eq(&self, _other: &Self) -> bool {
        true
    }
}

/// Root of a parsed query.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Query {
    pub settings: Settings,
    pub statements: Vec<Statement>,
}

/// Global `[name:value]` settings.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Settings {
    pub out: Option<String>,
    pub timeout: Option<u32>,
    pub maxsize: Option<u64>,
    pub bbox: Option<BoundingBox>,
    pub date: Option<String>,
}

impl Settings {
    pub fn is_empty(&self) -> bool {
        self == &Settings::default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Statement {
    pub kind: StatementKind,
    pub span: Span,
}

impl Statement {
    pub fn new(kind: StatementKind, span: Span) -> Self {
        Statement { kind, span }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StatementKind {
    /// `node[amenity=cafe](50.7,7.1,50.8,7.2)`
    ElementQuery(ElementQuery),

    /// `(stmt; stmt; ...)`
    Union { body: Vec<Statement> },

    /// `(stmt; - stmt;)`
    Difference {
        minuend: Box<Statement>,
        subtrahend: Box<Statement>,
    },

    /// `>`, `>>`, `<`, `<<`, optionally reading from `.input`
    Recurse {
        input: Option<String>,
        direction: RecurseDirection,
    },

    /// `stmt->.name`
    SetAssignment {
        name: String,
        source: Box<Statement>,
    },

    /// `.name`
    SetReference { name: String },

    Out(OutStatement),

    ForEach(Block),

    Complete(Block),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ElementQuery {
    pub target: Target,
    pub filters: Vec<Filter>,
}

/// Element kind requested by a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    Node,
    Way,
    Relation,
    Area,
    /// Node, way or relation.
    Nwr,
}

impl Target {
    pub fn as_str(&self) -> &'static str {
        match self {
            Target::Node => "node",
            Target::Way => "way",
            Target::Relation => "relation",
            Target::Area => "area",
            Target::Nwr => "nwr",
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecurseDirection {
    Down,          // >
    DownRelations, // >>
    Up,            // <
    UpRelations,   // <<
}

impl fmt::Display for RecurseDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecurseDirection::Down => write!(f, ">"),
            RecurseDirection::DownRelations => write!(f, ">>"),
            RecurseDirection::Up => write!(f, "<"),
            RecurseDirection::UpRelations => write!(f, "<<"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct OutStatement {
    pub input: Option<String>,
    pub modifiers: Vec<OutModifier>,
    pub limit: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutModifier {
    Ids,
    Skel,
    Body,
    Tags,
    Meta,
    Center,
    Geom,
    Bb,
    Qt,
    Asc,
    Count,
}

impl OutModifier {
    pub fn from_name(name: &str) -> Option<Self> {
        let modifier = match name {
            "ids" => OutModifier::Ids,
            "skel" => OutModifier::Skel,
            "body" => OutModifier::Body,
            "tags" => OutModifier::Tags,
            "meta" => OutModifier::Meta,
            "center" => OutModifier::Center,
            "geom" => OutModifier::Geom,
            "bb" => OutModifier::Bb,
            "qt" => OutModifier::Qt,
            "asc" => OutModifier::Asc,
            "count" => OutModifier::Count,
            _ => return None,
        };
        Some(modifier)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OutModifier::Ids => "ids",
            OutModifier::Skel => "skel",
            OutModifier::Body => "body",
            OutModifier::Tags => "tags",
            OutModifier::Meta => "meta",
            OutModifier::Center => "center",
            OutModifier::Geom => "geom",
            OutModifier::Bb => "bb",
            OutModifier::Qt => "qt",
            OutModifier::Asc => "asc",
            OutModifier::Count => "count",
        }
    }
}

/// Body of a `foreach` or `complete` block.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Block {
    /// Set iterated over; `_` when absent.
    pub input: Option<String>,
    /// Loop variable bound by `->.name`; `_` when absent.
    pub name: Option<String>,
    pub body: Vec<Statement>,
}

/// A single selector atom attached to an element query.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Filter {
    /// `[key]`
    TagExists { key: String },
    /// `[!key]`
    TagNotExists { key: String },
    /// `[key=value]`
    TagEquals { key: String, value: String },
    /// `[key!=value]`
    TagNotEquals { key: String, value: String },
    /// `[key~"pattern"]`
    TagRegex { key: String, pattern: Pattern },
    /// `[key!~"pattern"]`
    TagNotRegex { key: String, pattern: Pattern },
    /// `[~"keyregex"~"valueregex"]`
    KeyRegex { key: Pattern, value: Pattern },
    /// `(south,west,north,east)`
    BoundingBox(BoundingBox),
    /// `(around:radius,lat,lon)` or `(around.set:radius)`
    Around { radius: f64, center: AroundCenter },
    /// `(poly:"lat lon lat lon ...")`, points stored as x=lon, y=lat
    Polygon { points: Vec<Coord<f64>> },
    /// `(id:1,2,3)`
    IdList { ids: Vec<i64> },
    /// `.name`
    SetFilter { name: String },
    /// `(area)` or `(area.name)`
    Area { name: String },
}

impl Filter {
    /// The literal tag key this filter tests, if any.
    pub fn key(&self) -> Option<&str> {
        match self {
            Filter::TagExists { key }
            | Filter::TagNotExists { key }
            | Filter::TagEquals { key, .. }
            | Filter::TagNotEquals { key, .. }
            | Filter::TagRegex { key, .. }
            | Filter::TagNotRegex { key, .. } => Some(key),
            _ => None,
        }
    }
}

/// A regular expression as written in the query, compiled once for
/// whole-string matching.
#[derive(Debug, Clone, Serialize)]
pub struct Pattern {
    source: String,
    case_insensitive: bool,
    #[serde(skip)]
    matcher: Regex,
}

impl Pattern {
    pub fn new(source: impl Into<String>) -> Result<Self, regex::Error> {
        Self::build(source.into(), false)
    }

    /// Pattern with the `,i` flag.
    pub fn case_insensitive(source: impl Into<String>) -> Result<Self, regex::Error> {
        Self::build(source.into(), true)
    }

    fn build(source: String, case_insensitive: bool) -> Result<Self, regex::Error> {
        let matcher = RegexBuilder::new(&format!("^(?:{})$", source))
            .case_insensitive(case_insensitive)
            .build()?;
        Ok(Pattern {
            source,
            case_insensitive,
            matcher,
        })
    }

    /// The expression as written, without anchors.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn is_case_insensitive(&self) -> bool {
        self.case_insensitive
    }

    /// True when the whole of `text` matches.
    pub fn is_match(&self, text: &str) -> bool {
        self.matcher.is_match(text)
    }

    /// The source wrapped so that a searching engine matches the whole value.
    pub fn anchored_source(&self) -> String {
        format!("^(?:{})$", self.source)
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source && self.case_insensitive == other.case_insensitive
    }
}

impl Eq for Pattern {}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundingBox {
    pub south: f64,
    pub west: f64,
    pub north: f64,
    pub east: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AroundCenter {
    /// x=lon, y=lat
    Point(Coord<f64>),
    Set(String),
}

/// Name of the implicit default set.
pub const DEFAULT_SET: &str = "_";
