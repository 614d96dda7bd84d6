//! Canonical Overpass QL output.
//!
//! Rendering is total and semantic-preserving: re-parsing the text yields an
//! equal tree, but whitespace and comments from the source are not kept.

use std::fmt::{self, Display, Write};

use super::ast::{
    AroundCenter, Block, BoundingBox, DEFAULT_SET, ElementQuery, Filter, OutStatement, Pattern,
    Query, Settings, Statement, StatementKind,
};
use super::selectors::SelectorSet;

/// Keys and values that lex back as a single word are written bare.
fn is_bare(text: &str) -> bool {
    !text.is_empty() && text.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn write_quoted(f: &mut fmt::Formatter<'_>, text: &str) -> fmt::Result {
    f.write_char('"')?;
    for c in text.chars() {
        match c {
            '\\' => f.write_str("\\\\")?,
            '"' => f.write_str("\\\"")?,
            '\n' => f.write_str("\\n")?,
            '\t' => f.write_str("\\t")?,
            c => f.write_char(c)?,
        }
    }
    f.write_char('"')
}

fn write_text(f: &mut fmt::Formatter<'_>, text: &str) -> fmt::Result {
    if is_bare(text) {
        f.write_str(text)
    } else {
        write_quoted(f, text)
    }
}

fn write_pattern(f: &mut fmt::Formatter<'_>, pattern: &Pattern) -> fmt::Result {
    write_quoted(f, pattern.source())
}

fn write_flags(f: &mut fmt::Formatter<'_>, case_insensitive: bool) -> fmt::Result {
    if case_insensitive { f.write_str(",i") } else { Ok(()) }
}

fn write_set(f: &mut fmt::Formatter<'_>, name: &Option<String>) -> fmt::Result {
    match name {
        Some(name) => write!(f, ".{}", name),
        None => Ok(()),
    }
}

impl Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{},{}", self.south, self.west, self.north, self.east)
    }
}

impl Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::TagExists { key } => {
                f.write_char('[')?;
                write_text(f, key)?;
                f.write_char(']')
            }
            Filter::TagNotExists { key } => {
                f.write_str("[!")?;
                write_text(f, key)?;
                f.write_char(']')
            }
            Filter::TagEquals { key, value } | Filter::TagNotEquals { key, value } => {
                let op = if matches!(self, Filter::TagEquals { .. }) { "=" } else { "!=" };
                f.write_char('[')?;
                write_text(f, key)?;
                f.write_str(op)?;
                write_text(f, value)?;
                f.write_char(']')
            }
            Filter::TagRegex { key, pattern } | Filter::TagNotRegex { key, pattern } => {
                let op = if matches!(self, Filter::TagRegex { .. }) { "~" } else { "!~" };
                f.write_char('[')?;
                write_text(f, key)?;
                f.write_str(op)?;
                write_pattern(f, pattern)?;
                write_flags(f, pattern.is_case_insensitive())?;
                f.write_char(']')
            }
            Filter::KeyRegex { key, value } => {
                f.write_str("[~")?;
                write_pattern(f, key)?;
                f.write_char('~')?;
                write_pattern(f, value)?;
                write_flags(f, key.is_case_insensitive() || value.is_case_insensitive())?;
                f.write_char(']')
            }
            Filter::BoundingBox(bbox) => write!(f, "({})", bbox),
            Filter::Around { radius, center } => match center {
                AroundCenter::Point(point) => {
                    write!(f, "(around:{},{},{})", radius, point.y, point.x)
                }
                AroundCenter::Set(name) if name == DEFAULT_SET => {
                    write!(f, "(around:{})", radius)
                }
                AroundCenter::Set(name) => write!(f, "(around.{}:{})", name, radius),
            },
            Filter::Polygon { points } => {
                f.write_str("(poly:\"")?;
                for (i, point) in points.iter().enumerate() {
                    if i > 0 {
                        f.write_char(' ')?;
                    }
                    write!(f, "{} {}", point.y, point.x)?;
                }
                f.write_str("\")")
            }
            Filter::IdList { ids } => {
                f.write_str("(id:")?;
                for (i, id) in ids.iter().enumerate() {
                    if i > 0 {
                        f.write_char(',')?;
                    }
                    write!(f, "{}", id)?;
                }
                f.write_char(')')
            }
            Filter::SetFilter { name } => write!(f, ".{}", name),
            Filter::Area { name } if name == DEFAULT_SET => f.write_str("(area)"),
            Filter::Area { name } => write!(f, "(area.{})", name),
        }
    }
}

impl Display for SelectorSet<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.filters().iter().try_for_each(|filter| filter.fmt(f))
    }
}

impl Display for ElementQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.target, SelectorSet::new(&self.filters))
    }
}

impl Display for OutStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(input) = &self.input {
            write!(f, ".{} ", input)?;
        }
        f.write_str("out")?;
        for modifier in &self.modifiers {
            write!(f, " {}", modifier.as_str())?;
        }
        if let Some(limit) = self.limit {
            write!(f, " {}", limit)?;
        }
        Ok(())
    }
}

fn write_block(f: &mut fmt::Formatter<'_>, keyword: &str, block: &Block) -> fmt::Result {
    f.write_str(keyword)?;
    write_set(f, &block.input)?;
    if let Some(name) = &block.name {
        write!(f, "->.{}", name)?;
    }
    f.write_str(" {")?;
    for statement in &block.body {
        write!(f, " {}", Terminated(statement))?;
    }
    f.write_str(" }")
}

/// A statement followed by its `;`, which blocks do not take.
struct Terminated<'a>(&'a Statement);

impl Display for Terminated<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0.kind {
            StatementKind::ForEach(_) | StatementKind::Complete(_) => self.0.fmt(f),
            _ => write!(f, "{};", self.0),
        }
    }
}

impl Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            StatementKind::ElementQuery(query) => query.fmt(f),
            StatementKind::Union { body } => {
                f.write_char('(')?;
                for (i, statement) in body.iter().enumerate() {
                    if i > 0 {
                        f.write_char(' ')?;
                    }
                    Terminated(statement).fmt(f)?;
                }
                f.write_char(')')
            }
            StatementKind::Difference {
                minuend,
                subtrahend,
            } => write!(f, "({} - {})", Terminated(minuend), Terminated(subtrahend)),
            StatementKind::Recurse { input, direction } => match input {
                Some(input) => write!(f, ".{} {}", input, direction),
                None => direction.fmt(f),
            },
            StatementKind::SetAssignment { name, source } => write!(f, "{}->.{}", source, name),
            StatementKind::SetReference { name } => write!(f, ".{}", name),
            StatementKind::Out(out) => out.fmt(f),
            StatementKind::ForEach(block) => write_block(f, "foreach", block),
            StatementKind::Complete(block) => write_block(f, "complete", block),
        }
    }
}

impl Display for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(out) = &self.out {
            f.write_str("[out:")?;
            write_text(f, out)?;
            f.write_char(']')?;
        }
        if let Some(timeout) = self.timeout {
            write!(f, "[timeout:{}]", timeout)?;
        }
        if let Some(maxsize) = self.maxsize {
            write!(f, "[maxsize:{}]", maxsize)?;
        }
        if let Some(bbox) = &self.bbox {
            write!(f, "[bbox:{}]", bbox)?;
        }
        if let Some(date) = &self.date {
            f.write_str("[date:")?;
            write_quoted(f, date)?;
            f.write_char(']')?;
        }
        f.write_char(';')
    }
}

impl Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        if !self.settings.is_empty() {
            self.settings.fmt(f)?;
            first = false;
        }
        for statement in &self.statements {
            if !first {
                f.write_char('\n')?;
            }
            first = false;
            Terminated(statement).fmt(f)?;
        }
        Ok(())
    }
}

impl Query {
    pub fn to_overpass(&self) -> String {
        self.to_string()
    }
}

impl Statement {
    pub fn to_overpass(&self) -> String {
        self.to_string()
    }
}

impl Filter {
    pub fn to_overpass(&self) -> String {
        self.to_string()
    }
}
