//! SQL generation.
//!
//! A [`SelectorSet`] lowers to a `WHERE` fragment; a whole [`Query`] lowers
//! to a `WITH ... SELECT` statement over the `node`, `way`, `relation` and
//! `area` tables (`id`, `tags`, `geom`, plus `way.nodes` and
//! `relation.members`). Everything dialect-specific lives behind
//! [`SqlDialect`].
//!
//! [`Query`]: crate::overpass::Query

pub mod duckdb;
mod filter;
pub mod postgres;
mod query;

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::overpass::{BoundingBox, SelectorSet};

pub(crate) use filter::{FilterLowering, SetScope};

/// SQL flavors with a built-in [`SqlDialect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dialect {
    #[default]
    Postgres,
    DuckDb,
}

impl Dialect {
    pub fn name(&self) -> &'static str {
        self.sql().name()
    }

    pub fn sql(&self) -> &'static dyn SqlDialect {
        match self {
            Dialect::Postgres => &postgres::Postgres,
            Dialect::DuckDb => &duckdb::DuckDb,
        }
    }
}

impl FromStr for Dialect {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Dialect::Postgres),
            "duckdb" => Ok(Dialect::DuckDb),
            _ => Err(Error::UnsupportedDialect(s.to_string())),
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Turns a raw tag key into the SQL fragment used wherever the key appears.
/// The output is embedded verbatim, so an escaper must produce a valid
/// expression (usually a quoted literal).
pub trait KeyEscaper: Sync {
    fn escape_key(&self, key: &str) -> String;
}

impl<F> KeyEscaper for F
where
    F: Fn(&str) -> String + Sync,
{
    fn escape_key(&self, key: &str) -> String {
        self(key)
    }
}

/// Places a fixed marker on both sides of every key, then quotes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrapKeys(pub String);

impl KeyEscaper for WrapKeys {
    fn escape_key(&self, key: &str) -> String {
        quote_literal(&format!("{}{}{}", self.0, key, self.0))
    }
}

/// Settings for one lowering to SQL.
#[derive(Clone, Copy)]
pub struct SqlOptions<'a> {
    dialect: Dialect,
    srid: u32,
    key_escaper: Option<&'a dyn KeyEscaper>,
    anchored_regexes: bool,
}

impl<'a> SqlOptions<'a> {
    pub fn new(dialect: Dialect, srid: u32) -> Self {
        SqlOptions {
            dialect,
            srid,
            key_escaper: None,
            anchored_regexes: false,
        }
    }

    /// Parse `dialect` by name, failing with [`Error::UnsupportedDialect`].
    pub fn for_dialect(dialect: &str, srid: u32) -> Result<Self> {
        Ok(SqlOptions::new(dialect.parse()?, srid))
    }

    pub fn with_key_escaper(mut self, key_escaper: Option<&'a dyn KeyEscaper>) -> Self {
        self.key_escaper = key_escaper;
        self
    }

    /// Emit regexes anchored to the whole value, so SQL selects the same
    /// tags that [`SelectorSet::matches`] accepts. Off by default: the
    /// pattern is then passed through as an unanchored search.
    pub fn with_anchored_regexes(mut self, anchored: bool) -> Self {
        self.anchored_regexes = anchored;
        self
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn srid(&self) -> u32 {
        self.srid
    }

    pub(crate) fn filter_lowering(&self) -> FilterLowering<'a> {
        FilterLowering::new(
            self.dialect.sql(),
            self.srid,
            self.key_escaper,
            self.anchored_regexes,
        )
    }
}

/// Single-quoted SQL string literal with embedded quotes doubled.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Dialect-specific SQL spelling.
///
/// `key` and `value` arguments are already SQL expressions (quoted literals
/// or escaper output); `subject` is an expression yielding a tag value;
/// `pattern` is regex source text.
pub trait SqlDialect: Sync {
    fn name(&self) -> &'static str;

    fn quote_literal(&self, value: &str) -> String {
        quote_literal(value)
    }

    fn tag_exists(&self, key: &str) -> String;

    fn tag_value(&self, key: &str) -> String;

    /// Regex search; a negated test is true when `subject` is NULL.
    fn regex_match(
        &self,
        subject: &str,
        pattern: &str,
        case_insensitive: bool,
        negated: bool,
    ) -> String;

    /// True when any tag has a key matching `key` and a value matching `value`.
    fn key_value_regex(&self, key: &str, value: &str, case_insensitive: bool) -> String;

    fn point(&self, lon: f64, lat: f64, srid: u32) -> String;

    fn envelope(&self, bbox: &BoundingBox, srid: u32) -> String;

    fn polygon(&self, wkt: &str, srid: u32) -> String;

    fn intersects(&self, geom: &str, other: &str) -> String {
        format!("ST_Intersects({}, {})", geom, other)
    }

    /// True when `geom` lies within `metres` of `other`; both are in `srid`.
    fn distance_within(&self, geom: &str, other: &str, metres: f64, srid: u32) -> String;

    fn union_agg(&self, geom: &str) -> String;

    fn centroid(&self, geom: &str) -> String {
        format!("ST_Centroid({})", geom)
    }

    fn bounding_box(&self, geom: &str) -> String {
        format!("ST_Envelope({})", geom)
    }

    /// NULL typed as the `tags` column.
    fn null_tags(&self) -> &'static str;

    /// NULL typed as the `geom` column.
    fn null_geometry(&self) -> &'static str;

    /// A row source with the common `osm_type, id, tags, geom` columns and
    /// no rows.
    fn empty_set(&self) -> String;

    /// Statement run before the query to enforce `[timeout:N]`, if the
    /// dialect has one.
    fn statement_timeout(&self, seconds: u32) -> Option<String>;

    /// `FROM` item expanding the members of relation `r` as `m`.
    fn member_from(&self) -> &'static str;

    fn member_type(&self) -> &'static str;

    fn member_ref(&self) -> &'static str;

    /// `FROM` item expanding the node ids of way `w` as `n(id)`.
    fn way_nodes_from(&self) -> &'static str {
        "unnest(w.nodes) AS n(id)"
    }

    /// Node ids of the ways whose ids `ways` selects.
    fn way_node_ids(&self, ways: &str) -> String {
        format!(
            "SELECT n.id FROM way w, {} WHERE w.id IN ({})",
            self.way_nodes_from(),
            ways
        )
    }

    /// Ids of the `member_type` members of the relations `relations` selects.
    fn member_ids(&self, relations: &str, member_type: &str) -> String {
        format!(
            "SELECT {} FROM relation r, {} WHERE r.id IN ({}) AND {} = {}",
            self.member_ref(),
            self.member_from(),
            relations,
            self.member_type(),
            self.quote_literal(member_type)
        )
    }

    /// Ids of the ways containing any node `nodes` selects.
    fn parent_ways(&self, nodes: &str) -> String {
        format!(
            "SELECT DISTINCT w.id FROM way w, {} WHERE n.id IN ({})",
            self.way_nodes_from(),
            nodes
        )
    }

    /// Ids of the relations with a `member_type` member `members` selects.
    fn parent_relations(&self, members: &str, member_type: &str) -> String {
        format!(
            "SELECT DISTINCT r.id FROM relation r, {} WHERE {} = {} AND {} IN ({})",
            self.member_from(),
            self.member_type(),
            self.quote_literal(member_type),
            self.member_ref(),
            members
        )
    }
}

impl<'a> SelectorSet<'a> {
    /// Lower to a SQL boolean expression. Filters are joined with `AND`; an
    /// empty set is `TRUE`. Set-based filters need a whole query for context
    /// and fail with [`Error::UnsupportedFilter`].
    pub fn to_sql(
        &self,
        dialect: &str,
        srid: u32,
        key_escaper: Option<&dyn KeyEscaper>,
    ) -> Result<String> {
        let options = SqlOptions::for_dialect(dialect, srid)?.with_key_escaper(key_escaper);
        self.to_sql_with(&options)
    }

    /// [`to_sql`](Self::to_sql) with explicit [`SqlOptions`].
    pub fn to_sql_with(&self, options: &SqlOptions<'_>) -> Result<String> {
        options
            .filter_lowering()
            .conjunction(self.filters(), None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overpass::parse;

    fn where_clause(filters: &str, dialect: &str) -> Result<String> {
        let query = parse(&format!("node{};", filters)).unwrap();
        query.first_selectors().unwrap().to_sql(dialect, 4326, None)
    }

    #[test]
    fn test_dialect_from_str() {
        assert_eq!("postgres".parse::<Dialect>().unwrap(), Dialect::Postgres);
        assert_eq!("PostgreSQL".parse::<Dialect>().unwrap(), Dialect::Postgres);
        assert_eq!("DuckDB".parse::<Dialect>().unwrap(), Dialect::DuckDb);
        assert_eq!(
            "oracle".parse::<Dialect>(),
            Err(Error::UnsupportedDialect("oracle".to_string()))
        );
        assert_eq!(Dialect::DuckDb.to_string(), "duckdb");
    }

    #[test]
    fn test_quote_literal() {
        assert_eq!(quote_literal("cafe"), "'cafe'");
        assert_eq!(quote_literal("Joe's"), "'Joe''s'");
        assert_eq!(quote_literal("''"), "''''''");
    }

    #[test]
    fn test_unsupported_dialect() {
        assert_eq!(
            where_clause("[a]", "mysql"),
            Err(Error::UnsupportedDialect("mysql".to_string()))
        );
    }

    #[test]
    fn test_empty_selector_set_is_true() {
        let set = SelectorSet::new(&[]);
        assert_eq!(set.to_sql("postgres", 4326, None).unwrap(), "TRUE");
        assert_eq!(set.to_sql("duckdb", 4326, None).unwrap(), "TRUE");
    }

    #[test]
    fn test_closure_key_escaper() {
        let query = parse("node[name=x][!fee];").unwrap();
        let escaper = |key: &str| format!("'_{}_'", key);
        let sql = query
            .first_selectors()
            .unwrap()
            .to_sql("postgres", 4326, Some(&escaper))
            .unwrap();
        assert_eq!(sql, "tags->>'_name_' = 'x' AND NOT (tags?'_fee_')");
    }

    #[test]
    fn test_wrap_keys_escaper() {
        let query = parse("node[\"it's\"];").unwrap();
        let sql = query
            .first_selectors()
            .unwrap()
            .to_sql("postgres", 4326, Some(&WrapKeys("_".into())))
            .unwrap();
        assert_eq!(sql, "tags?'_it''s_'");
    }

    #[test]
    fn test_anchored_regexes_are_opt_in() {
        let query = parse(r#"node[name~"Caf",i][~"^addr"~"."];"#).unwrap();
        let selectors = query.first_selectors().unwrap();
        assert_eq!(
            selectors.to_sql("postgres", 4326, None).unwrap(),
            "tags->>'name' ~* 'Caf' AND EXISTS (SELECT 1 FROM jsonb_each_text(tags) AS kv(key, value) \
             WHERE kv.key ~ '^addr' AND kv.value ~ '.')"
        );

        let options = SqlOptions::new(Dialect::Postgres, 4326).with_anchored_regexes(true);
        assert_eq!(
            selectors.to_sql_with(&options).unwrap(),
            "tags->>'name' ~* '^(?:Caf)$' AND EXISTS (SELECT 1 FROM jsonb_each_text(tags) AS kv(key, value) \
             WHERE kv.key ~ '^(?:^addr)$' AND kv.value ~ '^(?:.)$')"
        );
    }

    #[test]
    fn test_set_filters_need_a_query() {
        for filters in [".a", "(area.a)", "(around.a:10)", "(around:10)"] {
            let err = where_clause(filters, "postgres").unwrap_err();
            assert!(
                matches!(err, Error::UnsupportedFilter(_)),
                "{} gave {:?}",
                filters,
                err
            );
        }
    }
}
