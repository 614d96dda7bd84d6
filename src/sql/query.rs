//! Whole-query lowering.
//!
//! Every set-producing statement becomes a CTE with the columns
//! `osm_type, id, tags, geom`; named sets map to the CTE that last bound
//! them. Each `out` adds a CTE of its own and the final `SELECT` is the
//! `UNION ALL` of those, in statement order.

use std::collections::HashMap;

use super::{FilterLowering, KeyEscaper, SetScope, SqlDialect, SqlOptions, quote_literal};
use crate::error::{Error, Result};
use crate::overpass::{
    Block, BoundingBox, DEFAULT_SET, ElementQuery, Filter, OutModifier, OutStatement, Query,
    RecurseDirection, Statement, StatementKind, Target,
};

const ELEMENT_TYPES: [&str; 3] = ["node", "way", "relation"];

struct Cte {
    name: String,
    /// Column list, needed by recursive CTEs.
    columns: &'static str,
    body: String,
}

struct QueryLowering<'a> {
    filters: FilterLowering<'a>,
    global_bbox: Option<BoundingBox>,
    ctes: Vec<Cte>,
    outputs: Vec<String>,
    /// Set name to CTE name.
    sets: HashMap<String, String>,
    recursive: bool,
}

impl<'a> QueryLowering<'a> {
    fn new(filters: FilterLowering<'a>, global_bbox: Option<BoundingBox>) -> Self {
        QueryLowering {
            filters,
            global_bbox,
            ctes: Vec::new(),
            outputs: Vec::new(),
            sets: HashMap::new(),
            recursive: false,
        }
    }

    fn dialect(&self) -> &'a dyn SqlDialect {
        self.filters.dialect()
    }

    fn next_name(&self, prefix: char) -> String {
        format!("_{}{}", prefix, self.ctes.len())
    }

    fn push(&mut self, prefix: char, body: String) -> String {
        let name = self.next_name(prefix);
        self.push_named(name.clone(), "", body);
        name
    }

    fn push_named(&mut self, name: String, columns: &'static str, body: String) {
        tracing::trace!(cte = %name, "added CTE");
        self.ctes.push(Cte {
            name,
            columns,
            body,
        });
    }

    fn bind(&mut self, name: &str, cte: String) {
        self.sets.insert(name.to_string(), cte);
    }

    /// CTE holding set `name` (`_` when absent). An unbound `_` is empty;
    /// any other unbound name is an error.
    fn resolve(&mut self, name: Option<&str>) -> Result<String> {
        let name = name.unwrap_or(DEFAULT_SET);
        if let Some(cte) = self.sets.get(name) {
            return Ok(cte.clone());
        }
        if name != DEFAULT_SET {
            return Err(Error::UnsupportedFilter(format!(
                "set `.{}` is not defined",
                name
            )));
        }
        let empty = self.dialect().empty_set();
        let cte = self.push('e', empty);
        self.bind(DEFAULT_SET, cte.clone());
        Ok(cte)
    }

    fn statement(&mut self, statement: &Statement) -> Result<()> {
        match &statement.kind {
            StatementKind::Out(out) => self.out(out),
            StatementKind::ForEach(block) => self.foreach(block),
            StatementKind::Complete(_) => Err(Error::UnsupportedStatement(
                "`complete` has no SQL equivalent".to_string(),
            )),
            StatementKind::SetAssignment { .. } => self.produce(statement).map(|_| ()),
            _ => {
                let cte = self.produce(statement)?;
                self.bind(DEFAULT_SET, cte);
                Ok(())
            }
        }
    }

    /// Lower a set-producing statement and return the CTE holding its result.
    fn produce(&mut self, statement: &Statement) -> Result<String> {
        match &statement.kind {
            StatementKind::ElementQuery(query) => {
                let body = self.element_query(query)?;
                Ok(self.push('q', body))
            }
            StatementKind::Union { body } => {
                let mut parts = Vec::new();
                for child in body {
                    match &child.kind {
                        StatementKind::Out(_)
                        | StatementKind::ForEach(_)
                        | StatementKind::Complete(_) => self.statement(child)?,
                        StatementKind::SetAssignment { .. } => parts.push(self.produce(child)?),
                        _ => {
                            let cte = self.produce(child)?;
                            self.bind(DEFAULT_SET, cte.clone());
                            parts.push(cte);
                        }
                    }
                }
                let body = if parts.is_empty() {
                    self.dialect().empty_set()
                } else {
                    select_all(&parts, " UNION ")
                };
                Ok(self.push('u', body))
            }
            StatementKind::Difference {
                minuend,
                subtrahend,
            } => {
                let left = self.produce(minuend)?;
                let right = self.produce(subtrahend)?;
                let body = format!("SELECT * FROM {} EXCEPT SELECT * FROM {}", left, right);
                Ok(self.push('d', body))
            }
            StatementKind::Recurse { input, direction } => {
                let input = self.resolve(input.as_deref())?;
                let body = self.recurse(&input, *direction);
                Ok(self.push('r', body))
            }
            StatementKind::SetAssignment { name, source } => {
                let cte = self.produce(source)?;
                self.bind(name, cte.clone());
                Ok(cte)
            }
            StatementKind::SetReference { name } => self.resolve(Some(name)),
            StatementKind::Out(_) => Err(Error::UnsupportedStatement(
                "`out` does not produce a set".to_string(),
            )),
            StatementKind::ForEach(_) | StatementKind::Complete(_) => Err(
                Error::UnsupportedStatement("a block does not produce a set".to_string()),
            ),
        }
    }

    fn element_query(&self, query: &ElementQuery) -> Result<String> {
        let types: Vec<&str> = match query.target {
            Target::Nwr => ELEMENT_TYPES.to_vec(),
            target => vec![target.as_str()],
        };

        let mut filters = query.filters.clone();
        if let Some(bbox) = self.global_bbox {
            if !filters.iter().any(|f| matches!(f, Filter::BoundingBox(_))) {
                filters.push(Filter::BoundingBox(bbox));
            }
        }

        let mut branches = Vec::new();
        for osm_type in types {
            let scope = SetScope {
                sets: &self.sets,
                osm_type,
            };
            let predicate = self.filters.conjunction(&filters, Some(&scope))?;
            branches.push(format!(
                "SELECT {} AS osm_type, id, tags, geom FROM {} WHERE {}",
                quote_literal(osm_type),
                osm_type,
                predicate
            ));
        }
        Ok(branches.join(" UNION ALL "))
    }

    fn recurse(&mut self, input: &str, direction: RecurseDirection) -> String {
        let d = self.dialect();
        let of_type = |osm_type: &str| {
            format!(
                "SELECT id FROM {} WHERE osm_type = {}",
                input,
                quote_literal(osm_type)
            )
        };
        let nodes_in = of_type("node");
        let ways_in = of_type("way");
        let relations_in = of_type("relation");

        match direction {
            RecurseDirection::Down => {
                let member_ways = d.member_ids(&relations_in, "way");
                let nodes = [
                    d.way_node_ids(&ways_in),
                    d.way_node_ids(&member_ways),
                    d.member_ids(&relations_in, "node"),
                ]
                .join(" UNION ");
                rows(&[("way", member_ways), ("node", nodes)])
            }
            RecurseDirection::DownRelations => {
                let closure = self.next_name('c');
                let body = format!(
                    "{} UNION SELECT {} FROM {}, relation r, {} WHERE r.id = {}.id AND {} = {}",
                    d.member_ids(&relations_in, "relation"),
                    d.member_ref(),
                    closure,
                    d.member_from(),
                    closure,
                    d.member_type(),
                    quote_literal("relation")
                );
                self.push_named(closure.clone(), "(id)", body);
                self.recursive = true;

                let all_relations = format!("{} UNION SELECT id FROM {}", relations_in, closure);
                let member_ways = d.member_ids(&all_relations, "way");
                let ways = format!("{} UNION {}", member_ways, ways_in);
                let nodes = format!(
                    "{} UNION {}",
                    d.member_ids(&all_relations, "node"),
                    d.way_node_ids(&ways)
                );
                rows(&[
                    ("relation", format!("SELECT id FROM {}", closure)),
                    ("way", member_ways),
                    ("node", nodes),
                ])
            }
            RecurseDirection::Up => {
                let ways = d.parent_ways(&nodes_in);
                let relations = parent_relations_of(d, &nodes_in, &ways_in, &ways);
                rows(&[("way", ways), ("relation", relations)])
            }
            RecurseDirection::UpRelations => {
                let ways = d.parent_ways(&nodes_in);
                let closure = self.next_name('c');
                let body = format!(
                    "{} UNION {} UNION SELECT r.id FROM {}, relation r, {} WHERE {} = {} AND {} = {}.id",
                    parent_relations_of(d, &nodes_in, &ways_in, &ways),
                    d.parent_relations(&relations_in, "relation"),
                    closure,
                    d.member_from(),
                    d.member_type(),
                    quote_literal("relation"),
                    d.member_ref(),
                    closure
                );
                self.push_named(closure.clone(), "(id)", body);
                self.recursive = true;
                rows(&[
                    ("way", ways),
                    ("relation", format!("SELECT id FROM {}", closure)),
                ])
            }
        }
    }

    fn out(&mut self, out: &OutStatement) -> Result<()> {
        let input = self.resolve(out.input.as_deref())?;
        let body = out_select(self.dialect(), out, &input);
        let name = self.push('o', body);
        self.outputs.push(name);
        Ok(())
    }

    /// The body runs once, with the loop variable bound to the whole input.
    fn foreach(&mut self, block: &Block) -> Result<()> {
        let input = self.resolve(block.input.as_deref())?;
        let var = block.name.as_deref().unwrap_or(DEFAULT_SET);
        self.bind(var, input);
        for statement in &block.body {
            self.statement(statement)?;
        }
        Ok(())
    }

    fn finish(self, timeout: Option<u32>) -> String {
        let dialect = self.dialect();
        let select = if !self.outputs.is_empty() {
            select_all(&self.outputs, " UNION ALL ")
        } else if let Some(cte) = self.sets.get(DEFAULT_SET) {
            format!("SELECT * FROM {}", cte)
        } else {
            dialect.empty_set()
        };

        let mut sql = String::new();
        if let Some(set_timeout) = timeout.and_then(|seconds| dialect.statement_timeout(seconds)) {
            sql.push_str(&set_timeout);
            sql.push('\n');
        }
        if !self.ctes.is_empty() {
            sql.push_str(if self.recursive {
                "WITH RECURSIVE "
            } else {
                "WITH "
            });
            let ctes: Vec<String> = self
                .ctes
                .iter()
                .map(|cte| format!("{}{} AS ({})", cte.name, cte.columns, cte.body))
                .collect();
            sql.push_str(&ctes.join(",\n"));
            sql.push('\n');
        }
        sql.push_str(&select);
        sql
    }
}

fn select_all(ctes: &[String], separator: &str) -> String {
    ctes.iter()
        .map(|cte| format!("SELECT * FROM {}", cte))
        .collect::<Vec<_>>()
        .join(separator)
}

/// Rows of each element type whose ids the paired subquery selects.
fn rows(parts: &[(&str, String)]) -> String {
    parts
        .iter()
        .map(|(osm_type, ids)| {
            format!(
                "SELECT {} AS osm_type, id, tags, geom FROM {} WHERE id IN ({})",
                quote_literal(osm_type),
                osm_type,
                ids
            )
        })
        .collect::<Vec<_>>()
        .join(" UNION ALL ")
}

/// Relations with a node or way of the input, or one of its parent ways,
/// as a member.
fn parent_relations_of(d: &dyn SqlDialect, nodes: &str, ways: &str, parent_ways: &str) -> String {
    [
        d.parent_relations(nodes, "node"),
        d.parent_relations(ways, "way"),
        d.parent_relations(parent_ways, "way"),
    ]
    .join(" UNION ")
}

fn out_select(d: &dyn SqlDialect, out: &OutStatement, input: &str) -> String {
    let has = |modifier: OutModifier| out.modifiers.contains(&modifier);
    if has(OutModifier::Count) {
        return format!(
            "SELECT 'count' AS osm_type, COUNT(*) AS id, {} AS tags, {} AS geom FROM {}",
            d.null_tags(),
            d.null_geometry(),
            input
        );
    }

    // Last verbosity modifier wins; `body` is the default.
    let verbosity = out
        .modifiers
        .iter()
        .rev()
        .copied()
        .find(|m| {
            matches!(
                m,
                OutModifier::Ids
                    | OutModifier::Skel
                    | OutModifier::Body
                    | OutModifier::Tags
                    | OutModifier::Meta
            )
        })
        .unwrap_or(OutModifier::Body);

    let tags = match verbosity {
        OutModifier::Ids | OutModifier::Skel => format!("{} AS tags", d.null_tags()),
        _ => "tags".to_string(),
    };
    let geom = if has(OutModifier::Center) {
        format!("{} AS geom", d.centroid("geom"))
    } else if has(OutModifier::Bb) {
        format!("{} AS geom", d.bounding_box("geom"))
    } else if has(OutModifier::Geom)
        || matches!(
            verbosity,
            OutModifier::Skel | OutModifier::Body | OutModifier::Meta
        )
    {
        "geom".to_string()
    } else {
        format!("{} AS geom", d.null_geometry())
    };

    let mut sql = format!("SELECT osm_type, id, {}, {} FROM {}", tags, geom, input);
    if has(OutModifier::Asc) || out.limit.is_some() {
        sql.push_str(" ORDER BY osm_type, id");
    }
    if let Some(limit) = out.limit {
        sql.push_str(&format!(" LIMIT {}", limit));
    }
    sql
}

impl Query {
    /// Lower the whole query to one SQL statement (preceded by a
    /// `statement_timeout` setting when `[timeout]` is given and the
    /// dialect supports it).
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
        let mut lowering = QueryLowering::new(options.filter_lowering(), self.settings.bbox);
        for statement in &self.statements {
            lowering.statement(statement)?;
        }
        let ctes = lowering.ctes.len();
        let outputs = lowering.outputs.len();
        let sql = lowering.finish(self.settings.timeout);
        tracing::debug!(
            dialect = %options.dialect(),
            srid = options.srid(),
            ctes,
            outputs,
            "lowered query to SQL"
        );
        Ok(sql)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overpass::parse;

    fn postgres(input: &str) -> String {
        parse(input).unwrap().to_sql("postgres", 4326, None).unwrap()
    }

    fn postgres_err(input: &str) -> Error {
        parse(input)
            .unwrap()
            .to_sql("postgres", 4326, None)
            .unwrap_err()
    }

    #[test]
    fn test_reference_query() {
        assert_eq!(
            postgres(r#"[out:json]; node["amenity"="cafe"](50.7,7.1,50.8,7.2); out body;"#),
            "WITH _q0 AS (SELECT 'node' AS osm_type, id, tags, geom FROM node \
             WHERE tags->>'amenity' = 'cafe' \
             AND ST_Intersects(geom, ST_SetSRID(ST_MakeEnvelope(7.1, 50.7, 7.2, 50.8), 4326))),\n\
             _o1 AS (SELECT osm_type, id, tags, geom FROM _q0)\n\
             SELECT * FROM _o1"
        );
    }

    #[test]
    fn test_timeout_and_limit() {
        let query = parse("[timeout:25]; way[highway]; out ids 10;").unwrap();
        let expected_body = "WITH _q0 AS (SELECT 'way' AS osm_type, id, tags, geom FROM way \
                             WHERE tags?'highway'),\n\
                             _o1 AS (SELECT osm_type, id, NULL::jsonb AS tags, NULL::geometry AS geom FROM _q0 \
                             ORDER BY osm_type, id LIMIT 10)\n\
                             SELECT * FROM _o1";
        assert_eq!(
            query.to_sql("postgres", 4326, None).unwrap(),
            format!("SET statement_timeout = 25000;\n{}", expected_body)
        );
        let duck = query.to_sql("duckdb", 4326, None).unwrap();
        assert!(duck.starts_with("WITH _q0 AS (SELECT 'way' AS osm_type"));
        assert!(duck.contains("map_contains(tags, 'highway')"));
    }

    #[test]
    fn test_global_bbox_applies_to_every_element_query() {
        let sql = postgres("[bbox:1,2,3,4]; node[a]; way[b](5,6,7,8); out;");
        assert_eq!(sql.matches("ST_MakeEnvelope(2, 1, 4, 3)").count(), 1);
        assert_eq!(sql.matches("ST_MakeEnvelope(6, 5, 8, 7)").count(), 1);
    }

    #[test]
    fn test_named_sets() {
        let sql = postgres("area[name=Bonn]->.a; node(area.a)[amenity]; out;");
        assert!(sql.contains(
            "_q0 AS (SELECT 'area' AS osm_type, id, tags, geom FROM area WHERE tags->>'name' = 'Bonn')"
        ));
        assert!(sql.contains(
            "_q1 AS (SELECT 'node' AS osm_type, id, tags, geom FROM node \
             WHERE ST_Intersects(geom, (SELECT ST_Union(geom) FROM _q0)) AND tags?'amenity')"
        ));
        assert!(sql.ends_with("_o2 AS (SELECT osm_type, id, tags, geom FROM _q1)\nSELECT * FROM _o2"));
    }

    #[test]
    fn test_input_set_filter() {
        let sql = postgres("way[highway]->.w; node.w; out;");
        assert!(sql.contains("WHERE id IN (SELECT id FROM _q0 WHERE osm_type = 'node')"));
    }

    #[test]
    fn test_union_and_difference() {
        let sql = postgres("(node[a]; way[b];); out;");
        assert!(sql.contains("_u2 AS (SELECT * FROM _q0 UNION SELECT * FROM _q1)"));
        assert!(sql.contains("_o3 AS (SELECT osm_type, id, tags, geom FROM _u2)"));

        let sql = postgres("(node[a]; - node[b];); out;");
        assert!(sql.contains("_d2 AS (SELECT * FROM _q0 EXCEPT SELECT * FROM _q1)"));
    }

    #[test]
    fn test_nwr_expands_to_three_tables() {
        let sql = postgres("nwr[shop];");
        assert_eq!(
            sql,
            "WITH _q0 AS (SELECT 'node' AS osm_type, id, tags, geom FROM node WHERE tags?'shop' \
             UNION ALL SELECT 'way' AS osm_type, id, tags, geom FROM way WHERE tags?'shop' \
             UNION ALL SELECT 'relation' AS osm_type, id, tags, geom FROM relation WHERE tags?'shop')\n\
             SELECT * FROM _q0"
        );
    }

    #[test]
    fn test_recurse_down() {
        let sql = postgres("way[highway]; >; out skel;");
        assert!(sql.starts_with("WITH _q0"));
        assert!(sql.contains(
            "SELECT n.id FROM way w, unnest(w.nodes) AS n(id) \
             WHERE w.id IN (SELECT id FROM _q0 WHERE osm_type = 'way')"
        ));
        assert!(sql.contains("_o2 AS (SELECT osm_type, id, NULL::jsonb AS tags, geom FROM _r1)"));
    }

    #[test]
    fn test_recursive_closures() {
        let sql = postgres("rel[type=route]; >>; out;");
        assert!(sql.starts_with("WITH RECURSIVE _q0"));
        assert!(sql.contains("_c1(id) AS ("));
        assert!(sql.contains("FROM _c1, relation r, jsonb_array_elements(r.members) AS m WHERE r.id = _c1.id"));
        assert!(sql.contains("_r2 AS ("));

        let sql = postgres("node[a]; <<; out;");
        assert!(sql.starts_with("WITH RECURSIVE _q0"));
        assert!(sql.contains("AND (m->>'ref')::bigint = _c1.id"));
    }

    #[test]
    fn test_out_variants() {
        let sql = postgres("node[a]; out count;");
        assert!(sql.contains(
            "_o1 AS (SELECT 'count' AS osm_type, COUNT(*) AS id, NULL::jsonb AS tags, \
             NULL::geometry AS geom FROM _q0)"
        ));
        let sql = postgres("way[a]; out tags center;");
        assert!(sql.contains("_o1 AS (SELECT osm_type, id, tags, ST_Centroid(geom) AS geom FROM _q0)"));
        let sql = postgres("way[a]; out bb asc;");
        assert!(sql.contains("ST_Envelope(geom) AS geom FROM _q0 ORDER BY osm_type, id)"));
    }

    #[test]
    fn test_multiple_outputs() {
        let sql = postgres("node[a]; out; way[b]; out ids;");
        assert!(sql.contains("_o1 AS (SELECT osm_type, id, tags, geom FROM _q0)"));
        assert!(sql.contains(
            "_o3 AS (SELECT osm_type, id, NULL::jsonb AS tags, NULL::geometry AS geom FROM _q2)"
        ));
        assert!(sql.ends_with("SELECT * FROM _o1 UNION ALL SELECT * FROM _o3"));
    }

    #[test]
    fn test_outputs_without_columns_keep_column_types() {
        for input in [
            "node[a]; out; way[b]; out ids;",
            "node[a]; out count; out skel;",
        ] {
            let sql = postgres(input);
            assert!(!sql.contains("NULL AS"), "{}", sql);
        }

        let query = parse("node[a]; out; out count;").unwrap();
        let duck = query.to_sql("duckdb", 4326, None).unwrap();
        assert!(duck.contains(
            "COUNT(*) AS id, NULL::MAP(VARCHAR, VARCHAR) AS tags, NULL::GEOMETRY AS geom FROM _q0"
        ));
    }

    #[test]
    fn test_foreach_binds_loop_variable() {
        let sql = postgres("way[highway]->.roads; foreach.roads->.r { node(around.r:10); out; }");
        assert!(sql.contains(
            "ST_DWithin(geom::geography, (SELECT ST_Union(geom) FROM _q0)::geography, 10)"
        ));
    }

    #[test]
    fn test_empty_default_set() {
        let sql = postgres("out;");
        assert!(sql.starts_with("WITH _e0 AS (SELECT NULL::text AS osm_type"));
        assert!(sql.ends_with("SELECT * FROM _o1"));

        assert_eq!(postgres(""), crate::sql::postgres::Postgres.empty_set());
    }

    #[test]
    fn test_unsupported_statements() {
        assert!(matches!(
            postgres_err("complete { node[a]; }"),
            Error::UnsupportedStatement(_)
        ));
        assert_eq!(
            postgres_err(".x out;"),
            Error::UnsupportedFilter("set `.x` is not defined".to_string())
        );
        assert_eq!(
            postgres_err("node.y;"),
            Error::UnsupportedFilter("set `.y` is not defined".to_string())
        );
    }

    #[test]
    fn test_deepest_nesting_lowers() {
        let levels = crate::overpass::parser::MAX_NESTING;
        let source = format!("{}node[a];{} out;", "(".repeat(levels), ");".repeat(levels));
        let sql = postgres(&source);
        assert!(sql.starts_with("WITH _q0 AS (SELECT 'node' AS osm_type"));
        assert_eq!(sql.matches(" UNION SELECT").count(), 0);
        assert_eq!(sql.matches("_u").count(), 2 * levels);
    }

    #[test]
    fn test_anchored_regexes_in_whole_query() {
        let query = parse(r#"way[highway~"primary|secondary"]; out;"#).unwrap();
        let options = SqlOptions::for_dialect("postgres", 4326)
            .unwrap()
            .with_anchored_regexes(true);
        let sql = query.to_sql_with(&options).unwrap();
        assert!(sql.contains("tags->>'highway' ~ '^(?:primary|secondary)$'"));
    }

    #[test]
    fn test_key_escaper_applies_to_whole_query() {
        let query = parse("node[name=x]; out;").unwrap();
        let escaper = super::super::WrapKeys("_".into());
        let sql = query.to_sql("postgres", 3857, Some(&escaper)).unwrap();
        assert!(sql.contains("tags->>'_name_' = 'x'"));
    }
}
